//! Filesystem event types.

use std::path::PathBuf;
use std::str::FromStr;

use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::EventKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WatchError;

/// Kind of filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsEventType {
    /// File was read.
    Access,
    /// File contents changed.
    Modify,
    /// Metadata changed.
    Attrib,
    /// File opened for writing was closed.
    WritableClose,
    /// File not opened for writing was closed.
    UnwritableClose,
    /// File was opened.
    Open,
    /// Entry was renamed away from here.
    MoveFrom,
    /// Entry was renamed to here.
    MoveTo,
    /// Entry was created.
    Create,
    /// Entry was deleted.
    Delete,
    /// The watched path itself was deleted.
    DeleteSelf,
    /// Anything the backend could not classify.
    Other,
}

impl FsEventType {
    /// Every event type.
    pub const ALL: [FsEventType; 12] = [
        FsEventType::Access,
        FsEventType::Modify,
        FsEventType::Attrib,
        FsEventType::WritableClose,
        FsEventType::UnwritableClose,
        FsEventType::Open,
        FsEventType::MoveFrom,
        FsEventType::MoveTo,
        FsEventType::Create,
        FsEventType::Delete,
        FsEventType::DeleteSelf,
        FsEventType::Other,
    ];

    /// Classify a notify event kind.
    ///
    /// Removal of a watched path itself is reported as `Delete` here; the
    /// watcher upgrades it to `DeleteSelf` when the path matches the watch.
    pub fn from_kind(kind: &EventKind) -> Self {
        match kind {
            EventKind::Access(AccessKind::Close(AccessMode::Write)) => FsEventType::WritableClose,
            EventKind::Access(AccessKind::Close(_)) => FsEventType::UnwritableClose,
            EventKind::Access(AccessKind::Open(_)) => FsEventType::Open,
            EventKind::Access(_) => FsEventType::Access,
            EventKind::Create(_) => FsEventType::Create,
            EventKind::Modify(ModifyKind::Metadata(_)) => FsEventType::Attrib,
            EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both)) => {
                FsEventType::MoveTo
            }
            EventKind::Modify(ModifyKind::Name(_)) => FsEventType::MoveFrom,
            EventKind::Modify(_) => FsEventType::Modify,
            EventKind::Remove(_) => FsEventType::Delete,
            EventKind::Any | EventKind::Other => FsEventType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FsEventType::Access => "access",
            FsEventType::Modify => "modify",
            FsEventType::Attrib => "attrib",
            FsEventType::WritableClose => "writable_close",
            FsEventType::UnwritableClose => "unwritable_close",
            FsEventType::Open => "open",
            FsEventType::MoveFrom => "move_from",
            FsEventType::MoveTo => "move_to",
            FsEventType::Create => "create",
            FsEventType::Delete => "delete",
            FsEventType::DeleteSelf => "delete_self",
            FsEventType::Other => "other",
        }
    }
}

impl std::fmt::Display for FsEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FsEventType {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FsEventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| WatchError::Usage(format!("Unknown event type: {}", s)))
    }
}

/// A change delivered to a watch callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    /// Id of the watch that matched.
    pub id: Uuid,
    pub path: PathBuf,
    /// Destination of a rename, when the backend reports both ends.
    pub new_path: Option<PathBuf>,
    pub kind: FsEventType,
}
