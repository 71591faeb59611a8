//! Descriptor buffers exchanged with the foreign loop's query/check stages.

use std::os::fd::RawFd;

/// There is data to read.
pub const POLL_IN: i16 = libc::POLLIN;
/// There is urgent data to read.
pub const POLL_PRI: i16 = libc::POLLPRI;
/// Writing is possible without blocking.
pub const POLL_OUT: i16 = libc::POLLOUT;
/// Error condition (returned only).
pub const POLL_ERR: i16 = libc::POLLERR;
/// Hung up (returned only).
pub const POLL_HUP: i16 = libc::POLLHUP;
/// Invalid descriptor (returned only).
pub const POLL_NVAL: i16 = libc::POLLNVAL;

/// Capacity the query buffer starts with.
pub const DEFAULT_POLL_CAPACITY: usize = 16;

/// A descriptor the foreign loop wants polled.
///
/// Layout-compatible with `struct pollfd` so a slice of these can be handed
/// straight to `poll(2)`. `revents` is written only by the poll primitive.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollDescriptor {
    /// File descriptor, or a negative value for an entry poll ignores.
    pub fd: RawFd,
    /// Requested events.
    pub events: i16,
    /// Returned events.
    pub revents: i16,
}

const _: () = assert!(
    std::mem::size_of::<PollDescriptor>() == std::mem::size_of::<libc::pollfd>()
);

impl PollDescriptor {
    /// Create a descriptor with no returned events.
    pub fn new(fd: RawFd, events: i16) -> Self {
        Self {
            fd,
            events,
            revents: 0,
        }
    }

    /// Entry with `fd == -1`, which poll skips.
    pub fn is_placeholder(&self) -> bool {
        self.fd == -1
    }

    /// Same descriptor and same requested events; returned events ignored.
    pub fn same_request(&self, other: &PollDescriptor) -> bool {
        self.fd == other.fd && self.events == other.events
    }
}

/// Compare two descriptor sets by (fd, events) pairs, in order.
pub fn requests_equal(a: &[PollDescriptor], b: &[PollDescriptor]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_request(y))
}

/// Resizable descriptor buffer with a logical length.
///
/// The whole capacity is exposed to the foreign loop's `query`, which
/// reports how many entries it needs; `len` is what it actually filled.
#[derive(Debug, Clone)]
pub struct PollSet {
    fds: Vec<PollDescriptor>,
    len: usize,
}

impl PollSet {
    /// Create an empty set able to hold `capacity` descriptors.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fds: vec![PollDescriptor::default(); capacity.max(1)],
            len: 0,
        }
    }

    /// Create a set holding exactly these descriptors.
    pub fn from_descriptors(descriptors: &[PollDescriptor]) -> Self {
        let mut set = Self::with_capacity(descriptors.len());
        set.fds[..descriptors.len()].copy_from_slice(descriptors);
        set.len = descriptors.len();
        set
    }

    /// Number of descriptors the buffer can hold without growing.
    pub fn capacity(&self) -> usize {
        self.fds.len()
    }

    /// Logical number of descriptors.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the set holds no descriptors.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The filled part of the buffer.
    pub fn as_slice(&self) -> &[PollDescriptor] {
        &self.fds[..self.len]
    }

    /// The filled part of the buffer, mutably (for poll results).
    pub fn as_mut_slice(&mut self) -> &mut [PollDescriptor] {
        &mut self.fds[..self.len]
    }

    /// The entire allocated buffer, for `query` to fill.
    pub(crate) fn buffer_mut(&mut self) -> &mut [PollDescriptor] {
        &mut self.fds
    }

    /// Set the logical length after a query.
    ///
    /// Panics if `len` exceeds the capacity.
    pub(crate) fn set_len(&mut self, len: usize) {
        assert!(
            len <= self.fds.len(),
            "PollSet length {} exceeds capacity {}",
            len,
            self.fds.len()
        );
        self.len = len;
    }

    /// Grow so at least `required` descriptors fit.
    ///
    /// Capacity at least doubles on each growth. Contents are not preserved
    /// since the caller re-queries into the new buffer.
    pub(crate) fn grow_to(&mut self, required: usize) {
        if required <= self.fds.len() {
            return;
        }
        let capacity = required.max(self.fds.len() * 2);
        self.fds = vec![PollDescriptor::default(); capacity];
        self.len = 0;
    }

    /// Whether both sets request the same (fd, events) pairs in order.
    pub fn equals(&self, other: &PollSet) -> bool {
        requests_equal(self.as_slice(), other.as_slice())
    }

    /// Number of descriptors with returned events.
    pub fn ready_count(&self) -> usize {
        self.as_slice().iter().filter(|fd| fd.revents != 0).count()
    }

    /// Reset every returned-events field.
    pub fn clear_revents(&mut self) {
        for fd in self.as_mut_slice() {
            fd.revents = 0;
        }
    }
}

impl Default for PollSet {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_POLL_CAPACITY)
    }
}

#[cfg(test)]
#[path = "poll_set_tests.rs"]
mod tests;
