//! Self-pipe used to interrupt the select thread's blocking poll.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd::{pipe, read, write};
use tracing::warn;

use crate::error::BridgeResult;
use crate::poll_set::{PollDescriptor, POLL_IN};

/// A pipe whose read end sits at the tail of every set the select thread
/// polls. Writing one byte makes that poll return.
#[derive(Debug)]
pub struct WakeupPipe {
    read_fd: OwnedFd,
    write_fd: OwnedFd,
}

impl WakeupPipe {
    /// Create the pipe with a non-blocking read end.
    pub fn new() -> BridgeResult<Self> {
        let (read_fd, write_fd) = pipe()?;

        let flags = fcntl(read_fd.as_raw_fd(), FcntlArg::F_GETFL)?;
        let flags = OFlag::from_bits_truncate(flags);
        fcntl(read_fd.as_raw_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;

        Ok(Self { read_fd, write_fd })
    }

    /// Read end, for polling.
    pub fn read_fd(&self) -> RawFd {
        self.read_fd.as_raw_fd()
    }

    /// The descriptor appended to every set handed to the select thread.
    pub fn descriptor(&self) -> PollDescriptor {
        PollDescriptor::new(self.read_fd(), POLL_IN)
    }

    /// Write a single byte.
    pub fn notify(&self) -> io::Result<()> {
        write(&self.write_fd, b"A")?;
        Ok(())
    }

    /// Read and discard everything pending. Returns the byte count.
    pub fn drain(&self) -> usize {
        let mut buf = [0u8; 64];
        let mut total = 0;
        loop {
            match read(self.read_fd.as_raw_fd(), &mut buf) {
                Ok(0) => return total,
                Ok(n) => total += n,
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => return total,
                Err(e) => {
                    warn!("WakeupPipe: Failed to drain: {}", e);
                    return total;
                }
            }
        }
    }
}
