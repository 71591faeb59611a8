//! The blocking multiplexed wait primitive.

use tracing::trace;

use crate::poll_set::PollDescriptor;

/// A multiplexed wait over a descriptor set.
///
/// Negative timeout blocks indefinitely, zero polls and returns
/// immediately. Returns the number of descriptors with returned events,
/// or a negative value on error. Called from both the main thread and the
/// select thread, so implementations must be thread-safe.
pub trait PollFunc: Send + Sync {
    fn poll(&self, fds: &mut [PollDescriptor], timeout_ms: i32) -> i32;
}

/// `poll(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPoll;

impl PollFunc for SystemPoll {
    fn poll(&self, fds: &mut [PollDescriptor], timeout_ms: i32) -> i32 {
        // SAFETY: PollDescriptor is #[repr(C)] with the same layout as pollfd.
        let rc = unsafe {
            libc::poll(
                fds.as_mut_ptr() as *mut libc::pollfd,
                fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if rc < 0 {
            trace!(
                "SystemPoll: poll over {} descriptors failed: {}",
                fds.len(),
                std::io::Error::last_os_error()
            );
        }
        rc
    }
}
