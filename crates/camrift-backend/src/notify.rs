//! Readiness signalling through the emulated descriptor.

use camrift_config::log_backend_warn;
use libc::c_void;
use std::os::fd::{AsRawFd, OwnedFd};

/// Mirrors "a buffer can be dequeued" onto the eventfd behind an emulated
/// descriptor, so `poll`/`select` on that descriptor wake up.
///
/// The eventfd counter is held at 0 or 1. Callers serialize `set` under the
/// session lock.
#[derive(Debug, Default)]
pub struct ReadyNotifier {
    fd: Option<OwnedFd>,
    ready: bool,
}

impl ReadyNotifier {
    /// `fd` refers to the same eventfd the caller polls.
    pub fn new(fd: OwnedFd) -> Self {
        Self {
            fd: Some(fd),
            ready: false,
        }
    }

    /// A notifier with no descriptor behind it.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn set(&mut self, ready: bool) {
        if ready == self.ready {
            return;
        }
        let Some(fd) = self.fd.as_ref().map(AsRawFd::as_raw_fd) else {
            self.ready = ready;
            return;
        };

        if ready {
            let one: u64 = 1;
            // SAFETY: 8 byte write from a live u64 to an eventfd we hold open
            let rc = unsafe { libc::write(fd, &one as *const u64 as *const c_void, 8) };
            if rc != 8 {
                log_backend_warn!(
                    error = %std::io::Error::last_os_error(),
                    "ready notification failed"
                );
                return;
            }
        } else {
            // the counter may already have been consumed by a read on the
            // caller's side; a blocking eventfd would then hang the read
            let mut pfd = libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            };
            // SAFETY: one valid pollfd, zero timeout
            if unsafe { libc::poll(&mut pfd, 1, 0) } == 1 {
                let mut value: u64 = 0;
                // SAFETY: 8 byte read into a live u64
                unsafe { libc::read(fd, &mut value as *mut u64 as *mut c_void, 8) };
            }
        }
        self.ready = ready;
    }
}
