use super::fail;
use crate::reals;
use crate::registry::{Descriptor, Registry};
use camrift_config::log_shim_trace;
use libc::{c_int, c_ulong, c_void};

pub unsafe fn dup_impl(registry: &Registry, fd: c_int) -> c_int {
    match registry.dup(fd) {
        Some(Ok(new_fd)) => new_fd,
        Some(Err(e)) => fail(e, -1),
        None => {
            let new_fd = reals::dup(fd);
            if new_fd >= 0 {
                registry.forget_stale(new_fd);
            }
            new_fd
        }
    }
}

pub unsafe fn close_impl(registry: &Registry, fd: c_int) -> c_int {
    match registry.close(fd) {
        Some(Ok(rc)) => rc,
        Some(Err(e)) => fail(e, -1),
        None => reals::close(fd),
    }
}

/// `arg` is the single pointer-sized argument, forwarded untouched.
pub unsafe fn ioctl_impl(registry: &Registry, fd: c_int, request: c_ulong, arg: *mut c_void) -> c_int {
    let adapter = match registry.lookup(fd) {
        Descriptor::Real => return reals::ioctl(fd, request, arg),
        Descriptor::Emulated(adapter) => adapter,
    };

    match adapter.handle_control(request, arg) {
        Ok(rc) => rc,
        Err(e) => {
            log_shim_trace!(
                fd,
                request,
                camera = adapter.camera(),
                error = %e,
                "emulated ioctl failed"
            );
            fail(e, -1)
        }
    }
}

#[cfg(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64"),
    not(test)
))]
mod exports {
    use super::{close_impl, dup_impl, ioctl_impl};
    use crate::reals;
    use crate::state::{ShimGuard, ShimState};
    use libc::{c_int, c_ulong, c_void};

    // Until an open builds the shared state no descriptor can be emulated.

    #[no_mangle]
    pub unsafe extern "C" fn dup(fd: c_int) -> c_int {
        let Some(_guard) = ShimGuard::enter() else {
            return reals::dup(fd);
        };
        match ShimState::try_get() {
            Some(state) => dup_impl(&state.registry, fd),
            None => reals::dup(fd),
        }
    }

    #[no_mangle]
    pub unsafe extern "C" fn close(fd: c_int) -> c_int {
        let Some(_guard) = ShimGuard::enter() else {
            return reals::close(fd);
        };
        match ShimState::try_get() {
            Some(state) => close_impl(&state.registry, fd),
            None => reals::close(fd),
        }
    }

    /// glibc declares `ioctl(int, unsigned long, ...)`; every request takes
    /// at most one pointer-sized argument.
    #[no_mangle]
    pub unsafe extern "C" fn ioctl(fd: c_int, request: c_ulong, arg: *mut c_void) -> c_int {
        let Some(_guard) = ShimGuard::enter() else {
            return reals::ioctl(fd, request, arg);
        };
        match ShimState::try_get() {
            Some(state) => ioctl_impl(&state.registry, fd, request, arg),
            None => reals::ioctl(fd, request, arg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DeviceFixture, FakeBackend};

    fn last_errno() -> c_int {
        std::io::Error::last_os_error().raw_os_error().unwrap()
    }

    #[test]
    fn test_ioctl_on_unknown_descriptor() {
        let fx = DeviceFixture::new();
        let mut arg = 0u32;
        let rc = unsafe {
            ioctl_impl(&fx.registry, 987654, FakeBackend::ECHO, &mut arg as *mut u32 as *mut c_void)
        };
        assert_eq!(rc, -1);
        assert_eq!(last_errno(), libc::EBADF);
    }

    #[test]
    fn test_ioctl_dispatch() {
        let fx = DeviceFixture::new();
        let fd = fx.open();
        let mut arg = 0u32;
        let argp = &mut arg as *mut u32 as *mut c_void;

        assert_eq!(unsafe { ioctl_impl(&fx.registry, fd, FakeBackend::ECHO, argp) }, 0);
        assert_eq!(arg, FakeBackend::ECHO as u32);

        assert_eq!(unsafe { ioctl_impl(&fx.registry, fd, 0x9999, argp) }, -1);
        assert_eq!(last_errno(), libc::ENOTTY);

        assert_eq!(unsafe { close_impl(&fx.registry, fd) }, 0);
    }

    #[test]
    fn test_ioctl_real_descriptor_relays() {
        let fx = DeviceFixture::new();
        let file = std::fs::File::open(&fx.node).unwrap();
        let mut pending: c_int = -1;
        let rc = unsafe {
            ioctl_impl(
                &fx.registry,
                std::os::fd::AsRawFd::as_raw_fd(&file),
                libc::FIONREAD,
                &mut pending as *mut c_int as *mut c_void,
            )
        };
        assert_eq!(rc, 0);
        assert_eq!(pending, 0);
    }

    #[test]
    fn test_dup_close_scenario() {
        let fx = DeviceFixture::new();
        let fd = fx.open();
        let dup = unsafe { dup_impl(&fx.registry, fd) };
        assert!(dup >= 0 && dup != fd);

        assert_eq!(unsafe { close_impl(&fx.registry, fd) }, 0);
        assert_eq!(fx.backend.shutdowns(), 0);

        let mut arg = 0u32;
        let argp = &mut arg as *mut u32 as *mut c_void;
        assert_eq!(unsafe { ioctl_impl(&fx.registry, dup, FakeBackend::ECHO, argp) }, 0);

        assert_eq!(unsafe { close_impl(&fx.registry, dup) }, 0);
        assert_eq!(fx.backend.shutdowns(), 1);

        // numbers may be reused by parallel tests, only check we no longer dispatch
        assert!(matches!(fx.registry.lookup(fd), Descriptor::Real));
        assert!(matches!(fx.registry.lookup(dup), Descriptor::Real));
    }

    #[test]
    fn test_real_dup_close() {
        let fx = DeviceFixture::new();
        let file = std::fs::File::open(&fx.node).unwrap();
        let fd = std::os::fd::AsRawFd::as_raw_fd(&file);

        let dup = unsafe { dup_impl(&fx.registry, fd) };
        assert!(dup >= 0);
        assert!(matches!(fx.registry.lookup(dup), Descriptor::Real));
        assert_eq!(unsafe { close_impl(&fx.registry, dup) }, 0);
    }
}
