use super::fail;
use crate::reals::{self, RealSymbol};
use crate::registry::{Classification, Registry};
use crate::state::{ShimGuard, ShimState};
use camrift_config::{log_shim_debug, log_shim_error};
use libc::{c_char, c_int, mode_t};
use std::ffi::CStr;

/// The open-family entry points, each relaying to its namesake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenCall {
    Open,
    Open64,
    OpenFortified,
    Open64Fortified,
    Openat,
    Openat64,
    OpenatFortified,
    Openat64Fortified,
}

impl OpenCall {
    fn real(self) -> &'static RealSymbol {
        match self {
            OpenCall::Open => &reals::REAL_OPEN,
            OpenCall::Open64 => &reals::REAL_OPEN64,
            OpenCall::OpenFortified => &reals::REAL_OPEN_2,
            OpenCall::Open64Fortified => &reals::REAL_OPEN64_2,
            OpenCall::Openat => &reals::REAL_OPENAT,
            OpenCall::Openat64 => &reals::REAL_OPENAT64,
            OpenCall::OpenatFortified => &reals::REAL_OPENAT_2,
            OpenCall::Openat64Fortified => &reals::REAL_OPENAT64_2,
        }
    }

    pub fn name(self) -> &'static str {
        self.real().name()
    }

    /// `__*_2` variants: the caller promised no mode is needed.
    pub fn is_fortified(self) -> bool {
        matches!(
            self,
            OpenCall::OpenFortified
                | OpenCall::Open64Fortified
                | OpenCall::OpenatFortified
                | OpenCall::Openat64Fortified
        )
    }

    fn takes_dirfd(self) -> bool {
        matches!(
            self,
            OpenCall::Openat
                | OpenCall::Openat64
                | OpenCall::OpenatFortified
                | OpenCall::Openat64Fortified
        )
    }

    /// Relay unchanged. `dirfd` is ignored by the non-`at` variants.
    pub unsafe fn relay(
        self,
        dirfd: c_int,
        path: *const c_char,
        flags: c_int,
        mode: Option<mode_t>,
    ) -> c_int {
        if self.takes_dirfd() {
            reals::openat(self.real(), dirfd, path, flags, mode)
        } else {
            reals::open(self.real(), path, flags, mode)
        }
    }
}

/// Whether `flags` make the kernel read a mode argument.
pub fn needs_mode(flags: c_int) -> bool {
    flags & libc::O_CREAT != 0 || flags & libc::O_TMPFILE == libc::O_TMPFILE
}

/// The mode to forward: the variadic argument only exists when the flags
/// call for it.
pub fn mode_arg(flags: c_int, mode: mode_t) -> Option<mode_t> {
    needs_mode(flags).then_some(mode)
}

/// Classify, then open the emulated device or relay.
pub unsafe fn open_impl(
    registry: &Registry,
    call: OpenCall,
    dirfd: c_int,
    path: *const c_char,
    flags: c_int,
    mode: Option<mode_t>,
) -> c_int {
    let cpath = (!path.is_null()).then(|| CStr::from_ptr(path));
    let dirfd = if call.takes_dirfd() {
        dirfd
    } else {
        libc::AT_FDCWD
    };

    match registry.classify(dirfd, cpath, flags) {
        Classification::Real => {
            let fd = call.relay(dirfd, path, flags, mode);
            if fd >= 0 {
                registry.forget_stale(fd);
            }
            fd
        }
        Classification::Emulated(target) => match registry.open_emulated(&target, flags) {
            Ok(fd) => {
                log_shim_debug!(call = call.name(), fd, flags, "emulated open");
                fd
            }
            Err(e) => {
                log_shim_debug!(
                    call = call.name(),
                    path = %target.path.display(),
                    error = %e,
                    "emulated open failed"
                );
                fail(e, -1)
            }
        },
    }
}

/// Common body of every open-family export.
pub(crate) unsafe fn intercept(
    call: OpenCall,
    dirfd: c_int,
    path: *const c_char,
    flags: c_int,
    mode: mode_t,
) -> c_int {
    let mode = mode_arg(flags, mode);
    if call.is_fortified() && mode.is_some() {
        fortify_fail(call, flags);
    }

    let Some(_guard) = ShimGuard::enter() else {
        return call.relay(dirfd, path, flags, mode);
    };
    open_impl(&ShimState::get().registry, call, dirfd, path, flags, mode)
}

/// glibc aborts when a fortified open is asked to create without a mode;
/// so do we.
fn fortify_fail(call: OpenCall, flags: c_int) -> ! {
    if let Some(_guard) = ShimGuard::enter() {
        let _ = ShimState::get();
        log_shim_error!(
            call = call.name(),
            flags,
            "O_CREAT or O_TMPFILE passed without a mode, aborting"
        );
    }
    // SAFETY: terminating the process
    unsafe { libc::abort() }
}

#[cfg(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64"),
    not(test)
))]
mod exports {
    use super::{intercept, OpenCall};
    use libc::{c_char, c_int, mode_t};

    // The trailing `mode` stands in for the variadic argument; it is only
    // read when the flags say the caller passed one.

    #[no_mangle]
    pub unsafe extern "C" fn open(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
        intercept(OpenCall::Open, libc::AT_FDCWD, path, flags, mode)
    }

    #[no_mangle]
    pub unsafe extern "C" fn open64(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
        intercept(OpenCall::Open64, libc::AT_FDCWD, path, flags, mode)
    }

    #[no_mangle]
    pub unsafe extern "C" fn __open_2(path: *const c_char, flags: c_int) -> c_int {
        intercept(OpenCall::OpenFortified, libc::AT_FDCWD, path, flags, 0)
    }

    #[no_mangle]
    pub unsafe extern "C" fn __open64_2(path: *const c_char, flags: c_int) -> c_int {
        intercept(OpenCall::Open64Fortified, libc::AT_FDCWD, path, flags, 0)
    }

    #[no_mangle]
    pub unsafe extern "C" fn openat(
        dirfd: c_int,
        path: *const c_char,
        flags: c_int,
        mode: mode_t,
    ) -> c_int {
        intercept(OpenCall::Openat, dirfd, path, flags, mode)
    }

    #[no_mangle]
    pub unsafe extern "C" fn openat64(
        dirfd: c_int,
        path: *const c_char,
        flags: c_int,
        mode: mode_t,
    ) -> c_int {
        intercept(OpenCall::Openat64, dirfd, path, flags, mode)
    }

    #[no_mangle]
    pub unsafe extern "C" fn __openat_2(dirfd: c_int, path: *const c_char, flags: c_int) -> c_int {
        intercept(OpenCall::OpenatFortified, dirfd, path, flags, 0)
    }

    #[no_mangle]
    pub unsafe extern "C" fn __openat64_2(
        dirfd: c_int,
        path: *const c_char,
        flags: c_int,
    ) -> c_int {
        intercept(OpenCall::Openat64Fortified, dirfd, path, flags, 0)
    }
}
