//! Real symbol storage.
//!
//! Every intercepted entry point relays to the next definition of its own
//! name, resolved lazily with `dlsym(RTLD_NEXT)`. The helpers here are the
//! only way the shim reaches the OS for intercepted operations, so calls made
//! from inside the shim never loop back into it.

use crate::state::set_errno;
use libc::{c_char, c_int, c_ulong, c_void, mode_t, off_t, size_t};
use std::sync::atomic::{AtomicPtr, Ordering};

/// Lazily resolved pointer to the next definition of `name`
pub struct RealSymbol {
    ptr: AtomicPtr<c_void>,
    name: &'static str,
}

impl RealSymbol {
    /// `name` must carry a trailing NUL.
    pub const fn new(name: &'static str) -> Self {
        Self {
            ptr: AtomicPtr::new(std::ptr::null_mut()),
            name,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name.trim_end_matches('\0')
    }

    /// Resolve the symbol, caching the result. Null when nothing follows us.
    pub unsafe fn get(&self) -> *mut c_void {
        let p = self.ptr.load(Ordering::Acquire);
        if !p.is_null() {
            return p;
        }
        let f = libc::dlsym(libc::RTLD_NEXT, self.name.as_ptr() as *const c_char);
        self.ptr.store(f, Ordering::Release);
        f
    }
}

pub static REAL_OPEN: RealSymbol = RealSymbol::new("open\0");
pub static REAL_OPEN64: RealSymbol = RealSymbol::new("open64\0");
pub static REAL_OPEN_2: RealSymbol = RealSymbol::new("__open_2\0");
pub static REAL_OPEN64_2: RealSymbol = RealSymbol::new("__open64_2\0");
pub static REAL_OPENAT: RealSymbol = RealSymbol::new("openat\0");
pub static REAL_OPENAT64: RealSymbol = RealSymbol::new("openat64\0");
pub static REAL_OPENAT_2: RealSymbol = RealSymbol::new("__openat_2\0");
pub static REAL_OPENAT64_2: RealSymbol = RealSymbol::new("__openat64_2\0");
pub static REAL_DUP: RealSymbol = RealSymbol::new("dup\0");
pub static REAL_CLOSE: RealSymbol = RealSymbol::new("close\0");
pub static REAL_MMAP: RealSymbol = RealSymbol::new("mmap\0");
pub static REAL_MMAP64: RealSymbol = RealSymbol::new("mmap64\0");
pub static REAL_MUNMAP: RealSymbol = RealSymbol::new("munmap\0");
pub static REAL_IOCTL: RealSymbol = RealSymbol::new("ioctl\0");

type OpenFn = unsafe extern "C" fn(*const c_char, c_int, ...) -> c_int;
type OpenatFn = unsafe extern "C" fn(c_int, *const c_char, c_int, ...) -> c_int;
type DupFn = unsafe extern "C" fn(c_int) -> c_int;
type CloseFn = unsafe extern "C" fn(c_int) -> c_int;
type MmapFn = unsafe extern "C" fn(*mut c_void, size_t, c_int, c_int, c_int, off_t) -> *mut c_void;
type MunmapFn = unsafe extern "C" fn(*mut c_void, size_t) -> c_int;
type IoctlFn = unsafe extern "C" fn(c_int, c_ulong, ...) -> c_int;

macro_rules! resolve_or {
    ($sym:expr, $ty:ty, $fail:expr) => {{
        let p = $sym.get();
        if p.is_null() {
            set_errno(libc::ENOSYS);
            return $fail;
        }
        std::mem::transmute::<*mut c_void, $ty>(p)
    }};
}

/// Relay an `open`-style call. The mode is forwarded only when present.
pub unsafe fn open(sym: &RealSymbol, path: *const c_char, flags: c_int, mode: Option<mode_t>) -> c_int {
    let real = resolve_or!(sym, OpenFn, -1);
    match mode {
        Some(mode) => real(path, flags, mode),
        None => real(path, flags),
    }
}

/// Relay an `openat`-style call. The mode is forwarded only when present.
pub unsafe fn openat(
    sym: &RealSymbol,
    dirfd: c_int,
    path: *const c_char,
    flags: c_int,
    mode: Option<mode_t>,
) -> c_int {
    let real = resolve_or!(sym, OpenatFn, -1);
    match mode {
        Some(mode) => real(dirfd, path, flags, mode),
        None => real(dirfd, path, flags),
    }
}

pub unsafe fn dup(fd: c_int) -> c_int {
    let real = resolve_or!(REAL_DUP, DupFn, -1);
    real(fd)
}

pub unsafe fn close(fd: c_int) -> c_int {
    let real = resolve_or!(REAL_CLOSE, CloseFn, -1);
    real(fd)
}

/// `mmap` and `mmap64` share a signature on 64-bit targets.
pub unsafe fn mmap(
    sym: &RealSymbol,
    addr: *mut c_void,
    len: size_t,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    offset: off_t,
) -> *mut c_void {
    let real = resolve_or!(sym, MmapFn, libc::MAP_FAILED);
    real(addr, len, prot, flags, fd, offset)
}

pub unsafe fn munmap(addr: *mut c_void, len: size_t) -> c_int {
    let real = resolve_or!(REAL_MUNMAP, MunmapFn, -1);
    real(addr, len)
}

pub unsafe fn ioctl(fd: c_int, request: c_ulong, arg: *mut c_void) -> c_int {
    let real = resolve_or!(REAL_IOCTL, IoctlFn, -1);
    real(fd, request, arg)
}
