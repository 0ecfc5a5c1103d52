//! # camrift-backend
//!
//! The capture-backend contract the interception shim depends on, plus a
//! synthetic camera implementing it.
//!
//! A backend enumerates cameras and opens sessions. A session is the backend
//! half of one emulated device descriptor: a single generic control entry
//! point (the device's ioctl surface) and a buffer map/unmap pair.

pub mod notify;
pub mod synthetic;
pub mod v4l2;

use libc::{c_int, c_void};
use thiserror::Error;

pub use notify::ReadyNotifier;
pub use synthetic::SyntheticBackend;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("unsupported control command {0:#x}")]
    Unsupported(u64),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("bad address")]
    BadAddress,
    #[error("no such camera: {0}")]
    NoDevice(String),
    #[error("camera busy")]
    Busy,
    #[error("permission denied")]
    PermissionDenied,
    #[error("operation would block")]
    WouldBlock,
    #[error("out of memory")]
    OutOfMemory,
    #[error("session closed")]
    Closed,
    #[error("os error {0}")]
    Os(i32),
}

impl BackendError {
    /// POSIX error a real device driver would report for this condition.
    pub fn errno(&self) -> c_int {
        match self {
            BackendError::Unsupported(_) => libc::ENOTTY,
            BackendError::InvalidArgument(_) => libc::EINVAL,
            BackendError::BadAddress => libc::EFAULT,
            BackendError::NoDevice(_) => libc::ENODEV,
            BackendError::Busy => libc::EBUSY,
            BackendError::PermissionDenied => libc::EACCES,
            BackendError::WouldBlock => libc::EAGAIN,
            BackendError::OutOfMemory => libc::ENOMEM,
            BackendError::Closed => libc::EBADF,
            BackendError::Os(errno) => *errno,
        }
    }
}

impl From<nix::errno::Errno> for BackendError {
    fn from(e: nix::errno::Errno) -> Self {
        BackendError::Os(e as i32)
    }
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        BackendError::Os(e.raw_os_error().unwrap_or(libc::EIO))
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// A camera the backend can open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    pub id: String,
    pub name: String,
    pub width: u32,
    pub height: u32,
}

/// Access mode requested by the caller (`O_ACCMODE` bits)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    #[default]
    ReadWrite,
}

impl Access {
    pub fn can_write(self) -> bool {
        matches!(self, Access::WriteOnly | Access::ReadWrite)
    }
}

/// Session options derived from the caller's open flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// `O_NONBLOCK`: waits that would block fail with `WouldBlock`
    pub nonblocking: bool,
    pub access: Access,
}

impl OpenOptions {
    pub fn from_flags(flags: c_int) -> Self {
        let access = match flags & libc::O_ACCMODE {
            libc::O_RDONLY => Access::ReadOnly,
            libc::O_WRONLY => Access::WriteOnly,
            _ => Access::ReadWrite,
        };
        Self {
            nonblocking: flags & libc::O_NONBLOCK != 0,
            access,
        }
    }
}

/// An mmap request against a session, as received from the caller.
#[derive(Debug, Clone, Copy)]
pub struct MapRequest {
    /// Placement hint (or fixed address with `MAP_FIXED`)
    pub addr: usize,
    pub length: usize,
    pub prot: c_int,
    pub flags: c_int,
    pub offset: i64,
}

/// A backend buffer mapped into the caller's address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedBuffer {
    pub addr: usize,
    pub length: usize,
    pub index: u32,
}

impl MappedBuffer {
    pub fn as_ptr(&self) -> *mut c_void {
        self.addr as *mut c_void
    }
}

/// Backend half of one emulated device.
///
/// Implementations synchronize internally: `control` may block (waiting for a
/// frame) while other threads queue buffers on the same session.
pub trait CaptureSession: Send + Sync {
    /// Execute one device-control request.
    ///
    /// # Safety
    /// `arg` is the caller's raw ioctl argument; the implementation interprets
    /// it according to `request` and must treat null as a bad address.
    unsafe fn control(&self, request: u64, arg: *mut c_void) -> Result<c_int>;

    /// Map the buffer selected by `request.offset`.
    fn map(&self, request: &MapRequest) -> Result<MappedBuffer>;

    /// Release a mapping previously returned by `map`.
    fn unmap(&self, buffer: &MappedBuffer) -> Result<()>;

    /// Stop streaming, wake blocked waiters and release the camera.
    /// Called once, when the last descriptor referencing the session closes.
    fn shutdown(&self);
}

/// Camera enumeration and session construction.
pub trait CaptureBackend: Send + Sync {
    fn cameras(&self) -> Vec<CameraInfo>;

    /// Open a session on `camera`. The session reports through `notifier`
    /// whether a buffer is ready to be dequeued.
    fn open(
        &self,
        camera: &str,
        options: OpenOptions,
        notifier: ReadyNotifier,
    ) -> Result<Box<dyn CaptureSession>>;
}
