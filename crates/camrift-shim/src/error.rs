use camrift_backend::BackendError;
use libc::c_int;
use thiserror::Error;

/// Failure of an emulated operation, reported to the caller as `-1` plus errno.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShimError {
    #[error("descriptor does not refer to a live device")]
    BadDescriptor,
    #[error("device is not a directory")]
    NotDirectory,
    #[error("range is only part of a mapped buffer")]
    PartialUnmap,
    #[error("range overlaps a mapped buffer")]
    Overlap,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("os error {0}")]
    Os(c_int),
}

impl ShimError {
    pub fn errno(&self) -> c_int {
        match self {
            ShimError::BadDescriptor => libc::EBADF,
            ShimError::NotDirectory => libc::ENOTDIR,
            ShimError::PartialUnmap | ShimError::Overlap => libc::EINVAL,
            ShimError::Backend(e) => e.errno(),
            ShimError::Os(errno) => *errno,
        }
    }

    /// Capture the calling thread's current errno.
    pub fn last_os_error() -> Self {
        ShimError::Os(
            std::io::Error::last_os_error()
                .raw_os_error()
                .unwrap_or(libc::EIO),
        )
    }
}

pub type Result<T> = std::result::Result<T, ShimError>;
