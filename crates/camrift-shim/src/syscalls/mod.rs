//! Intercepted entry points.
//!
//! Each file holds the dispatch logic for a family of calls (taking the
//! registry explicitly, so it runs in unit tests) and, for supported targets
//! outside tests, the `#[no_mangle]` exports that feed it.

pub mod io;
pub mod mmap;
pub mod open;

use crate::error::ShimError;
use crate::state::set_errno;

/// Report `err` through errno and return the call's failure value.
pub(crate) fn fail<T>(err: ShimError, ret: T) -> T {
    set_errno(err.errno());
    ret
}
