//! # camrift-shim
//!
//! LD_PRELOAD interception layer that makes configured device paths behave
//! like V4L2 capture devices backed by a `camrift-backend` session.
//!
//! Every exported entry point classifies its descriptor (or path), then either
//! relays to the next definition of the same symbol (`dlsym(RTLD_NEXT)`) or
//! dispatches to the emulated device. Paths that are not configured devices
//! behave exactly as without the shim.
//!
//! The exports are only compiled for Linux x86_64/aarch64, where the variadic
//! tails of `open`/`openat`/`ioctl` can be received as fixed parameters, and
//! never into the unit-test binary.

// Allow unsafe FFI functions without safety docs - these are C ABI entry points
#![allow(clippy::missing_safety_doc)]

pub mod adapter;
pub mod error;
pub mod mapping;
pub mod path;
pub mod reals;
pub mod registry;
pub mod state;
pub mod syscalls;

#[cfg(test)]
mod testing;

pub use error::{Result, ShimError};
