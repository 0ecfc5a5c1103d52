//! Process-wide shim state and the per-thread re-entrancy guard.

use crate::registry::Registry;
use camrift_backend::SyntheticBackend;
use camrift_config::logging::init_logging;
use camrift_config::{log_config_error, log_shim_info, Config};
use libc::c_int;
use once_cell::sync::OnceCell;
use std::cell::Cell;

thread_local! {
    static IN_SHIM: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as executing shim code.
///
/// `enter` returns `None` when the thread is already inside the shim (the call
/// came from our own logging, config loading or backend work) or when
/// thread-local storage is unavailable (thread teardown). Callers then relay
/// straight to the OS.
pub(crate) struct ShimGuard(());

impl ShimGuard {
    pub(crate) fn enter() -> Option<Self> {
        IN_SHIM
            .try_with(|active| {
                if active.replace(true) {
                    None
                } else {
                    Some(ShimGuard(()))
                }
            })
            .ok()
            .flatten()
    }
}

impl Drop for ShimGuard {
    fn drop(&mut self) {
        let _ = IN_SHIM.try_with(|active| active.set(false));
    }
}

static SHIM_STATE: OnceCell<ShimState> = OnceCell::new();

pub struct ShimState {
    pub registry: Registry,
}

impl ShimState {
    /// Shared state, built on the first intercepted call.
    ///
    /// Must be called with a `ShimGuard` held so the file and memory
    /// operations performed during initialization relay to the OS.
    pub fn get() -> &'static ShimState {
        SHIM_STATE.get_or_init(ShimState::init)
    }

    /// Shared state if some earlier call built it. Until then nothing is
    /// emulated, so descriptor-based calls can relay without initializing.
    pub fn try_get() -> Option<&'static ShimState> {
        SHIM_STATE.get()
    }

    fn init() -> Self {
        let (config, load_error) = match Config::load() {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        };
        init_logging(&config.logging);
        if let Some(e) = load_error {
            log_config_error!(error = %e, "failed to load configuration, using defaults");
        }

        let backend = SyntheticBackend::from_config(&config);
        let registry = Registry::new(&config.devices, Box::new(backend));
        log_shim_info!(
            devices = config.devices.len(),
            cameras = config.cameras.len(),
            "camrift shim initialized"
        );
        Self { registry }
    }
}

pub fn set_errno(e: c_int) {
    // SAFETY: __errno_location always returns the calling thread's errno slot
    unsafe { *libc::__errno_location() = e };
}
