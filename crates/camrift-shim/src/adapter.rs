//! Device adapter: the emulated half of an open device.
//!
//! One adapter exists per successful emulated `open`. Descriptors created by
//! `dup` share it; the registry tears it down when the last one closes.

use crate::error::{Result, ShimError};
use camrift_backend::{CaptureSession, MapRequest, MappedBuffer};
use libc::{c_int, c_ulong, c_void};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub struct DeviceAdapter {
    id: u64,
    path: PathBuf,
    camera: String,
    session: Box<dyn CaptureSession>,
    refs: AtomicUsize,
    live: AtomicBool,
}

impl DeviceAdapter {
    /// New adapter holding one reference.
    pub fn new(id: u64, path: PathBuf, camera: String, session: Box<dyn CaptureSession>) -> Self {
        Self {
            id,
            path,
            camera,
            session,
            refs: AtomicUsize::new(1),
            live: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn camera(&self) -> &str {
        &self.camera
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Forward a control request to the session. The command code is opaque
    /// here; the session decides what it means and whether it blocks.
    pub unsafe fn handle_control(&self, request: c_ulong, arg: *mut c_void) -> Result<c_int> {
        if !self.is_live() {
            return Err(ShimError::BadDescriptor);
        }
        Ok(self.session.control(request as u64, arg)?)
    }

    pub fn map_buffer(&self, request: &MapRequest) -> Result<MappedBuffer> {
        if !self.is_live() {
            return Err(ShimError::BadDescriptor);
        }
        Ok(self.session.map(request)?)
    }

    pub fn unmap_buffer(&self, buffer: &MappedBuffer) -> Result<()> {
        Ok(self.session.unmap(buffer)?)
    }

    pub fn retain(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference; true when it was the last.
    pub fn release(&self) -> bool {
        self.refs.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Shut the session down. Idempotent.
    pub fn teardown(&self) {
        if self.live.swap(false, Ordering::AcqRel) {
            self.session.shutdown();
        }
    }
}

impl std::fmt::Debug for DeviceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceAdapter")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("camera", &self.camera)
            .field("refs", &self.ref_count())
            .field("live", &self.is_live())
            .finish()
    }
}
