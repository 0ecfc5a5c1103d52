//! Test doubles for the capture backend and a registry wired to them.

use crate::registry::{Classification, Descriptor, Registry};
use camrift_backend::{
    BackendError, CameraInfo, CaptureBackend, CaptureSession, MapRequest, MappedBuffer,
    OpenOptions, ReadyNotifier, Result,
};
use camrift_config::testing::TestEnvironment;
use camrift_config::DeviceConfig;
use libc::{c_int, c_ulong, c_void};
use std::ffi::CString;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Backend whose sessions count shutdowns and map anonymous memory.
#[derive(Clone, Default)]
pub(crate) struct FakeBackend {
    opens: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
    unmaps: Arc<AtomicUsize>,
    fail_open: Arc<Mutex<Option<BackendError>>>,
    alias_map: Arc<Mutex<Option<usize>>>,
}

impl FakeBackend {
    /// Writes the request code into the `u32` argument.
    pub const ECHO: c_ulong = 0x1234;
    /// Blocks until the session shuts down.
    pub const BLOCK: c_ulong = 0x4321;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_open(&self, err: BackendError) {
        *self.fail_open.lock().unwrap() = Some(err);
    }

    /// The next `map` reports `addr` instead of mapping fresh memory.
    pub fn alias_next_map(&self, addr: usize) {
        *self.alias_map.lock().unwrap() = Some(addr);
    }

    pub fn unmaps(&self) -> usize {
        self.unmaps.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl CaptureBackend for FakeBackend {
    fn cameras(&self) -> Vec<CameraInfo> {
        vec![CameraInfo {
            id: "fake".into(),
            name: "Fake Camera".into(),
            width: 64,
            height: 48,
        }]
    }

    fn open(
        &self,
        _camera: &str,
        _options: OpenOptions,
        _notifier: ReadyNotifier,
    ) -> Result<Box<dyn CaptureSession>> {
        if let Some(err) = self.fail_open.lock().unwrap().take() {
            return Err(err);
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            shutdowns: self.shutdowns.clone(),
            unmaps: self.unmaps.clone(),
            alias_map: self.alias_map.clone(),
            closed: Mutex::new(false),
            wakeup: Condvar::new(),
        }))
    }
}

struct FakeSession {
    shutdowns: Arc<AtomicUsize>,
    unmaps: Arc<AtomicUsize>,
    alias_map: Arc<Mutex<Option<usize>>>,
    closed: Mutex<bool>,
    wakeup: Condvar,
}

impl CaptureSession for FakeSession {
    unsafe fn control(&self, request: u64, arg: *mut c_void) -> Result<c_int> {
        match request as c_ulong {
            FakeBackend::ECHO => {
                *(arg as *mut u32) = request as u32;
                Ok(0)
            }
            FakeBackend::BLOCK => {
                let mut closed = self.closed.lock().unwrap();
                while !*closed {
                    closed = self.wakeup.wait(closed).unwrap();
                }
                Err(BackendError::Closed)
            }
            _ => Err(BackendError::Unsupported(request)),
        }
    }

    fn map(&self, request: &MapRequest) -> Result<MappedBuffer> {
        let index = (request.offset / 4096) as u32;
        if let Some(addr) = self.alias_map.lock().unwrap().take() {
            return Ok(MappedBuffer {
                addr,
                length: request.length,
                index,
            });
        }
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                request.length,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(MappedBuffer {
            addr: addr as usize,
            length: request.length,
            index,
        })
    }

    fn unmap(&self, buffer: &MappedBuffer) -> Result<()> {
        self.unmaps.fetch_add(1, Ordering::SeqCst);
        if unsafe { libc::munmap(buffer.as_ptr(), buffer.length) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn shutdown(&self) {
        *self.closed.lock().unwrap() = true;
        self.wakeup.notify_all();
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// A registry with one emulated device node, backed by a `FakeBackend`.
pub(crate) struct DeviceFixture {
    pub env: TestEnvironment,
    pub node: PathBuf,
    pub backend: FakeBackend,
    pub registry: Registry,
}

impl DeviceFixture {
    pub fn new() -> Self {
        let env = TestEnvironment::new().unwrap();
        let node = env.create_node("video0").unwrap();
        let backend = FakeBackend::new();
        let devices = [DeviceConfig {
            path: node.clone(),
            camera: "fake".into(),
        }];
        let registry = Registry::new(&devices, Box::new(backend.clone()));
        Self {
            env,
            node,
            backend,
            registry,
        }
    }

    pub fn node_cstr(&self) -> CString {
        CString::new(self.node.to_str().unwrap()).unwrap()
    }

    /// Open the device through the registry.
    pub fn open(&self) -> c_int {
        let target = match self
            .registry
            .classify(libc::AT_FDCWD, Some(&self.node_cstr()), libc::O_RDWR)
        {
            Classification::Emulated(target) => target,
            Classification::Real => panic!("device not classified as emulated"),
        };
        self.registry.open_emulated(&target, libc::O_RDWR).unwrap()
    }

    /// Map one page through `fd` and track it.
    pub fn map(&self, fd: c_int) -> MappedBuffer {
        let Descriptor::Emulated(adapter) = self.registry.lookup(fd) else {
            panic!("fd {} is not emulated", fd);
        };
        let buffer = adapter
            .map_buffer(&MapRequest {
                addr: 0,
                length: 4096,
                prot: libc::PROT_READ,
                flags: libc::MAP_SHARED,
                offset: 0,
            })
            .unwrap();
        self.registry.record_mapping(&adapter, buffer).unwrap();
        buffer
    }
}
