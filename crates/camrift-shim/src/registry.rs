//! Descriptor registry: the single source of truth for dispatch.
//!
//! Only emulated descriptors are stored. Their numbers come from the OS: each
//! emulated open is backed by a real `eventfd` created with the caller's
//! `O_CLOEXEC` and `O_NONBLOCK`, so numbering, close-on-exec (cleared on
//! `dup`, as for any descriptor) and descriptor limits behave as they would
//! for a real device. The session holds a duplicate of the eventfd and keeps
//! it readable while a buffer can be dequeued, so `poll`/`select` work. A
//! descriptor missing from the table is real.
//!
//! The descriptor table and the mapping tracker share one lock. Adapter work
//! that may block (control requests, buffer mapping, session teardown) runs on
//! a cloned `Arc<DeviceAdapter>` after the lock is released.

use crate::adapter::DeviceAdapter;
use crate::error::{Result, ShimError};
use crate::mapping::{MappingTracker, Resolved};
use crate::path::resolve_at;
use crate::reals;
use camrift_backend::{CaptureBackend, MappedBuffer, OpenOptions, ReadyNotifier};
use camrift_config::path::{normalize_device_path, normalize_lexical};
use camrift_config::{log_registry_debug, log_registry_warn, DeviceConfig};
use libc::c_int;
use std::collections::{HashMap, HashSet};
use std::ffi::CStr;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// What a descriptor refers to
#[derive(Debug, Clone)]
pub enum Descriptor {
    Real,
    Emulated(Arc<DeviceAdapter>),
}

/// A configured device a path resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTarget {
    pub path: PathBuf,
    pub camera: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Real,
    Emulated(DeviceTarget),
}

struct DescriptorEntry {
    adapter: Arc<DeviceAdapter>,
}

#[derive(Default)]
struct Tables {
    descriptors: HashMap<c_int, DescriptorEntry>,
    mappings: MappingTracker,
}

impl Tables {
    /// Remove `fd` and drop its reference. Returns the adapter and whether
    /// that was its last reference (its mappings are then forgotten).
    fn detach(&mut self, fd: c_int) -> Option<(Arc<DeviceAdapter>, bool)> {
        let entry = self.descriptors.remove(&fd)?;
        let last = entry.adapter.release();
        if last {
            self.mappings.forget_adapter(&entry.adapter);
        }
        Some((entry.adapter, last))
    }
}

pub struct Registry {
    devices: HashMap<PathBuf, String>,
    backend: Box<dyn CaptureBackend>,
    tables: Mutex<Tables>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new(devices: &[DeviceConfig], backend: Box<dyn CaptureBackend>) -> Self {
        let cameras: HashSet<String> = backend.cameras().into_iter().map(|c| c.id).collect();
        let devices = devices
            .iter()
            .map(|device| {
                if !cameras.contains(&device.camera) {
                    log_registry_warn!(
                        path = %device.path.display(),
                        camera = device.camera.as_str(),
                        "device bound to a camera the backend does not offer"
                    );
                }
                (normalize_device_path(&device.path), device.camera.clone())
            })
            .collect();

        Self {
            devices,
            backend,
            tables: Mutex::new(Tables::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide whether an open of `path` relative to `dirfd` with `flags`
    /// targets a configured device. Anything that cannot be resolved is real
    /// and the kernel reports on it.
    pub fn classify(&self, dirfd: c_int, path: Option<&CStr>, flags: c_int) -> Classification {
        let Some(path) = path else {
            return Classification::Real;
        };
        if self.devices.is_empty() {
            return Classification::Real;
        }
        let Some(absolute) = resolve_at(dirfd, path) else {
            return Classification::Real;
        };

        let lexical = normalize_lexical(&absolute);
        if let Some(target) = self.target(lexical.clone()) {
            return Classification::Emulated(target);
        }
        // O_NOFOLLOW on a symlink is the kernel's ELOOP to report
        if flags & libc::O_NOFOLLOW != 0
            && lexical
                .symlink_metadata()
                .is_ok_and(|m| m.file_type().is_symlink())
        {
            return Classification::Real;
        }
        // symlinked aliases (/dev/v4l/by-id/...) only match once resolved
        match lexical.canonicalize().ok().and_then(|c| self.target(c)) {
            Some(target) => Classification::Emulated(target),
            None => Classification::Real,
        }
    }

    fn target(&self, path: PathBuf) -> Option<DeviceTarget> {
        let camera = self.devices.get(&path)?.clone();
        Some(DeviceTarget { path, camera })
    }

    /// Open an emulated device and register the new descriptor.
    ///
    /// On failure no entry and no descriptor are left behind.
    pub fn open_emulated(&self, target: &DeviceTarget, flags: c_int) -> Result<c_int> {
        if flags & libc::O_DIRECTORY != 0 {
            return Err(ShimError::NotDirectory);
        }
        if flags & (libc::O_CREAT | libc::O_EXCL) == libc::O_CREAT | libc::O_EXCL {
            return Err(ShimError::Os(libc::EEXIST));
        }

        let options = OpenOptions::from_flags(flags);
        let mut efd_flags = 0;
        if flags & libc::O_CLOEXEC != 0 {
            efd_flags |= libc::EFD_CLOEXEC;
        }
        if options.nonblocking {
            efd_flags |= libc::EFD_NONBLOCK;
        }

        let mut tables = self.lock();
        // SAFETY: plain syscall wrapper
        let fd = unsafe { libc::eventfd(0, efd_flags) };
        if fd < 0 {
            return Err(ShimError::last_os_error());
        }
        // SAFETY: fd was just created and stays open for the borrow
        let notify_fd = match unsafe { BorrowedFd::borrow_raw(fd) }.try_clone_to_owned() {
            Ok(owned) => owned,
            Err(e) => {
                // SAFETY: our own eventfd, never published
                unsafe { reals::close(fd) };
                return Err(ShimError::Os(e.raw_os_error().unwrap_or(libc::EMFILE)));
            }
        };
        let notify_stale = tables.detach(notify_fd.as_raw_fd());
        let notify_raw = notify_fd.as_raw_fd();

        let session = match self
            .backend
            .open(&target.camera, options, ReadyNotifier::new(notify_fd))
        {
            Ok(session) => session,
            Err(e) => {
                // SAFETY: as above
                unsafe { reals::close(fd) };
                drop(tables);
                self.finish_stale(notify_raw, notify_stale);
                return Err(e.into());
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let adapter = Arc::new(DeviceAdapter::new(
            id,
            target.path.clone(),
            target.camera.clone(),
            session,
        ));
        let stale = tables.detach(fd);
        tables.descriptors.insert(fd, DescriptorEntry { adapter });
        drop(tables);

        self.finish_stale(fd, stale);
        self.finish_stale(notify_raw, notify_stale);
        log_registry_debug!(
            fd,
            adapter = id,
            camera = target.camera.as_str(),
            path = %target.path.display(),
            "emulated device opened"
        );
        Ok(fd)
    }

    pub fn lookup(&self, fd: c_int) -> Descriptor {
        match self.lock().descriptors.get(&fd) {
            Some(entry) => Descriptor::Emulated(entry.adapter.clone()),
            None => Descriptor::Real,
        }
    }

    /// Duplicate an emulated descriptor. `None` when `fd` is not emulated.
    pub fn dup(&self, fd: c_int) -> Option<Result<c_int>> {
        let mut tables = self.lock();
        let adapter = tables.descriptors.get(&fd)?.adapter.clone();

        // SAFETY: fd is our own backing eventfd
        let new_fd = unsafe { reals::dup(fd) };
        if new_fd < 0 {
            return Some(Err(ShimError::last_os_error()));
        }

        adapter.retain();
        let stale = tables.detach(new_fd);
        let refs = adapter.ref_count();
        let id = adapter.id();
        tables.descriptors.insert(new_fd, DescriptorEntry { adapter });
        drop(tables);

        self.finish_stale(new_fd, stale);
        log_registry_debug!(fd, new_fd, adapter = id, refs, "emulated descriptor duplicated");
        Some(Ok(new_fd))
    }

    /// Close an emulated descriptor, tearing the adapter down after its last
    /// reference. `None` when `fd` is not emulated.
    pub fn close(&self, fd: c_int) -> Option<Result<c_int>> {
        let (adapter, last) = self.lock().detach(fd)?;

        // SAFETY: fd is our own backing eventfd, removed from the table above
        let rc = unsafe { reals::close(fd) };
        let result = if rc < 0 {
            Err(ShimError::last_os_error())
        } else {
            Ok(rc)
        };

        if last {
            adapter.teardown();
            log_registry_debug!(
                fd,
                adapter = adapter.id(),
                path = %adapter.path().display(),
                "emulated device closed"
            );
        } else {
            log_registry_debug!(
                fd,
                adapter = adapter.id(),
                refs = adapter.ref_count(),
                "emulated descriptor closed"
            );
        }
        Some(result)
    }

    /// Drop a stale entry for a descriptor number the OS just handed out to
    /// a real open or dup. The emulated descriptor it described was closed
    /// without going through `close` (dup2, raw syscall, libc internals).
    pub fn forget_stale(&self, fd: c_int) {
        let stale = self.lock().detach(fd);
        self.finish_stale(fd, stale);
    }

    fn finish_stale(&self, fd: c_int, stale: Option<(Arc<DeviceAdapter>, bool)>) {
        let Some((adapter, last)) = stale else {
            return;
        };
        log_registry_warn!(
            fd,
            adapter = adapter.id(),
            "descriptor reused while still registered as emulated, entry purged"
        );
        if last {
            adapter.teardown();
        }
    }

    /// Track a buffer mapped through `adapter`.
    ///
    /// Fails when the adapter was closed meanwhile or the range overlaps a
    /// tracked one; the caller then releases the buffer.
    pub fn record_mapping(&self, adapter: &Arc<DeviceAdapter>, buffer: MappedBuffer) -> Result<()> {
        let mut tables = self.lock();
        if adapter.ref_count() == 0 || !adapter.is_live() {
            return Err(ShimError::BadDescriptor);
        }
        tables.mappings.record(buffer, adapter.clone())
    }

    pub fn mapping_overlaps(&self, addr: usize, len: usize) -> bool {
        self.lock().mappings.overlaps(addr, len)
    }

    /// Look up an unmap range; an exact match is removed from the tracker.
    pub fn take_mapping(&self, addr: usize, len: usize) -> Resolved {
        self.lock().mappings.take(addr, len)
    }

    pub fn emulated_count(&self) -> usize {
        self.lock().descriptors.len()
    }

    pub fn mapping_count(&self) -> usize {
        self.lock().mappings.len()
    }
}
