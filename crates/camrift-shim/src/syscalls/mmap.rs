use super::fail;
use crate::error::ShimError;
use crate::mapping::Resolved;
use crate::reals::{self, RealSymbol};
use crate::registry::{Descriptor, Registry};
use camrift_backend::MapRequest;
use camrift_config::{log_shim_debug, log_shim_warn};
use libc::{c_int, c_void, off_t, size_t};

/// Map a buffer of an emulated device, or relay through `real`.
#[allow(clippy::too_many_arguments)]
pub unsafe fn mmap_impl(
    registry: &Registry,
    real: &RealSymbol,
    addr: *mut c_void,
    len: size_t,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    offset: off_t,
) -> *mut c_void {
    let adapter = match registry.lookup(fd) {
        Descriptor::Emulated(adapter) if flags & libc::MAP_ANONYMOUS == 0 => adapter,
        _ => return reals::mmap(real, addr, len, prot, flags, fd, offset),
    };

    // a fixed placement over a tracked buffer would silently replace it
    if flags & (libc::MAP_FIXED | libc::MAP_FIXED_NOREPLACE) != 0
        && registry.mapping_overlaps(addr as usize, len)
    {
        return fail(ShimError::Overlap, libc::MAP_FAILED);
    }

    let request = MapRequest {
        addr: addr as usize,
        length: len,
        prot,
        flags,
        offset,
    };
    let buffer = match adapter.map_buffer(&request) {
        Ok(buffer) => buffer,
        Err(e) => {
            log_shim_debug!(fd, offset, len, error = %e, "emulated mmap failed");
            return fail(e, libc::MAP_FAILED);
        }
    };

    if let Err(e) = registry.record_mapping(&adapter, buffer) {
        log_shim_warn!(fd, addr = buffer.addr, error = %e, "mapped buffer could not be tracked");
        if let Err(undo) = adapter.unmap_buffer(&buffer) {
            log_shim_warn!(
                fd,
                addr = buffer.addr,
                error = %undo,
                "untracked buffer could not be unmapped"
            );
        }
        return fail(e, libc::MAP_FAILED);
    }

    log_shim_debug!(fd, index = buffer.index, addr = buffer.addr, len, "emulated mmap");
    buffer.as_ptr()
}

pub unsafe fn munmap_impl(registry: &Registry, addr: *mut c_void, len: size_t) -> c_int {
    match registry.take_mapping(addr as usize, len) {
        Resolved::Untracked => reals::munmap(addr, len),
        Resolved::Partial => fail(ShimError::PartialUnmap, -1),
        Resolved::Exact(entry) => match entry.adapter.unmap_buffer(&entry.buffer) {
            Ok(()) => 0,
            Err(e) => fail(e, -1),
        },
    }
}

#[cfg(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64"),
    not(test)
))]
mod exports {
    use super::{mmap_impl, munmap_impl};
    use crate::reals::{self, RealSymbol, REAL_MMAP, REAL_MMAP64};
    use crate::state::{ShimGuard, ShimState};
    use libc::{c_int, c_void, off_t, size_t};

    unsafe fn intercept_mmap(
        real: &RealSymbol,
        addr: *mut c_void,
        len: size_t,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: off_t,
    ) -> *mut c_void {
        // allocator traffic; never touches a device
        if flags & libc::MAP_ANONYMOUS != 0 {
            return reals::mmap(real, addr, len, prot, flags, fd, offset);
        }
        let Some(_guard) = ShimGuard::enter() else {
            return reals::mmap(real, addr, len, prot, flags, fd, offset);
        };
        match ShimState::try_get() {
            Some(state) => mmap_impl(&state.registry, real, addr, len, prot, flags, fd, offset),
            None => reals::mmap(real, addr, len, prot, flags, fd, offset),
        }
    }

    #[no_mangle]
    pub unsafe extern "C" fn mmap(
        addr: *mut c_void,
        len: size_t,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: off_t,
    ) -> *mut c_void {
        intercept_mmap(&REAL_MMAP, addr, len, prot, flags, fd, offset)
    }

    /// Identical to `mmap` apart from the offset width, which matches on
    /// 64-bit targets.
    #[no_mangle]
    pub unsafe extern "C" fn mmap64(
        addr: *mut c_void,
        len: size_t,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: libc::off64_t,
    ) -> *mut c_void {
        intercept_mmap(&REAL_MMAP64, addr, len, prot, flags, fd, offset)
    }

    #[no_mangle]
    pub unsafe extern "C" fn munmap(addr: *mut c_void, len: size_t) -> c_int {
        let Some(_guard) = ShimGuard::enter() else {
            return reals::munmap(addr, len);
        };
        match ShimState::try_get() {
            Some(state) => munmap_impl(&state.registry, addr, len),
            None => reals::munmap(addr, len),
        }
    }
}
