//! Tracking of address ranges that map emulated device buffers.

use crate::adapter::DeviceAdapter;
use crate::error::{Result, ShimError};
use camrift_backend::MappedBuffer;
use std::collections::BTreeMap;
use std::sync::Arc;

pub(crate) fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        n if n > 0 => n as usize,
        _ => 4096,
    }
}

/// Page-granular end of `[start, start + len)`; None on overflow.
fn range_end(start: usize, len: usize) -> Option<usize> {
    let page = page_size();
    start.checked_add(len.checked_add(page - 1)? / page * page)
}

pub struct MappingEntry {
    pub buffer: MappedBuffer,
    pub adapter: Arc<DeviceAdapter>,
}

impl MappingEntry {
    fn end(&self) -> usize {
        range_end(self.buffer.addr, self.buffer.length).unwrap_or(usize::MAX)
    }
}

/// Outcome of looking up an `munmap` range
pub enum Resolved {
    /// No tracked buffer intersects the range; the OS handles it
    Untracked,
    /// The range cuts into a tracked buffer without matching it
    Partial,
    /// The range is exactly one tracked buffer, now removed from the tracker
    Exact(MappingEntry),
}

/// Non-overlapping tracked ranges keyed by start address
#[derive(Default)]
pub struct MappingTracker {
    ranges: BTreeMap<usize, MappingEntry>,
}

impl MappingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Tracked entry intersecting `[start, end)`, if any.
    fn intersecting(&self, start: usize, end: usize) -> Option<&MappingEntry> {
        // ranges are disjoint, so only the last one starting before `end` can reach `start`
        self.ranges
            .range(..end)
            .next_back()
            .map(|(_, entry)| entry)
            .filter(|entry| entry.end() > start)
    }

    pub fn overlaps(&self, addr: usize, len: usize) -> bool {
        match range_end(addr, len) {
            Some(end) if end > addr => self.intersecting(addr, end).is_some(),
            _ => false,
        }
    }

    /// Track a new buffer mapping. Overlaps are rejected and nothing changes.
    pub fn record(&mut self, buffer: MappedBuffer, adapter: Arc<DeviceAdapter>) -> Result<()> {
        if self.overlaps(buffer.addr, buffer.length) {
            return Err(ShimError::Overlap);
        }
        self.ranges
            .insert(buffer.addr, MappingEntry { buffer, adapter });
        Ok(())
    }

    /// Resolve an unmap request, removing the entry on an exact match.
    pub fn take(&mut self, addr: usize, len: usize) -> Resolved {
        let end = match range_end(addr, len) {
            Some(end) if end > addr => end,
            _ => return Resolved::Untracked,
        };
        match self.intersecting(addr, end) {
            None => Resolved::Untracked,
            Some(entry) if entry.buffer.addr == addr && entry.end() == end => self
                .ranges
                .remove(&addr)
                .map_or(Resolved::Untracked, Resolved::Exact),
            Some(_) => Resolved::Partial,
        }
    }

    /// Drop every mapping owned by `adapter`; returns how many were dropped.
    pub fn forget_adapter(&mut self, adapter: &Arc<DeviceAdapter>) -> usize {
        let before = self.ranges.len();
        self.ranges
            .retain(|_, entry| !Arc::ptr_eq(&entry.adapter, adapter));
        before - self.ranges.len()
    }
}
