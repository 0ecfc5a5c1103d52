//! Synthetic camera backend.
//!
//! Produces a moving YUYV colour-bar pattern at the configured frame rate.
//! Buffers of a session live in a single memfd; buffer `i` starts at
//! `i * slot_size` and that offset is what `VIDIOC_QUERYBUF` reports.
//!
//! A session is ready (its descriptor polls readable) while streaming with
//! at least one buffer queued.

use crate::v4l2::*;
use crate::{
    BackendError, CameraInfo, CaptureBackend, CaptureSession, MapRequest, MappedBuffer,
    OpenOptions, ReadyNotifier, Result,
};
use camrift_config::{
    log_backend_debug, log_backend_info, log_backend_trace, log_backend_warn, CameraConfig,
    Config,
};
use libc::{c_int, c_void};
use memmap2::MmapMut;
use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const MIN_DIMENSION: u32 = 16;
const MAX_DIMENSION: u32 = 4096;
const DRIVER_NAME: &str = "camrift";
const DRIVER_VERSION: u32 = 0x0001_0000;

/// Camera state shared by every session opened on it
struct Camera {
    config: CameraConfig,
    sessions: AtomicUsize,
}

pub struct SyntheticBackend {
    cameras: HashMap<String, Arc<Camera>>,
}

impl SyntheticBackend {
    pub fn new(cameras: &[CameraConfig]) -> Self {
        let cameras = cameras
            .iter()
            .map(|config| {
                let camera = Camera {
                    config: config.clone(),
                    sessions: AtomicUsize::new(0),
                };
                (config.id.clone(), Arc::new(camera))
            })
            .collect();
        Self { cameras }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.cameras)
    }
}

impl CaptureBackend for SyntheticBackend {
    fn cameras(&self) -> Vec<CameraInfo> {
        let mut cameras: Vec<CameraInfo> = self
            .cameras
            .values()
            .map(|c| CameraInfo {
                id: c.config.id.clone(),
                name: c.config.name.clone(),
                width: c.config.width,
                height: c.config.height,
            })
            .collect();
        cameras.sort_by(|a, b| a.id.cmp(&b.id));
        cameras
    }

    fn open(
        &self,
        camera: &str,
        options: OpenOptions,
        notifier: ReadyNotifier,
    ) -> Result<Box<dyn CaptureSession>> {
        let camera = self
            .cameras
            .get(camera)
            .ok_or_else(|| BackendError::NoDevice(camera.to_string()))?;

        let previous = camera.sessions.fetch_add(1, Ordering::AcqRel);
        if camera.config.exclusive && previous > 0 {
            camera.sessions.fetch_sub(1, Ordering::AcqRel);
            return Err(BackendError::Busy);
        }

        log_backend_info!(
            camera = camera.config.id.as_str(),
            nonblocking = options.nonblocking,
            "synthetic session opened"
        );
        Ok(Box::new(SyntheticSession::new(camera.clone(), options, notifier)))
    }
}

struct BufferSlot {
    queued: bool,
    mappings: u32,
    bytesused: u32,
    sequence: u32,
    timestamp: libc::timeval,
}

/// memfd-backed buffer storage for one session
struct BufferPool {
    file: File,
    map: MmapMut,
    slot_size: usize,
    slots: Vec<BufferSlot>,
}

impl BufferPool {
    fn allocate(count: u32, sizeimage: u32) -> Result<Self> {
        let slot_size = page_align(sizeimage as usize);
        // every buffer start must be expressible as a 32-bit `m.offset`
        buffer_offset(count.saturating_sub(1), slot_size)?;
        let fd = memfd_create(c"camrift-buffers", MemFdCreateFlag::MFD_CLOEXEC)?;
        let file = File::from(fd);
        file.set_len((slot_size * count as usize) as u64)?;
        // SAFETY: the memfd is private to this pool and never truncated while mapped
        let map = unsafe { MmapMut::map_mut(&file)? };

        let slots = (0..count)
            .map(|_| BufferSlot {
                queued: false,
                mappings: 0,
                bytesused: 0,
                sequence: 0,
                timestamp: libc::timeval {
                    tv_sec: 0,
                    tv_usec: 0,
                },
            })
            .collect();

        Ok(Self {
            file,
            map,
            slot_size,
            slots,
        })
    }

    fn offset(&self, index: u32) -> Result<u32> {
        buffer_offset(index, self.slot_size)
    }

    fn is_mapped(&self) -> bool {
        self.slots.iter().any(|s| s.mappings > 0)
    }

    fn frame_mut(&mut self, index: usize, len: usize) -> &mut [u8] {
        let start = index * self.slot_size;
        &mut self.map[start..start + len]
    }
}

struct SessionState {
    format: V4l2PixFormat,
    pool: Option<BufferPool>,
    queue: VecDeque<u32>,
    streaming: bool,
    sequence: u32,
    next_frame: Option<Instant>,
    closed: bool,
    notifier: ReadyNotifier,
}

impl SessionState {
    fn refresh_ready(&mut self) {
        let ready = self.streaming && !self.queue.is_empty();
        self.notifier.set(ready);
    }
}

pub struct SyntheticSession {
    camera: Arc<Camera>,
    options: OpenOptions,
    frame_interval: Duration,
    state: Mutex<SessionState>,
    wakeup: Condvar,
    released: AtomicBool,
}

impl SyntheticSession {
    fn new(camera: Arc<Camera>, options: OpenOptions, notifier: ReadyNotifier) -> Self {
        let format = adjust_format(&V4l2PixFormat {
            width: camera.config.width,
            height: camera.config.height,
            ..Default::default()
        });
        let frame_interval = Duration::from_secs(1) / camera.config.fps.max(1);
        Self {
            camera,
            options,
            frame_interval,
            state: Mutex::new(SessionState {
                format,
                pool: None,
                queue: VecDeque::new(),
                streaming: false,
                sequence: 0,
                next_frame: None,
                closed: false,
                notifier,
            }),
            wakeup: Condvar::new(),
            released: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_camera(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.camera.sessions.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn query_cap(&self, cap: &mut V4l2Capability) -> Result<c_int> {
        *cap = zeroed();
        copy_cstr(&mut cap.driver, DRIVER_NAME);
        copy_cstr(&mut cap.card, &self.camera.config.name);
        copy_cstr(
            &mut cap.bus_info,
            &format!("platform:{}-{}", DRIVER_NAME, self.camera.config.id),
        );
        cap.version = DRIVER_VERSION;
        cap.device_caps = V4L2_CAP_VIDEO_CAPTURE | V4L2_CAP_STREAMING;
        cap.capabilities = cap.device_caps | V4L2_CAP_DEVICE_CAPS;
        Ok(0)
    }

    fn enum_fmt(&self, desc: &mut V4l2Fmtdesc) -> Result<c_int> {
        check_type(desc.type_)?;
        if desc.index != 0 {
            return Err(BackendError::InvalidArgument("format index"));
        }
        desc.flags = 0;
        copy_cstr(&mut desc.description, "YUYV 4:2:2");
        desc.pixelformat = V4L2_PIX_FMT_YUYV;
        desc.mbus_code = 0;
        desc.reserved = [0; 3];
        Ok(0)
    }

    fn get_fmt(&self, fmt: &mut V4l2Format) -> Result<c_int> {
        check_type(fmt.type_)?;
        fmt.fmt.pix = self.lock().format;
        Ok(0)
    }

    fn set_fmt(&self, fmt: &mut V4l2Format, commit: bool) -> Result<c_int> {
        check_type(fmt.type_)?;
        // SAFETY: every bit pattern is a valid V4l2PixFormat
        let adjusted = adjust_format(unsafe { &fmt.fmt.pix });
        if commit {
            let mut state = self.lock();
            if state.pool.is_some() {
                return Err(BackendError::Busy);
            }
            state.format = adjusted;
        }
        fmt.fmt.pix = adjusted;
        Ok(0)
    }

    fn request_buffers(&self, req: &mut V4l2RequestBuffers) -> Result<c_int> {
        check_type(req.type_)?;
        if req.memory != V4L2_MEMORY_MMAP {
            return Err(BackendError::InvalidArgument("only MMAP memory is supported"));
        }

        let mut state = self.lock();
        if state.streaming {
            return Err(BackendError::Busy);
        }
        if state.pool.as_ref().is_some_and(BufferPool::is_mapped) {
            return Err(BackendError::Busy);
        }

        state.pool = None;
        state.queue.clear();
        state.refresh_ready();
        if req.count > 0 {
            let limit = self.camera.config.max_buffers.clamp(1, VIDEO_MAX_FRAME);
            let count = req.count.clamp(1, limit);
            let pool = BufferPool::allocate(count, state.format.sizeimage).map_err(|e| {
                log_backend_warn!(count, error = %e, "buffer allocation failed");
                e
            })?;
            state.pool = Some(pool);
            req.count = count;
        }
        req.capabilities = V4L2_BUF_CAP_SUPPORTS_MMAP;
        req.flags = 0;
        log_backend_debug!(count = req.count, "buffers requested");
        Ok(0)
    }

    fn query_buf(&self, buf: &mut V4l2Buffer) -> Result<c_int> {
        check_type(buf.type_)?;
        let state = self.lock();
        let pool = state
            .pool
            .as_ref()
            .ok_or(BackendError::InvalidArgument("no buffers allocated"))?;
        let slot = pool
            .slots
            .get(buf.index as usize)
            .ok_or(BackendError::InvalidArgument("buffer index"))?;
        fill_buffer(buf, slot, pool.offset(buf.index)?, state.format.sizeimage);
        Ok(0)
    }

    fn queue_buf(&self, buf: &mut V4l2Buffer) -> Result<c_int> {
        check_type(buf.type_)?;
        if buf.memory != V4L2_MEMORY_MMAP {
            return Err(BackendError::InvalidArgument("only MMAP memory is supported"));
        }

        let mut guard = self.lock();
        let state = &mut *guard;
        let pool = state
            .pool
            .as_mut()
            .ok_or(BackendError::InvalidArgument("no buffers allocated"))?;
        let offset = pool.offset(buf.index)?;
        let slot = pool
            .slots
            .get_mut(buf.index as usize)
            .ok_or(BackendError::InvalidArgument("buffer index"))?;
        if slot.queued {
            return Err(BackendError::InvalidArgument("buffer already queued"));
        }
        slot.queued = true;
        fill_buffer(buf, slot, offset, state.format.sizeimage);
        state.queue.push_back(buf.index);
        state.refresh_ready();
        drop(guard);

        self.wakeup.notify_all();
        Ok(0)
    }

    fn dequeue_buf(&self, buf: &mut V4l2Buffer) -> Result<c_int> {
        check_type(buf.type_)?;
        let mut state = self.lock();

        let due = loop {
            if state.closed {
                return Err(BackendError::Closed);
            }
            if !state.streaming {
                return Err(BackendError::InvalidArgument("not streaming"));
            }
            if state.queue.is_empty() {
                if self.options.nonblocking {
                    return Err(BackendError::WouldBlock);
                }
                state = self.wakeup.wait(state).unwrap_or_else(PoisonError::into_inner);
                continue;
            }

            let now = Instant::now();
            let due = state.next_frame.unwrap_or(now);
            if due <= now {
                break due;
            }
            // a queued buffer already polls ready, so the pacing delay is
            // waited out even in non-blocking mode; it is at most one frame
            state = self
                .wakeup
                .wait_timeout(state, due - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        };

        let state = &mut *state;
        let index = state
            .queue
            .pop_front()
            .ok_or(BackendError::InvalidArgument("queue drained"))?;
        let format = state.format;
        let sequence = state.sequence;
        let pool = state
            .pool
            .as_mut()
            .ok_or(BackendError::InvalidArgument("no buffers allocated"))?;

        fill_color_bars(
            pool.frame_mut(index as usize, format.sizeimage as usize),
            &format,
            sequence,
        );

        let offset = pool.offset(index)?;
        let slot = &mut pool.slots[index as usize];
        slot.queued = false;
        slot.bytesused = format.sizeimage;
        slot.sequence = sequence;
        slot.timestamp = monotonic_now();
        fill_buffer(buf, slot, offset, format.sizeimage);
        buf.flags |= V4L2_BUF_FLAG_DONE;
        state.refresh_ready();

        state.sequence = sequence.wrapping_add(1);
        let mut next = due + self.frame_interval;
        let now = Instant::now();
        if next + self.frame_interval < now {
            // fell behind, do not burst
            next = now + self.frame_interval;
        }
        state.next_frame = Some(next);

        log_backend_trace!(index, sequence, "frame delivered");
        Ok(0)
    }

    fn stream_on(&self, type_: c_int) -> Result<c_int> {
        check_type(type_ as u32)?;
        let mut state = self.lock();
        if state.pool.is_none() {
            return Err(BackendError::InvalidArgument("no buffers allocated"));
        }
        if !state.streaming {
            state.streaming = true;
            state.next_frame = Some(Instant::now());
            log_backend_debug!(camera = self.camera.config.id.as_str(), "stream on");
        }
        state.refresh_ready();
        drop(state);
        self.wakeup.notify_all();
        Ok(0)
    }

    fn stream_off(&self, type_: c_int) -> Result<c_int> {
        check_type(type_ as u32)?;
        let mut guard = self.lock();
        let state = &mut *guard;
        state.streaming = false;
        state.queue.clear();
        if let Some(pool) = state.pool.as_mut() {
            pool.slots.iter_mut().for_each(|s| s.queued = false);
        }
        state.refresh_ready();
        drop(guard);
        log_backend_debug!(camera = self.camera.config.id.as_str(), "stream off");
        self.wakeup.notify_all();
        Ok(0)
    }

    fn enum_input(&self, input: &mut V4l2Input) -> Result<c_int> {
        if input.index != 0 {
            return Err(BackendError::InvalidArgument("input index"));
        }
        let index = input.index;
        *input = zeroed();
        input.index = index;
        copy_cstr(&mut input.name, "Camera");
        input.type_ = V4L2_INPUT_TYPE_CAMERA;
        Ok(0)
    }
}

impl CaptureSession for SyntheticSession {
    unsafe fn control(&self, request: u64, arg: *mut c_void) -> Result<c_int> {
        if arg.is_null() {
            return Err(BackendError::BadAddress);
        }
        // the kernel only looks at the low 32 bits; callers passing a
        // sign-extended int must land on the same command
        match request as u32 {
            VIDIOC_QUERYCAP => self.query_cap(&mut *(arg as *mut V4l2Capability)),
            VIDIOC_ENUM_FMT => self.enum_fmt(&mut *(arg as *mut V4l2Fmtdesc)),
            VIDIOC_G_FMT => self.get_fmt(&mut *(arg as *mut V4l2Format)),
            VIDIOC_S_FMT => self.set_fmt(&mut *(arg as *mut V4l2Format), true),
            VIDIOC_TRY_FMT => self.set_fmt(&mut *(arg as *mut V4l2Format), false),
            VIDIOC_REQBUFS => self.request_buffers(&mut *(arg as *mut V4l2RequestBuffers)),
            VIDIOC_QUERYBUF => self.query_buf(&mut *(arg as *mut V4l2Buffer)),
            VIDIOC_QBUF => self.queue_buf(&mut *(arg as *mut V4l2Buffer)),
            VIDIOC_DQBUF => self.dequeue_buf(&mut *(arg as *mut V4l2Buffer)),
            VIDIOC_STREAMON => self.stream_on(*(arg as *const c_int)),
            VIDIOC_STREAMOFF => self.stream_off(*(arg as *const c_int)),
            VIDIOC_ENUMINPUT => self.enum_input(&mut *(arg as *mut V4l2Input)),
            VIDIOC_G_INPUT => {
                *(arg as *mut c_int) = 0;
                Ok(0)
            }
            VIDIOC_S_INPUT => match *(arg as *const c_int) {
                0 => Ok(0),
                _ => Err(BackendError::InvalidArgument("input index")),
            },
            _ => Err(BackendError::Unsupported(request)),
        }
    }

    fn map(&self, request: &MapRequest) -> Result<MappedBuffer> {
        if request.flags & libc::MAP_SHARED == 0 {
            return Err(BackendError::InvalidArgument("buffers must be mapped shared"));
        }
        if request.prot & libc::PROT_WRITE != 0 && !self.options.access.can_write() {
            return Err(BackendError::PermissionDenied);
        }

        let mut state = self.lock();
        let pool = state
            .pool
            .as_mut()
            .ok_or(BackendError::InvalidArgument("no buffers allocated"))?;

        let offset = usize::try_from(request.offset)
            .map_err(|_| BackendError::InvalidArgument("negative offset"))?;
        if offset % pool.slot_size != 0 {
            return Err(BackendError::InvalidArgument("offset is not a buffer start"));
        }
        let index = offset / pool.slot_size;
        if index >= pool.slots.len() {
            return Err(BackendError::InvalidArgument("offset past last buffer"));
        }
        if request.length == 0 || request.length > pool.slot_size {
            return Err(BackendError::InvalidArgument("length exceeds buffer"));
        }

        // SAFETY: plain mmap of our own memfd; the caller owns the result
        let addr = unsafe {
            libc::mmap(
                request.addr as *mut c_void,
                request.length,
                request.prot,
                request.flags,
                pool.file.as_raw_fd(),
                request.offset as libc::off_t,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error().into());
        }

        pool.slots[index].mappings += 1;
        log_backend_debug!(index, addr = addr as usize, "buffer mapped");
        Ok(MappedBuffer {
            addr: addr as usize,
            length: request.length,
            index: index as u32,
        })
    }

    fn unmap(&self, buffer: &MappedBuffer) -> Result<()> {
        // SAFETY: range came from `map` and is released exactly once by the caller
        if unsafe { libc::munmap(buffer.as_ptr(), buffer.length) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        let mut state = self.lock();
        if let Some(slot) = state
            .pool
            .as_mut()
            .and_then(|pool| pool.slots.get_mut(buffer.index as usize))
        {
            slot.mappings = slot.mappings.saturating_sub(1);
        }
        Ok(())
    }

    fn shutdown(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.streaming = false;
        state.queue.clear();
        state.refresh_ready();
        drop(state);

        self.wakeup.notify_all();
        self.release_camera();
        log_backend_info!(camera = self.camera.config.id.as_str(), "synthetic session closed");
    }
}

impl Drop for SyntheticSession {
    fn drop(&mut self) {
        self.release_camera();
    }
}

fn check_type(type_: u32) -> Result<()> {
    if type_ == V4L2_BUF_TYPE_VIDEO_CAPTURE {
        Ok(())
    } else {
        Err(BackendError::InvalidArgument("buffer type"))
    }
}

/// `m.offset` of buffer `index`; V4L2 carries it in 32 bits.
fn buffer_offset(index: u32, slot_size: usize) -> Result<u32> {
    (index as usize)
        .checked_mul(slot_size)
        .and_then(|offset| u32::try_from(offset).ok())
        .ok_or(BackendError::InvalidArgument("buffer offset exceeds 32 bits"))
}

fn page_align(len: usize) -> usize {
    // SAFETY: sysconf has no preconditions
    let page = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        n if n > 0 => n as usize,
        _ => 4096,
    };
    len.div_ceil(page) * page
}

fn monotonic_now() -> libc::timeval {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid out pointer
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    libc::timeval {
        tv_sec: ts.tv_sec,
        tv_usec: (ts.tv_nsec / 1000) as libc::suseconds_t,
    }
}

/// Clamp a requested format to what the synthetic sensor produces.
fn adjust_format(requested: &V4l2PixFormat) -> V4l2PixFormat {
    let width = requested.width.clamp(MIN_DIMENSION, MAX_DIMENSION) & !1;
    let height = requested.height.clamp(MIN_DIMENSION, MAX_DIMENSION);
    let bytesperline = width * 2;
    V4l2PixFormat {
        width,
        height,
        pixelformat: V4L2_PIX_FMT_YUYV,
        field: V4L2_FIELD_NONE,
        bytesperline,
        sizeimage: bytesperline * height,
        colorspace: V4L2_COLORSPACE_SRGB,
        ..Default::default()
    }
}

fn fill_buffer(buf: &mut V4l2Buffer, slot: &BufferSlot, offset: u32, sizeimage: u32) {
    let index = buf.index;
    *buf = zeroed();
    buf.index = index;
    buf.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
    buf.memory = V4L2_MEMORY_MMAP;
    buf.field = V4L2_FIELD_NONE;
    buf.bytesused = slot.bytesused;
    buf.sequence = slot.sequence;
    buf.timestamp = slot.timestamp;
    buf.length = sizeimage;
    buf.m.offset = offset;
    buf.flags = V4L2_BUF_FLAG_TIMESTAMP_MONOTONIC;
    if slot.mappings > 0 {
        buf.flags |= V4L2_BUF_FLAG_MAPPED;
    }
    if slot.queued {
        buf.flags |= V4L2_BUF_FLAG_QUEUED;
    }
}

/// SMPTE-ish bars in YUYV, scrolled horizontally by the frame sequence.
const BARS: [(u8, u8, u8); 8] = [
    (235, 128, 128),
    (210, 16, 146),
    (170, 166, 16),
    (145, 54, 34),
    (106, 202, 222),
    (81, 90, 240),
    (41, 240, 110),
    (16, 128, 128),
];

fn fill_color_bars(frame: &mut [u8], format: &V4l2PixFormat, sequence: u32) {
    let pairs = (format.width / 2) as usize;
    let stride = format.bytesperline as usize;
    if pairs == 0 || stride == 0 {
        return;
    }
    let shift = sequence as usize * 2;

    let mut rows = frame.chunks_exact_mut(stride);
    let Some(first) = rows.next() else {
        return;
    };
    for (pair, px) in first.chunks_exact_mut(4).take(pairs).enumerate() {
        let (y, u, v) = BARS[((pair + shift) % pairs) * BARS.len() / pairs];
        px.copy_from_slice(&[y, u, y, v]);
    }
    let template = first.to_vec();
    for row in rows {
        row.copy_from_slice(&template);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::os::fd::{FromRawFd, OwnedFd};

    fn camera(id: &str) -> CameraConfig {
        CameraConfig {
            id: id.to_string(),
            width: 64,
            height: 32,
            fps: 1000,
            max_buffers: 4,
            ..Default::default()
        }
    }

    fn open(backend: &SyntheticBackend, nonblocking: bool) -> Box<dyn CaptureSession> {
        let options = OpenOptions {
            nonblocking,
            ..Default::default()
        };
        backend.open("cam0", options, ReadyNotifier::disabled()).unwrap()
    }

    unsafe fn ioctl<T>(session: &dyn CaptureSession, request: u32, arg: &mut T) -> Result<c_int> {
        session.control(request as u64, arg as *mut T as *mut c_void)
    }

    fn capture_buffer(index: u32) -> V4l2Buffer {
        let mut buf: V4l2Buffer = zeroed();
        buf.index = index;
        buf.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        buf.memory = V4L2_MEMORY_MMAP;
        buf
    }

    fn request(session: &dyn CaptureSession, count: u32) -> V4l2RequestBuffers {
        let mut req = V4l2RequestBuffers {
            count,
            type_: V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: V4L2_MEMORY_MMAP,
            ..Default::default()
        };
        unsafe { ioctl(session, VIDIOC_REQBUFS, &mut req) }.unwrap();
        req
    }

    #[test]
    fn test_enumerate_cameras() {
        let backend = SyntheticBackend::new(&[camera("cam1"), camera("cam0")]);
        let ids: Vec<String> = backend.cameras().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["cam0", "cam1"]);
    }

    #[test]
    fn test_from_default_config() {
        let backend = SyntheticBackend::from_config(&Config::default());
        let cameras = backend.cameras();
        assert_eq!(cameras.len(), 1);
        assert_eq!((cameras[0].width, cameras[0].height), (640, 480));
    }

    #[test]
    fn test_open_unknown_camera() {
        let backend = SyntheticBackend::new(&[camera("cam0")]);
        let err = backend
            .open("nope", OpenOptions::default(), ReadyNotifier::disabled())
            .err()
            .unwrap();
        assert_eq!(err.errno(), libc::ENODEV);
    }

    #[test]
    fn test_exclusive_camera_busy() {
        let mut config = camera("cam0");
        config.exclusive = true;
        let backend = SyntheticBackend::new(&[config]);

        let first = open(&backend, false);
        let err = backend
            .open("cam0", OpenOptions::default(), ReadyNotifier::disabled())
            .err()
            .unwrap();
        assert_eq!(err, BackendError::Busy);

        first.shutdown();
        drop(first);
        assert!(backend
            .open("cam0", OpenOptions::default(), ReadyNotifier::disabled())
            .is_ok());
    }

    #[test]
    fn test_querycap() {
        let backend = SyntheticBackend::new(&[camera("cam0")]);
        let session = open(&backend, false);
        let mut cap: V4l2Capability = zeroed();
        unsafe { ioctl(&*session, VIDIOC_QUERYCAP, &mut cap) }.unwrap();

        assert_eq!(&cap.driver[..8], b"camrift\0");
        assert_ne!(cap.device_caps & V4L2_CAP_STREAMING, 0);
        assert_ne!(cap.capabilities & V4L2_CAP_DEVICE_CAPS, 0);
    }

    #[test]
    fn test_unsupported_and_null_argument() {
        let backend = SyntheticBackend::new(&[camera("cam0")]);
        let session = open(&backend, false);
        let mut dummy = 0u32;

        let err = unsafe { ioctl(&*session, 0xdead_beef, &mut dummy) }.unwrap_err();
        assert_eq!(err.errno(), libc::ENOTTY);

        let err = unsafe { session.control(VIDIOC_QUERYCAP as u64, std::ptr::null_mut()) }
            .unwrap_err();
        assert_eq!(err.errno(), libc::EFAULT);
    }

    #[test]
    fn test_sign_extended_request() {
        let backend = SyntheticBackend::new(&[camera("cam0")]);
        let session = open(&backend, false);
        let mut fmt: V4l2Format = zeroed();
        fmt.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        let request = VIDIOC_G_FMT as i32 as i64 as u64;
        unsafe { session.control(request, &mut fmt as *mut _ as *mut c_void) }.unwrap();
        assert_eq!(unsafe { fmt.fmt.pix.width }, 64);
    }

    #[test]
    fn test_set_format_clamps_and_locks() {
        let backend = SyntheticBackend::new(&[camera("cam0")]);
        let session = open(&backend, false);

        let mut fmt: V4l2Format = zeroed();
        fmt.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        fmt.fmt.pix = V4l2PixFormat {
            width: 101,
            height: 9000,
            pixelformat: fourcc(b"MJPG"),
            ..Default::default()
        };
        unsafe { ioctl(&*session, VIDIOC_S_FMT, &mut fmt) }.unwrap();
        let pix = unsafe { fmt.fmt.pix };
        assert_eq!((pix.width, pix.height), (100, MAX_DIMENSION));
        assert_eq!(pix.pixelformat, V4L2_PIX_FMT_YUYV);
        assert_eq!(pix.sizeimage, 200 * MAX_DIMENSION);

        request(&*session, 2);
        let err = unsafe { ioctl(&*session, VIDIOC_S_FMT, &mut fmt) }.unwrap_err();
        assert_eq!(err, BackendError::Busy);
    }

    #[test]
    fn test_reqbufs_clamps_count() {
        let backend = SyntheticBackend::new(&[camera("cam0")]);
        let session = open(&backend, false);
        assert_eq!(request(&*session, 32).count, 4);
        assert_eq!(request(&*session, 0).count, 0);
    }

    #[test]
    fn test_reqbufs_offsets_stay_distinct_at_limit() {
        let mut config = camera("cam0");
        config.width = MAX_DIMENSION;
        config.height = MAX_DIMENSION;
        config.max_buffers = 200;
        let backend = SyntheticBackend::new(&[config]);
        let session = open(&backend, false);

        assert_eq!(request(&*session, 200).count, VIDEO_MAX_FRAME);

        let slot_size = page_align((MAX_DIMENSION * 2 * MAX_DIMENSION) as usize);
        let offsets: HashSet<u32> = (0..VIDEO_MAX_FRAME)
            .map(|index| {
                let mut buf = capture_buffer(index);
                unsafe { ioctl(&*session, VIDIOC_QUERYBUF, &mut buf) }.unwrap();
                let offset = unsafe { buf.m.offset };
                assert_eq!(offset as usize, index as usize * slot_size);
                offset
            })
            .collect();
        assert_eq!(offsets.len(), VIDEO_MAX_FRAME as usize);
    }

    #[test]
    fn test_buffer_offset_overflow() {
        assert_eq!(buffer_offset(3, 4096).unwrap(), 3 * 4096);
        let err = buffer_offset(2, 1 << 31).unwrap_err();
        assert_eq!(err.errno(), libc::EINVAL);
    }

    #[test]
    fn test_ready_follows_queue() {
        let polled = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
        assert!(polled >= 0);
        let polled = unsafe { OwnedFd::from_raw_fd(polled) };
        let readable = || {
            let mut pfd = libc::pollfd {
                fd: polled.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            unsafe { libc::poll(&mut pfd, 1, 0) == 1 }
        };

        let backend = SyntheticBackend::new(&[camera("cam0")]);
        let notifier = ReadyNotifier::new(polled.try_clone().unwrap());
        let session = backend
            .open("cam0", OpenOptions::default(), notifier)
            .unwrap();
        request(&*session, 2);

        let mut on = V4L2_BUF_TYPE_VIDEO_CAPTURE as c_int;
        unsafe { ioctl(&*session, VIDIOC_STREAMON, &mut on) }.unwrap();
        assert!(!readable());

        let mut buf = capture_buffer(0);
        unsafe { ioctl(&*session, VIDIOC_QBUF, &mut buf) }.unwrap();
        assert!(readable());

        let mut out = capture_buffer(0);
        unsafe { ioctl(&*session, VIDIOC_DQBUF, &mut out) }.unwrap();
        assert!(!readable());

        unsafe { ioctl(&*session, VIDIOC_QBUF, &mut out) }.unwrap();
        assert!(readable());
        let mut off = V4L2_BUF_TYPE_VIDEO_CAPTURE as c_int;
        unsafe { ioctl(&*session, VIDIOC_STREAMOFF, &mut off) }.unwrap();
        assert!(!readable());
    }

    #[test]
    fn test_nonblocking_waits_out_pacing() {
        let mut config = camera("cam0");
        config.fps = 20;
        let backend = SyntheticBackend::new(&[config]);
        let session = open(&backend, true);
        request(&*session, 2);

        let mut on = V4L2_BUF_TYPE_VIDEO_CAPTURE as c_int;
        unsafe { ioctl(&*session, VIDIOC_STREAMON, &mut on) }.unwrap();
        for index in 0..2 {
            let mut buf = capture_buffer(index);
            unsafe { ioctl(&*session, VIDIOC_QBUF, &mut buf) }.unwrap();
        }

        // the second frame is not due yet but a buffer is queued
        let mut out = capture_buffer(0);
        unsafe { ioctl(&*session, VIDIOC_DQBUF, &mut out) }.unwrap();
        unsafe { ioctl(&*session, VIDIOC_DQBUF, &mut out) }.unwrap();
        assert_eq!(out.sequence, 1);
    }

    #[test]
    fn test_capture_through_mapping() {
        let backend = SyntheticBackend::new(&[camera("cam0")]);
        let session = open(&backend, false);
        request(&*session, 2);

        let mut buf = capture_buffer(1);
        unsafe { ioctl(&*session, VIDIOC_QUERYBUF, &mut buf) }.unwrap();
        let offset = unsafe { buf.m.offset };
        assert!(offset > 0);

        let mapped = session
            .map(&MapRequest {
                addr: 0,
                length: buf.length as usize,
                prot: libc::PROT_READ,
                flags: libc::MAP_SHARED,
                offset: offset as i64,
            })
            .unwrap();
        assert_eq!(mapped.index, 1);

        unsafe { ioctl(&*session, VIDIOC_QBUF, &mut buf) }.unwrap();
        assert_ne!(buf.flags & V4L2_BUF_FLAG_QUEUED, 0);
        assert_ne!(buf.flags & V4L2_BUF_FLAG_MAPPED, 0);

        let mut on = V4L2_BUF_TYPE_VIDEO_CAPTURE as c_int;
        unsafe { ioctl(&*session, VIDIOC_STREAMON, &mut on) }.unwrap();

        let mut out = capture_buffer(0);
        unsafe { ioctl(&*session, VIDIOC_DQBUF, &mut out) }.unwrap();
        assert_eq!(out.index, 1);
        assert_eq!(out.bytesused, 64 * 2 * 32);
        assert_ne!(out.flags & V4L2_BUF_FLAG_DONE, 0);

        // first pixel pair is the white bar
        let frame = unsafe { std::slice::from_raw_parts(mapped.addr as *const u8, 4) };
        assert_eq!(frame, &[235, 128, 235, 128]);

        // mapped buffers cannot be freed
        let mut off = V4L2_BUF_TYPE_VIDEO_CAPTURE as c_int;
        unsafe { ioctl(&*session, VIDIOC_STREAMOFF, &mut off) }.unwrap();
        let mut free = V4l2RequestBuffers {
            count: 0,
            type_: V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: V4L2_MEMORY_MMAP,
            ..Default::default()
        };
        let err = unsafe { ioctl(&*session, VIDIOC_REQBUFS, &mut free) }.unwrap_err();
        assert_eq!(err, BackendError::Busy);

        session.unmap(&mapped).unwrap();
        unsafe { ioctl(&*session, VIDIOC_REQBUFS, &mut free) }.unwrap();
    }

    #[test]
    fn test_map_rejects_bad_offsets() {
        let backend = SyntheticBackend::new(&[camera("cam0")]);
        let session = open(&backend, false);
        request(&*session, 1);

        let bad = MapRequest {
            addr: 0,
            length: 64,
            prot: libc::PROT_READ,
            flags: libc::MAP_SHARED,
            offset: 12,
        };
        assert_eq!(session.map(&bad).unwrap_err().errno(), libc::EINVAL);

        let private = MapRequest {
            offset: 0,
            flags: libc::MAP_PRIVATE,
            ..bad
        };
        assert_eq!(session.map(&private).unwrap_err().errno(), libc::EINVAL);
    }

    #[test]
    fn test_read_only_session_cannot_map_writable() {
        let backend = SyntheticBackend::new(&[camera("cam0")]);
        let options = OpenOptions {
            access: crate::Access::ReadOnly,
            ..Default::default()
        };
        let session = backend.open("cam0", options, ReadyNotifier::disabled()).unwrap();
        request(&*session, 1);

        let writable = MapRequest {
            addr: 0,
            length: 64,
            prot: libc::PROT_READ | libc::PROT_WRITE,
            flags: libc::MAP_SHARED,
            offset: 0,
        };
        assert_eq!(session.map(&writable).unwrap_err().errno(), libc::EACCES);
    }

    #[test]
    fn test_nonblocking_dequeue() {
        let backend = SyntheticBackend::new(&[camera("cam0")]);
        let session = open(&backend, true);
        request(&*session, 1);

        let mut on = V4L2_BUF_TYPE_VIDEO_CAPTURE as c_int;
        unsafe { ioctl(&*session, VIDIOC_STREAMON, &mut on) }.unwrap();

        let mut out = capture_buffer(0);
        let err = unsafe { ioctl(&*session, VIDIOC_DQBUF, &mut out) }.unwrap_err();
        assert_eq!(err.errno(), libc::EAGAIN);
    }

    #[test]
    fn test_dequeue_requires_streaming() {
        let backend = SyntheticBackend::new(&[camera("cam0")]);
        let session = open(&backend, false);
        request(&*session, 1);
        let mut out = capture_buffer(0);
        let err = unsafe { ioctl(&*session, VIDIOC_DQBUF, &mut out) }.unwrap_err();
        assert_eq!(err.errno(), libc::EINVAL);
    }

    #[test]
    fn test_shutdown_wakes_blocked_dequeue() {
        let backend = SyntheticBackend::new(&[camera("cam0")]);
        let session: Arc<dyn CaptureSession> = Arc::from(open(&backend, false));
        request(&*session, 1);
        let mut on = V4L2_BUF_TYPE_VIDEO_CAPTURE as c_int;
        unsafe { ioctl(&*session, VIDIOC_STREAMON, &mut on) }.unwrap();

        let waiter = {
            let session = session.clone();
            std::thread::spawn(move || {
                let mut out = capture_buffer(0);
                unsafe { ioctl(&*session, VIDIOC_DQBUF, &mut out) }
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        session.shutdown();

        let err = waiter.join().unwrap().unwrap_err();
        assert_eq!(err.errno(), libc::EBADF);
    }

    #[test]
    fn test_color_bars_scroll() {
        let format = adjust_format(&V4l2PixFormat {
            width: 16,
            height: 16,
            ..Default::default()
        });
        let mut a = vec![0u8; format.sizeimage as usize];
        let mut b = a.clone();
        fill_color_bars(&mut a, &format, 0);
        fill_color_bars(&mut b, &format, 1);
        assert_ne!(a, b);
        // every row identical
        let stride = format.bytesperline as usize;
        assert_eq!(&a[..stride], &a[stride..2 * stride]);
    }
}
