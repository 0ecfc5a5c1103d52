//! Video4Linux2 ABI subset declared by the synthetic backend.
//!
//! Layouts follow `linux/videodev2.h` on 64-bit targets; request codes are
//! built from the struct sizes the same way `_IOR`/`_IOW`/`_IOWR` do.

use libc::{c_int, c_ulong, c_void, timeval};
use std::mem::size_of;

const IOC_NRBITS: u32 = 8;
const IOC_TYPEBITS: u32 = 8;
const IOC_SIZEBITS: u32 = 14;
const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: u32 = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;

const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

const fn ioc(dir: u32, ty: u8, nr: u8, size: usize) -> u32 {
    (dir << IOC_DIRSHIFT)
        | ((ty as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)
}

const fn ior(nr: u8, size: usize) -> u32 {
    ioc(IOC_READ, b'V', nr, size)
}

const fn iow(nr: u8, size: usize) -> u32 {
    ioc(IOC_WRITE, b'V', nr, size)
}

const fn iowr(nr: u8, size: usize) -> u32 {
    ioc(IOC_READ | IOC_WRITE, b'V', nr, size)
}

pub const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | ((code[1] as u32) << 8) | ((code[2] as u32) << 16) | ((code[3] as u32) << 24)
}

pub const V4L2_PIX_FMT_YUYV: u32 = fourcc(b"YUYV");

pub const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
pub const V4L2_MEMORY_MMAP: u32 = 1;
/// Most buffers a queue may hold
pub const VIDEO_MAX_FRAME: u32 = 32;
pub const V4L2_FIELD_NONE: u32 = 1;
pub const V4L2_COLORSPACE_SRGB: u32 = 8;
pub const V4L2_INPUT_TYPE_CAMERA: u32 = 2;

pub const V4L2_CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;
pub const V4L2_CAP_STREAMING: u32 = 0x0400_0000;
pub const V4L2_CAP_DEVICE_CAPS: u32 = 0x8000_0000;

pub const V4L2_BUF_CAP_SUPPORTS_MMAP: u32 = 0x0000_0001;

pub const V4L2_BUF_FLAG_MAPPED: u32 = 0x0000_0001;
pub const V4L2_BUF_FLAG_QUEUED: u32 = 0x0000_0002;
pub const V4L2_BUF_FLAG_DONE: u32 = 0x0000_0004;
pub const V4L2_BUF_FLAG_TIMESTAMP_MONOTONIC: u32 = 0x0000_2000;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct V4l2Capability {
    pub driver: [u8; 16],
    pub card: [u8; 32],
    pub bus_info: [u8; 32],
    pub version: u32,
    pub capabilities: u32,
    pub device_caps: u32,
    pub reserved: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct V4l2PixFormat {
    pub width: u32,
    pub height: u32,
    pub pixelformat: u32,
    pub field: u32,
    pub bytesperline: u32,
    pub sizeimage: u32,
    pub colorspace: u32,
    pub priv_: u32,
    pub flags: u32,
    pub ycbcr_enc: u32,
    pub quantization: u32,
    pub xfer_func: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union V4l2FormatUnion {
    pub pix: V4l2PixFormat,
    pub raw_data: [u8; 200],
    // the kernel union holds pointers (v4l2_window)
    _align: [u64; 25],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct V4l2Format {
    pub type_: u32,
    pub fmt: V4l2FormatUnion,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct V4l2Fmtdesc {
    pub index: u32,
    pub type_: u32,
    pub flags: u32,
    pub description: [u8; 32],
    pub pixelformat: u32,
    pub mbus_code: u32,
    pub reserved: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Default, Debug)]
pub struct V4l2RequestBuffers {
    pub count: u32,
    pub type_: u32,
    pub memory: u32,
    pub capabilities: u32,
    pub flags: u8,
    pub reserved: [u8; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct V4l2Timecode {
    pub type_: u32,
    pub flags: u32,
    pub frames: u8,
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub userbits: [u8; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union V4l2BufferM {
    pub offset: u32,
    pub userptr: c_ulong,
    pub planes: *mut c_void,
    pub fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct V4l2Buffer {
    pub index: u32,
    pub type_: u32,
    pub bytesused: u32,
    pub flags: u32,
    pub field: u32,
    pub timestamp: timeval,
    pub timecode: V4l2Timecode,
    pub sequence: u32,
    pub memory: u32,
    pub m: V4l2BufferM,
    pub length: u32,
    pub reserved2: u32,
    pub request_fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct V4l2Input {
    pub index: u32,
    pub name: [u8; 32],
    pub type_: u32,
    pub audioset: u32,
    pub tuner: u32,
    pub std: u64,
    pub status: u32,
    pub capabilities: u32,
    pub reserved: [u32; 3],
}

#[cfg(target_pointer_width = "64")]
const _: () = {
    assert!(size_of::<V4l2Capability>() == 104);
    assert!(size_of::<V4l2Format>() == 208);
    assert!(size_of::<V4l2Fmtdesc>() == 64);
    assert!(size_of::<V4l2RequestBuffers>() == 20);
    assert!(size_of::<V4l2Buffer>() == 88);
    assert!(size_of::<V4l2Input>() == 80);
};

pub const VIDIOC_QUERYCAP: u32 = ior(0, size_of::<V4l2Capability>());
pub const VIDIOC_ENUM_FMT: u32 = iowr(2, size_of::<V4l2Fmtdesc>());
pub const VIDIOC_G_FMT: u32 = iowr(4, size_of::<V4l2Format>());
pub const VIDIOC_S_FMT: u32 = iowr(5, size_of::<V4l2Format>());
pub const VIDIOC_REQBUFS: u32 = iowr(8, size_of::<V4l2RequestBuffers>());
pub const VIDIOC_QUERYBUF: u32 = iowr(9, size_of::<V4l2Buffer>());
pub const VIDIOC_QBUF: u32 = iowr(15, size_of::<V4l2Buffer>());
pub const VIDIOC_DQBUF: u32 = iowr(17, size_of::<V4l2Buffer>());
pub const VIDIOC_STREAMON: u32 = iow(18, size_of::<c_int>());
pub const VIDIOC_STREAMOFF: u32 = iow(19, size_of::<c_int>());
pub const VIDIOC_ENUMINPUT: u32 = iowr(26, size_of::<V4l2Input>());
pub const VIDIOC_G_INPUT: u32 = ior(38, size_of::<c_int>());
pub const VIDIOC_S_INPUT: u32 = iowr(39, size_of::<c_int>());
pub const VIDIOC_TRY_FMT: u32 = iowr(64, size_of::<V4l2Format>());

/// Copy `src` into a fixed C string field, always NUL terminated.
pub fn copy_cstr(dst: &mut [u8], src: &str) {
    dst.fill(0);
    let len = src.len().min(dst.len().saturating_sub(1));
    dst[..len].copy_from_slice(&src.as_bytes()[..len]);
}

/// All-zero value of a plain C struct.
pub fn zeroed<T: Copy>() -> T {
    // SAFETY: only used for the repr(C) integer/array/pointer structs above
    unsafe { std::mem::zeroed() }
}
