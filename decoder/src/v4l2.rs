//! V4L2 memory-to-memory decoder format negotiation.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use media::track::Size;

use crate::error::{DecoderError, Result};

const VIDIOC_ENUM_FMT: u32 = 0xC040_5602;
const VIDIOC_ENUM_FRAMESIZES: u32 = 0xC02C_564A;

const FRMSIZE_TYPE_DISCRETE: u32 = 1;
const FRMSIZE_TYPE_CONTINUOUS: u32 = 2;
const FRMSIZE_TYPE_STEPWISE: u32 = 3;

/// A V4L2 four-character code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub u32);

impl FourCc {
    pub const H264: FourCc = FourCc::new(b"H264");
    pub const NV12: FourCc = FourCc::new(b"NV12");

    pub const fn new(code: &[u8; 4]) -> Self {
        Self(u32::from_le_bytes(*code))
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.to_le_bytes() {
            let c = if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({self})")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BufferType {
    VideoCaptureMplane = 9,
    VideoOutputMplane = 10,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescription {
    pub index: u32,
    pub flags: u32,
    pub description: String,
    pub pixel_format: FourCc,
}

impl fmt::Display for FormatDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\", {}", self.description, self.pixel_format)
    }
}

/// Frame sizes a device accepts for one pixel format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameSizes {
    /// Sorted by height, then width.
    Discrete(Vec<Size>),
    Stepwise {
        min: Size,
        max: Size,
        step: Size,
        continuous: bool,
    },
}

impl FrameSizes {
    pub fn max_size(&self) -> Option<Size> {
        match self {
            FrameSizes::Discrete(sizes) => sizes.last().copied(),
            FrameSizes::Stepwise { max, .. } => Some(*max),
        }
    }
}

impl fmt::Display for FrameSizes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameSizes::Discrete(sizes) => {
                let list: Vec<String> = sizes
                    .iter()
                    .map(|s| format!("{}x{}", s.width, s.height))
                    .collect();
                write!(f, "{}", list.join(", "))
            }
            FrameSizes::Stepwise {
                min,
                max,
                step,
                continuous,
            } => {
                write!(
                    f,
                    "from {}x{} up to {}x{}",
                    min.width, min.height, max.width, max.height
                )?;
                if *continuous {
                    Ok(())
                } else if step.width == step.height {
                    write!(f, ", with step {}", step.width)
                } else {
                    write!(f, ", with step {}x{}", step.width, step.height)
                }
            }
        }
    }
}

pub trait FormatEnumerator {
    fn enumerate_formats(&self, buffer_type: BufferType) -> Result<Vec<FormatDescription>>;
    fn enumerate_frame_sizes(&self, pixel_format: FourCc) -> Result<FrameSizes>;
}

#[repr(C)]
#[derive(Default)]
struct FmtDesc {
    index: u32,
    buffer_type: u32,
    flags: u32,
    description: [u8; 32],
    pixel_format: u32,
    mbus_code: u32,
    reserved: [u32; 3],
}

#[repr(C)]
#[derive(Default)]
struct FrameSizeEnum {
    index: u32,
    pixel_format: u32,
    size_type: u32,
    // discrete: width, height; stepwise: min/max/step width, min/max/step height
    size: [u32; 6],
    reserved: [u32; 2],
}

/// An opened V4L2 decoder device.
pub struct V4l2Device {
    file: File,
    path: PathBuf,
}

impl V4l2Device {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|source| DecoderError::DeviceOpen {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Issue an enumeration ioctl. `Ok(false)` means the index is past the
    /// end of the list.
    fn enumerate<T>(&self, request: u32, arg: &mut T) -> Result<bool> {
        let r = unsafe { libc::ioctl(self.file.as_raw_fd(), request as _, arg as *mut T) };
        if r >= 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINVAL) {
            return Ok(false);
        }
        Err(DecoderError::Io(err))
    }
}

impl FormatEnumerator for V4l2Device {
    fn enumerate_formats(&self, buffer_type: BufferType) -> Result<Vec<FormatDescription>> {
        let mut formats = Vec::new();
        for index in 0.. {
            let mut desc = FmtDesc {
                index,
                buffer_type: buffer_type as u32,
                ..FmtDesc::default()
            };
            if !self.enumerate(VIDIOC_ENUM_FMT, &mut desc)? {
                break;
            }
            let len = desc.description.iter().position(|b| *b == 0).unwrap_or(32);
            formats.push(FormatDescription {
                index,
                flags: desc.flags,
                description: String::from_utf8_lossy(&desc.description[..len]).into_owned(),
                pixel_format: FourCc(desc.pixel_format),
            });
        }
        log::debug!("{}: {} formats on {:?}", self.path.display(), formats.len(), buffer_type);
        Ok(formats)
    }

    fn enumerate_frame_sizes(&self, pixel_format: FourCc) -> Result<FrameSizes> {
        let mut sizes = Vec::new();
        for index in 0.. {
            let mut fse = FrameSizeEnum {
                index,
                pixel_format: pixel_format.0,
                ..FrameSizeEnum::default()
            };
            if !self.enumerate(VIDIOC_ENUM_FRAMESIZES, &mut fse)? {
                break;
            }
            let s = fse.size;
            match fse.size_type {
                FRMSIZE_TYPE_DISCRETE => sizes.push(Size {
                    width: s[0],
                    height: s[1],
                }),
                FRMSIZE_TYPE_CONTINUOUS | FRMSIZE_TYPE_STEPWISE => {
                    return Ok(FrameSizes::Stepwise {
                        min: Size {
                            width: s[0],
                            height: s[3],
                        },
                        max: Size {
                            width: s[1],
                            height: s[4],
                        },
                        step: Size {
                            width: s[2],
                            height: s[5],
                        },
                        continuous: fse.size_type == FRMSIZE_TYPE_CONTINUOUS,
                    });
                }
                other => {
                    return Err(DecoderError::FormatNotSupported(format!(
                        "frame size type {other} for {pixel_format}"
                    )));
                }
            }
        }
        if sizes.is_empty() {
            return Err(DecoderError::FormatNotSupported(format!(
                "any frame size for {pixel_format}"
            )));
        }
        sizes.sort_by_key(|s| (s.height, s.width));
        Ok(FrameSizes::Discrete(sizes))
    }
}

/// Formats and sizes of an H.264 to NV12 decoder.
#[derive(Debug, Clone)]
pub struct H264Negotiation {
    pub input_format: FormatDescription,
    pub input_sizes: FrameSizes,
    pub output_format: FormatDescription,
    pub output_sizes: FrameSizes,
}

impl fmt::Display for H264Negotiation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Input format: {}", self.input_format)?;
        writeln!(f, "Input size supported: {}", self.input_sizes)?;
        writeln!(f, "Output format: {}", self.output_format)?;
        write!(f, "Output size supported: {}", self.output_sizes)
    }
}

fn find_format<E: FormatEnumerator>(
    device: &E,
    buffer_type: BufferType,
    pixel_format: FourCc,
    what: &str,
) -> Result<FormatDescription> {
    device
        .enumerate_formats(buffer_type)?
        .into_iter()
        .find(|f| f.pixel_format == pixel_format)
        .ok_or_else(|| DecoderError::FormatNotSupported(what.to_string()))
}

/// Check that `device` decodes H.264 from its multi-planar output queue into
/// NV12 on its multi-planar capture queue.
pub fn negotiate_h264<E: FormatEnumerator>(device: &E) -> Result<H264Negotiation> {
    let input_format = find_format(
        device,
        BufferType::VideoOutputMplane,
        FourCc::H264,
        "h.264 input",
    )?;
    let output_format = find_format(
        device,
        BufferType::VideoCaptureMplane,
        FourCc::NV12,
        "decoding h.264 into NV12",
    )?;
    Ok(H264Negotiation {
        input_format,
        input_sizes: device.enumerate_frame_sizes(FourCc::H264)?,
        output_format,
        output_sizes: device.enumerate_frame_sizes(FourCc::NV12)?,
    })
}
