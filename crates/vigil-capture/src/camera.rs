//! Live capture from a V4L2 device via the `v4l` crate.

use crate::source::{FrameSource, SourceError};
use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUEST_WIDTH: u32 = 640;
const REQUEST_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;
/// Consecutive undecodable buffers tolerated before the device counts as lost.
const MAX_BAD_BUFFERS: u32 = 30;

/// Negotiated pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
    /// YUYV 4:2:2 packed, two pixels per 4 bytes.
    Yuyv,
    /// Motion JPEG, one JPEG image per buffer.
    Mjpeg,
    /// Packed 8-bit RGB.
    Rgb,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpeg),
            b"RGB3" => Some(Self::Rgb),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }
}

/// Streams frames from a V4L2 capture device such as `/dev/video0`.
pub struct V4l2Source {
    path: PathBuf,
    width: u32,
    height: u32,
    format: PixelFormat,
    bad_buffers: u32,
    stream: MmapStream<'static>,
    _device: Device,
}

impl V4l2Source {
    /// Open `path`, negotiate a format (YUYV at 640x480 preferred) and start
    /// an mmap stream.
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        if !path.exists() {
            return Err(SourceError::NotFound(path.display().to_string()));
        }
        let device = Device::with_path(path)
            .map_err(|e| SourceError::Device(format!("{}: {e}", path.display())))?;

        let caps = device
            .query_caps()
            .map_err(|e| SourceError::Device(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(SourceError::Device(format!(
                "{} is not a video capture device",
                path.display()
            )));
        }
        tracing::info!(device = %path.display(), driver = %caps.driver, card = %caps.card, "opened camera");

        let mut fmt = device
            .format()
            .map_err(|e| SourceError::Device(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUEST_WIDTH;
        fmt.height = REQUEST_HEIGHT;
        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| SourceError::Device(format!("failed to set format: {e}")))?;

        let format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            SourceError::Device(format!(
                "unsupported pixel format {:?} (need YUYV, MJPG, RGB3 or GREY)",
                negotiated.fourcc
            ))
        })?;
        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| SourceError::Device(format!("failed to create mmap stream: {e}")))?;

        Ok(Self {
            path: path.to_path_buf(),
            width: negotiated.width,
            height: negotiated.height,
            format,
            bad_buffers: 0,
            stream,
            _device: device,
        })
    }
}

impl FrameSource for V4l2Source {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        loop {
            let (buf, meta) = self
                .stream
                .next()
                .map_err(|e| SourceError::Device(format!("failed to dequeue buffer: {e}")))?;

            match decode(self.format, buf, self.width, self.height) {
                Some(image) => {
                    self.bad_buffers = 0;
                    return Ok(Some(image));
                }
                None => {
                    self.bad_buffers += 1;
                    tracing::warn!(seq = meta.sequence, bytes = buf.len(), "skipping undecodable buffer");
                    if self.bad_buffers >= MAX_BAD_BUFFERS {
                        return Err(SourceError::Unreadable(self.path.display().to_string()));
                    }
                }
            }
        }
    }

    fn describe(&self) -> String {
        format!("{} ({}x{} {:?})", self.path.display(), self.width, self.height, self.format)
    }
}

/// Convert one raw buffer to RGB. `None` when the buffer is short or corrupt.
fn decode(format: PixelFormat, buf: &[u8], width: u32, height: u32) -> Option<RgbImage> {
    let pixels = (width as usize) * (height as usize);
    match format {
        PixelFormat::Yuyv => yuyv_to_rgb(buf, width, height),
        PixelFormat::Mjpeg => image::load_from_memory_with_format(buf, ImageFormat::Jpeg)
            .ok()
            .map(|img| img.to_rgb8()),
        PixelFormat::Rgb => RgbImage::from_raw(width, height, buf.get(..pixels * 3)?.to_vec()),
        PixelFormat::Grey => {
            let gray = buf.get(..pixels)?;
            RgbImage::from_raw(width, height, gray.iter().flat_map(|&y| [y, y, y]).collect())
        }
    }
}

/// BT.601 limited-range YUYV to RGB. Each 4 bytes `[Y0, U, Y1, V]` carry two
/// pixels sharing one chroma pair.
fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Option<RgbImage> {
    let expected = (width as usize) * (height as usize) * 2;
    let packed = yuyv.get(..expected)?;
    let mut rgb = Vec::with_capacity(expected / 2 * 3);
    for chunk in packed.chunks_exact(4) {
        let (u, v) = (chunk[1], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(chunk[0], u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(chunk[2], u, v));
    }
    RgbImage::from_raw(width, height, rgb)
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let clamp = |x: i32| (x >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e + 128),
        clamp(298 * c - 100 * d - 208 * e + 128),
        clamp(298 * c + 516 * d + 128),
    ]
}
