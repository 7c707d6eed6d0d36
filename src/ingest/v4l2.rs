//! V4L2 camera source.
//!
//! Opens a local device node (e.g. /dev/video0) once, requests 640x480 RGB3 and
//! normalizes whatever layout the driver settles on (RGB3, YUYV, NV12, MJPG) to RGB8.
//! Frames are copied out of the mmap ring before being handed downstream.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::{normalize_to_rgb, FrameSource, PixelFormat, SourceStats, CAPTURE_HEIGHT, CAPTURE_WIDTH};
use crate::frame::Frame;

const MMAP_BUFFERS: u32 = 4;

pub struct V4l2Source {
    device: String,
    state: Option<DeviceState>,
    format: PixelFormat,
    active_width: u32,
    active_height: u32,
    frame_count: u64,
    last_error: Option<String>,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this>,
}

impl V4l2Source {
    pub fn new(device: String) -> Self {
        Self {
            device,
            state: None,
            format: PixelFormat::Rgb24,
            active_width: CAPTURE_WIDTH,
            active_height: CAPTURE_HEIGHT,
            frame_count: 0,
            last_error: None,
        }
    }

    fn open(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.device)
            .with_context(|| format!("open v4l2 device {}", self.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = CAPTURE_WIDTH;
        format.height = CAPTURE_HEIGHT;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Source: failed to set format on {}: {}", self.device, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        self.format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} negotiated unsupported pixel format {}",
                self.device,
                format.fourcc
            )
        })?;
        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, MMAP_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);
        self.last_error = None;

        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?})",
            self.device,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }
}

impl FrameSource for V4l2Source {
    fn connect(&mut self) -> Result<()> {
        self.open().map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let captured = state.with_stream_mut(|stream| {
            stream.next().map(|(buf, meta)| {
                let used = meta.bytesused as usize;
                if used > 0 && used <= buf.len() {
                    buf[..used].to_vec()
                } else {
                    buf.to_vec()
                }
            })
        });
        let raw = match captured {
            Ok(raw) => raw,
            Err(err) => {
                self.last_error = Some(err.to_string());
                return Err(anyhow::Error::new(err).context("capture v4l2 frame"));
            }
        };

        let rgb = normalize_to_rgb(&raw, self.active_width, self.active_height, self.format)?;
        self.frame_count += 1;
        Frame::from_rgb(rgb, self.active_width, self.active_height).map(Some)
    }

    fn restart(&mut self) -> Result<()> {
        if self.last_error.is_none() && self.state.is_some() {
            return Ok(());
        }
        log::info!("V4l2Source: reopening {} after capture failure", self.device);
        self.state = None;
        self.connect()
    }

    fn is_healthy(&self) -> bool {
        self.state.is_some() && self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.device.clone(),
        }
    }
}
