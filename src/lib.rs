//! detect-stream
//!
//! Captures frames from a local camera, runs an object detector on each one, draws the
//! detections into the frame and serves the result as an MJPEG stream over HTTP.
//!
//! # Module Structure
//!
//! - `frame`: owned RGB8 frames
//! - `ingest`: capture sources (V4L2, synthetic, fixed sequences)
//! - `detect`: detector backends, YOLO decoding, annotation
//! - `encode`: JPEG compression
//! - `pipeline`: pull-based capture → detect → encode iterator
//! - `api`: HTTP server (`/video`, `/health`, `/detect`)
//! - `config`: daemon configuration

pub mod api;
pub mod config;
pub mod detect;
pub mod encode;
pub mod frame;
pub mod ingest;
pub mod pipeline;

pub use api::{ApiConfig, ApiHandle, ApiServer};
pub use config::StreamdConfig;
pub use detect::{BoundingBox, Detection, DetectionReport, Detector, DetectorBackend};
pub use encode::{EncodedFrame, JpegEncoder};
pub use frame::Frame;
pub use ingest::{open_source, FrameSource, SequenceSource, SourceStats, SyntheticSource};
pub use pipeline::{FramePipeline, SourceStatus, StreamEnd, StreamPipeline};
