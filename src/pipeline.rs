//! Capture → detect → encode, pulled one frame at a time.
//!
//! `StreamPipeline` owns the shared capture handle and detector. A stream borrows the
//! capture handle exclusively for its whole lifetime through `FramePipeline`, an
//! iterator that yields encoded frames until the source ends or a stage fails. Once it
//! returns `None` it stays exhausted and `end_reason` says why.

use anyhow::{anyhow, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};

use crate::detect::{Detection, Detector};
use crate::encode::{EncodedFrame, JpegEncoder};
use crate::frame::Frame;
use crate::ingest::{FrameSource, SourceStats};

/// Why a stream stopped producing frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    EndOfStream,
    CaptureFailure,
    InferenceFailure,
    EncodeFailure,
    ClientDisconnect,
    Shutdown,
}

impl StreamEnd {
    /// Ends that the operator should hear about.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            StreamEnd::CaptureFailure | StreamEnd::InferenceFailure | StreamEnd::EncodeFailure
        )
    }
}

impl fmt::Display for StreamEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamEnd::EndOfStream => "end of stream",
            StreamEnd::CaptureFailure => "capture failure",
            StreamEnd::InferenceFailure => "inference failure",
            StreamEnd::EncodeFailure => "encode failure",
            StreamEnd::ClientDisconnect => "client disconnect",
            StreamEnd::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Last observed state of the capture source, readable while a stream holds it.
#[derive(Clone, Debug, Default)]
pub struct SourceStatus {
    pub stats: SourceStats,
    pub healthy: bool,
}

impl SourceStatus {
    fn of(source: &dyn FrameSource) -> Self {
        Self {
            stats: source.stats(),
            healthy: source.is_healthy(),
        }
    }
}

pub struct StreamPipeline {
    source: Mutex<Box<dyn FrameSource>>,
    detector: Mutex<Detector>,
    encoder: JpegEncoder,
    streaming: AtomicBool,
    status: Mutex<SourceStatus>,
    detector_name: &'static str,
}

impl StreamPipeline {
    /// The source is expected to be connected already.
    pub fn new(source: Box<dyn FrameSource>, detector: Detector) -> Self {
        let status = SourceStatus::of(source.as_ref());
        let detector_name = detector.backend_name();
        Self {
            source: Mutex::new(source),
            detector: Mutex::new(detector),
            encoder: JpegEncoder::new(),
            streaming: AtomicBool::new(false),
            status: Mutex::new(status),
            detector_name,
        }
    }

    /// Start a stream if the capture source is free.
    ///
    /// Returns `Ok(None)` while another stream holds the source. The source is
    /// restarted before the first frame so every stream starts from the same state.
    pub fn try_stream<'a>(&'a self, shutdown: &'a AtomicBool) -> Result<Option<FramePipeline<'a>>> {
        let mut source = match self.source.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Ok(None),
            Err(TryLockError::Poisoned(_)) => return Err(anyhow!("capture source lock poisoned")),
        };
        if let Err(err) = source.restart() {
            self.record_status(&**source);
            return Err(err.context("restart capture source"));
        }
        self.streaming.store(true, Ordering::SeqCst);
        Ok(Some(FramePipeline {
            owner: self,
            source,
            shutdown,
            sequence: 0,
            end: None,
        }))
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    pub fn source_status(&self) -> SourceStatus {
        self.status
            .lock()
            .map(|status| status.clone())
            .unwrap_or_default()
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector_name
    }

    /// One-shot inference, interleaved with any running stream.
    pub fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut detector = self
            .detector
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))?;
        detector.detect(frame)
    }

    fn annotate(&self, frame: Frame) -> Result<Frame> {
        let mut detector = self
            .detector
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))?;
        detector.detect_and_annotate(frame)
    }

    fn record_status(&self, source: &dyn FrameSource) {
        if let Ok(mut status) = self.status.lock() {
            *status = SourceStatus::of(source);
        }
    }
}

/// One stream's worth of frames.
pub struct FramePipeline<'a> {
    owner: &'a StreamPipeline,
    source: MutexGuard<'a, Box<dyn FrameSource>>,
    shutdown: &'a AtomicBool,
    sequence: u64,
    end: Option<StreamEnd>,
}

impl<'a> FramePipeline<'a> {
    /// Frames yielded so far.
    pub fn frames(&self) -> u64 {
        self.sequence
    }

    /// Set once the iterator is exhausted.
    pub fn end_reason(&self) -> Option<StreamEnd> {
        self.end
    }

    /// Stop pulling frames. The first recorded reason wins.
    pub fn abandon(&mut self, reason: StreamEnd) {
        self.end.get_or_insert(reason);
    }

    fn pull(&mut self) -> std::result::Result<EncodedFrame, StreamEnd> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(StreamEnd::Shutdown);
        }

        let captured = self.source.next_frame();
        self.owner.record_status(&**self.source);
        let frame = match captured {
            Ok(Some(frame)) => frame,
            Ok(None) => return Err(StreamEnd::EndOfStream),
            Err(err) => {
                log::warn!("capture failed after {} frames: {:#}", self.sequence, err);
                return Err(StreamEnd::CaptureFailure);
            }
        };

        let annotated = self.owner.annotate(frame).map_err(|err| {
            log::error!("inference failed on frame {}: {:#}", self.sequence + 1, err);
            StreamEnd::InferenceFailure
        })?;

        let encoded = self
            .owner
            .encoder
            .encode(annotated, self.sequence + 1)
            .map_err(|err| {
                log::error!("encode failed on frame {}: {:#}", self.sequence + 1, err);
                StreamEnd::EncodeFailure
            })?;
        self.sequence = encoded.sequence;
        Ok(encoded)
    }
}

impl Iterator for FramePipeline<'_> {
    type Item = EncodedFrame;

    fn next(&mut self) -> Option<EncodedFrame> {
        if self.end.is_some() {
            return None;
        }
        match self.pull() {
            Ok(frame) => Some(frame),
            Err(reason) => {
                self.end = Some(reason);
                None
            }
        }
    }
}

impl Drop for FramePipeline<'_> {
    fn drop(&mut self) {
        self.owner.streaming.store(false, Ordering::SeqCst);
    }
}
