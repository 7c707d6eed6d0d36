//! multipart/x-mixed-replace framing.

use std::io::{self, Write};

use crate::encode::EncodedFrame;
use crate::pipeline::{FramePipeline, StreamEnd};

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Response head for a stream. The body runs until the connection closes.
pub fn write_head<W: Write>(out: &mut W) -> io::Result<()> {
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {CONTENT_TYPE}\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n"
    );
    out.write_all(head.as_bytes())?;
    out.flush()
}

/// One body part: boundary, part header, JPEG bytes.
pub fn write_part<W: Write>(out: &mut W, frame: &EncodedFrame) -> io::Result<()> {
    out.write_all(b"--")?;
    out.write_all(BOUNDARY.as_bytes())?;
    out.write_all(b"\r\nContent-Type: image/jpeg\r\n\r\n")?;
    out.write_all(&frame.jpeg)?;
    out.write_all(b"\r\n")?;
    out.flush()
}

/// Drain the pipeline into `out`, one part per frame.
///
/// A failed write abandons the pipeline so no further frames are captured.
pub fn write_stream<W: Write>(out: &mut W, frames: &mut FramePipeline<'_>) -> StreamEnd {
    while let Some(frame) = frames.next() {
        if let Err(err) = write_part(out, &frame) {
            log::debug!("stream write failed after {} frames: {}", frames.frames() - 1, err);
            frames.abandon(StreamEnd::ClientDisconnect);
            break;
        }
    }
    frames.end_reason().unwrap_or(StreamEnd::EndOfStream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Detector, StubBackend};
    use crate::ingest::SequenceSource;
    use crate::pipeline::StreamPipeline;
    use anyhow::Result;
    use std::sync::atomic::AtomicBool;

    struct BrokenPipe {
        accepted: usize,
        limit: usize,
    }

    impl Write for BrokenPipe {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.accepted >= self.limit {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"));
            }
            self.accepted += 1;
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn part_layout() -> Result<()> {
        let frame = EncodedFrame {
            jpeg: vec![0xFF, 0xD8, 0xFF, 0xD9],
            width: 1,
            height: 1,
            sequence: 1,
        };
        let mut out = Vec::new();
        write_part(&mut out, &frame)?;
        assert_eq!(
            out,
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8\xFF\xD9\r\n".to_vec()
        );
        Ok(())
    }

    #[test]
    fn stream_writes_one_part_per_frame() -> Result<()> {
        let pipeline = StreamPipeline::new(
            Box::new(SequenceSource::solid(3, 32, 24, [9, 9, 9])),
            Detector::new(StubBackend::new()),
        );
        let shutdown = AtomicBool::new(false);
        let mut frames = pipeline.try_stream(&shutdown)?.expect("source free");

        let mut out = Vec::new();
        let end = write_stream(&mut out, &mut frames);
        assert_eq!(end, StreamEnd::EndOfStream);

        let text = String::from_utf8_lossy(&out);
        assert_eq!(text.matches("--frame\r\n").count(), 3);
        Ok(())
    }

    #[test]
    fn write_failure_is_a_client_disconnect() -> Result<()> {
        let pipeline = StreamPipeline::new(
            Box::new(SequenceSource::solid(10, 16, 16, [0, 0, 0])),
            Detector::new(StubBackend::new()),
        );
        let shutdown = AtomicBool::new(false);
        let mut frames = pipeline.try_stream(&shutdown)?.expect("source free");

        let mut out = BrokenPipe {
            accepted: 0,
            limit: 6,
        };
        let end = write_stream(&mut out, &mut frames);
        assert_eq!(end, StreamEnd::ClientDisconnect);
        assert_eq!(frames.frames(), 2);
        Ok(())
    }
}
