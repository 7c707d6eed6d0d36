//! HTTP front end.
//!
//! A small HTTP/1.1 responder on `std::net::TcpListener`. The accept loop polls a
//! non-blocking listener against a shutdown flag and hands each connection to its own
//! thread; every response closes its connection.
//!
//! Routes:
//! - `GET /video`   MJPEG stream of annotated frames (one viewer at a time)
//! - `GET /health`  source and detector status
//! - `POST /detect` one-shot detection on an uploaded image
//! - `GET /`        viewer page

pub mod mjpeg;
pub mod request;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::detect::DetectionReport;
use crate::frame::Frame;
use crate::pipeline::{StreamEnd, StreamPipeline};
use request::{read_request, HttpRequest, PayloadTooLarge, READ_TIMEOUT};

const ACCEPT_POLL: Duration = Duration::from_millis(50);

const INDEX_HTML: &str = "<!doctype html>\n<html>\n<head><title>detect-stream</title></head>\n<body style=\"margin:0;background:#111\">\n<img src=\"/video\" alt=\"live detections\" style=\"display:block;margin:auto;max-width:100%\">\n</body>\n</html>\n";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5000".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Signal the accept loop and any running stream, then wait for open connections.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    pipeline: Arc<StreamPipeline>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, pipeline: Arc<StreamPipeline>) -> Self {
        Self { cfg, pipeline }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid bind address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind {}", configured_addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let pipeline = self.pipeline;
        let join = std::thread::Builder::new()
            .name("http-accept".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, pipeline, shutdown_thread) {
                    log::error!("http server stopped: {:#}", err);
                }
            })?;

        log::info!("serving on http://{}", addr);
        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    pipeline: Arc<StreamPipeline>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        workers.retain(|worker| !worker.is_finished());
        match listener.accept() {
            Ok((stream, peer)) => {
                let pipeline = pipeline.clone();
                let shutdown = shutdown.clone();
                let spawned = std::thread::Builder::new()
                    .name(format!("http-{}", peer))
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &pipeline, &shutdown) {
                            log::warn!("request from {} failed: {:#}", peer, err);
                        }
                    });
                match spawned {
                    Ok(worker) => workers.push(worker),
                    Err(err) => log::error!("failed to spawn connection thread: {}", err),
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }

    log::info!("http server shutting down ({} open connections)", workers.len());
    for worker in workers {
        if worker.join().is_err() {
            log::error!("connection thread panicked");
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    pipeline: &StreamPipeline,
    shutdown: &AtomicBool,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            if let Some(too_large) = err.downcast_ref::<PayloadTooLarge>() {
                log::debug!("rejecting upload: {}", too_large);
                return write_json_response(&mut stream, 413, r#"{"error":"payload_too_large"}"#);
            }
            let _ = write_json_response(&mut stream, 400, r#"{"error":"bad_request"}"#);
            return Err(err);
        }
    };
    log::debug!("{} {}", request.method, request.path);

    let allowed = match request.path.as_str() {
        "/" | "/video" | "/health" => "GET",
        "/detect" => "POST",
        _ => return write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    };
    if request.method != allowed {
        return write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#);
    }

    match request.path.as_str() {
        "/" => write_response(
            &mut stream,
            200,
            "text/html; charset=utf-8",
            INDEX_HTML.as_bytes(),
        ),
        "/video" => serve_video(stream, pipeline, shutdown),
        "/health" => serve_health(&mut stream, pipeline),
        _ => serve_detect(&mut stream, pipeline, &request),
    }
}

fn serve_video(
    mut stream: TcpStream,
    pipeline: &StreamPipeline,
    shutdown: &AtomicBool,
) -> Result<()> {
    let mut frames = match pipeline.try_stream(shutdown) {
        Ok(Some(frames)) => frames,
        Ok(None) => {
            log::info!("refusing second viewer; stream already active");
            return write_json_response(&mut stream, 503, r#"{"error":"stream_busy"}"#);
        }
        Err(err) => {
            log::error!("cannot start stream: {:#}", err);
            return write_json_response(&mut stream, 503, r#"{"error":"capture_unavailable"}"#);
        }
    };

    let started = Instant::now();
    let end = match mjpeg::write_head(&mut stream) {
        Ok(()) => mjpeg::write_stream(&mut stream, &mut frames),
        Err(err) => {
            log::debug!("client left before stream start: {}", err);
            frames.abandon(StreamEnd::ClientDisconnect);
            StreamEnd::ClientDisconnect
        }
    };
    let sent = frames.frames();
    drop(frames);

    let elapsed = started.elapsed().as_secs_f64();
    if end.is_failure() {
        log::warn!("stream ended by {} after {} frames ({:.1}s)", end, sent, elapsed);
    } else {
        log::info!("stream ended by {} after {} frames ({:.1}s)", end, sent, elapsed);
    }
    Ok(())
}

fn serve_health(stream: &mut TcpStream, pipeline: &StreamPipeline) -> Result<()> {
    let status = pipeline.source_status();
    let body = serde_json::json!({
        "status": "ok",
        "streaming": pipeline.is_streaming(),
        "source": {
            "device": status.stats.device,
            "frames_captured": status.stats.frames_captured,
            "healthy": status.healthy,
        },
        "detector": pipeline.detector_name(),
    });
    let payload = serde_json::to_vec(&body)?;
    write_response(stream, 200, "application/json", &payload)
}

#[derive(Serialize)]
struct DetectResponse {
    results: Vec<DetectionReport>,
}

fn serve_detect(
    stream: &mut TcpStream,
    pipeline: &StreamPipeline,
    request: &HttpRequest,
) -> Result<()> {
    let frame = match request.image_payload().and_then(decode_upload) {
        Ok(frame) => frame,
        Err(err) => {
            log::debug!("rejecting upload: {:#}", err);
            return write_json_response(stream, 400, r#"{"error":"invalid_image"}"#);
        }
    };

    let detections = match pipeline.detect(&frame) {
        Ok(detections) => detections,
        Err(err) => {
            log::error!("inference failed for upload: {:#}", err);
            return write_json_response(stream, 500, r#"{"error":"inference_failed"}"#);
        }
    };
    let response = DetectResponse {
        results: detections.iter().map(|d| d.report()).collect(),
    };
    let payload = serde_json::to_vec(&response)?;
    write_response(stream, 200, "application/json", &payload)
}

fn decode_upload(bytes: &[u8]) -> Result<Frame> {
    let image = image::load_from_memory(bytes).context("decode uploaded image")?;
    Ok(Frame::from_image(image.to_rgb8()))
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response<W: Write>(
    stream: &mut W,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_has_length_and_status() -> Result<()> {
        let mut out = Vec::new();
        write_response(&mut out, 413, "application/json", b"{}")?;
        let text = String::from_utf8(out)?;
        assert!(text.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\n{}"));
        Ok(())
    }

    #[test]
    fn uploads_must_be_images() {
        assert!(decode_upload(b"definitely not an image").is_err());
    }
}
