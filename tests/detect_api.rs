use anyhow::{anyhow, Result};
use serde_json::Value;
use std::io::{Cursor, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use detect_stream::api::{ApiConfig, ApiHandle, ApiServer};
use detect_stream::{Detector, SequenceSource, StreamPipeline};

struct TestApi {
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new(model: &str) -> Result<Self> {
        let pipeline = Arc::new(StreamPipeline::new(
            Box::new(SequenceSource::solid(1, 16, 16, [0, 0, 0])),
            Detector::open(model)?,
        ));
        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
        };
        let api_handle = ApiServer::new(api_config, pipeline).spawn()?;
        Ok(Self {
            api_handle: Some(api_handle),
        })
    }

    fn handle(&self) -> &ApiHandle {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
    }

    fn post(&self, content_type: &str, body: &[u8]) -> Result<(String, String)> {
        let mut stream = TcpStream::connect(self.handle().addr)?;
        let head = format!(
            "POST /detect HTTP/1.1\r\nHost: localhost\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        stream.write_all(head.as_bytes())?;
        stream.write_all(body)?;
        read_response(&mut stream)
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

fn read_response(stream: &mut TcpStream) -> Result<(String, String)> {
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    Ok((headers, body))
}

fn png_bytes(width: u32, height: u32) -> Result<Vec<u8>> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([20, 80, 160]));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, image::ImageFormat::Png)?;
    Ok(out.into_inner())
}

fn jpeg_bytes(width: u32, height: u32) -> Result<Vec<u8>> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([200, 200, 10]));
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 85).encode_image(&image)?;
    Ok(out)
}

fn single_result(body: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(body)?;
    let results = value["results"]
        .as_array()
        .ok_or_else(|| anyhow!("results is not an array: {body}"))?;
    assert_eq!(results.len(), 1);
    Ok(results[0].clone())
}

#[test]
fn detect_accepts_multipart_upload() -> Result<()> {
    let api = TestApi::new("stub://dog")?;

    let mut body = Vec::new();
    body.extend_from_slice(
        b"--boundary42\r\nContent-Disposition: form-data; name=\"image\"; filename=\"dog.png\"\r\nContent-Type: image/png\r\n\r\n",
    );
    body.extend_from_slice(&png_bytes(200, 100)?);
    body.extend_from_slice(b"\r\n--boundary42--\r\n");

    let (headers, body) = api.post("multipart/form-data; boundary=boundary42", &body)?;
    assert!(headers.contains("200 OK"));
    assert!(headers.contains("Content-Type: application/json"));

    let result = single_result(&body)?;
    assert_eq!(result["class"], 16);
    assert_eq!(result["label"], "dog");
    let score = result["score"].as_f64().unwrap_or_default();
    assert!((score - 0.9).abs() < 1e-6);
    let bbox: Vec<f64> = result["box"]
        .as_array()
        .expect("box array")
        .iter()
        .filter_map(Value::as_f64)
        .collect();
    assert_eq!(bbox, vec![50.0, 25.0, 150.0, 75.0]);
    Ok(())
}

#[test]
fn detect_accepts_raw_jpeg_body() -> Result<()> {
    let api = TestApi::new("stub://person")?;
    let (headers, body) = api.post("image/jpeg", &jpeg_bytes(64, 64)?)?;
    assert!(headers.contains("200 OK"));
    let result = single_result(&body)?;
    assert_eq!(result["label"], "person");
    assert_eq!(result["class"], 0);
    Ok(())
}

#[test]
fn detect_without_detections_returns_empty_results() -> Result<()> {
    let api = TestApi::new("stub://")?;
    let (headers, body) = api.post("image/png", &png_bytes(32, 32)?)?;
    assert!(headers.contains("200 OK"));
    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["results"], serde_json::json!([]));
    Ok(())
}

#[test]
fn detect_rejects_undecodable_images() -> Result<()> {
    let api = TestApi::new("stub://person")?;
    let (headers, body) = api.post("image/jpeg", b"this is not a jpeg")?;
    assert!(headers.starts_with("HTTP/1.1 400 Bad Request"));
    assert!(body.contains("invalid_image"));

    let (headers, _) = api.post(
        "multipart/form-data; boundary=b",
        b"--b\r\nContent-Disposition: form-data; name=\"file\"\r\n\r\nxyz\r\n--b--\r\n",
    )?;
    assert!(headers.starts_with("HTTP/1.1 400 Bad Request"));
    Ok(())
}

#[test]
fn detect_rejects_oversized_uploads() -> Result<()> {
    let api = TestApi::new("stub://")?;
    let mut stream = TcpStream::connect(api.handle().addr)?;
    let head = format!(
        "POST /detect HTTP/1.1\r\nHost: localhost\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        16 * 1024 * 1024
    );
    stream.write_all(head.as_bytes())?;
    let (headers, _) = read_response(&mut stream)?;
    assert!(headers.starts_with("HTTP/1.1 413 Payload Too Large"));
    Ok(())
}
