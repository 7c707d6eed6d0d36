//! detect_image - run the detector on a single image file
//!
//! Writes an annotated JPEG next to the input (or to --output) and prints the
//! detections as JSON in the same shape POST /detect returns.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use detect_stream::{Detector, Frame, JpegEncoder};

#[derive(Parser, Debug)]
#[command(author, version, about = "Detect objects in an image file")]
struct Args {
    /// Image to analyse (any format the image crate decodes: JPEG, PNG).
    input: PathBuf,

    /// ONNX model path, or stub://[label] for the stub detector.
    #[arg(long, env = "DETECT_STREAM_MODEL", default_value = "yolov8n.onnx")]
    model: String,

    /// Annotated JPEG output path (default: <input>.detections.jpg).
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let image = image::open(&args.input)
        .with_context(|| format!("failed to read image {}", args.input.display()))?
        .to_rgb8();
    let mut frame = Frame::from_image(image);

    let mut detector = Detector::open(&args.model)
        .with_context(|| format!("failed to load model '{}'", args.model))?;
    let detections = detector.detect(&frame)?;
    detect_stream::detect::annotate(&mut frame, &detections);

    let output = args
        .output
        .unwrap_or_else(|| args.input.with_extension("detections.jpg"));
    let encoded = JpegEncoder::new().encode(frame, 1)?;
    std::fs::write(&output, &encoded.jpeg)
        .with_context(|| format!("failed to write {}", output.display()))?;
    log::info!(
        "{} detections, annotated image written to {}",
        detections.len(),
        output.display()
    );

    let reports: Vec<_> = detections.iter().map(|d| d.report()).collect();
    let json = serde_json::json!({ "results": reports });
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
