//! detect_streamd - live object detection over MJPEG
//!
//! This daemon:
//! 1. Opens the configured camera (fatal if it cannot)
//! 2. Loads the detection model
//! 3. Serves annotated frames on GET /video until Ctrl-C

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::mpsc;
use std::sync::Arc;

use detect_stream::{
    api::{ApiConfig, ApiServer},
    open_source, Detector, StreamPipeline, StreamdConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Stream camera frames annotated with object detections")]
struct Args {
    /// Bind address (overrides DETECT_STREAM_ADDR and the config file).
    #[arg(long)]
    addr: Option<String>,

    /// Listen port.
    #[arg(long)]
    port: Option<u16>,

    /// ONNX model path, or stub://[label] for the stub detector.
    #[arg(long)]
    model: Option<String>,

    /// Camera index, device path, or stub://name for synthetic frames.
    #[arg(long)]
    camera: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = StreamdConfig::load_unvalidated()?;
    if let Some(addr) = args.addr {
        config.addr = addr;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(model) = args.model {
        config.model_path = model;
    }
    if let Some(camera) = args.camera {
        config.camera = camera;
    }
    config.validate()?;

    let mut source = open_source(&config.camera)?;
    source
        .connect()
        .with_context(|| format!("failed to open camera '{}'", config.camera))?;

    let mut detector = Detector::open(&config.model_path)
        .with_context(|| format!("failed to load model '{}'", config.model_path))?;
    detector.warm_up()?;
    log::info!(
        "detector '{}' ready ({})",
        detector.backend_name(),
        config.model_path
    );

    let pipeline = Arc::new(StreamPipeline::new(source, detector));
    let api_config = ApiConfig {
        addr: config.bind_addr()?.to_string(),
    };
    let api_handle = ApiServer::new(api_config, pipeline).spawn()?;
    log::info!("video stream at http://{}/video", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("detect_streamd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping server...");
    api_handle.stop()?;

    Ok(())
}
