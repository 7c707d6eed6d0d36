use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

const DEFAULT_ADDR: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_MODEL_PATH: &str = "yolov8n.onnx";
const DEFAULT_CAMERA: &str = "0";

#[derive(Debug, Deserialize, Default)]
struct StreamdConfigFile {
    server: Option<ServerConfigFile>,
    model_path: Option<String>,
    camera: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    addr: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamdConfig {
    pub addr: String,
    pub port: u16,
    pub model_path: String,
    pub camera: String,
}

impl Default for StreamdConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            port: DEFAULT_PORT,
            model_path: DEFAULT_MODEL_PATH.to_string(),
            camera: DEFAULT_CAMERA.to_string(),
        }
    }
}

impl StreamdConfig {
    /// Defaults, then the file named by `DETECT_STREAM_CONFIG`, then `DETECT_STREAM_*`
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let cfg = Self::load_unvalidated()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Same layering as `load` without the final `validate`, for callers that apply
    /// further overrides (command-line flags) and validate the result themselves.
    pub fn load_unvalidated() -> Result<Self> {
        let config_path = std::env::var("DETECT_STREAM_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn from_file(file: StreamdConfigFile) -> Self {
        let defaults = Self::default();
        let server = file.server.unwrap_or_default();
        Self {
            addr: server.addr.unwrap_or(defaults.addr),
            port: server.port.unwrap_or(defaults.port),
            model_path: file.model_path.unwrap_or(defaults.model_path),
            camera: file.camera.unwrap_or(defaults.camera),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("DETECT_STREAM_ADDR") {
            if !addr.trim().is_empty() {
                self.addr = addr.trim().to_string();
            }
        }
        if let Ok(port) = std::env::var("DETECT_STREAM_PORT") {
            if !port.trim().is_empty() {
                self.port = port
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("DETECT_STREAM_PORT must be a port number, got '{}'", port))?;
            }
        }
        if let Ok(model) = std::env::var("DETECT_STREAM_MODEL") {
            if !model.trim().is_empty() {
                self.model_path = model;
            }
        }
        if let Ok(camera) = std::env::var("DETECT_STREAM_CAMERA") {
            if !camera.trim().is_empty() {
                self.camera = camera.trim().to_string();
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.addr
            .parse::<IpAddr>()
            .map_err(|_| anyhow!("bind address '{}' is not an IP address", self.addr))?;
        if self.model_path.trim().is_empty() {
            return Err(anyhow!("model path must not be empty"));
        }
        if self.camera.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .addr
            .parse()
            .map_err(|_| anyhow!("bind address '{}' is not an IP address", self.addr))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

fn read_config_file(path: &Path) -> Result<StreamdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
