use crate::{models::params::DetectionParams, services::materializer::DEFAULT_JPEG_QUALITY};
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "DETECT_GALLERY_";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Where detections come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorBackend {
    /// Local program, e.g. `python3 detect.py`.
    Command(String),
    /// Model-serving base URL.
    Http { base_url: String, timeout: Duration },
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Root holding `detect/` and `detect_original/`.
    pub storage_dir: String,
    pub upload_dir: String,
    pub detector: DetectorBackend,
    pub max_upload_bytes: usize,
    pub jpeg_quality: u8,
    /// Defaults for every request; uploads may override some fields.
    pub params: DetectionParams,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Object-detection upload service with a class-bucketed gallery")]
pub struct Args {
    /// Host to bind to (overrides DETECT_GALLERY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DETECT_GALLERY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Root for detect/ and detect_original/ (overrides DETECT_GALLERY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Directory uploads are stored in (overrides DETECT_GALLERY_UPLOAD_DIR)
    #[arg(long)]
    pub upload_dir: Option<String>,

    /// Detector command line (overrides DETECT_GALLERY_DETECTOR_CMD)
    #[arg(long)]
    pub detector_cmd: Option<String>,

    /// Detector service URL; wins over the command (overrides DETECT_GALLERY_DETECTOR_URL)
    #[arg(long)]
    pub detector_url: Option<String>,

    /// Detector HTTP timeout in seconds (overrides DETECT_GALLERY_DETECTOR_TIMEOUT)
    #[arg(long)]
    pub detector_timeout: Option<u64>,

    /// Largest accepted upload body (overrides DETECT_GALLERY_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// JPEG quality for saved artifacts, 1-100 (overrides DETECT_GALLERY_JPEG_QUALITY)
    #[arg(long)]
    pub jpeg_quality: Option<u8>,

    /// Model weights; repeatable (overrides DETECT_GALLERY_WEIGHTS, comma separated)
    #[arg(long, num_args = 1..)]
    pub weights: Vec<String>,

    /// Inference size h,w; one value means square
    #[arg(long, alias = "img", alias = "img-size", num_args = 1..=2)]
    pub imgsz: Vec<u32>,

    /// Confidence threshold
    #[arg(long)]
    pub conf_thres: Option<f32>,

    /// NMS IoU threshold
    #[arg(long)]
    pub iou_thres: Option<f32>,

    /// Maximum detections per image
    #[arg(long)]
    pub max_det: Option<u32>,

    /// Compute device, e.g. 0 or 0,1,2,3 or cpu
    #[arg(long)]
    pub device: Option<String>,

    /// Video frame-rate stride
    #[arg(long)]
    pub vid_stride: Option<u32>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::resolve(Args::parse(), |key| env::var(key).ok())
    }

    /// Merge `args` over values from `lookup` (environment) over defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        // --- Environment fallback ---
        let env_host = var("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_var(&var, "PORT", 5000u16)?;
        let env_storage = var("STORAGE_DIR").unwrap_or_else(|| ".".into());
        let env_uploads = var("UPLOAD_DIR").unwrap_or_else(|| "./uploads".into());
        let env_cmd = var("DETECTOR_CMD").unwrap_or_else(|| "python3 detect.py".into());
        let env_url = var("DETECTOR_URL").filter(|url| !url.trim().is_empty());
        let env_timeout = parse_var(&var, "DETECTOR_TIMEOUT", 300u64)?;
        let env_max_upload = parse_var(&var, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;
        let env_quality = parse_var(&var, "JPEG_QUALITY", DEFAULT_JPEG_QUALITY)?;
        let env_weights = var("WEIGHTS").map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|w| !w.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        });

        // --- Merge ---
        let timeout = Duration::from_secs(args.detector_timeout.unwrap_or(env_timeout));
        let detector = match args.detector_url.or(env_url) {
            Some(base_url) => DetectorBackend::Http { base_url, timeout },
            None => DetectorBackend::Command(args.detector_cmd.unwrap_or(env_cmd)),
        };

        let defaults = DetectionParams::default();
        let params = DetectionParams {
            weights: if args.weights.is_empty() {
                env_weights.unwrap_or(defaults.weights)
            } else {
                args.weights
            },
            imgsz: if args.imgsz.is_empty() {
                defaults.imgsz
            } else {
                args.imgsz
            },
            conf_thres: args.conf_thres.unwrap_or(defaults.conf_thres),
            iou_thres: args.iou_thres.unwrap_or(defaults.iou_thres),
            max_det: args.max_det.unwrap_or(defaults.max_det),
            device: args.device.unwrap_or(defaults.device),
            vid_stride: args.vid_stride.unwrap_or(defaults.vid_stride),
            ..defaults
        }
        .normalized()
        .context("validating detection parameters")?;

        let jpeg_quality = args.jpeg_quality.unwrap_or(env_quality);
        if !(1..=100).contains(&jpeg_quality) {
            anyhow::bail!("jpeg quality must be within 1-100, got {}", jpeg_quality);
        }

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            upload_dir: args.upload_dir.unwrap_or(env_uploads),
            detector,
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
            jpeg_quality,
            params,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {}{} value `{}`", ENV_PREFIX, name, value)),
        None => Ok(default),
    }
}
