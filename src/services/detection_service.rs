//! Detection collaborator: an opaque model behind a process or HTTP boundary.
//!
//! The pipeline only sees the [`Detector`] trait. Two implementations ship:
//! [`CommandDetector`] runs a local program and reads JSON from its stdout,
//! [`HttpDetector`] posts to a model-serving endpoint.

use crate::models::{detection::Detection, params::DetectionParams};
use futures::future::BoxFuture;
use serde::Serialize;
use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("failed to start detector `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("detector exited with {status}: {stderr}")]
    ProcessFailed { status: String, stderr: String },
    #[error("detector request failed: {0}")]
    RequestFailed(String),
    #[error("invalid detector response: {0}")]
    InvalidResponse(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

pub type DetectionResult<T> = Result<T, DetectionError>;

/// Anything that turns a source file into a list of detections.
pub trait Detector: Send + Sync {
    fn detect<'a>(
        &'a self,
        source: &'a Path,
        params: &'a DetectionParams,
    ) -> BoxFuture<'a, DetectionResult<Vec<Detection>>>;

    /// Short label for logs.
    fn name(&self) -> &str;
}

/// Parse a detector payload. `null` and blank output mean "nothing found".
pub fn parse_detections(raw: &[u8]) -> DetectionResult<Vec<Detection>> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let parsed: Option<Vec<Detection>> = serde_json::from_slice(raw)
        .map_err(|err| DetectionError::InvalidResponse(err.to_string()))?;
    Ok(parsed.unwrap_or_default())
}

/// Runs `program args.. --source <file> <flags>` and reads detections from stdout.
#[derive(Clone, Debug)]
pub struct CommandDetector {
    program: String,
    args: Vec<String>,
}

impl CommandDetector {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a whitespace-separated command line such as `python3 detect.py`.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    /// Flags passed to the detector, in argparse style.
    pub fn flags(source: &Path, params: &DetectionParams) -> Vec<String> {
        let mut flags = vec!["--weights".to_string()];
        flags.extend(params.weights.iter().cloned());
        flags.push("--source".into());
        flags.push(source.display().to_string());
        flags.push("--data".into());
        flags.push(params.data.clone());
        flags.push("--imgsz".into());
        flags.extend(params.imgsz.iter().map(u32::to_string));
        flags.push("--conf-thres".into());
        flags.push(params.conf_thres.to_string());
        flags.push("--iou-thres".into());
        flags.push(params.iou_thres.to_string());
        flags.push("--max-det".into());
        flags.push(params.max_det.to_string());
        flags.push("--device".into());
        flags.push(params.device.clone());
        flags.push("--project".into());
        flags.push(params.project.clone());
        flags.push("--name".into());
        flags.push(params.name.clone());
        if params.exist_ok {
            flags.push("--exist-ok".into());
        }
        flags.push("--vid-stride".into());
        flags.push(params.vid_stride.to_string());
        flags
    }

    async fn run(&self, source: &Path, params: &DetectionParams) -> DetectionResult<Vec<Detection>> {
        let flags = Self::flags(source, params);
        debug!("running detector: {} {:?} {:?}", self.program, self.args, flags);

        let output = Command::new(&self.program)
            .args(&self.args)
            .args(&flags)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| DetectionError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(DetectionError::ProcessFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_detections(&output.stdout)
    }
}

impl Detector for CommandDetector {
    fn detect<'a>(
        &'a self,
        source: &'a Path,
        params: &'a DetectionParams,
    ) -> BoxFuture<'a, DetectionResult<Vec<Detection>>> {
        Box::pin(self.run(source, params))
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// Configuration for [`HttpDetector`].
#[derive(Debug, Clone)]
pub struct HttpDetectorConfig {
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Serialize)]
struct DetectRequest<'a> {
    source: PathBuf,
    config: &'a DetectionParams,
}

/// Posts `{source, config}` to `{base_url}/detect`.
pub struct HttpDetector {
    http: reqwest::Client,
    config: HttpDetectorConfig,
}

impl HttpDetector {
    pub fn new(config: HttpDetectorConfig) -> DetectionResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(DetectionError::Network)?;
        Ok(Self { http, config })
    }

    async fn request(&self, source: &Path, params: &DetectionParams) -> DetectionResult<Vec<Detection>> {
        let url = format!("{}/detect", self.config.base_url.trim_end_matches('/'));
        debug!("sending detection request for {} to {}", source.display(), url);

        let body = DetectRequest {
            source: source.to_path_buf(),
            config: params,
        };
        let response = self.http.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DetectionError::RequestFailed(format!(
                "detector returned {}: {}",
                status, body
            )));
        }

        let bytes = response.bytes().await?;
        parse_detections(&bytes)
    }
}

impl Detector for HttpDetector {
    fn detect<'a>(
        &'a self,
        source: &'a Path,
        params: &'a DetectionParams,
    ) -> BoxFuture<'a, DetectionResult<Vec<Detection>>> {
        Box::pin(self.request(source, params))
    }

    fn name(&self) -> &str {
        &self.config.base_url
    }
}
