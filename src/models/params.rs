//! Inference parameters handed to the detection collaborator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParamsError {
    #[error("{name} must be within [0, 1], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f32 },
    #[error("image size must have one or two values, got {0}")]
    ImageSizeArity(usize),
    #[error("image size values must be positive")]
    ZeroImageSize,
    #[error("max_det must be at least 1")]
    ZeroMaxDetections,
    #[error("vid_stride must be at least 1")]
    ZeroVideoStride,
    #[error("at least one weights path is required")]
    MissingWeights,
    #[error("invalid value `{value}` for {name}")]
    Unparsable { name: &'static str, value: String },
}

/// Options understood by the detector. Field names follow the detector's own
/// flag names so the JSON form can be forwarded as-is.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DetectionParams {
    /// Model weights paths (or a serving URL).
    pub weights: Vec<String>,
    /// Dataset description consumed by some model loaders.
    pub data: String,
    /// Inference size as `[h, w]`; see [`DetectionParams::normalized`].
    pub imgsz: Vec<u32>,
    pub conf_thres: f32,
    pub iou_thres: f32,
    pub max_det: u32,
    /// Compute device, e.g. `0`, `0,1` or `cpu`. Empty picks automatically.
    pub device: String,
    /// Output root the detector may write its own results under.
    pub project: String,
    pub name: String,
    pub exist_ok: bool,
    /// Frame sampling stride for video sources.
    pub vid_stride: u32,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            weights: vec!["best.pt".into()],
            data: "models/yolov5s.yaml".into(),
            imgsz: vec![640, 640],
            conf_thres: 0.25,
            iou_thres: 0.45,
            max_det: 1000,
            device: String::new(),
            project: "detect".into(),
            name: String::new(),
            exist_ok: false,
            vid_stride: 1,
        }
    }
}

/// Per-request overrides; `None` keeps the configured default.
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ParamOverrides {
    pub conf_thres: Option<f32>,
    pub iou_thres: Option<f32>,
    pub max_det: Option<u32>,
    pub imgsz: Option<Vec<u32>>,
    pub device: Option<String>,
    pub vid_stride: Option<u32>,
}

impl ParamOverrides {
    /// Apply one textual form field. Unknown names are ignored.
    pub fn set_field(&mut self, name: &str, value: &str) -> Result<(), ParamsError> {
        let value = value.trim();
        match name {
            "conf_thres" => self.conf_thres = Some(parse_field("conf_thres", value)?),
            "iou_thres" => self.iou_thres = Some(parse_field("iou_thres", value)?),
            "max_det" => self.max_det = Some(parse_field("max_det", value)?),
            "vid_stride" => self.vid_stride = Some(parse_field("vid_stride", value)?),
            "device" => self.device = Some(value.to_string()),
            "imgsz" => {
                let sizes = value
                    .split([',', ' '])
                    .filter(|s| !s.is_empty())
                    .map(|s| parse_field("imgsz", s))
                    .collect::<Result<Vec<u32>, _>>()?;
                self.imgsz = Some(sizes);
            }
            _ => {}
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn parse_field<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ParamsError> {
    value.parse().map_err(|_| ParamsError::Unparsable {
        name,
        value: value.to_string(),
    })
}

impl DetectionParams {
    /// Expand a single image size to a square and check every bound.
    pub fn normalized(mut self) -> Result<Self, ParamsError> {
        self.imgsz = match self.imgsz.as_slice() {
            [size] => vec![*size, *size],
            [h, w] => vec![*h, *w],
            other => return Err(ParamsError::ImageSizeArity(other.len())),
        };
        if self.imgsz.contains(&0) {
            return Err(ParamsError::ZeroImageSize);
        }
        check_threshold("conf_thres", self.conf_thres)?;
        check_threshold("iou_thres", self.iou_thres)?;
        if self.max_det == 0 {
            return Err(ParamsError::ZeroMaxDetections);
        }
        if self.vid_stride == 0 {
            return Err(ParamsError::ZeroVideoStride);
        }
        if self.weights.iter().all(|w| w.trim().is_empty()) {
            return Err(ParamsError::MissingWeights);
        }
        Ok(self)
    }

    /// Copy of `self` with `overrides` applied, then normalized.
    pub fn with_overrides(&self, overrides: &ParamOverrides) -> Result<Self, ParamsError> {
        let mut params = self.clone();
        if let Some(v) = overrides.conf_thres {
            params.conf_thres = v;
        }
        if let Some(v) = overrides.iou_thres {
            params.iou_thres = v;
        }
        if let Some(v) = overrides.max_det {
            params.max_det = v;
        }
        if let Some(v) = &overrides.imgsz {
            params.imgsz = v.clone();
        }
        if let Some(v) = &overrides.device {
            params.device = v.clone();
        }
        if let Some(v) = overrides.vid_stride {
            params.vid_stride = v;
        }
        params.normalized()
    }
}

fn check_threshold(name: &'static str, value: f32) -> Result<(), ParamsError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ParamsError::ThresholdOutOfRange { name, value })
    }
}
