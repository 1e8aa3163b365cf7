//! Raw detector output: a class label plus an optional bounding box.

use serde::{Deserialize, Serialize};

/// Label used when the detector omits a class or emits one that cannot be
/// used as a directory name.
pub const UNKNOWN_CLASS: &str = "unknown";

/// Axis-aligned box in source-image pixels, top-left origin.
///
/// On the wire this is the four-element array `[x, y, w, h]`; values may be
/// integers or floats.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Corners rounded to whole pixels, as `(left, top, width, height)`.
    ///
    /// The rectangle may extend past the image; `None` when the rounded box
    /// has no area or a coordinate is not finite.
    pub fn pixel_rect(&self) -> Option<(i64, i64, u32, u32)> {
        let corners = [self.x, self.y, self.x + self.width, self.y + self.height];
        if corners.iter().any(|c| !c.is_finite()) {
            return None;
        }
        let [left, top, right, bottom] = corners.map(|c| c.round() as i64);
        let width = u32::try_from(right - left).ok().filter(|w| *w > 0)?;
        let height = u32::try_from(bottom - top).ok().filter(|h| *h > 0)?;
        Some((left, top, width, height))
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from([x, y, width, height]: [f64; 4]) -> Self {
        Self::new(x, y, width, height)
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x, b.y, b.width, b.height]
    }
}

/// One object reported by the detection model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Detection {
    /// Class label. Serialized as `class` to match the detector protocol.
    #[serde(rename = "class", default = "unknown_class")]
    pub class_name: String,

    /// `None` means the class applies to the whole image and no crop is made.
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
}

impl Detection {
    #[cfg(test)]
    pub fn new(class_name: impl Into<String>, bbox: Option<BoundingBox>) -> Self {
        Self {
            class_name: class_name.into(),
            bbox,
        }
    }

    /// Class label made safe for use as a single directory name.
    ///
    /// Path separators and control characters become `_`; empty, `.` and
    /// `..` labels collapse to [`UNKNOWN_CLASS`].
    pub fn folder_name(&self) -> String {
        let cleaned: String = self
            .class_name
            .trim()
            .chars()
            .map(|c| {
                if c == '/' || c == '\\' || c.is_control() {
                    '_'
                } else {
                    c
                }
            })
            .collect();

        match cleaned.as_str() {
            "" | "." | ".." => UNKNOWN_CLASS.to_string(),
            _ => cleaned,
        }
    }
}

fn unknown_class() -> String {
    UNKNOWN_CLASS.to_string()
}
