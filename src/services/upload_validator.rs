//! Upload filtering by extension and reserved system filenames.

use crate::models::upload::{MediaKind, UploadNotice, UploadedFile};
use thiserror::Error;

pub const STILL_EXTENSIONS: [&str; 10] = [
    "bmp", "dng", "jpeg", "jpg", "mpo", "png", "tif", "tiff", "webp", "pfm",
];

pub const VIDEO_EXTENSIONS: [&str; 11] = [
    "asf", "avi", "gif", "m4v", "mkv", "mov", "mp4", "mpeg", "mpg", "ts", "wmv",
];

/// Files some desktops drop into folders; never treated as media.
const RESERVED_FILENAMES: [&str; 1] = ["desktop.ini"];

/// Why an upload was turned away.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("`{0}` is a system file")]
    SystemFile(String),
    #[error("`{filename}` has unsupported type `.{extension}`")]
    UnsupportedExtension { filename: String, extension: String },
    #[error("`{0}` has no file extension")]
    MissingExtension(String),
}

/// An upload that passed validation.
#[derive(Clone, Debug)]
pub struct AcceptedUpload {
    pub file: UploadedFile,
    /// Client filename with any directory parts removed.
    pub filename: String,
    pub stem: String,
    /// Lower-cased, without the dot.
    pub extension: String,
    pub kind: MediaKind,
}

/// Split of a candidate list into accepted files and user-facing notices.
#[derive(Debug, Default)]
pub struct ValidationOutcome {
    pub accepted: Vec<AcceptedUpload>,
    pub notices: Vec<UploadNotice>,
}

/// Keep only the last path component; browsers on some platforms send full paths.
pub fn base_filename(raw: &str) -> &str {
    raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim()
}

/// Split `name` into stem and lower-cased extension the way a path would:
/// a leading dot does not start an extension.
fn split_extension(name: &str) -> Option<(&str, String)> {
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => {
            Some((&name[..pos], name[pos + 1..].to_ascii_lowercase()))
        }
        _ => None,
    }
}

pub fn media_kind(extension: &str) -> Option<MediaKind> {
    if STILL_EXTENSIONS.contains(&extension) {
        Some(MediaKind::Still)
    } else if VIDEO_EXTENSIONS.contains(&extension) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

/// Validate one upload. Files with an empty name yield `Ok(None)`: there is
/// nothing to report about them.
pub fn validate(file: UploadedFile) -> Result<Option<AcceptedUpload>, RejectReason> {
    let filename = base_filename(&file.filename).to_string();
    if filename.is_empty() {
        return Ok(None);
    }

    if RESERVED_FILENAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(&filename))
    {
        return Err(RejectReason::SystemFile(filename));
    }

    let Some((stem, extension)) = split_extension(&filename) else {
        return Err(RejectReason::MissingExtension(filename));
    };
    let Some(kind) = media_kind(&extension) else {
        return Err(RejectReason::UnsupportedExtension {
            filename,
            extension,
        });
    };

    let stem = stem.to_string();
    Ok(Some(AcceptedUpload {
        file,
        filename,
        stem,
        extension,
        kind,
    }))
}

/// Validate a whole upload set. Rejections never abort the batch.
pub fn filter_uploads(files: Vec<UploadedFile>) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::default();
    for file in files {
        let raw_name = file.filename.clone();
        match validate(file) {
            Ok(Some(accepted)) => outcome.accepted.push(accepted),
            Ok(None) => {}
            Err(reason) => {
                tracing::warn!("rejected upload {}: {}", raw_name, reason);
                outcome.notices.push(UploadNotice {
                    filename: base_filename(&raw_name).to_string(),
                    message: reason.to_string(),
                });
            }
        }
    }
    outcome
}
