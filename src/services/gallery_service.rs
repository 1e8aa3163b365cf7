//! Gallery indexer: derives browsable views from the artifact directories.
//!
//! Nothing is cached. Every call lists the directories again, so the tree on
//! disk is always the source of truth.

use crate::{
    models::gallery::{ClassImages, GalleryView},
    services::materializer::{CROPS_DIR, ORIGINALS_DIR},
};
use serde::Deserialize;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::fs;

/// Suffixes shown in the gallery (case-sensitive).
const IMAGE_SUFFIXES: [&str; 3] = [".jpg", ".jpeg", ".png"];

#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("invalid gallery path `{0}`")]
    InvalidPath(String),
    #[error("`{0}` not found")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type GalleryResult<T> = Result<T, GalleryError>;

/// The two artifact trees a gallery can browse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GalleryRoot {
    Crops,
    Originals,
}

impl GalleryRoot {
    pub fn dir_name(self) -> &'static str {
        match self {
            GalleryRoot::Crops => CROPS_DIR,
            GalleryRoot::Originals => ORIGINALS_DIR,
        }
    }

    fn from_dir_name(name: &str) -> Option<Self> {
        match name {
            CROPS_DIR => Some(GalleryRoot::Crops),
            ORIGINALS_DIR => Some(GalleryRoot::Originals),
            _ => None,
        }
    }
}

/// Read-only view over the storage root.
#[derive(Clone, Debug)]
pub struct GalleryService {
    pub base_path: PathBuf,
}

impl GalleryService {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub async fn gallery(&self, root: GalleryRoot) -> GalleryResult<GalleryView> {
        Ok(list_classes(&self.base_path.join(root.dir_name())).await?)
    }

    pub async fn class_images(&self, root: GalleryRoot, class_name: &str) -> GalleryResult<ClassImages> {
        ensure_segment_safe(class_name)?;
        let images = list_class_images(&self.base_path.join(root.dir_name()), class_name).await?;
        Ok(ClassImages {
            class_name: class_name.to_string(),
            images,
        })
    }

    /// Map `detect/{class}/{file}` or `detect_original/{class}/{file}` to a
    /// path on disk, refusing anything that could escape the artifact trees.
    pub async fn resolve_artifact(&self, relative_path: &str) -> GalleryResult<PathBuf> {
        let invalid = || GalleryError::InvalidPath(relative_path.to_string());
        let segments: Vec<&str> = relative_path.split('/').collect();
        let [bucket, class_name, file_name] = segments.as_slice() else {
            return Err(invalid());
        };
        let root = GalleryRoot::from_dir_name(bucket).ok_or_else(invalid)?;
        ensure_segment_safe(class_name).map_err(|_| invalid())?;
        ensure_segment_safe(file_name).map_err(|_| invalid())?;
        if !is_image_name(file_name) {
            return Err(invalid());
        }

        let path = self
            .base_path
            .join(root.dir_name())
            .join(class_name)
            .join(file_name);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(GalleryError::NotFound(relative_path.to_string())),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(GalleryError::NotFound(relative_path.to_string()))
            }
            Err(err) => Err(GalleryError::Io(err)),
        }
    }
}

/// Reject anything that is not a single, plain path component.
fn ensure_segment_safe(segment: &str) -> GalleryResult<()> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control())
    {
        return Err(GalleryError::InvalidPath(segment.to_string()));
    }
    Ok(())
}

fn is_image_name(name: &str) -> bool {
    IMAGE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Entry names of `dir` sorted by name, or `None` if `dir` does not exist.
async fn sorted_entries(dir: &Path) -> io::Result<Option<Vec<(String, bool)>>> {
    let mut reader = match fs::read_dir(dir).await {
        Ok(reader) => reader,
        Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
            return Ok(None);
        }
        Err(err) => return Err(err),
    };

    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let is_dir = entry.file_type().await?.is_dir();
        entries.push((entry.file_name().to_string_lossy().into_owned(), is_dir));
    }
    entries.sort();
    Ok(Some(entries))
}

/// Class folders under `root` and the first image found in each.
///
/// A missing `root` yields an empty view.
pub async fn list_classes(root: &Path) -> io::Result<GalleryView> {
    let mut view = GalleryView::default();
    let Some(entries) = sorted_entries(root).await? else {
        return Ok(view);
    };

    for (name, is_dir) in entries {
        if !is_dir {
            continue;
        }
        let images = list_class_images(root, &name).await?;
        if let Some(first) = images.into_iter().next() {
            view.first_image.insert(name.clone(), first);
        }
        view.folders.push(name);
    }
    Ok(view)
}

/// Image filenames in `root/{class_name}`, sorted; empty if the folder is absent.
pub async fn list_class_images(root: &Path, class_name: &str) -> io::Result<Vec<String>> {
    let entries = sorted_entries(&root.join(class_name)).await?;
    Ok(entries
        .unwrap_or_default()
        .into_iter()
        .filter(|(name, is_dir)| !is_dir && is_image_name(name))
        .map(|(name, _)| name)
        .collect())
}
