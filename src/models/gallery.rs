//! Read-only views derived from the class-bucketed directory tree.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Class folders under one artifact root plus a cover image for each.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct GalleryView {
    pub folders: Vec<String>,

    /// Classes without any image are absent from this map.
    pub first_image: BTreeMap<String, String>,
}

/// All images of a single class folder.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ClassImages {
    pub class_name: String,
    pub images: Vec<String>,
}
