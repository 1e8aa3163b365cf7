//! Collision-resistant file naming without shared state.
//!
//! Every name gets a suffix drawn from the thread-local CSPRNG, so concurrent
//! writers (threads, batches, processes) never need to coordinate.

use rand::RngCore;

/// Random bytes appended to stored upload names (16 hex chars).
pub const UPLOAD_SUFFIX_BYTES: usize = 8;

/// Random bytes appended to crop names (8 hex chars).
pub const CROP_SUFFIX_BYTES: usize = 4;

/// Lowercase hex rendering of `len` fresh random bytes.
pub fn random_hex(len: usize) -> String {
    let mut buf = vec![0u8; len];
    rand::rng().fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{:02x}", b)).collect()
}

/// `{stem}_{random}{ext}`; `ext` carries its leading dot (or is empty).
pub fn generate(stem: &str, ext: &str) -> String {
    format!("{}_{}{}", stem, random_hex(UPLOAD_SUFFIX_BYTES), ext)
}

/// `{stem}_{class}_{random}.jpg` for a cropped object.
pub fn crop_name(stem: &str, class_name: &str) -> String {
    format!(
        "{}_{}_{}.jpg",
        stem,
        class_name,
        random_hex(CROP_SUFFIX_BYTES)
    )
}

/// `{stem}_original.jpg`; deterministic so repeats for one class overwrite.
pub fn original_name(stem: &str) -> String {
    format!("{}_original.jpg", stem)
}
