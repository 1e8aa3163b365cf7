//! Result materializer: turns one source image's detections into
//! class-bucketed files on disk.
//!
//! Layout beneath the storage root:
//! - `detect_original/{class}/{stem}_original.jpg`: one RGB copy of the
//!   source per class (repeat detections of a class rewrite the same file)
//! - `detect/{class}/{stem}_{class}_{8hex}.jpg`: one crop per boxed detection
//!
//! Failures are scoped to a single save. They are logged, recorded in the
//! returned [`MaterializeReport`], and processing moves on to the next item.

use crate::{
    models::{
        artifact::{ArtifactKind, MaterializeReport, SavedArtifact, StorageFailure},
        detection::{BoundingBox, Detection},
    },
    services::identifier,
};
use image::{
    DynamicImage, ExtendedColorType, ImageEncoder, ImageReader, RgbImage, codecs::jpeg::JpegEncoder,
    imageops,
};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Root folder for cropped objects.
pub const CROPS_DIR: &str = "detect";

/// Root folder for whole-image copies.
pub const ORIGINALS_DIR: &str = "detect_original";

pub const DEFAULT_JPEG_QUALITY: u8 = 75;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error("bounding box {0:?} has no area")]
    EmptyCrop(BoundingBox),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Clone, Debug)]
pub struct Materializer {
    root: PathBuf,
    jpeg_quality: u8,
}

impl Materializer {
    pub fn new(root: impl Into<PathBuf>, jpeg_quality: u8) -> Self {
        Self {
            root: root.into(),
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    /// Decode `source_path` and materialize its detections.
    ///
    /// Only decoding is fatal here; every later failure lands in the report.
    pub fn materialize_file(
        &self,
        source_path: &Path,
        detections: &[Detection],
    ) -> StorageResult<MaterializeReport> {
        // Content sniffing wins over the extension: uploads are often mislabelled.
        let image = ImageReader::open(source_path)?
            .with_guessed_format()?
            .decode()?;
        let filename = source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(self.materialize(image, detections, &filename))
    }

    /// Write originals and crops for `detections`, in order.
    ///
    /// The returned report holds exactly one artifact per detection that had
    /// a box and whose crop was saved, in detection order.
    pub fn materialize(
        &self,
        mut source_image: DynamicImage,
        detections: &[Detection],
        source_filename: &str,
    ) -> MaterializeReport {
        let stem = Path::new(source_filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| source_filename.to_string());

        let mut report = MaterializeReport::default();
        // Encoded once; every class folder gets the same bytes.
        let mut original_jpeg: Option<Vec<u8>> = None;

        for (index, detection) in detections.iter().enumerate() {
            let class_name = detection.folder_name();
            debug!("class: {}, bbox: {:?}", class_name, detection.bbox);

            if !is_rgb8(&source_image) {
                source_image = DynamicImage::ImageRgb8(source_image.to_rgb8());
            }

            if let Err(err) =
                self.save_original(&source_image, &mut original_jpeg, &stem, &class_name)
            {
                warn!(
                    "failed to save original of {} for class {}: {}",
                    source_filename, class_name, err
                );
                report.failures.push(StorageFailure {
                    detection_index: index,
                    class_name: class_name.clone(),
                    kind: ArtifactKind::Original,
                    error: err.to_string(),
                });
            }

            let Some(bbox) = detection.bbox else {
                continue;
            };

            match self.save_crop(&source_image, bbox, &stem, &class_name) {
                Ok(artifact) => report.artifacts.push(artifact),
                Err(err) => {
                    warn!(
                        "failed to save {} crop from {}: {}",
                        class_name, source_filename, err
                    );
                    report.failures.push(StorageFailure {
                        detection_index: index,
                        class_name,
                        kind: ArtifactKind::Crop,
                        error: err.to_string(),
                    });
                }
            }
        }

        report
    }

    fn save_original(
        &self,
        image: &DynamicImage,
        encoded: &mut Option<Vec<u8>>,
        stem: &str,
        class_name: &str,
    ) -> StorageResult<()> {
        let folder = ensure_class_dir(&self.root, ORIGINALS_DIR, class_name)?;
        if encoded.is_none() {
            *encoded = Some(encode_jpeg(image, self.jpeg_quality)?);
        }
        let path = folder.join(identifier::original_name(stem));
        write_atomic(&path, encoded.as_deref().unwrap_or_default())?;
        info!("original image saved to {}", path.display());
        Ok(())
    }

    fn save_crop(
        &self,
        image: &DynamicImage,
        bbox: BoundingBox,
        stem: &str,
        class_name: &str,
    ) -> StorageResult<SavedArtifact> {
        let folder = ensure_class_dir(&self.root, CROPS_DIR, class_name)?;

        let rect = bbox.pixel_rect().ok_or(StorageError::EmptyCrop(bbox))?;
        let mut cropped = crop_padded(image, rect);
        if !is_rgb8(&cropped) {
            cropped = DynamicImage::ImageRgb8(cropped.to_rgb8());
        }

        let name = identifier::crop_name(stem, class_name);
        let path = folder.join(&name);
        write_atomic(&path, &encode_jpeg(&cropped, self.jpeg_quality)?)?;
        info!("cropped image saved to {}", path.display());

        Ok(SavedArtifact {
            relative_path: format!("{}/{}/{}", CROPS_DIR, class_name, name),
            class_name: class_name.to_string(),
        })
    }
}

/// Crop `(left, top, w, h)` out of `image`. The result is always `w` x `h`;
/// whatever lies outside the source is black.
fn crop_padded(image: &DynamicImage, (left, top, width, height): (i64, i64, u32, u32)) -> DynamicImage {
    let (img_w, img_h) = (image.width() as i64, image.height() as i64);
    let inside = left >= 0
        && top >= 0
        && left + width as i64 <= img_w
        && top + height as i64 <= img_h;
    if inside {
        return image.crop_imm(left as u32, top as u32, width, height);
    }

    let mut canvas = RgbImage::new(width, height);
    let x0 = left.max(0);
    let y0 = top.max(0);
    let x1 = (left + width as i64).min(img_w);
    let y1 = (top + height as i64).min(img_h);
    if x1 > x0 && y1 > y0 {
        let visible = image
            .crop_imm(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32)
            .to_rgb8();
        imageops::replace(&mut canvas, &visible, x0 - left, y0 - top);
    }
    DynamicImage::ImageRgb8(canvas)
}

fn is_rgb8(image: &DynamicImage) -> bool {
    matches!(image, DynamicImage::ImageRgb8(_))
}

/// Create `root/{bucket}/{class}` if absent. Existing folders (including ones
/// a concurrent writer just made) are fine.
fn ensure_class_dir(root: &Path, bucket: &str, class_name: &str) -> io::Result<PathBuf> {
    let folder = root.join(bucket).join(class_name);
    if !folder.is_dir() {
        debug!("creating folder {}", folder.display());
        fs::create_dir_all(&folder)?;
    }
    Ok(folder)
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> StorageResult<Vec<u8>> {
    let rgb = image.to_rgb8();
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality).write_image(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(buffer)
}

/// Write through a `.tmp-{uuid}` sibling and rename into place so readers
/// never observe a partial file and overwrites replace whole files.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::other("artifact path missing parent directory"))?;
    let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

    if let Err(err) = fs::write(&tmp_path, bytes) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, Rgba};
    use tempfile::TempDir;

    fn rgb_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }))
    }

    fn boxed(class: &str, x: f64, y: f64, w: f64, h: f64) -> Detection {
        Detection::new(class, Some(BoundingBox::new(x, y, w, h)))
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    #[test]
    fn unboxed_detection_writes_only_the_original() {
        let dir = TempDir::new().unwrap();
        let materializer = Materializer::new(dir.path(), DEFAULT_JPEG_QUALITY);

        let report = materializer.materialize(
            rgb_image(32, 32),
            &[Detection::new("sky", None)],
            "beach_0011223344556677.jpg",
        );

        assert!(report.artifacts.is_empty());
        assert!(report.failures.is_empty());
        assert_eq!(
            files_in(&dir.path().join(ORIGINALS_DIR).join("sky")),
            ["beach_0011223344556677_original.jpg"]
        );
        assert!(!dir.path().join(CROPS_DIR).join("sky").exists());
    }

    #[test]
    fn same_class_twice_gives_one_original_and_two_crops() {
        let dir = TempDir::new().unwrap();
        let materializer = Materializer::new(dir.path(), DEFAULT_JPEG_QUALITY);

        let report = materializer.materialize(
            rgb_image(100, 80),
            &[boxed("cat", 0.0, 0.0, 20.0, 20.0), boxed("cat", 30.0, 30.0, 20.0, 20.0)],
            "pets.png",
        );

        assert_eq!(report.artifacts.len(), 2);
        assert_ne!(report.artifacts[0].relative_path, report.artifacts[1].relative_path);
        assert_eq!(files_in(&dir.path().join(ORIGINALS_DIR).join("cat")), ["pets_original.jpg"]);
        assert_eq!(files_in(&dir.path().join(CROPS_DIR).join("cat")).len(), 2);
    }

    #[test]
    fn full_bounds_box_crops_whole_image() {
        let dir = TempDir::new().unwrap();
        let materializer = Materializer::new(dir.path(), DEFAULT_JPEG_QUALITY);

        let report =
            materializer.materialize(rgb_image(64, 48), &[boxed("car", 0.0, 0.0, 64.0, 48.0)], "road.jpg");

        assert_eq!(report.artifacts.len(), 1);
        let saved = image::open(dir.path().join(&report.artifacts[0].relative_path)).unwrap();
        assert_eq!((saved.width(), saved.height()), (64, 48));
    }

    #[test]
    fn artifact_paths_round_trip_to_decodable_images() {
        let dir = TempDir::new().unwrap();
        let materializer = Materializer::new(dir.path(), DEFAULT_JPEG_QUALITY);

        let report = materializer.materialize(
            rgb_image(120, 90),
            &[
                boxed("dog", 5.0, 5.0, 40.0, 30.0),
                Detection::new("grass", None),
                boxed("ball", 60.5, 40.2, 10.0, 10.0),
            ],
            "park.jpg",
        );

        let classes: Vec<_> = report.artifacts.iter().map(|a| a.class_name.as_str()).collect();
        assert_eq!(classes, ["dog", "ball"]);
        for artifact in &report.artifacts {
            assert!(artifact.relative_path.starts_with("detect/"));
            assert!(!artifact.relative_path.contains('\\'));
            let path = dir.path().join(&artifact.relative_path);
            assert!(path.is_file());
            let decoded = image::open(&path).unwrap();
            assert!(decoded.width() > 0 && decoded.height() > 0);
        }
        assert!(artifact_name_matches(&report.artifacts[0].relative_path, "park", "dog"));
    }

    fn artifact_name_matches(relative_path: &str, stem: &str, class: &str) -> bool {
        let name = relative_path.rsplit('/').next().unwrap();
        let prefix = format!("{}_{}_", stem, class);
        name.starts_with(&prefix) && name.len() == prefix.len() + 8 + ".jpg".len()
    }

    #[test]
    fn alpha_sources_are_flattened_before_saving() {
        let dir = TempDir::new().unwrap();
        let materializer = Materializer::new(dir.path(), DEFAULT_JPEG_QUALITY);
        let rgba = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(16, 16, Rgba([10, 20, 30, 0])));

        let report = materializer.materialize(rgba, &[boxed("logo", 2.0, 2.0, 8.0, 8.0)], "logo.png");

        assert_eq!(report.artifacts.len(), 1);
        let original = image::open(dir.path().join("detect_original/logo/logo_original.jpg")).unwrap();
        assert_eq!(original.color(), image::ColorType::Rgb8);
    }

    #[test]
    fn overhanging_box_is_padded_to_its_full_size() {
        let dir = TempDir::new().unwrap();
        let materializer = Materializer::new(dir.path(), DEFAULT_JPEG_QUALITY);

        let report = materializer.materialize(
            rgb_image(64, 48),
            &[boxed("cat", -5.0, 40.0, 20.0, 20.0)],
            "edge.jpg",
        );

        assert!(report.failures.is_empty());
        assert_eq!(report.artifacts.len(), 1);
        let crop = image::open(dir.path().join(&report.artifacts[0].relative_path)).unwrap();
        assert_eq!((crop.width(), crop.height()), (20, 20));
        // Top-left corner lies left of the source and is padding.
        let corner = crop.to_rgb8().get_pixel(0, 0).0;
        assert!(corner.iter().all(|c| *c < 16), "expected black padding, got {corner:?}");
    }

    #[test]
    fn box_outside_the_image_gives_a_black_crop() {
        let dir = TempDir::new().unwrap();
        let materializer = Materializer::new(dir.path(), DEFAULT_JPEG_QUALITY);

        let report = materializer.materialize(
            rgb_image(50, 50),
            &[boxed("bird", 100.0, 100.0, 10.0, 10.0)],
            "yard.jpg",
        );

        assert!(report.failures.is_empty());
        assert_eq!(report.artifacts.len(), 1);
        let crop = image::open(dir.path().join(&report.artifacts[0].relative_path))
            .unwrap()
            .to_rgb8();
        assert_eq!(crop.dimensions(), (10, 10));
        assert!(crop.pixels().all(|p| p.0.iter().all(|c| *c < 16)));
    }

    #[test]
    fn concurrent_runs_on_one_source_keep_one_original() {
        let dir = TempDir::new().unwrap();
        let materializer = Materializer::new(dir.path(), DEFAULT_JPEG_QUALITY);

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let materializer = &materializer;
                    scope.spawn(move || {
                        materializer.materialize(
                            rgb_image(40, 40),
                            &[boxed("cat", i as f64, i as f64, 10.0, 10.0)],
                            "shared.jpg",
                        )
                    })
                })
                .collect();
            for handle in handles {
                let report = handle.join().unwrap();
                assert!(report.failures.is_empty(), "{:?}", report.failures);
                assert_eq!(report.artifacts.len(), 1);
            }
        });

        assert_eq!(
            files_in(&dir.path().join(ORIGINALS_DIR).join("cat")),
            ["shared_original.jpg"]
        );
        let crops = files_in(&dir.path().join(CROPS_DIR).join("cat"));
        assert_eq!(crops.len(), 8);
        assert!(crops.iter().all(|name| name.starts_with("shared_cat_") && name.ends_with(".jpg")));
        assert!(image::open(dir.path().join("detect_original/cat/shared_original.jpg")).is_ok());
    }

    #[test]
    fn failed_crop_does_not_stop_later_detections() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(CROPS_DIR)).unwrap();
        // A plain file where the class folder should go.
        fs::write(dir.path().join(CROPS_DIR).join("cat"), b"not a dir").unwrap();
        let materializer = Materializer::new(dir.path(), DEFAULT_JPEG_QUALITY);

        let report = materializer.materialize(
            rgb_image(50, 50),
            &[
                boxed("cat", 0.0, 0.0, 10.0, 10.0),
                boxed("bird", 20.0, 20.0, 0.0, 10.0),
                boxed("dog", 10.0, 10.0, 10.0, 10.0),
            ],
            "yard.jpg",
        );

        assert_eq!(report.artifacts.len(), 1);
        assert_eq!(report.artifacts[0].class_name, "dog");
        let failed: Vec<_> = report
            .failures
            .iter()
            .map(|f| (f.detection_index, f.class_name.as_str(), f.kind))
            .collect();
        assert_eq!(failed, [(0, "cat", ArtifactKind::Crop), (1, "bird", ArtifactKind::Crop)]);
        assert!(dir.path().join("detect_original/bird/yard_original.jpg").is_file());
    }

    #[test]
    fn materialize_file_rejects_undecodable_sources() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("clip.mp4");
        fs::write(&source, b"\x00\x00\x00\x18ftypmp42").unwrap();
        let materializer = Materializer::new(dir.path(), DEFAULT_JPEG_QUALITY);

        let err = materializer
            .materialize_file(&source, &[boxed("cat", 0.0, 0.0, 1.0, 1.0)])
            .unwrap_err();
        assert!(matches!(err, StorageError::Image(_)));
    }

    #[test]
    fn write_atomic_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.jpg");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert_eq!(files_in(dir.path()), ["a.jpg"]);
    }
}
