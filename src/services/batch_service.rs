//! Batch orchestrator: validate, store, detect and materialize each upload.
//!
//! Files are handled one after another. A failure in any step only affects
//! the file it happened on; siblings in the batch carry on.

use crate::{
    models::{
        artifact::SavedArtifact,
        batch::{BatchReport, FileFailure, FileReport, FileStage},
        params::{DetectionParams, ParamsError},
        upload::{StoredSourceFile, UploadNotice, UploadedFile},
    },
    services::{
        detection_service::Detector,
        identifier,
        materializer::Materializer,
        upload_validator::{self, AcceptedUpload},
    },
};
use chrono::Utc;
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("no valid upload: every file was missing, unsupported or a system file")]
    EmptyBatch { notices: Vec<UploadNotice> },
    #[error("invalid detection parameters: {0}")]
    InvalidParams(#[from] ParamsError),
}

#[derive(Clone)]
pub struct BatchOrchestrator {
    detector: Arc<dyn Detector>,
    materializer: Materializer,
    upload_dir: PathBuf,
}

impl BatchOrchestrator {
    pub fn new(
        detector: Arc<dyn Detector>,
        materializer: Materializer,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            detector,
            materializer,
            upload_dir: upload_dir.into(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Run every upload through the pipeline and collect the results.
    ///
    /// The report is returned to the caller and never kept anywhere else.
    pub async fn process_batch(
        &self,
        files: Vec<UploadedFile>,
        params: &DetectionParams,
    ) -> BatchReport {
        let batch_id = Uuid::new_v4();
        let outcome = upload_validator::filter_uploads(files);
        info!(
            "batch {}: {} accepted, {} rejected, detector {}",
            batch_id,
            outcome.accepted.len(),
            outcome.notices.len(),
            self.detector.name()
        );

        let mut report = BatchReport {
            batch_id,
            artifacts: Vec::new(),
            notices: outcome.notices,
            files: Vec::with_capacity(outcome.accepted.len()),
            completed_at: Utc::now(),
        };

        for upload in outcome.accepted {
            let (file_report, artifacts) = self.process_file(upload, params).await;
            report.artifacts.extend(artifacts);
            report.files.push(file_report);
        }

        report.completed_at = Utc::now();
        info!(
            "batch {} finished: {} artifacts, {} failed files",
            batch_id,
            report.artifacts.len(),
            report.failed_files()
        );
        report
    }

    /// Like [`process_batch`](Self::process_batch) but turns "nothing was
    /// accepted" into [`BatchError::EmptyBatch`].
    pub async fn process_batch_checked(
        &self,
        files: Vec<UploadedFile>,
        params: &DetectionParams,
    ) -> Result<BatchReport, BatchError> {
        let report = self.process_batch(files, params).await;
        if report.is_empty_batch() {
            return Err(BatchError::EmptyBatch {
                notices: report.notices,
            });
        }
        Ok(report)
    }

    async fn process_file(
        &self,
        upload: AcceptedUpload,
        params: &DetectionParams,
    ) -> (FileReport, Vec<SavedArtifact>) {
        let mut file_report = FileReport {
            filename: upload.filename.clone(),
            stored_name: None,
            kind: upload.kind,
            detections: 0,
            artifacts: 0,
            failure: None,
            storage_failures: Vec::new(),
        };
        let fail = |stage, error: String| Some(FileFailure { stage, error });

        let stored = match self.store_upload(&upload).await {
            Ok(stored) => stored,
            Err(err) => {
                warn!("failed to store upload {}: {}", upload.filename, err);
                file_report.failure = fail(FileStage::Store, err.to_string());
                return (file_report, Vec::new());
            }
        };
        file_report.stored_name = Some(stored.stored_name.clone());

        let detections = match self.detector.detect(&stored.path, params).await {
            Ok(detections) => detections,
            Err(err) => {
                warn!(
                    "detection failed for {} ({}): {}",
                    stored.original_name, stored.stored_name, err
                );
                file_report.failure = fail(FileStage::Detect, err.to_string());
                return (file_report, Vec::new());
            }
        };
        debug!("{} detections for {}", detections.len(), stored.stored_name);
        file_report.detections = detections.len();
        if detections.is_empty() {
            return (file_report, Vec::new());
        }

        let materializer = self.materializer.clone();
        let path = stored.path.clone();
        let joined = tokio::task::spawn_blocking(move || {
            materializer.materialize_file(&path, &detections)
        })
        .await;

        match joined {
            Ok(Ok(materialized)) => {
                file_report.artifacts = materialized.artifacts.len();
                file_report.storage_failures = materialized.failures;
                (file_report, materialized.artifacts)
            }
            Ok(Err(err)) => {
                warn!("could not materialize {}: {}", stored.stored_name, err);
                file_report.failure = fail(FileStage::Decode, err.to_string());
                (file_report, Vec::new())
            }
            Err(err) => {
                warn!("materializer task for {} failed: {}", stored.stored_name, err);
                file_report.failure = fail(FileStage::Decode, err.to_string());
                (file_report, Vec::new())
            }
        }
    }

    /// Persist an accepted upload as `{stem}_{16hex}.{ext}` in the upload dir.
    ///
    /// Bytes go to a temp file first and are renamed into place once synced.
    async fn store_upload(&self, upload: &AcceptedUpload) -> io::Result<StoredSourceFile> {
        fs::create_dir_all(&self.upload_dir).await?;

        let stored_name =
            identifier::generate(&upload.stem, &format!(".{}", upload.extension));
        let path = self.upload_dir.join(&stored_name);
        let tmp_path = self.upload_dir.join(format!(".tmp-{}", Uuid::new_v4()));

        if let Err(err) = write_synced(&tmp_path, &upload.file.bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        if let Err(err) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        debug!("stored upload {} as {}", upload.filename, path.display());

        Ok(StoredSourceFile {
            original_name: upload.filename.clone(),
            stored_name,
            path,
        })
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::detection::{BoundingBox, Detection},
        services::{
            detection_service::{DetectionError, DetectionResult},
            materializer::DEFAULT_JPEG_QUALITY,
        },
    };
    use futures::future::BoxFuture;
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::{collections::HashMap, io::Cursor, sync::Mutex};
    use tempfile::TempDir;

    /// Answers by original stem; stems mapped to `None` fail.
    struct ScriptedDetector {
        answers: HashMap<&'static str, Option<Vec<Detection>>>,
        seen: Mutex<Vec<PathBuf>>,
    }

    impl ScriptedDetector {
        fn new(answers: Vec<(&'static str, Option<Vec<Detection>>)>) -> Self {
            Self {
                answers: answers.into_iter().collect(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Detector for ScriptedDetector {
        fn detect<'a>(
            &'a self,
            source: &'a Path,
            _params: &'a DetectionParams,
        ) -> BoxFuture<'a, DetectionResult<Vec<Detection>>> {
            self.seen.lock().unwrap().push(source.to_path_buf());
            let name = source.file_name().unwrap().to_string_lossy().into_owned();
            let answer = self
                .answers
                .iter()
                .find(|(stem, _)| name.starts_with(&format!("{}_", stem)))
                .map(|(_, answer)| answer.clone());
            Box::pin(async move {
                match answer {
                    Some(Some(detections)) => Ok(detections),
                    Some(None) => Err(DetectionError::RequestFailed("model crashed".into())),
                    None => Ok(Vec::new()),
                }
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 0u8]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn orchestrator(dir: &TempDir, detector: Arc<dyn Detector>) -> BatchOrchestrator {
        BatchOrchestrator::new(
            detector,
            Materializer::new(dir.path().join("store"), DEFAULT_JPEG_QUALITY),
            dir.path().join("uploads"),
        )
    }

    #[tokio::test]
    async fn one_cat_and_one_empty_file() {
        let dir = TempDir::new().unwrap();
        let detector = Arc::new(ScriptedDetector::new(vec![
            (
                "a",
                Some(vec![Detection::new("cat", Some(BoundingBox::new(10.0, 10.0, 50.0, 50.0)))]),
            ),
            ("b", Some(vec![])),
        ]));
        let batch = orchestrator(&dir, detector);

        let report = batch
            .process_batch(
                vec![
                    UploadedFile::new("a.png", png_bytes(100, 100)),
                    UploadedFile::new("b.png", png_bytes(100, 100)),
                ],
                &DetectionParams::default(),
            )
            .await;

        assert_eq!(report.artifacts.len(), 1);
        assert!(report.artifacts[0].relative_path.starts_with("detect/cat/a_"));
        assert_eq!(report.files.len(), 2);
        assert_eq!(report.files[1].artifacts, 0);
        assert!(report.files.iter().all(|f| f.failure.is_none()));

        let originals: Vec<_> = std::fs::read_dir(dir.path().join("store/detect_original/cat"))
            .unwrap()
            .collect();
        assert_eq!(originals.len(), 1);
        let crop = dir.path().join("store").join(&report.artifacts[0].relative_path);
        let decoded = image::open(crop).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (50, 50));
    }

    #[tokio::test]
    async fn detector_failure_is_isolated_to_its_file() {
        let dir = TempDir::new().unwrap();
        let detector = Arc::new(ScriptedDetector::new(vec![
            ("broken", None),
            (
                "fine",
                Some(vec![Detection::new("dog", Some(BoundingBox::new(0.0, 0.0, 8.0, 8.0)))]),
            ),
        ]));
        let batch = orchestrator(&dir, detector);

        let report = batch
            .process_batch(
                vec![
                    UploadedFile::new("broken.jpg", png_bytes(16, 16)),
                    UploadedFile::new("fine.jpg", png_bytes(16, 16)),
                ],
                &DetectionParams::default(),
            )
            .await;

        assert_eq!(report.artifacts.len(), 1);
        assert_eq!(report.artifacts[0].class_name, "dog");
        assert_eq!(report.failed_files(), 1);
        assert_eq!(
            report.files[0].failure.as_ref().map(|f| f.stage),
            Some(FileStage::Detect)
        );
    }

    #[tokio::test]
    async fn undecodable_video_contributes_nothing() {
        let dir = TempDir::new().unwrap();
        let detector = Arc::new(ScriptedDetector::new(vec![(
            "clip",
            Some(vec![Detection::new("car", Some(BoundingBox::new(0.0, 0.0, 4.0, 4.0)))]),
        )]));
        let batch = orchestrator(&dir, detector);

        let report = batch
            .process_batch(
                vec![UploadedFile::new("clip.mp4", b"not really a video".to_vec())],
                &DetectionParams::default(),
            )
            .await;

        assert!(report.artifacts.is_empty());
        assert_eq!(
            report.files[0].failure.as_ref().map(|f| f.stage),
            Some(FileStage::Decode)
        );
    }

    #[tokio::test]
    async fn uploads_get_unique_lowercase_names() {
        let dir = TempDir::new().unwrap();
        let detector = Arc::new(ScriptedDetector::new(vec![]));
        let batch = orchestrator(&dir, detector.clone());

        let report = batch
            .process_batch(
                vec![
                    UploadedFile::new("Photo.JPG", png_bytes(4, 4)),
                    UploadedFile::new("Photo.JPG", png_bytes(4, 4)),
                ],
                &DetectionParams::default(),
            )
            .await;

        let names: Vec<_> = report
            .files
            .iter()
            .map(|f| f.stored_name.clone().unwrap())
            .collect();
        assert_ne!(names[0], names[1]);
        for name in &names {
            assert!(name.starts_with("Photo_"));
            assert!(name.ends_with(".jpg"));
            assert!(dir.path().join("uploads").join(name).is_file());
        }
        assert_eq!(detector.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_batch_is_reported() {
        let dir = TempDir::new().unwrap();
        let batch = orchestrator(&dir, Arc::new(ScriptedDetector::new(vec![])));

        let report = batch
            .process_batch(
                vec![UploadedFile::new("desktop.ini", b"[.ShellClassInfo]".to_vec())],
                &DetectionParams::default(),
            )
            .await;
        assert!(report.artifacts.is_empty());
        assert!(report.is_empty_batch());

        let err = batch
            .process_batch_checked(
                vec![UploadedFile::new("photo.txt", b"hi".to_vec())],
                &DetectionParams::default(),
            )
            .await
            .unwrap_err();
        match err {
            BatchError::EmptyBatch { notices } => assert_eq!(notices[0].filename, "photo.txt"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
