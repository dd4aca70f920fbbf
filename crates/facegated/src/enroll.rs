//! Enrollment: one reference image in, one stored identity out.
//!
//! Never touches the shared recognition state.

use crate::processor::{analyze_bytes, ProcessError};
use crate::store::{EmbeddingStore, StoreError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use facegate_core::{AnalyzerError, DetectedFace, FaceAnalyzer};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("invalid image data: {0}")]
    Decode(#[from] image::ImageError),
    #[error("no face found in image")]
    NoFaceFound,
    #[error("expected exactly one face, found {0}")]
    MultipleFacesFound(usize),
    #[error("face analysis failed: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("internal enrollment error: {0}")]
    Internal(String),
}

impl From<ProcessError> for EnrollError {
    fn from(e: ProcessError) -> Self {
        match e {
            ProcessError::Decode(e) => Self::Decode(e),
            ProcessError::Analyzer(e) => Self::Analyzer(e),
            ProcessError::Internal(msg) => Self::Internal(msg),
        }
    }
}

/// Caller-supplied hints for the label of a new identity.
#[derive(Debug, Clone, Default)]
pub struct LabelHint {
    pub face_id: Option<String>,
    pub user_id: Option<String>,
}

impl LabelHint {
    /// `face_id` if given, else `face-{user_id}-{unix_secs}`, else `face-{uuid}`.
    pub fn assign(&self, now: DateTime<Utc>) -> String {
        if let Some(face_id) = non_empty(&self.face_id) {
            return face_id.to_string();
        }
        match non_empty(&self.user_id) {
            Some(user_id) => format!("face-{user_id}-{}", now.timestamp()),
            None => format!("face-{}", uuid::Uuid::new_v4()),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        non_empty(&self.user_id)
    }
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

pub struct Enroller {
    analyzer: Arc<dyn FaceAnalyzer>,
    store: Arc<EmbeddingStore>,
}

impl Enroller {
    pub fn new(analyzer: Arc<dyn FaceAnalyzer>, store: Arc<EmbeddingStore>) -> Self {
        Self { analyzer, store }
    }

    /// Enroll the single face in `image`. Returns the assigned label.
    ///
    /// Zero or several faces are rejected and leave the store unchanged.
    pub async fn enroll(&self, image: Bytes, hint: &LabelHint) -> Result<String, EnrollError> {
        let mut faces = self.detect(image).await?;
        let face = match faces.len() {
            0 => return Err(EnrollError::NoFaceFound),
            1 => faces.remove(0),
            n => return Err(EnrollError::MultipleFacesFound(n)),
        };

        let label = hint.assign(Utc::now());
        let replaced = self.store.put(&label, face.embedding)?;
        tracing::info!(
            label = %label,
            replaced,
            detection_confidence = face.confidence,
            known_faces = self.store.len(),
            "face enrolled"
        );
        Ok(label)
    }

    /// Enroll a trusted reference image under `label`, taking the most
    /// confident face when there are several.
    pub async fn enroll_reference(&self, image: Bytes, label: &str) -> Result<(), EnrollError> {
        let face = self
            .detect(image)
            .await?
            .into_iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .ok_or(EnrollError::NoFaceFound)?;

        self.store.put(label, face.embedding)?;
        tracing::debug!(label, detection_confidence = face.confidence, "reference face loaded");
        Ok(())
    }

    async fn detect(&self, image: Bytes) -> Result<Vec<DetectedFace>, EnrollError> {
        Ok(analyze_bytes(Arc::clone(&self.analyzer), image).await?)
    }
}
