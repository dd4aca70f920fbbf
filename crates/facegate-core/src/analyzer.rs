//! The face-analysis capability: image in, boxes and embeddings out.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError, ARCFACE_EMBEDDING_DIM};
use crate::types::DetectedFace;
use image::RgbImage;
use parking_lot::Mutex;
use std::path::Path;
use thiserror::Error;

/// SCRFD model file inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace model file inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";
/// InsightFace pack the two files come from.
pub const MODEL_PACK_NAME: &str = "buffalo_l";

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("face model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Detects faces and computes one identity embedding per face.
///
/// Calls are synchronous and may be CPU-bound; async callers should run
/// them on a blocking thread.
pub trait FaceAnalyzer: Send + Sync {
    /// Faces in `image`, highest detector confidence first.
    fn detect_and_embed(&self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError>;

    /// Length of every embedding this analyzer produces.
    fn embedding_dim(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// SCRFD + ArcFace running on ONNX Runtime.
///
/// Sessions need exclusive access during inference, so each model sits
/// behind its own mutex.
pub struct OnnxFaceAnalyzer {
    detector: Mutex<FaceDetector>,
    recognizer: Mutex<FaceRecognizer>,
}

impl OnnxFaceAnalyzer {
    /// Load both models from `model_dir`. Any failure is `ModelUnavailable`.
    pub fn load(model_dir: &Path) -> Result<Self, AnalyzerError> {
        let detector_path = model_dir.join(DETECTOR_MODEL_FILE);
        let recognizer_path = model_dir.join(RECOGNIZER_MODEL_FILE);

        let detector = FaceDetector::load(&detector_path.to_string_lossy())
            .map_err(|e| AnalyzerError::ModelUnavailable(e.to_string()))?;
        let recognizer = FaceRecognizer::load(&recognizer_path.to_string_lossy())
            .map_err(|e| AnalyzerError::ModelUnavailable(e.to_string()))?;

        tracing::info!(dir = %model_dir.display(), pack = MODEL_PACK_NAME, "face models loaded");

        Ok(Self {
            detector: Mutex::new(detector),
            recognizer: Mutex::new(recognizer),
        })
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn detect_and_embed(&self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError> {
        let boxes = self.detector.lock().detect(image)?;
        if boxes.is_empty() {
            return Ok(Vec::new());
        }

        let mut recognizer = self.recognizer.lock();
        boxes
            .iter()
            .map(|bbox| {
                Ok(DetectedFace {
                    bbox: bbox.to_face_box(image.width(), image.height()),
                    confidence: bbox.confidence,
                    embedding: recognizer.extract(image, bbox)?,
                })
            })
            .collect()
    }

    fn embedding_dim(&self) -> usize {
        ARCFACE_EMBEDDING_DIM
    }

    fn model_name(&self) -> &str {
        MODEL_PACK_NAME
    }
}
