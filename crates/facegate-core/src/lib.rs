//! facegate-core: face detection, recognition and identity matching.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings, both
//! running via ONNX Runtime on the CPU, and matches embeddings against
//! enrolled identities by cosine similarity.

pub mod alignment;
pub mod analyzer;
pub mod detector;
pub mod matcher;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxFaceAnalyzer};
pub use matcher::{CosineMatcher, Matcher, DEFAULT_SIMILARITY_THRESHOLD};
pub use types::{BoundingBox, DetectedFace, Embedding, FaceBox, Gallery, MatchResult};

/// Default model directory: `$XDG_DATA_HOME/facegate/models`, falling back
/// to `~/.local/share/facegate/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
        .join("models")
}
