use serde::Serialize;
use std::collections::BTreeMap;

/// Raw detector output in frame coordinates, with optional facial landmarks.
///
/// Coordinates may fall slightly outside the frame; use
/// [`to_face_box`](Self::to_face_box) before reporting a box to callers.
#[derive(Debug, Clone)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Round to whole pixels and clip to a `frame_width` × `frame_height` frame.
    pub fn to_face_box(&self, frame_width: u32, frame_height: u32) -> FaceBox {
        let clip = |v: f32, max: u32| -> u32 {
            if v.is_nan() {
                0
            } else {
                v.round().clamp(0.0, max as f32) as u32
            }
        };

        let x0 = clip(self.x, frame_width);
        let y0 = clip(self.y, frame_height);
        let x1 = clip(self.x + self.width, frame_width).max(x0);
        let y1 = clip(self.y + self.height, frame_height).max(y0);

        FaceBox {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        }
    }
}

/// Integer face box, fully inside the frame it was detected in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    /// `None` for vectors loaded directly by a caller.
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean norm of the vector.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Pure read: neither vector is normalised in place. Returns 0.0 when
    /// either vector has zero norm.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            (dot / denom).clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Enrolled identities keyed by label.
///
/// Ordered by label so that a scan over the gallery is deterministic.
pub type Gallery = BTreeMap<String, Embedding>;

/// One face produced by a [`FaceAnalyzer`](crate::FaceAnalyzer) for a single image.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: FaceBox,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Best cosine similarity found, reported even when below threshold.
    /// 0.0 for an empty gallery.
    pub similarity: f32,
    /// Label of the matched identity (only when `matched`).
    pub label: Option<String>,
}

impl MatchResult {
    pub fn no_match(similarity: f32) -> Self {
        Self {
            matched: false,
            similarity,
            label: None,
        }
    }
}
