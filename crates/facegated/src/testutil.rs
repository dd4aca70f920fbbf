//! Fakes shared by the daemon's unit tests.
//!
//! Test images are tiny PNGs whose top-left pixel scripts the fake analyzer:
//! red is the number of faces (255 = analyzer failure) and green picks the
//! embedding of the first face.

use crate::verifier::{VerificationOutcome, Verifier, VerifierUnavailable};
use async_trait::async_trait;
use axum::Router;
use facegate_core::{AnalyzerError, DetectedFace, Embedding, FaceAnalyzer, FaceBox};
use image::{ImageFormat, Rgb, RgbImage};
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const FAKE_DIM: usize = 4;
pub const FAIL_ANALYZER: u8 = 255;

/// Serve `router` on an ephemeral local port. Returns the base URL.
pub async fn spawn_http(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// 16×16 PNG scripting `faces` detections whose first embedding is basis
/// vector `seed % FAKE_DIM`.
pub fn png_bytes(faces: u8, seed: u8) -> Vec<u8> {
    let mut img = RgbImage::from_pixel(16, 16, Rgb([0, 0, 0]));
    img.put_pixel(0, 0, Rgb([faces, seed, 0]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

pub fn basis(i: usize) -> Embedding {
    let mut values = vec![0.0; FAKE_DIM];
    values[i % FAKE_DIM] = 1.0;
    Embedding::new(values)
}

/// Analyzer driven by the image's top-left pixel.
#[derive(Default)]
pub struct ScriptedAnalyzer {
    pub calls: AtomicUsize,
}

impl FaceAnalyzer for ScriptedAnalyzer {
    fn detect_and_embed(&self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Rgb([faces, seed, _]) = *image.get_pixel(0, 0);
        if faces == FAIL_ANALYZER {
            return Err(AnalyzerError::ModelUnavailable("scripted failure".into()));
        }

        Ok((0..faces as u32)
            .map(|i| DetectedFace {
                bbox: FaceBox { x: i * 4, y: 1, width: 3, height: 3 },
                confidence: 0.9 - 0.1 * i as f32,
                embedding: basis(seed as usize + i as usize),
            })
            .collect())
    }

    fn embedding_dim(&self) -> usize {
        FAKE_DIM
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Verifier returning a fixed outcome, or unavailable when none is set.
#[derive(Default)]
pub struct StubVerifier {
    pub outcome: Option<VerificationOutcome>,
    pub labels: Mutex<Vec<String>>,
}

impl StubVerifier {
    pub fn answering(outcome: VerificationOutcome) -> Self {
        Self {
            outcome: Some(outcome),
            labels: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.labels.lock().len()
    }
}

#[async_trait]
impl Verifier for StubVerifier {
    async fn verify(&self, label: &str) -> Result<VerificationOutcome, VerifierUnavailable> {
        self.labels.lock().push(label.to_string());
        self.outcome.clone().ok_or_else(|| VerifierUnavailable {
            reason: "stub offline".into(),
        })
    }
}

pub fn eligible_outcome() -> VerificationOutcome {
    VerificationOutcome {
        verified: true,
        eligible: true,
        reason: "Meal recorded".into(),
        attributes: serde_json::json!({"id": "u1", "name": "Alice"}),
    }
}
