//! Frame ingestion: decode, detect, match, verify, publish.

use crate::state::StatePublisher;
use crate::store::EmbeddingStore;
use crate::verifier::{VerificationStatus, Verifier};
use bytes::Bytes;
use facegate_core::{AnalyzerError, DetectedFace, FaceAnalyzer, FaceBox, MatchResult, Matcher};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("invalid image data: {0}")]
    Decode(#[from] image::ImageError),
    #[error("face analysis failed: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("internal processing error: {0}")]
    Internal(String),
}

/// Outcome for one detected face in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub bbox: FaceBox,
    pub detection_confidence: f32,
    pub matched: MatchResult,
    pub verification: VerificationStatus,
}

impl ResultRecord {
    pub fn label(&self) -> Option<&str> {
        self.matched.label.as_deref()
    }
}

/// What one call to [`FrameProcessor::process`] produced.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub sequence: u64,
    pub results: Vec<ResultRecord>,
}

impl FrameReport {
    pub fn faces_detected(&self) -> usize {
        self.results.len()
    }

    pub fn faces_recognized(&self) -> usize {
        self.results.iter().filter(|r| r.matched.matched).count()
    }
}

/// Decode `bytes` and run the analyzer on a blocking thread.
pub(crate) async fn analyze_bytes(
    analyzer: Arc<dyn FaceAnalyzer>,
    bytes: Bytes,
) -> Result<Vec<DetectedFace>, ProcessError> {
    tokio::task::spawn_blocking(move || -> Result<Vec<DetectedFace>, ProcessError> {
        let image = image::load_from_memory(&bytes)?.to_rgb8();
        Ok(analyzer.detect_and_embed(&image)?)
    })
    .await
    .map_err(|e| ProcessError::Internal(format!("analysis task failed: {e}")))?
}

/// The recognition pipeline. Owns the only [`StatePublisher`].
pub struct FrameProcessor {
    analyzer: Arc<dyn FaceAnalyzer>,
    store: Arc<EmbeddingStore>,
    matcher: Box<dyn Matcher>,
    /// `None` when verification is disabled.
    verifier: Option<Arc<dyn Verifier>>,
    threshold: f32,
    publisher: StatePublisher,
}

impl FrameProcessor {
    pub fn new(
        analyzer: Arc<dyn FaceAnalyzer>,
        store: Arc<EmbeddingStore>,
        matcher: Box<dyn Matcher>,
        verifier: Option<Arc<dyn Verifier>>,
        threshold: f32,
        publisher: StatePublisher,
    ) -> Self {
        Self {
            analyzer,
            store,
            matcher,
            verifier,
            threshold,
            publisher,
        }
    }

    /// Run one frame through the pipeline and publish the result.
    ///
    /// On error nothing is published and the previous state stays visible.
    pub async fn process(&self, frame: Bytes) -> Result<FrameReport, ProcessError> {
        let faces = analyze_bytes(Arc::clone(&self.analyzer), frame.clone()).await?;

        // One snapshot for every face in this frame.
        let gallery = self.store.snapshot();

        let mut results = Vec::with_capacity(faces.len());
        for face in faces {
            let matched = self.matcher.compare(&face.embedding, &gallery, self.threshold);
            let verification = self.verification_for(&matched).await;

            tracing::debug!(
                label = matched.label.as_deref().unwrap_or("-"),
                similarity = matched.similarity,
                detection_confidence = face.confidence,
                verified = verification.verified(),
                eligible = verification.eligible(),
                "face processed"
            );

            results.push(ResultRecord {
                bbox: face.bbox,
                detection_confidence: face.confidence,
                matched,
                verification,
            });
        }

        let frame_bytes = frame.len();
        let sequence = self.publisher.publish(frame, results.clone());
        let report = FrameReport { sequence, results };

        tracing::info!(
            sequence,
            frame_bytes,
            faces = report.faces_detected(),
            recognized = report.faces_recognized(),
            "frame processed"
        );

        Ok(report)
    }

    async fn verification_for(&self, matched: &MatchResult) -> VerificationStatus {
        let (Some(label), Some(verifier)) = (matched.label.as_deref(), self.verifier.as_ref())
        else {
            return VerificationStatus::Skipped;
        };

        match verifier.verify(label).await {
            Ok(outcome) => VerificationStatus::Completed(outcome),
            Err(e) => {
                tracing::warn!(label, error = %e, "verification degraded");
                VerificationStatus::Unavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{recognition_state, StateReader};
    use crate::verifier::{VerificationOutcome, VerifierUnavailable};
    use crate::testutil::{
        basis, eligible_outcome, png_bytes, ScriptedAnalyzer, StubVerifier, FAIL_ANALYZER,
    };
    use async_trait::async_trait;
    use facegate_core::{CosineMatcher, DEFAULT_SIMILARITY_THRESHOLD};
    use std::sync::atomic::Ordering;

    struct Harness {
        processor: FrameProcessor,
        reader: StateReader,
        store: Arc<EmbeddingStore>,
        analyzer: Arc<ScriptedAnalyzer>,
    }

    fn harness(verifier: Option<Arc<dyn Verifier>>) -> Harness {
        harness_with_store(Arc::new(EmbeddingStore::new(4)), verifier)
    }

    fn harness_with_store(store: Arc<EmbeddingStore>, verifier: Option<Arc<dyn Verifier>>) -> Harness {
        let analyzer = Arc::new(ScriptedAnalyzer::default());
        let (publisher, reader) = recognition_state();
        let processor = FrameProcessor::new(
            analyzer.clone(),
            Arc::clone(&store),
            Box::new(CosineMatcher),
            verifier,
            DEFAULT_SIMILARITY_THRESHOLD,
            publisher,
        );
        Harness {
            processor,
            reader,
            store,
            analyzer,
        }
    }

    #[tokio::test]
    async fn test_zero_faces_is_success_and_published() {
        let h = harness(None);
        let frame = Bytes::from(png_bytes(0, 0));

        let report = h.processor.process(frame.clone()).await.unwrap();
        assert_eq!(report.faces_detected(), 0);
        assert_eq!(report.faces_recognized(), 0);

        let latest = h.reader.read();
        assert_eq!(latest.frame.as_ref(), Some(&frame));
        assert!(latest.results.is_empty());
        assert_eq!(latest.sequence, report.sequence);
    }

    #[tokio::test]
    async fn test_matched_face_is_verified_once() {
        let verifier = Arc::new(StubVerifier::answering(eligible_outcome()));
        let h = harness(Some(verifier.clone()));
        h.store.put("alice", basis(1)).unwrap();

        let report = h.processor.process(Bytes::from(png_bytes(1, 1))).await.unwrap();
        assert_eq!(report.faces_recognized(), 1);

        let record = &report.results[0];
        assert_eq!(record.label(), Some("alice"));
        assert!((record.matched.similarity - 1.0).abs() < 1e-6);
        assert_eq!(
            record.verification,
            VerificationStatus::Completed(eligible_outcome())
        );
        assert_eq!(verifier.labels.lock().as_slice(), &["alice".to_string()]);
        assert_eq!(h.reader.read().results, report.results);
    }

    #[tokio::test]
    async fn test_unmatched_face_skips_verifier() {
        let verifier = Arc::new(StubVerifier::answering(eligible_outcome()));
        let h = harness(Some(verifier.clone()));
        h.store.put("alice", basis(0)).unwrap();

        // Two faces: basis(2) and basis(3), both orthogonal to alice.
        let report = h.processor.process(Bytes::from(png_bytes(2, 2))).await.unwrap();
        assert_eq!(report.faces_detected(), 2);
        assert_eq!(report.faces_recognized(), 0);
        assert!(report
            .results
            .iter()
            .all(|r| r.label().is_none() && r.verification == VerificationStatus::Skipped));
        assert_eq!(verifier.calls(), 0);
    }

    #[tokio::test]
    async fn test_only_matched_faces_reach_verifier() {
        let verifier = Arc::new(StubVerifier::answering(eligible_outcome()));
        let h = harness(Some(verifier.clone()));
        h.store.put("bob", basis(3)).unwrap();

        let report = h.processor.process(Bytes::from(png_bytes(3, 1))).await.unwrap();
        assert_eq!(report.faces_detected(), 3);
        assert_eq!(report.faces_recognized(), 1);
        assert_eq!(verifier.calls(), 1);
    }

    #[tokio::test]
    async fn test_verifier_outage_degrades_without_failing() {
        let verifier = Arc::new(StubVerifier::default());
        let h = harness(Some(verifier.clone()));
        h.store.put("alice", basis(1)).unwrap();

        let report = h.processor.process(Bytes::from(png_bytes(1, 1))).await.unwrap();
        let record = &report.results[0];
        assert_eq!(record.label(), Some("alice"));
        assert_eq!(record.verification, VerificationStatus::Unavailable);
        assert!(!record.verification.verified());
        assert!(!record.verification.eligible());
        assert_eq!(record.verification.reason(), "verification unavailable");
        // No retry within the frame.
        assert_eq!(verifier.calls(), 1);
    }

    /// Enrolls "bob" as a side effect of every verification.
    struct EnrollingVerifier {
        store: Arc<EmbeddingStore>,
    }

    #[async_trait]
    impl Verifier for EnrollingVerifier {
        async fn verify(&self, _label: &str) -> Result<VerificationOutcome, VerifierUnavailable> {
            self.store.put("bob", basis(2)).unwrap();
            Ok(eligible_outcome())
        }
    }

    #[tokio::test]
    async fn test_store_updates_mid_frame_wait_for_next_frame() {
        let store = Arc::new(EmbeddingStore::new(4));
        store.put("alice", basis(1)).unwrap();
        let verifier = Arc::new(EnrollingVerifier {
            store: Arc::clone(&store),
        });
        let h = harness_with_store(Arc::clone(&store), Some(verifier));

        // Face 0 is alice; face 1 is bob's embedding, enrolled while face 0 verifies.
        let report = h.processor.process(Bytes::from(png_bytes(2, 1))).await.unwrap();
        assert_eq!(report.results[0].label(), Some("alice"));
        assert_eq!(report.results[1].label(), None);
        assert_eq!(report.results[1].verification, VerificationStatus::Skipped);
        assert!(store.snapshot().contains_key("bob"));

        let report = h.processor.process(Bytes::from(png_bytes(2, 1))).await.unwrap();
        assert_eq!(report.results[1].label(), Some("bob"));
    }

    #[tokio::test]
    async fn test_disabled_verification_skips_matches() {
        let h = harness(None);
        h.store.put("alice", basis(1)).unwrap();

        let report = h.processor.process(Bytes::from(png_bytes(1, 1))).await.unwrap();
        assert_eq!(report.results[0].label(), Some("alice"));
        assert_eq!(report.results[0].verification, VerificationStatus::Skipped);
    }

    #[tokio::test]
    async fn test_decode_failure_leaves_state_untouched() {
        let h = harness(None);
        h.processor.process(Bytes::from(png_bytes(0, 0))).await.unwrap();

        let err = h
            .processor
            .process(Bytes::from_static(b"definitely not an image"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Decode(_)), "{err}");
        assert_eq!(h.reader.read().sequence, 1);
        assert_eq!(h.analyzer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_analyzer_failure_leaves_state_untouched() {
        let h = harness(None);
        let err = h
            .processor
            .process(Bytes::from(png_bytes(FAIL_ANALYZER, 0)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Analyzer(_)), "{err}");
        assert!(!h.reader.read().has_frame());
    }

    #[tokio::test]
    async fn test_below_threshold_reports_best_score() {
        let h = harness(None);
        let mut near = basis(1);
        near.values[0] = 3.0; // cos with basis(1) ≈ 0.316
        h.store.put("carol", near).unwrap();

        let report = h.processor.process(Bytes::from(png_bytes(1, 1))).await.unwrap();
        let record = &report.results[0];
        assert!(!record.matched.matched);
        assert!((record.matched.similarity - 1.0 / 10f32.sqrt()).abs() < 1e-5);
    }
}
