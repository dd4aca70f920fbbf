//! Identity matching by cosine similarity.

use crate::types::{Embedding, Gallery, MatchResult};

/// Similarity a probe must strictly exceed to count as a match.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.35;

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher: Send + Sync {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, threshold: f32) -> MatchResult;
}

/// Cosine similarity matcher.
///
/// Scans every gallery entry, keeps the highest similarity and reports a
/// match only when it strictly exceeds `threshold`. On exactly equal scores
/// the first entry in gallery order (lowest label) wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, threshold: f32) -> MatchResult {
        let mut best: Option<(&str, f32)> = None;

        for (label, embedding) in gallery {
            let sim = probe.similarity(embedding);
            match best {
                Some((_, best_sim)) if sim <= best_sim => {}
                _ => best = Some((label.as_str(), sim)),
            }
        }

        match best {
            Some((label, sim)) if sim > threshold => MatchResult {
                matched: true,
                similarity: sim,
                label: Some(label.to_string()),
            },
            Some((_, sim)) => MatchResult::no_match(sim),
            None => MatchResult::no_match(0.0),
        }
    }
}
