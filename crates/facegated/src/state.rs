//! Shared recognition state: the latest frame and the faces found in it.
//!
//! There is exactly one [`StatePublisher`] (owned by the frame processor)
//! and any number of [`StateReader`]s. A publish swaps a fully built value
//! in under a short write lock, so readers always see a frame paired with
//! its own results.

use crate::processor::ResultRecord;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

/// The most recently completed frame.
#[derive(Debug, Clone, Default)]
pub struct LatestRecognition {
    /// Publish counter; 0 until the first frame.
    pub sequence: u64,
    /// Raw bytes of the frame as received. `None` until the first frame.
    pub frame: Option<Bytes>,
    pub results: Vec<ResultRecord>,
    pub published_at: Option<DateTime<Utc>>,
}

impl LatestRecognition {
    /// Whether any frame has been published yet. Distinguishes "not warmed
    /// up" from "a real frame with zero faces".
    pub fn has_frame(&self) -> bool {
        self.frame.is_some()
    }
}

#[derive(Default)]
struct Shared {
    latest: RwLock<Arc<LatestRecognition>>,
}

/// Write side. Deliberately not `Clone`.
pub struct StatePublisher {
    shared: Arc<Shared>,
}

/// Read side, cheap to clone into handlers and background tasks.
#[derive(Clone)]
pub struct StateReader {
    shared: Arc<Shared>,
}

/// Create an empty state and its single publisher.
pub fn recognition_state() -> (StatePublisher, StateReader) {
    let shared = Arc::new(Shared::default());
    (
        StatePublisher {
            shared: Arc::clone(&shared),
        },
        StateReader { shared },
    )
}

impl StatePublisher {
    /// Replace the stored (frame, results) pair. Returns the new sequence.
    pub fn publish(&self, frame: Bytes, results: Vec<ResultRecord>) -> u64 {
        let mut next = Arc::new(LatestRecognition {
            sequence: 0,
            frame: Some(frame),
            results,
            published_at: Some(Utc::now()),
        });

        let mut latest = self.shared.latest.write();
        let sequence = latest.sequence + 1;
        // `next` is not shared yet, so this never clones.
        Arc::make_mut(&mut next).sequence = sequence;
        *latest = next;
        sequence
    }
}

impl StateReader {
    pub fn read(&self) -> Arc<LatestRecognition> {
        Arc::clone(&self.shared.latest.read())
    }
}
