//! Read-only monitor: logs each newly published frame.

use crate::state::{LatestRecognition, StateReader};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Summary of one published frame, as logged by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSummary {
    pub sequence: u64,
    pub frame_bytes: usize,
    pub faces: usize,
    pub recognized: usize,
    pub eligible: usize,
}

impl FrameSummary {
    fn of(latest: &LatestRecognition) -> Self {
        Self {
            sequence: latest.sequence,
            frame_bytes: latest.frame.as_ref().map_or(0, |f| f.len()),
            faces: latest.results.len(),
            recognized: latest.results.iter().filter(|r| r.matched.matched).count(),
            eligible: latest.results.iter().filter(|r| r.verification.eligible()).count(),
        }
    }
}

pub struct Monitor {
    reader: StateReader,
    last_seen: u64,
}

impl Monitor {
    pub fn new(reader: StateReader) -> Self {
        Self { reader, last_seen: 0 }
    }

    /// Summary of the latest frame if it was published since the last poll.
    pub fn poll(&mut self) -> Option<FrameSummary> {
        let latest = self.reader.read();
        if !latest.has_frame() || latest.sequence == self.last_seen {
            return None;
        }
        self.last_seen = latest.sequence;
        Some(FrameSummary::of(&latest))
    }
}

/// Run the monitor until the returned task is aborted.
pub fn spawn_monitor(reader: StateReader, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut monitor = Monitor::new(reader);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut announced_wait = false;

        loop {
            ticker.tick().await;
            match monitor.poll() {
                Some(s) => tracing::info!(
                    sequence = s.sequence,
                    frame_bytes = s.frame_bytes,
                    faces = s.faces,
                    recognized = s.recognized,
                    eligible = s.eligible,
                    "latest frame"
                ),
                None if monitor.last_seen == 0 && !announced_wait => {
                    tracing::info!("waiting for video feed");
                    announced_wait = true;
                }
                None => {}
            }
        }
    })
}
