use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;

use super::snapshot::DepthSnapshot;

/// Rolling window used by the signal analyzer to compute 30s/60s/120s
/// pressure (§4.5.3). At roughly one snapshot per 200ms this holds about
/// 600 entries to cover 120 seconds; entries are evicted purely by age, not
/// count, so a slower feed still keeps a full 120s window.
const MAX_WINDOW: std::time::Duration = std::time::Duration::from_secs(120);

pub struct DepthEntry {
    pub snapshot: DepthSnapshot,
    pub at: Instant,
}

/// Single-writer/single-reader ring buffer of recent depth snapshots for one
/// security. `parking_lot::Mutex` rather than `std::sync::Mutex` matches the
/// teacher's lock choice elsewhere for hot, uncontended paths.
pub struct DepthRingBuffer {
    entries: Mutex<VecDeque<DepthEntry>>,
}

impl Default for DepthRingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DepthRingBuffer {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, snapshot: DepthSnapshot) {
        let mut guard = self.entries.lock();
        let now = Instant::now();
        guard.push_back(DepthEntry { snapshot, at: now });
        while let Some(front) = guard.front() {
            if now.duration_since(front.at) > MAX_WINDOW {
                guard.pop_front();
            } else {
                break;
            }
        }
    }

    /// Snapshot the entries newer than `now - window`, oldest first.
    pub fn window(&self, window: std::time::Duration) -> Vec<DepthSnapshot> {
        let guard = self.entries.lock();
        let now = Instant::now();
        guard
            .iter()
            .filter(|e| now.duration_since(e.at) <= window)
            .map(|e| e.snapshot.clone())
            .collect()
    }

    /// Snapshot the entries whose age falls within `[min_age, max_age]`,
    /// oldest first. Used by absorption qualification to look up the order
    /// count observed 30-60s ago (§4.5.4(b)), a band `window` alone can't
    /// express since it only bounds the newer side.
    pub fn window_between(&self, min_age: std::time::Duration, max_age: std::time::Duration) -> Vec<DepthSnapshot> {
        let guard = self.entries.lock();
        let now = Instant::now();
        guard
            .iter()
            .filter(|e| {
                let age = now.duration_since(e.at);
                age >= min_age && age <= max_age
            })
            .map(|e| e.snapshot.clone())
            .collect()
    }

    pub fn latest(&self) -> Option<DepthSnapshot> {
        self.entries.lock().back().map(|e| e.snapshot.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
