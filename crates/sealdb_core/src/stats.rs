//! Flush statistics.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sealdb_core::Database;
//!
//! let db = Database::open(path, "correct-horse", |_| Ok(()))?;
//! db.execute("INSERT INTO notes (body) VALUES (?1)", &["hi".into()])?;
//!
//! let stats = db.stats();
//! println!("Requests: {}", stats.requests);
//! println!("Flushes: {}", stats.flushes_completed);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing the flush pipeline.
///
/// All counters are atomic and monotonically increasing, so they can be
/// read while a flush is running.
#[derive(Debug, Default)]
pub struct FlushStats {
    requests: AtomicU64,
    coalesced: AtomicU64,
    flushes_started: AtomicU64,
    flushes_completed: AtomicU64,
    failures: AtomicU64,
    bytes_sealed: AtomicU64,
    checkpointed_frames: AtomicU64,
}

impl FlushStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a request absorbed by an already pending or running flush.
    pub(crate) fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_start(&self) {
        self.flushes_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self, bytes: u64, frames: u64) {
        self.flushes_completed.fetch_add(1, Ordering::Relaxed);
        self.bytes_sealed.fetch_add(bytes, Ordering::Relaxed);
        self.checkpointed_frames.fetch_add(frames, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of flush requests received.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Returns the number of requests merged into another flush.
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    /// Returns the number of flush sequences started.
    pub fn flushes_started(&self) -> u64 {
        self.flushes_started.load(Ordering::Relaxed)
    }

    /// Returns the number of flush sequences that sealed successfully.
    pub fn flushes_completed(&self) -> u64 {
        self.flushes_completed.load(Ordering::Relaxed)
    }

    /// Returns the number of failed flush sequences.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Returns the total sealed plaintext bytes.
    pub fn bytes_sealed(&self) -> u64 {
        self.bytes_sealed.load(Ordering::Relaxed)
    }

    /// Returns the total WAL frames moved into the base file.
    pub fn checkpointed_frames(&self) -> u64 {
        self.checkpointed_frames.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests(),
            coalesced: self.coalesced(),
            flushes_started: self.flushes_started(),
            flushes_completed: self.flushes_completed(),
            failures: self.failures(),
            bytes_sealed: self.bytes_sealed(),
            checkpointed_frames: self.checkpointed_frames(),
        }
    }
}

/// A point-in-time copy of [`FlushStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Flush requests received.
    pub requests: u64,
    /// Requests merged into another flush.
    pub coalesced: u64,
    /// Flush sequences started.
    pub flushes_started: u64,
    /// Flush sequences that sealed successfully.
    pub flushes_completed: u64,
    /// Failed flush sequences.
    pub failures: u64,
    /// Total sealed plaintext bytes.
    pub bytes_sealed: u64,
    /// Total WAL frames checkpointed.
    pub checkpointed_frames: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = FlushStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn record_flushes() {
        let stats = FlushStats::new();

        stats.record_request();
        stats.record_request();
        stats.record_coalesced();
        stats.record_start();
        stats.record_success(4096, 3);
        stats.record_start();
        stats.record_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.requests, 2);
        assert_eq!(snap.coalesced, 1);
        assert_eq!(snap.flushes_started, 2);
        assert_eq!(snap.flushes_completed, 1);
        assert_eq!(snap.failures, 1);
        assert_eq!(snap.bytes_sealed, 4096);
        assert_eq!(snap.checkpointed_frames, 3);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(FlushStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        s.record_request();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.requests(), 800);
    }
}
