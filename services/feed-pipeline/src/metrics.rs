//! Pipeline counters
//!
//! Atomic counters covering the feed, the ring bus, and the book sync
//! lifecycle, exported as a sorted map for logging or exposition.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared across the pipeline components.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    // Feed
    pub ws_messages: AtomicU64,
    pub trades_parsed: AtomicU64,
    pub diffs_parsed: AtomicU64,
    pub parse_failures: AtomicU64,

    // Ring bus
    pub frames_written: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub frame_resyncs: AtomicU64,

    // Book sync
    pub diffs_applied: AtomicU64,
    pub diffs_dropped_stale: AtomicU64,
    pub book_resyncs: AtomicU64,
    pub snapshots_applied: AtomicU64,

    // Detection
    pub icebergs_detected: AtomicU64,
    pub bucket_closures: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Export all counters as a sorted map.
    pub fn export(&self) -> BTreeMap<&'static str, u64> {
        let mut m = BTreeMap::new();
        m.insert("ws_messages", self.ws_messages.load(Ordering::Relaxed));
        m.insert("trades_parsed", self.trades_parsed.load(Ordering::Relaxed));
        m.insert("diffs_parsed", self.diffs_parsed.load(Ordering::Relaxed));
        m.insert("parse_failures", self.parse_failures.load(Ordering::Relaxed));
        m.insert("frames_written", self.frames_written.load(Ordering::Relaxed));
        m.insert("frames_dropped", self.frames_dropped.load(Ordering::Relaxed));
        m.insert("frame_resyncs", self.frame_resyncs.load(Ordering::Relaxed));
        m.insert("diffs_applied", self.diffs_applied.load(Ordering::Relaxed));
        m.insert(
            "diffs_dropped_stale",
            self.diffs_dropped_stale.load(Ordering::Relaxed),
        );
        m.insert("book_resyncs", self.book_resyncs.load(Ordering::Relaxed));
        m.insert(
            "snapshots_applied",
            self.snapshots_applied.load(Ordering::Relaxed),
        );
        m.insert(
            "icebergs_detected",
            self.icebergs_detected.load(Ordering::Relaxed),
        );
        m.insert(
            "bucket_closures",
            self.bucket_closures.load(Ordering::Relaxed),
        );
        m
    }
}
