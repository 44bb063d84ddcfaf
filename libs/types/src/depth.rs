//! Depth diffs, ring book updates, and REST snapshots
//!
//! A `DepthDiff` is the feed-side representation of a streamed depth event
//! and keeps its zero-quantity delete levels: the book keeper needs them to
//! remove levels, the liquidity tracker reads full pulls as cancels, and the
//! iceberg detector treats them as a vanished level.
//!
//! A `BookUpdate` is the trimmed form carried on the ring bus (its frame
//! header has no first-update id), and a `BookSnapshot` is the REST depth
//! image used for reconciliation.

use crate::level::PriceLevel;
use serde::{Deserialize, Serialize};

/// An incremental patch to both book sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthDiff {
    /// First update id covered by this diff (`U`).
    pub first_update_id: u64,
    /// Last update id covered by this diff (`u`).
    pub last_update_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    /// Venue event time converted to nanoseconds.
    pub event_time_ns: u64,
}

impl DepthDiff {
    /// Whether this diff is applicable to a book currently at `book_update_id`:
    /// the diff must cover `book_update_id + 1`.
    pub fn is_applicable(&self, book_update_id: u64) -> bool {
        self.first_update_id <= book_update_id + 1 && book_update_id + 1 <= self.last_update_id
    }

    /// Whether this diff only carries already-applied updates.
    pub fn is_stale(&self, book_update_id: u64) -> bool {
        self.last_update_id <= book_update_id
    }

    /// Whether this diff starts beyond `book_update_id + 1` (a gap).
    pub fn leaves_gap(&self, book_update_id: u64) -> bool {
        self.first_update_id > book_update_id + 1
    }
}

/// Book update payload as carried on the ring bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookUpdate {
    pub timestamp_ns: u64,
    pub last_update_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl From<&DepthDiff> for BookUpdate {
    fn from(diff: &DepthDiff) -> Self {
        Self {
            timestamp_ns: diff.event_time_ns,
            last_update_id: diff.last_update_id,
            bids: diff.bids.clone(),
            asks: diff.asks.clone(),
        }
    }
}

/// Full book image returned by the REST depth endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub last_update_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}
