//! Snapshot/diff reconciliation
//!
//! Tracks whether the book is provably contiguous with the venue's update
//! stream. While a snapshot fetch is outstanding, live diffs are buffered
//! (bounded). When the snapshot lands, buffered diffs older than it are
//! dropped, the first applied diff must bridge the snapshot's update id, and
//! from then on every diff must continue the sequence exactly. Any gap,
//! overlap, or book-invariant violation discards the book and requests a
//! fresh snapshot.

use std::collections::VecDeque;

use thiserror::Error;
use tracing::{info, warn};
use types::depth::{BookSnapshot, DepthDiff};
use types::errors::{BookError, SequenceError};

use crate::book::BookKeeper;

/// Why a resync was triggered.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResyncReason {
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    #[error(transparent)]
    Book(#[from] BookError),
}

/// Outcome of offering one diff to the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffOutcome {
    /// Applied to the book.
    Applied,
    /// Held until the outstanding snapshot lands.
    Buffered,
    /// Stale (already covered by the book); discarded.
    Dropped,
    /// The book was discarded; the caller must request a snapshot.
    ResyncRequired(ResyncReason),
}

/// Snapshot/diff reconciliation state machine.
pub struct Reconciler {
    /// A snapshot is outstanding; diffs are buffered.
    awaiting_snapshot: bool,
    /// Snapshot installed but the first bridging diff has not applied yet.
    awaiting_bridge: bool,
    buffer: VecDeque<DepthDiff>,
    buffer_capacity: usize,
    resyncs: u64,
}

impl Reconciler {
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            awaiting_snapshot: true,
            awaiting_bridge: false,
            buffer: VecDeque::new(),
            buffer_capacity,
            resyncs: 0,
        }
    }

    /// Whether diffs are currently applied live (not buffered).
    pub fn is_synced(&self) -> bool {
        !self.awaiting_snapshot
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Resyncs triggered since creation.
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    /// Offer one live diff.
    pub fn on_diff(&mut self, diff: DepthDiff, book: &BookKeeper) -> DiffOutcome {
        if self.awaiting_snapshot {
            if self.buffer.len() >= self.buffer_capacity {
                let err = SequenceError::BufferOverflow {
                    capacity: self.buffer_capacity,
                };
                warn!(error = %err, "Diff buffer overflowed while awaiting snapshot");
                self.begin_resync(book);
                return DiffOutcome::ResyncRequired(err.into());
            }
            self.buffer.push_back(diff);
            return DiffOutcome::Buffered;
        }

        let last = book.last_update_id();
        if diff.is_stale(last) {
            return DiffOutcome::Dropped;
        }

        let in_sequence = if self.awaiting_bridge {
            diff.is_applicable(last)
        } else {
            diff.first_update_id == last + 1
        };

        if !in_sequence {
            let err = SequenceError::Gap {
                expected: last + 1,
                actual: diff.first_update_id,
            };
            warn!(error = %err, "Out-of-sequence diff; discarding book");
            self.begin_resync(book);
            return DiffOutcome::ResyncRequired(err.into());
        }

        match book.apply_diff(&diff) {
            Ok(()) => {
                self.awaiting_bridge = false;
                DiffOutcome::Applied
            }
            Err(err) => {
                self.begin_resync(book);
                DiffOutcome::ResyncRequired(err.into())
            }
        }
    }

    /// Install a fetched snapshot and replay the buffered diffs against it.
    ///
    /// Returns the number of buffered diffs applied. An unbridgeable buffer
    /// discards the book again and asks for a refetch.
    pub fn on_snapshot(
        &mut self,
        snap: &BookSnapshot,
        book: &BookKeeper,
    ) -> Result<usize, SequenceError> {
        book.apply_snapshot(snap);
        self.awaiting_snapshot = false;
        self.awaiting_bridge = true;

        let buffered: Vec<DepthDiff> = self.buffer.drain(..).collect();
        let mut applied = 0usize;

        for diff in buffered {
            match self.on_diff(diff, book) {
                DiffOutcome::Applied => applied += 1,
                DiffOutcome::Dropped => {}
                DiffOutcome::ResyncRequired(reason) => {
                    warn!(
                        snapshot_update_id = snap.last_update_id,
                        error = %reason,
                        "Buffered diffs do not bridge the snapshot"
                    );
                    return Err(SequenceError::NoBridgingDiff {
                        snapshot_update_id: snap.last_update_id,
                    });
                }
                // on_diff never buffers once awaiting_snapshot is false.
                DiffOutcome::Buffered => unreachable!(),
            }
        }

        info!(
            snapshot_update_id = snap.last_update_id,
            buffered_applied = applied,
            "Book synchronized"
        );
        Ok(applied)
    }

    /// Discard book state and start waiting for a fresh snapshot.
    pub fn begin_resync(&mut self, book: &BookKeeper) {
        book.clear();
        self.buffer.clear();
        self.awaiting_snapshot = true;
        self.awaiting_bridge = false;
        self.resyncs += 1;
    }
}
