//! Error taxonomy shared across the pipeline
//!
//! Book and sequencing errors live here because both the feed path and the
//! tests reason about them; transport-edge errors stay with the modules that
//! own the connections.

use thiserror::Error;

/// Errors raised while mutating or validating the order book.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BookError {
    #[error("tick size {0} not in the accepted set")]
    InvalidTickSize(f64),

    #[error("crossed book: best bid {best_bid} >= best ask {best_ask}")]
    CrossedBook { best_bid: f64, best_ask: f64 },

    #[error("non-positive quantity {quantity} at price {price}")]
    NonPositiveQuantity { price: f64, quantity: f64 },
}

/// Errors raised by the snapshot/diff reconciliation state machine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SequenceError {
    #[error("sequence gap: expected first_update_id {expected}, got {actual}")]
    Gap { expected: u64, actual: u64 },

    #[error("no buffered diff bridges snapshot update id {snapshot_update_id}")]
    NoBridgingDiff { snapshot_update_id: u64 },

    #[error("diff buffer overflow: {capacity} diffs buffered while snapshot outstanding")]
    BufferOverflow { capacity: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SequenceError::Gap {
            expected: 101,
            actual: 103,
        };
        assert_eq!(
            err.to_string(),
            "sequence gap: expected first_update_id 101, got 103"
        );

        let err = BookError::InvalidTickSize(0.05);
        assert!(err.to_string().contains("0.05"));
    }
}
