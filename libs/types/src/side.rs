//! Book side enum

use serde::{Deserialize, Serialize};

/// Side of the book a level or flow belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Bid side (resting buy interest)
    Bid,
    /// Ask side (resting sell interest)
    Ask,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    /// Whether this is the bid side.
    pub fn is_bid(&self) -> bool {
        matches!(self, Side::Bid)
    }

    /// Label used in log lines and the display renderer.
    pub fn label(&self) -> &'static str {
        match self {
            Side::Bid => "BID",
            Side::Ask => "ASK",
        }
    }
}
