//! Price levels, level provenance, and tick-size handling
//!
//! Book sides are keyed by `PriceKey` (`OrderedFloat<f64>`) so that raw
//! venue prices can live in a `BTreeMap` after tick canonicalization.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Ordered key type for price-indexed maps.
pub type PriceKey = OrderedFloat<f64>;

/// Tick sizes the book keeper accepts.
pub const TICK_SIZES: [f64; 6] = [0.001, 0.01, 0.1, 1.0, 10.0, 100.0];

/// A single price level as carried on the wire.
///
/// A quantity of zero is the wire-level delete sentinel; it is never stored
/// in a book side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub quantity: f64,
}

impl PriceLevel {
    pub fn new(price: f64, quantity: f64) -> Self {
        Self { price, quantity }
    }

    /// Quote-currency value of this level (price × quantity).
    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }

    /// Whether this level is a delete instruction.
    pub fn is_delete(&self) -> bool {
        self.quantity <= 0.0
    }
}

/// Provenance of a stored level. Diagnostic only: re-aggregation keeps the
/// last tag encountered per merged level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelSource {
    /// Installed by a REST snapshot.
    Snapshot,
    /// Written by a streamed depth diff.
    Diff,
}

impl LevelSource {
    /// Short tag used in the display renderer.
    pub fn tag(&self) -> &'static str {
        match self {
            LevelSource::Snapshot => "API",
            LevelSource::Diff => "WS",
        }
    }
}

/// Quantity plus provenance, as stored in a book side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelEntry {
    pub quantity: f64,
    pub source: LevelSource,
}

/// Round a price to the nearest multiple of `tick`.
///
/// A non-positive or denormal tick leaves the price untouched.
pub fn round_to_tick(price: f64, tick: f64) -> f64 {
    if tick.abs() < 1e-9 {
        return price;
    }
    (price / tick).round() * tick
}

/// Whether `tick` is one of the accepted sizes (epsilon compare, since the
/// CLI parses it from user input).
pub fn is_valid_tick_size(tick: f64) -> bool {
    TICK_SIZES.iter().any(|t| (tick - t).abs() < 1e-6)
}

/// Display precision appropriate for a tick size (3 decimals for 0.001 down
/// to 0 for whole-number ticks).
pub fn precision_for_tick(tick: f64) -> usize {
    if tick.abs() < 1e-9 {
        return 3;
    }
    if tick >= 1.0 {
        return 0;
    }
    (-tick.log10()).ceil().max(0.0) as usize
}
