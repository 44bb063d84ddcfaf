//! Analytic event stream
//!
//! The trackers publish a tagged-union event type over a channel instead of
//! exposing per-signal callback slots; one receiver sees every bucket
//! closure, cancel burst, liquidity change, and iceberg detection in arrival
//! order, which also makes the trackers straightforward to test.

use std::sync::mpsc;

use serde::Serialize;
use types::side::Side;
use types::symbol::Symbol;

/// Everything the analytic consumers emit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FlowEvent {
    /// A trade-driven bucket closed.
    TradeBucket {
        is_buy: bool,
        duration_ns: u64,
        /// Accumulated notional at close (may overshoot the threshold).
        size_usd: f64,
        /// Same-side flow over total flow seen by this bucket.
        flow_ratio: f64,
    },
    /// An order-flow (additions) bucket closed.
    OrderFlowBucket {
        is_buy: bool,
        duration_ns: u64,
        size_usd: f64,
        flow_ratio: f64,
    },
    /// A cancel bucket closed.
    CancelBucket {
        is_buy: bool,
        duration_ns: u64,
        size_usd: f64,
        cancel_ratio: f64,
    },
    /// A single level's quantity changed.
    LiquidityChange {
        price: f64,
        volume_delta: f64,
        timestamp_ns: u64,
        is_bid: bool,
    },
    /// Repeated partial refills detected at one price.
    Iceberg {
        symbol: Symbol,
        price: f64,
        side: Side,
        timestamp_ns: u64,
    },
}

impl FlowEvent {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            FlowEvent::TradeBucket { .. } => "TradeBucket",
            FlowEvent::OrderFlowBucket { .. } => "OrderFlowBucket",
            FlowEvent::CancelBucket { .. } => "CancelBucket",
            FlowEvent::LiquidityChange { .. } => "LiquidityChange",
            FlowEvent::Iceberg { .. } => "Iceberg",
        }
    }
}

/// Sending half handed to the trackers. Sends are best-effort: a departed
/// receiver must never stall a consumer loop.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<FlowEvent>,
}

impl EventSender {
    pub fn send(&self, event: FlowEvent) {
        let _ = self.tx.send(event);
    }
}

/// Create the event channel.
pub fn channel() -> (EventSender, mpsc::Receiver<FlowEvent>) {
    let (tx, rx) = mpsc::channel();
    (EventSender { tx }, rx)
}
