//! Iceberg detection
//!
//! Watches every level of every book update for the concealed-size
//! signature: a level that is repeatedly partially consumed without ever
//! vanishing. Each partial depletion (`0 < qty < last_quantity`) bumps a
//! per-price counter; replenishment above the last quantity is the refill
//! half of the cycle and leaves the counter intact. The counter resets when
//! the level is deleted or when a detection fires.

use std::collections::BTreeMap;

use tracing::info;
use types::depth::BookUpdate;
use types::level::PriceKey;
use types::side::Side;
use types::symbol::Symbol;

use crate::events::{EventSender, FlowEvent};

/// Partial depletions required before a level is flagged.
const REFILL_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, Default)]
struct LevelState {
    last_quantity: f64,
    consecutive_refills: u32,
}

/// Per-symbol iceberg detector.
pub struct IcebergDetector {
    symbol: Symbol,
    levels: BTreeMap<PriceKey, LevelState>,
    events: EventSender,
    detections: u64,
}

impl IcebergDetector {
    pub fn new(symbol: Symbol, events: EventSender) -> Self {
        Self {
            symbol,
            levels: BTreeMap::new(),
            events,
            detections: 0,
        }
    }

    /// Feed one book update through the detector.
    pub fn process_update(&mut self, update: &BookUpdate) {
        for level in &update.bids {
            self.observe(level.price, level.quantity, Side::Bid, update.timestamp_ns);
        }
        for level in &update.asks {
            self.observe(level.price, level.quantity, Side::Ask, update.timestamp_ns);
        }
    }

    /// Detections emitted since creation.
    pub fn detections(&self) -> u64 {
        self.detections
    }

    /// Number of price levels currently tracked.
    pub fn tracked_levels(&self) -> usize {
        self.levels.len()
    }

    fn observe(&mut self, price: f64, quantity: f64, side: Side, timestamp_ns: u64) {
        let key = PriceKey::from(price);

        if quantity <= 0.0 {
            // Level vanished; nothing left to refill.
            self.levels.remove(&key);
            return;
        }

        let state = self.levels.entry(key).or_default();
        if state.last_quantity > 0.0 && quantity < state.last_quantity {
            state.consecutive_refills += 1;
            if state.consecutive_refills >= REFILL_THRESHOLD {
                state.consecutive_refills = 0;
                state.last_quantity = quantity;
                self.detections += 1;
                info!(
                    symbol = %self.symbol,
                    side = side.label(),
                    price,
                    "Iceberg detected"
                );
                self.events.send(FlowEvent::Iceberg {
                    symbol: self.symbol.clone(),
                    price,
                    side,
                    timestamp_ns,
                });
                return;
            }
        }
        // Growth is the refill half of the cycle; the counter survives it.
        state.last_quantity = quantity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use types::level::PriceLevel;

    fn make_detector() -> (IcebergDetector, std::sync::mpsc::Receiver<FlowEvent>) {
        let (tx, rx) = events::channel();
        (IcebergDetector::new(Symbol::new("BTCUSDT"), tx), rx)
    }

    fn ask_update(price: f64, quantity: f64) -> BookUpdate {
        BookUpdate {
            timestamp_ns: 1,
            last_update_id: 1,
            bids: vec![],
            asks: vec![PriceLevel::new(price, quantity)],
        }
    }

    #[test]
    fn test_deplete_refill_cycle_detects_once() {
        let (mut detector, rx) = make_detector();

        // Three partial depletions interleaved with refills.
        for qty in [5.0, 3.0, 5.0, 2.0, 5.0, 1.0] {
            detector.process_update(&ask_update(30000.0, qty));
        }

        assert_eq!(detector.detections(), 1);
        match rx.try_recv().unwrap() {
            FlowEvent::Iceberg { price, side, .. } => {
                assert_eq!(price, 30000.0);
                assert_eq!(side, Side::Ask);
            }
            other => panic!("expected iceberg, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_monotone_decreases_detect() {
        let (mut detector, rx) = make_detector();

        for qty in [5.0, 4.0, 3.0, 2.0] {
            detector.process_update(&ask_update(30000.0, qty));
        }

        assert_eq!(detector.detections(), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_two_decreases_do_not_detect() {
        let (mut detector, rx) = make_detector();

        for qty in [5.0, 3.0, 2.0] {
            detector.process_update(&ask_update(30000.0, qty));
        }

        assert_eq!(detector.detections(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_vanish_resets_counter() {
        let (mut detector, _rx) = make_detector();

        detector.process_update(&ask_update(30000.0, 5.0));
        detector.process_update(&ask_update(30000.0, 3.0));
        detector.process_update(&ask_update(30000.0, 2.0));
        // Level pulled entirely: counter state is discarded.
        detector.process_update(&ask_update(30000.0, 0.0));
        assert_eq!(detector.tracked_levels(), 0);

        detector.process_update(&ask_update(30000.0, 5.0));
        detector.process_update(&ask_update(30000.0, 4.0));
        assert_eq!(detector.detections(), 0);
    }

    #[test]
    fn test_counter_resets_after_detection() {
        let (mut detector, _rx) = make_detector();

        for qty in [5.0, 4.0, 3.0, 2.0] {
            detector.process_update(&ask_update(30000.0, qty));
        }
        assert_eq!(detector.detections(), 1);

        // Two further decreases are not enough for a second detection.
        detector.process_update(&ask_update(30000.0, 1.5));
        detector.process_update(&ask_update(30000.0, 1.0));
        assert_eq!(detector.detections(), 1);

        detector.process_update(&ask_update(30000.0, 0.5));
        assert_eq!(detector.detections(), 2);
    }

    #[test]
    fn test_bid_and_ask_tracked_independently() {
        let (mut detector, rx) = make_detector();

        let update = |bid_qty: f64, ask_qty: f64| BookUpdate {
            timestamp_ns: 1,
            last_update_id: 1,
            bids: vec![PriceLevel::new(29000.0, bid_qty)],
            asks: vec![PriceLevel::new(31000.0, ask_qty)],
        };

        detector.process_update(&update(5.0, 5.0));
        detector.process_update(&update(4.0, 5.0));
        detector.process_update(&update(3.0, 5.0));
        detector.process_update(&update(2.0, 5.0));

        assert_eq!(detector.detections(), 1);
        match rx.try_recv().unwrap() {
            FlowEvent::Iceberg { side, price, .. } => {
                assert_eq!(side, Side::Bid);
                assert_eq!(price, 29000.0);
            }
            other => panic!("expected iceberg, got {:?}", other),
        }
    }
}
