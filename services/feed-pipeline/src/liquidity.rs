//! Liquidity flow tracker
//!
//! Tracks flow in two orthogonal modes. Trade-driven buckets accumulate
//! executed notional per aggressor side and close on a USD threshold;
//! order-flow buckets accumulate quantity additions observed in book diffs.
//! Book diffs additionally drive cancellation detection: a level losing at
//! least `cancel_fraction` of its prior quantity in one step is read as a
//! pull rather than passive execution and credits the cancel bucket for its
//! side.
//!
//! Prices are rounded with the tracker's own tick size before comparison so
//! delta detection is stable across sub-tick wobbles; the tracked depth per
//! side is bounded.

use std::collections::BTreeMap;

use ordered_float::OrderedFloat;
use tracing::debug;
use types::depth::BookUpdate;
use types::level::{round_to_tick, PriceKey};
use types::trade::TradeRecord;

use crate::config::PipelineConfig;
use crate::events::{EventSender, FlowEvent};

/// Quantity changes smaller than this are treated as noise.
const QTY_EPSILON: f64 = 1e-8;

/// Trade-driven bucket for one aggressor side.
#[derive(Debug, Default, Clone, Copy)]
struct TradeBucket {
    accum_usd: f64,
    flow_same: f64,
    flow_opposite: f64,
    start_ts_ns: u64,
}

impl TradeBucket {
    fn is_open(&self) -> bool {
        self.start_ts_ns != 0
    }

    fn add_same(&mut self, notional: f64, ts_ns: u64) {
        if self.start_ts_ns == 0 {
            self.start_ts_ns = ts_ns;
        }
        self.accum_usd += notional;
        self.flow_same += notional;
    }

    fn reset(&mut self) {
        *self = TradeBucket::default();
    }
}

/// Additions-only bucket fed by book diffs.
#[derive(Debug, Default, Clone, Copy)]
struct FlowBucket {
    accum_usd: f64,
    start_ts_ns: u64,
}

/// Cancel bucket for one side.
#[derive(Debug, Default, Clone, Copy)]
struct CancelBucket {
    accum_usd: f64,
    total_usd: f64,
    start_ts_ns: u64,
}

/// Dual-mode liquidity tracker for one symbol.
pub struct LiquidityTracker {
    buy_bucket_usd: f64,
    sell_bucket_usd: f64,
    cancel_bucket_usd: f64,
    cancel_fraction: f64,
    depth_levels_track: usize,
    tick_size: f64,

    buy_bucket: TradeBucket,
    sell_bucket: TradeBucket,
    flow_buy: FlowBucket,
    flow_sell: FlowBucket,
    cancel_buy: CancelBucket,
    cancel_sell: CancelBucket,

    last_bids: BTreeMap<PriceKey, f64>,
    last_asks: BTreeMap<PriceKey, f64>,

    events: EventSender,
}

impl LiquidityTracker {
    pub fn new(config: &PipelineConfig, events: EventSender) -> Self {
        Self {
            buy_bucket_usd: config.buy_bucket_usd,
            sell_bucket_usd: config.sell_bucket_usd,
            cancel_bucket_usd: config.cancel_bucket_usd,
            cancel_fraction: config.cancel_fraction,
            depth_levels_track: config.depth_levels_track,
            tick_size: config.liquidity_tick_size,

            buy_bucket: TradeBucket::default(),
            sell_bucket: TradeBucket::default(),
            flow_buy: FlowBucket::default(),
            flow_sell: FlowBucket::default(),
            cancel_buy: CancelBucket::default(),
            cancel_sell: CancelBucket::default(),

            last_bids: BTreeMap::new(),
            last_asks: BTreeMap::new(),

            events,
        }
    }

    /// Change the rounding tick for subsequent price comparisons.
    pub fn set_tick_size(&mut self, tick: f64) {
        self.tick_size = tick;
    }

    /// Zero every bucket and forget all tracked levels.
    pub fn reset(&mut self) {
        self.buy_bucket.reset();
        self.sell_bucket.reset();
        self.flow_buy = FlowBucket::default();
        self.flow_sell = FlowBucket::default();
        self.cancel_buy = CancelBucket::default();
        self.cancel_sell = CancelBucket::default();
        self.last_bids.clear();
        self.last_asks.clear();
    }

    /// Trade-driven accumulation (mode A).
    ///
    /// The aggressor side's bucket takes the notional as same-side flow; the
    /// opposite bucket only sees it as opposing flow if it is already open,
    /// otherwise the credit is dropped.
    pub fn on_trade(&mut self, trade: &TradeRecord) {
        let notional = trade.notional();
        let ts = trade.timestamp_ns;

        if trade.is_buy() {
            if self.sell_bucket.is_open() {
                self.sell_bucket.flow_opposite += notional;
            }
            self.buy_bucket.add_same(notional, ts);
            if self.buy_bucket.accum_usd >= self.buy_bucket_usd {
                self.close_trade_bucket(true, ts);
            }
        } else {
            if self.buy_bucket.is_open() {
                self.buy_bucket.flow_opposite += notional;
            }
            self.sell_bucket.add_same(notional, ts);
            if self.sell_bucket.accum_usd >= self.sell_bucket_usd {
                self.close_trade_bucket(false, ts);
            }
        }
    }

    /// Order-flow accumulation and cancel detection (mode B).
    pub fn on_book_update(&mut self, update: &BookUpdate) {
        let ts = update.timestamp_ns;

        let mut bid_additions = 0.0;
        let mut ask_additions = 0.0;

        for level in update.bids.iter().take(self.depth_levels_track) {
            bid_additions += self.observe_level(true, level.price, level.quantity, ts);
        }
        for level in update.asks.iter().take(self.depth_levels_track) {
            ask_additions += self.observe_level(false, level.price, level.quantity, ts);
        }

        if bid_additions > 0.0 {
            Self::feed_flow_bucket(
                &mut self.flow_buy,
                bid_additions,
                self.buy_bucket_usd,
                true,
                ts,
                &self.events,
            );
        }
        if ask_additions > 0.0 {
            Self::feed_flow_bucket(
                &mut self.flow_sell,
                ask_additions,
                self.sell_bucket_usd,
                false,
                ts,
                &self.events,
            );
        }
    }

    /// Credit cancelled notional directly (also used by tests).
    pub fn process_cancel(&mut self, is_buy: bool, cancel_usd: f64, ts_ns: u64) {
        let threshold = self.cancel_bucket_usd;
        let bucket = if is_buy {
            &mut self.cancel_buy
        } else {
            &mut self.cancel_sell
        };

        if bucket.start_ts_ns == 0 {
            bucket.start_ts_ns = ts_ns;
        }
        bucket.accum_usd += cancel_usd;
        bucket.total_usd += cancel_usd;

        if bucket.accum_usd >= threshold {
            let duration_ns = ts_ns.saturating_sub(bucket.start_ts_ns);
            let cancel_ratio = bucket.total_usd / threshold;
            *bucket = CancelBucket::default();
            self.events.send(FlowEvent::CancelBucket {
                is_buy,
                duration_ns,
                size_usd: threshold,
                cancel_ratio,
            });
        }
    }

    /// Returns the USD value of additions at this level (0 for removals).
    fn observe_level(&mut self, is_bid: bool, raw_price: f64, quantity: f64, ts_ns: u64) -> f64 {
        let price = round_to_tick(raw_price, self.tick_size);
        let key = OrderedFloat(price);
        let side = if is_bid {
            &mut self.last_bids
        } else {
            &mut self.last_asks
        };

        let prev = side.get(&key).copied().unwrap_or(0.0);
        let delta = quantity - prev;

        if quantity > 0.0 {
            side.insert(key, quantity);
        } else {
            side.remove(&key);
        }

        if delta.abs() <= QTY_EPSILON {
            return 0.0;
        }

        self.events.send(FlowEvent::LiquidityChange {
            price,
            volume_delta: delta,
            timestamp_ns: ts_ns,
            is_bid,
        });

        if delta > 0.0 {
            return delta * price;
        }

        let removed = -delta;
        if prev > 0.0 && removed >= self.cancel_fraction * prev {
            debug!(
                side = if is_bid { "BID" } else { "ASK" },
                price,
                cancelled_usd = removed * price,
                "Cancel detected"
            );
            self.process_cancel(is_bid, removed * price, ts_ns);
        }
        0.0
    }

    fn feed_flow_bucket(
        bucket: &mut FlowBucket,
        additions_usd: f64,
        threshold: f64,
        is_buy: bool,
        ts_ns: u64,
        events: &EventSender,
    ) {
        if bucket.start_ts_ns == 0 {
            bucket.start_ts_ns = ts_ns;
        }
        bucket.accum_usd += additions_usd;

        if bucket.accum_usd >= threshold {
            let duration_ns = ts_ns.saturating_sub(bucket.start_ts_ns);
            let size_usd = bucket.accum_usd;
            *bucket = FlowBucket::default();
            events.send(FlowEvent::OrderFlowBucket {
                is_buy,
                duration_ns,
                size_usd,
                flow_ratio: 1.0,
            });
        }
    }

    fn close_trade_bucket(&mut self, is_buy: bool, ts_ns: u64) {
        let bucket = if is_buy {
            &mut self.buy_bucket
        } else {
            &mut self.sell_bucket
        };

        let duration_ns = ts_ns.saturating_sub(bucket.start_ts_ns);
        let size_usd = bucket.accum_usd;
        let total_flow = bucket.flow_same + bucket.flow_opposite;
        let flow_ratio = if total_flow > 0.0 {
            bucket.flow_same / total_flow
        } else {
            0.0
        };
        bucket.reset();

        self.events.send(FlowEvent::TradeBucket {
            is_buy,
            duration_ns,
            size_usd,
            flow_ratio,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use std::sync::mpsc::Receiver;
    use types::level::PriceLevel;

    fn make_tracker(config: PipelineConfig) -> (LiquidityTracker, Receiver<FlowEvent>) {
        let (tx, rx) = events::channel();
        (LiquidityTracker::new(&config, tx), rx)
    }

    fn trade(is_buy: bool, price: f64, quantity: f64, ts_ms: u64) -> TradeRecord {
        let mut t = TradeRecord {
            price,
            quantity,
            timestamp_ns: ts_ms * 1_000_000,
            ..TradeRecord::default()
        };
        t.set_buyer_maker(!is_buy);
        t
    }

    fn bid_update(ts_ns: u64, levels: Vec<PriceLevel>) -> BookUpdate {
        BookUpdate {
            timestamp_ns: ts_ns,
            last_update_id: 1,
            bids: levels,
            asks: vec![],
        }
    }

    fn drain_buckets(rx: &Receiver<FlowEvent>) -> Vec<FlowEvent> {
        rx.try_iter()
            .filter(|e| !matches!(e, FlowEvent::LiquidityChange { .. }))
            .collect()
    }

    #[test]
    fn test_buy_bucket_closes_at_threshold() {
        let (mut tracker, rx) = make_tracker(PipelineConfig::default());

        // $4k at t=0, $3k at t=100ms, $5k at t=300ms.
        tracker.on_trade(&trade(true, 10_000.0, 0.4, 0));
        tracker.on_trade(&trade(true, 10_000.0, 0.3, 100));
        assert!(drain_buckets(&rx).is_empty());

        tracker.on_trade(&trade(true, 10_000.0, 0.5, 300));

        match drain_buckets(&rx).as_slice() {
            [FlowEvent::TradeBucket {
                is_buy,
                duration_ns,
                size_usd,
                flow_ratio,
            }] => {
                assert!(*is_buy);
                assert_eq!(*duration_ns, 300_000_000);
                assert!((size_usd - 12_000.0).abs() < 1e-6);
                assert!((flow_ratio - 1.0).abs() < 1e-9);
            }
            other => panic!("expected one buy bucket closure, got {:?}", other),
        }
    }

    #[test]
    fn test_exact_multiples_close_exactly_k_buckets() {
        let (mut tracker, rx) = make_tracker(PipelineConfig::default());

        // Six $5k sells: cumulative 3 × $10k threshold → exactly 3 closures.
        for i in 0..6 {
            tracker.on_trade(&trade(false, 10_000.0, 0.5, i * 10));
        }

        let closures = drain_buckets(&rx);
        assert_eq!(closures.len(), 3);
        for event in closures {
            match event {
                FlowEvent::TradeBucket { is_buy, size_usd, .. } => {
                    assert!(!is_buy);
                    assert!((size_usd - 10_000.0).abs() < 1e-6);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn test_opposite_flow_credited_to_open_bucket() {
        let (mut tracker, rx) = make_tracker(PipelineConfig::default());

        tracker.on_trade(&trade(true, 10_000.0, 0.4, 0)); // opens buy bucket, $4k
        tracker.on_trade(&trade(false, 10_000.0, 0.2, 50)); // $2k opposing flow into buy
        tracker.on_trade(&trade(true, 10_000.0, 0.6, 200)); // closes buy at $10k

        let closures = drain_buckets(&rx);
        match closures.as_slice() {
            [FlowEvent::TradeBucket { is_buy, flow_ratio, .. }] => {
                assert!(*is_buy);
                // 10k same-side over 12k total.
                assert!((flow_ratio - 10_000.0 / 12_000.0).abs() < 1e-9);
            }
            other => panic!("expected one closure, got {:?}", other),
        }
    }

    #[test]
    fn test_opposite_flow_dropped_when_no_bucket_open() {
        let (mut tracker, rx) = make_tracker(PipelineConfig::default());

        // Buy bucket is closed: this sell's opposing credit goes nowhere.
        tracker.on_trade(&trade(false, 10_000.0, 0.1, 0));
        tracker.on_trade(&trade(true, 10_000.0, 1.0, 100));

        match drain_buckets(&rx).as_slice() {
            [FlowEvent::TradeBucket { is_buy: true, flow_ratio, .. }] => {
                assert!((flow_ratio - 1.0).abs() < 1e-9);
            }
            other => panic!("expected buy closure, got {:?}", other),
        }
    }

    #[test]
    fn test_cancel_detection_threshold() {
        let config = PipelineConfig {
            cancel_bucket_usd: 80.0,
            ..PipelineConfig::default()
        };
        let (mut tracker, rx) = make_tracker(config);

        tracker.on_book_update(&bid_update(1_000, vec![PriceLevel::new(10.00, 10.0)]));
        // 10 → 2 removes 8 ≥ 0.3 × 10: cancel worth $80 closes the bucket.
        tracker.on_book_update(&bid_update(2_000, vec![PriceLevel::new(10.00, 2.0)]));

        match drain_buckets(&rx).as_slice() {
            [FlowEvent::CancelBucket {
                is_buy,
                size_usd,
                cancel_ratio,
                ..
            }] => {
                assert!(*is_buy);
                assert!((size_usd - 80.0).abs() < 1e-9);
                assert!((cancel_ratio - 1.0).abs() < 1e-9);
            }
            other => panic!("expected cancel closure, got {:?}", other),
        }
    }

    #[test]
    fn test_small_decrease_is_passive_execution() {
        let config = PipelineConfig {
            cancel_bucket_usd: 1.0,
            ..PipelineConfig::default()
        };
        let (mut tracker, rx) = make_tracker(config);

        tracker.on_book_update(&bid_update(1_000, vec![PriceLevel::new(10.00, 10.0)]));
        // 10 → 8 removes 2 < 0.3 × 10: not a cancel.
        tracker.on_book_update(&bid_update(2_000, vec![PriceLevel::new(10.00, 8.0)]));

        assert!(drain_buckets(&rx).is_empty());
    }

    #[test]
    fn test_full_pull_counts_as_cancel() {
        let config = PipelineConfig {
            cancel_bucket_usd: 100.0,
            ..PipelineConfig::default()
        };
        let (mut tracker, rx) = make_tracker(config);

        tracker.on_book_update(&bid_update(1_000, vec![PriceLevel::new(10.00, 10.0)]));
        tracker.on_book_update(&bid_update(2_000, vec![PriceLevel::new(10.00, 0.0)]));

        let closures = drain_buckets(&rx);
        assert_eq!(closures.len(), 1);
        assert!(matches!(
            closures[0],
            FlowEvent::CancelBucket { is_buy: true, .. }
        ));
    }

    #[test]
    fn test_order_flow_bucket_on_additions() {
        let config = PipelineConfig {
            buy_bucket_usd: 100.0,
            ..PipelineConfig::default()
        };
        let (mut tracker, rx) = make_tracker(config);

        tracker.on_book_update(&bid_update(1_000, vec![PriceLevel::new(10.00, 4.0)])); // $40
        tracker.on_book_update(&bid_update(2_000, vec![PriceLevel::new(10.00, 10.0)])); // +$60

        match drain_buckets(&rx).as_slice() {
            [FlowEvent::OrderFlowBucket {
                is_buy,
                size_usd,
                flow_ratio,
                duration_ns,
            }] => {
                assert!(*is_buy);
                assert!((size_usd - 100.0).abs() < 1e-9);
                assert!((flow_ratio - 1.0).abs() < 1e-9);
                assert_eq!(*duration_ns, 1_000);
            }
            other => panic!("expected order-flow closure, got {:?}", other),
        }
    }

    #[test]
    fn test_liquidity_change_stream() {
        let (mut tracker, rx) = make_tracker(PipelineConfig::default());

        tracker.on_book_update(&bid_update(1_000, vec![PriceLevel::new(10.00, 5.0)]));
        tracker.on_book_update(&bid_update(2_000, vec![PriceLevel::new(10.00, 3.0)]));

        let changes: Vec<FlowEvent> = rx
            .try_iter()
            .filter(|e| matches!(e, FlowEvent::LiquidityChange { .. }))
            .collect();
        assert_eq!(changes.len(), 2);
        match &changes[1] {
            FlowEvent::LiquidityChange {
                price,
                volume_delta,
                is_bid,
                ..
            } => {
                assert_eq!(*price, 10.00);
                assert!((volume_delta + 2.0).abs() < 1e-9);
                assert!(*is_bid);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_tick_rounding_stabilizes_deltas() {
        let (mut tracker, rx) = make_tracker(PipelineConfig::default());

        // Both prices round to 10.00 at tick 0.01; same quantity → no delta.
        tracker.on_book_update(&bid_update(1_000, vec![PriceLevel::new(10.004, 5.0)]));
        tracker.on_book_update(&bid_update(2_000, vec![PriceLevel::new(9.996, 5.0)]));

        let changes: Vec<FlowEvent> = rx.try_iter().collect();
        assert_eq!(changes.len(), 1); // only the initial appearance
    }

    #[test]
    fn test_depth_limit_bounds_tracking() {
        let config = PipelineConfig {
            depth_levels_track: 2,
            ..PipelineConfig::default()
        };
        let (mut tracker, rx) = make_tracker(config);

        let levels: Vec<PriceLevel> = (0..5)
            .map(|i| PriceLevel::new(10.0 - i as f64 * 0.01, 1.0))
            .collect();
        tracker.on_book_update(&bid_update(1_000, levels));

        let changes: Vec<FlowEvent> = rx.try_iter().collect();
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn test_reset_clears_buckets() {
        let (mut tracker, rx) = make_tracker(PipelineConfig::default());

        tracker.on_trade(&trade(true, 10_000.0, 0.5, 0));
        tracker.reset();
        // Another $5k after the reset must not close the bucket.
        tracker.on_trade(&trade(true, 10_000.0, 0.5, 100));

        assert!(drain_buckets(&rx).is_empty());
    }
}
