//! Order book keeper
//!
//! Maintains the reconstructed book for one symbol: snapshot installs, diff
//! application, tick-size re-aggregation, and cached metrics. Sides are
//! `BTreeMap`s keyed by tick-rounded price, so bids iterate highest-first via
//! `rev()` and asks lowest-first naturally.
//!
//! The book mutex is held only for mutation and for the copy window at the
//! start of a metrics refresh. Metric arithmetic runs on copied level
//! vectors outside the lock so the high-frequency writer is never blocked by
//! imbalance computation; results land in a cache behind its own lock.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use ordered_float::OrderedFloat;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};
use types::depth::{BookSnapshot, DepthDiff};
use types::errors::BookError;
use types::level::{
    is_valid_tick_size, round_to_tick, LevelEntry, LevelSource, PriceKey, PriceLevel,
};
use types::symbol::Symbol;

/// Bids priced below this fraction of the best bid are swept after every
/// update. Heuristic hardening against cross-book deletes that never
/// arrived; it is not a correctness guarantee.
const STALE_BID_FRACTION: f64 = 0.95;

/// Depth cutoffs reported by the imbalance metrics.
const IMBALANCE_DEPTHS: [usize; 3] = [2, 10, 20];

#[derive(Debug, Default)]
struct Book {
    bids: BTreeMap<PriceKey, LevelEntry>,
    asks: BTreeMap<PriceKey, LevelEntry>,
    last_update_id: u64,
    tick_size: f64,
}

impl Book {
    fn best_bid(&self) -> Option<f64> {
        self.bids.keys().next_back().map(|k| k.0)
    }

    fn best_ask(&self) -> Option<f64> {
        self.asks.keys().next().map(|k| k.0)
    }

    fn apply_levels(side: &mut BTreeMap<PriceKey, LevelEntry>, levels: &[PriceLevel], tick: f64) {
        for level in levels {
            let key = OrderedFloat(round_to_tick(level.price, tick));
            if level.quantity > 0.0 {
                side.insert(
                    key,
                    LevelEntry {
                        quantity: level.quantity,
                        source: LevelSource::Diff,
                    },
                );
            } else {
                side.remove(&key);
            }
        }
    }

    /// Drop bids that fell too far below the best bid.
    fn sweep_stale_bids(&mut self) -> usize {
        let Some(best_bid) = self.best_bid() else {
            return 0;
        };
        if best_bid <= 0.0 {
            return 0;
        }
        let cutoff = best_bid * STALE_BID_FRACTION;
        let before = self.bids.len();
        self.bids.retain(|price, _| price.0 >= cutoff);
        before - self.bids.len()
    }

    fn reaggregate(side: &BTreeMap<PriceKey, LevelEntry>, tick: f64) -> BTreeMap<PriceKey, LevelEntry> {
        let mut merged: BTreeMap<PriceKey, LevelEntry> = BTreeMap::new();
        for (price, entry) in side {
            let key = OrderedFloat(round_to_tick(price.0, tick));
            merged
                .entry(key)
                .and_modify(|existing| {
                    existing.quantity += entry.quantity;
                    existing.source = entry.source;
                })
                .or_insert(*entry);
        }
        merged
    }
}

/// Cached book metrics, refreshed after every mutation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BookMetrics {
    pub best_bid: f64,
    pub best_ask: f64,
    pub spread: f64,
    pub imbalance_2: f64,
    pub imbalance_10: f64,
    pub imbalance_20: f64,
    pub imbalance_all: f64,
    pub total_bid_usd: f64,
    pub total_ask_usd: f64,
    pub last_update_id: u64,
    /// Unix nanos when this cache entry was computed.
    pub updated_ns: u64,
}

/// Pressure reading for an imbalance value.
pub fn interpret_imbalance(imbalance: f64) -> &'static str {
    if imbalance > 0.20 {
        "strong buying pressure"
    } else if imbalance > 0.05 {
        "moderate buying pressure"
    } else if imbalance < -0.20 {
        "strong selling pressure"
    } else if imbalance < -0.05 {
        "moderate selling pressure"
    } else {
        "neutral"
    }
}

/// `(bid_usd − ask_usd) / (bid_usd + ask_usd)`, 0 when the book is empty.
fn imbalance(ask_usd: f64, bid_usd: f64) -> f64 {
    let total = ask_usd + bid_usd;
    if total > 0.0 {
        (bid_usd - ask_usd) / total
    } else {
        0.0
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// The reconstructed book for a single symbol plus its metric cache.
pub struct BookKeeper {
    symbol: Symbol,
    book: Mutex<Book>,
    metrics: Mutex<BookMetrics>,
    imbalance_enabled: AtomicBool,
}

impl BookKeeper {
    pub fn new(symbol: Symbol, tick_size: f64) -> Self {
        Self {
            symbol,
            book: Mutex::new(Book {
                tick_size,
                ..Book::default()
            }),
            metrics: Mutex::new(BookMetrics::default()),
            imbalance_enabled: AtomicBool::new(true),
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Replace both sides with a snapshot image. Readers see either the old
    /// book or the new one, never a mix.
    pub fn apply_snapshot(&self, snap: &BookSnapshot) {
        {
            let mut book = self.book.lock();
            let tick = book.tick_size;
            book.bids.clear();
            book.asks.clear();
            for level in &snap.bids {
                if level.quantity > 0.0 {
                    book.bids.insert(
                        OrderedFloat(round_to_tick(level.price, tick)),
                        LevelEntry {
                            quantity: level.quantity,
                            source: LevelSource::Snapshot,
                        },
                    );
                }
            }
            for level in &snap.asks {
                if level.quantity > 0.0 {
                    book.asks.insert(
                        OrderedFloat(round_to_tick(level.price, tick)),
                        LevelEntry {
                            quantity: level.quantity,
                            source: LevelSource::Snapshot,
                        },
                    );
                }
            }
            book.last_update_id = snap.last_update_id;
            book.sweep_stale_bids();
        }
        debug!(
            symbol = %self.symbol,
            last_update_id = snap.last_update_id,
            bids = snap.bids.len(),
            asks = snap.asks.len(),
            "Snapshot installed"
        );
        self.refresh_metrics();
    }

    /// Apply a depth diff. Sequencing is the reconciler's concern; this only
    /// mutates levels and validates the resulting book.
    pub fn apply_diff(&self, diff: &DepthDiff) -> Result<(), BookError> {
        for level in diff.bids.iter().chain(diff.asks.iter()) {
            if level.quantity < 0.0 {
                let err = BookError::NonPositiveQuantity {
                    price: level.price,
                    quantity: level.quantity,
                };
                warn!(symbol = %self.symbol, error = %err, "Rejecting malformed diff");
                return Err(err);
            }
        }

        let result = {
            let mut book = self.book.lock();
            let tick = book.tick_size;

            Book::apply_levels(&mut book.bids, &diff.bids, tick);
            Book::apply_levels(&mut book.asks, &diff.asks, tick);
            book.last_update_id = diff.last_update_id;

            let swept = book.sweep_stale_bids();
            if swept > 0 {
                debug!(symbol = %self.symbol, swept, "Swept stale bids");
            }

            match (book.best_bid(), book.best_ask()) {
                (Some(bid), Some(ask)) if bid >= ask => Err(BookError::CrossedBook {
                    best_bid: bid,
                    best_ask: ask,
                }),
                _ => Ok(()),
            }
        };

        if let Err(ref err) = result {
            warn!(symbol = %self.symbol, error = %err, "Book invariant violated");
        }
        self.refresh_metrics();
        result
    }

    /// Discard all book state (used when a resync is triggered).
    pub fn clear(&self) {
        let mut book = self.book.lock();
        book.bids.clear();
        book.asks.clear();
        book.last_update_id = 0;
        drop(book);
        self.refresh_metrics();
    }

    /// Switch tick size and re-aggregate both sides under the new rounding.
    ///
    /// Total quantity per side is preserved; merged levels keep the last
    /// source tag encountered (provenance is diagnostic only).
    pub fn set_tick_size(&self, tick: f64) -> Result<(), BookError> {
        if !is_valid_tick_size(tick) {
            return Err(BookError::InvalidTickSize(tick));
        }
        {
            let mut book = self.book.lock();
            let merged_bids = Book::reaggregate(&book.bids, tick);
            let merged_asks = Book::reaggregate(&book.asks, tick);
            book.bids = merged_bids;
            book.asks = merged_asks;
            book.tick_size = tick;
        }
        debug!(symbol = %self.symbol, tick_size = tick, "Tick size changed");
        self.refresh_metrics();
        Ok(())
    }

    pub fn tick_size(&self) -> f64 {
        self.book.lock().tick_size
    }

    pub fn last_update_id(&self) -> u64 {
        self.book.lock().last_update_id
    }

    pub fn bid_depth(&self) -> usize {
        self.book.lock().bids.len()
    }

    pub fn ask_depth(&self) -> usize {
        self.book.lock().asks.len()
    }

    /// Top `n` levels per side with provenance, bids highest-first and asks
    /// lowest-first, for the display renderer.
    pub fn top_levels(&self, n: usize) -> (Vec<(PriceLevel, LevelSource)>, Vec<(PriceLevel, LevelSource)>) {
        let book = self.book.lock();
        let bids = book
            .bids
            .iter()
            .rev()
            .take(n)
            .map(|(p, e)| (PriceLevel::new(p.0, e.quantity), e.source))
            .collect();
        let asks = book
            .asks
            .iter()
            .take(n)
            .map(|(p, e)| (PriceLevel::new(p.0, e.quantity), e.source))
            .collect();
        (bids, asks)
    }

    /// Total quantity per side; used by the re-aggregation tests.
    pub fn side_totals(&self) -> (f64, f64) {
        let book = self.book.lock();
        let bid_total = book.bids.values().map(|e| e.quantity).sum();
        let ask_total = book.asks.values().map(|e| e.quantity).sum();
        (bid_total, ask_total)
    }

    pub fn set_imbalance_enabled(&self, enabled: bool) {
        self.imbalance_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn imbalance_enabled(&self) -> bool {
        self.imbalance_enabled.load(Ordering::Relaxed)
    }

    /// Latest cached metrics.
    pub fn metrics(&self) -> BookMetrics {
        self.metrics.lock().clone()
    }

    /// Recompute the metric cache.
    ///
    /// Copies `(price, quantity)` vectors inside a short critical section,
    /// releases the book lock, then does the arithmetic on the copies. The
    /// copy is deliberate: the writer must never wait on metric math.
    pub fn refresh_metrics(&self) {
        let (bids, asks, last_update_id): (Vec<(f64, f64)>, Vec<(f64, f64)>, u64) = {
            let book = self.book.lock();
            (
                book.bids.iter().rev().map(|(p, e)| (p.0, e.quantity)).collect(),
                book.asks.iter().map(|(p, e)| (p.0, e.quantity)).collect(),
                book.last_update_id,
            )
        };

        let mut computed = BookMetrics {
            last_update_id,
            updated_ns: now_ns(),
            ..BookMetrics::default()
        };

        computed.best_bid = bids.first().map(|(p, _)| *p).unwrap_or(0.0);
        computed.best_ask = asks.first().map(|(p, _)| *p).unwrap_or(0.0);
        if computed.best_bid > 0.0 && computed.best_ask > 0.0 {
            computed.spread = computed.best_ask - computed.best_bid;
        }

        if self.imbalance_enabled() {
            let mut bid_usd = [0.0f64; 3];
            let mut ask_usd = [0.0f64; 3];
            let mut bid_all = 0.0;
            let mut ask_all = 0.0;

            for (i, (price, qty)) in bids.iter().enumerate() {
                let usd = price * qty;
                for (slot, depth) in IMBALANCE_DEPTHS.iter().enumerate() {
                    if i < *depth {
                        bid_usd[slot] += usd;
                    }
                }
                bid_all += usd;
            }
            for (i, (price, qty)) in asks.iter().enumerate() {
                let usd = price * qty;
                for (slot, depth) in IMBALANCE_DEPTHS.iter().enumerate() {
                    if i < *depth {
                        ask_usd[slot] += usd;
                    }
                }
                ask_all += usd;
            }

            computed.imbalance_2 = imbalance(ask_usd[0], bid_usd[0]);
            computed.imbalance_10 = imbalance(ask_usd[1], bid_usd[1]);
            computed.imbalance_20 = imbalance(ask_usd[2], bid_usd[2]);
            computed.imbalance_all = imbalance(ask_all, bid_all);
            computed.total_bid_usd = bid_all;
            computed.total_ask_usd = ask_all;
        }

        *self.metrics.lock() = computed;
    }
}
