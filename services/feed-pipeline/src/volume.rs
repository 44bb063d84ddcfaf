//! Trade volume statistics
//!
//! Cumulative and time-windowed buy/sell volume in base and quote terms,
//! plus a bounded cache of recent trades for the display renderer.

use std::collections::VecDeque;

use serde::Serialize;
use types::trade::TradeRecord;

/// Window length for rolling volume aggregation (5 minutes).
const WINDOW_DURATION_NS: u64 = 300 * 1_000_000_000;

/// Recent trades kept for display.
const RECENT_TRADES: usize = 20;

/// Buy/sell ratio sentinel when no sell volume has been seen yet.
const RATIO_SENTINEL: f64 = 999.99;

/// Volume totals for one time window.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct VolumeWindow {
    pub buy_base: f64,
    pub sell_base: f64,
    pub buy_usd: f64,
    pub sell_usd: f64,
    pub start_ts_ns: u64,
}

/// Cumulative and windowed volume statistics for one symbol.
#[derive(Debug, Default)]
pub struct VolumeStats {
    pub cum_buy_base: f64,
    pub cum_sell_base: f64,
    pub cum_buy_usd: f64,
    pub cum_sell_usd: f64,

    windows: Vec<VolumeWindow>,
    recent: VecDeque<TradeRecord>,
}

impl VolumeStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one trade into the statistics.
    pub fn record(&mut self, trade: &TradeRecord) {
        let usd = trade.notional();
        let ts = trade.timestamp_ns;

        if trade.is_buy() {
            self.cum_buy_base += trade.quantity;
            self.cum_buy_usd += usd;
        } else {
            self.cum_sell_base += trade.quantity;
            self.cum_sell_usd += usd;
        }

        let needs_new_window = match self.windows.last() {
            Some(window) => ts.saturating_sub(window.start_ts_ns) > WINDOW_DURATION_NS,
            None => true,
        };
        if needs_new_window {
            self.windows.push(VolumeWindow {
                start_ts_ns: ts,
                ..VolumeWindow::default()
            });
        }
        let window = self.windows.last_mut().expect("window just ensured");
        if trade.is_buy() {
            window.buy_base += trade.quantity;
            window.buy_usd += usd;
        } else {
            window.sell_base += trade.quantity;
            window.sell_usd += usd;
        }

        if self.recent.len() >= RECENT_TRADES {
            self.recent.pop_front();
        }
        self.recent.push_back(*trade);
    }

    /// Cumulative buy/sell ratio in USD terms. Sentinel-valued until the
    /// first sell; zero before any volume at all.
    pub fn buy_sell_usd_ratio(&self) -> f64 {
        if self.cum_sell_usd > 0.0 {
            self.cum_buy_usd / self.cum_sell_usd
        } else if self.cum_buy_usd > 0.0 {
            RATIO_SENTINEL
        } else {
            0.0
        }
    }

    /// The currently filling window, if any trade has been seen.
    pub fn latest_window(&self) -> Option<&VolumeWindow> {
        self.windows.last()
    }

    /// Recent trades, newest first.
    pub fn recent_trades(&self, limit: usize) -> Vec<TradeRecord> {
        self.recent.iter().rev().take(limit).copied().collect()
    }
}
