//! The packed trade record carried on the ring bus
//!
//! `TradeRecord` mirrors the venue's trade event one-to-one and has a fixed
//! wire size so the frame codec can pack it without a length table. Flag
//! bits carry the maker side; `is_buy` is the inverse of `is_buyer_maker`
//! (a trade where the buyer was the maker was a market sell).

use serde::{Deserialize, Serialize};

/// Flag bit: the buyer was the resting (maker) order.
pub const FLAG_BUYER_MAKER: u8 = 0b0000_0001;
/// Flag bit: aggressor was a buyer.
pub const FLAG_IS_BUY: u8 = 0b0000_0010;

/// A single executed trade as received from the feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Venue event time in milliseconds.
    pub event_time_ms: u64,
    /// Venue-assigned trade identifier.
    pub trade_id: u64,
    pub price: f64,
    pub quantity: f64,
    /// Venue order id of the buy side.
    pub buyer_order_id: u64,
    /// Venue order id of the sell side.
    pub seller_order_id: u64,
    /// Venue trade time in milliseconds.
    pub trade_time_ms: u64,
    /// Normalized timestamp in nanoseconds (trade time when present,
    /// otherwise local receive time).
    pub timestamp_ns: u64,
    /// Flag bits, see `FLAG_*`.
    pub flags: u8,
}

/// Packed wire size: eight 8-byte fields plus the flag byte.
pub const TRADE_RECORD_SIZE: usize = 8 * 8 + 1;

impl TradeRecord {
    /// Whether the buyer was the maker.
    pub fn is_buyer_maker(&self) -> bool {
        self.flags & FLAG_BUYER_MAKER != 0
    }

    /// Whether the aggressor was a buyer.
    pub fn is_buy(&self) -> bool {
        self.flags & FLAG_IS_BUY != 0
    }

    /// Set both maker flags consistently from the venue's `m` field.
    pub fn set_buyer_maker(&mut self, is_buyer_maker: bool) {
        if is_buyer_maker {
            self.flags |= FLAG_BUYER_MAKER;
            self.flags &= !FLAG_IS_BUY;
        } else {
            self.flags &= !FLAG_BUYER_MAKER;
            self.flags |= FLAG_IS_BUY;
        }
    }

    /// Quote-currency value of the trade.
    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }
}

impl Default for TradeRecord {
    fn default() -> Self {
        Self {
            event_time_ms: 0,
            trade_id: 0,
            price: 0.0,
            quantity: 0.0,
            buyer_order_id: 0,
            seller_order_id: 0,
            trade_time_ms: 0,
            timestamp_ns: 0,
            flags: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maker_flags_are_inverse() {
        let mut trade = TradeRecord::default();

        trade.set_buyer_maker(false);
        assert!(trade.is_buy());
        assert!(!trade.is_buyer_maker());

        trade.set_buyer_maker(true);
        assert!(!trade.is_buy());
        assert!(trade.is_buyer_maker());
    }

    #[test]
    fn test_notional() {
        let trade = TradeRecord {
            price: 30000.0,
            quantity: 0.5,
            ..TradeRecord::default()
        };
        assert_eq!(trade.notional(), 15000.0);
    }
}
