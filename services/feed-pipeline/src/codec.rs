//! Wire codec: feed JSON parsing and ring-bus frame packing
//!
//! Two wire surfaces meet here. Inbound, the venue's JSON events (`"e"`
//! discriminated) are decoded into `TradeRecord` and `DepthDiff`. Internally,
//! records cross the ring bus as length-prefixed typed frames:
//!
//! ```text
//! u8  type_tag   (0x01 trade | 0x02 orderbook)
//! u32 length     (payload bytes, little-endian)
//! ... payload ...
//! ```
//!
//! The trade payload is the fixed 65-byte packed record. The orderbook
//! payload is a 24-byte header (timestamp, last update id, level counts)
//! followed by packed `f64` price/quantity pairs. Everything little-endian.

use serde::Deserialize;
use thiserror::Error;
use types::depth::{BookSnapshot, BookUpdate, DepthDiff};
use types::level::PriceLevel;
use types::trade::{TradeRecord, TRADE_RECORD_SIZE};

/// Frame type tag for a trade record.
pub const TYPE_TRADE: u8 = 0x01;
/// Frame type tag for an orderbook update.
pub const TYPE_ORDERBOOK: u8 = 0x02;
/// Bytes in a frame header (tag + length).
pub const FRAME_HEADER_SIZE: usize = 5;
/// Upper bound on a sane payload; anything larger is treated as corruption.
pub const MAX_FRAME_PAYLOAD: usize = 1 << 20;

const BOOK_HEADER_SIZE: usize = 8 + 8 + 4 + 4;
const LEVEL_SIZE: usize = 16;

/// Errors from either wire surface.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("unknown frame type tag {0:#04x}")]
    UnknownTypeTag(u8),

    #[error("frame payload length {0} exceeds sane bound")]
    PayloadTooLarge(usize),

    #[error("payload truncated: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    #[error("trade payload has {0} bytes, expected {expected}", expected = TRADE_RECORD_SIZE)]
    TradeSizeMismatch(usize),

    #[error("bad decimal string `{0}`")]
    BadDecimal(String),

    #[error("malformed feed message: {0}")]
    Json(#[from] serde_json::Error),
}

/// A typed record decoded off the ring.
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    Trade(TradeRecord),
    Book(BookUpdate),
}

/// A classified feed message.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Trade(TradeRecord),
    Depth(DepthDiff),
}

// ---------------------------------------------------------------------------
// Feed JSON decoding
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TradeWire {
    #[serde(rename = "E", default)]
    event_time: u64,
    #[serde(rename = "t", default)]
    trade_id: u64,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "b", default)]
    buyer_order_id: u64,
    #[serde(rename = "a", default)]
    seller_order_id: u64,
    #[serde(rename = "T", default)]
    trade_time: u64,
    #[serde(rename = "m", default)]
    is_buyer_maker: bool,
}

#[derive(Debug, Deserialize)]
struct DepthWire {
    #[serde(rename = "E", default)]
    event_time: u64,
    #[serde(rename = "U")]
    first_update_id: u64,
    #[serde(rename = "u")]
    last_update_id: u64,
    #[serde(rename = "b", default)]
    bids: Vec<[String; 2]>,
    #[serde(rename = "a", default)]
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "e")]
enum FeedEventWire {
    #[serde(rename = "trade")]
    Trade(TradeWire),
    #[serde(rename = "depthUpdate")]
    Depth(DepthWire),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotWire {
    last_update_id: u64,
    #[serde(default)]
    bids: Vec<[String; 2]>,
    #[serde(default)]
    asks: Vec<[String; 2]>,
}

fn parse_decimal(s: &str) -> Result<f64, CodecError> {
    s.parse::<f64>()
        .map_err(|_| CodecError::BadDecimal(s.to_string()))
}

fn parse_levels(raw: &[[String; 2]]) -> Result<Vec<PriceLevel>, CodecError> {
    raw.iter()
        .map(|pair| {
            Ok(PriceLevel::new(
                parse_decimal(&pair[0])?,
                parse_decimal(&pair[1])?,
            ))
        })
        .collect()
}

/// Classify and decode one feed message.
///
/// Zero-quantity levels are retained in depth diffs: they are the wire's
/// delete instructions and every consumer downstream needs to see them.
pub fn parse_feed_message(raw: &str) -> Result<FeedMessage, CodecError> {
    match serde_json::from_str::<FeedEventWire>(raw)? {
        FeedEventWire::Trade(wire) => {
            let mut trade = TradeRecord {
                event_time_ms: wire.event_time,
                trade_id: wire.trade_id,
                price: parse_decimal(&wire.price)?,
                quantity: parse_decimal(&wire.quantity)?,
                buyer_order_id: wire.buyer_order_id,
                seller_order_id: wire.seller_order_id,
                trade_time_ms: wire.trade_time,
                timestamp_ns: wire.trade_time.saturating_mul(1_000_000),
                flags: 0,
            };
            trade.set_buyer_maker(wire.is_buyer_maker);
            Ok(FeedMessage::Trade(trade))
        }
        FeedEventWire::Depth(wire) => Ok(FeedMessage::Depth(DepthDiff {
            first_update_id: wire.first_update_id,
            last_update_id: wire.last_update_id,
            bids: parse_levels(&wire.bids)?,
            asks: parse_levels(&wire.asks)?,
            event_time_ns: wire.event_time.saturating_mul(1_000_000),
        })),
    }
}

/// Decode the REST depth snapshot body.
pub fn parse_snapshot_json(raw: &str) -> Result<BookSnapshot, CodecError> {
    let wire: SnapshotWire = serde_json::from_str(raw)?;
    Ok(BookSnapshot {
        last_update_id: wire.last_update_id,
        bids: parse_levels(&wire.bids)?,
        asks: parse_levels(&wire.asks)?,
    })
}

// ---------------------------------------------------------------------------
// Binary frame packing
// ---------------------------------------------------------------------------

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + n > self.buf.len() {
            return Err(CodecError::Truncated {
                needed: self.pos + n,
                have: self.buf.len(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

/// Pack a trade record payload (no frame header).
pub fn encode_trade_payload(trade: &TradeRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(TRADE_RECORD_SIZE);
    out.extend_from_slice(&trade.event_time_ms.to_le_bytes());
    out.extend_from_slice(&trade.trade_id.to_le_bytes());
    out.extend_from_slice(&trade.price.to_le_bytes());
    out.extend_from_slice(&trade.quantity.to_le_bytes());
    out.extend_from_slice(&trade.buyer_order_id.to_le_bytes());
    out.extend_from_slice(&trade.seller_order_id.to_le_bytes());
    out.extend_from_slice(&trade.trade_time_ms.to_le_bytes());
    out.extend_from_slice(&trade.timestamp_ns.to_le_bytes());
    out.push(trade.flags);
    out
}

/// Unpack a trade record payload.
pub fn decode_trade_payload(buf: &[u8]) -> Result<TradeRecord, CodecError> {
    if buf.len() != TRADE_RECORD_SIZE {
        return Err(CodecError::TradeSizeMismatch(buf.len()));
    }
    let mut r = Reader::new(buf);
    Ok(TradeRecord {
        event_time_ms: r.read_u64()?,
        trade_id: r.read_u64()?,
        price: r.read_f64()?,
        quantity: r.read_f64()?,
        buyer_order_id: r.read_u64()?,
        seller_order_id: r.read_u64()?,
        trade_time_ms: r.read_u64()?,
        timestamp_ns: r.read_u64()?,
        flags: r.read_u8()?,
    })
}

/// Pack an orderbook update payload (no frame header).
pub fn encode_book_payload(update: &BookUpdate) -> Vec<u8> {
    let levels = update.bids.len() + update.asks.len();
    let mut out = Vec::with_capacity(BOOK_HEADER_SIZE + levels * LEVEL_SIZE);
    out.extend_from_slice(&update.timestamp_ns.to_le_bytes());
    out.extend_from_slice(&update.last_update_id.to_le_bytes());
    out.extend_from_slice(&(update.bids.len() as u32).to_le_bytes());
    out.extend_from_slice(&(update.asks.len() as u32).to_le_bytes());
    for level in update.bids.iter().chain(update.asks.iter()) {
        out.extend_from_slice(&level.price.to_le_bytes());
        out.extend_from_slice(&level.quantity.to_le_bytes());
    }
    out
}

/// Unpack an orderbook update payload.
pub fn decode_book_payload(buf: &[u8]) -> Result<BookUpdate, CodecError> {
    let mut r = Reader::new(buf);
    let timestamp_ns = r.read_u64()?;
    let last_update_id = r.read_u64()?;
    let bid_count = r.read_u32()? as usize;
    let ask_count = r.read_u32()? as usize;

    let expected = BOOK_HEADER_SIZE + (bid_count + ask_count) * LEVEL_SIZE;
    if buf.len() < expected {
        return Err(CodecError::Truncated {
            needed: expected,
            have: buf.len(),
        });
    }

    let mut read_side = |count: usize| -> Result<Vec<PriceLevel>, CodecError> {
        let mut side = Vec::with_capacity(count);
        for _ in 0..count {
            let price = r.read_f64()?;
            let quantity = r.read_f64()?;
            side.push(PriceLevel::new(price, quantity));
        }
        Ok(side)
    };

    let bids = read_side(bid_count)?;
    let asks = read_side(ask_count)?;

    Ok(BookUpdate {
        timestamp_ns,
        last_update_id,
        bids,
        asks,
    })
}

fn frame(tag: u8, payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    out.push(tag);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    out
}

/// Build a complete trade frame (header + payload).
pub fn frame_trade(trade: &TradeRecord) -> Vec<u8> {
    frame(TYPE_TRADE, encode_trade_payload(trade))
}

/// Build a complete orderbook frame (header + payload).
pub fn frame_book(update: &BookUpdate) -> Vec<u8> {
    frame(TYPE_ORDERBOOK, encode_book_payload(update))
}

/// Try to decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed, `Ok(Some((payload,
/// consumed)))` on success, and `Err` when the front of the buffer cannot be
/// a valid frame (caller resynchronizes by scanning for the next tag).
pub fn try_decode_frame(buf: &[u8]) -> Result<Option<(FramePayload, usize)>, CodecError> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }

    let tag = buf[0];
    if tag != TYPE_TRADE && tag != TYPE_ORDERBOOK {
        return Err(CodecError::UnknownTypeTag(tag));
    }

    let len = u32::from_le_bytes(buf[1..5].try_into().unwrap()) as usize;
    if len > MAX_FRAME_PAYLOAD {
        return Err(CodecError::PayloadTooLarge(len));
    }
    if buf.len() < FRAME_HEADER_SIZE + len {
        return Ok(None);
    }

    let payload = &buf[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + len];
    let decoded = match tag {
        TYPE_TRADE => FramePayload::Trade(decode_trade_payload(payload)?),
        _ => FramePayload::Book(decode_book_payload(payload)?),
    };
    Ok(Some((decoded, FRAME_HEADER_SIZE + len)))
}
