//! Feed Pipeline
//!
//! Real-time market-data ingestion and analytics for a single spot venue.
//! Consumes the venue's trade and depth-diff streams and produces:
//! - A reconstructed limit order book synchronized against REST snapshots
//! - Cached book metrics (spread, depth imbalance, USD liquidity)
//! - Bucketed liquidity flow metrics and cancellation bursts
//! - Iceberg detections from per-level refill patterns
//!
//! # Architecture
//!
//! ```text
//!  WebSocket feed          REST snapshots
//!       │                        │
//!   ┌───▼────┐              ┌────▼─────┐
//!   │  Feed  │◄─────────────│ Snapshot │
//!   │ client │   reconcile  │ fetcher  │
//!   └───┬────┘              └──────────┘
//!       │ frames                 (book keeper updated on the feed path)
//!   ┌───▼────┐
//!   │  Ring  │  SPSC byte ring, typed length-prefixed frames
//!   └───┬────┘
//!   ┌───▼───────┐
//!   │Dispatcher │
//!   └─┬───┬───┬─┘
//!     │   │   │      bounded queues
//!  ┌──▼─┐┌▼────────┐┌▼────────┐
//!  │ LT ││ LT book ││ Iceberg │
//!  │trades│ diffs  ││detector │
//!  └──┬─┘└┬────────┘└┬────────┘
//!     └───┴─────┬────┘
//!           FlowEvent channel
//! ```

pub mod book;
pub mod cli;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod events;
pub mod feed;
pub mod iceberg;
pub mod liquidity;
pub mod metrics;
pub mod queue;
pub mod ring;
pub mod snapshot;
pub mod sync;
pub mod volume;

/// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
