//! Pipeline configuration
//!
//! All tunables with venue-appropriate defaults; every field can be
//! overridden from the environment.

use types::symbol::Symbol;

/// Configuration for the whole pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // === Venue ===
    /// Trading pair to subscribe to.
    pub symbol: Symbol,
    /// WebSocket endpoint base (no path).
    pub ws_endpoint: String,
    /// REST endpoint base for depth snapshots.
    pub rest_endpoint: String,
    /// Depth levels requested per snapshot.
    pub snapshot_depth: u32,
    /// Seconds between unconditional snapshot refetches.
    pub resync_interval_secs: u64,

    // === Book ===
    /// Initial tick size for price canonicalization.
    pub tick_size: f64,

    // === Ring bus & queues ===
    /// Byte capacity of the ring bus.
    pub ring_capacity: usize,
    /// Per-queue element capacity for the consumer queues.
    pub queue_capacity: usize,
    /// Max diffs buffered while a snapshot fetch is outstanding.
    pub diff_buffer_capacity: usize,

    // === Liquidity tracker ===
    /// USD notional that closes the buy trade bucket.
    pub buy_bucket_usd: f64,
    /// USD notional that closes the sell trade bucket.
    pub sell_bucket_usd: f64,
    /// USD notional that closes a cancel bucket.
    pub cancel_bucket_usd: f64,
    /// Fraction of a level that must disappear to count as a cancel.
    pub cancel_fraction: f64,
    /// Depth levels per side the tracker inspects per update.
    pub depth_levels_track: usize,
    /// Tick size the tracker rounds with (may be finer than the book's).
    pub liquidity_tick_size: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            symbol: Symbol::new("BTCUSDT"),
            ws_endpoint: "wss://stream.binance.com:9443".to_string(),
            rest_endpoint: "https://api.binance.com".to_string(),
            snapshot_depth: 50,
            resync_interval_secs: 30,

            tick_size: 0.01,

            ring_capacity: 1 << 20,
            queue_capacity: 65_536,
            diff_buffer_capacity: 1_024,

            buy_bucket_usd: 10_000.0,
            sell_bucket_usd: 10_000.0,
            cancel_bucket_usd: 5_000.0,
            cancel_fraction: 0.3,
            depth_levels_track: 30,
            liquidity_tick_size: 0.01,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("FEED_SYMBOL") {
            if !v.is_empty() {
                config.symbol = Symbol::new(v);
            }
        }
        if let Ok(v) = std::env::var("FEED_WS_ENDPOINT") {
            config.ws_endpoint = v;
        }
        if let Ok(v) = std::env::var("FEED_REST_ENDPOINT") {
            config.rest_endpoint = v;
        }
        if let Ok(v) = std::env::var("FEED_SNAPSHOT_DEPTH") {
            if let Ok(n) = v.parse() {
                config.snapshot_depth = n;
            }
        }
        if let Ok(v) = std::env::var("FEED_RESYNC_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                config.resync_interval_secs = n;
            }
        }
        if let Ok(v) = std::env::var("FEED_TICK_SIZE") {
            if let Ok(t) = v.parse() {
                config.tick_size = t;
            }
        }
        if let Ok(v) = std::env::var("FEED_RING_CAPACITY") {
            if let Ok(n) = v.parse() {
                config.ring_capacity = n;
            }
        }
        if let Ok(v) = std::env::var("FEED_QUEUE_CAPACITY") {
            if let Ok(n) = v.parse() {
                config.queue_capacity = n;
            }
        }
        if let Ok(v) = std::env::var("FLOW_BUY_BUCKET_USD") {
            if let Ok(n) = v.parse() {
                config.buy_bucket_usd = n;
            }
        }
        if let Ok(v) = std::env::var("FLOW_SELL_BUCKET_USD") {
            if let Ok(n) = v.parse() {
                config.sell_bucket_usd = n;
            }
        }
        if let Ok(v) = std::env::var("FLOW_CANCEL_BUCKET_USD") {
            if let Ok(n) = v.parse() {
                config.cancel_bucket_usd = n;
            }
        }
        if let Ok(v) = std::env::var("FLOW_CANCEL_FRACTION") {
            if let Ok(f) = v.parse() {
                config.cancel_fraction = f;
            }
        }
        if let Ok(v) = std::env::var("FLOW_DEPTH_LEVELS") {
            if let Ok(n) = v.parse() {
                config.depth_levels_track = n;
            }
        }
        if let Ok(v) = std::env::var("FLOW_TICK_SIZE") {
            if let Ok(t) = v.parse() {
                config.liquidity_tick_size = t;
            }
        }

        config
    }

    /// Combined-stream websocket URL for this symbol (trade + depth diffs).
    pub fn stream_url(&self) -> String {
        let name = self.symbol.stream_name();
        format!("{}/ws/{}@trade/{}@depth@100ms", self.ws_endpoint, name, name)
    }

    /// REST depth snapshot URL for this symbol.
    pub fn snapshot_url(&self) -> String {
        format!(
            "{}/api/v3/depth?symbol={}&limit={}",
            self.rest_endpoint,
            self.symbol.as_str(),
            self.snapshot_depth
        )
    }
}
