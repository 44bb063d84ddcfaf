use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use feed_pipeline::book::BookKeeper;
use feed_pipeline::cli::{self, CliContext, RenderContext};
use feed_pipeline::config::PipelineConfig;
use feed_pipeline::dispatch::Dispatcher;
use feed_pipeline::events::{self, FlowEvent};
use feed_pipeline::feed::FeedClient;
use feed_pipeline::iceberg::IcebergDetector;
use feed_pipeline::liquidity::LiquidityTracker;
use feed_pipeline::metrics::PipelineMetrics;
use feed_pipeline::queue::BoundedQueue;
use feed_pipeline::ring;
use feed_pipeline::snapshot::{self, SnapshotFetcher};
use feed_pipeline::volume::VolumeStats;

/// Idle poll sleep for the consumer loops.
const CONSUMER_IDLE: Duration = Duration::from_millis(1);

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();

    let config = PipelineConfig::from_env();
    info!(
        symbol = %config.symbol,
        ws = %config.ws_endpoint,
        rest = %config.rest_endpoint,
        "Feed pipeline starting"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let book = Arc::new(BookKeeper::new(config.symbol.clone(), config.tick_size));
    let metrics = Arc::new(PipelineMetrics::new());
    let volume = Arc::new(Mutex::new(VolumeStats::new()));
    let auto_print = Arc::new(AtomicBool::new(false));

    let (producer, consumer) = ring::split(config.ring_capacity);
    let trade_q = Arc::new(BoundedQueue::new(config.queue_capacity));
    let book_q_liquidity = Arc::new(BoundedQueue::new(config.queue_capacity));
    let book_q_iceberg = Arc::new(BoundedQueue::new(config.queue_capacity));

    let (event_tx, event_rx) = events::channel();

    // Dispatcher: ring bus → typed queues.
    let dispatcher = Dispatcher::new(
        consumer,
        Arc::clone(&trade_q),
        Arc::clone(&book_q_liquidity),
        Arc::clone(&book_q_iceberg),
        Arc::clone(&metrics),
        Arc::clone(&stop),
    );
    let dispatcher_thread = thread::spawn(move || dispatcher.run());

    // Liquidity consumer: trades and book diffs, interleaved polling.
    let liquidity_thread = {
        let trade_q = Arc::clone(&trade_q);
        let book_q = Arc::clone(&book_q_liquidity);
        let volume = Arc::clone(&volume);
        let mut tracker = LiquidityTracker::new(&config, event_tx.clone());
        thread::spawn(move || {
            loop {
                let mut idle = true;
                if let Some(update) = book_q.try_pop() {
                    tracker.on_book_update(&update);
                    idle = false;
                }
                if let Some(trade) = trade_q.try_pop() {
                    volume.lock().record(&trade);
                    tracker.on_trade(&trade);
                    idle = false;
                }
                if idle {
                    if trade_q.is_closed()
                        && trade_q.is_empty()
                        && book_q.is_closed()
                        && book_q.is_empty()
                    {
                        break;
                    }
                    thread::sleep(CONSUMER_IDLE);
                }
            }
            info!("Liquidity consumer stopped");
        })
    };

    // Iceberg consumer: blocking pop until close-and-drain.
    let iceberg_thread = {
        let book_q = Arc::clone(&book_q_iceberg);
        let metrics = Arc::clone(&metrics);
        let mut detector = IcebergDetector::new(config.symbol.clone(), event_tx.clone());
        thread::spawn(move || {
            while let Some(update) = book_q.pop() {
                let before = detector.detections();
                detector.process_update(&update);
                for _ in before..detector.detections() {
                    PipelineMetrics::incr(&metrics.icebergs_detected);
                }
            }
            info!("Iceberg consumer stopped");
        })
    };

    // Event consumer: logs every analytic signal.
    let event_thread = {
        let stop = Arc::clone(&stop);
        let metrics = Arc::clone(&metrics);
        thread::spawn(move || loop {
            match event_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(event) => {
                    if matches!(
                        event,
                        FlowEvent::TradeBucket { .. }
                            | FlowEvent::OrderFlowBucket { .. }
                            | FlowEvent::CancelBucket { .. }
                    ) {
                        PipelineMetrics::incr(&metrics.bucket_closures);
                    }
                    log_event(&event);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        })
    };

    // Snapshot fetcher task.
    let (request_tx, request_rx) = mpsc::channel(8);
    let (snap_tx, snap_rx) = mpsc::channel(8);
    let fetcher = SnapshotFetcher::new(&config);
    let snapshot_task = tokio::spawn(snapshot::run(
        fetcher,
        request_rx,
        snap_tx,
        config.resync_interval_secs,
        shutdown_rx.clone(),
    ));

    // Feed client task.
    let feed = FeedClient::new(
        config.clone(),
        Arc::clone(&book),
        producer,
        Arc::clone(&metrics),
        request_tx,
        snap_rx,
        shutdown_rx.clone(),
    );
    let feed_task = tokio::spawn(feed.run());

    let render_ctx = RenderContext {
        book: Arc::clone(&book),
        volume: Arc::clone(&volume),
        metrics: Arc::clone(&metrics),
        auto_print: Arc::clone(&auto_print),
    };

    // Display loop.
    let display_thread = {
        let render_ctx = render_ctx.clone();
        let stop = Arc::clone(&stop);
        thread::spawn(move || cli::run_display_loop(render_ctx, stop))
    };

    // Command loop on its own thread; it owns the shutdown sender.
    let cli_thread = {
        let ctx = CliContext {
            render: render_ctx,
            stop: Arc::clone(&stop),
            shutdown: shutdown_tx,
        };
        thread::spawn(move || cli::run_command_loop(ctx))
    };

    // Wait for the network side to wind down, then drain the consumers.
    feed_task.await?;
    snapshot_task.await?;
    stop.store(true, Ordering::Release);

    dispatcher_thread
        .join()
        .map_err(|_| anyhow::anyhow!("dispatcher thread panicked"))?;
    liquidity_thread
        .join()
        .map_err(|_| anyhow::anyhow!("liquidity thread panicked"))?;
    iceberg_thread
        .join()
        .map_err(|_| anyhow::anyhow!("iceberg thread panicked"))?;
    event_thread
        .join()
        .map_err(|_| anyhow::anyhow!("event thread panicked"))?;
    display_thread
        .join()
        .map_err(|_| anyhow::anyhow!("display thread panicked"))?;
    cli_thread
        .join()
        .map_err(|_| anyhow::anyhow!("command thread panicked"))?;

    info!(metrics = ?metrics.export(), "Feed pipeline stopped");
    Ok(())
}

fn log_event(event: &FlowEvent) {
    match event {
        FlowEvent::TradeBucket {
            is_buy,
            duration_ns,
            size_usd,
            flow_ratio,
        } => info!(
            side = if *is_buy { "BUY" } else { "SELL" },
            size_usd,
            duration_ms = duration_ns / 1_000_000,
            flow_ratio,
            "Trade bucket closed"
        ),
        FlowEvent::OrderFlowBucket {
            is_buy,
            duration_ns,
            size_usd,
            ..
        } => info!(
            side = if *is_buy { "BUY" } else { "SELL" },
            size_usd,
            duration_ms = duration_ns / 1_000_000,
            "Order-flow bucket closed"
        ),
        FlowEvent::CancelBucket {
            is_buy,
            duration_ns,
            size_usd,
            cancel_ratio,
        } => info!(
            side = if *is_buy { "BUY" } else { "SELL" },
            size_usd,
            duration_ms = duration_ns / 1_000_000,
            cancel_ratio,
            "Cancel bucket closed"
        ),
        FlowEvent::LiquidityChange {
            price,
            volume_delta,
            is_bid,
            ..
        } => debug!(
            side = if *is_bid { "BID" } else { "ASK" },
            price, volume_delta, "Liquidity change"
        ),
        FlowEvent::Iceberg {
            symbol,
            price,
            side,
            ..
        } => info!(%symbol, price, side = side.label(), "Iceberg detected"),
    }
}
