//! Websocket feed client
//!
//! Connects to the venue's combined trade + depth-diff stream, classifies
//! each message, frames it onto the ring bus for the analytic consumers, and
//! drives the book through the reconciler. Disconnects and transient errors
//! reconnect with a short delay; parse failures are counted and skipped.
//! The pipeline must survive bad messages.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{info, warn};
use types::depth::{BookSnapshot, BookUpdate};

use crate::book::BookKeeper;
use crate::codec::{self, FeedMessage};
use crate::config::PipelineConfig;
use crate::metrics::PipelineMetrics;
use crate::ring::RingProducer;
use crate::sync::{DiffOutcome, Reconciler};

/// Delay before reconnecting after a drop or failed connect.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Backoff while the ring is full.
const RING_BACKOFF: Duration = Duration::from_millis(1);

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// One resolved action out of the feed client's select loop.
enum Step {
    Text(String),
    Ping(Vec<u8>),
    Snapshot(BookSnapshot),
    Idle,
    Reconnect,
    Shutdown,
}

/// The feed client: network reader, frame producer, and book driver.
pub struct FeedClient {
    config: PipelineConfig,
    book: Arc<BookKeeper>,
    recon: Reconciler,
    producer: RingProducer,
    metrics: Arc<PipelineMetrics>,
    snapshot_requests: mpsc::Sender<()>,
    snapshots: mpsc::Receiver<BookSnapshot>,
    shutdown: watch::Receiver<bool>,
}

impl FeedClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PipelineConfig,
        book: Arc<BookKeeper>,
        producer: RingProducer,
        metrics: Arc<PipelineMetrics>,
        snapshot_requests: mpsc::Sender<()>,
        snapshots: mpsc::Receiver<BookSnapshot>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let recon = Reconciler::new(config.diff_buffer_capacity);
        Self {
            config,
            book,
            recon,
            producer,
            metrics,
            snapshot_requests,
            snapshots,
            shutdown,
        }
    }

    /// Connect-and-read loop. Returns only on shutdown.
    pub async fn run(mut self) {
        let url = self.config.stream_url();

        'outer: loop {
            if *self.shutdown.borrow() {
                break;
            }

            let stream = match connect_async(url.as_str()).await {
                Ok((stream, _response)) => {
                    info!(url = %url, "Feed connected");
                    stream
                }
                Err(err) => {
                    warn!(error = %err, "Feed connect failed");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };
            let (mut write, mut read) = stream.split();

            loop {
                // Select resolves to a plain step value so the handlers
                // below can borrow the client freely.
                let step = tokio::select! {
                    message = read.next() => match message {
                        Some(Ok(Message::Text(text))) => Step::Text(text),
                        Some(Ok(Message::Ping(data))) => Step::Ping(data),
                        Some(Ok(Message::Close(_))) | None => Step::Reconnect,
                        Some(Ok(_)) => Step::Idle,
                        Some(Err(err)) => {
                            warn!(error = %err, "Feed read error; reconnecting");
                            Step::Reconnect
                        }
                    },
                    snapshot = self.snapshots.recv() => match snapshot {
                        Some(snap) => Step::Snapshot(snap),
                        None => Step::Shutdown,
                    },
                    _ = self.shutdown.changed() => Step::Shutdown,
                };

                match step {
                    Step::Text(text) => self.handle_text(&text).await,
                    Step::Ping(data) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Step::Snapshot(snap) => self.handle_snapshot(snap).await,
                    Step::Idle => {}
                    Step::Reconnect => {
                        warn!("Feed stream ended; reconnecting");
                        break;
                    }
                    Step::Shutdown => {
                        let _ = write.send(Message::Close(None)).await;
                        break 'outer;
                    }
                }
            }

            tokio::time::sleep(RECONNECT_DELAY).await;
        }

        info!("Feed client stopped");
    }

    async fn handle_text(&mut self, raw: &str) {
        PipelineMetrics::incr(&self.metrics.ws_messages);

        match codec::parse_feed_message(raw) {
            Ok(FeedMessage::Trade(mut trade)) => {
                if trade.timestamp_ns == 0 {
                    trade.timestamp_ns = now_ns();
                }
                PipelineMetrics::incr(&self.metrics.trades_parsed);
                self.write_frame(&codec::frame_trade(&trade)).await;
            }
            Ok(FeedMessage::Depth(diff)) => {
                PipelineMetrics::incr(&self.metrics.diffs_parsed);
                self.write_frame(&codec::frame_book(&BookUpdate::from(&diff)))
                    .await;

                match self.recon.on_diff(diff, &self.book) {
                    DiffOutcome::Applied => {
                        PipelineMetrics::incr(&self.metrics.diffs_applied);
                    }
                    DiffOutcome::Buffered => {}
                    DiffOutcome::Dropped => {
                        PipelineMetrics::incr(&self.metrics.diffs_dropped_stale);
                    }
                    DiffOutcome::ResyncRequired(reason) => {
                        warn!(error = %reason, "Book discarded; requesting snapshot");
                        PipelineMetrics::incr(&self.metrics.book_resyncs);
                        let _ = self.snapshot_requests.send(()).await;
                    }
                }
            }
            Err(err) => {
                PipelineMetrics::incr(&self.metrics.parse_failures);
                warn!(error = %err, "Skipping malformed feed message");
            }
        }
    }

    async fn handle_snapshot(&mut self, snap: BookSnapshot) {
        match self.recon.on_snapshot(&snap, &self.book) {
            Ok(buffered_applied) => {
                PipelineMetrics::incr(&self.metrics.snapshots_applied);
                info!(
                    last_update_id = snap.last_update_id,
                    buffered_applied, "Snapshot reconciled"
                );
            }
            Err(err) => {
                warn!(error = %err, "Snapshot unusable; requesting another");
                PipelineMetrics::incr(&self.metrics.book_resyncs);
                let _ = self.snapshot_requests.send(()).await;
            }
        }
    }

    /// Frame write with one backoff retry. The ring never accepts partial
    /// frames, so on sustained pressure the frame is dropped and counted
    /// rather than stalling the reader.
    async fn write_frame(&mut self, frame: &[u8]) {
        if self.producer.write_frame(frame) {
            PipelineMetrics::incr(&self.metrics.frames_written);
            return;
        }
        tokio::time::sleep(RING_BACKOFF).await;
        if self.producer.write_frame(frame) {
            PipelineMetrics::incr(&self.metrics.frames_written);
        } else {
            PipelineMetrics::incr(&self.metrics.frames_dropped);
            warn!(frame_len = frame.len(), "Ring full; frame dropped");
        }
    }
}
