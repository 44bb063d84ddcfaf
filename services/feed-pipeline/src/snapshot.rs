//! Snapshot fetcher
//!
//! Fetches full depth images from the REST endpoint: once at startup, on
//! demand when the reconciler loses the sequence, and unconditionally on a
//! fixed interval to bound drift. Fetched snapshots are checksummed so
//! repeated fetches of an unchanged book are visible in the logs.

use std::time::Duration;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use types::depth::BookSnapshot;

use crate::codec::{self, CodecError};
use crate::config::PipelineConfig;

/// Per-request timeout.
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay before retrying a failed fetch.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Errors from a snapshot fetch.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("http transport: {0}")]
    Http(#[from] reqwest::Error),

    #[error("snapshot endpoint returned status {0}")]
    Status(u16),

    #[error("snapshot body: {0}")]
    Decode(#[from] CodecError),
}

/// REST depth fetcher for one symbol.
pub struct SnapshotFetcher {
    client: reqwest::Client,
    url: String,
}

impl SnapshotFetcher {
    pub fn new(config: &PipelineConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: config.snapshot_url(),
        }
    }

    /// Fetch and decode one snapshot.
    pub async fn fetch(&self) -> Result<BookSnapshot, SnapshotError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SnapshotError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        Ok(codec::parse_snapshot_json(&body)?)
    }
}

/// SHA-256 over the snapshot's levels and update id.
pub fn content_checksum(snap: &BookSnapshot) -> String {
    let mut hasher = Sha256::new();
    for level in &snap.bids {
        hasher.update(level.price.to_le_bytes());
        hasher.update(level.quantity.to_le_bytes());
    }
    hasher.update(b"---");
    for level in &snap.asks {
        hasher.update(level.price.to_le_bytes());
        hasher.update(level.quantity.to_le_bytes());
    }
    hasher.update(snap.last_update_id.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

/// Fetcher task: serves on-demand requests and the periodic refetch.
///
/// The interval's first tick fires immediately, which is what performs the
/// startup fetch. Failed fetches are retried until they succeed or the
/// pipeline shuts down.
pub async fn run(
    fetcher: SnapshotFetcher,
    mut requests: mpsc::Receiver<()>,
    snapshots: mpsc::Sender<BookSnapshot>,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            request = requests.recv() => {
                if request.is_none() {
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }

        loop {
            if *shutdown.borrow() {
                return;
            }
            match fetcher.fetch().await {
                Ok(snap) => {
                    info!(
                        last_update_id = snap.last_update_id,
                        bids = snap.bids.len(),
                        asks = snap.asks.len(),
                        checksum = %&content_checksum(&snap)[..16],
                        "Snapshot fetched"
                    );
                    if snapshots.send(snap).await.is_err() {
                        return;
                    }
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "Snapshot fetch failed; retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }
}
