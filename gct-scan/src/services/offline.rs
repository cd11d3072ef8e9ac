//! Offline scan queue and replay
//!
//! Scans captured without connectivity are appended to the local
//! `offline_scans` table. A [`SyncWorker`] probes connectivity periodically and
//! replays the whole queue through a [`ScanSink`] in one bulk call.
//!
//! Replay is best effort: the queue is cleared only after the sink accepts the
//! batch, and a sink that fails halfway may have stored part of it. Replaying
//! again can therefore deliver the same scan twice; [`SqliteScanSink`] absorbs
//! that through the `bottle_scans` dedup index.

use crate::services::scans::{record_scans_batch, NewScan};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gct_common::db::{get_setting, set_setting};
use gct_common::events::{EventBus, GctEvent};
use gct_common::time::parse_rfc3339;
use gct_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Settings key holding the time of the last successful replay
pub const LAST_SYNC_SETTING: &str = "last_sync_time";

const OFFLINE_MESSAGE: &str = "No internet connection";

// ============================================================================
// Queue
// ============================================================================

/// Scan waiting in the local queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedScan {
    /// Position in the queue; assigned by the table
    #[serde(skip)]
    pub seq: i64,
    pub id: String,
    pub organization_id: String,
    pub scan: NewScan,
    pub queued_at: DateTime<Utc>,
}

/// Local append-only queue over `offline_scans`
#[derive(Clone)]
pub struct OfflineQueue {
    pool: SqlitePool,
}

impl OfflineQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a scan; the client timestamp is stamped now when absent
    ///
    /// The scan is validated first so a malformed entry can never block replay.
    pub async fn enqueue(&self, organization_id: &str, mut scan: NewScan) -> Result<QueuedScan> {
        scan.validate()?;
        let queued_at = Utc::now();
        scan.timestamp.get_or_insert(queued_at);

        let mut queued = QueuedScan {
            seq: 0,
            id: uuid::Uuid::new_v4().to_string(),
            organization_id: organization_id.to_string(),
            scan,
            queued_at,
        };

        let result = sqlx::query("INSERT INTO offline_scans (id, payload, queued_at) VALUES (?, ?, ?)")
            .bind(&queued.id)
            .bind(serde_json::to_string(&queued)?)
            .bind(queued_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        queued.seq = result.last_insert_rowid();

        debug!(
            id = %queued.id,
            organization_id,
            bottle_barcode = %queued.scan.bottle_barcode,
            "Scan queued offline"
        );
        Ok(queued)
    }

    /// All queued scans, oldest first
    pub async fn pending(&self) -> Result<Vec<QueuedScan>> {
        let rows = sqlx::query("SELECT seq, payload FROM offline_scans ORDER BY seq")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let payload: String = row.try_get("payload")?;
                let mut queued: QueuedScan = serde_json::from_str(&payload)?;
                queued.seq = row.try_get("seq")?;
                Ok(queued)
            })
            .collect()
    }

    pub async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM offline_scans")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    pub async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM offline_scans").execute(&self.pool).await?;
        Ok(())
    }

    /// Remove entries up to and including `seq`; later arrivals stay queued
    pub async fn clear_through(&self, seq: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM offline_scans WHERE seq <= ?")
            .bind(seq)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ============================================================================
// Sinks and probes
// ============================================================================

/// Destination of a replay
#[async_trait]
pub trait ScanSink: Send + Sync {
    /// Store every scan or fail; returns the number accepted
    async fn insert_batch(&self, scans: &[QueuedScan]) -> Result<usize>;
}

fn group_by_organization(scans: &[QueuedScan]) -> BTreeMap<&str, Vec<NewScan>> {
    let mut groups: BTreeMap<&str, Vec<NewScan>> = BTreeMap::new();
    for queued in scans {
        groups
            .entry(queued.organization_id.as_str())
            .or_default()
            .push(queued.scan.clone());
    }
    groups
}

/// Writes straight into the local `bottle_scans` table
pub struct SqliteScanSink {
    pool: SqlitePool,
}

impl SqliteScanSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScanSink for SqliteScanSink {
    async fn insert_batch(&self, scans: &[QueuedScan]) -> Result<usize> {
        let mut accepted = 0;
        for (organization_id, batch) in group_by_organization(scans) {
            let outcome = record_scans_batch(&self.pool, organization_id, &batch).await?;
            accepted += outcome.inserted + outcome.duplicates;
        }
        Ok(accepted)
    }
}

/// Request body of `POST /scans/batch`
#[derive(Debug, Serialize, Deserialize)]
pub struct ScanBatchRequest {
    pub scans: Vec<NewScan>,
}

/// Posts to `<base_url>/scans/batch` of a remote scan service
pub struct HttpScanSink {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpScanSink {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ScanSink for HttpScanSink {
    async fn insert_batch(&self, scans: &[QueuedScan]) -> Result<usize> {
        let url = format!("{}/scans/batch", self.base_url);
        let mut accepted = 0;

        for (organization_id, batch) in group_by_organization(scans) {
            let count = batch.len();
            let response = self
                .http_client
                .post(&url)
                .header("X-Organization-Id", organization_id)
                .json(&ScanBatchRequest { scans: batch })
                .send()
                .await
                .map_err(|e| Error::Internal(format!("Replay request failed: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Internal(format!(
                    "Replay rejected with {}: {}",
                    status.as_u16(),
                    body
                )));
            }
            accepted += count;
        }

        Ok(accepted)
    }
}

/// Decides whether a replay should be attempted
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Online when `GET <base_url>/health` answers with a success status
pub struct HttpProbe {
    http_client: reqwest::Client,
    health_url: String,
}

impl HttpProbe {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            health_url: format!("{}/health", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn is_online(&self) -> bool {
        match self.http_client.get(&self.health_url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url = %self.health_url, error = %e, "Connectivity probe failed");
                false
            }
        }
    }
}

/// For a sink that is always reachable (local database)
pub struct AlwaysOnline;

#[async_trait]
impl ConnectivityProbe for AlwaysOnline {
    async fn is_online(&self) -> bool {
        true
    }
}

// ============================================================================
// Sync service
// ============================================================================

/// Outcome of one replay attempt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub success: bool,
    pub message: String,
    pub synced_items: usize,
    pub failed_items: usize,
    pub errors: Vec<String>,
}

impl SyncResult {
    fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            errors: vec![message.clone()],
            message,
            ..Default::default()
        }
    }
}

/// Snapshot of the queue for status displays
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub queued: usize,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub in_progress: bool,
    pub connected: bool,
}

/// Resets the in-progress flag on every exit path
struct InProgressGuard<'a>(&'a AtomicBool);

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Replays the offline queue into a sink
pub struct SyncService {
    pool: SqlitePool,
    queue: OfflineQueue,
    sink: Arc<dyn ScanSink>,
    probe: Arc<dyn ConnectivityProbe>,
    in_progress: AtomicBool,
    event_bus: Option<EventBus>,
}

impl SyncService {
    pub fn new(pool: SqlitePool, sink: Arc<dyn ScanSink>, probe: Arc<dyn ConnectivityProbe>) -> Self {
        Self {
            queue: OfflineQueue::new(pool.clone()),
            pool,
            sink,
            probe,
            in_progress: AtomicBool::new(false),
            event_bus: None,
        }
    }

    /// Publish `OfflineSyncCompleted` after each attempt that reached the sink
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Replay every queued scan in one bulk call
    ///
    /// **Algorithm:**
    /// 1. Refuse if another replay is running
    /// 2. Refuse if the probe reports offline
    /// 3. Read the queue; empty → success with 0 items
    /// 4. One `insert_batch` with everything read
    /// 5. On success drop exactly the entries read and store `last_sync_time`;
    ///    on failure leave the queue untouched
    pub async fn sync(&self) -> Result<SyncResult> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(SyncResult::failed("Sync already in progress"));
        }
        let _guard = InProgressGuard(&self.in_progress);

        if !self.probe.is_online().await {
            return Ok(SyncResult::failed(OFFLINE_MESSAGE));
        }

        let pending = self.queue.pending().await?;
        let Some(max_seq) = pending.last().map(|q| q.seq) else {
            return Ok(SyncResult {
                success: true,
                message: "No offline data to sync".to_string(),
                ..Default::default()
            });
        };

        info!(queued = pending.len(), "Replaying offline scans");

        let result = match self.sink.insert_batch(&pending).await {
            Ok(synced_items) => {
                self.queue.clear_through(max_seq).await?;
                set_setting(&self.pool, LAST_SYNC_SETTING, &Utc::now().to_rfc3339()).await?;
                info!(synced_items, "Offline replay complete");
                SyncResult {
                    success: true,
                    message: format!("Synced {} scans", synced_items),
                    synced_items,
                    ..Default::default()
                }
            }
            Err(e) => {
                warn!(error = %e, queued = pending.len(), "Offline replay failed; queue kept");
                SyncResult {
                    failed_items: pending.len(),
                    ..SyncResult::failed(e.to_string())
                }
            }
        };

        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(GctEvent::OfflineSyncCompleted {
                success: result.success,
                synced_items: result.synced_items,
                message: result.message.clone(),
                timestamp: Utc::now(),
            });
        }

        Ok(result)
    }

    pub async fn status(&self) -> Result<SyncStatus> {
        let last_sync_time = match get_setting(&self.pool, LAST_SYNC_SETTING).await? {
            Some(value) => Some(parse_rfc3339(&value)?),
            None => None,
        };

        Ok(SyncStatus {
            queued: self.queue.count().await?,
            last_sync_time,
            in_progress: self.is_in_progress(),
            connected: self.probe.is_online().await,
        })
    }
}

// ============================================================================
// Background worker
// ============================================================================

/// Periodically replays the queue while the sink is reachable
pub struct SyncWorker {
    service: Arc<SyncService>,
    interval: Duration,
    cancel: CancellationToken,
}

impl SyncWorker {
    pub fn new(service: Arc<SyncService>, interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            service,
            interval,
            cancel,
        }
    }

    /// Run until the token is cancelled
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(interval_secs = self.interval.as_secs(), "Offline sync worker started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Offline sync worker stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "Offline sync tick failed");
                    }
                }
            }
        }
    }

    async fn tick(&self) -> Result<()> {
        if self.service.queue().count().await? == 0 {
            return Ok(());
        }
        if !self.service.probe.is_online().await {
            debug!("Offline; replay deferred");
            return Ok(());
        }
        self.service.sync().await?;
        Ok(())
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
