use std::sync::Arc;
use std::time::Duration;

use card_common::backoff::BackoffPolicy;
use card_common::cache::CardCache;
use card_common::error::ErrorKind;
use card_common::health::HealthHandle;
use card_common::metrics::{inc, timing_guard};
use card_common::store::TopologyStore;
use card_common::types::{Card, DeviceBinding};
use card_engine::fusion::FusionEngine;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{ConsumerError, StreamError};
use crate::event::{StreamEntry, TelemetryEvent};
use crate::metrics_consts::*;
use crate::stats::StatsCollector;
use crate::stream::EventStream;

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub batch_size: usize,
    pub block_timeout: Duration,
    pub claim_interval: Duration,
    pub claim_min_idle: Duration,
    pub claim_batch_size: usize,
    /// Pending entries delivered this many times are dropped instead of claimed.
    pub max_deliveries: u64,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            batch_size: 64,
            block_timeout: Duration::from_secs(2),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(60),
            claim_batch_size: 100,
            max_deliveries: 5,
        }
    }
}

/// What happened to a single stream entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Fused and written to the realtime cache, then acked.
    Fused(Uuid),
    /// The device doesn't belong to any card. Acked.
    Skipped,
    /// Left unacked for redelivery.
    Failed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub claimed: usize,
    pub dropped: usize,
}

/// Reads telemetry notifications from the stream, fuses the owning card and writes its
/// realtime view to the cache. Entries are acked only after the cache write succeeded.
pub struct CardConsumer {
    stream: Arc<dyn EventStream>,
    store: Arc<dyn TopologyStore>,
    fusion: FusionEngine,
    cache: CardCache,
    stats: Arc<dyn StatsCollector>,
    backoff: BackoffPolicy,
    settings: ConsumerSettings,
    liveness: HealthHandle,
}

impl CardConsumer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream: Arc<dyn EventStream>,
        store: Arc<dyn TopologyStore>,
        fusion: FusionEngine,
        cache: CardCache,
        stats: Arc<dyn StatsCollector>,
        backoff: BackoffPolicy,
        settings: ConsumerSettings,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            stream,
            store,
            fusion,
            cache,
            stats,
            backoff,
            settings,
            liveness,
        }
    }

    /// Run until `cancel` fires. Read failures are retried with backoff, never fatal.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut backoff = self.backoff.start();

        while let Err(e) = self.stream.ensure_group().await {
            let delay = backoff.next_delay();
            error!(attempt = backoff.attempt(), ?delay, "failed to create consumer group: {}", e);
            if !sleep_or_cancel(&cancel, delay).await {
                info!("consumer cancelled before start");
                return;
            }
        }
        backoff.reset();

        let mut last_claim = Instant::now();
        info!("consumer started");

        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.liveness.report_healthy();

            if last_claim.elapsed() >= self.settings.claim_interval {
                if let Err(e) = self.recover_pending().await {
                    warn!("pending entry recovery failed: {}", e);
                }
                last_claim = Instant::now();
            }

            let batch = match self
                .stream
                .read_batch(self.settings.batch_size, self.settings.block_timeout)
                .await
            {
                Ok(batch) => {
                    backoff.reset();
                    batch
                }
                Err(e) => {
                    inc(READ_ERRORS, &[], 1);
                    let delay = backoff.next_delay();
                    error!(attempt = backoff.attempt(), ?delay, "stream read failed: {}", e);
                    if !sleep_or_cancel(&cancel, delay).await {
                        break;
                    }
                    continue;
                }
            };

            metrics::histogram!(BATCH_SIZE).record(batch.len() as f64);
            for entry in &batch {
                // Unprocessed entries stay pending and are recovered later.
                if cancel.is_cancelled() {
                    break;
                }
                self.handle(entry).await;
            }
        }

        info!("consumer stopped");
    }

    /// Process one entry end to end: decode, resolve, fuse, cache, ack.
    pub async fn handle(&self, entry: &StreamEntry) -> Outcome {
        let started = Instant::now();
        let timing = timing_guard(MESSAGE_LATENCY, &[]);

        let outcome = match self.process(entry).await {
            Ok(Some(card_id)) => {
                self.ack(&entry.id).await;
                self.stats.record_succeeded();
                inc(MESSAGES_SUCCEEDED, &[], 1);
                timing.label("outcome", "fused").fin();
                Outcome::Fused(card_id)
            }
            Ok(None) => {
                self.ack(&entry.id).await;
                self.stats.record_skipped();
                let labels = [("kind".to_string(), ErrorKind::SoftSkip.as_str().to_string())];
                inc(MESSAGES_SKIPPED, &labels, 1);
                timing.label("outcome", "skipped").fin();
                Outcome::Skipped
            }
            Err(e) => {
                let category = e.category();
                self.stats.record_failed(category);
                let labels = [("category".to_string(), category.as_str().to_string())];
                inc(MESSAGES_FAILED, &labels, 1);
                match &e {
                    ConsumerError::Parse(_) | ConsumerError::CardNotFound { .. } => {
                        warn!(entry_id = %entry.id, "message not processed: {}", e)
                    }
                    _ => error!(entry_id = %entry.id, kind = e.kind().as_str(), "message failed: {}", e),
                }
                timing.label("outcome", "failed").fin();
                Outcome::Failed
            }
        };

        self.stats.record_processed(started.elapsed());
        inc(MESSAGES_PROCESSED, &[], 1);
        outcome
    }

    /// Returns the id of the card whose realtime view was written, `None` for soft skips.
    async fn process(&self, entry: &StreamEntry) -> Result<Option<Uuid>, ConsumerError> {
        let event = entry.decode()?;

        let Some(card) = self.resolve_card(&event).await? else {
            debug!(device_id = %event.device_id, "device is not bound to a bed or room, skipping");
            return Ok(None);
        };

        let view = self.fusion.fuse(&card).await?;
        self.cache.put_realtime(card.id, &view).await?;
        Ok(Some(card.id))
    }

    /// The card a device's telemetry belongs to. `Ok(None)` means the device is bound to
    /// neither a bed nor a room.
    #[instrument(skip_all, fields(tenant_id = %event.tenant_id, device_id = %event.device_id))]
    pub async fn resolve_card(&self, event: &TelemetryEvent) -> Result<Option<Card>, ConsumerError> {
        let not_found = || ConsumerError::CardNotFound {
            tenant_id: event.tenant_id,
            device_id: event.device_id,
        };

        let device = self
            .store
            .get_device(event.tenant_id, event.device_id)
            .await?
            .ok_or_else(not_found)?;

        let card = match device.binding() {
            DeviceBinding::Bed(bed_id) => self.store.find_bed_card(event.tenant_id, bed_id).await?,
            DeviceBinding::Room(room_id) => {
                match self.store.find_room_unit(event.tenant_id, room_id).await? {
                    Some(unit_id) => self.find_room_card(event.tenant_id, unit_id, device.id).await?,
                    None => None,
                }
            }
            DeviceBinding::Unbound => return Ok(None),
        };

        card.ok_or_else(not_found).map(Some)
    }

    /// The unit's Location card, or, in a single-bed unit where room devices are folded into
    /// the bed card, whichever card carries the device.
    async fn find_room_card(
        &self,
        tenant_id: Uuid,
        unit_id: Uuid,
        device_id: Uuid,
    ) -> Result<Option<Card>, ConsumerError> {
        if let Some(card) = self.store.find_location_card(tenant_id, unit_id).await? {
            return Ok(Some(card));
        }

        Ok(self
            .store
            .list_unit_cards(tenant_id, unit_id)
            .await?
            .into_iter()
            .find(|card| card.devices.iter().any(|d| d.device_id == device_id)))
    }

    /// Claim entries other consumers (or a previous run of this one) left pending, and
    /// reprocess them. Entries that reached the delivery limit are acked and dropped.
    #[instrument(skip_all)]
    pub async fn recover_pending(&self) -> Result<RecoveryReport, StreamError> {
        let pending = self
            .stream
            .pending(self.settings.claim_min_idle, self.settings.claim_batch_size)
            .await?;
        if pending.is_empty() {
            return Ok(RecoveryReport::default());
        }

        let (poison, retry): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|p| p.deliveries >= self.settings.max_deliveries);

        let poison_ids: Vec<String> = poison.into_iter().map(|p| p.id).collect();
        if !poison_ids.is_empty() {
            self.stream.ack(&poison_ids).await?;
            for id in &poison_ids {
                warn!(entry_id = %id, max_deliveries = self.settings.max_deliveries, "dropping entry after repeated failures");
                self.stats.record_dropped();
            }
            inc(MESSAGES_DROPPED, &[], poison_ids.len() as u64);
        }

        let retry_ids: Vec<String> = retry.into_iter().map(|p| p.id).collect();
        let claimed = self
            .stream
            .claim(self.settings.claim_min_idle, &retry_ids)
            .await?;
        inc(PENDING_CLAIMED, &[], claimed.len() as u64);
        for entry in &claimed {
            self.handle(entry).await;
        }

        let report = RecoveryReport {
            claimed: claimed.len(),
            dropped: poison_ids.len(),
        };
        info!(claimed = report.claimed, dropped = report.dropped, "recovered pending entries");
        Ok(report)
    }

    async fn ack(&self, id: &str) {
        if let Err(e) = self.stream.ack(&[id.to_owned()]).await {
            // The entry stays pending and is reprocessed after a claim; cache writes are
            // idempotent overwrites.
            inc(ACK_ERRORS, &[], 1);
            error!(entry_id = %id, "failed to ack entry: {}", e);
        }
    }
}

/// Sleep for `delay` unless cancelled first. Returns false on cancellation.
async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
