use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    Parse,
    CardNotFound,
    FusionFailed,
    CacheFailed,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Parse => "parse",
            FailureCategory::CardNotFound => "card_not_found",
            FailureCategory::FusionFailed => "fusion_failed",
            FailureCategory::CacheFailed => "cache_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub succeeded: u64,
    pub failed_parse: u64,
    pub failed_card_not_found: u64,
    pub failed_fusion: u64,
    pub failed_cache: u64,
    pub skipped: u64,
    pub dropped: u64,
    pub total_latency_ms: u64,
}

impl StatsSnapshot {
    pub fn failed(&self) -> u64 {
        self.failed_parse + self.failed_card_not_found + self.failed_fusion + self.failed_cache
    }

    /// Percentage of processed messages that succeeded, 0 when nothing was processed.
    pub fn success_rate(&self) -> f64 {
        if self.processed == 0 {
            return 0.0;
        }
        self.succeeded as f64 * 100.0 / self.processed as f64
    }

    pub fn average_latency_ms(&self) -> f64 {
        if self.processed == 0 {
            return 0.0;
        }
        self.total_latency_ms as f64 / self.processed as f64
    }
}

/// Sink for per-message outcomes. Shared between the consumer loop and the reporter.
pub trait StatsCollector: Send + Sync {
    fn record_processed(&self, latency: Duration);
    fn record_succeeded(&self);
    fn record_failed(&self, category: FailureCategory);
    fn record_skipped(&self);
    fn record_dropped(&self);
    fn snapshot(&self) -> StatsSnapshot;
}

#[derive(Debug, Default)]
pub struct AtomicStats {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed_parse: AtomicU64,
    failed_card_not_found: AtomicU64,
    failed_fusion: AtomicU64,
    failed_cache: AtomicU64,
    skipped: AtomicU64,
    dropped: AtomicU64,
    total_latency_ms: AtomicU64,
}

impl AtomicStats {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatsCollector for AtomicStats {
    fn record_processed(&self, latency: Duration) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.total_latency_ms.fetch_add(ms, Ordering::Relaxed);
    }

    fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failed(&self, category: FailureCategory) {
        let counter = match category {
            FailureCategory::Parse => &self.failed_parse,
            FailureCategory::CardNotFound => &self.failed_card_not_found,
            FailureCategory::FusionFailed => &self.failed_fusion,
            FailureCategory::CacheFailed => &self.failed_cache,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed_parse: self.failed_parse.load(Ordering::Relaxed),
            failed_card_not_found: self.failed_card_not_found.load(Ordering::Relaxed),
            failed_fusion: self.failed_fusion.load(Ordering::Relaxed),
            failed_cache: self.failed_cache.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            total_latency_ms: self.total_latency_ms.load(Ordering::Relaxed),
        }
    }
}

pub fn log_snapshot(snapshot: &StatsSnapshot) {
    info!(
        processed = snapshot.processed,
        succeeded = snapshot.succeeded,
        failed = snapshot.failed(),
        failed_parse = snapshot.failed_parse,
        failed_card_not_found = snapshot.failed_card_not_found,
        failed_fusion = snapshot.failed_fusion,
        failed_cache = snapshot.failed_cache,
        skipped = snapshot.skipped,
        dropped = snapshot.dropped,
        success_rate = format!("{:.2}%", snapshot.success_rate()),
        avg_latency_ms = format!("{:.1}", snapshot.average_latency_ms()),
        "consumer stats"
    );
}

/// Log cumulative stats every `interval` until cancelled, then once more on the way out.
pub async fn report_stats(
    stats: Arc<dyn StatsCollector>,
    interval: Duration,
    cancel: CancellationToken,
) -> u64 {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;

    let mut reports = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                log_snapshot(&stats.snapshot());
                reports += 1;
            }
        }
    }

    log_snapshot(&stats.snapshot());
    reports
}
