use std::sync::Arc;
use std::time::Duration;

use card_common::error::StoreError;
use card_common::health::HealthHandle;
use card_common::metrics::{inc, timing_guard};
use card_common::store::TopologyStore;
use card_engine::topology::TopologyEngine;
use card_engine::view::ViewAssembler;
use card_engine::BatchReport;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::metrics_consts::*;

// The refresher reports its own metrics, this is mostly for testing purposes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub tenants: u64,
    /// Tenants whose unit or card listing failed outright.
    pub failed_tenants: u64,
    pub units: BatchReport,
    pub views: BatchReport,
}

/// Re-derives every unit's cards and republishes every card view, tenant by tenant.
pub struct Refresher {
    store: Arc<dyn TopologyStore>,
    topology: TopologyEngine,
    views: ViewAssembler,
}

impl Refresher {
    pub fn new(store: Arc<dyn TopologyStore>, topology: TopologyEngine, views: ViewAssembler) -> Self {
        Self {
            store,
            topology,
            views,
        }
    }

    pub async fn run_once(&self) -> Result<RefreshReport, StoreError> {
        info!("Running refresh");
        let _loop_start = timing_guard(RUN_TIME, &[]);
        inc(RUN_STARTS, &[], 1);

        let tenants = self.store.list_tenants().await?;

        let mut report = RefreshReport::default();
        for tenant_id in tenants {
            report.tenants += 1;
            if !self.refresh_tenant(tenant_id, &mut report).await {
                report.failed_tenants += 1;
            }
        }

        inc(TENANTS_REFRESHED, &[], report.tenants);
        inc(TENANT_FAILURES, &[], report.failed_tenants);
        inc(UNITS_DERIVED, &[], report.units.succeeded);
        inc(UNIT_FAILURES, &[], report.units.failed);
        inc(VIEWS_PUBLISHED, &[], report.views.succeeded);
        inc(VIEW_FAILURES, &[], report.views.failed);

        info!(
            tenants = report.tenants,
            failed_tenants = report.failed_tenants,
            units_derived = report.units.succeeded,
            unit_failures = report.units.failed,
            views_published = report.views.succeeded,
            view_failures = report.views.failed,
            "refresh finished"
        );
        Ok(report)
    }

    /// Views are rebuilt even when derivation failed, from whatever cards are in place.
    async fn refresh_tenant(&self, tenant_id: Uuid, report: &mut RefreshReport) -> bool {
        let mut ok = true;

        let derived = {
            let _time = timing_guard(DERIVE_TIME, &[]);
            self.topology.derive_tenant(tenant_id).await
        };
        match derived {
            Ok(units) => report.units.merge(units),
            Err(e) => {
                error!(tenant_id = %tenant_id, "failed to derive tenant cards: {}", e);
                ok = false;
            }
        }

        let published = {
            let _time = timing_guard(VIEWS_TIME, &[]);
            self.views.refresh_tenant_views(tenant_id).await
        };
        match published {
            Ok(views) => report.views.merge(views),
            Err(e) => {
                error!(tenant_id = %tenant_id, "failed to refresh tenant card views: {}", e);
                ok = false;
            }
        }

        ok
    }
}

/// Run the refresher every `interval` until cancelled.
pub async fn refresh_loop(
    refresher: Refresher,
    liveness: HealthHandle,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        if let Err(e) = refresher.run_once().await {
            inc(RUN_FAILURES, &[], 1);
            warn!("refresh failed with: {}", e);
        }
        liveness.report_healthy();
    }

    info!("refresh loop stopped");
}
