use std::sync::Arc;

use card_common::cache::{CacheError, CardCache};
use card_common::metrics::inc;
use card_common::store::TopologyStore;
use card_common::types::{
    AlarmCounters, AlarmItem, Card, CardDevice, CardResident, CardType, DeviceKind, RealtimeView,
};
use card_common::vocabulary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::ViewError;
use crate::metrics_consts::*;
use crate::BatchReport;

/// A vital sign as shown on the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VitalView {
    pub value: i32,
    pub source: DeviceKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostureView {
    pub tracking_id: String,
    /// Translated posture, absent for unknown codes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub posture: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub posture_display: Option<String>,
}

/// The assembled card tile, cached under `card:{id}:view`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardView {
    pub card_id: Uuid,
    pub tenant_id: Uuid,
    pub card_type: CardType,
    pub unit_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bed_id: Option<Uuid>,
    pub name: String,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_resident_id: Option<Uuid>,
    pub devices: Vec<CardDevice>,
    pub residents: Vec<CardResident>,
    pub unhandled_alarms: AlarmCounters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_unhandled_alarms: Option<i64>,
    pub icon_alarm_level: i32,
    pub pop_alarm_level: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<VitalView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub respiratory_rate: Option<VitalView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bed_status: Option<VitalView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sleep_stage: Option<VitalView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub postures: Vec<PostureView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub realtime_stale: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alarms: Vec<AlarmItem>,
}

impl CardView {
    /// The database-only part of the view.
    pub fn from_card(card: &Card) -> Self {
        let total = card.alarm_counters.total();
        CardView {
            card_id: card.id,
            tenant_id: card.tenant_id,
            card_type: card.card_type,
            unit_id: card.unit_id,
            bed_id: card.bed_id,
            name: card.name.clone(),
            address: card.address.clone(),
            primary_resident_id: card.primary_resident_id,
            devices: card.devices.clone(),
            residents: card.residents.clone(),
            unhandled_alarms: card.alarm_counters,
            total_unhandled_alarms: (total > 0).then_some(total),
            icon_alarm_level: card.icon_alarm_level,
            pop_alarm_level: card.pop_alarm_level,
            heart_rate: None,
            respiratory_rate: None,
            bed_status: None,
            sleep_stage: None,
            person_count: None,
            postures: Vec::new(),
            realtime_timestamp: None,
            realtime_stale: false,
            alarms: Vec::new(),
        }
    }

    pub fn apply_realtime(&mut self, realtime: RealtimeView) {
        let translate = |field: Option<card_common::types::SourcedValue<String>>,
                         table: fn(&str) -> Option<i32>| {
            field.and_then(|v| {
                table(&v.value).map(|value| VitalView {
                    value,
                    source: v.source,
                    timestamp: v.timestamp,
                })
            })
        };

        self.heart_rate = realtime.heart.map(|v| VitalView {
            value: v.value,
            source: v.source,
            timestamp: v.timestamp,
        });
        self.respiratory_rate = realtime.breath.map(|v| VitalView {
            value: v.value,
            source: v.source,
            timestamp: v.timestamp,
        });
        self.bed_status = translate(realtime.bed_status, vocabulary::bed_status);
        self.sleep_stage = translate(realtime.sleep_stage, vocabulary::sleep_stage);
        self.person_count = Some(realtime.person_count);
        self.postures = realtime
            .postures
            .into_iter()
            .map(|p| PostureView {
                posture: p.posture_code.as_deref().and_then(vocabulary::posture),
                tracking_id: p.tracking_id,
                posture_display: p.posture_display,
            })
            .collect();
        self.realtime_timestamp = Some(realtime.timestamp);
        self.realtime_stale = realtime.stale;
    }
}

/// Merges the card row with the realtime and alarm cache entries.
pub struct ViewAssembler {
    store: Arc<dyn TopologyStore>,
    cache: CardCache,
}

impl ViewAssembler {
    pub fn new(store: Arc<dyn TopologyStore>, cache: CardCache) -> Self {
        Self { store, cache }
    }

    #[instrument(skip_all, fields(tenant_id = %tenant_id, card_id = %card_id))]
    pub async fn get_card_view(&self, tenant_id: Uuid, card_id: Uuid) -> Result<CardView, ViewError> {
        let card = match self.store.get_card(tenant_id, card_id).await {
            Ok(Some(card)) => card,
            Ok(None) => return Err(self.failed(ViewError::CardNotFound(card_id))),
            Err(e) => return Err(self.failed(e.into())),
        };

        Ok(self.assemble(&card).await)
    }

    /// Build the view of a loaded card. Cache problems degrade the view, they never fail it.
    pub async fn assemble(&self, card: &Card) -> CardView {
        let mut view = CardView::from_card(card);

        let (realtime, alarms) = futures::join!(
            self.cache.get_realtime(card.id),
            self.cache.get_alarms(card.id)
        );

        match realtime {
            Ok(realtime) => view.apply_realtime(realtime),
            Err(e) => self.degraded(card.id, "realtime", &e),
        }
        match alarms {
            Ok(alarms) => view.alarms = alarms,
            Err(e) => self.degraded(card.id, "alarms", &e),
        }

        inc(VIEWS_ASSEMBLED, &[], 1);
        view
    }

    /// Assemble every card of the tenant and publish each view to the cache.
    #[instrument(skip_all, fields(tenant_id = %tenant_id))]
    pub async fn refresh_tenant_views(&self, tenant_id: Uuid) -> Result<BatchReport, ViewError> {
        let cards = self.store.list_cards(tenant_id).await?;

        let mut report = BatchReport::default();
        for card in &cards {
            let view = self.assemble(card).await;
            match self.cache.put_view(card.id, &view).await {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    let e = self.failed(ViewError::Cache(e));
                    error!(card_id = %card.id, "failed to publish card view: {}", e);
                    report.failed += 1;
                }
            }
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "refreshed tenant card views"
        );
        Ok(report)
    }

    fn degraded(&self, card_id: Uuid, entry: &'static str, e: &CacheError) {
        match e {
            CacheError::NotFound => {}
            _ => warn!(card_id = %card_id, entry, "cache read failed, serving database fields: {}", e),
        }
        let labels = [
            ("entry".to_string(), entry.to_string()),
            (
                "kind".to_string(),
                card_common::error::ErrorKind::from(e).as_str().to_string(),
            ),
        ];
        inc(VIEW_CACHE_DEGRADED, &labels, 1);
    }

    fn failed(&self, e: ViewError) -> ViewError {
        let labels = [("kind".to_string(), e.kind().as_str().to_string())];
        inc(VIEW_FAILURES, &labels, 1);
        e
    }
}
