use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use card_common::metrics::{inc, timing_guard};
use card_common::store::{TelemetryStore, TopologyStore};
use card_common::types::{
    Card, CardDevice, CardType, DeviceKind, PostureReading, RealtimeView, SourcedValue,
    TelemetrySample,
};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::FusionError;
use crate::metrics_consts::*;

/// Reconciles the latest samples of a card's sensors into one realtime record.
pub struct FusionEngine {
    topology: Arc<dyn TopologyStore>,
    telemetry: Arc<dyn TelemetryStore>,
}

impl FusionEngine {
    pub fn new(topology: Arc<dyn TopologyStore>, telemetry: Arc<dyn TelemetryStore>) -> Self {
        Self {
            topology,
            telemetry,
        }
    }

    #[instrument(skip_all, fields(tenant_id = %tenant_id, card_id = %card_id, card_type = %card_type))]
    pub async fn fuse_card(
        &self,
        tenant_id: Uuid,
        card_id: Uuid,
        card_type: CardType,
    ) -> Result<RealtimeView, FusionError> {
        let card = self
            .topology
            .get_card(tenant_id, card_id)
            .await?
            .ok_or(FusionError::CardNotFound(card_id))?;

        self.fuse_devices(card_id, card_type, &card.devices).await
    }

    /// Fuse a card that has already been loaded.
    pub async fn fuse(&self, card: &Card) -> Result<RealtimeView, FusionError> {
        self.fuse_devices(card.id, card.card_type, &card.devices)
            .await
    }

    async fn fuse_devices(
        &self,
        card_id: Uuid,
        card_type: CardType,
        devices: &[CardDevice],
    ) -> Result<RealtimeView, FusionError> {
        let labels = [("card_type".to_string(), card_type.to_string())];
        let _time = timing_guard(FUSION_TIME, &labels);
        inc(FUSION_RUNS, &labels, 1);

        let result = self.fuse_inner(card_id, card_type, devices).await;
        match &result {
            Ok(view) if view.stale => inc(FUSION_STALE, &labels, 1),
            Ok(_) => {}
            Err(e) => {
                let labels = [
                    ("card_type".to_string(), card_type.to_string()),
                    ("kind".to_string(), e.kind().as_str().to_string()),
                ];
                inc(FUSION_FAILURES, &labels, 1);
            }
        }
        result
    }

    async fn fuse_inner(
        &self,
        card_id: Uuid,
        card_type: CardType,
        devices: &[CardDevice],
    ) -> Result<RealtimeView, FusionError> {
        if devices.is_empty() {
            return Err(FusionError::NoDevices(card_id));
        }

        let candidates = select_candidates(card_type, devices);
        if candidates.is_empty() {
            return Err(FusionError::NoFusionCandidates(card_id));
        }

        // Posture comes from every radar on the card, bed-matched or not.
        let radars: Vec<&CardDevice> = devices.iter().filter(|d| d.kind.is_radar()).collect();

        let mut ids: Vec<Uuid> = Vec::with_capacity(candidates.len() + radars.len());
        let mut seen = HashSet::new();
        for device in candidates.iter().chain(radars.iter()) {
            if seen.insert(device.device_id) {
                ids.push(device.device_id);
            }
        }

        let samples = self.telemetry.latest_samples(&ids).await?;
        debug!(requested = ids.len(), found = samples.len(), "loaded latest samples");
        let by_device: HashMap<Uuid, TelemetrySample> =
            samples.into_iter().map(|s| (s.device_id, s)).collect();

        let pick = |group: &[&CardDevice]| -> Vec<KindedSample> {
            group
                .iter()
                .filter_map(|d| {
                    by_device.get(&d.device_id).map(|sample| KindedSample {
                        kind: d.kind,
                        sample: sample.clone(),
                    })
                })
                .collect()
        };

        let view = fuse_samples(
            &pick(candidates.as_slice()),
            &pick(radars.as_slice()),
            Utc::now(),
        );
        if view.stale {
            warn!(card_id = %card_id, "no samples for card, realtime view is stale");
        }
        Ok(view)
    }
}

/// A sample tagged with the kind of device that produced it.
#[derive(Debug, Clone)]
pub struct KindedSample {
    pub kind: DeviceKind,
    pub sample: TelemetrySample,
}

/// Devices whose vitals feed the card. Bed cards only trust devices on the first bed seen.
pub fn select_candidates(card_type: CardType, devices: &[CardDevice]) -> Vec<&CardDevice> {
    let eligible = devices.iter().filter(|d| d.kind.is_fusion_eligible());

    match card_type {
        CardType::Location => eligible.collect(),
        CardType::ActiveBed => {
            let Some(bed_id) = devices
                .iter()
                .filter(|d| d.kind.is_fusion_eligible())
                .find_map(|d| d.bed_id)
            else {
                return Vec::new();
            };
            eligible.filter(|d| d.bed_id == Some(bed_id)).collect()
        }
    }
}

/// Fuse already-loaded samples.
///
/// `vitals` are the candidate samples in card order, `radar_postures` every radar sample of
/// the card. `now` stamps the result when no sample contributed.
pub fn fuse_samples(
    vitals: &[KindedSample],
    radar_postures: &[KindedSample],
    now: DateTime<Utc>,
) -> RealtimeView {
    let sleepace: Vec<&KindedSample> = vitals.iter().filter(|s| s.kind.is_sleepace_like()).collect();
    let radar: Vec<&KindedSample> = vitals.iter().filter(|s| s.kind.is_radar()).collect();

    let mut latest: Option<DateTime<Utc>> = None;
    let mut observe = |ts: DateTime<Utc>| {
        latest = Some(latest.map_or(ts, |l| l.max(ts)));
    };

    let (heart, breath, bed_status, sleep_stage) = if !sleepace.is_empty() && !radar.is_empty() {
        let heart = prefer(&sleepace, &radar, |s| s.heart_rate);
        let breath = prefer(&sleepace, &radar, |s| s.respiratory_rate);
        let bed_status = prefer(&sleepace, &radar, |s| s.bed_status_code.clone());
        let sleep_stage = prefer(&sleepace, &radar, |s| s.sleep_state_code.clone());
        for ts in [
            heart.as_ref().map(|v| v.timestamp),
            breath.as_ref().map(|v| v.timestamp),
            bed_status.as_ref().map(|v| v.timestamp),
            sleep_stage.as_ref().map(|v| v.timestamp),
        ]
        .into_iter()
        .flatten()
        {
            observe(ts);
        }
        (heart, breath, bed_status, sleep_stage)
    } else {
        match sleepace.first().or(radar.first()) {
            Some(first) => {
                observe(first.sample.timestamp);
                let sourced = |value| SourcedValue {
                    value,
                    source: first.kind,
                    timestamp: first.sample.timestamp,
                };
                (
                    first.sample.heart_rate.map(sourced),
                    first.sample.respiratory_rate.map(sourced),
                    first.sample.bed_status_code.clone().map(|v| SourcedValue {
                        value: v,
                        source: first.kind,
                        timestamp: first.sample.timestamp,
                    }),
                    first.sample.sleep_state_code.clone().map(|v| SourcedValue {
                        value: v,
                        source: first.kind,
                        timestamp: first.sample.timestamp,
                    }),
                )
            }
            None => (None, None, None, None),
        }
    };

    let mut by_track: BTreeMap<String, &TelemetrySample> = BTreeMap::new();
    for radar_sample in radar_postures.iter().filter(|s| s.kind.is_radar()) {
        let sample = &radar_sample.sample;
        let Some(tracking_id) = sample.tracking_id.as_ref() else {
            continue;
        };
        match by_track.get(tracking_id) {
            Some(current) if current.timestamp >= sample.timestamp => {}
            _ => {
                by_track.insert(tracking_id.clone(), sample);
            }
        }
    }
    for sample in by_track.values() {
        observe(sample.timestamp);
    }
    let postures: Vec<PostureReading> = by_track
        .into_iter()
        .map(|(tracking_id, sample)| PostureReading {
            tracking_id,
            posture_code: sample.posture_code.clone(),
            posture_display: sample.posture_display.clone(),
        })
        .collect();

    RealtimeView {
        heart,
        breath,
        bed_status,
        sleep_stage,
        person_count: u32::try_from(postures.len()).unwrap_or(u32::MAX),
        postures,
        timestamp: latest.unwrap_or(now),
        stale: latest.is_none(),
    }
}

/// First sleepace-like sample carrying the field, else the first radar sample carrying it.
fn prefer<T>(
    sleepace: &[&KindedSample],
    radar: &[&KindedSample],
    field: impl Fn(&TelemetrySample) -> Option<T>,
) -> Option<SourcedValue<T>> {
    sleepace.iter().chain(radar.iter()).find_map(|s| {
        field(&s.sample).map(|value| SourcedValue {
            value,
            source: s.kind,
            timestamp: s.sample.timestamp,
        })
    })
}
