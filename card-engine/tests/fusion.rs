use std::sync::Arc;

use card_common::memory::{MemoryTelemetryStore, MemoryTopologyStore};
use card_common::types::{
    AlarmCounters, Card, CardDevice, CardType, DeviceKind, SourcedValue, TelemetrySample,
};
use card_engine::error::FusionError;
use card_engine::fusion::FusionEngine;
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

struct Setup {
    topology: MemoryTopologyStore,
    telemetry: MemoryTelemetryStore,
    tenant: Uuid,
}

impl Setup {
    fn new() -> Self {
        Self {
            topology: MemoryTopologyStore::new(),
            telemetry: MemoryTelemetryStore::new(),
            tenant: Uuid::now_v7(),
        }
    }

    fn engine(&self) -> FusionEngine {
        FusionEngine::new(
            Arc::new(self.topology.clone()),
            Arc::new(self.telemetry.clone()),
        )
    }

    fn card(&self, card_type: CardType, devices: Vec<CardDevice>) -> Card {
        let card = Card {
            id: Uuid::now_v7(),
            tenant_id: self.tenant,
            card_type,
            bed_id: devices.iter().find_map(|d| d.bed_id),
            unit_id: Uuid::now_v7(),
            name: "Ada".to_string(),
            address: "E203".to_string(),
            primary_resident_id: None,
            devices,
            residents: vec![],
            alarm_counters: AlarmCounters::default(),
            icon_alarm_level: 3,
            pop_alarm_level: 2,
        };
        self.topology.add_card(card.clone());
        card
    }
}

fn device(kind: DeviceKind, bed_id: Option<Uuid>) -> CardDevice {
    CardDevice {
        device_id: Uuid::now_v7(),
        name: kind.to_string(),
        kind,
        bed_id,
        room_id: None,
    }
}

#[tokio::test]
async fn test_sleepace_heart_rate_wins_and_radar_fills_breath() {
    let setup = Setup::new();
    let bed = Uuid::now_v7();
    let radar = device(DeviceKind::Radar, Some(bed));
    let sleepace = device(DeviceKind::Sleepace, Some(bed));
    let card = setup.card(CardType::ActiveBed, vec![radar.clone(), sleepace.clone()]);

    let mut radar_sample = TelemetrySample::new(radar.device_id, at(100));
    radar_sample.heart_rate = Some(70);
    radar_sample.respiratory_rate = Some(18);
    setup.telemetry.push(radar_sample);
    let mut sleepace_sample = TelemetrySample::new(sleepace.device_id, at(90));
    sleepace_sample.heart_rate = Some(72);
    setup.telemetry.push(sleepace_sample);

    let view = setup
        .engine()
        .fuse_card(setup.tenant, card.id, CardType::ActiveBed)
        .await
        .unwrap();

    assert_eq!(
        view.heart,
        Some(SourcedValue {
            value: 72,
            source: DeviceKind::Sleepace,
            timestamp: at(90),
        })
    );
    assert_eq!(
        view.breath,
        Some(SourcedValue {
            value: 18,
            source: DeviceKind::Radar,
            timestamp: at(100),
        })
    );
    assert_eq!(view.timestamp, at(100));
    assert!(!view.stale);
}

#[tokio::test]
async fn test_radar_only_card_is_not_fused() {
    let setup = Setup::new();
    let first = device(DeviceKind::Radar, None);
    let second = device(DeviceKind::Radar, None);
    let card = setup.card(CardType::Location, vec![first.clone(), second.clone()]);

    let mut a = TelemetrySample::new(first.device_id, at(100));
    a.heart_rate = Some(64);
    a.sleep_state_code = Some("light".to_string());
    setup.telemetry.push(a);
    let mut b = TelemetrySample::new(second.device_id, at(200));
    b.heart_rate = Some(88);
    b.respiratory_rate = Some(20);
    setup.telemetry.push(b);

    let view = setup.engine().fuse(&card).await.unwrap();

    let heart = view.heart.unwrap();
    assert_eq!((heart.value, heart.source), (64, DeviceKind::Radar));
    assert_eq!(view.breath, None);
    assert_eq!(
        view.sleep_stage.map(|s| (s.value, s.source)),
        Some(("light".to_string(), DeviceKind::Radar))
    );
}

#[tokio::test]
async fn test_sleep_pad_only_card_takes_first_pad() {
    let setup = Setup::new();
    let bed = Uuid::now_v7();
    let pad = device(DeviceKind::SleepPad, Some(bed));
    let card = setup.card(CardType::ActiveBed, vec![pad.clone()]);
    let mut sample = TelemetrySample::new(pad.device_id, at(50));
    sample.bed_status_code = Some("in_bed".to_string());
    setup.telemetry.push(sample);

    let view = setup.engine().fuse(&card).await.unwrap();

    assert_eq!(
        view.bed_status.map(|s| s.source),
        Some(DeviceKind::SleepPad)
    );
    assert_eq!(view.person_count, 0);
}

#[tokio::test]
async fn test_bed_card_ignores_other_bed_vitals_but_keeps_their_postures() {
    let setup = Setup::new();
    let bed = Uuid::now_v7();
    let other_bed = Uuid::now_v7();
    let own = device(DeviceKind::Radar, Some(bed));
    let foreign = device(DeviceKind::Radar, Some(other_bed));
    let card = setup.card(CardType::ActiveBed, vec![own.clone(), foreign.clone()]);

    let mut own_sample = TelemetrySample::new(own.device_id, at(100));
    own_sample.heart_rate = Some(60);
    own_sample.tracking_id = Some("t1".to_string());
    own_sample.posture_code = Some("lying".to_string());
    setup.telemetry.push(own_sample);
    let mut foreign_sample = TelemetrySample::new(foreign.device_id, at(150));
    foreign_sample.heart_rate = Some(99);
    foreign_sample.tracking_id = Some("t2".to_string());
    foreign_sample.posture_code = Some("stand".to_string());
    setup.telemetry.push(foreign_sample);

    let view = setup.engine().fuse(&card).await.unwrap();

    assert_eq!(view.heart.map(|h| h.value), Some(60));
    assert_eq!(view.person_count, 2);
    let tracks: Vec<&str> = view.postures.iter().map(|p| p.tracking_id.as_str()).collect();
    assert_eq!(tracks, vec!["t1", "t2"]);
    assert_eq!(view.timestamp, at(150));
}

#[tokio::test]
async fn test_posture_dedup_keeps_latest_per_tracking_id() {
    let setup = Setup::new();
    let radar_a = device(DeviceKind::Radar, None);
    let radar_b = device(DeviceKind::Radar, None);
    let card = setup.card(CardType::Location, vec![radar_a.clone(), radar_b.clone()]);

    let mut a = TelemetrySample::new(radar_a.device_id, at(100));
    a.tracking_id = Some("t1".to_string());
    a.posture_code = Some("walk".to_string());
    setup.telemetry.push(a);
    let mut b = TelemetrySample::new(radar_b.device_id, at(105));
    b.tracking_id = Some("t1".to_string());
    b.posture_code = Some("sitting".to_string());
    setup.telemetry.push(b);

    let view = setup.engine().fuse(&card).await.unwrap();

    assert_eq!(view.person_count, 1);
    assert_eq!(view.postures[0].posture_code.as_deref(), Some("sitting"));
}

#[tokio::test]
async fn test_card_without_samples_is_stale() {
    let setup = Setup::new();
    let card = setup.card(CardType::Location, vec![device(DeviceKind::Radar, None)]);

    let before = Utc::now();
    let view = setup.engine().fuse(&card).await.unwrap();

    assert!(view.stale);
    assert!(view.timestamp >= before);
    assert_eq!(view.heart, None);
}

#[tokio::test]
async fn test_fusion_errors() {
    let setup = Setup::new();
    let engine = setup.engine();

    let missing = engine
        .fuse_card(setup.tenant, Uuid::now_v7(), CardType::Location)
        .await
        .unwrap_err();
    assert!(matches!(missing, FusionError::CardNotFound(_)));

    let empty = setup.card(CardType::Location, vec![]);
    let err = engine
        .fuse_card(setup.tenant, empty.id, CardType::Location)
        .await
        .unwrap_err();
    assert!(matches!(err, FusionError::NoDevices(_)));

    let gateway_only = setup.card(CardType::Location, vec![device(DeviceKind::Other, None)]);
    let err = engine.fuse(&gateway_only).await.unwrap_err();
    assert!(matches!(err, FusionError::NoFusionCandidates(_)));

    let unbound_bed = setup.card(CardType::ActiveBed, vec![device(DeviceKind::Radar, None)]);
    let err = engine.fuse(&unbound_bed).await.unwrap_err();
    assert!(matches!(err, FusionError::NoFusionCandidates(_)));
}

#[tokio::test]
async fn test_telemetry_failure_is_transient() {
    let setup = Setup::new();
    let card = setup.card(CardType::Location, vec![device(DeviceKind::Radar, None)]);
    setup.telemetry.fail(true);

    let err = setup.engine().fuse(&card).await.unwrap_err();

    assert!(matches!(err, FusionError::Store(_)));
    assert_eq!(err.kind(), card_common::error::ErrorKind::TransientIo);
}

#[tokio::test]
async fn test_samples_fetched_in_one_batch() {
    let setup = Setup::new();
    let bed = Uuid::now_v7();
    let card = setup.card(
        CardType::ActiveBed,
        vec![
            device(DeviceKind::Radar, Some(bed)),
            device(DeviceKind::Sleepace, Some(bed)),
            device(DeviceKind::Other, Some(bed)),
        ],
    );

    setup.engine().fuse(&card).await.unwrap();

    let requested = setup.telemetry.requested();
    assert_eq!(requested.len(), 1);
    assert_eq!(requested[0].len(), 2);
}
