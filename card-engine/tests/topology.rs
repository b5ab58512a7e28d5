use std::sync::Arc;

use card_common::memory::MemoryTopologyStore;
use card_common::store::TopologyStore;
use card_common::types::{
    AlarmCounters, Bed, Card, CardType, Device, DeviceKind, Resident, Unit,
};
use card_engine::error::TopologyError;
use card_engine::topology::{AlarmThresholds, TopologyEngine};
use card_engine::BatchReport;
use uuid::Uuid;

struct Facility {
    store: MemoryTopologyStore,
    tenant: Uuid,
}

impl Facility {
    fn new() -> Self {
        Self {
            store: MemoryTopologyStore::new(),
            tenant: Uuid::now_v7(),
        }
    }

    fn engine(&self) -> TopologyEngine {
        TopologyEngine::new(Arc::new(self.store.clone()), AlarmThresholds::default())
    }

    fn unit(&self, name: &str, multi_person: bool, public: bool) -> Uuid {
        let id = Uuid::now_v7();
        self.store.add_unit(Unit {
            id,
            tenant_id: self.tenant,
            name: name.to_string(),
            branch: Some("BranchA".to_string()),
            building: Some("-".to_string()),
            is_public_space: public,
            is_multi_person_room: multi_person,
            unit_type: None,
        });
        id
    }

    fn bed(&self, unit_id: Uuid) -> Uuid {
        let id = Uuid::now_v7();
        self.store.add_bed(Bed {
            id,
            tenant_id: self.tenant,
            unit_id,
            room_id: None,
        });
        id
    }

    fn device(&self, unit_id: Uuid, kind: DeviceKind, bed_id: Option<Uuid>) -> Uuid {
        let id = Uuid::now_v7();
        self.store.add_device(Device {
            id,
            tenant_id: self.tenant,
            unit_id: Some(unit_id),
            name: format!("{kind}-{id}"),
            kind,
            bound_bed_id: bed_id,
            bound_room_id: None,
            monitoring_enabled: true,
            disabled: false,
        });
        id
    }

    fn resident(&self, unit_id: Uuid, nickname: &str, bed_id: Option<Uuid>) -> Uuid {
        let id = Uuid::now_v7();
        self.store.add_resident(Resident {
            id,
            tenant_id: self.tenant,
            nickname: nickname.to_string(),
            unit_id: Some(unit_id),
            bed_id,
        });
        id
    }
}

fn device_ids(card: &Card) -> Vec<Uuid> {
    let mut ids = card.device_ids();
    ids.sort();
    ids
}

fn sorted(mut ids: Vec<Uuid>) -> Vec<Uuid> {
    ids.sort();
    ids
}

#[tokio::test]
async fn test_no_beds_no_unbound_devices_creates_no_cards() {
    let facility = Facility::new();
    let unit = facility.unit("E203", false, false);
    facility.resident(unit, "Ada", None);

    let cards = facility.engine().derive_cards(facility.tenant, unit).await.unwrap();

    assert!(cards.is_empty());
    assert!(facility.store.unit_cards(unit).is_empty());
}

#[tokio::test]
async fn test_no_beds_with_unbound_devices_creates_one_location_card() {
    let facility = Facility::new();
    let unit = facility.unit("E203", false, false);
    let radar = facility.device(unit, DeviceKind::Radar, None);
    let pad = facility.device(unit, DeviceKind::SleepPad, None);
    let ada = facility.resident(unit, "Ada", None);
    let bob = facility.resident(unit, "Bob", None);

    let cards = facility.engine().derive_cards(facility.tenant, unit).await.unwrap();

    assert_eq!(cards.len(), 1);
    let card = &cards[0];
    assert_eq!(card.card_type, CardType::Location);
    assert_eq!(card.bed_id, None);
    assert_eq!(device_ids(card), sorted(vec![radar, pad]));
    assert_eq!(
        card.residents.iter().map(|r| r.resident_id).collect::<Vec<_>>(),
        vec![ada, bob]
    );
    assert_eq!(card.name, "Ada");
    assert_eq!(card.address, "BranchA-E203");
    assert_eq!(card.primary_resident_id, None);
}

#[tokio::test]
async fn test_location_name_is_unit_name_for_shared_spaces() {
    let facility = Facility::new();
    let lounge = facility.unit("Lounge", false, true);
    facility.device(lounge, DeviceKind::Radar, None);
    facility.resident(lounge, "Ada", None);
    let ward = facility.unit("Ward 3", true, false);
    facility.device(ward, DeviceKind::Radar, None);
    facility.resident(ward, "Bob", None);
    let empty = facility.unit("E999", false, false);
    facility.device(empty, DeviceKind::Radar, None);

    let engine = facility.engine();
    let lounge_cards = engine.derive_cards(facility.tenant, lounge).await.unwrap();
    let ward_cards = engine.derive_cards(facility.tenant, ward).await.unwrap();
    let empty_cards = engine.derive_cards(facility.tenant, empty).await.unwrap();

    assert_eq!(lounge_cards[0].name, "Lounge");
    assert_eq!(ward_cards[0].name, "Ward 3");
    assert_eq!(empty_cards[0].name, "E999");
}

#[tokio::test]
async fn test_single_active_bed_absorbs_unbound_devices() {
    let facility = Facility::new();
    let unit = facility.unit("E203", false, false);
    let bed = facility.bed(unit);
    let idle_bed = facility.bed(unit);
    let bed_radar = facility.device(unit, DeviceKind::Radar, Some(bed));
    let unbound = facility.device(unit, DeviceKind::Sleepace, None);
    let ada = facility.resident(unit, "Ada", Some(bed));
    facility.resident(unit, "Bob", Some(idle_bed));

    let cards = facility.engine().derive_cards(facility.tenant, unit).await.unwrap();

    assert_eq!(cards.len(), 1);
    let card = &cards[0];
    assert_eq!(card.card_type, CardType::ActiveBed);
    assert_eq!(card.bed_id, Some(bed));
    assert_eq!(device_ids(card), sorted(vec![bed_radar, unbound]));
    assert_eq!(card.name, "Ada");
    assert_eq!(card.primary_resident_id, Some(ada));
}

#[tokio::test]
async fn test_many_active_beds_get_own_devices_plus_location_card() {
    let facility = Facility::new();
    let unit = facility.unit("E203", false, false);
    let bed_a = facility.bed(unit);
    let bed_b = facility.bed(unit);
    let radar_a = facility.device(unit, DeviceKind::Radar, Some(bed_a));
    let pad_b = facility.device(unit, DeviceKind::SleepPad, Some(bed_b));
    let unbound = facility.device(unit, DeviceKind::Radar, None);
    facility.resident(unit, "Ada", Some(bed_a));

    let cards = facility.engine().derive_cards(facility.tenant, unit).await.unwrap();

    assert_eq!(cards.len(), 3);
    let bed_card = |bed| {
        cards
            .iter()
            .find(|c| c.bed_id == Some(bed))
            .expect("bed card")
    };
    assert_eq!(device_ids(bed_card(bed_a)), vec![radar_a]);
    assert_eq!(device_ids(bed_card(bed_b)), vec![pad_b]);
    assert_eq!(bed_card(bed_a).name, "Ada");
    // Unbound bed falls back to the oldest unit resident.
    assert_eq!(bed_card(bed_b).name, "Ada");

    let locations: Vec<&Card> = cards
        .iter()
        .filter(|c| c.card_type == CardType::Location)
        .collect();
    assert_eq!(locations.len(), 1);
    assert_eq!(device_ids(locations[0]), vec![unbound]);
}

#[tokio::test]
async fn test_many_active_beds_without_unbound_devices_has_no_location_card() {
    let facility = Facility::new();
    let unit = facility.unit("E203", false, false);
    let bed_a = facility.bed(unit);
    let bed_b = facility.bed(unit);
    facility.device(unit, DeviceKind::Radar, Some(bed_a));
    facility.device(unit, DeviceKind::Radar, Some(bed_b));

    let cards = facility.engine().derive_cards(facility.tenant, unit).await.unwrap();

    assert_eq!(cards.len(), 2);
    assert!(cards.iter().all(|c| c.card_type == CardType::ActiveBed));
    assert!(cards.iter().all(|c| c.name == "Unknown"));
}

#[tokio::test]
async fn test_unbound_bed_in_multi_person_room_disables_monitor() {
    let facility = Facility::new();
    let unit = facility.unit("Ward 3", true, false);
    let bed = facility.bed(unit);
    facility.device(unit, DeviceKind::Radar, Some(bed));
    facility.resident(unit, "Ada", None);

    let cards = facility.engine().derive_cards(facility.tenant, unit).await.unwrap();

    assert_eq!(cards[0].name, "disable monitor");
    assert_eq!(cards[0].primary_resident_id, None);
}

#[tokio::test]
async fn test_devices_not_monitoring_are_ignored() {
    let facility = Facility::new();
    let unit = facility.unit("E203", false, false);
    let bed = facility.bed(unit);
    let device = |bound_bed_id, monitoring_enabled, disabled| Device {
        id: Uuid::now_v7(),
        tenant_id: facility.tenant,
        unit_id: Some(unit),
        name: "radar".to_string(),
        kind: DeviceKind::Radar,
        bound_bed_id,
        bound_room_id: None,
        monitoring_enabled,
        disabled,
    };
    facility.store.add_device(device(Some(bed), false, false));
    facility.store.add_device(device(None, true, true));

    let cards = facility.engine().derive_cards(facility.tenant, unit).await.unwrap();
    assert!(cards.is_empty());

    let live = facility.device(unit, DeviceKind::Radar, Some(bed));
    let cards = facility.engine().derive_cards(facility.tenant, unit).await.unwrap();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].device_ids(), vec![live]);
}

#[tokio::test]
async fn test_rederivation_keeps_card_ids() {
    let facility = Facility::new();
    let unit = facility.unit("E203", false, false);
    let bed = facility.bed(unit);
    facility.device(unit, DeviceKind::Radar, Some(bed));
    facility.device(unit, DeviceKind::Radar, None);
    let engine = facility.engine();

    let first = engine.derive_cards(facility.tenant, unit).await.unwrap();
    let second = engine.derive_cards(facility.tenant, unit).await.unwrap();

    assert_eq!(first.len(), 1);
    assert_eq!(first, second);
    assert_eq!(facility.store.unit_cards(unit), second);

    // A second bed splits the unit into bed cards plus a Location card; the first bed's
    // card keeps its id.
    let other_bed = facility.bed(unit);
    facility.device(unit, DeviceKind::SleepPad, Some(other_bed));
    let third = engine.derive_cards(facility.tenant, unit).await.unwrap();

    assert_eq!(third.len(), 3);
    let bed_card = third.iter().find(|c| c.bed_id == Some(bed)).unwrap();
    assert_eq!(bed_card.id, first[0].id);
    let ids: std::collections::HashSet<Uuid> = third.iter().map(|c| c.id).collect();
    assert_eq!(ids.len(), 3);
}

#[tokio::test]
async fn test_rederivation_keeps_alarm_counters_and_thresholds() {
    let facility = Facility::new();
    let unit = facility.unit("E203", false, false);
    let bed = facility.bed(unit);
    facility.device(unit, DeviceKind::Radar, Some(bed));
    let engine = facility.engine();

    let mut cards = engine.derive_cards(facility.tenant, unit).await.unwrap();
    assert_eq!(cards[0].alarm_counters, AlarmCounters::default());
    cards[0].alarm_counters = AlarmCounters {
        critical: 2,
        warning: 1,
        ..AlarmCounters::default()
    };
    cards[0].icon_alarm_level = 1;
    facility
        .store
        .replace_unit_cards(facility.tenant, unit, &cards)
        .await
        .unwrap();

    let rederived = engine.derive_cards(facility.tenant, unit).await.unwrap();

    assert_eq!(rederived[0].id, cards[0].id);
    assert_eq!(rederived[0].alarm_counters, cards[0].alarm_counters);
    assert_eq!(rederived[0].icon_alarm_level, 1);
    assert_eq!(rederived[0].pop_alarm_level, 2);
}

#[tokio::test]
async fn test_missing_unit_is_not_found() {
    let facility = Facility::new();
    let err = facility
        .engine()
        .derive_cards(facility.tenant, Uuid::now_v7())
        .await
        .unwrap_err();
    assert!(matches!(err, TopologyError::UnitNotFound { .. }));
}

#[tokio::test]
async fn test_read_failure_keeps_previous_cards() {
    let facility = Facility::new();
    let unit = facility.unit("E203", false, false);
    let bed = facility.bed(unit);
    facility.device(unit, DeviceKind::Radar, Some(bed));
    let engine = facility.engine();
    let previous = engine.derive_cards(facility.tenant, unit).await.unwrap();
    let writes = facility.store.replace_calls();

    facility.store.fail_reads_for_unit(unit);
    let err = engine.derive_cards(facility.tenant, unit).await.unwrap_err();

    assert!(matches!(err, TopologyError::Store(_)));
    assert_eq!(facility.store.replace_calls(), writes);
    assert_eq!(facility.store.unit_cards(unit), previous);
}

#[tokio::test]
async fn test_write_failure_keeps_previous_cards() {
    let facility = Facility::new();
    let unit = facility.unit("E203", false, false);
    facility.device(unit, DeviceKind::Radar, None);
    let engine = facility.engine();
    let previous = engine.derive_cards(facility.tenant, unit).await.unwrap();

    facility.store.fail_writes(true);
    assert!(engine.derive_cards(facility.tenant, unit).await.is_err());
    assert_eq!(facility.store.unit_cards(unit), previous);
}

#[tokio::test]
async fn test_tenant_derivation_isolates_failing_units() {
    let facility = Facility::new();
    let good = facility.unit("E201", false, false);
    facility.device(good, DeviceKind::Radar, None);
    let bad = facility.unit("E202", false, false);
    facility.device(bad, DeviceKind::Radar, None);
    let also_good = facility.unit("E203", false, false);
    facility.store.fail_reads_for_unit(bad);

    let report = facility
        .engine()
        .derive_tenant(facility.tenant)
        .await
        .unwrap();

    assert_eq!(
        report,
        BatchReport {
            succeeded: 2,
            failed: 1
        }
    );
    assert_eq!(facility.store.unit_cards(good).len(), 1);
    assert!(facility.store.unit_cards(also_good).is_empty());
}
