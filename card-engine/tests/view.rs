use std::sync::Arc;
use std::time::Duration;

use assert_json_diff::assert_json_include;
use card_common::cache::{alarms_key, realtime_key, view_key, CacheError, CardCache, MockCacheClient};
use card_common::memory::MemoryTopologyStore;
use card_common::types::{AlarmCounters, Card, CardType, DeviceKind, RealtimeView, SourcedValue};
use card_engine::error::ViewError;
use card_engine::view::{CardView, ViewAssembler};
use card_engine::BatchReport;
use chrono::{TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;

fn card(tenant_id: Uuid, counters: AlarmCounters) -> Card {
    Card {
        id: Uuid::now_v7(),
        tenant_id,
        card_type: CardType::ActiveBed,
        bed_id: Some(Uuid::now_v7()),
        unit_id: Uuid::now_v7(),
        name: "Ada".to_string(),
        address: "BranchA-E203".to_string(),
        primary_resident_id: None,
        devices: vec![],
        residents: vec![],
        alarm_counters: counters,
        icon_alarm_level: 3,
        pop_alarm_level: 2,
    }
}

fn assembler(store: &MemoryTopologyStore, client: &MockCacheClient) -> ViewAssembler {
    let cache = CardCache::new(
        Arc::new(client.clone()),
        Duration::from_secs(60),
        Duration::from_secs(600),
    );
    ViewAssembler::new(Arc::new(store.clone()), cache)
}

fn realtime() -> RealtimeView {
    let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    RealtimeView {
        heart: Some(SourcedValue {
            value: 72,
            source: DeviceKind::Sleepace,
            timestamp: ts,
        }),
        breath: None,
        bed_status: Some(SourcedValue {
            value: "in_bed".to_string(),
            source: DeviceKind::Sleepace,
            timestamp: ts,
        }),
        sleep_stage: Some(SourcedValue {
            value: "deep".to_string(),
            source: DeviceKind::Sleepace,
            timestamp: ts,
        }),
        person_count: 0,
        postures: vec![],
        timestamp: ts,
        stale: false,
    }
}

#[tokio::test]
async fn test_missing_realtime_entry_serves_database_fields() {
    let store = MemoryTopologyStore::new();
    let tenant = Uuid::now_v7();
    let card = card(tenant, AlarmCounters::default());
    store.add_card(card.clone());
    let client = MockCacheClient::new();

    let view = assembler(&store, &client)
        .get_card_view(tenant, card.id)
        .await
        .unwrap();

    assert_eq!(view.name, "Ada");
    assert_eq!(view.address, "BranchA-E203");
    assert_eq!(view.heart_rate, None);
    assert_eq!(view.person_count, None);
    assert_eq!(view.total_unhandled_alarms, None);
    assert!(view.alarms.is_empty());
}

#[tokio::test]
async fn test_cache_errors_degrade_instead_of_failing() {
    let store = MemoryTopologyStore::new();
    let tenant = Uuid::now_v7();
    let card = card(tenant, AlarmCounters::default());
    store.add_card(card.clone());
    let client = MockCacheClient::new()
        .get_err(&realtime_key(card.id), CacheError::Timeout)
        .insert(&alarms_key(card.id), "{broken");

    let view = assembler(&store, &client)
        .get_card_view(tenant, card.id)
        .await
        .unwrap();

    assert_eq!(view.heart_rate, None);
    assert!(view.alarms.is_empty());
}

#[tokio::test]
async fn test_full_view_merges_realtime_and_alarms() {
    let store = MemoryTopologyStore::new();
    let tenant = Uuid::now_v7();
    let card = card(
        tenant,
        AlarmCounters {
            critical: 1,
            alert: 0,
            error: 0,
            warning: 2,
            notice: 0,
        },
    );
    store.add_card(card.clone());
    let client = MockCacheClient::new()
        .insert(
            &realtime_key(card.id),
            &serde_json::to_string(&realtime()).unwrap(),
        )
        .insert(
            &alarms_key(card.id),
            &json!([{
                "id": "alarm-1",
                "type": "LeftBed",
                "category": "safety",
                "level": "critical",
                "status": "active",
                "triggered_at": "2024-05-01T10:00:00Z",
                "trigger_data": {"duration_secs": 900}
            }])
            .to_string(),
        );

    let view = assembler(&store, &client)
        .get_card_view(tenant, card.id)
        .await
        .unwrap();

    assert_json_include!(
        actual: serde_json::to_value(&view).unwrap(),
        expected: json!({
            "name": "Ada",
            "total_unhandled_alarms": 3,
            "heart_rate": {"value": 72, "source": "Sleepace"},
            "bed_status": {"value": 0, "source": "Sleepace"},
            "sleep_stage": {"value": 4, "source": "Sleepace"},
            "person_count": 0,
            "realtime_stale": false,
            "alarms": [{"id": "alarm-1", "type": "LeftBed"}]
        })
    );
    assert!(serde_json::to_value(&view)
        .unwrap()
        .get("respiratory_rate")
        .is_none());
}

#[tokio::test]
async fn test_missing_card_is_not_found() {
    let store = MemoryTopologyStore::new();
    let client = MockCacheClient::new();

    let err = assembler(&store, &client)
        .get_card_view(Uuid::now_v7(), Uuid::now_v7())
        .await
        .unwrap_err();

    assert!(matches!(err, ViewError::CardNotFound(_)));
}

#[tokio::test]
async fn test_refresh_publishes_every_view_and_counts_failures() {
    let store = MemoryTopologyStore::new();
    let tenant = Uuid::now_v7();
    let ok = card(tenant, AlarmCounters::default());
    let failing = card(tenant, AlarmCounters::default());
    let other_tenant = card(Uuid::now_v7(), AlarmCounters::default());
    store.add_card(ok.clone());
    store.add_card(failing.clone());
    store.add_card(other_tenant.clone());
    let client = MockCacheClient::new().set_err(&view_key(failing.id), CacheError::Timeout);

    let report = assembler(&store, &client)
        .refresh_tenant_views(tenant)
        .await
        .unwrap();

    assert_eq!(
        report,
        BatchReport {
            succeeded: 1,
            failed: 1
        }
    );
    let cached: CardView =
        serde_json::from_str(&client.value(&view_key(ok.id)).unwrap()).unwrap();
    assert_eq!(cached.card_id, ok.id);
    assert_eq!(client.value(&view_key(other_tenant.id)), None);

    let ttl = client
        .get_calls()
        .into_iter()
        .find(|c| c.op == "set_ex" && c.key == view_key(ok.id))
        .and_then(|c| c.ttl_seconds);
    assert_eq!(ttl, Some(600));
}
