use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::{StoreResult, TelemetryStore, TopologyStore};
use crate::error::StoreError;
use crate::types::{
    AlarmCounters, Bed, Card, CardDevice, CardResident, CardType, Device, DeviceKind, Resident,
    TelemetrySample, Unit, VersionedList, SNAPSHOT_VERSION,
};

const CARD_COLUMNS: &str = r#"
    id, tenant_id, card_type, bed_id, unit_id, card_name, card_address, primary_resident_id,
    devices, residents,
    unhandled_alarm_critical, unhandled_alarm_alert, unhandled_alarm_error,
    unhandled_alarm_warning, unhandled_alarm_notice,
    icon_alarm_level, pop_alarm_level
"#;

const DEVICE_COLUMNS: &str = r#"
    id, tenant_id, unit_id, device_name, device_type, bound_bed_id, bound_room_id,
    monitoring_enabled, disabled
"#;

#[derive(sqlx::FromRow)]
struct UnitRow {
    id: Uuid,
    tenant_id: Uuid,
    unit_name: String,
    branch: Option<String>,
    building: Option<String>,
    is_public_space: bool,
    is_multi_person_room: bool,
    unit_type: Option<String>,
}

impl From<UnitRow> for Unit {
    fn from(row: UnitRow) -> Self {
        Unit {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.unit_name,
            branch: row.branch,
            building: row.building,
            is_public_space: row.is_public_space,
            is_multi_person_room: row.is_multi_person_room,
            unit_type: row.unit_type,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BedRow {
    id: Uuid,
    tenant_id: Uuid,
    unit_id: Uuid,
    room_id: Option<Uuid>,
}

impl From<BedRow> for Bed {
    fn from(row: BedRow) -> Self {
        Bed {
            id: row.id,
            tenant_id: row.tenant_id,
            unit_id: row.unit_id,
            room_id: row.room_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DeviceRow {
    id: Uuid,
    tenant_id: Uuid,
    unit_id: Option<Uuid>,
    device_name: String,
    device_type: String,
    bound_bed_id: Option<Uuid>,
    bound_room_id: Option<Uuid>,
    monitoring_enabled: bool,
    disabled: bool,
}

impl From<DeviceRow> for Device {
    fn from(row: DeviceRow) -> Self {
        Device {
            id: row.id,
            tenant_id: row.tenant_id,
            unit_id: row.unit_id,
            name: row.device_name,
            kind: DeviceKind::from(row.device_type),
            bound_bed_id: row.bound_bed_id,
            bound_room_id: row.bound_room_id,
            monitoring_enabled: row.monitoring_enabled,
            disabled: row.disabled,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ResidentRow {
    id: Uuid,
    tenant_id: Uuid,
    nickname: String,
    unit_id: Option<Uuid>,
    bed_id: Option<Uuid>,
}

impl From<ResidentRow> for Resident {
    fn from(row: ResidentRow) -> Self {
        Resident {
            id: row.id,
            tenant_id: row.tenant_id,
            nickname: row.nickname,
            unit_id: row.unit_id,
            bed_id: row.bed_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CardRow {
    id: Uuid,
    tenant_id: Uuid,
    card_type: String,
    bed_id: Option<Uuid>,
    unit_id: Uuid,
    card_name: String,
    card_address: String,
    primary_resident_id: Option<Uuid>,
    devices: Option<Json<VersionedList<CardDevice>>>,
    residents: Option<Json<VersionedList<CardResident>>>,
    unhandled_alarm_critical: i32,
    unhandled_alarm_alert: i32,
    unhandled_alarm_error: i32,
    unhandled_alarm_warning: i32,
    unhandled_alarm_notice: i32,
    icon_alarm_level: i32,
    pop_alarm_level: i32,
}

impl CardRow {
    fn into_card(self, operation: &'static str) -> StoreResult<Card> {
        let card_type = self
            .card_type
            .parse::<CardType>()
            .map_err(|e| StoreError::DecodeError {
                operation,
                reason: e.to_string(),
            })?;

        let devices = self
            .devices
            .map(|d| d.0)
            .map(|list| check_version(operation, list))
            .transpose()?;
        let residents = self
            .residents
            .map(|r| r.0)
            .map(|list| check_version(operation, list))
            .transpose()?;

        Ok(Card {
            id: self.id,
            tenant_id: self.tenant_id,
            card_type,
            bed_id: self.bed_id,
            unit_id: self.unit_id,
            name: self.card_name,
            address: self.card_address,
            primary_resident_id: self.primary_resident_id,
            devices: devices.unwrap_or_default(),
            residents: residents.unwrap_or_default(),
            alarm_counters: AlarmCounters {
                critical: self.unhandled_alarm_critical,
                alert: self.unhandled_alarm_alert,
                error: self.unhandled_alarm_error,
                warning: self.unhandled_alarm_warning,
                notice: self.unhandled_alarm_notice,
            },
            icon_alarm_level: self.icon_alarm_level,
            pop_alarm_level: self.pop_alarm_level,
        })
    }
}

/// Blobs written by a newer release are rejected rather than misread.
fn check_version<T>(operation: &'static str, list: VersionedList<T>) -> StoreResult<Vec<T>> {
    if list.version > SNAPSHOT_VERSION {
        return Err(StoreError::DecodeError {
            operation,
            reason: format!("unsupported snapshot version {}", list.version),
        });
    }
    Ok(list.items)
}

#[derive(sqlx::FromRow)]
struct SampleRow {
    device_id: Uuid,
    ts: DateTime<Utc>,
    heart_rate: Option<i32>,
    respiratory_rate: Option<i32>,
    posture_code: Option<String>,
    posture_display: Option<String>,
    tracking_id: Option<String>,
    bed_status_code: Option<String>,
    sleep_state_code: Option<String>,
}

impl From<SampleRow> for TelemetrySample {
    fn from(row: SampleRow) -> Self {
        TelemetrySample {
            device_id: row.device_id,
            timestamp: row.ts,
            heart_rate: row.heart_rate,
            respiratory_rate: row.respiratory_rate,
            posture_code: row.posture_code,
            posture_display: row.posture_display,
            tracking_id: row.tracking_id,
            bed_status_code: row.bed_status_code,
            sleep_state_code: row.sleep_state_code,
        }
    }
}

/// Topology store backed by the relational tables of the care facility.
#[derive(Clone)]
pub struct PgTopologyStore {
    pool: PgPool,
}

impl PgTopologyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_optional_card(
        &self,
        operation: &'static str,
        filter: &str,
        tenant_id: Uuid,
        key: Uuid,
    ) -> StoreResult<Option<Card>> {
        let query = format!("SELECT {CARD_COLUMNS} FROM cards WHERE tenant_id = $1 AND {filter} LIMIT 1");

        let row: Option<CardRow> = sqlx::query_as(&query)
            .bind(tenant_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| StoreError::query(operation, error))?;

        row.map(|row| row.into_card(operation)).transpose()
    }
}

#[async_trait]
impl TopologyStore for PgTopologyStore {
    async fn list_tenants(&self) -> StoreResult<Vec<Uuid>> {
        sqlx::query_scalar::<_, Uuid>("SELECT DISTINCT tenant_id FROM units ORDER BY tenant_id")
            .fetch_all(&self.pool)
            .await
            .map_err(|error| StoreError::query("list_tenants", error))
    }

    async fn get_unit(&self, tenant_id: Uuid, unit_id: Uuid) -> StoreResult<Option<Unit>> {
        let row: Option<UnitRow> = sqlx::query_as(
            r#"
SELECT id, tenant_id, unit_name, branch, building, is_public_space, is_multi_person_room, unit_type
FROM units
WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(unit_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| StoreError::query("get_unit", error))?;

        Ok(row.map(Unit::from))
    }

    async fn list_units(&self, tenant_id: Uuid) -> StoreResult<Vec<Unit>> {
        let rows: Vec<UnitRow> = sqlx::query_as(
            r#"
SELECT id, tenant_id, unit_name, branch, building, is_public_space, is_multi_person_room, unit_type
FROM units
WHERE tenant_id = $1
ORDER BY unit_name, id
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| StoreError::query("list_units", error))?;

        Ok(rows.into_iter().map(Unit::from).collect())
    }

    async fn list_beds(&self, tenant_id: Uuid, unit_id: Uuid) -> StoreResult<Vec<Bed>> {
        let rows: Vec<BedRow> = sqlx::query_as(
            r#"
SELECT id, tenant_id, unit_id, room_id
FROM beds
WHERE tenant_id = $1 AND unit_id = $2
ORDER BY id
            "#,
        )
        .bind(tenant_id)
        .bind(unit_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| StoreError::query("list_beds", error))?;

        Ok(rows.into_iter().map(Bed::from).collect())
    }

    async fn list_unit_devices(&self, tenant_id: Uuid, unit_id: Uuid) -> StoreResult<Vec<Device>> {
        let query = format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE tenant_id = $1 AND unit_id = $2 ORDER BY device_name, id"
        );

        let rows: Vec<DeviceRow> = sqlx::query_as(&query)
            .bind(tenant_id)
            .bind(unit_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| StoreError::query("list_unit_devices", error))?;

        Ok(rows.into_iter().map(Device::from).collect())
    }

    async fn list_unit_residents(
        &self,
        tenant_id: Uuid,
        unit_id: Uuid,
    ) -> StoreResult<Vec<Resident>> {
        let rows: Vec<ResidentRow> = sqlx::query_as(
            r#"
SELECT id, tenant_id, nickname, unit_id, bed_id
FROM residents
WHERE tenant_id = $1 AND unit_id = $2
ORDER BY created_at, id
            "#,
        )
        .bind(tenant_id)
        .bind(unit_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| StoreError::query("list_unit_residents", error))?;

        Ok(rows.into_iter().map(Resident::from).collect())
    }

    async fn replace_unit_cards(
        &self,
        tenant_id: Uuid,
        unit_id: Uuid,
        cards: &[Card],
    ) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|error| StoreError::query("BEGIN", error))?;

        sqlx::query("DELETE FROM cards WHERE tenant_id = $1 AND unit_id = $2")
            .bind(tenant_id)
            .bind(unit_id)
            .execute(&mut *tx)
            .await
            .map_err(|error| StoreError::query("DELETE cards", error))?;

        for card in cards {
            sqlx::query(
                r#"
INSERT INTO cards
    (id, tenant_id, card_type, bed_id, unit_id, card_name, card_address, primary_resident_id,
     devices, residents,
     unhandled_alarm_critical, unhandled_alarm_alert, unhandled_alarm_error,
     unhandled_alarm_warning, unhandled_alarm_notice,
     icon_alarm_level, pop_alarm_level, created_at)
VALUES
    ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, NOW())
                "#,
            )
            .bind(card.id)
            .bind(card.tenant_id)
            .bind(card.card_type.as_str())
            .bind(card.bed_id)
            .bind(card.unit_id)
            .bind(&card.name)
            .bind(&card.address)
            .bind(card.primary_resident_id)
            .bind(Json(VersionedList::new(card.devices.clone())))
            .bind(Json(VersionedList::new(card.residents.clone())))
            .bind(card.alarm_counters.critical)
            .bind(card.alarm_counters.alert)
            .bind(card.alarm_counters.error)
            .bind(card.alarm_counters.warning)
            .bind(card.alarm_counters.notice)
            .bind(card.icon_alarm_level)
            .bind(card.pop_alarm_level)
            .execute(&mut *tx)
            .await
            .map_err(|error| StoreError::query("INSERT cards", error))?;
        }

        tx.commit()
            .await
            .map_err(|error| StoreError::query("COMMIT", error))
    }

    async fn get_card(&self, tenant_id: Uuid, card_id: Uuid) -> StoreResult<Option<Card>> {
        self.fetch_optional_card("get_card", "id = $2", tenant_id, card_id)
            .await
    }

    async fn list_cards(&self, tenant_id: Uuid) -> StoreResult<Vec<Card>> {
        let query = format!("SELECT {CARD_COLUMNS} FROM cards WHERE tenant_id = $1 ORDER BY unit_id, card_name");

        let rows: Vec<CardRow> = sqlx::query_as(&query)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| StoreError::query("list_cards", error))?;

        rows.into_iter()
            .map(|row| row.into_card("list_cards"))
            .collect()
    }

    async fn list_unit_cards(&self, tenant_id: Uuid, unit_id: Uuid) -> StoreResult<Vec<Card>> {
        let query = format!(
            "SELECT {CARD_COLUMNS} FROM cards WHERE tenant_id = $1 AND unit_id = $2 ORDER BY card_name"
        );

        let rows: Vec<CardRow> = sqlx::query_as(&query)
            .bind(tenant_id)
            .bind(unit_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| StoreError::query("list_unit_cards", error))?;

        rows.into_iter()
            .map(|row| row.into_card("list_unit_cards"))
            .collect()
    }

    async fn get_device(&self, tenant_id: Uuid, device_id: Uuid) -> StoreResult<Option<Device>> {
        let query = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE tenant_id = $1 AND id = $2");

        let row: Option<DeviceRow> = sqlx::query_as(&query)
            .bind(tenant_id)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| StoreError::query("get_device", error))?;

        Ok(row.map(Device::from))
    }

    async fn find_bed_card(&self, tenant_id: Uuid, bed_id: Uuid) -> StoreResult<Option<Card>> {
        self.fetch_optional_card(
            "find_bed_card",
            "bed_id = $2 AND card_type = 'ActiveBed'",
            tenant_id,
            bed_id,
        )
        .await
    }

    async fn find_room_unit(&self, tenant_id: Uuid, room_id: Uuid) -> StoreResult<Option<Uuid>> {
        sqlx::query_scalar::<_, Uuid>("SELECT unit_id FROM rooms WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| StoreError::query("find_room_unit", error))
    }

    async fn find_location_card(
        &self,
        tenant_id: Uuid,
        unit_id: Uuid,
    ) -> StoreResult<Option<Card>> {
        self.fetch_optional_card(
            "find_location_card",
            "unit_id = $2 AND card_type = 'Location'",
            tenant_id,
            unit_id,
        )
        .await
    }
}

/// Telemetry store reading the `telemetry_samples` hypertable.
#[derive(Clone)]
pub struct PgTelemetryStore {
    pool: PgPool,
}

impl PgTelemetryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TelemetryStore for PgTelemetryStore {
    async fn latest_samples(&self, device_ids: &[Uuid]) -> StoreResult<Vec<TelemetrySample>> {
        if device_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<SampleRow> = sqlx::query_as(
            r#"
SELECT DISTINCT ON (device_id)
    device_id, ts, heart_rate, respiratory_rate, posture_code, posture_display,
    tracking_id, bed_status_code, sleep_state_code
FROM telemetry_samples
WHERE device_id = ANY($1)
ORDER BY device_id, ts DESC
            "#,
        )
        .bind(device_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| StoreError::query("latest_samples", error))?;

        Ok(rows.into_iter().map(TelemetrySample::from).collect())
    }
}
