use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{Bed, Card, Device, Resident, TelemetrySample, Unit};

mod postgres;

pub use postgres::{PgTelemetryStore, PgTopologyStore};

pub type StoreResult<T> = Result<T, StoreError>;

/// Read/write access to the facility topology and the derived `cards` table.
///
/// Lookups return `Ok(None)` when the row is absent; callers decide whether that is an error.
#[async_trait]
pub trait TopologyStore: Send + Sync {
    async fn list_tenants(&self) -> StoreResult<Vec<Uuid>>;

    async fn get_unit(&self, tenant_id: Uuid, unit_id: Uuid) -> StoreResult<Option<Unit>>;
    async fn list_units(&self, tenant_id: Uuid) -> StoreResult<Vec<Unit>>;
    async fn list_beds(&self, tenant_id: Uuid, unit_id: Uuid) -> StoreResult<Vec<Bed>>;
    async fn list_unit_devices(&self, tenant_id: Uuid, unit_id: Uuid) -> StoreResult<Vec<Device>>;
    /// Residents of a unit, oldest first. The first entry is the unit's fallback resident.
    async fn list_unit_residents(&self, tenant_id: Uuid, unit_id: Uuid)
        -> StoreResult<Vec<Resident>>;

    /// Delete every card of the unit and insert `cards` in its place, atomically.
    async fn replace_unit_cards(
        &self,
        tenant_id: Uuid,
        unit_id: Uuid,
        cards: &[Card],
    ) -> StoreResult<()>;

    async fn get_card(&self, tenant_id: Uuid, card_id: Uuid) -> StoreResult<Option<Card>>;
    async fn list_cards(&self, tenant_id: Uuid) -> StoreResult<Vec<Card>>;
    async fn list_unit_cards(&self, tenant_id: Uuid, unit_id: Uuid) -> StoreResult<Vec<Card>>;

    async fn get_device(&self, tenant_id: Uuid, device_id: Uuid) -> StoreResult<Option<Device>>;
    async fn find_bed_card(&self, tenant_id: Uuid, bed_id: Uuid) -> StoreResult<Option<Card>>;
    async fn find_room_unit(&self, tenant_id: Uuid, room_id: Uuid) -> StoreResult<Option<Uuid>>;
    async fn find_location_card(&self, tenant_id: Uuid, unit_id: Uuid)
        -> StoreResult<Option<Card>>;
}

/// Read access to the append-only vital-sign samples.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// The single most recent sample of each device. Devices without samples are omitted.
    async fn latest_samples(&self, device_ids: &[Uuid]) -> StoreResult<Vec<TelemetrySample>>;
}
