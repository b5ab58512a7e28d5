//! In-memory stores for tests and local runs.
//!
//! Both stores keep their state behind a `std::sync::Mutex` and can be told to fail reads or
//! writes, so the isolation and degradation paths of the engines can be exercised without a
//! database.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{StoreResult, TelemetryStore, TopologyStore};
use crate::types::{Bed, Card, CardType, Device, Resident, TelemetrySample, Unit};

#[derive(Default)]
struct TopologyState {
    units: Vec<Unit>,
    rooms: HashMap<Uuid, (Uuid, Uuid)>,
    beds: Vec<Bed>,
    devices: Vec<Device>,
    residents: Vec<Resident>,
    cards: Vec<Card>,
    failing_units: Vec<Uuid>,
    fail_writes: bool,
    replace_calls: usize,
}

#[derive(Clone, Default)]
pub struct MemoryTopologyStore {
    state: Arc<Mutex<TopologyState>>,
}

impl MemoryTopologyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TopologyState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn add_unit(&self, unit: Unit) {
        self.lock().units.push(unit);
    }

    pub fn add_room(&self, tenant_id: Uuid, room_id: Uuid, unit_id: Uuid) {
        self.lock().rooms.insert(room_id, (tenant_id, unit_id));
    }

    pub fn add_bed(&self, bed: Bed) {
        self.lock().beds.push(bed);
    }

    pub fn add_device(&self, device: Device) {
        self.lock().devices.push(device);
    }

    pub fn add_resident(&self, resident: Resident) {
        self.lock().residents.push(resident);
    }

    pub fn add_card(&self, card: Card) {
        self.lock().cards.push(card);
    }

    /// Make every read scoped to this unit fail, as if the database went away mid-derivation.
    pub fn fail_reads_for_unit(&self, unit_id: Uuid) {
        self.lock().failing_units.push(unit_id);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn cards(&self) -> Vec<Card> {
        self.lock().cards.clone()
    }

    pub fn unit_cards(&self, unit_id: Uuid) -> Vec<Card> {
        self.lock()
            .cards
            .iter()
            .filter(|c| c.unit_id == unit_id)
            .cloned()
            .collect()
    }

    pub fn replace_calls(&self) -> usize {
        self.lock().replace_calls
    }

    fn check_unit(state: &TopologyState, unit_id: Uuid) -> StoreResult<()> {
        if state.failing_units.contains(&unit_id) {
            return Err(StoreError::Unavailable(format!("unit {unit_id} is unreadable")));
        }
        Ok(())
    }
}

#[async_trait]
impl TopologyStore for MemoryTopologyStore {
    async fn list_tenants(&self) -> StoreResult<Vec<Uuid>> {
        let state = self.lock();
        let mut tenants: Vec<Uuid> = state.units.iter().map(|u| u.tenant_id).collect();
        tenants.sort();
        tenants.dedup();
        Ok(tenants)
    }

    async fn get_unit(&self, tenant_id: Uuid, unit_id: Uuid) -> StoreResult<Option<Unit>> {
        let state = self.lock();
        Self::check_unit(&state, unit_id)?;
        Ok(state
            .units
            .iter()
            .find(|u| u.tenant_id == tenant_id && u.id == unit_id)
            .cloned())
    }

    async fn list_units(&self, tenant_id: Uuid) -> StoreResult<Vec<Unit>> {
        Ok(self
            .lock()
            .units
            .iter()
            .filter(|u| u.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn list_beds(&self, tenant_id: Uuid, unit_id: Uuid) -> StoreResult<Vec<Bed>> {
        let state = self.lock();
        Self::check_unit(&state, unit_id)?;
        Ok(state
            .beds
            .iter()
            .filter(|b| b.tenant_id == tenant_id && b.unit_id == unit_id)
            .cloned()
            .collect())
    }

    async fn list_unit_devices(&self, tenant_id: Uuid, unit_id: Uuid) -> StoreResult<Vec<Device>> {
        let state = self.lock();
        Self::check_unit(&state, unit_id)?;
        Ok(state
            .devices
            .iter()
            .filter(|d| d.tenant_id == tenant_id && d.unit_id == Some(unit_id))
            .cloned()
            .collect())
    }

    async fn list_unit_residents(
        &self,
        tenant_id: Uuid,
        unit_id: Uuid,
    ) -> StoreResult<Vec<Resident>> {
        let state = self.lock();
        Self::check_unit(&state, unit_id)?;
        Ok(state
            .residents
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.unit_id == Some(unit_id))
            .cloned()
            .collect())
    }

    async fn replace_unit_cards(
        &self,
        tenant_id: Uuid,
        unit_id: Uuid,
        cards: &[Card],
    ) -> StoreResult<()> {
        let mut state = self.lock();
        state.replace_calls += 1;
        if state.fail_writes {
            return Err(StoreError::Unavailable("writes are disabled".to_string()));
        }
        state
            .cards
            .retain(|c| !(c.tenant_id == tenant_id && c.unit_id == unit_id));
        state.cards.extend_from_slice(cards);
        Ok(())
    }

    async fn get_card(&self, tenant_id: Uuid, card_id: Uuid) -> StoreResult<Option<Card>> {
        Ok(self
            .lock()
            .cards
            .iter()
            .find(|c| c.tenant_id == tenant_id && c.id == card_id)
            .cloned())
    }

    async fn list_cards(&self, tenant_id: Uuid) -> StoreResult<Vec<Card>> {
        Ok(self
            .lock()
            .cards
            .iter()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn list_unit_cards(&self, tenant_id: Uuid, unit_id: Uuid) -> StoreResult<Vec<Card>> {
        let state = self.lock();
        Self::check_unit(&state, unit_id)?;
        Ok(state
            .cards
            .iter()
            .filter(|c| c.tenant_id == tenant_id && c.unit_id == unit_id)
            .cloned()
            .collect())
    }

    async fn get_device(&self, tenant_id: Uuid, device_id: Uuid) -> StoreResult<Option<Device>> {
        Ok(self
            .lock()
            .devices
            .iter()
            .find(|d| d.tenant_id == tenant_id && d.id == device_id)
            .cloned())
    }

    async fn find_bed_card(&self, tenant_id: Uuid, bed_id: Uuid) -> StoreResult<Option<Card>> {
        Ok(self
            .lock()
            .cards
            .iter()
            .find(|c| {
                c.tenant_id == tenant_id
                    && c.card_type == CardType::ActiveBed
                    && c.bed_id == Some(bed_id)
            })
            .cloned())
    }

    async fn find_room_unit(&self, tenant_id: Uuid, room_id: Uuid) -> StoreResult<Option<Uuid>> {
        Ok(self
            .lock()
            .rooms
            .get(&room_id)
            .filter(|(tenant, _)| *tenant == tenant_id)
            .map(|(_, unit_id)| *unit_id))
    }

    async fn find_location_card(
        &self,
        tenant_id: Uuid,
        unit_id: Uuid,
    ) -> StoreResult<Option<Card>> {
        Ok(self
            .lock()
            .cards
            .iter()
            .find(|c| {
                c.tenant_id == tenant_id
                    && c.card_type == CardType::Location
                    && c.unit_id == unit_id
            })
            .cloned())
    }
}

#[derive(Default)]
struct TelemetryState {
    samples: Vec<TelemetrySample>,
    fail: bool,
    requested: Vec<Vec<Uuid>>,
}

#[derive(Clone, Default)]
pub struct MemoryTelemetryStore {
    state: Arc<Mutex<TelemetryState>>,
}

impl MemoryTelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TelemetryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn push(&self, sample: TelemetrySample) {
        self.lock().samples.push(sample);
    }

    pub fn fail(&self, fail: bool) {
        self.lock().fail = fail;
    }

    /// Device id batches passed to `latest_samples`, in call order.
    pub fn requested(&self) -> Vec<Vec<Uuid>> {
        self.lock().requested.clone()
    }
}

#[async_trait]
impl TelemetryStore for MemoryTelemetryStore {
    async fn latest_samples(&self, device_ids: &[Uuid]) -> StoreResult<Vec<TelemetrySample>> {
        let mut state = self.lock();
        state.requested.push(device_ids.to_vec());
        if state.fail {
            return Err(StoreError::Unavailable("telemetry store is down".to_string()));
        }

        let mut latest: HashMap<Uuid, &TelemetrySample> = HashMap::new();
        for sample in state
            .samples
            .iter()
            .filter(|s| device_ids.contains(&s.device_id))
        {
            match latest.get(&sample.device_id) {
                Some(current) if current.timestamp >= sample.timestamp => {}
                _ => {
                    latest.insert(sample.device_id, sample);
                }
            }
        }

        Ok(latest.into_values().cloned().collect())
    }
}
