use std::sync::Arc;

use card_common::metrics::{inc, timing_guard};
use card_common::store::TopologyStore;
use card_common::types::{
    AlarmCounters, Bed, Card, CardDevice, CardResident, CardType, Device, DeviceBinding, Resident,
    Unit,
};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::TopologyError;
use crate::metrics_consts::*;
use crate::BatchReport;

pub const UNKNOWN_RESIDENT: &str = "Unknown";
pub const MULTI_PERSON_UNBOUND: &str = "disable monitor";

/// Namespace for derived card ids.
const CARD_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6c1f_2a4e_93d7_4b0a_8e55_7f3c_2d91_b8a6);

/// Stable id of the card for `bed_id` in a unit, or of the unit's Location card.
///
/// Re-deriving a unit yields the same ids, so `card:{id}:*` cache entries survive the
/// delete-and-insert of its cards.
pub fn card_id(tenant_id: Uuid, unit_id: Uuid, bed_id: Option<Uuid>) -> Uuid {
    let mut name = Vec::with_capacity(48);
    name.extend_from_slice(tenant_id.as_bytes());
    name.extend_from_slice(unit_id.as_bytes());
    match bed_id {
        Some(bed_id) => name.extend_from_slice(bed_id.as_bytes()),
        None => name.extend_from_slice(b"location"),
    }
    Uuid::new_v5(&CARD_ID_NAMESPACE, &name)
}

/// Alarm display thresholds stamped on newly derived cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmThresholds {
    pub icon_alarm_level: i32,
    pub pop_alarm_level: i32,
}

impl Default for AlarmThresholds {
    fn default() -> Self {
        Self {
            icon_alarm_level: 3,
            pop_alarm_level: 2,
        }
    }
}

/// Everything a unit's derivation reads, loaded up front so the write phase cannot be
/// interrupted by a failed read.
#[derive(Debug, Clone)]
pub struct UnitTopology {
    pub unit: Unit,
    pub beds: Vec<Bed>,
    pub devices: Vec<Device>,
    /// Oldest first.
    pub residents: Vec<Resident>,
    /// Cards currently stored for the unit.
    pub previous: Vec<Card>,
}

/// Derives the cards of each unit from its beds, devices and residents, and persists them.
pub struct TopologyEngine {
    store: Arc<dyn TopologyStore>,
    thresholds: AlarmThresholds,
}

impl TopologyEngine {
    pub fn new(store: Arc<dyn TopologyStore>, thresholds: AlarmThresholds) -> Self {
        Self { store, thresholds }
    }

    /// Recompute and replace every card of one unit.
    ///
    /// The unit's previous cards stay in place unless the whole derivation succeeds.
    #[instrument(skip_all, fields(tenant_id = %tenant_id, unit_id = %unit_id))]
    pub async fn derive_cards(
        &self,
        tenant_id: Uuid,
        unit_id: Uuid,
    ) -> Result<Vec<Card>, TopologyError> {
        let labels = [("tenant_id".to_string(), tenant_id.to_string())];
        let _time = timing_guard(DERIVE_TIME, &labels);
        inc(DERIVE_RUNS, &labels, 1);

        let result = self.derive_inner(tenant_id, unit_id).await;
        match &result {
            Ok(cards) => inc(CARDS_WRITTEN, &labels, cards.len() as u64),
            Err(e) => {
                let labels = [
                    ("tenant_id".to_string(), tenant_id.to_string()),
                    ("kind".to_string(), e.kind().as_str().to_string()),
                ];
                inc(DERIVE_FAILURES, &labels, 1);
            }
        }
        result
    }

    async fn derive_inner(&self, tenant_id: Uuid, unit_id: Uuid) -> Result<Vec<Card>, TopologyError> {
        let topology = self.load_unit(tenant_id, unit_id).await?;
        let cards = plan_cards(&topology, self.thresholds);

        self.store
            .replace_unit_cards(tenant_id, unit_id, &cards)
            .await?;

        info!(cards = cards.len(), "derived unit cards");
        Ok(cards)
    }

    pub async fn load_unit(
        &self,
        tenant_id: Uuid,
        unit_id: Uuid,
    ) -> Result<UnitTopology, TopologyError> {
        let unit = self
            .store
            .get_unit(tenant_id, unit_id)
            .await?
            .ok_or(TopologyError::UnitNotFound { tenant_id, unit_id })?;
        let beds = self.store.list_beds(tenant_id, unit_id).await?;
        let devices = self.store.list_unit_devices(tenant_id, unit_id).await?;
        let residents = self.store.list_unit_residents(tenant_id, unit_id).await?;
        let previous = self.store.list_unit_cards(tenant_id, unit_id).await?;

        Ok(UnitTopology {
            unit,
            beds,
            devices,
            residents,
            previous,
        })
    }

    /// Derive every unit of a tenant. A failing unit is logged and counted, never fatal.
    #[instrument(skip_all, fields(tenant_id = %tenant_id))]
    pub async fn derive_tenant(&self, tenant_id: Uuid) -> Result<BatchReport, TopologyError> {
        let units = self.store.list_units(tenant_id).await?;

        let mut report = BatchReport::default();
        for unit in units {
            match self.derive_cards(tenant_id, unit.id).await {
                Ok(_) => report.succeeded += 1,
                Err(e) => {
                    error!(unit_id = %unit.id, kind = e.kind().as_str(), "failed to derive unit cards: {}", e);
                    report.failed += 1;
                }
            }
        }

        if report.failed > 0 {
            warn!(
                succeeded = report.succeeded,
                failed = report.failed,
                "tenant derivation finished with failures"
            );
        }
        Ok(report)
    }
}

/// Address segments that are empty or `-` are dropped; the unit name always stays.
pub fn format_address(unit: &Unit) -> String {
    let keep = |segment: &Option<String>| {
        segment
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != "-")
            .map(str::to_owned)
    };

    [keep(&unit.branch), keep(&unit.building), Some(unit.name.clone())]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("-")
}

/// Pure card derivation for one unit.
///
/// A card that replaces one with the same id keeps its alarm counters and thresholds.
pub fn plan_cards(topology: &UnitTopology, thresholds: AlarmThresholds) -> Vec<Card> {
    let unit = &topology.unit;
    let monitoring: Vec<&Device> = topology
        .devices
        .iter()
        .filter(|d| d.is_monitoring())
        .collect();

    let active_beds: Vec<(&Bed, Vec<&Device>)> = topology
        .beds
        .iter()
        .filter_map(|bed| {
            let devices: Vec<&Device> = monitoring
                .iter()
                .copied()
                .filter(|d| d.binding() == DeviceBinding::Bed(bed.id))
                .collect();
            (!devices.is_empty()).then_some((bed, devices))
        })
        .collect();

    let unbound: Vec<&Device> = monitoring
        .iter()
        .copied()
        .filter(|d| !matches!(d.binding(), DeviceBinding::Bed(_)))
        .collect();

    let address = format_address(unit);
    let new_card = |card_type: CardType, bed_id: Option<Uuid>| {
        let id = card_id(unit.tenant_id, unit.id, bed_id);
        let mut card = Card {
            id,
            tenant_id: unit.tenant_id,
            card_type,
            bed_id,
            unit_id: unit.id,
            name: String::new(),
            address: address.clone(),
            primary_resident_id: None,
            devices: Vec::new(),
            residents: Vec::new(),
            alarm_counters: AlarmCounters::default(),
            icon_alarm_level: thresholds.icon_alarm_level,
            pop_alarm_level: thresholds.pop_alarm_level,
        };
        if let Some(previous) = topology.previous.iter().find(|c| c.id == id) {
            card.alarm_counters = previous.alarm_counters;
            card.icon_alarm_level = previous.icon_alarm_level;
            card.pop_alarm_level = previous.pop_alarm_level;
        }
        card
    };

    let bed_card = |bed: &Bed, devices: Vec<&Device>| {
        let mut card = new_card(CardType::ActiveBed, Some(bed.id));
        card.devices = devices.into_iter().map(CardDevice::from).collect();

        let bound = topology.residents.iter().find(|r| r.bed_id == Some(bed.id));
        match (bound, topology.residents.first()) {
            (Some(resident), _) => {
                card.name = resident.nickname.clone();
                card.primary_resident_id = Some(resident.id);
                card.residents = vec![CardResident::from(resident)];
            }
            (None, _) if unit.is_multi_person_room => {
                card.name = MULTI_PERSON_UNBOUND.to_string();
            }
            (None, Some(fallback)) => {
                card.name = fallback.nickname.clone();
                card.primary_resident_id = Some(fallback.id);
                card.residents = vec![CardResident::from(fallback)];
            }
            (None, None) => card.name = UNKNOWN_RESIDENT.to_string(),
        }
        card
    };

    let location_card = |devices: &[&Device]| {
        let mut card = new_card(CardType::Location, None);
        card.name = if unit.is_public_space || unit.is_multi_person_room {
            unit.name.clone()
        } else {
            topology
                .residents
                .first()
                .map_or_else(|| unit.name.clone(), |r| r.nickname.clone())
        };
        card.devices = devices.iter().copied().map(CardDevice::from).collect();
        card.residents = topology.residents.iter().map(CardResident::from).collect();
        card
    };

    match active_beds.len() {
        0 if unbound.is_empty() => Vec::new(),
        0 => vec![location_card(&unbound)],
        1 => active_beds
            .into_iter()
            .map(|(bed, mut devices)| {
                devices.extend(unbound.iter().copied());
                bed_card(bed, devices)
            })
            .collect(),
        _ => {
            let mut cards: Vec<Card> = active_beds
                .into_iter()
                .map(|(bed, devices)| bed_card(bed, devices))
                .collect();
            if !unbound.is_empty() {
                cards.push(location_card(&unbound));
            }
            cards
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(branch: Option<&str>, building: Option<&str>, name: &str) -> Unit {
        Unit {
            id: Uuid::now_v7(),
            tenant_id: Uuid::now_v7(),
            name: name.to_string(),
            branch: branch.map(str::to_string),
            building: building.map(str::to_string),
            is_public_space: false,
            is_multi_person_room: false,
            unit_type: None,
        }
    }

    #[test]
    fn test_address_skips_placeholder_segments() {
        assert_eq!(
            format_address(&unit(Some("BranchA"), Some("-"), "E203")),
            "BranchA-E203"
        );
        assert_eq!(
            format_address(&unit(Some("BranchA"), Some("North"), "E203")),
            "BranchA-North-E203"
        );
        assert_eq!(format_address(&unit(None, Some(""), "E203")), "E203");
    }

    #[test]
    fn test_address_keeps_unit_name_even_if_placeholder() {
        assert_eq!(format_address(&unit(Some("BranchA"), None, "-")), "BranchA--");
    }

    #[test]
    fn test_empty_unit_plans_nothing() {
        let topology = UnitTopology {
            unit: unit(None, None, "E203"),
            beds: vec![],
            devices: vec![],
            residents: vec![],
            previous: vec![],
        };
        assert!(plan_cards(&topology, AlarmThresholds::default()).is_empty());
    }

    #[test]
    fn test_card_ids_are_stable_and_distinct() {
        let (tenant, unit, bed) = (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7());

        assert_eq!(card_id(tenant, unit, Some(bed)), card_id(tenant, unit, Some(bed)));
        assert_eq!(card_id(tenant, unit, None), card_id(tenant, unit, None));
        assert_ne!(card_id(tenant, unit, Some(bed)), card_id(tenant, unit, None));
        assert_ne!(card_id(tenant, unit, None), card_id(Uuid::now_v7(), unit, None));
    }
}
