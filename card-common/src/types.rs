use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Version stamped on the device/resident blobs stored with every card.
pub const SNAPSHOT_VERSION: u32 = 1;

/// The sensor families we know how to read vitals from.
/// Anything else reported by the device registry collapses into `Other` and is never fused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceKind {
    Radar,
    Sleepace,
    SleepPad,
    Other,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Radar => "Radar",
            DeviceKind::Sleepace => "Sleepace",
            DeviceKind::SleepPad => "SleepPad",
            DeviceKind::Other => "Other",
        }
    }

    /// Only radars and sleep pads carry vital signs.
    pub fn is_fusion_eligible(&self) -> bool {
        match self {
            DeviceKind::Radar | DeviceKind::Sleepace | DeviceKind::SleepPad => true,
            DeviceKind::Other => false,
        }
    }

    /// Sleepace and SleepPad devices report the same vitals and win over radars during fusion.
    pub fn is_sleepace_like(&self) -> bool {
        matches!(self, DeviceKind::Sleepace | DeviceKind::SleepPad)
    }

    pub fn is_radar(&self) -> bool {
        matches!(self, DeviceKind::Radar)
    }
}

impl From<&str> for DeviceKind {
    fn from(s: &str) -> Self {
        let s = s.trim();
        if s.eq_ignore_ascii_case("radar") {
            DeviceKind::Radar
        } else if s.eq_ignore_ascii_case("sleepace") {
            DeviceKind::Sleepace
        } else if s.eq_ignore_ascii_case("sleeppad") || s.eq_ignore_ascii_case("sleep_pad") {
            DeviceKind::SleepPad
        } else {
            DeviceKind::Other
        }
    }
}

impl From<String> for DeviceKind {
    fn from(s: String) -> Self {
        DeviceKind::from(s.as_str())
    }
}

impl From<DeviceKind> for String {
    fn from(kind: DeviceKind) -> Self {
        kind.as_str().to_owned()
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CardType {
    ActiveBed,
    Location,
}

impl CardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardType::ActiveBed => "ActiveBed",
            CardType::Location => "Location",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseCardTypeError(pub String);

impl fmt::Display for ParseCardTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is not a valid CardType", self.0)
    }
}

impl std::error::Error for ParseCardTypeError {}

impl FromStr for CardType {
    type Err = ParseCardTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ActiveBed" => Ok(CardType::ActiveBed),
            "Location" => Ok(CardType::Location),
            invalid => Err(ParseCardTypeError(invalid.to_owned())),
        }
    }
}

impl fmt::Display for CardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub branch: Option<String>,
    pub building: Option<String>,
    pub is_public_space: bool,
    pub is_multi_person_room: bool,
    pub unit_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bed {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub unit_id: Uuid,
    pub room_id: Option<Uuid>,
}

/// Where a device is physically attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceBinding {
    Bed(Uuid),
    Room(Uuid),
    Unbound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub name: String,
    pub kind: DeviceKind,
    pub bound_bed_id: Option<Uuid>,
    pub bound_room_id: Option<Uuid>,
    pub monitoring_enabled: bool,
    pub disabled: bool,
}

impl Device {
    /// A device counts towards cards only while monitoring is on and it hasn't been disabled.
    pub fn is_monitoring(&self) -> bool {
        self.monitoring_enabled && !self.disabled
    }

    pub fn binding(&self) -> DeviceBinding {
        match (self.bound_bed_id, self.bound_room_id) {
            (Some(bed_id), _) => DeviceBinding::Bed(bed_id),
            (None, Some(room_id)) => DeviceBinding::Room(room_id),
            (None, None) => DeviceBinding::Unbound,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resident {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub nickname: String,
    pub unit_id: Option<Uuid>,
    pub bed_id: Option<Uuid>,
}

/// Device entry of the snapshot denormalized onto a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDevice {
    pub device_id: Uuid,
    pub name: String,
    pub kind: DeviceKind,
    pub bed_id: Option<Uuid>,
    pub room_id: Option<Uuid>,
}

impl From<&Device> for CardDevice {
    fn from(device: &Device) -> Self {
        Self {
            device_id: device.id,
            name: device.name.clone(),
            kind: device.kind,
            bed_id: device.bound_bed_id,
            room_id: device.bound_room_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardResident {
    pub resident_id: Uuid,
    pub nickname: String,
    pub bed_id: Option<Uuid>,
}

impl From<&Resident> for CardResident {
    fn from(resident: &Resident) -> Self {
        Self {
            resident_id: resident.id,
            nickname: resident.nickname.clone(),
            bed_id: resident.bed_id,
        }
    }
}

/// Envelope for the JSON arrays stored on a card row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedList<T> {
    pub version: u32,
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

impl<T> VersionedList<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            items,
        }
    }
}

/// Unhandled alarm counts per severity bucket, maintained by the alarm subsystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmCounters {
    pub critical: i32,
    pub alert: i32,
    pub error: i32,
    pub warning: i32,
    pub notice: i32,
}

impl AlarmCounters {
    pub fn total(&self) -> i64 {
        [
            self.critical,
            self.alert,
            self.error,
            self.warning,
            self.notice,
        ]
        .iter()
        .map(|count| i64::from(*count))
        .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub card_type: CardType,
    pub bed_id: Option<Uuid>,
    pub unit_id: Uuid,
    pub name: String,
    pub address: String,
    pub primary_resident_id: Option<Uuid>,
    pub devices: Vec<CardDevice>,
    pub residents: Vec<CardResident>,
    pub alarm_counters: AlarmCounters,
    pub icon_alarm_level: i32,
    pub pop_alarm_level: i32,
}

impl Card {
    pub fn device_ids(&self) -> Vec<Uuid> {
        self.devices.iter().map(|d| d.device_id).collect()
    }
}

/// A single row of the telemetry store, as reported by one device at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub device_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub heart_rate: Option<i32>,
    pub respiratory_rate: Option<i32>,
    pub posture_code: Option<String>,
    pub posture_display: Option<String>,
    pub tracking_id: Option<String>,
    pub bed_status_code: Option<String>,
    pub sleep_state_code: Option<String>,
}

impl TelemetrySample {
    pub fn new(device_id: Uuid, timestamp: DateTime<Utc>) -> Self {
        Self {
            device_id,
            timestamp,
            heart_rate: None,
            respiratory_rate: None,
            posture_code: None,
            posture_display: None,
            tracking_id: None,
            bed_status_code: None,
            sleep_state_code: None,
        }
    }
}

/// One fused vital-sign field together with where and when it was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcedValue<T> {
    pub value: T,
    pub source: DeviceKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostureReading {
    pub tracking_id: String,
    pub posture_code: Option<String>,
    pub posture_display: Option<String>,
}

/// Fused realtime state for one card, as cached under `card:{id}:realtime`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeView {
    pub heart: Option<SourcedValue<i32>>,
    pub breath: Option<SourcedValue<i32>>,
    pub bed_status: Option<SourcedValue<String>>,
    pub sleep_stage: Option<SourcedValue<String>>,
    pub person_count: u32,
    #[serde(default)]
    pub postures: Vec<PostureReading>,
    pub timestamp: DateTime<Utc>,
    /// Set when no sample contributed and `timestamp` is the wall clock at fusion time.
    #[serde(default)]
    pub stale: bool,
}

/// Alarm entry as written by the alarm subsystem under `card:{id}:alarms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmItem {
    pub id: String,
    #[serde(rename = "type")]
    pub alarm_type: String,
    pub category: String,
    pub level: String,
    pub status: String,
    pub triggered_at: DateTime<Utc>,
    #[serde(default)]
    pub trigger_data: serde_json::Value,
}
