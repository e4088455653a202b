use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use validator::Validate;

/// Represents a power transmission line asset
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct TransmissionLine {
    /// Unique identifier (0 means "not yet assigned")
    #[serde(default)]
    pub id: u64,

    /// Human-readable line name, e.g. "400 KV MISA-SILCHAR"
    #[validate(length(min = 1, max = 200))]
    pub line_name: String,

    /// Voltage class
    pub voltage_level: VoltageClass,

    /// Route length in kilometres
    #[validate(range(min = 0.0))]
    pub total_length_km: f64,

    /// Commissioning date, drives the age feature
    pub commission_date: Option<NaiveDate>,

    /// State reference
    #[serde(default)]
    pub state_id: Option<u64>,

    /// Maintenance office reference
    #[serde(default)]
    pub maintenance_office_id: Option<u64>,

    /// Operational status
    #[serde(default)]
    pub status: LineStatus,

    /// Free-form remarks
    #[serde(default)]
    pub remarks: Option<String>,

    /// Creation timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl TransmissionLine {
    /// Create a new active line without an assigned identifier
    pub fn new(
        line_name: impl Into<String>,
        voltage_level: VoltageClass,
        total_length_km: f64,
        commission_date: Option<NaiveDate>,
    ) -> Self {
        Self {
            id: 0,
            line_name: line_name.into(),
            voltage_level,
            total_length_km,
            commission_date,
            state_id: None,
            maintenance_office_id: None,
            status: LineStatus::Active,
            remarks: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    pub fn with_status(mut self, status: LineStatus) -> Self {
        self.status = status;
        self
    }

    /// Whether the line is in service and should be scored
    pub fn is_active(&self) -> bool {
        self.status == LineStatus::Active
    }
}

/// Nominal voltage class of a line
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, Display,
)]
pub enum VoltageClass {
    #[serde(rename = "132 KV", alias = "132kV", alias = "132 kV", alias = "132KV")]
    #[strum(to_string = "132 KV", serialize = "132kV", serialize = "132 kV", serialize = "132KV")]
    Kv132,

    #[serde(rename = "220 KV", alias = "220kV", alias = "220 kV", alias = "220KV")]
    #[strum(to_string = "220 KV", serialize = "220kV", serialize = "220 kV", serialize = "220KV")]
    Kv220,

    #[serde(rename = "400 KV", alias = "400kV", alias = "400 kV", alias = "400KV")]
    #[strum(to_string = "400 KV", serialize = "400kV", serialize = "400 kV", serialize = "400KV")]
    Kv400,

    #[serde(rename = "800 KV", alias = "800kV", alias = "800 kV", alias = "800KV")]
    #[strum(to_string = "800 KV", serialize = "800kV", serialize = "800 kV", serialize = "800KV")]
    Kv800,
}

impl VoltageClass {
    /// Highest value `ordinal` can return
    pub const MAX_ORDINAL: u8 = 3;

    /// Ordinal encoding used as a model feature (ascending with voltage)
    pub fn ordinal(&self) -> u8 {
        match self {
            VoltageClass::Kv132 => 0,
            VoltageClass::Kv220 => 1,
            VoltageClass::Kv400 => 2,
            VoltageClass::Kv800 => 3,
        }
    }

    /// Nominal voltage in kilovolts
    pub fn kilovolts(&self) -> u32 {
        match self {
            VoltageClass::Kv132 => 132,
            VoltageClass::Kv220 => 220,
            VoltageClass::Kv400 => 400,
            VoltageClass::Kv800 => 800,
        }
    }

    pub fn all() -> [VoltageClass; 4] {
        [
            VoltageClass::Kv132,
            VoltageClass::Kv220,
            VoltageClass::Kv400,
            VoltageClass::Kv800,
        ]
    }
}

/// Operational status of a line
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, EnumString, Display)]
pub enum LineStatus {
    #[default]
    Active,

    #[serde(rename = "Under Maintenance")]
    #[strum(serialize = "Under Maintenance")]
    UnderMaintenance,

    Inactive,
}

/// Physical tower along a transmission line
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct TowerLocation {
    /// Unique identifier (0 means "not yet assigned")
    #[serde(default)]
    pub id: u64,

    /// Owning line
    pub transmission_line_id: u64,

    /// Tower number as painted on site
    #[validate(length(min = 1, max = 20))]
    pub tower_number: String,

    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,

    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,

    /// Last assessed condition
    #[serde(default)]
    pub condition: TowerCondition,

    /// Date of last inspection
    #[serde(default)]
    pub last_inspection_date: Option<NaiveDate>,
}

impl TowerLocation {
    pub fn new(transmission_line_id: u64, tower_number: impl Into<String>, condition: TowerCondition) -> Self {
        Self {
            id: 0,
            transmission_line_id,
            tower_number: tower_number.into(),
            latitude: 0.0,
            longitude: 0.0,
            condition,
            last_inspection_date: None,
        }
    }

    pub fn with_position(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = latitude;
        self.longitude = longitude;
        self
    }
}

/// Assessed tower condition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, EnumString, Display)]
pub enum TowerCondition {
    #[default]
    Good,

    #[serde(rename = "Needs Inspection")]
    #[strum(serialize = "Needs Inspection")]
    NeedsInspection,

    #[serde(rename = "Under Repair")]
    #[strum(serialize = "Under Repair")]
    UnderRepair,
}

impl TowerCondition {
    /// Towers needing inspection or under repair count against a line
    pub fn is_poor(&self) -> bool {
        matches!(self, TowerCondition::NeedsInspection | TowerCondition::UnderRepair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_voltage_class_serde_names() {
        let json = serde_json::to_string(&VoltageClass::Kv400).unwrap();
        assert_eq!(json, "\"400 KV\"");

        let parsed: VoltageClass = serde_json::from_str("\"220kV\"").unwrap();
        assert_eq!(parsed, VoltageClass::Kv220);

        assert_eq!(VoltageClass::from_str("132 kV").unwrap(), VoltageClass::Kv132);
        assert_eq!(VoltageClass::Kv800.to_string(), "800 KV");
    }

    #[test]
    fn test_voltage_ordinal_is_ascending() {
        let ordinals: Vec<u8> = VoltageClass::all().iter().map(|v| v.ordinal()).collect();
        assert_eq!(ordinals, vec![0, 1, 2, 3]);
        assert_eq!(ordinals.iter().max(), Some(&VoltageClass::MAX_ORDINAL));
        assert_eq!(VoltageClass::Kv400.kilovolts(), 400);
    }

    #[test]
    fn test_line_status_serde() {
        let status: LineStatus = serde_json::from_str("\"Under Maintenance\"").unwrap();
        assert_eq!(status, LineStatus::UnderMaintenance);
        assert_eq!(LineStatus::default(), LineStatus::Active);
    }

    #[test]
    fn test_line_defaults_from_json() {
        let line: TransmissionLine = serde_json::from_str(
            r#"{
                "line_name": "220 KV MISA-DIMAPUR",
                "voltage_level": "220 KV",
                "total_length_km": 145.6,
                "commission_date": "2004-06-01"
            }"#,
        )
        .unwrap();

        assert_eq!(line.id, 0);
        assert!(line.is_active());
        assert_eq!(line.commission_date, NaiveDate::from_ymd_opt(2004, 6, 1));
    }

    #[test]
    fn test_line_validation_rejects_empty_name() {
        let line = TransmissionLine::new("", VoltageClass::Kv132, 10.0, None);
        assert!(line.validate().is_err());
    }

    #[test]
    fn test_tower_condition_poor() {
        assert!(!TowerCondition::Good.is_poor());
        assert!(TowerCondition::NeedsInspection.is_poor());
        assert!(TowerCondition::UnderRepair.is_poor());

        let parsed: TowerCondition = serde_json::from_str("\"Needs Inspection\"").unwrap();
        assert_eq!(parsed, TowerCondition::NeedsInspection);
    }
}
