use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use validator::Validate;

/// A recorded tripping (fault) event on a transmission line
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct TrippingIncident {
    /// Unique identifier (0 means "not yet assigned")
    #[serde(default)]
    pub id: u64,

    /// Line the fault occurred on
    pub transmission_line_id: u64,

    /// Date of the fault
    pub fault_date: NaiveDate,

    /// Local time of the fault as recorded by the operator ("HH:MM")
    #[serde(default)]
    #[validate(length(max = 10))]
    pub fault_time: Option<String>,

    /// Fault category
    pub fault_type: FaultType,

    /// Outage duration in minutes
    #[serde(default)]
    pub downtime_minutes: u32,

    /// Whether the fault is attributable to the utility
    #[serde(default)]
    pub attributed_to_powergrid: Attribution,

    /// Root cause notes
    #[serde(default)]
    pub root_cause: Option<String>,

    /// Creation timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl TrippingIncident {
    /// Create a new incident without an assigned identifier
    pub fn new(transmission_line_id: u64, fault_date: NaiveDate, fault_type: FaultType) -> Self {
        Self {
            id: 0,
            transmission_line_id,
            fault_date,
            fault_time: None,
            fault_type,
            downtime_minutes: 0,
            attributed_to_powergrid: Attribution::default(),
            root_cause: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_downtime(mut self, minutes: u32) -> Self {
        self.downtime_minutes = minutes;
        self
    }

    /// Age of the incident in days relative to `as_of` (negative if in the future)
    pub fn days_before(&self, as_of: NaiveDate) -> i64 {
        (as_of - self.fault_date).num_days()
    }
}

/// Fault categories used by the operations team
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, EnumString, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultType {
    Lightning,

    Vegetation,

    #[serde(rename = "HARDWARE FAULT")]
    #[strum(serialize = "HARDWARE FAULT")]
    HardwareFault,

    #[serde(rename = "FOREST FIRE")]
    #[strum(serialize = "FOREST FIRE")]
    ForestFire,

    #[serde(rename = "BIRD NEST")]
    #[strum(serialize = "BIRD NEST")]
    BirdNest,

    #[serde(rename = "OTHER UTILITIES")]
    #[strum(serialize = "OTHER UTILITIES")]
    OtherUtilities,

    Others,
}

impl FaultType {
    pub fn all() -> [FaultType; 7] {
        [
            FaultType::Lightning,
            FaultType::Vegetation,
            FaultType::HardwareFault,
            FaultType::ForestFire,
            FaultType::BirdNest,
            FaultType::OtherUtilities,
            FaultType::Others,
        ]
    }
}

/// Attribution flag for a tripping
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, EnumString, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Attribution {
    #[default]
    Yes,
    No,
    Pending,
}
