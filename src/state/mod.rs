pub mod store;
pub mod sled_store;
pub mod factory;

pub use store::*;
pub use sled_store::SledStore;
pub use factory::{create_in_memory_store, create_store};

use crate::error::Result;
use crate::models::{
    LineStatus, TowerLocation, TransmissionLine, TrippingIncident, VoltageClass,
};
use async_trait::async_trait;
use chrono::NaiveDate;

/// Access to the line, incident and tower records the risk model learns from.
///
/// Ids of `0` on create mean "assign one"; any other id is kept as given.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Insert a line and return it with its assigned id
    async fn create_line(&self, line: TransmissionLine) -> Result<TransmissionLine>;

    /// Get a line by ID
    async fn get_line(&self, id: u64) -> Result<Option<TransmissionLine>>;

    /// Replace an existing line
    async fn update_line(&self, line: &TransmissionLine) -> Result<()>;

    /// Delete a line together with its incidents and towers
    async fn delete_line(&self, id: u64) -> Result<()>;

    /// List lines matching the filter, ordered by id
    async fn list_lines(&self, filter: &LineFilter) -> Result<Vec<TransmissionLine>>;

    /// Count lines matching the filter
    async fn count_lines(&self, filter: &LineFilter) -> Result<u64>;

    /// Record an incident on an existing line
    async fn create_incident(&self, incident: TrippingIncident) -> Result<TrippingIncident>;

    /// Get an incident by ID
    async fn get_incident(&self, id: u64) -> Result<Option<TrippingIncident>>;

    /// Delete an incident
    async fn delete_incident(&self, id: u64) -> Result<()>;

    /// List incidents matching the filter, newest first
    async fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<TrippingIncident>>;

    /// Count incidents matching the filter
    async fn count_incidents(&self, filter: &IncidentFilter) -> Result<u64>;

    /// Record a tower on an existing line
    async fn create_tower(&self, tower: TowerLocation) -> Result<TowerLocation>;

    /// Get a tower by ID
    async fn get_tower(&self, id: u64) -> Result<Option<TowerLocation>>;

    /// Delete a tower
    async fn delete_tower(&self, id: u64) -> Result<()>;

    /// List towers matching the filter, ordered by id
    async fn list_towers(&self, filter: &TowerFilter) -> Result<Vec<TowerLocation>>;

    /// Count towers matching the filter
    async fn count_towers(&self, filter: &TowerFilter) -> Result<u64>;
}

/// Filter for querying lines
#[derive(Debug, Clone, Default)]
pub struct LineFilter {
    pub status: Option<LineStatus>,
    pub voltage_level: Option<VoltageClass>,
}

impl LineFilter {
    pub fn active() -> Self {
        Self {
            status: Some(LineStatus::Active),
            ..Default::default()
        }
    }

    pub fn matches(&self, line: &TransmissionLine) -> bool {
        self.status.map_or(true, |s| line.status == s)
            && self.voltage_level.map_or(true, |v| line.voltage_level == v)
    }
}

/// Filter for querying incidents
#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    pub line_id: Option<u64>,

    /// Only incidents on or after this date
    pub since: Option<NaiveDate>,
}

impl IncidentFilter {
    pub fn matches(&self, incident: &TrippingIncident) -> bool {
        self.line_id
            .map_or(true, |id| incident.transmission_line_id == id)
            && self.since.map_or(true, |d| incident.fault_date >= d)
    }
}

/// Filter for querying towers
#[derive(Debug, Clone, Default)]
pub struct TowerFilter {
    pub line_id: Option<u64>,

    /// Only towers needing inspection or under repair
    pub poor_only: bool,
}

impl TowerFilter {
    pub fn matches(&self, tower: &TowerLocation) -> bool {
        self.line_id
            .map_or(true, |id| tower.transmission_line_id == id)
            && (!self.poor_only || tower.condition.is_poor())
    }
}

/// Newest first, ties broken by id descending
pub(crate) fn sort_incidents(incidents: &mut [TrippingIncident]) {
    incidents.sort_by(|a, b| b.fault_date.cmp(&a.fault_date).then(b.id.cmp(&a.id)));
}
