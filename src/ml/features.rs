use crate::models::{TowerLocation, TransmissionLine, TrippingIncident, VoltageClass};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Default trailing window for "recent" incidents (three years)
pub const RECENT_INCIDENT_WINDOW_DAYS: u32 = 3 * 365;

/// Number of model features
pub const N_FEATURES: usize = 7;

/// Feature names in column order
pub const FEATURE_NAMES: [&str; N_FEATURES] = [
    "total_length_km",
    "line_age",
    "incident_count",
    "recent_incidents",
    "tower_count",
    "poor_tower_count",
    "voltage_encoded",
];

/// Reasons a line cannot be turned into a feature vector
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeatureError {
    #[error("line {line_id} has no commission date")]
    MissingCommissionDate { line_id: u64 },

    #[error("line {line_id} commission date {commission_date} is after {as_of}")]
    CommissionDateInFuture {
        line_id: u64,
        commission_date: NaiveDate,
        as_of: NaiveDate,
    },

    #[error("line {line_id} has invalid length {value}")]
    InvalidLength { line_id: u64, value: f64 },

    #[error("feature {feature} has invalid value {value}")]
    InvalidValue { feature: &'static str, value: f64 },

    #[error("feature {feature} is {value}, above its maximum {max}")]
    OutOfRange {
        feature: &'static str,
        value: f64,
        max: f64,
    },
}

/// Derived, model-ready description of one line
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FeatureVector {
    pub total_length_km: f64,

    /// Fractional years since commissioning
    pub line_age: f64,

    /// Incidents on or before the reference date
    pub incident_count: u32,

    /// Incidents inside the trailing window
    pub recent_incidents: u32,

    pub tower_count: u32,

    /// Towers needing inspection or under repair
    pub poor_tower_count: u32,

    /// Voltage class ordinal
    pub voltage_encoded: u8,
}

impl FeatureVector {
    /// Values in `FEATURE_NAMES` order
    pub fn to_array(&self) -> [f64; N_FEATURES] {
        [
            self.total_length_km,
            self.line_age,
            self.incident_count as f64,
            self.recent_incidents as f64,
            self.tower_count as f64,
            self.poor_tower_count as f64,
            self.voltage_encoded as f64,
        ]
    }

    /// Check that every value lies inside the domain the extractor produces.
    ///
    /// Recent incidents are a subset of all incidents and poor towers a
    /// subset of all towers.
    pub fn validate(&self) -> Result<(), FeatureError> {
        for (feature, value) in FEATURE_NAMES.iter().copied().zip(self.to_array()) {
            if !value.is_finite() || value < 0.0 {
                return Err(FeatureError::InvalidValue { feature, value });
            }
        }

        let bounded = [
            (
                "voltage_encoded",
                self.voltage_encoded as u32,
                VoltageClass::MAX_ORDINAL as u32,
            ),
            ("recent_incidents", self.recent_incidents, self.incident_count),
            ("poor_tower_count", self.poor_tower_count, self.tower_count),
        ];
        for (feature, value, max) in bounded {
            if value > max {
                return Err(FeatureError::OutOfRange {
                    feature,
                    value: value as f64,
                    max: max as f64,
                });
            }
        }
        Ok(())
    }
}

/// Feature extractor for transmission lines.
///
/// Its settings travel inside the trained artifact so inference derives
/// features exactly the way training did.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureExtractor {
    /// Trailing window for `recent_incidents`, in days
    recent_window_days: u32,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(RECENT_INCIDENT_WINDOW_DAYS)
    }
}

impl FeatureExtractor {
    /// Create a new feature extractor
    pub fn new(recent_window_days: u32) -> Self {
        Self { recent_window_days }
    }

    pub fn recent_window_days(&self) -> u32 {
        self.recent_window_days
    }

    pub fn feature_names(&self) -> &'static [&'static str; N_FEATURES] {
        &FEATURE_NAMES
    }

    /// Derive the feature vector of `line` as of `as_of`.
    ///
    /// Incidents and towers belonging to other lines are ignored, as are
    /// incidents dated after `as_of`.
    pub fn extract(
        &self,
        line: &TransmissionLine,
        incidents: &[TrippingIncident],
        towers: &[TowerLocation],
        as_of: NaiveDate,
    ) -> Result<FeatureVector, FeatureError> {
        let commission_date = line
            .commission_date
            .ok_or(FeatureError::MissingCommissionDate { line_id: line.id })?;

        if commission_date > as_of {
            return Err(FeatureError::CommissionDateInFuture {
                line_id: line.id,
                commission_date,
                as_of,
            });
        }

        if !line.total_length_km.is_finite() || line.total_length_km < 0.0 {
            return Err(FeatureError::InvalidLength {
                line_id: line.id,
                value: line.total_length_km,
            });
        }

        let line_age = (as_of - commission_date).num_days() as f64 / 365.0;

        let mut incident_count = 0u32;
        let mut recent_incidents = 0u32;
        for incident in incidents
            .iter()
            .filter(|i| i.transmission_line_id == line.id)
        {
            let days = incident.days_before(as_of);
            if days < 0 {
                continue;
            }
            incident_count += 1;
            if days <= self.recent_window_days as i64 {
                recent_incidents += 1;
            }
        }

        let mut tower_count = 0u32;
        let mut poor_tower_count = 0u32;
        for tower in towers.iter().filter(|t| t.transmission_line_id == line.id) {
            tower_count += 1;
            if tower.condition.is_poor() {
                poor_tower_count += 1;
            }
        }

        Ok(FeatureVector {
            total_length_km: line.total_length_km,
            line_age,
            incident_count,
            recent_incidents,
            tower_count,
            poor_tower_count,
            voltage_encoded: line.voltage_level.ordinal(),
        })
    }

    /// Extract features for many lines at once, grouping incidents and
    /// towers by line id first. Lines that fail extraction are returned
    /// separately so callers can skip and count them.
    pub fn extract_all<'a>(
        &self,
        lines: &'a [TransmissionLine],
        incidents: &[TrippingIncident],
        towers: &[TowerLocation],
        as_of: NaiveDate,
    ) -> ExtractedBatch<'a> {
        let mut incidents_by_line: HashMap<u64, Vec<TrippingIncident>> = HashMap::new();
        for incident in incidents {
            incidents_by_line
                .entry(incident.transmission_line_id)
                .or_default()
                .push(incident.clone());
        }

        let mut towers_by_line: HashMap<u64, Vec<TowerLocation>> = HashMap::new();
        for tower in towers {
            towers_by_line
                .entry(tower.transmission_line_id)
                .or_default()
                .push(tower.clone());
        }

        let mut batch = ExtractedBatch::default();
        for line in lines {
            let line_incidents = incidents_by_line
                .get(&line.id)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let line_towers = towers_by_line.get(&line.id).map(Vec::as_slice).unwrap_or(&[]);

            match self.extract(line, line_incidents, line_towers, as_of) {
                Ok(features) => batch.rows.push((line, features)),
                Err(err) => {
                    tracing::debug!(line_id = line.id, error = %err, "Skipping line");
                    batch.skipped.push(err);
                }
            }
        }
        batch
    }
}

/// Result of a bulk extraction
#[derive(Debug, Default)]
pub struct ExtractedBatch<'a> {
    /// Lines with their derived features, in input order
    pub rows: Vec<(&'a TransmissionLine, FeatureVector)>,

    /// Lines that could not be featurized
    pub skipped: Vec<FeatureError>,
}
