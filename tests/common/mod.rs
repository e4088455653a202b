//! Shared fixtures for integration tests

#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use std::collections::HashMap;
use std::sync::Arc;
use tlamp_risk::ml::{ForestParams, MLConfig};
use tlamp_risk::models::{FaultType, TransmissionLine, TrippingIncident, VoltageClass};
use tlamp_risk::state::{AssetStore, InMemoryStore};

/// Fixed reference date so tests do not depend on the wall clock
pub fn today() -> NaiveDate {
    date(2024, 6, 30)
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Small, fast forest with no artifact on disk
pub fn test_ml_config() -> MLConfig {
    MLConfig {
        model_path: None,
        forest: ForestParams {
            n_estimators: 25,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn memory_store() -> Arc<dyn AssetStore> {
    Arc::new(InMemoryStore::new())
}

/// Add a line with `trips` incidents spread over the last year.
///
/// Every line shares length, age and voltage so only the incident
/// history tells them apart.
pub async fn add_line(store: &Arc<dyn AssetStore>, name: &str, trips: u32) -> TransmissionLine {
    add_line_at(store, name, trips, today()).await
}

/// Same as [`add_line`] with incidents placed relative to `as_of`
pub async fn add_line_at(
    store: &Arc<dyn AssetStore>,
    name: &str,
    trips: u32,
    as_of: NaiveDate,
) -> TransmissionLine {
    add_line_commissioned(store, name, trips, date(2010, 1, 1), as_of).await
}

/// Commission date that makes a line a little over `years` old at `as_of`
pub fn commissioned_years_ago(years: u32, as_of: NaiveDate) -> NaiveDate {
    as_of - Duration::days(years as i64 * 365 + 30)
}

/// Add a line commissioned on `commissioned` with `trips` incidents
/// in the year before `as_of`
pub async fn add_line_commissioned(
    store: &Arc<dyn AssetStore>,
    name: &str,
    trips: u32,
    commissioned: NaiveDate,
    as_of: NaiveDate,
) -> TransmissionLine {
    let line = store
        .create_line(TransmissionLine::new(name, VoltageClass::Kv220, 100.0, Some(commissioned)))
        .await
        .unwrap();

    for k in 0..trips {
        store
            .create_incident(TrippingIncident::new(
                line.id,
                as_of - Duration::days(10 + k as i64 * 20),
                FaultType::Lightning,
            ))
            .await
            .unwrap();
    }

    line
}

/// `per_group` lines each with 0, 5 and 12 incidents. Returns line id to
/// incident count.
pub async fn seed_scenario(store: &Arc<dyn AssetStore>, per_group: usize) -> HashMap<u64, u32> {
    seed_scenario_at(store, per_group, today()).await
}

pub async fn seed_scenario_at(
    store: &Arc<dyn AssetStore>,
    per_group: usize,
    as_of: NaiveDate,
) -> HashMap<u64, u32> {
    let mut trips_by_line = HashMap::new();
    for i in 0..per_group {
        for trips in [0u32, 5, 12] {
            let line = add_line_at(store, &format!("LINE-{}-{}", trips, i), trips, as_of).await;
            trips_by_line.insert(line.id, trips);
        }
    }
    trips_by_line
}

/// Parse Prometheus exposition text into metric name to sample lines
pub fn parse_prometheus_output(output: &str) -> HashMap<String, Vec<String>> {
    let mut metrics: HashMap<String, Vec<String>> = HashMap::new();
    for line in output.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let name = line
            .split(|c| c == '{' || c == ' ')
            .next()
            .unwrap_or_default()
            .to_string();
        metrics.entry(name).or_default().push(line.to_string());
    }
    metrics
}
