use crate::error::{AppError, Result};
use crate::models::{TowerLocation, TransmissionLine, TrippingIncident};
use crate::state::{sort_incidents, AssetStore, IncidentFilter, LineFilter, TowerFilter};
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic id source that also respects explicitly supplied ids
#[derive(Debug)]
struct IdSequence(AtomicU64);

impl IdSequence {
    fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    fn resolve(&self, requested: u64) -> Result<u64> {
        if requested == 0 {
            return self
                .0
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| id.checked_add(1))
                .map_err(|_| AppError::Storage("Id space exhausted".to_string()));
        }

        let next = requested
            .checked_add(1)
            .ok_or_else(|| AppError::Validation(format!("Id {} is out of range", requested)))?;
        self.0.fetch_max(next, Ordering::SeqCst);
        Ok(requested)
    }
}

/// Insert under a fresh id (or the requested one), refusing to overwrite.
fn insert_new<T, F>(
    map: &DashMap<u64, T>,
    ids: &IdSequence,
    requested: u64,
    kind: &str,
    assign: F,
) -> Result<T>
where
    T: Clone,
    F: FnOnce(u64) -> T,
{
    let id = ids.resolve(requested)?;
    match map.entry(id) {
        Entry::Occupied(_) => Err(AppError::Validation(format!("{} {} already exists", kind, id))),
        Entry::Vacant(slot) => {
            let record = assign(id);
            slot.insert(record.clone());
            Ok(record)
        }
    }
}

/// In-memory asset store (for development and testing)
#[derive(Clone)]
pub struct InMemoryStore {
    lines: Arc<DashMap<u64, TransmissionLine>>,
    incidents: Arc<DashMap<u64, TrippingIncident>>,
    towers: Arc<DashMap<u64, TowerLocation>>,
    line_ids: Arc<IdSequence>,
    incident_ids: Arc<IdSequence>,
    tower_ids: Arc<IdSequence>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            lines: Arc::new(DashMap::new()),
            incidents: Arc::new(DashMap::new()),
            towers: Arc::new(DashMap::new()),
            line_ids: Arc::new(IdSequence::new()),
            incident_ids: Arc::new(IdSequence::new()),
            tower_ids: Arc::new(IdSequence::new()),
        }
    }

    fn require_line(&self, line_id: u64) -> Result<()> {
        if self.lines.contains_key(&line_id) {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "Transmission line {} does not exist",
                line_id
            )))
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssetStore for InMemoryStore {
    async fn create_line(&self, line: TransmissionLine) -> Result<TransmissionLine> {
        let requested = line.id;
        let line = insert_new(&self.lines, &self.line_ids, requested, "Transmission line", |id| {
            line.with_id(id)
        })?;

        tracing::debug!(line_id = line.id, "Line saved");
        Ok(line)
    }

    async fn get_line(&self, id: u64) -> Result<Option<TransmissionLine>> {
        Ok(self.lines.get(&id).map(|entry| entry.clone()))
    }

    async fn update_line(&self, line: &TransmissionLine) -> Result<()> {
        match self.lines.get_mut(&line.id) {
            Some(mut entry) => {
                *entry = line.clone();
                tracing::debug!(line_id = line.id, "Line updated");
                Ok(())
            }
            None => Err(AppError::NotFound(format!(
                "Transmission line {} not found",
                line.id
            ))),
        }
    }

    async fn delete_line(&self, id: u64) -> Result<()> {
        if self.lines.remove(&id).is_none() {
            return Err(AppError::NotFound(format!(
                "Transmission line {} not found",
                id
            )));
        }
        self.incidents
            .retain(|_, incident| incident.transmission_line_id != id);
        self.towers.retain(|_, tower| tower.transmission_line_id != id);

        tracing::debug!(line_id = id, "Line deleted with its incidents and towers");
        Ok(())
    }

    async fn list_lines(&self, filter: &LineFilter) -> Result<Vec<TransmissionLine>> {
        let mut lines: Vec<TransmissionLine> = self
            .lines
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        lines.sort_by_key(|line| line.id);
        Ok(lines)
    }

    async fn count_lines(&self, filter: &LineFilter) -> Result<u64> {
        Ok(self
            .lines
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .count() as u64)
    }

    async fn create_incident(&self, incident: TrippingIncident) -> Result<TrippingIncident> {
        self.require_line(incident.transmission_line_id)?;
        let requested = incident.id;
        let incident = insert_new(
            &self.incidents,
            &self.incident_ids,
            requested,
            "Tripping incident",
            |id| TrippingIncident { id, ..incident },
        )?;

        tracing::debug!(
            incident_id = incident.id,
            line_id = incident.transmission_line_id,
            "Incident saved"
        );
        Ok(incident)
    }

    async fn get_incident(&self, id: u64) -> Result<Option<TrippingIncident>> {
        Ok(self.incidents.get(&id).map(|entry| entry.clone()))
    }

    async fn delete_incident(&self, id: u64) -> Result<()> {
        if self.incidents.remove(&id).is_some() {
            tracing::debug!(incident_id = id, "Incident deleted");
            Ok(())
        } else {
            Err(AppError::NotFound(format!(
                "Tripping incident {} not found",
                id
            )))
        }
    }

    async fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<TrippingIncident>> {
        let mut incidents: Vec<TrippingIncident> = self
            .incidents
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        sort_incidents(&mut incidents);
        Ok(incidents)
    }

    async fn count_incidents(&self, filter: &IncidentFilter) -> Result<u64> {
        Ok(self
            .incidents
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .count() as u64)
    }

    async fn create_tower(&self, tower: TowerLocation) -> Result<TowerLocation> {
        self.require_line(tower.transmission_line_id)?;
        let requested = tower.id;
        insert_new(&self.towers, &self.tower_ids, requested, "Tower", |id| TowerLocation {
            id,
            ..tower
        })
    }

    async fn get_tower(&self, id: u64) -> Result<Option<TowerLocation>> {
        Ok(self.towers.get(&id).map(|entry| entry.clone()))
    }

    async fn delete_tower(&self, id: u64) -> Result<()> {
        match self.towers.remove(&id) {
            Some(_) => Ok(()),
            None => Err(AppError::NotFound(format!("Tower {} not found", id))),
        }
    }

    async fn list_towers(&self, filter: &TowerFilter) -> Result<Vec<TowerLocation>> {
        let mut towers: Vec<TowerLocation> = self
            .towers
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        towers.sort_by_key(|tower| tower.id);
        Ok(towers)
    }

    async fn count_towers(&self, filter: &TowerFilter) -> Result<u64> {
        Ok(self
            .towers
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FaultType, LineStatus, TowerCondition, VoltageClass};
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn line(name: &str) -> TransmissionLine {
        TransmissionLine::new(name, VoltageClass::Kv220, 95.0, Some(date(2001, 5, 1)))
    }

    #[tokio::test]
    async fn test_create_assigns_ids() {
        let store = InMemoryStore::new();

        let a = store.create_line(line("A")).await.unwrap();
        let b = store.create_line(line("B")).await.unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);

        let explicit = store.create_line(line("C").with_id(10)).await.unwrap();
        assert_eq!(explicit.id, 10);
        let next = store.create_line(line("D")).await.unwrap();
        assert_eq!(next.id, 11);

        assert!(store.create_line(line("E").with_id(10)).await.is_err());
    }

    #[tokio::test]
    async fn test_largest_explicit_id_is_rejected() {
        let store = InMemoryStore::new();

        let result = store.create_line(line("MAX").with_id(u64::MAX)).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(store.count_lines(&LineFilter::default()).await.unwrap(), 0);

        let near = store.create_line(line("NEAR").with_id(u64::MAX - 1)).await.unwrap();
        assert_eq!(near.id, u64::MAX - 1);
        let next = store.create_line(line("NEXT")).await;
        assert!(matches!(next, Err(AppError::Storage(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_with_same_id_keep_first() {
        let store = InMemoryStore::new();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.create_line(line(&format!("RACE-{}", i)).with_id(42)).await
            }));
        }

        let mut winners = Vec::new();
        for task in tasks {
            if let Ok(saved) = task.await.unwrap() {
                winners.push(saved.line_name);
            }
        }

        assert_eq!(winners.len(), 1);
        let stored = store.get_line(42).await.unwrap().unwrap();
        assert_eq!(stored.line_name, winners[0]);
    }

    #[tokio::test]
    async fn test_update_line() {
        let store = InMemoryStore::new();
        let mut saved = store.create_line(line("A")).await.unwrap();

        saved.status = LineStatus::Inactive;
        store.update_line(&saved).await.unwrap();

        let fetched = store.get_line(saved.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, LineStatus::Inactive);

        let missing = line("Z").with_id(999);
        assert!(matches!(
            store.update_line(&missing).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_incident_requires_line() {
        let store = InMemoryStore::new();
        let result = store
            .create_incident(TrippingIncident::new(5, date(2023, 1, 1), FaultType::Lightning))
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_delete_line_cascades() {
        let store = InMemoryStore::new();
        let keep = store.create_line(line("keep")).await.unwrap();
        let gone = store.create_line(line("gone")).await.unwrap();

        for l in [&keep, &gone] {
            store
                .create_incident(TrippingIncident::new(l.id, date(2023, 1, 1), FaultType::Lightning))
                .await
                .unwrap();
            store
                .create_tower(TowerLocation::new(l.id, "T1", TowerCondition::Good))
                .await
                .unwrap();
        }

        store.delete_line(gone.id).await.unwrap();

        assert_eq!(store.count_lines(&LineFilter::default()).await.unwrap(), 1);
        assert_eq!(store.count_incidents(&IncidentFilter::default()).await.unwrap(), 1);
        assert_eq!(store.count_towers(&TowerFilter::default()).await.unwrap(), 1);
        assert!(store.delete_line(gone.id).await.is_err());
    }

    #[tokio::test]
    async fn test_filters() {
        let store = InMemoryStore::new();
        let active = store.create_line(line("active")).await.unwrap();
        store
            .create_line(line("idle").with_status(LineStatus::UnderMaintenance))
            .await
            .unwrap();

        let listed = store.list_lines(&LineFilter::active()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, active.id);

        for (day, fault) in [(1, FaultType::Lightning), (20, FaultType::BirdNest)] {
            store
                .create_incident(TrippingIncident::new(active.id, date(2023, 3, day), fault))
                .await
                .unwrap();
        }
        let recent = store
            .list_incidents(&IncidentFilter {
                since: Some(date(2023, 3, 10)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].fault_type, FaultType::BirdNest);

        let all = store.list_incidents(&IncidentFilter::default()).await.unwrap();
        assert!(all[0].fault_date > all[1].fault_date);

        store
            .create_tower(TowerLocation::new(active.id, "T1", TowerCondition::NeedsInspection))
            .await
            .unwrap();
        store
            .create_tower(TowerLocation::new(active.id, "T2", TowerCondition::Good))
            .await
            .unwrap();
        let poor = TowerFilter {
            poor_only: true,
            ..Default::default()
        };
        assert_eq!(store.count_towers(&poor).await.unwrap(), 1);
    }
}
