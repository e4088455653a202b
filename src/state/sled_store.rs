use crate::error::{AppError, Result};
use crate::models::{TowerLocation, TransmissionLine, TrippingIncident};
use crate::state::{sort_incidents, AssetStore, IncidentFilter, LineFilter, TowerFilter};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::Db;
use std::path::Path;
use std::sync::Arc;

/// Persistent asset store using the Sled embedded database.
///
/// One tree per record kind, keyed by big-endian id so iteration follows id
/// order; values are bincode.
#[derive(Clone)]
pub struct SledStore {
    db: Arc<Db>,
    lines_tree: sled::Tree,
    incidents_tree: sled::Tree,
    towers_tree: sled::Tree,
}

fn storage_error(context: &'static str) -> impl Fn(sled::Error) -> AppError {
    move |e| AppError::Storage(format!("{}: {}", context, e))
}

impl SledStore {
    /// Create a new Sled store at the specified path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref()).map_err(storage_error("Failed to open Sled database"))?;

        let lines_tree = db
            .open_tree("lines")
            .map_err(storage_error("Failed to open lines tree"))?;
        let incidents_tree = db
            .open_tree("incidents")
            .map_err(storage_error("Failed to open incidents tree"))?;
        let towers_tree = db
            .open_tree("towers")
            .map_err(storage_error("Failed to open towers tree"))?;

        tracing::info!("Initialized Sled store at {:?}", path.as_ref());

        Ok(Self {
            db: Arc::new(db),
            lines_tree,
            incidents_tree,
            towers_tree,
        })
    }

    fn key(id: u64) -> [u8; 8] {
        id.to_be_bytes()
    }

    fn fetch<T: DeserializeOwned>(tree: &sled::Tree, id: u64) -> Result<Option<T>> {
        match tree
            .get(Self::key(id))
            .map_err(storage_error("Failed to read record"))?
        {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(tree: &sled::Tree) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for result in tree.iter() {
            let (_, value) = result.map_err(storage_error("Failed to iterate records"))?;
            records.push(bincode::deserialize(&value)?);
        }
        Ok(records)
    }

    /// Insert under a fresh id (or the requested one), refusing to overwrite.
    fn insert_new<T, F>(&self, tree: &sled::Tree, requested: u64, kind: &str, mut assign: F) -> Result<T>
    where
        T: Serialize,
        F: FnMut(u64) -> T,
    {
        loop {
            let id = if requested == 0 {
                self.db
                    .generate_id()
                    .map_err(storage_error("Failed to generate id"))?
                    + 1
            } else {
                requested
            };

            let record = assign(id);
            let bytes = bincode::serialize(&record)?;
            let swapped = tree
                .compare_and_swap(Self::key(id), None as Option<&[u8]>, Some(bytes))
                .map_err(storage_error("Failed to insert record"))?;

            match swapped {
                Ok(()) => {
                    tree.flush().map_err(storage_error("Failed to flush tree"))?;
                    return Ok(record);
                }
                Err(_) if requested == 0 => continue,
                Err(_) => {
                    return Err(AppError::Validation(format!(
                        "{} {} already exists",
                        kind, id
                    )))
                }
            }
        }
    }

    fn require_line(&self, line_id: u64) -> Result<()> {
        let exists = self
            .lines_tree
            .contains_key(Self::key(line_id))
            .map_err(storage_error("Failed to check line existence"))?;
        if exists {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "Transmission line {} does not exist",
                line_id
            )))
        }
    }

    fn remove(tree: &sled::Tree, id: u64) -> Result<bool> {
        let removed = tree
            .remove(Self::key(id))
            .map_err(storage_error("Failed to delete record"))?;
        tree.flush().map_err(storage_error("Failed to flush tree"))?;
        Ok(removed.is_some())
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(storage_error("Failed to flush database"))?;
        Ok(())
    }

    /// Get database size in bytes
    pub fn size_on_disk(&self) -> Result<u64> {
        self.db
            .size_on_disk()
            .map_err(storage_error("Failed to get database size"))
    }
}

#[async_trait]
impl AssetStore for SledStore {
    async fn create_line(&self, line: TransmissionLine) -> Result<TransmissionLine> {
        let saved = self.insert_new(&self.lines_tree, line.id, "Transmission line", |id| {
            let mut record = line.clone();
            record.id = id;
            record
        })?;
        tracing::debug!(line_id = saved.id, "Line saved to Sled");
        Ok(saved)
    }

    async fn get_line(&self, id: u64) -> Result<Option<TransmissionLine>> {
        Self::fetch(&self.lines_tree, id)
    }

    async fn update_line(&self, line: &TransmissionLine) -> Result<()> {
        let key = Self::key(line.id);
        let exists = self
            .lines_tree
            .contains_key(key)
            .map_err(storage_error("Failed to check line existence"))?;
        if !exists {
            return Err(AppError::NotFound(format!(
                "Transmission line {} not found",
                line.id
            )));
        }

        self.lines_tree
            .insert(key, bincode::serialize(line)?)
            .map_err(storage_error("Failed to update line"))?;
        self.lines_tree
            .flush()
            .map_err(storage_error("Failed to flush lines tree"))?;

        tracing::debug!(line_id = line.id, "Line updated in Sled");
        Ok(())
    }

    async fn delete_line(&self, id: u64) -> Result<()> {
        if !Self::remove(&self.lines_tree, id)? {
            return Err(AppError::NotFound(format!(
                "Transmission line {} not found",
                id
            )));
        }

        let incidents: Vec<TrippingIncident> = Self::scan(&self.incidents_tree)?;
        for incident in incidents.iter().filter(|i| i.transmission_line_id == id) {
            Self::remove(&self.incidents_tree, incident.id)?;
        }
        let towers: Vec<TowerLocation> = Self::scan(&self.towers_tree)?;
        for tower in towers.iter().filter(|t| t.transmission_line_id == id) {
            Self::remove(&self.towers_tree, tower.id)?;
        }

        tracing::debug!(line_id = id, "Line deleted from Sled with its incidents and towers");
        Ok(())
    }

    async fn list_lines(&self, filter: &LineFilter) -> Result<Vec<TransmissionLine>> {
        let lines: Vec<TransmissionLine> = Self::scan(&self.lines_tree)?;
        Ok(lines.into_iter().filter(|l| filter.matches(l)).collect())
    }

    async fn count_lines(&self, filter: &LineFilter) -> Result<u64> {
        Ok(self.list_lines(filter).await?.len() as u64)
    }

    async fn create_incident(&self, incident: TrippingIncident) -> Result<TrippingIncident> {
        self.require_line(incident.transmission_line_id)?;
        let saved = self.insert_new(&self.incidents_tree, incident.id, "Tripping incident", |id| {
            let mut record = incident.clone();
            record.id = id;
            record
        })?;
        tracing::debug!(
            incident_id = saved.id,
            line_id = saved.transmission_line_id,
            "Incident saved to Sled"
        );
        Ok(saved)
    }

    async fn get_incident(&self, id: u64) -> Result<Option<TrippingIncident>> {
        Self::fetch(&self.incidents_tree, id)
    }

    async fn delete_incident(&self, id: u64) -> Result<()> {
        if Self::remove(&self.incidents_tree, id)? {
            tracing::debug!(incident_id = id, "Incident deleted from Sled");
            Ok(())
        } else {
            Err(AppError::NotFound(format!(
                "Tripping incident {} not found",
                id
            )))
        }
    }

    async fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<TrippingIncident>> {
        let incidents: Vec<TrippingIncident> = Self::scan(&self.incidents_tree)?;
        let mut incidents: Vec<TrippingIncident> =
            incidents.into_iter().filter(|i| filter.matches(i)).collect();
        sort_incidents(&mut incidents);
        Ok(incidents)
    }

    async fn count_incidents(&self, filter: &IncidentFilter) -> Result<u64> {
        let incidents: Vec<TrippingIncident> = Self::scan(&self.incidents_tree)?;
        Ok(incidents.iter().filter(|i| filter.matches(i)).count() as u64)
    }

    async fn create_tower(&self, tower: TowerLocation) -> Result<TowerLocation> {
        self.require_line(tower.transmission_line_id)?;
        self.insert_new(&self.towers_tree, tower.id, "Tower", |id| {
            let mut record = tower.clone();
            record.id = id;
            record
        })
    }

    async fn get_tower(&self, id: u64) -> Result<Option<TowerLocation>> {
        Self::fetch(&self.towers_tree, id)
    }

    async fn delete_tower(&self, id: u64) -> Result<()> {
        if Self::remove(&self.towers_tree, id)? {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Tower {} not found", id)))
        }
    }

    async fn list_towers(&self, filter: &TowerFilter) -> Result<Vec<TowerLocation>> {
        let towers: Vec<TowerLocation> = Self::scan(&self.towers_tree)?;
        Ok(towers.into_iter().filter(|t| filter.matches(t)).collect())
    }

    async fn count_towers(&self, filter: &TowerFilter) -> Result<u64> {
        Ok(self.list_towers(filter).await?.len() as u64)
    }
}
