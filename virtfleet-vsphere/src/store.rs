//! Persistent VM projection store seam.
//!
//! The reconciliation loops only update derived fields on existing
//! projections; record creation and deletion belong to the CRUD layer
//! behind this trait.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::types::VmProjection;

#[async_trait]
pub trait VmStore: Send + Sync {
    async fn get_all(&self) -> Result<Vec<VmProjection>>;

    /// Fetch projections for the given ids; unknown ids are silently absent
    /// from the result.
    async fn get_by_ids(&self, ids: &[Uuid]) -> Result<Vec<VmProjection>>;

    async fn save(&self, records: Vec<VmProjection>) -> Result<()>;
}

/// In-memory store used by the mock backend and in tests.
pub struct MemoryVmStore {
    records: RwLock<HashMap<Uuid, VmProjection>>,
}

impl MemoryVmStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Seed the store with initial projections.
    pub async fn seed(&self, records: Vec<VmProjection>) {
        let mut map = self.records.write().await;
        for record in records {
            map.insert(record.id, record);
        }
    }

    pub async fn get(&self, id: &Uuid) -> Option<VmProjection> {
        self.records.read().await.get(id).cloned()
    }
}

impl Default for MemoryVmStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VmStore for MemoryVmStore {
    async fn get_all(&self) -> Result<Vec<VmProjection>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn get_by_ids(&self, ids: &[Uuid]) -> Result<Vec<VmProjection>> {
        let map = self.records.read().await;
        Ok(ids.iter().filter_map(|id| map.get(id).cloned()).collect())
    }

    async fn save(&self, records: Vec<VmProjection>) -> Result<()> {
        let mut map = self.records.write().await;
        for record in records {
            map.insert(record.id, record);
        }
        Ok(())
    }
}
