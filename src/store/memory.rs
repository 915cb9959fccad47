use super::RecordStore;
use crate::{record::Street, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

/// [`RecordStore`] keeping streets in a map keyed by `street_id`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    streets: RwLock<BTreeMap<i64, Street>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, street_id: i64) -> Option<Street> {
        self.streets.read().await.get(&street_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.streets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.streets.read().await.is_empty()
    }

    /// All stored streets, ordered by id.
    pub async fn all(&self) -> Vec<Street> {
        self.streets.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert(&self, street: &Street) -> Result<()> {
        self.streets
            .write()
            .await
            .insert(street.street_id, street.clone());
        debug!(street_id = street.street_id, "Inserted or updated street");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
