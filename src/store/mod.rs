//! Persistence of delivered records.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::{record::Street, Result};
use async_trait::async_trait;

#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Inserts `street`, or replaces every field of the stored street with
    /// the same `street_id`. Repeating the call leaves the same final state.
    async fn upsert(&self, street: &Street) -> Result<()>;

    /// Best-effort disconnect.
    async fn close(&self) -> Result<()>;
}
