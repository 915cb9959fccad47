//! Message broker access.
//!
//! [`RecordBroker`] is the contract the pipelines depend on. [`AmqpBroker`]
//! implements it on top of an AMQP 0-9-1 server, [`MemoryBroker`] keeps the
//! queue in process.

pub mod amqp;
pub mod delivery;
pub mod lifecycle;
pub mod memory;
pub mod serializer;
pub mod state;

pub use amqp::AmqpBroker;
pub use delivery::{dispatch, Acknowledgement};
pub use lifecycle::{Lifecycle, ReconnectPolicy};
pub use memory::MemoryBroker;
pub use serializer::JsonSerializer;
pub use state::ConnectionState;

use crate::{record::Street, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

/// Processing callback invoked once per delivered record.
///
/// Returning `Ok` acknowledges the delivery, returning `Err` negatively
/// acknowledges it.
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    async fn handle(&self, street: Street) -> Result<()>;
}

#[async_trait]
pub trait RecordBroker: Send + Sync + 'static {
    /// Enqueues one record without waiting for a broker-side confirmation.
    async fn publish(&self, street: &Street) -> Result<()>;

    /// Registers `handler` and starts delivering to it in the background.
    async fn consume(&self, handler: Arc<dyn DeliveryHandler>) -> Result<()>;

    /// Shuts down channel then connection. Every step is attempted even if
    /// an earlier one failed; the first error is returned.
    async fn close(&self) -> Result<()>;

    fn connection_state(&self) -> watch::Receiver<ConnectionState>;
}
