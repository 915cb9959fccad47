pub mod broker;
pub mod config;
pub mod consumer;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod publisher;
pub mod record;
pub mod retry;
pub mod source;
pub mod store;

pub use config::Config;
pub use consumer::{ConsumerPipeline, StreetPersister};
pub use error::{Error, Result};
pub use metrics::Metrics;
pub use publisher::{PublishReport, Publisher};
pub use record::{City, Street};
