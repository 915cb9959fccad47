//! Consumer pipeline: broker deliveries into the record store.

use crate::broker::{ConnectionState, DeliveryHandler, RecordBroker};
use crate::metrics::Metrics;
use crate::record::Street;
use crate::store::RecordStore;
use crate::{Error, Result};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Delivery handler persisting each street and counting the outcome.
///
/// A fatal store error, such as a connection that could not be restored,
/// also cancels `fatal` so the pipeline can stop instead of nacking every
/// further delivery.
pub struct StreetPersister<S> {
    store: Arc<S>,
    metrics: Arc<Metrics>,
    fatal: CancellationToken,
}

impl<S: RecordStore> StreetPersister<S> {
    pub fn new(store: Arc<S>, metrics: Arc<Metrics>, fatal: CancellationToken) -> Self {
        Self {
            store,
            metrics,
            fatal,
        }
    }
}

#[async_trait]
impl<S: RecordStore> DeliveryHandler for StreetPersister<S> {
    async fn handle(&self, street: Street) -> Result<()> {
        match self.store.upsert(&street).await {
            Ok(()) => {
                self.metrics.record_processed();
                debug!(street_id = street.street_id, "Stored street");
                Ok(())
            }
            Err(e) => {
                self.metrics.record_failed(&e);
                error!(street_id = street.street_id, error = %e, "Failed to store street");
                if e.is_fatal() && !self.fatal.is_cancelled() {
                    error!(error = %e, "Store is unusable");
                    self.fatal.cancel();
                }
                Err(e)
            }
        }
    }
}

pub struct ConsumerPipeline<B, S> {
    broker: Arc<B>,
    store: Arc<S>,
    metrics: Arc<Metrics>,
    store_failed: CancellationToken,
}

impl<B: RecordBroker, S: RecordStore> ConsumerPipeline<B, S> {
    pub fn new(broker: Arc<B>, store: Arc<S>, metrics: Arc<Metrics>) -> Self {
        Self {
            broker,
            store,
            metrics,
            store_failed: CancellationToken::new(),
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Registers the persisting handler with the broker.
    pub async fn start(&self) -> Result<()> {
        let handler = StreetPersister::new(
            self.store.clone(),
            self.metrics.clone(),
            self.store_failed.clone(),
        );
        self.broker.consume(Arc::new(handler)).await
    }

    /// Runs until `shutdown` completes or the broker or the store is lost for
    /// good, then shuts down in order.
    ///
    /// Returns an error only when the broker or the store failed.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let state = self.broker.connection_state();

        let outcome = tokio::select! {
            _ = shutdown => {
                info!("Shutdown requested");
                Ok(())
            }
            _ = self.store_failed.cancelled() => {
                error!("Store connection failed permanently, stopping consumer");
                Err(Error::ConnectionLost {
                    target: "store",
                    message: "connection could not be restored".to_string(),
                })
            }
            terminal = wait_for_terminal(state) => match terminal {
                ConnectionState::Failed => {
                    error!("Broker connection failed permanently, stopping consumer");
                    Err(Error::ConnectionLost {
                        target: "broker",
                        message: "connection could not be restored".to_string(),
                    })
                }
                other => {
                    warn!(state = %other, "Broker connection ended, stopping consumer");
                    Ok(())
                }
            },
        };

        // Failures while closing are logged inside shutdown and do not change
        // the outcome
        let _ = self.shutdown().await;
        outcome
    }

    /// Closes the broker first so no new deliveries arrive, then the store.
    ///
    /// Both steps run even if the first fails; the first error is returned.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down consumer");

        let broker = self.broker.close().await;
        if let Err(e) = &broker {
            error!(error = %e, "Error closing broker");
        }

        let store = self.store.close().await;
        if let Err(e) = &store {
            error!(error = %e, "Error closing store");
        }

        let snapshot = self.metrics.snapshot();
        info!(
            processed = snapshot.processed,
            failed = snapshot.failed,
            success_rate = %snapshot.success_rate(),
            "Consumer stopped"
        );

        broker.and(store)
    }
}

async fn wait_for_terminal(mut state: watch::Receiver<ConnectionState>) -> ConnectionState {
    let terminal = state.wait_for(|s| s.is_terminal()).await.map(|s| *s);
    match terminal {
        Ok(state) => state,
        // The broker is gone without reporting a terminal state
        Err(_) => std::future::pending().await,
    }
}
