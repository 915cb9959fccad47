use crate::broker::{ConnectionState, RecordBroker};
use crate::record::{City, Street};
use crate::source::RecordSource;
use crate::{Error, Result};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info};

/// Outcome of one publisher run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub total: usize,
    pub published: usize,
    pub failed: usize,
}

/// Drains a [`RecordSource`] into a [`RecordBroker`].
///
/// Records are published in batches of `concurrency_limit`; a batch is fully
/// settled before the next one starts, so no more than `concurrency_limit`
/// publishes are ever in flight. A failed record is logged and counted, it
/// never stops the run. A broker that has failed for good does: the
/// remaining batches are skipped and the run ends with an error.
pub struct Publisher<S, B> {
    source: Arc<S>,
    broker: Arc<B>,
    concurrency_limit: usize,
    enrich_records: bool,
}

impl<S: RecordSource, B: RecordBroker> Publisher<S, B> {
    pub fn new(source: Arc<S>, broker: Arc<B>, concurrency_limit: usize) -> Self {
        Self {
            source,
            broker,
            concurrency_limit: concurrency_limit.max(1),
            enrich_records: true,
        }
    }

    /// Fetch each street again by id before publishing it, so the queue
    /// carries the full field set.
    pub fn with_enrichment(mut self, enrich_records: bool) -> Self {
        self.enrich_records = enrich_records;
        self
    }

    /// Publishes every street of `city`, then closes the broker.
    ///
    /// A source failure aborts the run before anything is published.
    pub async fn run(&self, city: City) -> Result<PublishReport> {
        let result = self.publish_city(city).await;

        if let Err(e) = self.broker.close().await {
            error!(error = %e, "Error closing broker after publishing");
        }
        result
    }

    async fn publish_city(&self, city: City) -> Result<PublishReport> {
        let streets = self.source.streets_in_city(city).await?;
        info!(city = %city, count = streets.len(), "Found streets");

        let report = self.publish_all(&streets).await?;
        info!(
            city = %city,
            published = report.published,
            failed = report.failed,
            "Finished publishing streets"
        );
        Ok(report)
    }

    pub async fn publish_all(&self, streets: &[Street]) -> Result<PublishReport> {
        let mut report = PublishReport {
            total: streets.len(),
            ..PublishReport::default()
        };
        let state = self.broker.connection_state();

        for batch in streets.chunks(self.concurrency_limit) {
            if *state.borrow() == ConnectionState::Failed {
                error!(
                    published = report.published,
                    failed = report.failed,
                    remaining = report.total - report.published - report.failed,
                    "Broker connection failed permanently, aborting run"
                );
                return Err(Error::ConnectionLost {
                    target: "broker",
                    message: "connection could not be restored".to_string(),
                });
            }

            let results = join_all(batch.iter().map(|street| self.publish_one(street))).await;

            for (street, result) in batch.iter().zip(results) {
                match result {
                    Ok(()) => report.published += 1,
                    Err(e) => {
                        report.failed += 1;
                        error!(
                            street_id = street.street_id,
                            error = %e,
                            "Failed to publish street"
                        );
                    }
                }
            }
        }

        Ok(report)
    }

    async fn publish_one(&self, street: &Street) -> Result<()> {
        let enriched;
        let street = if self.enrich_records {
            enriched = self.source.street_by_id(street.street_id).await?;
            &enriched
        } else {
            street
        };

        street.validate()?;
        self.broker.publish(street).await
    }
}
