mod common;

use async_trait::async_trait;
use common::street;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use street_relay::broker::{MemoryBroker, RecordBroker};
use street_relay::source::RecordSource;
use street_relay::store::{MemoryStore, RecordStore};
use street_relay::{City, ConsumerPipeline, Error, Metrics, Publisher, Result, Street};

struct CitySource {
    streets: Vec<Street>,
}

#[async_trait]
impl RecordSource for CitySource {
    async fn streets_in_city(&self, _city: City) -> Result<Vec<Street>> {
        Ok(self.streets.clone())
    }

    async fn street_by_id(&self, street_id: i64) -> Result<Street> {
        self.streets
            .iter()
            .find(|s| s.street_id == street_id)
            .cloned()
            .ok_or_else(|| Error::Source(format!("No street found for id: {}", street_id)))
    }
}

/// Rejects the first `failures` writes, then delegates to a [`MemoryStore`].
struct FlakyStore {
    inner: MemoryStore,
    failures: AtomicUsize,
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn upsert(&self, street: &Street) -> Result<()> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Store {
                message: "temporarily unavailable".to_string(),
                source: None,
            });
        }
        self.inner.upsert(street).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_published_streets_end_up_in_store() {
    common::init_test_logging();

    let broker = Arc::new(MemoryBroker::new(2, true));
    let source = Arc::new(CitySource {
        streets: (1..=5).map(street).collect(),
    });

    // run() would close the queue, publish_all leaves it open for the consumer
    let publisher = Publisher::new(source, broker.clone(), 3);
    let report = publisher
        .publish_all(&(1..=5).map(street).collect::<Vec<_>>())
        .await
        .unwrap();
    assert_eq!(report.published, 5);
    assert_eq!(broker.published(), 5);

    let store = Arc::new(MemoryStore::new());
    let metrics = Arc::new(Metrics::new());
    let pipeline = ConsumerPipeline::new(broker.clone(), store.clone(), metrics.clone());
    pipeline.start().await.unwrap();

    wait_until(|| {
        let store = store.clone();
        async move { store.len().await == 5 }
    })
    .await;

    pipeline.shutdown().await.unwrap();

    let stored = store.all().await;
    assert_eq!(
        stored.iter().map(|s| s.street_id).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5]
    );
    assert_eq!(stored[2], street(3));
    assert_eq!(metrics.snapshot().processed, 5);
    assert_eq!(broker.acked(), 5);
}

#[tokio::test]
async fn test_redelivered_street_is_stored_once() {
    common::init_test_logging();

    let broker = Arc::new(MemoryBroker::new(1, true));
    for id in [7, 8, 7] {
        broker.publish(&street(id)).await.unwrap();
    }

    let store = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        failures: AtomicUsize::new(2),
    });
    let metrics = Arc::new(Metrics::new());
    let pipeline = ConsumerPipeline::new(broker.clone(), store.clone(), metrics.clone());
    pipeline.start().await.unwrap();

    wait_until(|| {
        let broker = broker.clone();
        async move { broker.acked() == 3 }
    })
    .await;

    pipeline.shutdown().await.unwrap();

    assert_eq!(broker.nacked(), 2);
    assert_eq!(store.inner.len().await, 2);
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.processed, 3);
    assert_eq!(snapshot.failed, 2);
}

#[tokio::test]
async fn test_malformed_message_is_rejected_without_stopping_consumer() {
    let broker = Arc::new(MemoryBroker::new(1, false));
    broker.push_raw(r#"{"streetId": "not a number"}"#);
    broker.publish(&street(1)).await.unwrap();

    let store = Arc::new(MemoryStore::new());
    let pipeline = ConsumerPipeline::new(broker.clone(), store.clone(), Arc::new(Metrics::new()));
    pipeline.start().await.unwrap();

    wait_until(|| {
        let broker = broker.clone();
        async move { broker.acked() == 1 && broker.nacked() == 1 }
    })
    .await;

    pipeline.shutdown().await.unwrap();
    assert_eq!(broker.dead_letters().len(), 1);
    assert!(store.get(1).await.is_some());
}

#[tokio::test]
async fn test_publisher_run_closes_broker() {
    let broker = Arc::new(MemoryBroker::new(1, true));
    let source = Arc::new(CitySource {
        streets: (1..=4).map(street).collect(),
    });

    let report = Publisher::new(source, broker.clone(), 3)
        .run(City::TelAviv)
        .await
        .unwrap();

    assert_eq!(report.published, 4);
    assert!(broker.publish(&street(9)).await.is_err());
}
