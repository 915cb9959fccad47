use super::{dispatch, Acknowledgement, ConnectionState, DeliveryHandler, JsonSerializer, RecordBroker};
use crate::{record::Street, Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// In-process [`RecordBroker`].
///
/// Messages are stored in their wire encoding and go through the same
/// [`dispatch`] contract as a real broker. At most `prefetch` deliveries are
/// unacknowledged at once. A nacked message is put back at the tail of the
/// queue when `requeue` is set and moved to the dead letters otherwise.
pub struct MemoryBroker {
    queue: Arc<Queue>,
    consumer: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

struct Queue {
    ready: Mutex<VecDeque<Message>>,
    dead_letters: Mutex<Vec<Vec<u8>>>,
    available: Notify,
    prefetch: Arc<Semaphore>,
    requeue: bool,
    published: AtomicU64,
    acked: AtomicU64,
    nacked: AtomicU64,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
}

struct Message {
    body: Vec<u8>,
    redelivered: bool,
}

impl MemoryBroker {
    pub fn new(prefetch: usize, requeue: bool) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connected);
        Self {
            queue: Arc::new(Queue {
                ready: Mutex::new(VecDeque::new()),
                dead_letters: Mutex::new(Vec::new()),
                available: Notify::new(),
                prefetch: Arc::new(Semaphore::new(prefetch.max(1))),
                requeue,
                published: AtomicU64::new(0),
                acked: AtomicU64::new(0),
                nacked: AtomicU64::new(0),
                state,
                shutdown: CancellationToken::new(),
            }),
            consumer: tokio::sync::Mutex::new(None),
        }
    }

    /// Enqueues a raw body, bypassing serialization.
    pub fn push_raw(&self, body: impl Into<Vec<u8>>) {
        self.queue.push(Message {
            body: body.into(),
            redelivered: false,
        });
    }

    pub fn pending(&self) -> usize {
        self.queue.ready.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn published(&self) -> u64 {
        self.queue.published.load(Ordering::SeqCst)
    }

    pub fn acked(&self) -> u64 {
        self.queue.acked.load(Ordering::SeqCst)
    }

    pub fn nacked(&self) -> u64 {
        self.queue.nacked.load(Ordering::SeqCst)
    }

    pub fn dead_letters(&self) -> Vec<Vec<u8>> {
        self.queue
            .dead_letters
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    /// Simulates losing the broker for good.
    pub fn fail(&self) {
        self.queue.state.send_replace(ConnectionState::Failed);
        self.queue.shutdown.cancel();
    }
}

impl Queue {
    fn push(&self, message: Message) {
        if let Ok(mut ready) = self.ready.lock() {
            ready.push_back(message);
        }
        self.available.notify_one();
    }

    fn pop(&self) -> Option<Message> {
        self.ready.lock().ok().and_then(|mut q| q.pop_front())
    }

    fn is_open(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    async fn next(&self) -> Option<Message> {
        loop {
            if let Some(message) = self.pop() {
                return Some(message);
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = self.available.notified() => {}
            }
        }
    }

    fn settle(&self, message: Message, ack: Acknowledgement) {
        match ack {
            Acknowledgement::Ack => {
                self.acked.fetch_add(1, Ordering::SeqCst);
            }
            Acknowledgement::Nack => {
                self.nacked.fetch_add(1, Ordering::SeqCst);
                if self.requeue {
                    debug!(redelivered = message.redelivered, "Requeueing nacked message");
                    self.push(Message {
                        body: message.body,
                        redelivered: true,
                    });
                } else if let Ok(mut dead) = self.dead_letters.lock() {
                    dead.push(message.body);
                }
            }
        }
    }

    /// Runs until shutdown, then waits for every delivery still being
    /// handled so that `close` returns only once all of them are settled.
    async fn consume_loop(self: Arc<Self>, handler: Arc<dyn DeliveryHandler>) {
        let mut in_flight = JoinSet::new();

        loop {
            while in_flight.try_join_next().is_some() {}

            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = self.prefetch.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let Some(message) = self.next().await else {
                break;
            };

            let queue = self.clone();
            let handler = handler.clone();
            in_flight.spawn(async move {
                let ack = dispatch(&message.body, handler.as_ref()).await;
                queue.settle(message, ack);
                drop(permit);
            });
        }

        if !in_flight.is_empty() {
            debug!(in_flight = in_flight.len(), "Waiting for in-flight deliveries");
        }
        while in_flight.join_next().await.is_some() {}
        debug!("Memory consumer stopped");
    }
}

#[async_trait]
impl RecordBroker for MemoryBroker {
    async fn publish(&self, street: &Street) -> Result<()> {
        if !self.queue.is_open() {
            return Err(Error::NotInitialized);
        }
        let body = JsonSerializer::serialize(street).map_err(|e| Error::Publish {
            street_id: street.street_id,
            source: Box::new(e),
        })?;
        self.queue.push(Message {
            body,
            redelivered: false,
        });
        self.queue.published.fetch_add(1, Ordering::SeqCst);
        debug!(street_id = street.street_id, "Published street");
        Ok(())
    }

    async fn consume(&self, handler: Arc<dyn DeliveryHandler>) -> Result<()> {
        if !self.queue.is_open() {
            return Err(Error::NotInitialized);
        }
        let mut consumer = self.consumer.lock().await;
        if consumer.is_some() {
            return Err(Error::Validation(
                "a delivery handler is already registered".to_string(),
            ));
        }
        *consumer = Some(tokio::spawn(self.queue.clone().consume_loop(handler)));
        info!("Started consuming streets");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.queue.shutdown.cancel();
        self.queue.state.send_if_modified(|state| {
            if state.can_transition_to(ConnectionState::Closed) {
                *state = ConnectionState::Closed;
                true
            } else {
                false
            }
        });
        if let Some(handle) = self.consumer.lock().await.take() {
            let _ = handle.await;
        }
        Ok(())
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.queue.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::street;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Fails the first `failures` deliveries, tracks concurrency.
    #[derive(Default)]
    struct Flaky {
        failures: AtomicUsize,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl DeliveryHandler for Flaky {
        async fn handle(&self, _street: Street) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::processing("transient"));
            }
            Ok(())
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_nacked_message_is_redelivered() {
        let broker = MemoryBroker::new(1, true);
        let handler = Arc::new(Flaky {
            failures: AtomicUsize::new(1),
            ..Default::default()
        });

        broker.publish(&street(1)).await.unwrap();
        broker.consume(handler.clone()).await.unwrap();

        wait_until(|| broker.acked() == 1).await;
        assert_eq!(broker.nacked(), 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        broker.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_nack_without_requeue_dead_letters() {
        let broker = MemoryBroker::new(1, false);
        let handler = Arc::new(Flaky {
            failures: AtomicUsize::new(1),
            ..Default::default()
        });

        broker.publish(&street(1)).await.unwrap();
        broker.push_raw("garbage");
        broker.consume(handler.clone()).await.unwrap();

        wait_until(|| broker.nacked() == 2).await;
        assert_eq!(broker.acked(), 0);
        assert_eq!(broker.dead_letters().len(), 2);
        // The malformed body never reached the handler
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        broker.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_prefetch_bounds_unacked_deliveries() {
        let broker = MemoryBroker::new(2, true);
        let handler = Arc::new(Flaky::default());

        for id in 1..=10 {
            broker.publish(&street(id)).await.unwrap();
        }
        broker.consume(handler.clone()).await.unwrap();

        wait_until(|| broker.acked() == 10).await;
        assert!(handler.max_in_flight.load(Ordering::SeqCst) <= 2);
        broker.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_waits_for_in_flight_deliveries() {
        let broker = MemoryBroker::new(1, true);
        let handler = Arc::new(Flaky::default());

        broker.publish(&street(1)).await.unwrap();
        broker.consume(handler.clone()).await.unwrap();
        wait_until(|| handler.calls.load(Ordering::SeqCst) == 1).await;

        broker.close().await.unwrap();

        assert_eq!(handler.in_flight.load(Ordering::SeqCst), 0);
        assert_eq!(broker.acked(), 1);
    }

    #[tokio::test]
    async fn test_publish_after_close_fails() {
        let broker = MemoryBroker::new(1, true);
        broker.close().await.unwrap();

        assert!(matches!(
            broker.publish(&street(1)).await,
            Err(Error::NotInitialized)
        ));
        assert_eq!(*broker.connection_state().borrow(), ConnectionState::Closed);
    }
}
