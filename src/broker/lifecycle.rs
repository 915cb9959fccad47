//! Connection lifecycle shared by broker implementations.
//!
//! Two retry layers exist and are counted separately:
//!
//! - [`retry_connect`] retries a single connect call up to
//!   [`RetryPolicy::max_attempts`] times with a linearly growing delay.
//! - [`Lifecycle::reconnect`] repeats whole connect calls after a connection
//!   was lost, pausing a fixed delay between them, until one succeeds or
//!   [`ReconnectPolicy::max_attempts`] consecutive calls have failed.

use super::ConnectionState;
use crate::retry::{retry_connect, RetryPolicy};
use crate::{Error, Result};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

/// Owns the [`ConnectionState`] of one broker connection and the counter of
/// consecutive failed reconnects.
#[derive(Debug)]
pub struct Lifecycle {
    backend: &'static str,
    state: watch::Sender<ConnectionState>,
    reconnect_attempts: AtomicU32,
    connect_policy: RetryPolicy,
    reconnect_policy: ReconnectPolicy,
}

impl Lifecycle {
    pub fn new(
        backend: &'static str,
        connect_policy: RetryPolicy,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            backend,
            state,
            reconnect_attempts: AtomicU32::new(0),
            connect_policy,
            reconnect_policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Applies `next` if it is a legal transition from the current state.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut previous = None;
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                previous = Some(*current);
                *current = next;
                true
            } else {
                false
            }
        });

        match previous {
            Some(from) => {
                debug!(backend = self.backend, %from, to = %next, "Connection state changed");
                true
            }
            None => {
                debug!(
                    backend = self.backend,
                    current = %self.state(),
                    rejected = %next,
                    "Ignoring state transition"
                );
                false
            }
        }
    }

    /// Initial connect: `Disconnected -> Connecting -> Connected | Failed`.
    pub async fn connect<T, F, Fut>(&self, attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.transition(ConnectionState::Connecting);

        match retry_connect(&self.connect_policy, self.backend, attempt).await {
            Ok(value) => {
                self.transition(ConnectionState::Connected);
                Ok(value)
            }
            Err(e) => {
                self.transition(ConnectionState::Failed);
                Err(e)
            }
        }
    }

    /// Moves `Connected -> Reconnecting`.
    ///
    /// Returns `false` when the connection is not currently `Connected`,
    /// which means a reconnect is already running or the connection is
    /// closed; the caller must not start another one.
    pub fn begin_reconnect(&self) -> bool {
        let claimed = self.state.send_if_modified(|current| {
            if *current == ConnectionState::Connected {
                *current = ConnectionState::Reconnecting;
                true
            } else {
                false
            }
        });

        if claimed {
            warn!(backend = self.backend, "Attempting to reconnect");
        }
        claimed
    }

    /// Reconnect loop, entered after [`Lifecycle::begin_reconnect`] succeeded.
    ///
    /// Each round runs a full [`retry_connect`]. Success resets the attempt
    /// counter and moves to `Connected`. Once the counter reaches the
    /// configured maximum the state becomes `Failed` and
    /// [`Error::ReconnectExhausted`] is returned. Cancelling `cancel` stops
    /// the loop with [`Error::Shutdown`].
    pub async fn reconnect<T, F, Fut>(&self, cancel: &CancellationToken, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Shutdown),
                result = retry_connect(&self.connect_policy, self.backend, &mut attempt) => result,
            };

            match result {
                Ok(value) => {
                    self.reconnect_attempts.store(0, Ordering::SeqCst);
                    if !self.transition(ConnectionState::Connected) {
                        return Err(Error::Shutdown);
                    }
                    info!(backend = self.backend, "Reconnected");
                    return Ok(value);
                }
                Err(e) => {
                    let attempts = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    error!(
                        backend = self.backend,
                        attempt = attempts,
                        max_attempts = self.reconnect_policy.max_attempts,
                        error = %e,
                        "Reconnection failed"
                    );

                    if attempts >= self.reconnect_policy.max_attempts {
                        self.transition(ConnectionState::Failed);
                        error!(backend = self.backend, "Max reconnection attempts reached");
                        return Err(Error::ReconnectExhausted { attempts });
                    }

                    self.transition(ConnectionState::Reconnecting);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Shutdown),
                        _ = tokio::time::sleep(self.reconnect_policy.delay) => {}
                    }
                }
            }
        }
    }

    /// Moves to `Closed` unless the connection already failed.
    pub fn close(&self) -> bool {
        self.transition(ConnectionState::Closed)
    }
}
