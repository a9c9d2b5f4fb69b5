//! Periodic sync scheduling with manual requests.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use goalpost_common::{Error, Result};
use goalpost_gateway::RemoteGateway;
use goalpost_store::LocalStore;

use crate::engine::{SyncEngine, SyncOutcome};

/// Sync request types.
#[derive(Debug)]
pub enum SyncRequest {
    /// Run a pass now and report its outcome.
    Now,
    /// Shutdown the scheduler.
    Shutdown,
}

type Request = (SyncRequest, oneshot::Sender<Result<SyncOutcome>>);

/// Client side of the scheduler: manual requests and shutdown.
#[derive(Clone)]
pub struct SyncScheduler {
    request_tx: mpsc::Sender<Request>,
}

impl SyncScheduler {
    /// Create a scheduler firing every `period`.
    ///
    /// # Errors
    /// `InvalidInput` if `period` is zero.
    pub fn new(period: Duration) -> Result<(Self, SyncSchedulerHandle)> {
        if period.is_zero() {
            return Err(Error::InvalidInput(
                "sync interval must be greater than zero".to_string(),
            ));
        }
        let (request_tx, request_rx) = mpsc::channel(16);
        let handle = SyncSchedulerHandle { period, request_rx };
        Ok((Self { request_tx }, handle))
    }

    /// Request a pass now and wait for its outcome.
    ///
    /// # Errors
    /// - `Internal` if the scheduler is not running
    /// - Whatever the pass itself returned
    pub async fn request_sync(&self) -> Result<SyncOutcome> {
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .send((SyncRequest::Now, response_tx))
            .await
            .map_err(|_| Error::Internal("Scheduler not running".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::Internal("Failed to receive sync result".to_string()))?
    }

    /// Shutdown the scheduler.
    pub async fn shutdown(&self) {
        let (response_tx, _) = oneshot::channel();
        let _ = self
            .request_tx
            .send((SyncRequest::Shutdown, response_tx))
            .await;
    }
}

/// Background side of the scheduler.
pub struct SyncSchedulerHandle {
    period: Duration,
    request_rx: mpsc::Receiver<Request>,
}

impl SyncSchedulerHandle {
    /// Run the scheduler loop until shutdown.
    ///
    /// The first periodic pass fires immediately. Periodic passes go through
    /// `trigger_sync`, so a tick landing on a running pass is dropped by the
    /// engine's single-flight guard. Manual requests are awaited inline.
    pub async fn run<S, G>(mut self, engine: Arc<SyncEngine<S, G>>)
    where
        S: LocalStore + ?Sized + 'static,
        G: RemoteGateway + 'static,
    {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Sync scheduler started (every {:?})", self.period);

        loop {
            tokio::select! {
                request = self.request_rx.recv() => match request {
                    Some((SyncRequest::Now, response_tx)) => {
                        debug!("Processing manual sync request");
                        let _ = response_tx.send(engine.sync().await);
                    }
                    Some((SyncRequest::Shutdown, _)) | None => {
                        info!("Sync scheduler shutting down");
                        break;
                    }
                },

                _ = ticker.tick() => {
                    debug!("Triggering periodic sync");
                    engine.trigger_sync();
                }
            }
        }
    }
}
