//! ChangeFeed — polls the store's change log and feeds the dispatcher.
//!
//! A batch is acknowledged (trimmed from the log) only when every record in
//! it succeeded; otherwise it stays put and is redelivered on the next poll.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use mds_core::MdsConfig;
use mds_state::{StateStore, StreamRecord};

use crate::dispatch::{BatchReport, ChangeDispatcher};
use crate::error::{TaggerError, TaggerResult};

pub struct ChangeFeed {
    store: Arc<StateStore>,
    dispatcher: ChangeDispatcher<StateStore>,
    batch_size: usize,
    poll_interval: Duration,
}

impl ChangeFeed {
    pub fn new(
        store: Arc<StateStore>,
        dispatcher: ChangeDispatcher<StateStore>,
        batch_size: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            batch_size: batch_size.max(1),
            poll_interval,
        }
    }

    pub fn from_config(store: Arc<StateStore>, config: &MdsConfig) -> TaggerResult<Self> {
        let dispatcher = ChangeDispatcher::from_config(Arc::clone(&store), config)?;
        Ok(Self::new(
            store,
            dispatcher,
            config.stream.batch_size,
            config.stream_poll_interval()?,
        ))
    }

    /// Dispatch the oldest pending batch. `None` when the log is empty.
    pub async fn poll_once(&self) -> TaggerResult<Option<BatchReport>> {
        let store = Arc::clone(&self.store);
        let limit = self.batch_size;
        let changes = tokio::task::spawn_blocking(move || store.read_changes(limit))
            .await
            .map_err(|e| TaggerError::Join(e.to_string()))??;
        let Some(last) = changes.last().map(|(seq, _)| *seq) else {
            return Ok(None);
        };

        let records: Vec<StreamRecord> = changes.into_iter().map(|(_, record)| record).collect();
        let report = self.dispatcher.dispatch(&records).await;
        if report.is_success() {
            let store = Arc::clone(&self.store);
            let acked = tokio::task::spawn_blocking(move || store.ack_changes(last))
                .await
                .map_err(|e| TaggerError::Join(e.to_string()))??;
            debug!(up_to = last, acked, "batch acknowledged");
        } else {
            warn!(
                failures = report.failures.len(),
                "batch left unacknowledged for redelivery"
            );
        }
        Ok(Some(report))
    }

    /// Poll until the log is drained, a batch fails, or a short batch arrives.
    pub async fn drain(&self) -> TaggerResult<usize> {
        let mut batches = 0;
        while let Some(report) = self.poll_once().await? {
            batches += 1;
            if !report.is_success() || report.records < self.batch_size {
                break;
            }
        }
        Ok(batches)
    }

    /// Poll every `poll_interval` until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.poll_interval.as_millis() as u64,
            batch_size = self.batch_size,
            "change feed started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {
                    if let Err(e) = self.drain().await {
                        error!(error = %e, "change feed poll failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("change feed shutting down");
                    break;
                }
            }
        }
    }
}
