use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use super::types::ResultRecord;

/// Handle check loops use to hand results to the publisher.
///
/// Closing the sink drops the only sender, so the publisher drains what was
/// already queued and stops. Once `close` returns no further result is
/// accepted.
#[derive(Clone)]
pub struct ResultSink {
    tx: Arc<RwLock<Option<mpsc::Sender<ResultRecord>>>>,
}

impl ResultSink {
    /// Create a sink backed by a queue of `capacity` results
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ResultRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Arc::new(RwLock::new(Some(tx))) }, rx)
    }

    /// Queue a result; returns false when it was dropped
    pub fn publish(&self, record: ResultRecord) -> bool {
        let guard = self.tx.read();
        let Some(tx) = guard.as_ref() else {
            return false;
        };

        match tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(record)) => {
                warn!(check_id = record.check_id, "Publish queue is full, dropping result");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn close(&self) {
        self.tx.write().take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.read().as_ref().is_none_or(mpsc::Sender::is_closed)
    }
}
