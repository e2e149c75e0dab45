//! In-process change feed for the local backend.
//!
//! The local store publishes every mutation here; subscribers get the
//! changes for their collection and owner, same as a hosted channel.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::records::normalize::row_owner;
use crate::streaming::types::ChangeNotification;

use super::api::{
    ChannelError, ChannelEvent, ChannelSpec, PushChannelProvider, Subscription, TaskHandle,
};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct LocalChangeFeed {
    tx: broadcast::Sender<ChangeNotification>,
}

impl Default for LocalChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LocalChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes a change. Returns how many subscribers will see it.
    pub fn publish(&self, change: ChangeNotification) -> usize {
        log::trace!("[CHANNEL] local publish {:?} on {}", change.op, change.kind);
        self.tx.send(change).unwrap_or(0)
    }

    /// Unfiltered receiver of every published change.
    pub fn raw_subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl PushChannelProvider for LocalChangeFeed {
    async fn subscribe(&self, spec: ChannelSpec) -> Result<Subscription, ChannelError> {
        let mut rx = self.tx.subscribe();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let filter = spec.clone();

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => {
                        if change.kind != filter.kind
                            || row_owner(&change.payload) != Some(filter.owner_id.as_str())
                        {
                            continue;
                        }
                        if out_tx.send(ChannelEvent::Change(change)).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        // the poller will catch up; force a resubscribe
                        let _ = out_tx.send(ChannelEvent::Error(format!(
                            "local feed lagged by {missed} changes"
                        )));
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        log::debug!("[CHANNEL] local subscription open on {}", spec.topic());
        Ok(Subscription::new(spec, out_rx, Box::new(TaskHandle::new(task))))
    }
}
