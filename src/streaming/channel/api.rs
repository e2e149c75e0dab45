use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::records::EntityKind;
use crate::streaming::types::ChangeNotification;

/// One push channel: a collection filtered to a single owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelSpec {
    pub kind: EntityKind,
    pub owner_id: String,
}

impl ChannelSpec {
    pub fn new(kind: EntityKind, owner_id: impl Into<String>) -> Self {
        Self {
            kind,
            owner_id: owner_id.into(),
        }
    }

    /// Server-side row filter.
    pub fn filter(&self) -> String {
        format!("user_id=eq.{}", self.owner_id)
    }

    pub fn topic(&self) -> String {
        format!("realtime:public:{}:{}", self.kind.table(), self.filter())
    }
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("session is missing or expired")]
    SessionExpired,

    #[error("subscription rejected: {0}")]
    Rejected(String),

    #[error("channel closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),
}

/// Items delivered on an open channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Change(ChangeNotification),
    /// The channel broke; no further changes will arrive on it.
    Error(String),
}

/// Live subscription handle.
pub trait ChannelHandle: Send {
    fn unsubscribe(&mut self);
    fn is_active(&self) -> bool;
}

/// Handle backed by the background task that feeds the channel.
#[derive(Debug)]
pub struct TaskHandle {
    task: Option<JoinHandle<()>>,
}

impl TaskHandle {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }
}

impl ChannelHandle for TaskHandle {
    fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// A confirmed subscription: the handle plus the stream of events.
pub struct Subscription {
    pub spec: ChannelSpec,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
    pub handle: Box<dyn ChannelHandle>,
}

impl Subscription {
    pub fn new(
        spec: ChannelSpec,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
        handle: Box<dyn ChannelHandle>,
    ) -> Self {
        Self {
            spec,
            events,
            handle,
        }
    }
}

/// Source of push notifications.
///
/// `subscribe` resolves once the server has confirmed the channel.
#[async_trait]
pub trait PushChannelProvider: Send + Sync {
    async fn subscribe(&self, spec: ChannelSpec) -> Result<Subscription, ChannelError>;
}
