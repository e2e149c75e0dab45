//! Scriptable push provider for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::records::EntityKind;

use super::api::{
    ChannelError, ChannelEvent, ChannelHandle, ChannelSpec, PushChannelProvider, Subscription,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    SessionExpired,
    Rejected,
}

struct Open {
    tx: mpsc::UnboundedSender<ChannelEvent>,
    active: Arc<AtomicBool>,
}

#[derive(Default)]
struct MockInner {
    subscribes: Vec<ChannelSpec>,
    failures: HashMap<EntityKind, VecDeque<MockFailure>>,
    open: HashMap<EntityKind, Open>,
}

#[derive(Default)]
pub struct MockChannelProvider {
    inner: Mutex<MockInner>,
}

struct MockHandle {
    active: Arc<AtomicBool>,
}

impl ChannelHandle for MockHandle {
    fn unsubscribe(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl MockChannelProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `times` subscriptions for `kind` fail with `failure`.
    pub fn fail_next(&self, kind: EntityKind, failure: MockFailure, times: usize) {
        let mut inner = self.inner();
        let queue = inner.failures.entry(kind).or_default();
        queue.extend(std::iter::repeat(failure).take(times));
    }

    pub fn subscribe_calls(&self) -> Vec<ChannelSpec> {
        self.inner().subscribes.clone()
    }

    /// Channels subscribed and not yet unsubscribed.
    pub fn active_channels(&self) -> usize {
        self.inner()
            .open
            .values()
            .filter(|o| o.active.load(Ordering::SeqCst))
            .count()
    }

    pub fn is_active(&self, kind: EntityKind) -> bool {
        self.inner()
            .open
            .get(&kind)
            .is_some_and(|o| o.active.load(Ordering::SeqCst))
    }

    /// Pushes an event on the live channel for `kind`. False if none is live.
    pub fn emit(&self, kind: EntityKind, event: ChannelEvent) -> bool {
        match self.inner().open.get(&kind) {
            Some(o) if o.active.load(Ordering::SeqCst) => o.tx.send(event).is_ok(),
            _ => false,
        }
    }
}

#[async_trait]
impl PushChannelProvider for MockChannelProvider {
    async fn subscribe(&self, spec: ChannelSpec) -> Result<Subscription, ChannelError> {
        let mut inner = self.inner();
        inner.subscribes.push(spec.clone());

        if let Some(failure) = inner.failures.get_mut(&spec.kind).and_then(VecDeque::pop_front) {
            return Err(match failure {
                MockFailure::SessionExpired => ChannelError::SessionExpired,
                MockFailure::Rejected => ChannelError::Rejected("mock rejection".into()),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));
        inner.open.insert(
            spec.kind,
            Open {
                tx,
                active: active.clone(),
            },
        );
        Ok(Subscription::new(spec, rx, Box::new(MockHandle { active })))
    }
}
