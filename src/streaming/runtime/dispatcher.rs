//! Change dispatcher: the **Imperative Shell** around [`DispatchEngine`].
//!
//! Responsibilities:
//! 1. **Own the channels**: subscribe through the push provider, pump each
//!    channel's events into one inbox, unsubscribe on request.
//! 2. **Drive the engine**: feed it subscription outcomes, session refreshes
//!    and change notifications.
//! 3. **Execute commands**: apply upserts and removals to the working set and
//!    call the registered UI observers.
//!
//! One driver task runs per `initialize()`; `cleanup()` stops it and waits
//! until every handle is released.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::auth::AuthProvider;
use crate::records::EntityKind;
use crate::state::{ObserverRegistry, StateHandle, SyncNotice};
use crate::streaming::channel::{
    ChannelError, ChannelEvent, ChannelHandle, PushChannelProvider, Subscription,
};
use crate::streaming::engine::{ChannelState, DispatchEngine, EngineCommand, EngineEvent};

/// Externally visible state of one kind's channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStatus {
    pub state: ChannelState,
    pub degraded: bool,
}

type StatusMap = Arc<Mutex<BTreeMap<EntityKind, ChannelStatus>>>;

enum Inbound {
    Channel {
        kind: EntityKind,
        generation: u64,
        event: ChannelEvent,
    },
    Shutdown(oneshot::Sender<()>),
}

struct Running {
    inbox: mpsc::UnboundedSender<Inbound>,
    task: JoinHandle<()>,
}

pub struct ChangeDispatcher {
    provider: Arc<dyn PushChannelProvider>,
    auth: Arc<dyn AuthProvider>,
    state: StateHandle,
    observers: ObserverRegistry,
    running: tokio::sync::Mutex<Option<Running>>,
    status: StatusMap,
}

impl ChangeDispatcher {
    pub fn new(
        provider: Arc<dyn PushChannelProvider>,
        auth: Arc<dyn AuthProvider>,
        state: StateHandle,
        observers: ObserverRegistry,
    ) -> Self {
        Self {
            provider,
            auth,
            state,
            observers,
            running: tokio::sync::Mutex::new(None),
            status: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Tears down any previous subscriptions, then opens one channel per
    /// kind for `owner_id`. Returns once every channel is confirmed, retried
    /// or handed to polling.
    pub async fn initialize(&self, owner_id: &str) {
        let mut running = self.running.lock().await;
        if let Some(prev) = running.take() {
            log::info!("[DISPATCH] re-initialize: stopping previous channels");
            stop(prev).await;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut driver = Driver {
            engine: DispatchEngine::new(),
            provider: self.provider.clone(),
            auth: self.auth.clone(),
            state: self.state.clone(),
            observers: self.observers.clone(),
            channels: HashMap::new(),
            inbox: tx.clone(),
            generation: 0,
            status: self.status.clone(),
        };

        driver
            .process_engine(EngineEvent::Initialize {
                owner_id: owner_id.to_string(),
            })
            .await;

        let task = tokio::spawn(driver.run(rx));
        *running = Some(Running { inbox: tx, task });
        log::info!("[DISPATCH] initialized for {}", owner_id);
    }

    /// Unsubscribes every channel. Safe to call at any time, any number of times.
    pub async fn cleanup(&self) {
        let mut running = self.running.lock().await;
        match running.take() {
            Some(prev) => {
                stop(prev).await;
                log::info!("[DISPATCH] cleanup done");
            }
            None => log::debug!("[DISPATCH] cleanup: nothing subscribed"),
        }
    }

    pub fn status(&self, kind: EntityKind) -> ChannelStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .copied()
            .unwrap_or(ChannelStatus {
                state: ChannelState::Unsubscribed,
                degraded: false,
            })
    }

    pub fn channel_state(&self, kind: EntityKind) -> ChannelState {
        self.status(kind).state
    }

    pub fn is_degraded(&self, kind: EntityKind) -> bool {
        self.status(kind).degraded
    }

    /// Kinds currently left to the poller.
    pub fn degraded_kinds(&self) -> Vec<EntityKind> {
        EntityKind::ALL
            .into_iter()
            .filter(|k| self.is_degraded(*k))
            .collect()
    }
}

async fn stop(prev: Running) {
    let (ack_tx, ack_rx) = oneshot::channel();
    if prev.inbox.send(Inbound::Shutdown(ack_tx)).is_ok() {
        let _ = ack_rx.await;
    }
    let _ = prev.task.await;
}

// =====================================================================
// Driver
// =====================================================================

struct OpenChannel {
    generation: u64,
    handle: Box<dyn ChannelHandle>,
    pump: JoinHandle<()>,
}

impl OpenChannel {
    fn close(mut self) {
        self.handle.unsubscribe();
        self.pump.abort();
    }
}

struct Driver {
    engine: DispatchEngine,
    provider: Arc<dyn PushChannelProvider>,
    auth: Arc<dyn AuthProvider>,
    state: StateHandle,
    observers: ObserverRegistry,
    channels: HashMap<EntityKind, OpenChannel>,
    inbox: mpsc::UnboundedSender<Inbound>,
    generation: u64,
    status: StatusMap,
}

impl Driver {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Inbound>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                Inbound::Channel {
                    kind,
                    generation,
                    event,
                } => {
                    let current = self.channels.get(&kind).map(|c| c.generation);
                    if current != Some(generation) {
                        log::trace!("[DISPATCH] stale event for {} dropped", kind);
                        continue;
                    }
                    let event = match event {
                        ChannelEvent::Change(change) => EngineEvent::Change(change),
                        ChannelEvent::Error(reason) => EngineEvent::ChannelLost { kind, reason },
                    };
                    self.process_engine(event).await;
                }
                Inbound::Shutdown(ack) => {
                    self.process_engine(EngineEvent::Cleanup).await;
                    // anything the engine did not know about goes too
                    for (_, ch) in self.channels.drain() {
                        ch.close();
                    }
                    let _ = ack.send(());
                    break;
                }
            }
        }
        log::debug!("[DISPATCH] driver exited");
    }

    /// Feeds an event into the engine and executes the resulting commands,
    /// including the follow-up events those commands produce.
    async fn process_engine(&mut self, event: EngineEvent) {
        let mut queue = VecDeque::from([event]);

        while let Some(ev) = queue.pop_front() {
            log::trace!("[DISPATCH] engine.handle_event({:?})", ev);
            let cmds = self.engine.handle_event(ev);
            for cmd in cmds {
                self.execute_command(cmd, &mut queue).await;
            }
        }
        self.publish_status();
    }

    async fn execute_command(&mut self, cmd: EngineCommand, queue: &mut VecDeque<EngineEvent>) {
        log::trace!("[DISPATCH] cmd: {:?}", cmd);
        match cmd {
            EngineCommand::OpenChannel(spec) => {
                let kind = spec.kind;
                match self.provider.subscribe(spec).await {
                    Ok(sub) => {
                        self.install(kind, sub);
                        queue.push_back(EngineEvent::SubscribeConfirmed(kind));
                    }
                    Err(e) => {
                        log::warn!("[DISPATCH] subscribe {} failed: {}", kind, e);
                        queue.push_back(EngineEvent::SubscribeFailed {
                            kind,
                            session_invalid: matches!(e, ChannelError::SessionExpired),
                        });
                    }
                }
            }

            EngineCommand::CloseChannel(kind) => {
                if let Some(ch) = self.channels.remove(&kind) {
                    log::debug!("[DISPATCH] closing {} channel", kind);
                    ch.close();
                }
            }

            EngineCommand::RefreshSession => match self.auth.refresh_session().await {
                Ok(_) => queue.push_back(EngineEvent::SessionRefreshed),
                Err(e) => {
                    log::warn!("[DISPATCH] session refresh failed: {}", e);
                    queue.push_back(EngineEvent::SessionRefreshFailed);
                }
            },

            EngineCommand::Upsert(record) => {
                self.state.update(|ws| ws.upsert(record));
            }

            EngineCommand::Remove { kind, id } => {
                let removed = self.state.update(|ws| ws.remove(kind, &id));
                if !removed {
                    log::debug!("[DISPATCH] delete of unknown {} {}", kind, id);
                }
            }

            EngineCommand::RefreshSurfaces(surfaces) => {
                let snapshot = self.state.snapshot();
                let called = self.observers.notify(&surfaces, &snapshot);
                log::debug!("[DISPATCH] refreshed {:?} ({} callbacks)", surfaces, called);
            }

            EngineCommand::EnterDegradedMode(kind) => {
                log::info!("[DISPATCH] {} degraded to polling", kind);
                self.observers.notice(SyncNotice::Degraded { kind });
            }
        }
    }

    fn install(&mut self, kind: EntityKind, sub: Subscription) {
        if let Some(prev) = self.channels.remove(&kind) {
            prev.close();
        }
        self.generation += 1;
        let generation = self.generation;
        let inbox = self.inbox.clone();
        let Subscription {
            mut events, handle, ..
        } = sub;

        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let stop = matches!(event, ChannelEvent::Error(_));
                if inbox
                    .send(Inbound::Channel {
                        kind,
                        generation,
                        event,
                    })
                    .is_err()
                    || stop
                {
                    return;
                }
            }
            let _ = inbox.send(Inbound::Channel {
                kind,
                generation,
                event: ChannelEvent::Error("event stream ended".into()),
            });
        });

        self.channels.insert(
            kind,
            OpenChannel {
                generation,
                handle,
                pump,
            },
        );
    }

    fn publish_status(&self) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        for kind in EntityKind::ALL {
            status.insert(
                kind,
                ChannelStatus {
                    state: self.engine.channel_state(kind),
                    degraded: self.engine.is_degraded(kind),
                },
            );
        }
    }
}
