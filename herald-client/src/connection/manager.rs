//! Connection Manager
//!
//! Owns the client's single socket. `connect` spawns a supervisor task that
//! dials with backoff, runs the I/O loop, and on loss dials again with the
//! same policy. Every state change goes through
//! [`ConnectionState::on_event`] (or an explicit `connect`/`disconnect`),
//! is observable through a watch channel, and is published to local
//! subscribers as a `connection:state` message.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use herald_broker::{
    notify_subscribers, ConnectionState, Dispatcher, SubscriberRegistry, Transport,
    TransportEvent,
};
use herald_protocol::{actions, Message, MessageCodec};
use herald_utils::{HeraldError, Result};

use super::addr::{ServerAddr, StreamTrait};
use crate::config::ReconnectPolicy;

type Stream = Framed<Box<dyn StreamTrait>, MessageCodec>;

/// Sender half of the live session's outbound queue, tagged with the
/// supervisor generation that created it
struct Outbound {
    epoch: u64,
    tx: mpsc::Sender<Message>,
}

pub struct ConnectionManager {
    addr: ServerAddr,
    policy: ReconnectPolicy,
    outbound_buffer: usize,
    registry: Arc<SubscriberRegistry>,
    state_tx: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<Outbound>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    /// Bumped by every connect/disconnect; a supervisor from an older
    /// generation can no longer change state.
    epoch: AtomicU64,
}

impl ConnectionManager {
    pub fn new(
        addr: ServerAddr,
        policy: ReconnectPolicy,
        outbound_buffer: usize,
        registry: Arc<SubscriberRegistry>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            addr,
            policy,
            outbound_buffer: outbound_buffer.max(1),
            registry,
            state_tx,
            outbound: Mutex::new(None),
            supervisor: Mutex::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn addr(&self) -> &ServerAddr {
        &self.addr
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Wait until the state equals `target`
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<()> {
        let mut rx = self.state_tx.subscribe();
        rx.wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| HeraldError::ConnectionClosed)
    }

    /// Wait until connected, or fail once retries are exhausted
    pub async fn wait_connected(&self) -> Result<()> {
        let mut rx = self.state_tx.subscribe();
        let state = *rx
            .wait_for(|state| {
                matches!(
                    state,
                    ConnectionState::Connected
                        | ConnectionState::Failed
                        | ConnectionState::Disconnected
                )
            })
            .await
            .map_err(|_| HeraldError::ConnectionClosed)?;

        match state {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Failed => Err(HeraldError::ReconnectExhausted {
                attempts: self.policy.max_attempts,
            }),
            _ => Err(HeraldError::ConnectionClosed),
        }
    }

    /// Start connecting in the background.
    ///
    /// Returns `false` without doing anything unless the manager is
    /// `Disconnected` or `Failed`. Must be called within a Tokio runtime.
    pub fn connect(self: &Arc<Self>) -> bool {
        if self.transition(None, ConnectionState::begin_connect).is_none() {
            debug!(state = %self.state(), addr = %self.addr, "connect() ignored");
            return false;
        }
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        info!(addr = %self.addr, "Connecting");
        let task = tokio::spawn(Arc::clone(self).supervise(epoch));
        if let Some(previous) = self.supervisor.lock().replace(task) {
            previous.abort();
        }
        true
    }

    /// Drop the connection now; queued messages are discarded
    pub fn disconnect(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.supervisor.lock().take() {
            task.abort();
        }
        self.outbound.lock().take();
        self.transition(None, |_| Some(ConnectionState::Disconnected));
    }

    /// Flush queued messages, then disconnect
    pub async fn close(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        // The session loop drains what is left in the queue and ends once
        // the sender is gone.
        self.outbound.lock().take();

        let task = self.supervisor.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!("Connection task failed: {}", e);
                }
            }
        }
        self.transition(None, |_| Some(ConnectionState::Disconnected));
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Apply `step` to the current state. With `epoch`, nothing happens once
    /// that supervisor generation is stale. Returns the state entered, if
    /// any.
    fn transition<F>(&self, epoch: Option<u64>, step: F) -> Option<ConnectionState>
    where
        F: FnOnce(ConnectionState) -> Option<ConnectionState>,
    {
        let mut entered = None;
        self.state_tx.send_if_modified(|current| {
            if epoch.is_some_and(|e| !self.is_current(e)) {
                return false;
            }
            match step(*current) {
                Some(next) if next != *current => {
                    info!(from = %current, to = %next, "Connection state changed");
                    *current = next;
                    entered = Some(next);
                    true
                }
                _ => false,
            }
        });

        if let Some(state) = entered {
            let message = Message::new(
                actions::CONNECTION_STATE,
                json!({ "state": state.as_str() }),
            );
            notify_subscribers(&self.registry, &message, None);
        }
        entered
    }

    fn apply(&self, epoch: u64, event: TransportEvent) -> Option<ConnectionState> {
        debug!(%event, "Transport event");
        self.transition(Some(epoch), |state| Some(state.on_event(&event)))
    }

    async fn supervise(self: Arc<Self>, epoch: u64) {
        let dispatcher = Dispatcher::new(Arc::clone(&self.registry), Arc::clone(&self));
        let mut reconnecting = false;

        loop {
            let Some((stream, outgoing)) = self.establish(epoch, reconnecting).await else {
                return;
            };

            self.run_session(epoch, &dispatcher, stream, outgoing).await;

            {
                let mut outbound = self.outbound.lock();
                if outbound.as_ref().is_some_and(|o| o.epoch == epoch) {
                    outbound.take();
                }
            }

            if !self.is_current(epoch) {
                debug!("Connection closed on request");
                return;
            }
            self.apply(epoch, TransportEvent::Disconnect);
            reconnecting = true;
        }
    }

    /// Dial until a stream is up or the attempt budget is spent
    async fn establish(
        &self,
        epoch: u64,
        reconnecting: bool,
    ) -> Option<(Stream, mpsc::Receiver<Message>)> {
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let delay = if reconnecting {
                Some(self.policy.delay(attempt))
            } else if attempt > 1 {
                Some(self.policy.delay(attempt - 1))
            } else {
                None
            };
            if let Some(delay) = delay {
                debug!(attempt, max_attempts, ?delay, "Waiting before next attempt");
                tokio::time::sleep(delay).await;
            }

            if !self.is_current(epoch) {
                return None;
            }

            match self.addr.connect().await {
                Ok(stream) => {
                    let (tx, rx) = mpsc::channel(self.outbound_buffer);
                    *self.outbound.lock() = Some(Outbound { epoch, tx });

                    let event = if reconnecting {
                        info!(addr = %self.addr, attempt, "Reconnected");
                        TransportEvent::Reconnect { attempt }
                    } else {
                        info!(addr = %self.addr, "Connected");
                        TransportEvent::Connect
                    };
                    self.apply(epoch, event);

                    return Some((Framed::new(stream, MessageCodec::new()), rx));
                }
                Err(e) => {
                    warn!(addr = %self.addr, attempt, max_attempts, error = %e, "Connection attempt failed");
                    let event = if reconnecting {
                        TransportEvent::ReconnectError(e.to_string())
                    } else {
                        TransportEvent::ConnectError(e.to_string())
                    };
                    self.apply(epoch, event);

                    if !e.is_retryable() {
                        error!(addr = %self.addr, error = %e, "Not retrying");
                        break;
                    }
                }
            }
        }

        error!(
            addr = %self.addr,
            "All {} connection attempts exhausted", max_attempts
        );
        self.apply(epoch, TransportEvent::ReconnectFailed);
        None
    }

    /// Pump frames both ways until either side goes away
    async fn run_session(
        &self,
        epoch: u64,
        dispatcher: &Dispatcher<Arc<ConnectionManager>>,
        stream: Stream,
        mut outgoing: mpsc::Receiver<Message>,
    ) {
        let (mut sink, mut frames) = stream.split();

        loop {
            tokio::select! {
                msg = outgoing.recv() => match msg {
                    Some(msg) => {
                        if let Err(e) = sink.send(msg).await {
                            warn!("Failed to send to server: {}", e);
                            self.apply(epoch, TransportEvent::Error(e.to_string()));
                            break;
                        }
                    }
                    None => {
                        debug!("Outbound queue closed");
                        break;
                    }
                },
                result = frames.next() => match result {
                    Some(Ok(raw)) => {
                        self.apply(epoch, TransportEvent::Data);
                        dispatcher.on_inbound(raw, None);
                    }
                    Some(Err(e)) => {
                        warn!("Failed to receive from server: {}", e);
                        self.apply(epoch, TransportEvent::Error(e.to_string()));
                        break;
                    }
                    None => {
                        info!("Server closed connection");
                        break;
                    }
                },
            }
        }
    }
}

impl Transport for ConnectionManager {
    fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Queue `message` for the socket writer; never waits
    fn send(&self, message: Message) -> bool {
        let outbound = self.outbound.lock();
        let Some(outbound) = outbound.as_ref() else {
            return false;
        };

        match outbound.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Outbound queue full, message dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}
