//! Connection lifecycle: bind state, registration replay and rebind backoff

use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// First wait before an automatic rebind attempt
const REBIND_BASE_DELAY: Duration = Duration::from_millis(100);

/// The rebind wait doubles per lost attempt up to this exponent
const REBIND_MAX_EXPONENT: u32 = 5;

/// Observable binding state of the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not bound; carries the last failure reason when one is known
    Disconnected { reason: Option<String> },
    Connecting,
    Connected,
}

/// Exponential backoff for automatic rebind attempts
#[derive(Debug)]
pub(crate) struct Backoff {
    attempt: u32,
}

impl Backoff {
    pub(crate) fn new() -> Self {
        Self { attempt: 0 }
    }

    /// Next wait: doubles per attempt, capped at the ceiling exponent
    pub(crate) fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(REBIND_MAX_EXPONENT);
        self.attempt = self.attempt.saturating_add(1);
        REBIND_BASE_DELAY * 2u32.pow(exponent)
    }
}

/// Owns the bind/unbind state machine around the transport.
///
/// Registries live in the dispatcher and survive interruptions; this type
/// decides when they are replayed to the transport and when they are torn
/// down for good.
pub struct Connection {
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    state_tx: watch::Sender<ConnectionState>,
    /// Serializes connect/disconnect so overlapping calls cannot double-bind
    op_lock: tokio::sync::Mutex<()>,
    /// Set on interruption: the transport lost its dispatch state and the
    /// registries must be replayed on the next successful bind
    registration_expired: AtomicBool,
    /// Bumped on explicit disconnect to invalidate in-flight rebind tasks
    generation: AtomicU64,
    ready_tx: watch::Sender<bool>,
}

impl Connection {
    pub(crate) fn new(transport: Arc<dyn Transport>, dispatcher: Arc<Dispatcher>) -> Self {
        let (ready_tx, _) = watch::channel(false);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected { reason: None });
        Self {
            transport,
            dispatcher,
            state_tx,
            op_lock: tokio::sync::Mutex::new(()),
            registration_expired: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            ready_tx,
        }
    }

    /// Bind to the broker. Idempotent: a call that overlaps an in-progress
    /// connect waits for it and observes the same outcome instead of issuing
    /// a second bind.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        match self.transport.connect().await {
            Ok(()) => {
                if self.registration_expired.swap(false, Ordering::SeqCst) {
                    self.dispatcher.replay_registrations().await;
                }
                self.set_state(ConnectionState::Connected);
                self.ready_tx.send_replace(true);
                tracing::info!("connected to bus");
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected {
                    reason: Some(e.to_string()),
                });
                Err(e)
            }
        }
    }

    /// Release the binding and tear down unconditionally: every pending
    /// request fails with a cancellation and both listener registries are
    /// cleared. Client intent does not survive an explicit disconnect.
    pub async fn disconnect(&self) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        self.generation.fetch_add(1, Ordering::SeqCst);

        let result = self.transport.disconnect().await;
        self.dispatcher.cancel_all_pending().await;
        self.dispatcher.clear_registrations().await;
        self.registration_expired.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected { reason: None });
        self.ready_tx.send_replace(false);
        tracing::info!("disconnected from bus");
        result
    }

    /// React to an unsolicited binding loss. Registries and pending requests
    /// are preserved; replay is deferred to the next successful bind.
    pub fn handle_interruption(&self) {
        self.registration_expired.store(true, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected {
            reason: Some("connection interrupted".to_string()),
        });
        self.ready_tx.send_replace(false);
        tracing::warn!("bus connection interrupted");
    }

    /// Spawn the automatic rebind task, retrying under exponential backoff
    /// until a bind succeeds or an explicit disconnect invalidates it.
    pub fn spawn_rebind(self: Arc<Self>) {
        let connection = self;
        let generation = connection.generation.load(Ordering::SeqCst);
        tokio::spawn(async move {
            let mut backoff = Backoff::new();
            loop {
                tokio::time::sleep(backoff.next_delay()).await;
                if connection.generation.load(Ordering::SeqCst) != generation {
                    tracing::debug!("rebind abandoned after explicit disconnect");
                    return;
                }
                match connection.connect().await {
                    Ok(()) => {
                        tracing::info!("rebind succeeded");
                        return;
                    }
                    Err(e) => tracing::warn!("rebind attempt failed: {}", e),
                }
            }
        });
    }

    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state(), ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self.state(), ConnectionState::Connecting)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self.state(), ConnectionState::Disconnected { .. })
    }

    /// Watch readiness: `true` while connected with registrations replayed
    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_replace(next);
    }
}
