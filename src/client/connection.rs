//! Connection lifecycle management
//!
//! The [`ConnectionManager`] owns the transport and runs one supervisor task
//! per lifecycle. The supervisor opens sessions, waits for the broker's
//! acknowledgement, forwards inbound messages to the dispatch queue, and
//! applies the [`ReconnectPolicy`] when a session fails. The first `connect()`
//! caller is settled exactly once through a oneshot channel; later
//! reconnection outcomes are only logged and broadcast.

use super::reconnect::{ReconnectPolicy, ReconnectionDecision};
use super::state::{log_gave_up, log_state_transition, ConnectionEvent, ConnectionState, ConnectionStats};
use crate::error::{ClientError, ClientResult};
use crate::protocol::{InboundMessage, QoS};
use crate::transport::{Transport, TransportError, TransportEvent};
use chrono::Utc;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Time the supervisor gets to observe a shutdown signal before it is aborted
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
/// Lifecycle events buffered for slow observers
const EVENT_CAPACITY: usize = 64;

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State shared between the manager and its supervisor task
struct Shared {
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ConnectionEvent>,
    subscriptions: StdMutex<Vec<(String, QoS)>>,
    stats: StdMutex<ConnectionStats>,
}

impl Shared {
    fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state_tx,
            events_tx,
            subscriptions: StdMutex::new(Vec::new()),
            stats: StdMutex::new(ConnectionStats::default()),
        }
    }

    fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    fn transition(&self, to: ConnectionState) {
        let from = self.state_tx.send_replace(to.clone());
        if from != to {
            log_state_transition(&from, &to);
            let _ = self.events_tx.send(ConnectionEvent::StateChanged { from, to });
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events_tx.send(event);
    }

    fn subscriptions(&self) -> Vec<(String, QoS)> {
        lock(&self.subscriptions).clone()
    }

    fn track_subscription(&self, pattern: &str, qos: QoS) {
        let mut subscriptions = lock(&self.subscriptions);
        match subscriptions.iter_mut().find(|(p, _)| p == pattern) {
            Some(entry) => entry.1 = qos,
            None => subscriptions.push((pattern.to_string(), qos)),
        }
    }

    fn untrack_subscription(&self, pattern: &str) {
        lock(&self.subscriptions).retain(|(p, _)| p != pattern);
    }

    fn record_connected(&self, reconnected: bool) {
        let mut stats = lock(&self.stats);
        stats.connected_since = Some(Utc::now());
        if reconnected {
            stats.reconnect_count += 1;
        }
    }

    fn record_session_lost(&self, reason: &str) {
        {
            let mut stats = lock(&self.stats);
            stats.connected_since = None;
            stats.sessions_lost += 1;
        }
        self.emit(ConnectionEvent::SessionLost {
            reason: reason.to_string(),
        });
    }
}

struct Supervisor {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns the transport and its lifecycle state machine
pub struct ConnectionManager<T: Transport> {
    transport: Arc<T>,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    inbound: mpsc::Sender<InboundMessage>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a manager; inbound messages are forwarded, in arrival order, to `inbound`
    pub fn new(transport: T, policy: ReconnectPolicy, inbound: mpsc::Sender<InboundMessage>) -> Self {
        Self {
            transport: Arc::new(transport),
            policy,
            shared: Arc::new(Shared::new()),
            inbound,
            supervisor: Mutex::new(None),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Subscribe to lifecycle events
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events_tx.subscribe()
    }

    pub fn stats(&self) -> ConnectionStats {
        lock(&self.shared.stats).clone()
    }

    /// Subscriptions re-established on every new session
    pub fn tracked_subscriptions(&self) -> Vec<(String, QoS)> {
        self.shared.subscriptions()
    }

    /// Fail with `NotConnected` unless the state is `Connected`
    pub fn ensure_connected(&self) -> ClientResult<()> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(ClientError::not_connected(state));
        }
        Ok(())
    }

    /// Connect to the broker
    ///
    /// Resolves once the first session is acknowledged, or fails with
    /// [`ClientError::ConnectionFailed`] once the retry budget is spent. A
    /// no-op when already connected; joins the lifecycle already in progress
    /// when called while connecting.
    pub async fn connect(&self) -> ClientResult<()> {
        let mut supervisor = self.supervisor.lock().await;

        if self.is_connected() {
            debug!("Already connected to broker");
            return Ok(());
        }

        // The state, not the task handle, says whether a lifecycle is in flight:
        // a supervisor that gave up has already moved to `Closed` but may not
        // have returned yet.
        if supervisor.is_some() && self.state().is_transient() {
            drop(supervisor);
            debug!("Connection already in progress, waiting for it to settle");
            return self.wait_until_settled().await;
        }

        if let Some(stale) = supervisor.take() {
            stale.handle.abort();
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (settle_tx, settle_rx) = oneshot::channel();

        self.shared.transition(ConnectionState::Connecting);

        let task = SupervisorTask {
            transport: self.transport.clone(),
            policy: self.policy.clone(),
            shared: self.shared.clone(),
            inbound: self.inbound.clone(),
            shutdown_rx,
            settle: Some(settle_tx),
            retries: 0,
        };
        *supervisor = Some(Supervisor {
            shutdown_tx,
            handle: tokio::spawn(task.run()),
        });
        drop(supervisor);

        match settle_rx.await {
            Ok(result) => result,
            Err(_) => Err(ClientError::connection_failed(
                0,
                "connection closed before a session was established",
            )),
        }
    }

    /// Wait for an in-flight lifecycle to reach `Connected` or `Closed`
    async fn wait_until_settled(&self) -> ClientResult<()> {
        let mut state_rx = self.watch_state();
        let settled = state_rx
            .wait_for(|state| !state.is_transient())
            .await
            .map(|state| state.clone());

        match settled {
            Ok(ConnectionState::Connected) => Ok(()),
            Ok(state) => Err(ClientError::connection_failed(
                self.policy.total_attempts(),
                format!("connection settled in state {state:?}"),
            )),
            Err(_) => Err(ClientError::connection_failed(0, "state channel closed")),
        }
    }

    /// Disconnect and move to `Closed`
    ///
    /// Stops the supervisor (including a pending reconnection delay), closes
    /// the transport and forgets tracked subscriptions. Calling it again, or
    /// before ever connecting, is a no-op that leaves the state `Closed`.
    pub async fn disconnect(&self) -> ClientResult<()> {
        let mut supervisor = self.supervisor.lock().await;

        let Some(running) = supervisor.take() else {
            if self.state() != ConnectionState::Closed {
                self.shared.transition(ConnectionState::Closed);
            } else {
                debug!("Already disconnected");
            }
            return Ok(());
        };

        let _ = running.shutdown_tx.send(true);
        debug!("Sent shutdown signal to connection supervisor");

        let mut handle = running.handle;
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
            Ok(Ok(())) => debug!("Connection supervisor shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => {
                warn!("Connection supervisor ended with error: {}", e);
            }
            Err(_) => {
                warn!("Connection supervisor didn't shut down gracefully, forcing abort");
                handle.abort();
            }
            _ => {}
        }

        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "Transport close failed");
        }

        lock(&self.shared.subscriptions).clear();
        lock(&self.shared.stats).connected_since = None;
        self.shared.transition(ConnectionState::Closed);
        info!("Disconnected from broker");
        Ok(())
    }

    /// Subscribe on the transport and track the pattern for re-subscription
    pub async fn subscribe(&self, pattern: &str, qos: QoS) -> ClientResult<()> {
        self.ensure_connected()?;

        self.transport
            .subscribe(pattern, qos)
            .await
            .map_err(|source| ClientError::SubscriptionFailed {
                pattern: pattern.to_string(),
                source,
            })?;

        self.shared.track_subscription(pattern, qos);
        Ok(())
    }

    /// Remember a subscription to establish on the next acknowledged session
    pub fn track_subscription(&self, pattern: &str, qos: QoS) {
        self.shared.track_subscription(pattern, qos);
    }

    /// Unsubscribe on the transport and stop tracking the pattern
    pub async fn unsubscribe(&self, pattern: &str) -> ClientResult<()> {
        self.ensure_connected()?;

        self.transport
            .unsubscribe(pattern)
            .await
            .map_err(|source| ClientError::UnsubscribeFailed {
                pattern: pattern.to_string(),
                source,
            })?;

        self.shared.untrack_subscription(pattern);
        Ok(())
    }

    /// Hand an encoded payload to the transport
    pub(crate) async fn send(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> Result<(), TransportError> {
        self.transport.publish(topic, payload, qos).await
    }
}

impl<T: Transport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        // Can't await in Drop; stop the supervisor so it doesn't outlive us
        if let Ok(mut guard) = self.supervisor.try_lock() {
            if let Some(running) = guard.take() {
                let _ = running.shutdown_tx.send(true);
                running.handle.abort();
            }
        }
    }
}

/// How a session ended
#[derive(Debug, PartialEq)]
enum SessionEnd {
    Shutdown,
    Failed(String),
}

/// One connection lifecycle: sessions, retries and the first-connect settlement
struct SupervisorTask<T: Transport> {
    transport: Arc<T>,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    inbound: mpsc::Sender<InboundMessage>,
    shutdown_rx: watch::Receiver<bool>,
    /// Present until the original `connect()` caller has been answered
    settle: Option<oneshot::Sender<ClientResult<()>>>,
    retries: u32,
}

impl<T: Transport> SupervisorTask<T> {
    async fn run(mut self) {
        debug!("Connection supervisor started");

        loop {
            let reason = match self.run_session().await {
                SessionEnd::Shutdown => break,
                SessionEnd::Failed(reason) => reason,
            };
            warn!(reason = %reason, "Broker session ended");
            self.shared.record_session_lost(&reason);

            let shutdown_requested = *self.shutdown_rx.borrow();
            match self.policy.decide(self.retries, shutdown_requested) {
                ReconnectionDecision::Proceed { attempt, delay } => {
                    self.retries = attempt;
                    self.shared.transition(ConnectionState::Reconnecting(attempt));
                    info!(
                        "Attempting reconnection {}/{} after {}ms delay",
                        attempt,
                        self.policy.max_attempts,
                        delay.as_millis()
                    );
                    if !self.interruptible_sleep(delay).await {
                        break;
                    }
                }
                ReconnectionDecision::AbortShutdownRequested => break,
                ReconnectionDecision::AbortMaxAttemptsExceeded => {
                    self.give_up(reason);
                    break;
                }
            }
        }

        debug!("Connection supervisor stopped");
    }

    /// Open one session and serve it until it fails or shutdown is requested
    async fn run_session(&mut self) -> SessionEnd {
        self.shared.transition(ConnectionState::Connecting);

        let mut events = match self.transport.open().await {
            Ok(events) => events,
            Err(e) => return SessionEnd::Failed(e.to_string()),
        };

        let handshake = tokio::select! {
            _ = wait_for_shutdown(&mut self.shutdown_rx) => return SessionEnd::Shutdown,
            result = tokio::time::timeout(self.policy.connect_timeout, await_handshake(&mut events)) => result,
        };

        match handshake {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => return SessionEnd::Failed(reason),
            Err(_) => {
                let _ = self.transport.close().await;
                return SessionEnd::Failed(format!(
                    "no acknowledgement from broker within {}ms",
                    self.policy.connect_timeout.as_millis()
                ));
            }
        }

        if !self.on_connected().await {
            return SessionEnd::Shutdown;
        }

        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut self.shutdown_rx) => return SessionEnd::Shutdown,
                event = events.recv() => match event {
                    Some(TransportEvent::Message(message)) => {
                        if !self.forward(message).await {
                            return SessionEnd::Shutdown;
                        }
                    }
                    Some(TransportEvent::Connected) => {
                        debug!("Duplicate session acknowledgement ignored");
                    }
                    Some(TransportEvent::Error(reason)) => return SessionEnd::Failed(reason),
                    Some(TransportEvent::Closed) | None => {
                        return SessionEnd::Failed("connection closed by broker".to_string());
                    }
                },
            }
        }
    }

    /// Returns false if shutdown interrupted re-subscription
    async fn on_connected(&mut self) -> bool {
        let reconnected = self.settle.is_none();
        self.retries = 0;
        self.shared.record_connected(reconnected);
        self.shared.transition(ConnectionState::Connected);

        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                debug!("Shutdown requested during re-subscription");
                return false;
            }
            _ = self.resubscribe() => {}
        }

        if let Some(settle) = self.settle.take() {
            let _ = settle.send(Ok(()));
        }
        true
    }

    /// Re-establish tracked subscriptions on a fresh session
    async fn resubscribe(&self) {
        for (pattern, qos) in self.shared.subscriptions() {
            match self.transport.subscribe(&pattern, qos).await {
                Ok(()) => debug!(pattern = %pattern, "Re-subscribed"),
                Err(e) => warn!(pattern = %pattern, error = %e, "Failed to re-subscribe"),
            }
        }
    }

    /// Push a message onto the dispatch queue; false if shutdown interrupted the wait
    async fn forward(&mut self, message: InboundMessage) -> bool {
        tokio::select! {
            _ = wait_for_shutdown(&mut self.shutdown_rx) => false,
            result = self.inbound.send(message) => {
                if let Err(e) = result {
                    warn!(topic = %e.0.topic, "Dispatch queue closed, message dropped");
                }
                true
            }
        }
    }

    /// Perform interruptible sleep with shutdown monitoring
    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = wait_for_shutdown(&mut self.shutdown_rx) => {
                info!("Shutdown signal received during reconnection delay, stopping");
                false
            }
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn give_up(&mut self, reason: String) {
        let attempts = self.policy.total_attempts();
        let first_connect = self.settle.is_some();
        log_gave_up(attempts, &reason, first_connect);

        self.shared.transition(ConnectionState::Closed);
        self.shared.emit(ConnectionEvent::GaveUp {
            attempts,
            reason: reason.clone(),
        });

        if let Some(settle) = self.settle.take() {
            let _ = settle.send(Err(ClientError::connection_failed(attempts, reason)));
        }
    }
}

/// Resolves once shutdown is requested or the manager is gone
async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

/// Wait for the broker's acknowledgement on a freshly opened session
async fn await_handshake(events: &mut mpsc::Receiver<TransportEvent>) -> Result<(), String> {
    loop {
        match events.recv().await {
            Some(TransportEvent::Connected) => return Ok(()),
            Some(TransportEvent::Error(reason)) => return Err(reason),
            Some(TransportEvent::Closed) | None => {
                return Err("connection closed before acknowledgement".to_string());
            }
            Some(TransportEvent::Message(message)) => {
                debug!(topic = %message.topic, "Message before acknowledgement ignored");
            }
        }
    }
}
