//! # Lifecycle Controller
//!
//! [`TransactionProcessor`] owns the connection state, the validator
//! session and the execution tracker.
//!
//! ## Startup
//!
//! `start()` freezes the handler registry, then for each attempt:
//! connect → open channel → spawn dispatch → one `TpRegisterRequest` per
//! (family, version) → SERVING. Failed attempts back off exponentially until
//! the retry budget is spent.
//!
//! ## Supervision
//!
//! While serving, a supervisor task waits for the channel's failure callback
//! to move the state to DISCONNECTED, then either re-establishes the session
//! (fresh connection, fresh registration) or drains and terminates.
//!
//! ## Shutdown
//!
//! `stop()` moves to DRAINING, withdraws the registration, waits for
//! in-flight executions up to the drain deadline, then closes the channel.
//! The unregister exchange is charged against the same deadline, so a stop
//! takes at most `drain_timeout + 2 × drain_grace`.

use quantum_telemetry::{record_anomaly, TP_RECONNECTS};
use shared_types::{
    MessageKind, RegisterStatus, RequestEnvelope, TpRegisterRequest, TpRegisterResponse,
    TpUnregisterRequest, PROTOCOL_VERSION,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapters::TcpConnector;
use crate::channel::{ChannelOptions, FailureCallback, TransportChannel};
use crate::config::ProcessorConfig;
use crate::correlation::CorrelationTable;
use crate::dispatch::DispatchEngine;
use crate::domain::{ConnectionState, ConnectionStateCell, Endpoint, ProcessorError, WaitError};
use crate::ports::{Connector, TransactionHandler};
use crate::registry::{HandlerRegistry, Registration};
use crate::tracker::ExecutionTracker;

/// Why a processor reached STOPPED.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// `stop()` was called.
    Requested,
    /// The connection was lost and could not be re-established.
    Failed(String),
}

/// One connected, registered validator session.
struct Session {
    channel: Arc<TransportChannel>,
    correlations: CorrelationTable,
    dispatch: Option<JoinHandle<()>>,
}

impl Session {
    /// Close the channel and wait for the dispatch loop to exit.
    async fn shutdown(&mut self) {
        self.channel.close();
        if let Some(dispatch) = self.dispatch.take() {
            if let Err(e) = dispatch.await {
                warn!(error = %e, "Dispatch loop ended abnormally");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.channel.close();
    }
}

/// Why one session attempt failed.
enum AttemptError {
    Connect(String),
    Registration(String),
    Stopped,
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(reason) => write!(f, "connect: {reason}"),
            Self::Registration(reason) => write!(f, "registration: {reason}"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

struct Shared {
    id: String,
    endpoint: Endpoint,
    config: ProcessorConfig,
    connector: Arc<dyn Connector>,
    state: ConnectionStateCell,
    /// Handlers added before `start()`
    pending: parking_lot::Mutex<HandlerRegistry>,
    started: AtomicBool,
    registry: OnceLock<Arc<HandlerRegistry>>,
    tracker: ExecutionTracker,
    session: parking_lot::Mutex<Option<Session>>,
    stop_tx: watch::Sender<bool>,
    termination: watch::Sender<Option<Termination>>,
    supervisor: parking_lot::Mutex<Option<JoinHandle<()>>>,
    shutdown_lock: tokio::sync::Mutex<()>,
}

/// Transaction processor: one validator connection serving every added
/// handler.
///
/// Cloning yields another handle to the same processor.
#[derive(Clone)]
pub struct TransactionProcessor {
    shared: Arc<Shared>,
}

impl TransactionProcessor {
    /// Processor for a `tcp://host:port` endpoint.
    pub fn new(endpoint: &str, config: ProcessorConfig) -> Result<Self, ProcessorError> {
        let endpoint = Endpoint::parse(endpoint)?;
        let connector = Arc::new(TcpConnector::new(
            config.connect_timeout(),
            config.max_frame_len,
        ));
        Ok(Self::with_connector(endpoint, config, connector))
    }

    /// Processor using any transport.
    pub fn with_connector(
        endpoint: Endpoint,
        config: ProcessorConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        let (termination, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                id: Uuid::now_v7().simple().to_string(),
                endpoint,
                config,
                connector,
                state: ConnectionStateCell::new(),
                pending: parking_lot::Mutex::new(HandlerRegistry::new()),
                started: AtomicBool::new(false),
                registry: OnceLock::new(),
                tracker: ExecutionTracker::new(),
                session: parking_lot::Mutex::new(None),
                stop_tx,
                termination,
                supervisor: parking_lot::Mutex::new(None),
                shutdown_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Add a handler. Must be called before [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// - `AlreadyStarted` once `start()` has been called
    /// - `ConflictingPrefix` / `InvalidDescriptor`; the handler is not added
    pub fn add_handler<H: TransactionHandler>(&self, handler: H) -> Result<(), ProcessorError> {
        let mut pending = self.shared.pending.lock();
        if self.shared.started.load(Ordering::SeqCst) {
            return Err(ProcessorError::AlreadyStarted);
        }
        pending.register(Arc::new(handler))?;
        Ok(())
    }

    /// Connect, register every handler and begin serving.
    ///
    /// Returns once SERVING is reached. On failure the processor is STOPPED.
    ///
    /// # Errors
    ///
    /// - `NoHandlers` if nothing was added
    /// - `Connect` / `Registration` once the retry budget is spent
    /// - `Stopped` if `stop()` ran first or concurrently
    /// - `AlreadyStarted` on a second call
    pub async fn start(&self) -> Result<(), ProcessorError> {
        let registry = {
            let mut pending = self.shared.pending.lock();
            if self.shared.started.swap(true, Ordering::SeqCst) {
                return Err(ProcessorError::AlreadyStarted);
            }
            Arc::new(std::mem::take(&mut *pending))
        };
        let registry = self.shared.registry.get_or_init(|| registry).clone();

        if registry.is_empty() {
            self.shared.fail_start(&ProcessorError::NoHandlers).await;
            return Err(ProcessorError::NoHandlers);
        }

        info!(
            processor_id = %self.shared.id,
            endpoint = %self.shared.endpoint,
            handlers = registry.len(),
            "Starting transaction processor"
        );

        let session = match self.shared.establish(&registry).await {
            Ok(session) => session,
            Err(ProcessorError::Stopped) => return Err(ProcessorError::Stopped),
            Err(e) => {
                error!(error = %e, "Transaction processor failed to start");
                self.shared.fail_start(&e).await;
                return Err(e);
            }
        };
        self.shared.install(session).await?;

        let supervisor = tokio::spawn(self.shared.clone().supervise(registry));
        *self.shared.supervisor.lock() = Some(supervisor);

        info!(processor_id = %self.shared.id, "Transaction processor serving");
        Ok(())
    }

    /// Drain and stop. Idempotent; returns once STOPPED.
    ///
    /// Bounded by `drain_timeout_ms` plus twice `drain_grace_ms`: one grace
    /// period for executions to reply after their state calls are cancelled,
    /// one for aborted tasks to unwind.
    pub async fn stop(&self) {
        self.shared.shutdown(Termination::Requested, false).await;
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.current()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Wait until the processor is STOPPED and report why.
    pub async fn wait_terminated(&self) -> Termination {
        let mut rx = self.shared.termination.subscribe();
        let termination = rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|t| (*t).clone());
        termination.unwrap_or(Termination::Requested)
    }

    /// Processor identity, used in log file names.
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    pub fn in_flight(&self) -> usize {
        self.shared.tracker.in_flight()
    }
}

impl fmt::Debug for TransactionProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionProcessor")
            .field("id", &self.shared.id)
            .field("endpoint", &self.shared.endpoint)
            .field("state", &self.shared.state.current())
            .finish()
    }
}

impl Shared {
    fn stop_requested(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Connect and register, retrying with backoff.
    async fn establish(&self, registry: &Arc<HandlerRegistry>) -> Result<Session, ProcessorError> {
        let policy = &self.config.retry;
        let mut stop_rx = self.stop_tx.subscribe();
        let mut failed = 0u32;

        loop {
            if self.stop_requested() {
                return Err(ProcessorError::Stopped);
            }

            let failure = match self.attempt(registry).await {
                Ok(session) => return Ok(session),
                Err(AttemptError::Stopped) => return Err(ProcessorError::Stopped),
                Err(failure) => failure,
            };

            failed += 1;
            let _ = self.state.transition(ConnectionState::Disconnected);
            warn!(
                attempt = failed,
                max_attempts = policy.attempts(),
                error = %failure,
                "Session attempt failed"
            );

            if !policy.should_retry(failed) {
                return Err(match failure {
                    AttemptError::Connect(reason) => ProcessorError::Connect {
                        attempts: failed,
                        reason,
                    },
                    AttemptError::Registration(reason) => ProcessorError::Registration {
                        attempts: failed,
                        reason,
                    },
                    AttemptError::Stopped => ProcessorError::Stopped,
                });
            }

            let delay = policy.delay_after(failed);
            debug!(delay_ms = delay.as_millis(), "Backing off before next attempt");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop_signalled(&mut stop_rx) => return Err(ProcessorError::Stopped),
            }
        }
    }

    /// One connect-and-register attempt. Ends in SERVING on success.
    async fn attempt(&self, registry: &Arc<HandlerRegistry>) -> Result<Session, AttemptError> {
        let mut stop_rx = self.stop_tx.subscribe();

        self.state
            .transition(ConnectionState::Connecting)
            .map_err(|_| AttemptError::Stopped)?;
        let connected = tokio::select! {
            result = self.connector.connect(&self.endpoint) => result,
            _ = stop_signalled(&mut stop_rx) => return Err(AttemptError::Stopped),
        };
        let (writer, reader) = connected.map_err(|e| AttemptError::Connect(e.to_string()))?;

        self.state
            .transition(ConnectionState::Registering)
            .map_err(|_| AttemptError::Stopped)?;

        let state = self.state.clone();
        let on_failure: FailureCallback = Arc::new(move |reason: &str| {
            if state.mark_lost() {
                debug!(reason, "Connection state marked lost");
            }
        });
        let channel = Arc::new(TransportChannel::open(
            writer,
            reader,
            ChannelOptions {
                queue_depth: self.config.outbound_queue_depth,
                label: self.endpoint.to_string(),
                on_failure: Some(on_failure),
            },
        ));
        let correlations = CorrelationTable::new();
        let engine = DispatchEngine::new(
            channel.clone(),
            correlations.clone(),
            registry.clone(),
            self.tracker.clone(),
            self.state.clone(),
            self.config.state_timeout(),
        );
        let mut session = Session {
            channel,
            correlations,
            dispatch: Some(tokio::spawn(engine.run())),
        };

        for registration in registry.registrations() {
            let registered = tokio::select! {
                result = self.register_family(&session, &registration) => result,
                _ = stop_signalled(&mut stop_rx) => Err(AttemptError::Stopped),
            };
            if let Err(e) = registered {
                session.shutdown().await;
                return Err(e);
            }
        }

        if self.state.transition(ConnectionState::Serving).is_err() {
            session.shutdown().await;
            return Err(if self.stop_requested() {
                AttemptError::Stopped
            } else {
                AttemptError::Registration("connection lost after registration".to_string())
            });
        }
        Ok(session)
    }

    async fn register_family(
        &self,
        session: &Session,
        registration: &Registration,
    ) -> Result<(), AttemptError> {
        let request = TpRegisterRequest {
            family: registration.family.clone(),
            version: registration.version.clone(),
            namespaces: registration.namespaces.clone(),
            max_occupancy: self.config.max_occupancy,
            protocol_version: PROTOCOL_VERSION,
        };
        let failed = |reason: String| {
            AttemptError::Registration(format!(
                "{} {}: {reason}",
                registration.family, registration.version
            ))
        };

        let envelope = RequestEnvelope::request(&request).map_err(|e| failed(e.to_string()))?;
        let waiter = session
            .correlations
            .register(envelope.correlation_id, MessageKind::TpRegisterResponse)
            .map_err(|e| failed(e.to_string()))?;
        session
            .channel
            .send(envelope)
            .await
            .map_err(|e| failed(e.to_string()))?;

        let reply = waiter
            .wait(self.config.registration_timeout())
            .await
            .map_err(|e| failed(e.to_string()))?;
        let response: TpRegisterResponse = reply.decode().map_err(|e| failed(e.to_string()))?;

        match response.status {
            RegisterStatus::Ok => {
                info!(
                    family = %registration.family,
                    version = %registration.version,
                    namespaces = ?registration.namespaces,
                    "Registered with validator"
                );
                Ok(())
            }
            RegisterStatus::Error => Err(failed("rejected by validator".to_string())),
        }
    }

    /// Publish a freshly established session unless a stop got there first.
    async fn install(&self, mut session: Session) -> Result<(), ProcessorError> {
        {
            let mut slot = self.session.lock();
            if !self.stop_requested() {
                *slot = Some(session);
                return Ok(());
            }
        }
        session.shutdown().await;
        Err(ProcessorError::Stopped)
    }

    async fn fail_start(&self, error: &ProcessorError) {
        let _guard = self.shutdown_lock.lock().await;
        if self.state.current().is_terminal() {
            return;
        }
        self.stop_tx.send_replace(true);
        let _ = self.state.transition(ConnectionState::Stopped);
        self.finish(Termination::Failed(error.to_string()));
    }

    /// Watch for connection loss and reconnect or terminate.
    async fn supervise(self: Arc<Self>, registry: Arc<HandlerRegistry>) {
        let mut state_rx = self.state.subscribe();
        let mut stop_rx = self.stop_tx.subscribe();

        loop {
            tokio::select! {
                _ = disconnected(&mut state_rx) => {}
                _ = stop_signalled(&mut stop_rx) => return,
            }
            if self.stop_requested() {
                return;
            }

            let lost = self.session.lock().take();
            if let Some(mut session) = lost {
                session.shutdown().await;
            }

            if !self.config.reconnect {
                error!("Validator connection lost and reconnect is disabled");
                self.shutdown(
                    Termination::Failed("validator connection lost".to_string()),
                    true,
                )
                .await;
                return;
            }

            TP_RECONNECTS.inc();
            info!(endpoint = %self.endpoint, "Reconnecting to validator");
            match self.establish(&registry).await {
                Ok(session) => {
                    if self.install(session).await.is_err() {
                        return;
                    }
                    info!("Validator session re-established");
                }
                Err(ProcessorError::Stopped) => return,
                Err(e) => {
                    error!(error = %e, "Could not re-establish validator session");
                    self.shutdown(Termination::Failed(e.to_string()), true).await;
                    return;
                }
            }
        }
    }

    /// Drain and stop. `from_supervisor` skips aborting the calling task.
    async fn shutdown(&self, termination: Termination, from_supervisor: bool) {
        let _guard = self.shutdown_lock.lock().await;
        if self.state.current().is_terminal() {
            return;
        }
        self.stop_tx.send_replace(true);

        if !from_supervisor {
            let supervisor = self.supervisor.lock().take();
            if let Some(handle) = supervisor {
                handle.abort();
                let _ = handle.await;
            }
        }

        let previous = self.state.current();
        if previous == ConnectionState::Init {
            let _ = self.state.transition(ConnectionState::Stopped);
            self.finish(termination);
            return;
        }

        info!(state = %previous, in_flight = self.tracker.in_flight(), "Draining transaction processor");
        let _ = self.state.transition(ConnectionState::Draining);
        let deadline = Instant::now() + self.config.drain_timeout();

        let session = self.session.lock().take();
        if let Some(session) = session.as_ref() {
            if previous == ConnectionState::Serving {
                self.unregister(session, deadline).await;
            }
        }

        self.drain(session.as_ref(), deadline).await;

        if let Some(mut session) = session {
            session.shutdown().await;
        }
        let _ = self.state.transition(ConnectionState::Stopped);
        info!(processor_id = %self.id, "Transaction processor stopped");
        self.finish(termination);
    }

    /// Best-effort withdrawal of every registration, abandoned at `deadline`.
    async fn unregister(&self, session: &Session, deadline: Instant) {
        let exchange = async {
            let envelope = RequestEnvelope::request(&TpUnregisterRequest {})
                .map_err(|e| e.to_string())?;
            let waiter = session
                .correlations
                .register(envelope.correlation_id, MessageKind::TpUnregisterResponse)
                .map_err(|e| e.to_string())?;
            session
                .channel
                .send(envelope)
                .await
                .map_err(|e| e.to_string())?;
            waiter
                .wait(self.config.unregister_timeout())
                .await
                .map_err(|e| e.to_string())
        };

        let until = deadline.min(Instant::now() + self.config.unregister_timeout());
        match tokio::time::timeout_at(until, exchange).await {
            Ok(Ok(_)) => debug!("Unregistered from validator"),
            Ok(Err(reason)) => debug!(reason = %reason, "Unregister not acknowledged"),
            Err(_) => debug!("Unregister timed out"),
        }
    }

    /// Wait for in-flight executions, forcing them down after `deadline`.
    async fn drain(&self, session: Option<&Session>, deadline: Instant) {
        if self.tracker.in_flight() == 0 {
            return;
        }
        if tokio::time::timeout_at(deadline, self.tracker.wait_idle())
            .await
            .is_ok()
        {
            return;
        }

        warn!(
            remaining = self.tracker.in_flight(),
            drain_timeout_ms = self.config.drain_timeout_ms,
            "Drain deadline elapsed"
        );
        record_anomaly("drain_deadline");

        if let Some(session) = session {
            session.correlations.close(WaitError::ShuttingDown);
        }
        if tokio::time::timeout(self.config.drain_grace(), self.tracker.wait_idle())
            .await
            .is_ok()
        {
            return;
        }

        let aborted = self.tracker.abort_all();
        warn!(aborted, "Aborted executions still running after grace period");
        let _ = tokio::time::timeout(self.config.drain_grace(), self.tracker.wait_idle()).await;
    }

    fn finish(&self, termination: Termination) {
        self.termination.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(termination);
            true
        });
    }
}

async fn stop_signalled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stopped| *stopped).await;
}

async fn disconnected(rx: &mut watch::Receiver<ConnectionState>) {
    let _ = rx
        .wait_for(|state| *state == ConnectionState::Disconnected)
        .await;
}
