//! # Scripted Validator
//!
//! Plays the validator side of the processor protocol over either transport.
//! Every accepted connection is served by a task that:
//!
//! - answers registration per [`ValidatorBehavior::register_status`]
//! - acknowledges unregistration and pings
//! - serves state, event and receipt calls from a store shared by all connections
//! - forwards `TpProcessResponse` and `PingResponse` frames to the test
//!
//! State replies can be delayed and jittered so that calls from concurrent
//! executions complete out of order.

use parking_lot::Mutex;
use qc_18_transaction_processor::adapters::tcp::{read_frame, write_frame};
use qc_18_transaction_processor::adapters::{memory_transport, MemoryConnector, MemoryPeer};
use qc_18_transaction_processor::{
    Endpoint, ProcessorConfig, RetryPolicy, TransactionProcessor, TransportError,
};
use shared_types::codec::DEFAULT_MAX_FRAME_LEN;
use shared_types::{
    AddStatus, CorrelationId, Event, MessageKind, PingRequest, PingResponse, ProtocolMessage,
    RegisterStatus, RequestEnvelope, StateStatus, TpEventAddRequest, TpEventAddResponse,
    TpProcessRequest, TpProcessResponse, TpReceiptAddDataRequest, TpReceiptAddDataResponse,
    TpRegisterRequest, TpRegisterResponse, TpStateDeleteRequest, TpStateDeleteResponse,
    TpStateEntry, TpStateGetRequest, TpStateGetResponse, TpStateSetRequest, TpStateSetResponse,
    TpUnregisterResponse, TransactionHeader, PROTOCOL_VERSION,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Upper bound for anything a test waits on.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

const MEMORY_ENDPOINT: &str = "tcp://validator:4004";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Memory,
    Tcp,
}

/// How connections accepted from now on are served.
#[derive(Debug, Clone)]
pub struct ValidatorBehavior {
    /// Reply to registration; `None` leaves it unanswered.
    pub register_status: Option<RegisterStatus>,
    /// Answer state, event and receipt calls
    pub answer_state: bool,
    pub state_delay: Duration,
    /// Upper bound of the extra delay added per call
    pub jitter_ms: u64,
}

impl Default for ValidatorBehavior {
    fn default() -> Self {
        Self {
            register_status: Some(RegisterStatus::Ok),
            answer_state: true,
            state_delay: Duration::ZERO,
            jitter_ms: 0,
        }
    }
}

/// Global state shared by every connection.
pub type StateStore = Arc<Mutex<BTreeMap<String, Vec<u8>>>>;

/// Processor settings with short timeouts and a fast retry budget.
pub fn fast_config() -> ProcessorConfig {
    ProcessorConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 10,
            max_delay_ms: 50,
            multiplier: 2.0,
        },
        registration_timeout_ms: 1_000,
        unregister_timeout_ms: 500,
        state_timeout_ms: 5_000,
        drain_timeout_ms: 2_000,
        drain_grace_ms: 200,
        ..ProcessorConfig::default()
    }
}

/// Execution request whose inputs and outputs are `addresses`.
pub fn process_request(
    family: &str,
    version: &str,
    addresses: Vec<String>,
    payload: Vec<u8>,
    context_id: &str,
) -> TpProcessRequest {
    TpProcessRequest {
        header: TransactionHeader {
            family_name: family.to_string(),
            family_version: version.to_string(),
            outputs: addresses.clone(),
            inputs: addresses,
            ..TransactionHeader::default()
        },
        payload,
        signature: String::new(),
        context_id: context_id.to_string(),
    }
}

/// Listens for processor connections and serves each one.
pub struct TestValidator {
    endpoint: String,
    memory: Option<MemoryConnector>,
    behavior: Arc<Mutex<ValidatorBehavior>>,
    store: StateStore,
    connections: mpsc::UnboundedReceiver<ValidatorConnection>,
    acceptor: JoinHandle<()>,
}

impl TestValidator {
    pub async fn bind(transport: Transport) -> Self {
        Self::with_behavior(transport, ValidatorBehavior::default()).await
    }

    pub async fn with_behavior(transport: Transport, behavior: ValidatorBehavior) -> Self {
        let behavior = Arc::new(Mutex::new(behavior));
        let store = StateStore::default();
        let (conn_tx, connections) = mpsc::unbounded_channel();

        match transport {
            Transport::Memory => {
                let (connector, mut validator) = memory_transport(DEFAULT_MAX_FRAME_LEN);
                let acceptor = tokio::spawn({
                    let behavior = behavior.clone();
                    let store = store.clone();
                    async move {
                        while let Some(peer) = validator.accept().await {
                            let behavior = behavior.lock().clone();
                            let conn = ValidatorConnection::memory(peer, behavior, store.clone());
                            if conn_tx.send(conn).is_err() {
                                break;
                            }
                        }
                    }
                });
                Self {
                    endpoint: MEMORY_ENDPOINT.to_string(),
                    memory: Some(connector),
                    behavior,
                    store,
                    connections,
                    acceptor,
                }
            }
            Transport::Tcp => {
                let listener = TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind validator listener");
                let port = listener.local_addr().expect("listener address").port();
                let acceptor = tokio::spawn({
                    let behavior = behavior.clone();
                    let store = store.clone();
                    async move {
                        while let Ok((stream, _)) = listener.accept().await {
                            let behavior = behavior.lock().clone();
                            let conn = ValidatorConnection::tcp(stream, behavior, store.clone());
                            if conn_tx.send(conn).is_err() {
                                break;
                            }
                        }
                    }
                });
                Self {
                    endpoint: format!("tcp://127.0.0.1:{port}"),
                    memory: None,
                    behavior,
                    store,
                    connections,
                    acceptor,
                }
            }
        }
    }

    /// A processor pointed at this validator.
    pub fn processor(&self, config: ProcessorConfig) -> TransactionProcessor {
        match &self.memory {
            Some(connector) => TransactionProcessor::with_connector(
                Endpoint::parse(&self.endpoint).expect("valid endpoint"),
                config,
                Arc::new(connector.clone()),
            ),
            None => TransactionProcessor::new(&self.endpoint, config).expect("valid endpoint"),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The in-process connector, for failure injection.
    pub fn memory_connector(&self) -> Option<&MemoryConnector> {
        self.memory.as_ref()
    }

    pub fn set_behavior(&self, behavior: ValidatorBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn store(&self) -> StateStore {
        self.store.clone()
    }

    /// The next accepted connection.
    pub async fn next_connection(&mut self) -> ValidatorConnection {
        tokio::time::timeout(REPLY_TIMEOUT, self.connections.recv())
            .await
            .expect("timed out waiting for a processor connection")
            .expect("acceptor stopped")
    }
}

impl Drop for TestValidator {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

/// What one connection observed.
struct Recorder {
    registrations: Mutex<Vec<TpRegisterRequest>>,
    registered: watch::Sender<usize>,
    unregisters: AtomicUsize,
    state_calls: Mutex<HashMap<String, Vec<MessageKind>>>,
    /// Contexts with an unanswered call
    outstanding: Mutex<HashSet<String>>,
    overlaps: AtomicUsize,
    state_requests: watch::Sender<usize>,
    events: Mutex<Vec<Event>>,
    receipts: Mutex<Vec<Vec<u8>>>,
    seq: AtomicU64,
}

impl Recorder {
    fn new() -> Self {
        Self {
            registrations: Mutex::new(Vec::new()),
            registered: watch::channel(0).0,
            unregisters: AtomicUsize::new(0),
            state_calls: Mutex::new(HashMap::new()),
            outstanding: Mutex::new(HashSet::new()),
            overlaps: AtomicUsize::new(0),
            state_requests: watch::channel(0).0,
            events: Mutex::new(Vec::new()),
            receipts: Mutex::new(Vec::new()),
            seq: AtomicU64::new(0),
        }
    }
}

/// One processor connection as seen by the validator.
///
/// Dropping it closes the connection.
pub struct ValidatorConnection {
    outbound: mpsc::UnboundedSender<RequestEnvelope>,
    replies: mpsc::UnboundedReceiver<RequestEnvelope>,
    record: Arc<Recorder>,
    tasks: Vec<JoinHandle<()>>,
}

impl ValidatorConnection {
    fn memory(mut peer: MemoryPeer, behavior: ValidatorBehavior, store: StateStore) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<RequestEnvelope>();
        let sender = peer.sender();

        let reader = tokio::spawn(async move {
            while let Some(envelope) = peer.recv().await {
                if inbound_tx.send(envelope).is_err() {
                    break;
                }
            }
        });
        let writer = tokio::spawn(async move {
            while let Some(envelope) = outbound_rx.recv().await {
                if !sender.send(&envelope) {
                    break;
                }
            }
        });
        Self::serve(inbound_rx, outbound, behavior, store, vec![reader, writer])
    }

    fn tcp(stream: TcpStream, behavior: ValidatorBehavior, store: StateStore) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<RequestEnvelope>();
        let (read_half, mut write_half) = stream.into_split();

        let reader = tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            loop {
                match read_frame(&mut reader, DEFAULT_MAX_FRAME_LEN).await {
                    Ok(Some(envelope)) => {
                        if inbound_tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    Err(TransportError::Malformed(_)) => continue,
                    Ok(None) | Err(_) => break,
                }
            }
        });
        let writer = tokio::spawn(async move {
            while let Some(envelope) = outbound_rx.recv().await {
                if write_frame(&mut write_half, &envelope, DEFAULT_MAX_FRAME_LEN)
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
        Self::serve(inbound_rx, outbound, behavior, store, vec![reader, writer])
    }

    fn serve(
        inbound: mpsc::UnboundedReceiver<RequestEnvelope>,
        outbound: mpsc::UnboundedSender<RequestEnvelope>,
        behavior: ValidatorBehavior,
        store: StateStore,
        mut tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        let record = Arc::new(Recorder::new());
        let (replies_tx, replies) = mpsc::unbounded_channel();
        let server = Server {
            outbound: outbound.clone(),
            behavior,
            store,
            record: record.clone(),
            replies: replies_tx,
        };
        tasks.push(tokio::spawn(server.run(inbound)));
        Self {
            outbound,
            replies,
            record,
            tasks,
        }
    }

    pub fn send(&self, envelope: RequestEnvelope) -> bool {
        self.outbound.send(envelope).is_ok()
    }

    /// Send an execution request, returning its correlation id.
    pub fn execute(&self, request: &TpProcessRequest) -> CorrelationId {
        let envelope = RequestEnvelope::request(request).expect("encode process request");
        let id = envelope.correlation_id;
        self.send(envelope);
        id
    }

    pub fn ping(&self) -> CorrelationId {
        let envelope = RequestEnvelope::request(&PingRequest {}).expect("encode ping");
        let id = envelope.correlation_id;
        self.send(envelope);
        id
    }

    /// Next `TpProcessResponse` or `PingResponse` from the processor.
    pub async fn next_reply(&mut self) -> RequestEnvelope {
        tokio::time::timeout(REPLY_TIMEOUT, self.replies.recv())
            .await
            .expect("timed out waiting for a reply")
            .expect("connection closed")
    }

    pub async fn next_response(&mut self) -> (CorrelationId, TpProcessResponse) {
        let envelope = self.next_reply().await;
        let response = envelope
            .decode::<TpProcessResponse>()
            .expect("execution response");
        (envelope.correlation_id, response)
    }

    /// Whether no reply arrives within `period`.
    pub async fn quiet_for(&mut self, period: Duration) -> bool {
        !matches!(
            tokio::time::timeout(period, self.replies.recv()).await,
            Ok(Some(_))
        )
    }

    pub fn registrations(&self) -> Vec<TpRegisterRequest> {
        self.record.registrations.lock().clone()
    }

    pub async fn wait_registrations(&self, count: usize) {
        wait_count(&self.record.registered, count).await;
    }

    pub fn unregisters(&self) -> usize {
        self.record.unregisters.load(Ordering::SeqCst)
    }

    /// Kinds of the context calls made for `context_id`, in arrival order.
    pub fn state_calls(&self, context_id: &str) -> Vec<MessageKind> {
        self.record
            .state_calls
            .lock()
            .get(context_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn state_request_count(&self) -> usize {
        *self.record.state_requests.borrow()
    }

    pub async fn wait_state_requests(&self, count: usize) {
        wait_count(&self.record.state_requests, count).await;
    }

    /// Calls that arrived while an earlier call of the same context was
    /// still unanswered.
    pub fn overlapping_calls(&self) -> usize {
        self.record.overlaps.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<Event> {
        self.record.events.lock().clone()
    }

    pub fn receipts(&self) -> Vec<Vec<u8>> {
        self.record.receipts.lock().clone()
    }

    /// Drop the connection from the validator side.
    pub fn disconnect(self) {}
}

impl Drop for ValidatorConnection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn wait_count(counter: &watch::Sender<usize>, count: usize) {
    let mut rx = counter.subscribe();
    tokio::time::timeout(REPLY_TIMEOUT, rx.wait_for(|n| *n >= count))
        .await
        .expect("timed out waiting for validator traffic")
        .expect("counter closed");
}

fn is_context_call(kind: MessageKind) -> bool {
    matches!(
        kind,
        MessageKind::TpStateGetRequest
            | MessageKind::TpStateSetRequest
            | MessageKind::TpStateDeleteRequest
            | MessageKind::TpEventAddRequest
            | MessageKind::TpReceiptAddDataRequest
    )
}

struct Server {
    outbound: mpsc::UnboundedSender<RequestEnvelope>,
    behavior: ValidatorBehavior,
    store: StateStore,
    record: Arc<Recorder>,
    replies: mpsc::UnboundedSender<RequestEnvelope>,
}

impl Server {
    async fn run(self, mut inbound: mpsc::UnboundedReceiver<RequestEnvelope>) {
        while let Some(envelope) = inbound.recv().await {
            let kind = envelope.message_kind;
            match kind {
                MessageKind::TpRegisterRequest => self.on_register(&envelope),
                MessageKind::TpUnregisterRequest => {
                    self.record.unregisters.fetch_add(1, Ordering::SeqCst);
                    self.reply(
                        &envelope,
                        &TpUnregisterResponse {
                            status: RegisterStatus::Ok,
                        },
                    );
                }
                MessageKind::PingRequest => self.reply(&envelope, &PingResponse {}),
                MessageKind::TpProcessResponse | MessageKind::PingResponse => {
                    let _ = self.replies.send(envelope);
                }
                _ if is_context_call(kind) => self.on_context_call(&envelope),
                _ => {}
            }
        }
    }

    fn reply<M: ProtocolMessage>(&self, request: &RequestEnvelope, message: &M) {
        if let Ok(envelope) = RequestEnvelope::reply_to(request, message) {
            let _ = self.outbound.send(envelope);
        }
    }

    fn on_register(&self, envelope: &RequestEnvelope) {
        let Ok(request) = envelope.decode::<TpRegisterRequest>() else {
            return;
        };
        self.record.registrations.lock().push(request);
        self.record.registered.send_modify(|n| *n += 1);

        if let Some(status) = self.behavior.register_status {
            self.reply(
                envelope,
                &TpRegisterResponse {
                    status,
                    protocol_version: PROTOCOL_VERSION,
                },
            );
        }
    }

    fn on_context_call(&self, envelope: &RequestEnvelope) {
        let Some((context_id, reply)) = self.apply_call(envelope) else {
            return;
        };

        self.record
            .state_calls
            .lock()
            .entry(context_id.clone())
            .or_default()
            .push(envelope.message_kind);
        if !self.record.outstanding.lock().insert(context_id.clone()) {
            self.record.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.record.state_requests.send_modify(|n| *n += 1);

        if !self.behavior.answer_state {
            return;
        }

        let delay = self.behavior.state_delay + self.jitter();
        let record = self.record.clone();
        let outbound = self.outbound.clone();
        let release = move || {
            record.outstanding.lock().remove(&context_id);
            let _ = outbound.send(reply);
        };
        if delay.is_zero() {
            release();
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                release();
            });
        }
    }

    fn jitter(&self) -> Duration {
        if self.behavior.jitter_ms == 0 {
            return Duration::ZERO;
        }
        let seq = self.record.seq.fetch_add(1, Ordering::SeqCst);
        Duration::from_millis(seq.wrapping_mul(7919) % (self.behavior.jitter_ms + 1))
    }

    /// Apply a context call to the store and build its reply.
    fn apply_call(&self, envelope: &RequestEnvelope) -> Option<(String, RequestEnvelope)> {
        let (context_id, reply) = match envelope.message_kind {
            MessageKind::TpStateGetRequest => {
                let request: TpStateGetRequest = envelope.decode().ok()?;
                let store = self.store.lock();
                let entries = request
                    .addresses
                    .iter()
                    .map(|address| TpStateEntry {
                        address: address.clone(),
                        data: store.get(address).cloned().unwrap_or_default(),
                    })
                    .collect();
                let response = TpStateGetResponse {
                    entries,
                    status: StateStatus::Ok,
                };
                (request.context_id, RequestEnvelope::reply_to(envelope, &response))
            }
            MessageKind::TpStateSetRequest => {
                let request: TpStateSetRequest = envelope.decode().ok()?;
                let mut store = self.store.lock();
                let addresses = request.entries.iter().map(|e| e.address.clone()).collect();
                for entry in request.entries {
                    store.insert(entry.address, entry.data);
                }
                let response = TpStateSetResponse {
                    addresses,
                    status: StateStatus::Ok,
                };
                (request.context_id, RequestEnvelope::reply_to(envelope, &response))
            }
            MessageKind::TpStateDeleteRequest => {
                let request: TpStateDeleteRequest = envelope.decode().ok()?;
                let mut store = self.store.lock();
                let addresses = request
                    .addresses
                    .into_iter()
                    .filter(|address| store.remove(address).is_some())
                    .collect();
                let response = TpStateDeleteResponse {
                    addresses,
                    status: StateStatus::Ok,
                };
                (request.context_id, RequestEnvelope::reply_to(envelope, &response))
            }
            MessageKind::TpEventAddRequest => {
                let request: TpEventAddRequest = envelope.decode().ok()?;
                self.record.events.lock().push(request.event);
                let response = TpEventAddResponse {
                    status: AddStatus::Ok,
                };
                (request.context_id, RequestEnvelope::reply_to(envelope, &response))
            }
            MessageKind::TpReceiptAddDataRequest => {
                let request: TpReceiptAddDataRequest = envelope.decode().ok()?;
                self.record.receipts.lock().push(request.data);
                let response = TpReceiptAddDataResponse {
                    status: AddStatus::Ok,
                };
                (request.context_id, RequestEnvelope::reply_to(envelope, &response))
            }
            _ => return None,
        };
        Some((context_id, reply.ok()?))
    }
}
