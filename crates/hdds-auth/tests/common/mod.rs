// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scripted plugins and instrumented histories shared by integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use hdds_auth::history::{
    CacheChange, ChannelKind, EndpointFactory, MemoryWriterHistory, ReaderEndpoint, ReaderHistory,
    WriterEndpoint, WriterHistory, ENTITYID_STATELESS_WRITER,
};
use hdds_auth::security::{
    AuthConfig, AuthState, AuthStatus, AuthenticationMessage, AuthenticationPlugin,
    CryptographicPlugin, DiscoveredParticipant, HandleAllocator, HandshakeHandle,
    HandshakeMessageToken, HandshakeStart, HandshakeStep, IdentityHandle, LocalIdentity,
    MessageIdentity, ParticipantAnnouncer, ParticipantAuthListener, ParticipantCryptoHandle,
    RemoteIdentity, RetryPolicy, SecurityError, SecurityManager, SecurityPlugins, SharedSecret,
};
use hdds_auth::GUID;
use parking_lot::Mutex;

pub const LOCAL_PREFIX: [u8; 12] = [1; 12];
pub const REMOTE_PREFIX: [u8; 12] = [2; 12];
pub const PARTICIPANT_DATA: &[u8] = b"participant-data";

pub fn local_guid() -> GUID {
    GUID::participant(LOCAL_PREFIX)
}

pub fn remote_guid() -> GUID {
    GUID::participant(REMOTE_PREFIX)
}

fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

fn next<T: Copy>(queue: &Mutex<VecDeque<T>>, default: T) -> T {
    queue.lock().pop_front().unwrap_or(default)
}

// ============================================================================
// Authentication plugin
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Local {
    Ok,
    Retry,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remote {
    Ok,
    Request,
    Message,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Completed,
    Final,
    Pending,
    Fail,
}

/// Authentication plugin answering from per-operation scripts.
///
/// An empty script falls back to the happy-path default of the operation.
#[derive(Debug, Default)]
pub struct ScriptedAuth {
    handles: HandleAllocator,
    local: Mutex<VecDeque<Local>>,
    remote: Mutex<VecDeque<Remote>>,
    request: Mutex<VecDeque<Step>>,
    reply: Mutex<VecDeque<Step>>,
    process: Mutex<VecDeque<Step>>,
    pub fail_shared_secret: AtomicBool,

    pub identities_issued: AtomicUsize,
    pub identities_returned: AtomicUsize,
    pub handshakes_issued: AtomicUsize,
    pub handshakes_returned: AtomicUsize,

    pub local_calls: AtomicUsize,
    pub remote_calls: AtomicUsize,
    pub request_calls: AtomicUsize,
    pub reply_calls: AtomicUsize,
    pub process_calls: AtomicUsize,
    pub secret_calls: AtomicUsize,

    pub participant_data: Mutex<Vec<Vec<u8>>>,
    pub processed_tokens: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedAuth {
    pub fn script_local(&self, steps: &[Local]) {
        self.local.lock().extend(steps);
    }

    pub fn script_remote(&self, outcome: Remote) {
        self.remote.lock().push_back(outcome);
    }

    pub fn script_request(&self, step: Step) {
        self.request.lock().push_back(step);
    }

    pub fn script_reply(&self, step: Step) {
        self.reply.lock().push_back(step);
    }

    pub fn script_process(&self, step: Step) {
        self.process.lock().push_back(step);
    }

    pub fn identities_outstanding(&self) -> usize {
        count(&self.identities_issued) - count(&self.identities_returned)
    }

    pub fn handshakes_outstanding(&self) -> usize {
        count(&self.handshakes_issued) - count(&self.handshakes_returned)
    }

    pub fn calls(&self, counter: &AtomicUsize) -> usize {
        count(counter)
    }

    fn identity(&self) -> IdentityHandle {
        bump(&self.identities_issued);
        self.handles.issue()
    }

    fn handshake(&self) -> HandshakeHandle {
        bump(&self.handshakes_issued);
        self.handles.issue()
    }

    fn step(&self, step: Step, token: &[u8]) -> Result<HandshakeStep, SecurityError> {
        match step {
            Step::Completed => Ok(HandshakeStep::Completed),
            Step::Final => Ok(HandshakeStep::CompletedWithFinal(token.to_vec().into())),
            Step::Pending => Ok(HandshakeStep::PendingMessage(token.to_vec().into())),
            Step::Fail => Err(SecurityError::AuthenticationFailed("scripted".into())),
        }
    }

    fn start(&self, step: Step, token: &[u8]) -> Result<HandshakeStart, SecurityError> {
        let step = self.step(step, token)?;
        Ok(HandshakeStart {
            handle: self.handshake(),
            step,
        })
    }
}

impl AuthenticationPlugin for ScriptedAuth {
    fn validate_local_identity(&self, _participant: &GUID) -> Result<LocalIdentity, SecurityError> {
        bump(&self.local_calls);
        match next(&self.local, Local::Ok) {
            Local::Ok => Ok(LocalIdentity::Validated(self.identity())),
            Local::Retry => Ok(LocalIdentity::PendingRetry),
            Local::Fail => Err(SecurityError::AuthenticationFailed("scripted".into())),
        }
    }

    fn get_identity_token(&self, _local: &IdentityHandle) -> Result<Vec<u8>, SecurityError> {
        Ok(b"local-identity".to_vec())
    }

    fn validate_remote_identity(
        &self,
        _local: &IdentityHandle,
        _remote_participant: &GUID,
        _remote_identity_token: &[u8],
    ) -> Result<RemoteIdentity, SecurityError> {
        bump(&self.remote_calls);
        match next(&self.remote, Remote::Request) {
            Remote::Ok => Ok(RemoteIdentity::Validated(self.identity())),
            Remote::Request => Ok(RemoteIdentity::PendingHandshakeRequest(self.identity())),
            Remote::Message => Ok(RemoteIdentity::PendingHandshakeMessage(self.identity())),
            Remote::Fail => Err(SecurityError::AuthenticationFailed("scripted".into())),
        }
    }

    fn begin_handshake_request(
        &self,
        _initiator: &IdentityHandle,
        _replier: &IdentityHandle,
        participant_data: &[u8],
    ) -> Result<HandshakeStart, SecurityError> {
        bump(&self.request_calls);
        self.participant_data.lock().push(participant_data.to_vec());
        self.start(next(&self.request, Step::Pending), b"request")
    }

    fn begin_handshake_reply(
        &self,
        _initiator: &IdentityHandle,
        _replier: &IdentityHandle,
        _request: &HandshakeMessageToken,
        participant_data: &[u8],
    ) -> Result<HandshakeStart, SecurityError> {
        bump(&self.reply_calls);
        self.participant_data.lock().push(participant_data.to_vec());
        self.start(next(&self.reply, Step::Pending), b"reply")
    }

    fn process_handshake(
        &self,
        _handshake: &HandshakeHandle,
        message: &HandshakeMessageToken,
    ) -> Result<HandshakeStep, SecurityError> {
        bump(&self.process_calls);
        self.processed_tokens.lock().push(message.as_bytes().to_vec());
        self.step(next(&self.process, Step::Completed), b"final")
    }

    fn get_shared_secret(&self, _handshake: &HandshakeHandle) -> Result<SharedSecret, SecurityError> {
        bump(&self.secret_calls);
        if self.fail_shared_secret.load(Ordering::SeqCst) {
            return Err(SecurityError::CryptographicError("scripted".into()));
        }
        Ok(SharedSecret::new(vec![0x5E; 32]))
    }

    fn return_identity_handle(&self, handle: IdentityHandle) -> Result<(), SecurityError> {
        handle.retire();
        bump(&self.identities_returned);
        Ok(())
    }

    fn return_handshake_handle(&self, handle: HandshakeHandle) -> Result<(), SecurityError> {
        handle.retire();
        bump(&self.handshakes_returned);
        Ok(())
    }
}

// ============================================================================
// Cryptographic plugin
// ============================================================================

#[derive(Debug, Default)]
pub struct CountingCrypto {
    handles: HandleAllocator,
    pub fail_local: AtomicBool,
    pub fail_remote: AtomicBool,
    pub local_registered: AtomicUsize,
    pub remote_registered: AtomicUsize,
    pub unregistered: AtomicUsize,
    pub secrets: Mutex<Vec<Option<Vec<u8>>>>,
}

impl CountingCrypto {
    pub fn registered(&self) -> usize {
        count(&self.local_registered) + count(&self.remote_registered)
    }

    pub fn outstanding(&self) -> usize {
        self.registered() - count(&self.unregistered)
    }
}

impl CryptographicPlugin for CountingCrypto {
    fn register_local_participant(
        &self,
        _identity: &IdentityHandle,
        _participant: &GUID,
    ) -> Result<ParticipantCryptoHandle, SecurityError> {
        if self.fail_local.load(Ordering::SeqCst) {
            return Err(SecurityError::CryptographicError("scripted".into()));
        }
        bump(&self.local_registered);
        Ok(self.handles.issue())
    }

    fn register_matched_remote_participant(
        &self,
        _local: &ParticipantCryptoHandle,
        _remote_identity: &IdentityHandle,
        _remote_participant: &GUID,
        secret: Option<SharedSecret>,
    ) -> Result<ParticipantCryptoHandle, SecurityError> {
        if self.fail_remote.load(Ordering::SeqCst) {
            return Err(SecurityError::CryptographicError("scripted".into()));
        }
        self.secrets
            .lock()
            .push(secret.map(|s| s.as_bytes().to_vec()));
        bump(&self.remote_registered);
        Ok(self.handles.issue())
    }

    fn unregister_participant(&self, handle: ParticipantCryptoHandle) -> Result<(), SecurityError> {
        handle.retire();
        bump(&self.unregistered);
        Ok(())
    }
}

// ============================================================================
// Histories and endpoints
// ============================================================================

/// Memory writer history with call counters and failure injection.
pub struct InstrumentedWriter {
    inner: MemoryWriterHistory,
    pub fail_new_change: AtomicBool,
    pub fail_add_change: AtomicBool,
    pub add_calls: AtomicUsize,
    pub remove_calls: AtomicUsize,
    pub reuse_calls: AtomicUsize,
    pub release_calls: AtomicUsize,
}

impl InstrumentedWriter {
    pub fn new(guid: GUID) -> Self {
        Self {
            inner: MemoryWriterHistory::new(guid, 16),
            fail_new_change: AtomicBool::new(false),
            fail_add_change: AtomicBool::new(false),
            add_calls: AtomicUsize::new(0),
            remove_calls: AtomicUsize::new(0),
            reuse_calls: AtomicUsize::new(0),
            release_calls: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn outstanding_changes(&self) -> usize {
        self.inner.outstanding_changes()
    }

    /// Published messages, oldest first.
    pub fn messages(&self) -> Vec<(u64, AuthenticationMessage)> {
        self.inner
            .sequence_numbers()
            .into_iter()
            .filter_map(|seq| self.inner.get(seq))
            .map(|change| {
                let message = AuthenticationMessage::decode(&change.payload)
                    .expect("published payload should decode");
                (change.sequence_number, message)
            })
            .collect()
    }

    pub fn last_message(&self) -> AuthenticationMessage {
        self.messages()
            .pop()
            .map(|(_, message)| message)
            .expect("a message should have been published")
    }
}

impl WriterHistory for InstrumentedWriter {
    fn new_change(&self, size: usize) -> Option<CacheChange> {
        if self.fail_new_change.load(Ordering::SeqCst) {
            return None;
        }
        self.inner.new_change(size)
    }

    fn add_change(&self, change: CacheChange) -> Result<u64, CacheChange> {
        bump(&self.add_calls);
        if self.fail_add_change.load(Ordering::SeqCst) {
            return Err(change);
        }
        self.inner.add_change(change)
    }

    fn remove_change(&self, sequence_number: u64) -> bool {
        bump(&self.remove_calls);
        self.inner.remove_change(sequence_number)
    }

    fn remove_change_and_reuse(&self, sequence_number: u64) -> Option<CacheChange> {
        bump(&self.reuse_calls);
        self.inner.remove_change_and_reuse(sequence_number)
    }

    fn release_change(&self, change: CacheChange) {
        bump(&self.release_calls);
        self.inner.release_change(change);
    }
}

#[derive(Default)]
pub struct CountingReader {
    pub removed: AtomicUsize,
}

impl ReaderHistory for CountingReader {
    fn remove_change(&self, _change: &CacheChange) -> bool {
        bump(&self.removed);
        true
    }
}

/// Hands out the instrumented stateless endpoints; volatile ones are plain.
pub struct TestEndpoints {
    pub writer: Arc<InstrumentedWriter>,
    pub reader: Arc<CountingReader>,
    pub fail_volatile_reader: AtomicBool,
    pub created: Mutex<Vec<(ChannelKind, bool)>>,
    inbound_rx: Receiver<CacheChange>,
}

impl TestEndpoints {
    pub fn new() -> (Arc<Self>, Sender<CacheChange>) {
        let (tx, rx) = channel::unbounded();
        let endpoints = Arc::new(Self {
            writer: Arc::new(InstrumentedWriter::new(GUID::new(
                LOCAL_PREFIX,
                ENTITYID_STATELESS_WRITER,
            ))),
            reader: Arc::new(CountingReader::default()),
            fail_volatile_reader: AtomicBool::new(false),
            created: Mutex::new(Vec::new()),
            inbound_rx: rx,
        });
        (endpoints, tx)
    }
}

impl EndpointFactory for TestEndpoints {
    fn create_writer(
        &self,
        participant: GUID,
        kind: ChannelKind,
    ) -> Result<WriterEndpoint, SecurityError> {
        self.created.lock().push((kind, true));
        let guid = GUID::new(participant.prefix, kind.writer_entity_id());
        let history: Arc<dyn WriterHistory> = match kind {
            ChannelKind::Stateless => self.writer.clone() as Arc<dyn WriterHistory>,
            ChannelKind::Volatile => Arc::new(MemoryWriterHistory::new(guid, 4)),
        };
        Ok(WriterEndpoint { guid, history })
    }

    fn create_reader(
        &self,
        participant: GUID,
        kind: ChannelKind,
    ) -> Result<ReaderEndpoint, SecurityError> {
        if kind == ChannelKind::Volatile && self.fail_volatile_reader.load(Ordering::SeqCst) {
            return Err(SecurityError::ResourceExhausted("scripted".into()));
        }
        self.created.lock().push((kind, false));
        let incoming = match kind {
            ChannelKind::Stateless => self.inbound_rx.clone(),
            ChannelKind::Volatile => channel::never(),
        };
        Ok(ReaderEndpoint {
            guid: GUID::new(participant.prefix, kind.reader_entity_id()),
            history: self.reader.clone(),
            incoming,
        })
    }
}

// ============================================================================
// Listener and announcer
// ============================================================================

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<(GUID, AuthStatus)>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<(GUID, AuthStatus)> {
        self.events.lock().clone()
    }

    /// Poll until `remote` has a decision or `timeout` expires.
    pub fn wait_for(&self, remote: GUID, timeout: Duration) -> Option<AuthStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some((_, status)) = self.events.lock().iter().find(|(g, _)| *g == remote) {
                return Some(*status);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

impl ParticipantAuthListener for RecordingListener {
    fn on_participant_authentication(&self, remote: GUID, status: AuthStatus) {
        self.events.lock().push((remote, status));
    }
}

#[derive(Default)]
pub struct CountingAnnouncer {
    pub notified: Mutex<Vec<GUID>>,
}

impl ParticipantAnnouncer for CountingAnnouncer {
    fn participant_data_serialized(&self) -> Vec<u8> {
        PARTICIPANT_DATA.to_vec()
    }

    fn notify_above_remote_endpoints(&self, remote: GUID) {
        self.notified.lock().push(remote);
    }
}

/// Announcer that reads the manager back while serving a callback, the way
/// a discovery layer embeds the local identity token in its announcement.
#[derive(Default)]
pub struct ReentrantAnnouncer {
    manager: Mutex<Weak<SecurityManager>>,
    pub statuses: Mutex<Vec<(GUID, Option<AuthState>)>>,
}

impl ReentrantAnnouncer {
    pub fn attach(&self, manager: &Arc<SecurityManager>) {
        *self.manager.lock() = Arc::downgrade(manager);
    }

    fn manager(&self) -> Option<Arc<SecurityManager>> {
        self.manager.lock().upgrade()
    }
}

impl ParticipantAnnouncer for ReentrantAnnouncer {
    fn participant_data_serialized(&self) -> Vec<u8> {
        self.manager()
            .and_then(|manager| manager.local_identity_token().ok())
            .unwrap_or_default()
    }

    fn notify_above_remote_endpoints(&self, remote: GUID) {
        let status = self
            .manager()
            .and_then(|manager| manager.participant_status(remote));
        self.statuses.lock().push((remote, status));
    }
}

// ============================================================================
// Fixture
// ============================================================================

pub struct Fixture {
    pub manager: Arc<SecurityManager>,
    pub auth: Arc<ScriptedAuth>,
    pub crypto: Arc<CountingCrypto>,
    pub endpoints: Arc<TestEndpoints>,
    pub listener: Arc<RecordingListener>,
    pub announcer: Arc<CountingAnnouncer>,
    pub inbound: Sender<CacheChange>,
    next_inbound_seq: AtomicUsize,
}

impl Fixture {
    /// Manager with scripted plugins, not yet initialized. The retransmit
    /// timer is pushed out so tests drive resends explicitly.
    pub fn new() -> Self {
        Self::with_retry(RetryPolicy::default())
    }

    pub fn with_retry(retry: RetryPolicy) -> Self {
        Self::assemble(retry, true)
    }

    /// Authentication plugin only; no key material is registered.
    pub fn without_cryptography() -> Self {
        Self::assemble(RetryPolicy::default(), false)
    }

    fn assemble(retry: RetryPolicy, with_cryptography: bool) -> Self {
        let config = AuthConfig::builder()
            .resend_period(Duration::from_secs(3600))
            .receive_poll_interval(Duration::from_millis(10))
            .local_identity_retry(retry)
            .build()
            .expect("valid configuration");

        let auth = Arc::new(ScriptedAuth::default());
        let crypto = Arc::new(CountingCrypto::default());
        let (endpoints, inbound) = TestEndpoints::new();
        let listener = Arc::new(RecordingListener::default());
        let announcer = Arc::new(CountingAnnouncer::default());

        let mut plugins = SecurityPlugins::none().with_authentication(auth.clone());
        if with_cryptography {
            plugins = plugins.with_cryptography(crypto.clone());
        }
        let manager = Arc::new(SecurityManager::new(
            local_guid(),
            config,
            plugins,
            endpoints.clone(),
        ));
        manager.set_listener(listener.clone());
        manager.set_announcer(announcer.clone());

        Self {
            manager,
            auth,
            crypto,
            endpoints,
            listener,
            announcer,
            inbound,
            next_inbound_seq: AtomicUsize::new(1),
        }
    }

    pub fn initialized() -> Self {
        let fixture = Self::new();
        fixture.manager.init().expect("init should succeed");
        fixture
    }

    pub fn writer(&self) -> &InstrumentedWriter {
        &self.endpoints.writer
    }

    pub fn discover_remote(&self) -> Result<(), SecurityError> {
        self.manager
            .discovered_participant(&DiscoveredParticipant::new(remote_guid(), b"remote".to_vec()))
    }

    /// Build a message from the remote participant addressed to us.
    pub fn remote_message(
        &self,
        sequence_number: u64,
        related: MessageIdentity,
        token: &[u8],
    ) -> AuthenticationMessage {
        AuthenticationMessage::new(
            MessageIdentity::new(remote_guid(), sequence_number),
            related,
            local_guid(),
            HandshakeMessageToken::new(token.to_vec()),
        )
    }

    pub fn change_for(&self, message: &AuthenticationMessage) -> CacheChange {
        CacheChange {
            sequence_number: self.next_inbound_seq.fetch_add(1, Ordering::SeqCst) as u64,
            writer_guid: GUID::new(
                message.message_identity.source_guid.prefix,
                ENTITYID_STATELESS_WRITER,
            ),
            payload: message.encode().expect("encode should succeed"),
        }
    }

    /// Deliver synchronously, bypassing the receive worker.
    pub fn deliver(&self, message: &AuthenticationMessage) {
        self.manager.on_new_change(self.change_for(message));
    }

    pub fn events(&self) -> Vec<(GUID, AuthStatus)> {
        self.listener.events()
    }

    /// Shut down and check that every handle and registration was given back.
    pub fn assert_conserved(self) {
        self.manager.shutdown();
        assert_eq!(self.auth.identities_outstanding(), 0, "identity handles leaked");
        assert_eq!(self.auth.handshakes_outstanding(), 0, "handshake handles leaked");
        assert_eq!(self.crypto.outstanding(), 0, "crypto registrations leaked");
        assert_eq!(self.writer().outstanding_changes(), 0, "writer changes leaked");
    }
}
