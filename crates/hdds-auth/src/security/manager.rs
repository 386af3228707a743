// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Security manager: orchestrates participant authentication.
//!
//! The manager validates the local identity once, then runs one handshake
//! state machine per discovered remote participant. Handshake messages travel
//! over the stateless builtin endpoints; a background worker consumes inbound
//! changes and retransmits unanswered messages.
//!
//! # Locking
//!
//! All participant state lives behind a single mutex. Plugin calls run inside
//! it. Announcer and listener callbacks run outside it (participant data is
//! fetched before locking, notifications are dispatched after unlocking), so
//! they may call back into the manager.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use crate::core::GUID;
use crate::history::{
    CacheChange, ChannelKind, EndpointFactory, ReaderEndpoint, SeqNumGenerator, WriterEndpoint,
};

use super::authentication::{
    AuthenticationPlugin, HandshakeMessageToken, HandshakeStep, LocalIdentity, RemoteIdentity,
};
use super::channel::HandshakeChannel;
use super::config::AuthConfig;
use super::cryptographic::CryptographicPlugin;
use super::handle::{IdentityHandle, ParticipantCryptoHandle};
use super::handshake::{AuthState, ParticipantAuthState, Role, SentMessage};
use super::message::{AuthenticationMessage, MessageIdentity};
use super::SecurityError;

/// Plugins the manager drives. Either may be absent.
#[derive(Debug, Clone, Default)]
pub struct SecurityPlugins {
    pub authentication: Option<Arc<dyn AuthenticationPlugin>>,
    pub cryptography: Option<Arc<dyn CryptographicPlugin>>,
}

impl SecurityPlugins {
    /// No plugins: authentication disabled.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(
        authentication: Arc<dyn AuthenticationPlugin>,
        cryptography: Arc<dyn CryptographicPlugin>,
    ) -> Self {
        Self {
            authentication: Some(authentication),
            cryptography: Some(cryptography),
        }
    }

    pub fn with_authentication(mut self, plugin: Arc<dyn AuthenticationPlugin>) -> Self {
        self.authentication = Some(plugin);
        self
    }

    pub fn with_cryptography(mut self, plugin: Arc<dyn CryptographicPlugin>) -> Self {
        self.cryptography = Some(plugin);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.authentication.is_some()
    }
}

/// Final authorization decision for a remote participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthStatus {
    Authorized,
    Unauthorized,
}

/// Receives authorization decisions.
pub trait ParticipantAuthListener: Send + Sync {
    fn on_participant_authentication(&self, remote: GUID, status: AuthStatus);
}

/// Hooks into the local participant announcement.
pub trait ParticipantAnnouncer: Send + Sync {
    /// Serialized local participant data handed to the plugin when a
    /// handshake begins.
    fn participant_data_serialized(&self) -> Vec<u8>;

    /// A remote participant was authorized; its endpoints may now be matched.
    fn notify_above_remote_endpoints(&self, remote: GUID);
}

/// A remote participant as reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredParticipant {
    pub guid: GUID,
    pub identity_token: Vec<u8>,
    pub security_attributes: u32,
}

impl DiscoveredParticipant {
    pub fn new(guid: GUID, identity_token: Vec<u8>) -> Self {
        Self {
            guid,
            identity_token,
            security_attributes: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Authorized(GUID),
    Unauthorized(GUID),
}

/// What to do when sending a pending handshake message fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnSendFailure {
    /// Release everything and discard the state.
    Abort,
    /// Drop the handshake and wait for the peer's next request.
    Revert,
}

/// Local participant resources, present once `init()` succeeded.
struct LocalContext {
    identity: IdentityHandle,
    crypto: Option<ParticipantCryptoHandle>,
    channel: HandshakeChannel,
    volatile_writer: WriterEndpoint,
    volatile_reader: ReaderEndpoint,
}

struct Core {
    local: Option<LocalContext>,
    participants: HashMap<GUID, ParticipantAuthState>,
}

struct Inner {
    local_guid: GUID,
    config: AuthConfig,
    plugins: SecurityPlugins,
    endpoints: Arc<dyn EndpointFactory>,
    listener: RwLock<Option<Arc<dyn ParticipantAuthListener>>>,
    announcer: RwLock<Option<Arc<dyn ParticipantAnnouncer>>>,
    core: Mutex<Core>,
    message_seq: SeqNumGenerator,
}

/// Stops the receive worker on drop.
///
/// Dropping the sender disconnects the stop channel, which wakes the worker.
struct Worker {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn stop(&mut self) {
        drop(self.stop_tx.take());
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("[security] receive worker panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Participant authentication orchestrator.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use hdds_auth::history::MemoryEndpointFactory;
/// use hdds_auth::security::{AuthConfig, SecurityManager, SecurityPlugins};
/// use hdds_auth::GUID;
///
/// let manager = SecurityManager::new(
///     GUID::participant([1; 12]),
///     AuthConfig::default(),
///     SecurityPlugins::none(),
///     Arc::new(MemoryEndpointFactory::new(16)),
/// );
/// // Without an authentication plugin everything is trivially accepted.
/// manager.init().expect("init should succeed");
/// assert!(!manager.is_initialized());
/// ```
pub struct SecurityManager {
    inner: Arc<Inner>,
    worker: Mutex<Option<Worker>>,
}

impl SecurityManager {
    pub fn new(
        local_guid: GUID,
        config: AuthConfig,
        plugins: SecurityPlugins,
        endpoints: Arc<dyn EndpointFactory>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                local_guid,
                config,
                plugins,
                endpoints,
                listener: RwLock::new(None),
                announcer: RwLock::new(None),
                core: Mutex::new(Core {
                    local: None,
                    participants: HashMap::new(),
                }),
                message_seq: SeqNumGenerator::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn set_listener(&self, listener: Arc<dyn ParticipantAuthListener>) {
        *self.inner.listener.write() = Some(listener);
    }

    pub fn set_announcer(&self, announcer: Arc<dyn ParticipantAnnouncer>) {
        *self.inner.announcer.write() = Some(announcer);
    }

    pub fn local_guid(&self) -> GUID {
        self.inner.local_guid
    }

    /// True once the local identity is validated and endpoints exist.
    pub fn is_initialized(&self) -> bool {
        self.inner.core.lock().local.is_some()
    }

    /// Validate the local identity and provision the builtin endpoints.
    ///
    /// Succeeds trivially when no authentication plugin is configured.
    /// Calling it again after success is a no-op.
    pub fn init(&self) -> Result<(), SecurityError> {
        let Some(auth) = self.inner.plugins.authentication.clone() else {
            log::info!("[security] no authentication plugin, authentication disabled");
            return Ok(());
        };

        let incoming = {
            let mut core = self.inner.core.lock();
            if core.local.is_some() {
                return Ok(());
            }
            let (local, incoming) = self.inner.create_local(&*auth)?;
            core.local = Some(local);
            incoming
        };

        match self.spawn_worker(incoming) {
            Ok(worker) => {
                *self.worker.lock() = Some(worker);
                log::info!(
                    "[security] local participant {} initialized",
                    self.inner.local_guid
                );
                Ok(())
            }
            Err(e) => {
                self.inner.teardown();
                Err(e)
            }
        }
    }

    fn spawn_worker(&self, incoming: Receiver<CacheChange>) -> Result<Worker, SecurityError> {
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let inner = Arc::clone(&self.inner);

        let thread = std::thread::Builder::new()
            .name("hdds-auth-rx".to_string())
            .spawn(move || inner.run_worker(incoming, stop_rx))
            .map_err(|e| {
                SecurityError::ResourceExhausted(format!("failed to spawn receive worker: {}", e))
            })?;

        Ok(Worker {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Start authenticating a newly discovered remote participant.
    ///
    /// An already known participant is left untouched.
    pub fn discovered_participant(
        &self,
        participant: &DiscoveredParticipant,
    ) -> Result<(), SecurityError> {
        let mut events = Vec::new();
        let result = self.inner.discovered(participant, &mut events);
        self.inner.dispatch(events);
        result
    }

    /// Feed one inbound change from the stateless reader.
    ///
    /// The receive worker calls this for every change announced by the
    /// reader endpoint; collaborators with their own delivery loop may call
    /// it directly.
    pub fn on_new_change(&self, change: CacheChange) {
        self.inner.on_new_change(change);
    }

    /// Retransmit every message still waiting for an answer.
    ///
    /// Returns the number of messages republished.
    pub fn resend_pending_messages(&self) -> usize {
        self.inner.resend_pending()
    }

    /// Forget a remote participant, releasing everything held for it.
    pub fn remove_participant(&self, remote: GUID) -> bool {
        self.inner.remove(remote)
    }

    pub fn participant_status(&self, remote: GUID) -> Option<AuthState> {
        self.inner
            .core
            .lock()
            .participants
            .get(&remote)
            .map(ParticipantAuthState::state)
    }

    pub fn participant_count(&self) -> usize {
        self.inner.core.lock().participants.len()
    }

    /// Identity token to advertise in discovery.
    pub fn local_identity_token(&self) -> Result<Vec<u8>, SecurityError> {
        let Some(auth) = self.inner.plugins.authentication.as_deref() else {
            return Ok(Vec::new());
        };
        let core = self.inner.core.lock();
        let local = core.local.as_ref().ok_or(SecurityError::NotInitialized)?;
        auth.get_identity_token(&local.identity)
    }

    pub fn stateless_writer_guid(&self) -> Option<GUID> {
        let core = self.inner.core.lock();
        core.local.as_ref().map(|l| l.channel.writer().guid)
    }

    /// Reliable volatile endpoints provisioned for post-authentication
    /// key exchange.
    pub fn volatile_endpoint_guids(&self) -> Option<(GUID, GUID)> {
        let core = self.inner.core.lock();
        core.local
            .as_ref()
            .map(|l| (l.volatile_writer.guid, l.volatile_reader.guid))
    }

    /// Stop the worker and release every handle. Idempotent.
    pub fn shutdown(&self) {
        let worker = self.worker.lock().take();
        drop(worker);
        self.inner.teardown();
    }
}

impl Drop for SecurityManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SecurityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityManager")
            .field("local_guid", &self.inner.local_guid)
            .field("authentication_enabled", &self.inner.plugins.is_enabled())
            .field("plugins", &self.inner.plugins)
            .finish_non_exhaustive()
    }
}

impl Inner {
    // ---------------------------------------------------------------------
    // Local participant
    // ---------------------------------------------------------------------

    fn validate_local(&self, auth: &dyn AuthenticationPlugin) -> Result<IdentityHandle, SecurityError> {
        let policy = self.config.local_identity_retry;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match auth.validate_local_identity(&self.local_guid) {
                Ok(LocalIdentity::Validated(handle)) => return Ok(handle),
                Ok(LocalIdentity::PendingRetry) => {
                    if !policy.allows(attempts) {
                        log::warn!(
                            "[security] local identity still pending after {} attempts",
                            attempts
                        );
                        return Err(SecurityError::AuthenticationFailed(format!(
                            "local identity validation pending after {} attempts",
                            attempts
                        )));
                    }
                    log::debug!("[security] local identity pending, retry #{}", attempts);
                    if !policy.backoff.is_zero() {
                        std::thread::sleep(policy.backoff);
                    }
                }
                Err(e) => {
                    log::warn!("[security] local identity rejected: {}", e);
                    return Err(e);
                }
            }
        }
    }

    fn create_local(
        &self,
        auth: &dyn AuthenticationPlugin,
    ) -> Result<(LocalContext, Receiver<CacheChange>), SecurityError> {
        let identity = self.validate_local(auth)?;

        let crypto = match self.plugins.cryptography.as_deref() {
            Some(crypto) => match crypto.register_local_participant(&identity, &self.local_guid) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    log::warn!("[security] local crypto registration failed: {}", e);
                    self.return_local(auth, identity, None);
                    return Err(e);
                }
            },
            None => None,
        };

        match self.provision() {
            Ok((stateless_writer, stateless_reader, volatile_writer, volatile_reader)) => {
                let incoming = stateless_reader.incoming.clone();
                let channel = HandshakeChannel::new(stateless_writer, stateless_reader.history);
                Ok((
                    LocalContext {
                        identity,
                        crypto,
                        channel,
                        volatile_writer,
                        volatile_reader,
                    },
                    incoming,
                ))
            }
            Err(e) => {
                log::warn!("[security] builtin endpoint creation failed: {}", e);
                self.return_local(auth, identity, crypto);
                Err(e)
            }
        }
    }

    fn provision(
        &self,
    ) -> Result<(WriterEndpoint, ReaderEndpoint, WriterEndpoint, ReaderEndpoint), SecurityError> {
        let guid = self.local_guid;
        let stateless_writer = self.endpoints.create_writer(guid, ChannelKind::Stateless)?;
        let stateless_reader = self.endpoints.create_reader(guid, ChannelKind::Stateless)?;
        let volatile_writer = self.endpoints.create_writer(guid, ChannelKind::Volatile)?;
        let volatile_reader = self.endpoints.create_reader(guid, ChannelKind::Volatile)?;
        Ok((stateless_writer, stateless_reader, volatile_writer, volatile_reader))
    }

    fn return_local(
        &self,
        auth: &dyn AuthenticationPlugin,
        identity: IdentityHandle,
        crypto: Option<ParticipantCryptoHandle>,
    ) {
        if let Some(handle) = crypto {
            match self.plugins.cryptography.as_deref() {
                Some(plugin) => {
                    if let Err(e) = plugin.unregister_participant(handle) {
                        log::error!("[security] failed to unregister local crypto: {}", e);
                    }
                }
                None => {
                    handle.retire();
                }
            }
        }
        if let Err(e) = auth.return_identity_handle(identity) {
            log::error!("[security] failed to return local identity handle: {}", e);
        }
    }

    /// Discard every remote state, then the local context.
    fn teardown(&self) {
        let Some(auth) = self.plugins.authentication.as_deref() else {
            return;
        };
        let crypto = self.plugins.cryptography.as_deref();

        let mut core = self.core.lock();
        let Core {
            local,
            participants,
        } = &mut *core;

        for (_, mut state) in participants.drain() {
            if let Some(local) = local.as_ref() {
                retire_sent(local, &mut state);
            }
            state.release(auth, crypto);
        }

        if let Some(local) = local.take() {
            log::debug!("[security] releasing local participant {}", self.local_guid);
            self.return_local(auth, local.identity, local.crypto);
        }
    }

    // ---------------------------------------------------------------------
    // Receive worker
    // ---------------------------------------------------------------------

    fn run_worker(&self, mut incoming: Receiver<CacheChange>, stop_rx: Receiver<()>) {
        let poll = self.config.receive_poll_interval;
        let resend_period = self.config.resend_period;
        let mut last_resend = Instant::now();

        log::debug!("[security] receive worker started");
        loop {
            let stop = crossbeam::select! {
                recv(incoming) -> change => {
                    match change {
                        Ok(change) => self.on_new_change(change),
                        Err(_) => {
                            log::debug!("[security] stateless reader closed");
                            incoming = channel::never();
                        }
                    }
                    false
                }
                recv(stop_rx) -> _ => true,
                default(poll) => false,
            };
            if stop {
                break;
            }

            if last_resend.elapsed() >= resend_period {
                let resent = self.resend_pending();
                if resent > 0 {
                    log::trace!("[security] resent {} handshake message(s)", resent);
                }
                last_resend = Instant::now();
            }
        }
        log::debug!("[security] receive worker stopped");
    }

    fn dispatch(&self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        let listener = self.listener.read().clone();
        let announcer = self.announcer.read().clone();

        for event in events {
            match event {
                Event::Authorized(remote) => {
                    log::info!("[security] participant {} authorized", remote);
                    if let Some(announcer) = &announcer {
                        announcer.notify_above_remote_endpoints(remote);
                    }
                    if let Some(listener) = &listener {
                        listener.on_participant_authentication(remote, AuthStatus::Authorized);
                    }
                }
                Event::Unauthorized(remote) => {
                    log::info!("[security] participant {} not authorized", remote);
                    if let Some(listener) = &listener {
                        listener.on_participant_authentication(remote, AuthStatus::Unauthorized);
                    }
                }
            }
        }
    }

    fn participant_data(&self) -> Vec<u8> {
        self.announcer
            .read()
            .as_ref()
            .map(|a| a.participant_data_serialized())
            .unwrap_or_default()
    }

    // ---------------------------------------------------------------------
    // Discovery
    // ---------------------------------------------------------------------

    fn discovered(
        &self,
        participant: &DiscoveredParticipant,
        events: &mut Vec<Event>,
    ) -> Result<(), SecurityError> {
        let Some(auth) = self.plugins.authentication.as_deref() else {
            return Ok(());
        };
        let remote = participant.guid;
        if remote == self.local_guid {
            log::trace!("[security] ignoring discovery of the local participant");
            return Ok(());
        }
        log::debug!(
            "[security] discovered {} (security attributes {:#010x})",
            remote,
            participant.security_attributes
        );
        // Fetched before locking: announcers may call back into the manager.
        let data = self.participant_data();

        let mut core = self.core.lock();
        let Core {
            local,
            participants,
        } = &mut *core;
        let local = local.as_ref().ok_or(SecurityError::NotInitialized)?;

        let Entry::Vacant(slot) = participants.entry(remote) else {
            log::trace!("[security] {} already known", remote);
            return Ok(());
        };

        let mut state = ParticipantAuthState::new(remote);
        state.transition(AuthState::ValidatingRemote);

        let outcome =
            match auth.validate_remote_identity(&local.identity, &remote, &participant.identity_token)
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.reject(auth, local, &mut state, &e, events);
                    return Err(e);
                }
            };
        log::debug!("[security] {}: remote identity {}", remote, outcome.result());

        match outcome {
            RemoteIdentity::Validated(handle) => {
                state.set_identity(handle);
                self.conclude(auth, local, &mut state, events)?;
            }
            RemoteIdentity::PendingHandshakeMessage(handle) => {
                state.set_identity(handle);
                state.set_role(Role::Replier);
                state.transition(AuthState::AwaitingRequest);
            }
            RemoteIdentity::PendingHandshakeRequest(handle) => {
                state.set_identity(handle);
                state.set_role(Role::Initiator);
                self.begin_request(auth, local, &mut state, &data, events)?;
            }
        }

        slot.insert(state);
        Ok(())
    }

    fn begin_request(
        &self,
        auth: &dyn AuthenticationPlugin,
        local: &LocalContext,
        state: &mut ParticipantAuthState,
        data: &[u8],
        events: &mut Vec<Event>,
    ) -> Result<(), SecurityError> {
        let started = match state.identity() {
            Some(remote_identity) => {
                auth.begin_handshake_request(&local.identity, remote_identity, data)
            }
            None => Err(SecurityError::NotInitialized),
        };
        let start = match started {
            Ok(start) => start,
            Err(e) => {
                self.reject(auth, local, state, &e, events);
                return Err(e);
            }
        };

        state.set_handshake(start.handle);
        self.advance(
            auth,
            local,
            state,
            start.step,
            AuthState::SendingRequest,
            None,
            OnSendFailure::Abort,
            events,
        )
    }

    // ---------------------------------------------------------------------
    // Inbound messages
    // ---------------------------------------------------------------------

    fn on_new_change(&self, change: CacheChange) {
        let Some(auth) = self.plugins.authentication.as_deref() else {
            return;
        };
        let data = self.participant_data();
        let mut events = Vec::new();
        {
            let mut core = self.core.lock();
            let Core {
                local,
                participants,
            } = &mut *core;
            let Some(local) = local.as_ref() else {
                log::trace!("[security] change received before init, ignored");
                return;
            };
            let Some(message) = local.channel.receive(&change) else {
                return;
            };

            if message.destination_participant_key != self.local_guid {
                log::trace!(
                    "[security] message for {} is not ours",
                    message.destination_participant_key
                );
                return;
            }
            let remote = message.message_identity.source_guid;
            let Some(mut state) = participants.remove(&remote) else {
                log::debug!("[security] message from unknown participant {}", remote);
                return;
            };

            if self
                .on_message(auth, local, &mut state, &message, &data, &mut events)
                .is_ok()
            {
                participants.insert(remote, state);
            }
        }
        self.dispatch(events);
    }

    /// `Err` means the state was released and must be discarded.
    #[allow(clippy::too_many_arguments)]
    fn on_message(
        &self,
        auth: &dyn AuthenticationPlugin,
        local: &LocalContext,
        state: &mut ParticipantAuthState,
        message: &AuthenticationMessage,
        data: &[u8],
        events: &mut Vec<Event>,
    ) -> Result<(), SecurityError> {
        match state.state() {
            AuthState::AwaitingRequest => {
                self.on_request(auth, local, state, message, data, events)
            }
            AuthState::AwaitingReply => {
                if state.correlates(message, self.local_guid) {
                    self.on_answer(auth, local, state, message, events)
                } else {
                    self.drop_uncorrelated(state, message);
                    Ok(())
                }
            }
            AuthState::AwaitingFinal => {
                if state.is_repeat(message) {
                    resend_last(local, state);
                    Ok(())
                } else if state.correlates(message, self.local_guid) {
                    self.on_answer(auth, local, state, message, events)
                } else if message.related_message_identity.is_unset() {
                    log::debug!(
                        "[security] {}: new request while awaiting final, restarting",
                        state.remote()
                    );
                    retire_sent(local, state);
                    state.return_handshake(auth);
                    state.transition(AuthState::AwaitingRequest);
                    self.on_request(auth, local, state, message, data, events)
                } else {
                    self.drop_uncorrelated(state, message);
                    Ok(())
                }
            }
            AuthState::Authorized => {
                if state.is_repeat(message) {
                    resend_last(local, state);
                } else {
                    log::trace!(
                        "[security] {}: already authorized, message dropped",
                        state.remote()
                    );
                }
                Ok(())
            }
            other => {
                log::trace!(
                    "[security] {}: unexpected message in state {}",
                    state.remote(),
                    other
                );
                Ok(())
            }
        }
    }

    fn drop_uncorrelated(&self, state: &ParticipantAuthState, message: &AuthenticationMessage) {
        log::debug!(
            "[security] {}: dropping message related to {}#{} in state {}",
            state.remote(),
            message.related_message_identity.source_guid,
            message.related_message_identity.sequence_number,
            state.state()
        );
    }

    fn on_request(
        &self,
        auth: &dyn AuthenticationPlugin,
        local: &LocalContext,
        state: &mut ParticipantAuthState,
        message: &AuthenticationMessage,
        data: &[u8],
        events: &mut Vec<Event>,
    ) -> Result<(), SecurityError> {
        if !message.related_message_identity.is_unset() {
            log::debug!(
                "[security] {}: expected a handshake request, message dropped",
                state.remote()
            );
            return Ok(());
        }
        let Some(request) = message.token() else {
            log::debug!("[security] {}: request without token dropped", state.remote());
            return Ok(());
        };

        let started = match state.identity() {
            Some(remote_identity) => {
                auth.begin_handshake_reply(remote_identity, &local.identity, request, data)
            }
            None => Err(SecurityError::NotInitialized),
        };
        let start = match started {
            Ok(start) => start,
            Err(e) => {
                self.reject(auth, local, state, &e, events);
                return Err(e);
            }
        };

        state.set_handshake(start.handle);
        self.advance(
            auth,
            local,
            state,
            start.step,
            AuthState::SendingReply,
            Some(message.message_identity),
            OnSendFailure::Revert,
            events,
        )
    }

    /// A correlated reply (initiator) or final (replier).
    fn on_answer(
        &self,
        auth: &dyn AuthenticationPlugin,
        local: &LocalContext,
        state: &mut ParticipantAuthState,
        message: &AuthenticationMessage,
        events: &mut Vec<Event>,
    ) -> Result<(), SecurityError> {
        let Some(token) = message.token() else {
            log::debug!("[security] {}: answer without token dropped", state.remote());
            return Ok(());
        };
        // Our message got through; stop retransmitting it.
        retire_sent(local, state);

        let processed = match state.handshake() {
            Some(handshake) => auth.process_handshake(handshake, token),
            None => Err(SecurityError::NotInitialized),
        };
        let step = match processed {
            Ok(step) => step,
            Err(e) => {
                self.reject(auth, local, state, &e, events);
                return Err(e);
            }
        };

        let sending = match state.role() {
            Some(Role::Replier) => AuthState::SendingReply,
            _ => AuthState::SendingRequest,
        };
        self.advance(
            auth,
            local,
            state,
            step,
            sending,
            Some(message.message_identity),
            OnSendFailure::Abort,
            events,
        )
    }

    // ---------------------------------------------------------------------
    // Transitions
    // ---------------------------------------------------------------------

    /// Act on a handshake step returned by the plugin.
    #[allow(clippy::too_many_arguments)]
    fn advance(
        &self,
        auth: &dyn AuthenticationPlugin,
        local: &LocalContext,
        state: &mut ParticipantAuthState,
        step: HandshakeStep,
        sending: AuthState,
        answering: Option<MessageIdentity>,
        on_failure: OnSendFailure,
        events: &mut Vec<Event>,
    ) -> Result<(), SecurityError> {
        log::debug!("[security] {}: handshake step {}", state.remote(), step.result());
        match step {
            HandshakeStep::Completed => self.conclude(auth, local, state, events),
            HandshakeStep::CompletedWithFinal(token) => {
                state.transition(AuthState::SendingFinal);
                if let Err(e) = self.send_token(local, state, token, answering) {
                    // The peer cannot conclude without the final; neither do we.
                    log::warn!(
                        "[security] {}: final handshake message not sent: {}",
                        state.remote(),
                        e
                    );
                    retire_sent(local, state);
                    state.release(auth, self.plugins.cryptography.as_deref());
                    return Err(e);
                }
                self.conclude(auth, local, state, events)
            }
            HandshakeStep::PendingMessage(token) => {
                state.transition(sending);
                match self.send_token(local, state, token, answering) {
                    Ok(()) => {
                        state.transition(state.awaiting_state());
                        Ok(())
                    }
                    Err(e) => {
                        log::warn!(
                            "[security] {}: handshake message not sent: {}",
                            state.remote(),
                            e
                        );
                        match on_failure {
                            OnSendFailure::Abort => {
                                retire_sent(local, state);
                                state.release(auth, self.plugins.cryptography.as_deref());
                                Err(e)
                            }
                            OnSendFailure::Revert => {
                                state.return_handshake(auth);
                                state.transition(AuthState::AwaitingRequest);
                                Ok(())
                            }
                        }
                    }
                }
            }
        }
    }

    fn send_token(
        &self,
        local: &LocalContext,
        state: &mut ParticipantAuthState,
        token: HandshakeMessageToken,
        answering: Option<MessageIdentity>,
    ) -> Result<(), SecurityError> {
        retire_sent(local, state);

        let identity = MessageIdentity::new(self.local_guid, self.message_seq.next());
        let message = AuthenticationMessage::new(
            identity,
            answering.unwrap_or_default(),
            state.remote(),
            token,
        );
        let change_seq = local.channel.send(&message)?;
        state.record_sent(
            SentMessage {
                identity,
                change_seq,
            },
            answering,
        );
        Ok(())
    }

    /// Authorize, or reject if crypto registration fails.
    fn conclude(
        &self,
        auth: &dyn AuthenticationPlugin,
        local: &LocalContext,
        state: &mut ParticipantAuthState,
        events: &mut Vec<Event>,
    ) -> Result<(), SecurityError> {
        match self.register_crypto(auth, local, state) {
            Ok(()) => {
                state.transition(AuthState::Authorized);
                state.return_handles(auth);
                events.push(Event::Authorized(state.remote()));
                Ok(())
            }
            Err(e) => {
                self.reject(auth, local, state, &e, events);
                Err(e)
            }
        }
    }

    fn register_crypto(
        &self,
        auth: &dyn AuthenticationPlugin,
        local: &LocalContext,
        state: &mut ParticipantAuthState,
    ) -> Result<(), SecurityError> {
        let Some(crypto) = self.plugins.cryptography.as_deref() else {
            return Ok(());
        };
        let local_crypto = local.crypto.as_ref().ok_or(SecurityError::NotInitialized)?;
        let secret = match state.handshake() {
            Some(handshake) => Some(auth.get_shared_secret(handshake)?),
            None => None,
        };
        let remote_identity = state.identity().ok_or(SecurityError::NotInitialized)?;
        let handle = crypto.register_matched_remote_participant(
            local_crypto,
            remote_identity,
            &state.remote(),
            secret,
        )?;
        state.set_crypto(handle);
        Ok(())
    }

    fn reject(
        &self,
        auth: &dyn AuthenticationPlugin,
        local: &LocalContext,
        state: &mut ParticipantAuthState,
        reason: &SecurityError,
        events: &mut Vec<Event>,
    ) {
        log::warn!(
            "[security] {}: authentication failed in state {}: {}",
            state.remote(),
            state.state(),
            reason
        );
        state.transition(AuthState::Unauthorized);
        retire_sent(local, state);
        state.release(auth, self.plugins.cryptography.as_deref());
        events.push(Event::Unauthorized(state.remote()));
    }

    // ---------------------------------------------------------------------
    // Maintenance
    // ---------------------------------------------------------------------

    fn resend_pending(&self) -> usize {
        let core = self.core.lock();
        let Some(local) = core.local.as_ref() else {
            return 0;
        };
        core.participants
            .values()
            .filter(|state| state.state().awaits_answer())
            .filter_map(ParticipantAuthState::last_sent)
            .filter(|sent| local.channel.resend(sent.change_seq))
            .count()
    }

    fn remove(&self, remote: GUID) -> bool {
        let Some(auth) = self.plugins.authentication.as_deref() else {
            return false;
        };
        let mut core = self.core.lock();
        let Core {
            local,
            participants,
        } = &mut *core;
        let Some(mut state) = participants.remove(&remote) else {
            return false;
        };
        if let Some(local) = local.as_ref() {
            retire_sent(local, &mut state);
        }
        state.release(auth, self.plugins.cryptography.as_deref());
        log::debug!("[security] {} removed in state {}", remote, state.state());
        true
    }
}

fn retire_sent(local: &LocalContext, state: &mut ParticipantAuthState) {
    if let Some(change_seq) = state.clear_sent() {
        local.channel.retire(change_seq);
    }
}

fn resend_last(local: &LocalContext, state: &ParticipantAuthState) {
    if let Some(sent) = state.last_sent() {
        log::debug!(
            "[security] {}: repeated message, resending change seq={}",
            state.remote(),
            sent.change_seq
        );
        local.channel.resend(sent.change_seq);
    }
}
