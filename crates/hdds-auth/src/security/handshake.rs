// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-participant authentication state.
//!
//! One [`ParticipantAuthState`] exists per discovered remote participant. It
//! owns the plugin handles issued for that participant and remembers the last
//! message this side sent, which is what inbound replies and finals are
//! correlated against.
//!
//! # State machine
//!
//! ```text
//! Unauthenticated -> ValidatingRemote -+-> Authorized            (trusted outright)
//!                                      |
//!                                      +-> SendingRequest -> AwaitingReply
//!                                      |        -> SendingFinal -> Authorized
//!                                      |
//!                                      +-> AwaitingRequest -> SendingReply
//!                                               -> AwaitingFinal -> Authorized
//!
//! any state --plugin FAILED--> Unauthorized (state discarded)
//! ```

use std::fmt;

use crate::core::GUID;

use super::authentication::AuthenticationPlugin;
use super::cryptographic::CryptographicPlugin;
use super::handle::{HandshakeHandle, IdentityHandle, ParticipantCryptoHandle};
use super::message::{AuthenticationMessage, MessageIdentity};

/// Where a participant stands in the authentication protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthState {
    Unauthenticated,
    ValidatingRemote,
    AwaitingRequest,
    SendingRequest,
    AwaitingReply,
    SendingReply,
    AwaitingFinal,
    SendingFinal,
    Authorized,
    Unauthorized,
}

impl AuthState {
    /// Waiting on the peer with a message of ours outstanding.
    pub fn awaits_answer(self) -> bool {
        matches!(self, Self::AwaitingReply | Self::AwaitingFinal)
    }

    pub fn is_decided(self) -> bool {
        matches!(self, Self::Authorized | Self::Unauthorized)
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::ValidatingRemote => "VALIDATING_REMOTE",
            Self::AwaitingRequest => "AWAITING_REQUEST",
            Self::SendingRequest => "SENDING_REQUEST",
            Self::AwaitingReply => "AWAITING_REPLY",
            Self::SendingReply => "SENDING_REPLY",
            Self::AwaitingFinal => "AWAITING_FINAL",
            Self::SendingFinal => "SENDING_FINAL",
            Self::Authorized => "AUTHORIZED",
            Self::Unauthorized => "UNAUTHORIZED",
        };
        f.write_str(name)
    }
}

/// Which side of the handshake the local participant plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Replier,
}

/// The last message published to a remote participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    /// Message identity the peer will quote as its related identity.
    pub identity: MessageIdentity,
    /// Change sequence number in the stateless writer history.
    pub change_seq: u64,
}

/// Authentication state of one remote participant.
pub struct ParticipantAuthState {
    remote: GUID,
    state: AuthState,
    role: Option<Role>,
    identity: Option<IdentityHandle>,
    handshake: Option<HandshakeHandle>,
    crypto: Option<ParticipantCryptoHandle>,
    last_sent: Option<SentMessage>,
    /// Inbound message that `last_sent` answers; a copy of it triggers a resend.
    answered: Option<MessageIdentity>,
}

impl ParticipantAuthState {
    pub fn new(remote: GUID) -> Self {
        Self {
            remote,
            state: AuthState::Unauthenticated,
            role: None,
            identity: None,
            handshake: None,
            crypto: None,
            last_sent: None,
            answered: None,
        }
    }

    pub fn remote(&self) -> GUID {
        self.remote
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn set_role(&mut self, role: Role) {
        self.role = Some(role);
    }

    pub fn transition(&mut self, next: AuthState) {
        if self.state != next {
            log::debug!("[security] {}: {} -> {}", self.remote, self.state, next);
            self.state = next;
        }
    }

    /// State to wait in after our message went out.
    pub fn awaiting_state(&self) -> AuthState {
        match self.role {
            Some(Role::Replier) => AuthState::AwaitingFinal,
            _ => AuthState::AwaitingReply,
        }
    }

    pub fn identity(&self) -> Option<&IdentityHandle> {
        self.identity.as_ref()
    }

    pub fn set_identity(&mut self, handle: IdentityHandle) {
        debug_assert!(self.identity.is_none(), "identity handle already held");
        self.identity = Some(handle);
    }

    pub fn handshake(&self) -> Option<&HandshakeHandle> {
        self.handshake.as_ref()
    }

    pub fn set_handshake(&mut self, handle: HandshakeHandle) {
        debug_assert!(self.handshake.is_none(), "handshake handle already held");
        self.handshake = Some(handle);
    }

    pub fn set_crypto(&mut self, handle: ParticipantCryptoHandle) {
        self.crypto = Some(handle);
    }

    pub fn last_sent(&self) -> Option<SentMessage> {
        self.last_sent
    }

    pub fn record_sent(&mut self, sent: SentMessage, answering: Option<MessageIdentity>) {
        self.last_sent = Some(sent);
        self.answered = answering;
    }

    /// Forget the outstanding message, returning its change sequence number.
    pub fn clear_sent(&mut self) -> Option<u64> {
        self.answered = None;
        self.last_sent.take().map(|sent| sent.change_seq)
    }

    /// A reply or final answers our last message iff it quotes it as related:
    /// same source (us) and same sequence number.
    pub fn correlates(&self, message: &AuthenticationMessage, local: GUID) -> bool {
        let related = message.related_message_identity;
        match self.last_sent {
            Some(sent) => {
                related.source_guid == local
                    && related.sequence_number == sent.identity.sequence_number
            }
            None => false,
        }
    }

    /// The peer sent again the message we already answered.
    pub fn is_repeat(&self, message: &AuthenticationMessage) -> bool {
        self.answered == Some(message.message_identity)
    }

    /// Give back the handshake handle only, keeping the identity.
    pub fn return_handshake(&mut self, auth: &dyn AuthenticationPlugin) {
        if let Some(handle) = self.handshake.take() {
            if let Err(e) = auth.return_handshake_handle(handle) {
                log::error!(
                    "[security] {}: failed to return handshake handle: {}",
                    self.remote,
                    e
                );
            }
        }
    }

    /// Give back identity and handshake handles to the plugin.
    ///
    /// Safe to call more than once; each handle goes back only once.
    pub fn return_handles(&mut self, auth: &dyn AuthenticationPlugin) {
        self.return_handshake(auth);
        if let Some(handle) = self.identity.take() {
            if let Err(e) = auth.return_identity_handle(handle) {
                log::error!(
                    "[security] {}: failed to return identity handle: {}",
                    self.remote,
                    e
                );
            }
        }
    }

    /// Return every handle and unregister crypto material before discard.
    pub fn release(
        &mut self,
        auth: &dyn AuthenticationPlugin,
        crypto: Option<&dyn CryptographicPlugin>,
    ) {
        self.return_handles(auth);
        if let Some(handle) = self.crypto.take() {
            match crypto {
                Some(crypto) => {
                    if let Err(e) = crypto.unregister_participant(handle) {
                        log::error!(
                            "[security] {}: failed to unregister crypto material: {}",
                            self.remote,
                            e
                        );
                    }
                }
                None => {
                    // Only a crypto plugin can mint these.
                    handle.retire();
                }
            }
        }
    }
}

impl fmt::Debug for ParticipantAuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParticipantAuthState")
            .field("remote", &self.remote)
            .field("state", &self.state)
            .field("role", &self.role)
            .field("last_sent", &self.last_sent)
            .finish()
    }
}
