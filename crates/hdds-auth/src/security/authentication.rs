// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Authentication plugin contract (DDS Security v1.1 Sec.8.3)
//!
//! The core consumes this trait; it never implements identity validation
//! itself. Every call returns `Result<Outcome, SecurityError>`: `Err` is the
//! `FAILED` code, the `Ok` side enumerates the remaining codes together with
//! the handle and/or token each one carries.
//!
//! # Protocol
//!
//! ```text
//! Initiator                                Replier
//!    |  validate_remote_identity()             |  validate_remote_identity()
//!    |  -> PendingHandshakeRequest             |  -> PendingHandshakeMessage
//!    |                                         |
//!    |  begin_handshake_request()              |
//!    |------------ request token ------------->|  begin_handshake_reply()
//!    |<----------- reply token ----------------|
//!    |  process_handshake()                    |
//!    |  -> CompletedWithFinal                  |
//!    |------------ final token --------------->|  process_handshake()
//!    |  AUTHORIZED                             |  -> Completed, AUTHORIZED
//! ```

use std::fmt;

use zeroize::Zeroize;

use crate::core::GUID;

use super::handle::{HandshakeHandle, IdentityHandle};
use super::SecurityError;

/// Plugin return codes, as seen by the orchestration core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationResult {
    Ok,
    Failed,
    PendingRetry,
    PendingHandshakeRequest,
    PendingHandshakeMessage,
    OkWithFinalMessage,
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::Failed => "FAILED",
            Self::PendingRetry => "PENDING_RETRY",
            Self::PendingHandshakeRequest => "PENDING_HANDSHAKE_REQUEST",
            Self::PendingHandshakeMessage => "PENDING_HANDSHAKE_MESSAGE",
            Self::OkWithFinalMessage => "OK_WITH_FINAL_MESSAGE",
        };
        f.write_str(name)
    }
}

/// Opaque, plugin-defined handshake payload.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct HandshakeMessageToken(Vec<u8>);

impl HandshakeMessageToken {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for HandshakeMessageToken {
    fn from(data: Vec<u8>) -> Self {
        Self(data)
    }
}

impl fmt::Debug for HandshakeMessageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandshakeMessageToken({} bytes)", self.0.len())
    }
}

/// Secret agreed during a handshake, handed to the cryptography plugin.
///
/// Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret(<{} bytes redacted>)", self.0.len())
    }
}

/// Outcome of `validate_local_identity`.
#[derive(Debug)]
pub enum LocalIdentity {
    Validated(IdentityHandle),
    /// Validation could not complete yet; call again.
    PendingRetry,
}

impl LocalIdentity {
    pub fn result(&self) -> ValidationResult {
        match self {
            Self::Validated(_) => ValidationResult::Ok,
            Self::PendingRetry => ValidationResult::PendingRetry,
        }
    }
}

/// Outcome of `validate_remote_identity`.
#[derive(Debug)]
pub enum RemoteIdentity {
    /// Trusted without a handshake.
    Validated(IdentityHandle),
    /// Local side initiates: send a request.
    PendingHandshakeRequest(IdentityHandle),
    /// Local side replies: wait for a request.
    PendingHandshakeMessage(IdentityHandle),
}

impl RemoteIdentity {
    pub fn result(&self) -> ValidationResult {
        match self {
            Self::Validated(_) => ValidationResult::Ok,
            Self::PendingHandshakeRequest(_) => ValidationResult::PendingHandshakeRequest,
            Self::PendingHandshakeMessage(_) => ValidationResult::PendingHandshakeMessage,
        }
    }

    pub fn into_handle(self) -> IdentityHandle {
        match self {
            Self::Validated(h)
            | Self::PendingHandshakeRequest(h)
            | Self::PendingHandshakeMessage(h) => h,
        }
    }
}

/// A handshake step result.
#[derive(Debug)]
pub enum HandshakeStep {
    /// Handshake complete, nothing more to send (`OK`).
    Completed,
    /// Handshake complete, send this last token (`OK_WITH_FINAL_MESSAGE`).
    CompletedWithFinal(HandshakeMessageToken),
    /// Send this token and wait for the peer (`PENDING_HANDSHAKE_MESSAGE`).
    PendingMessage(HandshakeMessageToken),
}

impl HandshakeStep {
    pub fn result(&self) -> ValidationResult {
        match self {
            Self::Completed => ValidationResult::Ok,
            Self::CompletedWithFinal(_) => ValidationResult::OkWithFinalMessage,
            Self::PendingMessage(_) => ValidationResult::PendingHandshakeMessage,
        }
    }
}

/// Outcome of `begin_handshake_request` / `begin_handshake_reply`.
#[derive(Debug)]
pub struct HandshakeStart {
    pub handle: HandshakeHandle,
    pub step: HandshakeStep,
}

/// Authentication plugin trait (SPI)
///
/// # Lifecycle
///
/// 1. `validate_local_identity()` once per local participant
/// 2. `validate_remote_identity()` per discovered participant
/// 3. `begin_handshake_request()` or `begin_handshake_reply()` depending on role
/// 4. `process_handshake()` for every further correlated token
/// 5. `return_*_handle()` exactly once per issued handle
pub trait AuthenticationPlugin: fmt::Debug + Send + Sync {
    fn validate_local_identity(&self, participant: &GUID) -> Result<LocalIdentity, SecurityError>;

    /// Token advertised in discovery so peers can validate us.
    fn get_identity_token(&self, _local: &IdentityHandle) -> Result<Vec<u8>, SecurityError> {
        Ok(Vec::new())
    }

    fn validate_remote_identity(
        &self,
        local: &IdentityHandle,
        remote_participant: &GUID,
        remote_identity_token: &[u8],
    ) -> Result<RemoteIdentity, SecurityError>;

    /// Start a handshake as initiator. `participant_data` is the serialized
    /// local participant announcement.
    fn begin_handshake_request(
        &self,
        initiator: &IdentityHandle,
        replier: &IdentityHandle,
        participant_data: &[u8],
    ) -> Result<HandshakeStart, SecurityError>;

    /// Start a handshake as replier, answering `request`.
    fn begin_handshake_reply(
        &self,
        initiator: &IdentityHandle,
        replier: &IdentityHandle,
        request: &HandshakeMessageToken,
        participant_data: &[u8],
    ) -> Result<HandshakeStart, SecurityError>;

    fn process_handshake(
        &self,
        handshake: &HandshakeHandle,
        message: &HandshakeMessageToken,
    ) -> Result<HandshakeStep, SecurityError>;

    /// Secret agreed by a completed handshake.
    fn get_shared_secret(&self, handshake: &HandshakeHandle) -> Result<SharedSecret, SecurityError>;

    fn return_identity_handle(&self, handle: IdentityHandle) -> Result<(), SecurityError>;

    fn return_handshake_handle(&self, handle: HandshakeHandle) -> Result<(), SecurityError>;
}
