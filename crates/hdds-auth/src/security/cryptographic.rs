// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cryptographic plugin contract (DDS Security v1.1 Sec.8.5)
//!
//! Only the key-factory part is consumed here: participant-scoped key material
//! is registered once an identity is trusted and unregistered on teardown.

use std::fmt;

use crate::core::GUID;

use super::authentication::SharedSecret;
use super::handle::{IdentityHandle, ParticipantCryptoHandle};
use super::SecurityError;

/// Cryptographic plugin trait (SPI)
pub trait CryptographicPlugin: fmt::Debug + Send + Sync {
    /// Register key material for the local participant.
    fn register_local_participant(
        &self,
        identity: &IdentityHandle,
        participant: &GUID,
    ) -> Result<ParticipantCryptoHandle, SecurityError>;

    /// Register key material for an authenticated remote participant.
    ///
    /// `secret` is `None` when the remote was trusted without a handshake.
    fn register_matched_remote_participant(
        &self,
        local: &ParticipantCryptoHandle,
        remote_identity: &IdentityHandle,
        remote_participant: &GUID,
        secret: Option<SharedSecret>,
    ) -> Result<ParticipantCryptoHandle, SecurityError>;

    fn unregister_participant(&self, handle: ParticipantCryptoHandle) -> Result<(), SecurityError>;
}
