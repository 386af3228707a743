// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Challenge-response authentication plugin
//!
//! Every participant of a domain holds the same domain key. A participant's
//! identity token is an HMAC of its GUID under that key, so any member can
//! check another member's token without a PKI.
//!
//! # Protocol
//!
//! ```text
//! Initiator (lower GUID)                  Replier
//!    |                                      |
//!    |--- REQUEST [1 | nonce_i | guid_i] -->|
//!    |                                      | (check guid_i)
//!    |<-- REPLY [2 | nonce_r | nonce_i | mac_r]
//!    | (check echo + mac_r)                 |
//!    |--- FINAL [3 | nonce_i | nonce_r | mac_i] -->|
//!    |                                      | (check echo + mac_i)
//! ```
//!
//! Both sides then derive the same shared secret with HKDF over the domain
//! key, salted with `nonce_i || nonce_r`.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use ring::hkdf::{Salt, HKDF_SHA256};
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};

use crate::core::GUID;
use crate::security::authentication::{
    AuthenticationPlugin, HandshakeMessageToken, HandshakeStart, HandshakeStep, LocalIdentity,
    RemoteIdentity, SharedSecret,
};
use crate::security::handle::{HandleAllocator, HandshakeHandle, IdentityHandle};
use crate::security::SecurityError;

const NONCE_LEN: usize = 32;
const MAC_LEN: usize = 32;
const TOKEN_MAGIC: &[u8; 4] = b"HDCA";
const IDENTITY_TOKEN_LEN: usize = TOKEN_MAGIC.len() + GUID::LEN + MAC_LEN;
const SECRET_INFO: &[u8] = b"hdds-auth handshake shared secret";

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageType {
    Request = 1,
    Reply = 2,
    Final = 3,
}

impl MessageType {
    fn from_u8(value: u8) -> Result<Self, SecurityError> {
        match value {
            1 => Ok(Self::Request),
            2 => Ok(Self::Reply),
            3 => Ok(Self::Final),
            _ => Err(SecurityError::AuthenticationFailed(format!(
                "Unknown handshake message type: {}",
                value
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Initiator sent the request.
    RequestSent,
    /// Replier sent the reply.
    ReplySent,
    Completed,
}

struct HandshakeContext {
    stage: Stage,
    initiator: GUID,
    replier: GUID,
    initiator_nonce: [u8; NONCE_LEN],
    replier_nonce: Option<[u8; NONCE_LEN]>,
}

/// Reference authentication plugin based on a shared domain key.
pub struct ChallengeAuthPlugin {
    key: hmac::Key,
    domain_secret: Vec<u8>,
    rng: SystemRandom,
    handles: HandleAllocator,
    identities: Mutex<HashMap<u64, GUID>>,
    handshakes: Mutex<HashMap<u64, HandshakeContext>>,
}

impl ChallengeAuthPlugin {
    pub fn new(domain_key: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, domain_key),
            domain_secret: domain_key.to_vec(),
            rng: SystemRandom::new(),
            handles: HandleAllocator::new(),
            identities: Mutex::new(HashMap::new()),
            handshakes: Mutex::new(HashMap::new()),
        }
    }

    /// Identity token of `participant` under this plugin's domain key.
    pub fn identity_token_for(&self, participant: &GUID) -> Vec<u8> {
        let mut token = Vec::with_capacity(IDENTITY_TOKEN_LEN);
        token.extend_from_slice(TOKEN_MAGIC);
        token.extend_from_slice(&participant.as_bytes());
        token.extend_from_slice(hmac::sign(&self.key, &participant.as_bytes()).as_ref());
        token
    }

    /// Handles issued and not yet returned.
    pub fn outstanding_handles(&self) -> usize {
        self.identities.lock().len() + self.handshakes.lock().len()
    }

    fn issue_identity(&self, participant: GUID) -> IdentityHandle {
        let handle: IdentityHandle = self.handles.issue();
        self.identities.lock().insert(handle.id(), participant);
        handle
    }

    fn identity_guid(&self, handle: &IdentityHandle) -> Result<GUID, SecurityError> {
        self.identities
            .lock()
            .get(&handle.id())
            .copied()
            .ok_or_else(|| SecurityError::InvalidToken(format!("unknown identity {:?}", handle)))
    }

    fn nonce(&self) -> Result<[u8; NONCE_LEN], SecurityError> {
        let mut nonce = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| SecurityError::CryptographicError("RNG failed".to_string()))?;
        Ok(nonce)
    }

    fn mac(&self, message_type: MessageType, first: &[u8], second: &[u8], signer: &GUID) -> hmac::Tag {
        let mut ctx = hmac::Context::with_key(&self.key);
        ctx.update(&[message_type as u8]);
        ctx.update(first);
        ctx.update(second);
        ctx.update(&signer.as_bytes());
        ctx.sign()
    }

    fn verify_mac(
        &self,
        message_type: MessageType,
        first: &[u8],
        second: &[u8],
        signer: &GUID,
        tag: &[u8],
    ) -> Result<(), SecurityError> {
        let mut data = Vec::with_capacity(1 + first.len() + second.len() + GUID::LEN);
        data.push(message_type as u8);
        data.extend_from_slice(first);
        data.extend_from_slice(second);
        data.extend_from_slice(&signer.as_bytes());
        hmac::verify(&self.key, &data, tag).map_err(|_| {
            SecurityError::AuthenticationFailed(format!("{:?} signature mismatch", message_type))
        })
    }

    fn reply_to(
        &self,
        ctx: &mut HandshakeContext,
        reply: &[u8],
    ) -> Result<HandshakeStep, SecurityError> {
        if ctx.stage != Stage::RequestSent {
            return Err(SecurityError::AuthenticationFailed(
                "Unexpected challenge reply".to_string(),
            ));
        }
        if reply.len() < 2 * NONCE_LEN + MAC_LEN {
            return Err(SecurityError::AuthenticationFailed(
                "Invalid challenge reply (too short)".to_string(),
            ));
        }
        let replier_nonce = &reply[..NONCE_LEN];
        let echoed = &reply[NONCE_LEN..2 * NONCE_LEN];
        if echoed != ctx.initiator_nonce {
            return Err(SecurityError::AuthenticationFailed(
                "Nonce mismatch - possible replay attack".to_string(),
            ));
        }
        self.verify_mac(
            MessageType::Reply,
            replier_nonce,
            echoed,
            &ctx.replier,
            &reply[2 * NONCE_LEN..2 * NONCE_LEN + MAC_LEN],
        )?;

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(replier_nonce);
        ctx.replier_nonce = Some(nonce);
        ctx.stage = Stage::Completed;

        // Format: [type | nonce_i | nonce_r | mac_i]
        let mac = self.mac(MessageType::Final, &ctx.initiator_nonce, &nonce, &ctx.initiator);
        let mut token = Vec::with_capacity(1 + 2 * NONCE_LEN + MAC_LEN);
        token.push(MessageType::Final as u8);
        token.extend_from_slice(&ctx.initiator_nonce);
        token.extend_from_slice(&nonce);
        token.extend_from_slice(mac.as_ref());
        Ok(HandshakeStep::CompletedWithFinal(token.into()))
    }

    fn accept_final(
        &self,
        ctx: &mut HandshakeContext,
        fin: &[u8],
    ) -> Result<HandshakeStep, SecurityError> {
        if ctx.stage != Stage::ReplySent {
            return Err(SecurityError::AuthenticationFailed(
                "Unexpected final message".to_string(),
            ));
        }
        if fin.len() < 2 * NONCE_LEN + MAC_LEN {
            return Err(SecurityError::AuthenticationFailed(
                "Invalid final message (too short)".to_string(),
            ));
        }
        let initiator_nonce = &fin[..NONCE_LEN];
        let replier_nonce = &fin[NONCE_LEN..2 * NONCE_LEN];
        if initiator_nonce != ctx.initiator_nonce
            || Some(replier_nonce) != ctx.replier_nonce.as_ref().map(|n| &n[..])
        {
            return Err(SecurityError::AuthenticationFailed(
                "Nonce mismatch - possible replay attack".to_string(),
            ));
        }
        self.verify_mac(
            MessageType::Final,
            initiator_nonce,
            replier_nonce,
            &ctx.initiator,
            &fin[2 * NONCE_LEN..2 * NONCE_LEN + MAC_LEN],
        )?;

        ctx.stage = Stage::Completed;
        Ok(HandshakeStep::Completed)
    }
}

impl fmt::Debug for ChallengeAuthPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChallengeAuthPlugin")
            .field("identities", &self.identities.lock().len())
            .field("handshakes", &self.handshakes.lock().len())
            .finish_non_exhaustive()
    }
}

impl Drop for ChallengeAuthPlugin {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.domain_secret.zeroize();
    }
}

impl AuthenticationPlugin for ChallengeAuthPlugin {
    fn validate_local_identity(&self, participant: &GUID) -> Result<LocalIdentity, SecurityError> {
        if participant.is_zero() {
            return Err(SecurityError::AuthenticationFailed(
                "local participant GUID is unset".to_string(),
            ));
        }
        Ok(LocalIdentity::Validated(self.issue_identity(*participant)))
    }

    fn get_identity_token(&self, local: &IdentityHandle) -> Result<Vec<u8>, SecurityError> {
        let guid = self.identity_guid(local)?;
        Ok(self.identity_token_for(&guid))
    }

    fn validate_remote_identity(
        &self,
        local: &IdentityHandle,
        remote_participant: &GUID,
        remote_identity_token: &[u8],
    ) -> Result<RemoteIdentity, SecurityError> {
        let local_guid = self.identity_guid(local)?;

        if remote_identity_token.len() != IDENTITY_TOKEN_LEN
            || &remote_identity_token[..TOKEN_MAGIC.len()] != TOKEN_MAGIC
        {
            return Err(SecurityError::InvalidToken(
                "malformed identity token".to_string(),
            ));
        }
        let guid_bytes = &remote_identity_token[TOKEN_MAGIC.len()..TOKEN_MAGIC.len() + GUID::LEN];
        if guid_bytes != remote_participant.as_bytes() {
            return Err(SecurityError::AuthenticationFailed(
                "identity token issued to another participant".to_string(),
            ));
        }
        hmac::verify(
            &self.key,
            guid_bytes,
            &remote_identity_token[TOKEN_MAGIC.len() + GUID::LEN..],
        )
        .map_err(|_| {
            SecurityError::AuthenticationFailed("identity token not signed by domain".to_string())
        })?;

        let handle = self.issue_identity(*remote_participant);
        // Lower GUID initiates.
        if local_guid.as_bytes() < remote_participant.as_bytes() {
            Ok(RemoteIdentity::PendingHandshakeRequest(handle))
        } else {
            Ok(RemoteIdentity::PendingHandshakeMessage(handle))
        }
    }

    fn begin_handshake_request(
        &self,
        initiator: &IdentityHandle,
        replier: &IdentityHandle,
        _participant_data: &[u8],
    ) -> Result<HandshakeStart, SecurityError> {
        let initiator = self.identity_guid(initiator)?;
        let replier = self.identity_guid(replier)?;
        let nonce = self.nonce()?;

        // Format: [type | nonce_i | guid_i]
        let mut token = Vec::with_capacity(1 + NONCE_LEN + GUID::LEN);
        token.push(MessageType::Request as u8);
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&initiator.as_bytes());

        let handle: HandshakeHandle = self.handles.issue();
        self.handshakes.lock().insert(
            handle.id(),
            HandshakeContext {
                stage: Stage::RequestSent,
                initiator,
                replier,
                initiator_nonce: nonce,
                replier_nonce: None,
            },
        );
        Ok(HandshakeStart {
            handle,
            step: HandshakeStep::PendingMessage(token.into()),
        })
    }

    fn begin_handshake_reply(
        &self,
        initiator: &IdentityHandle,
        replier: &IdentityHandle,
        request: &HandshakeMessageToken,
        _participant_data: &[u8],
    ) -> Result<HandshakeStart, SecurityError> {
        let initiator = self.identity_guid(initiator)?;
        let replier = self.identity_guid(replier)?;

        let request = request.as_bytes();
        let (&kind, body) = request.split_first().ok_or_else(|| {
            SecurityError::AuthenticationFailed("Empty handshake message".to_string())
        })?;
        if MessageType::from_u8(kind)? != MessageType::Request {
            return Err(SecurityError::AuthenticationFailed(
                "Expected a challenge request".to_string(),
            ));
        }
        if body.len() < NONCE_LEN + GUID::LEN {
            return Err(SecurityError::AuthenticationFailed(
                "Invalid challenge request (too short)".to_string(),
            ));
        }
        if body[NONCE_LEN..NONCE_LEN + GUID::LEN] != initiator.as_bytes() {
            return Err(SecurityError::AuthenticationFailed(
                "Challenge request from unexpected participant".to_string(),
            ));
        }

        let mut initiator_nonce = [0u8; NONCE_LEN];
        initiator_nonce.copy_from_slice(&body[..NONCE_LEN]);
        let replier_nonce = self.nonce()?;

        // Format: [type | nonce_r | nonce_i | mac_r]
        let mac = self.mac(MessageType::Reply, &replier_nonce, &initiator_nonce, &replier);
        let mut token = Vec::with_capacity(1 + 2 * NONCE_LEN + MAC_LEN);
        token.push(MessageType::Reply as u8);
        token.extend_from_slice(&replier_nonce);
        token.extend_from_slice(&initiator_nonce);
        token.extend_from_slice(mac.as_ref());

        let handle: HandshakeHandle = self.handles.issue();
        self.handshakes.lock().insert(
            handle.id(),
            HandshakeContext {
                stage: Stage::ReplySent,
                initiator,
                replier,
                initiator_nonce,
                replier_nonce: Some(replier_nonce),
            },
        );
        Ok(HandshakeStart {
            handle,
            step: HandshakeStep::PendingMessage(token.into()),
        })
    }

    fn process_handshake(
        &self,
        handshake: &HandshakeHandle,
        message: &HandshakeMessageToken,
    ) -> Result<HandshakeStep, SecurityError> {
        let mut handshakes = self.handshakes.lock();
        let ctx = handshakes.get_mut(&handshake.id()).ok_or_else(|| {
            SecurityError::InvalidToken(format!("unknown handshake {:?}", handshake))
        })?;

        let (&kind, body) = message.as_bytes().split_first().ok_or_else(|| {
            SecurityError::AuthenticationFailed("Empty handshake message".to_string())
        })?;
        match MessageType::from_u8(kind)? {
            MessageType::Reply => self.reply_to(ctx, body),
            MessageType::Final => self.accept_final(ctx, body),
            MessageType::Request => Err(SecurityError::AuthenticationFailed(
                "Unexpected challenge request".to_string(),
            )),
        }
    }

    fn get_shared_secret(&self, handshake: &HandshakeHandle) -> Result<SharedSecret, SecurityError> {
        let handshakes = self.handshakes.lock();
        let ctx = handshakes.get(&handshake.id()).ok_or_else(|| {
            SecurityError::InvalidToken(format!("unknown handshake {:?}", handshake))
        })?;
        let (Stage::Completed, Some(replier_nonce)) = (ctx.stage, ctx.replier_nonce) else {
            return Err(SecurityError::AuthenticationFailed(
                "Handshake not completed".to_string(),
            ));
        };

        let mut salt = [0u8; 2 * NONCE_LEN];
        salt[..NONCE_LEN].copy_from_slice(&ctx.initiator_nonce);
        salt[NONCE_LEN..].copy_from_slice(&replier_nonce);

        let prk = Salt::new(HKDF_SHA256, &salt).extract(&self.domain_secret);
        let mut secret = vec![0u8; 32];
        prk.expand(&[SECRET_INFO], HKDF_SHA256)
            .map_err(|_| SecurityError::CryptographicError("HKDF expand failed".to_string()))?
            .fill(&mut secret)
            .map_err(|_| SecurityError::CryptographicError("HKDF fill failed".to_string()))?;
        Ok(SharedSecret::new(secret))
    }

    fn return_identity_handle(&self, handle: IdentityHandle) -> Result<(), SecurityError> {
        let id = handle.retire();
        match self.identities.lock().remove(&id) {
            Some(_) => Ok(()),
            None => Err(SecurityError::InvalidToken(format!(
                "identity handle {} returned twice or never issued",
                id
            ))),
        }
    }

    fn return_handshake_handle(&self, handle: HandshakeHandle) -> Result<(), SecurityError> {
        let id = handle.retire();
        match self.handshakes.lock().remove(&id) {
            Some(_) => Ok(()),
            None => Err(SecurityError::InvalidToken(format!(
                "handshake handle {} returned twice or never issued",
                id
            ))),
        }
    }
}
