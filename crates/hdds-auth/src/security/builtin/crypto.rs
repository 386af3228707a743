// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HKDF participant key factory
//!
//! # Key Derivation Flow
//!
//! ```text
//! handshake shared secret            (trusted without handshake:
//!   v                                 local master key)
//! HKDF-Extract (salt: both GUIDs, sorted)
//!   v
//! HKDF-Expand (info: "hdds-auth participant key")
//!   v
//! Participant key (32 bytes, zeroized on drop)
//! ```
//!
//! Sorting the GUIDs makes both peers of a handshake derive the same key.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use ring::digest;
use ring::hkdf::{Salt, HKDF_SHA256};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

use crate::core::GUID;
use crate::security::authentication::SharedSecret;
use crate::security::cryptographic::CryptographicPlugin;
use crate::security::handle::{HandleAllocator, IdentityHandle, ParticipantCryptoHandle};
use crate::security::SecurityError;

const KEY_INFO: &[u8] = b"hdds-auth participant key";

struct ParticipantKey {
    participant: GUID,
    key: Zeroizing<[u8; 32]>,
}

/// Reference key factory deriving one key per registered participant.
pub struct SessionKeyFactory {
    rng: SystemRandom,
    handles: HandleAllocator,
    keys: Mutex<HashMap<u64, ParticipantKey>>,
}

impl SessionKeyFactory {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
            handles: HandleAllocator::new(),
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Derive a 256-bit key from `secret` with HKDF-SHA256.
    pub fn derive_key(
        secret: &[u8],
        salt: &[u8],
        info: &[u8],
    ) -> Result<Zeroizing<[u8; 32]>, SecurityError> {
        let prk = Salt::new(HKDF_SHA256, salt).extract(secret);
        let mut key = Zeroizing::new([0u8; 32]);
        prk.expand(&[info], HKDF_SHA256)
            .map_err(|_| SecurityError::CryptographicError("HKDF expand failed".to_string()))?
            .fill(&mut key[..])
            .map_err(|_| SecurityError::CryptographicError("HKDF fill failed".to_string()))?;
        Ok(key)
    }

    /// Number of participants currently holding key material.
    pub fn registered(&self) -> usize {
        self.keys.lock().len()
    }

    /// Short digest of the key registered for `participant`, for comparing
    /// keys across peers without exposing them.
    pub fn key_fingerprint(&self, participant: &GUID) -> Option<[u8; 8]> {
        let keys = self.keys.lock();
        let entry = keys.values().find(|k| k.participant == *participant)?;
        let digest = digest::digest(&digest::SHA256, &entry.key[..]);
        let mut fingerprint = [0u8; 8];
        fingerprint.copy_from_slice(&digest.as_ref()[..8]);
        Some(fingerprint)
    }

    fn store(&self, participant: GUID, key: Zeroizing<[u8; 32]>) -> ParticipantCryptoHandle {
        let handle: ParticipantCryptoHandle = self.handles.issue();
        self.keys
            .lock()
            .insert(handle.id(), ParticipantKey { participant, key });
        handle
    }
}

impl Default for SessionKeyFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionKeyFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeyFactory")
            .field("registered", &self.registered())
            .finish_non_exhaustive()
    }
}

impl CryptographicPlugin for SessionKeyFactory {
    fn register_local_participant(
        &self,
        _identity: &IdentityHandle,
        participant: &GUID,
    ) -> Result<ParticipantCryptoHandle, SecurityError> {
        let mut master = Zeroizing::new([0u8; 32]);
        self.rng
            .fill(&mut master[..])
            .map_err(|_| SecurityError::CryptographicError("RNG failed".to_string()))?;
        Ok(self.store(*participant, master))
    }

    fn register_matched_remote_participant(
        &self,
        local: &ParticipantCryptoHandle,
        _remote_identity: &IdentityHandle,
        remote_participant: &GUID,
        secret: Option<SharedSecret>,
    ) -> Result<ParticipantCryptoHandle, SecurityError> {
        let (local_guid, master) = {
            let keys = self.keys.lock();
            let entry = keys.get(&local.id()).ok_or_else(|| {
                SecurityError::InvalidToken(format!("unknown local crypto {:?}", local))
            })?;
            (entry.participant, entry.key.clone())
        };

        let (low, high) = if local_guid.as_bytes() <= remote_participant.as_bytes() {
            (local_guid, *remote_participant)
        } else {
            (*remote_participant, local_guid)
        };
        let mut salt = [0u8; 2 * GUID::LEN];
        salt[..GUID::LEN].copy_from_slice(&low.as_bytes());
        salt[GUID::LEN..].copy_from_slice(&high.as_bytes());

        let key = match &secret {
            Some(secret) => Self::derive_key(secret.as_bytes(), &salt, KEY_INFO)?,
            None => Self::derive_key(&master[..], &salt, KEY_INFO)?,
        };
        Ok(self.store(*remote_participant, key))
    }

    fn unregister_participant(&self, handle: ParticipantCryptoHandle) -> Result<(), SecurityError> {
        let id = handle.retire();
        match self.keys.lock().remove(&id) {
            Some(_) => Ok(()),
            None => Err(SecurityError::InvalidToken(format!(
                "participant crypto handle {} unknown",
                id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guid(byte: u8) -> GUID {
        GUID::participant([byte; 12])
    }

    #[test]
    fn test_derive_key_is_deterministic() {
        let a = SessionKeyFactory::derive_key(&[0x42; 32], b"salt", KEY_INFO).expect("derive");
        let b = SessionKeyFactory::derive_key(&[0x42; 32], b"salt", KEY_INFO).expect("derive");
        let c = SessionKeyFactory::derive_key(&[0x42; 32], b"other", KEY_INFO).expect("derive");
        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
    }

    #[test]
    fn test_both_sides_derive_the_same_key() {
        let alice = SessionKeyFactory::new();
        let bob = SessionKeyFactory::new();
        let identity = IdentityHandle::new(99);

        let alice_local = alice
            .register_local_participant(&identity, &guid(1))
            .expect("register local");
        let bob_local = bob
            .register_local_participant(&identity, &guid(2))
            .expect("register local");

        let secret = || Some(SharedSecret::new(vec![7; 32]));
        let alice_bob = alice
            .register_matched_remote_participant(&alice_local, &identity, &guid(2), secret())
            .expect("register remote");
        let bob_alice = bob
            .register_matched_remote_participant(&bob_local, &identity, &guid(1), secret())
            .expect("register remote");

        assert!(alice.key_fingerprint(&guid(2)).is_some());
        assert_eq!(alice.key_fingerprint(&guid(2)), bob.key_fingerprint(&guid(1)));
        assert_eq!(alice.registered(), 2);

        for (factory, handle) in [
            (&alice, alice_bob),
            (&alice, alice_local),
            (&bob, bob_alice),
            (&bob, bob_local),
        ] {
            factory.unregister_participant(handle).expect("unregister");
        }
        assert_eq!(alice.registered(), 0);
        assert_eq!(bob.registered(), 0);
        identity.retire();
    }

    #[test]
    fn test_unknown_local_handle_is_rejected() {
        let factory = SessionKeyFactory::new();
        let identity = IdentityHandle::new(1);
        let bogus = ParticipantCryptoHandle::new(42);
        assert!(matches!(
            factory.register_matched_remote_participant(&bogus, &identity, &guid(2), None),
            Err(SecurityError::InvalidToken(_))
        ));
        assert!(factory.unregister_participant(bogus).is_err());
        identity.retire();
    }
}
