// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DDS Security participant authentication
//!
//! Drives mutual authentication between a local participant and every remote
//! participant it discovers. Identity checks and handshake tokens come from a
//! pluggable [`AuthenticationPlugin`]; key material is registered through a
//! pluggable [`CryptographicPlugin`]. This module only orchestrates.
//!
//! # Architecture
//!
//! ```text
//! SecurityManager
//! +-- SecurityPlugins
//! |   +-- AuthenticationPlugin  (identity + handshake tokens)
//! |   +-- CryptographicPlugin   (participant key material)
//! +-- HandshakeChannel          (stateless writer/reader histories)
//! +-- ParticipantAuthState *    (one per remote participant)
//! ```
//!
//! # Handshake
//!
//! ```text
//! Initiator                              Replier
//!     |-------- request (related=0) -------->|
//!     |<------- reply (related=request) -----|
//!     |-------- final (related=reply) ------>|
//!  AUTHORIZED                            AUTHORIZED
//! ```
//!
//! # References
//!
//! - [OMG DDS Security v1.1](https://www.omg.org/spec/DDS-SECURITY/1.1/)

/// Authentication plugin contract and its outcome types.
pub mod authentication;
/// Reference plugins (challenge-response authentication, HKDF key factory).
#[cfg(feature = "builtin-plugins")]
pub mod builtin;
pub mod channel;
/// Builder and configuration for the manager.
pub mod config;
/// Cryptographic plugin contract (key factory part).
pub mod cryptographic;
mod error;
pub mod handle;
pub mod handshake;
pub mod manager;
/// Authentication message envelope and its codec.
pub mod message;

pub use authentication::{
    AuthenticationPlugin, HandshakeMessageToken, HandshakeStart, HandshakeStep, LocalIdentity,
    RemoteIdentity, SharedSecret, ValidationResult,
};
pub use channel::HandshakeChannel;
pub use config::{AuthConfig, AuthConfigBuilder, RetryPolicy};
pub use cryptographic::CryptographicPlugin;
pub use error::SecurityError;
pub use handle::{
    Handle, HandleAllocator, HandleKind, HandshakeHandle, IdentityHandle, ParticipantCryptoHandle,
};
pub use handshake::{AuthState, ParticipantAuthState, Role};
pub use manager::{
    AuthStatus, DiscoveredParticipant, ParticipantAnnouncer, ParticipantAuthListener,
    SecurityManager, SecurityPlugins,
};
pub use message::{AuthenticationMessage, MessageIdentity, AUTH_CLASS_ID};
