// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # hdds-auth - DDS Security participant authentication core
//!
//! Decides whether discovered remote participants are trusted. Identity
//! validation and handshake tokens are delegated to a pluggable
//! authentication provider; this crate runs the per-participant handshake,
//! frames and correlates the messages, retransmits what the best-effort
//! channel loses and makes sure every plugin handle goes back exactly once.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use hdds_auth::history::{link, MemoryEndpointFactory};
//! use hdds_auth::security::builtin::{ChallengeAuthPlugin, SessionKeyFactory};
//! use hdds_auth::security::{AuthConfig, DiscoveredParticipant, SecurityManager, SecurityPlugins};
//! use hdds_auth::GUID;
//!
//! # fn main() -> Result<(), hdds_auth::security::SecurityError> {
//! let domain_key = b"shared domain secret";
//! let (guid_a, guid_b) = (GUID::participant([1; 12]), GUID::participant([2; 12]));
//! let factory_a = Arc::new(MemoryEndpointFactory::new(16));
//! let factory_b = Arc::new(MemoryEndpointFactory::new(16));
//!
//! let plugins = || SecurityPlugins::new(
//!     Arc::new(ChallengeAuthPlugin::new(domain_key)),
//!     Arc::new(SessionKeyFactory::new()),
//! );
//! let a = SecurityManager::new(guid_a, AuthConfig::default(), plugins(), factory_a.clone());
//! let b = SecurityManager::new(guid_b, AuthConfig::default(), plugins(), factory_b.clone());
//! a.init()?;
//! b.init()?;
//! link(&factory_a, &factory_b)?;
//!
//! a.discovered_participant(&DiscoveredParticipant::new(guid_b, b.local_identity_token()?))?;
//! b.discovered_participant(&DiscoveredParticipant::new(guid_a, a.local_identity_token()?))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`core`] | [`GUID`] and the little-endian cursor codec |
//! | [`history`] | Writer/reader history contracts and in-memory versions |
//! | [`security`] | Plugin contracts, handles, message envelope, [`SecurityManager`](security::SecurityManager) |
//!
//! ## Features
//!
//! - `builtin-plugins` (default): reference challenge-response authentication
//!   and HKDF key factory under [`security::builtin`].

pub mod core;
pub mod history;
pub mod security;

pub use crate::core::GUID;
pub use security::{
    AuthConfig, AuthStatus, DiscoveredParticipant, SecurityError, SecurityManager, SecurityPlugins,
};
