// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Opaque, move-only handles issued by security plugins.
//!
//! A handle is an ownership token: the core never looks inside it, it only
//! hands it back to the plugin that issued it. Returning a handle consumes it,
//! so a handle cannot be returned twice. A handle that is dropped without
//! being retired by its plugin is a leak and is reported through `log::error!`.
//!
//! ```
//! use hdds_auth::security::{HandleAllocator, IdentityHandle};
//!
//! let allocator = HandleAllocator::new();
//! let handle: IdentityHandle = allocator.issue();
//! assert_eq!(handle.id(), 1);
//! assert_eq!(handle.retire(), 1);
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

/// Marker trait naming a handle family.
pub trait HandleKind {
    const NAME: &'static str;
}

/// Marker for identity handles.
#[derive(Debug)]
pub enum Identity {}
/// Marker for plugin-side handshake contexts.
#[derive(Debug)]
pub enum Handshake {}
/// Marker for participant-scoped crypto material.
#[derive(Debug)]
pub enum ParticipantCrypto {}

impl HandleKind for Identity {
    const NAME: &'static str = "identity";
}

impl HandleKind for Handshake {
    const NAME: &'static str = "handshake";
}

impl HandleKind for ParticipantCrypto {
    const NAME: &'static str = "participant crypto";
}

/// Move-only ownership token for plugin-side state.
pub struct Handle<K: HandleKind> {
    id: u64,
    retired: bool,
    _kind: PhantomData<fn() -> K>,
}

pub type IdentityHandle = Handle<Identity>;
pub type HandshakeHandle = Handle<Handshake>;
pub type ParticipantCryptoHandle = Handle<ParticipantCrypto>;

impl<K: HandleKind> Handle<K> {
    /// Wrap a plugin-chosen id. Only plugins should mint handles.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            retired: false,
            _kind: PhantomData,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Mark the handle as returned and give back its id.
    ///
    /// Called by the issuing plugin when the handle comes home.
    pub fn retire(mut self) -> u64 {
        self.retired = true;
        self.id
    }
}

impl<K: HandleKind> Drop for Handle<K> {
    fn drop(&mut self) {
        if !self.retired && !std::thread::panicking() {
            log::error!(
                "[security] {} handle {} dropped without being returned to its plugin",
                K::NAME,
                self.id
            );
        }
    }
}

impl<K: HandleKind> PartialEq for Handle<K> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<K: HandleKind> Eq for Handle<K> {}

impl<K: HandleKind> Hash for Handle<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<K: HandleKind> fmt::Debug for Handle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle<{}>({})", K::NAME, self.id)
    }
}

/// Per-plugin source of unique handle ids (starting at 1).
#[derive(Debug)]
pub struct HandleAllocator {
    next: AtomicU64,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn issue<K: HandleKind>(&self) -> Handle<K> {
        Handle::new(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new()
    }
}
