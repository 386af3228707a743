// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Change histories and builtin endpoints carrying authentication traffic.
//!
//! The authentication core never owns a transport. It talks to the data path
//! through the narrow traits below: a writer history it allocates changes
//! from and publishes into, a reader history it consumes inbound changes from,
//! and an [`EndpointFactory`] that provisions the builtin endpoints during
//! `SecurityManager::init()`.
//!
//! ```text
//! SecurityManager
//! +-- stateless writer  (WriterHistory)   -> peers
//! +-- stateless reader  (ReaderHistory)   <- peers, crossbeam Receiver
//! +-- volatile writer / reader            (key exchange, provisioned only)
//! ```
//!
//! [`memory`] ships in-process implementations used by tests and demos.

/// In-process histories, endpoint factory and loopback.
pub mod memory;
/// Sequence number generation.
pub mod seq;

pub use memory::{link, MemoryEndpointFactory, MemoryReaderHistory, MemoryWriterHistory};
pub use seq::SeqNumGenerator;

use std::fmt;
use std::sync::Arc;

use crossbeam::channel::Receiver;

use crate::core::GUID;
use crate::security::SecurityError;

/// Entity ID of the participant stateless message writer.
pub const ENTITYID_STATELESS_WRITER: [u8; 4] = [0x00, 0x02, 0x01, 0xC3];
/// Entity ID of the participant stateless message reader.
pub const ENTITYID_STATELESS_READER: [u8; 4] = [0x00, 0x02, 0x01, 0xC4];
/// Entity ID of the participant volatile secure message writer.
pub const ENTITYID_VOLATILE_WRITER: [u8; 4] = [0xFF, 0x02, 0x02, 0xC3];
/// Entity ID of the participant volatile secure message reader.
pub const ENTITYID_VOLATILE_READER: [u8; 4] = [0xFF, 0x02, 0x02, 0xC4];

/// A sequence-numbered change record.
///
/// `sequence_number` is 0 until the change is published; a change taken back
/// through [`WriterHistory::remove_change_and_reuse`] keeps its number.
#[derive(Clone, PartialEq, Eq)]
pub struct CacheChange {
    pub sequence_number: u64,
    pub writer_guid: GUID,
    pub payload: Vec<u8>,
}

impl CacheChange {
    pub fn new(writer_guid: GUID, size: usize) -> Self {
        Self {
            sequence_number: 0,
            writer_guid,
            payload: vec![0u8; size],
        }
    }
}

impl fmt::Debug for CacheChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheChange")
            .field("sequence_number", &self.sequence_number)
            .field("writer_guid", &self.writer_guid)
            .field("len", &self.payload.len())
            .finish()
    }
}

/// Writer-side history operations used by the authentication core.
pub trait WriterHistory: Send + Sync {
    /// Allocate a zeroed change of `size` bytes. `None` when exhausted.
    fn new_change(&self, size: usize) -> Option<CacheChange>;

    /// Publish a change. On failure the change is handed back so the caller
    /// can release it.
    fn add_change(&self, change: CacheChange) -> Result<u64, CacheChange>;

    /// Drop a published change so it is no longer retransmitted.
    fn remove_change(&self, sequence_number: u64) -> bool;

    /// Take a published change back out, keeping its sequence number and bytes.
    fn remove_change_and_reuse(&self, sequence_number: u64) -> Option<CacheChange>;

    /// Give back a change that was allocated but never published.
    fn release_change(&self, change: CacheChange);
}

/// Reader-side history operations used by the authentication core.
pub trait ReaderHistory: Send + Sync {
    fn remove_change(&self, change: &CacheChange) -> bool;
}

/// The two logical message paths provisioned for authentication traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Best-effort, used for handshake messages.
    Stateless,
    /// Reliable volatile, used for key exchange once authorized.
    Volatile,
}

impl ChannelKind {
    pub fn writer_entity_id(self) -> [u8; 4] {
        match self {
            Self::Stateless => ENTITYID_STATELESS_WRITER,
            Self::Volatile => ENTITYID_VOLATILE_WRITER,
        }
    }

    pub fn reader_entity_id(self) -> [u8; 4] {
        match self {
            Self::Stateless => ENTITYID_STATELESS_READER,
            Self::Volatile => ENTITYID_VOLATILE_READER,
        }
    }
}

/// A provisioned writer endpoint.
#[derive(Clone)]
pub struct WriterEndpoint {
    pub guid: GUID,
    pub history: Arc<dyn WriterHistory>,
}

/// A provisioned reader endpoint. Inbound changes are announced on `incoming`.
pub struct ReaderEndpoint {
    pub guid: GUID,
    pub history: Arc<dyn ReaderHistory>,
    pub incoming: Receiver<CacheChange>,
}

/// Creates the builtin endpoints of a participant.
pub trait EndpointFactory: Send + Sync {
    fn create_writer(
        &self,
        participant: GUID,
        kind: ChannelKind,
    ) -> Result<WriterEndpoint, SecurityError>;

    fn create_reader(
        &self,
        participant: GUID,
        kind: ChannelKind,
    ) -> Result<ReaderEndpoint, SecurityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_entity_ids_are_distinct() {
        let ids = [
            ChannelKind::Stateless.writer_entity_id(),
            ChannelKind::Stateless.reader_entity_id(),
            ChannelKind::Volatile.writer_entity_id(),
            ChannelKind::Volatile.reader_entity_id(),
        ];
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_new_change_is_unpublished_and_zeroed() {
        let change = CacheChange::new(GUID::participant([3; 12]), 8);
        assert_eq!(change.sequence_number, 0);
        assert_eq!(change.payload, vec![0u8; 8]);
        assert!(format!("{:?}", change).contains("len: 8"));
    }
}
