// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process histories for authentication traffic.
//!
//! `MemoryWriterHistory` is a bounded ring of published changes (KEEP_LAST
//! eviction) that also forwards every publication to connected peer readers.
//! Together with [`link`] it gives two security managers in the same process a
//! lossless stateless channel, which is all the handshake needs to complete.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use super::{
    CacheChange, ChannelKind, EndpointFactory, ReaderEndpoint, ReaderHistory, SeqNumGenerator,
    WriterEndpoint, WriterHistory,
};
use crate::core::GUID;
use crate::security::{AuthConfig, SecurityError};

/// Bounded writer history with loopback delivery.
pub struct MemoryWriterHistory {
    guid: GUID,
    depth: usize,
    seq: SeqNumGenerator,
    ring: Mutex<VecDeque<CacheChange>>,
    /// Changes handed out by `new_change`/`remove_change_and_reuse` and not yet
    /// published or released.
    outstanding: AtomicUsize,
    peers: Mutex<Vec<Arc<MemoryReaderHistory>>>,
}

impl MemoryWriterHistory {
    pub fn new(guid: GUID, depth: usize) -> Self {
        Self {
            guid,
            depth: depth.max(1),
            seq: SeqNumGenerator::new(),
            ring: Mutex::new(VecDeque::with_capacity(depth)),
            outstanding: AtomicUsize::new(0),
            peers: Mutex::new(Vec::new()),
        }
    }

    pub fn guid(&self) -> GUID {
        self.guid
    }

    /// Forward every future publication to `peer`.
    pub fn connect(&self, peer: Arc<MemoryReaderHistory>) {
        self.peers.lock().push(peer);
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }

    /// Sequence numbers currently held, oldest publication first.
    pub fn sequence_numbers(&self) -> Vec<u64> {
        self.ring.lock().iter().map(|c| c.sequence_number).collect()
    }

    pub fn get(&self, sequence_number: u64) -> Option<CacheChange> {
        self.ring
            .lock()
            .iter()
            .find(|c| c.sequence_number == sequence_number)
            .cloned()
    }

    /// Number of changes allocated but neither published nor released.
    pub fn outstanding_changes(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    fn settle_outstanding(&self) {
        let _ = self
            .outstanding
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
    }
}

impl WriterHistory for MemoryWriterHistory {
    fn new_change(&self, size: usize) -> Option<CacheChange> {
        if self.outstanding.load(Ordering::Relaxed) >= self.depth {
            log::debug!(
                "[history] writer {} refused allocation: {} changes outstanding",
                self.guid,
                self.depth
            );
            return None;
        }
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        Some(CacheChange::new(self.guid, size))
    }

    fn add_change(&self, mut change: CacheChange) -> Result<u64, CacheChange> {
        if change.writer_guid != self.guid {
            return Err(change);
        }
        if change.sequence_number == 0 {
            change.sequence_number = self.seq.next();
        }
        let seq = change.sequence_number;
        let delivered = change.clone();

        {
            let mut ring = self.ring.lock();
            ring.push_back(change);
            while ring.len() > self.depth {
                if let Some(evicted) = ring.pop_front() {
                    log::debug!(
                        "[history] writer {} evicted seq={}",
                        self.guid,
                        evicted.sequence_number
                    );
                }
            }
        }
        self.settle_outstanding();

        let peers = self.peers.lock().clone();
        for peer in peers {
            peer.deliver(delivered.clone());
        }
        Ok(seq)
    }

    fn remove_change(&self, sequence_number: u64) -> bool {
        let mut ring = self.ring.lock();
        let before = ring.len();
        ring.retain(|c| c.sequence_number != sequence_number);
        ring.len() != before
    }

    fn remove_change_and_reuse(&self, sequence_number: u64) -> Option<CacheChange> {
        let mut ring = self.ring.lock();
        let pos = ring
            .iter()
            .position(|c| c.sequence_number == sequence_number)?;
        let change = ring.remove(pos)?;
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        Some(change)
    }

    fn release_change(&self, change: CacheChange) {
        log::trace!(
            "[history] writer {} released unpublished change ({} bytes)",
            self.guid,
            change.payload.len()
        );
        self.settle_outstanding();
    }
}

/// Reader history that announces each delivered change on a crossbeam channel.
pub struct MemoryReaderHistory {
    guid: GUID,
    changes: Mutex<Vec<CacheChange>>,
    incoming: Sender<CacheChange>,
}

impl MemoryReaderHistory {
    pub fn new(guid: GUID) -> (Arc<Self>, Receiver<CacheChange>) {
        let (tx, rx) = channel::unbounded();
        let reader = Arc::new(Self {
            guid,
            changes: Mutex::new(Vec::new()),
            incoming: tx,
        });
        (reader, rx)
    }

    pub fn guid(&self) -> GUID {
        self.guid
    }

    /// Store `change` and notify the consumer.
    pub fn deliver(&self, change: CacheChange) {
        self.changes.lock().push(change.clone());
        if self.incoming.send(change).is_err() {
            log::trace!("[history] reader {} has no consumer", self.guid);
        }
    }

    pub fn len(&self) -> usize {
        self.changes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.lock().is_empty()
    }
}

impl ReaderHistory for MemoryReaderHistory {
    fn remove_change(&self, change: &CacheChange) -> bool {
        let mut changes = self.changes.lock();
        let pos = changes.iter().position(|c| {
            c.writer_guid == change.writer_guid && c.sequence_number == change.sequence_number
        });
        match pos {
            Some(pos) => {
                changes.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// Endpoint factory backed by memory histories.
///
/// Keeps a reference to everything it creates so tests can inspect the
/// histories and [`link`] two participants together.
pub struct MemoryEndpointFactory {
    depth: usize,
    writers: Mutex<HashMap<ChannelKind, Arc<MemoryWriterHistory>>>,
    readers: Mutex<HashMap<ChannelKind, Arc<MemoryReaderHistory>>>,
}

impl MemoryEndpointFactory {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            writers: Mutex::new(HashMap::new()),
            readers: Mutex::new(HashMap::new()),
        }
    }

    /// Factory whose writer histories hold `config.writer_history_depth` changes.
    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.writer_history_depth)
    }

    pub fn writer(&self, kind: ChannelKind) -> Option<Arc<MemoryWriterHistory>> {
        self.writers.lock().get(&kind).cloned()
    }

    pub fn reader(&self, kind: ChannelKind) -> Option<Arc<MemoryReaderHistory>> {
        self.readers.lock().get(&kind).cloned()
    }
}

impl EndpointFactory for MemoryEndpointFactory {
    fn create_writer(
        &self,
        participant: GUID,
        kind: ChannelKind,
    ) -> Result<WriterEndpoint, SecurityError> {
        let guid = GUID::new(participant.prefix, kind.writer_entity_id());
        let history = Arc::new(MemoryWriterHistory::new(guid, self.depth));
        self.writers.lock().insert(kind, Arc::clone(&history));
        Ok(WriterEndpoint { guid, history })
    }

    fn create_reader(
        &self,
        participant: GUID,
        kind: ChannelKind,
    ) -> Result<ReaderEndpoint, SecurityError> {
        let guid = GUID::new(participant.prefix, kind.reader_entity_id());
        let (history, incoming) = MemoryReaderHistory::new(guid);
        self.readers.lock().insert(kind, Arc::clone(&history));
        Ok(ReaderEndpoint {
            guid,
            history,
            incoming,
        })
    }
}

/// Cross-connect the provisioned endpoints of two participants.
///
/// Each writer of `a` delivers to the reader of the same kind on `b` and vice
/// versa. Both factories must already have provisioned their endpoints.
pub fn link(a: &MemoryEndpointFactory, b: &MemoryEndpointFactory) -> Result<(), SecurityError> {
    for kind in [ChannelKind::Stateless, ChannelKind::Volatile] {
        let (a_writer, a_reader) = a
            .writer(kind)
            .zip(a.reader(kind))
            .ok_or(SecurityError::NotInitialized)?;
        let (b_writer, b_reader) = b
            .writer(kind)
            .zip(b.reader(kind))
            .ok_or(SecurityError::NotInitialized)?;
        a_writer.connect(b_reader);
        b_writer.connect(a_reader);
    }
    Ok(())
}
