// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Handshake message channel over the stateless endpoints.
//!
//! Send allocates a change sized for the envelope, serializes straight into
//! it and publishes it. Resend takes the published change back out of the
//! writer history and republishes it untouched, so the peer sees the same
//! change sequence number and the same message identity. Receive always
//! consumes the change from the reader history, even when it is dropped.

use std::sync::Arc;

use crate::history::{CacheChange, ReaderHistory, WriterEndpoint};

use super::message::AuthenticationMessage;
use super::SecurityError;

/// Adapter between authentication messages and change histories.
pub struct HandshakeChannel {
    writer: WriterEndpoint,
    reader_history: Arc<dyn ReaderHistory>,
}

impl HandshakeChannel {
    pub fn new(writer: WriterEndpoint, reader_history: Arc<dyn ReaderHistory>) -> Self {
        Self {
            writer,
            reader_history,
        }
    }

    pub fn writer(&self) -> &WriterEndpoint {
        &self.writer
    }

    /// Publish `message`, returning the change sequence number used.
    ///
    /// On failure nothing is left behind in the writer history.
    pub fn send(&self, message: &AuthenticationMessage) -> Result<u64, SecurityError> {
        let history = &self.writer.history;
        let mut change = history
            .new_change(message.serialized_size())
            .ok_or_else(|| {
                SecurityError::ResourceExhausted("no change available for handshake message".into())
            })?;

        if let Err(e) = message.encode_into(&mut change.payload) {
            history.release_change(change);
            return Err(e.into());
        }

        match history.add_change(change) {
            Ok(seq) => {
                log::trace!(
                    "[security] sent auth message seq={} to {} (change seq={})",
                    message.message_identity.sequence_number,
                    message.destination_participant_key,
                    seq
                );
                Ok(seq)
            }
            Err(change) => {
                history.release_change(change);
                Err(SecurityError::ResourceExhausted(
                    "writer history rejected handshake message".into(),
                ))
            }
        }
    }

    /// Republish the change `change_seq` as is. Returns `false` if it is gone.
    pub fn resend(&self, change_seq: u64) -> bool {
        let history = &self.writer.history;
        let Some(change) = history.remove_change_and_reuse(change_seq) else {
            log::debug!("[security] change seq={} no longer in history", change_seq);
            return false;
        };
        match history.add_change(change) {
            Ok(_) => true,
            Err(change) => {
                log::warn!(
                    "[security] resend of change seq={} rejected by writer history",
                    change_seq
                );
                history.release_change(change);
                false
            }
        }
    }

    /// Stop retransmitting the change `change_seq`.
    pub fn retire(&self, change_seq: u64) -> bool {
        self.writer.history.remove_change(change_seq)
    }

    /// Consume an inbound change; `Some` only for well-formed authentication
    /// class messages.
    pub fn receive(&self, change: &CacheChange) -> Option<AuthenticationMessage> {
        if !self.reader_history.remove_change(change) {
            log::trace!(
                "[security] inbound change seq={} from {} was not in reader history",
                change.sequence_number,
                change.writer_guid
            );
        }

        match AuthenticationMessage::decode(&change.payload) {
            Ok(message) if message.is_auth_class() => Some(message),
            Ok(message) => {
                log::trace!(
                    "[security] dropping message of class '{}'",
                    message.message_class_id
                );
                None
            }
            Err(e) => {
                log::debug!(
                    "[security] dropping malformed message from {}: {}",
                    change.writer_guid,
                    e
                );
                None
            }
        }
    }
}
