// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Authentication message envelope (ParticipantStatelessMessage)
//!
//! # Wire Format (little-endian)
//!
//! ```text
//! +------------------------------------------+
//! | message_identity.source_guid  (16 bytes) |
//! | message_identity.sequence     (u64)      |
//! +------------------------------------------+
//! | related_identity.source_guid  (16 bytes) |  zero when starting
//! | related_identity.sequence     (u64)      |  an exchange
//! +------------------------------------------+
//! | destination_participant_key   (16 bytes) |
//! +------------------------------------------+
//! | class_id length (u32, incl. NUL)         |
//! | class_id bytes + NUL, padded to 4        |
//! +------------------------------------------+
//! | token count (u32)                        |
//! | per token: length (u32) + bytes,         |
//! |            padded to 4                   |
//! +------------------------------------------+
//! ```

use crate::core::ser::{Cursor, CursorMut, SerError, SerResult};
use crate::core::GUID;

use super::authentication::HandshakeMessageToken;

/// Class discriminator of authentication handshake messages.
pub const AUTH_CLASS_ID: &str = "dds.sec.auth";

/// Upper bound on tokens accepted from the wire.
const MAX_TOKENS: usize = 16;

/// Fixed-size prefix: two identities and the destination key.
const HEADER_LEN: usize = 2 * (GUID::LEN + 8) + GUID::LEN;

/// Identity of a message: its sender and the sender's sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageIdentity {
    pub source_guid: GUID,
    pub sequence_number: u64,
}

impl MessageIdentity {
    pub fn new(source_guid: GUID, sequence_number: u64) -> Self {
        Self {
            source_guid,
            sequence_number,
        }
    }

    /// All-zero identity used when a message answers nothing.
    pub fn unset() -> Self {
        Self::default()
    }

    pub fn is_unset(&self) -> bool {
        self.source_guid.is_zero() && self.sequence_number == 0
    }

    fn write(&self, cursor: &mut CursorMut<'_>) -> SerResult<()> {
        cursor.write_bytes(&self.source_guid.as_bytes())?;
        cursor.write_u64_le(self.sequence_number)
    }

    fn read(cursor: &mut Cursor<'_>) -> SerResult<Self> {
        let source_guid = read_guid(cursor)?;
        let sequence_number = cursor.read_u64_le()?;
        Ok(Self {
            source_guid,
            sequence_number,
        })
    }
}

/// Authentication message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationMessage {
    pub message_identity: MessageIdentity,
    pub related_message_identity: MessageIdentity,
    pub destination_participant_key: GUID,
    pub message_class_id: String,
    pub message_data: Vec<HandshakeMessageToken>,
}

impl AuthenticationMessage {
    /// Build an authentication-class message carrying one token.
    pub fn new(
        message_identity: MessageIdentity,
        related_message_identity: MessageIdentity,
        destination_participant_key: GUID,
        token: HandshakeMessageToken,
    ) -> Self {
        Self {
            message_identity,
            related_message_identity,
            destination_participant_key,
            message_class_id: AUTH_CLASS_ID.to_string(),
            message_data: vec![token],
        }
    }

    pub fn is_auth_class(&self) -> bool {
        self.message_class_id == AUTH_CLASS_ID
    }

    /// First (and in this protocol only) token.
    pub fn token(&self) -> Option<&HandshakeMessageToken> {
        self.message_data.first()
    }

    /// Exact number of bytes `encode_into` writes.
    pub fn serialized_size(&self) -> usize {
        let mut size = HEADER_LEN;
        size += 4 + self.message_class_id.len() + 1;
        size = align4(size);
        size += 4;
        for token in &self.message_data {
            size += 4 + token.len();
            size = align4(size);
        }
        size
    }

    /// Serialize into `buf`, returning the number of bytes written.
    pub fn encode_into(&self, buf: &mut [u8]) -> SerResult<usize> {
        let mut cursor = CursorMut::new(buf);
        self.message_identity.write(&mut cursor)?;
        self.related_message_identity.write(&mut cursor)?;
        cursor.write_bytes(&self.destination_participant_key.as_bytes())?;

        cursor.write_u32_le(len_u32(self.message_class_id.len() + 1)?)?;
        cursor.write_bytes(self.message_class_id.as_bytes())?;
        cursor.write_u8(0)?;
        cursor.align(4)?;

        cursor.write_u32_le(len_u32(self.message_data.len())?)?;
        for token in &self.message_data {
            cursor.write_u32_le(len_u32(token.len())?)?;
            cursor.write_bytes(token.as_bytes())?;
            cursor.align(4)?;
        }
        Ok(cursor.offset())
    }

    pub fn encode(&self) -> SerResult<Vec<u8>> {
        let mut buf = vec![0u8; self.serialized_size()];
        let written = self.encode_into(&mut buf)?;
        buf.truncate(written);
        Ok(buf)
    }

    /// Parse a message. Trailing bytes after the last token are ignored.
    pub fn decode(buf: &[u8]) -> SerResult<Self> {
        let mut cursor = Cursor::new(buf);
        let message_identity = MessageIdentity::read(&mut cursor)?;
        let related_message_identity = MessageIdentity::read(&mut cursor)?;
        let destination_participant_key = read_guid(&mut cursor)?;

        let class_len = cursor.read_u32_le()? as usize;
        if class_len == 0 {
            return Err(SerError::InvalidData {
                reason: "empty class id".into(),
            });
        }
        let raw = cursor.read_bytes(class_len)?;
        let (text, nul) = raw.split_at(class_len - 1);
        if nul != [0] {
            return Err(SerError::InvalidData {
                reason: "class id not NUL-terminated".into(),
            });
        }
        let message_class_id = std::str::from_utf8(text)
            .map_err(|_| SerError::InvalidData {
                reason: "class id is not UTF-8".into(),
            })?
            .to_string();
        cursor.align(4)?;

        let count = cursor.read_u32_le()? as usize;
        if count > MAX_TOKENS {
            return Err(SerError::InvalidData {
                reason: format!("{} tokens exceeds limit of {}", count, MAX_TOKENS),
            });
        }
        let mut message_data = Vec::with_capacity(count);
        for _ in 0..count {
            let len = cursor.read_u32_le()? as usize;
            let bytes = cursor.read_bytes(len)?;
            message_data.push(HandshakeMessageToken::new(bytes.to_vec()));
            // The last token may legitimately end without padding.
            if cursor.remaining() > 0 {
                cursor.align(4)?;
            }
        }

        Ok(Self {
            message_identity,
            related_message_identity,
            destination_participant_key,
            message_class_id,
            message_data,
        })
    }
}

fn read_guid(cursor: &mut Cursor<'_>) -> SerResult<GUID> {
    let mut bytes = [0u8; GUID::LEN];
    bytes.copy_from_slice(cursor.read_bytes(GUID::LEN)?);
    Ok(GUID::from_bytes(bytes))
}

fn len_u32(len: usize) -> SerResult<u32> {
    u32::try_from(len).map_err(|_| SerError::InvalidData {
        reason: format!("length {} does not fit in u32", len),
    })
}

#[inline]
fn align4(n: usize) -> usize {
    (n + 3) & !3
}
