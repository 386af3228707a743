// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Core RTPS building blocks used by the authentication layer.

/// Participant GUID.
pub mod guid;
/// Little-endian cursors and codec errors.
pub mod ser;

pub use guid::{ENTITYID_PARTICIPANT, GUID};
