// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reference plugins
//!
//! Small, self-contained implementations of the two plugin contracts, backed
//! by `ring`. They make a [`SecurityManager`](super::SecurityManager) usable
//! end to end without a PKI.

mod challenge;
mod crypto;

pub use challenge::ChallengeAuthPlugin;
pub use crypto::SessionKeyFactory;
