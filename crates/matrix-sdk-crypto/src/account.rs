// Copyright 2021 The Matrix.org Foundation C.I.C.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The account's long-term Curve25519/Ed25519 identity keys and one-time key
//! ring, pickled under a pickling key for storage (spec §3 `OlmAccount`).

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vodozemac::{olm::Account as InnerAccount, Curve25519PublicKey, Ed25519PublicKey, Ed25519Signature};

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("failed to unpickle the Olm account: {0}")]
    Pickle(#[from] vodozemac::PickleError),
}

/// A pickled [`OlmAccount`], serialisable for storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickledAccount {
    pub pickle: vodozemac::olm::AccountPickle,
}

/// Owns the connection's long-term identity keys and one-time key ring
/// (spec §3, §4.7). Access is serialised behind a mutex even though the
/// runtime is single-threaded per connection, so the account can be shared
/// with a worker pool doing offloaded crypto work (spec §5).
pub struct OlmAccount {
    inner: Mutex<InnerAccount>,
}

impl OlmAccount {
    /// Generate a fresh account with new identity keys.
    pub fn new() -> Self {
        Self { inner: Mutex::new(InnerAccount::new()) }
    }

    /// Restore an account from a pickle produced by [`Self::pickle`].
    pub fn from_pickle(pickled: PickledAccount) -> Self {
        Self { inner: Mutex::new(InnerAccount::from_pickle(pickled.pickle)) }
    }

    /// Pickle the account for storage.
    pub fn pickle(&self) -> PickledAccount {
        PickledAccount { pickle: self.inner.lock().unwrap().pickle() }
    }

    pub fn curve25519_key(&self) -> Curve25519PublicKey {
        self.inner.lock().unwrap().curve25519_key()
    }

    pub fn ed25519_key(&self) -> Ed25519PublicKey {
        self.inner.lock().unwrap().ed25519_key()
    }

    /// Generate `count` new one-time keys, replacing any that were already
    /// generated but not yet marked as published.
    pub fn generate_one_time_keys(&self, count: usize) {
        self.inner.lock().unwrap().generate_one_time_keys(count);
    }

    pub fn one_time_keys(&self) -> std::collections::HashMap<String, Curve25519PublicKey> {
        self.inner
            .lock()
            .unwrap()
            .one_time_keys()
            .into_iter()
            .map(|(id, key)| (id.to_base64(), key))
            .collect()
    }

    pub fn mark_keys_as_published(&self) {
        self.inner.lock().unwrap().mark_keys_as_published();
    }

    /// Sign `message` with the account's Ed25519 identity key (spec §4.7).
    pub fn sign(&self, message: &str) -> Ed25519Signature {
        self.inner.lock().unwrap().sign(message)
    }
}

impl Default for OlmAccount {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::OlmAccount;

    #[test]
    fn round_trips_through_a_pickle() {
        let account = OlmAccount::new();
        let curve_key = account.curve25519_key();

        let pickled = account.pickle();
        let restored = OlmAccount::from_pickle(pickled);

        assert_eq!(restored.curve25519_key(), curve_key);
    }

    #[test]
    fn signing_is_verifiable_with_the_public_key() {
        let account = OlmAccount::new();
        let signature = account.sign("hello");
        assert!(account.ed25519_key().verify("hello", &signature).is_ok());
    }
}
