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

//! Megolm room-key bookkeeping: outbound sessions (one per encrypted room,
//! rotated periodically), inbound sessions keyed by `(sender_curve25519_key,
//! session_id)`, and the replay-protection table required by spec §3's
//! "Megolm replay protection" invariant.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use matrix_sdk_common::{identifiers::OwnedEventId, MilliSecondsSinceUnixEpoch};
use thiserror::Error;
use vodozemac::{
    megolm::{
        GroupSession, InboundGroupSession as InnerInboundSession, MegolmMessage, SessionConfig,
        SessionKey,
    },
    Curve25519PublicKey,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MegolmError {
    /// No inbound session for `(sender_key, session_id)` — spec §7
    /// `Undecryptable`.
    #[error("no megolm session for this message")]
    UnknownSession,
    #[error("failed to decrypt the megolm ciphertext")]
    Decryption,
    /// A `(session_id, message_index)` was seen before with a different
    /// `(event_id, origin_ts)` — spec §3 "Megolm replay protection".
    #[error("message index {0} was already used with a different event")]
    ReplayRejected(u32),
    /// The advertised `session_id` in an `m.room_key` event didn't match the
    /// session actually constructed from its `session_key` (spec §4.7).
    #[error("the advertised session id does not match the constructed session")]
    SessionIdMismatch,
}

/// A room key ready to encrypt outgoing messages. Rotated by the owner
/// (matrix-sdk) once it passes its configured message or time budget.
pub struct OutboundGroupSession {
    inner: Mutex<GroupSession>,
    created_at: Instant,
    messages_sent: Mutex<u64>,
}

impl OutboundGroupSession {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(GroupSession::new(SessionConfig::version_1())),
            created_at: Instant::now(),
            messages_sent: Mutex::new(0),
        }
    }

    pub fn session_id(&self) -> String {
        self.inner.lock().unwrap().session_id()
    }

    pub fn session_key(&self) -> SessionKey {
        self.inner.lock().unwrap().session_key()
    }

    /// Encrypt `plaintext` (the canonical-JSON event payload) for this room.
    pub fn encrypt(&self, plaintext: &str) -> MegolmMessage {
        let message = self.inner.lock().unwrap().encrypt(plaintext);
        *self.messages_sent.lock().unwrap() += 1;
        message
    }

    /// Whether this session has exceeded `max_messages` or `max_age` and
    /// should be rotated (spec §4.7).
    pub fn should_rotate(&self, max_messages: u64, max_age: Duration) -> bool {
        *self.messages_sent.lock().unwrap() >= max_messages || self.created_at.elapsed() >= max_age
    }
}

impl Default for OutboundGroupSession {
    fn default() -> Self {
        Self::new()
    }
}

/// One accepted `(event_id, origin_server_ts)` for a `(session_id,
/// message_index)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReplayRecord {
    event_id: OwnedEventId,
    origin_server_ts: MilliSecondsSinceUnixEpoch,
}

/// An inbound Megolm session used to decrypt events from one sender in one
/// room (spec §3 `MegolmInboundSession`).
pub struct InboundGroupSession {
    inner: Mutex<InnerInboundSession>,
    session_id: String,
    sender_curve25519_key: Curve25519PublicKey,
    replay_table: Mutex<HashMap<u32, ReplayRecord>>,
}

impl InboundGroupSession {
    /// Construct an inbound session from a `m.room_key` event's
    /// `session_key`, verifying the advertised `session_id` matches.
    pub fn new(
        sender_curve25519_key: Curve25519PublicKey,
        session_key: &SessionKey,
        advertised_session_id: &str,
    ) -> Result<Self, MegolmError> {
        let session = InnerInboundSession::new(session_key, SessionConfig::version_1());
        let session_id = session.session_id();

        if session_id != advertised_session_id {
            return Err(MegolmError::SessionIdMismatch);
        }

        Ok(Self {
            inner: Mutex::new(session),
            session_id,
            sender_curve25519_key,
            replay_table: Mutex::new(HashMap::new()),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn sender_curve25519_key(&self) -> Curve25519PublicKey {
        self.sender_curve25519_key
    }

    /// Decrypt `ciphertext`, enforcing replay protection: a `message_index`
    /// already seen must carry the same `(event_id, origin_server_ts)`.
    pub fn decrypt(
        &self,
        ciphertext: &MegolmMessage,
        event_id: &OwnedEventId,
        origin_server_ts: MilliSecondsSinceUnixEpoch,
    ) -> Result<String, MegolmError> {
        let decrypted =
            self.inner.lock().unwrap().decrypt(ciphertext).map_err(|_| MegolmError::Decryption)?;

        let mut table = self.replay_table.lock().unwrap();
        let record = ReplayRecord { event_id: event_id.clone(), origin_server_ts };
        match table.get(&decrypted.message_index) {
            Some(existing) if *existing != record => {
                return Err(MegolmError::ReplayRejected(decrypted.message_index));
            }
            Some(_) => {}
            None => {
                table.insert(decrypted.message_index, record);
            }
        }

        Ok(String::from_utf8_lossy(&decrypted.plaintext).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use matrix_sdk_common::{identifiers::EventId, MilliSecondsSinceUnixEpoch};
    use vodozemac::olm::Account;

    use super::{InboundGroupSession, MegolmError, OutboundGroupSession};

    #[test]
    fn inbound_session_rejects_wrong_advertised_id() {
        let outbound = OutboundGroupSession::new();
        let account = Account::new();
        let err = InboundGroupSession::new(
            account.curve25519_key(),
            &outbound.session_key(),
            "not-the-real-id",
        )
        .unwrap_err();
        assert_eq!(err, MegolmError::SessionIdMismatch);
    }

    #[test]
    fn decrypt_round_trips_and_rejects_conflicting_replay() {
        let outbound = OutboundGroupSession::new();
        let account = Account::new();
        let session_id = outbound.session_id();
        let inbound =
            InboundGroupSession::new(account.curve25519_key(), &outbound.session_key(), &session_id)
                .unwrap();

        let ciphertext = outbound.encrypt("hello world");
        let event_id = EventId::parse("$a:example.org").unwrap().to_owned();
        let ts = MilliSecondsSinceUnixEpoch::now();

        let plaintext = inbound.decrypt(&ciphertext, &event_id, ts).unwrap();
        assert_eq!(plaintext, "hello world");

        // Same (event_id, ts) replayed at the same index is accepted idempotently.
        assert!(inbound.decrypt(&ciphertext, &event_id, ts).is_ok());

        // A conflicting event_id at the same index is rejected.
        let other_event_id = EventId::parse("$b:example.org").unwrap().to_owned();
        let err = inbound.decrypt(&ciphertext, &other_event_id, ts).unwrap_err();
        assert_eq!(err, MegolmError::ReplayRejected(0));
    }
}
