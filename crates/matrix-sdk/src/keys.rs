// Copyright 2022 The Matrix.org Foundation C.I.C.
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

//! The E2EE Session Store wired up for one [`crate::Client`] (spec §4.7):
//! room-key ingest, per-message decryption with replay protection, and
//! outbound Megolm session bookkeeping (rotation). Only present under the
//! `e2e-encryption` feature.

use std::{
    collections::HashMap,
    sync::Mutex as StdMutex,
    time::Duration,
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use matrix_sdk_base::events::{content::AnyEventContent, Event};
use matrix_sdk_common::identifiers::OwnedRoomId;
use matrix_sdk_crypto::{InboundGroupSession, MegolmError, OlmAccount, OutboundGroupSession};
use serde_json::Value;
use vodozemac::{
    megolm::{MegolmMessage, SessionKey},
    Curve25519PublicKey,
};

use crate::error::{Error, Result};

impl From<MegolmError> for Error {
    fn from(err: MegolmError) -> Self {
        Error::Crypto(err.to_string())
    }
}

/// Keyed by `(sender_curve25519_key as base64, session_id)`, matching
/// `MegolmInboundSession`'s key (spec §3).
type InboundKey = (String, String);

/// Owns one connection's Olm account, its inbound Megolm sessions, and one
/// outbound Megolm session per encrypted room (spec §4.7).
pub struct KeyStore {
    account: OlmAccount,
    inbound: StdMutex<HashMap<InboundKey, std::sync::Arc<InboundGroupSession>>>,
    outbound: StdMutex<HashMap<OwnedRoomId, std::sync::Arc<OutboundGroupSession>>>,
    rotation_messages: u64,
    rotation_period: Duration,
}

impl KeyStore {
    pub fn new(account: OlmAccount, rotation_messages: u64, rotation_period: Duration) -> Self {
        Self {
            account,
            inbound: StdMutex::new(HashMap::new()),
            outbound: StdMutex::new(HashMap::new()),
            rotation_messages,
            rotation_period,
        }
    }

    pub fn account(&self) -> &OlmAccount {
        &self.account
    }

    /// Ingest an `m.room_key` event (spec §4.7 "Room-key ingest"). The
    /// sender's Curve25519 identity key is supplied by the caller, which
    /// owns decrypting the to-device Olm envelope the room key arrived in.
    pub fn ingest_room_key(&self, sender_curve25519_key: Curve25519PublicKey, event: &Event) -> Result<()> {
        let AnyEventContent::RoomKey(room_key) = event.typed_content() else {
            return Err(Error::Crypto("not a room_key event".to_owned()));
        };

        if room_key.algorithm != "m.megolm.v1.aes-sha2" {
            return Err(Error::Crypto(format!("unsupported room key algorithm: {}", room_key.algorithm)));
        }

        let session_id = room_key.session_id.ok_or_else(|| Error::Crypto("room_key missing session_id".to_owned()))?;
        let session_key_b64 = room_key
            .session_key
            .ok_or_else(|| Error::Crypto("room_key missing session_key".to_owned()))?;

        let session_key = SessionKey::from_base64(&session_key_b64)
            .map_err(|err| Error::Crypto(format!("invalid session_key: {err}")))?;

        let session = InboundGroupSession::new(sender_curve25519_key, &session_key, &session_id)?;

        let key = (base64_key(sender_curve25519_key), session_id);
        self.inbound.lock().unwrap().insert(key, std::sync::Arc::new(session));
        Ok(())
    }

    /// Decrypt an encrypted room event (spec §4.7 "Decrypt encrypted room
    /// event"). Dispatches on `algorithm`; looks the inbound session up by
    /// `(sender_key, session_id)` and refuses replays via the session's
    /// own replay table. The returned event is synthesised from the
    /// decrypted JSON with `event_id`, `sender`, `origin_server_ts`,
    /// `m.relates_to`, and `unsigned.redacts` copied from the outer
    /// envelope.
    pub fn decrypt_room_event(&self, envelope: &Event) -> Result<Event> {
        let AnyEventContent::RoomEncrypted(encrypted) = envelope.typed_content() else {
            return Err(Error::Crypto("not an encrypted event".to_owned()));
        };

        if encrypted.algorithm != "m.megolm.v1.aes-sha2" {
            return Err(Error::Crypto(format!("unsupported algorithm: {}", encrypted.algorithm)));
        }

        let sender_key = encrypted
            .sender_key
            .ok_or_else(|| Error::Crypto("encrypted event missing sender_key".to_owned()))?;
        let session_id = encrypted
            .session_id
            .ok_or_else(|| Error::Crypto("encrypted event missing session_id".to_owned()))?;

        let session = self
            .inbound
            .lock()
            .unwrap()
            .get(&(sender_key, session_id))
            .cloned()
            .ok_or(MegolmError::UnknownSession)?;

        let ciphertext_bytes = STANDARD
            .decode(&encrypted.ciphertext)
            .map_err(|err| Error::Crypto(format!("invalid ciphertext encoding: {err}")))?;
        let message = MegolmMessage::try_from(ciphertext_bytes)
            .map_err(|err| Error::Crypto(format!("malformed megolm message: {err}")))?;

        let event_id = envelope
            .event_id
            .clone()
            .ok_or_else(|| Error::Crypto("encrypted envelope missing event_id".to_owned()))?;
        let origin_server_ts = envelope
            .origin_server_ts
            .ok_or_else(|| Error::Crypto("encrypted envelope missing origin_server_ts".to_owned()))?;

        let plaintext = session.decrypt(&message, &event_id, origin_server_ts)?;
        let mut decrypted: Value =
            serde_json::from_str(&plaintext).map_err(|err| Error::Crypto(err.to_string()))?;

        if let Value::Object(map) = &mut decrypted {
            map.insert("event_id".to_owned(), Value::String(event_id.to_string()));
            map.insert("origin_server_ts".to_owned(), Value::from(origin_server_ts.0));
            if let Some(room_id) = &envelope.room_id {
                map.insert("room_id".to_owned(), Value::String(room_id.to_string()));
            }
            if let Some(sender) = &envelope.sender {
                map.insert("sender".to_owned(), Value::String(sender.to_string()));
            }
            if let Some(relates_to) = envelope.content.get("m.relates_to") {
                map.entry("content".to_owned())
                    .or_insert_with(|| Value::Object(Default::default()));
                if let Some(Value::Object(content)) = map.get_mut("content") {
                    content.insert("m.relates_to".to_owned(), relates_to.clone());
                }
            }
        }

        let mut event = Event::from_json(decrypted).map_err(|err| Error::Crypto(err.to_string()))?;
        // The envelope itself carries `unsigned.redacted_because` when the
        // outer encrypted event has been redacted; that redaction applies
        // to the decrypted content just the same (spec §4.7).
        event.unsigned.redacted_because = envelope.unsigned.redacted_because.clone();
        Ok(event)
    }

    /// The outbound Megolm session for `room_id`, creating and rotating one
    /// as needed (spec §3, §4.7).
    pub fn outbound_session(&self, room_id: &OwnedRoomId) -> std::sync::Arc<OutboundGroupSession> {
        let mut outbound = self.outbound.lock().unwrap();
        let needs_rotation = outbound
            .get(room_id)
            .is_some_and(|session| session.should_rotate(self.rotation_messages, self.rotation_period));

        if needs_rotation || !outbound.contains_key(room_id) {
            outbound.insert(room_id.clone(), std::sync::Arc::new(OutboundGroupSession::new()));
        }

        outbound.get(room_id).cloned().unwrap()
    }
}

fn base64_key(key: Curve25519PublicKey) -> String {
    key.to_base64()
}

#[cfg(test)]
mod tests {
    use matrix_sdk_common::identifiers::RoomId;
    use matrix_sdk_crypto::OlmAccount;

    use super::KeyStore;

    #[test]
    fn outbound_session_is_created_lazily_and_reused() {
        let store = KeyStore::new(OlmAccount::new(), 100, std::time::Duration::from_secs(3600));
        let room_id = RoomId::parse("!a:example.org").unwrap().to_owned();

        let first = store.outbound_session(&room_id);
        let second = store.outbound_session(&room_id);
        assert_eq!(first.session_id(), second.session_id());
    }

    #[test]
    fn outbound_session_rotates_after_the_message_budget() {
        let store = KeyStore::new(OlmAccount::new(), 1, std::time::Duration::from_secs(3600));
        let room_id = RoomId::parse("!a:example.org").unwrap().to_owned();

        let first = store.outbound_session(&room_id);
        first.encrypt("{}");
        let second = store.outbound_session(&room_id);
        assert_ne!(first.session_id(), second.session_id());
    }
}
