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

//! The event model (spec §4.1): a single [`Event`] value type carrying raw
//! JSON plus well-known top-level fields, a [`registry`] mapping Matrix
//! `type` strings to typed content extractors, and the redaction whitelist
//! used to enforce the "Redaction completeness" invariant (spec §3).

pub mod content;
mod redaction;
mod registry;

use std::sync::Arc;

use matrix_sdk_common::{
    identifiers::{OwnedEventId, OwnedRoomId, OwnedTransactionId, OwnedUserId},
    MilliSecondsSinceUnixEpoch,
};
use serde_json::Value;
use thiserror::Error;

pub use self::{
    content::AnyEventContent,
    redaction::redacted_content_keys_for,
    registry::registry,
};

/// A capability tag describing which protocol surface an event was received
/// through; used by the Sync Orchestrator to route a raw JSON blob to the
/// right ingestion path (spec §2, component 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCapability {
    RoomEvent,
    StateEvent,
    CallEvent,
    EphemeralEvent,
    AccountData,
    ToDevice,
    EncryptedEnvelope,
}

/// Failure constructing an [`Event`] from raw JSON.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    /// The JSON object has no (or an empty) `type` field.
    #[error("event is missing a `type` field")]
    Malformed,
}

/// The `unsigned` object of an event (spec §3).
#[derive(Debug, Clone, Default)]
pub struct Unsigned {
    pub prev_content: Option<Value>,
    pub redacted_because: Option<Box<Event>>,
    pub transaction_id: Option<OwnedTransactionId>,
    /// `unsigned.m.relations`, kept as raw JSON except for the `m.replace`
    /// key, which the timeline engine stamps explicitly after an edit
    /// (spec §4.3.4).
    pub relations: Value,
}

impl Unsigned {
    fn from_json(value: Option<Value>) -> Self {
        let Some(Value::Object(mut map)) = value else {
            return Self::default();
        };

        let prev_content = map.remove("prev_content");
        let redacted_because = map
            .remove("redacted_because")
            .and_then(|v| Event::from_json(v).ok())
            .map(Box::new);
        let transaction_id =
            map.remove("transaction_id").and_then(|v| v.as_str().map(Into::into));
        let relations = map.remove("m.relations").unwrap_or(Value::Object(Default::default()));

        Self { prev_content, redacted_because, transaction_id, relations }
    }

    /// The `unsigned.m.relations.m.replace` event id, if this event has been
    /// edited and the edit has been folded into the original (spec §4.3.4).
    pub fn replacement_event_id(&self) -> Option<OwnedEventId> {
        self.relations.get("m.replace")?.as_str().map(Into::into)
    }
}

/// An immutable Matrix event: raw JSON content plus the well-known
/// top-level fields, polymorphic over the capability set described in spec
/// §3.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: String,
    pub content: Value,
    pub event_id: Option<OwnedEventId>,
    pub sender: Option<OwnedUserId>,
    pub origin_server_ts: Option<MilliSecondsSinceUnixEpoch>,
    pub room_id: Option<OwnedRoomId>,
    pub state_key: Option<String>,
    pub unsigned: Unsigned,
}

impl Event {
    /// Construct an [`Event`] from a raw JSON object.
    ///
    /// Validates that `type` is present and non-empty. A missing `content`
    /// is only a warning (spec §4.1) — it defaults to an empty object,
    /// except for redaction events, which are allowed to have no content at
    /// all in the wire format.
    pub fn from_json(value: Value) -> Result<Self, EventError> {
        let Value::Object(mut map) = value else {
            return Err(EventError::Malformed);
        };

        let event_type = match map.remove("type") {
            Some(Value::String(s)) if !s.is_empty() => s,
            _ => return Err(EventError::Malformed),
        };

        let content = match map.remove("content") {
            Some(v) => v,
            None => {
                if event_type != "m.room.redaction" {
                    tracing::warn!(event_type, "event has no `content` field");
                }
                Value::Object(Default::default())
            }
        };

        let event_id = map.remove("event_id").and_then(|v| v.as_str().map(Into::into));
        let sender = map.remove("sender").and_then(|v| v.as_str().map(Into::into));
        let origin_server_ts = map
            .remove("origin_server_ts")
            .and_then(|v| v.as_u64())
            .map(MilliSecondsSinceUnixEpoch);
        let room_id = map.remove("room_id").and_then(|v| v.as_str().map(Into::into));
        let state_key = map.remove("state_key").and_then(|v| v.as_str().map(str::to_owned));
        let unsigned = Unsigned::from_json(map.remove("unsigned"));

        Ok(Self { event_type, content, event_id, sender, origin_server_ts, room_id, state_key, unsigned })
    }

    /// Whether this event carries a `state_key` (spec §3, "State event").
    pub fn is_state_event(&self) -> bool {
        self.state_key.is_some()
    }

    /// The `redacts` field of a redaction event, checking both the
    /// top-level field (current spec) and `content.redacts` (legacy
    /// room versions), per Matrix's room-version-dependent placement.
    pub fn redacts(&self) -> Option<OwnedEventId> {
        if self.event_type != "m.room.redaction" {
            return None;
        }
        self.content.get("redacts").and_then(|v| v.as_str()).map(Into::into)
    }

    /// Whether this event has already been redacted.
    pub fn is_redacted(&self) -> bool {
        self.unsigned.redacted_because.is_some()
    }

    /// Decode the typed content for this event via the [`registry`].
    pub fn typed_content(&self) -> AnyEventContent {
        registry().load(self)
    }

    /// A cheap clone suitable for storing in multiple indices at once.
    pub fn into_shared(self) -> Arc<Event> {
        Arc::new(self)
    }

    /// Produce the redacted form of this event (spec §3 "Redaction
    /// completeness", §4.3.3): content is cut down to the per-type whitelist
    /// and `unsigned.redacted_because` is stamped with `redaction`.
    ///
    /// Our [`Event`] only ever keeps the top-level fields the whitelist
    /// already allows (`event_id`, `type`, `room_id`, `sender`, `state_key`,
    /// `origin_server_ts`), so there is no separate top-level strip step.
    pub fn redact(&self, redaction: &Event) -> Event {
        let mut content = self.content.clone();
        if let Value::Object(map) = &mut content {
            let allowed = redacted_content_keys_for(&self.event_type);
            map.retain(|key, _| allowed.contains(&key.as_str()));
        }

        let mut unsigned = self.unsigned.clone();
        unsigned.redacted_because = Some(Box::new(redaction.clone()));

        Event { content, unsigned, ..self.clone() }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::Event;

    #[test]
    fn missing_type_is_malformed() {
        let err = Event::from_json(json!({"content": {}})).unwrap_err();
        assert_eq!(err, super::EventError::Malformed);
    }

    #[test]
    fn missing_content_defaults_to_empty_object() {
        let event = Event::from_json(json!({"type": "m.room.message", "event_id": "$a"})).unwrap();
        assert_eq!(event.content, serde_json::Value::Object(Default::default()));
    }

    #[test]
    fn state_event_has_state_key() {
        let event = Event::from_json(json!({
            "type": "m.room.name",
            "state_key": "",
            "content": {"name": "Hello"},
        }))
        .unwrap();
        assert!(event.is_state_event());
    }
}
