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

//! A runtime registry mapping the `type` string of an event to a constructor
//! for its typed content. Replaces the compile-time event-enum approach with
//! a tagged variant parameterised by event type (Design Notes §9): unknown
//! types fall through to [`AnyEventContent::Unknown`] rather than failing.

use std::{collections::HashMap, sync::OnceLock};

use super::{content::*, Event};

type Constructor = fn(&Event) -> AnyEventContent;

/// The process-wide event content registry.
pub struct EventRegistry {
    constructors: HashMap<&'static str, Constructor>,
}

impl EventRegistry {
    fn with_defaults() -> Self {
        let mut constructors: HashMap<&'static str, Constructor> = HashMap::new();

        constructors.insert("m.room.message", |e| {
            AnyEventContent::RoomMessage(RoomMessageEventContent::from_content(&e.content))
        });
        constructors.insert("m.room.member", |e| {
            AnyEventContent::RoomMember(RoomMemberEventContent::from_content(&e.content))
        });
        constructors.insert("m.room.redaction", |e| {
            AnyEventContent::RoomRedaction(RoomRedactionEventContent::from_event(e))
        });
        constructors.insert("m.room.encrypted", |e| {
            AnyEventContent::RoomEncrypted(RoomEncryptedEventContent::from_content(&e.content))
        });
        constructors.insert("m.room.encryption", |e| {
            AnyEventContent::RoomEncryption(RoomEncryptionEventContent::from_content(&e.content))
        });
        constructors.insert("m.room.name", |e| {
            AnyEventContent::RoomName(RoomNameEventContent::from_content(&e.content))
        });
        constructors.insert("m.room.topic", |e| {
            AnyEventContent::RoomTopic(RoomTopicEventContent::from_content(&e.content))
        });
        constructors.insert("m.room.avatar", |e| {
            AnyEventContent::RoomAvatar(RoomAvatarEventContent::from_content(&e.content))
        });
        constructors.insert("m.room.canonical_alias", |e| {
            AnyEventContent::RoomCanonicalAlias(RoomCanonicalAliasEventContent::from_content(&e.content))
        });
        constructors.insert("m.room.create", |e| {
            AnyEventContent::RoomCreate(RoomCreateEventContent::from_content(&e.content))
        });
        constructors.insert("m.room.tombstone", |e| {
            AnyEventContent::RoomTombstone(RoomTombstoneEventContent::from_content(&e.content))
        });
        constructors.insert("m.reaction", |e| {
            AnyEventContent::Reaction(ReactionEventContent::from_content(&e.content))
        });
        constructors.insert("m.room_key", |e| {
            AnyEventContent::RoomKey(RoomKeyEventContent::from_content(&e.content))
        });
        constructors.insert("m.fully_read", |e| {
            AnyEventContent::FullyRead(FullyReadEventContent::from_content(&e.content))
        });
        constructors.insert("m.call.invite", |_| AnyEventContent::Call(CallEventContent::Invite));
        constructors.insert("m.call.answer", |_| AnyEventContent::Call(CallEventContent::Answer));
        constructors.insert("m.call.hangup", |_| AnyEventContent::Call(CallEventContent::Hangup));
        constructors.insert("m.call.candidates", |_| AnyEventContent::Call(CallEventContent::Candidates));

        Self { constructors }
    }

    /// Register (or override) the constructor for `event_type`. Exposed so a
    /// host application can extend the registry with custom event types
    /// without forking this crate.
    pub fn register(&mut self, event_type: &'static str, constructor: Constructor) {
        self.constructors.insert(event_type, constructor);
    }

    /// Decode `event`'s content via the registered constructor for its type,
    /// falling back to [`AnyEventContent::Unknown`] when none is registered.
    pub fn load(&self, event: &Event) -> AnyEventContent {
        match self.constructors.get(event.event_type.as_str()) {
            Some(constructor) => constructor(event),
            None => AnyEventContent::Unknown(event.content.clone()),
        }
    }
}

static REGISTRY: OnceLock<EventRegistry> = OnceLock::new();

/// The process-wide [`EventRegistry`], built on first access.
pub fn registry() -> &'static EventRegistry {
    REGISTRY.get_or_init(EventRegistry::with_defaults)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::registry;
    use crate::events::Event;

    #[test]
    fn known_type_decodes_to_typed_content() {
        let event = Event::from_json(json!({
            "type": "m.room.message",
            "content": {"msgtype": "m.text", "body": "hi"},
        }))
        .unwrap();
        let content = registry().load(&event);
        assert_eq!(content.as_room_message().unwrap().body, "hi");
    }

    #[test]
    fn unknown_type_falls_back_to_raw_json() {
        let event = Event::from_json(json!({
            "type": "org.example.custom",
            "content": {"foo": "bar"},
        }))
        .unwrap();
        let content = registry().load(&event);
        assert!(matches!(content, super::super::content::AnyEventContent::Unknown(_)));
    }
}
