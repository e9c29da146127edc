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

//! Typed content variants produced by the event [`registry`](super::registry).
//!
//! Each concrete type exposes the typed getters spec §4.1 asks for
//! (`RoomMessageEvent::{msgtype, body, relatesTo}`,
//! `RoomMemberEvent::{membership, displayName, avatarUrl, isDirect, reason}`,
//! `EncryptedEvent::{algorithm, ciphertext, senderKey, deviceId, sessionId}`,
//! `RedactionEvent::{redacts, reason}`), plus an `Unknown` catch-all that
//! still exposes the raw JSON.

use matrix_sdk_common::identifiers::OwnedEventId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Event;

/// The decoded content of an event, dispatched on `type` by the
/// [`registry`](super::registry).
#[derive(Debug, Clone)]
pub enum AnyEventContent {
    RoomMessage(RoomMessageEventContent),
    RoomMember(RoomMemberEventContent),
    RoomRedaction(RoomRedactionEventContent),
    RoomEncrypted(RoomEncryptedEventContent),
    RoomEncryption(RoomEncryptionEventContent),
    RoomName(RoomNameEventContent),
    RoomTopic(RoomTopicEventContent),
    RoomAvatar(RoomAvatarEventContent),
    RoomCanonicalAlias(RoomCanonicalAliasEventContent),
    RoomCreate(RoomCreateEventContent),
    RoomTombstone(RoomTombstoneEventContent),
    Reaction(ReactionEventContent),
    RoomKey(RoomKeyEventContent),
    Call(CallEventContent),
    FullyRead(FullyReadEventContent),
    /// A type the registry has no constructor for. The raw JSON is still
    /// reachable.
    Unknown(Value),
}

impl AnyEventContent {
    pub fn as_room_message(&self) -> Option<&RoomMessageEventContent> {
        match self {
            Self::RoomMessage(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_room_member(&self) -> Option<&RoomMemberEventContent> {
        match self {
            Self::RoomMember(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_room_encrypted(&self) -> Option<&RoomEncryptedEventContent> {
        match self {
            Self::RoomEncrypted(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_redaction(&self) -> Option<&RoomRedactionEventContent> {
        match self {
            Self::RoomRedaction(c) => Some(c),
            _ => None,
        }
    }
}

/// `m.room.message` content, a sum type over the well-known `msgtype`s
/// (spec §4.1).
#[derive(Debug, Clone)]
pub struct RoomMessageEventContent {
    pub msgtype: String,
    pub body: String,
    pub kind: MessageContentKind,
    pub relation: Option<MessageRelation>,
}

impl RoomMessageEventContent {
    pub fn from_content(content: &Value) -> Self {
        let msgtype = content.get("msgtype").and_then(Value::as_str).unwrap_or("m.text").to_owned();
        let body = content.get("body").and_then(Value::as_str).unwrap_or_default().to_owned();

        let kind = match msgtype.as_str() {
            "m.text" => MessageContentKind::Text,
            "m.emote" => MessageContentKind::Emote,
            "m.notice" => MessageContentKind::Notice,
            "m.image" => MessageContentKind::Image(FileSourceInfo::from_content(content)),
            "m.file" => MessageContentKind::File(FileSourceInfo::from_content(content)),
            "m.audio" => MessageContentKind::Audio(FileSourceInfo::from_content(content)),
            "m.video" => MessageContentKind::Video(FileSourceInfo::from_content(content)),
            "m.location" => MessageContentKind::Location {
                geo_uri: content.get("geo_uri").and_then(Value::as_str).unwrap_or_default().to_owned(),
            },
            _ => MessageContentKind::Text,
        };

        let relation = MessageRelation::from_content(content);

        Self { msgtype, body, kind, relation }
    }

    /// The BlurHash extension (spec §6), if the message carries `info`.
    pub fn blurhash(&self) -> Option<&str> {
        match &self.kind {
            MessageContentKind::Image(src) | MessageContentKind::Video(src) => {
                src.blurhash.as_deref()
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum MessageContentKind {
    Text,
    Emote,
    Notice,
    Image(FileSourceInfo),
    File(FileSourceInfo),
    Audio(FileSourceInfo),
    Video(FileSourceInfo),
    Location { geo_uri: String },
}

/// `m.relates_to`: reply, edit (`m.replace`), or annotation (reaction key).
#[derive(Debug, Clone)]
pub enum MessageRelation {
    Reply { in_reply_to: OwnedEventId },
    Replace { target: OwnedEventId, new_content: Box<Value> },
    Annotation { target: OwnedEventId, key: String },
}

impl MessageRelation {
    fn from_content(content: &Value) -> Option<Self> {
        if let Some(new_content) = content.get("m.new_content") {
            let target = content
                .get("m.relates_to")
                .and_then(|r| r.get("event_id"))
                .and_then(Value::as_str)?;
            return Some(Self::Replace {
                target: target.into(),
                new_content: Box::new(new_content.clone()),
            });
        }

        let relates_to = content.get("m.relates_to")?;
        let rel_type = relates_to.get("rel_type").and_then(Value::as_str);
        match rel_type {
            Some("m.annotation") => {
                let target = relates_to.get("event_id").and_then(Value::as_str)?;
                let key = relates_to.get("key").and_then(Value::as_str)?;
                Some(Self::Annotation { target: target.into(), key: key.to_owned() })
            }
            _ => {
                let in_reply_to =
                    relates_to.get("m.in_reply_to")?.get("event_id").and_then(Value::as_str)?;
                Some(Self::Reply { in_reply_to: in_reply_to.into() })
            }
        }
    }
}

/// Either a plaintext `mxc://` url or an [`EncryptedFileMetadata`] envelope
/// (spec §3, §4.6); mirrors the original implementation's `FileSourceInfo`.
#[derive(Debug, Clone)]
pub struct FileSourceInfo {
    pub source: FileSource,
    pub blurhash: Option<String>,
}

#[derive(Debug, Clone)]
pub enum FileSource {
    Plain(String),
    Encrypted(Box<EncryptedFileMetadata>),
}

impl FileSourceInfo {
    fn from_content(content: &Value) -> Self {
        let blurhash = content
            .get("info")
            .and_then(|info| info.get("xyz.amorgan.blurhash"))
            .and_then(Value::as_str)
            .map(str::to_owned);

        let source = if let Some(file) = content.get("file") {
            FileSource::Encrypted(Box::new(EncryptedFileMetadata::from_json(file)))
        } else {
            FileSource::Plain(content.get("url").and_then(Value::as_str).unwrap_or_default().to_owned())
        };

        Self { source, blurhash }
    }
}

/// An AES-CTR-256 encrypted attachment envelope (spec §4.6, §8 scenario 5).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedFileMetadata {
    pub url: String,
    pub key: Jwk,
    pub iv: String,
    pub hashes: std::collections::BTreeMap<String, String>,
    pub v: String,
}

/// A JSON Web Key, restricted to the fixed shape Matrix uses for attachment
/// keys (spec §4.6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub key_ops: Vec<String>,
    pub alg: String,
    pub k: String,
    pub ext: bool,
}

impl EncryptedFileMetadata {
    fn from_json(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or(Self {
            url: String::new(),
            key: Jwk {
                kty: "oct".to_owned(),
                key_ops: vec!["encrypt".to_owned(), "decrypt".to_owned()],
                alg: "A256CTR".to_owned(),
                k: String::new(),
                ext: true,
            },
            iv: String::new(),
            hashes: Default::default(),
            v: "v2".to_owned(),
        })
    }
}

/// `m.room.member` content (spec §4.1).
#[derive(Debug, Clone)]
pub struct RoomMemberEventContent {
    pub membership: MembershipState,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_direct: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipState {
    Invite,
    Join,
    Knock,
    Leave,
    Ban,
}

impl RoomMemberEventContent {
    pub fn from_content(content: &Value) -> Self {
        let membership = match content.get("membership").and_then(Value::as_str) {
            Some("invite") => MembershipState::Invite,
            Some("knock") => MembershipState::Knock,
            Some("leave") => MembershipState::Leave,
            Some("ban") => MembershipState::Ban,
            _ => MembershipState::Join,
        };
        Self {
            membership,
            display_name: content.get("displayname").and_then(Value::as_str).map(str::to_owned),
            avatar_url: content.get("avatar_url").and_then(Value::as_str).map(str::to_owned),
            is_direct: content.get("is_direct").and_then(Value::as_bool).unwrap_or(false),
            reason: content.get("reason").and_then(Value::as_str).map(str::to_owned),
        }
    }
}

/// `m.room.encrypted` content: the per-message encryption envelope
/// (spec §4.1, §4.7).
#[derive(Debug, Clone)]
pub struct RoomEncryptedEventContent {
    pub algorithm: String,
    pub ciphertext: String,
    pub sender_key: Option<String>,
    pub device_id: Option<String>,
    pub session_id: Option<String>,
}

impl RoomEncryptedEventContent {
    pub fn from_content(content: &Value) -> Self {
        Self {
            algorithm: content.get("algorithm").and_then(Value::as_str).unwrap_or_default().to_owned(),
            ciphertext: content.get("ciphertext").and_then(Value::as_str).unwrap_or_default().to_owned(),
            sender_key: content.get("sender_key").and_then(Value::as_str).map(str::to_owned),
            device_id: content.get("device_id").and_then(Value::as_str).map(str::to_owned),
            session_id: content.get("session_id").and_then(Value::as_str).map(str::to_owned),
        }
    }
}

/// `m.room.encryption` state content: per-room encryption settings.
#[derive(Debug, Clone)]
pub struct RoomEncryptionEventContent {
    pub algorithm: String,
    pub rotation_period_ms: Option<u64>,
    pub rotation_period_msgs: Option<u64>,
}

impl RoomEncryptionEventContent {
    pub fn from_content(content: &Value) -> Self {
        Self {
            algorithm: content.get("algorithm").and_then(Value::as_str).unwrap_or_default().to_owned(),
            rotation_period_ms: content.get("rotation_period_ms").and_then(Value::as_u64),
            rotation_period_msgs: content.get("rotation_period_msgs").and_then(Value::as_u64),
        }
    }
}

/// `m.room.redaction` content (spec §4.1).
#[derive(Debug, Clone)]
pub struct RoomRedactionEventContent {
    pub redacts: Option<OwnedEventId>,
    pub reason: Option<String>,
}

impl RoomRedactionEventContent {
    pub fn from_event(event: &Event) -> Self {
        Self {
            redacts: event.redacts(),
            reason: event.content.get("reason").and_then(Value::as_str).map(str::to_owned),
        }
    }
}

macro_rules! simple_string_content {
    ($name:ident, $field:literal) => {
        #[derive(Debug, Clone, Default)]
        pub struct $name {
            pub value: Option<String>,
        }

        impl $name {
            pub fn from_content(content: &Value) -> Self {
                Self { value: content.get($field).and_then(Value::as_str).map(str::to_owned) }
            }
        }
    };
}

simple_string_content!(RoomNameEventContent, "name");
simple_string_content!(RoomTopicEventContent, "topic");
simple_string_content!(RoomAvatarEventContent, "url");

#[derive(Debug, Clone, Default)]
pub struct RoomCanonicalAliasEventContent {
    pub alias: Option<String>,
    pub alt_aliases: Vec<String>,
}

impl RoomCanonicalAliasEventContent {
    pub fn from_content(content: &Value) -> Self {
        Self {
            alias: content.get("alias").and_then(Value::as_str).map(str::to_owned),
            alt_aliases: content
                .get("alt_aliases")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_owned).collect())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoomCreateEventContent {
    pub creator: Option<String>,
    pub room_version: String,
    pub predecessor_room_id: Option<String>,
}

impl RoomCreateEventContent {
    pub fn from_content(content: &Value) -> Self {
        Self {
            creator: content.get("creator").and_then(Value::as_str).map(str::to_owned),
            room_version: content.get("room_version").and_then(Value::as_str).unwrap_or("1").to_owned(),
            predecessor_room_id: content
                .get("predecessor")
                .and_then(|p| p.get("room_id"))
                .and_then(Value::as_str)
                .map(str::to_owned),
        }
    }
}

/// `m.room.tombstone`: a room that has been upgraded (spec §8 scenario 6).
#[derive(Debug, Clone)]
pub struct RoomTombstoneEventContent {
    pub body: String,
    pub replacement_room: String,
}

impl RoomTombstoneEventContent {
    pub fn from_content(content: &Value) -> Self {
        Self {
            body: content.get("body").and_then(Value::as_str).unwrap_or_default().to_owned(),
            replacement_room: content
                .get("replacement_room")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        }
    }
}

/// `m.reaction` content: an annotation relation targeting another event.
#[derive(Debug, Clone)]
pub struct ReactionEventContent {
    pub target: Option<OwnedEventId>,
    pub key: Option<String>,
}

impl ReactionEventContent {
    pub fn from_content(content: &Value) -> Self {
        let relates_to = content.get("m.relates_to");
        Self {
            target: relates_to
                .and_then(|r| r.get("event_id"))
                .and_then(Value::as_str)
                .map(Into::into),
            key: relates_to.and_then(|r| r.get("key")).and_then(Value::as_str).map(str::to_owned),
        }
    }
}

/// `m.room_key` to-device content: the seed for an inbound Megolm session
/// (spec §4.7).
#[derive(Debug, Clone)]
pub struct RoomKeyEventContent {
    pub algorithm: String,
    pub room_id: Option<String>,
    pub session_id: Option<String>,
    pub session_key: Option<String>,
}

impl RoomKeyEventContent {
    pub fn from_content(content: &Value) -> Self {
        Self {
            algorithm: content.get("algorithm").and_then(Value::as_str).unwrap_or_default().to_owned(),
            room_id: content.get("room_id").and_then(Value::as_str).map(str::to_owned),
            session_id: content.get("session_id").and_then(Value::as_str).map(str::to_owned),
            session_key: content.get("session_key").and_then(Value::as_str).map(str::to_owned),
        }
    }
}

/// Call events (`m.call.invite`/`answer`/`hangup`/`candidates`): the engine
/// only needs to recognize the class, not interpret SDP/ICE payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEventContent {
    Invite,
    Answer,
    Hangup,
    Candidates,
}

/// `m.fully_read` account-data content (spec §4.5).
#[derive(Debug, Clone)]
pub struct FullyReadEventContent {
    pub event_id: Option<OwnedEventId>,
}

impl FullyReadEventContent {
    pub fn from_content(content: &Value) -> Self {
        Self { event_id: content.get("event_id").and_then(Value::as_str).map(Into::into) }
    }
}
