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

//! The per-event-type content whitelist a redaction leaves behind. The
//! "Redaction completeness" invariant (spec §3) requires [`Event::redact`]
//! to be exhaustive: any content key not in the whitelist for that event's
//! type must be gone afterward. [`Event`] only ever carries the top-level
//! fields the Matrix spec's redaction algorithm preserves, so there is no
//! separate top-level whitelist to enforce here.

/// Content keys preserved per event type. An event type with no entry here
/// loses all of its content.
fn content_whitelist_for(event_type: &str) -> &'static [&'static str] {
    match event_type {
        "m.room.member" => &["membership"],
        "m.room.create" => &["creator", "room_version", "predecessor"],
        "m.room.join_rules" => &["join_rule"],
        "m.room.power_levels" => &[
            "ban",
            "events",
            "events_default",
            "kick",
            "redact",
            "state_default",
            "users",
            "users_default",
        ],
        "m.room.history_visibility" => &["history_visibility"],
        "m.room.redaction" => &["redacts"],
        "m.room.aliases" => &["aliases"],
        _ => &[],
    }
}

/// The set of content keys that survive redaction for `event_type`, as a
/// `Vec` for callers that need an owned list (e.g. diagnostics).
pub fn redacted_content_keys_for(event_type: &str) -> Vec<&'static str> {
    content_whitelist_for(event_type).to_vec()
}

#[cfg(test)]
mod tests {
    use super::redacted_content_keys_for;

    #[test]
    fn membership_survives_a_member_redaction() {
        assert_eq!(redacted_content_keys_for("m.room.member"), vec!["membership"]);
    }

    #[test]
    fn power_levels_keeps_its_numeric_fields() {
        let keys = redacted_content_keys_for("m.room.power_levels");
        assert!(keys.contains(&"users_default"));
        assert!(keys.contains(&"ban"));
    }

    #[test]
    fn an_unknown_event_type_keeps_nothing() {
        assert!(redacted_content_keys_for("m.room.message").is_empty());
    }
}
