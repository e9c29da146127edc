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

//! Applying redactions and replacements to a timeline already holding the
//! target event (spec §4.3.3, §4.3.4).

use std::sync::Arc;

use matrix_sdk_base::{
    events::Event,
    room::{RoomState, StateKey},
};
use matrix_sdk_common::identifiers::OwnedEventId;
use serde_json::Value;

/// The position of timeline index `index` within the (contiguous,
/// monotonically increasing) timeline vector.
fn position_for(state: &RoomState, index: i64) -> Option<usize> {
    let min = state.min_index()?;
    usize::try_from(index - min).ok()
}

/// Replace the event at `index` with its redacted form; if it was current
/// room state, re-run state processing on the redacted version (spec
/// §4.3.3: this is what blanks a display name or avatar).
pub fn apply_to_timeline(state: &mut RoomState, index: i64, redaction: &Event) {
    let Some(pos) = position_for(state, index) else { return };
    let Some(item) = state.timeline.get(pos) else { return };

    let redacted = Arc::new(item.event.redact(redaction));
    state.timeline.set(pos, matrix_sdk_base::room::TimelineItem { event: redacted.clone(), index });

    if let Some(state_key) = &redacted.state_key {
        let key: StateKey = (redacted.event_type.clone(), state_key.clone());
        if let Some(current) = state.current_state.get(&key) {
            if current.event_id == redacted.event_id {
                state.current_state.insert(key, redacted);
            }
        }
    }
}

/// Detect a `m.replace` edit: `content.m.new_content` plus `m.relates_to`
/// with `rel_type = "m.replace"` (spec §4.3.4).
pub fn replacement_target(event: &Event) -> Option<(OwnedEventId, Value)> {
    if event.event_type != "m.room.message" {
        return None;
    }
    let new_content = event.content.get("m.new_content")?.clone();
    let target = event.content.get("m.relates_to")?.get("event_id")?.as_str()?;
    Some((target.into(), new_content))
}

/// Build the post-edit content for a target whose current content is
/// `target_content`: take `new_content` verbatim, except that the target's
/// own `m.relates_to` is preserved when it isn't itself the replace relation
/// (spec §4.3.4, "preserving... the reply chain").
fn merged_replacement_content(target_content: &Value, new_content: &Value) -> Value {
    let mut content = new_content.clone();

    let reply_chain = target_content.get("m.relates_to").filter(|relates_to| {
        relates_to.get("rel_type").and_then(Value::as_str) != Some("m.replace")
    });

    if let (Some(reply_chain), Value::Object(map)) = (reply_chain, &mut content) {
        map.insert("m.relates_to".to_owned(), reply_chain.clone());
    }

    content
}

/// Stamp `unsigned.m.relations.m.replace = edit_event_id` onto `event`.
fn stamp_replace_relation(event: &mut Event, edit_event_id: &OwnedEventId) {
    let mut relations = match &event.unsigned.relations {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    relations.insert("m.replace".to_owned(), Value::String(edit_event_id.to_string()));
    event.unsigned.relations = Value::Object(relations);
}

/// Rewrite `target`, still sitting in an in-batch buffer, to its post-edit
/// form (spec §4.3.1 step 2: the edit and its target arrived in the same
/// batch).
pub fn apply_replacement_to_event(target: &mut Event, edit_event_id: &OwnedEventId, new_content: &Value) {
    target.content = merged_replacement_content(&target.content, new_content);
    stamp_replace_relation(target, edit_event_id);
}

/// Replace the event at timeline index `index` with a copy carrying
/// `new_content`, stamping `unsigned.m.relations.m.replace` with the edit's
/// event id, and preserving the target's identity fields and reply chain
/// (spec §4.3.4).
pub fn apply_replacement_to_timeline(
    state: &mut RoomState,
    index: i64,
    edit_event_id: &OwnedEventId,
    new_content: &Value,
) {
    let Some(pos) = position_for(state, index) else { return };
    let Some(item) = state.timeline.get(pos) else { return };

    let mut replaced = (*item.event).clone();
    apply_replacement_to_event(&mut replaced, edit_event_id, new_content);

    state.timeline.set(
        pos,
        matrix_sdk_base::room::TimelineItem { event: Arc::new(replaced), index },
    );
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{apply_replacement_to_event, merged_replacement_content};
    use matrix_sdk_base::events::Event;

    #[test]
    fn replacement_preserves_the_reply_chain() {
        let target_content = json!({
            "msgtype": "m.text",
            "body": "old",
            "m.relates_to": {"m.in_reply_to": {"event_id": "$parent"}},
        });
        let new_content = json!({"msgtype": "m.text", "body": "new"});

        let merged = merged_replacement_content(&target_content, &new_content);
        assert_eq!(merged["body"], "new");
        assert_eq!(merged["m.relates_to"]["m.in_reply_to"]["event_id"], "$parent");
    }

    #[test]
    fn replacement_stamps_the_replace_relation() {
        let mut target = Event::from_json(json!({
            "type": "m.room.message",
            "event_id": "$target",
            "content": {"msgtype": "m.text", "body": "old"},
        }))
        .unwrap();

        apply_replacement_to_event(&mut target, &"$edit".into(), &json!({"body": "new"}));
        assert_eq!(
            target.unsigned.relations.get("m.replace").and_then(|v| v.as_str()),
            Some("$edit")
        );
    }
}
