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

//! The `(event_id, rel_type) → [event]` relations index (spec §4.3.5):
//! reactions and threaded replies target another event without replacing
//! it in place, so consumers need a side index to find them.

use std::collections::HashMap;

use matrix_sdk_base::{
    events::{content::AnyEventContent, Event},
    room::RoomState,
};
use matrix_sdk_common::identifiers::OwnedEventId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    Reply,
    Annotation,
}

/// Side index from a target event to the timeline indices of events that
/// relate to it, plus the reverse map needed to undo a reaction's entry when
/// the reaction itself is redacted (spec §4.3.3).
#[derive(Debug, Default)]
pub struct RelationsIndex {
    by_target: HashMap<(OwnedEventId, RelationKind), Vec<i64>>,
    reaction_of: HashMap<OwnedEventId, (OwnedEventId, RelationKind, i64)>,
}

impl RelationsIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn related_to(&self, target: &OwnedEventId, kind: RelationKind) -> &[i64] {
        self.by_target.get(&(target.clone(), kind)).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Index `event` (just inserted at timeline index `index`) if it is a
/// reaction or a threaded reply (spec §4.3.1 step 7, §4.3.5).
pub fn index_if_related(relations: &mut RelationsIndex, event: &Event, index: i64) {
    let Some(event_id) = &event.event_id else { return };

    match event.typed_content() {
        AnyEventContent::Reaction(reaction) => {
            if let Some(target) = reaction.target {
                relations
                    .by_target
                    .entry((target.clone(), RelationKind::Annotation))
                    .or_default()
                    .push(index);
                relations
                    .reaction_of
                    .insert(event_id.clone(), (target, RelationKind::Annotation, index));
            }
        }
        AnyEventContent::RoomMessage(message) => {
            if let Some(matrix_sdk_base::events::content::MessageRelation::Reply {
                in_reply_to,
            }) = message.relation
            {
                relations
                    .by_target
                    .entry((in_reply_to, RelationKind::Reply))
                    .or_default()
                    .push(index);
            }
        }
        _ => {}
    }
}

/// If `redacted_event_id` was indexed as a reaction, remove it from the
/// relations index and report the event it targeted so the caller can
/// notify consumers of that target (spec §4.3.3).
pub fn remove_if_reaction(
    relations: &mut RelationsIndex,
    _state: &mut RoomState,
    redacted_event_id: &OwnedEventId,
) -> Option<OwnedEventId> {
    let (target, kind, index) = relations.reaction_of.remove(redacted_event_id)?;
    if let Some(indices) = relations.by_target.get_mut(&(target.clone(), kind)) {
        indices.retain(|&i| i != index);
    }
    Some(target)
}

#[cfg(test)]
mod tests {
    use matrix_sdk_base::{
        events::Event,
        room::{JoinState, Room},
    };
    use matrix_sdk_common::identifiers::RoomId;
    use serde_json::json;

    use super::{index_if_related, remove_if_reaction, RelationKind, RelationsIndex};

    #[tokio::test]
    async fn reaction_is_indexed_and_removed_on_redaction() {
        let room = Room::new(RoomId::parse("!a:example.org").unwrap().to_owned());
        room.set_join_state(JoinState::Join).await;

        let reaction = Event::from_json(json!({
            "type": "m.reaction",
            "event_id": "$reaction",
            "content": {
                "m.relates_to": {"rel_type": "m.annotation", "event_id": "$target", "key": "👍"}
            }
        }))
        .unwrap();

        let mut relations = RelationsIndex::new();
        index_if_related(&mut relations, &reaction, 3);

        let target: matrix_sdk_common::identifiers::OwnedEventId = "$target".into();
        assert_eq!(relations.related_to(&target, RelationKind::Annotation), &[3]);

        let mut state = room.write().await;
        let removed =
            remove_if_reaction(&mut relations, &mut state, &"$reaction".into()).unwrap();
        assert_eq!(removed, target);
        assert!(relations.related_to(&target, RelationKind::Annotation).is_empty());
    }
}
