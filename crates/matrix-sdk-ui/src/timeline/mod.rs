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

//! The timeline engine (spec §4.3): integrates sync batches and historical
//! pages into a room's timeline, deduplicating, applying redactions and
//! replacements, reconciling local echoes, and maintaining the
//! `event_id → index` and relations indices.

mod echo;
mod redact;
mod relations;

use std::sync::{Arc, Mutex};

use growable_bloom_filter::GrowableBloom;
use matrix_sdk_base::{
    events::Event,
    room::{DeliveryStatus, JoinState, Room, StateKey, TimelineItem},
};
use tracing::warn;

pub use self::relations::RelationsIndex;
use crate::change_set::Change;

pub use echo::echo_matches;

/// Drives timeline ingestion for one room. Owns the room's relations index
/// and a bloom filter used as a fast pre-check before the exact
/// `event_id → index` lookup (spec §4.3.1 step 1).
pub struct TimelineEngine {
    room: Arc<Room>,
    seen: Mutex<GrowableBloom>,
    relations: Mutex<RelationsIndex>,
}

impl TimelineEngine {
    pub fn new(room: Arc<Room>) -> Self {
        Self {
            room,
            seen: Mutex::new(GrowableBloom::new(0.01, 1000)),
            relations: Mutex::new(RelationsIndex::new()),
        }
    }

    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }

    fn already_seen(&self, event_id: &str) -> bool {
        self.seen.lock().unwrap().contains(&event_id)
    }

    fn mark_seen(&self, event_id: &str) {
        self.seen.lock().unwrap().insert(&event_id);
    }

    /// Ingest a batch of forward (sync-delivered) events (spec §4.3.1).
    pub async fn ingest_forward(&self, batch: Vec<Event>) -> Change {
        if batch.is_empty() {
            return Change::empty();
        }

        let mut change = Change::empty();
        let mut state = self.room.write().await;

        // Step 1/2: dedup, then pre-process in-batch redactions/replacements.
        let mut pending_batch: Vec<Event> = Vec::with_capacity(batch.len());
        let mut batch_ids = std::collections::HashSet::new();

        for event in batch {
            if let Some(id) = &event.event_id {
                let id_str = id.as_str();
                if state.event_index.contains_key(id) || !batch_ids.insert(id_str.to_owned()) {
                    continue; // DuplicateIgnored
                }
                if self.already_seen(id_str) && state.event_index.contains_key(id) {
                    continue;
                }
            }
            pending_batch.push(event);
        }

        let mut rewritten: Vec<Event> = Vec::with_capacity(pending_batch.len());
        for event in pending_batch {
            if event.event_type == "m.room.redaction" {
                if let Some(target_id) = event.redacts() {
                    if let Some(&index) = state.event_index.get(&target_id) {
                        redact::apply_to_timeline(&mut state, index, &event);
                        change |= Change::TIMELINE;
                        if relations::remove_if_reaction(
                            &mut self.relations.lock().unwrap(),
                            &mut state,
                            &target_id,
                        )
                        .is_some()
                        {
                            change |= Change::RELATIONS;
                        }
                        continue;
                    } else if let Some(target) =
                        rewritten.iter_mut().find(|e| e.event_id.as_ref() == Some(&target_id))
                    {
                        *target = target.redact(&event);
                        continue;
                    } else {
                        warn!(%target_id, "redaction target not found; dropping");
                        continue;
                    }
                }
            }

            if let Some((target_id, new_content)) = redact::replacement_target(&event) {
                let edit_event_id = event.event_id.clone().unwrap_or_else(|| target_id.clone());
                if let Some(&index) = state.event_index.get(&target_id) {
                    redact::apply_replacement_to_timeline(&mut state, index, &edit_event_id, &new_content);
                    change |= Change::TIMELINE;
                    change |= Change::RELATIONS;
                    continue;
                } else if let Some(target) =
                    rewritten.iter_mut().find(|e| e.event_id.as_ref() == Some(&target_id))
                {
                    redact::apply_replacement_to_event(target, &edit_event_id, &new_content);
                    continue;
                } else {
                    warn!(%target_id, "replacement target not found; dropping");
                    continue;
                }
            }

            rewritten.push(event);
        }

        // Step 3: apply state deltas.
        for event in &rewritten {
            if let Some(state_key) = &event.state_key {
                let key: StateKey = (event.event_type.clone(), state_key.clone());
                state.current_state.insert(key, Arc::new(event.clone()));
                state.stubs.remove(&(event.event_type.clone(), state_key.clone()));
                change |= Change::for_state_event_type(&event.event_type);

                if event.event_type == "m.room.tombstone" {
                    if let Some(successor) = event
                        .content
                        .get("replacement_room")
                        .and_then(|v| v.as_str())
                        .and_then(|s| matrix_sdk_common::identifiers::RoomId::parse(s).ok())
                    {
                        state.successor_room_id = Some(successor.to_owned());
                    }
                }
            }
        }

        // Step 4: merge pending events via the echo-match predicate.
        for event in rewritten.iter() {
            if let Some(pending_pos) =
                state.pending.iter().position(|pending| echo_matches(event, pending))
            {
                let mut pending = state.pending.remove(pending_pos);
                pending.delivery_status = DeliveryStatus::ReachedServer;
                change |= Change::PENDING;
            }
        }

        // Step 5: insert the remaining batch at the sync edge.
        let mut next_index = state.max_index().map(|i| i + 1).unwrap_or(0);
        for event in rewritten {
            let event_id = event.event_id.clone();
            let event = Arc::new(event);
            state.timeline.push_back(TimelineItem { event: event.clone(), index: next_index });
            if let Some(id) = event_id {
                state.event_index.insert(id.clone(), next_index);
                self.mark_seen(id.as_str());
            }
            relations::index_if_related(&mut self.relations.lock().unwrap(), &event, next_index);
            next_index += 1;
            change |= Change::TIMELINE;
        }

        change
    }

    /// Ingest a batch of historical (back-paginated) events (spec §4.3.2).
    pub async fn ingest_backward(&self, batch: Vec<Event>) -> Change {
        if batch.is_empty() {
            return Change::empty();
        }

        let mut change = Change::empty();
        let mut state = self.room.write().await;

        let mut next_index = state.min_index().map(|i| i - 1).unwrap_or(-1);
        for event in batch {
            if let Some(id) = &event.event_id {
                if state.event_index.contains_key(id) {
                    continue;
                }
            }

            if let Some(state_key) = &event.state_key {
                let key: StateKey = (event.event_type.clone(), state_key.clone());
                if !state.current_state.contains_key(&key) {
                    state.current_state.insert(key, Arc::new(event.clone()));
                    change |= Change::for_state_event_type(&event.event_type);
                }
            }

            if event.event_type == "m.room.create" {
                state.all_history_loaded = true;
            }

            let event_id = event.event_id.clone();
            let event = Arc::new(event);
            state.timeline.push_front(TimelineItem { event: event.clone(), index: next_index });
            if let Some(id) = event_id {
                state.event_index.insert(id, next_index);
            }
            next_index -= 1;
            change |= Change::TIMELINE;
        }

        change
    }

    pub async fn join_state(&self) -> JoinState {
        self.room.join_state().await
    }
}
