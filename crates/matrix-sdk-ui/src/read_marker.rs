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

//! The Read-Marker & Unread-Stats Subsystem (spec §4.5): per-user read
//! receipts, the local fully-read marker, and the `unreadStats` /
//! `partiallyReadStats` counters, maintained with the same incremental
//! "update on marker move" heuristic as the original `EventStats` (spec
//! §3, §9 `SPEC_FULL` addition from `Quotient/eventstats.cpp`).

use std::sync::Arc;

use matrix_sdk_base::{
    events::{content::AnyEventContent, Event},
    room::{EventStats, ReadReceipt, Room, RoomState},
};
use matrix_sdk_common::{
    identifiers::{EventId, OwnedEventId, OwnedUserId, UserId},
    MilliSecondsSinceUnixEpoch,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::change_set::Change;

/// Policy deciding whether an event counts toward `EventStats.notableCount`
/// (spec §4.5). Left swappable per spec §9's open question: the source's
/// `isEventNotable` is only partially specified, so the engine takes a
/// trait object rather than hard-coding the classifier.
pub trait NotableClassifier: Send + Sync {
    fn is_notable(&self, event: &Event, local_user: &UserId) -> bool;
}

/// Non-redacted, non-notice, non-own `m.room.message` events are notable;
/// everything else (state events, reactions, the local user's own messages)
/// is not. Highlight counting is delegated to the server (spec §9) and
/// never computed here.
#[derive(Debug, Default)]
pub struct DefaultNotableClassifier;

impl NotableClassifier for DefaultNotableClassifier {
    fn is_notable(&self, event: &Event, local_user: &UserId) -> bool {
        if event.is_redacted() {
            return false;
        }
        if event.sender.as_deref() == Some(local_user) {
            return false;
        }
        matches!(event.typed_content(), AnyEventContent::RoomMessage(message) if message.msgtype != "m.notice")
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReadMarkerError {
    #[error("event {0} is not known in this room")]
    UnknownEvent(OwnedEventId),
}

/// Drives read-receipt and unread-statistics bookkeeping for one room, on
/// behalf of one logged-in local user (spec §4.5).
pub struct ReadMarkerEngine {
    room: Arc<Room>,
    local_user: OwnedUserId,
    classifier: Arc<dyn NotableClassifier>,
}

impl ReadMarkerEngine {
    pub fn new(room: Arc<Room>, local_user: OwnedUserId, classifier: Arc<dyn NotableClassifier>) -> Self {
        Self { room, local_user, classifier }
    }

    pub fn with_default_classifier(room: Arc<Room>, local_user: OwnedUserId) -> Self {
        Self::new(room, local_user, Arc::new(DefaultNotableClassifier))
    }

    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }

    /// Apply the `m.receipt` ephemeral events of a sync batch (spec §4.5):
    /// per user, adopt the new receipt only if it is strictly newer than
    /// the one already stored.
    pub async fn apply_receipts(&self, events: &[Event]) -> Change {
        let mut state = self.room.write().await;
        let mut local_receipt_moved = None;

        for event in events {
            if event.event_type != "m.receipt" {
                continue;
            }
            let serde_json::Value::Object(by_event_id) = &event.content else { continue };

            for (event_id_str, receipt_types) in by_event_id {
                let Ok(event_id) = EventId::parse(event_id_str.as_str()) else { continue };
                let Some(read_receipts) = receipt_types.get("m.read").and_then(|v| v.as_object())
                else {
                    continue;
                };

                for (user_id_str, receipt) in read_receipts {
                    let Ok(user_id) = UserId::parse(user_id_str.as_str()) else { continue };
                    let user_id = user_id.to_owned();
                    let event_id = event_id.to_owned();
                    let ts = receipt.get("ts").and_then(|v| v.as_u64()).unwrap_or(0);

                    let old_index = Self::index_of(&state, &user_id);
                    let is_local_user = user_id == self.local_user;
                    let adopted = Self::adopt_receipt_if_newer(
                        &mut state,
                        user_id,
                        event_id.clone(),
                        MilliSecondsSinceUnixEpoch(ts),
                    );

                    if adopted && is_local_user {
                        local_receipt_moved = Some((
                            old_index.unwrap_or(i64::MIN),
                            state.event_index.get(&event_id).copied().unwrap_or(i64::MIN),
                        ));
                    }
                }
            }
        }

        let Some((old_index, new_index)) = local_receipt_moved else { return Change::empty() };
        if new_index > old_index {
            let mut unread = state.unread_stats;
            self.update_on_marker_move(&state, old_index, new_index, &mut unread);
            state.unread_stats = unread;
        }
        drop(state);
        self.enforce_stats_invariant().await;
        Change::STATISTICS
    }

    fn index_of(state: &RoomState, user_id: &UserId) -> Option<i64> {
        let receipt = state.last_read_receipts.get(user_id)?;
        state.event_index.get(&receipt.event_id).copied()
    }

    /// Adopt `event_id` as `user_id`'s receipt iff strictly newer than the
    /// stored one. "Newer" is judged by timeline index when both are known
    /// locally, falling back to timestamp comparison otherwise (spec §4.5).
    fn adopt_receipt_if_newer(
        state: &mut RoomState,
        user_id: OwnedUserId,
        event_id: OwnedEventId,
        timestamp: MilliSecondsSinceUnixEpoch,
    ) -> bool {
        let is_newer = match state.last_read_receipts.get(&user_id) {
            None => true,
            Some(current) => {
                match (state.event_index.get(&current.event_id), state.event_index.get(&event_id)) {
                    (Some(&old_idx), Some(&new_idx)) => new_idx > old_idx,
                    _ => timestamp.get() > current.timestamp.get(),
                }
            }
        };

        if is_newer {
            state.last_read_receipts.insert(user_id, ReadReceipt { event_id, timestamp });
        }
        is_newer
    }

    /// Set the local user's read receipt (spec §4.5 "Auto-promotion"): skip
    /// forward over the local user's own subsequent messages so the
    /// receipt points at the latest non-self event not older than
    /// `event_id`.
    pub async fn set_local_receipt(&self, event_id: OwnedEventId) -> Result<(), ReadMarkerError> {
        let mut state = self.room.write().await;
        let Some(&start_index) = state.event_index.get(&event_id) else {
            return Err(ReadMarkerError::UnknownEvent(event_id));
        };

        let old_index = Self::index_of(&state, &self.local_user);

        let mut promoted_id = event_id.clone();
        let mut promoted_index = start_index;
        for item in state.timeline.iter() {
            if item.index <= promoted_index {
                continue;
            }
            let Some(id) = &item.event.event_id else { break };
            if item.event.sender.as_deref() == Some(&*self.local_user) {
                promoted_id = id.clone();
                promoted_index = item.index;
                continue;
            }
            break;
        }

        state.last_read_receipts.insert(
            self.local_user.clone(),
            ReadReceipt { event_id: promoted_id, timestamp: MilliSecondsSinceUnixEpoch::now() },
        );

        if let Some(old_index) = old_index {
            if promoted_index > old_index {
                let mut unread = state.unread_stats;
                self.update_on_marker_move(&state, old_index, promoted_index, &mut unread);
                state.unread_stats = unread;
            }
        } else {
            let highlight_count = state.unread_stats.highlight_count;
            state.unread_stats = self.recompute_from_marker(&state, promoted_index, highlight_count);
        }

        drop(state);
        self.enforce_stats_invariant().await;
        Ok(())
    }

    /// `markMessagesAsRead` (spec §4.5, §8 scenario 3): move the fully-read
    /// marker forward, pulling the read receipt along if it now lags, and
    /// update `partiallyReadStats`. A no-op (with a warning) for an unknown
    /// event id; a no-op (with a debug log) if it would move the marker
    /// backward.
    pub async fn mark_messages_as_read(&self, event_id: OwnedEventId) -> Change {
        let new_marker_index = {
            let state = self.room.read().await;
            match state.event_index.get(&event_id) {
                Some(&index) => index,
                None => {
                    warn!(%event_id, "markMessagesAsRead: unknown event id, ignoring");
                    return Change::empty();
                }
            }
        };

        let mut state = self.room.write().await;

        let old_marker_index =
            state.fully_read_event_id.as_ref().and_then(|id| state.event_index.get(id).copied());

        if let Some(old_marker_index) = old_marker_index {
            if new_marker_index <= old_marker_index {
                debug!(%event_id, "markMessagesAsRead: marker would move backward, ignoring");
                return Change::empty();
            }
        }

        let effective_old_index = old_marker_index
            .or_else(|| state.min_index().map(|i| i - 1))
            .unwrap_or(new_marker_index - 1);

        let mut partially_read = state.partially_read_stats;
        self.update_on_marker_move(&state, effective_old_index, new_marker_index, &mut partially_read);
        state.partially_read_stats = partially_read;
        state.fully_read_event_id = Some(event_id.clone());

        let receipt_index = Self::index_of(&state, &self.local_user);
        let receipt_lags = receipt_index.map(|i| i < new_marker_index).unwrap_or(true);

        drop(state);
        if receipt_lags {
            // Auto-promotion still applies: the receipt should land on the
            // latest non-self event, not necessarily exactly the marker.
            let _ = self.set_local_receipt(event_id).await;
        }
        self.enforce_stats_invariant().await;

        Change::STATISTICS
    }

    /// Apply an incoming `m.fully_read` account-data event (spec §4.5): same
    /// monotonicity rule as the local call.
    pub async fn apply_fully_read_event(&self, event: &Event) -> Change {
        let AnyEventContent::FullyRead(content) = event.typed_content() else { return Change::empty() };
        let Some(event_id) = content.event_id else { return Change::empty() };
        self.mark_messages_as_read(event_id).await
    }

    /// Count notable events with timeline index in `(from_index,
    /// to_index]` — the half-open range the original's `fromRange` computes
    /// between two markers. `highlight_count` is carried through unchanged;
    /// it is never derived from the local timeline (spec §9).
    fn stats_over(&self, state: &RoomState, from_index: i64, to_index: i64, highlight_count: u64) -> EventStats {
        let notable_count = state
            .timeline
            .iter()
            .filter(|item| item.index > from_index && item.index <= to_index)
            .filter(|item| self.classifier.is_notable(&item.event, &self.local_user))
            .count() as u64;
        EventStats { notable_count, highlight_count, is_estimate: false }
    }

    /// `EventStats::fromMarker`: stats from `marker_index` to the sync edge.
    /// `isEstimate` is true iff `marker_index` is older than the oldest
    /// event currently loaded (spec §4.5).
    fn recompute_from_marker(&self, state: &RoomState, marker_index: i64, highlight_count: u64) -> EventStats {
        let Some(sync_edge) = state.max_index() else {
            return EventStats { notable_count: 0, highlight_count, is_estimate: true };
        };
        let mut stats = self.stats_over(state, marker_index, sync_edge, highlight_count);
        stats.is_estimate = match state.min_index() {
            Some(min) => marker_index < min,
            None => true,
        };
        stats
    }

    /// `EventStats::updateOnMarkerMove` (spec §4.5 "Update-on-marker-move
    /// heuristic"): subtract the removed range if it's the cheaper half,
    /// otherwise recompute from the new marker to the sync edge.
    fn update_on_marker_move(
        &self,
        state: &RoomState,
        old_marker_index: i64,
        new_marker_index: i64,
        stats: &mut EventStats,
    ) {
        if new_marker_index == old_marker_index {
            return;
        }

        let Some(sync_edge) = state.max_index() else { return };
        let moved_within_timeline = old_marker_index - new_marker_index;
        let distance_to_edge = sync_edge - new_marker_index;

        if !stats.is_estimate && moved_within_timeline < distance_to_edge {
            let removed = self.stats_over(state, old_marker_index, new_marker_index, stats.highlight_count);
            stats.notable_count = stats.notable_count.saturating_sub(removed.notable_count);
        } else {
            *stats = self.recompute_from_marker(state, new_marker_index, stats.highlight_count);
        }
    }

    /// Apply the server-reported `unread_notifications.highlight_count` for
    /// a sync batch (spec §9: highlight counting is delegated to the
    /// server, never computed locally). A no-op when unchanged.
    pub async fn apply_highlight_count(&self, highlight_count: u64) -> Change {
        let mut state = self.room.write().await;
        if state.unread_stats.highlight_count == highlight_count {
            return Change::empty();
        }
        state.unread_stats.highlight_count = highlight_count;
        drop(state);
        self.enforce_stats_invariant().await;
        Change::STATISTICS
    }

    /// Spec §4.5 "Invariant check": `partiallyReadStats.notable ≥
    /// unreadStats.notable` (and likewise for highlights). Widen
    /// `partiallyReadStats` upward if it has fallen behind.
    async fn enforce_stats_invariant(&self) {
        let mut state = self.room.write().await;
        if state.partially_read_stats.notable_count < state.unread_stats.notable_count {
            state.partially_read_stats.notable_count = state.unread_stats.notable_count;
            state.partially_read_stats.is_estimate =
                state.partially_read_stats.is_estimate || state.unread_stats.is_estimate;
        }
        if state.partially_read_stats.highlight_count < state.unread_stats.highlight_count {
            state.partially_read_stats.highlight_count = state.unread_stats.highlight_count;
        }
    }
}

#[cfg(test)]
mod tests {
    use matrix_sdk_base::room::{JoinState, Room, TimelineItem};
    use matrix_sdk_common::identifiers::{RoomId, UserId};
    use serde_json::json;
    use std::sync::Arc;

    use super::ReadMarkerEngine;
    use matrix_sdk_base::events::Event;

    async fn room_with_messages(local_user: &UserId, bodies: &[(&str, &str)]) -> Arc<Room> {
        let room = Arc::new(Room::new(RoomId::parse("!a:example.org").unwrap().to_owned()));
        let _ = local_user;

        let mut state = room.write().await;
        state.join_state = JoinState::Join;
        for (index, (sender, body)) in bodies.iter().enumerate() {
            let event_id = format!("$e{index}");
            let event = Event::from_json(json!({
                "type": "m.room.message",
                "event_id": event_id,
                "sender": sender,
                "content": {"msgtype": "m.text", "body": body},
            }))
            .unwrap();
            let event = Arc::new(event);
            state.event_index.insert(event.event_id.clone().unwrap(), index as i64);
            state.timeline.push_back(TimelineItem { event, index: index as i64 });
        }
        drop(state);
        room
    }

    #[tokio::test]
    async fn mark_messages_as_read_moves_fully_read_and_pulls_receipt() {
        let local_user = UserId::parse("@me:example.org").unwrap();
        let room = room_with_messages(
            &local_user,
            &[
                ("@other:example.org", "r1"),
                ("@other:example.org", "r2"),
                ("@other:example.org", "r3"),
                ("@other:example.org", "r4"),
                ("@other:example.org", "r5"),
            ],
        )
        .await;

        {
            let mut state = room.write().await;
            state.fully_read_event_id = Some("$e2".into());
            state.last_read_receipts.insert(
                local_user.to_owned(),
                matrix_sdk_base::room::ReadReceipt {
                    event_id: "$e0".into(),
                    timestamp: matrix_sdk_common::MilliSecondsSinceUnixEpoch(0),
                },
            );
        }

        let engine = ReadMarkerEngine::with_default_classifier(room.clone(), local_user.to_owned());
        engine.mark_messages_as_read("$e4".into()).await;

        let state = room.read().await;
        assert_eq!(state.fully_read_event_id, Some("$e4".into()));
        assert_eq!(state.last_read_receipts.get(local_user).unwrap().event_id, "$e4".into());
    }

    #[tokio::test]
    async fn unknown_event_id_is_a_no_op() {
        let local_user = UserId::parse("@me:example.org").unwrap();
        let room = room_with_messages(&local_user, &[("@other:example.org", "hi")]).await;
        let engine = ReadMarkerEngine::with_default_classifier(room.clone(), local_user.to_owned());

        let change = engine.mark_messages_as_read("$unknown".into()).await;
        assert!(change.is_empty());
        assert!(room.read().await.fully_read_event_id.is_none());
    }

    #[tokio::test]
    async fn marker_cannot_move_backward() {
        let local_user = UserId::parse("@me:example.org").unwrap();
        let room = room_with_messages(
            &local_user,
            &[("@other:example.org", "a"), ("@other:example.org", "b"), ("@other:example.org", "c")],
        )
        .await;

        let engine = ReadMarkerEngine::with_default_classifier(room.clone(), local_user.to_owned());
        engine.mark_messages_as_read("$e2".into()).await;
        let change = engine.mark_messages_as_read("$e0".into()).await;

        assert!(change.is_empty());
        assert_eq!(room.read().await.fully_read_event_id, Some("$e2".into()));
    }

    #[tokio::test]
    async fn auto_promotion_skips_over_own_trailing_messages() {
        let local_user = UserId::parse("@me:example.org").unwrap();
        let room = room_with_messages(
            &local_user,
            &[
                ("@other:example.org", "r1"),
                ("@me:example.org", "mine1"),
                ("@me:example.org", "mine2"),
            ],
        )
        .await;

        let engine = ReadMarkerEngine::with_default_classifier(room.clone(), local_user.to_owned());
        engine.set_local_receipt("$e0".into()).await.unwrap();

        let state = room.read().await;
        assert_eq!(state.last_read_receipts.get(local_user).unwrap().event_id, "$e2".into());
    }
}
