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

//! The persistent per-room cache format (spec §6): summary, state (or
//! invite-state), account data, the last local read receipt, and the cached
//! notification counters. A cached counter of `-1` means "exactly zero
//! notable events"; any other non-negative value is an estimate until the
//! next in-timeline marker move recomputes it exactly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::room::{EventStats, Room, RoomSummary};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSnapshotSummary {
    pub heroes: Vec<String>,
    pub joined_member_count: u64,
    pub invited_member_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventList {
    pub events: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadNotifications {
    pub notification_count: i64,
    pub highlight_count: i64,
}

/// A full room snapshot, serialised to and restored from the persistent
/// cache (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub summary: RoomSnapshotSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<EventList>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_state: Option<EventList>,
    pub account_data: EventList,
    pub ephemeral: EventList,
    pub unread_notifications: UnreadNotifications,
    #[serde(rename = "org.quotient.unread_count")]
    pub org_quotient_unread_count: i64,
}

impl RoomSnapshot {
    /// Build a snapshot from the stats cached at a given marker. `-1` denotes
    /// "no notable events" (exact); the loader treats any other value as an
    /// estimate until it is recomputed.
    pub fn encode_stats(stats: &EventStats) -> i64 {
        if stats.notable_count == 0 && !stats.is_estimate {
            -1
        } else {
            stats.notable_count as i64
        }
    }

    pub fn decode_stats(cached: i64) -> EventStats {
        if cached < 0 {
            EventStats { notable_count: 0, highlight_count: 0, is_estimate: false }
        } else {
            EventStats { notable_count: cached as u64, highlight_count: 0, is_estimate: true }
        }
    }

    pub fn summary_from(summary: &RoomSummary) -> RoomSnapshotSummary {
        RoomSnapshotSummary {
            heroes: summary.heroes.iter().map(ToString::to_string).collect(),
            joined_member_count: summary.joined_count,
            invited_member_count: summary.invited_count,
        }
    }

    /// Build the persisted snapshot for `room`.
    pub async fn capture(room: &Room) -> Self {
        let state = room.read().await;

        let state_events: Vec<Value> = state
            .current_state
            .values()
            .map(|event| {
                serde_json::json!({
                    "type": event.event_type,
                    "state_key": event.state_key,
                    "content": event.content,
                })
            })
            .collect();

        let ephemeral_events = state
            .last_read_receipts
            .values()
            .map(|receipt| {
                serde_json::json!({
                    "type": "m.receipt",
                    "content": {
                        receipt.event_id.to_string(): {
                            "m.read": { "timestamp": receipt.timestamp.get() }
                        }
                    }
                })
            })
            .collect();

        Self {
            summary: Self::summary_from(&state.summary),
            state: Some(EventList { events: state_events }),
            invite_state: None,
            account_data: EventList {
                events: state.account_data.values().cloned().collect(),
            },
            ephemeral: EventList { events: ephemeral_events },
            unread_notifications: UnreadNotifications {
                notification_count: Self::encode_stats(&state.unread_stats),
                highlight_count: state.unread_stats.highlight_count as i64,
            },
            org_quotient_unread_count: Self::encode_stats(&state.partially_read_stats),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RoomSnapshot;
    use crate::room::EventStats;

    #[test]
    fn exact_zero_encodes_as_minus_one() {
        let stats = EventStats { notable_count: 0, highlight_count: 0, is_estimate: false };
        assert_eq!(RoomSnapshot::encode_stats(&stats), -1);
    }

    #[test]
    fn nonzero_count_round_trips() {
        let stats = EventStats { notable_count: 7, highlight_count: 0, is_estimate: true };
        assert_eq!(RoomSnapshot::encode_stats(&stats), 7);
        let decoded = RoomSnapshot::decode_stats(7);
        assert_eq!(decoded.notable_count, 7);
        assert!(decoded.is_estimate);
    }

    #[test]
    fn minus_one_decodes_to_exact_zero() {
        let decoded = RoomSnapshot::decode_stats(-1);
        assert_eq!(decoded.notable_count, 0);
        assert!(!decoded.is_estimate);
    }
}
