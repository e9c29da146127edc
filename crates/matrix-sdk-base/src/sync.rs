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

//! The decomposed shape of a `/sync` response (spec §4.8): per-room
//! `join`/`invite`/`leave` sections, account data, to-device messages, and
//! device-list changes. Intended to be source-agnostic — whoever calls the
//! HTTP endpoint builds one of these from the raw JSON.

use std::collections::BTreeMap;

use matrix_sdk_common::identifiers::OwnedRoomId;

use crate::{events::Event, room::RoomSummary};

/// The full decomposition of one `/sync` response.
#[derive(Default)]
pub struct SyncResponse {
    pub next_batch: String,
    pub rooms: Rooms,
    pub account_data: Vec<Event>,
    pub to_device: Vec<Event>,
    pub device_lists: DeviceLists,
    pub device_one_time_keys_count: BTreeMap<String, u64>,
}

#[derive(Default)]
pub struct Rooms {
    pub join: BTreeMap<OwnedRoomId, JoinedRoom>,
    pub invite: BTreeMap<OwnedRoomId, InvitedRoom>,
    pub leave: BTreeMap<OwnedRoomId, LeftRoom>,
}

#[derive(Default)]
pub struct DeviceLists {
    pub changed: Vec<matrix_sdk_common::identifiers::OwnedUserId>,
    pub left: Vec<matrix_sdk_common::identifiers::OwnedUserId>,
}

/// A room the user is joined to. Dispatch order within the room is fixed
/// (spec §4.8): state, then timeline, then ephemeral, then account data,
/// then summary.
pub struct JoinedRoom {
    pub state: Vec<Event>,
    pub timeline: Timeline,
    pub ephemeral: Vec<Event>,
    pub account_data: Vec<Event>,
    pub unread_notifications: UnreadNotificationsCount,
    pub summary: RoomSummary,
}

/// A room the user has been invited to: only a stripped preview of state is
/// available.
pub struct InvitedRoom {
    pub invite_state: Vec<Event>,
}

/// A room the user has left or been banned from.
pub struct LeftRoom {
    pub state: Vec<Event>,
    pub timeline: Timeline,
    pub account_data: Vec<Event>,
    pub summary: RoomSummary,
}

/// The room-event section of a sync response.
#[derive(Default)]
pub struct Timeline {
    /// True if the server limited the number of returned events; a gap exists
    /// before these events and what's in the local timeline.
    pub limited: bool,
    /// Token to paginate backwards from the start of this batch.
    pub prev_batch: Option<String>,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UnreadNotificationsCount {
    pub highlight_count: u64,
    pub notification_count: u64,
}

#[cfg(test)]
mod tests {
    use super::{SyncResponse, Timeline};

    #[test]
    fn default_sync_response_has_no_rooms() {
        let response = SyncResponse::default();
        assert!(response.rooms.join.is_empty());
        assert!(response.rooms.invite.is_empty());
        assert!(response.rooms.leave.is_empty());
    }

    #[test]
    fn default_timeline_is_not_limited() {
        assert!(!Timeline::default().limited);
    }
}
