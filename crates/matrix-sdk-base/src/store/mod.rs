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

//! The room state store: per-room `(event_type, state_key) -> latest state
//! event` maps, the append-only timeline, and the pending-event list
//! (spec §4.2). Held in memory only — there is no persistent backend in this
//! runtime, unlike the teacher's pluggable `StateStore` trait, since nothing
//! in the spec calls for swappable storage backends.

use std::sync::Arc;

use matrix_sdk_common::identifiers::OwnedRoomId;
use thiserror::Error;
use tokio::sync::RwLock as AsyncRwLock;

use crate::room::Room;

/// Failures surfaced by the state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("error (de)serializing stored data: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no room found for {0}")]
    RoomNotFound(OwnedRoomId),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Tunables for the store; currently just a holder name for future
/// cross-process coordination, kept so [`Store::new`] has a stable call
/// shape if a persistent backend is ever added.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub holder_name: String,
}

impl StoreConfig {
    pub fn new(holder_name: String) -> Self {
        Self { holder_name }
    }
}

/// The top-level store: a registry of [`Room`]s plus the sync token needed
/// to resume a long-poll (spec §4.8).
pub struct Store {
    rooms: AsyncRwLock<std::collections::HashMap<OwnedRoomId, Arc<Room>>>,
    sync_token: AsyncRwLock<Option<String>>,
    config: StoreConfig,
}

impl Store {
    pub fn new(config: StoreConfig) -> Self {
        Self { rooms: AsyncRwLock::new(Default::default()), sync_token: AsyncRwLock::new(None), config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The room with `room_id`, if known.
    pub async fn room(&self, room_id: &OwnedRoomId) -> Option<Arc<Room>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// All known rooms.
    pub async fn rooms(&self) -> Vec<Arc<Room>> {
        self.rooms.read().await.values().cloned().collect()
    }

    /// Return the existing room for `room_id`, or create and register a new
    /// one.
    pub async fn get_or_create_room(&self, room_id: &OwnedRoomId) -> Arc<Room> {
        let mut rooms = self.rooms.write().await;
        rooms.entry(room_id.clone()).or_insert_with(|| Arc::new(Room::new(room_id.clone()))).clone()
    }

    /// Drop a room entirely, e.g. after the user leaves and forgets it.
    pub async fn forget_room(&self, room_id: &OwnedRoomId) {
        self.rooms.write().await.remove(room_id);
    }

    /// The sync token to resume the long-poll with (spec §4.8).
    pub async fn sync_token(&self) -> Option<String> {
        self.sync_token.read().await.clone()
    }

    pub async fn set_sync_token(&self, token: String) {
        *self.sync_token.write().await = Some(token);
    }
}

#[cfg(test)]
mod tests {
    use matrix_sdk_common::identifiers::RoomId;

    use super::{Store, StoreConfig};

    #[tokio::test]
    async fn get_or_create_room_is_idempotent() {
        let store = Store::new(StoreConfig::new("test".to_owned()));
        let room_id = RoomId::parse("!abc:example.org").unwrap().to_owned();

        let first = store.get_or_create_room(&room_id).await;
        let second = store.get_or_create_room(&room_id).await;
        assert!(std::sync::Arc::ptr_eq(&first, &second));
    }
}
