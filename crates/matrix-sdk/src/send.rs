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

//! The Send Pipeline (spec §4.4): assigns transaction ids, appends local
//! echoes to the pending list, drives the `PUT /send` request, and walks
//! pending events through their delivery-status state machine. A later sync
//! batch reconciles the echo (spec §4.3.1 step 4); this module only owns
//! the submission half.

use std::sync::Arc;

use matrix_sdk_base::room::{DeliveryStatus, PendingEvent, Room};
use matrix_sdk_common::{
    identifiers::{new_transaction_id, OwnedTransactionId},
    MilliSecondsSinceUnixEpoch,
};
use serde_json::Value;
use tracing::{instrument, warn};

use crate::{
    error::{Error, Result},
    http::HomeserverApi,
};

/// Drives message/state/reaction submissions for one room (spec §4.4).
pub struct SendPipeline {
    room: Arc<Room>,
    api: Arc<dyn HomeserverApi>,
    local_user: matrix_sdk_common::identifiers::OwnedUserId,
}

impl SendPipeline {
    pub fn new(
        room: Arc<Room>,
        api: Arc<dyn HomeserverApi>,
        local_user: matrix_sdk_common::identifiers::OwnedUserId,
    ) -> Self {
        Self { room, api, local_user }
    }

    /// Submit `content` as a new event of `event_type` (spec §4.4 steps
    /// 1-4). Refuses with [`Error::RoomUpgraded`] if the room has been
    /// tombstoned (spec §7 `VersionObsolete`, §8 scenario 6) without ever
    /// creating a pending event.
    #[instrument(skip(self, content), fields(room_id = %self.room.room_id()))]
    pub async fn submit(&self, event_type: &str, content: Value) -> Result<OwnedTransactionId> {
        if let Some(successor) = self.successor_if_tombstoned().await {
            return Err(Error::RoomUpgraded {
                room_id: self.room.room_id().clone(),
                successor_room_id: successor,
            });
        }

        let transaction_id = new_transaction_id();
        self.append_pending(event_type, content.clone(), transaction_id.clone()).await;
        self.dispatch(event_type, content, transaction_id.clone()).await;
        Ok(transaction_id)
    }

    async fn successor_if_tombstoned(&self) -> Option<matrix_sdk_common::identifiers::OwnedRoomId> {
        self.room.read().await.successor_room_id.clone()
    }

    async fn append_pending(&self, event_type: &str, content: Value, transaction_id: OwnedTransactionId) {
        let event = matrix_sdk_base::events::Event::from_json(serde_json::json!({
            "type": event_type,
            "sender": self.local_user.to_string(),
            "room_id": self.room.room_id().to_string(),
            "content": content,
            "unsigned": {"transaction_id": transaction_id.to_string()},
        }))
        .expect("locally constructed events always carry a type");

        let pending = PendingEvent {
            event: Arc::new(event),
            transaction_id,
            delivery_status: DeliveryStatus::Submitted,
            last_updated: MilliSecondsSinceUnixEpoch::now(),
            annotation: None,
        };

        self.room.write().await.pending.push(pending);
    }

    /// Drive the `PUT /send` request for a pending event already in
    /// `Submitted` or `SendingFailed` state, transitioning it through
    /// `Departed` to `ReachedServer`/`SendingFailed` (spec §4.4 step 4).
    async fn dispatch(&self, event_type: &str, content: Value, transaction_id: OwnedTransactionId) {
        self.set_status(&transaction_id, DeliveryStatus::Departed, None).await;

        match self.api.send_event(self.room.room_id(), event_type, &transaction_id, content).await {
            Ok(_event_id) => {
                self.set_status(&transaction_id, DeliveryStatus::ReachedServer, None).await;
            }
            Err(err) => {
                warn!(%transaction_id, error = %err, "send failed");
                self.set_status(&transaction_id, DeliveryStatus::SendingFailed, Some(err.to_string()))
                    .await;
            }
        }
    }

    async fn set_status(
        &self,
        transaction_id: &OwnedTransactionId,
        status: DeliveryStatus,
        annotation: Option<String>,
    ) {
        let mut state = self.room.write().await;
        if let Some(pending) = state.pending.iter_mut().find(|p| p.transaction_id == *transaction_id) {
            pending.delivery_status = status;
            pending.last_updated = MilliSecondsSinceUnixEpoch::now();
            if annotation.is_some() {
                pending.annotation = annotation;
            }
        }
    }

    /// Re-submit a `SendingFailed` pending event after resetting it to
    /// `Submitted` (spec §4.4 "`retry`"). Retrying an event that had
    /// already `ReachedServer` is permitted but logged, since the server
    /// may now see a duplicate.
    pub async fn retry(&self, transaction_id: &OwnedTransactionId) -> Result<()> {
        let (event_type, content, already_reached_server) = {
            let state = self.room.read().await;
            let Some(pending) = state.pending.iter().find(|p| p.transaction_id == *transaction_id)
            else {
                return Err(Error::UnknownRoom(self.room.room_id().clone()));
            };
            (
                pending.event.event_type.clone(),
                pending.event.content.clone(),
                pending.delivery_status == DeliveryStatus::ReachedServer,
            )
        };

        if already_reached_server {
            warn!(%transaction_id, "retrying an event that already reached the server; a duplicate may appear");
        }

        self.set_status(transaction_id, DeliveryStatus::Submitted, None).await;
        self.dispatch(&event_type, content, transaction_id.clone()).await;
        Ok(())
    }

    /// Drive the already-appended pending event identified by
    /// `transaction_id` through `dispatch` (spec §4.4 "For file messages":
    /// the pending event is inserted up front and sent only once the
    /// upload it depends on has completed).
    pub async fn dispatch_existing(&self, transaction_id: &OwnedTransactionId) -> Result<()> {
        let (event_type, content) = {
            let state = self.room.read().await;
            let pending = state
                .pending
                .iter()
                .find(|p| p.transaction_id == *transaction_id)
                .ok_or_else(|| Error::UnknownRoom(self.room.room_id().clone()))?;
            (pending.event.event_type.clone(), pending.event.content.clone())
        };
        self.dispatch(&event_type, content, transaction_id.clone()).await;
        Ok(())
    }

    /// Remove a pending event without sending it, or after giving up on
    /// retrying it (spec §4.4 "`discard`"). File uploads associated with a
    /// discarded pending event are cancelled by the caller (the file
    /// transfer manager owns that association — spec §4.4 "For file
    /// messages").
    pub async fn discard(&self, transaction_id: &OwnedTransactionId) {
        self.room.write().await.pending.retain(|p| p.transaction_id != *transaction_id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use matrix_sdk_base::{
        room::{DeliveryStatus, JoinState, Room},
        sync::SyncResponse,
    };
    use matrix_sdk_common::identifiers::{MxcUri, OwnedEventId, OwnedRoomId, OwnedTransactionId, RoomId, UserId};
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    use super::SendPipeline;
    use crate::http::{HomeserverApi, HttpError, Paginated};

    struct FakeApi {
        fail_next: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl HomeserverApi for FakeApi {
        async fn send_event(
            &self,
            _room_id: &OwnedRoomId,
            _event_type: &str,
            _transaction_id: &OwnedTransactionId,
            _content: Value,
        ) -> Result<OwnedEventId, HttpError> {
            if *self.fail_next.lock().unwrap() {
                return Err(HttpError::Network("boom".into()));
            }
            Ok("$server:example.org".into())
        }

        async fn send_state(
            &self,
            _: &OwnedRoomId,
            _: &str,
            _: &str,
            _: Value,
        ) -> Result<OwnedEventId, HttpError> {
            unimplemented!()
        }

        async fn redact(
            &self,
            _: &OwnedRoomId,
            _: &OwnedEventId,
            _: &OwnedTransactionId,
            _: Option<String>,
        ) -> Result<OwnedEventId, HttpError> {
            unimplemented!()
        }

        async fn paginate(&self, _: &OwnedRoomId, _: &str, _: u32) -> Result<Paginated, HttpError> {
            unimplemented!()
        }

        async fn send_receipt(
            &self,
            _: &OwnedRoomId,
            _: &OwnedEventId,
            _: Option<String>,
        ) -> Result<(), HttpError> {
            unimplemented!()
        }

        async fn send_read_markers(
            &self,
            _: &OwnedRoomId,
            _: &OwnedEventId,
            _: Option<&OwnedEventId>,
        ) -> Result<(), HttpError> {
            unimplemented!()
        }

        async fn upload(&self, _: &str, _: Vec<u8>) -> Result<MxcUri, HttpError> {
            unimplemented!()
        }

        async fn download(&self, _: &MxcUri) -> Result<Vec<u8>, HttpError> {
            unimplemented!()
        }

        async fn upload_keys(
            &self,
            _: Option<Value>,
            _: BTreeMap<String, Value>,
        ) -> Result<BTreeMap<String, u64>, HttpError> {
            unimplemented!()
        }

        async fn query_keys(&self, _: Vec<String>) -> Result<Value, HttpError> {
            unimplemented!()
        }

        async fn claim_keys(
            &self,
            _: BTreeMap<String, BTreeMap<String, String>>,
        ) -> Result<Value, HttpError> {
            unimplemented!()
        }

        async fn key_changes(&self, _: &str, _: &str) -> Result<Value, HttpError> {
            unimplemented!()
        }

        async fn sync(&self, _: Option<&str>, _: u64) -> Result<SyncResponse, HttpError> {
            unimplemented!()
        }

        async fn upgrade_room(&self, _: &OwnedRoomId, _: &str) -> Result<OwnedRoomId, HttpError> {
            unimplemented!()
        }
    }

    async fn pipeline(fail_next: Arc<Mutex<bool>>) -> (Arc<Room>, SendPipeline) {
        let room = Arc::new(Room::new(RoomId::parse("!a:example.org").unwrap().to_owned()));
        room.set_join_state(JoinState::Join).await;
        let api = Arc::new(FakeApi { fail_next });
        let local_user = UserId::parse("@me:example.org").unwrap().to_owned();
        let send = SendPipeline::new(room.clone(), api, local_user);
        (room, send)
    }

    #[tokio::test]
    async fn a_successful_send_reaches_server_status() {
        let (room, send) = pipeline(Arc::new(Mutex::new(false))).await;
        let txn = send.submit("m.room.message", json!({"msgtype": "m.text", "body": "hi"})).await.unwrap();

        let state = room.read().await;
        let pending = state.pending.iter().find(|p| p.transaction_id == txn).unwrap();
        assert_eq!(pending.delivery_status, DeliveryStatus::ReachedServer);
    }

    #[tokio::test]
    async fn a_failed_send_can_be_retried() {
        let fail_next = Arc::new(Mutex::new(true));
        let (room, send) = pipeline(fail_next.clone()).await;
        let txn = send.submit("m.room.message", json!({"msgtype": "m.text", "body": "hi"})).await.unwrap();

        {
            let state = room.read().await;
            let pending = state.pending.iter().find(|p| p.transaction_id == txn).unwrap();
            assert_eq!(pending.delivery_status, DeliveryStatus::SendingFailed);
        }

        *fail_next.lock().unwrap() = false;
        send.retry(&txn).await.unwrap();

        let state = room.read().await;
        let pending = state.pending.iter().find(|p| p.transaction_id == txn).unwrap();
        assert_eq!(pending.delivery_status, DeliveryStatus::ReachedServer);
    }

    #[tokio::test]
    async fn sending_into_a_tombstoned_room_is_refused_without_a_pending_event() {
        let (room, send) = pipeline(Arc::new(Mutex::new(false))).await;
        room.write().await.successor_room_id = Some(RoomId::parse("!b:example.org").unwrap().to_owned());

        let err = send.submit("m.room.message", json!({"body": "hi"})).await.unwrap_err();
        assert!(matches!(err, crate::error::Error::RoomUpgraded { .. }));
        assert!(room.read().await.pending.is_empty());
    }

    #[tokio::test]
    async fn discard_removes_the_pending_event() {
        let (room, send) = pipeline(Arc::new(Mutex::new(false))).await;
        let txn = send.submit("m.room.message", json!({"body": "hi"})).await.unwrap();
        send.discard(&txn).await;
        assert!(room.read().await.pending.is_empty());
    }
}
