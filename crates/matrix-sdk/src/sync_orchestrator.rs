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

//! The Sync Orchestrator (spec §4.8): a long-running cooperative task that
//! repeatedly issues `/sync`, decomposes each response, and fans the
//! per-room sections out to whoever owns the room's engines. Retries
//! network errors with capped exponential backoff; authentication errors
//! are fatal and surface to the embedder over a broadcast channel.

use std::sync::Arc;

use async_trait::async_trait;
use matrix_sdk_base::{
    events::Event,
    store::Store,
    sync::{DeviceLists, InvitedRoom, JoinedRoom, LeftRoom, SyncResponse},
};
use matrix_sdk_common::identifiers::OwnedRoomId;
use tracing::{instrument, warn};

use crate::{config::BackoffConfig, http::{HomeserverApi, HttpError}};

/// The per-room/global dispatch targets the orchestrator feeds (spec §4.8:
/// "fans out sync response sections"). Implemented by [`crate::Client`],
/// which owns the Timeline Engine and Read-Marker Engine for each room.
#[async_trait]
pub trait SyncSink: Send + Sync {
    /// Dispatch one `join` section. Implementations must apply state,
    /// then timeline, then ephemeral, then account data, then summary, in
    /// that fixed order (spec §4.8).
    async fn handle_joined_room(&self, room_id: &OwnedRoomId, room: JoinedRoom);
    async fn handle_invited_room(&self, room_id: &OwnedRoomId, room: InvitedRoom);
    async fn handle_left_room(&self, room_id: &OwnedRoomId, room: LeftRoom);
    async fn handle_to_device(&self, events: Vec<Event>);
    async fn handle_device_lists(&self, device_lists: DeviceLists);
}

/// Drives the `/sync` long-poll loop for one [`crate::Client`] (spec §4.8).
pub struct SyncOrchestrator {
    api: Arc<dyn HomeserverApi>,
    store: Arc<Store>,
    sink: Arc<dyn SyncSink>,
    backoff: BackoffConfig,
    timeout_ms: u64,
    fatal_errors: tokio::sync::broadcast::Sender<String>,
}

impl SyncOrchestrator {
    pub fn new(
        api: Arc<dyn HomeserverApi>,
        store: Arc<Store>,
        sink: Arc<dyn SyncSink>,
        backoff: BackoffConfig,
        timeout_ms: u64,
    ) -> Self {
        let (fatal_errors, _) = tokio::sync::broadcast::channel(16);
        Self { api, store, sink, backoff, timeout_ms, fatal_errors }
    }

    /// Subscribe to fatal (authentication) failures that terminate the loop
    /// (spec §4.8 "Failure").
    pub fn subscribe_fatal_errors(&self) -> tokio::sync::broadcast::Receiver<String> {
        self.fatal_errors.subscribe()
    }

    /// Run the long-poll loop until an authentication error terminates it.
    ///
    /// Cancelling the task that runs this future and starting a fresh one
    /// "restarts with the same batch token" for free (spec §5
    /// "Cancellation"): the token is only read from and written to the
    /// store, never held across a suspension point.
    #[instrument(skip(self))]
    pub async fn run(&self) {
        let mut attempt: u32 = 0;

        loop {
            let since = self.store.sync_token().await;

            match self.api.sync(since.as_deref(), self.timeout_ms).await {
                Ok(response) => {
                    attempt = 0;
                    self.apply(response).await;
                }
                Err(HttpError::Authentication(message)) => {
                    warn!(error = %message, "sync authentication failed; terminating loop");
                    let _ = self.fatal_errors.send(message);
                    return;
                }
                Err(err) => {
                    let delay = self.backoff.delay_for(attempt);
                    warn!(error = %err, attempt, delay_ms = %delay.as_millis(), "sync request failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    #[instrument(skip(self, response), fields(next_batch = %response.next_batch))]
    async fn apply(&self, response: SyncResponse) {
        for (room_id, joined) in response.rooms.join {
            self.sink.handle_joined_room(&room_id, joined).await;
        }
        for (room_id, invited) in response.rooms.invite {
            self.sink.handle_invited_room(&room_id, invited).await;
        }
        for (room_id, left) in response.rooms.leave {
            self.sink.handle_left_room(&room_id, left).await;
        }
        if !response.to_device.is_empty() {
            self.sink.handle_to_device(response.to_device).await;
        }
        self.sink.handle_device_lists(response.device_lists).await;

        // Persisted last: only after every section of this batch has been
        // applied is it safe to resume from `next_batch` (spec §4.8).
        self.store.set_sync_token(response.next_batch).await;
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        sync::{atomic::{AtomicUsize, Ordering}, Arc},
    };

    use async_trait::async_trait;
    use matrix_sdk_base::store::StoreConfig;
    use matrix_sdk_common::identifiers::{EventId, MxcUri, OwnedEventId, OwnedRoomId, OwnedTransactionId, RoomId};
    use serde_json::Value;
    use tokio::sync::Mutex;

    use super::{SyncOrchestrator, SyncSink};
    use crate::{
        config::BackoffConfig,
        http::{HomeserverApi, HttpError, Paginated},
    };

    struct CountingSink {
        joined: AtomicUsize,
    }

    #[async_trait]
    impl SyncSink for CountingSink {
        async fn handle_joined_room(
            &self,
            _room_id: &OwnedRoomId,
            _room: matrix_sdk_base::sync::JoinedRoom,
        ) {
            self.joined.fetch_add(1, Ordering::SeqCst);
        }
        async fn handle_invited_room(&self, _: &OwnedRoomId, _: matrix_sdk_base::sync::InvitedRoom) {}
        async fn handle_left_room(&self, _: &OwnedRoomId, _: matrix_sdk_base::sync::LeftRoom) {}
        async fn handle_to_device(&self, _: Vec<matrix_sdk_base::events::Event>) {}
        async fn handle_device_lists(&self, _: matrix_sdk_base::sync::DeviceLists) {}
    }

    struct ScriptedApi {
        responses: Mutex<Vec<Result<matrix_sdk_base::sync::SyncResponse, HttpError>>>,
    }

    #[async_trait]
    impl HomeserverApi for ScriptedApi {
        async fn send_event(
            &self,
            _: &OwnedRoomId,
            _: &str,
            _: &OwnedTransactionId,
            _: Value,
        ) -> Result<OwnedEventId, HttpError> {
            unimplemented!()
        }
        async fn send_state(&self, _: &OwnedRoomId, _: &str, _: &str, _: Value) -> Result<OwnedEventId, HttpError> {
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
        async fn send_receipt(&self, _: &OwnedRoomId, _: &OwnedEventId, _: Option<String>) -> Result<(), HttpError> {
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
        async fn claim_keys(&self, _: BTreeMap<String, BTreeMap<String, String>>) -> Result<Value, HttpError> {
            unimplemented!()
        }
        async fn key_changes(&self, _: &str, _: &str) -> Result<Value, HttpError> {
            unimplemented!()
        }
        async fn sync(&self, _since: Option<&str>, _timeout_ms: u64) -> Result<matrix_sdk_base::sync::SyncResponse, HttpError> {
            self.responses.lock().await.remove(0)
        }
        async fn upgrade_room(&self, _: &OwnedRoomId, _: &str) -> Result<OwnedRoomId, HttpError> {
            unimplemented!()
        }
    }

    fn joined_room_response(next_batch: &str) -> matrix_sdk_base::sync::SyncResponse {
        let mut response = matrix_sdk_base::sync::SyncResponse {
            next_batch: next_batch.to_owned(),
            ..Default::default()
        };
        let room_id = RoomId::parse("!a:example.org").unwrap().to_owned();
        response.rooms.join.insert(
            room_id,
            matrix_sdk_base::sync::JoinedRoom {
                state: vec![],
                timeline: Default::default(),
                ephemeral: vec![],
                account_data: vec![],
                unread_notifications: Default::default(),
                summary: Default::default(),
            },
        );
        response
    }

    #[tokio::test]
    async fn a_successful_sync_persists_the_next_batch_token() {
        let store = Arc::new(Store::new(StoreConfig::new("test".to_owned())));
        let sink = Arc::new(CountingSink { joined: AtomicUsize::new(0) });
        let api = Arc::new(ScriptedApi {
            responses: Mutex::new(vec![
                Ok(joined_room_response("batch-1")),
                Err(HttpError::Authentication("token revoked".to_owned())),
            ]),
        });

        let orchestrator =
            SyncOrchestrator::new(api, store.clone(), sink.clone(), BackoffConfig::default(), 100);
        let mut fatal = orchestrator.subscribe_fatal_errors();

        orchestrator.run().await;

        assert_eq!(sink.joined.load(Ordering::SeqCst), 1);
        assert_eq!(store.sync_token().await.as_deref(), Some("batch-1"));
        assert_eq!(fatal.try_recv().unwrap(), "token revoked");
    }

    #[test]
    fn event_id_parses_used_in_fixtures_are_valid() {
        assert!(EventId::parse("$a:example.org").is_ok());
    }
}
