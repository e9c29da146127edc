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

//! The `Client`/`Room` facade (spec §1, §4.8): owns the store, the
//! homeserver transport, one set of per-room engines per known room, and
//! fans `/sync` batches out to them in the fixed state → timeline →
//! ephemeral → account-data → summary order. `RoomHandle` exposes the
//! room-facing operations (send, retry, mark-as-read, upload/download,
//! room-version switch) that the rest of this crate implements.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use async_trait::async_trait;
#[cfg(feature = "e2e-encryption")]
use matrix_sdk_crypto::OlmAccount;
use matrix_sdk_base::{
    events::Event,
    room::{DeliveryStatus, JoinState, PendingEvent, Room, RoomSummary},
    store::Store,
    sync::{DeviceLists, InvitedRoom, JoinedRoom, LeftRoom},
};
use matrix_sdk_common::{
    identifiers::{new_transaction_id, OwnedEventId, OwnedRoomId, OwnedTransactionId, OwnedUserId},
    locks::SyncGuardLock,
    MilliSecondsSinceUnixEpoch,
};
use matrix_sdk_ui::{Change, ReadMarkerEngine, TimelineEngine};
use serde_json::{json, Value};
use tokio::sync::{broadcast, RwLock};
use tracing::{instrument, warn};
#[cfg(feature = "e2e-encryption")]
use vodozemac::Curve25519PublicKey;

use crate::{
    config::ClientConfig,
    error::{Error, Result},
    http::HomeserverApi,
    send::SendPipeline,
    sync_orchestrator::{SyncOrchestrator, SyncSink},
    transfer::{self, FileMetadataMap, FileTransferManager},
};
#[cfg(feature = "e2e-encryption")]
use crate::keys::KeyStore;

/// The Timeline Engine, Read-Marker Engine, and Send Pipeline for one room,
/// created lazily the first time the room is touched.
struct RoomEngines {
    room: Arc<Room>,
    timeline: TimelineEngine,
    read_marker: ReadMarkerEngine,
    send: SendPipeline,
}

/// The top-level facade (`SPEC_FULL` §1 addition): owns the store, the
/// homeserver transport, one set of per-room engines per known room, and
/// (under `e2e-encryption`) the connection's [`KeyStore`]. Implements
/// [`SyncSink`] to fan sync batches out to the right room's engines.
pub struct Client {
    config: ClientConfig,
    api: Arc<dyn HomeserverApi>,
    store: Arc<Store>,
    local_user: OwnedUserId,
    file_metadata: FileMetadataMap,
    rooms: RwLock<HashMap<OwnedRoomId, Arc<RoomEngines>>>,
    changes: broadcast::Sender<(OwnedRoomId, Change)>,
    /// Serializes "apply a sync batch" against "mutate room state from a
    /// `RoomHandle` call" (spec §5): a manual `markMessagesAsRead` racing an
    /// in-flight sync application must never interleave with it.
    sync_guard: SyncGuardLock,
    #[cfg(feature = "e2e-encryption")]
    keys: KeyStore,
}

impl Client {
    pub fn new(config: ClientConfig, api: Arc<dyn HomeserverApi>, local_user: OwnedUserId) -> Arc<Self> {
        let store = Arc::new(Store::new(config.store.clone()));
        let (changes, _) = broadcast::channel(256);

        Arc::new(Self {
            #[cfg(feature = "e2e-encryption")]
            keys: KeyStore::new(
                OlmAccount::new(),
                config.megolm_rotation_messages,
                config.megolm_rotation_period,
            ),
            config,
            api,
            store,
            local_user,
            file_metadata: transfer::new_file_metadata_map(),
            rooms: RwLock::new(HashMap::new()),
            changes,
            sync_guard: SyncGuardLock::new(),
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn local_user(&self) -> &OwnedUserId {
        &self.local_user
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[cfg(feature = "e2e-encryption")]
    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// Subscribe to the change sets ingestion produces, `(room, change)`
    /// pairs dispatched as each sync batch is applied (spec §9 "Signal/slot
    /// notifications": an explicit change set delivered to subscribers
    /// rather than emitted signals).
    pub fn subscribe_changes(&self) -> broadcast::Receiver<(OwnedRoomId, Change)> {
        self.changes.subscribe()
    }

    /// A [`FileTransferManager`] sharing this client's transport and
    /// metadata map. Cheap to construct; callers may keep one around per
    /// room or build one per call.
    pub fn file_transfers(&self) -> FileTransferManager {
        FileTransferManager::new(self.api.clone(), self.file_metadata.clone())
    }

    /// Build a [`SyncOrchestrator`] driving this client's sync loop. The
    /// caller owns spawning and cancelling the returned orchestrator's
    /// [`SyncOrchestrator::run`] future (spec §5 "Cancellation": cancelling
    /// and restarting it resumes for free, since the token only ever lives
    /// in the store).
    pub fn sync_orchestrator(self: &Arc<Self>) -> SyncOrchestrator {
        SyncOrchestrator::new(
            self.api.clone(),
            self.store.clone(),
            self.clone() as Arc<dyn SyncSink>,
            self.config.backoff,
            self.config.sync_timeout.as_millis() as u64,
        )
    }

    /// A handle onto `room_id`'s engines, creating them on first use.
    pub async fn room(self: &Arc<Self>, room_id: &OwnedRoomId) -> RoomHandle {
        let room = self.store.get_or_create_room(room_id).await;
        let engines = self.engines_for(room).await;
        RoomHandle { client: self.clone(), engines }
    }

    async fn engines_for(&self, room: Arc<Room>) -> Arc<RoomEngines> {
        if let Some(engines) = self.rooms.read().await.get(room.room_id()) {
            return engines.clone();
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room.room_id().clone())
            .or_insert_with(|| {
                Arc::new(RoomEngines {
                    timeline: TimelineEngine::new(room.clone()),
                    read_marker: ReadMarkerEngine::with_default_classifier(
                        room.clone(),
                        self.local_user.clone(),
                    ),
                    send: SendPipeline::new(room.clone(), self.api.clone(), self.local_user.clone()),
                    room,
                })
            })
            .clone()
    }

    fn notify(&self, room_id: &OwnedRoomId, change: Change) {
        if !change.is_empty() {
            let _ = self.changes.send((room_id.clone(), change));
        }
    }

    /// Decrypt every `m.room.encrypted` event in a timeline batch before it
    /// reaches the Timeline Engine, which has no notion of cryptography
    /// (spec §4.7). An event whose session is missing is left encrypted;
    /// a later `m.room_key` to-device message may make it decryptable.
    #[cfg(feature = "e2e-encryption")]
    fn decrypt_timeline_batch(&self, events: Vec<Event>) -> Vec<Event> {
        events
            .into_iter()
            .map(|event| {
                if event.event_type != "m.room.encrypted" {
                    return event;
                }
                match self.keys.decrypt_room_event(&event) {
                    Ok(decrypted) => decrypted,
                    Err(err) => {
                        warn!(error = %err, "event undecryptable, leaving it encrypted");
                        event
                    }
                }
            })
            .collect()
    }

    #[cfg(not(feature = "e2e-encryption"))]
    fn decrypt_timeline_batch(&self, events: Vec<Event>) -> Vec<Event> {
        events
    }

    /// Apply the `summary` section of a sync batch (spec §4.8, last in
    /// dispatch order): a no-op when the server sent nothing new.
    async fn apply_summary(room: &Arc<Room>, summary: RoomSummary) -> Change {
        if summary.heroes.is_empty() && summary.joined_count == 0 && summary.invited_count == 0 {
            return Change::empty();
        }
        room.write().await.summary = summary;
        Change::SUMMARY
    }
}

#[async_trait]
impl SyncSink for Client {
    #[instrument(skip(self, room))]
    async fn handle_joined_room(&self, room_id: &OwnedRoomId, room: JoinedRoom) {
        let _guard = self.sync_guard.lock().await;

        let r = self.store.get_or_create_room(room_id).await;
        r.set_join_state(JoinState::Join).await;
        let engines = self.engines_for(r.clone()).await;

        let mut change = Change::empty();
        if !room.state.is_empty() {
            change |= engines.timeline.ingest_forward(room.state).await;
        }
        if !room.timeline.events.is_empty() {
            let events = self.decrypt_timeline_batch(room.timeline.events);
            change |= engines.timeline.ingest_forward(events).await;
        }
        change |= engines.read_marker.apply_receipts(&room.ephemeral).await;
        for event in &room.account_data {
            if event.event_type == "m.fully_read" {
                change |= engines.read_marker.apply_fully_read_event(event).await;
            } else {
                r.write().await.account_data.insert(event.event_type.clone(), event.content.clone());
            }
        }
        change |= engines.read_marker.apply_highlight_count(room.unread_notifications.highlight_count).await;
        change |= Self::apply_summary(&r, room.summary).await;

        self.notify(room_id, change);
    }

    async fn handle_invited_room(&self, room_id: &OwnedRoomId, room: InvitedRoom) {
        let _guard = self.sync_guard.lock().await;

        let r = self.store.get_or_create_room(room_id).await;
        r.set_join_state(JoinState::Invite).await;
        let engines = self.engines_for(r).await;

        let mut change = Change::empty();
        if !room.invite_state.is_empty() {
            change |= engines.timeline.ingest_forward(room.invite_state).await;
        }
        self.notify(room_id, change);
    }

    async fn handle_left_room(&self, room_id: &OwnedRoomId, room: LeftRoom) {
        let _guard = self.sync_guard.lock().await;

        let r = self.store.get_or_create_room(room_id).await;
        r.set_join_state(JoinState::Leave).await;
        let engines = self.engines_for(r.clone()).await;

        let mut change = Change::empty();
        if !room.state.is_empty() {
            change |= engines.timeline.ingest_forward(room.state).await;
        }
        if !room.timeline.events.is_empty() {
            let events = self.decrypt_timeline_batch(room.timeline.events);
            change |= engines.timeline.ingest_forward(events).await;
        }
        change |= Self::apply_summary(&r, room.summary).await;

        self.notify(room_id, change);
    }

    #[cfg(feature = "e2e-encryption")]
    async fn handle_to_device(&self, events: Vec<Event>) {
        // The to-device Olm pairwise session that would have decrypted an
        // `m.room.encrypted` to-device envelope into this `m.room_key` is
        // not one of this runtime's modules (spec §4.7 names room-key
        // ingest, decryption, signing, and verification, not to-device
        // session establishment) — the embedder is expected to have
        // decrypted the envelope and surfaced the sender's curve25519 key
        // as `content.sender_key` before handing the event here.
        for event in &events {
            if event.event_type != "m.room_key" {
                continue;
            }
            let Some(sender_key) = event.content.get("sender_key").and_then(|v| v.as_str()) else {
                warn!("m.room_key event missing sender_key, dropping");
                continue;
            };
            let Ok(sender_key) = Curve25519PublicKey::from_base64(sender_key) else {
                warn!("m.room_key event carries a malformed sender_key, dropping");
                continue;
            };
            if let Err(err) = self.keys.ingest_room_key(sender_key, event) {
                warn!(error = %err, "failed to ingest room key");
            }
        }
    }

    #[cfg(not(feature = "e2e-encryption"))]
    async fn handle_to_device(&self, _events: Vec<Event>) {}

    async fn handle_device_lists(&self, _device_lists: DeviceLists) {}
}

/// A handle onto one room's engines plus the client that owns them (spec
/// §4.4, §4.5, §4.6, §8 scenario 6).
pub struct RoomHandle {
    client: Arc<Client>,
    engines: Arc<RoomEngines>,
}

impl RoomHandle {
    pub fn room(&self) -> &Arc<Room> {
        &self.engines.room
    }

    /// `postMessage(body, msgtype)` (spec §4.4).
    pub async fn post_message(&self, body: &str, msgtype: &str) -> Result<OwnedTransactionId> {
        let _guard = self.client.sync_guard.lock().await;
        self.engines
            .send
            .submit("m.room.message", json!({"msgtype": msgtype, "body": body}))
            .await
    }

    /// `postReaction(target, key)` (spec §4.4): an `m.reaction` annotation
    /// relation.
    pub async fn post_reaction(&self, target: &OwnedEventId, key: &str) -> Result<OwnedTransactionId> {
        let _guard = self.client.sync_guard.lock().await;
        self.engines
            .send
            .submit(
                "m.reaction",
                json!({
                    "m.relates_to": {
                        "rel_type": "m.annotation",
                        "event_id": target.to_string(),
                        "key": key,
                    }
                }),
            )
            .await
    }

    /// `postFile(localPath, msgtype, contentType?)` (spec §4.4 "For file
    /// messages"): a pending event is appended up front with a local-file
    /// url and `Submitted` status, a parallel upload is started, and only
    /// once it completes is the `mxc://` url substituted in and the send
    /// request actually issued. A failed or cancelled upload discards the
    /// pending event rather than sending a broken reference.
    #[instrument(skip(self, local_path))]
    pub async fn post_file(
        &self,
        transfers: &FileTransferManager,
        local_path: PathBuf,
        msgtype: &str,
        content_type: Option<String>,
    ) -> Result<OwnedTransactionId> {
        let _guard = self.client.sync_guard.lock().await;
        let transaction_id = new_transaction_id();
        let body = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_owned();
        let local_url = format!("file://{}", local_path.display());

        let event = Event::from_json(json!({
            "type": "m.room.message",
            "sender": self.client.local_user.to_string(),
            "room_id": self.engines.room.room_id().to_string(),
            "content": {"msgtype": msgtype, "body": body, "url": local_url},
            "unsigned": {"transaction_id": transaction_id.to_string()},
        }))
        .expect("locally constructed events always carry a type");

        self.engines.room.write().await.pending.push(PendingEvent {
            event: Arc::new(event),
            transaction_id: transaction_id.clone(),
            delivery_status: DeliveryStatus::Submitted,
            last_updated: MilliSecondsSinceUnixEpoch::now(),
            annotation: None,
        });

        let upload = transfers
            .upload(
                self.engines.room.room_id().clone(),
                transaction_id.to_string(),
                local_path,
                content_type,
            )
            .await;

        let mxc = match upload {
            Ok(mxc) => mxc,
            Err(err) => {
                self.engines.send.discard(&transaction_id).await;
                return Err(err);
            }
        };

        {
            let mut state = self.engines.room.write().await;
            if let Some(pending) =
                state.pending.iter_mut().find(|p| p.transaction_id == transaction_id)
            {
                let mut content = pending.event.content.clone();
                if let Value::Object(map) = &mut content {
                    map.insert("url".to_owned(), Value::String(mxc.to_string()));
                }
                let mut event = (*pending.event).clone();
                event.content = content;
                pending.event = Arc::new(event);
                pending.delivery_status = DeliveryStatus::FileUploaded;
            }
        }

        self.engines.send.dispatch_existing(&transaction_id).await?;
        Ok(transaction_id)
    }

    /// `markMessagesAsRead(eventId)` (spec §4.5).
    pub async fn mark_messages_as_read(&self, event_id: OwnedEventId) -> Change {
        let _guard = self.client.sync_guard.lock().await;
        self.engines.read_marker.mark_messages_as_read(event_id).await
    }

    /// `retry(transactionId)` (spec §4.4).
    pub async fn retry(&self, transaction_id: &OwnedTransactionId) -> Result<()> {
        let _guard = self.client.sync_guard.lock().await;
        self.engines.send.retry(transaction_id).await
    }

    /// `discard(transactionId)` (spec §4.4).
    pub async fn discard(&self, transaction_id: &OwnedTransactionId) {
        let _guard = self.client.sync_guard.lock().await;
        self.engines.send.discard(transaction_id).await
    }

    /// `download(eventId, localPath?)` (spec §4.6).
    pub async fn download(
        &self,
        transfers: &FileTransferManager,
        event_id: OwnedEventId,
        local_path: Option<PathBuf>,
    ) -> Result<PathBuf> {
        transfers.download(&self.engines.room, event_id, local_path).await
    }

    /// `switchVersion(newVersion)` (spec §8 scenario 6): refuses with
    /// [`Error::RoomUpgraded`] — without making any HTTP request — if this
    /// room has already been tombstoned; otherwise issues the upgrade and
    /// records the successor so later sends are refused too.
    pub async fn switch_version(&self, new_version: &str) -> Result<OwnedRoomId> {
        let _guard = self.client.sync_guard.lock().await;
        if let Some(successor) = self.engines.room.read().await.successor_room_id.clone() {
            return Err(Error::RoomUpgraded {
                room_id: self.engines.room.room_id().clone(),
                successor_room_id: successor,
            });
        }

        let successor = self.client.api.upgrade_room(self.engines.room.room_id(), new_version).await?;
        self.engines.room.write().await.successor_room_id = Some(successor.clone());
        Ok(successor)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use matrix_sdk_base::{
        events::Event,
        room::RoomSummary,
        sync::{SyncResponse, Timeline, UnreadNotificationsCount},
    };
    use matrix_sdk_common::identifiers::{MxcUri, OwnedEventId, OwnedRoomId, OwnedTransactionId, RoomId, UserId};
    use serde_json::{json, Value};
    use url::Url;

    use super::Client;
    use crate::{
        config::ClientConfig,
        error::Error,
        http::{HomeserverApi, HttpError, Paginated},
        sync_orchestrator::SyncSink,
    };

    struct FakeApi {
        upgrade_calls: AtomicUsize,
    }

    #[async_trait]
    impl HomeserverApi for FakeApi {
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
        async fn sync(&self, _: Option<&str>, _: u64) -> Result<SyncResponse, HttpError> {
            unimplemented!()
        }
        async fn upgrade_room(&self, _room_id: &OwnedRoomId, _new_version: &str) -> Result<OwnedRoomId, HttpError> {
            self.upgrade_calls.fetch_add(1, Ordering::SeqCst);
            Ok(RoomId::parse("!successor:example.org").unwrap().to_owned())
        }
    }

    fn test_client(api: std::sync::Arc<FakeApi>) -> std::sync::Arc<Client> {
        let config = ClientConfig::new(Url::parse("https://example.org").unwrap(), "test".to_owned());
        let local_user = UserId::parse("@me:example.org").unwrap().to_owned();
        Client::new(config, api, local_user)
    }

    #[tokio::test]
    async fn switch_version_refuses_a_second_upgrade_without_re_calling_the_api() {
        let api = std::sync::Arc::new(FakeApi { upgrade_calls: AtomicUsize::new(0) });
        let client = test_client(api.clone());
        let room_id = RoomId::parse("!a:example.org").unwrap().to_owned();
        let room = client.room(&room_id).await;

        let successor = room.switch_version("9").await.unwrap();
        assert_eq!(api.upgrade_calls.load(Ordering::SeqCst), 1);

        let err = room.switch_version("9").await.unwrap_err();
        assert_eq!(api.upgrade_calls.load(Ordering::SeqCst), 1, "a tombstoned room must not re-call upgrade_room");
        match err {
            Error::RoomUpgraded { successor_room_id, .. } => assert_eq!(successor_room_id, successor),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn handle_joined_room_applies_every_dispatch_section() {
        let api = std::sync::Arc::new(FakeApi { upgrade_calls: AtomicUsize::new(0) });
        let client = test_client(api);
        let room_id = RoomId::parse("!a:example.org").unwrap().to_owned();
        let local_user = client.local_user().clone();

        let create_event = Event::from_json(json!({
            "type": "m.room.create",
            "state_key": "",
            "event_id": "$create",
            "sender": local_user.to_string(),
            "content": {"creator": local_user.to_string()},
        }))
        .unwrap();

        let message_event = Event::from_json(json!({
            "type": "m.room.message",
            "event_id": "$msg",
            "sender": "@other:example.org",
            "content": {"msgtype": "m.text", "body": "hi"},
        }))
        .unwrap();

        let receipt_event = Event::from_json(json!({
            "type": "m.receipt",
            "content": {
                "$msg": {"m.read": {"@me:example.org": {"ts": 42}}}
            },
        }))
        .unwrap();

        let fully_read_event = Event::from_json(json!({
            "type": "m.fully_read",
            "content": {"event_id": "$msg"},
        }))
        .unwrap();

        let joined = matrix_sdk_base::sync::JoinedRoom {
            state: vec![create_event],
            timeline: Timeline { limited: false, prev_batch: None, events: vec![message_event] },
            ephemeral: vec![receipt_event],
            account_data: vec![fully_read_event],
            unread_notifications: UnreadNotificationsCount { highlight_count: 3, notification_count: 3 },
            summary: RoomSummary { heroes: vec![], joined_count: 5, invited_count: 1 },
        };

        client.handle_joined_room(&room_id, joined).await;

        let room = client.room(&room_id).await;
        let state = room.room().read().await;
        assert!(state.current_state.contains_key(&("m.room.create".to_owned(), String::new())));
        // The state batch and the timeline batch are each ingested via
        // `ingest_forward`, so both the state event and the message event
        // land in the timeline (spec §4.3.1 applies to every room event).
        assert_eq!(state.timeline.len(), 2);
        assert_eq!(state.fully_read_event_id, Some("$msg".into()));
        assert_eq!(state.unread_stats.highlight_count, 3);
        assert_eq!(state.summary.joined_count, 5);
        assert_eq!(state.summary.invited_count, 1);
    }
}
