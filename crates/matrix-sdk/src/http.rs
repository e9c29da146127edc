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

//! The contract this runtime needs from the Matrix wire protocol (spec §6).
//!
//! HTTP transport and JSON (de)serialization are an explicit external
//! collaborator (spec §1): this crate never constructs a request itself. An
//! embedder supplies a [`HomeserverApi`] implementation (typically built on
//! `reqwest` plus the generated CS-API wrappers) and the send pipeline,
//! sync orchestrator, and file transfer manager drive it.

use std::collections::BTreeMap;

use async_trait::async_trait;
use matrix_sdk_base::{events::Event, sync::SyncResponse};
use matrix_sdk_common::identifiers::{MxcUri, OwnedEventId, OwnedRoomId, OwnedTransactionId};
use serde_json::Value;
use thiserror::Error;

/// Transport-level failure. The send pipeline and sync orchestrator only
/// ever need to distinguish "try again" from "stop and surface to the
/// embedder" (spec §7, §8 scenario 6).
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("network error: {0}")]
    Network(String),
    /// `M_UNKNOWN_TOKEN` / `401` — fatal, terminates the sync loop (spec
    /// §4.8 "Failure").
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// Any other non-2xx response, carrying the server's `errcode`/`error`.
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
}

pub struct Paginated {
    pub chunk: Vec<Event>,
    pub start: String,
    pub end: Option<String>,
}

/// The subset of the Matrix client-server API this runtime's core depends
/// on (spec §6). One method per endpoint listed there.
#[async_trait]
pub trait HomeserverApi: Send + Sync {
    /// `PUT /rooms/{roomId}/send/{eventType}/{txnId}`.
    async fn send_event(
        &self,
        room_id: &OwnedRoomId,
        event_type: &str,
        transaction_id: &OwnedTransactionId,
        content: Value,
    ) -> Result<OwnedEventId, HttpError>;

    /// `PUT /rooms/{roomId}/state/{eventType}/{stateKey}`.
    async fn send_state(
        &self,
        room_id: &OwnedRoomId,
        event_type: &str,
        state_key: &str,
        content: Value,
    ) -> Result<OwnedEventId, HttpError>;

    /// `PUT /rooms/{roomId}/redact/{eventId}/{txnId}`.
    async fn redact(
        &self,
        room_id: &OwnedRoomId,
        event_id: &OwnedEventId,
        transaction_id: &OwnedTransactionId,
        reason: Option<String>,
    ) -> Result<OwnedEventId, HttpError>;

    /// `GET /rooms/{roomId}/messages?from&to&dir&limit&filter`.
    async fn paginate(
        &self,
        room_id: &OwnedRoomId,
        from: &str,
        limit: u32,
    ) -> Result<Paginated, HttpError>;

    /// `POST /rooms/{roomId}/receipt/{type}/{eventId}`.
    async fn send_receipt(
        &self,
        room_id: &OwnedRoomId,
        event_id: &OwnedEventId,
        thread_id: Option<String>,
    ) -> Result<(), HttpError>;

    /// `POST /rooms/{roomId}/read_markers`.
    async fn send_read_markers(
        &self,
        room_id: &OwnedRoomId,
        fully_read: &OwnedEventId,
        read_receipt: Option<&OwnedEventId>,
    ) -> Result<(), HttpError>;

    /// `POST /upload` (multipart), returning the resulting `mxc://` url.
    async fn upload(&self, content_type: &str, bytes: Vec<u8>) -> Result<MxcUri, HttpError>;

    /// `GET /download/{server}/{mediaId}`.
    async fn download(&self, mxc: &MxcUri) -> Result<Vec<u8>, HttpError>;

    /// `POST /keys/upload`.
    async fn upload_keys(
        &self,
        device_keys: Option<Value>,
        one_time_keys: BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, u64>, HttpError>;

    /// `POST /keys/query`.
    async fn query_keys(&self, users: Vec<String>) -> Result<Value, HttpError>;

    /// `POST /keys/claim`.
    async fn claim_keys(
        &self,
        one_time_keys: BTreeMap<String, BTreeMap<String, String>>,
    ) -> Result<Value, HttpError>;

    /// `GET /keys/changes?from&to`.
    async fn key_changes(&self, from: &str, to: &str) -> Result<Value, HttpError>;

    /// `GET /sync?since&timeout&filter`.
    async fn sync(&self, since: Option<&str>, timeout_ms: u64) -> Result<SyncResponse, HttpError>;

    /// `POST /rooms/{roomId}/upgrade` body `{new_version}` → `{replacement_room}`
    /// (spec §8 scenario 6 "Room version switch"; not itself part of the
    /// wire-protocol subset enumerated above, but required to implement the
    /// scenario that subset exists to support).
    async fn upgrade_room(&self, room_id: &OwnedRoomId, new_version: &str) -> Result<OwnedRoomId, HttpError>;
}
