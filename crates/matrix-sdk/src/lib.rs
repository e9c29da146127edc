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

//! The networked client: the `Client`/`Room` facade, the send pipeline with
//! local echo, the file transfer manager and encrypted-attachment envelope,
//! and the sync orchestrator, built on `matrix-sdk-base`'s room state store
//! and `matrix-sdk-ui`'s timeline and read-marker engines (spec §1).
//!
//! HTTP transport is an explicit external collaborator: embedders provide a
//! [`http::HomeserverApi`] implementation.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
#[cfg(feature = "e2e-encryption")]
pub mod keys;
pub mod send;
pub mod sync_orchestrator;
pub mod transfer;

pub use client::{Client, RoomHandle};
pub use config::{BackoffConfig, ClientConfig};
pub use error::{Error, Result};
pub use http::{HomeserverApi, HttpError, Paginated};
#[cfg(feature = "e2e-encryption")]
pub use keys::KeyStore;
pub use send::SendPipeline;
pub use sync_orchestrator::{SyncOrchestrator, SyncSink};
pub use transfer::{FileMetadataMap, FileTransfer, FileTransferManager, TransferDirection, TransferStatus};
