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

//! The error kinds of spec §7, composed into one `thiserror`-derived enum
//! at the `matrix-sdk` crate boundary (`SPEC_FULL` §7 addition), mirroring
//! the teacher's `StoreError`/`CryptoStoreError` layering.

use matrix_sdk_base::StoreError;
use matrix_sdk_common::identifiers::OwnedRoomId;
use thiserror::Error;

use crate::http::HttpError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[cfg(feature = "e2e-encryption")]
    #[error("encryption error: {0}")]
    Crypto(String),

    /// Spec §7 `VersionObsolete`: the room has been tombstoned and
    /// upgraded; sends are refused pointing at the successor.
    #[error("room {room_id} was upgraded to {successor_room_id}")]
    RoomUpgraded { room_id: OwnedRoomId, successor_room_id: OwnedRoomId },

    #[error("no such room: {0}")]
    UnknownRoom(OwnedRoomId),

    #[error("mxc url is malformed or does not point at a file: {0}")]
    InvalidAttachment(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
