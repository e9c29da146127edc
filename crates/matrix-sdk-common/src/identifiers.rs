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

//! Re-exports of the Matrix identifier newtypes used throughout the runtime,
//! plus the `mxc://` content-uri helpers that the wire protocol (spec §6)
//! and the file transfer manager depend on.

pub use ruma_common::{
    EventId, OwnedEventId, OwnedRoomId, OwnedTransactionId, OwnedUserId, RoomId, TransactionId,
    UserId,
};

use thiserror::Error;

/// An opaque, connection-unique transaction id.
///
/// The engine never reuses an id once assigned (spec §6, "Transaction IDs").
pub fn new_transaction_id() -> OwnedTransactionId {
    uuid::Uuid::new_v4().to_string().into()
}

/// A parsed `mxc://{authority}/{mediaId}` URL.
///
/// Format per spec §6: `(authority + path)` contains exactly one `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MxcUri {
    authority: String,
    media_id: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid mxc:// URL: {0}")]
pub struct InvalidMxcUri(String);

impl MxcUri {
    /// Parse a `mxc://` URL, rejecting anything that isn't exactly
    /// `mxc://authority/media_id`.
    pub fn parse(s: &str) -> Result<Self, InvalidMxcUri> {
        let Some(rest) = s.strip_prefix("mxc://") else {
            return Err(InvalidMxcUri(s.to_owned()));
        };

        let mut parts = rest.splitn(2, '/');
        let authority = parts.next().filter(|a| !a.is_empty());
        let media_id = parts.next().filter(|m| !m.is_empty() && !m.contains('/'));

        match (authority, media_id) {
            (Some(authority), Some(media_id)) => {
                Ok(Self { authority: authority.to_owned(), media_id: media_id.to_owned() })
            }
            _ => Err(InvalidMxcUri(s.to_owned())),
        }
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn media_id(&self) -> &str {
        &self.media_id
    }
}

impl std::fmt::Display for MxcUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mxc://{}/{}", self.authority, self.media_id)
    }
}

#[cfg(test)]
mod tests {
    use super::MxcUri;

    #[test]
    fn valid_mxc_uri_round_trips() {
        let mxc = MxcUri::parse("mxc://matrix.org/abcdefg12345").unwrap();
        assert_eq!(mxc.authority(), "matrix.org");
        assert_eq!(mxc.media_id(), "abcdefg12345");
        assert_eq!(mxc.to_string(), "mxc://matrix.org/abcdefg12345");
    }

    #[test]
    fn rejects_malformed_uris() {
        assert!(MxcUri::parse("https://matrix.org/abc").is_err());
        assert!(MxcUri::parse("mxc://matrix.org/").is_err());
        assert!(MxcUri::parse("mxc://matrix.org").is_err());
        assert!(MxcUri::parse("mxc://matrix.org/a/b").is_err());
        assert!(MxcUri::parse("mxc:///abc").is_err());
    }
}
