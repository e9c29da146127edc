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

//! Olm account pickling, Megolm inbound/outbound session bookkeeping,
//! canonical-JSON signing, and the AES-CTR-256 encrypted-file envelope
//! (spec §4.6, §4.7).

pub mod account;
pub mod file_envelope;
pub mod megolm;
pub mod primitives;
pub mod signing;

pub use account::OlmAccount;
pub use file_envelope::{decrypt_file, encrypt_file, EncryptedFile, Jwk};
pub use megolm::{InboundGroupSession, MegolmError, OutboundGroupSession};
pub use signing::{sign_json, verify_json_signature, SignatureError};
