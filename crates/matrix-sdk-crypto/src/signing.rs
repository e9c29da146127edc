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

//! Signing and verifying JSON objects over their canonical form (spec
//! §4.7): keys sorted, `unsigned` and `signatures` stripped, per the Matrix
//! signing-json algorithm.

use serde_json::Value;
use thiserror::Error;
use vodozemac::{Ed25519PublicKey, Ed25519Signature, SignatureError as VodozemacSignatureError};

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("failed to produce the canonical JSON form: {0}")]
    Canonicalization(#[from] serde_json::Error),
    #[error("signature did not verify")]
    Invalid,
}

/// Strip `unsigned` and `signatures`, then produce the canonical-JSON string
/// that Matrix objects are signed over.
///
/// `serde_json::Value`'s object type is a `BTreeMap` (the `preserve_order`
/// feature is off), so plain `to_string` already yields keys in sorted
/// order, which is all canonical JSON requires beyond compact formatting.
fn canonical_form(value: &Value) -> Result<String, SignatureError> {
    let mut object = value.clone();
    if let Some(map) = object.as_object_mut() {
        map.remove("unsigned");
        map.remove("signatures");
    }
    Ok(serde_json::to_string(&object)?)
}

/// Sign `value`'s canonical form with the account's Ed25519 key.
pub fn sign_json(
    account: &crate::account::OlmAccount,
    value: &Value,
) -> Result<Ed25519Signature, SignatureError> {
    let canonical = canonical_form(value)?;
    Ok(account.sign(&canonical))
}

/// Verify an Ed25519 signature over `value`'s canonical form
/// (`ed25519VerifySignature`, spec §4.7).
pub fn verify_json_signature(
    public_key: &Ed25519PublicKey,
    signature: &Ed25519Signature,
    value: &Value,
) -> Result<(), SignatureError> {
    let canonical = canonical_form(value)?;
    public_key
        .verify(&canonical, signature)
        .map_err(|_: VodozemacSignatureError| SignatureError::Invalid)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{sign_json, verify_json_signature};
    use crate::account::OlmAccount;

    #[test]
    fn a_signed_object_verifies_against_the_same_account() {
        let account = OlmAccount::new();
        let value = json!({"type": "m.room.message", "content": {"body": "hi"}});

        let signature = sign_json(&account, &value).unwrap();
        assert!(verify_json_signature(&account.ed25519_key(), &signature, &value).is_ok());
    }

    #[test]
    fn signature_is_insensitive_to_unsigned_and_signatures_fields() {
        let account = OlmAccount::new();
        let bare = json!({"type": "m.room.message", "content": {"body": "hi"}});
        let with_extra = json!({
            "type": "m.room.message",
            "content": {"body": "hi"},
            "unsigned": {"age": 5},
            "signatures": {"example.org": {"ed25519:1": "xyz"}},
        });

        let signature = sign_json(&account, &bare).unwrap();
        assert!(verify_json_signature(&account.ed25519_key(), &signature, &with_extra).is_ok());
    }
}
