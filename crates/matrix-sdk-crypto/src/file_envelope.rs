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

//! The encrypted-attachment envelope (spec §4.6, §8 scenario 5): AES-CTR-256
//! under a random 256-bit key and 128-bit IV, with the ciphertext's SHA-256
//! hash stored alongside so decryption can refuse a tampered payload before
//! touching it.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::primitives::aes_ctr_xor;

/// A JSON Web Key in the fixed shape Matrix uses for attachment keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    pub key_ops: Vec<String>,
    pub alg: String,
    pub k: String,
    pub ext: bool,
}

/// `EncryptedFileMetadata` (spec §3): everything needed to decrypt an
/// attachment, once `url` has been filled in from the upload response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedFile {
    pub url: String,
    pub key: Jwk,
    pub iv: String,
    pub hashes: BTreeMap<String, String>,
    pub v: String,
}

#[derive(Debug, Error)]
pub enum FileEnvelopeError {
    #[error("the ciphertext's sha256 hash did not match the envelope's recorded hash")]
    HashMismatch,
    #[error("the envelope's key or iv was not valid base64url")]
    InvalidEncoding,
}

/// Encrypt `plaintext`, returning the ciphertext and an [`EncryptedFile`]
/// envelope with `url` left empty (the caller fills it in once the
/// ciphertext has been uploaded).
pub fn encrypt_file(plaintext: &[u8]) -> (Vec<u8>, EncryptedFile) {
    let mut key = [0u8; 32];
    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut key);
    rand::thread_rng().fill_bytes(&mut iv[..8]); // low 8 bytes stay zero: CTR counter half of the IV

    let mut ciphertext = plaintext.to_vec();
    aes_ctr_xor(&key, &iv, &mut ciphertext);

    let hash = Sha256::digest(&ciphertext);

    let envelope = EncryptedFile {
        url: String::new(),
        key: Jwk {
            kty: "oct".to_owned(),
            key_ops: vec!["encrypt".to_owned(), "decrypt".to_owned()],
            alg: "A256CTR".to_owned(),
            k: URL_SAFE_NO_PAD.encode(key),
            ext: true,
        },
        iv: URL_SAFE_NO_PAD.encode(iv),
        hashes: BTreeMap::from([("sha256".to_owned(), URL_SAFE_NO_PAD.encode(hash))]),
        v: "v2".to_owned(),
    };

    (ciphertext, envelope)
}

/// Decrypt `ciphertext` using `envelope`, verifying the SHA-256 hash first.
pub fn decrypt_file(ciphertext: &[u8], envelope: &EncryptedFile) -> Result<Vec<u8>, FileEnvelopeError> {
    let expected_hash =
        envelope.hashes.get("sha256").ok_or(FileEnvelopeError::InvalidEncoding)?;
    let expected_hash =
        URL_SAFE_NO_PAD.decode(expected_hash).map_err(|_| FileEnvelopeError::InvalidEncoding)?;

    let actual_hash = Sha256::digest(ciphertext);
    if actual_hash.as_slice() != expected_hash.as_slice() {
        return Err(FileEnvelopeError::HashMismatch);
    }

    let key_bytes =
        URL_SAFE_NO_PAD.decode(&envelope.key.k).map_err(|_| FileEnvelopeError::InvalidEncoding)?;
    let iv_bytes = URL_SAFE_NO_PAD.decode(&envelope.iv).map_err(|_| FileEnvelopeError::InvalidEncoding)?;

    let key: [u8; 32] =
        key_bytes.try_into().map_err(|_| FileEnvelopeError::InvalidEncoding)?;
    let iv: [u8; 16] = iv_bytes.try_into().map_err(|_| FileEnvelopeError::InvalidEncoding)?;

    let mut plaintext = ciphertext.to_vec();
    aes_ctr_xor(&key, &iv, &mut plaintext);
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::{decrypt_file, encrypt_file, EncryptedFile};

    #[test]
    fn encrypted_file_round_trips() {
        let plaintext: Vec<u8> = (0u8..=255).collect();
        let (ciphertext, envelope) = encrypt_file(&plaintext);

        assert_eq!(envelope.v, "v2");
        assert_eq!(envelope.key.alg, "A256CTR");

        let decrypted = decrypt_file(&ciphertext, &envelope).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let (mut ciphertext, envelope) = encrypt_file(b"hello world");
        ciphertext[0] ^= 0xff;
        assert!(decrypt_file(&ciphertext, &envelope).is_err());
    }

    #[test]
    fn tampered_hash_is_rejected() {
        let (ciphertext, mut envelope) = encrypt_file(b"hello world");
        envelope.hashes.insert("sha256".to_owned(), "AAAA".to_owned());
        let err = decrypt_file(&ciphertext, &envelope);
        assert!(matches!(err, Err(super::FileEnvelopeError::HashMismatch) | Err(super::FileEnvelopeError::InvalidEncoding)));
    }
}
