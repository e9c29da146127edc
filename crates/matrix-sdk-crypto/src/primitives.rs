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

//! Cryptographic building blocks used outside the Olm/Megolm ratchets
//! themselves (spec §4.7): HMAC-SHA-256, HKDF-SHA-256, AES-CTR-256, and
//! PBKDF2-HMAC-SHA-512 for passphrase-derived keys.

use aes::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA-256 over `message` under `key`.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Constant-time HMAC-SHA-256 verification.
pub fn verify_hmac_sha256(key: &[u8], message: &[u8], expected: &[u8]) -> bool {
    let computed = hmac_sha256(key, message);
    computed.ct_eq(expected).into()
}

/// Output of [`derive_keys`]: a 32-byte AES key and a 32-byte MAC key.
pub struct DerivedKeys {
    pub aes_key: [u8; 32],
    pub mac_key: [u8; 32],
}

impl Drop for DerivedKeys {
    fn drop(&mut self) {
        self.aes_key.zeroize();
        self.mac_key.zeroize();
    }
}

/// HKDF-SHA-256 expansion of `key_material` into an AES key and a MAC key
/// (spec §4.7, used by the encrypted-file envelope).
pub fn derive_keys(key_material: &[u8], info: &[u8]) -> DerivedKeys {
    let hk = hkdf::Hkdf::<Sha256>::new(None, key_material);
    let mut okm = [0u8; 64];
    hk.expand(info, &mut okm).expect("64 bytes is a valid HKDF-SHA-256 output length");

    let mut aes_key = [0u8; 32];
    let mut mac_key = [0u8; 32];
    aes_key.copy_from_slice(&okm[..32]);
    mac_key.copy_from_slice(&okm[32..]);
    okm.zeroize();

    DerivedKeys { aes_key, mac_key }
}

/// AES-CTR-256 encrypt or decrypt `data` in place under `key`/`iv`. CTR mode
/// is symmetric: the same operation both encrypts and decrypts.
pub fn aes_ctr_xor(key: &[u8; 32], iv: &[u8; 16], data: &mut [u8]) {
    let mut cipher = Aes256Ctr::new(key.into(), iv.into());
    cipher.apply_keystream(data);
}

/// PBKDF2-HMAC-SHA-512, for deriving a key from a user passphrase.
pub fn pbkdf2_hmac_sha512(passphrase: &[u8], salt: &[u8], iterations: u32, output_len: usize) -> Vec<u8> {
    let mut output = vec![0u8; output_len];
    pbkdf2::pbkdf2_hmac::<Sha512>(passphrase, salt, iterations, &mut output);
    output
}

#[cfg(test)]
mod tests {
    use super::{aes_ctr_xor, derive_keys, hmac_sha256, pbkdf2_hmac_sha512, verify_hmac_sha256};

    #[test]
    fn hmac_verifies_against_itself() {
        let key = b"0123456789abcdef0123456789abcdef";
        let mac = hmac_sha256(key, b"hello world");
        assert!(verify_hmac_sha256(key, b"hello world", &mac));
        assert!(!verify_hmac_sha256(key, b"tampered", &mac));
    }

    #[test]
    fn aes_ctr_round_trips() {
        let key = [7u8; 32];
        let iv = [3u8; 16];
        let mut data = b"the quick brown fox".to_vec();
        let plaintext = data.clone();

        aes_ctr_xor(&key, &iv, &mut data);
        assert_ne!(data, plaintext);

        aes_ctr_xor(&key, &iv, &mut data);
        assert_eq!(data, plaintext);
    }

    #[test]
    fn derive_keys_is_deterministic() {
        let a = derive_keys(b"seed material", b"context");
        let b = derive_keys(b"seed material", b"context");
        assert_eq!(a.aes_key, b.aes_key);
        assert_eq!(a.mac_key, b.mac_key);
    }

    #[test]
    fn pbkdf2_produces_the_requested_length() {
        let derived = pbkdf2_hmac_sha512(b"passphrase", b"salt", 10, 32);
        assert_eq!(derived.len(), 32);
    }
}
