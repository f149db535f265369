//! AEAD envelope: AES-256-GCM with a 96-bit random IV per message
//! and a 128-bit tag. On-disk encoding is `base64(IV‖ciphertext‖tag)`.

use crate::vault::error::CryptoError;
use crate::vault::primitives;
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Serialize, de::DeserializeOwned};

const NONCE_LEN: usize = 12;

/// Encrypts `plaintext` under `key` (must be exactly 32 bytes) with optional
/// associated data, returning the base64-encoded `IV‖ciphertext‖tag` payload.
pub fn encrypt(plaintext: &[u8], key: &[u8], aad: &[u8]) -> Result<String, CryptoError> {
    let cipher = cipher_for(key)?;

    let mut iv = [0u8; NONCE_LEN];
    primitives::fill_random(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    let ciphertext = cipher
        .encrypt(
            nonce,
            aes_gcm::aead::Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Tampered)?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&iv);
    combined.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(combined))
}

/// Decrypts a payload produced by [`encrypt`]. Any authentication failure —
/// wrong key, tampered ciphertext, tampered AAD — collapses to a single
/// `Tampered` error; there is no way to distinguish the cause from the
/// outside, by design.
pub fn decrypt(payload: &str, key: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let combined = BASE64
        .decode(payload)
        .map_err(|_| CryptoError::Tampered)?;
    if combined.len() < NONCE_LEN {
        return Err(CryptoError::Tampered);
    }
    let (iv, ciphertext) = combined.split_at(NONCE_LEN);

    let cipher = cipher_for(key)?;
    let nonce = Nonce::from_slice(iv);

    cipher
        .decrypt(
            nonce,
            aes_gcm::aead::Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Tampered)
}

/// Canonicalizes `value` to JSON, then encrypts it.
pub fn encrypt_object<T: Serialize>(value: &T, key: &[u8], aad: &[u8]) -> Result<String, CryptoError> {
    let json = serde_json::to_vec(value).map_err(|_| CryptoError::Tampered)?;
    encrypt(&json, key, aad)
}

/// Decrypts a payload produced by [`encrypt_object`] and parses it back from JSON.
pub fn decrypt_object<T: DeserializeOwned>(
    payload: &str,
    key: &[u8],
    aad: &[u8],
) -> Result<T, CryptoError> {
    let plaintext = decrypt(payload, key, aad)?;
    serde_json::from_slice(&plaintext).map_err(|_| CryptoError::Tampered)
}

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm, CryptoError> {
    if key.len() != 32 {
        return Err(CryptoError::KdfFail("AEAD key must be 32 bytes".into()));
    }
    Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn key() -> [u8; 32] {
        [0x42u8; 32]
    }

    #[test]
    fn round_trips() {
        let k = key();
        let ct = encrypt(b"hello vault", &k, b"entry-id").unwrap();
        let pt = decrypt(&ct, &k, b"entry-id").unwrap();
        assert_eq!(pt, b"hello vault");
    }

    #[test]
    fn wrong_key_fails() {
        let ct = encrypt(b"hello vault", &key(), b"entry-id").unwrap();
        let other = [0x99u8; 32];
        assert!(matches!(
            decrypt(&ct, &other, b"entry-id"),
            Err(CryptoError::Tampered)
        ));
    }

    #[test]
    fn wrong_aad_fails() {
        let k = key();
        let ct = encrypt(b"hello vault", &k, b"entry-id").unwrap();
        assert!(matches!(
            decrypt(&ct, &k, b"other-id"),
            Err(CryptoError::Tampered)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let k = key();
        let ct = encrypt(b"hello vault", &k, b"entry-id").unwrap();
        let mut bytes = BASE64.decode(&ct).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = BASE64.encode(bytes);
        assert!(matches!(
            decrypt(&tampered, &k, b"entry-id"),
            Err(CryptoError::Tampered)
        ));
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Record {
        title: String,
        count: u32,
    }

    #[test]
    fn object_round_trips() {
        let k = key();
        let value = Record {
            title: "GitHub".into(),
            count: 3,
        };
        let ct = encrypt_object(&value, &k, b"id").unwrap();
        let back: Record = decrypt_object(&ct, &k, b"id").unwrap();
        assert_eq!(value, back);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // Property 1 (§8): decrypt(encrypt(m, k, aad), k, aad) == m for all (k, aad, m).
        #[test]
        fn round_trips_for_arbitrary_plaintext_key_aad(
            key in proptest::collection::vec(any::<u8>(), 32),
            aad in proptest::collection::vec(any::<u8>(), 0..64),
            msg in proptest::collection::vec(any::<u8>(), 0..4096),
        ) {
            let ct = encrypt(&msg, &key, &aad).unwrap();
            let pt = decrypt(&ct, &key, &aad).unwrap();
            prop_assert_eq!(pt, msg);
        }

        // Tampering any byte of the base64-decoded envelope yields `Tampered`.
        #[test]
        fn tampering_envelope_byte_is_rejected(
            key in proptest::collection::vec(any::<u8>(), 32),
            msg in proptest::collection::vec(any::<u8>(), 1..256),
            flip_idx in 0usize..256,
        ) {
            let ct = encrypt(&msg, &key, b"aad").unwrap();
            let mut raw = BASE64.decode(&ct).unwrap();
            let idx = flip_idx % raw.len();
            raw[idx] ^= 0x01;
            let tampered = BASE64.encode(raw);
            prop_assert!(matches!(decrypt(&tampered, &key, b"aad"), Err(CryptoError::Tampered)));
        }

        // Tampering any byte of the AAD yields `Tampered`.
        #[test]
        fn tampering_aad_is_rejected(
            key in proptest::collection::vec(any::<u8>(), 32),
            msg in proptest::collection::vec(any::<u8>(), 1..256),
            aad in proptest::collection::vec(any::<u8>(), 1..32),
        ) {
            let ct = encrypt(&msg, &key, &aad).unwrap();
            let mut bad_aad = aad.clone();
            bad_aad[0] ^= 0x01;
            prop_assert!(matches!(decrypt(&ct, &key, &bad_aad), Err(CryptoError::Tampered)));
        }
    }
}
