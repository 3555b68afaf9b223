use serde_json::Value;

use crate::errors::{LinkError, LinkResult};

/// Application payload codec. The link layer treats payloads as structured
/// values; a codec turns them into bytes for the wire and back.
pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;
    fn marshal(&self, value: &Value) -> LinkResult<Vec<u8>>;
    fn unmarshal(&self, data: &[u8]) -> LinkResult<Value>;
}

pub struct JsonCodec;

impl Codec for JsonCodec {
    #[inline]
    fn name(&self) -> &'static str {
        "json"
    }

    fn marshal(&self, value: &Value) -> LinkResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|_| LinkError::InvalidMessage)
    }

    fn unmarshal(&self, data: &[u8]) -> LinkResult<Value> {
        serde_json::from_slice(data).map_err(|_| LinkError::InvalidMessage)
    }
}

/// Optional payload encryption applied after encoding.
pub trait Encryptor: Send + Sync {
    fn encrypt(&self, data: &[u8]) -> LinkResult<Vec<u8>>;
    fn decrypt(&self, data: &[u8]) -> LinkResult<Vec<u8>>;
}

/// AEAD encryptor over `flint::crypto`. A fresh random nonce is generated per
/// message and prepended to the cipher text.
pub struct SodiumEncryptor {
    key: [u8; flint::crypto::KEY_SIZE],
}

impl SodiumEncryptor {
    #[inline]
    pub fn new(key: [u8; flint::crypto::KEY_SIZE]) -> SodiumEncryptor {
        SodiumEncryptor { key }
    }
}

impl Encryptor for SodiumEncryptor {
    fn encrypt(&self, data: &[u8]) -> LinkResult<Vec<u8>> {
        let mut nonce = [0u8; flint::crypto::NONCE_SIZE];
        flint::crypto::random_bytes(&mut nonce);

        let cipher = flint::crypto::seal(data, &[], &nonce, &self.key);

        let mut out = Vec::with_capacity(nonce.len() + cipher.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&cipher);

        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> LinkResult<Vec<u8>> {
        if data.len() < flint::crypto::NONCE_SIZE {
            return Err(LinkError::InvalidMessage);
        }

        let mut nonce = [0u8; flint::crypto::NONCE_SIZE];
        nonce.copy_from_slice(&data[..flint::crypto::NONCE_SIZE]);

        flint::crypto::open(&data[flint::crypto::NONCE_SIZE..], &[], &nonce, &self.key)
            .ok_or(LinkError::InvalidMessage)
    }
}
