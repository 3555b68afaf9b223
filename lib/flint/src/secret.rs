use crate::encoding::base64;
use serde::{de, Deserialize as _, Deserializer};
use serde_derive::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

const SECRET_KEY_SIZE: usize = 32;

/// Symmetric key material shared between cluster instances. Stored
/// base64-encoded in configuration files.
#[derive(Serialize, Deserialize, Clone)]
pub struct SecretKey(
    #[serde(
        serialize_with = "base64::serialize",
        deserialize_with = "deserialize_b64_key"
    )]
    [u8; SECRET_KEY_SIZE],
);

#[inline]
fn deserialize_b64_key<'de, D>(deserializer: D) -> Result<[u8; SECRET_KEY_SIZE], D::Error>
where
    D: Deserializer<'de>,
{
    let encoded = String::deserialize(deserializer)?;
    let decoded_raw = base64::decode(&encoded).map_err(de::Error::custom)?;

    if decoded_raw.len() != SECRET_KEY_SIZE {
        return Err(de::Error::custom(format!(
            "secret key must decode to {} bytes, got {}",
            SECRET_KEY_SIZE,
            decoded_raw.len()
        )));
    }

    let mut decoded = [0u8; SECRET_KEY_SIZE];
    decoded.copy_from_slice(&decoded_raw);

    Ok(decoded)
}

impl SecretKey {
    pub const SIZE: usize = SECRET_KEY_SIZE;

    #[inline]
    pub fn new(key: [u8; Self::SIZE]) -> SecretKey {
        SecretKey(key)
    }

    /// Generates a fresh random key.
    #[inline]
    pub fn random() -> SecretKey {
        let mut key = [0u8; Self::SIZE];
        crate::crypto::random_bytes(&mut key);
        SecretKey(key)
    }
}

impl Deref for SecretKey {
    type Target = [u8; SecretKey::SIZE];

    #[inline]
    fn deref(&self) -> &[u8; SecretKey::SIZE] {
        &self.0
    }
}

impl DerefMut for SecretKey {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8; SecretKey::SIZE] {
        &mut self.0
    }
}
