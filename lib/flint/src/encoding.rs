/// Serde adapters for base64-encoded binary fields in configuration files.
pub mod base64 {
    pub use base64::{decode, encode};

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]> + ?Sized,
        S: Serializer,
    {
        serializer.serialize_str(&encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        decode(&encoded).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde_derive::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Blob {
        #[serde(with = "super::base64")]
        data: Vec<u8>,
    }

    #[test]
    fn test_roundtrip() {
        let blob = Blob {
            data: vec![1, 2, 3, 255],
        };

        let json = serde_json::to_string(&blob).unwrap();
        let parsed: Blob = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.data, blob.data);
    }

    #[test]
    fn test_rejects_invalid() {
        let result = serde_json::from_str::<Blob>(r#"{"data": "!!not-base64!!"}"#);

        assert!(result.is_err());
    }
}
