/// Base64 helpers shared by the wire codec (media chunks) and serde fields
/// holding raw key material.
pub mod base64 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub use base64::DecodeError;

    #[inline]
    pub fn encode(data: &[u8]) -> String {
        ::base64::encode(data)
    }

    #[inline]
    pub fn decode(data: &str) -> Result<Vec<u8>, DecodeError> {
        ::base64::decode(data)
    }

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <&str>::deserialize(deserializer)?;
        decode(s).map_err(de::Error::custom)
    }
}
