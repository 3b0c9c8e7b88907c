//! Serialize byte strings as hex in JSON.

use commonware_utils::{from_hex_formatted, hex};
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&hex(bytes))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    from_hex_formatted(&s).ok_or_else(|| serde::de::Error::custom("expected a hex string"))
}
