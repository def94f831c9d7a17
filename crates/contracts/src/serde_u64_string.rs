//! Serialises a `u64` as a decimal string so seeds survive JSON clients that
//! only have 53-bit integers; accepts either form when reading.

use serde::de::Error;
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(value)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text
            .trim()
            .parse::<u64>()
            .map_err(|err| D::Error::custom(format!("invalid u64 string {text:?}: {err}"))),
        Raw::Number(value) => Ok(value),
    }
}
