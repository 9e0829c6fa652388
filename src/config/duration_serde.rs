//! Durations in configuration files.
//!
//! Accepted forms are whole seconds (`shutdown_timeout = 3`) or a humantime
//! string (`shutdown_timeout = "1m 30s"`). Values are written back as
//! humantime strings.

use serde::{Deserialize, Deserializer, Serializer, de};
use std::time::Duration;

#[derive(Deserialize)]
#[serde(untagged)]
enum ConfiguredDuration {
    Seconds(u64),
    Text(String),
}

impl ConfiguredDuration {
    fn into_duration<E: de::Error>(self) -> Result<Duration, E> {
        match self {
            ConfiguredDuration::Seconds(seconds) => Ok(Duration::from_secs(seconds)),
            ConfiguredDuration::Text(text) => humantime::parse_duration(text.trim())
                .map_err(|e| E::custom(format!("invalid duration '{text}': {e}"))),
        }
    }
}

/// `#[serde(with = "duration_serde::duration")]` adapter for [`Duration`] fields
pub mod duration {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        ConfiguredDuration::deserialize(deserializer)?.into_duration()
    }
}
