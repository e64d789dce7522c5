// Shared data types and small helpers used across crates.
use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid id: {0}")]
    InvalidId(String),
}

pub mod ids {
    // Strongly typed IDs so channel and event identifiers never mix.
    use super::{Error, Result};
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use std::str::FromStr;
    use uuid::Uuid;

    macro_rules! id_type {
        ($name:ident) => {
            #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
            pub struct $name(Uuid);

            impl $name {
                // Server-assigned ids are random v4 UUIDs.
                pub fn new() -> Self {
                    Self(Uuid::new_v4())
                }
            }

            impl Default for $name {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl FromStr for $name {
                type Err = Error;

                fn from_str(input: &str) -> Result<Self> {
                    // Preserve the original input for clearer error messages.
                    let uuid =
                        Uuid::parse_str(input).map_err(|_| Error::InvalidId(input.into()))?;
                    Ok(Self(uuid))
                }
            }
        };
    }

    id_type!(ChannelId);
    id_type!(EventId);
}

pub mod clock {
    use std::time::{SystemTime, UNIX_EPOCH};

    /// Milliseconds since the Unix epoch according to the wall clock.
    ///
    /// Schedule rules carry absolute epoch timestamps, so timers compare against
    /// this value rather than a monotonic instant. A clock set before 1970
    /// reads as zero.
    pub fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Flush thresholds attached to a channel.
///
/// ```
/// use kairo_common::BufferOptions;
///
/// let options = BufferOptions::new(1000, 10);
/// assert_eq!(options.time, 1000);
/// assert_eq!(options.size, 10);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferOptions {
    /// Max milliseconds an event may sit in the buffer before it counts as flushed.
    pub time: u64,
    /// Max buffered events before a forced flush.
    pub size: usize,
}

impl BufferOptions {
    pub fn new(time: u64, size: usize) -> Self {
        Self { time, size }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        BufferOptions, Error,
        ids::{ChannelId, EventId},
    };
    use std::str::FromStr;

    #[test]
    fn channel_id_round_trip() {
        let channel = ChannelId::new();
        let parsed = ChannelId::from_str(&channel.to_string()).expect("parse");
        assert_eq!(channel, parsed);
    }

    #[test]
    fn ids_serialize_as_their_display_text() {
        let event = EventId::new();
        assert_eq!(
            serde_json::to_value(event).expect("serialize"),
            serde_json::Value::String(event.to_string())
        );
        let parsed: EventId =
            serde_json::from_value(serde_json::Value::String(event.to_string())).expect("parse");
        assert_eq!(parsed, event);
    }

    #[test]
    fn event_ids_are_unique() {
        assert_ne!(EventId::new(), EventId::new());
    }

    #[test]
    fn channel_id_rejects_invalid_input() {
        let err = ChannelId::from_str("not-a-uuid").expect_err("invalid");
        assert!(matches!(err, Error::InvalidId(s) if s == "not-a-uuid"));
    }

    #[test]
    fn now_ms_is_after_2020() {
        assert!(super::clock::now_ms() > 1_577_836_800_000);
    }

    #[test]
    fn buffer_options_new_sets_fields() {
        let options = BufferOptions::new(250, 3);
        assert_eq!(options, BufferOptions { time: 250, size: 3 });
    }
}
