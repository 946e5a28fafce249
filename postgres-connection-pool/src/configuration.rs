use serde::{Deserialize, Deserializer};
use std::time::Duration;
use thiserror::Error;

/// Pool configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// capacity of zero would make every acquisition fail
    #[error("Pool capacity must be greater than zero")]
    Capacity,
}

/// Environment-derived connection pool configuration
#[derive(Deserialize, Debug, Clone)]
pub struct Configuration {
    /// maximum number of connections, checked out or idle
    #[serde(default = "get_capacity")]
    pub capacity: usize,
    /// maximum number of requests waiting for an available connection
    #[serde(default = "get_queue_capacity")]
    pub queue_capacity: usize,
    /// time before an idle connection is closed (in milliseconds, empty = never)
    #[serde(default = "get_idle_timeout", deserialize_with = "from_milliseconds_string")]
    pub idle_timeout: Option<Duration>,
    /// total time a connection may live before it is discarded
    /// (in milliseconds, empty = unlimited)
    #[serde(default = "get_lifespan", deserialize_with = "from_milliseconds_string")]
    pub lifespan: Option<Duration>,
}

impl Configuration {
    /// Check the configuration invariants
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.capacity == 0 {
            return Err(ConfigurationError::Capacity);
        }

        Ok(())
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            capacity: get_capacity(),
            queue_capacity: get_queue_capacity(),
            idle_timeout: get_idle_timeout(),
            lifespan: get_lifespan(),
        }
    }
}

/// Time restrictions on fetching connections from the pool
#[derive(Deserialize, Debug, Clone)]
pub struct Timeouts {
    /// maximum time to establish a new connection (in milliseconds)
    #[serde(default = "get_connect_timeout", deserialize_with = "duration_from_milliseconds_string")]
    pub connect: Duration,
    /// maximum time a request may wait in the queue (in milliseconds)
    #[serde(default = "get_queue_timeout", deserialize_with = "duration_from_milliseconds_string")]
    pub queue: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: get_connect_timeout(),
            queue: get_queue_timeout(),
        }
    }
}

/// Generate the default maximum number of stored connections
fn get_capacity() -> usize {
    10
}

/// Generate the default maximum number of queued requests
fn get_queue_capacity() -> usize {
    128
}

/// Generate the default time interval to close a connection after last usage
fn get_idle_timeout() -> Option<Duration> {
    Some(Duration::from_secs(60))
}

/// Generate the default time interval to keep a connection open
fn get_lifespan() -> Option<Duration> {
    Some(Duration::from_secs(60 * 60 * 24))
}

/// Generate the default time limit for establishing a new connection
fn get_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Generate the default time limit for waiting in the queue
fn get_queue_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Deserializer for optional milliseconds, passed through the environment as
/// a string (empty = unset)
fn from_milliseconds_string<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let base_string = String::deserialize(deserializer)?;
    if base_string.is_empty() {
        Ok(None)
    } else {
        let parsed_millis: u64 = base_string.parse().map_err(serde::de::Error::custom)?;
        let duration = Duration::from_millis(parsed_millis);

        Ok(Some(duration))
    }
}

/// Deserializer for milliseconds, passed through the environment as a string
fn duration_from_milliseconds_string<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let base_string = String::deserialize(deserializer)?;
    let parsed_millis: u64 = base_string.parse().map_err(serde::de::Error::custom)?;

    Ok(Duration::from_millis(parsed_millis))
}

#[cfg(test)]
mod test {
    use super::{Configuration, Timeouts};
    use std::time::Duration;

    #[test]
    fn derives_defaults_for_missing_fields() {
        let configuration: Configuration =
            serde_json::from_str("{}").expect("Error deserializing empty configuration");

        assert_eq!(configuration.capacity, 10);
        assert_eq!(configuration.queue_capacity, 128);
        assert_eq!(configuration.idle_timeout, Some(Duration::from_secs(60)));
        assert_eq!(configuration.lifespan, Some(Duration::from_secs(60 * 60 * 24)));
        configuration.validate().expect("Default configuration should be valid");

        let timeouts: Timeouts =
            serde_json::from_str("{}").expect("Error deserializing empty timeouts");

        assert_eq!(timeouts.connect, Duration::from_secs(10));
        assert_eq!(timeouts.queue, Duration::from_secs(10));
    }

    #[test]
    fn parses_durations_from_milliseconds_strings() {
        let configuration: Configuration = serde_json::from_str(
            r#"{"capacity":4,"idle_timeout":"5000","lifespan":""}"#,
        )
        .expect("Error deserializing configuration");

        assert_eq!(configuration.capacity, 4);
        assert_eq!(configuration.idle_timeout, Some(Duration::from_millis(5000)));
        assert_eq!(configuration.lifespan, None);
    }

    #[test]
    fn rejects_zero_capacity() {
        let configuration = Configuration {
            capacity: 0,
            ..Configuration::default()
        };

        assert!(configuration.validate().is_err());
    }
}
