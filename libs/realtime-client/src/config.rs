use crate::error::RealtimeError;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Connection settings for the realtime broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// WebSocket endpoint of the STOMP broker
    pub broker_url: String,
    /// Fixed delay between reconnect attempts; zero disables auto-reconnect
    pub reconnect_delay: Duration,
    /// How often we promise to send heart-beats (zero = never)
    pub heartbeat_outgoing: Duration,
    /// How often we ask the broker to send heart-beats (zero = never)
    pub heartbeat_incoming: Duration,
    /// Prepended to every topic name when building a destination
    pub destination_prefix: String,
    /// Application destination for outbound chat messages
    pub chat_send_destination: String,
    /// Bearer token sent with the CONNECT frame
    pub auth_token: Option<String>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            broker_url: "ws://localhost:8080/ws".to_string(),
            reconnect_delay: Duration::from_secs(5),
            heartbeat_outgoing: Duration::from_secs(10),
            heartbeat_incoming: Duration::from_secs(10),
            destination_prefix: String::new(),
            chat_send_destination: "app/chat.send".to_string(),
            auth_token: None,
        }
    }
}

impl RealtimeConfig {
    pub fn from_env() -> Result<Self, RealtimeError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            broker_url: env::var("REALTIME_BROKER_URL").unwrap_or(defaults.broker_url),
            reconnect_delay: millis_var("REALTIME_RECONNECT_DELAY_MS")?
                .unwrap_or(defaults.reconnect_delay),
            heartbeat_outgoing: millis_var("REALTIME_HEARTBEAT_OUTGOING_MS")?
                .unwrap_or(defaults.heartbeat_outgoing),
            heartbeat_incoming: millis_var("REALTIME_HEARTBEAT_INCOMING_MS")?
                .unwrap_or(defaults.heartbeat_incoming),
            destination_prefix: env::var("REALTIME_DESTINATION_PREFIX")
                .unwrap_or(defaults.destination_prefix),
            chat_send_destination: env::var("REALTIME_CHAT_SEND_DESTINATION")
                .unwrap_or(defaults.chat_send_destination),
            auth_token: env::var("REALTIME_AUTH_TOKEN").ok().filter(|t| !t.is_empty()),
        })
    }

    /// Full destination for a topic or application path
    pub fn destination(&self, name: &str) -> String {
        format!("{}{}", self.destination_prefix, name)
    }

    /// Value of the STOMP `heart-beat` header
    pub fn heartbeat_header(&self) -> String {
        format!(
            "{},{}",
            self.heartbeat_outgoing.as_millis(),
            self.heartbeat_incoming.as_millis()
        )
    }

    pub fn auto_reconnect(&self) -> bool {
        !self.reconnect_delay.is_zero()
    }
}

/// Read an optional environment variable and parse it
///
/// Shared with the sibling crates so all configuration fails the same way.
pub fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>, RealtimeError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| RealtimeError::Config(format!("{name} has invalid value {raw:?}"))),
        Err(_) => Ok(None),
    }
}

/// Read an optional millisecond duration from the environment
pub fn millis_var(name: &str) -> Result<Option<Duration>, RealtimeError> {
    Ok(parse_var::<u64>(name)?.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_design() {
        let config = RealtimeConfig::default();
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.chat_send_destination, "app/chat.send");
        assert!(config.auto_reconnect());
        assert_eq!(config.heartbeat_header(), "10000,10000");
    }

    #[test]
    fn test_destination_prefix() {
        let config = RealtimeConfig {
            destination_prefix: "/topic/".into(),
            ..Default::default()
        };
        assert_eq!(config.destination("chat/42"), "/topic/chat/42");
        assert_eq!(RealtimeConfig::default().destination("chat/42"), "chat/42");
    }

    #[test]
    fn test_invalid_millis_is_config_error() {
        env::set_var("REALTIME_TEST_BAD_MS", "soon");
        let err = millis_var("REALTIME_TEST_BAD_MS").unwrap_err();
        assert!(matches!(err, RealtimeError::Config(_)));
        env::remove_var("REALTIME_TEST_BAD_MS");

        assert_eq!(millis_var("REALTIME_TEST_UNSET_MS").unwrap(), None);
    }
}
