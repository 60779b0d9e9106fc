//! # Network Configuration
//!
//! Session settings loaded once at startup, typically from a TOML file
//! shipped next to the game assets. Every field has a default so a
//! missing or partial file still yields a usable configuration.

use serde::Deserialize;

use crate::error::NetResult;
use crate::DEFAULT_PORT;

/// Settings for the session layer and the discovery service.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Port used when the application does not pick one.
    pub default_port: u16,
    /// Session key compared against incoming discovery requests.
    ///
    /// Game name plus version is a good choice, so scanning the LAN only
    /// finds sessions of the same game.
    pub session_key: String,
    /// Free-form text carried verbatim in discovery answers
    /// (current map, player count, whatever the lobby wants to show).
    pub session_description: String,
    /// Grace period in milliseconds after the disconnect notification,
    /// so the last packet can flush through the non-blocking socket.
    pub disconnect_grace_ms: u64,
    /// Idle sleep in milliseconds for the discovery reception thread
    /// between empty polls.
    pub discovery_idle_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            default_port: DEFAULT_PORT,
            session_key: String::new(),
            session_description: String::new(),
            disconnect_grace_ms: 100,
            discovery_idle_ms: 1,
        }
    }
}

impl NetworkConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`crate::NetError::Config`] if the text is not valid TOML
    /// or a field has the wrong type.
    pub fn from_toml_str(text: &str) -> NetResult<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.default_port, DEFAULT_PORT);
        assert_eq!(config.disconnect_grace_ms, 100);
        assert_eq!(config.discovery_idle_ms, 1);
        assert!(config.session_key.is_empty());
    }

    #[test]
    fn test_partial_toml() {
        let config = NetworkConfig::from_toml_str(
            r#"
            session_key = "lumen_demo_v1"
            session_description = "Map: Harbor"
            "#,
        )
        .unwrap();

        assert_eq!(config.session_key, "lumen_demo_v1");
        assert_eq!(config.session_description, "Map: Harbor");
        // Unspecified fields fall back to defaults
        assert_eq!(config.default_port, DEFAULT_PORT);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(NetworkConfig::from_toml_str("default_port = \"not a port\"").is_err());
    }
}
