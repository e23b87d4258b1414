use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the Moonraker HTTP API, no trailing slash.
    pub moonraker_url: String,
    /// Port the overlay API listens on.
    pub port: u16,
    pub cors_enabled: bool,
    /// Broadcast period for the observer push channel, in milliseconds.
    pub refresh_interval_ms: u64,
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            moonraker_url: env::var("MOONRAKER_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.moonraker_url),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            cors_enabled: env::var("CORS_ENABLED")
                .map(|v| v == "true")
                .unwrap_or(defaults.cors_enabled),
            refresh_interval_ms: env::var("REFRESH_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.refresh_interval_ms),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    /// Moonraker's realtime endpoint, derived from the HTTP URL.
    pub fn moonraker_ws_url(&self) -> String {
        let ws_base = if self.moonraker_url.starts_with("https://") {
            self.moonraker_url.replacen("https://", "wss://", 1)
        } else {
            self.moonraker_url.replacen("http://", "ws://", 1)
        };

        format!("{}/websocket", ws_base)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            moonraker_url: "http://localhost:7125".to_string(),
            port: 8080,
            cors_enabled: false,
            refresh_interval_ms: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url_from_http() {
        let config = AppConfig {
            moonraker_url: "http://192.168.1.155:7125".to_string(),
            ..AppConfig::default()
        };
        assert_eq!(config.moonraker_ws_url(), "ws://192.168.1.155:7125/websocket");
    }

    #[test]
    fn test_ws_url_from_https() {
        let config = AppConfig {
            moonraker_url: "https://printer.local".to_string(),
            ..AppConfig::default()
        };
        assert_eq!(config.moonraker_ws_url(), "wss://printer.local/websocket");
    }

    #[test]
    fn test_bind_addr() {
        let config = AppConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
    }
}
