//! Relay configuration (§6.4).
//!
//! Modeled on `tallow-relay`'s `RelayConfig`: a flat, serde-friendly struct
//! with a [`Default`] matching the spec's defaults table, optionally
//! overlaid from a TOML file, with a `validate()` clamp pass that repairs
//! nonsensical values with a `tracing::warn!` rather than failing startup.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub ws_path: String,
    pub ws_max_payload_size: usize,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub max_peers_per_room: usize,
    pub max_rooms: usize,
    pub cleanup_interval_ms: u64,
    pub cleanup_peer_timeout_ms: u64,
    /// How long a disconnected peer's record is kept around, closed but
    /// un-reaped, so a same-identity rejoin can be adopted instead of
    /// treated as a brand-new peer (§9 reconnection).
    pub reconnect_grace_ms: u64,
    pub logging_level: String,
    pub cors_origin: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3001,
            host: "0.0.0.0".to_string(),
            ws_path: "/ws".to_string(),
            ws_max_payload_size: 65536,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 10_000,
            max_peers_per_room: 10,
            max_rooms: 100,
            cleanup_interval_ms: 30_000,
            cleanup_peer_timeout_ms: 60_000,
            reconnect_grace_ms: 30_000,
            logging_level: "info".to_string(),
            cors_origin: "*".to_string(),
        }
    }
}

impl Config {
    /// Load a config from a TOML file, falling back to defaults for any
    /// field the file omits (`#[serde(default)]` on the struct handles
    /// this). Returns `Err` only if the file exists but fails to parse.
    pub fn from_toml_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)?;
        Ok(config)
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn cleanup_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn cleanup_peer_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.cleanup_peer_timeout_ms)
    }

    pub fn reconnect_grace(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reconnect_grace_ms)
    }

    /// Clamp values that would otherwise produce a broken server (zero
    /// intervals would spin the heartbeat/cleanup tasks in a tight loop).
    pub fn validate(&mut self) {
        if self.heartbeat_interval_ms == 0 {
            tracing::warn!("heartbeat.interval of 0 is invalid, using 30000ms");
            self.heartbeat_interval_ms = 30_000;
        }
        if self.cleanup_interval_ms == 0 {
            tracing::warn!("cleanup.interval of 0 is invalid, using 30000ms");
            self.cleanup_interval_ms = 30_000;
        }
        if self.max_peers_per_room == 0 {
            tracing::warn!("rooms.maxPeersPerRoom of 0 is invalid, using 10");
            self.max_peers_per_room = 10;
        }
        if self.max_rooms == 0 {
            tracing::warn!("rooms.maxRooms of 0 is invalid, using 100");
            self.max_rooms = 100;
        }
        if self.ws_max_payload_size == 0 {
            tracing::warn!("ws.maxPayloadSize of 0 is invalid, using 65536");
            self.ws_max_payload_size = 65536;
        }
        if self.reconnect_grace_ms == 0 {
            tracing::warn!("reconnect.grace of 0 is invalid, using 30000ms");
            self.reconnect_grace_ms = 30_000;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let c = Config::default();
        assert_eq!(c.port, 3001);
        assert_eq!(c.ws_path, "/ws");
        assert_eq!(c.ws_max_payload_size, 65536);
        assert_eq!(c.max_peers_per_room, 10);
        assert_eq!(c.max_rooms, 100);
    }

    #[test]
    fn validate_repairs_zero_intervals() {
        let mut c = Config {
            heartbeat_interval_ms: 0,
            cleanup_interval_ms: 0,
            max_peers_per_room: 0,
            max_rooms: 0,
            ws_max_payload_size: 0,
            reconnect_grace_ms: 0,
            ..Config::default()
        };
        c.validate();
        assert_eq!(c.heartbeat_interval_ms, 30_000);
        assert_eq!(c.cleanup_interval_ms, 30_000);
        assert_eq!(c.max_peers_per_room, 10);
        assert_eq!(c.max_rooms, 100);
        assert_eq!(c.ws_max_payload_size, 65536);
        assert_eq!(c.reconnect_grace_ms, 30_000);
    }

    #[test]
    fn parses_partial_toml_with_defaults_filled_in() {
        let toml_text = "port = 9000\n";
        let c: Config = toml::from_str(toml_text).unwrap();
        assert_eq!(c.port, 9000);
        assert_eq!(c.host, "0.0.0.0");
    }
}
