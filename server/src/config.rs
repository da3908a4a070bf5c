//! Server configuration
//!
//! Values come from an optional TOML file and are then overridden by command
//! line flags in `main`. Every field has a default so an empty file, or no
//! file at all, yields a runnable server.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What to do with an outgoing frame larger than the wire limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OversizePolicy {
    /// Log and discard the frame, keep the connection
    #[default]
    Drop,
    /// Log and close the connection
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub max_clients: usize,
    pub server_name: String,
    /// Connections silent for longer than this are dropped
    pub idle_timeout_ms: u64,
    pub receive_buffer_size: usize,
    /// Largest payload an inbound frame may declare
    pub max_inbound_payload: usize,
    /// Largest encoded frame the server will put on the wire
    pub max_outbound_frame: usize,
    /// Upper bound for one coalesced stream transmission
    pub batch_budget: usize,
    pub oversize_policy: OversizePolicy,
    /// Datagram path is considered dead when no ping arrived within this window
    pub datagram_liveness_ms: u64,
    pub slow_handler_ms: u64,
    pub watchdog_interval_ms: u64,
    /// Concurrent dispatches across all connections, 0 picks the core count
    pub dispatch_workers: usize,
    pub diagnostics_capacity: usize,
    pub buffer_pool_size: usize,
    pub movement: MovementConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            tcp_port: 10300,
            udp_port: 10400,
            max_clients: 500,
            server_name: "gamewire".to_string(),
            idle_timeout_ms: 60_000,
            receive_buffer_size: 4096,
            max_inbound_payload: shared::DEFAULT_MAX_PAYLOAD,
            max_outbound_frame: 2048,
            batch_budget: 2048,
            oversize_policy: OversizePolicy::Drop,
            datagram_liveness_ms: 24_000,
            slow_handler_ms: 1000,
            watchdog_interval_ms: 1000,
            dispatch_workers: 0,
            diagnostics_capacity: 16,
            buffer_pool_size: 64,
            movement: MovementConfig::default(),
        }
    }
}

/// Tuning for the movement validator
///
/// The anti-cheat numbers are heuristics. They are configuration rather than
/// protocol, and the automatic ban stays off unless explicitly enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    /// Updates arriving faster than this count as a speed violation
    pub min_update_interval_ms: u64,
    /// Log every Nth consecutive violation
    pub log_every: u32,
    pub ban_enabled: bool,
    /// Consecutive violations that trigger a ban when banning is enabled
    pub ban_tolerance: u32,
    pub ban_minutes: u64,
    pub area_check_interval_ms: u64,
    pub visibility_radius: i32,
    /// Allows the debug flight mode for everybody
    pub debug_mode: bool,
    pub position_history: usize,
    pub fall: FallDamageConfig,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            min_update_interval_ms: 400,
            log_every: 5,
            ban_enabled: false,
            ban_tolerance: 20,
            ban_minutes: 60,
            area_check_interval_ms: 2000,
            visibility_radius: 3600,
            debug_mode: false,
            position_history: 8,
            fall: FallDamageConfig::default(),
        }
    }
}

/// Descent speeds above `min_speed` hurt, one percent per `divisor` units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallDamageConfig {
    pub min_speed: i32,
    pub divisor: i32,
    /// First build using the newer thresholds
    pub revised_from_build: u16,
    pub revised_min_speed: i32,
    pub revised_divisor: i32,
    /// Descent speed absorbed per safe-fall level
    pub safe_fall_step: i32,
    pub max_percent: i32,
}

impl Default for FallDamageConfig {
    fn default() -> Self {
        Self {
            min_speed: 400,
            divisor: 6,
            revised_from_build: 188,
            revised_min_speed: 500,
            revised_divisor: 15,
            safe_fall_step: 100,
            max_percent: 99,
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text, &path.display().to_string())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_clients == 0 {
            return Err(ConfigError::Invalid("max_clients must be positive".into()));
        }
        if self.max_clients > u16::MAX as usize - 1 {
            return Err(ConfigError::Invalid(
                "max_clients must fit the 16-bit session space".into(),
            ));
        }
        if self.batch_budget < self.max_outbound_frame {
            return Err(ConfigError::Invalid(format!(
                "batch_budget ({}) must be at least max_outbound_frame ({})",
                self.batch_budget, self.max_outbound_frame
            )));
        }
        if self.max_inbound_payload > u16::MAX as usize {
            return Err(ConfigError::Invalid(
                "max_inbound_payload cannot exceed the 16-bit length field".into(),
            ));
        }
        if self.movement.log_every == 0 || self.movement.fall.divisor <= 0 || self.movement.fall.revised_divisor <= 0 {
            return Err(ConfigError::Invalid(
                "movement divisors and log_every must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn tcp_addr(&self) -> String {
        format!("{}:{}", self.host, self.tcp_port)
    }

    pub fn udp_addr(&self) -> String {
        format!("{}:{}", self.host, self.udp_port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn datagram_liveness(&self) -> Duration {
        Duration::from_millis(self.datagram_liveness_ms)
    }

    pub fn slow_handler_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_handler_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn worker_count(&self) -> usize {
        if self.dispatch_workers > 0 {
            self.dispatch_workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }
}

impl MovementConfig {
    pub fn min_update_interval(&self) -> Duration {
        Duration::from_millis(self.min_update_interval_ms)
    }

    pub fn area_check_interval(&self) -> Duration {
        Duration::from_millis(self.area_check_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.oversize_policy, OversizePolicy::Drop);
        assert!(!config.movement.ban_enabled);
        assert_eq!(config.movement.min_update_interval(), Duration::from_millis(400));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let text = r#"
            tcp_port = 4000
            oversize_policy = "disconnect"

            [movement]
            ban_enabled = true

            [movement.fall]
            min_speed = 300
        "#;
        let config = ServerConfig::from_toml_str(text, "inline").unwrap();
        assert_eq!(config.tcp_port, 4000);
        assert_eq!(config.udp_port, 10400);
        assert_eq!(config.oversize_policy, OversizePolicy::Disconnect);
        assert!(config.movement.ban_enabled);
        assert_eq!(config.movement.fall.min_speed, 300);
        assert_eq!(config.movement.fall.divisor, 6);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = ServerConfig::from_toml_str("batch_budget = 10", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = ServerConfig::from_toml_str("max_clients = 0", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = ServerConfig::from_toml_str("tcp_port = \"x\"", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = ServerConfig::load(Path::new("/nonexistent/gamewire.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/gamewire.toml"));
    }

    #[test]
    fn test_worker_count_never_zero() {
        let config = ServerConfig::default();
        assert!(config.worker_count() > 0);
        let config = ServerConfig {
            dispatch_workers: 3,
            ..ServerConfig::default()
        };
        assert_eq!(config.worker_count(), 3);
    }
}
