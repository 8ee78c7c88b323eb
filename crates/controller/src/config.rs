//! Controller configuration

use anyhow::Result;
use controller_lib::control::LoopConfig;
use controller_lib::detector::DetectorConfig;
use controller_lib::models::AutonomyLevel;
use controller_lib::router::RouterConfig;
use controller_lib::safety::SafetyConfig;
use controller_lib::source::EndpointConfig;
use serde::Deserialize;

/// Controller configuration, loaded from `OPSCTL_`-prefixed environment
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Instance name used in structured logs
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// API server port for the control surface
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Collection interval in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Consecutive failed ticks before the loop enters the error state
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    /// Error-state cooldown before ticking resumes, in seconds
    #[serde(default = "default_error_cooldown_secs")]
    pub error_cooldown_secs: u64,

    /// Detector sensitivity; higher flags smaller deviations
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f64,

    /// Bounded size of the action audit history
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Autonomy level for the safety controller
    #[serde(default = "default_autonomy")]
    pub autonomy: AutonomyLevel,

    /// Comma-separated `name=url` pairs of metrics endpoints to poll
    #[serde(default)]
    pub endpoints: Option<String>,

    /// Whether to start the loop immediately on boot
    #[serde(default = "default_autostart")]
    pub autostart: bool,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "ops-controller".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_interval_secs() -> u64 {
    30
}

fn default_max_consecutive_errors() -> u32 {
    5
}

fn default_error_cooldown_secs() -> u64 {
    60
}

fn default_sensitivity() -> f64 {
    1.0
}

fn default_history_size() -> usize {
    500
}

fn default_autonomy() -> AutonomyLevel {
    AutonomyLevel::Supervised
}

fn default_autostart() -> bool {
    true
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            api_port: default_api_port(),
            interval_secs: default_interval_secs(),
            max_consecutive_errors: default_max_consecutive_errors(),
            error_cooldown_secs: default_error_cooldown_secs(),
            sensitivity: default_sensitivity(),
            history_size: default_history_size(),
            autonomy: default_autonomy(),
            endpoints: None,
            autostart: default_autostart(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("OPSCTL"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_default())
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            interval_secs: self.interval_secs,
            max_consecutive_errors: self.max_consecutive_errors,
            error_cooldown_secs: self.error_cooldown_secs,
            ..LoopConfig::default()
        }
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            sensitivity: self.sensitivity,
            ..DetectorConfig::default()
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig::default()
    }

    pub fn safety_config(&self) -> SafetyConfig {
        SafetyConfig {
            autonomy: self.autonomy,
            history_size: self.history_size,
            ..SafetyConfig::default()
        }
    }

    /// Parse the endpoint list; entries without `=` are skipped
    pub fn endpoint_configs(&self) -> Vec<EndpointConfig> {
        self.endpoints
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter_map(|entry| {
                let entry = entry.trim();
                let (name, url) = entry.split_once('=')?;
                if name.is_empty() || url.is_empty() {
                    return None;
                }
                Some(EndpointConfig::new(name.trim(), url.trim()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parsing() {
        let config = ControllerConfig {
            endpoints: Some(
                "api=http://api:9000/health, worker=http://worker:9000/health".to_string(),
            ),
            ..ControllerConfig::default()
        };

        let endpoints = config.endpoint_configs();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].name, "api");
        assert_eq!(endpoints[0].url, "http://api:9000/health");
        assert_eq!(endpoints[1].name, "worker");
    }

    #[test]
    fn test_endpoint_parsing_skips_malformed_entries() {
        let config = ControllerConfig {
            endpoints: Some("api=http://api:9000/health,badentry,=nourl".to_string()),
            ..ControllerConfig::default()
        };

        assert_eq!(config.endpoint_configs().len(), 1);
    }

    #[test]
    fn test_no_endpoints_configured() {
        let config = ControllerConfig::default();
        assert!(config.endpoint_configs().is_empty());
    }
}
