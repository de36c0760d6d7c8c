//! # Agent Configuration
//!
//! Configuration management for the fleet agent.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     FLEET_CLUSTER_ID=eu-west-1                                         │
//! │     FLEET_ALLOWED_VERSIONS="3.0.0, 3.1.0"                              │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/fleet-agent/agent.toml (Linux)                           │
//! │     ~/Library/Application Support/dev.fleet.fleet-agent/agent.toml     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     cluster "testing", 15s poll, 60s resync                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # agent.toml
//! [cluster]
//! id = "testing"
//! namespace = "fleet-system"
//! allowed_versions = ["3.0.0"]
//!
//! [sync]
//! poll_interval_secs = 15
//! resync_interval_secs = 60
//! request_timeout_secs = 10
//!
//! [control_plane]
//! url = "http://localhost:8080"
//! simulate = false
//! max_workloads = 3
//! listen_addr = "127.0.0.1:8080"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use fleet_core::validation::{parse_allowed_versions, validate_cluster_id};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Cluster Configuration
// =============================================================================

/// Identity of the member cluster this agent runs in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster identifier used in every control-plane call.
    #[serde(default = "default_cluster_id")]
    pub id: String,

    /// Namespace the agent creates workload resources in.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Workload software versions this cluster accepts.
    #[serde(default = "default_allowed_versions")]
    pub allowed_versions: Vec<String>,
}

fn default_cluster_id() -> String {
    "testing".to_string()
}

fn default_namespace() -> String {
    "fleet-system".to_string()
}

fn default_allowed_versions() -> Vec<String> {
    vec!["3.0.0".to_string()]
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            id: default_cluster_id(),
            namespace: default_namespace(),
            allowed_versions: default_allowed_versions(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Timing of the sync engine and event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Interval between reconciliation passes (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Event bus resync period (seconds).
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,

    /// Upper bound on a single control-plane call (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_poll_interval() -> u64 {
    15
}
fn default_resync_interval() -> u64 {
    60
}
fn default_request_timeout() -> u64 {
    10
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            poll_interval_secs: default_poll_interval(),
            resync_interval_secs: default_resync_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// =============================================================================
// Control Plane Settings
// =============================================================================

/// Where the control plane lives, and how the reference one behaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneSettings {
    /// Base URL of the control plane.
    #[serde(default = "default_control_plane_url")]
    pub url: String,

    /// Run the randomized churn generator of the reference control plane.
    #[serde(default)]
    pub simulate: bool,

    /// Upper bound on simulated workloads (and capacity reported upstream).
    #[serde(default = "default_max_workloads")]
    pub max_workloads: u32,

    /// Bind address of the reference control plane's REST surface.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_control_plane_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_max_workloads() -> u32 {
    3
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ControlPlaneSettings {
    fn default() -> Self {
        ControlPlaneSettings {
            url: default_control_plane_url(),
            simulate: false,
            max_workloads: default_max_workloads(),
            listen_addr: default_listen_addr(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub control_plane: ControlPlaneSettings,
}

impl FleetConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (agent.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading agent config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load agent config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Agent config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.cluster.id.trim().is_empty() {
            return Err(SyncError::MissingClusterId);
        }
        validate_cluster_id(&self.cluster.id)?;

        let url = url::Url::parse(&self.control_plane.url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SyncError::InvalidUrl(format!(
                "Control plane URL must start with http:// or https://, got: {}",
                self.control_plane.url
            )));
        }

        if self.sync.poll_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "poll_interval_secs must be greater than 0".into(),
            ));
        }
        if self.sync.resync_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "resync_interval_secs must be greater than 0".into(),
            ));
        }
        if self.sync.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.control_plane.max_workloads == 0 {
            return Err(SyncError::InvalidConfig(
                "max_workloads must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies `FLEET_*` overrides read through `lookup`.
    ///
    /// Unparsable numeric values are ignored with a warning. An allowed
    /// versions string that is non-blank but lists nothing is an error.
    fn apply_overrides<F>(&mut self, lookup: F) -> SyncResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup("FLEET_CLUSTER_ID") {
            debug!(cluster_id = %id, "Overriding cluster ID from environment");
            self.cluster.id = id;
        }

        if let Some(ns) = lookup("FLEET_NAMESPACE") {
            self.cluster.namespace = ns;
        }

        if let Some(raw) = lookup("FLEET_ALLOWED_VERSIONS") {
            self.cluster.allowed_versions = parse_allowed_versions(&raw)?;
        }

        parse_override(&lookup, "FLEET_POLL_INTERVAL_SECS", &mut self.sync.poll_interval_secs);
        parse_override(
            &lookup,
            "FLEET_RESYNC_INTERVAL_SECS",
            &mut self.sync.resync_interval_secs,
        );
        parse_override(
            &lookup,
            "FLEET_REQUEST_TIMEOUT_SECS",
            &mut self.sync.request_timeout_secs,
        );

        if let Some(url) = lookup("FLEET_CONTROL_PLANE_URL") {
            debug!(url = %url, "Overriding control plane URL from environment");
            self.control_plane.url = url;
        }

        if let Some(flag) = lookup("FLEET_SIMULATE") {
            match flag.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.control_plane.simulate = true,
                "0" | "false" | "no" | "off" => self.control_plane.simulate = false,
                _ => warn!(value = %flag, "Unknown FLEET_SIMULATE value in environment"),
            }
        }

        parse_override(
            &lookup,
            "FLEET_MAX_WORKLOADS",
            &mut self.control_plane.max_workloads,
        );

        if let Some(addr) = lookup("FLEET_LISTEN_ADDR") {
            self.control_plane.listen_addr = addr;
        }

        Ok(())
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "fleet", "fleet-agent")
            .map(|dirs| dirs.config_dir().join("agent.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn cluster_id(&self) -> &str {
        &self.cluster.id
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.sync.poll_interval_secs)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.resync_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.request_timeout_secs)
    }

    pub fn is_simulation(&self) -> bool {
        self.control_plane.simulate
    }
}

fn parse_override<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => warn!(key, value = %raw, "Ignoring unparsable override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = FleetConfig::default();
        assert_eq!(config.cluster_id(), "testing");
        assert_eq!(config.poll_interval(), Duration::from_secs(15));
        assert_eq!(config.resync_interval(), Duration::from_secs(60));
        assert_eq!(config.control_plane.max_workloads, 3);
        assert!(!config.is_simulation());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = FleetConfig::default();

        config.cluster.id = String::new();
        assert!(matches!(config.validate(), Err(SyncError::MissingClusterId)));

        config.cluster.id = "eu-west".to_string();
        config.control_plane.url = "ws://localhost:8080".to_string();
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.control_plane.url = "https://fleet.example.com".to_string();
        assert!(config.validate().is_ok());

        config.sync.poll_interval_secs = 0;
        assert!(config.validate().unwrap_err().is_config_error());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = FleetConfig::default();
        config
            .apply_overrides(env(&[
                ("FLEET_CLUSTER_ID", "eu-west"),
                ("FLEET_ALLOWED_VERSIONS", "3.0.0 , 3.1.0"),
                ("FLEET_POLL_INTERVAL_SECS", "2"),
                ("FLEET_MAX_WORKLOADS", "not-a-number"),
                ("FLEET_SIMULATE", "true"),
            ]))
            .unwrap();

        assert_eq!(config.cluster.id, "eu-west");
        assert_eq!(config.cluster.allowed_versions, vec!["3.0.0", "3.1.0"]);
        assert_eq!(config.sync.poll_interval_secs, 2);
        assert_eq!(config.control_plane.max_workloads, 3);
        assert!(config.is_simulation());
    }

    #[test]
    fn test_blank_allowed_versions_override() {
        let mut config = FleetConfig::default();
        config
            .apply_overrides(env(&[("FLEET_ALLOWED_VERSIONS", "  ")]))
            .unwrap();
        assert!(config.cluster.allowed_versions.is_empty());

        let err = config
            .apply_overrides(env(&[("FLEET_ALLOWED_VERSIONS", ", ,")]))
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: FleetConfig = toml::from_str(
            r#"
            [cluster]
            id = "member-7"

            [control_plane]
            simulate = true
            "#,
        )
        .unwrap();
        assert_eq!(config.cluster.id, "member-7");
        assert_eq!(config.cluster.namespace, "fleet-system");
        assert!(config.is_simulation());
        assert_eq!(config.sync.request_timeout_secs, 10);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("fleet-agent-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("agent.toml");

        let mut config = FleetConfig::default();
        config.cluster.id = "saved".to_string();
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[cluster]"));
        assert!(contents.contains("[control_plane]"));

        let loaded: FleetConfig = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.cluster.id, "saved");

        std::fs::remove_dir_all(&dir).ok();
    }
}
