// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0

// Agent Configuration Types
//
// Defines the configuration schema for a parknet agent node, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Agent identity (signature, half-length)
// - Formation spacing and the stabilized updater schedule
// - Arbitration timings
// - Network peers and observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::formation::GapPolicy;
use crate::domain::signature::Signature;

pub const API_VERSION: &str = "parknet.io/v1";
pub const KIND: &str = "AgentConfig";

/// Top-level Kubernetes-style agent configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfigManifest {
    /// API version (must be "parknet.io/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "AgentConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: AgentConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable node name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Agent configuration specification (content under spec:)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfigSpec {
    pub agent: AgentIdentity,

    #[serde(default)]
    pub formation: FormationConfig,

    #[serde(default)]
    pub arbitration: ArbitrationConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    /// Simulated collaborators used when no hardware is attached
    #[serde(default)]
    pub simulation: SimulationConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Unique stable agent identifier
    pub signature: Signature,

    /// Half of the vehicle length in cm
    #[serde(default = "default_delta")]
    pub delta: f64,

    /// Set when the signature was minted at startup rather than configured.
    /// Such a signature changes on every restart.
    #[serde(skip)]
    pub generated: bool,
}

impl Default for AgentIdentity {
    fn default() -> Self {
        Self {
            signature: Signature::new(uuid::Uuid::new_v4().simple().to_string()),
            delta: default_delta(),
            generated: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormationConfig {
    #[serde(default)]
    pub gap: GapPolicy,

    #[serde(default)]
    pub updater: UpdaterConfig,
}

/// Adaptive delay between two formation updates.
///
/// The delay grows from `min_delay` to `max_delay` over `steps` consecutive
/// cycles without a formation change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdaterConfig {
    #[serde(with = "humantime_serde", default = "default_min_delay")]
    pub min_delay: Duration,

    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub max_delay: Duration,

    #[serde(default = "default_steps")]
    pub steps: u32,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            min_delay: default_min_delay(),
            max_delay: default_max_delay(),
            steps: default_steps(),
        }
    }
}

/// Timings of the global action arbitration loops.
///
/// `wait_first_in_queue > wait_send_global >= wait_check_permission` must hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrationConfig {
    /// Heartbeat period of an owned claim
    #[serde(with = "humantime_serde", default = "default_wait_send_global")]
    pub wait_send_global: Duration,

    /// Period of the arbitration loop
    #[serde(with = "humantime_serde", default = "default_wait_check_permission")]
    pub wait_check_permission: Duration,

    /// How long a provisional claim must survive before it is verified
    #[serde(with = "humantime_serde", default = "default_wait_first_in_queue")]
    pub wait_first_in_queue: Duration,

    /// Period of the act loop
    #[serde(with = "humantime_serde", default = "default_wait_act")]
    pub wait_act: Duration,

    /// Peer claims not confirmed within this window are discarded.
    /// Defaults to five heartbeat periods.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub claim_timeout: Option<Duration>,
}

impl ArbitrationConfig {
    pub fn claim_timeout(&self) -> Duration {
        self.claim_timeout.unwrap_or(self.wait_send_global * 5)
    }
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            wait_send_global: default_wait_send_global(),
            wait_check_permission: default_wait_check_permission(),
            wait_first_in_queue: default_wait_first_in_queue(),
            wait_act: default_wait_act(),
            claim_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network bind address of the message gateway
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP gateway port
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Base URLs of the other agents (e.g. "http://10.0.0.12:8021")
    #[serde(default)]
    pub peers: Vec<String>,

    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
            peers: vec![],
            request_timeout: default_request_timeout(),
        }
    }
}

impl NetworkConfig {
    /// URL under which this node reaches its own gateway.
    pub fn local_url(&self) -> String {
        let host = match self.bind_address.as_str() {
            "0.0.0.0" | "::" => "127.0.0.1",
            other => other,
        };
        format!("http://{}:{}", host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Fixed answer of the simulated neighbor sensor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ahead_signature: Option<Signature>,

    /// How long each simulated maneuver takes
    #[serde(with = "humantime_serde", default = "default_maneuver_duration")]
    pub maneuver_duration: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            ahead_signature: None,
            maneuver_duration: default_maneuver_duration(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_delta() -> f64 {
    50.0
}

fn default_min_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(4)
}

fn default_steps() -> u32 {
    8
}

fn default_wait_send_global() -> Duration {
    Duration::from_millis(500)
}

fn default_wait_check_permission() -> Duration {
    Duration::from_millis(500)
}

fn default_wait_first_in_queue() -> Duration {
    Duration::from_secs(2)
}

fn default_wait_act() -> Duration {
    Duration::from_secs(1)
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8021
}

fn default_request_timeout() -> Duration {
    Duration::from_millis(300)
}

fn default_maneuver_duration() -> Duration {
    Duration::from_secs(2)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9021
}

impl Default for AgentConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "parknet-agent".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: AgentConfigSpec::default(),
        }
    }
}

impl AgentConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. PARKNET_CONFIG_PATH environment variable
    /// 2. ./parknet-config.yaml (working directory)
    /// 3. ~/.parknet/config.yaml (user home)
    /// 4. /etc/parknet/config.yaml (system, Unix) or C:\ProgramData\Parknet\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("PARKNET_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./parknet-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".parknet").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/parknet/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Parknet\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path (fail if missing/invalid)
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies overrides looked up through `lookup` (environment in production).
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("PARKNET_SIGNATURE") {
            if val.trim().is_empty() {
                tracing::warn!("Ignoring empty PARKNET_SIGNATURE");
            } else {
                tracing::info!("Environment override: PARKNET_SIGNATURE={}", val);
                self.spec.agent.signature = Signature::new(val.trim());
                self.spec.agent.generated = false;
            }
        }

        if let Some(val) = lookup("PARKNET_DELTA") {
            match val.trim().parse::<f64>() {
                Ok(delta) => {
                    tracing::info!("Environment override: PARKNET_DELTA={}", delta);
                    self.spec.agent.delta = delta;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for PARKNET_DELTA: '{}'. Expected a number of cm. Ignoring.",
                        val
                    );
                }
            }
        }

        if let Some(val) = lookup("PARKNET_PEERS") {
            let peers: Vec<String> = val
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
            tracing::info!("Environment override: PARKNET_PEERS ({} peers)", peers.len());
            self.spec.network.peers = peers;
        }
    }

    /// Whether the signature is a random one minted because none was
    /// configured. Peers keep every past signature as a stale vertex.
    pub fn has_generated_signature(&self) -> bool {
        self.spec.agent.generated
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.agent.signature.as_str().trim().is_empty() {
            anyhow::bail!("spec.agent.signature cannot be empty");
        }

        if self.spec.agent.delta.is_nan() || self.spec.agent.delta <= 0.0 {
            anyhow::bail!(
                "spec.agent.delta must be a positive length in cm, got {}",
                self.spec.agent.delta
            );
        }

        let gap = &self.spec.formation.gap;
        if gap.multiplier < 0.0 || gap.safety_margin < 0.0 {
            anyhow::bail!("spec.formation.gap values cannot be negative");
        }

        let updater = &self.spec.formation.updater;
        if updater.min_delay.is_zero() || updater.min_delay > updater.max_delay {
            anyhow::bail!(
                "spec.formation.updater requires 0 < min_delay <= max_delay (got {:?} / {:?})",
                updater.min_delay,
                updater.max_delay
            );
        }
        if updater.steps == 0 {
            anyhow::bail!("spec.formation.updater.steps must be at least 1");
        }

        let timing = &self.spec.arbitration;
        if timing.wait_check_permission.is_zero() || timing.wait_act.is_zero() {
            anyhow::bail!("spec.arbitration loop periods must be greater than zero");
        }
        if timing.wait_first_in_queue <= timing.wait_send_global {
            anyhow::bail!(
                "spec.arbitration.wait_first_in_queue ({:?}) must exceed wait_send_global ({:?})",
                timing.wait_first_in_queue,
                timing.wait_send_global
            );
        }
        if timing.wait_send_global < timing.wait_check_permission {
            anyhow::bail!(
                "spec.arbitration.wait_send_global ({:?}) cannot be shorter than wait_check_permission ({:?})",
                timing.wait_send_global,
                timing.wait_check_permission
            );
        }
        if timing.claim_timeout() <= timing.wait_send_global {
            anyhow::bail!("spec.arbitration.claim_timeout must exceed wait_send_global");
        }

        for peer in &self.spec.network.peers {
            if !(peer.starts_with("http://") || peer.starts_with("https://")) {
                anyhow::bail!("Peer '{}' must be an http(s) base URL", peer);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = AgentConfigManifest::default();
        assert_eq!(manifest.api_version, "parknet.io/v1");
        assert_eq!(manifest.kind, "AgentConfig");
        assert!(!manifest.metadata.name.is_empty());
        assert!(!manifest.spec.agent.signature.as_str().is_empty());
        assert_eq!(manifest.spec.arbitration.claim_timeout(), Duration::from_millis(2500));
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_yaml_with_humantime_durations() {
        let yaml = r#"
apiVersion: parknet.io/v1
kind: AgentConfig
metadata:
  name: bay-3
spec:
  agent:
    signature: "c3"
    delta: 62.5
  formation:
    gap:
      multiplier: 0.5
    updater:
      max_delay: 2s
  arbitration:
    wait_first_in_queue: 1500ms
    claim_timeout: 3s
  network:
    port: 9000
    peers:
      - http://10.0.0.11:8021
"#;
        let manifest = AgentConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.spec.agent.signature, Signature::from("c3"));
        assert_eq!(manifest.spec.formation.gap.multiplier, 0.5);
        assert_eq!(manifest.spec.formation.gap.safety_margin, 3.0);
        assert_eq!(manifest.spec.formation.updater.max_delay, Duration::from_secs(2));
        assert_eq!(manifest.spec.formation.updater.min_delay, Duration::from_millis(200));
        assert_eq!(manifest.spec.arbitration.wait_first_in_queue, Duration::from_millis(1500));
        assert_eq!(manifest.spec.arbitration.claim_timeout(), Duration::from_secs(3));
        assert_eq!(manifest.spec.network.local_url(), "http://127.0.0.1:9000");
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parknet-config.yaml");

        let mut manifest = AgentConfigManifest::default();
        manifest.spec.agent.signature = Signature::from("a1");
        manifest.spec.network.peers = vec!["http://peer:8021".to_string()];
        manifest.to_yaml_file(&path).unwrap();

        let loaded = AgentConfigManifest::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.spec.network.peers, vec!["http://peer:8021".to_string()]);
        assert_eq!(loaded.spec.arbitration, ArbitrationConfig::default());
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yaml");
        assert!(AgentConfigManifest::load_or_default(Some(missing)).is_err());
    }

    #[test]
    fn test_generated_signature_is_flagged() {
        assert!(AgentConfigManifest::default().has_generated_signature());

        let configured = AgentConfigManifest::from_yaml_str(
            "apiVersion: parknet.io/v1\nkind: AgentConfig\nmetadata:\n  name: n\nspec:\n  agent:\n    signature: car-1\n",
        )
        .unwrap();
        assert!(!configured.has_generated_signature());
    }

    #[test]
    fn test_overrides() {
        let mut manifest = AgentConfigManifest::default();
        let env: HashMap<&str, &str> = HashMap::from([
            ("PARKNET_SIGNATURE", "b7"),
            ("PARKNET_DELTA", "not-a-number"),
            ("PARKNET_PEERS", "http://a:8021, ,http://b:8021"),
        ]);
        let before = manifest.spec.agent.delta;
        manifest.apply_overrides_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(manifest.spec.agent.signature, Signature::from("b7"));
        assert!(!manifest.has_generated_signature());
        assert_eq!(manifest.spec.agent.delta, before);
        assert_eq!(manifest.spec.network.peers, vec!["http://a:8021", "http://b:8021"]);
    }

    #[test]
    fn test_validation() {
        let mut manifest = AgentConfigManifest::default();
        assert!(manifest.validate().is_ok());

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.spec.agent.signature = Signature::from("");
        assert!(manifest.validate().is_err());
        manifest.spec.agent.signature = Signature::from("a");

        manifest.spec.agent.delta = 0.0;
        assert!(manifest.validate().is_err());
        manifest.spec.agent.delta = 40.0;

        manifest.spec.network.peers = vec!["10.0.0.1:8021".to_string()];
        assert!(manifest.validate().is_err());
        manifest.spec.network.peers.clear();
    }

    #[test]
    fn test_validation_rejects_timing_order() {
        let mut manifest = AgentConfigManifest::default();

        manifest.spec.arbitration.wait_first_in_queue = Duration::from_millis(500);
        assert!(manifest.validate().is_err());
        manifest.spec.arbitration.wait_first_in_queue = Duration::from_secs(2);

        manifest.spec.arbitration.wait_check_permission = Duration::from_millis(600);
        assert!(manifest.validate().is_err());
        manifest.spec.arbitration.wait_check_permission = Duration::from_millis(500);

        manifest.spec.formation.updater.min_delay = Duration::from_secs(5);
        assert!(manifest.validate().is_err());
    }
}
