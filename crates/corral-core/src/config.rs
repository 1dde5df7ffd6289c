use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::{BridgeKind, RoutingRule};

/// Top-level configuration loaded from `~/.corral/config.toml`.
///
/// Credentials are never stored here; bridges read any secrets they need
/// from environment variables at runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub bridges: BridgesConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
}

impl Config {
    /// Load config from `~/.corral/config.toml`, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings not expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dispatch.validate()?;
        self.routing.validate()?;
        Ok(())
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".corral")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root for all persisted state (tasks, archive, registry snapshot).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory scanned for agent descriptor files (`*.toml`).
    #[serde(default = "default_agents_dir")]
    pub agents_dir: PathBuf,
    /// Drop directory watched for asynchronously delivered results.
    #[serde(default = "default_inbox_dir")]
    pub inbox_dir: PathBuf,
    /// Directory where the file-handoff bridge deposits outbound work.
    #[serde(default = "default_outbox_dir")]
    pub outbox_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            agents_dir: default_agents_dir(),
            inbox_dir: default_inbox_dir(),
            outbox_dir: default_outbox_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound on `retry_count` for both failed and manual re-runs.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Seconds after which an assigned/running task becomes eligible for an
    /// active result poll.
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,
    /// Consecutive ping failures before an agent is marked offline.
    #[serde(default = "default_ping_failure_threshold")]
    pub ping_failure_threshold: u32,
    /// Per-subscriber event queue depth; a subscriber that falls this far
    /// behind is disconnected rather than stalling publishers.
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

impl DispatchConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.staleness_secs == 0 {
            return Err(ConfigError::Validation(
                "dispatch.staleness_secs must be > 0".into(),
            ));
        }
        if self.ping_failure_threshold == 0 {
            return Err(ConfigError::Validation(
                "dispatch.ping_failure_threshold must be > 0".into(),
            ));
        }
        if self.event_queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "dispatch.event_queue_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            staleness_secs: default_staleness_secs(),
            ping_failure_threshold: default_ping_failure_threshold(),
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgesConfig {
    /// Base URL of the local inference server.
    #[serde(default = "default_inference_url")]
    pub inference_url: String,
    /// Probe timeout in seconds for bridge health checks.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

impl Default for BridgesConfig {
    fn default() -> Self {
        Self {
            inference_url: default_inference_url(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_rules")]
    pub rules: Vec<RoutingRule>,
}

impl RoutingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.rules.iter().any(|r| r.is_wildcard()) {
            return Err(ConfigError::Validation(
                "routing.rules must contain at least one wildcard (keyword-less) rule".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.category.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate routing category: `{}`",
                    rule.category
                )));
            }
        }
        Ok(())
    }

    /// First-declared wildcard rule. Guaranteed present after `validate`.
    pub fn wildcard(&self) -> Option<&RoutingRule> {
        self.rules.iter().find(|r| r.is_wildcard())
    }

    pub fn rule_for(&self, category: &str) -> Option<&RoutingRule> {
        self.rules.iter().find(|r| r.category == category)
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

/// Built-in routing table. Mirrors the categories the keyword classifier
/// understands out of the box; override via `[[routing.rules]]` in config.
fn default_rules() -> Vec<RoutingRule> {
    fn rule(
        category: &str,
        keywords: &[&str],
        agent: &str,
        bridge: BridgeKind,
        weight: i32,
    ) -> RoutingRule {
        RoutingRule {
            category: category.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            agent: agent.to_string(),
            bridge,
            weight,
            model: None,
            temperature: None,
        }
    }

    vec![
        rule(
            "code_complex",
            &["refactor", "security", "audit", "architect", "critical"],
            "cloud-senior",
            BridgeKind::FileHandoff,
            30,
        ),
        rule(
            "architecture",
            &["design", "structure", "blueprint", "schema", "plan"],
            "cloud-architect",
            BridgeKind::FileHandoff,
            25,
        ),
        rule(
            "review",
            &["review", "verify", "validate", "inspect", "assess"],
            "cloud-senior",
            BridgeKind::FileHandoff,
            20,
        ),
        rule(
            "test",
            &["test", "coverage", "spec", "assert"],
            "local-worker",
            BridgeKind::LocalInference,
            15,
        ),
        rule(
            "docs",
            &["doc", "documentation", "readme", "describe"],
            "local-worker",
            BridgeKind::LocalInference,
            10,
        ),
        rule(
            "reasoning",
            &["explain", "reason", "logic", "calculate", "solve"],
            "local-worker",
            BridgeKind::LocalInference,
            10,
        ),
        rule(
            "code_simple",
            &["code", "implement", "function", "script", "debug", "fix"],
            "local-worker",
            BridgeKind::LocalInference,
            5,
        ),
        // Wildcard default: routes anything unmatched.
        rule("general", &[], "local-worker", BridgeKind::LocalInference, 0),
    ]
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_project_name() -> String {
    "corral".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn corral_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".corral")
}

fn default_data_dir() -> PathBuf {
    corral_home().join("data")
}

fn default_agents_dir() -> PathBuf {
    corral_home().join("agents")
}

fn default_inbox_dir() -> PathBuf {
    corral_home().join("inbox")
}

fn default_outbox_dir() -> PathBuf {
    corral_home().join("outbox")
}

fn default_max_retries() -> u32 {
    3
}

fn default_staleness_secs() -> u64 {
    300
}

fn default_ping_failure_threshold() -> u32 {
    3
}

fn default_event_queue_capacity() -> usize {
    256
}

fn default_inference_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_probe_timeout_secs() -> u64 {
    5
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
