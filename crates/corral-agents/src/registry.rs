use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use corral_core::types::{Agent, AgentStatus, BridgeKind};
use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bridge::BridgeSet;
use crate::descriptor;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("agent not found: `{0}`")]
    NotFound(String),
    #[error("invalid transition for agent `{agent}`: {detail}")]
    InvalidTransition { agent: String, detail: String },
    #[error("no bridge registered for kind `{0}`")]
    UnknownBridge(BridgeKind),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Filters / summaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub status: Option<AgentStatus>,
    pub capability: Option<String>,
}

impl AgentFilter {
    fn matches(&self, agent: &Agent) -> bool {
        if let Some(status) = self.status {
            if agent.status != status {
                return false;
            }
        }
        if let Some(ref tag) = self.capability {
            if !agent.has_capability(tag) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Default, Clone)]
pub struct RefreshSummary {
    pub discovered: usize,
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
}

// ---------------------------------------------------------------------------
// AgentRegistry
// ---------------------------------------------------------------------------

/// The authoritative list of known agents and their live status.
///
/// Agents enter through descriptor scans and are never removed: an agent
/// whose descriptor disappears stays registered and only flips to `offline`
/// after enough failed liveness probes. Per-agent state changes go through
/// the map's per-entry locking; `list` preserves insertion order.
///
/// When a snapshot path is set the registry persists itself after every
/// mutation and reloads on startup exactly as persisted, assignments
/// included. An `active` agent that still acknowledges its task keeps it
/// across a restart; mismatched pairs are sorted out by the startup
/// reconciliation pass, not by the reload.
pub struct AgentRegistry {
    agents: DashMap<String, Agent>,
    order: Mutex<Vec<String>>,
    snapshot_path: Option<PathBuf>,
    offline_threshold: u32,
}

impl AgentRegistry {
    /// Create an empty, non-persistent registry.
    pub fn new(offline_threshold: u32) -> Self {
        Self {
            agents: DashMap::new(),
            order: Mutex::new(Vec::new()),
            snapshot_path: None,
            offline_threshold: offline_threshold.max(1),
        }
    }

    /// Create a registry persisted at `path`, loading the previous snapshot
    /// when one exists.
    pub fn with_snapshot(
        path: impl Into<PathBuf>,
        offline_threshold: u32,
    ) -> Result<Self, RegistryError> {
        let path = path.into();
        let mut registry = Self::new(offline_threshold);
        registry.snapshot_path = Some(path.clone());

        if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            let snapshot: Vec<Agent> = serde_json::from_str(&data)?;
            let mut order = registry.order.lock().expect("registry order lock poisoned");
            for agent in snapshot {
                order.push(agent.name.clone());
                registry.agents.insert(agent.name.clone(), agent);
            }
            info!(agents = order.len(), "registry snapshot loaded");
        }
        Ok(registry)
    }

    fn save_snapshot(&self) {
        let Some(ref path) = self.snapshot_path else {
            return;
        };
        // Serialize in insertion order; the order lock also serializes
        // concurrent snapshot writes.
        let order = self.order.lock().expect("registry order lock poisoned");
        let agents: Vec<Agent> = order
            .iter()
            .filter_map(|name| self.agents.get(name).map(|a| a.clone()))
            .collect();
        let json = match serde_json::to_string_pretty(&agents) {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, "failed to serialize registry snapshot");
                return;
            }
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(path, json) {
            warn!(path = %path.display(), error = %e, "failed to write registry snapshot");
        }
    }

    // -----------------------------------------------------------------------
    // Discovery
    // -----------------------------------------------------------------------

    /// Rescan the descriptor directory. Newly discovered agents are added as
    /// `idle`; existing agents get their capabilities and bridge refreshed
    /// but keep their live status. Agents missing from the scan are never
    /// removed, which guards against a transient scan failure wiping state.
    pub fn refresh(&self, agents_dir: &Path) -> RefreshSummary {
        let outcome = descriptor::scan_dir(agents_dir);
        let mut summary = RefreshSummary {
            discovered: outcome.descriptors.len(),
            skipped: outcome.skipped,
            ..Default::default()
        };

        for desc in outcome.descriptors {
            if let Some(mut existing) = self.agents.get_mut(&desc.name) {
                existing.capabilities = desc.capabilities;
                existing.bridge = desc.bridge;
                summary.updated += 1;
                continue;
            }
            let agent = Agent::new(desc.name.clone(), desc.bridge)
                .with_capabilities(desc.capabilities);
            debug!(name = %agent.name, bridge = %agent.bridge, "agent registered");
            self.agents.insert(desc.name.clone(), agent);
            self.order
                .lock()
                .expect("registry order lock poisoned")
                .push(desc.name);
            summary.added += 1;
        }

        info!(
            discovered = summary.discovered,
            added = summary.added,
            skipped = summary.skipped,
            "agent refresh complete"
        );
        self.save_snapshot();
        summary
    }

    // -----------------------------------------------------------------------
    // Read
    // -----------------------------------------------------------------------

    pub fn get(&self, name: &str) -> Result<Agent, RegistryError> {
        self.agents
            .get(name)
            .map(|a| a.clone())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// List agents in insertion order, optionally filtered by status or
    /// capability tag.
    pub fn list(&self, filter: Option<&AgentFilter>) -> Vec<Agent> {
        let order = self.order.lock().expect("registry order lock poisoned");
        order
            .iter()
            .filter_map(|name| self.agents.get(name).map(|a| a.clone()))
            .filter(|a| filter.map(|f| f.matches(a)).unwrap_or(true))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.agents.len()
    }

    /// Returns `true` when `name` currently acknowledges `task_id`. Used by
    /// the startup reconciliation pass.
    pub fn is_linked(&self, name: &str, task_id: Uuid) -> bool {
        self.agents
            .get(name)
            .map(|a| a.current_task == Some(task_id))
            .unwrap_or(false)
    }

    // -----------------------------------------------------------------------
    // State transitions (dispatcher / ingestor only)
    // -----------------------------------------------------------------------

    /// Bind an agent to a task. Fails when the agent is offline or already
    /// busy with a different task; re-binding to the same task is a no-op.
    pub fn mark_busy(&self, name: &str, task_id: Uuid) -> Result<Agent, RegistryError> {
        let updated = {
            let mut agent = self
                .agents
                .get_mut(name)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
            if agent.status == AgentStatus::Offline {
                return Err(RegistryError::InvalidTransition {
                    agent: name.to_string(),
                    detail: "agent is offline".to_string(),
                });
            }
            if let Some(existing) = agent.current_task {
                if existing != task_id {
                    return Err(RegistryError::InvalidTransition {
                        agent: name.to_string(),
                        detail: format!("already busy with task `{}`", existing),
                    });
                }
            }
            agent.status = AgentStatus::Active;
            agent.current_task = Some(task_id);
            agent.clone()
        };
        debug!(agent = %name, task_id = %task_id, "agent marked busy");
        self.save_snapshot();
        Ok(updated)
    }

    /// Release an agent's assignment. A delivered result doubles as proof of
    /// liveness, so `last_seen` is refreshed and the failure counter reset.
    pub fn mark_idle(&self, name: &str) -> Result<Agent, RegistryError> {
        let updated = {
            let mut agent = self
                .agents
                .get_mut(name)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
            agent.status = AgentStatus::Idle;
            agent.current_task = None;
            agent.last_seen = Some(Utc::now());
            agent.ping_failures = 0;
            agent.clone()
        };
        debug!(agent = %name, "agent marked idle");
        self.save_snapshot();
        Ok(updated)
    }

    // -----------------------------------------------------------------------
    // Liveness
    // -----------------------------------------------------------------------

    /// Probe an agent through its bridge and record the outcome. Returns
    /// `true` on a successful probe.
    pub async fn ping(&self, name: &str, bridges: &BridgeSet) -> Result<bool, RegistryError> {
        let agent = self.get(name)?;
        let bridge = bridges
            .get(agent.bridge)
            .ok_or(RegistryError::UnknownBridge(agent.bridge))?;
        let ok = bridge.ping().await.is_ok();
        self.record_ping(name, ok)?;
        Ok(ok)
    }

    /// Record a probe outcome. A success refreshes `last_seen` and recovers
    /// an offline agent; failures accumulate and flip the agent to offline
    /// only once the consecutive-failure threshold is crossed, so a single
    /// transient hiccup never takes an agent out.
    pub fn record_ping(&self, name: &str, ok: bool) -> Result<Agent, RegistryError> {
        let updated = {
            let mut agent = self
                .agents
                .get_mut(name)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
            if ok {
                agent.last_seen = Some(Utc::now());
                agent.ping_failures = 0;
                if agent.status == AgentStatus::Offline {
                    agent.status = AgentStatus::Idle;
                    info!(agent = %name, "agent back online");
                }
            } else {
                agent.ping_failures += 1;
                if agent.ping_failures >= self.offline_threshold {
                    if agent.status == AgentStatus::Active {
                        // Leave the assignment intact; the staleness poll
                        // decides the task's fate.
                        warn!(
                            agent = %name,
                            failures = agent.ping_failures,
                            "busy agent unresponsive"
                        );
                    } else if agent.status != AgentStatus::Offline {
                        agent.status = AgentStatus::Offline;
                        warn!(agent = %name, failures = agent.ping_failures, "agent marked offline");
                    }
                }
            }
            agent.clone()
        };
        self.save_snapshot();
        Ok(updated)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
