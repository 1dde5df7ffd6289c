use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use corral_core::config::{BridgesConfig, PathsConfig};
use corral_core::types::{BridgeKind, Task, TaskOutcome};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("probe failed: {0}")]
    Probe(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// ResultEnvelope -- the wire format for delivered results
// ---------------------------------------------------------------------------

/// A `(task id, outcome)` pair as delivered by an external bridge, e.g. the
/// contents of a drop file:
///
/// ```json
/// { "task_id": "…", "outcome": "success", "content": "…" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub task_id: Uuid,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
}

// ---------------------------------------------------------------------------
// RouteHints
// ---------------------------------------------------------------------------

/// Optional model/sampling metadata carried by the routing rule that matched
/// a task, handed to the bridge at dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteHints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

// ---------------------------------------------------------------------------
// AgentBridge
// ---------------------------------------------------------------------------

/// Integration seam between the coordination core and one agent kind.
///
/// Bridges answer liveness probes, receive dispatched tasks together with
/// their routing hints, answer active result polls for stale tasks, and
/// best-effort signal abandonment when a running task is cancelled. Actual
/// task execution happens on the other side of the bridge and is out of
/// scope here.
#[async_trait]
pub trait AgentBridge: Send + Sync {
    fn kind(&self) -> BridgeKind;

    /// Lightweight liveness probe appropriate to the bridge kind.
    async fn ping(&self) -> Result<(), BridgeError>;

    /// Hand a freshly assigned task to the agent's side of the bridge,
    /// along with any model/temperature hints from the matched route.
    async fn submit(&self, task: &Task, hints: &RouteHints) -> Result<(), BridgeError>;

    /// Ask the bridge whether a result for `task` is available. Absence of a
    /// result is not an error; it simply defers to the next poll.
    async fn poll_result(&self, task: &Task) -> Result<Option<TaskOutcome>, BridgeError>;

    /// Signal the external agent to abandon a cancelled task. Best-effort:
    /// the task is already terminal in the store when this is called.
    async fn abandon(&self, task_id: Uuid) -> Result<(), BridgeError>;
}

// ---------------------------------------------------------------------------
// LocalInferenceBridge
// ---------------------------------------------------------------------------

/// Bridge to a locally hosted inference server (Ollama-compatible). Liveness
/// is a GET against `/api/tags`; results come back through the push channel,
/// so polling always defers.
pub struct LocalInferenceBridge {
    base_url: String,
    client: reqwest::Client,
}

impl LocalInferenceBridge {
    pub fn new(base_url: impl Into<String>, probe_timeout: Duration) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder().timeout(probe_timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }
}

#[async_trait]
impl AgentBridge for LocalInferenceBridge {
    fn kind(&self) -> BridgeKind {
        BridgeKind::LocalInference
    }

    async fn ping(&self) -> Result<(), BridgeError> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self.client.get(&url).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(BridgeError::Probe(format!(
                "inference server returned HTTP {}",
                resp.status()
            )))
        }
    }

    async fn submit(&self, task: &Task, hints: &RouteHints) -> Result<(), BridgeError> {
        debug!(
            task_id = %task.id,
            model = hints.model.as_deref().unwrap_or("default"),
            temperature = hints.temperature,
            "task handed to inference runner"
        );
        Ok(())
    }

    async fn poll_result(&self, _task: &Task) -> Result<Option<TaskOutcome>, BridgeError> {
        // Inference results are pushed via the result channel.
        Ok(None)
    }

    async fn abandon(&self, task_id: Uuid) -> Result<(), BridgeError> {
        debug!(task_id = %task_id, "abandon requested for inference task");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileHandoffBridge
// ---------------------------------------------------------------------------

/// Bridge for agents that exchange work through shared directories: outbound
/// task files in `outbox/`, result envelopes dropped into `inbox/`.
pub struct FileHandoffBridge {
    outbox: PathBuf,
    inbox: PathBuf,
}

/// Outbound drop file written to `outbox/<task_id>.json` at dispatch.
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkOrder {
    pub task_id: Uuid,
    pub title: String,
    pub description: String,
    #[serde(flatten)]
    pub hints: RouteHints,
}

impl FileHandoffBridge {
    pub fn new(outbox: impl Into<PathBuf>, inbox: impl Into<PathBuf>) -> Self {
        Self {
            outbox: outbox.into(),
            inbox: inbox.into(),
        }
    }

    fn result_path(&self, task_id: Uuid) -> PathBuf {
        self.inbox.join(format!("{}.json", task_id))
    }
}

#[async_trait]
impl AgentBridge for FileHandoffBridge {
    fn kind(&self) -> BridgeKind {
        BridgeKind::FileHandoff
    }

    async fn ping(&self) -> Result<(), BridgeError> {
        // The handoff is alive when both directories are reachable.
        tokio::fs::create_dir_all(&self.outbox).await?;
        tokio::fs::create_dir_all(&self.inbox).await?;
        Ok(())
    }

    async fn submit(&self, task: &Task, hints: &RouteHints) -> Result<(), BridgeError> {
        tokio::fs::create_dir_all(&self.outbox).await?;
        let order = WorkOrder {
            task_id: task.id,
            title: task.title.clone(),
            description: task.description.clone(),
            hints: hints.clone(),
        };
        let path = self.outbox.join(format!("{}.json", task.id));
        tokio::fs::write(&path, serde_json::to_string_pretty(&order)?).await?;
        info!(task_id = %task.id, path = %path.display(), "work order written");
        Ok(())
    }

    async fn poll_result(&self, task: &Task) -> Result<Option<TaskOutcome>, BridgeError> {
        let path = self.result_path(task.id);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let envelope: ResultEnvelope = serde_json::from_str(&data)?;
        if envelope.task_id != task.id {
            warn!(
                path = %path.display(),
                expected = %task.id,
                found = %envelope.task_id,
                "drop file task id mismatch; ignoring"
            );
            return Ok(None);
        }
        Ok(Some(envelope.outcome))
    }

    async fn abandon(&self, task_id: Uuid) -> Result<(), BridgeError> {
        tokio::fs::create_dir_all(&self.outbox).await?;
        let marker = self.outbox.join(format!("{}.cancel", task_id));
        tokio::fs::write(&marker, b"").await?;
        info!(task_id = %task_id, "cancel marker written");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HumanBridge
// ---------------------------------------------------------------------------

/// Human-in-the-loop bridge. Humans are presumed reachable and deliver
/// results through the same drop channel as file-handoff agents.
pub struct HumanBridge;

#[async_trait]
impl AgentBridge for HumanBridge {
    fn kind(&self) -> BridgeKind {
        BridgeKind::Human
    }

    async fn ping(&self) -> Result<(), BridgeError> {
        Ok(())
    }

    async fn submit(&self, task: &Task, _hints: &RouteHints) -> Result<(), BridgeError> {
        info!(task_id = %task.id, title = %task.title, "task awaiting human pickup");
        Ok(())
    }

    async fn poll_result(&self, _task: &Task) -> Result<Option<TaskOutcome>, BridgeError> {
        Ok(None)
    }

    async fn abandon(&self, task_id: Uuid) -> Result<(), BridgeError> {
        info!(task_id = %task_id, "task abandoned; awaiting human acknowledgement");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// BridgeSet
// ---------------------------------------------------------------------------

/// One bridge instance per kind, shared across the system.
#[derive(Clone)]
pub struct BridgeSet {
    bridges: Arc<HashMap<BridgeKind, Arc<dyn AgentBridge>>>,
}

impl BridgeSet {
    /// Build the standard set from configuration.
    pub fn from_config(bridges: &BridgesConfig, paths: &PathsConfig) -> Result<Self, BridgeError> {
        let mut map: HashMap<BridgeKind, Arc<dyn AgentBridge>> = HashMap::new();
        map.insert(
            BridgeKind::LocalInference,
            Arc::new(LocalInferenceBridge::new(
                bridges.inference_url.clone(),
                Duration::from_secs(bridges.probe_timeout_secs),
            )?),
        );
        map.insert(
            BridgeKind::FileHandoff,
            Arc::new(FileHandoffBridge::new(
                paths.outbox_dir.clone(),
                paths.inbox_dir.clone(),
            )),
        );
        map.insert(BridgeKind::Human, Arc::new(HumanBridge));
        Ok(Self {
            bridges: Arc::new(map),
        })
    }

    /// Build a set from explicit instances (tests swap in mocks here).
    pub fn from_bridges(bridges: Vec<Arc<dyn AgentBridge>>) -> Self {
        let map = bridges.into_iter().map(|b| (b.kind(), b)).collect();
        Self {
            bridges: Arc::new(map),
        }
    }

    pub fn get(&self, kind: BridgeKind) -> Option<Arc<dyn AgentBridge>> {
        self.bridges.get(&kind).cloned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use corral_core::types::TaskSpec;

    fn make_task() -> Task {
        Task::new(TaskSpec::new("test task", "do the thing"))
    }

    #[tokio::test]
    async fn file_handoff_ping_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let bridge =
            FileHandoffBridge::new(dir.path().join("outbox"), dir.path().join("inbox"));
        bridge.ping().await.unwrap();
        assert!(dir.path().join("outbox").is_dir());
        assert!(dir.path().join("inbox").is_dir());
    }

    #[tokio::test]
    async fn file_handoff_poll_absent_defers() {
        let dir = tempfile::tempdir().unwrap();
        let bridge =
            FileHandoffBridge::new(dir.path().join("outbox"), dir.path().join("inbox"));
        bridge.ping().await.unwrap();
        let task = make_task();
        assert!(bridge.poll_result(&task).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_handoff_poll_reads_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        std::fs::create_dir_all(&inbox).unwrap();
        let task = make_task();

        let envelope = ResultEnvelope {
            task_id: task.id,
            outcome: TaskOutcome::Success("answer".into()),
        };
        std::fs::write(
            inbox.join(format!("{}.json", task.id)),
            serde_json::to_string(&envelope).unwrap(),
        )
        .unwrap();

        let bridge = FileHandoffBridge::new(dir.path().join("outbox"), inbox);
        let outcome = bridge.poll_result(&task).await.unwrap().unwrap();
        assert_eq!(outcome, TaskOutcome::Success("answer".into()));
    }

    #[tokio::test]
    async fn file_handoff_poll_rejects_mismatched_id() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        std::fs::create_dir_all(&inbox).unwrap();
        let task = make_task();

        let envelope = ResultEnvelope {
            task_id: Uuid::new_v4(),
            outcome: TaskOutcome::Success("for someone else".into()),
        };
        std::fs::write(
            inbox.join(format!("{}.json", task.id)),
            serde_json::to_string(&envelope).unwrap(),
        )
        .unwrap();

        let bridge = FileHandoffBridge::new(dir.path().join("outbox"), inbox);
        assert!(bridge.poll_result(&task).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_handoff_submit_writes_work_order_with_hints() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = dir.path().join("outbox");
        let bridge = FileHandoffBridge::new(&outbox, dir.path().join("inbox"));
        let task = make_task();
        let hints = RouteHints {
            model: Some("llama3.1".into()),
            temperature: Some(0.2),
        };

        bridge.submit(&task, &hints).await.unwrap();

        let data =
            std::fs::read_to_string(outbox.join(format!("{}.json", task.id))).unwrap();
        let order: WorkOrder = serde_json::from_str(&data).unwrap();
        assert_eq!(order.task_id, task.id);
        assert_eq!(order.title, "test task");
        assert_eq!(order.hints.model.as_deref(), Some("llama3.1"));
        assert_eq!(order.hints.temperature, Some(0.2));
    }

    #[tokio::test]
    async fn file_handoff_abandon_writes_marker() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = dir.path().join("outbox");
        let bridge = FileHandoffBridge::new(&outbox, dir.path().join("inbox"));
        let id = Uuid::new_v4();
        bridge.abandon(id).await.unwrap();
        assert!(outbox.join(format!("{}.cancel", id)).exists());
    }

    #[tokio::test]
    async fn human_bridge_always_reachable() {
        let bridge = HumanBridge;
        bridge.ping().await.unwrap();
        assert!(bridge.poll_result(&make_task()).await.unwrap().is_none());
        bridge.abandon(Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn inference_ping_fails_when_unreachable() {
        // Port 1 is never an inference server.
        let bridge =
            LocalInferenceBridge::new("http://127.0.0.1:1", Duration::from_millis(200)).unwrap();
        assert!(bridge.ping().await.is_err());
    }

    #[test]
    fn bridge_set_resolves_by_kind() {
        let set = BridgeSet::from_bridges(vec![Arc::new(HumanBridge)]);
        assert!(set.get(BridgeKind::Human).is_some());
        assert!(set.get(BridgeKind::LocalInference).is_none());
    }

    #[test]
    fn envelope_wire_format() {
        let json = r#"{ "task_id": "5f4b1c9e-9d0a-4a1e-8f0f-2f31c9f0aa11", "outcome": "failure", "content": "timed out" }"#;
        let envelope: ResultEnvelope = serde_json::from_str(json).unwrap();
        assert!(!envelope.outcome.is_success());
        assert_eq!(envelope.outcome, TaskOutcome::Failure("timed out".into()));
    }
}
