use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Returns `true` when a transition from `self` to `target` is valid.
    ///
    /// Valid transitions:
    /// - Pending  -> Assigned | Cancelled
    /// - Assigned -> Running | Cancelled
    /// - Running  -> Done | Failed | Cancelled
    /// - Done     -> Pending   (manual re-run)
    /// - Failed   -> Pending   (retry)
    pub fn can_transition_to(&self, target: &TaskStatus) -> bool {
        matches!(
            (self, target),
            (TaskStatus::Pending, TaskStatus::Assigned)
                | (TaskStatus::Pending, TaskStatus::Cancelled)
                | (TaskStatus::Assigned, TaskStatus::Running)
                | (TaskStatus::Assigned, TaskStatus::Cancelled)
                | (TaskStatus::Running, TaskStatus::Done)
                | (TaskStatus::Running, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Cancelled)
                | (TaskStatus::Done, TaskStatus::Pending)
                | (TaskStatus::Failed, TaskStatus::Pending)
        )
    }

    /// Terminal statuses never transition again except via an explicit retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Statuses that hold an active agent assignment.
    pub fn is_assigned(&self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// TaskPriority
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 0,
    #[default]
    Medium = 1,
    High = 2,
    Critical = 3,
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Critical => "critical",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A unit of work routed to exactly one agent at a time.
///
/// Tasks are owned exclusively by the `TaskStore`; everything else refers to
/// them by `id`. Agents are referenced by name (a lookup key, not a pointer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    /// Name of the agent currently holding the assignment, if any.
    pub assigned_to: Option<String>,
    /// Category assigned by the classifier at dispatch time.
    pub category: Option<String>,
    /// Ids of tasks that must reach `done` before this task may be dispatched.
    pub dependencies: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub retry_count: u32,
}

impl Task {
    pub fn new(spec: TaskSpec) -> Self {
        let now = Utc::now();
        Self {
            id: spec.id.unwrap_or_else(Uuid::new_v4),
            title: spec.title,
            description: spec.description,
            status: TaskStatus::Pending,
            priority: spec.priority,
            assigned_to: None,
            category: None,
            dependencies: spec.dependencies,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
            retry_count: 0,
        }
    }

    /// Combined text used by the classifier.
    pub fn classification_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

/// Creation request for a task. The id is normally assigned by the store;
/// callers may pin one explicitly (result replay, tests).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
}

impl TaskSpec {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            description: description.into(),
            priority: TaskPriority::Medium,
            dependencies: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<Uuid>) -> Self {
        self.dependencies = deps;
        self
    }
}

// ---------------------------------------------------------------------------
// TaskOutcome
// ---------------------------------------------------------------------------

/// The externally produced outcome of a task, delivered asynchronously.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "content")]
pub enum TaskOutcome {
    Success(String),
    Failure(String),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success(_))
    }
}

// ---------------------------------------------------------------------------
// Agent-related types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Active,
    Offline,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Active => "active",
            AgentStatus::Offline => "offline",
        };
        write!(f, "{}", label)
    }
}

/// The integration mechanism connecting the core to an agent kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BridgeKind {
    /// A locally hosted inference server reachable over HTTP.
    LocalInference,
    /// Results exchanged through drop files in a shared directory.
    #[default]
    FileHandoff,
    /// A human in the loop; always considered reachable.
    Human,
}

impl fmt::Display for BridgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BridgeKind::LocalInference => "local_inference",
            BridgeKind::FileHandoff => "file_handoff",
            BridgeKind::Human => "human",
        };
        write!(f, "{}", label)
    }
}

/// A worker capable of executing tasks.
///
/// Agent records are owned exclusively by the `AgentRegistry`. The
/// `current_task` field, when set, must point at a task in `assigned` or
/// `running` whose `assigned_to` equals this agent's name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub capabilities: Vec<String>,
    pub status: AgentStatus,
    pub bridge: BridgeKind,
    pub last_seen: Option<DateTime<Utc>>,
    pub current_task: Option<Uuid>,
    /// Consecutive failed liveness probes. Reset on success; the agent flips
    /// to offline only once this crosses the configured threshold.
    #[serde(default)]
    pub ping_failures: u32,
}

impl Agent {
    pub fn new(name: impl Into<String>, bridge: BridgeKind) -> Self {
        Self {
            name: name.into(),
            capabilities: Vec::new(),
            status: AgentStatus::Idle,
            bridge,
            last_seen: None,
            current_task: None,
            ping_failures: 0,
        }
    }

    pub fn with_capabilities(mut self, caps: Vec<String>) -> Self {
        self.capabilities = caps;
        self
    }

    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.iter().any(|c| c == tag)
    }
}

// ---------------------------------------------------------------------------
// RoutingRule
// ---------------------------------------------------------------------------

/// Maps a task category to a preferred agent and fallback bridge.
///
/// A rule with an empty keyword set is the wildcard default; the rule set
/// must contain at least one so every task is routable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    pub category: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub agent: String,
    #[serde(default)]
    pub bridge: BridgeKind,
    /// Tie-breaking weight; higher wins, declaration order breaks ties.
    #[serde(default)]
    pub weight: i32,
    /// Optional model hint passed through to the bridge.
    #[serde(default)]
    pub model: Option<String>,
    /// Optional sampling temperature hint.
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl RoutingRule {
    pub fn is_wildcard(&self) -> bool {
        self.keywords.is_empty()
    }
}

// ---------------------------------------------------------------------------
// TaskEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Dispatched,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EventKind::Created => "created",
            EventKind::Dispatched => "dispatched",
            EventKind::Running => "running",
            EventKind::Done => "done",
            EventKind::Failed => "failed",
            EventKind::Cancelled => "cancelled",
        };
        write!(f, "{}", label)
    }
}

/// An immutable fact about a task lifecycle transition. Published once to the
/// event bus, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub kind: EventKind,
    pub task_id: Uuid,
    pub agent: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl TaskEvent {
    pub fn new(kind: EventKind, task_id: Uuid, agent: Option<String>) -> Self {
        Self {
            kind,
            task_id,
            agent,
            timestamp: Utc::now(),
            message: String::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_transitions() {
        assert!(TaskStatus::Pending.can_transition_to(&TaskStatus::Assigned));
        assert!(TaskStatus::Pending.can_transition_to(&TaskStatus::Cancelled));
        assert!(!TaskStatus::Pending.can_transition_to(&TaskStatus::Running));
        assert!(!TaskStatus::Pending.can_transition_to(&TaskStatus::Done));
    }

    #[test]
    fn running_transitions() {
        assert!(TaskStatus::Running.can_transition_to(&TaskStatus::Done));
        assert!(TaskStatus::Running.can_transition_to(&TaskStatus::Failed));
        assert!(TaskStatus::Running.can_transition_to(&TaskStatus::Cancelled));
        assert!(!TaskStatus::Running.can_transition_to(&TaskStatus::Assigned));
    }

    #[test]
    fn retry_transitions() {
        assert!(TaskStatus::Failed.can_transition_to(&TaskStatus::Pending));
        assert!(TaskStatus::Done.can_transition_to(&TaskStatus::Pending));
        assert!(!TaskStatus::Cancelled.can_transition_to(&TaskStatus::Pending));
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Done.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Assigned.is_terminal());
    }

    #[test]
    fn priority_ordering() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Medium);
        assert!(TaskPriority::Medium > TaskPriority::Low);
    }

    #[test]
    fn new_task_is_pending() {
        let task = Task::new(TaskSpec::new("title", "desc"));
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.assigned_to.is_none());
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.created_at, task.updated_at);
    }

    #[test]
    fn task_spec_pins_id() {
        let id = Uuid::new_v4();
        let mut spec = TaskSpec::new("t", "d");
        spec.id = Some(id);
        let task = Task::new(spec);
        assert_eq!(task.id, id);
    }

    #[test]
    fn status_serde_snake_case() {
        let json = serde_json::to_string(&TaskStatus::Assigned).unwrap();
        assert_eq!(json, "\"assigned\"");
        let back: TaskStatus = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(back, TaskStatus::Cancelled);
    }

    #[test]
    fn outcome_serde_tagged() {
        let out = TaskOutcome::Success("it worked".into());
        let json = serde_json::to_string(&out).unwrap();
        let back: TaskOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back, out);
        assert!(back.is_success());
    }

    #[test]
    fn wildcard_rule_detection() {
        let rule = RoutingRule {
            category: "general".into(),
            keywords: vec![],
            agent: "fallback".into(),
            bridge: BridgeKind::LocalInference,
            weight: 0,
            model: None,
            temperature: None,
        };
        assert!(rule.is_wildcard());
    }
}
