use std::collections::HashMap;
use std::sync::Arc;

use corral_agents::bridge::{BridgeError, BridgeSet};
use corral_agents::registry::{AgentFilter, AgentRegistry, RefreshSummary, RegistryError};
use corral_bus::EventBus;
use corral_core::config::Config;
use corral_core::task_store::{StoreError, TaskFilter, TaskSort, TaskStore};
use corral_core::types::{Agent, EventKind, Task, TaskEvent, TaskOutcome, TaskSpec, TaskStatus};
use tracing::{info, warn};
use uuid::Uuid;

use crate::channel::ResultChannel;
use crate::dispatcher::{DispatchError, Dispatcher};
use crate::ingestor::{IngestError, ResultIngestor};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    #[error("task `{id}` cannot be retried from `{status}`")]
    NotRetryable { id: Uuid, status: TaskStatus },
    #[error("retry limit reached for task `{id}` ({count}/{max})")]
    RetryLimitExceeded { id: Uuid, count: u32, max: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Single entry point for embedders: owns the store, registry, bridges,
/// dispatcher, and ingestor, and exposes the whole task lifecycle as one
/// coherent API.
///
/// Opening a coordinator runs the startup reconciliation pass: an
/// `assigned`/`running` task whose agent still acknowledges it survives the
/// restart untouched (its result can arrive later as if nothing happened),
/// while a task whose agent no longer acknowledges it goes back to
/// `pending`, and an agent pointing at a task that is no longer in flight is
/// released. No work is silently stranded by a crash, and none is
/// needlessly redone.
pub struct Coordinator {
    config: Config,
    store: Arc<TaskStore>,
    registry: Arc<AgentRegistry>,
    bridges: BridgeSet,
    dispatcher: Dispatcher,
    ingestor: ResultIngestor,
    bus: EventBus,
}

impl Coordinator {
    /// Open a coordinator backed by the directories in `config`.
    pub async fn open(config: Config) -> Result<Self, CoordinationError> {
        let bridges = BridgeSet::from_config(&config.bridges, &config.paths)?;
        Self::assemble(config, bridges).await
    }

    /// Open with an explicit bridge set (tests inject mocks here).
    pub async fn assemble(
        config: Config,
        bridges: BridgeSet,
    ) -> Result<Self, CoordinationError> {
        let store = Arc::new(TaskStore::open(&config.paths.data_dir)?);
        let registry = Arc::new(AgentRegistry::with_snapshot(
            config.paths.data_dir.join("registry.json"),
            config.dispatch.ping_failure_threshold,
        )?);
        registry.refresh(&config.paths.agents_dir);

        let bus = EventBus::with_capacity(config.dispatch.event_queue_capacity);
        let dispatcher = Dispatcher::new(
            store.clone(),
            registry.clone(),
            config.routing.clone(),
            bridges.clone(),
            bus.clone(),
        );
        let ingestor = ResultIngestor::new(
            store.clone(),
            registry.clone(),
            bus.clone(),
            config.dispatch.staleness_secs,
        );

        // Reconcile in-flight work from a previous run. Acknowledged
        // task/agent pairs stay assigned; only unacknowledged tasks revert.
        let reg = registry.clone();
        let repaired = store
            .repair_orphaned(|t| {
                t.assigned_to
                    .as_deref()
                    .map(|agent| reg.is_linked(agent, t.id))
                    .unwrap_or(false)
            })
            .await?;
        if !repaired.is_empty() {
            info!(count = repaired.len(), "startup reconciliation returned tasks to pending");
        }

        // The mirror image: release any agent whose recorded task is no
        // longer in flight for it (missing, terminal, or just reverted).
        for agent in registry.list(None) {
            let Some(task_id) = agent.current_task else {
                continue;
            };
            let live = store
                .get(task_id)
                .map(|t| {
                    t.status.is_assigned()
                        && t.assigned_to.as_deref() == Some(agent.name.as_str())
                })
                .unwrap_or(false);
            if !live {
                warn!(agent = %agent.name, task_id = %task_id, "releasing stale agent assignment");
                if let Err(e) = registry.mark_idle(&agent.name) {
                    warn!(agent = %agent.name, error = %e, "failed to release agent");
                }
            }
        }

        Ok(Self {
            config,
            store,
            registry,
            bridges,
            dispatcher,
            ingestor,
            bus,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Task lifecycle
    // -----------------------------------------------------------------------

    /// Create a task in `pending` and announce it on the bus.
    pub async fn create(&self, spec: TaskSpec) -> Result<Task, CoordinationError> {
        let task = self
            .store
            .create_then(spec, |t| {
                self.bus.publish(
                    TaskEvent::new(EventKind::Created, t.id, None)
                        .with_message(format!("task '{}' created", t.title)),
                );
            })
            .await?;
        Ok(task)
    }

    /// Route and assign a pending task, optionally to a named agent.
    pub async fn dispatch(
        &self,
        task_id: Uuid,
        override_agent: Option<&str>,
    ) -> Result<Task, CoordinationError> {
        Ok(self.dispatcher.dispatch(task_id, override_agent).await?)
    }

    /// Record that the assigned agent has started working. The event is
    /// published inside the transition's critical section so a concurrent
    /// result can never announce completion first.
    pub async fn begin(&self, task_id: Uuid) -> Result<Task, CoordinationError> {
        let task = self
            .store
            .transition_then(task_id, TaskStatus::Running, |_| {}, |t| {
                self.bus.publish(
                    TaskEvent::new(EventKind::Running, task_id, t.assigned_to.clone())
                        .with_message(format!("task '{}' running", t.title)),
                );
            })
            .await?;
        Ok(task)
    }

    /// Apply an externally delivered outcome.
    pub async fn ingest(
        &self,
        task_id: Uuid,
        outcome: TaskOutcome,
    ) -> Result<Task, CoordinationError> {
        Ok(self.ingestor.ingest(task_id, outcome).await?)
    }

    /// Drain a result channel and ingest everything it delivered. Returns
    /// the ids of tasks resolved this pass; individual ingest failures are
    /// logged and skipped so one bad envelope never blocks the rest.
    pub async fn pump(&self, channel: &mut dyn ResultChannel) -> Vec<Uuid> {
        let mut resolved = Vec::new();
        for envelope in channel.drain() {
            match self.ingestor.ingest(envelope.task_id, envelope.outcome).await {
                Ok(task) => resolved.push(task.id),
                Err(e) => {
                    warn!(task_id = %envelope.task_id, error = %e, "failed to ingest channel result")
                }
            }
        }
        resolved
    }

    /// Actively poll bridges for results of stale in-flight tasks.
    pub async fn poll_stale(&self) -> Vec<Uuid> {
        self.ingestor.poll_stale(&self.bridges).await
    }

    /// Return a `done` or `failed` task to `pending` for another attempt.
    ///
    /// Clears the previous outcome and assignment so the next dispatch
    /// classifies and routes from scratch. Bounded by
    /// `dispatch.max_retries`; no event is published, re-dispatch announces
    /// itself.
    pub async fn retry(&self, task_id: Uuid) -> Result<Task, CoordinationError> {
        let task = self.store.get(task_id)?;
        if !matches!(task.status, TaskStatus::Done | TaskStatus::Failed) {
            return Err(CoordinationError::NotRetryable {
                id: task_id,
                status: task.status,
            });
        }
        let max = self.config.dispatch.max_retries;
        if task.retry_count >= max {
            return Err(CoordinationError::RetryLimitExceeded {
                id: task_id,
                count: task.retry_count,
                max,
            });
        }

        let retried = self
            .store
            .transition(task_id, TaskStatus::Pending, |t| {
                t.assigned_to = None;
                t.category = None;
                t.result = None;
                t.error = None;
                t.retry_count += 1;
            })
            .await?;
        info!(task_id = %task_id, attempt = retried.retry_count, "task returned for retry");
        Ok(retried)
    }

    /// Cancel a task from any non-terminal state.
    ///
    /// The store transition decides the outcome; releasing the agent and
    /// signalling abandonment through its bridge are best-effort follow-ups.
    pub async fn cancel(&self, task_id: Uuid) -> Result<Task, CoordinationError> {
        let cancelled = self
            .store
            .transition_then(task_id, TaskStatus::Cancelled, |_| {}, |t| {
                self.bus.publish(
                    TaskEvent::new(EventKind::Cancelled, task_id, t.assigned_to.clone())
                        .with_message(format!("task '{}' cancelled", t.title)),
                );
            })
            .await?;

        if let Some(ref agent_name) = cancelled.assigned_to {
            if let Err(e) = self.registry.mark_idle(agent_name) {
                warn!(task_id = %task_id, agent = %agent_name, error = %e, "failed to release agent on cancel");
            }
            match self.registry.get(agent_name) {
                Ok(agent) => {
                    if let Some(bridge) = self.bridges.get(agent.bridge) {
                        if let Err(e) = bridge.abandon(task_id).await {
                            warn!(task_id = %task_id, error = %e, "abandon signal failed");
                        }
                    }
                }
                Err(e) => {
                    warn!(task_id = %task_id, agent = %agent_name, error = %e, "cancelled task agent unknown")
                }
            }
        }

        info!(task_id = %task_id, "task cancelled");
        Ok(cancelled)
    }

    /// Replace a pending task's dependencies.
    pub async fn update_dependencies(
        &self,
        task_id: Uuid,
        dependencies: Vec<Uuid>,
    ) -> Result<Task, CoordinationError> {
        Ok(self.store.update_dependencies(task_id, dependencies).await?)
    }

    /// Move a terminal task into the archive.
    pub async fn archive(&self, task_id: Uuid) -> Result<Task, CoordinationError> {
        Ok(self.store.archive(task_id).await?)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn task(&self, task_id: Uuid) -> Result<Task, CoordinationError> {
        Ok(self.store.get(task_id)?)
    }

    pub fn tasks(&self, filter: &TaskFilter, sort: TaskSort) -> Vec<Task> {
        self.store.list(filter, sort)
    }

    pub fn stats(&self) -> HashMap<TaskStatus, usize> {
        self.store.stats()
    }

    pub fn history(&self, limit: usize) -> Vec<Task> {
        self.store.history(limit)
    }

    // -----------------------------------------------------------------------
    // Agents
    // -----------------------------------------------------------------------

    pub fn agent(&self, name: &str) -> Result<Agent, CoordinationError> {
        Ok(self.registry.get(name)?)
    }

    pub fn agents(&self, filter: Option<&AgentFilter>) -> Vec<Agent> {
        self.registry.list(filter)
    }

    /// Rescan the descriptor directory for new or changed agents.
    pub fn refresh_agents(&self) -> RefreshSummary {
        self.registry.refresh(&self.config.paths.agents_dir)
    }

    /// Probe one agent's liveness through its bridge.
    pub async fn ping_agent(&self, name: &str) -> Result<bool, CoordinationError> {
        Ok(self.registry.ping(name, &self.bridges).await?)
    }

    /// Probe every known agent concurrently; returns `(name, reachable)`
    /// pairs in roster order.
    pub async fn ping_all(&self) -> Vec<(String, bool)> {
        let mut probes = Vec::new();
        for agent in self.registry.list(None) {
            let registry = self.registry.clone();
            let bridges = self.bridges.clone();
            probes.push(tokio::spawn(async move {
                let ok = match registry.ping(&agent.name, &bridges).await {
                    Ok(ok) => ok,
                    Err(e) => {
                        warn!(agent = %agent.name, error = %e, "ping failed");
                        false
                    }
                };
                (agent.name, ok)
            }));
        }

        let mut results = Vec::new();
        for probe in probes {
            if let Ok(result) = probe.await {
                results.push(result);
            }
        }
        results
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Subscribe to lifecycle events published after this call.
    pub fn subscribe(&self) -> flume::Receiver<TaskEvent> {
        self.bus.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::CallbackChannel;
    use async_trait::async_trait;
    use corral_agents::bridge::{AgentBridge, ResultEnvelope, RouteHints};
    use corral_core::types::{AgentStatus, BridgeKind};
    use std::path::Path;
    use std::sync::Mutex;

    struct RecordingBridge {
        abandoned: Mutex<Vec<Uuid>>,
    }

    impl RecordingBridge {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                abandoned: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AgentBridge for RecordingBridge {
        fn kind(&self) -> BridgeKind {
            BridgeKind::FileHandoff
        }

        async fn ping(&self) -> Result<(), BridgeError> {
            Ok(())
        }

        async fn submit(&self, _task: &Task, _hints: &RouteHints) -> Result<(), BridgeError> {
            Ok(())
        }

        async fn poll_result(&self, _task: &Task) -> Result<Option<TaskOutcome>, BridgeError> {
            Ok(None)
        }

        async fn abandon(&self, task_id: Uuid) -> Result<(), BridgeError> {
            self.abandoned.lock().unwrap().push(task_id);
            Ok(())
        }
    }

    fn write_descriptor(dir: &Path, name: &str) {
        std::fs::write(
            dir.join(format!("{}.toml", name)),
            format!("name = \"{}\"\nbridge = \"file_handoff\"\n", name),
        )
        .unwrap();
    }

    fn test_config(root: &Path, agents: &[&str]) -> Config {
        let agents_dir = root.join("agents");
        std::fs::create_dir_all(&agents_dir).unwrap();
        for name in agents {
            write_descriptor(&agents_dir, name);
        }

        let mut config = Config::default();
        config.paths.data_dir = root.join("data");
        config.paths.agents_dir = agents_dir;
        config.paths.inbox_dir = root.join("inbox");
        config.paths.outbox_dir = root.join("outbox");
        // Point every default rule at the single test agent.
        for rule in &mut config.routing.rules {
            rule.agent = "worker".into();
            rule.bridge = BridgeKind::FileHandoff;
        }
        config
    }

    async fn coordinator(
        root: &Path,
        bridge: Arc<RecordingBridge>,
    ) -> Coordinator {
        let config = test_config(root, &["worker"]);
        Coordinator::assemble(config, BridgeSet::from_bridges(vec![bridge]))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn full_lifecycle_emits_events_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path(), RecordingBridge::new()).await;
        let rx = coord.subscribe();

        let task = coord.create(TaskSpec::new("ship it", "")).await.unwrap();
        coord.dispatch(task.id, None).await.unwrap();
        coord.begin(task.id).await.unwrap();
        coord
            .ingest(task.id, TaskOutcome::Success("shipped".into()))
            .await
            .unwrap();

        let kinds: Vec<EventKind> = rx.try_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Created,
                EventKind::Dispatched,
                EventKind::Running,
                EventKind::Done
            ]
        );

        let done = coord.task(task.id).unwrap();
        assert_eq!(done.status, TaskStatus::Done);
        assert_eq!(done.result.as_deref(), Some("shipped"));
        assert_eq!(
            coord.agent("worker").unwrap().status,
            AgentStatus::Idle
        );
    }

    #[tokio::test]
    async fn retry_clears_outcome_and_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path(), RecordingBridge::new()).await;

        let task = coord.create(TaskSpec::new("flaky", "")).await.unwrap();
        for attempt in 0..coord.config().dispatch.max_retries {
            coord.dispatch(task.id, None).await.unwrap();
            coord.begin(task.id).await.unwrap();
            coord
                .ingest(task.id, TaskOutcome::Failure(format!("boom {}", attempt)))
                .await
                .unwrap();

            let retried = coord.retry(task.id).await.unwrap();
            assert_eq!(retried.status, TaskStatus::Pending);
            assert!(retried.error.is_none());
            assert!(retried.assigned_to.is_none());
            assert_eq!(retried.retry_count, attempt + 1);
        }

        coord.dispatch(task.id, None).await.unwrap();
        coord.begin(task.id).await.unwrap();
        coord
            .ingest(task.id, TaskOutcome::Failure("final".into()))
            .await
            .unwrap();

        let err = coord.retry(task.id).await.unwrap_err();
        assert!(matches!(err, CoordinationError::RetryLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn done_task_can_be_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path(), RecordingBridge::new()).await;

        let task = coord.create(TaskSpec::new("again", "")).await.unwrap();
        coord.dispatch(task.id, None).await.unwrap();
        coord.begin(task.id).await.unwrap();
        coord
            .ingest(task.id, TaskOutcome::Success("v1".into()))
            .await
            .unwrap();

        let rerun = coord.retry(task.id).await.unwrap();
        assert_eq!(rerun.status, TaskStatus::Pending);
        assert!(rerun.result.is_none());
    }

    #[tokio::test]
    async fn retrying_an_archived_task_names_the_archive() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path(), RecordingBridge::new()).await;

        let task = coord.create(TaskSpec::new("filed away", "")).await.unwrap();
        coord.dispatch(task.id, None).await.unwrap();
        coord.begin(task.id).await.unwrap();
        coord
            .ingest(task.id, TaskOutcome::Success("v1".into()))
            .await
            .unwrap();
        coord.archive(task.id).await.unwrap();

        let err = coord.retry(task.id).await.unwrap_err();
        assert!(matches!(
            err,
            CoordinationError::Store(StoreError::Archived(_))
        ));
    }

    #[tokio::test]
    async fn cancelled_task_is_not_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path(), RecordingBridge::new()).await;

        let task = coord.create(TaskSpec::new("doomed", "")).await.unwrap();
        coord.cancel(task.id).await.unwrap();

        let err = coord.retry(task.id).await.unwrap_err();
        assert!(matches!(
            err,
            CoordinationError::NotRetryable {
                status: TaskStatus::Cancelled,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn cancel_running_task_frees_agent_and_signals_bridge() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = RecordingBridge::new();
        let coord = coordinator(dir.path(), bridge.clone()).await;

        let task = coord.create(TaskSpec::new("abort me", "")).await.unwrap();
        coord.dispatch(task.id, None).await.unwrap();
        coord.begin(task.id).await.unwrap();

        let rx = coord.subscribe();
        let cancelled = coord.cancel(task.id).await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert_eq!(coord.agent("worker").unwrap().status, AgentStatus::Idle);
        assert_eq!(*bridge.abandoned.lock().unwrap(), vec![task.id]);
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::Cancelled);

        // Cancel is not re-entrant: the task is already terminal.
        let err = coord.cancel(task.id).await.unwrap_err();
        assert!(matches!(
            err,
            CoordinationError::Store(StoreError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn late_result_after_cancel_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path(), RecordingBridge::new()).await;

        let task = coord.create(TaskSpec::new("slow", "")).await.unwrap();
        coord.dispatch(task.id, None).await.unwrap();
        coord.begin(task.id).await.unwrap();
        coord.cancel(task.id).await.unwrap();

        let still = coord
            .ingest(task.id, TaskOutcome::Success("too late".into()))
            .await
            .unwrap();
        assert_eq!(still.status, TaskStatus::Cancelled);
        assert!(still.result.is_none());
    }

    #[tokio::test]
    async fn pump_ingests_channel_envelopes() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path(), RecordingBridge::new()).await;

        let task = coord.create(TaskSpec::new("pushed", "")).await.unwrap();
        coord.dispatch(task.id, None).await.unwrap();

        let (sink, mut channel) = CallbackChannel::unbounded();
        sink.deliver(ResultEnvelope {
            task_id: task.id,
            outcome: TaskOutcome::Success("from the sink".into()),
        });
        // An envelope for an unknown task is logged and skipped.
        sink.deliver(ResultEnvelope {
            task_id: Uuid::new_v4(),
            outcome: TaskOutcome::Success("nobody".into()),
        });

        let resolved = coord.pump(&mut channel).await;
        assert_eq!(resolved, vec![task.id]);
        assert_eq!(coord.task(task.id).unwrap().status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn reopen_keeps_acknowledged_work_and_accepts_its_result() {
        let dir = tempfile::tempdir().unwrap();
        let task_id = {
            let coord = coordinator(dir.path(), RecordingBridge::new()).await;
            let task = coord.create(TaskSpec::new("in flight", "")).await.unwrap();
            coord.dispatch(task.id, None).await.unwrap();
            coord.begin(task.id).await.unwrap();
            task.id
        };

        // A restart finds the agent still acknowledging the task, so the
        // pair survives intact rather than being reset to pending.
        let coord = coordinator(dir.path(), RecordingBridge::new()).await;
        let task = coord.task(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.assigned_to.as_deref(), Some("worker"));
        assert_eq!(coord.agent("worker").unwrap().status, AgentStatus::Active);

        // The result that was in flight during the restart lands normally.
        let done = coord
            .ingest(task_id, TaskOutcome::Success("finished".into()))
            .await
            .unwrap();
        assert_eq!(done.status, TaskStatus::Done);
        assert_eq!(done.result.as_deref(), Some("finished"));
        assert_eq!(coord.agent("worker").unwrap().status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn reopen_reconciles_orphaned_assignments() {
        let dir = tempfile::tempdir().unwrap();
        let task_id = {
            let coord = coordinator(dir.path(), RecordingBridge::new()).await;
            let task = coord.create(TaskSpec::new("stranded", "")).await.unwrap();
            coord.dispatch(task.id, None).await.unwrap();
            coord.begin(task.id).await.unwrap();
            task.id
        };
        // The registry snapshot is gone: the task's agent no longer
        // acknowledges it on reload.
        std::fs::remove_file(dir.path().join("data").join("registry.json")).unwrap();

        let coord = coordinator(dir.path(), RecordingBridge::new()).await;
        let task = coord.task(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.assigned_to.is_none());
        assert_eq!(coord.agent("worker").unwrap().status, AgentStatus::Idle);

        // And it can be dispatched again.
        coord.dispatch(task_id, None).await.unwrap();
    }

    #[tokio::test]
    async fn reopen_releases_agent_whose_task_vanished() {
        let dir = tempfile::tempdir().unwrap();
        let task_id = {
            let coord = coordinator(dir.path(), RecordingBridge::new()).await;
            let task = coord.create(TaskSpec::new("gone", "")).await.unwrap();
            coord.dispatch(task.id, None).await.unwrap();
            task.id
        };
        // The task record disappears but the snapshot still names it.
        std::fs::remove_file(
            dir.path()
                .join("data")
                .join("tasks")
                .join(format!("{}.json", task_id)),
        )
        .unwrap();

        let coord = coordinator(dir.path(), RecordingBridge::new()).await;
        let agent = coord.agent("worker").unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
        assert!(agent.current_task.is_none());
    }

    #[tokio::test]
    async fn concurrent_start_and_result_keep_event_order() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path(), RecordingBridge::new()).await;

        // Whichever side wins the race, subscribers must never see the
        // completion before the start.
        for round in 0..10 {
            let task = coord
                .create(TaskSpec::new(format!("round {}", round), ""))
                .await
                .unwrap();
            coord.dispatch(task.id, None).await.unwrap();

            let rx = coord.subscribe();
            let (_begun, ingested) = tokio::join!(
                coord.begin(task.id),
                coord.ingest(task.id, TaskOutcome::Success("raced".into())),
            );
            // `begin` may lose the race outright; the result always lands.
            assert!(ingested.is_ok());
            assert_eq!(coord.task(task.id).unwrap().status, TaskStatus::Done);

            let kinds: Vec<EventKind> = rx.try_iter().map(|e| e.kind).collect();
            assert_eq!(kinds, vec![EventKind::Running, EventKind::Done]);
        }
    }

    #[tokio::test]
    async fn stats_reflect_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path(), RecordingBridge::new()).await;

        let a = coord.create(TaskSpec::new("a", "")).await.unwrap();
        coord.create(TaskSpec::new("b", "")).await.unwrap();
        coord.cancel(a.id).await.unwrap();

        let stats = coord.stats();
        assert_eq!(stats.get(&TaskStatus::Pending), Some(&1));
        assert_eq!(stats.get(&TaskStatus::Cancelled), Some(&1));
    }

    #[tokio::test]
    async fn ping_all_reports_each_agent() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path(), RecordingBridge::new()).await;

        let results = coord.ping_all().await;
        assert_eq!(results, vec![("worker".to_string(), true)]);
        assert!(coord.agent("worker").unwrap().last_seen.is_some());
    }
}
