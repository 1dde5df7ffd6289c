use std::sync::Arc;

use chrono::{Duration, Utc};
use corral_agents::bridge::BridgeSet;
use corral_agents::registry::{AgentRegistry, RegistryError};
use corral_bus::EventBus;
use corral_core::task_store::{StoreError, TaskFilter, TaskSort, TaskStore};
use corral_core::types::{EventKind, Task, TaskEvent, TaskOutcome, TaskStatus};
use tracing::{debug, info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("task not found: `{0}`")]
    NotFound(Uuid),
    #[error("task `{id}` cannot accept a result in state `{status}`")]
    InvalidState { id: Uuid, status: TaskStatus },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

// ---------------------------------------------------------------------------
// ResultIngestor
// ---------------------------------------------------------------------------

/// Applies externally delivered task outcomes to the store and releases the
/// owning agent.
///
/// Ingestion is idempotent: a result that merely restates what the store
/// already recorded is acknowledged without any mutation, so at-least-once
/// delivery from bridges and drop directories is safe. A late result for a
/// cancelled task is likewise swallowed; cancellation already won.
pub struct ResultIngestor {
    store: Arc<TaskStore>,
    registry: Arc<AgentRegistry>,
    bus: EventBus,
    /// A task in `assigned`/`running` untouched for this long is considered
    /// stale and actively polled through its agent's bridge.
    staleness: Duration,
}

impl ResultIngestor {
    pub fn new(
        store: Arc<TaskStore>,
        registry: Arc<AgentRegistry>,
        bus: EventBus,
        staleness_secs: u64,
    ) -> Self {
        Self {
            store,
            registry,
            bus,
            staleness: Duration::seconds(staleness_secs as i64),
        }
    }

    /// Apply `outcome` to `task_id`. Returns the task as stored afterwards.
    pub async fn ingest(&self, task_id: Uuid, outcome: TaskOutcome) -> Result<Task, IngestError> {
        let task = self
            .store
            .get(task_id)
            .map_err(|_| IngestError::NotFound(task_id))?;

        if let Some(resolved) = Self::already_resolved(&task, &outcome) {
            debug!(task_id = %task_id, status = %task.status, "duplicate result ignored");
            return resolved.map_err(|status| IngestError::InvalidState { id: task_id, status });
        }
        if task.status == TaskStatus::Pending {
            return Err(IngestError::InvalidState {
                id: task_id,
                status: task.status,
            });
        }

        // An agent that reports a result implicitly started the work; hop an
        // `assigned` task through `running` so the record reflects that. The
        // event goes out inside the transition's critical section, keeping
        // per-task event order aligned with commit order.
        if task.status == TaskStatus::Assigned {
            match self
                .store
                .transition_then(task_id, TaskStatus::Running, |_| {}, |t| {
                    self.bus.publish(TaskEvent::new(
                        EventKind::Running,
                        task_id,
                        t.assigned_to.clone(),
                    ));
                })
                .await
            {
                Ok(_) => {}
                // A concurrent transition got there first; fall through and
                // let the terminal transition (or the re-check below) decide.
                Err(StoreError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let (target, kind) = match &outcome {
            TaskOutcome::Success(_) => (TaskStatus::Done, EventKind::Done),
            TaskOutcome::Failure(_) => (TaskStatus::Failed, EventKind::Failed),
        };
        let applied_outcome = outcome.clone();
        let transitioned = self
            .store
            .transition_then(
                task_id,
                target,
                move |t| match &applied_outcome {
                    TaskOutcome::Success(content) => t.result = Some(content.clone()),
                    TaskOutcome::Failure(content) => t.error = Some(content.clone()),
                },
                |t| {
                    self.bus.publish(
                        TaskEvent::new(kind, task_id, t.assigned_to.clone())
                            .with_message(format!("task '{}' {}", t.title, t.status)),
                    );
                },
            )
            .await;

        let updated = match transitioned {
            Ok(t) => t,
            Err(StoreError::InvalidTransition { .. }) => {
                // Lost a race with another ingest or a cancellation. Re-read
                // and re-run the idempotency check against the final state.
                let current = self.store.get(task_id)?;
                return match Self::already_resolved(&current, &outcome) {
                    Some(Ok(t)) => Ok(t),
                    _ => Err(IngestError::InvalidState {
                        id: task_id,
                        status: current.status,
                    }),
                };
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(ref agent) = updated.assigned_to {
            // The agent may have been rebound or forgotten in the meantime;
            // an idle release that finds nothing is not a failure.
            if let Err(e) = self.registry.mark_idle(agent) {
                warn!(task_id = %task_id, agent = %agent, error = %e, "failed to release agent");
            }
        }

        info!(
            task_id = %task_id,
            status = %updated.status,
            agent = updated.assigned_to.as_deref().unwrap_or("-"),
            "result ingested"
        );
        Ok(updated)
    }

    /// Idempotency check. `Some(Ok(task))` means the store already reflects
    /// this outcome (or the task was cancelled, which always wins) and the
    /// result should be acknowledged without mutation. `Some(Err(status))`
    /// means the task is terminal with a conflicting outcome.
    fn already_resolved(task: &Task, outcome: &TaskOutcome) -> Option<Result<Task, TaskStatus>> {
        if !task.status.is_terminal() {
            return None;
        }
        if task.status == TaskStatus::Cancelled {
            return Some(Ok(task.clone()));
        }
        let matches = match (task.status, outcome) {
            (TaskStatus::Done, TaskOutcome::Success(content)) => {
                task.result.as_deref() == Some(content.as_str())
            }
            (TaskStatus::Failed, TaskOutcome::Failure(content)) => {
                task.error.as_deref() == Some(content.as_str())
            }
            _ => false,
        };
        if matches {
            Some(Ok(task.clone()))
        } else {
            Some(Err(task.status))
        }
    }

    // -----------------------------------------------------------------------
    // Active polling
    // -----------------------------------------------------------------------

    /// Tasks in `assigned`/`running` whose `updated_at` is older than the
    /// staleness cutoff.
    pub fn stale_tasks(&self) -> Vec<Task> {
        let cutoff = Utc::now() - self.staleness;
        let mut stale = Vec::new();
        for status in [TaskStatus::Assigned, TaskStatus::Running] {
            stale.extend(
                self.store
                    .list(&TaskFilter::by_status(status), TaskSort::UpdatedAt)
                    .into_iter()
                    .filter(|t| t.updated_at < cutoff),
            );
        }
        stale
    }

    /// Poll every stale task through its agent's bridge and ingest whatever
    /// outcomes come back. Returns the ids of tasks resolved this pass.
    ///
    /// A bridge error or an absent result defers the task to the next pass;
    /// only a delivered outcome changes any state.
    pub async fn poll_stale(&self, bridges: &BridgeSet) -> Vec<Uuid> {
        let stale = self.stale_tasks();
        if stale.is_empty() {
            return Vec::new();
        }
        info!(count = stale.len(), "polling stale tasks");

        // Bridge polls run concurrently; only the ingestion of delivered
        // outcomes happens on this task.
        let mut polls = Vec::new();
        for task in stale {
            let Some(agent_name) = task.assigned_to.clone() else {
                warn!(task_id = %task.id, "stale task has no assignee; skipping");
                continue;
            };
            let agent = match self.registry.get(&agent_name) {
                Ok(a) => a,
                Err(e) => {
                    warn!(task_id = %task.id, agent = %agent_name, error = %e, "stale task agent unknown");
                    continue;
                }
            };
            let Some(bridge) = bridges.get(agent.bridge) else {
                warn!(task_id = %task.id, bridge = %agent.bridge, "no bridge for stale task");
                continue;
            };
            polls.push(tokio::spawn(async move {
                let outcome = bridge.poll_result(&task).await;
                (task, agent_name, outcome)
            }));
        }

        let mut resolved = Vec::new();
        for poll in polls {
            let Ok((task, agent_name, outcome)) = poll.await else {
                continue;
            };
            match outcome {
                Ok(Some(outcome)) => match self.ingest(task.id, outcome).await {
                    Ok(_) => resolved.push(task.id),
                    Err(e) => {
                        warn!(task_id = %task.id, error = %e, "failed to ingest polled result")
                    }
                },
                Ok(None) => {
                    debug!(task_id = %task.id, "stale task still has no result");
                }
                Err(e) => {
                    warn!(task_id = %task.id, agent = %agent_name, error = %e, "stale poll failed");
                }
            }
        }
        resolved
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
