use std::sync::Arc;

use corral_core::config::RoutingConfig;
use corral_core::task_store::{StoreError, TaskStore};
use corral_core::types::{AgentStatus, EventKind, RoutingRule, Task, TaskEvent, TaskStatus};
use corral_agents::bridge::{BridgeSet, RouteHints};
use corral_agents::registry::{AgentRegistry, RegistryError};
use corral_bus::EventBus;
use tracing::{info, warn};
use uuid::Uuid;

use crate::classifier::{Classifier, KeywordClassifier};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("task not found: `{0}`")]
    NotFound(Uuid),
    #[error("task `{task}` has unmet dependency `{dependency}`")]
    DependencyNotMet { task: Uuid, dependency: Uuid },
    #[error("no eligible agent for task `{0}`")]
    NoEligibleAgent(Uuid),
    #[error("agent `{0}` is busy")]
    AgentBusy(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Selects an eligible agent for a pending task and performs the
/// `pending -> assigned` transition.
///
/// Commit order favors the store as the source of truth: the store
/// transition lands first, the registry binding follows, and a failed
/// binding rolls the task back to `pending`. Locks are taken in the global
/// order (task id, then agent name).
pub struct Dispatcher {
    store: Arc<TaskStore>,
    registry: Arc<AgentRegistry>,
    classifier: Arc<dyn Classifier>,
    routing: RoutingConfig,
    bridges: BridgeSet,
    bus: EventBus,
}

impl Dispatcher {
    pub fn new(
        store: Arc<TaskStore>,
        registry: Arc<AgentRegistry>,
        routing: RoutingConfig,
        bridges: BridgeSet,
        bus: EventBus,
    ) -> Self {
        let classifier = Arc::new(KeywordClassifier::from_rules(&routing.rules));
        Self {
            store,
            registry,
            classifier,
            routing,
            bridges,
            bus,
        }
    }

    /// Swap in a different classification strategy.
    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Dispatch `task_id`, optionally forcing a specific agent.
    ///
    /// Routing priority: explicit `override_agent`, then the highest-weight
    /// keyword rule, then the wildcard default. The chosen target must be
    /// idle; a busy target never queues (that is the caller's concern).
    pub async fn dispatch(
        &self,
        task_id: Uuid,
        override_agent: Option<&str>,
    ) -> Result<Task, DispatchError> {
        let task = self
            .store
            .get(task_id)
            .map_err(|_| DispatchError::NotFound(task_id))?;

        // Dependency gate, regardless of agent availability.
        for dep in &task.dependencies {
            let dep_status = self.store.get(*dep)?.status;
            if dep_status != TaskStatus::Done {
                return Err(DispatchError::DependencyNotMet {
                    task: task_id,
                    dependency: *dep,
                });
            }
        }

        let choice = self.select_agent(&task, override_agent)?;
        let agent_name = choice.agent.clone();

        // Store transition commits first; the record is authoritative. The
        // dispatch event goes out inside the same critical section, so no
        // later transition can publish ahead of it. A failed registry
        // binding below rolls the record back without a counter-event; the
        // task simply reappears as pending.
        let assigned_agent = agent_name.clone();
        let assigned_category = choice.category.clone();
        let updated = self
            .store
            .transition_then(
                task_id,
                TaskStatus::Assigned,
                move |t| {
                    t.assigned_to = Some(assigned_agent);
                    if t.category.is_none() {
                        t.category = assigned_category;
                    }
                },
                |t| {
                    self.bus.publish(
                        TaskEvent::new(EventKind::Dispatched, task_id, t.assigned_to.clone())
                            .with_message(format!("task '{}' dispatched", t.title)),
                    );
                },
            )
            .await?;

        // Registry binding second; roll the store back if it fails.
        let agent = match self.registry.mark_busy(&agent_name, task_id) {
            Ok(agent) => agent,
            Err(e) => {
                warn!(
                    task_id = %task_id,
                    agent = %agent_name,
                    error = %e,
                    "registry binding failed; rolling back dispatch"
                );
                if let Err(revert_err) = self.store.revert_to_pending(task_id).await {
                    warn!(task_id = %task_id, error = %revert_err, "dispatch rollback failed");
                }
                return Err(e.into());
            }
        };

        // Hand the work order across the bridge, hints attached. Best-effort:
        // the staleness poll covers an agent that never picked it up.
        match self.bridges.get(agent.bridge) {
            Some(bridge) => {
                if let Err(e) = bridge.submit(&updated, &choice.hints).await {
                    warn!(task_id = %task_id, agent = %agent_name, error = %e, "bridge handoff failed");
                }
            }
            None => {
                warn!(agent = %agent_name, bridge = %agent.bridge, "no bridge registered for handoff");
            }
        }

        info!(
            task_id = %task_id,
            agent = %agent_name,
            category = updated.category.as_deref().unwrap_or("-"),
            "task dispatched"
        );
        Ok(updated)
    }

    /// Resolve the target agent, the category to record on the task, and the
    /// route hints to hand to the bridge.
    fn select_agent(
        &self,
        task: &Task,
        override_agent: Option<&str>,
    ) -> Result<RouteChoice, DispatchError> {
        if let Some(name) = override_agent {
            let agent = self.registry.get(name)?;
            if agent.status != AgentStatus::Idle {
                return Err(DispatchError::AgentBusy(name.to_string()));
            }
            return Ok(RouteChoice {
                agent: name.to_string(),
                category: None,
                hints: RouteHints::default(),
            });
        }

        let category = self.classifier.classify(&task.classification_text());

        // Candidate rules in priority order: the classified category's rule,
        // then the wildcard default.
        let mut candidates = Vec::new();
        if let Some(ref cat) = category {
            if let Some(rule) = self.routing.rule_for(cat) {
                candidates.push(rule);
            }
        }
        if let Some(wildcard) = self.routing.wildcard() {
            if !candidates
                .iter()
                .any(|r| r.category == wildcard.category)
            {
                candidates.push(wildcard);
            }
        }

        for rule in candidates {
            match self.registry.get(&rule.agent) {
                Ok(agent) if agent.status == AgentStatus::Idle => {
                    let recorded = category.clone().or_else(|| Some(rule.category.clone()));
                    return Ok(RouteChoice {
                        agent: rule.agent.clone(),
                        category: recorded,
                        hints: hints_from(rule),
                    });
                }
                Ok(_) => continue,
                Err(RegistryError::NotFound(_)) => {
                    warn!(agent = %rule.agent, category = %rule.category, "routing rule targets unknown agent");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(DispatchError::NoEligibleAgent(task.id))
    }
}

struct RouteChoice {
    agent: String,
    category: Option<String>,
    hints: RouteHints,
}

fn hints_from(rule: &RoutingRule) -> RouteHints {
    RouteHints {
        model: rule.model.clone(),
        temperature: rule.temperature,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
