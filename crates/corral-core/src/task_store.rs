use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::types::{Task, TaskPriority, TaskSpec, TaskStatus};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("task not found: `{0}`")]
    NotFound(Uuid),
    #[error("task `{0}` is archived")]
    Archived(Uuid),
    #[error("task already exists: `{0}`")]
    DuplicateTask(Uuid),
    #[error("dependency cycle involving task `{0}`")]
    CyclicDependency(Uuid),
    #[error("invalid transition for task `{id}`: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },
    #[error("task `{0}` is not in a terminal state")]
    NotTerminal(Uuid),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assigned_to: Option<String>,
}

impl TaskFilter {
    pub fn by_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if task.priority != priority {
                return false;
            }
        }
        if let Some(ref agent) = self.assigned_to {
            if task.assigned_to.as_deref() != Some(agent.as_str()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskSort {
    /// Newest first.
    #[default]
    CreatedAt,
    /// Highest priority first, oldest first within a priority.
    Priority,
    /// Most recently touched first.
    UpdatedAt,
}

// ---------------------------------------------------------------------------
// TaskStore
// ---------------------------------------------------------------------------

/// Durable task storage: one JSON file per task under `<base>/tasks/`, with
/// terminal tasks moved to `<base>/archive/` once processed.
///
/// The store is the single writer for task records. All mutations to a given
/// id go through a per-id async mutex, so no two transitions on the same task
/// ever interleave; unrelated tasks are never stalled by each other. A
/// mutation is persisted to disk before it becomes visible in memory, which
/// keeps the on-disk record authoritative across restarts.
pub struct TaskStore {
    tasks_dir: PathBuf,
    archive_dir: PathBuf,
    tasks: DashMap<Uuid, Task>,
    archived: DashMap<Uuid, Task>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl TaskStore {
    /// Open (or initialize) a store rooted at `base_dir`.
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base = base_dir.into();
        let tasks_dir = base.join("tasks");
        let archive_dir = base.join("archive");
        std::fs::create_dir_all(&tasks_dir)?;
        std::fs::create_dir_all(&archive_dir)?;

        let store = Self {
            tasks: Self::load_dir(&tasks_dir),
            archived: Self::load_dir(&archive_dir),
            tasks_dir,
            archive_dir,
            locks: DashMap::new(),
        };
        info!(
            live = store.tasks.len(),
            archived = store.archived.len(),
            "task store opened"
        );
        Ok(store)
    }

    /// Read every `*.json` record in `dir`, skipping unreadable or malformed
    /// files with a warning rather than failing the whole load.
    fn load_dir(dir: &PathBuf) -> DashMap<Uuid, Task> {
        let map = DashMap::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(_) => return map,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = match std::fs::read_to_string(&path) {
                Ok(d) => d,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable task file");
                    continue;
                }
            };
            match serde_json::from_str::<Task>(&data) {
                Ok(task) => {
                    map.insert(task.id, task);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping malformed task file");
                }
            }
        }
        map
    }

    fn lock_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn persist(&self, task: &Task) -> Result<(), StoreError> {
        let path = self.tasks_dir.join(format!("{}.json", task.id));
        let json = serde_json::to_string_pretty(task)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    /// Create a new task in `pending`.
    ///
    /// Dependencies must reference existing tasks (live or archived) and must
    /// not introduce a cycle; on any validation failure the task is not
    /// created and nothing is persisted.
    pub async fn create(&self, spec: TaskSpec) -> Result<Task, StoreError> {
        self.create_then(spec, |_| {}).await
    }

    /// Like [`create`](Self::create), additionally invoking `after` on the
    /// committed record before the per-id lock is released. Callers publish
    /// their creation event here so per-task event order always matches
    /// commit order.
    pub async fn create_then<G>(&self, spec: TaskSpec, after: G) -> Result<Task, StoreError>
    where
        G: FnOnce(&Task),
    {
        let task = Task::new(spec);
        let lock = self.lock_for(task.id);
        let _guard = lock.lock().await;

        if self.tasks.contains_key(&task.id) || self.archived.contains_key(&task.id) {
            return Err(StoreError::DuplicateTask(task.id));
        }
        self.validate_dependencies(task.id, &task.dependencies)?;

        self.persist(&task)?;
        self.tasks.insert(task.id, task.clone());
        info!(task_id = %task.id, title = %task.title, "task created");
        after(&task);
        Ok(task)
    }

    /// Replace a pending task's dependency set, re-running cycle validation
    /// over the whole graph plus the new edges.
    pub async fn update_dependencies(
        &self,
        id: Uuid,
        dependencies: Vec<Uuid>,
    ) -> Result<Task, StoreError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut task = self
            .tasks
            .get(&id)
            .map(|t| t.clone())
            .ok_or_else(|| self.missing(id))?;
        if task.status != TaskStatus::Pending {
            return Err(StoreError::InvalidTransition {
                id,
                from: task.status,
                to: task.status,
            });
        }
        self.validate_dependencies(id, &dependencies)?;

        task.dependencies = dependencies;
        task.updated_at = Utc::now();
        self.persist(&task)?;
        self.tasks.insert(id, task.clone());
        Ok(task)
    }

    /// Reject unknown dependency ids, direct self-reference, and transitive
    /// cycles (DFS over the existing graph from each proposed edge).
    fn validate_dependencies(&self, id: Uuid, deps: &[Uuid]) -> Result<(), StoreError> {
        for dep in deps {
            if *dep == id {
                return Err(StoreError::CyclicDependency(id));
            }
            if !self.tasks.contains_key(dep) && !self.archived.contains_key(dep) {
                return Err(StoreError::NotFound(*dep));
            }
        }

        let mut stack: Vec<Uuid> = deps.to_vec();
        let mut visited = std::collections::HashSet::new();
        while let Some(node) = stack.pop() {
            if node == id {
                return Err(StoreError::CyclicDependency(id));
            }
            if !visited.insert(node) {
                continue;
            }
            let next = self
                .tasks
                .get(&node)
                .map(|t| t.dependencies.clone())
                .or_else(|| self.archived.get(&node).map(|t| t.dependencies.clone()));
            if let Some(next) = next {
                stack.extend(next);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Read
    // -----------------------------------------------------------------------

    /// Fetch a task by id, checking live records first, then the archive.
    pub fn get(&self, id: Uuid) -> Result<Task, StoreError> {
        self.tasks
            .get(&id)
            .map(|t| t.clone())
            .or_else(|| self.archived.get(&id).map(|t| t.clone()))
            .ok_or(StoreError::NotFound(id))
    }

    /// List live tasks matching `filter`, ordered by `sort`.
    pub fn list(&self, filter: &TaskFilter, sort: TaskSort) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| filter.matches(t))
            .map(|t| t.clone())
            .collect();
        match sort {
            TaskSort::CreatedAt => tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            TaskSort::UpdatedAt => tasks.sort_by(|a, b| b.updated_at.cmp(&a.updated_at)),
            TaskSort::Priority => tasks.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
            }),
        }
        tasks
    }

    /// Returns `true` when every dependency of `id` has reached `done`.
    /// Archived tasks count with their archived status.
    pub fn dependencies_met(&self, id: Uuid) -> Result<bool, StoreError> {
        let task = self.get(id)?;
        for dep in &task.dependencies {
            let dep_status = self.get(*dep)?.status;
            if dep_status != TaskStatus::Done {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Count of live tasks per status.
    pub fn stats(&self) -> HashMap<TaskStatus, usize> {
        let mut counts = HashMap::new();
        for task in self.tasks.iter() {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        counts
    }

    /// Most recently touched live tasks, newest first.
    pub fn history(&self, limit: usize) -> Vec<Task> {
        let mut tasks = self.list(&TaskFilter::default(), TaskSort::UpdatedAt);
        tasks.truncate(limit);
        tasks
    }

    // -----------------------------------------------------------------------
    // Mutate
    // -----------------------------------------------------------------------

    /// Apply a status transition atomically under the task's per-id lock.
    ///
    /// The transition is validated against the status table; `mutate` runs on
    /// the candidate record after the status change (to set result, error,
    /// assignment, retry count). The record is persisted before the in-memory
    /// view is updated, so a failed write leaves the store unchanged.
    pub async fn transition<F>(
        &self,
        id: Uuid,
        to: TaskStatus,
        mutate: F,
    ) -> Result<Task, StoreError>
    where
        F: FnOnce(&mut Task),
    {
        self.transition_then(id, to, mutate, |_| {}).await
    }

    /// Like [`transition`](Self::transition), additionally invoking `after`
    /// on the committed record before the per-id lock is released. Event
    /// publication goes through here: publishing inside the critical section
    /// guarantees that per-task events observe the same order as the
    /// transitions that produced them.
    pub async fn transition_then<F, G>(
        &self,
        id: Uuid,
        to: TaskStatus,
        mutate: F,
        after: G,
    ) -> Result<Task, StoreError>
    where
        F: FnOnce(&mut Task),
        G: FnOnce(&Task),
    {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let current = self
            .tasks
            .get(&id)
            .map(|t| t.clone())
            .ok_or_else(|| self.missing(id))?;
        if !current.status.can_transition_to(&to) {
            return Err(StoreError::InvalidTransition {
                id,
                from: current.status,
                to,
            });
        }

        let mut updated = current;
        let from = updated.status;
        updated.status = to;
        mutate(&mut updated);
        updated.updated_at = Utc::now();

        self.persist(&updated)?;
        self.tasks.insert(id, updated.clone());
        debug!(task_id = %id, from = %from, to = %to, "task transition");
        after(&updated);
        Ok(updated)
    }

    /// Mutations only touch live records; an id that resolves in the archive
    /// gets a dedicated error instead of `NotFound`.
    fn missing(&self, id: Uuid) -> StoreError {
        if self.archived.contains_key(&id) {
            StoreError::Archived(id)
        } else {
            StoreError::NotFound(id)
        }
    }

    /// Return an `assigned`/`running` task to `pending`, clearing its
    /// assignment. Outside the normal transition table; used only for
    /// dispatch rollback and the startup reconciliation pass.
    pub async fn revert_to_pending(&self, id: Uuid) -> Result<Task, StoreError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let current = self
            .tasks
            .get(&id)
            .map(|t| t.clone())
            .ok_or_else(|| self.missing(id))?;
        if !current.status.is_assigned() {
            return Err(StoreError::InvalidTransition {
                id,
                from: current.status,
                to: TaskStatus::Pending,
            });
        }

        let mut updated = current;
        let from = updated.status;
        updated.status = TaskStatus::Pending;
        updated.assigned_to = None;
        updated.updated_at = Utc::now();

        self.persist(&updated)?;
        self.tasks.insert(id, updated.clone());
        warn!(task_id = %id, from = %from, "task reverted to pending");
        Ok(updated)
    }

    /// Revert every `assigned`/`running` task for which `is_linked` returns
    /// `false` (the owning agent no longer acknowledges it). Returns the ids
    /// repaired. Run once at startup, after the registry has loaded.
    pub async fn repair_orphaned<F>(&self, is_linked: F) -> Result<Vec<Uuid>, StoreError>
    where
        F: Fn(&Task) -> bool,
    {
        let orphans: Vec<Uuid> = self
            .tasks
            .iter()
            .filter(|t| t.status.is_assigned() && !is_linked(t))
            .map(|t| t.id)
            .collect();
        for id in &orphans {
            self.revert_to_pending(*id).await?;
        }
        if !orphans.is_empty() {
            warn!(count = orphans.len(), "repaired orphaned assignments");
        }
        Ok(orphans)
    }

    /// Move a terminal task into the archive. Archived tasks stay readable
    /// (dependents still resolve them) but drop out of live listings.
    pub async fn archive(&self, id: Uuid) -> Result<Task, StoreError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let task = self
            .tasks
            .get(&id)
            .map(|t| t.clone())
            .ok_or_else(|| self.missing(id))?;
        if !task.status.is_terminal() {
            return Err(StoreError::NotTerminal(id));
        }

        let from = self.tasks_dir.join(format!("{}.json", id));
        let to = self.archive_dir.join(format!("{}.json", id));
        std::fs::rename(&from, &to)?;
        self.tasks.remove(&id);
        self.archived.insert(id, task.clone());
        info!(task_id = %id, status = %task.status, "task archived");
        Ok(task)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
