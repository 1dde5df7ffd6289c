pub mod agent;
pub mod pump;
pub mod stats;
pub mod task;

use corral_core::types::{Task, TaskStatus};

/// Parse a status name as used on the command line.
pub fn parse_status(s: &str) -> anyhow::Result<TaskStatus> {
    match s {
        "pending" => Ok(TaskStatus::Pending),
        "assigned" => Ok(TaskStatus::Assigned),
        "running" => Ok(TaskStatus::Running),
        "done" => Ok(TaskStatus::Done),
        "failed" => Ok(TaskStatus::Failed),
        "cancelled" => Ok(TaskStatus::Cancelled),
        other => anyhow::bail!(
            "unknown status `{other}` (expected pending|assigned|running|done|failed|cancelled)"
        ),
    }
}

/// One-line task summary used by the list views.
pub fn task_line(task: &Task) -> String {
    format!(
        "{}  {:<9}  {:<8}  {:<16}  {}",
        task.id,
        task.status.to_string(),
        task.priority.to_string(),
        task.assigned_to.as_deref().unwrap_or("-"),
        task.title
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_core::types::TaskSpec;

    #[test]
    fn parses_every_status() {
        for (name, status) in [
            ("pending", TaskStatus::Pending),
            ("running", TaskStatus::Running),
            ("cancelled", TaskStatus::Cancelled),
        ] {
            assert_eq!(parse_status(name).unwrap(), status);
        }
        assert!(parse_status("paused").is_err());
    }

    #[test]
    fn task_line_shows_unassigned_as_dash() {
        let task = Task::new(TaskSpec::new("fix the build", ""));
        let line = task_line(&task);
        assert!(line.contains("pending"));
        assert!(line.contains(" - "));
        assert!(line.ends_with("fix the build"));
    }
}
