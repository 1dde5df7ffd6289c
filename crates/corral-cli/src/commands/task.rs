use corral_core::task_store::{TaskFilter, TaskSort};
use corral_core::types::{TaskOutcome, TaskPriority, TaskSpec};
use corral_dispatch::facade::Coordinator;
use uuid::Uuid;

use super::{parse_status, task_line};

pub async fn create(
    coord: &Coordinator,
    title: String,
    description: String,
    priority: TaskPriority,
    after: Vec<Uuid>,
) -> anyhow::Result<()> {
    let spec = TaskSpec::new(title, description)
        .with_priority(priority)
        .with_dependencies(after);
    let task = coord.create(spec).await?;
    println!("created {}", task.id);
    Ok(())
}

pub async fn dispatch(
    coord: &Coordinator,
    id: Uuid,
    agent: Option<&str>,
) -> anyhow::Result<()> {
    let task = coord.dispatch(id, agent).await?;
    println!(
        "dispatched {} -> {} (category: {})",
        task.id,
        task.assigned_to.as_deref().unwrap_or("-"),
        task.category.as_deref().unwrap_or("-"),
    );
    Ok(())
}

pub fn list(
    coord: &Coordinator,
    status: Option<&str>,
    by_priority: bool,
) -> anyhow::Result<()> {
    let filter = match status {
        Some(s) => TaskFilter::by_status(parse_status(s)?),
        None => TaskFilter::default(),
    };
    let sort = if by_priority {
        TaskSort::Priority
    } else {
        TaskSort::CreatedAt
    };

    let tasks = coord.tasks(&filter, sort);
    if tasks.is_empty() {
        println!("no tasks");
        return Ok(());
    }
    for task in &tasks {
        println!("{}", task_line(task));
    }
    Ok(())
}

pub fn show(coord: &Coordinator, id: Uuid) -> anyhow::Result<()> {
    let task = coord.task(id)?;
    println!("id:          {}", task.id);
    println!("title:       {}", task.title);
    if !task.description.is_empty() {
        println!("description: {}", task.description);
    }
    println!("status:      {}", task.status);
    println!("priority:    {}", task.priority);
    println!("assigned:    {}", task.assigned_to.as_deref().unwrap_or("-"));
    println!("category:    {}", task.category.as_deref().unwrap_or("-"));
    if !task.dependencies.is_empty() {
        let deps: Vec<String> = task.dependencies.iter().map(|d| d.to_string()).collect();
        println!("after:       {}", deps.join(", "));
    }
    println!("created:     {}", task.created_at.to_rfc3339());
    println!("updated:     {}", task.updated_at.to_rfc3339());
    if task.retry_count > 0 {
        println!("retries:     {}", task.retry_count);
    }
    if let Some(ref result) = task.result {
        println!("result:      {}", result);
    }
    if let Some(ref error) = task.error {
        println!("error:       {}", error);
    }
    Ok(())
}

pub async fn ingest(
    coord: &Coordinator,
    id: Uuid,
    content: String,
    fail: bool,
) -> anyhow::Result<()> {
    let outcome = if fail {
        TaskOutcome::Failure(content)
    } else {
        TaskOutcome::Success(content)
    };
    let task = coord.ingest(id, outcome).await?;
    println!("{} is now {}", task.id, task.status);
    Ok(())
}

pub async fn retry(coord: &Coordinator, id: Uuid) -> anyhow::Result<()> {
    let task = coord.retry(id).await?;
    println!(
        "{} back to pending (attempt {})",
        task.id,
        task.retry_count + 1
    );
    Ok(())
}

pub async fn cancel(coord: &Coordinator, id: Uuid) -> anyhow::Result<()> {
    let task = coord.cancel(id).await?;
    println!("{} cancelled", task.id);
    Ok(())
}
