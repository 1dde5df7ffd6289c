use corral_core::types::TaskStatus;
use corral_dispatch::facade::Coordinator;

/// Print task counts per status plus a short agent roster.
pub fn run(coord: &Coordinator) -> anyhow::Result<()> {
    let stats = coord.stats();
    let total: usize = stats.values().sum();

    println!("corral status");
    println!("{}", "-".repeat(40));
    println!("Total tasks:   {}", total);
    for status in [
        TaskStatus::Pending,
        TaskStatus::Assigned,
        TaskStatus::Running,
        TaskStatus::Done,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ] {
        println!("  {:<11} {}", format!("{}:", status), stats.get(&status).copied().unwrap_or(0));
    }

    let agents = coord.agents(None);
    println!("Agents:        {}", agents.len());
    for agent in &agents {
        println!("  {:<18} {}", agent.name, agent.status);
    }

    if !stats.is_empty() {
        println!("Recent:");
        for task in coord.history(5) {
            println!("  {}", super::task_line(&task));
        }
    }
    Ok(())
}
