use corral_dispatch::facade::Coordinator;

pub fn list(coord: &Coordinator) -> anyhow::Result<()> {
    let summary = coord.refresh_agents();
    let agents = coord.agents(None);
    if agents.is_empty() {
        println!("no agents (descriptor dir empty?)");
        return Ok(());
    }

    for agent in &agents {
        let caps = if agent.capabilities.is_empty() {
            "-".to_string()
        } else {
            agent.capabilities.join(",")
        };
        let task = agent
            .current_task
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20}  {:<8}  {:<16}  task: {}  caps: {}",
            agent.name,
            agent.status.to_string(),
            agent.bridge.to_string(),
            task,
            caps
        );
    }
    if summary.skipped > 0 {
        println!("({} descriptor file(s) skipped; see logs)", summary.skipped);
    }
    Ok(())
}

pub async fn ping(coord: &Coordinator, name: Option<&str>) -> anyhow::Result<()> {
    match name {
        Some(name) => {
            let ok = coord.ping_agent(name).await?;
            println!("{}: {}", name, if ok { "reachable" } else { "unreachable" });
        }
        None => {
            for (name, ok) in coord.ping_all().await {
                println!("{}: {}", name, if ok { "reachable" } else { "unreachable" });
            }
        }
    }
    Ok(())
}
