use corral_dispatch::channel::{DropDirChannel, ResultChannel};
use corral_dispatch::facade::Coordinator;

/// One maintenance pass: drain the drop-file inbox, then actively poll any
/// stale in-flight tasks. Intended for cron or a watch loop.
pub async fn run(coord: &Coordinator) -> anyhow::Result<()> {
    let mut inbox = DropDirChannel::new(&coord.config().paths.inbox_dir)?;
    let drained = coord.pump(&mut inbox).await;
    let polled = coord.poll_stale().await;

    println!(
        "pump: {} result(s) from inbox, {} recovered by polling",
        drained.len(),
        polled.len()
    );
    for id in drained.iter().chain(polled.iter()) {
        if let Ok(task) = coord.task(*id) {
            println!("  {} -> {}", task.id, task.status);
        }
    }
    Ok(())
}
