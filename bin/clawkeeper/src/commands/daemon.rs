use super::run_cmd::{execute_once, interrupted, listen_for_ctrl_c};
use clawkeeper_core::{Config, Paths};
use clawkeeper_scheduler::KeepaliveScheduler;
use std::path::PathBuf;
use std::sync::Arc;

pub async fn run(config_path: Option<&PathBuf>, cron: Option<String>, now: bool) -> anyhow::Result<()> {
    let shutdown = listen_for_ctrl_c().await;
    let stop = shutdown.subscribe();
    let paths = Paths::new();
    let config = Arc::new(Config::resolve(&paths, config_path)?);
    let expr = cron.unwrap_or_else(|| config.schedule.cron.clone());
    let scheduler = KeepaliveScheduler::new(&expr)?.run_immediately(now);

    println!("clawkeeper daemon");
    println!("Schedule: {}", scheduler.expression());
    for at in scheduler.upcoming(3) {
        println!("  next: {}", at.format("%Y-%m-%d %H:%M:%S"));
    }
    println!("Press Ctrl-C to stop.");

    // Ctrl-C interrupts the current run and stops the schedule
    let job = || {
        let config = config.clone();
        let paths = paths.clone();
        let interrupt = interrupted(shutdown.subscribe());
        async move {
            let outcome = execute_once(config, &paths, interrupt).await;
            Ok::<_, clawkeeper_core::Error>(outcome.success)
        }
    };
    scheduler.run_loop(job, stop).await;

    println!("Daemon stopped.");
    Ok(())
}
