use clawkeeper_browser::session::find_browser_binary;
use clawkeeper_core::{Config, Paths};
use clawkeeper_scheduler::KeepaliveScheduler;
use std::path::PathBuf;

fn mark(ok: bool) -> &'static str {
    if ok {
        "✓ configured"
    } else {
        "✗ not configured"
    }
}

pub async fn run(config_path: Option<&PathBuf>) -> anyhow::Result<()> {
    let paths = Paths::new();

    println!("clawkeeper status");
    println!("=================");
    println!();

    let file = config_path.cloned().unwrap_or_else(|| paths.config_file());
    println!(
        "Config:    {} {}",
        file.display(),
        if file.exists() { "✓" } else { "✗ (not found, using env and defaults)" }
    );

    let config = Config::resolve(&paths, config_path)?;

    println!();
    println!("GitHub:    {}", mark(config.github.has_credentials()));
    if !config.github.username.is_empty() {
        println!("  user:    {}", config.github.username);
    }
    match config.github.initial_credential() {
        Some(session) => println!("  session: {}", session.masked()),
        None => println!("  session: none"),
    }
    println!("Console:   {}", config.console.base_url());
    println!("Store:     {} ({})", mark(config.store.is_configured()), config.store.url);
    println!("Telegram:  {}", mark(config.telegram.is_configured()));

    let browser = config.browser.binary.clone().or_else(find_browser_binary);
    println!(
        "Browser:   {}",
        browser.unwrap_or_else(|| "✗ Chrome/Chromium not found".to_string())
    );

    println!();
    match KeepaliveScheduler::new(&config.schedule.cron) {
        Ok(scheduler) => {
            println!("Schedule:  {}", scheduler.expression());
            for at in scheduler.upcoming(3) {
                println!("  next:    {}", at.format("%Y-%m-%d %H:%M:%S"));
            }
        }
        Err(e) => println!("Schedule:  ✗ {}", e),
    }

    Ok(())
}
