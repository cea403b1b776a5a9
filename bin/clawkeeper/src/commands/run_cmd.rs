use clawkeeper_agent::{LoginRun, RunOutcome};
use clawkeeper_browser::ChromeLauncher;
use clawkeeper_core::{Config, Paths};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub async fn run(config_path: Option<&PathBuf>) -> anyhow::Result<i32> {
    let shutdown = listen_for_ctrl_c().await;
    let interrupt = interrupted(shutdown.subscribe());
    let paths = Paths::new();
    let config = Arc::new(Config::resolve(&paths, config_path)?);

    let outcome = execute_once(config, &paths, interrupt).await;
    if outcome.success {
        println!("✅ Run succeeded (region: {})", outcome.region);
    } else {
        println!(
            "❌ Run failed: {}",
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(outcome.exit_code())
}

/// One run against a real Chrome, cut short when `interrupt` resolves.
pub async fn execute_once<F>(config: Arc<Config>, paths: &Paths, interrupt: F) -> RunOutcome
where
    F: Future<Output = ()>,
{
    if let Err(e) = paths.ensure_dirs() {
        warn!(error = %e, "Failed to create clawkeeper directories");
    }
    let run = LoginRun::from_config(config.clone(), paths).await;
    let launcher = ChromeLauncher::new(config.browser.clone(), paths.profiles_dir());
    run.execute(&launcher, interrupt).await
}

/// Install the Ctrl-C handler right away and fan the signal out to every
/// subscriber.
pub async fn listen_for_ctrl_c() -> broadcast::Sender<()> {
    let (tx, _) = broadcast::channel::<()>(1);
    let mut ctrl_c = Box::pin(tokio::signal::ctrl_c());

    // the first poll registers the handler
    let early = tokio::select! {
        biased;
        result = &mut ctrl_c => Some(result),
        _ = std::future::ready(()) => None,
    };

    let sender = tx.clone();
    tokio::spawn(async move {
        let result = match early {
            Some(result) => result,
            None => ctrl_c.await,
        };
        match result {
            Ok(()) => {
                info!("Received Ctrl-C");
                let _ = sender.send(());
            }
            Err(e) => warn!(error = %e, "Ctrl-C handler unavailable"),
        }
    });
    tx
}

/// Resolves once Ctrl-C was received.
pub async fn interrupted(mut rx: broadcast::Receiver<()>) {
    if rx.recv().await.is_err() {
        // sender gone without a signal; never interrupt
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_resolves_on_signal() {
        let (tx, _) = broadcast::channel::<()>(1);
        let interrupt = interrupted(tx.subscribe());
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), interrupt)
            .await
            .expect("signal should resolve the interrupt");
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_waits_when_sender_dropped() {
        let (tx, rx) = broadcast::channel::<()>(1);
        drop(tx);
        let waited = tokio::time::timeout(Duration::from_secs(60), interrupted(rx)).await;
        assert!(waited.is_err());
    }
}
