use chrono::{DateTime, Local, Utc};
use clawkeeper_core::{Error, Result};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Re-runs the login flow on a cron schedule (seconds-first, six fields).
pub struct KeepaliveScheduler {
    expr: String,
    schedule: cron::Schedule,
    run_immediately: bool,
}

impl KeepaliveScheduler {
    pub fn new(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        let schedule = cron::Schedule::from_str(expr)
            .map_err(|e| Error::Config(format!("invalid cron expression '{}': {}", expr, e)))?;
        Ok(Self {
            expr: expr.to_string(),
            schedule,
            run_immediately: false,
        })
    }

    /// Fire once at startup before waiting for the first slot.
    pub fn run_immediately(mut self, yes: bool) -> Self {
        self.run_immediately = yes;
        self
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    pub fn upcoming(&self, count: usize) -> Vec<DateTime<Local>> {
        self.schedule
            .upcoming(Local)
            .take(count)
            .collect()
    }

    /// Run `job` at every scheduled time until `shutdown` fires. A failed
    /// run is logged and the schedule continues.
    pub async fn run_loop<F, Fut>(&self, job: F, mut shutdown: broadcast::Receiver<()>)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        info!(cron = %self.expr, "Keepalive scheduler started");

        if self.run_immediately {
            fire(&job).await;
        }

        loop {
            let now = Utc::now();
            let Some(next) = self.next_after(now) else {
                warn!(cron = %self.expr, "Schedule has no upcoming runs");
                break;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!(next = %next.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"), "Next keepalive run");

            tokio::select! {
                _ = tokio::time::sleep(wait) => fire(&job).await,
                _ = shutdown.recv() => {
                    info!("Keepalive scheduler shutting down");
                    break;
                }
            }
        }
    }
}

async fn fire<F, Fut>(job: &F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    match job().await {
        Ok(true) => info!("Scheduled run succeeded"),
        Ok(false) => warn!("Scheduled run failed"),
        Err(e) => error!(error = %e, "Scheduled run errored"),
    }
}
