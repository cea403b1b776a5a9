use crate::context::{RunContext, SESSION_COOKIE};
use crate::keeper::{CredentialUpdate, SessionKeeper};
use crate::machine::{AuthOutcome, AuthStateMachine, FailureReason};
use crate::report::RunReport;
use clawkeeper_browser::{BrowserLauncher, Cookie};
use clawkeeper_channels::{DisabledRelay, TelegramRelay, VerificationRelay};
use clawkeeper_core::{Config, Credential, Error, Paths, Result};
use clawkeeper_storage::{CredentialStore, QingLongStore};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

const GITHUB_HOME: &str = "https://github.com";
const GITHUB_COOKIE_DOMAIN: &str = "github.com";

/// Hides `navigator.webdriver` from page scripts.
const STEALTH_SCRIPT: &str = "Object.defineProperty(navigator, 'webdriver', {get: () => undefined})";

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub success: bool,
    pub failure: Option<FailureReason>,
    pub error: Option<String>,
    pub region: String,
    pub credential_update: Option<CredentialUpdate>,
}

impl RunOutcome {
    fn failed(error: impl Into<String>, region: &str) -> Self {
        Self {
            success: false,
            failure: None,
            error: Some(error.into()),
            region: region.to_string(),
            credential_update: None,
        }
    }

    pub fn exit_code(&self) -> i32 {
        if self.success {
            0
        } else {
            1
        }
    }
}

/// One end-to-end login/keepalive execution.
pub struct LoginRun {
    config: Arc<Config>,
    relay: Arc<dyn VerificationRelay>,
    store: Arc<dyn CredentialStore>,
    run_dir: PathBuf,
}

impl LoginRun {
    pub fn new(
        config: Arc<Config>,
        relay: Arc<dyn VerificationRelay>,
        store: Arc<dyn CredentialStore>,
        run_dir: PathBuf,
    ) -> Self {
        Self {
            config,
            relay,
            store,
            run_dir,
        }
    }

    /// Wire the relay and store from configuration. Neither failing to
    /// configure is fatal; both degrade to disabled.
    pub async fn from_config(config: Arc<Config>, paths: &Paths) -> Self {
        let relay: Arc<dyn VerificationRelay> = match TelegramRelay::from_config(&config.telegram) {
            Some(relay) => Arc::new(relay),
            None => Arc::new(DisabledRelay),
        };
        let store: Arc<dyn CredentialStore> = Arc::new(QingLongStore::connect(&config.store).await);
        let run_id = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
        Self::new(config, relay, store, paths.run_dir(&run_id))
    }

    /// Run the whole flow. The final notification and cleanup happen on
    /// every path, including when `interrupt` resolves first.
    pub async fn execute<F>(&self, launcher: &dyn BrowserLauncher, interrupt: F) -> RunOutcome
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(interrupt);
        let config = &self.config;
        let user = config.github.username.as_str();
        let mut report = RunReport::new(self.run_dir.clone());

        report.info(format!("GitHub user: {}", if user.is_empty() { "(unset)" } else { user }));
        report.info(format!(
            "Stored session: {}",
            if config.github.initial_credential().is_some() { "yes" } else { "no" }
        ));
        report.info(format!(
            "Credential store: {}",
            if self.store.is_enabled() { "configured" } else { "not configured" }
        ));
        report.info(format!(
            "Telegram: {}",
            if self.relay.is_enabled() { "configured" } else { "not configured" }
        ));

        let base_url = config.console.base_url();
        if !config.github.has_credentials() {
            report.error("GitHub credentials missing");
            report
                .deliver(self.relay.as_ref(), false, user, &base_url, Some("credentials not configured"))
                .await;
            report.cleanup();
            return RunOutcome::failed("credentials not configured", &base_url);
        }

        let launched = tokio::select! {
            result = launcher.launch() => result,
            _ = &mut interrupt => Err(Error::Interrupted("interrupted by user".to_string())),
        };
        let page = match launched {
            Ok(page) => page,
            Err(Error::Interrupted(msg)) => {
                report.warn("Interrupted during browser launch");
                report
                    .deliver(self.relay.as_ref(), false, user, &base_url, Some(&msg))
                    .await;
                report.cleanup();
                return RunOutcome::failed(msg, &base_url);
            }
            Err(e) => {
                report.error(format!("Browser launch failed: {}", e));
                report
                    .deliver(self.relay.as_ref(), false, user, &base_url, Some(&e.to_string()))
                    .await;
                report.cleanup();
                return RunOutcome::failed(e.to_string(), &base_url);
            }
        };
        report.success("Browser started");

        let mut ctx = RunContext::new(
            page,
            report,
            &base_url,
            config.github.initial_credential(),
            config.flow.tick(),
        );

        let result = tokio::select! {
            result = self.drive(&mut ctx) => result,
            _ = &mut interrupt => Err(Error::Interrupted("interrupted by user".to_string())),
        };

        let (success, failure, error) = match result {
            Ok(AuthOutcome::Authenticated) => {
                ctx.report.success("Run finished");
                (true, None, None)
            }
            Ok(AuthOutcome::Failed(reason)) => {
                ctx.report.error(format!("Run failed: {}", reason));
                (false, Some(reason), Some(reason.to_string()))
            }
            Err(Error::Interrupted(msg)) => {
                ctx.report.warn("Interrupted");
                (false, None, Some(msg))
            }
            Err(e) => {
                ctx.report.error(format!("Unexpected error: {}", e));
                ctx.screenshot("error").await;
                (false, None, Some(e.to_string()))
            }
        };

        ctx.report
            .deliver(self.relay.as_ref(), success, user, ctx.base_url(), error.as_deref())
            .await;

        let outcome = RunOutcome {
            success,
            failure,
            error,
            region: ctx.base_url().to_string(),
            credential_update: ctx.credential_update,
        };
        release(ctx).await;
        outcome
    }

    async fn drive(&self, ctx: &mut RunContext) -> Result<AuthOutcome> {
        if let Err(e) = ctx.page.inject_script(STEALTH_SCRIPT).await {
            ctx.report.warn(format!("Stealth script not installed: {}", e));
        }

        if let Some(credential) = ctx.initial_credential.clone() {
            if let Err(e) = self.inject_session_cookie(ctx, &credential).await {
                ctx.report.warn(format!("Cookie injection failed: {}", e));
            }
        }

        ctx.report.step("Opening the console sign-in page");
        ctx.page.navigate(&self.config.console.signin_url()).await?;
        ctx.settle(3).await;
        ctx.screenshot("landing").await;

        let machine = AuthStateMachine::new(&self.config, self.relay.as_ref());
        if let AuthOutcome::Failed(reason) = machine.run(ctx).await {
            return Ok(AuthOutcome::Failed(reason));
        }

        let keeper = SessionKeeper::new(
            self.store.as_ref(),
            self.relay.as_ref(),
            &self.config.store.credential_name,
        );
        let kept = keeper.keepalive(ctx).await;
        // a fresh cookie is worth keeping even when keepalive did not hold
        keeper.reconcile_credential(ctx).await;

        if !kept {
            return Ok(AuthOutcome::Failed(FailureReason::KeepaliveRejected));
        }
        Ok(AuthOutcome::Authenticated)
    }

    /// Seed GitHub with the stored session so the password path can be
    /// skipped. Returns whether GitHub accepted it.
    async fn inject_session_cookie(&self, ctx: &mut RunContext, credential: &Credential) -> Result<bool> {
        ctx.page.navigate(GITHUB_HOME).await?;
        ctx.settle(2).await;
        ctx.page
            .add_cookie(&Cookie::new(SESSION_COOKIE, credential.expose(), GITHUB_COOKIE_DOMAIN))
            .await?;
        ctx.page
            .add_cookie(&Cookie::new("logged_in", "yes", GITHUB_COOKIE_DOMAIN))
            .await?;
        ctx.page.reload().await?;
        ctx.settle(3).await;

        if ctx.page.current_url().await?.contains("login") {
            ctx.report.warn("Stored GitHub session has expired");
            return Ok(false);
        }
        ctx.report.success("GitHub session cookie injected");
        Ok(true)
    }
}

/// Remove screenshots and close the browser. Never fails.
async fn release(ctx: RunContext) {
    let RunContext { mut page, report, .. } = ctx;
    report.cleanup();
    if let Err(e) = page.close().await {
        debug!("Browser close failed: {}", e);
    }
    info!("Run resources released");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBrowser, FakeLauncher, FakePage, RecordingRelay, StubStore};
    use std::time::Duration;
    use tokio::time::Instant;

    const SIGNIN: &str = "https://console.run.claw.cloud/signin";

    struct Harness {
        browser: FakeBrowser,
        relay: Arc<RecordingRelay>,
        store: Arc<StubStore>,
        dir: tempfile::TempDir,
        config: Config,
    }

    impl Harness {
        fn new(relay: RecordingRelay) -> Self {
            let mut config = Config::default();
            config.github.username = "octocat".to_string();
            config.github.password = "hunter2".to_string();
            Self {
                browser: FakeBrowser::new(),
                relay: Arc::new(relay),
                store: Arc::new(StubStore::enabled()),
                dir: tempfile::tempdir().unwrap(),
                config,
            }
        }

        fn run_dir(&self) -> PathBuf {
            self.dir.path().join("run")
        }

        async fn execute(&self) -> RunOutcome {
            let run = LoginRun::new(
                Arc::new(self.config.clone()),
                self.relay.clone(),
                self.store.clone(),
                self.run_dir(),
            );
            let launcher = FakeLauncher::new(self.browser.clone());
            run.execute(&launcher, std::future::pending()).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_valid_cookie_shortcut_skips_github() {
        let mut h = Harness::new(RecordingRelay::default());
        h.config.github.session = Some("still-valid-session".to_string());
        h.browser.route("/signin", FakePage::new("https://console.run.claw.cloud/").content("<h1>Applications</h1>"));

        let outcome = h.execute().await;

        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(outcome.credential_update, Some(CredentialUpdate::Unchanged));
        assert_eq!(h.store.put_count(), 0);
        let actions = h.browser.actions();
        assert!(!actions.iter().any(|a| a.starts_with("fill") || a.starts_with("click")));
        assert!(actions.contains(&"add_cookie user_session@github.com".to_string()));
        assert!(actions.contains(&"navigate https://console.run.claw.cloud/apps".to_string()));
        let messages = h.relay.messages();
        assert!(!messages.iter().any(|m| m.contains("rotated")));
        assert!(messages.last().unwrap().contains("✅ Success"));
        assert!(h.browser.is_closed());
        assert!(!h.run_dir().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_password_and_relayed_code_reach_console() {
        let h = Harness::new(RecordingRelay::with_code(Duration::from_secs(10), "123456"));
        h.browser.route("/signin", FakePage::new(SIGNIN).content("Sign in with GitHub"));
        h.browser.on("click", "GitHub", FakePage::new("https://github.com/login?client_id=claw"));
        h.browser.on("click", "submit", FakePage::new("https://github.com/sessions/two-factor/app"));
        h.browser.on(
            "type",
            "one-time-code",
            FakePage::new("https://github.com/login/oauth/authorize?client_id=claw")
                .cookie("user_session", "rotated-session-value"),
        );
        h.browser.on("click", "authorize", FakePage::new("https://console.run.claw.cloud/callback?code=xyz"));
        h.browser.after(
            "/callback",
            4,
            FakePage::new("https://ap-northeast-1.run.claw.cloud/").content("<h1>Applications</h1>"),
        );

        let start = Instant::now();
        let outcome = h.execute().await;

        assert!(outcome.success, "{:?}", outcome.error);
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert_eq!(outcome.region, "https://ap-northeast-1.run.claw.cloud");
        assert_eq!(outcome.credential_update, Some(CredentialUpdate::Stored));
        assert_eq!(h.relay.code_requests(), 1);

        let actions = h.browser.actions();
        assert!(actions.contains(&"fill input[name=\"password\"]=hunter2".to_string()));
        assert!(actions.contains(&"type input[autocomplete=\"one-time-code\"]=123456".to_string()));
        assert!(actions.contains(&"navigate https://ap-northeast-1.run.claw.cloud/apps".to_string()));
        assert!(!actions.contains(&"navigate https://console.run.claw.cloud/apps".to_string()));

        assert_eq!(h.store.puts()[0].1, "rotated-session-value");
        let messages = h.relay.messages();
        assert!(messages.iter().any(|m| m.contains("/code 123456")));
        assert!(messages.iter().any(|m| m.contains("rotated")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_verification_timeout_fails_with_screenshot() {
        let h = Harness::new(RecordingRelay::default());
        h.browser.route("/signin", FakePage::new(SIGNIN).content("Sign in with GitHub"));
        h.browser.on("click", "GitHub", FakePage::new("https://github.com/login"));
        h.browser.on("click", "submit", FakePage::new("https://github.com/sessions/verified-device"));

        let outcome = h.execute().await;

        assert!(!outcome.success);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(outcome.failure, Some(FailureReason::DeviceVerificationTimeout));
        let reloads = h.browser.actions().iter().filter(|a| *a == "reload").count();
        assert_eq!(reloads, 6);

        let photos = h.relay.photos();
        assert!(photos.iter().any(|(path, _)| path.to_string_lossy().contains("device_verification")));
        let (last_photo, caption) = photos.last().unwrap();
        assert!(last_photo.to_string_lossy().contains("device_verification"));
        assert_eq!(caption, "Final state");
        assert!(h.relay.messages().last().unwrap().contains("device verification timed out"));
        assert!(h.browser.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_signin_loop_stops_early() {
        let h = Harness::new(RecordingRelay::default());
        h.browser.route("/signin", FakePage::new(SIGNIN).content("Sign in with GitHub"));

        let outcome = h.execute().await;

        assert_eq!(outcome.failure, Some(FailureReason::SigninLoop));
        assert_eq!(outcome.exit_code(), 1);
        assert!(h.relay.messages().last().unwrap().contains("stuck on the sign-in page"));
        let loops = h.relay.messages().last().unwrap().matches("Auth loop").count();
        assert!(loops <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_credentials_fail_before_launch() {
        let mut h = Harness::new(RecordingRelay::default());
        h.config.github.password.clear();

        let outcome = h.execute().await;

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("credentials not configured"));
        assert!(h.browser.actions().is_empty());
        assert!(h.relay.messages()[0].contains("credentials not configured"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_rejection_fails_run_but_keeps_cookie() {
        let h = Harness::new(RecordingRelay::default());
        h.browser.route("/signin", FakePage::new("https://console.run.claw.cloud/").content("Apps"));
        h.browser.route("/apps", FakePage::new(SIGNIN));
        h.browser.set_cookie("user_session", "new-session", "github.com");

        let outcome = h.execute().await;

        assert_eq!(outcome.failure, Some(FailureReason::KeepaliveRejected));
        assert_eq!(outcome.credential_update, Some(CredentialUpdate::Stored));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_reports_and_cleans_up() {
        let h = Harness::new(RecordingRelay::default());
        h.browser.route("/signin", FakePage::new("https://github.com/sessions/two-factor/mobile"));

        let run = LoginRun::new(Arc::new(h.config.clone()), h.relay.clone(), h.store.clone(), h.run_dir());
        let launcher = FakeLauncher::new(h.browser.clone());
        let outcome = run
            .execute(&launcher, tokio::time::sleep(Duration::from_secs(30)))
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("interrupted by user"));
        assert!(h.relay.messages().last().unwrap().contains("interrupted"));
        assert!(h.browser.is_closed());
        assert!(!h.run_dir().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_during_launch_is_reported() {
        let h = Harness::new(RecordingRelay::default());
        let run = LoginRun::new(Arc::new(h.config.clone()), h.relay.clone(), h.store.clone(), h.run_dir());
        let launcher = FakeLauncher::slow(h.browser.clone(), Duration::from_secs(15));
        let start = Instant::now();

        let outcome = run
            .execute(&launcher, tokio::time::sleep(Duration::from_secs(2)))
            .await;

        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(outcome.error.as_deref(), Some("interrupted by user"));
        let summary = h.relay.messages().last().cloned().unwrap();
        assert!(summary.contains("❌ Failed"));
        assert!(summary.contains("interrupted"));
        assert!(h.browser.actions().is_empty());
        assert!(!h.run_dir().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_browser_error_is_reported() {
        let h = Harness::new(RecordingRelay::default());
        h.browser.fail_navigation("/signin");

        let outcome = h.execute().await;

        assert!(!outcome.success);
        assert!(outcome.failure.is_none());
        assert!(outcome.error.unwrap().contains("net::ERR_NAME_NOT_RESOLVED"));
        assert!(h.browser.is_closed());
    }
}
