//! Classify-then-act loop that drives a browser from the console sign-in
//! page through GitHub OAuth to the authenticated console.

use crate::classifier::{is_device_verification_location, is_two_factor_location, PageClassifier};
use crate::context::RunContext;
use clawkeeper_browser::Locator;
use clawkeeper_channels::VerificationRelay;
use clawkeeper_core::config::{FlowConfig, GithubConfig};
use clawkeeper_core::{Config, PageState, Result, TwoFactorMethod};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated,
    Failed(FailureReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    #[error("GitHub login button not found")]
    LoginAffordanceMissing,
    #[error("GitHub rejected the credentials")]
    CredentialsRejected,
    #[error("could not enter GitHub credentials")]
    CredentialEntryFailed,
    #[error("device verification timed out")]
    DeviceVerificationTimeout,
    #[error("two-factor approval timed out")]
    TwoFactorTimeout,
    #[error("no verification code received")]
    CodeNotReceived,
    #[error("verification code rejected")]
    CodeRejected,
    #[error("returned to sign-in after OAuth callback")]
    CallbackBounced,
    #[error("OAuth callback timed out")]
    CallbackTimeout,
    #[error("stuck on the sign-in page")]
    SigninLoop,
    #[error("authentication did not finish within the iteration limit")]
    IterationsExhausted,
    #[error("keepalive was redirected to sign-in")]
    KeepaliveRejected,
}

impl FailureReason {
    /// Failures that abort the run without any retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::LoginAffordanceMissing)
    }
}

enum Step {
    Advanced,
    Failed(FailureReason),
}

enum CallbackResult {
    Authenticated,
    NeedsGithub,
    Bounced,
    TimedOut,
}

fn github_button() -> [Locator; 3] {
    [
        Locator::xpath("//button[contains(text(),'GitHub')]"),
        Locator::xpath("//a[contains(text(),'GitHub')]"),
        Locator::xpath("//*[contains(text(),'GitHub')]"),
    ]
}

fn submit_button() -> [Locator; 1] {
    [Locator::css(r#"input[type="submit"], button[type="submit"]"#)]
}

fn authenticator_switch() -> [Locator; 3] {
    [
        Locator::xpath("//a[contains(text(),'Use your authenticator app')]"),
        Locator::xpath("//a[contains(text(),'authentication app')]"),
        Locator::css("[href*='two-factor/app']"),
    ]
}

fn code_inputs() -> [Locator; 4] {
    [
        Locator::css(r#"input[autocomplete="one-time-code"]"#),
        Locator::css(r#"input[name="app_otp"]"#),
        Locator::css(r#"input[name="otp"]"#),
        Locator::css("input#app_totp"),
    ]
}

fn authorize_button() -> [Locator; 3] {
    [
        Locator::xpath("//button[@name='authorize']"),
        Locator::xpath("//button[contains(text(),'Authorize')]"),
        Locator::css("button[name='authorize']"),
    ]
}

const WRONG_PASSWORD_MARKER: &str = "incorrect username or password";

pub struct AuthStateMachine<'a> {
    classifier: PageClassifier,
    flow: &'a FlowConfig,
    github: &'a GithubConfig,
    relay: &'a dyn VerificationRelay,
}

impl<'a> AuthStateMachine<'a> {
    pub fn new(config: &'a Config, relay: &'a dyn VerificationRelay) -> Self {
        Self {
            classifier: PageClassifier::new(&config.console.domain),
            flow: &config.flow,
            github: &config.github,
            relay,
        }
    }

    /// Classify the current page. Driver errors read as `Unknown`.
    pub async fn observe(&self, ctx: &mut RunContext) -> PageState {
        let location = match ctx.page.current_url().await {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!("Location query failed: {}", e);
                String::new()
            }
        };
        let content = ctx.page.page_content().await.unwrap_or_default();
        let state = self.classifier.classify(&location, &content);
        if state == PageState::AuthenticatedConsole {
            ctx.update_base_url(&location);
        }
        ctx.state = state;
        ctx.observed_url = location;
        state
    }

    /// Run until the console is reached or a failure is terminal.
    pub async fn run(&self, ctx: &mut RunContext) -> AuthOutcome {
        let landing = self.observe(ctx).await;
        ctx.report.info(format!("Landing page: {}", landing));

        if landing == PageState::AuthenticatedConsole {
            return self.authenticated(ctx, "Already signed in to the console");
        }

        if !landing.is_github() && landing != PageState::OAuthCallback {
            ctx.report.step("Clicking the GitHub login button");
            match ctx.page.click_first(&github_button()).await {
                Ok(Some(_)) => ctx.report.success("Clicked: GitHub login"),
                Ok(None) => {
                    ctx.report.error("GitHub login button not found");
                    return AuthOutcome::Failed(FailureReason::LoginAffordanceMissing);
                }
                Err(e) => {
                    ctx.report.error(format!("GitHub login button not clickable: {}", e));
                    return AuthOutcome::Failed(FailureReason::LoginAffordanceMissing);
                }
            }
            ctx.settle(3).await;
        }

        ctx.report.step("Working through the authentication flow");
        let max = self.flow.max_auth_iterations;
        for iteration in 1..=max {
            ctx.auth_iteration = iteration;
            let state = self.observe(ctx).await;
            ctx.report.info(format!("Auth loop [{}/{}]: {}", iteration, max, state));

            if state != PageState::Signin {
                ctx.signin_streak = 0;
            }

            match state {
                PageState::OAuthCallback => match self.wait_for_callback(ctx).await {
                    CallbackResult::Authenticated => {
                        return self.authenticated(ctx, "OAuth callback completed");
                    }
                    CallbackResult::NeedsGithub => {
                        ctx.github_reentries += 1;
                        ctx.report.warn(format!(
                            "Callback returned to GitHub (re-entry {})",
                            ctx.github_reentries
                        ));
                    }
                    CallbackResult::Bounced => {
                        ctx.report.error("Callback returned to the sign-in page");
                        return AuthOutcome::Failed(FailureReason::CallbackBounced);
                    }
                    CallbackResult::TimedOut => {
                        ctx.report.error("OAuth callback timed out");
                        return AuthOutcome::Failed(FailureReason::CallbackTimeout);
                    }
                },
                PageState::AuthenticatedConsole => {
                    ctx.settle(2).await;
                    if self.observe(ctx).await == PageState::AuthenticatedConsole {
                        return self.authenticated(ctx, "Reached the console");
                    }
                    ctx.report.warn("Console page did not hold");
                }
                PageState::Signin => {
                    ctx.signin_streak += 1;
                    if iteration > 2 && ctx.signin_streak >= self.flow.signin_streak_limit {
                        ctx.report.error(format!(
                            "Still on sign-in after {} consecutive checks",
                            ctx.signin_streak
                        ));
                        return AuthOutcome::Failed(FailureReason::SigninLoop);
                    }
                    ctx.settle(2).await;
                    if let Ok(Some(_)) = ctx.page.click_first(&github_button()).await {
                        ctx.settle(3).await;
                    }
                }
                s if s.is_github() => {
                    if let Err(reason) = self.github_flow(ctx).await {
                        return AuthOutcome::Failed(reason);
                    }
                }
                _ => ctx.settle(2).await,
            }
        }

        ctx.report.error(format!("No console after {} attempts", max));
        AuthOutcome::Failed(FailureReason::IterationsExhausted)
    }

    fn authenticated(&self, ctx: &mut RunContext, message: &str) -> AuthOutcome {
        ctx.authenticated = true;
        ctx.report.success(format!("{} (region: {})", message, ctx.base_url()));
        AuthOutcome::Authenticated
    }

    async fn wait_for_callback(&self, ctx: &mut RunContext) -> CallbackResult {
        ctx.report.step("Waiting for the OAuth callback");
        for tick in 0..self.flow.callback_wait_secs {
            let state = self.observe(ctx).await;
            if tick % 3 == 0 {
                tracing::info!(tick, state = %state, "Callback wait");
            }
            match state {
                PageState::AuthenticatedConsole => return CallbackResult::Authenticated,
                PageState::Signin => return CallbackResult::Bounced,
                s if s.is_github() => return CallbackResult::NeedsGithub,
                _ => {}
            }
            ctx.settle(1).await;
        }
        CallbackResult::TimedOut
    }

    /// Bounded pass over GitHub pages; hands control back once the browser
    /// leaves GitHub.
    async fn github_flow(&self, ctx: &mut RunContext) -> std::result::Result<(), FailureReason> {
        let max = self.flow.max_github_steps;
        for step in 1..=max {
            let state = self.observe(ctx).await;
            ctx.report.info(format!("GitHub step [{}/{}]: {}", step, max, state));

            let action = match state {
                PageState::GithubLogin => self.password_login(ctx).await,
                PageState::GithubOAuthAuthorize => self.authorize(ctx).await,
                PageState::GithubTwoFactor(TwoFactorMethod::MobilePush) => self.await_mobile_approval(ctx).await,
                PageState::GithubTwoFactor(TwoFactorMethod::CodeEntry) => self.enter_relayed_code(ctx).await,
                PageState::GithubDeviceVerification => self.await_device_approval(ctx).await,
                PageState::OAuthCallback | PageState::AuthenticatedConsole | PageState::Signin => {
                    return Ok(());
                }
                PageState::GithubOther | PageState::Unknown => {
                    ctx.settle(2).await;
                    continue;
                }
            };

            match action {
                Ok(Step::Advanced) => ctx.settle(2).await,
                Ok(Step::Failed(reason)) => return Err(reason),
                Err(e) => ctx.report.error(format!("Action on {} failed: {}", state, e)),
            }
        }
        Ok(())
    }

    async fn password_login(&self, ctx: &mut RunContext) -> Result<Step> {
        ctx.report.step("Signing in to GitHub");
        ctx.screenshot("github_login").await;

        let login = ctx
            .page
            .fill_first(&[Locator::css(r#"input[name="login"]"#)], &self.github.username)
            .await?;
        let password = ctx
            .page
            .fill_first(&[Locator::css(r#"input[name="password"]"#)], &self.github.password)
            .await?;
        if login.is_none() || password.is_none() {
            ctx.report.error("GitHub credential fields not found");
            return Ok(Step::Failed(FailureReason::CredentialEntryFailed));
        }
        ctx.report.success("Credentials entered");

        if ctx.page.click_first(&submit_button()).await?.is_none() {
            ctx.page
                .submit_first(&[Locator::css(r#"input[name="password"]"#)])
                .await?;
        }
        ctx.settle(3).await;

        if self.observe(ctx).await == PageState::GithubLogin {
            let content = ctx.page.page_content().await.unwrap_or_default();
            if content.to_lowercase().contains(WRONG_PASSWORD_MARKER) {
                ctx.report.error("GitHub says: incorrect username or password");
                return Ok(Step::Failed(FailureReason::CredentialsRejected));
            }
        }

        if ctx.capture_credential().await.is_some() {
            ctx.report.success("GitHub login accepted");
        }
        Ok(Step::Advanced)
    }

    async fn await_device_approval(&self, ctx: &mut RunContext) -> Result<Step> {
        let wait = self.flow.device_verify_wait_secs;
        ctx.report
            .warn(format!("Device verification required, waiting {}s", wait));
        self.relay
            .notify(&format!(
                "⚠️ <b>Device verification required</b>\nApprove within {} seconds",
                wait
            ))
            .await;
        if let Some(shot) = ctx.screenshot("device_verification").await {
            self.relay.notify_with_image(&shot, "Device verification page").await;
        }

        for tick in 1..=wait {
            ctx.settle(1).await;
            let location = ctx.page.current_url().await?;
            if !is_device_verification_location(&location) {
                ctx.report.success("Device verification approved");
                return Ok(Step::Advanced);
            }
            if tick % 5 == 0 {
                if let Err(e) = ctx.page.reload().await {
                    tracing::debug!("Reload during device verification failed: {}", e);
                }
            }
        }

        ctx.report.error("Device verification timed out");
        Ok(Step::Failed(FailureReason::DeviceVerificationTimeout))
    }

    async fn await_mobile_approval(&self, ctx: &mut RunContext) -> Result<Step> {
        let wait = self.flow.two_factor_wait_secs;
        ctx.report
            .warn(format!("Two-factor approval (GitHub Mobile) required, waiting {}s", wait));
        self.relay
            .notify("⚠️ <b>Two-factor approval required</b>\nApprove the sign-in in the GitHub mobile app")
            .await;
        if let Some(shot) = ctx.screenshot("two_factor_mobile").await {
            self.relay.notify_with_image(&shot, "Two-factor page").await;
        }

        for tick in 1..=wait {
            ctx.settle(1).await;
            let location = ctx.page.current_url().await?;
            if self.classifier.classify(&location, "") == PageState::GithubLogin {
                ctx.report.error("Back on the GitHub login page, credentials rejected");
                return Ok(Step::Failed(FailureReason::CredentialsRejected));
            }
            if !is_two_factor_location(&location) {
                ctx.report.success("Two-factor approved");
                ctx.capture_credential().await;
                return Ok(Step::Advanced);
            }
            if tick % 10 == 0 {
                ctx.report.info(format!("Waiting for approval ({}/{}s)", tick, wait));
            }
        }

        ctx.report.error("Two-factor approval timed out");
        Ok(Step::Failed(FailureReason::TwoFactorTimeout))
    }

    async fn enter_relayed_code(&self, ctx: &mut RunContext) -> Result<Step> {
        ctx.report.warn("Two-factor code required");
        let shot = ctx.screenshot("two_factor_code").await;

        match ctx.page.click_first(&authenticator_switch()).await {
            Ok(Some(_)) => {
                ctx.report.success("Switched to authenticator code entry");
                ctx.settle(2).await;
            }
            Ok(None) => {}
            Err(e) => tracing::debug!("Authenticator switch failed: {}", e),
        }

        self.relay
            .notify("🔐 <b>Verification code required</b>\nReply with: <code>/code 123456</code>")
            .await;
        if let Some(shot) = shot {
            self.relay.notify_with_image(&shot, "Two-factor page").await;
        }

        let deadline = Instant::now() + self.flow.two_factor_wait();
        let Some(code) = self.relay.request_code(deadline).await else {
            ctx.report.error("Timed out waiting for the verification code");
            return Ok(Step::Failed(FailureReason::CodeNotReceived));
        };
        ctx.report.success("Verification code received");

        let before = ctx.page.current_url().await?;
        if ctx
            .page
            .type_first(&code_inputs(), &code, self.flow.keystroke_delay())
            .await?
            .is_none()
        {
            ctx.report.error("Verification code input not found");
            return Ok(Step::Failed(FailureReason::CodeRejected));
        }
        ctx.report.success("Verification code entered");
        ctx.settle(2).await;

        if ctx.page.current_url().await? != before {
            ctx.capture_credential().await;
            return Ok(Step::Advanced);
        }

        ctx.page.submit_first(&code_inputs()).await?;
        ctx.settle(3).await;

        if is_two_factor_location(&ctx.page.current_url().await?) {
            ctx.report.error("Verification code was not accepted");
            return Ok(Step::Failed(FailureReason::CodeRejected));
        }
        ctx.capture_credential().await;
        Ok(Step::Advanced)
    }

    async fn authorize(&self, ctx: &mut RunContext) -> Result<Step> {
        ctx.report.step("Authorizing the OAuth application");
        // last point the session cookie is reliably visible before the redirect
        ctx.capture_credential().await;

        if ctx.page.click_first(&authorize_button()).await?.is_some() {
            ctx.report.success("Clicked: OAuth authorize");
        } else {
            ctx.report.warn("Authorize button not found");
        }
        ctx.settle(3).await;
        Ok(Step::Advanced)
    }
}
