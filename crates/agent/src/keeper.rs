use crate::context::RunContext;
use clawkeeper_channels::VerificationRelay;
use clawkeeper_storage::CredentialStore;

const ROTATED_REMARKS: &str = "GitHub session cookie (auto-updated)";

/// What happened to the session credential at the end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialUpdate {
    /// Same value as at start; nothing written.
    Unchanged,
    /// Rotated value persisted to the store.
    Stored,
    /// Rotated value sent to the operator for manual update.
    ManualUpdateRequired,
    /// No GitHub session cookie was observed.
    Missing,
}

/// Post-login keepalive and credential reconciliation.
pub struct SessionKeeper<'a> {
    store: &'a dyn CredentialStore,
    relay: &'a dyn VerificationRelay,
    credential_name: &'a str,
}

impl<'a> SessionKeeper<'a> {
    pub fn new(
        store: &'a dyn CredentialStore,
        relay: &'a dyn VerificationRelay,
        credential_name: &'a str,
    ) -> Self {
        Self {
            store,
            relay,
            credential_name,
        }
    }

    /// Visit `{base_url}/apps`; a redirect to sign-in means the session did
    /// not hold.
    pub async fn keepalive(&self, ctx: &mut RunContext) -> bool {
        let target = format!("{}/apps", ctx.base_url());
        ctx.report.step(format!("Keepalive ({})", ctx.base_url()));

        if let Err(e) = ctx.page.navigate(&target).await {
            ctx.report.error(format!("Keepalive navigation failed: {}", e));
            return false;
        }
        ctx.settle(5).await;

        let location = match ctx.page.current_url().await {
            Ok(location) => location,
            Err(e) => {
                ctx.report.error(format!("Keepalive check failed: {}", e));
                return false;
            }
        };
        if location.to_lowercase().contains("/signin") {
            ctx.report.error("Keepalive was redirected to the sign-in page");
            return false;
        }

        ctx.report.success("Keepalive succeeded");
        if let Some(shot) = ctx.screenshot("console").await {
            ctx.report.set_final_screenshot(shot);
        }
        true
    }

    /// Persist the session cookie if it differs from the one the run
    /// started with.
    pub async fn reconcile_credential(&self, ctx: &mut RunContext) -> CredentialUpdate {
        ctx.report.step("Checking the GitHub session cookie");
        let observed = match ctx.capture_credential().await {
            Some(credential) => Some(credential),
            None => ctx.credential.clone(),
        };

        let update = match observed {
            None => {
                ctx.report.info("No GitHub session cookie observed");
                CredentialUpdate::Missing
            }
            Some(credential) if Some(&credential) == ctx.initial_credential.as_ref() => {
                ctx.report.info("Session cookie unchanged");
                CredentialUpdate::Unchanged
            }
            Some(credential) => {
                ctx.report
                    .success(format!("New session cookie: {}", credential.masked()));
                if self.persist(ctx, credential.expose()).await {
                    self.relay
                        .notify(&format!(
                            "🔑 <b>GitHub session cookie rotated</b>\nStored as {}",
                            self.credential_name
                        ))
                        .await;
                    CredentialUpdate::Stored
                } else {
                    self.relay
                        .notify(&format!(
                            "🔑 Please update {} manually:\n<code>{}</code>",
                            self.credential_name,
                            credential.expose()
                        ))
                        .await;
                    CredentialUpdate::ManualUpdateRequired
                }
            }
        };
        ctx.credential_update = Some(update);
        update
    }

    async fn persist(&self, ctx: &mut RunContext, value: &str) -> bool {
        if !self.store.is_enabled() {
            ctx.report.warn("Credential store disabled, manual update needed");
            return false;
        }
        match self
            .store
            .put(self.credential_name, value, Some(ROTATED_REMARKS))
            .await
        {
            Ok(()) => {
                ctx.report.success(format!("{} updated in the credential store", self.credential_name));
                true
            }
            Err(e) => {
                ctx.report.warn(format!("Credential store update failed: {}", e));
                false
            }
        }
    }
}
