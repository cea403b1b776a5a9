use crate::keeper::CredentialUpdate;
use crate::report::RunReport;
use clawkeeper_browser::BrowserDriver;
use clawkeeper_core::{Credential, PageState};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const SESSION_COOKIE: &str = "user_session";

/// Mutable state of one login run, owned by the orchestrating call and
/// passed explicitly to the state machine and the keeper.
pub struct RunContext {
    pub page: Box<dyn BrowserDriver>,
    pub report: RunReport,
    /// Last classified page and the location it was classified from.
    pub state: PageState,
    pub observed_url: String,
    base_url: String,
    /// Credential supplied at start; rotation is measured against it.
    pub initial_credential: Option<Credential>,
    /// Latest `user_session` value seen in the cookie jar.
    pub credential: Option<Credential>,
    pub authenticated: bool,
    pub auth_iteration: u32,
    pub signin_streak: u32,
    pub github_reentries: u32,
    pub credential_update: Option<CredentialUpdate>,
    tick: Duration,
}

impl RunContext {
    pub fn new(
        page: Box<dyn BrowserDriver>,
        report: RunReport,
        base_url: &str,
        initial_credential: Option<Credential>,
        tick: Duration,
    ) -> Self {
        Self {
            page,
            report,
            state: PageState::Unknown,
            observed_url: String::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            initial_credential,
            credential: None,
            authenticated: false,
            auth_iteration: 0,
            signin_streak: 0,
            github_reentries: 0,
            credential_update: None,
            tick,
        }
    }

    /// Console origin all keepalive traffic goes to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replace the region base URL with the origin of `location`. Returns
    /// whether it changed.
    pub fn update_base_url(&mut self, location: &str) -> bool {
        let Some(origin) = origin_of(location) else {
            return false;
        };
        if origin == self.base_url {
            return false;
        }
        let previous = std::mem::replace(&mut self.base_url, origin);
        self.report
            .warn(format!("Region switch: {} -> {}", previous, self.base_url));
        true
    }

    /// Sleep for `ticks` flow ticks.
    pub async fn settle(&self, ticks: u32) {
        tokio::time::sleep(self.tick * ticks).await;
    }

    /// Capture the page into the run directory. Failures only cost the image.
    pub async fn screenshot(&mut self, name: &str) -> Option<PathBuf> {
        let path = self.report.next_screenshot_path(name);
        match self.page.screenshot(&path).await {
            Ok(()) => {
                self.report.record_screenshot(path.clone());
                Some(path)
            }
            Err(e) => {
                debug!(name = %name, "Screenshot failed: {}", e);
                None
            }
        }
    }

    /// Read the GitHub `user_session` cookie and remember it when present.
    pub async fn capture_credential(&mut self) -> Option<Credential> {
        let cookies = match self.page.cookies().await {
            Ok(cookies) => cookies,
            Err(e) => {
                debug!("Cookie read failed: {}", e);
                return None;
            }
        };
        let found = cookies
            .iter()
            .find(|c| c.name == SESSION_COOKIE && c.domain.contains("github"))
            .and_then(|c| Credential::parse(&c.value))?;
        self.credential = Some(found.clone());
        Some(found)
    }
}

fn origin_of(location: &str) -> Option<String> {
    let url = Url::parse(location.trim()).ok()?;
    url.host_str()?;
    Some(url.origin().ascii_serialization())
}
