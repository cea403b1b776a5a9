//! The browser capability the login flow drives, and its CDP implementation.

use crate::session::BrowserSession;
use async_trait::async_trait;
use base64::Engine;
use clawkeeper_core::config::BrowserConfig;
use clawkeeper_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// How a selector is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Css,
    XPath,
}

/// One element lookup. Callers pass ordered slices of these; the first
/// visible and enabled match wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub strategy: Strategy,
    pub selector: String,
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self {
            strategy: Strategy::Css,
            selector: selector.into(),
        }
    }

    pub fn xpath(selector: impl Into<String>) -> Self {
        Self {
            strategy: Strategy::XPath,
            selector: selector.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

impl Cookie {
    pub fn new(name: &str, value: &str, domain: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.to_string(),
            path: default_cookie_path(),
        }
    }
}

/// Everything the authentication flow needs from a browser.
///
/// The `*_first` operations return the index of the locator that matched, or
/// `None` when no locator produced a visible, enabled element.
#[async_trait]
pub trait BrowserDriver: Send {
    async fn navigate(&mut self, url: &str) -> Result<()>;
    async fn reload(&mut self) -> Result<()>;
    async fn current_url(&mut self) -> Result<String>;
    async fn page_content(&mut self) -> Result<String>;
    async fn cookies(&mut self) -> Result<Vec<Cookie>>;
    async fn add_cookie(&mut self, cookie: &Cookie) -> Result<()>;
    async fn click_first(&mut self, locators: &[Locator]) -> Result<Option<usize>>;
    async fn fill_first(&mut self, locators: &[Locator], text: &str) -> Result<Option<usize>>;
    /// Like `fill_first` but one character at a time with `delay` in between.
    async fn type_first(
        &mut self,
        locators: &[Locator],
        text: &str,
        delay: Duration,
    ) -> Result<Option<usize>>;
    /// Press Enter inside the first matching field.
    async fn submit_first(&mut self, locators: &[Locator]) -> Result<Option<usize>>;
    async fn screenshot(&mut self, path: &Path) -> Result<()>;
    async fn inject_script(&mut self, source: &str) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// Produces a fresh browser for each run.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserDriver>>;
}

pub struct ChromeLauncher {
    config: BrowserConfig,
    profiles_dir: PathBuf,
}

impl ChromeLauncher {
    pub fn new(config: BrowserConfig, profiles_dir: PathBuf) -> Self {
        Self { config, profiles_dir }
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserDriver>> {
        let profile = self
            .profiles_dir
            .join(format!("run-{}", chrono::Utc::now().timestamp_millis()));
        let session = BrowserSession::launch(&self.config, profile).await?;
        let timeout = Duration::from_secs(self.config.page_load_timeout_secs);
        Ok(Box::new(CdpDriver::new(session, timeout)))
    }
}

pub struct CdpDriver {
    session: BrowserSession,
    page_load_timeout: Duration,
    closed: bool,
}

impl CdpDriver {
    pub fn new(session: BrowserSession, page_load_timeout: Duration) -> Self {
        Self {
            session,
            page_load_timeout,
            closed: false,
        }
    }

    async fn wait_for_load(&self) {
        let start = tokio::time::Instant::now();
        // Page.navigate returns before the new document exists; give it a beat.
        tokio::time::sleep(Duration::from_millis(300)).await;
        while start.elapsed() < self.page_load_timeout {
            match self.session.cdp.evaluate_js("document.readyState").await {
                Ok(Value::String(state)) if state == "complete" => return,
                Ok(_) => {}
                Err(e) => debug!("readyState probe failed: {}", e),
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        warn!(
            timeout_secs = self.page_load_timeout.as_secs(),
            "Page did not finish loading in time"
        );
    }

    async fn act_first(&self, locators: &[Locator], action: &str) -> Result<Option<usize>> {
        for (index, locator) in locators.iter().enumerate() {
            let expression = element_script(locator, action);
            match self.session.cdp.evaluate_js(&expression).await {
                Ok(Value::Bool(true)) => {
                    debug!(selector = %locator.selector, "Locator matched");
                    return Ok(Some(index));
                }
                Ok(_) => continue,
                Err(e) => {
                    debug!(selector = %locator.selector, "Locator probe failed: {}", e);
                    continue;
                }
            }
        }
        Ok(None)
    }

    async fn dispatch_input_events(&self) -> Result<()> {
        self.session
            .cdp
            .evaluate_js(
                "document.activeElement && (document.activeElement.dispatchEvent(new Event('input', {bubbles: true})), document.activeElement.dispatchEvent(new Event('change', {bubbles: true})))",
            )
            .await?;
        Ok(())
    }
}

const CLICK_ACTION: &str = "el.scrollIntoView({block: 'center'}); el.click();";
const FOCUS_ACTION: &str = "el.scrollIntoView({block: 'center'}); el.focus();";
const FOCUS_CLEAR_ACTION: &str =
    "el.scrollIntoView({block: 'center'}); el.focus(); if ('value' in el) { el.value = ''; }";

/// Script that resolves `locator`, checks visibility and enablement, then
/// runs `action` against `el`. Evaluates to `true` only if the action ran.
fn element_script(locator: &Locator, action: &str) -> String {
    let selector = Value::String(locator.selector.clone()).to_string();
    let lookup = match locator.strategy {
        Strategy::Css => "document.querySelector(sel)",
        Strategy::XPath => {
            "document.evaluate(sel, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue"
        }
    };
    format!(
        concat!(
            "(() => {{ const sel = {}; let el = null;",
            " try {{ el = {}; }} catch (e) {{ return false; }}",
            " if (!el) return false;",
            " const rect = el.getBoundingClientRect(); const style = window.getComputedStyle(el);",
            " if (rect.width === 0 || rect.height === 0 || style.visibility === 'hidden' || style.display === 'none') return false;",
            " if (el.disabled) return false;",
            " {} return true; }})()"
        ),
        selector, lookup, action
    )
}

fn parse_cookie(raw: &Value) -> Option<Cookie> {
    serde_json::from_value(raw.clone()).ok()
}

#[async_trait]
impl BrowserDriver for CdpDriver {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        debug!(url = %url, "Navigating");
        self.session.cdp.navigate(url).await?;
        self.wait_for_load().await;
        Ok(())
    }

    async fn reload(&mut self) -> Result<()> {
        self.session.cdp.reload().await?;
        self.wait_for_load().await;
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String> {
        match self.session.cdp.evaluate_js("window.location.href").await? {
            Value::String(url) => Ok(url),
            other => Err(Error::Browser(format!("Unexpected location value: {}", other))),
        }
    }

    async fn page_content(&mut self) -> Result<String> {
        match self
            .session
            .cdp
            .evaluate_js("document.documentElement ? document.documentElement.outerHTML : ''")
            .await?
        {
            Value::String(html) => Ok(html),
            _ => Ok(String::new()),
        }
    }

    async fn cookies(&mut self) -> Result<Vec<Cookie>> {
        let raw = self.session.cdp.get_all_cookies().await?;
        Ok(raw.iter().filter_map(parse_cookie).collect())
    }

    async fn add_cookie(&mut self, cookie: &Cookie) -> Result<()> {
        self.session
            .cdp
            .set_cookie(&cookie.name, &cookie.value, &cookie.domain, &cookie.path)
            .await
    }

    async fn click_first(&mut self, locators: &[Locator]) -> Result<Option<usize>> {
        self.act_first(locators, CLICK_ACTION).await
    }

    async fn fill_first(&mut self, locators: &[Locator], text: &str) -> Result<Option<usize>> {
        let Some(index) = self.act_first(locators, FOCUS_CLEAR_ACTION).await? else {
            return Ok(None);
        };
        self.session.cdp.insert_text(text).await?;
        self.dispatch_input_events().await?;
        Ok(Some(index))
    }

    async fn type_first(
        &mut self,
        locators: &[Locator],
        text: &str,
        delay: Duration,
    ) -> Result<Option<usize>> {
        let Some(index) = self.act_first(locators, FOCUS_CLEAR_ACTION).await? else {
            return Ok(None);
        };
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            self.session.cdp.insert_text(ch.encode_utf8(&mut buf)).await?;
            tokio::time::sleep(delay).await;
        }
        self.dispatch_input_events().await?;
        Ok(Some(index))
    }

    async fn submit_first(&mut self, locators: &[Locator]) -> Result<Option<usize>> {
        let Some(index) = self.act_first(locators, FOCUS_ACTION).await? else {
            return Ok(None);
        };
        self.session.cdp.dispatch_key_event("keyDown", "Enter", "Enter").await?;
        self.session.cdp.dispatch_key_event("keyUp", "Enter", "Enter").await?;
        Ok(Some(index))
    }

    async fn screenshot(&mut self, path: &Path) -> Result<()> {
        let data = self.session.cdp.screenshot().await?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data.as_bytes())
            .map_err(|e| Error::Browser(format!("Bad screenshot payload: {}", e)))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn inject_script(&mut self, source: &str) -> Result<()> {
        self.session.cdp.add_script_on_new_document(source).await?;
        // Also apply to the document that is already open.
        if let Err(e) = self.session.cdp.evaluate_js(source).await {
            debug!("Script did not apply to current document: {}", e);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.session.close().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_element_script_escapes_selector() {
        let locator = Locator::xpath("//button[contains(text(),'GitHub')]");
        let script = element_script(&locator, CLICK_ACTION);
        assert!(script.contains(r#"const sel = "//button[contains(text(),'GitHub')]";"#));
        assert!(script.contains("XPathResult.FIRST_ORDERED_NODE_TYPE"));
        assert!(script.contains("el.click();"));
    }

    #[test]
    fn test_element_script_css_lookup() {
        let locator = Locator::css(r#"input[name="login"]"#);
        let script = element_script(&locator, FOCUS_CLEAR_ACTION);
        assert!(script.contains(r#"const sel = "input[name=\"login\"]";"#));
        assert!(script.contains("document.querySelector(sel)"));
        assert!(script.contains("el.disabled"));
    }

    #[test]
    fn test_parse_cdp_cookie() {
        let raw = json!({
            "name": "user_session",
            "value": "abc",
            "domain": ".github.com",
            "path": "/",
            "expires": 1.0,
            "httpOnly": true
        });
        let cookie = parse_cookie(&raw).unwrap();
        assert_eq!(cookie.name, "user_session");
        assert_eq!(cookie.domain, ".github.com");

        let partial = parse_cookie(&json!({"name": "a", "value": "b"})).unwrap();
        assert_eq!(partial.path, "/");
    }
}
