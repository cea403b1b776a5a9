//! In-memory stand-ins for the browser, relay and store.

use async_trait::async_trait;
use clawkeeper_browser::{BrowserDriver, BrowserLauncher, Cookie, Locator};
use clawkeeper_channels::VerificationRelay;
use clawkeeper_core::{Error, Result};
use clawkeeper_storage::{CredentialStore, EnvRecord};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct FakePage {
    url: String,
    content: String,
    cookies: Vec<Cookie>,
}

impl FakePage {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            content: String::new(),
            cookies: Vec::new(),
        }
    }

    pub fn content(mut self, content: &str) -> Self {
        self.content = content.to_string();
        self
    }

    /// Cookie set on github.com when this page appears.
    pub fn cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.push(Cookie::new(name, value, "github.com"));
        self
    }
}

struct Rule {
    action: &'static str,
    needle: String,
    page: FakePage,
}

struct Dwell {
    needle: String,
    after: Duration,
    page: FakePage,
    repeat: bool,
}

#[derive(Default)]
struct FakeState {
    url: String,
    content: String,
    shown_at: Option<Instant>,
    cookies: Vec<Cookie>,
    routes: Vec<(String, FakePage)>,
    rules: Vec<Rule>,
    dwells: Vec<Dwell>,
    hidden: Vec<String>,
    failing_navigation: Vec<String>,
    actions: Vec<String>,
    closed: bool,
}

impl FakeState {
    fn show(&mut self, page: FakePage) {
        self.url = page.url;
        self.content = page.content;
        self.shown_at = Some(Instant::now());
        for cookie in page.cookies {
            self.put_cookie(cookie);
        }
    }

    fn put_cookie(&mut self, cookie: Cookie) {
        self.cookies
            .retain(|c| !(c.name == cookie.name && c.domain == cookie.domain));
        self.cookies.push(cookie);
    }

    /// Apply the first time-based transition that is due.
    fn advance(&mut self) {
        let elapsed = self.shown_at.map(|t| t.elapsed()).unwrap_or_default();
        let due = self
            .dwells
            .iter()
            .position(|d| self.url.contains(&d.needle) && elapsed >= d.after);
        if let Some(pos) = due {
            let page = if self.dwells[pos].repeat {
                self.dwells[pos].page.clone()
            } else {
                self.dwells.remove(pos).page
            };
            self.show(page);
        }
    }

    fn act(&mut self, action: &'static str, locators: &[Locator], text: Option<&str>) -> Option<usize> {
        for (idx, locator) in locators.iter().enumerate() {
            if self.hidden.iter().any(|h| locator.selector.contains(h.as_str())) {
                continue;
            }
            self.actions.push(match text {
                Some(text) => format!("{} {}={}", action, locator.selector, text),
                None => format!("{} {}", action, locator.selector),
            });
            let rule = self
                .rules
                .iter()
                .position(|r| r.action == action && locator.selector.contains(&r.needle));
            if let Some(pos) = rule {
                let page = self.rules.remove(pos).page;
                self.show(page);
            }
            return Some(idx);
        }
        None
    }
}

/// Scripted browser. Clones share state, so a test keeps one handle while
/// the run owns another.
#[derive(Clone)]
pub struct FakeBrowser {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        let browser = Self {
            state: Arc::new(Mutex::new(FakeState::default())),
        };
        browser.show(FakePage::new("about:blank"));
        browser
    }

    fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn show(&self, page: FakePage) {
        self.with(|s| s.show(page));
    }

    /// Navigating to a URL containing `needle` lands on `page`.
    pub fn route(&self, needle: &str, page: FakePage) {
        self.with(|s| s.routes.push((needle.to_string(), page)));
    }

    /// The first `action` on a locator containing `needle` shows `page`.
    pub fn on(&self, action: &'static str, needle: &str, page: FakePage) {
        self.with(|s| {
            s.rules.push(Rule {
                action,
                needle: needle.to_string(),
                page,
            })
        });
    }

    /// Once a page whose URL contains `needle` has been up for `secs`, show `page`.
    pub fn after(&self, needle: &str, secs: u64, page: FakePage) {
        self.dwell(needle, secs, page, false);
    }

    pub fn repeat_after(&self, needle: &str, secs: u64, page: FakePage) {
        self.dwell(needle, secs, page, true);
    }

    fn dwell(&self, needle: &str, secs: u64, page: FakePage, repeat: bool) {
        self.with(|s| {
            s.dwells.push(Dwell {
                needle: needle.to_string(),
                after: Duration::from_secs(secs),
                page,
                repeat,
            })
        });
    }

    /// Locators whose selector contains `needle` match nothing.
    pub fn hide(&self, needle: &str) {
        self.with(|s| s.hidden.push(needle.to_string()));
    }

    pub fn fail_navigation(&self, needle: &str) {
        self.with(|s| s.failing_navigation.push(needle.to_string()));
    }

    pub fn set_cookie(&self, name: &str, value: &str, domain: &str) {
        self.with(|s| s.put_cookie(Cookie::new(name, value, domain)));
    }

    pub fn actions(&self) -> Vec<String> {
        self.with(|s| s.actions.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.with(|s| s.closed)
    }
}

#[async_trait]
impl BrowserDriver for FakeBrowser {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.with(|s| {
            s.actions.push(format!("navigate {}", url));
            if s.failing_navigation.iter().any(|n| url.contains(n.as_str())) {
                return Err(Error::Browser(format!(
                    "Navigation to {} failed: net::ERR_NAME_NOT_RESOLVED",
                    url
                )));
            }
            let page = s
                .routes
                .iter()
                .find(|(needle, _)| url.contains(needle.as_str()))
                .map(|(_, page)| page.clone())
                .unwrap_or_else(|| FakePage::new(url));
            s.show(page);
            Ok(())
        })
    }

    async fn reload(&mut self) -> Result<()> {
        self.with(|s| s.actions.push("reload".to_string()));
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String> {
        Ok(self.with(|s| {
            s.advance();
            s.url.clone()
        }))
    }

    async fn page_content(&mut self) -> Result<String> {
        Ok(self.with(|s| {
            s.advance();
            s.content.clone()
        }))
    }

    async fn cookies(&mut self) -> Result<Vec<Cookie>> {
        Ok(self.with(|s| s.cookies.clone()))
    }

    async fn add_cookie(&mut self, cookie: &Cookie) -> Result<()> {
        self.with(|s| {
            s.actions
                .push(format!("add_cookie {}@{}", cookie.name, cookie.domain));
            s.put_cookie(cookie.clone());
        });
        Ok(())
    }

    async fn click_first(&mut self, locators: &[Locator]) -> Result<Option<usize>> {
        Ok(self.with(|s| s.act("click", locators, None)))
    }

    async fn fill_first(&mut self, locators: &[Locator], text: &str) -> Result<Option<usize>> {
        Ok(self.with(|s| s.act("fill", locators, Some(text))))
    }

    async fn type_first(
        &mut self,
        locators: &[Locator],
        text: &str,
        per_char_delay: Duration,
    ) -> Result<Option<usize>> {
        let typed = self.with(|s| s.act("type", locators, Some(text)));
        if typed.is_some() {
            tokio::time::sleep(per_char_delay * text.chars().count() as u32).await;
        }
        Ok(typed)
    }

    async fn submit_first(&mut self, locators: &[Locator]) -> Result<Option<usize>> {
        Ok(self.with(|s| s.act("submit", locators, None)))
    }

    async fn screenshot(&mut self, path: &Path) -> Result<()> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.with(|s| s.actions.push(format!("screenshot {}", name)));
        Ok(())
    }

    async fn inject_script(&mut self, _source: &str) -> Result<()> {
        self.with(|s| s.actions.push("inject_script".to_string()));
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.with(|s| {
            s.actions.push("close".to_string());
            s.closed = true;
        });
        Ok(())
    }
}

pub struct FakeLauncher {
    browser: FakeBrowser,
    startup: Duration,
}

impl FakeLauncher {
    pub fn new(browser: FakeBrowser) -> Self {
        Self {
            browser,
            startup: Duration::ZERO,
        }
    }

    /// Launcher that takes `startup` to hand out the browser.
    pub fn slow(browser: FakeBrowser, startup: Duration) -> Self {
        Self { browser, startup }
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserDriver>> {
        tokio::time::sleep(self.startup).await;
        Ok(Box::new(self.browser.clone()))
    }
}

/// Relay that records outbound traffic and answers code requests with a
/// fixed reply after a delay, or never.
#[derive(Default)]
pub struct RecordingRelay {
    reply: Option<(Duration, String)>,
    messages: Mutex<Vec<String>>,
    photos: Mutex<Vec<(PathBuf, String)>>,
    requests: AtomicU32,
}

impl RecordingRelay {
    pub fn with_code(delay: Duration, code: &str) -> Self {
        Self {
            reply: Some((delay, code.to_string())),
            ..Default::default()
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn photos(&self) -> Vec<(PathBuf, String)> {
        self.photos.lock().unwrap().clone()
    }

    pub fn code_requests(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VerificationRelay for RecordingRelay {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn notify(&self, text: &str) {
        self.messages.lock().unwrap().push(text.to_string());
    }

    async fn notify_with_image(&self, path: &Path, caption: &str) {
        self.photos
            .lock()
            .unwrap()
            .push((path.to_path_buf(), caption.to_string()));
    }

    async fn request_code(&self, deadline: Instant) -> Option<String> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            Some((delay, code)) if Instant::now() + *delay <= deadline => {
                tokio::time::sleep(*delay).await;
                Some(code.clone())
            }
            _ => {
                tokio::time::sleep_until(deadline).await;
                None
            }
        }
    }
}

type PutCall = (String, String, Option<String>);

pub struct StubStore {
    enabled: bool,
    failing: bool,
    puts: Mutex<Vec<PutCall>>,
}

impl StubStore {
    fn build(enabled: bool, failing: bool) -> Self {
        Self {
            enabled,
            failing,
            puts: Mutex::new(Vec::new()),
        }
    }

    pub fn enabled() -> Self {
        Self::build(true, false)
    }

    pub fn disabled() -> Self {
        Self::build(false, false)
    }

    pub fn failing() -> Self {
        Self::build(true, true)
    }

    pub fn puts(&self) -> Vec<PutCall> {
        self.puts.lock().unwrap().clone()
    }

    pub fn put_count(&self) -> usize {
        self.puts.lock().unwrap().len()
    }
}

#[async_trait]
impl CredentialStore for StubStore {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn get(&self, name: &str) -> Result<Option<EnvRecord>> {
        Ok(self.puts().into_iter().rev().find(|p| p.0 == name).map(|p| EnvRecord {
            id: serde_json::json!(1),
            name: p.0,
            value: p.1,
            remarks: p.2.unwrap_or_default(),
        }))
    }

    async fn put(&self, name: &str, value: &str, remarks: Option<&str>) -> Result<()> {
        if !self.enabled {
            return Err(Error::Storage("credential store disabled".to_string()));
        }
        self.puts
            .lock()
            .unwrap()
            .push((name.to_string(), value.to_string(), remarks.map(str::to_string)));
        if self.failing {
            return Err(Error::Storage("QingLong returned code 500".to_string()));
        }
        Ok(())
    }
}
