use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::paths::Paths;
use crate::types::Credential;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GithubConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Previously stored `user_session` cookie, used as a login shortcut.
    #[serde(default)]
    pub session: Option<String>,
}

impl GithubConfig {
    pub fn has_credentials(&self) -> bool {
        !self.username.trim().is_empty() && !self.password.is_empty()
    }

    pub fn initial_credential(&self) -> Option<Credential> {
        self.session.as_deref().and_then(Credential::parse)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleConfig {
    #[serde(default = "default_console_base_url")]
    pub base_url: String,
    /// Root domain shared by every regional console host.
    #[serde(default = "default_console_domain")]
    pub domain: String,
}

fn default_console_base_url() -> String {
    "https://console.run.claw.cloud".to_string()
}

fn default_console_domain() -> String {
    "claw.cloud".to_string()
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            base_url: default_console_base_url(),
            domain: default_console_domain(),
        }
    }
}

impl ConsoleConfig {
    pub fn base_url(&self) -> String {
        self.base_url.trim().trim_end_matches('/').to_string()
    }

    pub fn signin_url(&self) -> String {
        format!("{}/signin", self.base_url())
    }
}

/// Ceilings and pacing for the authentication flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowConfig {
    #[serde(default = "default_two_factor_wait")]
    pub two_factor_wait_secs: u64,
    #[serde(default = "default_device_verify_wait")]
    pub device_verify_wait_secs: u64,
    #[serde(default = "default_callback_wait")]
    pub callback_wait_secs: u64,
    #[serde(default = "default_max_auth_iterations")]
    pub max_auth_iterations: u32,
    #[serde(default = "default_max_github_steps")]
    pub max_github_steps: u32,
    #[serde(default = "default_signin_streak_limit")]
    pub signin_streak_limit: u32,
    /// Length of one wait-loop tick.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_keystroke_delay_ms")]
    pub keystroke_delay_ms: u64,
}

fn default_two_factor_wait() -> u64 {
    120
}

fn default_device_verify_wait() -> u64 {
    30
}

fn default_callback_wait() -> u64 {
    30
}

fn default_max_auth_iterations() -> u32 {
    10
}

fn default_max_github_steps() -> u32 {
    5
}

fn default_signin_streak_limit() -> u32 {
    3
}

fn default_tick_ms() -> u64 {
    1000
}

fn default_keystroke_delay_ms() -> u64 {
    100
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            two_factor_wait_secs: default_two_factor_wait(),
            device_verify_wait_secs: default_device_verify_wait(),
            callback_wait_secs: default_callback_wait(),
            max_auth_iterations: default_max_auth_iterations(),
            max_github_steps: default_max_github_steps(),
            signin_streak_limit: default_signin_streak_limit(),
            tick_ms: default_tick_ms(),
            keystroke_delay_ms: default_keystroke_delay_ms(),
        }
    }
}

impl FlowConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn keystroke_delay(&self) -> Duration {
        Duration::from_millis(self.keystroke_delay_ms)
    }

    pub fn two_factor_wait(&self) -> Duration {
        Duration::from_secs(self.two_factor_wait_secs)
    }
}

/// QingLong panel open API used to persist the rotated session cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_credential_name")]
    pub credential_name: String,
}

fn default_store_url() -> String {
    "http://127.0.0.1:5700".to_string()
}

fn default_credential_name() -> String {
    "GH_SESSION".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            client_id: None,
            client_secret: None,
            credential_name: default_credential_name(),
        }
    }
}

impl StoreConfig {
    pub fn is_configured(&self) -> bool {
        non_blank(&self.client_id) && non_blank(&self.client_secret)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: String,
    /// The only chat allowed to answer code requests, and the alert recipient.
    #[serde(default)]
    pub chat_id: String,
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            chat_id: String::new(),
            api_base: default_telegram_api_base(),
            proxy: None,
        }
    }
}

impl TelegramConfig {
    pub fn is_configured(&self) -> bool {
        !self.token.trim().is_empty() && !self.chat_id.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    /// Explicit Chrome/Chromium binary; auto-detected when absent.
    #[serde(default)]
    pub binary: Option<String>,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_window_size")]
    pub window_size: (u32, u32),
    #[serde(default = "default_page_load_timeout")]
    pub page_load_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string()
}

fn default_window_size() -> (u32, u32) {
    (1920, 1080)
}

fn default_page_load_timeout() -> u64 {
    20
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            binary: None,
            headless: true,
            user_agent: default_user_agent(),
            window_size: default_window_size(),
            page_load_timeout_secs: default_page_load_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    /// Seconds-first cron expression.
    #[serde(default = "default_schedule_cron")]
    pub cron: String,
}

fn default_schedule_cron() -> String {
    "0 0 8 */3 * *".to_string()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: default_schedule_cron(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default)]
    pub flow: FlowConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// File config (explicit path, else the default location) overlaid with
    /// the process environment.
    pub fn resolve(paths: &Paths, explicit: Option<&PathBuf>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => Self::load_or_default(paths)?,
        };
        config.apply_env_with(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment variables. Blank values are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("GH_USERNAME") {
            self.github.username = v.trim().to_string();
        }
        if let Some(v) = get("GH_PASSWORD") {
            self.github.password = v;
        }
        if let Some(v) = get("GH_SESSION") {
            self.github.session = Some(v.trim().to_string());
        }
        if let Some(v) = get("CLAW_CLOUD_URL") {
            self.console.base_url = v.trim().to_string();
        }
        if let Some(v) = get("CLAW_CLOUD_DOMAIN") {
            self.console.domain = v.trim().to_string();
        }
        if let Some(v) = get("TWO_FACTOR_WAIT") {
            match v.trim().parse::<u64>() {
                Ok(secs) => self.flow.two_factor_wait_secs = secs,
                Err(_) => tracing::warn!(value = %v, "Ignoring non-numeric TWO_FACTOR_WAIT"),
            }
        }
        if let Some(v) = get("QL_URL") {
            self.store.url = v.trim().to_string();
        }
        if let Some(v) = get("QL_CLIENT_ID") {
            self.store.client_id = Some(v.trim().to_string());
        }
        if let Some(v) = get("QL_CLIENT_SECRET") {
            self.store.client_secret = Some(v.trim().to_string());
        }
        if let Some(v) = get("TG_BOT_TOKEN") {
            self.telegram.token = v.trim().to_string();
        }
        if let Some(v) = get("TG_CHAT_ID") {
            self.telegram.chat_id = v.trim().to_string();
        }
        if let Some(v) = get("TG_API_BASE") {
            self.telegram.api_base = v.trim().to_string();
        }
        if let Some(v) = get("TG_PROXY") {
            self.telegram.proxy = Some(v.trim().to_string());
        }
        if let Some(v) = get("CHROME_PATH") {
            self.browser.binary = Some(v.trim().to_string());
        }
        if let Some(v) = get("HEADLESS") {
            self.browser.headless = !matches!(v.trim().to_lowercase().as_str(), "0" | "false" | "no");
        }
        if let Some(v) = get("KEEPALIVE_CRON") {
            self.schedule.cron = v.trim().to_string();
        }
    }

    /// Structural checks only; missing GitHub credentials are reported by the
    /// login run itself so that a notification still goes out.
    pub fn validate(&self) -> Result<()> {
        let parsed = url::Url::parse(&self.console.base_url()).map_err(|e| {
            Error::Config(format!("invalid console base URL '{}': {}", self.console.base_url, e))
        })?;
        if parsed.host_str().is_none() {
            return Err(Error::Config(format!(
                "console base URL '{}' has no host",
                self.console.base_url
            )));
        }
        if self.console.domain.trim().is_empty() {
            return Err(Error::Config("console domain must not be empty".to_string()));
        }
        if self.flow.tick_ms == 0 {
            return Err(Error::Config("flow.tickMs must be positive".to_string()));
        }
        Ok(())
    }
}

fn non_blank(value: &Option<String>) -> bool {
    value.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false)
}
