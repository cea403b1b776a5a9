//! Chrome process lifecycle for a single login run.

use super::cdp::CdpClient;
use clawkeeper_core::config::BrowserConfig;
use clawkeeper_core::{Error, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// A launched Chrome with a CDP connection to its first page target.
pub struct BrowserSession {
    pub debug_port: u16,
    chrome_process: Child,
    pub cdp: CdpClient,
    /// Throwaway profile, removed on close.
    pub user_data_dir: PathBuf,
}

impl BrowserSession {
    pub async fn launch(config: &BrowserConfig, user_data_dir: PathBuf) -> Result<Self> {
        let browser_path = match config.binary.as_deref() {
            Some(path) => path.to_string(),
            None => find_browser_binary()
                .ok_or_else(|| Error::Browser("Chrome/Chromium not found. Set CHROME_PATH.".to_string()))?,
        };

        let debug_port = find_free_port().await?;
        std::fs::create_dir_all(&user_data_dir)?;

        info!(
            port = debug_port,
            headless = config.headless,
            binary = %browser_path,
            "Launching browser"
        );

        // removes the profile on error or when this future is dropped
        let mut guard = ProfileGuard::new(&user_data_dir);
        let (chrome_process, cdp) = start(config, &browser_path, debug_port, &user_data_dir).await?;
        guard.disarm();

        Ok(Self {
            debug_port,
            chrome_process,
            cdp,
            user_data_dir,
        })
    }

    /// Best-effort shutdown: graceful close, kill, profile removal.
    pub async fn close(&mut self) {
        if let Err(e) = self.cdp.send_command("Browser.close", json!({})).await {
            debug!("CDP Browser.close failed (may already be closed): {}", e);
        }
        let _ = self.chrome_process.kill().await;
        remove_profile(&self.user_data_dir);
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        let _ = self.chrome_process.start_kill();
    }
}

/// Spawn Chrome and attach to its first page. The child is killed when
/// this fails part way.
async fn start(
    config: &BrowserConfig,
    browser_path: &str,
    debug_port: u16,
    user_data_dir: &Path,
) -> Result<(Child, CdpClient)> {
    let mut child = Command::new(browser_path)
        .args(build_browser_args(config, debug_port, user_data_dir))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Browser(format!("Failed to launch {}: {}", browser_path, e)))?;

    wait_for_cdp_ready(&mut child, debug_port, 15).await?;
    let page_ws_url = get_page_ws_url(debug_port).await?;
    let cdp = CdpClient::connect(&page_ws_url).await?;

    cdp.enable_domain("Page").await?;
    cdp.enable_domain("Runtime").await?;
    cdp.enable_domain("Network").await?;

    info!(ws_url = %page_ws_url, "CDP connection established");
    Ok((child, cdp))
}

struct ProfileGuard {
    dir: PathBuf,
    armed: bool,
}

impl ProfileGuard {
    fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ProfileGuard {
    fn drop(&mut self) {
        if self.armed {
            remove_profile(&self.dir);
        }
    }
}

fn remove_profile(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        debug!(dir = %dir.display(), "Profile cleanup failed: {}", e);
    }
}

fn build_browser_args(config: &BrowserConfig, debug_port: u16, user_data_dir: &Path) -> Vec<String> {
    let (width, height) = config.window_size;
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
        "--password-store=basic".to_string(),
        "--disable-blink-features=AutomationControlled".to_string(),
        format!("--window-size={},{}", width, height),
        format!("--user-agent={}", config.user_agent),
    ];
    if config.headless {
        args.push("--headless=new".to_string());
    }
    args.push("about:blank".to_string());
    args
}

/// Find a Chrome/Chromium binary on the system.
pub fn find_browser_binary() -> Option<String> {
    let candidates: Vec<&str> = if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "/usr/bin/chromium-browser",
            "/usr/bin/chromium",
            "/usr/bin/google-chrome",
        ]
    } else {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    };

    for candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok() {
            return Some(candidate.to_string());
        }
    }
    None
}

async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

/// Poll /json/version until the debugging endpoint answers. Gives up early
/// when the browser process has already exited.
async fn wait_for_cdp_ready(child: &mut Child, port: u16, timeout_secs: u64) -> Result<String> {
    let start = tokio::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if start.elapsed() > timeout {
            return Err(Error::Timeout(format!(
                "Chrome CDP not ready after {}s on port {}",
                timeout_secs, port
            )));
        }

        if let Ok(Some(status)) = child.try_wait() {
            return Err(Error::Browser(format!("Browser exited during startup ({})", status)));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// First "page" target from /json/list. Retries since the tab may lag the
/// browser endpoint.
async fn get_page_ws_url(port: u16) -> Result<String> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        let Ok(resp) = reqwest::get(&url).await else {
            continue;
        };
        let Ok(targets) = resp.json::<Vec<Value>>().await else {
            continue;
        };

        if let Some(ws_url) = page_target_ws_url(&targets) {
            return Ok(ws_url);
        }
    }

    Err(Error::Browser("No page target found after retries".to_string()))
}

fn page_target_ws_url(targets: &[Value]) -> Option<String> {
    targets
        .iter()
        .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
        .find_map(|t| t.get("webSocketDebuggerUrl").and_then(|v| v.as_str()))
        .map(|s| s.to_string())
}
