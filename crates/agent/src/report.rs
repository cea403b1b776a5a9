use chrono::{DateTime, Local};
use clawkeeper_channels::VerificationRelay;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Number of trailing log lines quoted in the final notification.
const SUMMARY_TAIL: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Warn,
    Error,
    Step,
}

impl LogLevel {
    fn icon(&self) -> &'static str {
        match self {
            Self::Info => "ℹ️",
            Self::Success => "✅",
            Self::Warn => "⚠️",
            Self::Error => "❌",
            Self::Step => "🔹",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogLine {
    pub level: LogLevel,
    pub at: DateTime<Local>,
    pub message: String,
}

impl LogLine {
    pub fn render(&self) -> String {
        format!("{} {}", self.level.icon(), self.message)
    }
}

/// Log lines and screenshots gathered over one run.
pub struct RunReport {
    lines: Vec<LogLine>,
    screenshots: Vec<PathBuf>,
    final_screenshot: Option<PathBuf>,
    screenshot_dir: PathBuf,
    seq: u32,
}

impl RunReport {
    pub fn new(screenshot_dir: PathBuf) -> Self {
        Self {
            lines: Vec::new(),
            screenshots: Vec::new(),
            final_screenshot: None,
            screenshot_dir,
            seq: 0,
        }
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => info!("{}", message),
            LogLevel::Success => info!(outcome = "success", "{}", message),
            LogLevel::Step => info!(step = true, "{}", message),
            LogLevel::Warn => warn!("{}", message),
            LogLevel::Error => error!("{}", message),
        }
        self.lines.push(LogLine {
            level,
            at: Local::now(),
            message,
        });
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn success(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Success, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn step(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Step, message);
    }

    pub fn tail(&self, n: usize) -> Vec<String> {
        let start = self.lines.len().saturating_sub(n);
        self.lines[start..].iter().map(LogLine::render).collect()
    }

    /// Reserve the next numbered file name, e.g. `03_github_login.png`.
    pub fn next_screenshot_path(&mut self, name: &str) -> PathBuf {
        self.seq += 1;
        if let Err(e) = std::fs::create_dir_all(&self.screenshot_dir) {
            debug!(dir = %self.screenshot_dir.display(), "Cannot create screenshot dir: {}", e);
        }
        let safe: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.screenshot_dir.join(format!("{:02}_{}.png", self.seq, safe))
    }

    pub fn record_screenshot(&mut self, path: PathBuf) {
        self.screenshots.push(path);
    }

    pub fn set_final_screenshot(&mut self, path: PathBuf) {
        self.final_screenshot = Some(path);
    }

    pub fn final_screenshot(&self) -> Option<&Path> {
        self.final_screenshot.as_deref()
    }

    /// Final screenshot if keepalive took one, else whatever was captured last.
    pub fn closing_screenshot(&self) -> Option<&Path> {
        self.final_screenshot().or_else(|| self.screenshots.last().map(PathBuf::as_path))
    }

    pub fn summary(&self, success: bool, user: &str, region: &str, error: Option<&str>) -> String {
        let status = if success { "✅ Success" } else { "❌ Failed" };
        let mut msg = format!(
            "<b>🤖 ClawCloud auto-login</b>\n\n\
             <b>Status:</b> {}\n\
             <b>User:</b> {}\n\
             <b>Region:</b> {}\n\
             <b>Time:</b> {}",
            status,
            escape_html(user),
            escape_html(region),
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        if let Some(err) = error {
            msg.push_str(&format!("\n<b>Error:</b> {}", escape_html(err)));
        }
        msg.push_str("\n\n<b>Log:</b>\n");
        let tail: Vec<String> = self.tail(SUMMARY_TAIL).iter().map(|l| escape_html(l)).collect();
        msg.push_str(&tail.join("\n"));
        msg
    }

    /// Send the end-of-run summary and the closing screenshot.
    pub async fn deliver(
        &self,
        relay: &dyn VerificationRelay,
        success: bool,
        user: &str,
        region: &str,
        error: Option<&str>,
    ) {
        if !relay.is_enabled() {
            return;
        }
        relay.notify(&self.summary(success, user, region, error)).await;
        if let Some(shot) = self.closing_screenshot() {
            relay.notify_with_image(shot, "Final state").await;
        }
    }

    /// Remove every screenshot and the run directory. Errors are ignored.
    pub fn cleanup(&self) {
        for shot in &self.screenshots {
            let _ = std::fs::remove_file(shot);
        }
        if let Err(e) = std::fs::remove_dir_all(&self.screenshot_dir) {
            debug!(dir = %self.screenshot_dir.display(), "Screenshot dir cleanup skipped: {}", e);
        }
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_keeps_order() {
        let mut report = RunReport::new(PathBuf::from("/tmp/unused"));
        for i in 0..12 {
            report.info(format!("line {}", i));
        }
        let tail = report.tail(8);
        assert_eq!(tail.len(), 8);
        assert!(tail[0].ends_with("line 4"));
        assert!(tail[7].ends_with("line 11"));
        assert_eq!(report.tail(100).len(), 12);
    }

    #[test]
    fn test_screenshot_names_are_numbered() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = RunReport::new(dir.path().join("run"));
        let first = report.next_screenshot_path("landing");
        let second = report.next_screenshot_path("two factor/code");
        assert!(first.ends_with("01_landing.png"));
        assert!(second.ends_with("02_two_factor_code.png"));
        assert!(dir.path().join("run").is_dir());
    }

    #[test]
    fn test_closing_screenshot_prefers_final() {
        let mut report = RunReport::new(PathBuf::from("/tmp/unused"));
        assert!(report.closing_screenshot().is_none());
        report.record_screenshot(PathBuf::from("/tmp/a.png"));
        report.record_screenshot(PathBuf::from("/tmp/b.png"));
        assert_eq!(report.closing_screenshot(), Some(Path::new("/tmp/b.png")));
        report.set_final_screenshot(PathBuf::from("/tmp/a.png"));
        assert_eq!(report.closing_screenshot(), Some(Path::new("/tmp/a.png")));
    }

    #[test]
    fn test_summary_contents() {
        let mut report = RunReport::new(PathBuf::from("/tmp/unused"));
        report.error("Callback bounced <signin>");
        let msg = report.summary(false, "octocat", "https://eu.run.claw.cloud", Some("callback bounced"));
        assert!(msg.contains("❌ Failed"));
        assert!(msg.contains("<b>User:</b> octocat"));
        assert!(msg.contains("<b>Region:</b> https://eu.run.claw.cloud"));
        assert!(msg.contains("<b>Error:</b> callback bounced"));
        assert!(msg.contains("&lt;signin&gt;"));
    }

    #[test]
    fn test_cleanup_removes_run_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = RunReport::new(dir.path().join("run"));
        let shot = report.next_screenshot_path("console");
        std::fs::write(&shot, b"png").unwrap();
        report.record_screenshot(shot.clone());

        report.cleanup();
        assert!(!shot.exists());
        assert!(!dir.path().join("run").exists());
        // second cleanup is harmless
        report.cleanup();
    }
}
