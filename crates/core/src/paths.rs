use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".clawkeeper"))
            .unwrap_or_else(|| PathBuf::from(".clawkeeper"));
        Self::with_base(base)
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    /// Per-run screenshot directories live under here and are removed when
    /// the run finishes.
    pub fn screenshots_dir(&self) -> PathBuf {
        self.base.join("screenshots")
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        let safe_id = run_id.replace([':', '/', '\\', ' '], "_");
        self.screenshots_dir().join(safe_id)
    }

    /// Chrome user-data directories for launched sessions.
    pub fn profiles_dir(&self) -> PathBuf {
        self.base.join("profiles")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(self.screenshots_dir())?;
        std::fs::create_dir_all(self.profiles_dir())?;
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
