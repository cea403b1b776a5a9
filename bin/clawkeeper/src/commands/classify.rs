use clawkeeper_agent::PageClassifier;
use clawkeeper_core::{Config, Paths};
use std::path::PathBuf;

pub fn run(config_path: Option<&PathBuf>, url: &str, content: Option<&PathBuf>) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::resolve(&paths, config_path)?;
    let body = match content {
        Some(path) => std::fs::read_to_string(path)?,
        None => String::new(),
    };

    let state = PageClassifier::new(&config.console.domain).classify(url, &body);
    println!("{}", state);
    Ok(())
}
