//! Command-line interface and configuration loading.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use sy_domain::config::{Config, ConfigSeverity};

#[derive(Parser)]
#[command(name = "synergize", version, about = "Turn-based collaboration between two local LLMs")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the gateway server (default).
    Serve,
    /// Configuration inspection.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Validate the config file and report issues.
    Validate,
    /// Print the effective configuration.
    Show,
}

/// Load `synergize.toml` (or `$SYNERGIZE_CONFIG`) and apply environment
/// overrides. A missing file yields defaults.
pub fn load_config() -> anyhow::Result<(Config, PathBuf)> {
    let path = std::env::var("SYNERGIZE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("synergize.toml"));

    let mut config: Config = if path.exists() {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
    } else {
        Config::default()
    };

    config.apply_env_overrides(std::env::vars());
    Ok((config, path))
}

/// Print validation issues; returns false when any is an error.
pub fn validate(config: &Config, path: &PathBuf) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{}: configuration is valid", path.display());
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    !issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error)
}

pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}
