//! Configuration management for breakwatch
//!
//! This module provides the break schedule configuration, its defaults and
//! validation, and loading from the config directory. It also provides change
//! detection and a file watcher so a running host can reload the schedule.

use crate::session::BreakKind;
use anyhow::{anyhow, bail, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

/// File stem looked up in the config directory (`breaks.yml`, `breaks.json`, ...)
pub const CONFIG_FILE_STEM: &str = "breaks";

/// Extensions tried in order when looking for the config file
const CONFIG_EXTENSIONS: [&str; 4] = ["yml", "yaml", "json", "toml"];

/// Longest accepted break interval (one week, in minutes)
pub const MAX_BREAK_INTERVAL: u64 = 7 * 24 * 60;

/// Longest accepted warning or break duration (one day, in seconds)
pub const MAX_DURATION_SECS: u64 = 24 * 60 * 60;

/// Break schedule configuration
///
/// Field names match the keys of the configuration file. Every key is
/// required; a file with missing keys is rejected when it is parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakConfig {
    /// Messages rotated through on short breaks
    pub short_break_messages: Vec<String>,
    /// Messages rotated through on long breaks
    pub long_break_messages: Vec<String>,
    /// Every Nth break is a long break
    pub no_of_short_breaks_per_long_break: u32,
    /// Delay between the notification and the break screen (seconds)
    pub pre_break_warning_time: u64,
    /// Long break duration (seconds)
    pub long_break_duration: u64,
    /// Short break duration (seconds)
    pub short_break_duration: u64,
    /// Time between break checks (minutes)
    pub break_interval: u64,
}

impl Default for BreakConfig {
    fn default() -> Self {
        Self {
            short_break_messages: vec![
                "Tightly close your eyes".to_string(),
                "Roll your eyes".to_string(),
                "Rotate your eyes".to_string(),
                "Blink your eyes".to_string(),
                "Have some water".to_string(),
            ],
            long_break_messages: vec![
                "Walk for a while".to_string(),
                "Lean back at your seat and relax".to_string(),
            ],
            no_of_short_breaks_per_long_break: 5,
            pre_break_warning_time: 10,
            long_break_duration: 60,
            short_break_duration: 15,
            break_interval: 15,
        }
    }
}

impl BreakConfig {
    /// Reject configurations the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.short_break_messages.is_empty() {
            bail!("short_break_messages must contain at least one message");
        }
        if self.long_break_messages.is_empty() {
            bail!("long_break_messages must contain at least one message");
        }
        if self.no_of_short_breaks_per_long_break == 0 {
            bail!("no_of_short_breaks_per_long_break must be greater than 0");
        }
        if self.break_interval == 0 {
            bail!("break_interval must be greater than 0");
        }
        if self.break_interval > MAX_BREAK_INTERVAL {
            bail!(
                "break_interval must be at most {} minutes, got {}",
                MAX_BREAK_INTERVAL,
                self.break_interval
            );
        }
        for (key, value) in [
            ("pre_break_warning_time", self.pre_break_warning_time),
            ("short_break_duration", self.short_break_duration),
            ("long_break_duration", self.long_break_duration),
        ] {
            if value > MAX_DURATION_SECS {
                bail!(
                    "{} must be at most {} seconds, got {}",
                    key,
                    MAX_DURATION_SECS,
                    value
                );
            }
        }
        Ok(())
    }

    /// Time between two break checks
    pub fn break_interval(&self) -> Duration {
        Duration::from_secs(self.break_interval.saturating_mul(60))
    }

    /// Delay between the notification and the break screen
    pub fn pre_break_warning(&self) -> Duration {
        Duration::from_secs(self.pre_break_warning_time)
    }

    /// Countdown length in seconds for the given kind of break
    pub fn duration_for(&self, kind: BreakKind) -> u64 {
        match kind {
            BreakKind::Short => self.short_break_duration,
            BreakKind::Long => self.long_break_duration,
        }
    }

    /// Message list rotated through for the given kind of break
    pub fn messages_for(&self, kind: BreakKind) -> &[String] {
        match kind {
            BreakKind::Short => &self.short_break_messages,
            BreakKind::Long => &self.long_break_messages,
        }
    }
}

/// Default configuration directory (`~/.config/breakwatch`)
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("breakwatch")
}

/// Find the break configuration file in the config directory, if any
pub fn find_config_file(config_dir: &Path) -> Option<PathBuf> {
    CONFIG_EXTENSIONS
        .iter()
        .map(|ext| config_dir.join(format!("{}.{}", CONFIG_FILE_STEM, ext)))
        .find(|path| path.exists())
}

/// Load and validate a configuration file, picking the parser by extension
pub fn load_config_file(path: &Path) -> Result<BreakConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;

    let config: BreakConfig = match path.extension().and_then(|s| s.to_str()) {
        Some("yml") | Some("yaml") => serde_yaml::from_str(&contents)?,
        Some("json") => serde_json::from_str(&contents)?,
        Some("toml") => toml::from_str(&contents)?,
        _ => bail!("Unsupported config file format: {}", path.display()),
    };

    config
        .validate()
        .map_err(|e| anyhow!("Invalid configuration in {}: {}", path.display(), e))?;
    Ok(config)
}

/// Load break configuration from the config directory
///
/// Returns the default configuration when no config file exists.
pub fn load_break_config(config_dir: &Path) -> Result<BreakConfig> {
    match find_config_file(config_dir) {
        Some(path) => load_config_file(&path),
        None => Ok(BreakConfig::default()),
    }
}

/// Calculate SHA256 hash of a configuration, used to ignore no-op reloads
pub fn config_hash(config: &BreakConfig) -> Result<String> {
    let json = serde_json::to_string(config)?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

fn is_config_path(path: &Path) -> bool {
    path.file_stem().and_then(|s| s.to_str()) == Some(CONFIG_FILE_STEM)
}

/// Watch the config directory for changes to the break configuration file
///
/// The returned watcher must be kept alive for as long as change
/// notifications are wanted. Bursts of file events are coalesced into a
/// single notification on the channel.
pub fn watch_config_dir(config_dir: &Path) -> Result<(RecommendedWatcher, mpsc::Receiver<()>)> {
    let (tx, rx) = mpsc::channel(1);

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let relevant = event.kind.is_modify()
                    || event.kind.is_create()
                    || event.kind.is_remove();
                if relevant && event.paths.iter().any(|p| is_config_path(p)) {
                    // Full channel means a reload is already pending
                    let _ = tx.try_send(());
                }
            }
        },
        notify::Config::default(),
    )?;

    watcher.watch(config_dir, RecursiveMode::NonRecursive)?;
    Ok((watcher, rx))
}
