//! Configuration loading and management
//!
//! Configuration is loaded once at startup from `~/.config/codex-title/config.toml`,
//! overlaid with `CODEX_TITLE_*` environment variables, and then handed to every
//! component by reference. Nothing reads the environment after that point.
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/codex-title/` (~/.config/codex-title/)
//! - State/Logs: `$XDG_STATE_HOME/codex-title/` (~/.local/state/codex-title/)

use crate::error::{Error, Result};
use crate::timestamp::TimestampOracle;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that points at an alternate config file.
pub const CONFIG_ENV: &str = "CODEX_TITLE_CONFIG";

/// Returns a best-effort home directory path.
pub(crate) fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Titles painted for each session state
    #[serde(default)]
    pub titles: TitleConfig,

    /// Log discovery and turn inference tunables
    #[serde(default)]
    pub watch: WatchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Titles for each state.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TitleConfig {
    #[serde(default = "default_new_title")]
    pub new: String,
    #[serde(default = "default_running_title")]
    pub running: String,
    #[serde(default = "default_done_title")]
    pub done: String,
    /// Shown instead of `done` when a turn finished without a commit.
    /// An empty string disables commit correlation entirely.
    #[serde(default = "default_no_commit_title")]
    pub no_commit: String,
}

impl Default for TitleConfig {
    fn default() -> Self {
        Self {
            new: default_new_title(),
            running: default_running_title(),
            done: default_done_title(),
            no_commit: default_no_commit_title(),
        }
    }
}

impl TitleConfig {
    /// Whether the no-commit title is configured.
    pub fn signals_no_commit(&self) -> bool {
        !self.no_commit.is_empty()
    }

    /// Title painted when the session ends without ever reaching a done state.
    pub fn shutdown_title(&self) -> &str {
        if self.signals_no_commit() {
            &self.no_commit
        } else {
            &self.done
        }
    }
}

fn default_new_title() -> String {
    "codex:new".to_string()
}

fn default_running_title() -> String {
    "codex:running...".to_string()
}

fn default_done_title() -> String {
    "codex:✅".to_string()
}

fn default_no_commit_title() -> String {
    "codex:🚧".to_string()
}

/// Log discovery and turn inference tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Follow resume signals written by other Codex sessions
    #[serde(default)]
    pub follow_global_resume: bool,

    /// Seconds without activity before a tool-only turn counts as done (0 disables)
    #[serde(default = "default_idle_done_secs")]
    pub idle_done_secs: f64,

    /// Tolerated clock skew between log timestamps and the local clock (0 trusts everything)
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: f64,

    /// How long process inspection is the preferred way to find the log
    #[serde(default = "default_pid_log_timeout_secs")]
    pub pid_log_timeout_secs: f64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            follow_global_resume: false,
            idle_done_secs: default_idle_done_secs(),
            clock_skew_secs: default_clock_skew_secs(),
            pid_log_timeout_secs: default_pid_log_timeout_secs(),
        }
    }
}

fn default_idle_done_secs() -> f64 {
    3.0
}

fn default_clock_skew_secs() -> f64 {
    300.0
}

fn default_pid_log_timeout_secs() -> f64 {
    8.0
}

impl WatchConfig {
    /// Idle-to-done timeout, `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        positive_duration(self.idle_done_secs)
    }

    /// Process-inspection window. Zero disables pid lookups.
    pub fn pid_log_timeout(&self) -> Duration {
        positive_duration(self.pid_log_timeout_secs).unwrap_or(Duration::ZERO)
    }

    /// Timestamp oracle built from the configured skew tolerance.
    pub fn oracle(&self) -> TimestampOracle {
        TimestampOracle::new(positive_duration(self.clock_skew_secs))
    }

    /// Interval between synthetic idle heartbeats while tailing.
    pub fn idle_interval(&self) -> Option<Duration> {
        self.idle_timeout()
            .map(|timeout| (timeout / 2).clamp(Duration::from_millis(100), Duration::from_millis(500)))
    }
}

fn positive_duration(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs > 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file override
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Set to false to skip installing a subscriber at all
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            path: None,
            enabled: default_logging_enabled(),
        }
    }
}

impl LoggingConfig {
    /// Resolved log file, or `None` when logging is disabled.
    pub fn log_file(&self) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }
        Some(self.path.clone().unwrap_or_else(Config::log_path))
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_logging_enabled() -> bool {
    true
}

impl Config {
    /// Load configuration from the default path, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::resolve_path(None, |key| std::env::var(key).ok());
        let mut config = Self::load_from_if_exists(&path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from `path` when it exists, otherwise defaults.
    pub fn load_from_if_exists(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config file found at {:?}, using defaults", path);
            return Ok(Config::default());
        }
        Self::load_from(path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Pick the config file: explicit path, then `CODEX_TITLE_CONFIG`, then the XDG default.
    pub fn resolve_path<F>(explicit: Option<&Path>, lookup: F) -> PathBuf
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = explicit {
            return expand_home(path);
        }
        match lookup(CONFIG_ENV) {
            Some(value) if !value.trim().is_empty() => expand_home(Path::new(value.trim())),
            _ => Self::config_path(),
        }
    }

    /// Overlay `CODEX_TITLE_*` variables. `lookup` is `std::env::var` in production.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let titles = [
            ("CODEX_TITLE_NEW_TITLE", &mut self.titles.new),
            ("CODEX_TITLE_RUNNING_TITLE", &mut self.titles.running),
            ("CODEX_TITLE_DONE_TITLE", &mut self.titles.done),
            ("CODEX_TITLE_NO_COMMIT_TITLE", &mut self.titles.no_commit),
        ];
        for (key, slot) in titles {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *slot = value;
            }
        }

        if let Some(raw) = lookup("CODEX_TITLE_LOG_PATH") {
            if raw.trim().is_empty() {
                self.logging.enabled = false;
            } else {
                self.logging.enabled = true;
                self.logging.path = Some(expand_home(Path::new(raw.trim())));
            }
        }

        if let Some(raw) = lookup("CODEX_TITLE_FOLLOW_GLOBAL_RESUME") {
            self.watch.follow_global_resume = parse_flag(&raw);
        }

        let tunables = [
            ("CODEX_TITLE_IDLE_DONE_SECS", &mut self.watch.idle_done_secs),
            ("CODEX_TITLE_CLOCK_SKEW_SECS", &mut self.watch.clock_skew_secs),
            (
                "CODEX_TITLE_PID_LOG_TIMEOUT_SECS",
                &mut self.watch.pid_log_timeout_secs,
            ),
        ];
        for (key, slot) in tunables {
            if let Some(secs) = lookup(key).and_then(|raw| raw.trim().parse::<f64>().ok()) {
                if secs.is_finite() {
                    *slot = secs.max(0.0);
                }
            }
        }
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/codex-title/config.toml` (~/.config/codex-title/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("codex-title").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/codex-title/` (~/.local/state/codex-title/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("codex-title")
    }

    /// Returns the default log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("codex-title.log")
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home_dir().join(rest),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.titles.new, "codex:new");
        assert_eq!(config.titles.running, "codex:running...");
        assert!(config.titles.signals_no_commit());
        assert!(!config.watch.follow_global_resume);
        assert_eq!(config.watch.idle_timeout(), Some(Duration::from_secs(3)));
        assert_eq!(config.watch.pid_log_timeout(), Duration::from_secs(8));
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[titles]
done = "finished"
no_commit = ""

[watch]
idle_done_secs = 0
clock_skew_secs = 60

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.titles.done, "finished");
        assert_eq!(config.titles.running, "codex:running...");
        assert!(!config.titles.signals_no_commit());
        assert_eq!(config.titles.shutdown_title(), "finished");
        assert_eq!(config.watch.idle_timeout(), None);
        assert_eq!(config.watch.idle_interval(), None);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(lookup(&[
            ("CODEX_TITLE_DONE_TITLE", "ok"),
            ("CODEX_TITLE_FOLLOW_GLOBAL_RESUME", "Yes"),
            ("CODEX_TITLE_IDLE_DONE_SECS", "-4"),
            ("CODEX_TITLE_CLOCK_SKEW_SECS", "not-a-number"),
            ("CODEX_TITLE_PID_LOG_TIMEOUT_SECS", "2.5"),
        ]));
        assert_eq!(config.titles.done, "ok");
        assert!(config.watch.follow_global_resume);
        assert_eq!(config.watch.idle_done_secs, 0.0);
        assert_eq!(config.watch.clock_skew_secs, 300.0);
        assert_eq!(config.watch.pid_log_timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_empty_log_path_disables_logging() {
        let mut config = Config::default();
        assert!(config.logging.log_file().is_some());
        config.apply_env(lookup(&[("CODEX_TITLE_LOG_PATH", "  ")]));
        assert_eq!(config.logging.log_file(), None);

        config.apply_env(lookup(&[("CODEX_TITLE_LOG_PATH", "/tmp/ct.log")]));
        assert_eq!(config.logging.log_file(), Some(PathBuf::from("/tmp/ct.log")));
    }

    #[test]
    fn test_idle_interval_is_clamped() {
        let watch = WatchConfig {
            idle_done_secs: 10.0,
            ..WatchConfig::default()
        };
        assert_eq!(watch.idle_interval(), Some(Duration::from_millis(500)));

        let watch = WatchConfig {
            idle_done_secs: 0.1,
            ..WatchConfig::default()
        };
        assert_eq!(watch.idle_interval(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_resolve_path_prefers_explicit_then_env() {
        let explicit = Config::resolve_path(Some(Path::new("/etc/ct.toml")), lookup(&[]));
        assert_eq!(explicit, PathBuf::from("/etc/ct.toml"));

        let from_env = Config::resolve_path(None, lookup(&[(CONFIG_ENV, "/opt/ct.toml")]));
        assert_eq!(from_env, PathBuf::from("/opt/ct.toml"));

        let default = Config::resolve_path(None, lookup(&[]));
        assert!(default.ends_with("codex-title/config.toml"));
    }
}
