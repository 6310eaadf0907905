//! codex-title - Codex with a tab title that follows the session
//!
//! Spawns `codex` with the given arguments and keeps the terminal title in
//! sync with the session state in a background thread. The exit code is the
//! agent's own.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Logs: $XDG_STATE_HOME/codex-title/codex-title.log (~/.local/state/codex-title/codex-title.log)
//! - Config: $XDG_CONFIG_HOME/codex-title/config.toml (~/.config/codex-title/config.toml)

use anyhow::{Context, Result};
use clap::Parser;
use codex_title_core::{
    CodexHome, Config, Flag, Locator, StatusReport, TerminalTitle, TitleSink, WatchOptions,
    Watcher,
};
use std::path::PathBuf;
use std::process::{Command, ExitCode, ExitStatus};
use std::sync::Arc;
use std::time::Duration;

const YOLO_FLAG: &str = "--dangerously-bypass-approvals-and-sandbox";
const AGENT_BINARY: &str = "codex";

#[derive(Parser)]
#[command(name = "codex-title")]
#[command(about = "Run Codex with terminal tab title updates based on session logs")]
#[command(version)]
struct Args {
    /// Config file path (default: ~/.config/codex-title/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the resolved title and log path without updating the terminal title
    #[arg(long)]
    status: bool,

    /// Only watch logs; do not start Codex
    #[arg(long)]
    watch_only: bool,

    #[arg(long, hide = true)]
    log: Option<PathBuf>,

    /// Follow Codex resume signals across sessions (may sync titles across tabs)
    #[arg(long)]
    follow_global_resume: bool,

    #[arg(long, hide = true)]
    session_dir: Option<PathBuf>,

    /// Title to set on session start before any prompts
    #[arg(long)]
    new_title: Option<String>,

    /// Title to set while Codex is running
    #[arg(long)]
    running_title: Option<String>,

    /// Title to set when Codex finishes a response
    #[arg(long)]
    done_title: Option<String>,

    /// Title to set when no git commit was made during the last turn (empty disables)
    #[arg(long)]
    no_commit_title: Option<String>,

    /// Run Codex with --dangerously-bypass-approvals-and-sandbox
    #[arg(long)]
    yolo: bool,

    /// Arguments to pass to codex (after --)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    codex_args: Vec<String>,
}

impl Args {
    fn apply_to(&self, config: &mut Config) {
        let titles = [
            (&self.new_title, &mut config.titles.new),
            (&self.running_title, &mut config.titles.running),
            (&self.done_title, &mut config.titles.done),
            (&self.no_commit_title, &mut config.titles.no_commit),
        ];
        for (flag, slot) in titles {
            if let Some(value) = flag {
                *slot = value.clone();
            }
        }
        if self.follow_global_resume {
            config.watch.follow_global_resume = true;
        }
    }

    fn resume_hint(&self) -> bool {
        self.codex_args.iter().any(|a| a == "--resume" || a == "--last")
    }

    fn agent_args(&self) -> Vec<String> {
        let mut args = self.codex_args.clone();
        if self.yolo && !args.iter().any(|a| a == YOLO_FLAG) {
            args.insert(0, YOLO_FLAG.to_string());
        }
        args
    }
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Load configuration
    let env = |key: &str| std::env::var(key).ok();
    let config_path = Config::resolve_path(args.config.as_deref(), env);
    let mut config = Config::load_from_if_exists(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path.display()))?;
    config.apply_env(env);
    args.apply_to(&mut config);

    // Logging must never keep the agent from starting
    let _log_guard = match codex_title_core::logging::init(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("codex-title: logging disabled: {e}");
            None
        }
    };

    let home = CodexHome::discover();
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let start_time = chrono::Utc::now();
    let session_dir = args
        .session_dir
        .clone()
        .unwrap_or_else(|| home.session_dir_for(start_time));
    let locator = Locator::new(home, cwd, &config.watch);

    tracing::info!(
        status = args.status,
        watch_only = args.watch_only,
        session_dir = %session_dir.display(),
        "codex-title starting"
    );

    if args.status {
        let report = StatusReport::for_cwd(&config, &locator, &session_dir, args.log.as_deref());
        print!("{report}");
        return Ok(ExitCode::SUCCESS);
    }

    let sink: Arc<dyn TitleSink> = Arc::new(TerminalTitle::open());
    sink.set(&config.titles.new);

    let stop = Flag::new();
    let done = Flag::new();
    let shutdown_title = config.titles.shutdown_title().to_string();
    {
        let (stop, done, sink, title) = (stop.clone(), done.clone(), sink.clone(), shutdown_title.clone());
        ctrlc::set_handler(move || {
            stop.set();
            sink.set(&title);
            done.set();
        })
        .context("failed to set signal handler")?;
    }

    let watcher = Watcher::new(&config, locator, sink.clone(), stop.clone(), done.clone());
    let mut options = WatchOptions {
        log: args.log.clone(),
        session_dir,
        start_time,
        pid: None,
        resume_hint: args.resume_hint(),
    };

    let code = if args.watch_only {
        let handle = watcher.spawn(options).context("failed to start watcher")?;
        while !handle.is_finished() && !stop.is_set() {
            std::thread::sleep(Duration::from_millis(200));
        }
        ExitCode::SUCCESS
    } else {
        let mut child = Command::new(AGENT_BINARY)
            .args(args.agent_args())
            .spawn()
            .with_context(|| format!("failed to start {AGENT_BINARY}"))?;
        options.pid = Some(child.id());
        tracing::info!(pid = child.id(), "agent started");

        watcher.spawn(options).context("failed to start watcher")?;
        let status = child.wait().with_context(|| format!("failed to wait for {AGENT_BINARY}"))?;
        tracing::info!(status = %status, "agent exited");
        exit_code(status)
    };

    stop.set();
    if !done.is_set() {
        sink.set(&shutdown_title);
    }
    Ok(code)
}

/// Mirror the agent's exit status; death by signal maps to 128 + signal.
fn exit_code(status: ExitStatus) -> ExitCode {
    if let Some(code) = status.code() {
        return ExitCode::from((code & 0xff) as u8);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitCode::from((128 + signal).clamp(0, 255) as u8);
        }
    }
    ExitCode::FAILURE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_args_pass_through() {
        let args = Args::try_parse_from(["codex-title", "--yolo", "--", "resume", "--last"]).unwrap();
        assert!(args.yolo);
        assert_eq!(args.codex_args, vec!["resume", "--last"]);
        assert!(args.resume_hint());
        assert_eq!(args.agent_args(), vec![YOLO_FLAG, "resume", "--last"]);
    }

    #[test]
    fn test_yolo_flag_not_duplicated() {
        let args = Args::try_parse_from(["codex-title", "--yolo", "--", YOLO_FLAG]).unwrap();
        assert_eq!(args.agent_args(), vec![YOLO_FLAG]);
        assert!(!args.resume_hint());
    }

    #[test]
    fn test_title_flags_override_config() {
        let args = Args::try_parse_from([
            "codex-title",
            "--done-title",
            "finished",
            "--no-commit-title",
            "",
            "--follow-global-resume",
        ])
        .unwrap();
        let mut config = Config::default();
        args.apply_to(&mut config);
        assert_eq!(config.titles.done, "finished");
        assert!(!config.titles.signals_no_commit());
        assert!(config.watch.follow_global_resume);
        assert_eq!(config.titles.shutdown_title(), "finished");
    }
}
