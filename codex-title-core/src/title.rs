//! Session status and the terminal title it is painted as.

use crate::config::TitleConfig;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

/// What the tab title says about the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// No turn has started yet.
    New,
    /// A turn is open.
    Running,
    /// The last turn finished and left a commit (or commit tracking is off).
    Done,
    /// The last turn finished without a commit.
    DoneNoCommit,
}

impl Status {
    pub fn is_done(self) -> bool {
        matches!(self, Status::Done | Status::DoneNoCommit)
    }

    /// Title for this status. Without a no-commit title, `DoneNoCommit` reads as done.
    pub fn title(self, titles: &TitleConfig) -> &str {
        match self {
            Status::New => &titles.new,
            Status::Running => &titles.running,
            Status::Done => &titles.done,
            Status::DoneNoCommit if titles.signals_no_commit() => &titles.no_commit,
            Status::DoneNoCommit => &titles.done,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::New => "new",
            Status::Running => "running",
            Status::Done => "done",
            Status::DoneNoCommit => "done-no-commit",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Somewhere a title can be shown. Writes are last-write-wins and never fail.
pub trait TitleSink: Send + Sync {
    fn set(&self, title: &str);
}

/// OSC 0 sequence setting both the icon name and the window title.
pub fn escape_sequence(title: &str) -> String {
    let clean: String = title.chars().filter(|c| !c.is_control()).collect();
    format!("\x1b]0;{clean}\x07")
}

/// Writes title escape sequences to the controlling terminal.
///
/// Uses `/dev/tty` when it can be opened so titles still reach the terminal
/// while stdout is redirected, and stdout otherwise.
pub struct TerminalTitle {
    out: Mutex<Box<dyn Write + Send>>,
}

impl TerminalTitle {
    pub fn open() -> Self {
        let out: Box<dyn Write + Send> = match OpenOptions::new().write(true).open("/dev/tty") {
            Ok(tty) => Box::new(tty),
            Err(e) => {
                tracing::debug!(error = %e, "no controlling terminal, writing titles to stdout");
                Box::new(std::io::stdout())
            }
        };
        Self::with_writer(out)
    }

    /// Write to an arbitrary stream.
    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl TitleSink for TerminalTitle {
    fn set(&self, title: &str) {
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        let seq = escape_sequence(title);
        if let Err(e) = out.write_all(seq.as_bytes()).and_then(|_| out.flush()) {
            tracing::debug!(error = %e, "title write failed");
        }
    }
}
