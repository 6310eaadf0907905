//! # codex-title-core
//!
//! Core library for codex-title - terminal tab titles that follow a Codex session.
//!
//! This library provides:
//! - Discovery of the session log belonging to this terminal, including
//!   handovers when the session resumes into another log
//! - A tail-following reader and the turn state machine fed by it
//! - Commit correlation for the "done without a commit" title
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three stages:
//! - **Locate:** pick a log from process file handles, resume notices, the
//!   prompt history index or the session directory ([`locator`], [`switch`])
//! - **Interpret:** decode lines into [`RolloutEvent`]s and fold them into
//!   turn transitions ([`reader`], [`turn`], [`vcs`])
//! - **Project:** paint the resulting [`Status`] through a [`TitleSink`] ([`watcher`])
//!
//! ## Example
//!
//! ```rust,no_run
//! use codex_title_core::{CodexHome, Config, Flag, Locator, TerminalTitle, WatchOptions, Watcher};
//! use std::sync::Arc;
//!
//! let config = Config::load().expect("failed to load config");
//! let home = CodexHome::discover();
//! let cwd = std::env::current_dir().expect("no cwd");
//! let start_time = chrono::Utc::now();
//!
//! let locator = Locator::new(home.clone(), cwd, &config.watch);
//! let watcher = Watcher::new(&config, locator, Arc::new(TerminalTitle::open()), Flag::new(), Flag::new());
//! watcher.run(&WatchOptions {
//!     log: None,
//!     session_dir: home.session_dir_for(start_time),
//!     start_time,
//!     pid: None,
//!     resume_hint: false,
//! });
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use event::{EventKind, RolloutEvent};
pub use locator::{LocateRequest, Located, Locator, Provenance};
pub use paths::CodexHome;
pub use status::StatusReport;
pub use title::{Status, TerminalTitle, TitleSink};
pub use watcher::{Flag, WatchOptions, Watcher};

// Public modules
pub mod clock;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod history;
pub mod locator;
pub mod logging;
pub mod paths;
pub mod pid;
pub mod reader;
pub mod resume_log;
pub mod rollout;
pub mod status;
pub mod switch;
pub mod timestamp;
pub mod title;
pub mod turn;
pub mod vcs;
pub mod watcher;
