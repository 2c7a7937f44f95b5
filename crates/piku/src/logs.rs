//! `logs [proc]`: replay the
//! last lines of an app's log files, then follow them until every
//! tracked file has been rotated away or removed.
//!
//! The replay/follow split keeps the blocking poll loop out of the part
//! that is easy to unit test: callers that just want the backlog use
//! [`replay`]; `piku logs` itself drives [`follow`] with a callback that
//! prints each line as it arrives.

use std::time::Duration;

use anyhow::{Result, bail};
use piku_log::{LogLine, Tailer};
use piku_types::Config;

/// Collect the last `N` lines (per [`piku_log::DEFAULT_REPLAY_LINES`])
/// of every log file for `app`, optionally restricted to one Procfile
/// `kind`.
pub fn replay(config: &Config, app: &str, kind: Option<&str>) -> Result<Vec<LogLine>> {
    let tailer = open(config, app, kind)?;
    Ok(tailer.replay(piku_log::DEFAULT_REPLAY_LINES))
}

/// Replay the backlog through `on_line`, then poll forever (1 s between
/// empty passes) until every tracked file has disappeared, at which
/// point there is nothing left to follow and the call returns.
pub fn follow(config: &Config, app: &str, kind: Option<&str>, mut on_line: impl FnMut(&LogLine)) -> Result<()> {
    let mut tailer = open(config, app, kind)?;
    for line in tailer.replay(piku_log::DEFAULT_REPLAY_LINES) {
        on_line(&line);
    }

    loop {
        if tailer.is_empty() {
            return Ok(());
        }
        let lines = tailer.poll()?;
        if lines.is_empty() {
            std::thread::sleep(Duration::from_secs(1));
        } else {
            for line in &lines {
                on_line(line);
            }
        }
    }
}

fn open(config: &Config, app: &str, kind: Option<&str>) -> Result<Tailer> {
    let files = piku_log::discover_log_files(&config.paths, app, kind)?;
    if files.is_empty() {
        bail!(
            "{app}: no log files found{}",
            kind.map(|k| format!(" for {k}")).unwrap_or_default()
        );
    }
    Tailer::new(&files)
}
