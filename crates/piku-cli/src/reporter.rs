//! The terminal-facing [`Reporter`](piku::Reporter): green/yellow/red
//! lines on stdout (errors on stderr), with color suppressed
//! automatically when stdout isn't a terminal (e.g. piped into a log
//! file or CI).

use std::io::IsTerminal;

use piku::Reporter;

pub struct CliReporter {
    color: bool,
}

impl CliReporter {
    pub fn new() -> Self {
        Self { color: std::io::stdout().is_terminal() }
    }

    fn paint(&self, code: &str, msg: &str) -> String {
        if self.color {
            format!("\x1b[{code}m{msg}\x1b[0m")
        } else {
            msg.to_string()
        }
    }
}

impl Default for CliReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        println!("{}", self.paint("32", msg));
    }

    fn warn(&mut self, msg: &str) {
        println!("{}", self.paint("33", msg));
    }

    fn error(&mut self, msg: &str) {
        eprintln!("{}", self.paint("31", msg));
    }
}
