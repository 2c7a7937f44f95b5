//! Orchestration core for piku: turns a `git push` or operator command
//! into the sequence of filesystem effects described in the data model
//! (vassal files, nginx confs, `LIVE_ENV`/`SCALING`) and nothing more —
//! the actual process supervision is the external uWSGI Emperor's job.
//!
//! Every public entry point takes a [`Config`](piku_types::Config) built
//! once by the caller (typically `main`) and a `&mut dyn Reporter` for
//! user-facing progress; nothing here reads `std::env` directly.

pub mod deploy;
pub mod destroy;
pub mod envcfg;
pub mod fleet;
pub mod git_hook;
pub mod logs;
pub mod runctl;
pub mod setup;
pub mod ssh_setup;
pub mod update;

/// Sink for user-facing progress during an operation. Mirrors the shape
/// the CLI layer renders in color (info green, warn yellow, error red);
/// this crate stays agnostic to how messages are displayed.
pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// A `Reporter` that discards everything, for call sites (and most
/// tests) that don't care about progress text.
#[derive(Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn info(&mut self, _msg: &str) {}
    fn warn(&mut self, _msg: &str) {}
    fn error(&mut self, _msg: &str) {}
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Reporter;

    #[derive(Default)]
    pub struct CollectingReporter {
        pub infos: Vec<String>,
        pub warns: Vec<String>,
        pub errors: Vec<String>,
    }

    impl Reporter for CollectingReporter {
        fn info(&mut self, msg: &str) {
            self.infos.push(msg.to_string());
        }
        fn warn(&mut self, msg: &str) {
            self.warns.push(msg.to_string());
        }
        fn error(&mut self, msg: &str) {
            self.errors.push(msg.to_string());
        }
    }
}
