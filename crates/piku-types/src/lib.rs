//! Core domain types for piku.
//!
//! This crate defines the fundamental data structures shared across the
//! deployment pipeline: sanitized app names, the on-disk path layout rooted
//! at `PIKU_ROOT`, worker kinds recognized in a `Procfile`, and the runtime
//! options threaded through every operation.
//!
//! Nothing in this crate touches the process environment directly — a
//! [`Config`] is built once (typically in `main`) and passed down, per the
//! "no global mutable state" rule the rest of the pipeline follows.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

pub mod paths;
pub mod sanitize;
pub mod worker;

pub use paths::Paths;
pub use sanitize::{require_app, sanitize};
pub use worker::WorkerKind;

/// Default root directory name when `PIKU_ROOT` is not set (`$HOME/.piku`).
pub const DEFAULT_ROOT_DIRNAME: &str = ".piku";

/// Name of the shipped ENV file inside an app's working tree.
pub const SHIPPED_ENV_FILE: &str = "ENV";

/// Name of the override ENV file inside `envs/<app>`.
pub const OVERRIDE_ENV_FILE: &str = "ENV";

/// Name of the frozen environment snapshot written on every deploy.
pub const LIVE_ENV_FILE: &str = "LIVE_ENV";

/// Name of the scaling file inside `envs/<app>`.
pub const SCALING_FILE: &str = "SCALING";

/// Name of the Procfile inside an app's working tree.
pub const PROCFILE_NAME: &str = "Procfile";

/// Environment variables whose presence/value gate the auto-restart behavior.
pub const AUTO_RESTART_VAR: &str = "PIKU_AUTO_RESTART";

/// Root-level, environment-independent runtime configuration.
///
/// Constructed once (from process environment and CLI flags) and threaded
/// through every operation. Leaf functions never read `std::env` directly.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resolved path layout rooted at `PIKU_ROOT` (or `$HOME/.piku`).
    pub paths: Paths,
    /// Whether a deploy should prune and recreate every enabled vassal
    /// (`PIKU_AUTO_RESTART`, default true).
    pub auto_restart: bool,
    /// ACME client root (contains `acme.sh` when TLS auto-issuance is available).
    pub acme_root: PathBuf,
    /// ACME CA server URL passed to `acme.sh --server`.
    pub acme_ca: String,
    /// Unix user/group vassals run as. Rather than pull in a `nix`/`users`
    /// dependency to look up the invoking process's passwd entry, these
    /// default to `$USER` (or `piku`) and are otherwise operator-configurable.
    pub uid: String,
    pub gid: String,
}

impl Config {
    /// Build a config from an explicit root, with all other knobs defaulted.
    pub fn with_root(root: PathBuf) -> Self {
        let user = std::env::var("USER").unwrap_or_else(|_| "piku".to_string());
        Self {
            paths: Paths::new(root),
            auto_restart: true,
            acme_root: PathBuf::from("/etc/acme.sh"),
            uid: user.clone(),
            gid: user,
            acme_ca: "https://acme-v02.api.letsencrypt.org/directory".to_string(),
        }
    }
}

/// Parse a boolean-ish environment value the way ENV files do: `1`, `true`,
/// `yes`, `on` (case-insensitive) are truthy; everything else (including
/// absence) is falsy.
pub fn is_truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(str::trim).map(str::to_ascii_lowercase).as_deref(),
        Some("1") | Some("true") | Some("yes") | Some("on")
    )
}

/// Desired per-kind worker counts, as parsed from `envs/<app>/SCALING`.
///
/// Absent kinds default to `1` (see [`ScalingMap::get_or_default`]).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScalingMap(std::collections::BTreeMap<String, i64>);

impl ScalingMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_default(&self, kind: &str) -> i64 {
        *self.0.get(kind).unwrap_or(&1)
    }

    pub fn set(&mut self, kind: impl Into<String>, count: i64) {
        self.0.insert(kind.into(), count);
    }

    pub fn remove(&mut self, kind: &str) {
        self.0.remove(kind);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serialize as `kind:count` lines, sorted by kind for determinism.
    pub fn to_lines(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Parse `kind:count` lines; malformed lines are skipped with the line
    /// index recorded in the returned warnings.
    pub fn parse(content: &str) -> (Self, Vec<String>) {
        let mut map = std::collections::BTreeMap::new();
        let mut warnings = Vec::new();

        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once(':') {
                Some((k, v)) => match v.trim().parse::<i64>() {
                    Ok(n) => {
                        map.insert(k.trim().to_string(), n);
                    }
                    Err(_) => warnings.push(format!("SCALING line {}: invalid count: {line}", idx + 1)),
                },
                None => warnings.push(format!("SCALING line {}: missing ':': {line}", idx + 1)),
            }
        }

        (Self(map), warnings)
    }
}

/// Validate that scaling a kind is permitted: count must be non-negative and
/// the kind must be declared in the Procfile.
pub fn validate_scale_request(kind: &str, new_count: i64, procfile_kinds: &[String]) -> Result<()> {
    if new_count < 0 {
        bail!("cannot scale {kind} below zero (requested {new_count})");
    }
    if !procfile_kinds.iter().any(|k| k == kind) {
        bail!("cannot scale {kind}: not declared in Procfile");
    }
    Ok(())
}

/// Derive the app name from a bare repository path component the same way
/// the git-receive path does: sanitize, then require a non-empty result.
pub fn app_name_from_arg(arg: &str) -> Result<String> {
    let name = sanitize(arg);
    if name.is_empty() {
        bail!("empty or invalid app name: {arg:?}");
    }
    Ok(name)
}

/// Convenience check for an app directory's existence without requiring a
/// full [`Paths`] value.
pub fn app_exists(root: &Path, app: &str) -> bool {
    root.join("apps").join(app).is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaling_default_is_one() {
        let s = ScalingMap::new();
        assert_eq!(s.get_or_default("web"), 1);
    }

    #[test]
    fn scaling_roundtrip() {
        let mut s = ScalingMap::new();
        s.set("web", 3);
        s.set("wsgi", 1);
        let (parsed, warnings) = ScalingMap::parse(&s.to_lines());
        assert!(warnings.is_empty());
        assert_eq!(parsed.get_or_default("web"), 3);
        assert_eq!(parsed.get_or_default("wsgi"), 1);
    }

    #[test]
    fn scaling_parse_skips_malformed_lines() {
        let (parsed, warnings) = ScalingMap::parse("web:2\nbroken\nwsgi:notanumber\n");
        assert_eq!(parsed.get_or_default("web"), 2);
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn validate_scale_rejects_negative() {
        let kinds = vec!["web".to_string()];
        assert!(validate_scale_request("web", -1, &kinds).is_err());
    }

    #[test]
    fn validate_scale_rejects_unknown_kind() {
        let kinds = vec!["web".to_string()];
        assert!(validate_scale_request("worker", 2, &kinds).is_err());
    }

    #[test]
    fn validate_scale_accepts_zero() {
        let kinds = vec!["web".to_string()];
        assert!(validate_scale_request("web", 0, &kinds).is_ok());
    }

    #[test]
    fn is_truthy_accepts_common_spellings() {
        assert!(is_truthy(Some("1")));
        assert!(is_truthy(Some("true")));
        assert!(is_truthy(Some("Yes")));
        assert!(!is_truthy(Some("0")));
        assert!(!is_truthy(None));
    }

    #[test]
    fn app_name_from_arg_rejects_empty() {
        assert!(app_name_from_arg("///").is_err());
    }
}
