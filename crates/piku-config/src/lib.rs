//! `ENV`, `LIVE_ENV`, and `SCALING` file handling for piku.
//!
//! An app's environment is assembled from two text files: the shipped
//! `ENV` checked into the app's repository (defaults) and the override
//! `ENV` under `envs/<app>/` that `piku config:set` writes (operator
//! overrides). Deploy freezes the merged result into `LIVE_ENV`, which is
//! what every spawned worker actually sees — `ENV`/`LIVE_ENV` are never
//! mixed up by construction since they are distinct types here.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write as _;
use std::path::Path;

use anyhow::{Context, Result, bail};

pub use piku_types::ScalingMap;

/// A parsed `KEY=VALUE` environment file, in file order for stable output
/// but queryable by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    entries: Vec<(String, String)>,
}

impl EnvFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `KEY=VALUE` lines. Blank lines and `#`-prefixed comments are
    /// ignored. A malformed line (no `=`, or an empty key) aborts the
    /// parse: the error is reported and an *empty* map is returned,
    /// leaving whatever the caller already had on disk untouched — this
    /// file format has no partial-success mode.
    pub fn parse(content: &str) -> (Self, Vec<String>) {
        let mut entries = Vec::new();

        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) => {
                    let key = key.trim();
                    if key.is_empty() {
                        return (Self::new(), vec![format!("ENV line {}: empty key", idx + 1)]);
                    }
                    entries.push((key.to_string(), value.trim().to_string()));
                }
                None => return (Self::new(), vec![format!("ENV line {}: missing '=': {line}", idx + 1)]),
            }
        }

        (Self { entries }, Vec::new())
    }

    pub fn load(path: &Path) -> Result<(Self, Vec<String>)> {
        let content = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Ok(Self::parse(&content))
    }

    /// Load an ENV file, treating a missing file as empty (apps need not
    /// ship or override an ENV file).
    pub fn load_or_default(path: &Path) -> Result<(Self, Vec<String>)> {
        if !path.is_file() {
            return Ok((Self::new(), Vec::new()));
        }
        Self::load(path)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value.into();
        } else {
            self.entries.push((key, value.into()));
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| k != key);
        self.entries.len() != before
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge `other` on top of `self`: keys in `other` replace keys in
    /// `self`, new keys are appended. Used for `shipped ENV` + `override
    /// ENV` → effective environment.
    pub fn merged_with(&self, other: &EnvFile) -> EnvFile {
        let mut result = self.clone();
        for (k, v) in other.iter() {
            result.set(k, v);
        }
        result
    }

    /// Expand `$VAR`/`${VAR}` references against this file's own entries,
    /// falling back to the process environment, then to an empty string.
    /// Expansion is single-pass: a value may reference an earlier-defined
    /// key but not itself or a later one (matches shell `.env` sourcing
    /// order, not recursive macro expansion).
    pub fn expand(&self) -> EnvFile {
        let mut resolved: BTreeMap<String, String> = BTreeMap::new();
        let mut out = EnvFile::new();

        for (key, raw_value) in &self.entries {
            let expanded = expand_vars(raw_value, &resolved);
            resolved.insert(key.clone(), expanded.clone());
            out.set(key.clone(), expanded);
        }

        out
    }

    /// Serialize as `KEY=VALUE` lines in insertion order.
    pub fn to_lines(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Build the `(KEY, VALUE)` pairs a [`std::process::Command`] should be
    /// given for a spawned worker.
    pub fn as_pairs(&self) -> Vec<(String, String)> {
        self.entries.clone()
    }
}

/// Expand `$NAME` and `${NAME}` references in `value`, preferring
/// `already_resolved`, then the process environment.
fn expand_vars(value: &str, already_resolved: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(value.len());
    let chars: Vec<char> = value.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '$' && i + 1 < chars.len() {
            if chars[i + 1] == '{' {
                if let Some(end) = chars[i + 2..].iter().position(|&c| c == '}') {
                    let name: String = chars[i + 2..i + 2 + end].iter().collect();
                    out.push_str(&resolve_var(&name, already_resolved));
                    i += 2 + end + 1;
                    continue;
                }
            } else if chars[i + 1].is_ascii_alphabetic() || chars[i + 1] == '_' {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                out.push_str(&resolve_var(&name, already_resolved));
                i = end;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }

    out
}

fn resolve_var(name: &str, already_resolved: &BTreeMap<String, String>) -> String {
    already_resolved
        .get(name)
        .cloned()
        .or_else(|| std::env::var(name).ok())
        .unwrap_or_default()
}

/// Write `content` to `path` atomically: write a sibling temp file, fsync
/// it, rename over the destination, then fsync the parent directory so
/// the rename itself is durable. A crash mid-write never leaves a
/// truncated `LIVE_ENV`, `SCALING`, or vassal file behind.
pub fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let parent = path.parent().context("destination path has no parent directory")?;
    fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;

    let tmp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("piku-write")
    ));

    {
        let mut tmp_file =
            File::create(&tmp_path).with_context(|| format!("creating {}", tmp_path.display()))?;
        tmp_file
            .write_all(content.as_bytes())
            .with_context(|| format!("writing {}", tmp_path.display()))?;
        tmp_file.sync_all().with_context(|| format!("fsyncing {}", tmp_path.display()))?;
    }

    fs::rename(&tmp_path, path)
        .with_context(|| format!("renaming {} to {}", tmp_path.display(), path.display()))?;

    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }

    Ok(())
}

/// Load `envs/<app>/SCALING`, treating a missing file as empty (every
/// declared kind then defaults to a count of 1).
pub fn load_scaling(path: &Path) -> Result<(ScalingMap, Vec<String>)> {
    if !path.is_file() {
        return Ok((ScalingMap::new(), Vec::new()));
    }
    let content = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(ScalingMap::parse(&content))
}

pub fn write_scaling(path: &Path, scaling: &ScalingMap) -> Result<()> {
    atomic_write(path, &scaling.to_lines())
}

/// Validate a raw `KEY=VALUE` assignment from `piku config:set KEY=VALUE`:
/// the key must be non-empty and look like a shell identifier, since it
/// becomes both an ENV file key and an exported environment variable name.
pub fn validate_env_key(key: &str) -> Result<()> {
    if key.is_empty() {
        bail!("empty environment variable name");
    }
    let mut chars = key.chars();
    let first = chars.next().unwrap();
    if !(first.is_ascii_alphabetic() || first == '_') {
        bail!("invalid environment variable name: {key:?} (must start with a letter or underscore)");
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("invalid environment variable name: {key:?} (only letters, digits, and underscore allowed)");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_skips_comments_and_blank_lines() {
        let (env, warnings) = EnvFile::parse("# comment\n\nKEY=value\n");
        assert!(warnings.is_empty());
        assert_eq!(env.get("KEY"), Some("value"));
    }

    #[test]
    fn parse_aborts_to_empty_map_on_malformed_line() {
        let (env, warnings) = EnvFile::parse("KEY=value\nbroken-line\nOTHER=value\n");
        assert_eq!(warnings.len(), 1);
        assert!(env.is_empty());
    }

    #[test]
    fn parse_preserves_quote_characters_verbatim() {
        let (env, _) = EnvFile::parse("A=\"hello world\"\nB='single'\nC=a\"b\n");
        assert_eq!(env.get("A"), Some("\"hello world\""));
        assert_eq!(env.get("B"), Some("'single'"));
        assert_eq!(env.get("C"), Some("a\"b"));
    }

    #[test]
    fn set_overwrites_in_place_preserving_order() {
        let mut env = EnvFile::new();
        env.set("A", "1");
        env.set("B", "2");
        env.set("A", "3");
        assert_eq!(env.to_lines(), "A=3\nB=2");
    }

    #[test]
    fn merged_with_prefers_override_values() {
        let mut shipped = EnvFile::new();
        shipped.set("DEBUG", "0");
        shipped.set("PORT", "8000");

        let mut overrides = EnvFile::new();
        overrides.set("DEBUG", "1");

        let merged = shipped.merged_with(&overrides);
        assert_eq!(merged.get("DEBUG"), Some("1"));
        assert_eq!(merged.get("PORT"), Some("8000"));
    }

    #[test]
    fn expand_resolves_dollar_and_braced_refs_in_order() {
        let mut env = EnvFile::new();
        env.set("HOST", "example.com");
        env.set("URL", "https://$HOST/api");
        env.set("URL2", "https://${HOST}/v2");

        let expanded = env.expand();
        assert_eq!(expanded.get("URL"), Some("https://example.com/api"));
        assert_eq!(expanded.get("URL2"), Some("https://example.com/v2"));
    }

    #[test]
    fn expand_falls_back_to_process_env_then_empty() {
        // SAFETY: test-only, single-threaded within this test body.
        unsafe { std::env::set_var("PIKU_CONFIG_TEST_VAR", "from-process") };
        let mut env = EnvFile::new();
        env.set("A", "$PIKU_CONFIG_TEST_VAR");
        env.set("B", "$PIKU_CONFIG_TEST_UNSET_VAR");
        let expanded = env.expand();
        assert_eq!(expanded.get("A"), Some("from-process"));
        assert_eq!(expanded.get("B"), Some(""));
        unsafe { std::env::remove_var("PIKU_CONFIG_TEST_VAR") };
    }

    #[test]
    fn atomic_write_then_load_round_trips() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("ENV");
        atomic_write(&path, "A=1\nB=2").expect("write");
        let (env, warnings) = EnvFile::load(&path).expect("load");
        assert!(warnings.is_empty());
        assert_eq!(env.get("A"), Some("1"));
    }

    #[test]
    fn atomic_write_leaves_no_tmp_file_behind() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("LIVE_ENV");
        atomic_write(&path, "A=1").expect("write");
        let tmp = td.path().join(".LIVE_ENV.tmp");
        assert!(!tmp.exists());
    }

    #[test]
    fn load_scaling_missing_file_is_empty() {
        let td = tempdir().expect("tempdir");
        let (scaling, warnings) = load_scaling(&td.path().join("SCALING")).expect("load");
        assert!(scaling.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn validate_env_key_rejects_bad_names() {
        assert!(validate_env_key("").is_err());
        assert!(validate_env_key("1ABC").is_err());
        assert!(validate_env_key("FOO-BAR").is_err());
        assert!(validate_env_key("FOO_BAR2").is_ok());
    }
}
