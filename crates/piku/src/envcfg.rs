//! `config` / `config:get` / `config:set` / `config:unset` / `config:live`
//! edit `envs/<app>/ENV`, the override layer that
//! sits above an app's shipped `ENV` and under nothing.
//!
//! `set`/`unset` trigger a redeploy so the new value reaches `LIVE_ENV`
//! and any running workers (Testable Scenario S3); `get`/`live` are
//! read-only.

use anyhow::{Context, Result, bail};
use piku_config::EnvFile;
use piku_types::Config;

use crate::Reporter;

/// Print every override key/value pair, one `KEY=value` per line.
pub fn list(config: &Config, app: &str) -> Result<Vec<String>> {
    let (env, _) = EnvFile::load_or_default(&config.paths.override_env_path(app))?;
    Ok(env.iter().map(|(k, v)| format!("{k}={v}")).collect())
}

/// Print the frozen environment actually handed to the current workers
/// (`LIVE_ENV`, written by the last successful deploy).
pub fn live(config: &Config, app: &str) -> Result<Vec<String>> {
    let (env, _) = EnvFile::load_or_default(&config.paths.live_env_path(app))?;
    Ok(env.iter().map(|(k, v)| format!("{k}={v}")).collect())
}

/// Look up a single override key.
pub fn get(config: &Config, app: &str, key: &str) -> Result<Option<String>> {
    let (env, _) = EnvFile::load_or_default(&config.paths.override_env_path(app))?;
    Ok(env.get(key).map(str::to_string))
}

/// Set one or more `KEY=value` pairs, write them back, then redeploy.
pub fn set(config: &Config, app: &str, pairs: &[(String, String)], reporter: &mut dyn Reporter) -> Result<()> {
    let path = config.paths.override_env_path(app);
    let (mut env, warnings) = EnvFile::load_or_default(&path)?;
    for warning in &warnings {
        reporter.warn(warning);
    }

    for (key, value) in pairs {
        piku_config::validate_env_key(key).with_context(|| format!("setting {key}"))?;
        env.set(key.clone(), value.clone());
    }

    piku_config::atomic_write(&path, &env.to_lines())?;
    reporter.info(&format!("{app}: config updated, redeploying"));
    crate::deploy::do_deploy(config, app, None, reporter)
}

/// Remove one or more keys, write back, then redeploy.
pub fn unset(config: &Config, app: &str, keys: &[String], reporter: &mut dyn Reporter) -> Result<()> {
    if keys.is_empty() {
        bail!("config:unset requires at least one key");
    }
    let path = config.paths.override_env_path(app);
    let (mut env, warnings) = EnvFile::load_or_default(&path)?;
    for warning in &warnings {
        reporter.warn(warning);
    }

    for key in keys {
        env.remove(key);
    }

    piku_config::atomic_write(&path, &env.to_lines())?;
    reporter.info(&format!("{app}: config updated, redeploying"));
    crate::deploy::do_deploy(config, app, None, reporter)
}
