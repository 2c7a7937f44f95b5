//! `run`, `restart`, and `stop`: one-off command execution and worker
//! fleet restarts that don't go through the full build pipeline.

use std::collections::BTreeMap;
use std::fs;
use std::process::Command;

use anyhow::{Context, Result, bail};
use piku_config::EnvFile;
use piku_procfile::Procfile;
use piku_types::Config;

use crate::Reporter;

/// `run <app> -- <command...>`: spawn `command` in the app's working
/// tree with `LIVE_ENV` merged on top of the invoking process's own
/// environment, stdin/stdout/stderr all inherited from the caller via a
/// synchronous `Command::status()` wait. Returns the child's exit code.
pub fn run(config: &Config, app: &str, command: &[String]) -> Result<i32> {
    let Some((program, args)) = command.split_first() else {
        bail!("run requires a command to execute");
    };
    let app_dir = config.paths.app_dir(app);
    if !app_dir.is_dir() {
        bail!("{app}: no such app");
    }

    let (live_env, _) = EnvFile::load_or_default(&config.paths.live_env_path(app))?;

    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(&app_dir);
    for (key, value) in live_env.as_pairs() {
        cmd.env(key, value);
    }

    let status = cmd
        .status()
        .with_context(|| format!("running `{program}` for {app}"))?;
    Ok(status.code().unwrap_or(-1))
}

/// `stop <app>`: unlink every enabled vassal for `app` without touching
/// `SCALING` or the staged `uwsgi-available/` copies, so a later
/// `restart` can recreate the same fleet.
pub fn stop(config: &Config, app: &str, reporter: &mut dyn Reporter) -> Result<()> {
    let enabled_root = config.paths.uwsgi_enabled_root();
    if !enabled_root.is_dir() {
        return Ok(());
    }

    let mut stopped = 0;
    for entry in fs::read_dir(&enabled_root)? {
        let entry = entry?;
        if piku_types::is_apps_vassal(&entry.path(), app) {
            fs::remove_file(entry.path()).ok();
            stopped += 1;
        }
    }
    reporter.info(&format!("{app}: stopped ({stopped} vassal(s) unlinked)"));
    Ok(())
}

/// `restart <app>` = `stop` followed by recreating every worker from the
/// Procfile/`SCALING`/`LIVE_ENV` already on disk, skipping build,
/// preflight/release, and nginx reconfiguration entirely.
pub fn restart(config: &Config, app: &str, reporter: &mut dyn Reporter) -> Result<()> {
    stop(config, app, reporter)?;
    spawn_app(config, app, reporter)
}

fn spawn_app(config: &Config, app: &str, reporter: &mut dyn Reporter) -> Result<()> {
    let paths = &config.paths;
    let app_dir = paths.app_dir(app);
    if !app_dir.is_dir() {
        bail!("{app}: no such app");
    }

    let procfile_content = fs::read_to_string(paths.procfile_path(app))
        .with_context(|| format!("{app} has no Procfile in its working tree"))?;
    let (procfile, warnings) = Procfile::parse(&procfile_content)?;
    for warning in &warnings {
        reporter.warn(warning);
    }

    let (live_env, _) = EnvFile::load_or_default(&paths.live_env_path(app))?;
    let (current, scaling_warnings) = piku_config::load_scaling(&paths.scaling_path(app))?;
    for warning in &scaling_warnings {
        reporter.warn(warning);
    }

    let procfile_kinds = procfile.kinds();
    let plan = piku_reconcile::compute_plan(&current, &BTreeMap::new(), &procfile_kinds, true)?;

    piku_reconcile::apply(paths, app, &procfile, &live_env, &app_dir, &config.uid, &config.gid, &plan)?;
    reporter.info(&format!("{app}: restarted"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::CollectingReporter;
    use tempfile::tempdir;

    fn write_app(root: &std::path::Path, app: &str, procfile: &str) -> Config {
        let config = Config::with_root(root.to_path_buf());
        let app_dir = config.paths.app_dir(app);
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("Procfile"), procfile).unwrap();
        std::fs::create_dir_all(config.paths.env_dir(app)).unwrap();
        config
    }

    #[test]
    fn run_rejects_empty_command() {
        let td = tempdir().expect("tempdir");
        let config = write_app(td.path(), "demo", "web: ./run\n");
        assert!(run(&config, "demo", &[]).is_err());
    }

    #[test]
    fn run_executes_in_the_app_working_tree() {
        let td = tempdir().expect("tempdir");
        let config = write_app(td.path(), "demo", "web: ./run\n");
        let code = run(&config, "demo", &["true".to_string()]).expect("run");
        assert_eq!(code, 0);
    }

    #[test]
    fn stop_unlinks_only_the_targeted_apps_vassals() {
        let td = tempdir().expect("tempdir");
        let config = write_app(td.path(), "demo", "web: ./run\n");
        std::fs::create_dir_all(config.paths.uwsgi_enabled_root()).unwrap();
        std::fs::write(config.paths.vassal_enabled("demo", "web", 1), "").unwrap();
        std::fs::write(config.paths.vassal_enabled("other", "web", 1), "").unwrap();

        let mut reporter = CollectingReporter::default();
        stop(&config, "demo", &mut reporter).expect("stop");

        assert!(!config.paths.vassal_enabled("demo", "web", 1).is_file());
        assert!(config.paths.vassal_enabled("other", "web", 1).is_file());
    }

    #[test]
    fn restart_recreates_vassals_after_stop() {
        let td = tempdir().expect("tempdir");
        let config = write_app(td.path(), "demo", "worker: ./run\n");

        let mut reporter = CollectingReporter::default();
        restart(&config, "demo", &mut reporter).expect("restart");

        assert!(config.paths.vassal_enabled("demo", "worker", 1).is_file());
    }
}
