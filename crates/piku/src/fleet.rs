//! `apps`, `ps`, and `ps:scale` — listing and resizing the worker fleet
//! (components C2/C5 surfaced to the operator).

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use piku_config::EnvFile;
use piku_procfile::Procfile;
use piku_types::Config;

use crate::Reporter;

/// One row of `apps` output: the app's directory name and whether it has
/// at least one enabled vassal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRow {
    pub name: String,
    pub running: bool,
}

/// List every subdirectory of `apps/`, marking each with whether it has
/// at least one enabled vassal.
pub fn list_apps(config: &Config) -> Result<Vec<AppRow>> {
    let paths = &config.paths;
    let apps_root = paths.apps_root();
    if !apps_root.is_dir() {
        return Ok(Vec::new());
    }

    let enabled_root = paths.uwsgi_enabled_root();
    let mut rows = Vec::new();
    for entry in std::fs::read_dir(&apps_root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let running = has_enabled_vassal(&enabled_root, &name)?;
        rows.push(AppRow { name, running });
    }
    rows.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(rows)
}

fn has_enabled_vassal(enabled_root: &std::path::Path, app: &str) -> Result<bool> {
    if !enabled_root.is_dir() {
        return Ok(false);
    }
    for entry in std::fs::read_dir(enabled_root)? {
        let entry = entry?;
        if piku_types::is_apps_vassal(&entry.path(), app) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// One row of `ps` output: a Procfile kind and its current worker count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsRow {
    pub kind: String,
    pub count: i64,
}

/// Show current scaling for every declared kind, defaulting undeclared
/// kinds to `1` the same way the Reconciler does.
pub fn ps(config: &Config, app: &str) -> Result<Vec<PsRow>> {
    let paths = &config.paths;
    if !paths.app_dir(app).is_dir() {
        bail!("{app}: no such app");
    }

    let procfile_content = std::fs::read_to_string(paths.procfile_path(app))
        .with_context(|| format!("{app} has no Procfile"))?;
    let (procfile, _) = Procfile::parse(&procfile_content)?;
    let (scaling, _) = piku_config::load_scaling(&paths.scaling_path(app))?;

    Ok(procfile
        .kinds()
        .into_iter()
        .map(|kind| {
            let count = scaling.get_or_default(&kind);
            PsRow { kind, count }
        })
        .collect())
}

/// Apply `kind=count` overrides, then redeploy so the Reconciler creates
/// or destroys the ordinals the new counts imply.
pub fn scale(config: &Config, app: &str, requests: &[(String, i64)], reporter: &mut dyn Reporter) -> Result<()> {
    let paths = &config.paths;
    let procfile_content = std::fs::read_to_string(paths.procfile_path(app))
        .with_context(|| format!("{app} has no Procfile"))?;
    let (procfile, _) = Procfile::parse(&procfile_content)?;
    let procfile_kinds = procfile.kinds();

    let (current, _) = piku_config::load_scaling(&paths.scaling_path(app))?;
    let mut deltas = BTreeMap::new();
    for (kind, count) in requests {
        piku_types::validate_scale_request(kind, *count, &procfile_kinds)?;
        let current_count = current.get_or_default(kind);
        deltas.insert(kind.clone(), count - current_count);
    }

    let plan = piku_reconcile::compute_plan(&current, &deltas, &procfile_kinds, false)?;
    let (live_env, _) = EnvFile::load_or_default(&paths.live_env_path(app))?;
    let app_dir = paths.app_dir(app);

    reporter.info(&format!("{app}: scaling {} kind(s)", requests.len()));
    piku_reconcile::apply(paths, app, &procfile, &live_env, &app_dir, &config.uid, &config.gid, &plan)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn list_apps_reports_no_apps_on_empty_root() {
        let td = tempdir().expect("tempdir");
        let config = Config::with_root(td.path().to_path_buf());
        assert!(list_apps(&config).expect("list").is_empty());
    }

    #[test]
    fn list_apps_marks_running_when_vassal_enabled() {
        let td = tempdir().expect("tempdir");
        let config = write_app(td.path(), "demo", "web: ./run\n");
        std::fs::create_dir_all(config.paths.uwsgi_enabled_root()).unwrap();
        std::fs::write(config.paths.vassal_enabled("demo", "web", 1), "").unwrap();

        let rows = list_apps(&config).expect("list");
        assert_eq!(rows, vec![AppRow { name: "demo".to_string(), running: true }]);
    }

    #[test]
    fn ps_defaults_undeclared_kind_to_one() {
        let td = tempdir().expect("tempdir");
        let config = write_app(td.path(), "demo", "web: ./run\nworker: ./bg\n");
        let rows = ps(&config, "demo").expect("ps");
        assert!(rows.iter().all(|r| r.count == 1));
    }

    #[test]
    fn scale_rejects_unknown_kind() {
        let td = tempdir().expect("tempdir");
        let config = write_app(td.path(), "demo", "web: ./run\n");
        let mut reporter = crate::test_support::CollectingReporter::default();
        assert!(scale(&config, "demo", &[("worker".to_string(), 2)], &mut reporter).is_err());
    }
}
