//! `setup`: lay down the root directory tree and the Emperor's own
//! supervisor INI (the one vassal file piku never unlinks), then make
//! sure the invoking script is executable.

use std::path::Path;

use anyhow::{Context, Result};
use piku_types::Config;

use crate::Reporter;

/// Name of the Emperor's own supervisor INI, directly under the root
/// (as opposed to the per-app vassals in `uwsgi-available`/`-enabled`).
const EMPEROR_INI_NAME: &str = "uwsgi.ini";

/// Create every directory named in the data model, write the Emperor
/// INI (`emperor = uwsgi-enabled`, threads sized to twice the detected
/// CPU count), and `chmod +x` `script_path` (the piku binary itself, so
/// a freshly cloned install is runnable immediately).
pub fn setup(config: &Config, script_path: &Path, reporter: &mut dyn Reporter) -> Result<()> {
    let paths = &config.paths;
    for dir in [
        paths.apps_root(),
        paths.repos_root(),
        paths.envs_root(),
        paths.logs_root(),
        paths.uwsgi_available_root(),
        paths.uwsgi_enabled_root(),
        paths.nginx_root(),
        paths.acme_root(),
        paths.cache_root(),
        paths.data_root(),
    ] {
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let ini_path = paths.root.join(EMPEROR_INI_NAME);
    let threads = emperor_threads();
    let body = format!(
        "[uwsgi]\nemperor = {enabled}\nuid = {uid}\ngid = {gid}\nmaster = true\nenable-threads = true\nthreads = {threads}\nlog-maxsize = 1048576\nlogto = {logs}/uwsgi.log\nlog-backupname = {logs}/uwsgi.log.old\n",
        enabled = paths.uwsgi_enabled_root().display(),
        uid = config.uid,
        gid = config.gid,
        logs = paths.logs_root().display(),
    );
    piku_config::atomic_write(&ini_path, &body)?;

    chmod_executable(script_path)?;

    reporter.info(&format!("piku root initialized at {}", paths.root.display()));
    Ok(())
}

/// `2 * available_parallelism()`, a conservative default for the
/// Emperor's own thread pool. Falls back to `2` (i.e. a single detected
/// core) when the platform can't report a count.
fn emperor_threads() -> usize {
    std::thread::available_parallelism().map(|n| n.get() * 2).unwrap_or(2)
}

#[cfg(unix)]
pub(crate) fn chmod_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if !path.is_file() {
        return Ok(());
    }
    let mut perms = std::fs::metadata(path)
        .with_context(|| format!("statting {}", path.display()))?
        .permissions();
    perms.set_mode(perms.mode() | 0o755);
    std::fs::set_permissions(path, perms).with_context(|| format!("chmod +x {}", path.display()))
}

#[cfg(not(unix))]
pub(crate) fn chmod_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::CollectingReporter;
    use tempfile::tempdir;

    #[test]
    fn setup_creates_every_root_directory() {
        let td = tempdir().expect("tempdir");
        let config = Config::with_root(td.path().join("piku-root"));
        let script = td.path().join("piku");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();

        let mut reporter = CollectingReporter::default();
        setup(&config, &script, &mut reporter).expect("setup");

        assert!(config.paths.apps_root().is_dir());
        assert!(config.paths.uwsgi_enabled_root().is_dir());
        assert!(config.paths.data_root().is_dir());
    }

    #[test]
    fn setup_writes_emperor_ini_pointing_at_enabled_root() {
        let td = tempdir().expect("tempdir");
        let config = Config::with_root(td.path().join("piku-root"));
        let script = td.path().join("piku");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();

        let mut reporter = CollectingReporter::default();
        setup(&config, &script, &mut reporter).expect("setup");

        let ini = std::fs::read_to_string(config.paths.root.join(EMPEROR_INI_NAME)).unwrap();
        assert!(ini.starts_with("[uwsgi]\n"));
        assert!(ini.contains(&format!("emperor = {}", config.paths.uwsgi_enabled_root().display())));
    }

    #[cfg(unix)]
    #[test]
    fn setup_makes_the_script_executable() {
        use std::os::unix::fs::PermissionsExt;

        let td = tempdir().expect("tempdir");
        let config = Config::with_root(td.path().join("piku-root"));
        let script = td.path().join("piku");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o644)).unwrap();

        let mut reporter = CollectingReporter::default();
        setup(&config, &script, &mut reporter).expect("setup");

        let mode = std::fs::metadata(&script).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
