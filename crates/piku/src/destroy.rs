//! `destroy`: tear down every trace of an app except its persistent
//! `data/<app>` and `cache/<app>` directories (Testable Property #7).

use std::fs;

use anyhow::Result;
use piku_types::Config;

use crate::Reporter;

/// Remove `apps/<app>`, `repos/<app>`, `envs/<app>`, `logs/<app>`, every
/// enabled/available vassal, and every nginx file (conf, key, crt, acme
/// symlink/markers) for `app`. `data/<app>` and `cache/<app>` are left
/// untouched; a visible notice is reported so the operator knows they
/// were preserved deliberately, not forgotten.
pub fn destroy(config: &Config, app: &str, reporter: &mut dyn Reporter) -> Result<()> {
    let paths = &config.paths;

    remove_dir(&paths.app_dir(app), reporter)?;
    remove_dir(&paths.repo_dir(app), reporter)?;
    remove_dir(&paths.env_dir(app), reporter)?;
    remove_dir(&paths.logs_dir(app), reporter)?;

    remove_vassals(&paths.uwsgi_enabled_root(), app)?;
    remove_vassals(&paths.uwsgi_available_root(), app)?;

    remove_file(&paths.nginx_conf(app))?;
    remove_file(&paths.nginx_key(app))?;
    remove_file(&paths.nginx_crt(app))?;
    remove_file(&paths.nginx_sock(app))?;

    let acme_link = paths.acme_symlink(app);
    if acme_link.exists() || acme_link.is_symlink() {
        fs::remove_file(&acme_link).or_else(|_| fs::remove_dir_all(&acme_link)).ok();
    }
    remove_acme_markers(&paths.nginx_root(), app)?;

    reporter.info(&format!(
        "{app}: destroyed (data/{app} and cache/{app} preserved; remove those manually if no longer needed)"
    ));
    Ok(())
}

fn remove_dir(path: &std::path::Path, reporter: &mut dyn Reporter) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)?;
    } else {
        reporter.warn(&format!("{} does not exist, skipping", path.display()));
    }
    Ok(())
}

fn remove_file(path: &std::path::Path) -> Result<()> {
    if path.is_file() {
        fs::remove_file(path)?;
    }
    Ok(())
}

fn remove_vassals(root: &std::path::Path, app: &str) -> Result<()> {
    if !root.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if piku_types::is_apps_vassal(&entry.path(), app) {
            fs::remove_file(entry.path()).ok();
        }
    }
    Ok(())
}

fn remove_acme_markers(nginx_root: &std::path::Path, app: &str) -> Result<()> {
    if !nginx_root.is_dir() {
        return Ok(());
    }
    let prefix = format!(".acme-issued-{app}-");
    for entry in fs::read_dir(nginx_root)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            fs::remove_file(entry.path()).ok();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::CollectingReporter;
    use tempfile::tempdir;

    #[test]
    fn destroy_preserves_data_and_cache() {
        let td = tempdir().expect("tempdir");
        let config = Config::with_root(td.path().to_path_buf());
        let paths = &config.paths;

        fs::create_dir_all(paths.app_dir("demo")).unwrap();
        fs::create_dir_all(paths.repo_dir("demo")).unwrap();
        fs::create_dir_all(paths.env_dir("demo")).unwrap();
        fs::create_dir_all(paths.logs_dir("demo")).unwrap();
        fs::create_dir_all(paths.data_dir("demo")).unwrap();
        fs::create_dir_all(paths.cache_dir("demo")).unwrap();
        fs::write(paths.data_dir("demo").join("keep.db"), "x").unwrap();

        let mut reporter = CollectingReporter::default();
        destroy(&config, "demo", &mut reporter).expect("destroy");

        assert!(!paths.app_dir("demo").exists());
        assert!(!paths.repo_dir("demo").exists());
        assert!(!paths.env_dir("demo").exists());
        assert!(!paths.logs_dir("demo").exists());
        assert!(paths.data_dir("demo").join("keep.db").is_file());
        assert!(paths.cache_dir("demo").is_dir());
    }

    #[test]
    fn destroy_removes_only_the_targeted_apps_vassals() {
        let td = tempdir().expect("tempdir");
        let config = Config::with_root(td.path().to_path_buf());
        let paths = &config.paths;

        fs::create_dir_all(paths.uwsgi_enabled_root()).unwrap();
        fs::write(paths.uwsgi_enabled_root().join("demo_web.1.ini"), "").unwrap();
        fs::write(paths.uwsgi_enabled_root().join("other_web.1.ini"), "").unwrap();

        let mut reporter = CollectingReporter::default();
        destroy(&config, "demo", &mut reporter).expect("destroy");

        assert!(!paths.uwsgi_enabled_root().join("demo_web.1.ini").exists());
        assert!(paths.uwsgi_enabled_root().join("other_web.1.ini").exists());
    }
}
