//! The deploy pipeline (component orchestration across C3–C7): turns a
//! materialized working tree into a running, nginx-fronted worker fleet.
//!
//! Ordering matches the documented guarantee: fetch/reset/submodule
//! update, preflight, build, release, `LIVE_ENV`/`SCALING` write,
//! auto-restart prune, create new vassals, unlink destroyed vassals —
//! with the nginx conf written *before* new vassals so a supervisor
//! restart never briefly exposes an unconfigured upstream.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use piku_config::EnvFile;
use piku_detect::{Oracle, RealOracle, Runtime};
use piku_procfile::Procfile;
use piku_types::{Config, WorkerKind};

use crate::Reporter;

/// How long a `preflight`/`release` hook may run before it is killed.
const HOOK_TIMEOUT: Duration = Duration::from_secs(600);

/// Run one deploy of `app`. `newrev` is `Some(sha)` when invoked from the
/// git receive hook (materializes that ref from the bare repo first);
/// `None` when re-running a deploy against the working tree already on
/// disk (e.g. after `config:set` or `ps:scale`, neither of which moves
/// the git ref).
pub fn do_deploy(config: &Config, app: &str, newrev: Option<&str>, reporter: &mut dyn Reporter) -> Result<()> {
    let paths = &config.paths;
    let app_dir = paths.app_dir(app);
    let repo_dir = paths.repo_dir(app);

    if let Some(reference) = newrev {
        reporter.info(&format!("{app}: fetching {reference}"));
        piku_git::export_tree(&repo_dir, reference, &app_dir)
            .with_context(|| format!("exporting {reference} into {}", app_dir.display()))?;
        piku_git::update_submodules(&app_dir)?;
    }

    std::fs::create_dir_all(paths.data_dir(app))?;
    std::fs::create_dir_all(paths.cache_dir(app))?;
    std::fs::create_dir_all(paths.env_dir(app))?;

    let procfile_content = std::fs::read_to_string(paths.procfile_path(app))
        .with_context(|| format!("{app} has no Procfile in its working tree"))?;
    let (procfile, warnings) = Procfile::parse(&procfile_content)?;
    for warning in &warnings {
        reporter.warn(warning);
    }

    run_one_shot(config, app, &app_dir, &procfile, WorkerKind::Preflight, "preflight", reporter)?;

    let (shipped, shipped_warnings) = EnvFile::load_or_default(&app_dir.join(piku_types::SHIPPED_ENV_FILE))?;
    let (override_env, override_warnings) = EnvFile::load_or_default(&paths.override_env_path(app))?;
    for warning in shipped_warnings.iter().chain(override_warnings.iter()) {
        reporter.warn(warning);
    }
    let mut merged = shipped.merged_with(&override_env).expand();

    let oracle = RealOracle;
    let detection = piku_detect::detect(&app_dir, &oracle, Some(&procfile));
    for (runtime, missing) in &detection.skipped {
        reporter.warn(&format!("{}: marker matched but missing {:?}, skipping", runtime.name(), missing));
    }

    let env_dir = paths.env_dir(app);
    if let Some(runtime) = detection.runtime {
        let rebuild = manifest_file(runtime)
            .map(|name| piku_detect::needs_rebuild(&app_dir.join(name), &env_dir))
            .unwrap_or(true);
        if rebuild {
            reporter.info(&format!("{app}: building with {}", runtime.name()));
            match piku_detect::build(runtime, &app_dir, &env_dir) {
                Ok(result) if result.success => {}
                Ok(result) => reporter.warn(&format!("{app}: build exited nonzero: {}", result.stderr)),
                Err(err) => reporter.warn(&format!("{app}: build failed: {err}")),
            }
        }
        for (key, value) in piku_detect::env_for(runtime, &app_dir, &env_dir) {
            merged.set(key, value);
        }
    } else {
        reporter.warn(&format!("{app}: could not detect runtime"));
    }

    run_one_shot(config, app, &app_dir, &procfile, WorkerKind::Release, "release", reporter)?;

    configure_nginx(config, app, &app_dir, &procfile, &merged, reporter)?;

    let (current_scaling, scaling_warnings) = piku_config::load_scaling(&paths.scaling_path(app))?;
    for warning in &scaling_warnings {
        reporter.warn(warning);
    }

    let procfile_kinds = procfile.kinds();
    let plan = piku_reconcile::compute_plan(&current_scaling, &BTreeMap::new(), &procfile_kinds, config.auto_restart)?;

    reporter.info(&format!("{app}: applying reconciliation plan ({} kinds)", plan.kinds.len()));
    piku_reconcile::apply(paths, app, &procfile, &merged, &app_dir, &config.uid, &config.gid, &plan)?;

    reporter.info(&format!("{app}: deploy complete"));
    Ok(())
}

/// Run a Preflight/Release hook if the Procfile declares one, propagating
/// a nonzero exit as a hard stop (per the error handling design — unlike
/// a failed *build*, a failed hook aborts the deploy).
fn run_one_shot(
    config: &Config,
    app: &str,
    app_dir: &Path,
    procfile: &Procfile,
    kind: WorkerKind,
    label: &str,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let Some((_, entry)) = procfile.iter().find(|(_, e)| e.kind == kind) else {
        return Ok(());
    };

    reporter.info(&format!("{app}: running {label} hook"));
    let (env, _) = EnvFile::load_or_default(&config.paths.live_env_path(app))?;
    let env_pairs = env.as_pairs();

    let output = piku_process::run_command_with_timeout("sh", &["-c", &entry.command], app_dir, &env_pairs, Some(HOOK_TIMEOUT))?;
    if !output.success() {
        reporter.error(&format!("{app}: {label} hook failed: {}", output.stderr));
        bail!("{label} hook exited {} for {app}", output.exit_code);
    }
    Ok(())
}

fn configure_nginx(
    config: &Config,
    app: &str,
    app_dir: &Path,
    procfile: &Procfile,
    env: &EnvFile,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let kinds = present_kinds(procfile);
    if !piku_nginx::should_configure(env, &kinds) {
        return Ok(());
    }

    reporter.info(&format!("{app}: configuring nginx"));
    let paths = &config.paths;
    let port = piku_nginx::assign_port(env)?;

    let domains: Vec<String> = env
        .get("NGINX_SERVER_NAME")
        .unwrap_or_default()
        .split([',', ' '])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let acme_www = paths.nginx_root().join(".acme-www").join(app);
    std::fs::create_dir_all(&acme_www).ok();
    let tls_status = piku_nginx::ensure_tls(paths, app, &domains, &config.acme_root, &config.acme_ca, &acme_www)?;
    match tls_status {
        piku_nginx::TlsStatus::Acme => reporter.info(&format!("{app}: TLS via acme.sh")),
        piku_nginx::TlsStatus::SelfSigned => reporter.warn(&format!("{app}: TLS fell back to a self-signed certificate")),
        piku_nginx::TlsStatus::AlreadyPresent => {}
    }

    let cloudflare_cidrs = if piku_types::is_truthy(env.get("NGINX_CLOUDFLARE_ACL")) {
        let include_ipv6 = !piku_types::is_truthy(env.get("DISABLE_IPV6"));
        match piku_nginx::fetch_cloudflare_ips(include_ipv6) {
            Ok(cidrs) => cidrs,
            Err(err) => {
                reporter.warn(&format!("{app}: cloudflare IP fetch failed, proceeding with empty ACL: {err}"));
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    let acl_lines = if cloudflare_cidrs.is_empty() {
        Vec::new()
    } else {
        let ssh_client_ip = std::env::var("SSH_CLIENT").ok().and_then(|v| v.split_whitespace().next().map(str::to_string));
        piku_nginx::render_acl(&cloudflare_cidrs, ssh_client_ip.as_deref())
    };

    let static_command = procfile.iter().find(|(_, e)| e.kind == WorkerKind::Static).map(|(_, e)| e.command.as_str());

    let ctx = piku_nginx::ConfContext {
        app,
        env,
        nginx_root: &paths.nginx_root(),
        app_dir,
        kinds,
        static_command,
        port,
        domains: &domains,
        acl_lines,
        features: piku_nginx::detect_features(),
        cloudflare_cidrs,
    };
    let body = piku_nginx::render_conf(&ctx);
    piku_nginx::write_and_validate(paths, app, &body)?;

    Ok(())
}

fn present_kinds(procfile: &Procfile) -> piku_nginx::PresentKinds {
    let mut kinds = piku_nginx::PresentKinds::default();
    for (_, entry) in procfile.iter() {
        match entry.kind {
            WorkerKind::Wsgi => kinds.wsgi = true,
            WorkerKind::Jwsgi => kinds.jwsgi = true,
            WorkerKind::Rwsgi => kinds.rwsgi = true,
            WorkerKind::Web => kinds.web = true,
            WorkerKind::Static => kinds.static_ = true,
            WorkerKind::Php => kinds.php = true,
            _ => {}
        }
    }
    kinds
}

fn manifest_file(runtime: Runtime) -> Option<&'static str> {
    match runtime {
        Runtime::PythonPip => Some("requirements.txt"),
        Runtime::PythonPoetry | Runtime::PythonUv => Some("pyproject.toml"),
        Runtime::Ruby => Some("Gemfile"),
        Runtime::Node => Some("package.json"),
        Runtime::JavaMaven => Some("pom.xml"),
        Runtime::JavaGradle => Some("build.gradle"),
        Runtime::Go => Some("go.mod"),
        Runtime::ClojureCli => Some("deps.edn"),
        Runtime::ClojureLein => Some("project.clj"),
        Runtime::Rust => Some("Cargo.toml"),
        Runtime::Php | Runtime::Identity => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::CollectingReporter;
    use tempfile::tempdir;

    fn write_app(root: &Path, app: &str, procfile: &str) -> piku_types::Config {
        let config = piku_types::Config::with_root(root.to_path_buf());
        let app_dir = config.paths.app_dir(app);
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("Procfile"), procfile).unwrap();
        std::fs::create_dir_all(config.paths.env_dir(app)).unwrap();
        config
    }

    #[test]
    fn static_only_deploy_writes_conf_without_vassals() {
        let td = tempdir().expect("tempdir");
        let config = write_app(td.path(), "demo", "static: public\n");
        std::fs::create_dir_all(config.paths.app_dir("demo").join("public")).unwrap();

        let override_path = config.paths.override_env_path("demo");
        std::fs::create_dir_all(override_path.parent().unwrap()).unwrap();
        std::fs::write(&override_path, "NGINX_SERVER_NAME=demo.test\n").unwrap();

        let mut reporter = CollectingReporter::default();
        do_deploy(&config, "demo", None, &mut reporter).expect("deploy");

        assert!(config.paths.nginx_conf("demo").is_file());
        assert!(!config.paths.vassal_enabled("demo", "static", 1).is_file());
    }

    #[test]
    fn missing_procfile_fails_cleanly() {
        let td = tempdir().expect("tempdir");
        let config = piku_types::Config::with_root(td.path().to_path_buf());
        std::fs::create_dir_all(config.paths.app_dir("demo")).unwrap();

        let mut reporter = CollectingReporter::default();
        assert!(do_deploy(&config, "demo", None, &mut reporter).is_err());
    }

    #[test]
    fn failing_preflight_hook_aborts_before_build() {
        let td = tempdir().expect("tempdir");
        let config = write_app(td.path(), "demo", "preflight: exit 1\nweb: ./run\n");

        let mut reporter = CollectingReporter::default();
        let err = do_deploy(&config, "demo", None, &mut reporter).expect_err("must fail");
        assert!(format!("{err:#}").contains("preflight"));
        assert!(reporter.errors.iter().any(|e| e.contains("preflight")));
    }
}
