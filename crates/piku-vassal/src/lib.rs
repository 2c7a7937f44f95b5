//! Supervisor vassal INI generation.
//!
//! Emits one `[uwsgi]` INI per `(app, kind, ordinal)`, staged under
//! `uwsgi-available/` and enabled by rename (never copy) into
//! `uwsgi-enabled/` so the Emperor never observes a partially-written
//! file.

use std::path::Path;

use anyhow::{Context, Result, bail};
use piku_config::EnvFile;
use piku_procfile::render_uwsgi_cron;
use piku_types::{Paths, WorkerKind};

/// Reserved environment key prefix never forwarded into a vassal's `env=`
/// lines (internal bookkeeping, not meant for the worker process).
pub const INTERNAL_ENV_PREFIX: &str = "PIKU_INTERNAL_";

/// Environment key never forwarded into a vassal's `env=` lines (consumed
/// by the nginx configurator only).
pub const NGINX_ACL_KEY: &str = "NGINX_ACL";

/// Everything needed to render one vassal INI.
pub struct VassalContext<'a> {
    pub app: &'a str,
    /// Raw Procfile key (e.g. `cron1`, `wsgi`, `mailer`).
    pub kind_key: &'a str,
    pub worker_kind: &'a WorkerKind,
    pub command: &'a str,
    pub ordinal: u32,
    pub app_dir: &'a Path,
    pub logs_dir: &'a Path,
    pub nginx_root: &'a Path,
    /// Merged, expanded environment (`LIVE_ENV`).
    pub env: &'a EnvFile,
    pub uid: &'a str,
    pub gid: &'a str,
}

fn env_or<'a>(ctx: &'a VassalContext, key: &str, default: &'a str) -> &'a str {
    ctx.env.get(key).unwrap_or(default)
}

/// Render the `[uwsgi]` INI body for one worker, or `None` for `static`
/// workers (nginx serves those directly; no vassal is written).
pub fn render(ctx: &VassalContext) -> Result<Option<String>> {
    if matches!(ctx.worker_kind, WorkerKind::Static) {
        return Ok(None);
    }
    if ctx.worker_kind.is_one_shot() {
        bail!("preflight/release entries are never rendered as vassals");
    }

    let mut lines = vec!["[uwsgi]".to_string()];

    lines.push(format!("chdir = {}", ctx.app_dir.display()));
    lines.push(format!("uid = {}", ctx.uid));
    lines.push(format!("gid = {}", ctx.gid));
    lines.push("master = true".to_string());
    lines.push(format!("project = {}", ctx.app));
    lines.push(format!("max-requests = {}", env_or(ctx, "UWSGI_MAX_REQUESTS", "1024")));
    lines.push(format!("processes = {}", env_or(ctx, "UWSGI_PROCESSES", "1")));
    lines.push(format!("procname-prefix = {}:{}:", ctx.app, ctx.kind_key));
    lines.push(format!("enable-threads = {}", env_or(ctx, "UWSGI_ENABLE_THREADS", "true")));
    lines.push(format!("log-x-forwarded-for = {}", env_or(ctx, "UWSGI_LOG_X_FORWARDED_FOR", "false")));
    lines.push(format!("log-maxsize = {}", env_or(ctx, "UWSGI_LOG_MAXSIZE", "1048576")));
    lines.push("logfile-chown = true".to_string());
    lines.push("logfile-chmod = 640".to_string());
    lines.push(format!(
        "logto2 = {}",
        ctx.logs_dir.join(format!("{}.{}.log", ctx.kind_key, ctx.ordinal)).display()
    ));
    lines.push("log-backupname = true".to_string());

    render_kind_specific(ctx, &mut lines)?;

    if let Some(idle) = ctx.env.get("UWSGI_IDLE") {
        lines.push(format!("idle = {idle}"));
        lines.push("cheap = true".to_string());
        lines.push("die-on-idle = true".to_string());
    }

    if let Some(include_path) = ctx.env.get("UWSGI_INCLUDE_FILE") {
        let resolved = ctx.app_dir.join(include_path);
        if resolved.is_file() {
            let content = std::fs::read_to_string(&resolved)
                .with_context(|| format!("reading {}", resolved.display()))?;
            for line in content.lines() {
                let line = line.trim();
                if !line.is_empty() && !line.starts_with('#') {
                    lines.push(line.to_string());
                }
            }
        }
    }

    for (key, value) in ctx.env.iter() {
        if key.starts_with(INTERNAL_ENV_PREFIX) || key == NGINX_ACL_KEY {
            continue;
        }
        lines.push(format!("env = {key}={value}"));
    }

    lines.push(format!("listen = {}", env_or(ctx, "UWSGI_LISTEN", "100")));

    Ok(Some(lines.join("\n") + "\n"))
}

fn render_kind_specific(ctx: &VassalContext, lines: &mut Vec<String>) -> Result<()> {
    match ctx.worker_kind {
        WorkerKind::Wsgi => {
            lines.push(format!("module = {}", ctx.command));
            lines.push(format!("threads = {}", env_or(ctx, "UWSGI_THREADS", "1")));
            let python_plugin = match ctx.env.get("PYTHON_VERSION") {
                Some("2") => "python2",
                _ => "python3",
            };
            lines.push(format!("plugin = {python_plugin}"));
            if piku_types::is_truthy(ctx.env.get("UWSGI_GEVENT")) {
                lines.push("plugin = gevent".to_string());
            }
            if piku_types::is_truthy(ctx.env.get("UWSGI_ASYNCIO")) {
                lines.push("plugin = asyncio".to_string());
            }
            push_socket(ctx, lines);
        }
        WorkerKind::Jwsgi => {
            lines.push("plugin = jvm,jwsgi".to_string());
            lines.push(format!("jwsgi = {}", ctx.command));
            push_socket(ctx, lines);
        }
        WorkerKind::Rwsgi => {
            lines.push("plugin = rack".to_string());
            lines.push(format!("rbrequire = {}", ctx.command));
            lines.push("post-buffering = 8192".to_string());
            push_socket(ctx, lines);
        }
        WorkerKind::Php => {
            lines.push("plugin = http,0:php".to_string());
            lines.push(format!("http = :{}", env_or(ctx, "PORT", "8000")));
            lines.push(format!("php-docroot = {}", ctx.app_dir.join(ctx.command).display()));
            lines.push("static-skip-ext = .php|.inc".to_string());
            lines.push("php-index = index.php".to_string());
        }
        WorkerKind::Cron(_) => {
            let cron_directive = render_uwsgi_cron(ctx.command)
                .with_context(|| format!("rendering cron directive for {}", ctx.kind_key))?;
            lines.push(format!("cron = {cron_directive}"));
        }
        WorkerKind::Web | WorkerKind::Worker(_) => {
            lines.push(format!("attach-daemon = {}", ctx.command));
        }
        WorkerKind::Static | WorkerKind::Preflight | WorkerKind::Release => unreachable!(),
    }
    Ok(())
}

fn push_socket(ctx: &VassalContext, lines: &mut Vec<String>) {
    if ctx.env.get("NGINX_SERVER_NAME").is_some() {
        lines.push(format!("socket = {}", ctx.nginx_root.join(format!("{}.sock", ctx.app)).display()));
    } else {
        let bind = env_or(ctx, "BIND_ADDRESS", "127.0.0.1");
        let port = env_or(ctx, "PORT", "8000");
        lines.push(format!("http-socket = {bind}:{port}"));
    }
}

/// Stage a rendered vassal at `uwsgi-available/<app>_<kind>.<ord>.ini`
/// via write-then-rename.
pub fn stage(paths: &Paths, app: &str, kind_key: &str, ordinal: u32, body: &str) -> Result<()> {
    std::fs::create_dir_all(paths.uwsgi_available_root())
        .context("creating uwsgi-available root")?;
    piku_config::atomic_write(&paths.vassal_available(app, kind_key, ordinal), body)
}

/// Enable a staged vassal by renaming it into `uwsgi-enabled/`. This is a
/// plain rename, not a copy, so the Emperor never observes a torn file.
pub fn enable(paths: &Paths, app: &str, kind_key: &str, ordinal: u32) -> Result<()> {
    let available = paths.vassal_available(app, kind_key, ordinal);
    let enabled = paths.vassal_enabled(app, kind_key, ordinal);
    std::fs::create_dir_all(paths.uwsgi_enabled_root()).context("creating uwsgi-enabled root")?;
    std::fs::rename(&available, &enabled)
        .with_context(|| format!("enabling vassal {} -> {}", available.display(), enabled.display()))
}

/// Disable (unlink) an enabled vassal. The on-disk log file for that
/// ordinal is intentionally left behind.
pub fn disable(paths: &Paths, app: &str, kind_key: &str, ordinal: u32) -> Result<()> {
    let enabled = paths.vassal_enabled(app, kind_key, ordinal);
    if enabled.exists() {
        std::fs::remove_file(&enabled).with_context(|| format!("removing {}", enabled.display()))?;
    }
    Ok(())
}
