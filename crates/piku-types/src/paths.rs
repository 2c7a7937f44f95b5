//! Deterministic derivation of every on-disk path from `(root, app)`.
//!
//! No caller assembles a path under `R` by hand; every location named in
//! the data model is a method here so renaming a directory convention is a
//! one-file change.

use std::path::{Path, PathBuf};

use crate::{LIVE_ENV_FILE, OVERRIDE_ENV_FILE, PROCFILE_NAME, SCALING_FILE, SHIPPED_ENV_FILE};

#[derive(Debug, Clone)]
pub struct Paths {
    pub root: PathBuf,
}

impl Paths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    // --- roots -------------------------------------------------------

    pub fn apps_root(&self) -> PathBuf {
        self.root.join("apps")
    }

    pub fn repos_root(&self) -> PathBuf {
        self.root.join("repos")
    }

    pub fn envs_root(&self) -> PathBuf {
        self.root.join("envs")
    }

    pub fn logs_root(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn uwsgi_available_root(&self) -> PathBuf {
        self.root.join("uwsgi-available")
    }

    pub fn uwsgi_enabled_root(&self) -> PathBuf {
        self.root.join("uwsgi-enabled")
    }

    pub fn nginx_root(&self) -> PathBuf {
        self.root.join("nginx")
    }

    pub fn acme_root(&self) -> PathBuf {
        self.root.join("acme")
    }

    pub fn cache_root(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn data_root(&self) -> PathBuf {
        self.root.join("data")
    }

    // --- per-app -------------------------------------------------------

    pub fn app_dir(&self, app: &str) -> PathBuf {
        self.apps_root().join(app)
    }

    pub fn repo_dir(&self, app: &str) -> PathBuf {
        self.repos_root().join(app)
    }

    pub fn env_dir(&self, app: &str) -> PathBuf {
        self.envs_root().join(app)
    }

    pub fn logs_dir(&self, app: &str) -> PathBuf {
        self.logs_root().join(app)
    }

    pub fn data_dir(&self, app: &str) -> PathBuf {
        self.data_root().join(app)
    }

    pub fn cache_dir(&self, app: &str) -> PathBuf {
        self.cache_root().join(app)
    }

    pub fn procfile_path(&self, app: &str) -> PathBuf {
        self.app_dir(app).join(PROCFILE_NAME)
    }

    pub fn shipped_env_path(&self, app: &str) -> PathBuf {
        self.app_dir(app).join(SHIPPED_ENV_FILE)
    }

    pub fn override_env_path(&self, app: &str) -> PathBuf {
        self.env_dir(app).join(OVERRIDE_ENV_FILE)
    }

    pub fn live_env_path(&self, app: &str) -> PathBuf {
        self.env_dir(app).join(LIVE_ENV_FILE)
    }

    pub fn scaling_path(&self, app: &str) -> PathBuf {
        self.env_dir(app).join(SCALING_FILE)
    }

    pub fn acme_symlink(&self, app: &str) -> PathBuf {
        self.acme_root().join(app)
    }

    // --- log files -------------------------------------------------------

    pub fn log_file(&self, app: &str, kind: &str, ordinal: u32) -> PathBuf {
        self.logs_dir(app).join(format!("{kind}.{ordinal}.log"))
    }

    /// Glob-style prefix (without extension) used when enumerating an app's logs.
    pub fn log_file_stem(kind: &str, ordinal: u32) -> String {
        format!("{kind}.{ordinal}")
    }

    // --- vassal files -------------------------------------------------------

    pub fn vassal_name(app: &str, kind: &str, ordinal: u32) -> String {
        format!("{app}_{kind}.{ordinal}.ini")
    }

    pub fn vassal_available(&self, app: &str, kind: &str, ordinal: u32) -> PathBuf {
        self.uwsgi_available_root()
            .join(Self::vassal_name(app, kind, ordinal))
    }

    pub fn vassal_enabled(&self, app: &str, kind: &str, ordinal: u32) -> PathBuf {
        self.uwsgi_enabled_root()
            .join(Self::vassal_name(app, kind, ordinal))
    }

    /// The `<app>_` prefix enabled vassal files share, for enumeration.
    pub fn vassal_prefix(app: &str) -> String {
        format!("{app}_")
    }

    // --- nginx artifacts -------------------------------------------------------

    pub fn nginx_conf(&self, app: &str) -> PathBuf {
        self.nginx_root().join(format!("{app}.conf"))
    }

    pub fn nginx_key(&self, app: &str) -> PathBuf {
        self.nginx_root().join(format!("{app}.key"))
    }

    pub fn nginx_crt(&self, app: &str) -> PathBuf {
        self.nginx_root().join(format!("{app}.crt"))
    }

    pub fn nginx_sock(&self, app: &str) -> PathBuf {
        self.nginx_root().join(format!("{app}.sock"))
    }

    pub fn acme_issued_marker(&self, app: &str, domain: &str) -> PathBuf {
        self.nginx_root().join(format!(".acme-issued-{app}-{domain}"))
    }
}

/// True when `path` is a vassal file belonging to `app` (by filename prefix).
pub fn is_apps_vassal(path: &Path, app: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(&Paths::vassal_prefix(app)) && n.ends_with(".ini"))
}
