//! Worker kinds recognized in a Procfile entry key.

use std::fmt;

/// Classification of a Procfile entry by its key.
///
/// `web`, `wsgi`, `jwsgi`, and `rwsgi` are the supervised "frontend" kinds
/// that get an nginx vhost; `static` serves files directly from nginx with
/// no supervised process at all; `worker` and `cron` are free-form
/// background kinds; `preflight` and `release` run once per deploy and are
/// never scaled or reconciled as long-lived processes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkerKind {
    Wsgi,
    Jwsgi,
    Rwsgi,
    Web,
    Static,
    Php,
    Worker(String),
    Cron(String),
    Preflight,
    Release,
}

impl WorkerKind {
    /// Classify a raw Procfile key (e.g. `web`, `cron.nightly-backup`, `worker.mailer`).
    pub fn from_key(key: &str) -> Self {
        match key {
            "wsgi" => WorkerKind::Wsgi,
            "jwsgi" => WorkerKind::Jwsgi,
            "rwsgi" => WorkerKind::Rwsgi,
            "web" => WorkerKind::Web,
            "static" => WorkerKind::Static,
            "php" => WorkerKind::Php,
            "preflight" => WorkerKind::Preflight,
            "release" => WorkerKind::Release,
            other => {
                if let Some(rest) = other.strip_prefix("cron") {
                    WorkerKind::Cron(rest.trim_start_matches('.').to_string())
                } else {
                    WorkerKind::Worker(other.to_string())
                }
            }
        }
    }

    /// Whether this kind is a scheduled cron job rather than a long-lived process.
    pub fn is_cron(&self) -> bool {
        matches!(self, WorkerKind::Cron(_))
    }

    /// Whether this kind runs exactly once per deploy and is never scaled.
    pub fn is_one_shot(&self) -> bool {
        matches!(self, WorkerKind::Preflight | WorkerKind::Release)
    }

    /// Whether this kind is supervised by uWSGI as a long-running vassal
    /// (excludes static, one-shot, and cron kinds).
    pub fn is_supervised(&self) -> bool {
        !matches!(
            self,
            WorkerKind::Static | WorkerKind::Preflight | WorkerKind::Release | WorkerKind::Cron(_)
        )
    }

    /// Whether this kind is a frontend that should receive an nginx vhost.
    pub fn is_frontend(&self) -> bool {
        matches!(
            self,
            WorkerKind::Wsgi | WorkerKind::Jwsgi | WorkerKind::Rwsgi | WorkerKind::Web | WorkerKind::Static | WorkerKind::Php
        )
    }

    /// The uWSGI `plugin=` value this kind implies, if any (frontends only).
    pub fn uwsgi_plugin(&self) -> Option<&'static str> {
        match self {
            WorkerKind::Wsgi => Some("python3"),
            WorkerKind::Jwsgi => Some("jvm,jwsgi"),
            WorkerKind::Rwsgi => Some("rack"),
            WorkerKind::Php => Some("php"),
            _ => None,
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::Wsgi => write!(f, "wsgi"),
            WorkerKind::Jwsgi => write!(f, "jwsgi"),
            WorkerKind::Rwsgi => write!(f, "rwsgi"),
            WorkerKind::Web => write!(f, "web"),
            WorkerKind::Static => write!(f, "static"),
            WorkerKind::Php => write!(f, "php"),
            WorkerKind::Worker(name) => write!(f, "{name}"),
            WorkerKind::Cron(name) if name.is_empty() => write!(f, "cron"),
            WorkerKind::Cron(name) => write!(f, "cron.{name}"),
            WorkerKind::Preflight => write!(f, "preflight"),
            WorkerKind::Release => write!(f, "release"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_frontend_kinds() {
        assert_eq!(WorkerKind::from_key("wsgi"), WorkerKind::Wsgi);
        assert_eq!(WorkerKind::from_key("web"), WorkerKind::Web);
        assert_eq!(WorkerKind::from_key("static"), WorkerKind::Static);
    }

    #[test]
    fn classifies_cron_with_and_without_suffix() {
        assert_eq!(WorkerKind::from_key("cron"), WorkerKind::Cron(String::new()));
        assert_eq!(
            WorkerKind::from_key("cron.nightly-backup"),
            WorkerKind::Cron("nightly-backup".to_string())
        );
    }

    #[test]
    fn classifies_custom_worker_kinds() {
        assert_eq!(
            WorkerKind::from_key("mailer"),
            WorkerKind::Worker("mailer".to_string())
        );
    }

    #[test]
    fn one_shot_kinds_are_not_supervised() {
        assert!(!WorkerKind::Preflight.is_supervised());
        assert!(!WorkerKind::Release.is_supervised());
        assert!(WorkerKind::Preflight.is_one_shot());
    }

    #[test]
    fn static_is_frontend_but_not_supervised() {
        assert!(WorkerKind::Static.is_frontend());
        assert!(!WorkerKind::Static.is_supervised());
    }

    #[test]
    fn cron_is_neither_frontend_nor_supervised() {
        let k = WorkerKind::Cron("nightly".to_string());
        assert!(!k.is_frontend());
        assert!(!k.is_supervised());
        assert!(k.is_cron());
    }

    #[test]
    fn display_roundtrips_through_from_key() {
        for key in ["wsgi", "web", "static", "cron.nightly-backup", "mailer", "preflight"] {
            let kind = WorkerKind::from_key(key);
            assert_eq!(kind.to_string(), key);
        }
    }

    #[test]
    fn uwsgi_plugin_only_set_for_interpreted_frontends() {
        assert_eq!(WorkerKind::Wsgi.uwsgi_plugin(), Some("python3"));
        assert_eq!(WorkerKind::Web.uwsgi_plugin(), None);
        assert_eq!(WorkerKind::Static.uwsgi_plugin(), None);
    }
}
