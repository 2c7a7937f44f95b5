//! Runtime detection and build orchestration.
//!
//! Detectors are tried in priority order; the first whose marker file is
//! present *and* whose required binaries are all on `PATH` wins. Marker
//! presence and binary lookups go through an [`Oracle`] so tests can
//! substitute fixtures without touching a real filesystem or `PATH`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use piku_process::{CommandResult, run_command_in_dir};
use piku_procfile::Procfile;

/// Abstraction over filesystem/PATH queries used during detection, so
/// tests can substitute fixtures without real toolchains.
pub trait Oracle {
    fn file_exists(&self, app_dir: &Path, name: &str) -> bool;
    fn glob_matches(&self, app_dir: &Path, suffix: &str) -> bool;
    fn binary_on_path(&self, name: &str) -> bool;
}

/// Real-filesystem, real-`PATH` oracle used in production.
pub struct RealOracle;

impl Oracle for RealOracle {
    fn file_exists(&self, app_dir: &Path, name: &str) -> bool {
        app_dir.join(name).is_file()
    }

    fn glob_matches(&self, app_dir: &Path, suffix: &str) -> bool {
        std::fs::read_dir(app_dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .any(|e| e.file_name().to_string_lossy().ends_with(suffix))
            })
            .unwrap_or(false)
    }

    fn binary_on_path(&self, name: &str) -> bool {
        piku_process::command_exists(name)
    }
}

/// The runtime a builder targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
    PythonPip,
    PythonPoetry,
    PythonUv,
    Ruby,
    Node,
    JavaMaven,
    JavaGradle,
    Go,
    ClojureCli,
    ClojureLein,
    Php,
    Rust,
    Identity,
}

impl Runtime {
    pub fn name(&self) -> &'static str {
        match self {
            Runtime::PythonPip => "python (pip)",
            Runtime::PythonPoetry => "python (poetry)",
            Runtime::PythonUv => "python (uv)",
            Runtime::Ruby => "ruby",
            Runtime::Node => "node",
            Runtime::JavaMaven => "java (maven)",
            Runtime::JavaGradle => "java (gradle)",
            Runtime::Go => "go",
            Runtime::ClojureCli => "clojure (cli)",
            Runtime::ClojureLein => "clojure (leiningen)",
            Runtime::Php => "php",
            Runtime::Rust => "rust",
            Runtime::Identity => "identity (no build)",
        }
    }
}

struct Detector {
    runtime: Runtime,
    marker: fn(&Path, &dyn Oracle, Option<&Procfile>) -> bool,
    required_binaries: &'static [&'static str],
}

fn detectors() -> Vec<Detector> {
    vec![
        Detector {
            runtime: Runtime::PythonPip,
            marker: |dir, o, _| o.file_exists(dir, "requirements.txt"),
            required_binaries: &["virtualenv", "pip"],
        },
        Detector {
            runtime: Runtime::PythonPoetry,
            marker: |dir, o, _| o.file_exists(dir, "pyproject.toml") && o.binary_on_path("poetry"),
            required_binaries: &["poetry"],
        },
        Detector {
            runtime: Runtime::PythonUv,
            marker: |dir, o, _| o.file_exists(dir, "pyproject.toml") && o.binary_on_path("uv"),
            required_binaries: &["uv"],
        },
        Detector {
            runtime: Runtime::Ruby,
            marker: |dir, o, _| o.file_exists(dir, "Gemfile"),
            required_binaries: &["ruby", "gem", "bundle"],
        },
        Detector {
            runtime: Runtime::Node,
            marker: |dir, o, _| o.file_exists(dir, "package.json"),
            required_binaries: &["node", "npm"],
        },
        Detector {
            runtime: Runtime::JavaMaven,
            marker: |dir, o, _| o.file_exists(dir, "pom.xml"),
            required_binaries: &["mvn"],
        },
        Detector {
            runtime: Runtime::JavaGradle,
            marker: |dir, o, _| o.file_exists(dir, "build.gradle"),
            required_binaries: &["gradle"],
        },
        Detector {
            runtime: Runtime::Go,
            marker: |dir, o, _| {
                o.file_exists(dir, "Godeps") || o.file_exists(dir, "go.mod") || o.glob_matches(dir, ".go")
            },
            required_binaries: &["go"],
        },
        Detector {
            runtime: Runtime::ClojureCli,
            marker: |dir, o, _| o.file_exists(dir, "deps.edn"),
            required_binaries: &["clojure"],
        },
        Detector {
            runtime: Runtime::ClojureLein,
            marker: |dir, o, _| o.file_exists(dir, "project.clj"),
            required_binaries: &["lein"],
        },
        Detector {
            runtime: Runtime::Php,
            marker: |_dir, _o, procfile| procfile.is_some_and(|p| p.iter().any(|(_, e)| e.kind == piku_types::WorkerKind::Php)),
            required_binaries: &["uwsgi_php"],
        },
        Detector {
            runtime: Runtime::Rust,
            marker: |dir, o, _| o.file_exists(dir, "Cargo.toml") && o.file_exists(dir, "rust-toolchain.toml"),
            required_binaries: &["cargo"],
        },
        Detector {
            runtime: Runtime::Identity,
            marker: |_dir, _o, procfile| {
                procfile.is_some_and(|p| {
                    let has_release = p.iter().any(|(_, e)| e.kind == piku_types::WorkerKind::Release);
                    let has_web = p.iter().any(|(_, e)| e.kind == piku_types::WorkerKind::Web);
                    let has_static = p.iter().any(|(_, e)| e.kind == piku_types::WorkerKind::Static);
                    (has_release && has_web) || has_static
                })
            },
            required_binaries: &[],
        },
    ]
}

/// Outcome of a detection pass: either a matched runtime, or a list of
/// markers that matched but whose binaries were missing (surfaced as
/// warnings before falling through to "no runtime detected").
pub struct Detection {
    pub runtime: Option<Runtime>,
    pub skipped: Vec<(Runtime, Vec<&'static str>)>,
}

/// Walk the detector registry in priority order using `oracle`. Returns
/// the first runtime whose marker matches and whose binaries are all
/// present; runtimes whose marker matched but were missing a binary are
/// recorded in `skipped` for diagnostics.
pub fn detect(app_dir: &Path, oracle: &dyn Oracle, procfile: Option<&Procfile>) -> Detection {
    let mut skipped = Vec::new();

    for detector in detectors() {
        if !(detector.marker)(app_dir, oracle, procfile) {
            continue;
        }

        let missing: Vec<&'static str> = detector
            .required_binaries
            .iter()
            .copied()
            .filter(|bin| !oracle.binary_on_path(bin))
            .collect();

        if missing.is_empty() {
            return Detection { runtime: Some(detector.runtime), skipped };
        }

        skipped.push((detector.runtime, missing));
    }

    Detection { runtime: None, skipped }
}

/// Whether `envs/<app>` needs a (re)build: it doesn't exist yet, or the
/// manifest's mtime is newer than the env directory's mtime.
pub fn needs_rebuild(manifest: &Path, env_dir: &Path) -> bool {
    if !env_dir.is_dir() {
        return true;
    }
    let manifest_mtime = std::fs::metadata(manifest).and_then(|m| m.modified()).ok();
    let env_mtime = std::fs::metadata(env_dir).and_then(|m| m.modified()).ok();

    match (manifest_mtime, env_mtime) {
        (Some(m), Some(e)) => m > e,
        _ => true,
    }
}

/// Run the package manager for `runtime` inside `app_dir`, populating
/// `env_dir`. Returns the captured command output for diagnostics; a
/// nonzero exit is surfaced as an `Err` here but callers treat a failed
/// *build* (as opposed to a failed *hook*) as non-fatal per the error
/// handling design: existing workers keep running.
pub fn build(runtime: Runtime, app_dir: &Path, env_dir: &Path) -> Result<CommandResult> {
    std::fs::create_dir_all(env_dir)
        .with_context(|| format!("creating {}", env_dir.display()))?;

    let result = match runtime {
        Runtime::PythonPip => {
            run_command_in_dir("virtualenv", &[env_dir.to_str().unwrap_or(".")], app_dir)?;
            let pip = env_dir.join("bin").join("pip");
            run_command_in_dir(pip.to_str().unwrap_or("pip"), &["install", "-r", "requirements.txt"], app_dir)?
        }
        Runtime::PythonPoetry => run_command_in_dir("poetry", &["install", "--no-root"], app_dir)?,
        Runtime::PythonUv => run_command_in_dir("uv", &["sync"], app_dir)?,
        Runtime::Ruby => run_command_in_dir("bundle", &["install", "--deployment"], app_dir)?,
        Runtime::Node => run_command_in_dir("npm", &["install", "--production"], app_dir)?,
        Runtime::JavaMaven => run_command_in_dir("mvn", &["-q", "package"], app_dir)?,
        Runtime::JavaGradle => run_command_in_dir("gradle", &["build"], app_dir)?,
        Runtime::Go => run_command_in_dir("go", &["build", "-o", "app"], app_dir)?,
        Runtime::ClojureCli => run_command_in_dir("clojure", &["-P"], app_dir)?,
        Runtime::ClojureLein => run_command_in_dir("lein", &["deps"], app_dir)?,
        Runtime::Rust => run_command_in_dir("cargo", &["build", "--release"], app_dir)?,
        Runtime::Php | Runtime::Identity => {
            CommandResult { success: true, exit_code: Some(0), stdout: String::new(), stderr: String::new(), duration_ms: 0 }
        }
    };

    Ok(result)
}

/// Environment additions a runtime's build contributes on top of the
/// merged `ENV`/`LIVE_ENV` (e.g. `VIRTUAL_ENV`, `PATH` prepends).
pub fn env_for(runtime: Runtime, app_dir: &Path, env_dir: &Path) -> Vec<(String, String)> {
    let mut extra = Vec::new();
    match runtime {
        Runtime::PythonPip => {
            extra.push(("VIRTUAL_ENV".to_string(), env_dir.display().to_string()));
            extra.push(("PATH".to_string(), prepend_path(&env_dir.join("bin"))));
        }
        Runtime::Node => {
            extra.push(("NODE_PATH".to_string(), app_dir.join("node_modules").display().to_string()));
        }
        Runtime::PythonPoetry | Runtime::PythonUv | Runtime::Ruby => {
            extra.push(("PATH".to_string(), prepend_path(&app_dir.join(".venv").join("bin"))));
        }
        _ => {}
    }
    extra
}

fn prepend_path(dir: &Path) -> String {
    let existing = std::env::var("PATH").unwrap_or_default();
    format!("{}:{existing}", dir.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    struct FixtureOracle {
        files: BTreeSet<&'static str>,
        globs: BTreeSet<&'static str>,
        binaries: BTreeSet<&'static str>,
    }

    impl Oracle for FixtureOracle {
        fn file_exists(&self, _app_dir: &Path, name: &str) -> bool {
            self.files.contains(name)
        }
        fn glob_matches(&self, _app_dir: &Path, suffix: &str) -> bool {
            self.globs.contains(suffix)
        }
        fn binary_on_path(&self, name: &str) -> bool {
            self.binaries.contains(name)
        }
    }

    #[test]
    fn detects_python_pip_when_requirements_and_binaries_present() {
        let oracle = FixtureOracle {
            files: ["requirements.txt"].into_iter().collect(),
            globs: BTreeSet::new(),
            binaries: ["virtualenv", "pip"].into_iter().collect(),
        };
        let detection = detect(Path::new("/app"), &oracle, None);
        assert_eq!(detection.runtime, Some(Runtime::PythonPip));
    }

    #[test]
    fn falls_through_to_next_detector_when_binary_missing() {
        let oracle = FixtureOracle {
            files: ["requirements.txt", "package.json"].into_iter().collect(),
            globs: BTreeSet::new(),
            binaries: ["node", "npm"].into_iter().collect(),
        };
        let detection = detect(Path::new("/app"), &oracle, None);
        assert_eq!(detection.runtime, Some(Runtime::Node));
        assert_eq!(detection.skipped.len(), 1);
        assert_eq!(detection.skipped[0].0, Runtime::PythonPip);
    }

    #[test]
    fn go_detects_via_any_marker() {
        let oracle =
            FixtureOracle { files: BTreeSet::new(), globs: [".go"].into_iter().collect(), binaries: ["go"].into_iter().collect() };
        let detection = detect(Path::new("/app"), &oracle, None);
        assert_eq!(detection.runtime, Some(Runtime::Go));
    }

    #[test]
    fn identity_matches_static_only_procfile() {
        let (procfile, _) = Procfile::parse("static: public\n").expect("parse");
        let oracle = FixtureOracle { files: BTreeSet::new(), globs: BTreeSet::new(), binaries: BTreeSet::new() };
        let detection = detect(Path::new("/app"), &oracle, Some(&procfile));
        assert_eq!(detection.runtime, Some(Runtime::Identity));
    }

    #[test]
    fn no_match_when_nothing_applies() {
        let oracle = FixtureOracle { files: BTreeSet::new(), globs: BTreeSet::new(), binaries: BTreeSet::new() };
        let detection = detect(Path::new("/app"), &oracle, None);
        assert!(detection.runtime.is_none());
    }

    #[test]
    fn needs_rebuild_true_when_env_dir_missing() {
        let td = tempfile::tempdir().expect("tempdir");
        let manifest = td.path().join("requirements.txt");
        std::fs::write(&manifest, "flask\n").unwrap();
        assert!(needs_rebuild(&manifest, &td.path().join("env")));
    }
}
