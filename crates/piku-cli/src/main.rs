//! CLI front end: maps `piku <verb>` onto the
//! deployment pipeline in `piku`, and restricts the verbs honored when
//! invoked through an SSH forced command (only `git-hook`,
//! `git-receive-pack`, `git-upload-pack`, and `scp` are "internal").

mod reporter;

use std::io::Read as _;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use piku_types::Config;

use reporter::CliReporter;

#[derive(Parser, Debug)]
#[command(name = "piku", version, about = "A minimalist PaaS: git push to deploy")]
struct Cli {
    #[command(subcommand)]
    verb: Verb,
}

#[derive(Subcommand, Debug)]
enum Verb {
    /// List every known app, marking the running ones.
    Apps,
    /// Show an app's config overrides.
    Config { app: String },
    /// Look up a single config key.
    #[command(name = "config:get")]
    ConfigGet { app: String, key: String },
    /// Set one or more `KEY=value` overrides and redeploy.
    #[command(name = "config:set")]
    ConfigSet {
        app: String,
        #[arg(required = true)]
        pairs: Vec<String>,
    },
    /// Remove one or more override keys and redeploy.
    #[command(name = "config:unset")]
    ConfigUnset {
        app: String,
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Show the frozen environment handed to the app's current workers.
    #[command(name = "config:live")]
    ConfigLive { app: String },
    /// Redeploy an app's working tree already on disk.
    Deploy { app: String },
    /// Tear down an app, preserving its data and cache directories.
    Destroy { app: String },
    /// Tail an app's logs, optionally restricted to one Procfile kind.
    Logs { app: String, kind: Option<String> },
    /// Show current per-kind worker counts.
    Ps { app: String },
    /// Scale one or more kinds: `ps:scale demo web=3 worker=0`.
    #[command(name = "ps:scale")]
    PsScale {
        app: String,
        #[arg(required = true)]
        specs: Vec<String>,
    },
    /// Run a one-off command in an app's working tree with LIVE_ENV.
    Run {
        app: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    /// Stop then recreate an app's worker fleet without rebuilding.
    Restart { app: String },
    /// Unlink every enabled vassal for an app.
    Stop { app: String },
    /// Initialize the root directory tree and the Emperor's own INI.
    Setup,
    /// Authorize (or `--remove`) an SSH public key for git push access.
    #[command(name = "setup:ssh")]
    SetupSsh {
        /// Path to a public key file; reads from stdin when omitted.
        key_file: Option<PathBuf>,
        #[arg(long, default_value = "default")]
        name: String,
        #[arg(long)]
        remove: Option<String>,
    },
    /// Fetch the latest piku script and replace this binary iff 200 OK.
    Update {
        #[arg(long, default_value = piku::update::DEFAULT_UPDATE_URL)]
        url: String,
    },

    // --- internal verbs: SSH forced-command path only ---------------
    #[command(name = "git-hook", hide = true)]
    GitHook { app: String },
    #[command(name = "git-receive-pack", hide = true)]
    GitReceivePack { app: String },
    #[command(name = "git-upload-pack", hide = true)]
    GitUploadPack { app: String },
    #[command(hide = true)]
    Scp {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if invoked_via_ssh_forced_command() && !is_internal(&cli.verb) {
        eprintln!("piku: {:?} is not permitted over the git/SSH transport", verb_name(&cli.verb));
        return ExitCode::from(1);
    }

    let config = build_config();
    let mut reporter = CliReporter::new();

    match dispatch(&cli.verb, &config, &mut reporter) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            reporter.error(&format!("{err:#}"));
            ExitCode::from(1)
        }
    }
}

fn dispatch(verb: &Verb, config: &Config, reporter: &mut CliReporter) -> Result<u8> {
    match verb {
        Verb::Apps => {
            for row in piku::fleet::list_apps(config)? {
                println!("{}{}", if row.running { "* " } else { "  " }, row.name);
            }
            Ok(0)
        }
        Verb::Config { app } => {
            for line in piku::envcfg::list(config, app)? {
                println!("{line}");
            }
            Ok(0)
        }
        Verb::ConfigGet { app, key } => {
            match piku::envcfg::get(config, app, key)? {
                Some(value) => println!("{value}"),
                None => bail!("{app}: {key} is not set"),
            }
            Ok(0)
        }
        Verb::ConfigSet { app, pairs } => {
            let parsed = parse_pairs(pairs)?;
            piku::envcfg::set(config, app, &parsed, reporter)?;
            Ok(0)
        }
        Verb::ConfigUnset { app, keys } => {
            piku::envcfg::unset(config, app, keys, reporter)?;
            Ok(0)
        }
        Verb::ConfigLive { app } => {
            for line in piku::envcfg::live(config, app)? {
                println!("{line}");
            }
            Ok(0)
        }
        Verb::Deploy { app } => {
            piku::deploy::do_deploy(config, app, None, reporter)?;
            Ok(0)
        }
        Verb::Destroy { app } => {
            piku::destroy::destroy(config, app, reporter)?;
            Ok(0)
        }
        Verb::Logs { app, kind } => {
            piku::logs::follow(config, app, kind.as_deref(), |line| {
                println!("{} | {}", line.prefix, line.text);
            })?;
            Ok(0)
        }
        Verb::Ps { app } => {
            for row in piku::fleet::ps(config, app)? {
                println!("{}: {}", row.kind, row.count);
            }
            Ok(0)
        }
        Verb::PsScale { app, specs } => {
            let requests = parse_scale_specs(specs)?;
            piku::fleet::scale(config, app, &requests, reporter)?;
            Ok(0)
        }
        Verb::Run { app, command } => {
            let code = piku::runctl::run(config, app, command)?;
            Ok(code.clamp(0, 255) as u8)
        }
        Verb::Restart { app } => {
            piku::runctl::restart(config, app, reporter)?;
            Ok(0)
        }
        Verb::Stop { app } => {
            piku::runctl::stop(config, app, reporter)?;
            Ok(0)
        }
        Verb::Setup => {
            let script_path = std::env::current_exe().context("resolving the running binary's path")?;
            piku::setup::setup(config, &script_path, reporter)?;
            Ok(0)
        }
        Verb::SetupSsh { key_file, name, remove } => {
            let home = home_dir()?;
            if let Some(fingerprint) = remove {
                piku::ssh_setup::remove_key(&home, fingerprint, reporter)?;
            } else {
                let pubkey_line = read_pubkey(key_file.as_deref())?;
                let script_path = std::env::current_exe().context("resolving the running binary's path")?;
                piku::ssh_setup::add_key(&home, &script_path, pubkey_line.trim(), name, reporter)?;
            }
            Ok(0)
        }
        Verb::Update { url } => {
            let script_path = std::env::current_exe().context("resolving the running binary's path")?;
            piku::update::update(&script_path, url, reporter)?;
            Ok(0)
        }
        Verb::GitHook { app } => {
            let app = piku_types::app_name_from_arg(app)?;
            let mut input = String::new();
            std::io::stdin().read_to_string(&mut input).context("reading ref updates from stdin")?;
            piku::git_hook::handle_stdin(config, &app, &input, reporter)?;
            Ok(0)
        }
        Verb::GitReceivePack { app } => {
            let app = piku_types::app_name_from_arg(app)?;
            piku::git_hook::prepare_receive(config, &app)?;
            exec_git_shell("git-receive-pack", &config.paths.repo_dir(&app))
        }
        Verb::GitUploadPack { app } => {
            let app = piku_types::require_app(&config.paths.root, app)?;
            exec_git_shell("git-upload-pack", &config.paths.repo_dir(&app))
        }
        Verb::Scp { args } => {
            let status = std::process::Command::new("scp")
                .args(args)
                .status()
                .context("running scp")?;
            Ok(status.code().unwrap_or(1).clamp(0, 255) as u8)
        }
    }
}

/// Forward to `git-shell`, which speaks the pack protocol over our
/// inherited stdin/stdout with the connecting git client.
fn exec_git_shell(verb: &str, repo_dir: &std::path::Path) -> Result<u8> {
    let status = std::process::Command::new("git-shell")
        .arg("-c")
        .arg(format!("{verb} '{}'", repo_dir.display()))
        .status()
        .with_context(|| format!("running git-shell -c \"{verb} ...\""))?;
    Ok(status.code().unwrap_or(1).clamp(0, 255) as u8)
}

/// sshd sets `SSH_ORIGINAL_COMMAND` only for sessions that hit a forced
/// command (the `authorized_keys` lines this binary writes); its
/// presence is the signal that the invocation came over the git/SSH
/// transport rather than a local operator shell.
fn invoked_via_ssh_forced_command() -> bool {
    std::env::var_os("SSH_ORIGINAL_COMMAND").is_some()
}

fn is_internal(verb: &Verb) -> bool {
    matches!(verb, Verb::GitHook { .. } | Verb::GitReceivePack { .. } | Verb::GitUploadPack { .. } | Verb::Scp { .. })
}

fn verb_name(verb: &Verb) -> &'static str {
    match verb {
        Verb::Apps => "apps",
        Verb::Config { .. } => "config",
        Verb::ConfigGet { .. } => "config:get",
        Verb::ConfigSet { .. } => "config:set",
        Verb::ConfigUnset { .. } => "config:unset",
        Verb::ConfigLive { .. } => "config:live",
        Verb::Deploy { .. } => "deploy",
        Verb::Destroy { .. } => "destroy",
        Verb::Logs { .. } => "logs",
        Verb::Ps { .. } => "ps",
        Verb::PsScale { .. } => "ps:scale",
        Verb::Run { .. } => "run",
        Verb::Restart { .. } => "restart",
        Verb::Stop { .. } => "stop",
        Verb::Setup => "setup",
        Verb::SetupSsh { .. } => "setup:ssh",
        Verb::Update { .. } => "update",
        Verb::GitHook { .. } => "git-hook",
        Verb::GitReceivePack { .. } => "git-receive-pack",
        Verb::GitUploadPack { .. } => "git-upload-pack",
        Verb::Scp { .. } => "scp",
    }
}

fn build_config() -> Config {
    let root = std::env::var_os("PIKU_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(default_root);
    let mut config = Config::with_root(root);

    if let Some(acme_root) = std::env::var_os("ACME_ROOT") {
        config.acme_root = PathBuf::from(acme_root);
    }
    if let Ok(acme_ca) = std::env::var("ACME_ROOT_CA") {
        config.acme_ca = acme_ca;
    }
    if let Ok(auto_restart) = std::env::var(piku_types::AUTO_RESTART_VAR) {
        config.auto_restart = piku_types::is_truthy(Some(&auto_restart));
    }

    config
}

fn default_root() -> PathBuf {
    home_dir().map(|h| h.join(piku_types::DEFAULT_ROOT_DIRNAME)).unwrap_or_else(|_| PathBuf::from(".piku"))
}

fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from).context("HOME is not set")
}

fn read_pubkey(path: Option<&std::path::Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("reading public key from stdin")?;
            Ok(buf)
        }
    }
}

fn parse_pairs(pairs: &[String]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|raw| {
            raw.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .with_context(|| format!("expected KEY=VALUE, got {raw:?}"))
        })
        .collect()
}

fn parse_scale_specs(specs: &[String]) -> Result<Vec<(String, i64)>> {
    specs
        .iter()
        .map(|raw| {
            let (kind, count) = raw.split_once('=').with_context(|| format!("expected kind=count, got {raw:?}"))?;
            let count: i64 = count.parse().with_context(|| format!("invalid count in {raw:?}"))?;
            Ok((kind.to_string(), count))
        })
        .collect()
}
