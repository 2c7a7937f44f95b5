//! The git receive path: `git-receive-pack`, the
//! `post-receive` hook it installs, and `git-hook`, which the hook execs
//! for every updated ref.
//!
//! Materializing the pushed tree reuses [`crate::deploy::do_deploy`]'s
//! `git archive | tar -x` export (see that module's doc comment) rather
//! than a literal `git clone` into `apps/<app>` on first push — `export_tree`
//! already creates the destination and is the one code path that ever
//! populates a working tree, so a separate clone step would just be
//! overwritten by the first deploy it triggers.

use anyhow::{Context, Result};
use piku_types::Config;

use crate::Reporter;

/// Body of the `post-receive` hook installed in every bare repo: forwards
/// to `piku git-hook <app>`, carrying `PIKU_ROOT` so the invocation sees
/// the same root regardless of the SSH session's environment.
fn post_receive_script(piku_root: &std::path::Path, app: &str) -> String {
    format!(
        "#!/bin/sh\nexport PIKU_ROOT={root}\nexec piku git-hook {app}\n",
        root = piku_root.display(),
    )
}

/// `git-receive-pack <app>`: ensure the bare repo exists with its hook
/// installed. The caller execs `git-shell -c "git-receive-pack '<app>'"`
/// afterward (or the moral equivalent — see the CLI entry point).
pub fn prepare_receive(config: &Config, app: &str) -> Result<()> {
    let repo_dir = config.paths.repo_dir(app);
    if !repo_dir.is_dir() {
        piku_git::init_bare(&repo_dir)?;
    }
    let script = post_receive_script(&config.paths.root, app);
    piku_git::write_post_receive_hook(&repo_dir, &script)?;
    Ok(())
}

/// `git-hook <app>`: read `oldrev newrev refname` lines from stdin (one
/// per updated ref, as `post-receive` feeds them) and deploy the last
/// one. Only the last line matters in practice — a single `git push`
/// updates a single branch — but every line is still validated.
pub fn handle_stdin(config: &Config, app: &str, stdin: &str, reporter: &mut dyn Reporter) -> Result<()> {
    let app_dir = config.paths.app_dir(app);
    if !app_dir.is_dir() {
        std::fs::create_dir_all(&app_dir).with_context(|| format!("creating {}", app_dir.display()))?;
    }
    std::fs::create_dir_all(config.paths.data_dir(app))?;

    let mut last_newrev = None;
    for line in stdin.lines() {
        let mut parts = line.split_whitespace();
        let (Some(_oldrev), Some(newrev), Some(_refname)) = (parts.next(), parts.next(), parts.next()) else {
            reporter.warn(&format!("git-hook: malformed ref-update line: {line:?}"));
            continue;
        };
        last_newrev = Some(newrev.to_string());
    }

    let Some(newrev) = last_newrev else {
        reporter.warn("git-hook: no ref updates on stdin, nothing to deploy");
        return Ok(());
    };

    crate::deploy::do_deploy(config, app, Some(&newrev), reporter)
}
