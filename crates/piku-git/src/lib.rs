//! Git operations for piku: provisioning bare repositories pushed to by
//! `git push piku@host:app`, and exporting a ref's tree into an app's
//! working directory for the build/deploy pipeline.
//!
//! # Example
//!
//! ```
//! use piku_git::{GitContext, get_git_context};
//! use std::path::Path;
//!
//! let context = get_git_context(Path::new("."));
//! if let Some(commit) = context.commit {
//!     println!("Current commit: {}", commit);
//! }
//! ```

use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Git context recorded alongside a deploy for audit trail (surfaced via
/// `piku deploy:log`/`LIVE_ENV`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitContext {
    /// Current commit hash.
    pub commit: Option<String>,
    /// Current branch name.
    pub branch: Option<String>,
    /// Current tag (if HEAD is exactly on one).
    pub tag: Option<String>,
    /// Whether the working tree has uncommitted changes.
    pub dirty: Option<bool>,
}

impl GitContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_commit(&self) -> bool {
        self.commit.is_some()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.unwrap_or(true)
    }

    /// First 7 characters of the commit hash, for compact logging.
    pub fn short_commit(&self) -> Option<&str> {
        self.commit.as_ref().map(|c| if c.len() > 7 { &c[..7] } else { c.as_str() })
    }
}

/// Create a bare repository at `repo_dir`, which must not already exist.
/// The target of `git push piku@host:<app>`.
pub fn init_bare(repo_dir: &Path) -> Result<()> {
    if repo_dir.exists() {
        bail!("repository already exists: {}", repo_dir.display());
    }
    fs::create_dir_all(repo_dir)
        .with_context(|| format!("creating repo dir {}", repo_dir.display()))?;

    let output = Command::new("git")
        .args(["init", "--bare", "-q"])
        .current_dir(repo_dir)
        .output()
        .context("failed to run git init --bare")?;

    if !output.status.success() {
        bail!("git init --bare failed: {}", String::from_utf8_lossy(&output.stderr));
    }
    Ok(())
}

/// Write the `post-receive` hook that forwards every push into piku's
/// receive path, and mark it executable.
pub fn write_post_receive_hook(repo_dir: &Path, hook_script: &str) -> Result<()> {
    let hooks_dir = repo_dir.join("hooks");
    fs::create_dir_all(&hooks_dir)
        .with_context(|| format!("creating hooks dir {}", hooks_dir.display()))?;

    let hook_path = hooks_dir.join("post-receive");
    let mut file =
        fs::File::create(&hook_path).with_context(|| format!("creating {}", hook_path.display()))?;
    file.write_all(hook_script.as_bytes())
        .with_context(|| format!("writing {}", hook_path.display()))?;
    file.sync_all().ok();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&hook_path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&hook_path, perms)?;
    }

    Ok(())
}

/// Export the tree at `reference` (default branch tip, typically the ref
/// the pushed commits updated) from the bare repo at `repo_dir` into
/// `dest`, overwriting its contents. Equivalent to `git archive <ref> |
/// tar -x -C dest`, the same mechanism piku uses to materialize a deploy
/// without leaving a `.git` directory in the app's working tree.
pub fn export_tree(repo_dir: &Path, reference: &str, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).with_context(|| format!("creating dest dir {}", dest.display()))?;

    let mut archive = Command::new("git")
        .args(["archive", reference])
        .current_dir(repo_dir)
        .stdout(Stdio::piped())
        .spawn()
        .context("failed to spawn git archive")?;

    let archive_stdout = archive.stdout.take().context("git archive produced no stdout pipe")?;

    let tar_status = Command::new("tar")
        .args(["-x", "-C"])
        .arg(dest)
        .stdin(archive_stdout)
        .status()
        .context("failed to run tar -x")?;

    let archive_status = archive.wait().context("failed to wait on git archive")?;

    if !archive_status.success() {
        bail!("git archive {reference} failed with status {archive_status}");
    }
    if !tar_status.success() {
        bail!("tar -x into {} failed with status {tar_status}", dest.display());
    }
    Ok(())
}

/// Resolve the name of the branch a push updated, given the `post-receive`
/// hook's `<oldrev> <newrev> <refname>` line. Returns `None` for tag
/// pushes or anything that is not an `refs/heads/*` update.
pub fn branch_from_ref_update(refname: &str) -> Option<&str> {
    refname.strip_prefix("refs/heads/")
}

/// Resolve the commit hash a ref currently points at inside a bare repo.
pub fn resolve_ref(repo_dir: &Path, reference: &str) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", reference])
        .current_dir(repo_dir)
        .output()
        .context("failed to run git rev-parse")?;
    if !output.status.success() {
        bail!("git rev-parse {reference} failed: {}", String::from_utf8_lossy(&output.stderr));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Check if the git working tree at `path` is clean (no uncommitted changes).
pub fn is_git_clean(path: &Path) -> Result<bool> {
    let output = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(path)
        .output()
        .context("failed to run git status")?;

    if !output.status.success() {
        bail!("git status failed: {}", String::from_utf8_lossy(&output.stderr));
    }

    Ok(output.stdout.is_empty())
}

/// Check if `path` is inside a git working tree.
pub fn is_git_repo(path: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(path)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Get the current commit hash at `path`.
pub fn get_commit_hash(path: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(path)
        .output()
        .context("failed to run git rev-parse")?;

    if !output.status.success() {
        bail!("git rev-parse failed: {}", String::from_utf8_lossy(&output.stderr));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Get the current branch name at `path`, or `None` in detached HEAD.
pub fn get_branch(path: &Path) -> Result<Option<String>> {
    let output = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(path)
        .output()
        .context("failed to run git rev-parse")?;

    if !output.status.success() {
        return Ok(None);
    }

    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if branch == "HEAD" {
        return Ok(None);
    }
    Ok(Some(branch))
}

/// Get the current tag at `path` if HEAD is exactly on one.
pub fn get_tag(path: &Path) -> Result<Option<String>> {
    let output = Command::new("git")
        .args(["describe", "--exact-match", "--tags"])
        .current_dir(path)
        .output()
        .context("failed to run git describe")?;

    if !output.status.success() {
        return Ok(None);
    }

    Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
}

/// Gather complete git context (commit, branch, tag, dirty) for `path`.
pub fn get_git_context(path: &Path) -> GitContext {
    let commit = get_commit_hash(path).ok();
    let branch = get_branch(path).ok().flatten();
    let tag = get_tag(path).ok().flatten();
    let dirty = is_git_clean(path).ok().map(|c| !c);

    GitContext { commit, branch, tag, dirty }
}

/// Update submodules in-place after an `export_tree` if a `.gitmodules` tree
/// entry was archived alongside the source — `git archive` does not carry
/// submodule contents, so these are initialized from the bare repo's
/// registered submodule URLs when present.
pub fn update_submodules(worktree: &Path) -> Result<()> {
    if !worktree.join(".gitmodules").is_file() {
        return Ok(());
    }

    let output = Command::new("git")
        .args(["submodule", "update", "--init", "--recursive"])
        .current_dir(worktree)
        .output()
        .context("failed to run git submodule update")?;

    if !output.status.success() {
        bail!(
            "git submodule update failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::tempdir;

    fn init_git_repo(dir: &Path) {
        StdCommand::new("git").args(["init", "-q"]).current_dir(dir).output().expect("git init");
        StdCommand::new("git")
            .args(["config", "user.email", "test@example.com"])
            .current_dir(dir)
            .output()
            .expect("git config email");
        StdCommand::new("git")
            .args(["config", "user.name", "Test User"])
            .current_dir(dir)
            .output()
            .expect("git config name");
    }

    fn make_commit(dir: &Path, msg: &str) {
        StdCommand::new("git")
            .args(["commit", "--allow-empty", "-m", msg])
            .current_dir(dir)
            .output()
            .expect("git commit");
    }

    #[test]
    fn init_bare_creates_git_dir_marker() {
        let td = tempdir().expect("tempdir");
        let repo_dir = td.path().join("myapp.git");
        init_bare(&repo_dir).expect("init_bare");
        assert!(repo_dir.join("HEAD").is_file());
    }

    #[test]
    fn init_bare_rejects_existing_dir() {
        let td = tempdir().expect("tempdir");
        let repo_dir = td.path().join("myapp.git");
        init_bare(&repo_dir).expect("first init");
        assert!(init_bare(&repo_dir).is_err());
    }

    #[test]
    fn write_post_receive_hook_is_executable() {
        let td = tempdir().expect("tempdir");
        let repo_dir = td.path().join("myapp.git");
        init_bare(&repo_dir).expect("init_bare");
        write_post_receive_hook(&repo_dir, "#!/bin/sh\necho hi\n").expect("write hook");

        let hook_path = repo_dir.join("hooks").join("post-receive");
        assert!(hook_path.is_file());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&hook_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn branch_from_ref_update_extracts_heads_only() {
        assert_eq!(branch_from_ref_update("refs/heads/master"), Some("master"));
        assert_eq!(branch_from_ref_update("refs/tags/v1.0.0"), None);
    }

    #[test]
    fn export_tree_materializes_committed_files() {
        let td = tempdir().expect("tempdir");
        let src = td.path().join("src");
        fs::create_dir_all(&src).unwrap();
        init_git_repo(&src);
        fs::write(src.join("Procfile"), "web: echo hi\n").unwrap();
        StdCommand::new("git").args(["add", "."]).current_dir(&src).output().unwrap();
        make_commit(&src, "initial");

        let dest = td.path().join("deployed");
        export_tree(&src, "HEAD", &dest).expect("export_tree");

        assert!(dest.join("Procfile").is_file());
        assert!(!dest.join(".git").exists());
    }

    #[test]
    fn get_git_context_populates_fields() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "test");

        let context = get_git_context(td.path());
        assert!(context.has_commit());
        assert!(!context.is_dirty());
        assert!(context.short_commit().is_some());
    }

    #[test]
    fn short_commit_truncates_to_seven() {
        let mut context = GitContext::new();
        context.commit = Some("0123456789abcdef0123456789abcdef01234567".to_string());
        assert_eq!(context.short_commit(), Some("0123456"));
    }

    #[test]
    fn update_submodules_is_noop_without_gitmodules() {
        let td = tempdir().expect("tempdir");
        update_submodules(td.path()).expect("noop");
    }
}
