//! Restricted `authorized_keys` management.
//!
//! Every key piku accepts is appended as a forced-command line: whatever
//! the connecting client asked for on the SSH command line is ignored in
//! favor of re-invoking this binary, with agent/X11/port forwarding and
//! pty allocation disabled. The fingerprint embedded in the forced
//! command lets `setup:ssh --remove` find and drop exactly one key later
//! without disturbing the others.

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::Path;

use anyhow::{Context, Result, bail};

/// SSH option flags attached to every restricted key piku writes.
pub const RESTRICTIONS: &str =
    "no-agent-forwarding,no-user-rc,no-X11-forwarding,no-port-forwarding,no-pty";

/// Extract the fingerprint of a public key line via `ssh-keygen -lf -`,
/// which reads the key from stdin rather than a file argument.
pub fn extract_fingerprint(pubkey_line: &str) -> Result<String> {
    let result = piku_process::run_command_with_stdin("ssh-keygen", &["-lf", "-"], pubkey_line)
        .context("running ssh-keygen -lf")?;
    result.ok().context("ssh-keygen rejected the public key")?;

    // Output looks like "<bits> SHA256:<hash> <comment> (<type>)"; the
    // fingerprint is always the second whitespace-separated field.
    result
        .stdout
        .split_whitespace()
        .nth(1)
        .map(str::to_string)
        .context("ssh-keygen produced no fingerprint")
}

/// Build the full `command="..." <options> <pubkey>` authorized_keys
/// line for one key, binding it to `fingerprint` and an operator-chosen
/// `name` so multiple keys (e.g. per-deploy-laptop) can coexist and be
/// individually removed.
pub fn authorized_keys_line(script_path: &Path, fingerprint: &str, name: &str, pubkey_line: &str) -> String {
    format!(
        "command=\"FINGERPRINT={fingerprint} NAME={name} {} $SSH_ORIGINAL_COMMAND\",{RESTRICTIONS} {}",
        script_path.display(),
        pubkey_line.trim()
    )
}

/// Append a restricted key to `~/.ssh/authorized_keys`, creating the
/// directory and file if needed and chmod'ing both (`0700`/`0600`).
/// Returns the fingerprint bound to the new line.
pub fn append_authorized_key(home: &Path, script_path: &Path, pubkey_line: &str, name: &str) -> Result<String> {
    let fingerprint = extract_fingerprint(pubkey_line)?;
    let ssh_dir = home.join(".ssh");
    fs::create_dir_all(&ssh_dir).with_context(|| format!("creating {}", ssh_dir.display()))?;

    let keys_path = ssh_dir.join("authorized_keys");
    let line = authorized_keys_line(script_path, &fingerprint, name, pubkey_line);

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&keys_path)
        .with_context(|| format!("opening {}", keys_path.display()))?;
    writeln!(file, "{line}").with_context(|| format!("writing {}", keys_path.display()))?;
    drop(file);

    set_permissions(&ssh_dir, &keys_path)?;
    Ok(fingerprint)
}

/// Remove every authorized_keys line bound to `fingerprint`. Returns
/// whether anything was removed.
pub fn remove_authorized_key(home: &Path, fingerprint: &str) -> Result<bool> {
    let keys_path = home.join(".ssh").join("authorized_keys");
    if !keys_path.is_file() {
        return Ok(false);
    }

    let content =
        fs::read_to_string(&keys_path).with_context(|| format!("reading {}", keys_path.display()))?;
    let needle = format!("FINGERPRINT={fingerprint} ");
    let mut removed = false;

    let kept: Vec<&str> = content
        .lines()
        .filter(|line| {
            let matches = line.contains(&needle);
            removed |= matches;
            !matches
        })
        .collect();

    if removed {
        let mut body = kept.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        fs::write(&keys_path, body).with_context(|| format!("writing {}", keys_path.display()))?;
    }

    Ok(removed)
}

fn set_permissions(ssh_dir: &Path, keys_path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut dir_perms = fs::metadata(ssh_dir)?.permissions();
        dir_perms.set_mode(0o700);
        fs::set_permissions(ssh_dir, dir_perms)?;

        let mut file_perms = fs::metadata(keys_path)?.permissions();
        file_perms.set_mode(0o600);
        fs::set_permissions(keys_path, file_perms)?;
    }
    #[cfg(not(unix))]
    {
        let _ = (ssh_dir, keys_path);
    }
    Ok(())
}

/// Parse the `FINGERPRINT=<fp>` token out of one authorized_keys line, for
/// callers that already have a line and want to identify it (e.g. `apps`
/// listing keys by name).
pub fn fingerprint_of_line(line: &str) -> Option<&str> {
    line.split("FINGERPRINT=").nth(1)?.split_whitespace().next()
}

/// Validate a raw public key line has the two or three fields
/// (`type base64 [comment]`) `ssh-keygen` expects; a malformed line would
/// otherwise fail with an opaque `ssh-keygen` error.
pub fn validate_pubkey_line(pubkey_line: &str) -> Result<()> {
    let fields: Vec<&str> = pubkey_line.split_whitespace().collect();
    if fields.len() < 2 {
        bail!("malformed public key line (expected \"<type> <base64> [comment]\")");
    }
    Ok(())
}
