//! `update`: fetch the latest release of the piku script over HTTPS and
//! overwrite the running binary in place, but only when the server
//! actually returns `200 OK` — any other status leaves the current
//! install untouched.

use std::path::Path;

use anyhow::{Context, Result};

use crate::Reporter;

/// Canonical location `update` fetches from when the operator doesn't
/// override it.
pub const DEFAULT_UPDATE_URL: &str = "https://raw.githubusercontent.com/piku-rs/piku/master/piku";

/// Download `url` and, iff it answers `200`, replace `script_path` with
/// the response body and restore its executable bit.
pub fn update(script_path: &Path, url: &str, reporter: &mut dyn Reporter) -> Result<()> {
    reporter.info(&format!("checking {url} for updates"));

    let response = reqwest::blocking::get(url).with_context(|| format!("fetching {url}"))?;
    let status = response.status();
    if status.as_u16() != 200 {
        reporter.warn(&format!("update server returned {status}; leaving {} untouched", script_path.display()));
        return Ok(());
    }

    let body = response.bytes().with_context(|| format!("reading response body from {url}"))?;
    piku_config::atomic_write(script_path, &String::from_utf8_lossy(&body))?;
    crate::setup::chmod_executable(script_path)?;

    reporter.info(&format!("updated {}", script_path.display()));
    Ok(())
}
