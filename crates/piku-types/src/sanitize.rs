//! App name sanitization and existence checks.

use std::path::Path;

use anyhow::{Result, bail};

/// Keep only `[A-Za-z0-9._-]`, strip a leading `/`, and trim surrounding
/// whitespace. Idempotent: `sanitize(sanitize(s)) == sanitize(s)`.
pub fn sanitize(name: &str) -> String {
    let trimmed = name.trim();
    let without_leading_slash = trimmed.strip_prefix('/').unwrap_or(trimmed);
    without_leading_slash
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect()
}

/// Sanitize `name` and require `apps/<name>` to exist under `root`.
pub fn require_app(root: &Path, name: &str) -> Result<String> {
    let app = sanitize(name);
    if app.is_empty() {
        bail!("app-not-found: empty app name");
    }
    if !root.join("apps").join(&app).is_dir() {
        bail!("app-not-found: {app}");
    }
    Ok(app)
}
