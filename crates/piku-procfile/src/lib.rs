//! Procfile parsing and cron-line validation.
//!
//! A Procfile is a line-oriented `kind: command` manifest. Two entries
//! sharing the same raw kind key are rejected at parse time; unrecognized
//! or malformed lines are skipped and reported as warnings rather than
//! failing the whole file.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use piku_types::WorkerKind;
use regex::Regex;

/// Per-field ceilings for the five cron schedule fields, in order:
/// minute, hour, day-of-month, month, day-of-week.
pub const CRON_CEILINGS: [u32; 5] = [59, 24, 31, 12, 7];

/// One parsed Procfile entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub kind: WorkerKind,
    pub command: String,
}

/// A fully parsed and precedence-resolved Procfile.
#[derive(Debug, Clone, Default)]
pub struct Procfile {
    entries: Vec<(String, Entry)>,
}

impl Procfile {
    /// Parse Procfile text. Blank lines and `#` comments are skipped.
    /// Duplicate raw kind keys are a hard error. Malformed lines (no
    /// `:`) are skipped with a warning. Applies the `wsgi`-over-`web`
    /// precedence rule before returning.
    pub fn parse(content: &str) -> Result<(Self, Vec<String>)> {
        let mut entries: Vec<(String, Entry)> = Vec::new();
        let mut warnings = Vec::new();
        let mut seen = BTreeMap::new();

        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((raw_kind, command)) = line.split_once(':') else {
                warnings.push(format!("Procfile line {}: missing ':': {line}", idx + 1));
                continue;
            };

            let raw_kind = raw_kind.trim().to_string();
            if raw_kind.is_empty() {
                warnings.push(format!("Procfile line {}: empty kind", idx + 1));
                continue;
            }

            if let Some(prev_line) = seen.insert(raw_kind.clone(), idx + 1) {
                bail!("Procfile line {}: duplicate kind {raw_kind:?} (first seen on line {prev_line})", idx + 1);
            }

            let kind = WorkerKind::from_key(&raw_kind);
            if kind.is_cron() {
                validate_cron_command(command.trim())
                    .map_err(|e| anyhow::anyhow!("Procfile line {}: {e}", idx + 1))?;
            }

            entries.push((raw_kind, Entry { kind, command: command.trim().to_string() }));
        }

        let mut procfile = Self { entries };
        if let Some(warning) = procfile.apply_wsgi_precedence() {
            warnings.push(warning);
        }

        Ok((procfile, warnings))
    }

    /// If any WSGI-style kind (`wsgi`, `jwsgi`, `rwsgi`) is present, drop
    /// any `web` entry and return a warning describing the drop.
    fn apply_wsgi_precedence(&mut self) -> Option<String> {
        let has_wsgi_style = self
            .entries
            .iter()
            .any(|(_, e)| matches!(e.kind, WorkerKind::Wsgi | WorkerKind::Jwsgi | WorkerKind::Rwsgi));

        if !has_wsgi_style {
            return None;
        }

        let had_web = self.entries.iter().any(|(_, e)| e.kind == WorkerKind::Web);
        if !had_web {
            return None;
        }

        self.entries.retain(|(_, e)| e.kind != WorkerKind::Web);
        Some("Procfile: dropped 'web' entry because a wsgi/jwsgi/rwsgi entry is present".to_string())
    }

    pub fn get(&self, raw_kind: &str) -> Option<&Entry> {
        self.entries.iter().find(|(k, _)| k == raw_kind).map(|(_, e)| e)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), e))
    }

    /// Raw kind keys present, in file order — the set `ps:scale` and the
    /// reconciler validate against.
    pub fn kinds(&self) -> Vec<String> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn cron_line_regex() -> Regex {
    Regex::new(r"^(\S+)\s+(\S+)\s+(\S+)\s+(\S+)\s+(\S+)\s+(.+)$").expect("static cron regex is valid")
}

/// Validate a cron command's five schedule fields against their ceilings.
/// `command` is everything after the `cron…:` kind prefix, e.g.
/// `*/5 * * * * echo hi`.
pub fn validate_cron_command(command: &str) -> Result<()> {
    split_cron_fields(command)?;
    Ok(())
}

/// Split a cron command into its five schedule fields and trailing
/// command text, validating each field against [`CRON_CEILINGS`].
pub fn split_cron_fields(command: &str) -> Result<([String; 5], String)> {
    let re = cron_line_regex();
    let Some(caps) = re.captures(command) else {
        bail!("malformed cron line (need 5 schedule fields + command): {command:?}");
    };

    let mut fields: [String; 5] = Default::default();
    for (i, ceiling) in CRON_CEILINGS.iter().enumerate() {
        let field = caps.get(i + 1).unwrap().as_str();
        validate_cron_field(field, *ceiling)?;
        fields[i] = field.to_string();
    }

    let tail = caps.get(6).unwrap().as_str().to_string();
    Ok((fields, tail))
}

fn validate_cron_field(field: &str, ceiling: u32) -> Result<()> {
    if field == "*" {
        return Ok(());
    }

    let numeric_part = field.strip_prefix("*/").unwrap_or(field);
    let is_step = field.starts_with("*/");

    let value: u32 = numeric_part
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid cron field {field:?} (expected digits, '*' or '*/N')"))?;

    if is_step {
        if value == 0 || value > ceiling {
            bail!("cron step {field:?} exceeds ceiling {ceiling}");
        }
    } else if value > ceiling {
        bail!("cron field {field:?} exceeds ceiling {ceiling}");
    }

    Ok(())
}

/// Translate a cron schedule's five fields into uWSGI cron syntax:
/// `*/N` → `-N`, bare `*` → `-1`. Applied ONLY to the five schedule
/// fields, never to the command remainder, since commands may embed
/// literal `*` shell globs.
pub fn translate_cron_fields(fields: &[String; 5]) -> [String; 5] {
    fields.clone().map(|field| {
        if field == "*" {
            "-1".to_string()
        } else if let Some(n) = field.strip_prefix("*/") {
            format!("-{n}")
        } else {
            field
        }
    })
}

/// Render the uWSGI `cron=` directive value: translated schedule fields
/// followed by the untouched command.
pub fn render_uwsgi_cron(command: &str) -> Result<String> {
    let (fields, tail) = split_cron_fields(command)?;
    let translated = translate_cron_fields(&fields);
    Ok(format!("{} {tail}", translated.join(" ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_kinds() {
        let (procfile, warnings) = Procfile::parse("web: ./run\nworker: mailer.py\n").expect("parse");
        assert!(warnings.is_empty());
        assert_eq!(procfile.get("web").unwrap().kind, WorkerKind::Web);
        assert_eq!(procfile.get("worker").unwrap().command, "mailer.py");
    }

    #[test]
    fn skips_comments_and_blanks() {
        let (procfile, warnings) = Procfile::parse("# comment\n\nweb: ./run\n").expect("parse");
        assert!(warnings.is_empty());
        assert_eq!(procfile.kinds(), vec!["web"]);
    }

    #[test]
    fn malformed_line_is_skipped_with_warning() {
        let (procfile, warnings) = Procfile::parse("web: ./run\nnotaline\n").expect("parse");
        assert_eq!(procfile.kinds(), vec!["web"]);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn duplicate_kind_is_a_hard_error() {
        let result = Procfile::parse("web: ./run\nweb: ./run2\n");
        assert!(result.is_err());
    }

    #[test]
    fn wsgi_precedence_drops_web_with_warning() {
        let (procfile, warnings) = Procfile::parse("wsgi: app:app\nweb: ./run\n").expect("parse");
        assert!(procfile.get("web").is_none());
        assert!(procfile.get("wsgi").is_some());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn web_survives_without_wsgi_style_sibling() {
        let (procfile, warnings) = Procfile::parse("web: ./run\n").expect("parse");
        assert!(procfile.get("web").is_some());
        assert!(warnings.is_empty());
    }

    #[test]
    fn cron_with_valid_step_is_accepted() {
        let (procfile, warnings) = Procfile::parse("cron1: */5 * * * * echo hi\n").expect("parse");
        assert!(warnings.is_empty());
        assert!(procfile.get("cron1").unwrap().kind.is_cron());
    }

    #[test]
    fn cron_step_exceeding_minute_ceiling_is_rejected() {
        let result = Procfile::parse("cron1: */60 * * * * echo hi\n");
        assert!(result.is_err());
    }

    #[test]
    fn cron_hour_ceiling_enforced() {
        assert!(validate_cron_command("0 25 * * * echo hi").is_err());
        assert!(validate_cron_command("0 23 * * * echo hi").is_ok());
    }

    #[test]
    fn translate_cron_fields_rewrites_star_and_step() {
        let fields = ["*/5".to_string(), "*".to_string(), "1".to_string(), "*".to_string(), "0".to_string()];
        let translated = translate_cron_fields(&fields);
        assert_eq!(translated, ["-5", "-1", "1", "-1", "0"]);
    }

    #[test]
    fn render_uwsgi_cron_does_not_touch_command_stars() {
        let rendered = render_uwsgi_cron("*/5 * * * * echo *.log").expect("render");
        assert_eq!(rendered, "-5 -1 -1 -1 -1 echo *.log");
    }

    #[test]
    fn kinds_preserves_file_order() {
        let (procfile, _) = Procfile::parse("worker: a\nweb: b\n").expect("parse");
        assert_eq!(procfile.kinds(), vec!["worker", "web"]);
    }
}
