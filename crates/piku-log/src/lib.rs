//! Multi-file log tailing.
//!
//! Opens every tracked log file at its current end, replays the last `N`
//! lines for initial context, then polls in a loop the caller drives: each
//! pass reads newly appended bytes, detects rotation by comparing inode
//! numbers, and drops files that have been deleted. Lines are returned
//! prefixed by each file's basename (sans extension), left-padded to the
//! longest prefix currently tracked.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use piku_types::Paths;

/// Default number of lines replayed per file before following begins.
pub const DEFAULT_REPLAY_LINES: usize = 20;

/// One interleaved, prefix-tagged output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub prefix: String,
    pub text: String,
}

struct TailedFile {
    path: PathBuf,
    prefix: String,
    file: File,
    ino: u64,
    /// Bytes read since the last newline, carried over until completed.
    leftover: String,
}

impl TailedFile {
    fn open_at_end(path: &Path) -> Result<Self> {
        let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        file.seek(SeekFrom::End(0)).with_context(|| format!("seeking {}", path.display()))?;
        let ino = file.metadata().with_context(|| format!("statting {}", path.display()))?.ino();
        let prefix = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        Ok(Self { path: path.to_path_buf(), prefix, file, ino, leftover: String::new() })
    }

    fn reopen(&mut self, ino: u64) -> Result<()> {
        self.file = File::open(&self.path).with_context(|| format!("reopening {}", self.path.display()))?;
        self.ino = ino;
        self.leftover.clear();
        Ok(())
    }

    /// Read whatever has been appended since the last call, returning
    /// complete lines. A trailing fragment with no newline yet is held in
    /// `leftover` until it is completed by a later read.
    fn read_new(&mut self) -> Result<Vec<String>> {
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf).with_context(|| format!("reading {}", self.path.display()))?;
        if buf.is_empty() {
            return Ok(Vec::new());
        }

        let text = format!("{}{}", self.leftover, String::from_utf8_lossy(&buf));
        let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
        self.leftover = lines.pop().unwrap_or_default();
        Ok(lines)
    }
}

/// Tracks a set of log files and interleaves their output.
pub struct Tailer {
    files: Vec<TailedFile>,
}

impl Tailer {
    /// Open every path at its current end of file.
    pub fn new(paths: &[PathBuf]) -> Result<Self> {
        let files = paths.iter().map(|p| TailedFile::open_at_end(p)).collect::<Result<Vec<_>>>()?;
        Ok(Self { files })
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn prefix_width(&self) -> usize {
        self.files.iter().map(|f| f.prefix.len()).max().unwrap_or(0)
    }

    /// Replay the last `n` lines of every tracked file. Call once before
    /// entering the [`poll`](Self::poll) loop.
    pub fn replay(&self, n: usize) -> Vec<LogLine> {
        let width = self.prefix_width();
        let mut out = Vec::new();
        for f in &self.files {
            let Ok(content) = fs::read_to_string(&f.path) else { continue };
            let lines: Vec<&str> = content.lines().collect();
            let start = lines.len().saturating_sub(n);
            for line in &lines[start..] {
                out.push(LogLine { prefix: format!("{:<width$}", f.prefix, width = width), text: (*line).to_string() });
            }
        }
        out
    }

    /// One non-blocking pass over every tracked file: detect rotation,
    /// drop deleted files, and return any newly appended lines. The
    /// caller sleeps (1 second) between passes when this returns empty.
    pub fn poll(&mut self) -> Result<Vec<LogLine>> {
        let width = self.prefix_width();
        let mut out = Vec::new();
        let mut i = 0;

        while i < self.files.len() {
            if !self.files[i].path.exists() {
                self.files.remove(i);
                continue;
            }

            let meta = fs::metadata(&self.files[i].path)
                .with_context(|| format!("statting {}", self.files[i].path.display()))?;
            let current_ino = meta.ino();
            if current_ino != self.files[i].ino {
                self.files[i].reopen(current_ino)?;
            }

            let prefix = format!("{:<width$}", self.files[i].prefix, width = width);
            for line in self.files[i].read_new()? {
                out.push(LogLine { prefix: prefix.clone(), text: line });
            }
            i += 1;
        }

        Ok(out)
    }
}

/// Enumerate `logs/<app>/*.log`, optionally restricted to a single kind
/// prefix (e.g. `logs demo wsgi` watches only `wsgi.*.log`).
pub fn discover_log_files(paths: &Paths, app: &str, kind: Option<&str>) -> Result<Vec<PathBuf>> {
    let dir = paths.logs_dir(app);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in fs::read_dir(&dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        if !name.ends_with(".log") {
            continue;
        }
        if let Some(kind) = kind {
            if !name.starts_with(&format!("{kind}.")) {
                continue;
            }
        }
        found.push(path);
    }
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::tempdir;

    fn append(path: &Path, text: &str) {
        let mut f = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn replay_returns_last_n_lines() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("web.1.log");
        fs::write(&path, "one\ntwo\nthree\nfour\n").unwrap();

        let tailer = Tailer::new(&[path]).expect("new");
        let lines = tailer.replay(2);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "three");
        assert_eq!(lines[1].text, "four");
        assert_eq!(lines[0].prefix, "web.1");
    }

    #[test]
    fn poll_picks_up_newly_appended_lines() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("web.1.log");
        fs::write(&path, "existing\n").unwrap();

        let mut tailer = Tailer::new(&[path.clone()]).expect("new");
        assert!(tailer.poll().expect("poll").is_empty());

        append(&path, "fresh line\n");
        let lines = tailer.poll().expect("poll");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "fresh line");
    }

    #[test]
    fn poll_holds_partial_line_until_newline_arrives() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("web.1.log");
        fs::write(&path, "").unwrap();

        let mut tailer = Tailer::new(&[path.clone()]).expect("new");
        append(&path, "partial");
        assert!(tailer.poll().expect("poll").is_empty());

        append(&path, " line\n");
        let lines = tailer.poll().expect("poll");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "partial line");
    }

    #[test]
    fn poll_reopens_on_rotation() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("web.1.log");
        fs::write(&path, "before rotation\n").unwrap();

        let mut tailer = Tailer::new(&[path.clone()]).expect("new");

        let rotated_aside = td.path().join("web.1.log.1");
        fs::rename(&path, &rotated_aside).unwrap();
        fs::write(&path, "after rotation\n").unwrap();

        let lines = tailer.poll().expect("poll");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "after rotation");
    }

    #[test]
    fn poll_drops_deleted_files() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("web.1.log");
        fs::write(&path, "line\n").unwrap();

        let mut tailer = Tailer::new(&[path.clone()]).expect("new");
        fs::remove_file(&path).unwrap();
        tailer.poll().expect("poll");
        assert!(tailer.is_empty());
    }

    #[test]
    fn prefixes_are_padded_to_longest() {
        let td = tempdir().expect("tempdir");
        let short = td.path().join("web.1.log");
        let long = td.path().join("cron.nightly.1.log");
        fs::write(&short, "a\n").unwrap();
        fs::write(&long, "b\n").unwrap();

        let tailer = Tailer::new(&[short, long]).expect("new");
        let lines = tailer.replay(10);
        let widths: Vec<usize> = lines.iter().map(|l| l.prefix.len()).collect();
        assert_eq!(widths[0], widths[1]);
    }

    #[test]
    fn discover_log_files_filters_by_kind() {
        let td = tempdir().expect("tempdir");
        let paths = Paths::new(td.path().to_path_buf());
        let logs_dir = paths.logs_dir("demo");
        fs::create_dir_all(&logs_dir).unwrap();
        fs::write(logs_dir.join("web.1.log"), "").unwrap();
        fs::write(logs_dir.join("wsgi.1.log"), "").unwrap();

        let all = discover_log_files(&paths, "demo", None).expect("discover");
        assert_eq!(all.len(), 2);

        let web_only = discover_log_files(&paths, "demo", Some("web")).expect("discover");
        assert_eq!(web_only.len(), 1);
    }
}
