//! Per-run log: an append-only in-memory buffer that becomes an immutable
//! file once flushed. The on-disk filename is the durability marker — a
//! file without its terminal-status suffix never finished.

use crate::error::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Exec,
    Http,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Exec => "exec",
            JobKind::Http => "http",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Started,
    Running,
    Success,
    Failed,
    Paused,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Started => "started",
            Status::Running => "running",
            Status::Success => "success",
            Status::Failed => "failed",
            Status::Paused => "paused",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Success | Status::Failed | Status::Paused)
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "started" => Some(Status::Started),
            "running" => Some(Status::Running),
            "success" => Some(Status::Success),
            "failed" => Some(Status::Failed),
            "paused" => Some(Status::Paused),
            _ => None,
        }
    }
}

/// One execution's log. `name` is `"<jobId>.<counter>"`; the file on disk is
/// named `"<jobId>.<counter>.<status>"` once flushed.
pub struct JobLog {
    pub kind: JobKind,
    pub job_id: String,
    pub counter: i64,
    pub name: String,
    dir: PathBuf,
    pub status: Status,
    buf: Vec<u8>,
    pub notify: Vec<String>,
}

pub fn format_name(job_id: &str, counter: i64) -> String {
    format!("{job_id}.{counter}")
}

pub fn format_file_name(job_id: &str, counter: i64, status: Status) -> String {
    format!("{job_id}.{counter}.{}", status.as_str())
}

/// Inverse of `format_file_name`: splits a filename into its three
/// dot-separated fields. Any file that doesn't parse is not a valid log.
pub fn parse_file_name(file_name: &str) -> Option<(String, i64, Status)> {
    let fields: Vec<&str> = file_name.splitn(3, '.').collect();
    if fields.len() != 3 {
        return None;
    }
    let counter: i64 = fields[1].parse().ok()?;
    let status = Status::parse(fields[2])?;
    Some((fields[0].to_string(), counter, status))
}

impl JobLog {
    pub fn new(kind: JobKind, job_id: &str, dir: &Path, counter: i64, notify: Vec<String>) -> Self {
        Self {
            kind,
            job_id: job_id.to_string(),
            counter,
            name: format_name(job_id, counter),
            dir: dir.to_path_buf(),
            status: Status::Running,
            buf: Vec::new(),
            notify,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(format_file_name(&self.job_id, self.counter, self.status))
    }

    fn unflushed_path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    /// Appends `bytes`; if this is the start of a new line, prepends a
    /// `"<utc-timestamp> <kind>: <jobId>: "` prefix to the chunk.
    pub fn write(&mut self, bytes: &[u8]) {
        let at_line_start = self.buf.is_empty() || self.buf.last() == Some(&b'\n');
        if at_line_start {
            let prefix = format!(
                "{} {}: {}: ",
                Utc::now().format("%Y-%m-%d %H:%M:%S"),
                self.kind.as_str(),
                self.job_id
            );
            self.buf.extend_from_slice(prefix.as_bytes());
        }
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_line(&mut self, line: &str) {
        let mut s = line.to_string();
        if !s.ends_with('\n') {
            s.push('\n');
        }
        self.write(s.as_bytes());
    }

    /// Renames to the terminal-status filename and persists the buffer with
    /// mode 0600 in one step.
    pub fn flush(&mut self) -> Result<()> {
        let target = self.path();
        let unflushed = self.unflushed_path();
        if unflushed.exists() && unflushed != target {
            let _ = fs::remove_file(&unflushed);
        }
        write_file_mode_0600(&target, &self.buf)?;
        Ok(())
    }

    /// Lazily loads the file content into the buffer if it is still empty.
    pub fn load(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            self.buf = fs::read(self.path())?;
        }
        Ok(())
    }

    pub fn contents(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(unix)]
fn write_file_mode_0600(path: &Path, contents: &[u8]) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_file_mode_0600(path: &Path, contents: &[u8]) -> Result<()> {
    fs::write(path, contents)?;
    Ok(())
}

/// A reconstructed log entry, as produced by startup replay.
#[derive(Debug, Clone)]
pub struct ReplayedLog {
    pub job_id: String,
    pub counter: i64,
    pub status: Status,
    pub mtime: DateTime<Utc>,
    pub path: PathBuf,
}

/// Replays a job's log directory: validates each filename, deletes
/// malformed entries, and returns the rest sorted by counter ascending.
pub fn replay(dir: &Path) -> Result<Vec<ReplayedLog>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();

        match parse_file_name(&file_name) {
            Some((job_id, counter, status)) => {
                let metadata = entry.metadata()?;
                let mtime = metadata
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                let mtime = Utc.timestamp_opt(mtime.timestamp(), 0).single().unwrap_or(mtime);
                entries.push(ReplayedLog { job_id, counter, status, mtime, path: entry.path() });
            }
            None => {
                let _ = fs::remove_file(entry.path());
            }
        }
    }

    entries.sort_by_key(|e| e.counter);
    Ok(entries)
}

/// Deletes the oldest files so at most `retention` remain. `logs` must
/// already be sorted ascending by counter.
pub fn prune(logs: &mut Vec<ReplayedLog>, retention: usize) -> Result<()> {
    if logs.len() <= retention {
        return Ok(());
    }
    let remove_count = logs.len() - retention;
    for entry in logs.drain(0..remove_count) {
        let _ = fs::remove_file(&entry.path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trip_name_formatting() {
        let name = format_file_name("my-job", 42, Status::Success);
        assert_eq!(parse_file_name(&name), Some(("my-job".to_string(), 42, Status::Success)));
    }

    #[test]
    fn malformed_names_do_not_parse() {
        assert_eq!(parse_file_name("only-two.fields"), None);
        assert_eq!(parse_file_name("job.not-a-number.success"), None);
        assert_eq!(parse_file_name("job.3.bogus-status"), None);
    }

    #[test]
    fn write_prepends_prefix_only_at_line_start() {
        let dir = tempdir().unwrap();
        let mut log = JobLog::new(JobKind::Exec, "job", dir.path(), 1, vec![]);
        log.write(b"hello ");
        log.write(b"world\n");
        log.write(b"second line");
        let text = String::from_utf8(log.contents().to_vec()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().next().unwrap().ends_with("hello world"));
        assert!(text.lines().nth(1).unwrap().ends_with("second line"));
    }

    #[test]
    fn flush_renames_to_terminal_status_file() {
        let dir = tempdir().unwrap();
        let mut log = JobLog::new(JobKind::Exec, "job", dir.path(), 1, vec![]);
        log.write_line("ok");
        log.set_status(Status::Success);
        log.flush().unwrap();
        assert!(dir.path().join("job.1.success").exists());
        assert!(!dir.path().join("job.1").exists());
    }

    #[test]
    fn replay_deletes_malformed_and_sorts_valid() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("job.2.success"), b"a").unwrap();
        fs::write(dir.path().join("job.1.failed"), b"b").unwrap();
        fs::write(dir.path().join("garbage"), b"c").unwrap();

        let replayed = replay(dir.path()).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].counter, 1);
        assert_eq!(replayed[1].counter, 2);
        assert!(!dir.path().join("garbage").exists());
    }

    #[test]
    fn prune_keeps_only_newest_n() {
        let dir = tempdir().unwrap();
        let mut logs = Vec::new();
        for counter in 1..=7 {
            let name = format_file_name("job", counter, Status::Success);
            fs::write(dir.path().join(&name), b"x").unwrap();
            logs.push(ReplayedLog {
                job_id: "job".to_string(),
                counter,
                status: Status::Success,
                mtime: Utc::now(),
                path: dir.path().join(&name),
            });
        }
        prune(&mut logs, 5).unwrap();
        assert_eq!(logs.len(), 5);
        assert_eq!(logs.iter().map(|l| l.counter).collect::<Vec<_>>(), vec![3, 4, 5, 6, 7]);
        let remaining: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(remaining.len(), 5);
    }
}
