//! Loads the INI-based deployment configuration: the top-level `[karajo]`
//! section, `[job "<name>"]` / `[job.http "<name>"]` job definitions,
//! `[notif "<name>"]` notification clients, and `[user "<name>"]` accounts.
//! Split files under `<dir>/job.d/*.conf` and `<dir>/job_http.d/*.conf` are
//! merged in on top of the main file.

use crate::error::{Error, Result};
use ini::Ini;
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_JOB_RUNNING: usize = 1;
pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:31937";
pub const DEFAULT_HTTP_TIMEOUT_SECS: i64 = 5;

#[derive(Debug, Clone)]
pub struct User {
    pub name: String,
    /// bcrypt `$2a$` hash, never the plaintext password.
    pub password_hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct NotifConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct ExecJobConfig {
    pub name: String,
    pub description: String,
    pub schedule: Option<String>,
    pub interval_secs: Option<i64>,
    pub path: String,
    pub auth_kind: String,
    pub header_sign: String,
    pub secret: String,
    pub commands: Vec<String>,
    pub log_retention: usize,
    pub notif_on_success: Vec<String>,
    pub notif_on_failed: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct HttpJobConfig {
    pub name: String,
    pub description: String,
    pub schedule: Option<String>,
    pub interval_secs: Option<i64>,
    pub method: String,
    pub url: String,
    pub request_type: String,
    pub secret: String,
    pub header_sign: String,
    pub timeout_secs: i64,
    pub insecure_tls: bool,
    /// Extra headers sent with every request, from repeated `header = Name: Value` lines.
    pub headers: Vec<(String, String)>,
    pub log_retention: usize,
    pub notif_on_success: Vec<String>,
    pub notif_on_failed: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Env {
    pub listen_address: String,
    pub max_job_running: usize,
    /// HMAC secret used to verify `X-Karajo-Sign` on mutating control-plane
    /// calls (pause/resume), and the fallback secret for jobs that don't
    /// configure their own.
    pub secret: String,
    /// Applied to outbound `JobHTTP` requests whose own `timeout` is `0`.
    pub http_default_timeout_secs: i64,
    pub dir_base: PathBuf,
    pub users: Vec<User>,
    pub notifs: Vec<NotifConfig>,
    pub exec_jobs: Vec<ExecJobConfig>,
    pub http_jobs: Vec<HttpJobConfig>,
}

impl Env {
    pub fn load(path: &str) -> Result<Self> {
        let ini = Ini::load_from_file(path)
            .map_err(|e| Error::config(format!("failed to read {path}: {e}")))?;

        let karajo = ini.section(Some("karajo"));
        let listen_address = karajo
            .and_then(|s| s.get("listen_address"))
            .map(substitute_env)
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDRESS.to_string());
        let max_job_running = karajo
            .and_then(|s| s.get("max_job_running"))
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_MAX_JOB_RUNNING);
        let dir_base = karajo
            .and_then(|s| s.get("dir_base"))
            .map(substitute_env)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                Path::new(path)
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."))
            });
        let secret = karajo.and_then(|s| s.get("secret")).map(substitute_env).unwrap_or_default();
        let http_default_timeout_secs = karajo
            .and_then(|s| s.get("http_timeout"))
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);

        let mut env = Self {
            listen_address,
            max_job_running,
            secret,
            http_default_timeout_secs,
            dir_base: dir_base.clone(),
            users: Vec::new(),
            notifs: Vec::new(),
            exec_jobs: Vec::new(),
            http_jobs: Vec::new(),
        };

        env.merge_sections(&ini)?;

        for dir_name in ["job.d", "job_http.d"] {
            let split_dir = dir_base.join(dir_name);
            if !split_dir.is_dir() {
                continue;
            }
            let mut entries: Vec<_> = std::fs::read_dir(&split_dir)
                .map_err(Error::from)?
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().map(|ext| ext == "conf").unwrap_or(false))
                .collect();
            entries.sort_by_key(|e| e.file_name());
            for entry in entries {
                let split_ini = Ini::load_from_file(entry.path())
                    .map_err(|e| Error::config(format!("failed to read {:?}: {e}", entry.path())))?;
                env.merge_sections(&split_ini)?;
            }
        }

        env.validate()?;
        env.materialize_dirs()?;
        Ok(env)
    }

    fn merge_sections(&mut self, ini: &Ini) -> Result<()> {
        for (section, props) in ini.iter() {
            let Some(section) = section else { continue };

            if let Some(name) = strip_named_section(section, "job.http") {
                self.http_jobs.push(parse_http_job(&name, props)?);
            } else if let Some(name) = strip_named_section(section, "job") {
                self.exec_jobs.push(parse_exec_job(&name, props)?);
            } else if let Some(name) = strip_named_section(section, "notif") {
                self.notifs.push(NotifConfig {
                    name,
                    url: props.get("url").map(substitute_env).unwrap_or_default(),
                });
            } else if let Some(name) = strip_named_section(section, "user") {
                let password_hash = props
                    .get("password")
                    .map(substitute_env)
                    .ok_or_else(|| Error::config(format!("user {name} is missing `password`")))?;
                self.users.push(User { name, password_hash });
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for job in &self.exec_jobs {
            if job.commands.is_empty() {
                return Err(Error::config(format!("job \"{}\" has no commands", job.name)));
            }
        }
        for job in &self.http_jobs {
            if job.url.is_empty() {
                return Err(Error::config(format!("job.http \"{}\" has no url", job.name)));
            }
            if !job.url.starts_with('/') && url::Url::parse(&job.url).is_err() {
                return Err(Error::config(format!(
                    "job.http \"{}\" has an invalid url: {}",
                    job.name, job.url
                )));
            }
        }
        Ok(())
    }

    /// Creates the working/log directory tree with mode 0700, matching the
    /// filesystem being the durability boundary for job history.
    fn materialize_dirs(&self) -> Result<()> {
        for dir in [self.dir_work(), self.dir_log()] {
            create_dir_mode_0700(&dir)?;
        }
        Ok(())
    }

    pub fn dir_work(&self) -> PathBuf {
        self.dir_base.join("job")
    }

    pub fn dir_log(&self) -> PathBuf {
        self.dir_base.join("log")
    }

    /// `var/lib/karajo/{job,job_http}/<jobId>` per the persisted state
    /// layout: `kind` is `"exec"` or `"http"`.
    pub fn job_work_dir(&self, kind: &str, job_id: &str) -> PathBuf {
        self.dir_work().join(kind).join(job_id)
    }

    /// `var/log/karajo/{job,job_http}/<jobId>`.
    pub fn job_log_dir(&self, kind: &str, job_id: &str) -> PathBuf {
        self.dir_log().join(kind).join(job_id)
    }

    /// Creates a job's working and log directories (mode 0700) ahead of its
    /// first run.
    pub fn materialize_job_dirs(&self, kind: &str, job_id: &str) -> Result<(PathBuf, PathBuf)> {
        let work = self.job_work_dir(kind, job_id);
        let log = self.job_log_dir(kind, job_id);
        create_dir_mode_0700(&work)?;
        create_dir_mode_0700(&log)?;
        Ok((work, log))
    }
}

fn strip_named_section(section: &str, prefix: &str) -> Option<String> {
    let rest = section.strip_prefix(prefix)?.trim_start();
    let rest = rest.strip_prefix(' ').unwrap_or(rest);
    let name = rest.trim().trim_matches('"');
    if name.is_empty() || rest == section {
        None
    } else {
        Some(name.to_string())
    }
}

fn parse_exec_job(name: &str, props: &ini::Properties) -> Result<ExecJobConfig> {
    // `command` may repeat to describe a chain run in sequence; `ini`
    // keeps every occurrence under `get_all` rather than only the last.
    let commands: Vec<String> = props.get_all("command").map(str::to_string).collect();
    Ok(ExecJobConfig {
        name: name.to_string(),
        description: props.get("description").unwrap_or_default().to_string(),
        schedule: props.get("schedule").map(substitute_env),
        interval_secs: props.get("interval").and_then(|v| v.parse().ok()),
        path: props.get("path").unwrap_or_default().to_string(),
        auth_kind: props.get("auth_kind").unwrap_or_default().to_string(),
        header_sign: props
            .get("header_sign")
            .unwrap_or("X-Karajo-Sign")
            .to_string(),
        secret: props.get("secret").map(substitute_env).unwrap_or_default(),
        commands,
        log_retention: props
            .get("max_log_size")
            .and_then(|v| v.parse().ok())
            .unwrap_or(crate::jobs::job_base::DEFAULT_LOG_RETENTION),
        notif_on_success: split_list(props.get("notif_on_success")),
        notif_on_failed: split_list(props.get("notif_on_failed")),
    })
}

fn parse_http_job(name: &str, props: &ini::Properties) -> Result<HttpJobConfig> {
    // `header` may repeat, one extra request header per line as `Name: Value`.
    let headers: Vec<(String, String)> = props
        .get_all("header")
        .filter_map(|raw| {
            let (k, v) = raw.split_once(':')?;
            Some((k.trim().to_string(), substitute_env(v.trim())))
        })
        .collect();
    Ok(HttpJobConfig {
        name: name.to_string(),
        description: props.get("description").unwrap_or_default().to_string(),
        schedule: props.get("schedule").map(substitute_env),
        interval_secs: props.get("interval").and_then(|v| v.parse().ok()),
        method: props.get("method").unwrap_or("GET").to_string(),
        url: props.get("url").map(substitute_env).unwrap_or_default(),
        request_type: props.get("request_type").unwrap_or_default().to_string(),
        secret: props.get("secret").map(substitute_env).unwrap_or_default(),
        header_sign: props
            .get("header_sign")
            .unwrap_or("X-Karajo-Sign")
            .to_string(),
        timeout_secs: props.get("timeout").and_then(|v| v.parse().ok()).unwrap_or(0),
        insecure_tls: props
            .get("insecure_tls")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false),
        headers,
        log_retention: props
            .get("max_log_size")
            .and_then(|v| v.parse().ok())
            .unwrap_or(crate::jobs::job_base::DEFAULT_LOG_RETENTION),
        notif_on_success: split_list(props.get("notif_on_success")),
        notif_on_failed: split_list(props.get("notif_on_failed")),
    })
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Expands `$VAR` references against the process environment; an unset
/// variable is left as an empty string.
fn substitute_env(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' {
            let mut name = String::new();
            while let Some(&next) = chars.peek() {
                if next.is_ascii_alphanumeric() || next == '_' {
                    name.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                out.push('$');
            } else {
                out.push_str(&std::env::var(&name).unwrap_or_default());
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(unix)]
fn create_dir_mode_0700(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    if dir.exists() {
        return Ok(());
    }
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
        .map_err(Error::from)
}

#[cfg(not(unix))]
fn create_dir_mode_0700(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_config(dir: &Path, contents: &str) -> String {
        let path = dir.join("karajo.conf");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn env_substitution_expands_known_vars() {
        std::env::set_var("KARAJO_TEST_SECRET", "swordfish");
        assert_eq!(substitute_env("prefix-$KARAJO_TEST_SECRET-suffix"), "prefix-swordfish-suffix");
        assert_eq!(substitute_env("$UNSET_KARAJO_VAR"), "");
    }

    #[test]
    fn loads_exec_and_http_jobs_and_materializes_dirs() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[karajo]
listen_address = 127.0.0.1:8080
max_job_running = 2

[job "backup"]
schedule = daily@02:00
command = /usr/bin/backup.sh
secret = s3cret

[job.http "ping"]
interval = 300
url = https://example.com/ping
"#,
        );

        let env = Env::load(&path).unwrap();
        assert_eq!(env.max_job_running, 2);
        assert_eq!(env.exec_jobs.len(), 1);
        assert_eq!(env.exec_jobs[0].name, "backup");
        assert_eq!(env.http_jobs.len(), 1);
        assert!(env.dir_work().exists());
        assert!(env.dir_log().exists());
    }

    #[test]
    fn repeated_command_lines_form_a_chain() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[karajo]
listen_address = 127.0.0.1:8080

[job "migrate"]
command = /usr/bin/migrate-step-1.sh
command = /usr/bin/migrate-step-2.sh
"#,
        );
        let env = Env::load(&path).unwrap();
        assert_eq!(
            env.exec_jobs[0].commands,
            vec!["/usr/bin/migrate-step-1.sh".to_string(), "/usr/bin/migrate-step-2.sh".to_string()]
        );
    }

    #[test]
    fn rejects_exec_job_without_commands() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[karajo]
listen_address = 127.0.0.1:8080

[job "empty"]
schedule = daily
"#,
        );
        assert!(Env::load(&path).is_err());
    }

    #[test]
    fn rejects_http_job_with_unparseable_url() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[karajo]
listen_address = 127.0.0.1:8080

[job.http "bad"]
url = not a url
"#,
        );
        assert!(Env::load(&path).is_err());
    }

    #[test]
    fn repeated_header_lines_are_collected_as_pairs() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[karajo]
listen_address = 127.0.0.1:8080

[job.http "ping"]
url = https://example.com/ping
header = X-Tenant: acme
header = Accept: application/json
"#,
        );
        let env = Env::load(&path).unwrap();
        assert_eq!(
            env.http_jobs[0].headers,
            vec![("X-Tenant".to_string(), "acme".to_string()), ("Accept".to_string(), "application/json".to_string())]
        );
    }

    #[test]
    fn accepts_http_job_with_relative_path_url() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[karajo]
listen_address = 127.0.0.1:8080

[job.http "local"]
url = /karajo/api/environment
"#,
        );
        assert!(Env::load(&path).is_ok());
    }
}
