use anyhow::{Result, anyhow, bail};
use reqwest::header::HeaderMap;
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

use crate::http::debug::redact_header_value;

const TRACE_DIR_NAME: &str = "krishi-sakhi/traces";

/// Append-only transcript of one process run: user turns, answers, tool
/// traffic and raw HTTP exchanges.
#[derive(Clone)]
pub struct SessionTrace {
    inner: Arc<TraceInner>,
}

struct TraceInner {
    writer: Mutex<BufWriter<File>>,
    file_path: PathBuf,
    write_failed: AtomicBool,
}

impl SessionTrace {
    pub fn create(session_id: &str) -> Result<Self> {
        let trace_dir = resolve_trace_dir_from_env()?;
        Self::create_in_dir(session_id, &trace_dir)
    }

    fn create_in_dir(session_id: &str, trace_dir: &Path) -> Result<Self> {
        fs::create_dir_all(trace_dir).map_err(|err| {
            anyhow!(
                "Failed to create trace directory {}: {err}",
                trace_dir.display()
            )
        })?;

        let started = OffsetDateTime::now_utc().unix_timestamp();
        let file_path = trace_dir.join(format!("session-{session_id}-{started}.log"));
        let file = create_trace_file(&file_path)
            .map_err(|err| anyhow!("Failed to create trace file {}: {err}", file_path.display()))?;

        let trace = Self {
            inner: Arc::new(TraceInner {
                writer: Mutex::new(BufWriter::new(file)),
                file_path,
                write_failed: AtomicBool::new(false),
            }),
        };
        trace.log_session(session_id);
        Ok(trace)
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn create_in_temp_dir(session_id: &str, trace_dir: &Path) -> Result<Self> {
        Self::create_in_dir(session_id, trace_dir)
    }

    pub fn file_path(&self) -> &Path {
        &self.inner.file_path
    }

    pub fn log_session(&self, session_id: &str) {
        self.log_single("session", session_id);
    }

    pub fn log_user_input(&self, text: &str) {
        self.log_lines("user.in", text);
    }

    pub fn log_answer(&self, text: &str) {
        self.log_lines("ai.out", text);
    }

    pub fn log_answer_error(&self, text: &str) {
        self.log_lines("ai.err", text);
    }

    pub fn log_tool_call(&self, name: &str, args: &str) {
        self.log_single("tool.call", &format!("{name} {args}"));
    }

    pub fn log_tool_result(&self, name: &str, result: &str) {
        self.log_single("tool.result", &format!("{name} {result}"));
    }

    pub fn log_search_query(&self, query: &str) {
        self.log_single("search.in", query);
    }

    pub fn log_search_outcome(&self, provenance: &str, text: &str) {
        self.log_single("search.out", &format!("[{provenance}]"));
        self.log_lines("search.out", text);
    }

    pub fn log_http_request(&self, method: &str, url: &str, headers: &HeaderMap, body: &str) {
        self.log_single("http.in", &format!("{method} {url}"));
        self.log_headers("http.in", headers);
        if !body.is_empty() {
            self.log_lines("http.in", body);
        }
    }

    pub fn log_http_response(&self, status: u16, headers: &HeaderMap, body: &str) {
        self.log_single("http.out", &format!("HTTP {status}"));
        self.log_headers("http.out", headers);
        self.log_lines("http.out", body);
    }

    pub fn log_http_error(&self, message: &str) {
        self.log_single("http.err", message);
    }

    fn log_headers(&self, kind: &str, headers: &HeaderMap) {
        for (name, value) in headers {
            let value = redact_header_value(name.as_str(), value, true);
            self.log_single(kind, &format!("{}: {value}", name.as_str()));
        }
    }

    fn log_lines(&self, kind: &str, text: &str) {
        if text.is_empty() {
            self.log_single(kind, "<empty>");
            return;
        }

        for line in text.lines() {
            self.log_single(kind, line);
        }
    }

    fn log_single(&self, kind: &str, text: &str) {
        let timestamp = current_timestamp();
        self.write_raw(&format!("[{timestamp}] [{kind:<11}] {text}\n"));
    }

    fn write_raw(&self, text: &str) {
        let Ok(mut writer) = self.inner.writer.lock() else {
            self.report_write_failure("failed to acquire trace writer lock");
            return;
        };

        if writer.write_all(text.as_bytes()).is_err() || writer.flush().is_err() {
            self.report_write_failure("failed to write to trace file");
        }
    }

    fn report_write_failure(&self, message: &str) {
        if !self.inner.write_failed.swap(true, Ordering::Relaxed) {
            tracing::warn!(path = %self.inner.file_path.display(), "session trace disabled: {message}");
        }
    }
}

#[cfg(unix)]
fn create_trace_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn create_trace_file(path: &Path) -> std::io::Result<File> {
    File::create(path)
}

fn current_timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        now.millisecond()
    )
}

pub fn resolve_trace_dir_from_env() -> Result<PathBuf> {
    let xdg_state = env::var("XDG_STATE_HOME").ok();
    let home = dirs::home_dir();
    resolve_trace_dir(xdg_state.as_deref(), home.as_deref())
}

fn resolve_trace_dir(xdg_state_home: Option<&str>, home_dir: Option<&Path>) -> Result<PathBuf> {
    if let Some(xdg) = xdg_state_home {
        let trimmed = xdg.trim();
        if trimmed.is_empty() {
            bail!("Failed to resolve trace path: XDG_STATE_HOME is set but empty");
        }
        return Ok(PathBuf::from(trimmed).join(TRACE_DIR_NAME));
    }

    let home = home_dir
        .ok_or_else(|| anyhow!("Failed to resolve trace path: HOME directory is unavailable"))?;
    Ok(home.join(".local/state").join(TRACE_DIR_NAME))
}

#[cfg(test)]
mod tests {
    use super::{SessionTrace, resolve_trace_dir};
    use std::fs;
    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::tempdir;

    #[test]
    fn resolve_trace_dir_uses_xdg_state_when_set() {
        let dir = resolve_trace_dir(Some("/tmp/state"), Some(Path::new("/home/fallback")))
            .expect("trace path");
        assert_eq!(dir, Path::new("/tmp/state/krishi-sakhi/traces"));
    }

    #[test]
    fn resolve_trace_dir_uses_home_fallback() {
        let dir = resolve_trace_dir(None, Some(Path::new("/home/anu"))).expect("trace path");
        assert_eq!(dir, Path::new("/home/anu/.local/state/krishi-sakhi/traces"));
    }

    #[test]
    fn resolve_trace_dir_rejects_empty_xdg_state() {
        let err = resolve_trace_dir(Some("   "), Some(Path::new("/home/anu")))
            .expect_err("empty xdg state should fail");
        assert!(
            err.to_string()
                .contains("Failed to resolve trace path: XDG_STATE_HOME is set but empty")
        );
    }

    #[test]
    fn resolve_trace_dir_fails_without_home_and_xdg_state() {
        let err = resolve_trace_dir(None, None).expect_err("missing home should fail");
        assert!(
            err.to_string()
                .contains("Failed to resolve trace path: HOME directory is unavailable")
        );
    }

    #[test]
    fn trace_starts_with_session_line_and_pads_kind() {
        let dir = tempdir().expect("tempdir");
        let trace = SessionTrace::create_in_temp_dir("abc", dir.path()).expect("trace");
        trace.log_user_input("which pests attack banana?");

        let content = fs::read_to_string(trace.file_path()).expect("read trace");
        let mut lines = content.lines();
        let first = lines.next().expect("session line");
        assert!(first.starts_with("[20"));
        assert!(first.contains("Z] [session    ] abc"));
        let second = lines.next().expect("input line");
        assert!(second.ends_with("[user.in    ] which pests attack banana?"));
    }

    #[test]
    fn search_outcome_records_provenance_then_text() {
        let dir = tempdir().expect("tempdir");
        let trace = SessionTrace::create_in_temp_dir("abc", dir.path()).expect("trace");
        trace.log_search_query("site:kau.in rice blast");
        trace.log_search_outcome("primary", "Rice blast is caused by a fungus.");

        let content = fs::read_to_string(trace.file_path()).expect("read trace");
        assert!(content.contains("[search.in  ] site:kau.in rice blast"));
        assert!(content.contains("[search.out ] [primary]"));
        assert!(content.contains("[search.out ] Rice blast is caused by a fungus."));
    }

    #[cfg(unix)]
    #[test]
    fn trace_file_permissions_are_owner_only() {
        let dir = tempdir().expect("tempdir");
        let trace = SessionTrace::create_in_temp_dir("abc", dir.path()).expect("trace");
        let metadata = fs::metadata(trace.file_path()).expect("metadata");
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
