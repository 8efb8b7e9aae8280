use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};

use log::{debug, info};
use rustc_hash::FxHashSet;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use crate::error::ExecError;

const READ_CHUNK_SIZE: usize = 4096;
const EXIT_CODE_LINE: &str = "> Process exited with exit code ";
const SIGNAL_LINE: &str = "> Process terminated by signal ";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ExecutionLog {
    text: String,
    #[serde(skip)]
    exit_code: Option<i32>,
}

impl ExecutionLog {
    fn for_command(command: &str) -> Self {
        Self {
            text: format!("> {command}\n"),
            exit_code: None,
        }
    }

    fn push_line(&mut self, line: &str) {
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
        self.text.push_str(line);
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    // None unless the process exited on its own
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }
}

impl fmt::Display for ExecutionLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

// Holds back a multi-byte character split across two reads until the rest
// of it arrives.
#[derive(Default)]
struct Utf8Stream {
    pending: Vec<u8>,
}

impl Utf8Stream {
    fn push(&mut self, chunk: &[u8], out: &mut String) {
        self.pending.extend_from_slice(chunk);
        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(text) => {
                    out.push_str(text);
                    start = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid = start + e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[start..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start = valid + len;
                        }
                        None => {
                            start = valid;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);
    }

    fn finish(&mut self, out: &mut String) {
        if !self.pending.is_empty() {
            out.push_str(&String::from_utf8_lossy(&self.pending));
            self.pending.clear();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    command: String,
    failure_codes: FxHashSet<i32>,
}

impl ExecutionRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            failure_codes: FxHashSet::default(),
        }
    }

    pub fn with_failure_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.failure_codes.extend(codes);
        self
    }

    pub async fn run(&self) -> Result<ExecutionLog, ExecError> {
        let mut log = ExecutionLog::for_command(&self.command);

        // no quoting: arguments are split on whitespace
        let mut args = self.command.split_whitespace();
        let Some(program) = args.next() else {
            log.push_line("empty command");
            return Err(ExecError::Spawn { log });
        };

        let mut child = match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                debug!("spawn of {program} failed: {e}");
                log.push_line(&e.to_string());
                return Err(ExecError::Spawn { log });
            }
        };
        debug!("spawned {program} (pid {:?})", child.id());

        let status = match stream_to_exit(&mut child, &mut log).await {
            Ok(status) => status,
            Err(e) => {
                log.push_line(&e.to_string());
                let _ = child.kill().await;
                return Err(ExecError::Io { log });
            }
        };

        self.settle(status, log)
    }

    fn settle(
        &self,
        status: ExitStatus,
        mut log: ExecutionLog,
    ) -> Result<ExecutionLog, ExecError> {
        log.exit_code = status.code();
        match status.code() {
            Some(0) => {
                debug!("`{}` exited with code 0", self.command);
                Ok(log)
            }
            Some(code) => {
                log.push_line(&format!("{EXIT_CODE_LINE}{code}"));
                if self.failure_codes.contains(&code) {
                    debug!("`{}` exited with failure code {code}", self.command);
                    Err(ExecError::FailureCode { code, log })
                } else {
                    // non-zero exits are tolerated unless listed
                    info!("`{}` exited with tolerated code {code}", self.command);
                    Ok(log)
                }
            }
            None => {
                let signal = exit_signal(&status);
                match signal {
                    Some(signal) => log.push_line(&format!("{SIGNAL_LINE}{signal}")),
                    None => log.push_line("> Process terminated without an exit code"),
                }
                debug!("`{}` terminated by signal {signal:?}", self.command);
                Err(ExecError::Terminated { signal, log })
            }
        }
    }
}

pub async fn execute(
    command: &str,
    failure_codes: impl IntoIterator<Item = i32>,
) -> Result<ExecutionLog, ExecError> {
    ExecutionRequest::new(command)
        .with_failure_codes(failure_codes)
        .run()
        .await
}

async fn stream_to_exit(child: &mut Child, log: &mut ExecutionLog) -> io::Result<ExitStatus> {
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out_buf = [0u8; READ_CHUNK_SIZE];
    let mut err_buf = [0u8; READ_CHUNK_SIZE];
    let mut out_text = Utf8Stream::default();
    let mut err_text = Utf8Stream::default();

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            read = read_chunk(&mut stdout, &mut out_buf), if stdout.is_some() => {
                match read? {
                    0 => {
                        stdout = None;
                        out_text.finish(&mut log.text);
                    }
                    n => out_text.push(&out_buf[..n], &mut log.text),
                }
            }
            read = read_chunk(&mut stderr, &mut err_buf), if stderr.is_some() => {
                match read? {
                    0 => {
                        stderr = None;
                        err_text.finish(&mut log.text);
                    }
                    n => err_text.push(&err_buf[..n], &mut log.text),
                }
            }
        }
    }

    child.wait().await
}

async fn read_chunk<R: AsyncRead + Unpin>(
    stream: &mut Option<R>,
    buf: &mut [u8],
) -> io::Result<usize> {
    match stream {
        Some(stream) => stream.read(buf).await,
        None => Ok(0),
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(body: &str) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.sh");
        std::fs::write(&path, body).unwrap();
        let command = format!("sh {}", path.display());
        (dir, command)
    }

    #[tokio::test]
    async fn zero_exit_succeeds_without_exit_code_line() {
        let log = execute("true", []).await.unwrap();

        assert!(log.as_str().starts_with("> true\n"));
        let last = log.as_str().lines().last().unwrap();
        assert!(!last.contains("exit code"));
        assert_eq!(log.exit_code(), Some(0));
    }

    #[tokio::test]
    async fn declared_failure_code_fails_with_log() {
        let err = execute("false", [1]).await.unwrap_err();

        match &err {
            ExecError::FailureCode { code, log } => {
                assert_eq!(*code, 1);
                assert!(log.as_str().ends_with("exit code 1"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.log().exit_code(), Some(1));
    }

    #[tokio::test]
    async fn undeclared_non_zero_exit_still_succeeds() {
        let log = execute("false", []).await.unwrap();

        assert!(log.as_str().contains("exit code 1"));
        assert_eq!(log.exit_code(), Some(1));
    }

    #[tokio::test]
    async fn failure_codes_only_match_listed_codes() {
        let (_dir, command) = script("exit 3\n");

        let log = execute(&command, [1, 2]).await.unwrap();
        assert_eq!(log.exit_code(), Some(3));

        let err = execute(&command, [3]).await.unwrap_err();
        assert!(matches!(err, ExecError::FailureCode { code: 3, .. }));
    }

    #[tokio::test]
    async fn missing_binary_fails_at_spawn() {
        let err = execute("definitely-not-a-real-binary-4f1c --flag", [])
            .await
            .unwrap_err();

        assert!(matches!(err, ExecError::Spawn { .. }));
        let log = err.into_log();
        assert!(!log.is_empty());
        assert!(log.as_str().lines().count() >= 2);
    }

    #[tokio::test]
    async fn blank_command_fails_at_spawn() {
        let err = execute("   ", []).await.unwrap_err();

        assert!(matches!(err, ExecError::Spawn { .. }));
        assert!(err.log().as_str().contains("empty command"));
    }

    #[tokio::test]
    async fn stdout_and_stderr_share_one_log() {
        let (_dir, command) =
            script("echo first\nsleep 0.1\necho second >&2\nsleep 0.1\necho third\n");

        let log = execute(&command, []).await.unwrap();
        let text = log.as_str();

        let first = text.find("first").unwrap();
        let second = text.find("second").unwrap();
        let third = text.find("third").unwrap();
        assert!(first < second && second < third);
    }

    #[tokio::test]
    async fn output_is_kept_when_exit_code_is_recorded() {
        let (_dir, command) = script("echo flashing\necho verify error >&2\nexit 1\n");

        let err = execute(&command, [1]).await.unwrap_err();
        let text = err.log().as_str();

        assert!(text.contains("flashing\n"));
        assert!(text.contains("verify error\n"));
        assert!(text.ends_with("> Process exited with exit code 1"));
    }

    #[tokio::test]
    async fn whitespace_is_collapsed_between_arguments() {
        let log = execute("echo  spaced   out", []).await.unwrap();

        assert!(log.as_str().contains("spaced out\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn signal_termination_is_a_distinct_failure() {
        let (_dir, command) = script("kill -9 $$\n");

        let err = execute(&command, []).await.unwrap_err();

        match err {
            ExecError::Terminated { signal, log } => {
                assert_eq!(signal, Some(9));
                assert_eq!(log.exit_code(), None);
                assert!(log.as_str().ends_with("signal 9"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_runs_keep_separate_logs() {
        let (a, b) = tokio::join!(execute("echo alpha", []), execute("echo beta", []));

        let a = a.unwrap();
        let b = b.unwrap();
        assert!(a.as_str().contains("alpha") && !a.as_str().contains("beta"));
        assert!(b.as_str().contains("beta") && !b.as_str().contains("alpha"));
    }

    #[tokio::test]
    async fn exit_code_ignores_lookalike_output() {
        let log = execute("echo > Process exited with exit code 5", [])
            .await
            .unwrap();

        assert!(log.as_str().contains("exit code 5"));
        assert_eq!(log.exit_code(), Some(0));
    }

    #[tokio::test]
    async fn multibyte_character_across_reads_is_kept() {
        let (_dir, command) = script("printf '%4095s\\303\\251\\n' ''\n");

        let log = execute(&command, []).await.unwrap();

        assert!(log.as_str().contains("\u{e9}\n"));
        assert!(!log.as_str().contains(char::REPLACEMENT_CHARACTER));
    }

    #[test]
    fn split_character_is_joined_and_bad_bytes_replaced() {
        let mut stream = Utf8Stream::default();
        let mut out = String::new();

        stream.push(b"ab\xc3", &mut out);
        assert_eq!(out, "ab");
        stream.push(b"\xa9\xffz", &mut out);
        assert_eq!(out, "ab\u{e9}\u{fffd}z");
        stream.push(b"\xe2\x82", &mut out);
        stream.finish(&mut out);
        assert_eq!(out, "ab\u{e9}\u{fffd}z\u{fffd}");
    }
}
