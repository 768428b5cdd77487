//! Child-process migrator runtime
//!
//! Each call starts the executor installed in the template directory, waits
//! for its ready sentinel, sends one request and reads one response. The
//! executor's stderr is logged and never fails a call on its own.

use crate::error::RuntimeError;
use crate::planner::MigratorCommand;
use crate::protocol::{Request, Response, READY_SENTINEL};
use crate::runtime::{CollectedState, ExecutionReport, MigratorRuntime};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

/// Default limit for a single executor call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Runs the executor as a child process per call
#[derive(Debug, Clone)]
pub struct ProcessRuntime {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessRuntime {
    /// `program` is resolved against the template directory when relative
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn call(&self, template_dir: &Path, request: &Request) -> Result<Response, RuntimeError> {
        let program = template_dir.join(&self.program);
        let mut child = Command::new(&program)
            .args(&self.args)
            .current_dir(template_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RuntimeError::Spawn {
                program: program.display().to_string(),
                source,
            })?;

        let (Some(mut stdin), Some(stdout), Some(mut stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(RuntimeError::Protocol("executor streams unavailable".into()));
        };

        let stderr_task = tokio::spawn(async move {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text).await;
            text
        });

        let mut payload = serde_json::to_string(request)?;
        payload.push('\n');

        let exchange = async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await? {
                    Some(line) if line.trim() == READY_SENTINEL => break,
                    Some(_) => {}
                    None => return Err(RuntimeError::NotReady),
                }
            }

            stdin.write_all(payload.as_bytes()).await?;
            stdin.flush().await?;
            drop(stdin);

            let line = lines.next_line().await?.ok_or_else(|| {
                RuntimeError::Protocol("executor closed its output without a response".into())
            })?;
            serde_json::from_str::<Response>(&line)
                .map_err(|e| RuntimeError::Protocol(format!("unreadable response: {e}")))
        };

        let response = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(response) => response,
            Err(_) => {
                let _ = child.kill().await;
                return Err(RuntimeError::Timeout(self.timeout));
            }
        };

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();
        if !stderr.trim().is_empty() {
            tracing::error!(dir = %template_dir.display(), stderr = %stderr.trim(), "migrator executor wrote to stderr");
        }
        if !status.success() {
            tracing::warn!(dir = %template_dir.display(), %status, "migrator executor exited with failure");
        }

        response
    }
}

#[async_trait]
impl MigratorRuntime for ProcessRuntime {
    async fn collect_state(&self, template_dir: &Path) -> Result<CollectedState, RuntimeError> {
        match self.call(template_dir, &Request::CollectState).await? {
            Response::State(state) => Ok(state),
            Response::Failed(message) => Err(RuntimeError::Remote(message)),
            Response::Executed(_) => Err(RuntimeError::Protocol(
                "expected a state response".into(),
            )),
        }
    }

    async fn execute(
        &self,
        template_dir: &Path,
        commands: &[MigratorCommand],
    ) -> Result<ExecutionReport, RuntimeError> {
        let request = Request::Execute {
            commands: commands.to_vec(),
        };
        match self.call(template_dir, &request).await? {
            Response::Executed(report) => Ok(report),
            Response::Failed(message) => Err(RuntimeError::Remote(message)),
            Response::State(_) => Err(RuntimeError::Protocol(
                "expected an execution response".into(),
            )),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("executor.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn reads_response_after_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        script(
            dir.path(),
            r#"echo "starting"
echo "--- READY ---"
read request
echo '{"kind":"state","body":{"migrators":[],"errors":[]}}'
echo "warning" >&2"#,
        );

        let runtime = ProcessRuntime::new("executor.sh");
        let state = runtime.collect_state(dir.path()).await.unwrap();
        assert_eq!(state, CollectedState::default());
    }

    #[tokio::test]
    async fn missing_sentinel_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        script(dir.path(), "echo nothing here");

        let runtime = ProcessRuntime::new("executor.sh");
        let result = runtime.collect_state(dir.path()).await;
        assert!(matches!(result, Err(RuntimeError::NotReady)));
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = ProcessRuntime::new("absent");
        let result = runtime.execute(dir.path(), &[]).await;
        assert!(matches!(result, Err(RuntimeError::Spawn { .. })));
    }
}
