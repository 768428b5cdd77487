//! Line-framed JSON protocol between the orchestrator and an executor
//!
//! 1. The executor prints [`READY_SENTINEL`] on its own line.
//! 2. The orchestrator writes one [`Request`] as a single JSON line.
//! 3. The executor answers with one [`Response`] JSON line and exits.
//!
//! Anything the executor prints before the sentinel is ignored.

use crate::error::RuntimeError;
use crate::host::MigratorHost;
use crate::planner::MigratorCommand;
use crate::runtime::{CollectedState, ExecutionReport};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Line printed by an executor once it accepts a request
pub const READY_SENTINEL: &str = "--- READY ---";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Request {
    CollectState,
    Execute { commands: Vec<MigratorCommand> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Response {
    State(CollectedState),
    Executed(ExecutionReport),
    /// Request could not be understood
    Failed(String),
}

/// Serve a single request on the executor side
///
/// # Errors
/// - `RuntimeError::Io` if the streams fail
/// - `RuntimeError::Protocol` if the input closes before a request arrives
pub async fn serve<R, W>(host: &MigratorHost, reader: R, mut writer: W) -> Result<(), RuntimeError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(format!("{READY_SENTINEL}\n").as_bytes())
        .await?;
    writer.flush().await?;

    let mut lines = reader.lines();
    let line = lines
        .next_line()
        .await?
        .ok_or_else(|| RuntimeError::Protocol("input closed before a request".into()))?;

    let response = match serde_json::from_str::<Request>(&line) {
        Ok(Request::CollectState) => Response::State(host.collect_state().await),
        Ok(Request::Execute { commands }) => Response::Executed(host.execute(&commands).await),
        Err(e) => Response::Failed(format!("malformed request: {e}")),
    };

    let mut payload = serde_json::to_string(&response)?;
    payload.push('\n');
    writer.write_all(payload.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
