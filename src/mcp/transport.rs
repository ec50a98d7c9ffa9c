//! Newline-delimited JSON-RPC framing over a spawned subprocess's stdio.
//!
//! Unlike a simple one-write-one-read transport, responses must be
//! demultiplexed by `id` since several capabilities may have concurrent
//! tool calls in flight against the same server. A background task owns
//! the child's stdout and resolves a pending-request map as lines arrive.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};

use crate::error::{PmlError, PmlResult};
use super::protocol::{JsonRpcResponse, RequestId};

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>>;

pub struct StdioTransport {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    pending: PendingMap,
    reader_task: tokio::task::JoinHandle<()>,
}

impl StdioTransport {
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> PmlResult<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in env {
            cmd.env(k, v);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| PmlError::Routing(format!("failed to spawn {command}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PmlError::Routing("child has no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PmlError::Routing("child has no stdout".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut line = String::new();
                while let Ok(n) = reader.read_line(&mut line).await {
                    if n == 0 {
                        break;
                    }
                    tracing::debug!(target: "pml::mcp", "{}", line.trim());
                    line.clear();
                }
            });
        }

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader_task = tokio::spawn(reader_loop(BufReader::new(stdout), pending.clone()));

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            pending,
            reader_task,
        })
    }

    /// Sends one request and awaits its matching response by `id`.
    pub async fn call(&self, id: RequestId, message: &str) -> PmlResult<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(message.as_bytes())
            .await
            .map_err(PmlError::Io)?;
        stdin.write_all(b"\n").await.map_err(PmlError::Io)?;
        stdin.flush().await.map_err(PmlError::Io)?;
        drop(stdin);

        rx.await
            .map_err(|_| PmlError::Routing("mcp server closed connection".to_string()))
    }

    /// Fire-and-forget; no response is awaited.
    pub async fn notify(&self, message: &str) -> PmlResult<()> {
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(message.as_bytes())
            .await
            .map_err(PmlError::Io)?;
        stdin.write_all(b"\n").await.map_err(PmlError::Io)?;
        stdin.flush().await.map_err(PmlError::Io)
    }

    pub async fn shutdown(&self) {
        self.reader_task.abort();
        let mut child = self.child.lock().await;
        let _ = child.start_kill();
    }
}

async fn reader_loop(
    mut stdout: BufReader<tokio::process::ChildStdout>,
    pending: PendingMap,
) {
    let mut line = String::new();
    loop {
        line.clear();
        match stdout.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(trimmed) else {
                    tracing::warn!(target: "pml::mcp", "unparseable line from mcp server: {trimmed}");
                    continue;
                };
                if let Some(id) = resp.id.clone() {
                    if let Some(tx) = pending.lock().await.remove(&id) {
                        let _ = tx.send(resp);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn echoes_a_single_line_through_cat() {
        let transport = StdioTransport::spawn("cat", &[], &HashMap::new()).await;
        let Ok(transport) = transport else {
            // `cat` may be unavailable in a minimal sandboxed test runner.
            return;
        };
        let reply = transport
            .call(
                RequestId::Number(1),
                r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#,
            )
            .await;
        if let Ok(resp) = reply {
            assert_eq!(resp.id, Some(RequestId::Number(1)));
        }
    }
}
