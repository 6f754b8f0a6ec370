// SPDX-License-Identifier: MIT

//! JSON-RPC-over-stdio session helper for engines that speak JSON-lines RPC
//! on their own stdin/stdout (spec §4.1 "JSON-RPC adapter variant").

use crate::stream::LineSplitter;
use bitk_core::EngineError;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

/// Per-call timeout (spec §4.1).
pub const CALL_TIMEOUT: Duration = Duration::from_secs(15);

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<Result<Value, Value>>>>>;

/// A single JSON-RPC session multiplexed over one child process's stdio.
///
/// Owns the writer half directly; the reader half is driven by a detached
/// task started via [`RpcSession::spawn_reader`] that demultiplexes
/// responses by id and forwards id-less notifications to `notifications`.
pub struct RpcSession<W> {
    stdin: tokio::sync::Mutex<W>,
    next_id: AtomicI64,
    pending: PendingMap,
    handshake_done: AtomicBool,
}

impl<W: AsyncWrite + Unpin + Send + 'static> RpcSession<W> {
    pub fn new(stdin: W) -> Self {
        Self {
            stdin: tokio::sync::Mutex::new(stdin),
            next_id: AtomicI64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            handshake_done: AtomicBool::new(false),
        }
    }

    /// Spawn the reader task over `stdout`. Call once per session, with the
    /// sending half of a channel the caller uses to receive id-less
    /// notifications (e.g. progress events the engine pushes unprompted).
    pub fn spawn_reader<R: AsyncRead + Unpin + Send + 'static>(
        &self,
        stdout: R,
        notifications: mpsc::UnboundedSender<Value>,
    ) {
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            let mut splitter = LineSplitter::new(stdout);
            while let Some(line) = splitter.next_raw_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(value) = serde_json::from_str::<Value>(&line) else {
                    tracing::warn!(line, "rpc: skipping line that is not valid JSON");
                    continue;
                };
                match value.get("id").and_then(Value::as_i64) {
                    Some(id) => {
                        let sender = pending.lock().remove(&id);
                        if let Some(sender) = sender {
                            let result = if let Some(err) = value.get("error") {
                                Err(err.clone())
                            } else {
                                Ok(value.get("result").cloned().unwrap_or(Value::Null))
                            };
                            let _ = sender.send(result);
                        }
                    }
                    None => {
                        let _ = notifications.send(value);
                    }
                }
            }
        });
    }

    /// Send a request and await its correlated response, bounded by
    /// [`CALL_TIMEOUT`]. `method == "initialize"` is the only call allowed
    /// before the handshake completes.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, EngineError> {
        if method != "initialize" && !self.handshake_done.load(Ordering::SeqCst) {
            return Err(EngineError::Internal(
                "rpc call attempted before initialize/initialized handshake".into(),
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let payload = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        self.write_line(&payload).await?;

        match tokio::time::timeout(CALL_TIMEOUT, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(err))) => Err(EngineError::SessionError(err.to_string())),
            Ok(Err(_canceled)) => Err(EngineError::Internal("rpc reader task dropped".into())),
            Err(_elapsed) => {
                self.pending.lock().remove(&id);
                Err(EngineError::EngineTimeout(format!(
                    "rpc call '{method}' timed out after {}s",
                    CALL_TIMEOUT.as_secs()
                )))
            }
        }
    }

    /// Send a notification (no id, no response expected).
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), EngineError> {
        let payload = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        self.write_line(&payload).await
    }

    /// Perform the strict `initialize` -> `initialized` handshake required
    /// before any other method may be called.
    pub async fn handshake(&self, init_params: Value) -> Result<Value, EngineError> {
        let result = self.call("initialize", init_params).await?;
        self.notify("initialized", json!({})).await?;
        self.handshake_done.store(true, Ordering::SeqCst);
        Ok(result)
    }

    async fn write_line(&self, payload: &Value) -> Result<(), EngineError> {
        let mut line = serde_json::to_string(payload)
            .map_err(|e| EngineError::Internal(format!("rpc serialize failed: {e}")))?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| EngineError::StreamError(format!("rpc write failed: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| EngineError::StreamError(format!("rpc flush failed: {e}")))
    }
}
