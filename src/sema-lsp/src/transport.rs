//! Framed JSON-RPC 2.0 transport over a child process's stdio.
//!
//! Every message is a `Content-Length: <N>\r\n\r\n<N bytes of JSON>` block.
//! A dedicated writer task guarantees whole-message atomicity; a dedicated
//! reader task correlates responses with pending requests, answers
//! server-originated requests through registered handlers and fans
//! notifications out to their subscribers. A separate task drains stderr,
//! classifying each line into a log level.

use crate::{LspError, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Upper bound on a single message body, to catch corrupt framing before it
/// exhausts memory.
const MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

/// Classifies a stderr line into a log level.
pub type StderrClassifier = Arc<dyn Fn(&str) -> tracing::Level + Send + Sync>;

/// Handler for server-originated notifications.
pub type NotificationHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Handler for server-originated requests; the returned value (or error
/// message) is sent back to the server under the request's id.
pub type RequestHandler = Arc<dyn Fn(Value) -> std::result::Result<Value, String> + Send + Sync>;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<std::result::Result<Value, LspError>>>>>;

/// Framed JSON-RPC transport; one per language-server process.
pub struct JsonRpcTransport {
    server_name: String,
    outbound: mpsc::UnboundedSender<Value>,
    pending: PendingMap,
    notification_handlers: Arc<RwLock<HashMap<String, Vec<NotificationHandler>>>>,
    request_handlers: Arc<RwLock<HashMap<String, RequestHandler>>>,
    next_id: AtomicU64,
    running: Arc<AtomicBool>,
}

impl JsonRpcTransport {
    /// Starts the transport over the given streams, spawning the writer,
    /// reader and (when present) stderr tasks.
    pub fn start<R, W, E>(
        server_name: impl Into<String>,
        stdout: R,
        stdin: W,
        stderr: Option<E>,
        classifier: StderrClassifier,
    ) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let server_name = server_name.into();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Value>();
        let running = Arc::new(AtomicBool::new(true));

        let transport = Arc::new(Self {
            server_name: server_name.clone(),
            outbound: outbound_tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            notification_handlers: Arc::new(RwLock::new(HashMap::new())),
            request_handlers: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            running: running.clone(),
        });

        tokio::spawn(Self::write_loop(
            server_name.clone(),
            stdin,
            outbound_rx,
            running.clone(),
        ));
        tokio::spawn(Self::read_loop(transport.clone(), stdout));
        if let Some(stderr) = stderr {
            tokio::spawn(Self::stderr_loop(server_name, stderr, classifier));
        }

        transport
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Registers a handler for a server-originated notification method.
    /// Multiple handlers per method are allowed; all are invoked.
    pub fn on_notification(&self, method: impl Into<String>, handler: NotificationHandler) {
        self.notification_handlers
            .write()
            .unwrap()
            .entry(method.into())
            .or_default()
            .push(handler);
    }

    /// Registers the handler for a server-originated request method.
    pub fn on_request(&self, method: impl Into<String>, handler: RequestHandler) {
        self.request_handlers
            .write()
            .unwrap()
            .insert(method.into(), handler);
    }

    /// Sends a request and awaits its response.
    ///
    /// On timeout the pending slot is discarded but the server is left
    /// running; a late response is dropped by the reader.
    pub async fn send_request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        if !self.is_running() {
            return Err(LspError::Terminated);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        if self.outbound.send(request).is_err() {
            self.pending.lock().unwrap().remove(&id);
            return Err(LspError::Terminated);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LspError::Terminated),
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                warn!(
                    "[{}] request '{}' (id={}) timed out after {:?}",
                    self.server_name, method, id, timeout
                );
                Err(LspError::Timeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Sends a notification. Synchronous: the message is enqueued for the
    /// writer task, preserving submission order relative to requests.
    pub fn send_notification(&self, method: &str, params: Value) -> Result<()> {
        let notification = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.outbound
            .send(notification)
            .map_err(|_| LspError::Terminated)
    }

    /// Sends a raw response to a server-originated request.
    fn send_response(&self, id: Value, result: std::result::Result<Value, String>) {
        let message = match result {
            Ok(value) => json!({"jsonrpc": "2.0", "id": id, "result": value}),
            Err(message) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32603, "message": message},
            }),
        };
        let _ = self.outbound.send(message);
    }

    async fn write_loop<W: AsyncWrite + Unpin>(
        server_name: String,
        mut stdin: W,
        mut outbound: mpsc::UnboundedReceiver<Value>,
        running: Arc<AtomicBool>,
    ) {
        while let Some(message) = outbound.recv().await {
            let body = match serde_json::to_string(&message) {
                Ok(body) => body,
                Err(e) => {
                    error!("[{}] failed to serialize message: {}", server_name, e);
                    continue;
                }
            };
            let header = format!("Content-Length: {}\r\n\r\n", body.len());
            let write = async {
                stdin.write_all(header.as_bytes()).await?;
                stdin.write_all(body.as_bytes()).await?;
                stdin.flush().await
            };
            if let Err(e) = write.await {
                error!("[{}] failed to write to server stdin: {}", server_name, e);
                running.store(false, Ordering::SeqCst);
                break;
            }
        }
    }

    async fn read_loop<R: AsyncRead + Unpin>(transport: Arc<Self>, stdout: R) {
        let mut reader = BufReader::new(stdout);
        loop {
            match Self::read_message(&mut reader).await {
                Ok(Some(message)) => transport.dispatch(message),
                Ok(None) => {
                    debug!("[{}] server closed stdout", transport.server_name);
                    break;
                }
                Err(e) => {
                    // framing errors are recoverable; log and resync
                    error!("[{}] {}", transport.server_name, e);
                }
            }
        }

        transport.running.store(false, Ordering::SeqCst);
        let mut pending = transport.pending.lock().unwrap();
        if !pending.is_empty() {
            warn!(
                "[{}] failing {} pending request(s): server terminated",
                transport.server_name,
                pending.len()
            );
        }
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(LspError::Terminated));
        }
    }

    /// Reads one framed message; `Ok(None)` means EOF.
    async fn read_message<R: AsyncRead + Unpin>(
        reader: &mut BufReader<R>,
    ) -> Result<Option<Value>> {
        let mut content_length: Option<usize> = None;
        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                return Ok(None);
            }
            if line == "\r\n" || line == "\n" {
                break;
            }
            if let Some(value) = line
                .strip_prefix("Content-Length:")
                .or_else(|| line.strip_prefix("content-length:"))
            {
                let length: usize = value.trim().parse().map_err(|e| {
                    LspError::Protocol(format!("invalid Content-Length '{}': {}", value.trim(), e))
                })?;
                if length > MAX_CONTENT_LENGTH {
                    return Err(LspError::Protocol(format!(
                        "Content-Length {} exceeds maximum {}",
                        length, MAX_CONTENT_LENGTH
                    )));
                }
                content_length = Some(length);
            }
            // other headers (Content-Type) are ignored
        }

        let Some(content_length) = content_length else {
            return Err(LspError::Protocol(
                "message without Content-Length header".into(),
            ));
        };

        let mut content = vec![0u8; content_length];
        reader.read_exact(&mut content).await?;
        let message = serde_json::from_slice(&content)
            .map_err(|e| LspError::Protocol(format!("invalid JSON body: {}", e)))?;
        Ok(Some(message))
    }

    /// Dispatches one incoming message on the reader task. Handlers must be
    /// non-blocking; anything slow belongs on the task executor.
    fn dispatch(self: &Arc<Self>, message: Value) {
        let has_method = message.get("method").is_some();
        let has_id = message.get("id").is_some();

        if has_id && !has_method {
            // response to one of our requests
            let Some(id) = message.get("id").and_then(Value::as_u64) else {
                warn!(
                    "[{}] response with non-numeric id: {}",
                    self.server_name, message
                );
                return;
            };
            let slot = self.pending.lock().unwrap().remove(&id);
            let Some(slot) = slot else {
                debug!(
                    "[{}] dropping response for abandoned request {}",
                    self.server_name, id
                );
                return;
            };
            let outcome = if let Some(err) = message.get("error") {
                Err(LspError::Rpc {
                    code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
                    message: err
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string(),
                })
            } else {
                Ok(message.get("result").cloned().unwrap_or(Value::Null))
            };
            let _ = slot.send(outcome);
        } else if has_id && has_method {
            // server-originated request
            let method = message["method"].as_str().unwrap_or("").to_string();
            let id = message["id"].clone();
            let params = message.get("params").cloned().unwrap_or(Value::Null);
            let handler = self.request_handlers.read().unwrap().get(&method).cloned();
            match handler {
                Some(handler) => {
                    let result = handler(params);
                    self.send_response(id, result);
                }
                None => {
                    debug!(
                        "[{}] no handler for server request '{}'",
                        self.server_name, method
                    );
                    self.send_response(id, Err(format!("method not found: {}", method)));
                }
            }
        } else if has_method {
            // notification
            let method = message["method"].as_str().unwrap_or("").to_string();
            let params = message.get("params").cloned().unwrap_or(Value::Null);
            let handlers = self
                .notification_handlers
                .read()
                .unwrap()
                .get(&method)
                .cloned()
                .unwrap_or_default();
            for handler in handlers {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    handler(params.clone())
                }));
                if result.is_err() {
                    error!(
                        "[{}] notification handler for '{}' panicked",
                        self.server_name, method
                    );
                }
            }
        } else {
            warn!(
                "[{}] message is neither request, response nor notification: {}",
                self.server_name, message
            );
        }
    }

    async fn stderr_loop<E: AsyncRead + Unpin>(
        server_name: String,
        stderr: E,
        classifier: StderrClassifier,
    ) {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match classifier(&line) {
                tracing::Level::ERROR => error!("[{}] {}", server_name, line),
                tracing::Level::WARN => warn!("[{}] {}", server_name, line),
                tracing::Level::INFO => info!("[{}] {}", server_name, line),
                _ => debug!("[{}] {}", server_name, line),
            }
        }
    }
}

/// Default stderr classification: error-looking lines escalate, everything
/// else stays at debug.
pub fn default_stderr_classifier() -> StderrClassifier {
    Arc::new(|line: &str| {
        let lower = line.to_ascii_lowercase();
        if lower.contains("error") || lower.contains("fatal") || lower.contains("panic") {
            tracing::Level::ERROR
        } else if lower.contains("warn") {
            tracing::Level::WARN
        } else {
            tracing::Level::DEBUG
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

    /// Reads one framed message from the far end of the duplex pipe.
    async fn read_framed(reader: &mut BufReader<DuplexStream>) -> Value {
        JsonRpcTransport::read_message(reader)
            .await
            .unwrap()
            .expect("expected a message")
    }

    async fn write_framed(writer: &mut DuplexStream, message: &Value) {
        let body = serde_json::to_string(message).unwrap();
        let framed = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
        writer.write_all(framed.as_bytes()).await.unwrap();
    }

    fn test_transport() -> (Arc<JsonRpcTransport>, BufReader<DuplexStream>, DuplexStream) {
        // (their stdin, what we write into their stdout)
        let (stdin_theirs, stdin_ours) = duplex(64 * 1024);
        let (stdout_ours, stdout_theirs) = duplex(64 * 1024);
        let transport = JsonRpcTransport::start(
            "mock",
            stdout_ours,
            stdin_ours,
            None::<DuplexStream>,
            default_stderr_classifier(),
        );
        (transport, BufReader::new(stdin_theirs), stdout_theirs)
    }

    #[tokio::test]
    async fn request_response_round_trip() {
        let (transport, mut server_in, mut server_out) = test_transport();

        let request = tokio::spawn({
            let transport = transport.clone();
            async move {
                transport
                    .send_request(
                        "textDocument/documentSymbol",
                        json!({"textDocument": {"uri": "file:///a.rs"}}),
                        Duration::from_secs(5),
                    )
                    .await
            }
        });

        let received = read_framed(&mut server_in).await;
        assert_eq!(received["method"], "textDocument/documentSymbol");
        let id = received["id"].clone();
        write_framed(
            &mut server_out,
            &json!({"jsonrpc": "2.0", "id": id, "result": [{"name": "main"}]}),
        )
        .await;

        let result = request.await.unwrap().unwrap();
        assert_eq!(result[0]["name"], "main");
    }

    #[tokio::test]
    async fn responses_are_correlated_by_id() {
        let (transport, mut server_in, mut server_out) = test_transport();

        let first = tokio::spawn({
            let transport = transport.clone();
            async move {
                transport
                    .send_request("m/one", json!({}), Duration::from_secs(5))
                    .await
            }
        });
        let second = tokio::spawn({
            let transport = transport.clone();
            async move {
                transport
                    .send_request("m/two", json!({}), Duration::from_secs(5))
                    .await
            }
        });

        let a = read_framed(&mut server_in).await;
        let b = read_framed(&mut server_in).await;
        let (one, two) = if a["method"] == "m/one" { (a, b) } else { (b, a) };

        // answer out of order
        write_framed(
            &mut server_out,
            &json!({"jsonrpc": "2.0", "id": two["id"], "result": "two"}),
        )
        .await;
        write_framed(
            &mut server_out,
            &json!({"jsonrpc": "2.0", "id": one["id"], "result": "one"}),
        )
        .await;

        assert_eq!(first.await.unwrap().unwrap(), json!("one"));
        assert_eq!(second.await.unwrap().unwrap(), json!("two"));
    }

    #[tokio::test]
    async fn error_responses_surface_as_rpc_errors() {
        let (transport, mut server_in, mut server_out) = test_transport();

        let request = tokio::spawn({
            let transport = transport.clone();
            async move {
                transport
                    .send_request("m/fails", json!({}), Duration::from_secs(5))
                    .await
            }
        });
        let received = read_framed(&mut server_in).await;
        write_framed(
            &mut server_out,
            &json!({
                "jsonrpc": "2.0",
                "id": received["id"],
                "error": {"code": -32600, "message": "bad request"},
            }),
        )
        .await;

        match request.await.unwrap() {
            Err(LspError::Rpc { code, message }) => {
                assert_eq!(code, -32600);
                assert_eq!(message, "bad request");
            }
            other => panic!("expected Rpc error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn notifications_fan_out_to_all_handlers() {
        let (transport, _server_in, mut server_out) = test_transport();

        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b"] {
            let seen = seen.clone();
            transport.on_notification(
                "window/logMessage",
                Arc::new(move |params| {
                    seen.lock()
                        .unwrap()
                        .push((tag, params["message"].as_str().unwrap().to_string()));
                }),
            );
        }

        write_framed(
            &mut server_out,
            &json!({
                "jsonrpc": "2.0",
                "method": "window/logMessage",
                "params": {"type": 3, "message": "ready"},
            }),
        )
        .await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|(_, m)| m == "ready"));
    }

    #[tokio::test]
    async fn server_requests_are_answered_with_matching_id() {
        let (transport, mut server_in, mut server_out) = test_transport();

        transport.on_request(
            "workspace/configuration",
            Arc::new(|params| {
                let count = params["items"].as_array().map(|a| a.len()).unwrap_or(0);
                Ok(json!(vec![json!({}); count]))
            }),
        );

        write_framed(
            &mut server_out,
            &json!({
                "jsonrpc": "2.0",
                "id": 77,
                "method": "workspace/configuration",
                "params": {"items": [{"section": "a"}, {"section": "b"}]},
            }),
        )
        .await;

        let response = read_framed(&mut server_in).await;
        assert_eq!(response["id"], 77);
        assert_eq!(response["result"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_server_request_gets_an_error_reply() {
        let (_transport, mut server_in, mut server_out) = test_transport();

        write_framed(
            &mut server_out,
            &json!({"jsonrpc": "2.0", "id": 5, "method": "window/workDoneProgress/create", "params": {}}),
        )
        .await;

        let response = read_framed(&mut server_in).await;
        assert_eq!(response["id"], 5);
        assert!(response["error"]["message"]
            .as_str()
            .unwrap()
            .contains("method not found"));
    }

    #[tokio::test]
    async fn timeout_leaves_transport_usable_and_drops_late_response() {
        let (transport, mut server_in, mut server_out) = test_transport();

        let result = transport
            .send_request("m/slow", json!({}), Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(LspError::Timeout { .. })));

        // late response must be dropped silently
        let received = read_framed(&mut server_in).await;
        write_framed(
            &mut server_out,
            &json!({"jsonrpc": "2.0", "id": received["id"], "result": "late"}),
        )
        .await;

        // transport still works for the next request
        let next = tokio::spawn({
            let transport = transport.clone();
            async move {
                transport
                    .send_request("m/next", json!({}), Duration::from_secs(5))
                    .await
            }
        });
        let received = read_framed(&mut server_in).await;
        assert_eq!(received["method"], "m/next");
        write_framed(
            &mut server_out,
            &json!({"jsonrpc": "2.0", "id": received["id"], "result": "ok"}),
        )
        .await;
        assert_eq!(next.await.unwrap().unwrap(), json!("ok"));
    }

    #[tokio::test]
    async fn eof_fails_all_pending_requests_with_terminated() {
        let (transport, mut server_in, server_out) = test_transport();

        let request = tokio::spawn({
            let transport = transport.clone();
            async move {
                transport
                    .send_request("m/pending", json!({}), Duration::from_secs(30))
                    .await
            }
        });
        let _ = read_framed(&mut server_in).await;

        drop(server_out); // server exits

        assert!(matches!(request.await.unwrap(), Err(LspError::Terminated)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!transport.is_running());
    }

    #[tokio::test]
    async fn notification_ordering_is_preserved_relative_to_requests() {
        let (transport, mut server_in, _server_out) = test_transport();

        transport
            .send_notification("textDocument/didOpen", json!({"n": 1}))
            .unwrap();
        let pending = tokio::spawn({
            let transport = transport.clone();
            async move {
                transport
                    .send_request("m/q", json!({}), Duration::from_millis(200))
                    .await
            }
        });
        let first = read_framed(&mut server_in).await;
        let second = read_framed(&mut server_in).await;
        assert_eq!(first["method"], "textDocument/didOpen");
        assert_eq!(second["method"], "m/q");
        let _ = pending.await.unwrap();
    }
}
