//! One handle per spawned language server: process lifecycle, the LSP
//! handshake and typed send helpers.

use crate::transport::{JsonRpcTransport, NotificationHandler, RequestHandler, StderrClassifier};
use crate::{LspError, Result, DEFAULT_REQUEST_TIMEOUT};
use lsp_types::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// How a language-server process is launched.
#[derive(Debug, Clone)]
pub struct ProcessLaunchInfo {
    pub cmd: Vec<String>,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
}

impl ProcessLaunchInfo {
    pub fn new(cmd: Vec<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            cmd,
            cwd: cwd.into(),
            env: HashMap::new(),
        }
    }
}

/// Lifecycle of a language-server handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Stopped,
    Starting,
    Initialized,
    ShuttingDown,
    Crashed,
}

/// Owns one language-server subprocess and its transport.
pub struct LanguageServerHandle {
    name: String,
    launch: ProcessLaunchInfo,
    classifier: StderrClassifier,
    request_timeout: Duration,
    child: StdMutex<Option<Child>>,
    transport: RwLock<Option<Arc<JsonRpcTransport>>>,
    phase: RwLock<LifecyclePhase>,
    capabilities: RwLock<Option<ServerCapabilities>>,
}

impl LanguageServerHandle {
    pub fn new(
        name: impl Into<String>,
        launch: ProcessLaunchInfo,
        classifier: StderrClassifier,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            name: name.into(),
            launch,
            classifier,
            request_timeout: request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            child: StdMutex::new(None),
            transport: RwLock::new(None),
            phase: RwLock::new(LifecyclePhase::Stopped),
            capabilities: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> LifecyclePhase {
        *self.phase.read().unwrap()
    }

    pub fn is_running(&self) -> bool {
        let transport_alive = self
            .transport
            .read()
            .unwrap()
            .as_ref()
            .is_some_and(|t| t.is_running());
        transport_alive
            && matches!(
                self.phase(),
                LifecyclePhase::Starting | LifecyclePhase::Initialized
            )
    }

    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.capabilities.read().unwrap().clone()
    }

    /// Spawns the subprocess and starts the transport. Re-entrant start is
    /// an error.
    pub fn start(&self) -> Result<()> {
        {
            let mut phase = self.phase.write().unwrap();
            if !matches!(*phase, LifecyclePhase::Stopped | LifecyclePhase::Crashed) {
                return Err(LspError::ServerInitFailed(format!(
                    "{}: start called while {:?}",
                    self.name, *phase
                )));
            }
            *phase = LifecyclePhase::Starting;
        }

        let spawn_result = (|| {
            if self.launch.cmd.is_empty() {
                return Err(LspError::ServerInitFailed(format!(
                    "{}: no command configured",
                    self.name
                )));
            }

            let mut command = Command::new(&self.launch.cmd[0]);
            command
                .args(&self.launch.cmd[1..])
                .current_dir(&self.launch.cwd)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            for (key, value) in &self.launch.env {
                command.env(key, value);
            }

            command.spawn().map_err(|e| {
                LspError::ServerInitFailed(format!(
                    "{}: failed to spawn {}: {}",
                    self.name, self.launch.cmd[0], e
                ))
            })
        })();

        let mut child = match spawn_result {
            Ok(child) => child,
            Err(e) => {
                *self.phase.write().unwrap() = LifecyclePhase::Crashed;
                return Err(e);
            }
        };

        let Some(stdin) = child.stdin.take() else {
            *self.phase.write().unwrap() = LifecyclePhase::Crashed;
            return Err(LspError::ServerInitFailed(format!(
                "{}: failed to capture stdin",
                self.name
            )));
        };
        let Some(stdout) = child.stdout.take() else {
            *self.phase.write().unwrap() = LifecyclePhase::Crashed;
            return Err(LspError::ServerInitFailed(format!(
                "{}: failed to capture stdout",
                self.name
            )));
        };
        let stderr = child.stderr.take();

        let transport = JsonRpcTransport::start(
            self.name.clone(),
            stdout,
            stdin,
            stderr,
            self.classifier.clone(),
        );

        *self.transport.write().unwrap() = Some(transport);
        *self.child.lock().unwrap() = Some(child);
        info!("[{}] server process started", self.name);
        Ok(())
    }

    fn transport(&self) -> Result<Arc<JsonRpcTransport>> {
        self.transport
            .read()
            .unwrap()
            .clone()
            .ok_or(LspError::Terminated)
    }

    /// Registers a notification handler. Must be called after `start` and
    /// before messages of that method are expected.
    pub fn on_notification(&self, method: &str, handler: NotificationHandler) -> Result<()> {
        self.transport()?.on_notification(method, handler);
        Ok(())
    }

    /// Registers a handler for a server-originated request method.
    pub fn on_request(&self, method: &str, handler: RequestHandler) -> Result<()> {
        self.transport()?.on_request(method, handler);
        Ok(())
    }

    /// Performs the `initialize`/`initialized` handshake and caches the
    /// server's capabilities.
    pub async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        let result: InitializeResult = self
            .send_request("initialize", params, None)
            .await
            .map_err(|e| match e {
                LspError::Timeout { timeout, .. } => LspError::ServerInitFailed(format!(
                    "{}: initialize timed out after {:?}",
                    self.name, timeout
                )),
                other => other,
            })?;

        *self.capabilities.write().unwrap() = Some(result.capabilities.clone());
        self.notify("initialized", InitializedParams {})?;
        *self.phase.write().unwrap() = LifecyclePhase::Initialized;
        info!("[{}] initialized", self.name);
        Ok(result)
    }

    /// Sends a typed request and deserializes the result.
    pub async fn send_request<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
        timeout: Option<Duration>,
    ) -> Result<R> {
        let params = serde_json::to_value(params)?;
        let result = self
            .transport()?
            .send_request(method, params, timeout.unwrap_or(self.request_timeout))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Sends a raw request, leaving the result as JSON.
    pub async fn send_request_raw(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.transport()?
            .send_request(method, params, timeout.unwrap_or(self.request_timeout))
            .await
    }

    /// Sends a typed notification. Synchronous; the message is enqueued in
    /// order with other outgoing traffic.
    pub fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<()> {
        let params = serde_json::to_value(params)?;
        self.transport()?.send_notification(method, params)
    }

    /// `shutdown` request, `exit` notification, then kill after a grace
    /// period.
    pub async fn shutdown(&self) -> Result<()> {
        *self.phase.write().unwrap() = LifecyclePhase::ShuttingDown;

        if let Ok(transport) = self.transport() {
            if transport.is_running() {
                let shutdown: Result<Value> = self
                    .send_request("shutdown", Value::Null, Some(Duration::from_secs(5)))
                    .await;
                match shutdown {
                    Ok(_) => {
                        let _ = self.notify("exit", Value::Null);
                    }
                    Err(e) => warn!("[{}] shutdown request failed: {}", self.name, e),
                }
            }
        }

        let child = self.child.lock().unwrap().take();
        if let Some(mut child) = child {
            let graceful =
                tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
            match graceful {
                Ok(Ok(status)) => debug!("[{}] exited with {}", self.name, status),
                _ => {
                    warn!("[{}] did not exit in time; killing", self.name);
                    let _ = child.kill().await;
                }
            }
        }

        *self.phase.write().unwrap() = LifecyclePhase::Stopped;
        info!("[{}] stopped", self.name);
        Ok(())
    }

    // -- typed document helpers ------------------------------------------

    pub fn uri_for(&self, absolute_path: &Path) -> Result<Url> {
        Url::from_file_path(absolute_path).map_err(|_| {
            LspError::Protocol(format!("not an absolute path: {}", absolute_path.display()))
        })
    }

    pub fn did_open(&self, uri: Url, language_id: &str, version: i32, text: &str) -> Result<()> {
        self.notify(
            "textDocument/didOpen",
            DidOpenTextDocumentParams {
                text_document: TextDocumentItem {
                    uri,
                    language_id: language_id.to_string(),
                    version,
                    text: text.to_string(),
                },
            },
        )
    }

    pub fn did_close(&self, uri: Url) -> Result<()> {
        self.notify(
            "textDocument/didClose",
            DidCloseTextDocumentParams {
                text_document: TextDocumentIdentifier { uri },
            },
        )
    }

    /// Incremental `didChange`.
    pub fn did_change(
        &self,
        uri: Url,
        version: i32,
        changes: Vec<TextDocumentContentChangeEvent>,
    ) -> Result<()> {
        self.notify(
            "textDocument/didChange",
            DidChangeTextDocumentParams {
                text_document: VersionedTextDocumentIdentifier { uri, version },
                content_changes: changes,
            },
        )
    }

    pub fn did_save(&self, uri: Url) -> Result<()> {
        self.notify(
            "textDocument/didSave",
            DidSaveTextDocumentParams {
                text_document: TextDocumentIdentifier { uri },
                text: None,
            },
        )
    }

    pub async fn document_symbols(&self, uri: Url) -> Result<Option<DocumentSymbolResponse>> {
        self.send_request(
            "textDocument/documentSymbol",
            DocumentSymbolParams {
                text_document: TextDocumentIdentifier { uri },
                work_done_progress_params: Default::default(),
                partial_result_params: Default::default(),
            },
            None,
        )
        .await
    }

    pub async fn references(
        &self,
        uri: Url,
        position: Position,
        include_declaration: bool,
    ) -> Result<Option<Vec<Location>>> {
        self.send_request(
            "textDocument/references",
            ReferenceParams {
                text_document_position: TextDocumentPositionParams {
                    text_document: TextDocumentIdentifier { uri },
                    position,
                },
                context: ReferenceContext {
                    include_declaration,
                },
                work_done_progress_params: Default::default(),
                partial_result_params: Default::default(),
            },
            None,
        )
        .await
    }

    pub async fn definition(
        &self,
        uri: Url,
        position: Position,
    ) -> Result<Option<GotoDefinitionResponse>> {
        self.send_request(
            "textDocument/definition",
            GotoDefinitionParams {
                text_document_position_params: TextDocumentPositionParams {
                    text_document: TextDocumentIdentifier { uri },
                    position,
                },
                work_done_progress_params: Default::default(),
                partial_result_params: Default::default(),
            },
            None,
        )
        .await
    }

    pub async fn rename(
        &self,
        uri: Url,
        position: Position,
        new_name: &str,
    ) -> Result<Option<WorkspaceEdit>> {
        self.send_request(
            "textDocument/rename",
            RenameParams {
                text_document_position: TextDocumentPositionParams {
                    text_document: TextDocumentIdentifier { uri },
                    position,
                },
                new_name: new_name.to_string(),
                work_done_progress_params: Default::default(),
            },
            None,
        )
        .await
    }

    pub async fn execute_command(
        &self,
        command: &str,
        arguments: Vec<Value>,
    ) -> Result<Value> {
        self.send_request_raw(
            "workspace/executeCommand",
            serde_json::json!({"command": command, "arguments": arguments}),
            None,
        )
        .await
    }
}

/// Builds the client capabilities advertised during `initialize`: document
/// synchronization, hierarchical document symbols, references, definition
/// and rename.
pub fn client_capabilities() -> ClientCapabilities {
    ClientCapabilities {
        text_document: Some(TextDocumentClientCapabilities {
            synchronization: Some(TextDocumentSyncClientCapabilities {
                dynamic_registration: Some(true),
                will_save: Some(false),
                will_save_wait_until: Some(false),
                did_save: Some(true),
            }),
            document_symbol: Some(DocumentSymbolClientCapabilities {
                dynamic_registration: Some(true),
                hierarchical_document_symbol_support: Some(true),
                symbol_kind: Some(SymbolKindCapability {
                    value_set: Some(
                        (1..=26)
                            .map(|k| {
                                serde_json::from_value(serde_json::json!(k))
                                    .unwrap_or(SymbolKind::NULL)
                            })
                            .collect(),
                    ),
                }),
                tag_support: None,
            }),
            references: Some(ReferenceClientCapabilities {
                dynamic_registration: Some(true),
            }),
            definition: Some(GotoCapability {
                dynamic_registration: Some(true),
                link_support: Some(true),
            }),
            rename: Some(RenameClientCapabilities {
                dynamic_registration: Some(true),
                prepare_support: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        }),
        workspace: Some(WorkspaceClientCapabilities {
            workspace_folders: Some(true),
            configuration: Some(true),
            execute_command: Some(ExecuteCommandClientCapabilities {
                dynamic_registration: Some(true),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Builds the initialize params for a server rooted at `root`.
#[allow(deprecated)] // root_uri/root_path are deprecated but still expected by many servers
pub fn initialize_params(root: &Path, initialization_options: Option<Value>) -> InitializeParams {
    let root_uri = Url::from_file_path(root).ok();
    let folder_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workspace".to_string());
    InitializeParams {
        process_id: Some(std::process::id()),
        root_path: Some(root.to_string_lossy().into_owned()),
        root_uri: root_uri.clone(),
        capabilities: client_capabilities(),
        initialization_options,
        workspace_folders: root_uri.map(|uri| {
            vec![WorkspaceFolder {
                uri,
                name: folder_name,
            }]
        }),
        locale: Some("en".to_string()),
        ..Default::default()
    }
}
