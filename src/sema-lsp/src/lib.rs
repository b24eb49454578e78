//! Language-server multiplexing for Sema.
//!
//! Spawns one language-server subprocess per configured language, speaks
//! JSON-RPC 2.0 with LSP framing over their stdio, routes per-file requests
//! to the right server and caches per-file symbol trees keyed by content
//! hash.
//!
//! Layering, bottom up:
//! - [`transport`] — framed JSON-RPC over a child process's pipes
//! - [`handler`] — one handle per server: LSP lifecycle and typed sends
//! - [`adapters`] — per-language specialisation (commands, init options,
//!   readiness, the hybrid Vue adapter)
//! - [`buffers`] — refcounted `didOpen`/`didClose` accounting
//! - [`cache`] — persistent content-hash-keyed symbol cache
//! - [`server`] — per-language server combining all of the above
//! - [`router`] — the multi-server router with fan-out and restart

pub mod adapters;
pub mod buffers;
pub mod cache;
pub mod handler;
pub mod router;
pub mod server;
pub mod symbols;
pub mod transport;

pub use adapters::{create_adapter, LanguageAdapter, Readiness};
pub use buffers::{FileBufferCache, OpenFileGuard};
pub use cache::{SymbolCache, SymbolCacheEntry};
pub use handler::{LanguageServerHandle, LifecyclePhase, ProcessLaunchInfo};
pub use router::MultiServer;
pub use server::LanguageServer;
pub use symbols::{SymbolInfo, SymbolLocation};
pub use transport::JsonRpcTransport;

use std::time::Duration;
use thiserror::Error;

/// Default per-request timeout against a language server.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(240);

#[derive(Error, Debug)]
pub enum LspError {
    #[error("missing toolchain: {tool} not found ({hint})")]
    MissingToolchain { tool: String, hint: String },
    #[error("language server failed to initialize: {0}")]
    ServerInitFailed(String),
    #[error("language server unavailable: {0}")]
    ServerUnavailable(String),
    #[error("request '{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },
    #[error("language server terminated")]
    Terminated,
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("server error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error(transparent)]
    Project(#[from] sema_project::ProjectError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LspError>;
