//! Routing across the active language servers of one project.
//!
//! Holds one started [`LanguageServer`] per activated language, in
//! activation order. Per-file requests go to the server whose filename
//! matcher claims the file (ties broken by activation order, falling back
//! to the first server). Fan-out operations query every server, tolerate
//! per-server failures and merge results.

use crate::server::LanguageServer;
use crate::{LspError, Result};
use indexmap::IndexMap;
use lsp_types::SymbolKind;
use sema_project::{IgnoreSpec, Language};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// A second restart attempt within this window surfaces
/// [`LspError::ServerUnavailable`] instead.
const RESTART_BACKOFF: Duration = Duration::from_secs(60);

/// Recreates language servers for restart and dynamic activation.
#[derive(Clone)]
pub struct ServerFactory {
    pub root: PathBuf,
    pub ignore: Arc<IgnoreSpec>,
    pub encoding: String,
    pub cache_dir: PathBuf,
    pub request_timeout: Option<Duration>,
}

impl ServerFactory {
    pub async fn create(&self, language: Language) -> Result<Arc<LanguageServer>> {
        LanguageServer::start(
            language,
            &self.root,
            self.ignore.clone(),
            &self.encoding,
            &self.cache_dir,
            self.request_timeout,
        )
        .await
    }
}

/// The set of active language servers for one project.
pub struct MultiServer {
    factory: ServerFactory,
    servers: RwLock<IndexMap<Language, Arc<LanguageServer>>>,
    restart_failures: Mutex<HashMap<Language, Instant>>,
}

impl MultiServer {
    /// Starts servers for all `languages` in parallel. If any fails, the
    /// already-started servers are stopped and the aggregated failure is
    /// returned.
    pub async fn start(factory: ServerFactory, languages: &[Language]) -> Result<Self> {
        let mut join_set = JoinSet::new();
        for &language in languages {
            let factory = factory.clone();
            join_set.spawn(async move {
                let started = Instant::now();
                let result = factory.create(language).await;
                if result.is_ok() {
                    info!(
                        "Language server startup (language={}) took {:?}",
                        language,
                        started.elapsed()
                    );
                }
                (language, result)
            });
        }

        let mut started: HashMap<Language, Arc<LanguageServer>> = HashMap::new();
        let mut failures: Vec<(Language, LspError)> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((language, Ok(server))) => {
                    started.insert(language, server);
                }
                Ok((language, Err(e))) => {
                    error!("Failed to start language server for {}: {}", language, e);
                    failures.push((language, e));
                }
                Err(e) => {
                    error!("Language server startup task panicked: {}", e);
                }
            }
        }

        if !failures.is_empty() {
            for server in started.values() {
                server.stop(false).await;
            }
            let detail = failures
                .iter()
                .map(|(language, e)| format!("{language}: {e}"))
                .collect::<Vec<_>>()
                .join("\n");
            return Err(LspError::ServerInitFailed(format!(
                "failed to start language servers:\n{detail}"
            )));
        }

        // preserve the configured activation order
        let mut servers = IndexMap::new();
        for &language in languages {
            if let Some(server) = started.remove(&language) {
                servers.insert(language, server);
            }
        }

        Ok(Self {
            factory,
            servers: RwLock::new(servers),
            restart_failures: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.factory.root
    }

    pub fn ignore(&self) -> &Arc<IgnoreSpec> {
        &self.factory.ignore
    }

    pub async fn active_languages(&self) -> Vec<Language> {
        self.servers.read().await.keys().copied().collect()
    }

    /// Snapshot of all active servers, in activation order.
    pub async fn all_servers(&self) -> Vec<Arc<LanguageServer>> {
        self.servers.read().await.values().cloned().collect()
    }

    pub async fn get_server(&self, language: Language) -> Result<Arc<LanguageServer>> {
        let server = self
            .servers
            .read()
            .await
            .get(&language)
            .cloned()
            .ok_or_else(|| {
                LspError::ServerUnavailable(format!("no active server for {language}"))
            })?;
        self.ensure_functional(language, server).await
    }

    /// The server whose matcher claims the path; activation order breaks
    /// ties and the first server is the fallback.
    pub async fn server_for_path(&self, relative_path: &Path) -> Result<Arc<LanguageServer>> {
        let (language, server) = {
            let servers = self.servers.read().await;
            let chosen = servers
                .iter()
                .find(|(_, server)| server.handles_path(relative_path))
                .or_else(|| servers.iter().next())
                .ok_or_else(|| {
                    LspError::ServerUnavailable("no language servers are active".into())
                })?;
            (*chosen.0, chosen.1.clone())
        };
        self.ensure_functional(language, server).await
    }

    /// One automatic restart for a dead server; a second consecutive
    /// failure within the backoff window is surfaced to the caller.
    async fn ensure_functional(
        &self,
        language: Language,
        server: Arc<LanguageServer>,
    ) -> Result<Arc<LanguageServer>> {
        if server.is_running() {
            return Ok(server);
        }

        {
            let failures = self.restart_failures.lock().unwrap();
            if let Some(last) = failures.get(&language) {
                if last.elapsed() < RESTART_BACKOFF {
                    return Err(LspError::ServerUnavailable(format!(
                        "{language}: server died and its restart failed {:?} ago",
                        last.elapsed()
                    )));
                }
            }
        }

        warn!("[{}] server is not running; restarting", language);
        match self.factory.create(language).await {
            Ok(new_server) => {
                self.restart_failures.lock().unwrap().remove(&language);
                self.servers
                    .write()
                    .await
                    .insert(language, new_server.clone());
                Ok(new_server)
            }
            Err(e) => {
                self.restart_failures
                    .lock()
                    .unwrap()
                    .insert(language, Instant::now());
                Err(LspError::ServerUnavailable(format!(
                    "{language}: automatic restart failed: {e}"
                )))
            }
        }
    }

    /// Stops and recreates the server for `language` in place.
    pub async fn restart(&self, language: Language) -> Result<Arc<LanguageServer>> {
        let existing = self.servers.read().await.get(&language).cloned();
        let Some(existing) = existing else {
            return Err(LspError::ServerUnavailable(format!(
                "no active server for {language}; cannot restart"
            )));
        };
        existing.stop(true).await;
        let new_server = self.factory.create(language).await?;
        self.servers
            .write()
            .await
            .insert(language, new_server.clone());
        Ok(new_server)
    }

    /// Dynamically activates a language.
    pub async fn add(&self, language: Language) -> Result<Arc<LanguageServer>> {
        if self.servers.read().await.contains_key(&language) {
            return Err(LspError::ServerInitFailed(format!(
                "server for {language} is already active"
            )));
        }
        let server = self.factory.create(language).await?;
        self.servers
            .write()
            .await
            .insert(language, server.clone());
        Ok(server)
    }

    /// Deactivates a language, stopping its server.
    pub async fn remove(&self, language: Language, save_cache: bool) -> Result<()> {
        let removed = self.servers.write().await.shift_remove(&language);
        match removed {
            Some(server) => {
                server.stop(save_cache).await;
                Ok(())
            }
            None => Err(LspError::ServerUnavailable(format!(
                "no active server for {language}; cannot remove"
            ))),
        }
    }

    pub async fn save_all_caches(&self) {
        for server in self.all_servers().await {
            if let Err(e) = server.save_cache() {
                error!(
                    "Error saving symbol cache for {}: {}",
                    server.language(),
                    e
                );
            }
        }
    }

    pub async fn stop_all(&self, save_cache: bool) {
        for server in self.all_servers().await {
            info!("Stopping language server for {}", server.language());
            server.stop(save_cache).await;
        }
        self.servers.write().await.clear();
    }

    pub async fn is_running(&self) -> bool {
        let servers = self.servers.read().await;
        !servers.is_empty() && servers.values().all(|s| s.is_running())
    }

    /// Symbol trees across servers. Per-server failures are logged and the
    /// remaining results returned; a file claimed by several matchers is
    /// reported once, by the first server in activation order.
    pub async fn full_symbol_tree(
        &self,
        within: Option<&Path>,
        include_body: bool,
        language: Option<Language>,
    ) -> Result<Vec<(String, Vec<crate::symbols::SymbolInfo>)>> {
        let servers = match language {
            Some(language) => vec![self.get_server(language).await?],
            None => self.all_servers().await,
        };

        let mut seen_files = std::collections::HashSet::new();
        let mut result = Vec::new();
        for server in servers {
            match server.request_full_symbol_tree(within, include_body).await {
                Ok(trees) => {
                    for (file, symbols) in trees {
                        if seen_files.insert(file.clone()) {
                            result.push((file, symbols));
                        }
                    }
                }
                Err(e) => warn!(
                    "full symbol tree failed for {}: {}",
                    server.language(),
                    e
                ),
            }
        }
        Ok(result)
    }

    /// Per-file overviews of a directory across servers.
    pub async fn overview_directory(
        &self,
        within: &Path,
        language: Option<Language>,
    ) -> Result<HashMap<String, Vec<(String, SymbolKind)>>> {
        let servers = match language {
            Some(language) => vec![self.get_server(language).await?],
            None => self.all_servers().await,
        };

        let mut result: HashMap<String, Vec<(String, SymbolKind)>> = HashMap::new();
        for server in servers {
            let within = if within.as_os_str().is_empty() {
                None
            } else {
                Some(within)
            };
            for file in server.source_files(within) {
                if result.contains_key(&file) {
                    continue;
                }
                match server.request_overview(Path::new(&file)).await {
                    Ok(overview) => {
                        result.insert(file, overview);
                    }
                    Err(e) => warn!("overview failed for {}: {}", file, e),
                }
            }
        }
        Ok(result)
    }

    /// Union of every server's source files (deduplicated, sorted).
    pub async fn all_source_files(&self, language: Option<Language>) -> Result<Vec<String>> {
        let servers = match language {
            Some(language) => vec![self.get_server(language).await?],
            None => self.all_servers().await,
        };
        let mut files = std::collections::BTreeSet::new();
        for server in servers {
            files.extend(server.source_files(None));
        }
        Ok(files.into_iter().collect())
    }
}
