//! One per-language server: adapter, handle, open-file accounting and the
//! symbol cache, combined behind the request surface the router consumes.

use crate::adapters::{create_adapter, AdapterContext, LanguageAdapter, Readiness};
use crate::buffers::{
    apply_delete, apply_insert, delete_change_event, insert_change_event, FileBufferCache,
    OpenFileGuard,
};
use crate::cache::{content_hash, SymbolCache, SymbolCacheEntry};
use crate::handler::{initialize_params, LanguageServerHandle, ProcessLaunchInfo};
use crate::symbols::{annotate_document_symbols, attach_bodies, flatten, SymbolInfo, SymbolLocation};
use crate::{LspError, Result};
use lsp_types::{
    GotoDefinitionResponse, Location, Position, SymbolKind, Url, WorkspaceEdit,
};
use sema_project::{IgnoreSpec, Language};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A started language server for one language of one project.
pub struct LanguageServer {
    language: Language,
    adapter: Arc<dyn LanguageAdapter>,
    handle: Arc<LanguageServerHandle>,
    buffers: FileBufferCache,
    cache: SymbolCache,
    root: PathBuf,
    ignore: Arc<IgnoreSpec>,
    encoding: String,
    matcher: sema_project::FilenameMatcher,
    cross_file_waited: AtomicBool,
}

impl LanguageServer {
    /// Spawns, initializes and readies the server for `language`.
    pub async fn start(
        language: Language,
        root: &Path,
        ignore: Arc<IgnoreSpec>,
        encoding: &str,
        cache_dir: &Path,
        request_timeout: Option<Duration>,
    ) -> Result<Arc<Self>> {
        let adapter = create_adapter(language)?;
        let command = adapter.resolve_command(root)?;
        info!(
            "Starting {} for {}: {:?}",
            adapter.display_name(),
            language,
            command
        );

        let handle = Arc::new(LanguageServerHandle::new(
            language.to_string(),
            ProcessLaunchInfo::new(command, root),
            adapter.stderr_classifier(),
            request_timeout,
        ));
        handle.start()?;

        // default server->client handlers; adapters may add their own
        let ready_flag = Arc::new(AtomicBool::new(false));
        let ready_notify = Arc::new(Notify::new());
        let needles: &'static [&'static str] = match adapter.readiness() {
            Readiness::LogMessage { needles, .. } => needles,
            Readiness::Immediate => &[],
        };
        {
            let server_name = language.to_string();
            let flag = ready_flag.clone();
            let notify = ready_notify.clone();
            handle.on_notification(
                "window/logMessage",
                Arc::new(move |params: Value| {
                    let message = params["message"].as_str().unwrap_or("");
                    debug!("[{}] logMessage: {}", server_name, message);
                    if !needles.is_empty() {
                        let lower = message.to_ascii_lowercase();
                        if needles.iter().any(|n| lower.contains(n)) {
                            flag.store(true, Ordering::SeqCst);
                            notify.notify_waiters();
                        }
                    }
                }),
            )?;
        }
        {
            let server_name = language.to_string();
            handle.on_notification(
                "window/showMessage",
                Arc::new(move |params: Value| {
                    info!(
                        "[{}] {}",
                        server_name,
                        params["message"].as_str().unwrap_or("")
                    );
                }),
            )?;
        }
        handle.on_notification("$/progress", Arc::new(|_| {}))?;
        handle.on_notification("textDocument/publishDiagnostics", Arc::new(|_| {}))?;
        handle.on_request("client/registerCapability", Arc::new(|_| Ok(Value::Null)))?;
        handle.on_request("window/workDoneProgress/create", Arc::new(|_| Ok(Value::Null)))?;
        handle.on_request(
            "workspace/configuration",
            Arc::new(|params: Value| {
                let count = params["items"].as_array().map(|a| a.len()).unwrap_or(0);
                Ok(json!(vec![json!({}); count]))
            }),
        )?;

        let ctx = AdapterContext {
            handle: handle.clone(),
            root: root.to_path_buf(),
            ignore: ignore.clone(),
            encoding: encoding.to_string(),
        };
        adapter.on_started(&ctx).await?;

        let params = initialize_params(root, adapter.initialization_options(root));
        handle.initialize(params).await?;

        Self::await_readiness(&adapter, language, ready_flag, ready_notify).await?;

        let cache = SymbolCache::load(&cache_dir.join(language.to_string()));

        Ok(Arc::new(Self {
            language,
            matcher: language.matcher(),
            adapter,
            handle,
            buffers: FileBufferCache::new(),
            cache,
            root: root.to_path_buf(),
            ignore,
            encoding: encoding.to_string(),
            cross_file_waited: AtomicBool::new(false),
        }))
    }

    async fn await_readiness(
        adapter: &Arc<dyn LanguageAdapter>,
        language: Language,
        flag: Arc<AtomicBool>,
        notify: Arc<Notify>,
    ) -> Result<()> {
        let Readiness::LogMessage {
            timeout, required, ..
        } = adapter.readiness()
        else {
            return Ok(());
        };

        let deadline = Instant::now() + timeout;
        while !flag.load(Ordering::SeqCst) {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                break;
            };
            if tokio::time::timeout(remaining, notify.notified())
                .await
                .is_err()
            {
                break;
            }
        }

        if flag.load(Ordering::SeqCst) {
            info!("[{}] server signalled readiness", language);
            Ok(())
        } else if required {
            Err(LspError::ServerInitFailed(format!(
                "{language}: server did not signal readiness within {timeout:?}"
            )))
        } else {
            info!(
                "[{}] no readiness signal within {:?}; proceeding",
                language, timeout
            );
            Ok(())
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub fn handle(&self) -> &Arc<LanguageServerHandle> {
        &self.handle
    }

    /// Documents the adapter intentionally holds open for indexing, exempt
    /// from the refcount accounting.
    pub fn held_open_count(&self) -> usize {
        self.adapter.held_open_count()
    }

    pub fn save_cache(&self) -> std::io::Result<()> {
        self.cache.save()
    }

    /// Stops the server, optionally flushing the symbol cache first.
    pub async fn stop(&self, save_cache: bool) {
        if save_cache {
            if let Err(e) = self.cache.save() {
                warn!("[{}] failed to save symbol cache: {}", self.language, e);
            }
        }
        self.adapter.on_stop(&self.ctx()).await;
        if let Err(e) = self.handle.shutdown().await {
            warn!("[{}] shutdown failed: {}", self.language, e);
        }
    }

    fn ctx(&self) -> AdapterContext {
        AdapterContext {
            handle: self.handle.clone(),
            root: self.root.clone(),
            ignore: self.ignore.clone(),
            encoding: self.encoding.clone(),
        }
    }

    fn absolute(&self, relative_path: &Path) -> PathBuf {
        self.root.join(relative_path)
    }

    fn uri_for(&self, relative_path: &Path) -> Result<Url> {
        Url::from_file_path(self.absolute(relative_path)).map_err(|_| {
            LspError::Protocol(format!("bad path: {}", relative_path.display()))
        })
    }

    fn rel_string(relative_path: &Path) -> String {
        relative_path.to_string_lossy().replace('\\', "/")
    }

    /// Whether this server's filename matcher claims the file.
    pub fn handles_path(&self, relative_path: &Path) -> bool {
        self.matcher.is_relevant_path(relative_path)
    }

    /// Ignored either by the project's ignore spec or by the adapter's
    /// directory list.
    pub fn is_ignored_path(&self, relative_path: &Path) -> bool {
        if self.ignore.is_ignored(relative_path, false) {
            return true;
        }
        relative_path
            .parent()
            .map(|parent| {
                parent.components().any(|c| match c {
                    std::path::Component::Normal(name) => self
                        .adapter
                        .is_ignored_dirname(&name.to_string_lossy()),
                    _ => false,
                })
            })
            .unwrap_or(false)
    }

    /// Non-ignored source files of this language, root-relative, sorted.
    pub fn source_files(&self, within: Option<&Path>) -> Vec<String> {
        let base = match within {
            Some(within) => self.absolute(within),
            None => self.root.clone(),
        };
        let adapter = &self.adapter;
        let mut files: Vec<String> = WalkDir::new(&base)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !(e.file_type().is_dir()
                        && adapter.is_ignored_dirname(&e.file_name().to_string_lossy()))
            })
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let rel = e.path().strip_prefix(&self.root).ok()?.to_path_buf();
                (self.matcher.is_relevant_path(&rel) && !self.ignore.is_ignored(&rel, false))
                    .then(|| Self::rel_string(&rel))
            })
            .collect();
        files.sort();
        files
    }

    /// Opens a file on the server, refcounted.
    pub fn open_file(&self, relative_path: &Path) -> Result<OpenFileGuard> {
        let absolute = self.absolute(relative_path);
        let uri = self.uri_for(relative_path)?;
        let language_id = self.adapter.language_id_for_path(relative_path);
        let encoding = self.encoding.clone();
        self.buffers.open(self.handle.clone(), uri, language_id, || {
            Ok(sema_project::read_file(&absolute, &encoding)?)
        })
    }

    /// Current content: the open buffer if one exists, the disk otherwise.
    pub fn retrieve_full_file_content(&self, relative_path: &Path) -> Result<String> {
        let uri = self.uri_for(relative_path)?;
        if let Some(content) = self.buffers.content_of(&uri) {
            return Ok(content);
        }
        Ok(sema_project::read_file(
            &self.absolute(relative_path),
            &self.encoding,
        )?)
    }

    /// The annotated symbol tree of one file, served from the cache when
    /// the content hash matches.
    pub async fn request_document_symbols(
        &self,
        relative_path: &Path,
        include_body: bool,
    ) -> Result<Vec<SymbolInfo>> {
        let rel = Self::rel_string(relative_path);
        let content = self.retrieve_full_file_content(relative_path)?;
        let hash = content_hash(&content);

        let mut symbols = match self.cache.get(&rel, &hash) {
            Some(entry) => {
                debug!("[{}] symbol cache hit for {}", self.language, rel);
                entry.symbols
            }
            None => {
                let guard = self.open_file(relative_path)?;
                let response = self
                    .handle
                    .document_symbols(guard.uri().clone())
                    .await?
                    .unwrap_or(lsp_types::DocumentSymbolResponse::Nested(Vec::new()));
                drop(guard);
                let symbols =
                    annotate_document_symbols(response, &self.absolute(relative_path), &rel);
                let overview = overview_pairs(&symbols);
                self.cache.insert(
                    &rel,
                    SymbolCacheEntry {
                        content_hash: hash,
                        symbols: symbols.clone(),
                        overview,
                    },
                );
                symbols
            }
        };

        if include_body {
            attach_bodies(&mut symbols, &content);
        }
        Ok(symbols)
    }

    /// Flat `(name_path, kind)` overview of one file.
    pub async fn request_overview(
        &self,
        relative_path: &Path,
    ) -> Result<Vec<(String, SymbolKind)>> {
        let rel = Self::rel_string(relative_path);
        let content = self.retrieve_full_file_content(relative_path)?;
        let hash = content_hash(&content);
        if let Some(entry) = self.cache.get(&rel, &hash) {
            return Ok(entry.overview);
        }
        let symbols = self.request_document_symbols(relative_path, false).await?;
        Ok(overview_pairs(&symbols))
    }

    /// Symbol trees of every source file, optionally restricted to a
    /// subtree of the project.
    pub async fn request_full_symbol_tree(
        &self,
        within: Option<&Path>,
        include_body: bool,
    ) -> Result<Vec<(String, Vec<SymbolInfo>)>> {
        let mut result = Vec::new();
        for file in self.source_files(within) {
            let path = PathBuf::from(&file);
            match self.request_document_symbols(&path, include_body).await {
                Ok(symbols) => result.push((file, symbols)),
                Err(e) => warn!("[{}] skipping {}: {}", self.language, file, e),
            }
        }
        Ok(result)
    }

    async fn wait_for_cross_file_indexing(&self) {
        if !self.cross_file_waited.swap(true, Ordering::SeqCst) {
            let wait = self.adapter.cross_file_wait();
            debug!(
                "[{}] waiting {:?} before first cross-file query",
                self.language, wait
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// References to the symbol at `position`, filtered to non-ignored
    /// project files.
    pub async fn request_references(
        &self,
        relative_path: &Path,
        position: Position,
    ) -> Result<Vec<Location>> {
        self.wait_for_cross_file_indexing().await;

        if let Some(result) = self
            .adapter
            .references_override(&self.ctx(), relative_path, position)
            .await
        {
            return result;
        }

        let guard = self.open_file(relative_path)?;
        let response = self
            .handle
            .references(guard.uri().clone(), position, false)
            .await?
            .unwrap_or_default();
        drop(guard);

        Ok(self.filter_locations(response))
    }

    fn filter_locations(&self, locations: Vec<Location>) -> Vec<Location> {
        locations
            .into_iter()
            .filter(|location| {
                let Ok(path) = location.uri.to_file_path() else {
                    return false;
                };
                match path.strip_prefix(&self.root) {
                    Ok(rel) => !self.is_ignored_path(rel),
                    Err(_) => {
                        debug!("[{}] dropping out-of-project result: {}", self.language, location.uri);
                        false
                    }
                }
            })
            .collect()
    }

    /// Definition(s) of the symbol at `position`.
    pub async fn request_definition(
        &self,
        relative_path: &Path,
        position: Position,
    ) -> Result<Vec<SymbolLocation>> {
        let guard = self.open_file(relative_path)?;
        let response = self
            .handle
            .definition(guard.uri().clone(), position)
            .await?;
        drop(guard);

        // (location, selection range) pairs; links carry both ranges
        let locations: Vec<(Location, Option<lsp_types::Range>)> = match response {
            None => Vec::new(),
            Some(GotoDefinitionResponse::Scalar(location)) => vec![(location, None)],
            Some(GotoDefinitionResponse::Array(locations)) => {
                locations.into_iter().map(|l| (l, None)).collect()
            }
            Some(GotoDefinitionResponse::Link(links)) => links
                .into_iter()
                .map(|link| {
                    (
                        Location {
                            uri: link.target_uri,
                            range: link.target_range,
                        },
                        Some(link.target_selection_range),
                    )
                })
                .collect(),
        };

        Ok(locations
            .into_iter()
            .filter_map(|(location, selection_range)| {
                let path = location.uri.to_file_path().ok()?;
                let rel = path.strip_prefix(&self.root).ok()?;
                if self.is_ignored_path(rel) {
                    return None;
                }
                Some(SymbolLocation {
                    absolute_path: path.display().to_string(),
                    relative_path: Self::rel_string(rel),
                    range: location.range,
                    selection_range,
                })
            })
            .collect())
    }

    /// Workspace edit for renaming the symbol at `position`. `None` when
    /// the server had nothing to rename.
    pub async fn request_rename(
        &self,
        relative_path: &Path,
        position: Position,
        new_name: &str,
    ) -> Result<Option<WorkspaceEdit>> {
        let guard = self.open_file(relative_path)?;
        let response = self
            .handle
            .rename(guard.uri().clone(), position, new_name)
            .await?;
        drop(guard);
        Ok(response.filter(|edit| {
            edit.changes.as_ref().is_some_and(|c| !c.is_empty())
                || edit.document_changes.is_some()
        }))
    }

    /// Inserts `text` at `position`: buffer, `didChange`, disk, cache.
    /// Returns the position just past the inserted text.
    pub fn insert_text_at_position(
        &self,
        relative_path: &Path,
        position: Position,
        text: &str,
    ) -> Result<Position> {
        let guard = self.open_file(relative_path)?;
        let content = guard.content();
        let (new_content, end) = apply_insert(&content, position, text);
        guard.apply_change(new_content.clone(), insert_change_event(position, text))?;
        sema_project::write_file(&self.absolute(relative_path), &new_content, &self.encoding)?;
        self.handle.did_save(guard.uri().clone())?;
        self.cache.invalidate(&Self::rel_string(relative_path));
        Ok(end)
    }

    /// Deletes the text between `start` and `end`, returning it.
    pub fn delete_text_between_positions(
        &self,
        relative_path: &Path,
        start: Position,
        end: Position,
    ) -> Result<String> {
        let guard = self.open_file(relative_path)?;
        let content = guard.content();
        let (new_content, deleted) = apply_delete(&content, start, end);
        guard.apply_change(new_content.clone(), delete_change_event(start, end))?;
        sema_project::write_file(&self.absolute(relative_path), &new_content, &self.encoding)?;
        self.handle.did_save(guard.uri().clone())?;
        self.cache.invalidate(&Self::rel_string(relative_path));
        Ok(deleted)
    }

    /// Invalidate cached state after a whole-file write that bypassed the
    /// buffered edit path.
    pub fn mark_file_changed(&self, relative_path: &Path) {
        self.cache.invalidate(&Self::rel_string(relative_path));
    }
}

/// Flat `(name_path, kind)` pairs of a symbol forest.
pub fn overview_pairs(symbols: &[SymbolInfo]) -> Vec<(String, SymbolKind)> {
    flatten(symbols)
        .into_iter()
        .map(|s| (s.name_path.clone(), s.kind))
        .collect()
}
