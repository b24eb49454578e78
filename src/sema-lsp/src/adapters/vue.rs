//! The hybrid Vue adapter.
//!
//! Vue Language Server 3.x runs in hybrid mode: the Vue server handles
//! `.vue` files while a companion TypeScript server handles `.ts`/`.js`
//! files and cross-file resolution. The Vue server does not talk to a
//! tsserver itself; instead it emits `tsserver/request` notifications with
//! payload `[[request_id, method, params]]`, which the client must relay to
//! the companion as `workspace/executeCommand` (`typescript.tsserverRequest`)
//! and answer with a `tsserver/response` notification carrying
//! `[[request_id, body]]`. Breaking that relay, or skipping the `.vue`
//! pre-indexing below, silently loses cross-file references.

use crate::adapters::{resolve_executable, AdapterContext, LanguageAdapter, Readiness};
use crate::handler::{initialize_params, LanguageServerHandle, ProcessLaunchInfo};
use crate::transport::default_stderr_classifier;
use crate::{LspError, Result};
use async_trait::async_trait;
use lsp_types::{Location, Position, Url};
use sema_project::Language;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Wait after opening `.vue` files so the TypeScript server can index them.
const VUE_INDEXING_WAIT: Duration = Duration::from_secs(2);
const TS_READY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct VueAdapter {
    companion: Mutex<Option<Arc<LanguageServerHandle>>>,
    /// `.vue` documents held open on the companion for indexing. These are
    /// intentionally never closed while the adapter runs and live outside
    /// the refcounted buffer accounting.
    held_opens: Mutex<HashSet<Url>>,
}

impl VueAdapter {
    pub fn new() -> Self {
        Self {
            companion: Mutex::new(None),
            held_opens: Mutex::new(HashSet::new()),
        }
    }

    fn companion(&self) -> Option<Arc<LanguageServerHandle>> {
        self.companion.lock().unwrap().clone()
    }

    /// `node_modules/typescript/lib` for the project, or next to the Vue
    /// server installation.
    fn find_tsdk(root: &Path) -> Option<PathBuf> {
        let local = root.join("node_modules").join("typescript").join("lib");
        if local.is_dir() {
            return Some(local);
        }
        let exe = resolve_executable("vue-language-server", root)?;
        // node_modules/.bin/<exe> -> node_modules/typescript/lib
        let node_modules = exe.parent()?.parent()?;
        let sibling = node_modules.join("typescript").join("lib");
        sibling.is_dir().then_some(sibling)
    }

    /// `node_modules/@vue/typescript-plugin` for the companion's plugin
    /// registration.
    fn find_vue_ts_plugin(root: &Path) -> Option<PathBuf> {
        let local = root
            .join("node_modules")
            .join("@vue")
            .join("typescript-plugin");
        if local.is_dir() {
            return Some(local);
        }
        let exe = resolve_executable("vue-language-server", root)?;
        let node_modules = exe.parent()?.parent()?;
        let sibling = node_modules.join("@vue").join("typescript-plugin");
        sibling.is_dir().then_some(sibling)
    }

    /// Walks upward from `file_path` to the nearest `tsconfig.json` within
    /// the project root.
    fn find_tsconfig_for_file(root: &Path, file_path: &str) -> Option<PathBuf> {
        let mut dir = if file_path.is_empty() {
            root.to_path_buf()
        } else {
            Path::new(file_path).parent()?.to_path_buf()
        };
        loop {
            let candidate = dir.join("tsconfig.json");
            if candidate.is_file() {
                return Some(candidate);
            }
            if dir == root || !dir.starts_with(root) || !dir.pop() {
                break;
            }
        }
        let fallback = root.join("tsconfig.json");
        fallback.is_file().then_some(fallback)
    }

    async fn start_companion(&self, ctx: &AdapterContext) -> Result<()> {
        let ts_cmd = resolve_executable("typescript-language-server", &ctx.root).ok_or_else(|| {
            LspError::MissingToolchain {
                tool: "typescript-language-server".to_string(),
                hint: "npm install -g typescript-language-server (>= 4.4.0 for tsserverRequest support)"
                    .to_string(),
            }
        })?;

        let handle = Arc::new(LanguageServerHandle::new(
            "vue:tsserver",
            ProcessLaunchInfo::new(
                vec![ts_cmd.to_string_lossy().into_owned(), "--stdio".to_string()],
                &ctx.root,
            ),
            default_stderr_classifier(),
            None,
        ));
        handle.start()?;

        handle.on_request("client/registerCapability", Arc::new(|_| Ok(Value::Null)))?;
        handle.on_request(
            "workspace/configuration",
            Arc::new(|params: Value| {
                let count = params["items"].as_array().map(|a| a.len()).unwrap_or(0);
                Ok(json!(vec![json!({}); count]))
            }),
        )?;

        let ts_ready = Arc::new(tokio::sync::Notify::new());
        let notify_ready = ts_ready.clone();
        handle.on_notification(
            "window/logMessage",
            Arc::new(move |params: Value| {
                let message = params["message"].as_str().unwrap_or("").to_ascii_lowercase();
                debug!("[vue:tsserver] logMessage: {}", message);
                if message.contains("ready") || message.contains("initialized") {
                    notify_ready.notify_waiters();
                }
            }),
        )?;
        handle.on_notification("$/progress", Arc::new(|_| {}))?;
        handle.on_notification("textDocument/publishDiagnostics", Arc::new(|_| {}))?;

        let tsdk = Self::find_tsdk(&ctx.root);
        let plugin = Self::find_vue_ts_plugin(&ctx.root);
        let mut init_options = json!({
            "plugins": [],
            "tsserver": {},
        });
        if let Some(plugin) = &plugin {
            init_options["plugins"] = json!([{
                "name": "@vue/typescript-plugin",
                "location": plugin.to_string_lossy(),
                "languages": ["vue"],
            }]);
        } else {
            warn!("@vue/typescript-plugin not found; cross-file references into .vue files may be incomplete");
        }
        if let Some(tsdk) = &tsdk {
            init_options["tsserver"] = json!({"path": tsdk.to_string_lossy()});
        }

        info!("Starting companion TypeScript server for tsserver forwarding");
        handle
            .initialize(initialize_params(&ctx.root, Some(init_options)))
            .await?;

        // the companion does not reliably announce readiness; proceed after
        // the bound either way
        let _ = tokio::time::timeout(TS_READY_TIMEOUT, ts_ready.notified()).await;

        *self.companion.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Installs the `tsserver/request` relay on the primary transport.
    fn register_tsserver_relay(&self, ctx: &AdapterContext) -> Result<()> {
        let primary = ctx.handle.clone();
        let companion = self.companion().ok_or_else(|| {
            LspError::ServerInitFailed("companion TypeScript server not started".into())
        })?;
        let root = ctx.root.clone();

        ctx.handle.on_notification(
            "tsserver/request",
            Arc::new(move |params: Value| {
                let Some(entry) = params.as_array().and_then(|a| a.first()).cloned() else {
                    warn!("unexpected tsserver/request payload: {}", params);
                    return;
                };
                let Some(parts) = entry.as_array() else {
                    warn!("unexpected tsserver/request entry: {}", entry);
                    return;
                };
                if parts.len() < 2 {
                    warn!("tsserver/request entry too short: {}", entry);
                    return;
                }
                let request_id = parts[0].clone();
                let method = parts[1].as_str().unwrap_or("").to_string();
                let method_params = parts.get(2).cloned().unwrap_or(Value::Null);

                debug!("tsserver/request id={} method={}", request_id, method);
                let primary = primary.clone();
                let companion = companion.clone();
                let root = root.clone();
                // the reply needs a round-trip to the companion; never
                // block the reader task
                tokio::spawn(async move {
                    let body = if method == "_vue:projectInfo" {
                        let file = method_params["file"].as_str().unwrap_or("");
                        match VueAdapter::find_tsconfig_for_file(&root, file) {
                            Some(tsconfig) => {
                                json!({"configFileName": tsconfig.to_string_lossy()})
                            }
                            None => Value::Null,
                        }
                    } else {
                        let forwarded = companion
                            .execute_command(
                                "typescript.tsserverRequest",
                                vec![
                                    json!(method),
                                    method_params,
                                    json!({"isAsync": true, "lowPriority": true}),
                                ],
                            )
                            .await;
                        match forwarded {
                            // the companion wraps the payload as { body: ... }
                            Ok(result) => result.get("body").cloned().unwrap_or(result),
                            Err(e) => {
                                warn!("failed to forward tsserver request '{}': {}", method, e);
                                Value::Null
                            }
                        }
                    };
                    let response = json!([[request_id, body]]);
                    if let Err(e) = primary.notify("tsserver/response", response) {
                        warn!("failed to deliver tsserver/response: {}", e);
                    }
                });
            }),
        )?;
        Ok(())
    }

    fn find_all_vue_files(&self, ctx: &AdapterContext) -> Vec<PathBuf> {
        WalkDir::new(&ctx.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                !(e.file_type().is_dir()
                    && (self.is_ignored_dirname(&name) || name.starts_with('.')))
            })
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_type().is_file()
                    && e.path().extension().is_some_and(|ext| ext == "vue")
            })
            .filter(|e| {
                e.path()
                    .strip_prefix(&ctx.root)
                    .map(|rel| !ctx.ignore.is_ignored(rel, false))
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect()
    }

    /// Opens every `.vue` file on the companion so its on-demand indexing
    /// covers them. Files stay open for the adapter's lifetime; the scan
    /// repeats on each call so files added mid-session get picked up.
    async fn ensure_vue_files_indexed(&self, ctx: &AdapterContext) {
        let Some(companion) = self.companion() else {
            warn!("TypeScript server not available for .vue indexing");
            return;
        };

        let mut newly_opened = 0usize;
        for path in self.find_all_vue_files(ctx) {
            let Ok(uri) = Url::from_file_path(&path) else {
                continue;
            };
            {
                let held = self.held_opens.lock().unwrap();
                if held.contains(&uri) {
                    continue;
                }
            }
            let Ok(content) = sema_project::read_file(&path, &ctx.encoding) else {
                continue;
            };
            if let Err(e) = companion.did_open(uri.clone(), "vue", 0, &content) {
                debug!("failed to open {} on TypeScript server: {}", uri, e);
                continue;
            }
            self.held_opens.lock().unwrap().insert(uri);
            newly_opened += 1;
        }

        if newly_opened > 0 {
            info!(
                "Indexed {} .vue file(s) on the TypeScript server",
                newly_opened
            );
            tokio::time::sleep(VUE_INDEXING_WAIT).await;
        }
    }

    /// Opens a file on the companion for the duration of one request.
    /// Held-open indexing documents are reused without extra traffic.
    async fn with_file_on_companion<T>(
        &self,
        ctx: &AdapterContext,
        relative_path: &Path,
        run: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        let companion = self.companion().ok_or_else(|| {
            LspError::ServerUnavailable("companion TypeScript server not running".into())
        })?;
        let absolute = ctx.root.join(relative_path);
        let uri = Url::from_file_path(&absolute)
            .map_err(|_| LspError::Protocol(format!("bad path: {}", absolute.display())))?;

        let already_held = self.held_opens.lock().unwrap().contains(&uri);
        if !already_held {
            let content = sema_project::read_file(&absolute, &ctx.encoding)?;
            companion.did_open(
                uri.clone(),
                self.language_id_for_path(relative_path),
                0,
                &content,
            )?;
        }
        let result = run.await;
        if !already_held {
            let _ = companion.did_close(uri);
        }
        result
    }

    /// `volar/client/findFileReference`: where a `.vue` component file is
    /// imported, as opposed to references to a symbol inside it.
    async fn request_file_references(
        &self,
        ctx: &AdapterContext,
        relative_path: &Path,
    ) -> Vec<Location> {
        let absolute = ctx.root.join(relative_path);
        let Ok(uri) = Url::from_file_path(&absolute) else {
            return Vec::new();
        };

        let response = ctx
            .handle
            .send_request_raw(
                "volar/client/findFileReference",
                json!({"textDocument": {"uri": uri}}),
                Some(Duration::from_secs(30)),
            )
            .await;

        match response {
            Ok(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| serde_json::from_value::<Location>(item).ok())
                .collect(),
            Ok(_) => Vec::new(),
            Err(e) => {
                debug!("volar/client/findFileReference failed: {}", e);
                Vec::new()
            }
        }
    }

    fn filter_to_project(&self, ctx: &AdapterContext, locations: Vec<Location>) -> Vec<Location> {
        locations
            .into_iter()
            .filter(|loc| {
                let Ok(path) = loc.uri.to_file_path() else {
                    return false;
                };
                let Ok(rel) = path.strip_prefix(&ctx.root) else {
                    debug!("reference outside project: {}", loc.uri);
                    return false;
                };
                !ctx.ignore.is_ignored(rel, false)
            })
            .collect()
    }
}

impl Default for VueAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageAdapter for VueAdapter {
    fn language(&self) -> Language {
        Language::Vue
    }

    fn display_name(&self) -> &str {
        "Vue Language Server (hybrid)"
    }

    fn resolve_command(&self, root: &Path) -> Result<Vec<String>> {
        let exe = resolve_executable("vue-language-server", root).ok_or_else(|| {
            LspError::MissingToolchain {
                tool: "vue-language-server".to_string(),
                hint: "npm install -g @vue/language-server typescript".to_string(),
            }
        })?;
        Ok(vec![
            exe.to_string_lossy().into_owned(),
            "--stdio".to_string(),
        ])
    }

    fn initialization_options(&self, root: &Path) -> Option<Value> {
        let tsdk = Self::find_tsdk(root)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        Some(json!({
            "vue": {
                // hybrid mode: the Vue server forwards tsserver work to us
                "hybridMode": true,
            },
            "typescript": {
                "tsdk": tsdk,
            },
        }))
    }

    fn is_ignored_dirname(&self, name: &str) -> bool {
        crate::adapters::DEFAULT_IGNORED_DIRNAMES.contains(&name)
            || matches!(
                name,
                "node_modules" | "dist" | "build" | "coverage" | ".nuxt" | ".output"
            )
    }

    fn readiness(&self) -> Readiness {
        // the Vue server does not reliably announce readiness
        Readiness::LogMessage {
            needles: &["ready", "initialized"],
            timeout: Duration::from_secs(3),
            required: false,
        }
    }

    fn cross_file_wait(&self) -> Duration {
        // tsconfig processing and the plugin's cross-file map take a while
        Duration::from_secs(5)
    }

    async fn on_started(&self, ctx: &AdapterContext) -> Result<()> {
        self.start_companion(ctx).await?;
        self.register_tsserver_relay(ctx)?;
        Ok(())
    }

    async fn on_stop(&self, _ctx: &AdapterContext) {
        let held: Vec<Url> = self.held_opens.lock().unwrap().drain().collect();
        if let Some(companion) = self.companion() {
            for uri in held {
                let _ = companion.did_close(uri);
            }
            info!("Stopping companion TypeScript server");
            if let Err(e) = companion.shutdown().await {
                warn!("error stopping companion TypeScript server: {}", e);
            }
        }
        *self.companion.lock().unwrap() = None;
    }

    /// References go through the companion for `.vue` and `.ts`/`.js` files
    /// alike: it carries `@vue/typescript-plugin` and, once the `.vue`
    /// pre-indexing ran, holds the complete project picture.
    async fn references_override(
        &self,
        ctx: &AdapterContext,
        relative_path: &Path,
        position: Position,
    ) -> Option<Result<Vec<Location>>> {
        if self.companion().is_none() {
            // fall back to the primary server
            return None;
        }

        self.ensure_vue_files_indexed(ctx).await;

        let symbol_refs = self
            .with_file_on_companion(ctx, relative_path, async {
                let companion = self.companion().ok_or_else(|| {
                    LspError::ServerUnavailable("companion TypeScript server not running".into())
                })?;
                let absolute = ctx.root.join(relative_path);
                let uri = Url::from_file_path(&absolute).map_err(|_| {
                    LspError::Protocol(format!("bad path: {}", absolute.display()))
                })?;
                // includeDeclaration: the plugin reports cross-file usages
                // of .vue exports as declarations
                Ok(companion
                    .references(uri, position, true)
                    .await?
                    .unwrap_or_default())
            })
            .await;

        let mut references = match symbol_refs {
            Ok(refs) => self.filter_to_project(ctx, refs),
            Err(e) => return Some(Err(e)),
        };

        // component-level references (imports of the SFC itself)
        if relative_path.extension().is_some_and(|ext| ext == "vue") {
            let file_refs = self.request_file_references(ctx, relative_path).await;
            let file_refs = self.filter_to_project(ctx, file_refs);
            let mut seen: HashSet<(String, u32, u32)> = references
                .iter()
                .map(|r| {
                    (
                        r.uri.to_string(),
                        r.range.start.line,
                        r.range.start.character,
                    )
                })
                .collect();
            for file_ref in file_refs {
                let key = (
                    file_ref.uri.to_string(),
                    file_ref.range.start.line,
                    file_ref.range.start.character,
                );
                if seen.insert(key) {
                    references.push(file_ref);
                }
            }
        }

        Some(Ok(references))
    }

    fn held_open_count(&self) -> usize {
        self.held_opens.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn tsconfig_lookup_walks_upward_within_the_root() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/components")).unwrap();
        fs::write(root.join("tsconfig.json"), "{}").unwrap();

        let from_nested = VueAdapter::find_tsconfig_for_file(
            root,
            &root.join("src/components/App.vue").to_string_lossy(),
        );
        assert_eq!(from_nested.unwrap(), root.join("tsconfig.json"));

        let nearer = root.join("src/tsconfig.json");
        fs::write(&nearer, "{}").unwrap();
        let from_nested = VueAdapter::find_tsconfig_for_file(
            root,
            &root.join("src/components/App.vue").to_string_lossy(),
        );
        assert_eq!(from_nested.unwrap(), nearer);
    }

    #[test]
    fn tsconfig_lookup_with_empty_file_falls_back_to_root() {
        let dir = tempdir().unwrap();
        assert!(VueAdapter::find_tsconfig_for_file(dir.path(), "").is_none());
        fs::write(dir.path().join("tsconfig.json"), "{}").unwrap();
        assert_eq!(
            VueAdapter::find_tsconfig_for_file(dir.path(), "").unwrap(),
            dir.path().join("tsconfig.json")
        );
    }

    #[test]
    fn vue_init_options_request_hybrid_mode() {
        let dir = tempdir().unwrap();
        let adapter = VueAdapter::new();
        let options = adapter.initialization_options(dir.path()).unwrap();
        assert_eq!(options["vue"]["hybridMode"], true);
        assert!(options["typescript"]["tsdk"].is_string());
    }

    #[test]
    fn build_output_dirs_are_ignored() {
        let adapter = VueAdapter::new();
        for dir in ["node_modules", "dist", ".nuxt", ".output", ".git"] {
            assert!(adapter.is_ignored_dirname(dir), "{dir} should be ignored");
        }
        assert!(!adapter.is_ignored_dirname("src"));
    }
}
