//! The symbol service: the language-neutral surface consumed by the agent
//! tools.
//!
//! Every operation takes root-relative paths, validates them against the
//! project root and the ignore spec, and runs serialised on the project's
//! task executor with the tool timeout. Editing operations additionally
//! honour the read-only flag and the read-before-edit guard.

use crate::lines_read::LinesRead;
use crate::name_path::NamePathPattern;
use crate::text::{content_around_line, search_content, MatchedLines};
use crate::{Result, ServiceError};
use lsp_types::{Position, Range, SymbolKind, WorkspaceEdit};
use sema_lsp::router::{MultiServer, ServerFactory};
use sema_lsp::symbols::{attach_bodies, flatten, innermost_enclosing, SymbolInfo, SymbolLocation};
use sema_project::{
    resolve_relative_path, IgnoreSpec, Language, ProjectConfig, SemaPaths,
};
use sema_tasks::{TaskExecutor, TaskInfo};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Options for [`SymbolService::find_symbols_by_name_path`].
#[derive(Debug, Clone, Default)]
pub struct FindSymbolsOptions {
    /// Restrict the search to one file or directory.
    pub within_relative_path: Option<PathBuf>,
    pub include_kinds: Option<Vec<SymbolKind>>,
    pub exclude_kinds: Option<Vec<SymbolKind>>,
    /// Substring-match the final segment of the name path.
    pub substring_matching: bool,
    pub include_body: bool,
    /// How many levels of descendants to include in results.
    pub depth: u32,
    /// Restrict to the server of one language.
    pub language: Option<Language>,
}

/// Options for [`SymbolService::search_pattern`].
#[derive(Debug, Clone)]
pub struct SearchPatternOptions {
    /// File or directory to search; empty means the whole project.
    pub relative_path: PathBuf,
    pub context_lines_before: u32,
    pub context_lines_after: u32,
    pub paths_include_glob: Option<String>,
    pub paths_exclude_glob: Option<String>,
    /// Only scan files handled by an active adapter.
    pub restrict_to_code_files: bool,
    pub language: Option<Language>,
}

impl Default for SearchPatternOptions {
    fn default() -> Self {
        Self {
            relative_path: PathBuf::new(),
            context_lines_before: 0,
            context_lines_after: 0,
            paths_include_glob: None,
            paths_exclude_glob: None,
            restrict_to_code_files: true,
            language: None,
        }
    }
}

/// A reference location together with its innermost enclosing symbol.
#[derive(Debug, Clone)]
pub struct ReferencingSymbol {
    /// The symbol containing the reference (children pruned).
    pub symbol: SymbolInfo,
    pub relative_path: String,
    pub reference_range: Range,
    /// A short code excerpt around the reference; absent when the full
    /// body was requested instead.
    pub snippet: Option<MatchedLines>,
}

/// Result of [`SymbolService::overview`].
#[derive(Debug, Clone)]
pub enum OverviewResult {
    File(Vec<(String, SymbolKind)>),
    Directory(HashMap<String, Vec<(String, SymbolKind)>>),
}

/// The activated symbol service for one project.
pub struct SymbolService {
    config: Arc<ProjectConfig>,
    root: PathBuf,
    multi: Arc<MultiServer>,
    executor: Arc<TaskExecutor>,
    lines_read: Arc<Mutex<LinesRead>>,
}

impl SymbolService {
    /// Activates the project: builds the ignore spec, starts a language
    /// server per configured language (in parallel) and the task executor.
    pub async fn activate(config: ProjectConfig) -> Result<Self> {
        let root = config
            .project_root
            .canonicalize()
            .map_err(sema_project::ProjectError::Io)?;
        let ignore = Arc::new(IgnoreSpec::build(
            &root,
            &config.ignored_paths,
            config.honor_gitignore,
        )?);
        let paths = SemaPaths::resolve();
        let factory = ServerFactory {
            root: root.clone(),
            ignore,
            encoding: config.encoding.clone(),
            cache_dir: paths.project_cache_dir(&root),
            request_timeout: Some(config.tool_timeout()),
        };
        let multi = Arc::new(MultiServer::start(factory, &config.languages).await?);
        let executor = Arc::new(TaskExecutor::new(format!(
            "sema:{}",
            root.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| root.display().to_string())
        )));
        info!(
            "Activated project at {} with {} language server(s)",
            root.display(),
            config.languages.len()
        );
        Ok(Self {
            config: Arc::new(config),
            root,
            multi,
            executor,
            lines_read: Arc::new(Mutex::new(LinesRead::new())),
        })
    }

    /// Stops all language servers, flushing their symbol caches.
    pub async fn deactivate(&self) {
        self.multi.stop_all(true).await;
    }

    pub fn project_root(&self) -> &Path {
        &self.root
    }

    pub fn multi(&self) -> &Arc<MultiServer> {
        &self.multi
    }

    /// Running and queued tasks, for introspection and cancellation.
    pub fn get_current_tasks(&self) -> Vec<TaskInfo> {
        self.executor.get_current_tasks()
    }

    pub fn last_executed_task(&self) -> Option<TaskInfo> {
        self.executor.last_executed_task()
    }

    // -- validation helpers ----------------------------------------------

    /// Resolves a relative path, rejecting escapes and ignored paths.
    fn validate_path(&self, relative_path: &Path) -> Result<PathBuf> {
        let absolute = resolve_relative_path(&self.root, relative_path)?;
        let rel = absolute
            .strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| relative_path.to_path_buf());
        if self.multi.ignore().is_ignored(&rel, absolute.is_dir()) {
            return Err(ServiceError::PathIgnored(
                relative_path.display().to_string(),
            ));
        }
        Ok(absolute)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.config.read_only {
            return Err(ServiceError::ReadOnly);
        }
        Ok(())
    }

    fn invalidate_lines_read(&self, relative_path: &Path) {
        self.lines_read
            .lock()
            .unwrap()
            .invalidate(&rel_string(relative_path));
    }

    /// Runs `f` on the task executor with the tool timeout.
    async fn run<T, F, Fut>(&self, name: &str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let timeout = self.config.tool_timeout();
        let task = self.executor.issue_task(f, name.to_string(), Some(timeout));
        match task.result_timeout(timeout).await {
            Ok(result) => result,
            Err(task_error) => Err(task_error.into()),
        }
    }

    // -- symbol queries ---------------------------------------------------

    /// Symbols matching a name-path pattern (see [`NamePathPattern`]).
    pub async fn find_symbols_by_name_path(
        &self,
        name_path: &str,
        options: FindSymbolsOptions,
    ) -> Result<Vec<SymbolInfo>> {
        let pattern = NamePathPattern::parse(name_path);
        if pattern.is_empty() {
            return Err(ServiceError::InvalidPattern(
                "empty name path".to_string(),
            ));
        }
        let within_abs = options
            .within_relative_path
            .as_deref()
            .map(|p| self.validate_path(p))
            .transpose()?;

        let multi = self.multi.clone();
        let options_task = options.clone();
        self.run("find_symbols_by_name_path", move || async move {
            let within_is_file = within_abs.as_ref().is_some_and(|p| p.is_file());
            let trees = if within_is_file {
                let within = options_task
                    .within_relative_path
                    .as_deref()
                    .unwrap_or(Path::new(""));
                let server = multi.server_for_path(within).await?;
                let symbols = server.request_document_symbols(within, false).await?;
                vec![(rel_string(within), symbols)]
            } else {
                multi
                    .full_symbol_tree(
                        options_task.within_relative_path.as_deref(),
                        false,
                        options_task.language,
                    )
                    .await?
            };

            let mut matches: Vec<(String, SymbolInfo)> = Vec::new();
            for (file, roots) in &trees {
                for root_symbol in roots {
                    for node in root_symbol.iter_tree() {
                        if pattern.matches(&node.name_path, options_task.substring_matching)
                            && kind_allowed(
                                node.kind,
                                &options_task.include_kinds,
                                &options_task.exclude_kinds,
                            )
                        {
                            matches.push((file.clone(), node.pruned(options_task.depth)));
                        }
                    }
                }
            }

            if options_task.include_body {
                let mut contents: HashMap<String, String> = HashMap::new();
                for (file, symbol) in &mut matches {
                    if !contents.contains_key(file) {
                        let server = multi.server_for_path(Path::new(file)).await?;
                        let content = server.retrieve_full_file_content(Path::new(file))?;
                        contents.insert(file.clone(), content);
                    }
                    attach_bodies(std::slice::from_mut(symbol), &contents[file]);
                }
            }

            debug!("find_symbols: {} match(es)", matches.len());
            Ok(matches.into_iter().map(|(_, symbol)| symbol).collect())
        })
        .await
    }

    /// Symbol trees of the whole project (or a subtree).
    pub async fn full_symbol_tree(
        &self,
        within_relative_path: Option<&Path>,
        include_body: bool,
        language: Option<Language>,
    ) -> Result<Vec<(String, Vec<SymbolInfo>)>> {
        if let Some(within) = within_relative_path {
            self.validate_path(within)?;
        }
        let multi = self.multi.clone();
        let within = within_relative_path.map(Path::to_path_buf);
        self.run("full_symbol_tree", move || async move {
            Ok(multi
                .full_symbol_tree(within.as_deref(), include_body, language)
                .await?)
        })
        .await
    }

    /// For each reference to the symbol named by `name_path` in
    /// `relative_file_path`: the innermost enclosing symbol plus a short
    /// excerpt. References to the symbol's own declaration are excluded.
    pub async fn find_referencing_symbols(
        &self,
        name_path: &str,
        relative_file_path: &Path,
        include_body: bool,
        include_kinds: Option<Vec<SymbolKind>>,
        exclude_kinds: Option<Vec<SymbolKind>>,
    ) -> Result<Vec<ReferencingSymbol>> {
        self.validate_path(relative_file_path)?;
        let pattern = NamePathPattern::parse(name_path);
        if pattern.is_empty() {
            return Err(ServiceError::InvalidPattern("empty name path".to_string()));
        }

        let multi = self.multi.clone();
        let root = self.root.clone();
        let source_rel = relative_file_path.to_path_buf();
        let name_path = name_path.to_string();
        self.run("find_referencing_symbols", move || async move {
            let server = multi.server_for_path(&source_rel).await?;
            let symbols = server.request_document_symbols(&source_rel, false).await?;
            let source_symbol = unique_match(&symbols, &pattern, &name_path)?;
            let position = source_symbol.query_position();

            let locations = server.request_references(&source_rel, position).await?;

            let mut seen: HashSet<(String, u32, u32)> = HashSet::new();
            let mut result = Vec::new();
            for location in locations {
                let key = (
                    location.uri.to_string(),
                    location.range.start.line,
                    location.range.start.character,
                );
                if !seen.insert(key) {
                    continue;
                }
                let Ok(target_abs) = location.uri.to_file_path() else {
                    continue;
                };
                let Ok(target_rel) = target_abs.strip_prefix(&root) else {
                    continue;
                };

                // skip the declaration itself
                if rel_string(target_rel) == rel_string(&source_rel) {
                    if let Some(selection) = source_symbol.location.selection_range {
                        if position_within(location.range.start, selection) {
                            continue;
                        }
                    }
                }

                let target_server = multi.server_for_path(target_rel).await?;
                let target_symbols = target_server
                    .request_document_symbols(target_rel, false)
                    .await?;
                let Some(enclosing) =
                    innermost_enclosing(&target_symbols, location.range.start)
                else {
                    debug!(
                        "reference at {}:{} has no enclosing symbol; skipping",
                        rel_string(target_rel),
                        location.range.start.line
                    );
                    continue;
                };
                if !kind_allowed(enclosing.kind, &include_kinds, &exclude_kinds) {
                    continue;
                }

                let mut symbol = enclosing.pruned(0);
                let content = target_server.retrieve_full_file_content(target_rel)?;
                let snippet = if include_body {
                    attach_bodies(std::slice::from_mut(&mut symbol), &content);
                    None
                } else {
                    Some(content_around_line(
                        &content,
                        location.range.start.line,
                        1,
                        1,
                    ))
                };

                result.push(ReferencingSymbol {
                    symbol,
                    relative_path: rel_string(target_rel),
                    reference_range: location.range,
                    snippet,
                });
            }
            debug!("find_referencing_symbols: {} reference(s)", result.len());
            Ok(result)
        })
        .await
    }

    /// Definition locations of the symbol at a position.
    pub async fn find_definition(
        &self,
        relative_file_path: &Path,
        line: u32,
        column: u32,
    ) -> Result<Vec<SymbolLocation>> {
        self.validate_path(relative_file_path)?;
        let multi = self.multi.clone();
        let rel = relative_file_path.to_path_buf();
        self.run("find_definition", move || async move {
            let server = multi.server_for_path(&rel).await?;
            Ok(server
                .request_definition(&rel, Position::new(line, column))
                .await?)
        })
        .await
    }

    /// Workspace edit for a rename; nothing is applied here.
    pub async fn rename_symbol(
        &self,
        relative_file_path: &Path,
        line: u32,
        column: u32,
        new_name: &str,
    ) -> Result<WorkspaceEdit> {
        self.validate_path(relative_file_path)?;
        self.ensure_writable()?;
        let multi = self.multi.clone();
        let rel = relative_file_path.to_path_buf();
        let new_name = new_name.to_string();
        self.run("rename_symbol", move || async move {
            let server = multi.server_for_path(&rel).await?;
            server
                .request_rename(&rel, Position::new(line, column), &new_name)
                .await?
                .ok_or_else(|| {
                    ServiceError::SymbolNotFound(format!(
                        "{}:{}:{}",
                        rel_string(&rel),
                        line,
                        column
                    ))
                })
        })
        .await
    }

    // -- editing ----------------------------------------------------------

    /// Replaces the body of the symbol named by `name_path`.
    pub async fn replace_symbol_body(
        &self,
        name_path: &str,
        relative_file_path: &Path,
        body: &str,
    ) -> Result<()> {
        self.validate_path(relative_file_path)?;
        self.ensure_writable()?;
        let pattern = NamePathPattern::parse(name_path);
        let multi = self.multi.clone();
        let rel = relative_file_path.to_path_buf();
        let name_path = name_path.to_string();
        let body = body.to_string();
        let result = self
            .run("replace_symbol_body", move || async move {
                let server = multi.server_for_path(&rel).await?;
                let symbols = server.request_document_symbols(&rel, false).await?;
                let symbol = unique_match(&symbols, &pattern, &name_path)?;
                let range = symbol.location.range;
                server.delete_text_between_positions(&rel, range.start, range.end)?;
                server.insert_text_at_position(&rel, range.start, &body)?;
                Ok(())
            })
            .await;
        if result.is_ok() {
            self.invalidate_lines_read(relative_file_path);
        }
        result
    }

    /// Inserts `body` on the line where the symbol begins.
    pub async fn insert_before_symbol(
        &self,
        name_path: &str,
        relative_file_path: &Path,
        body: &str,
    ) -> Result<()> {
        self.insert_relative_to_symbol(name_path, relative_file_path, body, true)
            .await
    }

    /// Inserts `body` on the line after the symbol ends.
    pub async fn insert_after_symbol(
        &self,
        name_path: &str,
        relative_file_path: &Path,
        body: &str,
    ) -> Result<()> {
        self.insert_relative_to_symbol(name_path, relative_file_path, body, false)
            .await
    }

    async fn insert_relative_to_symbol(
        &self,
        name_path: &str,
        relative_file_path: &Path,
        body: &str,
        before: bool,
    ) -> Result<()> {
        self.validate_path(relative_file_path)?;
        self.ensure_writable()?;
        let pattern = NamePathPattern::parse(name_path);
        let multi = self.multi.clone();
        let rel = relative_file_path.to_path_buf();
        let name_path = name_path.to_string();
        let mut body = body.to_string();
        if !body.ends_with('\n') {
            body.push('\n');
        }
        let result = self
            .run("insert_relative_to_symbol", move || async move {
                let server = multi.server_for_path(&rel).await?;
                let symbols = server.request_document_symbols(&rel, false).await?;
                let symbol = unique_match(&symbols, &pattern, &name_path)?;
                let range = symbol.location.range;
                let line = if before {
                    range.start.line
                } else {
                    range.end.line + 1
                };
                server.insert_text_at_position(&rel, Position::new(line, 0), &body)?;
                Ok(())
            })
            .await;
        if result.is_ok() {
            self.invalidate_lines_read(relative_file_path);
        }
        result
    }

    /// Inserts content at a 0-based line.
    pub async fn insert_at_line(
        &self,
        relative_path: &Path,
        line: u32,
        content: &str,
    ) -> Result<()> {
        self.validate_path(relative_path)?;
        self.ensure_writable()?;
        let multi = self.multi.clone();
        let rel = relative_path.to_path_buf();
        let content = content.to_string();
        let result = self
            .run("insert_at_line", move || async move {
                let server = multi.server_for_path(&rel).await?;
                server.insert_text_at_position(&rel, Position::new(line, 0), &content)?;
                Ok(())
            })
            .await;
        if result.is_ok() {
            self.invalidate_lines_read(relative_path);
        }
        result
    }

    /// Deletes lines `start_line..=end_line`. The same range must have
    /// been read via [`Self::read_file`] first.
    pub async fn delete_lines(
        &self,
        relative_path: &Path,
        start_line: u32,
        end_line: u32,
    ) -> Result<()> {
        self.validate_path(relative_path)?;
        self.ensure_writable()?;
        let rel = rel_string(relative_path);
        if !self
            .lines_read
            .lock()
            .unwrap()
            .were_lines_read(&rel, (start_line, end_line))
        {
            return Err(ServiceError::LinesNotRead {
                path: rel,
                start_line,
                end_line,
            });
        }

        let multi = self.multi.clone();
        let rel_path = relative_path.to_path_buf();
        let result = self
            .run("delete_lines", move || async move {
                let server = multi.server_for_path(&rel_path).await?;
                server.delete_text_between_positions(
                    &rel_path,
                    Position::new(start_line, 0),
                    Position::new(end_line + 1, 0),
                )?;
                Ok(())
            })
            .await;
        if result.is_ok() {
            self.invalidate_lines_read(relative_path);
        }
        result
    }

    /// Replaces lines `start_line..=end_line` with `content`. Requires the
    /// same range to have been read first.
    pub async fn replace_lines(
        &self,
        relative_path: &Path,
        start_line: u32,
        end_line: u32,
        content: &str,
    ) -> Result<()> {
        let mut content = content.to_string();
        if !content.ends_with('\n') {
            content.push('\n');
        }
        self.delete_lines(relative_path, start_line, end_line)
            .await?;
        self.insert_at_line(relative_path, start_line, &content)
            .await
    }

    // -- files ------------------------------------------------------------

    /// Reads a file, optionally sliced to a 0-based inclusive line range.
    /// Reading an explicit range records it for the read-before-edit guard.
    pub async fn read_file(
        &self,
        relative_path: &Path,
        start_line: Option<u32>,
        end_line: Option<u32>,
    ) -> Result<String> {
        let absolute = self.validate_path(relative_path)?;
        let content = sema_project::read_file(&absolute, &self.config.encoding)?;
        let lines: Vec<&str> = content.split('\n').collect();
        let start = start_line.unwrap_or(0) as usize;
        let result = match end_line {
            Some(end) => {
                self.lines_read.lock().unwrap().add_lines_read(
                    &rel_string(relative_path),
                    (start_line.unwrap_or(0), end),
                );
                let end = (end as usize).min(lines.len().saturating_sub(1));
                if start >= lines.len() || end < start {
                    String::new()
                } else {
                    lines[start..=end].join("\n")
                }
            }
            None => {
                if start == 0 {
                    content
                } else if start >= lines.len() {
                    String::new()
                } else {
                    lines[start..].join("\n")
                }
            }
        };
        Ok(result)
    }

    /// Creates or overwrites a file with `content`.
    pub async fn create_text_file(&self, relative_path: &Path, content: &str) -> Result<()> {
        let absolute = self.validate_path(relative_path)?;
        self.ensure_writable()?;
        sema_project::write_file(&absolute, content, &self.config.encoding)?;
        if let Ok(server) = self.multi.server_for_path(relative_path).await {
            server.mark_file_changed(relative_path);
        }
        self.invalidate_lines_read(relative_path);
        Ok(())
    }

    /// One block of lines around `line` with context.
    pub async fn retrieve_content_around_line(
        &self,
        relative_path: &Path,
        line: u32,
        context_lines_before: u32,
        context_lines_after: u32,
    ) -> Result<MatchedLines> {
        let absolute = self.validate_path(relative_path)?;
        let content = sema_project::read_file(&absolute, &self.config.encoding)?;
        Ok(content_around_line(
            &content,
            line,
            context_lines_before,
            context_lines_after,
        ))
    }

    // -- overviews & search ----------------------------------------------

    /// `(name_path, kind)` pairs for a file, or a per-file map for a
    /// directory (restricted to files an active adapter handles).
    pub async fn overview(
        &self,
        relative_path: &Path,
        language: Option<Language>,
    ) -> Result<OverviewResult> {
        let absolute = self.validate_path(relative_path)?;
        let multi = self.multi.clone();
        let rel = relative_path.to_path_buf();
        self.run("overview", move || async move {
            if absolute.is_file() {
                let server = match language {
                    Some(language) => multi.get_server(language).await?,
                    None => multi.server_for_path(&rel).await?,
                };
                Ok(OverviewResult::File(server.request_overview(&rel).await?))
            } else {
                Ok(OverviewResult::Directory(
                    multi.overview_directory(&rel, language).await?,
                ))
            }
        })
        .await
    }

    /// Regex search over project files, grouped into consecutive-line
    /// blocks per file. The pattern is compiled with dot-matches-all and
    /// multi-line semantics.
    pub async fn search_pattern(
        &self,
        pattern: &str,
        options: SearchPatternOptions,
    ) -> Result<HashMap<String, Vec<MatchedLines>>> {
        let search_root = if options.relative_path.as_os_str().is_empty() {
            self.root.clone()
        } else {
            self.validate_path(&options.relative_path)?
        };
        let regex = regex::RegexBuilder::new(pattern)
            .dot_matches_new_line(true)
            .multi_line(true)
            .build()
            .map_err(|e| ServiceError::InvalidPattern(e.to_string()))?;

        let include_glob = options
            .paths_include_glob
            .as_deref()
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|e| ServiceError::InvalidPattern(e.to_string()))?;
        let exclude_glob = options
            .paths_exclude_glob
            .as_deref()
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|e| ServiceError::InvalidPattern(e.to_string()))?;

        let multi = self.multi.clone();
        let root = self.root.clone();
        let encoding = self.config.encoding.clone();
        let options = options.clone();
        self.run("search_pattern", move || async move {
            let candidates: Vec<String> = if options.restrict_to_code_files {
                let prefix = rel_string(&options.relative_path);
                multi
                    .all_source_files(options.language)
                    .await?
                    .into_iter()
                    .filter(|file| prefix.is_empty() || file.starts_with(&prefix))
                    .collect()
            } else if search_root.is_file() {
                vec![rel_string(&options.relative_path)]
            } else {
                let ignore = multi.ignore().clone();
                WalkDir::new(&search_root)
                    .follow_links(false)
                    .into_iter()
                    .filter_entry(|e| e.depth() == 0 || e.file_name() != ".git")
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file())
                    .filter_map(|e| {
                        let rel = e.path().strip_prefix(&root).ok()?;
                        (!ignore.is_ignored(rel, false)).then(|| rel_string(rel))
                    })
                    .collect()
            };

            let mut result: HashMap<String, Vec<MatchedLines>> = HashMap::new();
            for file in candidates {
                if let Some(include) = &include_glob {
                    if !include.matches(&file) {
                        continue;
                    }
                }
                if let Some(exclude) = &exclude_glob {
                    if exclude.matches(&file) {
                        continue;
                    }
                }
                let Ok(content) = sema_project::read_file(&root.join(&file), &encoding) else {
                    continue;
                };
                let blocks = search_content(
                    &regex,
                    &content,
                    options.context_lines_before,
                    options.context_lines_after,
                );
                if !blocks.is_empty() {
                    result.insert(file, blocks);
                }
            }
            Ok(result)
        })
        .await
    }
}

// -- helpers --------------------------------------------------------------

fn rel_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn kind_allowed(
    kind: SymbolKind,
    include: &Option<Vec<SymbolKind>>,
    exclude: &Option<Vec<SymbolKind>>,
) -> bool {
    if let Some(include) = include {
        if !include.contains(&kind) {
            return false;
        }
    }
    if let Some(exclude) = exclude {
        if exclude.contains(&kind) {
            return false;
        }
    }
    true
}

fn position_within(position: Position, range: Range) -> bool {
    (position.line > range.start.line
        || (position.line == range.start.line && position.character >= range.start.character))
        && (position.line < range.end.line
            || (position.line == range.end.line && position.character <= range.end.character))
}

/// Exactly one symbol in the file must match the pattern.
fn unique_match<'a>(
    symbols: &'a [SymbolInfo],
    pattern: &NamePathPattern,
    name_path: &str,
) -> Result<&'a SymbolInfo> {
    let matches: Vec<&SymbolInfo> = flatten(symbols)
        .into_iter()
        .filter(|s| pattern.matches(&s.name_path, false))
        .collect();
    match matches.len() {
        0 => Err(ServiceError::SymbolNotFound(name_path.to_string())),
        1 => Ok(matches[0]),
        count => Err(ServiceError::AmbiguousSymbol {
            name_path: name_path.to_string(),
            count,
        }),
    }
}
