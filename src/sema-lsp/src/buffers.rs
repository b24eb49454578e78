//! Refcounted accounting of files opened on a language server.
//!
//! LSP requires `textDocument/didOpen` before most per-file operations. The
//! cache hands out scope guards: the first guard for a URI sends `didOpen`,
//! overlapping guards share the buffer, and dropping the last guard sends
//! `didClose`. Release happens on all exit paths, including cancellation
//! and timeout, because it lives in `Drop`.

use crate::handler::LanguageServerHandle;
use crate::{LspError, Result};
use lsp_types::{Position, Range, TextDocumentContentChangeEvent, Url};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Where `didOpen`/`didClose`/`didChange` notifications go. Implemented by
/// [`LanguageServerHandle`]; tests substitute a recorder.
pub trait DocumentSink: Send + Sync {
    fn did_open(&self, uri: Url, language_id: &str, version: i32, text: &str) -> Result<()>;
    fn did_close(&self, uri: Url) -> Result<()>;
    fn did_change(
        &self,
        uri: Url,
        version: i32,
        changes: Vec<TextDocumentContentChangeEvent>,
    ) -> Result<()>;
}

impl DocumentSink for LanguageServerHandle {
    fn did_open(&self, uri: Url, language_id: &str, version: i32, text: &str) -> Result<()> {
        LanguageServerHandle::did_open(self, uri, language_id, version, text)
    }

    fn did_close(&self, uri: Url) -> Result<()> {
        LanguageServerHandle::did_close(self, uri)
    }

    fn did_change(
        &self,
        uri: Url,
        version: i32,
        changes: Vec<TextDocumentContentChangeEvent>,
    ) -> Result<()> {
        LanguageServerHandle::did_change(self, uri, version, changes)
    }
}

/// One open document as the server believes it to exist.
#[derive(Debug, Clone)]
pub struct FileBuffer {
    pub uri: Url,
    pub content: String,
    pub version: i32,
    pub language_id: String,
    ref_count: usize,
}

type BufferMap = Arc<Mutex<HashMap<Url, FileBuffer>>>;

/// Refcounted cache of open file buffers for one language server.
#[derive(Clone, Default)]
pub struct FileBufferCache {
    buffers: BufferMap,
}

impl FileBufferCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `uri`, reusing an existing buffer when one is already open.
    /// `read_content` is only invoked for a fresh open.
    pub fn open(
        &self,
        sink: Arc<dyn DocumentSink>,
        uri: Url,
        language_id: &str,
        read_content: impl FnOnce() -> Result<String>,
    ) -> Result<OpenFileGuard> {
        let mut buffers = self.buffers.lock().unwrap();
        if let Some(buffer) = buffers.get_mut(&uri) {
            buffer.ref_count += 1;
        } else {
            let content = read_content()?;
            sink.did_open(uri.clone(), language_id, 0, &content)?;
            buffers.insert(
                uri.clone(),
                FileBuffer {
                    uri: uri.clone(),
                    content,
                    version: 0,
                    language_id: language_id.to_string(),
                    ref_count: 1,
                },
            );
        }
        drop(buffers);
        Ok(OpenFileGuard {
            uri,
            buffers: self.buffers.clone(),
            sink,
        })
    }

    /// Number of currently open buffers.
    pub fn open_count(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }

    /// Content of an open buffer, if the URI is currently open.
    pub fn content_of(&self, uri: &Url) -> Option<String> {
        self.buffers
            .lock()
            .unwrap()
            .get(uri)
            .map(|b| b.content.clone())
    }
}

/// Scope guard for an open document. Dropping the last guard for a URI
/// closes the document on the server.
pub struct OpenFileGuard {
    uri: Url,
    buffers: BufferMap,
    sink: Arc<dyn DocumentSink>,
}

impl OpenFileGuard {
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn content(&self) -> String {
        self.buffers
            .lock()
            .unwrap()
            .get(&self.uri)
            .map(|b| b.content.clone())
            .unwrap_or_default()
    }

    pub fn version(&self) -> i32 {
        self.buffers
            .lock()
            .unwrap()
            .get(&self.uri)
            .map(|b| b.version)
            .unwrap_or(0)
    }

    /// Replaces the buffer content, bumps the version and sends an
    /// incremental `didChange` covering the edited range.
    pub fn apply_change(
        &self,
        new_content: String,
        change: TextDocumentContentChangeEvent,
    ) -> Result<i32> {
        let mut buffers = self.buffers.lock().unwrap();
        let buffer = buffers
            .get_mut(&self.uri)
            .ok_or_else(|| LspError::Protocol(format!("buffer not open: {}", self.uri)))?;
        buffer.content = new_content;
        buffer.version += 1;
        let version = buffer.version;
        drop(buffers);
        self.sink.did_change(self.uri.clone(), version, vec![change])?;
        Ok(version)
    }
}

impl Drop for OpenFileGuard {
    fn drop(&mut self) {
        let mut buffers = self.buffers.lock().unwrap();
        let remove = match buffers.get_mut(&self.uri) {
            Some(buffer) => {
                buffer.ref_count -= 1;
                buffer.ref_count == 0
            }
            None => false,
        };
        if remove {
            buffers.remove(&self.uri);
            drop(buffers);
            if let Err(e) = self.sink.did_close(self.uri.clone()) {
                debug!("didClose for {} not delivered: {}", self.uri, e);
            }
        }
    }
}

// -- text edit helpers ----------------------------------------------------

/// Converts an LSP position (UTF-16 character offset within a line) to a
/// byte offset into `content`.
pub fn position_to_offset(content: &str, position: Position) -> usize {
    let mut offset = 0;
    for (index, line) in content.split_inclusive('\n').enumerate() {
        if index == (position.line as usize) {
            let mut utf16_seen = 0u32;
            for (byte_index, ch) in line.char_indices() {
                if utf16_seen >= position.character {
                    return offset + byte_index;
                }
                utf16_seen += ch.len_utf16() as u32;
            }
            // clamp to end of line content (before the newline if present)
            let trimmed = line.strip_suffix('\n').unwrap_or(line);
            return offset + trimmed.len();
        }
        offset += line.len();
    }
    content.len()
}

/// Inserts `text` at `position`, returning the new content and the position
/// immediately after the inserted text.
pub fn apply_insert(content: &str, position: Position, text: &str) -> (String, Position) {
    let offset = position_to_offset(content, position);
    let mut new_content = String::with_capacity(content.len() + text.len());
    new_content.push_str(&content[..offset]);
    new_content.push_str(text);
    new_content.push_str(&content[offset..]);

    let inserted_lines = text.matches('\n').count() as u32;
    let end = if inserted_lines == 0 {
        Position::new(
            position.line,
            position.character + text.encode_utf16().count() as u32,
        )
    } else {
        let last_line = text.rsplit('\n').next().unwrap_or("");
        Position::new(
            position.line + inserted_lines,
            last_line.encode_utf16().count() as u32,
        )
    };
    (new_content, end)
}

/// Deletes the text between `start` and `end`, returning the new content
/// and the deleted slice.
pub fn apply_delete(content: &str, start: Position, end: Position) -> (String, String) {
    let start_offset = position_to_offset(content, start);
    let end_offset = position_to_offset(content, end).max(start_offset);
    let deleted = content[start_offset..end_offset].to_string();
    let mut new_content = String::with_capacity(content.len() - deleted.len());
    new_content.push_str(&content[..start_offset]);
    new_content.push_str(&content[end_offset..]);
    (new_content, deleted)
}

/// The incremental change event for an insertion.
pub fn insert_change_event(position: Position, text: &str) -> TextDocumentContentChangeEvent {
    TextDocumentContentChangeEvent {
        range: Some(Range {
            start: position,
            end: position,
        }),
        range_length: None,
        text: text.to_string(),
    }
}

/// The incremental change event for a deletion.
pub fn delete_change_event(start: Position, end: Position) -> TextDocumentContentChangeEvent {
    TextDocumentContentChangeEvent {
        range: Some(Range { start, end }),
        range_length: None,
        text: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        opens: AtomicUsize,
        closes: AtomicUsize,
        changes: AtomicUsize,
    }

    impl DocumentSink for RecordingSink {
        fn did_open(&self, _uri: Url, _language_id: &str, _version: i32, _text: &str) -> Result<()> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn did_close(&self, _uri: Url) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn did_change(
            &self,
            _uri: Url,
            _version: i32,
            _changes: Vec<TextDocumentContentChangeEvent>,
        ) -> Result<()> {
            self.changes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn uri() -> Url {
        Url::parse("file:///p/a.py").unwrap()
    }

    #[test]
    fn overlapping_opens_share_one_did_open_did_close_pair() {
        let cache = FileBufferCache::new();
        let sink = Arc::new(RecordingSink::default());

        let first = cache
            .open(sink.clone(), uri(), "python", || Ok("x = 1\n".into()))
            .unwrap();
        let second = cache
            .open(sink.clone(), uri(), "python", || {
                panic!("content must not be re-read for an open buffer")
            })
            .unwrap();

        assert_eq!(sink.opens.load(Ordering::SeqCst), 1);
        drop(first);
        assert_eq!(sink.closes.load(Ordering::SeqCst), 0, "still referenced");
        drop(second);
        assert_eq!(sink.closes.load(Ordering::SeqCst), 1);
        assert_eq!(cache.open_count(), 0);
    }

    #[test]
    fn reopening_after_close_sends_did_open_again() {
        let cache = FileBufferCache::new();
        let sink = Arc::new(RecordingSink::default());

        drop(
            cache
                .open(sink.clone(), uri(), "python", || Ok("a".into()))
                .unwrap(),
        );
        drop(
            cache
                .open(sink.clone(), uri(), "python", || Ok("a".into()))
                .unwrap(),
        );
        assert_eq!(sink.opens.load(Ordering::SeqCst), 2);
        assert_eq!(sink.closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn apply_change_bumps_version_and_notifies() {
        let cache = FileBufferCache::new();
        let sink = Arc::new(RecordingSink::default());
        let guard = cache
            .open(sink.clone(), uri(), "python", || Ok("a\n".into()))
            .unwrap();

        let (new_content, _) = apply_insert(&guard.content(), Position::new(0, 1), "bc");
        let version = guard
            .apply_change(
                new_content,
                insert_change_event(Position::new(0, 1), "bc"),
            )
            .unwrap();
        assert_eq!(version, 1);
        assert_eq!(guard.content(), "abc\n");
        assert_eq!(sink.changes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn insert_in_middle_of_line() {
        let (content, end) = apply_insert("hello world\n", Position::new(0, 5), ",");
        assert_eq!(content, "hello, world\n");
        assert_eq!(end, Position::new(0, 6));
    }

    #[test]
    fn insert_multiline_reports_correct_end_position() {
        let (content, end) = apply_insert("ab\n", Position::new(0, 1), "x\ny");
        assert_eq!(content, "ax\nyb\n");
        assert_eq!(end, Position::new(1, 1));
    }

    #[test]
    fn delete_across_lines_returns_deleted_text() {
        let content = "line0\nline1\nline2\n";
        let (new_content, deleted) =
            apply_delete(content, Position::new(0, 4), Position::new(2, 4));
        assert_eq!(deleted, "0\nline1\nline");
        assert_eq!(new_content, "line2\n");
    }

    #[test]
    fn position_offset_counts_utf16_units() {
        // '𐍈' is one char, two UTF-16 units, four UTF-8 bytes
        let content = "a𐍈b\n";
        assert_eq!(position_to_offset(content, Position::new(0, 0)), 0);
        assert_eq!(position_to_offset(content, Position::new(0, 1)), 1);
        assert_eq!(position_to_offset(content, Position::new(0, 3)), 5);
        // past end of line clamps to line end
        assert_eq!(position_to_offset(content, Position::new(0, 99)), 6);
    }
}
