//! The unified symbol model.
//!
//! Hierarchical `documentSymbol` responses are mapped into [`SymbolInfo`]
//! trees in which every node carries its full name path: the slash-joined
//! chain of ancestor names inside the file's symbol tree. Name paths never
//! contain directory or file names.

use lsp_types::{DocumentSymbol, DocumentSymbolResponse, Range, SymbolKind};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Where a symbol lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SymbolLocation {
    pub absolute_path: String,
    pub relative_path: String,
    pub range: Range,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection_range: Option<Range>,
}

/// A node in a file-local symbol tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    /// Slash-joined ancestor chain within the file, ending in `name`.
    pub name_path: String,
    pub kind: SymbolKind,
    pub location: SymbolLocation,
    pub children: Vec<SymbolInfo>,
    /// Verbatim source slice; only populated on request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl SymbolInfo {
    /// The position used for reference and rename queries: the start of the
    /// selection range (the identifier), falling back to the full range.
    pub fn query_position(&self) -> lsp_types::Position {
        self.location
            .selection_range
            .map(|r| r.start)
            .unwrap_or(self.location.range.start)
    }

    /// Depth-first iteration over this symbol and all descendants.
    pub fn iter_tree(&self) -> impl Iterator<Item = &SymbolInfo> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    /// Prunes descendants below `depth` levels (`0` removes all children).
    pub fn pruned(&self, depth: u32) -> SymbolInfo {
        let mut clone = self.clone();
        prune(&mut clone, depth);
        clone
    }

    /// Whether `position` falls within this symbol's range.
    pub fn contains_position(&self, position: lsp_types::Position) -> bool {
        let range = self.location.range;
        (position.line > range.start.line
            || (position.line == range.start.line && position.character >= range.start.character))
            && (position.line < range.end.line
                || (position.line == range.end.line && position.character <= range.end.character))
    }
}

fn prune(symbol: &mut SymbolInfo, depth: u32) {
    if depth == 0 {
        symbol.children.clear();
    } else {
        for child in &mut symbol.children {
            prune(child, depth - 1);
        }
    }
}

/// Stamps every node of a hierarchical document-symbol response with its
/// name path and location. Pure tree traversal; never consults the server.
pub fn annotate_document_symbols(
    response: DocumentSymbolResponse,
    absolute_path: &Path,
    relative_path: &str,
) -> Vec<SymbolInfo> {
    match response {
        DocumentSymbolResponse::Nested(symbols) => symbols
            .into_iter()
            .map(|s| annotate_nested(s, "", absolute_path, relative_path))
            .collect(),
        // some servers only produce the flat form; it carries no hierarchy
        DocumentSymbolResponse::Flat(symbols) => symbols
            .into_iter()
            .map(|s| SymbolInfo {
                name_path: s.name.clone(),
                name: s.name,
                kind: s.kind,
                location: SymbolLocation {
                    absolute_path: absolute_path.display().to_string(),
                    relative_path: relative_path.to_string(),
                    range: s.location.range,
                    selection_range: None,
                },
                children: Vec::new(),
                body: None,
            })
            .collect(),
    }
}

fn annotate_nested(
    symbol: DocumentSymbol,
    parent_path: &str,
    absolute_path: &Path,
    relative_path: &str,
) -> SymbolInfo {
    let name_path = if parent_path.is_empty() {
        symbol.name.clone()
    } else {
        format!("{}/{}", parent_path, symbol.name)
    };
    let children = symbol
        .children
        .unwrap_or_default()
        .into_iter()
        .map(|c| annotate_nested(c, &name_path, absolute_path, relative_path))
        .collect();
    SymbolInfo {
        name: symbol.name,
        name_path: name_path.clone(),
        kind: symbol.kind,
        location: SymbolLocation {
            absolute_path: absolute_path.display().to_string(),
            relative_path: relative_path.to_string(),
            range: symbol.range,
            selection_range: Some(symbol.selection_range),
        },
        children,
        body: None,
    }
}

/// Flattens symbol trees depth-first.
pub fn flatten(symbols: &[SymbolInfo]) -> Vec<&SymbolInfo> {
    symbols.iter().flat_map(|s| s.iter_tree()).collect()
}

/// Extracts the verbatim source slice covered by `range`.
pub fn body_slice(content: &str, range: Range) -> String {
    let lines: Vec<&str> = content.split('\n').collect();
    let start_line = range.start.line as usize;
    let end_line = range.end.line as usize;
    if start_line >= lines.len() {
        return String::new();
    }
    let end_line = end_line.min(lines.len() - 1);

    if start_line == end_line {
        let line = lines[start_line];
        let start = (range.start.character as usize).min(line.len());
        let end = (range.end.character as usize).min(line.len());
        return line[start..end].to_string();
    }

    let mut out: Vec<&str> = Vec::with_capacity(end_line - start_line + 1);
    let first = lines[start_line];
    out.push(&first[(range.start.character as usize).min(first.len())..]);
    out.extend(lines[start_line + 1..end_line].iter().copied());
    let last = lines[end_line];
    out.push(&last[..(range.end.character as usize).min(last.len())]);
    out.join("\n")
}

/// Fills `body` on every node of the tree from the file content.
pub fn attach_bodies(symbols: &mut [SymbolInfo], content: &str) {
    for symbol in symbols {
        symbol.body = Some(body_slice(content, symbol.location.range));
        attach_bodies(&mut symbol.children, content);
    }
}

/// The innermost symbol whose range contains `position`, if any.
pub fn innermost_enclosing<'a>(
    symbols: &'a [SymbolInfo],
    position: lsp_types::Position,
) -> Option<&'a SymbolInfo> {
    for symbol in symbols {
        if symbol.contains_position(position) {
            return Some(innermost_enclosing(&symbol.children, position).unwrap_or(symbol));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::{Position, Url};

    #[allow(deprecated)]
    fn doc_symbol(name: &str, range: Range, children: Vec<DocumentSymbol>) -> DocumentSymbol {
        DocumentSymbol {
            name: name.to_string(),
            detail: None,
            kind: SymbolKind::CLASS,
            tags: None,
            deprecated: None,
            range,
            selection_range: range,
            children: if children.is_empty() {
                None
            } else {
                Some(children)
            },
        }
    }

    fn range(start_line: u32, end_line: u32) -> Range {
        Range {
            start: Position::new(start_line, 0),
            end: Position::new(end_line, 0),
        }
    }

    #[test]
    fn name_paths_join_ancestor_names_with_slashes() {
        let response = DocumentSymbolResponse::Nested(vec![doc_symbol(
            "OuterClass",
            range(0, 10),
            vec![doc_symbol(
                "NestedClass",
                range(1, 9),
                vec![doc_symbol("find_me", range(2, 3), vec![])],
            )],
        )]);
        let symbols =
            annotate_document_symbols(response, Path::new("/p/nested.py"), "nested.py");
        assert_eq!(symbols[0].name_path, "OuterClass");
        assert_eq!(symbols[0].children[0].name_path, "OuterClass/NestedClass");
        assert_eq!(
            symbols[0].children[0].children[0].name_path,
            "OuterClass/NestedClass/find_me"
        );
        // invariant: every child path is parent path + "/" + name
        for root in &symbols {
            for node in root.iter_tree() {
                for child in &node.children {
                    assert_eq!(child.name_path, format!("{}/{}", node.name_path, child.name));
                }
            }
        }
    }

    #[test]
    fn flat_responses_become_single_level_trees() {
        #[allow(deprecated)]
        let response = DocumentSymbolResponse::Flat(vec![lsp_types::SymbolInformation {
            name: "foo".to_string(),
            kind: SymbolKind::FUNCTION,
            tags: None,
            deprecated: None,
            location: lsp_types::Location {
                uri: Url::parse("file:///p/a.py").unwrap(),
                range: range(0, 2),
            },
            container_name: None,
        }]);
        let symbols = annotate_document_symbols(response, Path::new("/p/a.py"), "a.py");
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name_path, "foo");
        assert!(symbols[0].children.is_empty());
    }

    #[test]
    fn body_slice_extracts_exact_ranges() {
        let content = "def foo():\n    return 1\n\ndef bar():\n    return 2\n";
        let body = body_slice(
            content,
            Range {
                start: Position::new(0, 0),
                end: Position::new(1, 12),
            },
        );
        assert_eq!(body, "def foo():\n    return 1");
    }

    #[test]
    fn pruned_depth_zero_removes_children() {
        let response = DocumentSymbolResponse::Nested(vec![doc_symbol(
            "A",
            range(0, 10),
            vec![doc_symbol("b", range(1, 2), vec![])],
        )]);
        let symbols = annotate_document_symbols(response, Path::new("/p/a.py"), "a.py");
        assert!(symbols[0].pruned(0).children.is_empty());
        assert_eq!(symbols[0].pruned(1).children.len(), 1);
    }

    #[test]
    fn innermost_enclosing_prefers_the_deepest_symbol() {
        let response = DocumentSymbolResponse::Nested(vec![doc_symbol(
            "Outer",
            range(0, 10),
            vec![doc_symbol("inner", range(2, 5), vec![])],
        )]);
        let symbols = annotate_document_symbols(response, Path::new("/p/a.py"), "a.py");
        let hit = innermost_enclosing(&symbols, Position::new(3, 0)).unwrap();
        assert_eq!(hit.name_path, "Outer/inner");
        let outer_hit = innermost_enclosing(&symbols, Position::new(7, 0)).unwrap();
        assert_eq!(outer_hit.name_path, "Outer");
        assert!(innermost_enclosing(&symbols, Position::new(20, 0)).is_none());
    }
}
