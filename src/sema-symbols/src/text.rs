//! Text slicing helpers: consecutive matched-line blocks with context.

use serde::{Deserialize, Serialize};

/// A block of consecutive lines from one file, with 0-based line indexes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchedLines {
    pub start_line: u32,
    pub end_line: u32,
    pub lines: Vec<String>,
}

impl MatchedLines {
    pub fn to_display_string(&self) -> String {
        self.lines
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{:>6}: {}", self.start_line as usize + i, line))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The block of lines around `line`, clamped to the file.
pub fn content_around_line(
    content: &str,
    line: u32,
    context_before: u32,
    context_after: u32,
) -> MatchedLines {
    let lines: Vec<&str> = content.split('\n').collect();
    if lines.is_empty() {
        return MatchedLines {
            start_line: 0,
            end_line: 0,
            lines: Vec::new(),
        };
    }
    let last = (lines.len() - 1) as u32;
    let center = line.min(last);
    let start = center.saturating_sub(context_before);
    let end = (center + context_after).min(last);
    MatchedLines {
        start_line: start,
        end_line: end,
        lines: lines[start as usize..=end as usize]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    }
}

/// All regex matches in `content` as line blocks with context. Overlapping
/// blocks are merged.
pub fn search_content(
    regex: &regex::Regex,
    content: &str,
    context_before: u32,
    context_after: u32,
) -> Vec<MatchedLines> {
    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(content.match_indices('\n').map(|(i, _)| i + 1))
        .collect();
    let line_of_offset = |offset: usize| -> u32 {
        match line_starts.binary_search(&offset) {
            Ok(index) => index as u32,
            Err(index) => (index - 1) as u32,
        }
    };

    let mut spans: Vec<(u32, u32)> = Vec::new();
    for found in regex.find_iter(content) {
        let start_line = line_of_offset(found.start());
        // a match ending exactly at a line start still belongs to the
        // previous line
        let end_offset = found.end().saturating_sub(1).max(found.start());
        let end_line = line_of_offset(end_offset);
        spans.push((
            start_line.saturating_sub(context_before),
            end_line + context_after,
        ));
    }

    // merge overlapping or adjacent blocks
    spans.sort();
    let mut merged: Vec<(u32, u32)> = Vec::new();
    for (start, end) in spans {
        match merged.last_mut() {
            Some((_, last_end)) if start <= *last_end + 1 => {
                *last_end = (*last_end).max(end);
            }
            _ => merged.push((start, end)),
        }
    }

    let lines: Vec<&str> = content.split('\n').collect();
    let last = lines.len().saturating_sub(1) as u32;
    merged
        .into_iter()
        .map(|(start, end)| {
            let end = end.min(last);
            MatchedLines {
                start_line: start,
                end_line: end,
                lines: lines[start as usize..=end as usize]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::RegexBuilder;

    fn regex(pattern: &str) -> regex::Regex {
        RegexBuilder::new(pattern)
            .dot_matches_new_line(true)
            .multi_line(true)
            .build()
            .unwrap()
    }

    #[test]
    fn context_is_clamped_to_file_bounds() {
        let content = "a\nb\nc";
        let block = content_around_line(content, 0, 5, 1);
        assert_eq!(block.start_line, 0);
        assert_eq!(block.end_line, 1);
        assert_eq!(block.lines, vec!["a", "b"]);

        let block = content_around_line(content, 2, 1, 5);
        assert_eq!(block.start_line, 1);
        assert_eq!(block.end_line, 2);
    }

    #[test]
    fn single_line_match_with_context() {
        let content = "one\ntwo\nthree\nfour\n";
        let blocks = search_content(&regex("three"), content, 1, 1);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].start_line, 1);
        assert_eq!(blocks[0].lines, vec!["two", "three", "four"]);
    }

    #[test]
    fn multiline_match_spans_its_lines() {
        let content = "fn a() {\n    body\n}\nfn b() {}\n";
        let blocks = search_content(&regex(r"fn a\(\).*?\}"), content, 0, 0);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].start_line, 0);
        assert_eq!(blocks[0].end_line, 2);
        assert_eq!(blocks[0].lines.len(), 3);
    }

    #[test]
    fn overlapping_matches_merge_into_one_block() {
        let content = "x\nmatch1\nmatch2\ny\n";
        let blocks = search_content(&regex("match\\d"), content, 1, 1);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].start_line, 0);
        assert_eq!(blocks[0].end_line, 3);
    }

    #[test]
    fn disjoint_matches_stay_separate() {
        let content = "hit\na\nb\nc\nd\nhit\n";
        let blocks = search_content(&regex("hit"), content, 0, 0);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].start_line, 0);
        assert_eq!(blocks[1].start_line, 5);
    }

    #[test]
    fn display_string_numbers_lines_from_start() {
        let block = MatchedLines {
            start_line: 4,
            end_line: 5,
            lines: vec!["alpha".into(), "beta".into()],
        };
        let display = block.to_display_string();
        assert!(display.contains("4: alpha"));
        assert!(display.contains("5: beta"));
    }
}
