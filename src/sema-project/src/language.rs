//! Supported languages and their filename matchers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Matches filenames against a set of fnmatch-style patterns.
#[derive(Debug, Clone)]
pub struct FilenameMatcher {
    patterns: Vec<glob::Pattern>,
}

impl FilenameMatcher {
    pub fn new(patterns: &[&str]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| glob::Pattern::new(p).ok())
            .collect();
        Self { patterns }
    }

    /// Whether the given filename (not a path) matches any pattern.
    pub fn is_relevant_filename(&self, filename: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(filename))
    }

    /// Whether the final component of the given path matches any pattern.
    pub fn is_relevant_path(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| self.is_relevant_filename(n))
    }
}

/// The closed set of languages a project may activate.
///
/// Each variant knows which filenames belong to it and which LSP language id
/// to report when opening a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    Typescript,
    Rust,
    Go,
    Java,
    Csharp,
    Cpp,
    Ruby,
    Php,
    Kotlin,
    Dart,
    Swift,
    Bash,
    Lua,
    Nix,
    Elixir,
    Clojure,
    Elm,
    Zig,
    Haskell,
    Julia,
    Scala,
    Perl,
    R,
    Terraform,
    Erlang,
    Al,
    Fortran,
    Rego,
    Markdown,
    Yaml,
    Vue,
}

impl Language {
    /// All supported languages, in a stable order.
    pub fn all() -> &'static [Language] {
        use Language::*;
        &[
            Python, Typescript, Rust, Go, Java, Csharp, Cpp, Ruby, Php, Kotlin, Dart, Swift,
            Bash, Lua, Nix, Elixir, Clojure, Elm, Zig, Haskell, Julia, Scala, Perl, R, Terraform,
            Erlang, Al, Fortran, Rego, Markdown, Yaml, Vue,
        ]
    }

    /// Filename matcher for source files of this language.
    pub fn matcher(&self) -> FilenameMatcher {
        use Language::*;
        let patterns: &[&str] = match self {
            Python => &["*.py", "*.pyi"],
            Typescript => &[
                "*.ts", "*.tsx", "*.cts", "*.mts", "*.js", "*.jsx", "*.cjs", "*.mjs",
            ],
            Rust => &["*.rs"],
            Go => &["*.go"],
            Java => &["*.java"],
            Csharp => &["*.cs"],
            Cpp => &["*.cpp", "*.h", "*.hpp", "*.c", "*.hxx", "*.cc", "*.cxx"],
            Ruby => &["*.rb", "*.erb"],
            Php => &["*.php"],
            Kotlin => &["*.kt", "*.kts"],
            Dart => &["*.dart"],
            Swift => &["*.swift"],
            Bash => &["*.sh", "*.bash"],
            Lua => &["*.lua"],
            Nix => &["*.nix"],
            Elixir => &["*.ex", "*.exs"],
            Clojure => &["*.clj", "*.cljs", "*.cljc", "*.edn"],
            Elm => &["*.elm"],
            Zig => &["*.zig", "*.zon"],
            Haskell => &["*.hs", "*.lhs"],
            Julia => &["*.jl"],
            Scala => &["*.scala", "*.sc"],
            Perl => &["*.pl", "*.pm"],
            R => &["*.R", "*.r", "*.Rmd", "*.Rnw"],
            Terraform => &["*.tf", "*.tfvars"],
            Erlang => &["*.erl", "*.hrl", "*.escript"],
            Al => &["*.al", "*.dal"],
            Fortran => &["*.f90", "*.f95", "*.f03", "*.f", "*.for"],
            Rego => &["*.rego"],
            Markdown => &["*.md", "*.markdown"],
            Yaml => &["*.yml", "*.yaml"],
            Vue => &["*.vue"],
        };
        FilenameMatcher::new(patterns)
    }

    /// The default LSP language id for this language.
    pub fn language_id(&self) -> &'static str {
        use Language::*;
        match self {
            Python => "python",
            Typescript => "typescript",
            Rust => "rust",
            Go => "go",
            Java => "java",
            Csharp => "csharp",
            Cpp => "cpp",
            Ruby => "ruby",
            Php => "php",
            Kotlin => "kotlin",
            Dart => "dart",
            Swift => "swift",
            Bash => "shellscript",
            Lua => "lua",
            Nix => "nix",
            Elixir => "elixir",
            Clojure => "clojure",
            Elm => "elm",
            Zig => "zig",
            Haskell => "haskell",
            Julia => "julia",
            Scala => "scala",
            Perl => "perl",
            R => "r",
            Terraform => "terraform",
            Erlang => "erlang",
            Al => "al",
            Fortran => "fortran",
            Rego => "rego",
            Markdown => "markdown",
            Yaml => "yaml",
            Vue => "vue",
        }
    }

    /// The LSP language id to use for a specific file of this language.
    ///
    /// Most languages report a single id; a few distinguish by extension
    /// (TypeScript vs. JavaScript, C vs. C++, Vue SFCs vs. embedded scripts).
    pub fn language_id_for_path(&self, path: &Path) -> &'static str {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match self {
            Language::Typescript => match ext.as_str() {
                "js" | "jsx" | "mjs" | "cjs" => "javascript",
                _ => "typescript",
            },
            Language::Cpp => match ext.as_str() {
                "c" => "c",
                _ => "cpp",
            },
            Language::Vue => match ext.as_str() {
                "vue" => "vue",
                "ts" | "tsx" | "mts" | "cts" => "typescript",
                "js" | "jsx" | "mjs" | "cjs" => "javascript",
                _ => "vue",
            },
            _ => self.language_id(),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // serde snake_case name doubles as the display name
        let s = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(s.trim_matches('"'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn typescript_matcher_covers_all_js_variants() {
        let m = Language::Typescript.matcher();
        for name in [
            "a.ts", "a.tsx", "a.cts", "a.mts", "a.js", "a.jsx", "a.cjs", "a.mjs",
        ] {
            assert!(m.is_relevant_filename(name), "{name} should match");
        }
        assert!(!m.is_relevant_filename("a.rs"));
        assert!(!m.is_relevant_filename("a.vue"));
    }

    #[test]
    fn matcher_checks_only_the_filename() {
        let m = Language::Python.matcher();
        assert!(m.is_relevant_path(&PathBuf::from("src/deep/nested/mod.py")));
        assert!(!m.is_relevant_path(&PathBuf::from("src/module.py/readme.txt")));
    }

    #[test]
    fn language_id_distinguishes_js_from_ts() {
        let lang = Language::Typescript;
        assert_eq!(lang.language_id_for_path(Path::new("a.ts")), "typescript");
        assert_eq!(lang.language_id_for_path(Path::new("a.jsx")), "javascript");
    }

    #[test]
    fn display_matches_serde_name() {
        assert_eq!(Language::Typescript.to_string(), "typescript");
        assert_eq!(Language::Csharp.to_string(), "csharp");
    }
}
