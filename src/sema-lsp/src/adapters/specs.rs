//! Declarative launch specs for the builtin language servers.

use lazy_static::lazy_static;
use sema_project::Language;
use serde_json::{json, Value};
use std::path::Path;

/// Everything the generic adapter needs to drive one vendor server.
pub struct ServerSpec {
    pub language: Language,
    pub display_name: &'static str,
    /// Candidate argv lists; the first whose program resolves wins.
    pub commands: &'static [&'static [&'static str]],
    pub install_hint: &'static str,
    /// Builds `initializationOptions` for a project root.
    pub init_options: Option<fn(&Path) -> Value>,
    /// Per-language build/output directories to skip.
    pub ignored_dirnames: &'static [&'static str],
    /// `window/logMessage` substrings that signal readiness (empty: none).
    pub ready_needles: &'static [&'static str],
    pub ready_timeout_secs: u64,
    pub ready_required: bool,
    pub cross_file_wait_secs: u64,
    /// stderr lines containing one of these stay at debug level.
    pub stderr_quiet_markers: &'static [&'static str],
}

impl ServerSpec {
    const fn new(language: Language, display_name: &'static str) -> Self {
        Self {
            language,
            display_name,
            commands: &[],
            install_hint: "",
            init_options: None,
            ignored_dirnames: &[],
            ready_needles: &[],
            ready_timeout_secs: 60,
            ready_required: true,
            cross_file_wait_secs: 2,
            stderr_quiet_markers: &[],
        }
    }

    const fn commands(mut self, commands: &'static [&'static [&'static str]]) -> Self {
        self.commands = commands;
        self
    }

    const fn install_hint(mut self, hint: &'static str) -> Self {
        self.install_hint = hint;
        self
    }

    const fn init_options(mut self, f: fn(&Path) -> Value) -> Self {
        self.init_options = Some(f);
        self
    }

    const fn ignored_dirnames(mut self, names: &'static [&'static str]) -> Self {
        self.ignored_dirnames = names;
        self
    }

    const fn cross_file_wait(mut self, secs: u64) -> Self {
        self.cross_file_wait_secs = secs;
        self
    }

    const fn quiet_stderr(mut self, markers: &'static [&'static str]) -> Self {
        self.stderr_quiet_markers = markers;
        self
    }
}

fn pyright_init_options(_root: &Path) -> Value {
    json!({
        "python": {
            "analysis": {
                "autoSearchPaths": true,
                "useLibraryCodeForTypes": true,
                "diagnosticMode": "openFilesOnly",
            }
        }
    })
}

fn elm_init_options(_root: &Path) -> Value {
    json!({
        "elmPath": "elm",
        "elmFormatPath": "elm-format",
        "elmTestPath": "elm-test",
        "skipInstallPackageConfirmation": true,
        "onlyUpdateDiagnosticsOnSave": false,
    })
}

fn metals_init_options(_root: &Path) -> Value {
    json!({
        "isHttpEnabled": false,
        "decorationProvider": false,
        "didFocusProvider": false,
        "doctorProvider": false,
    })
}

fn ruby_init_options(root: &Path) -> Value {
    // ruby-lsp resolves its bundle relative to the workspace
    json!({
        "workspacePath": root.to_string_lossy(),
        "formatter": "none",
        "linters": [],
    })
}

lazy_static! {
    pub static ref BUILTIN_SPECS: Vec<ServerSpec> = vec![
        ServerSpec::new(Language::Python, "Pyright")
            .commands(&[&["pyright-langserver", "--stdio"]])
            .install_hint("npm install -g pyright")
            .init_options(pyright_init_options)
            .ignored_dirnames(&["__pycache__", ".venv", "venv", ".pytest_cache", ".mypy_cache", ".tox"]),

        ServerSpec::new(Language::Typescript, "TypeScript Language Server")
            .commands(&[&["typescript-language-server", "--stdio"]])
            .install_hint("npm install -g typescript-language-server typescript")
            .ignored_dirnames(&["node_modules", "dist", "build", "coverage", ".next"])
            .cross_file_wait(3),

        ServerSpec::new(Language::Rust, "rust-analyzer")
            .commands(&[&["rust-analyzer"]])
            .install_hint("rustup component add rust-analyzer")
            .ignored_dirnames(&["target"])
            .cross_file_wait(3),

        ServerSpec::new(Language::Go, "gopls")
            .commands(&[&["gopls"]])
            .install_hint("go install golang.org/x/tools/gopls@latest")
            .ignored_dirnames(&["vendor", "node_modules", "dist", "build"])
            .quiet_stderr(&["discover.go:", "walker.go:", "walking of {file://", "bus: -> discover"]),

        ServerSpec::new(Language::Java, "Eclipse JDT Language Server")
            .commands(&[&["jdtls"]])
            .install_hint("install jdtls from https://download.eclipse.org/jdtls/")
            .ignored_dirnames(&["target", "build", ".gradle", "bin"])
            .cross_file_wait(5),

        ServerSpec::new(Language::Csharp, "csharp-ls")
            .commands(&[&["csharp-ls"]])
            .install_hint("dotnet tool install -g csharp-ls")
            .ignored_dirnames(&["bin", "obj"])
            .cross_file_wait(5),

        ServerSpec::new(Language::Cpp, "clangd")
            .commands(&[&["clangd"]])
            .install_hint("install clangd from your distribution or https://clangd.llvm.org/")
            .ignored_dirnames(&["build", "cmake-build-debug", "cmake-build-release"]),

        ServerSpec::new(Language::Ruby, "ruby-lsp")
            .commands(&[&["ruby-lsp"]])
            .install_hint("gem install ruby-lsp")
            .init_options(ruby_init_options)
            .ignored_dirnames(&["vendor", "tmp", "log"]),

        ServerSpec::new(Language::Php, "Intelephense")
            .commands(&[&["intelephense", "--stdio"]])
            .install_hint("npm install -g intelephense")
            .ignored_dirnames(&["vendor", "node_modules"]),

        ServerSpec::new(Language::Kotlin, "Kotlin Language Server")
            .commands(&[&["kotlin-language-server"]])
            .install_hint("install kotlin-language-server from https://github.com/fwcd/kotlin-language-server")
            .ignored_dirnames(&["build", ".gradle"])
            .cross_file_wait(5),

        ServerSpec::new(Language::Dart, "Dart Language Server")
            .commands(&[&["dart", "language-server", "--protocol=lsp"]])
            .install_hint("install the Dart SDK from https://dart.dev/get-dart")
            .ignored_dirnames(&[".dart_tool", "build"]),

        ServerSpec::new(Language::Swift, "SourceKit-LSP")
            .commands(&[&["sourcekit-lsp"]])
            .install_hint("sourcekit-lsp ships with the Swift toolchain")
            .ignored_dirnames(&[".build"]),

        ServerSpec::new(Language::Bash, "Bash Language Server")
            .commands(&[&["bash-language-server", "start"]])
            .install_hint("npm install -g bash-language-server"),

        ServerSpec::new(Language::Lua, "lua-language-server")
            .commands(&[&["lua-language-server"]])
            .install_hint("install lua-language-server from https://github.com/LuaLS/lua-language-server"),

        ServerSpec::new(Language::Nix, "nixd")
            .commands(&[&["nixd"], &["nil"]])
            .install_hint("nix profile install nixpkgs#nixd"),

        ServerSpec::new(Language::Elixir, "ElixirLS")
            .commands(&[&["elixir-ls"]])
            .install_hint("install elixir-ls from https://github.com/elixir-lsp/elixir-ls")
            .ignored_dirnames(&["_build", "deps"])
            .cross_file_wait(5),

        ServerSpec::new(Language::Clojure, "clojure-lsp")
            .commands(&[&["clojure-lsp"]])
            .install_hint("install clojure-lsp from https://clojure-lsp.io/installation/")
            .ignored_dirnames(&[".cpcache", "target"]),

        ServerSpec::new(Language::Elm, "elm-language-server")
            .commands(&[&["elm-language-server"]])
            .install_hint("npm install -g @elm-tooling/elm-language-server")
            .init_options(elm_init_options)
            .ignored_dirnames(&["elm-stuff"]),

        ServerSpec::new(Language::Zig, "zls")
            .commands(&[&["zls"]])
            .install_hint("install zls from https://github.com/zigtools/zls")
            .ignored_dirnames(&["zig-cache", "zig-out"]),

        ServerSpec::new(Language::Haskell, "haskell-language-server")
            .commands(&[&["haskell-language-server-wrapper", "--lsp"]])
            .install_hint("ghcup install hls")
            .ignored_dirnames(&["dist-newstyle", ".stack-work"])
            .cross_file_wait(5),

        ServerSpec::new(Language::Julia, "Julia LanguageServer.jl")
            .commands(&[&[
                "julia", "--startup-file=no", "--history-file=no",
                "-e", "using LanguageServer; runserver()",
            ]])
            .install_hint("julia -e 'using Pkg; Pkg.add(\"LanguageServer\")'")
            .cross_file_wait(5),

        ServerSpec::new(Language::Scala, "Metals")
            .commands(&[&["metals"]])
            .install_hint("install metals via coursier: cs install metals")
            .init_options(metals_init_options)
            .ignored_dirnames(&["target", ".bloop", ".metals"])
            .cross_file_wait(5),

        ServerSpec::new(Language::Perl, "Perl Language Server")
            .commands(&[&["pls"]])
            .install_hint("cpanm PLS"),

        ServerSpec::new(Language::R, "R languageserver")
            .commands(&[&["R", "--slave", "-e", "languageserver::run()"]])
            .install_hint("R -e 'install.packages(\"languageserver\")'"),

        ServerSpec::new(Language::Terraform, "terraform-ls")
            .commands(&[&["terraform-ls", "serve"]])
            .install_hint("install terraform-ls from https://github.com/hashicorp/terraform-ls")
            .ignored_dirnames(&[".terraform"]),

        ServerSpec::new(Language::Erlang, "Erlang LS")
            .commands(&[&["erlang_ls"]])
            .install_hint("install erlang_ls from https://github.com/erlang-ls/erlang_ls")
            .ignored_dirnames(&["_build"]),

        ServerSpec::new(Language::Al, "AL Language Server")
            .commands(&[&["al-language-server"]])
            .install_hint("the AL language server ships with the AL vscode extension")
            .ignored_dirnames(&[".alpackages", ".alcache"])
            .cross_file_wait(5),

        ServerSpec::new(Language::Fortran, "fortls")
            .commands(&[&["fortls"]])
            .install_hint("pip install fortls"),

        ServerSpec::new(Language::Rego, "regols")
            .commands(&[&["regols"]])
            .install_hint("go install github.com/kitagry/regols@latest"),

        ServerSpec::new(Language::Markdown, "Marksman")
            .commands(&[&["marksman", "server"]])
            .install_hint("install marksman from https://github.com/artempyanykh/marksman"),

        ServerSpec::new(Language::Yaml, "YAML Language Server")
            .commands(&[&["yaml-language-server", "--stdio"]])
            .install_hint("npm install -g yaml-language-server"),
    ];
}

/// The spec for a language, if the builtin table has one.
pub fn spec_for(language: Language) -> Option<&'static ServerSpec> {
    BUILTIN_SPECS.iter().find(|s| s.language == language)
}
