//! Service-level behaviour that does not require a live language server:
//! path safety, ignore handling, the read-only flag, the read-before-edit
//! guard, file access and pattern search.

use sema_project::{Language, ProjectConfig};
use sema_symbols::{
    OverviewResult, SearchPatternOptions, ServiceError, SymbolService,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

async fn service_for(dir: &TempDir, configure: impl FnOnce(&mut ProjectConfig)) -> SymbolService {
    let mut config = ProjectConfig::new(dir.path(), vec![]);
    configure(&mut config);
    SymbolService::activate(config).await.expect("activation")
}

async fn plain_service(dir: &TempDir) -> SymbolService {
    service_for(dir, |_| {}).await
}

#[tokio::test]
async fn read_file_rejects_path_escape() {
    let dir = TempDir::new().unwrap();
    let service = plain_service(&dir).await;
    let err = service
        .read_file(Path::new("../outside.txt"), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PathEscape(_)), "{err}");
}

#[tokio::test]
async fn editing_rejects_path_escape_without_side_effects() {
    let dir = TempDir::new().unwrap();
    let service = plain_service(&dir).await;
    let err = service
        .create_text_file(Path::new("../evil.txt"), "x")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PathEscape(_)));
    assert!(!dir.path().parent().unwrap().join("evil.txt").exists());
}

#[tokio::test]
async fn gitignored_files_cannot_be_read_or_written() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(".gitignore"), "secret.txt\nbuild/\n").unwrap();
    fs::write(dir.path().join("secret.txt"), "hidden").unwrap();
    let service = plain_service(&dir).await;

    let err = service
        .read_file(Path::new("secret.txt"), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PathIgnored(_)), "{err}");

    let err = service
        .create_text_file(Path::new("build/out.txt"), "x")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PathIgnored(_)), "{err}");
}

#[tokio::test]
async fn explicit_ignore_patterns_apply_without_gitignore() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("generated.rs"), "code").unwrap();
    let service = service_for(&dir, |config| {
        config.ignored_paths = vec!["generated.rs".to_string()];
        config.honor_gitignore = false;
    })
    .await;
    let err = service
        .read_file(Path::new("generated.rs"), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PathIgnored(_)));
}

#[tokio::test]
async fn read_only_projects_reject_every_editing_operation() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
    let service = service_for(&dir, |config| config.read_only = true).await;

    let err = service
        .create_text_file(Path::new("new.py"), "y = 2\n")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ReadOnly));

    let err = service
        .insert_at_line(Path::new("a.py"), 0, "z = 3\n")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ReadOnly));

    let err = service
        .rename_symbol(Path::new("a.py"), 0, 0, "renamed")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ReadOnly));

    // reads still work
    let content = service.read_file(Path::new("a.py"), None, None).await.unwrap();
    assert_eq!(content, "x = 1\n");
}

#[tokio::test]
async fn line_edits_require_a_prior_matching_read() {
    let dir = TempDir::new().unwrap();
    let body: String = (0..12).map(|i| format!("line {i}\n")).collect();
    fs::write(dir.path().join("x.py"), &body).unwrap();
    let service = plain_service(&dir).await;

    let err = service
        .replace_lines(Path::new("x.py"), 2, 4, "replacement\n")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::LinesNotRead { .. }), "{err}");
    assert_eq!(fs::read_to_string(dir.path().join("x.py")).unwrap(), body);

    // a read of a different range does not unlock the edit
    service
        .read_file(Path::new("x.py"), Some(2), Some(5))
        .await
        .unwrap();
    let err = service
        .replace_lines(Path::new("x.py"), 2, 4, "replacement\n")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::LinesNotRead { .. }));

    // the exact read clears the guard; with no language server active the
    // edit then fails at the routing layer instead
    service
        .read_file(Path::new("x.py"), Some(2), Some(4))
        .await
        .unwrap();
    let err = service
        .replace_lines(Path::new("x.py"), 2, 4, "replacement\n")
        .await
        .unwrap_err();
    assert!(
        !matches!(err, ServiceError::LinesNotRead { .. }),
        "guard must have been satisfied, got {err}"
    );
}

#[tokio::test]
async fn read_file_slices_inclusive_line_ranges() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("f.txt"), "a\nb\nc\nd\ne\n").unwrap();
    let service = plain_service(&dir).await;

    let all = service.read_file(Path::new("f.txt"), None, None).await.unwrap();
    assert_eq!(all, "a\nb\nc\nd\ne\n");

    let slice = service
        .read_file(Path::new("f.txt"), Some(1), Some(3))
        .await
        .unwrap();
    assert_eq!(slice, "b\nc\nd");

    let tail = service
        .read_file(Path::new("f.txt"), Some(3), None)
        .await
        .unwrap();
    assert_eq!(tail, "d\ne\n");

    let past_end = service
        .read_file(Path::new("f.txt"), Some(99), Some(120))
        .await
        .unwrap();
    assert_eq!(past_end, "");
}

#[tokio::test]
async fn missing_file_reports_file_not_found() {
    let dir = TempDir::new().unwrap();
    let service = plain_service(&dir).await;
    let err = service
        .read_file(Path::new("absent.py"), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::FileNotFound(_)), "{err}");
}

#[tokio::test]
async fn create_text_file_round_trips_and_creates_directories() {
    let dir = TempDir::new().unwrap();
    let service = plain_service(&dir).await;
    service
        .create_text_file(Path::new("sub/dir/new.txt"), "hello\n")
        .await
        .unwrap();
    let content = service
        .read_file(Path::new("sub/dir/new.txt"), None, None)
        .await
        .unwrap();
    assert_eq!(content, "hello\n");
}

#[tokio::test]
async fn search_pattern_scans_non_code_files_when_unrestricted() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("notes.txt"), "alpha\nneedle here\nomega\n").unwrap();
    fs::write(dir.path().join("other.txt"), "nothing\n").unwrap();
    fs::write(dir.path().join(".gitignore"), "ignored.txt\n").unwrap();
    fs::write(dir.path().join("ignored.txt"), "needle here too\n").unwrap();
    let service = plain_service(&dir).await;

    let results = service
        .search_pattern(
            "needle",
            SearchPatternOptions {
                restrict_to_code_files: false,
                context_lines_before: 1,
                context_lines_after: 1,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 1, "ignored files must not appear: {results:?}");
    let blocks = &results["notes.txt"];
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].start_line, 0);
    assert_eq!(blocks[0].lines, vec!["alpha", "needle here", "omega"]);
}

#[tokio::test]
async fn search_pattern_honours_include_and_exclude_globs() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.py"), "match\n").unwrap();
    fs::write(dir.path().join("b.txt"), "match\n").unwrap();
    let service = plain_service(&dir).await;

    let results = service
        .search_pattern(
            "match",
            SearchPatternOptions {
                restrict_to_code_files: false,
                paths_include_glob: Some("*.py".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(results.contains_key("a.py"));
    assert!(!results.contains_key("b.txt"));

    let results = service
        .search_pattern(
            "match",
            SearchPatternOptions {
                restrict_to_code_files: false,
                paths_exclude_glob: Some("*.py".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!results.contains_key("a.py"));
    assert!(results.contains_key("b.txt"));
}

#[tokio::test]
async fn search_pattern_rejects_invalid_regex() {
    let dir = TempDir::new().unwrap();
    let service = plain_service(&dir).await;
    let err = service
        .search_pattern("([unclosed", SearchPatternOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidPattern(_)));
}

#[tokio::test]
async fn empty_project_returns_empty_collections() {
    let dir = TempDir::new().unwrap();
    let service = plain_service(&dir).await;

    // no source files, no adapters: read-only operations come back empty
    let symbols = service
        .find_symbols_by_name_path("anything", Default::default())
        .await
        .unwrap();
    assert!(symbols.is_empty());

    match service.overview(Path::new(""), None).await.unwrap() {
        OverviewResult::Directory(map) => assert!(map.is_empty()),
        OverviewResult::File(_) => panic!("root is a directory"),
    }

    let tree = service.full_symbol_tree(None, false, None).await.unwrap();
    assert!(tree.is_empty());

    let results = service
        .search_pattern(
            "anything",
            SearchPatternOptions {
                restrict_to_code_files: false,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn symbol_queries_for_inactive_languages_fail_cleanly() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.py"), "def foo(): pass\n").unwrap();
    let service = plain_service(&dir).await;

    // with zero active adapters, routing has nowhere to go
    let err = service
        .find_definition(Path::new("a.py"), 0, 4)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Lsp(_)), "{err}");
}

#[tokio::test]
async fn retrieve_content_around_line_clamps_context() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("f.txt"), "one\ntwo\nthree\n").unwrap();
    let service = plain_service(&dir).await;
    let block = service
        .retrieve_content_around_line(Path::new("f.txt"), 1, 5, 5)
        .await
        .unwrap();
    assert_eq!(block.start_line, 0);
    assert_eq!(block.lines[0], "one");
    assert_eq!(block.lines[1], "two");
}

#[tokio::test]
async fn languages_in_config_are_preserved_in_order() {
    // routing ties break by activation order; the config record carries it
    let config = ProjectConfig::new("/tmp/p", vec![Language::Typescript, Language::Python]);
    assert_eq!(
        config.languages,
        vec![Language::Typescript, Language::Python]
    );
}
