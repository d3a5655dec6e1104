//! FileCheck-style tests for AST files
//!
//! Each file under `tests/filecheck` carries its own RUN and CHECK directives. The assembly
//! or LLVM text (or, with `--run`, the emulated program's stdout) is matched against them.

use std::fs;
use std::path::Path;

use rivet::ast_text::check::{TestRunner, TestSpec};

/// Test helper that runs an AST file through FileCheck validation
fn run_filecheck_test(ast_file: &str) {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/filecheck").join(ast_file);
    let contents = fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));

    let spec = TestSpec::parse(&contents);
    assert!(!spec.check_directives.is_empty(), "{ast_file} has no CHECK lines");

    let runner = TestRunner::new(false);
    runner.run_test(&spec).unwrap_or_else(|e| panic!("Test {} failed: {}", ast_file, e));
}

#[test]
fn test_print_filecheck() {
    run_filecheck_test("print.ast");
}

#[test]
fn test_print_run_filecheck() {
    run_filecheck_test("print_run.ast");
}

#[test]
fn test_strings_gc_filecheck() {
    run_filecheck_test("strings_gc.ast");
}

#[test]
fn test_strings_gc_run_filecheck() {
    run_filecheck_test("strings_gc_run.ast");
}

#[test]
fn test_llvm_branches_filecheck() {
    run_filecheck_test("llvm_branches.ast");
}

#[test]
fn test_comments_filecheck() {
    run_filecheck_test("comments.ast");
}

/// Every file in the directory must pass, including ones without a dedicated test.
#[test]
fn test_all_filecheck_files() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/filecheck");
    let mut files: Vec<String> = fs::read_dir(&dir)
        .unwrap_or_else(|e| panic!("Failed to list {}: {}", dir.display(), e))
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".ast"))
        .collect();
    files.sort();
    assert!(files.len() >= 6);
    for file in &files {
        run_filecheck_test(file);
    }
}
