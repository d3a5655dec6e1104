//! FileCheck-style test validation for AST text files.
//!
//! This module parses CHECK directives embedded in `.ast` files and validates compiler
//! output against them, similar to LLVM's FileCheck tool but implemented in a Rust-native
//! way. Directive lines are ordinary `;` comments, so the same file is also a valid input
//! program.

use bumpalo::Bump;

use super::read_program;
use crate::core::config::{BackendKind, CompilerConfig};
use crate::core::session::CompilationSession;
use crate::core::symbols::Library;
use crate::x64::emulator;

/// A CHECK directive extracted from an AST file
#[derive(Debug, Clone, PartialEq)]
pub enum CheckDirective {
    /// CHECK: pattern - Match on this or any later line
    Check(String),
    /// CHECK-NEXT: pattern - Match on the line right after the previous match
    CheckNext(String),
    /// CHECK-NOT: pattern - No line between the surrounding matches contains pattern
    CheckNot(String),
    /// CHECK-EMPTY - Match empty line
    CheckEmpty,
    /// COM: comment - Comment, ignored
    Comment(String),
}

/// A RUN directive specifying how to compile the file
#[derive(Debug, Clone, PartialEq)]
pub struct RunDirective {
    pub command: String,
    pub args: Vec<String>,
}

impl RunDirective {
    /// Compiler configuration selected by the directive's flags.
    pub fn config(&self) -> Result<CompilerConfig, String> {
        let mut config = CompilerConfig::default();
        let mut args = self.args.iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--backend" => {
                    let backend = args.next().ok_or("--backend needs a value")?;
                    config = config.with_backend(backend.parse::<BackendKind>()?);
                }
                "--gc-limit" => {
                    let limit = args.next().ok_or("--gc-limit needs a value")?;
                    let limit = limit.parse().map_err(|_| format!("invalid --gc-limit '{limit}'"))?;
                    config = config.with_gc_limit(limit);
                }
                "--comments" => config = config.with_annotations(true),
                _ => {}
            }
        }
        Ok(config)
    }

    /// Whether the program is executed and its stdout checked instead of the code.
    pub fn runs_program(&self) -> bool {
        self.args.iter().any(|arg| arg == "--run")
    }
}

/// RUN and CHECK directives extracted from an AST file
#[derive(Debug)]
pub struct TestSpec {
    pub run_directives: Vec<RunDirective>,
    pub check_directives: Vec<CheckDirective>,
    pub source: String,
}

impl TestSpec {
    /// Parse an AST file to extract its directives
    pub fn parse(content: &str) -> Self {
        let mut run_directives = Vec::new();
        let mut check_directives = Vec::new();

        for line in content.lines() {
            let trimmed = line.trim();

            if let Some(run_cmd) = trimmed.strip_prefix("; RUN:") {
                let parts: Vec<&str> = run_cmd.split_whitespace().collect();
                if let Some((command, args)) = parts.split_first() {
                    run_directives.push(RunDirective {
                        command: command.to_string(),
                        args: args.iter().map(|s| s.to_string()).collect(),
                    });
                }
            } else if let Some(pattern) = trimmed.strip_prefix("; CHECK-NEXT:") {
                check_directives.push(CheckDirective::CheckNext(pattern.trim().to_string()));
            } else if let Some(pattern) = trimmed.strip_prefix("; CHECK-NOT:") {
                check_directives.push(CheckDirective::CheckNot(pattern.trim().to_string()));
            } else if trimmed.starts_with("; CHECK-EMPTY") {
                check_directives.push(CheckDirective::CheckEmpty);
            } else if let Some(pattern) = trimmed.strip_prefix("; CHECK:") {
                check_directives.push(CheckDirective::Check(pattern.trim().to_string()));
            } else if let Some(comment) = trimmed.strip_prefix("; COM:") {
                check_directives.push(CheckDirective::Comment(comment.trim().to_string()));
            }
        }

        TestSpec { run_directives, check_directives, source: content.to_string() }
    }
}

/// Test runner that compiles AST files and validates output
pub struct TestRunner {
    verbose: bool,
    library: Library,
}

impl TestRunner {
    pub fn new(verbose: bool) -> Self {
        Self { verbose, library: Library::standard() }
    }

    /// Run every RUN directive of `spec` and validate each output
    pub fn run_test(&self, spec: &TestSpec) -> Result<(), String> {
        if spec.run_directives.is_empty() {
            return Err("no RUN directive".to_string());
        }
        let program = read_program(&spec.source, &self.library).map_err(|e| e.to_string())?;

        for run_dir in &spec.run_directives {
            let output = self.execute(&program, run_dir)?;
            self.validate_output(&output, &spec.check_directives)?;
        }
        Ok(())
    }

    fn execute(&self, program: &crate::ast::Program, run_dir: &RunDirective) -> Result<String, String> {
        let config = run_dir.config()?;
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let output = crate::compile(program, &self.library, &config, &session)
            .map_err(|e| e.to_string())?;

        if !run_dir.runs_program() {
            return Ok(output.render());
        }
        let module = output
            .as_asm()
            .ok_or("--run needs the asm backend")?;
        let execution = emulator::run(module).map_err(|e| e.to_string())?;
        Ok(execution.stdout)
    }

    /// Validate output against CHECK directives
    pub fn validate_output(&self, output: &str, directives: &[CheckDirective]) -> Result<(), String> {
        let output_lines: Vec<&str> = output.lines().collect();
        let mut line_idx = 0;
        let mut pending_not: Vec<&str> = Vec::new();

        for directive in directives {
            match directive {
                CheckDirective::Comment(_) => continue,

                CheckDirective::CheckNot(pattern) => pending_not.push(pattern),

                CheckDirective::Check(pattern) => {
                    let found = output_lines
                        .iter()
                        .skip(line_idx)
                        .position(|line| line.contains(pattern.as_str()));

                    match found {
                        Some(idx) => {
                            check_absent(&output_lines[line_idx..line_idx + idx], &pending_not)?;
                            pending_not.clear();
                            line_idx += idx + 1; // Move to the next line after the match
                            if self.verbose {
                                println!("CHECK: '{}' found at line {}", pattern, line_idx - 1);
                            }
                        }
                        None => {
                            return Err(format!("CHECK: pattern '{}' not found in output", pattern));
                        }
                    }
                }

                CheckDirective::CheckNext(pattern) => {
                    pending_not.clear();
                    if line_idx >= output_lines.len() {
                        return Err(format!("CHECK-NEXT: no more lines, expected '{}'", pattern));
                    }

                    let line = output_lines[line_idx];
                    if !line.contains(pattern.as_str()) {
                        return Err(format!("CHECK-NEXT: expected '{}' but got '{}'", pattern, line));
                    }

                    if self.verbose {
                        println!("CHECK-NEXT: '{}' matches at line {}", pattern, line_idx);
                    }
                    line_idx += 1;
                }

                CheckDirective::CheckEmpty => {
                    if line_idx >= output_lines.len() {
                        continue; // End of output counts as empty
                    }

                    let line = output_lines[line_idx];
                    if !line.trim().is_empty() {
                        return Err(format!("CHECK-EMPTY: expected empty line but got '{}'", line));
                    }
                    line_idx += 1;
                }
            }
        }

        check_absent(&output_lines[line_idx.min(output_lines.len())..], &pending_not)
    }
}

fn check_absent(lines: &[&str], patterns: &[&str]) -> Result<(), String> {
    for pattern in patterns {
        if let Some(line) = lines.iter().find(|line| line.contains(pattern)) {
            return Err(format!("CHECK-NOT: pattern '{}' found in '{}'", pattern, line));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_directives() {
        let content = r#"; RUN: rivet --backend llvm %s
; CHECK: define i32 @main()
; CHECK-NEXT: entry:
; CHECK-NOT: phi
; COM: This is a comment
(var x i64)
(assign x 1)"#;

        let spec = TestSpec::parse(content);
        assert_eq!(spec.run_directives.len(), 1);
        assert_eq!(spec.run_directives[0].config().unwrap().backend, BackendKind::Llvm);
        assert_eq!(spec.check_directives.len(), 4);
        assert!(spec.source.contains("(assign x 1)"));
    }

    #[test]
    fn test_check_matching() {
        let runner = TestRunner::new(false);
        let output = "Printing\nmov rax, 1\ncall [printf]\n";

        let directives = vec![
            CheckDirective::Check("Printing".to_string()),
            CheckDirective::CheckNext("mov rax".to_string()),
            CheckDirective::CheckNot("free".to_string()),
            CheckDirective::Check("printf".to_string()),
        ];

        runner.validate_output(output, &directives).unwrap();
    }

    #[test]
    fn test_check_not_failure() {
        let runner = TestRunner::new(false);
        let output = "a\ncall [free]\nb\n";

        let directives = vec![
            CheckDirective::Check("a".to_string()),
            CheckDirective::CheckNot("free".to_string()),
            CheckDirective::Check("b".to_string()),
        ];
        let err = runner.validate_output(output, &directives).unwrap_err();
        assert!(err.contains("CHECK-NOT"));

        // A trailing CHECK-NOT covers the rest of the output.
        let directives = vec![CheckDirective::Check("b".to_string()), CheckDirective::CheckNot("a".to_string())];
        runner.validate_output(output, &directives).unwrap();
    }

    #[test]
    fn test_check_next_failure() {
        let runner = TestRunner::new(false);
        let output = "Line 1\nLine 2\nLine 3\n";

        let directives = vec![
            CheckDirective::Check("Line 1".to_string()),
            CheckDirective::CheckNext("Line 3".to_string()), // Should fail
        ];

        let result = runner.validate_output(output, &directives);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("CHECK-NEXT"));
    }

    #[test]
    fn test_run_options() {
        let run = RunDirective {
            command: "rivet".to_string(),
            args: vec!["--gc-limit".into(), "3".into(), "--comments".into(), "--run".into()],
        };
        let config = run.config().unwrap();
        assert_eq!(config.gc_limit(), 3);
        assert!(config.annotate);
        assert!(run.runs_program());

        let bad = RunDirective { command: "rivet".to_string(), args: vec!["--backend".into(), "arm".into()] };
        assert!(bad.config().is_err());
    }
}
