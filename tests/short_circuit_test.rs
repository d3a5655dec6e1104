//! Short-circuit evaluation of `and` / `or`
//!
//! The right operand is skipped whenever the left one decides the result. Skipped operands
//! here would fault (division by a zero variable) or allocate, so the emulator shows whether
//! they ran.

use bumpalo::Bump;
use pretty_assertions::assert_eq;

use rivet::ast_text::read_program;
use rivet::x64::emulator::{self, EmulatorError, Execution};
use rivet::{CompilationSession, CompilerConfig, Library};

fn try_run(source: &str) -> Result<Execution, EmulatorError> {
    let _ = env_logger::builder().is_test(true).try_init();
    let library = Library::standard();
    let program = read_program(source, &library).unwrap_or_else(|e| panic!("read failed: {e}"));
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let output = rivet::compile(&program, &library, &CompilerConfig::default(), &session)
        .unwrap_or_else(|e| panic!("compile failed: {e}"));
    emulator::run(output.as_asm().expect("asm backend output"))
}

fn run(source: &str) -> Execution {
    try_run(source).unwrap_or_else(|e| panic!("emulation failed: {e}"))
}

#[test]
fn test_and_skips_a_faulting_right_operand() {
    let source = r#"
        (var z i64)
        (if (and (<> z 0) (> (/ 10 z) 1))
            (then (print "yes"))
            (else (print "no")))
    "#;
    assert_eq!(run(source).stdout, "no\n");
}

#[test]
fn test_the_right_operand_runs_when_needed() {
    // Same shape with a true left operand: the division executes and faults.
    let source = r#"
        (var z i64)
        (if (or (= z 0) (> (/ 10 z) 1))
            (then (print "short"))
            (else (print "long")))
        (if (and (= z 0) (> (/ 10 z) 1))
            (then (print "unreachable")))
    "#;
    assert_eq!(try_run(source).unwrap_err(), EmulatorError::DivideError);
}

#[test]
fn test_or_skips_a_faulting_right_operand() {
    let source = r#"
        (var z i64)
        (print (or (= z 0) (> (/ 10 z) 1)))
    "#;
    assert_eq!(run(source).stdout, "-1\n");
}

#[test]
fn test_skipped_operand_does_not_allocate() {
    let source = r#"
        (var b bool)
        (assign b (and false (= (+ "a" "b") "ab")))
        (print b)
    "#;
    let execution = run(source);
    assert_eq!(execution.stdout, "0\n");
    assert_eq!(execution.calls_to("malloc"), 0);
    assert_eq!(execution.calls_to("strcmp"), 0);

    let execution = run("(print (and true (= (+ \"a\" \"b\") \"ab\")))");
    assert_eq!(execution.stdout, "-1\n");
    assert_eq!(execution.calls_to("strcmp"), 1);
    assert_eq!(execution.calls_to("free"), 1);
}

#[test]
fn test_integer_operands_are_bitwise() {
    let source = r#"
        (var z i64)
        (print (and 12 10) " " (or 5 2) " " (xor 6 3))
        (print (and 0 (/ 1 z)) " " (or -1 (/ 1 z)))
    "#;
    assert_eq!(run(source).stdout, "8 7 5\n0 -1\n");
}

#[test]
fn test_nested_conditions() {
    let source = r#"
        (var i i64)
        (var hits i64)
        (while (< i 20)
            (if (or (and (> i 5) (< i 9)) (= (% i 7) 0))
                (then (assign hits (+ hits 1))))
            (assign i (+ i 1)))
        (print hits)
    "#;
    // 6, 7, 8 from the range plus 0 and 14 (7 is already counted)
    assert_eq!(run(source).stdout, "5\n");
}

#[test]
fn test_float_comparisons_in_conditions() {
    let source = r#"
        (var x f64)
        (assign x 2.5)
        (print (and (> x 2) (<= x 2.5)) " " (or (< x 0) (= x 2.0)) " " (<> 1 1.0))
    "#;
    assert_eq!(run(source).stdout, "-1 0 0\n");
}

#[test]
fn test_xor_evaluates_both_operands() {
    let source = r#"
        (var z i64)
        (print (xor false (> (/ 1 z) 0)))
    "#;
    assert_eq!(try_run(source).unwrap_err(), EmulatorError::DivideError);
}
