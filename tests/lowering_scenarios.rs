//! End-to-end lowering scenarios
//!
//! Each test reads a program in AST text form, lowers it with the assembly backend and runs
//! the result on the reference emulator, checking what the program prints.

use bumpalo::Bump;
use pretty_assertions::assert_eq;

use rivet::ast_text::read_program;
use rivet::x64::emulator::{self, Execution};
use rivet::{CompilationSession, CompileError, CompilerConfig, Library};

fn run_with(source: &str, config: CompilerConfig) -> Execution {
    let _ = env_logger::builder().is_test(true).try_init();
    let library = Library::standard();
    let program = read_program(source, &library).unwrap_or_else(|e| panic!("read failed: {e}"));
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let output = rivet::compile(&program, &library, &config, &session)
        .unwrap_or_else(|e| panic!("compile failed: {e}"));
    let module = output.as_asm().expect("asm backend output");
    emulator::run(module).unwrap_or_else(|e| panic!("emulation failed: {e}\n{}", module.render()))
}

fn run(source: &str) -> Execution {
    run_with(source, CompilerConfig::default())
}

#[test]
fn test_integer_arithmetic() {
    let execution = run("(var x i64)\n(assign x (* 6 7))\n(print x)");
    assert_eq!(execution.stdout, "42\n");
    assert_eq!(execution.exit_code, 0);
    assert_eq!(execution.calls_to("exit"), 1);
}

#[test]
fn test_signed_division_truncates_toward_zero() {
    let execution = run("(print (/ -17 5) \" \" (% -17 5) \" \" (/ 17 -5))");
    assert_eq!(execution.stdout, "-3 -2 -3\n");
}

#[test]
fn test_mixed_arithmetic_widens_to_float() {
    let execution = run("(var f f64)\n(assign f (/ 7 2.0))\n(print f \" \" (+ 1 0.25) \" \" (neg f))");
    assert_eq!(execution.stdout, "3.500000 1.250000 -3.500000\n");
}

#[test]
fn test_float_to_integer_truncates() {
    let execution = run("(print (cast i64 2.9) \" \" (cast i64 -2.9))");
    assert_eq!(execution.stdout, "2 -2\n");
}

#[test]
fn test_booleans_print_as_all_ones() {
    let execution = run("(var b bool)\n(assign b (< 1 2))\n(print b \" \" (> 1 2) \" \" (not b))");
    assert_eq!(execution.stdout, "-1 0 0\n");
}

#[test]
fn test_integer_complement() {
    let execution = run("(print (not 5) \" \" (neg 5))");
    assert_eq!(execution.stdout, "-6 -5\n");
}

#[test]
fn test_number_to_string_conversions() {
    let source = r#"
        (var s$ str)
        (assign s$ (+ "n=" (cast str 12)))
        (print s$ " " (cast str 0.5))
        (print (+ (cast i64 "40") 2) " " (cast f64 "1.5"))
    "#;
    let execution = run(source);
    assert_eq!(execution.stdout, "n=12 0.500000\n42 1.500000\n");
}

#[test]
fn test_string_comparisons() {
    let source = r#"
        (var a$ str)
        (assign a$ "abc")
        (print (= a$ "abc") " " (< a$ "abd") " " (>= a$ "abd") " " (<> a$ ""))
    "#;
    let execution = run(source);
    assert_eq!(execution.stdout, "-1 -1 0 -1\n");
}

#[test]
fn test_nan_comparisons() {
    let source = r#"
        (var z f64)
        (var n f64)
        (assign n (/ z z))
        (print (= n n) " " (<> n n) " " (< n 1.0) " " (<= n 1.0) " " (> n 1.0) " " (>= n 1.0))
        (print (= z 0.0) " " (<> z 0.0) " " (< z 1.0) " " (<= 1.0 z))
    "#;
    let execution = run(source);
    assert_eq!(execution.stdout, "0 -1 0 0 0 0\n-1 0 -1 0\n");
}

#[test]
fn test_names_differing_by_suffix_keep_separate_storage() {
    let source = r#"
        (var a$ str)
        (var a_s str)
        (var b% i64)
        (var b_i i64)
        (assign a$ "x")
        (assign a_s "y")
        (assign b% 1)
        (assign b_i 2)
        (print a$ a_s " " b% b_i)
    "#;
    let execution = run(source);
    assert_eq!(execution.stdout, "xy 12\n");
}

#[test]
fn test_arrays() {
    let source = r#"
        (array a i64 4)
        (array f f64 2)
        (array s$ str 3)
        (var i i64)
        (while (< i 4)
            (assign (elem a i) (* i i))
            (assign i (+ i 1)))
        (assign (elem f 1) 2.5)
        (assign (elem s$ 2) (+ "x" "y"))
        (print (elem a 3) " " (elem a 0) " " (elem f 1) " " (elem s$ 2) "|" (elem s$ 0) "|")
    "#;
    let execution = run(source);
    assert_eq!(execution.stdout, "9 0 2.500000 xy||\n");
}

#[test]
fn test_control_flow() {
    let source = r#"
        (var i i64)
        (var total i64)
        (while (<= i 10)
            (if (= (% i 2) 0)
                (then (assign total (+ total i)))
                (else (assign total (- total 1))))
            (assign i (+ i 1)))
        (print total)
    "#;
    let execution = run(source);
    // 0 + 2 + 4 + 6 + 8 + 10 minus five odd numbers
    assert_eq!(execution.stdout, "25\n");
}

#[test]
fn test_library_calls() {
    let source = r#"
        (print (call sqrt 16.0) " " (call _abs64 -3) " " (call strlen "four") " " (call pow 2.0 10.0))
    "#;
    let execution = run(source);
    assert_eq!(execution.stdout, "4.000000 3 4 1024.000000\n");
    assert_eq!(execution.calls_to("sqrt"), 1);
}

#[test]
fn test_deep_expression_spills_to_stack_slots() {
    // A right-leaning sum keeps every left operand live while the right side is evaluated.
    let depth = 16;
    let mut expr = format!("{depth}");
    for value in (1..depth).rev() {
        expr = format!("(+ {value} {expr})");
    }
    let source = format!("(var x i64)\n(assign x {expr})\n(print x)");

    let library = Library::standard();
    let program = read_program(&source, &library).unwrap();
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let output = rivet::compile(&program, &library, &CompilerConfig::default(), &session).unwrap();
    let module = output.as_asm().unwrap();
    assert!(module.stats.stack_slots > 0, "expected spilled values");

    let execution = emulator::run(module).unwrap();
    assert_eq!(execution.stdout, format!("{}\n", depth * (depth + 1) / 2));
}

#[test]
fn test_stack_slot_limit_is_enforced() {
    let mut expr = "20".to_string();
    for value in (1..20).rev() {
        expr = format!("(+ {value} {expr})");
    }
    let library = Library::standard();
    let program = read_program(&format!("(print {expr})"), &library).unwrap();
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let config = CompilerConfig::default().with_stack_slot_limit(2);
    let err = rivet::compile(&program, &library, &config, &session).unwrap_err();
    assert!(matches!(err, CompileError::ExhaustedStorage { .. }), "{err}");
    assert!(err.is_internal());
}

#[test]
fn test_division_by_literal_zero_is_a_user_error() {
    let library = Library::standard();
    let program = read_program("(var x i64)\n(print (/ x 0))", &library).unwrap();
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let err = rivet::compile(&program, &library, &CompilerConfig::default(), &session).unwrap_err();
    assert_eq!(err.to_string(), "2:8: division by zero");
    assert!(!err.is_internal());
}

#[test]
fn test_statement_comments() {
    let library = Library::standard();
    let program = read_program("(var x i64)\n(assign x 1)\n(print x)", &library).unwrap();
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let config = CompilerConfig::default().with_annotations(true);
    let text = rivet::compile(&program, &library, &config, &session).unwrap().render();
    assert!(text.contains("    ; assign x\n"));
    assert!(text.contains("    ; print\n"));

    let stats = session.stats();
    assert_eq!(stats.programs_compiled, 1);
}
