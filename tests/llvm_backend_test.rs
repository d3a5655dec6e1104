//! LLVM IR backend tests
//!
//! Programs are lowered to SSA text and checked structurally: every block ends in a
//! terminator, every value is defined once before it is used and every branch target
//! exists. Selected shapes are checked textually.

use std::collections::HashSet;

use bumpalo::Bump;
use pretty_assertions::assert_eq;

use rivet::ast_text::read_program;
use rivet::llvm::{IrLine, SsaModule};
use rivet::{BackendKind, CompilationSession, CompileError, CompilerConfig, Library};

fn try_compile(source: &str) -> Result<SsaModule, CompileError> {
    let _ = env_logger::builder().is_test(true).try_init();
    let library = Library::standard();
    let program = read_program(source, &library).unwrap_or_else(|e| panic!("read failed: {e}"));
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let config = CompilerConfig::default().with_backend(BackendKind::Llvm);
    let output = rivet::compile(&program, &library, &config, &session)?;
    Ok(output.as_llvm().expect("llvm backend output").clone())
}

fn compile(source: &str) -> SsaModule {
    let module = try_compile(source).unwrap_or_else(|e| panic!("compile failed: {e}"));
    check_well_formed(&module);
    module
}

/// Names of `%` references in an operand string.
fn locals(operands: &str) -> Vec<&str> {
    operands
        .split('%')
        .skip(1)
        .map(|rest| rest.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_')).next().unwrap_or(""))
        .collect()
}

fn check_well_formed(module: &SsaModule) {
    let labels: HashSet<&str> = module
        .body
        .iter()
        .filter_map(|line| match line {
            IrLine::Label(name) => Some(name.as_str()),
            _ => None,
        })
        .collect();

    assert_eq!(module.body.first(), Some(&IrLine::Label("entry".to_string())));
    assert!(module.body.last().is_some_and(IrLine::is_terminator), "body must end in ret");

    let mut defined: HashSet<String> = HashSet::new();
    let mut previous: Option<&IrLine> = None;
    for line in &module.body {
        match line {
            IrLine::Label(name) => {
                if let Some(prev) = previous {
                    assert!(prev.is_terminator(), "block before {name} falls through after {prev}");
                }
            }
            IrLine::Inst { result, operands, .. } => {
                if let Some(prev) = previous {
                    assert!(!prev.is_terminator(), "'{line}' follows a terminator without a label");
                }
                for target in operands.split("label %").skip(1) {
                    let prefixed = format!("%{target}");
                    let target = locals(&prefixed)[0];
                    assert!(labels.contains(target), "branch to unknown block %{target} in '{line}'");
                }
                for name in locals(operands) {
                    if !labels.contains(name) {
                        assert!(defined.contains(name), "%{name} used before definition in '{line}'");
                    }
                }
                if let Some(result) = result {
                    assert!(defined.insert(result.clone()), "%{result} defined twice");
                }
            }
            IrLine::Comment(_) => continue,
        }
        previous = Some(line);
    }
}

#[test]
fn test_straight_line_program() {
    let module = compile("(var x i64)\n(assign x (* 6 7))\n(print x)");
    let text = module.render();
    assert!(text.contains("define i32 @main() {\nentry:\n"));
    assert!(text.contains("  %t0 = mul i64 6, 7\n  store i64 %t0, ptr @v_x\n"));
    assert!(text.ends_with("  ret i32 0\n}\n"));
    assert!(text.contains("declare i32 @printf(ptr, ...)"));
    assert_eq!(module.calls_to("printf"), 1);
    assert_eq!(module.count("phi"), 0);
}

#[test]
fn test_string_runtime_declarations() {
    let module = compile("(var s$ str)\n(assign s$ (+ \"a\" (cast str 1)))\n(print (+ s$ \"!\"))");
    for declaration in [
        "declare ptr @malloc(i64)",
        "declare i64 @strlen(ptr)",
        "declare ptr @strcpy(ptr, ptr)",
        "declare ptr @strcat(ptr, ptr)",
        "declare void @free(ptr)",
        "declare i32 @sprintf(ptr, ptr, ...)",
    ] {
        assert!(module.declarations.iter().any(|d| d == declaration), "missing {declaration}");
    }
    assert!(module.globals.iter().any(|g| g.starts_with("@v_s_s = global ptr @_str_")));
    // The converted number and the printed concatenation are transient.
    assert_eq!(module.calls_to("free"), 2);
    assert_eq!(module.calls_to("malloc"), 3);
}

#[test]
fn test_short_circuit_produces_phi_per_operator() {
    let module = compile(
        "(var a i64)\n(var b bool)\n(assign b (or (and (> a 1) (< a 5)) (= a 9)))\n(print b)",
    );
    assert_eq!(module.count("phi"), 2);
    let text = module.render();
    assert!(text.contains("phi i1"));
    assert!(text.contains("logic_end0:"));
    assert!(text.contains("logic_end1:"));
    // Printed booleans are widened for printf.
    assert!(text.contains("zext i1"));
}

#[test]
fn test_control_flow_blocks() {
    let module = compile(
        r#"
        (var i i64)
        (while (< i 3)
            (if (= i 1)
                (then (print "one"))
                (else (print i)))
            (assign i (+ i 1)))
        "#,
    );
    let text = module.render();
    assert!(text.contains("  br label %while0\nwhile0:\n"));
    assert!(text.contains("br i1 %t1, label %body0, label %wend0"));
    assert!(text.contains("then1:"));
    assert!(text.contains("else1:"));
    assert!(text.contains("endif1:"));
    assert!(text.contains("  br label %while0\nwend0:\n"));
}

#[test]
fn test_integer_condition_compares_with_zero() {
    let module = compile("(var n i64)\n(if n (then (print \"set\")))");
    assert!(module.render().contains("%t1 = icmp ne i64 %t0, 0"));
}

#[test]
fn test_float_and_string_comparisons() {
    let module = compile(
        "(var f f64)\n(var s$ str)\n(print (<= f 1) (<> s$ \"x\"))",
    );
    let text = module.render();
    assert!(text.contains("sitofp i64 1 to double"));
    assert!(text.contains("fcmp ole double"));
    assert!(text.contains("call i32 @strcmp(ptr"));
    assert!(text.contains("icmp ne i32"));
}

#[test]
fn test_float_predicates_treat_nan_like_ieee() {
    let module = compile(
        "(var z f64)\n(var n f64)\n(assign n (/ z z))\n(print (= n n) (<> n n) (< n 1.0) (>= n 1.0))",
    );
    let text = module.render();
    assert!(text.contains("fcmp oeq double"));
    assert!(text.contains("fcmp une double"));
    assert!(text.contains("fcmp olt double"));
    assert!(text.contains("fcmp oge double"));
    assert!(!text.contains("fcmp one"));
    assert!(!text.contains("fcmp ult"));
}

#[test]
fn test_arrays_use_element_pointers() {
    let module = compile("(array a f64 3)\n(assign (elem a 2) 1.5)\n(print (elem a 2))");
    assert!(module.globals.contains(&"@v_a = global [3 x double] zeroinitializer".to_string()));
    assert_eq!(module.count("getelementptr"), 2);
    assert!(module.render().contains("getelementptr inbounds [3 x double], ptr @v_a, i64 0, i64 2"));
}

#[test]
fn test_conversions() {
    let module = compile(
        "(print (cast i64 2.5) (cast f64 (< 1 2)) (cast i64 (< 1 2)) (cast bool 3) (cast f64 \"2\"))",
    );
    let text = module.render();
    assert!(text.contains("fptosi double"));
    assert!(text.contains("uitofp i1"));
    assert!(text.contains("zext i1"));
    assert!(text.contains("icmp ne i64 3, 0"));
    assert!(text.contains("call double @atof(ptr"));
}

#[test]
fn test_string_literal_escapes() {
    let module = compile("(print \"say \\\"hi\\\"\\n\")");
    assert!(module
        .globals
        .iter()
        .any(|g| g.contains("c\"say \\22hi\\22\\0A\\00\"")));
}

#[test]
fn test_errors_are_shared_with_the_assembly_backend() {
    let err = try_compile("(var x i64)\n(print (% x 0))").unwrap_err();
    assert_eq!(err.to_string(), "2:8: division by zero");

    let err = try_compile("(var s$ str)\n(if s$ (then (print 1)))").unwrap_err();
    assert_eq!(err, CompileError::DispatchMiss { backend: "llvm", node: "condition" });
}
