// This module contains the second backend, which lowers the typed AST to LLVM IR text. The whole
// program becomes `define i32 @main()`; program variables become module globals, string
// literals become private byte-array constants, and every library function the body calls is
// declared from its descriptor. The backend shares the dispatch layer with x64 but not the
// storage model or the collector, since SSA values need neither registers nor GC roots.

//! LLVM IR text backend.

pub mod ir;
pub mod lower;

pub use ir::{IrLine, IrType, Typed, Value};
pub use lower::{SsaLowering, SsaSlot};

use std::fmt;

use log::debug;

use crate::ast::{Program, ValueType};
use crate::core::config::CompilerConfig;
use crate::core::error::CompileResult;
use crate::core::lowering::lower_block;
use crate::core::session::{CompilationSession, LoweringStats};
use crate::core::symbols::{Constant, Dependencies, Library, SymbolTable};

/// A lowered program in SSA form.
#[derive(Debug, Clone)]
pub struct SsaModule {
    pub globals: Vec<String>,
    pub declarations: Vec<String>,
    pub body: Vec<IrLine>,
    pub dependencies: Dependencies,
    pub stats: LoweringStats,
}

impl fmt::Display for SsaModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; ModuleID = 'rivet'")?;
        writeln!(f, "source_filename = \"rivet\"")?;
        if !self.globals.is_empty() {
            writeln!(f)?;
            for global in &self.globals {
                writeln!(f, "{global}")?;
            }
        }
        if !self.declarations.is_empty() {
            writeln!(f)?;
            for declaration in &self.declarations {
                writeln!(f, "{declaration}")?;
            }
        }
        writeln!(f, "\ndefine i32 @main() {{")?;
        for line in &self.body {
            writeln!(f, "{line}")?;
        }
        writeln!(f, "}}")
    }
}

impl SsaModule {
    pub fn render(&self) -> String {
        self.to_string()
    }

    pub fn instructions(&self) -> impl Iterator<Item = &IrLine> + '_ {
        self.body.iter().filter(|line| line.opcode().is_some())
    }

    pub fn count(&self, opcode: &str) -> usize {
        self.instructions().filter(|line| line.opcode() == Some(opcode)).count()
    }

    pub fn calls_to(&self, symbol: &str) -> usize {
        let needle = format!("@{symbol}(");
        self.instructions()
            .filter(|line| match line {
                IrLine::Inst { opcode: "call", operands, .. } => operands.contains(&needle),
                _ => false,
            })
            .count()
    }
}

/// Lower `program` into an SSA module.
pub fn compile_program(
    program: &Program,
    library: &Library,
    config: &CompilerConfig,
    session: &CompilationSession<'_>,
) -> CompileResult<SsaModule> {
    let mut symbols = SymbolTable::from_program(program);
    let mut lowering = SsaLowering::new(library, &mut symbols, config);
    lower_block(&mut lowering, &program.body)?;
    let (body, stats) = lowering.finish(0);

    let mut globals = variable_globals(&mut symbols);
    globals.extend(constant_globals(&symbols));
    let declarations = symbols
        .dependencies()
        .symbols()
        .filter_map(|name| library.descriptor(name))
        .map(|function| ir::declaration(&function))
        .collect();

    let module = SsaModule {
        globals,
        declarations,
        body,
        dependencies: symbols.dependencies().clone(),
        stats,
    };
    debug!(
        "assembled SSA module: {} instructions, {} globals, {} declarations",
        module.instructions().count(),
        module.globals.len(),
        module.declarations.len()
    );
    for line in module.instructions() {
        if let Some(opcode) = line.opcode() {
            session.record_instruction(opcode);
        }
    }
    session.record_program_compiled("llvm", module.body.len(), &module.stats);
    Ok(module)
}

fn variable_globals(symbols: &mut SymbolTable) -> Vec<String> {
    let has_strings = symbols.variables().iter().any(|v| v.ty == ValueType::Str);
    let empty = has_strings.then(|| symbols.string_constant(""));

    let mut globals = Vec::new();
    for variable in symbols.variables() {
        let ty = IrType::of(variable.ty);
        let scalar = match (variable.ty, &empty) {
            (ValueType::F64, _) => Value::Float(0.0).to_string(),
            (ValueType::Bool, _) => "false".to_string(),
            (ValueType::Str, Some(empty)) => Value::Global(empty.clone()).to_string(),
            _ => "0".to_string(),
        };
        let global = match variable.length {
            None => format!("@{} = global {} {}", variable.symbol, ty, scalar),
            Some(count) if variable.ty == ValueType::Str => {
                let elements = vec![format!("ptr {scalar}"); count];
                format!(
                    "@{} = global [{} x ptr] [{}]",
                    variable.symbol,
                    count,
                    elements.join(", ")
                )
            }
            Some(count) => {
                format!("@{} = global [{} x {}] zeroinitializer", variable.symbol, count, ty)
            }
        };
        globals.push(global);
    }
    globals
}

fn constant_globals(symbols: &SymbolTable) -> Vec<String> {
    symbols
        .constants()
        .iter()
        .filter_map(|(label, constant)| match constant {
            Constant::Str(text) => {
                let (literal, len) = ir::c_string(text);
                Some(format!(
                    "@{label} = private unnamed_addr constant [{len} x i8] {literal}"
                ))
            }
            Constant::Float(_) | Constant::SignMask => None,
        })
        .collect()
}
