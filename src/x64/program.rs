// This module assembles a complete flat-assembler program from a lowered body. The entry
// routine `start` gets a frame sized after lowering, once the peak number of stack slots and
// the set of non-volatile registers the body touched are known. The body always ends with a
// call to `exit`. When the body registered any string, the collector routines and their data
// follow, and malloc/free are added to the import table.
//
// The data section lists, in order: collector globals and the root table, variables (strings
// start out pointing at the empty string constant), type-pointer words, float and string
// constants. The import section is rendered from the dependency map, one `import` directive
// per library.

//! Whole-program assembly for the x64 backend.

use std::fmt;

use log::debug;

use super::asm::{DataItem, DataValue, Line, Mnemonic, Operand};
use super::calling_convention::FunctionFrame;
use super::gc;
use super::lower::AsmLowering;
use super::storage::StorageFactory;
use crate::ast::{Program, ValueType};
use crate::core::config::CompilerConfig;
use crate::core::error::CompileResult;
use crate::core::lowering::lower_block;
use crate::core::session::{CompilationSession, LoweringStats};
use crate::core::symbols::{Constant, Dependencies, Library, SymbolTable};

/// Label of the program entry routine.
pub const ENTRY: &str = "start";

/// A lowered program: data items, code and the imports it needs.
#[derive(Debug, Clone)]
pub struct AsmModule {
    pub data: Vec<DataItem>,
    pub code: Vec<Line>,
    pub dependencies: Dependencies,
    pub entry: String,
    pub stats: LoweringStats,
}

impl fmt::Display for AsmModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "format PE64 console")?;
        writeln!(f, "entry {}", self.entry)?;
        writeln!(f, "\ninclude 'win64a.inc'")?;

        writeln!(f, "\nsection '.data' data readable writeable")?;
        for item in &self.data {
            writeln!(f, "{item}")?;
        }

        writeln!(f, "\nsection '.text' code readable executable")?;
        for line in &self.code {
            writeln!(f, "{line}")?;
        }

        if !self.dependencies.is_empty() {
            writeln!(f, "\nsection '.idata' import data readable")?;
            let libraries: Vec<String> = self
                .dependencies
                .libraries()
                .map(|(library, _)| format!("{library},'{library}.dll'"))
                .collect();
            writeln!(f, "    library {}", libraries.join(",\\\n            "))?;
            for (library, symbols) in self.dependencies.libraries() {
                let entries: Vec<String> =
                    symbols.iter().map(|symbol| format!("{symbol},'{symbol}'")).collect();
                writeln!(f, "    import {library},\\")?;
                writeln!(f, "        {}", entries.join(",\\\n        "))?;
            }
        }
        Ok(())
    }
}

impl AsmModule {
    /// Flat assembler source for a PE64 console executable.
    pub fn render(&self) -> String {
        self.to_string()
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Line> + '_ {
        self.code.iter().filter(|line| line.mnemonic().is_some())
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions().count()
    }

    /// Call sites targeting `symbol`, imported or internal.
    pub fn calls_to(&self, symbol: &str) -> usize {
        self.instructions()
            .filter(|line| line.mnemonic() == Some(Mnemonic::Call))
            .filter(|line| match line.operands() {
                [Operand::Label(label)] => label == symbol,
                [Operand::Mem(mem)] => mem.symbol_name() == Some(symbol),
                _ => false,
            })
            .count()
    }

    pub fn count(&self, mnemonic: Mnemonic) -> usize {
        self.instructions().filter(|line| line.mnemonic() == Some(mnemonic)).count()
    }

    /// Whether the collector routines are part of the program.
    pub fn has_collector(&self) -> bool {
        self.code.iter().any(|line| *line == Line::label(gc::REGISTER))
    }
}

/// Lower `program` and assemble it into a module.
pub fn compile_program(
    program: &Program,
    library: &Library,
    config: &CompilerConfig,
    session: &CompilationSession<'_>,
) -> CompileResult<AsmModule> {
    let mut symbols = SymbolTable::from_program(program);
    let factory = StorageFactory::with_slot_limit(config.stack_slot_limit);

    let mut lowering = AsmLowering::new(library, &mut symbols, factory.clone(), config);
    lower_block(&mut lowering, &program.body)?;
    lowering.emit_exit(0)?;
    let body = lowering.finish()?;

    let mut frame = FunctionFrame::new(session.arena());
    frame.value_slots = factory.peak_stack_slots();
    for reg in factory.used_non_volatile() {
        frame.add_saved_register(reg);
    }
    frame.calculate_frame_size();

    let mut code = vec![Line::label(ENTRY)];
    code.extend(frame.prologue());
    code.extend(body.lines);
    code.extend(frame.epilogue());
    if body.gc_used {
        code.extend(gc::routines());
        for function in &gc::DEPENDENCIES {
            symbols.add_dependency(function);
        }
    }

    let mut data = Vec::new();
    if body.gc_used {
        data.extend(gc::data_items(&symbols, body.temp_roots, config.gc_limit()));
    }
    data.extend(variable_items(&mut symbols));
    data.extend(constant_items(&symbols));

    let module = AsmModule {
        data,
        code,
        dependencies: symbols.dependencies().clone(),
        entry: ENTRY.to_string(),
        stats: body.stats,
    };
    debug!(
        "assembled program: {} instructions, {} data items, frame {} bytes, collector {}",
        module.instruction_count(),
        module.data.len(),
        frame.frame_size,
        if body.gc_used { "included" } else { "omitted" }
    );
    for line in module.instructions() {
        if let Some(mnemonic) = line.mnemonic() {
            session.record_instruction(&mnemonic.to_string());
        }
    }
    session.record_program_compiled("asm", module.code.len(), &module.stats);
    Ok(module)
}

fn variable_items(symbols: &mut SymbolTable) -> Vec<DataItem> {
    let has_strings = symbols.variables().iter().any(|v| v.ty == ValueType::Str);
    let empty = has_strings.then(|| symbols.string_constant(""));

    let mut values = Vec::new();
    let mut type_pointers = Vec::new();
    for variable in symbols.variables() {
        let initial = match (variable.ty, &empty) {
            (ValueType::F64, _) => DataValue::Float(0.0),
            (ValueType::Str, Some(empty)) => DataValue::Address(empty.clone(), 0),
            _ => DataValue::Int(0),
        };
        values.push(match variable.length {
            Some(count) => DataItem::Repeat { label: variable.symbol.clone(), count, value: initial },
            None => DataItem::quad(variable.symbol.as_str(), initial),
        });
        if let Some(tp) = &variable.type_pointer {
            type_pointers.push(match variable.length {
                Some(count) => DataItem::Repeat { label: tp.clone(), count, value: DataValue::Int(0) },
                None => DataItem::quad(tp.as_str(), DataValue::Int(0)),
            });
        }
    }
    values.extend(type_pointers);
    values
}

fn constant_items(symbols: &SymbolTable) -> Vec<DataItem> {
    let mut floats = Vec::new();
    let mut strings = Vec::new();
    for (label, constant) in symbols.constants() {
        match constant {
            Constant::Float(value) => floats.push(DataItem::quad(label.as_str(), DataValue::Float(*value))),
            Constant::SignMask => floats.push(DataItem::quad(label.as_str(), DataValue::Float(-0.0))),
            Constant::Str(text) => strings.push(DataItem::c_string(label.as_str(), text)),
        }
    }
    floats.extend(strings);
    floats
}
