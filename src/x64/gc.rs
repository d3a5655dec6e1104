// This module generates the mark-and-sweep collector that manages heap strings at run time.
// The collector is not part of the compiler's state; it is a set of data words and two
// routines emitted into every program that registers a string. Each registered buffer gets a
// 24-byte node (data pointer, mark word, next pointer) linked at the head of the allocation
// list. The roots are the type-pointer words of string variables (one per array element) plus
// the temporary root words that keep fresh strings alive while an expression is in flight.
// The root table between _gc_tp_start and _gc_tp_end holds the addresses of all of them.
//
// Registration happens through _gc_register (RCX = buffer, RDX = address of the temporary
// root word). When the allocation count reaches the limit, _gc_collect marks every node a
// root word points at, then sweeps the list once: unmarked nodes are unlinked and freed
// together with their buffer, marked nodes are cleared for the next cycle. After the sweep
// the count equals the number of live nodes and the limit grows to twice that number when it
// is smaller.

//! Generated garbage collector for heap strings.

use crate::core::register_file::AsmReg;
use crate::core::symbols::{runtime, FunctionDescriptor, SymbolTable};
use crate::x64::asm::{Cond, DataItem, DataValue, Line, Memory, Mnemonic, Operand};
use crate::x64::registers::{RAX, RBP, RBX, RCX, RDI, RDX, RSI, RSP, SCRATCH};

pub const ALLOCATION_LIST: &str = "_gc_allocation_list";
pub const ALLOCATION_COUNT: &str = "_gc_allocation_count";
pub const ALLOCATION_LIMIT: &str = "_gc_allocation_limit";
pub const ROOTS_START: &str = "_gc_tp_start";
pub const ROOTS_END: &str = "_gc_tp_end";

pub const REGISTER: &str = "_gc_register";
pub const COLLECT: &str = "_gc_collect";

pub const NODE_SIZE: i64 = 24;
pub const NODE_DATA: i64 = 0;
pub const NODE_MARK: i64 = 8;
pub const NODE_NEXT: i64 = 16;

/// Library functions the collector routines call.
pub const DEPENDENCIES: [FunctionDescriptor; 2] = [runtime::MALLOC, runtime::FREE];

/// Label of the temporary root word at nesting depth `depth`.
pub fn temp_root(depth: usize) -> String {
    format!("_gc_temp_{depth}")
}

/// Collector globals, temporary roots and the root table.
pub fn data_items(symbols: &SymbolTable, temp_roots: usize, initial_limit: u64) -> Vec<DataItem> {
    let mut items = vec![
        DataItem::Comment("collector state".to_string()),
        DataItem::quad(ALLOCATION_LIST, DataValue::Int(0)),
        DataItem::quad(ALLOCATION_COUNT, DataValue::Int(0)),
        DataItem::quad(ALLOCATION_LIMIT, DataValue::Int(initial_limit as i64)),
    ];
    for depth in 0..temp_roots {
        items.push(DataItem::quad(temp_root(depth), DataValue::Int(0)));
    }

    items.push(DataItem::Label(ROOTS_START.to_string()));
    for variable in symbols.variables() {
        let Some(tp) = &variable.type_pointer else {
            continue;
        };
        let words = variable.length.unwrap_or(1);
        let values = (0..words).map(|i| DataValue::Address(tp.clone(), 8 * i as i64)).collect();
        items.push(DataItem::Quad { label: None, values });
    }
    for depth in 0..temp_roots {
        items.push(DataItem::Quad {
            label: None,
            values: vec![DataValue::Address(temp_root(depth), 0)],
        });
    }
    items.push(DataItem::Label(ROOTS_END.to_string()));
    items
}

fn reg(r: AsmReg) -> Operand {
    Operand::Reg(r)
}

fn mem(r: AsmReg, disp: i64) -> Operand {
    Operand::Mem(Memory::base(r, disp))
}

/// `_gc_register(buffer, root)`: link a node for `buffer` and store it into `*root`.
pub fn register_routine() -> Vec<Line> {
    use Mnemonic::*;
    vec![
        Line::label(REGISTER),
        Line::op1(Push, reg(RBP)),
        Line::op2(Mov, reg(RBP), reg(RSP)),
        Line::op2(Sub, reg(RSP), Operand::Imm(48)),
        Line::op2(Mov, mem(RBP, -8), reg(RCX)),
        Line::op2(Mov, mem(RBP, -16), reg(RDX)),
        Line::op2(Mov, reg(RCX), Operand::Imm(NODE_SIZE)),
        Line::op1(Call, Operand::sym(runtime::MALLOC.name)),
        Line::op2(Mov, reg(SCRATCH), mem(RBP, -8)),
        Line::op2(Mov, mem(RAX, NODE_DATA), reg(SCRATCH)),
        Line::op2(Mov, mem(RAX, NODE_MARK), Operand::Imm(0)),
        Line::op2(Mov, reg(SCRATCH), Operand::sym(ALLOCATION_LIST)),
        Line::op2(Mov, mem(RAX, NODE_NEXT), reg(SCRATCH)),
        Line::op2(Mov, Operand::sym(ALLOCATION_LIST), reg(RAX)),
        Line::op2(Mov, reg(SCRATCH), mem(RBP, -16)),
        Line::op2(Mov, mem(SCRATCH, 0), reg(RAX)),
        Line::op2(Add, Operand::sym(ALLOCATION_COUNT), Operand::Imm(1)),
        Line::op2(Mov, reg(RAX), Operand::sym(ALLOCATION_COUNT)),
        Line::op2(Cmp, reg(RAX), Operand::sym(ALLOCATION_LIMIT)),
        Line::op1(J(Cond::L), Operand::Forward),
        Line::op1(Call, Operand::label(COLLECT)),
        Line::AnonLabel,
        Line::op2(Mov, reg(RSP), reg(RBP)),
        Line::op1(Pop, reg(RBP)),
        Line::op0(Ret),
    ]
}

/// `_gc_collect()`: mark from the root table, then sweep the allocation list.
pub fn collect_routine() -> Vec<Line> {
    use Mnemonic::*;
    vec![
        Line::label(COLLECT),
        Line::op1(Push, reg(RBP)),
        Line::op2(Mov, reg(RBP), reg(RSP)),
        Line::op1(Push, reg(RBX)),
        Line::op1(Push, reg(RSI)),
        Line::op1(Push, reg(RDI)),
        Line::op2(Sub, reg(RSP), Operand::Imm(40)),
        // mark
        Line::op2(Lea, reg(RBX), Operand::sym(ROOTS_START)),
        Line::op2(Lea, reg(RSI), Operand::sym(ROOTS_END)),
        Line::label("_gc_mark_loop"),
        Line::op2(Cmp, reg(RBX), reg(RSI)),
        Line::op1(J(Cond::Ae), Operand::label("_gc_sweep")),
        Line::op2(Mov, reg(RAX), mem(RBX, 0)),
        Line::op2(Mov, reg(RAX), mem(RAX, 0)),
        Line::op2(Add, reg(RBX), Operand::Imm(8)),
        Line::op2(Cmp, reg(RAX), Operand::Imm(0)),
        Line::op1(J(Cond::E), Operand::label("_gc_mark_loop")),
        Line::op2(Mov, mem(RAX, NODE_MARK), Operand::Imm(1)),
        Line::op1(Jmp, Operand::label("_gc_mark_loop")),
        // sweep: rsi is the link to the current node, rbx counts survivors
        Line::label("_gc_sweep"),
        Line::op2(Lea, reg(RSI), Operand::sym(ALLOCATION_LIST)),
        Line::op2(Mov, reg(RBX), Operand::Imm(0)),
        Line::label("_gc_sweep_loop"),
        Line::op2(Mov, reg(RDI), mem(RSI, 0)),
        Line::op2(Cmp, reg(RDI), Operand::Imm(0)),
        Line::op1(J(Cond::E), Operand::label("_gc_sweep_done")),
        Line::op2(Cmp, mem(RDI, NODE_MARK), Operand::Imm(0)),
        Line::op1(J(Cond::E), Operand::label("_gc_sweep_free")),
        Line::op2(Mov, mem(RDI, NODE_MARK), Operand::Imm(0)),
        Line::op2(Add, reg(RBX), Operand::Imm(1)),
        Line::op2(Lea, reg(RSI), mem(RDI, NODE_NEXT)),
        Line::op1(Jmp, Operand::label("_gc_sweep_loop")),
        Line::label("_gc_sweep_free"),
        Line::op2(Mov, reg(RAX), mem(RDI, NODE_NEXT)),
        Line::op2(Mov, mem(RSI, 0), reg(RAX)),
        Line::op2(Mov, reg(RCX), mem(RDI, NODE_DATA)),
        Line::op1(Call, Operand::sym(runtime::FREE.name)),
        Line::op2(Mov, reg(RCX), reg(RDI)),
        Line::op1(Call, Operand::sym(runtime::FREE.name)),
        Line::op1(Jmp, Operand::label("_gc_sweep_loop")),
        Line::label("_gc_sweep_done"),
        Line::op2(Mov, Operand::sym(ALLOCATION_COUNT), reg(RBX)),
        Line::op2(Mov, reg(RAX), reg(RBX)),
        Line::op2(Shl, reg(RAX), Operand::Imm(1)),
        Line::op2(Cmp, reg(RAX), Operand::sym(ALLOCATION_LIMIT)),
        Line::op1(J(Cond::Le), Operand::Forward),
        Line::op2(Mov, Operand::sym(ALLOCATION_LIMIT), reg(RAX)),
        Line::AnonLabel,
        Line::op2(Add, reg(RSP), Operand::Imm(40)),
        Line::op1(Pop, reg(RDI)),
        Line::op1(Pop, reg(RSI)),
        Line::op1(Pop, reg(RBX)),
        Line::op1(Pop, reg(RBP)),
        Line::op0(Ret),
    ]
}

/// Both routines, ready to append after the entry routine.
pub fn routines() -> Vec<Line> {
    let mut lines = vec![Line::Blank];
    lines.extend(register_routine());
    lines.push(Line::Blank);
    lines.extend(collect_routine());
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ValueType, VarDecl};
    use crate::x64::asm::render_lines;

    #[test]
    fn test_root_table_covers_string_variables_and_temporaries() {
        let mut symbols = SymbolTable::new();
        symbols.declare(&VarDecl::scalar("s$", ValueType::Str));
        symbols.declare(&VarDecl::scalar("n", ValueType::I64));
        symbols.declare(&VarDecl::array("names$", ValueType::Str, 3));
        let items = data_items(&symbols, 2, 100);
        let text: Vec<String> = items.iter().map(ToString::to_string).collect();

        assert!(text.contains(&"    _gc_allocation_limit dq 100".to_string()));
        assert!(text.contains(&"    _gc_temp_1 dq 0".to_string()));
        let start = text.iter().position(|l| l.trim() == "_gc_tp_start:").unwrap();
        let end = text.iter().position(|l| l.trim() == "_gc_tp_end:").unwrap();
        assert_eq!(
            &text[start + 1..end],
            &[
                "    dq tp_s_s".to_string(),
                "    dq tp_names_s, tp_names_s+8, tp_names_s+16".to_string(),
                "    dq _gc_temp_0".to_string(),
                "    dq _gc_temp_1".to_string(),
            ]
        );
    }

    #[test]
    fn test_routines_keep_the_stack_aligned() {
        // entry leaves rsp at 8 mod 16; every push and sub before a call must restore 0 mod 16
        for routine in [register_routine(), collect_routine()] {
            let mut offset = 8i64;
            for line in &routine {
                match (line.mnemonic(), line.operands()) {
                    (Some(Mnemonic::Push), _) => offset += 8,
                    (Some(Mnemonic::Sub), [Operand::Reg(r), Operand::Imm(n)]) if *r == RSP => {
                        offset += *n
                    }
                    (Some(Mnemonic::Call), _) => assert_eq!(offset % 16, 0),
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn test_register_routine_text() {
        let text = render_lines(&register_routine());
        assert!(text.starts_with("_gc_register:\n    push rbp\n"));
        assert!(text.contains("    mov rcx, 24\n    call [malloc]\n"));
        assert!(text.contains("    add qword [_gc_allocation_count], 1\n"));
        assert!(text.contains("    jl @f\n    call _gc_collect\n@@:\n"));
    }
}
