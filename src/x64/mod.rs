//! x86-64 architecture-specific components.
//!
//! This module contains the assembly backend:
//! - Line-level assembly model and flat assembler rendering (`asm`)
//! - Register names and the Windows x64 register pools (`registers`)
//! - Windows x64 calling convention and frame layout (`calling_convention`)
//! - Storage locations with scoped release (`storage`)
//! - Expression and statement generators (`lower`)
//! - The generated string collector (`gc`)
//! - Whole-program assembly (`program`)
//! - A reference interpreter for emitted code (`emulator`)

pub mod asm;
pub mod calling_convention;
pub mod emulator;
pub mod gc;
pub mod lower;
pub mod program;
pub mod registers;
pub mod storage;

pub use asm::{DataItem, DataValue, Line, Mnemonic, Operand};
pub use calling_convention::{CCAssigner, CCAssignment, CallFrame, FunctionFrame, RegBank, Win64Assigner};
pub use emulator::{Emulator, EmulatorError, Execution};
pub use lower::AsmLowering;
pub use program::{compile_program, AsmModule};
pub use storage::{StorageFactory, StorageLocation, Volatility};
