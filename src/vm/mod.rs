//! The embedded Cinder runtime: bytecode container, textual assembler and
//! the stack interpreter.

pub mod assembler;
pub mod bytecode;
pub mod instruction;
pub mod interp;

pub use assembler::assemble;
pub use bytecode::{Constant, FunctionDef, Program};
pub use instruction::{Instruction, Opcode};
pub use interp::{Builtins, Value, Vm};
