use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    LoadConst,
    LoadLocal,
    StoreLocal,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Not,
    Pop,
    Jump,
    JumpIfFalse,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
    MakeList,
    Call,
    CallBuiltin,
    Return,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operand_a: u32,
    pub operand_b: u32,
}

impl Instruction {
    pub fn new(opcode: Opcode, operand_a: u32, operand_b: u32) -> Self {
        Self {
            opcode,
            operand_a,
            operand_b,
        }
    }

    pub fn simple(opcode: Opcode) -> Self {
        Self::new(opcode, 0, 0)
    }
}
