//! Opcode definitions for the stack machine.
//!
//! Instructions pop their operands off the evaluation stack and push their
//! result. Multi-operand instructions expect their operands pushed in
//! documented order; "top" refers to the value on top of the stack.
//!
//! Immediate encoding is fixed: `u32` register/member/offset immediates and
//! `i64`/`f64` constants, all little-endian. Jump offsets are absolute byte
//! offsets within the function's code.

use strum::{Display, FromRepr, IntoStaticStr};

/// All opcodes. The discriminant is the encoded byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr, IntoStaticStr)]
#[repr(u8)]
pub enum Opcode {
    /// Push null.
    LoadNull = 1,
    /// Push false.
    LoadFalse,
    /// Push true.
    LoadTrue,
    /// (v: i64) Push the integer constant v.
    LoadInt,
    /// (v: f64) Push the float constant v.
    LoadFloat,
    /// (i: u32) Push parameter i.
    LoadParam,
    /// (i: u32) Pop v, set parameter i to v.
    StoreParam,
    /// (i: u32) Push local register i.
    LoadLocal,
    /// (i: u32) Pop v, set local register i to v.
    StoreLocal,
    /// (i: u32) Push module member i.
    LoadModule,
    /// (i: u32) Pop v, set module member i to v.
    StoreModule,
    /// (i: u32) Pop obj, push obj.<member i> (member names a symbol item).
    LoadMember,
    /// (i: u32) Pop obj, v. Set obj.<member i> = v.
    StoreMember,
    /// (i: u32) Pop obj, push tuple member i.
    LoadTupleMember,
    /// (i: u32) Pop obj, v. Set tuple member i of obj to v.
    StoreTupleMember,
    /// Pop obj, index. Push obj[index].
    LoadIndex,
    /// Pop obj, index, v. Set obj[index] = v.
    StoreIndex,
    /// Push the closure environment of the current function.
    LoadClosure,
    /// (n: u32, i: u32) Pop env, push the captured variable at level n,
    /// index i.
    LoadEnv,
    /// (n: u32, i: u32) Pop env, v. Set the captured variable at level n,
    /// index i to v.
    StoreEnv,
    /// (i: u32) Pop obj. Push the method named by member i, then either obj
    /// (instance method) or null (plain function member). Use with
    /// CallMethod.
    LoadMethod,

    // Stack shuffling.
    /// Push a copy of the top value.
    Copy,
    /// Swap the two topmost values.
    Swap,
    /// (i: u32) Push local register i (alias of LoadLocal for shuffles).
    Push,
    /// Pop the top value.
    Pop,
    /// (i: u32) Pop the top value into local register i.
    PopTo,

    // Arithmetic. Pop a, b; push the result of `a op b`.
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    /// Pop a, push -a.
    UNeg,
    /// Pop a, push +a.
    UPos,
    /// Pop a, push !a.
    LNot,
    /// Pop a, push ~a.
    BNot,
    /// Pop a, b; push a << b.
    LSh,
    /// Pop a, b; push a >> b.
    RSh,
    BAnd,
    BOr,
    BXor,

    // Comparison. Pop a, b; push the boolean result of `a op b`.
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    NEq,

    // Constructors.
    /// (n: u32) Pop v1..vn, push an array.
    Array,
    /// (n: u32) Pop v1..vn, push a tuple.
    Tuple,
    /// (n: u32) Pop v1..vn, push a set.
    Set,
    /// (n: u32) Pop k1, v1, .., kn, vn, push a hash table.
    Map,
    /// (n: u32) Pop parent, push an environment with n slots.
    Env,
    /// Pop env, template; push a closure function.
    Closure,
    /// (i: u32) Member i names a record schema; pop one value per schema
    /// key, push a record.
    Record,
    /// Push a new string formatter.
    Formatter,
    /// Pop value; append its string rendering to the formatter on top.
    AppendFormat,
    /// Pop the formatter, push its accumulated string.
    FormatResult,

    // Control.
    /// (o: u32) Jump to byte offset o.
    Jmp,
    /// (o: u32) Pop v; jump to o when v is truthy.
    JmpTrue,
    /// (o: u32) Pop v; jump to o when v is falsy.
    JmpFalse,
    /// (n: u32) Pop n arguments and the callee below them; call.
    Call,
    /// (n: u32) Like Call for a method loaded via LoadMethod; the instance
    /// slot is an implicit extra argument.
    CallMethod,
    /// Pop v, return v to the caller.
    Return,
    /// Pop expression string, message; abort with an assertion error.
    AssertFail,
}

/// Immediate operand shapes, used by the disassembler and decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operands {
    None,
    /// One u32 immediate.
    U32,
    /// Two u32 immediates.
    U32U32,
    /// One i64 immediate.
    I64,
    /// One f64 immediate.
    F64,
    /// One u32 jump offset.
    Offset,
}

impl Opcode {
    /// The operand shape following the opcode byte.
    #[must_use]
    pub fn operands(self) -> Operands {
        match self {
            Self::LoadNull
            | Self::LoadFalse
            | Self::LoadTrue
            | Self::LoadIndex
            | Self::StoreIndex
            | Self::LoadClosure
            | Self::Copy
            | Self::Swap
            | Self::Pop
            | Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Div
            | Self::Mod
            | Self::Pow
            | Self::UNeg
            | Self::UPos
            | Self::LNot
            | Self::BNot
            | Self::LSh
            | Self::RSh
            | Self::BAnd
            | Self::BOr
            | Self::BXor
            | Self::Gt
            | Self::Gte
            | Self::Lt
            | Self::Lte
            | Self::Eq
            | Self::NEq
            | Self::Closure
            | Self::Formatter
            | Self::AppendFormat
            | Self::FormatResult
            | Self::Return
            | Self::AssertFail => Operands::None,
            Self::LoadInt => Operands::I64,
            Self::LoadFloat => Operands::F64,
            Self::LoadParam
            | Self::StoreParam
            | Self::LoadLocal
            | Self::StoreLocal
            | Self::LoadModule
            | Self::StoreModule
            | Self::LoadMember
            | Self::StoreMember
            | Self::LoadTupleMember
            | Self::StoreTupleMember
            | Self::LoadMethod
            | Self::Push
            | Self::PopTo
            | Self::Array
            | Self::Tuple
            | Self::Set
            | Self::Map
            | Self::Env
            | Self::Record
            | Self::Call
            | Self::CallMethod => Operands::U32,
            Self::LoadEnv | Self::StoreEnv => Operands::U32U32,
            Self::Jmp | Self::JmpTrue | Self::JmpFalse => Operands::Offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_bytes_round_trip() {
        for byte in 0..=u8::MAX {
            if let Some(op) = Opcode::from_repr(byte) {
                assert_eq!(op as u8, byte);
            }
        }
        assert_eq!(Opcode::from_repr(0), None);
        assert_eq!(Opcode::from_repr(Opcode::LoadNull as u8), Some(Opcode::LoadNull));
    }
}
