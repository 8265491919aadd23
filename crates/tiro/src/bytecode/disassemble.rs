//! Textual listing of a compiled module.
//!
//! The output lists the member table, the export map and every function's
//! decoded code with byte offsets. It is meant for humans debugging the
//! compiler, not for round-tripping.

use std::fmt::Write;

use crate::bytecode::{
    module::{BytecodeMember, CompiledModule, LinkItem},
    op::{Opcode, Operands},
};

#[must_use]
pub fn disassemble(module: &CompiledModule) -> String {
    let mut out = String::new();
    let name = module.strings.try_get(module.name).unwrap_or("<module>");
    let _ = writeln!(out, "module {name}:");

    let _ = writeln!(out, "  members:");
    for (index, item) in module.members.iter().enumerate() {
        let _ = write!(out, "    [{index}] ");
        match item {
            LinkItem::Use { member } => {
                let _ = writeln!(out, "use {member}");
            }
            LinkItem::Definition(member) => {
                let _ = writeln!(out, "{}", format_member(module, member));
            }
        }
    }

    if !module.exports.is_empty() {
        let _ = writeln!(out, "  exports:");
        for &(symbol, member) in &module.exports {
            let _ = writeln!(out, "    {symbol} -> {member}");
        }
    }
    if let Some(init) = module.init {
        let _ = writeln!(out, "  init: member {init}");
    }

    for function in &module.functions {
        let name = module.strings.try_get(function.name).unwrap_or("<anonymous>");
        let _ = writeln!(
            out,
            "  func {name} (params: {}, locals: {}, {} bytes):",
            function.params,
            function.locals,
            function.code.len()
        );
        disassemble_code(&function.code, &mut out);
    }
    out
}

fn format_member(module: &CompiledModule, member: &BytecodeMember) -> String {
    let text = |id| module.strings.try_get(id).unwrap_or("<invalid>");
    match member {
        BytecodeMember::Integer(value) => format!("int {value}"),
        BytecodeMember::Float(value) => {
            let mut buffer = ryu::Buffer::new();
            format!("float {}", buffer.format(*value))
        }
        BytecodeMember::String(id) => format!("string {:?}", text(*id)),
        BytecodeMember::Symbol(id) => format!("symbol #{}", text(*id)),
        BytecodeMember::Import(id) => format!("import {}", text(*id)),
        BytecodeMember::Variable(id) => format!("variable {}", text(*id)),
        BytecodeMember::Function(index) => format!("function {index}"),
        BytecodeMember::RecordSchema(index) => {
            let keys: Vec<&str> = module.schemas[*index as usize].iter().map(|&k| text(k)).collect();
            format!("record schema ({})", keys.join(", "))
        }
    }
}

fn disassemble_code(code: &[u8], out: &mut String) {
    let mut offset = 0usize;
    while offset < code.len() {
        let byte = code[offset];
        let Some(op) = Opcode::from_repr(byte) else {
            let _ = writeln!(out, "    {offset:6}: <invalid opcode {byte:#04x}>");
            offset += 1;
            continue;
        };
        let _ = write!(out, "    {offset:6}: {op}");
        offset += 1;
        match op.operands() {
            Operands::None => {}
            Operands::U32 | Operands::Offset => {
                let value = read_u32(code, offset);
                let _ = write!(out, " {value}");
                offset += 4;
            }
            Operands::U32U32 => {
                let first = read_u32(code, offset);
                let second = read_u32(code, offset + 4);
                let _ = write!(out, " {first} {second}");
                offset += 8;
            }
            Operands::I64 => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&code[offset..offset + 8]);
                let _ = write!(out, " {}", i64::from_le_bytes(bytes));
                offset += 8;
            }
            Operands::F64 => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&code[offset..offset + 8]);
                let mut buffer = ryu::Buffer::new();
                let _ = write!(out, " {}", buffer.format(f64::from_le_bytes(bytes)));
                offset += 8;
            }
        }
        let _ = writeln!(out);
    }
}

fn read_u32(code: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&code[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}
