//! Byte-level code emission with label fixups.
//!
//! `CodeBuilder` appends opcodes and little-endian immediates to a byte
//! buffer. Forward jumps emit a placeholder 32-bit offset and record a fixup;
//! when the target label is defined (or at finish time at the latest) the
//! placeholder is patched with the label's absolute byte offset.

use ahash::AHashMap;

use crate::{bytecode::op::Opcode, ir::BlockId};

#[derive(Debug, Default)]
pub struct CodeBuilder {
    code: Vec<u8>,
    /// Byte offset of every defined label.
    labels: AHashMap<BlockId, u32>,
    /// Patch positions waiting for their label.
    fixups: Vec<(BlockId, usize)>,
}

impl CodeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn offset(&self) -> u32 {
        self.code.len() as u32
    }

    /// Marks the current offset as the start of `block`.
    pub fn define_label(&mut self, block: BlockId) {
        let previous = self.labels.insert(block, self.offset());
        debug_assert!(previous.is_none(), "label defined twice");
    }

    pub fn emit(&mut self, op: Opcode) {
        self.code.push(op as u8);
    }

    pub fn emit_u32(&mut self, op: Opcode, value: u32) {
        self.code.push(op as u8);
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_u32_u32(&mut self, op: Opcode, first: u32, second: u32) {
        self.code.push(op as u8);
        self.code.extend_from_slice(&first.to_le_bytes());
        self.code.extend_from_slice(&second.to_le_bytes());
    }

    pub fn emit_i64(&mut self, op: Opcode, value: i64) {
        self.code.push(op as u8);
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_f64(&mut self, op: Opcode, value: f64) {
        self.code.push(op as u8);
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Emits a jump to `target`, patching the offset later when needed.
    pub fn emit_jump(&mut self, op: Opcode, target: BlockId) {
        self.code.push(op as u8);
        let position = self.code.len();
        if let Some(&offset) = self.labels.get(&target) {
            self.code.extend_from_slice(&offset.to_le_bytes());
        } else {
            self.code.extend_from_slice(&u32::MAX.to_le_bytes());
            self.fixups.push((target, position));
        }
    }

    /// Patches all pending fixups and returns the code plus the label table
    /// sorted by label id.
    pub fn finish(mut self) -> (Vec<u8>, Vec<(u32, u32)>) {
        for (target, position) in self.fixups.drain(..) {
            let offset = *self
                .labels
                .get(&target)
                .expect("every jump target must have been emitted");
            self.code[position..position + 4].copy_from_slice(&offset.to_le_bytes());
        }
        let mut labels: Vec<(u32, u32)> = self.labels.iter().map(|(&block, &offset)| (block.0, offset)).collect();
        labels.sort_unstable();
        (self.code, labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_basic() {
        let mut builder = CodeBuilder::new();
        builder.emit(Opcode::LoadNull);
        builder.emit(Opcode::Pop);
        let (code, _) = builder.finish();
        assert_eq!(code, vec![Opcode::LoadNull as u8, Opcode::Pop as u8]);
    }

    #[test]
    fn emit_u32_is_little_endian() {
        let mut builder = CodeBuilder::new();
        builder.emit_u32(Opcode::LoadLocal, 0x1234);
        let (code, _) = builder.finish();
        assert_eq!(code, vec![Opcode::LoadLocal as u8, 0x34, 0x12, 0, 0]);
    }

    #[test]
    fn forward_jump_is_patched() {
        let mut builder = CodeBuilder::new();
        let target = BlockId(7);
        builder.emit_jump(Opcode::Jmp, target);
        builder.emit(Opcode::LoadNull);
        builder.define_label(target);
        builder.emit(Opcode::Return);
        let (code, labels) = builder.finish();
        // Jump (5 bytes) + LoadNull (1 byte) puts the label at offset 6.
        assert_eq!(&code[1..5], &6u32.to_le_bytes());
        assert_eq!(labels, vec![(7, 6)]);
    }

    #[test]
    fn backward_jump_resolves_immediately() {
        let mut builder = CodeBuilder::new();
        let target = BlockId(3);
        builder.define_label(target);
        builder.emit(Opcode::LoadNull);
        builder.emit_jump(Opcode::Jmp, target);
        let (code, _) = builder.finish();
        assert_eq!(&code[2..6], &0u32.to_le_bytes());
    }
}
