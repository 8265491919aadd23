//! Bytecode: the opcode set, the compiled-module artifact, the emission
//! builder and the generator that maps SSA IR onto registers and bytes.

pub mod builder;
pub mod disassemble;
pub mod r#gen;
pub mod module;
pub mod op;

pub use disassemble::disassemble;
pub use r#gen::generate_module;
pub use module::{BytecodeMember, CompiledModule, LinkFunction, LinkItem};
pub use op::{Opcode, Operands};
