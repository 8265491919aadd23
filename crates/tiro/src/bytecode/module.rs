//! The compiled module artifact ("link object").
//!
//! A [`CompiledModule`] is self-contained: it carries its own string table,
//! a deduplicated member table, the compiled function bodies and the export
//! map. Integer immediates in function code are little-endian two's
//! complement, floats IEEE 754 binary64. The stable on-wire layout is
//! produced by postcard.
//!
//! During generation the member table may contain [`LinkItem::Use`] entries:
//! symbolic references to IR module members whose definitions only become
//! known once every function has been compiled. The final
//! [`link`](crate::bytecode::gen::generate_module) step replaces each Use
//! with its concrete definition in place, keeping member indices stable, so
//! a loaded module only ever sees definitions.

use crate::intern::{InternedString, StringTable};

/// A concrete member of a compiled module.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum BytecodeMember {
    Integer(i64),
    Float(f64),
    String(InternedString),
    Symbol(InternedString),
    /// An import of another module, resolved lazily by name at runtime.
    Import(InternedString),
    /// A mutable module variable, initially null.
    Variable(InternedString),
    /// A function; the payload indexes [`CompiledModule::functions`].
    Function(u32),
    /// A record schema; the payload indexes [`CompiledModule::schemas`].
    RecordSchema(u32),
}

/// One entry of the member table.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum LinkItem {
    /// Symbolic reference to an IR module member, replaced during linking.
    Use { member: u32 },
    Definition(BytecodeMember),
}

impl LinkItem {
    /// The concrete member of a fully linked item.
    ///
    /// Panics on unresolved Use entries; loading checks linkage first.
    #[must_use]
    pub fn definition(&self) -> &BytecodeMember {
        match self {
            Self::Use { member } => panic!("unresolved use of ir member {member}"),
            Self::Definition(member) => member,
        }
    }

    #[must_use]
    pub fn is_definition(&self) -> bool {
        matches!(self, Self::Definition(_))
    }
}

/// A compiled function body.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LinkFunction {
    pub name: InternedString,
    pub params: u32,
    /// Number of local registers the frame provides.
    pub locals: u32,
    pub code: Vec<u8>,
    /// Resolved label table: `(label id, byte offset)` for every basic block
    /// that was emitted. Jump offsets in `code` are already patched; the
    /// table survives for disassembly and debugging.
    pub labels: Vec<(u32, u32)>,
}

/// The full compiled artifact for one module.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct CompiledModule {
    pub name: InternedString,
    pub strings: StringTable,
    pub members: Vec<LinkItem>,
    pub functions: Vec<LinkFunction>,
    /// Record schemas: ordered key lists.
    pub schemas: Vec<Vec<InternedString>>,
    /// Export map: `(symbol member, exported member)` pairs. The symbol
    /// member names the export; lookups compare symbols by identity.
    pub exports: Vec<(u32, u32)>,
    /// Member index of the module initializer function, if any.
    pub init: Option<u32>,
}

impl CompiledModule {
    /// True when every member is a definition, i.e. linking completed.
    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.members.iter().all(LinkItem::is_definition)
    }

    /// Serializes to the stable byte layout.
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Deserializes from the stable byte layout and restores the string
    /// table's lookup index.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        let mut module: Self = postcard::from_bytes(bytes)?;
        module.strings.rebuild_index();
        Ok(module)
    }
}
