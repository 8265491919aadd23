//! SSA intermediate representation.
//!
//! A [`Function`] owns id-indexed tables for its basic blocks, SSA locals,
//! phi operand lists, local argument lists and record schemas. All edges
//! between entities are ids; back edges (block predecessors) are id lists,
//! never owning references.
//!
//! Invariants maintained by construction and checked by debug assertions:
//!
//! - every use of a local is dominated by its definition
//! - a phi's operand count equals the predecessor count of its block
//! - a block has exactly one terminator and no statements after it
//! - the exit block's predecessors are exactly the blocks whose terminator
//!   transfers to it

pub mod dce;
pub mod liveness;
pub mod module;
pub mod visit;

use std::fmt;

use smallvec::SmallVec;
use strum::{Display, IntoStaticStr};

use crate::intern::InternedString;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        pub struct $name(pub u32);

        impl $name {
            #[inline]
            #[must_use]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", stringify!($name).chars().next().unwrap().to_ascii_lowercase(), self.0)
            }
        }
    };
}

id_type!(
    /// Id of a basic block within its function.
    BlockId
);
id_type!(
    /// Id of an SSA local within its function.
    LocalId
);
id_type!(
    /// Id of a phi operand list within its function.
    PhiId
);
id_type!(
    /// Id of a list of locals (call arguments, container elements).
    ListId
);
id_type!(
    /// Id of a record schema (ordered key list) within its function.
    RecordSchemaId
);
id_type!(
    /// Id of a function within its module.
    FunctionId
);
id_type!(
    /// Id of a member within its module.
    ModuleMemberId
);

/// Binary operators on IR level. Logical and/or never reach the IR; they are
/// lowered to control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum BinaryOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Eq,
    NotEq,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum UnaryOpKind {
    Plus,
    Minus,
    Not,
    BitNot,
}

/// A float constant with bitwise equality, so constants can live in hash
/// maps (the common-subexpression cache).
#[derive(Debug, Clone, Copy)]
pub struct FloatConstant(pub f64);

impl PartialEq for FloatConstant {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for FloatConstant {}

impl std::hash::Hash for FloatConstant {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

/// Compile-time constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constant {
    Int(i64),
    Float(FloatConstant),
    String(InternedString),
    Symbol(InternedString),
    Bool(bool),
    Null,
}

/// Multi-register aggregate values.
///
/// An aggregate occupies several adjacent physical registers; its members are
/// accessed through storage aliases, not copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// A bound method handle: the instance and the resolved function, loaded
    /// together by the method-load instruction.
    Method {
        instance: LocalId,
        function: InternedString,
    },
}

impl Aggregate {
    /// Number of physical registers occupied by this aggregate.
    #[must_use]
    pub fn register_count(self) -> u32 {
        match self {
            Self::Method { .. } => 2,
        }
    }
}

/// A named sub-slot of an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum AggregateMember {
    /// The instance part of a method aggregate (slot 0).
    MethodInstance,
    /// The function part of a method aggregate (slot 1).
    MethodFunction,
}

impl AggregateMember {
    /// The register slot of this member within its aggregate.
    #[must_use]
    pub fn slot(self) -> u32 {
        match self {
            Self::MethodInstance => 0,
            Self::MethodFunction => 1,
        }
    }
}

/// Container construction kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum ContainerKind {
    Array,
    Tuple,
    Set,
    Map,
}

/// A place that can be read from or assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LValue {
    /// Function parameter slot.
    Param { index: u32 },
    /// A captured variable: `levels` environments up from `env`, at `index`.
    Closure {
        env: LocalId,
        levels: u32,
        index: u32,
    },
    /// A module member (import, module variable or function).
    Module { member: ModuleMemberId },
    /// `object.name`
    Field {
        object: LocalId,
        name: InternedString,
    },
    /// `object.<index>`
    TupleField { object: LocalId, index: u32 },
    /// `object[index]`
    Index { object: LocalId, index: LocalId },
}

impl LValue {
    /// Whether reading or writing this place can raise at runtime. Members
    /// and indices may be missing; plain slots cannot fail.
    #[must_use]
    pub fn may_raise(self) -> bool {
        match self {
            Self::Param { .. } | Self::Closure { .. } | Self::Module { .. } => false,
            Self::Field { .. } | Self::TupleField { .. } | Self::Index { .. } => true,
        }
    }
}

/// The computation producing an SSA local's value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RValue {
    /// Read from a place.
    UseLValue { target: LValue },
    /// Copy of another local.
    UseLocal { target: LocalId },
    /// Joined value at a block header.
    Phi { phi: PhiId },
    /// Placeholder phi without operands, used while a block is unsealed.
    Phi0,
    Constant(Constant),
    /// The closure environment the current function was instantiated with.
    OuterEnvironment,
    BinaryOp {
        op: BinaryOpKind,
        left: LocalId,
        right: LocalId,
    },
    UnaryOp {
        op: UnaryOpKind,
        operand: LocalId,
    },
    Call {
        func: LocalId,
        args: ListId,
    },
    Aggregate(Aggregate),
    /// Storage alias into a sub-slot of an aggregate, not a copy.
    GetAggregateMember {
        aggregate: LocalId,
        member: AggregateMember,
    },
    /// Call of a method aggregate; the instance travels as implicit first
    /// argument.
    MethodCall {
        method: LocalId,
        args: ListId,
    },
    /// A new closure environment with the given parent and slot count.
    MakeEnvironment {
        parent: LocalId,
        size: u32,
    },
    /// A new closure function binding `env` to a function template.
    MakeClosure {
        env: LocalId,
        func: FunctionId,
    },
    Container {
        container: ContainerKind,
        args: ListId,
    },
    /// String interpolation: format and join all arguments.
    Format {
        args: ListId,
    },
    Record {
        schema: RecordSchemaId,
        values: ListId,
    },
}

/// The value category of an SSA local, cached on the local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum ValueCategory {
    None,
    Value,
    Never,
}

/// An SSA local: the rvalue that computes it plus an optional debug name.
#[derive(Debug, Clone)]
pub struct Local {
    pub value: RValue,
    /// The source variable this local was created for, if any.
    pub name: InternedString,
    pub category: ValueCategory,
}

impl Local {
    #[must_use]
    pub fn new(value: RValue) -> Self {
        Self {
            value,
            name: InternedString::default(),
            category: ValueCategory::Value,
        }
    }

    #[must_use]
    pub fn with_name(value: RValue, name: InternedString) -> Self {
        Self {
            value,
            name,
            category: ValueCategory::Value,
        }
    }
}

/// Phi operand list. Operand order matches the predecessor order of the
/// containing block.
#[derive(Debug, Clone, Default)]
pub struct Phi {
    pub operands: SmallVec<[LocalId; 4]>,
}

/// Branch condition kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum BranchKind {
    IfTrue,
    IfFalse,
}

/// Block terminators. Every block ends in exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    /// Not yet terminated; only valid during construction.
    None,
    /// The function entry; transfers to the first body block.
    Entry { target: BlockId },
    /// The function exit; nothing follows.
    Exit,
    Jump {
        target: BlockId,
    },
    Branch {
        kind: BranchKind,
        condition: LocalId,
        target: BlockId,
        fallthrough: BlockId,
    },
    /// Return `value` to the caller; transfers to the exit block.
    Return {
        value: LocalId,
        target: BlockId,
    },
    /// Re-raise the in-flight error; transfers to the exit block.
    Rethrow {
        target: BlockId,
    },
    /// Assertion failure with the stringified expression and optional
    /// message; transfers to the exit block.
    AssertFail {
        expr: LocalId,
        message: LocalId,
        target: BlockId,
    },
    /// Control never leaves this block (e.g. an infinite loop).
    Never,
}

impl Terminator {
    /// Invokes `f` for every successor block.
    pub fn visit_targets(&self, mut f: impl FnMut(BlockId)) {
        match *self {
            Self::None | Self::Exit | Self::Never => {}
            Self::Entry { target }
            | Self::Jump { target }
            | Self::Return { value: _, target }
            | Self::Rethrow { target }
            | Self::AssertFail { target, .. } => f(target),
            Self::Branch {
                target, fallthrough, ..
            } => {
                f(target);
                f(fallthrough);
            }
        }
    }
}

/// A statement inside a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stmt {
    /// Introduces a new SSA local.
    Define { local: LocalId },
    /// Writes a value to a place.
    Assign { target: LValue, value: LocalId },
}

/// A basic block.
#[derive(Debug)]
pub struct Block {
    pub label: InternedString,
    /// Ordered predecessor list; phi operand order follows it.
    predecessors: Vec<BlockId>,
    stmts: Vec<Stmt>,
    terminator: Terminator,
    /// Sealed blocks know all their predecessors; only unsealed blocks may
    /// gain incomplete phis.
    pub sealed: bool,
    /// Filled blocks have all their statements; only used for assertions
    /// during construction.
    pub filled: bool,
}

impl Block {
    #[must_use]
    fn new(label: InternedString) -> Self {
        Self {
            label,
            predecessors: Vec::new(),
            stmts: Vec::new(),
            terminator: Terminator::None,
            sealed: false,
            filled: false,
        }
    }

    #[must_use]
    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }

    #[must_use]
    pub fn predecessor_count(&self) -> usize {
        self.predecessors.len()
    }

    pub fn add_predecessor(&mut self, pred: BlockId) {
        self.predecessors.push(pred);
    }

    #[must_use]
    pub fn stmts(&self) -> &[Stmt] {
        &self.stmts
    }

    #[must_use]
    pub fn stmt_count(&self) -> usize {
        self.stmts.len()
    }

    pub fn append_stmt(&mut self, stmt: Stmt) {
        debug_assert!(
            matches!(self.terminator, Terminator::None),
            "cannot append statements after the terminator"
        );
        self.stmts.push(stmt);
    }

    /// Inserts a statement at the front (used for phi definitions).
    pub fn prepend_stmt(&mut self, stmt: Stmt) {
        self.stmts.insert(0, stmt);
    }

    pub fn remove_stmts(&mut self, mut predicate: impl FnMut(&Stmt) -> bool) {
        self.stmts.retain(|stmt| !predicate(stmt));
    }

    #[must_use]
    pub fn terminator(&self) -> Terminator {
        self.terminator
    }

    pub fn set_terminator(&mut self, terminator: Terminator) {
        self.terminator = terminator;
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        !matches!(self.terminator, Terminator::None)
    }

    /// Number of leading phi definitions.
    #[must_use]
    pub fn phi_count(&self, func: &Function) -> usize {
        self.stmts
            .iter()
            .take_while(|stmt| match stmt {
                Stmt::Define { local } => {
                    matches!(func.local(*local).value, RValue::Phi { .. } | RValue::Phi0)
                }
                Stmt::Assign { .. } => false,
            })
            .count()
    }
}

/// Whether a function is a plain function or a closure that receives an
/// outer environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum FunctionKind {
    Normal,
    Closure,
}

/// A function lowered to SSA form.
#[derive(Debug)]
pub struct Function {
    pub name: InternedString,
    pub kind: FunctionKind,
    pub params: u32,
    blocks: Vec<Block>,
    locals: Vec<Local>,
    phis: Vec<Phi>,
    lists: Vec<Vec<LocalId>>,
    records: Vec<Vec<InternedString>>,
    entry: BlockId,
    exit: BlockId,
}

impl Function {
    #[must_use]
    pub fn new(name: InternedString, kind: FunctionKind, params: u32, strings: &mut crate::intern::StringTable) -> Self {
        let mut func = Self {
            name,
            kind,
            params,
            blocks: Vec::new(),
            locals: Vec::new(),
            phis: Vec::new(),
            lists: Vec::new(),
            records: Vec::new(),
            entry: BlockId(0),
            exit: BlockId(0),
        };
        func.entry = func.make_block(strings.insert("entry"));
        func.exit = func.make_block(strings.insert("exit"));
        func
    }

    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    #[must_use]
    pub fn exit(&self) -> BlockId {
        self.exit
    }

    pub fn make_block(&mut self, label: InternedString) -> BlockId {
        let id = BlockId(u32::try_from(self.blocks.len()).expect("block id overflow"));
        self.blocks.push(Block::new(label));
        id
    }

    pub fn make_local(&mut self, local: Local) -> LocalId {
        let id = LocalId(u32::try_from(self.locals.len()).expect("local id overflow"));
        self.locals.push(local);
        id
    }

    pub fn make_phi(&mut self, phi: Phi) -> PhiId {
        let id = PhiId(u32::try_from(self.phis.len()).expect("phi id overflow"));
        self.phis.push(phi);
        id
    }

    pub fn make_list(&mut self, locals: Vec<LocalId>) -> ListId {
        let id = ListId(u32::try_from(self.lists.len()).expect("list id overflow"));
        self.lists.push(locals);
        id
    }

    pub fn make_record_schema(&mut self, keys: Vec<InternedString>) -> RecordSchemaId {
        let id = RecordSchemaId(u32::try_from(self.records.len()).expect("record schema id overflow"));
        self.records.push(keys);
        id
    }

    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    #[must_use]
    pub fn local(&self, id: LocalId) -> &Local {
        &self.locals[id.index()]
    }

    pub fn local_mut(&mut self, id: LocalId) -> &mut Local {
        &mut self.locals[id.index()]
    }

    #[must_use]
    pub fn phi(&self, id: PhiId) -> &Phi {
        &self.phis[id.index()]
    }

    pub fn phi_mut(&mut self, id: PhiId) -> &mut Phi {
        &mut self.phis[id.index()]
    }

    #[must_use]
    pub fn list(&self, id: ListId) -> &[LocalId] {
        &self.lists[id.index()]
    }

    #[must_use]
    pub fn record_schema(&self, id: RecordSchemaId) -> &[InternedString] {
        &self.records[id.index()]
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        (0..self.blocks.len()).map(|i| BlockId(i as u32))
    }

    pub fn local_ids(&self) -> impl Iterator<Item = LocalId> + '_ {
        (0..self.locals.len()).map(|i| LocalId(i as u32))
    }

    /// Blocks in depth-first preorder starting at the entry block. Blocks
    /// that became unreachable during lowering are not visited.
    #[must_use]
    pub fn preorder(&self) -> Vec<BlockId> {
        let mut order = Vec::with_capacity(self.blocks.len());
        let mut seen = vec![false; self.blocks.len()];
        let mut stack = vec![self.entry];
        seen[self.entry.index()] = true;
        while let Some(block) = stack.pop() {
            order.push(block);
            // Push in reverse so the first successor is visited first.
            let mut targets = SmallVec::<[BlockId; 2]>::new();
            self.block(block).terminator().visit_targets(|t| targets.push(t));
            for target in targets.iter().rev() {
                if !seen[target.index()] {
                    seen[target.index()] = true;
                    stack.push(*target);
                }
            }
        }
        order
    }
}
