//! Bytecode generation: register allocation, phi resolution, emission and
//! final linking.
//!
//! Every SSA local receives a physical register (a slot in the function's
//! local frame). Aggregates occupy adjacent registers and their members
//! alias into them; everything else packs into the first register whose
//! previously assigned live ranges do not overlap. Phi nodes compile into
//! register copies at the end of each predecessor block, sequenced to
//! respect cycles with a scratch register.
//!
//! Constants, imports, record schemas and function templates are interned
//! into the module's member table; the bytecode stream references them by
//! 32-bit member index. References to IR module members are interned as
//! symbolic `Use` items and replaced by concrete definitions in the final
//! link pass, keeping member indices stable.

use ahash::AHashMap;

use crate::{
    bytecode::{
        builder::CodeBuilder,
        module::{BytecodeMember, CompiledModule, LinkFunction, LinkItem},
        op::Opcode,
    },
    intern::{InternedString, StringTable},
    ir::{
        Aggregate, BinaryOpKind, BlockId, BranchKind, Constant, ContainerKind, Function, LValue, LocalId,
        ModuleMemberId, RValue, Stmt, Terminator, UnaryOpKind,
        liveness::{LiveInterval, Liveness},
        module::{Module, ModuleMemberData},
    },
};

/// Physical location of an SSA local.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    /// A single register.
    Value(u32),
    /// A method aggregate: instance and function registers, adjacent.
    Method { instance: u32, function: u32 },
}

impl Location {
    fn value(self) -> u32 {
        match self {
            Self::Value(register) => register,
            Self::Method { .. } => panic!("expected a single-register location"),
        }
    }
}

/// Deduplication key for the member table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MemberKey {
    Use(ModuleMemberId),
    Integer(i64),
    Float(u64),
    String(InternedString),
    Symbol(InternedString),
    RecordSchema(Vec<InternedString>),
}

struct MemberTable {
    items: Vec<LinkItem>,
    index: AHashMap<MemberKey, u32>,
    schemas: Vec<Vec<InternedString>>,
}

impl MemberTable {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            index: AHashMap::new(),
            schemas: Vec::new(),
        }
    }

    fn intern(&mut self, key: MemberKey) -> u32 {
        if let Some(&index) = self.index.get(&key) {
            return index;
        }
        let item = match &key {
            MemberKey::Use(member) => LinkItem::Use { member: member.0 },
            MemberKey::Integer(value) => LinkItem::Definition(BytecodeMember::Integer(*value)),
            MemberKey::Float(bits) => LinkItem::Definition(BytecodeMember::Float(f64::from_bits(*bits))),
            MemberKey::String(id) => LinkItem::Definition(BytecodeMember::String(*id)),
            MemberKey::Symbol(id) => LinkItem::Definition(BytecodeMember::Symbol(*id)),
            MemberKey::RecordSchema(keys) => {
                let schema = self.schemas.len() as u32;
                self.schemas.push(keys.clone());
                LinkItem::Definition(BytecodeMember::RecordSchema(schema))
            }
        };
        let index = self.items.len() as u32;
        self.items.push(item);
        self.index.insert(key, index);
        index
    }
}

/// Compiles an IR module into its bytecode artifact. Takes ownership of the
/// compilation's string table, which becomes part of the module.
pub fn generate_module(module: &Module, strings: StringTable) -> CompiledModule {
    let mut members = MemberTable::new();

    // Member of every function, for closure template loads.
    let mut function_members: AHashMap<crate::ir::FunctionId, ModuleMemberId> = AHashMap::new();
    for id in module.member_ids() {
        if let ModuleMemberData::Function { id: func } = module.member(id).data {
            function_members.insert(func, id);
        }
    }

    let mut functions = Vec::with_capacity(module.function_count());
    for id in module.function_ids() {
        let func = module.function(id);
        functions.push(FunctionGen::new(func, &mut members, &function_members).generate());
    }

    // Exports and the initializer reference members symbolically too.
    let mut exports = Vec::new();
    for id in module.member_ids() {
        let member = module.member(id);
        if !member.exported {
            continue;
        }
        let symbol = members.intern(MemberKey::Symbol(member.name));
        let target = members.intern(MemberKey::Use(id));
        exports.push((symbol, target));
    }
    let init = module.init.map(|id| members.intern(MemberKey::Use(id)));

    // Link: every symbolic Use becomes a concrete definition, in place.
    let items = members
        .items
        .into_iter()
        .map(|item| match item {
            LinkItem::Use { member } => {
                let data = module.member(ModuleMemberId(member));
                let definition = match data.data {
                    ModuleMemberData::Import { name } => BytecodeMember::Import(name),
                    ModuleMemberData::Variable { name } => BytecodeMember::Variable(name),
                    ModuleMemberData::Function { id } => BytecodeMember::Function(id.0),
                };
                LinkItem::Definition(definition)
            }
            definition => definition,
        })
        .collect();

    CompiledModule {
        name: module.name,
        strings,
        members: items,
        functions,
        schemas: members.schemas,
        exports,
        init,
    }
}

/// A register copy scheduled on a predecessor block for phi resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RegisterCopy {
    src: u32,
    dst: u32,
}

struct FunctionGen<'a> {
    func: &'a Function,
    members: &'a mut MemberTable,
    function_members: &'a AHashMap<crate::ir::FunctionId, ModuleMemberId>,
    liveness: Liveness,
    /// Per-local intervals (definition, live-ins and phi extensions),
    /// merged per block.
    ranges: AHashMap<LocalId, AHashMap<BlockId, (u32, u32)>>,
    locations: AHashMap<LocalId, Location>,
    /// Locals assigned to each register, for overlap checks.
    registers: Vec<Vec<LocalId>>,
    phi_copies: AHashMap<BlockId, Vec<RegisterCopy>>,
    scratch: Option<u32>,
}

impl<'a> FunctionGen<'a> {
    fn new(
        func: &'a Function,
        members: &'a mut MemberTable,
        function_members: &'a AHashMap<crate::ir::FunctionId, ModuleMemberId>,
    ) -> Self {
        let mut liveness = Liveness::new();
        liveness.compute(func);
        Self {
            func,
            members,
            function_members,
            liveness,
            ranges: AHashMap::new(),
            locations: AHashMap::new(),
            registers: Vec::new(),
            phi_copies: AHashMap::new(),
            scratch: None,
        }
    }

    fn generate(mut self) -> LinkFunction {
        self.build_ranges();
        self.allocate_registers();
        self.collect_phi_copies();
        self.emit()
    }

    // --- live range preparation ---

    fn build_ranges(&mut self) {
        let locals: Vec<LocalId> = self.liveness.live_ranges().map(|(local, _)| local).collect();
        for local in locals {
            let range = self.liveness.live_range(local).expect("range exists");
            let mut blocks: AHashMap<BlockId, (u32, u32)> = AHashMap::new();
            let def = range.definition();
            blocks.insert(def.block, (def.start, def.end));
            for interval in range.live_in_intervals() {
                merge_interval(&mut blocks, *interval);
            }

            // A phi's register is written by copies at the end of every
            // predecessor, so it must not share a register with anything
            // live across those block ends.
            if matches!(self.func.local(local).value, RValue::Phi { .. }) {
                let def_block = def.block;
                for &pred in self.func.block(def_block).predecessors() {
                    let end = self.func.block(pred).stmt_count() as u32;
                    merge_interval(&mut blocks, LiveInterval::new(pred, end, end + 1));
                }
            }
            self.ranges.insert(local, blocks);
        }
    }

    fn overlaps(&self, a: LocalId, b: LocalId) -> bool {
        let (Some(ra), Some(rb)) = (self.ranges.get(&a), self.ranges.get(&b)) else {
            return false;
        };
        let (small, large) = if ra.len() <= rb.len() { (ra, rb) } else { (rb, ra) };
        for (block, &(start_a, end_a)) in small {
            if let Some(&(start_b, end_b)) = large.get(block)
                && start_a <= end_b
                && start_b <= end_a
            {
                return true;
            }
        }
        false
    }

    // --- register allocation ---

    fn allocate_registers(&mut self) {
        for block in self.func.preorder() {
            let stmts: Vec<Stmt> = self.func.block(block).stmts().to_vec();
            for stmt in stmts {
                let Stmt::Define { local } = stmt else { continue };
                self.allocate_local(local);
            }
        }
    }

    fn allocate_local(&mut self, local: LocalId) {
        if self.locations.contains_key(&local) {
            return;
        }
        enum Shape {
            Alias(LocalId, crate::ir::AggregateMember),
            Pair,
            Single,
        }
        let shape = match &self.func.local(local).value {
            RValue::GetAggregateMember { aggregate, member } => Shape::Alias(*aggregate, *member),
            RValue::Aggregate(Aggregate::Method { .. }) => Shape::Pair,
            _ => Shape::Single,
        };
        match shape {
            // A member aliases the matching sub-register of its aggregate.
            Shape::Alias(aggregate, member) => {
                let Location::Method { instance, function } = self.locations[&aggregate] else {
                    panic!("aggregate member of a non-aggregate location");
                };
                let register = match member {
                    crate::ir::AggregateMember::MethodInstance => instance,
                    crate::ir::AggregateMember::MethodFunction => function,
                };
                self.locations.insert(local, Location::Value(register));
            }
            Shape::Pair => {
                let base = self.find_contiguous_pair(local);
                self.assign(local, base);
                self.assign(local, base + 1);
                self.locations.insert(
                    local,
                    Location::Method {
                        instance: base,
                        function: base + 1,
                    },
                );
            }
            Shape::Single => {
                let register = self.find_register(local);
                self.assign(local, register);
                self.locations.insert(local, Location::Value(register));
            }
        }
    }

    fn register_compatible(&self, register: u32, local: LocalId) -> bool {
        self.registers[register as usize]
            .iter()
            .all(|&other| !self.overlaps(local, other))
    }

    /// First register whose assigned ranges do not overlap `local`,
    /// extending the register file when none fits.
    fn find_register(&mut self, local: LocalId) -> u32 {
        for register in 0..self.registers.len() as u32 {
            if self.register_compatible(register, local) {
                return register;
            }
        }
        self.registers.push(Vec::new());
        self.registers.len() as u32 - 1
    }

    fn find_contiguous_pair(&mut self, local: LocalId) -> u32 {
        let count = self.registers.len() as u32;
        for base in 0..count.saturating_sub(1) {
            if self.register_compatible(base, local) && self.register_compatible(base + 1, local) {
                return base;
            }
        }
        // Possibly reuse the last register plus one fresh one.
        if count > 0 && self.register_compatible(count - 1, local) {
            self.registers.push(Vec::new());
            return count - 1;
        }
        self.registers.push(Vec::new());
        self.registers.push(Vec::new());
        self.registers.len() as u32 - 2
    }

    fn assign(&mut self, local: LocalId, register: u32) {
        while self.registers.len() <= register as usize {
            self.registers.push(Vec::new());
        }
        self.registers[register as usize].push(local);
    }

    fn location(&self, local: LocalId) -> Location {
        self.locations[&local]
    }

    /// Register of a single-value local; dead locals have no register.
    fn register_of(&self, local: LocalId) -> u32 {
        self.location(local).value()
    }

    // --- phi copies ---

    fn collect_phi_copies(&mut self) {
        for block in self.func.preorder() {
            let preds: Vec<BlockId> = self.func.block(block).predecessors().to_vec();
            let stmts: Vec<Stmt> = self.func.block(block).stmts().to_vec();
            for stmt in stmts {
                let Stmt::Define { local } = stmt else { continue };
                let RValue::Phi { phi } = &self.func.local(local).value else {
                    continue;
                };
                let dst = self.register_of(local);
                let operands = self.func.phi(*phi).operands.clone();
                debug_assert_eq!(operands.len(), preds.len());
                for (&operand, &pred) in operands.iter().zip(&preds) {
                    let src = self.register_of(operand);
                    if src != dst {
                        self.phi_copies
                            .entry(pred)
                            .or_default()
                            .push(RegisterCopy { src, dst });
                    }
                }
            }
        }
    }

    /// Orders parallel copies so later copies never read clobbered
    /// registers; cycles go through the scratch register.
    fn sequence_copies(&mut self, copies: &[RegisterCopy]) -> Vec<RegisterCopy> {
        let mut pending: Vec<RegisterCopy> = copies.to_vec();
        let mut ordered = Vec::with_capacity(pending.len());

        while !pending.is_empty() {
            let ready = pending
                .iter()
                .position(|copy| !pending.iter().any(|other| other.src == copy.dst));
            match ready {
                Some(index) => {
                    let copy = pending.swap_remove(index);
                    ordered.push(copy);
                }
                None => {
                    // Pure cycle: break it by parking one destination in the
                    // scratch register.
                    let scratch = self.scratch_register();
                    let victim = pending[0];
                    ordered.push(RegisterCopy {
                        src: victim.dst,
                        dst: scratch,
                    });
                    for copy in &mut pending {
                        if copy.src == victim.dst {
                            copy.src = scratch;
                        }
                    }
                }
            }
        }
        ordered
    }

    fn scratch_register(&mut self) -> u32 {
        if let Some(scratch) = self.scratch {
            return scratch;
        }
        self.registers.push(Vec::new());
        let scratch = self.registers.len() as u32 - 1;
        self.scratch = Some(scratch);
        scratch
    }

    // --- emission ---

    fn emit(mut self) -> LinkFunction {
        let mut code = CodeBuilder::new();
        for block in self.func.preorder() {
            if matches!(self.func.block(block).terminator(), Terminator::Exit) {
                continue;
            }
            code.define_label(block);
            let stmts: Vec<Stmt> = self.func.block(block).stmts().to_vec();
            for stmt in &stmts {
                self.emit_stmt(&mut code, stmt);
            }
            if let Some(copies) = self.phi_copies.remove(&block) {
                for copy in self.sequence_copies(&copies) {
                    code.emit_u32(Opcode::Push, copy.src);
                    code.emit_u32(Opcode::PopTo, copy.dst);
                }
            }
            self.emit_terminator(&mut code, self.func.block(block).terminator());
        }

        let (bytes, labels) = code.finish();
        LinkFunction {
            name: self.func.name,
            params: self.func.params,
            locals: self.registers.len() as u32,
            code: bytes,
            labels,
        }
    }

    fn emit_stmt(&mut self, code: &mut CodeBuilder, stmt: &Stmt) {
        match stmt {
            Stmt::Define { local } => self.emit_define(code, *local),
            Stmt::Assign { target, value } => self.emit_assign(code, *target, *value),
        }
    }

    fn emit_define(&mut self, code: &mut CodeBuilder, local: LocalId) {
        let value = &self.func.local(local).value;
        match value {
            // Phis become copies in the predecessors; aliases are free.
            RValue::Phi { .. } | RValue::Phi0 | RValue::GetAggregateMember { .. } => return,
            RValue::Aggregate(Aggregate::Method { instance, function }) => {
                let Location::Method {
                    instance: instance_reg,
                    function: function_reg,
                } = self.location(local)
                else {
                    panic!("method aggregate without a method location");
                };
                let name = self.members.intern(MemberKey::Symbol(*function));
                code.emit_u32(Opcode::LoadLocal, self.register_of(*instance));
                code.emit_u32(Opcode::LoadMethod, name);
                // Stack: method function, then instance (or null) on top.
                code.emit_u32(Opcode::StoreLocal, instance_reg);
                code.emit_u32(Opcode::StoreLocal, function_reg);
                return;
            }
            RValue::UseLocal { target } => {
                let src = self.register_of(*target);
                let dst = self.register_of(local);
                if src != dst {
                    code.emit_u32(Opcode::LoadLocal, src);
                    code.emit_u32(Opcode::StoreLocal, dst);
                }
                return;
            }
            RValue::UseLValue { target } => self.emit_lvalue_load(code, *target),
            RValue::Constant(constant) => self.emit_constant(code, *constant),
            RValue::OuterEnvironment => code.emit(Opcode::LoadClosure),
            RValue::BinaryOp { op, left, right } => {
                code.emit_u32(Opcode::LoadLocal, self.register_of(*left));
                code.emit_u32(Opcode::LoadLocal, self.register_of(*right));
                code.emit(binary_opcode(*op));
            }
            RValue::UnaryOp { op, operand } => {
                code.emit_u32(Opcode::LoadLocal, self.register_of(*operand));
                code.emit(unary_opcode(*op));
            }
            RValue::Call { func, args } => {
                code.emit_u32(Opcode::LoadLocal, self.register_of(*func));
                let args = self.func.list(*args);
                for &arg in args {
                    code.emit_u32(Opcode::LoadLocal, self.register_of(arg));
                }
                code.emit_u32(Opcode::Call, args.len() as u32);
            }
            RValue::MethodCall { method, args } => {
                let Location::Method { instance, function } = self.location(*method) else {
                    panic!("method call on a non-method location");
                };
                code.emit_u32(Opcode::LoadLocal, function);
                code.emit_u32(Opcode::LoadLocal, instance);
                let args = self.func.list(*args);
                for &arg in args {
                    code.emit_u32(Opcode::LoadLocal, self.register_of(arg));
                }
                code.emit_u32(Opcode::CallMethod, args.len() as u32);
            }
            RValue::MakeEnvironment { parent, size } => {
                code.emit_u32(Opcode::LoadLocal, self.register_of(*parent));
                code.emit_u32(Opcode::Env, *size);
            }
            RValue::MakeClosure { env, func } => {
                let template = self.function_members[func];
                let member = self.members.intern(MemberKey::Use(template));
                code.emit_u32(Opcode::LoadModule, member);
                code.emit_u32(Opcode::LoadLocal, self.register_of(*env));
                code.emit(Opcode::Closure);
            }
            RValue::Container { container, args } => {
                let args = self.func.list(*args);
                for &arg in args {
                    code.emit_u32(Opcode::LoadLocal, self.register_of(arg));
                }
                let (op, count) = match container {
                    ContainerKind::Array => (Opcode::Array, args.len()),
                    ContainerKind::Tuple => (Opcode::Tuple, args.len()),
                    ContainerKind::Set => (Opcode::Set, args.len()),
                    ContainerKind::Map => (Opcode::Map, args.len() / 2),
                };
                code.emit_u32(op, count as u32);
            }
            RValue::Format { args } => {
                code.emit(Opcode::Formatter);
                for &arg in self.func.list(*args) {
                    code.emit_u32(Opcode::LoadLocal, self.register_of(arg));
                    code.emit(Opcode::AppendFormat);
                }
                code.emit(Opcode::FormatResult);
            }
            RValue::Record { schema, values } => {
                let keys = self.func.record_schema(*schema).to_vec();
                for &value in self.func.list(*values) {
                    code.emit_u32(Opcode::LoadLocal, self.register_of(value));
                }
                let member = self.members.intern(MemberKey::RecordSchema(keys));
                code.emit_u32(Opcode::Record, member);
            }
        }

        // The computed value sits on the stack; move it to its register, or
        // drop it when nothing ever reads it.
        let dead = self
            .liveness
            .live_range(local)
            .is_none_or(crate::ir::liveness::LiveRange::dead);
        if dead {
            code.emit(Opcode::Pop);
        } else {
            code.emit_u32(Opcode::StoreLocal, self.register_of(local));
        }
    }

    fn emit_lvalue_load(&mut self, code: &mut CodeBuilder, target: LValue) {
        match target {
            LValue::Param { index } => code.emit_u32(Opcode::LoadParam, index),
            LValue::Closure { env, levels, index } => {
                code.emit_u32(Opcode::LoadLocal, self.register_of(env));
                code.emit_u32_u32(Opcode::LoadEnv, levels, index);
            }
            LValue::Module { member } => {
                let member = self.members.intern(MemberKey::Use(member));
                code.emit_u32(Opcode::LoadModule, member);
            }
            LValue::Field { object, name } => {
                code.emit_u32(Opcode::LoadLocal, self.register_of(object));
                let name = self.members.intern(MemberKey::Symbol(name));
                code.emit_u32(Opcode::LoadMember, name);
            }
            LValue::TupleField { object, index } => {
                code.emit_u32(Opcode::LoadLocal, self.register_of(object));
                code.emit_u32(Opcode::LoadTupleMember, index);
            }
            LValue::Index { object, index } => {
                code.emit_u32(Opcode::LoadLocal, self.register_of(object));
                code.emit_u32(Opcode::LoadLocal, self.register_of(index));
                code.emit(Opcode::LoadIndex);
            }
        }
    }

    fn emit_assign(&mut self, code: &mut CodeBuilder, target: LValue, value: LocalId) {
        match target {
            LValue::Param { index } => {
                code.emit_u32(Opcode::LoadLocal, self.register_of(value));
                code.emit_u32(Opcode::StoreParam, index);
            }
            LValue::Closure { env, levels, index } => {
                code.emit_u32(Opcode::LoadLocal, self.register_of(env));
                code.emit_u32(Opcode::LoadLocal, self.register_of(value));
                code.emit_u32_u32(Opcode::StoreEnv, levels, index);
            }
            LValue::Module { member } => {
                let member = self.members.intern(MemberKey::Use(member));
                code.emit_u32(Opcode::LoadLocal, self.register_of(value));
                code.emit_u32(Opcode::StoreModule, member);
            }
            LValue::Field { object, name } => {
                code.emit_u32(Opcode::LoadLocal, self.register_of(object));
                code.emit_u32(Opcode::LoadLocal, self.register_of(value));
                let name = self.members.intern(MemberKey::Symbol(name));
                code.emit_u32(Opcode::StoreMember, name);
            }
            LValue::TupleField { object, index } => {
                code.emit_u32(Opcode::LoadLocal, self.register_of(object));
                code.emit_u32(Opcode::LoadLocal, self.register_of(value));
                code.emit_u32(Opcode::StoreTupleMember, index);
            }
            LValue::Index { object, index } => {
                code.emit_u32(Opcode::LoadLocal, self.register_of(object));
                code.emit_u32(Opcode::LoadLocal, self.register_of(index));
                code.emit_u32(Opcode::LoadLocal, self.register_of(value));
                code.emit(Opcode::StoreIndex);
            }
        }
    }

    fn emit_constant(&mut self, code: &mut CodeBuilder, constant: Constant) {
        match constant {
            Constant::Null => code.emit(Opcode::LoadNull),
            Constant::Bool(true) => code.emit(Opcode::LoadTrue),
            Constant::Bool(false) => code.emit(Opcode::LoadFalse),
            Constant::Int(value) => code.emit_i64(Opcode::LoadInt, value),
            Constant::Float(value) => code.emit_f64(Opcode::LoadFloat, value.0),
            Constant::String(id) => {
                let member = self.members.intern(MemberKey::String(id));
                code.emit_u32(Opcode::LoadModule, member);
            }
            Constant::Symbol(id) => {
                let member = self.members.intern(MemberKey::Symbol(id));
                code.emit_u32(Opcode::LoadModule, member);
            }
        }
    }

    fn emit_terminator(&mut self, code: &mut CodeBuilder, terminator: Terminator) {
        match terminator {
            Terminator::Entry { target } | Terminator::Jump { target } => {
                code.emit_jump(Opcode::Jmp, target);
            }
            Terminator::Branch {
                kind,
                condition,
                target,
                fallthrough,
            } => {
                code.emit_u32(Opcode::LoadLocal, self.register_of(condition));
                let op = match kind {
                    BranchKind::IfTrue => Opcode::JmpTrue,
                    BranchKind::IfFalse => Opcode::JmpFalse,
                };
                code.emit_jump(op, target);
                code.emit_jump(Opcode::Jmp, fallthrough);
            }
            Terminator::Return { value, .. } => {
                code.emit_u32(Opcode::LoadLocal, self.register_of(value));
                code.emit(Opcode::Return);
            }
            Terminator::AssertFail { expr, message, .. } => {
                code.emit_u32(Opcode::LoadLocal, self.register_of(expr));
                code.emit_u32(Opcode::LoadLocal, self.register_of(message));
                code.emit(Opcode::AssertFail);
            }
            Terminator::Exit => {}
            Terminator::None | Terminator::Rethrow { .. } | Terminator::Never => {
                unreachable!("terminator {terminator:?} is never emitted")
            }
        }
    }
}

fn merge_interval(blocks: &mut AHashMap<BlockId, (u32, u32)>, interval: LiveInterval) {
    blocks
        .entry(interval.block)
        .and_modify(|(start, end)| {
            *start = (*start).min(interval.start);
            *end = (*end).max(interval.end);
        })
        .or_insert((interval.start, interval.end));
}

fn binary_opcode(op: BinaryOpKind) -> Opcode {
    match op {
        BinaryOpKind::Add => Opcode::Add,
        BinaryOpKind::Sub => Opcode::Sub,
        BinaryOpKind::Mul => Opcode::Mul,
        BinaryOpKind::Div => Opcode::Div,
        BinaryOpKind::Mod => Opcode::Mod,
        BinaryOpKind::Pow => Opcode::Pow,
        BinaryOpKind::Less => Opcode::Lt,
        BinaryOpKind::LessEq => Opcode::Lte,
        BinaryOpKind::Greater => Opcode::Gt,
        BinaryOpKind::GreaterEq => Opcode::Gte,
        BinaryOpKind::Eq => Opcode::Eq,
        BinaryOpKind::NotEq => Opcode::NEq,
        BinaryOpKind::BitAnd => Opcode::BAnd,
        BinaryOpKind::BitOr => Opcode::BOr,
        BinaryOpKind::BitXor => Opcode::BXor,
        BinaryOpKind::ShiftLeft => Opcode::LSh,
        BinaryOpKind::ShiftRight => Opcode::RSh,
    }
}

fn unary_opcode(op: UnaryOpKind) -> Opcode {
    match op {
        UnaryOpKind::Plus => Opcode::UPos,
        UnaryOpKind::Minus => Opcode::UNeg,
        UnaryOpKind::Not => Opcode::LNot,
        UnaryOpKind::BitNot => Opcode::BNot,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        intern::StringTable,
        ir::{AggregateMember, FunctionKind, Local, Phi},
    };

    fn test_members() -> MemberTable {
        MemberTable::new()
    }

    #[test]
    fn method_aggregate_members_alias_adjacent_registers() {
        let mut strings = StringTable::new();
        let name = strings.insert("func");
        let size = strings.insert("size");
        let mut func = Function::new(name, FunctionKind::Normal, 1, &mut strings);
        let entry = func.entry();
        let exit = func.exit();

        let object = func.make_local(Local::new(RValue::UseLValue {
            target: LValue::Param { index: 0 },
        }));
        let method = func.make_local(Local::new(RValue::Aggregate(Aggregate::Method {
            instance: object,
            function: size,
        })));
        let instance = func.make_local(Local::new(RValue::GetAggregateMember {
            aggregate: method,
            member: AggregateMember::MethodInstance,
        }));
        let function = func.make_local(Local::new(RValue::GetAggregateMember {
            aggregate: method,
            member: AggregateMember::MethodFunction,
        }));
        let args = func.make_list(vec![]);
        let call = func.make_local(Local::new(RValue::MethodCall { method, args }));

        for local in [object, method, instance, function, call] {
            func.block_mut(entry).append_stmt(Stmt::Define { local });
        }
        func.block_mut(entry).set_terminator(Terminator::Return {
            value: call,
            target: exit,
        });
        func.block_mut(exit).add_predecessor(entry);
        func.block_mut(exit).set_terminator(Terminator::Exit);

        let mut members = test_members();
        let function_members = AHashMap::new();
        let mut generator = FunctionGen::new(&func, &mut members, &function_members);
        generator.build_ranges();
        generator.allocate_registers();

        let Location::Method {
            instance: instance_reg,
            function: function_reg,
        } = generator.location(method)
        else {
            panic!("aggregate must occupy a method location");
        };
        assert_eq!(function_reg, instance_reg + 1, "aggregate registers are adjacent");
        // Members alias into the aggregate's storage instead of copying.
        assert_eq!(generator.register_of(instance), instance_reg);
        assert_eq!(generator.register_of(function), function_reg);
    }

    #[test]
    fn copy_cycles_go_through_the_scratch_register() {
        let mut strings = StringTable::new();
        let name = strings.insert("func");
        let func = Function::new(name, FunctionKind::Normal, 0, &mut strings);
        let mut members = test_members();
        let function_members = AHashMap::new();
        let mut generator = FunctionGen::new(&func, &mut members, &function_members);
        generator.registers = vec![Vec::new(), Vec::new()];

        // r0 -> r1 and r1 -> r0: a pure swap cycle.
        let copies = vec![RegisterCopy { src: 0, dst: 1 }, RegisterCopy { src: 1, dst: 0 }];
        let ordered = generator.sequence_copies(&copies);

        let scratch = generator.scratch.expect("a scratch register was allocated");
        assert_eq!(
            ordered,
            vec![
                RegisterCopy { src: 1, dst: scratch },
                RegisterCopy { src: 0, dst: 1 },
                RegisterCopy { src: scratch, dst: 0 },
            ]
        );
    }

    #[test]
    fn chained_copies_are_ordered_without_a_scratch() {
        let mut strings = StringTable::new();
        let name = strings.insert("func");
        let func = Function::new(name, FunctionKind::Normal, 0, &mut strings);
        let mut members = test_members();
        let function_members = AHashMap::new();
        let mut generator = FunctionGen::new(&func, &mut members, &function_members);

        // r0 -> r1 while r1 -> r2: r1 must be saved into r2 first.
        let copies = vec![RegisterCopy { src: 0, dst: 1 }, RegisterCopy { src: 1, dst: 2 }];
        let ordered = generator.sequence_copies(&copies);
        assert_eq!(
            ordered,
            vec![RegisterCopy { src: 1, dst: 2 }, RegisterCopy { src: 0, dst: 1 }]
        );
        assert!(generator.scratch.is_none());
    }

    #[test]
    fn phi_destinations_do_not_share_registers_with_loop_carried_values() {
        let mut strings = StringTable::new();
        let name = strings.insert("func");
        let mut func = Function::new(name, FunctionKind::Normal, 0, &mut strings);
        let entry = func.entry();
        let exit = func.exit();
        let header_label = strings.insert("header");
        let header = func.make_block(header_label);

        // entry: x = 0; carried = 1; jump header
        let x = func.make_local(Local::new(RValue::Constant(Constant::Int(0))));
        let carried = func.make_local(Local::new(RValue::Constant(Constant::Int(1))));
        func.block_mut(entry).append_stmt(Stmt::Define { local: x });
        func.block_mut(entry).append_stmt(Stmt::Define { local: carried });
        func.block_mut(entry).set_terminator(Terminator::Jump { target: header });
        func.block_mut(header).add_predecessor(entry);

        // header: joined = phi(x, next); next = joined + carried;
        // branch joined -> header | exit
        let phi = func.make_phi(Phi::default());
        let joined = func.make_local(Local::new(RValue::Phi { phi }));
        let next = func.make_local(Local::new(RValue::BinaryOp {
            op: BinaryOpKind::Add,
            left: joined,
            right: carried,
        }));
        func.phi_mut(phi).operands.push(x);
        func.phi_mut(phi).operands.push(next);
        func.block_mut(header).append_stmt(Stmt::Define { local: joined });
        func.block_mut(header).append_stmt(Stmt::Define { local: next });
        func.block_mut(header).set_terminator(Terminator::Branch {
            kind: BranchKind::IfTrue,
            condition: joined,
            target: header,
            fallthrough: exit,
        });
        func.block_mut(header).add_predecessor(header);
        func.block_mut(exit).add_predecessor(header);
        func.block_mut(exit).set_terminator(Terminator::Exit);

        let mut members = test_members();
        let function_members = AHashMap::new();
        let mut generator = FunctionGen::new(&func, &mut members, &function_members);
        generator.build_ranges();
        generator.allocate_registers();

        // `carried` is live across both predecessors of the header, so the
        // phi's copy target must not reuse its register.
        assert_ne!(generator.register_of(joined), generator.register_of(carried));
    }
}
