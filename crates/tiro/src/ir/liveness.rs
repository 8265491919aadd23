//! Liveness analysis over SSA locals.
//!
//! For every local the analysis computes a [`LiveRange`]: the interval in
//! its defining block plus a set of live-in intervals for blocks the value
//! flows through. Statement indices address the position inside a block;
//! index `stmt_count` addresses the terminator and `stmt_count + 1` means
//! "live past the terminator" (live-out).
//!
//! Phi operands are special: an operand must be live-out of the predecessor
//! it flows in from, but it does not become live-in of the phi's own block.
//!
//! Members of aggregates alias their aggregate's storage, so any use of a
//! member keeps the whole aggregate alive.

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::ir::{
    BlockId, Function, LocalId, RValue, Stmt,
    visit::{visit_definitions, visit_terminator_operands, visit_uses},
};

/// A statement interval `[start, end]` within one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LiveInterval {
    pub block: BlockId,
    pub start: u32,
    pub end: u32,
}

impl LiveInterval {
    #[must_use]
    pub fn new(block: BlockId, start: u32, end: u32) -> Self {
        Self { block, start, end }
    }
}

/// The full live range of one local: its definition interval plus live-in
/// intervals, kept sorted by block id.
#[derive(Debug, Clone)]
pub struct LiveRange {
    def: LiveInterval,
    live_in: SmallVec<[LiveInterval; 4]>,
}

impl LiveRange {
    #[must_use]
    pub fn new(def: LiveInterval) -> Self {
        Self {
            def,
            live_in: SmallVec::new(),
        }
    }

    #[must_use]
    pub fn definition(&self) -> LiveInterval {
        self.def
    }

    /// A local that is never used has a zero length definition interval.
    #[must_use]
    pub fn dead(&self) -> bool {
        self.def.start == self.def.end && self.live_in.is_empty()
    }

    /// Extends the range to cover a use at `(block, stmt)`. Returns true
    /// when this introduced a new live-in interval for `block`, which means
    /// liveness must be propagated into that block's predecessors.
    pub fn extend(&mut self, block: BlockId, stmt: u32) -> bool {
        if block == self.def.block {
            self.def.end = self.def.end.max(stmt);
            return false;
        }
        match self.live_in.binary_search_by_key(&block, |interval| interval.block) {
            Ok(pos) => {
                let interval = &mut self.live_in[pos];
                interval.end = interval.end.max(stmt);
                false
            }
            Err(pos) => {
                self.live_in.insert(pos, LiveInterval::new(block, 0, stmt));
                true
            }
        }
    }

    #[must_use]
    pub fn live_in(&self, block: BlockId) -> bool {
        self.find(block).is_some()
    }

    /// True when `(block, stmt)` is the last use of this value.
    #[must_use]
    pub fn last_use(&self, block: BlockId, stmt: u32) -> bool {
        if block == self.def.block {
            return self.def.end == stmt;
        }
        self.find(block).is_some_and(|interval| interval.end == stmt)
    }

    #[must_use]
    pub fn live_in_intervals(&self) -> &[LiveInterval] {
        &self.live_in
    }

    fn find(&self, block: BlockId) -> Option<&LiveInterval> {
        self.live_in
            .binary_search_by_key(&block, |interval| interval.block)
            .ok()
            .map(|pos| &self.live_in[pos])
    }
}

/// Result of the liveness computation for a whole function.
#[derive(Debug, Default)]
pub struct Liveness {
    live_ranges: AHashMap<LocalId, LiveRange>,
    live_sets: Vec<Vec<LocalId>>,
    work: Vec<BlockId>,
}

impl Liveness {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn live_range(&self, local: LocalId) -> Option<&LiveRange> {
        self.live_ranges.get(&local)
    }

    /// The values that are live-in at the given block.
    #[must_use]
    pub fn live_in_values(&self, block: BlockId) -> &[LocalId] {
        self.live_sets.get(block.index()).map_or(&[], Vec::as_slice)
    }

    pub fn live_ranges(&self) -> impl Iterator<Item = (LocalId, &LiveRange)> + '_ {
        self.live_ranges.iter().map(|(&local, range)| (local, range))
    }

    pub fn compute(&mut self, func: &Function) {
        self.live_ranges.clear();
        self.live_sets.clear();
        self.live_sets.resize(func.block_count(), Vec::new());
        self.work.clear();

        // First pass: record the definition point of every local. Two passes
        // keep the algorithm indifferent to block visit order; a single pass
        // would require dominator order.
        for block_id in func.preorder() {
            let block = func.block(block_id);
            for (index, stmt) in block.stmts().iter().enumerate() {
                visit_definitions(stmt, |local| {
                    self.define(local, block_id, index as u32);
                });
            }
        }

        // Second pass: extend ranges at every use.
        for block_id in func.preorder() {
            let block = func.block(block_id);
            let stmt_count = block.stmt_count() as u32;
            let phi_count = block.phi_count(func);

            // Phi operands must be live-out of their predecessor; they do
            // not become live-in of this block through the phi.
            let preds: Vec<BlockId> = block.predecessors().to_vec();
            for stmt in &block.stmts()[..phi_count] {
                let Stmt::Define { local } = stmt else { continue };
                let RValue::Phi { phi } = &func.local(*local).value else {
                    continue;
                };
                let operands = func.phi(*phi).operands.clone();
                debug_assert_eq!(
                    operands.len(),
                    preds.len(),
                    "phi operand count must match predecessor count"
                );
                for (operand, &pred) in operands.iter().zip(&preds) {
                    self.live_out(func, *operand, pred);
                }
            }

            for (index, stmt) in block.stmts().iter().enumerate().skip(phi_count) {
                visit_uses(func, stmt, |value| {
                    self.extend(func, value, block_id, index as u32);
                });
            }
            visit_terminator_operands(&block.terminator(), |value| {
                self.extend(func, value, block_id, stmt_count);
            });
        }
    }

    fn define(&mut self, local: LocalId, block: BlockId, start: u32) {
        let previous = self
            .live_ranges
            .insert(local, LiveRange::new(LiveInterval::new(block, start, start)));
        debug_assert!(previous.is_none(), "a live range for {local} already exists");
    }

    fn live_out(&mut self, func: &Function, value: LocalId, pred: BlockId) {
        let end = func.block(pred).stmt_count() as u32 + 1; // past the terminator
        self.extend(func, value, pred, end);
    }

    fn extend(&mut self, func: &Function, value: LocalId, block: BlockId, stmt: u32) {
        // A live member keeps its aggregate's storage alive as well.
        if let RValue::GetAggregateMember { aggregate, .. } = func.local(value).value {
            self.extend(func, aggregate, block, stmt);
        }

        debug_assert!(self.work.is_empty(), "worklist is drained after every extension");
        let range = self
            .live_ranges
            .get_mut(&value)
            .expect("no live range was defined for this value");

        // A new live-in interval means the value flows in from outside this
        // block, so its liveness recurses into all predecessors.
        if range.extend(block, stmt) {
            self.work.push(block);
        }

        while let Some(current) = self.work.pop() {
            self.live_sets[current.index()].push(value);
            let preds: Vec<BlockId> = func.block(current).predecessors().to_vec();
            for pred in preds {
                let end = func.block(pred).stmt_count() as u32 + 1;
                let range = self.live_ranges.get_mut(&value).expect("live range exists");
                if range.extend(pred, end) {
                    self.work.push(pred);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        intern::StringTable,
        ir::{BranchKind, Constant, FunctionKind, Local, Phi, RValue, Stmt, Terminator},
    };

    struct TestFunc {
        strings: StringTable,
        func: Function,
    }

    impl TestFunc {
        fn new() -> Self {
            let mut strings = StringTable::new();
            let name = strings.insert("func");
            let func = Function::new(name, FunctionKind::Normal, 0, &mut strings);
            Self { strings, func }
        }

        fn make_block(&mut self, label: &str) -> BlockId {
            let label = self.strings.insert(label);
            self.func.make_block(label)
        }

        fn define(&mut self, block: BlockId, name: &str, value: RValue) -> LocalId {
            let name = self.strings.insert(name);
            let local = self.func.make_local(Local::with_name(value, name));
            self.func.block_mut(block).append_stmt(Stmt::Define { local });
            local
        }

        fn define_phi(&mut self, block: BlockId, name: &str, operands: &[LocalId]) -> LocalId {
            let phi = self.func.make_phi(Phi {
                operands: operands.iter().copied().collect(),
            });
            self.define(block, name, RValue::Phi { phi })
        }

        fn set_jump(&mut self, from: BlockId, to: BlockId) {
            self.func.block_mut(from).set_terminator(Terminator::Jump { target: to });
            self.func.block_mut(to).add_predecessor(from);
        }

        fn set_branch(&mut self, from: BlockId, condition: LocalId, target: BlockId, fallthrough: BlockId) {
            self.func.block_mut(from).set_terminator(Terminator::Branch {
                kind: BranchKind::IfTrue,
                condition,
                target,
                fallthrough,
            });
            self.func.block_mut(target).add_predecessor(from);
            self.func.block_mut(fallthrough).add_predecessor(from);
        }

        fn set_return(&mut self, from: BlockId, value: LocalId) {
            let exit = self.func.exit();
            self.func
                .block_mut(from)
                .set_terminator(Terminator::Return { value, target: exit });
            self.func.block_mut(exit).add_predecessor(from);
        }
    }

    fn require_range(liveness: &Liveness, local: LocalId, def: LiveInterval, live_in: &[LiveInterval]) {
        let range = liveness.live_range(local).expect("live range must exist");
        assert_eq!(range.definition(), def, "definition interval of {local}");
        let mut actual: Vec<_> = range.live_in_intervals().to_vec();
        let mut expected = live_in.to_vec();
        actual.sort_by_key(|i| i.block);
        expected.sort_by_key(|i| i.block);
        assert_eq!(actual, expected, "live-in intervals of {local}");
    }

    #[test]
    fn simple_variables() {
        let mut test = TestFunc::new();
        let entry = test.func.entry();
        let block_a = test.make_block("a");
        let block_b = test.make_block("b");

        let x = test.define(entry, "x", RValue::Constant(Constant::Int(1)));
        let y = test.define(entry, "y", RValue::Constant(Constant::Int(2)));
        let z = test.define(entry, "z", RValue::UseLocal { target: x });
        let w = test.define(block_b, "w", RValue::Constant(Constant::Null));

        test.set_branch(entry, x, block_a, block_b);
        test.set_return(block_a, z);
        test.set_return(block_b, w);

        let mut liveness = Liveness::new();
        liveness.compute(&test.func);

        assert!(liveness.live_in_values(entry).is_empty());
        assert_eq!(liveness.live_in_values(block_a), &[z]);
        assert!(liveness.live_in_values(block_b).is_empty());

        // x is defined at 0 and used by z (2) and the branch (3).
        require_range(&liveness, x, LiveInterval::new(entry, 0, 3), &[]);
        // y is dead.
        require_range(&liveness, y, LiveInterval::new(entry, 1, 1), &[]);
        assert!(liveness.live_range(y).unwrap().dead());
        // z flows into block a and is returned there; the flow extends it
        // past the entry block's terminator (3 stmts + 1).
        require_range(&liveness, z, LiveInterval::new(entry, 2, 4), &[LiveInterval::new(block_a, 0, 0)]);
        require_range(&liveness, w, LiveInterval::new(block_b, 0, 0), &[]);
    }

    #[test]
    fn phi_operands_are_live_out_of_predecessors() {
        let mut test = TestFunc::new();
        let entry = test.func.entry();
        let left = test.make_block("left");
        let right = test.make_block("right");
        let join = test.make_block("join");

        let cond = test.define(entry, "cond", RValue::Constant(Constant::Bool(true)));
        test.set_branch(entry, cond, left, right);

        let a = test.define(left, "a", RValue::Constant(Constant::Int(1)));
        test.set_jump(left, join);
        let b = test.define(right, "b", RValue::Constant(Constant::Int(2)));
        test.set_jump(right, join);

        let joined = test.define_phi(join, "joined", &[a, b]);
        test.set_return(join, joined);

        let mut liveness = Liveness::new();
        liveness.compute(&test.func);

        // Operands extend to past the predecessor terminators (1 stmt + 1),
        // but do not become live-in of the join block.
        require_range(&liveness, a, LiveInterval::new(left, 0, 2), &[]);
        require_range(&liveness, b, LiveInterval::new(right, 0, 2), &[]);
        assert!(!liveness.live_range(a).unwrap().live_in(join));
        require_range(&liveness, joined, LiveInterval::new(join, 0, 1), &[]);
    }

    #[test]
    fn loop_keeps_value_live_through_the_back_edge() {
        let mut test = TestFunc::new();
        let entry = test.func.entry();
        let body = test.make_block("body");

        let x = test.define(entry, "x", RValue::Constant(Constant::Int(1)));
        test.set_jump(entry, body);

        // while (x) {} — x is used by the loop branch forever.
        test.set_branch(body, x, body, test.func.exit());
        test.func.block_mut(test.func.exit()).set_terminator(Terminator::Exit);

        let mut liveness = Liveness::new();
        liveness.compute(&test.func);

        // x is live-in of the body and live through its own back edge.
        let range = liveness.live_range(x).unwrap();
        assert!(range.live_in(body));
        assert!(liveness.live_in_values(body).contains(&x));
    }
}
