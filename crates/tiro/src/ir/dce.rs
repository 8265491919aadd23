//! Dead code elimination.
//!
//! Marks every local whose computation has observable side effects, then
//! transitively marks everything those locals read. `Define` statements
//! whose locals stay unmarked are removed. `Assign` statements and
//! terminators are always preserved; their operands seed the mark set.

use crate::ir::{
    Aggregate, Function, LValue, RValue, Stmt,
    visit::{visit_rvalue_operands, visit_terminator_operands, visit_uses},
};

/// True when evaluating the rvalue may have an observable effect (a call, a
/// raising place access) and must not be removed even when unused.
fn has_side_effects(func: &Function, value: &RValue) -> bool {
    match value {
        RValue::UseLValue { target } => target.may_raise(),
        RValue::UseLocal { .. }
        | RValue::Phi { .. }
        | RValue::Phi0
        | RValue::Constant(_)
        | RValue::OuterEnvironment
        | RValue::GetAggregateMember { .. }
        | RValue::MakeEnvironment { .. }
        | RValue::MakeClosure { .. }
        | RValue::Container { .. }
        | RValue::Format { .. }
        | RValue::Record { .. } => false,
        // Operators on non-constants may raise (type errors, division by
        // zero). Constant operands have been checked during lowering.
        RValue::BinaryOp { left, right, .. } => {
            !matches!(func.local(*left).value, RValue::Constant(_))
                || !matches!(func.local(*right).value, RValue::Constant(_))
        }
        RValue::UnaryOp { operand, .. } => !matches!(func.local(*operand).value, RValue::Constant(_)),
        RValue::Call { .. } | RValue::MethodCall { .. } => true,
        // Loading a method raises when the member does not exist.
        RValue::Aggregate(Aggregate::Method { .. }) => true,
    }
}

pub fn eliminate_dead_code(func: &mut Function) {
    let mut used = vec![false; func.local_count()];
    let mut stack = Vec::new();

    // Phase 1: seed with everything observable.
    for block_id in func.preorder() {
        let block = func.block(block_id);
        for stmt in block.stmts() {
            match stmt {
                // Assignments are side effects; their operands must survive.
                Stmt::Assign { .. } => {
                    visit_uses(func, stmt, |local| {
                        if !used[local.index()] {
                            used[local.index()] = true;
                            stack.push(local);
                        }
                    });
                }
                Stmt::Define { local } => {
                    if has_side_effects(func, &func.local(*local).value) && !used[local.index()] {
                        used[local.index()] = true;
                        stack.push(*local);
                    }
                }
            }
        }
        visit_terminator_operands(&block.terminator(), |local| {
            if !used[local.index()] {
                used[local.index()] = true;
                stack.push(local);
            }
        });
    }

    // Phase 2: everything reachable from a used local is used as well.
    while let Some(local) = stack.pop() {
        visit_rvalue_operands(func, &func.local(local).value, |operand| {
            if !used[operand.index()] {
                used[operand.index()] = true;
                stack.push(operand);
            }
        });
    }

    // Phase 3: drop unmarked definitions.
    for block_id in func.preorder() {
        func.block_mut(block_id).remove_stmts(|stmt| match stmt {
            Stmt::Define { local } => !used[local.index()],
            Stmt::Assign { .. } => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        intern::StringTable,
        ir::{BinaryOpKind, Constant, FunctionKind, Local, Terminator},
    };

    #[test]
    fn unused_pure_locals_are_removed() {
        let mut strings = StringTable::new();
        let mut func = Function::new(strings.insert("test"), FunctionKind::Normal, 0, &mut strings);
        let body = func.make_block(strings.insert("body"));
        let entry = func.entry();
        let exit = func.exit();
        func.block_mut(entry).set_terminator(Terminator::Entry { target: body });
        func.block_mut(body).add_predecessor(entry);

        // dead: 1 + 2 with constant operands, unused
        let one = func.make_local(Local::new(RValue::Constant(Constant::Int(1))));
        let two = func.make_local(Local::new(RValue::Constant(Constant::Int(2))));
        let sum = func.make_local(Local::new(RValue::BinaryOp {
            op: BinaryOpKind::Add,
            left: one,
            right: two,
        }));
        // live: the returned constant
        let ret = func.make_local(Local::new(RValue::Constant(Constant::Int(7))));

        for local in [one, two, sum, ret] {
            func.block_mut(body).append_stmt(Stmt::Define { local });
        }
        func.block_mut(body).set_terminator(Terminator::Return {
            value: ret,
            target: exit,
        });
        func.block_mut(exit).add_predecessor(body);
        func.block_mut(exit).set_terminator(Terminator::Exit);

        eliminate_dead_code(&mut func);

        let remaining: Vec<_> = func.block(body).stmts().to_vec();
        assert_eq!(remaining, vec![Stmt::Define { local: ret }]);
    }

    #[test]
    fn calls_survive_even_when_unused() {
        let mut strings = StringTable::new();
        let mut func = Function::new(strings.insert("test"), FunctionKind::Normal, 1, &mut strings);
        let body = func.make_block(strings.insert("body"));
        let entry = func.entry();
        let exit = func.exit();
        func.block_mut(entry).set_terminator(Terminator::Entry { target: body });
        func.block_mut(body).add_predecessor(entry);

        let callee = func.make_local(Local::new(RValue::UseLValue {
            target: LValue::Param { index: 0 },
        }));
        let args = func.make_list(vec![]);
        let call = func.make_local(Local::new(RValue::Call { func: callee, args }));
        let ret = func.make_local(Local::new(RValue::Constant(Constant::Null)));

        for local in [callee, call, ret] {
            func.block_mut(body).append_stmt(Stmt::Define { local });
        }
        func.block_mut(body).set_terminator(Terminator::Return {
            value: ret,
            target: exit,
        });
        func.block_mut(exit).add_predecessor(body);
        func.block_mut(exit).set_terminator(Terminator::Exit);

        eliminate_dead_code(&mut func);

        // The call and its callee stay; only nothing was removable here.
        let remaining = func.block(body).stmts().to_vec();
        assert_eq!(
            remaining,
            vec![
                Stmt::Define { local: callee },
                Stmt::Define { local: call },
                Stmt::Define { local: ret },
            ]
        );
    }
}
