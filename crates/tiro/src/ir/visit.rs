//! Exhaustive visitors over locals mentioned by IR entities.
//!
//! These helpers are the single place that knows which locals an rvalue,
//! lvalue, statement or terminator reads. The passes (dead code elimination,
//! liveness) are written entirely in terms of them, so adding an IR variant
//! fails to compile until its operands are accounted for here.

use crate::ir::{Function, LValue, LocalId, RValue, Stmt, Terminator};

/// Visits every local read by `rvalue`. Phi operands are resolved through
/// the function's phi table.
pub fn visit_rvalue_operands(func: &Function, rvalue: &RValue, mut f: impl FnMut(LocalId)) {
    match rvalue {
        RValue::UseLValue { target } => visit_lvalue_operands(*target, f),
        RValue::UseLocal { target } => f(*target),
        RValue::Phi { phi } => {
            for &operand in &func.phi(*phi).operands {
                f(operand);
            }
        }
        RValue::Phi0 | RValue::Constant(_) | RValue::OuterEnvironment => {}
        RValue::BinaryOp { left, right, .. } => {
            f(*left);
            f(*right);
        }
        RValue::UnaryOp { operand, .. } => f(*operand),
        RValue::Call { func: callee, args } => {
            f(*callee);
            for &arg in func.list(*args) {
                f(arg);
            }
        }
        RValue::Aggregate(aggregate) => match aggregate {
            crate::ir::Aggregate::Method { instance, .. } => f(*instance),
        },
        RValue::GetAggregateMember { aggregate, .. } => f(*aggregate),
        RValue::MethodCall { method, args } => {
            f(*method);
            for &arg in func.list(*args) {
                f(arg);
            }
        }
        RValue::MakeEnvironment { parent, .. } => f(*parent),
        RValue::MakeClosure { env, .. } => f(*env),
        RValue::Container { args, .. } | RValue::Format { args } => {
            for &arg in func.list(*args) {
                f(arg);
            }
        }
        RValue::Record { values, .. } => {
            for &value in func.list(*values) {
                f(value);
            }
        }
    }
}

/// Visits every local read by `lvalue`.
pub fn visit_lvalue_operands(lvalue: LValue, mut f: impl FnMut(LocalId)) {
    match lvalue {
        LValue::Param { .. } | LValue::Module { .. } => {}
        LValue::Closure { env, .. } => f(env),
        LValue::Field { object, .. } | LValue::TupleField { object, .. } => f(object),
        LValue::Index { object, index } => {
            f(object);
            f(index);
        }
    }
}

/// Visits every local read by `stmt` (not the locals it defines).
pub fn visit_uses(func: &Function, stmt: &Stmt, mut f: impl FnMut(LocalId)) {
    match stmt {
        Stmt::Define { local } => visit_rvalue_operands(func, &func.local(*local).value, f),
        Stmt::Assign { target, value } => {
            visit_lvalue_operands(*target, &mut f);
            f(*value);
        }
    }
}

/// Visits every local defined by `stmt`.
pub fn visit_definitions(stmt: &Stmt, mut f: impl FnMut(LocalId)) {
    if let Stmt::Define { local } = stmt {
        f(*local);
    }
}

/// Visits every local read by `terminator`.
pub fn visit_terminator_operands(terminator: &Terminator, mut f: impl FnMut(LocalId)) {
    match *terminator {
        Terminator::None
        | Terminator::Entry { .. }
        | Terminator::Exit
        | Terminator::Jump { .. }
        | Terminator::Rethrow { .. }
        | Terminator::Never => {}
        Terminator::Branch { condition, .. } => f(condition),
        Terminator::Return { value, .. } => f(value),
        Terminator::AssertFail { expr, message, .. } => {
            f(expr);
            f(message);
        }
    }
}
