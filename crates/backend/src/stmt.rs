use std::collections::HashSet;

use anyhow::{bail, Result};
use indexmap::IndexMap;

use sema::env::Env;
use sema::expr::{Expr, ExprKind};
use types::{RecordTable, TypeKind};

use crate::expr::{cgen_test, cgen_value};
use crate::state::{imm, mem, Emitter, Reg};

/// A typed statement. Compound statements carry the environment snapshot
/// that was in effect for each declaration and statement, so code
/// generation never re-runs name resolution.
#[derive(Debug, Clone)]
pub enum Stmt {
    Compound(CompoundStmt),
    If { cond: Expr, then_stmt: Box<Stmt> },
    IfElse { cond: Expr, then_stmt: Box<Stmt>, else_stmt: Box<Stmt> },
    While { cond: Expr, body: Box<Stmt> },
    DoWhile { body: Box<Stmt>, cond: Expr },
    For { init: Option<Expr>, cond: Option<Expr>, step: Option<Expr>, body: Box<Stmt> },
    Switch { expr: Expr, body: Box<Stmt> },
    Case { value: i32, stmt: Box<Stmt> },
    Default { stmt: Box<Stmt> },
    Return { expr: Option<Expr> },
    Break,
    Continue,
    Goto(String),
    Labeled { label: String, stmt: Box<Stmt> },
    Expr(Option<Expr>),
}

#[derive(Debug, Clone)]
pub struct CompoundStmt {
    pub decls: Vec<(Env, LocalDecl)>,
    pub stmts: Vec<(Env, Stmt)>,
}

/// A block-scoped variable declaration. The environment paired with it
/// already contains the variable; the initializer (when present) has been
/// converted to the variable's type.
#[derive(Debug, Clone)]
pub struct LocalDecl {
    pub name: String,
    pub init: Option<Initializer>,
}

/// Either a single expression, or a flattened list of `(offset, value)`
/// pairs for aggregate initialization.
#[derive(Debug, Clone)]
pub enum Initializer {
    Expr(Expr),
    List(Vec<(i32, Expr)>),
}

/// Evaluate an expression in statement position: whatever the expression
/// pushed is wiped by re-asserting the depth it started from.
pub fn cgen_expr_stmt(expr: &Expr, env: &Env, records: &RecordTable, state: &mut Emitter) -> Reg {
    let saved = state.stack_size();
    let ret = cgen_value(expr, env, records, state);
    state.force_stack_size_to(saved);
    ret
}

pub fn cgen_stmt(stmt: &Stmt, env: &Env, records: &RecordTable, state: &mut Emitter) -> Result<()> {
    match stmt {
        Stmt::Compound(compound) => {
            for (decl_env, decl) in &compound.decls {
                cgen_local_decl(decl, decl_env, records, state)?;
            }
            for (stmt_env, stmt) in &compound.stmts {
                cgen_stmt(stmt, stmt_env, records, state)?;
            }
            Ok(())
        }

        // test, jz finish, body, finish:
        Stmt::If { cond, then_stmt } => {
            let ret = cgen_expr_stmt(cond, env, records, state);
            let finish_label = state.request_label();
            cgen_test(ret, state);
            state.jz(finish_label);
            cgen_stmt(then_stmt, env, records, state)?;
            state.label(finish_label);
            Ok(())
        }

        Stmt::IfElse { cond, then_stmt, else_stmt } => {
            let ret = cgen_expr_stmt(cond, env, records, state);
            cgen_test(ret, state);
            let false_label = state.request_label();
            let finish_label = state.request_label();
            state.jz(false_label);
            cgen_stmt(then_stmt, env, records, state)?;
            state.jmp(finish_label);
            state.label(false_label);
            cgen_stmt(else_stmt, env, records, state)?;
            state.label(finish_label);
            Ok(())
        }

        // start: test, jz finish, body, jmp start, finish:
        Stmt::While { cond, body } => {
            let start_label = state.request_label();
            let finish_label = state.request_label();

            state.label(start_label);
            let ret = cgen_expr_stmt(cond, env, records, state);
            cgen_test(ret, state);
            state.jz(finish_label);

            state.enter_loop(start_label, finish_label);
            cgen_stmt(body, env, records, state)?;
            state.exit_label_context();

            state.jmp(start_label);
            state.label(finish_label);
            Ok(())
        }

        // start: body, continue: test, jnz start, finish:
        Stmt::DoWhile { body, cond } => {
            let start_label = state.request_label();
            let finish_label = state.request_label();
            let continue_label = state.request_label();

            state.label(start_label);
            state.enter_loop(continue_label, finish_label);
            cgen_stmt(body, env, records, state)?;
            state.exit_label_context();

            state.label(continue_label);
            let ret = cgen_expr_stmt(cond, env, records, state);
            cgen_test(ret, state);
            state.jnz(start_label);
            state.label(finish_label);
            Ok(())
        }

        // init, start: test, jz finish, body, continue: step, jmp start
        Stmt::For { init, cond, step, body } => {
            if let Some(init) = init {
                cgen_expr_stmt(init, env, records, state);
            }
            let start_label = state.request_label();
            let finish_label = state.request_label();
            let continue_label = state.request_label();

            state.label(start_label);
            if let Some(cond) = cond {
                let ret = cgen_expr_stmt(cond, env, records, state);
                cgen_test(ret, state);
                state.jz(finish_label);
            }

            state.enter_loop(continue_label, finish_label);
            cgen_stmt(body, env, records, state)?;
            state.exit_label_context();

            state.label(continue_label);
            if let Some(step) = step {
                cgen_expr_stmt(step, env, records, state);
            }
            state.jmp(start_label);
            state.label(finish_label);
            Ok(())
        }

        Stmt::Switch { expr, body } => cgen_switch(expr, body, env, records, state),

        Stmt::Case { value, stmt } => {
            let label = state.case_label(*value);
            state.label(label);
            cgen_stmt(stmt, env, records, state)
        }

        Stmt::Default { stmt } => {
            let label = state.default_label();
            state.label(label);
            cgen_stmt(stmt, env, records, state)
        }

        Stmt::Return { expr } => {
            let saved = state.stack_size();
            if let Some(expr) = expr {
                cgen_value(expr, env, records, state);
                if expr.ty.is_record() {
                    // copy the result into the caller-supplied destination
                    // and return that address
                    let size = expr.ty.size_of(records).expect("complete return type") as i32;
                    state.movl(Reg::Eax.name(), Reg::Esi.name());
                    state.movl(&mem(2 * types::SIZEOF_POINTER as i32, Reg::Ebp), Reg::Edi.name());
                    state.movl(&imm(size), Reg::Ecx.name());
                    state.memcpy();
                    state.movl(&mem(2 * types::SIZEOF_POINTER as i32, Reg::Ebp), Reg::Eax.name());
                }
                state.force_stack_size_to(saved);
            }
            state.jmp(state.return_label());
            Ok(())
        }

        Stmt::Break => {
            let label = state.break_label();
            state.jmp(label);
            Ok(())
        }

        Stmt::Continue => {
            let label = state.continue_label();
            state.jmp(label);
            Ok(())
        }

        Stmt::Goto(name) => {
            let label = state.goto_label(name);
            state.jmp(label);
            Ok(())
        }

        Stmt::Labeled { label, stmt } => {
            let label = state.goto_label(label);
            state.label(label);
            // arriving by jump, %esp may be anything: re-assert the depth
            state.force_stack_size_to(state.stack_size());
            cgen_stmt(stmt, env, records, state)
        }

        Stmt::Expr(Some(expr)) => {
            cgen_expr_stmt(expr, env, records, state);
            Ok(())
        }
        Stmt::Expr(None) => Ok(()),
    }
}

/// A local declaration grows the frame to the scope's cursor and runs the
/// initializer, if any.
pub fn cgen_local_decl(
    decl: &LocalDecl,
    env: &Env,
    records: &RecordTable,
    state: &mut Emitter,
) -> Result<()> {
    state.expand_stack_to(env.stack_size());
    let Some(init) = &decl.init else {
        return Ok(());
    };

    let entry = env
        .lookup(&decl.name)
        .unwrap_or_else(|| panic!("undeclared local '{}' during code generation", decl.name));

    match init {
        Initializer::Expr(expr) => {
            // run it through the plain assignment protocol
            let target =
                Expr { ty: entry.ty.clone(), kind: ExprKind::Variable(decl.name.clone()) };
            let assignment = Expr {
                ty: entry.ty.clone(),
                kind: ExprKind::Assign {
                    left: Box::new(target),
                    right: Box::new(expr.clone()),
                },
            };
            cgen_expr_stmt(&assignment, env, records, state);
        }
        Initializer::List(items) => {
            let saved = state.stack_size();
            for (offset, expr) in items {
                let addr = entry.offset + offset;
                let ret = cgen_value(expr, env, records, state);
                match expr.ty.kind {
                    TypeKind::Char | TypeKind::UChar => {
                        state.movb(Reg::Al.name(), &mem(addr, Reg::Ebp));
                    }
                    TypeKind::Short | TypeKind::UShort => {
                        state.movw(Reg::Ax.name(), &mem(addr, Reg::Ebp));
                    }
                    TypeKind::Long | TypeKind::ULong | TypeKind::Pointer(_) => {
                        state.movl(Reg::Eax.name(), &mem(addr, Reg::Ebp));
                    }
                    TypeKind::Float => {
                        assert_eq!(ret, Reg::St0);
                        state.fstps(&mem(addr, Reg::Ebp));
                    }
                    TypeKind::Double => {
                        assert_eq!(ret, Reg::St0);
                        state.fstpl(&mem(addr, Reg::Ebp));
                    }
                    TypeKind::Record(_) => {
                        let size = expr.ty.size_of(records).expect("complete type") as i32;
                        state.movl(Reg::Eax.name(), Reg::Esi.name());
                        state.lea(&mem(addr, Reg::Ebp), Reg::Edi.name());
                        state.movl(&imm(size), Reg::Ecx.name());
                        state.memcpy();
                    }
                    _ => bail!("cannot initialize a value of {:?}", expr.ty.kind),
                }
                state.force_stack_size_to(saved);
            }
        }
    }
    Ok(())
}

// 1. evaluate the scrutinee once
// 2. grow the stack over the body's declarations
// 3. compare-and-jump chain over the collected case values
// 4. emit the body linearly inside a switch label context (fallthrough is
//    the program's business)
fn cgen_switch(
    expr: &Expr,
    body: &Stmt,
    env: &Env,
    records: &RecordTable,
    state: &mut Emitter,
) -> Result<()> {
    let Stmt::Compound(compound) = body else {
        bail!("switch body must be a compound statement");
    };

    let (values, num_defaults) = collect_switch_labels(body);
    let mut seen = HashSet::new();
    for value in &values {
        if !seen.insert(*value) {
            bail!("duplicate case label: {value}");
        }
    }
    if num_defaults > 1 {
        bail!("multiple default labels in one switch");
    }

    let mut case_labels = IndexMap::new();
    for value in values {
        let label = state.request_label();
        case_labels.insert(value, label);
    }
    let finish_label = state.request_label();
    let default_label =
        if num_defaults == 1 { state.request_label() } else { finish_label };

    let saved = state.stack_size();
    // inside the body, initializations are skipped over, but their stack
    // space must exist
    let body_stack = compound
        .decls
        .last()
        .map(|(decl_env, _)| decl_env.stack_size())
        .unwrap_or(saved);

    let ret = cgen_expr_stmt(expr, env, records, state);
    assert_eq!(ret, Reg::Eax, "switch scrutinee must be integral");
    state.force_stack_size_to(body_stack);

    for (value, label) in &case_labels {
        state.cmpl(&imm(*value), Reg::Eax.name());
        state.jz(*label);
    }
    state.jmp(default_label);

    state.enter_switch(finish_label, default_label, case_labels);
    for (stmt_env, stmt) in &compound.stmts {
        cgen_stmt(stmt, stmt_env, records, state)?;
    }
    state.exit_label_context();

    state.label(finish_label);
    state.force_stack_size_to(saved);
    Ok(())
}

/// Collect the `case` values and `default` count of a switch body, without
/// descending into nested switches (their labels belong to them).
pub fn collect_switch_labels(stmt: &Stmt) -> (Vec<i32>, usize) {
    fn walk(stmt: &Stmt, values: &mut Vec<i32>, defaults: &mut usize) {
        match stmt {
            Stmt::Case { value, stmt } => {
                values.push(*value);
                walk(stmt, values, defaults);
            }
            Stmt::Default { stmt } => {
                *defaults += 1;
                walk(stmt, values, defaults);
            }
            Stmt::Switch { .. } => {}
            Stmt::Compound(compound) => {
                for (_, stmt) in &compound.stmts {
                    walk(stmt, values, defaults);
                }
            }
            Stmt::If { then_stmt, .. } => walk(then_stmt, values, defaults),
            Stmt::IfElse { then_stmt, else_stmt, .. } => {
                walk(then_stmt, values, defaults);
                walk(else_stmt, values, defaults);
            }
            Stmt::While { body, .. } | Stmt::DoWhile { body, .. } | Stmt::For { body, .. } => {
                walk(body, values, defaults);
            }
            Stmt::Labeled { stmt, .. } => walk(stmt, values, defaults),
            Stmt::Return { .. }
            | Stmt::Break
            | Stmt::Continue
            | Stmt::Goto(_)
            | Stmt::Expr(_) => {}
        }
    }
    let mut values = Vec::new();
    let mut defaults = 0;
    walk(stmt, &mut values, &mut defaults);
    (values, defaults)
}

/// Collect every label name in a function body, so the emitter can assign
/// them labels before any `goto` is generated (forward gotos).
pub fn collect_goto_labels(stmt: &Stmt) -> Vec<String> {
    fn walk(stmt: &Stmt, out: &mut Vec<String>) {
        match stmt {
            Stmt::Labeled { label, stmt } => {
                out.push(label.clone());
                walk(stmt, out);
            }
            Stmt::Compound(compound) => {
                for (_, stmt) in &compound.stmts {
                    walk(stmt, out);
                }
            }
            Stmt::If { then_stmt, .. } => walk(then_stmt, out),
            Stmt::IfElse { then_stmt, else_stmt, .. } => {
                walk(then_stmt, out);
                walk(else_stmt, out);
            }
            Stmt::While { body, .. } | Stmt::DoWhile { body, .. } | Stmt::For { body, .. } => {
                walk(body, out);
            }
            Stmt::Switch { body, .. } => walk(body, out),
            Stmt::Case { stmt, .. } | Stmt::Default { stmt } => walk(stmt, out),
            Stmt::Return { .. }
            | Stmt::Break
            | Stmt::Continue
            | Stmt::Goto(_)
            | Stmt::Expr(_) => {}
        }
    }
    let mut out = Vec::new();
    walk(stmt, &mut out);
    out
}
