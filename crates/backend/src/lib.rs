//! x86 (IA-32) code generation: walks the typed tree produced by `sema`
//! against a single mutable [`state::Emitter`] and produces AT&T-syntax
//! assembly text.
//!
//! Expression emission leaves every computed value either in `%eax` or on
//! top of the FPU stack and keeps the tracked native stack depth balanced;
//! statement emission re-asserts the depth at every statement boundary.

use anyhow::{bail, Result};

use sema::env::Env;
use sema::expr::{Expr, ExprKind};
use types::{QualType, RecordTable, TypeKind};

pub mod expr;
pub mod state;
pub mod stmt;

pub use expr::{cgen_address, cgen_value};
pub use state::{Emitter, Reg};
pub use stmt::{cgen_stmt, CompoundStmt, Initializer, LocalDecl, Stmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// External linkage, defined here.
    Default,
    /// Internal linkage.
    Static,
    /// Declared but defined elsewhere.
    Extern,
}

/// A function definition, paired with the environment snapshot in which
/// its body was analyzed (the current function is set and the parameters
/// are visible).
#[derive(Debug, Clone)]
pub struct FuncDef {
    pub name: String,
    pub storage: Storage,
    pub body: Stmt,
}

/// A file-scope object definition or declaration.
#[derive(Debug, Clone)]
pub struct GlobalDef {
    pub name: String,
    pub ty: QualType,
    pub storage: Storage,
    pub init: Option<Initializer>,
}

#[derive(Debug, Clone)]
pub enum ExternDecl {
    Func(FuncDef),
    Var(GlobalDef),
}

/// A whole translation unit: external declarations in source order, each
/// with the environment snapshot that was in effect for it.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub decls: Vec<(Env, ExternDecl)>,
}

/// Emit the assembly for a translation unit.
pub fn emit(program: &Program, records: &RecordTable) -> Result<String> {
    let mut state = Emitter::new();
    for (env, decl) in &program.decls {
        match decl {
            ExternDecl::Func(func) => cgen_func(func, env, records, &mut state)?,
            ExternDecl::Var(global) => cgen_global(global, records, &mut state)?,
        }
    }
    Ok(state.finish())
}

//     .text
//     [.globl <name>]
// <name>:
//     pushl %ebp
//     movl %esp, %ebp
//     ... body ...
// .L<ret>:
//     leave
//     ret
fn cgen_func(func: &FuncDef, env: &Env, records: &RecordTable, state: &mut Emitter) -> Result<()> {
    state.text_section();
    state.comment(&format!("fn {}", func.name));
    match func.storage {
        Storage::Default | Storage::Extern => state.globl(&func.name),
        Storage::Static => {}
    }
    state.func_start(&func.name);

    let goto_labels = stmt::collect_goto_labels(&func.body);
    state.enter_function(&goto_labels);
    cgen_stmt(&func.body, env, records, state)?;

    let return_label = state.return_label();
    state.label(return_label);
    state.exit_function();

    state.leave();
    state.ret();
    state.newline();
    Ok(())
}

fn cgen_global(global: &GlobalDef, records: &RecordTable, state: &mut Emitter) -> Result<()> {
    match (&global.init, global.storage) {
        (Some(_), Storage::Extern) => {
            bail!("extern declaration of '{}' cannot have an initializer", global.name)
        }
        // a pure declaration emits nothing; the definition lives elsewhere
        (None, Storage::Extern) => Ok(()),
        (None, storage) => {
            let size = global.ty.size_of(records)?;
            let alignment = global.ty.alignment(records)?;
            if storage == Storage::Static {
                state.local(&global.name);
            }
            state.comm(&global.name, size, alignment);
            Ok(())
        }
        (Some(init), storage) => {
            let size = global.ty.size_of(records)?;
            let alignment = global.ty.alignment(records)?;
            state.data_section();
            if storage != Storage::Static {
                state.globl(&global.name);
            }
            state.align(alignment);
            state.label_named(&global.name);
            match init {
                Initializer::Expr(expr) => {
                    emit_static_value(&global.name, expr, state)?;
                    let used = static_value_size(expr);
                    if used < size {
                        state.zero(size - used);
                    }
                }
                Initializer::List(items) => {
                    let mut items: Vec<&(i32, Expr)> = items.iter().collect();
                    items.sort_by_key(|(offset, _)| *offset);
                    let mut cursor = 0usize;
                    for (offset, expr) in items {
                        let offset = *offset as usize;
                        if offset > cursor {
                            // pad the gap between initialized members
                            state.zero(offset - cursor);
                        }
                        emit_static_value(&global.name, expr, state)?;
                        cursor = offset + static_value_size(expr);
                    }
                    if cursor < size {
                        state.zero(size - cursor);
                    }
                }
            }
            Ok(())
        }
    }
}

// One directive per scalar, sized by the initializer's type.
fn emit_static_value(name: &str, expr: &Expr, state: &mut Emitter) -> Result<()> {
    match (&expr.kind, &expr.ty.kind) {
        (ExprKind::ConstLong(v), TypeKind::Char) => state.byte(*v),
        (ExprKind::ConstULong(v), TypeKind::UChar) => state.byte(*v as i32),
        (ExprKind::ConstLong(v), TypeKind::Short) => state.value(*v),
        (ExprKind::ConstULong(v), TypeKind::UShort) => state.value(*v as i32),
        (ExprKind::ConstLong(v), TypeKind::Long) => state.long(*v),
        (ExprKind::ConstULong(v), TypeKind::ULong) => state.long(*v as i32),
        (ExprKind::ConstFloat(v), TypeKind::Float) => state.long(v.to_bits() as i32),
        (ExprKind::ConstDouble(v), TypeKind::Double) => {
            let bits = v.to_bits();
            state.long(bits as u32 as i32);
            state.long((bits >> 32) as u32 as i32);
        }
        (ExprKind::ConstPtr(v), TypeKind::Pointer(_)) => state.long(*v as i32),
        (ExprKind::ConstString(text), TypeKind::Pointer(_)) => {
            let label = state.string_const(text);
            state.long_symbol(&label);
        }
        _ => bail!("non-constant initializer for global '{name}'"),
    }
    Ok(())
}

fn static_value_size(expr: &Expr) -> usize {
    match expr.ty.kind {
        TypeKind::Char | TypeKind::UChar => 1,
        TypeKind::Short | TypeKind::UShort => 2,
        TypeKind::Double => 8,
        _ => 4,
    }
}
