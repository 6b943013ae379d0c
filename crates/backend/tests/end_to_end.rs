use backend::{emit, CompoundStmt, ExternDecl, FuncDef, Initializer, LocalDecl, Program, Stmt, Storage};
use sema::env::{Env, SymbolKind};
use sema::expr::{BinaryOp, Expr};
use types::{FuncType, QualType, RecordTable, TypeKind};

fn long_ty() -> QualType {
    QualType::new(TypeKind::Long)
}

#[test]
fn return_of_a_plus_b_uses_addition_and_the_single_return_label() {
    // int main(void) { int a = 3; int b = 4; return a + b; }
    let records = RecordTable::new();
    let signature = FuncType::create(long_ty(), vec![], false, &records).unwrap();
    let fenv = Env::new().set_current_function(signature).enter_scope();

    let env_a = fenv.declare(SymbolKind::StackLocal, "a", long_ty(), &records).unwrap();
    let env_b = env_a.declare(SymbolKind::StackLocal, "b", long_ty(), &records).unwrap();

    let sum = Expr::binary(
        BinaryOp::Add,
        Expr::variable("a", &env_b).unwrap(),
        Expr::variable("b", &env_b).unwrap(),
        &records,
    )
    .unwrap();

    let body = Stmt::Compound(CompoundStmt {
        decls: vec![
            (
                env_a.clone(),
                LocalDecl {
                    name: "a".to_string(),
                    init: Some(Initializer::Expr(Expr::const_long(3))),
                },
            ),
            (
                env_b.clone(),
                LocalDecl {
                    name: "b".to_string(),
                    init: Some(Initializer::Expr(Expr::const_long(4))),
                },
            ),
        ],
        stmts: vec![(env_b.clone(), Stmt::Return { expr: Some(sum) })],
    });

    let program = Program {
        decls: vec![(
            fenv,
            ExternDecl::Func(FuncDef {
                name: "main".to_string(),
                storage: Storage::Default,
                body,
            }),
        )],
    };

    let asm = emit(&program, &records).unwrap();

    // prologue and epilogue
    assert!(asm.contains(".globl main"), "missing .globl, asm:\n{asm}");
    assert!(asm.contains("main:"), "missing function label, asm:\n{asm}");
    assert!(asm.contains("pushl %ebp"), "missing prologue push, asm:\n{asm}");
    assert!(asm.contains("movl %esp, %ebp"), "missing prologue mov, asm:\n{asm}");
    assert!(asm.contains("leave"), "missing epilogue leave, asm:\n{asm}");
    assert!(asm.contains("ret"), "missing epilogue ret, asm:\n{asm}");

    // the two initializers and the 32-bit addition
    assert!(asm.contains("movl $3, %eax"), "missing init of a, asm:\n{asm}");
    assert!(asm.contains("movl $4, %eax"), "missing init of b, asm:\n{asm}");
    assert!(asm.contains("addl %ebx, %eax"), "missing addition, asm:\n{asm}");

    // the return path jumps to the single return label, which is emitted
    // right before the epilogue
    let ret_jump = asm
        .lines()
        .find_map(|line| line.trim().strip_prefix("jmp "))
        .expect("return should jump to the return label")
        .to_string();
    let label_at = asm.find(&format!("{ret_jump}:")).expect("return label emitted");
    let leave_at = asm.find("leave").unwrap();
    assert!(label_at < leave_at, "return label precedes the epilogue, asm:\n{asm}");
}

#[test]
fn locals_are_loaded_relative_to_the_frame_base() {
    let records = RecordTable::new();
    let signature = FuncType::create(long_ty(), vec![], false, &records).unwrap();
    let fenv = Env::new().set_current_function(signature).enter_scope();
    let env = fenv.declare(SymbolKind::StackLocal, "x", long_ty(), &records).unwrap();

    let body = Stmt::Compound(CompoundStmt {
        decls: vec![(
            env.clone(),
            LocalDecl {
                name: "x".to_string(),
                init: Some(Initializer::Expr(Expr::const_long(7))),
            },
        )],
        stmts: vec![(
            env.clone(),
            Stmt::Return { expr: Some(Expr::variable("x", &env).unwrap()) },
        )],
    });

    let program = Program {
        decls: vec![(
            fenv,
            ExternDecl::Func(FuncDef {
                name: "main".to_string(),
                storage: Storage::Default,
                body,
            }),
        )],
    };

    let asm = emit(&program, &records).unwrap();
    assert!(asm.contains("movl -4(%ebp), %eax"), "local load missing, asm:\n{asm}");
    // the declaration grew the frame over the local
    assert!(asm.contains("subl $4, %esp"), "frame growth missing, asm:\n{asm}");
}

#[test]
fn static_functions_are_not_exported() {
    let records = RecordTable::new();
    let signature = FuncType::create(long_ty(), vec![], false, &records).unwrap();
    let fenv = Env::new().set_current_function(signature);

    let body = Stmt::Compound(CompoundStmt {
        decls: vec![],
        stmts: vec![(fenv.clone(), Stmt::Return { expr: Some(Expr::const_long(0)) })],
    });

    let program = Program {
        decls: vec![(
            fenv,
            ExternDecl::Func(FuncDef {
                name: "helper".to_string(),
                storage: Storage::Static,
                body,
            }),
        )],
    };

    let asm = emit(&program, &records).unwrap();
    assert!(!asm.contains(".globl helper"), "static function exported, asm:\n{asm}");
    assert!(asm.contains("helper:"));
}

#[test]
fn parameters_are_read_from_positive_frame_offsets() {
    // int add(int a, int b) { return a + b; }
    let records = RecordTable::new();
    let signature = FuncType::create(
        long_ty(),
        vec![
            (Some("a".to_string()), long_ty()),
            (Some("b".to_string()), long_ty()),
        ],
        false,
        &records,
    )
    .unwrap();
    let fenv = Env::new().set_current_function(signature).enter_scope();

    let sum = Expr::binary(
        BinaryOp::Add,
        Expr::variable("a", &fenv).unwrap(),
        Expr::variable("b", &fenv).unwrap(),
        &records,
    )
    .unwrap();
    let body = Stmt::Compound(CompoundStmt {
        decls: vec![],
        stmts: vec![(fenv.clone(), Stmt::Return { expr: Some(sum) })],
    });

    let program = Program {
        decls: vec![(
            fenv,
            ExternDecl::Func(FuncDef {
                name: "add".to_string(),
                storage: Storage::Default,
                body,
            }),
        )],
    };

    let asm = emit(&program, &records).unwrap();
    assert!(asm.contains("movl 8(%ebp), %eax"), "first parameter load, asm:\n{asm}");
    assert!(asm.contains("movl 12(%ebp), %eax"), "second parameter load, asm:\n{asm}");
}
