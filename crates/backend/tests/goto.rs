use backend::{emit, CompoundStmt, ExternDecl, FuncDef, Program, Stmt, Storage};
use sema::env::Env;
use sema::expr::Expr;
use types::{FuncType, QualType, RecordTable, TypeKind};

fn main_env(records: &RecordTable) -> Env {
    let signature =
        FuncType::create(QualType::new(TypeKind::Long), vec![], false, records).unwrap();
    Env::new().set_current_function(signature).enter_scope()
}

fn emit_main(body: Stmt, env: Env, records: &RecordTable) -> String {
    let program = Program {
        decls: vec![(
            env,
            ExternDecl::Func(FuncDef {
                name: "main".to_string(),
                storage: Storage::Default,
                body,
            }),
        )],
    };
    emit(&program, records).unwrap()
}

#[test]
fn forward_goto_resolves_to_a_later_label() {
    // goto out; return 1; out: return 0;
    let records = RecordTable::new();
    let env = main_env(&records);

    let body = Stmt::Compound(CompoundStmt {
        decls: vec![],
        stmts: vec![
            (env.clone(), Stmt::Goto("out".to_string())),
            (env.clone(), Stmt::Return { expr: Some(Expr::const_long(1)) }),
            (
                env.clone(),
                Stmt::Labeled {
                    label: "out".to_string(),
                    stmt: Box::new(Stmt::Return { expr: Some(Expr::const_long(0)) }),
                },
            ),
        ],
    });
    let asm = emit_main(body, env, &records);

    // the goto's target label is emitted after the jump
    let target = asm
        .lines()
        .find_map(|line| line.trim().strip_prefix("jmp "))
        .expect("goto must jump")
        .to_string();
    let jmp_at = asm.find(&format!("jmp {target}")).unwrap();
    let label_at = asm.find(&format!("{target}:")).expect("label must be emitted");
    assert!(label_at > jmp_at, "forward goto, asm:\n{asm}");
}

#[test]
fn backward_goto_reuses_an_earlier_label() {
    // again: ; goto again;
    let records = RecordTable::new();
    let env = main_env(&records);

    let body = Stmt::Compound(CompoundStmt {
        decls: vec![],
        stmts: vec![
            (
                env.clone(),
                Stmt::Labeled {
                    label: "again".to_string(),
                    stmt: Box::new(Stmt::Expr(None)),
                },
            ),
            (env.clone(), Stmt::Goto("again".to_string())),
        ],
    });
    let asm = emit_main(body, env, &records);

    let target = asm
        .lines()
        .find_map(|line| line.trim().strip_prefix("jmp "))
        .unwrap()
        .to_string();
    let label_at = asm.find(&format!("{target}:")).expect("label emitted");
    let jmp_at = asm.find(&format!("jmp {target}")).unwrap();
    assert!(label_at < jmp_at, "backward goto, asm:\n{asm}");
}

#[test]
fn labeled_statement_reasserts_the_stack_pointer() {
    let records = RecordTable::new();
    let env = main_env(&records);

    let body = Stmt::Compound(CompoundStmt {
        decls: vec![],
        stmts: vec![(
            env.clone(),
            Stmt::Labeled {
                label: "l".to_string(),
                stmt: Box::new(Stmt::Expr(None)),
            },
        )],
    });
    let asm = emit_main(body, env, &records);

    // arriving by jump leaves %esp unknown; the label re-derives it
    assert!(asm.contains("lea 0(%ebp), %esp"), "stack reassertion, asm:\n{asm}");
}

#[test]
#[should_panic(expected = "unresolved goto label")]
fn goto_to_a_missing_label_is_a_compiler_defect() {
    let records = RecordTable::new();
    let env = main_env(&records);

    let body = Stmt::Compound(CompoundStmt {
        decls: vec![],
        stmts: vec![(env.clone(), Stmt::Goto("nowhere".to_string()))],
    });
    let _ = emit_main(body, env, &records);
}
