use backend::{emit, CompoundStmt, ExternDecl, FuncDef, Program, Stmt, Storage};
use sema::env::Env;
use sema::expr::Expr;
use types::{FuncType, QualType, RecordTable, TypeKind};

fn long_ty() -> QualType {
    QualType::new(TypeKind::Long)
}

fn main_env(records: &RecordTable) -> Env {
    let signature = FuncType::create(long_ty(), vec![], false, records).unwrap();
    Env::new().set_current_function(signature).enter_scope()
}

fn emit_switch_main(body: Stmt, env: Env, records: &RecordTable) -> anyhow::Result<String> {
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
    emit(&program, records)
}

fn case(env: &Env, value: i32, stmt: Stmt) -> (Env, Stmt) {
    (env.clone(), Stmt::Case { value, stmt: Box::new(stmt) })
}

#[test]
fn dispatch_compares_each_case_value_once() {
    // switch (7) { case 1: return 1; case 2: return 2; default: return 3; }
    let records = RecordTable::new();
    let env = main_env(&records);

    let body = Stmt::Compound(CompoundStmt {
        decls: vec![],
        stmts: vec![(
            env.clone(),
            Stmt::Switch {
                expr: Expr::const_long(7),
                body: Box::new(Stmt::Compound(CompoundStmt {
                    decls: vec![],
                    stmts: vec![
                        case(&env, 1, Stmt::Return { expr: Some(Expr::const_long(1)) }),
                        case(&env, 2, Stmt::Return { expr: Some(Expr::const_long(2)) }),
                        (
                            env.clone(),
                            Stmt::Default {
                                stmt: Box::new(Stmt::Return { expr: Some(Expr::const_long(3)) }),
                            },
                        ),
                    ],
                })),
            },
        )],
    });

    let asm = emit_switch_main(body, env, &records).unwrap();
    assert!(asm.contains("cmpl $1, %eax"), "case 1 compare, asm:\n{asm}");
    assert!(asm.contains("cmpl $2, %eax"), "case 2 compare, asm:\n{asm}");
    // dispatch ends in an unconditional jump to the default
    let cmp2 = asm.find("cmpl $2, %eax").unwrap();
    let jmp_after = asm[cmp2..].find("jmp .L");
    assert!(jmp_after.is_some(), "default jump after dispatch, asm:\n{asm}");
}

#[test]
fn case_order_is_preserved_in_the_dispatch_chain() {
    let records = RecordTable::new();
    let env = main_env(&records);

    let body = Stmt::Compound(CompoundStmt {
        decls: vec![],
        stmts: vec![(
            env.clone(),
            Stmt::Switch {
                expr: Expr::const_long(0),
                body: Box::new(Stmt::Compound(CompoundStmt {
                    decls: vec![],
                    stmts: vec![
                        case(&env, 30, Stmt::Break),
                        case(&env, 10, Stmt::Break),
                        case(&env, 20, Stmt::Break),
                    ],
                })),
            },
        )],
    });

    let asm = emit_switch_main(body, env, &records).unwrap();
    let at30 = asm.find("cmpl $30, %eax").expect("case 30");
    let at10 = asm.find("cmpl $10, %eax").expect("case 10");
    let at20 = asm.find("cmpl $20, %eax").expect("case 20");
    assert!(at30 < at10 && at10 < at20, "dispatch order changed, asm:\n{asm}");
}

#[test]
fn duplicate_case_values_are_rejected() {
    let records = RecordTable::new();
    let env = main_env(&records);

    let body = Stmt::Compound(CompoundStmt {
        decls: vec![],
        stmts: vec![(
            env.clone(),
            Stmt::Switch {
                expr: Expr::const_long(5),
                body: Box::new(Stmt::Compound(CompoundStmt {
                    decls: vec![],
                    stmts: vec![
                        case(&env, 5, Stmt::Break),
                        case(&env, 5, Stmt::Break),
                    ],
                })),
            },
        )],
    });

    let err = emit_switch_main(body, env, &records).unwrap_err();
    assert!(err.to_string().contains("duplicate case"), "got: {err}");
}

#[test]
fn multiple_defaults_are_rejected() {
    let records = RecordTable::new();
    let env = main_env(&records);

    let body = Stmt::Compound(CompoundStmt {
        decls: vec![],
        stmts: vec![(
            env.clone(),
            Stmt::Switch {
                expr: Expr::const_long(5),
                body: Box::new(Stmt::Compound(CompoundStmt {
                    decls: vec![],
                    stmts: vec![
                        (env.clone(), Stmt::Default { stmt: Box::new(Stmt::Break) }),
                        (env.clone(), Stmt::Default { stmt: Box::new(Stmt::Break) }),
                    ],
                })),
            },
        )],
    });

    let err = emit_switch_main(body, env, &records).unwrap_err();
    assert!(err.to_string().contains("default"), "got: {err}");
}

#[test]
fn switch_body_must_be_compound() {
    let records = RecordTable::new();
    let env = main_env(&records);

    let body = Stmt::Compound(CompoundStmt {
        decls: vec![],
        stmts: vec![(
            env.clone(),
            Stmt::Switch {
                expr: Expr::const_long(5),
                body: Box::new(Stmt::Break),
            },
        )],
    });

    let err = emit_switch_main(body, env, &records).unwrap_err();
    assert!(err.to_string().contains("compound"), "got: {err}");
}

#[test]
fn nested_switch_cases_stay_with_the_inner_switch() {
    // switch (1) { case 1: switch (2) { case 1: break; } break; }
    // the inner `case 1` must not clash with the outer one
    let records = RecordTable::new();
    let env = main_env(&records);

    let inner = Stmt::Switch {
        expr: Expr::const_long(2),
        body: Box::new(Stmt::Compound(CompoundStmt {
            decls: vec![],
            stmts: vec![case(&env, 1, Stmt::Break)],
        })),
    };
    let body = Stmt::Compound(CompoundStmt {
        decls: vec![],
        stmts: vec![(
            env.clone(),
            Stmt::Switch {
                expr: Expr::const_long(1),
                body: Box::new(Stmt::Compound(CompoundStmt {
                    decls: vec![],
                    stmts: vec![
                        case(&env, 1, inner),
                        (env.clone(), Stmt::Break),
                    ],
                })),
            },
        )],
    });

    assert!(emit_switch_main(body, env, &records).is_ok());
}

#[test]
fn fallthrough_emits_bodies_linearly_without_extra_jumps() {
    // switch (1) { case 1: ; case 2: ; } — no break: case 1 falls into 2
    let records = RecordTable::new();
    let env = main_env(&records);

    let body = Stmt::Compound(CompoundStmt {
        decls: vec![],
        stmts: vec![(
            env.clone(),
            Stmt::Switch {
                expr: Expr::const_long(1),
                body: Box::new(Stmt::Compound(CompoundStmt {
                    decls: vec![],
                    stmts: vec![
                        case(&env, 1, Stmt::Expr(None)),
                        case(&env, 2, Stmt::Expr(None)),
                    ],
                })),
            },
        )],
    });

    let asm = emit_switch_main(body, env, &records).unwrap();
    // both case labels are emitted, in order, with nothing between them
    // that transfers control
    let jz_targets: Vec<String> = asm
        .lines()
        .filter_map(|line| line.trim().strip_prefix("jz ").map(str::to_string))
        .collect();
    assert_eq!(jz_targets.len(), 2);
    let first = asm.find(&format!("{}:", jz_targets[0])).expect("case 1 label");
    let second = asm.find(&format!("{}:", jz_targets[1])).expect("case 2 label");
    assert!(first < second);
    let between = &asm[first..second];
    assert!(!between.contains("jmp"), "fallthrough must not jump, asm:\n{asm}");
}
