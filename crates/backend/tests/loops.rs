use backend::{emit, CompoundStmt, ExternDecl, FuncDef, Initializer, LocalDecl, Program, Stmt, Storage};
use sema::env::{Env, SymbolKind};
use sema::expr::{BinaryOp, Expr};
use types::{FuncType, QualType, RecordTable, TypeKind};

fn long_ty() -> QualType {
    QualType::new(TypeKind::Long)
}

fn count_substr(hay: &str, needle: &str) -> usize {
    let mut count = 0;
    let mut start = 0;
    while let Some(pos) = hay[start..].find(needle) {
        count += 1;
        start += pos + needle.len();
    }
    count
}

// a one-function program around the given body
fn emit_main(body: Stmt, fenv: Env, records: &RecordTable) -> String {
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
    emit(&program, records).unwrap()
}

fn main_env(records: &RecordTable) -> Env {
    let signature = FuncType::create(long_ty(), vec![], false, records).unwrap();
    Env::new().set_current_function(signature).enter_scope()
}

#[test]
fn while_loop_tests_then_runs_then_jumps_back() {
    // while (x) x = x - 1;
    let records = RecordTable::new();
    let env = main_env(&records)
        .declare(SymbolKind::StackLocal, "x", long_ty(), &records)
        .unwrap();

    let cond = Expr::variable("x", &env).unwrap();
    let update = Expr::assign(
        Expr::variable("x", &env).unwrap(),
        Expr::binary(
            BinaryOp::Sub,
            Expr::variable("x", &env).unwrap(),
            Expr::const_long(1),
            &records,
        )
        .unwrap(),
    )
    .unwrap();

    let body = Stmt::Compound(CompoundStmt {
        decls: vec![(env.clone(), LocalDecl {
            name: "x".to_string(),
            init: Some(Initializer::Expr(Expr::const_long(5))),
        })],
        stmts: vec![(
            env.clone(),
            Stmt::While {
                cond,
                body: Box::new(Stmt::Expr(Some(update))),
            },
        )],
    });

    let asm = emit_main(body, env, &records);
    assert!(asm.contains("testl %eax, %eax"), "loop test missing, asm:\n{asm}");
    assert!(asm.contains("jz .L"), "exit branch missing, asm:\n{asm}");
    assert!(count_substr(&asm, "jmp .L") >= 1, "back edge missing, asm:\n{asm}");
    let jz_target = asm
        .lines()
        .find_map(|line| line.trim().strip_prefix("jz "))
        .unwrap()
        .to_string();
    assert!(asm.contains(&format!("{jz_target}:")), "finish label missing, asm:\n{asm}");
}

#[test]
fn do_while_places_continue_before_the_test() {
    // do { continue; } while (x);
    let records = RecordTable::new();
    let env = main_env(&records)
        .declare(SymbolKind::StackLocal, "x", long_ty(), &records)
        .unwrap();

    let body = Stmt::Compound(CompoundStmt {
        decls: vec![(env.clone(), LocalDecl { name: "x".to_string(), init: None })],
        stmts: vec![(
            env.clone(),
            Stmt::DoWhile {
                body: Box::new(Stmt::Compound(CompoundStmt {
                    decls: vec![],
                    stmts: vec![(env.clone(), Stmt::Continue)],
                })),
                cond: Expr::variable("x", &env).unwrap(),
            },
        )],
    });

    let asm = emit_main(body, env, &records);
    // the continue jump targets a label that is followed by the test
    let continue_target = asm
        .lines()
        .find_map(|line| line.trim().strip_prefix("jmp "))
        .expect("continue should be a jump")
        .to_string();
    let lines: Vec<&str> = asm.lines().map(str::trim).collect();
    let label_at = lines
        .iter()
        .position(|line| *line == format!("{continue_target}:"))
        .expect("continue label must be emitted");
    assert!(
        lines[label_at + 1..]
            .iter()
            .take(3)
            .any(|line| line.starts_with("movl") || line.starts_with("testl")),
        "test should follow the continue label, asm:\n{asm}"
    );
    assert!(asm.contains("jnz .L"), "do-while loops back on nonzero, asm:\n{asm}");
}

#[test]
fn for_loop_emits_init_cond_step_in_order() {
    // for (x = 0; x < 3; x = x + 1) ;
    let records = RecordTable::new();
    let env = main_env(&records)
        .declare(SymbolKind::StackLocal, "x", long_ty(), &records)
        .unwrap();

    let init = Expr::assign(Expr::variable("x", &env).unwrap(), Expr::const_long(0)).unwrap();
    let cond = Expr::binary(
        BinaryOp::Lt,
        Expr::variable("x", &env).unwrap(),
        Expr::const_long(3),
        &records,
    )
    .unwrap();
    let step = Expr::assign(
        Expr::variable("x", &env).unwrap(),
        Expr::binary(
            BinaryOp::Add,
            Expr::variable("x", &env).unwrap(),
            Expr::const_long(1),
            &records,
        )
        .unwrap(),
    )
    .unwrap();

    let body = Stmt::Compound(CompoundStmt {
        decls: vec![(env.clone(), LocalDecl { name: "x".to_string(), init: None })],
        stmts: vec![(
            env.clone(),
            Stmt::For {
                init: Some(init),
                cond: Some(cond),
                step: Some(step),
                body: Box::new(Stmt::Expr(None)),
            },
        )],
    });

    let asm = emit_main(body, env, &records);
    let init_at = asm.find("movl $0, %eax").expect("init store");
    let cmp_at = asm.find("cmpl %ebx, %eax").expect("condition compare");
    let add_at = asm.find("addl %ebx, %eax").expect("step addition");
    assert!(init_at < cmp_at && cmp_at < add_at, "phases out of order, asm:\n{asm}");
    assert!(asm.contains("setl %al"), "signed less-than in condition, asm:\n{asm}");
}

#[test]
fn break_jumps_past_the_loop() {
    // while (1) break;
    let records = RecordTable::new();
    let env = main_env(&records);

    let body = Stmt::Compound(CompoundStmt {
        decls: vec![],
        stmts: vec![(
            env.clone(),
            Stmt::While {
                cond: Expr::const_long(1),
                body: Box::new(Stmt::Break),
            },
        )],
    });

    let asm = emit_main(body, env, &records);
    let jz_target = asm
        .lines()
        .find_map(|line| line.trim().strip_prefix("jz "))
        .unwrap()
        .to_string();
    assert!(
        asm.contains(&format!("jmp {jz_target}")),
        "break must jump to the loop exit, asm:\n{asm}"
    );
}

#[test]
fn nested_loop_break_targets_the_inner_exit() {
    // while (1) { while (2) break; }
    let records = RecordTable::new();
    let env = main_env(&records);

    let inner = Stmt::While {
        cond: Expr::const_long(2),
        body: Box::new(Stmt::Break),
    };
    let body = Stmt::Compound(CompoundStmt {
        decls: vec![],
        stmts: vec![(
            env.clone(),
            Stmt::While {
                cond: Expr::const_long(1),
                body: Box::new(Stmt::Compound(CompoundStmt {
                    decls: vec![],
                    stmts: vec![(env.clone(), inner)],
                })),
            },
        )],
    });

    let asm = emit_main(body, env, &records);
    let jz_targets: Vec<String> = asm
        .lines()
        .filter_map(|line| line.trim().strip_prefix("jz ").map(str::to_string))
        .collect();
    assert_eq!(jz_targets.len(), 2, "two loop exits expected, asm:\n{asm}");
    // the break belongs to the inner loop: its target is the second exit
    assert!(
        asm.contains(&format!("jmp {}", jz_targets[1])),
        "inner break target wrong, asm:\n{asm}"
    );
}
