use sema::{Env, SymbolKind};
use types::{QualType, RecordTable, TypeKind};

fn long_ty() -> QualType {
    QualType::new(TypeKind::Long)
}

#[test]
fn inner_binding_shadows_and_outer_snapshot_survives() {
    let records = RecordTable::new();
    let outer = Env::new()
        .declare(SymbolKind::StackLocal, "x", long_ty(), &records)
        .unwrap();
    let inner = outer
        .enter_scope()
        .declare(SymbolKind::StackLocal, "x", QualType::new(TypeKind::Float), &records)
        .unwrap();

    // inner lookup resolves the shadowing binding
    assert!(matches!(inner.lookup("x").unwrap().ty.kind, TypeKind::Float));

    // "leaving" the scope is simply not threading the inner snapshot:
    // the outer snapshot is untouched
    assert!(matches!(outer.lookup("x").unwrap().ty.kind, TypeKind::Long));
}

#[test]
fn lookup_fails_after_leaving_the_defining_scope() {
    let records = RecordTable::new();
    let outer = Env::new();
    let inner = outer
        .enter_scope()
        .declare(SymbolKind::StackLocal, "only_inner", long_ty(), &records)
        .unwrap();
    assert!(inner.lookup("only_inner").is_some());
    assert!(outer.lookup("only_inner").is_none());
}

#[test]
fn current_scope_lookup_ignores_outer_bindings() {
    let records = RecordTable::new();
    let env = Env::new()
        .declare(SymbolKind::Global, "g", long_ty(), &records)
        .unwrap()
        .enter_scope();
    assert!(env.lookup("g").is_some());
    assert!(env.lookup_in_current_scope("g").is_none());
}

#[test]
fn stack_cursor_continues_across_nested_scopes() {
    let records = RecordTable::new();
    let env = Env::new()
        .declare(SymbolKind::StackLocal, "a", long_ty(), &records)
        .unwrap()
        .enter_scope()
        .declare(SymbolKind::StackLocal, "b", QualType::new(TypeKind::Double), &records)
        .unwrap();
    assert_eq!(env.lookup("a").unwrap().offset, -4);
    assert_eq!(env.lookup("b").unwrap().offset, -12);
    assert_eq!(env.stack_size(), 12);
}
