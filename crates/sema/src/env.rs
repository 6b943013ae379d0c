use std::rc::Rc;

use types::{round_up, FuncType, QualType, RecordTable, TypeError, WORD};

/// Where a named object lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// An enumeration constant; the entry's offset is its value.
    EnumConst,
    /// A typedef name.
    Typedef,
    /// A block-scoped variable at a negative %ebp offset.
    StackLocal,
    /// A function parameter at a positive %ebp offset.
    FrameParam,
    /// A global symbol, addressed by name.
    Global,
}

/// The result of a name lookup.
#[derive(Debug, Clone)]
pub struct Entry {
    pub kind: SymbolKind,
    pub ty: QualType,
    pub offset: i32,
}

#[derive(Debug, Clone)]
struct Symbol {
    name: String,
    ty: QualType,
    offset: i32,
}

#[derive(Debug, Clone)]
struct Scope {
    locals: Vec<Symbol>,
    globals: Vec<Symbol>,
    typedefs: Vec<Symbol>,
    enums: Vec<Symbol>,
    func: Rc<FuncType>,
    // Next free stack slot, relative to %ebp. Grows downwards, so this is
    // zero or negative.
    frame_cursor: i32,
}

impl Scope {
    fn empty() -> Self {
        Scope {
            locals: Vec::new(),
            globals: Vec::new(),
            typedefs: Vec::new(),
            enums: Vec::new(),
            func: Rc::new(FuncType::empty()),
            frame_cursor: 0,
        }
    }

    // A fresh inner scope: same cursor, same enclosing function, no names.
    fn inner(&self) -> Self {
        Scope {
            locals: Vec::new(),
            globals: Vec::new(),
            typedefs: Vec::new(),
            enums: Vec::new(),
            func: Rc::clone(&self.func),
            frame_cursor: self.frame_cursor,
        }
    }

    fn find(&self, name: &str) -> Option<Entry> {
        // Last declaration wins within each category; categories are
        // searched in a fixed order.
        if let Some(sym) = self.enums.iter().rev().find(|sym| sym.name == name) {
            return Some(Entry { kind: SymbolKind::EnumConst, ty: sym.ty.clone(), offset: sym.offset });
        }
        if let Some(sym) = self.typedefs.iter().rev().find(|sym| sym.name == name) {
            return Some(Entry { kind: SymbolKind::Typedef, ty: sym.ty.clone(), offset: sym.offset });
        }
        if let Some(sym) = self.locals.iter().rev().find(|sym| sym.name == name) {
            return Some(Entry { kind: SymbolKind::StackLocal, ty: sym.ty.clone(), offset: sym.offset });
        }
        if let Some(param) = self
            .func
            .params
            .iter()
            .rev()
            .find(|param| param.name.as_deref() == Some(name))
        {
            return Some(Entry {
                kind: SymbolKind::FrameParam,
                ty: param.ty.clone(),
                offset: param.offset as i32,
            });
        }
        if let Some(sym) = self.globals.iter().rev().find(|sym| sym.name == name) {
            return Some(Entry { kind: SymbolKind::Global, ty: sym.ty.clone(), offset: sym.offset });
        }
        None
    }
}

/// An immutable snapshot of the lexical environment: a stack of scopes plus
/// the enclosing function and the stack-frame cursor.
///
/// Every "mutating" operation returns a new snapshot; the scopes it did not
/// touch are shared between the old and new value. Semantic analysis
/// threads snapshots through declarations, and block exit is simply not
/// threading the inner snapshot any further.
#[derive(Debug, Clone)]
pub struct Env {
    scopes: Vec<Rc<Scope>>,
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

impl Env {
    pub fn new() -> Self {
        Env { scopes: vec![Rc::new(Scope::empty())] }
    }

    fn top(&self) -> &Scope {
        self.scopes.last().expect("environment always has a global scope")
    }

    // Copy-on-write update of the innermost scope.
    fn with_top(&self, scope: Scope) -> Env {
        let mut scopes = self.scopes.clone();
        scopes.pop();
        scopes.push(Rc::new(scope));
        Env { scopes }
    }

    pub fn enter_scope(&self) -> Env {
        let mut scopes = self.scopes.clone();
        scopes.push(Rc::new(self.top().inner()));
        Env { scopes }
    }

    pub fn exit_scope(&self) -> Env {
        assert!(self.scopes.len() > 1, "cannot exit the global scope");
        let mut scopes = self.scopes.clone();
        scopes.pop();
        Env { scopes }
    }

    /// Declare a name in the innermost scope. A stack local advances the
    /// frame cursor by the type's size rounded up to the stack word, so the
    /// recorded offset is already aligned.
    pub fn declare(
        &self,
        kind: SymbolKind,
        name: &str,
        ty: QualType,
        records: &RecordTable,
    ) -> Result<Env, TypeError> {
        let mut scope = self.top().clone();
        match kind {
            SymbolKind::StackLocal => {
                let size = ty.size_of(records)?;
                scope.frame_cursor -= round_up(size, WORD) as i32;
                let offset = scope.frame_cursor;
                scope.locals.push(Symbol { name: name.to_string(), ty, offset });
            }
            SymbolKind::Global => {
                scope.globals.push(Symbol { name: name.to_string(), ty, offset: 0 });
            }
            SymbolKind::Typedef => {
                scope.typedefs.push(Symbol { name: name.to_string(), ty, offset: 0 });
            }
            SymbolKind::EnumConst | SymbolKind::FrameParam => {
                panic!("declare: use declare_enum_constant / set_current_function")
            }
        }
        Ok(self.with_top(scope))
    }

    pub fn declare_enum_constant(&self, name: &str, ty: QualType, value: i32) -> Env {
        let mut scope = self.top().clone();
        scope.enums.push(Symbol { name: name.to_string(), ty, offset: value });
        self.with_top(scope)
    }

    /// Set the function whose body is being analyzed. Its parameters become
    /// visible as frame entries.
    pub fn set_current_function(&self, func: FuncType) -> Env {
        let mut scope = self.top().clone();
        scope.func = Rc::new(func);
        self.with_top(scope)
    }

    pub fn current_function(&self) -> Rc<FuncType> {
        Rc::clone(&self.top().func)
    }

    /// Search innermost to outermost; inside a scope enum constants win
    /// over typedefs, typedefs over locals, locals over parameters,
    /// parameters over globals.
    pub fn lookup(&self, name: &str) -> Option<Entry> {
        self.scopes.iter().rev().find_map(|scope| scope.find(name))
    }

    pub fn lookup_in_current_scope(&self, name: &str) -> Option<Entry> {
        self.top().find(name)
    }

    /// Bytes of stack the current scope's locals occupy below %ebp.
    pub fn stack_size(&self) -> i32 {
        -self.top().frame_cursor
    }

    pub fn is_global_scope(&self) -> bool {
        self.scopes.len() == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{QualType, RecordTable, TypeKind};

    fn long_ty() -> QualType {
        QualType::new(TypeKind::Long)
    }

    #[test]
    fn stack_locals_get_aligned_negative_offsets() {
        let records = RecordTable::new();
        let env = Env::new()
            .declare(SymbolKind::StackLocal, "a", QualType::new(TypeKind::Char), &records)
            .unwrap()
            .declare(SymbolKind::StackLocal, "b", long_ty(), &records)
            .unwrap();
        let a = env.lookup("a").unwrap();
        let b = env.lookup("b").unwrap();
        // every local takes at least one 4-byte slot
        assert_eq!(a.offset, -4);
        assert_eq!(b.offset, -8);
        assert_eq!(env.stack_size(), 8);
    }

    #[test]
    fn snapshots_are_persistent() {
        let records = RecordTable::new();
        let outer = Env::new()
            .declare(SymbolKind::StackLocal, "x", long_ty(), &records)
            .unwrap();
        let inner = outer
            .enter_scope()
            .declare(SymbolKind::StackLocal, "x", QualType::new(TypeKind::Double), &records)
            .unwrap();

        // the inner binding shadows
        assert!(matches!(inner.lookup("x").unwrap().ty.kind, TypeKind::Double));
        // the outer snapshot still sees the original binding
        assert!(matches!(outer.lookup("x").unwrap().ty.kind, TypeKind::Long));
        assert_eq!(outer.lookup("x").unwrap().offset, -4);
    }

    #[test]
    fn scope_exit_restores_outer_binding() {
        let records = RecordTable::new();
        let env = Env::new()
            .declare(SymbolKind::StackLocal, "x", long_ty(), &records)
            .unwrap()
            .enter_scope()
            .declare(SymbolKind::StackLocal, "x", long_ty(), &records)
            .unwrap();
        assert_eq!(env.lookup("x").unwrap().offset, -8);
        let outer = env.exit_scope();
        assert_eq!(outer.lookup("x").unwrap().offset, -4);
    }

    #[test]
    fn enum_constants_shadow_globals() {
        let records = RecordTable::new();
        let env = Env::new()
            .declare(SymbolKind::Global, "n", long_ty(), &records)
            .unwrap()
            .declare_enum_constant("n", long_ty(), 42);
        let entry = env.lookup("n").unwrap();
        assert_eq!(entry.kind, SymbolKind::EnumConst);
        assert_eq!(entry.offset, 42);
    }

    #[test]
    fn parameters_resolve_through_current_function() {
        let records = RecordTable::new();
        let func = FuncType::create(
            long_ty(),
            vec![(Some("a".to_string()), long_ty()), (Some("b".to_string()), long_ty())],
            false,
            &records,
        )
        .unwrap();
        let env = Env::new().set_current_function(func).enter_scope();
        let b = env.lookup("b").unwrap();
        assert_eq!(b.kind, SymbolKind::FrameParam);
        assert_eq!(b.offset, 12);
    }

    #[test]
    fn unknown_name_is_none() {
        assert!(Env::new().lookup("nope").is_none());
    }

    #[test]
    fn last_declaration_wins_within_scope() {
        let records = RecordTable::new();
        let env = Env::new()
            .declare(SymbolKind::StackLocal, "x", long_ty(), &records)
            .unwrap()
            .declare(SymbolKind::StackLocal, "x", long_ty(), &records)
            .unwrap();
        assert_eq!(env.lookup("x").unwrap().offset, -8);
    }

    #[test]
    fn global_scope_detection() {
        let env = Env::new();
        assert!(env.is_global_scope());
        assert!(!env.enter_scope().is_global_scope());
    }
}
