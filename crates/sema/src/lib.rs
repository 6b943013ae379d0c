//! Semantic layer: persistent environment snapshots, the typed expression
//! tree, and the type-conversion engine.
//!
//! The front end (lexer/parser) lives outside this workspace; it builds
//! typed trees through the constructors in [`expr`] and threads an
//! [`env::Env`] snapshot through every declaration. All user-facing semantic
//! errors are raised here, while the tree is being built; code generation
//! downstream assumes a well-typed tree.

pub mod cast;
pub mod env;
pub mod expr;

pub use cast::{
    integral_promotion, make_cast, usual_arithmetic_conversion, usual_scalar_conversion, CastKind,
};
pub use env::{Entry, Env, SymbolKind};
pub use expr::{BinaryOp, Expr, ExprKind};
