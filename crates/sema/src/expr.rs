use anyhow::{bail, Result};

use types::{FuncType, QualType, RecordTable, TypeKind};

use crate::cast::{self, CastKind};
use crate::env::{Env, SymbolKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Xor,
    BitOr,
    BitAnd,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::LogicalAnd | BinaryOp::LogicalOr)
    }

    // Operators that reject float/double operands.
    fn integral_only(self) -> bool {
        matches!(
            self,
            BinaryOp::Mod
                | BinaryOp::Xor
                | BinaryOp::BitOr
                | BinaryOp::BitAnd
                | BinaryOp::Shl
                | BinaryOp::Shr
        )
    }
}

/// A typed expression node. The tree is built bottom-up by the
/// constructors below and is immutable afterwards; every node knows its
/// static type.
#[derive(Debug, Clone)]
pub struct Expr {
    pub ty: QualType,
    pub kind: ExprKind,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    ConstLong(i32),
    ConstULong(u32),
    ConstFloat(f32),
    ConstDouble(f64),
    ConstPtr(u32),
    ConstString(String),
    Variable(String),
    Assign { left: Box<Expr>, right: Box<Expr> },
    /// A comma-separated chain of assignment expressions; the value is the
    /// last one's.
    AssignList(Vec<Expr>),
    Conditional { cond: Box<Expr>, then_expr: Box<Expr>, else_expr: Box<Expr> },
    Call { func: Box<Expr>, args: Vec<Expr> },
    /// Struct/union member access; the base must have record type.
    Member { base: Box<Expr>, name: String },
    AddrOf(Box<Expr>),
    Deref(Box<Expr>),
    Cast(CastKind, Box<Expr>),
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    Negate(Box<Expr>),
    BitNot(Box<Expr>),
    LogicalNot(Box<Expr>),
    PreInc(Box<Expr>),
    PreDec(Box<Expr>),
    PostInc(Box<Expr>),
    PostDec(Box<Expr>),
}

impl Expr {
    pub fn is_const_expr(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::ConstLong(_)
                | ExprKind::ConstULong(_)
                | ExprKind::ConstFloat(_)
                | ExprKind::ConstDouble(_)
                | ExprKind::ConstPtr(_)
                | ExprKind::ConstString(_)
        )
    }

    /// An lvalue is an expression whose address can be taken.
    pub fn is_lvalue(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Variable(_) | ExprKind::Deref(_) | ExprKind::Member { .. }
        )
    }

    // ===== literals =====

    pub fn const_long(value: i32) -> Expr {
        Expr { ty: QualType::new(TypeKind::Long), kind: ExprKind::ConstLong(value) }
    }

    pub fn const_ulong(value: u32) -> Expr {
        Expr { ty: QualType::new(TypeKind::ULong), kind: ExprKind::ConstULong(value) }
    }

    pub fn const_float(value: f32) -> Expr {
        Expr { ty: QualType::new(TypeKind::Float), kind: ExprKind::ConstFloat(value) }
    }

    pub fn const_double(value: f64) -> Expr {
        Expr { ty: QualType::new(TypeKind::Double), kind: ExprKind::ConstDouble(value) }
    }

    pub fn const_ptr(value: u32, ty: QualType) -> Expr {
        Expr { ty, kind: ExprKind::ConstPtr(value) }
    }

    pub fn const_string(value: &str) -> Expr {
        Expr {
            ty: QualType::pointer_to(QualType::qualified(TypeKind::Char, true, false)),
            kind: ExprKind::ConstString(value.to_string()),
        }
    }

    pub(crate) fn cast(kind: CastKind, expr: Expr, ty: QualType) -> Expr {
        Expr { ty, kind: ExprKind::Cast(kind, Box::new(expr)) }
    }

    // ===== typed constructors =====

    /// A name reference. Enum constants become literals right away.
    pub fn variable(name: &str, env: &Env) -> Result<Expr> {
        let Some(entry) = env.lookup(name) else {
            bail!("use of undeclared identifier '{name}'");
        };
        match entry.kind {
            SymbolKind::EnumConst => Ok(Expr::const_long(entry.offset)),
            SymbolKind::Typedef => bail!("expected a variable, found typedef '{name}'"),
            SymbolKind::StackLocal | SymbolKind::FrameParam | SymbolKind::Global => Ok(Expr {
                ty: entry.ty,
                kind: ExprKind::Variable(name.to_string()),
            }),
        }
    }

    /// Simple assignment. The right operand is converted to the left
    /// operand's type; the left operand must be an lvalue.
    pub fn assign(left: Expr, right: Expr) -> Result<Expr> {
        if !left.is_lvalue() {
            bail!("cannot assign to a non-lvalue");
        }
        let ty = left.ty.clone();
        let right = cast::make_cast(right, &ty)?;
        Ok(Expr { ty, kind: ExprKind::Assign { left: Box::new(left), right: Box::new(right) } })
    }

    /// Compound assignment `l op= r` desugars to `l = l op r`.
    pub fn compound_assign(
        op: BinaryOp,
        left: Expr,
        right: Expr,
        records: &RecordTable,
    ) -> Result<Expr> {
        let value = Expr::binary(op, left.clone(), right, records)?;
        Expr::assign(left, value)
    }

    pub fn assign_list(exprs: Vec<Expr>) -> Result<Expr> {
        let Some(last) = exprs.last() else {
            bail!("empty assignment list");
        };
        Ok(Expr { ty: last.ty.clone(), kind: ExprKind::AssignList(exprs) })
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr, records: &RecordTable) -> Result<Expr> {
        let left = decay(left)?;
        let right = decay(right)?;

        if op.is_comparison() || op.is_logical() {
            let (left, right) = cast::usual_scalar_conversion(left, right)?;
            if let Some(folded) = fold_comparison_like(op, &left, &right) {
                return Ok(folded);
            }
            return Ok(Expr {
                ty: QualType::qualified(TypeKind::Long, true, false),
                kind: ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) },
            });
        }

        // Pointer arithmetic peels off before the usual conversions.
        if matches!(op, BinaryOp::Add) {
            if left.ty.is_pointer() {
                return pointer_addition(left, right, true, records);
            }
            if right.ty.is_pointer() {
                return pointer_addition(right, left, false, records);
            }
        }
        if matches!(op, BinaryOp::Sub) && left.ty.is_pointer() {
            if right.ty.is_pointer() {
                return pointer_difference(left, right, records);
            }
            return pointer_subtraction(left, right, records);
        }

        let (left, right) = cast::usual_arithmetic_conversion(left, right)?;
        if op.integral_only() && !left.ty.is_integral() {
            bail!("operator requires integral operands");
        }
        if let Some(folded) = fold_arithmetic(op, &left, &right)? {
            return Ok(folded);
        }
        let ty = left.ty.with_qualifiers(true, false);
        Ok(Expr { ty, kind: ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) } })
    }

    /// `cond ? then : else`. Arithmetic arms are unified by the usual
    /// arithmetic conversion; otherwise the arms must already have the same
    /// type.
    pub fn conditional(cond: Expr, then_expr: Expr, else_expr: Expr) -> Result<Expr> {
        let cond = decay(cond)?;
        if !cond.ty.is_scalar() {
            bail!("expected a scalar condition in conditional expression");
        }
        let cond = if cond.ty.is_integral() { cast::integral_promotion(cond)? } else { cond };

        let then_expr = decay(then_expr)?;
        let else_expr = decay(else_expr)?;
        let (then_expr, else_expr) = if then_expr.ty.is_arith() && else_expr.ty.is_arith() {
            cast::usual_arithmetic_conversion(then_expr, else_expr)?
        } else if then_expr.ty.same_type(&else_expr.ty) {
            (then_expr, else_expr)
        } else {
            bail!("mismatched operand types in conditional expression");
        };

        Ok(Expr {
            ty: then_expr.ty.clone(),
            kind: ExprKind::Conditional {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
        })
    }

    /// A function call through a designator or a function pointer. Fixed
    /// arguments are converted to the parameter types; extra arguments are
    /// allowed only for variadic signatures.
    pub fn call(func: Expr, args: Vec<Expr>) -> Result<Expr> {
        let signature = match &func.ty.kind {
            TypeKind::Function(sig) => sig.clone(),
            TypeKind::Pointer(referent) => match &referent.kind {
                TypeKind::Function(sig) => sig.clone(),
                _ => bail!("calling through a pointer to a non-function"),
            },
            _ => bail!("calling a non-function"),
        };
        check_arity(&signature, args.len())?;

        let mut converted = Vec::with_capacity(args.len());
        for (index, arg) in args.into_iter().enumerate() {
            let arg = decay(arg)?;
            match signature.params.get(index) {
                Some(param) => converted.push(cast::make_cast(arg, &param.ty)?),
                None => converted.push(arg),
            }
        }
        Ok(Expr {
            ty: signature.ret.clone(),
            kind: ExprKind::Call { func: Box::new(func), args: converted },
        })
    }

    /// `base.name` — the base must be a complete struct or union with a
    /// member of that name. (`p->name` is built as `(*p).name`.)
    pub fn member(base: Expr, name: &str, records: &RecordTable) -> Result<Expr> {
        let TypeKind::Record(id) = base.ty.kind else {
            bail!("member access on a non-struct/union value");
        };
        let member = records.member(id, name)?;
        Ok(Expr {
            ty: member.ty.clone(),
            kind: ExprKind::Member { base: Box::new(base), name: name.to_string() },
        })
    }

    pub fn addr_of(expr: Expr) -> Result<Expr> {
        if !expr.is_lvalue() {
            bail!("cannot take the address of a non-lvalue");
        }
        Ok(Expr {
            ty: QualType::pointer_to(expr.ty.clone()),
            kind: ExprKind::AddrOf(Box::new(expr)),
        })
    }

    pub fn deref(expr: Expr) -> Result<Expr> {
        let expr = decay(expr)?;
        let TypeKind::Pointer(referent) = &expr.ty.kind else {
            bail!("dereferencing a non-pointer");
        };
        let ty = (**referent).clone();
        Ok(Expr { ty, kind: ExprKind::Deref(Box::new(expr)) })
    }

    pub fn negate(expr: Expr) -> Result<Expr> {
        let expr = promote_arith(expr)?;
        let folded = match expr.kind {
            ExprKind::ConstLong(v) => Some(Expr::const_long(v.wrapping_neg())),
            ExprKind::ConstULong(v) => Some(Expr::const_ulong(v.wrapping_neg())),
            ExprKind::ConstFloat(v) => Some(Expr::const_float(-v)),
            ExprKind::ConstDouble(v) => Some(Expr::const_double(-v)),
            _ => None,
        };
        Ok(folded.unwrap_or_else(|| Expr {
            ty: expr.ty.clone(),
            kind: ExprKind::Negate(Box::new(expr)),
        }))
    }

    pub fn bit_not(expr: Expr) -> Result<Expr> {
        let expr = decay(expr)?;
        if !expr.ty.is_integral() {
            bail!("bitwise complement of a non-integral value");
        }
        let expr = cast::integral_promotion(expr)?;
        let folded = match expr.kind {
            ExprKind::ConstLong(v) => Some(Expr::const_long(!v)),
            ExprKind::ConstULong(v) => Some(Expr::const_ulong(!v)),
            _ => None,
        };
        Ok(folded.unwrap_or_else(|| Expr {
            ty: expr.ty.clone(),
            kind: ExprKind::BitNot(Box::new(expr)),
        }))
    }

    pub fn logical_not(expr: Expr) -> Result<Expr> {
        let expr = decay(expr)?;
        if !expr.ty.is_scalar() {
            bail!("logical not of a non-scalar value");
        }
        let expr = if expr.ty.is_pointer() {
            cast::make_cast(expr, &QualType::new(TypeKind::ULong))?
        } else if expr.ty.is_integral() {
            cast::integral_promotion(expr)?
        } else {
            expr
        };
        let folded = match expr.kind {
            ExprKind::ConstLong(v) => Some(Expr::const_long((v == 0) as i32)),
            ExprKind::ConstULong(v) => Some(Expr::const_long((v == 0) as i32)),
            ExprKind::ConstFloat(v) => Some(Expr::const_long((v == 0.0) as i32)),
            ExprKind::ConstDouble(v) => Some(Expr::const_long((v == 0.0) as i32)),
            _ => None,
        };
        Ok(folded.unwrap_or_else(|| Expr {
            ty: QualType::qualified(TypeKind::Long, true, false),
            kind: ExprKind::LogicalNot(Box::new(expr)),
        }))
    }

    pub fn pre_inc(expr: Expr) -> Result<Expr> {
        inc_dec(expr, |e| ExprKind::PreInc(Box::new(e)))
    }

    pub fn pre_dec(expr: Expr) -> Result<Expr> {
        inc_dec(expr, |e| ExprKind::PreDec(Box::new(e)))
    }

    pub fn post_inc(expr: Expr) -> Result<Expr> {
        inc_dec(expr, |e| ExprKind::PostInc(Box::new(e)))
    }

    pub fn post_dec(expr: Expr) -> Result<Expr> {
        inc_dec(expr, |e| ExprKind::PostDec(Box::new(e)))
    }
}

fn inc_dec(expr: Expr, build: impl FnOnce(Expr) -> ExprKind) -> Result<Expr> {
    if !expr.is_lvalue() {
        bail!("increment/decrement of a non-lvalue");
    }
    if !expr.ty.is_scalar() {
        bail!("increment/decrement of a non-scalar value");
    }
    Ok(Expr { ty: expr.ty.clone(), kind: build(expr) })
}

fn check_arity(signature: &FuncType, num_args: usize) -> Result<()> {
    if signature.has_varargs {
        if num_args < signature.params.len() {
            bail!(
                "too few arguments: expected at least {}, got {num_args}",
                signature.params.len()
            );
        }
    } else if num_args != signature.params.len() {
        bail!("expected {} arguments, got {num_args}", signature.params.len());
    }
    Ok(())
}

// Arrays decay to pointers wherever a value is needed.
fn decay(expr: Expr) -> Result<Expr> {
    match &expr.ty.kind {
        TypeKind::Array(_, _) | TypeKind::IncompleteArray(_) => {
            let ty = expr.ty.decay();
            cast::make_cast(expr, &ty)
        }
        _ => Ok(expr),
    }
}

fn promote_arith(expr: Expr) -> Result<Expr> {
    let expr = decay(expr)?;
    if !expr.ty.is_arith() {
        bail!("expected an arithmetic operand");
    }
    if expr.ty.is_integral() {
        cast::integral_promotion(expr)
    } else {
        Ok(expr)
    }
}

/// `ptr + offset` (or `offset + ptr` when `ptr_on_left` is false): the
/// offset is scaled by the element size over 32-bit words, then the sum is
/// reinterpreted as the pointer type.
fn pointer_addition(
    ptr: Expr,
    offset: Expr,
    ptr_on_left: bool,
    records: &RecordTable,
) -> Result<Expr> {
    if !offset.ty.is_integral() {
        bail!("expected an integral value to add to a pointer");
    }
    let long_ty = QualType::new(TypeKind::Long);
    let offset = cast::make_cast(offset, &long_ty)?;
    let elem_size = pointer_elem_size(&ptr.ty, records)?;

    if let (ExprKind::ConstPtr(base), ExprKind::ConstLong(n)) = (&ptr.kind, &offset.kind) {
        let value = (*base as i32).wrapping_add(elem_size.wrapping_mul(*n)) as u32;
        return Ok(Expr::const_ptr(value, ptr.ty.clone()));
    }

    let ptr_ty = ptr.ty.clone();
    let base = cast::make_cast(ptr, &long_ty)?;
    let scaled = Expr::binary(BinaryOp::Mul, offset, Expr::const_long(elem_size), records)?;
    let sum = if ptr_on_left {
        Expr::binary(BinaryOp::Add, base, scaled, records)?
    } else {
        Expr::binary(BinaryOp::Add, scaled, base, records)?
    };
    cast::make_cast(sum, &ptr_ty)
}

fn pointer_subtraction(ptr: Expr, offset: Expr, records: &RecordTable) -> Result<Expr> {
    if !offset.ty.is_integral() {
        bail!("expected an integral value to subtract from a pointer");
    }
    let long_ty = QualType::new(TypeKind::Long);
    let offset = cast::make_cast(offset, &long_ty)?;
    let elem_size = pointer_elem_size(&ptr.ty, records)?;

    if let (ExprKind::ConstPtr(base), ExprKind::ConstLong(n)) = (&ptr.kind, &offset.kind) {
        let value = (*base as i32).wrapping_sub(elem_size.wrapping_mul(*n)) as u32;
        return Ok(Expr::const_ptr(value, ptr.ty.clone()));
    }

    let ptr_ty = ptr.ty.clone();
    let base = cast::make_cast(ptr, &long_ty)?;
    let scaled = Expr::binary(BinaryOp::Mul, offset, Expr::const_long(elem_size), records)?;
    let diff = Expr::binary(BinaryOp::Sub, base, scaled, records)?;
    cast::make_cast(diff, &ptr_ty)
}

/// `ptr - ptr` over matching element types: byte difference divided by the
/// element size, as a long.
fn pointer_difference(left: Expr, right: Expr, records: &RecordTable) -> Result<Expr> {
    let (TypeKind::Pointer(left_elem), TypeKind::Pointer(right_elem)) =
        (&left.ty.kind, &right.ty.kind)
    else {
        unreachable!("pointer_difference on non-pointers");
    };
    if !left_elem.same_type(right_elem) {
        bail!("subtracting pointers to different types");
    }
    let elem_size = pointer_elem_size(&left.ty, records)?;

    if let (ExprKind::ConstPtr(a), ExprKind::ConstPtr(b)) = (&left.kind, &right.kind) {
        return Ok(Expr::const_long((a.wrapping_sub(*b) as i32) / elem_size));
    }

    let long_ty = QualType::new(TypeKind::Long);
    let left = cast::make_cast(left, &long_ty)?;
    let right = cast::make_cast(right, &long_ty)?;
    let diff = Expr::binary(BinaryOp::Sub, left, right, records)?;
    Expr::binary(BinaryOp::Div, diff, Expr::const_long(elem_size), records)
}

fn pointer_elem_size(ptr_ty: &QualType, records: &RecordTable) -> Result<i32> {
    let TypeKind::Pointer(elem) = &ptr_ty.kind else {
        unreachable!("expected a pointer type");
    };
    match elem.kind {
        TypeKind::Void => Ok(1),
        _ => match elem.size_of(records) {
            Ok(size) => Ok(size as i32),
            Err(_) => bail!("pointer arithmetic on an incomplete element type"),
        },
    }
}

fn fold_arithmetic(op: BinaryOp, left: &Expr, right: &Expr) -> Result<Option<Expr>> {
    let folded = match (&left.kind, &right.kind) {
        (ExprKind::ConstLong(a), ExprKind::ConstLong(b)) => {
            let (a, b) = (*a, *b);
            if matches!(op, BinaryOp::Div | BinaryOp::Mod) && b == 0 {
                bail!("division by zero in a constant expression");
            }
            Some(Expr::const_long(match op {
                BinaryOp::Add => a.wrapping_add(b),
                BinaryOp::Sub => a.wrapping_sub(b),
                BinaryOp::Mul => a.wrapping_mul(b),
                BinaryOp::Div => a.wrapping_div(b),
                BinaryOp::Mod => a.wrapping_rem(b),
                BinaryOp::Xor => a ^ b,
                BinaryOp::BitOr => a | b,
                BinaryOp::BitAnd => a & b,
                BinaryOp::Shl => a.wrapping_shl(b as u32),
                BinaryOp::Shr => a.wrapping_shr(b as u32),
                _ => unreachable!(),
            }))
        }
        (ExprKind::ConstULong(a), ExprKind::ConstULong(b)) => {
            let (a, b) = (*a, *b);
            if matches!(op, BinaryOp::Div | BinaryOp::Mod) && b == 0 {
                bail!("division by zero in a constant expression");
            }
            Some(Expr::const_ulong(match op {
                BinaryOp::Add => a.wrapping_add(b),
                BinaryOp::Sub => a.wrapping_sub(b),
                BinaryOp::Mul => a.wrapping_mul(b),
                BinaryOp::Div => a.wrapping_div(b),
                BinaryOp::Mod => a.wrapping_rem(b),
                BinaryOp::Xor => a ^ b,
                BinaryOp::BitOr => a | b,
                BinaryOp::BitAnd => a & b,
                BinaryOp::Shl => a.wrapping_shl(b),
                BinaryOp::Shr => a.wrapping_shr(b),
                _ => unreachable!(),
            }))
        }
        (ExprKind::ConstFloat(a), ExprKind::ConstFloat(b)) => Some(Expr::const_float(match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            _ => return Ok(None),
        })),
        (ExprKind::ConstDouble(a), ExprKind::ConstDouble(b)) => {
            Some(Expr::const_double(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                _ => return Ok(None),
            }))
        }
        _ => None,
    };
    Ok(folded)
}

fn fold_comparison_like(op: BinaryOp, left: &Expr, right: &Expr) -> Option<Expr> {
    fn truth(v: bool) -> Expr {
        Expr::const_long(v as i32)
    }
    macro_rules! compare {
        ($a:expr, $b:expr) => {
            match op {
                BinaryOp::Eq => truth($a == $b),
                BinaryOp::Ne => truth($a != $b),
                BinaryOp::Lt => truth($a < $b),
                BinaryOp::Le => truth($a <= $b),
                BinaryOp::Gt => truth($a > $b),
                BinaryOp::Ge => truth($a >= $b),
                BinaryOp::LogicalAnd => truth($a != Default::default() && $b != Default::default()),
                BinaryOp::LogicalOr => truth($a != Default::default() || $b != Default::default()),
                _ => unreachable!(),
            }
        };
    }
    match (&left.kind, &right.kind) {
        (ExprKind::ConstLong(a), ExprKind::ConstLong(b)) => Some(compare!(*a, *b)),
        (ExprKind::ConstULong(a), ExprKind::ConstULong(b)) => Some(compare!(*a, *b)),
        (ExprKind::ConstFloat(a), ExprKind::ConstFloat(b)) => Some(compare!(*a, *b)),
        (ExprKind::ConstDouble(a), ExprKind::ConstDouble(b)) => Some(compare!(*a, *b)),
        _ => None,
    }
}
