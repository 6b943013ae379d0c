use anyhow::{bail, Result};

use types::{QualType, TypeKind};

use crate::expr::{Expr, ExprKind};

/// The primitive conversions the code generator knows how to emit. Every
/// implicit or explicit C conversion is expressed as a chain of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    /// Reinterpretation; no instructions.
    Nop,
    I8ToI16,
    I8ToI32,
    I16ToI32,
    I32ToFloat,
    I32ToDouble,
    /// Truncation: keep the low 8 bits of a 32-bit value.
    PreserveI8,
    /// Truncation: keep the low 16 bits of a 32-bit value.
    PreserveI16,
    U8ToU16,
    U8ToU32,
    U16ToU32,
    FloatToI32,
    FloatToDouble,
    DoubleToI32,
    DoubleToFloat,
}

/// Convert `expr` to `target`. Returns the expression unchanged when the
/// two types are already structurally equal — the only case that emits no
/// instructions at all. Literal sources are folded to literals of the
/// target type instead of growing a runtime conversion chain.
pub fn make_cast(expr: Expr, target: &QualType) -> Result<Expr> {
    if expr.ty.same_type(target) {
        return Ok(expr);
    }
    if expr.ty.is_pointer() {
        return from_pointer(expr, target);
    }
    if target.is_pointer() {
        return to_pointer(expr, target);
    }
    match expr.ty.kind {
        TypeKind::Char | TypeKind::Short | TypeKind::Long => signed_integral_to_arith(expr, target),
        TypeKind::UChar | TypeKind::UShort | TypeKind::ULong => {
            unsigned_integral_to_arith(expr, target)
        }
        TypeKind::Float | TypeKind::Double => float_to_arith(expr, target),
        _ => bail!("cannot cast from {:?}", expr.ty.kind),
    }
}

fn long_like(target: &QualType) -> QualType {
    QualType::qualified(TypeKind::Long, target.is_const, target.is_volatile)
}

fn cannot(from: &TypeKind, to: &TypeKind) -> anyhow::Error {
    anyhow::anyhow!("cannot cast from {from:?} to {to:?}")
}

/// Casts out of char, short, long. Widening sign-extends; narrowing keeps
/// the low bits; the float/double route first widens to the 32-bit word.
fn signed_integral_to_arith(expr: Expr, target: &QualType) -> Result<Expr> {
    let to = &target.kind;
    match expr.ty.kind {
        TypeKind::Char => match to {
            TypeKind::Short | TypeKind::UShort => Ok(Expr::cast(CastKind::I8ToI16, expr, target.clone())),
            TypeKind::Long | TypeKind::ULong => Ok(Expr::cast(CastKind::I8ToI32, expr, target.clone())),
            TypeKind::UChar => Ok(Expr::cast(CastKind::Nop, expr, target.clone())),
            TypeKind::Float => {
                let wide = Expr::cast(CastKind::I8ToI32, expr, long_like(target));
                Ok(Expr::cast(CastKind::I32ToFloat, wide, target.clone()))
            }
            TypeKind::Double => {
                let wide = Expr::cast(CastKind::I8ToI32, expr, long_like(target));
                Ok(Expr::cast(CastKind::I32ToDouble, wide, target.clone()))
            }
            _ => Err(cannot(&TypeKind::Char, to)),
        },
        TypeKind::Short => match to {
            TypeKind::Char | TypeKind::UChar => Ok(Expr::cast(CastKind::PreserveI8, expr, target.clone())),
            TypeKind::UShort => Ok(Expr::cast(CastKind::Nop, expr, target.clone())),
            TypeKind::Long | TypeKind::ULong => Ok(Expr::cast(CastKind::I16ToI32, expr, target.clone())),
            TypeKind::Float => {
                let wide = Expr::cast(CastKind::I16ToI32, expr, long_like(target));
                Ok(Expr::cast(CastKind::I32ToFloat, wide, target.clone()))
            }
            TypeKind::Double => {
                let wide = Expr::cast(CastKind::I16ToI32, expr, long_like(target));
                Ok(Expr::cast(CastKind::I32ToDouble, wide, target.clone()))
            }
            _ => Err(cannot(&TypeKind::Short, to)),
        },
        TypeKind::Long => {
            let value = match expr.kind {
                ExprKind::ConstLong(v) => Some(v),
                _ => None,
            };
            match (to, value) {
                (TypeKind::Char, Some(v)) => Ok(Expr::const_long(v as i8 as i32)),
                (TypeKind::Char, None) => Ok(Expr::cast(CastKind::PreserveI8, expr, target.clone())),
                (TypeKind::UChar, Some(v)) => Ok(Expr::const_ulong(v as u8 as u32)),
                (TypeKind::UChar, None) => Ok(Expr::cast(CastKind::PreserveI8, expr, target.clone())),
                (TypeKind::Short, Some(v)) => Ok(Expr::const_long(v as i16 as i32)),
                (TypeKind::Short, None) => Ok(Expr::cast(CastKind::PreserveI16, expr, target.clone())),
                (TypeKind::UShort, Some(v)) => Ok(Expr::const_ulong(v as u16 as u32)),
                (TypeKind::UShort, None) => Ok(Expr::cast(CastKind::PreserveI16, expr, target.clone())),
                (TypeKind::ULong, Some(v)) => Ok(Expr::const_ulong(v as u32)),
                (TypeKind::ULong, None) => Ok(Expr::cast(CastKind::Nop, expr, target.clone())),
                (TypeKind::Float, Some(v)) => Ok(Expr::const_float(v as f32)),
                (TypeKind::Float, None) => Ok(Expr::cast(CastKind::I32ToFloat, expr, target.clone())),
                (TypeKind::Double, Some(v)) => Ok(Expr::const_double(v as f64)),
                (TypeKind::Double, None) => Ok(Expr::cast(CastKind::I32ToDouble, expr, target.clone())),
                _ => Err(cannot(&TypeKind::Long, to)),
            }
        }
        _ => unreachable!("signed_integral_to_arith on a non-signed-integral source"),
    }
}

/// Casts out of uchar, ushort, ulong. Symmetric to the signed case, with
/// zero-extension. A ulong heading to float/double is treated as the
/// 32-bit signed word — the extra-precision unsigned conversion is not
/// implemented.
fn unsigned_integral_to_arith(expr: Expr, target: &QualType) -> Result<Expr> {
    let to = &target.kind;
    match expr.ty.kind {
        TypeKind::UChar => match to {
            TypeKind::Char => Ok(Expr::cast(CastKind::Nop, expr, target.clone())),
            TypeKind::Short | TypeKind::UShort => Ok(Expr::cast(CastKind::U8ToU16, expr, target.clone())),
            TypeKind::Long | TypeKind::ULong => Ok(Expr::cast(CastKind::U8ToU32, expr, target.clone())),
            TypeKind::Float => {
                let wide = Expr::cast(CastKind::U8ToU32, expr, long_like(target));
                Ok(Expr::cast(CastKind::I32ToFloat, wide, target.clone()))
            }
            TypeKind::Double => {
                let wide = Expr::cast(CastKind::U8ToU32, expr, long_like(target));
                Ok(Expr::cast(CastKind::I32ToDouble, wide, target.clone()))
            }
            _ => Err(cannot(&TypeKind::UChar, to)),
        },
        TypeKind::UShort => match to {
            TypeKind::Char | TypeKind::UChar => Ok(Expr::cast(CastKind::PreserveI8, expr, target.clone())),
            TypeKind::Short => Ok(Expr::cast(CastKind::Nop, expr, target.clone())),
            TypeKind::Long | TypeKind::ULong => Ok(Expr::cast(CastKind::U16ToU32, expr, target.clone())),
            TypeKind::Float => {
                let wide = Expr::cast(CastKind::U16ToU32, expr, long_like(target));
                Ok(Expr::cast(CastKind::I32ToFloat, wide, target.clone()))
            }
            TypeKind::Double => {
                let wide = Expr::cast(CastKind::U16ToU32, expr, long_like(target));
                Ok(Expr::cast(CastKind::I32ToDouble, wide, target.clone()))
            }
            _ => Err(cannot(&TypeKind::UShort, to)),
        },
        TypeKind::ULong => {
            let value = match expr.kind {
                ExprKind::ConstULong(v) => Some(v),
                _ => None,
            };
            match (to, value) {
                (TypeKind::Char, Some(v)) => Ok(Expr::const_long(v as i8 as i32)),
                (TypeKind::Char, None) => Ok(Expr::cast(CastKind::PreserveI8, expr, target.clone())),
                (TypeKind::UChar, Some(v)) => Ok(Expr::const_ulong(v as u8 as u32)),
                (TypeKind::UChar, None) => Ok(Expr::cast(CastKind::PreserveI8, expr, target.clone())),
                (TypeKind::Short, Some(v)) => Ok(Expr::const_long(v as i16 as i32)),
                (TypeKind::Short, None) => Ok(Expr::cast(CastKind::PreserveI16, expr, target.clone())),
                (TypeKind::UShort, Some(v)) => Ok(Expr::const_ulong(v as u16 as u32)),
                (TypeKind::UShort, None) => Ok(Expr::cast(CastKind::PreserveI16, expr, target.clone())),
                (TypeKind::Long, Some(v)) => Ok(Expr::const_long(v as i32)),
                (TypeKind::Long, None) => Ok(Expr::cast(CastKind::Nop, expr, target.clone())),
                (TypeKind::Float, Some(v)) => Ok(Expr::const_float(v as f32)),
                (TypeKind::Float, None) => Ok(Expr::cast(CastKind::I32ToFloat, expr, target.clone())),
                (TypeKind::Double, Some(v)) => Ok(Expr::const_double(v as f64)),
                (TypeKind::Double, None) => Ok(Expr::cast(CastKind::I32ToDouble, expr, target.clone())),
                _ => Err(cannot(&TypeKind::ULong, to)),
            }
        }
        _ => unreachable!("unsigned_integral_to_arith on a non-unsigned-integral source"),
    }
}

/// Casts out of float and double. Narrowing to an integral goes through
/// hardware truncation into the 32-bit word; `double` to `char`/`short`
/// takes a detour through `float` first, reproducing the reference
/// behavior (see DESIGN.md).
fn float_to_arith(expr: Expr, target: &QualType) -> Result<Expr> {
    let to = &target.kind;
    match expr.ty.kind {
        TypeKind::Float => {
            let value = match expr.kind {
                ExprKind::ConstFloat(v) => Some(v),
                _ => None,
            };
            match (to, value) {
                (TypeKind::Char, Some(v)) => Ok(Expr::const_long(v as i8 as i32)),
                (TypeKind::Char, None) => {
                    let wide = Expr::cast(CastKind::FloatToI32, expr, long_like(target));
                    Ok(Expr::cast(CastKind::PreserveI8, wide, target.clone()))
                }
                (TypeKind::Short, Some(v)) => Ok(Expr::const_long(v as i16 as i32)),
                (TypeKind::Short, None) => {
                    let wide = Expr::cast(CastKind::FloatToI32, expr, long_like(target));
                    Ok(Expr::cast(CastKind::PreserveI16, wide, target.clone()))
                }
                (TypeKind::UShort, Some(v)) => Ok(Expr::const_ulong(v as u16 as u32)),
                (TypeKind::UShort, None) => {
                    let wide = Expr::cast(CastKind::FloatToI32, expr, long_like(target));
                    Ok(Expr::cast(CastKind::PreserveI16, wide, target.clone()))
                }
                (TypeKind::Long, Some(v)) => Ok(Expr::const_long(v as i32)),
                (TypeKind::Long, None) => Ok(Expr::cast(CastKind::FloatToI32, expr, target.clone())),
                (TypeKind::ULong, Some(v)) => Ok(Expr::const_ulong(v as u32)),
                (TypeKind::ULong, None) => Ok(Expr::cast(CastKind::FloatToI32, expr, target.clone())),
                (TypeKind::Double, Some(v)) => Ok(Expr::const_double(v as f64)),
                (TypeKind::Double, None) => Ok(Expr::cast(CastKind::FloatToDouble, expr, target.clone())),
                _ => Err(cannot(&TypeKind::Float, to)),
            }
        }
        TypeKind::Double => {
            let value = match expr.kind {
                ExprKind::ConstDouble(v) => Some(v),
                _ => None,
            };
            match (to, value) {
                (TypeKind::Char, Some(v)) => Ok(Expr::const_long(v as i8 as i32)),
                (TypeKind::Char, None) => {
                    // double -> float -> char
                    let narrowed = float_to_arith(
                        expr,
                        &QualType::qualified(TypeKind::Float, target.is_const, target.is_volatile),
                    )?;
                    float_to_arith(narrowed, target)
                }
                (TypeKind::Short, Some(v)) => Ok(Expr::const_long(v as i16 as i32)),
                (TypeKind::Short, None) => {
                    // double -> float -> short
                    let narrowed = float_to_arith(
                        expr,
                        &QualType::qualified(TypeKind::Float, target.is_const, target.is_volatile),
                    )?;
                    float_to_arith(narrowed, target)
                }
                (TypeKind::UShort, Some(v)) => Ok(Expr::const_ulong(v as u16 as u32)),
                (TypeKind::UShort, None) => {
                    let wide = Expr::cast(CastKind::DoubleToI32, expr, long_like(target));
                    Ok(Expr::cast(CastKind::PreserveI16, wide, target.clone()))
                }
                (TypeKind::Long, Some(v)) => Ok(Expr::const_long(v as i32)),
                (TypeKind::Long, None) => Ok(Expr::cast(CastKind::DoubleToI32, expr, target.clone())),
                (TypeKind::ULong, Some(v)) => Ok(Expr::const_ulong(v as u32)),
                (TypeKind::ULong, None) => Ok(Expr::cast(CastKind::DoubleToI32, expr, target.clone())),
                (TypeKind::Float, Some(v)) => Ok(Expr::const_float(v as f32)),
                (TypeKind::Float, None) => Ok(Expr::cast(CastKind::DoubleToFloat, expr, target.clone())),
                _ => Err(cannot(&TypeKind::Double, to)),
            }
        }
        _ => unreachable!("float_to_arith on a non-floating source"),
    }
}

/// Casts out of a pointer: to another pointer it is a reinterpretation; to
/// an integral it first becomes the unsigned 32-bit word.
fn from_pointer(expr: Expr, target: &QualType) -> Result<Expr> {
    assert!(expr.ty.is_pointer(), "from_pointer on a non-pointer");

    if target.is_pointer() {
        if let ExprKind::ConstPtr(v) = expr.kind {
            return Ok(Expr::const_ptr(v, target.clone()));
        }
        return Ok(Expr::cast(CastKind::Nop, expr, target.clone()));
    }

    if target.is_integral() {
        let ulong = QualType::qualified(TypeKind::ULong, target.is_const, target.is_volatile);
        let word = if let ExprKind::ConstPtr(v) = expr.kind {
            Expr::const_ulong(v)
        } else {
            Expr::cast(CastKind::Nop, expr, ulong)
        };
        return make_cast(word, target);
    }

    bail!("cannot cast a pointer to {:?}", target.kind);
}

/// Casts into a pointer: from another pointer, an integral (widened to the
/// word per its signedness), a compatible function designator, or an
/// array.
fn to_pointer(expr: Expr, target: &QualType) -> Result<Expr> {
    assert!(target.is_pointer(), "to_pointer to a non-pointer");

    if expr.ty.is_pointer() {
        if let ExprKind::ConstPtr(v) = expr.kind {
            return Ok(Expr::const_ptr(v, target.clone()));
        }
        return Ok(Expr::cast(CastKind::Nop, expr, target.clone()));
    }

    if expr.ty.is_integral() {
        let ulong = QualType::qualified(TypeKind::ULong, target.is_const, target.is_volatile);
        let word = if expr.ty.is_signed_integral() {
            signed_integral_to_arith(expr, &ulong)?
        } else if !expr.ty.same_type(&ulong) {
            unsigned_integral_to_arith(expr, &ulong)?
        } else {
            expr
        };
        if let ExprKind::ConstULong(v) = word.kind {
            return Ok(Expr::const_ptr(v, target.clone()));
        }
        return Ok(Expr::cast(CastKind::Nop, word, target.clone()));
    }

    if expr.ty.is_function() {
        let TypeKind::Pointer(referent) = &target.kind else { unreachable!() };
        if !expr.ty.same_type(referent) {
            bail!("casting an incompatible function to a pointer");
        }
        return Ok(Expr::cast(CastKind::Nop, expr, target.clone()));
    }

    if matches!(expr.ty.kind, TypeKind::Array(_, _) | TypeKind::IncompleteArray(_)) {
        return Ok(Expr::cast(CastKind::Nop, expr, target.clone()));
    }

    bail!("cannot cast {:?} to a pointer", expr.ty.kind);
}

/// C's usual arithmetic conversion, by the total order
/// double > float > ulong > long: both operands are converted to the first
/// kind in that order that either of them has.
pub fn usual_arithmetic_conversion(e1: Expr, e2: Expr) -> Result<(Expr, Expr)> {
    let (c1, v1) = (e1.ty.is_const, e1.ty.is_volatile);
    let (c2, v2) = (e2.ty.is_const, e2.ty.is_volatile);
    let common = if matches!(e1.ty.kind, TypeKind::Double) || matches!(e2.ty.kind, TypeKind::Double)
    {
        TypeKind::Double
    } else if matches!(e1.ty.kind, TypeKind::Float) || matches!(e2.ty.kind, TypeKind::Float) {
        TypeKind::Float
    } else if matches!(e1.ty.kind, TypeKind::ULong) || matches!(e2.ty.kind, TypeKind::ULong) {
        TypeKind::ULong
    } else {
        TypeKind::Long
    };
    let t1 = QualType::qualified(common.clone(), c1, v1);
    let t2 = QualType::qualified(common, c2, v2);
    Ok((make_cast(e1, &t1)?, make_cast(e2, &t2)?))
}

/// Like the usual arithmetic conversion, but pointer operands are first
/// reduced to the unsigned 32-bit word.
pub fn usual_scalar_conversion(e1: Expr, e2: Expr) -> Result<(Expr, Expr)> {
    let e1 = if e1.ty.is_pointer() {
        let ulong = QualType::qualified(TypeKind::ULong, e1.ty.is_const, e1.ty.is_volatile);
        from_pointer(e1, &ulong)?
    } else {
        e1
    };
    let e2 = if e2.ty.is_pointer() {
        let ulong = QualType::qualified(TypeKind::ULong, e2.ty.is_const, e2.ty.is_volatile);
        from_pointer(e2, &ulong)?
    } else {
        e2
    };
    usual_arithmetic_conversion(e1, e2)
}

/// Integral promotion: signed types widen to the signed 32-bit word,
/// unsigned types to the unsigned one.
pub fn integral_promotion(expr: Expr) -> Result<Expr> {
    if !expr.ty.is_integral() {
        panic!("integral promotion on a non-integral expression");
    }
    let target = if expr.ty.is_signed_integral() {
        QualType::qualified(TypeKind::Long, expr.ty.is_const, expr.ty.is_volatile)
    } else {
        QualType::qualified(TypeKind::ULong, expr.ty.is_const, expr.ty.is_volatile)
    };
    make_cast(expr, &target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(kind: TypeKind) -> QualType {
        QualType::new(kind)
    }

    #[test]
    fn identity_cast_is_a_no_op() {
        let e = Expr::const_long(5);
        let cast = make_cast(e, &ty(TypeKind::Long)).unwrap();
        assert!(matches!(cast.kind, ExprKind::ConstLong(5)));
        // qualifiers do not break the short circuit
        let e = Expr::const_long(5);
        let cast = make_cast(e, &ty(TypeKind::Long).with_qualifiers(true, false)).unwrap();
        assert!(matches!(cast.kind, ExprKind::ConstLong(5)));
    }

    #[test]
    fn cast_is_idempotent() {
        let target = ty(TypeKind::Char);
        let once = make_cast(Expr::const_long(300), &target).unwrap();
        let twice = make_cast(once.clone(), &target).unwrap();
        match (&once.kind, &twice.kind) {
            (ExprKind::ConstLong(a), ExprKind::ConstLong(b)) => assert_eq!(a, b),
            _ => unreachable!(),
        }
    }

    #[test]
    fn constant_truncation_wraps() {
        let e = make_cast(Expr::const_long(300), &ty(TypeKind::Char)).unwrap();
        assert!(matches!(e.kind, ExprKind::ConstLong(44)));
        let e = make_cast(Expr::const_long(-1), &ty(TypeKind::UChar)).unwrap();
        assert!(matches!(e.kind, ExprKind::ConstULong(255)));
        let e = make_cast(Expr::const_long(-1), &ty(TypeKind::ULong)).unwrap();
        assert!(matches!(e.kind, ExprKind::ConstULong(u32::MAX)));
    }

    #[test]
    fn widening_from_char_sign_extends() {
        let c = Expr::cast(CastKind::Nop, Expr::const_long(0), ty(TypeKind::Char));
        let widened = make_cast(c, &ty(TypeKind::Long)).unwrap();
        assert!(matches!(widened.kind, ExprKind::Cast(CastKind::I8ToI32, _)));
    }

    #[test]
    fn char_to_float_goes_through_the_word() {
        let c = Expr::cast(CastKind::Nop, Expr::const_long(0), ty(TypeKind::Char));
        let f = make_cast(c, &ty(TypeKind::Float)).unwrap();
        match f.kind {
            ExprKind::Cast(CastKind::I32ToFloat, inner) => {
                assert!(matches!(inner.kind, ExprKind::Cast(CastKind::I8ToI32, _)));
            }
            _ => unreachable!("expected I32ToFloat chain"),
        }
    }

    #[test]
    fn double_to_char_detours_through_float() {
        let d = Expr::cast(CastKind::Nop, Expr::const_long(0), ty(TypeKind::Double));
        let c = make_cast(d, &ty(TypeKind::Char)).unwrap();
        // outermost: PreserveI8; inside: FloatToI32; inside: DoubleToFloat
        let ExprKind::Cast(CastKind::PreserveI8, inner) = c.kind else {
            unreachable!("expected PreserveI8 on the outside");
        };
        let ExprKind::Cast(CastKind::FloatToI32, inner) = inner.kind else {
            unreachable!("expected FloatToI32 in the middle");
        };
        assert!(matches!(inner.kind, ExprKind::Cast(CastKind::DoubleToFloat, _)));
    }

    #[test]
    fn float_constant_to_integral_truncates() {
        let e = make_cast(Expr::const_float(3.9), &ty(TypeKind::Long)).unwrap();
        assert!(matches!(e.kind, ExprKind::ConstLong(3)));
        let e = make_cast(Expr::const_double(-2.5), &ty(TypeKind::Long)).unwrap();
        assert!(matches!(e.kind, ExprKind::ConstLong(-2)));
    }

    #[test]
    fn pointer_to_integral_and_back() {
        let ptr_ty = QualType::pointer_to(ty(TypeKind::Long));
        let p = Expr::const_ptr(0x1000, ptr_ty.clone());
        let n = make_cast(p, &ty(TypeKind::ULong)).unwrap();
        assert!(matches!(n.kind, ExprKind::ConstULong(0x1000)));
        let back = make_cast(n, &ptr_ty).unwrap();
        assert!(matches!(back.kind, ExprKind::ConstPtr(0x1000)));
    }

    #[test]
    fn pointer_to_char_truncates_through_the_word() {
        let ptr_ty = QualType::pointer_to(ty(TypeKind::Long));
        let p = Expr::const_ptr(0x1234, ptr_ty);
        let c = make_cast(p, &ty(TypeKind::Char)).unwrap();
        assert!(matches!(c.kind, ExprKind::ConstLong(0x34)));
    }

    #[test]
    fn uac_prefers_double_then_float_then_unsigned() {
        let (a, b) =
            usual_arithmetic_conversion(Expr::const_float(1.0), Expr::const_double(2.0)).unwrap();
        assert!(matches!(a.ty.kind, TypeKind::Double));
        assert!(matches!(b.ty.kind, TypeKind::Double));

        let (a, b) =
            usual_arithmetic_conversion(Expr::const_long(1), Expr::const_ulong(2)).unwrap();
        assert!(matches!(a.ty.kind, TypeKind::ULong));
        assert!(matches!(b.ty.kind, TypeKind::ULong));

        let (a, b) = usual_arithmetic_conversion(Expr::const_long(1), Expr::const_long(2)).unwrap();
        assert!(matches!(a.ty.kind, TypeKind::Long));
        assert!(matches!(b.ty.kind, TypeKind::Long));
    }

    #[test]
    fn scalar_conversion_reduces_pointers() {
        let p = Expr::const_ptr(4, QualType::pointer_to(ty(TypeKind::Long)));
        let (a, _) = usual_scalar_conversion(p, Expr::const_ulong(1)).unwrap();
        assert!(matches!(a.ty.kind, TypeKind::ULong));
        assert!(matches!(a.kind, ExprKind::ConstULong(4)));
    }

    #[test]
    fn integral_promotion_widens_by_signedness() {
        let c = Expr::cast(CastKind::Nop, Expr::const_long(0), ty(TypeKind::Char));
        assert!(matches!(integral_promotion(c).unwrap().ty.kind, TypeKind::Long));
        let u = Expr::cast(CastKind::Nop, Expr::const_long(0), ty(TypeKind::UShort));
        assert!(matches!(integral_promotion(u).unwrap().ty.kind, TypeKind::ULong));
    }

    #[test]
    fn float_to_uchar_is_rejected() {
        let f = Expr::cast(CastKind::Nop, Expr::const_long(0), ty(TypeKind::Float));
        assert!(make_cast(f, &ty(TypeKind::UChar)).is_err());
    }
}
