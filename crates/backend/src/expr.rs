use sema::env::{Env, SymbolKind};
use sema::expr::{BinaryOp, Expr, ExprKind};
use sema::CastKind;
use types::{pack_arguments, QualType, RecordTable, TypeKind};

use crate::state::{imm, mem, Emitter, Reg};

/// Emit code that computes `expr`, returning where the value now lives:
/// `Reg::Eax` for integrals, pointers and aggregate addresses, `Reg::St0`
/// for float/double. Callers must not assume any other register survives a
/// nested emission. Violated protocol expectations panic — the tree was
/// checked when it was built, so they are compiler defects.
pub fn cgen_value(expr: &Expr, env: &Env, records: &RecordTable, state: &mut Emitter) -> Reg {
    match &expr.kind {
        ExprKind::ConstLong(v) => {
            state.movl(&imm(*v), Reg::Eax.name());
            Reg::Eax
        }
        ExprKind::ConstULong(v) => {
            state.movl(&imm(*v as i32), Reg::Eax.name());
            Reg::Eax
        }
        ExprKind::ConstPtr(v) => {
            state.movl(&imm(*v as i32), Reg::Eax.name());
            Reg::Eax
        }
        ExprKind::ConstFloat(v) => {
            let name = state.long_const(v.to_bits() as i32);
            state.flds(&name);
            Reg::St0
        }
        ExprKind::ConstDouble(v) => {
            let bits = v.to_bits();
            let name = state.quad_const(bits as u32 as i32, (bits >> 32) as u32 as i32);
            state.fldl(&name);
            Reg::St0
        }
        ExprKind::ConstString(text) => {
            let name = state.string_const(text);
            state.lea(&name, Reg::Eax.name());
            Reg::Eax
        }
        ExprKind::Variable(name) => cgen_variable_value(name, &expr.ty, env, records, state),
        ExprKind::Assign { left, right } => cgen_assign(left, right, env, records, state),
        ExprKind::AssignList(exprs) => {
            let mut ret = Reg::Eax;
            for item in exprs {
                ret = cgen_value(item, env, records, state);
            }
            ret
        }
        ExprKind::Conditional { cond, then_expr, else_expr } => {
            cgen_conditional(cond, then_expr, else_expr, env, records, state)
        }
        ExprKind::Call { func, args } => cgen_call(expr, func, args, env, records, state),
        ExprKind::Member { base, name } => cgen_member_value(expr, base, name, env, records, state),
        ExprKind::AddrOf(inner) => {
            cgen_address(inner, env, records, state);
            Reg::Eax
        }
        ExprKind::Deref(inner) => cgen_deref_value(inner, env, records, state),
        ExprKind::Cast(kind, inner) => cgen_cast(*kind, inner, env, records, state),
        ExprKind::Binary { op, left, right } => cgen_binary(expr, *op, left, right, env, records, state),
        ExprKind::Negate(inner) => match cgen_value(inner, env, records, state) {
            Reg::Eax => {
                state.negl(Reg::Eax.name());
                Reg::Eax
            }
            Reg::St0 => {
                state.fchs();
                Reg::St0
            }
            _ => panic!("negation operand in an unexpected location"),
        },
        ExprKind::BitNot(inner) => {
            let ret = cgen_value(inner, env, records, state);
            assert_eq!(ret, Reg::Eax, "bitwise complement operand must be integral");
            state.notl(Reg::Eax.name());
            Reg::Eax
        }
        ExprKind::LogicalNot(inner) => {
            match cgen_value(inner, env, records, state) {
                Reg::Eax => {
                    state.testl(Reg::Eax.name(), Reg::Eax.name());
                }
                Reg::St0 => {
                    // compare against 0.0, clearing the FPU stack
                    state.fldz();
                    state.fucomip();
                    state.fstp(Reg::St0.name());
                }
                _ => panic!("logical not operand in an unexpected location"),
            }
            state.set("e", Reg::Al.name());
            state.movzbl(Reg::Al.name(), Reg::Eax.name());
            Reg::Eax
        }
        ExprKind::PreInc(inner) => cgen_inc_dec(inner, env, records, state, true, true),
        ExprKind::PreDec(inner) => cgen_inc_dec(inner, env, records, state, true, false),
        ExprKind::PostInc(inner) => cgen_inc_dec(inner, env, records, state, false, true),
        ExprKind::PostDec(inner) => cgen_inc_dec(inner, env, records, state, false, false),
    }
}

/// Emit code that computes the address of an lvalue into %eax. Calling
/// this on a non-lvalue node is a contract violation.
pub fn cgen_address(expr: &Expr, env: &Env, records: &RecordTable, state: &mut Emitter) {
    match &expr.kind {
        ExprKind::Variable(name) => {
            let entry = env
                .lookup(name)
                .unwrap_or_else(|| panic!("unbound variable '{name}' during code generation"));
            match entry.kind {
                SymbolKind::StackLocal | SymbolKind::FrameParam => {
                    state.lea(&mem(entry.offset, Reg::Ebp), Reg::Eax.name());
                }
                SymbolKind::Global => {
                    state.lea(name, Reg::Eax.name());
                }
                SymbolKind::EnumConst | SymbolKind::Typedef => {
                    panic!("cannot take the address of {:?}", entry.kind)
                }
            }
        }
        ExprKind::Deref(inner) => {
            let ret = cgen_value(inner, env, records, state);
            assert_eq!(ret, Reg::Eax, "pointer value must be in %eax");
        }
        ExprKind::Member { base, name } => {
            assert!(base.ty.is_record(), "member access on a non-record value");
            cgen_address(base, env, records, state);
            let offset = member_offset(&base.ty, name, records);
            state.addl(&imm(offset), Reg::Eax.name());
        }
        _ => panic!("cannot take the address of this expression"),
    }
}

fn member_offset(base_ty: &QualType, name: &str, records: &RecordTable) -> i32 {
    let TypeKind::Record(id) = base_ty.kind else {
        panic!("member access on a non-record type");
    };
    records
        .member(id, name)
        .expect("member resolved during semantic analysis")
        .offset as i32
}

fn size_of(ty: &QualType, records: &RecordTable) -> i32 {
    ty.size_of(records).expect("complete type during code generation") as i32
}

fn cgen_variable_value(
    name: &str,
    ty: &QualType,
    env: &Env,
    records: &RecordTable,
    state: &mut Emitter,
) -> Reg {
    let entry = env
        .lookup(name)
        .unwrap_or_else(|| panic!("unbound variable '{name}' during code generation"));
    match entry.kind {
        SymbolKind::EnumConst => {
            state.movl(&imm(entry.offset), Reg::Eax.name());
            Reg::Eax
        }
        SymbolKind::StackLocal | SymbolKind::FrameParam => {
            let offset = entry.offset;
            match ty.kind {
                TypeKind::Long | TypeKind::ULong | TypeKind::Pointer(_) => {
                    state.movl(&mem(offset, Reg::Ebp), Reg::Eax.name());
                    Reg::Eax
                }
                TypeKind::Char => {
                    state.movsbl(&mem(offset, Reg::Ebp), Reg::Eax.name());
                    Reg::Eax
                }
                TypeKind::UChar => {
                    state.movzbl(&mem(offset, Reg::Ebp), Reg::Eax.name());
                    Reg::Eax
                }
                TypeKind::Short => {
                    state.movswl(&mem(offset, Reg::Ebp), Reg::Eax.name());
                    Reg::Eax
                }
                TypeKind::UShort => {
                    state.movzwl(&mem(offset, Reg::Ebp), Reg::Eax.name());
                    Reg::Eax
                }
                TypeKind::Float => {
                    state.flds(&mem(offset, Reg::Ebp));
                    Reg::St0
                }
                TypeKind::Double => {
                    state.fldl(&mem(offset, Reg::Ebp));
                    Reg::St0
                }
                // aggregates are handled by address
                TypeKind::Record(_) | TypeKind::Array(_, _) => {
                    state.lea(&mem(offset, Reg::Ebp), Reg::Eax.name());
                    Reg::Eax
                }
                TypeKind::Void | TypeKind::Function(_) | TypeKind::IncompleteArray(_) => {
                    panic!("cannot load a value of {:?}", ty.kind)
                }
            }
        }
        SymbolKind::Global => {
            match ty.kind {
                TypeKind::Long | TypeKind::ULong | TypeKind::Pointer(_) => {
                    state.movl(name, Reg::Eax.name());
                    Reg::Eax
                }
                TypeKind::Char => {
                    state.movsbl(name, Reg::Eax.name());
                    Reg::Eax
                }
                TypeKind::UChar => {
                    state.movzbl(name, Reg::Eax.name());
                    Reg::Eax
                }
                TypeKind::Short => {
                    state.movswl(name, Reg::Eax.name());
                    Reg::Eax
                }
                TypeKind::UShort => {
                    state.movzwl(name, Reg::Eax.name());
                    Reg::Eax
                }
                TypeKind::Float => {
                    state.flds(name);
                    Reg::St0
                }
                TypeKind::Double => {
                    state.fldl(name);
                    Reg::St0
                }
                // the symbol itself is the address
                TypeKind::Function(_) | TypeKind::Record(_) | TypeKind::Array(_, _) => {
                    state.movl(&format!("${name}"), Reg::Eax.name());
                    Reg::Eax
                }
                TypeKind::Void | TypeKind::IncompleteArray(_) => {
                    panic!("cannot load a value of {:?}", ty.kind)
                }
            }
        }
        SymbolKind::Typedef => panic!("cannot load the value of a typedef"),
    }
}

/// Assignment: compute and spill the destination address, evaluate the
/// right-hand side, reload the address and store with the width of the
/// destination type.
fn cgen_assign(
    left: &Expr,
    right: &Expr,
    env: &Env,
    records: &RecordTable,
    state: &mut Emitter,
) -> Reg {
    cgen_address(left, env, records, state);
    let saved = state.push_word(Reg::Eax);
    let ret = cgen_value(right, env, records, state);

    match left.ty.kind {
        TypeKind::Char | TypeKind::UChar => {
            assert_eq!(ret, Reg::Eax);
            state.pop_word(saved, Reg::Ebx);
            state.movb(Reg::Al.name(), &mem(0, Reg::Ebx));
            Reg::Eax
        }
        TypeKind::Short | TypeKind::UShort => {
            assert_eq!(ret, Reg::Eax);
            state.pop_word(saved, Reg::Ebx);
            state.movw(Reg::Ax.name(), &mem(0, Reg::Ebx));
            Reg::Eax
        }
        TypeKind::Long | TypeKind::ULong | TypeKind::Pointer(_) => {
            assert_eq!(ret, Reg::Eax);
            state.pop_word(saved, Reg::Ebx);
            state.movl(Reg::Eax.name(), &mem(0, Reg::Ebx));
            Reg::Eax
        }
        TypeKind::Float => {
            assert_eq!(ret, Reg::St0);
            state.pop_word(saved, Reg::Ebx);
            state.fsts(&mem(0, Reg::Ebx));
            Reg::St0
        }
        TypeKind::Double => {
            assert_eq!(ret, Reg::St0);
            state.pop_word(saved, Reg::Ebx);
            state.fstl(&mem(0, Reg::Ebx));
            Reg::St0
        }
        TypeKind::Record(_) => {
            assert_eq!(ret, Reg::Eax);
            state.pop_word(saved, Reg::Edi);
            state.movl(Reg::Eax.name(), Reg::Esi.name());
            state.movl(&imm(size_of(&left.ty, records)), Reg::Ecx.name());
            state.memcpy();
            state.movl(Reg::Edi.name(), Reg::Eax.name());
            Reg::Eax
        }
        _ => panic!("cannot assign to a value of {:?}", left.ty.kind),
    }
}

//          test cond
//          jz false ---+
//          then        |
// +------- jmp finish  |
// |    false: <--------+
// |        else
// +--> finish:
fn cgen_conditional(
    cond: &Expr,
    then_expr: &Expr,
    else_expr: &Expr,
    env: &Env,
    records: &RecordTable,
    state: &mut Emitter,
) -> Reg {
    let saved = state.stack_size();
    let ret = cgen_value(cond, env, records, state);
    state.force_stack_size_to(saved);
    cgen_test(ret, state);

    let false_label = state.request_label();
    let finish_label = state.request_label();

    state.jz(false_label);
    cgen_value(then_expr, env, records, state);
    state.jmp(finish_label);
    state.label(false_label);
    let ret = cgen_value(else_expr, env, records, state);
    state.label(finish_label);
    ret
}

/// Test the value at `ret` against zero, setting ZF. Clears the FPU stack
/// for floating values.
pub fn cgen_test(ret: Reg, state: &mut Emitter) {
    match ret {
        Reg::Eax => {
            state.testl(Reg::Eax.name(), Reg::Eax.name());
        }
        Reg::St0 => {
            state.fldz();
            state.fucomip();
            state.fstp(Reg::St0.name());
        }
        _ => panic!("tested value in an unexpected location"),
    }
}

// The IA-32 calling convention used here: the caller reserves one block
// below the return address, sized by the callee's parameter layout, and
// writes each argument into its final slot, right to left. Scalar results
// come back in %eax or %st(0); record results are written through a
// hidden destination pointer passed as an extra leading argument.
fn cgen_call(
    call: &Expr,
    func: &Expr,
    args: &[Expr],
    env: &Env,
    records: &RecordTable,
    state: &mut Emitter,
) -> Reg {
    state.newline();
    state.comment(&format!("Before pushing the arguments, stack size = {}.", state.stack_size()));

    let arg_types: Vec<QualType> = args.iter().map(|arg| arg.ty.clone()).collect();
    let (mut pack_size, mut offsets) =
        pack_arguments(&arg_types, records).expect("argument types are complete");

    let returns_record = call.ty.is_record();
    if returns_record {
        // Reserve the destination the callee will copy the result into,
        // and keep its address for the hidden argument.
        state.comment("Allocate space for the returned value.");
        let size = size_of(&call.ty, records);
        let alignment = call.ty.alignment(records).expect("complete return type");
        state.expand_stack_with_alignment(size, alignment);
        state.movl(Reg::Esp.name(), Reg::Eax.name());

        pack_size += types::SIZEOF_POINTER;
        for offset in &mut offsets {
            *offset += types::SIZEOF_POINTER;
        }
    }

    state.comment(&format!("Arguments take {pack_size} bytes."));
    state.expand_stack_by(pack_size as i32);
    state.newline();

    if returns_record {
        state.comment("Store the hidden return destination.");
        state.movl(Reg::Eax.name(), &mem(0, Reg::Esp));
        state.newline();
    }

    // Frame offset of the bottom of the argument block.
    let header_base = -state.stack_size();

    for index in (0..args.len()).rev() {
        let arg = &args[index];
        let pos = header_base + offsets[index] as i32;
        state.comment(&format!("Argument {index} is at {pos}."));

        let ret = cgen_value(arg, env, records, state);
        match arg.ty.kind {
            TypeKind::Char
            | TypeKind::UChar
            | TypeKind::Short
            | TypeKind::UShort
            | TypeKind::Long
            | TypeKind::ULong
            | TypeKind::Pointer(_)
            | TypeKind::Array(_, _) => {
                assert_eq!(ret, Reg::Eax, "integral argument must be in %eax");
                state.movl(Reg::Eax.name(), &mem(pos, Reg::Ebp));
            }
            TypeKind::Float => {
                assert_eq!(ret, Reg::St0, "float argument must be on the FPU stack");
                state.fstps(&mem(pos, Reg::Ebp));
            }
            TypeKind::Double => {
                assert_eq!(ret, Reg::St0, "double argument must be on the FPU stack");
                state.fstpl(&mem(pos, Reg::Ebp));
            }
            TypeKind::Record(_) => {
                assert_eq!(ret, Reg::Eax, "record argument address must be in %eax");
                state.movl(Reg::Eax.name(), Reg::Esi.name());
                state.lea(&mem(pos, Reg::Ebp), Reg::Edi.name());
                state.movl(&imm(size_of(&arg.ty, records)), Reg::Ecx.name());
                state.memcpy();
            }
            _ => panic!("cannot pass an argument of {:?}", arg.ty.kind),
        }
        state.newline();
    }

    // Evaluating the arguments may have moved the stack; re-assert the
    // depth the call expects.
    state.force_stack_size_to(-header_base);

    match func.ty.kind {
        TypeKind::Function(_) => cgen_address(func, env, records, state),
        TypeKind::Pointer(_) => {
            let ret = cgen_value(func, env, records, state);
            assert_eq!(ret, Reg::Eax, "callee address must be in %eax");
        }
        _ => panic!("calling a value of {:?}", func.ty.kind),
    }
    state.call("*%eax");
    state.comment("Function returned.");
    state.newline();

    if matches!(call.ty.kind, TypeKind::Float | TypeKind::Double) {
        Reg::St0
    } else {
        Reg::Eax
    }
}

fn cgen_member_value(
    expr: &Expr,
    base: &Expr,
    name: &str,
    env: &Env,
    records: &RecordTable,
    state: &mut Emitter,
) -> Reg {
    // the value of a record expression is its address
    let ret = cgen_value(base, env, records, state);
    assert_eq!(ret, Reg::Eax, "record base address must be in %eax");
    assert!(base.ty.is_record(), "member access on a non-record value");

    let offset = member_offset(&base.ty, name, records);
    match expr.ty.kind {
        TypeKind::Record(_) | TypeKind::Array(_, _) => {
            state.addl(&imm(offset), Reg::Eax.name());
            Reg::Eax
        }
        TypeKind::Char => {
            state.movsbl(&mem(offset, Reg::Eax), Reg::Eax.name());
            Reg::Eax
        }
        TypeKind::UChar => {
            state.movzbl(&mem(offset, Reg::Eax), Reg::Eax.name());
            Reg::Eax
        }
        TypeKind::Short => {
            state.movswl(&mem(offset, Reg::Eax), Reg::Eax.name());
            Reg::Eax
        }
        TypeKind::UShort => {
            state.movzwl(&mem(offset, Reg::Eax), Reg::Eax.name());
            Reg::Eax
        }
        TypeKind::Long | TypeKind::ULong | TypeKind::Pointer(_) => {
            state.movl(&mem(offset, Reg::Eax), Reg::Eax.name());
            Reg::Eax
        }
        TypeKind::Float => {
            state.flds(&mem(offset, Reg::Eax));
            Reg::St0
        }
        TypeKind::Double => {
            state.fldl(&mem(offset, Reg::Eax));
            Reg::St0
        }
        _ => panic!("cannot load a member of {:?}", expr.ty.kind),
    }
}

fn cgen_deref_value(inner: &Expr, env: &Env, records: &RecordTable, state: &mut Emitter) -> Reg {
    let ret = cgen_value(inner, env, records, state);
    assert_eq!(ret, Reg::Eax, "pointer value must be in %eax");
    let TypeKind::Pointer(referent) = &inner.ty.kind else {
        panic!("dereferencing a non-pointer during code generation");
    };

    match referent.kind {
        // no load: the pointer already is the value's address
        TypeKind::Array(_, _) | TypeKind::Function(_) | TypeKind::Record(_) => Reg::Eax,
        TypeKind::Char => {
            state.movsbl(&mem(0, Reg::Eax), Reg::Eax.name());
            Reg::Eax
        }
        TypeKind::UChar => {
            state.movzbl(&mem(0, Reg::Eax), Reg::Eax.name());
            Reg::Eax
        }
        TypeKind::Short => {
            state.movswl(&mem(0, Reg::Eax), Reg::Eax.name());
            Reg::Eax
        }
        TypeKind::UShort => {
            state.movzwl(&mem(0, Reg::Eax), Reg::Eax.name());
            Reg::Eax
        }
        TypeKind::Long | TypeKind::ULong | TypeKind::Pointer(_) => {
            state.movl(&mem(0, Reg::Eax), Reg::Eax.name());
            Reg::Eax
        }
        TypeKind::Float => {
            state.flds(&mem(0, Reg::Eax));
            Reg::St0
        }
        TypeKind::Double => {
            state.fldl(&mem(0, Reg::Eax));
            Reg::St0
        }
        TypeKind::Void | TypeKind::IncompleteArray(_) => {
            panic!("dereferencing a pointer to {:?}", referent.kind)
        }
    }
}

fn cgen_cast(
    kind: CastKind,
    inner: &Expr,
    env: &Env,
    records: &RecordTable,
    state: &mut Emitter,
) -> Reg {
    let ret = cgen_value(inner, env, records, state);
    match kind {
        // reinterpretations and truncations-in-place
        CastKind::Nop
        | CastKind::PreserveI8
        | CastKind::PreserveI16
        | CastKind::FloatToDouble
        | CastKind::DoubleToFloat => ret,

        CastKind::FloatToI32 | CastKind::DoubleToI32 => {
            assert_eq!(ret, Reg::St0);
            state.convert_float_to_word();
            Reg::Eax
        }
        CastKind::I32ToFloat | CastKind::I32ToDouble => {
            assert_eq!(ret, Reg::Eax);
            state.convert_word_to_float();
            Reg::St0
        }
        CastKind::I16ToI32 => {
            state.movswl(Reg::Ax.name(), Reg::Eax.name());
            ret
        }
        CastKind::I8ToI16 | CastKind::I8ToI32 => {
            state.movsbl(Reg::Al.name(), Reg::Eax.name());
            ret
        }
        CastKind::U16ToU32 => {
            state.movzwl(Reg::Ax.name(), Reg::Eax.name());
            ret
        }
        CastKind::U8ToU16 | CastKind::U8ToU32 => {
            state.movzbl(Reg::Al.name(), Reg::Eax.name());
            ret
        }
    }
}

// %eax = left, %ebx = right, stack balanced: evaluate the left operand,
// spill it, evaluate the right operand, then reload.
fn prepare_integral_operands(
    left: &Expr,
    right: &Expr,
    env: &Env,
    records: &RecordTable,
    state: &mut Emitter,
) {
    let ret = cgen_value(left, env, records, state);
    assert_eq!(ret, Reg::Eax, "left operand must be in %eax");
    let saved = state.push_word(Reg::Eax);
    let ret = cgen_value(right, env, records, state);
    assert_eq!(ret, Reg::Eax, "right operand must be in %eax");
    state.movl(Reg::Eax.name(), Reg::Ebx.name());
    state.pop_word(saved, Reg::Eax);
}

// %st(0) = left, %st(1) = right, stack balanced. Operands are spilled to
// memory between evaluations because the FPU stack holds at most one live
// value at a time.
fn prepare_float_operands(
    left: &Expr,
    right: &Expr,
    is_double: bool,
    env: &Env,
    records: &RecordTable,
    state: &mut Emitter,
) {
    let ret = cgen_value(left, env, records, state);
    assert_eq!(ret, Reg::St0, "left operand must be on the FPU stack");
    let saved = if is_double { state.push_double() } else { state.push_float() };
    let ret = cgen_value(right, env, records, state);
    assert_eq!(ret, Reg::St0, "right operand must be on the FPU stack");
    if is_double {
        state.pop_double(saved);
    } else {
        state.pop_float(saved);
    }
}

fn signed_condition(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Eq => "e",
        BinaryOp::Ne => "ne",
        BinaryOp::Gt => "g",
        BinaryOp::Ge => "ge",
        BinaryOp::Lt => "l",
        BinaryOp::Le => "le",
        _ => unreachable!("not a comparison"),
    }
}

fn unsigned_condition(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Eq => "e",
        BinaryOp::Ne => "ne",
        BinaryOp::Gt => "a",
        BinaryOp::Ge => "nb",
        BinaryOp::Lt => "b",
        BinaryOp::Le => "na",
        _ => unreachable!("not a comparison"),
    }
}

fn emit_long_op(op: BinaryOp, state: &mut Emitter) {
    match op {
        BinaryOp::Add => state.addl(Reg::Ebx.name(), Reg::Eax.name()),
        BinaryOp::Sub => state.subl(Reg::Ebx.name(), Reg::Eax.name()),
        BinaryOp::Mul => state.imul(Reg::Ebx.name()),
        BinaryOp::Div => {
            state.cltd();
            state.idivl(Reg::Ebx.name());
        }
        BinaryOp::Mod => {
            state.cltd();
            state.idivl(Reg::Ebx.name());
            state.movl(Reg::Edx.name(), Reg::Eax.name());
        }
        BinaryOp::Xor => state.xorl(Reg::Ebx.name(), Reg::Eax.name()),
        BinaryOp::BitOr => state.orl(Reg::Ebx.name(), Reg::Eax.name()),
        BinaryOp::BitAnd => state.andl(Reg::Ebx.name(), Reg::Eax.name()),
        BinaryOp::Shl => {
            state.movl(Reg::Ebx.name(), Reg::Ecx.name());
            state.sall(Reg::Eax.name());
        }
        BinaryOp::Shr => {
            state.movl(Reg::Ebx.name(), Reg::Ecx.name());
            state.sarl(Reg::Eax.name());
        }
        _ => unreachable!("not an integral operator"),
    }
}

fn emit_ulong_op(op: BinaryOp, state: &mut Emitter) {
    match op {
        BinaryOp::Add => state.addl(Reg::Ebx.name(), Reg::Eax.name()),
        BinaryOp::Sub => state.subl(Reg::Ebx.name(), Reg::Eax.name()),
        BinaryOp::Mul => state.mul(Reg::Ebx.name()),
        BinaryOp::Div => {
            // unsigned divide: zero the high half of the dividend
            state.xorl(Reg::Edx.name(), Reg::Edx.name());
            state.divl(Reg::Ebx.name());
        }
        BinaryOp::Mod => {
            state.xorl(Reg::Edx.name(), Reg::Edx.name());
            state.divl(Reg::Ebx.name());
            state.movl(Reg::Edx.name(), Reg::Eax.name());
        }
        BinaryOp::Xor => state.xorl(Reg::Ebx.name(), Reg::Eax.name()),
        BinaryOp::BitOr => state.orl(Reg::Ebx.name(), Reg::Eax.name()),
        BinaryOp::BitAnd => state.andl(Reg::Ebx.name(), Reg::Eax.name()),
        BinaryOp::Shl => {
            state.movl(Reg::Ebx.name(), Reg::Ecx.name());
            state.sall(Reg::Eax.name());
        }
        BinaryOp::Shr => {
            state.movl(Reg::Ebx.name(), Reg::Ecx.name());
            state.shrl(Reg::Eax.name());
        }
        _ => unreachable!("not an integral operator"),
    }
}

fn emit_float_op(op: BinaryOp, state: &mut Emitter) {
    match op {
        BinaryOp::Add => state.faddp(),
        BinaryOp::Sub => state.fsubp(),
        BinaryOp::Mul => state.fmulp(),
        BinaryOp::Div => state.fdivp(),
        _ => unreachable!("not a floating operator"),
    }
}

fn cgen_binary(
    expr: &Expr,
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    env: &Env,
    records: &RecordTable,
    state: &mut Emitter,
) -> Reg {
    if op.is_logical() {
        return cgen_logical(op, left, right, env, records, state);
    }

    if op.is_comparison() {
        // dispatch on the (already unified) operand type
        return match left.ty.kind {
            TypeKind::Long => {
                prepare_integral_operands(left, right, env, records, state);
                state.cmpl(Reg::Ebx.name(), Reg::Eax.name());
                state.set(signed_condition(op), Reg::Al.name());
                state.movzbl(Reg::Al.name(), Reg::Eax.name());
                Reg::Eax
            }
            TypeKind::ULong => {
                prepare_integral_operands(left, right, env, records, state);
                state.cmpl(Reg::Ebx.name(), Reg::Eax.name());
                state.set(unsigned_condition(op), Reg::Al.name());
                state.movzbl(Reg::Al.name(), Reg::Eax.name());
                Reg::Eax
            }
            TypeKind::Float | TypeKind::Double => {
                let is_double = matches!(left.ty.kind, TypeKind::Double);
                prepare_float_operands(left, right, is_double, env, records, state);
                // compare %st(0) (left) against %st(1) (right), then
                // drop both
                state.fucomip();
                state.fstp(Reg::St0.name());
                state.set(unsigned_condition(op), Reg::Al.name());
                state.movzbl(Reg::Al.name(), Reg::Eax.name());
                Reg::Eax
            }
            _ => panic!("comparison operands of {:?}", left.ty.kind),
        };
    }

    match expr.ty.kind {
        TypeKind::Long => {
            prepare_integral_operands(left, right, env, records, state);
            emit_long_op(op, state);
            Reg::Eax
        }
        TypeKind::ULong => {
            prepare_integral_operands(left, right, env, records, state);
            emit_ulong_op(op, state);
            Reg::Eax
        }
        TypeKind::Float => {
            prepare_float_operands(left, right, false, env, records, state);
            emit_float_op(op, state);
            Reg::St0
        }
        TypeKind::Double => {
            prepare_float_operands(left, right, true, env, records, state);
            emit_float_op(op, state);
            Reg::St0
        }
        _ => panic!("binary operands of {:?}", expr.ty.kind),
    }
}

// Single-pass short circuit: both operands share one reset/set label and
// one finish label, so every control path contains exactly one
// unconditional jump. This shape keeps the tracked stack depth identical
// on all paths.
fn cgen_logical(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    env: &Env,
    records: &RecordTable,
    state: &mut Emitter,
) -> Reg {
    let shortcut_label = state.request_label();
    let finish_label = state.request_label();
    let is_and = matches!(op, BinaryOp::LogicalAnd);

    for operand in [left, right] {
        let ret = cgen_value(operand, env, records, state);
        cgen_test(ret, state);
        if is_and {
            state.jz(shortcut_label);
        } else {
            state.jnz(shortcut_label);
        }
    }

    state.movl(&imm(if is_and { 1 } else { 0 }), Reg::Eax.name());
    state.jmp(finish_label);
    state.label(shortcut_label);
    state.movl(&imm(if is_and { 0 } else { 1 }), Reg::Eax.name());
    state.label(finish_label);
    Reg::Eax
}

// Increment/decrement: compute the address, spill it, load the current
// value, then write the adjusted value back through the reloaded address.
// The returned register carries the old (postfix) or new (prefix) value.
fn cgen_inc_dec(
    inner: &Expr,
    env: &Env,
    records: &RecordTable,
    state: &mut Emitter,
    prefix: bool,
    increment: bool,
) -> Reg {
    cgen_address(inner, env, records, state);
    let saved = state.push_word(Reg::Eax);
    let ret = cgen_value(inner, env, records, state);

    match ret {
        Reg::Eax => {
            state.pop_word(saved, Reg::Ecx);
            state.movl(Reg::Eax.name(), Reg::Ebx.name());

            let delta = match &inner.ty.kind {
                TypeKind::Pointer(referent) => size_of(referent, records),
                _ => 1,
            };
            // prefix adjusts the returned %eax; postfix adjusts the copy
            let work = if prefix { Reg::Eax } else { Reg::Ebx };
            if increment {
                state.addl(&imm(delta), work.name());
            } else {
                state.subl(&imm(delta), work.name());
            }
            match inner.ty.kind {
                TypeKind::Char | TypeKind::UChar => {
                    let low = if prefix { Reg::Al } else { Reg::Bl };
                    state.movb(low.name(), &mem(0, Reg::Ecx));
                }
                TypeKind::Short | TypeKind::UShort => {
                    let low = if prefix { Reg::Ax } else { Reg::Bx };
                    state.movw(low.name(), &mem(0, Reg::Ecx));
                }
                TypeKind::Long | TypeKind::ULong | TypeKind::Pointer(_) => {
                    state.movl(work.name(), &mem(0, Reg::Ecx));
                }
                _ => panic!("increment of {:?}", inner.ty.kind),
            }
            Reg::Eax
        }
        Reg::St0 => {
            state.pop_word(saved, Reg::Ecx);
            // %st(0) = +-1.0, %st(1) = value
            state.fld1();
            if !increment {
                state.fchs();
            }
            state.fadd(1, 0);
            let is_double = matches!(inner.ty.kind, TypeKind::Double);
            if prefix {
                // store the new value and drop the stale copy underneath
                if is_double {
                    state.fstl(&mem(0, Reg::Ecx));
                } else {
                    state.fsts(&mem(0, Reg::Ecx));
                }
                state.fstp("%st(1)");
            } else {
                // the popping store leaves the old value on top
                if is_double {
                    state.fstpl(&mem(0, Reg::Ecx));
                } else {
                    state.fstps(&mem(0, Reg::Ecx));
                }
            }
            Reg::St0
        }
        _ => panic!("increment target in an unexpected location"),
    }
}
