use std::collections::HashMap;
use std::fmt::Write as _;

use indexmap::IndexMap;

/// Registers the code generator works with. `Eax` and `St0` double as the
/// value-location tags expression emission returns: an integral or pointer
/// result lives in `%eax`, a float or double result on top of the FPU
/// stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    Eax,
    Ebx,
    Ecx,
    Edx,
    Ebp,
    Esp,
    Esi,
    Edi,
    Al,
    Ax,
    Bl,
    Bx,
    Cl,
    St0,
}

impl Reg {
    pub fn name(self) -> &'static str {
        match self {
            Reg::Eax => "%eax",
            Reg::Ebx => "%ebx",
            Reg::Ecx => "%ecx",
            Reg::Edx => "%edx",
            Reg::Ebp => "%ebp",
            Reg::Esp => "%esp",
            Reg::Esi => "%esi",
            Reg::Edi => "%edi",
            Reg::Al => "%al",
            Reg::Ax => "%ax",
            Reg::Bl => "%bl",
            Reg::Bx => "%bx",
            Reg::Cl => "%cl",
            Reg::St0 => "%st(0)",
        }
    }
}

/// `offset(%reg)` operand.
pub fn mem(offset: i32, base: Reg) -> String {
    format!("{offset}({})", base.name())
}

/// `$imm` operand.
pub fn imm(value: i32) -> String {
    format!("${value}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Text,
    Data,
}

// Jump targets supplied by the innermost enclosing loop or switch. A loop
// defines continue and break; a switch defines break, default and the
// case-value map. Lookups walk outward to the nearest context that defines
// the requested label.
#[derive(Debug)]
struct LabelContext {
    continue_label: Option<usize>,
    break_label: Option<usize>,
    default_label: Option<usize>,
    case_labels: Option<IndexMap<i32, usize>>,
}

/// The single mutable object of code generation: the output text, the
/// read-only-data pool, the label counter, the tracked native stack depth,
/// and the active jump-target contexts.
///
/// Every expression emission must leave the tracked depth exactly where it
/// found it once its result is consumed; statement boundaries re-assert
/// the scope's depth with [`Emitter::force_stack_size_to`].
pub struct Emitter {
    text: String,
    rodata: String,
    rodata_idx: usize,
    label_idx: usize,
    section: Section,
    stack_size: i32,
    label_contexts: Vec<LabelContext>,
    goto_labels: HashMap<String, usize>,
    return_label: Option<usize>,
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Emitter {
    pub fn new() -> Self {
        let mut rodata = String::new();
        let _ = writeln!(rodata, "    .section .rodata");
        Emitter {
            text: String::new(),
            rodata,
            rodata_idx: 0,
            label_idx: 0,
            section: Section::None,
            stack_size: 0,
            label_contexts: Vec::new(),
            goto_labels: HashMap::new(),
            return_label: None,
        }
    }

    /// The finished translation unit: text followed by the constant pool.
    pub fn finish(self) -> String {
        let mut out = self.text;
        out.push_str(&self.rodata);
        out
    }

    pub fn stack_size(&self) -> i32 {
        self.stack_size
    }

    fn ins(&mut self, text: &str) {
        let _ = writeln!(self.text, "    {text}");
    }

    // ===== sections and data directives =====

    pub fn text_section(&mut self) {
        if self.section != Section::Text {
            self.ins(".text");
            self.section = Section::Text;
        }
    }

    pub fn data_section(&mut self) {
        if self.section != Section::Data {
            self.ins(".data");
            self.section = Section::Data;
        }
    }

    pub fn globl(&mut self, name: &str) {
        self.ins(&format!(".globl {name}"));
    }

    pub fn local(&mut self, name: &str) {
        self.ins(&format!(".local {name}"));
    }

    pub fn align(&mut self, alignment: usize) {
        self.ins(&format!(".align {alignment}"));
    }

    pub fn comm(&mut self, name: &str, size: usize, alignment: usize) {
        self.ins(&format!(".comm {name},{size},{alignment}"));
    }

    pub fn byte(&mut self, value: i32) {
        self.ins(&format!(".byte {value}"));
    }

    pub fn value(&mut self, value: i32) {
        self.ins(&format!(".value {value}"));
    }

    pub fn long(&mut self, value: i32) {
        self.ins(&format!(".long {value}"));
    }

    pub fn long_symbol(&mut self, symbol: &str) {
        self.ins(&format!(".long {symbol}"));
    }

    pub fn zero(&mut self, size: usize) {
        self.ins(&format!(".zero {size}"));
    }

    pub fn newline(&mut self) {
        self.text.push('\n');
    }

    pub fn comment(&mut self, text: &str) {
        self.ins(&format!("# {text}"));
    }

    // ===== labels =====

    pub fn request_label(&mut self) -> usize {
        let label = self.label_idx;
        self.label_idx += 1;
        label
    }

    pub fn label(&mut self, label: usize) {
        let _ = writeln!(self.text, ".L{label}:");
    }

    pub fn label_named(&mut self, name: &str) {
        let _ = writeln!(self.text, "{name}:");
    }

    pub fn jmp(&mut self, label: usize) {
        self.ins(&format!("jmp .L{label}"));
    }

    pub fn jz(&mut self, label: usize) {
        self.ins(&format!("jz .L{label}"));
    }

    pub fn jnz(&mut self, label: usize) {
        self.ins(&format!("jnz .L{label}"));
    }

    // ===== function context =====

    pub fn func_start(&mut self, name: &str) {
        self.label_named(name);
        self.ins(&format!("pushl {}", Reg::Ebp.name()));
        self.movl(Reg::Esp.name(), Reg::Ebp.name());
        self.stack_size = 0;
    }

    pub fn leave(&mut self) {
        self.ins("leave");
    }

    pub fn ret(&mut self) {
        self.ins("ret");
    }

    /// Enter a function body: allocate its return label and one label per
    /// goto target (collected by a pre-pass, so forward gotos resolve).
    pub fn enter_function(&mut self, goto_labels: &[String]) {
        self.return_label = Some(self.request_label());
        self.goto_labels.clear();
        for name in goto_labels {
            let label = self.request_label();
            self.goto_labels.insert(name.clone(), label);
        }
    }

    pub fn exit_function(&mut self) {
        self.return_label = None;
        self.goto_labels.clear();
    }

    pub fn return_label(&self) -> usize {
        self.return_label.expect("not inside a function")
    }

    pub fn goto_label(&self, name: &str) -> usize {
        *self
            .goto_labels
            .get(name)
            .unwrap_or_else(|| panic!("unresolved goto label '{name}'"))
    }

    // ===== loop / switch label contexts =====

    pub fn enter_loop(&mut self, continue_label: usize, break_label: usize) {
        self.label_contexts.push(LabelContext {
            continue_label: Some(continue_label),
            break_label: Some(break_label),
            default_label: None,
            case_labels: None,
        });
    }

    pub fn enter_switch(
        &mut self,
        break_label: usize,
        default_label: usize,
        case_labels: IndexMap<i32, usize>,
    ) {
        self.label_contexts.push(LabelContext {
            continue_label: None,
            break_label: Some(break_label),
            default_label: Some(default_label),
            case_labels: Some(case_labels),
        });
    }

    pub fn exit_label_context(&mut self) {
        self.label_contexts.pop().expect("no label context to exit");
    }

    pub fn continue_label(&self) -> usize {
        self.label_contexts
            .iter()
            .rev()
            .find_map(|ctx| ctx.continue_label)
            .expect("continue outside of a loop")
    }

    pub fn break_label(&self) -> usize {
        self.label_contexts
            .iter()
            .rev()
            .find_map(|ctx| ctx.break_label)
            .expect("break outside of a loop or switch")
    }

    pub fn default_label(&self) -> usize {
        self.label_contexts
            .iter()
            .rev()
            .find_map(|ctx| ctx.default_label)
            .expect("default outside of a switch")
    }

    pub fn case_label(&self, value: i32) -> usize {
        let map = self
            .label_contexts
            .iter()
            .rev()
            .find_map(|ctx| ctx.case_labels.as_ref())
            .expect("case outside of a switch");
        *map.get(&value)
            .unwrap_or_else(|| panic!("no label collected for case {value}"))
    }

    // ===== tracked stack =====

    fn pushl(&mut self, operand: &str) {
        self.ins(&format!("pushl {operand}"));
    }

    fn popl(&mut self, operand: &str) {
        self.ins(&format!("popl {operand}"));
    }

    /// Push a word and return the tracked depth of the new slot, to be
    /// handed back to [`Emitter::pop_word`].
    pub fn push_word(&mut self, src: Reg) -> i32 {
        self.pushl(src.name());
        self.stack_size += 4;
        self.stack_size
    }

    pub fn push_word_imm(&mut self, value: i32) -> i32 {
        self.pushl(&imm(value));
        self.stack_size += 4;
        self.stack_size
    }

    /// Pop the slot saved at `saved_size` into `dst`. When deeper pushes
    /// have happened since, the slot is not on top any more, so it degrades
    /// to a frame-relative load and the slot is abandoned in place.
    pub fn pop_word(&mut self, saved_size: i32, dst: Reg) {
        if self.stack_size == saved_size {
            self.popl(dst.name());
            self.stack_size -= 4;
        } else {
            self.movl(&mem(-saved_size, Reg::Ebp), dst.name());
        }
    }

    /// Spill %st(0) to a fresh 4-byte slot, popping the FPU stack; the FPU
    /// stack must hold at most one live value at a time.
    pub fn push_float(&mut self) -> i32 {
        self.expand_stack_by(4);
        self.fstps(&mem(0, Reg::Esp));
        self.stack_size
    }

    pub fn push_double(&mut self) -> i32 {
        self.expand_stack_by(8);
        self.fstpl(&mem(0, Reg::Esp));
        self.stack_size
    }

    /// Reload a float slot spilled at `saved_size` onto the FPU stack,
    /// shrinking the native stack when the slot is still on top.
    pub fn pop_float(&mut self, saved_size: i32) {
        self.flds(&mem(-saved_size, Reg::Ebp));
        if saved_size == self.stack_size {
            self.shrink_stack_by(4);
        }
    }

    pub fn pop_double(&mut self, saved_size: i32) {
        self.fldl(&mem(-saved_size, Reg::Ebp));
        if saved_size == self.stack_size {
            self.shrink_stack_by(8);
        }
    }

    pub fn expand_stack_to(&mut self, size: i32) {
        if size > self.stack_size {
            self.subl(&imm(size - self.stack_size), Reg::Esp.name());
            self.stack_size = size;
        }
    }

    pub fn expand_stack_by(&mut self, nbytes: i32) {
        self.stack_size += nbytes;
        self.subl(&imm(nbytes), Reg::Esp.name());
    }

    pub fn expand_stack_with_alignment(&mut self, nbytes: i32, alignment: usize) {
        let expanded = types::round_up((self.stack_size + nbytes) as usize, alignment) as i32
            - self.stack_size;
        self.expand_stack_by(expanded);
    }

    pub fn shrink_stack_by(&mut self, nbytes: i32) {
        self.stack_size -= nbytes;
        self.addl(&imm(nbytes), Reg::Esp.name());
    }

    /// Reset %esp to exactly `nbytes` below the frame base, recomputing it
    /// from %ebp. This is what makes expression side effects on the stack
    /// invisible across statement boundaries.
    pub fn force_stack_size_to(&mut self, nbytes: i32) {
        self.stack_size = nbytes;
        self.lea(&mem(-nbytes, Reg::Ebp), Reg::Esp.name());
    }

    // ===== moves =====

    pub fn movl(&mut self, src: &str, dst: &str) {
        self.ins(&format!("movl {src}, {dst}"));
    }

    pub fn movb(&mut self, src: &str, dst: &str) {
        self.ins(&format!("movb {src}, {dst}"));
    }

    pub fn movw(&mut self, src: &str, dst: &str) {
        self.ins(&format!("movw {src}, {dst}"));
    }

    /// Byte move with sign extension to a full word.
    pub fn movsbl(&mut self, src: &str, dst: &str) {
        self.ins(&format!("movsbl {src}, {dst}"));
    }

    /// Byte move with zero extension to a full word.
    pub fn movzbl(&mut self, src: &str, dst: &str) {
        self.ins(&format!("movzbl {src}, {dst}"));
    }

    pub fn movswl(&mut self, src: &str, dst: &str) {
        self.ins(&format!("movswl {src}, {dst}"));
    }

    pub fn movzwl(&mut self, src: &str, dst: &str) {
        self.ins(&format!("movzwl {src}, {dst}"));
    }

    pub fn lea(&mut self, addr: &str, dst: &str) {
        self.ins(&format!("lea {addr}, {dst}"));
    }

    pub fn call(&mut self, target: &str) {
        self.ins(&format!("call {target}"));
    }

    // ===== integer ALU =====

    pub fn addl(&mut self, src: &str, dst: &str) {
        self.ins(&format!("addl {src}, {dst}"));
    }

    pub fn subl(&mut self, src: &str, dst: &str) {
        self.ins(&format!("subl {src}, {dst}"));
    }

    pub fn andl(&mut self, src: &str, dst: &str) {
        self.ins(&format!("andl {src}, {dst}"));
    }

    pub fn andb(&mut self, src: &str, dst: &str) {
        self.ins(&format!("andb {src}, {dst}"));
    }

    pub fn orl(&mut self, src: &str, dst: &str) {
        self.ins(&format!("orl {src}, {dst}"));
    }

    pub fn xorl(&mut self, src: &str, dst: &str) {
        self.ins(&format!("xorl {src}, {dst}"));
    }

    /// Shift left; the count must already be in %cl.
    pub fn sall(&mut self, dst: &str) {
        self.ins(&format!("sall %cl, {dst}"));
    }

    /// Arithmetic shift right (sign bit fills in).
    pub fn sarl(&mut self, dst: &str) {
        self.ins(&format!("sarl %cl, {dst}"));
    }

    /// Logical shift right (zero fills in).
    pub fn shrl(&mut self, dst: &str) {
        self.ins(&format!("shrl %cl, {dst}"));
    }

    pub fn shrl_imm(&mut self, count: i32, dst: &str) {
        self.ins(&format!("shrl ${count}, {dst}"));
    }

    pub fn negl(&mut self, dst: &str) {
        self.ins(&format!("neg {dst}"));
    }

    pub fn notl(&mut self, dst: &str) {
        self.ins(&format!("not {dst}"));
    }

    /// Signed multiply: %edx:%eax = %eax * operand.
    pub fn imul(&mut self, operand: &str) {
        self.ins(&format!("imul {operand}"));
    }

    /// Unsigned multiply: %edx:%eax = %eax * operand.
    pub fn mul(&mut self, operand: &str) {
        self.ins(&format!("mul {operand}"));
    }

    /// Sign-extend %eax into %edx:%eax before a signed divide.
    pub fn cltd(&mut self) {
        self.ins("cltd");
    }

    pub fn idivl(&mut self, operand: &str) {
        self.ins(&format!("idivl {operand}"));
    }

    pub fn divl(&mut self, operand: &str) {
        self.ins(&format!("divl {operand}"));
    }

    pub fn cmpl(&mut self, src: &str, dst: &str) {
        self.ins(&format!("cmpl {src}, {dst}"));
    }

    pub fn testl(&mut self, src: &str, dst: &str) {
        self.ins(&format!("testl {src}, {dst}"));
    }

    pub fn set(&mut self, condition: &str, dst: &str) {
        self.ins(&format!("set{condition} {dst}"));
    }

    pub fn cld(&mut self) {
        self.ins("cld");
    }

    // ===== FPU =====

    pub fn fchs(&mut self) {
        self.ins("fchs");
    }

    pub fn flds(&mut self, addr: &str) {
        self.ins(&format!("flds {addr}"));
    }

    pub fn fldl(&mut self, addr: &str) {
        self.ins(&format!("fldl {addr}"));
    }

    pub fn fld1(&mut self) {
        self.ins("fld1");
    }

    pub fn fldz(&mut self) {
        self.ins("fldz");
    }

    pub fn fsts(&mut self, addr: &str) {
        self.ins(&format!("fsts {addr}"));
    }

    pub fn fstps(&mut self, addr: &str) {
        self.ins(&format!("fstps {addr}"));
    }

    pub fn fstl(&mut self, addr: &str) {
        self.ins(&format!("fstl {addr}"));
    }

    pub fn fstpl(&mut self, addr: &str) {
        self.ins(&format!("fstpl {addr}"));
    }

    pub fn fstp(&mut self, dst: &str) {
        self.ins(&format!("fstp {dst}"));
    }

    /// %st(op2) += %st(op1).
    pub fn fadd(&mut self, op1: usize, op2: usize) {
        self.ins(&format!("fadd %st({op1}), %st({op2})"));
    }

    pub fn faddp(&mut self) {
        self.ins("faddp");
    }

    pub fn fsubp(&mut self) {
        self.ins("fsubp");
    }

    pub fn fmulp(&mut self) {
        self.ins("fmulp");
    }

    pub fn fdivp(&mut self) {
        self.ins("fdivp");
    }

    /// Unordered compare of %st(0) against %st(1), popping once.
    pub fn fucomip(&mut self) {
        self.ins("fucomip %st(1), %st");
    }

    fn fistl(&mut self, addr: &str) {
        self.ins(&format!("fistl {addr}"));
    }

    fn fildl(&mut self, addr: &str) {
        self.ins(&format!("fildl {addr}"));
    }

    /// %eax = (long)%st(0), popping through a scratch slot.
    pub fn convert_float_to_word(&mut self) {
        self.expand_stack_by(4);
        self.fistl(&mem(0, Reg::Esp));
        self.fstp(Reg::St0.name());
        self.movl(&mem(0, Reg::Esp), Reg::Eax.name());
        self.shrink_stack_by(4);
    }

    /// %st(0) = (float/double)%eax, through a scratch slot.
    pub fn convert_word_to_float(&mut self) {
        self.expand_stack_by(4);
        self.movl(Reg::Eax.name(), &mem(0, Reg::Esp));
        self.fildl(&mem(0, Reg::Esp));
        self.shrink_stack_by(4);
    }

    /// Copy %ecx bytes from *%esi to *%edi: whole words first, then the
    /// byte remainder.
    pub fn memcpy(&mut self) {
        self.movb(Reg::Cl.name(), Reg::Al.name());
        self.shrl_imm(2, Reg::Ecx.name());
        self.cld();
        self.ins("rep movsl");
        self.movb(Reg::Al.name(), Reg::Cl.name());
        self.andb(&imm(3), Reg::Cl.name());
        self.ins("rep movsb");
    }

    // ===== read-only data pool =====

    pub fn long_const(&mut self, value: i32) -> String {
        let name = format!(".LC{}", self.rodata_idx);
        self.rodata_idx += 1;
        let _ = writeln!(self.rodata, "    .align 4");
        let _ = writeln!(self.rodata, "{name}:");
        let _ = writeln!(self.rodata, "    .long {value}");
        name
    }

    pub fn quad_const(&mut self, lo: i32, hi: i32) -> String {
        let name = format!(".LC{}", self.rodata_idx);
        self.rodata_idx += 1;
        let _ = writeln!(self.rodata, "    .align 8");
        let _ = writeln!(self.rodata, "{name}:");
        let _ = writeln!(self.rodata, "    .long {lo}");
        let _ = writeln!(self.rodata, "    .long {hi}");
        name
    }

    pub fn string_const(&mut self, text: &str) -> String {
        let name = format!(".LC{}", self.rodata_idx);
        self.rodata_idx += 1;
        let _ = writeln!(self.rodata, "{name}:");
        let _ = writeln!(self.rodata, "    .string \"{}\"", escape_string(text));
        name
    }
}

fn escape_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("\\{:03o}", byte)),
        }
    }
    out
}
