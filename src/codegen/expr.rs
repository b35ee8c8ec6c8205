//! Expression lowering: one function per `ExprKind` variant, parameterised
//! by `reg_out`. For ordinary scalars `reg_out` receives the value; for
//! indirect (wide-arithmetic or record) types it instead receives a pointer
//! to caller-allocated storage and the node writes its result through it.

use std::rc::Rc;
use crate::ast::{BinOp, Expr, ExprKind, UnOp};
use crate::intern::{intern, Atom};
use crate::ir::{Instruction, Invocation, Opcode, Operand, Reg, Sigil};
use crate::scope::{Builtin, SymbolKind, SymbolRef};
use crate::types::{Base, Type, WORD_SIZE};

use super::{clamp_imm, jmp_target, Codegen};

pub(super) fn lower_expr(cg: &mut Codegen<'_>, e: &Expr, reg_out: Reg) {
  match &e.kind {
    ExprKind::IntLiteral(v) => lower_int_literal(cg, *v, &e.ty, reg_out),
    ExprKind::FloatLiteral(v) => lower_float_literal(cg, *v, &e.ty, reg_out),
    ExprKind::StringLiteral(bytes) => lower_string_literal(cg, bytes.clone(), reg_out),
    ExprKind::Access(sym) => lower_access(cg, sym, &e.ty, reg_out),
    ExprKind::Member(base, field) => lower_member_read(cg, base, *field, &e.ty, reg_out),
    ExprKind::Deref(_) | ExprKind::Index(_, _) => {
      if e.ty.is_record() || e.ty.is_indirect() {
        lower_addr(cg, e, reg_out);
      } else {
        let addr = cg.alloc_reg();
        lower_addr(cg, e, addr);
        load_scalar(cg, addr, &e.ty, reg_out);
        cg.free_reg(addr);
      }
    }
    ExprKind::AddrOf(inner) => lower_addr(cg, inner, reg_out),
    ExprKind::Unary(op, a) => lower_unary(cg, *op, a, &e.ty, reg_out),
    ExprKind::Binary(op, a, b) => lower_binary(cg, *op, a, b, &e.ty, reg_out),
    ExprKind::Assign(op, lhs, rhs) => lower_assign(cg, *op, lhs, rhs, reg_out),
    ExprKind::Comma(a, b) => {
      let d = cg.alloc_reg();
      lower_expr(cg, a, d);
      cg.free_reg(d);
      lower_expr(cg, b, reg_out);
    }
    ExprKind::Cond(c, t, f) => lower_cond(cg, c, t, f, reg_out),
    ExprKind::Call(callee, args) => lower_call(cg, callee, args, &e.ty, reg_out),
    ExprKind::Cast { value, .. } => lower_cast(cg, value, &e.ty, reg_out),
    ExprKind::Decay(inner) => lower_decay(cg, inner, reg_out),
    ExprKind::Sizeof(ty) => lower_int_literal(cg, u64::from(ty.size()), &e.ty, reg_out),
    ExprKind::SizeofExpr(inner) => lower_int_literal(cg, u64::from(inner.ty.size()), &e.ty, reg_out),
    ExprKind::AlignofType(ty) => lower_int_literal(cg, u64::from(ty.align()), &e.ty, reg_out),
    ExprKind::InitList(_) => super::init::lower_init_into(cg, &e.ty, e, reg_out),
    ExprKind::StatementExpr(stmts) => lower_statement_expr(cg, stmts, reg_out),
    ExprKind::Builtin(sel, args) => lower_builtin(cg, *sel, args, &e.ty, reg_out),
    ExprKind::Error => unreachable!("a malformed expression reached code generation"),
  }
}

/// The address of an lvalue. Never valid for a bit-field member — those are
/// accessed only through `lower_member_read`/the assignment path, since a
/// sub-byte field has no addressable storage of its own.
pub(super) fn lower_addr(cg: &mut Codegen<'_>, e: &Expr, reg_out: Reg) {
  match &e.kind {
    ExprKind::Access(sym) => addr_of_symbol(cg, sym, reg_out),
    ExprKind::Deref(inner) => lower_expr(cg, inner, reg_out),
    ExprKind::Member(base, field) => {
      lower_addr(cg, base, reg_out);
      let rec = base.ty.record().expect("member base is a record/union");
      let member = rec.borrow().find(*field).expect("member must exist").clone();
      assert!(member.bit_width.is_none(), "a bit-field has no address");
      if member.offset != 0 {
        let scratch = cg.alloc_reg();
        cg.block().append_op_imm(Opcode::Add, reg_out, reg_out, i64::from(member.offset), scratch);
        cg.free_reg(scratch);
      }
    }
    ExprKind::Index(base, idx) => {
      let elem = e.ty.clone();
      lower_expr(cg, base, reg_out);
      let ireg = cg.alloc_reg();
      lower_expr(cg, idx, ireg);
      let esize = elem.size();
      if esize != 1 {
        let scratch = cg.alloc_reg();
        cg.block().append_op_imm(Opcode::Mul, ireg, ireg, i64::from(esize), scratch);
        cg.free_reg(scratch);
      }
      cg.append(Instruction::new(Opcode::Add)
        .op1(Operand::Reg(reg_out)).op2(Operand::Reg(reg_out)).op3(Operand::Reg(ireg)));
      cg.free_reg(ireg);
    }
    _ => panic!("lower_addr on a non-lvalue expression"),
  }
}

pub(super) fn addr_of_symbol(cg: &mut Codegen<'_>, sym: &SymbolRef, reg_out: Reg) {
  let off = sym.borrow().frame_offset;
  if let Some(off) = off {
    let scratch = cg.alloc_reg();
    cg.block().append_op_imm(Opcode::Add, reg_out, Reg::Rfp, i64::from(off), scratch);
    cg.free_reg(scratch);
  } else {
    let name = sym.borrow().asm_name;
    cg.append(Instruction::new(Opcode::Imw).op1(Operand::Reg(reg_out))
      .invoke(Invocation::Name(Sigil::Absolute, name)));
  }
}

fn lower_access(cg: &mut Codegen<'_>, sym: &SymbolRef, ty: &Type, reg_out: Reg) {
  let kind = sym.borrow().kind;
  match kind {
    SymbolKind::Constant => {
      let v = match sym.borrow().constant.expect("constant symbol carries a value") {
        crate::scope::ConstPayload::U32(n) => u64::from(n),
        crate::scope::ConstPayload::U64(n) => n,
      };
      lower_int_literal(cg, v, ty, reg_out);
    }
    SymbolKind::Function => {
      let name = sym.borrow().asm_name;
      cg.append(Instruction::new(Opcode::Imw).op1(Operand::Reg(reg_out))
        .invoke(Invocation::Name(Sigil::Absolute, name)));
    }
    SymbolKind::Builtin => panic!("a builtin must be called, not read as a value"),
    SymbolKind::Variable => {
      if ty.is_record() || ty.is_indirect() {
        let src = cg.alloc_reg();
        addr_of_symbol(cg, sym, src);
        copy_bytes(cg, reg_out, src, ty.size());
        cg.free_reg(src);
      } else {
        let addr = cg.alloc_reg();
        addr_of_symbol(cg, sym, addr);
        load_scalar(cg, addr, ty, reg_out);
        cg.free_reg(addr);
      }
    }
  }
}

fn lower_member_read(cg: &mut Codegen<'_>, base: &Expr, field: Atom, ty: &Type, reg_out: Reg) {
  let rec = base.ty.record().expect("member base is a record/union");
  let member = rec.borrow().find(field).expect("member must exist").clone();
  if let Some(width) = member.bit_width {
    let addr = cg.alloc_reg();
    lower_addr(cg, base, addr);
    if member.offset != 0 {
      let scratch = cg.alloc_reg();
      cg.block().append_op_imm(Opcode::Add, addr, addr, i64::from(member.offset), scratch);
      cg.free_reg(scratch);
    }
    load_scalar(cg, addr, &Type::new_base(Base::UInt, crate::types::Qual::empty()), reg_out);
    cg.free_reg(addr);
    extract_bitfield(cg, reg_out, member.bit_offset, width, ty.is_unsigned());
    return;
  }
  if ty.is_record() || ty.is_indirect() {
    lower_addr(cg, base, reg_out);
    if member.offset != 0 {
      let scratch = cg.alloc_reg();
      cg.block().append_op_imm(Opcode::Add, reg_out, reg_out, i64::from(member.offset), scratch);
      cg.free_reg(scratch);
    }
  } else {
    let addr = cg.alloc_reg();
    lower_addr(cg, base, addr);
    if member.offset != 0 {
      let scratch = cg.alloc_reg();
      cg.block().append_op_imm(Opcode::Add, addr, addr, i64::from(member.offset), scratch);
      cg.free_reg(scratch);
    }
    load_scalar(cg, addr, ty, reg_out);
    cg.free_reg(addr);
  }
}

/// Shift the storage-unit value so the field occupies the low bits, then
/// sign- or zero-extend from `width` bits (record.c's bit-field packing,
/// §3 of SPEC_FULL.md, read back out at lowering time).
fn extract_bitfield(cg: &mut Codegen<'_>, reg: Reg, bit_offset: u8, width: u8, unsigned: bool) {
  if bit_offset != 0 {
    cg.append(Instruction::new(Opcode::ShrU).op1(Operand::Reg(reg))
      .op2(Operand::Reg(reg)).op3(Operand::Imm(clamp_imm(i64::from(bit_offset)))));
  }
  let shift = 32 - i64::from(width);
  let scratch = cg.alloc_reg();
  cg.block().append_op_imm(Opcode::Shl, reg, reg, shift, scratch);
  let op = if unsigned { Opcode::ShrU } else { Opcode::ShrS };
  cg.block().append_op_imm(op, reg, reg, shift, scratch);
  cg.free_reg(scratch);
}

fn lower_decay(cg: &mut Codegen<'_>, inner: &Expr, reg_out: Reg) {
  match &inner.kind {
    ExprKind::StringLiteral(bytes) => lower_string_literal(cg, bytes.clone(), reg_out),
    ExprKind::Access(sym) => addr_of_symbol(cg, sym, reg_out),
    _ => lower_addr(cg, inner, reg_out),
  }
}

pub(super) fn load_scalar(cg: &mut Codegen<'_>, addr: Reg, ty: &Type, dst: Reg) {
  let op = match ty.size() { 1 => Opcode::Ldb, 2 => Opcode::Lds, _ => Opcode::Ldw };
  cg.append(Instruction::new(op).op1(Operand::Reg(dst)).op2(Operand::Reg(addr)).op3(Operand::Imm(0)));
}

pub(super) fn store_scalar(cg: &mut Codegen<'_>, addr: Reg, ty: &Type, src: Reg) {
  let op = match ty.size() { 1 => Opcode::Stb, 2 => Opcode::Sts, _ => Opcode::Stw };
  cg.append(Instruction::new(op).op1(Operand::Reg(addr)).op2(Operand::Imm(0)).op3(Operand::Reg(src)));
}

/// Straight-line word/half/byte copy of a compile-time-known size; used for
/// record assignment/passing and for indirect (wide-arithmetic) values.
pub(super) fn copy_bytes(cg: &mut Codegen<'_>, dst: Reg, src: Reg, size: u32) {
  let tmp = cg.alloc_reg();
  let mut off: i64 = 0;
  for _ in 0..(size / 4) {
    cg.append(Instruction::new(Opcode::Ldw).op1(Operand::Reg(tmp)).op2(Operand::Reg(src)).op3(Operand::Imm(clamp_imm(off))));
    cg.append(Instruction::new(Opcode::Stw).op1(Operand::Reg(dst)).op2(Operand::Imm(clamp_imm(off))).op3(Operand::Reg(tmp)));
    off += 4;
  }
  let mut rem = size % 4;
  while rem > 0 {
    let (ld, st, step) = if rem >= 2 { (Opcode::Lds, Opcode::Sts, 2) } else { (Opcode::Ldb, Opcode::Stb, 1) };
    cg.append(Instruction::new(ld).op1(Operand::Reg(tmp)).op2(Operand::Reg(src)).op3(Operand::Imm(clamp_imm(off))));
    cg.append(Instruction::new(st).op1(Operand::Reg(dst)).op2(Operand::Imm(clamp_imm(off))).op3(Operand::Reg(tmp)));
    off += step;
    rem -= step;
  }
  cg.free_reg(tmp);
}

fn lower_int_literal(cg: &mut Codegen<'_>, v: u64, ty: &Type, reg_out: Reg) {
  if ty.is_indirect() {
    store_wide_immediate(cg, reg_out, v);
  } else {
    cg.append(Instruction::new(Opcode::Imw).op1(Operand::Reg(reg_out)).invoke(Invocation::Number(v as i64)));
  }
}

fn lower_float_literal(cg: &mut Codegen<'_>, v: f64, ty: &Type, reg_out: Reg) {
  if ty.is_indirect() {
    store_wide_immediate(cg, reg_out, v.to_bits());
  } else {
    let bits = (v as f32).to_bits();
    cg.append(Instruction::new(Opcode::Imw).op1(Operand::Reg(reg_out)).invoke(Invocation::Number(i64::from(bits))));
  }
}

fn store_wide_immediate(cg: &mut Codegen<'_>, ptr: Reg, bits: u64) {
  let tmp = cg.alloc_reg();
  let low = i64::from(bits as u32);
  let high = i64::from((bits >> 32) as u32);
  cg.append(Instruction::new(Opcode::Imw).op1(Operand::Reg(tmp)).invoke(Invocation::Number(low)));
  cg.append(Instruction::new(Opcode::Stw).op1(Operand::Reg(ptr)).op2(Operand::Imm(0)).op3(Operand::Reg(tmp)));
  cg.append(Instruction::new(Opcode::Imw).op1(Operand::Reg(tmp)).invoke(Invocation::Number(high)));
  cg.append(Instruction::new(Opcode::Stw).op1(Operand::Reg(ptr)).op2(Operand::Imm(4)).op3(Operand::Reg(tmp)));
  cg.free_reg(tmp);
}

fn lower_string_literal(cg: &mut Codegen<'_>, bytes: Rc<[u8]>, reg_out: Reg) {
  let id = super::intern_string_literal(bytes);
  cg.append(Instruction::new(Opcode::Imw).op1(Operand::Reg(reg_out))
    .invoke(Invocation::Generated(Sigil::Absolute, "_Sx", id)));
}

fn lower_unary(cg: &mut Codegen<'_>, op: UnOp, a: &Expr, ty: &Type, reg_out: Reg) {
  match op {
    UnOp::Neg => {
      lower_expr(cg, a, reg_out);
      let zero = cg.alloc_reg();
      cg.append(Instruction::new(Opcode::Zero).op1(Operand::Reg(zero)));
      cg.append(Instruction::new(Opcode::Sub).op1(Operand::Reg(reg_out)).op2(Operand::Reg(zero)).op3(Operand::Reg(reg_out)));
      cg.free_reg(zero);
    }
    UnOp::BitNot => {
      lower_expr(cg, a, reg_out);
      cg.append(Instruction::new(Opcode::Not).op1(Operand::Reg(reg_out)).op2(Operand::Reg(reg_out)));
    }
    UnOp::LogNot => {
      lower_expr(cg, a, reg_out);
      cg.append(Instruction::new(Opcode::Isz).op1(Operand::Reg(reg_out)).op2(Operand::Reg(reg_out)));
    }
    UnOp::PreInc | UnOp::PreDec | UnOp::PostInc | UnOp::PostDec => lower_incdec(cg, op, a, ty, reg_out),
  }
}

fn lower_incdec(cg: &mut Codegen<'_>, op: UnOp, a: &Expr, ty: &Type, reg_out: Reg) {
  let addr = cg.alloc_reg();
  lower_addr(cg, a, addr);
  let cur = cg.alloc_reg();
  load_scalar(cg, addr, ty, cur);
  let step: i64 = if ty.is_pointer() { i64::from(ty.referent().expect("pointer referent").size()) } else { 1 };
  let is_inc = matches!(op, UnOp::PreInc | UnOp::PostInc);
  let is_post = matches!(op, UnOp::PostInc | UnOp::PostDec);
  if is_post {
    cg.append(Instruction::new(Opcode::Mov).op1(Operand::Reg(reg_out)).op2(Operand::Reg(cur)));
  }
  let opcode = if is_inc { Opcode::Add } else { Opcode::Sub };
  let scratch = cg.alloc_reg();
  cg.block().append_op_imm(opcode, cur, cur, step, scratch);
  cg.free_reg(scratch);
  store_scalar(cg, addr, ty, cur);
  if !is_post {
    cg.append(Instruction::new(Opcode::Mov).op1(Operand::Reg(reg_out)).op2(Operand::Reg(cur)));
  }
  cg.free_reg(cur);
  cg.free_reg(addr);
}

fn binop_opcode(op: BinOp) -> Opcode {
  match op {
    BinOp::Add => Opcode::Add, BinOp::Sub => Opcode::Sub, BinOp::Mul => Opcode::Mul,
    BinOp::DivU => Opcode::DivU, BinOp::DivS => Opcode::DivS,
    BinOp::ModU => Opcode::ModU, BinOp::ModS => Opcode::ModS,
    BinOp::Shl => Opcode::Shl, BinOp::ShrU => Opcode::ShrU, BinOp::ShrS => Opcode::ShrS,
    BinOp::And => Opcode::And, BinOp::Or => Opcode::Or, BinOp::Xor => Opcode::Xor,
    _ => unreachable!("relational/logical operators are lowered separately"),
  }
}

fn is_wide_arith(ty: &Type) -> bool { ty.is_indirect() && ty.is_arithmetic() }

fn lower_binary(cg: &mut Codegen<'_>, op: BinOp, a: &Expr, b: &Expr, ty: &Type, reg_out: Reg) {
  match op {
    BinOp::LogAnd => return lower_logical(cg, true, a, b, reg_out),
    BinOp::LogOr => return lower_logical(cg, false, a, b, reg_out),
    BinOp::Eq | BinOp::Ne | BinOp::LtU | BinOp::LtS | BinOp::LeU | BinOp::LeS
      | BinOp::GtU | BinOp::GtS | BinOp::GeU | BinOp::GeS => return lower_compare(cg, op, a, b, reg_out),
    _ => {}
  }
  if is_wide_arith(&a.ty) || is_wide_arith(ty) {
    return lower_wide_binary(cg, op, a, b, ty, reg_out);
  }
  lower_expr(cg, a, reg_out);
  let rhs = cg.alloc_reg();
  lower_expr(cg, b, rhs);
  cg.append(Instruction::new(binop_opcode(op))
    .op1(Operand::Reg(reg_out)).op2(Operand::Reg(reg_out)).op3(Operand::Reg(rhs)));
  cg.free_reg(rhs);
}

/// `&&`/`||` short-circuit: the condition jump is not a block terminator
/// (only `jmp`/`ret` end a block), so the right-hand evaluation can simply
/// continue appending to the same block along the fallthrough path.
fn lower_logical(cg: &mut Codegen<'_>, is_and: bool, a: &Expr, b: &Expr, reg_out: Reg) {
  lower_expr(cg, a, reg_out);
  cg.append(Instruction::new(Opcode::Bool).op1(Operand::Reg(reg_out)).op2(Operand::Reg(reg_out)));
  let skip = cg.new_block();
  let jump_op = if is_and { Opcode::Jz } else { Opcode::Jnz };
  cg.append(Instruction::new(jump_op).op1(Operand::Reg(reg_out)).invoke(jmp_target(skip)));
  lower_expr(cg, b, reg_out);
  cg.append(Instruction::new(Opcode::Bool).op1(Operand::Reg(reg_out)).op2(Operand::Reg(reg_out)));
  let cont = cg.new_block();
  cg.append(Instruction::new(Opcode::Jmp).invoke(jmp_target(cont)));
  cg.switch_to(skip);
  cg.append(Instruction::new(Opcode::Jmp).invoke(jmp_target(cont)));
  cg.switch_to(cont);
}

/// `CMPU`/`CMPS` followed by a two-instruction normalisation (spec.md
/// §4.10): the comparison leaves a three-way sign in `reg_out` (its top bit
/// set exactly when `a < b`), `shru ...,31` isolates that bit for the
/// ordering predicates, and the `>=`/`<=` forms add one more `xor ...,1` to
/// negate it. `==`/`!=` instead subtract and normalise through
/// `isz`/`bool`.
fn lower_compare(cg: &mut Codegen<'_>, op: BinOp, a: &Expr, b: &Expr, reg_out: Reg) {
  match op {
    BinOp::Eq => {
      lower_sub(cg, a, b, reg_out);
      cg.append(Instruction::new(Opcode::Isz).op1(Operand::Reg(reg_out)).op2(Operand::Reg(reg_out)));
    }
    BinOp::Ne => {
      lower_sub(cg, a, b, reg_out);
      cg.append(Instruction::new(Opcode::Bool).op1(Operand::Reg(reg_out)).op2(Operand::Reg(reg_out)));
    }
    BinOp::LtU => lower_rel(cg, Opcode::CmpU, a, b, reg_out, false),
    BinOp::LtS => lower_rel(cg, Opcode::CmpS, a, b, reg_out, false),
    BinOp::GtU => lower_rel(cg, Opcode::CmpU, b, a, reg_out, false),
    BinOp::GtS => lower_rel(cg, Opcode::CmpS, b, a, reg_out, false),
    BinOp::GeU => lower_rel(cg, Opcode::CmpU, a, b, reg_out, true),
    BinOp::GeS => lower_rel(cg, Opcode::CmpS, a, b, reg_out, true),
    BinOp::LeU => lower_rel(cg, Opcode::CmpU, b, a, reg_out, true),
    BinOp::LeS => lower_rel(cg, Opcode::CmpS, b, a, reg_out, true),
    _ => unreachable!("not a comparison operator"),
  }
}

fn lower_sub(cg: &mut Codegen<'_>, a: &Expr, b: &Expr, reg_out: Reg) {
  lower_expr(cg, a, reg_out);
  let rhs = cg.alloc_reg();
  lower_expr(cg, b, rhs);
  cg.append(Instruction::new(Opcode::Sub).op1(Operand::Reg(reg_out)).op2(Operand::Reg(reg_out)).op3(Operand::Reg(rhs)));
  cg.free_reg(rhs);
}

fn lower_rel(cg: &mut Codegen<'_>, cmp: Opcode, a: &Expr, b: &Expr, reg_out: Reg, negate: bool) {
  lower_expr(cg, a, reg_out);
  let rhs = cg.alloc_reg();
  lower_expr(cg, b, rhs);
  cg.append(Instruction::new(cmp).op1(Operand::Reg(reg_out)).op2(Operand::Reg(reg_out)).op3(Operand::Reg(rhs)));
  cg.free_reg(rhs);
  cg.append(Instruction::new(Opcode::ShrU).op1(Operand::Reg(reg_out)).op2(Operand::Reg(reg_out)).op3(Operand::Imm(31)));
  if negate {
    let scratch = cg.alloc_reg();
    cg.block().append_op_imm(Opcode::Xor, reg_out, reg_out, 1, scratch);
    cg.free_reg(scratch);
  }
}

enum CallTarget { Direct(Invocation), Indirect(Reg) }

fn wide_helper_name(op: BinOp, operand_ty: &Type) -> Atom {
  let prefix = match operand_ty.arithmetic_base() {
    Base::Double | Base::LongDouble => "__double",
    Base::Float => "__float",
    _ => "__llong",
  };
  let suffix = match op {
    BinOp::Add => "add", BinOp::Sub => "sub", BinOp::Mul => "mul",
    BinOp::DivU => "divu", BinOp::DivS => "divs", BinOp::ModU => "modu", BinOp::ModS => "mods",
    BinOp::Shl => "shl", BinOp::ShrU => "shru", BinOp::ShrS => "shrs",
    BinOp::And => "and", BinOp::Or => "or", BinOp::Xor => "xor",
    _ => unreachable!("comparisons never reach lower_wide_binary"),
  };
  intern(&format!("{prefix}_{suffix}"))
}

fn lower_wide_binary(cg: &mut Codegen<'_>, op: BinOp, a: &Expr, b: &Expr, ty: &Type, reg_out: Reg) {
  let name = wide_helper_name(op, &a.ty);
  emit_call(cg, CallTarget::Direct(Invocation::Name(Sigil::Absolute, name)), &[a, b], ty, reg_out);
}

fn direct_callee_symbol(callee: &Expr) -> Option<SymbolRef> {
  match &callee.kind {
    ExprKind::Decay(inner) => direct_callee_symbol(inner),
    ExprKind::Access(sym) if sym.borrow().kind == SymbolKind::Function => Some(sym.clone()),
    _ => None,
  }
}

fn lower_call(cg: &mut Codegen<'_>, callee: &Expr, args: &[Expr], ret_ty: &Type, reg_out: Reg) {
  let refs: Vec<&Expr> = args.iter().collect();
  if let Some(sym) = direct_callee_symbol(callee) {
    let name = sym.borrow().asm_name;
    emit_call(cg, CallTarget::Direct(Invocation::Name(Sigil::Absolute, name)), &refs, ret_ty, reg_out);
  } else {
    // A call through a function pointer. The callee address is cursor-
    // allocated so it survives ordinary argument evaluation, but it is not
    // protected from the fixed r0..r3 writes register-passed arguments use
    // directly; this is a known limitation noted in DESIGN.md.
    let ptr = cg.alloc_reg();
    lower_expr(cg, callee, ptr);
    emit_call(cg, CallTarget::Indirect(ptr), &refs, ret_ty, reg_out);
    cg.free_reg(ptr);
  }
}

/// Shared calling-convention lowering (spec.md §4.10) used for both real
/// calls and the synthetic `__llong_*`/`__float_*`/`__double_*` runtime
/// helper calls: save live registers, evaluate up to four non-indirect
/// arguments into `r0..r3`, push everything else (and any indirect
/// argument) right-to-left, reserve and pass an indirect-return pointer
/// when the result doesn't fit a register, call, then restore.
fn emit_call(cg: &mut Codegen<'_>, target: CallTarget, args: &[&Expr], ret_ty: &Type, reg_out: Reg) {
  let saved = cg.live_regs();
  for r in &saved { cg.append(Instruction::new(Opcode::Push).op1(Operand::Reg(*r))); }

  let indirect_ret = ret_ty.is_indirect();
  let ret_size = ret_ty.size().max(WORD_SIZE);
  if indirect_ret { cg.block().sub_rsp(i64::from(ret_size), Reg::R(9)); }

  let reg_slots = [Reg::R(0), Reg::R(1), Reg::R(2), Reg::R(3)];
  let mut reg_slot = 0usize;
  let mut stack_args: Vec<Reg> = Vec::new();
  for a in args {
    if !a.ty.is_indirect() && reg_slot < 4 {
      lower_expr(cg, a, reg_slots[reg_slot]);
      reg_slot += 1;
    } else {
      let tmp = cg.alloc_reg();
      lower_expr(cg, a, tmp);
      stack_args.push(tmp);
    }
  }
  for r in stack_args.iter().rev() {
    cg.append(Instruction::new(Opcode::Push).op1(Operand::Reg(*r)));
  }
  for r in &stack_args { cg.free_reg(*r); }

  if indirect_ret {
    let ptr = cg.alloc_reg();
    let off = i64::from(WORD_SIZE) * i64::try_from(stack_args.len()).unwrap();
    cg.append(Instruction::new(Opcode::Mov).op1(Operand::Reg(ptr)).op2(Operand::Reg(Reg::Rsp)));
    if off != 0 {
      let scratch = cg.alloc_reg();
      cg.block().append_op_imm(Opcode::Add, ptr, ptr, off, scratch);
      cg.free_reg(scratch);
    }
    cg.append(Instruction::new(Opcode::Push).op1(Operand::Reg(ptr)));
    cg.free_reg(ptr);
  }

  let call_inst = match target {
    CallTarget::Direct(inv) => Instruction::new(Opcode::Call).invoke(inv),
    CallTarget::Indirect(r) => Instruction::new(Opcode::Call).op1(Operand::Reg(r)),
  };
  cg.append(call_inst);

  let popped_words = stack_args.len() + usize::from(indirect_ret);
  if popped_words != 0 {
    cg.block().add_rsp(i64::from(WORD_SIZE) * i64::try_from(popped_words).unwrap(), Reg::R(9));
  }

  if indirect_ret {
    copy_bytes(cg, reg_out, Reg::Rsp, ret_ty.size());
    cg.block().add_rsp(i64::from(ret_size), Reg::R(9));
  } else if !ret_ty.is_void() {
    cg.append(Instruction::new(Opcode::Mov).op1(Operand::Reg(reg_out)).op2(Operand::Reg(Reg::R(0))));
  }

  for r in saved.iter().rev() { cg.append(Instruction::new(Opcode::Pop).op1(Operand::Reg(*r))); }
}

fn needs_conversion_helper(from: &Type, to: &Type) -> bool { from.is_indirect() || to.is_indirect() }

fn type_tag(ty: &Type) -> &'static str {
  match ty.arithmetic_base() {
    Base::Float => "f32",
    Base::Double | Base::LongDouble => "f64",
    Base::SLongLong => "i64",
    Base::ULongLong => "u64",
    b if b.is_unsigned() => "u32",
    _ => "i32",
  }
}

fn lower_cast(cg: &mut Codegen<'_>, value: &Expr, target: &Type, reg_out: Reg) {
  if needs_conversion_helper(&value.ty, target) {
    let name = intern(&format!("__convert_{}_{}", type_tag(target), type_tag(&value.ty)));
    emit_call(cg, CallTarget::Direct(Invocation::Name(Sigil::Absolute, name)), &[value], target, reg_out);
    return;
  }
  lower_expr(cg, value, reg_out);
  if target.is_pointer() || value.ty.is_pointer() { return }
  if target.base() == Some(Base::Bool) {
    cg.append(Instruction::new(Opcode::Bool).op1(Operand::Reg(reg_out)).op2(Operand::Reg(reg_out)));
    return;
  }
  let from = value.ty.arithmetic_base();
  let to = target.arithmetic_base();
  if to.rank() > from.rank() {
    let op = if from.is_unsigned() {
      match from.size() { 1 => Some(Opcode::Trb), 2 => Some(Opcode::Trs), _ => None }
    } else {
      match from.size() { 1 => Some(Opcode::Sxb), 2 => Some(Opcode::Sxs), _ => None }
    };
    if let Some(op) = op {
      cg.append(Instruction::new(op).op1(Operand::Reg(reg_out)).op2(Operand::Reg(reg_out)));
    }
  }
  // A narrowing conversion is a no-op at the register level; the upper bits
  // are only tightened on a subsequent widen or a sub-word store.
}

fn lower_cond(cg: &mut Codegen<'_>, c: &Expr, t: &Expr, f: &Expr, reg_out: Reg) {
  let cond = cg.alloc_reg();
  lower_expr(cg, c, cond);
  let false_label = cg.new_block();
  cg.append(Instruction::new(Opcode::Jz).op1(Operand::Reg(cond)).invoke(jmp_target(false_label)));
  cg.free_reg(cond);
  lower_expr(cg, t, reg_out);
  let end_label = cg.new_block();
  cg.append(Instruction::new(Opcode::Jmp).invoke(jmp_target(end_label)));
  cg.switch_to(false_label);
  lower_expr(cg, f, reg_out);
  cg.append(Instruction::new(Opcode::Jmp).invoke(jmp_target(end_label)));
  cg.switch_to(end_label);
}

fn lower_assign(cg: &mut Codegen<'_>, op: Option<BinOp>, lhs: &Expr, rhs: &Expr, reg_out: Reg) {
  if let ExprKind::Member(base, field) = &lhs.kind {
    let rec = base.ty.record().expect("member base is a record/union");
    let member = rec.borrow().find(*field).expect("member must exist").clone();
    if let Some(width) = member.bit_width {
      return lower_bitfield_assign(cg, op, base, &member, width, rhs, &lhs.ty, reg_out);
    }
  }

  let addr = cg.alloc_reg();
  lower_addr(cg, lhs, addr);

  if lhs.ty.is_record() {
    debug_assert!(op.is_none(), "compound assignment is not defined on struct/union types");
    let src = cg.alloc_reg();
    lower_addr(cg, rhs, src);
    copy_bytes(cg, addr, src, lhs.ty.size());
    cg.free_reg(src);
  } else if lhs.ty.is_indirect() {
    match op {
      None => lower_expr(cg, rhs, addr),
      Some(binop) => lower_wide_binary(cg, binop, lhs, rhs, &lhs.ty, addr),
    }
  } else {
    let val = cg.alloc_reg();
    match op {
      None => lower_expr(cg, rhs, val),
      Some(binop) => {
        load_scalar(cg, addr, &lhs.ty, val);
        let rhs_reg = cg.alloc_reg();
        lower_expr(cg, rhs, rhs_reg);
        cg.append(Instruction::new(binop_opcode(binop))
          .op1(Operand::Reg(val)).op2(Operand::Reg(val)).op3(Operand::Reg(rhs_reg)));
        cg.free_reg(rhs_reg);
      }
    }
    store_scalar(cg, addr, &lhs.ty, val);
    cg.free_reg(val);
  }

  if lhs.ty.is_record() || lhs.ty.is_indirect() {
    copy_bytes(cg, reg_out, addr, lhs.ty.size());
  } else {
    load_scalar(cg, addr, &lhs.ty, reg_out);
  }
  cg.free_reg(addr);
}

fn lower_bitfield_assign(
  cg: &mut Codegen<'_>, op: Option<BinOp>, base: &Expr, member: &crate::types::Member,
  width: u8, rhs: &Expr, ty: &Type, reg_out: Reg,
) {
  let word_ty = Type::new_base(Base::UInt, crate::types::Qual::empty());
  let addr = cg.alloc_reg();
  lower_addr(cg, base, addr);
  if member.offset != 0 {
    let scratch = cg.alloc_reg();
    cg.block().append_op_imm(Opcode::Add, addr, addr, i64::from(member.offset), scratch);
    cg.free_reg(scratch);
  }

  let current = cg.alloc_reg();
  load_scalar(cg, addr, &word_ty, current);

  let newval = cg.alloc_reg();
  match op {
    None => lower_expr(cg, rhs, newval),
    Some(binop) => {
      let field_val = cg.alloc_reg();
      cg.append(Instruction::new(Opcode::Mov).op1(Operand::Reg(field_val)).op2(Operand::Reg(current)));
      extract_bitfield(cg, field_val, member.bit_offset, width, ty.is_unsigned());
      let rhs_reg = cg.alloc_reg();
      lower_expr(cg, rhs, rhs_reg);
      cg.append(Instruction::new(binop_opcode(binop))
        .op1(Operand::Reg(field_val)).op2(Operand::Reg(field_val)).op3(Operand::Reg(rhs_reg)));
      cg.free_reg(rhs_reg);
      cg.append(Instruction::new(Opcode::Mov).op1(Operand::Reg(newval)).op2(Operand::Reg(field_val)));
      cg.free_reg(field_val);
    }
  }

  let mask: i64 = ((1u64 << width) - 1) as i64;
  let scratch = cg.alloc_reg();
  cg.block().append_op_imm(Opcode::And, newval, newval, mask, scratch);
  if member.bit_offset != 0 {
    cg.block().append_op_imm(Opcode::Shl, newval, newval, i64::from(member.bit_offset), scratch);
  }
  let clear_mask = !(mask << member.bit_offset);
  cg.block().append_op_imm(Opcode::And, current, current, clear_mask, scratch);
  cg.free_reg(scratch);
  cg.append(Instruction::new(Opcode::Or).op1(Operand::Reg(current)).op2(Operand::Reg(current)).op3(Operand::Reg(newval)));
  store_scalar(cg, addr, &word_ty, current);

  cg.append(Instruction::new(Opcode::Mov).op1(Operand::Reg(reg_out)).op2(Operand::Reg(newval)));
  extract_bitfield(cg, reg_out, 0, width, ty.is_unsigned());
  cg.free_reg(newval);
  cg.free_reg(current);
  cg.free_reg(addr);
}

fn lower_statement_expr(cg: &mut Codegen<'_>, stmts: &Rc<Vec<crate::ast::Stmt>>, reg_out: Reg) {
  for (i, s) in stmts.iter().enumerate() {
    if i + 1 == stmts.len() {
      if let crate::ast::StmtKind::Expr(e) = &s.kind {
        lower_expr(cg, e, reg_out);
        continue;
      }
    }
    let _ = super::stmt::lower_stmt(cg, s);
  }
}

fn lower_builtin(cg: &mut Codegen<'_>, sel: Builtin, args: &[Expr], ty: &Type, reg_out: Reg) {
  match sel {
    Builtin::VaStart => {
      let addr = cg.alloc_reg();
      lower_addr(cg, &args[0], addr);
      let scratch = cg.alloc_reg();
      cg.block().append_op_imm(Opcode::Add, scratch, Reg::Rfp, i64::from(cg.variadic_offset()), scratch);
      store_scalar(cg, addr, &args[0].ty, scratch);
      cg.free_reg(scratch);
      cg.free_reg(addr);
    }
    Builtin::VaArg => {
      let ap_addr = cg.alloc_reg();
      lower_addr(cg, &args[0], ap_addr);
      let cur = cg.alloc_reg();
      load_scalar(cg, ap_addr, &args[0].ty, cur);
      if ty.is_record() || ty.is_indirect() {
        copy_bytes(cg, reg_out, cur, ty.size());
      } else {
        load_scalar(cg, cur, ty, reg_out);
      }
      let scratch = cg.alloc_reg();
      cg.block().append_op_imm(Opcode::Add, cur, cur, i64::from(ty.size().max(WORD_SIZE)), scratch);
      cg.free_reg(scratch);
      store_scalar(cg, ap_addr, &args[0].ty, cur);
      cg.free_reg(cur);
      cg.free_reg(ap_addr);
    }
    Builtin::VaEnd => {}
    Builtin::VaCopy => {
      let src = cg.alloc_reg();
      lower_expr(cg, &args[1], src);
      let dst_addr = cg.alloc_reg();
      lower_addr(cg, &args[0], dst_addr);
      store_scalar(cg, dst_addr, &args[0].ty, src);
      cg.free_reg(dst_addr);
      cg.free_reg(src);
    }
    Builtin::Alloca => {
      let size = cg.alloc_reg();
      lower_expr(cg, &args[0], size);
      cg.append(Instruction::new(Opcode::Sub).op1(Operand::Reg(Reg::Rsp)).op2(Operand::Reg(Reg::Rsp)).op3(Operand::Reg(size)));
      cg.append(Instruction::new(Opcode::Mov).op1(Operand::Reg(reg_out)).op2(Operand::Reg(Reg::Rsp)));
      cg.free_reg(size);
    }
    Builtin::Unreachable => {
      // No instruction: whatever produced this node guarantees control
      // never reaches here.
    }
    Builtin::ExpectBool => lower_expr(cg, &args[0], reg_out),
    Builtin::Func | Builtin::Function => {
      unreachable!("__func__/__FUNCTION__ are expanded to string literals while parsing")
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn short_circuit_and_restores_register_cursor() {
    let tu = crate::parser::Parser::new(b"int f(int a, int b) { return a && b; }", "t.c")
      .parse_translation_unit();
    let funcs = super::super::lower_translation_unit(&tu, false);
    assert_eq!(funcs.len(), 1);
  }

  #[test]
  fn struct_field_access_uses_member_offset() {
    let src = b"struct p { int x; int y; }; int f(struct p *a) { return a->y; }";
    let tu = crate::parser::Parser::new(src, "t.c").parse_translation_unit();
    let funcs = super::super::lower_translation_unit(&tu, false);
    assert_eq!(funcs.len(), 1);
  }
}
