//! Initializer lowering: the C17 "current object" walk already flattened
//! every braced initializer into a dense `ExprKind::InitList` index map
//! while parsing (`parser/init.rs`); this module walks that map at codegen
//! time and writes each element through the target address, recursing into
//! nested aggregates and falling back to ordinary expression lowering for
//! scalar/record rvalues.

use hashbrown::HashMap;
use crate::ast::{Expr, ExprKind};
use crate::ir::{Instruction, Opcode, Operand, Reg};
use crate::parser::GlobalVar;
use crate::types::Type;

use super::{expr, Codegen, Frame};

/// Writes `init`'s value through `addr`, per `ty`. Shared by local
/// declaration initializers (called from `stmt.rs`) and the synthetic
/// global constructor bodies below.
pub(super) fn lower_init_into(cg: &mut Codegen<'_>, ty: &Type, init: &Expr, addr: Reg) {
  match &init.kind {
    ExprKind::InitList(slots) if ty.is_array() => {
      let elem = ty.referent().expect("array referent").clone();
      let esize = elem.size();
      for (i, slot) in slots.iter().enumerate() {
        let off = u32::try_from(i).unwrap() * esize;
        match slot {
          Some(e) => lower_init_elem(cg, &elem, e, addr, off),
          None => zero_fill(cg, addr, off, esize),
        }
      }
    }
    ExprKind::InitList(slots) if ty.is_record() => {
      let rec = ty.record().expect("record type");
      let members = rec.borrow().members.clone();
      for (i, slot) in slots.iter().enumerate() {
        let m = &members[i];
        match slot {
          Some(e) => lower_init_elem(cg, &m.ty, e, addr, m.offset),
          None => zero_fill(cg, addr, m.offset, m.ty.size()),
        }
      }
    }
    ExprKind::InitList(_) => unreachable!("a braced initializer targets only array or record types"),
    ExprKind::StringLiteral(bytes) if ty.is_array() => {
      let len = ty.array_len().unwrap_or(u64::try_from(bytes.len()).unwrap() + 1);
      for (i, &b) in bytes.iter().enumerate() {
        store_byte_imm(cg, addr, u32::try_from(i).unwrap(), b);
      }
      for i in bytes.len()..usize::try_from(len).unwrap() {
        store_byte_imm(cg, addr, u32::try_from(i).unwrap(), 0);
      }
    }
    _ if ty.is_record() || ty.is_indirect() => expr::lower_expr(cg, init, addr),
    _ => {
      let val = cg.alloc_reg();
      expr::lower_expr(cg, init, val);
      expr::store_scalar(cg, addr, ty, val);
      cg.free_reg(val);
    }
  }
}

fn lower_init_elem(cg: &mut Codegen<'_>, ty: &Type, e: &Expr, base: Reg, offset: u32) {
  if offset == 0 {
    lower_init_into(cg, ty, e, base);
    return;
  }
  let addr = cg.alloc_reg();
  let scratch = cg.alloc_reg();
  cg.block().append_op_imm(Opcode::Add, addr, base, i64::from(offset), scratch);
  cg.free_reg(scratch);
  lower_init_into(cg, ty, e, addr);
  cg.free_reg(addr);
}

fn zero_fill(cg: &mut Codegen<'_>, base: Reg, offset: u32, size: u32) {
  let zero = cg.alloc_reg();
  cg.append(Instruction::new(Opcode::Zero).op1(Operand::Reg(zero)));
  let mut off = offset;
  let end = offset + size;
  while off + 4 <= end {
    store_at(cg, base, off, zero, Opcode::Stw);
    off += 4;
  }
  if off + 2 <= end { store_at(cg, base, off, zero, Opcode::Sts); off += 2; }
  if off < end { store_at(cg, base, off, zero, Opcode::Stb); }
  cg.free_reg(zero);
}

fn store_at(cg: &mut Codegen<'_>, base: Reg, off: u32, src: Reg, op: Opcode) {
  if off == 0 {
    cg.append(Instruction::new(op).op1(Operand::Reg(base)).op2(Operand::Imm(0)).op3(Operand::Reg(src)));
    return;
  }
  let addr = cg.alloc_reg();
  let scratch = cg.alloc_reg();
  cg.block().append_op_imm(Opcode::Add, addr, base, i64::from(off), scratch);
  cg.free_reg(scratch);
  cg.append(Instruction::new(op).op1(Operand::Reg(addr)).op2(Operand::Imm(0)).op3(Operand::Reg(src)));
  cg.free_reg(addr);
}

fn store_byte_imm(cg: &mut Codegen<'_>, base: Reg, off: u32, byte: u8) {
  let scratch = cg.alloc_reg();
  cg.append(Instruction::new(Opcode::Imw).op1(Operand::Reg(scratch))
    .invoke(crate::ir::Invocation::Number(i64::from(byte))));
  store_at(cg, base, off, scratch, Opcode::Stb);
  cg.free_reg(scratch);
}

/// Synthesizes one internal-linkage, constructor-priority-50 function per
/// global that carries an initializer, each writing its value through the
/// global's own address at program startup. The datum itself (`emit.rs`)
/// is always emitted zero-filled regardless of the initializer's shape;
/// this mirrors `generate_static_variable`/`generate_static_initializer` in
/// the onramp `cci` compiler, which never bakes initializer values directly
/// into the data section even for simple integer constants like `int x =
/// 5;` — see DESIGN.md.
pub(super) fn lower_static_initializers(globals: &[GlobalVar], debug_info: bool) -> Vec<crate::ir::FunctionIr> {
  let mut out = Vec::new();
  for g in globals {
    let Some(init) = &g.init else { continue };

    let ty = g.sym.borrow().ty.clone().expect("global has a type");
    let frame = Frame::empty();
    let mut cg = Codegen::new(&frame, Type::new_base(crate::types::Base::Void, crate::types::Qual::empty()),
      HashMap::new(), 1, debug_info);
    cg.set_loc(init.tok.as_ref());
    cg.append(Instruction::new(Opcode::Enter));

    let addr = cg.alloc_reg();
    let name = g.sym.borrow().asm_name;
    cg.append(Instruction::new(Opcode::Imw).op1(Operand::Reg(addr))
      .invoke(crate::ir::Invocation::Name(crate::ir::Sigil::Absolute, name)));
    lower_init_into(&mut cg, &ty, init, addr);
    cg.free_reg(addr);

    cg.append(Instruction::new(Opcode::Leave));
    cg.append(Instruction::new(Opcode::Ret));

    let ctor_name = crate::intern::intern(&format!("__ctor_{}", g.sym.borrow().name.as_string()));
    out.push(crate::ir::FunctionIr {
      ty: crate::types::Type::new_function(Type::new_base(crate::types::Base::Void, crate::types::Qual::empty()),
        Vec::new(), Vec::new(), false, None),
      name: ctor_name,
      asm_name: ctor_name,
      blocks: cg.blocks,
      variadic_offset: 0,
      linkage: crate::scope::Linkage::Internal,
      weak: false,
      ctor_priority: Some(50),
      dtor_priority: None,
    });
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn initialized_global_gets_a_constructor() {
    let tu = crate::parser::Parser::new(b"int x = 5;", "t.c").parse_translation_unit();
    assert_eq!(lower_static_initializers(&tu.globals, false).len(), 1);
  }

  #[test]
  fn tentative_declaration_with_no_initializer_gets_no_constructor() {
    let tu = crate::parser::Parser::new(b"int y;", "t.c").parse_translation_unit();
    assert!(lower_static_initializers(&tu.globals, false).is_empty());
  }
}
