//! Statement lowering: one arm per `StmtKind` variant, threading `Flow`
//! (`Ok(())` or `Err(Diverged)`) through compound statements so lowering
//! stops emitting dead code after a `return`/`break`/`continue`/`goto`.

use crate::ast::{Stmt, StmtKind};
use crate::ir::{Instruction, Opcode, Operand, Reg};

use super::{expr, init, jmp_target, Codegen, Diverged, Flow, LoopFrame};

pub(super) fn lower_stmt(cg: &mut Codegen<'_>, s: &Stmt) -> Flow {
  cg.set_loc(s.tok.as_ref());
  match &s.kind {
    StmtKind::Empty => Ok(()),
    StmtKind::Expr(e) => {
      let r = cg.alloc_reg();
      expr::lower_expr(cg, e, r);
      cg.free_reg(r);
      Ok(())
    }
    StmtKind::Decl(decls) => {
      for d in decls {
        if let Some(init_expr) = &d.init {
          let addr = cg.alloc_reg();
          expr::addr_of_symbol(cg, &d.sym, addr);
          init::lower_init_into(cg, &d.ty, init_expr, addr);
          cg.free_reg(addr);
        }
      }
      Ok(())
    }
    StmtKind::Compound(stmts) => {
      for st in stmts {
        lower_stmt(cg, st)?;
      }
      Ok(())
    }
    StmtKind::If(cond, t, f) => lower_if(cg, cond, t, f.as_deref()),
    StmtKind::While(cond, body) => lower_while(cg, cond, body),
    StmtKind::DoWhile(body, cond) => lower_do_while(cg, body, cond),
    StmtKind::For { init: finit, cond, step, body } => lower_for(cg, finit.as_deref(), cond.as_ref(), step.as_ref(), body),
    StmtKind::Switch { scrutinee, body, cases } => lower_switch(cg, scrutinee, body, cases),
    StmtKind::Case(label, body) => {
      cg.switch_to(label.block_label.get());
      lower_stmt(cg, body)
    }
    StmtKind::Default(body) => {
      let label = cg.switch_cases.last()
        .and_then(|cases| cases.borrow().iter().find(|c| c.is_default).map(|c| c.block_label.get()))
        .expect("a default statement must be inside a switch with a default label");
      cg.switch_to(label);
      lower_stmt(cg, body)
    }
    StmtKind::Break => {
      let frame = cg.loop_stack.last().expect("break outside a loop/switch");
      let target = frame.break_label;
      cg.append(Instruction::new(Opcode::Jmp).invoke(jmp_target(target)));
      Err(Diverged)
    }
    StmtKind::Continue => {
      let target = cg.loop_stack.iter().rev()
        .find_map(|f| f.continue_label)
        .expect("continue outside a loop");
      cg.append(Instruction::new(Opcode::Jmp).invoke(jmp_target(target)));
      Err(Diverged)
    }
    StmtKind::Return(value) => {
      lower_return(cg, value.as_ref());
      Err(Diverged)
    }
    StmtKind::Goto(name) => {
      let target = *cg.label_blocks.get(name).expect("goto target must have been prescanned");
      cg.append(Instruction::new(Opcode::Jmp).invoke(jmp_target(target)));
      Err(Diverged)
    }
    StmtKind::Label(name, inner) => {
      let label = *cg.label_blocks.get(name).expect("label must have been prescanned");
      if !cg.block().ends_block() {
        cg.append(Instruction::new(Opcode::Jmp).invoke(jmp_target(label)));
      }
      cg.push_reserved_block(label);
      cg.switch_to(label);
      lower_stmt(cg, inner)
    }
  }
}

fn lower_if(cg: &mut Codegen<'_>, cond: &crate::ast::Expr, t: &Stmt, f: Option<&Stmt>) -> Flow {
  let c = cg.alloc_reg();
  expr::lower_expr(cg, cond, c);
  let else_label = cg.new_block();
  cg.append(Instruction::new(Opcode::Jz).op1(Operand::Reg(c)).invoke(jmp_target(else_label)));
  cg.free_reg(c);

  let then_flow = lower_stmt(cg, t);
  // The merge point's serial is reserved but not yet materialised: if both
  // arms diverge it is unreachable and must never become a dangling block
  // with no terminating jmp/ret.
  let merge_label = cg.reserve_label();
  if then_flow.is_ok() {
    cg.append(Instruction::new(Opcode::Jmp).invoke(jmp_target(merge_label)));
  }

  cg.switch_to(else_label);
  let else_flow = match f {
    Some(f) => lower_stmt(cg, f),
    None => Ok(()),
  };
  if else_flow.is_ok() {
    cg.append(Instruction::new(Opcode::Jmp).invoke(jmp_target(merge_label)));
  }

  if then_flow.is_err() && else_flow.is_err() {
    return Err(Diverged);
  }
  cg.push_reserved_block(merge_label);
  cg.switch_to(merge_label);
  Ok(())
}

fn lower_while(cg: &mut Codegen<'_>, cond: &crate::ast::Expr, body: &Stmt) -> Flow {
  let head = cg.new_block();
  cg.append(Instruction::new(Opcode::Jmp).invoke(jmp_target(head)));
  cg.switch_to(head);
  let c = cg.alloc_reg();
  expr::lower_expr(cg, cond, c);
  let body_label = cg.new_block();
  let end_label = cg.new_block();
  cg.append(Instruction::new(Opcode::Jz).op1(Operand::Reg(c)).invoke(jmp_target(end_label)));
  cg.free_reg(c);
  cg.append(Instruction::new(Opcode::Jmp).invoke(jmp_target(body_label)));

  cg.switch_to(body_label);
  cg.loop_stack.push(LoopFrame { break_label: end_label, continue_label: Some(head) });
  let flow = lower_stmt(cg, body);
  cg.loop_stack.pop();
  if flow.is_ok() {
    cg.append(Instruction::new(Opcode::Jmp).invoke(jmp_target(head)));
  }

  cg.switch_to(end_label);
  Ok(())
}

fn lower_do_while(cg: &mut Codegen<'_>, body: &Stmt, cond: &crate::ast::Expr) -> Flow {
  let body_label = cg.new_block();
  cg.append(Instruction::new(Opcode::Jmp).invoke(jmp_target(body_label)));
  cg.switch_to(body_label);

  let cond_label = cg.new_block();
  let end_label = cg.new_block();
  cg.loop_stack.push(LoopFrame { break_label: end_label, continue_label: Some(cond_label) });
  let flow = lower_stmt(cg, body);
  cg.loop_stack.pop();
  if flow.is_ok() {
    cg.append(Instruction::new(Opcode::Jmp).invoke(jmp_target(cond_label)));
  }

  cg.switch_to(cond_label);
  let c = cg.alloc_reg();
  expr::lower_expr(cg, cond, c);
  cg.append(Instruction::new(Opcode::Jnz).op1(Operand::Reg(c)).invoke(jmp_target(body_label)));
  cg.free_reg(c);
  cg.append(Instruction::new(Opcode::Jmp).invoke(jmp_target(end_label)));

  cg.switch_to(end_label);
  Ok(())
}

fn lower_for(
  cg: &mut Codegen<'_>, finit: Option<&Stmt>, cond: Option<&crate::ast::Expr>,
  step: Option<&crate::ast::Expr>, body: &Stmt,
) -> Flow {
  if let Some(finit) = finit {
    lower_stmt(cg, finit)?;
  }

  let head = cg.new_block();
  cg.append(Instruction::new(Opcode::Jmp).invoke(jmp_target(head)));
  cg.switch_to(head);

  let body_label = cg.new_block();
  let step_label = cg.new_block();
  let end_label = cg.new_block();

  if let Some(cond) = cond {
    let c = cg.alloc_reg();
    expr::lower_expr(cg, cond, c);
    cg.append(Instruction::new(Opcode::Jz).op1(Operand::Reg(c)).invoke(jmp_target(end_label)));
    cg.free_reg(c);
  }
  cg.append(Instruction::new(Opcode::Jmp).invoke(jmp_target(body_label)));

  cg.switch_to(body_label);
  cg.loop_stack.push(LoopFrame { break_label: end_label, continue_label: Some(step_label) });
  let flow = lower_stmt(cg, body);
  cg.loop_stack.pop();
  if flow.is_ok() {
    cg.append(Instruction::new(Opcode::Jmp).invoke(jmp_target(step_label)));
  }

  cg.switch_to(step_label);
  if let Some(step) = step {
    let r = cg.alloc_reg();
    expr::lower_expr(cg, step, r);
    cg.free_reg(r);
  }
  cg.append(Instruction::new(Opcode::Jmp).invoke(jmp_target(head)));

  cg.switch_to(end_label);
  Ok(())
}

/// Unsigned-range case matching: `(scrutinee - lo) as unsigned <= (hi -
/// lo)` collapses both singleton (`lo == hi`) and ranged case labels to the
/// same three-instruction compare-and-branch, tried in declaration order;
/// `default` (if present) catches whatever falls through.
fn lower_switch(
  cg: &mut Codegen<'_>, scrutinee: &crate::ast::Expr, body: &Stmt,
  cases: &std::rc::Rc<std::cell::RefCell<Vec<crate::ast::CaseLabel>>>,
) -> Flow {
  let end_label = cg.new_block();
  let val = cg.alloc_reg();
  expr::lower_expr(cg, scrutinee, val);

  let default_label = cases.borrow().iter().find(|c| c.is_default).map(|c| c.block_label.get());
  for case in cases.borrow().iter().filter(|c| !c.is_default) {
    let span = case.hi - case.lo;
    // in_range = (val - lo) <= span, computed as !((diff) <u span) via the
    // same CmpU+shru-31 three-way-sign scheme as ordinary relational
    // operators, followed by one xor to flip "<" into "<=".
    let diff = cg.alloc_reg();
    let scratch = cg.alloc_reg();
    cg.block().append_op_imm(Opcode::Sub, diff, val, case.lo, scratch);
    cg.free_reg(scratch);

    let span_reg = cg.alloc_reg();
    cg.append(Instruction::new(Opcode::Imw).op1(Operand::Reg(span_reg)).invoke(crate::ir::Invocation::Number(span)));
    cg.append(Instruction::new(Opcode::CmpU).op1(Operand::Reg(diff)).op2(Operand::Reg(span_reg)).op3(Operand::Reg(diff)));
    cg.free_reg(span_reg);

    cg.append(Instruction::new(Opcode::ShrU).op1(Operand::Reg(diff)).op2(Operand::Reg(diff)).op3(Operand::Imm(31)));
    let scratch = cg.alloc_reg();
    cg.block().append_op_imm(Opcode::Xor, diff, diff, 1, scratch);
    cg.free_reg(scratch);

    cg.append(Instruction::new(Opcode::Jnz).op1(Operand::Reg(diff)).invoke(jmp_target(case.block_label.get())));
    cg.free_reg(diff);
  }
  cg.free_reg(val);
  cg.append(Instruction::new(Opcode::Jmp).invoke(jmp_target(default_label.unwrap_or(end_label))));

  cg.loop_stack.push(LoopFrame { break_label: end_label, continue_label: None });
  cg.switch_cases.push(cases.clone());
  let body_label = cg.new_block();
  cg.switch_to(body_label);
  let flow = lower_stmt(cg, body);
  cg.switch_cases.pop();
  cg.loop_stack.pop();
  if flow.is_ok() {
    cg.append(Instruction::new(Opcode::Jmp).invoke(jmp_target(end_label)));
  }

  cg.switch_to(end_label);
  Ok(())
}

fn lower_return(cg: &mut Codegen<'_>, value: Option<&crate::ast::Expr>) {
  let ret_ty = cg.cur_func_ret();
  match value {
    Some(e) if cg.return_indirect() => {
      let ptr = cg.alloc_reg();
      cg.append(Instruction::new(Opcode::Ldw).op1(Operand::Reg(ptr)).op2(Operand::Reg(Reg::Rfp)).op3(Operand::Imm(8)));
      expr::lower_expr(cg, e, ptr);
      cg.free_reg(ptr);
    }
    Some(e) if !ret_ty.is_void() => {
      let r = cg.alloc_reg();
      expr::lower_expr(cg, e, r);
      cg.append(Instruction::new(Opcode::Mov).op1(Operand::Reg(Reg::R(0))).op2(Operand::Reg(r)));
      cg.free_reg(r);
    }
    Some(e) => {
      let r = cg.alloc_reg();
      expr::lower_expr(cg, e, r);
      cg.free_reg(r);
    }
    None => {}
  }
  cg.append(Instruction::new(Opcode::Leave));
  cg.append(Instruction::new(Opcode::Ret));
}

#[cfg(test)]
mod tests {
  #[test]
  fn switch_with_ranged_case_lowers() {
    let src = b"int f(int x) { switch (x) { case 1 ... 3: return 1; default: return 0; } }";
    let tu = crate::parser::Parser::new(src, "t.c").parse_translation_unit();
    let funcs = super::super::lower_translation_unit(&tu, false);
    assert_eq!(funcs.len(), 1);
  }

  #[test]
  fn goto_forward_reference_resolves() {
    let src = b"int f(void) { goto done; return 1; done: return 0; }";
    let tu = crate::parser::Parser::new(src, "t.c").parse_translation_unit();
    let funcs = super::super::lower_translation_unit(&tu, false);
    assert_eq!(funcs.len(), 1);
  }

  #[test]
  fn nested_loop_continue_targets_innermost() {
    let src = b"int f(void) { int i; for (i = 0; i < 10; i = i + 1) { if (i == 5) continue; } return 0; }";
    let tu = crate::parser::Parser::new(src, "t.c").parse_translation_unit();
    let funcs = super::super::lower_translation_unit(&tu, false);
    assert_eq!(funcs.len(), 1);
  }
}
