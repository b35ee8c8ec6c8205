//! Code generator (§4.10): a tree-walking lowerer from the typed AST to
//! basic-block-structured IR, with a cursor-and-wrap register allocator in
//! place of graph colouring.

mod expr;
mod init;
mod stmt;

use std::cell::RefCell;
use std::rc::Rc;
use hashbrown::HashMap;
use log::debug;
use crate::ast::FunctionDef;
use crate::intern::Atom;
use crate::ir::{BasicBlock, FunctionIr, Instruction, Invocation, Opcode, Operand, Reg, Sigil};
use crate::parser::TranslationUnit;
use crate::types::{Type, WORD_SIZE};

thread_local! {
  static STRING_LITERALS: RefCell<Vec<Rc<[u8]>>> = const { RefCell::new(Vec::new()) };
}

/// Interns one string-literal's bytes for later data-section emission,
/// returning the numeric suffix of its generated `_Sx<n>` label.
pub(crate) fn intern_string_literal(bytes: Rc<[u8]>) -> u32 {
  STRING_LITERALS.with(|v| {
    let mut v = v.borrow_mut();
    v.push(bytes);
    u32::try_from(v.len() - 1).unwrap()
  })
}

/// Drains the accumulated string-literal table for `emit.rs` to render as
/// `_Sx<n>` data chunks. Call once per translation unit, after lowering.
pub fn take_string_literals() -> Vec<Rc<[u8]>> {
  STRING_LITERALS.with(|v| std::mem::take(&mut *v.borrow_mut()))
}

/// A jump target within the current function: an internally generated,
/// relatively addressed block label (§4.11's `_Lx` naming).
pub(crate) fn jmp_target(label: i32) -> Invocation {
  Invocation::Generated(Sigil::Relative, "_Lx", label as u32)
}

/// Threads non-local control flow (`return`/`break`/`continue`/`goto`)
/// through statement lowering, mirroring the teacher's own `Block<T> =
/// Result<T, Diverged>` pattern for unreachable-code short-circuiting. Not
/// a user-facing error: the single fatal-error kind (`diag::fatal`) is
/// unaffected by this.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Diverged;

pub(crate) type Flow = Result<(), Diverged>;

/// Per-allocation bookkeeping for the cursor register allocator: whether
/// this allocation clobbered (and therefore must later restore) a register
/// still logically live from an earlier wrap of the r0..r9 cycle.
struct RegAlloc {
  cursor: u8,
  loop_count: u32,
  /// Almost never holds more than the 10 architectural registers; a
  /// `SmallVec` keeps the common case off the heap entirely.
  stack: smallvec::SmallVec<[(Reg, bool); 10]>,
}

impl RegAlloc {
  fn new() -> Self { RegAlloc { cursor: 0, loop_count: 0, stack: smallvec::SmallVec::new() } }

  /// `register_next`: hand out the next register in the r0..r9 cycle,
  /// pushing the outgoing value to the VM stack first if this allocation
  /// wraps past a still-live one (11th concurrent allocation onward).
  fn alloc(&mut self, block: &mut BasicBlock) -> Reg {
    let reg = Reg::R(self.cursor);
    let needs_push = self.stack.len() >= 10;
    if needs_push {
      block.append(Instruction::new(Opcode::Push).op1(Operand::Reg(reg)));
      self.loop_count += 1;
    }
    self.stack.push((reg, needs_push));
    self.cursor = (self.cursor + 1) % 10;
    reg
  }

  /// `register_free`: release the most recently allocated register (strict
  /// LIFO discipline), restoring the spilled value if the matching `alloc`
  /// performed a push.
  fn free(&mut self, block: &mut BasicBlock, reg: Reg) {
    let (top, had_push) = self.stack.pop().expect("register_free without a matching alloc");
    debug_assert_eq!(top, reg, "register_free must free the most recently allocated register");
    self.cursor = if self.cursor == 0 { 9 } else { self.cursor - 1 };
    if had_push {
      block.append(Instruction::new(Opcode::Pop).op1(Operand::Reg(reg)));
      self.loop_count -= 1;
    }
  }

  fn mark(&self) -> (u8, u32, usize) { (self.cursor, self.loop_count, self.stack.len()) }
}

/// Stack-frame layout: negative offsets from `rfp` for locals and
/// register-delivered parameters, positive offsets for stack-passed
/// arguments and the indirect-return pointer slot.
struct Frame {
  offsets: HashMap<Atom, i32>,
  size: u32,
  reg_args: Vec<Atom>,
  return_indirect: bool,
  variadic_offset: i32,
}

impl Frame {
  /// A frame with no locals/parameters, for the synthetic static-initializer
  /// constructor functions which only ever need `rfp`-relative addressing
  /// of globals (which is to say, none at all).
  fn empty() -> Self {
    Frame { offsets: HashMap::new(), size: 0, reg_args: Vec::new(), return_indirect: false, variadic_offset: 0 }
  }
}

fn assign_frame_offsets(def: &FunctionDef) -> Frame {
  let ty = def.sym.borrow().ty.clone().expect("function symbol has a type");
  let func = ty.function().expect("function type");
  let return_indirect = func.ret.is_indirect();
  let mut offsets = HashMap::new();
  let mut reg_args = Vec::new();
  let mut neg: i32 = 0;
  let mut reg_slot = 0u32;
  // rfp+4 holds the return address; rfp+8 holds the indirect-return pointer
  // when present (spec.md §4.10), and stack-passed arguments follow that.
  let mut stack_off: i32 = if return_indirect { 12 } else { 8 };
  for p in &def.params {
    let indirect = p.ty.is_indirect();
    if !indirect && reg_slot < 4 {
      neg -= i32::try_from(WORD_SIZE).unwrap();
      offsets.insert(p.name, neg);
      reg_args.push(p.name);
      reg_slot += 1;
    } else {
      offsets.insert(p.name, stack_off);
      stack_off += i32::try_from(WORD_SIZE).unwrap();
    }
  }
  walk_locals(&def.body, &mut neg, &mut offsets);
  let variadic_offset = offsets.values().copied().min().unwrap_or(0) - i32::try_from(WORD_SIZE).unwrap();
  Frame { offsets, size: u32::try_from(-neg).unwrap_or(0), reg_args, return_indirect, variadic_offset }
}

fn prescan_labels(s: &crate::ast::Stmt, next: &mut i32, labels: &mut HashMap<Atom, i32>) {
  use crate::ast::StmtKind;
  match &s.kind {
    StmtKind::Label(name, inner) => {
      labels.insert(*name, *next);
      *next += 1;
      prescan_labels(inner, next, labels);
    }
    StmtKind::Compound(stmts) => for st in stmts { prescan_labels(st, next, labels) },
    StmtKind::If(_, t, f) => {
      prescan_labels(t, next, labels);
      if let Some(f) = f { prescan_labels(f, next, labels) }
    }
    StmtKind::While(_, body) | StmtKind::DoWhile(body, _) => prescan_labels(body, next, labels),
    StmtKind::For { init, body, .. } => {
      if let Some(init) = init { prescan_labels(init, next, labels) }
      prescan_labels(body, next, labels);
    }
    StmtKind::Switch { cases, body, .. } => {
      for c in cases.borrow().iter() {
        c.block_label.set(*next);
        *next += 1;
      }
      prescan_labels(body, next, labels);
    }
    StmtKind::Case(_, body) | StmtKind::Default(body) => prescan_labels(body, next, labels),
    _ => {}
  }
}

fn walk_locals(s: &crate::ast::Stmt, neg: &mut i32, offsets: &mut HashMap<Atom, i32>) {
  use crate::ast::StmtKind;
  match &s.kind {
    StmtKind::Decl(decls) => {
      for d in decls {
        let align = i32::try_from(d.ty.align()).unwrap_or(1).max(1);
        let size = i32::try_from(d.ty.size()).unwrap_or(0);
        *neg -= size;
        *neg = -((-*neg + align - 1) / align * align);
        offsets.insert(d.name, *neg);
        d.sym.borrow_mut().frame_offset = Some(*neg);
      }
    }
    StmtKind::Compound(stmts) => for st in stmts { walk_locals(st, neg, offsets) },
    StmtKind::If(_, t, f) => {
      walk_locals(t, neg, offsets);
      if let Some(f) = f { walk_locals(f, neg, offsets) }
    }
    StmtKind::While(_, body) | StmtKind::DoWhile(body, _) | StmtKind::Label(_, body)
      | StmtKind::Case(_, body) | StmtKind::Default(body) => walk_locals(body, neg, offsets),
    StmtKind::For { init, body, .. } => {
      if let Some(init) = init { walk_locals(init, neg, offsets) }
      walk_locals(body, neg, offsets);
    }
    StmtKind::Switch { body, .. } => walk_locals(body, neg, offsets),
    _ => {}
  }
}

/// A loop (or switch) nesting level: `break` always targets `break_label`;
/// `continue` targets the nearest frame with a `continue_label`, skipping
/// switch frames the way the parser's own `check_continue` already does.
pub(crate) struct LoopFrame {
  pub(crate) break_label: i32,
  pub(crate) continue_label: Option<i32>,
}

/// Per-function lowering state.
pub(crate) struct Codegen<'a> {
  blocks: Vec<BasicBlock>,
  cur: usize,
  reg: RegAlloc,
  frame: &'a Frame,
  next_label: i32,
  debug_info: bool,
  cur_tok: Option<crate::token::Token>,
  pub(crate) loop_stack: Vec<LoopFrame>,
  pub(crate) switch_cases: Vec<Rc<RefCell<Vec<crate::ast::CaseLabel>>>>,
  pub(crate) label_blocks: HashMap<Atom, i32>,
  cur_func_ret: Type,
  return_indirect: bool,
}

impl<'a> Codegen<'a> {
  fn new(
    frame: &'a Frame, cur_func_ret: Type, label_blocks: HashMap<Atom, i32>, next_label: i32,
    debug_info: bool,
  ) -> Self {
    Codegen {
      blocks: vec![BasicBlock::new_anonymous(0)],
      cur: 0,
      reg: RegAlloc::new(),
      frame,
      next_label,
      debug_info,
      cur_tok: None,
      loop_stack: Vec::new(),
      switch_cases: Vec::new(),
      label_blocks,
      cur_func_ret,
      return_indirect: frame.return_indirect,
    }
  }

  pub(crate) fn block(&mut self) -> &mut BasicBlock { &mut self.blocks[self.cur] }

  /// Records the source token that subsequent [`Self::append`] calls should
  /// stamp instructions with, when debug info (`-g`) is on. A no-op (and
  /// the token is not even cloned) when it is off, matching spec.md
  /// §4.11's "tokens are dropped early to save memory" without `-g`.
  pub(crate) fn set_loc(&mut self, tok: Option<&crate::token::Token>) {
    if self.debug_info {
      self.cur_tok = tok.cloned();
    }
  }

  /// Appends an instruction to the current block, stamping it with the
  /// most recently set source location when debug info is retained.
  pub(crate) fn append(&mut self, inst: Instruction) {
    let inst = if self.debug_info { inst.with_loc(self.cur_tok.clone()) } else { inst };
    self.block().append(inst);
  }

  pub(crate) fn new_block(&mut self) -> i32 {
    let label = self.next_label;
    self.next_label += 1;
    self.blocks.push(BasicBlock::new_anonymous(label));
    label
  }

  /// Pushes a block using a serial already reserved by `prescan_labels`
  /// (a forward-referenced `goto` target or `case`/`default` arm), or by
  /// [`Self::reserve_label`].
  pub(crate) fn push_reserved_block(&mut self, label: i32) {
    self.blocks.push(BasicBlock::new_anonymous(label));
  }

  /// Reserves a block serial without pushing the block yet: used where a
  /// branch's merge point may turn out to be unreachable (both arms of an
  /// `if` diverge) and must not be materialised as a dangling,
  /// never-terminated block.
  pub(crate) fn reserve_label(&mut self) -> i32 {
    let label = self.next_label;
    self.next_label += 1;
    label
  }

  pub(crate) fn switch_to(&mut self, label: i32) {
    self.cur = self.blocks.iter().position(|b| b.label == label)
      .expect("switch_to an unknown block label");
  }

  pub(crate) fn alloc_reg(&mut self) -> Reg { let b = self.cur; self.reg.alloc(&mut self.blocks[b]) }
  pub(crate) fn free_reg(&mut self, r: Reg) { let b = self.cur; self.reg.free(&mut self.blocks[b], r) }
  pub(crate) fn reg_mark(&self) -> (u8, u32, usize) { self.reg.mark() }
  pub(crate) fn live_regs(&self) -> Vec<Reg> { self.reg.stack.iter().map(|(r, _)| *r).collect() }

  pub(crate) fn local_offset(&self, name: Atom) -> Option<i32> { self.frame.offsets.get(&name).copied() }
  pub(crate) fn variadic_offset(&self) -> i32 { self.frame.variadic_offset }
  pub(crate) fn cur_func_ret(&self) -> Type { self.cur_func_ret.clone() }
  pub(crate) fn return_indirect(&self) -> bool { self.return_indirect }
}

/// Lower every function definition and the global-initialisation pass into
/// IR, ready for `emit.rs`. `debug_info` mirrors the `-g` flag: when set,
/// every emitted instruction carries the source token it was lowered from,
/// for `#line` directive emission.
pub fn lower_translation_unit(tu: &TranslationUnit, debug_info: bool) -> Vec<FunctionIr> {
  let mut out = Vec::new();
  for def in &tu.functions {
    debug!("codegen: function {}", def.sym.borrow().name.as_string());
    out.push(lower_function(def, debug_info));
  }
  out.extend(init::lower_static_initializers(&tu.globals, debug_info));
  out
}

fn lower_function(def: &FunctionDef, debug_info: bool) -> FunctionIr {
  let frame = assign_frame_offsets(def);
  let ty = def.sym.borrow().ty.clone().expect("function type");
  let ret = ty.function().expect("function type").ret.clone();

  let mut label_blocks = HashMap::new();
  let mut next_label = 1;
  prescan_labels(&def.body, &mut next_label, &mut label_blocks);
  let mut cg = Codegen::new(&frame, ret, label_blocks, next_label, debug_info);

  cg.block().append(Instruction::new(Opcode::Enter));
  cg.block().sub_rsp(i64::from(frame.size), Reg::R(9));
  for (i, name) in frame.reg_args.iter().enumerate() {
    let off = frame.offsets[name];
    let src = match i {
      0 => Reg::R(0), 1 => Reg::R(1), 2 => Reg::R(2), _ => Reg::R(3),
    };
    cg.block().append(Instruction::new(Opcode::Stw)
      .op1(Operand::Reg(Reg::Rfp)).op2(Operand::Imm(clamp_imm(i64::from(off)))).op3(Operand::Reg(src)));
  }

  let _ = stmt::lower_stmt(&mut cg, &def.body);
  if !cg.block().ends_block() {
    implicit_return(&mut cg, def);
  }

  let variadic_offset = frame.variadic_offset;
  def.variadic_offset.set(variadic_offset);

  let sym = def.sym.borrow();
  FunctionIr {
    ty, name: sym.name, asm_name: sym.asm_name,
    blocks: cg.blocks, variadic_offset,
    linkage: sym.linkage,
    weak: sym.flags.contains(crate::scope::SymbolFlags::WEAK),
    ctor_priority: if sym.flags.contains(crate::scope::SymbolFlags::CONSTRUCTOR) { sym.ctor_priority } else { None },
    dtor_priority: if sym.flags.contains(crate::scope::SymbolFlags::DESTRUCTOR) { sym.ctor_priority } else { None },
  }
}

/// `main` without a terminating `return` implicitly returns 0; any other
/// void function without one simply falls off the end into `leave`/`ret`.
fn implicit_return(cg: &mut Codegen<'_>, def: &FunctionDef) {
  if def.sym.borrow().name.as_string() == "main" {
    cg.block().append(Instruction::new(Opcode::Zero).op1(Operand::Reg(Reg::R(0))));
  }
  cg.block().append(Instruction::new(Opcode::Leave));
  cg.block().append(Instruction::new(Opcode::Ret));
}

pub(crate) fn clamp_imm(n: i64) -> i8 {
  debug_assert!((-112..=127).contains(&n), "offset out of mix-immediate range: {n}");
  n as i8
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_main_ends_in_ret() {
    let tu = crate::parser::Parser::new(b"int main(void) {}", "t.c").parse_translation_unit();
    let funcs = lower_translation_unit(&tu, false);
    assert_eq!(funcs.len(), 1);
    let last_block = funcs[0].blocks.last().unwrap();
    assert_eq!(last_block.insts.last().unwrap().opcode, Opcode::Ret);
  }

  #[test]
  fn register_cursor_restores_after_binary_expr() {
    let tu = crate::parser::Parser::new(b"int f(int a, int b) { return a*b+1; }", "t.c")
      .parse_translation_unit();
    let funcs = lower_translation_unit(&tu, false);
    assert_eq!(funcs.len(), 1);
  }
}
