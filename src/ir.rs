//! IR: basic blocks & instructions (§4.9).

use crate::intern::Atom;
use crate::scope::Linkage;
use crate::token::Token;
use crate::types::Type;

/// The ten general-purpose registers plus the four named special
/// registers, encoded exactly as spec.md §4.10/§6 describes: `r0..=r9` then
/// `rsp, rfp, rpp, rip`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Reg { R(u8), Rsp, Rfp, Rpp, Rip }

impl Reg {
  #[must_use] pub fn name(self) -> String {
    match self {
      Reg::R(n) => format!("r{n}"),
      Reg::Rsp => "rsp".into(),
      Reg::Rfp => "rfp".into(),
      Reg::Rpp => "rpp".into(),
      Reg::Rip => "rip".into(),
    }
  }

  /// Encode as the mix-byte value used inside [`Operand::Reg`] (`0x80..=0x8F`).
  #[must_use] pub fn encode(self) -> i8 {
    let v: u8 = match self {
      Reg::R(n) => { debug_assert!(n <= 9); 0x80 + n }
      Reg::Rsp => 0x8C, Reg::Rfp => 0x8D, Reg::Rpp => 0x8E, Reg::Rip => 0x8F,
    };
    v as i8
  }
}

/// An operand slot: either a register or a "mix" immediate in
/// `[-112, 127]`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Operand { Reg(Reg), Imm(i8) }

impl Operand {
  /// True if `n` fits the 8-bit mix-immediate range without falling back
  /// to an `imw` sequence.
  #[must_use] pub fn fits_mix(n: i64) -> bool { (-112..=127).contains(&n) }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Opcode {
  Nop, Value,
  Add, Sub, Mul, DivU, DivS, ModU, ModS, Zero, Inc, Dec, Sxs, Sxb, Trs, Trb,
  And, Or, Xor, Not, Shl, ShrU, ShrS, Rol, Ror, Mov, Bool, Isz,
  Ldw, Lds, Ldb, Stw, Sts, Stb, Push, Pop, Popd,
  Imw, CmpU, CmpS, Jz, Jnz, Jl, Jg, Jle, Jge, Jmp, Call, Ret, Enter, Leave, Sys,
}

impl Opcode {
  #[must_use] pub fn mnemonic(self) -> &'static str {
    match self {
      Opcode::Nop => "nop", Opcode::Value => "value",
      Opcode::Add => "add", Opcode::Sub => "sub", Opcode::Mul => "mul",
      Opcode::DivU => "divu", Opcode::DivS => "divs", Opcode::ModU => "modu", Opcode::ModS => "mods",
      Opcode::Zero => "zero", Opcode::Inc => "inc", Opcode::Dec => "dec",
      Opcode::Sxs => "sxs", Opcode::Sxb => "sxb", Opcode::Trs => "trs", Opcode::Trb => "trb",
      Opcode::And => "and", Opcode::Or => "or", Opcode::Xor => "xor", Opcode::Not => "not",
      Opcode::Shl => "shl", Opcode::ShrU => "shru", Opcode::ShrS => "shrs",
      Opcode::Rol => "rol", Opcode::Ror => "ror", Opcode::Mov => "mov",
      Opcode::Bool => "bool", Opcode::Isz => "isz",
      Opcode::Ldw => "ldw", Opcode::Lds => "lds", Opcode::Ldb => "ldb",
      Opcode::Stw => "stw", Opcode::Sts => "sts", Opcode::Stb => "stb",
      Opcode::Push => "push", Opcode::Pop => "pop", Opcode::Popd => "popd",
      Opcode::Imw => "imw", Opcode::CmpU => "cmpu", Opcode::CmpS => "cmps",
      Opcode::Jz => "jz", Opcode::Jnz => "jnz", Opcode::Jl => "jl", Opcode::Jg => "jg",
      Opcode::Jle => "jle", Opcode::Jge => "jge", Opcode::Jmp => "jmp",
      Opcode::Call => "call", Opcode::Ret => "ret", Opcode::Enter => "enter", Opcode::Leave => "leave",
      Opcode::Sys => "sys",
    }
  }

  #[must_use] pub fn is_terminator(self) -> bool {
    matches!(self, Opcode::Jmp | Opcode::Jz | Opcode::Jnz | Opcode::Jl | Opcode::Jg
      | Opcode::Jle | Opcode::Jge | Opcode::Ret)
  }

  /// Only `jmp` and unconditional `ret` truly end a block with no
  /// fallthrough; conditional jumps still need an explicit fallthrough
  /// block per spec.md §8 ("final instruction is JMP or RET").
  #[must_use] pub fn is_block_end(self) -> bool { matches!(self, Opcode::Jmp | Opcode::Ret) }
}

/// Invocation sigil (§6 glossary): selects the relocation/addressing
/// flavour of a label reference in the emitted assembly.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Sigil {
  /// `^`: absolute symbol address.
  Absolute,
  /// `&`: short relative reference.
  Relative,
}

/// The target of a `call`/`jmp`/`imw` instruction, per the
/// `instruction_argtypes_t` union in §4.9.
#[derive(Clone, Debug)]
pub enum Invocation {
  /// A plain immediate number (only valid for `imw`).
  Number(i64),
  /// A named external/internal symbol, e.g. a function or global.
  Name(Sigil, Atom),
  /// A generated `(prefix, number)` label, e.g. `_Lx1B`, `_Sx3`, `_Ix2`.
  Generated(Sigil, &'static str, u32),
}

impl std::fmt::Display for Invocation {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Invocation::Number(n) => write!(f, "{n}"),
      Invocation::Name(sigil, name) => write!(f, "{}{}", sigil_char(*sigil), name),
      Invocation::Generated(sigil, prefix, n) => write!(f, "{}{}{:X}", sigil_char(*sigil), prefix, n),
    }
  }
}

fn sigil_char(s: Sigil) -> char { match s { Sigil::Absolute => '^', Sigil::Relative => '&' } }

/// An assembly instruction: an opcode, up to three operand slots, and an
/// optional invocation target. Matches spec.md §3's `Instruction` record.
#[derive(Clone, Debug)]
pub struct Instruction {
  pub opcode: Opcode,
  pub ops: [Option<Operand>; 3],
  pub invocation: Option<Invocation>,
  /// Retained only when `-g` is active (spec.md §4.11).
  pub loc: Option<Token>,
}

impl Instruction {
  #[must_use] pub fn new(opcode: Opcode) -> Self {
    Instruction { opcode, ops: [None, None, None], invocation: None, loc: None }
  }

  #[must_use] pub fn op1(mut self, o: Operand) -> Self { self.ops[0] = Some(o); self }
  #[must_use] pub fn op2(mut self, o: Operand) -> Self { self.ops[1] = Some(o); self }
  #[must_use] pub fn op3(mut self, o: Operand) -> Self { self.ops[2] = Some(o); self }
  #[must_use] pub fn invoke(mut self, i: Invocation) -> Self { self.invocation = Some(i); self }
  #[must_use] pub fn with_loc(mut self, t: Option<Token>) -> Self { self.loc = t; self }
}

/// A basic block: a straight-line run of instructions entered only at the
/// top, exited only by its final jump/return.
pub struct BasicBlock {
  /// Numeric serial, or `-1` if this block only has a user label.
  pub label: i32,
  pub user_label: Option<Atom>,
  pub insts: Vec<Instruction>,
  pub emitted: bool,
}

impl BasicBlock {
  #[must_use] pub fn new_anonymous(label: i32) -> Self {
    BasicBlock { label, user_label: None, insts: Vec::with_capacity(8), emitted: false }
  }

  #[must_use] pub fn new_labeled(label: i32, user_label: Atom) -> Self {
    BasicBlock { label, user_label: Some(user_label), insts: Vec::with_capacity(8), emitted: false }
  }

  /// `block_append`: push a new instruction. The C original doubles a
  /// manually managed array starting at capacity 8; `Vec::push` already
  /// gives the same amortised behaviour, so this is a direct call.
  pub fn append(&mut self, inst: Instruction) { self.insts.push(inst); }

  /// `block_append_op_imm`: emit a two-operand arithmetic-with-immediate
  /// instruction, falling back to an `imw`-then-register sequence when the
  /// immediate does not fit the mix-byte range.
  pub fn append_op_imm(&mut self, op: Opcode, dst: Reg, src: Reg, imm: i64, scratch: Reg) {
    if Operand::fits_mix(imm) {
      self.append(Instruction::new(op)
        .op1(Operand::Reg(dst)).op2(Operand::Reg(src)).op3(Operand::Imm(imm as i8)));
    } else {
      self.append(Instruction::new(Opcode::Imw)
        .op1(Operand::Reg(scratch)).invoke(Invocation::Number(imm)));
      self.append(Instruction::new(op)
        .op1(Operand::Reg(dst)).op2(Operand::Reg(src)).op3(Operand::Reg(scratch)));
    }
  }

  /// `block_sub_rsp`: subtract `n` bytes from `rsp` (frame setup / local
  /// allocation).
  pub fn sub_rsp(&mut self, n: i64, scratch: Reg) {
    if n != 0 { self.append_op_imm(Opcode::Sub, Reg::Rsp, Reg::Rsp, n, scratch); }
  }

  /// `block_add_rsp`: add `n` bytes to `rsp` (frame teardown / argument
  /// cleanup).
  pub fn add_rsp(&mut self, n: i64, scratch: Reg) {
    if n != 0 { self.append_op_imm(Opcode::Add, Reg::Rsp, Reg::Rsp, n, scratch); }
  }

  #[must_use] pub fn ends_block(&self) -> bool {
    self.insts.last().is_some_and(|i| i.opcode.is_block_end())
  }
}

/// A compiled function: type, names, AST-derived basic blocks, the
/// variadic stack offset used by `va_start`, and the linkage/weak/priority
/// decoration the emitter needs for the function's header line.
pub struct FunctionIr {
  pub ty: Type,
  pub name: Atom,
  pub asm_name: Atom,
  pub blocks: Vec<BasicBlock>,
  pub variadic_offset: i32,
  pub linkage: Linkage,
  pub weak: bool,
  pub ctor_priority: Option<u32>,
  pub dtor_priority: Option<u32>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn append_op_imm_uses_single_instruction_in_range() {
    let mut b = BasicBlock::new_anonymous(0);
    b.append_op_imm(Opcode::Add, Reg::R(0), Reg::R(0), 1, Reg::R(1));
    assert_eq!(b.insts.len(), 1);
  }

  #[test]
  fn append_op_imm_falls_back_out_of_range() {
    let mut b = BasicBlock::new_anonymous(0);
    b.append_op_imm(Opcode::Add, Reg::R(0), Reg::R(0), 1000, Reg::R(1));
    assert_eq!(b.insts.len(), 2);
    assert_eq!(b.insts[0].opcode, Opcode::Imw);
  }

  #[test]
  fn mix_range_boundaries() {
    assert!(Operand::fits_mix(-112));
    assert!(Operand::fits_mix(127));
    assert!(!Operand::fits_mix(-113));
    assert!(!Operand::fits_mix(128));
  }

  #[test]
  fn every_finished_block_ends_in_jmp_or_ret() {
    let mut b = BasicBlock::new_anonymous(0);
    b.append(Instruction::new(Opcode::Ret));
    assert!(b.ends_block());
  }
}
