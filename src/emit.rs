//! Text assembly writer (§4.11): renders lowered IR as Onramp textual
//! assembly. One labelled chunk per function or global datum, separated
//! by a blank-line divider, with an optional depth-first block reordering
//! under `-O` and a `#line`-suppression state machine gated on whether
//! `-g` retained source tokens on each instruction.

use std::io::{self, Write};
use std::rc::Rc;

use crate::ir::{BasicBlock, FunctionIr, Instruction, Invocation, Opcode, Operand, Sigil};
use crate::parser::GlobalVar;
use crate::scope::Linkage;
use crate::token::Token;

const ASM_INDENT: &str = "  ";

/// Writes a whole translation unit's worth of IR: the `#line manual`
/// header, every global's zero-filled datum, every interned string
/// literal, then every function (user-defined and synthesised
/// constructor/destructor alike — both arrive as plain [`FunctionIr`]s).
pub fn emit_translation_unit<W: Write>(
  out: &mut W,
  globals: &[GlobalVar],
  strings: &[Rc<[u8]>],
  functions: &[FunctionIr],
  optimize: bool,
) -> io::Result<()> {
  let mut e = Emitter { out, optimize, current_location: None };
  e.write_cstr("#line manual\n")?;
  e.global_divider()?;

  for g in globals {
    e.emit_global(g)?;
    e.global_divider()?;
  }
  for (i, bytes) in strings.iter().enumerate() {
    e.emit_string_chunk(i as u32, bytes)?;
    e.global_divider()?;
  }
  for f in functions {
    e.emit_function(f)?;
    e.global_divider()?;
  }
  Ok(())
}

struct Emitter<'w, W: Write> {
  out: &'w mut W,
  optimize: bool,
  current_location: Option<Token>,
}

impl<W: Write> Emitter<'_, W> {
  fn write_cstr(&mut self, s: &str) -> io::Result<()> { self.out.write_all(s.as_bytes()) }
  fn write_char(&mut self, c: char) -> io::Result<()> { write!(self.out, "{c}") }
  fn newline(&mut self) -> io::Result<()> { self.write_char('\n') }
  fn global_divider(&mut self) -> io::Result<()> { self.write_cstr("\n\n") }

  /// `@name` (internal linkage) or `=name` (external), zero-filled datum
  /// words, `(size+3)/4` of them, 16 per line, regardless of whether this
  /// global has an initialiser — the value itself is set at runtime by a
  /// synthesised constructor function (see `codegen::init`), never baked
  /// into the data section.
  fn emit_global(&mut self, g: &GlobalVar) -> io::Result<()> {
    let sym = g.sym.borrow();
    self.write_char(if sym.linkage == Linkage::Internal { '@' } else { '=' })?;
    self.write_cstr(&sym.asm_name.as_string())?;
    self.newline()?;

    let size = sym.ty.as_ref().expect("global has a type").size();
    let mut count = (size + 3) / 4;
    let mut col = 0u32;
    while count > 0 {
      count -= 1;
      if col == 0 {
        self.write_cstr(ASM_INDENT)?;
      } else {
        self.write_char(' ')?;
      }
      self.write_char('0')?;
      col = (col + 1) % 16;
    }
    self.newline()
  }

  /// A string literal datum chunk: header `@_Sx<hex>`, the bytes chunked
  /// into alternating `"`-quoted printable runs and `'HH` hex escapes, a
  /// trailing NUL terminator.
  fn emit_string_chunk(&mut self, id: u32, bytes: &[u8]) -> io::Result<()> {
    self.write_char('@')?;
    self.write_cstr("_Sx")?;
    write!(self.out, "{id:X}")?;
    self.newline()?;

    self.write_cstr(ASM_INDENT)?;
    self.emit_quoted_bytes(bytes)?;
    self.newline()?;
    self.write_cstr(ASM_INDENT)?;
    self.emit_hex_byte(0)?;
    self.newline()
  }

  fn emit_quoted_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
    let mut open = false;
    for &b in bytes {
      let valid = is_string_byte_valid_assembly(b);
      if valid != open {
        self.write_char('"')?;
        open = valid;
      }
      if valid {
        self.write_char(b as char)?;
      } else {
        self.emit_hex_byte(b)?;
      }
    }
    if open { self.write_char('"')?; }
    Ok(())
  }

  fn emit_hex_byte(&mut self, b: u8) -> io::Result<()> {
    write!(self.out, "'{b:02X}")
  }

  /// `@`/`=` + optional `?` (weak) + optional `{priority` (constructor) or
  /// `}priority` (destructor) + the assembly name, then every basic block.
  fn emit_function(&mut self, f: &FunctionIr) -> io::Result<()> {
    self.write_char(if f.linkage == Linkage::Internal { '@' } else { '=' })?;
    if f.weak {
      self.write_char('?')?;
    }
    if let Some(p) = f.ctor_priority {
      self.write_char('{')?;
      write!(self.out, "{p}")?;
    }
    if let Some(p) = f.dtor_priority {
      self.write_char('}')?;
      write!(self.out, "{p}")?;
    }
    self.write_cstr(&f.asm_name.as_string())?;
    self.newline()?;

    let mut emitted = vec![false; f.blocks.len()];
    for start in 0..f.blocks.len() {
      if !emitted[start] {
        self.emit_block_chain(f, start, &mut emitted)?;
      }
    }
    Ok(())
  }

  /// Emits `blocks[start]` and, under `-O`, follows a trailing unconditional
  /// `jmp` to its target block depth-first (eliding the jump itself) as
  /// long as that target has not already been emitted.
  fn emit_block_chain(&mut self, f: &FunctionIr, start: usize, emitted: &mut [bool]) -> io::Result<()> {
    let mut cur = start;
    loop {
      emitted[cur] = true;
      let block = &f.blocks[cur];
      self.emit_block_header(block)?;

      if !block.ends_block() {
        panic!("internal error: a basic block must end in jmp or ret");
      }
      let mut count = block.insts.len();

      let mut next = None;
      if self.optimize {
        if let Some(last) = block.insts.last() {
          if last.opcode == Opcode::Jmp {
            if let Some(Invocation::Generated(Sigil::Relative, _, target_label)) = &last.invocation {
              if let Some(idx) = f.blocks.iter().position(|b| b.label == *target_label as i32) {
                if !emitted[idx] {
                  next = Some(idx);
                  count -= 1;
                }
              }
            }
          }
        }
      }

      for inst in &block.insts[..count] {
        self.emit_instruction(inst)?;
      }

      match next {
        Some(n) => cur = n,
        None => break,
      }
    }
    Ok(())
  }

  fn emit_block_header(&mut self, block: &BasicBlock) -> io::Result<()> {
    if block.label != -1 {
      self.write_char(':')?;
      write!(self.out, "_Lx{:X}", block.label)?;
      self.newline()?;
    }
    if let Some(name) = block.user_label {
      self.write_char(':')?;
      self.write_cstr(&name.as_string())?;
      self.newline()?;
    }
    Ok(())
  }

  fn emit_instruction(&mut self, inst: &Instruction) -> io::Result<()> {
    if inst.opcode == Opcode::Nop {
      return Ok(());
    }
    if let Some(tok) = &inst.loc {
      self.emit_source_location(tok.clone())?;
    }
    self.write_cstr(ASM_INDENT)?;
    self.write_cstr(inst.opcode.mnemonic())?;
    for op in inst.ops.iter().flatten() {
      self.emit_operand(*op)?;
    }
    if let Some(inv) = &inst.invocation {
      self.write_char(' ')?;
      write!(self.out, "{inv}")?;
    }
    self.newline()
  }

  fn emit_operand(&mut self, op: Operand) -> io::Result<()> {
    self.write_char(' ')?;
    match op {
      Operand::Reg(r) => self.write_cstr(&r.name()),
      Operand::Imm(n) => write!(self.out, "{n}"),
    }
  }

  /// `#line` suppression state machine: a full `#line N "file"` on file
  /// change or first use, a bare `#\n` continuation for a one-line
  /// advance, `#line N\n` for any larger same-file jump, nothing when the
  /// line hasn't moved.
  fn emit_source_location(&mut self, tok: Token) -> io::Result<()> {
    match &self.current_location {
      None => self.emit_source_location_full(&tok)?,
      Some(cur) if cur.filename().as_string() != tok.filename().as_string() => {
        self.emit_source_location_full(&tok)?;
      }
      Some(cur) if cur.line() == tok.line() => {}
      Some(cur) if cur.line() + 1 == tok.line() => self.write_cstr("#\n")?,
      Some(_) => write!(self.out, "#line {}\n", tok.line())?,
    }
    self.current_location = Some(tok);
    Ok(())
  }

  fn emit_source_location_full(&mut self, tok: &Token) -> io::Result<()> {
    write!(self.out, "#line {} ", tok.line())?;
    self.emit_quoted_bytes(tok.filename().as_string().as_bytes())?;
    self.newline()
  }
}

fn is_string_byte_valid_assembly(b: u8) -> bool {
  b != b'\\' && b != b'"' && b.is_ascii_graphic() || b == b' '
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codegen::{lower_translation_unit, take_string_literals};
  use crate::parser::Parser;

  fn compile(src: &[u8]) -> String {
    let tu = Parser::new(src, "t.c").parse_translation_unit();
    let functions = lower_translation_unit(&tu, false);
    let strings = take_string_literals();
    let mut out = Vec::new();
    emit_translation_unit(&mut out, &tu.globals, &strings, &functions, false).unwrap();
    String::from_utf8(out).unwrap()
  }

  #[test]
  fn empty_main_starts_with_enter_and_ends_with_ret() {
    let text = compile(b"int main(void) {}");
    assert!(text.contains("=main\n"));
    assert!(text.contains("  enter\n"));
    assert!(text.contains("  leave\n"));
    assert!(text.contains("  ret\n"));
  }

  #[test]
  fn static_function_uses_internal_sigil() {
    let text = compile(b"static int f(void) { return 0; }");
    assert!(text.contains("@f\n"));
  }

  #[test]
  fn global_with_initializer_gets_zero_datum_and_constructor() {
    let text = compile(b"int x = 5;");
    assert!(text.contains("=x\n  0\n"));
    assert!(text.contains("{50"));
  }

  #[test]
  fn string_literal_emits_quoted_chunk() {
    let text = compile(b"const char *s = \"hi\";");
    assert!(text.contains("_Sx0"));
    assert!(text.contains("\"hi\""));
  }
}
