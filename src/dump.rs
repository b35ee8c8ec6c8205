//! `-dump-ast` tree printer: a read-only view of the parsed AST for
//! debugging, selected between Unicode box-drawing and plain ASCII
//! connectors.

use crate::ast::{BinOp, Decl, Expr, ExprKind, FunctionDef, Stmt, StmtKind, UnOp};
use crate::parser::TranslationUnit;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Glyphs { Unicode, Ascii }

impl Glyphs {
  fn branch(self) -> &'static str { match self { Glyphs::Unicode => "\u{251c}\u{2500}\u{2500} ", Glyphs::Ascii => "|-- " } }
  fn corner(self) -> &'static str { match self { Glyphs::Unicode => "\u{2514}\u{2500}\u{2500} ", Glyphs::Ascii => "`-- " } }
  fn pipe(self) -> &'static str { match self { Glyphs::Unicode => "\u{2502}   ", Glyphs::Ascii => "|   " } }
}

const GAP: &str = "    ";

pub fn dump_translation_unit(tu: &TranslationUnit, glyphs: Glyphs) -> String {
  let mut out = String::new();
  for g in &tu.globals {
    out.push_str(&format!("global {}\n", g.sym.borrow().name.as_string()));
    if let Some(init) = &g.init {
      emit_expr(&mut out, "", true, glyphs, init);
    }
  }
  for f in &tu.functions {
    dump_function(&mut out, f, glyphs);
  }
  out
}

pub fn dump_function(out: &mut String, f: &FunctionDef, glyphs: Glyphs) {
  out.push_str(&format!("function {}\n", f.sym.borrow().name.as_string()));
  emit_stmt(out, "", true, glyphs, &f.body);
}

fn write_line(out: &mut String, prefix: &str, is_last: bool, glyphs: Glyphs, label: &str) -> String {
  out.push_str(prefix);
  out.push_str(if is_last { glyphs.corner() } else { glyphs.branch() });
  out.push_str(label);
  out.push('\n');
  format!("{prefix}{}", if is_last { GAP } else { glyphs.pipe() })
}

fn emit_children_expr(out: &mut String, prefix: &str, glyphs: Glyphs, children: &[&Expr]) {
  let last = children.len().saturating_sub(1);
  for (i, c) in children.iter().enumerate() {
    emit_expr(out, prefix, i == last, glyphs, c);
  }
}

fn emit_expr(out: &mut String, prefix: &str, is_last: bool, glyphs: Glyphs, e: &Expr) {
  match &e.kind {
    ExprKind::IntLiteral(n) => { write_line(out, prefix, is_last, glyphs, &format!("int {n}")); }
    ExprKind::FloatLiteral(n) => { write_line(out, prefix, is_last, glyphs, &format!("float {n}")); }
    ExprKind::StringLiteral(bytes) => {
      write_line(out, prefix, is_last, glyphs, &format!("string {:?}", String::from_utf8_lossy(bytes)));
    }
    ExprKind::Access(sym) => { write_line(out, prefix, is_last, glyphs, &format!("access {}", sym.borrow().name.as_string())); }
    ExprKind::Member(base, name) => {
      let p = write_line(out, prefix, is_last, glyphs, &format!("member .{}", name.as_string()));
      emit_children_expr(out, &p, glyphs, &[base]);
    }
    ExprKind::Deref(inner) => {
      let p = write_line(out, prefix, is_last, glyphs, "deref");
      emit_children_expr(out, &p, glyphs, &[inner]);
    }
    ExprKind::AddrOf(inner) => {
      let p = write_line(out, prefix, is_last, glyphs, "addr-of");
      emit_children_expr(out, &p, glyphs, &[inner]);
    }
    ExprKind::Index(base, idx) => {
      let p = write_line(out, prefix, is_last, glyphs, "index");
      emit_children_expr(out, &p, glyphs, &[base, idx]);
    }
    ExprKind::Unary(op, inner) => {
      let p = write_line(out, prefix, is_last, glyphs, &format!("unary {}", unop_name(*op)));
      emit_children_expr(out, &p, glyphs, &[inner]);
    }
    ExprKind::Binary(op, lhs, rhs) => {
      let p = write_line(out, prefix, is_last, glyphs, &format!("binary {}", binop_name(*op)));
      emit_children_expr(out, &p, glyphs, &[lhs, rhs]);
    }
    ExprKind::Assign(op, lhs, rhs) => {
      let label = match op {
        Some(op) => format!("assign {}=", binop_name(*op)),
        None => "assign =".to_string(),
      };
      let p = write_line(out, prefix, is_last, glyphs, &label);
      emit_children_expr(out, &p, glyphs, &[lhs, rhs]);
    }
    ExprKind::Comma(lhs, rhs) => {
      let p = write_line(out, prefix, is_last, glyphs, "comma");
      emit_children_expr(out, &p, glyphs, &[lhs, rhs]);
    }
    ExprKind::Cond(c, t, f) => {
      let p = write_line(out, prefix, is_last, glyphs, "cond ?:");
      emit_children_expr(out, &p, glyphs, &[c, t, f]);
    }
    ExprKind::Call(callee, args) => {
      let p = write_line(out, prefix, is_last, glyphs, "call");
      let mut children: Vec<&Expr> = vec![callee];
      children.extend(args.iter());
      emit_children_expr(out, &p, glyphs, &children);
    }
    ExprKind::Cast { explicit, value } => {
      let p = write_line(out, prefix, is_last, glyphs, &format!("cast{}", if *explicit { " (explicit)" } else { "" }));
      emit_children_expr(out, &p, glyphs, &[value]);
    }
    ExprKind::Decay(inner) => {
      let p = write_line(out, prefix, is_last, glyphs, "decay");
      emit_children_expr(out, &p, glyphs, &[inner]);
    }
    ExprKind::Sizeof(ty) => { write_line(out, prefix, is_last, glyphs, &format!("sizeof(type) size={}", ty.size())); }
    ExprKind::SizeofExpr(inner) => {
      let p = write_line(out, prefix, is_last, glyphs, "sizeof(expr)");
      emit_children_expr(out, &p, glyphs, &[inner]);
    }
    ExprKind::AlignofType(ty) => { write_line(out, prefix, is_last, glyphs, &format!("_Alignof size={}", ty.size())); }
    ExprKind::InitList(slots) => {
      let p = write_line(out, prefix, is_last, glyphs, &format!("init-list[{}]", slots.len()));
      let last = slots.len().saturating_sub(1);
      for (i, slot) in slots.iter().enumerate() {
        match slot {
          Some(e) => emit_expr(out, &p, i == last, glyphs, e),
          None => { write_line(out, &p, i == last, glyphs, "(zero)"); }
        }
      }
    }
    ExprKind::StatementExpr(stmts) => {
      let p = write_line(out, prefix, is_last, glyphs, "statement-expr");
      let last = stmts.len().saturating_sub(1);
      for (i, s) in stmts.iter().enumerate() {
        emit_stmt(out, &p, i == last, glyphs, s);
      }
    }
    ExprKind::Builtin(sel, args) => {
      let p = write_line(out, prefix, is_last, glyphs, &format!("builtin {sel:?}"));
      let children: Vec<&Expr> = args.iter().collect();
      emit_children_expr(out, &p, glyphs, &children);
    }
    ExprKind::Error => { write_line(out, prefix, is_last, glyphs, "<error>"); }
  }
}

fn emit_decls(out: &mut String, prefix: &str, is_last: bool, glyphs: Glyphs, decls: &[Decl]) {
  let label = format!("decl {}", decls.iter().map(|d| d.name.as_string()).collect::<Vec<_>>().join(", "));
  let p = write_line(out, prefix, is_last, glyphs, &label);
  let last = decls.len().saturating_sub(1);
  for (i, d) in decls.iter().enumerate() {
    match &d.init {
      Some(init) => emit_expr(out, &p, i == last, glyphs, init),
      None => { write_line(out, &p, i == last, glyphs, &d.name.as_string()); }
    }
  }
}

fn emit_stmt(out: &mut String, prefix: &str, is_last: bool, glyphs: Glyphs, s: &Stmt) {
  match &s.kind {
    StmtKind::Expr(e) => emit_expr(out, prefix, is_last, glyphs, e),
    StmtKind::Decl(decls) => emit_decls(out, prefix, is_last, glyphs, decls),
    StmtKind::Compound(stmts) => {
      let p = write_line(out, prefix, is_last, glyphs, "compound");
      let last = stmts.len().saturating_sub(1);
      for (i, st) in stmts.iter().enumerate() {
        emit_stmt(out, &p, i == last, glyphs, st);
      }
    }
    StmtKind::If(cond, then, else_) => {
      let p = write_line(out, prefix, is_last, glyphs, "if");
      emit_expr(out, &p, false, glyphs, cond);
      match else_ {
        Some(e) => { emit_stmt(out, &p, false, glyphs, then); emit_stmt(out, &p, true, glyphs, e); }
        None => emit_stmt(out, &p, true, glyphs, then),
      }
    }
    StmtKind::While(cond, body) => {
      let p = write_line(out, prefix, is_last, glyphs, "while");
      emit_expr(out, &p, false, glyphs, cond);
      emit_stmt(out, &p, true, glyphs, body);
    }
    StmtKind::DoWhile(body, cond) => {
      let p = write_line(out, prefix, is_last, glyphs, "do-while");
      emit_stmt(out, &p, false, glyphs, body);
      emit_expr(out, &p, true, glyphs, cond);
    }
    StmtKind::For { init, cond, step, body } => {
      let p = write_line(out, prefix, is_last, glyphs, "for");
      if let Some(init) = init { emit_stmt(out, &p, false, glyphs, init); }
      if let Some(cond) = cond { emit_expr(out, &p, false, glyphs, cond); }
      if let Some(step) = step { emit_expr(out, &p, false, glyphs, step); }
      emit_stmt(out, &p, true, glyphs, body);
    }
    StmtKind::Switch { scrutinee, body, .. } => {
      let p = write_line(out, prefix, is_last, glyphs, "switch");
      emit_expr(out, &p, false, glyphs, scrutinee);
      emit_stmt(out, &p, true, glyphs, body);
    }
    StmtKind::Case(label, body) => {
      let text = if label.lo == label.hi { format!("case {}", label.lo) } else { format!("case {}...{}", label.lo, label.hi) };
      let p = write_line(out, prefix, is_last, glyphs, &text);
      emit_stmt(out, &p, true, glyphs, body);
    }
    StmtKind::Default(body) => {
      let p = write_line(out, prefix, is_last, glyphs, "default");
      emit_stmt(out, &p, true, glyphs, body);
    }
    StmtKind::Break => { write_line(out, prefix, is_last, glyphs, "break"); }
    StmtKind::Continue => { write_line(out, prefix, is_last, glyphs, "continue"); }
    StmtKind::Return(e) => {
      match e {
        Some(e) => { let p = write_line(out, prefix, is_last, glyphs, "return"); emit_expr(out, &p, true, glyphs, e); }
        None => { write_line(out, prefix, is_last, glyphs, "return"); }
      }
    }
    StmtKind::Goto(name) => { write_line(out, prefix, is_last, glyphs, &format!("goto {}", name.as_string())); }
    StmtKind::Label(name, body) => {
      let p = write_line(out, prefix, is_last, glyphs, &format!("label {}:", name.as_string()));
      emit_stmt(out, &p, true, glyphs, body);
    }
    StmtKind::Empty => { write_line(out, prefix, is_last, glyphs, "empty"); }
  }
}

fn unop_name(op: UnOp) -> &'static str {
  match op {
    UnOp::Neg => "-", UnOp::BitNot => "~", UnOp::LogNot => "!",
    UnOp::PreInc => "++pre", UnOp::PreDec => "--pre", UnOp::PostInc => "post++", UnOp::PostDec => "post--",
  }
}

fn binop_name(op: BinOp) -> &'static str {
  match op {
    BinOp::Add => "+", BinOp::Sub => "-", BinOp::Mul => "*",
    BinOp::DivU => "/u", BinOp::DivS => "/s", BinOp::ModU => "%u", BinOp::ModS => "%s",
    BinOp::Shl => "<<", BinOp::ShrU => ">>u", BinOp::ShrS => ">>s",
    BinOp::And => "&", BinOp::Or => "|", BinOp::Xor => "^",
    BinOp::LogAnd => "&&", BinOp::LogOr => "||",
    BinOp::Eq => "==", BinOp::Ne => "!=",
    BinOp::LtU => "<u", BinOp::LtS => "<s", BinOp::LeU => "<=u", BinOp::LeS => "<=s",
    BinOp::GtU => ">u", BinOp::GtS => ">s", BinOp::GeU => ">=u", BinOp::GeS => ">=s",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::Parser;

  #[test]
  fn dumps_an_if_statement_with_both_branches() {
    let tu = Parser::new(b"int f(int a){ if (a) return 1; else return 2; }", "t.c").parse_translation_unit();
    let text = dump_translation_unit(&tu, Glyphs::Ascii);
    assert!(text.contains("if"));
    assert!(text.contains("return"));
  }

  #[test]
  fn unicode_glyphs_render_box_drawing_characters() {
    let tu = Parser::new(b"int f(void){ return 1; }", "t.c").parse_translation_unit();
    let text = dump_translation_unit(&tu, Glyphs::Unicode);
    assert!(text.contains('\u{2514}'));
  }
}
