//! Statements (§4.6/§4.7): compound-statement scoping, the control-flow
//! forms, and the break/continue binding discipline a GNU statement
//! expression or switch-expression evaluation must not disturb.

use super::*;
use crate::ast::{CaseLabel, Decl, Stmt, StmtKind};
use std::cell::Cell;

impl<'a> Parser<'a> {
  pub(super) fn parse_compound_stmt(&mut self) -> Stmt {
    let tok = self.tok();
    self.lex.expect("{", "expected '{' to open compound statement");
    self.push_scope();
    let mut stmts = Vec::new();
    while !self.lex.peek_token().is_text("}") && !self.lex.peek_token().is(TokenKind::End) {
      stmts.push(self.parse_stmt());
    }
    self.lex.expect("}", "expected '}' to close compound statement");
    self.pop_scope();
    Stmt::new(StmtKind::Compound(stmts), Some(tok))
  }

  pub(super) fn parse_stmt(&mut self) -> Stmt {
    let tok = self.tok();
    let text = tok.text();
    match text.as_str() {
      "{" => self.parse_compound_stmt(),
      "if" => self.parse_if(tok),
      "while" => self.parse_while(tok),
      "do" => self.parse_do_while(tok),
      "for" => self.parse_for(tok),
      "switch" => self.parse_switch(tok),
      "case" => self.parse_case(tok),
      "default" => self.parse_default(tok),
      "break" => { self.lex.consume(); self.lex.expect(";", "expected ';' after break"); self.check_break(&tok); Stmt::new(StmtKind::Break, Some(tok)) }
      "continue" => { self.lex.consume(); self.lex.expect(";", "expected ';' after continue"); self.check_continue(&tok); Stmt::new(StmtKind::Continue, Some(tok)) }
      "return" => self.parse_return(tok),
      "goto" => self.parse_goto(tok),
      ";" => { self.lex.consume(); Stmt::new(StmtKind::Empty, Some(tok)) }
      _ if self.at_type_start_stmt() => self.parse_decl_stmt(tok),
      _ if tok.is(TokenKind::Alphanumeric) && self.peek_is_label() => self.parse_label(tok),
      _ => {
        let e = self.parse_expr();
        self.lex.expect(";", "expected ';' after expression statement");
        Stmt::new(StmtKind::Expr(e), Some(tok))
      }
    }
  }

  /// True if the current token starts a declaration rather than an
  /// expression statement: a type specifier keyword, a qualifier/storage
  /// keyword, or a typedef name.
  fn at_type_start_stmt(&self) -> bool {
    let t = self.lex.peek_token();
    if !t.is(TokenKind::Alphanumeric) { return false }
    matches!(t.text().as_str(),
      "typedef" | "extern" | "static" | "auto" | "register" | "inline" | "_Noreturn"
      | "const" | "volatile" | "restrict")
      || self.at_type_start()
  }

  /// Lookahead for `identifier :` (a label), distinguished from an
  /// expression statement starting with an identifier.
  fn peek_is_label(&mut self) -> bool {
    let save = self.lex.take();
    let is_label = self.lex.peek_token().is_text(":") && !self.lex.peek_token().is_text("::");
    self.lex.push(save);
    is_label
  }

  fn parse_decl_stmt(&mut self, tok: Token) -> Stmt {
    let (base_ty, storage, _) = self.parse_specifiers();
    let mut decls = Vec::new();
    loop {
      let (name, ty, asm_name) = self.parse_declarator(base_ty.clone());
      if asm_name != name && storage != StorageClass::Extern {
        crate::fatal!(Loc::At(&tok), "'asm' renaming of '{}' is not allowed on a local \
          without 'extern'", name);
      }
      let init = if self.lex.accept("=") { Some(self.parse_initializer_expr(&ty)) } else { None };
      let linkage = if storage == StorageClass::Extern { Linkage::External } else { Linkage::None };
      let mut sym = Symbol::new_variable(name, ty.clone(), linkage);
      sym.asm_name = asm_name;
      let sym = Rc::new(RefCell::new(sym));
      if init.is_some() || storage != StorageClass::Extern { sym.borrow_mut().flags |= SymbolFlags::DEFINED; }
      self.scope.borrow_mut().insert_symbol(sym.clone());
      decls.push(Decl { name, ty, sym, init });
      if !self.lex.accept(",") { break }
    }
    self.lex.expect(";", "expected ';' after declaration");
    Stmt::new(StmtKind::Decl(decls), Some(tok))
  }

  fn parse_label(&mut self, tok: Token) -> Stmt {
    let raw = intern(&tok.text());
    self.lex.consume();
    self.lex.expect(":", "expected ':' after label");
    let mangled = self.mangle_label(raw);
    let inner = self.parse_stmt();
    Stmt::new(StmtKind::Label(mangled, Box::new(inner)), Some(tok))
  }

  /// User labels are mangled as `_U_<len>_<function>_<label>` (spec.md
  /// §4.6) so that identically-named labels in different functions never
  /// collide in the flat label namespace the code generator emits into.
  fn mangle_label(&self, label: Atom) -> Atom {
    let func = self.cur_func_name.map_or_else(String::new, |n| n.as_string());
    intern(&format!("_U_{}_{}_{}", func.len(), func, label.as_string()))
  }

  fn parse_goto(&mut self, tok: Token) -> Stmt {
    self.lex.consume();
    let raw = intern(&self.lex.peek_token().text());
    self.lex.consume();
    self.lex.expect(";", "expected ';' after goto target");
    Stmt::new(StmtKind::Goto(self.mangle_label(raw)), Some(tok))
  }

  fn parse_return(&mut self, tok: Token) -> Stmt {
    self.lex.consume();
    let ret_ty = self.cur_func_ret.clone().expect("return statement outside a function");
    if self.lex.accept(";") {
      return Stmt::new(StmtKind::Return(None), Some(tok))
    }
    let e = self.parse_expr();
    self.lex.expect(";", "expected ';' after return expression");
    let e = if ret_ty.is_void() { e } else { crate::ast::cast(e, ret_ty, None, Loc::At(&tok)) };
    Stmt::new(StmtKind::Return(Some(e)), Some(tok))
  }

  fn parse_if(&mut self, tok: Token) -> Stmt {
    self.lex.consume();
    self.lex.expect("(", "expected '(' after if");
    let cond = self.parse_expr();
    self.lex.expect(")", "expected ')' after if condition");
    let then_branch = Box::new(self.parse_stmt());
    let else_branch = if self.lex.accept("else") { Some(Box::new(self.parse_stmt())) } else { None };
    Stmt::new(StmtKind::If(cond, then_branch, else_branch), Some(tok))
  }

  fn parse_while(&mut self, tok: Token) -> Stmt {
    self.lex.consume();
    self.lex.expect("(", "expected '(' after while");
    let cond = self.parse_expr();
    self.lex.expect(")", "expected ')' after while condition");
    self.loop_stack.push(LoopCtx { is_switch: false, cases: None });
    let body = Box::new(self.parse_stmt());
    self.loop_stack.pop();
    Stmt::new(StmtKind::While(cond, body), Some(tok))
  }

  fn parse_do_while(&mut self, tok: Token) -> Stmt {
    self.lex.consume();
    self.loop_stack.push(LoopCtx { is_switch: false, cases: None });
    let body = Box::new(self.parse_stmt());
    self.loop_stack.pop();
    self.lex.expect("while", "expected 'while' after do-statement body");
    self.lex.expect("(", "expected '(' after do-while");
    let cond = self.parse_expr();
    self.lex.expect(")", "expected ')' after do-while condition");
    self.lex.expect(";", "expected ';' after do-while");
    Stmt::new(StmtKind::DoWhile(body, cond), Some(tok))
  }

  fn parse_for(&mut self, tok: Token) -> Stmt {
    self.lex.consume();
    self.lex.expect("(", "expected '(' after for");
    self.push_scope();
    let init = if self.lex.accept(";") {
      None
    } else if self.at_type_start_stmt() {
      Some(Box::new(self.parse_decl_stmt(self.tok())))
    } else {
      let e = self.parse_expr();
      self.lex.expect(";", "expected ';' after for-init expression");
      Some(Box::new(Stmt::new(StmtKind::Expr(e), None)))
    };
    let cond = if self.lex.peek_token().is_text(";") { None } else { Some(self.parse_expr()) };
    self.lex.expect(";", "expected ';' after for-condition");
    let step = if self.lex.peek_token().is_text(")") { None } else { Some(self.parse_expr()) };
    self.lex.expect(")", "expected ')' after for clauses");
    self.loop_stack.push(LoopCtx { is_switch: false, cases: None });
    let body = Box::new(self.parse_stmt());
    self.loop_stack.pop();
    self.pop_scope();
    Stmt::new(StmtKind::For { init, cond, step, body }, Some(tok))
  }

  fn parse_switch(&mut self, tok: Token) -> Stmt {
    self.lex.consume();
    self.lex.expect("(", "expected '(' after switch");
    let scrutinee = self.parse_expr();
    self.lex.expect(")", "expected ')' after switch scrutinee");
    let cases = Rc::new(RefCell::new(Vec::new()));
    self.loop_stack.push(LoopCtx { is_switch: true, cases: Some(cases.clone()) });
    let body = Box::new(self.parse_stmt());
    self.loop_stack.pop();
    Stmt::new(StmtKind::Switch { scrutinee, body, cases }, Some(tok))
  }

  /// `case lo:` or the GNU extension `case lo ... hi:` (spec.md's supplement
  /// list; warned under `-Wgnu-case-range`).
  fn parse_case(&mut self, tok: Token) -> Stmt {
    self.lex.consume();
    let lo = crate::consteval::eval_64(&self.parse_const_expr()).as_i64();
    let hi = if self.lex.accept("...") {
      crate::warn_at!(WarningKind::GnuCaseRange, Loc::At(&tok), "use of GNU case range extension");
      crate::consteval::eval_64(&self.parse_const_expr()).as_i64()
    } else { lo };
    self.lex.expect(":", "expected ':' after case label");
    let label = CaseLabel { lo, hi, is_default: false, block_label: Rc::new(Cell::new(-1)) };
    self.attach_case(label.clone(), &tok);
    let inner = self.parse_stmt();
    Stmt::new(StmtKind::Case(label, Box::new(inner)), Some(tok))
  }

  fn parse_default(&mut self, tok: Token) -> Stmt {
    self.lex.consume();
    self.lex.expect(":", "expected ':' after default label");
    let label = CaseLabel { lo: 0, hi: 0, is_default: true, block_label: Rc::new(Cell::new(-1)) };
    self.attach_case(label.clone(), &tok);
    let inner = self.parse_stmt();
    Stmt::new(StmtKind::Default(Box::new(inner)), Some(tok))
  }

  /// Find the nearest enclosing `switch` (possibly through intervening
  /// loops) and register this label in its case list.
  fn attach_case(&mut self, label: CaseLabel, tok: &Token) {
    match self.loop_stack.iter().rev().find_map(|c| c.cases.clone()) {
      Some(cases) => cases.borrow_mut().push(label),
      None => crate::fatal!(Loc::At(tok), "'case'/'default' label not within a switch statement"),
    }
  }

  fn check_break(&self, tok: &Token) {
    if self.loop_stack.is_empty() {
      crate::fatal!(Loc::At(tok), "'break' statement not in a loop or switch");
    }
  }

  /// `continue` always targets the nearest enclosing *loop*; an
  /// intervening `switch` does not catch it.
  fn check_continue(&self, tok: &Token) {
    if !self.loop_stack.iter().any(|c| !c.is_switch) {
      crate::fatal!(Loc::At(tok), "'continue' statement not in a loop");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_if_else() {
    let tu = Parser::new(b"int main(void) { if (1) return 1; else return 0; }", "t.c")
      .parse_translation_unit();
    assert_eq!(tu.functions.len(), 1);
  }

  #[test]
  fn loop_with_break_parses() {
    let tu = Parser::new(
      b"int main(void) { int i; for (i = 0; i < 10; i = i + 1) { if (i == 5) break; } return 0; }",
      "t.c",
    ).parse_translation_unit();
    assert_eq!(tu.functions.len(), 1);
  }

  #[test]
  fn switch_with_cases_parses() {
    let tu = Parser::new(
      b"int main(void) { int x; switch (x) { case 1: break; case 2 ... 4: break; default: break; } return 0; }",
      "t.c",
    ).parse_translation_unit();
    assert_eq!(tu.functions.len(), 1);
  }

  #[test]
  fn labeled_goto_parses() {
    let tu = Parser::new(b"int main(void) { goto out; out: return 0; }", "t.c")
      .parse_translation_unit();
    assert_eq!(tu.functions.len(), 1);
  }
}
