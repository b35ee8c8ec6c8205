//! Expressions (§4.6): precedence-climbing binary operators, unary/postfix
//! chains, assignment, the ternary and comma operators, and the handful of
//! GNU extensions the translation unit is allowed to use (statement
//! expressions, compound literals).

use super::*;
use crate::ast::{decay, BinOp, Expr, ExprKind, UnOp};
use crate::types::{Base, Qual};

/// Operator-precedence table for the binary levels between `||` and `*`,
/// walked by [`Parser::parse_binary`]. Lowest precedence (logical-or) is
/// level 1; multiplicative is level 10; assignment and the ternary sit
/// above this table and are handled by their own functions.
const LEVELS: &[&[&str]] = &[
  &["||"],
  &["&&"],
  &["|"],
  &["^"],
  &["&"],
  &["==", "!="],
  &["<", ">", "<=", ">="],
  &["<<", ">>"],
  &["+", "-"],
  &["*", "/", "%"],
];

const ASSIGN_OPS: &[&str] = &["=", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "<<=", ">>="];

impl<'a> Parser<'a> {
  /// Top-level expression: the comma operator, lowest precedence of all.
  pub(super) fn parse_expr(&mut self) -> Expr {
    let mut e = self.parse_assign_expr();
    while self.lex.peek_token().is_text(",") {
      let tok = self.tok();
      self.lex.consume();
      let rhs = self.parse_assign_expr();
      let ty = rhs.ty.clone();
      e = Expr::new(ty, ExprKind::Comma(Box::new(e), Box::new(rhs)), Some(tok));
    }
    e
  }

  /// A constant-expression (C17: conditional-expression, no assignment or
  /// comma) — used for array bounds, case labels, enumerator values, and
  /// bit-field widths. Folding is deferred to [`crate::consteval`]; this
  /// only restricts the *grammar*.
  pub(super) fn parse_const_expr(&mut self) -> Expr {
    self.parse_cond_expr()
  }

  /// Assignment-expression: a conditional-expression, optionally followed
  /// by one assignment/compound-assignment operator (right-associative).
  pub(super) fn parse_assign_expr(&mut self) -> Expr {
    let lhs = self.parse_cond_expr();
    let op_text = self.lex.peek_token().text();
    if !ASSIGN_OPS.contains(&op_text.as_str()) { return lhs }
    let tok = self.tok();
    self.lex.consume();
    let rhs = self.parse_assign_expr();
    self.build_assign(&op_text, lhs, rhs, tok)
  }

  fn build_assign(&self, op_text: &str, lhs: Expr, rhs: Expr, tok: Token) -> Expr {
    let ty = lhs.ty.clone();
    if op_text == "=" {
      let rhs = crate::ast::cast(decay_arith(rhs), ty.clone(), None, Loc::At(&tok));
      return Expr::new(ty, ExprKind::Assign(None, Box::new(lhs), Box::new(rhs)), Some(tok))
    }
    let base_op = match op_text {
      "+=" => "+", "-=" => "-", "*=" => "*", "/=" => "/", "%=" => "%",
      "&=" => "&", "|=" => "|", "^=" => "^", "<<=" => "<<", ">>=" => ">>",
      _ => unreachable!("not an assignment operator"),
    };
    // Shifts take their signedness from the left operand only (C17 6.5.7);
    // `ty` here *is* the left operand's (the assignment target's) type.
    let op = self.resolve_binop(base_op, &ty, &ty, &tok);
    Expr::new(ty, ExprKind::Assign(Some(op), Box::new(lhs), Box::new(rhs)), Some(tok))
  }

  /// Ternary `?:`. The GNU "elvis" form `a ?: b` (binding `a` as both the
  /// condition and the true-branch) is detected and rejected: it requires
  /// evaluating the condition exactly once and reusing its value, which
  /// this AST has no node for yet.
  fn parse_cond_expr(&mut self) -> Expr {
    let cond = self.parse_binary(0);
    if !self.lex.accept("?") { return cond }
    if self.lex.peek_token().is_text(":") {
      crate::fatal!(self.loc(), "GNU '?:' (elvis) conditional expressions are not yet implemented");
    }
    let t = self.parse_expr();
    self.lex.expect(":", "expected ':' in conditional expression");
    let f = self.parse_cond_expr();
    let ty = common_arith_type_or(&t.ty, &f.ty);
    let tok = cond.tok.clone();
    Expr::new(ty, ExprKind::Cond(Box::new(promote_cond(cond)), Box::new(t), Box::new(f)), tok)
  }

  /// Precedence-climbing walk over [`LEVELS`]; `level` indexes the table,
  /// bottoming out at the cast-expression (unary-and-above) parser.
  fn parse_binary(&mut self, level: usize) -> Expr {
    if level >= LEVELS.len() { return self.parse_cast_expr() }
    let mut lhs = self.parse_binary(level + 1);
    loop {
      let text = self.lex.peek_token().text();
      if !LEVELS[level].contains(&text.as_str()) { break }
      let tok = self.tok();
      self.lex.consume();
      let rhs = self.parse_binary(level + 1);
      lhs = self.build_binary(&text, lhs, rhs, tok);
    }
    lhs
  }

  fn build_binary(&self, text: &str, lhs: Expr, rhs: Expr, tok: Token) -> Expr {
    if matches!(text, "+" | "-") && (lhs.ty.is_pointer() || rhs.ty.is_pointer()) {
      return self.build_pointer_arith(text, lhs, rhs, tok)
    }
    if matches!(text, "&&" | "||") {
      let op = if text == "&&" { BinOp::LogAnd } else { BinOp::LogOr };
      let bool_ty = Type::new_base(Base::SInt, Qual::empty());
      return Expr::new(bool_ty, ExprKind::Binary(op, Box::new(decay_arith(lhs)), Box::new(decay_arith(rhs))), Some(tok))
    }
    if matches!(text, "<<" | ">>") {
      // C17 6.5.7: each operand undergoes the integer promotions
      // independently; the two are never unified, and the result takes the
      // (promoted) left operand's type regardless of the right operand's.
      let lhs = decay_arith(lhs);
      let rhs = decay_arith(rhs);
      let result_ty = lhs.ty.clone();
      let op = self.resolve_binop(text, &lhs.ty, &lhs.ty, &tok);
      return Expr::new(result_ty, ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)), Some(tok))
    }
    let lhs = decay_arith(lhs);
    let rhs = decay_arith(rhs);
    let common = common_arith_type_or(&lhs.ty, &rhs.ty);
    let lhs_c = crate::ast::cast(lhs, common.clone(), None, Loc::At(&tok));
    let rhs_c = crate::ast::cast(rhs, common.clone(), None, Loc::At(&tok));
    let op = self.resolve_binop(text, &common, &common, &tok);
    let result_ty = if is_comparison(op) { Type::new_base(Base::SInt, Qual::empty()) } else { common };
    Expr::new(result_ty, ExprKind::Binary(op, Box::new(lhs_c), Box::new(rhs_c)), Some(tok))
  }

  /// Pointer arithmetic: `ptr + n` / `n + ptr` / `ptr - n` scale the integer
  /// operand by the pointed-to element size; `ptr - ptr` divides the raw
  /// byte difference by that size to yield an element count.
  fn build_pointer_arith(&self, text: &str, lhs: Expr, rhs: Expr, tok: Token) -> Expr {
    let lhs = decay(lhs);
    let rhs = decay(rhs);
    if lhs.ty.is_pointer() && rhs.ty.is_pointer() {
      if text != "-" {
        crate::fatal!(Loc::At(&tok), "invalid operands to binary '+': cannot add two pointers");
      }
      let elem_size = lhs.ty.referent().expect("pointer referent").size();
      let diff = Expr::new(lhs.ty.clone(), ExprKind::Binary(BinOp::Sub, Box::new(lhs), Box::new(rhs)), Some(tok.clone()));
      let long_ty = Type::new_base(Base::SLong, Qual::empty());
      let diff = crate::ast::cast(diff, long_ty.clone(), None, Loc::At(&tok));
      let size_lit = int_literal(u64::from(elem_size), long_ty.clone());
      return Expr::new(long_ty, ExprKind::Binary(BinOp::DivS, Box::new(diff), Box::new(size_lit)), Some(tok))
    }
    let (ptr, int_operand) = if lhs.ty.is_pointer() { (lhs, rhs) } else { (rhs, lhs) };
    let elem_size = ptr.ty.referent().expect("pointer referent").size();
    let long_ty = Type::new_base(Base::SLong, Qual::empty());
    let idx = crate::ast::cast(int_operand, long_ty.clone(), None, Loc::At(&tok));
    let size_lit = int_literal(u64::from(elem_size), long_ty.clone());
    let scaled = Expr::new(long_ty, ExprKind::Binary(BinOp::Mul, Box::new(idx), Box::new(size_lit)), Some(tok.clone()));
    let op = if text == "+" { BinOp::Add } else { BinOp::Sub };
    Expr::new(ptr.ty.clone(), ExprKind::Binary(op, Box::new(ptr.clone()), Box::new(scaled)), Some(tok))
  }

  /// Pick the signed/unsigned `BinOp` variant for `text` given the common
  /// operand type (already converted). Shifts take their signedness from
  /// the left operand only, per C17 6.5.7.
  fn resolve_binop(&self, text: &str, common: &Type, rhs_ty: &Type, tok: &Token) -> BinOp {
    let unsigned = common.is_unsigned();
    match text {
      "+" => BinOp::Add, "-" => BinOp::Sub, "*" => BinOp::Mul,
      "/" => if unsigned { BinOp::DivU } else { BinOp::DivS },
      "%" => if unsigned { BinOp::ModU } else { BinOp::ModS },
      "&" => BinOp::And, "|" => BinOp::Or, "^" => BinOp::Xor,
      "<<" => BinOp::Shl,
      ">>" => if rhs_ty.is_unsigned() { BinOp::ShrU } else { BinOp::ShrS },
      "==" => BinOp::Eq, "!=" => BinOp::Ne,
      "<" => if unsigned { BinOp::LtU } else { BinOp::LtS },
      ">" => if unsigned { BinOp::GtU } else { BinOp::GtS },
      "<=" => if unsigned { BinOp::LeU } else { BinOp::LeS },
      ">=" => if unsigned { BinOp::GeU } else { BinOp::GeS },
      other => crate::fatal!(Loc::At(tok), "unsupported binary operator '{other}'"),
    }
  }

  /// Cast-expression: `( type-name ) cast-expression` or a unary-expression.
  /// Also the entry point for a parenthesised compound literal
  /// `(T){ ... }` (SPEC_FULL.md §3).
  fn parse_cast_expr(&mut self) -> Expr {
    if self.lex.peek_token().is_text("(") {
      let save_pushed = self.lex.peek_token().clone();
      self.lex.consume();
      if self.at_type_start() {
        let tok = self.tok();
        let ty = self.parse_type_name();
        self.lex.expect(")", "expected ')' after type name");
        if self.lex.peek_token().is_text("{") {
          return self.parse_compound_literal(ty, tok)
        }
        let inner = self.parse_cast_expr();
        return crate::ast::cast(inner, ty, Some(tok), Loc::At(&tok))
      }
      self.lex.push(save_pushed);
    }
    self.parse_unary_expr()
  }

  fn parse_compound_literal(&mut self, ty: Type, tok: Token) -> Expr {
    let init = self.parse_braced_initializer(&ty);
    Expr::new(ty, init.kind, Some(tok))
  }

  /// Unary-expression: prefix operators, `sizeof`/`_Alignof`, and the
  /// postfix chain underneath them.
  fn parse_unary_expr(&mut self) -> Expr {
    let tok = self.tok();
    if self.lex.accept("++") { return self.build_incdec(UnOp::PreInc, tok) }
    if self.lex.accept("--") { return self.build_incdec(UnOp::PreDec, tok) }
    if self.lex.accept("&") {
      let e = self.parse_cast_expr();
      let ty = Type::new_pointer(e.ty.clone(), Qual::empty());
      return Expr::new(ty, ExprKind::AddrOf(Box::new(e)), Some(tok))
    }
    if self.lex.accept("*") {
      let e = decay_arith(self.parse_cast_expr());
      let ty = e.ty.referent().unwrap_or(&e.ty).clone();
      return Expr::new(ty, ExprKind::Deref(Box::new(e)), Some(tok))
    }
    if self.lex.accept("+") { return decay_arith(self.parse_cast_expr()) }
    if self.lex.accept("-") {
      let e = crate::ast::promote(decay_arith(self.parse_cast_expr()));
      let ty = e.ty.clone();
      return Expr::new(ty, ExprKind::Unary(UnOp::Neg, Box::new(e)), Some(tok))
    }
    if self.lex.accept("~") {
      let e = crate::ast::promote(decay_arith(self.parse_cast_expr()));
      let ty = e.ty.clone();
      return Expr::new(ty, ExprKind::Unary(UnOp::BitNot, Box::new(e)), Some(tok))
    }
    if self.lex.accept("!") {
      let e = decay_arith(self.parse_cast_expr());
      let ty = Type::new_base(Base::SInt, Qual::empty());
      return Expr::new(ty, ExprKind::Unary(UnOp::LogNot, Box::new(e)), Some(tok))
    }
    if self.lex.peek_token().is_text("sizeof") { return self.parse_sizeof() }
    if self.lex.peek_token().is_text("_Alignof") || self.lex.peek_token().is_text("__alignof__") {
      return self.parse_alignof()
    }
    self.parse_postfix_expr()
  }

  fn build_incdec(&mut self, op: UnOp, tok: Token) -> Expr {
    let e = self.parse_unary_expr();
    let ty = e.ty.clone();
    Expr::new(ty, ExprKind::Unary(op, Box::new(e)), Some(tok))
  }

  /// `sizeof expr` / `sizeof ( type-name )`. Distinguished by lookahead:
  /// `sizeof (` could be either a parenthesised expression or a type name.
  fn parse_sizeof(&mut self) -> Expr {
    let tok = self.tok();
    self.lex.consume();
    let size_ty = Type::new_base(Base::ULong, Qual::empty());
    if self.lex.peek_token().is_text("(") {
      let save = self.lex.peek_token().clone();
      self.lex.consume();
      if self.at_type_start() {
        let ty = self.parse_type_name();
        self.lex.expect(")", "expected ')' after sizeof type name");
        return Expr::new(size_ty, ExprKind::Sizeof(ty), Some(tok))
      }
      self.lex.push(save);
    }
    let inner = self.parse_unary_expr();
    Expr::new(size_ty, ExprKind::SizeofExpr(Box::new(inner)), Some(tok))
  }

  fn parse_alignof(&mut self) -> Expr {
    let tok = self.tok();
    self.lex.consume();
    self.lex.expect("(", "expected '(' after _Alignof");
    let ty = self.parse_type_name();
    self.lex.expect(")", "expected ')' after _Alignof type name");
    let size_ty = Type::new_base(Base::ULong, Qual::empty());
    Expr::new(size_ty, ExprKind::AlignofType(ty), Some(tok))
  }

  /// Postfix-expression: a primary expression followed by any number of
  /// `[]`, `()`, `.`, `->`, `++`, `--`.
  fn parse_postfix_expr(&mut self) -> Expr {
    let mut e = self.parse_primary_expr();
    loop {
      let tok = self.tok();
      if self.lex.accept("[") {
        let idx = self.parse_expr();
        self.lex.expect("]", "expected ']' after subscript");
        let base = decay_arith(e);
        let ty = base.ty.referent().expect("subscript of non-pointer").clone();
        e = Expr::new(ty, ExprKind::Index(Box::new(base), Box::new(idx)), Some(tok));
      } else if self.lex.accept("(") {
        e = self.parse_call(e, tok);
      } else if self.lex.accept(".") {
        e = self.parse_member(e, tok, false);
      } else if self.lex.accept("->") {
        e = self.parse_member(e, tok, true);
      } else if self.lex.accept("++") {
        let ty = e.ty.clone();
        e = Expr::new(ty, ExprKind::Unary(UnOp::PostInc, Box::new(e)), Some(tok));
      } else if self.lex.accept("--") {
        let ty = e.ty.clone();
        e = Expr::new(ty, ExprKind::Unary(UnOp::PostDec, Box::new(e)), Some(tok));
      } else {
        break
      }
    }
    e
  }

  fn parse_member(&mut self, base: Expr, tok: Token, arrow: bool) -> Expr {
    let base = if arrow {
      let base = decay_arith(base);
      let ty = base.ty.referent().expect("'->' on non-pointer").clone();
      Expr::new(ty, ExprKind::Deref(Box::new(base)), Some(tok.clone()))
    } else { base };
    let name = intern(&self.lex.peek_token().text());
    self.lex.consume();
    let rec = base.ty.record().unwrap_or_else(||
      crate::fatal!(Loc::At(&tok), "member access on non-struct/union type"));
    let member_ty = rec.borrow().find(name)
      .unwrap_or_else(|| crate::fatal!(Loc::At(&tok), "no member named '{}'", name))
      .ty.clone();
    Expr::new(member_ty, ExprKind::Member(Box::new(base), name), Some(tok))
  }

  /// Function call: the callee must decay to a function pointer. Arguments
  /// are parsed as assignment-expressions (comma here is the separator, not
  /// the comma operator) and cast to each declared parameter type in turn;
  /// trailing variadic arguments undergo only default argument promotion.
  fn parse_call(&mut self, callee: Expr, tok: Token) -> Expr {
    let mut args = Vec::new();
    if !self.lex.peek_token().is_text(")") {
      loop {
        args.push(self.parse_assign_expr());
        if !self.lex.accept(",") { break }
      }
    }
    self.lex.expect(")", "expected ')' to close call argument list");
    let callee = decay(callee);
    let fty = callee.ty.referent().and_then(Type::function)
      .unwrap_or_else(|| crate::fatal!(Loc::At(&tok), "called object is not a function or function pointer"));
    let ret_ty = fty.ret.clone();
    let declared: Vec<Type> = fty.args.clone();
    let variadic = fty.variadic;
    let mut out = Vec::with_capacity(args.len());
    for (i, a) in args.into_iter().enumerate() {
      let a = decay_arith(a);
      if let Some(pt) = declared.get(i) {
        out.push(crate::ast::cast(a, pt.clone(), None, Loc::At(&tok)));
      } else if variadic {
        out.push(crate::ast::promote(a));
      } else {
        crate::fatal!(Loc::At(&tok), "too many arguments to function call");
      }
    }
    if out.len() < declared.len() {
      crate::fatal!(Loc::At(&tok), "too few arguments to function call");
    }
    Expr::new(ret_ty, ExprKind::Call(Box::new(callee), out), Some(tok))
  }

  fn parse_primary_expr(&mut self) -> Expr {
    let tok = self.tok();
    if tok.is(TokenKind::Number) { self.lex.consume(); return self.parse_number_literal(&tok) }
    if tok.is(TokenKind::String) {
      self.lex.consume();
      let bytes: Rc<[u8]> = Rc::from(tok.text().into_bytes());
      let ty = Type::new_array(Type::new_base(Base::Char, Qual::empty()), bytes.len() as u64 + 1);
      return Expr::new(ty, ExprKind::StringLiteral(bytes), Some(tok))
    }
    if tok.is(TokenKind::Character) {
      self.lex.consume();
      let b = tok.text().bytes().next().unwrap_or(0);
      let ty = Type::new_base(Base::SInt, Qual::empty());
      return Expr::new(ty, ExprKind::IntLiteral(u64::from(b)), Some(tok))
    }
    if self.lex.accept("(") {
      if self.lex.peek_token().is_text("{") {
        return self.parse_statement_expr(tok)
      }
      let e = self.parse_expr();
      self.lex.expect(")", "expected ')' to close parenthesised expression");
      return e
    }
    if tok.is(TokenKind::Alphanumeric) {
      return self.parse_ident_primary(tok)
    }
    crate::fatal!(Loc::At(&tok), "expected expression, found '{}'", tok.text());
  }

  fn parse_ident_primary(&mut self, tok: Token) -> Expr {
    let text = tok.text();
    if text == "__func__" || text == "__FUNCTION__" {
      self.lex.consume();
      let name = self.cur_func_name.map_or_else(String::new, |n| n.as_string());
      let bytes: Rc<[u8]> = Rc::from(name.into_bytes());
      let ty = Type::new_array(Type::new_base(Base::Char, Qual::empty()), bytes.len() as u64 + 1);
      return Expr::new(ty, ExprKind::StringLiteral(bytes), Some(tok))
    }
    self.lex.consume();
    let sym = crate::scope::lookup_symbol(&self.scope, intern(&text))
      .unwrap_or_else(|| crate::fatal!(Loc::At(&tok), "use of undeclared identifier '{text}'"));
    if let Some(builtin) = sym.borrow().builtin {
      return self.parse_builtin_call(builtin, tok)
    }
    let ty = sym.borrow().ty.clone().expect("non-builtin symbol carries a type");
    Expr::new(ty, ExprKind::Access(sym), Some(tok))
  }

  /// `({ stmt; stmt; expr; })`: the GNU statement expression. Its value and
  /// type are those of the final expression statement; every break/continue
  /// binding in effect before entering is restored afterwards so a
  /// statement expression nested inside a loop's condition cannot
  /// accidentally bind to that loop (spec.md's loop-context save/restore
  /// rule, extended to this supplemented construct).
  fn parse_statement_expr(&mut self, tok: Token) -> Expr {
    crate::warn_at!(WarningKind::StatementExpressions, Loc::At(&tok),
      "use of GNU statement expression");
    let saved_loops = std::mem::take(&mut self.loop_stack);
    self.lex.consume(); // '{'
    self.push_scope();
    let mut stmts = Vec::new();
    while !self.lex.peek_token().is_text("}") {
      stmts.push(self.parse_stmt());
    }
    self.lex.consume(); // '}'
    self.pop_scope();
    self.loop_stack = saved_loops;
    self.lex.expect(")", "expected ')' to close statement expression");
    let ty = match stmts.last().map(|s| &s.kind) {
      Some(crate::ast::StmtKind::Expr(e)) => e.ty.clone(),
      _ => Type::new_base(Base::Void, Qual::empty()),
    };
    Expr::new(ty, ExprKind::StatementExpr(Rc::new(stmts)), Some(tok))
  }

  fn parse_builtin_call(&mut self, b: Builtin, tok: Token) -> Expr {
    self.lex.expect("(", "expected '(' after builtin name");
    let mut args = Vec::new();
    if !self.lex.peek_token().is_text(")") {
      loop {
        args.push(self.parse_assign_expr());
        if !self.lex.accept(",") { break }
      }
    }
    self.lex.expect(")", "expected ')' to close builtin call");
    let ty = match b {
      Builtin::VaArg => args.last().map_or_else(
        || Type::new_base(Base::SInt, Qual::empty()), |a| a.ty.clone()),
      Builtin::Alloca => Type::new_pointer(Type::new_base(Base::Void, Qual::empty()), Qual::empty()),
      _ => Type::new_base(Base::Void, Qual::empty()),
    };
    Expr::new(ty, ExprKind::Builtin(b, args), Some(tok))
  }

  fn parse_number_literal(&self, tok: &Token) -> Expr {
    let text = tok.text();
    let lower = text.to_ascii_lowercase();
    let is_float = (lower.contains('.')
      || (lower.contains('e') && !lower.starts_with("0x"))
      || (lower.contains('p') && lower.starts_with("0x")))
      && !lower.ends_with("lu") && !lower.ends_with("ul");
    if is_float {
      let (digits, suffix) = split_float_suffix(&lower);
      let v: f64 = digits.parse().unwrap_or(0.0);
      let ty = match suffix {
        "f" => Base::Float,
        "l" => Base::LongDouble,
        _ => Base::Double,
      };
      return Expr::new(Type::new_base(ty, Qual::empty()), ExprKind::FloatLiteral(v), Some(tok.clone()))
    }
    let (digits, unsigned, long_count) = split_int_suffix(&lower);
    let v = parse_int_digits(digits);
    let base = if long_count >= 2 { if unsigned { Base::ULongLong } else { Base::SLongLong } }
      else if long_count == 1 { if unsigned { Base::ULong } else { Base::SLong } }
      else if unsigned { Base::UInt }
      else if v > i64::from(i32::MAX) as u64 {
        crate::warn_at!(WarningKind::ImplicitlyUnsignedLiteral, Loc::At(tok),
          "integer constant is so large that it is unsigned");
        Base::UInt
      }
      else { Base::SInt };
    Expr::new(Type::new_base(base, Qual::empty()), ExprKind::IntLiteral(v), Some(tok.clone()))
  }
}

fn split_float_suffix(lower: &str) -> (&str, &str) {
  if let Some(d) = lower.strip_suffix('f') { (d, "f") }
  else if let Some(d) = lower.strip_suffix('l') { (d, "l") }
  else { (lower, "") }
}

fn split_int_suffix(lower: &str) -> (&str, bool, u8) {
  let mut s = lower;
  let mut unsigned = false;
  let mut longs = 0u8;
  loop {
    if let Some(r) = s.strip_suffix('u') { s = r; unsigned = true; }
    else if let Some(r) = s.strip_suffix('l') { s = r; longs += 1; }
    else { break }
  }
  (s, unsigned, longs)
}

fn parse_int_digits(s: &str) -> u64 {
  if let Some(hex) = s.strip_prefix("0x") { u64::from_str_radix(hex, 16).unwrap_or(0) }
  else if s.len() > 1 && s.starts_with('0') { u64::from_str_radix(s, 8).unwrap_or(0) }
  else { s.parse().unwrap_or(0) }
}

fn int_literal(v: u64, ty: Type) -> Expr { Expr::new(ty, ExprKind::IntLiteral(v), None) }

fn is_comparison(op: BinOp) -> bool {
  matches!(op, BinOp::Eq | BinOp::Ne | BinOp::LtU | BinOp::LtS | BinOp::LeU | BinOp::LeS
    | BinOp::GtU | BinOp::GtS | BinOp::GeU | BinOp::GeS | BinOp::LogAnd | BinOp::LogOr)
}

/// Array/function decay followed by integer promotion, the conversion
/// every binary and call-argument operand undergoes before use.
fn decay_arith(e: Expr) -> Expr {
  let e = decay(e);
  if e.ty.is_arithmetic() { crate::ast::promote(e) } else { e }
}

fn promote_cond(e: Expr) -> Expr {
  let e = decay(e);
  if e.ty.is_arithmetic() { crate::ast::promote(e) } else { e }
}

/// The common type of a ternary's two branches, or the left branch's type
/// unchanged when only one side is arithmetic (e.g. a pointer and a null
/// constant).
fn common_arith_type_or(a: &Type, b: &Type) -> Type {
  if a.is_arithmetic() && b.is_arithmetic() { common_arith_type(a, b) }
  else if a.is_pointer() { a.clone() }
  else { b.clone() }
}

/// Usual arithmetic conversions (C17 6.3.1.8), restricted to this target's
/// type set: float ranks above all integers, wider float ranks above
/// narrower; among integers, same rank prefers unsigned, otherwise higher
/// rank wins.
fn common_arith_type(a: &Type, b: &Type) -> Type {
  let ab = a.arithmetic_base();
  let bb = b.arithmetic_base();
  if ab.is_float() || bb.is_float() {
    let pick = [ab, bb].into_iter().max_by_key(|b| float_rank(*b)).unwrap();
    return Type::new_base(if pick.is_float() { pick } else { Base::Double }, Qual::empty())
  }
  let ar = ab.rank().max(Base::SInt.rank());
  let br = bb.rank().max(Base::SInt.rank());
  let (wide, narrow) = if ar >= br { (ab, bb) } else { (bb, ab) };
  let wide = if wide.rank() < Base::SInt.rank() { Base::SInt } else { wide };
  if ar == br && (ab.is_unsigned() || bb.is_unsigned()) {
    return Type::new_base(to_unsigned(wide), Qual::empty())
  }
  let _ = narrow;
  Type::new_base(wide, Qual::empty())
}

fn float_rank(b: Base) -> u8 {
  match b { Base::LongDouble => 3, Base::Double => 2, Base::Float => 1, _ => 0 }
}

fn to_unsigned(b: Base) -> Base {
  match b {
    Base::SInt => Base::UInt, Base::SLong => Base::ULong, Base::SLongLong => Base::ULongLong,
    other => other,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_arithmetic_precedence() {
    let mut p = Parser::new(b"1 + 2 * 3", "t.c");
    let e = p.parse_expr();
    assert_eq!(crate::consteval::eval_32(&e), 7);
  }

  #[test]
  fn parses_comparison_chain() {
    let mut p = Parser::new(b"1 < 2", "t.c");
    let e = p.parse_expr();
    assert_eq!(crate::consteval::eval_32(&e), 1);
  }

  #[test]
  fn string_literal_type_includes_nul() {
    let mut p = Parser::new(b"\"hi\"", "t.c");
    let e = p.parse_expr();
    assert_eq!(e.ty.size(), 3);
  }

  #[test]
  fn sizeof_int_is_four() {
    let mut p = Parser::new(b"sizeof(int)", "t.c");
    let e = p.parse_expr();
    assert_eq!(crate::consteval::eval_32(&e), 4);
  }

  #[test]
  fn ternary_picks_common_type() {
    let mut p = Parser::new(b"1 ? 2 : 3", "t.c");
    let e = p.parse_expr();
    assert_eq!(crate::consteval::eval_32(&e), 2);
  }
}
