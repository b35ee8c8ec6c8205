//! Initializers (§4.6 edge cases): the C17 "current object" braced walk.
//!
//! A designator (`[i] =` or `.field =`) repositions the current object;
//! plain entries advance it by one. Nested aggregates without braces
//! ("brace elision") are not supported — every nested array/struct/union
//! initializer must be explicitly braced. This is a deliberate narrowing
//! of full C17 9.2; real-world initializers are braced almost universally,
//! and the dense index-map result (`ExprKind::InitList`) is unaffected
//! either way.

use super::*;
use crate::ast::{Expr, ExprKind};
use crate::types::{Base, Qual};

impl<'a> Parser<'a> {
  /// An initializer in declarator or designator position: a braced list, a
  /// string literal for a char array, or a plain assignment-expression.
  pub(super) fn parse_initializer_expr(&mut self, ty: &Type) -> Expr {
    if self.lex.peek_token().is_text("{") {
      return self.parse_braced_initializer(ty)
    }
    if is_char_array(ty) && self.lex.peek_token().is(TokenKind::String) {
      return self.parse_string_array_initializer(ty)
    }
    let e = self.parse_assign_expr();
    if ty.is_scalar() { crate::ast::cast(e, ty.clone(), None, Loc::None) } else { e }
  }

  pub(super) fn parse_braced_initializer(&mut self, ty: &Type) -> Expr {
    let tok = self.tok();
    self.lex.expect("{", "expected '{' to open initializer list");
    if ty.is_array() {
      self.parse_array_initializer_body(ty, tok)
    } else if ty.is_record() {
      self.parse_record_initializer_body(ty, tok)
    } else {
      // A scalar may legally be wrapped in one redundant brace pair:
      // `int x = { 5 };`.
      let e = self.parse_assign_expr();
      self.lex.accept(",");
      self.lex.expect("}", "expected '}' to close scalar initializer");
      crate::ast::cast(e, ty.clone(), None, Loc::At(&tok))
    }
  }

  fn parse_array_initializer_body(&mut self, ty: &Type, tok: Token) -> Expr {
    let elem = ty.referent().expect("array referent").clone();
    let declared_len = ty.array_len();
    let mut slots: Vec<Option<Expr>> = Vec::new();
    let mut idx: usize = 0;
    while !self.lex.peek_token().is_text("}") {
      if self.lex.accept("[") {
        idx = crate::consteval::eval_32(&self.parse_const_expr()) as usize;
        self.lex.expect("]", "expected ']' after array designator index");
        self.lex.expect("=", "expected '=' after array designator");
      }
      if let Some(n) = declared_len {
        if idx as u64 >= n {
          crate::fatal!(Loc::At(&tok), "array initializer index {idx} out of bounds for array of length {n}");
        }
      }
      while slots.len() <= idx { slots.push(None); }
      if slots[idx].is_some() {
        crate::warn_at!(WarningKind::InitializerOverrides, Loc::At(&tok),
          "initializer for array element {idx} overrides a prior value");
      }
      let v = self.parse_initializer_expr(&elem);
      slots[idx] = Some(coerce_elem(v, &elem, &tok));
      idx += 1;
      if !self.lex.accept(",") { break }
    }
    self.lex.expect("}", "expected '}' to close array initializer");
    let final_len = declared_len.unwrap_or(slots.len() as u64);
    while (slots.len() as u64) < final_len { slots.push(None); }
    let array_ty = Type::new_array(elem, final_len);
    Expr::new(array_ty, ExprKind::InitList(slots), Some(tok))
  }

  fn parse_record_initializer_body(&mut self, ty: &Type, tok: Token) -> Expr {
    let rec = ty.record().expect("record type");
    let member_count = rec.borrow().members.len();
    let mut slots: Vec<Option<Expr>> = vec![None; member_count];
    let mut idx: usize = 0;
    while !self.lex.peek_token().is_text("}") {
      if self.lex.accept(".") {
        let name = intern(&self.lex.peek_token().text());
        self.lex.consume();
        self.lex.expect("=", "expected '=' after designated member");
        idx = rec.borrow().members.iter().position(|m| m.name == name)
          .unwrap_or_else(|| crate::fatal!(Loc::At(&tok), "no member named '{}' in initializer", name));
      }
      if idx >= member_count {
        crate::fatal!(Loc::At(&tok), "excess elements in struct/union initializer");
      }
      if slots[idx].is_some() {
        crate::warn_at!(WarningKind::InitializerOverrides, Loc::At(&tok),
          "initializer for member '{}' overrides a prior value", rec.borrow().members[idx].name);
      }
      let mty = rec.borrow().members[idx].ty.clone();
      let v = self.parse_initializer_expr(&mty);
      slots[idx] = Some(coerce_elem(v, &mty, &tok));
      idx += 1;
      if !rec.borrow().is_struct { break } // a union initializer sets exactly one member
      if !self.lex.accept(",") { break }
    }
    self.lex.expect("}", "expected '}' to close struct/union initializer");
    Expr::new(ty.clone(), ExprKind::InitList(slots), Some(tok))
  }

  fn parse_string_array_initializer(&mut self, ty: &Type) -> Expr {
    let tok = self.tok();
    self.lex.consume();
    let bytes: Rc<[u8]> = Rc::from(tok.text().into_bytes());
    let declared = ty.array_len();
    if let Some(n) = declared {
      if bytes.len() as u64 > n {
        crate::fatal!(Loc::At(&tok), "initializer string is too long for the declared array");
      }
    }
    let len = declared.unwrap_or(bytes.len() as u64 + 1);
    let arr_ty = Type::new_array(Type::new_base(Base::Char, Qual::empty()), len);
    Expr::new(arr_ty, ExprKind::StringLiteral(bytes), Some(tok))
  }
}

fn is_char_array(ty: &Type) -> bool {
  ty.is_array() && ty.referent().is_some_and(|r| r.base() == Some(Base::Char))
}

/// Cast a leaf initializer to its target element type only when that
/// target is scalar; aggregate elements arrive already correctly typed
/// from the recursive call, and `cast` fatally rejects array/record
/// *targets* outright.
fn coerce_elem(v: Expr, elem: &Type, tok: &Token) -> Expr {
  if elem.is_scalar() { crate::ast::cast(v, elem.clone(), None, Loc::At(tok)) } else { v }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn array_initializer_extends_indeterminate_length() {
    let tu = Parser::new(b"int a[] = {1, 2, 3};", "t.c").parse_translation_unit();
    assert_eq!(tu.globals.len(), 1);
    assert_eq!(tu.globals[0].sym.borrow().ty.as_ref().unwrap().array_len(), Some(3));
  }

  #[test]
  fn designated_array_initializer_repositions_cursor() {
    let tu = Parser::new(b"int a[5] = {[2] = 9, 10};", "t.c").parse_translation_unit();
    assert_eq!(tu.globals.len(), 1);
  }

  #[test]
  fn char_array_from_string_literal() {
    let tu = Parser::new(b"char s[] = \"hi\";", "t.c").parse_translation_unit();
    assert_eq!(tu.globals[0].sym.borrow().ty.as_ref().unwrap().array_len(), Some(3));
  }
}
