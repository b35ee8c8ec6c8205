//! Parser (§4.7): recursive-descent, builds the typed AST while resolving
//! identifiers through lexical scopes and inserting implicit casts/decays.

mod decl;
mod expr;
mod init;
mod stmt;

use std::cell::RefCell;
use std::rc::Rc;
use hashbrown::HashSet;
use crate::ast::{FunctionDef, Stmt};
use crate::diag::{Loc, WarningKind};
use crate::intern::{intern, Atom};
use crate::scope::{Builtin, Linkage, NamespaceTag, Scope, Symbol, SymbolFlags, SymbolKind, SymbolRef, TagEntry};
use crate::token::{Lexer, Token, TokenKind};
use crate::types::{Base, Qual, Record, Type};

/// A global variable awaiting codegen: either a tentative declaration, a
/// zero/constant-initialised definition, or one whose initialiser needs a
/// synthetic constructor function (decided later, in codegen, per
/// spec.md §4.10 "Static initializers").
pub struct GlobalVar {
  pub sym: SymbolRef,
  pub init: Option<crate::ast::Expr>,
}

/// The output of parsing one translation unit: every function definition
/// and every global variable declared, plus the global scope (so
/// orchestration can flush tentative definitions).
pub struct TranslationUnit {
  pub functions: Vec<FunctionDef>,
  pub globals: Vec<GlobalVar>,
  pub global_scope: Rc<RefCell<Scope>>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StorageClass { None, Typedef, Extern, Static, Auto, Register }

/// Accumulated type-specifier flags, resolved to a `Base` once the whole
/// specifier-sequence has been consumed. Mirrors the bit-flag accumulation
/// in spec.md §4.7's declaration description.
#[derive(Default)]
struct TypeSpecAcc {
  void: u8, bool_: u8, char_: u8, short: u8, int: u8, long: u8,
  signed: u8, unsigned: u8, float: u8, double: u8,
  record: Option<Type>, r#enum: Option<Type>, typedef: Option<Type>,
}

pub(crate) struct LoopCtx {
  pub is_switch: bool,
  pub cases: Option<Rc<RefCell<Vec<crate::ast::CaseLabel>>>>,
}

pub struct Parser<'a> {
  lex: Lexer<'a>,
  global: Rc<RefCell<Scope>>,
  scope: Rc<RefCell<Scope>>,
  pub(crate) loop_stack: Vec<LoopCtx>,
  functions: Vec<FunctionDef>,
  globals: Vec<GlobalVar>,
  next_anon_tag: u32,
  cur_func_name: Option<Atom>,
  cur_func_ret: Option<Type>,
  warned_implicit_int_once: HashSet<Atom>,
}

impl<'a> Parser<'a> {
  #[must_use] pub fn new(src: &'a [u8], filename: &str) -> Self {
    let global = Scope::new(None);
    install_builtins(&global);
    Parser {
      lex: Lexer::new(src, filename),
      global: global.clone(),
      scope: global,
      loop_stack: Vec::new(),
      functions: Vec::new(),
      globals: Vec::new(),
      next_anon_tag: 0,
      cur_func_name: None,
      cur_func_ret: None,
      warned_implicit_int_once: HashSet::new(),
    }
  }

  fn loc(&self) -> Loc<'_> { Loc::At(self.lex.peek_token()) }
  fn tok(&self) -> Token { self.lex.peek_token().clone() }

  fn push_scope(&mut self) {
    let child = Scope::new(Some(self.scope.clone()));
    self.scope = child;
  }

  fn pop_scope(&mut self) {
    let parent = self.scope.borrow().parent.clone().expect("pop_scope at global scope");
    self.scope = parent;
  }

  fn fresh_tag(&mut self) -> Atom {
    let n = self.next_anon_tag;
    self.next_anon_tag += 1;
    intern(&format!("<anon{n}>"))
  }

  /// Entry point: repeat `parse_global` until the end token (§4.12).
  pub fn parse_translation_unit(mut self) -> TranslationUnit {
    while !self.lex.peek_token().is(TokenKind::End) {
      self.parse_global();
    }
    TranslationUnit { functions: self.functions, globals: self.globals, global_scope: self.global }
  }
}

fn install_builtins(global: &Rc<RefCell<Scope>>) {
  let mut add = |name: &str, sel: Builtin| {
    let atom = intern(name);
    global.borrow_mut().insert_symbol(Rc::new(RefCell::new(Symbol::new_builtin(atom, sel))));
  };
  add("__builtin_va_start", Builtin::VaStart);
  add("__builtin_va_arg", Builtin::VaArg);
  add("__builtin_va_end", Builtin::VaEnd);
  add("__builtin_va_copy", Builtin::VaCopy);
  add("__builtin_alloca", Builtin::Alloca);
  add("__builtin_unreachable", Builtin::Unreachable);
  add("__builtin_expect", Builtin::ExpectBool);
  // va_start/va_arg/va_end are also reachable un-prefixed after
  // `#include <stdarg.h>` in the original toolchain's headers; the
  // preprocessor (an excluded collaborator) is responsible for mapping
  // `va_start` to `__builtin_va_start` via that header, so the parser only
  // needs to know the `__builtin_` spellings.
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_empty_main() {
    let tu = Parser::new(b"int main(void) {}", "t.c").parse_translation_unit();
    assert_eq!(tu.functions.len(), 1);
    assert_eq!(tu.functions[0].sym.borrow().name.as_string(), "main");
  }

  #[test]
  fn parses_tentative_then_definition() {
    let tu = Parser::new(b"int x; int x = 5;", "t.c").parse_translation_unit();
    assert_eq!(tu.globals.len(), 1);
    assert!(tu.globals[0].init.is_some());
  }
}
