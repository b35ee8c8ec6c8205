//! Scope & symbol table (§4.5).
//!
//! Scopes form a stack during parsing. Insertion does not deduplicate: the
//! parser decides what *kind* of redeclaration it is seeing (an
//! extern-replacing-extern, a definition completing a tentative one, or an
//! outright duplicate) and acts accordingly — the scope itself is a dumb
//! container.

use std::cell::RefCell;
use std::rc::Rc;
use hashbrown::HashMap;
use crate::intern::Atom;
use crate::token::Token;
use crate::types::Type;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum NamespaceTag { Typedef, TagStruct, TagUnion, TagEnum }

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Linkage { None, Internal, External }

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SymbolKind { Variable, Function, Constant, Builtin }

bitflags::bitflags! {
  #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
  pub struct SymbolFlags: u8 {
    const WEAK        = 1 << 0;
    const DEFINED     = 1 << 1;
    const TENTATIVE    = 1 << 2;
    const CONSTRUCTOR  = 1 << 3;
    const DESTRUCTOR   = 1 << 4;
  }
}

/// The constant payload of an enumerator symbol: either a 32- or 64-bit
/// value, matching spec.md §3's "u32 or u64 for enumerators".
#[derive(Clone, Copy, Debug)]
pub enum ConstPayload { U32(u32), U64(u64) }

/// A builtin's selector, dispatched by the code generator rather than by
/// ordinary call lowering.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Builtin {
  VaStart, VaArg, VaEnd, VaCopy, Func, Function,
  Alloca, Unreachable, ExpectBool,
}

/// A name bound in a scope: a variable, function, enumeration constant, or
/// compiler builtin.
#[derive(Debug)]
pub struct Symbol {
  pub kind: SymbolKind,
  /// `None` only for builtins.
  pub ty: Option<Type>,
  pub decl_token: Option<Token>,
  pub name: Atom,
  /// The name this symbol is emitted under; may differ from `name` when an
  /// `asm("...")` rename is present.
  pub asm_name: Atom,
  /// Stack-frame offset from `rfp`, locals only.
  pub frame_offset: Option<i32>,
  pub linkage: Linkage,
  pub flags: SymbolFlags,
  pub ctor_priority: Option<u32>,
  pub constant: Option<ConstPayload>,
  pub builtin: Option<Builtin>,
}

impl Symbol {
  #[must_use] pub fn new_variable(name: Atom, ty: Type, linkage: Linkage) -> Self {
    Symbol {
      kind: SymbolKind::Variable, ty: Some(ty), decl_token: None, name, asm_name: name,
      frame_offset: None, linkage, flags: SymbolFlags::empty(), ctor_priority: None,
      constant: None, builtin: None,
    }
  }

  #[must_use] pub fn new_function(name: Atom, ty: Type, linkage: Linkage) -> Self {
    Symbol {
      kind: SymbolKind::Function, ty: Some(ty), decl_token: None, name, asm_name: name,
      frame_offset: None, linkage, flags: SymbolFlags::empty(), ctor_priority: None,
      constant: None, builtin: None,
    }
  }

  #[must_use] pub fn new_enumerator(name: Atom, ty: Type, value: i64) -> Self {
    Symbol {
      kind: SymbolKind::Constant, ty: Some(ty), decl_token: None, name, asm_name: name,
      frame_offset: None, linkage: Linkage::None, flags: SymbolFlags::DEFINED, ctor_priority: None,
      constant: Some(ConstPayload::U64(value as u64)), builtin: None,
    }
  }

  #[must_use] pub fn new_builtin(name: Atom, sel: Builtin) -> Self {
    Symbol {
      kind: SymbolKind::Builtin, ty: None, decl_token: None, name, asm_name: name,
      frame_offset: None, linkage: Linkage::None, flags: SymbolFlags::DEFINED, ctor_priority: None,
      constant: None, builtin: Some(sel),
    }
  }

  #[must_use] pub fn is_tentative(&self) -> bool { self.flags.contains(SymbolFlags::TENTATIVE) }
  #[must_use] pub fn is_defined(&self) -> bool { self.flags.contains(SymbolFlags::DEFINED) }
}

pub type SymbolRef = Rc<RefCell<Symbol>>;

/// A tag-namespace entry: either a forward-declared/defined type (struct,
/// union, or enum tag) or a typedef alias.
#[derive(Clone)]
pub enum TagEntry {
  Typedef(Type),
  Tag(Type),
}

/// A lexical scope. Scopes are owned by whoever pushes them onto the
/// parse-time stack, or are stashed inside a function type's prototype
/// scope (spec.md §3/§4.5).
pub struct Scope {
  pub parent: Option<Rc<RefCell<Scope>>>,
  symbols: HashMap<Atom, SymbolRef>,
  tags: HashMap<(Atom, NamespaceTag), TagEntry>,
  /// Anonymous records declared in this scope, kept alive even though no
  /// name refers to them directly.
  pub anon_records: Vec<Rc<RefCell<crate::types::Record>>>,
}

impl Scope {
  #[must_use] pub fn new(parent: Option<Rc<RefCell<Scope>>>) -> Rc<RefCell<Scope>> {
    Rc::new(RefCell::new(Scope {
      parent, symbols: HashMap::new(), tags: HashMap::new(), anon_records: Vec::new(),
    }))
  }

  /// Insert a symbol into this scope without deduplication; the caller is
  /// responsible for redeclaration semantics.
  pub fn insert_symbol(&mut self, sym: SymbolRef) {
    let name = sym.borrow().name;
    self.symbols.insert(name, sym);
  }

  /// Local (current-frame-only) symbol lookup.
  #[must_use] pub fn lookup_local(&self, name: Atom) -> Option<SymbolRef> {
    self.symbols.get(&name).cloned()
  }

  pub fn insert_tag(&mut self, name: Atom, ns: NamespaceTag, entry: TagEntry) {
    self.tags.insert((name, ns), entry);
  }

  #[must_use] pub fn lookup_tag_local(&self, name: Atom, ns: NamespaceTag) -> Option<TagEntry> {
    self.tags.get(&(name, ns)).cloned()
  }
}

impl Clone for TagEntry {
  fn clone(&self) -> Self {
    match self { TagEntry::Typedef(t) => TagEntry::Typedef(t.clone()), TagEntry::Tag(t) => TagEntry::Tag(t.clone()) }
  }
}

/// Recursive (search-up) symbol lookup starting at `scope`.
#[must_use] pub fn lookup_symbol(scope: &Rc<RefCell<Scope>>, name: Atom) -> Option<SymbolRef> {
  let mut cur = scope.clone();
  loop {
    if let Some(s) = cur.borrow().lookup_local(name) { return Some(s) }
    let parent = cur.borrow().parent.clone();
    match parent { Some(p) => cur = p, None => return None }
  }
}

/// Recursive tag lookup starting at `scope`.
#[must_use] pub fn lookup_tag(scope: &Rc<RefCell<Scope>>, name: Atom, ns: NamespaceTag) -> Option<TagEntry> {
  let mut cur = scope.clone();
  loop {
    if let Some(t) = cur.borrow().lookup_tag_local(name, ns) { return Some(t) }
    let parent = cur.borrow().parent.clone();
    match parent { Some(p) => cur = p, None => return None }
  }
}

/// `scope_emit_tentative_definitions`: walk the global scope at
/// translation-unit end and mark every still-tentative symbol as having a
/// zero-initialised definition. The driver (orchestration, §4.12) is
/// responsible for actually emitting the zeroed datum; this just flips the
/// bookkeeping flag and returns the symbols that need it.
#[must_use] pub fn tentative_definitions(global: &Rc<RefCell<Scope>>) -> Vec<SymbolRef> {
  global.borrow().symbols.values()
    .filter(|s| s.borrow().is_tentative() && !s.borrow().is_defined())
    .cloned()
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{Base, Qual};

  #[test]
  fn lookup_recurses_to_parent() {
    let global = Scope::new(None);
    let ty = Type::new_base(Base::SInt, Qual::empty());
    let sym = Rc::new(RefCell::new(Symbol::new_variable(Atom::new("x"), ty, Linkage::External)));
    global.borrow_mut().insert_symbol(sym);
    let inner = Scope::new(Some(global.clone()));
    assert!(lookup_symbol(&inner, Atom::new("x")).is_some());
    assert!(lookup_symbol(&inner, Atom::new("y")).is_none());
  }

  #[test]
  fn local_lookup_does_not_see_parent() {
    let global = Scope::new(None);
    let ty = Type::new_base(Base::SInt, Qual::empty());
    let sym = Rc::new(RefCell::new(Symbol::new_variable(Atom::new("x"), ty, Linkage::External)));
    global.borrow_mut().insert_symbol(sym);
    let inner = Scope::new(Some(global));
    assert!(inner.borrow().lookup_local(Atom::new("x")).is_none());
  }

  #[test]
  fn tentative_collects_undefined_tentatives() {
    let global = Scope::new(None);
    let ty = Type::new_base(Base::SInt, Qual::empty());
    let mut sym = Symbol::new_variable(Atom::new("x"), ty, Linkage::External);
    sym.flags |= SymbolFlags::TENTATIVE;
    global.borrow_mut().insert_symbol(Rc::new(RefCell::new(sym)));
    assert_eq!(tentative_definitions(&global).len(), 1);
  }
}
