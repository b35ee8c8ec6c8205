//! Interned strings (§4.2).
//!
//! Identifiers, keywords, and string/char literal payloads are all deduped
//! through a single process-wide table keyed by FNV-1a hash of the byte
//! content, so that equality between interned atoms is a plain integer
//! comparison. Unlike the C original's explicit refcounted chains, atoms
//! here live in an arena that is never individually freed: the whole table
//! is dropped at process exit. This is the "GC language simply retains
//! references" option flagged in the design notes as an acceptable
//! resolution of the refcounting requirement.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use hashbrown::HashMap;

thread_local! {
  static INTERNER: RefCell<Interner> = RefCell::new(Interner::new());
}

struct Interner {
  strings: Vec<Rc<str>>,
  map: HashMap<Rc<str>, Atom>,
}

impl Interner {
  fn new() -> Self {
    Interner { strings: Vec::new(), map: HashMap::new() }
  }

  fn intern(&mut self, s: &str) -> Atom {
    if let Some(&atom) = self.map.get(s) {
      return atom
    }
    let rc: Rc<str> = Rc::from(s);
    let atom = Atom(u32::try_from(self.strings.len()).expect("too many interned strings"));
    self.strings.push(rc.clone());
    self.map.insert(rc, atom);
    atom
  }
}

/// An interned, deduplicated byte string. Two atoms are equal iff they were
/// interned from byte-identical content; comparison is `O(1)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom(u32);

impl Atom {
  /// Intern `s`, returning a handle usable for `O(1)` equality comparison.
  #[must_use] pub fn new(s: &str) -> Self { intern(s) }

  /// Borrow the underlying string data for the lifetime of this call.
  /// Atoms are never freed, so this is safe to leak past the borrow in
  /// spirit (the backing `Rc<str>` outlives the process), but we still
  /// return a short-lived reference to keep the API honest.
  pub fn with_str<R>(self, f: impl FnOnce(&str) -> R) -> R {
    INTERNER.with(|i| f(&i.borrow().strings[self.0 as usize]))
  }

  /// Copy out an owned `String`. Convenience for error messages.
  #[must_use] pub fn as_string(self) -> String { self.with_str(str::to_owned) }

  #[must_use] pub fn is_empty(self) -> bool { self.with_str(str::is_empty) }
}

impl fmt::Debug for Atom {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.with_str(|s| write!(f, "{s:?}"))
  }
}

impl fmt::Display for Atom {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.with_str(|s| f.write_str(s))
  }
}

/// Intern `s` into the process-wide table.
#[must_use] pub fn intern(s: &str) -> Atom {
  INTERNER.with(|i| i.borrow_mut().intern(s))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn same_content_same_atom() {
    let a = intern("hello");
    let b = intern("hello");
    assert_eq!(a, b);
  }

  #[test]
  fn different_content_different_atom() {
    assert_ne!(intern("foo"), intern("bar"));
  }

  #[test]
  fn round_trips_through_display() {
    let a = intern("round_trip_me");
    assert_eq!(a.as_string(), "round_trip_me");
  }
}
