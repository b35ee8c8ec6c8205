//! Type & record system (§4.4).
//!
//! Types are reference-counted, immutable, and tree-structured: either a
//! `Base` (an arithmetic/void/bool/record/enum/va_list leaf carrying
//! qualifiers) or a `Declarator` (pointer/function/array/VLA/indeterminate
//! array wrapping a referent type). Qualifier-only variation is modelled by
//! cloning the `Rc<TypeData>` with new flags and sharing the referent —
//! types form a DAG, never a cycle, by construction.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use bitflags::bitflags;
use hashbrown::HashMap;
use crate::intern::Atom;
use crate::token::Token;

bitflags! {
  #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
  pub struct Qual: u8 {
    const CONST    = 1 << 0;
    const VOLATILE = 1 << 1;
    const RESTRICT = 1 << 2;
  }
}

/// Pointer/array word size on the target virtual machine (§4.4: "alignment
/// is min(size, word-size=4) for bases").
pub const WORD_SIZE: u32 = 4;

#[derive(Clone, Copy, PartialEq, Eq, Debug, PartialOrd, Ord)]
pub enum Base {
  Void, Bool,
  Char, SChar, UChar,
  SShort, UShort,
  SInt, UInt,
  SLong, ULong,
  SLongLong, ULongLong,
  Float, Double, LongDouble,
  Record, Enum,
  VaList,
}

impl Base {
  /// Integer conversion rank, C17 6.3.1.1: `bool < char family < short <
  /// int < long < long long`. `char`/`signed char`/`unsigned char` share a
  /// rank (they differ only in signedness), as do the two short/int/long
  /// variants of each width.
  #[must_use] pub fn rank(self) -> u8 {
    match self {
      Base::Bool => 0,
      Base::Char | Base::SChar | Base::UChar => 1,
      Base::SShort | Base::UShort => 2,
      Base::SInt | Base::UInt => 3,
      Base::SLong | Base::ULong => 4,
      Base::SLongLong | Base::ULongLong => 5,
      _ => 255,
    }
  }

  #[must_use] pub fn is_integer(self) -> bool {
    matches!(self,
      Base::Bool | Base::Char | Base::SChar | Base::UChar |
      Base::SShort | Base::UShort | Base::SInt | Base::UInt |
      Base::SLong | Base::ULong | Base::SLongLong | Base::ULongLong)
  }

  #[must_use] pub fn is_unsigned(self) -> bool {
    matches!(self, Base::Bool | Base::UChar | Base::UShort | Base::UInt |
      Base::ULong | Base::ULongLong)
  }

  #[must_use] pub fn is_float(self) -> bool {
    matches!(self, Base::Float | Base::Double | Base::LongDouble)
  }

  #[must_use] pub fn is_arithmetic(self) -> bool { self.is_integer() || self.is_float() }

  /// Byte size, ignoring record/enum (those carry their own size).
  #[must_use] pub fn size(self) -> u32 {
    match self {
      Base::Void => 1, // GNU extension: sizeof(void) == 1
      Base::Bool | Base::Char | Base::SChar | Base::UChar => 1,
      Base::SShort | Base::UShort => 2,
      Base::SInt | Base::UInt => 4,
      Base::SLong | Base::ULong => 4,
      Base::SLongLong | Base::ULongLong => 8,
      Base::Float => 4,
      Base::Double => 8,
      Base::LongDouble => 8,
      Base::Record | Base::Enum => 0, // filled in by caller from the record/enum
      Base::VaList => WORD_SIZE,
    }
  }

  /// True for the two 64-bit-wide bases that must be passed/returned
  /// indirectly per spec.md §4.4.
  #[must_use] pub fn is_wide(self) -> bool {
    matches!(self, Base::SLongLong | Base::ULongLong | Base::Double | Base::LongDouble)
  }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Declarator { Pointer, Function, Array, Vla, Indeterminate }

#[derive(Debug)]
pub enum TypeKind {
  Base { base: Base, record: Option<Rc<RefCell<Record>>>, r#enum: Option<Rc<RefCell<Enum>>> },
  Declarator {
    kind: Declarator,
    referent: Type,
    /// Array element count; `None` for indeterminate/VLA/pointer/function.
    array_len: Option<u64>,
    func: Option<FunctionType>,
  },
}

#[derive(Debug)]
pub struct FunctionType {
  pub ret: Type,
  pub args: Vec<Type>,
  pub arg_names: Vec<Option<Atom>>,
  pub variadic: bool,
  /// The prototype scope captured so that a later definition of this
  /// function re-enters the same parameter scope (spec.md §4.5).
  pub proto_scope: Option<Rc<RefCell<crate::scope::Scope>>>,
}

struct TypeData {
  qual: Qual,
  kind: TypeKind,
}

/// A reference-counted, immutable type node. Clones are pointer copies.
#[derive(Clone)]
pub struct Type(Rc<TypeData>);

impl fmt::Debug for Type {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.kind.fmt(f) }
}

impl Type {
  #[must_use] pub fn qual(&self) -> Qual { self.0.qual }
  #[must_use] pub fn kind(&self) -> &TypeKind { &self.0.kind }
  #[must_use] pub fn is_const(&self) -> bool { self.0.qual.contains(Qual::CONST) }

  #[must_use] pub fn new_base(base: Base, qual: Qual) -> Self {
    Type(Rc::new(TypeData { qual, kind: TypeKind::Base { base, record: None, r#enum: None } }))
  }

  #[must_use] pub fn new_record(record: Rc<RefCell<Record>>, qual: Qual) -> Self {
    Type(Rc::new(TypeData {
      qual, kind: TypeKind::Base { base: Base::Record, record: Some(record), r#enum: None },
    }))
  }

  #[must_use] pub fn new_enum(e: Rc<RefCell<Enum>>, qual: Qual) -> Self {
    Type(Rc::new(TypeData {
      qual, kind: TypeKind::Base { base: Base::Enum, record: None, r#enum: Some(e) },
    }))
  }

  #[must_use] pub fn new_pointer(referent: Type, qual: Qual) -> Self {
    Type(Rc::new(TypeData {
      qual,
      kind: TypeKind::Declarator {
        kind: Declarator::Pointer, referent, array_len: None, func: None,
      },
    }))
  }

  #[must_use] pub fn new_array(referent: Type, count: u64) -> Self {
    Type(Rc::new(TypeData {
      qual: Qual::empty(),
      kind: TypeKind::Declarator {
        kind: Declarator::Array, referent, array_len: Some(count), func: None,
      },
    }))
  }

  #[must_use] pub fn new_vla(referent: Type) -> Self {
    Type(Rc::new(TypeData {
      qual: Qual::empty(),
      kind: TypeKind::Declarator { kind: Declarator::Vla, referent, array_len: None, func: None },
    }))
  }

  #[must_use] pub fn new_indeterminate_array(referent: Type) -> Self {
    Type(Rc::new(TypeData {
      qual: Qual::empty(),
      kind: TypeKind::Declarator {
        kind: Declarator::Indeterminate, referent, array_len: None, func: None,
      },
    }))
  }

  #[must_use] pub fn new_function(ret: Type, args: Vec<Type>, arg_names: Vec<Option<Atom>>,
    variadic: bool, proto_scope: Option<Rc<RefCell<crate::scope::Scope>>>) -> Self
  {
    Type(Rc::new(TypeData {
      qual: Qual::empty(),
      kind: TypeKind::Declarator {
        kind: Declarator::Function,
        referent: ret.clone(),
        array_len: None,
        func: Some(FunctionType { ret, args, arg_names, variadic, proto_scope }),
      },
    }))
  }

  /// Return a clone of `self` with qualifiers replaced, sharing the
  /// referent (qualifier-adding returns a clone that shares the referent,
  /// per spec.md §4.4).
  #[must_use] pub fn qualify(&self, qual: Qual) -> Self {
    match &self.0.kind {
      TypeKind::Base { base, record, r#enum } => Type(Rc::new(TypeData {
        qual, kind: TypeKind::Base { base: *base, record: record.clone(), r#enum: r#enum.clone() },
      })),
      TypeKind::Declarator { kind, referent, array_len, func } => Type(Rc::new(TypeData {
        qual,
        kind: TypeKind::Declarator {
          kind: *kind, referent: referent.clone(), array_len: *array_len,
          func: func.as_ref().map(|f| FunctionType {
            ret: f.ret.clone(), args: f.args.clone(), arg_names: f.arg_names.clone(),
            variadic: f.variadic, proto_scope: f.proto_scope.clone(),
          }),
        },
      })),
    }
  }

  #[must_use] pub fn unqualified(&self) -> Self { self.qualify(Qual::empty()) }

  #[must_use] pub fn referent(&self) -> Option<&Type> {
    match &self.0.kind { TypeKind::Declarator { referent, .. } => Some(referent), _ => None }
  }

  #[must_use] pub fn declarator(&self) -> Option<Declarator> {
    match &self.0.kind { TypeKind::Declarator { kind, .. } => Some(*kind), _ => None }
  }

  #[must_use] pub fn base(&self) -> Option<Base> {
    match &self.0.kind { TypeKind::Base { base, .. } => Some(*base), _ => None }
  }

  #[must_use] pub fn record(&self) -> Option<Rc<RefCell<Record>>> {
    match &self.0.kind { TypeKind::Base { record, .. } => record.clone(), _ => None }
  }

  #[must_use] pub fn r#enum(&self) -> Option<Rc<RefCell<Enum>>> {
    match &self.0.kind { TypeKind::Base { r#enum, .. } => r#enum.clone(), _ => None }
  }

  #[must_use] pub fn function(&self) -> Option<&FunctionType> {
    match &self.0.kind { TypeKind::Declarator { func, .. } => func.as_ref(), _ => None }
  }

  #[must_use] pub fn array_len(&self) -> Option<u64> {
    match &self.0.kind { TypeKind::Declarator { array_len, .. } => *array_len, _ => None }
  }

  #[must_use] pub fn is_pointer(&self) -> bool { self.declarator() == Some(Declarator::Pointer) }
  #[must_use] pub fn is_function(&self) -> bool { self.declarator() == Some(Declarator::Function) }
  #[must_use] pub fn is_array(&self) -> bool {
    matches!(self.declarator(), Some(Declarator::Array | Declarator::Vla | Declarator::Indeterminate))
  }
  #[must_use] pub fn is_void(&self) -> bool { self.base() == Some(Base::Void) }
  #[must_use] pub fn is_record(&self) -> bool { self.base() == Some(Base::Record) }
  #[must_use] pub fn is_arithmetic(&self) -> bool { self.base().is_some_and(Base::is_arithmetic) }
  #[must_use] pub fn is_integer(&self) -> bool {
    self.base().is_some_and(Base::is_integer) || self.base() == Some(Base::Enum)
  }
  #[must_use] pub fn is_scalar(&self) -> bool { self.is_arithmetic() || self.is_pointer() || self.is_integer() }

  /// The underlying integer representation of the type for arithmetic
  /// purposes: enums decay to their underlying int, everything else is
  /// itself.
  #[must_use] pub fn arithmetic_base(&self) -> Base {
    match self.base() {
      Some(Base::Enum) => Base::SInt,
      Some(b) => b,
      None => Base::SInt,
    }
  }

  #[must_use] pub fn is_unsigned(&self) -> bool { self.arithmetic_base().is_unsigned() }

  /// `type_size` (§4.4): byte size of this type. `void` is 1 byte (GNU
  /// extension). Panics (an internal invariant violation, not a user
  /// error) if called on an incomplete array/record — callers must check
  /// `is_complete` first, matching the testable-properties invariant in
  /// spec.md §8.
  #[must_use] pub fn size(&self) -> u32 {
    match &self.0.kind {
      TypeKind::Base { base: Base::Record, record, .. } => {
        record.as_ref().expect("BASE_RECORD type must carry a record").borrow().size
      }
      TypeKind::Base { base: Base::Enum, .. } => Base::SInt.size(),
      TypeKind::Base { base, .. } => base.size(),
      TypeKind::Declarator { kind: Declarator::Pointer | Declarator::Function, .. } => WORD_SIZE,
      TypeKind::Declarator { kind: Declarator::Array, referent, array_len, .. } =>
        referent.size() * u32::try_from(array_len.expect("array without length")).expect("array too large"),
      TypeKind::Declarator { kind: Declarator::Vla | Declarator::Indeterminate, .. } =>
        panic!("size of incomplete array type"),
    }
  }

  /// Alignment per spec.md §4.4: `min(size, 4)` for bases, element
  /// alignment for arrays, recorded alignment for records, `4` for
  /// pointers/functions.
  #[must_use] pub fn align(&self) -> u32 {
    match &self.0.kind {
      TypeKind::Base { base: Base::Record, record, .. } =>
        record.as_ref().expect("record").borrow().align,
      TypeKind::Base { base, .. } => base.size().min(WORD_SIZE).max(1),
      TypeKind::Declarator { kind: Declarator::Pointer | Declarator::Function, .. } => WORD_SIZE,
      TypeKind::Declarator { referent, .. } => referent.align(),
    }
  }

  #[must_use] pub fn is_complete(&self) -> bool {
    match &self.0.kind {
      TypeKind::Base { base: Base::Void, .. } => false,
      TypeKind::Base { base: Base::Record, record, .. } =>
        record.as_ref().is_some_and(|r| r.borrow().is_defined),
      TypeKind::Base { .. } => true,
      TypeKind::Declarator { kind: Declarator::Array, .. } => true,
      TypeKind::Declarator { kind: Declarator::Pointer | Declarator::Function, .. } => true,
      TypeKind::Declarator { kind: Declarator::Vla | Declarator::Indeterminate, .. } => false,
    }
  }

  /// A value is passed indirectly when it is a 64-bit base (`double`,
  /// `long long`) or a record larger than a word. Arrays decay before
  /// reaching argument position, so they are never indirect in this sense.
  #[must_use] pub fn is_indirect(&self) -> bool {
    match self.base() {
      Some(b) if b.is_wide() => true,
      Some(Base::Record) => self.size() > WORD_SIZE,
      _ => false,
    }
  }
}

/// Structural equality: matching qualifiers and identical structure.
#[must_use] pub fn type_equal(a: &Type, b: &Type) -> bool {
  if a.qual() != b.qual() { return false }
  match (a.kind(), b.kind()) {
    (TypeKind::Base { base: ba, record: ra, r#enum: ea },
     TypeKind::Base { base: bb, record: rb, r#enum: eb }) => {
      if ba != bb { return false }
      match (ra, rb) {
        (Some(x), Some(y)) => Rc::ptr_eq(x, y),
        (None, None) => true,
        _ => false,
      } && match (ea, eb) {
        (Some(x), Some(y)) => Rc::ptr_eq(x, y),
        (None, None) => true,
        _ => false,
      }
    }
    (TypeKind::Declarator { kind: ka, referent: ra, array_len: la, func: fa },
     TypeKind::Declarator { kind: kb, referent: rb, array_len: lb, func: fb }) => {
      ka == kb && la == lb && type_equal(ra, rb) && match (fa, fb) {
        (Some(x), Some(y)) =>
          type_equal(&x.ret, &y.ret) && x.variadic == y.variadic
            && x.args.len() == y.args.len()
            && x.args.iter().zip(&y.args).all(|(p, q)| type_equal(p, q)),
        (None, None) => true,
        _ => false,
      }
    }
    _ => false,
  }
}

/// Compatibility is looser than equality: `void*` is compatible with any
/// object pointer, and an enum is compatible with its underlying `int`.
#[must_use] pub fn type_compatible(a: &Type, b: &Type) -> bool {
  if type_equal(a, b) { return true }
  if a.is_pointer() && b.is_pointer() {
    let ra = a.referent().unwrap();
    let rb = b.referent().unwrap();
    if ra.is_void() || rb.is_void() { return true }
    return type_equal(&ra.unqualified(), &rb.unqualified())
  }
  if a.base() == Some(Base::Enum) && b.arithmetic_base() == Base::SInt { return true }
  if b.base() == Some(Base::Enum) && a.arithmetic_base() == Base::SInt { return true }
  false
}

/// A member of a struct/union.
#[derive(Clone, Debug)]
pub struct Member {
  pub name: Atom,
  pub ty: Type,
  pub offset: u32,
  /// Bit-field width in bits, if this member is a bit-field (supplemented
  /// feature, §3 of SPEC_FULL.md).
  pub bit_width: Option<u8>,
  pub bit_offset: u8,
}

/// A struct or union tag. Declared on first reference, defined at most
/// once; uses before definition are legal only where completeness is not
/// required (spec.md §4.4).
#[derive(Debug)]
pub struct Record {
  pub name: Atom,
  pub is_struct: bool,
  pub is_defined: bool,
  pub size: u32,
  pub align: u32,
  pub members: Vec<Member>,
  index: HashMap<Atom, usize>,
  /// Bit position within the current storage unit, for packing consecutive
  /// bit-fields (supplemented feature; mirrors `record.c`'s allocator).
  bit_cursor: u8,
}

impl Record {
  #[must_use] pub fn new(name: Atom, is_struct: bool) -> Self {
    Record {
      name, is_struct, is_defined: false, size: 0, align: WORD_SIZE.min(1).max(1),
      members: Vec::new(), index: HashMap::new(), bit_cursor: 0,
    }
  }

  /// `record_add`: append a member, advancing `size`/`align` per spec.md
  /// §4.4 (no packing beyond natural alignment; minimum alignment 4 for
  /// integer-sized members, natural alignment for char/short).
  pub fn add(&mut self, name: Atom, ty: Type, bit_width: Option<u8>) {
    let align = ty.align().max(1);
    if !self.is_struct {
      // Unions: every member starts at offset 0; size is the max member size.
      self.bit_cursor = 0;
      self.members.push(Member { name, ty: ty.clone(), offset: 0, bit_width, bit_offset: 0 });
      if !name.is_empty() { self.index.insert(name, self.members.len() - 1); }
      self.size = self.size.max(ty.size());
      self.align = self.align.max(align);
      return
    }
    if let Some(w) = bit_width {
      let unit_bits = u32::from(ty.size()) * 8;
      let fits_current_unit = self.bit_cursor != 0 &&
        u32::from(self.bit_cursor) + u32::from(w) <= unit_bits;
      let offset = if fits_current_unit {
        self.size - ty.size()
      } else {
        self.size = align_up(self.size, align);
        let offset = self.size;
        self.size += ty.size();
        self.bit_cursor = 0;
        offset
      };
      let bit_offset = self.bit_cursor;
      self.bit_cursor += w;
      self.members.push(Member { name, ty, offset, bit_width, bit_offset });
      if !name.is_empty() { self.index.insert(name, self.members.len() - 1); }
      self.align = self.align.max(align);
      return
    }
    self.bit_cursor = 0;
    let offset = align_up(self.size, align);
    self.members.push(Member { name, ty: ty.clone(), offset, bit_width: None, bit_offset: 0 });
    if !name.is_empty() { self.index.insert(name, self.members.len() - 1); }
    self.size = offset + ty.size();
    self.align = self.align.max(align);
  }

  /// Flatten an anonymous nested record's members into this record's
  /// lookup table, at the given base offset (spec.md §4.7).
  pub fn flatten_anonymous(&mut self, base_offset: u32, nested: &Record) {
    for (i, m) in nested.members.iter().enumerate() {
      if !m.name.is_empty() {
        self.index.insert(m.name, self.members.len());
      }
      let _ = i;
      self.members.push(Member { offset: base_offset + m.offset, ..m.clone() });
    }
  }

  /// `record_find`: look up a member by name. Legal only once the record
  /// is defined.
  #[must_use] pub fn find(&self, name: Atom) -> Option<&Member> {
    assert!(self.is_defined, "record_find on an incomplete record");
    self.index.get(&name).map(|&i| &self.members[i])
  }

  pub fn finish(&mut self) {
    if self.is_struct && self.align > 0 {
      self.size = align_up(self.size, self.align);
    }
    self.is_defined = true;
  }
}

pub(crate) fn align_up(n: u32, align: u32) -> u32 { if align == 0 { n } else { (n + align - 1) / align * align } }

/// An enum tag and its collected enumerator values.
#[derive(Debug)]
pub struct Enum {
  pub tag: Option<Atom>,
  /// `(name, value)` pairs in declaration order.
  pub values: Vec<(Atom, i64)>,
}

impl Enum {
  #[must_use] pub fn new(tag: Option<Atom>) -> Self { Enum { tag, values: Vec::new() } }
}

/// An incomplete declarator awaiting a referent, used while parsing
/// nested declarators (e.g. `int (*f)(int)`): a placeholder that the
/// declarator parser fills in once it knows the base type. Not part of
/// the spec's data model directly but needed to express "build outside
/// in, apply inside out" declarator parsing without an intrusive AST.
pub type PendingToken = Option<Token>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn qualify_shares_referent() {
    let i = Type::new_base(Base::SInt, Qual::empty());
    let p = Type::new_pointer(i.clone(), Qual::empty());
    let cp = p.qualify(Qual::CONST);
    assert!(type_equal(&cp.referent().unwrap().unqualified(), &i));
    assert_ne!(cp.qual(), p.qual());
  }

  #[test]
  fn type_equal_is_reflexive_under_requalify() {
    let i = Type::new_base(Base::SInt, Qual::CONST);
    assert!(type_equal(&i, &i.qualify(Qual::CONST)));
  }

  #[test]
  fn void_pointer_compatible_with_any_pointer() {
    let void_p = Type::new_pointer(Type::new_base(Base::Void, Qual::empty()), Qual::empty());
    let int_p = Type::new_pointer(Type::new_base(Base::SInt, Qual::empty()), Qual::empty());
    assert!(type_compatible(&void_p, &int_p));
  }

  #[test]
  fn struct_layout_matches_sum_of_aligned_members() {
    let r = Rc::new(RefCell::new(Record::new(Atom::new("S"), true)));
    {
      let mut rb = r.borrow_mut();
      rb.add(Atom::new("a"), Type::new_base(Base::SInt, Qual::empty()), None);
      rb.add(Atom::new("b"), Type::new_base(Base::SInt, Qual::empty()), None);
      rb.finish();
    }
    assert_eq!(r.borrow().size, 8);
    assert_eq!(r.borrow().find(Atom::new("b")).unwrap().offset, 4);
  }

  #[test]
  fn union_size_is_max_of_members() {
    let r = Rc::new(RefCell::new(Record::new(Atom::new("U"), false)));
    {
      let mut rb = r.borrow_mut();
      rb.add(Atom::new("a"), Type::new_base(Base::SChar, Qual::empty()), None);
      rb.add(Atom::new("b"), Type::new_base(Base::SLongLong, Qual::empty()), None);
      rb.finish();
    }
    assert_eq!(r.borrow().size, 8);
  }
}
