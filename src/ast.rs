//! AST node model (§4.6).
//!
//! The C original represents every node kind (~90 of them) as one
//! intrusively-linked tagged union so that `node_detach` is O(1) during
//! cast insertion. Per the design notes ("a vector-of-children model is
//! acceptable if detach is rare"), this rewrite uses an owned tree: each
//! node owns its children directly (`Box`/`Vec`), and "detaching" a node to
//! wrap it (e.g. inserting an implicit cast) is just taking ownership of
//! the value — Rust's move semantics make the intrusive parent/sibling
//! pointers unnecessary. `Expr`/`Stmt`/`Decl` are split into separate enums
//! rather than one 90-armed union, which is the idiomatic-Rust rendering
//! of the same tagged-tree shape.

use std::rc::Rc;
use crate::intern::Atom;
use crate::scope::SymbolRef;
use crate::token::Token;
use crate::types::Type;

/// An expression node: every node carries its resolved C type (`void` for
/// statement-only constructs is not applicable here since statements are a
/// separate enum) and, where available, the token it was parsed from (used
/// for diagnostics and `-g` line-directive emission).
#[derive(Clone)]
pub struct Expr {
  pub ty: Type,
  pub kind: ExprKind,
  pub tok: Option<Token>,
}

#[derive(Clone)]
pub enum ExprKind {
  /// An integer literal, stored at full 64-bit width; the `ty` field
  /// records whether it should be treated as 32- or 64-bit during codegen
  /// and the constant evaluator.
  IntLiteral(u64),
  FloatLiteral(f64),
  /// A string literal; lowered to a generated read-only label at codegen
  /// time. Carries the decoded byte content (NUL-terminated semantics are
  /// applied by the consumer, matching array-from-string initialisation).
  StringLiteral(Rc<[u8]>),
  /// A reference to a previously-declared symbol (variable, function,
  /// enumerator, or builtin).
  Access(SymbolRef),
  /// A struct/union member access: `base.member` after `.`/`->` have both
  /// been desugared to this form (`->` inserts a deref first).
  Member(Box<Expr>, Atom),
  /// `*e`
  Deref(Box<Expr>),
  /// `&e`
  AddrOf(Box<Expr>),
  /// `a[i]`, kept distinct from `*(a+i)` only at the syntax level; codegen
  /// treats it identically to a deref of a computed address.
  Index(Box<Expr>, Box<Expr>),
  /// A unary operator: negation, bitwise-not, logical-not, pre/post
  /// inc/dec.
  Unary(UnOp, Box<Expr>),
  Binary(BinOp, Box<Expr>, Box<Expr>),
  /// Compound assignment desugars to `Assign` with a `BinOp` tag so the
  /// lowerer can reuse ordinary binary-op codegen against the same
  /// computed lvalue address.
  Assign(Option<BinOp>, Box<Expr>, Box<Expr>),
  Comma(Box<Expr>, Box<Expr>),
  Cond(Box<Expr>, Box<Expr>, Box<Expr>),
  Call(Box<Expr>, Vec<Expr>),
  /// An explicit or implicit cast. `explicit` distinguishes a user-written
  /// `(T)e` (which runs full cast validation) from an implicit conversion
  /// inserted by the parser (promotion, decay-to-pointer already handled
  /// by `Decay`, assignment conversions).
  Cast { explicit: bool, value: Box<Expr> },
  /// Array-or-function-to-pointer decay, inserted by `node_decay`.
  Decay(Box<Expr>),
  Sizeof(Type),
  SizeofExpr(Box<Expr>),
  AlignofType(Type),
  /// A braced initializer list, flattened into a dense index → value map so
  /// designated initializers address any element in O(1) (spec.md §4.6).
  /// A `None` slot means "implicitly zeroed".
  InitList(Vec<Option<Expr>>),
  /// GNU statement expression `({ ...; last_expr; })` (SPEC_FULL.md §3).
  StatementExpr(Rc<Vec<Stmt>>),
  /// `__builtin_*` calls dispatched by selector rather than ordinary call
  /// lowering.
  Builtin(crate::scope::Builtin, Vec<Expr>),
  /// A parse-time error placeholder; never reaches codegen because every
  /// production that would create one instead calls `fatal!` immediately.
  /// Kept only so `ExprKind` can derive `Clone` uniformly for recovery-free
  /// helper code paths (e.g. const-folding probes).
  Error,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnOp { Neg, BitNot, LogNot, PreInc, PreDec, PostInc, PostDec }

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinOp {
  Add, Sub, Mul, DivU, DivS, ModU, ModS,
  Shl, ShrU, ShrS, And, Or, Xor,
  LogAnd, LogOr,
  Eq, Ne, LtU, LtS, LeU, LeS, GtU, GtS, GeU, GeS,
}

impl Expr {
  #[must_use] pub fn new(ty: Type, kind: ExprKind, tok: Option<Token>) -> Self {
    Expr { ty, kind, tok }
  }
}

/// `node_decay`: array types become `&element` (address-of the decayed
/// array, typed pointer-to-element); function types become `&function`
/// (pointer-to-function); anything else is unchanged. Spec.md §4.6.
#[must_use] pub fn decay(e: Expr) -> Expr {
  if e.ty.is_array() {
    let elem = e.ty.referent().expect("array type has a referent").clone();
    let ptr_ty = Type::new_pointer(elem, crate::types::Qual::empty());
    let tok = e.tok.clone();
    return Expr::new(ptr_ty, ExprKind::Decay(Box::new(e)), tok)
  }
  if e.ty.is_function() {
    let ptr_ty = Type::new_pointer(e.ty.clone(), crate::types::Qual::empty());
    let tok = e.tok.clone();
    return Expr::new(ptr_ty, ExprKind::Decay(Box::new(e)), tok)
  }
  e
}

/// `node_cast`: if `e`'s type already equals `target` and this is an
/// implicit cast (`tok.is_none()`), return `e` unchanged; otherwise
/// validate compatibility and wrap in an explicit/implicit `Cast` node.
/// Validation rules (spec.md §4.6): `void` accepts any source as a target;
/// pointer-to-pointer is allowed when element types match modulo
/// qualifiers or either side is `void*`; integer-to-pointer (and back) only
/// via an explicit cast or a null-pointer-constant literal zero; arrays,
/// functions, and records are never valid cast *targets*.
pub fn cast(e: Expr, target: Type, tok: Option<Token>, loc: crate::diag::Loc<'_>) -> Expr {
  if tok.is_none() && crate::types::type_equal(&e.ty, &target) { return e }
  let explicit = tok.is_some();
  if target.is_void() {
    return Expr::new(target, ExprKind::Cast { explicit, value: Box::new(e) }, tok)
  }
  if target.is_array() || target.is_function() || target.is_record() {
    crate::fatal!(loc, "cannot cast to array, function, or struct/union type");
  }
  if target.is_pointer() && e.ty.is_pointer() {
    let rt = target.referent().unwrap();
    let re = e.ty.referent().unwrap();
    if !(rt.is_void() || re.is_void()
      || crate::types::type_equal(&rt.unqualified(), &re.unqualified()))
      && !explicit
    {
      crate::fatal!(loc, "incompatible pointer types in implicit conversion");
    }
    return Expr::new(target, ExprKind::Cast { explicit, value: Box::new(e) }, tok)
  }
  if target.is_pointer() && e.ty.is_integer() {
    if !explicit && !is_null_constant(&e) {
      crate::fatal!(loc, "integer to pointer conversion requires an explicit cast");
    }
    return Expr::new(target, ExprKind::Cast { explicit, value: Box::new(e) }, tok)
  }
  if target.is_integer() && e.ty.is_pointer() {
    if !explicit {
      crate::fatal!(loc, "pointer to integer conversion requires an explicit cast");
    }
    return Expr::new(target, ExprKind::Cast { explicit, value: Box::new(e) }, tok)
  }
  if target.is_arithmetic() && e.ty.is_arithmetic() {
    return Expr::new(target, ExprKind::Cast { explicit, value: Box::new(e) }, tok)
  }
  if !explicit {
    crate::fatal!(loc, "incompatible types in implicit conversion");
  }
  crate::fatal!(loc, "invalid cast");
}

/// `node_promote`: insert the integer-promotion cast (to `int` or
/// `unsigned int`, whichever the source's rank/signedness requires) per
/// C17 6.3.1.1. No-op for types already at or above `int` rank.
#[must_use] pub fn promote(e: Expr) -> Expr {
  let base = e.ty.arithmetic_base();
  if !base.is_integer() || base.rank() >= crate::types::Base::SInt.rank() { return e }
  let target = Type::new_base(crate::types::Base::SInt, crate::types::Qual::empty());
  cast(e, target, None, crate::diag::Loc::None)
}

/// `node_is_null`: recognises a (possibly cast-wrapped) integer literal
/// zero, used for null-pointer-constant detection.
#[must_use] pub fn is_null_constant(e: &Expr) -> bool {
  match &e.kind {
    ExprKind::IntLiteral(0) => true,
    ExprKind::Cast { value, .. } | ExprKind::Decay(value) => is_null_constant(value),
    _ => false,
  }
}

/// A `case`/`default` label attached to the innermost enclosing `switch`.
#[derive(Clone)]
pub struct CaseLabel {
  pub lo: i64,
  pub hi: i64,
  pub is_default: bool,
  /// Mangled block label target, filled in by the code generator.
  pub block_label: Rc<std::cell::Cell<i32>>,
}

#[derive(Clone)]
pub struct Decl {
  pub name: Atom,
  pub ty: Type,
  pub sym: SymbolRef,
  pub init: Option<Expr>,
}

#[derive(Clone)]
pub enum StmtKind {
  Expr(Expr),
  Decl(Vec<Decl>),
  Compound(Vec<Stmt>),
  If(Expr, Box<Stmt>, Option<Box<Stmt>>),
  While(Expr, Box<Stmt>),
  DoWhile(Box<Stmt>, Expr),
  For { init: Option<Box<Stmt>>, cond: Option<Expr>, step: Option<Expr>, body: Box<Stmt> },
  Switch { scrutinee: Expr, body: Box<Stmt>, cases: Rc<std::cell::RefCell<Vec<CaseLabel>>> },
  Case(CaseLabel, Box<Stmt>),
  Default(Box<Stmt>),
  Break,
  Continue,
  Return(Option<Expr>),
  Goto(Atom),
  Label(Atom, Box<Stmt>),
  Empty,
}

#[derive(Clone)]
pub struct Stmt {
  pub kind: StmtKind,
  pub tok: Option<Token>,
}

impl Stmt {
  #[must_use] pub fn new(kind: StmtKind, tok: Option<Token>) -> Self { Stmt { kind, tok } }
}

/// A function definition: AST root plus the symbol it defines.
pub struct FunctionDef {
  pub sym: SymbolRef,
  pub params: Vec<Decl>,
  pub body: Stmt,
  /// Stack-offset above `rfp` at which variadic arguments begin, filled in
  /// by the code generator's frame-layout pass.
  pub variadic_offset: std::cell::Cell<i32>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{Base, Qual};

  #[test]
  fn is_null_constant_sees_through_casts() {
    let lit = Expr::new(Type::new_base(Base::SInt, Qual::empty()), ExprKind::IntLiteral(0), None);
    let cast = Expr::new(
      Type::new_pointer(Type::new_base(Base::Void, Qual::empty()), Qual::empty()),
      ExprKind::Cast { explicit: true, value: Box::new(lit) },
      None,
    );
    assert!(is_null_constant(&cast));
  }

  #[test]
  fn nonzero_literal_is_not_null_constant() {
    let lit = Expr::new(Type::new_base(Base::SInt, Qual::empty()), ExprKind::IntLiteral(1), None);
    assert!(!is_null_constant(&lit));
  }

  #[test]
  fn decay_of_array_is_pointer_to_element() {
    let elem = Type::new_base(Base::SInt, Qual::empty());
    let arr = Type::new_array(elem.clone(), 4);
    let e = Expr::new(arr, ExprKind::IntLiteral(0), None);
    let d = decay(e);
    assert!(d.ty.is_pointer());
    assert!(crate::types::type_equal(&d.ty.referent().unwrap().unqualified(), &elem));
  }

  #[test]
  fn decay_of_scalar_is_identity() {
    let i = Type::new_base(Base::SInt, Qual::empty());
    let e = Expr::new(i.clone(), ExprKind::IntLiteral(0), None);
    let d = decay(e);
    assert!(crate::types::type_equal(&d.ty, &i));
    assert!(matches!(d.kind, ExprKind::IntLiteral(0)));
  }
}
