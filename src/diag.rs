//! Diagnostics (§7): a single fatal error kind, plus warning categories that
//! may be silent, printed, or promoted to fatal by `-pedantic-errors`.

use std::cell::RefCell;
use std::fmt;
use std::process;
use crate::token::Token;

/// Named warning categories from spec.md §6. Grouped by `all`/`extra`/
/// `pedantic` in [`WarningSet::enable_group`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum WarningKind {
  ImplicitInt,
  ZeroLengthArray,
  DiscardedQualifiers,
  ImplicitlyUnsignedLiteral,
  InitializerOverrides,
  StatementExpressions,
  ExtraKeywords,
  AnonymousTags,
  PointerArith,
  GnuCaseRange,
}

impl WarningKind {
  fn name(self) -> &'static str {
    match self {
      WarningKind::ImplicitInt => "implicit-int",
      WarningKind::ZeroLengthArray => "zero-length-array",
      WarningKind::DiscardedQualifiers => "discarded-qualifiers",
      WarningKind::ImplicitlyUnsignedLiteral => "implicitly-unsigned-literal",
      WarningKind::InitializerOverrides => "initializer-overrides",
      WarningKind::StatementExpressions => "statement-expressions",
      WarningKind::ExtraKeywords => "extra-keywords",
      WarningKind::AnonymousTags => "anonymous-tags",
      WarningKind::PointerArith => "pointer-arith",
      WarningKind::GnuCaseRange => "gnu-case-range",
    }
  }

  const ALL: &'static [WarningKind] = &[
    WarningKind::ImplicitInt, WarningKind::DiscardedQualifiers,
    WarningKind::InitializerOverrides, WarningKind::GnuCaseRange,
  ];
  const EXTRA: &'static [WarningKind] = &[
    WarningKind::ZeroLengthArray, WarningKind::PointerArith,
  ];
  const PEDANTIC: &'static [WarningKind] = &[
    WarningKind::ImplicitlyUnsignedLiteral, WarningKind::StatementExpressions,
    WarningKind::ExtraKeywords, WarningKind::AnonymousTags,
  ];
}

/// Tracks which warning categories are enabled, and whether enabled
/// warnings should be promoted to fatal errors (`-pedantic-errors`).
#[derive(Default)]
pub struct WarningSet {
  enabled: hashbrown::HashSet<WarningKind>,
  pub pedantic_errors: bool,
}

impl WarningSet {
  #[must_use] pub fn new() -> Self { Self::default() }

  pub fn enable(&mut self, name: &str) {
    match name {
      "all" => self.enabled.extend(WarningKind::ALL.iter().copied()),
      "extra" => self.enabled.extend(WarningKind::EXTRA.iter().copied()),
      "pedantic" => self.enabled.extend(WarningKind::PEDANTIC.iter().copied()),
      _ => if let Some(k) = WarningKind::ALL.iter()
        .chain(WarningKind::EXTRA).chain(WarningKind::PEDANTIC)
        .copied().find(|k| k.name() == name)
      {
        self.enabled.insert(k);
      } else {
        eprintln!("warning: unknown warning group or name -W{name}");
      }
    }
  }

  #[must_use] pub fn is_enabled(&self, k: WarningKind) -> bool { self.enabled.contains(&k) }
}

thread_local! {
  static WARNINGS: RefCell<WarningSet> = RefCell::new(WarningSet::new());
}

/// Install the process-wide warning configuration (called once from
/// orchestration after flags are parsed).
pub fn configure_warnings(set: WarningSet) {
  WARNINGS.with(|w| *w.borrow_mut() = set);
}

/// A source location, either a concrete token or "no location available"
/// (used by internal invariant checks that fire before any token is read).
#[derive(Clone, Copy)]
pub enum Loc<'a> {
  At(&'a Token),
  None,
}

impl fmt::Display for Loc<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Loc::At(t) => write!(f, "{}:{}", t.filename(), t.line()),
      Loc::None => f.write_str("<unknown>"),
    }
  }
}

/// Print `file:line: error: msg` and terminate the process with exit code 1.
/// This is the *only* error path in the compiler (spec.md §7): there is no
/// error object and no continuation.
pub fn fatal(loc: Loc<'_>, msg: &fmt::Arguments<'_>) -> ! {
  eprintln!("{loc}: error: {msg}");
  process::exit(1)
}

/// Emit (or elevate) a warning in category `kind`. Silent if the category
/// is not enabled; fatal if `-pedantic-errors` is set.
pub fn warn(kind: WarningKind, loc: Loc<'_>, msg: &fmt::Arguments<'_>) {
  let (enabled, pedantic_errors) =
    WARNINGS.with(|w| { let w = w.borrow(); (w.is_enabled(kind), w.pedantic_errors) });
  if !enabled { return }
  if pedantic_errors {
    fatal(loc, msg);
  }
  eprintln!("{loc}: warning: {msg} [-W{}]", kind.name());
}

/// `fatal!(loc, "message {}", arg)`
#[macro_export]
macro_rules! fatal {
  ($loc:expr, $($arg:tt)*) => { $crate::diag::fatal($loc, &format_args!($($arg)*)) };
}

/// `warn!(WarningKind::X, loc, "message {}", arg)`
#[macro_export]
macro_rules! warn_at {
  ($kind:expr, $loc:expr, $($arg:tt)*) => {
    $crate::diag::warn($kind, $loc, &format_args!($($arg)*))
  };
}
