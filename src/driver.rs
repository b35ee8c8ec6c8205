//! Orchestration (§4.12): reads the preprocessed input, drives the parser
//! and code generator, and writes the assembled output. Single-threaded
//! and synchronous end to end (§5) — every step either produces the next
//! step's input or calls [`crate::diag::fatal`], which never returns.

use std::fs;

use log::info;

use crate::diag::{self, Loc, WarningSet};
use crate::dump::Glyphs;

/// Feature groups accepted by `-f<name>`. Parsed and recorded for
/// completeness; the parser itself currently always accepts the GNU
/// extensions this backend was built against (SPEC_FULL.md §3), so these
/// presently only gate `-dump-ast` diagnostics about unrecognised names.
#[derive(Default, Debug)]
pub struct FeatureSet {
  pub gnu_extensions: bool,
  pub ms_extensions: bool,
  pub plan9_extensions: bool,
}

impl FeatureSet {
  pub fn enable(&mut self, name: &str) {
    match name {
      "gnu-extensions" => self.gnu_extensions = true,
      "ms-extensions" => self.ms_extensions = true,
      "plan9-extensions" => self.plan9_extensions = true,
      _ => eprintln!("warning: unknown feature -f{name}"),
    }
  }
}

/// Parsed command-line configuration (§6).
#[derive(Default)]
pub struct CompileOptions {
  pub input: Option<String>,
  pub output: Option<String>,
  pub debug_info: bool,
  pub optimize: bool,
  pub warnings: WarningSet,
  pub features: FeatureSet,
  pub dump_ast: Option<Glyphs>,
}

/// Runs one compilation end to end: parse `options.input`, lower every
/// function and global initialiser, and write Onramp assembly to
/// `options.output`. Calls [`diag::fatal`] (exit code 1) on any error;
/// returns normally only on success.
pub fn compile(options: CompileOptions) {
  let input_path = options.input.as_deref().unwrap_or_else(|| usage_fatal());
  let output_path = options.output.as_deref().unwrap_or_else(|| usage_fatal());

  diag::configure_warnings(options.warnings);

  let src = fs::read(input_path)
    .unwrap_or_else(|e| diag::fatal(Loc::None, &format_args!("cannot read '{input_path}': {e}")));

  info!("parsing {input_path} ({} bytes)", src.len());
  let tu = crate::parser::Parser::new(&src, input_path).parse_translation_unit();

  if let Some(glyphs) = options.dump_ast {
    print!("{}", crate::dump::dump_translation_unit(&tu, glyphs));
  }

  info!("lowering {} function(s), {} global(s)", tu.functions.len(), tu.globals.len());
  let functions = crate::codegen::lower_translation_unit(&tu, options.debug_info);
  let strings = crate::codegen::take_string_literals();

  let mut out = Vec::new();
  crate::emit::emit_translation_unit(&mut out, &tu.globals, &strings, &functions, options.optimize)
    .unwrap_or_else(|e| diag::fatal(Loc::None, &format_args!("internal error writing assembly: {e}")));

  fs::write(output_path, &out)
    .unwrap_or_else(|e| diag::fatal(Loc::None, &format_args!("cannot write '{output_path}': {e}")));
  info!("wrote {output_path} ({} bytes)", out.len());
}

fn usage_fatal() -> ! {
  eprintln!("usage: ccomp <input.i> -o <output.os> [-g] [-O] [-W<name>] [-f<name>] \
    [-pedantic] [-pedantic-errors] [-dump-ast=unicode|ascii]");
  diag::fatal(Loc::None, &format_args!("missing input file or -o output"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn compiles_a_trivial_program_to_a_temp_file() {
    let mut input = tempfile::NamedTempFile::new().unwrap();
    write!(input, "int main(void) {{ return 0; }}").unwrap();
    let output = tempfile::NamedTempFile::new().unwrap();

    compile(CompileOptions {
      input: Some(input.path().to_str().unwrap().to_string()),
      output: Some(output.path().to_str().unwrap().to_string()),
      ..Default::default()
    });

    let text = fs::read_to_string(output.path()).unwrap();
    assert!(text.contains("=main"));
  }
}
