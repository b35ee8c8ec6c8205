//! Semantic analysis and code generation backend for a preprocessed C
//! translation unit, targeting a simple register/memory virtual machine
//! (§1). Thin CLI wrapper around [`driver::compile`]; flag parsing is
//! hand-rolled (§4.12) rather than via a derive-based argument crate,
//! matching the small, fixed flag surface in §6.

mod ast;
mod codegen;
mod consteval;
mod diag;
mod driver;
mod dump;
mod emit;
mod intern;
mod ir;
mod parser;
mod scope;
mod token;
mod types;
mod wide;

use driver::{CompileOptions, FeatureSet};
use dump::Glyphs;

fn main() {
  env_logger::init();
  let options = parse_args(std::env::args().skip(1));
  driver::compile(options);
}

fn parse_args(mut args: impl Iterator<Item = String>) -> CompileOptions {
  let mut options = CompileOptions::default();
  let mut features = FeatureSet::default();

  while let Some(arg) = args.next() {
    match arg.as_str() {
      "-o" => {
        let path = args.next().unwrap_or_else(|| {
          diag::fatal(diag::Loc::None, &format_args!("-o requires an output path"))
        });
        options.output = Some(path);
      }
      "-g" => options.debug_info = true,
      "-O" => options.optimize = true,
      "-pedantic" => options.warnings.enable("pedantic"),
      "-pedantic-errors" => { options.warnings.enable("pedantic"); options.warnings.pedantic_errors = true; }
      _ if arg.starts_with("-W") => options.warnings.enable(&arg[2..]),
      _ if arg.starts_with("-f") => features.enable(&arg[2..]),
      _ if arg.starts_with("-dump-ast=") => {
        options.dump_ast = Some(match &arg["-dump-ast=".len()..] {
          "unicode" => Glyphs::Unicode,
          "ascii" => Glyphs::Ascii,
          other => diag::fatal(diag::Loc::None,
            &format_args!("unknown -dump-ast format '{other}', expected unicode or ascii")),
        });
      }
      _ if arg.starts_with('-') => eprintln!("warning: unrecognised flag '{arg}'"),
      _ => options.input = Some(arg),
    }
  }

  options.features = features;
  options
}

#[cfg(test)]
mod tests {
  use super::*;

  fn args(s: &[&str]) -> CompileOptions {
    parse_args(s.iter().map(|s| s.to_string()))
  }

  #[test]
  fn parses_input_and_output() {
    let o = args(&["in.i", "-o", "out.os"]);
    assert_eq!(o.input.as_deref(), Some("in.i"));
    assert_eq!(o.output.as_deref(), Some("out.os"));
  }

  #[test]
  fn parses_debug_and_optimize_flags() {
    let o = args(&["in.i", "-o", "out.os", "-g", "-O"]);
    assert!(o.debug_info);
    assert!(o.optimize);
  }

  #[test]
  fn pedantic_errors_promotes_and_enables() {
    let o = args(&["in.i", "-o", "out.os", "-pedantic-errors"]);
    assert!(o.warnings.pedantic_errors);
  }

  #[test]
  fn dump_ast_selects_glyph_set() {
    let o = args(&["in.i", "-o", "out.os", "-dump-ast=ascii"]);
    assert_eq!(o.dump_ast, Some(Glyphs::Ascii));
  }

  #[test]
  fn feature_flag_is_recorded() {
    let o = args(&["in.i", "-o", "out.os", "-fgnu-extensions"]);
    assert!(o.features.gnu_extensions);
  }
}
