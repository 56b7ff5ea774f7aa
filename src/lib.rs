//! A whole-program compiler for the Meta language with a 64-bit stack
//! bytecode as its backend and runtime.
//!
//! The same bytecode serves two purposes: it is what programs compile to,
//! and it is the compile-time evaluator. A `@name(expr)` in the source is
//! compiled to a standalone image, executed in the [`runner`] virtual
//! machine, and replaced by the literal it evaluates to, repeatedly, until
//! the program contains no unresolved compile-time calls. Only then is the
//! final image emitted.
//!
//! The pipeline, in dependency order:
//!
//! - [`lexer`] / [`parser`] build the [`ast`] from source text;
//! - [`check`] declares symbols, infers and checks types;
//! - [`compile`] translates the checked tree into a [`isa::Bytecode`] image;
//! - [`runner`] executes an image;
//! - [`driver`] orchestrates the passes and the compile-time fixed point;
//! - [`disasm`] renders an image for inspection.
//!
//! ```
//! let source = "func main() begin print 2 + 3 * 4 end";
//! let image = metac::compile(source).unwrap();
//! let mut output = Vec::new();
//! metac::run_with_output(&image, false, &mut output).unwrap();
//! assert_eq!(output, b"14\n");
//! ```

pub mod ast;
pub mod check;
mod common;
pub mod compile;
pub mod disasm;
pub mod driver;
pub mod isa;
pub mod lexer;
pub mod parser;
pub mod runner;
pub mod types;

use thiserror::Error;

pub use crate::{
    compile::{compile_call, compile_program, CompileError},
    disasm::disassemble,
    driver::{compile, resolve_comptime, Diagnostic},
    isa::{Bytecode, Opcode, Quarter, Word},
    runner::{run, run_with_output, Trap},
};

/// Any way a compilation can fail, stage by stage.
#[derive(Debug, Error)]
pub enum Error {
    /// The source text did not lex or parse.
    #[error("{} syntax error(s)", .0.len())]
    Syntax(Vec<Diagnostic>),
    /// The middle-end passes reported diagnostics.
    #[error("{} semantic error(s)", .0.len())]
    Check(Vec<Diagnostic>),
    /// The translator could not lower the checked program.
    #[error(transparent)]
    Compile(#[from] CompileError),
    /// The virtual machine faulted during compile-time evaluation.
    #[error(transparent)]
    Trap(#[from] Trap),
}

impl Error {
    /// The per-line diagnostics behind this error, if it carries any.
    pub fn diagnostics(&self) -> Option<&[Diagnostic]> {
        match self {
            Error::Syntax(diagnostics) | Error::Check(diagnostics) => Some(diagnostics),
            _ => None,
        }
    }
}
