//! The compile-time driver.
//!
//! Compilation iterates the middle-end passes and per-call bytecode
//! evaluation until no unresolved compile-time call remains. Each round
//! re-analyzes the (possibly mutated) tree, compiles every still-pending
//! `@name(...)` to a standalone image, executes it, and splices the result
//! back into the tree as a literal. The loop terminates because resolution
//! only ever replaces calls with literals, so the pending set shrinks
//! monotonically; a round that resolves nothing means the remaining calls
//! depend on each other and is reported as an error.

use core::fmt;

use log::{debug, info};

use crate::{
    ast::{Ast, Expr, ExprId, ExprKind},
    check::{self, Analysis},
    compile::{self, CompileError},
    isa::Bytecode,
    parser, runner,
    types::Types,
    Error,
};

/// A compiler message tied to a source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    /// 1-based source line, or `-1` when no line applies.
    pub line: i64,
    pub message: String,
}

impl Diagnostic {
    pub fn new(line: i64, message: impl Into<String>) -> Self {
        Diagnostic {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.line < 0 {
            f.write_str(&self.message)
        } else {
            write!(f, "line {}: {}", self.line, self.message)
        }
    }
}

/// Runs the middle end and evaluates compile-time calls to a fixed point.
///
/// On success the returned [`Analysis`] reflects the final tree, in which
/// every compile-time call carries its spliced literal.
pub fn resolve_comptime(ast: &mut Ast) -> Result<Analysis, Error> {
    let mut round = 0u32;
    loop {
        round += 1;
        let analysis = check::analyze(ast).map_err(Error::Check)?;

        let pending: Vec<ExprId> = ast
            .comptime_calls
            .iter()
            .copied()
            .filter(|&id| ast.call_is_pending(id))
            .collect();
        if pending.is_empty() {
            debug!("compile-time evaluation reached a fixed point after {round} round(s)");
            return Ok(analysis);
        }

        let mut resolved = 0usize;
        for id in pending {
            match compile::compile_call(&analysis.types, &analysis.symbols, ast, id) {
                Ok(image) => {
                    let value = runner::run(&image, false)?;
                    let line = ast.expr(id).line;
                    info!("line {line}: compile-time call evaluated to {value}");
                    // Splice a literal of the call's own type so the next
                    // analysis round sees no change in typing.
                    let kind = if ast.expr(id).ty == Some(Types::BOOL) {
                        ExprKind::Bool(value != 0)
                    } else {
                        ExprKind::Num(value)
                    };
                    let literal = ast.push_expr(Expr {
                        kind,
                        line,
                        ty: None,
                    });
                    if let ExprKind::Call { resolved: slot, .. } = &mut ast.expr_mut(id).kind {
                        *slot = Some(literal);
                    }
                    resolved += 1;
                }
                // The evaluated expression reaches another compile-time
                // call that has not been resolved yet; retry next round.
                Err(CompileError::UnresolvedComptime(_)) => {}
                Err(error) => return Err(error.into()),
            }
        }

        if resolved == 0 {
            let diagnostics = ast
                .comptime_calls
                .iter()
                .copied()
                .filter(|&id| ast.call_is_pending(id))
                .map(|id| {
                    Diagnostic::new(
                        ast.expr(id).line,
                        "compile-time call depends on itself",
                    )
                })
                .collect();
            return Err(Error::Check(diagnostics));
        }
    }
}

/// Compiles a source text all the way to a whole-program image.
pub fn compile(source: &str) -> Result<Bytecode, Error> {
    let mut ast = parser::parse(source).map_err(Error::Syntax)?;
    let analysis = resolve_comptime(&mut ast)?;
    let image = compile::compile_program(&analysis.types, &analysis.symbols, &ast)?;
    Ok(image)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn program_without_comptime_calls_needs_one_round() {
        let mut ast = parser::parse("func main() begin print 1 end").unwrap();
        resolve_comptime(&mut ast).unwrap();
        assert!(ast.comptime_calls.is_empty());
    }

    #[test]
    fn resolves_a_call_to_a_literal() {
        let mut ast = parser::parse(
            "func double(n: int): int begin return n * 2 end\n\
             func main() begin print @call(double(21)) end",
        )
        .unwrap();
        resolve_comptime(&mut ast).unwrap();
        let call = ast.comptime_calls[0];
        assert!(!ast.call_is_pending(call));
        let ExprKind::Call { resolved: Some(lit), .. } = &ast.expr(call).kind else {
            panic!("call was not resolved");
        };
        assert_matches!(ast.expr(*lit).kind, ExprKind::Num(42));
    }

    #[test]
    fn nested_comptime_calls_resolve_inner_first() {
        let mut ast = parser::parse(
            "func inc(n: int): int begin return n + 1 end\n\
             func main() begin print @call(inc(@call(inc(0)))) end",
        )
        .unwrap();
        resolve_comptime(&mut ast).unwrap();
        for &call in &ast.comptime_calls {
            assert!(!ast.call_is_pending(call));
        }
    }

    #[test]
    fn comptime_trap_fails_compilation() {
        let result = compile(
            "func boom(): int begin return 1 / 0 end\n\
             func main() begin print @call(boom()) end",
        );
        assert_matches!(result, Err(Error::Trap(runner::Trap::DivisionByZero)));
    }

    #[test]
    fn semantic_errors_abort_before_evaluation() {
        let result = compile("func main() begin print @call(missing(1)) end");
        assert_matches!(result, Err(Error::Check(_)));
    }
}
