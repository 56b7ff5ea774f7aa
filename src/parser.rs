//! Recursive-descent parser producing the [`Ast`].
//!
//! Declarations and statements are parsed by plain descent; expressions use
//! precedence climbing. Parse errors are collected with their source line and
//! reported together, with recovery at top-level declaration boundaries.

use crate::{
    ast::{Ast, AstType, BinOp, EnumDecl, Expr, ExprId, ExprKind, Func, Stmt, StmtId, StmtKind,
          StructDecl, TypedIdent, UnOp},
    driver::Diagnostic,
    lexer::{self, Token, TokenKind},
};

/// Parses a whole program, returning every syntax diagnostic on failure.
pub fn parse(source: &str) -> Result<Ast, Vec<Diagnostic>> {
    let mut errors = Vec::new();
    let tokens = lexer::tokenize(source, &mut errors);
    let mut parser = Parser {
        tokens,
        pos: 0,
        ast: Ast::new(),
        errors,
    };
    parser.parse_root();
    if parser.errors.is_empty() {
        Ok(parser.ast)
    } else {
        Err(parser.errors)
    }
}

fn binding_power(kind: &TokenKind) -> Option<(BinOp, u32)> {
    Some(match kind {
        TokenKind::Eq => (BinOp::Eq, 3),
        TokenKind::Neq => (BinOp::Ne, 3),
        TokenKind::Less => (BinOp::Lt, 3),
        TokenKind::Greater => (BinOp::Gt, 3),
        TokenKind::Lshift => (BinOp::Shl, 4),
        TokenKind::Rshift => (BinOp::Shr, 4),
        TokenKind::Plus => (BinOp::Add, 5),
        TokenKind::Minus => (BinOp::Sub, 5),
        TokenKind::Star => (BinOp::Mul, 10),
        TokenKind::Slash => (BinOp::Div, 10),
        _ => return None,
    })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    ast: Ast,
    errors: Vec<Diagnostic>,
}

/// Unit error; the diagnostic itself is already recorded in the error list.
type ParseResult<T> = Result<T, ()>;

impl Parser {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn line(&self) -> i64 {
        self.tokens[self.pos].line
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error_here<T>(&mut self, message: impl Into<String>) -> ParseResult<T> {
        self.errors.push(Diagnostic::new(self.line(), message));
        Err(())
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<()> {
        if self.eat(&kind) {
            Ok(())
        } else {
            let found = self.peek().clone();
            self.error_here(format!("expected {kind}, found {found}"))
        }
    }

    fn expect_ident(&mut self) -> ParseResult<String> {
        match self.peek() {
            TokenKind::Ident(_) => {
                let token = self.advance();
                match token.kind {
                    TokenKind::Ident(name) => Ok(name),
                    _ => unreachable!(),
                }
            }
            found => {
                let found = found.clone();
                self.error_here(format!("expected identifier, found {found}"))
            }
        }
    }

    /* Declarations */

    fn parse_root(&mut self) {
        loop {
            let result = match self.peek() {
                TokenKind::Eof => break,
                TokenKind::Semicolon => {
                    self.advance();
                    Ok(())
                }
                TokenKind::Func => self.parse_func(),
                TokenKind::Var => self.parse_global_vars(),
                TokenKind::Struct => self.parse_struct(),
                TokenKind::Enum => self.parse_enum(),
                other => {
                    let other = other.clone();
                    self.error_here(format!(
                        "expected `func`, `var`, `struct` or `enum`, found {other}"
                    ))
                }
            };
            if result.is_err() {
                self.synchronize();
            }
        }
    }

    /// Skips ahead to the next plausible top-level declaration.
    fn synchronize(&mut self) {
        loop {
            match self.peek() {
                TokenKind::Eof
                | TokenKind::Func
                | TokenKind::Struct
                | TokenKind::Enum
                | TokenKind::Var => break,
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn parse_type(&mut self) -> ParseResult<AstType> {
        let name = self.expect_ident()?;
        let mut array_len = None;
        if self.eat(&TokenKind::LBracket) {
            match self.peek().clone() {
                TokenKind::Num(len) => {
                    self.advance();
                    array_len = Some(len);
                }
                found => {
                    return self.error_here(format!("expected array length, found {found}"));
                }
            }
            self.expect(TokenKind::RBracket)?;
        }
        Ok(AstType { name, array_len })
    }

    fn parse_typed_ident(&mut self) -> ParseResult<TypedIdent> {
        let line = self.line();
        let name = self.expect_ident()?;
        self.expect(TokenKind::Colon)?;
        let ty = self.parse_type()?;
        Ok(TypedIdent { name, ty, line })
    }

    fn parse_typed_ident_list(&mut self) -> ParseResult<Vec<TypedIdent>> {
        let mut idents = vec![self.parse_typed_ident()?];
        while self.eat(&TokenKind::Comma) {
            idents.push(self.parse_typed_ident()?);
        }
        Ok(idents)
    }

    fn parse_global_vars(&mut self) -> ParseResult<()> {
        self.expect(TokenKind::Var)?;
        let idents = self.parse_typed_ident_list()?;
        self.ast.globals.extend(idents);
        Ok(())
    }

    fn parse_struct(&mut self) -> ParseResult<()> {
        let line = self.line();
        self.expect(TokenKind::Struct)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::Begin)?;
        let members = self.parse_typed_ident_list()?;
        self.expect(TokenKind::End)?;
        self.ast.structs.push(StructDecl {
            name,
            members,
            line,
        });
        Ok(())
    }

    fn parse_enum(&mut self) -> ParseResult<()> {
        let line = self.line();
        self.expect(TokenKind::Enum)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::Begin)?;
        let mut members = vec![self.expect_ident()?];
        while self.eat(&TokenKind::Comma) {
            members.push(self.expect_ident()?);
        }
        self.expect(TokenKind::End)?;
        self.ast.enums.push(EnumDecl {
            name,
            members,
            line,
        });
        Ok(())
    }

    fn parse_func(&mut self) -> ParseResult<()> {
        let line = self.line();
        self.expect(TokenKind::Func)?;
        let comptime = self.eat(&TokenKind::At);
        let name = self.expect_ident()?;
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            params = self.parse_typed_ident_list()?;
        }
        self.expect(TokenKind::RParen)?;
        let ret = if self.eat(&TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        if !self.check(&TokenKind::Begin) {
            let found = self.peek().clone();
            return self.error_here(format!("expected function body, found {found}"));
        }
        let body = self.parse_stmt()?;
        self.ast.funcs.push(Func {
            name,
            params,
            ret,
            body,
            comptime,
            line,
            scope: None,
        });
        Ok(())
    }

    /* Statements */

    fn parse_stmt(&mut self) -> ParseResult<StmtId> {
        let line = self.line();
        let kind = match self.peek() {
            TokenKind::Begin => return self.parse_block(),
            TokenKind::If => {
                self.advance();
                let cond = self.parse_expr(0)?;
                self.expect(TokenKind::Then)?;
                let then = self.parse_stmt()?;
                let els = if self.eat(&TokenKind::Else) {
                    Some(self.parse_stmt()?)
                } else {
                    None
                };
                StmtKind::If { cond, then, els }
            }
            TokenKind::While => {
                self.advance();
                let cond = self.parse_expr(0)?;
                self.expect(TokenKind::Do)?;
                let body = self.parse_stmt()?;
                StmtKind::While { cond, body }
            }
            TokenKind::Break => {
                self.advance();
                StmtKind::Break
            }
            TokenKind::Continue => {
                self.advance();
                StmtKind::Continue
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.starts_expr() {
                    Some(self.parse_expr(0)?)
                } else {
                    None
                };
                StmtKind::Return(value)
            }
            TokenKind::Print => {
                self.advance();
                let mut args = vec![self.parse_expr(0)?];
                while self.eat(&TokenKind::Comma) {
                    args.push(self.parse_expr(0)?);
                }
                StmtKind::Print(args)
            }
            _ => {
                let target = self.parse_expr(0)?;
                if self.eat(&TokenKind::Assign) {
                    let value = self.parse_expr(0)?;
                    StmtKind::Assign { target, value }
                } else {
                    StmtKind::Expr(target)
                }
            }
        };
        Ok(self.ast.push_stmt(Stmt { kind, line }))
    }

    fn parse_block(&mut self) -> ParseResult<StmtId> {
        let line = self.line();
        self.expect(TokenKind::Begin)?;
        let mut decls = Vec::new();
        while self.check(&TokenKind::Var) {
            self.advance();
            decls.extend(self.parse_typed_ident_list()?);
            while self.eat(&TokenKind::Semicolon) {}
        }
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::End) {
            if self.check(&TokenKind::Eof) {
                return self.error_here("unterminated block, expected `end`");
            }
            if self.eat(&TokenKind::Semicolon) {
                continue;
            }
            stmts.push(self.parse_stmt()?);
        }
        self.expect(TokenKind::End)?;
        Ok(self.ast.push_stmt(Stmt {
            kind: StmtKind::Block {
                decls,
                stmts,
                scope: None,
            },
            line,
        }))
    }

    /* Expressions */

    fn starts_expr(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Num(_)
                | TokenKind::Ident(_)
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Minus
                | TokenKind::LParen
                | TokenKind::At
        )
    }

    fn parse_expr(&mut self, min_power: u32) -> ParseResult<ExprId> {
        let mut left = self.parse_primary()?;
        while let Some((op, power)) = binding_power(self.peek()) {
            if power <= min_power {
                break;
            }
            let line = self.line();
            self.advance();
            let right = self.parse_expr(power)?;
            left = self.ast.push_expr(Expr {
                kind: ExprKind::Binary { op, left, right },
                line,
                ty: None,
            });
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> ParseResult<ExprId> {
        let line = self.line();
        let expr = match self.peek().clone() {
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr(0)?;
                self.expect(TokenKind::RParen)?;
                inner
            }
            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_primary()?;
                self.ast.push_expr(Expr {
                    kind: ExprKind::Unary {
                        op: UnOp::Neg,
                        operand,
                    },
                    line,
                    ty: None,
                })
            }
            TokenKind::Num(value) => {
                self.advance();
                self.ast.push_expr(Expr {
                    kind: ExprKind::Num(value),
                    line,
                    ty: None,
                })
            }
            TokenKind::True | TokenKind::False => {
                let value = self.check(&TokenKind::True);
                self.advance();
                self.ast.push_expr(Expr {
                    kind: ExprKind::Bool(value),
                    line,
                    ty: None,
                })
            }
            TokenKind::At => {
                self.advance();
                let name = self.expect_ident()?;
                self.expect(TokenKind::LParen)?;
                let args = self.parse_args()?;
                let call = self.ast.push_expr(Expr {
                    kind: ExprKind::Call {
                        name,
                        args,
                        comptime: true,
                        resolved: None,
                    },
                    line,
                    ty: None,
                });
                self.ast.comptime_calls.push(call);
                call
            }
            TokenKind::Ident(name) => {
                self.advance();
                if self.eat(&TokenKind::LParen) {
                    let args = self.parse_args()?;
                    self.ast.push_expr(Expr {
                        kind: ExprKind::Call {
                            name,
                            args,
                            comptime: false,
                            resolved: None,
                        },
                        line,
                        ty: None,
                    })
                } else {
                    self.ast.push_expr(Expr {
                        kind: ExprKind::Ident { name, sym: None },
                        line,
                        ty: None,
                    })
                }
            }
            found => {
                return self.error_here(format!("expected expression, found {found}"));
            }
        };
        self.parse_postfix(expr)
    }

    /// `(args...)` after the opening parenthesis has been consumed.
    fn parse_args(&mut self) -> ParseResult<Vec<ExprId>> {
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            args.push(self.parse_expr(0)?);
            while self.eat(&TokenKind::Comma) {
                args.push(self.parse_expr(0)?);
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(args)
    }

    fn parse_postfix(&mut self, mut expr: ExprId) -> ParseResult<ExprId> {
        loop {
            let line = self.line();
            if self.eat(&TokenKind::Dot) {
                let field = self.expect_ident()?;
                expr = self.ast.push_expr(Expr {
                    kind: ExprKind::Member {
                        object: expr,
                        field,
                    },
                    line,
                    ty: None,
                });
            } else if self.eat(&TokenKind::LBracket) {
                let index = self.parse_expr(0)?;
                self.expect(TokenKind::RBracket)?;
                expr = self.ast.push_expr(Expr {
                    kind: ExprKind::Index { base: expr, index },
                    line,
                    ty: None,
                });
            } else {
                return Ok(expr);
            }
        }
    }
}
