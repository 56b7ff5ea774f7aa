//! Hand-written lexer for the Meta surface syntax.

use core::fmt;

use crate::driver::Diagnostic;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Num(i64),
    Ident(String),

    /* keywords */
    Func,
    Begin,
    End,
    Var,
    If,
    Then,
    Else,
    While,
    Do,
    Break,
    Continue,
    Return,
    Print,
    Struct,
    Enum,
    True,
    False,

    /* operators and punctuation */
    Plus,
    Minus,
    Star,
    Slash,
    Lshift,
    Rshift,
    Eq,
    Neq,
    Less,
    Greater,
    Assign,
    Dot,
    Comma,
    Colon,
    Semicolon,
    At,
    LParen,
    RParen,
    LBracket,
    RBracket,

    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TokenKind::Num(value) => write!(f, "number `{value}`"),
            TokenKind::Ident(name) => write!(f, "identifier `{name}`"),
            TokenKind::Func => f.write_str("`func`"),
            TokenKind::Begin => f.write_str("`begin`"),
            TokenKind::End => f.write_str("`end`"),
            TokenKind::Var => f.write_str("`var`"),
            TokenKind::If => f.write_str("`if`"),
            TokenKind::Then => f.write_str("`then`"),
            TokenKind::Else => f.write_str("`else`"),
            TokenKind::While => f.write_str("`while`"),
            TokenKind::Do => f.write_str("`do`"),
            TokenKind::Break => f.write_str("`break`"),
            TokenKind::Continue => f.write_str("`continue`"),
            TokenKind::Return => f.write_str("`return`"),
            TokenKind::Print => f.write_str("`print`"),
            TokenKind::Struct => f.write_str("`struct`"),
            TokenKind::Enum => f.write_str("`enum`"),
            TokenKind::True => f.write_str("`true`"),
            TokenKind::False => f.write_str("`false`"),
            TokenKind::Plus => f.write_str("`+`"),
            TokenKind::Minus => f.write_str("`-`"),
            TokenKind::Star => f.write_str("`*`"),
            TokenKind::Slash => f.write_str("`/`"),
            TokenKind::Lshift => f.write_str("`<<`"),
            TokenKind::Rshift => f.write_str("`>>`"),
            TokenKind::Eq => f.write_str("`=`"),
            TokenKind::Neq => f.write_str("`!=`"),
            TokenKind::Less => f.write_str("`<`"),
            TokenKind::Greater => f.write_str("`>`"),
            TokenKind::Assign => f.write_str("`:=`"),
            TokenKind::Dot => f.write_str("`.`"),
            TokenKind::Comma => f.write_str("`,`"),
            TokenKind::Colon => f.write_str("`:`"),
            TokenKind::Semicolon => f.write_str("`;`"),
            TokenKind::At => f.write_str("`@`"),
            TokenKind::LParen => f.write_str("`(`"),
            TokenKind::RParen => f.write_str("`)`"),
            TokenKind::LBracket => f.write_str("`[`"),
            TokenKind::RBracket => f.write_str("`]`"),
            TokenKind::Eof => f.write_str("end of input"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// 1-based source line.
    pub line: i64,
}

fn keyword(ident: &str) -> Option<TokenKind> {
    Some(match ident {
        "func" => TokenKind::Func,
        "begin" => TokenKind::Begin,
        "end" => TokenKind::End,
        "var" => TokenKind::Var,
        "if" => TokenKind::If,
        "then" => TokenKind::Then,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "do" => TokenKind::Do,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "return" => TokenKind::Return,
        "print" => TokenKind::Print,
        "struct" => TokenKind::Struct,
        "enum" => TokenKind::Enum,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        _ => return None,
    })
}

/// Tokenizes `source`, appending one diagnostic per unrecognized construct.
///
/// Always produces a trailing [`TokenKind::Eof`] token so the parser never
/// runs off the end of the stream.
pub fn tokenize(source: &str, errors: &mut Vec<Diagnostic>) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();
    let mut line: i64 = 1;

    while let Some((at, ch)) = chars.next() {
        let kind = match ch {
            '\n' => {
                line += 1;
                continue;
            }
            c if c.is_whitespace() => continue,
            '/' => {
                if chars.peek().map(|&(_, c)| c) == Some('/') {
                    while let Some(&(_, c)) = chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        chars.next();
                    }
                    continue;
                }
                TokenKind::Slash
            }
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '=' => TokenKind::Eq,
            '.' => TokenKind::Dot,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '@' => TokenKind::At,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ':' => {
                if chars.peek().map(|&(_, c)| c) == Some('=') {
                    chars.next();
                    TokenKind::Assign
                } else {
                    TokenKind::Colon
                }
            }
            '<' => {
                if chars.peek().map(|&(_, c)| c) == Some('<') {
                    chars.next();
                    TokenKind::Lshift
                } else {
                    TokenKind::Less
                }
            }
            '>' => {
                if chars.peek().map(|&(_, c)| c) == Some('>') {
                    chars.next();
                    TokenKind::Rshift
                } else {
                    TokenKind::Greater
                }
            }
            '!' => {
                if chars.peek().map(|&(_, c)| c) == Some('=') {
                    chars.next();
                    TokenKind::Neq
                } else {
                    errors.push(Diagnostic::new(line, "unexpected character `!`"));
                    continue;
                }
            }
            c if c.is_ascii_digit() => {
                let mut end = at + c.len_utf8();
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_ascii_digit() {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                match source[at..end].parse::<i64>() {
                    Ok(value) => TokenKind::Num(value),
                    Err(_) => {
                        errors.push(Diagnostic::new(
                            line,
                            format!("integer literal `{}` out of range", &source[at..end]),
                        ));
                        continue;
                    }
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = at + c.len_utf8();
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let text = &source[at..end];
                keyword(text).unwrap_or_else(|| TokenKind::Ident(text.to_owned()))
            }
            other => {
                errors.push(Diagnostic::new(
                    line,
                    format!("unexpected character `{other}`"),
                ));
                continue;
            }
        };
        tokens.push(Token { kind, line });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        line,
    });
    tokens
}
