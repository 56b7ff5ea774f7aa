//! Abstract syntax tree for Meta programs.
//!
//! Nodes live in typed vectors inside [`Ast`] and reference each other with
//! index newtypes. This keeps the tree mutable in place, which the
//! compile-time driver relies on: resolving `@name(...)` splices a fresh
//! literal node into the arena and points the call at it, without touching
//! the rest of the tree.

use core::fmt::Write;

use crate::types::{ScopeId, SymbolId, TypeId};

macro_rules! ast_id {
    ($name:ident) => {
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

ast_id!(ExprId);
ast_id!(StmtId);
ast_id!(FuncId);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Gt,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Eq => "=",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
        }
    }
}

/// A type as written in the source, before resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AstType {
    pub name: String,
    /// `Some(n)` for `name[n]` array types.
    pub array_len: Option<i64>,
}

/// A `name: type` pair from a `var` declaration, parameter list, or struct
/// member list.
#[derive(Clone, Debug)]
pub struct TypedIdent {
    pub name: String,
    pub ty: AstType,
    pub line: i64,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Num(i64),
    Bool(bool),
    Ident {
        name: String,
        /// Resolved by the inference pass.
        sym: Option<SymbolId>,
    },
    Unary {
        op: UnOp,
        operand: ExprId,
    },
    Binary {
        op: BinOp,
        left: ExprId,
        right: ExprId,
    },
    /// `object.field` — struct member access or an enum constant.
    Member {
        object: ExprId,
        field: String,
    },
    /// `base[index]` array element access.
    Index {
        base: ExprId,
        index: ExprId,
    },
    Call {
        name: String,
        args: Vec<ExprId>,
        /// `@name(...)` compile-time call.
        comptime: bool,
        /// Literal spliced in by the driver once the call was evaluated.
        resolved: Option<ExprId>,
    },
}

#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: i64,
    /// Filled by the inference pass.
    pub ty: Option<TypeId>,
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    Block {
        decls: Vec<TypedIdent>,
        stmts: Vec<StmtId>,
        /// Filled by the declaration pass.
        scope: Option<ScopeId>,
    },
    If {
        cond: ExprId,
        then: StmtId,
        els: Option<StmtId>,
    },
    While {
        cond: ExprId,
        body: StmtId,
    },
    Break,
    Continue,
    Return(Option<ExprId>),
    Print(Vec<ExprId>),
    Assign {
        target: ExprId,
        value: ExprId,
    },
    Expr(ExprId),
}

#[derive(Clone, Debug)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: i64,
}

#[derive(Clone, Debug)]
pub struct Func {
    pub name: String,
    pub params: Vec<TypedIdent>,
    /// `None` means the function returns nothing.
    pub ret: Option<AstType>,
    pub body: StmtId,
    /// Compile-time-only functions are skipped by whole-program emission.
    pub comptime: bool,
    pub line: i64,
    /// Parameter scope, filled by the declaration pass.
    pub scope: Option<ScopeId>,
}

#[derive(Clone, Debug)]
pub struct StructDecl {
    pub name: String,
    pub members: Vec<TypedIdent>,
    pub line: i64,
}

#[derive(Clone, Debug)]
pub struct EnumDecl {
    pub name: String,
    pub members: Vec<String>,
    pub line: i64,
}

/// A whole parsed program.
#[derive(Clone, Debug, Default)]
pub struct Ast {
    exprs: Vec<Expr>,
    stmts: Vec<Stmt>,
    pub funcs: Vec<Func>,
    pub globals: Vec<TypedIdent>,
    pub structs: Vec<StructDecl>,
    pub enums: Vec<EnumDecl>,
    /// Every `@name(...)` in the program, in order of appearance.
    pub comptime_calls: Vec<ExprId>,
}

impl Ast {
    pub fn new() -> Self {
        Ast::default()
    }

    pub fn push_expr(&mut self, expr: Expr) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(expr);
        id
    }

    pub fn push_stmt(&mut self, stmt: Stmt) -> StmtId {
        let id = StmtId(self.stmts.len() as u32);
        self.stmts.push(stmt);
        id
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.exprs[id.index()]
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.index()]
    }

    pub fn stmt_mut(&mut self, id: StmtId) -> &mut Stmt {
        &mut self.stmts[id.index()]
    }

    pub fn func(&self, id: FuncId) -> &Func {
        &self.funcs[id.index()]
    }

    /// The designated entry point, if the program declares one.
    pub fn main_func(&self) -> Option<FuncId> {
        self.funcs
            .iter()
            .position(|f| f.name == "main")
            .map(|at| FuncId(at as u32))
    }

    /// Whether the compile-time call behind `id` still awaits evaluation.
    pub fn call_is_pending(&self, id: ExprId) -> bool {
        matches!(
            self.expr(id).kind,
            ExprKind::Call { resolved: None, .. }
        )
    }
}

/* S-expression dump, used by the parse-only mode of the CLI. */

fn dump_type(out: &mut String, ty: &AstType) {
    out.push_str(&ty.name);
    if let Some(len) = ty.array_len {
        let _ = write!(out, "[{len}]");
    }
}

fn dump_typed_idents(out: &mut String, idents: &[TypedIdent]) {
    for (at, ident) in idents.iter().enumerate() {
        if at > 0 {
            out.push_str(", ");
        }
        out.push_str(&ident.name);
        out.push_str(": ");
        dump_type(out, &ident.ty);
    }
}

fn dump_expr(ast: &Ast, out: &mut String, id: ExprId) {
    match &ast.expr(id).kind {
        ExprKind::Num(value) => {
            let _ = write!(out, "{value}");
        }
        ExprKind::Bool(value) => {
            let _ = write!(out, "{value}");
        }
        ExprKind::Ident { name, .. } => out.push_str(name),
        ExprKind::Unary { op: UnOp::Neg, operand } => {
            out.push_str("(- ");
            dump_expr(ast, out, *operand);
            out.push(')');
        }
        ExprKind::Binary { op, left, right } => {
            let _ = write!(out, "({} ", op.symbol());
            dump_expr(ast, out, *left);
            out.push(' ');
            dump_expr(ast, out, *right);
            out.push(')');
        }
        ExprKind::Member { object, field } => {
            out.push_str("(. ");
            dump_expr(ast, out, *object);
            out.push(' ');
            out.push_str(field);
            out.push(')');
        }
        ExprKind::Index { base, index } => {
            out.push_str("(index ");
            dump_expr(ast, out, *base);
            out.push(' ');
            dump_expr(ast, out, *index);
            out.push(')');
        }
        ExprKind::Call {
            name,
            args,
            comptime,
            resolved,
        } => {
            let marker = if *comptime { "@" } else { "" };
            let _ = write!(out, "(call {marker}{name}");
            for arg in args {
                out.push(' ');
                dump_expr(ast, out, *arg);
            }
            if let Some(lit) = resolved {
                out.push_str(" => ");
                dump_expr(ast, out, *lit);
            }
            out.push(')');
        }
    }
}

fn dump_stmt(ast: &Ast, out: &mut String, id: StmtId, indent: usize) {
    let pad = "  ".repeat(indent);
    out.push_str(&pad);
    match &ast.stmt(id).kind {
        StmtKind::Block { decls, stmts, .. } => {
            out.push_str("(block");
            if !decls.is_empty() {
                out.push_str(" vars=");
                dump_typed_idents(out, decls);
            }
            out.push('\n');
            for stmt in stmts {
                dump_stmt(ast, out, *stmt, indent + 1);
            }
            out.push_str(&pad);
            out.push_str(")\n");
        }
        StmtKind::If { cond, then, els } => {
            out.push_str("(if ");
            dump_expr(ast, out, *cond);
            out.push('\n');
            dump_stmt(ast, out, *then, indent + 1);
            if let Some(els) = els {
                dump_stmt(ast, out, *els, indent + 1);
            }
            out.push_str(&pad);
            out.push_str(")\n");
        }
        StmtKind::While { cond, body } => {
            out.push_str("(while ");
            dump_expr(ast, out, *cond);
            out.push('\n');
            dump_stmt(ast, out, *body, indent + 1);
            out.push_str(&pad);
            out.push_str(")\n");
        }
        StmtKind::Break => out.push_str("(break)\n"),
        StmtKind::Continue => out.push_str("(continue)\n"),
        StmtKind::Return(expr) => {
            out.push_str("(return");
            if let Some(expr) = expr {
                out.push(' ');
                dump_expr(ast, out, *expr);
            }
            out.push_str(")\n");
        }
        StmtKind::Print(args) => {
            out.push_str("(print");
            for arg in args {
                out.push(' ');
                dump_expr(ast, out, *arg);
            }
            out.push_str(")\n");
        }
        StmtKind::Assign { target, value } => {
            out.push_str("(:= ");
            dump_expr(ast, out, *target);
            out.push(' ');
            dump_expr(ast, out, *value);
            out.push_str(")\n");
        }
        StmtKind::Expr(expr) => {
            out.push('(');
            out.push_str("expr ");
            dump_expr(ast, out, *expr);
            out.push_str(")\n");
        }
    }
}

impl Ast {
    /// Renders the tree as indented s-expressions.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for global in &self.globals {
            out.push_str("(var ");
            dump_typed_idents(&mut out, core::slice::from_ref(global));
            out.push_str(")\n");
        }
        for decl in &self.structs {
            let _ = write!(out, "(struct {} ", decl.name);
            dump_typed_idents(&mut out, &decl.members);
            out.push_str(")\n");
        }
        for decl in &self.enums {
            let _ = write!(out, "(enum {} {})\n", decl.name, decl.members.join(", "));
        }
        for func in &self.funcs {
            let marker = if func.comptime { "@" } else { "" };
            let _ = write!(out, "(func {marker}{} params=", func.name);
            dump_typed_idents(&mut out, &func.params);
            if let Some(ret) = &func.ret {
                out.push_str(" ret=");
                dump_type(&mut out, ret);
            }
            out.push('\n');
            dump_stmt(self, &mut out, func.body, 1);
            out.push_str(")\n");
        }
        out
    }
}
