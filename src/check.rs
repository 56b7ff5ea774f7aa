//! Middle-end passes: symbol declaration, type inference, type checking.
//!
//! The three passes run in sequence over a parsed [`Ast`] and accumulate
//! diagnostics instead of failing fast; the driver aborts between passes as
//! soon as any were reported. Because the compile-time driver mutates the
//! tree between rounds, the passes are written to be re-runnable: they
//! rebuild the type and symbol tables from scratch every time.

use log::debug;

use crate::{
    ast::{Ast, AstType, BinOp, ExprId, ExprKind, StmtId, StmtKind},
    driver::Diagnostic,
    types::{
        ScopeId, StructMember, Symbol, SymbolKind, SymbolTable, TypeId, TypeInfo, Types,
    },
};

/// The product of a successful middle-end run.
#[derive(Debug)]
pub struct Analysis {
    pub types: Types,
    pub symbols: SymbolTable,
}

/// Runs declaration, inference and checking over `ast`.
///
/// On success every expression carries a type, every identifier carries a
/// symbol, and every block and function carries a scope.
pub fn analyze(ast: &mut Ast) -> Result<Analysis, Vec<Diagnostic>> {
    let mut sink = Vec::new();

    let (types, symbols) = declare(ast, &mut sink);
    if !sink.is_empty() {
        return Err(sink);
    }

    infer(ast, &types, &symbols, &mut sink);
    if !sink.is_empty() {
        return Err(sink);
    }

    check(ast, &types, &symbols, &mut sink);
    if !sink.is_empty() {
        return Err(sink);
    }

    debug!(
        "analysis clean: {} function(s), {} global(s)",
        ast.funcs.len(),
        ast.globals.len()
    );
    Ok(Analysis { types, symbols })
}

fn resolve_type(
    types: &mut Types,
    ast_ty: &AstType,
    line: i64,
    sink: &mut Vec<Diagnostic>,
) -> Option<TypeId> {
    let base = match types.lookup_named(&ast_ty.name) {
        Some(id) => id,
        None => {
            sink.push(Diagnostic::new(
                line,
                format!("unknown type `{}`", ast_ty.name),
            ));
            return None;
        }
    };
    match ast_ty.array_len {
        None => Some(base),
        Some(len) if len > 0 => Some(types.add(TypeInfo::Array { elem: base, len })),
        Some(len) => {
            sink.push(Diagnostic::new(
                line,
                format!("array length must be positive, got {len}"),
            ));
            None
        }
    }
}

/* Declaration pass */

fn declare(ast: &mut Ast, sink: &mut Vec<Diagnostic>) -> (Types, SymbolTable) {
    let mut types = Types::new();
    let mut table = SymbolTable::new();

    // Enums resolve immediately; structs are filled in declaration order so
    // a member may only refer to a struct declared earlier in the file.
    for decl in &ast.enums {
        let ty = types.add_named(
            &decl.name,
            TypeInfo::Enum {
                name: decl.name.clone(),
                members: decl.members.clone(),
            },
        );
        declare_symbol(&mut table, SymbolTable::ROOT, sink, Symbol {
            kind: SymbolKind::Type,
            name: decl.name.clone(),
            ty,
            line: decl.line,
        });
    }
    for decl in &ast.structs {
        let mut members = Vec::new();
        let mut offset = 0i64;
        for member in &decl.members {
            if members
                .iter()
                .any(|m: &StructMember| m.name == member.name)
            {
                sink.push(Diagnostic::new(
                    member.line,
                    format!(
                        "duplicate member `{}` in struct `{}`",
                        member.name, decl.name
                    ),
                ));
                continue;
            }
            let Some(ty) = resolve_type(&mut types, &member.ty, member.line, sink) else {
                continue;
            };
            members.push(StructMember {
                name: member.name.clone(),
                ty,
                offset,
            });
            // Word-granular struct packing.
            offset += crate::isa::word_align(types.byte_size(ty));
        }
        let ty = types.add_named(
            &decl.name,
            TypeInfo::Struct {
                name: decl.name.clone(),
                members,
            },
        );
        declare_symbol(&mut table, SymbolTable::ROOT, sink, Symbol {
            kind: SymbolKind::Type,
            name: decl.name.clone(),
            ty,
            line: decl.line,
        });
    }

    for func in &ast.funcs {
        let mut params = Vec::new();
        for param in &func.params {
            match resolve_type(&mut types, &param.ty, param.line, sink) {
                Some(ty) if types.is_scalar(ty) => params.push(ty),
                Some(_) => {
                    sink.push(Diagnostic::new(
                        param.line,
                        format!("parameter `{}` must have a word-sized type", param.name),
                    ));
                    params.push(Types::INT);
                }
                None => params.push(Types::INT),
            }
        }
        let ret = match &func.ret {
            None => Types::VOID,
            Some(ast_ty) => match resolve_type(&mut types, ast_ty, func.line, sink) {
                Some(ty) if types.is_scalar(ty) => ty,
                Some(_) => {
                    sink.push(Diagnostic::new(
                        func.line,
                        format!("function `{}` must return a word-sized type", func.name),
                    ));
                    Types::INT
                }
                None => Types::INT,
            },
        };
        let ty = types.add(TypeInfo::Func {
            params,
            ret,
            comptime: func.comptime,
        });
        declare_symbol(&mut table, SymbolTable::ROOT, sink, Symbol {
            kind: SymbolKind::Func,
            name: func.name.clone(),
            ty,
            line: func.line,
        });
    }

    for global in &ast.globals {
        let Some(ty) = resolve_type(&mut types, &global.ty, global.line, sink) else {
            continue;
        };
        declare_symbol(&mut table, SymbolTable::ROOT, sink, Symbol {
            kind: SymbolKind::GlobalVar,
            name: global.name.clone(),
            ty,
            line: global.line,
        });
    }

    // Scope trees: one parameter scope per function, one scope per block.
    for at in 0..ast.funcs.len() {
        let scope = table.push_scope(SymbolTable::ROOT);
        let params = ast.funcs[at].params.clone();
        for param in &params {
            let ty = resolve_type(&mut types, &param.ty, param.line, sink)
                .unwrap_or(Types::INT);
            declare_symbol(&mut table, scope, sink, Symbol {
                kind: SymbolKind::Param,
                name: param.name.clone(),
                ty,
                line: param.line,
            });
        }
        ast.funcs[at].scope = Some(scope);
        let body = ast.funcs[at].body;
        declare_stmt(ast, &mut types, &mut table, sink, body, scope);
    }

    (types, table)
}

fn declare_symbol(
    table: &mut SymbolTable,
    scope: ScopeId,
    sink: &mut Vec<Diagnostic>,
    symbol: Symbol,
) {
    let line = symbol.line;
    let name = symbol.name.clone();
    if table.declare(scope, symbol).is_err() {
        sink.push(Diagnostic::new(
            line,
            format!("`{name}` is already declared in this scope"),
        ));
    }
}

fn declare_stmt(
    ast: &mut Ast,
    types: &mut Types,
    table: &mut SymbolTable,
    sink: &mut Vec<Diagnostic>,
    stmt: StmtId,
    enclosing: ScopeId,
) {
    match ast.stmt(stmt).kind.clone() {
        StmtKind::Block { decls, stmts, .. } => {
            let scope = table.push_scope(enclosing);
            for decl in &decls {
                let ty = resolve_type(types, &decl.ty, decl.line, sink).unwrap_or(Types::INT);
                declare_symbol(table, scope, sink, Symbol {
                    kind: SymbolKind::LocalVar,
                    name: decl.name.clone(),
                    ty,
                    line: decl.line,
                });
            }
            if let StmtKind::Block { scope: slot, .. } = &mut ast.stmt_mut(stmt).kind {
                *slot = Some(scope);
            }
            for stmt in stmts {
                declare_stmt(ast, types, table, sink, stmt, scope);
            }
        }
        StmtKind::If { then, els, .. } => {
            declare_stmt(ast, types, table, sink, then, enclosing);
            if let Some(els) = els {
                declare_stmt(ast, types, table, sink, els, enclosing);
            }
        }
        StmtKind::While { body, .. } => {
            declare_stmt(ast, types, table, sink, body, enclosing);
        }
        _ => {}
    }
}

/* Inference pass */

fn infer(ast: &mut Ast, types: &Types, table: &SymbolTable, sink: &mut Vec<Diagnostic>) {
    for at in 0..ast.funcs.len() {
        let scope = ast.funcs[at].scope.expect("declaration pass assigns scopes");
        let body = ast.funcs[at].body;
        let mut cx = Infer {
            ast: &mut *ast,
            types,
            table,
            sink: &mut *sink,
        };
        cx.stmt(body, scope);
    }
}

struct Infer<'a> {
    ast: &'a mut Ast,
    types: &'a Types,
    table: &'a SymbolTable,
    sink: &'a mut Vec<Diagnostic>,
}

impl Infer<'_> {
    fn diag(&mut self, line: i64, message: impl Into<String>) {
        self.sink.push(Diagnostic::new(line, message));
    }

    fn stmt(&mut self, id: StmtId, scope: ScopeId) {
        match self.ast.stmt(id).kind.clone() {
            StmtKind::Block {
                stmts,
                scope: inner,
                ..
            } => {
                let inner = inner.expect("declaration pass assigns scopes");
                for stmt in stmts {
                    self.stmt(stmt, inner);
                }
            }
            StmtKind::If { cond, then, els } => {
                self.expr(cond, scope);
                self.stmt(then, scope);
                if let Some(els) = els {
                    self.stmt(els, scope);
                }
            }
            StmtKind::While { cond, body } => {
                self.expr(cond, scope);
                self.stmt(body, scope);
            }
            StmtKind::Return(Some(expr)) | StmtKind::Expr(expr) => {
                self.expr(expr, scope);
            }
            StmtKind::Print(args) => {
                for arg in args {
                    self.expr(arg, scope);
                }
            }
            StmtKind::Assign { target, value } => {
                self.expr(value, scope);
                self.expr(target, scope);
            }
            StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => {}
        }
    }

    fn expr(&mut self, id: ExprId, scope: ScopeId) -> TypeId {
        let line = self.ast.expr(id).line;
        let ty = match self.ast.expr(id).kind.clone() {
            ExprKind::Num(_) => Types::INT,
            ExprKind::Bool(_) => Types::BOOL,
            ExprKind::Ident { name, .. } => self.ident(id, &name, scope, line),
            ExprKind::Unary { operand, .. } => self.expr(operand, scope),
            ExprKind::Binary { op, left, right } => {
                self.expr(right, scope);
                let lhs = self.expr(left, scope);
                match op {
                    // Comparisons produce a plain 0/1 word.
                    BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt => Types::INT,
                    _ => lhs,
                }
            }
            ExprKind::Member { object, field } => self.member(object, &field, scope, line),
            ExprKind::Index { base, index } => {
                self.expr(index, scope);
                let base_ty = self.expr(base, scope);
                match self.types.info(base_ty) {
                    TypeInfo::Array { elem, .. } => *elem,
                    _ => {
                        self.diag(
                            line,
                            format!("cannot index a value of type {}", self.types.display(base_ty)),
                        );
                        Types::VOID
                    }
                }
            }
            ExprKind::Call {
                name,
                args,
                comptime,
                resolved,
            } => {
                if let Some(lit) = resolved {
                    self.expr(lit, scope)
                } else if comptime {
                    let mut arg_ty = Types::VOID;
                    for (at, arg) in args.iter().enumerate() {
                        let ty = self.expr(*arg, scope);
                        if at == 0 {
                            arg_ty = ty;
                        }
                    }
                    if args.is_empty() {
                        self.diag(
                            line,
                            format!("compile-time call `@{name}` needs an expression argument"),
                        );
                    }
                    arg_ty
                } else {
                    for arg in &args {
                        self.expr(*arg, scope);
                    }
                    match self.table.lookup_root(&name) {
                        Some(sym) if self.table.symbol(sym).kind == SymbolKind::Func => {
                            match self.types.info(self.table.symbol(sym).ty) {
                                TypeInfo::Func { ret, .. } => *ret,
                                _ => Types::VOID,
                            }
                        }
                        _ => {
                            self.diag(line, format!("call to unknown function `{name}`"));
                            Types::VOID
                        }
                    }
                }
            }
        };
        self.ast.expr_mut(id).ty = Some(ty);
        ty
    }

    fn ident(&mut self, id: ExprId, name: &str, scope: ScopeId, line: i64) -> TypeId {
        match self.table.lookup(scope, name) {
            Some(sym) => {
                let symbol = self.table.symbol(sym);
                match symbol.kind {
                    SymbolKind::Func => {
                        self.diag(line, format!("function `{name}` used as a value"));
                        Types::VOID
                    }
                    SymbolKind::Type => {
                        // Legal only as the left side of enum member access;
                        // the member case handles it before recursing here.
                        self.diag(line, format!("type `{name}` used as a value"));
                        Types::VOID
                    }
                    _ => {
                        let ty = symbol.ty;
                        if let ExprKind::Ident { sym: slot, .. } = &mut self.ast.expr_mut(id).kind
                        {
                            *slot = Some(sym);
                        }
                        ty
                    }
                }
            }
            None => {
                self.diag(line, format!("undeclared identifier `{name}`"));
                Types::VOID
            }
        }
    }

    fn member(&mut self, object: ExprId, field: &str, scope: ScopeId, line: i64) -> TypeId {
        // `Enum.Member` names a constant, not a field of a value.
        if let ExprKind::Ident { name, .. } = &self.ast.expr(object).kind {
            let name = name.clone();
            if let Some(sym) = self.table.lookup(scope, &name) {
                if self.table.symbol(sym).kind == SymbolKind::Type {
                    let ty = self.table.symbol(sym).ty;
                    if let TypeInfo::Enum { members, .. } = self.types.info(ty) {
                        if !members.iter().any(|m| m == field) {
                            self.diag(
                                line,
                                format!("enum `{name}` has no member `{field}`"),
                            );
                        }
                        self.ast.expr_mut(object).ty = Some(ty);
                        if let ExprKind::Ident { sym: slot, .. } =
                            &mut self.ast.expr_mut(object).kind
                        {
                            *slot = Some(sym);
                        }
                        return ty;
                    }
                }
            }
        }
        let object_ty = self.expr(object, scope);
        match self.types.info(object_ty) {
            TypeInfo::Struct { name, members } => {
                match members.iter().find(|m| m.name == field) {
                    Some(member) => member.ty,
                    None => {
                        let name = name.clone();
                        self.diag(
                            line,
                            format!("struct `{name}` has no member `{field}`"),
                        );
                        Types::VOID
                    }
                }
            }
            _ => {
                self.diag(
                    line,
                    format!(
                        "member access on a value of type {}",
                        self.types.display(object_ty)
                    ),
                );
                Types::VOID
            }
        }
    }
}

/* Checking pass */

fn check(ast: &Ast, types: &Types, table: &SymbolTable, sink: &mut Vec<Diagnostic>) {
    for func in &ast.funcs {
        let ret = match table.lookup_root(&func.name).map(|s| table.symbol(s)) {
            Some(symbol) => match types.info(symbol.ty) {
                TypeInfo::Func { ret, .. } => *ret,
                _ => Types::VOID,
            },
            None => Types::VOID,
        };
        if func.name == "main" {
            if !func.params.is_empty() {
                sink.push(Diagnostic::new(func.line, "`main` takes no parameters"));
            }
            if func.comptime {
                sink.push(Diagnostic::new(func.line, "`main` cannot be compile-time"));
            }
        }
        let mut cx = Check {
            ast,
            types,
            table,
            sink: &mut *sink,
            ret,
            loop_depth: 0,
        };
        cx.stmt(func.body, func.comptime);
    }
}

struct Check<'a> {
    ast: &'a Ast,
    types: &'a Types,
    table: &'a SymbolTable,
    sink: &'a mut Vec<Diagnostic>,
    ret: TypeId,
    loop_depth: u32,
}

impl Check<'_> {
    fn diag(&mut self, line: i64, message: impl Into<String>) {
        self.sink.push(Diagnostic::new(line, message));
    }

    fn ty(&self, id: ExprId) -> TypeId {
        self.ast.expr(id).ty.expect("inference pass assigns types")
    }

    fn expect_condition(&mut self, id: ExprId) {
        let ty = self.ty(id);
        if ty != Types::INT && ty != Types::BOOL {
            let line = self.ast.expr(id).line;
            let shown = self.types.display(ty);
            self.diag(line, format!("condition must be int or bool, got {shown}"));
        }
    }

    fn stmt(&mut self, id: StmtId, in_ct: bool) {
        let line = self.ast.stmt(id).line;
        match self.ast.stmt(id).kind.clone() {
            StmtKind::Block { stmts, .. } => {
                for stmt in stmts {
                    self.stmt(stmt, in_ct);
                }
            }
            StmtKind::If { cond, then, els } => {
                self.expr(cond, in_ct);
                self.expect_condition(cond);
                self.stmt(then, in_ct);
                if let Some(els) = els {
                    self.stmt(els, in_ct);
                }
            }
            StmtKind::While { cond, body } => {
                self.expr(cond, in_ct);
                self.expect_condition(cond);
                self.loop_depth += 1;
                self.stmt(body, in_ct);
                self.loop_depth -= 1;
            }
            StmtKind::Break => {
                if self.loop_depth == 0 {
                    self.diag(line, "`break` outside of a loop");
                }
            }
            StmtKind::Continue => {
                if self.loop_depth == 0 {
                    self.diag(line, "`continue` outside of a loop");
                }
            }
            StmtKind::Return(value) => match value {
                Some(expr) => {
                    self.expr(expr, in_ct);
                    let got = self.ty(expr);
                    if self.ret == Types::VOID {
                        self.diag(line, "`return` with a value in a function returning nothing");
                    } else if got != self.ret {
                        let expected = self.types.display(self.ret);
                        let got = self.types.display(got);
                        self.diag(line, format!("returning {got}, expected {expected}"));
                    }
                }
                None => {
                    if self.ret != Types::VOID {
                        let expected = self.types.display(self.ret);
                        self.diag(
                            line,
                            format!("`return` without a value in a function returning {expected}"),
                        );
                    }
                }
            },
            StmtKind::Print(args) => {
                for arg in args {
                    self.expr(arg, in_ct);
                    if !self.types.is_scalar(self.ty(arg)) {
                        let shown = self.types.display(self.ty(arg));
                        self.diag(line, format!("cannot print a value of type {shown}"));
                    }
                }
            }
            StmtKind::Assign { target, value } => {
                self.expr(value, in_ct);
                self.expr(target, in_ct);
                self.check_assign_target(target);
                let lhs = self.ty(target);
                let rhs = self.ty(value);
                if lhs != rhs && lhs != Types::VOID && rhs != Types::VOID {
                    let lhs = self.types.display(lhs);
                    let rhs = self.types.display(rhs);
                    self.diag(line, format!("cannot assign {rhs} to {lhs}"));
                }
            }
            StmtKind::Expr(expr) => {
                self.expr(expr, in_ct);
            }
        }
    }

    fn check_assign_target(&mut self, id: ExprId) {
        let line = self.ast.expr(id).line;
        match &self.ast.expr(id).kind {
            ExprKind::Ident { sym, .. } => {
                if let Some(sym) = sym {
                    let kind = self.table.symbol(*sym).kind;
                    if !matches!(
                        kind,
                        SymbolKind::LocalVar | SymbolKind::GlobalVar | SymbolKind::Param
                    ) {
                        self.diag(line, "assignment target is not a variable");
                    }
                }
            }
            ExprKind::Member { object, .. } => {
                // Enum constants are typed as the enum itself and rejected.
                if self.ast.expr(*object).ty == self.ast.expr(id).ty
                    && matches!(
                        self.types.info(self.ty(id)),
                        TypeInfo::Enum { .. }
                    )
                {
                    self.diag(line, "cannot assign to an enum constant");
                }
            }
            ExprKind::Index { base, .. } => {
                if !matches!(self.ast.expr(*base).kind, ExprKind::Ident { .. }) {
                    self.diag(line, "indexed assignment requires a named array");
                }
            }
            _ => self.diag(line, "expression cannot be assigned to"),
        }
    }

    /// The expression of a compile-time call executes in a standalone image
    /// with no enclosing frame, so locals and parameters cannot appear in
    /// it (globals are caught by the compile-time context check).
    fn reject_frame_variables(&mut self, id: ExprId) {
        let line = self.ast.expr(id).line;
        match self.ast.expr(id).kind.clone() {
            ExprKind::Num(_) | ExprKind::Bool(_) => {}
            ExprKind::Ident { sym, name } => {
                if let Some(sym) = sym {
                    if matches!(
                        self.table.symbol(sym).kind,
                        SymbolKind::LocalVar | SymbolKind::Param
                    ) {
                        self.diag(
                            line,
                            format!("`{name}` cannot be used in a compile-time expression"),
                        );
                    }
                }
            }
            ExprKind::Unary { operand, .. } => self.reject_frame_variables(operand),
            ExprKind::Binary { left, right, .. } => {
                self.reject_frame_variables(left);
                self.reject_frame_variables(right);
            }
            ExprKind::Member { object, .. } => self.reject_frame_variables(object),
            ExprKind::Index { base, index } => {
                self.reject_frame_variables(base);
                self.reject_frame_variables(index);
            }
            ExprKind::Call { args, resolved, .. } => {
                if resolved.is_some() {
                    return;
                }
                for arg in args {
                    self.reject_frame_variables(arg);
                }
            }
        }
    }

    fn expr(&mut self, id: ExprId, in_ct: bool) {
        let line = self.ast.expr(id).line;
        match self.ast.expr(id).kind.clone() {
            ExprKind::Num(_) | ExprKind::Bool(_) => {}
            ExprKind::Ident { sym, .. } => {
                // Compile-time images carry no global storage.
                if in_ct {
                    if let Some(sym) = sym {
                        if self.table.symbol(sym).kind == SymbolKind::GlobalVar {
                            self.diag(
                                line,
                                "global variables are not available in compile-time expressions",
                            );
                        }
                    }
                }
            }
            ExprKind::Unary { operand, .. } => {
                self.expr(operand, in_ct);
                if self.ty(operand) != Types::INT {
                    self.diag(line, "unary `-` needs an int operand");
                }
            }
            ExprKind::Binary { op, left, right } => {
                self.expr(left, in_ct);
                self.expr(right, in_ct);
                let (lhs, rhs) = (self.ty(left), self.ty(right));
                match op {
                    BinOp::Eq | BinOp::Ne => {
                        if lhs != rhs || !self.types.is_scalar(lhs) {
                            let lhs = self.types.display(lhs);
                            let rhs = self.types.display(rhs);
                            self.diag(
                                line,
                                format!("cannot compare {lhs} with {rhs}"),
                            );
                        }
                    }
                    _ => {
                        if lhs != Types::INT || rhs != Types::INT {
                            let symbol = op.symbol();
                            self.diag(
                                line,
                                format!("operator `{symbol}` needs int operands"),
                            );
                        }
                    }
                }
            }
            ExprKind::Member { object, .. } => {
                // Enum constant form was fully handled during inference.
                if self.ast.expr(object).ty != self.ast.expr(id).ty
                    || !matches!(self.types.info(self.ty(id)), TypeInfo::Enum { .. })
                {
                    if !matches!(self.ast.expr(object).kind, ExprKind::Ident { .. }) {
                        self.diag(
                            line,
                            "member access requires a named struct variable",
                        );
                    }
                }
            }
            ExprKind::Index { base, index } => {
                self.expr(index, in_ct);
                if self.ty(index) != Types::INT {
                    self.diag(line, "array index must be an int");
                }
                if !matches!(self.ast.expr(base).kind, ExprKind::Ident { .. }) {
                    self.diag(line, "indexing requires a named array variable");
                }
            }
            ExprKind::Call {
                name,
                args,
                comptime,
                resolved,
            } => {
                if let Some(lit) = resolved {
                    self.expr(lit, in_ct);
                    return;
                }
                if comptime {
                    if args.len() != 1 {
                        self.diag(
                            line,
                            format!(
                                "compile-time call `@{name}` takes exactly one expression, got {}",
                                args.len()
                            ),
                        );
                    }
                    for arg in &args {
                        // The argument is evaluated at compile time.
                        self.expr(*arg, true);
                        self.reject_frame_variables(*arg);
                    }
                    if let Some(&first) = args.first() {
                        if !self.types.is_scalar(self.ty(first)) {
                            let shown = self.types.display(self.ty(first));
                            self.diag(
                                line,
                                format!("compile-time call must produce a word, got {shown}"),
                            );
                        }
                    }
                    return;
                }
                for arg in &args {
                    self.expr(*arg, in_ct);
                }
                let Some(sym) = self.table.lookup_root(&name) else {
                    return; // already reported by inference
                };
                let TypeInfo::Func {
                    params,
                    comptime: callee_ct,
                    ..
                } = self.types.info(self.table.symbol(sym).ty)
                else {
                    return;
                };
                if *callee_ct && !in_ct {
                    self.diag(
                        line,
                        format!("compile-time function `{name}` called at runtime"),
                    );
                }
                if params.len() != args.len() {
                    self.diag(
                        line,
                        format!(
                            "`{name}` takes {} argument(s), got {}",
                            params.len(),
                            args.len()
                        ),
                    );
                } else {
                    for (&param, arg) in params.iter().zip(&args) {
                        let got = self.ty(*arg);
                        if got != param && got != Types::VOID {
                            let expected = self.types.display(param);
                            let got = self.types.display(got);
                            self.diag(
                                line,
                                format!("argument type {got} does not match parameter {expected}"),
                            );
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::analyze;
    use crate::parser::parse;

    fn analyze_source(source: &str) -> Result<(), Vec<String>> {
        let mut ast = parse(source).map_err(|errs| {
            errs.iter().map(|e| e.to_string()).collect::<Vec<_>>()
        })?;
        analyze(&mut ast)
            .map(|_| ())
            .map_err(|errs| errs.iter().map(|e| e.to_string()).collect())
    }

    #[test]
    fn accepts_well_typed_program() {
        analyze_source(
            "var total: int\n\
             func add(a: int, b: int): int begin return a + b end\n\
             func main() begin total := add(1, 2) print total end",
        )
        .unwrap();
    }

    #[test]
    fn rejects_undeclared_identifier() {
        let errors = analyze_source("func main() begin print missing end").unwrap_err();
        assert!(errors[0].contains("undeclared identifier `missing`"));
    }

    #[test]
    fn rejects_break_outside_loop() {
        let errors = analyze_source("func main() begin break end").unwrap_err();
        assert!(errors[0].contains("`break` outside of a loop"));
    }

    #[test]
    fn rejects_arity_mismatch() {
        let errors = analyze_source(
            "func f(a: int): int begin return a end\n\
             func main() begin print f(1, 2) end",
        )
        .unwrap_err();
        assert!(errors[0].contains("takes 1 argument(s), got 2"));
    }

    #[test]
    fn rejects_runtime_call_to_comptime_function() {
        let errors = analyze_source(
            "func @table(n: int): int begin return n * 2 end\n\
             func main() begin print table(3) end",
        )
        .unwrap_err();
        assert!(errors[0].contains("called at runtime"));
    }

    #[test]
    fn accepts_comptime_function_inside_comptime_call() {
        analyze_source(
            "func @table(n: int): int begin return n * 2 end\n\
             func main() begin print @call(table(3)) end",
        )
        .unwrap();
    }

    #[test]
    fn resolves_enum_constants() {
        analyze_source(
            "enum Color begin Red, Green, Blue end\n\
             func main() begin\n\
             var c: Color\n\
             c := Color.Green\n\
             if c = Color.Green then print 1\n\
             end",
        )
        .unwrap();
    }

    #[test]
    fn rejects_locals_inside_comptime_expressions() {
        let errors = analyze_source(
            "func f(n: int): int begin return n end\n\
             func main() begin var x: int\nx := 1\nprint @call(f(x)) end",
        )
        .unwrap_err();
        assert!(errors[0].contains("cannot be used in a compile-time expression"));
    }

    #[test]
    fn rejects_shadowing_within_one_scope() {
        let errors = analyze_source(
            "func main() begin var x: int, x: int\nx := 1 end",
        )
        .unwrap_err();
        assert!(errors[0].contains("already declared"));
    }
}
