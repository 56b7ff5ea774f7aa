//! The translator from a type-checked [`Ast`] to a [`Bytecode`] image.
//!
//! Lowering is a single in-order walk. Forward references to functions are
//! emitted as a zero word immediate and recorded in a patch list that is
//! resolved once every function has been emitted; branch immediates are
//! patched as soon as their target offset is known, the way a wasmi label is
//! resolved at the `End` of its block.
//!
//! # Frame layout
//!
//! The caller reserves the return-value slot, pushes the arguments in source
//! order, pushes the target and return address (`LI`/`CALL`), and the callee
//! prologue (`FUNCPRO`) saves the old base pointer. Below the base pointer a
//! frame therefore looks like, walking down: old `bp`, return address, the
//! parameters (last parameter nearest the return address), and the
//! return-value slot. Locals grow upwards from the base pointer in
//! block-nesting order.

use std::collections::{HashMap, HashSet};

use log::trace;
use thiserror::Error;

use crate::{
    ast::{Ast, BinOp, ExprId, ExprKind, Func, StmtId, StmtKind, UnOp},
    common::StackWithLimit,
    isa::{
        word_align, words, Bytecode, CodeOverflow, Opcode, Quarter, Word, CODE_CAPACITY, NO_LINE,
    },
    types::{SymbolKind, SymbolTable, TypeId, TypeInfo, Types},
};

/// Deepest loop nesting the translator accepts.
pub const MAX_LOOP_DEPTH: usize = 128;

/// Most `break` statements that may be pending patches at once.
pub const MAX_BREAK_DEPTH: usize = 128;

/// Synthetic name under which each frame's return-value slot is registered.
const RETURN_SLOT: &str = "__return__";

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("code buffer capacity ({CODE_CAPACITY} bytes) exceeded")]
    CodeOverflow,
    #[error("line {line}: maximum loop nesting depth ({MAX_LOOP_DEPTH}) exceeded")]
    LoopDepthExceeded { line: i64 },
    #[error("line {line}: maximum pending `break` count ({MAX_BREAK_DEPTH}) exceeded")]
    BreakDepthExceeded { line: i64 },
    #[error("frame layout exceeds the addressable offset range")]
    OffsetOverflow,
    #[error("line {line}: `print` takes at most 255 arguments")]
    TooManyPrintArgs { line: i64 },
    #[error("program has no `main` function")]
    MissingMain,
    #[error("call to unknown function `{0}`")]
    UnknownFunction(String),
    #[error("line {0}: compile-time call has not been evaluated yet")]
    UnresolvedComptime(i64),
    #[error("translator could not resolve variable `{0}` in this image")]
    UnresolvedVariable(String),
    #[error("internal translation error: {0}")]
    Internal(String),
}

impl From<CodeOverflow> for CompileError {
    fn from(_: CodeOverflow) -> Self {
        CompileError::CodeOverflow
    }
}

/// Where an identifier lives, as classified by the scope map.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Slot {
    /// Signed byte offset from the base pointer.
    Local(i64),
    /// Absolute byte offset from the stack start.
    Global(i64),
}

impl Slot {
    fn displaced(self, bytes: i64) -> Slot {
        match self {
            Slot::Local(offset) => Slot::Local(offset + bytes),
            Slot::Global(offset) => Slot::Global(offset + bytes),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Access {
    Load,
    Store,
}

/// The scope map: one frame per lexical block, innermost last.
#[derive(Debug, Default)]
struct StackVars {
    frames: Vec<HashMap<String, i64>>,
}

impl StackVars {
    fn push_frame(&mut self) {
        self.frames.push(HashMap::new());
    }

    fn pop_frame(&mut self) {
        self.frames.pop();
    }

    fn clear(&mut self) {
        self.frames.clear();
    }

    fn set(&mut self, name: &str, bp_offset: i64) {
        let frame = self.frames.last_mut().expect("a frame is always open");
        let previous = frame.insert(name.to_owned(), bp_offset);
        debug_assert!(previous.is_none(), "duplicate slot for `{name}`");
    }

    fn lookup(&self, name: &str) -> Option<i64> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name).copied())
    }
}

pub struct Compiler<'a> {
    types: &'a Types,
    symbols: &'a SymbolTable,
    ast: &'a Ast,
    code: Bytecode,
    stack_vars: StackVars,
    /// Next free bp-relative byte offset for locals.
    bp_offset: i64,
    globals: HashMap<String, i64>,
    functions: HashMap<String, u32>,
    patches: Vec<(u32, String)>,
    loops: StackWithLimit<u32>,
    breaks: StackWithLimit<u32>,
    /// Source line attached to emitted opcodes.
    line: i64,
}

/// Lowers a whole program: globals reservation, `main` first, then every
/// other runtime function, then call-site patch resolution.
pub fn compile_program(
    types: &Types,
    symbols: &SymbolTable,
    ast: &Ast,
) -> Result<Bytecode, CompileError> {
    let mut compiler = Compiler::new(types, symbols, ast);
    compiler.reserve_globals()?;

    let main = ast.main_func().ok_or(CompileError::MissingMain)?;
    compiler.emit_func(ast.func(main), true)?;
    for func in &ast.funcs {
        if func.name == "main" || compiler.func_is_comptime(func) {
            continue;
        }
        compiler.emit_func(func, false)?;
    }

    compiler.resolve_patches()?;
    Ok(compiler.code)
}

/// Lowers a single compile-time call into a standalone image: the evaluated
/// expression, an `EXIT`, and the transitive callee closure of the
/// expression.
pub fn compile_call(
    types: &Types,
    symbols: &SymbolTable,
    ast: &Ast,
    call: ExprId,
) -> Result<Bytecode, CompileError> {
    let ExprKind::Call { args, .. } = &ast.expr(call).kind else {
        return Err(CompileError::Internal(
            "compile_call expects a call node".into(),
        ));
    };
    let expr = *args.first().ok_or_else(|| {
        CompileError::Internal("compile-time call has no expression argument".into())
    })?;

    let mut compiler = Compiler::new(types, symbols, ast);
    compiler.emit_expr(expr, Access::Load)?;
    compiler.code.emit_op(Opcode::Exit, NO_LINE)?;

    let closure = callee_closure(ast, expr);
    for func in &ast.funcs {
        if closure.contains(func.name.as_str()) {
            compiler.emit_func(func, false)?;
        }
    }

    compiler.resolve_patches()?;
    Ok(compiler.code)
}

impl<'a> Compiler<'a> {
    fn new(types: &'a Types, symbols: &'a SymbolTable, ast: &'a Ast) -> Self {
        Compiler {
            types,
            symbols,
            ast,
            code: Bytecode::new(),
            stack_vars: StackVars::default(),
            bp_offset: 0,
            globals: HashMap::new(),
            functions: HashMap::new(),
            patches: Vec::new(),
            loops: StackWithLimit::with_limit(MAX_LOOP_DEPTH),
            breaks: StackWithLimit::with_limit(MAX_BREAK_DEPTH),
            line: NO_LINE,
        }
    }

    fn func_type(&self, name: &str) -> Result<&'a TypeInfo, CompileError> {
        let sym = self
            .symbols
            .lookup_root(name)
            .ok_or_else(|| CompileError::UnknownFunction(name.to_owned()))?;
        let symbol = self.symbols.symbol(sym);
        if symbol.kind != SymbolKind::Func {
            return Err(CompileError::UnknownFunction(name.to_owned()));
        }
        Ok(self.types.info(symbol.ty))
    }

    fn func_is_comptime(&self, func: &Func) -> bool {
        matches!(
            self.func_type(&func.name),
            Ok(TypeInfo::Func { comptime: true, .. })
        )
    }

    fn footprint(&self, ty: TypeId) -> i64 {
        word_align(self.types.byte_size(ty))
    }

    fn quarter(&self, value: i64) -> Result<Quarter, CompileError> {
        Quarter::try_from(value).map_err(|_| CompileError::OffsetOverflow)
    }

    /// Reserves stack space for every global and records their absolute
    /// offsets, in declaration order so emission is deterministic.
    fn reserve_globals(&mut self) -> Result<(), CompileError> {
        let mut space = 0i64;
        for global in &self.ast.globals {
            let sym = self
                .symbols
                .lookup_root(&global.name)
                .ok_or_else(|| CompileError::UnresolvedVariable(global.name.clone()))?;
            self.globals.insert(global.name.clone(), space);
            space += self.footprint(self.symbols.symbol(sym).ty);
        }
        let slots = self.quarter(words(space))?;
        self.code.emit_op(Opcode::Pushn, NO_LINE)?;
        self.code.emit_quarter(slots)?;
        Ok(())
    }

    /// Classifies an identifier as a local or a global slot.
    fn classify(&self, name: &str) -> Result<Slot, CompileError> {
        if let Some(offset) = self.stack_vars.lookup(name) {
            return Ok(Slot::Local(offset));
        }
        if let Some(&offset) = self.globals.get(name) {
            return Ok(Slot::Global(offset));
        }
        Err(CompileError::UnresolvedVariable(name.to_owned()))
    }

    fn emit_load_store(&mut self, slot: Slot, access: Access) -> Result<(), CompileError> {
        match (slot, access) {
            (Slot::Local(offset), Access::Load) => {
                let offset = self.quarter(offset)?;
                self.code.emit_op(Opcode::Ldbp, self.line)?;
                self.code.emit_quarter(offset)?;
            }
            (Slot::Local(offset), Access::Store) => {
                let offset = self.quarter(offset)?;
                self.code.emit_op(Opcode::Stbp, self.line)?;
                self.code.emit_quarter(offset)?;
            }
            (Slot::Global(offset), Access::Load) => {
                self.code.emit_op(Opcode::Lda, self.line)?;
                self.code.emit_word(offset)?;
            }
            (Slot::Global(offset), Access::Store) => {
                self.code.emit_op(Opcode::Sta, self.line)?;
                self.code.emit_word(offset)?;
            }
        }
        Ok(())
    }

    /* Expressions */

    fn emit_expr(&mut self, id: ExprId, access: Access) -> Result<(), CompileError> {
        match self.ast.expr(id).kind.clone() {
            ExprKind::Num(value) => {
                self.code.emit_op(Opcode::Li, self.line)?;
                self.code.emit_word(value)?;
            }
            ExprKind::Bool(value) => {
                self.code.emit_op(Opcode::Li, self.line)?;
                self.code.emit_word(Word::from(value))?;
            }
            ExprKind::Ident { name, .. } => {
                let slot = self.classify(&name)?;
                self.emit_load_store(slot, access)?;
            }
            ExprKind::Unary {
                op: UnOp::Neg,
                operand,
            } => {
                self.emit_expr(operand, Access::Load)?;
                self.code.emit_op(Opcode::Li, self.line)?;
                self.code.emit_word(-1)?;
                self.code.emit_op(Opcode::Mul, self.line)?;
            }
            ExprKind::Binary { op, left, right } => {
                // Right first, so the left operand is on top at pop time.
                self.emit_expr(right, Access::Load)?;
                self.emit_expr(left, Access::Load)?;
                self.emit_binop(op)?;
            }
            ExprKind::Member { object, field } => {
                self.emit_member(id, object, &field, access)?;
            }
            ExprKind::Index { base, index } => {
                self.emit_index(base, index, access)?;
            }
            ExprKind::Call {
                name,
                args,
                comptime,
                resolved,
            } => {
                if let Some(lit) = resolved {
                    self.emit_expr(lit, access)?;
                } else if comptime {
                    return Err(CompileError::UnresolvedComptime(self.ast.expr(id).line));
                } else {
                    self.emit_call(&name, &args)?;
                }
            }
        }
        Ok(())
    }

    fn emit_binop(&mut self, op: BinOp) -> Result<(), CompileError> {
        let opcode = match op {
            BinOp::Add => Opcode::Add,
            BinOp::Sub => Opcode::Sub,
            BinOp::Mul => Opcode::Mul,
            BinOp::Div => Opcode::Div,
            BinOp::Shl => Opcode::Lshift,
            BinOp::Shr => Opcode::Rshift,
            BinOp::Gt => Opcode::Ge,
            BinOp::Lt => Opcode::Le,
            // Equality piggybacks on the "non-zero is true" convention:
            // `a = b` is SUB then NOT, `a != b` is SUB alone.
            BinOp::Eq => {
                self.code.emit_op(Opcode::Sub, self.line)?;
                Opcode::Not
            }
            BinOp::Ne => Opcode::Sub,
        };
        self.code.emit_op(opcode, self.line)?;
        Ok(())
    }

    /// Struct member access collapses to a single load or store whose offset
    /// combines the variable's slot with the member's byte offset; enum
    /// constants collapse to a literal ordinal.
    fn emit_member(
        &mut self,
        expr: ExprId,
        object: ExprId,
        field: &str,
        access: Access,
    ) -> Result<(), CompileError> {
        let object_ty = self
            .ast
            .expr(object)
            .ty
            .ok_or_else(|| CompileError::Internal("member access on untyped node".into()))?;
        if let TypeInfo::Enum { members, .. } = self.types.info(object_ty) {
            if self.ast.expr(expr).ty == Some(object_ty) {
                let ordinal = members
                    .iter()
                    .position(|m| m == field)
                    .ok_or_else(|| CompileError::Internal(format!("unknown enum member `{field}`")))?;
                self.code.emit_op(Opcode::Li, self.line)?;
                self.code.emit_word(ordinal as Word)?;
                return Ok(());
            }
        }
        let ExprKind::Ident { name, .. } = &self.ast.expr(object).kind else {
            return Err(CompileError::Internal(
                "member access requires a named struct variable".into(),
            ));
        };
        let TypeInfo::Struct { members, .. } = self.types.info(object_ty) else {
            return Err(CompileError::Internal(format!(
                "member access on non-struct `{name}`"
            )));
        };
        let member = members
            .iter()
            .find(|m| m.name == field)
            .ok_or_else(|| CompileError::Internal(format!("unknown member `{field}`")))?;
        let slot = self.classify(name)?.displaced(member.offset);
        self.emit_load_store(slot, access)
    }

    /// Array indexing computes the element address at runtime: the index is
    /// scaled by the word-aligned element size and displaced by the array's
    /// base offset, then consumed by `LDI`/`STI`.
    fn emit_index(
        &mut self,
        base: ExprId,
        index: ExprId,
        access: Access,
    ) -> Result<(), CompileError> {
        let ExprKind::Ident { name, .. } = self.ast.expr(base).kind.clone() else {
            return Err(CompileError::Internal(
                "indexing requires a named array variable".into(),
            ));
        };
        let base_ty = self
            .ast
            .expr(base)
            .ty
            .ok_or_else(|| CompileError::Internal("indexing an untyped node".into()))?;
        let TypeInfo::Array { elem, .. } = self.types.info(base_ty) else {
            return Err(CompileError::Internal(format!(
                "indexing non-array `{name}`"
            )));
        };
        let stride = self.footprint(*elem);

        self.emit_expr(index, Access::Load)?;
        self.code.emit_op(Opcode::Li, self.line)?;
        self.code.emit_word(stride)?;
        self.code.emit_op(Opcode::Mul, self.line)?;
        let base_offset = match self.classify(&name)? {
            Slot::Local(offset) | Slot::Global(offset) => offset,
        };
        self.code.emit_op(Opcode::Li, self.line)?;
        self.code.emit_word(base_offset)?;
        self.code.emit_op(Opcode::Add, self.line)?;

        let opcode = match access {
            Access::Load => Opcode::Ldi,
            Access::Store => Opcode::Sti,
        };
        self.code.emit_op(opcode, self.line)?;
        Ok(())
    }

    /// Calls reserve the return-value slot first, push arguments in source
    /// order, then transfer through `LI`/`CALL`. The argument slots are
    /// released afterwards, leaving the return value on top of the operand
    /// stack.
    fn emit_call(&mut self, name: &str, args: &[ExprId]) -> Result<(), CompileError> {
        let TypeInfo::Func { params, ret, .. } = self.func_type(name)? else {
            return Err(CompileError::UnknownFunction(name.to_owned()));
        };
        let arg_space: i64 = params.iter().map(|&p| words(self.types.byte_size(p))).sum();
        let ret_words = words(self.types.byte_size(*ret));

        self.code.emit_op(Opcode::Pushn, self.line)?;
        let ret_words = self.quarter(ret_words)?;
        self.code.emit_quarter(ret_words)?;

        for &arg in args {
            self.emit_expr(arg, Access::Load)?;
        }

        let imm_at = self.code.emit_op(Opcode::Li, self.line)?;
        match self.functions.get(name) {
            Some(&entry) => self.code.emit_word(Word::from(entry))?,
            None => {
                // Forward reference; resolved once every function is emitted.
                self.patches.push((imm_at, name.to_owned()));
                self.code.emit_word(0)?;
            }
        }
        self.code.emit_op(Opcode::Call, self.line)?;

        self.code.emit_op(Opcode::Popn, self.line)?;
        let arg_space = self.quarter(arg_space)?;
        self.code.emit_quarter(arg_space)?;
        Ok(())
    }

    /* Statements */

    fn emit_stmt(&mut self, id: StmtId) -> Result<(), CompileError> {
        let line = self.ast.stmt(id).line;
        self.line = line;
        match self.ast.stmt(id).kind.clone() {
            StmtKind::Assign { target, value } => {
                self.emit_expr(value, Access::Load)?;
                self.emit_expr(target, Access::Store)?;
            }
            StmtKind::If { cond, then, els } => {
                self.emit_expr(cond, Access::Load)?;
                // Falls through to the else branch (or the end) on zero.
                let skip_at = self.code.emit_op(Opcode::Biz, line)?;
                self.code.emit_quarter(0)?;
                self.emit_stmt(then)?;
                match els {
                    None => {
                        let target = self.code.offset() as i64 - skip_at as i64 - 2;
                        self.code.patch_quarter(skip_at, self.quarter(target)?);
                    }
                    Some(els) => {
                        let end_at = self.code.emit_op(Opcode::Li, line)?;
                        self.code.emit_word(0)?;
                        self.code.emit_op(Opcode::Jmp, line)?;
                        let target = self.code.offset() as i64 - skip_at as i64 - 2;
                        self.code.patch_quarter(skip_at, self.quarter(target)?);
                        self.emit_stmt(els)?;
                        self.code.patch_word(end_at, Word::from(self.code.offset()));
                    }
                }
            }
            StmtKind::While { cond, body } => {
                let loop_start = self.code.offset();
                self.loops
                    .push(loop_start)
                    .map_err(|_| CompileError::LoopDepthExceeded { line })?;
                let pending_breaks = self.breaks.len();

                self.emit_expr(cond, Access::Load)?;
                let exit_at = self.code.emit_op(Opcode::Biz, line)?;
                self.code.emit_quarter(0)?;

                self.emit_stmt(body)?;

                self.code.emit_op(Opcode::Li, line)?;
                self.code.emit_word(Word::from(loop_start))?;
                self.code.emit_op(Opcode::Jmp, line)?;

                let target = self.code.offset() as i64 - exit_at as i64 - 2;
                self.code.patch_quarter(exit_at, self.quarter(target)?);

                // Every break since loop entry lands just past the back-jump.
                let loop_end = Word::from(self.code.offset());
                for imm_at in self.breaks.split_off(pending_breaks) {
                    self.code.patch_word(imm_at, loop_end);
                }
                self.loops.pop();
            }
            StmtKind::Continue => {
                let target = *self.loops.top().ok_or_else(|| {
                    CompileError::Internal("`continue` outside of a loop".into())
                })?;
                self.code.emit_op(Opcode::Li, line)?;
                self.code.emit_word(Word::from(target))?;
                self.code.emit_op(Opcode::Jmp, line)?;
            }
            StmtKind::Break => {
                let imm_at = self.code.emit_op(Opcode::Li, line)?;
                // Placeholder until the enclosing loop closes.
                self.code.emit_word(-1)?;
                self.code.emit_op(Opcode::Jmp, line)?;
                self.breaks
                    .push(imm_at)
                    .map_err(|_| CompileError::BreakDepthExceeded { line })?;
            }
            StmtKind::Block { stmts, scope, .. } => {
                self.emit_block(&stmts, scope, line)?;
            }
            StmtKind::Print(args) => {
                for &arg in &args {
                    self.emit_expr(arg, Access::Load)?;
                }
                let count = u8::try_from(args.len())
                    .map_err(|_| CompileError::TooManyPrintArgs { line })?;
                self.code.emit_op(Opcode::Print, line)?;
                self.code.emit_byte(count)?;
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.emit_expr(value, Access::Load)?;
                    let slot = self.stack_vars.lookup(RETURN_SLOT).ok_or_else(|| {
                        CompileError::Internal("return slot is not in scope".into())
                    })?;
                    self.emit_load_store(Slot::Local(slot), Access::Store)?;
                }
                self.code.emit_op(Opcode::Ret, NO_LINE)?;
            }
            StmtKind::Expr(expr) => {
                self.emit_expr(expr, Access::Load)?;
                // Discard the value to keep the operand stack balanced.
                let ty = self
                    .ast
                    .expr(expr)
                    .ty
                    .ok_or_else(|| CompileError::Internal("untyped expression".into()))?;
                let drop_words = words(self.types.byte_size(ty));
                if drop_words > 0 {
                    self.code.emit_op(Opcode::Popn, line)?;
                    let drop_words = self.quarter(drop_words)?;
                    self.code.emit_quarter(drop_words)?;
                }
            }
        }
        Ok(())
    }

    /// Blocks that declare locals reserve their frame footprint on entry and
    /// release it on exit; blocks without locals emit nothing of their own.
    fn emit_block(
        &mut self,
        stmts: &[StmtId],
        scope: Option<crate::types::ScopeId>,
        line: i64,
    ) -> Result<(), CompileError> {
        let locals: Vec<_> = match scope {
            Some(scope) => self
                .symbols
                .scope(scope)
                .symbols
                .iter()
                .map(|&sym| self.symbols.symbol(sym))
                .filter(|sym| sym.kind == SymbolKind::LocalVar)
                .map(|sym| (sym.name.clone(), sym.ty))
                .collect(),
            None => Vec::new(),
        };
        if locals.is_empty() {
            for &stmt in stmts {
                self.emit_stmt(stmt)?;
            }
            return Ok(());
        }

        self.stack_vars.push_frame();
        let saved_offset = self.bp_offset;
        for (name, ty) in &locals {
            self.stack_vars.set(name, self.bp_offset);
            self.bp_offset += self.footprint(*ty);
        }
        let frame_words = self.quarter(words(self.bp_offset - saved_offset))?;

        self.code.emit_op(Opcode::Pushn, line)?;
        self.code.emit_quarter(frame_words)?;

        for &stmt in stmts {
            self.emit_stmt(stmt)?;
        }

        self.code.emit_op(Opcode::Popn, line)?;
        self.code.emit_quarter(frame_words)?;

        self.stack_vars.pop_frame();
        self.bp_offset = saved_offset;
        Ok(())
    }

    /* Functions */

    fn emit_func(&mut self, func: &Func, is_main: bool) -> Result<(), CompileError> {
        let TypeInfo::Func { params, ret, .. } = self.func_type(&func.name)? else {
            return Err(CompileError::UnknownFunction(func.name.clone()));
        };
        trace!(
            "emitting function `{}` at offset {}",
            func.name,
            self.code.offset()
        );
        self.functions
            .insert(func.name.clone(), self.code.offset());

        self.stack_vars.clear();
        self.stack_vars.push_frame();
        self.bp_offset = 0;

        let params_space: i64 = params.iter().map(|&p| self.footprint(p)).sum();
        let ret_space = self.footprint(*ret);
        // Two words for the saved base pointer and the return address.
        let below_bp = 2 * crate::isa::WORD_SIZE as i64 + params_space + ret_space;
        self.quarter(-below_bp)?;

        let mut offset = -below_bp;
        if *ret != Types::VOID {
            self.stack_vars.set(RETURN_SLOT, offset);
        }
        offset += ret_space;
        for (param, &ty) in func.params.iter().zip(params.iter()) {
            self.stack_vars.set(&param.name, offset);
            offset += self.footprint(ty);
        }

        self.code.emit_op(Opcode::Funcpro, NO_LINE)?;
        self.emit_stmt(func.body)?;
        let epilogue = if is_main { Opcode::Exit } else { Opcode::Ret };
        self.code.emit_op(epilogue, NO_LINE)?;

        self.stack_vars.clear();
        Ok(())
    }

    /// Rewrites every recorded call-site immediate with the now-known entry
    /// offset of its target.
    fn resolve_patches(&mut self) -> Result<(), CompileError> {
        for (imm_at, name) in self.patches.drain(..) {
            let &entry = self
                .functions
                .get(&name)
                .ok_or(CompileError::UnknownFunction(name))?;
            self.code.patch_word(imm_at, Word::from(entry));
        }
        Ok(())
    }
}

/// Names of every function transitively reachable from `expr` through
/// direct calls, following spliced literals instead of resolved calls.
fn callee_closure(ast: &Ast, expr: ExprId) -> HashSet<String> {
    fn walk_expr(ast: &Ast, id: ExprId, out: &mut Vec<String>) {
        match &ast.expr(id).kind {
            ExprKind::Num(_) | ExprKind::Bool(_) | ExprKind::Ident { .. } => {}
            ExprKind::Unary { operand, .. } => walk_expr(ast, *operand, out),
            ExprKind::Binary { left, right, .. } => {
                walk_expr(ast, *left, out);
                walk_expr(ast, *right, out);
            }
            ExprKind::Member { object, .. } => walk_expr(ast, *object, out),
            ExprKind::Index { base, index } => {
                walk_expr(ast, *base, out);
                walk_expr(ast, *index, out);
            }
            ExprKind::Call {
                name,
                args,
                comptime,
                resolved,
            } => {
                if let Some(lit) = resolved {
                    walk_expr(ast, *lit, out);
                    return;
                }
                if !comptime {
                    out.push(name.clone());
                }
                for &arg in args {
                    walk_expr(ast, arg, out);
                }
            }
        }
    }

    fn walk_stmt(ast: &Ast, id: StmtId, out: &mut Vec<String>) {
        match &ast.stmt(id).kind {
            StmtKind::Block { stmts, .. } => {
                for &stmt in stmts {
                    walk_stmt(ast, stmt, out);
                }
            }
            StmtKind::If { cond, then, els } => {
                walk_expr(ast, *cond, out);
                walk_stmt(ast, *then, out);
                if let Some(els) = els {
                    walk_stmt(ast, *els, out);
                }
            }
            StmtKind::While { cond, body } => {
                walk_expr(ast, *cond, out);
                walk_stmt(ast, *body, out);
            }
            StmtKind::Return(Some(expr)) | StmtKind::Expr(expr) => walk_expr(ast, *expr, out),
            StmtKind::Print(args) => {
                for &arg in args {
                    walk_expr(ast, arg, out);
                }
            }
            StmtKind::Assign { target, value } => {
                walk_expr(ast, *target, out);
                walk_expr(ast, *value, out);
            }
            StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => {}
        }
    }

    let mut reachable = HashSet::new();
    let mut pending = Vec::new();
    walk_expr(ast, expr, &mut pending);
    while let Some(name) = pending.pop() {
        if !reachable.insert(name.clone()) {
            continue;
        }
        if let Some(func) = ast.funcs.iter().find(|f| f.name == name) {
            walk_stmt(ast, func.body, &mut pending);
        }
    }
    reachable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{check::analyze, isa::Operand, parser::parse};

    fn compile_source(source: &str) -> Result<Bytecode, CompileError> {
        let mut ast = parse(source).expect("test source parses");
        let analysis = analyze(&mut ast).expect("test source checks");
        compile_program(&analysis.types, &analysis.symbols, &ast)
    }

    fn opcodes(code: &Bytecode) -> Vec<(Opcode, Operand)> {
        code.instructions()
            .map(|i| i.expect("image decodes"))
            .map(|i| (i.opcode, i.operand))
            .collect()
    }

    #[test]
    fn lowers_literal_arithmetic_right_then_left() {
        let code = compile_source("func main() begin print 2 + 3 * 4 end").unwrap();
        let body: Vec<_> = opcodes(&code);
        // Globals reservation, prologue, then right-to-left operands.
        assert_eq!(
            body,
            vec![
                (Opcode::Pushn, Operand::Quarter(0)),
                (Opcode::Funcpro, Operand::None),
                (Opcode::Li, Operand::Word(4)),
                (Opcode::Li, Operand::Word(3)),
                (Opcode::Mul, Operand::None),
                (Opcode::Li, Operand::Word(2)),
                (Opcode::Add, Operand::None),
                (Opcode::Print, Operand::Byte(1)),
                (Opcode::Exit, Operand::None),
            ]
        );
    }

    #[test]
    fn first_local_sits_at_base_pointer() {
        let code = compile_source(
            "func main() begin var x: int\nx := 7\nprint x end",
        )
        .unwrap();
        let body = opcodes(&code);
        assert!(body.contains(&(Opcode::Stbp, Operand::Quarter(0))));
        assert!(body.contains(&(Opcode::Ldbp, Operand::Quarter(0))));
    }

    #[test]
    fn block_reserve_and_release_agree() {
        let code = compile_source(
            "func main() begin\n\
             var a: int, b: bool\n\
             begin var c: int\nc := 1 end\n\
             a := 2\n\
             end",
        )
        .unwrap();
        let pushes: Vec<_> = opcodes(&code)
            .into_iter()
            .filter(|(op, _)| matches!(op, Opcode::Pushn | Opcode::Popn))
            .collect();
        // Globals, outer block (2 words, bool padded), inner block (1 word).
        assert_eq!(
            pushes,
            vec![
                (Opcode::Pushn, Operand::Quarter(0)),
                (Opcode::Pushn, Operand::Quarter(2)),
                (Opcode::Pushn, Operand::Quarter(1)),
                (Opcode::Popn, Operand::Quarter(1)),
                (Opcode::Popn, Operand::Quarter(2)),
            ]
        );
    }

    #[test]
    fn word_return_frame_is_three_words_below_bp() {
        let code = compile_source(
            "func seven(): int begin return 7 end\n\
             func main() begin print seven() end",
        )
        .unwrap();
        // Old bp + return address + the return slot itself: -24.
        assert!(opcodes(&code).contains(&(Opcode::Stbp, Operand::Quarter(-24))));
    }

    #[test]
    fn forward_call_is_patched_to_function_entry() {
        let code = compile_source(
            "func main() begin print seven() end\n\
             func seven(): int begin return 7 end",
        )
        .unwrap();
        let instructions: Vec<_> = code.instructions().map(|i| i.unwrap()).collect();
        // `seven` begins right after main's EXIT.
        let entry = instructions
            .iter()
            .find(|i| i.opcode == Opcode::Exit)
            .map(|i| i.offset + 1)
            .unwrap();
        let call_target = instructions
            .iter()
            .zip(instructions.iter().skip(1))
            .find(|(_, next)| next.opcode == Opcode::Call)
            .map(|(li, _)| li.operand)
            .unwrap();
        assert_eq!(call_target, Operand::Word(Word::from(entry)));
        assert_eq!(
            instructions[instructions.len() - 1].opcode,
            Opcode::Ret
        );
    }

    #[test]
    fn global_struct_member_collapses_to_one_store() {
        let code = compile_source(
            "var s: Pair\n\
             struct Pair begin a: int, b: int end\n\
             func main() begin s.b := 9\nprint s.b end",
        )
        .unwrap();
        let body = opcodes(&code);
        assert!(body.contains(&(Opcode::Sta, Operand::Word(8))));
        assert!(body.contains(&(Opcode::Lda, Operand::Word(8))));
        // One instruction per access: no address arithmetic emitted.
        assert!(!body.iter().any(|(op, _)| *op == Opcode::Add));
    }

    #[test]
    fn array_indexing_goes_through_computed_addresses() {
        let code = compile_source(
            "var a: int[10]\n\
             func main() begin a[3] := 5\nprint a[3] end",
        )
        .unwrap();
        let body = opcodes(&code);
        assert!(body.contains(&(Opcode::Sti, Operand::None)));
        assert!(body.contains(&(Opcode::Ldi, Operand::None)));
        // Index scaled by the word-aligned element size.
        assert!(body.contains(&(Opcode::Li, Operand::Word(8))));
        // Ten words of globals were reserved up front.
        assert_eq!(body[0], (Opcode::Pushn, Operand::Quarter(10)));
    }

    #[test]
    fn enum_constant_lowered_to_ordinal() {
        let code = compile_source(
            "enum Color begin Red, Green, Blue end\n\
             func main() begin print Color.Blue end",
        )
        .unwrap();
        assert!(opcodes(&code).contains(&(Opcode::Li, Operand::Word(2))));
    }

    fn nested_loops(depth: usize) -> String {
        let mut body = String::from("print 0\n");
        for _ in 0..depth {
            body = format!("while 0 do begin\n{body}end\n");
        }
        format!("func main() begin\n{body}end")
    }

    #[test]
    fn loop_nesting_boundary_is_exactly_128() {
        assert!(compile_source(&nested_loops(MAX_LOOP_DEPTH)).is_ok());
        assert_matches::assert_matches!(
            compile_source(&nested_loops(MAX_LOOP_DEPTH + 1)),
            Err(CompileError::LoopDepthExceeded { .. })
        );
    }

    #[test]
    fn compilation_is_deterministic() {
        let source = "var g: int\n\
                      func helper(n: int): int begin return n + g end\n\
                      func main() begin g := 2\nprint helper(40) end";
        let first = compile_source(source).unwrap();
        let second = compile_source(source).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn comptime_image_contains_only_the_callee_closure() {
        let source = "func fib(n: int): int begin\n\
                      if n < 2 then return n\n\
                      return fib(n - 1) + fib(n - 2)\n\
                      end\n\
                      func unrelated(): int begin return 99 end\n\
                      func main() begin print @call(fib(10)) end";
        let mut ast = parse(source).unwrap();
        let analysis = analyze(&mut ast).unwrap();
        let call = ast.comptime_calls[0];
        let image = compile_call(&analysis.types, &analysis.symbols, &ast, call).unwrap();
        // One FUNCPRO: `fib` only, `unrelated` and `main` are not emitted.
        let prologues = image
            .instructions()
            .filter(|i| i.as_ref().unwrap().opcode == Opcode::Funcpro)
            .count();
        assert_eq!(prologues, 1);
    }
}
