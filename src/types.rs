//! Types, symbols and scope tables.
//!
//! Types are interned into a [`Types`] table and referenced by [`TypeId`].
//! Symbols live in a flat [`SymbolTable`] organised into a tree of scopes:
//! the root scope holds type names, functions and globals, each function owns
//! a parameter scope, and each block owns a scope for its locals.

use std::collections::HashMap;

use crate::isa::{word_align, WORD_SIZE};

macro_rules! table_id {
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

table_id!(TypeId);
table_id!(SymbolId);
table_id!(ScopeId);

/// A member of a struct type with its resolved byte offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructMember {
    pub name: String,
    pub ty: TypeId,
    /// Byte offset within the struct; members are packed word-granular.
    pub offset: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeInfo {
    /// 64-bit signed integer.
    Int,
    Bool,
    /// The absent result type of functions that return nothing.
    Void,
    Struct {
        name: String,
        members: Vec<StructMember>,
    },
    Enum {
        name: String,
        members: Vec<String>,
    },
    Func {
        params: Vec<TypeId>,
        ret: TypeId,
        /// Compile-time-only functions never reach whole-program emission.
        comptime: bool,
    },
    Array {
        elem: TypeId,
        len: i64,
    },
}

/// The type interner.
#[derive(Debug)]
pub struct Types {
    infos: Vec<TypeInfo>,
    /// Struct and enum types addressable by name.
    named: HashMap<String, TypeId>,
}

impl Types {
    pub const INT: TypeId = TypeId(0);
    pub const BOOL: TypeId = TypeId(1);
    pub const VOID: TypeId = TypeId(2);

    pub fn new() -> Self {
        Types {
            infos: vec![TypeInfo::Int, TypeInfo::Bool, TypeInfo::Void],
            named: HashMap::new(),
        }
    }

    pub fn info(&self, id: TypeId) -> &TypeInfo {
        &self.infos[id.index()]
    }

    pub fn add(&mut self, info: TypeInfo) -> TypeId {
        let id = TypeId(self.infos.len() as u32);
        self.infos.push(info);
        id
    }

    /// Registers a struct or enum type under its declared name.
    pub fn add_named(&mut self, name: &str, info: TypeInfo) -> TypeId {
        let id = self.add(info);
        self.named.insert(name.to_owned(), id);
        id
    }

    pub fn lookup_named(&self, name: &str) -> Option<TypeId> {
        match name {
            "int" => Some(Self::INT),
            "bool" => Some(Self::BOOL),
            _ => self.named.get(name).copied(),
        }
    }

    /// Replaces a previously added placeholder. Used while resolving struct
    /// members that refer to types declared later in the file.
    pub fn replace(&mut self, id: TypeId, info: TypeInfo) {
        self.infos[id.index()] = info;
    }

    /// The storage footprint of a value of this type in bytes.
    ///
    /// Every scalar field of an aggregate is rounded up to a full word, so
    /// struct and array footprints are always word multiples.
    pub fn byte_size(&self, id: TypeId) -> i64 {
        match self.info(id) {
            TypeInfo::Int => WORD_SIZE as i64,
            TypeInfo::Bool => 1,
            TypeInfo::Void => 0,
            TypeInfo::Enum { .. } => WORD_SIZE as i64,
            TypeInfo::Struct { members, .. } => members
                .iter()
                .map(|m| word_align(self.byte_size(m.ty)))
                .sum(),
            TypeInfo::Array { elem, len } => len * word_align(self.byte_size(*elem)),
            TypeInfo::Func { .. } => 0,
        }
    }

    /// Whether a value of this type occupies a single stack slot.
    pub fn is_scalar(&self, id: TypeId) -> bool {
        matches!(
            self.info(id),
            TypeInfo::Int | TypeInfo::Bool | TypeInfo::Enum { .. }
        )
    }

    /// Human-readable type name for diagnostics.
    pub fn display(&self, id: TypeId) -> String {
        match self.info(id) {
            TypeInfo::Int => "int".to_owned(),
            TypeInfo::Bool => "bool".to_owned(),
            TypeInfo::Void => "void".to_owned(),
            TypeInfo::Struct { name, .. } | TypeInfo::Enum { name, .. } => name.clone(),
            TypeInfo::Func { .. } => "function".to_owned(),
            TypeInfo::Array { elem, len } => format!("{}[{len}]", self.display(*elem)),
        }
    }
}

impl Default for Types {
    fn default() -> Self {
        Types::new()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    Type,
    Func,
    GlobalVar,
    LocalVar,
    Param,
}

#[derive(Clone, Debug)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub name: String,
    pub ty: TypeId,
    pub line: i64,
}

/// One lexical scope: an ordered list of symbols plus a by-name index.
#[derive(Debug, Default)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    /// Symbols in declaration order; the translator relies on this order
    /// when assigning stack slots.
    pub symbols: Vec<SymbolId>,
    by_name: HashMap<String, SymbolId>,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    scopes: Vec<Scope>,
}

impl SymbolTable {
    /// Creates the table with an empty root scope.
    pub fn new() -> Self {
        SymbolTable {
            symbols: Vec::new(),
            scopes: vec![Scope::default()],
        }
    }

    pub const ROOT: ScopeId = ScopeId(0);

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.index()]
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    pub fn push_scope(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            parent: Some(parent),
            ..Scope::default()
        });
        id
    }

    /// Declares a symbol in `scope`. Returns the shadowed symbol if the name
    /// was already declared in that same scope.
    pub fn declare(
        &mut self,
        scope: ScopeId,
        symbol: Symbol,
    ) -> Result<SymbolId, SymbolId> {
        if let Some(&existing) = self.scopes[scope.index()].by_name.get(&symbol.name) {
            return Err(existing);
        }
        let id = SymbolId(self.symbols.len() as u32);
        let name = symbol.name.clone();
        self.symbols.push(symbol);
        let scope = &mut self.scopes[scope.index()];
        scope.symbols.push(id);
        scope.by_name.insert(name, id);
        Ok(id)
    }

    /// Resolves `name` by walking from `scope` outwards to the root.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let scope = self.scope(id);
            if let Some(&sym) = scope.by_name.get(name) {
                return Some(sym);
            }
            current = scope.parent;
        }
        None
    }

    /// Resolves `name` in the root scope only.
    pub fn lookup_root(&self, name: &str) -> Option<SymbolId> {
        self.scope(Self::ROOT).by_name.get(name).copied()
    }
}
