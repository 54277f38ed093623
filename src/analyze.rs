use crate::ast::{Ast, InfixOp, Node, NodeId};
use crate::lang::Kind;
use indexmap::IndexMap;
use std::collections::HashMap;

// =============================================================================
// Semantic analysis - per-node kind inference
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Symbol {
    pub slot: u16,
    pub kind: Kind,
}

/// Name → slot index + declared kind.
///
/// Declaration assigns each new name the next free slot; re-declaration
/// reuses the slot and overwrites the kind (an assignment propagates its
/// right-hand side's kind here). The table outlives a single compile so a
/// REPL host keeps slot bindings across lines.
#[derive(Debug, Default)]
pub struct SymbolTable {
    names: IndexMap<String, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    pub fn declare(&mut self, name: &str, kind: Kind) -> u16 {
        match self.names.get_mut(name) {
            Some(symbol) => {
                symbol.kind = kind;
                symbol.slot
            }
            None => {
                let slot = self.names.len() as u16;
                self.names.insert(name.to_string(), Symbol { slot, kind });
                slot
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Symbol> {
        self.names.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Infers, for every AST node, the kind of value its compiled form pushes.
///
/// Results are memoized by node identity (the arena id), so repeated calls
/// on the same node return the cached kind without re-deriving it. The
/// cache must be cleared between independent compiles; node ids are arena
/// positions and would otherwise alias across unrelated ASTs.
#[derive(Debug, Default)]
pub struct Analyzer {
    cache: HashMap<NodeId, Kind>,
}

impl Analyzer {
    pub fn new() -> Self {
        Analyzer::default()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    #[cfg(test)]
    pub fn cached(&self, id: NodeId) -> Option<Kind> {
        self.cache.get(&id).copied()
    }

    /// Infer the kind `id` evaluates to, or `None` when inference fails.
    /// Failures are not cached; the compiler treats them as fatal anyway.
    pub fn analyze(&mut self, ast: &Ast, id: NodeId, symbols: &mut SymbolTable) -> Option<Kind> {
        if let Some(kind) = self.cache.get(&id) {
            return Some(*kind);
        }
        let kind = self.infer(ast, id, symbols)?;
        self.cache.insert(id, kind);
        Some(kind)
    }

    fn infer(&mut self, ast: &Ast, id: NodeId, symbols: &mut SymbolTable) -> Option<Kind> {
        match ast.node(id) {
            // Statements evaluate to nothing; traversal still recurses so
            // nested expressions pick up cached kinds as a side effect.
            Node::Program(stmts) | Node::Block(stmts) => {
                for stmt in stmts {
                    self.analyze(ast, *stmt, symbols);
                }
                Some(Kind::Void)
            }
            Node::Empty => Some(Kind::Void),
            Node::ExprStmt(expr) => {
                self.analyze(ast, *expr, symbols);
                Some(Kind::Void)
            }
            Node::VarDecl { name, init } => {
                let kind = match init {
                    Some(expr) => self.analyze(ast, *expr, symbols)?,
                    None => Kind::Void,
                };
                symbols.declare(name, kind);
                Some(Kind::Void)
            }

            Node::Bool(_) => Some(Kind::Bool),
            Node::Str(_) => Some(Kind::Str),
            Node::Null => Some(Kind::Object),
            Node::Undefined => Some(Kind::Void),
            Node::Number { text, value } => Some(number_kind(text, *value)),

            Node::Prefix { operand, .. } => match self.analyze(ast, *operand, symbols)? {
                Kind::Bool => Some(Kind::Int32),
                Kind::Int32 => Some(Kind::Int32),
                Kind::Float64 => Some(Kind::Float64),
                // Strings are coerced to number before the sign applies.
                Kind::Str => Some(Kind::Float64),
                _ => None,
            },

            Node::Infix { op, left, right } => {
                let lk = self.analyze(ast, *left, symbols)?;
                let rk = self.analyze(ast, *right, symbols)?;
                Some(infix_kind(*op, lk, rk))
            }

            Node::Assign { target, value } => {
                let Node::Ident(name) = ast.node(*target) else {
                    return None;
                };
                let kind = self.analyze(ast, *value, symbols)?;
                symbols.declare(name, kind);
                // Cache the target identifier too; the compiler asks for it.
                self.cache.insert(*target, kind);
                Some(kind)
            }

            Node::Ident(name) => {
                let symbol = symbols.lookup(name)?;
                Some(symbol.kind)
            }
        }
    }
}

/// Kind of a number literal: int32 unless the spelling contains `.` or an
/// exponent marker, or the value does not round-trip losslessly through a
/// 32-bit signed integer.
fn number_kind(text: &str, value: f64) -> Kind {
    if text.contains(['.', 'e', 'E']) {
        return Kind::Float64;
    }
    if (value as i32) as f64 == value {
        Kind::Int32
    } else {
        Kind::Float64
    }
}

/// Result-kind promotion for infix operators.
fn infix_kind(op: InfixOp, left: Kind, right: Kind) -> Kind {
    match op {
        // Concatenation dominates numeric addition.
        InfixOp::Add => {
            if left == Kind::Str || right == Kind::Str {
                Kind::Str
            } else if left == Kind::Float64 || right == Kind::Float64 {
                Kind::Float64
            } else {
                Kind::Int32
            }
        }
        // No distinct integer-division opcode; both promote to float.
        InfixOp::Div | InfixOp::Rem => Kind::Float64,
        _ => {
            if left == Kind::Int32 && right == Kind::Int32 {
                Kind::Int32
            } else {
                Kind::Float64
            }
        }
    }
}
