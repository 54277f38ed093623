//! Arena-allocated AST.
//!
//! Nodes live in a flat vector owned by [`Ast`]; a [`NodeId`] is the node
//! handle. Node identity (the id, not structural equality) is what the
//! semantic analyzer keys its memo cache on, so two structurally identical
//! nodes are analyzed independently.

/// Handle to a node in an [`Ast`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOp {
    Plus,
    Minus,
}

impl PrefixOp {
    pub fn symbol(self) -> &'static str {
        match self {
            PrefixOp::Plus => "+",
            PrefixOp::Minus => "-",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl InfixOp {
    pub fn symbol(self) -> &'static str {
        match self {
            InfixOp::Add => "+",
            InfixOp::Sub => "-",
            InfixOp::Mul => "*",
            InfixOp::Div => "/",
            InfixOp::Rem => "%",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Ordered sequence of top-level statements.
    Program(Vec<NodeId>),

    /// `{ ... }` statement sequence with its own lexical scope.
    Block(Vec<NodeId>),

    /// Bare `;`.
    Empty,

    /// A statement wrapping one expression.
    ExprStmt(NodeId),

    /// `var name;` or `var name = init;`
    VarDecl { name: String, init: Option<NodeId> },

    Prefix { op: PrefixOp, operand: NodeId },

    Infix { op: InfixOp, left: NodeId, right: NodeId },

    /// `target = value`; the target must resolve to an identifier.
    Assign { target: NodeId, value: NodeId },

    // Literals
    Null,
    Undefined,
    Bool(bool),

    /// Number literal with its exact source spelling; the analyzer's
    /// int32/float64 classification reads the text.
    Number { text: String, value: f64 },

    Str(String),
    Ident(String),
}

/// Node arena. Immutable once the parser hands it over.
#[derive(Debug, Default)]
pub struct Ast {
    nodes: Vec<Node>,
    root: Option<NodeId>,
}

impl Ast {
    pub fn new() -> Self {
        Ast::default()
    }

    pub fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn set_root(&mut self, id: NodeId) {
        self.root = Some(id);
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Human-readable description of a node, for error messages.
    pub fn describe(&self, id: NodeId) -> String {
        match self.node(id) {
            Node::Program(_) => "program".to_string(),
            Node::Block(_) => "block statement".to_string(),
            Node::Empty => "empty statement".to_string(),
            Node::ExprStmt(_) => "expression statement".to_string(),
            Node::VarDecl { name, .. } => format!("declaration of '{}'", name),
            Node::Prefix { op, .. } => format!("prefix '{}'", op.symbol()),
            Node::Infix { op, .. } => format!("infix '{}'", op.symbol()),
            Node::Assign { .. } => "assignment".to_string(),
            Node::Null => "'null'".to_string(),
            Node::Undefined => "'undefined'".to_string(),
            Node::Bool(b) => format!("bool literal '{}'", b),
            Node::Number { text, .. } => format!("number literal '{}'", text),
            Node::Str(s) => format!("string literal {:?}", s),
            Node::Ident(name) => format!("identifier '{}'", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_assigns_sequential_ids() {
        let mut ast = Ast::new();
        let a = ast.push(Node::Bool(true));
        let b = ast.push(Node::Bool(false));
        assert_ne!(a, b);
        assert_eq!(ast.node(a), &Node::Bool(true));
        assert_eq!(ast.node(b), &Node::Bool(false));
        assert_eq!(ast.len(), 2);
    }

    #[test]
    fn identical_nodes_have_distinct_ids() {
        let mut ast = Ast::new();
        let a = ast.push(Node::Null);
        let b = ast.push(Node::Null);
        assert_eq!(ast.node(a), ast.node(b));
        assert_ne!(a, b);
    }

    #[test]
    fn describe_nodes() {
        let mut ast = Ast::new();
        let n = ast.push(Node::Number {
            text: "1.5".to_string(),
            value: 1.5,
        });
        let lhs = ast.push(Node::Ident("x".to_string()));
        let infix = ast.push(Node::Infix {
            op: InfixOp::Add,
            left: lhs,
            right: n,
        });
        assert_eq!(ast.describe(n), "number literal '1.5'");
        assert_eq!(ast.describe(infix), "infix '+'");
    }
}
