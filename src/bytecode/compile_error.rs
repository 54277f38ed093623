use crate::lang::Kind;

#[derive(Debug, Clone)]
pub enum CompileError {
    /// A node the compiler has no emission rule for.
    UnsupportedNode { what: String },
    /// An operator with no opcode for the resolved kind pair.
    UnsupportedOperator { op: String, left: Kind, right: Kind },
    /// No conversion path exists between two kinds.
    NoCastPath { from: Kind, to: Kind },
    /// An identifier read before any declaration or assignment.
    UndefinedName { name: String },
    /// The analyzer could not assign a kind.
    Inference { what: String },
}

impl CompileError {
    pub fn unsupported_node(what: impl Into<String>) -> Self {
        CompileError::UnsupportedNode { what: what.into() }
    }

    pub fn unsupported_operator(op: impl Into<String>, left: Kind, right: Kind) -> Self {
        CompileError::UnsupportedOperator {
            op: op.into(),
            left,
            right,
        }
    }

    pub fn no_cast_path(from: Kind, to: Kind) -> Self {
        CompileError::NoCastPath { from, to }
    }

    pub fn undefined_name(name: impl Into<String>) -> Self {
        CompileError::UndefinedName { name: name.into() }
    }

    pub fn inference(what: impl Into<String>) -> Self {
        CompileError::Inference { what: what.into() }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::UnsupportedNode { what } => {
                write!(f, "compile error: cannot compile {}", what)
            }
            CompileError::UnsupportedOperator { op, left, right } => {
                write!(
                    f,
                    "compile error: operator '{}' is not defined for {} and {}",
                    op, left, right
                )
            }
            CompileError::NoCastPath { from, to } => {
                write!(f, "compile error: no conversion from {} to {}", from, to)
            }
            CompileError::UndefinedName { name } => {
                write!(f, "compile error: '{}' is not defined", name)?;
                write!(f, "\n  hint: declare it first, e.g. var {} = ...", name)
            }
            CompileError::Inference { what } => {
                write!(f, "compile error: cannot infer a value kind for {}", what)
            }
        }
    }
}

impl std::error::Error for CompileError {}
