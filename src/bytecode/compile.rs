use crate::analyze::{Analyzer, SymbolTable};
use crate::ast::{Ast, InfixOp, Node, NodeId, PrefixOp};
use crate::bytecode::casts::cast;
use crate::bytecode::{Bytecode, CompileError, Opcode};
use crate::lang::Kind;
use indexmap::IndexMap;
use tracing::debug;

// =============================================================================
// Compiler - type-directed AST → bytecode lowering
// =============================================================================

/// Single-pass compiler. For every expression node it asks the analyzer
/// for the node's own inferred kind and each child's kind, compiles the
/// children, and inserts casts from each child's kind to the operation's
/// required operand kind before emitting the operator. Every opcode
/// therefore observes operands of exactly one kind and the VM never
/// dispatches on runtime types.
///
/// The symbol table persists across compiles (a REPL host relies on slot
/// continuity); the analyzer's node cache is cleared after every compile.
pub struct Compiler {
    analyzer: Analyzer,
    symbols: SymbolTable,

    /// Literal → (offset, length) in the pool of the current compile;
    /// duplicate string literals share one stored byte run.
    interned: IndexMap<String, (u64, u64)>,
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Compiler {
            analyzer: Analyzer::new(),
            symbols: SymbolTable::new(),
            interned: IndexMap::new(),
        }
    }

    pub fn compile(&mut self, ast: &Ast) -> Result<Bytecode, CompileError> {
        self.interned.clear();
        let mut bc = Bytecode::new();

        let result = match ast.root() {
            Some(root) => self.compile_node(ast, root, &mut bc),
            None => Ok(()),
        };
        // The cache is keyed by arena position; keeping it would leak
        // stale kinds into the next compile's unrelated nodes.
        self.analyzer.clear();
        result?;

        debug!(
            code_bytes = bc.code.len(),
            const_bytes = bc.consts.len(),
            slots = self.symbols.len(),
            "compiled program"
        );
        Ok(bc)
    }

    fn analyze(&mut self, ast: &Ast, id: NodeId) -> Result<Kind, CompileError> {
        self.analyzer
            .analyze(ast, id, &mut self.symbols)
            .ok_or_else(|| CompileError::inference(ast.describe(id)))
    }

    fn compile_node(&mut self, ast: &Ast, id: NodeId, bc: &mut Bytecode) -> Result<(), CompileError> {
        match ast.node(id) {
            Node::Program(stmts) | Node::Block(stmts) => {
                for stmt in stmts {
                    self.compile_node(ast, *stmt, bc)?;
                }
            }

            Node::Empty => {}

            Node::ExprStmt(expr) => {
                self.compile_node(ast, *expr, bc)?;
                // Keep the stack balanced across statements.
                bc.emit(Opcode::Pop, &[]);
            }

            Node::VarDecl { name, init } => {
                let kind = match init {
                    Some(expr) => {
                        let kind = self.analyze(ast, *expr)?;
                        self.compile_node(ast, *expr, bc)?;
                        kind
                    }
                    None => {
                        bc.emit(Opcode::UndefLoad, &[]);
                        Kind::Void
                    }
                };
                let slot = self.symbols.declare(name, kind);
                bc.emit(Opcode::SStore, &[slot as u64]);
            }

            Node::Bool(b) => {
                bc.emit(Opcode::BoolLoad, &[*b as u64]);
            }

            Node::Number { text, value } => self.compile_number(ast, id, text, *value, bc)?,

            Node::Str(s) => {
                let (offset, len) = self.intern(bc, s);
                bc.emit(Opcode::StrLoad, &[offset, len]);
            }

            Node::Null => {
                bc.emit(Opcode::NullLoad, &[]);
            }

            Node::Undefined => {
                bc.emit(Opcode::UndefLoad, &[]);
            }

            Node::Ident(name) => {
                let symbol = self
                    .symbols
                    .lookup(name)
                    .ok_or_else(|| CompileError::undefined_name(name))?;
                bc.emit(Opcode::SLoad, &[symbol.slot as u64]);
            }

            Node::Prefix { op, operand } => {
                let result = self.analyze(ast, id)?;
                let operand_kind = self.analyze(ast, *operand)?;

                self.compile_node(ast, *operand, bc)?;
                self.emit_cast(bc, operand_kind, result)?;

                // `-x` lowers to a multiply by the -1 literal of the result
                // kind; `+x` is spent once the operand is coerced.
                if *op == PrefixOp::Minus {
                    match result {
                        Kind::Int32 => {
                            bc.emit(Opcode::I32Load, &[(-1i32) as u32 as u64]);
                            bc.emit(Opcode::I32Mul, &[]);
                        }
                        Kind::Float64 => {
                            bc.emit(Opcode::F64Load, &[(-1.0f64).to_bits()]);
                            bc.emit(Opcode::F64Mul, &[]);
                        }
                        other => {
                            return Err(CompileError::unsupported_operator(
                                op.symbol(),
                                other,
                                other,
                            ));
                        }
                    }
                }
            }

            Node::Infix { op, left, right } => {
                // The result kind picks the opcode family; both operands
                // are coerced to it.
                let result = self.analyze(ast, id)?;
                let left_kind = self.analyze(ast, *left)?;
                let right_kind = self.analyze(ast, *right)?;

                self.compile_node(ast, *left, bc)?;
                self.emit_cast(bc, left_kind, result)?;
                self.compile_node(ast, *right, bc)?;
                self.emit_cast(bc, right_kind, result)?;

                let opcode = infix_opcode(*op, result).ok_or_else(|| {
                    CompileError::unsupported_operator(op.symbol(), left_kind, right_kind)
                })?;
                bc.emit(opcode, &[]);
            }

            Node::Assign { target, value } => {
                let Node::Ident(name) = ast.node(*target) else {
                    return Err(CompileError::unsupported_node(format!(
                        "assignment to {}",
                        ast.describe(*target)
                    )));
                };
                // Analyzing the assignment also propagates the value's
                // kind to the identifier's slot.
                self.analyze(ast, id)?;
                let name = name.clone();

                self.compile_node(ast, *value, bc)?;
                let slot = self
                    .symbols
                    .lookup(&name)
                    .ok_or_else(|| CompileError::undefined_name(&name))?
                    .slot;
                // Assignment is an expression yielding the stored value:
                // store, then re-load the slot.
                bc.emit(Opcode::SStore, &[slot as u64]);
                bc.emit(Opcode::SLoad, &[slot as u64]);
            }
        }

        Ok(())
    }

    fn compile_number(
        &mut self,
        ast: &Ast,
        id: NodeId,
        text: &str,
        value: f64,
        bc: &mut Bytecode,
    ) -> Result<(), CompileError> {
        // The special spellings bypass literal classification and load
        // their IEEE-754 values directly.
        if text == "NaN" {
            bc.emit(Opcode::F64Load, &[f64::NAN.to_bits()]);
            return Ok(());
        }
        if text == "Infinity" {
            bc.emit(Opcode::F64Load, &[f64::INFINITY.to_bits()]);
            return Ok(());
        }

        match self.analyze(ast, id)? {
            Kind::Int32 => {
                bc.emit(Opcode::I32Load, &[(value as i32) as u32 as u64]);
            }
            Kind::Float64 => {
                bc.emit(Opcode::F64Load, &[value.to_bits()]);
            }
            other => {
                return Err(CompileError::inference(format!(
                    "number literal '{}' of kind {}",
                    text, other
                )));
            }
        }
        Ok(())
    }

    fn emit_cast(&mut self, bc: &mut Bytecode, from: Kind, to: Kind) -> Result<(), CompileError> {
        for op in cast(from, to)? {
            bc.emit(op, &[]);
        }
        Ok(())
    }

    /// Store a string literal in the constant pool, reusing an earlier run
    /// for duplicate literals. The stored run is NUL-terminated for the
    /// disassembler's benefit; the returned length excludes the terminator.
    fn intern(&mut self, bc: &mut Bytecode, s: &str) -> (u64, u64) {
        if let Some(entry) = self.interned.get(s) {
            return *entry;
        }
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        let offset = bc.store(&bytes) as u64;
        let entry = (offset, s.len() as u64);
        self.interned.insert(s.to_string(), entry);
        entry
    }
}

/// Opcode for an infix operator dispatched on the analyzed result kind.
fn infix_opcode(op: InfixOp, result: Kind) -> Option<Opcode> {
    match (result, op) {
        (Kind::Int32, InfixOp::Add) => Some(Opcode::I32Add),
        (Kind::Int32, InfixOp::Sub) => Some(Opcode::I32Sub),
        (Kind::Int32, InfixOp::Mul) => Some(Opcode::I32Mul),
        (Kind::Float64, InfixOp::Add) => Some(Opcode::F64Add),
        (Kind::Float64, InfixOp::Sub) => Some(Opcode::F64Sub),
        (Kind::Float64, InfixOp::Mul) => Some(Opcode::F64Mul),
        (Kind::Float64, InfixOp::Div) => Some(Opcode::F64Div),
        (Kind::Float64, InfixOp::Rem) => Some(Opcode::F64Rem),
        (Kind::Str, InfixOp::Add) => Some(Opcode::StrAdd),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> Ast {
        let tokens = Lexer::new(source).tokenize().expect("lexing should succeed");
        Parser::new(tokens).parse().expect("parsing should succeed")
    }

    fn compile(source: &str) -> Bytecode {
        Compiler::new()
            .compile(&parse(source))
            .expect("compilation should succeed")
    }

    fn compile_err(source: &str) -> CompileError {
        Compiler::new().compile(&parse(source)).unwrap_err()
    }

    fn ops(bc: &Bytecode) -> Vec<Opcode> {
        bc.instrs().iter().map(|i| i.op).collect()
    }

    // =========================================================================
    // Kind-pair scenarios
    // =========================================================================

    #[test]
    fn int_plus_int() {
        let bc = compile("1 + 2;");
        assert_eq!(
            ops(&bc),
            vec![
                Opcode::I32Load,
                Opcode::I32Load,
                Opcode::I32Add,
                Opcode::Pop
            ]
        );
    }

    #[test]
    fn int_plus_float_casts_the_left_operand() {
        let bc = compile("1 + 2.0;");
        assert_eq!(
            ops(&bc),
            vec![
                Opcode::I32Load,
                Opcode::I2F,
                Opcode::F64Load,
                Opcode::F64Add,
                Opcode::Pop
            ]
        );
    }

    #[test]
    fn int_plus_string_casts_to_string() {
        let bc = compile("1 + '2';");
        assert_eq!(
            ops(&bc),
            vec![
                Opcode::I32Load,
                Opcode::I2S,
                Opcode::StrLoad,
                Opcode::StrAdd,
                Opcode::Pop
            ]
        );
    }

    #[test]
    fn negated_bool_multiplies_by_minus_one() {
        let bc = compile("-true;");
        let instrs = bc.instrs();
        assert_eq!(
            ops(&bc),
            vec![
                Opcode::BoolLoad,
                Opcode::B2I,
                Opcode::I32Load,
                Opcode::I32Mul,
                Opcode::Pop
            ]
        );
        assert_eq!(instrs[2].operands[0] as u32 as i32, -1);
    }

    #[test]
    fn division_promotes_both_int_operands() {
        let bc = compile("1 / 2;");
        assert_eq!(
            ops(&bc),
            vec![
                Opcode::I32Load,
                Opcode::I2F,
                Opcode::I32Load,
                Opcode::I2F,
                Opcode::F64Div,
                Opcode::Pop
            ]
        );
    }

    #[test]
    fn bool_operand_takes_two_hop_cast() {
        let bc = compile("true - 0.5;");
        assert_eq!(
            ops(&bc),
            vec![
                Opcode::BoolLoad,
                Opcode::B2I,
                Opcode::I2F,
                Opcode::F64Load,
                Opcode::F64Sub,
                Opcode::Pop
            ]
        );
    }

    #[test]
    fn plus_prefix_on_string_is_numeric_coercion_only() {
        let bc = compile("+'3';");
        assert_eq!(
            ops(&bc),
            vec![Opcode::StrLoad, Opcode::S2F, Opcode::Pop]
        );
    }

    // =========================================================================
    // Literals
    // =========================================================================

    #[test]
    fn special_number_spellings_load_directly() {
        let bc = compile("NaN;");
        let instrs = bc.instrs();
        assert_eq!(instrs[0].op, Opcode::F64Load);
        assert!(f64::from_bits(instrs[0].operands[0]).is_nan());

        let bc = compile("Infinity;");
        let instrs = bc.instrs();
        assert_eq!(f64::from_bits(instrs[0].operands[0]), f64::INFINITY);
    }

    #[test]
    fn string_literals_are_interned_once() {
        let bc = compile("'ab' + 'ab';");
        let instrs = bc.instrs();
        assert_eq!(instrs[0].op, Opcode::StrLoad);
        assert_eq!(instrs[1].op, Opcode::StrLoad);
        assert_eq!(instrs[0].operands, instrs[1].operands);
        // One NUL-terminated run only.
        assert_eq!(bc.consts, b"ab\0");
    }

    #[test]
    fn interned_length_excludes_the_terminator() {
        let bc = compile("'abc';");
        let instrs = bc.instrs();
        assert_eq!(instrs[0].operands, vec![0, 3]);
        assert_eq!(bc.consts.len(), 4);
    }

    #[test]
    fn null_and_undefined_literals() {
        assert_eq!(
            ops(&compile("null; undefined;")),
            vec![
                Opcode::NullLoad,
                Opcode::Pop,
                Opcode::UndefLoad,
                Opcode::Pop
            ]
        );
    }

    // =========================================================================
    // Statements, variables, assignment
    // =========================================================================

    #[test]
    fn every_expression_statement_ends_in_pop() {
        let bc = compile("1; 'a'; true;");
        let popped = ops(&bc).iter().filter(|o| **o == Opcode::Pop).count();
        assert_eq!(popped, 3);
    }

    #[test]
    fn empty_and_block_statements() {
        let bc = compile("; { 1; } ;");
        assert_eq!(ops(&bc), vec![Opcode::I32Load, Opcode::Pop]);
    }

    #[test]
    fn var_declaration_stores_to_a_fresh_slot() {
        let bc = compile("var x = 1; var y = 2;");
        let instrs = bc.instrs();
        assert_eq!(instrs[1].op, Opcode::SStore);
        assert_eq!(instrs[1].operands, vec![0]);
        assert_eq!(instrs[3].op, Opcode::SStore);
        assert_eq!(instrs[3].operands, vec![1]);
    }

    #[test]
    fn var_without_init_stores_undefined() {
        let bc = compile("var x;");
        assert_eq!(ops(&bc), vec![Opcode::UndefLoad, Opcode::SStore]);
    }

    #[test]
    fn assignment_stores_then_reloads() {
        let bc = compile("var x = 1; x = 2;");
        assert_eq!(
            ops(&bc),
            vec![
                Opcode::I32Load,
                Opcode::SStore,
                Opcode::I32Load,
                Opcode::SStore,
                Opcode::SLoad,
                Opcode::Pop
            ]
        );
    }

    #[test]
    fn identifier_reads_load_the_slot() {
        let bc = compile("var x = 1; x + x;");
        let instrs = bc.instrs();
        assert_eq!(instrs[2].op, Opcode::SLoad);
        assert_eq!(instrs[3].op, Opcode::SLoad);
        assert_eq!(instrs[2].operands, vec![0]);
    }

    #[test]
    fn symbols_persist_across_compiles() {
        let mut compiler = Compiler::new();
        compiler
            .compile(&parse("var x = 1;"))
            .expect("first compile");
        let bc = compiler
            .compile(&parse("x + 1;"))
            .expect("second compile sees the binding");
        assert_eq!(
            ops(&bc),
            vec![
                Opcode::SLoad,
                Opcode::I32Load,
                Opcode::I32Add,
                Opcode::Pop
            ]
        );
    }

    // =========================================================================
    // Failure modes
    // =========================================================================

    #[test]
    fn undefined_identifier_is_an_error() {
        assert!(matches!(
            compile_err("missing;"),
            CompileError::UndefinedName { .. }
        ));
    }

    #[test]
    fn no_cast_path_is_an_error() {
        assert!(matches!(
            compile_err("null + 1;"),
            CompileError::NoCastPath { .. }
        ));
    }

    #[test]
    fn prefix_on_null_is_an_error() {
        assert!(matches!(
            compile_err("-null;"),
            CompileError::Inference { .. }
        ));
    }

    #[test]
    fn assignment_to_non_identifier_is_an_error() {
        assert!(matches!(
            compile_err("1 = 2;"),
            CompileError::UnsupportedNode { .. }
        ));
    }

    #[test]
    fn failed_compile_returns_no_partial_bytecode() {
        let mut compiler = Compiler::new();
        let err = compiler.compile(&parse("1 + (2 + null);"));
        assert!(err.is_err());
    }

    #[test]
    fn disassembly_of_mixed_addition() {
        let bc = compile("1 + 2.0;");
        let expected = "\
0000 I32LOAD 00000001
0005 I2F
0006 F64LOAD 4000000000000000
0015 F64ADD
0016 POP
";
        assert_eq!(bc.to_string(), expected);
    }
}
