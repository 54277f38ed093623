use crate::ast::{Ast, InfixOp, Node, NodeId, PrefixOp};
use crate::lexer::{Span, Spanned};
use crate::token::Token;

#[derive(Debug)]
pub struct ParserError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl ParserError {
    fn at(span: Span, message: String) -> Self {
        ParserError {
            message,
            line: span.line,
            col: span.col,
        }
    }
}

impl std::fmt::Display for ParserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.col, self.message)
    }
}

impl std::error::Error for ParserError {}

/// Recursive-descent parser with precedence climbing for infix operators.
///
/// Precedence, loosest first: assignment (right-associative), additive,
/// multiplicative, prefix, primary.
pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    ast: Ast,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Parser {
            tokens,
            pos: 0,
            ast: Ast::new(),
        }
    }

    pub fn parse(mut self) -> Result<Ast, ParserError> {
        let mut statements = Vec::new();
        while self.current() != &Token::Eof {
            statements.push(self.parse_statement()?);
        }
        let root = self.ast.push(Node::Program(statements));
        self.ast.set_root(root);
        Ok(self.ast)
    }

    // Cursor helpers

    fn current(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn current_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|s| s.span)
            .unwrap_or(Span { line: 0, col: 0 })
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ParserError> {
        if self.current() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected {}", expected.describe())))
        }
    }

    fn unexpected(&self, context: &str) -> ParserError {
        ParserError::at(
            self.current_span(),
            format!("{}, found {}", context, self.current().describe()),
        )
    }

    // Statements

    fn parse_statement(&mut self) -> Result<NodeId, ParserError> {
        match self.current() {
            Token::Semicolon => {
                self.advance();
                Ok(self.ast.push(Node::Empty))
            }
            Token::LBrace => self.parse_block(),
            Token::Var => self.parse_var_decl(),
            _ => self.parse_expr_statement(),
        }
    }

    fn parse_block(&mut self) -> Result<NodeId, ParserError> {
        self.expect(&Token::LBrace)?;
        let mut statements = Vec::new();
        while self.current() != &Token::RBrace {
            if self.current() == &Token::Eof {
                return Err(self.unexpected("expected '}'"));
            }
            statements.push(self.parse_statement()?);
        }
        self.advance();
        Ok(self.ast.push(Node::Block(statements)))
    }

    fn parse_var_decl(&mut self) -> Result<NodeId, ParserError> {
        self.expect(&Token::Var)?;

        let name = match self.advance() {
            Token::Ident(name) => name,
            other => {
                return Err(ParserError::at(
                    self.current_span(),
                    format!("expected identifier after 'var', found {}", other.describe()),
                ));
            }
        };

        let init = if self.current() == &Token::Assign {
            self.advance();
            Some(self.parse_expression()?)
        } else {
            None
        };

        self.end_statement()?;
        Ok(self.ast.push(Node::VarDecl { name, init }))
    }

    fn parse_expr_statement(&mut self) -> Result<NodeId, ParserError> {
        let expr = self.parse_expression()?;
        self.end_statement()?;
        Ok(self.ast.push(Node::ExprStmt(expr)))
    }

    /// Consume the statement terminator. The `;` is optional before `}`
    /// and at end of input.
    fn end_statement(&mut self) -> Result<(), ParserError> {
        match self.current() {
            Token::Semicolon => {
                self.advance();
                Ok(())
            }
            Token::RBrace | Token::Eof => Ok(()),
            _ => Err(self.unexpected("expected ';'")),
        }
    }

    // Expressions

    fn parse_expression(&mut self) -> Result<NodeId, ParserError> {
        self.parse_assign()
    }

    fn parse_assign(&mut self) -> Result<NodeId, ParserError> {
        let left = self.parse_additive()?;

        if self.current() == &Token::Assign {
            self.advance();
            // Right-associative: a = b = c parses as a = (b = c).
            let value = self.parse_assign()?;
            return Ok(self.ast.push(Node::Assign {
                target: left,
                value,
            }));
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<NodeId, ParserError> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = match self.current() {
                Token::Plus => InfixOp::Add,
                Token::Minus => InfixOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = self.ast.push(Node::Infix { op, left, right });
        }

        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<NodeId, ParserError> {
        let mut left = self.parse_prefix()?;

        loop {
            let op = match self.current() {
                Token::Star => InfixOp::Mul,
                Token::Slash => InfixOp::Div,
                Token::Percent => InfixOp::Rem,
                _ => break,
            };
            self.advance();
            let right = self.parse_prefix()?;
            left = self.ast.push(Node::Infix { op, left, right });
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<NodeId, ParserError> {
        let op = match self.current() {
            Token::Plus => PrefixOp::Plus,
            Token::Minus => PrefixOp::Minus,
            _ => return self.parse_primary(),
        };
        self.advance();
        let operand = self.parse_prefix()?;
        Ok(self.ast.push(Node::Prefix { op, operand }))
    }

    fn parse_primary(&mut self) -> Result<NodeId, ParserError> {
        match self.advance() {
            Token::Number { text, value } => Ok(self.ast.push(Node::Number { text, value })),
            Token::Str(s) => Ok(self.ast.push(Node::Str(s))),
            Token::Bool(b) => Ok(self.ast.push(Node::Bool(b))),
            Token::Null => Ok(self.ast.push(Node::Null)),
            Token::Undefined => Ok(self.ast.push(Node::Undefined)),
            Token::Ident(name) => Ok(self.ast.push(Node::Ident(name))),
            Token::LParen => {
                let expr = self.parse_expression()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.unexpected("expected an expression"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(source: &str) -> Ast {
        let tokens = Lexer::new(source).tokenize().expect("lexing should succeed");
        Parser::new(tokens).parse().expect("parsing should succeed")
    }

    fn parse_err(source: &str) -> ParserError {
        let tokens = Lexer::new(source).tokenize().expect("lexing should succeed");
        Parser::new(tokens).parse().unwrap_err()
    }

    /// Unwrap a program with a single expression statement.
    fn single_expr(ast: &Ast) -> NodeId {
        let Node::Program(stmts) = ast.node(ast.root().unwrap()) else {
            panic!("root should be a program");
        };
        assert_eq!(stmts.len(), 1);
        let Node::ExprStmt(expr) = ast.node(stmts[0]) else {
            panic!("statement should be an expression statement");
        };
        *expr
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let ast = parse("1 + 2 * 3;");
        let expr = single_expr(&ast);

        let Node::Infix { op, left, right } = ast.node(expr) else {
            panic!("expected infix");
        };
        assert_eq!(*op, InfixOp::Add);
        assert!(matches!(ast.node(*left), Node::Number { text, .. } if text == "1"));
        assert!(matches!(
            ast.node(*right),
            Node::Infix { op: InfixOp::Mul, .. }
        ));
    }

    #[test]
    fn parentheses_override_precedence() {
        let ast = parse("(1 + 2) * 3;");
        let expr = single_expr(&ast);
        assert!(matches!(
            ast.node(expr),
            Node::Infix { op: InfixOp::Mul, .. }
        ));
    }

    #[test]
    fn same_precedence_is_left_associative() {
        let ast = parse("1 - 2 - 3;");
        let expr = single_expr(&ast);
        let Node::Infix { op, left, .. } = ast.node(expr) else {
            panic!("expected infix");
        };
        assert_eq!(*op, InfixOp::Sub);
        assert!(matches!(
            ast.node(*left),
            Node::Infix { op: InfixOp::Sub, .. }
        ));
    }

    #[test]
    fn assignment_is_right_associative() {
        let ast = parse("a = b = 1;");
        let expr = single_expr(&ast);
        let Node::Assign { target, value } = ast.node(expr) else {
            panic!("expected assignment");
        };
        assert!(matches!(ast.node(*target), Node::Ident(name) if name == "a"));
        assert!(matches!(ast.node(*value), Node::Assign { .. }));
    }

    #[test]
    fn prefix_nests() {
        let ast = parse("--1;");
        let expr = single_expr(&ast);
        let Node::Prefix { op, operand } = ast.node(expr) else {
            panic!("expected prefix");
        };
        assert_eq!(*op, PrefixOp::Minus);
        assert!(matches!(
            ast.node(*operand),
            Node::Prefix { op: PrefixOp::Minus, .. }
        ));
    }

    #[test]
    fn var_declaration_with_and_without_init() {
        let ast = parse("var x = 1; var y;");
        let Node::Program(stmts) = ast.node(ast.root().unwrap()) else {
            panic!("root should be a program");
        };
        assert!(matches!(
            ast.node(stmts[0]),
            Node::VarDecl { name, init: Some(_) } if name == "x"
        ));
        assert!(matches!(
            ast.node(stmts[1]),
            Node::VarDecl { name, init: None } if name == "y"
        ));
    }

    #[test]
    fn blocks_and_empty_statements() {
        let ast = parse("{ 1; ; } ;");
        let Node::Program(stmts) = ast.node(ast.root().unwrap()) else {
            panic!("root should be a program");
        };
        assert_eq!(stmts.len(), 2);
        let Node::Block(inner) = ast.node(stmts[0]) else {
            panic!("expected block");
        };
        assert_eq!(inner.len(), 2);
        assert!(matches!(ast.node(inner[1]), Node::Empty));
        assert!(matches!(ast.node(stmts[1]), Node::Empty));
    }

    #[test]
    fn trailing_semicolon_optional_at_eof() {
        let ast = parse("1 + 2");
        single_expr(&ast);
    }

    #[test]
    fn missing_operand_errors() {
        let err = parse_err("1 + ;");
        assert!(err.message.contains("expected an expression"));
    }

    #[test]
    fn unclosed_paren_errors() {
        let err = parse_err("(1 + 2;");
        assert!(err.message.contains("expected ')'"));
    }

    #[test]
    fn unclosed_block_errors() {
        let err = parse_err("{ 1;");
        assert!(err.message.contains("expected '}'"));
    }

    #[test]
    fn missing_semicolon_between_expressions_errors() {
        let err = parse_err("1 2");
        assert!(err.message.contains("expected ';'"));
    }
}
