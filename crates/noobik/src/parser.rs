//! Recursive-descent parser producing the [`Ast`].
//!
//! The grammar is small and LL(1): a program is a sequence of `method`
//! definitions and top-level `var`/`const` declarations. Statements are
//! Pascal-flavored (`begin`/`end` blocks, `if`/`then`/`else`, `while`/`do`,
//! `repeat`/`until`), expressions are C-flavored with `:=` assignment at the
//! lowest precedence.
//!
//! Parse errors are fatal: unlike the semantic passes, the parser stops at
//! the first error and the driver exits non-zero.

use std::fmt;

use crate::ast::{Ast, AstKind, NodeId};
use crate::token::{LexError, Token, TokenKind, tokenize};

/// Error produced by the lexer or parser.
#[derive(Debug, Clone)]
pub enum ParseError {
    Lex(LexError),
    Syntax { message: String, line: u32 },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lex(e) => write!(f, "lex error: {e}"),
            Self::Syntax { message, line } => write!(f, "syntax error: line {line}: {message}"),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        Self::Lex(e)
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Parses `source` into an AST rooted at a `Program` node.
pub fn parse(source: &str) -> ParseResult<Ast> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        ast: Ast::new(),
    };
    let root = parser.program()?;
    parser.ast.set_root(root);
    Ok(parser.ast)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    ast: Ast,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_kind(&self) -> TokenKind {
        self.tokens[self.pos].kind
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<Token> {
        if self.at(kind) {
            Ok(self.bump())
        } else {
            Err(self.error(format!("expected {kind}, found {}", self.peek_kind())))
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::Syntax {
            message: message.into(),
            line: self.peek().line,
        }
    }

    fn line(&self) -> u32 {
        self.peek().line
    }

    /// Consumes any run of statement separators.
    fn skip_semicolons(&mut self) {
        while self.eat(TokenKind::Semicolon) {}
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    fn program(&mut self) -> ParseResult<NodeId> {
        let program = self.ast.add(AstKind::Program, None, 1);
        loop {
            self.skip_semicolons();
            match self.peek_kind() {
                TokenKind::Method => {
                    let func = self.function_def()?;
                    self.ast.add_child(program, func);
                }
                TokenKind::Var | TokenKind::Const => {
                    let decl = self.var_declaration()?;
                    self.ast.add_child(program, decl);
                }
                TokenKind::Eof => break,
                other => return Err(self.error(format!("expected method or var, found {other}"))),
            }
        }
        Ok(program)
    }

    fn function_def(&mut self) -> ParseResult<NodeId> {
        let line = self.line();
        self.expect(TokenKind::Method)?;
        let name = self.expect(TokenKind::Identifier)?;

        let signature = self.ast.add(AstKind::FunctionSignature, Some(name.text), line);

        self.expect(TokenKind::LParen)?;
        if !self.at(TokenKind::RParen) {
            let params = self.param_list()?;
            self.ast.add_child(signature, params);
        }
        self.expect(TokenKind::RParen)?;

        if self.eat(TokenKind::Colon) {
            let ret = self.type_ref()?;
            self.ast.add_child(signature, ret);
        }

        let body = self.block()?;

        let func = self.ast.add(AstKind::FunctionDef, None, line);
        self.ast.add_child(func, signature);
        self.ast.add_child(func, body);
        Ok(func)
    }

    fn param_list(&mut self) -> ParseResult<NodeId> {
        let list = self.ast.add(AstKind::ArgList, None, self.line());
        loop {
            let param = self.param()?;
            self.ast.add_child(list, param);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Ok(list)
    }

    fn param(&mut self) -> ParseResult<NodeId> {
        let name = self.expect(TokenKind::Identifier)?;
        self.expect(TokenKind::Colon)?;
        let ty = self.type_ref()?;
        let arg = self.ast.add(AstKind::ArgDef, Some(name.text), name.line);
        self.ast.add_child(arg, ty);
        Ok(arg)
    }

    /// `int` | `array [N] of int`. Nested arrays are rejected here so the
    /// element size of every array symbol is a scalar size.
    fn type_ref(&mut self) -> ParseResult<NodeId> {
        if self.at(TokenKind::Array) {
            let line = self.line();
            self.bump();
            self.expect(TokenKind::LBracket)?;
            let size = self.expect(TokenKind::IntLiteral)?;
            self.expect(TokenKind::RBracket)?;
            self.expect(TokenKind::Of)?;
            if self.at(TokenKind::Array) {
                return Err(self.error("nested array types are not supported"));
            }
            let element = self.type_ref()?;

            let array = self.ast.add(AstKind::TypeRef, Some("array".to_owned()), line);
            let size_node = self.ast.add(AstKind::IntLiteral, Some(size.text), size.line);
            self.ast.add_child(array, size_node);
            self.ast.add_child(array, element);
            Ok(array)
        } else {
            let token = self.bump();
            if token.kind.is_type_name() || token.kind == TokenKind::Identifier {
                Ok(self.ast.add(AstKind::TypeRef, Some(token.text), token.line))
            } else {
                Err(self.error(format!("expected type name, found {}", token.kind)))
            }
        }
    }

    /// `var a, b: int` or `const limit: int`. A `const` declaration carries
    /// the value `"const"` on the `VarDeclaration` node.
    fn var_declaration(&mut self) -> ParseResult<NodeId> {
        let line = self.line();
        let is_const = self.at(TokenKind::Const);
        self.bump(); // var or const

        let first = self.expect(TokenKind::Identifier)?;
        let ids = if self.at(TokenKind::Comma) {
            let list = self.ast.add(AstKind::IdList, None, first.line);
            let first_id = self.ast.add(AstKind::Identifier, Some(first.text), first.line);
            self.ast.add_child(list, first_id);
            while self.eat(TokenKind::Comma) {
                let name = self.expect(TokenKind::Identifier)?;
                let id = self.ast.add(AstKind::Identifier, Some(name.text), name.line);
                self.ast.add_child(list, id);
            }
            list
        } else {
            self.ast.add(AstKind::Identifier, Some(first.text), first.line)
        };

        self.expect(TokenKind::Colon)?;
        let ty = self.type_ref()?;

        let value = is_const.then(|| "const".to_owned());
        let decl = self.ast.add(AstKind::VarDeclaration, value, line);
        self.ast.add_child(decl, ids);
        self.ast.add_child(decl, ty);
        Ok(decl)
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn block(&mut self) -> ParseResult<NodeId> {
        let line = self.line();
        self.expect(TokenKind::Begin)?;
        let block = self.ast.add(AstKind::StatementBlock, None, line);
        self.statements_into(block)?;
        self.expect(TokenKind::End)?;
        Ok(block)
    }

    /// Parses statements until a block terminator, appending to `parent`.
    fn statements_into(&mut self, parent: NodeId) -> ParseResult<()> {
        loop {
            self.skip_semicolons();
            match self.peek_kind() {
                TokenKind::End | TokenKind::Until | TokenKind::Eof => return Ok(()),
                _ => {
                    let stmt = self.statement()?;
                    self.ast.add_child(parent, stmt);
                }
            }
        }
    }

    fn statement(&mut self) -> ParseResult<NodeId> {
        match self.peek_kind() {
            TokenKind::Var | TokenKind::Const => self.var_declaration(),
            TokenKind::Begin => self.block(),
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::Repeat => self.repeat_statement(),
            TokenKind::Break => {
                let line = self.line();
                self.bump();
                Ok(self.ast.add(AstKind::Break, None, line))
            }
            TokenKind::Continue => {
                let line = self.line();
                self.bump();
                Ok(self.ast.add(AstKind::Continue, None, line))
            }
            TokenKind::Return => {
                let line = self.line();
                self.bump();
                let ret = self.ast.add(AstKind::Return, None, line);
                if !matches!(
                    self.peek_kind(),
                    TokenKind::Semicolon | TokenKind::End | TokenKind::Until | TokenKind::Eof | TokenKind::Else
                ) {
                    let expr = self.expression()?;
                    self.ast.add_child(ret, expr);
                }
                Ok(ret)
            }
            _ => {
                let line = self.line();
                let expr = self.expression()?;
                let stmt = self.ast.add(AstKind::ExprStatement, None, line);
                self.ast.add_child(stmt, expr);
                Ok(stmt)
            }
        }
    }

    fn if_statement(&mut self) -> ParseResult<NodeId> {
        let line = self.line();
        self.expect(TokenKind::If)?;
        let cond = self.expression()?;
        self.expect(TokenKind::Then)?;
        let then_stmt = self.statement()?;

        let node = self.ast.add(AstKind::If, None, line);
        self.ast.add_child(node, cond);
        self.ast.add_child(node, then_stmt);
        if self.eat(TokenKind::Else) {
            let else_stmt = self.statement()?;
            self.ast.add_child(node, else_stmt);
        }
        Ok(node)
    }

    fn while_statement(&mut self) -> ParseResult<NodeId> {
        let line = self.line();
        self.expect(TokenKind::While)?;
        let cond = self.expression()?;
        self.expect(TokenKind::Do)?;
        let body = self.statement()?;

        let node = self.ast.add(AstKind::While, None, line);
        self.ast.add_child(node, cond);
        self.ast.add_child(node, body);
        Ok(node)
    }

    fn repeat_statement(&mut self) -> ParseResult<NodeId> {
        let line = self.line();
        self.expect(TokenKind::Repeat)?;
        let body = self.ast.add(AstKind::StatementList, None, line);
        self.statements_into(body)?;
        self.expect(TokenKind::Until)?;
        let cond = self.expression()?;

        let node = self.ast.add(AstKind::Repeat, None, line);
        self.ast.add_child(node, body);
        self.ast.add_child(node, cond);
        Ok(node)
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    /// Assignment is right-associative and sits at the lowest precedence.
    /// The left side must be an identifier or index expression; anything else
    /// is flagged during semantic analysis, not here.
    fn expression(&mut self) -> ParseResult<NodeId> {
        let lhs = self.or_expr()?;
        if self.at(TokenKind::Assign) {
            let line = self.line();
            self.bump();
            let rhs = self.expression()?;
            let node = self.ast.add(AstKind::Assignment, Some(":=".to_owned()), line);
            self.ast.add_child(node, lhs);
            self.ast.add_child(node, rhs);
            return Ok(node);
        }
        Ok(lhs)
    }

    fn binary(&mut self, op: Token, lhs: NodeId, rhs: NodeId) -> NodeId {
        let node = self.ast.add(AstKind::BinaryExpr, Some(op.text), op.line);
        self.ast.add_child(node, lhs);
        self.ast.add_child(node, rhs);
        node
    }

    fn or_expr(&mut self) -> ParseResult<NodeId> {
        let mut lhs = self.and_expr()?;
        while self.at(TokenKind::OrOr) {
            let op = self.bump();
            let rhs = self.and_expr()?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> ParseResult<NodeId> {
        let mut lhs = self.bit_or()?;
        while self.at(TokenKind::AndAnd) {
            let op = self.bump();
            let rhs = self.bit_or()?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn bit_or(&mut self) -> ParseResult<NodeId> {
        let mut lhs = self.bit_xor()?;
        while self.at(TokenKind::Pipe) {
            let op = self.bump();
            let rhs = self.bit_xor()?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn bit_xor(&mut self) -> ParseResult<NodeId> {
        let mut lhs = self.bit_and()?;
        while self.at(TokenKind::Caret) {
            let op = self.bump();
            let rhs = self.bit_and()?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn bit_and(&mut self) -> ParseResult<NodeId> {
        let mut lhs = self.equality()?;
        while self.at(TokenKind::Amp) {
            let op = self.bump();
            let rhs = self.equality()?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> ParseResult<NodeId> {
        let mut lhs = self.relational()?;
        while matches!(self.peek_kind(), TokenKind::Eq | TokenKind::Ne) {
            let op = self.bump();
            let rhs = self.relational()?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn relational(&mut self) -> ParseResult<NodeId> {
        let mut lhs = self.shift()?;
        while matches!(
            self.peek_kind(),
            TokenKind::Lt | TokenKind::Le | TokenKind::Gt | TokenKind::Ge
        ) {
            let op = self.bump();
            let rhs = self.shift()?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn shift(&mut self) -> ParseResult<NodeId> {
        let mut lhs = self.additive()?;
        while matches!(self.peek_kind(), TokenKind::Shl | TokenKind::Shr) {
            let op = self.bump();
            let rhs = self.additive()?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> ParseResult<NodeId> {
        let mut lhs = self.multiplicative()?;
        while matches!(self.peek_kind(), TokenKind::Plus | TokenKind::Minus) {
            let op = self.bump();
            let rhs = self.multiplicative()?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> ParseResult<NodeId> {
        let mut lhs = self.unary()?;
        while matches!(self.peek_kind(), TokenKind::Star | TokenKind::Slash | TokenKind::Percent) {
            let op = self.bump();
            let rhs = self.unary()?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> ParseResult<NodeId> {
        match self.peek_kind() {
            TokenKind::Minus | TokenKind::Plus | TokenKind::Not | TokenKind::Tilde => {
                let op = self.bump();
                let operand = self.unary()?;
                let node = self.ast.add(AstKind::UnaryExpr, Some(op.text), op.line);
                self.ast.add_child(node, operand);
                Ok(node)
            }
            TokenKind::At => {
                let op = self.bump();
                let operand = self.unary()?;
                let node = self.ast.add(AstKind::AddrOf, None, op.line);
                self.ast.add_child(node, operand);
                Ok(node)
            }
            // prefix `*` dereferences an address-valued expression
            TokenKind::Star => {
                let op = self.bump();
                let operand = self.unary()?;
                let node = self.ast.add(AstKind::Deref, None, op.line);
                self.ast.add_child(node, operand);
                Ok(node)
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> ParseResult<NodeId> {
        let mut expr = self.primary()?;
        while self.at(TokenKind::LBracket) {
            let line = self.line();
            self.bump();
            let index = self.expression()?;
            self.expect(TokenKind::RBracket)?;
            let node = self.ast.add(AstKind::IndexExpr, None, line);
            self.ast.add_child(node, expr);
            self.ast.add_child(node, index);
            expr = node;
        }
        Ok(expr)
    }

    fn primary(&mut self) -> ParseResult<NodeId> {
        match self.peek_kind() {
            TokenKind::IntLiteral => {
                let token = self.bump();
                Ok(self.ast.add(AstKind::IntLiteral, Some(token.text), token.line))
            }
            TokenKind::BoolLiteral => {
                let token = self.bump();
                Ok(self.ast.add(AstKind::BoolLiteral, Some(token.text), token.line))
            }
            TokenKind::CharLiteral => {
                let token = self.bump();
                Ok(self.ast.add(AstKind::CharLiteral, Some(token.text), token.line))
            }
            TokenKind::StringLiteral => {
                let token = self.bump();
                Ok(self.ast.add(AstKind::StringLiteral, Some(token.text), token.line))
            }
            TokenKind::Identifier => {
                let token = self.bump();
                if self.at(TokenKind::LParen) {
                    self.call_expr(token)
                } else {
                    Ok(self.ast.add(AstKind::Identifier, Some(token.text), token.line))
                }
            }
            TokenKind::LParen => {
                self.bump();
                let expr = self.expression()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            other => Err(self.error(format!("expected expression, found {other}"))),
        }
    }

    /// `f(a, b)` becomes `CallExpr(value=f)[Identifier(f), ArgList[a, b]]`.
    fn call_expr(&mut self, name: Token) -> ParseResult<NodeId> {
        self.expect(TokenKind::LParen)?;
        let args = self.ast.add(AstKind::ArgList, None, name.line);
        if !self.at(TokenKind::RParen) {
            loop {
                let arg = self.expression()?;
                self.ast.add_child(args, arg);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;

        let callee = self
            .ast
            .add(AstKind::Identifier, Some(name.text.clone()), name.line);
        let call = self.ast.add(AstKind::CallExpr, Some(name.text), name.line);
        self.ast.add_child(call, callee);
        self.ast.add_child(call, args);
        Ok(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_of(ast: &Ast, id: NodeId) -> AstKind {
        ast.kind(id)
    }

    #[test]
    fn parses_minimal_method() {
        let ast = parse("method main(): int begin return 0 end").unwrap();
        let root = ast.root().unwrap();
        assert_eq!(ast.kind(root), AstKind::Program);
        let func = ast.child(root, 0).unwrap();
        assert_eq!(kind_of(&ast, func), AstKind::FunctionDef);
        let sig = ast.child(func, 0).unwrap();
        assert_eq!(ast.value(sig), Some("main"));
    }

    #[test]
    fn if_children_are_cond_then_else() {
        let ast = parse("method f() begin if a > 0 then b := 1 else b := 2 end").unwrap();
        let func = ast.child(ast.root().unwrap(), 0).unwrap();
        let body = ast.child(func, 1).unwrap();
        let if_stmt = ast.child(body, 0).unwrap();
        assert_eq!(ast.kind(if_stmt), AstKind::If);
        assert_eq!(ast.children(if_stmt).len(), 3);
        assert_eq!(ast.kind(ast.child(if_stmt, 0).unwrap()), AstKind::BinaryExpr);
        assert_eq!(ast.kind(ast.child(if_stmt, 1).unwrap()), AstKind::Assignment);
    }

    #[test]
    fn array_type_ref_shape() {
        let ast = parse("var a: array[8] of int").unwrap();
        let decl = ast.child(ast.root().unwrap(), 0).unwrap();
        let ty = ast.child(decl, 1).unwrap();
        assert_eq!(ast.value(ty), Some("array"));
        assert_eq!(ast.value(ast.child(ty, 0).unwrap()), Some("8"));
        assert_eq!(ast.value(ast.child(ty, 1).unwrap()), Some("int"));
    }

    #[test]
    fn call_is_name_plus_arglist() {
        let ast = parse("method f() begin g(1, x) end").unwrap();
        let func = ast.child(ast.root().unwrap(), 0).unwrap();
        let body = ast.child(func, 1).unwrap();
        let stmt = ast.child(body, 0).unwrap();
        let call = ast.child(stmt, 0).unwrap();
        assert_eq!(ast.kind(call), AstKind::CallExpr);
        assert_eq!(ast.value(call), Some("g"));
        let args = ast.child(call, 1).unwrap();
        assert_eq!(ast.kind(args), AstKind::ArgList);
        assert_eq!(ast.children(args).len(), 2);
    }

    #[test]
    fn rejects_nested_arrays() {
        assert!(parse("var a: array[2] of array[2] of int").is_err());
    }

    #[test]
    fn reports_line_numbers() {
        let err = parse("method f()\nbegin\n  ,\nend").unwrap_err();
        match err {
            ParseError::Syntax { line, .. } => assert_eq!(line, 3),
            ParseError::Lex(_) => panic!("expected syntax error"),
        }
    }
}
