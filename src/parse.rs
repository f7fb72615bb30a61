//! Análisis sintáctico.
//!
//! Parser de descenso recursivo sobre el flujo de tokens. Produce un
//! [`Ast`] cuyos nodos conservan sus ubicaciones originales. Algunos
//! nodos llevan [`Annotation`]s vacías que el análisis semántico
//! completa con información de layout para la fase de lowering.

use std::{
    cell::Cell,
    fmt::{self, Debug, Display},
};

use thiserror::Error;

use crate::{
    lex::{Identifier, Keyword, Token},
    source::{Located, Location},
};

#[derive(Debug)]
pub struct Ast(Vec<Declaration>);

impl Ast {
    pub fn declarations(&self) -> &[Declaration] {
        &self.0
    }
}

#[derive(Debug)]
pub enum Declaration {
    Variable(Variable),
    Function(Function),
    TypeAlias {
        name: Located<Identifier>,
        of: Located<Type>,
    },
}

/// Declaración de variable, global o local.
#[derive(Debug)]
pub struct Variable {
    pub name: Located<Identifier>,
    pub of: Located<Type>,
    pub init: Option<Located<Expr>>,

    /// Tamaño en bytes del tipo declarado.
    pub size: Annotation,
}

#[derive(Debug)]
pub struct Function {
    pub name: Located<Identifier>,

    /// Siempre es un [`Type::Function`].
    pub signature: Located<Type>,
    pub body: Vec<Statement>,
}

impl Function {
    pub fn parameters(&self) -> &[Member] {
        match self.signature.as_ref() {
            Type::Function(_, parameters) => parameters,
            _ => &[],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Int,
    Bool,
    Char,
    UInt,
    Array(Box<Type>, u32),
    Pointer(Box<Type>),
    Struct(Vec<Member>),
    Function(Box<Type>, Vec<Member>),
    Named(Identifier),

    /// Tipo de `null`, compatible con cualquier puntero. No tiene
    /// sintaxis propia.
    Null,
}

/// Campo de estructura o parámetro de función.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    pub name: Located<Identifier>,
    pub of: Type,
}

impl Display for Type {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => fmt.write_str("int"),
            Type::Bool => fmt.write_str("bool"),
            Type::Char => fmt.write_str("char"),
            Type::UInt => fmt.write_str("uint"),
            Type::Array(element, size) => write!(fmt, "{}[{}]", element, size),
            Type::Pointer(pointee) => write!(fmt, "{}@", pointee),
            Type::Named(name) => write!(fmt, "{}", name),
            Type::Null => fmt.write_str("null"),

            Type::Struct(fields) => {
                fmt.write_str("struct {")?;
                for field in fields {
                    write!(fmt, " {} {};", field.of, field.name.as_ref())?;
                }

                fmt.write_str(" }")
            }

            Type::Function(returns, parameters) => {
                write!(fmt, "{}(", returns)?;
                for (i, parameter) in parameters.iter().enumerate() {
                    if i > 0 {
                        fmt.write_str(", ")?;
                    }

                    write!(fmt, "{}", parameter.of)?;
                }

                fmt.write_str(")")
            }
        }
    }
}

#[derive(Debug)]
pub enum Statement {
    Local(Variable),

    Assign {
        target: Located<Expr>,
        value: Located<Expr>,

        /// Cantidad de bytes que se copian.
        width: Annotation,
    },

    If {
        condition: Located<Expr>,
        then: Vec<Statement>,
        otherwise: Option<Vec<Statement>>,
    },

    While {
        condition: Located<Expr>,
        body: Vec<Statement>,
    },

    Return {
        at: Location,
        value: Option<Located<Expr>>,
    },

    Block(Vec<Statement>),
}

#[derive(Debug)]
pub enum Expr {
    Id(Identifier),
    Int {
        value: i32,
        unsigned: bool,
    },
    Char(char),
    Bool(bool),
    Null,

    Call {
        function: Located<Identifier>,
        args: Vec<Located<Expr>>,
    },

    Binary(Box<Located<Expr>>, BinOp, Box<Located<Expr>>),
    Unary(UnOp, Box<Located<Expr>>),

    Field {
        base: Box<Located<Expr>>,
        field: Located<Identifier>,
        offset: Annotation,
    },

    Index {
        base: Box<Located<Expr>>,
        index: Box<Located<Expr>>,
        stride: Annotation,
    },

    Deref(Box<Located<Expr>>),
    AddressOf(Box<Located<Expr>>),

    /// `new T@`
    Alloc {
        of: Located<Identifier>,
        size: Annotation,
    },
}

impl Expr {
    /// Determina si la expresión denota una ubicación de memoria.
    pub fn is_lvalue(&self) -> bool {
        matches!(
            self,
            Expr::Id(_) | Expr::Field { .. } | Expr::Index { .. } | Expr::Deref(_)
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
}

impl Display for BinOp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use BinOp::*;

        let operator = match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Div => "/",
            And => "&&",
            Or => "||",
            Equal => "==",
            NotEqual => "!=",
            Less => "<",
            Greater => ">",
            LessOrEqual => "<=",
            GreaterOrEqual => ">=",
        };

        fmt.write_str(operator)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnOp {
    Negate,
    Not,
}

/// Dato numérico que el análisis semántico asocia a un nodo.
#[derive(Default)]
pub struct Annotation(Cell<Option<u32>>);

impl Annotation {
    pub fn set(&self, value: u32) {
        self.0.set(Some(value));
    }

    pub fn get(&self) -> Option<u32> {
        self.0.get()
    }
}

impl Debug for Annotation {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => write!(fmt, "{}", value),
            None => fmt.write_str("?"),
        }
    }
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Expected {0}, found {1} instead")]
    UnexpectedToken(Token, Token),

    #[error("Abrupt end of program")]
    UnexpectedEof,

    #[error("Expected identifier")]
    ExpectedId,

    #[error("Expected any of `int`, `bool`, `char`, `uint`, `struct` or a type name")]
    ExpectedType,

    #[error("Expected an expression")]
    ExpectedExpr,

    #[error("Expected any of `if`, `while`, `return`, a block, a declaration or an assignment")]
    ExpectedStatement,

    #[error("Expected an integer constant as array size")]
    ExpectedArraySize,
}

/// Construye el árbol sintáctico de un programa completo.
///
/// `start` es la ubicación con la que se reportan errores previos a
/// consumir cualquier token, como en un archivo vacío.
pub fn parse(tokens: &[Located<Token>], start: Location) -> Result<Ast, Located<ParserError>> {
    let mut parser = Parser {
        tokens,
        cursor: 0,
        last_known: start,
    };

    parser.program().map_err(Failure::coerce)
}

#[derive(Clone)]
struct Parser<'a> {
    tokens: &'a [Located<Token>],
    cursor: usize,
    last_known: Location,
}

/// Un error débil permite intentar otras alternativas, uno estricto no.
enum Failure {
    Weak(Located<ParserError>),
    Strict(Located<ParserError>),
}

impl Failure {
    fn weak(self) -> Self {
        Failure::Weak(self.coerce())
    }

    fn strict(self) -> Self {
        Failure::Strict(self.coerce())
    }

    fn coerce(self) -> Located<ParserError> {
        match self {
            Failure::Weak(error) => error,
            Failure::Strict(error) => error,
        }
    }
}

type Parse<T> = Result<T, Failure>;

const OR: &[(Token, BinOp)] = &[(Token::Or, BinOp::Or)];
const AND: &[(Token, BinOp)] = &[(Token::And, BinOp::And)];
const ADDITIVE: &[(Token, BinOp)] = &[(Token::Plus, BinOp::Add), (Token::Minus, BinOp::Sub)];
const MULTIPLICATIVE: &[(Token, BinOp)] = &[(Token::Times, BinOp::Mul), (Token::Slash, BinOp::Div)];

const RELATIONAL: &[(Token, BinOp)] = &[
    (Token::Equal, BinOp::Equal),
    (Token::NotEqual, BinOp::NotEqual),
    (Token::Less, BinOp::Less),
    (Token::Greater, BinOp::Greater),
    (Token::LessOrEqual, BinOp::LessOrEqual),
    (Token::GreaterOrEqual, BinOp::GreaterOrEqual),
];

impl<'a> Parser<'a> {
    fn program(&mut self) -> Parse<Ast> {
        let mut declarations = Vec::new();
        while self.peek().is_some() {
            declarations.push(self.declaration()?);
        }

        Ok(Ast(declarations))
    }

    fn declaration(&mut self) -> Parse<Declaration> {
        if let Some(Token::Keyword(Keyword::Typedef)) = self.peek() {
            self.next()?;

            let of = self.type_expr()?;
            let name = self.id()?;
            self.expect(Token::Semicolon)?;

            return Ok(Declaration::TypeAlias { name, of });
        }

        let of = self.type_expr()?;
        let name = self.id()?;

        match self.next()?.into_inner() {
            Token::Semicolon => Ok(Declaration::Variable(Variable {
                name,
                of,
                init: None,
                size: Default::default(),
            })),

            Token::Assign => {
                let init = self.expr()?;
                self.expect(Token::Semicolon)?;

                Ok(Declaration::Variable(Variable {
                    name,
                    of,
                    init: Some(init),
                    size: Default::default(),
                }))
            }

            Token::OpenParen => {
                let parameters = self.comma_separated(Parser::parameter, true)?;
                self.expect(Token::CloseParen)?;

                let (location, returns) = of.split();
                let location = Location::span(location, &self.last_known);
                let signature = Type::Function(Box::new(returns), parameters);

                let body = self.block()?;
                Ok(Declaration::Function(Function {
                    name,
                    signature: Located::at(signature, location),
                    body,
                }))
            }

            found => self.fail(ParserError::UnexpectedToken(Token::Semicolon, found)),
        }
    }

    fn parameter(&mut self) -> Parse<Member> {
        let of = self.type_expr().map_err(Failure::weak)?;
        let name = self.id()?;

        Ok(Member {
            name,
            of: of.into_inner(),
        })
    }

    fn type_expr(&mut self) -> Parse<Located<Type>> {
        let (start, token) = self.next()?.split();
        let mut typ = match token {
            Token::Keyword(Keyword::Int) => Type::Int,
            Token::Keyword(Keyword::Bool) => Type::Bool,
            Token::Keyword(Keyword::Char) => Type::Char,
            Token::Keyword(Keyword::Uint) => Type::UInt,
            Token::Keyword(Keyword::Struct) => self.struct_body()?,
            Token::Id(name) => Type::Named(name),

            _ => self.fail(ParserError::ExpectedType)?,
        };

        loop {
            match self.peek() {
                Some(Token::At) => {
                    self.next()?;
                    typ = Type::Pointer(Box::new(typ));
                }

                Some(Token::OpenSquare) => {
                    self.next()?;
                    let size = match self.next()?.into_inner() {
                        Token::IntLiteral { value, .. } => value as u32,
                        _ => self.fail(ParserError::ExpectedArraySize)?,
                    };

                    self.expect(Token::CloseSquare)?;
                    typ = Type::Array(Box::new(typ), size);
                }

                _ => break,
            }
        }

        Ok(Located::at(typ, Location::span(start, &self.last_known)))
    }

    fn struct_body(&mut self) -> Parse<Type> {
        self.expect(Token::OpenCurly)?;

        let mut fields = Vec::new();
        while self.peek() != Some(&Token::CloseCurly) {
            let of = self.type_expr()?.into_inner();
            let name = self.id()?;
            self.skip(Token::Semicolon);

            fields.push(Member { name, of });
        }

        self.expect(Token::CloseCurly)?;
        Ok(Type::Struct(fields))
    }

    fn block(&mut self) -> Parse<Vec<Statement>> {
        self.expect(Token::OpenCurly)?;

        let mut statements = Vec::new();
        loop {
            match self.peek() {
                Some(Token::CloseCurly) => {
                    self.next()?;
                    break Ok(statements);
                }

                _ => statements.push(self.statement()?),
            }
        }
    }

    fn statement(&mut self) -> Parse<Statement> {
        let statement = match self.peek() {
            Some(Token::Keyword(Keyword::If)) => self.if_statement()?,
            Some(Token::Keyword(Keyword::While)) => self.while_statement()?,
            Some(Token::Keyword(Keyword::Return)) => return self.return_statement(),
            Some(Token::OpenCurly) => Statement::Block(self.block()?),

            // Una declaración local y una asignación pueden compartir un
            // prefijo arbitrariamente largo, como en `a@ b;` y `a@ = b;`
            _ => {
                return match self.attempt(Parser::local) {
                    Err(Failure::Weak(_)) => match self.attempt(Parser::assignment) {
                        Err(Failure::Weak(_)) => {
                            self.next()?;
                            self.fail(ParserError::ExpectedStatement)
                        }

                        result => result,
                    },

                    result => result,
                }
            }
        };

        self.skip(Token::Semicolon);
        Ok(statement)
    }

    fn if_statement(&mut self) -> Parse<Statement> {
        self.keyword(Keyword::If)?;
        let condition = self.expr()?;
        let then = self.block()?;

        let otherwise = match self.peek() {
            Some(Token::Keyword(Keyword::Else)) => {
                self.next()?;
                Some(self.block()?)
            }

            _ => None,
        };

        Ok(Statement::If {
            condition,
            then,
            otherwise,
        })
    }

    fn while_statement(&mut self) -> Parse<Statement> {
        self.keyword(Keyword::While)?;
        let condition = self.expr()?;
        let body = self.block()?;

        Ok(Statement::While { condition, body })
    }

    fn return_statement(&mut self) -> Parse<Statement> {
        self.keyword(Keyword::Return)?;
        let at = self.last_known.clone();

        let value = match self.peek() {
            Some(Token::Semicolon) => None,
            _ => Some(self.expr()?),
        };

        self.expect(Token::Semicolon)?;
        Ok(Statement::Return { at, value })
    }

    fn local(&mut self) -> Parse<Statement> {
        let of = self.type_expr().map_err(Failure::weak)?;
        let name = self.id().map_err(Failure::weak)?;

        let init = match self.next()?.into_inner() {
            Token::Semicolon => None,
            Token::Assign => {
                let init = self.expr()?;
                self.expect(Token::Semicolon)?;
                Some(init)
            }

            found => self.fail(ParserError::UnexpectedToken(Token::Semicolon, found))?,
        };

        Ok(Statement::Local(Variable {
            name,
            of,
            init,
            size: Default::default(),
        }))
    }

    fn assignment(&mut self) -> Parse<Statement> {
        let target = self.postfix().map_err(Failure::weak)?;
        self.expect(Token::Assign)?;

        let value = self.expr()?;
        self.expect(Token::Semicolon)?;

        Ok(Statement::Assign {
            target,
            value,
            width: Default::default(),
        })
    }

    fn expr(&mut self) -> Parse<Located<Expr>> {
        self.binary(Parser::and, OR)
    }

    fn and(&mut self) -> Parse<Located<Expr>> {
        self.binary(Parser::relational, AND)
    }

    fn relational(&mut self) -> Parse<Located<Expr>> {
        self.binary(Parser::additive, RELATIONAL)
    }

    fn additive(&mut self) -> Parse<Located<Expr>> {
        self.binary(Parser::multiplicative, ADDITIVE)
    }

    fn multiplicative(&mut self) -> Parse<Located<Expr>> {
        self.binary(Parser::unary, MULTIPLICATIVE)
    }

    /// Secuencia asociativa por la izquierda de operandos y operadores.
    fn binary<F>(&mut self, operand: F, operators: &[(Token, BinOp)]) -> Parse<Located<Expr>>
    where
        F: Fn(&mut Self) -> Parse<Located<Expr>>,
    {
        let mut lhs = operand(self)?;

        loop {
            let op = self.peek().and_then(|token| {
                operators
                    .iter()
                    .find(|(operator, _)| operator == token)
                    .map(|&(_, op)| op)
            });

            let op = match op {
                Some(op) => op,
                None => break Ok(lhs),
            };

            self.next()?;
            let rhs = operand(self).map_err(Failure::strict)?;

            let location = Location::span(lhs.location().clone(), rhs.location());
            lhs = Located::at(Expr::Binary(Box::new(lhs), op, Box::new(rhs)), location);
        }
    }

    fn unary(&mut self) -> Parse<Located<Expr>> {
        let op = match self.peek() {
            Some(Token::Minus) => UnOp::Negate,
            Some(Token::Not) => UnOp::Not,
            _ => return self.postfix(),
        };

        self.next()?;
        let start = self.last_known.clone();

        let operand = self.unary().map_err(Failure::strict)?;
        let location = Location::span(start, operand.location());

        Ok(Located::at(Expr::Unary(op, Box::new(operand)), location))
    }

    fn postfix(&mut self) -> Parse<Located<Expr>> {
        let mut expr = self.primary()?;

        loop {
            let start = expr.location().clone();

            let next = match self.peek() {
                Some(Token::Period) => {
                    self.next()?;
                    let field = self.id()?;

                    Expr::Field {
                        base: Box::new(expr),
                        field,
                        offset: Default::default(),
                    }
                }

                Some(Token::OpenSquare) => {
                    self.next()?;
                    let index = self.expr()?;
                    self.expect(Token::CloseSquare)?;

                    Expr::Index {
                        base: Box::new(expr),
                        index: Box::new(index),
                        stride: Default::default(),
                    }
                }

                Some(Token::At) => {
                    self.next()?;
                    Expr::Deref(Box::new(expr))
                }

                Some(Token::Ampersand) => {
                    self.next()?;
                    Expr::AddressOf(Box::new(expr))
                }

                _ => break Ok(expr),
            };

            expr = Located::at(next, Location::span(start, &self.last_known));
        }
    }

    fn primary(&mut self) -> Parse<Located<Expr>> {
        let (start, token) = self.next()?.split();

        let expr = match token {
            Token::IntLiteral { value, unsigned } => Expr::Int { value, unsigned },
            Token::CharLiteral(c) => Expr::Char(c),
            Token::Keyword(Keyword::True) => Expr::Bool(true),
            Token::Keyword(Keyword::False) => Expr::Bool(false),
            Token::Keyword(Keyword::Null) => Expr::Null,

            Token::Id(name) => match self.peek() {
                Some(Token::OpenParen) => {
                    self.next()?;
                    let args = self.comma_separated(Parser::expr, true)?;
                    self.expect(Token::CloseParen)?;

                    Expr::Call {
                        function: Located::at(name, start.clone()),
                        args,
                    }
                }

                _ => Expr::Id(name),
            },

            Token::OpenParen => {
                let inner = self.expr().map_err(Failure::strict)?;
                self.expect(Token::CloseParen)?;

                // Los paréntesis solo agrupan, la ubicación los incluye
                let (_, inner) = inner.split();
                inner
            }

            Token::Keyword(Keyword::New) => {
                let of = self.id()?;
                self.expect(Token::At)?;

                Expr::Alloc {
                    of,
                    size: Default::default(),
                }
            }

            _ => return self.fail(ParserError::ExpectedExpr).map_err(Failure::weak),
        };

        Ok(Located::at(expr, Location::span(start, &self.last_known)))
    }

    fn attempt<T, F>(&mut self, rule: F) -> Parse<T>
    where
        F: FnOnce(&mut Self) -> Parse<T>,
    {
        let mut fork = self.clone();

        let result = rule(&mut fork);
        if result.is_ok() || matches!(result, Err(Failure::Strict(_))) {
            *self = fork;
        }

        result
    }

    fn comma_separated<T, F>(&mut self, mut rule: F, allow_empty: bool) -> Parse<Vec<T>>
    where
        F: FnMut(&mut Self) -> Parse<T>,
    {
        if allow_empty && self.peek() == Some(&Token::CloseParen) {
            return Ok(Vec::new());
        }

        let mut items = vec![rule(self).map_err(Failure::strict)?];
        while self.peek() == Some(&Token::Comma) {
            self.next()?;
            items.push(rule(self).map_err(Failure::strict)?);
        }

        Ok(items)
    }

    fn id(&mut self) -> Parse<Located<Identifier>> {
        let (location, token) = self.next()?.split();
        match token {
            Token::Id(id) => Ok(Located::at(id, location)),
            _ => self.fail(ParserError::ExpectedId),
        }
    }

    fn keyword(&mut self, keyword: Keyword) -> Parse<()> {
        self.expect(Token::Keyword(keyword))
    }

    fn expect(&mut self, token: Token) -> Parse<()> {
        match self.next().map(Located::into_inner) {
            Ok(found) if found == token => Ok(()),
            Ok(found) => self.fail(ParserError::UnexpectedToken(token, found)),
            Err(error) => Err(error),
        }
    }

    /// Consume el token indicado únicamente si es el siguiente.
    fn skip(&mut self, token: Token) {
        if self.peek() == Some(&token) {
            self.cursor += 1;
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.cursor).map(Located::as_ref)
    }

    fn next(&mut self) -> Parse<Located<Token>> {
        match self.tokens.get(self.cursor) {
            Some(token) => {
                self.cursor += 1;
                self.last_known = token.location().clone();
                Ok(token.clone())
            }

            None => self.fail(ParserError::UnexpectedEof),
        }
    }

    fn fail<T>(&self, error: ParserError) -> Parse<T> {
        Err(Failure::Strict(Located::at(error, self.last_known.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::Lexer, source};

    fn parse_text(text: &str) -> Result<Ast, ParserError> {
        let (start, stream) = source::consume("test.c0", text);
        let tokens = Lexer::new(start.clone(), stream).tokenize().unwrap();

        parse(&tokens, start).map_err(Located::into_inner)
    }

    fn only_function(ast: &Ast) -> &Function {
        match ast.declarations() {
            [Declaration::Function(function)] => function,
            other => panic!("expected a single function, got {:?}", other),
        }
    }

    #[test]
    fn function_signature_and_body() {
        let ast = parse_text("int add(int a, int b) { return a + b; }").unwrap();
        let add = only_function(&ast);

        assert_eq!(add.name.as_ref().as_ref(), "add");
        assert_eq!(add.signature.as_ref().to_string(), "int(int, int)");
        assert!(matches!(
            add.body.as_slice(),
            [Statement::Return {
                value: Some(_),
                ..
            }]
        ));
    }

    #[test]
    fn type_suffixes_and_structs() {
        let ast = parse_text(
            "typedef struct { int x; int y } point; point@[4] table; int[2]@ row;",
        )
        .unwrap();

        let types: Vec<_> = ast
            .declarations()
            .iter()
            .map(|declaration| match declaration {
                Declaration::TypeAlias { of, .. } => of.as_ref().to_string(),
                Declaration::Variable(variable) => variable.of.as_ref().to_string(),
                Declaration::Function(_) => unreachable!(),
            })
            .collect();

        assert_eq!(
            types,
            vec!["struct { int x; int y; }", "point@[4]", "int[2]@"]
        );
    }

    #[test]
    fn precedence_binds_tighter_to_the_right() {
        let ast = parse_text("bool f() { return -a.b * 2 + 1 < c || d && !e; }").unwrap();
        let f = only_function(&ast);

        let value = match &f.body[0] {
            Statement::Return {
                value: Some(value), ..
            } => value.as_ref(),
            _ => unreachable!(),
        };

        let (lhs, rhs) = match value {
            Expr::Binary(lhs, BinOp::Or, rhs) => (lhs.as_ref().as_ref(), rhs.as_ref().as_ref()),
            other => panic!("unexpected root {:?}", other),
        };

        assert!(matches!(rhs, Expr::Binary(_, BinOp::And, _)));
        match lhs {
            Expr::Binary(sum, BinOp::Less, _) => match sum.as_ref().as_ref() {
                Expr::Binary(product, BinOp::Add, _) => match product.as_ref().as_ref() {
                    Expr::Binary(negated, BinOp::Mul, _) => assert!(matches!(
                        negated.as_ref().as_ref(),
                        Expr::Unary(UnOp::Negate, _)
                    )),
                    other => panic!("unexpected product {:?}", other),
                },
                other => panic!("unexpected sum {:?}", other),
            },
            other => panic!("unexpected comparison {:?}", other),
        }
    }

    #[test]
    fn declarations_and_assignments_share_prefixes() {
        let ast = parse_text(
            "int f() { node@ p = new node@; p@ = q; a[1] = 2; p.next = null; int x; x = 3; return x; }",
        )
        .unwrap();

        let kinds: Vec<_> = only_function(&ast)
            .body
            .iter()
            .map(|statement| match statement {
                Statement::Local(_) => "local",
                Statement::Assign { .. } => "assign",
                Statement::Return { .. } => "return",
                _ => "other",
            })
            .collect();

        assert_eq!(
            kinds,
            vec!["local", "assign", "assign", "assign", "local", "assign", "return"]
        );
    }

    #[test]
    fn compound_statements_take_optional_semicolons() {
        let ast = parse_text(
            "int f() { if c { x = 1; } else { x = 2; }; while c { }; { int y; } return 0; }",
        )
        .unwrap();

        let body = &only_function(&ast).body;
        assert_eq!(body.len(), 4);
        assert!(matches!(body[0], Statement::If { otherwise: Some(_), .. }));
        assert!(matches!(body[1], Statement::While { .. }));
        assert!(matches!(body[2], Statement::Block(_)));
    }

    #[test]
    fn syntax_errors() {
        assert!(matches!(
            parse_text("int[x] a;"),
            Err(ParserError::ExpectedArraySize)
        ));

        assert!(matches!(
            parse_text("int f() { return 1;"),
            Err(ParserError::UnexpectedEof)
        ));

        assert!(matches!(
            parse_text("int f() { ; }"),
            Err(ParserError::ExpectedStatement)
        ));

        assert!(matches!(parse_text("int 3;"), Err(ParserError::ExpectedId)));
        assert!(matches!(parse_text("+ x;"), Err(ParserError::ExpectedType)));
        assert!(matches!(
            parse_text("int f() { f(1); }"),
            Err(ParserError::UnexpectedToken(Token::Assign, Token::Semicolon))
        ));
    }
}
