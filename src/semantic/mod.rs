//! Análisis semántico.
//!
//! El análisis ocurre en dos pasadas sobre las declaraciones globales.
//! La primera registra todo nombre global antes de inspeccionar cualquier
//! cuerpo, lo cual permite referencias hacia adelante entre funciones.
//! La segunda valida tipos y cuerpos de función. Al validar, el
//! analizador completa las anotaciones de layout del árbol que luego
//! requiere [`crate::lower`].

use std::fmt::{self, Display};

use log::debug;
use thiserror::Error;

use crate::{
    lex::Identifier,
    parse::{Ast, BinOp, Declaration, Expr, Function, Statement, Type, UnOp, Variable},
    source::{Located, Location},
};

pub mod scope;
mod types;

use scope::{SymbolKind, SymbolTable};

pub type Semantic<T> = Result<T, Located<SemanticError>>;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SemanticError {
    #[error("Redeclaration of `{0}` in the same scope")]
    DuplicateDeclaration(Identifier),

    #[error("Symbol `{0}` is undefined")]
    UndefinedName(Identifier),

    #[error("Type `{0}` is undefined")]
    UndefinedType(Identifier),

    #[error("Type `{of}` has no field named `{field}`")]
    UndefinedField { field: Identifier, of: Type },

    #[error("Expected a variable, `{0}` is a function")]
    NotAVariable(Identifier),

    #[error("Expected a function, `{0}` is a variable")]
    NotAFunction(Identifier),

    #[error("Function `{function}` takes {expected} arguments, {found} were supplied")]
    ArgumentCountMismatch {
        function: Identifier,
        expected: usize,
        found: usize,
    },

    #[error("Type mismatch: expected {expected}, found `{found}`")]
    TypeMismatch { expected: Expected, found: Type },

    #[error("Invalid assignment target, expected a variable, field, index or dereference")]
    InvalidAssignmentTarget,

    #[error("Array size must be strictly positive")]
    InvalidArraySize,

    #[error("Type `{0}` is too large to fit in memory")]
    TypeTooLarge(Type),

    #[error("Local variables exceed the largest possible stack frame")]
    FrameTooLarge,

    #[error("Type `{0}` is defined in terms of itself")]
    CyclicType(Identifier),

    #[error("`return` outside of a function body")]
    ReturnOutsideFunction,

    #[error("Missing return value, this function returns `{0}`")]
    MissingReturnValue(Type),

    #[error("Expression has no storage location")]
    NotAddressable,

    #[error("Global initializers must be literal constants")]
    NonConstantInitializer,
}

/// Lo que se esperaba encontrar en un [`SemanticError::TypeMismatch`].
#[derive(Debug)]
pub enum Expected {
    Exactly(Type),
    Arithmetic,
    Scalar,
    Struct,
    Array,
    Pointer,
}

impl Display for Expected {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expected::Exactly(typ) => write!(fmt, "`{}`", typ),
            Expected::Arithmetic => fmt.write_str("`int` or `uint`"),
            Expected::Scalar => fmt.write_str("a type of one word"),
            Expected::Struct => fmt.write_str("a struct"),
            Expected::Array => fmt.write_str("an array"),
            Expected::Pointer => fmt.write_str("a pointer"),
        }
    }
}

/// Un árbol sintáctico que superó el análisis semántico.
///
/// Solo esta forma admite lowering, lo cual garantiza que las
/// anotaciones del árbol estén completas.
pub struct Checked<'a>(&'a Ast);

impl<'a> Checked<'a> {
    pub fn ast(&self) -> &'a Ast {
        self.0
    }
}

impl Ast {
    pub fn analyze(&self) -> Semantic<Checked<'_>> {
        let mut analyzer = Analyzer::new();

        for declaration in self.declarations() {
            analyzer.declare(declaration)?;
        }

        for declaration in self.declarations() {
            analyzer.resolve(declaration)?;
        }

        debug!(
            "Semantic analysis passed for {} declarations",
            self.declarations().len()
        );

        Ok(Checked(self))
    }
}

pub(crate) struct Analyzer<'a> {
    scope: SymbolTable<'a>,
    returns: Option<&'a Type>,

    /// Bytes de locales de la función en curso, a cualquier profundidad.
    locals: u32,
}

impl<'a> Analyzer<'a> {
    pub(crate) fn new() -> Self {
        Analyzer {
            scope: SymbolTable::new(),
            returns: None,
            locals: 0,
        }
    }

    fn declare(&mut self, declaration: &'a Declaration) -> Semantic<()> {
        match declaration {
            Declaration::TypeAlias { name, of } => self.scope.declare_type(name, of.as_ref()),

            Declaration::Variable(Variable { name, of, .. }) => {
                self.scope
                    .declare_value(name, of.as_ref(), SymbolKind::Variable, None)
            }

            Declaration::Function(function) => {
                let returns = match function.signature.as_ref() {
                    Type::Function(returns, _) => returns.as_ref(),
                    _ => unreachable!("function signature is not a function type"),
                };

                self.scope.declare_value(
                    &function.name,
                    returns,
                    SymbolKind::Function,
                    Some(function.parameters()),
                )
            }
        }
    }

    fn resolve(&mut self, declaration: &'a Declaration) -> Semantic<()> {
        match declaration {
            Declaration::TypeAlias { of, .. } => {
                self.resolve_type(of.as_ref(), of.location())?;

                // Detecta estructuras que se contienen a sí mismas por valor
                self.size_of(of.as_ref(), of.location()).map(|_| ())
            }

            Declaration::Variable(variable) => {
                if let Some(init) = &variable.init {
                    if !is_constant(init.as_ref()) {
                        return Err(Located::at(
                            SemanticError::NonConstantInitializer,
                            init.location().clone(),
                        ));
                    }
                }

                self.variable(variable)
            }

            Declaration::Function(function) => self.function(function),
        }
    }

    fn function(&mut self, function: &'a Function) -> Semantic<()> {
        let signature = &function.signature;
        self.resolve_type(signature.as_ref(), signature.location())?;

        let returns = match signature.as_ref() {
            Type::Function(returns, _) => returns.as_ref(),
            _ => unreachable!("function signature is not a function type"),
        };

        // Parámetros y retorno viajan en palabras individuales
        self.expect_scalar(returns, signature.location())?;
        for parameter in function.parameters() {
            self.expect_scalar(&parameter.of, parameter.name.location())?;
        }

        self.scope.push_scope();
        self.returns = Some(returns);
        self.locals = 0;

        let result = function.parameters().iter().try_for_each(|parameter| {
            self.scope
                .declare_value(&parameter.name, &parameter.of, SymbolKind::Variable, None)
        });

        let result = result.and_then(|()| self.statements(&function.body));

        self.returns = None;
        self.scope.pop_scope();

        result
    }

    fn variable(&mut self, variable: &'a Variable) -> Semantic<()> {
        let Variable {
            name,
            of,
            init,
            size,
        } = variable;

        self.resolve_type(of.as_ref(), of.location())?;

        let bytes = self.size_of(of.as_ref(), of.location())?;
        size.set(bytes);

        if self.returns.is_some() {
            let frame_too_large =
                || Located::at(SemanticError::FrameTooLarge, name.location().clone());

            self.locals = self
                .locals
                .checked_add(bytes)
                .filter(|&locals| locals <= types::MAX_SIZE)
                .ok_or_else(frame_too_large)?;
        }

        if let Some(init) = init {
            let found = self.expr(init)?;
            self.expect_equal(of.as_ref(), found, init.location())?;
        }

        // Los globales ya se declararon en la primera pasada
        if self.scope.depth() > 0 {
            self.scope
                .declare_value(name, of.as_ref(), SymbolKind::Variable, None)?;
        }

        Ok(())
    }

    fn statements(&mut self, statements: &'a [Statement]) -> Semantic<()> {
        statements
            .iter()
            .try_for_each(|statement| self.statement(statement))
    }

    fn statement(&mut self, statement: &'a Statement) -> Semantic<()> {
        match statement {
            Statement::Local(variable) => self.variable(variable),

            Statement::Assign {
                target,
                value,
                width,
            } => {
                if !target.as_ref().is_lvalue() {
                    return Err(Located::at(
                        SemanticError::InvalidAssignmentTarget,
                        target.location().clone(),
                    ));
                }

                let expected = self.expr(target)?;
                let found = self.expr(value)?;

                width.set(self.size_of(&expected, target.location())?);
                self.expect_equal(&expected, found, value.location())
            }

            Statement::If {
                condition,
                then,
                otherwise,
            } => {
                self.condition(condition)?;
                self.statements(then)?;

                match otherwise {
                    Some(otherwise) => self.statements(otherwise),
                    None => Ok(()),
                }
            }

            Statement::While { condition, body } => {
                self.condition(condition)?;
                self.statements(body)
            }

            Statement::Return { at, value } => {
                let returns = self.returns.ok_or_else(|| {
                    Located::at(SemanticError::ReturnOutsideFunction, at.clone())
                })?;

                match value {
                    None => Err(Located::at(
                        SemanticError::MissingReturnValue(returns.clone()),
                        at.clone(),
                    )),

                    Some(value) => {
                        let found = self.expr(value)?;
                        self.expect_equal(returns, found, value.location())
                    }
                }
            }

            Statement::Block(body) => {
                self.scope.push_scope();
                let result = self.statements(body);
                self.scope.pop_scope();

                result
            }
        }
    }

    fn condition(&mut self, condition: &'a Located<Expr>) -> Semantic<()> {
        let found = self.expr(condition)?;
        self.expect_equal(&Type::Bool, found, condition.location())
    }

    /// Verifica una expresión y obtiene su tipo.
    fn expr(&mut self, expr: &'a Located<Expr>) -> Semantic<Type> {
        let location = expr.location();

        match expr.as_ref() {
            Expr::Int { unsigned: false, .. } => Ok(Type::Int),
            Expr::Int { unsigned: true, .. } => Ok(Type::UInt),
            Expr::Char(_) => Ok(Type::Char),
            Expr::Bool(_) => Ok(Type::Bool),
            Expr::Null => Ok(Type::Null),

            Expr::Id(name) => {
                let symbol = self.scope.lookup_value(name, location)?;
                match symbol.kind {
                    SymbolKind::Variable => Ok(symbol.typ.clone()),
                    SymbolKind::Function => Err(Located::at(
                        SemanticError::NotAVariable(name.clone()),
                        location.clone(),
                    )),
                }
            }

            Expr::Call { function, args } => {
                let symbol = self
                    .scope
                    .lookup_value(function.as_ref(), function.location())?
                    .clone();

                let params = match (symbol.kind, symbol.params) {
                    (SymbolKind::Function, Some(params)) => params,
                    _ => {
                        return Err(Located::at(
                            SemanticError::NotAFunction(symbol.name),
                            function.location().clone(),
                        ))
                    }
                };

                if args.len() != params.len() {
                    return Err(Located::at(
                        SemanticError::ArgumentCountMismatch {
                            function: symbol.name,
                            expected: params.len(),
                            found: args.len(),
                        },
                        location.clone(),
                    ));
                }

                for (arg, param) in args.iter().zip(params) {
                    let found = self.expr(arg)?;
                    self.expect_equal(&param.of, found, arg.location())?;
                }

                Ok(symbol.typ.clone())
            }

            Expr::Binary(lhs, op, rhs) => {
                use BinOp::*;

                let left = self.expr(lhs)?;
                let right = self.expr(rhs)?;

                match op {
                    Add | Sub | Mul | Div => {
                        self.expect_arithmetic(&left, lhs.location())?;
                        self.expect_equal(&left, right, rhs.location())?;
                        Ok(left)
                    }

                    And | Or => {
                        self.expect_equal(&Type::Bool, left, lhs.location())?;
                        self.expect_equal(&Type::Bool, right, rhs.location())?;
                        Ok(Type::Bool)
                    }

                    // Solo se compara una palabra por operando
                    Equal | NotEqual | Less | Greater | LessOrEqual | GreaterOrEqual => {
                        self.expect_scalar(&left, lhs.location())?;
                        self.expect_equal(&left, right, rhs.location())?;
                        Ok(Type::Bool)
                    }
                }
            }

            Expr::Unary(op, operand) => {
                let found = self.expr(operand)?;
                match op {
                    UnOp::Negate => self.expect_arithmetic(&found, operand.location())?,
                    UnOp::Not => self.expect_equal(&Type::Bool, found.clone(), operand.location())?,
                }

                Ok(found)
            }

            Expr::Field {
                base,
                field,
                offset,
            } => {
                self.expect_addressable(base)?;
                let of = self.expr(base)?;

                let fields = match self.base_type(&of, base.location())? {
                    Type::Struct(fields) => fields,
                    _ => return Err(mismatch(Expected::Struct, of.clone(), base.location())),
                };

                let (position, member) = fields
                    .iter()
                    .enumerate()
                    .find(|(_, member)| member.name == *field)
                    .ok_or_else(|| {
                        let error = SemanticError::UndefinedField {
                            field: field.as_ref().clone(),
                            of: of.clone(),
                        };

                        Located::at(error, field.location().clone())
                    })?;

                let mut skipped: u32 = 0;
                for preceding in &fields[..position] {
                    let size = self.size_of(&preceding.of, field.location())?;
                    skipped = types::bounded(skipped.checked_add(size), &of, field.location())?;
                }

                offset.set(skipped);
                Ok(member.of.clone())
            }

            Expr::Index {
                base,
                index,
                stride,
            } => {
                self.expect_addressable(base)?;
                let of = self.expr(base)?;

                let element = match self.base_type(&of, base.location())? {
                    Type::Array(element, _) => element.as_ref().clone(),
                    _ => return Err(mismatch(Expected::Array, of.clone(), base.location())),
                };

                let subscript = self.expr(index)?;
                self.expect_arithmetic(&subscript, index.location())?;

                stride.set(self.size_of(&element, location)?);
                Ok(element)
            }

            Expr::Deref(base) => {
                let of = self.expr(base)?;
                match self.base_type(&of, base.location())? {
                    Type::Pointer(pointee) => Ok(pointee.as_ref().clone()),
                    _ => Err(mismatch(Expected::Pointer, of.clone(), base.location())),
                }
            }

            Expr::AddressOf(operand) => {
                self.expect_addressable(operand)?;
                let of = self.expr(operand)?;

                Ok(Type::Pointer(Box::new(of)))
            }

            Expr::Alloc { of, size } => {
                let named = Type::Named(of.as_ref().clone());
                self.base_type(&named, of.location())?;
                size.set(self.size_of(&named, of.location())?);

                Ok(Type::Pointer(Box::new(named)))
            }
        }
    }

    fn expect_equal(&self, expected: &Type, found: Type, at: &Location) -> Semantic<()> {
        if self.type_equal(expected, &found, at)? {
            Ok(())
        } else {
            Err(mismatch(Expected::Exactly(expected.clone()), found, at))
        }
    }

    fn expect_arithmetic(&self, found: &Type, at: &Location) -> Semantic<()> {
        match self.base_type(found, at)? {
            Type::Int | Type::UInt => Ok(()),
            _ => Err(mismatch(Expected::Arithmetic, found.clone(), at)),
        }
    }

    fn expect_scalar(&self, found: &Type, at: &Location) -> Semantic<()> {
        match self.size_of(found, at)? {
            types::WORD_SIZE => Ok(()),
            _ => Err(mismatch(Expected::Scalar, found.clone(), at)),
        }
    }

    fn expect_addressable(&self, expr: &Located<Expr>) -> Semantic<()> {
        if expr.as_ref().is_lvalue() {
            Ok(())
        } else {
            Err(Located::at(
                SemanticError::NotAddressable,
                expr.location().clone(),
            ))
        }
    }
}

fn mismatch(expected: Expected, found: Type, at: &Location) -> Located<SemanticError> {
    Located::at(SemanticError::TypeMismatch { expected, found }, at.clone())
}

/// Formas admitidas como inicializador de un global.
fn is_constant(expr: &Expr) -> bool {
    match expr {
        Expr::Int { .. } | Expr::Char(_) | Expr::Bool(_) | Expr::Null => true,
        Expr::Unary(UnOp::Negate, operand) => matches!(operand.as_ref().as_ref(), Expr::Int { .. }),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::Lexer, parse, source};

    fn analyze(text: &str) -> Result<(), SemanticError> {
        let (start, stream) = source::consume("semantic.c0", text);
        let tokens = Lexer::new(start.clone(), stream).tokenize().unwrap();
        let ast = parse::parse(&tokens, start).unwrap();

        let result = ast.analyze().map(|_| ()).map_err(Located::into_inner);
        result
    }

    #[test]
    fn add_function_checks() {
        analyze("int add(int a, int b) { return a + b; }").unwrap();
    }

    #[test]
    fn forward_references_between_functions() {
        analyze("int f() { return g(1); } int g(int x) { return x; }").unwrap();
    }

    #[test]
    fn argument_count_mismatch() {
        let error = analyze("int add(int a, int b) { return a + b; } int main() { return add(1, 2, 3); }")
            .unwrap_err();

        assert!(matches!(
            error,
            SemanticError::ArgumentCountMismatch {
                expected: 2,
                found: 3,
                ..
            }
        ));
    }

    #[test]
    fn undefined_field() {
        let error = analyze("struct { int x; int y; } p; int main() { return p.z; }").unwrap_err();
        assert!(matches!(
            error,
            SemanticError::UndefinedField { field, .. } if field.as_ref() == "z"
        ));
    }

    #[test]
    fn arithmetic_requires_matching_integers() {
        assert!(matches!(
            analyze("int f() { return 1 + 2u; }"),
            Err(SemanticError::TypeMismatch { .. })
        ));

        assert!(matches!(
            analyze("bool f() { return true + false; }"),
            Err(SemanticError::TypeMismatch {
                expected: Expected::Arithmetic,
                ..
            })
        ));

        analyze("uint f(uint a) { return a * 2u - a / 3u; }").unwrap();
    }

    #[test]
    fn conditions_must_be_bool() {
        assert!(matches!(
            analyze("int f() { if 1 { return 1; } return 0; }"),
            Err(SemanticError::TypeMismatch { .. })
        ));

        analyze("int f(int a) { while a < 3 && !(a == 2) { a = a + 1; } return a; }").unwrap();
    }

    #[test]
    fn assignment_targets() {
        assert!(matches!(
            analyze("int f() { int x; (x + 1) = 2; return x; }"),
            Err(SemanticError::InvalidAssignmentTarget)
        ));

        assert!(matches!(
            analyze("int f() { int x; x = true; return x; }"),
            Err(SemanticError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn names_and_kinds() {
        assert!(matches!(
            analyze("int f() { return y; }"),
            Err(SemanticError::UndefinedName(_))
        ));

        assert!(matches!(
            analyze("int f() { return f; }"),
            Err(SemanticError::NotAVariable(_))
        ));

        assert!(matches!(
            analyze("int x; int f() { return x(); }"),
            Err(SemanticError::NotAFunction(_))
        ));

        assert!(matches!(
            analyze("int x; bool x;"),
            Err(SemanticError::DuplicateDeclaration(_))
        ));
    }

    #[test]
    fn blocks_scope_their_locals() {
        analyze("int f() { int x = 1; { bool x = true; } return x; }").unwrap();

        assert!(matches!(
            analyze("int f() { { int y = 1; } return y; }"),
            Err(SemanticError::UndefinedName(_))
        ));
    }

    #[test]
    fn initializer_cannot_see_its_own_local() {
        assert!(matches!(
            analyze("int f() { int x = x; return x; }"),
            Err(SemanticError::UndefinedName(_))
        ));
    }

    #[test]
    fn pointers_and_allocation() {
        analyze(
            "typedef struct { int value; node@ next; } node;
             node@ push(node@ head, int value) {
                 node@ fresh = new node@;
                 fresh@.value = value;
                 fresh@.next = head;
                 return fresh;
             }
             bool empty(node@ head) { return head == null; }",
        )
        .unwrap();

        assert!(matches!(
            analyze("int f(int x) { return x@; }"),
            Err(SemanticError::TypeMismatch {
                expected: Expected::Pointer,
                ..
            })
        ));

        assert!(matches!(
            analyze("int f() { int@ p = new missing@; return 0; }"),
            Err(SemanticError::UndefinedType(_))
        ));
    }

    #[test]
    fn arrays_and_addresses() {
        analyze("int[4] table; int f(int i) { int@ p = table[i]&; return p@ + table[2]; }").unwrap();

        assert!(matches!(
            analyze("int[0] empty;"),
            Err(SemanticError::InvalidArraySize)
        ));

        assert!(matches!(
            analyze("int f(int x) { return x[1]; }"),
            Err(SemanticError::TypeMismatch {
                expected: Expected::Array,
                ..
            })
        ));

        assert!(matches!(
            analyze("int f(int x) { int@ p = (x + 1)&; return 0; }"),
            Err(SemanticError::NotAddressable)
        ));
    }

    #[test]
    fn returns_are_checked() {
        assert!(matches!(
            analyze("int f() { return; }"),
            Err(SemanticError::MissingReturnValue(Type::Int))
        ));

        assert!(matches!(
            analyze("int f() { return 'c'; }"),
            Err(SemanticError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn global_initializers_are_literals() {
        analyze("int a = -3; char c = 'x'; bool b = true; int@ p = null; uint u = 4u;").unwrap();

        assert!(matches!(
            analyze("int a = 1 + 2;"),
            Err(SemanticError::NonConstantInitializer)
        ));
    }

    #[test]
    fn aggregates_cannot_cross_calls() {
        assert!(matches!(
            analyze("int f(int[2] pair) { return 0; }"),
            Err(SemanticError::TypeMismatch {
                expected: Expected::Scalar,
                ..
            })
        ));
    }

    #[test]
    fn oversized_types_are_rejected() {
        assert!(matches!(
            analyze("struct { int[1073741823] a; int[1073741823] b; } s;"),
            Err(SemanticError::TypeTooLarge(_))
        ));

        assert!(matches!(
            analyze("int f() { int[1073741824] big; return 0; }"),
            Err(SemanticError::TypeTooLarge(_))
        ));

        assert!(matches!(
            analyze("typedef struct { int[300000000] a; int[300000000] b; } pair; pair@ p;"),
            Err(SemanticError::TypeTooLarge(_))
        ));
    }

    #[test]
    fn frames_are_bounded() {
        assert!(matches!(
            analyze("int f() { int[500000000] a; { int[500000000] b; } return 0; }"),
            Err(SemanticError::FrameTooLarge)
        ));

        // Cada función lleva su propia cuenta
        analyze(
            "int f() { int[500000000] a; return 0; }
             int g() { int[500000000] b; return 0; }",
        )
        .unwrap();
    }

    #[test]
    fn comparisons_need_single_words() {
        assert!(matches!(
            analyze("bool f() { int[2] a; int[2] b; return a == b; }"),
            Err(SemanticError::TypeMismatch {
                expected: Expected::Scalar,
                ..
            })
        ));

        assert!(matches!(
            analyze("struct { int x; int y; } p; bool f() { return p != p; }"),
            Err(SemanticError::TypeMismatch {
                expected: Expected::Scalar,
                ..
            })
        ));

        analyze("typedef struct { int v; } cell; cell c; bool f(int@ p) { return c == c && p != null; }")
            .unwrap();
    }

    #[test]
    fn cyclic_types_are_rejected() {
        assert!(matches!(
            analyze("typedef b a; typedef a b;"),
            Err(SemanticError::CyclicType(_))
        ));

        assert!(matches!(
            analyze("typedef struct { int v; node inner; } node;"),
            Err(SemanticError::CyclicType(_))
        ));
    }
}
