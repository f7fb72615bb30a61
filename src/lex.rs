//! Análisis léxico.
//!
//! # Tokenization
//! Esta es la primera fase del compilador. Descompone un flujo de
//! caracteres ubicados (ver [`crate::source::consume`]) en unidades
//! léxicas denominadas tokens. Los espacios en blanco y los comentarios
//! se descartan durante esta operación. Cada token emitido está asociado
//! a una ubicación en el código fuente original.
//!
//! # Contenido de un token
//! Operadores, puntuación y palabras clave se identifican por lo que son
//! y no incluyen lexemas. Los identificadores sí incluyen su lexema
//! original. Las constantes literales se resuelven a sus valores.
//!
//! # Reglas importantes del lenguaje
//! - Los identificadores comienzan con una letra o `_` y distinguen
//!   mayúsculas de minúsculas.
//! - Un literal entero con sufijo `u` es de tipo `uint`.
//! - Los literales de carácter admiten únicamente ASCII imprimible.
//! - `//` inicia un comentario que termina con la línea.
//!
//! # Errores
//! El lexer se detiene ante el primer error.

use crate::source::{Located, Location};
use std::{
    fmt::{self, Display},
    rc::Rc,
    str::FromStr,
};

use thiserror::Error;

/// Error de escaneo.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LexerError {
    /// Carácter desconocido o inesperado en el flujo de entrada.
    #[error("Bad character {0:?} in input stream")]
    BadChar(char),

    /// Literal de carácter vacío o con un carácter no imprimible.
    #[error("Invalid character literal")]
    BadCharLiteral,

    /// Literal de carácter sin `'` de cierre.
    #[error("Unclosed character literal, expected `'`")]
    UnclosedCharLiteral,

    /// Una constante entera se encuentra fuera de rango.
    #[error("Integer literal overflow")]
    IntOverflow,
}

/// Un identificador.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(Rc<str>);

impl Identifier {
    pub fn new(name: &str) -> Self {
        Identifier(Rc::from(name))
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for Identifier {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(&self.0)
    }
}

/// Objeto resultante del análisis léxico.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Identificador.
    Id(Identifier),

    /// Palabra clave.
    Keyword(Keyword),

    /// Literal entero. Los valores `uint` conservan su patrón de bits.
    IntLiteral { value: i32, unsigned: bool },

    /// Literal de carácter.
    CharLiteral(char),

    /// `+`
    Plus,

    /// `-`
    Minus,

    /// `*`
    Times,

    /// `/`
    Slash,

    /// `=`
    Assign,

    /// `==`
    Equal,

    /// `!=`
    NotEqual,

    /// `<`
    Less,

    /// `>`
    Greater,

    /// `<=`
    LessOrEqual,

    /// `>=`
    GreaterOrEqual,

    /// `&&`
    And,

    /// `||`
    Or,

    /// `!`
    Not,

    /// `,`
    Comma,

    /// `;`
    Semicolon,

    /// `.`
    Period,

    /// `&`
    Ampersand,

    /// `@`
    At,

    /// `(`
    OpenParen,

    /// `)`
    CloseParen,

    /// `{`
    OpenCurly,

    /// `}`
    CloseCurly,

    /// `[`
    OpenSquare,

    /// `]`
    CloseSquare,
}

impl Display for Token {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Token::*;

        let punctuation = match self {
            Id(id) => return write!(fmt, "identifier `{}`", id),
            Keyword(keyword) => return write!(fmt, "keyword `{}`", keyword),
            IntLiteral {
                value,
                unsigned: false,
            } => return write!(fmt, "literal `{}`", value),
            IntLiteral {
                value,
                unsigned: true,
            } => return write!(fmt, "literal `{}u`", *value as u32),
            CharLiteral(c) => return write!(fmt, "literal `{:?}`", c),

            Plus => "+",
            Minus => "-",
            Times => "*",
            Slash => "/",
            Assign => "=",
            Equal => "==",
            NotEqual => "!=",
            Less => "<",
            Greater => ">",
            LessOrEqual => "<=",
            GreaterOrEqual => ">=",
            And => "&&",
            Or => "||",
            Not => "!",
            Comma => ",",
            Semicolon => ";",
            Period => ".",
            Ampersand => "&",
            At => "@",
            OpenParen => "(",
            CloseParen => ")",
            OpenCurly => "{",
            CloseCurly => "}",
            OpenSquare => "[",
            CloseSquare => "]",
        };

        write!(fmt, "`{}`", punctuation)
    }
}

/// Una palabra clave.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Keyword {
    Int,
    Bool,
    Char,
    Uint,
    True,
    False,
    Null,
    If,
    Else,
    While,
    Return,
    Typedef,
    Struct,
    New,
}

const KEYWORDS: &[(&str, Keyword)] = &[
    ("int", Keyword::Int),
    ("bool", Keyword::Bool),
    ("char", Keyword::Char),
    ("uint", Keyword::Uint),
    ("true", Keyword::True),
    ("false", Keyword::False),
    ("null", Keyword::Null),
    ("if", Keyword::If),
    ("else", Keyword::Else),
    ("while", Keyword::While),
    ("return", Keyword::Return),
    ("typedef", Keyword::Typedef),
    ("struct", Keyword::Struct),
    ("new", Keyword::New),
];

impl Display for Keyword {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, _) = KEYWORDS
            .iter()
            .find(|(_, keyword)| keyword == self)
            .expect("keyword missing from table");

        fmt.write_str(name)
    }
}

impl FromStr for Keyword {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        KEYWORDS
            .iter()
            .find(|(name, _)| *name == string)
            .map(|&(_, keyword)| keyword)
            .ok_or(())
    }
}

/// Máquina de estados para análisis léxico.
///
/// La salida del lexer, así como su siguiente estado, se define a partir
/// de tanto su estado actual como el siguiente carácter encontrado en el
/// flujo de entrada.
pub struct Lexer<S: Iterator> {
    source: std::iter::Peekable<S>,
    state: State,
    start: Location,
    next: Location,
}

/// Posibles estados del lexer.
enum State {
    /// Estado que ocurre antes de encontrar el inicio de un token.
    Start,

    /// Estado terminal tras un error; no se emiten más tokens.
    Error,

    /// Estado de completitud; siempre emite el token incluido,
    /// consume la entrada actual y pasa a [`State::Start`].
    Complete(Token),

    /// Primer carácter de un operador que puede tener dos caracteres
    /// (`=`, `!`, `<`, `>`, `&`, `|`, `/`).
    Operator(char),

    /// Comentario de línea.
    Comment,

    /// Constante entera en acumulación.
    Integer(u32),

    /// Término que puede ser un identificador o una palabra clave.
    Word(String),

    /// Se encontró `'`, sigue el carácter literal.
    Quote,

    /// Se leyó el carácter literal, falta el `'` de cierre.
    Quoted(char),
}

impl<S: Iterator<Item = (char, Location)>> Lexer<S> {
    /// Crea un lexer en estado inicial a partir de un flujo.
    pub fn new(start: Location, source: S) -> Self {
        let next = start.clone();
        Lexer {
            source: source.peekable(),
            state: State::Start,
            start,
            next,
        }
    }

    /// Consume el flujo completo, deteniéndose en el primer error.
    pub fn tokenize(self) -> Result<Vec<Located<Token>>, Located<LexerError>> {
        self.collect()
    }

    /// Intenta construir un siguiente token.
    fn lex(&mut self) -> Result<Option<(Token, Location)>, LexerError> {
        use {State::*, Token::*};

        let mut last_accepted = self.start.clone();
        let token = loop {
            let next_char = self.source.peek().map(|(c, _)| *c);

            // La posición de origen se mueve junto a la posición
            // siguiente siempre que no se haya encontrado una
            // frontera de token
            if let Start = self.state {
                if let Some((_, location)) = self.source.peek() {
                    self.next = location.clone();
                }

                self.start = self.next.clone();
            }

            // Switch table principal, determina cambios de estado
            // y de salida del lexer a partir de combinaciones del
            // estado actual y el siguiente carácter
            match (&mut self.state, next_char) {
                (Error, _) => return Ok(None),

                // Tokens triviales
                (Start, None) => return Ok(None),
                (Start, Some('+')) => self.state = Complete(Plus),
                (Start, Some('-')) => self.state = Complete(Minus),
                (Start, Some('*')) => self.state = Complete(Times),
                (Start, Some(',')) => self.state = Complete(Comma),
                (Start, Some(';')) => self.state = Complete(Semicolon),
                (Start, Some('.')) => self.state = Complete(Period),
                (Start, Some('@')) => self.state = Complete(At),
                (Start, Some('(')) => self.state = Complete(OpenParen),
                (Start, Some(')')) => self.state = Complete(CloseParen),
                (Start, Some('{')) => self.state = Complete(OpenCurly),
                (Start, Some('}')) => self.state = Complete(CloseCurly),
                (Start, Some('[')) => self.state = Complete(OpenSquare),
                (Start, Some(']')) => self.state = Complete(CloseSquare),
                (Start, Some('\'')) => self.state = Quote,

                (Start, Some(c @ ('=' | '!' | '<' | '>' | '&' | '|' | '/'))) => {
                    self.state = Operator(c)
                }

                // Identificadores y palabras clave
                (Start, Some(c)) if c.is_ascii_alphabetic() || c == '_' => {
                    self.state = Word(c.to_string())
                }

                // Inicio de una constante numérica. No se consume el
                // dígito, ya que el caso de acumulación se encarga de ello
                (Start, Some(c)) if c.is_ascii_digit() => {
                    self.state = Integer(0);
                    continue;
                }

                // Espacios en blanco y caracteres inesperados
                (Start, Some(c)) if c.is_ascii_whitespace() => (),
                (Start, Some(c)) => break Err(LexerError::BadChar(c)),

                // Emisión retardada de tokens cualesquiera
                (Complete(value), _) => break Ok(std::mem::replace(value, Plus)),

                // Operadores de dos caracteres
                (Operator(first), second) => {
                    let first = *first;
                    let pair = match (first, second) {
                        ('=', Some('=')) => Some(Equal),
                        ('!', Some('=')) => Some(NotEqual),
                        ('<', Some('=')) => Some(LessOrEqual),
                        ('>', Some('=')) => Some(GreaterOrEqual),
                        ('&', Some('&')) => Some(And),
                        ('|', Some('|')) => Some(Or),
                        ('/', Some('/')) => {
                            self.state = Comment;
                            None
                        }

                        _ => None,
                    };

                    match (pair, &self.state) {
                        (Some(token), _) => self.state = Complete(token),
                        (None, Comment) => (),

                        // El siguiente carácter no forma parte del operador
                        (None, _) => {
                            break match first {
                                '=' => Ok(Assign),
                                '!' => Ok(Not),
                                '<' => Ok(Less),
                                '>' => Ok(Greater),
                                '&' => Ok(Ampersand),
                                '/' => Ok(Slash),
                                other => Err(LexerError::BadChar(other)),
                            }
                        }
                    }
                }

                // Los comentarios descartan la línea donde ocurren
                (Comment, Some('\n')) | (Comment, None) => self.state = Start,
                (Comment, Some(_)) => (),

                // Acumulación dígito por dígito de constantes enteras
                (Integer(accumulated), Some(digit)) if digit.is_ascii_digit() => {
                    let digit = digit.to_digit(10).unwrap_or_default();

                    match accumulated
                        .checked_mul(10)
                        .and_then(|n| n.checked_add(digit))
                    {
                        Some(result) => *accumulated = result,
                        None => break Err(LexerError::IntOverflow),
                    }
                }

                // Sufijo sin signo, forma parte del literal
                (Integer(integer), Some('u')) => {
                    self.state = Complete(IntLiteral {
                        value: *integer as i32,
                        unsigned: true,
                    })
                }

                // Si sigue algo que no es un dígito, la constante ha terminado
                (Integer(integer), _) => match i32::try_from(*integer) {
                    Ok(value) => {
                        break Ok(IntLiteral {
                            value,
                            unsigned: false,
                        })
                    }

                    Err(_) => break Err(LexerError::IntOverflow),
                },

                // Extensión de términos
                (Word(word), Some(c)) if c.is_ascii_alphanumeric() || c == '_' => {
                    word.push(c);
                }

                // Si sigue algo que no puede formar parte del término, ha terminado
                (Word(word), _) => match self::Keyword::from_str(word) {
                    Ok(keyword) => break Ok(Keyword(keyword)),
                    Err(()) => break Ok(Id(Identifier::new(word))),
                },

                // Literales de carácter
                (Quote, Some(c)) if (' '..='~').contains(&c) && c != '\'' => {
                    self.state = Quoted(c)
                }

                (Quote, _) => break Err(LexerError::BadCharLiteral),
                (Quoted(c), Some('\'')) => self.state = Complete(CharLiteral(*c)),
                (Quoted(_), _) => break Err(LexerError::UnclosedCharLiteral),
            }

            // Si no hubo `continue`, aquí se consume el carácter que
            // se observó con lookahead anteriormente
            if let Some((_, location)) = self.source.next() {
                last_accepted = location.clone();
                self.next = location;
            }
        };

        token.map(|token| Some((token, last_accepted)))
    }
}

impl<S: Iterator<Item = (char, Location)>> Iterator for Lexer<S> {
    type Item = Result<Located<Token>, Located<LexerError>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.lex() {
            Ok(None) => None,
            Ok(Some((token, last_accepted))) => {
                self.state = State::Start;

                let location = Location::span(self.start.clone(), &last_accepted);
                Some(Ok(Located::at(token, location)))
            }

            Err(error) => {
                self.state = State::Error;
                Some(Err(Located::at(error, self.next.clone())))
            }
        }
    }
}
