//! Rastreo de ubicaciones originales en código fuente.
//!
//! Tokens, nodos del árbol sintáctico y errores llevan consigo la
//! ubicación en el archivo original de la cual provienen. Esto permite
//! que cualquier fase posterior señale con precisión el punto en donde
//! ocurre un error.

use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::Range,
    rc::Rc,
};

/// Ancho de los divisores de tabulador.
const TAB_STOP: u32 = 4;

/// Un objeto cualquiera con una posición original asociada.
#[derive(Debug, Clone)]
pub struct Located<T> {
    location: Location,
    value: T,
}

impl<T> Located<T> {
    /// Obtiene el valor.
    pub fn val(&self) -> &T {
        &self.value
    }

    /// Obtiene la ubicación.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Descarta la ubicación y toma ownership del valor.
    pub fn into_inner(self) -> T {
        self.value
    }

    /// Descompone y toma ownership de las dos partes.
    pub fn split(self) -> (Location, T) {
        (self.location, self.value)
    }

    /// Construye a partir de un valor y una ubicación.
    pub fn at(value: T, location: Location) -> Self {
        Located { value, location }
    }

    /// Transforma el valor con la misma ubicación.
    pub fn map<U, F>(self, map: F) -> Located<U>
    where
        F: FnOnce(T) -> U,
    {
        Located {
            value: map(self.value),
            location: self.location,
        }
    }
}

impl<T> AsRef<T> for Located<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

/// La comparación ignora ubicaciones.
impl<T: PartialEq> PartialEq for Located<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: Eq> Eq for Located<T> {}

/// Un archivo fuente, con nombre y contenido separado por líneas.
pub struct Source {
    name: String,
    lines: Vec<String>,
}

impl Source {
    /// Nombre con el que se reporta este origen.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Obtiene una línea por número, comenzando en 1.
    pub fn line(&self, number: u32) -> Option<&str> {
        let index = (number as usize).checked_sub(1)?;
        self.lines.get(index).map(String::as_str)
    }
}

/// Una ubicación está conformada por un origen y un rango de posiciones.
#[derive(Clone)]
pub struct Location {
    from: Rc<Source>,
    position: Range<Position>,
}

impl Location {
    /// Unifica un rango de ubicaciones. Se asume el mismo origen.
    pub fn span(from: Location, to: &Location) -> Self {
        Location {
            from: from.from,
            position: from.position.start..to.position.end,
        }
    }

    /// Obtiene el origen.
    pub fn source(&self) -> &Source {
        &self.from
    }

    /// Obtiene la posición de inicio.
    pub fn start(&self) -> Position {
        self.position.start
    }

    /// Obtiene la posición de fin (exclusiva).
    pub fn end(&self) -> Position {
        self.position.end
    }
}

impl Display for Location {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:", self.from.name)?;

        let Range { start, end } = self.position;
        if end.line != start.line || end.column > start.column + 1 {
            write!(formatter, "[{}-{}]", start, end.back())
        } else {
            write!(formatter, "{}", start)
        }
    }
}

impl Debug for Location {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        <Self as Display>::fmt(self, formatter)
    }
}

/// Una posición línea-columna en un archivo.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Position {
    line: u32,
    column: u32,
}

impl Position {
    /// Obtiene el número de línea.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Obtiene el número de columna.
    pub fn column(&self) -> u32 {
        self.column
    }

    fn advance(self) -> Position {
        Position {
            line: self.line,
            column: self.column + 1,
        }
    }

    fn back(self) -> Position {
        Position {
            line: self.line,
            column: self.column.saturating_sub(1).max(1),
        }
    }

    fn newline(self) -> Position {
        Position {
            line: self.line + 1,
            column: 1,
        }
    }

    fn tab(self) -> Position {
        let column = 1 + ((self.column - 1) / TAB_STOP + 1) * TAB_STOP;
        Position {
            line: self.line,
            column,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Position { line: 1, column: 1 }
    }
}

impl Display for Position {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.line, self.column)
    }
}

/// Descompone un texto fuente en un flujo de caracteres ubicados.
///
/// Retorna la ubicación del primer carácter junto con el flujo. Cada
/// carácter emitido se asocia a su propia ubicación, de un solo carácter
/// de ancho. Un `'\n'` final se agrega a cada línea, incluida la última.
pub fn consume<S>(name: S, text: &str) -> (Location, impl Iterator<Item = (char, Location)>)
where
    S: Into<String>,
{
    let source = Rc::new(Source {
        name: name.into(),
        lines: text.lines().map(String::from).collect(),
    });

    let start = Location {
        from: Rc::clone(&source),
        position: Position::default()..Position::default().advance(),
    };

    let mut here = Position::default();
    let chars = (0..source.lines.len())
        .flat_map({
            let source = Rc::clone(&source);
            move |index| {
                let line: Vec<char> = source.lines[index].chars().collect();
                line.into_iter().chain(std::iter::once('\n'))
            }
        })
        .map(move |c| {
            let position = here;
            here = match c {
                '\n' => here.newline(),
                '\t' => here.tab(),
                _ => here.advance(),
            };

            let location = Location {
                from: Rc::clone(&source),
                position: position..position.advance(),
            };

            (c, location)
        });

    (start, chars)
}
