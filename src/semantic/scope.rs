//! Tabla de símbolos con alcance léxico.

use std::collections::HashMap;

use super::{Semantic, SemanticError};
use crate::{
    lex::Identifier,
    parse::{Member, Type},
    source::{Located, Location},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    Variable,
    Function,
}

/// Un nombre declarado en el espacio de valores.
///
/// Los tipos no le pertenecen a la tabla, son referencias al árbol.
/// Para funciones, `typ` es el tipo de retorno.
#[derive(Clone, Debug)]
pub struct Symbol<'a> {
    pub kind: SymbolKind,
    pub name: Identifier,
    pub typ: &'a Type,
    pub params: Option<&'a [Member]>,
}

#[derive(Default)]
struct Scope<'a> {
    values: HashMap<Identifier, Symbol<'a>>,
    types: HashMap<Identifier, &'a Type>,
}

/// Pila de alcances. El alcance más externo (global) nunca se descarta.
pub struct SymbolTable<'a> {
    scopes: Vec<Scope<'a>>,
}

impl<'a> SymbolTable<'a> {
    pub fn new() -> Self {
        SymbolTable {
            scopes: vec![Scope::default()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Descarta únicamente los nombres del alcance más interno.
    pub fn pop_scope(&mut self) {
        debug_assert!(self.scopes.len() > 1, "attempting to pop the global scope");
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Profundidad actual, el alcance global es 0.
    pub fn depth(&self) -> usize {
        self.scopes.len() - 1
    }

    pub fn declare_value(
        &mut self,
        name: &Located<Identifier>,
        typ: &'a Type,
        kind: SymbolKind,
        params: Option<&'a [Member]>,
    ) -> Semantic<()> {
        let values = &mut self.current().values;
        if values.contains_key(name.as_ref()) {
            return Err(duplicate(name));
        }

        let symbol = Symbol {
            kind,
            name: name.as_ref().clone(),
            typ,
            params,
        };

        values.insert(name.as_ref().clone(), symbol);
        Ok(())
    }

    pub fn declare_type(&mut self, name: &Located<Identifier>, typ: &'a Type) -> Semantic<()> {
        let types = &mut self.current().types;
        if types.contains_key(name.as_ref()) {
            return Err(duplicate(name));
        }

        types.insert(name.as_ref().clone(), typ);
        Ok(())
    }

    pub fn lookup_value(&self, name: &Identifier, at: &Location) -> Semantic<&Symbol<'a>> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.values.get(name))
            .ok_or_else(|| undefined(name, at))
    }

    pub fn lookup_type(&self, name: &Identifier, at: &Location) -> Semantic<&'a Type> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.types.get(name).copied())
            .ok_or_else(|| undefined(name, at))
    }

    fn current(&mut self) -> &mut Scope<'a> {
        // El alcance global existe desde la construcción
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }
}

impl Default for SymbolTable<'_> {
    fn default() -> Self {
        Self::new()
    }
}

fn duplicate(name: &Located<Identifier>) -> Located<SemanticError> {
    let error = SemanticError::DuplicateDeclaration(name.as_ref().clone());
    Located::at(error, name.location().clone())
}

fn undefined(name: &Identifier, at: &Location) -> Located<SemanticError> {
    Located::at(SemanticError::UndefinedName(name.clone()), at.clone())
}
