//! Resolución, equivalencia y layout de tipos.
//!
//! La equivalencia es estructural. Los tipos con nombre se sustituyen
//! por su definición, excepto cuando ambos lados refieren al mismo
//! nombre. Los tipos recursivos, como las listas enlazadas, solo pueden
//! referirse a sí mismos a través de punteros.

use super::{scope::SymbolKind, Analyzer, Semantic, SemanticError};
use crate::{
    lex::Identifier,
    parse::Type,
    source::{Located, Location},
};

/// Tamaño de escalares, punteros y celdas de pila.
pub const WORD_SIZE: u32 = 4;

/// Mayor tamaño de un objeto o del conjunto de locales de una función.
///
/// Deja margen para que todo desplazamiento dentro de un marco, incluidos
/// los registros preservados y los argumentos, quepa en un `i32`.
pub const MAX_SIZE: u32 = 0x7fff_0000;

impl<'a> Analyzer<'a> {
    /// Valida que un tipo esté bien formado.
    pub(super) fn resolve_type(&mut self, typ: &'a Type, at: &Location) -> Semantic<()> {
        match typ {
            Type::Int | Type::Bool | Type::Char | Type::UInt | Type::Null => Ok(()),

            Type::Named(_) => self.base_type(typ, at).map(|_| ()),

            Type::Array(_, 0) => Err(Located::at(SemanticError::InvalidArraySize, at.clone())),
            Type::Array(element, _) => self.resolve_type(element, at),

            Type::Pointer(pointee) => self.resolve_type(pointee, at),

            Type::Function(returns, parameters) => {
                self.resolve_type(returns, at)?;
                parameters
                    .iter()
                    .try_for_each(|parameter| self.resolve_type(&parameter.of, at))
            }

            // Un alcance temporal detecta campos repetidos, luego se descarta
            Type::Struct(fields) => {
                self.scope.push_scope();

                let result = fields.iter().try_for_each(|field| {
                    self.scope
                        .declare_value(&field.name, &field.of, SymbolKind::Variable, None)?;

                    self.resolve_type(&field.of, field.name.location())
                });

                self.scope.pop_scope();
                result
            }
        }
    }

    /// Sigue una cadena de nombres hasta la definición estructural.
    pub(super) fn base_type<'t>(&'t self, typ: &'t Type, at: &Location) -> Semantic<&'t Type> {
        let mut current = typ;
        let mut seen: Vec<&Identifier> = Vec::new();

        while let Type::Named(name) = current {
            if seen.contains(&name) {
                return Err(cyclic(name, at));
            }

            seen.push(name);
            current = self.named(name, at)?;
        }

        Ok(current)
    }

    /// Equivalencia estructural de tipos.
    pub(super) fn type_equal(&self, a: &Type, b: &Type, at: &Location) -> Semantic<bool> {
        self.equal(a, b, at, &mut Vec::new())
    }

    /// Tamaño en bytes de un valor del tipo.
    pub(super) fn size_of(&self, typ: &Type, at: &Location) -> Semantic<u32> {
        self.layout(typ, at, &mut Vec::new())
    }

    fn named(&self, name: &Identifier, at: &Location) -> Semantic<&'a Type> {
        self.scope.lookup_type(name, at).map_err(|error| {
            error.map(|error| match error {
                SemanticError::UndefinedName(name) => SemanticError::UndefinedType(name),
                other => other,
            })
        })
    }

    /// `assumed` contiene pares de nombres en comparación. Un par que ya
    /// está en comparación se asume equivalente, lo cual garantiza
    /// terminación para tipos recursivos.
    fn equal(
        &self,
        a: &Type,
        b: &Type,
        at: &Location,
        assumed: &mut Vec<(Identifier, Identifier)>,
    ) -> Semantic<bool> {
        use Type::*;

        let equal = match (a, b) {
            (Named(x), Named(y)) if x == y => true,

            (Named(x), Named(y)) => {
                let pair = (x.clone(), y.clone());
                if assumed.contains(&pair) {
                    return Ok(true);
                }

                assumed.push(pair);
                let (left, right) = (self.base_type(a, at)?, self.base_type(b, at)?);
                let result = self.equal(left, right, at, assumed);
                assumed.pop();

                result?
            }

            (Named(_), _) => self.equal(self.base_type(a, at)?, b, at, assumed)?,
            (_, Named(_)) => self.equal(a, self.base_type(b, at)?, at, assumed)?,

            (Int, Int) | (Bool, Bool) | (Char, Char) | (UInt, UInt) => true,
            (Null, Null) | (Null, Pointer(_)) | (Pointer(_), Null) => true,

            (Array(a, n), Array(b, m)) => n == m && self.equal(a, b, at, assumed)?,
            (Pointer(a), Pointer(b)) => self.equal(a, b, at, assumed)?,

            (Struct(a), Struct(b)) => {
                if a.len() != b.len() {
                    return Ok(false);
                }

                for (a, b) in a.iter().zip(b) {
                    if a.name != b.name || !self.equal(&a.of, &b.of, at, assumed)? {
                        return Ok(false);
                    }
                }

                true
            }

            (Function(a, p), Function(b, q)) => {
                if p.len() != q.len() || !self.equal(a, b, at, assumed)? {
                    return Ok(false);
                }

                for (p, q) in p.iter().zip(q) {
                    if !self.equal(&p.of, &q.of, at, assumed)? {
                        return Ok(false);
                    }
                }

                true
            }

            _ => false,
        };

        Ok(equal)
    }

    fn layout(&self, typ: &Type, at: &Location, visiting: &mut Vec<Identifier>) -> Semantic<u32> {
        match typ {
            Type::Int
            | Type::Bool
            | Type::Char
            | Type::UInt
            | Type::Pointer(_)
            | Type::Null
            | Type::Function(..) => Ok(WORD_SIZE),

            Type::Array(element, count) => {
                let element = self.layout(element, at, visiting)?;
                bounded(element.checked_mul(*count), typ, at)
            }

            Type::Struct(fields) => fields.iter().try_fold(0, |size: u32, field| {
                let field = self.layout(&field.of, at, visiting)?;
                bounded(size.checked_add(field), typ, at)
            }),

            Type::Named(name) => {
                if visiting.contains(name) {
                    return Err(cyclic(name, at));
                }

                visiting.push(name.clone());
                let size = self.layout(self.named(name, at)?, at, visiting);
                visiting.pop();

                size
            }
        }
    }
}

/// Descarta tamaños que desbordan o exceden [`MAX_SIZE`].
pub(super) fn bounded(size: Option<u32>, typ: &Type, at: &Location) -> Semantic<u32> {
    match size {
        Some(size) if size <= MAX_SIZE => Ok(size),
        _ => Err(Located::at(
            SemanticError::TypeTooLarge(typ.clone()),
            at.clone(),
        )),
    }
}

fn cyclic(name: &Identifier, at: &Location) -> Located<SemanticError> {
    Located::at(SemanticError::CyclicType(name.clone()), at.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parse::Member, source};
    use proptest::prelude::*;

    fn here() -> Location {
        let (start, _) = source::consume("types.c0", "");
        start
    }

    fn id(name: &str) -> Located<Identifier> {
        Located::at(Identifier::new(name), here())
    }

    fn named(name: &str) -> Type {
        Type::Named(Identifier::new(name))
    }

    fn member(name: &str, of: Type) -> Member {
        Member { name: id(name), of }
    }

    /// Alias disponibles para las pruebas, incluida una lista recursiva.
    fn aliases() -> Vec<(Located<Identifier>, Type)> {
        vec![
            (id("a0"), Type::Int),
            (id("a1"), named("a0")),
            (id("a2"), Type::Pointer(Box::new(named("a1")))),
            (id("a3"), named("a2")),
            (
                id("list"),
                Type::Struct(vec![
                    member("value", named("a1")),
                    member("next", Type::Pointer(Box::new(named("list")))),
                ]),
            ),
            (id("chain"), named("list")),
        ]
    }

    fn with_aliases<F>(aliases: &[(Located<Identifier>, Type)], check: F)
    where
        F: FnOnce(&Analyzer<'_>),
    {
        let mut analyzer = Analyzer::new();
        for (name, of) in aliases {
            analyzer.scope.declare_type(name, of).unwrap();
        }

        check(&analyzer);
    }

    fn any_type() -> impl Strategy<Value = Type> {
        let leaf = prop_oneof![
            Just(Type::Int),
            Just(Type::Bool),
            Just(Type::Char),
            Just(Type::UInt),
            Just(Type::Null),
            prop::sample::select(vec!["a0", "a1", "a2", "a3", "list", "chain"]).prop_map(named),
        ];

        leaf.prop_recursive(4, 24, 3, |inner| {
            prop_oneof![
                inner.clone().prop_map(|t| Type::Pointer(Box::new(t))),
                (inner.clone(), 1u32..4).prop_map(|(t, n)| Type::Array(Box::new(t), n)),
                prop::collection::vec(inner.clone(), 1..3).prop_map(|fields| {
                    let fields = fields
                        .into_iter()
                        .enumerate()
                        .map(|(i, of)| member(&format!("f{}", i), of))
                        .collect();

                    Type::Struct(fields)
                }),
                (inner.clone(), prop::collection::vec(inner, 0..3)).prop_map(|(r, params)| {
                    let params = params
                        .into_iter()
                        .enumerate()
                        .map(|(i, of)| member(&format!("p{}", i), of))
                        .collect();

                    Type::Function(Box::new(r), params)
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn equality_is_reflexive(typ in any_type()) {
            let aliases = aliases();
            with_aliases(&aliases, |analyzer| {
                assert!(analyzer.type_equal(&typ, &typ, &here()).unwrap());
                assert!(analyzer.type_equal(&typ, &typ.clone(), &here()).unwrap());
            });
        }

        #[test]
        fn equality_is_symmetric(a in any_type(), b in any_type()) {
            let aliases = aliases();
            with_aliases(&aliases, |analyzer| {
                let forward = analyzer.type_equal(&a, &b, &here()).unwrap();
                let backward = analyzer.type_equal(&b, &a, &here()).unwrap();
                assert_eq!(forward, backward);
            });
        }
    }

    #[test]
    fn aliases_are_transparent() {
        let aliases = aliases();
        with_aliases(&aliases, |analyzer| {
            let at = here();
            assert!(analyzer.type_equal(&named("a1"), &Type::Int, &at).unwrap());
            assert!(analyzer
                .type_equal(&named("a3"), &Type::Pointer(Box::new(Type::Int)), &at)
                .unwrap());

            assert!(!analyzer.type_equal(&named("a1"), &Type::UInt, &at).unwrap());
            assert!(analyzer.type_equal(&named("chain"), &named("list"), &at).unwrap());
        });
    }

    #[test]
    fn recursive_structs_compare_by_shape() {
        let aliases = aliases();
        with_aliases(&aliases, |analyzer| {
            let at = here();
            let unrolled = Type::Struct(vec![
                member("value", Type::Int),
                member("next", Type::Pointer(Box::new(named("chain")))),
            ]);

            assert!(analyzer.type_equal(&unrolled, &named("list"), &at).unwrap());

            let renamed = Type::Struct(vec![
                member("other", Type::Int),
                member("next", Type::Pointer(Box::new(named("list")))),
            ]);

            assert!(!analyzer.type_equal(&renamed, &named("list"), &at).unwrap());
        });
    }

    #[test]
    fn struct_equality_is_order_sensitive() {
        let analyzer = Analyzer::new();
        let at = here();

        let xy = Type::Struct(vec![member("x", Type::Int), member("y", Type::Bool)]);
        let yx = Type::Struct(vec![member("y", Type::Bool), member("x", Type::Int)]);

        assert!(!analyzer.type_equal(&xy, &yx, &at).unwrap());
        assert!(analyzer.type_equal(&xy, &xy.clone(), &at).unwrap());
    }

    #[test]
    fn layout_sums_in_declaration_order() {
        let aliases = aliases();
        with_aliases(&aliases, |analyzer| {
            let at = here();
            let record = Type::Struct(vec![
                member("tag", Type::Char),
                member("pair", Type::Array(Box::new(Type::Int), 2)),
                member("list", named("list")),
            ]);

            assert_eq!(analyzer.size_of(&record, &at).unwrap(), 4 + 8 + 8);
            assert_eq!(analyzer.size_of(&named("a3"), &at).unwrap(), WORD_SIZE);
        });
    }

    #[test]
    fn oversized_layouts_are_rejected() {
        let analyzer = Analyzer::new();
        let at = here();

        let words = |count| Type::Array(Box::new(Type::Int), count);
        let huge = Type::Struct(vec![
            member("a", words(0x3fff_ffff)),
            member("b", words(0x3fff_ffff)),
        ]);

        for typ in [words(0x4000_0000), words(u32::MAX), huge] {
            let error = analyzer.size_of(&typ, &at).unwrap_err().into_inner();
            assert!(matches!(error, SemanticError::TypeTooLarge(_)), "{}", typ);
        }

        let largest = MAX_SIZE / WORD_SIZE;
        assert_eq!(analyzer.size_of(&words(largest), &at).unwrap(), MAX_SIZE);
    }

    #[test]
    fn undefined_names_are_undefined_types() {
        let analyzer = Analyzer::new();
        let error = analyzer
            .base_type(&named("ghost"), &here())
            .unwrap_err()
            .into_inner();

        assert!(matches!(error, SemanticError::UndefinedType(name) if name.as_ref() == "ghost"));
    }
}
