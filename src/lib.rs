//! Compilador para el lenguaje de enseñanza C0.
//!
//! # Front end
//! Cada programa deriva de un único archivo de código fuente.
//! Este archivo se somete primero a análisis léxico en [`lex`], de
//! lo cual se obtiene un flujo de tokens. El flujo de tokens se
//! dispone en un AST por medio de análisis sintáctico en [`parse`].
//! El árbol sintáctico es procesado por análisis semántico en
//! [`semantic`], que verifica nombres y tipos y anota el árbol con la
//! información de layout que requieren las fases siguientes.
//!
//! # Back end
//! Un árbol verificado se traduce en [`lower`] a la representación
//! intermedia descrita en [`ir`]: instrucciones de tres direcciones
//! sobre temporales ilimitados, cercanas al repertorio objetivo.
//! Finalmente [`codegen`] emite ensamblador para una máquina RISC de
//! 32 bits tipo MIPS, con marcos de pila y expansión de
//! pseudoinstrucciones. Ensamblado y enlazado quedan fuera de este
//! crate, al igual que las rutinas de soporte `mult` y `div`.

#[macro_use]
mod macros;

pub mod codegen;
pub mod error;
pub mod ir;
pub mod lex;
pub mod lower;
pub mod parse;
pub mod semantic;
pub mod source;
