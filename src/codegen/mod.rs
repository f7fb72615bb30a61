//! Emisión de código ensamblador.
//!
//! La salida es texto para un ensamblador de una máquina RISC de 32 bits
//! tipo MIPS. Los temporales de la IR se emiten sin asignación de
//! registros, con su nombre `t<N>` original.

use std::{
    fmt::{self, Display},
    io::{self, Write},
};

use log::debug;

use crate::ir::{Function, Operand, Program};

mod mips;

use mips::Emitter;

/// Traduce un programa completo.
pub fn emit<W: Write>(program: &Program, output: &mut W) -> io::Result<()> {
    writeln!(output, ".data")?;
    for global in &program.globals {
        writeln!(output, "{}", global)?;
    }

    writeln!(output, ".text")?;
    for function in &program.functions {
        writeln!(output, ".globl {0}\n{0}:", function.name)?;

        let cx = Context {
            output: &mut *output,
            function,
        };

        emit_function(cx)?;
    }

    Ok(())
}

fn emit_function<W: Write>(cx: Context<'_, W>) -> io::Result<()> {
    let function = cx.function();
    debug!(
        "Emitting `{}` with a frame of {} bytes",
        function.name,
        function.frame_size()
    );

    let mut emitter = Emitter::new(cx)?;
    for instruction in &function.body {
        emitter.instruction(instruction)?;
    }

    Ok(())
}

/// Estado de emisión de una función.
pub struct Context<'a, W> {
    output: &'a mut W,
    function: &'a Function,
}

impl<'a, W: Write> Context<'a, W> {
    pub fn output(&mut self) -> &mut W {
        self.output
    }

    pub fn function(&self) -> &'a Function {
        self.function
    }
}

/// Forma ensamblador de un operando.
///
/// Las etiquetas de la IR se vuelven etiquetas locales `.L<N>`.
struct Asm<'a>(&'a Operand);

impl Display for Asm<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Operand::Label(label) => write!(fmt, ".L{}", label),
            other => write!(fmt, "{}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{Global, Instruction, Opcode, Reg},
        lex::Identifier,
    };

    fn render(program: &Program) -> String {
        let mut output = Vec::new();
        emit(program, &mut output).unwrap();

        String::from_utf8(output).unwrap()
    }

    fn lines(text: &str) -> Vec<&str> {
        text.lines().map(str::trim).collect()
    }

    fn single(locals: u32, body: Vec<Instruction>) -> Program {
        Program {
            globals: Vec::new(),
            functions: vec![Function {
                name: Identifier::new("f"),
                locals,
                body,
            }],
        }
    }

    #[test]
    fn data_section_lists_globals() {
        let program = Program {
            globals: vec![
                Global {
                    name: Identifier::new("count"),
                    size: 4,
                    init: -2,
                },
                Global {
                    name: Identifier::new("table"),
                    size: 16,
                    init: 0,
                },
            ],
            functions: Vec::new(),
        };

        assert_eq!(
            render(&program),
            ".data\ncount: .word -2\ntable: .space 16\n.text\n"
        );
    }

    #[test]
    fn frame_is_saved_and_restored() {
        let text = render(&single(4, vec![Instruction::new(Opcode::Jr).src1(Reg::Ra)]));

        assert_eq!(
            lines(&text),
            vec![
                ".data",
                ".text",
                ".globl f",
                "f:",
                "addiu   $sp, $sp, -12",
                "sw      $ra, 8($sp)",
                "sw      $fp, 4($sp)",
                "add     $fp, $sp, $zero",
                "lw      $ra, 8($sp)",
                "lw      $fp, 4($sp)",
                "addiu   $sp, $sp, 12",
                "jr      $ra",
            ]
        );
    }

    #[test]
    fn wide_frames_are_adjusted_through_at() {
        let text = render(&single(40000, vec![Instruction::new(Opcode::Jr).src1(Reg::Ra)]));

        assert_eq!(
            lines(&text)[4..],
            [
                "lui     $at, 65535",
                "ori     $at, $at, 25528",
                "addu    $sp, $sp, $at",
                "lui     $at, 0",
                "ori     $at, $at, 40004",
                "add     $at, $at, $sp",
                "sw      $ra, 0($at)",
                "lui     $at, 0",
                "ori     $at, $at, 40000",
                "add     $at, $at, $sp",
                "sw      $fp, 0($at)",
                "add     $fp, $sp, $zero",
                "lui     $at, 0",
                "ori     $at, $at, 40004",
                "add     $at, $at, $sp",
                "lw      $ra, 0($at)",
                "lui     $at, 0",
                "ori     $at, $at, 40000",
                "add     $at, $at, $sp",
                "lw      $fp, 0($at)",
                "lui     $at, 0",
                "ori     $at, $at, 40008",
                "addu    $sp, $sp, $at",
                "jr      $ra",
            ]
        );
    }

    #[test]
    fn labels_become_local_symbols() {
        let text = render(&single(
            0,
            vec![
                Instruction::new(Opcode::Label).dest(Operand::Label(3)),
                Instruction::new(Opcode::Beq)
                    .dest(Operand::Label(3))
                    .src1(Operand::Temp(0))
                    .src2(Reg::Zero),
                Instruction::new(Opcode::J).dest(Operand::Label(3)),
            ],
        ));

        assert!(text.contains("\n.L3:\n"));
        assert!(text.contains("\tbeq     t0, $zero, .L3\n"));
        assert!(text.contains("\tj       .L3\n"));
    }
}
