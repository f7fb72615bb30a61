//! Representación intermedia.
//!
//! Cada función es una lista lineal de instrucciones de tres
//! direcciones sobre un conjunto ilimitado de temporales. La forma de
//! las instrucciones sigue de cerca el repertorio de la máquina
//! objetivo. Algunas son pseudoinstrucciones (`li`, `la`, `move`) que
//! [`crate::codegen`] expande.

use std::fmt::{self, Display};

use crate::lex::Identifier;

/// Bytes fijos de cada marco: `$ra` y `$fp` preservados.
pub const SAVED_REGISTERS_SIZE: u32 = 8;

pub struct Program {
    pub globals: Vec<Global>,
    pub functions: Vec<Function>,
}

pub struct Global {
    pub name: Identifier,
    pub size: u32,
    pub init: i32,
}

/// `name: .word init`, o `name: .space size` para agregados.
impl Display for Global {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.size > 4 {
            write!(fmt, "{}: .space {}", self.name, self.size)
        } else {
            write!(fmt, "{}: .word {}", self.name, self.init)
        }
    }
}

pub struct Function {
    pub name: Identifier,

    /// Bytes ocupados por variables locales.
    pub locals: u32,
    pub body: Vec<Instruction>,
}

impl Function {
    pub fn frame_size(&self) -> u32 {
        frame_size(self.locals)
    }
}

/// Tamaño total del marco de pila, alineado a 4 bytes.
///
/// El análisis semántico acota `locals`, por lo cual el resultado cabe
/// en un `i32`. Marcos de más de 32 KiB no caben en un inmediato y
/// [`crate::codegen`] los ajusta a través de `$at`.
pub fn frame_size(locals: u32) -> u32 {
    (SAVED_REGISTERS_SIZE + locals + 3) & !3
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reg {
    Zero,

    /// Reservado para expandir inmediatos fuera de rango.
    At,
    Sp,
    Fp,
    Ra,
    V0,
    A0,
    A1,
}

impl Display for Reg {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reg::Zero => "$zero",
            Reg::At => "$at",
            Reg::Sp => "$sp",
            Reg::Fp => "$fp",
            Reg::Ra => "$ra",
            Reg::V0 => "$v0",
            Reg::A0 => "$a0",
            Reg::A1 => "$a1",
        };

        fmt.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    Temp(u32),
    Label(u32),
    Reg(Reg),
    Symbol(Identifier),
}

impl Display for Operand {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Temp(temp) => write!(fmt, "t{}", temp),
            Operand::Label(label) => write!(fmt, "L{}", label),
            Operand::Reg(reg) => write!(fmt, "{}", reg),
            Operand::Symbol(symbol) => write!(fmt, "{}", symbol),
        }
    }
}

impl From<Reg> for Operand {
    fn from(reg: Reg) -> Self {
        Operand::Reg(reg)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Opcode {
    Lw,
    Sw,
    Addi,
    Addiu,
    Slti,
    Sltiu,
    Andi,
    Ori,
    Xori,
    Lui,
    Add,
    Addu,
    Sub,
    Subu,
    And,
    Or,
    Xor,
    Nor,
    Slt,
    Sltu,
    Srl,
    Bltz,
    Bgez,
    Beq,
    Bne,
    Blez,
    Bgtz,
    J,
    Jal,
    Jr,
    Jalr,
    Syscall,
    Eret,
    Movg2s,
    Movs2g,
    Label,
    Li,
    La,
    Move,
    Nop,
}

/// Disposición de operandos de una instrucción en ensamblador.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Format {
    /// `op dest, src1, src2`
    Register,

    /// `op dest, src1, imm`
    Immediate,

    /// `op dest, imm(src1)`
    Memory,

    /// `op dest, imm`
    Upper,

    /// `op src1, dest`
    BranchZero,

    /// `op src1, src2, dest`
    Branch,

    /// `op dest`
    Jump,

    /// `op src1`
    JumpRegister,

    /// `op dest, src1`
    Pair,

    /// `op`
    Bare,

    /// `dest:`
    Label,
}

impl Opcode {
    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;

        match self {
            Lw => "lw",
            Sw => "sw",
            Addi => "addi",
            Addiu => "addiu",
            Slti => "slti",
            Sltiu => "sltiu",
            Andi => "andi",
            Ori => "ori",
            Xori => "xori",
            Lui => "lui",
            Add => "add",
            Addu => "addu",
            Sub => "sub",
            Subu => "subu",
            And => "and",
            Or => "or",
            Xor => "xor",
            Nor => "nor",
            Slt => "slt",
            Sltu => "sltu",
            Srl => "srl",
            Bltz => "bltz",
            Bgez => "bgez",
            Beq => "beq",
            Bne => "bne",
            Blez => "blez",
            Bgtz => "bgtz",
            J => "j",
            Jal => "jal",
            Jr => "jr",
            Jalr => "jalr",
            Syscall => "syscall",
            Eret => "eret",
            Movg2s => "movg2s",
            Movs2g => "movs2g",
            Label => "label",
            Li => "li",
            La => "la",
            Move => "move",
            Nop => "nop",
        }
    }

    pub fn format(self) -> Format {
        use Opcode::*;

        match self {
            Add | Addu | Sub | Subu | And | Or | Xor | Nor | Slt | Sltu => Format::Register,
            Addi | Addiu | Slti | Sltiu | Andi | Ori | Xori | Srl => Format::Immediate,
            Lw | Sw => Format::Memory,
            Lui | Li => Format::Upper,
            Bltz | Bgez | Blez | Bgtz => Format::BranchZero,
            Beq | Bne => Format::Branch,
            J | Jal => Format::Jump,
            Jr => Format::JumpRegister,
            Jalr | Movg2s | Movs2g | La | Move => Format::Pair,
            Syscall | Eret | Nop => Format::Bare,
            Label => Format::Label,
        }
    }

    /// Equivalente con registro de una instrucción con inmediato.
    pub fn register_form(self) -> Option<Opcode> {
        use Opcode::*;

        let op = match self {
            Addi => Add,
            Addiu => Addu,
            Slti => Slt,
            Sltiu => Sltu,
            Andi => And,
            Ori => Or,
            Xori => Xor,
            _ => return None,
        };

        Some(op)
    }

    fn has_immediate(self) -> bool {
        matches!(
            self.format(),
            Format::Immediate | Format::Memory | Format::Upper
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub op: Opcode,
    pub dest: Option<Operand>,
    pub src1: Option<Operand>,
    pub src2: Option<Operand>,
    pub imm: i32,
}

impl Instruction {
    pub fn new(op: Opcode) -> Self {
        Instruction {
            op,
            dest: None,
            src1: None,
            src2: None,
            imm: 0,
        }
    }

    pub fn dest<O: Into<Operand>>(self, dest: O) -> Self {
        Instruction {
            dest: Some(dest.into()),
            ..self
        }
    }

    pub fn src1<O: Into<Operand>>(self, src1: O) -> Self {
        Instruction {
            src1: Some(src1.into()),
            ..self
        }
    }

    pub fn src2<O: Into<Operand>>(self, src2: O) -> Self {
        Instruction {
            src2: Some(src2.into()),
            ..self
        }
    }

    pub fn imm(self, imm: i32) -> Self {
        Instruction { imm, ..self }
    }
}

/// Forma textual de depuración: `op dest, src1, src2` o `op dest, src1, imm`.
impl Display for Instruction {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.op == Opcode::Label {
            if let Some(label) = &self.dest {
                return write!(fmt, "{}:", label);
            }
        }

        fmt.write_str(self.op.mnemonic())?;

        let mut operands = [&self.dest, &self.src1, &self.src2]
            .into_iter()
            .flatten()
            .map(ToString::to_string)
            .collect::<Vec<_>>();

        if self.src2.is_none() && self.op.has_immediate() {
            operands.push(self.imm.to_string());
        }

        if !operands.is_empty() {
            write!(fmt, " {}", operands.join(", "))?;
        }

        Ok(())
    }
}

impl Display for Program {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(fmt, ".data")?;
        for global in &self.globals {
            writeln!(fmt, "{}", global)?;
        }

        writeln!(fmt, ".text")?;
        for function in &self.functions {
            writeln!(fmt, "{}:", function.name)?;
            for instruction in &function.body {
                match instruction.op {
                    Opcode::Label => writeln!(fmt, "{}", instruction)?,
                    _ => writeln!(fmt, "  {}", instruction)?,
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_sizes_are_word_aligned() {
        let frame = |locals| {
            Function {
                name: Identifier::new("f"),
                locals,
                body: Vec::new(),
            }
            .frame_size()
        };

        assert_eq!(frame(0), 8);
        assert_eq!(frame(4), 12);
        assert_eq!(frame(8), 16);
        assert_eq!(frame(5), 16);
    }

    #[test]
    fn dump_lists_operands_in_order() {
        let add = Instruction::new(Opcode::Add)
            .dest(Operand::Temp(2))
            .src1(Operand::Temp(0))
            .src2(Operand::Temp(1));

        let load = Instruction::new(Opcode::Lw)
            .dest(Operand::Temp(3))
            .src1(Reg::Fp)
            .imm(-8);

        let branch = Instruction::new(Opcode::Beq)
            .dest(Operand::Label(4))
            .src1(Operand::Temp(3))
            .src2(Reg::Zero);

        let label = Instruction::new(Opcode::Label).dest(Operand::Label(4));
        let jump = Instruction::new(Opcode::Jr).src1(Reg::Ra);

        assert_eq!(add.to_string(), "add t2, t0, t1");
        assert_eq!(load.to_string(), "lw t3, $fp, -8");
        assert_eq!(branch.to_string(), "beq L4, t3, $zero");
        assert_eq!(label.to_string(), "L4:");
        assert_eq!(jump.to_string(), "jr $ra");
        assert_eq!(Instruction::new(Opcode::Syscall).to_string(), "syscall");
    }

    #[test]
    fn program_dump() {
        let program = Program {
            globals: vec![Global {
                name: Identifier::new("counter"),
                size: 4,
                init: 7,
            }],
            functions: vec![Function {
                name: Identifier::new("main"),
                locals: 0,
                body: vec![
                    Instruction::new(Opcode::Li).dest(Operand::Temp(0)).imm(1),
                    Instruction::new(Opcode::Jr).src1(Reg::Ra),
                ],
            }],
        };

        assert_eq!(
            program.to_string(),
            ".data\ncounter: .word 7\n.text\nmain:\n  li t0, 1\n  jr $ra\n"
        );
    }
}
