//! Instrucciones para la máquina objetivo tipo MIPS.
//!
//! # Marco de pila
//! El prólogo reserva el marco completo y preserva `$ra` y `$fp` en sus
//! dos palabras superiores. `$fp` apunta a la base del marco durante todo
//! el cuerpo de la función, por lo cual las locales y los argumentos se
//! direccionan con desplazamientos positivos respecto a él.
//!
//! # Inmediatos
//! Los inmediatos son de 16 bits con signo. Un valor fuera de ese rango
//! se carga primero en `$at`, registro que la IR nunca asigna.

use std::{
    fmt::Display,
    io::{self, Write},
};

use super::{Asm, Context};
use crate::ir::{Format, Instruction, Opcode, Operand, Reg};

pub struct Emitter<'a, W> {
    cx: Context<'a, W>,
    frame: i32,
}

impl<'a, W: Write> Emitter<'a, W> {
    /// Construye el emisor y escribe el prólogo.
    pub fn new(cx: Context<'a, W>) -> io::Result<Self> {
        let frame = cx.function().frame_size() as i32;
        let mut emitter = Emitter { cx, frame };

        let sp = Operand::Reg(Reg::Sp);
        emitter.arithmetic(Opcode::Addiu, &sp, &sp, -frame)?;
        emitter.memory("sw", &Reg::Ra, &sp, frame - 4)?;
        emitter.memory("sw", &Reg::Fp, &sp, frame - 8)?;
        emit!(emitter.cx, "add", "$fp, $sp, $zero")?;

        Ok(emitter)
    }

    pub fn instruction(&mut self, instruction: &Instruction) -> io::Result<()> {
        let Instruction { op, imm, .. } = *instruction;
        let mnemonic = op.mnemonic();

        match (op, op.format()) {
            (Opcode::Label, _) => {
                let label = Asm(operand(&instruction.dest));
                writeln!(self.cx.output(), "{}:", label)
            }

            (Opcode::Li, _) => self.load_immediate(operand(&instruction.dest), imm),

            (Opcode::La, _) => {
                let (dest, symbol) = (operand(&instruction.dest), operand(&instruction.src1));
                emit!(self.cx, "lui", "{}, %hi({})", dest, symbol)?;
                emit!(self.cx, "addi", "{0}, {0}, %lo({1})", dest, symbol)
            }

            (Opcode::Move, _) => {
                let (dest, source) = (operand(&instruction.dest), operand(&instruction.src1));
                emit!(self.cx, "add", "{}, {}, $zero", dest, source)
            }

            (Opcode::Jr, _) if instruction.src1 == Some(Operand::Reg(Reg::Ra)) => self.epilogue(),

            (_, Format::Register) => {
                let (dest, lhs, rhs) = (
                    operand(&instruction.dest),
                    operand(&instruction.src1),
                    operand(&instruction.src2),
                );

                emit!(self.cx, mnemonic, "{}, {}, {}", dest, lhs, rhs)
            }

            (_, Format::Immediate) => {
                let (dest, source) = (operand(&instruction.dest), operand(&instruction.src1));
                self.arithmetic(op, dest, source, imm)
            }

            (_, Format::Memory) => {
                let (value, base) = (operand(&instruction.dest), operand(&instruction.src1));
                self.memory(mnemonic, value, base, imm)
            }

            (_, Format::Upper) => {
                let dest = operand(&instruction.dest);
                emit!(self.cx, mnemonic, "{}, {}", dest, imm)
            }

            (_, Format::BranchZero) => {
                let (source, target) = (operand(&instruction.src1), operand(&instruction.dest));
                emit!(self.cx, mnemonic, "{}, {}", source, Asm(target))
            }

            (_, Format::Branch) => {
                let (lhs, rhs, target) = (
                    operand(&instruction.src1),
                    operand(&instruction.src2),
                    operand(&instruction.dest),
                );

                emit!(self.cx, mnemonic, "{}, {}, {}", lhs, rhs, Asm(target))
            }

            (_, Format::Jump) => {
                let target = operand(&instruction.dest);
                emit!(self.cx, mnemonic, "{}", Asm(target))
            }

            (_, Format::JumpRegister) => {
                let target = operand(&instruction.src1);
                emit!(self.cx, mnemonic, "{}", target)
            }

            (_, Format::Pair) => {
                let (dest, source) = (operand(&instruction.dest), operand(&instruction.src1));
                emit!(self.cx, mnemonic, "{}, {}", dest, source)
            }

            (_, Format::Bare) => emit!(self.cx, mnemonic),

            (_, Format::Label) => unreachable!("label opcode handled above"),
        }
    }

    /// Restaura el marco del llamador y retorna.
    fn epilogue(&mut self) -> io::Result<()> {
        let frame = self.frame;
        let sp = Operand::Reg(Reg::Sp);

        self.memory("lw", &Reg::Ra, &sp, frame - 4)?;
        self.memory("lw", &Reg::Fp, &sp, frame - 8)?;
        self.arithmetic(Opcode::Addiu, &sp, &sp, frame)?;
        emit!(self.cx, "jr", "$ra")
    }

    /// `op dest, source, imm`, o su forma con registro sobre `$at`.
    fn arithmetic(
        &mut self,
        op: Opcode,
        dest: &Operand,
        source: &Operand,
        imm: i32,
    ) -> io::Result<()> {
        match op.register_form() {
            Some(register) if !fits(imm) => {
                self.load_immediate(&AT, imm)?;
                emit!(self.cx, register.mnemonic(), "{}, {}, {}", dest, source, AT)
            }

            _ => emit!(self.cx, op.mnemonic(), "{}, {}, {}", dest, source, imm),
        }
    }

    /// Acceso a `imm(base)`. Un desplazamiento amplio se suma a la base
    /// en `$at`.
    fn memory<V: Display>(
        &mut self,
        mnemonic: &str,
        value: &V,
        base: &Operand,
        imm: i32,
    ) -> io::Result<()> {
        if fits(imm) {
            emit!(self.cx, mnemonic, "{}, {}({})", value, imm, base)
        } else {
            self.load_immediate(&AT, imm)?;
            emit!(self.cx, "add", "{0}, {0}, {1}", AT, base)?;
            emit!(self.cx, mnemonic, "{}, 0({})", value, AT)
        }
    }

    /// Constantes de 16 bits caben en una sola instrucción.
    fn load_immediate(&mut self, dest: &Operand, value: i32) -> io::Result<()> {
        if fits(value) {
            emit!(self.cx, "addi", "{}, $zero, {}", dest, value)
        } else {
            let (high, low) = split(value);
            emit!(self.cx, "lui", "{}, {}", dest, high)?;
            emit!(self.cx, "ori", "{0}, {0}, {1}", dest, low)
        }
    }
}

const AT: Operand = Operand::Reg(Reg::At);

fn fits(imm: i32) -> bool {
    i16::try_from(imm).is_ok()
}

/// Mitades alta y baja de una constante de 32 bits, sin signo.
fn split(value: i32) -> (u32, u32) {
    let value = value as u32;
    (value >> 16, value & 0xffff)
}

fn operand(operand: &Option<Operand>) -> &Operand {
    operand.as_ref().expect("instruction is missing an operand")
}
