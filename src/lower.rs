//! Generación de IR a partir de un árbol verificado.
//!
//! El lowering asume que el análisis semántico ya validó tipos y
//! nombres, por lo cual no reporta errores. Los nombres de temporales y
//! etiquetas son únicos en todo el programa, no solo por función.
//!
//! # Marco de pila
//! ```text
//!  $fp + F + 4(n-1) -> argumento 0
//!  ...
//!  $fp + F          -> argumento n-1
//!  $fp + F - 4      -> $ra preservado
//!  $fp + F - 8      -> $fp preservado
//!  $fp + 0 ...      -> variables locales, en orden de declaración
//! ```
//! Donde `F` es [`ir::frame_size`] y `n` la cantidad de parámetros.

use std::collections::HashMap;

use log::debug;

use crate::{
    ir::{self, Instruction, Opcode, Operand, Reg},
    lex::Identifier,
    parse::{Annotation, BinOp, Declaration, Expr, Function, Statement, UnOp, Variable},
    semantic::Checked,
    source::Located,
};

const WORD: u32 = 4;

/// Código de la llamada al sistema que reserva memoria.
const SBRK: i32 = 9;

/// Contadores de nombres de una misma compilación.
#[derive(Default)]
pub struct Names {
    temps: u32,
    labels: u32,
}

impl Names {
    fn temp(&mut self) -> Operand {
        self.temps += 1;
        Operand::Temp(self.temps - 1)
    }

    fn label(&mut self) -> Operand {
        self.labels += 1;
        Operand::Label(self.labels - 1)
    }
}

#[derive(Copy, Clone)]
enum Storage {
    Global,
    Frame(i32),
}

impl Checked<'_> {
    pub fn lower(&self) -> ir::Program {
        self.lower_with(&mut Names::default())
    }

    /// Lowering con contadores externos. Programas generados con los
    /// mismos contadores no comparten nombres.
    pub fn lower_with(&self, names: &mut Names) -> ir::Program {
        let declarations = self.ast().declarations();

        let globals: Vec<_> = declarations
            .iter()
            .filter_map(|declaration| match declaration {
                Declaration::Variable(variable) => Some(global(variable)),
                _ => None,
            })
            .collect();

        let storage: HashMap<_, _> = globals
            .iter()
            .map(|global| (global.name.clone(), Storage::Global))
            .collect();

        let functions = declarations
            .iter()
            .filter_map(|declaration| match declaration {
                Declaration::Function(function) => Some(function),
                _ => None,
            })
            .map(|function| {
                let builder = Builder {
                    names: &mut *names,
                    scopes: vec![storage.clone()],
                    next_local: 0,
                    body: Vec::new(),
                };

                builder.function(function)
            })
            .collect();

        ir::Program { globals, functions }
    }
}

fn global(variable: &Variable) -> ir::Global {
    let init = match &variable.init {
        None => 0,
        Some(init) => match init.as_ref() {
            Expr::Int { value, .. } => *value,
            Expr::Char(c) => *c as i32,
            Expr::Bool(b) => *b as i32,
            Expr::Null => 0,
            Expr::Unary(UnOp::Negate, operand) => match operand.as_ref().as_ref() {
                Expr::Int { value, .. } => value.wrapping_neg(),
                _ => unreachable!("non-constant global initializer"),
            },

            _ => unreachable!("non-constant global initializer"),
        },
    };

    ir::Global {
        name: variable.name.as_ref().clone(),
        size: annotated(&variable.size),
        init,
    }
}

fn annotated(annotation: &Annotation) -> u32 {
    annotation.get().expect("lowering an unchecked tree")
}

/// Bytes de todas las declaraciones locales, a cualquier profundidad.
fn local_bytes(statements: &[Statement]) -> u32 {
    statements
        .iter()
        .map(|statement| match statement {
            Statement::Local(variable) => annotated(&variable.size),
            Statement::If {
                then, otherwise, ..
            } => local_bytes(then) + otherwise.as_deref().map_or(0, local_bytes),
            Statement::While { body, .. } | Statement::Block(body) => local_bytes(body),
            Statement::Assign { .. } | Statement::Return { .. } => 0,
        })
        .sum()
}

struct Builder<'n> {
    names: &'n mut Names,
    scopes: Vec<HashMap<Identifier, Storage>>,
    next_local: u32,
    body: Vec<Instruction>,
}

impl Builder<'_> {
    fn function(mut self, function: &Function) -> ir::Function {
        let locals = local_bytes(&function.body);
        let frame = ir::frame_size(locals);

        let parameters = function.parameters();
        let count = parameters.len() as u32;

        let arguments = parameters
            .iter()
            .enumerate()
            .map(|(i, parameter)| {
                let offset = frame + WORD * (count - 1 - i as u32);
                (parameter.name.as_ref().clone(), Storage::Frame(offset as i32))
            })
            .collect();

        self.scopes.push(arguments);
        self.statements(&function.body);

        // Toda función tiene una salida alcanzable
        self.push(Instruction::new(Opcode::Jr).src1(Reg::Ra));

        let name = function.name.as_ref().clone();
        debug!(
            "Lowered `{}`: {} instructions, {} bytes of locals",
            name,
            self.body.len(),
            locals
        );

        ir::Function {
            name,
            locals,
            body: self.body,
        }
    }

    fn statements(&mut self, statements: &[Statement]) {
        for statement in statements {
            self.statement(statement);
        }
    }

    fn statement(&mut self, statement: &Statement) {
        match statement {
            Statement::Local(variable) => {
                let size = annotated(&variable.size);
                let offset = self.next_local as i32;
                self.next_local += size;

                // El inicializador aún no ve al nuevo local
                if let Some(init) = &variable.init {
                    let target = self.temp();
                    self.push(
                        Instruction::new(Opcode::Addi)
                            .dest(target.clone())
                            .src1(Reg::Fp)
                            .imm(offset),
                    );

                    self.store(target, init, size);
                }

                let scope = self.scopes.last_mut().expect("no function scope");
                scope.insert(variable.name.as_ref().clone(), Storage::Frame(offset));
            }

            // El lado derecho se evalúa antes que la dirección destino
            Statement::Assign {
                target,
                value,
                width,
            } => {
                let width = annotated(width);
                if width == WORD {
                    let value = self.value(value);
                    let target = self.address(target);
                    self.push(Instruction::new(Opcode::Sw).dest(value).src1(target));
                } else {
                    let source = self.address(value);
                    let target = self.address(target);
                    self.copy(target, source, width);
                }
            }

            Statement::If {
                condition,
                then,
                otherwise,
            } => {
                let condition = self.value(condition);
                let (otherwise_label, end) = (self.label(), self.label());

                self.branch_if_zero(condition, otherwise_label.clone());
                self.statements(then);
                self.push(Instruction::new(Opcode::J).dest(end.clone()));

                self.push(Instruction::new(Opcode::Label).dest(otherwise_label));
                if let Some(otherwise) = otherwise {
                    self.statements(otherwise);
                }

                self.push(Instruction::new(Opcode::Label).dest(end));
            }

            Statement::While { condition, body } => {
                let (start, end) = (self.label(), self.label());

                self.push(Instruction::new(Opcode::Label).dest(start.clone()));
                let condition = self.value(condition);
                self.branch_if_zero(condition, end.clone());

                self.statements(body);
                self.push(Instruction::new(Opcode::J).dest(start));
                self.push(Instruction::new(Opcode::Label).dest(end));
            }

            Statement::Return { value, .. } => {
                if let Some(value) = value {
                    let value = self.value(value);
                    self.push(Instruction::new(Opcode::Move).dest(Reg::V0).src1(value));
                }

                self.push(Instruction::new(Opcode::Jr).src1(Reg::Ra));
            }

            Statement::Block(body) => {
                self.scopes.push(HashMap::new());
                self.statements(body);
                self.scopes.pop();
            }
        }
    }

    /// Almacena el resultado de `value` en la dirección `target`.
    fn store(&mut self, target: Operand, value: &Located<Expr>, width: u32) {
        if width == WORD {
            let value = self.value(value);
            self.push(Instruction::new(Opcode::Sw).dest(value).src1(target));
        } else {
            let source = self.address(value);
            self.copy(target, source, width);
        }
    }

    /// Copia palabra por palabra entre dos direcciones. Una estructura
    /// vacía no copia nada.
    fn copy(&mut self, target: Operand, source: Operand, width: u32) {
        for offset in (0..width).step_by(WORD as usize) {
            let word = self.temp();
            self.push(
                Instruction::new(Opcode::Lw)
                    .dest(word.clone())
                    .src1(source.clone())
                    .imm(offset as i32),
            );

            self.push(
                Instruction::new(Opcode::Sw)
                    .dest(word)
                    .src1(target.clone())
                    .imm(offset as i32),
            );
        }
    }

    fn branch_if_zero(&mut self, condition: Operand, label: Operand) {
        self.push(
            Instruction::new(Opcode::Beq)
                .dest(label)
                .src1(condition)
                .src2(Reg::Zero),
        );
    }

    /// Calcula la dirección de una expresión con ubicación en memoria.
    fn address(&mut self, expr: &Located<Expr>) -> Operand {
        match expr.as_ref() {
            Expr::Id(name) => {
                let target = self.temp();
                let instruction = match self.storage(name) {
                    Storage::Global => Instruction::new(Opcode::La)
                        .dest(target.clone())
                        .src1(Operand::Symbol(name.clone())),

                    Storage::Frame(offset) => Instruction::new(Opcode::Addi)
                        .dest(target.clone())
                        .src1(Reg::Fp)
                        .imm(offset),
                };

                self.push(instruction);
                target
            }

            Expr::Field { base, offset, .. } => {
                let base = self.address(base);
                let target = self.temp();

                self.push(
                    Instruction::new(Opcode::Addi)
                        .dest(target.clone())
                        .src1(base)
                        .imm(annotated(offset) as i32),
                );

                target
            }

            Expr::Index {
                base,
                index,
                stride,
            } => {
                let base = self.address(base);
                let index = self.value(index);
                let scaled = self.scale(index, annotated(stride));

                self.binary(Opcode::Add, base, scaled)
            }

            Expr::Deref(pointer) => self.value(pointer),

            _ => unreachable!("expression has no address"),
        }
    }

    /// Evalúa una expresión hacia un temporal.
    fn value(&mut self, expr: &Located<Expr>) -> Operand {
        match expr.as_ref() {
            Expr::Int { value, .. } => self.constant(*value),
            Expr::Char(c) => self.constant(*c as i32),
            Expr::Bool(b) => self.constant(*b as i32),
            Expr::Null => self.constant(0),

            Expr::Id(_) | Expr::Field { .. } | Expr::Index { .. } | Expr::Deref(_) => {
                let address = self.address(expr);
                let target = self.temp();
                self.push(
                    Instruction::new(Opcode::Lw)
                        .dest(target.clone())
                        .src1(address),
                );

                target
            }

            Expr::AddressOf(operand) => self.address(operand),

            Expr::Call { function, args } => {
                let args: Vec<_> = args.iter().map(|arg| self.value(arg)).collect();
                let stack = (WORD as usize * args.len()) as i32;

                for (i, arg) in args.into_iter().enumerate() {
                    self.push(
                        Instruction::new(Opcode::Sw)
                            .dest(arg)
                            .src1(Reg::Sp)
                            .imm(-(WORD as i32) * (i as i32 + 1)),
                    );
                }

                if stack > 0 {
                    self.adjust_stack(-stack);
                }

                let callee = Operand::Symbol(function.as_ref().clone());
                self.push(Instruction::new(Opcode::Jal).dest(callee));

                if stack > 0 {
                    self.adjust_stack(stack);
                }

                self.result()
            }

            Expr::Binary(lhs, op, rhs) => {
                let lhs = self.value(lhs);
                let rhs = self.value(rhs);
                self.operator(*op, lhs, rhs)
            }

            Expr::Unary(UnOp::Negate, operand) => {
                let operand = self.value(operand);
                self.binary(Opcode::Sub, Operand::Reg(Reg::Zero), operand)
            }

            Expr::Unary(UnOp::Not, operand) => {
                let operand = self.value(operand);
                self.immediate(Opcode::Xori, operand, 1)
            }

            Expr::Alloc { size, .. } => {
                let size = annotated(size) as i32;
                self.push(Instruction::new(Opcode::Li).dest(Reg::A0).imm(size));
                self.push(Instruction::new(Opcode::Li).dest(Reg::V0).imm(SBRK));
                self.push(Instruction::new(Opcode::Syscall));

                self.result()
            }
        }
    }

    fn operator(&mut self, op: BinOp, lhs: Operand, rhs: Operand) -> Operand {
        match op {
            BinOp::Add => self.binary(Opcode::Add, lhs, rhs),
            BinOp::Sub => self.binary(Opcode::Sub, lhs, rhs),
            BinOp::And => self.binary(Opcode::And, lhs, rhs),
            BinOp::Or => self.binary(Opcode::Or, lhs, rhs),

            BinOp::Mul => self.helper("mult", lhs, rhs),
            BinOp::Div => self.helper("div", lhs, rhs),

            // 1 si y solo si la diferencia es 0
            BinOp::Equal => {
                let difference = self.binary(Opcode::Sub, lhs, rhs);
                self.immediate(Opcode::Sltiu, difference, 1)
            }

            BinOp::NotEqual => {
                let equal = self.operator(BinOp::Equal, lhs, rhs);
                self.immediate(Opcode::Xori, equal, 1)
            }

            BinOp::Less => self.binary(Opcode::Slt, lhs, rhs),
            BinOp::Greater => self.binary(Opcode::Slt, rhs, lhs),

            BinOp::LessOrEqual => {
                let greater = self.binary(Opcode::Slt, rhs, lhs);
                self.immediate(Opcode::Xori, greater, 1)
            }

            BinOp::GreaterOrEqual => {
                let less = self.binary(Opcode::Slt, lhs, rhs);
                self.immediate(Opcode::Xori, less, 1)
            }
        }
    }

    /// Multiplica un índice por el tamaño de elemento.
    fn scale(&mut self, index: Operand, stride: u32) -> Operand {
        if stride.is_power_of_two() {
            let mut scaled = index;
            for _ in 0..stride.trailing_zeros() {
                scaled = self.binary(Opcode::Add, scaled.clone(), scaled);
            }

            scaled
        } else {
            let stride = self.constant(stride as i32);
            self.helper("mult", index, stride)
        }
    }

    /// Llamada a una rutina externa de dos argumentos en `$a0` y `$a1`.
    fn helper(&mut self, routine: &str, lhs: Operand, rhs: Operand) -> Operand {
        self.push(Instruction::new(Opcode::Move).dest(Reg::A0).src1(lhs));
        self.push(Instruction::new(Opcode::Move).dest(Reg::A1).src1(rhs));

        let routine = Operand::Symbol(Identifier::new(routine));
        self.push(Instruction::new(Opcode::Jal).dest(routine));

        self.result()
    }

    /// Copia `$v0` a un temporal nuevo.
    fn result(&mut self) -> Operand {
        let target = self.temp();
        self.push(
            Instruction::new(Opcode::Move)
                .dest(target.clone())
                .src1(Reg::V0),
        );

        target
    }

    fn adjust_stack(&mut self, bytes: i32) {
        self.push(
            Instruction::new(Opcode::Addiu)
                .dest(Reg::Sp)
                .src1(Reg::Sp)
                .imm(bytes),
        );
    }

    fn constant(&mut self, value: i32) -> Operand {
        let target = self.temp();
        self.push(Instruction::new(Opcode::Li).dest(target.clone()).imm(value));

        target
    }

    fn binary(&mut self, op: Opcode, lhs: Operand, rhs: Operand) -> Operand {
        let target = self.temp();
        self.push(
            Instruction::new(op)
                .dest(target.clone())
                .src1(lhs)
                .src2(rhs),
        );

        target
    }

    fn immediate(&mut self, op: Opcode, operand: Operand, imm: i32) -> Operand {
        let target = self.temp();
        self.push(
            Instruction::new(op)
                .dest(target.clone())
                .src1(operand)
                .imm(imm),
        );

        target
    }

    fn storage(&self, name: &Identifier) -> Storage {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
            .expect("unresolved name in a checked tree")
    }

    fn temp(&mut self) -> Operand {
        self.names.temp()
    }

    fn label(&mut self) -> Operand {
        self.names.label()
    }

    fn push(&mut self, instruction: Instruction) {
        self.body.push(instruction);
    }
}
