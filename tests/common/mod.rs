#![allow(dead_code)]

use c0c::{
    codegen,
    ir::{self, Instruction, Opcode, Operand},
    lex::Lexer,
    parse::{self, Ast},
    semantic::SemanticError,
    source::{self, Located},
};

pub fn parse(text: &str) -> Ast {
    let (start, stream) = source::consume("test.c0", text);
    let tokens = Lexer::new(start.clone(), stream)
        .tokenize()
        .expect("lexical error in test program");

    parse::parse(&tokens, start).expect("syntax error in test program")
}

pub fn analyze(text: &str) -> Result<(), SemanticError> {
    let ast = parse(text);
    let result = ast.analyze().map(|_| ()).map_err(Located::into_inner);
    result
}

pub fn lower(text: &str) -> ir::Program {
    let ast = parse(text);
    let program = ast.analyze().expect("semantic error in test program").lower();
    program
}

pub fn assemble(text: &str) -> String {
    let mut output = Vec::new();
    codegen::emit(&lower(text), &mut output).unwrap();

    String::from_utf8(output).unwrap()
}

pub fn function<'p>(program: &'p ir::Program, name: &str) -> &'p ir::Function {
    program
        .functions
        .iter()
        .find(|function| function.name.as_ref() == name)
        .unwrap_or_else(|| panic!("no function `{}`", name))
}

/// Líneas de ensamblador de una función, sin espacios redundantes.
pub fn listing(assembly: &str, name: &str) -> Vec<String> {
    assembly
        .lines()
        .skip_while(|line| *line != format!("{}:", name))
        .skip(1)
        .take_while(|line| !line.starts_with(".globl"))
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect()
}

/// Solo las instrucciones de control de flujo, en forma de volcado.
pub fn control_flow(function: &ir::Function) -> Vec<String> {
    function
        .body
        .iter()
        .filter(|i| matches!(i.op, Opcode::Beq | Opcode::J | Opcode::Label))
        .map(ToString::to_string)
        .collect()
}

/// Evaluador de funciones en línea recta, sin llamadas ni memoria.
///
/// Retorna el valor de `$v0` al primer `jr $ra`.
pub fn evaluate(body: &[Instruction]) -> i32 {
    use std::collections::HashMap;

    let mut temps: HashMap<u32, i32> = HashMap::new();
    let mut v0 = 0;

    let read = |temps: &HashMap<u32, i32>, v0: i32, operand: &Option<Operand>| match operand {
        Some(Operand::Temp(temp)) => temps[temp],
        Some(Operand::Reg(ir::Reg::Zero)) => 0,
        Some(Operand::Reg(ir::Reg::V0)) => v0,
        other => panic!("unsupported operand {:?}", other),
    };

    for instruction in body {
        let lhs = || read(&temps, v0, &instruction.src1);
        let rhs = || read(&temps, v0, &instruction.src2);

        let result = match instruction.op {
            Opcode::Li => instruction.imm,
            Opcode::Move => lhs(),
            Opcode::Add => lhs().wrapping_add(rhs()),
            Opcode::Sub => lhs().wrapping_sub(rhs()),
            Opcode::Slt => (lhs() < rhs()) as i32,
            Opcode::Sltiu => ((lhs() as u32) < (instruction.imm as u32)) as i32,
            Opcode::Xori => lhs() ^ instruction.imm,
            Opcode::Jr => return v0,
            other => panic!("unsupported opcode {:?}", other),
        };

        match &instruction.dest {
            Some(Operand::Temp(temp)) => {
                temps.insert(*temp, result);
            }

            Some(Operand::Reg(ir::Reg::V0)) => v0 = result,
            other => panic!("unsupported destination {:?}", other),
        }
    }

    panic!("function has no return")
}
