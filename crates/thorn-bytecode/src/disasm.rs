/// Bytecode disassembler (one instruction per line, nested functions indented).
use crate::opcode::{instructions, Instruction, OpCode};
use crate::proto::{Constant, Proto};
use std::fmt::Write;

/// Disassemble a prototype and all of its nested prototypes.
pub fn disassemble(proto: &Proto) -> String {
    let mut out = String::new();
    disassemble_proto(&mut out, proto, 0);
    out
}

fn disassemble_proto(out: &mut String, proto: &Proto, level: usize) {
    let indent = "  ".repeat(level);

    let vararg = if proto.is_vararg() { "+" } else { "" };
    writeln!(
        out,
        "{indent}function <{}:{}> ({}{vararg} params, {} slots, {} constants, {} bytes)",
        proto.source,
        proto.line_defined,
        proto.num_params(),
        proto.max_stack(),
        proto.constants.len(),
        proto.code.len(),
    )
    .unwrap();

    for inst in instructions(&proto.code) {
        match inst {
            Ok(inst) => {
                write!(out, "{indent}\t{:>5}\t{:<14}", inst.pc, inst.raw.name()).unwrap();
                write_operands(out, &inst, proto);
                writeln!(out).unwrap();
            }
            Err(e) => {
                writeln!(out, "{indent}\t<{e}>").unwrap();
            }
        }
    }

    if !proto.constants.is_empty() {
        writeln!(out, "{indent}constants ({}):", proto.constants.len()).unwrap();
        for (i, k) in proto.constants.iter().enumerate() {
            writeln!(out, "{indent}\t{i}\t{}", format_constant(k)).unwrap();
        }
    }

    if !proto.locals.is_empty() {
        writeln!(out, "{indent}locals ({}):", proto.locals.len()).unwrap();
        for (i, l) in proto.locals.iter().enumerate() {
            let name = l.name.as_deref().unwrap_or("(end)");
            writeln!(out, "{indent}\t{i}\t{name}\t{}", l.line).unwrap();
        }
    }

    for (_, nested) in proto.nested() {
        writeln!(out).unwrap();
        disassemble_proto(out, nested, level + 1);
    }
}

fn write_operands(out: &mut String, inst: &Instruction, proto: &Proto) {
    use OpCode::*;
    match inst.op {
        EndCode | GetTable | SetTablePop | NeqOp | EqOp | LtOp | LeOp | GtOp | GeOp | AddOp
        | SubOp | MultOp | DivOp | PowOp | ConcOp | MinusOp | NotOp => {}
        Call | TailCall | SetList | Closure => {
            write!(out, "{} {}", inst.a, inst.b).unwrap();
            if inst.op == Closure {
                write_constant_comment(out, proto, inst.a);
            }
        }
        PushConstant | GetGlobal | SetGlobal | GetDotted | PushSelf => {
            write!(out, "{}", inst.a).unwrap();
            write_constant_comment(out, proto, inst.a);
        }
        PushLocal | SetLocal => {
            write!(out, "{}", inst.a).unwrap();
            if let Some(name) = proto.local_name(inst.a as usize) {
                write!(out, "\t; {name}").unwrap();
            }
        }
        PushNumberNeg => write!(out, "{}\t; -{}", inst.a, inst.a).unwrap(),
        op if op.is_jump() => {
            write!(out, "{}", inst.a).unwrap();
            match jump_target(inst) {
                Some(to) => write!(out, "\t; to {to}").unwrap(),
                None => write!(out, "\t; to <out of range>").unwrap(),
            }
        }
        _ => write!(out, "{}", inst.a).unwrap(),
    }
}

fn write_constant_comment(out: &mut String, proto: &Proto, idx: u32) {
    match proto.constants.get(idx as usize) {
        Some(k) => write!(out, "\t; {}", format_constant(k)).unwrap(),
        None => write!(out, "\t; <bad constant>").unwrap(),
    }
}

/// Absolute target of a jump instruction.
pub fn jump_target(inst: &Instruction) -> Option<usize> {
    let offset = inst.a as usize;
    if inst.op.is_backward_jump() {
        inst.next_pc.checked_sub(offset)
    } else {
        inst.next_pc.checked_add(offset)
    }
}

/// Short display form of a constant.
pub fn format_constant(k: &Constant) -> String {
    match k {
        Constant::Nil => "nil".to_string(),
        Constant::Number(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                format!("{n}")
            }
        }
        Constant::String(bytes) => format!("\"{}\"", String::from_utf8_lossy(bytes)),
        Constant::Proto(p) => format!("function <{}:{}>", p.source, p.line_defined),
    }
}
