use crate::chunk::*;
use crate::object::ObjFunction;
use crate::value::Value;

/// Disassembles a whole chunk to stderr under a header.
pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    eprintln!("== {name} ==");
    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(chunk, offset);
    }
}

/// Disassembles the instruction at `offset` and returns the offset of the
/// next one.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> usize {
    eprint!("{offset:04} ");
    if offset > 0 && chunk.lines[offset] == chunk.lines[offset - 1] {
        eprint!("   | ");
    } else {
        eprint!("{:4} ", chunk.lines[offset]);
    }

    let instruction = chunk.code[offset];
    match instruction {
        OP_CONSTANT => constant_instruction("OP_CONSTANT", chunk, offset),
        OP_NIL => simple_instruction("OP_NIL", offset),
        OP_TRUE => simple_instruction("OP_TRUE", offset),
        OP_FALSE => simple_instruction("OP_FALSE", offset),
        OP_POP => simple_instruction("OP_POP", offset),
        OP_GET_LOCAL => byte_instruction("OP_GET_LOCAL", chunk, offset),
        OP_SET_LOCAL => byte_instruction("OP_SET_LOCAL", chunk, offset),
        OP_GET_GLOBAL => constant_instruction("OP_GET_GLOBAL", chunk, offset),
        OP_DEFINE_GLOBAL => constant_instruction("OP_DEFINE_GLOBAL", chunk, offset),
        OP_SET_GLOBAL => constant_instruction("OP_SET_GLOBAL", chunk, offset),
        OP_GET_UPVALUE => byte_instruction("OP_GET_UPVALUE", chunk, offset),
        OP_SET_UPVALUE => byte_instruction("OP_SET_UPVALUE", chunk, offset),
        OP_GET_PROPERTY => constant_instruction("OP_GET_PROPERTY", chunk, offset),
        OP_SET_PROPERTY => constant_instruction("OP_SET_PROPERTY", chunk, offset),
        OP_EQUAL => simple_instruction("OP_EQUAL", offset),
        OP_GREATER => simple_instruction("OP_GREATER", offset),
        OP_LESS => simple_instruction("OP_LESS", offset),
        OP_ADD => simple_instruction("OP_ADD", offset),
        OP_SUBTRACT => simple_instruction("OP_SUBTRACT", offset),
        OP_MULTIPLY => simple_instruction("OP_MULTIPLY", offset),
        OP_DIVIDE => simple_instruction("OP_DIVIDE", offset),
        OP_NOT => simple_instruction("OP_NOT", offset),
        OP_NEGATE => simple_instruction("OP_NEGATE", offset),
        OP_PRINT => simple_instruction("OP_PRINT", offset),
        OP_JUMP => jump_instruction("OP_JUMP", 1, chunk, offset),
        OP_JUMP_IF_FALSE => jump_instruction("OP_JUMP_IF_FALSE", 1, chunk, offset),
        OP_LOOP => jump_instruction("OP_LOOP", -1, chunk, offset),
        OP_CALL => byte_instruction("OP_CALL", chunk, offset),
        OP_CLOSURE => closure_instruction(chunk, offset),
        OP_CLOSE_UPVALUE => simple_instruction("OP_CLOSE_UPVALUE", offset),
        OP_RETURN => simple_instruction("OP_RETURN", offset),
        OP_CLASS => constant_instruction("OP_CLASS", chunk, offset),
        OP_METHOD => constant_instruction("OP_METHOD", chunk, offset),
        other => {
            eprintln!("Unknown opcode {other}");
            offset + 1
        }
    }
}

fn simple_instruction(name: &str, offset: usize) -> usize {
    eprintln!("{name}");
    offset + 1
}

fn byte_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let slot = chunk.code[offset + 1];
    eprintln!("{name:<16} {slot:4}");
    offset + 2
}

fn constant_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let constant = chunk.code[offset + 1] as usize;
    eprintln!("{name:<16} {constant:4} '{}'", chunk.constants[constant]);
    offset + 2
}

fn jump_instruction(name: &str, sign: i64, chunk: &Chunk, offset: usize) -> usize {
    let jump = ((chunk.code[offset + 1] as i64) << 8) | chunk.code[offset + 2] as i64;
    let target = offset as i64 + 3 + sign * jump;
    eprintln!("{name:<16} {offset:4} -> {target}");
    offset + 3
}

fn closure_instruction(chunk: &Chunk, offset: usize) -> usize {
    let constant = chunk.code[offset + 1] as usize;
    let value = chunk.constants[constant];
    eprintln!("{:<16} {constant:4} '{value}'", "OP_CLOSURE");

    // The descriptor pairs trail the constant operand.
    let function = match value {
        Value::Obj(obj) => obj as *mut ObjFunction,
        _ => return offset + 2,
    };
    // SAFETY: closure operands are live function objects in a rooted pool.
    let upvalue_count = unsafe { (*function).upvalue_count };
    let mut next = offset + 2;
    for _ in 0..upvalue_count {
        let is_local = chunk.code[next];
        let index = chunk.code[next + 1];
        let kind = if is_local != 0 { "local" } else { "upvalue" };
        eprintln!("{:04}      |                     {kind} {index}", next);
        next += 2;
    }
    next
}
