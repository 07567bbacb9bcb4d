use std::ptr;

use crate::chunk::*;
use crate::lexer::{Scanner, Token, TokenKind};
use crate::memory::Gc;
use crate::object::{Obj, ObjFunction, ObjString};
use crate::value::Value;

// One-byte operands bound locals and upvalues per function.
const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;

#[derive(Debug, Clone, thiserror::Error)]
#[error("[line {line}] Error{location}: {message}")]
pub struct CompileError {
    pub line: u32,
    /// "" for lexical errors, " at end" at EOF, " at 'lexeme'" otherwise.
    pub location: String,
    pub message: String,
}

// ── Precedence ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn<'src> = fn(&mut Parser<'src>, bool);

/// One row of the Pratt table: how a token parses in prefix position, in
/// infix position, and how tightly it binds as an infix operator.
struct ParseRule<'src> {
    prefix: Option<ParseFn<'src>>,
    infix: Option<ParseFn<'src>>,
    precedence: Precedence,
}

// ── Per-function compiler state ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

struct Local<'src> {
    name: &'src str,
    /// -1 while declared but not yet initialized.
    depth: i32,
    is_captured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UpvalueRef {
    index: u8,
    is_local: bool,
}

struct Compiler<'src> {
    kind: FunctionKind,
    /// Null for the top-level script.
    name: *mut ObjString,
    arity: usize,
    chunk: Chunk,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueRef>,
    scope_depth: i32,
}

impl<'src> Compiler<'src> {
    fn new(kind: FunctionKind, name: *mut ObjString) -> Compiler<'src> {
        // Slot 0 belongs to the callee: it is `this` inside methods and
        // initializers, and unnameable everywhere else.
        let slot_zero = if matches!(kind, FunctionKind::Method | FunctionKind::Initializer) {
            "this"
        } else {
            ""
        };
        Compiler {
            kind,
            name,
            arity: 0,
            chunk: Chunk::new(),
            locals: vec![Local { name: slot_zero, depth: 0, is_captured: false }],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

// ── Parser ───────────────────────────────────────────────────────────

/// Single-pass Pratt parser: resolves scope and emits bytecode while
/// parsing, with a two-token lookahead window.
pub struct Parser<'src> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    panic_mode: bool,
    errors: Vec<CompileError>,
    /// Innermost function last; enclosing functions below it.
    compilers: Vec<Compiler<'src>>,
    /// Number of enclosing class declarations; gates `this`.
    class_depth: usize,
    gc: &'src mut Gc,
}

/// Compiles `source` into a top-level script function. On any error the
/// whole list of diagnostics is returned instead; bytecode from a failed
/// compile is never executed.
pub fn compile<'src>(
    source: &'src str,
    gc: &'src mut Gc,
) -> Result<*mut ObjFunction, Vec<CompileError>> {
    let mut parser = Parser {
        scanner: Scanner::new(source),
        current: Token::placeholder(),
        previous: Token::placeholder(),
        panic_mode: false,
        errors: Vec::new(),
        compilers: vec![Compiler::new(FunctionKind::Script, ptr::null_mut())],
        class_depth: 0,
        gc,
    };
    parser.advance();
    while !parser.match_token(TokenKind::Eof) {
        parser.declaration();
    }
    let (function, _) = parser.end_compiler();
    if parser.errors.is_empty() {
        Ok(function)
    } else {
        Err(parser.errors)
    }
}

impl<'src> Parser<'src> {
    // ── Token plumbing ───────────────────────────────────────────────

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.next_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            // Error tokens carry their message in the lexeme.
            let message = self.current.lexeme;
            self.error_at_current(message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    // ── Errors ───────────────────────────────────────────────────────

    fn error(&mut self, message: &str) {
        let token = self.previous;
        self.error_at(token, message);
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current;
        self.error_at(token, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        // One diagnostic per panic; synchronize() re-arms reporting.
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let location = match token.kind {
            TokenKind::Eof => " at end".to_string(),
            TokenKind::Error => String::new(),
            _ => format!(" at '{}'", token.lexeme),
        };
        self.errors.push(CompileError {
            line: token.line,
            location,
            message: message.to_string(),
        });
    }

    /// Skips forward to a likely statement boundary so one mistake does not
    /// cascade into a wall of diagnostics.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ── Compiler stack access ────────────────────────────────────────

    fn compiler(&mut self) -> &mut Compiler<'src> {
        let top = self.compilers.len() - 1;
        &mut self.compilers[top]
    }

    fn compiler_ref(&self) -> &Compiler<'src> {
        &self.compilers[self.compilers.len() - 1]
    }

    // ── Emission ─────────────────────────────────────────────────────

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.compiler().chunk.write(byte, line);
    }

    fn emit_bytes(&mut self, first: u8, second: u8) {
        self.emit_byte(first);
        self.emit_byte(second);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_byte(OP_LOOP);
        // +2 skips the offset operand itself.
        let offset = self.compiler_ref().chunk.code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        self.emit_byte((offset >> 8) as u8);
        self.emit_byte(offset as u8);
    }

    /// Emits a jump with a two-byte placeholder and returns the placeholder
    /// offset for `patch_jump`.
    fn emit_jump(&mut self, instruction: u8) -> usize {
        self.emit_byte(instruction);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.compiler_ref().chunk.code.len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.compiler_ref().chunk.code.len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        let code = &mut self.compiler().chunk.code;
        code[offset] = (jump >> 8) as u8;
        code[offset + 1] = jump as u8;
    }

    fn emit_return(&mut self) {
        // An initializer's implicit return hands back `this` (slot 0).
        if self.compiler_ref().kind == FunctionKind::Initializer {
            self.emit_bytes(OP_GET_LOCAL, 0);
        } else {
            self.emit_byte(OP_NIL);
        }
        self.emit_byte(OP_RETURN);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let constant = self.compiler().chunk.add_constant(value);
        if constant > u8::MAX as usize {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        constant as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let constant = self.make_constant(value);
        self.emit_bytes(OP_CONSTANT, constant);
    }

    fn end_compiler(&mut self) -> (*mut ObjFunction, Vec<UpvalueRef>) {
        self.emit_return();
        let compiler = match self.compilers.pop() {
            Some(compiler) => compiler,
            None => unreachable!("compiler stack underflow"),
        };
        let upvalue_count = compiler.upvalues.len();
        let function =
            self.gc.new_function(compiler.name, compiler.arity, upvalue_count, compiler.chunk);
        #[cfg(feature = "print-code")]
        if self.errors.is_empty() {
            // SAFETY: the function was just allocated and is live.
            unsafe {
                let name = (*function).name;
                let label = if name.is_null() {
                    "<script>".to_string()
                } else {
                    (*name).chars.clone()
                };
                crate::debug::disassemble_chunk(&(*function).chunk, &label);
            }
        }
        (function, compiler.upvalues)
    }

    // ── Scope resolution ─────────────────────────────────────────────

    fn begin_scope(&mut self) {
        self.compiler().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.compiler().scope_depth -= 1;
        loop {
            let compiler = self.compiler_ref();
            let Some(local) = compiler.locals.last() else { break };
            if local.depth <= compiler.scope_depth {
                break;
            }
            // Captured locals migrate into their upvalue instead of dying.
            let captured = local.is_captured;
            self.compiler().locals.pop();
            self.emit_byte(if captured { OP_CLOSE_UPVALUE } else { OP_POP });
        }
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let string = self.gc.copy_string(name);
        self.make_constant(Value::Obj(string as *mut Obj))
    }

    fn add_local(&mut self, name: &'src str) {
        if self.compiler_ref().locals.len() == MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.compiler().locals.push(Local { name, depth: -1, is_captured: false });
    }

    fn declare_variable(&mut self) {
        if self.compiler_ref().scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme;
        let mut duplicate = false;
        {
            let compiler = self.compiler_ref();
            for local in compiler.locals.iter().rev() {
                if local.depth != -1 && local.depth < compiler.scope_depth {
                    break;
                }
                if local.name == name {
                    duplicate = true;
                    break;
                }
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    /// Consumes an identifier; returns its constant index for globals, 0 for
    /// locals (which live in stack slots, not the constant pool).
    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.compiler_ref().scope_depth > 0 {
            return 0;
        }
        let name = self.previous.lexeme;
        self.identifier_constant(name)
    }

    fn mark_initialized(&mut self) {
        let compiler = self.compiler();
        if compiler.scope_depth == 0 {
            return;
        }
        let depth = compiler.scope_depth;
        if let Some(local) = compiler.locals.last_mut() {
            local.depth = depth;
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.compiler_ref().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_bytes(OP_DEFINE_GLOBAL, global);
    }

    fn resolve_local(&mut self, level: usize, name: &str) -> Option<u8> {
        let mut uninitialized = false;
        let mut found = None;
        for (slot, local) in self.compilers[level].locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    uninitialized = true;
                }
                found = Some(slot as u8);
                break;
            }
        }
        if uninitialized {
            self.error("Can't read local variable in its own initializer.");
        }
        found
    }

    /// Walks outward through enclosing functions looking for `name`,
    /// flattening a chain of captures into this function's upvalue list.
    fn resolve_upvalue(&mut self, level: usize, name: &str) -> Option<u8> {
        if level == 0 {
            return None;
        }
        let enclosing = level - 1;
        if let Some(local) = self.resolve_local(enclosing, name) {
            self.compilers[enclosing].locals[local as usize].is_captured = true;
            return Some(self.add_upvalue(level, UpvalueRef { index: local, is_local: true }));
        }
        if let Some(upvalue) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(level, UpvalueRef { index: upvalue, is_local: false }));
        }
        None
    }

    fn add_upvalue(&mut self, level: usize, upvalue: UpvalueRef) -> u8 {
        if let Some(existing) = self.compilers[level].upvalues.iter().position(|u| *u == upvalue) {
            return existing as u8;
        }
        if self.compilers[level].upvalues.len() == MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }
        self.compilers[level].upvalues.push(upvalue);
        (self.compilers[level].upvalues.len() - 1) as u8
    }

    fn named_variable(&mut self, name: &'src str, can_assign: bool) {
        let top = self.compilers.len() - 1;
        let (get_op, set_op, arg) = if let Some(slot) = self.resolve_local(top, name) {
            (OP_GET_LOCAL, OP_SET_LOCAL, slot)
        } else if let Some(index) = self.resolve_upvalue(top, name) {
            (OP_GET_UPVALUE, OP_SET_UPVALUE, index)
        } else {
            // Unresolved names are late-bound globals; existence is checked
            // at runtime.
            let constant = self.identifier_constant(name);
            (OP_GET_GLOBAL, OP_SET_GLOBAL, constant)
        };
        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_bytes(set_op, arg);
        } else {
            self.emit_bytes(get_op, arg);
        }
    }

    // ── Pratt table ──────────────────────────────────────────────────

    fn rule(kind: TokenKind) -> ParseRule<'src> {
        let (prefix, infix, precedence): (
            Option<ParseFn<'src>>,
            Option<ParseFn<'src>>,
            Precedence,
        ) = match kind {
            TokenKind::LeftParen => {
                (Some(Self::grouping), Some(Self::call), Precedence::Call)
            }
            TokenKind::Dot => (None, Some(Self::dot), Precedence::Call),
            TokenKind::Minus => (Some(Self::unary), Some(Self::binary), Precedence::Term),
            TokenKind::Plus => (None, Some(Self::binary), Precedence::Term),
            TokenKind::Slash | TokenKind::Star => {
                (None, Some(Self::binary), Precedence::Factor)
            }
            TokenKind::Bang => (Some(Self::unary), None, Precedence::None),
            TokenKind::BangEqual | TokenKind::EqualEqual => {
                (None, Some(Self::binary), Precedence::Equality)
            }
            TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Less
            | TokenKind::LessEqual => (None, Some(Self::binary), Precedence::Comparison),
            TokenKind::Identifier => (Some(Self::variable), None, Precedence::None),
            TokenKind::String => (Some(Self::string), None, Precedence::None),
            TokenKind::Number => (Some(Self::number), None, Precedence::None),
            TokenKind::And => (None, Some(Self::and_operator), Precedence::And),
            TokenKind::Or => (None, Some(Self::or_operator), Precedence::Or),
            TokenKind::False | TokenKind::Nil | TokenKind::True => {
                (Some(Self::literal), None, Precedence::None)
            }
            TokenKind::This => (Some(Self::this_expression), None, Precedence::None),
            _ => (None, None, Precedence::None),
        };
        ParseRule { prefix, infix, precedence }
    }

    /// Parses everything at `precedence` or tighter: one prefix expression,
    /// then infix operators while they bind at least as strongly.
    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = Self::rule(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };
        // Assignment may only be consumed by the lowest-precedence walk;
        // otherwise `a * b = c` would quietly parse.
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= Self::rule(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = Self::rule(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    // ── Prefix & infix parselets ─────────────────────────────────────

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(0.0);
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        // Trim the surrounding quotes.
        let chars = &lexeme[1..lexeme.len() - 1];
        let string = self.gc.copy_string(chars);
        self.emit_constant(Value::Obj(string as *mut Obj));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_byte(OP_FALSE),
            TokenKind::Nil => self.emit_byte(OP_NIL),
            TokenKind::True => self.emit_byte(OP_TRUE),
            _ => {}
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Bang => self.emit_byte(OP_NOT),
            TokenKind::Minus => self.emit_byte(OP_NEGATE),
            _ => {}
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        let precedence = Self::rule(operator).precedence;
        self.parse_precedence(precedence.next());
        match operator {
            TokenKind::BangEqual => self.emit_bytes(OP_EQUAL, OP_NOT),
            TokenKind::EqualEqual => self.emit_byte(OP_EQUAL),
            TokenKind::Greater => self.emit_byte(OP_GREATER),
            TokenKind::GreaterEqual => self.emit_bytes(OP_LESS, OP_NOT),
            TokenKind::Less => self.emit_byte(OP_LESS),
            TokenKind::LessEqual => self.emit_bytes(OP_GREATER, OP_NOT),
            TokenKind::Plus => self.emit_byte(OP_ADD),
            TokenKind::Minus => self.emit_byte(OP_SUBTRACT),
            TokenKind::Star => self.emit_byte(OP_MULTIPLY),
            TokenKind::Slash => self.emit_byte(OP_DIVIDE),
            _ => {}
        }
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.lexeme;
        self.named_variable(name, can_assign);
    }

    fn this_expression(&mut self, _can_assign: bool) {
        if self.class_depth == 0 {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        let name = self.previous.lexeme;
        self.named_variable(name, false);
    }

    fn and_operator(&mut self, _can_assign: bool) {
        // Left operand is on the stack: false short-circuits over the right
        // operand, truth pops and re-evaluates.
        let end_jump = self.emit_jump(OP_JUMP_IF_FALSE);
        self.emit_byte(OP_POP);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_operator(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OP_JUMP_IF_FALSE);
        let end_jump = self.emit_jump(OP_JUMP);
        self.patch_jump(else_jump);
        self.emit_byte(OP_POP);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self, _can_assign: bool) {
        let arg_count = self.argument_list();
        self.emit_bytes(OP_CALL, arg_count);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count.min(255) as u8
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let lexeme = self.previous.lexeme;
        let name = self.identifier_constant(lexeme);
        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_bytes(OP_SET_PROPERTY, name);
        } else {
            self.emit_bytes(OP_GET_PROPERTY, name);
        }
    }

    // ── Declarations & statements ────────────────────────────────────

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous.lexeme;
        let name_constant = self.identifier_constant(class_name);
        self.declare_variable();
        self.emit_bytes(OP_CLASS, name_constant);
        self.define_variable(name_constant);

        self.class_depth += 1;
        // Reload the class so the method definitions below can attach to it.
        self.named_variable(class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_byte(OP_POP);
        self.class_depth -= 1;
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let lexeme = self.previous.lexeme;
        let constant = self.identifier_constant(lexeme);
        let kind = if lexeme == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind);
        self.emit_bytes(OP_METHOD, constant);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // Functions may refer to themselves; the binding is usable as soon
        // as the body starts compiling.
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    /// Compiles a function body (parameters + block) in a fresh compiler,
    /// then emits OP_CLOSURE with one descriptor pair per upvalue.
    fn function(&mut self, kind: FunctionKind) {
        let name = self.gc.copy_string(self.previous.lexeme);
        self.compilers.push(Compiler::new(kind, name));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.compiler_ref().arity == 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.compiler().arity += 1;
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (function, upvalues) = self.end_compiler();
        let constant = self.make_constant(Value::Obj(function as *mut Obj));
        self.emit_bytes(OP_CLOSURE, constant);
        for upvalue in upvalues {
            self.emit_byte(upvalue.is_local as u8);
            self.emit_byte(upvalue.index);
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_byte(OP_NIL);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_byte(OP_PRINT);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_byte(OP_POP);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        // JUMP_IF_FALSE leaves the condition on the stack; both arms start
        // with a POP to stay balanced.
        let then_jump = self.emit_jump(OP_JUMP_IF_FALSE);
        self.emit_byte(OP_POP);
        self.statement();
        let else_jump = self.emit_jump(OP_JUMP);
        self.patch_jump(then_jump);
        self.emit_byte(OP_POP);
        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.compiler_ref().chunk.code.len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OP_JUMP_IF_FALSE);
        self.emit_byte(OP_POP);
        self.statement();
        self.emit_loop(loop_start);
        self.patch_jump(exit_jump);
        self.emit_byte(OP_POP);
    }

    fn for_statement(&mut self) {
        // The initializer's variable lives in its own scope.
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(TokenKind::Semicolon) {
            // No initializer.
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.compiler_ref().chunk.code.len();
        let mut exit_jump = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OP_JUMP_IF_FALSE));
            self.emit_byte(OP_POP);
        }

        // The increment textually precedes the body but runs after it: jump
        // over it into the body, loop back to it, then back to the top.
        if !self.match_token(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OP_JUMP);
            let increment_start = self.compiler_ref().chunk.code.len();
            self.expression();
            self.emit_byte(OP_POP);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");
            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);
        if let Some(exit) = exit_jump {
            self.patch_jump(exit);
            self.emit_byte(OP_POP);
        }
        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.compiler_ref().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
            return;
        }
        if self.compiler_ref().kind == FunctionKind::Initializer {
            self.error("Can't return a value from an initializer.");
        }
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
        self.emit_byte(OP_RETURN);
    }
}
