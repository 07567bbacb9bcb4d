use std::io::Write;
use std::ptr;

use crate::chunk::*;
use crate::compiler::{self, CompileError};
use crate::memory::Gc;
use crate::object::{
    NativeFn, Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjFunction, ObjInstance, ObjKind,
    ObjNative, ObjString, ObjUpvalue, UpvalueSlot,
};
use crate::table::Table;
use crate::value::Value;

pub const FRAMES_MAX: usize = 64;
pub const STACK_MAX: usize = FRAMES_MAX * 256;

// ── Errors ───────────────────────────────────────────────────────────

fn render_compile_errors(errors: &[CompileError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n")
}

fn render_trace(trace: &[String]) -> String {
    trace.join("\n")
}

#[derive(Debug, thiserror::Error)]
pub enum InterpretError {
    #[error("{}", render_compile_errors(.0))]
    Compile(Vec<CompileError>),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// A runtime failure plus the call stack at the point of failure, top
/// frame first.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}\n{}", render_trace(.trace))]
pub struct RuntimeError {
    pub message: String,
    pub trace: Vec<String>,
}

// ── Call frames ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct CallFrame {
    closure: *mut ObjClosure,
    /// Offset into the closure's chunk.
    ip: usize,
    /// Index of the callee's stack slot; locals live in the window above it.
    slots: usize,
}

// ── VM ───────────────────────────────────────────────────────────────

/// The virtual machine: value stack, frame stack, globals, open upvalues,
/// and the managed heap. Single-threaded and non-reentrant; one `Vm` owns
/// all of its state for its lifetime.
pub struct Vm {
    gc: Gc,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    /// Head of the open-upvalue list, sorted by stack slot descending.
    open_upvalues: *mut ObjUpvalue,
    init_string: *mut ObjString,
}

impl Default for Vm {
    fn default() -> Vm {
        Vm::new()
    }
}

impl Vm {
    pub fn new() -> Vm {
        let mut gc = Gc::new();
        let init_string = gc.copy_string("init");
        let mut vm = Vm {
            gc,
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            open_upvalues: ptr::null_mut(),
            init_string,
        };
        install_native_functions(&mut vm);
        vm
    }

    /// Registers a native function under `name`. Natives receive the
    /// argument window and must return a value; they cannot raise.
    pub fn define_native(&mut self, name: &str, function: NativeFn) {
        let name = self.gc.copy_string(name);
        // Neither allocation can collect (collection only triggers at VM
        // allocation sites), so nothing here needs a temporary root.
        let native = self.gc.new_native(function);
        self.globals.set(name, Value::Obj(native as *mut Obj));
    }

    /// Compiles and runs `source`. Program output goes to `stdout`; compile
    /// and runtime diagnostics come back in the error value.
    pub fn interpret(
        &mut self,
        source: &str,
        stdout: &mut impl Write,
    ) -> Result<(), InterpretError> {
        let function =
            compiler::compile(source, &mut self.gc).map_err(InterpretError::Compile)?;

        // Root the fresh function across the closure allocation, mirroring
        // the frame setup an OP_CALL would do.
        self.push(Value::Obj(function as *mut Obj));
        let closure = self.alloc_closure(function);
        self.pop();
        self.push(Value::Obj(closure as *mut Obj));
        self.call_closure(closure, 0)?;

        self.run(stdout).map_err(InterpretError::Runtime)
    }

    // ── Stack primitives ─────────────────────────────────────────────

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        debug_assert!(!self.stack.is_empty(), "value stack underflow");
        self.stack.pop().unwrap_or(Value::Nil)
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn frames_top(&self) -> CallFrame {
        self.frames[self.frames.len() - 1]
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues = ptr::null_mut();
    }

    /// Builds the stack trace, resets the stacks, and hands back the error.
    /// Frame ips must be synced before calling.
    fn runtime_error(&mut self, message: impl Into<String>) -> RuntimeError {
        let mut trace = Vec::with_capacity(self.frames.len());
        for frame in self.frames.iter().rev() {
            // SAFETY: frame closures are rooted for as long as the frame is
            // on the stack.
            unsafe {
                let function = (*frame.closure).function;
                let instruction = frame.ip.saturating_sub(1);
                let line = (&(*function).chunk.lines).get(instruction).copied().unwrap_or(0);
                let name = (*function).name;
                if name.is_null() {
                    trace.push(format!("[line {line}] in script"));
                } else {
                    trace.push(format!("[line {line}] in {}()", (*name).chars));
                }
            }
        }
        self.reset_stack();
        RuntimeError { message: message.into(), trace }
    }

    // ── Allocation (the only collection points) ──────────────────────

    fn collect_if_needed(&mut self) {
        if self.gc.should_collect() {
            self.collect_garbage();
        }
    }

    /// Mark roots, trace, clear weak intern entries, sweep. Every caller
    /// must have all live intermediates on the stack or in a root table.
    fn collect_garbage(&mut self) {
        #[cfg(feature = "gc-trace")]
        eprintln!("-- gc begin");

        for &value in &self.stack {
            self.gc.mark_value(value);
        }
        for frame in &self.frames {
            self.gc.mark_object(frame.closure as *mut Obj);
        }
        let mut upvalue = self.open_upvalues;
        while !upvalue.is_null() {
            self.gc.mark_object(upvalue as *mut Obj);
            // SAFETY: list members are live managed objects.
            upvalue = unsafe { (*upvalue).next_open };
        }
        self.gc.mark_table(&self.globals);
        self.gc.mark_object(self.init_string as *mut Obj);

        self.gc.trace_references();
        self.gc.remove_white_strings();
        self.gc.sweep();

        #[cfg(feature = "gc-trace")]
        eprintln!("-- gc end");
    }

    fn alloc_closure(&mut self, function: *mut ObjFunction) -> *mut ObjClosure {
        self.collect_if_needed();
        self.gc.new_closure(function)
    }

    fn alloc_upvalue(&mut self, slot: usize) -> *mut ObjUpvalue {
        self.collect_if_needed();
        self.gc.new_upvalue(slot)
    }

    fn alloc_class(&mut self, name: *mut ObjString) -> *mut ObjClass {
        self.collect_if_needed();
        self.gc.new_class(name)
    }

    fn alloc_instance(&mut self, class: *mut ObjClass) -> *mut ObjInstance {
        self.collect_if_needed();
        self.gc.new_instance(class)
    }

    fn alloc_bound_method(
        &mut self,
        receiver: Value,
        method: *mut ObjClosure,
    ) -> *mut ObjBoundMethod {
        self.collect_if_needed();
        self.gc.new_bound_method(receiver, method)
    }

    fn alloc_take_string(&mut self, chars: String) -> *mut ObjString {
        self.collect_if_needed();
        self.gc.take_string(chars)
    }

    // ── Calls ────────────────────────────────────────────────────────

    fn call_value(&mut self, callee: Value, arg_count: usize) -> Result<(), RuntimeError> {
        if let Value::Obj(object) = callee {
            // SAFETY: stack values are live managed objects.
            unsafe {
                match (*object).kind {
                    ObjKind::Closure => {
                        return self.call_closure(object as *mut ObjClosure, arg_count);
                    }
                    ObjKind::Native => {
                        let function = (*(object as *mut ObjNative)).function;
                        let args_start = self.stack.len() - arg_count;
                        let result = function(&self.stack[args_start..]);
                        // Drop the arguments and the callee together.
                        self.stack.truncate(args_start - 1);
                        self.push(result);
                        return Ok(());
                    }
                    ObjKind::Class => {
                        let class = object as *mut ObjClass;
                        // The class on the stack keeps itself alive across
                        // the instance allocation, then the instance takes
                        // its slot so `this` lands in frame slot 0.
                        let instance = self.alloc_instance(class);
                        let slot = self.stack.len() - arg_count - 1;
                        self.stack[slot] = Value::Obj(instance as *mut Obj);
                        if let Some(Value::Obj(init)) = (*class).methods.get(self.init_string) {
                            return self.call_closure(init as *mut ObjClosure, arg_count);
                        }
                        if arg_count != 0 {
                            return Err(self.runtime_error(format!(
                                "Expected 0 arguments but got {arg_count}."
                            )));
                        }
                        return Ok(());
                    }
                    ObjKind::BoundMethod => {
                        let bound = object as *mut ObjBoundMethod;
                        let slot = self.stack.len() - arg_count - 1;
                        self.stack[slot] = (*bound).receiver;
                        return self.call_closure((*bound).method, arg_count);
                    }
                    _ => {}
                }
            }
        }
        Err(self.runtime_error("Can only call functions and classes."))
    }

    fn call_closure(
        &mut self,
        closure: *mut ObjClosure,
        arg_count: usize,
    ) -> Result<(), RuntimeError> {
        // SAFETY: `closure` is rooted by its stack slot.
        let arity = unsafe { (*(*closure).function).arity };
        if arg_count != arity {
            return Err(
                self.runtime_error(format!("Expected {arity} arguments but got {arg_count}."))
            );
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            slots: self.stack.len() - arg_count - 1,
        });
        Ok(())
    }

    // ── Upvalues ─────────────────────────────────────────────────────

    /// Returns the open upvalue for `slot`, creating and inserting one in
    /// list order (descending by slot) if none exists. Two closures over
    /// the same variable always share one upvalue.
    fn capture_upvalue(&mut self, slot: usize) -> *mut ObjUpvalue {
        let mut previous: *mut ObjUpvalue = ptr::null_mut();
        let mut current = self.open_upvalues;
        // SAFETY: list members are live; the list only holds open upvalues.
        unsafe {
            while !current.is_null()
                && matches!((*current).location, UpvalueSlot::Open(s) if s > slot)
            {
                previous = current;
                current = (*current).next_open;
            }
            if !current.is_null() && (*current).location == UpvalueSlot::Open(slot) {
                return current;
            }
        }
        let created = self.alloc_upvalue(slot);
        // SAFETY: `created` is fresh; `previous`/`current` are live or null.
        unsafe {
            (*created).next_open = current;
            if previous.is_null() {
                self.open_upvalues = created;
            } else {
                (*previous).next_open = created;
            }
        }
        created
    }

    /// Closes every open upvalue at or above `last`: the stack value moves
    /// into the upvalue's own storage and the upvalue leaves the open list.
    fn close_upvalues(&mut self, last: usize) {
        // SAFETY: list members are live; only open upvalues are linked.
        unsafe {
            while !self.open_upvalues.is_null() {
                let upvalue = self.open_upvalues;
                let UpvalueSlot::Open(slot) = (*upvalue).location else { break };
                if slot < last {
                    break;
                }
                (*upvalue).location = UpvalueSlot::Closed(self.stack[slot]);
                self.open_upvalues = (*upvalue).next_open;
                (*upvalue).next_open = ptr::null_mut();
            }
        }
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    fn run(&mut self, stdout: &mut impl Write) -> Result<(), RuntimeError> {
        let mut frame = self.frames_top();
        // SAFETY: the frame's closure and function are rooted by the frame;
        // the chunk is never mutated while the function is executing, so the
        // unbounded borrow cannot alias a mutation.
        let mut chunk: &Chunk = unsafe { &(*(*frame.closure).function).chunk };

        macro_rules! read_byte {
            () => {{
                // SAFETY: the compiler only emits in-bounds code offsets.
                let byte = unsafe { *chunk.code.get_unchecked(frame.ip) };
                frame.ip += 1;
                byte
            }};
        }
        macro_rules! read_short {
            () => {{
                let high = read_byte!() as usize;
                let low = read_byte!() as usize;
                (high << 8) | low
            }};
        }
        macro_rules! read_constant {
            () => {{
                let index = read_byte!() as usize;
                // SAFETY: constant operands index the emitting chunk's pool.
                unsafe { *chunk.constants.get_unchecked(index) }
            }};
        }
        macro_rules! read_string {
            () => {{
                match read_constant!() {
                    Value::Obj(obj) => obj as *mut ObjString,
                    // The compiler only feeds string constants to name ops.
                    _ => unreachable!("name operand is not a string"),
                }
            }};
        }
        // Syncs the cached ip, builds the trace, and unwinds.
        macro_rules! fail {
            ($($arg:tt)*) => {{
                let top = self.frames.len() - 1;
                self.frames[top].ip = frame.ip;
                return Err(self.runtime_error(format!($($arg)*)));
            }};
        }
        macro_rules! reload_frame {
            () => {{
                frame = self.frames_top();
                // SAFETY: as above; the new frame's function is rooted.
                chunk = unsafe { &(*(*frame.closure).function).chunk };
            }};
        }
        macro_rules! binary_op {
            ($constructor:ident, $op:tt) => {{
                let b = self.peek(0);
                let a = self.peek(1);
                match (a, b) {
                    (Value::Number(a), Value::Number(b)) => {
                        self.pop();
                        self.pop();
                        self.push(Value::$constructor(a $op b));
                    }
                    _ => fail!("Operands must be numbers."),
                }
            }};
        }

        loop {
            #[cfg(feature = "trace-execution")]
            {
                eprint!("          ");
                for value in &self.stack {
                    eprint!("[ {value} ]");
                }
                eprintln!();
                crate::debug::disassemble_instruction(chunk, frame.ip);
            }

            let instruction = read_byte!();
            match instruction {
                OP_CONSTANT => {
                    let constant = read_constant!();
                    self.push(constant);
                }
                OP_NIL => self.push(Value::Nil),
                OP_TRUE => self.push(Value::Bool(true)),
                OP_FALSE => self.push(Value::Bool(false)),
                OP_POP => {
                    self.pop();
                }

                OP_GET_LOCAL => {
                    let slot = read_byte!() as usize;
                    let value = self.stack[frame.slots + slot];
                    self.push(value);
                }
                OP_SET_LOCAL => {
                    let slot = read_byte!() as usize;
                    // Assignment is an expression; the value stays put.
                    self.stack[frame.slots + slot] = self.peek(0);
                }

                OP_GET_GLOBAL => {
                    let name = read_string!();
                    match self.globals.get(name) {
                        Some(value) => self.push(value),
                        // SAFETY: name constants are live interned strings.
                        None => fail!("Undefined variable '{}'.", unsafe { &(*name).chars }),
                    }
                }
                OP_DEFINE_GLOBAL => {
                    let name = read_string!();
                    let value = self.peek(0);
                    self.globals.set(name, value);
                    self.pop();
                }
                OP_SET_GLOBAL => {
                    let name = read_string!();
                    let value = self.peek(0);
                    if self.globals.set(name, value) {
                        // The write minted a fresh entry: assignment to an
                        // undefined name. Delete the zombie and report.
                        self.globals.delete(name);
                        // SAFETY: as above.
                        fail!("Undefined variable '{}'.", unsafe { &(*name).chars });
                    }
                }

                OP_GET_UPVALUE => {
                    let index = read_byte!() as usize;
                    // SAFETY: the closure and its upvalues are rooted by the
                    // frame; indices were checked at compile time.
                    let value = unsafe {
                        let upvalue = (&(*frame.closure).upvalues)[index];
                        match (*upvalue).location {
                            UpvalueSlot::Open(slot) => self.stack[slot],
                            UpvalueSlot::Closed(value) => value,
                        }
                    };
                    self.push(value);
                }
                OP_SET_UPVALUE => {
                    let index = read_byte!() as usize;
                    let value = self.peek(0);
                    // SAFETY: as above.
                    unsafe {
                        let upvalue = (&(*frame.closure).upvalues)[index];
                        match (*upvalue).location {
                            UpvalueSlot::Open(slot) => self.stack[slot] = value,
                            UpvalueSlot::Closed(_) => {
                                (*upvalue).location = UpvalueSlot::Closed(value);
                            }
                        }
                    }
                }

                OP_GET_PROPERTY => {
                    let name = read_string!();
                    let receiver = self.peek(0);
                    let instance = match receiver {
                        // SAFETY: stack values are live.
                        Value::Obj(obj) if unsafe { (*obj).kind } == ObjKind::Instance => {
                            obj as *mut ObjInstance
                        }
                        _ => fail!("Only instances have properties."),
                    };
                    // Fields shadow methods.
                    // SAFETY: the instance is rooted by the stack.
                    if let Some(value) = unsafe { (*instance).fields.get(name) } {
                        self.pop();
                        self.push(value);
                    } else {
                        let class = unsafe { (*instance).class };
                        match unsafe { (*class).methods.get(name) } {
                            Some(Value::Obj(method)) => {
                                let bound =
                                    self.alloc_bound_method(receiver, method as *mut ObjClosure);
                                self.pop();
                                self.push(Value::Obj(bound as *mut Obj));
                            }
                            _ => {
                                fail!("Undefined property '{}'.", unsafe { &(*name).chars })
                            }
                        }
                    }
                }
                OP_SET_PROPERTY => {
                    let name = read_string!();
                    let receiver = self.peek(1);
                    let instance = match receiver {
                        // SAFETY: stack values are live.
                        Value::Obj(obj) if unsafe { (*obj).kind } == ObjKind::Instance => {
                            obj as *mut ObjInstance
                        }
                        _ => fail!("Only instances have fields."),
                    };
                    let value = self.peek(0);
                    // SAFETY: as above.
                    unsafe { (*instance).fields.set(name, value) };
                    // Leave the assigned value; drop the receiver under it.
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }

                OP_EQUAL => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                OP_GREATER => binary_op!(Bool, >),
                OP_LESS => binary_op!(Bool, <),
                OP_ADD => {
                    let b = self.peek(0);
                    let a = self.peek(1);
                    match (a, b) {
                        (Value::Number(a), Value::Number(b)) => {
                            self.pop();
                            self.pop();
                            self.push(Value::Number(a + b));
                        }
                        (Value::Obj(a), Value::Obj(b))
                            // SAFETY: stack values are live.
                            if unsafe {
                                (*a).kind == ObjKind::String && (*b).kind == ObjKind::String
                            } =>
                        {
                            // Both operands stay on the stack as roots until
                            // the result string exists.
                            let chars = unsafe {
                                let left = &(*(a as *mut ObjString)).chars;
                                let right = &(*(b as *mut ObjString)).chars;
                                let mut chars = String::with_capacity(left.len() + right.len());
                                chars.push_str(left);
                                chars.push_str(right);
                                chars
                            };
                            let result = self.alloc_take_string(chars);
                            self.pop();
                            self.pop();
                            self.push(Value::Obj(result as *mut Obj));
                        }
                        _ => fail!("Operands must be two numbers or two strings."),
                    }
                }
                OP_SUBTRACT => binary_op!(Number, -),
                OP_MULTIPLY => binary_op!(Number, *),
                OP_DIVIDE => binary_op!(Number, /),

                OP_NOT => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                OP_NEGATE => match self.peek(0) {
                    Value::Number(n) => {
                        self.pop();
                        self.push(Value::Number(-n));
                    }
                    _ => fail!("Operand must be a number."),
                },

                OP_PRINT => {
                    let value = self.pop();
                    if writeln!(stdout, "{value}").is_err() {
                        fail!("Error writing to standard output.");
                    }
                }

                OP_JUMP => {
                    let offset = read_short!();
                    frame.ip += offset;
                }
                OP_JUMP_IF_FALSE => {
                    let offset = read_short!();
                    // Leaves the condition for the compiler's explicit POPs.
                    if self.peek(0).is_falsey() {
                        frame.ip += offset;
                    }
                }
                OP_LOOP => {
                    let offset = read_short!();
                    frame.ip -= offset;
                }

                OP_CALL => {
                    let arg_count = read_byte!() as usize;
                    let callee = self.peek(arg_count);
                    // Park the resume point before frames shift.
                    let top = self.frames.len() - 1;
                    self.frames[top].ip = frame.ip;
                    self.call_value(callee, arg_count)?;
                    reload_frame!();
                }

                OP_CLOSURE => {
                    let function = match read_constant!() {
                        Value::Obj(obj) => obj as *mut ObjFunction,
                        _ => unreachable!("closure operand is not a function"),
                    };
                    // Push the closure first so the upvalue allocations
                    // below see it as a root.
                    let closure = self.alloc_closure(function);
                    self.push(Value::Obj(closure as *mut Obj));
                    // SAFETY: just allocated, rooted by the push above.
                    let upvalue_count = unsafe { (*closure).upvalues.len() };
                    for index in 0..upvalue_count {
                        let is_local = read_byte!() != 0;
                        let operand = read_byte!() as usize;
                        let upvalue = if is_local {
                            self.capture_upvalue(frame.slots + operand)
                        } else {
                            // SAFETY: the enclosing frame's closure is live.
                            unsafe { (&(*frame.closure).upvalues)[operand] }
                        };
                        // SAFETY: as above.
                        unsafe { (&mut (*closure).upvalues)[index] = upvalue };
                    }
                }
                OP_CLOSE_UPVALUE => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }

                OP_RETURN => {
                    let result = self.pop();
                    self.close_upvalues(frame.slots);
                    self.frames.pop();
                    if self.frames.is_empty() {
                        // Discard the script closure; execution is done.
                        self.pop();
                        debug_assert!(
                            self.stack.is_empty(),
                            "stack not balanced at script exit"
                        );
                        return Ok(());
                    }
                    self.stack.truncate(frame.slots);
                    self.push(result);
                    reload_frame!();
                }

                OP_CLASS => {
                    let name = read_string!();
                    let class = self.alloc_class(name);
                    self.push(Value::Obj(class as *mut Obj));
                }
                OP_METHOD => {
                    let name = read_string!();
                    let method = self.peek(0);
                    // SAFETY: the compiler emits OP_METHOD only with a
                    // closure on top of the class being defined.
                    unsafe {
                        let class = match self.peek(1) {
                            Value::Obj(obj) => obj as *mut ObjClass,
                            _ => unreachable!("method target is not a class"),
                        };
                        (*class).methods.set(name, method);
                    }
                    self.pop();
                }

                other => fail!("Unknown opcode {other}."),
            }
        }
    }
}

// ── Natives ──────────────────────────────────────────────────────────

// The `libc` crate does not bind clock(3)/CLOCKS_PER_SEC on this target; declare them directly.
extern "C" {
    fn clock() -> libc::clock_t;
}
const CLOCKS_PER_SEC: libc::clock_t = 1_000_000;

/// CPU seconds since process start.
fn native_clock(_args: &[Value]) -> Value {
    // SAFETY: clock(3) has no preconditions.
    let ticks = unsafe { clock() };
    Value::Number(ticks as f64 / CLOCKS_PER_SEC as f64)
}

/// Registers the standard natives on a fresh VM.
fn install_native_functions(vm: &mut Vm) {
    vm.define_native("clock", native_clock);
}
