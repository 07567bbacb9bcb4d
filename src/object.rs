use std::fmt;

use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::Value;

// ── Object header ────────────────────────────────────────────────────
//
// Every managed object embeds `Obj` as its first field. With #[repr(C)]
// a pointer to the concrete struct is also a valid pointer to the header,
// so the collector can walk a homogeneous intrusive list and recover the
// concrete type from `kind`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjKind {
    String,
    Function,
    Native,
    Closure,
    Upvalue,
    Class,
    Instance,
    BoundMethod,
}

#[repr(C)]
pub struct Obj {
    pub kind: ObjKind,
    pub is_marked: bool,
    pub next: *mut Obj,
}

impl Obj {
    pub fn header(kind: ObjKind) -> Obj {
        Obj { kind, is_marked: false, next: std::ptr::null_mut() }
    }
}

// ── Variants ─────────────────────────────────────────────────────────

#[repr(C)]
pub struct ObjString {
    pub obj: Obj,
    pub hash: u32,
    /// Immutable after interning.
    pub chars: String,
}

#[repr(C)]
pub struct ObjFunction {
    pub obj: Obj,
    pub arity: usize,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    /// Null for the top-level script.
    pub name: *mut ObjString,
}

pub type NativeFn = fn(args: &[Value]) -> Value;

#[repr(C)]
pub struct ObjNative {
    pub obj: Obj,
    pub function: NativeFn,
}

#[repr(C)]
pub struct ObjClosure {
    pub obj: Obj,
    pub function: *mut ObjFunction,
    /// Length always equals the function's `upvalue_count`.
    pub upvalues: Vec<*mut ObjUpvalue>,
}

/// Where a captured variable currently lives: a value-stack slot while the
/// variable is in scope, the upvalue's own storage after it is closed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpvalueSlot {
    Open(usize),
    Closed(Value),
}

#[repr(C)]
pub struct ObjUpvalue {
    pub obj: Obj,
    pub location: UpvalueSlot,
    /// Link in the VM's open-upvalue list, sorted by slot descending.
    pub next_open: *mut ObjUpvalue,
}

#[repr(C)]
pub struct ObjClass {
    pub obj: Obj,
    pub name: *mut ObjString,
    pub methods: Table,
}

#[repr(C)]
pub struct ObjInstance {
    pub obj: Obj,
    pub class: *mut ObjClass,
    pub fields: Table,
}

#[repr(C)]
pub struct ObjBoundMethod {
    pub obj: Obj,
    pub receiver: Value,
    pub method: *mut ObjClosure,
}

// ── FNV-1a ───────────────────────────────────────────────────────────

pub fn hash_string(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &byte in bytes {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

// ── Printing ─────────────────────────────────────────────────────────

/// # Safety
/// `obj` must point at a live managed object.
pub unsafe fn write_object(f: &mut fmt::Formatter<'_>, obj: *mut Obj) -> fmt::Result {
    match (*obj).kind {
        ObjKind::String => write!(f, "{}", (*(obj as *mut ObjString)).chars),
        ObjKind::Function => write_function(f, obj as *mut ObjFunction),
        ObjKind::Native => write!(f, "<native fn>"),
        ObjKind::Closure => write_function(f, (*(obj as *mut ObjClosure)).function),
        ObjKind::Upvalue => write!(f, "upvalue"),
        ObjKind::Class => write!(f, "{}", (*(*(obj as *mut ObjClass)).name).chars),
        ObjKind::Instance => {
            let class = (*(obj as *mut ObjInstance)).class;
            write!(f, "{} instance", (*(*class).name).chars)
        }
        ObjKind::BoundMethod => {
            write_function(f, (*(*(obj as *mut ObjBoundMethod)).method).function)
        }
    }
}

unsafe fn write_function(f: &mut fmt::Formatter<'_>, function: *mut ObjFunction) -> fmt::Result {
    let name = (*function).name;
    if name.is_null() {
        write!(f, "<script>")
    } else {
        write!(f, "<fn {}>", (*name).chars)
    }
}
