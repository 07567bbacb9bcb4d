use std::mem;
use std::ptr;

use crate::chunk::Chunk;
use crate::object::{
    hash_string, NativeFn, Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjFunction, ObjInstance,
    ObjKind, ObjNative, ObjString, ObjUpvalue, UpvalueSlot,
};
use crate::table::Table;
use crate::value::Value;

const GC_HEAP_GROW_FACTOR: usize = 2;
const FIRST_GC: usize = 1024 * 1024;

/// The managed heap: every object is allocated here, linked onto one
/// intrusive list, and freed either by a sweep or when the Gc drops.
///
/// The Gc does not decide *when* to collect — it has no view of the roots.
/// The VM asks `should_collect` at its allocation sites, marks its roots,
/// then drives the trace/weak/sweep phases. The gray worklist is a plain
/// `Vec` outside the managed heap.
pub struct Gc {
    objects: *mut Obj,
    /// Interning set; keys are weak (cleared by `remove_white` each cycle).
    pub strings: Table,
    gray_stack: Vec<*mut Obj>,
    bytes_allocated: usize,
    next_gc: usize,
}

impl Default for Gc {
    fn default() -> Gc {
        Gc::new()
    }
}

impl Gc {
    pub fn new() -> Gc {
        Gc {
            objects: ptr::null_mut(),
            strings: Table::new(),
            gray_stack: Vec::new(),
            bytes_allocated: 0,
            next_gc: FIRST_GC,
        }
    }

    /// True when the heap has outgrown the current threshold. The owner is
    /// expected to collect before the allocation that prompted the question.
    pub fn should_collect(&self) -> bool {
        cfg!(feature = "gc-stress") || self.bytes_allocated > self.next_gc
    }

    // ── Allocation ───────────────────────────────────────────────────

    fn allocate<T>(&mut self, object: T, extra_bytes: usize) -> *mut T {
        self.bytes_allocated += mem::size_of::<T>() + extra_bytes;
        let ptr = Box::into_raw(Box::new(object));
        let obj = ptr as *mut Obj;
        // SAFETY: every T passed here starts with an Obj header (repr(C)).
        unsafe {
            (*obj).next = self.objects;
            #[cfg(feature = "gc-trace")]
            eprintln!(
                "{obj:p} allocate {} for {:?}",
                mem::size_of::<T>() + extra_bytes,
                (*obj).kind
            );
        }
        self.objects = obj;
        ptr
    }

    pub fn new_function(
        &mut self,
        name: *mut ObjString,
        arity: usize,
        upvalue_count: usize,
        chunk: Chunk,
    ) -> *mut ObjFunction {
        self.allocate(
            ObjFunction { obj: Obj::header(ObjKind::Function), arity, upvalue_count, chunk, name },
            0,
        )
    }

    pub fn new_native(&mut self, function: NativeFn) -> *mut ObjNative {
        self.allocate(ObjNative { obj: Obj::header(ObjKind::Native), function }, 0)
    }

    pub fn new_closure(&mut self, function: *mut ObjFunction) -> *mut ObjClosure {
        // SAFETY: `function` is a live managed object.
        let upvalue_count = unsafe { (*function).upvalue_count };
        // Slots start null and are filled by OP_CLOSURE; marking skips null.
        let upvalues = vec![ptr::null_mut(); upvalue_count];
        self.allocate(ObjClosure { obj: Obj::header(ObjKind::Closure), function, upvalues }, 0)
    }

    pub fn new_upvalue(&mut self, slot: usize) -> *mut ObjUpvalue {
        self.allocate(
            ObjUpvalue {
                obj: Obj::header(ObjKind::Upvalue),
                location: UpvalueSlot::Open(slot),
                next_open: ptr::null_mut(),
            },
            0,
        )
    }

    pub fn new_class(&mut self, name: *mut ObjString) -> *mut ObjClass {
        self.allocate(ObjClass { obj: Obj::header(ObjKind::Class), name, methods: Table::new() }, 0)
    }

    pub fn new_instance(&mut self, class: *mut ObjClass) -> *mut ObjInstance {
        self.allocate(
            ObjInstance { obj: Obj::header(ObjKind::Instance), class, fields: Table::new() },
            0,
        )
    }

    pub fn new_bound_method(
        &mut self,
        receiver: Value,
        method: *mut ObjClosure,
    ) -> *mut ObjBoundMethod {
        self.allocate(ObjBoundMethod { obj: Obj::header(ObjKind::BoundMethod), receiver, method }, 0)
    }

    // ── Interning ────────────────────────────────────────────────────

    /// Interns a copy of `chars`, or returns the existing canonical string.
    pub fn copy_string(&mut self, chars: &str) -> *mut ObjString {
        let hash = hash_string(chars.as_bytes());
        if let Some(interned) = self.strings.find_string(chars, hash) {
            return interned;
        }
        self.allocate_string(chars.to_owned(), hash)
    }

    /// Interning variant that takes ownership of an already-built string.
    pub fn take_string(&mut self, chars: String) -> *mut ObjString {
        let hash = hash_string(chars.as_bytes());
        if let Some(interned) = self.strings.find_string(&chars, hash) {
            return interned;
        }
        self.allocate_string(chars, hash)
    }

    fn allocate_string(&mut self, chars: String, hash: u32) -> *mut ObjString {
        let extra = chars.capacity();
        let string =
            self.allocate(ObjString { obj: Obj::header(ObjKind::String), hash, chars }, extra);
        self.strings.set(string, Value::Nil);
        string
    }

    // ── Marking ──────────────────────────────────────────────────────

    pub fn mark_value(&mut self, value: Value) {
        if let Value::Obj(obj) = value {
            self.mark_object(obj);
        }
    }

    pub fn mark_object(&mut self, object: *mut Obj) {
        if object.is_null() {
            return;
        }
        // SAFETY: non-null object pointers reachable from roots are live.
        unsafe {
            if (*object).is_marked {
                return;
            }
            (*object).is_marked = true;
        }
        #[cfg(feature = "gc-trace")]
        eprintln!("{object:p} mark");
        self.gray_stack.push(object);
    }

    pub fn mark_table(&mut self, table: &Table) {
        for (key, value) in table.iter() {
            self.mark_object(key as *mut Obj);
            self.mark_value(value);
        }
    }

    // ── Tracing ──────────────────────────────────────────────────────

    /// Drains the gray worklist, blackening each object by marking its
    /// referents. Idempotent marking keeps cycles from looping.
    pub fn trace_references(&mut self) {
        while let Some(object) = self.gray_stack.pop() {
            self.blacken_object(object);
        }
    }

    fn blacken_object(&mut self, object: *mut Obj) {
        #[cfg(feature = "gc-trace")]
        eprintln!("{object:p} blacken");
        // SAFETY: gray objects were live when marked and nothing is freed
        // until the sweep phase.
        unsafe {
            match (*object).kind {
                ObjKind::String | ObjKind::Native => {}
                ObjKind::Upvalue => {
                    // Open upvalues point into the stack, which is a root.
                    if let UpvalueSlot::Closed(value) = (*(object as *mut ObjUpvalue)).location {
                        self.mark_value(value);
                    }
                }
                ObjKind::Function => {
                    let function = object as *mut ObjFunction;
                    self.mark_object((*function).name as *mut Obj);
                    for index in 0..(*function).chunk.constants.len() {
                        let constant = (&(*function).chunk.constants)[index];
                        self.mark_value(constant);
                    }
                }
                ObjKind::Closure => {
                    let closure = object as *mut ObjClosure;
                    self.mark_object((*closure).function as *mut Obj);
                    for index in 0..(*closure).upvalues.len() {
                        let upvalue = (&(*closure).upvalues)[index];
                        self.mark_object(upvalue as *mut Obj);
                    }
                }
                ObjKind::Class => {
                    let class = object as *mut ObjClass;
                    self.mark_object((*class).name as *mut Obj);
                    let methods = &(*class).methods;
                    self.mark_table(methods);
                }
                ObjKind::Instance => {
                    let instance = object as *mut ObjInstance;
                    self.mark_object((*instance).class as *mut Obj);
                    let fields = &(*instance).fields;
                    self.mark_table(fields);
                }
                ObjKind::BoundMethod => {
                    let bound = object as *mut ObjBoundMethod;
                    self.mark_value((*bound).receiver);
                    self.mark_object((*bound).method as *mut Obj);
                }
            }
        }
    }

    // ── Weak references & sweep ──────────────────────────────────────

    /// Drops interning entries whose strings were not marked, so the intern
    /// set never keeps a string alive on its own.
    pub fn remove_white_strings(&mut self) {
        self.strings.remove_white();
    }

    /// Frees every unmarked object, clears surviving marks, and raises the
    /// next collection threshold.
    pub fn sweep(&mut self) {
        let mut previous: *mut Obj = ptr::null_mut();
        let mut object = self.objects;
        // SAFETY: the intrusive list only contains live objects; unlinking
        // happens before the node is freed.
        unsafe {
            while !object.is_null() {
                if (*object).is_marked {
                    (*object).is_marked = false;
                    previous = object;
                    object = (*object).next;
                } else {
                    let unreached = object;
                    object = (*object).next;
                    if previous.is_null() {
                        self.objects = object;
                    } else {
                        (*previous).next = object;
                    }
                    self.free_object(unreached);
                }
            }
        }
        self.next_gc = self.bytes_allocated * GC_HEAP_GROW_FACTOR;
    }

    /// # Safety
    /// `object` must be an unlinked, live allocation from this Gc.
    unsafe fn free_object(&mut self, object: *mut Obj) {
        #[cfg(feature = "gc-trace")]
        eprintln!("{object:p} free {:?}", (*object).kind);
        match (*object).kind {
            ObjKind::String => {
                let string = Box::from_raw(object as *mut ObjString);
                self.bytes_allocated = self
                    .bytes_allocated
                    .saturating_sub(mem::size_of::<ObjString>() + string.chars.capacity());
            }
            ObjKind::Function => {
                drop(Box::from_raw(object as *mut ObjFunction));
                self.bytes_allocated =
                    self.bytes_allocated.saturating_sub(mem::size_of::<ObjFunction>());
            }
            ObjKind::Native => {
                drop(Box::from_raw(object as *mut ObjNative));
                self.bytes_allocated =
                    self.bytes_allocated.saturating_sub(mem::size_of::<ObjNative>());
            }
            ObjKind::Closure => {
                drop(Box::from_raw(object as *mut ObjClosure));
                self.bytes_allocated =
                    self.bytes_allocated.saturating_sub(mem::size_of::<ObjClosure>());
            }
            ObjKind::Upvalue => {
                drop(Box::from_raw(object as *mut ObjUpvalue));
                self.bytes_allocated =
                    self.bytes_allocated.saturating_sub(mem::size_of::<ObjUpvalue>());
            }
            ObjKind::Class => {
                drop(Box::from_raw(object as *mut ObjClass));
                self.bytes_allocated =
                    self.bytes_allocated.saturating_sub(mem::size_of::<ObjClass>());
            }
            ObjKind::Instance => {
                drop(Box::from_raw(object as *mut ObjInstance));
                self.bytes_allocated =
                    self.bytes_allocated.saturating_sub(mem::size_of::<ObjInstance>());
            }
            ObjKind::BoundMethod => {
                drop(Box::from_raw(object as *mut ObjBoundMethod));
                self.bytes_allocated =
                    self.bytes_allocated.saturating_sub(mem::size_of::<ObjBoundMethod>());
            }
        }
    }

    #[cfg(test)]
    pub fn object_count(&self) -> usize {
        let mut count = 0;
        let mut object = self.objects;
        while !object.is_null() {
            count += 1;
            // SAFETY: list nodes are live until freed.
            object = unsafe { (*object).next };
        }
        count
    }
}

impl Drop for Gc {
    fn drop(&mut self) {
        let mut object = self.objects;
        // SAFETY: teardown owns every remaining allocation.
        unsafe {
            while !object.is_null() {
                let next = (*object).next;
                self.free_object(object);
                object = next;
            }
        }
        self.objects = ptr::null_mut();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_string_interns_to_one_reference() {
        let mut gc = Gc::new();
        let a = gc.copy_string("hello");
        let b = gc.copy_string("hello");
        assert!(ptr::eq(a, b));
        let c = gc.copy_string("other");
        assert!(!ptr::eq(a, c));
    }

    #[test]
    fn take_string_reuses_existing_interned() {
        let mut gc = Gc::new();
        let a = gc.copy_string("shared");
        let b = gc.take_string(String::from("shared"));
        assert!(ptr::eq(a, b));
    }

    #[test]
    fn allocations_land_on_the_object_list() {
        let mut gc = Gc::new();
        assert_eq!(gc.object_count(), 0);
        gc.copy_string("one");
        gc.copy_string("two");
        let name = gc.copy_string("f");
        gc.new_function(name, 0, 0, Chunk::new());
        assert_eq!(gc.object_count(), 4);
    }

    #[test]
    fn marking_is_idempotent() {
        let mut gc = Gc::new();
        let s = gc.copy_string("s");
        gc.mark_object(s as *mut Obj);
        gc.mark_object(s as *mut Obj);
        assert_eq!(gc.gray_stack.len(), 1);
        gc.trace_references();
    }

    #[test]
    fn marking_null_is_a_no_op() {
        let mut gc = Gc::new();
        gc.mark_object(ptr::null_mut());
        assert!(gc.gray_stack.is_empty());
    }

    #[test]
    fn sweep_frees_unreachable_and_keeps_reachable() {
        let mut gc = Gc::new();
        let keep = gc.copy_string("keep");
        gc.copy_string("drop");
        assert_eq!(gc.object_count(), 2);

        gc.mark_object(keep as *mut Obj);
        gc.trace_references();
        gc.remove_white_strings();
        gc.sweep();

        assert_eq!(gc.object_count(), 1);
        // The survivor's mark bit was cleared for the next cycle.
        // SAFETY: `keep` survived the sweep.
        assert!(unsafe { !(*(keep as *mut Obj)).is_marked });
        // The dropped string left the intern set too.
        assert!(gc.strings.find_string("drop", hash_string(b"drop")).is_none());
        // And the survivor is still canonical.
        let again = gc.copy_string("keep");
        assert!(ptr::eq(keep, again));
    }

    #[test]
    fn tracing_marks_function_constants() {
        let mut gc = Gc::new();
        let name = gc.copy_string("f");
        let constant = gc.copy_string("a constant");
        let mut chunk = Chunk::new();
        chunk.add_constant(Value::Obj(constant as *mut Obj));
        let function = gc.new_function(name, 0, 0, chunk);

        gc.mark_object(function as *mut Obj);
        gc.trace_references();
        gc.remove_white_strings();
        gc.sweep();

        // Function, its name, and its constant all survive.
        assert_eq!(gc.object_count(), 3);
    }

    #[test]
    fn closure_upvalue_graph_survives_tracing() {
        let mut gc = Gc::new();
        let name = gc.copy_string("f");
        let function = gc.new_function(name, 0, 1, Chunk::new());
        let closure = gc.new_closure(function);
        let payload = gc.copy_string("captured");
        let upvalue = gc.new_upvalue(0);
        // SAFETY: both objects are live; this mimics OP_CLOSURE capture and
        // a later close.
        unsafe {
            (*upvalue).location = UpvalueSlot::Closed(Value::Obj(payload as *mut Obj));
            (&mut (*closure).upvalues)[0] = upvalue;
        }

        gc.mark_object(closure as *mut Obj);
        gc.trace_references();
        gc.remove_white_strings();
        gc.sweep();

        // closure + function + name + upvalue + captured payload
        assert_eq!(gc.object_count(), 5);
    }

    #[test]
    fn bytes_shrink_after_sweep() {
        let mut gc = Gc::new();
        let before = gc.bytes_allocated;
        gc.copy_string("some transient garbage");
        assert!(gc.bytes_allocated > before);
        gc.trace_references();
        gc.remove_white_strings();
        gc.sweep();
        assert_eq!(gc.bytes_allocated, before);
    }
}
