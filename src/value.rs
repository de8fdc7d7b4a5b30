//! The runtime's value representation: immediates that never touch the
//! heap, and the tagged payloads that do.

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::ptr::NonNull;
use std::rc::Rc;

/// An interned identifier. The symbol table itself lives in the embedding
/// interpreter; the collector only ever needs to compare and copy these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(pub u32);

/// The kind tag of a heap object. `Free` marks a slot on a page's free list;
/// every other variant is a live object kind. Immediate kinds (false, true,
/// fixnum, symbol, float) never appear here — see [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Object,
    Class,
    Module,
    IClass,
    SClass,
    String,
    Array,
    Hash,
    Range,
    Data,
    Proc,
    Env,
    Fiber,
    Free,
}

/// GC color. Tri-color vocabulary collapses to two colors because this
/// collector is stop-the-world: "gray" only ever exists transiently on the
/// native call stack during `mark`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    White,
    Black,
}

/// A value the interpreter can hold: either encoded inline, or a pointer
/// into the heap. Inline variants never occupy a heap slot and are silently
/// ignored by [`crate::arena::Arena::protect`].
#[derive(Clone, Copy)]
pub enum Value {
    False,
    True,
    Fixnum(i64),
    Symbol(Symbol),
    Float(f64),
    Heap(GcRef),
}

impl Value {
    /// Immediate values never need protecting or tracing.
    pub fn is_immediate(&self) -> bool {
        !matches!(self, Value::Heap(_))
    }

    pub fn as_gc_ref(&self) -> Option<GcRef> {
        match self {
            Value::Heap(r) => Some(*r),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::False => write!(f, "false"),
            Value::True => write!(f, "true"),
            Value::Fixnum(n) => write!(f, "{n}"),
            Value::Symbol(s) => write!(f, ":{}", s.0),
            Value::Float(x) => write!(f, "{x}"),
            Value::Heap(r) => write!(f, "#<{:?} {:?}>", r.kind(), r.0),
        }
    }
}

/// A stable, non-null pointer to a live slot. Slots never move while
/// allocated, so this is a legitimate long-lived identity, not just a
/// borrow — that's the whole point of a non-moving heap.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct GcRef(pub(crate) NonNull<RValue>);

impl GcRef {
    /// # Safety
    /// The pointer must address a live (non-`Free`) slot for as long as the
    /// returned reference is used.
    pub unsafe fn get(&self) -> &RValue {
        unsafe { self.0.as_ref() }
    }

    /// # Safety
    /// Same as [`GcRef::get`], plus: no other live reference to this slot
    /// may be observed for the duration of the borrow. The collector only
    /// ever calls this while the mutator is not running (stop-the-world),
    /// so this holds by construction.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut(&self) -> &mut RValue {
        unsafe { &mut *self.0.as_ptr() }
    }

    pub fn kind(&self) -> ObjectKind {
        unsafe { self.get().payload.kind() }
    }

    pub fn as_ptr(&self) -> *mut RValue {
        self.0.as_ptr()
    }

    pub(crate) unsafe fn from_raw(ptr: NonNull<RValue>) -> GcRef {
        GcRef(ptr)
    }
}

impl fmt::Debug for GcRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GcRef({:?})", self.0)
    }
}

/// Instance variables. A thin, mark-able wrapper so the mark/sweep dispatch
/// tables read the way a `mark_iv`/`free_iv` hook pair would describe them —
/// `free_iv` is just this type's `Drop`.
#[derive(Debug, Default)]
pub struct IvarTable(pub HashMap<Symbol, Value>);

impl IvarTable {
    pub fn new() -> Self {
        IvarTable(HashMap::new())
    }

    pub fn get(&self, name: Symbol) -> Option<Value> {
        self.0.get(&name).copied()
    }

    pub fn set(&mut self, name: Symbol, value: Value) {
        self.0.insert(name, value);
    }
}

/// A class or module's method table: symbol -> proc (or some builtin
/// marker, modeled here as an arbitrary `Value`).
#[derive(Debug, Default)]
pub struct MethodTable(pub HashMap<Symbol, Value>);

impl MethodTable {
    pub fn new() -> Self {
        MethodTable(HashMap::new())
    }
}

/// A hash object's backing table. Modeled as an association list rather
/// than `std::collections::HashMap`, since runtime `Value`s (floats,
/// mutable heap references) aren't a sound `Hash`/`Eq` key on their own —
/// the real key hashing lives in the interpreter this collector serves,
/// out of scope here.
#[derive(Debug, Default)]
pub struct HashTable(pub Vec<(Value, Value)>);

impl HashTable {
    pub fn new() -> Self {
        HashTable(Vec::new())
    }
}

/// A string's backing buffer. `Shared` decrements a refcount on finalize
/// (via `Rc`'s own `Drop`); `Static` is the "no-free" case — data owned by
/// the embedder, never freed by the collector.
pub enum StringRepr {
    Owned(Vec<u8>),
    Shared(Rc<Vec<u8>>),
    Static(&'static [u8]),
}

impl StringRepr {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            StringRepr::Owned(v) => v,
            StringRepr::Shared(v) => v,
            StringRepr::Static(v) => v,
        }
    }
}

impl fmt::Debug for StringRepr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StringRepr({} bytes)", self.as_bytes().len())
    }
}

/// An array's backing storage. `Shared` is the "shared array buffer" case
/// finalize just drops the `Rc`, decrementing the
/// refcount; the buffer is freed only when the last reference goes away.
pub enum ArrayRepr {
    Owned(Vec<Value>),
    Shared(Rc<std::cell::RefCell<Vec<Value>>>),
}

impl fmt::Debug for ArrayRepr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArrayRepr::Owned(v) => write!(f, "ArrayRepr::Owned(len={})", v.len()),
            ArrayRepr::Shared(v) => write!(f, "ArrayRepr::Shared(len={})", v.borrow().len()),
        }
    }
}

/// A suspended execution context, as captured by a fiber or the root
/// execution context. Deliberately simplified relative to a real bytecode
/// VM: enough structure to exercise `mark_context` the way
/// describes it, nothing more.
#[derive(Debug, Default)]
pub struct ExecContext {
    /// The full register/value stack backing every call frame.
    pub stack: Vec<Value>,
    /// Valid length of `stack` right now.
    pub stack_len: usize,
    /// Pending `ensure` handlers, indexed `[0, eidx)`.
    pub ensure_stack: Vec<Value>,
    /// Call frames from `cibase` up to (and including) the current one.
    pub call_infos: Vec<CallInfo>,
    /// If this context was resumed from another fiber, that fiber's object.
    pub prev_fiber: Option<GcRef>,
}

impl ExecContext {
    pub fn new() -> Self {
        ExecContext::default()
    }
}

/// One call frame: the environment, proc, and target class active when the
/// frame was pushed, plus how many registers of the value stack it claims.
#[derive(Debug, Clone, Copy)]
pub struct CallInfo {
    pub env: Option<GcRef>,
    pub proc_: Option<GcRef>,
    pub target_class: Option<GcRef>,
    pub nregs: usize,
}

/// One entry of the instruction-representation pool: a bytecode unit's own
/// constant pool, walked during root enumeration.
#[derive(Debug, Default)]
pub struct IseqPoolEntry {
    pub pool: Vec<Value>,
}

/// The kind-tagged payload every live slot carries. The enum discriminant
/// *is* the kind tag — a separate tag field and payload union collapse into
/// one Rust enum, since the discriminant already tells us which arm is
/// live; duplicating it in a separate field would just invite the two
/// getting out of sync.
pub enum Payload {
    Free {
        next: Option<NonNull<RValue>>,
    },
    Object {
        ivars: IvarTable,
    },
    Class {
        ivars: IvarTable,
        methods: MethodTable,
        super_class: Option<GcRef>,
    },
    Module {
        ivars: IvarTable,
        methods: MethodTable,
        super_class: Option<GcRef>,
    },
    SClass {
        ivars: IvarTable,
        methods: MethodTable,
        super_class: Option<GcRef>,
    },
    IClass {
        super_class: Option<GcRef>,
    },
    String {
        data: StringRepr,
    },
    Array {
        storage: ArrayRepr,
    },
    Hash {
        ivars: IvarTable,
        table: HashTable,
    },
    Range {
        beg: Value,
        end: Value,
        exclusive: bool,
    },
    Data {
        ivars: IvarTable,
        ptr: *mut u8,
        free_hook: Option<fn(*mut u8)>,
    },
    Proc {
        env: Option<GcRef>,
        target_class: Option<GcRef>,
    },
    Env {
        top_level: bool,
        values: Vec<Value>,
    },
    Fiber {
        context: ExecContext,
    },
}

impl Payload {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Payload::Free { .. } => ObjectKind::Free,
            Payload::Object { .. } => ObjectKind::Object,
            Payload::Class { .. } => ObjectKind::Class,
            Payload::Module { .. } => ObjectKind::Module,
            Payload::SClass { .. } => ObjectKind::SClass,
            Payload::IClass { .. } => ObjectKind::IClass,
            Payload::String { .. } => ObjectKind::String,
            Payload::Array { .. } => ObjectKind::Array,
            Payload::Hash { .. } => ObjectKind::Hash,
            Payload::Range { .. } => ObjectKind::Range,
            Payload::Data { .. } => ObjectKind::Data,
            Payload::Proc { .. } => ObjectKind::Proc,
            Payload::Env { .. } => ObjectKind::Env,
            Payload::Fiber { .. } => ObjectKind::Fiber,
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, Payload::Free { .. })
    }
}

/// A heap slot. Every page is an array of these; their address never
/// changes once allocated, which is what lets `GcRef` be a bare pointer.
pub struct RValue {
    pub class: Cell<Option<GcRef>>,
    pub(crate) color: Cell<Color>,
    /// Forced-dead marker: lets the host (e.g. fiber shutdown) condemn an
    /// object ahead of the next sweep without waiting for unreachability.
    pub(crate) dead: Cell<bool>,
    pub payload: Payload,
}

impl RValue {
    pub(crate) fn new_free(next: Option<NonNull<RValue>>) -> RValue {
        RValue {
            class: Cell::new(None),
            color: Cell::new(Color::White),
            dead: Cell::new(false),
            payload: Payload::Free { next },
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.payload.kind()
    }

    pub fn is_white(&self) -> bool {
        self.color.get() == Color::White
    }

    pub fn is_dead(&self) -> bool {
        self.dead.get()
    }

    /// Mark this object dead ahead of schedule; the next sweep will finalize
    /// it regardless of reachability. Used e.g. to tear down a fiber whose
    /// owning context is being discarded out-of-band.
    pub fn kill(&self) {
        self.dead.set(true);
    }

    pub(crate) fn paint_white(&self) {
        self.color.set(Color::White);
    }

    pub(crate) fn paint_black(&self) {
        self.color.set(Color::Black);
    }
}
