//! The collector's embedder-facing entry point. A `Runtime`
//! owns the heap, the arena, and the fixed root set, and is the only thing
//! allowed to trigger a collection — which is why the allocator's
//! OOM-retry policy lives here rather than in [`crate::memory`].

use std::alloc::Layout;

use crate::arena::Arena;
use crate::config::GcConfig;
use crate::error::GcError;
use crate::heap::Heap;
use crate::mark::Marker;
use crate::memory::{Allocator, HostAlloc, SystemAlloc};
use crate::sweep::{self, SweepStats};
use crate::value::{ExecContext, GcRef, IseqPoolEntry, ObjectKind, Payload, RValue, Value};

/// Where the collector is in its cycle. This collector has no incremental
/// or concurrent phase, so in practice every call to `collect` runs
/// `Marking` through `Sweeping` to completion before returning — the enum
/// exists so diagnostics and tests can observe which phase produced a
/// given piece of state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcPhase {
    Idle,
    Marking,
    Sweeping,
}

/// Fixed singleton roots every collection walks in addition to the arena
/// and the root execution context.
#[derive(Debug, Default)]
pub struct Roots {
    pub globals: Vec<Value>,
    pub object_class: Option<GcRef>,
    pub top_self: Option<Value>,
    pub exc: Option<Value>,
}

/// The whole collector: heap, arena, roots, and the allocator wrapper that
/// backs every object's dynamic storage (strings, arrays, hash tables).
pub struct Runtime<H: HostAlloc = SystemAlloc> {
    heap: Heap,
    arena: Arena,
    roots: Roots,
    root_context: ExecContext,
    iseq_pool: Vec<IseqPoolEntry>,
    allocator: Allocator<H>,
    phase: GcPhase,
    gc_disabled: bool,
    out_of_memory: bool,
    live: usize,
    config: GcConfig,
}

impl Runtime<SystemAlloc> {
    pub fn new(config: GcConfig) -> Self {
        Runtime::with_host(config, SystemAlloc)
    }
}

impl<H: HostAlloc> Runtime<H> {
    pub fn with_host(config: GcConfig, host: H) -> Self {
        log::debug!(
            "dynrt-gc: starting runtime (page_size={}, arena_size={})",
            config.page_size,
            config.arena_size
        );
        Runtime {
            heap: Heap::init(config.page_size),
            arena: Arena::new(config.arena_size),
            roots: Roots::default(),
            root_context: ExecContext::new(),
            iseq_pool: Vec::new(),
            allocator: Allocator::with_host(host),
            phase: GcPhase::Idle,
            gc_disabled: !config.auto_collect,
            out_of_memory: false,
            live: 0,
            config,
        }
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    pub fn phase(&self) -> GcPhase {
        self.phase
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn is_enabled(&self) -> bool {
        !self.gc_disabled
    }

    pub fn enable(&mut self) {
        self.gc_disabled = false;
    }

    pub fn disable(&mut self) {
        self.gc_disabled = true;
    }

    pub fn roots_mut(&mut self) -> &mut Roots {
        &mut self.roots
    }

    pub fn root_context_mut(&mut self) -> &mut ExecContext {
        &mut self.root_context
    }

    pub fn iseq_pool_mut(&mut self) -> &mut Vec<IseqPoolEntry> {
        &mut self.iseq_pool
    }

    pub fn arena_save(&self) -> usize {
        self.arena.save()
    }

    pub fn arena_restore(&mut self, index: usize) {
        self.arena.restore(index);
    }

    pub fn protect(&mut self, value: Value) -> Result<Value, GcError> {
        self.arena.protect(value)
    }

    pub fn protect_ptr(&mut self, ptr: GcRef) -> Result<GcRef, GcError> {
        self.arena.protect_ptr(ptr)
    }

    /// Full stop-the-world mark-and-sweep, regardless of `gc_disabled` —
    /// callers that want to respect the disabled flag check it themselves
    /// before calling (allocation does; an embedder asking for a collection
    /// explicitly does not).
    pub fn collect(&mut self) -> SweepStats {
        log::trace!("dynrt-gc: collection starting, {} live before mark", self.live);
        self.phase = GcPhase::Marking;
        let mut marker = Marker::new();
        marker.mark_roots(
            &self.roots.globals,
            &self.arena,
            self.roots.object_class,
            self.roots.top_self,
            self.roots.exc,
            &self.root_context,
            &self.iseq_pool,
        );

        self.phase = GcPhase::Sweeping;
        let stats = sweep::sweep(&mut self.heap);
        self.live = stats.survivors;
        self.phase = GcPhase::Idle;
        log::debug!(
            "dynrt-gc: collection done, swept {}, {} survivors, {} pages reclaimed",
            stats.swept,
            stats.survivors,
            stats.pages_reclaimed
        );
        stats
    }

    /// Collect only if GC is currently enabled. Used by the allocation path
    /// so a disabled runtime never triggers a surprise pause.
    fn maybe_collect(&mut self) {
        if !self.gc_disabled {
            self.collect();
        }
    }

    /// Allocate a slot for `payload`, running a collection first if that's
    /// allowed and the heap has no free slot, growing the heap if even that
    /// doesn't free one up. The new object is pushed onto the arena before
    /// it's handed back — from the moment it returns to the caller until
    /// it's stored into some other traceable root, the arena is the only
    /// thing keeping the next collection from reclaiming it.
    fn alloc_slot(&mut self, payload: Payload) -> GcRef {
        if self.heap.free_pages_head().is_none() {
            self.maybe_collect();
        }
        let slot_ptr = loop {
            if let Some(p) = self.heap.take_free_slot() {
                break p;
            }
            self.heap.page_new();
        };
        unsafe {
            (*slot_ptr.as_ptr()).class.set(None);
            (*slot_ptr.as_ptr()).dead.set(false);
            (*slot_ptr.as_ptr()).payload = payload;
            (*slot_ptr.as_ptr()).color.set(crate::value::Color::White);
        }
        self.live += 1;
        let r = unsafe { GcRef::from_raw(slot_ptr) };
        let _ = self.arena.protect_ptr(r);
        r
    }

    pub fn alloc_object(&mut self, class: Option<GcRef>) -> GcRef {
        let r = self.alloc_slot(Payload::Object { ivars: Default::default() });
        unsafe { r.get() }.class.set(class);
        r
    }

    pub fn alloc_class(&mut self, super_class: Option<GcRef>) -> GcRef {
        self.alloc_slot(Payload::Class {
            ivars: Default::default(),
            methods: Default::default(),
            super_class,
        })
    }

    pub fn alloc_module(&mut self) -> GcRef {
        self.alloc_slot(Payload::Module {
            ivars: Default::default(),
            methods: Default::default(),
            super_class: None,
        })
    }

    pub fn alloc_string(&mut self, bytes: Vec<u8>) -> GcRef {
        self.alloc_slot(Payload::String {
            data: crate::value::StringRepr::Owned(bytes),
        })
    }

    pub fn alloc_array(&mut self, items: Vec<Value>) -> GcRef {
        self.alloc_slot(Payload::Array {
            storage: crate::value::ArrayRepr::Owned(items),
        })
    }

    pub fn alloc_hash(&mut self) -> GcRef {
        self.alloc_slot(Payload::Hash {
            ivars: Default::default(),
            table: Default::default(),
        })
    }

    pub fn alloc_range(&mut self, beg: Value, end: Value, exclusive: bool) -> GcRef {
        self.alloc_slot(Payload::Range { beg, end, exclusive })
    }

    pub fn alloc_data(&mut self, ptr: *mut u8, free_hook: Option<fn(*mut u8)>) -> GcRef {
        self.alloc_slot(Payload::Data {
            ivars: Default::default(),
            ptr,
            free_hook,
        })
    }

    pub fn alloc_proc(&mut self, env: Option<GcRef>, target_class: Option<GcRef>) -> GcRef {
        self.alloc_slot(Payload::Proc { env, target_class })
    }

    pub fn alloc_env(&mut self, top_level: bool, values: Vec<Value>) -> GcRef {
        self.alloc_slot(Payload::Env { top_level, values })
    }

    pub fn alloc_fiber(&mut self, context: ExecContext) -> GcRef {
        self.alloc_slot(Payload::Fiber { context })
    }

    pub fn each_object(&self, mut f: impl FnMut(GcRef)) {
        for page in self.heap.pages() {
            let page = unsafe { page.as_ref() };
            for slot in page.iter_slots() {
                let is_free = unsafe { slot.as_ref().payload.is_free() };
                if !is_free {
                    f(unsafe { GcRef::from_raw(slot) });
                }
            }
        }
    }

    pub fn kind_counts(&self) -> std::collections::HashMap<ObjectKind, usize> {
        let mut counts = std::collections::HashMap::new();
        self.each_object(|r| {
            *counts.entry(r.kind()).or_insert(0) += 1;
        });
        counts
    }

    /// Raw allocation with the out-of-memory retry contract: on
    /// failure, run a full collection once and retry. If the retry still
    /// fails, the sticky out-of-memory flag decides what happens next: the
    /// first time it trips, it's set and [`GcError::OutOfMemory`] is
    /// returned to the caller as a recoverable error; if it was already
    /// set, the allocator has failed twice in a row with no collection in
    /// between able to help, and that's unrecoverable.
    ///
    /// # Panics
    /// If the host allocator fails its post-retry attempt while the sticky
    /// flag is already set — i.e. a second exhaustion in a row.
    ///
    /// # Safety
    /// Same contract as [`HostAlloc::realloc`].
    pub unsafe fn realloc(
        &mut self,
        ptr: *mut u8,
        old_layout: Option<Layout>,
        new_size: usize,
    ) -> Result<*mut u8, GcError> {
        let attempt = unsafe { self.allocator.try_realloc(ptr, old_layout, new_size) };
        if !attempt.is_null() || new_size == 0 {
            self.out_of_memory = false;
            return Ok(attempt);
        }

        log::warn!("dynrt-gc: host allocator returned null, running a collection and retrying");
        self.collect();

        let retried = unsafe { self.allocator.try_realloc(ptr, old_layout, new_size) };
        if !retried.is_null() {
            self.out_of_memory = false;
            return Ok(retried);
        }

        if self.out_of_memory {
            panic!("dynrt-gc: allocator exhausted twice in a row");
        }
        self.out_of_memory = true;
        log::warn!("dynrt-gc: allocator still exhausted after collection, raising out-of-memory");
        Err(GcError::OutOfMemory)
    }

    /// # Safety
    /// Same contract as [`HostAlloc::realloc`] with `old_layout: None`.
    pub unsafe fn alloc(&mut self, size: usize) -> Result<*mut u8, GcError> {
        unsafe { self.realloc(std::ptr::null_mut(), None, size) }
    }

    /// # Safety
    /// `ptr`/`layout` must describe a live allocation from this runtime.
    pub unsafe fn free(&mut self, ptr: *mut u8, layout: Layout) {
        let _ = unsafe { self.realloc(ptr, Some(layout), 0) };
    }

    /// Overflow-checked, zeroing `n`-element allocation, retried through
    /// the same OOM contract as [`Runtime::alloc`].
    ///
    /// # Safety
    /// The returned pointer, once non-null, is a fresh `n * size`-byte
    /// allocation owned by the caller.
    pub unsafe fn calloc(&mut self, n: usize, size: usize) -> Result<*mut u8, GcError> {
        if size != 0 && n > usize::MAX / size {
            return Ok(std::ptr::null_mut());
        }
        let total = n * size;
        let p = unsafe { self.alloc(total)? };
        if !p.is_null() {
            unsafe { std::ptr::write_bytes(p, 0, total) };
        }
        Ok(p)
    }
}

impl<H: HostAlloc> Drop for Runtime<H> {
    fn drop(&mut self) {
        let heap = &mut self.heap;
        heap.free_heap(|slot_ptr| {
            let slot: &RValue = unsafe { slot_ptr.as_ref() };
            if let Payload::Data { ptr, free_hook: Some(hook), .. } = &slot.payload {
                if !ptr.is_null() {
                    hook(*ptr);
                }
            }
        });
    }
}
