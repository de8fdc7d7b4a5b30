//! The mark phase: root enumeration followed by type-dispatched
//! child traversal, painting every reachable slot black.

use std::collections::VecDeque;

use crate::arena::Arena;
use crate::value::{CallInfo, ExecContext, GcRef, IseqPoolEntry, Payload, Value};

/// Drives one mark pass. Owns the gray worklist so the traversal is
/// iterative rather than recursing the native stack once per object —
/// deeply nested structures (long linked lists built out of `Array`s,
/// say) would otherwise blow the stack during collection.
pub struct Marker {
    gray: VecDeque<GcRef>,
}

impl Marker {
    pub fn new() -> Marker {
        Marker { gray: VecDeque::new() }
    }

    /// Root enumeration, in the fixed order: globals, then
    /// arena entries, then the fixed runtime singletons, then the root
    /// execution context, then the iseq constant pools.
    #[allow(clippy::too_many_arguments)]
    pub fn mark_roots(
        &mut self,
        globals: &[Value],
        arena: &Arena,
        object_class: Option<GcRef>,
        top_self: Option<Value>,
        exc: Option<Value>,
        root_context: &ExecContext,
        iseq_pool: &[IseqPoolEntry],
    ) {
        for &v in globals {
            self.mark_value(v);
        }
        for ptr in arena.iter() {
            self.mark(ptr);
        }
        if let Some(oc) = object_class {
            self.mark(oc);
        }
        if let Some(v) = top_self {
            self.mark_value(v);
        }
        if let Some(v) = exc {
            self.mark_value(v);
        }
        self.mark_context(root_context);
        for entry in iseq_pool {
            for &v in &entry.pool {
                self.mark_value(v);
            }
        }
        self.drain();
    }

    pub fn mark_value(&mut self, value: Value) {
        if let Some(ptr) = value.as_gc_ref() {
            self.mark(ptr);
        }
    }

    /// Push `ptr` onto the gray worklist if it isn't black already. Safe to
    /// call outside a `mark_roots` pass (e.g. a write barrier that wants to
    /// mark-and-drain immediately); the queue is drained lazily by whoever
    /// calls [`Marker::drain`].
    pub fn mark(&mut self, ptr: GcRef) {
        let obj = unsafe { ptr.get() };
        if obj.is_white() {
            obj.paint_black();
            self.gray.push_back(ptr);
        }
    }

    pub fn mark_context(&mut self, ctx: &ExecContext) {
        for &v in &ctx.stack[..ctx.stack_len.min(ctx.stack.len())] {
            self.mark_value(v);
        }
        for &v in &ctx.ensure_stack {
            self.mark_value(v);
        }
        for ci in &ctx.call_infos {
            self.mark_call_info(ci);
        }
        if let Some(prev) = ctx.prev_fiber {
            self.mark(prev);
        }
    }

    fn mark_call_info(&mut self, ci: &CallInfo) {
        if let Some(env) = ci.env {
            self.mark(env);
        }
        if let Some(p) = ci.proc_ {
            self.mark(p);
        }
        if let Some(tc) = ci.target_class {
            self.mark(tc);
        }
    }

    /// Drain the gray worklist, dispatching each object's children by kind
    /// per kind. Every object's `class` field is a
    /// child regardless of kind.
    fn drain(&mut self) {
        while let Some(ptr) = self.gray.pop_front() {
            let obj = unsafe { ptr.get() };
            if let Some(class) = obj.class.get() {
                self.mark(class);
            }
            match &obj.payload {
                Payload::Free { .. } => unreachable!("a Free slot can't be gray"),
                Payload::Object { ivars } => self.mark_ivars(ivars),
                Payload::Class { ivars, methods, super_class }
                | Payload::Module { ivars, methods, super_class }
                | Payload::SClass { ivars, methods, super_class } => {
                    self.mark_ivars(ivars);
                    self.mark_methods(methods);
                    if let Some(sc) = super_class {
                        self.mark(*sc);
                    }
                }
                Payload::IClass { super_class } => {
                    if let Some(sc) = super_class {
                        self.mark(*sc);
                    }
                }
                Payload::String { .. } => {}
                Payload::Array { storage } => match storage {
                    crate::value::ArrayRepr::Owned(items) => {
                        for &v in items {
                            self.mark_value(v);
                        }
                    }
                    crate::value::ArrayRepr::Shared(buf) => {
                        for &v in buf.borrow().iter() {
                            self.mark_value(v);
                        }
                    }
                },
                Payload::Hash { ivars, table } => {
                    self.mark_ivars(ivars);
                    for &(k, v) in &table.0 {
                        self.mark_value(k);
                        self.mark_value(v);
                    }
                }
                Payload::Range { beg, end, .. } => {
                    self.mark_value(*beg);
                    self.mark_value(*end);
                }
                Payload::Data { ivars, .. } => self.mark_ivars(ivars),
                Payload::Proc { env, target_class } => {
                    if let Some(e) = env {
                        self.mark(*e);
                    }
                    if let Some(tc) = target_class {
                        self.mark(*tc);
                    }
                }
                Payload::Env { top_level, values } => {
                    if *top_level {
                        for &v in values {
                            self.mark_value(v);
                        }
                    }
                }
                Payload::Fiber { context } => self.mark_context(context),
            }
        }
    }

    fn mark_ivars(&mut self, ivars: &crate::value::IvarTable) {
        for &v in ivars.0.values() {
            self.mark_value(v);
        }
    }

    fn mark_methods(&mut self, methods: &crate::value::MethodTable) {
        for &v in methods.0.values() {
            self.mark_value(v);
        }
    }
}

impl Default for Marker {
    fn default() -> Self {
        Marker::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Color, IvarTable, RValue, Symbol};
    use std::cell::Cell;
    use std::ptr::NonNull;

    fn leak(payload: Payload) -> GcRef {
        let boxed = Box::new(RValue {
            class: Cell::new(None),
            color: Cell::new(Color::White),
            dead: Cell::new(false),
            payload,
        });
        let ptr = NonNull::from(Box::leak(boxed));
        unsafe { GcRef::from_raw(ptr) }
    }

    #[test]
    fn marking_object_paints_it_black() {
        let obj = leak(Payload::Object { ivars: IvarTable::new() });
        let mut marker = Marker::new();
        marker.mark(obj);
        assert!(!unsafe { obj.get() }.is_white());
    }

    #[test]
    fn marking_follows_ivar_chain() {
        let child = leak(Payload::Object { ivars: IvarTable::new() });
        let mut ivars = IvarTable::new();
        ivars.set(Symbol(1), Value::Heap(child));
        let parent = leak(Payload::Object { ivars });

        let mut marker = Marker::new();
        marker.mark(parent);
        marker.drain();
        assert!(!unsafe { child.get() }.is_white());
    }

    #[test]
    fn marking_twice_is_idempotent() {
        let obj = leak(Payload::Object { ivars: IvarTable::new() });
        let mut marker = Marker::new();
        marker.mark(obj);
        marker.mark(obj);
        assert_eq!(marker.gray.len(), 1);
    }
}
