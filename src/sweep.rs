//! The sweep phase: walk every page, finalize and reclaim
//! whatever stayed white, repaint survivors white for the next cycle.

use std::ptr::NonNull;

use crate::heap::Heap;
use crate::value::{ArrayRepr, Payload, RValue};

/// Per-kind finalization. Most of this
/// is just Rust's own `Drop` running when we overwrite `payload` with
/// `Free` — `String`'s `Vec<u8>`, `Hash`'s association list, `Class`'s
/// method table all free themselves that way. The only finalization that
/// needs explicit code is `Data`'s foreign free hook, which has to run
/// *before* the payload is discarded.
fn finalize(slot: &RValue) {
    if let Payload::Data { ptr, free_hook: Some(hook), .. } = &slot.payload {
        if !ptr.is_null() {
            hook(*ptr);
        }
    }
}

/// Outcome of one sweep pass, for diagnostics and the testable-property
/// suite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub swept: usize,
    pub survivors: usize,
    pub pages_reclaimed: usize,
}

/// Walk every page in the heap. For each non-Free slot: if it's still
/// white (or force-killed), finalize and return it to its page's free
/// list; if it was marked black, repaint it white and leave it live for
/// the next cycle. A page that ends the pass fully free is handed back
/// to the heap's free-pages list (and, if completely empty of live
/// objects, released outright — except the one page every heap keeps to
/// avoid ping-ponging a fresh page in and out on light workloads).
pub fn sweep(heap: &mut Heap) -> SweepStats {
    let mut stats = SweepStats::default();
    let mut pages: Vec<NonNull<crate::page::Page>> = heap.pages().collect();

    for page_ptr in pages.drain(..) {
        let page = unsafe { &mut *page_ptr.as_ptr() };
        let was_in_free_list = page.has_free();

        for slot_ptr in page.iter_slots() {
            let slot = unsafe { &*slot_ptr.as_ptr() };
            if slot.payload.is_free() {
                continue;
            }
            if slot.is_white() || slot.is_dead() {
                finalize(slot);
                unsafe {
                    (*slot_ptr.as_ptr()).class.set(None);
                    (*slot_ptr.as_ptr()).dead.set(false);
                    (*slot_ptr.as_ptr()).payload = Payload::Free { next: None };
                }
                page.push_free(slot_ptr);
                stats.swept += 1;
            } else {
                slot.paint_white();
                stats.survivors += 1;
            }
        }

        if page.has_free() && !was_in_free_list {
            heap.link_free_page(page_ptr);
        }

        if page.free_count() == page.len() && heap.page_count() > 1 {
            heap.release_page(page_ptr);
            stats.pages_reclaimed += 1;
        }
    }

    stats
}

/// Shared by `Array::Shared`/`String::Shared`: dropping the payload drops
/// the `Rc`, which is all "shared buffer" finalization ever needs. Kept as
/// a named function purely so the intent reads at the call site in tests.
#[cfg(test)]
fn shares_buffer(a: &ArrayRepr, b: &ArrayRepr) -> bool {
    match (a, b) {
        (ArrayRepr::Shared(x), ArrayRepr::Shared(y)) => std::rc::Rc::ptr_eq(x, y),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Color, GcRef, IvarTable, StringRepr};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn alloc_in(heap: &mut Heap, payload: Payload) -> GcRef {
        let slot_ptr = loop {
            if let Some(p) = heap.take_free_slot() {
                break p;
            }
            heap.page_new();
        };
        unsafe {
            (*slot_ptr.as_ptr()).payload = payload;
            (*slot_ptr.as_ptr()).color.set(Color::White);
        }
        unsafe { GcRef::from_raw(slot_ptr) }
    }

    #[test]
    fn white_object_is_reclaimed() {
        let mut heap = Heap::init(4);
        let r = alloc_in(&mut heap, Payload::Object { ivars: IvarTable::new() });
        let stats = sweep(&mut heap);
        assert_eq!(stats.swept, 1);
        assert!(unsafe { r.get() }.payload.is_free());
    }

    #[test]
    fn black_object_survives_and_repaints_white() {
        let mut heap = Heap::init(4);
        let r = alloc_in(&mut heap, Payload::Object { ivars: IvarTable::new() });
        unsafe { r.get() }.paint_black();
        let stats = sweep(&mut heap);
        assert_eq!(stats.survivors, 1);
        assert!(unsafe { r.get() }.is_white());
    }

    #[test]
    fn killed_object_is_swept_despite_black() {
        let mut heap = Heap::init(4);
        let r = alloc_in(&mut heap, Payload::Object { ivars: IvarTable::new() });
        unsafe { r.get() }.paint_black();
        unsafe { r.get() }.kill();
        let stats = sweep(&mut heap);
        assert_eq!(stats.swept, 1);
    }

    #[test]
    fn data_free_hook_runs_on_sweep() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        fn hook(_p: *mut u8) {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }
        let mut heap = Heap::init(4);
        alloc_in(
            &mut heap,
            Payload::Data {
                ivars: IvarTable::new(),
                ptr: 1 as *mut u8,
                free_hook: Some(hook),
            },
        );
        sweep(&mut heap);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn string_buffer_is_freed_by_drop() {
        let mut heap = Heap::init(4);
        let r = alloc_in(
            &mut heap,
            Payload::String { data: StringRepr::Owned(vec![1, 2, 3]) },
        );
        let stats = sweep(&mut heap);
        assert_eq!(stats.swept, 1);
        assert!(unsafe { r.get() }.payload.is_free());
    }

    #[test]
    fn shares_buffer_detects_same_rc() {
        let a = ArrayRepr::Shared(std::rc::Rc::new(std::cell::RefCell::new(vec![])));
        let b = ArrayRepr::Shared(match &a {
            ArrayRepr::Shared(r) => r.clone(),
            _ => unreachable!(),
        });
        assert!(shares_buffer(&a, &b));
    }
}
