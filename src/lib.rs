//! A paged, stop-the-world, mark-and-sweep garbage collector core for an
//! embedded dynamic-language runtime.
//!
//! Objects live in fixed-size slots carved out of pages; a page's dead
//! slots thread into a free list, and pages with free slots thread into
//! the heap's free-pages list. An [`Arena`] protects freshly allocated
//! objects that aren't wired into a reachable structure yet, and a
//! [`Runtime`] ties the heap, the arena, and the fixed root set together
//! behind an allocator wrapper that retries once through a collection on
//! out-of-memory.
//!
//! ```rust
//! use dynrt_gc::{GcConfig, Runtime, Value};
//!
//! let mut rt = Runtime::new(GcConfig::default());
//! let obj = rt.alloc_object(None);
//! rt.roots_mut().globals.push(Value::Heap(obj));
//! rt.collect();
//! assert_eq!(rt.live_count(), 1);
//! ```

mod arena;
mod config;
mod error;
mod heap;
mod mark;
mod memory;
mod page;
mod runtime;
mod sweep;
mod value;

pub use arena::Arena;
pub use config::GcConfig;
pub use error::GcError;
pub use heap::Heap;
pub use mark::Marker;
pub use memory::{Allocator, HostAlloc, SystemAlloc};
pub use page::Page;
pub use runtime::{GcPhase, Roots, Runtime};
pub use sweep::SweepStats;
pub use value::{
    ArrayRepr, CallInfo, ExecContext, GcRef, HashTable, IseqPoolEntry, IvarTable, MethodTable,
    ObjectKind, Payload, RValue, StringRepr, Symbol, Value,
};
