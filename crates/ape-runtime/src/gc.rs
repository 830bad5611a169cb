//! Mark-and-sweep collector (spec.md §4.7).
//!
//! Every heap object is a `Box<ObjectBody>` whose raw pointer is handed out
//! as a [`Value::from_allocated`]. `GcMem` is the sole owner of record: it
//! tracks every live body in `objects`, runs mark-and-sweep when the
//! allocation counter crosses [`SWEEP_THRESHOLD`], and recycles reclaimed
//! bodies of poolable kinds instead of giving them back to the allocator.

use std::cell::{Cell, RefCell};

use crate::object::{ApeMap, ObjectBody, ObjectData, ObjectKind, SString};
use crate::value::Value;

/// Run a sweep after this many allocations since the last one.
pub const SWEEP_THRESHOLD: usize = 128;
/// Each per-kind pool holds at most this many reclaimed bodies.
pub const POOL_CAP: usize = 2048;
/// Arrays/maps longer than this are never pooled (the buffer would dominate
/// pool memory for a body that is unlikely to be reused at that size).
pub const TOO_LARGE_LEN: usize = 1024;
/// Strings whose heap allocation exceeds this many bytes are never pooled.
pub const TOO_LARGE_STRING_BYTES: usize = 4096;

/// The three object kinds worth recycling: they have a cheap "reset to
/// empty" operation and appear in allocation-heavy loops.
fn is_poolable(kind: ObjectKind) -> bool {
    matches!(kind, ObjectKind::Array | ObjectKind::Map | ObjectKind::String)
}

pub struct GcMem {
    objects: RefCell<Vec<*mut ObjectBody>>,
    pools: RefCell<[Vec<Box<ObjectBody>>; 3]>,
    bare_pool: RefCell<Vec<Box<ObjectBody>>>,
    pinned: RefCell<Vec<Value>>,
    allocations_since_sweep: Cell<usize>,
    pub sweeps_run: Cell<usize>,
}

fn pool_slot(kind: ObjectKind) -> usize {
    match kind {
        ObjectKind::Array => 0,
        ObjectKind::Map => 1,
        ObjectKind::String => 2,
        _ => unreachable!("only Array/Map/String are pooled"),
    }
}

impl GcMem {
    pub fn new() -> Box<GcMem> {
        Box::new(GcMem {
            objects: RefCell::new(Vec::new()),
            pools: RefCell::new([Vec::new(), Vec::new(), Vec::new()]),
            bare_pool: RefCell::new(Vec::new()),
            pinned: RefCell::new(Vec::new()),
            allocations_since_sweep: Cell::new(0),
            sweeps_run: Cell::new(0),
        })
    }

    /// Allocate (or recycle a pooled) body holding `data`, returning a
    /// pointer suitable for [`Value::from_allocated`]. `self_ptr` must be
    /// this `GcMem`'s own stable address (taken once by the VM after boxing
    /// it), used so a swept body can find its way back to the right pool.
    pub fn alloc(&self, self_ptr: *mut GcMem, data: ObjectData) -> *mut ObjectBody {
        let kind = data.kind();
        let body = if is_poolable(kind) {
            let mut pools = self.pools.borrow_mut();
            pools[pool_slot(kind)].pop()
        } else {
            self.bare_pool.borrow_mut().pop()
        };
        let ptr = match body {
            Some(mut b) => {
                b.data = data;
                b.mark.set(false);
                Box::into_raw(b)
            }
            None => Box::into_raw(Box::new(ObjectBody {
                mem: self_ptr,
                mark: Cell::new(false),
                data,
            })),
        };
        self.objects.borrow_mut().push(ptr);
        let n = self.allocations_since_sweep.get() + 1;
        self.allocations_since_sweep.set(n);
        ptr
    }

    pub fn should_sweep(&self) -> bool {
        self.allocations_since_sweep.get() >= SWEEP_THRESHOLD
    }

    /// Keep `value` alive across collections regardless of stack
    /// reachability. Returns a token to hand back to [`GcMem::unpin`].
    pub fn pin(&self, value: Value) -> usize {
        let mut pinned = self.pinned.borrow_mut();
        pinned.push(value);
        pinned.len() - 1
    }

    pub fn unpin(&self, token: usize) {
        let mut pinned = self.pinned.borrow_mut();
        if token < pinned.len() {
            pinned[token] = Value::none();
        }
    }

    /// Mark everything reachable from `roots` (and the pinned set), then
    /// reclaim every unmarked body — pooling it if its kind and size allow,
    /// otherwise dropping it. Returns the number of bodies reclaimed.
    pub fn sweep(&self, roots: &[&[Value]]) -> usize {
        self.sweeps_run.set(self.sweeps_run.get() + 1);
        self.allocations_since_sweep.set(0);

        for chunk in roots {
            for v in chunk.iter() {
                mark_value(*v);
            }
        }
        for v in self.pinned.borrow().iter() {
            mark_value(*v);
        }

        let mut objects = self.objects.borrow_mut();
        let mut reclaimed = 0usize;
        objects.retain(|&ptr| {
            // Safety: every pointer in `objects` was produced by `alloc` and
            // is only removed here, so it is still a valid, unique body.
            let body = unsafe { &*ptr };
            if body.mark.get() {
                body.mark.set(false);
                true
            } else {
                reclaimed += 1;
                self.reclaim(ptr);
                false
            }
        });
        tracing::debug!(reclaimed, live = objects.len(), "gc sweep");
        reclaimed
    }

    fn reclaim(&self, ptr: *mut ObjectBody) {
        // Safety: caller (`sweep`) just removed `ptr` from the live set and
        // guarantees it is unreachable, so reclaiming it here is the sole
        // remaining reference to the allocation.
        let boxed = unsafe { Box::from_raw(ptr) };
        let kind = boxed.kind();
        if is_poolable(kind) && poolable_size_ok(&boxed.data) {
            let mut pools = self.pools.borrow_mut();
            let slot = &mut pools[pool_slot(kind)];
            if slot.len() < POOL_CAP {
                slot.push(boxed);
            }
        } else if !is_poolable(kind) {
            let mut bare = self.bare_pool.borrow_mut();
            if bare.len() < POOL_CAP {
                bare.push(boxed);
            }
        }
        // Oversized poolable bodies, and pools at capacity, fall through
        // and are dropped here, freeing their buffers.
    }

    pub fn live_count(&self) -> usize {
        self.objects.borrow().len()
    }
}

fn poolable_size_ok(data: &ObjectData) -> bool {
    match data {
        ObjectData::Array(items) => items.len() <= TOO_LARGE_LEN,
        ObjectData::Map(map) => map.len() <= TOO_LARGE_LEN,
        ObjectData::String(s) => s.is_inline() || s.len() <= TOO_LARGE_STRING_BYTES,
        _ => true,
    }
}

fn mark_value(v: Value) {
    if let Some(ptr) = v.as_allocated() {
        // Safety: every allocated `Value` in a reachable root points at a
        // live body tracked by some `GcMem` (its own, transitively).
        let body = unsafe { &*ptr };
        if body.mark.replace(true) {
            return; // already marked, avoid re-walking cycles/shared refs
        }
        match &body.data {
            ObjectData::Array(items) => {
                for item in items {
                    mark_value(*item);
                }
            }
            ObjectData::Map(map) => {
                mark_map(map);
            }
            ObjectData::Function(f) => {
                for fv in f.free_vars.iter() {
                    mark_value(*fv);
                }
            }
            ObjectData::String(_)
            | ObjectData::NativeFunction(_)
            | ObjectData::Error(_)
            | ObjectData::External(_) => {}
        }
    }
}

fn mark_map(map: &ApeMap) {
    for v in map.values() {
        mark_value(*v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::SString;

    #[test]
    fn sweep_reclaims_unreachable_strings() {
        let mem = GcMem::new();
        let mem_ptr: *mut GcMem = Box::into_raw(mem);
        let mem_ref = unsafe { &*mem_ptr };
        let ptr = mem_ref.alloc(mem_ptr, ObjectData::String(SString::new("hello")));
        assert_eq!(mem_ref.live_count(), 1);
        let reclaimed = mem_ref.sweep(&[]);
        assert_eq!(reclaimed, 1);
        assert_eq!(mem_ref.live_count(), 0);
        let _ = ptr;
        unsafe { drop(Box::from_raw(mem_ptr)) };
    }

    #[test]
    fn sweep_keeps_rooted_values() {
        let mem = GcMem::new();
        let mem_ptr: *mut GcMem = Box::into_raw(mem);
        let mem_ref = unsafe { &*mem_ptr };
        let ptr = mem_ref.alloc(mem_ptr, ObjectData::String(SString::new("kept")));
        let v = unsafe { Value::from_allocated(ptr) };
        let roots: [Value; 1] = [v];
        mem_ref.sweep(&[&roots]);
        assert_eq!(mem_ref.live_count(), 1);
        unsafe { drop(Box::from_raw(mem_ptr)) };
    }
}
