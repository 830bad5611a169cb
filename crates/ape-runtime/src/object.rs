//! Heap-allocated object bodies (spec.md §3's `ObjectBody` table).
//!
//! Every allocated value is a pointer to an `ObjectBody`; the body carries a
//! back-pointer to its owning [`crate::gc::GcMem`] (so sweep can return it
//! to the right pool) and a mark bit, plus a `kind`-discriminated payload.

use ape_core::SourcePosition;
use ape_core::TracebackEntry;
use indexmap::IndexMap;
use smallvec::SmallVec;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::gc::GcMem;
use crate::value::Value;

/// Inline buffer size for small strings, matching the original's
/// `OBJECT_STRING_BUF_SIZE` (24 bytes total, one of which the C union uses
/// implicitly for the capacity/length discriminant — 23 usable bytes here).
pub const STRING_INLINE_CAP: usize = 23;

/// A string body: small strings live inline (no heap allocation at all);
/// larger ones spill to a heap buffer. The djb2 hash is cached lazily and,
/// once computed, never changes (spec.md §3 invariant).
#[derive(Clone)]
pub struct SString {
    inline: [u8; STRING_INLINE_CAP],
    inline_len: u8,
    heap: Option<Rc<str>>,
    hash: Cell<u64>,
}

impl SString {
    pub fn new(s: &str) -> SString {
        if s.len() <= STRING_INLINE_CAP {
            let mut inline = [0u8; STRING_INLINE_CAP];
            inline[..s.len()].copy_from_slice(s.as_bytes());
            SString {
                inline,
                inline_len: s.len() as u8,
                heap: None,
                hash: Cell::new(0),
            }
        } else {
            SString {
                inline: [0; STRING_INLINE_CAP],
                inline_len: 0,
                heap: Some(Rc::from(s)),
                hash: Cell::new(0),
            }
        }
    }

    pub fn as_str(&self) -> &str {
        match &self.heap {
            Some(s) => s,
            None => std::str::from_utf8(&self.inline[..self.inline_len as usize])
                .expect("SString always holds valid UTF-8"),
        }
    }

    pub fn len(&self) -> usize {
        self.as_str().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_inline(&self) -> bool {
        self.heap.is_none()
    }

    /// djb2 of the string's bytes. 0 is the sentinel for "not yet
    /// computed"; djb2's own starting accumulator (5381) means 0 is never a
    /// genuine hash collision for non-empty input, and the empty string
    /// hashes to 5381, not 0, so the sentinel is unambiguous.
    pub fn hash(&self) -> u64 {
        let cached = self.hash.get();
        if cached != 0 {
            return cached;
        }
        let computed = djb2(self.as_str().as_bytes());
        self.hash.set(computed);
        computed
    }

    /// Concatenate two strings into a new one (used by `+` and the
    /// optimiser's compile-time string folding).
    pub fn concat(a: &str, b: &str) -> SString {
        let mut s = String::with_capacity(a.len() + b.len());
        s.push_str(a);
        s.push_str(b);
        SString::new(&s)
    }
}

pub fn djb2(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 5381;
    for &b in bytes {
        hash = hash.wrapping_mul(33).wrapping_add(b as u64);
    }
    hash
}

impl fmt::Debug for SString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl PartialEq for SString {
    fn eq(&self, other: &Self) -> bool {
        // Length, then hash, then bytes, per spec.md §4.6's comparison order.
        self.len() == other.len() && self.hash() == other.hash() && self.as_str() == other.as_str()
    }
}

impl Eq for SString {}

/// Hashable subset of `Value` usable as map keys (spec.md §3: "only
/// hashable keys (number, bool, string)").
#[derive(Debug, Clone)]
pub enum MapKey {
    Number(f64),
    Bool(bool),
    String(SString),
}

impl PartialEq for MapKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MapKey::Number(a), MapKey::Number(b)) => a.to_bits() == b.to_bits(),
            (MapKey::Bool(a), MapKey::Bool(b)) => a == b,
            (MapKey::String(a), MapKey::String(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for MapKey {}

impl std::hash::Hash for MapKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            // Mix the two 32-bit halves, per spec.md §4.6.
            MapKey::Number(n) => {
                let bits = n.to_bits();
                ((bits >> 32) as u32 ^ (bits as u32)).hash(state);
            }
            MapKey::Bool(b) => (*b as u64).hash(state),
            MapKey::String(s) => s.hash().hash(state),
        }
    }
}

impl MapKey {
    pub fn from_value(v: &Value) -> Option<MapKey> {
        if let Some(n) = v.as_number() {
            Some(MapKey::Number(n))
        } else if let Some(b) = v.as_bool() {
            Some(MapKey::Bool(b))
        } else if let Some(ptr) = v.as_allocated() {
            // Safety: an allocated `Value` reaching here always points at a
            // live body rooted on the VM's own stacks at the moment of the
            // map operation that called us.
            match &unsafe { &*ptr }.data {
                ObjectData::String(s) => Some(MapKey::String(s.clone())),
                _ => None,
            }
        } else {
            None
        }
    }

    pub fn to_value(&self, vm: &crate::vm::Vm) -> Value {
        match self {
            MapKey::Number(n) => Value::number(*n),
            MapKey::Bool(b) => Value::bool(*b),
            MapKey::String(s) => vm.box_string(s.as_str()),
        }
    }
}

/// Insertion-ordered map. Re-setting an existing key preserves its
/// position (spec.md §3 invariant) — `IndexMap::insert` already does this.
pub type ApeMap = IndexMap<MapKey, Value>;

/// A free variable array with a small-vector optimization: up to two
/// captures are stored inline, matching the original's `free_vals_buf[2]`
/// union (spec.md §3: Function's free-variable count is fixed at
/// construction, so the inline/heap discriminant never changes after).
pub type FreeVars = SmallVec<[Value; 2]>;

#[derive(Clone)]
pub struct FunctionObj {
    pub name: Option<Rc<str>>,
    pub bytecode: Rc<[u8]>,
    pub positions: Rc<[SourcePosition]>,
    pub num_locals: usize,
    pub num_args: usize,
    pub free_vars: FreeVars,
}

pub type NativeFn = dyn Fn(&mut crate::vm::Vm, &[Value]) -> Result<Value, ape_core::EngineError>;

#[derive(Clone)]
pub struct NativeFunctionObj {
    pub name: Rc<str>,
    pub func: Rc<NativeFn>,
}

#[derive(Clone)]
pub struct ErrorObj {
    pub message: SString,
    pub traceback: Option<Vec<TracebackEntry>>,
}

/// Destroy/copy callback pair for host-owned opaque data (spec.md §3's
/// `External` kind). Rust's `Drop` subsumes the destroy callback; `clone`
/// here stands in for the original's explicit copy callback.
pub trait ExternalData: std::any::Any {
    fn clone_external(&self) -> Rc<dyn ExternalData>;
    fn as_any(&self) -> &dyn std::any::Any;
}

#[derive(Clone)]
pub struct ExternalObj {
    pub data: Rc<dyn ExternalData>,
}

pub enum ObjectData {
    String(SString),
    Array(Vec<Value>),
    Map(ApeMap),
    Function(FunctionObj),
    NativeFunction(NativeFunctionObj),
    Error(ErrorObj),
    External(ExternalObj),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    String,
    Array,
    Map,
    Function,
    NativeFunction,
    Error,
    External,
}

impl ObjectData {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectData::String(_) => ObjectKind::String,
            ObjectData::Array(_) => ObjectKind::Array,
            ObjectData::Map(_) => ObjectKind::Map,
            ObjectData::Function(_) => ObjectKind::Function,
            ObjectData::NativeFunction(_) => ObjectKind::NativeFunction,
            ObjectData::Error(_) => ObjectKind::Error,
            ObjectData::External(_) => ObjectKind::External,
        }
    }
}

/// A heap-allocated object body. `mem` back-points to the owning allocator
/// so sweep can return a reclaimed body to the right per-kind pool; `mark`
/// is the mark-and-sweep bit, cleared at the start of every sweep pass.
pub struct ObjectBody {
    pub mem: *mut GcMem,
    pub mark: Cell<bool>,
    pub data: ObjectData,
}

impl ObjectBody {
    pub fn kind(&self) -> ObjectKind {
        self.data.kind()
    }
}
