//! NaN-Boxing Implementation
//!
//! Encodes every ape value into 8 bytes using IEEE-754 NaN-boxing, exactly
//! as spec.md §4.6 and the original implementation's `object.c` describe.
//!
//! ## Encoding Scheme
//!
//! ```text
//! Number (the common case): any bit pattern that is NOT inside our boxed
//!                            quiet-NaN space IS that IEEE-754 double.
//!
//! Boxed values:  0xFFF8_0000_0000_0000 | (tag << 48) | payload
//!                    ^^^^^^^^^^^^^^^^^---- negative quiet NaN signature
//!                                    ^^^-- 3-bit type tag (bits 50:48)
//!                                       ^- 48-bit payload (bits 47:0)
//! ```
//!
//! ## Type Tags
//!
//! - 0x0: None (sentinel for an uninitialized slot, never observed by scripts)
//! - 0x1: Bool (payload's low bit is the boolean)
//! - 0x2: Null
//! - 0x4: Allocated (payload is a pointer to an [`crate::object::ObjectBody`])
//!
//! Tags 3, 5, 6, and 7 are unused, matching the original encoding (which
//! reserves them rather than repurposing the spare bits).

use crate::object::ObjectBody;
use std::fmt;

/// Any value whose top 13 bits (sign, 11 exponent bits, and the mantissa's
/// quiet-NaN bit) are all set lives in the boxed space; every other bit
/// pattern is a legitimate `f64`.
const PATTERN: u64 = 0xFFF8_0000_0000_0000;
/// Mask covering the pattern plus the 3-bit tag, used to classify a boxed
/// value's tag in one comparison.
const HEADER_MASK: u64 = 0xFFFF_0000_0000_0000;
const BOOL_HEADER: u64 = 0xFFF9_0000_0000_0000;
const NULL_HEADER: u64 = 0xFFFA_0000_0000_0000;
const ALLOCATED_HEADER: u64 = 0xFFFC_0000_0000_0000;
const PAYLOAD_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// Canonical quiet NaN used whenever a floating-point operation produces a
/// NaN that would otherwise collide with the boxed-value space (a positive
/// NaN never collides, since `PATTERN`'s sign bit is set).
pub const CANONICAL_NAN: u64 = 0x7FF8_0000_0000_0000;

/// A NaN-boxed, 8-byte tagged value.
///
/// The type tag alone determines how the bits are interpreted; a `Value` is
/// never observed half-initialized (construction is total).
#[derive(Clone, Copy)]
pub struct Value(u64);

/// The three fixed tags plus "allocated", matching spec.md §3's
/// `{NONE=0, BOOL=1, NULL=2, ALLOCATED=4}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Number,
    None,
    Bool,
    Null,
    Allocated,
}

impl Value {
    /// The sentinel used to pre-fill stack slots and `last_popped` before
    /// anything has been pushed. Scripts never observe this value.
    pub fn none() -> Value {
        Value(PATTERN)
    }

    pub fn null() -> Value {
        Value(NULL_HEADER)
    }

    pub fn bool(b: bool) -> Value {
        Value(BOOL_HEADER | b as u64)
    }

    pub fn number(n: f64) -> Value {
        let bits = n.to_bits();
        if bits & PATTERN == PATTERN {
            // This exact bit pattern would be misread as a boxed value;
            // canonicalize to the same NaN the VM's arithmetic produces.
            Value(CANONICAL_NAN)
        } else {
            Value(bits)
        }
    }

    /// Wrap a pointer to a heap-allocated object body.
    ///
    /// # Safety
    /// `ptr` must be non-null, properly aligned, and remain valid for as
    /// long as the returned `Value` is reachable (i.e. the GC must consider
    /// it a root, or it must be freshly allocated and about to be pushed
    /// onto a root-visible location).
    pub unsafe fn from_allocated(ptr: *mut ObjectBody) -> Value {
        let addr = ptr as u64;
        debug_assert_eq!(addr & !PAYLOAD_MASK, 0, "pointer must fit in 48 bits");
        Value(ALLOCATED_HEADER | addr)
    }

    pub fn is_number(&self) -> bool {
        self.0 & PATTERN != PATTERN
    }

    pub fn is_none(&self) -> bool {
        self.0 == PATTERN
    }

    pub fn is_null(&self) -> bool {
        self.0 & HEADER_MASK == NULL_HEADER
    }

    pub fn is_bool(&self) -> bool {
        self.0 & HEADER_MASK == BOOL_HEADER
    }

    pub fn is_allocated(&self) -> bool {
        self.0 & HEADER_MASK == ALLOCATED_HEADER
    }

    pub fn kind(&self) -> ValueKind {
        if self.is_number() {
            ValueKind::Number
        } else if self.is_none() {
            ValueKind::None
        } else if self.is_bool() {
            ValueKind::Bool
        } else if self.is_null() {
            ValueKind::Null
        } else {
            ValueKind::Allocated
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        self.is_number().then(|| f64::from_bits(self.0))
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.is_bool().then_some(self.0 & 1 == 1)
    }

    pub fn as_allocated(&self) -> Option<*mut ObjectBody> {
        self.is_allocated()
            .then_some((self.0 & PAYLOAD_MASK) as *mut ObjectBody)
    }

    /// Truthiness used by `if`/`while`/logical operators: `null` and `false`
    /// are falsy, everything else (including `0`) is truthy.
    pub fn is_truthy(&self) -> bool {
        !(self.is_null() || matches!(self.as_bool(), Some(false)))
    }

    pub fn raw_bits(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ValueKind::Number => write!(f, "Number({})", f64::from_bits(self.0)),
            ValueKind::None => write!(f, "None"),
            ValueKind::Bool => write!(f, "Bool({})", self.0 & 1 == 1),
            ValueKind::Null => write!(f, "Null"),
            ValueKind::Allocated => write!(f, "Allocated({:#x})", self.0 & PAYLOAD_MASK),
        }
    }
}

/// Script-facing rendering, matching the original's `object_to_string`:
/// numbers print with 10 significant digits, strings are quoted, and
/// arrays/maps recurse into their elements with quoted string members.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use crate::object::ObjectData;
        match self.kind() {
            ValueKind::Number => write_number(f, f64::from_bits(self.0)),
            ValueKind::None => write!(f, "NONE"),
            ValueKind::Bool => write!(f, "{}", self.0 & 1 == 1),
            ValueKind::Null => write!(f, "null"),
            ValueKind::Allocated => {
                let ptr = self.as_allocated().expect("allocated kind has a pointer");
                let body = unsafe { &*ptr };
                match &body.data {
                    ObjectData::String(s) => write!(f, "\"{}\"", s.as_str()),
                    ObjectData::Array(items) => {
                        write!(f, "[")?;
                        for (i, item) in items.iter().enumerate() {
                            if i > 0 {
                                write!(f, ", ")?;
                            }
                            write!(f, "{item}")?;
                        }
                        write!(f, "]")
                    }
                    ObjectData::Map(map) => {
                        write!(f, "{{")?;
                        for (i, (key, val)) in map.iter().enumerate() {
                            if i > 0 {
                                write!(f, ", ")?;
                            }
                            match key {
                                crate::object::MapKey::Number(n) => write_number(f, *n)?,
                                crate::object::MapKey::Bool(b) => write!(f, "{b}")?,
                                crate::object::MapKey::String(s) => write!(f, "\"{}\"", s.as_str())?,
                            }
                            write!(f, ": {val}")?;
                        }
                        write!(f, "}}")
                    }
                    ObjectData::Function(func) => {
                        write!(f, "CompiledFunction: {}", func.name.as_deref().unwrap_or("anonymous"))
                    }
                    ObjectData::NativeFunction(_) => write!(f, "NATIVE_FUNCTION"),
                    ObjectData::Error(err) => write!(f, "ERROR: {}", err.message.as_str()),
                    ObjectData::External(_) => write!(f, "EXTERNAL"),
                }
            }
        }
    }
}

/// `%1.10g`-style formatting: ten significant digits, trailing zeros and a
/// trailing decimal point trimmed, matching the original's printf format.
fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n == n.trunc() && n.abs() < 1e15 {
        return write!(f, "{}", n as i64);
    }
    let s = format!("{n:.10}");
    let trimmed = s.trim_end_matches('0').trim_end_matches('.');
    write!(f, "{trimmed}")
}

/// Raw bit-pattern equality — **not** script-level `equals` (the
/// string/number/deep rules the VM's `==`/`!=` opcodes use live in
/// [`crate::vm`]). Useful for identity comparisons (e.g. "is this the same
/// pooled body") and tests.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_round_trip() {
        for n in [0.0, 1.0, -1.0, 3.5, f64::INFINITY, -f64::INFINITY] {
            let v = Value::number(n);
            assert!(v.is_number());
            assert_eq!(v.as_number(), Some(n));
        }
    }

    #[test]
    fn bool_and_null_are_distinct_from_numbers() {
        assert!(!Value::bool(true).is_number());
        assert!(!Value::null().is_number());
        assert_eq!(Value::bool(true).as_bool(), Some(true));
        assert_eq!(Value::bool(false).as_bool(), Some(false));
        assert!(Value::null().is_null());
    }

    #[test]
    fn none_is_its_own_sentinel() {
        let n = Value::none();
        assert!(n.is_none());
        assert!(!n.is_null());
        assert!(!n.is_bool());
    }

    #[test]
    fn colliding_nan_is_canonicalized() {
        let v = Value::number(f64::from_bits(PATTERN));
        assert!(v.is_number());
        assert_eq!(v.raw_bits(), CANONICAL_NAN);
    }

    #[test]
    fn truthiness_matches_spec() {
        assert!(Value::number(0.0).is_truthy());
        assert!(!Value::bool(false).is_truthy());
        assert!(!Value::null().is_truthy());
        assert!(Value::bool(true).is_truthy());
    }
}
