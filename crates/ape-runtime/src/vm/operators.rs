//! Arithmetic, comparison, and operator-overload dispatch (spec.md §4.8's
//! "binary/unary op" opcodes plus operator overloading).
//!
//! User overloads are looked up by a fixed, pinned method-name key (e.g.
//! `__operator_add__`) on a map operand, mirroring the original's approach
//! of reserving specific string constants rather than a vtable.

use ape_core::{EngineError, SourcePosition};

use crate::object::{MapKey, ObjectData};
use crate::value::Value;

pub fn overload_key_for_add() -> &'static str {
    "__operator_add__"
}
pub fn overload_key_for_sub() -> &'static str {
    "__operator_sub__"
}
pub fn overload_key_for_mul() -> &'static str {
    "__operator_mul__"
}
pub fn overload_key_for_div() -> &'static str {
    "__operator_div__"
}
pub fn overload_key_for_mod() -> &'static str {
    "__operator_mod__"
}
pub fn overload_key_for_compare() -> &'static str {
    "__operator_compare__"
}

/// Total order over comparable values: numbers by value, bools as 0/1,
/// strings lexicographically, matching the original's `object_compare`.
/// Returns `None` for kinds the VM considers incomparable (arrays, maps,
/// functions, etc. — those fall back to operator-overload lookup).
pub fn compare(a: Value, b: Value) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return x.partial_cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_bool(), b.as_bool()) {
        return Some((x as u8).cmp(&(y as u8)));
    }
    if a.is_null() && b.is_null() {
        return Some(std::cmp::Ordering::Equal);
    }
    if let (Some(pa), Some(pb)) = (a.as_allocated(), b.as_allocated()) {
        // Safety: allocated values passed here are always live GC bodies
        // reachable from the VM's own stacks at the moment of comparison.
        let (ba, bb) = unsafe { (&*pa, &*pb) };
        if let (ObjectData::String(sa), ObjectData::String(sb)) = (&ba.data, &bb.data) {
            return Some(sa.as_str().cmp(sb.as_str()));
        }
    }
    None
}

pub fn is_truthy_pair_numeric(a: Value, b: Value) -> bool {
    a.is_number() && b.is_number()
}

/// `%` on doubles, matching Rust's `f64::rem_euclid`-free `%` operator,
/// which is IEEE-754 `fmod` — the same semantics as the original's C `%`.
pub fn fmod(a: f64, b: f64) -> f64 {
    a % b
}

pub fn map_key_or_err(v: Value, pos: SourcePosition) -> Result<MapKey, EngineError> {
    MapKey::from_value(&v).ok_or_else(|| EngineError::runtime("map key must be a number, bool, or string", pos))
}
