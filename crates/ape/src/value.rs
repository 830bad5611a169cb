//! Value accessors across the embedder boundary (spec.md §6: "Value
//! constructors/accessors for every ObjectBody kind").
//!
//! Numbers, bools, and null construct directly through
//! [`ape_runtime::Value`]'s own inherent methods (`Value::number`,
//! `Value::bool`, `Value::null`) since NaN-boxing them needs no heap.
//! Arrays, maps, strings, errors, and externals need a [`ape_runtime::Vm`]
//! to allocate through, so their constructors live on [`crate::Engine`]
//! instead (`make_array`, `make_map`, `make_string`, `make_error`,
//! `make_external`); this module only covers reading one back out.

pub use ape_runtime::{ApeMap, ExternalData, MapKey};

use ape_runtime::{ObjectData, Value};
use std::rc::Rc;

fn with_object<R>(v: Value, f: impl FnOnce(&ObjectData) -> Option<R>) -> Option<R> {
    let ptr = v.as_allocated()?;
    // Safety: a `Value` handed across the embedder boundary is always a
    // live body, rooted by the VM's own stacks or pinned by the caller for
    // as long as this accessor runs on it.
    let body = unsafe { &*ptr };
    f(&body.data)
}

/// Reads an allocated array's elements, or `None` if `v` isn't one.
pub fn as_array(v: Value) -> Option<Vec<Value>> {
    with_object(v, |data| match data {
        ObjectData::Array(items) => Some(items.clone()),
        _ => None,
    })
}

/// Reads an allocated map's entries, or `None` if `v` isn't one.
pub fn as_map(v: Value) -> Option<ApeMap> {
    with_object(v, |data| match data {
        ObjectData::Map(map) => Some(map.clone()),
        _ => None,
    })
}

/// Reads an allocated string's contents, or `None` if `v` isn't one.
pub fn as_str(v: Value) -> Option<String> {
    with_object(v, |data| match data {
        ObjectData::String(s) => Some(s.as_str().to_string()),
        _ => None,
    })
}

/// Reads an allocated error value's message, or `None` if `v` isn't one.
pub fn as_error_message(v: Value) -> Option<String> {
    with_object(v, |data| match data {
        ObjectData::Error(e) => Some(e.message.as_str().to_string()),
        _ => None,
    })
}

/// Hands back the host data an `External` value carries, or `None` if `v`
/// isn't one. Callers downcast through [`ExternalData::as_any`].
pub fn external_data(v: Value) -> Option<Rc<dyn ExternalData>> {
    with_object(v, |data| match data {
        ObjectData::External(e) => Some(e.data.clone()),
        _ => None,
    })
}

/// Whether `v` is an allocated object of the given kind.
pub fn is_kind(v: Value, kind: ape_runtime::ObjectKind) -> bool {
    with_object(v, |data| (data.kind() == kind).then_some(())).is_some()
}
