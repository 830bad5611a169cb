//! NaN-boxed values, the mark-and-sweep heap, and the bytecode virtual
//! machine — the runtime half of the ape scripting engine.

pub mod gc;
pub mod object;
pub mod value;
pub mod vm;

pub use gc::GcMem;
pub use object::{
    ApeMap, ErrorObj, ExternalData, ExternalObj, FreeVars, FunctionObj, MapKey, NativeFunctionObj,
    ObjectBody, ObjectData, ObjectKind, SString,
};
pub use value::{Value, ValueKind, CANONICAL_NAN};
pub use vm::{Frame, Globals, NativeFn, ValueStack, Vm, STACK_CAPACITY};
