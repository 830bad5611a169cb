//! The stack-based virtual machine (spec.md §4.8): fetch-decode dispatch
//! over the bytecode the compiler emits, a fixed-capacity operand stack, a
//! frame stack for calls, and a `this` stack for method-style calls.

mod frame;
mod operators;
mod stacks;

pub use frame::Frame;
pub use stacks::{Globals, ValueStack, STACK_CAPACITY};

use std::rc::Rc;
use std::time::{Duration, Instant};

use ape_core::{EngineError, Opcode, SourcePosition, TracebackEntry};

use crate::gc::GcMem;
use crate::object::{
    ApeMap, ErrorObj, FunctionObj, MapKey, NativeFunctionObj, ObjectBody, ObjectData, SString,
};
use crate::value::Value;

/// Re-sample the clock this often (a power-of-two instruction count, so the
/// check is a cheap mask rather than a division) when a timeout is set.
const TIMEOUT_CHECK_MASK: u64 = 1023;
/// Run a GC sweep after roughly this many dispatched instructions, in
/// addition to the allocation-count trigger in `GcMem`.
const GC_CHECK_MASK: u64 = 511;
/// Bytecode frames nest no deeper than this before the VM gives up and
/// reports a runtime error (guards against runaway recursion).
const MAX_FRAMES: usize = STACK_CAPACITY;

/// Anything a host registers as a callable value.
pub trait NativeFn: Fn(&mut Vm, &[Value]) -> Result<Value, EngineError> {}
impl<F: Fn(&mut Vm, &[Value]) -> Result<Value, EngineError>> NativeFn for F {}

pub struct Vm {
    gc: Box<GcMem>,
    operand_stack: ValueStack,
    this_stack: ValueStack,
    frames: Vec<Frame>,
    globals: Globals,
    constants: Rc<[Value]>,
    ape_globals: Vec<Value>,
    last_popped: Value,
    instructions_run: u64,
    deadline: Option<Instant>,
}

impl Vm {
    pub fn new() -> Vm {
        Vm {
            gc: GcMem::new(),
            operand_stack: ValueStack::new("operand stack"),
            this_stack: ValueStack::new("this stack"),
            frames: Vec::new(),
            globals: Globals::new(),
            constants: Rc::from(Vec::new().into_boxed_slice()),
            ape_globals: Vec::new(),
            last_popped: Value::none(),
            instructions_run: 0,
            deadline: None,
        }
    }

    fn gc_ptr(&self) -> *mut GcMem {
        (self.gc.as_ref() as *const GcMem) as *mut GcMem
    }

    pub fn alloc(&self, data: ObjectData) -> *mut ObjectBody {
        self.gc.alloc(self.gc_ptr(), data)
    }

    /// # Safety
    /// See [`Value::from_allocated`].
    pub fn box_string(&self, s: &str) -> Value {
        let ptr = self.alloc(ObjectData::String(SString::new(s)));
        unsafe { Value::from_allocated(ptr) }
    }

    pub fn box_array(&self, items: Vec<Value>) -> Value {
        let ptr = self.alloc(ObjectData::Array(items));
        unsafe { Value::from_allocated(ptr) }
    }

    pub fn box_map(&self, map: ApeMap) -> Value {
        let ptr = self.alloc(ObjectData::Map(map));
        unsafe { Value::from_allocated(ptr) }
    }

    pub fn box_error(&self, message: &str) -> Value {
        let ptr = self.alloc(ObjectData::Error(ErrorObj {
            message: SString::new(message),
            traceback: None,
        }));
        unsafe { Value::from_allocated(ptr) }
    }

    /// Box host-owned opaque data (spec.md §3's `External` kind). Rust's
    /// `Drop` on `data` stands in for the original's destroy callback; a
    /// script never sees past the `EXTERNAL` tag this value prints as.
    pub fn box_external(&self, data: std::rc::Rc<dyn crate::object::ExternalData>) -> Value {
        let ptr = self.alloc(ObjectData::External(crate::object::ExternalObj { data }));
        unsafe { Value::from_allocated(ptr) }
    }

    pub fn register_native(
        &mut self,
        name: &str,
        func: impl Fn(&mut Vm, &[Value]) -> Result<Value, EngineError> + 'static,
    ) -> usize {
        let ptr = self.alloc(ObjectData::NativeFunction(NativeFunctionObj {
            name: Rc::from(name),
            func: Rc::new(func),
        }));
        let v = unsafe { Value::from_allocated(ptr) };
        self.ape_globals.push(v);
        self.ape_globals.len() - 1
    }

    /// Registers an already-boxed (or plain) value as a host global without
    /// going through [`Vm::register_native`], for `set_global_constant`.
    pub fn register_global_value(&mut self, value: Value) -> usize {
        self.ape_globals.push(value);
        self.ape_globals.len() - 1
    }

    /// Reads back a value registered via [`Vm::register_native`] or
    /// [`Vm::register_global_value`].
    pub fn ape_global(&self, index: usize) -> Option<Value> {
        self.ape_globals.get(index).copied()
    }

    pub fn pin(&self, v: Value) -> usize {
        self.gc.pin(v)
    }

    pub fn unpin(&self, token: usize) {
        self.gc.unpin(token)
    }

    pub fn last_popped(&self) -> Value {
        self.last_popped
    }

    pub fn globals_mut(&mut self) -> &mut Globals {
        &mut self.globals
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.deadline = timeout.map(|d| Instant::now() + d);
    }

    fn roots(&self) -> Vec<Value> {
        let mut roots = Vec::new();
        roots.extend_from_slice(self.operand_stack.as_slice());
        roots.extend_from_slice(self.this_stack.as_slice());
        roots.extend_from_slice(&self.ape_globals);
        roots.push(self.last_popped);
        for i in 0..STACK_CAPACITY {
            if let Ok(v) = self.globals.get(i, SourcePosition::synthetic()) {
                roots.push(v);
            }
        }
        for frame in &self.frames {
            for fv in frame.function.free_vars.iter() {
                roots.push(*fv);
            }
        }
        roots
    }

    fn maybe_collect(&self) {
        if self.gc.should_sweep() {
            let roots = self.roots();
            self.gc.sweep(&[&roots]);
        }
    }

    /// Run `function` to completion (no arguments), returning its final
    /// value. The caller has already compiled the bytecode; this is the
    /// single entry point both top-level module execution and recursive
    /// script-level calls go through.
    pub fn run(&mut self, function: Rc<FunctionObj>, constants: Rc<[Value]>) -> Result<Value, EngineError> {
        self.constants = constants;
        self.frames.clear();
        self.operand_stack.truncate(0);
        self.this_stack.truncate(0);
        self.frames.push(Frame::new(function, 0));
        self.dispatch()
    }

    pub fn call_value(&mut self, callee: Value, args: &[Value], pos: SourcePosition) -> Result<Value, EngineError> {
        if let Some(ptr) = callee.as_allocated() {
            let body = unsafe { &*ptr };
            match &body.data {
                ObjectData::Function(f) => {
                    let f = Rc::new(f.clone());
                    return self.call_function(f, args, pos);
                }
                ObjectData::NativeFunction(n) => {
                    let func = n.func.clone();
                    return func(self, args);
                }
                _ => {}
            }
        }
        Err(EngineError::runtime("value is not callable", pos))
    }

    fn call_function(&mut self, f: Rc<FunctionObj>, args: &[Value], pos: SourcePosition) -> Result<Value, EngineError> {
        if args.len() != f.num_args {
            return Err(EngineError::runtime(
                format!("expected {} argument(s), got {}", f.num_args, args.len()),
                pos,
            ));
        }
        if self.frames.len() >= MAX_FRAMES {
            return Err(EngineError::runtime("call stack overflow", pos));
        }
        let base = self.operand_stack.len();
        for &a in args {
            self.operand_stack.push(a, pos)?;
        }
        for _ in 0..(f.num_locals.saturating_sub(f.num_args)) {
            self.operand_stack.push(Value::none(), pos)?;
        }
        self.frames.push(Frame::new(f, base));
        self.dispatch()
    }

    fn current(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("dispatch always has a frame")
    }

    /// The fetch-decode loop. Returns when the outermost frame returns.
    fn dispatch(&mut self) -> Result<Value, EngineError> {
        let base_frame_depth = self.frames.len() - 1;
        loop {
            if self.frames.len() <= base_frame_depth {
                return Ok(self.last_popped);
            }
            let pos = {
                let frame = self.current();
                frame.position_at(frame.ip)
            };

            self.instructions_run += 1;
            if self.instructions_run & TIMEOUT_CHECK_MASK == 0 {
                if let Some(deadline) = self.deadline {
                    if Instant::now() >= deadline {
                        tracing::warn!(instructions = self.instructions_run, "execution timed out");
                        return Err(EngineError::timeout(pos));
                    }
                }
            }
            if self.instructions_run & GC_CHECK_MASK == 0 {
                self.maybe_collect();
            }

            let byte = {
                let frame = self.current();
                let bc = frame.bytecode();
                if frame.ip >= bc.len() {
                    return Err(EngineError::runtime("instruction pointer ran off the end of bytecode", pos));
                }
                bc[frame.ip]
            };
            let op = Opcode::from_byte(byte)
                .ok_or_else(|| EngineError::runtime(format!("invalid opcode byte {byte:#x}"), pos))?;

            match self.step(op, pos) {
                Ok(()) => {}
                Err(err) => {
                    if err.is_recoverable() {
                        if let Some(depth) = self.find_recover_frame() {
                            self.unwind_to_recover(depth, err);
                            continue;
                        }
                    }
                    return Err(err);
                }
            }
        }
    }

    fn find_recover_frame(&self) -> Option<usize> {
        self.frames.iter().rposition(|f| f.can_recover())
    }

    /// Unwind every frame above `depth`, install the caught error as an
    /// argument on the operand stack, and jump to the recover handler
    /// (spec.md §9's "recover as non-local control"). `recover_ip` is left
    /// in place (only `is_recovering` flips) so the frame's identity is
    /// otherwise unchanged, matching the original's `frame->is_recovering`
    /// guard against re-entering the same handler.
    fn unwind_to_recover(&mut self, depth: usize, err: EngineError) {
        tracing::debug!(depth, error = %err, "recover handler activated");
        self.frames.truncate(depth + 1);
        let base = self.frames[depth].base_pointer;
        self.operand_stack.truncate(base);
        let err_obj = ErrorObj {
            message: SString::new(&err.message),
            traceback: Some(self.capture_traceback()),
        };
        let ptr = self.alloc(ObjectData::Error(err_obj));
        let err_val = unsafe { Value::from_allocated(ptr) };
        let _ = self.operand_stack.push(err_val, err.position);
        let frame = &mut self.frames[depth];
        frame.ip = frame.recover_ip as usize;
        frame.is_recovering = true;
    }

    fn read_u16(&self, ip: usize) -> u16 {
        let bc = self.frames.last().unwrap().bytecode();
        u16::from_be_bytes([bc[ip], bc[ip + 1]])
    }

    fn read_u8(&self, ip: usize) -> u8 {
        self.frames.last().unwrap().bytecode()[ip]
    }

    fn read_f64(&self, ip: usize) -> f64 {
        let bc = self.frames.last().unwrap().bytecode();
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bc[ip..ip + 8]);
        f64::from_be_bytes(buf)
    }

    fn step(&mut self, op: Opcode, pos: SourcePosition) -> Result<(), EngineError> {
        use Opcode::*;
        let ip = self.current().ip;
        let next_ip = ip + op.instruction_len();

        match op {
            None => {}
            Constant => {
                let idx = self.read_u16(ip + 1) as usize;
                let v = *self
                    .constants
                    .get(idx)
                    .ok_or_else(|| EngineError::runtime("constant index out of range", pos))?;
                self.operand_stack.push(v, pos)?;
            }
            Number => {
                let n = self.read_f64(ip + 1);
                self.operand_stack.push(Value::number(n), pos)?;
            }
            True => self.operand_stack.push(Value::bool(true), pos)?,
            False => self.operand_stack.push(Value::bool(false), pos)?,
            Null => self.operand_stack.push(Value::null(), pos)?,
            Pop => {
                self.last_popped = self.operand_stack.pop(pos)?;
            }
            Dup => {
                let top = self.operand_stack.peek(pos)?;
                self.operand_stack.push(top, pos)?;
            }
            Add | Sub | Mul | Div | Mod | Or | Xor | And | Lshift | Rshift => {
                self.binary_arith(op, pos)?;
            }
            Minus => {
                let v = self.operand_stack.pop(pos)?;
                let n = v
                    .as_number()
                    .ok_or_else(|| EngineError::runtime("unary - requires a number", pos))?;
                self.operand_stack.push(Value::number(-n), pos)?;
            }
            Bang => {
                let v = self.operand_stack.pop(pos)?;
                self.operand_stack.push(Value::bool(!v.is_truthy()), pos)?;
            }
            Compare | CompareEq => {
                let b = self.operand_stack.pop(pos)?;
                let a = self.operand_stack.pop(pos)?;
                let ord = match operators::compare(a, b) {
                    Some(ord) => ord,
                    None => self
                        .try_compare_overload(a, b, pos)?
                        .ok_or_else(|| EngineError::runtime("values are not comparable", pos))?,
                };
                let n = match ord {
                    std::cmp::Ordering::Less => -1.0,
                    std::cmp::Ordering::Equal => 0.0,
                    std::cmp::Ordering::Greater => 1.0,
                };
                self.operand_stack.push(Value::number(n), pos)?;
            }
            Equal | NotEqual | GreaterThan | GreaterThanEqual => {
                let b = self.operand_stack.pop(pos)?;
                let a = self.operand_stack.pop(pos)?;
                let ord = match operators::compare(a, b) {
                    Some(ord) => Some(ord),
                    None => self.try_compare_overload(a, b, pos)?,
                };
                let result = match ord {
                    Some(ord) => match op {
                        Equal => ord == std::cmp::Ordering::Equal,
                        NotEqual => ord != std::cmp::Ordering::Equal,
                        GreaterThan => ord == std::cmp::Ordering::Greater,
                        GreaterThanEqual => ord != std::cmp::Ordering::Less,
                        _ => unreachable!(),
                    },
                    None => match op {
                        Equal => a.raw_bits() == b.raw_bits(),
                        NotEqual => a.raw_bits() != b.raw_bits(),
                        _ => {
                            return Err(EngineError::runtime("values are not comparable", pos));
                        }
                    },
                };
                self.operand_stack.push(Value::bool(result), pos)?;
            }
            Jump => {
                let target = self.read_u16(ip + 1) as usize;
                self.current().ip = target;
                return Ok(());
            }
            JumpIfFalse => {
                let cond = self.operand_stack.pop(pos)?;
                let target = self.read_u16(ip + 1) as usize;
                self.current().ip = if cond.is_truthy() { next_ip } else { target };
                return Ok(());
            }
            JumpIfTrue => {
                let cond = self.operand_stack.pop(pos)?;
                let target = self.read_u16(ip + 1) as usize;
                self.current().ip = if cond.is_truthy() { target } else { next_ip };
                return Ok(());
            }
            GetModuleGlobal => {
                let idx = self.read_u16(ip + 1) as usize;
                let v = self.globals.get(idx, pos)?;
                self.operand_stack.push(v, pos)?;
            }
            SetModuleGlobal => {
                let idx = self.read_u16(ip + 1) as usize;
                let v = self.operand_stack.pop(pos)?;
                self.globals.set(idx, v, pos)?;
            }
            DefineModuleGlobal => {
                let idx = self.read_u16(ip + 1) as usize;
                let v = self.operand_stack.pop(pos)?;
                self.globals.set(idx, v, pos)?;
            }
            GetApeGlobal => {
                let idx = self.read_u16(ip + 1) as usize;
                let v = *self
                    .ape_globals
                    .get(idx)
                    .ok_or_else(|| EngineError::runtime("ape-global index out of range", pos))?;
                self.operand_stack.push(v, pos)?;
            }
            GetLocal => {
                let idx = self.read_u8(ip + 1) as usize;
                let base = self.current().base_pointer;
                let v = self
                    .operand_stack
                    .get(base + idx)
                    .ok_or_else(|| EngineError::runtime("local index out of range", pos))?;
                self.operand_stack.push(v, pos)?;
            }
            DefineLocal | SetLocal => {
                let idx = self.read_u8(ip + 1) as usize;
                let base = self.current().base_pointer;
                let v = self.operand_stack.pop(pos)?;
                self.operand_stack.set(base + idx, v);
            }
            GetFree => {
                let idx = self.read_u8(ip + 1) as usize;
                let v = *self
                    .current()
                    .function
                    .free_vars
                    .get(idx)
                    .ok_or_else(|| EngineError::runtime("free-variable index out of range", pos))?;
                self.operand_stack.push(v, pos)?;
            }
            SetFree => {
                return Err(EngineError::runtime("free variables are immutable once captured", pos));
            }
            CurrentFunction => {
                let f = self.current().function.clone();
                let ptr = self.alloc(ObjectData::Function((*f).clone()));
                let v = unsafe { Value::from_allocated(ptr) };
                self.operand_stack.push(v, pos)?;
            }
            GetThis => {
                let v = self.this_stack.peek(pos)?;
                self.operand_stack.push(v, pos)?;
            }
            Array => {
                let len = self.read_u16(ip + 1) as usize;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(Value::none());
                }
                for slot in items.iter_mut().rev() {
                    *slot = self.operand_stack.pop(pos)?;
                }
                let v = self.box_array(items);
                self.operand_stack.push(v, pos)?;
            }
            MapStart => {
                // Allocate the map up front and push it onto the `this`
                // stack so a method literal among the pairs can capture
                // `this` via GET_THIS while construction is still in
                // progress (spec.md §3 "This stack").
                let pairs = self.read_u16(ip + 1) as usize;
                let v = self.box_map(ApeMap::with_capacity(pairs));
                self.this_stack.push(v, pos)?;
            }
            MapEnd => {
                let pairs = self.read_u16(ip + 1) as usize;
                let mut entries = Vec::with_capacity(pairs);
                for _ in 0..pairs {
                    let value = self.operand_stack.pop(pos)?;
                    let key = self.operand_stack.pop(pos)?;
                    entries.push((key, value));
                }
                let map_val = self.this_stack.pop(pos)?;
                let map_ptr = map_val
                    .as_allocated()
                    .ok_or_else(|| EngineError::runtime("this stack did not hold a map", pos))?;
                for (key, value) in entries.into_iter().rev() {
                    let key = operators::map_key_or_err(key, pos)?;
                    match unsafe { &mut (*map_ptr).data } {
                        ObjectData::Map(map) => {
                            map.insert(key, value);
                        }
                        _ => return Err(EngineError::runtime("this stack did not hold a map", pos)),
                    }
                }
                self.operand_stack.push(map_val, pos)?;
            }
            GetIndex => {
                let index = self.operand_stack.pop(pos)?;
                let target = self.operand_stack.pop(pos)?;
                let v = self.index_get(target, index, pos)?;
                self.operand_stack.push(v, pos)?;
            }
            SetIndex => {
                let value = self.operand_stack.pop(pos)?;
                let index = self.operand_stack.pop(pos)?;
                let target = self.operand_stack.pop(pos)?;
                self.index_set(target, index, value, pos)?;
            }
            GetValueAt => {
                let index = self.operand_stack.pop(pos)?;
                let target = self.operand_stack.pop(pos)?;
                let v = self.index_get(target, index, pos)?;
                self.operand_stack.push(v, pos)?;
            }
            Len => {
                let v = self.operand_stack.pop(pos)?;
                let len = self.value_len(v, pos)?;
                self.operand_stack.push(Value::number(len as f64), pos)?;
            }
            Function => {
                let const_idx = self.read_u16(ip + 1) as usize;
                let free_count = self.read_u8(ip + 3) as usize;
                let template = self
                    .constants
                    .get(const_idx)
                    .and_then(|v| v.as_allocated())
                    .ok_or_else(|| EngineError::runtime("function constant missing", pos))?;
                let template_fn = match &unsafe { &*template }.data {
                    ObjectData::Function(f) => f.clone(),
                    _ => return Err(EngineError::runtime("constant is not a function template", pos)),
                };
                let mut free_vars = smallvec::SmallVec::new();
                let free_start = self.operand_stack.len() - free_count;
                for i in 0..free_count {
                    free_vars.push(
                        self.operand_stack
                            .get(free_start + i)
                            .ok_or_else(|| EngineError::runtime("missing free variable on stack", pos))?,
                    );
                }
                self.operand_stack.truncate(free_start);
                let f = FunctionObj {
                    free_vars,
                    ..template_fn
                };
                let ptr = self.alloc(ObjectData::Function(f));
                let v = unsafe { Value::from_allocated(ptr) };
                self.operand_stack.push(v, pos)?;
            }
            Call => {
                let argc = self.read_u8(ip + 1) as usize;
                let mut args = Vec::with_capacity(argc);
                for _ in 0..argc {
                    args.push(Value::none());
                }
                for slot in args.iter_mut().rev() {
                    *slot = self.operand_stack.pop(pos)?;
                }
                let callee = self.operand_stack.pop(pos)?;
                self.current().ip = next_ip;
                let result = self.call_value(callee, &args, pos)?;
                self.operand_stack.push(result, pos)?;
                return Ok(());
            }
            Return | ReturnValue => {
                let result = if op == ReturnValue {
                    self.operand_stack.pop(pos)?
                } else {
                    Value::null()
                };
                let frame = self.frames.pop().expect("return always has a frame");
                self.operand_stack.truncate(frame.base_pointer);
                self.last_popped = result;
                // The caller's own `Call` handler is the single delivery point
                // for the returned value (it pushes `result` once `call_value`
                // comes back) — pushing it here too would double it up for
                // nested script-function calls.
                return Ok(());
            }
            SetRecover => {
                let target = self.read_u16(ip + 1) as usize;
                self.current().recover_ip = target as i64;
            }
        }

        self.current().ip = next_ip;
        Ok(())
    }

    fn binary_arith(&mut self, op: Opcode, pos: SourcePosition) -> Result<(), EngineError> {
        use Opcode::*;
        let b = self.operand_stack.pop(pos)?;
        let a = self.operand_stack.pop(pos)?;

        if op == Add {
            if let (Some(sa), Some(sb)) = (self.as_string(a), self.as_string(b)) {
                let v = self.box_string(&format!("{sa}{sb}"));
                self.operand_stack.push(v, pos)?;
                return Ok(());
            }
        }

        let (x, y) = match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => (x, y),
            _ => {
                if let Some(v) = self.try_operator_overload(op, a, b, pos)? {
                    self.operand_stack.push(v, pos)?;
                    return Ok(());
                }
                return Err(EngineError::runtime(
                    format!("{} requires two numbers", op.name()),
                    pos,
                ));
            }
        };

        let result = match op {
            Add => x + y,
            Sub => x - y,
            Mul => x * y,
            Div => x / y,
            Mod => operators::fmod(x, y),
            Or => (((x as i64) | (y as i64)) as f64),
            Xor => (((x as i64) ^ (y as i64)) as f64),
            And => (((x as i64) & (y as i64)) as f64),
            Lshift => (((x as i64) << (y as i64)) as f64),
            Rshift => (((x as i64) >> (y as i64)) as f64),
            _ => unreachable!(),
        };
        self.operand_stack.push(Value::number(result), pos)?;
        Ok(())
    }

    fn try_operator_overload(
        &mut self,
        op: Opcode,
        a: Value,
        b: Value,
        pos: SourcePosition,
    ) -> Result<Option<Value>, EngineError> {
        use Opcode::*;
        let key = match op {
            Add => operators::overload_key_for_add(),
            Sub => operators::overload_key_for_sub(),
            Mul => operators::overload_key_for_mul(),
            Div => operators::overload_key_for_div(),
            Mod => operators::overload_key_for_mod(),
            _ => return Ok(None),
        };
        for candidate in [a, b] {
            if let Some(ptr) = candidate.as_allocated() {
                if let ObjectData::Map(map) = unsafe { &(*ptr).data } {
                    if let Some(handler) = map_lookup_str(map, key) {
                        let result = self.call_value(handler, &[a, b], pos)?;
                        return Ok(Some(result));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Falls back to `__operator_compare__` when neither operand has a
    /// built-in ordering. The handler returns a number whose sign maps to
    /// `Ordering`, same convention as the `Compare` opcode itself.
    fn try_compare_overload(
        &mut self,
        a: Value,
        b: Value,
        pos: SourcePosition,
    ) -> Result<Option<std::cmp::Ordering>, EngineError> {
        let key = operators::overload_key_for_compare();
        for candidate in [a, b] {
            if let Some(ptr) = candidate.as_allocated() {
                if let ObjectData::Map(map) = unsafe { &(*ptr).data } {
                    if let Some(handler) = map_lookup_str(map, key) {
                        let result = self.call_value(handler, &[a, b], pos)?;
                        let n = result
                            .as_number()
                            .ok_or_else(|| EngineError::runtime("__operator_compare__ must return a number", pos))?;
                        return Ok(Some(n.partial_cmp(&0.0).ok_or_else(|| {
                            EngineError::runtime("__operator_compare__ returned NaN", pos)
                        })?));
                    }
                }
            }
        }
        Ok(None)
    }

    fn as_string(&self, v: Value) -> Option<String> {
        let ptr = v.as_allocated()?;
        match unsafe { &(*ptr).data } {
            ObjectData::String(s) => Some(s.as_str().to_string()),
            _ => None,
        }
    }

    fn index_get(&self, target: Value, index: Value, pos: SourcePosition) -> Result<Value, EngineError> {
        let ptr = target
            .as_allocated()
            .ok_or_else(|| EngineError::runtime("value is not indexable", pos))?;
        match unsafe { &(*ptr).data } {
            ObjectData::Array(items) => {
                let i = index
                    .as_number()
                    .ok_or_else(|| EngineError::runtime("array index must be a number", pos))?
                    as i64;
                let i = resolve_index(i, items.len());
                items
                    .get(i)
                    .copied()
                    .ok_or_else(|| EngineError::runtime("array index out of range", pos))
            }
            ObjectData::Map(map) => {
                let key = operators::map_key_or_err(index, pos)?;
                Ok(map.get(&key).copied().unwrap_or_else(Value::null))
            }
            ObjectData::String(s) => {
                let i = index
                    .as_number()
                    .ok_or_else(|| EngineError::runtime("string index must be a number", pos))?
                    as i64;
                let chars: Vec<char> = s.as_str().chars().collect();
                let i = resolve_index(i, chars.len());
                let ch = chars
                    .get(i)
                    .ok_or_else(|| EngineError::runtime("string index out of range", pos))?;
                Ok(self.box_string(&ch.to_string()))
            }
            _ => Err(EngineError::runtime("value is not indexable", pos)),
        }
    }

    fn index_set(&self, target: Value, index: Value, value: Value, pos: SourcePosition) -> Result<(), EngineError> {
        let ptr = target
            .as_allocated()
            .ok_or_else(|| EngineError::runtime("value is not indexable", pos))?;
        match unsafe { &mut (*ptr).data } {
            ObjectData::Array(items) => {
                let i = index
                    .as_number()
                    .ok_or_else(|| EngineError::runtime("array index must be a number", pos))?
                    as i64;
                let i = resolve_index(i, items.len());
                let slot = items
                    .get_mut(i)
                    .ok_or_else(|| EngineError::runtime("array index out of range", pos))?;
                *slot = value;
                Ok(())
            }
            ObjectData::Map(map) => {
                let key = operators::map_key_or_err(index, pos)?;
                map.insert(key, value);
                Ok(())
            }
            _ => Err(EngineError::runtime("value does not support index assignment", pos)),
        }
    }

    fn value_len(&self, v: Value, pos: SourcePosition) -> Result<usize, EngineError> {
        let ptr = v
            .as_allocated()
            .ok_or_else(|| EngineError::runtime("len() requires a string, array, or map", pos))?;
        match unsafe { &(*ptr).data } {
            ObjectData::Array(items) => Ok(items.len()),
            ObjectData::Map(map) => Ok(map.len()),
            ObjectData::String(s) => Ok(s.as_str().chars().count()),
            _ => Err(EngineError::runtime("len() requires a string, array, or map", pos)),
        }
    }

    pub fn capture_traceback(&self) -> Vec<TracebackEntry> {
        self.frames
            .iter()
            .rev()
            .map(|f| TracebackEntry {
                function_name: f
                    .function
                    .name
                    .as_deref()
                    .unwrap_or("<anonymous>")
                    .to_string(),
                position: f.position_at(f.ip),
            })
            .collect()
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

fn resolve_index(i: i64, len: usize) -> usize {
    if i < 0 {
        (len as i64 + i).max(0) as usize
    } else {
        i as usize
    }
}

fn map_lookup_str(map: &ApeMap, key: &str) -> Option<Value> {
    for (k, v) in map.iter() {
        if let MapKey::String(s) = k {
            if s.as_str() == key {
                return Some(*v);
            }
        }
    }
    None
}
