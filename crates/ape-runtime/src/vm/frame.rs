//! Call frames (spec.md §4.8).
//!
//! A frame wraps one activation of a compiled function: its bytecode, an
//! instruction pointer, the operand-stack base its locals live above, and
//! an optional `recover` handler address installed by `SET_RECOVER`.

use std::rc::Rc;

use ape_core::SourcePosition;

use crate::object::FunctionObj;

/// Sentinel meaning "no recover handler installed in this frame".
pub const NO_RECOVER: i64 = -1;

pub struct Frame {
    pub function: Rc<FunctionObj>,
    pub ip: usize,
    pub base_pointer: usize,
    pub recover_ip: i64,
    /// Set once this frame has actually jumped into its recover handler,
    /// so a second error raised while the handler itself runs is not
    /// caught by the same `recover` again — it propagates to an outer
    /// frame instead (spec.md §4.8, mirroring the original's
    /// `frame->is_recovering`).
    pub is_recovering: bool,
}

impl Frame {
    pub fn new(function: Rc<FunctionObj>, base_pointer: usize) -> Frame {
        Frame {
            function,
            ip: 0,
            base_pointer,
            recover_ip: NO_RECOVER,
            is_recovering: false,
        }
    }

    pub fn bytecode(&self) -> &[u8] {
        &self.function.bytecode
    }

    /// Eligible to catch the *next* error: a handler is installed and this
    /// frame hasn't already jumped into one.
    pub fn can_recover(&self) -> bool {
        self.recover_ip != NO_RECOVER && !self.is_recovering
    }

    /// Source position of the instruction at `ip`, for error reporting. The
    /// compiler emits one position per opcode byte, indexed by instruction
    /// start, so a linear scan from the frame's last known boundary is
    /// unnecessary — the compiler hands us a parallel array instead.
    pub fn position_at(&self, ip: usize) -> SourcePosition {
        self.function
            .positions
            .get(ip)
            .cloned()
            .unwrap_or_default()
    }
}
