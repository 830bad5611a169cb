//! The bytecode instruction set (spec.md §4.5).
//!
//! One byte opcode followed by 0, 1, or 2 big-endian operands whose widths
//! are fixed per opcode. `FUNCTION` is the only two-operand instruction
//! (constant index, then free-variable count). Operand widths below match
//! the original implementation's `g_definitions` table (`h7/code.c`)
//! exactly, including which opcodes use a 1-byte vs. 2-byte operand
//! (`CALL`/`GET_LOCAL`/`DEFINE_LOCAL`/`SET_LOCAL`/`GET_FREE`/`SET_FREE` take
//! a 1-byte operand; everything else that takes an operand takes 2 bytes,
//! except `NUMBER` which takes a raw 8-byte IEEE-754 double).

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    None = 0,
    Constant,
    Add,
    Pop,
    Sub,
    Mul,
    Div,
    Mod,
    True,
    False,
    Compare,
    CompareEq,
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanEqual,
    Minus,
    Bang,
    Jump,
    JumpIfFalse,
    JumpIfTrue,
    Null,
    GetModuleGlobal,
    SetModuleGlobal,
    DefineModuleGlobal,
    Array,
    MapStart,
    MapEnd,
    GetThis,
    GetIndex,
    SetIndex,
    GetValueAt,
    Call,
    ReturnValue,
    Return,
    GetLocal,
    DefineLocal,
    SetLocal,
    GetApeGlobal,
    Function,
    GetFree,
    SetFree,
    CurrentFunction,
    Dup,
    Number,
    Len,
    SetRecover,
    Or,
    Xor,
    And,
    Lshift,
    Rshift,
}

impl Opcode {
    /// Widths, in bytes, of each operand this opcode carries (0, 1, or 2
    /// operands; `FUNCTION` is the sole two-operand opcode).
    pub const fn operand_widths(self) -> &'static [u8] {
        use Opcode::*;
        match self {
            None | Add | Pop | Sub | Mul | Div | Mod | True | False | Compare | CompareEq
            | Equal | NotEqual | GreaterThan | GreaterThanEqual | Minus | Bang | Null
            | GetThis | GetIndex | SetIndex | GetValueAt | ReturnValue | Return
            | CurrentFunction | Dup | Len | Or | Xor | And | Lshift | Rshift => &[],

            Call | GetLocal | DefineLocal | SetLocal | GetFree | SetFree => &[1],

            Constant | Jump | JumpIfFalse | JumpIfTrue | GetModuleGlobal | SetModuleGlobal
            | DefineModuleGlobal | Array | MapStart | MapEnd | GetApeGlobal | SetRecover => &[2],

            Number => &[8],

            Function => &[2, 1],
        }
    }

    /// Total instruction length in bytes, including the opcode byte.
    pub const fn instruction_len(self) -> usize {
        let mut len = 1;
        let widths = self.operand_widths();
        let mut i = 0;
        while i < widths.len() {
            len += widths[i] as usize;
            i += 1;
        }
        len
    }

    pub const fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            None => "NONE",
            Constant => "CONSTANT",
            Add => "ADD",
            Pop => "POP",
            Sub => "SUB",
            Mul => "MUL",
            Div => "DIV",
            Mod => "MOD",
            True => "TRUE",
            False => "FALSE",
            Compare => "COMPARE",
            CompareEq => "COMPARE_EQ",
            Equal => "EQUAL",
            NotEqual => "NOT_EQUAL",
            GreaterThan => "GREATER_THAN",
            GreaterThanEqual => "GREATER_THAN_EQUAL",
            Minus => "MINUS",
            Bang => "BANG",
            Jump => "JUMP",
            JumpIfFalse => "JUMP_IF_FALSE",
            JumpIfTrue => "JUMP_IF_TRUE",
            Null => "NULL",
            GetModuleGlobal => "GET_MODULE_GLOBAL",
            SetModuleGlobal => "SET_MODULE_GLOBAL",
            DefineModuleGlobal => "DEFINE_MODULE_GLOBAL",
            Array => "ARRAY",
            MapStart => "MAP_START",
            MapEnd => "MAP_END",
            GetThis => "GET_THIS",
            GetIndex => "GET_INDEX",
            SetIndex => "SET_INDEX",
            GetValueAt => "GET_VALUE_AT",
            Call => "CALL",
            ReturnValue => "RETURN_VALUE",
            Return => "RETURN",
            GetLocal => "GET_LOCAL",
            DefineLocal => "DEFINE_LOCAL",
            SetLocal => "SET_LOCAL",
            GetApeGlobal => "GET_APE_GLOBAL",
            Function => "FUNCTION",
            GetFree => "GET_FREE",
            SetFree => "SET_FREE",
            CurrentFunction => "CURRENT_FUNCTION",
            Dup => "DUP",
            Number => "NUMBER",
            Len => "LEN",
            SetRecover => "SET_RECOVER",
            Or => "OR",
            Xor => "XOR",
            And => "AND",
            Lshift => "LSHIFT",
            Rshift => "RSHIFT",
        }
    }

    /// Decode a raw opcode byte. `None` for out-of-range bytes (corrupt
    /// bytecode should never reach the VM since it is never serialized or
    /// read from outside the compiler, but decoding defensively keeps the
    /// dispatch loop panic-free).
    pub const fn from_byte(byte: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match byte {
            0 => None_,
            1 => Constant,
            2 => Add,
            3 => Pop,
            4 => Sub,
            5 => Mul,
            6 => Div,
            7 => Mod,
            8 => True,
            9 => False,
            10 => Compare,
            11 => CompareEq,
            12 => Equal,
            13 => NotEqual,
            14 => GreaterThan,
            15 => GreaterThanEqual,
            16 => Minus,
            17 => Bang,
            18 => Jump,
            19 => JumpIfFalse,
            20 => JumpIfTrue,
            21 => Null,
            22 => GetModuleGlobal,
            23 => SetModuleGlobal,
            24 => DefineModuleGlobal,
            25 => Array,
            26 => MapStart,
            27 => MapEnd,
            28 => GetThis,
            29 => GetIndex,
            30 => SetIndex,
            31 => GetValueAt,
            32 => Call,
            33 => ReturnValue,
            34 => Return,
            35 => GetLocal,
            36 => DefineLocal,
            37 => SetLocal,
            38 => GetApeGlobal,
            39 => Function,
            40 => GetFree,
            41 => SetFree,
            42 => CurrentFunction,
            43 => Dup,
            44 => Number,
            45 => Len,
            46 => SetRecover,
            47 => Or,
            48 => Xor,
            49 => And,
            50 => Lshift,
            51 => Rshift,
            _ => return Option::None,
        })
    }
}

// `None` collides with the variant name in the `from_byte` match arms
// above; alias it there instead of renaming the public variant.
#[allow(non_upper_case_globals)]
const None_: Opcode = Opcode::None;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_opcode_byte() {
        for byte in 0..=51u8 {
            let op = Opcode::from_byte(byte).expect("opcode byte should decode");
            assert_eq!(op as u8, byte);
        }
        assert!(Opcode::from_byte(52).is_none());
    }

    #[test]
    fn instruction_lengths_match_operand_widths() {
        assert_eq!(Opcode::None.instruction_len(), 1);
        assert_eq!(Opcode::Constant.instruction_len(), 3);
        assert_eq!(Opcode::Call.instruction_len(), 2);
        assert_eq!(Opcode::Function.instruction_len(), 4);
        assert_eq!(Opcode::Number.instruction_len(), 9);
    }
}
