//! The AVM2 opcode set and its static metadata.
//!
//! One table row per opcode: encoding byte, operand format, statically
//! known pop count (`-1` when the count depends on a multiname kind or an
//! argument-count operand), push count, control-flow kind, and whether
//! the operation can raise a runtime error (which decides exception-edge
//! expansion). The row macro keeps the table greppable and makes it hard
//! for the accessors to fall out of sync.

use core::fmt;

/// Operand layout following an opcode byte.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Format {
    /// No operands.
    None,
    /// A single u8 (`pushbyte` value, `getscopeobject` index).
    U8,
    /// A u30 holding a sign-extended 16-bit immediate (`pushshort`).
    ShortImm,
    /// A u30 local register index.
    Local,
    /// A u30 count (`call`-family argument counts, `newarray` lengths).
    U30,
    /// A u30 index into the int pool.
    Int,
    /// A u30 index into the uint pool.
    Uint,
    /// A u30 index into the double pool.
    Double,
    /// A u30 index into the string pool.
    Str,
    /// A u30 index into the namespace pool.
    Ns,
    /// A u30 multiname index.
    Name,
    /// A u30 multiname index followed by a u30 argument count.
    NameArgc,
    /// A u30 method/dispatch index followed by a u30 argument count.
    IndexArgc,
    /// Two u30 local register indices (`hasnext2`).
    TwoLocals,
    /// A u30 class_info index (`newclass`).
    ClassInfo,
    /// A u30 method_info index (`newfunction`).
    MethodInfo,
    /// A u30 slot or exception index.
    Slot,
    /// An s24 branch offset.
    Branch,
    /// `lookupswitch`: s24 default, u30 case count, case_count+1 s24s.
    Switch,
    /// `debug`: u8 kind, u30 index, u8 register, u30 extra.
    Debug,
    /// A u30 line number (`debugline`).
    Line,
}

/// Control-flow effect of an opcode.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Flow {
    /// Falls through to the next instruction.
    Next,
    /// Unconditional branch.
    Branch,
    /// Two-way branch: fallthrough plus target.
    CondBranch,
    /// `lookupswitch`.
    Switch,
    /// Returns from the method.
    Return,
    /// Throws; control leaves the block.
    Throw,
}

macro_rules! opcodes {
    ($( $name:ident = $byte:literal, $format:ident, $pops:literal, $pushes:literal, $flow:ident, $throws:literal; )*) => {
        /// An AVM2 opcode.
        ///
        /// `Unknown` stands in for any byte the decoder does not
        /// recognise. Such instructions are kept opaque and only rejected
        /// if control can actually reach them.
        #[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
        #[allow(missing_docs)]
        pub enum Opcode {
            $( $name, )*
            Unknown,
        }

        impl Opcode {
            /// Decode an opcode byte.
            pub fn from_byte(byte: u8) -> Option<Self> {
                match byte {
                    $( $byte => Some(Opcode::$name), )*
                    _ => None,
                }
            }

            /// Operand layout.
            pub fn format(self) -> Format {
                match self {
                    $( Opcode::$name => Format::$format, )*
                    Opcode::Unknown => Format::None,
                }
            }

            /// Statically known pop count, or `None` when the count
            /// depends on the instruction's multiname or argument count.
            pub fn static_pops(self) -> Option<u32> {
                match self {
                    $( Opcode::$name => {
                        let pops: i8 = $pops;
                        if pops < 0 { None } else { Some(pops as u32) }
                    } )*
                    Opcode::Unknown => Some(0),
                }
            }

            /// Does the opcode push a value?
            pub fn pushes(self) -> bool {
                match self {
                    $( Opcode::$name => $pushes != 0, )*
                    Opcode::Unknown => false,
                }
            }

            /// Control-flow effect.
            pub fn flow(self) -> Flow {
                match self {
                    $( Opcode::$name => Flow::$flow, )*
                    Opcode::Unknown => Flow::Next,
                }
            }

            /// Can the operation raise a runtime error? Used to
            /// over-approximate exception edges; `true` is always safe.
            pub fn can_throw(self) -> bool {
                match self {
                    $( Opcode::$name => $throws, )*
                    Opcode::Unknown => true,
                }
            }
        }
    };
}

opcodes! {
    Bkpt           = 0x01, None,      0, 0, Next,       false;
    Nop            = 0x02, None,      0, 0, Next,       false;
    Throw          = 0x03, None,      1, 0, Throw,      true;
    GetSuper       = 0x04, Name,     -1, 1, Next,       true;
    SetSuper       = 0x05, Name,     -1, 0, Next,       true;
    Dxns           = 0x06, Str,       0, 0, Next,       true;
    DxnsLate       = 0x07, None,      1, 0, Next,       true;
    Kill           = 0x08, Local,     0, 0, Next,       false;
    Label          = 0x09, None,      0, 0, Next,       false;
    IfNlt          = 0x0C, Branch,    2, 0, CondBranch, true;
    IfNle          = 0x0D, Branch,    2, 0, CondBranch, true;
    IfNgt          = 0x0E, Branch,    2, 0, CondBranch, true;
    IfNge          = 0x0F, Branch,    2, 0, CondBranch, true;
    Jump           = 0x10, Branch,    0, 0, Branch,     false;
    IfTrue         = 0x11, Branch,    1, 0, CondBranch, false;
    IfFalse        = 0x12, Branch,    1, 0, CondBranch, false;
    IfEq           = 0x13, Branch,    2, 0, CondBranch, true;
    IfNe           = 0x14, Branch,    2, 0, CondBranch, true;
    IfLt           = 0x15, Branch,    2, 0, CondBranch, true;
    IfLe           = 0x16, Branch,    2, 0, CondBranch, true;
    IfGt           = 0x17, Branch,    2, 0, CondBranch, true;
    IfGe           = 0x18, Branch,    2, 0, CondBranch, true;
    IfStrictEq     = 0x19, Branch,    2, 0, CondBranch, false;
    IfStrictNe     = 0x1A, Branch,    2, 0, CondBranch, false;
    LookupSwitch   = 0x1B, Switch,    1, 0, Switch,     false;
    PushWith       = 0x1C, None,      1, 0, Next,       true;
    PopScope       = 0x1D, None,      0, 0, Next,       false;
    NextName       = 0x1E, None,      2, 1, Next,       true;
    HasNext        = 0x1F, None,      2, 1, Next,       true;
    PushNull       = 0x20, None,      0, 1, Next,       false;
    PushUndefined  = 0x21, None,      0, 1, Next,       false;
    NextValue      = 0x23, None,      2, 1, Next,       true;
    PushByte       = 0x24, U8,        0, 1, Next,       false;
    PushShort      = 0x25, ShortImm,  0, 1, Next,       false;
    PushTrue       = 0x26, None,      0, 1, Next,       false;
    PushFalse      = 0x27, None,      0, 1, Next,       false;
    PushNaN        = 0x28, None,      0, 1, Next,       false;
    Pop            = 0x29, None,      1, 0, Next,       false;
    Dup            = 0x2A, None,      0, 1, Next,       false;
    Swap           = 0x2B, None,      0, 0, Next,       false;
    PushString     = 0x2C, Str,       0, 1, Next,       false;
    PushInt        = 0x2D, Int,       0, 1, Next,       false;
    PushUint       = 0x2E, Uint,      0, 1, Next,       false;
    PushDouble     = 0x2F, Double,    0, 1, Next,       false;
    PushScope      = 0x30, None,      1, 0, Next,       true;
    PushNamespace  = 0x31, Ns,        0, 1, Next,       false;
    HasNext2       = 0x32, TwoLocals, 0, 1, Next,       true;
    NewFunction    = 0x40, MethodInfo, 0, 1, Next,      true;
    Call           = 0x41, U30,      -1, 1, Next,       true;
    Construct      = 0x42, U30,      -1, 1, Next,       true;
    CallMethod     = 0x43, IndexArgc, -1, 1, Next,      true;
    CallStatic     = 0x44, IndexArgc, -1, 1, Next,      true;
    CallSuper      = 0x45, NameArgc, -1, 1, Next,       true;
    CallProperty   = 0x46, NameArgc, -1, 1, Next,       true;
    ReturnVoid     = 0x47, None,      0, 0, Return,     false;
    ReturnValue    = 0x48, None,      1, 0, Return,     true;
    ConstructSuper = 0x49, U30,      -1, 0, Next,       true;
    ConstructProp  = 0x4A, NameArgc, -1, 1, Next,       true;
    CallPropLex    = 0x4C, NameArgc, -1, 1, Next,       true;
    CallSuperVoid  = 0x4E, NameArgc, -1, 0, Next,       true;
    CallPropVoid   = 0x4F, NameArgc, -1, 0, Next,       true;
    ApplyType      = 0x53, U30,      -1, 1, Next,       true;
    NewObject      = 0x55, U30,      -1, 1, Next,       true;
    NewArray       = 0x56, U30,      -1, 1, Next,       true;
    NewActivation  = 0x57, None,      0, 1, Next,       true;
    NewClass       = 0x58, ClassInfo, 1, 1, Next,       true;
    GetDescendants = 0x59, Name,     -1, 1, Next,       true;
    NewCatch       = 0x5A, Slot,      0, 1, Next,       true;
    FindPropStrict = 0x5D, Name,     -1, 1, Next,       true;
    FindProperty   = 0x5E, Name,     -1, 1, Next,       true;
    FindDef        = 0x5F, Name,      0, 1, Next,       true;
    GetLex         = 0x60, Name,      0, 1, Next,       true;
    SetProperty    = 0x61, Name,     -1, 0, Next,       true;
    GetLocal       = 0x62, Local,     0, 1, Next,       false;
    SetLocal       = 0x63, Local,     1, 0, Next,       false;
    GetGlobalScope = 0x64, None,      0, 1, Next,       false;
    GetScopeObject = 0x65, U8,        0, 1, Next,       false;
    GetProperty    = 0x66, Name,     -1, 1, Next,       true;
    InitProperty   = 0x68, Name,     -1, 0, Next,       true;
    DeleteProperty = 0x6A, Name,     -1, 1, Next,       true;
    GetSlot        = 0x6C, Slot,      1, 1, Next,       true;
    SetSlot        = 0x6D, Slot,      2, 0, Next,       true;
    GetGlobalSlot  = 0x6E, Slot,      0, 1, Next,       true;
    SetGlobalSlot  = 0x6F, Slot,      1, 0, Next,       true;
    ConvertS       = 0x70, None,      1, 1, Next,       true;
    EscXElem       = 0x71, None,      1, 1, Next,       true;
    EscXAttr       = 0x72, None,      1, 1, Next,       true;
    ConvertI       = 0x73, None,      1, 1, Next,       true;
    ConvertU       = 0x74, None,      1, 1, Next,       true;
    ConvertD       = 0x75, None,      1, 1, Next,       true;
    ConvertB       = 0x76, None,      1, 1, Next,       false;
    ConvertO       = 0x77, None,      1, 1, Next,       true;
    CheckFilter    = 0x78, None,      0, 0, Next,       true;
    Coerce         = 0x80, Name,      1, 1, Next,       true;
    CoerceA        = 0x82, None,      1, 1, Next,       false;
    CoerceS        = 0x85, None,      1, 1, Next,       true;
    AsType         = 0x86, Name,      1, 1, Next,       true;
    AsTypeLate     = 0x87, None,      2, 1, Next,       true;
    CoerceO        = 0x89, None,      1, 1, Next,       true;
    Negate         = 0x90, None,      1, 1, Next,       true;
    Increment      = 0x91, None,      1, 1, Next,       true;
    IncLocal       = 0x92, Local,     0, 0, Next,       true;
    Decrement      = 0x93, None,      1, 1, Next,       true;
    DecLocal       = 0x94, Local,     0, 0, Next,       true;
    TypeOf         = 0x95, None,      1, 1, Next,       false;
    Not            = 0x96, None,      1, 1, Next,       false;
    BitNot         = 0x97, None,      1, 1, Next,       true;
    Add            = 0xA0, None,      2, 1, Next,       true;
    Subtract       = 0xA1, None,      2, 1, Next,       true;
    Multiply       = 0xA2, None,      2, 1, Next,       true;
    Divide         = 0xA3, None,      2, 1, Next,       true;
    Modulo         = 0xA4, None,      2, 1, Next,       true;
    Lshift         = 0xA5, None,      2, 1, Next,       true;
    Rshift         = 0xA6, None,      2, 1, Next,       true;
    Urshift        = 0xA7, None,      2, 1, Next,       true;
    BitAnd         = 0xA8, None,      2, 1, Next,       true;
    BitOr          = 0xA9, None,      2, 1, Next,       true;
    BitXor         = 0xAA, None,      2, 1, Next,       true;
    Equals         = 0xAB, None,      2, 1, Next,       true;
    StrictEquals   = 0xAC, None,      2, 1, Next,       false;
    LessThan       = 0xAD, None,      2, 1, Next,       true;
    LessEquals     = 0xAE, None,      2, 1, Next,       true;
    GreaterThan    = 0xAF, None,      2, 1, Next,       true;
    GreaterEquals  = 0xB0, None,      2, 1, Next,       true;
    InstanceOf     = 0xB1, None,      2, 1, Next,       true;
    IsType         = 0xB2, Name,      1, 1, Next,       true;
    IsTypeLate     = 0xB3, None,      2, 1, Next,       true;
    In             = 0xB4, None,      2, 1, Next,       true;
    IncrementI     = 0xC0, None,      1, 1, Next,       true;
    DecrementI     = 0xC1, None,      1, 1, Next,       true;
    IncLocalI      = 0xC2, Local,     0, 0, Next,       true;
    DecLocalI      = 0xC3, Local,     0, 0, Next,       true;
    NegateI        = 0xC4, None,      1, 1, Next,       true;
    AddI           = 0xC5, None,      2, 1, Next,       true;
    SubtractI      = 0xC6, None,      2, 1, Next,       true;
    MultiplyI      = 0xC7, None,      2, 1, Next,       true;
    GetLocal0      = 0xD0, None,      0, 1, Next,       false;
    GetLocal1      = 0xD1, None,      0, 1, Next,       false;
    GetLocal2      = 0xD2, None,      0, 1, Next,       false;
    GetLocal3      = 0xD3, None,      0, 1, Next,       false;
    SetLocal0      = 0xD4, None,      1, 0, Next,       false;
    SetLocal1      = 0xD5, None,      1, 0, Next,       false;
    SetLocal2      = 0xD6, None,      1, 0, Next,       false;
    SetLocal3      = 0xD7, None,      1, 0, Next,       false;
    Debug          = 0xEF, Debug,     0, 0, Next,       false;
    DebugLine      = 0xF0, Line,      0, 0, Next,       false;
    DebugFile      = 0xF1, Str,       0, 0, Next,       false;
}

impl Opcode {
    /// The fixed local register accessed by a short-form local opcode.
    pub fn implicit_local(self) -> Option<u32> {
        match self {
            Opcode::GetLocal0 | Opcode::SetLocal0 => Some(0),
            Opcode::GetLocal1 | Opcode::SetLocal1 => Some(1),
            Opcode::GetLocal2 | Opcode::SetLocal2 => Some(2),
            Opcode::GetLocal3 | Opcode::SetLocal3 => Some(3),
            _ => None,
        }
    }

    /// Is this a `getlocal` in any encoding?
    pub fn is_get_local(self) -> bool {
        matches!(
            self,
            Opcode::GetLocal
                | Opcode::GetLocal0
                | Opcode::GetLocal1
                | Opcode::GetLocal2
                | Opcode::GetLocal3
        )
    }

    /// Is this a `setlocal` in any encoding?
    pub fn is_set_local(self) -> bool {
        matches!(
            self,
            Opcode::SetLocal
                | Opcode::SetLocal0
                | Opcode::SetLocal1
                | Opcode::SetLocal2
                | Opcode::SetLocal3
        )
    }

    /// Does the opcode end its basic block?
    pub fn ends_block(self) -> bool {
        !matches!(self.flow(), Flow::Next)
    }

    /// Conditional and unconditional branches (not switches).
    pub fn is_branch(self) -> bool {
        matches!(self.flow(), Flow::Branch | Flow::CondBranch)
    }

    /// The comparison family, which produces `bool`.
    pub fn is_compare(self) -> bool {
        matches!(
            self,
            Opcode::Equals
                | Opcode::StrictEquals
                | Opcode::LessThan
                | Opcode::LessEquals
                | Opcode::GreaterThan
                | Opcode::GreaterEquals
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Mnemonic style: lowercase the CamelCase variant name.
        let name = format!("{self:?}");
        let mut prev_lower = false;
        for c in name.chars() {
            if c.is_ascii_uppercase() && prev_lower {
                write!(f, "_")?;
            }
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
            write!(f, "{}", c.to_ascii_lowercase())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_round_trip() {
        assert_eq!(Opcode::from_byte(0x66), Some(Opcode::GetProperty));
        assert_eq!(Opcode::from_byte(0xD0), Some(Opcode::GetLocal0));
        assert_eq!(Opcode::from_byte(0x22), None);
        assert_eq!(Opcode::from_byte(0x81), None);
    }

    #[test]
    fn static_pops() {
        assert_eq!(Opcode::Add.static_pops(), Some(2));
        assert_eq!(Opcode::GetProperty.static_pops(), None);
        assert_eq!(Opcode::PushInt.static_pops(), Some(0));
    }

    #[test]
    fn flow_kinds() {
        assert_eq!(Opcode::Jump.flow(), Flow::Branch);
        assert_eq!(Opcode::IfLt.flow(), Flow::CondBranch);
        assert_eq!(Opcode::LookupSwitch.flow(), Flow::Switch);
        assert_eq!(Opcode::ReturnVoid.flow(), Flow::Return);
        assert_eq!(Opcode::Throw.flow(), Flow::Throw);
        assert!(Opcode::ReturnValue.ends_block());
        assert!(!Opcode::Add.ends_block());
    }

    #[test]
    fn mnemonics() {
        assert_eq!(Opcode::GetProperty.to_string(), "get_property");
        assert_eq!(Opcode::GetLocal0.to_string(), "get_local0");
        assert_eq!(Opcode::Add.to_string(), "add");
    }
}
