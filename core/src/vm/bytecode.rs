//! Opcode set, operand encoding and function descriptors.
//!
//! Every instruction is one opcode byte followed by little-endian operands in a fixed order the
//! handler knows a priori:
//!
//! | operand | encoding |
//! |---------|----------|
//! | `skip`  | u32 code offset (absolute for jumps, relative to the end of the guard for contexts) |
//! | `prop`  | u32 property id, [`NULL_INDEX`] for a property missing at runtime |
//! | `name`  | u32 index into the program name table |
//! | `func`  | u32 function id |
//! | `class` | u32 class id, [`NULL_INDEX`] for none |
//! | `str`   | NUL-terminated UTF-8 |

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::val::{ClassId, FunctionId, Name, ObjectRef, Property, Value};

use super::{ExecutionContext, Frame, Vm, VmResult};

pub const NULL_INDEX: u32 = u32::MAX;

/// Bytes taken by the `skip` + `prop` guard that follows a context's base expression.
pub const CONTEXT_GUARD_LEN: usize = 8;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // variables
    LocalVariable = 0x00,
    InstanceVariable = 0x01,
    DefaultVariable = 0x02,
    LocalOutVariable = 0x03,
    ClassSparseDataVariable = 0x04,
    // control
    Return = 0x05,
    Nothing = 0x06,
    NothingInt32 = 0x07,
    Jump = 0x08,
    JumpIfNot = 0x09,
    Assert = 0x0A,
    ComputedJump = 0x0B,
    // assignment
    Let = 0x0C,
    LetBool = 0x0D,
    LetObj = 0x0E,
    LetDelegate = 0x0F,
    LetMulticastDelegate = 0x10,
    LetValueOnPersistentFrame = 0x11,
    // contexts
    SelfObject = 0x12,
    Context = 0x13,
    ContextFailSilent = 0x14,
    ClassContext = 0x15,
    InterfaceContext = 0x16,
    StructMemberContext = 0x17,
    ArrayGetByRef = 0x18,
    // calls
    VirtualFunction = 0x19,
    FinalFunction = 0x1A,
    LocalVirtualFunction = 0x1B,
    LocalFinalFunction = 0x1C,
    CallMath = 0x1D,
    EndFunctionParms = 0x1E,
    CallMulticastDelegate = 0x1F,
    AddMulticastDelegate = 0x20,
    RemoveMulticastDelegate = 0x21,
    ClearMulticastDelegate = 0x22,
    BindDelegate = 0x23,
    InstanceDelegate = 0x24,
    // literals
    IntConst = 0x25,
    Int64Const = 0x26,
    UInt64Const = 0x27,
    FloatConst = 0x28,
    DoubleConst = 0x29,
    StringConst = 0x2A,
    NameConst = 0x2B,
    ByteConst = 0x2C,
    IntConstByte = 0x2D,
    IntZero = 0x2E,
    IntOne = 0x2F,
    True = 0x30,
    False = 0x31,
    NoObject = 0x32,
    NoInterface = 0x33,
    ClassConst = 0x34,
    SkipOffsetConst = 0x35,
    VectorConst = 0x36,
    RotationConst = 0x37,
    TransformConst = 0x38,
    // composites
    StructConst = 0x39,
    EndStructConst = 0x3A,
    ArrayConst = 0x3B,
    EndArrayConst = 0x3C,
    SetConst = 0x3D,
    EndSetConst = 0x3E,
    MapConst = 0x3F,
    EndMapConst = 0x40,
    SetArray = 0x41,
    EndArray = 0x42,
    SetSet = 0x43,
    EndSet = 0x44,
    SetMap = 0x45,
    EndMap = 0x46,
    // casts
    DynamicCast = 0x47,
    MetaCast = 0x48,
    Cast = 0x49,
    ObjToInterfaceCast = 0x4A,
    CrossInterfaceCast = 0x4B,
    InterfaceToObjCast = 0x4C,
    // structured flow
    PushExecutionFlow = 0x4D,
    PopExecutionFlow = 0x4E,
    PopExecutionFlowIfNot = 0x4F,
    SwitchValue = 0x50,
    // debugging
    Breakpoint = 0x51,
    Tracepoint = 0x52,
    WireTracepoint = 0x53,
    InstrumentationEvent = 0x54,
    // transactions
    AutoRtfmTransact = 0x55,
    AutoRtfmStopTransact = 0x56,
    AutoRtfmAbortIfNot = 0x57,
    EndOfScript = 0x58,
}

impl Opcode {
    pub const ALL: &'static [Opcode] = &[
        Opcode::LocalVariable,
        Opcode::InstanceVariable,
        Opcode::DefaultVariable,
        Opcode::LocalOutVariable,
        Opcode::ClassSparseDataVariable,
        Opcode::Return,
        Opcode::Nothing,
        Opcode::NothingInt32,
        Opcode::Jump,
        Opcode::JumpIfNot,
        Opcode::Assert,
        Opcode::ComputedJump,
        Opcode::Let,
        Opcode::LetBool,
        Opcode::LetObj,
        Opcode::LetDelegate,
        Opcode::LetMulticastDelegate,
        Opcode::LetValueOnPersistentFrame,
        Opcode::SelfObject,
        Opcode::Context,
        Opcode::ContextFailSilent,
        Opcode::ClassContext,
        Opcode::InterfaceContext,
        Opcode::StructMemberContext,
        Opcode::ArrayGetByRef,
        Opcode::VirtualFunction,
        Opcode::FinalFunction,
        Opcode::LocalVirtualFunction,
        Opcode::LocalFinalFunction,
        Opcode::CallMath,
        Opcode::EndFunctionParms,
        Opcode::CallMulticastDelegate,
        Opcode::AddMulticastDelegate,
        Opcode::RemoveMulticastDelegate,
        Opcode::ClearMulticastDelegate,
        Opcode::BindDelegate,
        Opcode::InstanceDelegate,
        Opcode::IntConst,
        Opcode::Int64Const,
        Opcode::UInt64Const,
        Opcode::FloatConst,
        Opcode::DoubleConst,
        Opcode::StringConst,
        Opcode::NameConst,
        Opcode::ByteConst,
        Opcode::IntConstByte,
        Opcode::IntZero,
        Opcode::IntOne,
        Opcode::True,
        Opcode::False,
        Opcode::NoObject,
        Opcode::NoInterface,
        Opcode::ClassConst,
        Opcode::SkipOffsetConst,
        Opcode::VectorConst,
        Opcode::RotationConst,
        Opcode::TransformConst,
        Opcode::StructConst,
        Opcode::EndStructConst,
        Opcode::ArrayConst,
        Opcode::EndArrayConst,
        Opcode::SetConst,
        Opcode::EndSetConst,
        Opcode::MapConst,
        Opcode::EndMapConst,
        Opcode::SetArray,
        Opcode::EndArray,
        Opcode::SetSet,
        Opcode::EndSet,
        Opcode::SetMap,
        Opcode::EndMap,
        Opcode::DynamicCast,
        Opcode::MetaCast,
        Opcode::Cast,
        Opcode::ObjToInterfaceCast,
        Opcode::CrossInterfaceCast,
        Opcode::InterfaceToObjCast,
        Opcode::PushExecutionFlow,
        Opcode::PopExecutionFlow,
        Opcode::PopExecutionFlowIfNot,
        Opcode::SwitchValue,
        Opcode::Breakpoint,
        Opcode::Tracepoint,
        Opcode::WireTracepoint,
        Opcode::InstrumentationEvent,
        Opcode::AutoRtfmTransact,
        Opcode::AutoRtfmStopTransact,
        Opcode::AutoRtfmAbortIfNot,
        Opcode::EndOfScript,
    ];

    #[inline]
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        OPCODE_TABLE[byte as usize]
    }

    /// Opcodes that count towards the runaway ceiling.
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::Jump
                | Opcode::JumpIfNot
                | Opcode::ComputedJump
                | Opcode::PopExecutionFlow
                | Opcode::PopExecutionFlowIfNot
        )
    }
}

static OPCODE_TABLE: Lazy<[Option<Opcode>; 256]> = Lazy::new(|| {
    let mut table = [None; 256];
    for &op in Opcode::ALL {
        table[op as u8 as usize] = Some(op);
    }
    table
});

/// Sub-opcode read by [`Opcode::Cast`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastToken {
    ObjectToInterface = 0,
    ObjectToBool = 1,
    InterfaceToBool = 2,
    DoubleToFloat = 3,
    FloatToDouble = 4,
}

impl CastToken {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => CastToken::ObjectToInterface,
            1 => CastToken::ObjectToBool,
            2 => CastToken::InterfaceToBool,
            3 => CastToken::DoubleToFloat,
            4 => CastToken::FloatToDouble,
            _ => return None,
        })
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTransactMode {
    Graceful = 0,
    AbortingExit = 1,
    AbortingExitAndAbortParent = 2,
}

impl StopTransactMode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => StopTransactMode::Graceful,
            1 => StopTransactMode::AbortingExit,
            2 => StopTransactMode::AbortingExitAndAbortParent,
            _ => return None,
        })
    }
}

pub const FUNC_NATIVE: u32 = 0x0000_0001;
/// Subject to the host's callspace policy when called from bytecode.
pub const FUNC_NET: u32 = 0x0000_0002;
pub const FUNC_HAS_OUT_PARMS: u32 = 0x0000_0004;
/// Runs on a persistent per-instance frame.
pub const FUNC_UBERGRAPH: u32 = 0x0000_0008;
pub const FUNC_STATIC: u32 = 0x0000_0010;

/// Host implementation of a function.
///
/// Called with the caller's frame positioned at the first argument expression when invoked from
/// bytecode, or with a code-less frame over the bound parameters when invoked via
/// [`Vm::process_event`]. [`Frame::arg`], [`Frame::arg_ref`] and [`Frame::finish`] hide the
/// difference.
pub type NativeFn = fn(&mut Vm, &mut ExecutionContext, &mut Frame, ObjectRef, Option<&mut Value>) -> VmResult<()>;

#[derive(Clone)]
pub struct Function {
    pub id: FunctionId,
    pub name: Name,
    pub owner: ClassId,
    pub flags: u32,
    /// Parameters in declaration order (return value included), then locals.
    pub properties: Vec<Arc<Property>>,
    pub parms_count: usize,
    pub return_index: Option<usize>,
    pub script: Vec<u8>,
    pub native: Option<NativeFn>,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("flags", &format_args!("{:#x}", self.flags))
            .field("parms_count", &self.parms_count)
            .field("locals", &self.properties.len())
            .field("script_len", &self.script.len())
            .field("native", &self.native.is_some())
            .finish()
    }
}

impl Function {
    #[inline]
    pub fn has_any_flags(&self, flags: u32) -> bool {
        self.flags & flags != 0
    }

    pub fn is_native(&self) -> bool {
        self.native.is_some()
    }

    pub fn is_net(&self) -> bool {
        self.has_any_flags(FUNC_NET)
    }

    pub fn is_ubergraph(&self) -> bool {
        self.has_any_flags(FUNC_UBERGRAPH)
    }

    pub fn has_out_parms(&self) -> bool {
        self.has_any_flags(FUNC_HAS_OUT_PARMS)
    }

    pub fn params(&self) -> &[Arc<Property>] {
        &self.properties[..self.parms_count]
    }

    pub fn return_property(&self) -> Option<&Arc<Property>> {
        self.return_index.and_then(|idx| self.properties.get(idx))
    }

    pub fn find_property(&self, name: &str) -> Option<&Arc<Property>> {
        self.properties.iter().find(|p| p.name.as_str() == name)
    }

    /// Resets the caller's result storage to the return type's default.
    pub fn clear_return_value(&self, result: Option<&mut Value>) {
        if let (Some(result), Some(property)) = (result, self.return_property()) {
            property.clear_value(result);
        }
    }
}
