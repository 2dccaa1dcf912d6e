//! Script exception channel.
//!
//! Script-level conditions are reported to a host sink instead of unwinding. Only the two
//! aborting severities turn into an `Err(Aborted)` that stops the frame chain.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::val::{Name, ObjectRef};

use super::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScriptExceptionType {
    Breakpoint,
    Tracepoint,
    WireTracepoint,
    AccessViolation,
    InfiniteLoop,
    NonFatalError,
    FatalError,
    AbortExecution,
}

impl ScriptExceptionType {
    /// Debugger signals are informative only and never logged as warnings.
    pub fn is_debug_signal(self) -> bool {
        matches!(
            self,
            ScriptExceptionType::Breakpoint | ScriptExceptionType::Tracepoint | ScriptExceptionType::WireTracepoint
        )
    }

    pub fn is_aborting(self) -> bool {
        matches!(self, ScriptExceptionType::FatalError | ScriptExceptionType::AbortExecution)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptExceptionInfo {
    pub kind: ScriptExceptionType,
    pub description: String,
}

impl ScriptExceptionInfo {
    pub fn new(kind: ScriptExceptionType, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentationKind {
    Event,
    InlineEvent,
    ResumeEvent,
    NodeEntry,
    NodeExit,
    NodeDebugSite,
    PushState,
    PopState,
    Stop,
}

impl InstrumentationKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => InstrumentationKind::Event,
            1 => InstrumentationKind::InlineEvent,
            2 => InstrumentationKind::ResumeEvent,
            3 => InstrumentationKind::NodeEntry,
            4 => InstrumentationKind::NodeExit,
            5 => InstrumentationKind::NodeDebugSite,
            6 => InstrumentationKind::PushState,
            7 => InstrumentationKind::PopState,
            8 => InstrumentationKind::Stop,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentationSignal {
    pub kind: InstrumentationKind,
    pub object: ObjectRef,
    pub function: Name,
    pub code_offset: usize,
    pub event: Option<Name>,
}

/// Host listener bound to an [`ExecutionContext`](super::ExecutionContext).
///
/// Binding a sink is what "a debugger is attached" means to the interpreter: breakpoint,
/// tracepoint and instrumentation opcodes only report when one is present.
pub trait SignalSink {
    fn on_script_exception(&mut self, object: ObjectRef, frame: &Frame, info: &ScriptExceptionInfo);

    fn on_instrumentation(&mut self, _signal: &InstrumentationSignal) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    Signalled(ScriptExceptionType),
    Malformed { function: Name, offset: usize, detail: String },
}

/// Cooperative abort travelling back up the frame chain through `?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aborted {
    pub reason: AbortReason,
}

impl Aborted {
    pub fn signalled(kind: ScriptExceptionType) -> Self {
        Self {
            reason: AbortReason::Signalled(kind),
        }
    }

    pub fn malformed(function: Name, offset: usize, detail: impl Into<String>) -> Self {
        Self {
            reason: AbortReason::Malformed {
                function,
                offset,
                detail: detail.into(),
            },
        }
    }
}

impl fmt::Display for Aborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            AbortReason::Signalled(kind) => write!(f, "script execution aborted by {kind:?}"),
            AbortReason::Malformed {
                function,
                offset,
                detail,
            } => write!(f, "malformed bytecode in {function} at offset {offset}: {detail}"),
        }
    }
}

impl std::error::Error for Aborted {}

pub type VmResult<T> = Result<T, Aborted>;
