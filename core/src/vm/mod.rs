//! Stack bytecode virtual machine
//!
//! Program metadata, the object store, frames, the function invoker, the interpreter loop and
//! the opcode handlers. Hosts build a [`Program`] with [`ProgramBuilder`] (bytecode bodies are
//! assembled with [`ScriptBuilder`]), spawn objects on a [`Vm`] and enter script through
//! [`Vm::process_event`] with an [`ExecutionContext`].

mod alloc;
mod builder;
mod bytecode;
mod config;
mod context;
mod object;
mod policy;
mod program;
mod signal;
#[allow(clippy::module_inception)]
mod vm;

pub use alloc::*;
pub use builder::*;
pub use bytecode::*;
pub use config::*;
pub use context::*;
pub use object::*;
pub use policy::*;
pub use program::*;
pub use signal::*;
pub use vm::*;
