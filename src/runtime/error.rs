//! Runtime error taxonomy.
//!
//! `DispatchError` is a condition of the executing program and travels up
//! its call-frame stack; `InvariantError` means the instruction stream is
//! inconsistent with the VM's assumptions (a producer bug) and is always
//! fatal; `StructuralError` from the bytecode layer is wrapped so a VM run
//! over a corrupt artifact reports it unchanged.

use thiserror::Error;

use crate::bytecode::error::StructuralError;

#[derive(Debug, Error)]
pub enum VmError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error("{0}")]
    Dispatch(DispatchError),

    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantError),
}

impl VmError {
    pub fn dispatch(receiver: &'static str, selector: impl Into<String>, reason: DispatchReason) -> Self {
        VmError::Dispatch(DispatchError {
            receiver,
            selector: selector.into(),
            reason,
            trace: Vec::new(),
        })
    }

    /// Whether this error may be surfaced to the running program. Only
    /// dispatch failures are; everything else aborts the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, VmError::Dispatch(_))
    }
}

/// A message send the receiver could not complete.
#[derive(Debug)]
pub struct DispatchError {
    pub receiver: &'static str,
    pub selector: String,
    pub reason: DispatchReason,
    /// Frame descriptions accumulated while unwinding, innermost first.
    pub trace: Vec<String>,
}

#[derive(Debug)]
pub enum DispatchReason {
    /// No method table entry for (receiver type, selector).
    Unresolved,
    /// A block was invoked with the wrong number of arguments.
    WrongArity { expected: usize, got: usize },
    /// A native method rejected its operands.
    Failed(String),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.reason {
            DispatchReason::Unresolved => {
                write!(f, "{} does not understand '{}'", self.receiver, self.selector)?
            }
            DispatchReason::WrongArity { expected, got } => write!(
                f,
                "{} '{}': expected {} argument(s), got {}",
                self.receiver, self.selector, expected, got
            )?,
            DispatchReason::Failed(msg) => {
                write!(f, "{} '{}': {}", self.receiver, self.selector, msg)?
            }
        }
        if !self.trace.is_empty() {
            write!(f, "\n  unwound frames:")?;
            for (i, frame) in self.trace.iter().enumerate() {
                write!(f, "\n    {}: {}", i, frame)?;
            }
        }
        Ok(())
    }
}

/// The stream contradicted the VM's execution model. Never caught by
/// user-level error handling.
#[derive(Debug, Error)]
pub enum InvariantError {
    #[error("value stack underflow at instruction {at}: needed {needed}, depth {depth}")]
    StackUnderflow {
        at: usize,
        needed: usize,
        depth: usize,
    },

    #[error("call frame stack underflow")]
    FrameUnderflow,

    #[error("unbound local '{name}' at instruction {at}")]
    UnboundLocal { name: String, at: usize },

    #[error("jump target {target} out of range at instruction {at} (stream length {len})")]
    JumpOutOfRange { target: u32, at: usize, len: usize },

    #[error("block terminator L{label} at instruction {at} outside any block activation")]
    StrayBlockEnd { label: u32, at: usize },

    #[error("call depth limit exceeded ({limit})")]
    CallDepthExceeded { limit: usize },

    #[error("execution step limit exceeded ({limit})")]
    StepLimitExceeded { limit: usize },

    #[error("stack size limit exceeded ({limit})")]
    StackLimitExceeded { limit: usize },
}
