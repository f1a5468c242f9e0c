//! The virtual machine: a re-entrant interpreter over an instruction
//! stream.
//!
//! One `run` drives the fetch/dispatch loop until a halt or the end of the
//! stream. Block invocation re-enters the same loop with a stop armed at
//! the new frame: the inner loop exits as soon as that frame pops, which is
//! what lets natives and nested blocks call back into the interpreter from
//! arbitrary depth.

use std::rc::Rc;

use tracing::{debug, trace};

use crate::bytecode::error::StructuralError;
use crate::bytecode::op::{Literal, Op};
use crate::bytecode::rodata::SymbolId;
use crate::bytecode::stream::InstructionStream;
use crate::context::CompilationContext;
use crate::lang::value::{BlockValue, Value};
use crate::runtime::dispatch::MethodRegistry;
use crate::runtime::error::{DispatchReason, InvariantError, VmError};
use crate::runtime::frame::CallFrame;
use crate::runtime::scope::Scope;

#[derive(Debug, Clone)]
pub struct VmConfig {
    pub max_call_depth: usize,
    pub max_stack_size: usize,
    pub max_steps: Option<usize>,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_call_depth: 1000,
            max_stack_size: 10_000,
            max_steps: None,
        }
    }
}

#[derive(Debug)]
pub struct Vm<'c> {
    ctx: &'c CompilationContext,
    registry: MethodRegistry,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    config: VmConfig,
    steps: usize,
    halted: bool,
}

impl<'c> Vm<'c> {
    pub fn new(ctx: &'c CompilationContext, registry: MethodRegistry) -> Self {
        Self::with_config(ctx, registry, VmConfig::default())
    }

    pub fn with_config(
        ctx: &'c CompilationContext,
        registry: MethodRegistry,
        config: VmConfig,
    ) -> Self {
        Self {
            ctx,
            registry,
            stack: Vec::new(),
            frames: Vec::new(),
            config,
            steps: 0,
            halted: false,
        }
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    /// Resolve a name against the innermost scope of the most recent run.
    pub fn local(&self, name: SymbolId) -> Option<Value> {
        let frame = self.frames.last()?;
        Scope::lookup(&frame.scope, name)
    }

    /// Execute from the stream's current position until a `Halt` or the
    /// one-past-end sentinel.
    pub fn run(&mut self, stream: &mut InstructionStream) -> Result<(), VmError> {
        self.run_with_receiver(stream, Value::Nil)
    }

    /// Execute with an explicit top-level `self`.
    pub fn run_with_receiver(
        &mut self,
        stream: &mut InstructionStream,
        receiver: Value,
    ) -> Result<(), VmError> {
        self.steps = 0;
        self.halted = false;
        self.stack.clear();
        self.frames.clear();
        self.frames.push(CallFrame {
            return_ip: stream.len(),
            receiver,
            args: Vec::new(),
            scope: Scope::root(),
            block: None,
            stack_base: 0,
        });

        while !self.halted && !stream.at_end() {
            self.step(stream)?;
        }
        Ok(())
    }

    /// Invoke a block: push its frame, re-enter the loop armed to stop when
    /// that frame pops, and hand back the body's value. Callable from
    /// native method code at any depth.
    pub fn invoke_block(
        &mut self,
        stream: &mut InstructionStream,
        block: Rc<BlockValue>,
        args: Vec<Value>,
    ) -> Result<Value, VmError> {
        if args.len() != block.params.len() {
            return Err(VmError::dispatch(
                "Block",
                "call",
                DispatchReason::WrongArity {
                    expected: block.params.len(),
                    got: args.len(),
                },
            ));
        }
        if self.frames.len() >= self.config.max_call_depth {
            return Err(InvariantError::CallDepthExceeded {
                limit: self.config.max_call_depth,
            }
            .into());
        }

        let scope = Scope::child_of(&block.scope);
        for (param, arg) in block.params.iter().zip(args.iter()) {
            Scope::define(&scope, *param, arg.clone());
        }

        let return_ip = stream.mark();
        self.frames.push(CallFrame {
            return_ip,
            receiver: block.receiver.clone(),
            args,
            scope,
            block: Some(Rc::clone(&block)),
            stack_base: self.stack.len(),
        });
        stream.seek(block.body_ip);

        let entry = self.frames.len();
        while self.frames.len() >= entry && !self.halted {
            if let Err(e) = self.step(stream) {
                return Err(self.unwind(e, entry, return_ip, stream));
            }
            if stream.at_end() && self.frames.len() >= entry {
                let e = VmError::Structural(StructuralError::UnterminatedBlock {
                    label: block.end_label,
                });
                return Err(self.unwind(e, entry, return_ip, stream));
            }
        }

        if self.halted && self.frames.len() >= entry {
            // A halt inside the body: abandon the activation quietly.
            while self.frames.len() >= entry {
                if let Some(frame) = self.frames.pop() {
                    self.stack.truncate(frame.stack_base);
                }
            }
            stream.seek(return_ip);
            return Ok(Value::Nil);
        }

        // The matching terminator left the body's value on top.
        self.pop(stream.ip())
    }

    // Execution

    fn step(&mut self, stream: &mut InstructionStream) -> Result<(), VmError> {
        self.check_limits()?;

        let at = stream.ip();
        let Some(op) = stream.current().cloned() else {
            return Ok(());
        };
        stream.advance();

        match op {
            Op::Push(lit) => self.push(literal_value(lit)),

            Op::PushConst(id) => {
                let s = self.ctx.symbol(id)?.to_string();
                self.push(Value::String(s));
            }

            Op::PushSelf => {
                let receiver = self.current_frame()?.receiver.clone();
                self.push(receiver);
            }

            Op::Pop => {
                self.pop(at)?;
            }

            Op::Send { selector, argc } => self.execute_send(stream, at, selector, argc)?,

            Op::Jump(target) => self.jump(stream, at, target)?,

            Op::JumpIfFalse(target) => {
                let condition = self.pop(at)?;
                if !condition.is_truthy() {
                    self.jump(stream, at, target)?;
                }
            }

            Op::BlockBegin { label, params } => {
                let frame = self.current_frame()?;
                let block = BlockValue {
                    body_ip: at + 1,
                    end_label: label,
                    params,
                    scope: Rc::clone(&frame.scope),
                    receiver: frame.receiver.clone(),
                    home: frame.block.clone(),
                };
                stream.skip_block(label)?;
                self.push(Value::Block(Rc::new(block)));
            }

            Op::BlockEnd { label } => self.return_from_block(stream, at, label)?,

            Op::FetchLocal(id) => {
                let frame = self.current_frame()?;
                match Scope::lookup(&frame.scope, id) {
                    Some(value) => self.push(value),
                    None => {
                        return Err(InvariantError::UnboundLocal {
                            name: self.symbol_or_raw(id),
                            at,
                        }
                        .into());
                    }
                }
            }

            Op::StoreLocal(id) => {
                let value = self.pop(at)?;
                let frame = self.current_frame()?;
                Scope::store(&frame.scope, id, value);
            }

            Op::MakeArray(n) => {
                let n = n as usize;
                if self.stack.len() < n {
                    return Err(InvariantError::StackUnderflow {
                        at,
                        needed: n,
                        depth: self.stack.len(),
                    }
                    .into());
                }
                let items = self.stack.split_off(self.stack.len() - n);
                self.push(Value::Array(items));
            }

            Op::Halt => self.halted = true,
        }
        Ok(())
    }

    fn execute_send(
        &mut self,
        stream: &mut InstructionStream,
        at: usize,
        selector: SymbolId,
        argc: u8,
    ) -> Result<(), VmError> {
        let mut args = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            args.push(self.pop(at)?);
        }
        args.reverse();
        let receiver = self.pop(at)?;

        let name = self.ctx.symbol(selector)?.to_string();
        trace!(selector = %name, argc, receiver = receiver.type_name(), "send");

        let Some(method) = self.registry.resolve(&receiver, selector) else {
            debug!(selector = %name, receiver = receiver.type_name(), "unresolved send");
            return Err(VmError::dispatch(
                receiver.type_name(),
                name,
                DispatchReason::Unresolved,
            ));
        };
        let result = method(self, stream, receiver, args)?;
        self.push(result);
        Ok(())
    }

    /// `BlockEnd` while a block activation is on top: deliver its value and
    /// resume the caller.
    fn return_from_block(
        &mut self,
        stream: &mut InstructionStream,
        at: usize,
        label: u32,
    ) -> Result<(), VmError> {
        if self.frames.len() <= 1 {
            return Err(InvariantError::StrayBlockEnd { label, at }.into());
        }
        let matches = self
            .frames
            .last()
            .and_then(|frame| frame.block.as_ref())
            .is_some_and(|block| block.end_label == label);
        if !matches {
            return Err(InvariantError::StrayBlockEnd { label, at }.into());
        }

        let frame = self.frames.pop().ok_or(InvariantError::FrameUnderflow)?;
        let result = if self.stack.len() > frame.stack_base {
            self.pop(at)?
        } else {
            Value::Nil
        };
        self.stack.truncate(frame.stack_base);
        self.stack.push(result);
        stream.seek(frame.return_ip);
        Ok(())
    }

    /// Pop frames down to just below `entry`, recording each into a
    /// dispatch error's trace, and restore the caller's cursor.
    fn unwind(
        &mut self,
        mut err: VmError,
        entry: usize,
        return_ip: usize,
        stream: &mut InstructionStream,
    ) -> VmError {
        debug!(
            frames = self.frames.len().saturating_sub(entry - 1),
            fatal = err.is_fatal(),
            "unwinding"
        );
        while self.frames.len() >= entry {
            let Some(frame) = self.frames.pop() else { break };
            if let VmError::Dispatch(dispatch) = &mut err {
                dispatch.trace.push(frame.describe());
            }
            self.stack.truncate(frame.stack_base);
        }
        stream.seek(return_ip);
        err
    }

    fn jump(
        &mut self,
        stream: &mut InstructionStream,
        at: usize,
        target: u32,
    ) -> Result<(), VmError> {
        let t = target as usize;
        if t > stream.len() {
            return Err(InvariantError::JumpOutOfRange {
                target,
                at,
                len: stream.len(),
            }
            .into());
        }
        stream.seek(t);
        Ok(())
    }

    fn check_limits(&mut self) -> Result<(), VmError> {
        self.steps += 1;
        if let Some(max) = self.config.max_steps {
            if self.steps > max {
                return Err(InvariantError::StepLimitExceeded { limit: max }.into());
            }
        }
        if self.stack.len() > self.config.max_stack_size {
            return Err(InvariantError::StackLimitExceeded {
                limit: self.config.max_stack_size,
            }
            .into());
        }
        Ok(())
    }

    fn current_frame(&self) -> Result<&CallFrame, VmError> {
        self.frames
            .last()
            .ok_or_else(|| InvariantError::FrameUnderflow.into())
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self, at: usize) -> Result<Value, VmError> {
        self.stack.pop().ok_or_else(|| {
            InvariantError::StackUnderflow {
                at,
                needed: 1,
                depth: 0,
            }
            .into()
        })
    }

    fn symbol_or_raw(&self, id: SymbolId) -> String {
        self.ctx
            .symbol(id)
            .map(str::to_string)
            .unwrap_or_else(|_| id.to_string())
    }
}

fn literal_value(lit: Literal) -> Value {
    match lit {
        Literal::Integer(n) => Value::Integer(n),
        Literal::Float(n) => Value::Float(n),
        Literal::Bool(b) => Value::Bool(b),
        Literal::Nil => Value::Nil,
    }
}
