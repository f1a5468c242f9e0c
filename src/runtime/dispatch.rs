//! Dynamic dispatch: method tables keyed by receiver type and selector.
//!
//! The runtime object model proper lives outside this crate; what the VM
//! needs from it is the ability to resolve `(receiver, selector)` to a
//! callable, and a builtin table rich enough to execute real streams.
//! Natives receive the VM and the active stream so they can re-enter the
//! interpreter, which is how a native like `times:` runs a block argument.

use std::collections::HashMap;

use crate::bytecode::rodata::SymbolId;
use crate::bytecode::stream::InstructionStream;
use crate::context::CompilationContext;
use crate::lang::value::Value;
use crate::runtime::error::{DispatchReason, VmError};
use crate::runtime::vm::Vm;

pub type NativeFn =
    fn(&mut Vm<'_>, &mut InstructionStream, Value, Vec<Value>) -> Result<Value, VmError>;

/// Concrete runtime types, used as the method-table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKey {
    Integer,
    Float,
    String,
    Bool,
    Nil,
    Array,
    Block,
}

impl TypeKey {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Integer(_) => TypeKey::Integer,
            Value::Float(_) => TypeKey::Float,
            Value::String(_) => TypeKey::String,
            Value::Bool(_) => TypeKey::Bool,
            Value::Nil => TypeKey::Nil,
            Value::Array(_) => TypeKey::Array,
            Value::Block(_) => TypeKey::Block,
        }
    }
}

/// Method tables for every runtime type, plus a table of selectors every
/// receiver understands.
#[derive(Debug, Default)]
pub struct MethodRegistry {
    typed: HashMap<(TypeKey, SymbolId), NativeFn>,
    universal: HashMap<SymbolId, NativeFn>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The builtin tables: arithmetic and comparison on numbers, the basic
    /// string/array/block protocol, and `Integer >> times:` as the
    /// re-entrant iteration primitive. Selectors are interned into `ctx` so
    /// streams compiled against the same context resolve them by id.
    pub fn with_builtins(ctx: &mut CompilationContext) -> Self {
        let mut registry = Self::new();

        for key in [TypeKey::Integer, TypeKey::Float] {
            registry.register(key, ctx.intern("+"), num_add);
            registry.register(key, ctx.intern("-"), num_sub);
            registry.register(key, ctx.intern("*"), num_mul);
            registry.register(key, ctx.intern("/"), num_div);
            registry.register(key, ctx.intern("<"), num_lt);
            registry.register(key, ctx.intern(">"), num_gt);
            registry.register(key, ctx.intern("<="), num_le);
            registry.register(key, ctx.intern(">="), num_ge);
        }
        registry.register(TypeKey::Integer, ctx.intern("times:"), int_times);

        registry.register(TypeKey::String, ctx.intern("++"), string_concat);
        registry.register(TypeKey::String, ctx.intern("size"), string_size);

        registry.register(TypeKey::Array, ctx.intern("size"), array_size);
        registry.register(TypeKey::Array, ctx.intern("at:"), array_at);
        registry.register(TypeKey::Array, ctx.intern("push:"), array_push);

        registry.register(TypeKey::Bool, ctx.intern("not"), bool_not);

        for selector in ["call", "call:", "call:with:", "[]"] {
            registry.register(TypeKey::Block, ctx.intern(selector), block_call);
        }

        registry.register_universal(ctx.intern("=="), value_eq);
        registry.register_universal(ctx.intern("~="), value_ne);
        registry.register_universal(ctx.intern("print"), value_print);

        registry
    }

    pub fn register(&mut self, key: TypeKey, selector: SymbolId, method: NativeFn) {
        self.typed.insert((key, selector), method);
    }

    /// Register a selector understood by every receiver type.
    pub fn register_universal(&mut self, selector: SymbolId, method: NativeFn) {
        self.universal.insert(selector, method);
    }

    /// Resolve a send. Type-specific methods shadow universal ones.
    pub fn resolve(&self, receiver: &Value, selector: SymbolId) -> Option<NativeFn> {
        self.typed
            .get(&(TypeKey::of(receiver), selector))
            .or_else(|| self.universal.get(&selector))
            .copied()
    }
}

// =============================================================================
// Builtin natives
// =============================================================================

fn unary_err(receiver: &Value, selector: &'static str, msg: impl Into<String>) -> VmError {
    VmError::dispatch(receiver.type_name(), selector, DispatchReason::Failed(msg.into()))
}

fn one_arg(
    receiver: &Value,
    selector: &'static str,
    mut args: Vec<Value>,
) -> Result<Value, VmError> {
    if args.len() != 1 {
        return Err(VmError::dispatch(
            receiver.type_name(),
            selector,
            DispatchReason::WrongArity {
                expected: 1,
                got: args.len(),
            },
        ));
    }
    Ok(args.remove(0))
}

macro_rules! num_binop {
    ($name:ident, $selector:literal, $int:expr, $float:expr) => {
        fn $name(
            _vm: &mut Vm<'_>,
            _stream: &mut InstructionStream,
            receiver: Value,
            args: Vec<Value>,
        ) -> Result<Value, VmError> {
            let arg = one_arg(&receiver, $selector, args)?;
            match (&receiver, &arg) {
                (Value::Integer(a), Value::Integer(b)) => $int(*a, *b),
                (Value::Float(a), Value::Float(b)) => $float(*a, *b),
                (Value::Integer(a), Value::Float(b)) => $float(*a as f64, *b),
                (Value::Float(a), Value::Integer(b)) => $float(*a, *b as f64),
                _ => Err(unary_err(
                    &receiver,
                    $selector,
                    format!("not a number: {}", arg.type_name()),
                )),
            }
        }
    };
}

num_binop!(num_add, "+", |a: i64, b: i64| Ok(Value::Integer(a + b)), |a, b| Ok(Value::Float(a + b)));
num_binop!(num_sub, "-", |a: i64, b: i64| Ok(Value::Integer(a - b)), |a, b| Ok(Value::Float(a - b)));
num_binop!(num_mul, "*", |a: i64, b: i64| Ok(Value::Integer(a * b)), |a, b| Ok(Value::Float(a * b)));
num_binop!(
    num_div,
    "/",
    |a: i64, b: i64| {
        if b == 0 {
            Err(VmError::dispatch(
                "Integer",
                "/",
                DispatchReason::Failed("division by zero".to_string()),
            ))
        } else {
            Ok(Value::Integer(a / b))
        }
    },
    |a: f64, b: f64| Ok(Value::Float(a / b))
);
num_binop!(num_lt, "<", |a: i64, b: i64| Ok(Value::Bool(a < b)), |a: f64, b: f64| Ok(Value::Bool(a < b)));
num_binop!(num_gt, ">", |a: i64, b: i64| Ok(Value::Bool(a > b)), |a: f64, b: f64| Ok(Value::Bool(a > b)));
num_binop!(num_le, "<=", |a: i64, b: i64| Ok(Value::Bool(a <= b)), |a: f64, b: f64| Ok(Value::Bool(a <= b)));
num_binop!(num_ge, ">=", |a: i64, b: i64| Ok(Value::Bool(a >= b)), |a: f64, b: f64| Ok(Value::Bool(a >= b)));

/// `n times: aBlock` runs the block n times by re-entering the VM loop.
fn int_times(
    vm: &mut Vm<'_>,
    stream: &mut InstructionStream,
    receiver: Value,
    args: Vec<Value>,
) -> Result<Value, VmError> {
    let arg = one_arg(&receiver, "times:", args)?;
    let n = match receiver {
        Value::Integer(n) => n,
        other => return Err(unary_err(&other, "times:", "receiver must be an Integer")),
    };
    let block = match arg {
        Value::Block(block) => block,
        other => {
            return Err(unary_err(
                &Value::Integer(n),
                "times:",
                format!("argument must be a Block, got {}", other.type_name()),
            ));
        }
    };
    for _ in 0..n.max(0) {
        vm.invoke_block(stream, block.clone(), Vec::new())?;
    }
    Ok(Value::Integer(n))
}

fn string_concat(
    _vm: &mut Vm<'_>,
    _stream: &mut InstructionStream,
    receiver: Value,
    args: Vec<Value>,
) -> Result<Value, VmError> {
    let arg = one_arg(&receiver, "++", args)?;
    match (&receiver, &arg) {
        (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
        _ => Err(unary_err(
            &receiver,
            "++",
            format!("cannot concatenate {}", arg.type_name()),
        )),
    }
}

fn string_size(
    _vm: &mut Vm<'_>,
    _stream: &mut InstructionStream,
    receiver: Value,
    _args: Vec<Value>,
) -> Result<Value, VmError> {
    match &receiver {
        Value::String(s) => Ok(Value::Integer(s.chars().count() as i64)),
        _ => Err(unary_err(&receiver, "size", "receiver must be a String")),
    }
}

fn array_size(
    _vm: &mut Vm<'_>,
    _stream: &mut InstructionStream,
    receiver: Value,
    _args: Vec<Value>,
) -> Result<Value, VmError> {
    match &receiver {
        Value::Array(items) => Ok(Value::Integer(items.len() as i64)),
        _ => Err(unary_err(&receiver, "size", "receiver must be an Array")),
    }
}

fn array_at(
    _vm: &mut Vm<'_>,
    _stream: &mut InstructionStream,
    receiver: Value,
    args: Vec<Value>,
) -> Result<Value, VmError> {
    let arg = one_arg(&receiver, "at:", args)?;
    let (Value::Array(items), Value::Integer(i)) = (&receiver, &arg) else {
        return Err(unary_err(&receiver, "at:", "expected Array and Integer index"));
    };
    usize::try_from(*i)
        .ok()
        .and_then(|i| items.get(i).cloned())
        .ok_or_else(|| {
            unary_err(
                &receiver,
                "at:",
                format!("index {} out of bounds (size {})", i, items.len()),
            )
        })
}

fn array_push(
    _vm: &mut Vm<'_>,
    _stream: &mut InstructionStream,
    receiver: Value,
    args: Vec<Value>,
) -> Result<Value, VmError> {
    let arg = one_arg(&receiver, "push:", args)?;
    match receiver {
        Value::Array(mut items) => {
            items.push(arg);
            Ok(Value::Array(items))
        }
        other => Err(unary_err(&other, "push:", "receiver must be an Array")),
    }
}

fn bool_not(
    _vm: &mut Vm<'_>,
    _stream: &mut InstructionStream,
    receiver: Value,
    _args: Vec<Value>,
) -> Result<Value, VmError> {
    match receiver {
        Value::Bool(b) => Ok(Value::Bool(!b)),
        other => Err(unary_err(&other, "not", "receiver must be a Bool")),
    }
}

/// `aBlock call`, `aBlock call: x`, `aBlock call: x with: y`.
fn block_call(
    vm: &mut Vm<'_>,
    stream: &mut InstructionStream,
    receiver: Value,
    args: Vec<Value>,
) -> Result<Value, VmError> {
    match receiver {
        Value::Block(block) => vm.invoke_block(stream, block, args),
        other => Err(unary_err(&other, "call", "receiver must be a Block")),
    }
}

fn value_eq(
    _vm: &mut Vm<'_>,
    _stream: &mut InstructionStream,
    receiver: Value,
    args: Vec<Value>,
) -> Result<Value, VmError> {
    let arg = one_arg(&receiver, "==", args)?;
    Ok(Value::Bool(receiver == arg))
}

fn value_ne(
    _vm: &mut Vm<'_>,
    _stream: &mut InstructionStream,
    receiver: Value,
    args: Vec<Value>,
) -> Result<Value, VmError> {
    let arg = one_arg(&receiver, "~=", args)?;
    Ok(Value::Bool(receiver != arg))
}

fn value_print(
    _vm: &mut Vm<'_>,
    _stream: &mut InstructionStream,
    receiver: Value,
    _args: Vec<Value>,
) -> Result<Value, VmError> {
    println!("{}", receiver);
    Ok(receiver)
}
