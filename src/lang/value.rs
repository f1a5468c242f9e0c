use std::rc::Rc;

use crate::bytecode::rodata::SymbolId;
use crate::runtime::scope::ScopeRef;

/// Runtime value held on the VM's data stack.
#[derive(Debug, Clone)]
pub enum Value {
    /// 64-bit signed integer.
    Integer(i64),

    /// 64-bit floating-point number.
    Float(f64),

    /// UTF-8 string value.
    String(String),

    /// Boolean value.
    Bool(bool),

    /// Absent value; also the result of an empty block body.
    Nil,

    /// Ordered collection of values.
    Array(Vec<Value>),

    /// A closure. Shared, since a block may outlive the frame that
    /// created it and be invoked from arbitrary call depth.
    Block(Rc<BlockValue>),
}

/// A closure: everything captured at `BlockBegin`.
///
/// `body_ip` points at the first instruction of the body in the stream the
/// block was created from; `end_label` identifies the matching terminator.
/// The captured scope, receiver, and enclosing block let the body resolve
/// outer variables, `self`, and yield-style re-entry after the creating
/// frame has returned.
#[derive(Debug)]
pub struct BlockValue {
    pub body_ip: usize,
    pub end_label: u32,
    pub params: Vec<SymbolId>,
    pub scope: ScopeRef,
    pub receiver: Value,
    pub home: Option<Rc<BlockValue>>,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Bool(_) => "Bool",
            Value::Nil => "Nil",
            Value::Array(_) => "Array",
            Value::Block(_) => "Block",
        }
    }

    /// Everything is truthy except `false` and `nil`.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Bool(false) | Value::Nil)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
                *a as f64 == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Nil, Value::Nil) => true,
            (Value::Array(a), Value::Array(b)) => a == b,
            // Blocks compare by identity.
            (Value::Block(a), Value::Block(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Nil => write!(f, "nil"),
            Value::Array(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Value::Block(b) => write!(f, "[block L{}]", b.end_label),
        }
    }
}
