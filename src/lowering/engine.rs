//! One-pass lowering from an instruction stream to target-language source
//! text.
//!
//! The walk has the same shape as VM execution, but the operand stack holds
//! expression fragments instead of runtime values and the scope chain maps
//! names to generated identifiers instead of bindings. Every instruction
//! with an effect emits its statement at the point it is generated, so a
//! fragment whose value is never consumed can be dropped without losing
//! the effect or reordering evaluation.
//!
//! Block bodies are lowered by a nested engine sharing the enclosing scope
//! chain (captured variables stay visible) and the per-compilation
//! temporary counter; the nested output becomes the body of a lambda
//! emitted into the enclosing statement buffer. Raw jumps become `goto`
//! statements against labels planted at their target indices, which the
//! engine pre-collects from the stream the way the disassembler does.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;

use crate::bytecode::error::StructuralError;
use crate::bytecode::op::{Literal, Op};
use crate::bytecode::rodata::SymbolId;
use crate::bytecode::stream::InstructionStream;
use crate::context::CompilationContext;

#[derive(Debug, Error)]
pub enum LowerError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error("unbound local '{name}' at instruction {at}")]
    UnboundLocal { name: String, at: usize },

    #[error("symbolic operand stack underflow at instruction {at}")]
    OperandUnderflow { at: usize },
}

/// Compile-time mirror of the runtime scope chain: names map to generated
/// identifiers.
#[derive(Debug, Default)]
struct LowerScope {
    vars: HashMap<SymbolId, String>,
    parent: Option<Rc<RefCell<LowerScope>>>,
}

type LowerScopeRef = Rc<RefCell<LowerScope>>;

impl LowerScope {
    fn root() -> LowerScopeRef {
        Rc::new(RefCell::new(LowerScope::default()))
    }

    fn child_of(parent: &LowerScopeRef) -> LowerScopeRef {
        Rc::new(RefCell::new(LowerScope {
            vars: HashMap::new(),
            parent: Some(Rc::clone(parent)),
        }))
    }

    fn lookup(scope: &LowerScopeRef, name: SymbolId) -> Option<String> {
        let mut current = Rc::clone(scope);
        loop {
            let next = {
                let s = current.borrow();
                if let Some(ident) = s.vars.get(&name) {
                    return Some(ident.clone());
                }
                s.parent.clone()
            };
            current = next?;
        }
    }

    fn define(scope: &LowerScopeRef, name: SymbolId, ident: String) {
        scope.borrow_mut().vars.insert(name, ident);
    }
}

pub struct LoweringEngine<'c> {
    ctx: &'c CompilationContext,
    stmts: Vec<String>,
    operands: Vec<String>,
    scope: LowerScopeRef,
    tmp: Rc<Cell<u32>>,
}

impl<'c> LoweringEngine<'c> {
    pub fn new(ctx: &'c CompilationContext) -> Self {
        Self {
            ctx,
            stmts: Vec::new(),
            operands: Vec::new(),
            scope: LowerScope::root(),
            tmp: Rc::new(Cell::new(0)),
        }
    }

    /// A nested engine for a block body: same temporary counter, child
    /// scope whose lookups fall through to this engine's chain.
    fn nested_for_block(&self) -> Self {
        Self {
            ctx: self.ctx,
            stmts: Vec::new(),
            operands: Vec::new(),
            scope: LowerScope::child_of(&self.scope),
            tmp: Rc::clone(&self.tmp),
        }
    }

    /// Walk the stream once and return the generated statements.
    ///
    /// With a `result_prefix` (`"return"`, an assignment target), the final
    /// operand is folded into one closing statement; without one the
    /// statement list is emitted verbatim. The walk stops at the stream end
    /// or at the terminator of the body being lowered.
    pub fn lower(
        &mut self,
        stream: &mut InstructionStream,
        result_prefix: Option<&str>,
    ) -> Result<String, LowerError> {
        let targets = collect_jump_targets(stream.ops());

        while !stream.at_end() {
            let at = stream.absolute_index(stream.ip());
            if targets.contains(&at) {
                self.stmts.push(format!("L{}:;", at));
            }
            let Some(op) = stream.current().cloned() else {
                break;
            };
            stream.advance();

            match op {
                Op::BlockEnd { .. } => break,

                Op::Push(lit) => self.operands.push(literal_text(lit)),

                Op::PushConst(id) => {
                    let s = self.ctx.symbol(id)?;
                    self.operands.push(format!("rt_str(\"{}\")", escape(s)));
                }

                Op::PushSelf => self.operands.push("self".to_string()),

                Op::Pop => {
                    // The fragment's effect, if any, is already in the
                    // statement buffer.
                    self.pop_operand(at)?;
                }

                Op::Send { selector, argc } => {
                    let name = self.ctx.symbol(selector)?.to_string();
                    let mut args = Vec::with_capacity(argc as usize);
                    for _ in 0..argc {
                        args.push(self.pop_operand(at)?);
                    }
                    args.reverse();
                    let receiver = self.pop_operand(at)?;
                    let tmp = self.fresh("t");
                    let mut call = format!("rt_send({}, \"{}\"", receiver, escape(&name));
                    for arg in &args {
                        call.push_str(", ");
                        call.push_str(arg);
                    }
                    call.push(')');
                    self.stmts.push(format!("auto {} = {};", tmp, call));
                    self.operands.push(tmp);
                }

                Op::Jump(target) => self.stmts.push(format!("goto L{};", target)),

                Op::JumpIfFalse(target) => {
                    let condition = self.pop_operand(at)?;
                    self.stmts
                        .push(format!("if (!({})) goto L{};", condition, target));
                }

                Op::BlockBegin { label, params } => {
                    let mut body = stream.extract_block(label)?;
                    let mut nested = self.nested_for_block();
                    let mut sig = Vec::with_capacity(params.len());
                    for param in params {
                        let ident = nested.fresh("p");
                        LowerScope::define(&nested.scope, param, ident.clone());
                        sig.push(format!("auto {}", ident));
                    }
                    let body_src = nested.lower(&mut body, Some("return"))?;
                    let tmp = self.fresh("t");
                    self.stmts.push(format!(
                        "auto {} = [&]({}) {{\n{}\n}};",
                        tmp,
                        sig.join(", "),
                        body_src
                    ));
                    self.operands.push(tmp);
                }

                Op::FetchLocal(id) => match LowerScope::lookup(&self.scope, id) {
                    Some(ident) => self.operands.push(ident),
                    None => {
                        return Err(LowerError::UnboundLocal {
                            name: self.ctx.symbol(id)?.to_string(),
                            at,
                        });
                    }
                },

                Op::StoreLocal(id) => {
                    let fragment = self.pop_operand(at)?;
                    match LowerScope::lookup(&self.scope, id) {
                        Some(ident) => self.stmts.push(format!("{} = {};", ident, fragment)),
                        None => {
                            let ident = self.fresh("v");
                            self.stmts.push(format!("auto {} = {};", ident, fragment));
                            LowerScope::define(&self.scope, id, ident);
                        }
                    }
                }

                Op::MakeArray(n) => {
                    let n = n as usize;
                    let mut items = Vec::with_capacity(n);
                    for _ in 0..n {
                        items.push(self.pop_operand(at)?);
                    }
                    items.reverse();
                    let tmp = self.fresh("t");
                    self.stmts
                        .push(format!("auto {} = rt_array({});", tmp, items.join(", ")));
                    self.operands.push(tmp);
                }

                Op::Halt => self.stmts.push("rt_halt();".to_string()),
            }
        }

        // A jump may target the end sentinel; its label still has to exist.
        // Labels at walked indices, the terminator's included, were planted
        // during the walk.
        if stream.at_end() {
            let stop = stream.absolute_index(stream.ip());
            if targets.contains(&stop) {
                self.stmts.push(format!("L{}:;", stop));
            }
        }

        if let Some(prefix) = result_prefix {
            let result = self
                .operands
                .pop()
                .unwrap_or_else(|| "rt_nil".to_string());
            self.stmts.push(format!("{} {};", prefix, result));
        }
        // Remaining fragments are pure references; their effects are
        // already sequenced in the buffer.
        self.operands.clear();

        Ok(std::mem::take(&mut self.stmts).join("\n"))
    }

    fn fresh(&mut self, prefix: &str) -> String {
        let n = self.tmp.get();
        self.tmp.set(n + 1);
        format!("{}{}", prefix, n)
    }

    fn pop_operand(&mut self, at: usize) -> Result<String, LowerError> {
        self.operands
            .pop()
            .ok_or(LowerError::OperandUnderflow { at })
    }
}

fn collect_jump_targets(ops: &[Op]) -> Vec<usize> {
    let mut targets = Vec::new();
    for op in ops {
        let target = match op {
            Op::Jump(t) | Op::JumpIfFalse(t) => *t as usize,
            _ => continue,
        };
        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    targets
}

fn literal_text(lit: Literal) -> String {
    match lit {
        Literal::Integer(n) => format!("{}", n),
        Literal::Float(n) => format!("{:?}", n),
        Literal::Bool(b) => format!("{}", b),
        Literal::Nil => "rt_nil".to_string(),
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
