//! Bytecode core of a message-passing language: the instruction model and
//! stream every later stage consumes, a binary container for persisting
//! compiled streams, a re-entrant virtual machine, and a one-pass lowering
//! engine that turns the same streams into target-language source text.
//!
//! A front end hands over a finished instruction stream and a populated
//! [`CompilationContext`]; from there the stream either runs directly in a
//! [`Vm`] or is lowered once by a [`LoweringEngine`] for ahead-of-time
//! compilation. Both consumers read identical artifacts, in memory or
//! decoded from a [`bytecode::container`] file.

pub mod bytecode;
pub mod context;
pub mod lang;
pub mod lowering;
pub mod runtime;

pub use bytecode::{ConstantPool, InstructionStream, Literal, Op, StructuralError, SymbolId};
pub use context::CompilationContext;
pub use lang::Value;
pub use lowering::{LowerError, LoweringEngine, reindent};
pub use runtime::{MethodRegistry, Vm, VmConfig, VmError};

#[cfg(test)]
mod tests {
    use super::*;

    /// The `a = 1 + 2; a` stream from both consumers' point of view.
    fn fixture() -> (CompilationContext, Vec<Op>, SymbolId) {
        let mut ctx = CompilationContext::new();
        let _ = MethodRegistry::with_builtins(&mut ctx);
        let plus = ctx.intern("+");
        let a = ctx.intern("a");
        let ops = vec![
            Op::Push(Literal::Integer(1)),
            Op::Push(Literal::Integer(2)),
            Op::Send {
                selector: plus,
                argc: 1,
            },
            Op::StoreLocal(a),
            Op::FetchLocal(a),
        ];
        (ctx, ops, a)
    }

    #[test]
    fn vm_and_lowering_agree_on_the_same_stream() {
        let (mut ctx, ops, a) = fixture();

        let mut engine = LoweringEngine::new(&ctx);
        let mut stream = InstructionStream::new(ops.clone());
        let text = engine.lower(&mut stream, Some("return")).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.ends_with("return v1;"));

        let registry = MethodRegistry::with_builtins(&mut ctx);
        let mut vm = Vm::new(&ctx, registry);
        let mut stream = InstructionStream::new(ops);
        vm.run(&mut stream).unwrap();
        assert_eq!(vm.local(a), Some(Value::Integer(3)));
    }

    #[test]
    fn container_round_trip_feeds_the_vm() {
        let (ctx, ops, a) = fixture();

        let bytes = bytecode::container::write(ctx.constants(), &ops).unwrap();
        let (pool, mut stream) = bytecode::container::read(&bytes).unwrap();
        assert_eq!(pool.as_bytes(), ctx.constants().as_bytes());
        assert_eq!(stream.ops(), &ops[..]);

        let mut ctx2 = CompilationContext::from_pool(pool);
        let registry = MethodRegistry::with_builtins(&mut ctx2);
        let mut vm = Vm::new(&ctx2, registry);
        vm.run(&mut stream).unwrap();
        assert_eq!(vm.local(a), Some(Value::Integer(3)));
    }

    #[test]
    fn lowered_blocks_reindent_cleanly() {
        let mut ctx = CompilationContext::new();
        let plus = ctx.intern("+");
        let x = ctx.intern("x");
        let f = ctx.intern("f");
        let ops = vec![
            Op::BlockBegin {
                label: 1,
                params: vec![x],
            },
            Op::FetchLocal(x),
            Op::Push(Literal::Integer(1)),
            Op::Send {
                selector: plus,
                argc: 1,
            },
            Op::BlockEnd { label: 1 },
            Op::StoreLocal(f),
        ];
        let mut engine = LoweringEngine::new(&ctx);
        let mut stream = InstructionStream::new(ops);
        let flat = engine.lower(&mut stream, None).unwrap();
        let pretty = reindent(&flat);
        assert!(pretty.contains("\n    auto t1 = rt_send(p0, \"+\", 1);"));
        assert!(pretty.contains("\n    return t1;"));
        assert!(pretty.contains("\n};"));
    }
}
