use std::fmt::Write as _;

use crate::bytecode::op::{Literal, Op};
use crate::bytecode::rodata::SymbolId;
use crate::context::CompilationContext;

// =============================================================================
// DISASM - Human-readable instruction stream dumps
// =============================================================================

/// Print a disassembly of an instruction sequence.
pub fn print_ops(ctx: &CompilationContext, ops: &[Op]) {
    print!("{}", disassemble_to_string(ctx, ops));
}

/// Disassemble an instruction sequence to a string.
///
/// Jump targets are marked with `►`, block bodies are indented one level
/// per nesting depth, and pool references are resolved against the
/// compilation context (unresolvable ids are shown raw rather than
/// failing the dump).
pub fn disassemble_to_string(ctx: &CompilationContext, ops: &[Op]) -> String {
    let targets = collect_jump_targets(ops);
    let mut out = String::new();
    let mut depth = 0usize;

    for (ip, op) in ops.iter().enumerate() {
        if let Op::BlockEnd { .. } = op {
            depth = depth.saturating_sub(1);
        }

        let marker = if targets.contains(&ip) { "► " } else { "  " };
        let _ = write!(out, "{:04} {}{}", ip, marker, "  ".repeat(depth));
        let _ = writeln!(out, "{}", format_op(ctx, op));

        if let Op::BlockBegin { .. } = op {
            depth += 1;
        }
    }
    out
}

fn collect_jump_targets(ops: &[Op]) -> Vec<usize> {
    let mut targets = Vec::new();
    for op in ops {
        let target = match op {
            Op::Jump(t) => Some(*t as usize),
            Op::JumpIfFalse(t) => Some(*t as usize),
            _ => None,
        };
        if let Some(target) = target {
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
    }
    targets
}

fn format_op(ctx: &CompilationContext, op: &Op) -> String {
    match op {
        Op::Push(lit) => format!("PUSH          {}", format_literal(lit)),
        Op::PushConst(id) => format!("PUSH_CONST    {}", format_symbol(ctx, *id)),
        Op::PushSelf => "PUSH_SELF".to_string(),
        Op::Pop => "POP".to_string(),
        Op::Send { selector, argc } => {
            format!("SEND          {} argc={}", format_symbol(ctx, *selector), argc)
        }
        Op::Jump(t) => format!("JUMP          -> {:04}", t),
        Op::JumpIfFalse(t) => format!("JUMP_IF_FALSE -> {:04}", t),
        Op::BlockBegin { label, params } => {
            let params = params
                .iter()
                .map(|p| format_symbol(ctx, *p))
                .collect::<Vec<_>>()
                .join(" ");
            if params.is_empty() {
                format!("BLOCK_BEGIN   L{}", label)
            } else {
                format!("BLOCK_BEGIN   L{} | {} |", label, params)
            }
        }
        Op::BlockEnd { label } => format!("BLOCK_END     L{}", label),
        Op::FetchLocal(id) => format!("FETCH_LOCAL   {}", format_symbol(ctx, *id)),
        Op::StoreLocal(id) => format!("STORE_LOCAL   {}", format_symbol(ctx, *id)),
        Op::MakeArray(n) => format!("MAKE_ARRAY    {}", n),
        Op::Halt => "HALT".to_string(),
    }
}

fn format_literal(lit: &Literal) -> String {
    match lit {
        Literal::Integer(n) => format!("{}", n),
        Literal::Float(n) => format!("{:?}", n),
        Literal::Bool(b) => format!("{}", b),
        Literal::Nil => "nil".to_string(),
    }
}

fn format_symbol(ctx: &CompilationContext, id: SymbolId) -> String {
    match ctx.symbol(id) {
        Ok(name) => format!("'{}'", name),
        Err(_) => format!("{}", id),
    }
}
