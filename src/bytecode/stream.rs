//! Ordered instruction sequence with a cursor.
//!
//! The cursor (`ip`) is always either a valid index or the one-past-end
//! sentinel; both consumers treat reaching the sentinel as a normal stop.
//! Sub-streams extracted for block bodies remember their position in the
//! parent (`origin`), so jump targets and diagnostics keep their original
//! absolute indices.

use crate::bytecode::error::StructuralError;
use crate::bytecode::op::Op;

#[derive(Debug, Clone)]
pub struct InstructionStream {
    ops: Vec<Op>,
    ip: usize,
    origin: usize,
}

impl InstructionStream {
    pub fn new(ops: Vec<Op>) -> Self {
        Self { ops, ip: 0, origin: 0 }
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Current cursor position (local to this stream).
    pub fn ip(&self) -> usize {
        self.ip
    }

    /// Index of this stream's first instruction within the stream it was
    /// extracted from. Zero for a root stream.
    pub fn origin(&self) -> usize {
        self.origin
    }

    /// Map a local index to the index it had in the root stream.
    pub fn absolute_index(&self, local: usize) -> usize {
        self.origin + local
    }

    pub fn at_end(&self) -> bool {
        self.ip >= self.ops.len()
    }

    /// The instruction under the cursor, or `None` at the sentinel.
    pub fn current(&self) -> Option<&Op> {
        self.ops.get(self.ip)
    }

    pub fn advance(&mut self) {
        if self.ip < self.ops.len() {
            self.ip += 1;
        }
    }

    /// Save the cursor for a later `seek`.
    pub fn mark(&self) -> usize {
        self.ip
    }

    /// Restore or overwrite the cursor. `ip` must be a valid index or the
    /// one-past-end sentinel.
    pub fn seek(&mut self, ip: usize) {
        assert!(ip <= self.ops.len(), "seek past end of stream");
        self.ip = ip;
    }

    /// Extract the well-bracketed sub-block starting at the cursor.
    ///
    /// Consumes instructions up to and including the first `BlockEnd` that
    /// matches the opener's nesting depth, validating its label against
    /// `expected_label`. The cursor is left one past the terminator. The
    /// returned stream includes the terminator and keeps the parent's
    /// absolute indexing through its `origin`.
    pub fn extract_block(
        &mut self,
        expected_label: u32,
    ) -> Result<InstructionStream, StructuralError> {
        let start = self.ip;
        let term = self.find_terminator(start, expected_label)?;
        let body = self.ops[start..=term].to_vec();
        self.ip = term + 1;
        Ok(InstructionStream {
            ops: body,
            ip: 0,
            origin: self.origin + start,
        })
    }

    /// Skip past the sub-block starting at the cursor without copying it,
    /// leaving the cursor one past the matching terminator.
    pub fn skip_block(&mut self, expected_label: u32) -> Result<(), StructuralError> {
        let term = self.find_terminator(self.ip, expected_label)?;
        self.ip = term + 1;
        Ok(())
    }

    /// Find the `BlockEnd` matching nesting depth zero from `from`,
    /// validating its label.
    fn find_terminator(&self, from: usize, expected_label: u32) -> Result<usize, StructuralError> {
        let mut depth = 0usize;
        for (i, op) in self.ops.iter().enumerate().skip(from) {
            match op {
                Op::BlockBegin { .. } => depth += 1,
                Op::BlockEnd { label } => {
                    if depth == 0 {
                        if *label != expected_label {
                            return Err(StructuralError::LabelMismatch {
                                at: self.origin + i,
                                expected: expected_label,
                                found: *label,
                            });
                        }
                        return Ok(i);
                    }
                    depth -= 1;
                }
                _ => {}
            }
        }
        Err(StructuralError::UnterminatedBlock {
            label: expected_label,
        })
    }
}
