//! Shared compilation state threaded through both stream consumers.

use crate::bytecode::error::StructuralError;
use crate::bytecode::rodata::{ConstantPool, SymbolId};

/// The symbol/constant table for one compilation unit.
///
/// The front end populates this while emitting instructions; the VM and
/// the lowering engine both borrow it to resolve selectors, local names,
/// and string constants. It is always passed explicitly, never held in
/// process-wide state, so independent compilations cannot observe each
/// other.
#[derive(Debug, Clone, Default)]
pub struct CompilationContext {
    constants: ConstantPool,
}

impl CompilationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a context around a pool decoded from a container.
    pub fn from_pool(constants: ConstantPool) -> Self {
        Self { constants }
    }

    pub fn constants(&self) -> &ConstantPool {
        &self.constants
    }

    /// Intern a name, returning its stable id. Idempotent for equal input.
    pub fn intern(&mut self, name: &str) -> SymbolId {
        self.constants.add_str(name)
    }

    /// Resolve an id back to its name. An id that does not point at a pool
    /// entry means the stream and pool are out of sync, which is a
    /// structural fault of the artifact.
    pub fn symbol(&self, id: SymbolId) -> Result<&str, StructuralError> {
        self.constants.get_str(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_then_resolve() {
        let mut ctx = CompilationContext::new();
        let id = ctx.intern("whileTrue:");
        assert_eq!(ctx.intern("whileTrue:"), id);
        assert_eq!(ctx.symbol(id).unwrap(), "whileTrue:");
    }
}
