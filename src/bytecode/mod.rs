pub mod container;
pub mod disasm;
pub mod error;
pub mod op;
pub mod rodata;
pub mod stream;

pub use error::StructuralError;
pub use op::{Literal, Op};
pub use rodata::{ConstantPool, SymbolId};
pub use stream::InstructionStream;
