//! Structural errors: a malformed instruction stream or container.
//!
//! Every variant here means the artifact itself is corrupt or incompatible.
//! None of them are retryable and none of them are surfaced to the running
//! program; callers abort the load or the walk that produced them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StructuralError {
    /// A block opener ran off the end of the stream without finding its
    /// terminator.
    #[error("unterminated block: label {label} has no terminator before end of stream")]
    UnterminatedBlock { label: u32 },

    /// A block terminator was found, but it carries the wrong label.
    #[error("block label mismatch at instruction {at}: opener has label {expected}, terminator has {found}")]
    LabelMismatch {
        at: usize,
        expected: u32,
        found: u32,
    },

    /// The container does not start with the expected magic tag.
    #[error("bad magic {found:?}: not a bytecode container")]
    BadMagic { found: [u8; 4] },

    /// The container's version tuple does not match the compiled-in version.
    #[error("unsupported container version {major}.{minor}")]
    VersionMismatch { major: u8, minor: u8 },

    /// The section table declares an id this implementation does not know.
    /// The format has no skip mechanism, so this is always fatal.
    #[error("unknown section id {id:#04x} in section table")]
    UnknownSection { id: u8 },

    /// The same section id appears twice in the section table.
    #[error("duplicate section id {id:#04x} in section table")]
    DuplicateSection { id: u8 },

    /// A recorded section offset points outside the container.
    #[error("section {id:#04x} offset {offset} out of range ({len} byte container)")]
    OffsetOutOfRange { id: u8, offset: u32, len: usize },

    /// The container ends before a structure could be fully read.
    #[error("truncated container: {context} at offset {offset}")]
    Truncated {
        offset: usize,
        context: &'static str,
    },

    /// The section table has no CODE entry.
    #[error("missing mandatory CODE section")]
    MissingCode,

    /// A constant pool entry's length prefix overruns the pool.
    #[error("constant pool entry at offset {offset} overruns the pool")]
    PoolOverrun { offset: u32 },

    /// A symbol id does not point at a valid constant pool entry.
    #[error("invalid constant reference: offset {offset} is not a pool entry")]
    BadConstant { offset: u32 },

    /// A pool entry was referenced as a symbol but is not valid UTF-8.
    #[error("constant at offset {offset} is not valid UTF-8")]
    NonUtf8Constant { offset: u32 },

    /// The CODE section bytes do not decode to an instruction stream.
    #[error("CODE section does not decode: {0}")]
    CodeDecode(#[from] postcard::Error),
}
