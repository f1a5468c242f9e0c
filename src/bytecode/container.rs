//! Bytecode container: the on-disk form of a constant pool plus an
//! instruction stream.
//!
//! Layout (all offsets absolute, big-endian):
//!
//! ```text
//! offset 0:  4 bytes magic tag b"CNDR"
//! offset 4:  1 byte major version
//! offset 5:  1 byte minor version
//! offset 6:  1 byte section count N
//! N times:   1 byte section id, 4 bytes big-endian offset
//! [RODATA]:  length-prefixed constant pool entries (omitted when empty)
//! [CODE]:    postcard-encoded instruction vector
//! ```
//!
//! An empty pool is represented by omitting the RODATA entry from the
//! table entirely, never by a zero offset. Offsets are computed from the
//! header, table, and RODATA sizes at write time and re-validated by
//! bounds checks at read time.

use tracing::debug;

use crate::bytecode::error::StructuralError;
use crate::bytecode::op::Op;
use crate::bytecode::rodata::ConstantPool;
use crate::bytecode::stream::InstructionStream;

pub const MAGIC: [u8; 4] = *b"CNDR";
pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 0;

pub const SECTION_RODATA: u8 = 0x01;
pub const SECTION_CODE: u8 = 0x02;

const HEADER_LEN: usize = 6;
const SECTION_ENTRY_LEN: usize = 5;

/// Serialize a pool and an instruction sequence into container bytes.
pub fn write(pool: &ConstantPool, ops: &[Op]) -> Result<Vec<u8>, StructuralError> {
    let code = postcard::to_allocvec(&ops.to_vec())?;
    let rodata = pool.as_bytes();

    let section_count: usize = if rodata.is_empty() { 1 } else { 2 };
    let table_len = 1 + section_count * SECTION_ENTRY_LEN;
    let rodata_offset = HEADER_LEN + table_len;
    let code_offset = rodata_offset + rodata.len();

    let mut out = Vec::with_capacity(code_offset + code.len());
    out.extend_from_slice(&MAGIC);
    out.push(VERSION_MAJOR);
    out.push(VERSION_MINOR);

    out.push(section_count as u8);
    if !rodata.is_empty() {
        out.push(SECTION_RODATA);
        out.extend_from_slice(&(rodata_offset as u32).to_be_bytes());
    }
    out.push(SECTION_CODE);
    out.extend_from_slice(&(code_offset as u32).to_be_bytes());

    out.extend_from_slice(rodata);
    out.extend_from_slice(&code);
    Ok(out)
}

/// Load a container, returning its pool and a stream positioned at the
/// first instruction.
///
/// Sections are located through their recorded offsets, not re-derived
/// arithmetic, so a corrupt table fails the bounds checks here instead of
/// silently misaligning a read.
pub fn read(bytes: &[u8]) -> Result<(ConstantPool, InstructionStream), StructuralError> {
    if bytes.len() < HEADER_LEN + 1 {
        return Err(StructuralError::Truncated {
            offset: bytes.len(),
            context: "header",
        });
    }

    let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if magic != MAGIC {
        return Err(StructuralError::BadMagic { found: magic });
    }
    let (major, minor) = (bytes[4], bytes[5]);
    if (major, minor) != (VERSION_MAJOR, VERSION_MINOR) {
        return Err(StructuralError::VersionMismatch { major, minor });
    }

    let section_count = bytes[6] as usize;
    let table_end = HEADER_LEN + 1 + section_count * SECTION_ENTRY_LEN;
    if bytes.len() < table_end {
        return Err(StructuralError::Truncated {
            offset: bytes.len(),
            context: "section table",
        });
    }

    let mut rodata_offset: Option<u32> = None;
    let mut code_offset: Option<u32> = None;
    for i in 0..section_count {
        let at = HEADER_LEN + 1 + i * SECTION_ENTRY_LEN;
        let id = bytes[at];
        let offset = u32::from_be_bytes([bytes[at + 1], bytes[at + 2], bytes[at + 3], bytes[at + 4]]);
        if offset as usize >= bytes.len() {
            return Err(StructuralError::OffsetOutOfRange {
                id,
                offset,
                len: bytes.len(),
            });
        }
        let slot = match id {
            SECTION_RODATA => &mut rodata_offset,
            SECTION_CODE => &mut code_offset,
            _ => return Err(StructuralError::UnknownSection { id }),
        };
        if slot.replace(offset).is_some() {
            return Err(StructuralError::DuplicateSection { id });
        }
    }

    let code_offset = code_offset.ok_or(StructuralError::MissingCode)? as usize;

    let pool = match rodata_offset {
        Some(offset) => {
            let start = offset as usize;
            // RODATA runs up to the next recorded section, or the end of
            // the container when nothing follows it.
            let end = if code_offset > start { code_offset } else { bytes.len() };
            ConstantPool::from_bytes(&bytes[start..end])?
        }
        None => ConstantPool::new(),
    };

    let ops: Vec<Op> = postcard::from_bytes(&bytes[code_offset..])?;
    debug!(
        sections = section_count,
        rodata_bytes = pool.as_bytes().len(),
        instructions = ops.len(),
        "loaded bytecode container"
    );
    Ok((pool, InstructionStream::new(ops)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::Literal;

    fn sample_ops(pool: &mut ConstantPool) -> Vec<Op> {
        let plus = pool.add_str("+");
        let greeting = pool.add_str("hello");
        vec![
            Op::PushConst(greeting),
            Op::Push(Literal::Integer(1)),
            Op::Push(Literal::Integer(2)),
            Op::Send {
                selector: plus,
                argc: 1,
            },
            Op::Halt,
        ]
    }

    #[test]
    fn round_trips_pool_and_ops() {
        let mut pool = ConstantPool::new();
        let ops = sample_ops(&mut pool);
        let bytes = write(&pool, &ops).unwrap();
        let (pool2, stream) = read(&bytes).unwrap();
        assert_eq!(pool2.as_bytes(), pool.as_bytes());
        assert_eq!(stream.ops(), &ops[..]);
        assert_eq!(stream.ip(), 0);
    }

    #[test]
    fn offsets_are_deterministic() {
        let mut pool = ConstantPool::new();
        let ops = sample_ops(&mut pool);
        let bytes = write(&pool, &ops).unwrap();
        // Two sections: RODATA at header+table, CODE right after RODATA.
        assert_eq!(bytes[6], 2);
        assert_eq!(bytes[7], SECTION_RODATA);
        let rodata_offset = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        assert_eq!(rodata_offset as usize, 6 + 1 + 2 * 5);
        assert_eq!(bytes[12], SECTION_CODE);
        let code_offset = u32::from_be_bytes([bytes[13], bytes[14], bytes[15], bytes[16]]);
        assert_eq!(code_offset as usize, rodata_offset as usize + pool.as_bytes().len());
    }

    #[test]
    fn empty_pool_omits_rodata_section() {
        let ops = vec![Op::Push(Literal::Nil), Op::Halt];
        let bytes = write(&ConstantPool::new(), &ops).unwrap();
        assert_eq!(bytes[6], 1);
        assert_eq!(bytes[7], SECTION_CODE);
        let (pool, stream) = read(&bytes).unwrap();
        assert!(pool.is_empty());
        assert_eq!(stream.ops(), &ops[..]);
    }

    #[test]
    fn rejects_bad_magic() {
        let ops = vec![Op::Halt];
        let mut bytes = write(&ConstantPool::new(), &ops).unwrap();
        bytes[..4].copy_from_slice(b"BAD!");
        assert!(matches!(
            read(&bytes),
            Err(StructuralError::BadMagic { found }) if &found == b"BAD!"
        ));
    }

    #[test]
    fn rejects_version_mismatch() {
        let mut bytes = write(&ConstantPool::new(), &[Op::Halt]).unwrap();
        bytes[4] = VERSION_MAJOR + 1;
        assert!(matches!(
            read(&bytes),
            Err(StructuralError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn rejects_unknown_section_id() {
        let mut bytes = write(&ConstantPool::new(), &[Op::Halt]).unwrap();
        bytes[7] = 0x7f;
        assert!(matches!(
            read(&bytes),
            Err(StructuralError::UnknownSection { id: 0x7f })
        ));
    }

    #[test]
    fn rejects_out_of_range_offset() {
        let mut bytes = write(&ConstantPool::new(), &[Op::Halt]).unwrap();
        bytes[8..12].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(
            read(&bytes),
            Err(StructuralError::OffsetOutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_truncated_input() {
        assert!(matches!(
            read(b"CNDR"),
            Err(StructuralError::Truncated { .. })
        ));
        let bytes = write(&ConstantPool::new(), &[Op::Halt]).unwrap();
        assert!(read(&bytes[..8]).is_err());
    }
}
