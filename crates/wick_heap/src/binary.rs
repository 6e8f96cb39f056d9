//! The `WI` on-disk format.
//!
//! Layout:
//!
//! 1. magic `WI`, format version (two bytes, big endian)
//! 2. constant pool: varint entry count, then entries, each a kind varint
//!    (0 = UTF-8 string, 1 = big-endian two's-complement integer) followed by
//!    length-prefixed bytes
//! 3. items: varint count, then per item (opcode)(operand count)(operand
//!    indices)(data length)(data bytes) — all varints; the data bytes of a
//!    payload-bearing item are two further varints, the pool kind and pool
//!    index
//! 4. footer: the root index as a varint, then a CRC-32 over sections 2–3
//!    (four bytes, big endian)
//!
//! The writer sweeps reachability from the root, renumbers the survivors
//! densely in post-order (root last) and drops everything unreachable.
//! Operand references always point backwards in the emitted stream; the one
//! exception is `TypeRecursive`, whose back-reference legitimately points
//! forward to the enclosing composite it closes a cycle with.
//!
//! The reader validates everything the schema table knows: magic, version,
//! arity classes, payload shape, reference direction, pool bounds, and the
//! checksum. On any failure no heap is returned. Item spans are not part of
//! the format; they are transient parser state.

use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};

use num_bigint::BigInt;

use crate::heap::ItemHeap;
use crate::item::{ItemIndex, Operands, Payload};
use crate::opcode::{DataArity, Opcode};

pub const MAGIC: [u8; 2] = *b"WI";
pub const FORMAT_VERSION: u16 = 1;

const POOL_KIND_STRING: u64 = 0;
const POOL_KIND_INT: u64 = 1;

/// Failures while reading or writing the binary form.
#[derive(Debug)]
pub enum BinaryError {
    /// Input ended before the structure it promised.
    Truncated,
    BadMagic([u8; 2]),
    UnsupportedVersion(u16),
    ChecksumMismatch { expected: u32, found: u32 },
    UnknownOpcode(u64),
    /// The item violated its opcode's operand or data arity.
    SchemaMismatch { opcode: Opcode },
    /// An operand or pool reference was out of bounds, or pointed forward
    /// where only `TypeRecursive` may.
    IndexOutOfRange { index: u64, limit: u64 },
    VarintOverflow,
    InvalidUtf8,
    BadPoolKind(u64),
    /// A payload's inline length disagreed with its contents.
    DataLengthMismatch,
    /// The heap being written has no root.
    MissingRoot,
    Io(std::io::Error),
}

impl fmt::Display for BinaryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryError::Truncated => write!(f, "truncated input"),
            BinaryError::BadMagic(found) => {
                write!(f, "bad magic bytes {:02x}{:02x}", found[0], found[1])
            }
            BinaryError::UnsupportedVersion(v) => write!(f, "unsupported format version {}", v),
            BinaryError::ChecksumMismatch { expected, found } => {
                write!(f, "checksum mismatch: expected {:08x}, found {:08x}", expected, found)
            }
            BinaryError::UnknownOpcode(op) => write!(f, "unknown opcode {:#x}", op),
            BinaryError::SchemaMismatch { opcode } => {
                write!(f, "item violates the schema of {:?}", opcode)
            }
            BinaryError::IndexOutOfRange { index, limit } => {
                write!(f, "reference {} out of range (limit {})", index, limit)
            }
            BinaryError::VarintOverflow => write!(f, "varint exceeds 64 bits"),
            BinaryError::InvalidUtf8 => write!(f, "constant pool string is not UTF-8"),
            BinaryError::BadPoolKind(kind) => write!(f, "unknown constant pool kind {}", kind),
            BinaryError::DataLengthMismatch => write!(f, "payload length disagrees with contents"),
            BinaryError::MissingRoot => write!(f, "heap has no root to serialize"),
            BinaryError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for BinaryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BinaryError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BinaryError {
    fn from(e: std::io::Error) -> Self {
        BinaryError::Io(e)
    }
}

// ---- varints ----

fn push_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

struct Decoder<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], BinaryError> {
        let end = self.offset.checked_add(n).ok_or(BinaryError::Truncated)?;
        let bytes = self.buf.get(self.offset..end).ok_or(BinaryError::Truncated)?;
        self.offset = end;
        Ok(bytes)
    }

    fn byte(&mut self) -> Result<u8, BinaryError> {
        Ok(self.take(1)?[0])
    }

    fn varint(&mut self) -> Result<u64, BinaryError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.byte()?;
            if shift == 63 && byte > 1 {
                return Err(BinaryError::VarintOverflow);
            }
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 63 {
                return Err(BinaryError::VarintOverflow);
            }
        }
    }

    fn at_end(&self) -> bool {
        self.offset >= self.buf.len()
    }
}

// ---- writing ----

/// Serializes the reachable part of `heap` to `out`.
pub fn write(heap: &ItemHeap, out: &mut impl Write) -> Result<(), BinaryError> {
    let bytes = write_to_vec(heap)?;
    out.write_all(&bytes)?;
    Ok(())
}

/// As [`write`], into a fresh buffer.
pub fn write_to_vec(heap: &ItemHeap) -> Result<Vec<u8>, BinaryError> {
    let order = heap.reachable().map_err(|_| BinaryError::MissingRoot)?;
    let mut renumber: HashMap<ItemIndex, u64> = HashMap::with_capacity(order.len());
    for (new, &old) in order.iter().enumerate() {
        renumber.insert(old, new as u64);
    }
    log::debug!("writing {} reachable of {} items", order.len(), heap.len());

    // Constant pool, deduplicated in first-use order.
    let mut pool: Vec<(u64, Vec<u8>)> = Vec::new();
    let mut string_slots: HashMap<String, u64> = HashMap::new();
    let mut int_slots: HashMap<BigInt, u64> = HashMap::new();
    let mut payload_slot = |payload: &Payload, heap: &ItemHeap| -> (u64, u64) {
        match payload {
            Payload::Name(sym) => {
                let text = heap.resolve(*sym).to_string();
                let slot = *string_slots.entry(text.clone()).or_insert_with(|| {
                    pool.push((POOL_KIND_STRING, text.into_bytes()));
                    (pool.len() - 1) as u64
                });
                (POOL_KIND_STRING, slot)
            }
            Payload::Int(value) => {
                let slot = *int_slots.entry(value.clone()).or_insert_with(|| {
                    pool.push((POOL_KIND_INT, value.to_signed_bytes_be()));
                    (pool.len() - 1) as u64
                });
                (POOL_KIND_INT, slot)
            }
        }
    };

    // Items are encoded first so the pool is complete before emission.
    let mut encoded: Vec<Vec<u8>> = Vec::with_capacity(order.len());
    for &old in &order {
        let item = heap.get(old);
        let mut body = Vec::new();
        push_varint(&mut body, item.opcode as u64);
        push_varint(&mut body, item.operands.len() as u64);
        for &operand in &item.operands {
            let target = *renumber
                .get(&operand)
                .expect("recursive back-reference must reach a reachable item");
            push_varint(&mut body, target);
        }
        match &item.data {
            None => push_varint(&mut body, 0),
            Some(payload) => {
                let (kind, slot) = payload_slot(payload, heap);
                let mut data = Vec::new();
                push_varint(&mut data, kind);
                push_varint(&mut data, slot);
                push_varint(&mut body, data.len() as u64);
                body.extend_from_slice(&data);
            }
        }
        encoded.push(body);
    }

    // Sections 2-3 are buffered so the footer checksum can cover them.
    let mut sections = Vec::new();
    push_varint(&mut sections, pool.len() as u64);
    for (kind, bytes) in &pool {
        push_varint(&mut sections, *kind);
        push_varint(&mut sections, bytes.len() as u64);
        sections.extend_from_slice(bytes);
    }
    push_varint(&mut sections, encoded.len() as u64);
    for body in &encoded {
        sections.extend_from_slice(body);
    }

    let root = heap.root().ok_or(BinaryError::MissingRoot)?;
    let root_slot = renumber[&root];
    debug_assert_eq!(root_slot as usize, order.len() - 1, "root is emitted last");

    let mut out = Vec::with_capacity(sections.len() + 16);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
    out.extend_from_slice(&sections);
    push_varint(&mut out, root_slot);
    out.extend_from_slice(&crc32fast::hash(&sections).to_be_bytes());
    Ok(out)
}

// ---- reading ----

/// Decodes a heap from `input`.
pub fn read(input: &mut impl Read) -> Result<ItemHeap, BinaryError> {
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes)?;
    read_from_slice(&bytes)
}

/// As [`read`], from an in-memory buffer.
pub fn read_from_slice(bytes: &[u8]) -> Result<ItemHeap, BinaryError> {
    let mut decoder = Decoder::new(bytes);
    let magic = decoder.take(2)?;
    if magic != &MAGIC[..] {
        return Err(BinaryError::BadMagic([magic[0], magic[1]]));
    }
    let version = u16::from_be_bytes(decoder.take(2)?.try_into().unwrap());
    if version != FORMAT_VERSION {
        return Err(BinaryError::UnsupportedVersion(version));
    }

    let sections_start = decoder.offset;

    // Section 2: constant pool.
    enum PoolEntry {
        Str(String),
        Int(BigInt),
    }
    let pool_count = decoder.varint()?;
    let mut pool = Vec::new();
    for _ in 0..pool_count {
        let kind = decoder.varint()?;
        let len = decoder.varint()? as usize;
        let bytes = decoder.take(len)?;
        match kind {
            POOL_KIND_STRING => {
                let text =
                    std::str::from_utf8(bytes).map_err(|_| BinaryError::InvalidUtf8)?;
                pool.push(PoolEntry::Str(text.to_string()));
            }
            POOL_KIND_INT => pool.push(PoolEntry::Int(BigInt::from_signed_bytes_be(bytes))),
            other => return Err(BinaryError::BadPoolKind(other)),
        }
    }

    // Section 3: items.
    let item_count = decoder.varint()?;
    let mut heap = ItemHeap::new();
    for current in 0..item_count {
        let raw_opcode = decoder.varint()?;
        let opcode = u8::try_from(raw_opcode)
            .ok()
            .and_then(|byte| Opcode::try_from(byte).ok())
            .ok_or(BinaryError::UnknownOpcode(raw_opcode))?;
        let schema = opcode.schema();

        let operand_count = decoder.varint()? as usize;
        if !schema.operands.admits(operand_count) {
            return Err(BinaryError::SchemaMismatch { opcode });
        }
        let mut operands = Operands::new();
        for _ in 0..operand_count {
            let target = decoder.varint()?;
            // Only the recursive back-reference may point forward.
            let limit = if opcode == Opcode::TypeRecursive {
                item_count
            } else {
                current
            };
            if target >= limit {
                return Err(BinaryError::IndexOutOfRange { index: target, limit });
            }
            operands.push(ItemIndex::new(target as u32));
        }

        let data_len = decoder.varint()? as usize;
        let data = match schema.data {
            DataArity::Zero => {
                if data_len != 0 {
                    return Err(BinaryError::SchemaMismatch { opcode });
                }
                None
            }
            DataArity::Two => {
                if data_len == 0 {
                    return Err(BinaryError::SchemaMismatch { opcode });
                }
                let data_bytes = decoder.take(data_len)?;
                let mut inner = Decoder::new(data_bytes);
                let kind = inner.varint()?;
                let slot = inner.varint()? as usize;
                if !inner.at_end() {
                    return Err(BinaryError::DataLengthMismatch);
                }
                let entry = pool.get(slot).ok_or(BinaryError::IndexOutOfRange {
                    index: slot as u64,
                    limit: pool.len() as u64,
                })?;
                match (kind, entry) {
                    (POOL_KIND_STRING, PoolEntry::Str(text)) => {
                        Some(Payload::Name(heap.intern(text)))
                    }
                    (POOL_KIND_INT, PoolEntry::Int(value)) => Some(Payload::Int(value.clone())),
                    (POOL_KIND_STRING, _) | (POOL_KIND_INT, _) => {
                        return Err(BinaryError::BadPoolKind(kind))
                    }
                    (other, _) => return Err(BinaryError::BadPoolKind(other)),
                }
            }
        };
        heap.allocate(opcode, operands, data);
    }

    let sections_end = decoder.offset;

    // Footer.
    let root = decoder.varint()?;
    if root >= item_count {
        return Err(BinaryError::IndexOutOfRange { index: root, limit: item_count });
    }
    let expected = u32::from_be_bytes(decoder.take(4)?.try_into().unwrap());
    let found = crc32fast::hash(&bytes[sections_start..sections_end]);
    if expected != found {
        return Err(BinaryError::ChecksumMismatch { expected, found });
    }

    heap.set_root(ItemIndex::new(root as u32));
    log::debug!("read {} items", item_count);
    Ok(heap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::ModuleBuilder;
    use crate::view::{CallableView, ModuleView, UnitView};
    use std::io::{Seek, SeekFrom};

    fn sample_heap() -> ItemHeap {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let int = builder.type_int();
        let x = builder.variable("x", int);
        let y = builder.variable("y", int);
        let access = builder.variable_copy(x);
        let ret = builder.return_stmt(&[access]);
        let body = builder.block(&[ret]);
        let f = builder.function("id", &[x], &[y], &[], &[], body);
        let unit = builder.unit("main", &[f]);
        builder.module("main", &[unit]);
        heap
    }

    /// Recomputes and patches the footer checksum after a byte edit.
    fn refresh_checksum(bytes: &mut [u8]) {
        let len = bytes.len();
        // Fixture roots are always < 128, so the footer is 1 + 4 bytes.
        let crc = crc32fast::hash(&bytes[4..len - 5]);
        bytes[len - 4..].copy_from_slice(&crc.to_be_bytes());
    }

    #[test]
    fn round_trip_preserves_structure() {
        let heap = sample_heap();
        let bytes = write_to_vec(&heap).unwrap();
        let reread = read_from_slice(&bytes).unwrap();

        let module = ModuleView::new(&reread, reread.root().unwrap());
        assert_eq!(reread.resolve(crate::view::name_of(&reread, module.name)), "main");
        let unit = UnitView::new(&reread, module.units[0]);
        let f = CallableView::new(&reread, unit.declarations[0]);
        assert!(f.is_function());
        assert_eq!(f.parameters.len(), 1);
        assert_eq!(f.returns.len(), 1);
    }

    #[test]
    fn round_trip_is_stable_under_reserialization() {
        let heap = sample_heap();
        let bytes = write_to_vec(&heap).unwrap();
        let reread = read_from_slice(&bytes).unwrap();
        let again = write_to_vec(&reread).unwrap();
        assert_eq!(bytes, again);
    }

    #[test]
    fn unreachable_items_are_dropped() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        builder.constant_int(99); // never referenced
        builder.module("empty", &[]);
        let total = heap.len();
        let bytes = write_to_vec(&heap).unwrap();
        let reread = read_from_slice(&bytes).unwrap();
        assert!(reread.len() < total);
        assert_eq!(reread.items_of_kind(Opcode::Constant).count(), 0);
    }

    #[test]
    fn recursive_type_survives_round_trip() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        // list := null | list, closed through a recursive back-reference
        let null = builder.type_null();
        let rec = builder.type_recursive(null);
        let union = builder.type_union(&[null, rec]);
        let var = builder.variable("l", union);
        let alias = builder.type_alias("list", var, &[]);
        let unit = builder.unit("main", &[alias]);
        builder.module("main", &[unit]);
        heap.replace_operand(rec, 0, union).unwrap();

        let bytes = write_to_vec(&heap).unwrap();
        let reread = read_from_slice(&bytes).unwrap();
        let rec_items: Vec<_> = reread.items_of_kind(Opcode::TypeRecursive).collect();
        assert_eq!(rec_items.len(), 1);
        let target = reread.get(rec_items[0]).operand(0);
        assert_eq!(reread.opcode(target), Opcode::TypeUnion);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let heap = sample_heap();
        let mut bytes = write_to_vec(&heap).unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            read_from_slice(&bytes),
            Err(BinaryError::BadMagic(_))
        ));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let heap = sample_heap();
        let mut bytes = write_to_vec(&heap).unwrap();
        bytes[3] = 0x7F;
        assert!(matches!(
            read_from_slice(&bytes),
            Err(BinaryError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn corrupted_pool_fails_the_checksum() {
        let heap = sample_heap();
        let mut bytes = write_to_vec(&heap).unwrap();
        // Flip a character inside the first pooled string; structure still
        // parses, so the checksum must catch it.
        let position = bytes
            .iter()
            .position(|&b| b == b'x')
            .expect("pool contains the variable name");
        bytes[position] = b'q';
        assert!(matches!(
            read_from_slice(&bytes),
            Err(BinaryError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn truncated_input_is_rejected() {
        let heap = sample_heap();
        let bytes = write_to_vec(&heap).unwrap();
        let cut = &bytes[..bytes.len() / 2];
        assert!(read_from_slice(cut).is_err());
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        // A single bogus item: opcode 0xFE, no operands, no data.
        let mut sections = Vec::new();
        push_varint(&mut sections, 0); // empty pool
        push_varint(&mut sections, 1); // one item
        push_varint(&mut sections, 0xFE);
        push_varint(&mut sections, 0);
        push_varint(&mut sections, 0);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
        bytes.extend_from_slice(&sections);
        push_varint(&mut bytes, 0);
        bytes.extend_from_slice(&crc32fast::hash(&sections).to_be_bytes());
        assert!(matches!(
            read_from_slice(&bytes),
            Err(BinaryError::UnknownOpcode(0xFE))
        ));
    }

    #[test]
    fn forward_reference_is_rejected_for_ordinary_items() {
        // TypeArray at index 0 referring to item 1 (not yet allocated).
        let mut sections = Vec::new();
        push_varint(&mut sections, 0); // empty pool
        push_varint(&mut sections, 2); // two items
        push_varint(&mut sections, Opcode::TypeArray as u64);
        push_varint(&mut sections, 1);
        push_varint(&mut sections, 1); // forward!
        push_varint(&mut sections, 0);
        push_varint(&mut sections, Opcode::TypeInt as u64);
        push_varint(&mut sections, 0);
        push_varint(&mut sections, 0);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
        bytes.extend_from_slice(&sections);
        push_varint(&mut bytes, 1);
        bytes.extend_from_slice(&crc32fast::hash(&sections).to_be_bytes());
        assert!(matches!(
            read_from_slice(&bytes),
            Err(BinaryError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn arity_violation_is_a_schema_mismatch() {
        // TypeArray with two operands.
        let mut sections = Vec::new();
        push_varint(&mut sections, 0);
        push_varint(&mut sections, 2);
        push_varint(&mut sections, Opcode::TypeInt as u64);
        push_varint(&mut sections, 0);
        push_varint(&mut sections, 0);
        push_varint(&mut sections, Opcode::TypeArray as u64);
        push_varint(&mut sections, 2);
        push_varint(&mut sections, 0);
        push_varint(&mut sections, 0);
        push_varint(&mut sections, 0);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
        bytes.extend_from_slice(&sections);
        push_varint(&mut bytes, 1);
        bytes.extend_from_slice(&crc32fast::hash(&sections).to_be_bytes());
        assert!(matches!(
            read_from_slice(&bytes),
            Err(BinaryError::SchemaMismatch { opcode: Opcode::TypeArray })
        ));
    }

    #[test]
    fn refresh_checksum_helper_keeps_files_readable() {
        let heap = sample_heap();
        let mut bytes = write_to_vec(&heap).unwrap();
        refresh_checksum(&mut bytes);
        assert!(read_from_slice(&bytes).is_ok());
    }

    #[test]
    fn round_trip_through_a_real_file() {
        let heap = sample_heap();
        let mut file = tempfile::tempfile().unwrap();
        write(&heap, &mut file).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        let reread = read(&mut file).unwrap();
        assert!(reread.root().is_some());
        assert_eq!(reread.items_of_kind(Opcode::Function).count(), 1);
    }
}
