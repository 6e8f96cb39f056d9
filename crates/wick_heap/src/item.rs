//! Items, indices, payloads, and modifier flags.

use num_bigint::BigInt;
use smallvec::SmallVec;
use wick_base::Symbol;

use crate::opcode::Opcode;

/// Index of an item within its owning heap.
///
/// Indices are only meaningful inside the heap that allocated them; they are
/// renumbered by the writer and must never be carried across heaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemIndex(u32);

impl ItemIndex {
    pub fn new(raw: u32) -> Self {
        ItemIndex(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An item's payload.
///
/// Payloads live in the constant pool when serialized; in memory, names are
/// interned symbols and integers are arbitrary precision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Name(Symbol),
    Int(BigInt),
}

impl Payload {
    pub fn as_name(&self) -> Option<Symbol> {
        match self {
            Payload::Name(sym) => Some(*sym),
            Payload::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<&BigInt> {
        match self {
            Payload::Int(value) => Some(value),
            Payload::Name(_) => None,
        }
    }
}

/// Operand storage; nearly all items have four or fewer operands.
pub type Operands = SmallVec<[ItemIndex; 4]>;

/// One node in the WIL heap.
///
/// Immutable once sealed by the writer; during construction, transforms may
/// redirect individual operands in place (never changing the opcode or the
/// operand count).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub opcode: Opcode,
    pub operands: Operands,
    pub data: Option<Payload>,
}

impl Item {
    pub fn new(opcode: Opcode, operands: Operands, data: Option<Payload>) -> Self {
        Self {
            opcode,
            operands,
            data,
        }
    }

    pub fn operand(&self, i: usize) -> ItemIndex {
        self.operands[i]
    }
}

bitflags::bitflags! {
    /// Declaration modifiers, as summarized from a modifier tuple.
    ///
    /// On the heap each modifier is a zero-arity marker item so that the
    /// binary format needs no flag encoding; passes work with this summary.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Modifiers: u8 {
        const PUBLIC = 1 << 0;
        const PRIVATE = 1 << 1;
        const NATIVE = 1 << 2;
        const EXPORT = 1 << 3;
        const FINAL = 1 << 4;
    }
}

impl Modifiers {
    /// The marker opcodes set in this summary, in declaration order.
    pub fn opcodes(self) -> Vec<Opcode> {
        let mut out = Vec::new();
        if self.contains(Modifiers::PUBLIC) {
            out.push(Opcode::ModifierPublic);
        }
        if self.contains(Modifiers::PRIVATE) {
            out.push(Opcode::ModifierPrivate);
        }
        if self.contains(Modifiers::NATIVE) {
            out.push(Opcode::ModifierNative);
        }
        if self.contains(Modifiers::EXPORT) {
            out.push(Opcode::ModifierExport);
        }
        if self.contains(Modifiers::FINAL) {
            out.push(Opcode::ModifierFinal);
        }
        out
    }

    /// Rebuilds the summary from a marker opcode.
    pub fn from_opcode(opcode: Opcode) -> Option<Modifiers> {
        match opcode {
            Opcode::ModifierPublic => Some(Modifiers::PUBLIC),
            Opcode::ModifierPrivate => Some(Modifiers::PRIVATE),
            Opcode::ModifierNative => Some(Modifiers::NATIVE),
            Opcode::ModifierExport => Some(Modifiers::EXPORT),
            Opcode::ModifierFinal => Some(Modifiers::FINAL),
            _ => None,
        }
    }
}
