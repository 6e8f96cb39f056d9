//! Syntactic computation of a loop body's modified variables.
//!
//! Both flow typing and versioning need to know which variables a loop body
//! may redefine before the loop's own modified tuple has been populated;
//! this helper derives the set syntactically. The versioning pass later
//! writes the result onto the loop item so downstream consumers need not
//! recompute it.

use std::collections::BTreeSet;

use wick_heap::view::AssignView;
use wick_heap::{ItemHeap, ItemIndex, Opcode};

/// The variable declarations assigned anywhere below `statement`,
/// in allocation order for determinism.
pub fn modified_variables(heap: &ItemHeap, statement: ItemIndex) -> Vec<ItemIndex> {
    let mut out = BTreeSet::new();
    collect(heap, statement, &mut out);
    out.into_iter().collect()
}

fn collect(heap: &ItemHeap, index: ItemIndex, out: &mut BTreeSet<ItemIndex>) {
    let item = heap.get(index);
    if item.opcode == Opcode::Assign {
        let view = AssignView::new(heap, index);
        for lval in view.lhs {
            if let Some(declaration) = lval_base(heap, lval) {
                out.insert(declaration);
            }
        }
    }
    if item.opcode == Opcode::TypeRecursive {
        return;
    }
    for &operand in &item.operands {
        collect(heap, operand, out);
    }
}

/// The variable declaration ultimately assigned through an lval: the
/// variable itself, or the base of a chain of array/record/dereference
/// updates.
pub fn lval_base(heap: &ItemHeap, lval: ItemIndex) -> Option<ItemIndex> {
    match heap.opcode(lval) {
        Opcode::VariableCopy | Opcode::VariableMove => Some(heap.get(lval).operand(1)),
        Opcode::ArrayAccess | Opcode::ArrayBorrow | Opcode::RecordAccess | Opcode::RecordBorrow => {
            lval_base(heap, heap.get(lval).operand(1))
        }
        Opcode::Dereference => lval_base(heap, heap.get(lval).operand(1)),
        _ => None,
    }
}
