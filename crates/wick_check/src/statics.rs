//! Cyclic static initialiser detection.
//!
//! Each static variable's initialiser is scanned transitively for accesses
//! to other statics; any declaration that can reach itself through that
//! graph is rejected. Every declaration on the cycle gets its own
//! diagnostic, so `static a = b + 1; static b = a + 1` reports twice.

use std::collections::{HashMap, HashSet};

use wick_base::ErrorCode;
use wick_heap::view::{LinkView, ModuleView, StaticVariableView, UnitView};
use wick_heap::{Diagnostic, ItemHeap, ItemIndex, Opcode};

/// Checks every static variable in the module.
pub fn check_module(heap: &mut ItemHeap) {
    let Some(root) = heap.root() else {
        return;
    };
    if heap.opcode(root) != Opcode::Module {
        return;
    }
    let module = ModuleView::new(heap, root);
    let mut statics = Vec::new();
    for unit in &module.units {
        for declaration in UnitView::new(heap, *unit).declarations {
            if heap.opcode(declaration) == Opcode::StaticVariable {
                statics.push(declaration);
            }
        }
    }

    // the dependency graph: static -> statics its initialiser reads
    let mut edges: HashMap<ItemIndex, Vec<ItemIndex>> = HashMap::new();
    for &declaration in &statics {
        let initialiser = StaticVariableView::new(heap, declaration).initialiser;
        let mut reads = Vec::new();
        collect_static_reads(heap, initialiser, &mut reads);
        edges.insert(declaration, reads);
    }

    let mut diagnostics = Vec::new();
    for &declaration in &statics {
        if reaches_itself(&edges, declaration) {
            diagnostics.push(
                Diagnostic::new(
                    ErrorCode::CyclicStaticInitialiser,
                    heap.span_of(declaration),
                )
                .with_context(declaration),
            );
        }
    }
    log::debug!(
        "static initialiser check: {} declarations, {} cyclic",
        statics.len(),
        diagnostics.len()
    );
    for diagnostic in diagnostics {
        heap.report(diagnostic);
    }
}

fn collect_static_reads(heap: &ItemHeap, index: ItemIndex, out: &mut Vec<ItemIndex>) {
    let item = heap.get(index);
    match item.opcode {
        Opcode::StaticVariableAccess => {
            if let Some(target) = LinkView::new(heap, item.operand(1)).target() {
                out.push(target);
            }
            return;
        }
        Opcode::Link | Opcode::TypeRecursive => return,
        _ => {}
    }
    for &operand in &item.operands {
        if heap.opcode(operand) == Opcode::Link {
            continue;
        }
        collect_static_reads(heap, operand, out);
    }
}

fn reaches_itself(edges: &HashMap<ItemIndex, Vec<ItemIndex>>, start: ItemIndex) -> bool {
    let mut seen = HashSet::new();
    let mut stack: Vec<ItemIndex> = edges.get(&start).cloned().unwrap_or_default();
    while let Some(next) = stack.pop() {
        if next == start {
            return true;
        }
        if seen.insert(next) {
            stack.extend(edges.get(&next).cloned().unwrap_or_default());
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use wick_heap::build::ModuleBuilder;

    #[test]
    fn mutually_recursive_statics_report_on_both() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let int = builder.type_int();
        // static int a = b + 1; static int b = a + 1
        let link_b = builder.link("b", &[]);
        let read_b = builder.static_variable_access(link_b);
        let one = builder.constant_int(1);
        let init_a = builder.add(read_b, one);
        let a = builder.static_variable("a", int, init_a);

        let link_a = builder.link("a", &[]);
        let read_a = builder.static_variable_access(link_a);
        let one2 = builder.constant_int(1);
        let init_b = builder.add(read_a, one2);
        let b = builder.static_variable("b", int, init_b);

        let unit = builder.unit("main", &[a, b]);
        builder.module("main", &[unit]);
        crate::resolve::resolve_module(&mut heap);
        check_module(&mut heap);

        let codes: Vec<ErrorCode> = heap.diagnostics().iter().map(|d| d.code).collect();
        assert_eq!(
            codes,
            vec![
                ErrorCode::CyclicStaticInitialiser,
                ErrorCode::CyclicStaticInitialiser
            ]
        );
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let int = builder.type_int();
        let link = builder.link("a", &[]);
        let read = builder.static_variable_access(link);
        let a = builder.static_variable("a", int, read);
        let unit = builder.unit("main", &[a]);
        builder.module("main", &[unit]);
        crate::resolve::resolve_module(&mut heap);
        check_module(&mut heap);
        let codes: Vec<ErrorCode> = heap.diagnostics().iter().map(|d| d.code).collect();
        assert_eq!(codes, vec![ErrorCode::CyclicStaticInitialiser]);
    }

    #[test]
    fn acyclic_chains_are_fine() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let int = builder.type_int();
        let one = builder.constant_int(1);
        let a = builder.static_variable("a", int, one);
        let link_a = builder.link("a", &[]);
        let read_a = builder.static_variable_access(link_a);
        let two = builder.constant_int(2);
        let init_b = builder.add(read_a, two);
        let b = builder.static_variable("b", int, init_b);
        let unit = builder.unit("main", &[a, b]);
        builder.module("main", &[unit]);
        crate::resolve::resolve_module(&mut heap);
        check_module(&mut heap);
        assert!(heap.diagnostics().is_empty());
    }
}
