//! The functional-purity check.
//!
//! Functions are mathematical: no allocation, no method invocation, no
//! dereference. Each function body is checked directly; transitive
//! violations surface at the offending callee, which is itself checked.

use wick_base::ErrorCode;
use wick_heap::view::{BindingView, CallableView, LinkView, ModuleView, UnitView};
use wick_heap::{Diagnostic, ItemHeap, ItemIndex, Opcode};

/// Checks every function in the module.
pub fn check_module(heap: &mut ItemHeap) {
    let Some(root) = heap.root() else {
        return;
    };
    if heap.opcode(root) != Opcode::Module {
        return;
    }
    let module = ModuleView::new(heap, root);
    let mut diagnostics = Vec::new();
    for unit in module.units {
        let view = UnitView::new(heap, unit);
        for declaration in view.declarations {
            if heap.opcode(declaration) == Opcode::Function {
                let body = CallableView::new(heap, declaration).body;
                walk(heap, body, &mut diagnostics);
            }
        }
    }
    for diagnostic in diagnostics {
        heap.report(diagnostic);
    }
}

fn walk(heap: &ItemHeap, index: ItemIndex, diagnostics: &mut Vec<Diagnostic>) {
    let item = heap.get(index);
    match item.opcode {
        Opcode::New | Opcode::NewIn => diagnostics.push(
            Diagnostic::new(ErrorCode::AllocationNotPermitted, heap.span_of(index))
                .with_context(index),
        ),
        Opcode::Dereference => diagnostics.push(
            Diagnostic::new(ErrorCode::ReferenceAccessNotPermitted, heap.span_of(index))
                .with_context(index),
        ),
        Opcode::Invoke => {
            let binding = BindingView::new(heap, item.operand(1));
            if let Some(target) = LinkView::new(heap, binding.link).target() {
                if heap.opcode(target) == Opcode::Method {
                    diagnostics.push(
                        Diagnostic::new(ErrorCode::MethodCallNotPermitted, heap.span_of(index))
                            .with_context(index),
                    );
                }
            }
        }
        Opcode::IndirectInvoke => {
            // a callee of method type mutates state the function cannot see
            let callee = item.operand(1);
            let method_typed = wick_heap::view::expression_type(heap, callee)
                .map(|slot| heap.opcode(slot) == Opcode::TypeMethod)
                .unwrap_or(false);
            if method_typed {
                diagnostics.push(
                    Diagnostic::new(ErrorCode::MethodCallNotPermitted, heap.span_of(index))
                        .with_context(index),
                );
            }
        }
        // do not wander into linked declarations or type cycles
        Opcode::Link | Opcode::TypeRecursive => return,
        _ => {}
    }
    for &operand in &item.operands {
        // bindings reach their link; everything else is body-local
        if heap.opcode(operand) == Opcode::Link {
            continue;
        }
        walk(heap, operand, diagnostics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wick_heap::build::ModuleBuilder;

    fn check(heap: &mut ItemHeap) -> Vec<ErrorCode> {
        check_module(heap);
        heap.diagnostics().iter().map(|d| d.code).collect()
    }

    #[test]
    fn allocation_in_a_function_is_reported() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let one = builder.constant_int(1);
        let alloc = builder.new_expr(one);
        let debug = builder.debug_stmt(alloc);
        let ret = builder.return_stmt(&[]);
        let body = builder.block(&[debug, ret]);
        let f = builder.function("f", &[], &[], &[], &[], body);
        let unit = builder.unit("main", &[f]);
        builder.module("main", &[unit]);
        assert_eq!(check(&mut heap), vec![ErrorCode::AllocationNotPermitted]);
    }

    #[test]
    fn allocation_in_a_method_is_fine() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let one = builder.constant_int(1);
        let alloc = builder.new_expr(one);
        let debug = builder.debug_stmt(alloc);
        let ret = builder.return_stmt(&[]);
        let body = builder.block(&[debug, ret]);
        let m = builder.method("m", &[], &[], &[], &[], body);
        let unit = builder.unit("main", &[m]);
        builder.module("main", &[unit]);
        assert!(check(&mut heap).is_empty());
    }

    #[test]
    fn dereference_in_a_function_is_reported() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let int = builder.type_int();
        let r = builder.type_reference(int);
        let x = builder.variable("x", r);
        let access = builder.variable_copy(x);
        let deref = builder.dereference(access);
        let out = builder.variable("out", int);
        let ret = builder.return_stmt(&[deref]);
        let body = builder.block(&[ret]);
        let f = builder.function("f", &[x], &[out], &[], &[], body);
        let unit = builder.unit("main", &[f]);
        builder.module("main", &[unit]);
        assert_eq!(check(&mut heap), vec![ErrorCode::ReferenceAccessNotPermitted]);
    }

    #[test]
    fn calling_a_method_from_a_function_is_reported() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let mbody = builder.block(&[]);
        let m = builder.method("mutate", &[], &[], &[], &[], mbody);
        let link = builder.link("mutate", &[m]);
        let binding = builder.binding(link, &[]);
        let invoke = builder.invoke(binding, &[]);
        let debug = builder.debug_stmt(invoke);
        let ret = builder.return_stmt(&[]);
        let body = builder.block(&[debug, ret]);
        let f = builder.function("f", &[], &[], &[], &[], body);
        let unit = builder.unit("main", &[m, f]);
        builder.module("main", &[unit]);
        assert_eq!(check(&mut heap), vec![ErrorCode::MethodCallNotPermitted]);
    }
}
