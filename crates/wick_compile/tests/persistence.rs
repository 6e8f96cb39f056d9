//! Serialization behaviour of compiled heaps.
//!
//! Diagnostics are ordinary items, so a heap serializes whether or not the
//! analyses succeeded; and because passes rewrite by redirecting operands,
//! re-running a pass leaves the reachable structure, and therefore the
//! serialized form, unchanged.

use std::io::{Seek, SeekFrom};

use wick_compile::{compile_module, CompileOptions};
use wick_heap::build::ModuleBuilder;
use wick_heap::{binary, ItemHeap};

fn failing_module(heap: &mut ItemHeap) {
    let mut builder = ModuleBuilder::new(heap);
    let int = builder.type_int();
    let y = builder.variable("y", int);
    let body = builder.block(&[]); // control falls off the end
    let f = builder.function("f", &[], &[y], &[], &[], body);
    let unit = builder.unit("main", &[f]);
    builder.module("main", &[unit]);
}

fn healthy_module(heap: &mut ItemHeap) {
    let mut builder = ModuleBuilder::new(heap);
    let int = builder.type_int();
    let null = builder.type_null();
    let maybe = builder.type_union(&[int, null]);
    let x = builder.variable("x", maybe);
    let y = builder.variable("y", int);
    let access1 = builder.variable_copy(x);
    let test = builder.is_type(access1, int);
    let access2 = builder.variable_copy(x);
    let ret1 = builder.return_stmt(&[access2]);
    let then = builder.block(&[ret1]);
    let zero = builder.constant_int(0);
    let ret2 = builder.return_stmt(&[zero]);
    let alt = builder.block(&[ret2]);
    let branch = builder.if_else(test, then, alt);
    let body = builder.block(&[branch]);
    let f = builder.function("f", &[x], &[y], &[], &[], body);
    let unit = builder.unit("main", &[f]);
    builder.module("main", &[unit]);
}

#[test]
fn diagnostic_bearing_heaps_still_serialize() {
    let mut heap = ItemHeap::new();
    failing_module(&mut heap);
    let outcome = compile_module(&mut heap, &CompileOptions::default()).unwrap();
    assert!(!outcome.is_clean());

    let bytes = binary::write_to_vec(&heap).unwrap();
    let reread = binary::read_from_slice(&bytes).unwrap();
    let diagnostics = reread.diagnostics();
    assert_eq!(diagnostics.len(), outcome.diagnostics.len());
    assert_eq!(diagnostics[0].code, outcome.diagnostics[0].code);
}

#[test]
fn rerunning_the_analyses_reserializes_identically() {
    let mut once = ItemHeap::new();
    healthy_module(&mut once);
    compile_module(&mut once, &CompileOptions::default()).unwrap();
    let first = binary::write_to_vec(&once).unwrap();

    // a second run rewrites the same slots with structurally equal items
    compile_module(&mut once, &CompileOptions::default()).unwrap();
    let second = binary::write_to_vec(&once).unwrap();
    assert_eq!(first, second);
}

#[test]
fn compiled_heaps_round_trip_through_files() {
    let mut heap = ItemHeap::new();
    healthy_module(&mut heap);
    compile_module(&mut heap, &CompileOptions::default()).unwrap();

    let mut file = tempfile::tempfile().unwrap();
    binary::write(&heap, &mut file).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    let reread = binary::read(&mut file).unwrap();

    // the reachable structure is preserved modulo indices
    let original = binary::write_to_vec(&heap).unwrap();
    let again = binary::write_to_vec(&reread).unwrap();
    assert_eq!(original, again);
}
