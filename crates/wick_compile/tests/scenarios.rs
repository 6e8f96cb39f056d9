//! End-to-end pipeline scenarios.
//!
//! Each test assembles a small program through the heap builder (the
//! parser is an external collaborator), runs the full middle-end, and
//! checks diagnostics, obligations, and prover verdicts.

use wick_base::{ErrorCode, Span};
use wick_compile::{compile_module, discharge, CompileOptions};
use wick_heap::build::ModuleBuilder;
use wick_heap::ItemHeap;
use wick_verify::{ObligationKind, Prover, TautologyProver, Verdict};

fn compile(heap: &mut ItemHeap) -> wick_compile::CompileOutcome {
    compile_module(heap, &CompileOptions::verified()).expect("pipeline not cancelled")
}

fn codes(heap: &ItemHeap) -> Vec<u16> {
    heap.diagnostics().iter().map(|d| d.code.code()).collect()
}

/// `function id(int x) -> (int y): return x` — compiles with no
/// obligations beyond the vacuously absent postcondition; versioning gives
/// both variables version zero.
#[test]
fn identity_function_compiles_cleanly() {
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

    let outcome = compile(&mut heap);
    assert!(outcome.is_clean());
    let versions = outcome.versions.unwrap();
    assert_eq!(versions.version_of(x), Some(0));
    assert_eq!(versions.version_of(y), Some(0));
    let assertion = outcome.assertion.unwrap();
    assert!(assertion.obligations.is_empty());
}

/// `function abs(int x) -> (int y) ensures y >= 0` — both return paths
/// discharge the postcondition.
#[test]
fn absolute_value_verifies_valid() {
    let mut heap = ItemHeap::new();
    let mut builder = ModuleBuilder::new(&mut heap);
    let int = builder.type_int();
    let x = builder.variable("x", int);
    let y = builder.variable("y", int);
    // ensures y >= 0
    let ens_use = builder.variable_copy(y);
    let zero_e = builder.constant_int(0);
    let ensures = builder.greater_or_equal(ens_use, zero_e);
    // if x >= 0: return x else: return -x
    let cond_use = builder.variable_copy(x);
    let zero_c = builder.constant_int(0);
    let cond = builder.greater_or_equal(cond_use, zero_c);
    let then_use = builder.variable_copy(x);
    let then_ret = builder.return_stmt(&[then_use]);
    let then_block = builder.block(&[then_ret]);
    let else_use = builder.variable_copy(x);
    let negated = builder.negate(else_use);
    let else_ret = builder.return_stmt(&[negated]);
    let else_block = builder.block(&[else_ret]);
    let branch = builder.if_else(cond, then_block, else_block);
    let body = builder.block(&[branch]);
    let f = builder.function("abs", &[x], &[y], &[], &[ensures], body);
    let unit = builder.unit("main", &[f]);
    builder.module("main", &[unit]);

    let outcome = compile(&mut heap);
    assert!(outcome.is_clean());
    let assertion = outcome.assertion.unwrap();
    let postconditions: Vec<_> = assertion
        .obligations
        .iter()
        .filter(|o| o.kind == ObligationKind::Postcondition)
        .collect();
    assert_eq!(postconditions.len(), 2, "one per return path");

    let prover = TautologyProver::new();
    for (name, verdict) in prover.check(&assertion) {
        assert_eq!(verdict, Verdict::Valid, "obligation {} must hold", name);
    }
}

/// `type nat is (int n) where n >= 0; function f(int x) -> (nat r): return
/// x` — one invalid obligation `x >= 0`, surfaced as a subtype diagnostic
/// at the return.
#[test]
fn refinement_mismatch_is_invalid_with_code_400() {
    let mut heap = ItemHeap::new();
    let mut builder = ModuleBuilder::new(&mut heap);
    let int = builder.type_int();
    let n = builder.variable("n", int);
    let n_use = builder.variable_copy(n);
    let zero = builder.constant_int(0);
    let invariant = builder.greater_or_equal(n_use, zero);
    let nat = builder.type_alias("nat", n, &[invariant]);
    let link = builder.link("nat", &[nat]);
    let nat_type = builder.type_nominal(link, &[]);

    let x = builder.variable("x", int);
    let r = builder.variable("r", nat_type);
    let access = builder.variable_copy(x);
    let ret = builder.return_stmt(&[access]);
    builder.spanned(ret, Span::new(72, 80));
    let body = builder.block(&[ret]);
    let f = builder.function("f", &[x], &[r], &[], &[], body);
    let unit = builder.unit("main", &[nat, f]);
    builder.module("main", &[unit]);

    let outcome = compile(&mut heap);
    assert!(outcome.is_clean(), "type-level checking accepts int into nat");
    let assertion = outcome.assertion.unwrap();
    let invariant_obligations: Vec<_> = assertion
        .obligations
        .iter()
        .filter(|o| o.kind == ObligationKind::TypeInvariant)
        .collect();
    assert_eq!(invariant_obligations.len(), 1);

    let verdicts = discharge(&mut heap, &assertion, &TautologyProver::new());
    let invalid: Vec<_> = verdicts
        .iter()
        .filter(|(_, v)| matches!(v, Verdict::Invalid(_)))
        .collect();
    assert_eq!(invalid.len(), 1);
    // and the failure is pinned to the return as a 400
    let diagnostics = heap.diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].code, ErrorCode::SubtypeError);
    assert_eq!(diagnostics[0].span, Span::new(72, 80));
}

/// `type msg is {int k, int p} | {int k, int|null p}` — the record literal
/// matches both members, so the coercion is ambiguous (code 408).
#[test]
fn overlapping_union_members_are_an_ambiguous_coercion() {
    let mut heap = ItemHeap::new();
    let mut builder = ModuleBuilder::new(&mut heap);
    let int = builder.type_int();
    let null = builder.type_null();
    let int_or_null = builder.type_union(&[int, null]);
    let narrow = builder.type_record(&[("k", int), ("p", int)], false);
    let wide = builder.type_record(&[("k", int), ("p", int_or_null)], false);
    let msg = builder.type_union(&[narrow, wide]);

    let k = builder.variable("k", int);
    let p = builder.variable("p", int);
    let r = builder.variable("r", msg);
    let ak = builder.variable_copy(k);
    let ap = builder.variable_copy(p);
    let literal = builder.record_initialiser(&[("k", ak), ("p", ap)]);
    let ret = builder.return_stmt(&[literal]);
    let body = builder.block(&[ret]);
    let m = builder.function("m", &[k, p], &[r], &[], &[], body);
    let unit = builder.unit("main", &[m]);
    builder.module("main", &[unit]);

    compile(&mut heap);
    assert!(codes(&heap).contains(&408));
}

/// `static int a = b + 1; static int b = a + 1` — code 509 on both
/// declarations.
#[test]
fn cyclic_static_initialisers_report_on_every_declaration() {
    let mut heap = ItemHeap::new();
    let mut builder = ModuleBuilder::new(&mut heap);
    let int = builder.type_int();
    let link_b = builder.link("b", &[]);
    let read_b = builder.static_variable_access(link_b);
    let one_a = builder.constant_int(1);
    let init_a = builder.add(read_b, one_a);
    let a = builder.static_variable("a", int, init_a);
    let link_a = builder.link("a", &[]);
    let read_a = builder.static_variable_access(link_a);
    let one_b = builder.constant_int(1);
    let init_b = builder.add(read_a, one_b);
    let b = builder.static_variable("b", int, init_b);
    let unit = builder.unit("main", &[a, b]);
    builder.module("main", &[unit]);

    compile(&mut heap);
    assert_eq!(codes(&heap), vec![509, 509]);
}

/// Summing an array under `i >= 0 && i <= |xs|` — establishment and
/// preservation both verify, and the loop head issues fresh versions.
#[test]
fn loop_invariant_sum_verifies_valid() {
    let mut heap = ItemHeap::new();
    let mut builder = ModuleBuilder::new(&mut heap);
    let int = builder.type_int();
    let int_array = builder.type_array(int);
    let xs = builder.variable("xs", int_array);
    let out = builder.variable("out", int);

    // int i = 0; int sum = 0
    let zero_i = builder.constant_int(0);
    let i = builder.variable_initialised("i", int, zero_i);
    let zero_s = builder.constant_int(0);
    let sum = builder.variable_initialised("sum", int, zero_s);

    // while i < |xs| where i >= 0, i <= |xs|:
    let cond_i = builder.variable_copy(i);
    let cond_xs = builder.variable_copy(xs);
    let cond_len = builder.array_length(cond_xs);
    let cond = builder.less_than(cond_i, cond_len);

    let inv1_i = builder.variable_copy(i);
    let inv1_zero = builder.constant_int(0);
    let inv1 = builder.greater_or_equal(inv1_i, inv1_zero);
    let inv2_i = builder.variable_copy(i);
    let inv2_xs = builder.variable_copy(xs);
    let inv2_len = builder.array_length(inv2_xs);
    let inv2 = builder.less_or_equal(inv2_i, inv2_len);

    //   sum = sum + xs[i]; i = i + 1
    let body_sum = builder.variable_copy(sum);
    let body_xs = builder.variable_copy(xs);
    let body_i1 = builder.variable_copy(i);
    let element = builder.array_access(body_xs, body_i1);
    let added = builder.add(body_sum, element);
    let sum_lval = builder.variable_copy(sum);
    let assign_sum = builder.assign(&[sum_lval], &[added]);
    let body_i2 = builder.variable_copy(i);
    let one = builder.constant_int(1);
    let inc = builder.add(body_i2, one);
    let i_lval = builder.variable_copy(i);
    let assign_i = builder.assign(&[i_lval], &[inc]);
    let loop_body = builder.block(&[assign_sum, assign_i]);
    let w = builder.while_stmt(cond, &[inv1, inv2], loop_body);

    // return sum
    let ret_use = builder.variable_copy(sum);
    let ret = builder.return_stmt(&[ret_use]);
    let body = builder.block(&[i, sum, w, ret]);
    let f = builder.function("total", &[xs], &[out], &[], &[], body);
    let unit = builder.unit("main", &[f]);
    builder.module("main", &[unit]);

    let outcome = compile(&mut heap);
    assert!(outcome.is_clean());

    // fresh versions at the loop head and after the loop
    let versions = outcome.versions.unwrap();
    let head = versions.version_of(cond_i).unwrap();
    let body_use = versions.version_of(body_i1).unwrap();
    let after = versions.version_of(ret_use).unwrap();
    assert_ne!(versions.version_of(i), Some(head));
    assert_eq!(head, body_use);
    assert_ne!(after, 0);

    let assertion = outcome.assertion.unwrap();
    let kinds: Vec<ObligationKind> = assertion.obligations.iter().map(|o| o.kind).collect();
    assert!(kinds.contains(&ObligationKind::InvariantEstablished));
    assert!(kinds.contains(&ObligationKind::InvariantPreserved));
    assert!(kinds.contains(&ObligationKind::ArrayBounds));

    let prover = TautologyProver::new();
    for (name, verdict) in prover.check(&assertion) {
        assert_eq!(verdict, Verdict::Valid, "obligation {} must hold", name);
    }
}

/// The assertion module is one structured document.
#[test]
fn assertion_modules_serialize_as_one_document() {
    let mut heap = ItemHeap::new();
    let mut builder = ModuleBuilder::new(&mut heap);
    let int = builder.type_int();
    let x = builder.variable("x", int);
    let ax = builder.variable_copy(x);
    let zero = builder.constant_int(0);
    let ge = builder.greater_or_equal(ax, zero);
    let assert_stmt = builder.assert_stmt(ge);
    let ret = builder.return_stmt(&[]);
    let body = builder.block(&[assert_stmt, ret]);
    let f = builder.function("f", &[x], &[], &[], &[], body);
    let unit = builder.unit("main", &[f]);
    builder.module("main", &[unit]);

    let outcome = compile(&mut heap);
    let document = outcome.assertion.unwrap().to_json();
    let obligations = document["obligations"].as_array().unwrap();
    assert_eq!(obligations.len(), 1);
    assert_eq!(obligations[0]["kind"], serde_json::json!("Assertion"));
}
