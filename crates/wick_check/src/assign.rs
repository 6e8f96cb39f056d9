//! Definite assignment and unassignment.
//!
//! A forward flow analysis with a three-valued assignment state per
//! variable. Uses of variables that may be unassigned are reported; so are
//! reassignments of parameters and of `final` variables (the unassignment
//! half: a final variable must never be assignable twice, which includes
//! any assignment inside a loop body).
//!
//! Branch joins intersect: a variable is definitely assigned after a
//! conditional only when every incoming path assigned it.

use std::collections::HashMap;

use wick_base::ErrorCode;
use wick_heap::view::{
    self, name_of, AssignView, CallableView, CaseView, IfView, LoopView, ModuleView,
    QuantifierView, ReturnView, SwitchView, UnitView, VariableView,
};
use wick_heap::{Diagnostic, ItemHeap, ItemIndex, Modifiers, Opcode};

use crate::modified::lval_base;

/// Runs the analysis over every callable in the module.
pub fn check_module(heap: &mut ItemHeap) {
    let Some(root) = heap.root() else {
        return;
    };
    if heap.opcode(root) != Opcode::Module {
        return;
    }
    let module = ModuleView::new(heap, root);
    let mut checker = AssignmentChecker {
        heap: &*heap,
        diagnostics: Vec::new(),
    };
    for unit in module.units {
        let view = UnitView::new(checker.heap, unit);
        for declaration in view.declarations {
            if matches!(
                checker.heap.opcode(declaration),
                Opcode::Function | Opcode::Method | Opcode::Property
            ) {
                checker.check_callable(declaration);
            }
        }
    }
    let diagnostics = std::mem::take(&mut checker.diagnostics);
    for diagnostic in diagnostics {
        heap.report(diagnostic);
    }
}

/// Assignment knowledge about one variable on the current path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assigned {
    No,
    Maybe,
    Yes,
}

impl Assigned {
    fn join(self, other: Assigned) -> Assigned {
        if self == other {
            self
        } else {
            Assigned::Maybe
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct VarInfo {
    assigned: Assigned,
    is_final: bool,
    is_parameter: bool,
}

type State = HashMap<ItemIndex, VarInfo>;

enum Flow {
    Cont(State),
    Halt,
}

struct AssignmentChecker<'h> {
    heap: &'h ItemHeap,
    diagnostics: Vec<Diagnostic>,
}

impl<'h> AssignmentChecker<'h> {
    fn report(&mut self, code: ErrorCode, item: ItemIndex) {
        self.diagnostics
            .push(Diagnostic::new(code, self.heap.span_of(item)).with_context(item));
    }

    fn check_callable(&mut self, declaration: ItemIndex) {
        let view = CallableView::new(self.heap, declaration);
        log::trace!(
            "definite assignment over {}",
            self.heap.resolve(name_of(self.heap, view.name))
        );
        let mut state = State::new();
        for &parameter in &view.parameters {
            state.insert(
                parameter,
                VarInfo {
                    assigned: Assigned::Yes,
                    is_final: true,
                    is_parameter: true,
                },
            );
        }
        self.check_stmt(state, declaration, false);
    }

    fn declare(&self, state: &mut State, declaration: ItemIndex, assigned: bool) {
        let view = VariableView::new(self.heap, declaration);
        let flags = view::modifiers_of(self.heap, view.modifiers);
        state.insert(
            declaration,
            VarInfo {
                assigned: if assigned { Assigned::Yes } else { Assigned::No },
                is_final: flags.contains(Modifiers::FINAL),
                is_parameter: false,
            },
        );
    }

    /// Checks one statement. `in_loop` is true inside any loop body, where
    /// every assignment may repeat.
    fn check_stmt(&mut self, mut state: State, stmt: ItemIndex, in_loop: bool) -> Flow {
        match self.heap.opcode(stmt) {
            Opcode::Function | Opcode::Method | Opcode::Property => {
                let view = CallableView::new(self.heap, stmt);
                self.check_stmt(state, view.body, false)
            }
            Opcode::Block => {
                let statements = view::BlockView::new(self.heap, stmt).statements;
                for statement in statements {
                    match self.check_stmt(state, statement, in_loop) {
                        Flow::Cont(next) => state = next,
                        Flow::Halt => return Flow::Halt,
                    }
                }
                Flow::Cont(state)
            }
            Opcode::NamedBlock => {
                let view = view::NamedBlockView::new(self.heap, stmt);
                self.check_stmt(state, view.body, in_loop)
            }
            Opcode::Variable | Opcode::VariableInitialised => {
                let view = VariableView::new(self.heap, stmt);
                if let Some(initialiser) = view.initialiser {
                    self.check_expr(&state, initialiser);
                }
                self.declare(&mut state, stmt, view.initialiser.is_some());
                Flow::Cont(state)
            }
            Opcode::Assign => {
                let view = AssignView::new(self.heap, stmt);
                for &rhs in &view.rhs {
                    self.check_expr(&state, rhs);
                }
                for &lval in &view.lhs {
                    self.check_lval(&mut state, lval, in_loop);
                }
                Flow::Cont(state)
            }
            Opcode::Assert | Opcode::Assume | Opcode::Debug => {
                self.check_expr(&state, self.heap.get(stmt).operand(0));
                Flow::Cont(state)
            }
            Opcode::Return => {
                let view = ReturnView::new(self.heap, stmt);
                for &operand in &view.operands {
                    self.check_expr(&state, operand);
                }
                Flow::Halt
            }
            Opcode::Skip => Flow::Cont(state),
            Opcode::Break | Opcode::Continue | Opcode::Fail => Flow::Halt,
            Opcode::If | Opcode::IfElse => {
                let view = IfView::new(self.heap, stmt);
                self.check_expr(&state, view.condition);
                let true_flow = self.check_stmt(state.clone(), view.true_branch, in_loop);
                let false_flow = match view.false_branch {
                    Some(branch) => self.check_stmt(state.clone(), branch, in_loop),
                    None => Flow::Cont(state),
                };
                match (true_flow, false_flow) {
                    (Flow::Cont(t), Flow::Cont(f)) => Flow::Cont(join(&t, &f)),
                    (Flow::Cont(t), Flow::Halt) => Flow::Cont(t),
                    (Flow::Halt, Flow::Cont(f)) => Flow::Cont(f),
                    (Flow::Halt, Flow::Halt) => Flow::Halt,
                }
            }
            Opcode::Switch => {
                let view = SwitchView::new(self.heap, stmt);
                self.check_expr(&state, view.condition);
                let mut outcomes = Vec::new();
                let mut has_default = false;
                for case in view.cases {
                    let case_view = CaseView::new(self.heap, case);
                    has_default |= case_view.is_default();
                    for &value in &case_view.values {
                        self.check_expr(&state, value);
                    }
                    if let Flow::Cont(next) = self.check_stmt(state.clone(), case_view.body, in_loop)
                    {
                        outcomes.push(next);
                    }
                }
                if !has_default {
                    outcomes.push(state);
                }
                let mut iter = outcomes.into_iter();
                match iter.next() {
                    Some(first) => Flow::Cont(iter.fold(first, |acc, next| join(&acc, &next))),
                    None => Flow::Halt,
                }
            }
            Opcode::While | Opcode::DoWhile => {
                let view = LoopView::new(self.heap, stmt);
                for &invariant in &view.invariants {
                    self.check_expr(&state, invariant);
                }
                self.check_expr(&state, view.condition);
                // the body may repeat: every assignment inside counts as a
                // potential reassignment
                match self.check_stmt(state.clone(), view.body, true) {
                    Flow::Cont(after_body) => {
                        // a while body may not run at all; a do-while runs
                        // at least once
                        if self.heap.opcode(stmt) == Opcode::DoWhile {
                            Flow::Cont(after_body)
                        } else {
                            Flow::Cont(join(&state, &after_body))
                        }
                    }
                    Flow::Halt => Flow::Cont(state),
                }
            }
            _ => Flow::Cont(state),
        }
    }

    fn check_lval(&mut self, state: &mut State, lval: ItemIndex, in_loop: bool) {
        match self.heap.opcode(lval) {
            Opcode::VariableCopy | Opcode::VariableMove => {
                let declaration = self.heap.get(lval).operand(1);
                let Some(info) = state.get(&declaration).copied() else {
                    return;
                };
                if info.is_parameter {
                    self.report(ErrorCode::ParameterReassigned, lval);
                } else if info.is_final && (info.assigned != Assigned::No || in_loop) {
                    self.report(ErrorCode::FinalVariableReassigned, lval);
                }
                state.entry(declaration).and_modify(|entry| {
                    entry.assigned = Assigned::Yes;
                });
            }
            Opcode::StaticVariableAccess => {}
            _ => {
                // element updates read the base before writing it
                if let Some(declaration) = lval_base(self.heap, lval) {
                    self.require_assigned(state, declaration, lval);
                }
                // and the index/field operands are ordinary uses
                let operands: Vec<ItemIndex> =
                    self.heap.get(lval).operands.iter().copied().collect();
                for operand in operands.into_iter().skip(2) {
                    if self.heap.opcode(operand).is_expression() {
                        self.check_expr(state, operand);
                    }
                }
            }
        }
    }

    fn require_assigned(&mut self, state: &State, declaration: ItemIndex, site: ItemIndex) {
        if let Some(info) = state.get(&declaration) {
            if info.assigned != Assigned::Yes {
                self.report(ErrorCode::VariablePossiblyUninitialised, site);
            }
        }
    }

    /// Walks the value operands of an expression, checking every variable
    /// use. Declarations, links, and type operands are not traversed.
    fn check_expr(&mut self, state: &State, expr: ItemIndex) {
        match self.heap.opcode(expr) {
            Opcode::VariableCopy | Opcode::VariableMove => {
                let declaration = self.heap.get(expr).operand(1);
                self.require_assigned(state, declaration, expr);
            }
            Opcode::Constant | Opcode::StaticVariableAccess | Opcode::LambdaAccess => {}
            Opcode::Invoke => {
                for argument in view::InvokeView::new(self.heap, expr).arguments {
                    self.check_expr(state, argument);
                }
            }
            Opcode::IndirectInvoke => {
                let view = view::IndirectInvokeView::new(self.heap, expr);
                self.check_expr(state, view.callee);
                for argument in view.arguments {
                    self.check_expr(state, argument);
                }
            }
            Opcode::LogicalAnd | Opcode::LogicalOr | Opcode::BitwiseAnd | Opcode::BitwiseOr
            | Opcode::BitwiseXor => {
                let tuple_position = if self.heap.opcode(expr) == Opcode::LogicalAnd
                    || self.heap.opcode(expr) == Opcode::LogicalOr
                {
                    0
                } else {
                    1
                };
                let operands =
                    view::tuple_elements(self.heap, self.heap.get(expr).operand(tuple_position));
                for operand in operands {
                    self.check_expr(state, operand);
                }
            }
            Opcode::UniversalQuantifier | Opcode::ExistentialQuantifier => {
                let view = QuantifierView::new(self.heap, expr);
                let mut inner = state.clone();
                for &parameter in &view.parameters {
                    let var = VariableView::new(self.heap, parameter);
                    if let Some(initialiser) = var.initialiser {
                        self.check_expr(&inner, initialiser);
                    }
                    self.declare(&mut inner, parameter, true);
                }
                self.check_expr(&inner, view.body);
            }
            Opcode::LogicalNot => {
                self.check_expr(state, self.heap.get(expr).operand(0));
            }
            Opcode::LogicalImplication
            | Opcode::LogicalIff
            | Opcode::Equal
            | Opcode::NotEqual
            | Opcode::IntegerLessThan
            | Opcode::IntegerLessThanOrEqual
            | Opcode::IntegerGreaterThan
            | Opcode::IntegerGreaterThanOrEqual => {
                self.check_expr(state, self.heap.get(expr).operand(0));
                self.check_expr(state, self.heap.get(expr).operand(1));
            }
            Opcode::Is => {
                self.check_expr(state, self.heap.get(expr).operand(0));
            }
            Opcode::RecordInitialiser => {
                let view = view::RecordInitialiserView::new(self.heap, expr);
                for value in view.values {
                    self.check_expr(state, value);
                }
            }
            Opcode::ArrayInitialiser => {
                let values =
                    view::tuple_elements(self.heap, self.heap.get(expr).operand(1));
                for value in values {
                    self.check_expr(state, value);
                }
            }
            // remaining expressions: a type slot at 0, values after
            other if other.is_expression() => {
                let operands: Vec<ItemIndex> =
                    self.heap.get(expr).operands.iter().copied().collect();
                for operand in operands.into_iter().skip(1) {
                    if self.heap.opcode(operand).is_expression() {
                        self.check_expr(state, operand);
                    }
                }
            }
            _ => {}
        }
    }
}

fn join(left: &State, right: &State) -> State {
    let mut out = State::new();
    for (declaration, a) in left {
        if let Some(b) = right.get(declaration) {
            out.insert(
                *declaration,
                VarInfo {
                    assigned: a.assigned.join(b.assigned),
                    is_final: a.is_final,
                    is_parameter: a.is_parameter,
                },
            );
        }
    }
    out
}
