//! The ambiguous implicit coercion check.
//!
//! Wherever a value of inferred type `S` flows into a position declared at
//! type `U`, the runtime representation may need a tag. Walking `U` against
//! `S`, every union encountered must select a unique member for `S`
//! (§selection in `wick-types`); failure to do so is reported as an
//! ambiguous coercion. Runs after flow typing, reading the inferred types
//! it recorded on the expression items.

use wick_base::ErrorCode;
use wick_heap::view::{
    self, AssignView, BindingView, CallableView, CaseView, IfView, InvokeView, LinkView, LoopView,
    ModuleView, ReturnView, StaticVariableView, SwitchView, UnitView, VariableView,
};
use wick_heap::{Diagnostic, ItemHeap, ItemIndex, Opcode};
use wick_types::{
    expand_nominal, lift, select_candidate, LifetimeRelation, Selection, Type,
};

use crate::modified::lval_base;

/// Runs the check over every declaration in the module.
pub fn check_module(heap: &mut ItemHeap) {
    let Some(root) = heap.root() else {
        return;
    };
    if heap.opcode(root) != Opcode::Module {
        return;
    }
    let module = ModuleView::new(heap, root);
    let mut checker = CoercionChecker {
        heap: &*heap,
        lifetimes: LifetimeRelation::new(),
        diagnostics: Vec::new(),
        returns: Vec::new(),
    };
    for unit in module.units {
        let view = UnitView::new(checker.heap, unit);
        for declaration in view.declarations {
            match checker.heap.opcode(declaration) {
                Opcode::Function | Opcode::Method | Opcode::Property => {
                    let callable = CallableView::new(checker.heap, declaration);
                    checker.returns = callable
                        .returns
                        .iter()
                        .map(|&r| {
                            lift(
                                checker.heap,
                                VariableView::new(checker.heap, r).declared_type,
                            )
                        })
                        .collect();
                    checker.check_stmt(callable.body);
                }
                Opcode::StaticVariable => {
                    let view = StaticVariableView::new(checker.heap, declaration);
                    let declared = lift(checker.heap, view.declared_type);
                    checker.check_value(&declared, view.initialiser);
                }
                _ => {}
            }
        }
    }
    let diagnostics = std::mem::take(&mut checker.diagnostics);
    log::debug!("coercion check produced {} diagnostics", diagnostics.len());
    for diagnostic in diagnostics {
        heap.report(diagnostic);
    }
}

struct CoercionChecker<'h> {
    heap: &'h ItemHeap,
    lifetimes: LifetimeRelation,
    diagnostics: Vec<Diagnostic>,
    returns: Vec<Type>,
}

impl<'h> CoercionChecker<'h> {
    fn report(&mut self, item: ItemIndex) {
        self.diagnostics.push(
            Diagnostic::new(ErrorCode::AmbiguousCoercion, self.heap.span_of(item))
                .with_context(item),
        );
    }

    fn check_stmt(&mut self, stmt: ItemIndex) {
        match self.heap.opcode(stmt) {
            Opcode::Block => {
                for statement in view::BlockView::new(self.heap, stmt).statements {
                    self.check_stmt(statement);
                }
            }
            Opcode::NamedBlock => {
                self.check_stmt(view::NamedBlockView::new(self.heap, stmt).body)
            }
            Opcode::Variable => {}
            Opcode::VariableInitialised => {
                let view = VariableView::new(self.heap, stmt);
                let declared = lift(self.heap, view.declared_type);
                if let Some(initialiser) = view.initialiser {
                    self.check_value(&declared, initialiser);
                }
            }
            Opcode::Assign => {
                let view = AssignView::new(self.heap, stmt);
                for (&lval, &rhs) in view.lhs.iter().zip(view.rhs.iter()) {
                    if let Some(declared) = self.lval_declared(lval) {
                        self.check_value(&declared, rhs);
                    }
                }
            }
            Opcode::Assert | Opcode::Assume | Opcode::Debug => {
                self.check_expr(self.heap.get(stmt).operand(0));
            }
            Opcode::Return => {
                let view = ReturnView::new(self.heap, stmt);
                let returns = self.returns.clone();
                for (declared, &operand) in returns.iter().zip(view.operands.iter()) {
                    self.check_value(declared, operand);
                }
            }
            Opcode::If | Opcode::IfElse => {
                let view = IfView::new(self.heap, stmt);
                self.check_expr(view.condition);
                self.check_stmt(view.true_branch);
                if let Some(branch) = view.false_branch {
                    self.check_stmt(branch);
                }
            }
            Opcode::Switch => {
                let view = SwitchView::new(self.heap, stmt);
                self.check_expr(view.condition);
                for case in view.cases {
                    self.check_stmt(CaseView::new(self.heap, case).body);
                }
            }
            Opcode::While | Opcode::DoWhile => {
                let view = LoopView::new(self.heap, stmt);
                self.check_expr(view.condition);
                for invariant in view.invariants {
                    self.check_expr(invariant);
                }
                self.check_stmt(view.body);
            }
            _ => {}
        }
    }

    /// Recursively visits an expression looking for invocation argument
    /// coercions.
    fn check_expr(&mut self, expr: ItemIndex) {
        let opcode = self.heap.opcode(expr);
        if opcode == Opcode::Invoke {
            let invoke = InvokeView::new(self.heap, expr);
            let binding = BindingView::new(self.heap, invoke.binding);
            if let Some(target) = LinkView::new(self.heap, binding.link).target() {
                let callable = CallableView::new(self.heap, target);
                let parameters: Vec<Type> = callable
                    .parameters
                    .iter()
                    .map(|&p| lift(self.heap, VariableView::new(self.heap, p).declared_type))
                    .collect();
                for (declared, &argument) in parameters.iter().zip(invoke.arguments.iter()) {
                    self.check_value(declared, argument);
                }
            }
            return;
        }
        if opcode == Opcode::Link || opcode == Opcode::TypeRecursive || opcode.is_type() {
            return;
        }
        let operands: Vec<ItemIndex> = self.heap.get(expr).operands.iter().copied().collect();
        for operand in operands {
            let op = self.heap.opcode(operand);
            if op.is_expression() || op == Opcode::Tuple {
                self.check_expr(operand);
            }
        }
    }

    /// Checks one value position: walk the declared type against the
    /// expression's inferred type.
    fn check_value(&mut self, declared: &Type, expr: ItemIndex) {
        self.check_expr(expr);
        if let Some(inferred) = self.inferred_type(expr) {
            self.walk(declared, &inferred, expr, 16);
        }
    }

    fn walk(&mut self, declared: &Type, inferred: &Type, site: ItemIndex, fuel: usize) {
        if fuel == 0 {
            return;
        }
        match declared {
            Type::Union(members) => {
                match select_candidate(self.heap, &self.lifetimes, members, inferred) {
                    Selection::Ambiguous(_) => self.report(site),
                    Selection::Selected(member) => self.walk(&member, inferred, site, fuel - 1),
                    Selection::NoMatch => {}
                }
            }
            Type::Nominal(nominal) => {
                if let Some((_, expanded)) = expand_nominal(self.heap, nominal) {
                    self.walk(&expanded, inferred, site, fuel - 1);
                }
            }
            Type::Array(element) => {
                if let Type::Array(actual) = inferred {
                    self.walk(element, actual, site, fuel - 1);
                }
            }
            Type::Record(record) => {
                if let Type::Record(actual) = inferred {
                    for (name, declared_field) in &record.fields {
                        if let Some(actual_field) = actual.field(*name) {
                            self.walk(declared_field, actual_field, site, fuel - 1);
                        }
                    }
                }
            }
            Type::Reference(element, _) => {
                if let Type::Reference(actual, _) = inferred {
                    self.walk(element, actual, site, fuel - 1);
                }
            }
            _ => {}
        }
    }

    /// The inferred type flow typing recorded for an expression.
    fn inferred_type(&self, expr: ItemIndex) -> Option<Type> {
        if let Some(slot) = view::expression_type(self.heap, expr) {
            return Some(lift(self.heap, slot));
        }
        if let Some(types) = view::expression_types(self.heap, expr) {
            return match types.as_slice() {
                [single] => Some(lift(self.heap, *single)),
                _ => None,
            };
        }
        // boolean-valued forms carry no slot
        if self.heap.opcode(expr).is_expression() {
            Some(Type::Bool)
        } else {
            None
        }
    }

    fn lval_declared(&self, lval: ItemIndex) -> Option<Type> {
        match self.heap.opcode(lval) {
            Opcode::VariableCopy | Opcode::VariableMove => {
                let declaration = lval_base(self.heap, lval)?;
                let view = VariableView::new(self.heap, declaration);
                Some(lift(self.heap, view.declared_type))
            }
            Opcode::StaticVariableAccess => {
                let link = self.heap.get(lval).operand(1);
                let target = LinkView::new(self.heap, link).target()?;
                Some(lift(
                    self.heap,
                    StaticVariableView::new(self.heap, target).declared_type,
                ))
            }
            _ => None,
        }
    }
}
