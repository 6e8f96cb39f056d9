//! Flow-sensitive type checking.
//!
//! The type of a variable at a program point is its declared type refined by
//! the `is`-tests along the path leading there. The pass walks every
//! callable body once, threading a [`FlowEnv`] through the statements:
//! branches refine, joins union, loop heads havoc whatever the body may
//! redefine. Inferred expression types are written back into the heap so
//! later passes (coercion checking, versioning, verification) can read them
//! off the items.
//!
//! User-facing problems become diagnostics on the module; the pass keeps
//! going on a best-effort basis after reporting one.

use wick_base::{ErrorCode, Symbol};
use wick_heap::view::{
    self, name_of, AssignView, BindingView, CallableView, CaseView, IfView, InvokeView,
    IndirectInvokeView, LinkView, LoopView, ModuleView, QuantifierView, RecordInitialiserView,
    ReturnView, StaticVariableView, SwitchView, TypeAliasView, UnitView, VariableView,
};
use wick_heap::{Diagnostic, ItemHeap, ItemIndex, Opcode};
use wick_types::{
    expand_nominal, is_empty, is_subtype, lift, lower, substitute, Binding, Callable,
    LifetimeRelation, Type,
};

use crate::env::FlowEnv;
use crate::modified::{lval_base, modified_variables};

/// Runs flow typing over every declaration in the module.
pub fn check_module(heap: &mut ItemHeap) {
    let Some(root) = heap.root() else {
        return;
    };
    if heap.opcode(root) != Opcode::Module {
        return;
    }
    let module = ModuleView::new(heap, root);
    let mut checker = FlowTyping {
        heap: &mut *heap,
        lifetimes: LifetimeRelation::new(),
        scopes: Vec::new(),
        diagnostics: Vec::new(),
        returns: Vec::new(),
    };
    for unit in module.units {
        checker.check_unit(unit);
    }
    let diagnostics = std::mem::take(&mut checker.diagnostics);
    log::debug!("flow typing produced {} diagnostics", diagnostics.len());
    for diagnostic in diagnostics {
        heap.report(diagnostic);
    }
}

struct FlowTyping<'h> {
    heap: &'h mut ItemHeap,
    lifetimes: LifetimeRelation,
    /// The named lifetimes lexically enclosing the current statement,
    /// innermost last. A lifetime introduced while this is non-empty nests
    /// inside the top, which is what gives [`LifetimeRelation::outlives`]
    /// the enclosing-scope order reference subtyping relies on.
    scopes: Vec<Symbol>,
    diagnostics: Vec<Diagnostic>,
    /// Declared return types of the callable currently being checked.
    returns: Vec<Type>,
}

/// Result of checking one statement.
enum Flow {
    /// Control continues with the given environment.
    Cont(FlowEnv),
    /// All paths returned, failed, or left the enclosing loop.
    Halt,
}

impl<'h> FlowTyping<'h> {
    fn report(&mut self, code: ErrorCode, item: ItemIndex) {
        self.diagnostics
            .push(Diagnostic::new(code, self.heap.span_of(item)).with_context(item));
    }

    fn subtype(&self, upper: &Type, lower: &Type) -> bool {
        is_subtype(self.heap, &self.lifetimes, upper, lower)
    }

    /// Introduces a named lifetime at the current lexical position: nested
    /// inside the innermost enclosing scope when there is one, free-standing
    /// otherwise. The caller pushes it onto `scopes` while checking the
    /// statements it covers.
    fn introduce_lifetime(&mut self, lifetime: Symbol) {
        match self.scopes.last() {
            Some(&enclosing) => self.lifetimes.nest(lifetime, enclosing),
            None => self.lifetimes.declare(lifetime),
        }
    }

    fn check_unit(&mut self, unit: ItemIndex) {
        let view = UnitView::new(self.heap, unit);
        for declaration in view.declarations {
            match self.heap.opcode(declaration) {
                Opcode::Function | Opcode::Method | Opcode::Property => {
                    self.check_callable(declaration)
                }
                Opcode::StaticVariable => self.check_static(declaration),
                Opcode::TypeAlias => self.check_alias(declaration),
                Opcode::Lambda => self.check_lambda(declaration),
                _ => {}
            }
        }
    }

    fn check_lambda(&mut self, declaration: ItemIndex) {
        let view = view::LambdaView::new(self.heap, declaration);
        let mut env = FlowEnv::new();
        for &parameter in &view.parameters {
            let var = VariableView::new(self.heap, parameter);
            let ty = lift(self.heap, var.declared_type);
            env.declare(parameter, ty, true);
        }
        self.returns = view
            .returns
            .iter()
            .map(|&r| lift(self.heap, VariableView::new(self.heap, r).declared_type))
            .collect();
        let depth = self.scopes.len();
        // the declared lifetimes are siblings: each nests inside whatever
        // encloses the lambda, never inside one another
        let enclosing = self.scopes.last().copied();
        for &lifetime in &view.declared_lifetimes {
            let lifetime = name_of(self.heap, lifetime);
            match enclosing {
                Some(outer) => self.lifetimes.nest(lifetime, outer),
                None => self.lifetimes.declare(lifetime),
            }
            self.scopes.push(lifetime);
        }
        let outcome = self.check_stmt(env, view.body);
        self.scopes.truncate(depth);
        if let Flow::Cont(_) = outcome {
            if !view.returns.is_empty() {
                self.report(ErrorCode::MissingReturn, declaration);
            }
        }
    }

    fn check_static(&mut self, declaration: ItemIndex) {
        let view = StaticVariableView::new(self.heap, declaration);
        let declared = lift(self.heap, view.declared_type);
        let env = FlowEnv::new();
        let actual = self.check_expr(&env, view.initialiser);
        if !self.subtype(&declared, &actual) {
            self.report(ErrorCode::SubtypeError, view.initialiser);
        }
    }

    fn check_alias(&mut self, declaration: ItemIndex) {
        let view = TypeAliasView::new(self.heap, declaration);
        let var = VariableView::new(self.heap, view.var);
        let declared = lift(self.heap, var.declared_type);
        if is_empty(self.heap, &self.lifetimes, &declared) {
            self.report(ErrorCode::EmptyType, declaration);
        }
        let mut env = FlowEnv::new();
        env.declare(view.var, declared, true);
        for invariant in view.invariants {
            self.check_condition(&env, invariant);
        }
    }

    fn check_callable(&mut self, declaration: ItemIndex) {
        let view = CallableView::new(self.heap, declaration);
        log::trace!(
            "flow typing {:?} {}",
            view.opcode,
            self.heap.resolve(name_of(self.heap, view.name))
        );
        let mut env = FlowEnv::new();
        for &parameter in &view.parameters {
            let var = VariableView::new(self.heap, parameter);
            let ty = lift(self.heap, var.declared_type);
            env.declare(parameter, ty, true);
        }
        for &ret in &view.returns {
            let var = VariableView::new(self.heap, ret);
            let ty = lift(self.heap, var.declared_type);
            env.declare(ret, ty, false);
        }
        self.returns = view
            .returns
            .iter()
            .map(|&r| lift(self.heap, VariableView::new(self.heap, r).declared_type))
            .collect();

        // preconditions are assumed true on entry
        for &requires in &view.requires {
            self.check_condition(&env, requires);
            env = self.refine(&env, requires, true);
        }

        let outcome = self.check_stmt(env, view.body);
        if let Flow::Cont(_) = outcome {
            if !view.returns.is_empty() {
                self.report(ErrorCode::MissingReturn, declaration);
            }
        }

        // postconditions must be well-typed over parameters and returns
        let mut post_env = FlowEnv::new();
        for &parameter in view.parameters.iter().chain(view.returns.iter()) {
            let var = VariableView::new(self.heap, parameter);
            let ty = lift(self.heap, var.declared_type);
            post_env.declare(parameter, ty, true);
        }
        for &ensures in &view.ensures {
            self.check_condition(&post_env, ensures);
        }
    }

    // ---- Statements ----

    fn check_stmt(&mut self, env: FlowEnv, stmt: ItemIndex) -> Flow {
        match self.heap.opcode(stmt) {
            Opcode::Block => self.check_block(env, stmt),
            Opcode::NamedBlock => {
                let view = view::NamedBlockView::new(self.heap, stmt);
                let lifetime = name_of(self.heap, view.lifetime);
                self.introduce_lifetime(lifetime);
                self.scopes.push(lifetime);
                let outcome = self.check_stmt(env, view.body);
                self.scopes.pop();
                outcome
            }
            Opcode::Variable | Opcode::VariableInitialised => {
                self.check_declaration(env, stmt)
            }
            Opcode::Assert | Opcode::Assume => {
                let condition = self.heap.get(stmt).operand(0);
                self.check_condition(&env, condition);
                Flow::Cont(self.refine(&env, condition, true))
            }
            Opcode::Assign => self.check_assign(env, stmt),
            Opcode::Skip => Flow::Cont(env),
            Opcode::Debug => {
                let operand = self.heap.get(stmt).operand(0);
                self.check_expr(&env, operand);
                Flow::Cont(env)
            }
            Opcode::Break | Opcode::Continue | Opcode::Fail => Flow::Halt,
            Opcode::Return => self.check_return(env, stmt),
            Opcode::If | Opcode::IfElse => self.check_if(env, stmt),
            Opcode::Switch => self.check_switch(env, stmt),
            Opcode::While | Opcode::DoWhile => self.check_loop(env, stmt),
            other => {
                debug_assert!(!other.is_statement(), "unhandled statement {:?}", other);
                Flow::Cont(env)
            }
        }
    }

    fn check_block(&mut self, mut env: FlowEnv, block: ItemIndex) -> Flow {
        let statements = view::BlockView::new(self.heap, block).statements;
        for (position, &statement) in statements.iter().enumerate() {
            match self.check_stmt(env, statement) {
                Flow::Cont(next) => env = next,
                Flow::Halt => {
                    if position + 1 < statements.len() {
                        self.report(ErrorCode::UnreachableCode, statements[position + 1]);
                    }
                    return Flow::Halt;
                }
            }
        }
        Flow::Cont(env)
    }

    fn check_declaration(&mut self, mut env: FlowEnv, stmt: ItemIndex) -> Flow {
        let view = VariableView::new(self.heap, stmt);
        let declared = lift(self.heap, view.declared_type);
        if is_empty(self.heap, &self.lifetimes, &declared) {
            self.report(ErrorCode::EmptyType, stmt);
        }
        match view.initialiser {
            Some(initialiser) => {
                let actual = self.check_expr(&env, initialiser);
                if !self.subtype(&declared, &actual) {
                    self.report(ErrorCode::SubtypeError, initialiser);
                }
                env.declare(stmt, declared.clone(), true);
                // the initialiser's type is the variable's first refinement
                if self.subtype(&declared, &actual) {
                    env.refine(stmt, actual);
                }
            }
            None => env.declare(stmt, declared, false),
        }
        Flow::Cont(env)
    }

    fn check_assign(&mut self, mut env: FlowEnv, stmt: ItemIndex) -> Flow {
        let view = AssignView::new(self.heap, stmt);
        let rhs = self.check_values(&env, &view.rhs);
        if rhs.len() != view.lhs.len() {
            self.report(ErrorCode::InsufficientArguments, stmt);
            return Flow::Cont(env);
        }
        for (&lval, actual) in view.lhs.iter().zip(rhs) {
            match self.lval_type(&env, lval) {
                Some(declared) => {
                    if !self.subtype(&declared, &actual) {
                        self.report(ErrorCode::SubtypeError, lval);
                    }
                    if let Some(declaration) = lval_base(self.heap, lval) {
                        match self.heap.opcode(lval) {
                            Opcode::VariableCopy | Opcode::VariableMove => {
                                env.assign(declaration, actual)
                            }
                            // element updates keep the declared type
                            _ => env.assign(
                                declaration,
                                env.get(declaration)
                                    .map(|s| s.declared.clone())
                                    .unwrap_or(Type::Any),
                            ),
                        }
                    }
                }
                None => self.report(ErrorCode::InvalidLVal, lval),
            }
        }
        Flow::Cont(env)
    }

    /// The declared type an lval expects, or `None` when the expression is
    /// not assignable.
    fn lval_type(&mut self, env: &FlowEnv, lval: ItemIndex) -> Option<Type> {
        match self.heap.opcode(lval) {
            Opcode::VariableCopy | Opcode::VariableMove => {
                let declaration = self.heap.get(lval).operand(1);
                env.get(declaration).map(|status| status.declared.clone())
            }
            Opcode::StaticVariableAccess => {
                let link = self.heap.get(lval).operand(1);
                let target = LinkView::new(self.heap, link).target()?;
                let view = StaticVariableView::new(self.heap, target);
                Some(lift(self.heap, view.declared_type))
            }
            Opcode::ArrayAccess => {
                let source = self.heap.get(lval).operand(1);
                let index = self.heap.get(lval).operand(2);
                let source_type = self.check_expr(env, source);
                let index_type = self.check_expr(env, index);
                if !self.subtype(&Type::Int, &index_type) {
                    self.report(ErrorCode::SubtypeError, index);
                }
                match self.element_type(&source_type) {
                    Some(element) => Some(element),
                    None => {
                        self.report(ErrorCode::ExpectedArray, source);
                        None
                    }
                }
            }
            Opcode::RecordAccess => {
                let source = self.heap.get(lval).operand(1);
                let field = name_of(self.heap, self.heap.get(lval).operand(2));
                let source_type = self.check_expr(env, source);
                match self.field_type(&source_type, field) {
                    Some(ty) => Some(ty),
                    None => {
                        self.report(ErrorCode::InvalidField, lval);
                        None
                    }
                }
            }
            Opcode::Dereference => {
                let source = self.heap.get(lval).operand(1);
                let source_type = self.check_expr(env, source);
                match self.reference_element(&source_type) {
                    Some(element) => Some(element),
                    None => {
                        self.report(ErrorCode::ExpectedReference, source);
                        None
                    }
                }
            }
            _ => None,
        }
    }

    fn check_return(&mut self, env: FlowEnv, stmt: ItemIndex) -> Flow {
        let view = ReturnView::new(self.heap, stmt);
        let actual = self.check_values(&env, &view.operands);
        let declared = self.returns.clone();
        if actual.len() > declared.len() {
            self.report(ErrorCode::TooManyReturns, stmt);
        } else if actual.len() < declared.len() {
            self.report(ErrorCode::InsufficientReturns, stmt);
        }
        for (expected, found) in declared.iter().zip(&actual) {
            if !self.subtype(expected, found) {
                self.report(ErrorCode::SubtypeError, stmt);
            }
        }
        Flow::Halt
    }

    fn check_if(&mut self, env: FlowEnv, stmt: ItemIndex) -> Flow {
        let view = IfView::new(self.heap, stmt);
        self.check_condition(&env, view.condition);
        self.check_determined_branch(&env, view.condition, stmt);

        let true_env = self.refine(&env, view.condition, true);
        let false_env = self.refine(&env, view.condition, false);
        let true_flow = self.check_stmt(true_env, view.true_branch);
        let false_flow = match view.false_branch {
            Some(branch) => self.check_stmt(false_env, branch),
            None => Flow::Cont(false_env),
        };
        match (true_flow, false_flow) {
            (Flow::Cont(t), Flow::Cont(f)) => Flow::Cont(t.join(&f)),
            (Flow::Cont(t), Flow::Halt) => Flow::Cont(t),
            (Flow::Halt, Flow::Cont(f)) => Flow::Cont(f),
            (Flow::Halt, Flow::Halt) => Flow::Halt,
        }
    }

    /// Reports a condition whose `is`-test is decided by the static types
    /// alone.
    fn check_determined_branch(&mut self, env: &FlowEnv, condition: ItemIndex, stmt: ItemIndex) {
        if self.heap.opcode(condition) != Opcode::Is {
            return;
        }
        let operand = self.heap.get(condition).operand(0);
        let test = lift(self.heap, self.heap.get(condition).operand(1));
        let declaration = match self.heap.opcode(operand) {
            Opcode::VariableCopy | Opcode::VariableMove => self.heap.get(operand).operand(1),
            _ => return,
        };
        let Some(current) = env.type_of(declaration).cloned() else {
            return;
        };
        let always = self.subtype(&test, &current);
        let never = is_empty(
            self.heap,
            &self.lifetimes,
            &Type::Intersection(vec![current, test]),
        );
        if always || never {
            self.report(ErrorCode::BranchAlwaysTaken, stmt);
        }
    }

    fn check_switch(&mut self, env: FlowEnv, stmt: ItemIndex) -> Flow {
        let view = SwitchView::new(self.heap, stmt);
        let subject = self.check_expr(&env, view.condition);
        let mut outcomes: Vec<FlowEnv> = Vec::new();
        let mut has_default = false;
        for &case in &view.cases {
            let case_view = CaseView::new(self.heap, case);
            has_default |= case_view.is_default();
            for &value in &case_view.values {
                let value_type = self.check_expr(&env, value);
                if self.disjoint(&subject, &value_type) {
                    self.report(ErrorCode::IncomparableOperands, value);
                }
            }
            if let Flow::Cont(next) = self.check_stmt(env.clone(), case_view.body) {
                outcomes.push(next);
            }
        }
        if !has_default {
            // the implicit empty branch falls through unchanged
            outcomes.push(env);
        }
        let mut iter = outcomes.into_iter();
        match iter.next() {
            Some(first) => Flow::Cont(iter.fold(first, |acc, next| acc.join(&next))),
            None => Flow::Halt,
        }
    }

    fn check_loop(&mut self, env: FlowEnv, stmt: ItemIndex) -> Flow {
        let view = LoopView::new(self.heap, stmt);
        let modified = modified_variables(self.heap, view.body);

        // invariants must hold (and be boolean) on entry
        for &invariant in &view.invariants {
            self.check_condition(&env, invariant);
        }

        // the body sees havocked state constrained by invariant and guard
        let mut body_env = env.clone();
        body_env.havoc(&modified);
        self.check_condition(&body_env, view.condition);
        for &invariant in &view.invariants {
            body_env = self.refine(&body_env, invariant, true);
        }
        let guarded = self.refine(&body_env, view.condition, true);
        let _ = self.check_stmt(guarded, view.body);

        // after the loop: havocked state, invariant, negated guard
        let mut after = env;
        after.havoc(&modified);
        for &invariant in &view.invariants {
            after = self.refine(&after, invariant, true);
        }
        after = self.refine(&after, view.condition, false);
        Flow::Cont(after)
    }

    // ---- Conditions and refinement ----

    fn check_condition(&mut self, env: &FlowEnv, condition: ItemIndex) {
        let ty = self.check_expr(env, condition);
        if !self.subtype(&Type::Bool, &ty) {
            self.report(ErrorCode::SubtypeError, condition);
        }
    }

    /// The environment refined by assuming `condition` has the given truth
    /// value.
    fn refine(&mut self, env: &FlowEnv, condition: ItemIndex, positive: bool) -> FlowEnv {
        match self.heap.opcode(condition) {
            Opcode::LogicalNot => {
                let operand = self.heap.get(condition).operand(0);
                self.refine(env, operand, !positive)
            }
            Opcode::LogicalAnd => {
                let operands = view::tuple_elements(self.heap, self.heap.get(condition).operand(0));
                if positive {
                    operands
                        .into_iter()
                        .fold(env.clone(), |acc, op| self.refine(&acc, op, true))
                } else {
                    // ¬(a ∧ b) = ¬a ∨ ¬b
                    self.join_refinements(env, &operands, false)
                }
            }
            Opcode::LogicalOr => {
                let operands = view::tuple_elements(self.heap, self.heap.get(condition).operand(0));
                if positive {
                    self.join_refinements(env, &operands, true)
                } else {
                    operands
                        .into_iter()
                        .fold(env.clone(), |acc, op| self.refine(&acc, op, false))
                }
            }
            Opcode::Is => self.refine_is(env, condition, positive),
            _ => env.clone(),
        }
    }

    fn join_refinements(
        &mut self,
        env: &FlowEnv,
        operands: &[ItemIndex],
        positive: bool,
    ) -> FlowEnv {
        let mut refined: Option<FlowEnv> = None;
        for &operand in operands {
            let branch = self.refine(env, operand, positive);
            refined = Some(match refined {
                Some(acc) => acc.join(&branch),
                None => branch,
            });
        }
        refined.unwrap_or_else(|| env.clone())
    }

    fn refine_is(&mut self, env: &FlowEnv, condition: ItemIndex, positive: bool) -> FlowEnv {
        let operand = self.heap.get(condition).operand(0);
        let test = lift(self.heap, self.heap.get(condition).operand(1));
        let declaration = match self.heap.opcode(operand) {
            Opcode::VariableCopy | Opcode::VariableMove => self.heap.get(operand).operand(1),
            _ => return env.clone(),
        };
        let Some(current) = env.type_of(declaration).cloned() else {
            return env.clone();
        };
        let members: Vec<Type> = current
            .union_members()
            .iter()
            .filter(|member| {
                if positive {
                    // keep members that can inhabit the tested type
                    !is_empty(
                        self.heap,
                        &self.lifetimes,
                        &Type::Intersection(vec![(*member).clone(), test.clone()]),
                    )
                } else {
                    // keep members that can escape the tested type
                    !self.subtype(&test, member)
                }
            })
            .cloned()
            .collect();
        let mut refined = env.clone();
        refined.refine(declaration, Type::union_of(members));
        refined
    }

    fn disjoint(&self, a: &Type, b: &Type) -> bool {
        is_empty(
            self.heap,
            &self.lifetimes,
            &Type::Intersection(vec![a.clone(), b.clone()]),
        )
    }

    // ---- Expressions ----

    /// Checks a tuple of value expressions, flattening multi-valued
    /// invocations.
    fn check_values(&mut self, env: &FlowEnv, exprs: &[ItemIndex]) -> Vec<Type> {
        let mut out = Vec::new();
        for &expr in exprs {
            match self.heap.opcode(expr) {
                Opcode::Invoke | Opcode::IndirectInvoke => {
                    out.extend(self.check_multi(env, expr))
                }
                _ => out.push(self.check_expr(env, expr)),
            }
        }
        out
    }

    /// Types an expression, writing the result back into its type slot.
    fn check_expr(&mut self, env: &FlowEnv, expr: ItemIndex) -> Type {
        let ty = self.infer(env, expr);
        if view::expression_type(self.heap, expr).is_some() && !ty.is_semantic_only() {
            let lowered = lower(self.heap, &ty);
            self.heap
                .replace_operand(expr, 0, lowered)
                .expect("expression carries a type slot");
        }
        ty
    }

    fn infer(&mut self, env: &FlowEnv, expr: ItemIndex) -> Type {
        match self.heap.opcode(expr) {
            Opcode::VariableCopy | Opcode::VariableMove => {
                let declaration = self.heap.get(expr).operand(1);
                match env.type_of(declaration) {
                    Some(ty) => ty.clone(),
                    None => {
                        let var = VariableView::new(self.heap, declaration);
                        lift(self.heap, var.declared_type)
                    }
                }
            }
            Opcode::StaticVariableAccess => {
                let link = self.heap.get(expr).operand(1);
                match LinkView::new(self.heap, link).target() {
                    Some(target) if self.heap.opcode(target) == Opcode::StaticVariable => {
                        let view = StaticVariableView::new(self.heap, target);
                        lift(self.heap, view.declared_type)
                    }
                    _ => {
                        self.report(ErrorCode::ResolutionError, expr);
                        Type::Any
                    }
                }
            }
            Opcode::Constant => lift(self.heap, self.heap.get(expr).operand(0)),
            Opcode::Cast => {
                let target = lift(self.heap, self.heap.get(expr).operand(0));
                let operand = self.heap.get(expr).operand(1);
                let actual = self.check_expr(env, operand);
                if self.disjoint(&target, &actual) {
                    self.report(ErrorCode::SubtypeError, expr);
                }
                target
            }
            Opcode::Invoke | Opcode::IndirectInvoke => {
                let types = self.check_multi(env, expr);
                match types.len() {
                    1 => types.into_iter().next().unwrap(),
                    _ => Type::Void,
                }
            }
            Opcode::LogicalNot => {
                let operand = self.heap.get(expr).operand(0);
                self.check_condition(env, operand);
                Type::Bool
            }
            Opcode::LogicalAnd | Opcode::LogicalOr => {
                let operands = view::tuple_elements(self.heap, self.heap.get(expr).operand(0));
                // conjuncts see the refinements of those before them
                let mut flowing = env.clone();
                for operand in operands {
                    self.check_condition(&flowing, operand);
                    if self.heap.opcode(expr) == Opcode::LogicalAnd {
                        flowing = self.refine(&flowing, operand, true);
                    }
                }
                Type::Bool
            }
            Opcode::LogicalImplication | Opcode::LogicalIff => {
                let left = self.heap.get(expr).operand(0);
                let right = self.heap.get(expr).operand(1);
                self.check_condition(env, left);
                let assuming = if self.heap.opcode(expr) == Opcode::LogicalImplication {
                    self.refine(env, left, true)
                } else {
                    env.clone()
                };
                self.check_condition(&assuming, right);
                Type::Bool
            }
            Opcode::UniversalQuantifier | Opcode::ExistentialQuantifier => {
                let view = QuantifierView::new(self.heap, expr);
                let mut inner = env.clone();
                for &parameter in &view.parameters {
                    let var = VariableView::new(self.heap, parameter);
                    let ty = lift(self.heap, var.declared_type);
                    if let Some(initialiser) = var.initialiser {
                        self.check_expr(&inner, initialiser);
                    }
                    inner.declare(parameter, ty, true);
                }
                self.check_condition(&inner, view.body);
                Type::Bool
            }
            Opcode::Equal | Opcode::NotEqual => {
                let left = self.heap.get(expr).operand(0);
                let right = self.heap.get(expr).operand(1);
                let lt = self.check_expr(env, left);
                let rt = self.check_expr(env, right);
                if self.disjoint(&lt, &rt) {
                    self.report(ErrorCode::IncomparableOperands, expr);
                }
                Type::Bool
            }
            Opcode::IntegerLessThan
            | Opcode::IntegerLessThanOrEqual
            | Opcode::IntegerGreaterThan
            | Opcode::IntegerGreaterThanOrEqual => {
                for position in 0..2 {
                    let operand = self.heap.get(expr).operand(position);
                    let ty = self.check_expr(env, operand);
                    if !self.subtype(&Type::Int, &ty) {
                        self.report(ErrorCode::SubtypeError, operand);
                    }
                }
                Type::Bool
            }
            Opcode::Is => {
                let operand = self.heap.get(expr).operand(0);
                self.check_expr(env, operand);
                Type::Bool
            }
            Opcode::IntegerNegation => {
                let operand = self.heap.get(expr).operand(1);
                let ty = self.check_expr(env, operand);
                if !self.subtype(&Type::Int, &ty) {
                    self.report(ErrorCode::SubtypeError, operand);
                }
                Type::Int
            }
            Opcode::IntegerAddition
            | Opcode::IntegerSubtraction
            | Opcode::IntegerMultiplication
            | Opcode::IntegerDivision
            | Opcode::IntegerRemainder => {
                for position in 1..3 {
                    let operand = self.heap.get(expr).operand(position);
                    let ty = self.check_expr(env, operand);
                    if !self.subtype(&Type::Int, &ty) {
                        self.report(ErrorCode::SubtypeError, operand);
                    }
                }
                Type::Int
            }
            Opcode::BitwiseComplement => {
                let operand = self.heap.get(expr).operand(1);
                let ty = self.check_expr(env, operand);
                if !self.subtype(&Type::Byte, &ty) {
                    self.report(ErrorCode::SubtypeError, operand);
                }
                Type::Byte
            }
            Opcode::BitwiseAnd | Opcode::BitwiseOr | Opcode::BitwiseXor => {
                let operands = view::tuple_elements(self.heap, self.heap.get(expr).operand(1));
                for operand in operands {
                    let ty = self.check_expr(env, operand);
                    if !self.subtype(&Type::Byte, &ty) {
                        self.report(ErrorCode::SubtypeError, operand);
                    }
                }
                Type::Byte
            }
            Opcode::ShiftLeft | Opcode::ShiftRight => {
                let value = self.heap.get(expr).operand(1);
                let amount = self.heap.get(expr).operand(2);
                let vt = self.check_expr(env, value);
                if !self.subtype(&Type::Byte, &vt) {
                    self.report(ErrorCode::SubtypeError, value);
                }
                let at = self.check_expr(env, amount);
                if !self.subtype(&Type::Int, &at) {
                    self.report(ErrorCode::SubtypeError, amount);
                }
                Type::Byte
            }
            Opcode::Dereference => {
                let operand = self.heap.get(expr).operand(1);
                let ty = self.check_expr(env, operand);
                match self.reference_element(&ty) {
                    Some(element) => element,
                    None => {
                        self.report(ErrorCode::ExpectedReference, expr);
                        Type::Any
                    }
                }
            }
            Opcode::New => {
                let operand = self.heap.get(expr).operand(1);
                let ty = self.check_expr(env, operand);
                Type::reference(ty)
            }
            Opcode::NewIn => {
                let operand = self.heap.get(expr).operand(1);
                let lifetime = name_of(self.heap, self.heap.get(expr).operand(2));
                let ty = self.check_expr(env, operand);
                Type::reference_in(ty, lifetime)
            }
            Opcode::LambdaAccess => {
                let link = self.heap.get(expr).operand(1);
                match LinkView::new(self.heap, link).target() {
                    Some(target)
                        if matches!(
                            self.heap.opcode(target),
                            Opcode::Function | Opcode::Method | Opcode::Property
                        ) =>
                    {
                        self.callable_type(target)
                    }
                    Some(target) if self.heap.opcode(target) == Opcode::Lambda => {
                        let lambda = view::LambdaView::new(self.heap, target);
                        lift(self.heap, lambda.computed_type)
                    }
                    _ => {
                        self.report(ErrorCode::ResolutionError, expr);
                        Type::Any
                    }
                }
            }
            Opcode::RecordAccess | Opcode::RecordBorrow => {
                let source = self.heap.get(expr).operand(1);
                let field = name_of(self.heap, self.heap.get(expr).operand(2));
                let source_type = self.check_expr(env, source);
                match self.field_type(&source_type, field) {
                    Some(ty) => ty,
                    None => {
                        if self.as_record_like(&source_type) {
                            self.report(ErrorCode::InvalidField, expr);
                        } else {
                            self.report(ErrorCode::ExpectedRecord, expr);
                        }
                        Type::Any
                    }
                }
            }
            Opcode::RecordUpdate => {
                let source = self.heap.get(expr).operand(1);
                let field = name_of(self.heap, self.heap.get(expr).operand(2));
                let value = self.heap.get(expr).operand(3);
                let source_type = self.check_expr(env, source);
                let value_type = self.check_expr(env, value);
                match self.field_type(&source_type, field) {
                    Some(expected) => {
                        if !self.subtype(&expected, &value_type) {
                            self.report(ErrorCode::SubtypeError, value);
                        }
                    }
                    None => self.report(ErrorCode::InvalidField, expr),
                }
                source_type
            }
            Opcode::RecordInitialiser => {
                let view = RecordInitialiserView::new(self.heap, expr);
                let mut fields = Vec::new();
                for (&name, &value) in view.fields.iter().zip(view.values.iter()) {
                    let field = name_of(self.heap, name);
                    let ty = self.check_expr(env, value);
                    fields.push((field, ty));
                }
                Type::record(fields, false)
            }
            Opcode::ArrayAccess | Opcode::ArrayBorrow => {
                let source = self.heap.get(expr).operand(1);
                let index = self.heap.get(expr).operand(2);
                let source_type = self.check_expr(env, source);
                let index_type = self.check_expr(env, index);
                if !self.subtype(&Type::Int, &index_type) {
                    self.report(ErrorCode::SubtypeError, index);
                }
                match self.element_type(&source_type) {
                    Some(element) => element,
                    None => {
                        self.report(ErrorCode::ExpectedArray, expr);
                        Type::Any
                    }
                }
            }
            Opcode::ArrayUpdate => {
                let source = self.heap.get(expr).operand(1);
                let index = self.heap.get(expr).operand(2);
                let value = self.heap.get(expr).operand(3);
                let source_type = self.check_expr(env, source);
                let index_type = self.check_expr(env, index);
                if !self.subtype(&Type::Int, &index_type) {
                    self.report(ErrorCode::SubtypeError, index);
                }
                let value_type = self.check_expr(env, value);
                match self.element_type(&source_type) {
                    Some(element) => {
                        if !self.subtype(&element, &value_type) {
                            self.report(ErrorCode::SubtypeError, value);
                        }
                    }
                    None => self.report(ErrorCode::ExpectedArray, expr),
                }
                source_type
            }
            Opcode::ArrayLength => {
                let source = self.heap.get(expr).operand(1);
                let ty = self.check_expr(env, source);
                if self.element_type(&ty).is_none() {
                    self.report(ErrorCode::ExpectedArray, expr);
                }
                Type::Int
            }
            Opcode::ArrayGenerator => {
                let value = self.heap.get(expr).operand(1);
                let length = self.heap.get(expr).operand(2);
                let element = self.check_expr(env, value);
                let length_type = self.check_expr(env, length);
                if !self.subtype(&Type::Int, &length_type) {
                    self.report(ErrorCode::SubtypeError, length);
                }
                Type::array(element)
            }
            Opcode::ArrayInitialiser => {
                let values = view::tuple_elements(self.heap, self.heap.get(expr).operand(1));
                let mut members = Vec::new();
                for value in values {
                    members.push(self.check_expr(env, value));
                }
                Type::array(Type::union_of(members))
            }
            Opcode::ArrayRange => {
                for position in 1..3 {
                    let operand = self.heap.get(expr).operand(position);
                    let ty = self.check_expr(env, operand);
                    if !self.subtype(&Type::Int, &ty) {
                        self.report(ErrorCode::SubtypeError, operand);
                    }
                }
                Type::array(Type::Int)
            }
            other => {
                debug_assert!(!other.is_expression(), "unhandled expression {:?}", other);
                Type::Any
            }
        }
    }

    /// Types an invocation, resolving overloads by arity and argument
    /// types, caching the concrete callable type on the binding, and
    /// writing the result-type tuple back.
    fn check_multi(&mut self, env: &FlowEnv, expr: ItemIndex) -> Vec<Type> {
        match self.heap.opcode(expr) {
            Opcode::Invoke => self.check_invoke(env, expr),
            Opcode::IndirectInvoke => self.check_indirect(env, expr),
            _ => vec![self.check_expr(env, expr)],
        }
    }

    fn check_invoke(&mut self, env: &FlowEnv, expr: ItemIndex) -> Vec<Type> {
        let invoke = InvokeView::new(self.heap, expr);
        let binding = BindingView::new(self.heap, invoke.binding);
        let link_view = LinkView::new(self.heap, binding.link);
        let arguments: Vec<Type> = invoke
            .arguments
            .iter()
            .map(|&argument| self.check_expr(env, argument))
            .collect();

        let candidates = link_view.candidates.clone();
        let arity_matching: Vec<ItemIndex> = candidates
            .iter()
            .copied()
            .filter(|&candidate| {
                CallableView::new(self.heap, candidate).parameters.len() == arguments.len()
            })
            .collect();
        if arity_matching.is_empty() {
            self.report(ErrorCode::InsufficientArguments, expr);
            return Vec::new();
        }

        let template_arguments: Vec<Type> = binding
            .arguments
            .iter()
            .map(|&argument| lift(self.heap, argument))
            .collect();

        let mut matching = Vec::new();
        for &candidate in &arity_matching {
            let substitution = self.template_binding(candidate, &template_arguments, expr);
            let view = CallableView::new(self.heap, candidate);
            let fits = view.parameters.iter().zip(&arguments).all(|(&p, actual)| {
                let declared = lift(self.heap, VariableView::new(self.heap, p).declared_type);
                let declared = substitute(&declared, &substitution);
                self.subtype(&declared, actual)
            });
            if fits {
                matching.push(candidate);
            }
        }

        match matching.as_slice() {
            [] => {
                self.report(ErrorCode::SubtypeError, expr);
                Vec::new()
            }
            [chosen] => {
                let chosen = *chosen;
                // narrow the link if overloads were still in play
                if candidates.len() > 1 {
                    let name = link_view.name;
                    let mut operands = wick_heap::item::Operands::new();
                    operands.extend([name, chosen]);
                    let resolved = self.heap.allocate(Opcode::Link, operands, None);
                    self.heap
                        .replace_operand(invoke.binding, 0, resolved)
                        .expect("binding has a link operand");
                }
                let substitution = self.template_binding(chosen, &template_arguments, expr);
                // cache the concrete callable type on the binding
                let concrete = {
                    let ty = self.callable_type(chosen);
                    substitute(&ty, &substitution)
                };
                let lowered = lower(self.heap, &concrete);
                self.heap
                    .replace_operand(invoke.binding, 2, lowered)
                    .expect("binding has a type operand");
                // record the result types on the invocation
                let returns: Vec<Type> = CallableView::new(self.heap, chosen)
                    .returns
                    .iter()
                    .map(|&r| {
                        let declared =
                            lift(self.heap, VariableView::new(self.heap, r).declared_type);
                        substitute(&declared, &substitution)
                    })
                    .collect();
                let lowered: Vec<ItemIndex> =
                    returns.iter().map(|ty| lower(self.heap, ty)).collect();
                let tuple = self
                    .heap
                    .allocate(Opcode::Tuple, lowered.into_iter().collect(), None);
                self.heap
                    .replace_operand(expr, 0, tuple)
                    .expect("invoke has a type tuple");
                returns
            }
            _ => {
                self.report(ErrorCode::AmbiguousCallable, expr);
                Vec::new()
            }
        }
    }

    fn check_indirect(&mut self, env: &FlowEnv, expr: ItemIndex) -> Vec<Type> {
        let view = IndirectInvokeView::new(self.heap, expr);
        let callee_type = self.check_expr(env, view.callee);
        let arguments: Vec<Type> = view
            .arguments
            .iter()
            .map(|&argument| self.check_expr(env, argument))
            .collect();
        let Some(callable) = self.as_callable(&callee_type) else {
            self.report(ErrorCode::ExpectedLambda, expr);
            return Vec::new();
        };
        if callable.parameters().len() != arguments.len() {
            self.report(ErrorCode::InsufficientArguments, expr);
            return Vec::new();
        }
        for (expected, actual) in callable.parameters().iter().zip(&arguments) {
            if !self.subtype(expected, actual) {
                self.report(ErrorCode::SubtypeError, expr);
            }
        }
        let returns = callable.returns().to_vec();
        let lowered: Vec<ItemIndex> = returns.iter().map(|ty| lower(self.heap, ty)).collect();
        let tuple = self
            .heap
            .allocate(Opcode::Tuple, lowered.into_iter().collect(), None);
        self.heap
            .replace_operand(expr, 0, tuple)
            .expect("indirect invoke has a type tuple");
        returns
    }

    /// The template binding for a candidate, reporting arity mismatches.
    fn template_binding(
        &mut self,
        candidate: ItemIndex,
        arguments: &[Type],
        site: ItemIndex,
    ) -> Binding {
        let template = CallableView::new(self.heap, candidate).template;
        let type_parameters: Vec<Symbol> = template
            .iter()
            .filter(|&&p| self.heap.opcode(p) == Opcode::TemplateType)
            .map(|&p| name_of(self.heap, p))
            .collect();
        if !arguments.is_empty() && arguments.len() < type_parameters.len() {
            self.report(ErrorCode::MissingTemplateParameters, site);
        } else if arguments.len() > type_parameters.len() {
            self.report(ErrorCode::TooManyTemplateParameters, site);
        }
        let mut binding = Binding::new();
        for (name, argument) in type_parameters.into_iter().zip(arguments) {
            binding.types.insert(name, argument.clone());
        }
        binding
    }

    /// The semantic callable type of a function, method, or property
    /// declaration.
    fn callable_type(&self, declaration: ItemIndex) -> Type {
        let view = CallableView::new(self.heap, declaration);
        let parameters: Vec<Type> = view
            .parameters
            .iter()
            .map(|&p| lift(self.heap, VariableView::new(self.heap, p).declared_type))
            .collect();
        let returns: Vec<Type> = view
            .returns
            .iter()
            .map(|&r| lift(self.heap, VariableView::new(self.heap, r).declared_type))
            .collect();
        match view.opcode {
            Opcode::Function => Type::Callable(Callable::Function {
                parameters,
                returns,
            }),
            Opcode::Method => Type::Callable(Callable::Method {
                parameters,
                returns,
                captured: Vec::new(),
                lifetimes: Vec::new(),
            }),
            _ => Type::Callable(Callable::Property { parameters }),
        }
    }

    // ---- Type structure helpers ----

    /// The field type of `ty` viewed as a record, unions field-wise.
    fn field_type(&self, ty: &Type, field: Symbol) -> Option<Type> {
        self.field_type_bounded(ty, field, 16)
    }

    fn field_type_bounded(&self, ty: &Type, field: Symbol, fuel: usize) -> Option<Type> {
        if fuel == 0 {
            return None;
        }
        match ty {
            Type::Record(record) => record.field(field).cloned(),
            Type::Nominal(nominal) => {
                let (_, expanded) = expand_nominal(self.heap, nominal)?;
                self.field_type_bounded(&expanded, field, fuel - 1)
            }
            Type::Recursive(target) => {
                self.field_type_bounded(&lift(self.heap, *target), field, fuel - 1)
            }
            Type::Union(members) => {
                let mut out = Vec::new();
                for member in members {
                    out.push(self.field_type_bounded(member, field, fuel - 1)?);
                }
                Some(Type::union_of(out))
            }
            _ => None,
        }
    }

    fn as_record_like(&self, ty: &Type) -> bool {
        match ty {
            Type::Record(_) => true,
            Type::Nominal(nominal) => expand_nominal(self.heap, nominal)
                .map(|(_, expanded)| self.as_record_like(&expanded))
                .unwrap_or(false),
            Type::Union(members) => members.iter().all(|member| self.as_record_like(member)),
            _ => false,
        }
    }

    /// The element type of `ty` viewed as an array.
    fn element_type(&self, ty: &Type) -> Option<Type> {
        self.element_type_bounded(ty, 16)
    }

    fn element_type_bounded(&self, ty: &Type, fuel: usize) -> Option<Type> {
        if fuel == 0 {
            return None;
        }
        match ty {
            Type::Array(element) => Some((**element).clone()),
            Type::Nominal(nominal) => {
                let (_, expanded) = expand_nominal(self.heap, nominal)?;
                self.element_type_bounded(&expanded, fuel - 1)
            }
            Type::Recursive(target) => {
                self.element_type_bounded(&lift(self.heap, *target), fuel - 1)
            }
            Type::Union(members) => {
                let mut out = Vec::new();
                for member in members {
                    out.push(self.element_type_bounded(member, fuel - 1)?);
                }
                Some(Type::union_of(out))
            }
            _ => None,
        }
    }

    /// The referent type of `ty` viewed as a reference.
    fn reference_element(&self, ty: &Type) -> Option<Type> {
        match ty {
            Type::Reference(element, _) => Some((**element).clone()),
            Type::Nominal(nominal) => {
                let (_, expanded) = expand_nominal(self.heap, nominal)?;
                self.reference_element(&expanded)
            }
            _ => None,
        }
    }

    fn as_callable(&self, ty: &Type) -> Option<Callable> {
        match ty {
            Type::Callable(callable) => Some(callable.clone()),
            Type::Nominal(nominal) => {
                let (_, expanded) = expand_nominal(self.heap, nominal)?;
                self.as_callable(&expanded)
            }
            _ => None,
        }
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
    fn identity_function_is_clean() {
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
        assert!(check(&mut heap).is_empty());
    }

    #[test]
    fn returning_the_wrong_type_is_a_subtype_error() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let int = builder.type_int();
        let bool_ = builder.type_bool();
        let x = builder.variable("x", bool_);
        let y = builder.variable("y", int);
        let access = builder.variable_copy(x);
        let ret = builder.return_stmt(&[access]);
        let body = builder.block(&[ret]);
        let f = builder.function("f", &[x], &[y], &[], &[], body);
        let unit = builder.unit("main", &[f]);
        builder.module("main", &[unit]);
        assert_eq!(check(&mut heap), vec![ErrorCode::SubtypeError]);
    }

    #[test]
    fn missing_return_is_reported() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let int = builder.type_int();
        let y = builder.variable("y", int);
        let body = builder.block(&[]);
        let f = builder.function("f", &[], &[y], &[], &[], body);
        let unit = builder.unit("main", &[f]);
        builder.module("main", &[unit]);
        assert_eq!(check(&mut heap), vec![ErrorCode::MissingReturn]);
    }

    #[test]
    fn code_after_return_is_unreachable() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let ret = builder.return_stmt(&[]);
        let skip = builder.skip();
        let body = builder.block(&[ret, skip]);
        let f = builder.function("f", &[], &[], &[], &[], body);
        let unit = builder.unit("main", &[f]);
        builder.module("main", &[unit]);
        assert_eq!(check(&mut heap), vec![ErrorCode::UnreachableCode]);
    }

    #[test]
    fn is_test_refines_union_to_member() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let int = builder.type_int();
        let null = builder.type_null();
        let maybe = builder.type_union(&[int, null]);
        let x = builder.variable("x", maybe);
        let y = builder.variable("y", int);
        // if x is int: return x else: return 0
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
        // without refinement, returning int|null into int would error
        assert!(check(&mut heap).is_empty());
    }

    #[test]
    fn branch_decided_by_static_types_is_flagged() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let int = builder.type_int();
        let x = builder.variable("x", int);
        let access = builder.variable_copy(x);
        let test = builder.is_type(access, int); // always true
        let then = builder.block(&[]);
        let branch = builder.if_stmt(test, then);
        let ret = builder.return_stmt(&[]);
        let body = builder.block(&[branch, ret]);
        let f = builder.function("f", &[x], &[], &[], &[], body);
        let unit = builder.unit("main", &[f]);
        builder.module("main", &[unit]);
        assert_eq!(check(&mut heap), vec![ErrorCode::BranchAlwaysTaken]);
    }

    #[test]
    fn loop_havocs_refinements_of_modified_variables() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let int = builder.type_int();
        let null = builder.type_null();
        let maybe = builder.type_union(&[int, null]);
        let x = builder.variable("x", maybe);
        let y = builder.variable("y", maybe);
        // x = 1; while true: x = null
        let one = builder.constant_int(1);
        let lval1 = builder.variable_copy(x);
        let assign1 = builder.assign(&[lval1], &[one]);
        let null_const = builder.constant_null();
        let lval2 = builder.variable_copy(x);
        let assign2 = builder.assign(&[lval2], &[null_const]);
        let loop_body = builder.block(&[assign2]);
        let cond = builder.constant_bool(true);
        let w = builder.while_stmt(cond, &[], loop_body);
        // after the loop, x must be back to int|null: returning it into
        // `maybe` is fine, into `int` would not be (exercised implicitly by
        // assigning to y of union type)
        let access = builder.variable_copy(x);
        let lval3 = builder.variable_copy(y);
        let assign3 = builder.assign(&[lval3], &[access]);
        let ret = builder.return_stmt(&[]);
        let body = builder.block(&[assign1, w, assign3, ret]);
        let f = builder.function("f", &[x, y], &[], &[], &[], body);
        let unit = builder.unit("main", &[f]);
        builder.module("main", &[unit]);
        assert!(check(&mut heap).is_empty());
    }

    #[test]
    fn nested_named_blocks_order_their_lifetimes() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let int = builder.type_int();
        // outer: inner: &inner:int b = new:outer 1
        // the allocation outlives the inner scope, so the coercion from the
        // outer-lifetime reference into the inner-lifetime slot must hold
        let inner_ref = builder.type_reference_in(int, "inner");
        let one = builder.constant_int(1);
        let allocated = builder.new_in(one, "outer");
        let b = builder.variable_initialised("b", inner_ref, allocated);
        let inner_block = builder.block(&[b]);
        let inner_named = builder.named_block("inner", inner_block);
        let outer_block = builder.block(&[inner_named]);
        let outer_named = builder.named_block("outer", outer_block);
        let body = builder.block(&[outer_named]);
        let m = builder.method("m", &[], &[], &[], &[], body);
        let unit = builder.unit("main", &[m]);
        builder.module("main", &[unit]);
        assert!(check(&mut heap).is_empty());
    }

    #[test]
    fn inner_lifetime_references_do_not_satisfy_outer_slots() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let int = builder.type_int();
        // outer: inner: &outer:int b = new:inner 1 — the allocation dies
        // with the inner scope, so the coercion must be rejected
        let outer_ref = builder.type_reference_in(int, "outer");
        let one = builder.constant_int(1);
        let allocated = builder.new_in(one, "inner");
        let b = builder.variable_initialised("b", outer_ref, allocated);
        let inner_block = builder.block(&[b]);
        let inner_named = builder.named_block("inner", inner_block);
        let outer_block = builder.block(&[inner_named]);
        let outer_named = builder.named_block("outer", outer_block);
        let body = builder.block(&[outer_named]);
        let m = builder.method("m", &[], &[], &[], &[], body);
        let unit = builder.unit("main", &[m]);
        builder.module("main", &[unit]);
        assert_eq!(check(&mut heap), vec![ErrorCode::SubtypeError]);
    }

    #[test]
    fn array_access_requires_an_array() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let int = builder.type_int();
        let x = builder.variable("x", int);
        let idx = builder.constant_int(0);
        let source = builder.variable_copy(x);
        let access = builder.array_access(source, idx);
        let y = builder.variable("y", int);
        let ret = builder.return_stmt(&[access]);
        let body = builder.block(&[ret]);
        let f = builder.function("f", &[x], &[y], &[], &[], body);
        let unit = builder.unit("main", &[f]);
        builder.module("main", &[unit]);
        assert!(check(&mut heap).contains(&ErrorCode::ExpectedArray));
    }

    #[test]
    fn invoke_narrows_overloads_by_argument_type() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let int = builder.type_int();
        let bool_ = builder.type_bool();
        // f(int)->(int) and f(bool)->(bool)
        let x1 = builder.variable("x", int);
        let r1 = builder.variable("r", int);
        let ret1 = builder.variable_copy(x1);
        let retstmt1 = builder.return_stmt(&[ret1]);
        let b1 = builder.block(&[retstmt1]);
        let f1 = builder.function("f", &[x1], &[r1], &[], &[], b1);
        let x2 = builder.variable("x", bool_);
        let r2 = builder.variable("r", bool_);
        let ret2 = builder.variable_copy(x2);
        let retstmt2 = builder.return_stmt(&[ret2]);
        let b2 = builder.block(&[retstmt2]);
        let f2 = builder.function("f", &[x2], &[r2], &[], &[], b2);

        // caller: return f(1) into int
        let link = builder.link("f", &[f1, f2]);
        let binding = builder.binding(link, &[]);
        let one = builder.constant_int(1);
        let invoke = builder.invoke(binding, &[one]);
        let out = builder.variable("out", int);
        let ret = builder.return_stmt(&[invoke]);
        let body = builder.block(&[ret]);
        let caller = builder.function("caller", &[], &[out], &[], &[], body);
        let unit = builder.unit("main", &[f1, f2, caller]);
        builder.module("main", &[unit]);

        assert!(check(&mut heap).is_empty());
        // the binding's link was narrowed to the int overload
        let narrowed = LinkView::new(&heap, heap.get(binding).operand(0));
        assert_eq!(narrowed.target(), Some(f1));
        // and the result tuple was recorded
        let types = view::expression_types(&heap, invoke).unwrap();
        assert_eq!(types.len(), 1);
        assert_eq!(lift(&heap, types[0]), Type::Int);
    }

    #[test]
    fn lambda_access_types_as_its_computed_function_type() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let int = builder.type_int();
        // &double = lambda(int a) -> (int b): return a + a
        let a = builder.variable("a", int);
        let b = builder.variable("b", int);
        let use1 = builder.variable_copy(a);
        let use2 = builder.variable_copy(a);
        let doubled = builder.add(use1, use2);
        let lret = builder.return_stmt(&[doubled]);
        let lbody = builder.block(&[lret]);
        let lambda = builder.lambda("double", &[a], &[b], lbody);
        // call it indirectly through a lambda access
        let link = builder.link("double", &[lambda]);
        let access = builder.lambda_access(link);
        let five = builder.constant_int(5);
        let call = builder.indirect_invoke(access, &[], &[five]);
        let out = builder.variable("out", int);
        let ret = builder.return_stmt(&[call]);
        let body = builder.block(&[ret]);
        let f = builder.function("f", &[], &[out], &[], &[], body);
        let unit = builder.unit("main", &[lambda, f]);
        builder.module("main", &[unit]);

        assert!(check(&mut heap).is_empty());
        let types = view::expression_types(&heap, call).unwrap();
        assert_eq!(types.len(), 1);
        assert_eq!(lift(&heap, types[0]), Type::Int);
    }

    #[test]
    fn incomparable_equality_is_reported() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let int = builder.type_int();
        let bool_ = builder.type_bool();
        let x = builder.variable("x", int);
        let y = builder.variable("y", bool_);
        let ax = builder.variable_copy(x);
        let ay = builder.variable_copy(y);
        let eq = builder.equal(ax, ay);
        let a = builder.assert_stmt(eq);
        let ret = builder.return_stmt(&[]);
        let body = builder.block(&[a, ret]);
        let f = builder.function("f", &[x, y], &[], &[], &[], body);
        let unit = builder.unit("main", &[f]);
        builder.module("main", &[unit]);
        assert!(check(&mut heap).contains(&ErrorCode::IncomparableOperands));
    }
}
