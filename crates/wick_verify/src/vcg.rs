//! The verification-condition generator.
//!
//! Walks each callable body of a versioned module, maintaining the path
//! context Γ: the precondition, branch conditions or their negations,
//! assumptions, one equality per assignment over versioned symbols, and
//! loop invariants with havocking at loop heads. Obligations are emitted in
//! document order: explicit asserts, postconditions at returns,
//! preconditions at call sites, type invariants at coercions into
//! constrained aliases, and the safety checks flow typing implies.
//!
//! The generator replays the versioning discipline itself (declare, havoc,
//! join) so that one expression (a loop invariant, say) can be rendered
//! under several version environments: on entry, inside the body, and after
//! the loop. It relies on the versioning pass having populated each loop's
//! modified tuple.
//!
//! Constraint inlining: a nominal alias's invariant is instantiated with
//! the governed expression; a pure call's `ensures` is substituted for the
//! immediate successor expression only, never transitively.

use std::collections::{BTreeSet, HashMap, HashSet};

use wick_base::Span;
use wick_heap::view::{
    self, name_of, AssignView, BindingView, CallableView, CaseView, IfView, IndirectInvokeView,
    InvokeView, LinkView, LoopView, ModuleView, QuantifierView, RecordInitialiserView, ReturnView,
    StaticVariableView, SwitchView, TypeAliasView, UnitView, VariableView,
};
use wick_heap::{ItemHeap, ItemIndex, Opcode, Payload};
use wick_types::{expand_nominal, lift, Type};

use crate::ast::{Sort, Term};
use crate::module::{AssertionModule, Declaration, Obligation, ObligationKind};

/// Maximum depth for unfolding invariants of nested nominal aliases.
const INVARIANT_UNFOLD_LIMIT: usize = 8;

/// Generates the assertion module for a compiled, checked, versioned heap.
pub fn generate(heap: &ItemHeap) -> AssertionModule {
    let Some(root) = heap.root() else {
        return AssertionModule::default();
    };
    if heap.opcode(root) != Opcode::Module {
        return AssertionModule::default();
    }
    let module_view = ModuleView::new(heap, root);
    let module_name = heap.resolve(name_of(heap, module_view.name)).to_string();

    let mut generator = Generator {
        heap,
        module: AssertionModule::new(module_name),
        context: Vec::new(),
        versions: HashMap::new(),
        counters: HashMap::new(),
        base_names: HashMap::new(),
        taken: HashSet::new(),
        sorts: HashMap::new(),
        returns: Vec::new(),
        ensures: Vec::new(),
        current: String::new(),
        obligation_counter: 0,
        fresh: 0,
    };

    // declarations first, in document order
    for &unit in &module_view.units {
        for declaration in UnitView::new(heap, unit).declarations {
            generator.declare_item(declaration);
        }
    }
    // then obligations
    for &unit in &module_view.units {
        for declaration in UnitView::new(heap, unit).declarations {
            if matches!(
                heap.opcode(declaration),
                Opcode::Function | Opcode::Method | Opcode::Property
            ) {
                generator.callable(declaration);
            }
        }
    }
    log::debug!(
        "generated {} obligations across {} declarations",
        generator.module.obligations.len(),
        generator.module.declarations.len()
    );
    generator.module
}

/// Substitutions applied while translating: declaration → term standing in
/// for it. Used to instantiate contracts and invariants with call-site
/// arguments.
type Overrides = HashMap<ItemIndex, Term>;

enum Walk {
    Cont,
    Halt,
}

struct Generator<'h> {
    heap: &'h ItemHeap,
    module: AssertionModule,
    /// The path context Γ for the current walk position.
    context: Vec<Term>,
    /// Current version per variable declaration.
    versions: HashMap<ItemIndex, u32>,
    /// High-water marks per variable declaration.
    counters: HashMap<ItemIndex, u32>,
    /// Declaration → disambiguated base symbol name.
    base_names: HashMap<ItemIndex, String>,
    taken: HashSet<String>,
    /// Symbol → sort, for closing obligations.
    sorts: HashMap<String, Sort>,
    /// Return variable declarations of the current callable.
    returns: Vec<ItemIndex>,
    /// Ensures clauses of the current callable.
    ensures: Vec<ItemIndex>,
    current: String,
    obligation_counter: usize,
    fresh: u32,
}

impl<'h> Generator<'h> {
    // ---- Declarations ----

    fn declare_item(&mut self, declaration: ItemIndex) {
        match self.heap.opcode(declaration) {
            Opcode::TypeAlias => {
                let view = TypeAliasView::new(self.heap, declaration);
                if view.invariants.is_empty() {
                    return;
                }
                let alias_name = self.heap.resolve(name_of(self.heap, view.name)).to_string();
                let var = VariableView::new(self.heap, view.var);
                let parameter_name = format!(
                    "{}$self",
                    self.heap.resolve(name_of(self.heap, var.name))
                );
                let sort = sort_of(self.heap, &lift(self.heap, var.declared_type));
                let mut overrides = Overrides::new();
                overrides.insert(view.var, Term::var(parameter_name.clone()));
                let body = Term::and(
                    view.invariants
                        .iter()
                        .map(|&invariant| self.term(invariant, &overrides))
                        .collect(),
                );
                self.module.declarations.push(Declaration::Invariant {
                    name: alias_name,
                    parameter: (parameter_name, sort),
                    body,
                });
            }
            Opcode::StaticVariable => {
                let static_view = StaticVariableView::new(self.heap, declaration);
                let name = self
                    .heap
                    .resolve(name_of(self.heap, static_view.name))
                    .to_string();
                let sort = sort_of(self.heap, &lift(self.heap, static_view.declared_type));
                self.module
                    .declarations
                    .push(Declaration::Constant { name, sort });
            }
            Opcode::Function | Opcode::Property => {
                let view = CallableView::new(self.heap, declaration);
                self.reset_for(declaration);
                let mut parameters = Vec::new();
                for &parameter in &view.parameters {
                    self.declare_variable(parameter);
                    parameters.push((
                        self.symbol(parameter),
                        self.sort_of_declaration(parameter),
                    ));
                }
                let mut returns = Vec::new();
                for &ret in &view.returns {
                    self.declare_variable(ret);
                    returns.push((self.symbol(ret), self.sort_of_declaration(ret)));
                }
                let no_overrides = Overrides::new();
                let requires = view
                    .requires
                    .iter()
                    .map(|&r| self.term(r, &no_overrides))
                    .collect();
                let ensures = view
                    .ensures
                    .iter()
                    .map(|&e| self.term(e, &no_overrides))
                    .collect();
                self.module.declarations.push(Declaration::Function {
                    name: self.current.clone(),
                    parameters,
                    returns,
                    requires,
                    ensures,
                });
            }
            _ => {}
        }
    }

    // ---- Callable bodies ----

    fn reset_for(&mut self, declaration: ItemIndex) {
        let view = CallableView::new(self.heap, declaration);
        self.current = self
            .heap
            .resolve(name_of(self.heap, view.name))
            .to_string();
        self.context.clear();
        self.versions.clear();
        self.counters.clear();
        self.base_names.clear();
        self.taken.clear();
        self.sorts.clear();
    }

    fn callable(&mut self, declaration: ItemIndex) {
        let view = CallableView::new(self.heap, declaration);
        self.reset_for(declaration);
        self.returns = view.returns.clone();
        self.ensures = view.ensures.clone();

        for &parameter in view.parameters.iter().chain(view.returns.iter()) {
            self.declare_variable(parameter);
        }
        // parameters satisfy their declared type invariants on entry
        let no_overrides = Overrides::new();
        for &parameter in &view.parameters {
            let declared = lift(
                self.heap,
                VariableView::new(self.heap, parameter).declared_type,
            );
            let value = Term::var(self.symbol(parameter));
            let assumptions = self.invariant_terms(&declared, &value, INVARIANT_UNFOLD_LIMIT);
            self.context.extend(assumptions);
        }
        // the precondition is assumed on entry
        for &requires in &view.requires {
            let assumption = self.term(requires, &no_overrides);
            self.context.push(assumption);
        }
        let _ = self.stmt(view.body);
    }

    // ---- Statements ----

    fn stmt(&mut self, stmt: ItemIndex) -> Walk {
        match self.heap.opcode(stmt) {
            Opcode::Block => {
                for statement in view::BlockView::new(self.heap, stmt).statements {
                    if let Walk::Halt = self.stmt(statement) {
                        return Walk::Halt;
                    }
                }
                Walk::Cont
            }
            Opcode::NamedBlock => self.stmt(view::NamedBlockView::new(self.heap, stmt).body),
            Opcode::Skip | Opcode::Debug => Walk::Cont,
            Opcode::Break | Opcode::Continue | Opcode::Fail => Walk::Halt,
            Opcode::Variable => {
                self.declare_variable(stmt);
                Walk::Cont
            }
            Opcode::VariableInitialised => {
                let view = VariableView::new(self.heap, stmt);
                let no_overrides = Overrides::new();
                let value = view
                    .initialiser
                    .map(|initialiser| self.term(initialiser, &no_overrides));
                self.declare_variable(stmt);
                if let Some(value) = value {
                    let symbol = Term::var(self.symbol(stmt));
                    self.context.push(Term::eq(symbol.clone(), value));
                    let declared = lift(self.heap, view.declared_type);
                    self.coercion_obligations(&declared, &symbol, self.heap.span_of(stmt));
                }
                Walk::Cont
            }
            Opcode::Assert => {
                let condition = self.heap.get(stmt).operand(0);
                let goal = self.term(condition, &Overrides::new());
                self.emit(ObligationKind::Assertion, self.heap.span_of(stmt), goal.clone());
                self.context.push(goal);
                Walk::Cont
            }
            Opcode::Assume => {
                let condition = self.heap.get(stmt).operand(0);
                let assumption = self.term(condition, &Overrides::new());
                self.context.push(assumption);
                Walk::Cont
            }
            Opcode::Assign => self.assign(stmt),
            Opcode::Return => self.ret(stmt),
            Opcode::If | Opcode::IfElse => self.conditional(stmt),
            Opcode::Switch => self.switch(stmt),
            Opcode::While | Opcode::DoWhile => self.repeat(stmt),
            _ => Walk::Cont,
        }
    }

    fn assign(&mut self, stmt: ItemIndex) -> Walk {
        let view = AssignView::new(self.heap, stmt);
        let no_overrides = Overrides::new();
        let values: Vec<Term> = view
            .rhs
            .iter()
            .map(|&rhs| self.term(rhs, &no_overrides))
            .collect();
        for (&lval, value) in view.lhs.iter().zip(values) {
            self.assign_lval(lval, value);
        }
        Walk::Cont
    }

    fn assign_lval(&mut self, lval: ItemIndex, value: Term) {
        match self.heap.opcode(lval) {
            Opcode::VariableCopy | Opcode::VariableMove => {
                let declaration = self.heap.get(lval).operand(1);
                let declared = lift(
                    self.heap,
                    VariableView::new(self.heap, declaration).declared_type,
                );
                let fresh = self.havoc(declaration);
                let symbol = Term::var(fresh);
                self.context.push(Term::eq(symbol.clone(), value));
                self.coercion_obligations(&declared, &symbol, self.heap.span_of(lval));
            }
            Opcode::StaticVariableAccess => {
                let link = self.heap.get(lval).operand(1);
                if let Some(target) = LinkView::new(self.heap, link).target() {
                    let fresh = self.havoc(target);
                    self.context.push(Term::eq(Term::var(fresh), value));
                }
            }
            Opcode::ArrayAccess => {
                let no_overrides = Overrides::new();
                let base = self.heap.get(lval).operand(1);
                let index = self.heap.get(lval).operand(2);
                let old = self.term(base, &no_overrides);
                let index_term = self.term(index, &no_overrides);
                let stored = Term::app("array$store", vec![old, index_term, value]);
                self.assign_lval(base, stored);
            }
            Opcode::RecordAccess => {
                let no_overrides = Overrides::new();
                let base = self.heap.get(lval).operand(1);
                let field = name_of(self.heap, self.heap.get(lval).operand(2));
                let old = self.term(base, &no_overrides);
                let stored = Term::app(
                    format!("record$store${}", self.heap.resolve(field)),
                    vec![old, value],
                );
                self.assign_lval(base, stored);
            }
            Opcode::Dereference => {
                // writes through references are outside the logic; the
                // referent is simply unconstrained afterwards
            }
            _ => {}
        }
    }

    fn ret(&mut self, stmt: ItemIndex) -> Walk {
        let view = ReturnView::new(self.heap, stmt);
        let span = self.heap.span_of(stmt);
        let no_overrides = Overrides::new();
        let values: Vec<Term> = view
            .operands
            .iter()
            .map(|&operand| self.term(operand, &no_overrides))
            .collect();

        // coercions into constrained return types become obligations
        let return_declarations = self.returns.clone();
        for (&declaration, value) in return_declarations.iter().zip(&values) {
            let declared = lift(
                self.heap,
                VariableView::new(self.heap, declaration).declared_type,
            );
            self.coercion_obligations(&declared, value, span);
        }

        // each ensures clause, with returns standing for the returned
        // values
        let mut overrides = Overrides::new();
        for (&declaration, value) in return_declarations.iter().zip(&values) {
            overrides.insert(declaration, value.clone());
        }
        let ensures = self.ensures.clone();
        for clause in ensures {
            let goal = self.term(clause, &overrides);
            self.emit(ObligationKind::Postcondition, span, goal);
        }
        Walk::Halt
    }

    fn conditional(&mut self, stmt: ItemIndex) -> Walk {
        let view = IfView::new(self.heap, stmt);
        let condition = self.term(view.condition, &Overrides::new());
        let depth = self.context.len();
        let before_versions = self.versions.clone();

        // true branch
        self.context.push(condition.clone());
        let true_walk = self.stmt(view.true_branch);
        let true_entries: Vec<Term> = self.context.drain(depth..).collect();
        let true_versions = self.versions.clone();

        // false branch
        self.versions = before_versions.clone();
        self.context.push(Term::not(condition.clone()));
        let false_walk = match view.false_branch {
            Some(branch) => self.stmt(branch),
            None => Walk::Cont,
        };
        let false_entries: Vec<Term> = self.context.drain(depth..).collect();
        let false_versions = self.versions.clone();

        match (true_walk, false_walk) {
            (Walk::Halt, Walk::Halt) => Walk::Halt,
            (Walk::Cont, Walk::Halt) => {
                // only the true path continues
                self.versions = true_versions;
                self.context.extend(true_entries);
                Walk::Cont
            }
            (Walk::Halt, Walk::Cont) => {
                self.versions = false_versions;
                self.context.extend(false_entries);
                Walk::Cont
            }
            (Walk::Cont, Walk::Cont) => {
                // both paths continue: guard each branch's facts and merge
                // versions φ-style
                self.context.push(Term::implies(
                    condition.clone(),
                    Term::and(true_entries[1..].to_vec()),
                ));
                self.context.push(Term::implies(
                    Term::not(condition.clone()),
                    Term::and(false_entries[1..].to_vec()),
                ));
                let mut merged = HashMap::new();
                for (&declaration, &true_version) in &true_versions {
                    let Some(&false_version) = false_versions.get(&declaration) else {
                        continue;
                    };
                    if true_version == false_version {
                        merged.insert(declaration, true_version);
                        continue;
                    }
                    let true_symbol = self.symbol_at(declaration, true_version);
                    let false_symbol = self.symbol_at(declaration, false_version);
                    let counter = self.counters.entry(declaration).or_insert(0);
                    *counter += 1;
                    let join_version = *counter;
                    merged.insert(declaration, join_version);
                    let joined = self.symbol_at(declaration, join_version);
                    self.register_symbol(declaration, join_version);
                    self.context.push(Term::implies(
                        condition.clone(),
                        Term::eq(Term::var(joined.clone()), Term::var(true_symbol)),
                    ));
                    self.context.push(Term::implies(
                        Term::not(condition.clone()),
                        Term::eq(Term::var(joined), Term::var(false_symbol)),
                    ));
                }
                self.versions = merged;
                Walk::Cont
            }
        }
    }

    fn switch(&mut self, stmt: ItemIndex) -> Walk {
        let view = SwitchView::new(self.heap, stmt);
        let no_overrides = Overrides::new();
        let subject = self.term(view.condition, &no_overrides);
        let before_versions = self.versions.clone();
        let depth = self.context.len();
        let mut exits: Vec<HashMap<ItemIndex, u32>> = Vec::new();
        let mut has_default = false;

        for case in view.cases {
            let case_view = CaseView::new(self.heap, case);
            has_default |= case_view.is_default();
            self.versions = before_versions.clone();
            let guard = if case_view.is_default() {
                Term::Bool(true)
            } else {
                Term::Or(
                    case_view
                        .values
                        .iter()
                        .map(|&value| {
                            let value_term = self.term(value, &no_overrides);
                            Term::eq(subject.clone(), value_term)
                        })
                        .collect(),
                )
            };
            self.context.push(guard);
            let walk = self.stmt(case_view.body);
            self.context.truncate(depth);
            if let Walk::Cont = walk {
                exits.push(self.versions.clone());
            }
        }
        if !has_default {
            exits.push(before_versions.clone());
        }
        if exits.is_empty() {
            return Walk::Halt;
        }

        // merge: fresh version wherever any two exits disagree
        let mut merged = HashMap::new();
        for (&declaration, &version) in &before_versions {
            let all_same = exits
                .iter()
                .all(|exit| exit.get(&declaration) == Some(&version));
            if all_same {
                merged.insert(declaration, version);
            } else {
                let counter = self.counters.entry(declaration).or_insert(0);
                *counter += 1;
                let fresh = *counter;
                merged.insert(declaration, fresh);
                self.register_symbol(declaration, fresh);
            }
        }
        self.versions = merged;
        Walk::Cont
    }

    fn repeat(&mut self, stmt: ItemIndex) -> Walk {
        let view = LoopView::new(self.heap, stmt);
        let span = self.heap.span_of(stmt);
        let no_overrides = Overrides::new();

        // the invariant must hold on entry, under the pre-loop versions
        for &invariant in &view.invariants {
            let goal = self.term(invariant, &no_overrides);
            self.emit(ObligationKind::InvariantEstablished, span, goal);
        }

        let before_versions = self.versions.clone();

        // havoc what the body may redefine, then assume the invariant
        for &declaration in &view.modified {
            self.havoc(declaration);
        }
        let invariant_assumptions: Vec<Term> = view
            .invariants
            .iter()
            .map(|&invariant| self.term(invariant, &no_overrides))
            .collect();
        self.context.extend(invariant_assumptions);

        // walk the body under invariant ∧ guard; its facts stay scoped
        let depth = self.context.len();
        let guard = self.term(view.condition, &no_overrides);
        self.context.push(guard);
        let body_walk = self.stmt(view.body);
        if let Walk::Cont = body_walk {
            // the body must re-establish the invariant at its exit versions
            for &invariant in &view.invariants {
                let goal = self.term(invariant, &no_overrides);
                self.emit(ObligationKind::InvariantPreserved, span, goal);
            }
        }
        self.context.truncate(depth);

        // after the loop: another fresh set of versions, the invariant,
        // and the negated guard
        self.versions = before_versions;
        for &declaration in &view.modified {
            self.havoc(declaration);
        }
        let after_invariants: Vec<Term> = view
            .invariants
            .iter()
            .map(|&invariant| self.term(invariant, &no_overrides))
            .collect();
        self.context.extend(after_invariants);
        let negated = Term::not(self.term(view.condition, &no_overrides));
        self.context.push(negated);
        Walk::Cont
    }

    // ---- Expression translation ----

    fn term(&mut self, expr: ItemIndex, overrides: &Overrides) -> Term {
        match self.heap.opcode(expr) {
            Opcode::VariableCopy | Opcode::VariableMove => {
                let declaration = self.heap.get(expr).operand(1);
                if let Some(replacement) = overrides.get(&declaration) {
                    return replacement.clone();
                }
                Term::var(self.symbol(declaration))
            }
            Opcode::StaticVariableAccess => {
                let link = self.heap.get(expr).operand(1);
                match LinkView::new(self.heap, link).target() {
                    Some(target) => Term::var(self.symbol(target)),
                    None => Term::var("unresolved$static"),
                }
            }
            Opcode::Constant => {
                let payload = self
                    .heap
                    .get(expr)
                    .data
                    .as_ref()
                    .and_then(|payload| match payload {
                        Payload::Int(value) => Some(value.clone()),
                        Payload::Name(_) => None,
                    })
                    .unwrap_or_default();
                match self.heap.opcode(self.heap.get(expr).operand(0)) {
                    Opcode::TypeBool => Term::Bool(payload != 0.into()),
                    Opcode::TypeNull => Term::Null,
                    _ => Term::Int(payload),
                }
            }
            Opcode::Cast => self.term(self.heap.get(expr).operand(1), overrides),
            Opcode::Invoke => self.invoke_term(expr, overrides),
            Opcode::IndirectInvoke => {
                let view = IndirectInvokeView::new(self.heap, expr);
                let mut arguments = vec![self.term(view.callee, overrides)];
                for &argument in &view.arguments {
                    arguments.push(self.term(argument, overrides));
                }
                Term::app("apply", arguments)
            }
            Opcode::LogicalNot => {
                Term::not(self.term(self.heap.get(expr).operand(0), overrides))
            }
            Opcode::LogicalAnd => {
                let operands = view::tuple_elements(self.heap, self.heap.get(expr).operand(0));
                Term::and(
                    operands
                        .into_iter()
                        .map(|operand| self.term(operand, overrides))
                        .collect(),
                )
            }
            Opcode::LogicalOr => {
                let operands = view::tuple_elements(self.heap, self.heap.get(expr).operand(0));
                Term::Or(
                    operands
                        .into_iter()
                        .map(|operand| self.term(operand, overrides))
                        .collect(),
                )
            }
            Opcode::LogicalImplication => {
                let antecedent = self.term(self.heap.get(expr).operand(0), overrides);
                let consequent = self.term(self.heap.get(expr).operand(1), overrides);
                Term::implies(antecedent, consequent)
            }
            Opcode::LogicalIff => {
                let left = self.term(self.heap.get(expr).operand(0), overrides);
                let right = self.term(self.heap.get(expr).operand(1), overrides);
                Term::Iff(Box::new(left), Box::new(right))
            }
            Opcode::UniversalQuantifier | Opcode::ExistentialQuantifier => {
                self.quantifier_term(expr, overrides)
            }
            Opcode::Equal => self.binary(expr, overrides, Term::Eq),
            Opcode::NotEqual => self.binary(expr, overrides, Term::Ne),
            Opcode::IntegerLessThan => self.binary(expr, overrides, Term::Lt),
            Opcode::IntegerLessThanOrEqual => self.binary(expr, overrides, Term::Le),
            Opcode::IntegerGreaterThan => self.binary(expr, overrides, Term::Gt),
            Opcode::IntegerGreaterThanOrEqual => self.binary(expr, overrides, Term::Ge),
            Opcode::Is => {
                let operand = self.term(self.heap.get(expr).operand(0), overrides);
                Term::app("type$test", vec![operand])
            }
            Opcode::IntegerNegation => {
                Term::Neg(Box::new(self.term(self.heap.get(expr).operand(1), overrides)))
            }
            Opcode::IntegerAddition => self.arith(expr, overrides, Term::Add),
            Opcode::IntegerSubtraction => self.arith(expr, overrides, Term::Sub),
            Opcode::IntegerMultiplication => self.arith(expr, overrides, Term::Mul),
            Opcode::IntegerDivision => {
                let divisor = self.term(self.heap.get(expr).operand(2), overrides);
                self.emit(
                    ObligationKind::DivisionByZero,
                    self.heap.span_of(expr),
                    Term::ne(divisor.clone(), Term::int(0)),
                );
                let dividend = self.term(self.heap.get(expr).operand(1), overrides);
                Term::Div(Box::new(dividend), Box::new(divisor))
            }
            Opcode::IntegerRemainder => {
                let divisor = self.term(self.heap.get(expr).operand(2), overrides);
                self.emit(
                    ObligationKind::DivisionByZero,
                    self.heap.span_of(expr),
                    Term::ne(divisor.clone(), Term::int(0)),
                );
                let dividend = self.term(self.heap.get(expr).operand(1), overrides);
                Term::Rem(Box::new(dividend), Box::new(divisor))
            }
            Opcode::BitwiseComplement => {
                let operand = self.term(self.heap.get(expr).operand(1), overrides);
                Term::app("byte$not", vec![operand])
            }
            Opcode::BitwiseAnd | Opcode::BitwiseOr | Opcode::BitwiseXor => {
                let function = match self.heap.opcode(expr) {
                    Opcode::BitwiseAnd => "byte$and",
                    Opcode::BitwiseOr => "byte$or",
                    _ => "byte$xor",
                };
                let operands = view::tuple_elements(self.heap, self.heap.get(expr).operand(1));
                Term::app(
                    function,
                    operands
                        .into_iter()
                        .map(|operand| self.term(operand, overrides))
                        .collect(),
                )
            }
            Opcode::ShiftLeft | Opcode::ShiftRight => {
                let function = if self.heap.opcode(expr) == Opcode::ShiftLeft {
                    "byte$shl"
                } else {
                    "byte$shr"
                };
                let value = self.term(self.heap.get(expr).operand(1), overrides);
                let amount = self.term(self.heap.get(expr).operand(2), overrides);
                Term::app(function, vec![value, amount])
            }
            Opcode::Dereference => {
                let operand = self.term(self.heap.get(expr).operand(1), overrides);
                Term::app("ref$load", vec![operand])
            }
            Opcode::New | Opcode::NewIn => {
                let operand = self.term(self.heap.get(expr).operand(1), overrides);
                self.fresh += 1;
                Term::app(format!("ref$new${}", self.fresh), vec![operand])
            }
            Opcode::LambdaAccess => {
                let link = self.heap.get(expr).operand(1);
                let name = match LinkView::new(self.heap, link).target() {
                    Some(target) => {
                        let view = CallableView::new(self.heap, target);
                        self.heap.resolve(name_of(self.heap, view.name)).to_string()
                    }
                    None => "unresolved".to_string(),
                };
                Term::app(format!("lambda${}", name), Vec::new())
            }
            Opcode::RecordAccess | Opcode::RecordBorrow => {
                let source = self.term(self.heap.get(expr).operand(1), overrides);
                let field = name_of(self.heap, self.heap.get(expr).operand(2));
                Term::Field(Box::new(source), self.heap.resolve(field).to_string())
            }
            Opcode::RecordUpdate => {
                let source = self.term(self.heap.get(expr).operand(1), overrides);
                let field = name_of(self.heap, self.heap.get(expr).operand(2));
                let value = self.term(self.heap.get(expr).operand(3), overrides);
                Term::app(
                    format!("record$store${}", self.heap.resolve(field)),
                    vec![source, value],
                )
            }
            Opcode::RecordInitialiser => {
                let view = RecordInitialiserView::new(self.heap, expr);
                self.fresh += 1;
                let literal = Term::app(
                    format!("record$lit${}", self.fresh),
                    view.values
                        .iter()
                        .map(|&value| self.term(value, overrides))
                        .collect(),
                );
                // connect field projections to the field values
                for (&name, &value) in view.fields.iter().zip(view.values.iter()) {
                    let field = self.heap.resolve(name_of(self.heap, name)).to_string();
                    let value_term = self.term(value, overrides);
                    self.context.push(Term::eq(
                        Term::Field(Box::new(literal.clone()), field),
                        value_term,
                    ));
                }
                literal
            }
            Opcode::ArrayAccess | Opcode::ArrayBorrow => {
                let source = self.term(self.heap.get(expr).operand(1), overrides);
                let index = self.term(self.heap.get(expr).operand(2), overrides);
                self.emit(
                    ObligationKind::ArrayBounds,
                    self.heap.span_of(expr),
                    Term::and(vec![
                        Term::le(Term::int(0), index.clone()),
                        Term::lt(index.clone(), Term::Length(Box::new(source.clone()))),
                    ]),
                );
                Term::Select(Box::new(source), Box::new(index))
            }
            Opcode::ArrayUpdate => {
                let source = self.term(self.heap.get(expr).operand(1), overrides);
                let index = self.term(self.heap.get(expr).operand(2), overrides);
                let value = self.term(self.heap.get(expr).operand(3), overrides);
                Term::app("array$store", vec![source, index, value])
            }
            Opcode::ArrayLength => {
                let source = self.term(self.heap.get(expr).operand(1), overrides);
                Term::Length(Box::new(source))
            }
            Opcode::ArrayGenerator => {
                let value = self.term(self.heap.get(expr).operand(1), overrides);
                let length = self.term(self.heap.get(expr).operand(2), overrides);
                self.emit(
                    ObligationKind::NegativeSize,
                    self.heap.span_of(expr),
                    Term::ge(length.clone(), Term::int(0)),
                );
                self.fresh += 1;
                let generated = Term::app(format!("array$gen${}", self.fresh), vec![value]);
                self.context
                    .push(Term::eq(Term::Length(Box::new(generated.clone())), length));
                generated
            }
            Opcode::ArrayInitialiser => {
                let values = view::tuple_elements(self.heap, self.heap.get(expr).operand(1));
                let terms: Vec<Term> = values
                    .iter()
                    .map(|&value| self.term(value, overrides))
                    .collect();
                self.fresh += 1;
                let literal = Term::app(format!("array$lit${}", self.fresh), terms.clone());
                self.context.push(Term::eq(
                    Term::Length(Box::new(literal.clone())),
                    Term::int(terms.len() as i64),
                ));
                for (position, term) in terms.into_iter().enumerate() {
                    self.context.push(Term::eq(
                        Term::Select(
                            Box::new(literal.clone()),
                            Box::new(Term::int(position as i64)),
                        ),
                        term,
                    ));
                }
                literal
            }
            Opcode::ArrayRange => {
                let start = self.term(self.heap.get(expr).operand(1), overrides);
                let end = self.term(self.heap.get(expr).operand(2), overrides);
                Term::app("array$range", vec![start, end])
            }
            other => {
                debug_assert!(!other.is_expression(), "untranslated expression {:?}", other);
                Term::Bool(true)
            }
        }
    }

    fn binary(
        &mut self,
        expr: ItemIndex,
        overrides: &Overrides,
        constructor: fn(Box<Term>, Box<Term>) -> Term,
    ) -> Term {
        let left = self.term(self.heap.get(expr).operand(0), overrides);
        let right = self.term(self.heap.get(expr).operand(1), overrides);
        constructor(Box::new(left), Box::new(right))
    }

    fn arith(
        &mut self,
        expr: ItemIndex,
        overrides: &Overrides,
        constructor: fn(Box<Term>, Box<Term>) -> Term,
    ) -> Term {
        let left = self.term(self.heap.get(expr).operand(1), overrides);
        let right = self.term(self.heap.get(expr).operand(2), overrides);
        constructor(Box::new(left), Box::new(right))
    }

    fn quantifier_term(&mut self, expr: ItemIndex, overrides: &Overrides) -> Term {
        let view = QuantifierView::new(self.heap, expr);
        let mut bound = Vec::new();
        let mut constraints = Vec::new();
        let mut inner = overrides.clone();
        for (position, &parameter) in view.parameters.iter().enumerate() {
            let var = VariableView::new(self.heap, parameter);
            let base = self.heap.resolve(name_of(self.heap, var.name)).to_string();
            let bound_name = format!("{}!{}", base, position);
            let sort = sort_of(self.heap, &lift(self.heap, var.declared_type));
            inner.insert(parameter, Term::var(bound_name.clone()));
            // a range initialiser bounds the quantified variable
            if let Some(initialiser) = var.initialiser {
                if self.heap.opcode(initialiser) == Opcode::ArrayRange {
                    let start = self.term(self.heap.get(initialiser).operand(1), overrides);
                    let end = self.term(self.heap.get(initialiser).operand(2), overrides);
                    constraints.push(Term::le(start, Term::var(bound_name.clone())));
                    constraints.push(Term::lt(Term::var(bound_name.clone()), end));
                }
            }
            bound.push((bound_name, sort));
        }
        let body = self.term(view.body, &inner);
        if view.universal {
            Term::Forall {
                bound,
                body: Box::new(Term::implies(Term::and(constraints), body)),
            }
        } else {
            let mut conjuncts = constraints;
            conjuncts.push(body);
            Term::Exists {
                bound,
                body: Box::new(Term::and(conjuncts)),
            }
        }
    }

    /// Translates an invocation. Pure calls become uninterpreted
    /// applications with the callee's `requires` as obligations and
    /// `ensures` instantiated into Γ for the immediate successor; method
    /// calls produce fresh unconstrained symbols and havoc
    /// reference-carrying arguments.
    fn invoke_term(&mut self, expr: ItemIndex, overrides: &Overrides) -> Term {
        let invoke = InvokeView::new(self.heap, expr);
        let binding = BindingView::new(self.heap, invoke.binding);
        let arguments: Vec<Term> = invoke
            .arguments
            .iter()
            .map(|&argument| self.term(argument, overrides))
            .collect();
        let Some(target) = LinkView::new(self.heap, binding.link).target() else {
            return Term::app("unresolved$call", arguments);
        };
        let callee = CallableView::new(self.heap, target);
        let callee_name = self
            .heap
            .resolve(name_of(self.heap, callee.name))
            .to_string();
        let span = self.heap.span_of(expr);

        // argument coercions into constrained parameter types
        for (&parameter, argument) in callee.parameters.iter().zip(&arguments) {
            let declared = lift(
                self.heap,
                VariableView::new(self.heap, parameter).declared_type,
            );
            self.coercion_obligations(&declared, argument, span);
        }

        let mut call_overrides = Overrides::new();
        for (&parameter, argument) in callee.parameters.iter().zip(&arguments) {
            call_overrides.insert(parameter, argument.clone());
        }

        if callee.opcode == Opcode::Method {
            // an opaque state transition: fresh result, no axioms
            self.fresh += 1;
            return Term::app(format!("{}${}", callee_name, self.fresh), arguments);
        }

        // each precondition becomes an obligation at the call site
        for &requires in &callee.requires {
            let goal = self.term(requires, &call_overrides);
            self.emit(ObligationKind::Precondition, span, goal);
        }

        let result = match callee.returns.len() {
            1 => Term::app(callee_name.clone(), arguments.clone()),
            _ => Term::app(format!("{}#0", callee_name), arguments.clone()),
        };
        for (position, &ret) in callee.returns.iter().enumerate() {
            let value = if callee.returns.len() == 1 {
                result.clone()
            } else {
                Term::app(format!("{}#{}", callee_name, position), arguments.clone())
            };
            call_overrides.insert(ret, value);
        }
        // the postcondition holds of the result for the continuation
        for &ensures in &callee.ensures {
            let assumption = self.term(ensures, &call_overrides);
            self.context.push(assumption);
        }
        result
    }

    // ---- Type invariants ----

    /// Instantiated invariant terms for a value of the given declared
    /// type. Nested aliases unfold lazily up to a bound.
    fn invariant_terms(&mut self, ty: &Type, value: &Term, fuel: usize) -> Vec<Term> {
        if fuel == 0 {
            return Vec::new();
        }
        let Type::Nominal(nominal) = ty else {
            return Vec::new();
        };
        if self.heap.opcode(nominal.link) != Opcode::Link {
            return Vec::new();
        }
        let Some(target) = LinkView::new(self.heap, nominal.link).target() else {
            return Vec::new();
        };
        if self.heap.opcode(target) != Opcode::TypeAlias {
            return Vec::new();
        }
        let alias = TypeAliasView::new(self.heap, target);
        let mut overrides = Overrides::new();
        overrides.insert(alias.var, value.clone());
        let mut terms: Vec<Term> = alias
            .invariants
            .iter()
            .map(|&invariant| self.term(invariant, &overrides))
            .collect();
        // the alias may itself abbreviate another constrained alias
        let underlying = lift(
            self.heap,
            VariableView::new(self.heap, alias.var).declared_type,
        );
        terms.extend(self.invariant_terms(&underlying, value, fuel - 1));
        terms
    }

    /// Obligations for coercing `value` into `declared`.
    fn coercion_obligations(&mut self, declared: &Type, value: &Term, span: Span) {
        for goal in self.invariant_terms(declared, value, INVARIANT_UNFOLD_LIMIT) {
            self.emit(ObligationKind::TypeInvariant, span, goal);
        }
    }

    // ---- Symbols and versions ----

    fn base_name(&mut self, declaration: ItemIndex) -> String {
        if let Some(name) = self.base_names.get(&declaration) {
            return name.clone();
        }
        let raw = match self.heap.opcode(declaration) {
            Opcode::Variable | Opcode::VariableInitialised | Opcode::StaticVariable => self
                .heap
                .resolve(name_of(self.heap, self.heap.get(declaration).operand(1)))
                .to_string(),
            _ => format!("item{}", declaration.raw()),
        };
        let name = if self.taken.contains(&raw) {
            format!("{}_{}", raw, declaration.raw())
        } else {
            raw
        };
        self.taken.insert(name.clone());
        self.base_names.insert(declaration, name.clone());
        name
    }

    fn symbol_at(&mut self, declaration: ItemIndex, version: u32) -> String {
        format!("{}${}", self.base_name(declaration), version)
    }

    /// The symbol for a declaration at its current version.
    fn symbol(&mut self, declaration: ItemIndex) -> String {
        let version = self.versions.get(&declaration).copied().unwrap_or(0);
        let symbol = self.symbol_at(declaration, version);
        self.register(declaration, &symbol);
        symbol
    }

    fn declare_variable(&mut self, declaration: ItemIndex) {
        self.versions.insert(declaration, 0);
        self.counters.insert(declaration, 0);
        let symbol = self.symbol_at(declaration, 0);
        self.register(declaration, &symbol);
    }

    fn havoc(&mut self, declaration: ItemIndex) -> String {
        let counter = self.counters.entry(declaration).or_insert(0);
        *counter += 1;
        let version = *counter;
        self.versions.insert(declaration, version);
        let symbol = self.symbol_at(declaration, version);
        self.register(declaration, &symbol);
        symbol
    }

    fn register_symbol(&mut self, declaration: ItemIndex, version: u32) {
        let symbol = self.symbol_at(declaration, version);
        self.register(declaration, &symbol);
    }

    fn register(&mut self, declaration: ItemIndex, symbol: &str) {
        if !self.sorts.contains_key(symbol) {
            let sort = self.sort_of_declaration(declaration);
            self.sorts.insert(symbol.to_string(), sort);
        }
    }

    fn sort_of_declaration(&self, declaration: ItemIndex) -> Sort {
        match self.heap.opcode(declaration) {
            Opcode::Variable | Opcode::VariableInitialised => {
                let ty = lift(
                    self.heap,
                    VariableView::new(self.heap, declaration).declared_type,
                );
                sort_of(self.heap, &ty)
            }
            Opcode::StaticVariable => {
                let ty = lift(
                    self.heap,
                    StaticVariableView::new(self.heap, declaration).declared_type,
                );
                sort_of(self.heap, &ty)
            }
            _ => Sort::Value,
        }
    }

    // ---- Obligations ----

    fn emit(&mut self, kind: ObligationKind, span: Span, goal: Term) {
        let context = self.context.clone();
        let mut free = BTreeSet::new();
        goal.free_vars(&mut free);
        for term in &context {
            term.free_vars(&mut free);
        }
        let variables: Vec<(String, Sort)> = free
            .into_iter()
            .map(|name| {
                let sort = self.sorts.get(&name).copied().unwrap_or(Sort::Value);
                (name, sort)
            })
            .collect();
        let name = format!("{}#{}", self.current, self.obligation_counter);
        self.obligation_counter += 1;
        self.module.obligations.push(Obligation {
            name,
            kind,
            span,
            variables,
            context,
            goal,
        });
    }
}

/// The assertion-language sort a source type maps to.
fn sort_of(heap: &ItemHeap, ty: &Type) -> Sort {
    sort_of_bounded(heap, ty, 8)
}

fn sort_of_bounded(heap: &ItemHeap, ty: &Type, fuel: usize) -> Sort {
    match ty {
        Type::Int | Type::Byte => Sort::Int,
        Type::Bool => Sort::Bool,
        Type::Nominal(nominal) if fuel > 0 => match expand_nominal(heap, nominal) {
            Some((_, expanded)) => sort_of_bounded(heap, &expanded, fuel - 1),
            None => Sort::Value,
        },
        _ => Sort::Value,
    }
}
