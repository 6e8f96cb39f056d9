//! Variable versioning.
//!
//! Every definition of a variable gets a fresh numeric version so the
//! verification-condition generator can encode assignments as equalities
//! between distinct symbols. The environment is a pair: a function-wide
//! high-water mark per variable, and the version visible at the current
//! program point. Loop heads and calls that may mutate referenced state
//! havoc; joins issue a fresh version wherever the branches disagree.
//!
//! The pass also populates each loop item's modified tuple, which is how
//! downstream consumers learn what a loop body may redefine without
//! recomputing it.

use std::collections::HashMap;

use wick_heap::view::{
    self, name_of, AssignView, BindingView, CallableView, CaseView, IfView, InvokeView, LinkView,
    LoopView, ModuleView, QuantifierView, ReturnView, SwitchView, UnitView, VariableView,
};
use wick_heap::{ItemHeap, ItemIndex, Opcode};
use wick_types::{expand_nominal, lift, Type};

/// The result of versioning: a version for every use and definition site.
///
/// Keys are the items that use or define a variable: declaration items for
/// the initial version, variable-access items for uses and assignment
/// targets.
#[derive(Debug, Default)]
pub struct VersionMap {
    versions: HashMap<ItemIndex, u32>,
}

impl VersionMap {
    pub fn version_of(&self, site: ItemIndex) -> Option<u32> {
        self.versions.get(&site).copied()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// The version visible per variable at one program point.
type LocalEnv = HashMap<ItemIndex, u32>;

/// Versions every callable in the module and fills in loop modified
/// tuples. Idempotent: a second run recomputes the same versions and
/// rewrites the same tuples.
pub fn version_module(heap: &mut ItemHeap) -> VersionMap {
    let Some(root) = heap.root() else {
        return VersionMap::default();
    };
    if heap.opcode(root) != Opcode::Module {
        return VersionMap::default();
    }
    let module = ModuleView::new(heap, root);
    let mut versioner = Versioner {
        heap,
        global: HashMap::new(),
        map: VersionMap::default(),
    };
    for unit in module.units {
        let declarations = UnitView::new(versioner.heap, unit).declarations;
        for declaration in declarations {
            if matches!(
                versioner.heap.opcode(declaration),
                Opcode::Function | Opcode::Method | Opcode::Property
            ) {
                versioner.version_callable(declaration);
            }
        }
    }
    log::debug!("versioned {} sites", versioner.map.len());
    versioner.map
}

struct Versioner<'h> {
    heap: &'h mut ItemHeap,
    /// Highest version ever issued, per variable, across the current
    /// function.
    global: HashMap<ItemIndex, u32>,
    map: VersionMap,
}

impl<'h> Versioner<'h> {
    fn version_callable(&mut self, declaration: ItemIndex) {
        let view = CallableView::new(self.heap, declaration);
        log::trace!(
            "versioning {}",
            self.heap.resolve(name_of(self.heap, view.name))
        );
        self.global.clear();
        let mut env = LocalEnv::new();
        for &parameter in view.parameters.iter().chain(view.returns.iter()) {
            self.declare(&mut env, parameter);
        }
        for &requires in &view.requires {
            self.visit_expr(&mut env, requires);
        }
        let mut env = self.visit_stmt(env, view.body);
        for &ensures in &view.ensures {
            self.visit_expr(&mut env, ensures);
        }
    }

    fn declare(&mut self, env: &mut LocalEnv, declaration: ItemIndex) {
        self.global.insert(declaration, 0);
        env.insert(declaration, 0);
        self.map.versions.insert(declaration, 0);
    }

    /// Issues a fresh version for `declaration` and makes it current.
    fn havoc(&mut self, env: &mut LocalEnv, declaration: ItemIndex) -> u32 {
        let counter = self.global.entry(declaration).or_insert(0);
        *counter += 1;
        let fresh = *counter;
        env.insert(declaration, fresh);
        fresh
    }

    /// Merges two branch environments, issuing a fresh version wherever
    /// they disagree.
    fn join(&mut self, left: &LocalEnv, right: &LocalEnv) -> LocalEnv {
        let mut joined = LocalEnv::new();
        for (&declaration, &lv) in left {
            let Some(&rv) = right.get(&declaration) else {
                continue;
            };
            if lv == rv {
                joined.insert(declaration, lv);
            } else {
                let counter = self.global.entry(declaration).or_insert(0);
                *counter += 1;
                joined.insert(declaration, *counter);
            }
        }
        joined
    }

    // ---- Statements ----

    fn visit_stmt(&mut self, mut env: LocalEnv, stmt: ItemIndex) -> LocalEnv {
        match self.heap.opcode(stmt) {
            Opcode::Block => {
                for statement in view::BlockView::new(self.heap, stmt).statements {
                    env = self.visit_stmt(env, statement);
                }
                env
            }
            Opcode::NamedBlock => {
                let body = view::NamedBlockView::new(self.heap, stmt).body;
                self.visit_stmt(env, body)
            }
            Opcode::Variable | Opcode::VariableInitialised => {
                let view = VariableView::new(self.heap, stmt);
                if let Some(initialiser) = view.initialiser {
                    self.visit_expr(&mut env, initialiser);
                }
                self.declare(&mut env, stmt);
                env
            }
            Opcode::Assign => {
                let view = AssignView::new(self.heap, stmt);
                for &rhs in &view.rhs {
                    self.visit_expr(&mut env, rhs);
                }
                for &lval in &view.lhs {
                    self.visit_lval(&mut env, lval);
                }
                env
            }
            Opcode::Assert | Opcode::Assume | Opcode::Debug => {
                let operand = self.heap.get(stmt).operand(0);
                self.visit_expr(&mut env, operand);
                env
            }
            Opcode::Return => {
                let view = ReturnView::new(self.heap, stmt);
                for &operand in &view.operands {
                    self.visit_expr(&mut env, operand);
                }
                env
            }
            Opcode::If | Opcode::IfElse => {
                let view = IfView::new(self.heap, stmt);
                self.visit_expr(&mut env, view.condition);
                let true_env = self.visit_stmt(env.clone(), view.true_branch);
                let false_env = match view.false_branch {
                    Some(branch) => self.visit_stmt(env.clone(), branch),
                    None => env,
                };
                self.join(&true_env, &false_env)
            }
            Opcode::Switch => {
                let view = SwitchView::new(self.heap, stmt);
                self.visit_expr(&mut env, view.condition);
                let mut joined: Option<LocalEnv> = None;
                let mut has_default = false;
                for case in view.cases {
                    let case_view = CaseView::new(self.heap, case);
                    has_default |= case_view.is_default();
                    for &value in &case_view.values {
                        self.visit_expr(&mut env, value);
                    }
                    let branch = self.visit_stmt(env.clone(), case_view.body);
                    joined = Some(match joined {
                        Some(acc) => self.join(&acc, &branch),
                        None => branch,
                    });
                }
                if !has_default {
                    // the implicit empty branch joins the incoming state
                    joined = Some(match joined {
                        Some(acc) => self.join(&acc, &env),
                        None => env,
                    });
                }
                joined.unwrap_or_default()
            }
            Opcode::While | Opcode::DoWhile => self.visit_loop(env, stmt),
            _ => env,
        }
    }

    fn visit_loop(&mut self, env: LocalEnv, stmt: ItemIndex) -> LocalEnv {
        let view = LoopView::new(self.heap, stmt);
        let modified = crate::modified::modified_variables(self.heap, view.body);

        // publish the modified set on the loop item
        let tuple = self
            .heap
            .allocate(Opcode::Tuple, modified.iter().copied().collect(), None);
        let position = LoopView::modified_operand_position(self.heap, stmt);
        self.heap
            .replace_operand(stmt, position, tuple)
            .expect("loop carries a modified tuple");

        // the body observes havocked versions
        let mut body_env = env.clone();
        for &declaration in &modified {
            self.havoc(&mut body_env, declaration);
        }
        self.visit_expr(&mut body_env, view.condition);
        for &invariant in &view.invariants {
            self.visit_expr(&mut body_env, invariant);
        }
        let _ = self.visit_stmt(body_env, view.body);

        // execution continues with another fresh set of versions
        let mut after = env;
        for &declaration in &modified {
            self.havoc(&mut after, declaration);
        }
        after
    }

    fn visit_lval(&mut self, env: &mut LocalEnv, lval: ItemIndex) {
        match self.heap.opcode(lval) {
            Opcode::VariableCopy | Opcode::VariableMove => {
                let declaration = self.heap.get(lval).operand(1);
                let fresh = self.havoc(env, declaration);
                self.map.versions.insert(lval, fresh);
            }
            Opcode::StaticVariableAccess => {
                let link = self.heap.get(lval).operand(1);
                if let Some(target) = LinkView::new(self.heap, link).target() {
                    let fresh = self.havoc(env, target);
                    self.map.versions.insert(lval, fresh);
                }
            }
            Opcode::ArrayAccess | Opcode::ArrayBorrow | Opcode::RecordAccess
            | Opcode::RecordBorrow | Opcode::Dereference => {
                // the index/field operands are ordinary uses; the base
                // variable is redefined
                let operands: Vec<ItemIndex> =
                    self.heap.get(lval).operands.iter().copied().collect();
                for operand in operands.into_iter().skip(2) {
                    if self.heap.opcode(operand).is_expression() {
                        self.visit_expr(env, operand);
                    }
                }
                let base = self.heap.get(lval).operand(1);
                self.visit_lval(env, base);
            }
            _ => {}
        }
    }

    // ---- Expressions ----

    fn visit_expr(&mut self, env: &mut LocalEnv, expr: ItemIndex) {
        // method calls may mutate referenced state; handled specially so
        // the argument havoc lands after the argument uses are recorded
        match self.heap.opcode(expr) {
            Opcode::VariableCopy | Opcode::VariableMove => {
                let declaration = self.heap.get(expr).operand(1);
                let version = env.get(&declaration).copied().unwrap_or(0);
                self.map.versions.insert(expr, version);
            }
            Opcode::StaticVariableAccess => {
                let link = self.heap.get(expr).operand(1);
                if let Some(target) = LinkView::new(self.heap, link).target() {
                    let version = env.get(&target).copied().unwrap_or(0);
                    self.map.versions.insert(expr, version);
                }
            }
            Opcode::Invoke => {
                let invoke = InvokeView::new(self.heap, expr);
                for &argument in &invoke.arguments {
                    self.visit_expr(env, argument);
                }
                let binding = BindingView::new(self.heap, invoke.binding);
                let is_method = LinkView::new(self.heap, binding.link)
                    .target()
                    .map(|target| self.heap.opcode(target) == Opcode::Method)
                    .unwrap_or(false);
                if is_method {
                    // the callee may have mutated anything an argument
                    // reaches through a reference
                    for &argument in &invoke.arguments {
                        self.havoc_reference_carriers(env, argument);
                    }
                }
            }
            Opcode::IndirectInvoke => {
                let view = view::IndirectInvokeView::new(self.heap, expr);
                self.visit_expr(env, view.callee);
                for &argument in &view.arguments {
                    self.visit_expr(env, argument);
                }
            }
            Opcode::UniversalQuantifier | Opcode::ExistentialQuantifier => {
                let view = QuantifierView::new(self.heap, expr);
                let mut inner = env.clone();
                for &parameter in &view.parameters {
                    let var = VariableView::new(self.heap, parameter);
                    if let Some(initialiser) = var.initialiser {
                        self.visit_expr(&mut inner, initialiser);
                    }
                    self.declare(&mut inner, parameter);
                }
                self.visit_expr(&mut inner, view.body);
            }
            Opcode::Constant | Opcode::LambdaAccess => {}
            Opcode::LogicalNot => self.visit_expr(env, self.heap.get(expr).operand(0)),
            Opcode::LogicalAnd | Opcode::LogicalOr => {
                let operands =
                    view::tuple_elements(self.heap, self.heap.get(expr).operand(0));
                for operand in operands {
                    self.visit_expr(env, operand);
                }
            }
            other if other.is_expression() => {
                let operands: Vec<ItemIndex> =
                    self.heap.get(expr).operands.iter().copied().collect();
                for operand in operands {
                    let op = self.heap.opcode(operand);
                    if op.is_expression() {
                        self.visit_expr(env, operand);
                    } else if op == Opcode::Tuple {
                        for element in view::tuple_elements(self.heap, operand) {
                            if self.heap.opcode(element).is_expression() {
                                self.visit_expr(env, element);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    /// Havocs every variable occurring syntactically in `argument` when its
    /// static type may transitively contain a reference.
    fn havoc_reference_carriers(&mut self, env: &mut LocalEnv, argument: ItemIndex) {
        let carries = view::expression_type(self.heap, argument)
            .map(|slot| {
                let ty = lift(self.heap, slot);
                contains_reference(self.heap, &ty, 16)
            })
            .unwrap_or(false);
        if !carries {
            return;
        }
        let mut variables = Vec::new();
        collect_variables(self.heap, argument, &mut variables);
        for declaration in variables {
            self.havoc(env, declaration);
        }
    }
}

/// Conservative reference-containment: open records and unexpandable
/// recursion count as containing references.
fn contains_reference(heap: &ItemHeap, ty: &Type, fuel: usize) -> bool {
    if fuel == 0 {
        return true;
    }
    match ty {
        Type::Reference(_, _) => true,
        Type::Record(record) => {
            record.open
                || record
                    .fields
                    .values()
                    .any(|field| contains_reference(heap, field, fuel - 1))
        }
        Type::Array(element) => contains_reference(heap, element, fuel - 1),
        Type::Union(members) | Type::Intersection(members) => members
            .iter()
            .any(|member| contains_reference(heap, member, fuel - 1)),
        Type::Nominal(nominal) => match expand_nominal(heap, nominal) {
            Some((_, expanded)) => contains_reference(heap, &expanded, fuel - 1),
            None => true,
        },
        Type::Recursive(_) | Type::Variable(_) => true,
        Type::Callable(callable) => matches!(callable, wick_types::Callable::Method { .. }),
        _ => false,
    }
}

fn collect_variables(heap: &ItemHeap, index: ItemIndex, out: &mut Vec<ItemIndex>) {
    let item = heap.get(index);
    match item.opcode {
        Opcode::VariableCopy | Opcode::VariableMove => {
            out.push(item.operand(1));
            return;
        }
        Opcode::Link | Opcode::TypeRecursive => return,
        _ => {}
    }
    for &operand in &item.operands {
        if heap.opcode(operand) == Opcode::Link || heap.opcode(operand).is_type() {
            continue;
        }
        collect_variables(heap, operand, out);
    }
}
