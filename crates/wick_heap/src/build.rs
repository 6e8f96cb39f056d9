//! Heap construction.
//!
//! [`ModuleBuilder`] is the surface the front end targets: `parse(unit_name,
//! source_text)` populates a heap through these constructors, producing a
//! `Module` root containing one `Unit`. Imports are recorded unresolved and
//! most expression type slots start as `any` placeholders; flow typing
//! rewrites them in place once inference has run.
//!
//! Tests use the same builder to assemble programs without a parser.

use num_bigint::BigInt;
use wick_base::{Span, Symbol};

use crate::heap::ItemHeap;
use crate::item::{ItemIndex, Modifiers, Operands, Payload};
use crate::opcode::Opcode;

/// Typed constructors over a borrowed heap.
pub struct ModuleBuilder<'h> {
    heap: &'h mut ItemHeap,
    // primitive type items are shared rather than re-allocated per use
    any: Option<ItemIndex>,
    void: Option<ItemIndex>,
    null: Option<ItemIndex>,
    bool_: Option<ItemIndex>,
    byte: Option<ItemIndex>,
    int: Option<ItemIndex>,
}

impl<'h> ModuleBuilder<'h> {
    pub fn new(heap: &'h mut ItemHeap) -> Self {
        Self {
            heap,
            any: None,
            void: None,
            null: None,
            bool_: None,
            byte: None,
            int: None,
        }
    }

    pub fn heap(&mut self) -> &mut ItemHeap {
        self.heap
    }

    fn alloc(&mut self, opcode: Opcode, operands: &[ItemIndex], data: Option<Payload>) -> ItemIndex {
        self.heap
            .allocate(opcode, operands.iter().copied().collect(), data)
    }

    /// Attaches a source span to an already-built item.
    pub fn spanned(&mut self, index: ItemIndex, span: Span) -> ItemIndex {
        self.heap.set_span(index, span);
        index
    }

    // ---- Structure ----

    pub fn tuple(&mut self, entries: &[ItemIndex]) -> ItemIndex {
        self.alloc(Opcode::Tuple, entries, None)
    }

    pub fn identifier(&mut self, name: &str) -> ItemIndex {
        let sym = self.heap.intern(name);
        self.alloc(Opcode::Identifier, &[], Some(Payload::Name(sym)))
    }

    pub fn identifier_sym(&mut self, sym: Symbol) -> ItemIndex {
        self.alloc(Opcode::Identifier, &[], Some(Payload::Name(sym)))
    }

    pub fn value(&mut self, value: i64) -> ItemIndex {
        self.alloc(Opcode::Value, &[], Some(Payload::Int(value.into())))
    }

    pub fn modifiers(&mut self, flags: Modifiers) -> ItemIndex {
        let markers: Vec<ItemIndex> = flags
            .opcodes()
            .into_iter()
            .map(|op| self.alloc(op, &[], None))
            .collect();
        self.tuple(&markers)
    }

    // ---- Declarations ----

    /// Builds a module with the given units and sets it as the heap root.
    pub fn module(&mut self, name: &str, units: &[ItemIndex]) -> ItemIndex {
        let name = self.identifier(name);
        let units = self.tuple(units);
        let externs = self.tuple(&[]);
        let diagnostics = self.tuple(&[]);
        let module = self.alloc(Opcode::Module, &[name, units, externs, diagnostics], None);
        self.heap.set_root(module);
        module
    }

    pub fn unit(&mut self, name: &str, declarations: &[ItemIndex]) -> ItemIndex {
        let name = self.identifier(name);
        let declarations = self.tuple(declarations);
        self.alloc(Opcode::Unit, &[name, declarations], None)
    }

    pub fn import(&mut self, path: &[&str]) -> ItemIndex {
        let components: Vec<ItemIndex> = path.iter().map(|p| self.identifier(p)).collect();
        let path = self.tuple(&components);
        self.alloc(Opcode::Import, &[path], None)
    }

    pub fn import_from(&mut self, path: &[&str], name: &str) -> ItemIndex {
        let components: Vec<ItemIndex> = path.iter().map(|p| self.identifier(p)).collect();
        let path = self.tuple(&components);
        let name = self.identifier(name);
        self.alloc(Opcode::ImportFrom, &[path, name], None)
    }

    pub fn static_variable(&mut self, name: &str, ty: ItemIndex, init: ItemIndex) -> ItemIndex {
        let modifiers = self.tuple(&[]);
        let name = self.identifier(name);
        self.alloc(Opcode::StaticVariable, &[modifiers, name, ty, init], None)
    }

    pub fn static_variable_final(
        &mut self,
        name: &str,
        ty: ItemIndex,
        init: ItemIndex,
    ) -> ItemIndex {
        let modifiers = self.modifiers(Modifiers::FINAL);
        let name = self.identifier(name);
        self.alloc(Opcode::StaticVariable, &[modifiers, name, ty, init], None)
    }

    /// A type alias `type name is (var) where invariants`.
    pub fn type_alias(&mut self, name: &str, var: ItemIndex, invariants: &[ItemIndex]) -> ItemIndex {
        self.type_alias_templated(name, &[], var, invariants)
    }

    pub fn type_alias_templated(
        &mut self,
        name: &str,
        template: &[ItemIndex],
        var: ItemIndex,
        invariants: &[ItemIndex],
    ) -> ItemIndex {
        let modifiers = self.tuple(&[]);
        let name = self.identifier(name);
        let template = self.tuple(template);
        let invariants = self.tuple(invariants);
        self.alloc(
            Opcode::TypeAlias,
            &[modifiers, name, template, var, invariants],
            None,
        )
    }

    fn callable(
        &mut self,
        opcode: Opcode,
        name: &str,
        parameters: &[ItemIndex],
        returns: &[ItemIndex],
        requires: &[ItemIndex],
        ensures: &[ItemIndex],
        body: ItemIndex,
    ) -> ItemIndex {
        let modifiers = self.tuple(&[]);
        let name = self.identifier(name);
        let template = self.tuple(&[]);
        let parameters = self.tuple(parameters);
        let returns = self.tuple(returns);
        let requires = self.tuple(requires);
        let ensures = self.tuple(ensures);
        self.alloc(
            opcode,
            &[modifiers, name, template, parameters, returns, requires, ensures, body],
            None,
        )
    }

    pub fn function(
        &mut self,
        name: &str,
        parameters: &[ItemIndex],
        returns: &[ItemIndex],
        requires: &[ItemIndex],
        ensures: &[ItemIndex],
        body: ItemIndex,
    ) -> ItemIndex {
        self.callable(Opcode::Function, name, parameters, returns, requires, ensures, body)
    }

    pub fn method(
        &mut self,
        name: &str,
        parameters: &[ItemIndex],
        returns: &[ItemIndex],
        requires: &[ItemIndex],
        ensures: &[ItemIndex],
        body: ItemIndex,
    ) -> ItemIndex {
        self.callable(Opcode::Method, name, parameters, returns, requires, ensures, body)
    }

    pub fn property(&mut self, name: &str, parameters: &[ItemIndex], body: ItemIndex) -> ItemIndex {
        self.callable(Opcode::Property, name, parameters, &[], &[], &[], body)
    }

    /// A lambda declaration. The computed-type operand is derived from the
    /// parameter and return declarations.
    pub fn lambda(
        &mut self,
        name: &str,
        parameters: &[ItemIndex],
        returns: &[ItemIndex],
        body: ItemIndex,
    ) -> ItemIndex {
        let modifiers = self.tuple(&[]);
        let name = self.identifier(name);
        let template = self.tuple(&[]);
        let parameter_types: Vec<ItemIndex> = parameters
            .iter()
            .map(|&p| self.heap.get(p).operand(2))
            .collect();
        let return_types: Vec<ItemIndex> = returns
            .iter()
            .map(|&r| self.heap.get(r).operand(2))
            .collect();
        let computed = self.type_function(&parameter_types, &return_types);
        let parameters = self.tuple(parameters);
        let returns = self.tuple(returns);
        let captured = self.tuple(&[]);
        let declared = self.tuple(&[]);
        self.alloc(
            Opcode::Lambda,
            &[modifiers, name, template, parameters, returns, captured, declared, body, computed],
            None,
        )
    }

    pub fn variable(&mut self, name: &str, ty: ItemIndex) -> ItemIndex {
        let modifiers = self.tuple(&[]);
        let name = self.identifier(name);
        self.alloc(Opcode::Variable, &[modifiers, name, ty], None)
    }

    pub fn variable_final(&mut self, name: &str, ty: ItemIndex) -> ItemIndex {
        let modifiers = self.modifiers(Modifiers::FINAL);
        let name = self.identifier(name);
        self.alloc(Opcode::Variable, &[modifiers, name, ty], None)
    }

    pub fn variable_initialised(
        &mut self,
        name: &str,
        ty: ItemIndex,
        init: ItemIndex,
    ) -> ItemIndex {
        let modifiers = self.tuple(&[]);
        let name = self.identifier(name);
        self.alloc(
            Opcode::VariableInitialised,
            &[modifiers, name, ty, init],
            None,
        )
    }

    /// An unresolved link carrying candidate targets; the resolver narrows
    /// these to one.
    pub fn link(&mut self, name: &str, candidates: &[ItemIndex]) -> ItemIndex {
        let name = self.identifier(name);
        let mut operands = vec![name];
        operands.extend_from_slice(candidates);
        self.alloc(Opcode::Link, &operands, None)
    }

    /// A binding of a link to template arguments. The concrete-type cache
    /// starts as an `any` placeholder and is rewritten by flow typing.
    pub fn binding(&mut self, link: ItemIndex, arguments: &[ItemIndex]) -> ItemIndex {
        let arguments = self.tuple(arguments);
        let placeholder = self.type_any();
        self.alloc(Opcode::Binding, &[link, arguments, placeholder], None)
    }

    pub fn template_type(&mut self, name: &str) -> ItemIndex {
        let sym = self.heap.intern(name);
        self.alloc(Opcode::TemplateType, &[], Some(Payload::Name(sym)))
    }

    pub fn template_lifetime(&mut self, name: &str) -> ItemIndex {
        let sym = self.heap.intern(name);
        self.alloc(Opcode::TemplateLifetime, &[], Some(Payload::Name(sym)))
    }

    // ---- Types ----

    pub fn type_any(&mut self) -> ItemIndex {
        if let Some(t) = self.any {
            return t;
        }
        let t = self.alloc(Opcode::TypeAny, &[], None);
        self.any = Some(t);
        t
    }

    pub fn type_void(&mut self) -> ItemIndex {
        if let Some(t) = self.void {
            return t;
        }
        let t = self.alloc(Opcode::TypeVoid, &[], None);
        self.void = Some(t);
        t
    }

    pub fn type_null(&mut self) -> ItemIndex {
        if let Some(t) = self.null {
            return t;
        }
        let t = self.alloc(Opcode::TypeNull, &[], None);
        self.null = Some(t);
        t
    }

    pub fn type_bool(&mut self) -> ItemIndex {
        if let Some(t) = self.bool_ {
            return t;
        }
        let t = self.alloc(Opcode::TypeBool, &[], None);
        self.bool_ = Some(t);
        t
    }

    pub fn type_byte(&mut self) -> ItemIndex {
        if let Some(t) = self.byte {
            return t;
        }
        let t = self.alloc(Opcode::TypeByte, &[], None);
        self.byte = Some(t);
        t
    }

    pub fn type_int(&mut self) -> ItemIndex {
        if let Some(t) = self.int {
            return t;
        }
        let t = self.alloc(Opcode::TypeInt, &[], None);
        self.int = Some(t);
        t
    }

    pub fn type_array(&mut self, element: ItemIndex) -> ItemIndex {
        self.alloc(Opcode::TypeArray, &[element], None)
    }

    /// A record type. Fields are sorted by name here so the canonical order
    /// holds for every consumer, including the serializer.
    pub fn type_record(&mut self, fields: &[(&str, ItemIndex)], open: bool) -> ItemIndex {
        let mut named: Vec<(Symbol, ItemIndex)> = fields
            .iter()
            .map(|(name, ty)| (self.heap.intern(name), *ty))
            .collect();
        named.sort_by(|a, b| self.heap.interner().compare(a.0, b.0));
        let fields: Vec<ItemIndex> = named
            .into_iter()
            .map(|(sym, ty)| {
                let name = self.identifier_sym(sym);
                self.alloc(Opcode::Field, &[name, ty], None)
            })
            .collect();
        let fields = self.tuple(&fields);
        let opcode = if open {
            Opcode::TypeRecordOpen
        } else {
            Opcode::TypeRecord
        };
        self.alloc(opcode, &[fields], None)
    }

    pub fn type_reference(&mut self, element: ItemIndex) -> ItemIndex {
        self.alloc(Opcode::TypeReference, &[element], None)
    }

    pub fn type_reference_in(&mut self, element: ItemIndex, lifetime: &str) -> ItemIndex {
        let lifetime = self.identifier(lifetime);
        self.alloc(Opcode::TypeReferenceScoped, &[element, lifetime], None)
    }

    pub fn type_function(&mut self, parameters: &[ItemIndex], returns: &[ItemIndex]) -> ItemIndex {
        let parameters = self.tuple(parameters);
        let returns = self.tuple(returns);
        self.alloc(Opcode::TypeFunction, &[parameters, returns], None)
    }

    pub fn type_method(
        &mut self,
        parameters: &[ItemIndex],
        returns: &[ItemIndex],
        captured: &[ItemIndex],
        lifetimes: &[ItemIndex],
    ) -> ItemIndex {
        let parameters = self.tuple(parameters);
        let returns = self.tuple(returns);
        let captured = self.tuple(captured);
        let lifetimes = self.tuple(lifetimes);
        self.alloc(
            Opcode::TypeMethod,
            &[parameters, returns, captured, lifetimes],
            None,
        )
    }

    pub fn type_property(&mut self, parameters: &[ItemIndex]) -> ItemIndex {
        let parameters = self.tuple(parameters);
        self.alloc(Opcode::TypeProperty, &[parameters], None)
    }

    pub fn type_union(&mut self, members: &[ItemIndex]) -> ItemIndex {
        self.alloc(Opcode::TypeUnion, members, None)
    }

    pub fn type_nominal(&mut self, link: ItemIndex, arguments: &[ItemIndex]) -> ItemIndex {
        let arguments = self.tuple(arguments);
        self.alloc(Opcode::TypeNominal, &[link, arguments], None)
    }

    /// A recursive back-reference. Allocate with a provisional target, then
    /// close the cycle with [`ItemHeap::replace_operand`] once the enclosing
    /// composite exists.
    pub fn type_recursive(&mut self, target: ItemIndex) -> ItemIndex {
        self.alloc(Opcode::TypeRecursive, &[target], None)
    }

    pub fn type_variable(&mut self, name: &str) -> ItemIndex {
        let sym = self.heap.intern(name);
        self.alloc(Opcode::TypeVariable, &[], Some(Payload::Name(sym)))
    }

    // ---- Statements ----

    pub fn block(&mut self, statements: &[ItemIndex]) -> ItemIndex {
        self.alloc(Opcode::Block, statements, None)
    }

    pub fn named_block(&mut self, lifetime: &str, body: ItemIndex) -> ItemIndex {
        let lifetime = self.identifier(lifetime);
        self.alloc(Opcode::NamedBlock, &[lifetime, body], None)
    }

    pub fn assert_stmt(&mut self, condition: ItemIndex) -> ItemIndex {
        self.alloc(Opcode::Assert, &[condition], None)
    }

    pub fn assume_stmt(&mut self, condition: ItemIndex) -> ItemIndex {
        self.alloc(Opcode::Assume, &[condition], None)
    }

    pub fn assign(&mut self, lhs: &[ItemIndex], rhs: &[ItemIndex]) -> ItemIndex {
        let lhs = self.tuple(lhs);
        let rhs = self.tuple(rhs);
        self.alloc(Opcode::Assign, &[lhs, rhs], None)
    }

    pub fn skip(&mut self) -> ItemIndex {
        self.alloc(Opcode::Skip, &[], None)
    }

    pub fn break_stmt(&mut self) -> ItemIndex {
        self.alloc(Opcode::Break, &[], None)
    }

    pub fn continue_stmt(&mut self) -> ItemIndex {
        self.alloc(Opcode::Continue, &[], None)
    }

    pub fn debug_stmt(&mut self, operand: ItemIndex) -> ItemIndex {
        self.alloc(Opcode::Debug, &[operand], None)
    }

    pub fn fail(&mut self) -> ItemIndex {
        self.alloc(Opcode::Fail, &[], None)
    }

    pub fn if_stmt(&mut self, condition: ItemIndex, true_branch: ItemIndex) -> ItemIndex {
        self.alloc(Opcode::If, &[condition, true_branch], None)
    }

    pub fn if_else(
        &mut self,
        condition: ItemIndex,
        true_branch: ItemIndex,
        false_branch: ItemIndex,
    ) -> ItemIndex {
        self.alloc(Opcode::IfElse, &[condition, true_branch, false_branch], None)
    }

    pub fn return_stmt(&mut self, operands: &[ItemIndex]) -> ItemIndex {
        let operands = self.tuple(operands);
        self.alloc(Opcode::Return, &[operands], None)
    }

    pub fn switch(&mut self, condition: ItemIndex, cases: &[ItemIndex]) -> ItemIndex {
        let cases = self.tuple(cases);
        self.alloc(Opcode::Switch, &[condition, cases], None)
    }

    pub fn case(&mut self, values: &[ItemIndex], body: ItemIndex) -> ItemIndex {
        let values = self.tuple(values);
        self.alloc(Opcode::Case, &[values, body], None)
    }

    pub fn default_case(&mut self, body: ItemIndex) -> ItemIndex {
        self.case(&[], body)
    }

    pub fn while_stmt(
        &mut self,
        condition: ItemIndex,
        invariants: &[ItemIndex],
        body: ItemIndex,
    ) -> ItemIndex {
        let invariants = self.tuple(invariants);
        let modified = self.tuple(&[]);
        self.alloc(Opcode::While, &[condition, invariants, modified, body], None)
    }

    pub fn do_while(
        &mut self,
        body: ItemIndex,
        condition: ItemIndex,
        invariants: &[ItemIndex],
    ) -> ItemIndex {
        let invariants = self.tuple(invariants);
        let modified = self.tuple(&[]);
        self.alloc(Opcode::DoWhile, &[body, condition, invariants, modified], None)
    }

    // ---- Expressions ----

    pub fn variable_copy(&mut self, declaration: ItemIndex) -> ItemIndex {
        let ty = self.heap.get(declaration).operand(2);
        self.alloc(Opcode::VariableCopy, &[ty, declaration], None)
    }

    pub fn variable_move(&mut self, declaration: ItemIndex) -> ItemIndex {
        let ty = self.heap.get(declaration).operand(2);
        self.alloc(Opcode::VariableMove, &[ty, declaration], None)
    }

    pub fn static_variable_access(&mut self, link: ItemIndex) -> ItemIndex {
        let ty = self.type_any();
        self.alloc(Opcode::StaticVariableAccess, &[ty, link], None)
    }

    pub fn constant_int(&mut self, value: i64) -> ItemIndex {
        let ty = self.type_int();
        self.alloc(Opcode::Constant, &[ty], Some(Payload::Int(value.into())))
    }

    pub fn constant_big(&mut self, value: BigInt) -> ItemIndex {
        let ty = self.type_int();
        self.alloc(Opcode::Constant, &[ty], Some(Payload::Int(value)))
    }

    pub fn constant_byte(&mut self, value: u8) -> ItemIndex {
        let ty = self.type_byte();
        self.alloc(Opcode::Constant, &[ty], Some(Payload::Int(value.into())))
    }

    pub fn constant_bool(&mut self, value: bool) -> ItemIndex {
        let ty = self.type_bool();
        self.alloc(
            Opcode::Constant,
            &[ty],
            Some(Payload::Int(i64::from(value).into())),
        )
    }

    pub fn constant_null(&mut self) -> ItemIndex {
        let ty = self.type_null();
        self.alloc(Opcode::Constant, &[ty], Some(Payload::Int(0.into())))
    }

    pub fn cast(&mut self, ty: ItemIndex, operand: ItemIndex) -> ItemIndex {
        self.alloc(Opcode::Cast, &[ty, operand], None)
    }

    /// An invocation through a binding. The result-type tuple starts empty;
    /// flow typing replaces it once the callable's signature is known.
    pub fn invoke(&mut self, binding: ItemIndex, arguments: &[ItemIndex]) -> ItemIndex {
        let types = self.tuple(&[]);
        let arguments = self.tuple(arguments);
        self.alloc(Opcode::Invoke, &[types, binding, arguments], None)
    }

    pub fn indirect_invoke(
        &mut self,
        callee: ItemIndex,
        lifetimes: &[ItemIndex],
        arguments: &[ItemIndex],
    ) -> ItemIndex {
        let types = self.tuple(&[]);
        let lifetimes = self.tuple(lifetimes);
        let arguments = self.tuple(arguments);
        self.alloc(
            Opcode::IndirectInvoke,
            &[types, callee, lifetimes, arguments],
            None,
        )
    }

    pub fn logical_not(&mut self, operand: ItemIndex) -> ItemIndex {
        self.alloc(Opcode::LogicalNot, &[operand], None)
    }

    pub fn logical_and(&mut self, operands: &[ItemIndex]) -> ItemIndex {
        let operands = self.tuple(operands);
        self.alloc(Opcode::LogicalAnd, &[operands], None)
    }

    pub fn logical_or(&mut self, operands: &[ItemIndex]) -> ItemIndex {
        let operands = self.tuple(operands);
        self.alloc(Opcode::LogicalOr, &[operands], None)
    }

    pub fn implies(&mut self, antecedent: ItemIndex, consequent: ItemIndex) -> ItemIndex {
        self.alloc(Opcode::LogicalImplication, &[antecedent, consequent], None)
    }

    pub fn iff(&mut self, left: ItemIndex, right: ItemIndex) -> ItemIndex {
        self.alloc(Opcode::LogicalIff, &[left, right], None)
    }

    pub fn forall(&mut self, parameters: &[ItemIndex], body: ItemIndex) -> ItemIndex {
        let parameters = self.tuple(parameters);
        self.alloc(Opcode::UniversalQuantifier, &[parameters, body], None)
    }

    pub fn exists(&mut self, parameters: &[ItemIndex], body: ItemIndex) -> ItemIndex {
        let parameters = self.tuple(parameters);
        self.alloc(Opcode::ExistentialQuantifier, &[parameters, body], None)
    }

    pub fn equal(&mut self, left: ItemIndex, right: ItemIndex) -> ItemIndex {
        self.alloc(Opcode::Equal, &[left, right], None)
    }

    pub fn not_equal(&mut self, left: ItemIndex, right: ItemIndex) -> ItemIndex {
        self.alloc(Opcode::NotEqual, &[left, right], None)
    }

    pub fn less_than(&mut self, left: ItemIndex, right: ItemIndex) -> ItemIndex {
        self.alloc(Opcode::IntegerLessThan, &[left, right], None)
    }

    pub fn less_or_equal(&mut self, left: ItemIndex, right: ItemIndex) -> ItemIndex {
        self.alloc(Opcode::IntegerLessThanOrEqual, &[left, right], None)
    }

    pub fn greater_than(&mut self, left: ItemIndex, right: ItemIndex) -> ItemIndex {
        self.alloc(Opcode::IntegerGreaterThan, &[left, right], None)
    }

    pub fn greater_or_equal(&mut self, left: ItemIndex, right: ItemIndex) -> ItemIndex {
        self.alloc(Opcode::IntegerGreaterThanOrEqual, &[left, right], None)
    }

    pub fn is_type(&mut self, operand: ItemIndex, test: ItemIndex) -> ItemIndex {
        self.alloc(Opcode::Is, &[operand, test], None)
    }

    pub fn negate(&mut self, operand: ItemIndex) -> ItemIndex {
        let ty = self.type_int();
        self.alloc(Opcode::IntegerNegation, &[ty, operand], None)
    }

    fn integer_binary(&mut self, opcode: Opcode, left: ItemIndex, right: ItemIndex) -> ItemIndex {
        let ty = self.type_int();
        self.alloc(opcode, &[ty, left, right], None)
    }

    pub fn add(&mut self, left: ItemIndex, right: ItemIndex) -> ItemIndex {
        self.integer_binary(Opcode::IntegerAddition, left, right)
    }

    pub fn subtract(&mut self, left: ItemIndex, right: ItemIndex) -> ItemIndex {
        self.integer_binary(Opcode::IntegerSubtraction, left, right)
    }

    pub fn multiply(&mut self, left: ItemIndex, right: ItemIndex) -> ItemIndex {
        self.integer_binary(Opcode::IntegerMultiplication, left, right)
    }

    pub fn divide(&mut self, left: ItemIndex, right: ItemIndex) -> ItemIndex {
        self.integer_binary(Opcode::IntegerDivision, left, right)
    }

    pub fn remainder(&mut self, left: ItemIndex, right: ItemIndex) -> ItemIndex {
        self.integer_binary(Opcode::IntegerRemainder, left, right)
    }

    pub fn bitwise_complement(&mut self, operand: ItemIndex) -> ItemIndex {
        let ty = self.type_byte();
        self.alloc(Opcode::BitwiseComplement, &[ty, operand], None)
    }

    fn bitwise_nary(&mut self, opcode: Opcode, operands: &[ItemIndex]) -> ItemIndex {
        let ty = self.type_byte();
        let operands = self.tuple(operands);
        self.alloc(opcode, &[ty, operands], None)
    }

    pub fn bitwise_and(&mut self, operands: &[ItemIndex]) -> ItemIndex {
        self.bitwise_nary(Opcode::BitwiseAnd, operands)
    }

    pub fn bitwise_or(&mut self, operands: &[ItemIndex]) -> ItemIndex {
        self.bitwise_nary(Opcode::BitwiseOr, operands)
    }

    pub fn bitwise_xor(&mut self, operands: &[ItemIndex]) -> ItemIndex {
        self.bitwise_nary(Opcode::BitwiseXor, operands)
    }

    pub fn shift_left(&mut self, left: ItemIndex, right: ItemIndex) -> ItemIndex {
        let ty = self.type_byte();
        self.alloc(Opcode::ShiftLeft, &[ty, left, right], None)
    }

    pub fn shift_right(&mut self, left: ItemIndex, right: ItemIndex) -> ItemIndex {
        let ty = self.type_byte();
        self.alloc(Opcode::ShiftRight, &[ty, left, right], None)
    }

    pub fn dereference(&mut self, operand: ItemIndex) -> ItemIndex {
        let ty = self.type_any();
        self.alloc(Opcode::Dereference, &[ty, operand], None)
    }

    pub fn new_expr(&mut self, operand: ItemIndex) -> ItemIndex {
        let ty = self.type_any();
        self.alloc(Opcode::New, &[ty, operand], None)
    }

    pub fn new_in(&mut self, operand: ItemIndex, lifetime: &str) -> ItemIndex {
        let ty = self.type_any();
        let lifetime = self.identifier(lifetime);
        self.alloc(Opcode::NewIn, &[ty, operand, lifetime], None)
    }

    pub fn lambda_access(&mut self, link: ItemIndex) -> ItemIndex {
        let ty = self.type_any();
        self.alloc(Opcode::LambdaAccess, &[ty, link], None)
    }

    pub fn record_access(&mut self, source: ItemIndex, field: &str) -> ItemIndex {
        let ty = self.type_any();
        let field = self.identifier(field);
        self.alloc(Opcode::RecordAccess, &[ty, source, field], None)
    }

    pub fn record_borrow(&mut self, source: ItemIndex, field: &str) -> ItemIndex {
        let ty = self.type_any();
        let field = self.identifier(field);
        self.alloc(Opcode::RecordBorrow, &[ty, source, field], None)
    }

    pub fn record_update(&mut self, source: ItemIndex, field: &str, value: ItemIndex) -> ItemIndex {
        let ty = self.type_any();
        let field = self.identifier(field);
        self.alloc(Opcode::RecordUpdate, &[ty, source, field, value], None)
    }

    pub fn record_initialiser(&mut self, fields: &[(&str, ItemIndex)]) -> ItemIndex {
        let ty = self.type_any();
        let names: Vec<ItemIndex> = fields.iter().map(|(name, _)| self.identifier(name)).collect();
        let values: Vec<ItemIndex> = fields.iter().map(|(_, value)| *value).collect();
        let names = self.tuple(&names);
        let values = self.tuple(&values);
        self.alloc(Opcode::RecordInitialiser, &[ty, names, values], None)
    }

    pub fn array_access(&mut self, source: ItemIndex, index: ItemIndex) -> ItemIndex {
        let ty = self.type_any();
        self.alloc(Opcode::ArrayAccess, &[ty, source, index], None)
    }

    pub fn array_borrow(&mut self, source: ItemIndex, index: ItemIndex) -> ItemIndex {
        let ty = self.type_any();
        self.alloc(Opcode::ArrayBorrow, &[ty, source, index], None)
    }

    pub fn array_update(
        &mut self,
        source: ItemIndex,
        index: ItemIndex,
        value: ItemIndex,
    ) -> ItemIndex {
        let ty = self.type_any();
        self.alloc(Opcode::ArrayUpdate, &[ty, source, index, value], None)
    }

    pub fn array_length(&mut self, source: ItemIndex) -> ItemIndex {
        let ty = self.type_int();
        self.alloc(Opcode::ArrayLength, &[ty, source], None)
    }

    pub fn array_generator(&mut self, value: ItemIndex, length: ItemIndex) -> ItemIndex {
        let ty = self.type_any();
        self.alloc(Opcode::ArrayGenerator, &[ty, value, length], None)
    }

    pub fn array_initialiser(&mut self, values: &[ItemIndex]) -> ItemIndex {
        let ty = self.type_any();
        let values = self.tuple(values);
        self.alloc(Opcode::ArrayInitialiser, &[ty, values], None)
    }

    pub fn array_range(&mut self, start: ItemIndex, end: ItemIndex) -> ItemIndex {
        let int = self.type_int();
        let ty = self.type_array(int);
        self.alloc(Opcode::ArrayRange, &[ty, start, end], None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::{CallableView, ModuleView, VariableView};

    #[test]
    fn module_becomes_the_heap_root() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let unit = builder.unit("main", &[]);
        let module = builder.module("main", &[unit]);
        assert_eq!(heap.root(), Some(module));
        let view = ModuleView::new(&heap, module);
        assert_eq!(view.units, vec![unit]);
    }

    #[test]
    fn primitive_type_items_are_shared() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        assert_eq!(builder.type_int(), builder.type_int());
        assert_ne!(builder.type_int(), builder.type_bool());
    }

    #[test]
    fn record_fields_are_sorted_by_name() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let int = builder.type_int();
        let bool_ = builder.type_bool();
        let record = builder.type_record(&[("z", int), ("a", bool_)], false);
        let fields = crate::view::tuple_elements(&heap, heap.get(record).operand(0));
        let first = crate::view::FieldView::new(&heap, fields[0]);
        assert_eq!(heap.resolve(crate::view::name_of(&heap, first.name)), "a");
    }

    #[test]
    fn variable_copy_borrows_the_declared_type() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let int = builder.type_int();
        let x = builder.variable("x", int);
        let access = builder.variable_copy(x);
        assert_eq!(heap.get(access).operand(0), int);
        let view = VariableView::new(&heap, x);
        assert!(view.initialiser.is_none());
    }

    #[test]
    fn callables_carry_eight_operands() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let body = builder.block(&[]);
        let f = builder.function("f", &[], &[], &[], &[], body);
        assert_eq!(heap.get(f).operands.len(), 8);
        let view = CallableView::new(&heap, f);
        assert_eq!(view.body, body);
    }
}
