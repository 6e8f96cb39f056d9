//! Typed positional views over items.
//!
//! Passes dispatch on an item's opcode and then decode its operands by
//! position; each view struct pins that layout in one place so the positions
//! appear nowhere else. Views are cheap and borrow nothing; they copy the
//! operand indices out of the item on construction.

use wick_base::Symbol;

use crate::heap::ItemHeap;
use crate::item::{ItemIndex, Modifiers};
use crate::opcode::Opcode;

fn expect(heap: &ItemHeap, index: ItemIndex, expected: &[Opcode]) {
    let found = heap.opcode(index);
    debug_assert!(
        expected.contains(&found),
        "expected one of {:?}, found {:?}",
        expected,
        found,
    );
}

/// Elements of a `Tuple` item.
pub fn tuple_elements(heap: &ItemHeap, index: ItemIndex) -> Vec<ItemIndex> {
    expect(heap, index, &[Opcode::Tuple]);
    heap.get(index).operands.to_vec()
}

/// The name payload of an `Identifier`, `TemplateType`, `TemplateLifetime`,
/// or `TypeVariable` item.
pub fn name_of(heap: &ItemHeap, index: ItemIndex) -> Symbol {
    heap.get(index)
        .data
        .as_ref()
        .and_then(|payload| payload.as_name())
        .unwrap_or(Symbol::EMPTY)
}

/// Summarizes a modifier tuple into flags.
pub fn modifiers_of(heap: &ItemHeap, tuple: ItemIndex) -> Modifiers {
    tuple_elements(heap, tuple)
        .into_iter()
        .filter_map(|m| Modifiers::from_opcode(heap.opcode(m)))
        .fold(Modifiers::empty(), |acc, m| acc | m)
}

// ---- Declarations ----

pub struct ModuleView {
    pub name: ItemIndex,
    pub units: Vec<ItemIndex>,
    pub externs: Vec<ItemIndex>,
    pub diagnostics: ItemIndex,
}

impl ModuleView {
    pub fn new(heap: &ItemHeap, index: ItemIndex) -> Self {
        expect(heap, index, &[Opcode::Module]);
        let item = heap.get(index);
        Self {
            name: item.operand(0),
            units: tuple_elements(heap, item.operand(1)),
            externs: tuple_elements(heap, item.operand(2)),
            diagnostics: item.operand(3),
        }
    }
}

pub struct UnitView {
    pub name: ItemIndex,
    pub declarations: Vec<ItemIndex>,
}

impl UnitView {
    pub fn new(heap: &ItemHeap, index: ItemIndex) -> Self {
        expect(heap, index, &[Opcode::Unit]);
        let item = heap.get(index);
        Self {
            name: item.operand(0),
            declarations: tuple_elements(heap, item.operand(1)),
        }
    }
}

pub struct ImportView {
    /// Identifiers of the imported path.
    pub path: Vec<ItemIndex>,
    /// The `from` name for `ImportFrom`, absent for plain imports.
    pub from: Option<ItemIndex>,
}

impl ImportView {
    pub fn new(heap: &ItemHeap, index: ItemIndex) -> Self {
        expect(heap, index, &[Opcode::Import, Opcode::ImportFrom]);
        let item = heap.get(index);
        Self {
            path: tuple_elements(heap, item.operand(0)),
            from: if item.opcode == Opcode::ImportFrom {
                Some(item.operand(1))
            } else {
                None
            },
        }
    }
}

pub struct StaticVariableView {
    pub modifiers: ItemIndex,
    pub name: ItemIndex,
    pub declared_type: ItemIndex,
    pub initialiser: ItemIndex,
}

impl StaticVariableView {
    pub fn new(heap: &ItemHeap, index: ItemIndex) -> Self {
        expect(heap, index, &[Opcode::StaticVariable]);
        let item = heap.get(index);
        Self {
            modifiers: item.operand(0),
            name: item.operand(1),
            declared_type: item.operand(2),
            initialiser: item.operand(3),
        }
    }
}

pub struct TypeAliasView {
    pub modifiers: ItemIndex,
    pub name: ItemIndex,
    pub template: Vec<ItemIndex>,
    /// The declared variable the invariant ranges over.
    pub var: ItemIndex,
    pub invariants: Vec<ItemIndex>,
}

impl TypeAliasView {
    pub fn new(heap: &ItemHeap, index: ItemIndex) -> Self {
        expect(heap, index, &[Opcode::TypeAlias]);
        let item = heap.get(index);
        Self {
            modifiers: item.operand(0),
            name: item.operand(1),
            template: tuple_elements(heap, item.operand(2)),
            var: item.operand(3),
            invariants: tuple_elements(heap, item.operand(4)),
        }
    }
}

/// Shared view of `Function`, `Method`, and `Property` declarations.
pub struct CallableView {
    pub opcode: Opcode,
    pub modifiers: ItemIndex,
    pub name: ItemIndex,
    pub template: Vec<ItemIndex>,
    pub parameters: Vec<ItemIndex>,
    pub returns: Vec<ItemIndex>,
    pub requires: Vec<ItemIndex>,
    pub ensures: Vec<ItemIndex>,
    pub body: ItemIndex,
}

impl CallableView {
    pub fn new(heap: &ItemHeap, index: ItemIndex) -> Self {
        expect(
            heap,
            index,
            &[Opcode::Function, Opcode::Method, Opcode::Property],
        );
        let item = heap.get(index);
        Self {
            opcode: item.opcode,
            modifiers: item.operand(0),
            name: item.operand(1),
            template: tuple_elements(heap, item.operand(2)),
            parameters: tuple_elements(heap, item.operand(3)),
            returns: tuple_elements(heap, item.operand(4)),
            requires: tuple_elements(heap, item.operand(5)),
            ensures: tuple_elements(heap, item.operand(6)),
            body: item.operand(7),
        }
    }

    pub fn is_function(&self) -> bool {
        self.opcode == Opcode::Function
    }
}

pub struct LambdaView {
    pub modifiers: ItemIndex,
    pub name: ItemIndex,
    pub template: Vec<ItemIndex>,
    pub parameters: Vec<ItemIndex>,
    pub returns: Vec<ItemIndex>,
    pub captured_lifetimes: Vec<ItemIndex>,
    pub declared_lifetimes: Vec<ItemIndex>,
    pub body: ItemIndex,
    pub computed_type: ItemIndex,
}

impl LambdaView {
    pub fn new(heap: &ItemHeap, index: ItemIndex) -> Self {
        expect(heap, index, &[Opcode::Lambda]);
        let item = heap.get(index);
        Self {
            modifiers: item.operand(0),
            name: item.operand(1),
            template: tuple_elements(heap, item.operand(2)),
            parameters: tuple_elements(heap, item.operand(3)),
            returns: tuple_elements(heap, item.operand(4)),
            captured_lifetimes: tuple_elements(heap, item.operand(5)),
            declared_lifetimes: tuple_elements(heap, item.operand(6)),
            body: item.operand(7),
            computed_type: item.operand(8),
        }
    }
}

/// View of `Variable` and `VariableInitialised` declarations.
pub struct VariableView {
    pub modifiers: ItemIndex,
    pub name: ItemIndex,
    pub declared_type: ItemIndex,
    pub initialiser: Option<ItemIndex>,
}

impl VariableView {
    pub fn new(heap: &ItemHeap, index: ItemIndex) -> Self {
        expect(
            heap,
            index,
            &[Opcode::Variable, Opcode::VariableInitialised],
        );
        let item = heap.get(index);
        Self {
            modifiers: item.operand(0),
            name: item.operand(1),
            declared_type: item.operand(2),
            initialiser: if item.opcode == Opcode::VariableInitialised {
                Some(item.operand(3))
            } else {
                None
            },
        }
    }
}

pub struct LinkView {
    pub name: ItemIndex,
    pub candidates: Vec<ItemIndex>,
}

impl LinkView {
    pub fn new(heap: &ItemHeap, index: ItemIndex) -> Self {
        expect(heap, index, &[Opcode::Link]);
        let item = heap.get(index);
        Self {
            name: item.operand(0),
            candidates: item.operands[1..].to_vec(),
        }
    }

    /// The unique target of a resolved link.
    pub fn target(&self) -> Option<ItemIndex> {
        if self.candidates.len() == 1 {
            Some(self.candidates[0])
        } else {
            None
        }
    }
}

pub struct BindingView {
    pub link: ItemIndex,
    pub arguments: Vec<ItemIndex>,
    pub concrete_type: ItemIndex,
}

impl BindingView {
    pub fn new(heap: &ItemHeap, index: ItemIndex) -> Self {
        expect(heap, index, &[Opcode::Binding]);
        let item = heap.get(index);
        Self {
            link: item.operand(0),
            arguments: tuple_elements(heap, item.operand(1)),
            concrete_type: item.operand(2),
        }
    }
}

pub struct FieldView {
    pub name: ItemIndex,
    pub field_type: ItemIndex,
}

impl FieldView {
    pub fn new(heap: &ItemHeap, index: ItemIndex) -> Self {
        expect(heap, index, &[Opcode::Field]);
        let item = heap.get(index);
        Self {
            name: item.operand(0),
            field_type: item.operand(1),
        }
    }
}

// ---- Statements ----

pub struct BlockView {
    pub statements: Vec<ItemIndex>,
}

impl BlockView {
    pub fn new(heap: &ItemHeap, index: ItemIndex) -> Self {
        expect(heap, index, &[Opcode::Block]);
        Self {
            statements: heap.get(index).operands.to_vec(),
        }
    }
}

pub struct NamedBlockView {
    pub lifetime: ItemIndex,
    pub body: ItemIndex,
}

impl NamedBlockView {
    pub fn new(heap: &ItemHeap, index: ItemIndex) -> Self {
        expect(heap, index, &[Opcode::NamedBlock]);
        let item = heap.get(index);
        Self {
            lifetime: item.operand(0),
            body: item.operand(1),
        }
    }
}

pub struct AssignView {
    pub lhs: Vec<ItemIndex>,
    pub rhs: Vec<ItemIndex>,
}

impl AssignView {
    pub fn new(heap: &ItemHeap, index: ItemIndex) -> Self {
        expect(heap, index, &[Opcode::Assign]);
        let item = heap.get(index);
        Self {
            lhs: tuple_elements(heap, item.operand(0)),
            rhs: tuple_elements(heap, item.operand(1)),
        }
    }
}

pub struct IfView {
    pub condition: ItemIndex,
    pub true_branch: ItemIndex,
    pub false_branch: Option<ItemIndex>,
}

impl IfView {
    pub fn new(heap: &ItemHeap, index: ItemIndex) -> Self {
        expect(heap, index, &[Opcode::If, Opcode::IfElse]);
        let item = heap.get(index);
        Self {
            condition: item.operand(0),
            true_branch: item.operand(1),
            false_branch: if item.opcode == Opcode::IfElse {
                Some(item.operand(2))
            } else {
                None
            },
        }
    }
}

pub struct ReturnView {
    pub operands: Vec<ItemIndex>,
}

impl ReturnView {
    pub fn new(heap: &ItemHeap, index: ItemIndex) -> Self {
        expect(heap, index, &[Opcode::Return]);
        Self {
            operands: tuple_elements(heap, heap.get(index).operand(0)),
        }
    }
}

pub struct SwitchView {
    pub condition: ItemIndex,
    pub cases: Vec<ItemIndex>,
}

impl SwitchView {
    pub fn new(heap: &ItemHeap, index: ItemIndex) -> Self {
        expect(heap, index, &[Opcode::Switch]);
        let item = heap.get(index);
        Self {
            condition: item.operand(0),
            cases: tuple_elements(heap, item.operand(1)),
        }
    }
}

pub struct CaseView {
    /// Empty for the default case.
    pub values: Vec<ItemIndex>,
    pub body: ItemIndex,
}

impl CaseView {
    pub fn new(heap: &ItemHeap, index: ItemIndex) -> Self {
        expect(heap, index, &[Opcode::Case]);
        let item = heap.get(index);
        Self {
            values: tuple_elements(heap, item.operand(0)),
            body: item.operand(1),
        }
    }

    pub fn is_default(&self) -> bool {
        self.values.is_empty()
    }
}

/// Shared view of `While` and `DoWhile` loops.
pub struct LoopView {
    pub condition: ItemIndex,
    pub invariants: Vec<ItemIndex>,
    /// Variable declarations havocked by the loop body; populated by the
    /// versioning pass, empty before it runs.
    pub modified: Vec<ItemIndex>,
    pub body: ItemIndex,
}

impl LoopView {
    pub fn new(heap: &ItemHeap, index: ItemIndex) -> Self {
        let item = heap.get(index);
        match item.opcode {
            Opcode::While => Self {
                condition: item.operand(0),
                invariants: tuple_elements(heap, item.operand(1)),
                modified: tuple_elements(heap, item.operand(2)),
                body: item.operand(3),
            },
            Opcode::DoWhile => Self {
                body: item.operand(0),
                condition: item.operand(1),
                invariants: tuple_elements(heap, item.operand(2)),
                modified: tuple_elements(heap, item.operand(3)),
            },
            other => unreachable!("LoopView over {:?}", other),
        }
    }

    /// Position of the modified tuple within the loop item.
    pub fn modified_operand_position(heap: &ItemHeap, index: ItemIndex) -> usize {
        match heap.opcode(index) {
            Opcode::While => 2,
            Opcode::DoWhile => 3,
            other => unreachable!("loop modified tuple of {:?}", other),
        }
    }
}

// ---- Expressions ----

/// The result-type operand of a single-valued expression.
///
/// Returns `None` for the expressions that do not carry a type operand
/// (logical connectives, comparisons, quantifiers, `is` tests, which are
/// all boolean).
pub fn expression_type(heap: &ItemHeap, index: ItemIndex) -> Option<ItemIndex> {
    use Opcode::*;
    match heap.opcode(index) {
        VariableCopy | VariableMove | StaticVariableAccess | Constant | Cast
        | IntegerNegation | IntegerAddition | IntegerSubtraction | IntegerMultiplication
        | IntegerDivision | IntegerRemainder | BitwiseComplement | BitwiseAnd | BitwiseOr
        | BitwiseXor | ShiftLeft | ShiftRight | Dereference | New | NewIn | LambdaAccess
        | RecordAccess | RecordBorrow | RecordUpdate | RecordInitialiser | ArrayAccess
        | ArrayBorrow | ArrayUpdate | ArrayLength | ArrayGenerator | ArrayInitialiser
        | ArrayRange => Some(heap.get(index).operand(0)),
        _ => None,
    }
}

/// The result-type tuple of a multi-valued expression (`Invoke`,
/// `IndirectInvoke`).
pub fn expression_types(heap: &ItemHeap, index: ItemIndex) -> Option<Vec<ItemIndex>> {
    match heap.opcode(index) {
        Opcode::Invoke | Opcode::IndirectInvoke => {
            Some(tuple_elements(heap, heap.get(index).operand(0)))
        }
        _ => None,
    }
}

pub struct InvokeView {
    pub types: ItemIndex,
    pub binding: ItemIndex,
    pub arguments: Vec<ItemIndex>,
}

impl InvokeView {
    pub fn new(heap: &ItemHeap, index: ItemIndex) -> Self {
        expect(heap, index, &[Opcode::Invoke]);
        let item = heap.get(index);
        Self {
            types: item.operand(0),
            binding: item.operand(1),
            arguments: tuple_elements(heap, item.operand(2)),
        }
    }
}

pub struct IndirectInvokeView {
    pub types: ItemIndex,
    pub callee: ItemIndex,
    pub lifetime_arguments: Vec<ItemIndex>,
    pub arguments: Vec<ItemIndex>,
}

impl IndirectInvokeView {
    pub fn new(heap: &ItemHeap, index: ItemIndex) -> Self {
        expect(heap, index, &[Opcode::IndirectInvoke]);
        let item = heap.get(index);
        Self {
            types: item.operand(0),
            callee: item.operand(1),
            lifetime_arguments: tuple_elements(heap, item.operand(2)),
            arguments: tuple_elements(heap, item.operand(3)),
        }
    }
}

pub struct QuantifierView {
    pub parameters: Vec<ItemIndex>,
    pub body: ItemIndex,
    pub universal: bool,
}

impl QuantifierView {
    pub fn new(heap: &ItemHeap, index: ItemIndex) -> Self {
        expect(
            heap,
            index,
            &[Opcode::UniversalQuantifier, Opcode::ExistentialQuantifier],
        );
        let item = heap.get(index);
        Self {
            parameters: tuple_elements(heap, item.operand(0)),
            body: item.operand(1),
            universal: item.opcode == Opcode::UniversalQuantifier,
        }
    }
}

pub struct RecordInitialiserView {
    pub result_type: ItemIndex,
    pub fields: Vec<ItemIndex>,
    pub values: Vec<ItemIndex>,
}

impl RecordInitialiserView {
    pub fn new(heap: &ItemHeap, index: ItemIndex) -> Self {
        expect(heap, index, &[Opcode::RecordInitialiser]);
        let item = heap.get(index);
        Self {
            result_type: item.operand(0),
            fields: tuple_elements(heap, item.operand(1)),
            values: tuple_elements(heap, item.operand(2)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::ModuleBuilder;

    #[test]
    fn callable_view_decodes_by_position() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let int = builder.type_int();
        let x = builder.variable("x", int);
        let y = builder.variable("y", int);
        let body = builder.block(&[]);
        let f = builder.function("id", &[x], &[y], &[], &[], body);
        let view = CallableView::new(&heap, f);
        assert!(view.is_function());
        assert_eq!(view.parameters, vec![x]);
        assert_eq!(view.returns, vec![y]);
        assert_eq!(view.body, body);
    }

    #[test]
    fn loop_view_reads_while_and_dowhile_layouts() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let cond = builder.constant_bool(true);
        let body = builder.block(&[]);
        let w = builder.while_stmt(cond, &[], body);
        let d = builder.do_while(body, cond, &[]);
        let wv = LoopView::new(&heap, w);
        let dv = LoopView::new(&heap, d);
        assert_eq!(wv.condition, cond);
        assert_eq!(wv.body, body);
        assert_eq!(dv.condition, cond);
        assert_eq!(dv.body, body);
        assert_eq!(LoopView::modified_operand_position(&heap, w), 2);
        assert_eq!(LoopView::modified_operand_position(&heap, d), 3);
    }

    #[test]
    fn expression_type_is_absent_for_boolean_connectives() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let t = builder.constant_bool(true);
        let not = builder.logical_not(t);
        let int = builder.constant_int(7);
        assert!(expression_type(&heap, not).is_none());
        assert!(expression_type(&heap, int).is_some());
    }
}
