//! Lifting heap type items into semantic types and lowering them back.

use indexmap::IndexMap;
use wick_base::Symbol;
use wick_heap::view::{name_of, tuple_elements, FieldView, LinkView, TypeAliasView, VariableView};
use wick_heap::{ItemHeap, ItemIndex, Opcode, Payload};

use crate::sem::{Callable, Nominal, Record, Type};
use crate::subst::{substitute, Binding};

/// Decodes the type item at `index` into its semantic form.
///
/// Recursive back-references are kept as [`Type::Recursive`] and expanded
/// lazily by the subtype operator, so lifting always terminates.
///
/// Panics when `index` is not a type item; passes only hand this function
/// operands that the schema declares to be types.
pub fn lift(heap: &ItemHeap, index: ItemIndex) -> Type {
    let item = heap.get(index);
    match item.opcode {
        Opcode::TypeAny => Type::Any,
        Opcode::TypeVoid => Type::Void,
        Opcode::TypeNull => Type::Null,
        Opcode::TypeBool => Type::Bool,
        Opcode::TypeByte => Type::Byte,
        Opcode::TypeInt => Type::Int,
        Opcode::TypeArray => Type::array(lift(heap, item.operand(0))),
        Opcode::TypeRecord | Opcode::TypeRecordOpen => {
            let mut fields = IndexMap::new();
            for field in tuple_elements(heap, item.operand(0)) {
                let view = FieldView::new(heap, field);
                fields.insert(name_of(heap, view.name), lift(heap, view.field_type));
            }
            Type::Record(Record::new(fields, item.opcode == Opcode::TypeRecordOpen))
        }
        Opcode::TypeReference => Type::reference(lift(heap, item.operand(0))),
        Opcode::TypeReferenceScoped => Type::reference_in(
            lift(heap, item.operand(0)),
            name_of(heap, item.operand(1)),
        ),
        Opcode::TypeFunction => Type::Callable(Callable::Function {
            parameters: lift_tuple(heap, item.operand(0)),
            returns: lift_tuple(heap, item.operand(1)),
        }),
        Opcode::TypeMethod => Type::Callable(Callable::Method {
            parameters: lift_tuple(heap, item.operand(0)),
            returns: lift_tuple(heap, item.operand(1)),
            captured: lift_names(heap, item.operand(2)),
            lifetimes: lift_names(heap, item.operand(3)),
        }),
        Opcode::TypeProperty => Type::Callable(Callable::Property {
            parameters: lift_tuple(heap, item.operand(0)),
        }),
        Opcode::TypeUnion => Type::Union(
            item.operands
                .iter()
                .map(|&member| lift(heap, member))
                .collect(),
        ),
        Opcode::TypeNominal => Type::Nominal(Nominal {
            link: item.operand(0),
            arguments: lift_tuple(heap, item.operand(1)),
        }),
        Opcode::TypeRecursive => Type::Recursive(item.operand(0)),
        Opcode::TypeVariable => Type::Variable(name_of(heap, index)),
        other => panic!("lifting non-type item {:?}", other),
    }
}

/// Expands a nominal to its aliased type with template arguments
/// substituted, or `None` when the link is not (yet) resolved to a type
/// alias. The second component of the result is the alias declaration's
/// index, which the subtype operator uses as the expansion identity.
pub fn expand_nominal(heap: &ItemHeap, nominal: &Nominal) -> Option<(ItemIndex, Type)> {
    if heap.opcode(nominal.link) != Opcode::Link {
        return None;
    }
    let link = LinkView::new(heap, nominal.link);
    let target = link.target()?;
    if heap.opcode(target) != Opcode::TypeAlias {
        return None;
    }
    let alias = TypeAliasView::new(heap, target);
    let var = VariableView::new(heap, alias.var);
    let body = lift(heap, var.declared_type);
    let mut binding = Binding::new();
    for (param, argument) in alias.template.iter().zip(&nominal.arguments) {
        if heap.opcode(*param) == Opcode::TemplateType {
            binding
                .types
                .insert(name_of(heap, *param), argument.clone());
        }
    }
    Some((target, substitute(&body, &binding)))
}

fn lift_tuple(heap: &ItemHeap, tuple: ItemIndex) -> Vec<Type> {
    tuple_elements(heap, tuple)
        .into_iter()
        .map(|t| lift(heap, t))
        .collect()
}

fn lift_names(heap: &ItemHeap, tuple: ItemIndex) -> Vec<Symbol> {
    tuple_elements(heap, tuple)
        .into_iter()
        .map(|id| name_of(heap, id))
        .collect()
}

/// Allocates heap items representing `ty`.
///
/// Record fields are emitted in canonical (lexicographic) order regardless
/// of the semantic map's insertion order. Panics on the semantic-only
/// combinators; no pass ever records an intersection or difference as an
/// inferred type.
pub fn lower(heap: &mut ItemHeap, ty: &Type) -> ItemIndex {
    match ty {
        Type::Any => alloc0(heap, Opcode::TypeAny),
        Type::Void => alloc0(heap, Opcode::TypeVoid),
        Type::Null => alloc0(heap, Opcode::TypeNull),
        Type::Bool => alloc0(heap, Opcode::TypeBool),
        Type::Byte => alloc0(heap, Opcode::TypeByte),
        Type::Int => alloc0(heap, Opcode::TypeInt),
        Type::Array(element) => {
            let element = lower(heap, element);
            heap.allocate(Opcode::TypeArray, [element].into_iter().collect(), None)
        }
        Type::Record(record) => {
            let mut lowered: Vec<(Symbol, ItemIndex)> = record
                .fields
                .iter()
                .map(|(name, ty)| (*name, lower(heap, ty)))
                .collect();
            lowered.sort_by(|a, b| heap.interner().compare(a.0, b.0));
            let fields: Vec<ItemIndex> = lowered
                .into_iter()
                .map(|(name, ty)| {
                    let name = heap.allocate(
                        Opcode::Identifier,
                        Default::default(),
                        Some(Payload::Name(name)),
                    );
                    heap.allocate(Opcode::Field, [name, ty].into_iter().collect(), None)
                })
                .collect();
            let fields = heap.allocate(Opcode::Tuple, fields.into_iter().collect(), None);
            let opcode = if record.open {
                Opcode::TypeRecordOpen
            } else {
                Opcode::TypeRecord
            };
            heap.allocate(opcode, [fields].into_iter().collect(), None)
        }
        Type::Reference(element, lifetime) => {
            let element = lower(heap, element);
            match lifetime {
                None => heap.allocate(
                    Opcode::TypeReference,
                    [element].into_iter().collect(),
                    None,
                ),
                Some(lifetime) => {
                    let lifetime = heap.allocate(
                        Opcode::Identifier,
                        Default::default(),
                        Some(Payload::Name(*lifetime)),
                    );
                    heap.allocate(
                        Opcode::TypeReferenceScoped,
                        [element, lifetime].into_iter().collect(),
                        None,
                    )
                }
            }
        }
        Type::Callable(Callable::Function {
            parameters,
            returns,
        }) => {
            let parameters = lower_tuple(heap, parameters);
            let returns = lower_tuple(heap, returns);
            heap.allocate(
                Opcode::TypeFunction,
                [parameters, returns].into_iter().collect(),
                None,
            )
        }
        Type::Callable(Callable::Method {
            parameters,
            returns,
            captured,
            lifetimes,
        }) => {
            let parameters = lower_tuple(heap, parameters);
            let returns = lower_tuple(heap, returns);
            let captured = lower_names(heap, captured);
            let lifetimes = lower_names(heap, lifetimes);
            heap.allocate(
                Opcode::TypeMethod,
                [parameters, returns, captured, lifetimes]
                    .into_iter()
                    .collect(),
                None,
            )
        }
        Type::Callable(Callable::Property { parameters }) => {
            let parameters = lower_tuple(heap, parameters);
            heap.allocate(
                Opcode::TypeProperty,
                [parameters].into_iter().collect(),
                None,
            )
        }
        Type::Union(members) => {
            let members: Vec<ItemIndex> = members.iter().map(|m| lower(heap, m)).collect();
            heap.allocate(Opcode::TypeUnion, members.into_iter().collect(), None)
        }
        Type::Nominal(nominal) => {
            let arguments = {
                let args: Vec<ItemIndex> =
                    nominal.arguments.iter().map(|a| lower(heap, a)).collect();
                heap.allocate(Opcode::Tuple, args.into_iter().collect(), None)
            };
            heap.allocate(
                Opcode::TypeNominal,
                [nominal.link, arguments].into_iter().collect(),
                None,
            )
        }
        Type::Recursive(target) => {
            heap.allocate(Opcode::TypeRecursive, [*target].into_iter().collect(), None)
        }
        Type::Variable(name) => heap.allocate(
            Opcode::TypeVariable,
            Default::default(),
            Some(Payload::Name(*name)),
        ),
        Type::Intersection(_) | Type::Difference(_, _) => {
            panic!("semantic combinator has no heap representation")
        }
    }
}

fn alloc0(heap: &mut ItemHeap, opcode: Opcode) -> ItemIndex {
    heap.allocate(opcode, Default::default(), None)
}

fn lower_tuple(heap: &mut ItemHeap, types: &[Type]) -> ItemIndex {
    let lowered: Vec<ItemIndex> = types.iter().map(|t| lower(heap, t)).collect();
    heap.allocate(Opcode::Tuple, lowered.into_iter().collect(), None)
}

fn lower_names(heap: &mut ItemHeap, names: &[Symbol]) -> ItemIndex {
    let lowered: Vec<ItemIndex> = names
        .iter()
        .map(|name| {
            heap.allocate(
                Opcode::Identifier,
                Default::default(),
                Some(Payload::Name(*name)),
            )
        })
        .collect();
    heap.allocate(Opcode::Tuple, lowered.into_iter().collect(), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wick_heap::build::ModuleBuilder;

    #[test]
    fn primitives_round_trip() {
        let mut heap = ItemHeap::new();
        for ty in [Type::Any, Type::Null, Type::Bool, Type::Byte, Type::Int] {
            let lowered = lower(&mut heap, &ty);
            assert_eq!(lift(&heap, lowered), ty);
        }
    }

    #[test]
    fn records_round_trip_with_canonical_field_order() {
        let mut heap = ItemHeap::new();
        let z = heap.intern("z");
        let a = heap.intern("a");
        let ty = Type::record(vec![(z, Type::Int), (a, Type::Bool)], false);
        let lowered = lower(&mut heap, &ty);
        // serialized order is lexicographic
        let fields = tuple_elements(&heap, heap.get(lowered).operand(0));
        let first = FieldView::new(&heap, fields[0]);
        assert_eq!(heap.resolve(name_of(&heap, first.name)), "a");
        // and equality is unaffected
        assert_eq!(lift(&heap, lowered), ty);
    }

    #[test]
    fn unions_and_arrays_round_trip() {
        let mut heap = ItemHeap::new();
        let ty = Type::Union(vec![Type::array(Type::Int), Type::Null]);
        let lowered = lower(&mut heap, &ty);
        assert_eq!(lift(&heap, lowered), ty);
    }

    #[test]
    fn builder_types_lift_as_expected() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let int = builder.type_int();
        let arr = builder.type_array(int);
        let union = builder.type_union(&[arr, int]);
        assert_eq!(
            lift(&heap, union),
            Type::Union(vec![Type::array(Type::Int), Type::Int])
        );
    }

    #[test]
    fn method_types_keep_lifetime_names() {
        let mut heap = ItemHeap::new();
        let this = heap.intern("this");
        let ty = Type::Callable(Callable::Method {
            parameters: vec![Type::Int],
            returns: vec![Type::Bool],
            captured: vec![this],
            lifetimes: vec![],
        });
        let lowered = lower(&mut heap, &ty);
        assert_eq!(lift(&heap, lowered), ty);
    }
}
