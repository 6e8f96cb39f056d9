//! Template substitution.

use std::collections::HashMap;
use wick_base::Symbol;

use crate::sem::{Callable, Nominal, Record, Type};

/// Maps template variables to their instantiations.
#[derive(Debug, Clone, Default)]
pub struct Binding {
    pub types: HashMap<Symbol, Type>,
    pub lifetimes: HashMap<Symbol, Symbol>,
}

impl Binding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_type(mut self, name: Symbol, ty: Type) -> Self {
        self.types.insert(name, ty);
        self
    }

    pub fn bind_lifetime(mut self, name: Symbol, target: Symbol) -> Self {
        self.lifetimes.insert(name, target);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.lifetimes.is_empty()
    }

    /// This binding with the given lifetime names removed; used when
    /// descending into a method that declares its own lifetimes.
    fn without_lifetimes(&self, names: &[Symbol]) -> Binding {
        let mut reduced = self.clone();
        for name in names {
            reduced.lifetimes.remove(name);
        }
        reduced
    }
}

/// Replaces every template variable in `ty` by its binding.
///
/// Container types are rebuilt only when a strict descendant actually
/// changed; an untouched subtree is returned as a plain clone of the
/// original, so no-op substitutions preserve structure.
pub fn substitute(ty: &Type, binding: &Binding) -> Type {
    if binding.is_empty() {
        return ty.clone();
    }
    apply(ty, binding).unwrap_or_else(|| ty.clone())
}

/// `Some(new)` when anything below changed, `None` otherwise.
fn apply(ty: &Type, binding: &Binding) -> Option<Type> {
    match ty {
        Type::Variable(name) => binding.types.get(name).cloned(),
        Type::Any
        | Type::Void
        | Type::Null
        | Type::Bool
        | Type::Byte
        | Type::Int
        | Type::Recursive(_) => None,
        Type::Array(element) => apply(element, binding).map(Type::array),
        Type::Record(record) => {
            let fields = apply_slice_map(record.fields.values(), binding)?;
            let fields = record
                .fields
                .keys()
                .copied()
                .zip(fields)
                .collect();
            Some(Type::Record(Record::new(fields, record.open)))
        }
        Type::Reference(element, lifetime) => {
            let new_element = apply(element, binding);
            let new_lifetime = lifetime.and_then(|l| binding.lifetimes.get(&l).copied());
            if new_element.is_none() && new_lifetime.is_none() {
                return None;
            }
            Some(Type::Reference(
                Box::new(new_element.unwrap_or_else(|| (**element).clone())),
                new_lifetime.or(*lifetime),
            ))
        }
        Type::Callable(Callable::Function {
            parameters,
            returns,
        }) => {
            let (parameters, returns) = apply_signature(parameters, returns, binding)?;
            Some(Type::Callable(Callable::Function {
                parameters,
                returns,
            }))
        }
        Type::Callable(Callable::Method {
            parameters,
            returns,
            captured,
            lifetimes,
        }) => {
            // The method's own lifetime parameters shadow the binding.
            let reduced = binding.without_lifetimes(lifetimes);
            let (parameters, returns) = apply_signature(parameters, returns, &reduced)?;
            Some(Type::Callable(Callable::Method {
                parameters,
                returns,
                captured: captured.clone(),
                lifetimes: lifetimes.clone(),
            }))
        }
        Type::Callable(Callable::Property { parameters }) => {
            let parameters = apply_slice(parameters, binding)?;
            Some(Type::Callable(Callable::Property { parameters }))
        }
        Type::Union(members) => apply_slice(members, binding).map(Type::Union),
        Type::Intersection(members) => apply_slice(members, binding).map(Type::Intersection),
        Type::Difference(left, right) => {
            let new_left = apply(left, binding);
            let new_right = apply(right, binding);
            if new_left.is_none() && new_right.is_none() {
                return None;
            }
            Some(Type::difference(
                new_left.unwrap_or_else(|| (**left).clone()),
                new_right.unwrap_or_else(|| (**right).clone()),
            ))
        }
        Type::Nominal(nominal) => {
            let arguments = apply_slice(&nominal.arguments, binding)?;
            Some(Type::Nominal(Nominal {
                link: nominal.link,
                arguments,
            }))
        }
    }
}

fn apply_slice(types: &[Type], binding: &Binding) -> Option<Vec<Type>> {
    apply_slice_map(types.iter(), binding)
}

fn apply_slice_map<'a>(
    types: impl Iterator<Item = &'a Type> + Clone,
    binding: &Binding,
) -> Option<Vec<Type>> {
    let applied: Vec<Option<Type>> = types.clone().map(|t| apply(t, binding)).collect();
    if applied.iter().all(Option::is_none) {
        return None;
    }
    Some(
        types
            .zip(applied)
            .map(|(original, new)| new.unwrap_or_else(|| original.clone()))
            .collect(),
    )
}

fn apply_signature(
    parameters: &[Type],
    returns: &[Type],
    binding: &Binding,
) -> Option<(Vec<Type>, Vec<Type>)> {
    let new_parameters = apply_slice(parameters, binding);
    let new_returns = apply_slice(returns, binding);
    if new_parameters.is_none() && new_returns.is_none() {
        return None;
    }
    Some((
        new_parameters.unwrap_or_else(|| parameters.to_vec()),
        new_returns.unwrap_or_else(|| returns.to_vec()),
    ))
}
