//! The flow-typing environment.
//!
//! Tracks, per variable declaration, the type currently known at this
//! program point (the declared type refined by path-sensitive facts)
//! together with the assignment bits the combined analyses need.

use std::collections::HashMap;

use wick_heap::ItemIndex;
use wick_types::Type;

/// What the analyses know about one variable at one program point.
#[derive(Debug, Clone, PartialEq)]
pub struct VarStatus {
    /// The declared type as refined along the current path.
    pub ty: Type,
    /// The declared (unrefined) type, for havocking.
    pub declared: Type,
    pub assigned: bool,
    pub moved: bool,
}

/// Maps variable declarations to their current status.
#[derive(Debug, Clone, Default)]
pub struct FlowEnv {
    vars: HashMap<ItemIndex, VarStatus>,
}

impl FlowEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, declaration: ItemIndex, ty: Type, assigned: bool) {
        self.vars.insert(
            declaration,
            VarStatus {
                ty: ty.clone(),
                declared: ty,
                assigned,
                moved: false,
            },
        );
    }

    pub fn get(&self, declaration: ItemIndex) -> Option<&VarStatus> {
        self.vars.get(&declaration)
    }

    pub fn type_of(&self, declaration: ItemIndex) -> Option<&Type> {
        self.vars.get(&declaration).map(|status| &status.ty)
    }

    /// Narrows the variable's type along the current path.
    pub fn refine(&mut self, declaration: ItemIndex, ty: Type) {
        if let Some(status) = self.vars.get_mut(&declaration) {
            status.ty = ty;
        }
    }

    /// Records an assignment: the variable becomes assigned, un-moved, and
    /// flows with the assigned type.
    pub fn assign(&mut self, declaration: ItemIndex, ty: Type) {
        if let Some(status) = self.vars.get_mut(&declaration) {
            status.ty = ty;
            status.assigned = true;
            status.moved = false;
        }
    }

    pub fn mark_moved(&mut self, declaration: ItemIndex) {
        if let Some(status) = self.vars.get_mut(&declaration) {
            status.moved = true;
        }
    }

    /// Drops refinements for the given variables, restoring declared types.
    /// Used at loop heads and after calls that may mutate referenced state.
    pub fn havoc(&mut self, declarations: &[ItemIndex]) {
        for declaration in declarations {
            if let Some(status) = self.vars.get_mut(declaration) {
                status.ty = status.declared.clone();
            }
        }
    }

    /// Joins two branch environments: refinements union, assignment
    /// intersects, moves union.
    pub fn join(&self, other: &FlowEnv) -> FlowEnv {
        let mut joined = HashMap::new();
        for (declaration, left) in &self.vars {
            let Some(right) = other.vars.get(declaration) else {
                continue; // declared in one branch only: out of scope after
            };
            let ty = if left.ty == right.ty {
                left.ty.clone()
            } else {
                Type::union_of(vec![left.ty.clone(), right.ty.clone()])
            };
            joined.insert(
                *declaration,
                VarStatus {
                    ty,
                    declared: left.declared.clone(),
                    assigned: left.assigned && right.assigned,
                    moved: left.moved || right.moved,
                },
            );
        }
        FlowEnv { vars: joined }
    }

    pub fn declarations(&self) -> impl Iterator<Item = ItemIndex> + '_ {
        self.vars.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(i: u32) -> ItemIndex {
        ItemIndex::new(i)
    }

    #[test]
    fn refinement_is_dropped_by_havoc() {
        let mut env = FlowEnv::new();
        let x = decl(1);
        env.declare(x, Type::Union(vec![Type::Int, Type::Null]), true);
        env.refine(x, Type::Int);
        assert_eq!(env.type_of(x), Some(&Type::Int));
        env.havoc(&[x]);
        assert_eq!(
            env.type_of(x),
            Some(&Type::Union(vec![Type::Int, Type::Null]))
        );
    }

    #[test]
    fn join_unions_refinements_and_intersects_assignment() {
        let mut left = FlowEnv::new();
        let mut right = FlowEnv::new();
        let x = decl(1);
        let u = Type::Union(vec![Type::Int, Type::Null]);
        left.declare(x, u.clone(), true);
        right.declare(x, u.clone(), false);
        left.refine(x, Type::Int);
        right.refine(x, Type::Null);
        let joined = left.join(&right);
        let status = joined.get(x).unwrap();
        assert_eq!(status.ty, Type::Union(vec![Type::Int, Type::Null]));
        assert!(!status.assigned);
    }

    #[test]
    fn join_drops_single_branch_declarations() {
        let mut left = FlowEnv::new();
        let right = FlowEnv::new();
        left.declare(decl(1), Type::Int, true);
        let joined = left.join(&right);
        assert!(joined.get(decl(1)).is_none());
    }

    #[test]
    fn identical_refinements_join_unchanged() {
        let mut left = FlowEnv::new();
        let mut right = FlowEnv::new();
        let x = decl(1);
        left.declare(x, Type::Int, true);
        right.declare(x, Type::Int, true);
        let joined = left.join(&right);
        assert_eq!(joined.type_of(x), Some(&Type::Int));
    }
}
