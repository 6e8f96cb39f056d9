//! Name resolution.
//!
//! A `Link` item starts life with a name and no candidates. Resolution binds
//! it: local declarations of the enclosing unit win, then imports are
//! consulted in reverse order of appearance (later imports shadow earlier
//! ones). A resolved link is a fresh `Link` item carrying the surviving
//! candidates; every referrer is redirected to it.
//!
//! More than one candidate is only acceptable for callables, whose overloads
//! are narrowed by arity and argument types during flow typing. Anything
//! else resolving to several declarations, or to none, is a resolution
//! error on the module.
//!
//! Import expansions are cached per `(unit, import)` pair.

use std::collections::HashMap;

use wick_base::{ErrorCode, Identifier, Name, Symbol};
use wick_heap::view::{name_of, tuple_elements, ImportView, LinkView, ModuleView, UnitView};
use wick_heap::{Diagnostic, ItemHeap, ItemIndex, Opcode};

/// The declaration namespace a usage site selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Type,
    Static,
    Callable,
}

impl DeclKind {
    fn matches(self, opcode: Opcode) -> bool {
        match self {
            DeclKind::Type => opcode == Opcode::TypeAlias,
            DeclKind::Static => opcode == Opcode::StaticVariable,
            DeclKind::Callable => matches!(
                opcode,
                Opcode::Function | Opcode::Method | Opcode::Property | Opcode::Lambda
            ),
        }
    }
}

/// Resolves every link in the module, reporting resolution errors as
/// diagnostics. Returns the number of links rewritten.
pub fn resolve_module(heap: &mut ItemHeap) -> usize {
    let Some(root) = heap.root() else {
        return 0;
    };
    if heap.opcode(root) != Opcode::Module {
        return 0;
    }
    let module = ModuleView::new(heap, root);
    let units: Vec<ItemIndex> = module
        .units
        .iter()
        .chain(module.externs.iter())
        .copied()
        .collect();

    let mut resolver = Resolver {
        units: units.clone(),
        cache: HashMap::new(),
        resolved: 0,
        diagnostics: Vec::new(),
    };
    for &unit in &module.units {
        resolver.resolve_unit(heap, unit);
    }
    let Resolver {
        resolved,
        diagnostics,
        ..
    } = resolver;
    for diagnostic in diagnostics {
        heap.report(diagnostic);
    }
    log::debug!("resolved {} links", resolved);
    resolved
}

struct Resolver {
    /// All units visible to this compilation (own units then externs).
    units: Vec<ItemIndex>,
    /// Expansion cache keyed by (enclosing unit, import item).
    cache: HashMap<(ItemIndex, ItemIndex), Vec<ItemIndex>>,
    resolved: usize,
    diagnostics: Vec<Diagnostic>,
}

impl Resolver {
    fn resolve_unit(&mut self, heap: &mut ItemHeap, unit: ItemIndex) {
        // Imports in order of appearance; lookups walk them in reverse.
        let view = UnitView::new(heap, unit);
        let imports: Vec<ItemIndex> = view
            .declarations
            .iter()
            .copied()
            .filter(|&d| matches!(heap.opcode(d), Opcode::Import | Opcode::ImportFrom))
            .collect();

        // Collect the unresolved links reachable from this unit, each with
        // the namespace its usage site selects.
        let mut sites: Vec<(ItemIndex, DeclKind)> = Vec::new();
        collect_link_sites(heap, unit, &mut sites);

        for (link, kind) in sites {
            let view = LinkView::new(heap, link);
            if !view.candidates.is_empty() {
                continue; // already resolved
            }
            let Some(name) = link_name(heap, view.name) else {
                continue;
            };
            log::trace!("resolving {}", name.display(heap.interner()));
            let candidates = self.lookup(heap, unit, &imports, &name, kind);
            match candidates.len() {
                0 => self.diagnostics.push(
                    Diagnostic::new(ErrorCode::ResolutionError, heap.span_of(link))
                        .with_context(link),
                ),
                1 => self.rewrite(heap, link, view.name, &candidates),
                _ if kind == DeclKind::Callable => {
                    // overloads survive; flow typing narrows them
                    self.rewrite(heap, link, view.name, &candidates)
                }
                _ => self.diagnostics.push(
                    Diagnostic::new(ErrorCode::ResolutionError, heap.span_of(link))
                        .with_context(link),
                ),
            }
        }
    }

    fn rewrite(
        &mut self,
        heap: &mut ItemHeap,
        old: ItemIndex,
        name: ItemIndex,
        candidates: &[ItemIndex],
    ) {
        let mut operands = wick_heap::item::Operands::new();
        operands.push(name);
        operands.extend(candidates.iter().copied());
        let new = heap.allocate(Opcode::Link, operands, None);
        heap.redirect(old, new);
        self.resolved += 1;
    }

    /// Finds the declarations `name` refers to from inside `unit`.
    fn lookup(
        &mut self,
        heap: &ItemHeap,
        unit: ItemIndex,
        imports: &[ItemIndex],
        name: &Name,
        kind: DeclKind,
    ) -> Vec<ItemIndex> {
        // 1. a local declaration of the right kind shadows all imports
        if !name.is_qualified() {
            let local = declarations_named(heap, unit, name.last().symbol, kind);
            if !local.is_empty() {
                return local;
            }
        }

        // 2. imports, later ones shadowing earlier ones
        for &import in imports.iter().rev() {
            let found = self.through_import(heap, unit, import, name, kind);
            if !found.is_empty() {
                return found;
            }
        }

        // 3. fully-qualified usage names the unit directly
        if let Some(parent) = name.parent() {
            let prefix: Vec<Symbol> = parent.components().iter().map(|c| c.symbol).collect();
            let mut found = Vec::new();
            for &candidate in &self.units {
                if unit_matches_path(heap, candidate, &prefix) {
                    found.extend(declarations_named(heap, candidate, name.last().symbol, kind));
                }
            }
            return found;
        }
        Vec::new()
    }

    fn through_import(
        &mut self,
        heap: &ItemHeap,
        unit: ItemIndex,
        import: ItemIndex,
        name: &Name,
        kind: DeclKind,
    ) -> Vec<ItemIndex> {
        let view = ImportView::new(heap, import);
        let import_path: Vec<Symbol> = view.path.iter().map(|&id| name_of(heap, id)).collect();
        let last = name.last().symbol;
        match (view.from, name.parent()) {
            // `import y from x::z` binds the bare name y
            (Some(from), None) => {
                if name_of(heap, from) != last {
                    return Vec::new();
                }
                self.expansion(heap, unit, import, &import_path)
                    .into_iter()
                    .filter(|&d| {
                        kind.matches(heap.opcode(d)) && declaration_name(heap, d) == Some(last)
                    })
                    .collect()
            }
            (Some(_), Some(_)) => Vec::new(),
            // `import x::z` brings z's declarations into scope
            (None, None) => self
                .expansion(heap, unit, import, &import_path)
                .into_iter()
                .filter(|&d| {
                    kind.matches(heap.opcode(d)) && declaration_name(heap, d) == Some(last)
                })
                .collect(),
            // qualified usage through an import: the usage prefix must
            // match the tail of the imported path
            (None, Some(parent)) => {
                let prefix: Vec<Symbol> =
                    parent.components().iter().map(|c| c.symbol).collect();
                if !import_path.ends_with(&prefix) {
                    return Vec::new();
                }
                self.expansion(heap, unit, import, &import_path)
                    .into_iter()
                    .filter(|&d| {
                        kind.matches(heap.opcode(d)) && declaration_name(heap, d) == Some(last)
                    })
                    .collect()
            }
        }
    }

    /// The declarations of the unit an import path refers to, cached per
    /// `(unit, import)`.
    fn expansion(
        &mut self,
        heap: &ItemHeap,
        unit: ItemIndex,
        import: ItemIndex,
        import_path: &[Symbol],
    ) -> Vec<ItemIndex> {
        if let Some(cached) = self.cache.get(&(unit, import)) {
            return cached.clone();
        }
        let mut declarations = Vec::new();
        for &candidate in &self.units {
            if unit_matches_path(heap, candidate, import_path) {
                declarations.extend(UnitView::new(heap, candidate).declarations);
            }
        }
        self.cache.insert((unit, import), declarations.clone());
        declarations
    }
}

/// Walks a unit's declarations and bodies, pairing each unresolved link
/// with the namespace its usage selects.
fn collect_link_sites(heap: &ItemHeap, unit: ItemIndex, sites: &mut Vec<(ItemIndex, DeclKind)>) {
    let mut stack = vec![unit];
    let mut seen = vec![false; heap.len()];
    while let Some(index) = stack.pop() {
        if seen[index.index()] {
            continue;
        }
        seen[index.index()] = true;
        let item = heap.get(index);
        match item.opcode {
            Opcode::TypeNominal => sites.push((item.operand(0), DeclKind::Type)),
            Opcode::StaticVariableAccess => sites.push((item.operand(1), DeclKind::Static)),
            Opcode::LambdaAccess => sites.push((item.operand(1), DeclKind::Callable)),
            Opcode::Binding => sites.push((item.operand(0), DeclKind::Callable)),
            Opcode::TypeRecursive => continue, // back-edge
            _ => {}
        }
        stack.extend(item.operands.iter().copied());
    }
}

/// A link's name operand as a (possibly partial) qualified name: a bare
/// identifier or a tuple of identifiers.
fn link_name(heap: &ItemHeap, name: ItemIndex) -> Option<Name> {
    match heap.opcode(name) {
        Opcode::Identifier => Some(Name::single(Identifier::new(
            name_of(heap, name),
            heap.span_of(name),
        ))),
        Opcode::Tuple => {
            let components: Vec<Identifier> = tuple_elements(heap, name)
                .into_iter()
                .map(|id| Identifier::new(name_of(heap, id), heap.span_of(id)))
                .collect();
            if components.is_empty() {
                None
            } else {
                Some(Name::new(components))
            }
        }
        _ => None,
    }
}

fn declaration_name(heap: &ItemHeap, declaration: ItemIndex) -> Option<Symbol> {
    match heap.opcode(declaration) {
        Opcode::StaticVariable
        | Opcode::TypeAlias
        | Opcode::Function
        | Opcode::Method
        | Opcode::Property
        | Opcode::Lambda => Some(name_of(heap, heap.get(declaration).operand(1))),
        _ => None,
    }
}

fn declarations_named(
    heap: &ItemHeap,
    unit: ItemIndex,
    name: Symbol,
    kind: DeclKind,
) -> Vec<ItemIndex> {
    UnitView::new(heap, unit)
        .declarations
        .into_iter()
        .filter(|&d| kind.matches(heap.opcode(d)) && declaration_name(heap, d) == Some(name))
        .collect()
}

/// A unit name matches a path when its (possibly `::`-joined) name equals
/// the joined path, or its final component does for single-component paths.
fn unit_matches_path(heap: &ItemHeap, unit: ItemIndex, path: &[Symbol]) -> bool {
    if path.is_empty() {
        return false;
    }
    let unit_name = name_of(heap, UnitView::new(heap, unit).name);
    let joined = path
        .iter()
        .map(|s| heap.resolve(*s))
        .collect::<Vec<_>>()
        .join("::");
    let text = heap.resolve(unit_name);
    text == joined || text.rsplit("::").next() == Some(joined.as_str())
}
