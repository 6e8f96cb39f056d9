//! The item arena.
//!
//! An [`ItemHeap`] owns every item of one compilation (one module), the
//! interner their names resolve against, and a transient span table used for
//! diagnostics. Allocation appends; transforms rewrite by allocating a new
//! item and redirecting operand references or the root. There is no garbage
//! collection; stale items linger until the writer's reachability sweep
//! drops them.

use std::collections::HashMap;
use std::fmt;

use wick_base::{ErrorCode, Interner, Span, Symbol};

use crate::item::{Item, ItemIndex, Operands, Payload};
use crate::opcode::{DataArity, Opcode};

/// Errors from heap manipulation.
///
/// These indicate misuse by a transform, not user-facing problems; passes
/// report user problems as [`Diagnostic`]s instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeapError {
    /// `replace_operand` addressed a position outside the item's arity.
    OperandOutOfRange { index: ItemIndex, position: usize },
    /// An operand referred to an index that was never allocated.
    DanglingReference { index: ItemIndex },
    /// The heap has no root to traverse from.
    MissingRoot,
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapError::OperandOutOfRange { index, position } => {
                write!(f, "operand {} out of range for item {}", position, index.raw())
            }
            HeapError::DanglingReference { index } => {
                write!(f, "operand reference to unallocated item {}", index.raw())
            }
            HeapError::MissingRoot => write!(f, "heap has no root"),
        }
    }
}

impl std::error::Error for HeapError {}

/// A user-facing problem found by a pass.
///
/// Diagnostics are plain values until attached to the heap via
/// [`ItemHeap::report`], which turns them into `Error` items on the module's
/// diagnostic tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: ErrorCode,
    pub span: Span,
    /// Related items giving the message context (the offending expression,
    /// the conflicting declaration, ...).
    pub context: Vec<ItemIndex>,
}

impl Diagnostic {
    pub fn new(code: ErrorCode, span: Span) -> Self {
        Self {
            code,
            span,
            context: Vec::new(),
        }
    }

    pub fn with_context(mut self, item: ItemIndex) -> Self {
        self.context.push(item);
        self
    }
}

/// The arena of items for one compilation.
pub struct ItemHeap {
    items: Vec<Item>,
    root: Option<ItemIndex>,
    interner: Interner,
    spans: HashMap<ItemIndex, Span>,
}

impl ItemHeap {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            root: None,
            interner: Interner::new(),
            spans: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Appends a new item and returns its index.
    ///
    /// Schema conformance is an internal invariant of the caller: violating
    /// the opcode's operand or data arity is a bug in a transform, and
    /// panics.
    pub fn allocate(
        &mut self,
        opcode: Opcode,
        operands: Operands,
        data: Option<Payload>,
    ) -> ItemIndex {
        let schema = opcode.schema();
        assert!(
            schema.operands.admits(operands.len()),
            "operand count {} violates schema of {:?}",
            operands.len(),
            opcode,
        );
        assert!(
            (schema.data == DataArity::Two) == data.is_some(),
            "payload presence violates schema of {:?}",
            opcode,
        );
        let index = ItemIndex::new(self.items.len() as u32);
        self.items.push(Item::new(opcode, operands, data));
        index
    }

    pub fn get(&self, index: ItemIndex) -> &Item {
        &self.items[index.index()]
    }

    pub fn opcode(&self, index: ItemIndex) -> Opcode {
        self.items[index.index()].opcode
    }

    /// Redirects the `position`th operand of `index` to `target`.
    ///
    /// Arity and opcode never change; this is the only in-place mutation the
    /// heap permits.
    pub fn replace_operand(
        &mut self,
        index: ItemIndex,
        position: usize,
        target: ItemIndex,
    ) -> Result<(), HeapError> {
        if target.index() >= self.items.len() {
            return Err(HeapError::DanglingReference { index: target });
        }
        let item = &mut self.items[index.index()];
        if position >= item.operands.len() {
            return Err(HeapError::OperandOutOfRange { index, position });
        }
        item.operands[position] = target;
        Ok(())
    }

    /// Redirects every operand reference to `old` so it points at `new`.
    ///
    /// This is how transforms rewrite: allocate the replacement item, then
    /// swing all referrers over. The old item becomes garbage for the
    /// writer's sweep to drop.
    pub fn redirect(&mut self, old: ItemIndex, new: ItemIndex) {
        for item in &mut self.items {
            for operand in &mut item.operands {
                if *operand == old {
                    *operand = new;
                }
            }
        }
        if self.root == Some(old) {
            self.root = Some(new);
        }
    }

    pub fn set_root(&mut self, index: ItemIndex) {
        self.root = Some(index);
    }

    pub fn root(&self) -> Option<ItemIndex> {
        self.root
    }

    /// All items of the given kind, in allocation order.
    pub fn items_of_kind(&self, opcode: Opcode) -> impl Iterator<Item = ItemIndex> + '_ {
        self.items
            .iter()
            .enumerate()
            .filter(move |(_, item)| item.opcode == opcode)
            .map(|(i, _)| ItemIndex::new(i as u32))
    }

    // ---- Names and spans ----

    pub fn intern(&mut self, s: &str) -> Symbol {
        self.interner.intern(s)
    }

    pub fn resolve(&self, sym: Symbol) -> &str {
        self.interner.resolve(sym)
    }

    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    /// Records the source range an item was produced from. Spans are
    /// transient: they are re-established by the parser and are not part of
    /// the serialized form except inside diagnostics.
    pub fn set_span(&mut self, index: ItemIndex, span: Span) {
        self.spans.insert(index, span);
    }

    pub fn span_of(&self, index: ItemIndex) -> Span {
        self.spans.get(&index).copied().unwrap_or_default()
    }

    // ---- Reachability ----

    /// The items reachable from the root, in post-order (root last).
    ///
    /// `TypeRecursive` back-references are not traversed; they close cycles
    /// and always point at an enclosing composite that is reached on the way
    /// down.
    pub fn reachable(&self) -> Result<Vec<ItemIndex>, HeapError> {
        let root = self.root.ok_or(HeapError::MissingRoot)?;
        let mut order = Vec::new();
        let mut state = vec![0u8; self.items.len()]; // 0 unvisited, 1 open, 2 done
        let mut stack = vec![(root, 0usize)];
        while let Some(&(index, next)) = stack.last() {
            if state[index.index()] == 2 {
                stack.pop();
                continue;
            }
            state[index.index()] = 1;
            let item = &self.items[index.index()];
            let skip_operands = item.opcode == Opcode::TypeRecursive;
            if !skip_operands && next < item.operands.len() {
                let child = item.operands[next];
                stack.last_mut().expect("stack is non-empty").1 += 1;
                if child.index() >= self.items.len() {
                    return Err(HeapError::DanglingReference { index: child });
                }
                if state[child.index()] == 0 {
                    stack.push((child, 0));
                }
            } else {
                state[index.index()] = 2;
                order.push(index);
                stack.pop();
            }
        }
        Ok(order)
    }

    // ---- Diagnostics ----

    /// Attaches a diagnostic to the module as an `Error` item.
    ///
    /// The module's diagnostic tuple is append-only: a fresh tuple item is
    /// allocated with the previous entries plus the new one, and the
    /// module's fourth operand is redirected to it.
    pub fn report(&mut self, diagnostic: Diagnostic) {
        log::debug!(
            "diagnostic E{:03} at {}..{}",
            diagnostic.code.code(),
            diagnostic.span.start,
            diagnostic.span.end
        );
        let code = self.allocate(
            Opcode::Value,
            Operands::new(),
            Some(Payload::Int(diagnostic.code.code().into())),
        );
        let start = self.allocate(
            Opcode::Value,
            Operands::new(),
            Some(Payload::Int(diagnostic.span.start.into())),
        );
        let end = self.allocate(
            Opcode::Value,
            Operands::new(),
            Some(Payload::Int(diagnostic.span.end.into())),
        );
        let context = self.allocate(
            Opcode::Tuple,
            diagnostic.context.iter().copied().collect(),
            None,
        );
        let mut operands = Operands::new();
        operands.extend([code, start, end, context]);
        let error = self.allocate(Opcode::Error, operands, None);

        let module = match self.root {
            Some(root) if self.opcode(root) == Opcode::Module => root,
            _ => return, // nowhere to attach; diagnostic is dropped on rootless heaps
        };
        let old_tuple = self.get(module).operand(3);
        let mut entries: Operands = self.get(old_tuple).operands.clone();
        entries.push(error);
        let new_tuple = self.allocate(Opcode::Tuple, entries, None);
        self.replace_operand(module, 3, new_tuple)
            .expect("module has a diagnostics operand");
    }

    /// Decodes the diagnostics currently attached to the module.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let Some(root) = self.root else {
            return Vec::new();
        };
        if self.opcode(root) != Opcode::Module {
            return Vec::new();
        }
        let tuple = self.get(root).operand(3);
        self.get(tuple)
            .operands
            .iter()
            .filter_map(|&error| self.decode_error(error))
            .collect()
    }

    /// True when any attached diagnostic is an error.
    pub fn has_errors(&self) -> bool {
        !self.diagnostics().is_empty()
    }

    fn decode_error(&self, index: ItemIndex) -> Option<Diagnostic> {
        let item = self.get(index);
        if item.opcode != Opcode::Error || item.operands.len() < 4 {
            return None;
        }
        let number = self.payload_int(item.operand(0))?;
        let code = ErrorCode::from_code(u16::try_from(number).ok()?)?;
        let start = self.payload_int(item.operand(1))? as usize;
        let end = self.payload_int(item.operand(2))? as usize;
        let context = self.get(item.operand(3)).operands.iter().copied().collect();
        Some(Diagnostic {
            code,
            span: Span::new(start, end),
            context,
        })
    }

    fn payload_int(&self, index: ItemIndex) -> Option<u64> {
        let payload = self.get(index).data.as_ref()?;
        let value = payload.as_int()?;
        u64::try_from(value).ok()
    }
}

impl Default for ItemHeap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(heap: &mut ItemHeap, opcode: Opcode) -> ItemIndex {
        heap.allocate(opcode, Operands::new(), None)
    }

    fn tuple(heap: &mut ItemHeap, entries: &[ItemIndex]) -> ItemIndex {
        heap.allocate(Opcode::Tuple, entries.iter().copied().collect(), None)
    }

    fn test_module(heap: &mut ItemHeap) -> ItemIndex {
        let sym = heap.intern("main");
        let name = heap.allocate(Opcode::Identifier, Operands::new(), Some(Payload::Name(sym)));
        let units = tuple(heap, &[]);
        let externs = tuple(heap, &[]);
        let errors = tuple(heap, &[]);
        let mut operands = Operands::new();
        operands.extend([name, units, externs, errors]);
        let module = heap.allocate(Opcode::Module, operands, None);
        heap.set_root(module);
        module
    }

    #[test]
    fn allocate_returns_dense_indices() {
        let mut heap = ItemHeap::new();
        let a = leaf(&mut heap, Opcode::Skip);
        let b = leaf(&mut heap, Opcode::Fail);
        assert_eq!(a.raw(), 0);
        assert_eq!(b.raw(), 1);
        assert_eq!(heap.opcode(a), Opcode::Skip);
    }

    #[test]
    #[should_panic(expected = "violates schema")]
    fn allocate_rejects_arity_violation() {
        let mut heap = ItemHeap::new();
        let a = leaf(&mut heap, Opcode::Skip);
        // TypeArray requires exactly one operand.
        heap.allocate(Opcode::TypeArray, [a, a].into_iter().collect(), None);
    }

    #[test]
    fn replace_operand_redirects_in_place() {
        let mut heap = ItemHeap::new();
        let a = leaf(&mut heap, Opcode::TypeInt);
        let b = leaf(&mut heap, Opcode::TypeBool);
        let arr = heap.allocate(Opcode::TypeArray, [a].into_iter().collect(), None);
        heap.replace_operand(arr, 0, b).unwrap();
        assert_eq!(heap.get(arr).operand(0), b);
    }

    #[test]
    fn replace_operand_rejects_bad_position() {
        let mut heap = ItemHeap::new();
        let a = leaf(&mut heap, Opcode::TypeInt);
        let arr = heap.allocate(Opcode::TypeArray, [a].into_iter().collect(), None);
        let err = heap.replace_operand(arr, 1, a).unwrap_err();
        assert!(matches!(err, HeapError::OperandOutOfRange { .. }));
    }

    #[test]
    fn reachable_is_post_order_with_root_last() {
        let mut heap = ItemHeap::new();
        let a = leaf(&mut heap, Opcode::TypeInt);
        let _orphan = leaf(&mut heap, Opcode::TypeBool);
        let arr = heap.allocate(Opcode::TypeArray, [a].into_iter().collect(), None);
        heap.set_root(arr);
        let order = heap.reachable().unwrap();
        assert_eq!(order, vec![a, arr]);
    }

    #[test]
    fn reachable_handles_recursive_back_references() {
        let mut heap = ItemHeap::new();
        // union := null | recursive(union)
        let null = leaf(&mut heap, Opcode::TypeNull);
        let recursive = heap.allocate(Opcode::TypeRecursive, [null].into_iter().collect(), None);
        let union = heap.allocate(
            Opcode::TypeUnion,
            [null, recursive].into_iter().collect(),
            None,
        );
        // close the cycle
        heap.replace_operand(recursive, 0, union).unwrap();
        heap.set_root(union);
        let order = heap.reachable().unwrap();
        assert_eq!(order.len(), 3);
        assert_eq!(*order.last().unwrap(), union);
    }

    #[test]
    fn report_appends_to_the_module_diagnostic_tuple() {
        let mut heap = ItemHeap::new();
        test_module(&mut heap);
        assert!(!heap.has_errors());
        heap.report(Diagnostic::new(ErrorCode::SubtypeError, Span::new(4, 9)));
        heap.report(Diagnostic::new(ErrorCode::MissingReturn, Span::new(1, 2)));
        let diags = heap.diagnostics();
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].code, ErrorCode::SubtypeError);
        assert_eq!(diags[0].span, Span::new(4, 9));
        assert_eq!(diags[1].code, ErrorCode::MissingReturn);
    }
}
