use super::insn::{Insn, InsnId, LabelId};

/// One node in an instruction list: an instruction plus its stable identity
#[derive(Clone, Debug)]
pub struct InsnNode {
    pub id: InsnId,
    pub insn: Insn,
}

/// Ordered list of instruction nodes for one method body
///
/// Supports forward/backward traversal, identity-based search, and in-place
/// mutation. Mutation never renumbers or moves surviving nodes; the only
/// reference a mutation invalidates is the one removed. Label and node
/// identities are allocated from per-list counters and never reused.
#[derive(Clone, Debug, Default)]
pub struct InsnList {
    nodes: Vec<InsnNode>,
    next_insn: u32,
    next_label: u32,
}

impl InsnList {
    pub fn new() -> InsnList {
        InsnList::default()
    }

    /// Build a list from nodes that already carry identities (e.g. a range
    /// extracted from another list), bumping the identity counters past
    /// everything present so fresh allocations cannot collide
    pub fn adopt(nodes: Vec<InsnNode>) -> InsnList {
        let mut next_insn = 0;
        let mut next_label = 0;
        for node in &nodes {
            next_insn = next_insn.max(node.id.0 + 1);
            let label = match node.insn {
                Insn::Label(label) => Some(label),
                Insn::Jump(_, target) => Some(target),
                _ => None,
            };
            if let Some(LabelId(raw)) = label {
                next_label = next_label.max(raw + 1);
            }
        }
        InsnList {
            nodes,
            next_insn,
            next_label,
        }
    }

    /// Allocate a fresh label belonging to this list
    ///
    /// The label is not placed; push an [`Insn::Label`] node to place it.
    pub fn fresh_label(&mut self) -> LabelId {
        let label = LabelId(self.next_label);
        self.next_label += 1;
        label
    }

    /// Note a label as in use, keeping the allocator ahead of it
    pub fn reserve_label(&mut self, label: LabelId) {
        self.next_label = self.next_label.max(label.0 + 1);
    }

    fn fresh_id(&mut self) -> InsnId {
        let id = InsnId(self.next_insn);
        self.next_insn += 1;
        id
    }

    /// Append an instruction, returning the new node's identity
    pub fn push(&mut self, insn: Insn) -> InsnId {
        let id = self.fresh_id();
        self.nodes.push(InsnNode { id, insn });
        id
    }

    /// Append a whole sequence of instructions
    pub fn push_all(&mut self, insns: impl IntoIterator<Item = Insn>) {
        for insn in insns {
            self.push(insn);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, InsnNode> {
        self.nodes.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, InsnNode> {
        self.nodes.iter_mut()
    }

    pub fn nodes(&self) -> &[InsnNode] {
        &self.nodes
    }

    /// Position of a node in the current ordering
    pub fn index_of(&self, id: InsnId) -> Option<usize> {
        self.nodes.iter().position(|node| node.id == id)
    }

    pub fn get(&self, id: InsnId) -> Option<&Insn> {
        self.nodes
            .iter()
            .find(|node| node.id == id)
            .map(|node| &node.insn)
    }

    /// Identity of the node at a position
    pub fn id_at(&self, index: usize) -> Option<InsnId> {
        self.nodes.get(index).map(|node| node.id)
    }

    /// Node defining the given label
    pub fn find_label(&self, label: LabelId) -> Option<InsnId> {
        self.nodes
            .iter()
            .find(|node| node.insn == Insn::Label(label))
            .map(|node| node.id)
    }

    /// Insert a new instruction immediately before the identified node
    pub fn insert_before(&mut self, anchor: InsnId, insn: Insn) -> Option<InsnId> {
        let index = self.index_of(anchor)?;
        let id = self.fresh_id();
        self.nodes.insert(index, InsnNode { id, insn });
        Some(id)
    }

    /// Insert a new instruction immediately after the identified node
    pub fn insert_after(&mut self, anchor: InsnId, insn: Insn) -> Option<InsnId> {
        let index = self.index_of(anchor)?;
        let id = self.fresh_id();
        self.nodes.insert(index + 1, InsnNode { id, insn });
        Some(id)
    }

    /// Insert a sequence of instructions at a position
    pub fn insert_all_at(&mut self, index: usize, insns: impl IntoIterator<Item = Insn>) {
        for (offset, insn) in insns.into_iter().enumerate() {
            let id = self.fresh_id();
            self.nodes.insert(index + offset, InsnNode { id, insn });
        }
    }

    /// Remove the identified node, returning its instruction
    pub fn remove(&mut self, id: InsnId) -> Option<Insn> {
        let index = self.index_of(id)?;
        Some(self.nodes.remove(index).insn)
    }

    /// Replace the identified node's instruction in place (identity is kept)
    pub fn replace(&mut self, id: InsnId, insn: Insn) -> Option<Insn> {
        let index = self.index_of(id)?;
        Some(std::mem::replace(&mut self.nodes[index].insn, insn))
    }

    /// Remove the nodes in the inclusive index window, returning them in
    /// order
    pub(crate) fn drain_window(&mut self, start: usize, end: usize) -> Vec<InsnNode> {
        self.nodes.drain(start..=end).collect()
    }

    pub(crate) fn reserve_id(&mut self, id: InsnId) {
        self.next_insn = self.next_insn.max(id.0 + 1);
    }

    pub(crate) fn reserve_label_of(&mut self, node: &InsnNode) {
        match node.insn {
            Insn::Label(label) | Insn::Jump(_, label) => self.reserve_label(label),
            _ => {}
        }
    }

    pub(crate) fn insert_raw(&mut self, index: usize, node: InsnNode) {
        self.nodes.insert(index, node);
    }

    /// Opcode sequence without identities, for structural comparisons
    pub fn insns(&self) -> impl Iterator<Item = &Insn> {
        self.nodes.iter().map(|node| &node.insn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Op;

    #[test]
    fn mutation_preserves_surviving_identities() {
        let mut list = InsnList::new();
        let a = list.push(Insn::Simple(Op::Nop));
        let b = list.push(Insn::Simple(Op::Pop));
        let c = list.push(Insn::Simple(Op::Return));

        let inserted = list.insert_before(b, Insn::Simple(Op::Dup)).unwrap();
        assert_eq!(list.index_of(inserted), Some(1));
        assert_eq!(list.index_of(b), Some(2));

        list.remove(a);
        assert_eq!(list.index_of(a), None);
        assert_eq!(list.get(b), Some(&Insn::Simple(Op::Pop)));
        assert_eq!(list.get(c), Some(&Insn::Simple(Op::Return)));
        assert_eq!(list.index_of(c), Some(2));
    }

    #[test]
    fn adopt_bumps_counters_past_existing_identities() {
        let mut source = InsnList::new();
        let label = source.fresh_label();
        source.push(Insn::Label(label));
        source.push(Insn::Jump(crate::ir::JumpCond::Goto, label));
        let nodes: Vec<InsnNode> = source.iter().cloned().collect();

        let mut adopted = InsnList::adopt(nodes);
        let fresh = adopted.fresh_label();
        assert!(fresh > label);
        let id = adopted.push(Insn::Simple(Op::Return));
        assert_eq!(adopted.index_of(id), Some(2));
    }
}
