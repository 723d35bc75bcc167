//! Locating, extracting, removing, and copying contiguous sub-sequences of an
//! instruction list
//!
//! Ranges are identified by debug line markers, by literal constant-load
//! markers, or by explicit node identity, and are always inclusive of both
//! boundary nodes. Boundary resolution failure is a reportable error, never a
//! silent no-op.

use super::clone::clone_list;
use super::insn::{ConstValue, Insn, InsnId};
use super::list::{InsnList, InsnNode};
use crate::errors::Error;

/// How a contiguous range of instructions is identified
#[derive(Clone, Debug)]
pub enum Boundary {
    /// From the first marker for `start` through the instructions covered by
    /// the last marker for `end` (up to, not including, the next line marker)
    Lines { start: u16, end: u16 },

    /// From the *first* load of the `start` constant through the *last* load
    /// of the `end` constant
    Consts { start: ConstValue, end: ConstValue },

    /// Explicit node identities
    Nodes { start: InsnId, end: InsnId },
}

/// Resolve a boundary to inclusive start and end node identities
pub fn resolve_boundary(list: &InsnList, boundary: &Boundary) -> Result<(InsnId, InsnId), Error> {
    match boundary {
        Boundary::Lines { start, end } => {
            let nodes = list.nodes();
            let start_index = nodes
                .iter()
                .position(|node| node.insn == Insn::Line(*start))
                .ok_or_else(|| Error::boundary_unresolved(format!("line {}", start)))?;
            let end_marker = nodes
                .iter()
                .rposition(|node| node.insn == Insn::Line(*end))
                .ok_or_else(|| Error::boundary_unresolved(format!("line {}", end)))?;
            if end_marker < start_index {
                return Err(Error::boundary_unresolved(format!(
                    "line {} ends before line {} starts",
                    end, start
                )));
            }
            // The end line covers everything up to the next line marker
            let end_index = nodes[end_marker + 1..]
                .iter()
                .position(|node| matches!(node.insn, Insn::Line(_)))
                .map(|offset| end_marker + offset)
                .unwrap_or(nodes.len() - 1);
            Ok((nodes[start_index].id, nodes[end_index].id))
        }
        Boundary::Consts { start, end } => {
            let nodes = list.nodes();
            let start_index = nodes
                .iter()
                .position(|node| node.insn == Insn::Const(start.clone()))
                .ok_or_else(|| Error::boundary_unresolved(format!("constant {:?}", start)))?;
            let end_index = nodes
                .iter()
                .rposition(|node| node.insn == Insn::Const(end.clone()))
                .ok_or_else(|| Error::boundary_unresolved(format!("constant {:?}", end)))?;
            if end_index < start_index {
                return Err(Error::boundary_unresolved(format!(
                    "constant {:?} occurs before constant {:?}",
                    end, start
                )));
            }
            Ok((nodes[start_index].id, nodes[end_index].id))
        }
        Boundary::Nodes { start, end } => {
            let start_index = list
                .index_of(*start)
                .ok_or_else(|| Error::boundary_unresolved(format!("node {:?}", start)))?;
            let end_index = list
                .index_of(*end)
                .ok_or_else(|| Error::boundary_unresolved(format!("node {:?}", end)))?;
            if end_index < start_index {
                return Err(Error::boundary_unresolved(format!(
                    "node {:?} precedes node {:?}",
                    end, start
                )));
            }
            Ok((*start, *end))
        }
    }
}

fn window(list: &InsnList, start: InsnId, end: InsnId) -> Result<(usize, usize), Error> {
    let start_index = list
        .index_of(start)
        .ok_or_else(|| Error::boundary_unresolved(format!("node {:?}", start)))?;
    let end_index = list
        .index_of(end)
        .ok_or_else(|| Error::boundary_unresolved(format!("node {:?}", end)))?;
    if end_index < start_index {
        return Err(Error::boundary_unresolved(format!(
            "node {:?} precedes node {:?}",
            end, start
        )));
    }
    Ok((start_index, end_index))
}

/// Check that no jump in the fragment escapes it and no label needed by a
/// jump outside the fragment is being carried away
fn check_self_contained(fragment: &[InsnNode], rest: &InsnList) -> Result<(), Error> {
    for node in fragment {
        if let Some(target) = node.insn.label_ref() {
            let inside = fragment.iter().any(|n| n.insn == Insn::Label(target));
            if !inside {
                return Err(Error::validation(format!(
                    "range jump target {:?} lies outside the range",
                    target
                )));
            }
        }
    }
    for node in fragment {
        if let Insn::Label(label) = node.insn {
            for outside in rest.iter() {
                if outside.insn.label_ref() == Some(label) {
                    return Err(Error::validation(format!(
                        "label {:?} is jumped to from outside the range",
                        label
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Remove the inclusive range from the list and return it as a standalone
/// fragment list (identities are preserved)
pub fn extract_range(list: &mut InsnList, start: InsnId, end: InsnId) -> Result<InsnList, Error> {
    let (start_index, end_index) = window(list, start, end)?;
    let fragment = list.drain_window(start_index, end_index);
    if let Err(err) = check_self_contained(&fragment, list) {
        // Put the fragment back; a failed extraction must not mutate
        list.insert_all_nodes_at(start_index, fragment);
        return Err(err);
    }
    Ok(InsnList::adopt(fragment))
}

/// Remove the inclusive range from the list, discarding it
pub fn remove_range(list: &mut InsnList, start: InsnId, end: InsnId) -> Result<usize, Error> {
    let removed = extract_range(list, start, end)?;
    Ok(removed.len())
}

/// Clone the inclusive range into a standalone fragment list with fresh
/// labels, leaving the source untouched
pub fn copy_range(list: &InsnList, start: InsnId, end: InsnId) -> Result<InsnList, Error> {
    let (start_index, end_index) = window(list, start, end)?;
    let fragment: Vec<InsnNode> = list.nodes()[start_index..=end_index].to_vec();
    // Clone through a temporary list so label operands are remapped
    let staged = InsnList::adopt(fragment);
    let (clone, _) = clone_list(&staged)?;
    Ok(clone)
}

impl InsnList {
    /// Re-insert previously drained nodes at a position, identities intact
    pub(crate) fn insert_all_nodes_at(&mut self, index: usize, nodes: Vec<InsnNode>) {
        for (offset, node) in nodes.into_iter().enumerate() {
            self.insert_node_at(index + offset, node);
        }
    }

    fn insert_node_at(&mut self, index: usize, node: InsnNode) {
        // Safe to re-adopt foreign identities as long as the counters stay
        // ahead of them
        self.reserve_label_of(&node);
        self.reserve_id(node.id);
        self.insert_raw(index, node);
    }
}
