use super::body::MethodBody;
use super::insn::{Insn, LabelId};
use super::list::InsnList;
use crate::errors::Error;
use std::collections::HashMap;

/// Bijection from source labels to their clones
pub type LabelMap = HashMap<LabelId, LabelId>;

/// Deep-copy an instruction list, producing a consistent mapping between old
/// and new label identities
///
/// Two passes: the first allocates one fresh label per label placed in the
/// source (building the map), the second clones every node, substituting
/// label operands through the map. Every jump target in the clone resolves
/// inside the clone; no identity is shared with the source.
pub fn clone_list(source: &InsnList) -> Result<(InsnList, LabelMap), Error> {
    let mut clone = InsnList::new();
    let mut label_map = LabelMap::new();

    // Keep the clone's allocator ahead of every source label so fresh
    // labels never coincide numerically with labels of the source
    for node in source.iter() {
        if let Insn::Label(label) = node.insn {
            clone.reserve_label(label);
        }
        if let Some(target) = node.insn.label_ref() {
            clone.reserve_label(target);
        }
    }

    for node in source.iter() {
        if let Insn::Label(label) = node.insn {
            let fresh = clone.fresh_label();
            if label_map.insert(label, fresh).is_some() {
                return Err(Error::validation(format!(
                    "label {:?} placed more than once",
                    label
                )));
            }
        }
    }

    for node in source.iter() {
        let insn = match &node.insn {
            Insn::Label(label) => Insn::Label(label_map[label]),
            Insn::Jump(cond, target) => {
                let target = *label_map.get(target).ok_or_else(|| {
                    Error::validation(format!("jump target {:?} not placed in source", target))
                })?;
                Insn::Jump(*cond, target)
            }
            other => other.clone(),
        };
        clone.push(insn);
    }

    Ok((clone, label_map))
}

/// Deep-copy a whole method body, remapping exception ranges and the slot
/// table alongside the instructions
pub fn clone_body(source: &MethodBody) -> Result<(MethodBody, LabelMap), Error> {
    let (instructions, label_map) = clone_list(&source.instructions)?;

    let remap = |label: LabelId, what: &str| -> Result<LabelId, Error> {
        label_map.get(&label).copied().ok_or_else(|| {
            Error::validation(format!("{} label {:?} not placed in source", what, label))
        })
    };

    let mut exception_ranges = Vec::with_capacity(source.exception_ranges.len());
    for range in &source.exception_ranges {
        exception_ranges.push(super::body::ExceptionRange {
            start: remap(range.start, "exception start")?,
            end: remap(range.end, "exception end")?,
            handler: remap(range.handler, "exception handler")?,
            exception: range.exception.clone(),
        });
    }

    let mut slot_table = Vec::with_capacity(source.slot_table.len());
    for entry in &source.slot_table {
        slot_table.push(super::body::SlotEntry {
            name: entry.name.clone(),
            ty: entry.ty.clone(),
            start: remap(entry.start, "slot range start")?,
            end: remap(entry.end, "slot range end")?,
            index: entry.index,
        });
    }

    let clone = MethodBody {
        name: source.name.clone(),
        access: source.access,
        descriptor: source.descriptor.clone(),
        instructions,
        slot_table,
        exception_ranges,
        max_stack: source.max_stack,
        max_slots: source.max_slots,
    };
    Ok((clone, label_map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{JumpCond, Op};

    #[test]
    fn clone_remaps_every_label_operand() {
        let mut source = InsnList::new();
        let top = source.fresh_label();
        let out = source.fresh_label();
        source.push(Insn::Label(top));
        source.push(Insn::Simple(Op::Dup));
        source.push(Insn::Jump(JumpCond::IfEq, out));
        source.push(Insn::Jump(JumpCond::Goto, top));
        source.push(Insn::Label(out));
        source.push(Insn::Simple(Op::Return));

        let (clone, map) = clone_list(&source).unwrap();
        assert_eq!(clone.len(), source.len());
        assert_eq!(map.len(), 2);
        assert_ne!(map[&top], top);
        assert_ne!(map[&out], out);
        // No clone label may coincide with any source label
        for fresh in map.values() {
            assert!(!map.contains_key(fresh));
        }

        // Relative jump topology is preserved through the map
        for (old, new) in source.iter().zip(clone.iter()) {
            match (&old.insn, &new.insn) {
                (Insn::Jump(c1, t1), Insn::Jump(c2, t2)) => {
                    assert_eq!(c1, c2);
                    assert_eq!(map[t1], *t2);
                }
                (Insn::Label(l1), Insn::Label(l2)) => assert_eq!(map[l1], *l2),
                (a, b) => assert_eq!(a, b),
            }
        }
    }

    #[test]
    fn clone_rejects_dangling_jump() {
        let mut source = InsnList::new();
        let nowhere = source.fresh_label();
        source.push(Insn::Jump(JumpCond::Goto, nowhere));
        assert!(clone_list(&source).is_err());
    }
}
