use super::body::MethodBody;
use super::insn::Insn;
use crate::errors::Error;

/// Insert `count` fresh local slots at `at`, rewriting every slot reference
///
/// Every slot-referencing instruction and every slot-table entry with index
/// `< at` is unchanged; indices `>= at` shift up by `count`. The rewrite is a
/// single pass over one list, so no reference is ever observed half-shifted.
pub fn insert_slots(body: &mut MethodBody, at: u16, count: u16) {
    if count == 0 {
        return;
    }
    for node in body.instructions.iter_mut() {
        shift_insn(&mut node.insn, at, count as i32);
    }
    for entry in &mut body.slot_table {
        if entry.index >= at {
            entry.index += count;
        }
    }
    body.max_slots += count;
}

/// Remove `count` local slots at `at`, the mirror image of [`insert_slots`]
///
/// Used when a widened-then-narrowed transform is undone. Any surviving
/// reference into the removed window is reported rather than silently
/// renumbered.
pub fn remove_slots(body: &mut MethodBody, at: u16, count: u16) -> Result<(), Error> {
    if count == 0 {
        return Ok(());
    }
    let window = at..at + count;
    for node in body.instructions.iter() {
        if let Some(slot) = node.insn.slot_ref() {
            if window.contains(&slot) {
                return Err(Error::validation(format!(
                    "slot {} still referenced inside removed window {}..{}",
                    slot,
                    at,
                    at + count
                )));
            }
        }
    }
    for entry in &body.slot_table {
        if window.contains(&entry.index) {
            return Err(Error::validation(format!(
                "slot table entry '{}' lives inside removed window {}..{}",
                entry.name,
                at,
                at + count
            )));
        }
    }

    for node in body.instructions.iter_mut() {
        shift_insn(&mut node.insn, at, -(count as i32));
    }
    for entry in &mut body.slot_table {
        if entry.index >= at {
            entry.index -= count;
        }
    }
    body.max_slots -= count;
    Ok(())
}

fn shift_insn(insn: &mut Insn, at: u16, delta: i32) {
    let shift = |slot: &mut u16| {
        if *slot >= at {
            *slot = (*slot as i32 + delta) as u16;
        }
    };
    match insn {
        Insn::Load(_, slot) | Insn::Store(_, slot) => shift(slot),
        Insn::Inc { slot, .. } => shift(slot),
        _ => {}
    }
}
