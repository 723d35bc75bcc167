//! Structural checks over rewritten bodies
//!
//! The pipeline runs these after every transform batch; a class that fails
//! here is discarded and the original bytes are kept.

use crate::errors::Error;
use crate::ir::{ClassBody, Insn, LabelId, MethodBody};
use crate::util::Width;
use std::collections::HashSet;

/// Check every method of the class
pub fn check_class(class: &ClassBody) -> Result<(), Error> {
    for method in &class.methods {
        check_body(method)
            .map_err(|err| err.with_context(format!("in method {:?}", method.name)))?;
    }
    Ok(())
}

/// Check one method body: labels placed exactly once, every label operand
/// resolvable, every slot reference inside the declared maximum
pub fn check_body(body: &MethodBody) -> Result<(), Error> {
    let mut placed: HashSet<LabelId> = HashSet::new();
    for node in body.instructions.iter() {
        if let Insn::Label(label) = node.insn {
            if !placed.insert(label) {
                return Err(Error::validation(format!(
                    "label {:?} is placed more than once",
                    label
                )));
            }
        }
    }

    let resolve = |label: LabelId, role: &str| -> Result<(), Error> {
        if placed.contains(&label) {
            Ok(())
        } else {
            Err(Error::validation(format!(
                "{} label {:?} is not placed",
                role, label
            )))
        }
    };

    for node in body.instructions.iter() {
        if let Some(target) = node.insn.label_ref() {
            resolve(target, "jump")?;
        }
        if let Some(slot) = node.insn.slot_ref() {
            let width = match &node.insn {
                Insn::Load(kind, _) | Insn::Store(kind, _) if kind.is_wide() => 2,
                _ => 1,
            };
            if slot + width > body.max_slots {
                return Err(Error::validation(format!(
                    "slot {} exceeds max_slots {}",
                    slot, body.max_slots
                )));
            }
        }
    }

    for range in &body.exception_ranges {
        resolve(range.start, "exception start")?;
        resolve(range.end, "exception end")?;
        resolve(range.handler, "exception handler")?;
    }
    for entry in &body.slot_table {
        resolve(entry.start, "slot table start")?;
        resolve(entry.end, "slot table end")?;
        if entry.index + entry.ty.width() as u16 > body.max_slots {
            return Err(Error::validation(format!(
                "slot table entry '{}' exceeds max_slots {}",
                entry.name, body.max_slots
            )));
        }
    }
    Ok(())
}
