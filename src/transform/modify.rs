//! Modify: targeted in-place rewrites of one method body

use super::requests::{ModifyMode, ModifyRequest, SlotSelector};
use crate::errors::Error;
use crate::ir::{
    insert_slots, ClassBody, ConstValue, Insn, InsnId, MethodBody, Op, PromotionMarker, SlotKind,
};
use crate::jvm::{BaseType, FieldType};
use crate::util::Width;

pub fn apply(class: &mut ClassBody, request: &ModifyRequest) -> Result<(), Error> {
    let index = class
        .find_method(&request.target.name, request.target.descriptor.as_ref())
        .ok_or_else(|| Error::target_not_found(format!("{:?}", request.target.name)))?;

    match &request.mode {
        ModifyMode::Value {
            slot,
            literal,
            hook,
        } => intercept_values(&mut class.methods[index], slot.as_ref(), literal.as_ref(), hook),
        ModifyMode::Type { slot, widen_to } => widen_slot(&mut class.methods[index], slot, *widen_to),
        ModifyMode::Scope { slot } => extend_scope(&mut class.methods[index], slot),
        ModifyMode::Lifetime { slot } => {
            let body = &class.methods[index];
            let slot_index = resolve_slot(body, slot)?;
            let ty = body
                .slot_table
                .iter()
                .find(|entry| entry.index == slot_index)
                .map(|entry| entry.ty.clone())
                .unwrap_or(FieldType::object(crate::jvm::BinaryName::OBJECT));
            let marker = PromotionMarker {
                method: body.name.clone(),
                descriptor: body.descriptor.clone(),
                slot: slot_index,
                ty,
            };
            class.promotions.push(marker);
            Ok(())
        }
    }
}

fn resolve_slot(body: &MethodBody, selector: &SlotSelector) -> Result<u16, Error> {
    match selector {
        SlotSelector::Index(index) => Ok(*index),
        SlotSelector::Named(name) => body
            .slot_table
            .iter()
            .find(|entry| entry.name == *name)
            .map(|entry| entry.index)
            .ok_or_else(|| Error::target_not_found(format!("slot '{}'", name))),
    }
}

/// Insert a hook call before every store to the selected slot, or before
/// every constant load matching the literal
fn intercept_values(
    body: &mut MethodBody,
    slot: Option<&SlotSelector>,
    literal: Option<&ConstValue>,
    hook: &crate::ir::MemberRef,
) -> Result<(), Error> {
    let slot_index = slot.map(|selector| resolve_slot(body, selector)).transpose()?;

    let matches: Vec<InsnId> = body
        .instructions
        .iter()
        .filter(|node| match (&node.insn, slot_index, literal) {
            (Insn::Store(_, index), Some(slot), _) => *index == slot,
            (Insn::Const(value), None, Some(literal)) => value == literal,
            _ => false,
        })
        .map(|node| node.id)
        .collect();

    if matches.is_empty() {
        return Err(Error::target_not_found(
            "no store or literal matched the value-modify request".to_owned(),
        ));
    }

    // A non-void hook would leave its result under the intercepted value;
    // it is popped right after the call
    let discard = hook.descriptor.return_type.as_ref().map(|ret| {
        if ret.width() == 2 {
            Op::Pop2
        } else {
            Op::Pop
        }
    });

    for id in matches {
        match body.instructions.get(id) {
            Some(Insn::Store(kind, _)) => {
                // The value about to be stored is duplicated for the hook
                let dup = if kind.is_wide() { Op::Dup2 } else { Op::Dup };
                let anchor = body
                    .instructions
                    .insert_before(id, Insn::Call(crate::ir::CallKind::Static, hook.clone()))
                    .ok_or_else(|| Error::validation("store vanished mid-rewrite".to_owned()))?;
                body.instructions.insert_before(anchor, Insn::Simple(dup));
                if let Some(pop) = discard {
                    body.instructions.insert_before(id, Insn::Simple(pop));
                }
            }
            Some(Insn::Const(value)) => {
                let value = value.clone();
                let anchor = body
                    .instructions
                    .insert_before(id, Insn::Call(crate::ir::CallKind::Static, hook.clone()))
                    .ok_or_else(|| Error::validation("literal vanished mid-rewrite".to_owned()))?;
                body.instructions.insert_before(anchor, Insn::Const(value));
                if let Some(pop) = discard {
                    body.instructions.insert_before(id, Insn::Simple(pop));
                }
            }
            _ => {}
        }
    }
    body.recompute_maxima();
    Ok(())
}

/// Widen a slot's declared type, rewriting every load and store of that slot
///
/// The widened value permanently consumes the next slot index too, so one
/// extra slot is inserted right behind it and everything above shifts. A
/// conversion is emitted before each widened store; increments are lowered
/// to an explicit load/add/store over the widened type.
fn widen_slot(
    body: &mut MethodBody,
    selector: &SlotSelector,
    widen_to: BaseType,
) -> Result<(), Error> {
    let slot = resolve_slot(body, selector)?;
    let (narrow_kind, wide_kind, convert) = match widen_to {
        BaseType::Long => (SlotKind::Int, SlotKind::Long, Op::I2L),
        BaseType::Double => (SlotKind::Float, SlotKind::Double, Op::F2D),
        other => {
            return Err(Error::validation(format!(
                "cannot widen to {:?}; only long and double are wide",
                other
            )))
        }
    };

    // Open up the second slot of the pair before rewriting references
    insert_slots(body, slot + 1, 1);

    let targets: Vec<InsnId> = body
        .instructions
        .iter()
        .filter(|node| node.insn.slot_ref() == Some(slot))
        .map(|node| node.id)
        .collect();

    for id in targets {
        match body.instructions.get(id).cloned() {
            Some(Insn::Load(kind, _)) if kind == narrow_kind => {
                body.instructions.replace(id, Insn::Load(wide_kind, slot));
            }
            Some(Insn::Store(kind, _)) if kind == narrow_kind => {
                body.instructions.replace(id, Insn::Store(wide_kind, slot));
                body.instructions.insert_before(id, Insn::Simple(convert));
            }
            Some(Insn::Inc { delta, .. }) => {
                let (step, add) = match wide_kind {
                    SlotKind::Double => (ConstValue::Double(delta as f64), Op::DAdd),
                    _ => (ConstValue::Long(delta as i64), Op::LAdd),
                };
                body.instructions.replace(id, Insn::Load(wide_kind, slot));
                let mut anchor = id;
                for insn in [
                    Insn::Const(step),
                    Insn::Simple(add),
                    Insn::Store(wide_kind, slot),
                ] {
                    anchor = body
                        .instructions
                        .insert_after(anchor, insn)
                        .ok_or_else(|| {
                            Error::validation("increment vanished mid-rewrite".to_owned())
                        })?;
                }
            }
            _ => {}
        }
    }

    for entry in &mut body.slot_table {
        if entry.index == slot {
            entry.ty = FieldType::Base(widen_to);
        }
    }
    body.recompute_maxima();
    Ok(())
}

/// Extend the selected slot's debug range to cover the whole method
fn extend_scope(body: &mut MethodBody, selector: &SlotSelector) -> Result<(), Error> {
    let slot = resolve_slot(body, selector)?;
    let start = body.start_label();
    let end = body.end_label();
    let mut touched = false;
    for entry in &mut body.slot_table {
        if entry.index == slot {
            entry.start = start;
            entry.end = end;
            touched = true;
        }
    }
    if touched {
        Ok(())
    } else {
        Err(Error::target_not_found(format!(
            "slot table entry for index {}",
            slot
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::requests::MethodTarget;
    use crate::ir::{MemberRef, SlotEntry};
    use crate::jvm::{
        BinaryName, MethodAccessFlags, MethodDescriptor, Name, UnqualifiedName,
    };

    fn subject_class() -> ClassBody {
        let mut class = ClassBody::new(BinaryName::from_string("acme/M".to_owned()).unwrap());
        let mut body = MethodBody::new(
            UnqualifiedName::from_string("subject".to_owned()).unwrap(),
            MethodAccessFlags::STATIC,
            MethodDescriptor {
                parameters: vec![FieldType::int()],
                return_type: Some(FieldType::int()),
            },
        );
        let start = body.instructions.fresh_label();
        let end = body.instructions.fresh_label();
        body.instructions.push(Insn::Label(start));
        body.instructions.push(Insn::Const(ConstValue::Int(3)));
        body.instructions.push(Insn::Store(SlotKind::Int, 1));
        body.instructions.push(Insn::Load(SlotKind::Int, 1));
        body.instructions.push(Insn::Label(end));
        body.instructions.push(Insn::Simple(Op::IReturn));
        body.slot_table.push(SlotEntry {
            name: "scratch".to_owned(),
            ty: FieldType::int(),
            start,
            end,
            index: 1,
        });
        body.recompute_maxima();
        class.methods.push(body);
        class
    }

    fn hook() -> MemberRef {
        MemberRef {
            class: BinaryName::from_string("acme/Hooks".to_owned()).unwrap(),
            name: UnqualifiedName::from_string("onInt".to_owned()).unwrap(),
            descriptor: MethodDescriptor {
                parameters: vec![FieldType::int()],
                return_type: None,
            },
        }
    }

    #[test]
    fn value_mode_inserts_hook_before_each_store() {
        let mut class = subject_class();
        let request = ModifyRequest {
            target: MethodTarget::named(
                UnqualifiedName::from_string("subject".to_owned()).unwrap(),
            ),
            mode: ModifyMode::Value {
                slot: Some(SlotSelector::Named("scratch".to_owned())),
                literal: None,
                hook: hook(),
            },
            hot_reload: false,
        };
        apply(&mut class, &request).unwrap();
        let insns: Vec<Insn> = class.methods[0].instructions.insns().cloned().collect();
        let store_at = insns
            .iter()
            .position(|insn| matches!(insn, Insn::Store(SlotKind::Int, 1)))
            .unwrap();
        assert_eq!(insns[store_at - 2], Insn::Simple(Op::Dup));
        assert!(matches!(insns[store_at - 1], Insn::Call(_, _)));
    }

    #[test]
    fn value_mode_discards_a_non_void_hook_result() {
        let mut class = subject_class();
        let mut non_void = hook();
        non_void.descriptor.return_type = Some(FieldType::int());
        let request = ModifyRequest {
            target: MethodTarget::named(
                UnqualifiedName::from_string("subject".to_owned()).unwrap(),
            ),
            mode: ModifyMode::Value {
                slot: Some(SlotSelector::Named("scratch".to_owned())),
                literal: None,
                hook: non_void,
            },
            hot_reload: false,
        };
        apply(&mut class, &request).unwrap();
        let insns: Vec<Insn> = class.methods[0].instructions.insns().cloned().collect();
        let store_at = insns
            .iter()
            .position(|insn| matches!(insn, Insn::Store(SlotKind::Int, 1)))
            .unwrap();
        // dup, call, pop of the hook result, then the original store
        assert_eq!(insns[store_at - 3], Insn::Simple(Op::Dup));
        assert!(matches!(insns[store_at - 2], Insn::Call(_, _)));
        assert_eq!(insns[store_at - 1], Insn::Simple(Op::Pop));
    }

    #[test]
    fn widening_rewrites_loads_stores_and_consumes_a_pair() {
        let mut class = subject_class();
        let request = ModifyRequest {
            target: MethodTarget::named(
                UnqualifiedName::from_string("subject".to_owned()).unwrap(),
            ),
            mode: ModifyMode::Type {
                slot: SlotSelector::Index(1),
                widen_to: BaseType::Long,
            },
            hot_reload: false,
        };
        apply(&mut class, &request).unwrap();
        let body = &class.methods[0];
        let insns: Vec<Insn> = body.instructions.insns().cloned().collect();
        assert!(insns.contains(&Insn::Store(SlotKind::Long, 1)));
        assert!(insns.contains(&Insn::Load(SlotKind::Long, 1)));
        assert!(insns.contains(&Insn::Simple(Op::I2L)));
        assert_eq!(body.slot_table[0].ty, FieldType::long());
        assert!(body.max_slots >= 3);
    }

    #[test]
    fn lifetime_mode_records_a_promotion_marker() {
        let mut class = subject_class();
        let request = ModifyRequest {
            target: MethodTarget::named(
                UnqualifiedName::from_string("subject".to_owned()).unwrap(),
            ),
            mode: ModifyMode::Lifetime {
                slot: SlotSelector::Named("scratch".to_owned()),
            },
            hot_reload: false,
        };
        apply(&mut class, &request).unwrap();
        assert_eq!(class.promotions.len(), 1);
        assert_eq!(class.promotions[0].slot, 1);
        // The method body itself is untouched by the method-level pass
        assert_eq!(class.methods[0].instructions.len(), 6);
    }
}
