//! Slice: surgery on a contiguous, self-contained range of a method body

use super::requests::{SliceMode, SliceRequest};
use crate::errors::Error;
use crate::ir::{
    copy_range, extract_range, remove_range, resolve_boundary, CallKind, ClassBody, Insn,
    InsnList, LabelId, MemberRef, MethodBody, Op,
};
use crate::jvm::{MethodAccessFlags, MethodDescriptor, UnqualifiedName};
use std::collections::HashMap;

pub fn apply(class: &mut ClassBody, request: &SliceRequest) -> Result<(), Error> {
    let index = class
        .find_method(&request.target.name, request.target.descriptor.as_ref())
        .ok_or_else(|| Error::target_not_found(format!("{:?}", request.target.name)))?;

    let (start, end) = resolve_boundary(&class.methods[index].instructions, &request.boundary)?;

    match request.mode {
        SliceMode::Remove => {
            remove_range(&mut class.methods[index].instructions, start, end)?;
            class.methods[index].recompute_maxima();
            Ok(())
        }
        SliceMode::Replace => {
            let replacement = request.replacement.clone().ok_or_else(|| {
                Error::validation("replace slice carries no replacement instructions".to_owned())
            })?;
            let body = &mut class.methods[index];
            let at = body
                .instructions
                .index_of(start)
                .ok_or_else(|| Error::boundary_unresolved(format!("node {:?}", start)))?;
            remove_range(&mut body.instructions, start, end)?;
            body.instructions.insert_all_at(at, replacement);
            body.recompute_maxima();
            Ok(())
        }
        SliceMode::Extract => {
            let destination = destination_name(request)?;
            let body = &mut class.methods[index];
            let at = body
                .instructions
                .index_of(start)
                .ok_or_else(|| Error::boundary_unresolved(format!("node {:?}", start)))?;
            let fragment = extract_range(&mut body.instructions, start, end)?;

            let helper = fragment_method(destination, fragment);
            // The extraction site calls the helper in place of the fragment
            let call = Insn::Call(
                CallKind::Static,
                MemberRef {
                    class: class.name.clone(),
                    name: helper.name.clone(),
                    descriptor: helper.descriptor.clone(),
                },
            );
            let body = &mut class.methods[index];
            body.instructions.insert_all_at(at, [call]);
            body.recompute_maxima();
            class.methods.push(helper);
            Ok(())
        }
        SliceMode::Copy => {
            let destination = destination_name(request)?;
            let fragment = copy_range(&class.methods[index].instructions, start, end)?;
            class.methods.push(fragment_method(destination, fragment));
            Ok(())
        }
        SliceMode::Move => {
            let destination = request.destination.clone().ok_or_else(|| {
                Error::validation("move slice names no destination method".to_owned())
            })?;
            let dest_index = class
                .find_method(&destination, None)
                .ok_or_else(|| Error::target_not_found(format!("{:?}", destination)))?;
            let fragment =
                extract_range(&mut class.methods[index].instructions, start, end)?;
            class.methods[index].recompute_maxima();

            let dest = &mut class.methods[dest_index];
            splice_before_return(&mut dest.instructions, &fragment)?;
            dest.recompute_maxima();
            Ok(())
        }
    }
}

fn destination_name(request: &SliceRequest) -> Result<UnqualifiedName, Error> {
    request
        .destination
        .clone()
        .ok_or_else(|| Error::validation("slice names no destination method".to_owned()))
}

/// Wrap an extracted fragment in a private static helper
///
/// The fragment must already be slot-self-contained; the helper takes no
/// arguments and returns nothing.
fn fragment_method(name: UnqualifiedName, fragment: InsnList) -> MethodBody {
    let mut body = MethodBody::new(
        name,
        MethodAccessFlags::PRIVATE | MethodAccessFlags::STATIC | MethodAccessFlags::SYNTHETIC,
        MethodDescriptor {
            parameters: vec![],
            return_type: None,
        },
    );
    body.instructions = fragment;
    body.instructions.push(Insn::Simple(Op::Return));
    body.recompute_maxima();
    body
}

/// Append the fragment into the destination list with fresh labels, just
/// ahead of a trailing return when the destination has one
fn splice_before_return(dest: &mut InsnList, fragment: &InsnList) -> Result<(), Error> {
    let mut labels: HashMap<LabelId, LabelId> = HashMap::new();
    for node in fragment.iter() {
        if let Insn::Label(label) = node.insn {
            labels.insert(label, dest.fresh_label());
        }
    }

    let mut remapped = Vec::with_capacity(fragment.len());
    for node in fragment.iter() {
        let insn = match &node.insn {
            Insn::Label(label) => Insn::Label(labels[label]),
            Insn::Jump(cond, target) => {
                let target = *labels.get(target).ok_or_else(|| {
                    Error::validation(format!("moved jump target {:?} is dangling", target))
                })?;
                Insn::Jump(*cond, target)
            }
            other => other.clone(),
        };
        remapped.push(insn);
    }

    let at = match dest.nodes().last().map(|node| &node.insn) {
        Some(Insn::Simple(
            Op::Return | Op::IReturn | Op::LReturn | Op::FReturn | Op::DReturn | Op::AReturn,
        )) => dest.len() - 1,
        _ => dest.len(),
    };
    dest.insert_all_at(at, remapped);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::requests::MethodTarget;
    use crate::ir::{Boundary, ConstValue};
    use crate::jvm::{BinaryName, Name};

    fn class_with_marked_body() -> ClassBody {
        let mut class = ClassBody::new(BinaryName::from_string("acme/S".to_owned()).unwrap());
        let mut body = MethodBody::new(
            UnqualifiedName::from_string("subject".to_owned()).unwrap(),
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            MethodDescriptor {
                parameters: vec![],
                return_type: None,
            },
        );
        body.instructions.push(Insn::Line(10));
        body.instructions.push(Insn::Simple(Op::Nop));
        body.instructions.push(Insn::Line(20));
        body.instructions.push(Insn::Const(ConstValue::Int(1)));
        body.instructions.push(Insn::Simple(Op::Pop));
        body.instructions.push(Insn::Line(30));
        body.instructions.push(Insn::Simple(Op::Return));
        body.recompute_maxima();
        class.methods.push(body);
        class
    }

    fn request(mode: SliceMode) -> SliceRequest {
        SliceRequest {
            target: MethodTarget::named(
                UnqualifiedName::from_string("subject".to_owned()).unwrap(),
            ),
            boundary: Boundary::Lines { start: 20, end: 20 },
            mode,
            destination: Some(UnqualifiedName::from_string("carved".to_owned()).unwrap()),
            replacement: None,
            hot_reload: false,
        }
    }

    #[test]
    fn extract_carves_a_helper_and_leaves_a_call() {
        let mut class = class_with_marked_body();
        apply(&mut class, &request(SliceMode::Extract)).unwrap();

        assert_eq!(class.methods.len(), 2);
        let helper = &class.methods[1];
        assert_eq!(helper.name.as_ref(), "carved");
        // line marker, const, pop, synthesized return
        assert_eq!(helper.instructions.len(), 4);

        let subject: Vec<Insn> = class.methods[0].instructions.insns().cloned().collect();
        assert!(subject
            .iter()
            .any(|insn| matches!(insn, Insn::Call(_, member) if member.name.as_ref() == "carved")));
        assert!(!subject.contains(&Insn::Const(ConstValue::Int(1))));
    }

    #[test]
    fn replace_swaps_the_range_for_the_replacement() {
        let mut class = class_with_marked_body();
        let mut req = request(SliceMode::Replace);
        req.replacement = Some(vec![Insn::Simple(Op::Nop), Insn::Simple(Op::Nop)]);
        apply(&mut class, &req).unwrap();

        let subject: Vec<Insn> = class.methods[0].instructions.insns().cloned().collect();
        assert!(!subject.contains(&Insn::Const(ConstValue::Int(1))));
        assert_eq!(
            subject.iter().filter(|insn| **insn == Insn::Simple(Op::Nop)).count(),
            3
        );
    }

    #[test]
    fn copy_leaves_the_source_intact() {
        let mut class = class_with_marked_body();
        let before = class.methods[0].instructions.len();
        apply(&mut class, &request(SliceMode::Copy)).unwrap();
        assert_eq!(class.methods[0].instructions.len(), before);
        assert_eq!(class.methods[1].name.as_ref(), "carved");
    }

    #[test]
    fn move_into_missing_destination_is_an_error() {
        let mut class = class_with_marked_body();
        let mut req = request(SliceMode::Move);
        req.destination =
            Some(UnqualifiedName::from_string("nowhere".to_owned()).unwrap());
        assert!(matches!(
            apply(&mut class, &req),
            Err(Error::TargetNotFound { .. })
        ));
    }
}
