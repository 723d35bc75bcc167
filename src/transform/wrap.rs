//! Wrap: back up the original method and synthesize a body that calls the
//! wrapper handler and the backup in the requested order

use super::requests::{WrapPosition, WrapRequest};
use crate::compose::return_op;
use crate::errors::Error;
use crate::ir::{clone_body, CallKind, ClassBody, Insn, MemberRef, MethodBody, Op, SlotKind};
use crate::jvm::MethodAccessFlags;
use crate::util::Width;

pub fn apply(class: &mut ClassBody, request: &WrapRequest) -> Result<(), Error> {
    let index = class
        .find_method(&request.target.name, request.target.descriptor.as_ref())
        .ok_or_else(|| Error::target_not_found(format!("{:?}", request.target.name)))?;

    // Rename the original to a collision-free synthetic backup
    let backup_name = class.synthetic_name(&request.target.name);
    let original = &mut class.methods[index];
    let original_name = original.name.clone();
    let original_access = original.access;
    let descriptor = original.descriptor.clone();
    original.name = backup_name.clone();
    original.access = (original.access
        & !(MethodAccessFlags::PUBLIC | MethodAccessFlags::PROTECTED))
        | MethodAccessFlags::PRIVATE
        | MethodAccessFlags::SYNTHETIC;
    let is_static = original.is_static();

    let backup = MemberRef {
        class: class.name.clone(),
        name: backup_name,
        descriptor: descriptor.clone(),
    };

    let mut replacement = if request.position == WrapPosition::Around {
        // The wrapper's own body is installed verbatim; it is expected to
        // call the backup itself
        let around = request
            .around_body
            .as_ref()
            .ok_or_else(|| Error::target_not_found("around wrapper body".to_owned()))?;
        let (mut body, _) = clone_body(around)?;
        body.name = original_name;
        body.access = original_access;
        body.descriptor = descriptor;
        body
    } else {
        let mut body = MethodBody::new(original_name, original_access, descriptor);
        let before = matches!(
            request.position,
            WrapPosition::Before | WrapPosition::Both
        );
        let after = matches!(request.position, WrapPosition::After | WrapPosition::Both);

        if before {
            load_args(&mut body, is_static);
            call_and_discard(&mut body, &request.handler);
        }

        load_args(&mut body, is_static);
        let call_kind = if is_static {
            CallKind::Static
        } else {
            CallKind::Virtual
        };
        body.instructions
            .push(Insn::Call(call_kind, backup.clone()));

        if after {
            match &body.descriptor.return_type {
                Some(ret) if request.capture => {
                    // Duplicate the result so the handler sees it while the
                    // caller still receives the original value
                    let dup = if ret.width() == 2 { Op::Dup2 } else { Op::Dup };
                    body.instructions.push(Insn::Simple(dup));
                    call_and_discard(&mut body, &request.handler);
                }
                _ => {
                    load_args(&mut body, is_static);
                    call_and_discard(&mut body, &request.handler);
                }
            }
        }

        match body.descriptor.return_type.clone() {
            Some(ret) => body.instructions.push(Insn::Simple(return_op(&ret))),
            None => body.instructions.push(Insn::Simple(Op::Return)),
        };
        body
    };

    replacement.recompute_maxima();
    class.methods.push(replacement);
    Ok(())
}

fn load_args(body: &mut MethodBody, is_static: bool) {
    let mut slot = 0;
    if !is_static {
        body.instructions.push(Insn::Load(SlotKind::Ref, slot));
        slot += 1;
    }
    for parameter in body.descriptor.parameters.clone() {
        let kind = SlotKind::of(&parameter);
        body.instructions.push(Insn::Load(kind, slot));
        slot += parameter.width() as u16;
    }
}

fn call_and_discard(body: &mut MethodBody, handler: &MemberRef) {
    body.instructions
        .push(Insn::Call(CallKind::Static, handler.clone()));
    if let Some(ret) = &handler.descriptor.return_type {
        let pop = if ret.width() == 2 { Op::Pop2 } else { Op::Pop };
        body.instructions.push(Insn::Simple(pop));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::requests::MethodTarget;
    use crate::ir::ConstValue;
    use crate::jvm::{BinaryName, FieldType, MethodDescriptor, Name, UnqualifiedName};

    fn class_with_constant_method() -> ClassBody {
        let mut class = ClassBody::new(BinaryName::from_string("acme/W".to_owned()).unwrap());
        let mut body = MethodBody::new(
            UnqualifiedName::from_string("five".to_owned()).unwrap(),
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            MethodDescriptor {
                parameters: vec![],
                return_type: Some(FieldType::int()),
            },
        );
        body.instructions.push(Insn::Const(ConstValue::Int(5)));
        body.instructions.push(Insn::Simple(Op::IReturn));
        body.recompute_maxima();
        class.methods.push(body);
        class
    }

    fn doubling_handler() -> MemberRef {
        MemberRef {
            class: BinaryName::from_string("acme/Handlers".to_owned()).unwrap(),
            name: UnqualifiedName::from_string("double".to_owned()).unwrap(),
            descriptor: MethodDescriptor {
                parameters: vec![FieldType::int()],
                return_type: Some(FieldType::int()),
            },
        }
    }

    #[test]
    fn after_with_capture_returns_the_original_value() {
        let mut class = class_with_constant_method();
        let request = WrapRequest {
            target: MethodTarget::named(UnqualifiedName::from_string("five".to_owned()).unwrap()),
            position: WrapPosition::After,
            handler: doubling_handler(),
            around_body: None,
            capture: true,
            hot_reload: false,
        };
        apply(&mut class, &request).unwrap();

        assert_eq!(class.methods.len(), 2);
        let backup = &class.methods[0];
        assert!(backup.name.as_ref().starts_with("five$weave"));
        assert!(backup.access.contains(MethodAccessFlags::PRIVATE));

        let shell = &class.methods[1];
        let insns: Vec<Insn> = shell.instructions.insns().cloned().collect();
        // backup call, dup, handler call, pop of handler result, return
        assert!(matches!(&insns[0], Insn::Call(_, member) if member.name == backup.name));
        assert_eq!(insns[1], Insn::Simple(Op::Dup));
        assert!(matches!(&insns[2], Insn::Call(_, member) if member.name.as_ref() == "double"));
        assert_eq!(insns[3], Insn::Simple(Op::Pop));
        assert_eq!(insns[4], Insn::Simple(Op::IReturn));
    }

    #[test]
    fn before_calls_the_handler_first() {
        let mut class = class_with_constant_method();
        let request = WrapRequest {
            target: MethodTarget::named(UnqualifiedName::from_string("five".to_owned()).unwrap()),
            position: WrapPosition::Before,
            handler: MemberRef {
                class: BinaryName::from_string("acme/Handlers".to_owned()).unwrap(),
                name: UnqualifiedName::from_string("observe".to_owned()).unwrap(),
                descriptor: MethodDescriptor {
                    parameters: vec![],
                    return_type: None,
                },
            },
            around_body: None,
            capture: false,
            hot_reload: false,
        };
        apply(&mut class, &request).unwrap();
        let shell = &class.methods[1];
        let insns: Vec<Insn> = shell.instructions.insns().cloned().collect();
        assert!(matches!(&insns[0], Insn::Call(_, member) if member.name.as_ref() == "observe"));
        assert!(matches!(&insns[1], Insn::Call(_, member) if member.name.as_ref() != "observe"));
    }
}
