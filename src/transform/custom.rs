//! Custom: run a user callback over one method body, transactionally

use super::requests::{CustomTransform, MethodTarget};
use super::validate;
use crate::errors::Error;
use crate::ir::ClassBody;

/// Hand the target body to the callback; if the callback fails, or leaves
/// the body structurally broken, the class is restored to its pre-call state
pub fn apply(
    class: &mut ClassBody,
    target: &MethodTarget,
    transform: &dyn CustomTransform,
) -> Result<(), Error> {
    let index = class
        .find_method(&target.name, target.descriptor.as_ref())
        .ok_or_else(|| Error::target_not_found(format!("{:?}", target.name)))?;

    let snapshot = class.clone();
    // The body is taken out of the class so the callback can mutate both
    let mut body = class.methods.remove(index);

    match transform.transform(class, &mut body) {
        Ok(()) => {
            body.recompute_maxima();
            if let Err(cause) = validate::check_body(&body) {
                *class = snapshot;
                return Err(Error::validation_caused_by(
                    format!("custom transform left {:?} malformed", target.name),
                    cause,
                ));
            }
            class.methods.insert(index, body);
            Ok(())
        }
        Err(cause) => {
            *class = snapshot;
            Err(cause.with_context(format!("custom transform over {:?}", target.name)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ConstValue, Insn, JumpCond, MethodBody, Op};
    use crate::jvm::{
        BinaryName, FieldType, MethodAccessFlags, MethodDescriptor, Name, UnqualifiedName,
    };

    fn subject_class() -> ClassBody {
        let mut class = ClassBody::new(BinaryName::from_string("acme/C".to_owned()).unwrap());
        let mut body = MethodBody::new(
            UnqualifiedName::from_string("subject".to_owned()).unwrap(),
            MethodAccessFlags::STATIC,
            MethodDescriptor {
                parameters: vec![],
                return_type: Some(FieldType::int()),
            },
        );
        body.instructions.push(Insn::Const(ConstValue::Int(1)));
        body.instructions.push(Insn::Simple(Op::IReturn));
        body.recompute_maxima();
        class.methods.push(body);
        class
    }

    fn target() -> MethodTarget {
        MethodTarget::named(UnqualifiedName::from_string("subject".to_owned()).unwrap())
    }

    #[test]
    fn successful_callback_mutations_stick() {
        let mut class = subject_class();
        let callback = |_class: &mut ClassBody, body: &mut MethodBody| {
            let first = body.instructions.id_at(0).unwrap();
            body.instructions.replace(first, Insn::Const(ConstValue::Int(42)));
            Ok(())
        };
        apply(&mut class, &target(), &callback).unwrap();
        let insns: Vec<Insn> = class.methods[0].instructions.insns().cloned().collect();
        assert_eq!(insns[0], Insn::Const(ConstValue::Int(42)));
    }

    #[test]
    fn failing_callback_rolls_everything_back() {
        let mut class = subject_class();
        let callback = |class: &mut ClassBody, body: &mut MethodBody| {
            // Mutations made before the failure must not survive
            class.interfaces.push(BinaryName::OBJECT);
            let first = body.instructions.id_at(0).unwrap();
            body.instructions.replace(first, Insn::Const(ConstValue::Int(99)));
            Err(Error::validation("deliberate failure".to_owned()))
        };
        assert!(apply(&mut class, &target(), &callback).is_err());
        assert!(class.interfaces.is_empty());
        let insns: Vec<Insn> = class.methods[0].instructions.insns().cloned().collect();
        assert_eq!(insns[0], Insn::Const(ConstValue::Int(1)));
    }

    #[test]
    fn structurally_broken_result_is_rolled_back() {
        let mut class = subject_class();
        let callback = |_class: &mut ClassBody, body: &mut MethodBody| {
            let dangling = body.instructions.fresh_label();
            let first = body.instructions.id_at(0).unwrap();
            body.instructions
                .insert_before(first, Insn::Jump(JumpCond::Goto, dangling));
            Ok(())
        };
        let err = apply(&mut class, &target(), &callback);
        assert!(matches!(err, Err(Error::ValidationFailure { .. })));
        assert_eq!(class.methods[0].instructions.len(), 2);
    }
}
