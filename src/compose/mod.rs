//! Stage composer: stacks independent wrap layers on one method
//!
//! A method under composition is a chain of stages: the innermost stage is
//! the original body (**Terminal**), and each outer layer (**Wrapper**) is
//! one independently declared wrap request with a handler and the shares it
//! needs threaded through. Composing the chain produces the final body for
//! the public-facing method plus one moved private method per wrapper layer.
//!
//! Shares are deduplicated by declaration identity, never by structural
//! equality: two layers thread "the same" share only when they hold the same
//! [`Share`] allocation. After composition the number of distinct shares
//! equals the number of distinct identities ever unioned across the chain.

use crate::errors::Error;
use crate::ir::{
    insert_slots, ClassBody, ConstValue, Insn, MemberRef, MethodBody, Op, SlotKind,
};
use crate::jvm::{FieldType, MethodAccessFlags, UnqualifiedName};
use crate::util::Width;
use log::debug;
use std::sync::Arc;

/// A value declared by one wrap layer and threaded through every other layer
///
/// The initializer is an instruction sequence that leaves exactly one value
/// of `ty` on the stack; it must not contain labels.
#[derive(Debug)]
pub struct ShareDecl {
    pub name: UnqualifiedName,
    pub ty: FieldType,
    pub initializer: Vec<Insn>,
}

/// Handle to a share declaration; identity (not structure) is what gets
/// deduplicated
pub type Share = Arc<ShareDecl>;

/// One link in the wrap-composition chain
pub enum Stage {
    /// The original method body
    Terminal(MethodBody),

    /// One wrap layer: an inner stage, a handler, and the shares this layer
    /// wants threaded
    Wrapper {
        inner: Box<Stage>,
        handler: MemberRef,
        shares: Vec<Share>,
    },
}

impl Stage {
    pub fn terminal(body: MethodBody) -> Stage {
        Stage::Terminal(body)
    }

    /// Stack one more wrap layer outside this stage
    pub fn wrap(self, handler: MemberRef, shares: Vec<Share>) -> Stage {
        Stage::Wrapper {
            inner: Box::new(self),
            handler,
            shares,
        }
    }

    /// Compose the chain from the innermost body outward
    ///
    /// Returns the finished public-facing body; every wrapper layer leaves
    /// its moved inner method behind on `class`.
    pub fn apply(self, class: &mut ClassBody) -> Result<MethodBody, Error> {
        let mut gathered: Vec<Share> = vec![];
        self.apply_inner(class, &mut gathered)
    }

    /// Invariant on return: the produced body's descriptor is the original
    /// descriptor plus the share set as gathered *on entry* to this stage,
    /// appended as trailing parameters.
    fn apply_inner(self, class: &mut ClassBody, gathered: &mut Vec<Share>) -> Result<MethodBody, Error> {
        match self {
            Stage::Terminal(body) => retrofit_terminal(body, gathered),
            Stage::Wrapper {
                inner,
                handler,
                shares,
            } => {
                // Union this layer's shares, remembering what is new here
                let outer_count = gathered.len();
                let new_here: Vec<Share> = shares
                    .into_iter()
                    .filter(|share| !gathered.iter().any(|seen| Arc::ptr_eq(seen, share)))
                    .collect();
                gathered.extend(new_here.iter().cloned());

                let inner_body = inner.apply_inner(class, gathered)?;
                emit_wrapper_layer(
                    class,
                    inner_body,
                    handler,
                    &gathered[..outer_count],
                    &new_here,
                )
            }
        }
    }
}

/// Retrofit the original body to accept every gathered share as a trailing
/// parameter
///
/// Any share-initializer code speculatively embedded in the body is stripped
/// (the value now arrives as a parameter), the share types are appended to
/// the descriptor, and exactly enough slots are inserted immediately after
/// the last real argument slot, renumbering every pre-existing local
/// reference above that point.
fn retrofit_terminal(mut body: MethodBody, gathered: &[Share]) -> Result<MethodBody, Error> {
    for share in gathered {
        strip_initializer_window(&mut body, share);
    }

    let insert_at = body.args_width();
    let share_width: u16 = gathered.iter().map(|share| share.ty.width() as u16).sum();
    insert_slots(&mut body, insert_at, share_width);

    let start = body.start_label();
    let end = body.end_label();
    let mut slot = insert_at;
    for share in gathered {
        body.descriptor.parameters.push(share.ty.clone());
        body.slot_table.push(crate::ir::SlotEntry {
            name: share.name.as_ref().to_owned(),
            ty: share.ty.clone(),
            start,
            end,
            index: slot,
        });
        slot += share.ty.width() as u16;
    }
    Ok(body)
}

/// Remove a speculatively embedded `initializer ; store` window for `share`,
/// if the body carries one
fn strip_initializer_window(body: &mut MethodBody, share: &ShareDecl) {
    if share.initializer.is_empty() {
        return;
    }
    let window = share.initializer.len();
    let nodes = body.instructions.nodes();
    let found = (0..nodes.len().saturating_sub(window)).find(|&at| {
        let matches = nodes[at..at + window]
            .iter()
            .zip(&share.initializer)
            .all(|(node, insn)| node.insn == *insn);
        matches
            && matches!(
                nodes[at + window].insn,
                Insn::Store(kind, _) if kind == SlotKind::of(&share.ty)
            )
    });
    if let Some(at) = found {
        debug!("stripping embedded initializer for share '{:?}'", share.name);
        body.instructions.drain_window(at, at + window);
    }
}

/// Build one wrapper layer: move the finished inner body aside and fill the
/// vacated shell with glue code around the layer handler
///
/// The handler receives the moved method as a method-handle constant (the
/// operation abstraction: it decides whether and when to invoke the inner
/// computation), followed by the receiver (for instance methods), the
/// original arguments, and the full accumulated share set. Shares newly
/// introduced at this layer are allocated here, exactly once, by running
/// their initializers into fresh glue slots; the trailing parameters this
/// layer introduced are absent from the shell signature and threaded only at
/// the call site.
fn emit_wrapper_layer(
    class: &mut ClassBody,
    inner_body: MethodBody,
    handler: MemberRef,
    outer_shares: &[Share],
    new_shares: &[Share],
) -> Result<MethodBody, Error> {
    let original_name = inner_body.name.clone();
    let original_access = inner_body.access;
    let is_static = inner_body.is_static();
    let return_type = inner_body.descriptor.return_type.clone();

    // Shell signature: original parameters plus the shares gathered outside
    // this layer. The inner body's descriptor always ends with this layer's
    // newly-introduced shares, so stripping is dropping that suffix.
    let total_params = inner_body.descriptor.parameters.len();
    let stripped = total_params - new_shares.len();
    let shell_parameters: Vec<FieldType> =
        inner_body.descriptor.parameters[..stripped].to_vec();

    // Move the inner body to a collision-free synthetic private method,
    // dropping debug slot entries tied to the old method identity
    let moved_name = class.synthetic_name(&original_name);
    let mut moved = inner_body;
    moved.name = moved_name.clone();
    moved.access = (moved.access
        & !(MethodAccessFlags::PUBLIC | MethodAccessFlags::PROTECTED))
        | MethodAccessFlags::PRIVATE
        | MethodAccessFlags::SYNTHETIC;
    moved.slot_table.clear();
    let moved_ref = MemberRef {
        class: class.name.clone(),
        name: moved_name,
        descriptor: moved.descriptor.clone(),
    };
    class.methods.push(moved);

    // The vacated shell receives this layer's glue code
    let mut shell = MethodBody::new(
        original_name,
        original_access,
        crate::jvm::MethodDescriptor {
            parameters: shell_parameters,
            return_type: return_type.clone(),
        },
    );

    // Allocate every share newly introduced at this layer
    let mut glue_slot = shell.args_width();
    let mut new_share_slots: Vec<(u16, SlotKind)> = vec![];
    for share in new_shares {
        let kind = SlotKind::of(&share.ty);
        shell.instructions.push_all(share.initializer.iter().cloned());
        shell.instructions.push(Insn::Store(kind, glue_slot));
        new_share_slots.push((glue_slot, kind));
        glue_slot += share.ty.width() as u16;
    }

    // The operation abstraction: a capturable handle to the moved method
    shell
        .instructions
        .push(Insn::Const(ConstValue::Handle(moved_ref)));

    // Receiver and original arguments
    let mut slot = 0;
    if !is_static {
        shell.instructions.push(Insn::Load(SlotKind::Ref, slot));
        slot += 1;
    }
    let original_param_count = shell.descriptor.parameters.len() - outer_shares.len();
    for parameter in &shell.descriptor.parameters[..original_param_count] {
        let kind = SlotKind::of(parameter);
        shell.instructions.push(Insn::Load(kind, slot));
        slot += parameter.width() as u16;
    }

    // Full accumulated share set: outer shares arrive as shell parameters,
    // new shares come from the glue slots above
    for share in outer_shares {
        let kind = SlotKind::of(&share.ty);
        shell.instructions.push(Insn::Load(kind, slot));
        slot += share.ty.width() as u16;
    }
    for (glue, kind) in &new_share_slots {
        shell.instructions.push(Insn::Load(*kind, *glue));
    }

    shell
        .instructions
        .push(Insn::Call(crate::ir::CallKind::Static, handler.clone()));

    emit_coerced_return(&mut shell, handler.descriptor.return_type.as_ref(), return_type.as_ref());
    shell.recompute_maxima();
    Ok(shell)
}

/// Coerce the handler's return value to the method's declared return type
/// when covariant, then return it
fn emit_coerced_return(
    shell: &mut MethodBody,
    handler_return: Option<&FieldType>,
    declared: Option<&FieldType>,
) {
    use crate::jvm::BaseType;
    match (handler_return, declared) {
        (_, None) => {
            // Discard whatever the handler produced
            if let Some(produced) = handler_return {
                let pop = if produced.width() == 2 { Op::Pop2 } else { Op::Pop };
                shell.instructions.push(Insn::Simple(pop));
            }
            shell.instructions.push(Insn::Simple(Op::Return));
        }
        (Some(produced), Some(wanted)) => {
            if produced != wanted && produced.is_reference() && wanted.is_reference() {
                if let FieldType::Object(class) = wanted {
                    shell
                        .instructions
                        .push(Insn::Type(crate::ir::TypeOp::CheckCast, class.clone()));
                }
            } else if produced == &FieldType::Base(BaseType::Int)
                && wanted == &FieldType::Base(BaseType::Long)
            {
                shell.instructions.push(Insn::Simple(Op::I2L));
            }
            shell.instructions.push(Insn::Simple(return_op(wanted)));
        }
        (None, Some(wanted)) => {
            // Handler is void but the method is not: surface a null/zero
            shell.instructions.push(Insn::Const(zero_of(wanted)));
            shell.instructions.push(Insn::Simple(return_op(wanted)));
        }
    }
}

pub(crate) fn return_op(ty: &FieldType) -> Op {
    match SlotKind::of(ty) {
        SlotKind::Int => Op::IReturn,
        SlotKind::Long => Op::LReturn,
        SlotKind::Float => Op::FReturn,
        SlotKind::Double => Op::DReturn,
        SlotKind::Ref => Op::AReturn,
    }
}

pub(crate) fn zero_of(ty: &FieldType) -> ConstValue {
    match SlotKind::of(ty) {
        SlotKind::Int => ConstValue::Int(0),
        SlotKind::Long => ConstValue::Long(0),
        SlotKind::Float => ConstValue::Float(0.0),
        SlotKind::Double => ConstValue::Double(0.0),
        SlotKind::Ref => ConstValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvm::{BinaryName, MethodDescriptor, Name};

    fn handler(name: &str, parameters: Vec<FieldType>, ret: Option<FieldType>) -> MemberRef {
        MemberRef {
            class: BinaryName::from_string("acme/Handlers".to_owned()).unwrap(),
            name: UnqualifiedName::from_string(name.to_owned()).unwrap(),
            descriptor: MethodDescriptor {
                parameters,
                return_type: ret,
            },
        }
    }

    fn original() -> MethodBody {
        let mut body = MethodBody::new(
            UnqualifiedName::from_string("compute".to_owned()).unwrap(),
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            MethodDescriptor {
                parameters: vec![FieldType::int()],
                return_type: Some(FieldType::int()),
            },
        );
        body.instructions.push(Insn::Load(SlotKind::Int, 0));
        body.instructions.push(Insn::Simple(Op::IReturn));
        body.recompute_maxima();
        body
    }

    fn share(name: &str) -> Share {
        Arc::new(ShareDecl {
            name: UnqualifiedName::from_string(name.to_owned()).unwrap(),
            ty: FieldType::int(),
            initializer: vec![Insn::Const(ConstValue::Int(0))],
        })
    }

    fn count_allocations(class: &ClassBody, shell: &MethodBody) -> usize {
        // A share allocation is an initializer followed by a store in glue
        // code; gathered shares never re-run initializers elsewhere
        std::iter::once(shell)
            .chain(class.methods.iter())
            .map(|method| {
                method
                    .instructions
                    .insns()
                    .zip(method.instructions.insns().skip(1))
                    .filter(|(a, b)| {
                        matches!(a, Insn::Const(ConstValue::Int(0)))
                            && matches!(b, Insn::Store(SlotKind::Int, _))
                    })
                    .count()
            })
            .sum()
    }

    #[test]
    fn identical_share_is_allocated_once() {
        let mut class = ClassBody::new(BinaryName::from_string("acme/Subject".to_owned()).unwrap());
        let a = share("a");
        let b = share("b");

        let chain = Stage::terminal(original())
            .wrap(
                handler("innerLayer", vec![], Some(FieldType::int())),
                vec![Arc::clone(&a), Arc::clone(&b)],
            )
            .wrap(
                handler("outerLayer", vec![], Some(FieldType::int())),
                vec![Arc::clone(&a)],
            );
        let shell = chain.apply(&mut class).unwrap();

        assert_eq!(count_allocations(&class, &shell), 2);
        // Terminal received both shares as trailing parameters
        let terminal = class
            .methods
            .iter()
            .find(|method| method.descriptor.parameters.len() == 3)
            .expect("retrofitted terminal");
        assert_eq!(terminal.descriptor.parameters[1], FieldType::int());
        assert_eq!(terminal.descriptor.parameters[2], FieldType::int());
        // The public-facing shell keeps the original signature
        assert_eq!(shell.descriptor.parameters.len(), 1);
    }

    #[test]
    fn terminal_renumbers_locals_above_the_arguments() {
        let mut class = ClassBody::new(BinaryName::from_string("acme/Subject".to_owned()).unwrap());
        let mut body = original();
        // A scratch local above the argument slots
        body.instructions.insert_all_at(
            0,
            [
                Insn::Const(ConstValue::Int(7)),
                Insn::Store(SlotKind::Int, 1),
            ],
        );
        body.recompute_maxima();

        let chain = Stage::terminal(body).wrap(
            handler("layer", vec![], Some(FieldType::int())),
            vec![share("s")],
        );
        chain.apply(&mut class).unwrap();

        let terminal = class
            .methods
            .iter()
            .find(|method| method.descriptor.parameters.len() == 2)
            .expect("retrofitted terminal");
        // Share landed in slot 1, the scratch local moved to slot 2
        let stores: Vec<u16> = terminal
            .instructions
            .insns()
            .filter_map(|insn| match insn {
                Insn::Store(_, slot) => Some(*slot),
                _ => None,
            })
            .collect();
        assert_eq!(stores, vec![2]);
    }
}
