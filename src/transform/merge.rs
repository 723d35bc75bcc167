//! Merge: rebuild a target method as a dispatcher over several source methods

use super::requests::{ConflictPolicy, MergeRequest, MergeStrategy};
use crate::compose::return_op;
use crate::errors::Error;
use crate::ir::{
    CallKind, ClassBody, ConstValue, Insn, InsnList, MemberRef, Op, SlotKind,
};
use crate::jvm::{BinaryName, FieldType, MethodDescriptor};
use crate::util::Width;
use std::cmp::Reverse;

struct ResolvedSource {
    member: MemberRef,
    priority: i32,
    is_static: bool,
}

pub fn apply(class: &mut ClassBody, request: &MergeRequest) -> Result<(), Error> {
    let index = class
        .find_method(&request.target.name, request.target.descriptor.as_ref())
        .ok_or_else(|| Error::target_not_found(format!("{:?}", request.target.name)))?;
    let descriptor = class.methods[index].descriptor.clone();
    let shell_static = class.methods[index].is_static();

    let mut sources: Vec<ResolvedSource> = Vec::with_capacity(request.sources.len());
    for source in &request.sources {
        match class.find_method(&source.target.name, source.target.descriptor.as_ref()) {
            Some(found) => {
                let method = &class.methods[found];
                if !method.is_static() && shell_static {
                    return Err(Error::validation(format!(
                        "instance source {:?} cannot merge into a static target",
                        method.name
                    )));
                }
                sources.push(ResolvedSource {
                    member: MemberRef {
                        class: class.name.clone(),
                        name: method.name.clone(),
                        descriptor: method.descriptor.clone(),
                    },
                    priority: source.priority,
                    is_static: method.is_static(),
                });
            }
            None => match request.conflict {
                ConflictPolicy::Fail => {
                    return Err(Error::MergeConflict {
                        missing: format!("{:?}", source.target.name),
                        context: Some(format!("merging into {:?}", request.target.name)),
                    })
                }
                ConflictPolicy::Skip => {
                    log::warn!(
                        "merge source {:?} is missing, skipping",
                        source.target.name
                    );
                }
            },
        }
    }
    if sources.is_empty() {
        return Err(Error::validation("merge resolved no sources".to_owned()));
    }

    if request.strategy == MergeStrategy::PriorityBased {
        // Stable, so declaration order breaks priority ties
        sources.sort_by_key(|source| Reverse(source.priority));
    }

    let mut list = InsnList::new();
    match request.strategy {
        MergeStrategy::Sequential | MergeStrategy::PriorityBased => {
            emit_sequential(&mut list, &descriptor, shell_static, &sources)?
        }
        MergeStrategy::Conditional => emit_conditional(
            &mut list,
            &descriptor,
            shell_static,
            &sources,
            request.sentinel.as_ref(),
        )?,
        MergeStrategy::Parallel => emit_parallel(&mut list, &descriptor, &sources)?,
    }

    let body = &mut class.methods[index];
    body.instructions = list;
    body.exception_ranges.clear();
    body.slot_table.clear();
    body.recompute_maxima();
    Ok(())
}

/// Load the shell's receiver (when the source wants one) and parameters
///
/// Parameter slots start after the shell's own receiver slot, which exists
/// whether or not the source being called is static.
fn load_args(
    list: &mut InsnList,
    descriptor: &MethodDescriptor,
    shell_static: bool,
    source_static: bool,
) {
    if !source_static {
        list.push(Insn::Load(SlotKind::Ref, 0));
    }
    let mut slot = u16::from(!shell_static);
    for parameter in &descriptor.parameters {
        list.push(Insn::Load(SlotKind::of(parameter), slot));
        slot += parameter.width() as u16;
    }
}

fn call(list: &mut InsnList, source: &ResolvedSource) {
    let kind = if source.is_static {
        CallKind::Static
    } else {
        CallKind::Virtual
    };
    list.push(Insn::Call(kind, source.member.clone()));
}

/// Call every source in order; only the last value-producing call feeds the
/// return, all other results are discarded
fn emit_sequential(
    list: &mut InsnList,
    descriptor: &MethodDescriptor,
    shell_static: bool,
    sources: &[ResolvedSource],
) -> Result<(), Error> {
    let provider = if descriptor.return_type.is_some() {
        Some(
            sources
                .iter()
                .rposition(|source| source.member.descriptor.return_type.is_some())
                .ok_or_else(|| {
                    Error::validation("no merge source produces the return value".to_owned())
                })?,
        )
    } else {
        None
    };

    for (position, source) in sources.iter().enumerate() {
        load_args(list, descriptor, shell_static, source.is_static);
        call(list, source);
        if let Some(ret) = &source.member.descriptor.return_type {
            if provider != Some(position) {
                let pop = if ret.width() == 2 { Op::Pop2 } else { Op::Pop };
                list.push(Insn::Simple(pop));
            }
        }
    }

    match &descriptor.return_type {
        Some(ret) => list.push(Insn::Simple(return_op(ret))),
        None => list.push(Insn::Simple(Op::Return)),
    };
    Ok(())
}

/// Call sources in order, returning the first result that is not null (for
/// references) or not the sentinel (for int returns)
fn emit_conditional(
    list: &mut InsnList,
    descriptor: &MethodDescriptor,
    shell_static: bool,
    sources: &[ResolvedSource],
    sentinel: Option<&ConstValue>,
) -> Result<(), Error> {
    let ret = descriptor.return_type.as_ref().ok_or_else(|| {
        Error::validation("conditional merge needs a value-returning target".to_owned())
    })?;
    let kind = SlotKind::of(ret);
    let sentinel = match kind {
        SlotKind::Ref => None,
        SlotKind::Int => Some(sentinel.ok_or_else(|| {
            Error::validation(
                "conditional merge over a primitive return requires a sentinel".to_owned(),
            )
        })?),
        _ => {
            return Err(Error::validation(
                "conditional merge supports reference and int returns only".to_owned(),
            ))
        }
    };

    let found = list.fresh_label();
    for source in sources {
        if source.member.descriptor.return_type.is_none() {
            return Err(Error::validation(format!(
                "conditional merge source {:?} returns nothing",
                source.member.name
            )));
        }
        load_args(list, descriptor, shell_static, source.is_static);
        call(list, source);
        match sentinel {
            None => {
                list.push(Insn::Simple(Op::Dup));
                list.push(Insn::Jump(crate::ir::JumpCond::IfNonNull, found));
                list.push(Insn::Simple(Op::Pop));
            }
            Some(marker) => {
                list.push(Insn::Simple(Op::Dup));
                list.push(Insn::Const(marker.clone()));
                list.push(Insn::Jump(crate::ir::JumpCond::IfICmpNe, found));
                list.push(Insn::Simple(Op::Pop));
            }
        }
    }

    // Every source declined; fall back to the "no result" value
    match sentinel {
        None => list.push(Insn::Const(ConstValue::Null)),
        Some(marker) => list.push(Insn::Const(marker.clone())),
    };
    list.push(Insn::Simple(return_op(ret)));
    list.push(Insn::Label(found));
    list.push(Insn::Simple(return_op(ret)));
    Ok(())
}

/// Push one method-handle constant per source and hand the batch to the
/// runtime fan-out helper
///
/// Parallel sources run on worker threads, so they must be static and
/// parameterless.
fn emit_parallel(
    list: &mut InsnList,
    descriptor: &MethodDescriptor,
    sources: &[ResolvedSource],
) -> Result<(), Error> {
    for source in sources {
        if !source.is_static || !source.member.descriptor.parameters.is_empty() {
            return Err(Error::validation(format!(
                "parallel merge source {:?} must be static and parameterless",
                source.member.name
            )));
        }
        list.push(Insn::Const(ConstValue::Handle(source.member.clone())));
    }

    let join_all = MemberRef {
        class: BinaryName::TASKS,
        name: crate::jvm::UnqualifiedName::JOIN_ALL,
        descriptor: MethodDescriptor {
            parameters: vec![FieldType::object(BinaryName::METHODHANDLE); sources.len()],
            return_type: descriptor.return_type.clone(),
        },
    };
    list.push(Insn::Call(CallKind::Static, join_all));

    match &descriptor.return_type {
        Some(ret) => list.push(Insn::Simple(return_op(ret))),
        None => list.push(Insn::Simple(Op::Return)),
    };
    Ok(())
}
