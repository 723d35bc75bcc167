//! Overwrite: replace a method's body wholesale with a source body

use super::requests::OverwriteRequest;
use crate::errors::Error;
use crate::ir::{clone_body, ClassBody};
use crate::jvm::RenderDescriptor;

/// Apply one overwrite request to a class
///
/// When the target is absent the request fails unless `force` is set, in
/// which case the source body is cloned in as a brand-new method under the
/// target name. When present, the target keeps its name and access but its
/// instructions, exception ranges, and debug entries are replaced by clones
/// of the source's (labels remapped), and the maxima are recomputed.
pub fn apply(class: &mut ClassBody, request: &OverwriteRequest) -> Result<(), Error> {
    let descriptor = request
        .target
        .descriptor
        .as_ref()
        .unwrap_or(&request.source.descriptor);

    match class.find_method(&request.target.name, Some(descriptor)) {
        None if !request.force => Err(Error::target_not_found(format!(
            "{:?}{}",
            request.target.name,
            descriptor.render()
        ))),
        None => {
            let (mut fresh, _) = clone_body(&request.source)?;
            fresh.name = request.target.name.clone();
            fresh.recompute_maxima();
            class.methods.push(fresh);
            Ok(())
        }
        Some(index) => {
            let (clone, _) = clone_body(&request.source)?;
            let target = &mut class.methods[index];
            target.instructions = clone.instructions;
            target.exception_ranges = clone.exception_ranges;
            target.slot_table = clone.slot_table;
            if target.descriptor == request.source.descriptor {
                // Descriptor-compatible metadata carries over
                target.access = request.source.access;
            }
            target.recompute_maxima();
            Ok(())
        }
    }
}
