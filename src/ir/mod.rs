//! Instruction-list IR for one method body
//!
//! The IR is an ordered list of instruction nodes with stable per-node
//! identity, label markers, a local-slot table, and exception ranges. It
//! supports in-place mutation (insert-before, insert-after, remove, replace)
//! without renumbering or moving surviving nodes.

mod body;
mod clone;
mod insn;
mod list;
mod ranges;
mod slots;

pub use body::{ClassBody, ExceptionRange, FieldBody, MethodBody, PromotionMarker, SlotEntry};
pub use clone::{clone_body, clone_list, LabelMap};
pub use insn::{
    CallKind, ConstValue, FieldOp, FieldRef, Insn, InsnId, JumpCond, LabelId, MemberRef, Op,
    SlotKind, TypeOp,
};
pub use list::{InsnList, InsnNode};
pub use ranges::{copy_range, extract_range, remove_range, resolve_boundary, Boundary};
pub use slots::{insert_slots, remove_slots};
