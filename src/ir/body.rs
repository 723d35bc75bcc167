use super::insn::LabelId;
use super::list::InsnList;
use crate::jvm::{
    BinaryName, ClassAccessFlags, FieldType, MethodAccessFlags, MethodDescriptor, UnqualifiedName,
};
use crate::util::Width;

/// Local slot table entry: a named, typed debug range over a slot index
///
/// `index` must be unique within an overlapping live range. Widening the type
/// to a two-slot type permanently consumes the next index too.
#[derive(Clone, Debug, PartialEq)]
pub struct SlotEntry {
    pub name: String,
    pub ty: FieldType,
    pub start: LabelId,
    pub end: LabelId,
    pub index: u16,
}

/// Exception handler range
///
/// All three labels must be present in the instruction list this range
/// belongs to. `exception` of `None` catches everything.
#[derive(Clone, Debug, PartialEq)]
pub struct ExceptionRange {
    pub start: LabelId,
    pub end: LabelId,
    pub handler: LabelId,
    pub exception: Option<BinaryName>,
}

/// Mutable in-memory representation of one method during transformation
///
/// A body is owned exclusively by the transform currently holding it;
/// ownership transfers explicitly when a body is moved into a new private
/// method by the stage composer.
#[derive(Clone, Debug)]
pub struct MethodBody {
    pub name: UnqualifiedName,
    pub access: MethodAccessFlags,
    pub descriptor: MethodDescriptor,
    pub instructions: InsnList,
    pub slot_table: Vec<SlotEntry>,
    pub exception_ranges: Vec<ExceptionRange>,
    pub max_stack: u16,
    pub max_slots: u16,
}

impl MethodBody {
    /// Create an empty body; `max_slots` starts at the argument width
    pub fn new(
        name: UnqualifiedName,
        access: MethodAccessFlags,
        descriptor: MethodDescriptor,
    ) -> MethodBody {
        let mut body = MethodBody {
            name,
            access,
            descriptor,
            instructions: InsnList::new(),
            slot_table: vec![],
            exception_ranges: vec![],
            max_stack: 0,
            max_slots: 0,
        };
        body.max_slots = body.args_width();
        body
    }

    pub fn is_static(&self) -> bool {
        self.access.contains(MethodAccessFlags::STATIC)
    }

    /// Width in slots of the receiver (if any) plus all declared parameters
    pub fn args_width(&self) -> u16 {
        let receiver = if self.is_static() { 0 } else { 1 };
        receiver + self.descriptor.parameter_width() as u16
    }

    /// Label placed at the very start of the instruction list, creating one
    /// if the list does not already begin with a label
    pub fn start_label(&mut self) -> LabelId {
        use super::insn::Insn;
        if let Some(node) = self.instructions.nodes().first() {
            if let Insn::Label(label) = node.insn {
                return label;
            }
        }
        let label = self.instructions.fresh_label();
        self.instructions.insert_all_at(0, [Insn::Label(label)]);
        label
    }

    /// Label placed at the very end of the instruction list, creating one if
    /// the list does not already end with a label
    pub fn end_label(&mut self) -> LabelId {
        use super::insn::Insn;
        if let Some(node) = self.instructions.nodes().last() {
            if let Insn::Label(label) = node.insn {
                return label;
            }
        }
        let label = self.instructions.fresh_label();
        self.instructions.push(Insn::Label(label));
        label
    }
}

/// Marker left by a lifetime-modify request for the class-level promotion
/// pass (field-backed storage); the method pass only records it
#[derive(Clone, Debug, PartialEq)]
pub struct PromotionMarker {
    pub method: UnqualifiedName,
    pub descriptor: MethodDescriptor,
    pub slot: u16,
    pub ty: FieldType,
}

/// Field carried on a class body
#[derive(Clone, Debug, PartialEq)]
pub struct FieldBody {
    pub name: UnqualifiedName,
    pub ty: FieldType,
    pub access: u16,
}

/// Mutable in-memory representation of one class during a pipeline run
#[derive(Clone, Debug)]
pub struct ClassBody {
    pub name: BinaryName,
    pub superclass: BinaryName,
    pub interfaces: Vec<BinaryName>,
    pub access: ClassAccessFlags,
    pub annotations: Vec<BinaryName>,
    pub fields: Vec<FieldBody>,
    pub methods: Vec<MethodBody>,
    pub promotions: Vec<PromotionMarker>,
}

impl ClassBody {
    pub fn new(name: BinaryName) -> ClassBody {
        ClassBody {
            name,
            superclass: BinaryName::OBJECT,
            interfaces: vec![],
            access: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            annotations: vec![],
            fields: vec![],
            methods: vec![],
            promotions: vec![],
        }
    }

    /// Find a method by name, and by descriptor when one is given
    pub fn find_method(
        &self,
        name: &UnqualifiedName,
        descriptor: Option<&MethodDescriptor>,
    ) -> Option<usize> {
        self.methods.iter().position(|method| {
            method.name == *name && descriptor.map_or(true, |d| method.descriptor == *d)
        })
    }

    pub fn method_mut(
        &mut self,
        name: &UnqualifiedName,
        descriptor: Option<&MethodDescriptor>,
    ) -> Option<&mut MethodBody> {
        let index = self.find_method(name, descriptor)?;
        Some(&mut self.methods[index])
    }

    /// Allocate a collision-free synthetic method name derived from `base`
    ///
    /// Names follow the `base$weaveN` shape so stacked transforms on the same
    /// method never clash.
    pub fn synthetic_name(&self, base: &UnqualifiedName) -> UnqualifiedName {
        let stem = base.concat(&UnqualifiedName::WEAVE_SUFFIX);
        for n in 0.. {
            let candidate = stem.concat(&UnqualifiedName::number(n));
            if !self.methods.iter().any(|method| method.name == candidate) {
                return candidate;
            }
        }
        unreachable!("synthetic name counter exhausted")
    }
}

/// Estimated stack effect of one instruction: values popped, values pushed
///
/// Width-2 values count as two. This is the sizing model behind
/// [`recompute_maxima`]; it does not need to be exact for unreachable paths,
/// only an upper bound along the straight-line order.
fn stack_effect(insn: &super::insn::Insn) -> (u16, u16) {
    use super::insn::{ConstValue, FieldOp, Insn, Op, TypeOp};
    match insn {
        Insn::Simple(op) => match op {
            Op::Nop => (0, 0),
            Op::Pop => (1, 0),
            Op::Pop2 => (2, 0),
            Op::Dup => (1, 2),
            Op::Dup2 => (2, 4),
            Op::Swap => (2, 2),
            Op::IAdd | Op::ISub | Op::IMul | Op::IDiv | Op::FAdd => (2, 1),
            Op::LAdd | Op::LSub | Op::LMul | Op::LDiv | Op::DAdd => (4, 2),
            Op::INeg | Op::F2I | Op::F2D | Op::I2F => (1, 1),
            Op::LNeg | Op::L2D | Op::D2L | Op::D2F => (2, 2),
            Op::I2L | Op::I2D => (1, 2),
            Op::L2I | Op::D2I => (2, 1),
            Op::F2L => (1, 2),
            Op::LCmp => (4, 1),
            Op::AThrow => (1, 0),
            Op::Return => (0, 0),
            Op::IReturn | Op::FReturn | Op::AReturn => (1, 0),
            Op::LReturn | Op::DReturn => (2, 0),
        },
        Insn::Const(value) => match value {
            ConstValue::Long(_) | ConstValue::Double(_) => (0, 2),
            _ => (0, 1),
        },
        Insn::Load(kind, _) => (0, if kind.is_wide() { 2 } else { 1 }),
        Insn::Store(kind, _) => (if kind.is_wide() { 2 } else { 1 }, 0),
        Insn::Inc { .. } => (0, 0),
        Insn::Type(TypeOp::New, _) => (0, 1),
        Insn::Type(TypeOp::CheckCast, _) | Insn::Type(TypeOp::InstanceOf, _) => (1, 1),
        Insn::Call(kind, member) => {
            let receiver = match kind {
                super::insn::CallKind::Static => 0,
                _ => 1,
            };
            let pops = receiver + member.descriptor.parameter_width() as u16;
            let pushes = member
                .descriptor
                .return_type
                .as_ref()
                .map_or(0, |ty| ty.width() as u16);
            (pops, pushes)
        }
        Insn::Field(op, field) => {
            let width = field.ty.width() as u16;
            match op {
                FieldOp::GetStatic => (0, width),
                FieldOp::PutStatic => (width, 0),
                FieldOp::GetField => (1, width),
                FieldOp::PutField => (width + 1, 0),
            }
        }
        Insn::Jump(cond, _) => {
            use super::insn::JumpCond::*;
            match cond {
                Goto => (0, 0),
                IfEq | IfNe | IfLt | IfGe | IfGt | IfLe | IfNull | IfNonNull => (1, 0),
                IfICmpEq | IfICmpNe => (2, 0),
            }
        }
        Insn::Label(_) | Insn::Line(_) => (0, 0),
    }
}

/// Recompute `max_stack` and `max_slots` from the instruction list
///
/// Stack sizing walks the list in order, clamping at zero across labels
/// (jump-target re-entry is bounded by what some straight-line path pushed,
/// which this walk has already seen).
pub(crate) fn recompute_maxima(body: &mut MethodBody) {
    let mut depth: u16 = 0;
    let mut max_stack: u16 = 0;
    let mut max_slots: u16 = body.args_width();

    for node in body.instructions.iter() {
        let (pops, pushes) = stack_effect(&node.insn);
        depth = depth.saturating_sub(pops) + pushes;
        max_stack = max_stack.max(depth);

        if let Some(slot) = node.insn.slot_ref() {
            let width = match node.insn {
                super::insn::Insn::Load(kind, _) | super::insn::Insn::Store(kind, _)
                    if kind.is_wide() =>
                {
                    2
                }
                _ => 1,
            };
            max_slots = max_slots.max(slot + width);
        }
    }
    for entry in &body.slot_table {
        max_slots = max_slots.max(entry.index + entry.ty.width() as u16);
    }

    body.max_stack = max_stack;
    body.max_slots = max_slots;
}

impl MethodBody {
    /// Recompute the stack and slot maxima after a structural rewrite
    pub fn recompute_maxima(&mut self) {
        recompute_maxima(self)
    }
}
