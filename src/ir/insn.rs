//! Instruction nodes
//!
//! The representation is slightly different from raw bytecode to make it more
//! convenient to rewrite:
//!
//!   - Slot loads and stores are one variant each, tagged with a
//!     [`SlotKind`], so widening a slot is an operand rewrite instead of an
//!     opcode table lookup
//!
//!   - Labels and line markers are ordinary list nodes, which lets range
//!     operations address them by position and identity

use crate::jvm::{BinaryName, FieldType, MethodDescriptor, UnqualifiedName};
use std::fmt;

/// Opaque label marker
///
/// A label must appear exactly once (as an [`Insn::Label`] node) in the
/// instruction list that owns it.
#[derive(Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct LabelId(pub(crate) u32);

impl fmt::Debug for LabelId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("l{}", self.0))
    }
}

/// Identity of one instruction node within its list
///
/// Identities are never reused and never renumbered by list mutation; ranges
/// hold onto nodes through these.
#[derive(Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct InsnId(pub(crate) u32);

impl fmt::Debug for InsnId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("n{}", self.0))
    }
}

/// Loadable constant
#[derive(Clone, Debug, PartialEq)]
pub enum ConstValue {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    /// Method handle for a method; the operation abstraction the stage
    /// composer threads to wrap handlers
    Handle(MemberRef),
}

/// Category of a slot load or store
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlotKind {
    Int,
    Long,
    Float,
    Double,
    Ref,
}

impl SlotKind {
    /// Slot category a value of the given type loads and stores through
    pub fn of(ty: &FieldType) -> SlotKind {
        use crate::jvm::BaseType;
        match ty {
            FieldType::Base(BaseType::Long) => SlotKind::Long,
            FieldType::Base(BaseType::Float) => SlotKind::Float,
            FieldType::Base(BaseType::Double) => SlotKind::Double,
            FieldType::Base(_) => SlotKind::Int,
            FieldType::Object(_) | FieldType::Array(_) => SlotKind::Ref,
        }
    }

    /// Does a value of this kind occupy two consecutive slots?
    pub fn is_wide(self) -> bool {
        matches!(self, SlotKind::Long | SlotKind::Double)
    }
}

/// Operand-free instruction
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Nop,
    Pop,
    Pop2,
    Dup,
    Dup2,
    Swap,
    IAdd,
    LAdd,
    FAdd,
    DAdd,
    ISub,
    LSub,
    IMul,
    LMul,
    IDiv,
    LDiv,
    INeg,
    LNeg,
    I2L,
    L2I,
    I2F,
    I2D,
    F2D,
    D2F,
    F2I,
    F2L,
    D2I,
    L2D,
    D2L,
    LCmp,
    AThrow,
    Return,
    IReturn,
    LReturn,
    FReturn,
    DReturn,
    AReturn,
}

/// Type-operand instruction
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TypeOp {
    New,
    CheckCast,
    InstanceOf,
}

/// Jump condition (`Goto` is unconditional)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JumpCond {
    Goto,
    IfEq,
    IfNe,
    IfLt,
    IfGe,
    IfGt,
    IfLe,
    IfNull,
    IfNonNull,
    IfICmpEq,
    IfICmpNe,
}

/// Method invocation dispatch
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CallKind {
    Static,
    Virtual,
    Special,
    Interface,
}

/// Field access direction
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FieldOp {
    GetStatic,
    PutStatic,
    GetField,
    PutField,
}

/// Reference to a method by owner, name, and descriptor
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MemberRef {
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
}

/// Reference to a field by owner, name, and type
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldRef {
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub ty: FieldType,
}

/// One instruction
///
/// Operands are immutable once created, except for the opcode rewrites the
/// slot-widening transform performs.
#[derive(Clone, Debug, PartialEq)]
pub enum Insn {
    Simple(Op),
    Const(ConstValue),
    Load(SlotKind, u16),
    Store(SlotKind, u16),
    Inc { slot: u16, delta: i16 },
    Type(TypeOp, BinaryName),
    Call(CallKind, MemberRef),
    Field(FieldOp, FieldRef),
    Jump(JumpCond, LabelId),
    Label(LabelId),
    Line(u16),
}

impl Insn {
    /// Slot index referenced by this instruction, if any
    pub fn slot_ref(&self) -> Option<u16> {
        match self {
            Insn::Load(_, slot) | Insn::Store(_, slot) => Some(*slot),
            Insn::Inc { slot, .. } => Some(*slot),
            _ => None,
        }
    }

    /// Label referenced (not defined) by this instruction, if any
    pub fn label_ref(&self) -> Option<LabelId> {
        match self {
            Insn::Jump(_, target) => Some(*target),
            _ => None,
        }
    }
}
