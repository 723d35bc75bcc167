//! Encoded binary form of a class body
//!
//! This is the format class bodies arrive in and leave the engine in, and the
//! medium for structural validation (encode, decode, sanity-check). The
//! encoding is big-endian with `u8` tags and `u16` sequence lengths.

use crate::errors::Error;
use crate::ir::{
    CallKind, ClassBody, ConstValue, ExceptionRange, FieldBody, FieldOp, FieldRef, Insn, InsnList,
    JumpCond, LabelId, MemberRef, MethodBody, Op, PromotionMarker, SlotEntry, SlotKind, TypeOp,
};
use crate::jvm::{
    BinaryName, ClassAccessFlags, FieldType, MethodAccessFlags, MethodDescriptor, Name,
    ParseDescriptor, RenderDescriptor, UnqualifiedName,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Error as IoError, ErrorKind, Result};

/// First word of every encoded class body
pub const MAGIC: u32 = 0xC1A5_5B0D;

/// Format version; decode rejects anything else
pub const VERSION: u16 = 1;

/// Serialize a construct into a binary output stream
pub trait Serialize: Sized {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()>;
}

/// Read a construct back out of a binary input stream
pub trait Deserialize: Sized {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self>;
}

/// Encode a class body to its binary form
pub fn encode_class(class: &ClassBody) -> std::result::Result<Vec<u8>, Error> {
    let mut out: Vec<u8> = vec![];
    MAGIC.serialize(&mut out)?;
    VERSION.serialize(&mut out)?;
    class.serialize(&mut out)?;
    Ok(out)
}

/// Decode a class body from its binary form
///
/// The whole input must be consumed; trailing bytes are malformed input.
pub fn decode_class(bytes: &[u8]) -> std::result::Result<ClassBody, Error> {
    let mut reader = bytes;
    let magic = u32::deserialize(&mut reader)?;
    if magic != MAGIC {
        return Err(invalid(format!("bad magic 0x{:08X}", magic)).into());
    }
    let version = u16::deserialize(&mut reader)?;
    if version != VERSION {
        return Err(invalid(format!("unsupported format version {}", version)).into());
    }
    let class = ClassBody::deserialize(&mut reader)?;
    if !reader.is_empty() {
        return Err(invalid(format!("{} trailing bytes", reader.len())).into());
    }
    Ok(class)
}

fn invalid(msg: String) -> IoError {
    IoError::new(ErrorKind::InvalidData, msg)
}

impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(*self)
    }
}

impl Serialize for u16 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<BigEndian>(*self)
    }
}

impl Serialize for u32 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(*self)
    }
}

impl Serialize for i16 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i16::<BigEndian>(*self)
    }
}

impl Serialize for i32 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i32::<BigEndian>(*self)
    }
}

impl Serialize for i64 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i64::<BigEndian>(*self)
    }
}

impl Serialize for f32 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_f32::<BigEndian>(*self)
    }
}

impl Serialize for f64 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_f64::<BigEndian>(*self)
    }
}

impl Deserialize for u8 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        reader.read_u8()
    }
}

impl Deserialize for u16 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        reader.read_u16::<BigEndian>()
    }
}

impl Deserialize for u32 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        reader.read_u32::<BigEndian>()
    }
}

impl Deserialize for i16 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        reader.read_i16::<BigEndian>()
    }
}

impl Deserialize for i32 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        reader.read_i32::<BigEndian>()
    }
}

impl Deserialize for i64 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        reader.read_i64::<BigEndian>()
    }
}

impl Deserialize for f32 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        reader.read_f32::<BigEndian>()
    }
}

impl Deserialize for f64 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        reader.read_f64::<BigEndian>()
    }
}

/// Size in `u16` is the first thing serialized/deserialized
impl<A: Serialize> Serialize for Vec<A> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        let len = u16::try_from(self.len())
            .map_err(|_| invalid(format!("sequence of {} overflows u16", self.len())))?;
        len.serialize(writer)?;
        for elem in self {
            elem.serialize(writer)?;
        }
        Ok(())
    }
}

impl<A: Deserialize> Deserialize for Vec<A> {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        let len = u16::deserialize(reader)?;
        let mut elems = Vec::with_capacity(len as usize);
        for _ in 0..len {
            elems.push(A::deserialize(reader)?);
        }
        Ok(elems)
    }
}

impl Serialize for String {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        let bytes = self.as_bytes();
        let len = u16::try_from(bytes.len())
            .map_err(|_| invalid(format!("string of {} bytes overflows u16", bytes.len())))?;
        len.serialize(writer)?;
        writer.write_all(bytes)
    }
}

impl Deserialize for String {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        let len = u16::deserialize(reader)?;
        let mut bytes = vec![0u8; len as usize];
        reader.read_exact(&mut bytes)?;
        String::from_utf8(bytes).map_err(|_| invalid("string is not UTF-8".to_owned()))
    }
}

impl<A: Serialize> Serialize for Option<A> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        match self {
            None => 0u8.serialize(writer),
            Some(value) => {
                1u8.serialize(writer)?;
                value.serialize(writer)
            }
        }
    }
}

impl<A: Deserialize> Deserialize for Option<A> {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        match u8::deserialize(reader)? {
            0 => Ok(None),
            1 => Ok(Some(A::deserialize(reader)?)),
            tag => Err(invalid(format!("bad option tag {}", tag))),
        }
    }
}

impl Serialize for BinaryName {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.as_str().to_owned().serialize(writer)
    }
}

impl Deserialize for BinaryName {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        BinaryName::from_string(String::deserialize(reader)?).map_err(invalid)
    }
}

impl Serialize for UnqualifiedName {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.as_str().to_owned().serialize(writer)
    }
}

impl Deserialize for UnqualifiedName {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        UnqualifiedName::from_string(String::deserialize(reader)?).map_err(invalid)
    }
}

impl Serialize for MethodDescriptor {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.render().serialize(writer)
    }
}

impl Deserialize for MethodDescriptor {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        MethodDescriptor::parse(&String::deserialize(reader)?)
    }
}

impl Serialize for FieldType {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.render().serialize(writer)
    }
}

impl Deserialize for FieldType {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        FieldType::parse(&String::deserialize(reader)?)
    }
}

impl Serialize for LabelId {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for LabelId {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        Ok(LabelId(u32::deserialize(reader)?))
    }
}

impl Serialize for MemberRef {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.class.serialize(writer)?;
        self.name.serialize(writer)?;
        self.descriptor.serialize(writer)
    }
}

impl Deserialize for MemberRef {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        Ok(MemberRef {
            class: BinaryName::deserialize(reader)?,
            name: UnqualifiedName::deserialize(reader)?,
            descriptor: MethodDescriptor::deserialize(reader)?,
        })
    }
}

impl Serialize for FieldRef {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.class.serialize(writer)?;
        self.name.serialize(writer)?;
        self.ty.serialize(writer)
    }
}

impl Deserialize for FieldRef {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        Ok(FieldRef {
            class: BinaryName::deserialize(reader)?,
            name: UnqualifiedName::deserialize(reader)?,
            ty: FieldType::deserialize(reader)?,
        })
    }
}

// Fieldless operand enums are encoded as their declaration-order
// discriminant; the decode tables below must stay in declaration order.

const OPS: &[Op] = &[
    Op::Nop,
    Op::Pop,
    Op::Pop2,
    Op::Dup,
    Op::Dup2,
    Op::Swap,
    Op::IAdd,
    Op::LAdd,
    Op::FAdd,
    Op::DAdd,
    Op::ISub,
    Op::LSub,
    Op::IMul,
    Op::LMul,
    Op::IDiv,
    Op::LDiv,
    Op::INeg,
    Op::LNeg,
    Op::I2L,
    Op::L2I,
    Op::I2F,
    Op::I2D,
    Op::F2D,
    Op::D2F,
    Op::F2I,
    Op::F2L,
    Op::D2I,
    Op::L2D,
    Op::D2L,
    Op::LCmp,
    Op::AThrow,
    Op::Return,
    Op::IReturn,
    Op::LReturn,
    Op::FReturn,
    Op::DReturn,
    Op::AReturn,
];

const SLOT_KINDS: &[SlotKind] = &[
    SlotKind::Int,
    SlotKind::Long,
    SlotKind::Float,
    SlotKind::Double,
    SlotKind::Ref,
];

const TYPE_OPS: &[TypeOp] = &[TypeOp::New, TypeOp::CheckCast, TypeOp::InstanceOf];

const JUMP_CONDS: &[JumpCond] = &[
    JumpCond::Goto,
    JumpCond::IfEq,
    JumpCond::IfNe,
    JumpCond::IfLt,
    JumpCond::IfGe,
    JumpCond::IfGt,
    JumpCond::IfLe,
    JumpCond::IfNull,
    JumpCond::IfNonNull,
    JumpCond::IfICmpEq,
    JumpCond::IfICmpNe,
];

const CALL_KINDS: &[CallKind] = &[
    CallKind::Static,
    CallKind::Virtual,
    CallKind::Special,
    CallKind::Interface,
];

const FIELD_OPS: &[FieldOp] = &[
    FieldOp::GetStatic,
    FieldOp::PutStatic,
    FieldOp::GetField,
    FieldOp::PutField,
];

fn decode_tag<T: Copy>(table: &[T], tag: u8, what: &str) -> Result<T> {
    table
        .get(tag as usize)
        .copied()
        .ok_or_else(|| invalid(format!("bad {} tag {}", what, tag)))
}

impl Serialize for ConstValue {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        match self {
            ConstValue::Null => 0u8.serialize(writer),
            ConstValue::Int(value) => {
                1u8.serialize(writer)?;
                value.serialize(writer)
            }
            ConstValue::Long(value) => {
                2u8.serialize(writer)?;
                value.serialize(writer)
            }
            ConstValue::Float(value) => {
                3u8.serialize(writer)?;
                value.serialize(writer)
            }
            ConstValue::Double(value) => {
                4u8.serialize(writer)?;
                value.serialize(writer)
            }
            ConstValue::Str(value) => {
                5u8.serialize(writer)?;
                value.serialize(writer)
            }
            ConstValue::Handle(member) => {
                6u8.serialize(writer)?;
                member.serialize(writer)
            }
        }
    }
}

impl Deserialize for ConstValue {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        Ok(match u8::deserialize(reader)? {
            0 => ConstValue::Null,
            1 => ConstValue::Int(i32::deserialize(reader)?),
            2 => ConstValue::Long(i64::deserialize(reader)?),
            3 => ConstValue::Float(f32::deserialize(reader)?),
            4 => ConstValue::Double(f64::deserialize(reader)?),
            5 => ConstValue::Str(String::deserialize(reader)?),
            6 => ConstValue::Handle(MemberRef::deserialize(reader)?),
            tag => return Err(invalid(format!("bad constant tag {}", tag))),
        })
    }
}

impl Serialize for Insn {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        match self {
            Insn::Simple(op) => {
                0u8.serialize(writer)?;
                (*op as u8).serialize(writer)
            }
            Insn::Const(value) => {
                1u8.serialize(writer)?;
                value.serialize(writer)
            }
            Insn::Load(kind, slot) => {
                2u8.serialize(writer)?;
                (*kind as u8).serialize(writer)?;
                slot.serialize(writer)
            }
            Insn::Store(kind, slot) => {
                3u8.serialize(writer)?;
                (*kind as u8).serialize(writer)?;
                slot.serialize(writer)
            }
            Insn::Inc { slot, delta } => {
                4u8.serialize(writer)?;
                slot.serialize(writer)?;
                delta.serialize(writer)
            }
            Insn::Type(op, class) => {
                5u8.serialize(writer)?;
                (*op as u8).serialize(writer)?;
                class.serialize(writer)
            }
            Insn::Call(kind, member) => {
                6u8.serialize(writer)?;
                (*kind as u8).serialize(writer)?;
                member.serialize(writer)
            }
            Insn::Field(op, field) => {
                7u8.serialize(writer)?;
                (*op as u8).serialize(writer)?;
                field.serialize(writer)
            }
            Insn::Jump(cond, target) => {
                8u8.serialize(writer)?;
                (*cond as u8).serialize(writer)?;
                target.serialize(writer)
            }
            Insn::Label(label) => {
                9u8.serialize(writer)?;
                label.serialize(writer)
            }
            Insn::Line(line) => {
                10u8.serialize(writer)?;
                line.serialize(writer)
            }
        }
    }
}

impl Deserialize for Insn {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        Ok(match u8::deserialize(reader)? {
            0 => Insn::Simple(decode_tag(OPS, u8::deserialize(reader)?, "op")?),
            1 => Insn::Const(ConstValue::deserialize(reader)?),
            2 => Insn::Load(
                decode_tag(SLOT_KINDS, u8::deserialize(reader)?, "slot kind")?,
                u16::deserialize(reader)?,
            ),
            3 => Insn::Store(
                decode_tag(SLOT_KINDS, u8::deserialize(reader)?, "slot kind")?,
                u16::deserialize(reader)?,
            ),
            4 => Insn::Inc {
                slot: u16::deserialize(reader)?,
                delta: i16::deserialize(reader)?,
            },
            5 => Insn::Type(
                decode_tag(TYPE_OPS, u8::deserialize(reader)?, "type op")?,
                BinaryName::deserialize(reader)?,
            ),
            6 => Insn::Call(
                decode_tag(CALL_KINDS, u8::deserialize(reader)?, "call kind")?,
                MemberRef::deserialize(reader)?,
            ),
            7 => Insn::Field(
                decode_tag(FIELD_OPS, u8::deserialize(reader)?, "field op")?,
                FieldRef::deserialize(reader)?,
            ),
            8 => Insn::Jump(
                decode_tag(JUMP_CONDS, u8::deserialize(reader)?, "jump condition")?,
                LabelId::deserialize(reader)?,
            ),
            9 => Insn::Label(LabelId::deserialize(reader)?),
            10 => Insn::Line(u16::deserialize(reader)?),
            tag => return Err(invalid(format!("bad instruction tag {}", tag))),
        })
    }
}

impl Serialize for InsnList {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        let insns: Vec<Insn> = self.insns().cloned().collect();
        insns.serialize(writer)
    }
}

impl Deserialize for InsnList {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        let insns: Vec<Insn> = Vec::deserialize(reader)?;
        let mut list = InsnList::new();
        for insn in insns {
            match insn {
                Insn::Label(label) | Insn::Jump(_, label) => list.reserve_label(label),
                _ => {}
            }
            list.push(insn);
        }
        Ok(list)
    }
}

impl Serialize for SlotEntry {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.name.serialize(writer)?;
        self.ty.serialize(writer)?;
        self.start.serialize(writer)?;
        self.end.serialize(writer)?;
        self.index.serialize(writer)
    }
}

impl Deserialize for SlotEntry {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        Ok(SlotEntry {
            name: String::deserialize(reader)?,
            ty: FieldType::deserialize(reader)?,
            start: LabelId::deserialize(reader)?,
            end: LabelId::deserialize(reader)?,
            index: u16::deserialize(reader)?,
        })
    }
}

impl Serialize for ExceptionRange {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.start.serialize(writer)?;
        self.end.serialize(writer)?;
        self.handler.serialize(writer)?;
        self.exception.serialize(writer)
    }
}

impl Deserialize for ExceptionRange {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        Ok(ExceptionRange {
            start: LabelId::deserialize(reader)?,
            end: LabelId::deserialize(reader)?,
            handler: LabelId::deserialize(reader)?,
            exception: Option::deserialize(reader)?,
        })
    }
}

impl Serialize for MethodBody {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.name.serialize(writer)?;
        self.access.bits().serialize(writer)?;
        self.descriptor.serialize(writer)?;
        self.instructions.serialize(writer)?;
        self.slot_table.serialize(writer)?;
        self.exception_ranges.serialize(writer)?;
        self.max_stack.serialize(writer)?;
        self.max_slots.serialize(writer)
    }
}

impl Deserialize for MethodBody {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        Ok(MethodBody {
            name: UnqualifiedName::deserialize(reader)?,
            access: MethodAccessFlags::from_bits_truncate(u16::deserialize(reader)?),
            descriptor: MethodDescriptor::deserialize(reader)?,
            instructions: InsnList::deserialize(reader)?,
            slot_table: Vec::deserialize(reader)?,
            exception_ranges: Vec::deserialize(reader)?,
            max_stack: u16::deserialize(reader)?,
            max_slots: u16::deserialize(reader)?,
        })
    }
}

impl Serialize for FieldBody {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.name.serialize(writer)?;
        self.ty.serialize(writer)?;
        self.access.serialize(writer)
    }
}

impl Deserialize for FieldBody {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        Ok(FieldBody {
            name: UnqualifiedName::deserialize(reader)?,
            ty: FieldType::deserialize(reader)?,
            access: u16::deserialize(reader)?,
        })
    }
}

impl Serialize for PromotionMarker {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.method.serialize(writer)?;
        self.descriptor.serialize(writer)?;
        self.slot.serialize(writer)?;
        self.ty.serialize(writer)
    }
}

impl Deserialize for PromotionMarker {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        Ok(PromotionMarker {
            method: UnqualifiedName::deserialize(reader)?,
            descriptor: MethodDescriptor::deserialize(reader)?,
            slot: u16::deserialize(reader)?,
            ty: FieldType::deserialize(reader)?,
        })
    }
}

impl Serialize for ClassBody {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.name.serialize(writer)?;
        self.superclass.serialize(writer)?;
        self.interfaces.serialize(writer)?;
        self.access.bits().serialize(writer)?;
        self.annotations.serialize(writer)?;
        self.fields.serialize(writer)?;
        self.methods.serialize(writer)?;
        self.promotions.serialize(writer)
    }
}

impl Deserialize for ClassBody {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        Ok(ClassBody {
            name: BinaryName::deserialize(reader)?,
            superclass: BinaryName::deserialize(reader)?,
            interfaces: Vec::deserialize(reader)?,
            access: ClassAccessFlags::from_bits_truncate(u16::deserialize(reader)?),
            annotations: Vec::deserialize(reader)?,
            fields: Vec::deserialize(reader)?,
            methods: Vec::deserialize(reader)?,
            promotions: Vec::deserialize(reader)?,
        })
    }
}
