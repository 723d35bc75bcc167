//! Reference interpreter over the instruction-list IR
//!
//! Executes method bodies directly so behavioral properties of a rewrite
//! (ordering, short-circuiting, return values) can be checked without a
//! real class loader. Host functions stand in for external methods; the
//! runtime fan-out helper is built in.
//!
//! Exception ranges are not interpreted; an `athrow` simply aborts the call.

use crate::errors::Error;
use crate::ir::{
    CallKind, ClassBody, ConstValue, FieldOp, Insn, JumpCond, LabelId, MemberRef, Op, TypeOp,
};
use crate::jvm::{BaseType, BinaryName, FieldType, Name, UnqualifiedName};
use dashmap::DashMap;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

/// Runtime value; wide primitives occupy a single stack entry here
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(Arc<str>),
    Handle(MemberRef),
}

impl Value {
    fn is_wide(&self) -> bool {
        matches!(self, Value::Long(_) | Value::Double(_))
    }

    fn zero_of(ty: &FieldType) -> Value {
        match ty {
            FieldType::Base(BaseType::Long) => Value::Long(0),
            FieldType::Base(BaseType::Float) => Value::Float(0.0),
            FieldType::Base(BaseType::Double) => Value::Double(0.0),
            FieldType::Base(_) => Value::Int(0),
            _ => Value::Null,
        }
    }
}

/// External method implementation supplied by the test or host
pub type HostFn = Arc<dyn Fn(&Interp, &[Value]) -> Result<Option<Value>, Error> + Send + Sync>;

const DEFAULT_FUEL: u64 = 1_000_000;

/// A small method-body evaluator over loaded classes and host functions
pub struct Interp {
    classes: DashMap<BinaryName, Arc<ClassBody>>,
    hosts: DashMap<String, HostFn>,
    statics: DashMap<String, Value>,
    fuel: u64,
}

impl Default for Interp {
    fn default() -> Interp {
        Interp::new()
    }
}

impl Interp {
    pub fn new() -> Interp {
        Interp {
            classes: DashMap::new(),
            hosts: DashMap::new(),
            statics: DashMap::new(),
            fuel: DEFAULT_FUEL,
        }
    }

    pub fn load_class(&self, class: ClassBody) {
        self.classes.insert(class.name.clone(), Arc::new(class));
    }

    /// Register a host implementation for `class.name`; it shadows any
    /// loaded method of the same name
    pub fn register_host(&self, class: &BinaryName, name: &str, host: HostFn) {
        self.hosts.insert(host_key(class, name), host);
    }

    pub fn set_static(&self, class: &BinaryName, name: &UnqualifiedName, value: Value) {
        self.statics.insert(host_key(class, name.as_str()), value);
    }

    pub fn get_static(&self, class: &BinaryName, name: &UnqualifiedName) -> Option<Value> {
        self.statics
            .get(&host_key(class, name.as_str()))
            .map(|entry| entry.clone())
    }

    /// Invoke a method by name; static methods get their arguments as-is,
    /// instance methods expect the receiver as the first argument
    pub fn call(
        &self,
        class: &BinaryName,
        name: &UnqualifiedName,
        args: Vec<Value>,
    ) -> Result<Option<Value>, Error> {
        self.call_member_named(class, name, args)
    }

    fn call_member(&self, member: &MemberRef, args: Vec<Value>) -> Result<Option<Value>, Error> {
        self.call_member_named(&member.class, &member.name, args)
    }

    fn call_member_named(
        &self,
        class: &BinaryName,
        name: &UnqualifiedName,
        args: Vec<Value>,
    ) -> Result<Option<Value>, Error> {
        if *class == BinaryName::TASKS && *name == UnqualifiedName::JOIN_ALL {
            return self.join_all(&args);
        }
        if let Some(host) = self.hosts.get(&host_key(class, name.as_str())) {
            let host = host.clone();
            return host(self, &args);
        }

        let loaded = self
            .classes
            .get(class)
            .map(|entry| entry.clone())
            .ok_or_else(|| Error::target_not_found(format!("class {:?}", class)))?;
        let index = loaded
            .find_method(name, None)
            .ok_or_else(|| Error::target_not_found(format!("{:?}.{:?}", class, name)))?;
        self.run(&loaded, index, args)
    }

    /// Built-in parallel fan-out: invoke every handle argument on worker
    /// threads and hand back the last produced value
    fn join_all(&self, args: &[Value]) -> Result<Option<Value>, Error> {
        let results: Result<Vec<Option<Value>>, Error> = args
            .par_iter()
            .map(|arg| match arg {
                Value::Handle(member) => self.call_member(member, vec![]),
                other => Err(Error::validation(format!(
                    "joinAll expects method handles, got {:?}",
                    other
                ))),
            })
            .collect();
        Ok(results?.into_iter().flatten().last())
    }

    fn run(
        &self,
        class: &ClassBody,
        method: usize,
        args: Vec<Value>,
    ) -> Result<Option<Value>, Error> {
        let body = &class.methods[method];
        let nodes = body.instructions.nodes();

        let mut labels: HashMap<LabelId, usize> = HashMap::new();
        for (index, node) in nodes.iter().enumerate() {
            if let Insn::Label(label) = node.insn {
                labels.insert(label, index);
            }
        }

        let mut slots: Vec<Value> = vec![Value::Null; body.max_slots.max(1) as usize];
        let mut slot = 0usize;
        for arg in args {
            let wide = arg.is_wide();
            slots[slot] = arg;
            slot += if wide { 2 } else { 1 };
        }

        let mut stack: Vec<Value> = Vec::with_capacity(body.max_stack as usize);
        let mut pc = 0usize;
        let mut fuel = self.fuel;

        macro_rules! pop {
            () => {
                stack.pop().ok_or_else(|| {
                    Error::validation(format!("operand stack underflow in {:?}", body.name))
                })?
            };
        }
        macro_rules! pop_int {
            () => {
                match pop!() {
                    Value::Int(v) => v,
                    other => {
                        return Err(Error::validation(format!(
                            "expected int on stack, got {:?}",
                            other
                        )))
                    }
                }
            };
        }

        while pc < nodes.len() {
            fuel = fuel.checked_sub(1).ok_or_else(|| {
                Error::validation(format!("fuel exhausted interpreting {:?}", body.name))
            })?;

            match &nodes[pc].insn {
                Insn::Label(_) | Insn::Line(_) | Insn::Simple(Op::Nop) => {}
                Insn::Const(value) => stack.push(const_value(value)),
                Insn::Load(_, index) => stack.push(slots[*index as usize].clone()),
                Insn::Store(_, index) => {
                    let value = pop!();
                    slots[*index as usize] = value;
                }
                Insn::Inc { slot, delta } => match &slots[*slot as usize] {
                    Value::Int(v) => slots[*slot as usize] = Value::Int(v + i32::from(*delta)),
                    other => {
                        return Err(Error::validation(format!(
                            "iinc over non-int slot value {:?}",
                            other
                        )))
                    }
                },
                Insn::Simple(op) => {
                    if let Some(result) = eval_return(*op, &mut stack, body)? {
                        return Ok(result);
                    }
                    eval_op(*op, &mut stack, body)?;
                }
                Insn::Jump(cond, target) => {
                    let taken = match cond {
                        JumpCond::Goto => true,
                        JumpCond::IfEq => pop_int!() == 0,
                        JumpCond::IfNe => pop_int!() != 0,
                        JumpCond::IfLt => pop_int!() < 0,
                        JumpCond::IfGe => pop_int!() >= 0,
                        JumpCond::IfGt => pop_int!() > 0,
                        JumpCond::IfLe => pop_int!() <= 0,
                        JumpCond::IfNull => pop!() == Value::Null,
                        JumpCond::IfNonNull => pop!() != Value::Null,
                        JumpCond::IfICmpEq => {
                            let b = pop_int!();
                            let a = pop_int!();
                            a == b
                        }
                        JumpCond::IfICmpNe => {
                            let b = pop_int!();
                            let a = pop_int!();
                            a != b
                        }
                    };
                    if taken {
                        pc = *labels.get(target).ok_or_else(|| {
                            Error::validation(format!("jump to unplaced label {:?}", target))
                        })?;
                        continue;
                    }
                }
                Insn::Call(kind, member) => {
                    let mut count = member.descriptor.parameters.len();
                    if *kind != CallKind::Static {
                        count += 1;
                    }
                    if stack.len() < count {
                        return Err(Error::validation(format!(
                            "operand stack underflow calling {:?}",
                            member.name
                        )));
                    }
                    let call_args = stack.split_off(stack.len() - count);
                    if let Some(result) = self.call_member(member, call_args)? {
                        stack.push(result);
                    }
                }
                Insn::Type(TypeOp::CheckCast, _) => {}
                Insn::Type(TypeOp::InstanceOf, _) => {
                    let value = pop!();
                    stack.push(Value::Int(i32::from(value != Value::Null)));
                }
                Insn::Type(TypeOp::New, _) => stack.push(Value::Null),
                Insn::Field(op, field) => match op {
                    FieldOp::GetStatic => {
                        let key = host_key(&field.class, field.name.as_str());
                        let value = self
                            .statics
                            .get(&key)
                            .map(|entry| entry.clone())
                            .unwrap_or_else(|| Value::zero_of(&field.ty));
                        stack.push(value);
                    }
                    FieldOp::PutStatic => {
                        let value = pop!();
                        self.statics
                            .insert(host_key(&field.class, field.name.as_str()), value);
                    }
                    FieldOp::GetField | FieldOp::PutField => {
                        return Err(Error::validation(
                            "instance field access is not interpreted".to_owned(),
                        ))
                    }
                },
            }
            pc += 1;
        }

        // Fell off the end without a return
        Ok(None)
    }
}

fn host_key(class: &BinaryName, name: &str) -> String {
    format!("{}.{}", class.as_str(), name)
}

fn const_value(value: &ConstValue) -> Value {
    match value {
        ConstValue::Null => Value::Null,
        ConstValue::Int(v) => Value::Int(*v),
        ConstValue::Long(v) => Value::Long(*v),
        ConstValue::Float(v) => Value::Float(*v),
        ConstValue::Double(v) => Value::Double(*v),
        ConstValue::Str(v) => Value::Str(Arc::from(v.as_str())),
        ConstValue::Handle(member) => Value::Handle(member.clone()),
    }
}

/// Handle return opcodes; `Some` means the frame is done
fn eval_return(
    op: Op,
    stack: &mut Vec<Value>,
    body: &crate::ir::MethodBody,
) -> Result<Option<Option<Value>>, Error> {
    match op {
        Op::Return => Ok(Some(None)),
        Op::IReturn | Op::LReturn | Op::FReturn | Op::DReturn | Op::AReturn => {
            let value = stack.pop().ok_or_else(|| {
                Error::validation(format!("return with empty stack in {:?}", body.name))
            })?;
            Ok(Some(Some(value)))
        }
        _ => Ok(None),
    }
}

fn eval_op(op: Op, stack: &mut Vec<Value>, body: &crate::ir::MethodBody) -> Result<(), Error> {
    let underflow =
        || Error::validation(format!("operand stack underflow in {:?}", body.name));
    let pop = |stack: &mut Vec<Value>| stack.pop().ok_or_else(underflow);

    match op {
        Op::Nop
        | Op::Return
        | Op::IReturn
        | Op::LReturn
        | Op::FReturn
        | Op::DReturn
        | Op::AReturn => {}
        Op::Pop => {
            pop(stack)?;
        }
        Op::Pop2 => {
            let top = pop(stack)?;
            if !top.is_wide() {
                pop(stack)?;
            }
        }
        Op::Dup => {
            let top = stack.last().ok_or_else(underflow)?.clone();
            stack.push(top);
        }
        Op::Dup2 => {
            let top = stack.last().ok_or_else(underflow)?.clone();
            if top.is_wide() {
                stack.push(top);
            } else {
                if stack.len() < 2 {
                    return Err(underflow());
                }
                let under = stack[stack.len() - 2].clone();
                stack.push(under);
                stack.push(top);
            }
        }
        Op::Swap => {
            let a = pop(stack)?;
            let b = pop(stack)?;
            stack.push(a);
            stack.push(b);
        }
        Op::IAdd | Op::ISub | Op::IMul | Op::IDiv => {
            let b = int_of(pop(stack)?)?;
            let a = int_of(pop(stack)?)?;
            let result = match op {
                Op::IAdd => a.wrapping_add(b),
                Op::ISub => a.wrapping_sub(b),
                Op::IMul => a.wrapping_mul(b),
                _ => {
                    if b == 0 {
                        return Err(Error::validation("integer division by zero".to_owned()));
                    }
                    a.wrapping_div(b)
                }
            };
            stack.push(Value::Int(result));
        }
        Op::LAdd | Op::LSub | Op::LMul | Op::LDiv => {
            let b = long_of(pop(stack)?)?;
            let a = long_of(pop(stack)?)?;
            let result = match op {
                Op::LAdd => a.wrapping_add(b),
                Op::LSub => a.wrapping_sub(b),
                Op::LMul => a.wrapping_mul(b),
                _ => {
                    if b == 0 {
                        return Err(Error::validation("long division by zero".to_owned()));
                    }
                    a.wrapping_div(b)
                }
            };
            stack.push(Value::Long(result));
        }
        Op::FAdd => {
            let b = float_of(pop(stack)?)?;
            let a = float_of(pop(stack)?)?;
            stack.push(Value::Float(a + b));
        }
        Op::DAdd => {
            let b = double_of(pop(stack)?)?;
            let a = double_of(pop(stack)?)?;
            stack.push(Value::Double(a + b));
        }
        Op::INeg => {
            let a = int_of(pop(stack)?)?;
            stack.push(Value::Int(a.wrapping_neg()));
        }
        Op::LNeg => {
            let a = long_of(pop(stack)?)?;
            stack.push(Value::Long(a.wrapping_neg()));
        }
        Op::LCmp => {
            let b = long_of(pop(stack)?)?;
            let a = long_of(pop(stack)?)?;
            stack.push(Value::Int(match a.cmp(&b) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            }));
        }
        Op::I2L => {
            let a = int_of(pop(stack)?)?;
            stack.push(Value::Long(i64::from(a)));
        }
        Op::I2F => {
            let a = int_of(pop(stack)?)?;
            stack.push(Value::Float(a as f32));
        }
        Op::I2D => {
            let a = int_of(pop(stack)?)?;
            stack.push(Value::Double(f64::from(a)));
        }
        Op::L2I => {
            let a = long_of(pop(stack)?)?;
            stack.push(Value::Int(a as i32));
        }
        Op::L2D => {
            let a = long_of(pop(stack)?)?;
            stack.push(Value::Double(a as f64));
        }
        Op::F2I => {
            let a = float_of(pop(stack)?)?;
            stack.push(Value::Int(a as i32));
        }
        Op::F2L => {
            let a = float_of(pop(stack)?)?;
            stack.push(Value::Long(a as i64));
        }
        Op::F2D => {
            let a = float_of(pop(stack)?)?;
            stack.push(Value::Double(f64::from(a)));
        }
        Op::D2I => {
            let a = double_of(pop(stack)?)?;
            stack.push(Value::Int(a as i32));
        }
        Op::D2L => {
            let a = double_of(pop(stack)?)?;
            stack.push(Value::Long(a as i64));
        }
        Op::D2F => {
            let a = double_of(pop(stack)?)?;
            stack.push(Value::Float(a as f32));
        }
        Op::AThrow => {
            let thrown = pop(stack)?;
            return Err(Error::validation(format!(
                "uncaught value thrown in {:?}: {:?}",
                body.name, thrown
            )));
        }
    }
    Ok(())
}

fn int_of(value: Value) -> Result<i32, Error> {
    match value {
        Value::Int(v) => Ok(v),
        other => Err(Error::validation(format!("expected int, got {:?}", other))),
    }
}

fn long_of(value: Value) -> Result<i64, Error> {
    match value {
        Value::Long(v) => Ok(v),
        other => Err(Error::validation(format!("expected long, got {:?}", other))),
    }
}

fn float_of(value: Value) -> Result<f32, Error> {
    match value {
        Value::Float(v) => Ok(v),
        other => Err(Error::validation(format!("expected float, got {:?}", other))),
    }
}

fn double_of(value: Value) -> Result<f64, Error> {
    match value {
        Value::Double(v) => Ok(v),
        other => Err(Error::validation(format!("expected double, got {:?}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Insn, MethodBody, SlotKind};
    use crate::jvm::{MethodAccessFlags, MethodDescriptor};

    fn loaded(body: MethodBody) -> (Interp, BinaryName) {
        let name = BinaryName::from_string("acme/I".to_owned()).unwrap();
        let mut class = ClassBody::new(name.clone());
        class.methods.push(body);
        let interp = Interp::new();
        interp.load_class(class);
        (interp, name)
    }

    #[test]
    fn arithmetic_loop_counts_down() {
        // sum = n + (n-1) + ... + 1, via a conditional back edge
        let mut body = MethodBody::new(
            UnqualifiedName::from_string("sum".to_owned()).unwrap(),
            MethodAccessFlags::STATIC,
            MethodDescriptor {
                parameters: vec![FieldType::int()],
                return_type: Some(FieldType::int()),
            },
        );
        let list = &mut body.instructions;
        let top = list.fresh_label();
        list.push(Insn::Const(ConstValue::Int(0)));
        list.push(Insn::Store(SlotKind::Int, 1));
        list.push(Insn::Label(top));
        list.push(Insn::Load(SlotKind::Int, 1));
        list.push(Insn::Load(SlotKind::Int, 0));
        list.push(Insn::Simple(Op::IAdd));
        list.push(Insn::Store(SlotKind::Int, 1));
        list.push(Insn::Inc { slot: 0, delta: -1 });
        list.push(Insn::Load(SlotKind::Int, 0));
        list.push(Insn::Jump(JumpCond::IfGt, top));
        list.push(Insn::Load(SlotKind::Int, 1));
        list.push(Insn::Simple(Op::IReturn));
        body.recompute_maxima();

        let (interp, class) = loaded(body);
        let result = interp
            .call(
                &class,
                &UnqualifiedName::from_string("sum".to_owned()).unwrap(),
                vec![Value::Int(4)],
            )
            .unwrap();
        assert_eq!(result, Some(Value::Int(10)));
    }

    #[test]
    fn host_functions_shadow_loaded_methods() {
        let mut body = MethodBody::new(
            UnqualifiedName::from_string("caller".to_owned()).unwrap(),
            MethodAccessFlags::STATIC,
            MethodDescriptor {
                parameters: vec![],
                return_type: Some(FieldType::int()),
            },
        );
        let callee = MemberRef {
            class: BinaryName::from_string("acme/Ext".to_owned()).unwrap(),
            name: UnqualifiedName::from_string("answer".to_owned()).unwrap(),
            descriptor: MethodDescriptor {
                parameters: vec![],
                return_type: Some(FieldType::int()),
            },
        };
        body.instructions
            .push(Insn::Call(CallKind::Static, callee.clone()));
        body.instructions.push(Insn::Simple(Op::IReturn));
        body.recompute_maxima();

        let (interp, class) = loaded(body);
        interp.register_host(
            &callee.class,
            "answer",
            Arc::new(|_, _| Ok(Some(Value::Int(41)))),
        );
        let result = interp
            .call(
                &class,
                &UnqualifiedName::from_string("caller".to_owned()).unwrap(),
                vec![],
            )
            .unwrap();
        assert_eq!(result, Some(Value::Int(41)));
    }

    #[test]
    fn fuel_stops_runaway_loops() {
        let mut body = MethodBody::new(
            UnqualifiedName::from_string("spin".to_owned()).unwrap(),
            MethodAccessFlags::STATIC,
            MethodDescriptor {
                parameters: vec![],
                return_type: None,
            },
        );
        let top = body.instructions.fresh_label();
        body.instructions.push(Insn::Label(top));
        body.instructions.push(Insn::Jump(JumpCond::Goto, top));
        body.recompute_maxima();

        let (interp, class) = loaded(body);
        assert!(interp
            .call(
                &class,
                &UnqualifiedName::from_string("spin".to_owned()).unwrap(),
                vec![],
            )
            .is_err());
    }
}
