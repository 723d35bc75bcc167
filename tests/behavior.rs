//! End-to-end behavioral checks: attach requests, push encoded classes
//! through the pipeline, and execute the rewritten bodies

use classweave::codec::{decode_class, encode_class};
use classweave::interp::{Interp, Value};
use classweave::ir::{ClassBody, ConstValue, Insn, MemberRef, MethodBody, Op};
use classweave::jvm::{
    BinaryName, FieldType, MethodAccessFlags, MethodDescriptor, Name, UnqualifiedName,
};
use classweave::transform::requests::{
    ConflictPolicy, MergeRequest, MergeSource, MergeStrategy, MethodTarget, Request, WrapPosition,
    WrapRequest,
};
use classweave::transform::Pipeline;
use std::sync::{Arc, Mutex};

fn name(value: &str) -> UnqualifiedName {
    UnqualifiedName::from_string(value.to_owned()).unwrap()
}

fn class_name(value: &str) -> BinaryName {
    BinaryName::from_string(value.to_owned()).unwrap()
}

fn static_method(method: &str, ret: Option<FieldType>) -> MethodBody {
    MethodBody::new(
        name(method),
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        MethodDescriptor {
            parameters: vec![],
            return_type: ret,
        },
    )
}

fn int_method(method: &str, value: i32) -> MethodBody {
    let mut body = static_method(method, Some(FieldType::int()));
    body.instructions.push(Insn::Const(ConstValue::Int(value)));
    body.instructions.push(Insn::Simple(Op::IReturn));
    body.recompute_maxima();
    body
}

fn str_method(method: &str, value: Option<&str>) -> MethodBody {
    let mut body = static_method(method, Some(FieldType::object(BinaryName::STRING)));
    let constant = match value {
        Some(text) => ConstValue::Str(text.to_owned()),
        None => ConstValue::Null,
    };
    body.instructions.push(Insn::Const(constant));
    body.instructions.push(Insn::Simple(Op::AReturn));
    body.recompute_maxima();
    body
}

/// Run the class through the pipeline and load the decoded result into a
/// fresh interpreter
fn transformed(pipeline: &Pipeline, class: ClassBody) -> (Interp, BinaryName) {
    let class_id = class.name.clone();
    let bytes = encode_class(&class).unwrap();
    let out = pipeline.transform(&class_id, &bytes);
    let interp = Interp::new();
    interp.load_class(decode_class(&out).unwrap());
    (interp, class_id)
}

#[test]
fn wrap_after_sees_the_value_the_caller_receives() {
    let subject = class_name("it/Wrapped");
    let mut class = ClassBody::new(subject.clone());
    class.methods.push(int_method("five", 5));

    let handler = MemberRef {
        class: class_name("it/Trace"),
        name: name("observe"),
        descriptor: MethodDescriptor {
            parameters: vec![FieldType::int()],
            return_type: None,
        },
    };

    let pipeline = Pipeline::new();
    pipeline.attach(
        subject,
        Request::Wrap(WrapRequest {
            target: MethodTarget::named(name("five")),
            position: WrapPosition::After,
            handler: handler.clone(),
            around_body: None,
            capture: true,
            hot_reload: false,
        }),
    );

    let (interp, class_id) = transformed(&pipeline, class);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    interp.register_host(
        &handler.class,
        "observe",
        Arc::new(move |_, args| {
            sink.lock().unwrap().extend(args.iter().cloned());
            Ok(None)
        }),
    );

    let result = interp.call(&class_id, &name("five"), vec![]).unwrap();
    assert_eq!(result, Some(Value::Int(5)));
    assert_eq!(*seen.lock().unwrap(), vec![Value::Int(5)]);
}

#[test]
fn wrap_before_fires_ahead_of_the_original() {
    let subject = class_name("it/Ordered");
    let mut class = ClassBody::new(subject.clone());
    // The original body reports itself through a host call
    let mut body = static_method("step", None);
    let report = MemberRef {
        class: class_name("it/Trace"),
        name: name("original"),
        descriptor: MethodDescriptor {
            parameters: vec![],
            return_type: None,
        },
    };
    body.instructions
        .push(Insn::Call(classweave::ir::CallKind::Static, report));
    body.instructions.push(Insn::Simple(Op::Return));
    body.recompute_maxima();
    class.methods.push(body);

    let handler = MemberRef {
        class: class_name("it/Trace"),
        name: name("guard"),
        descriptor: MethodDescriptor {
            parameters: vec![],
            return_type: None,
        },
    };

    let pipeline = Pipeline::new();
    pipeline.attach(
        subject,
        Request::Wrap(WrapRequest {
            target: MethodTarget::named(name("step")),
            position: WrapPosition::Before,
            handler,
            around_body: None,
            capture: false,
            hot_reload: false,
        }),
    );

    let (interp, class_id) = transformed(&pipeline, class);
    let order = Arc::new(Mutex::new(Vec::new()));
    for label in ["guard", "original"] {
        let sink = Arc::clone(&order);
        interp.register_host(
            &class_name("it/Trace"),
            label,
            Arc::new(move |_, _| {
                sink.lock().unwrap().push(label);
                Ok(None)
            }),
        );
    }

    interp.call(&class_id, &name("step"), vec![]).unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["guard", "original"]);
}

fn merge_request(strategy: MergeStrategy, sentinel: Option<ConstValue>) -> Request {
    Request::Merge(MergeRequest {
        target: MethodTarget::named(name("entry")),
        sources: vec![
            MergeSource {
                target: MethodTarget::named(name("first")),
                priority: 0,
            },
            MergeSource {
                target: MethodTarget::named(name("second")),
                priority: 0,
            },
            MergeSource {
                target: MethodTarget::named(name("third")),
                priority: 0,
            },
        ],
        strategy,
        conflict: ConflictPolicy::Fail,
        sentinel,
        hot_reload: false,
    })
}

#[test]
fn sequential_merge_returns_the_last_result() {
    let subject = class_name("it/Seq");
    let mut class = ClassBody::new(subject.clone());
    class.methods.push(int_method("entry", 0));
    class.methods.push(int_method("first", 1));
    class.methods.push(int_method("second", 2));
    class.methods.push(int_method("third", 3));

    let pipeline = Pipeline::new();
    pipeline.attach(subject, merge_request(MergeStrategy::Sequential, None));

    let (interp, class_id) = transformed(&pipeline, class);
    let result = interp.call(&class_id, &name("entry"), vec![]).unwrap();
    assert_eq!(result, Some(Value::Int(3)));
}

#[test]
fn conditional_merge_returns_the_first_non_null() {
    let subject = class_name("it/Cond");
    let mut class = ClassBody::new(subject.clone());
    class.methods.push(str_method("entry", None));
    // Each source reports through a host call before producing its value
    for (method, value) in [("first", None), ("second", Some("X")), ("third", Some("unreached"))] {
        let mut body = str_method(method, value);
        let first = body.instructions.id_at(0).unwrap();
        body.instructions.insert_before(
            first,
            Insn::Call(
                classweave::ir::CallKind::Static,
                MemberRef {
                    class: class_name("it/Trace"),
                    name: name(method),
                    descriptor: MethodDescriptor {
                        parameters: vec![],
                        return_type: None,
                    },
                },
            ),
        );
        body.recompute_maxima();
        class.methods.push(body);
    }

    let pipeline = Pipeline::new();
    pipeline.attach(subject, merge_request(MergeStrategy::Conditional, None));

    let (interp, class_id) = transformed(&pipeline, class);
    let ran = Arc::new(Mutex::new(Vec::new()));
    for method in ["first", "second", "third"] {
        let sink = Arc::clone(&ran);
        interp.register_host(
            &class_name("it/Trace"),
            method,
            Arc::new(move |_, _| {
                sink.lock().unwrap().push(method);
                Ok(None)
            }),
        );
    }

    let result = interp.call(&class_id, &name("entry"), vec![]).unwrap();
    assert_eq!(result, Some(Value::Str(Arc::from("X"))));
    // The short-circuit must keep the third source from ever running
    assert_eq!(*ran.lock().unwrap(), vec!["first", "second"]);
}

#[test]
fn conditional_merge_with_sentinel_skips_sentinel_results() {
    let subject = class_name("it/Sent");
    let mut class = ClassBody::new(subject.clone());
    class.methods.push(int_method("entry", 0));
    class.methods.push(int_method("first", -1));
    class.methods.push(int_method("second", 8));
    class.methods.push(int_method("third", 9));

    let pipeline = Pipeline::new();
    pipeline.attach(
        subject,
        merge_request(MergeStrategy::Conditional, Some(ConstValue::Int(-1))),
    );

    let (interp, class_id) = transformed(&pipeline, class);
    let result = interp.call(&class_id, &name("entry"), vec![]).unwrap();
    assert_eq!(result, Some(Value::Int(8)));
}

#[test]
fn parallel_merge_runs_every_source() {
    let subject = class_name("it/Par");
    let mut class = ClassBody::new(subject.clone());
    class.methods.push(int_method("entry", 0));
    // Each source reports through a host call before returning
    for (method, value) in [("first", 1), ("second", 2), ("third", 3)] {
        let mut body = static_method(method, Some(FieldType::int()));
        body.instructions.push(Insn::Call(
            classweave::ir::CallKind::Static,
            MemberRef {
                class: class_name("it/Trace"),
                name: name(method),
                descriptor: MethodDescriptor {
                    parameters: vec![],
                    return_type: None,
                },
            },
        ));
        body.instructions.push(Insn::Const(ConstValue::Int(value)));
        body.instructions.push(Insn::Simple(Op::IReturn));
        body.recompute_maxima();
        class.methods.push(body);
    }

    let pipeline = Pipeline::new();
    pipeline.attach(subject, merge_request(MergeStrategy::Parallel, None));

    let (interp, class_id) = transformed(&pipeline, class);
    let ran = Arc::new(Mutex::new(Vec::new()));
    for method in ["first", "second", "third"] {
        let sink = Arc::clone(&ran);
        interp.register_host(
            &class_name("it/Trace"),
            method,
            Arc::new(move |_, _| {
                sink.lock().unwrap().push(method);
                Ok(None)
            }),
        );
    }

    let result = interp.call(&class_id, &name("entry"), vec![]).unwrap();
    // Fan-out yields the last source's value; completion order is free
    assert_eq!(result, Some(Value::Int(3)));
    let mut observed = ran.lock().unwrap().clone();
    observed.sort_unstable();
    assert_eq!(observed, vec!["first", "second", "third"]);
}

#[test]
fn priority_merge_runs_highest_priority_first() {
    let subject = class_name("it/Prio");
    let mut class = ClassBody::new(subject.clone());
    class.methods.push(int_method("entry", 0));
    class.methods.push(int_method("first", 1));
    class.methods.push(int_method("second", 2));
    class.methods.push(int_method("third", 3));

    let pipeline = Pipeline::new();
    pipeline.attach(
        subject,
        Request::Merge(MergeRequest {
            target: MethodTarget::named(name("entry")),
            sources: vec![
                MergeSource {
                    target: MethodTarget::named(name("first")),
                    priority: 10,
                },
                MergeSource {
                    target: MethodTarget::named(name("second")),
                    priority: 20,
                },
                MergeSource {
                    target: MethodTarget::named(name("third")),
                    priority: 15,
                },
            ],
            strategy: MergeStrategy::PriorityBased,
            conflict: ConflictPolicy::Fail,
            sentinel: None,
            hot_reload: false,
        }),
    );

    let (interp, class_id) = transformed(&pipeline, class);
    // Lowest priority runs last, so its value is the one kept
    let result = interp.call(&class_id, &name("entry"), vec![]).unwrap();
    assert_eq!(result, Some(Value::Int(1)));
}

#[test]
fn failed_transformation_leaves_behavior_untouched() {
    let subject = class_name("it/Safe");
    let mut class = ClassBody::new(subject.clone());
    class.methods.push(int_method("answer", 17));

    let pipeline = Pipeline::new();
    // Merge against a source that does not exist, with a FAIL policy
    pipeline.attach(
        subject.clone(),
        Request::Merge(MergeRequest {
            target: MethodTarget::named(name("answer")),
            sources: vec![MergeSource {
                target: MethodTarget::named(name("ghost")),
                priority: 0,
            }],
            strategy: MergeStrategy::Sequential,
            conflict: ConflictPolicy::Fail,
            sentinel: None,
            hot_reload: false,
        }),
    );

    let bytes = encode_class(&class).unwrap();
    let out = pipeline.transform(&subject, &bytes);
    assert_eq!(out, bytes);

    let interp = Interp::new();
    interp.load_class(decode_class(&out).unwrap());
    let result = interp.call(&subject, &name("answer"), vec![]).unwrap();
    assert_eq!(result, Some(Value::Int(17)));
}

#[test]
fn encoded_classes_survive_a_round_trip() {
    let mut class = ClassBody::new(class_name("it/Round"));
    class.interfaces.push(class_name("it/Marker"));
    class.methods.push(int_method("alpha", 1));
    class.methods.push(str_method("beta", Some("text")));

    let bytes = encode_class(&class).unwrap();
    let back = decode_class(&bytes).unwrap();
    assert_eq!(back.name, class.name);
    assert_eq!(back.interfaces, class.interfaces);
    assert_eq!(back.methods.len(), 2);
    let original: Vec<Insn> = class.methods[0].instructions.insns().cloned().collect();
    let decoded: Vec<Insn> = back.methods[0].instructions.insns().cloned().collect();
    assert_eq!(original, decoded);
}
