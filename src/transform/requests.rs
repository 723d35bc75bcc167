//! Declarative transform requests
//!
//! Requests are ordinary tagged configuration structs: converters (JSON,
//! YAML, annotations, builders) produce them, the pipeline consumes them
//! once at resolution time. The engine never scans anything reflectively.
//! Every request carries a `hot_reload` flag that is read by the hot-reload
//! collaborator, not by this engine.

use crate::ir::{Boundary, ConstValue, Insn, MemberRef, MethodBody};
use crate::jvm::{BaseType, BinaryName, MethodDescriptor, UnqualifiedName};
use std::sync::Arc;

/// Method addressed by name, optionally narrowed by descriptor
#[derive(Clone, Debug)]
pub struct MethodTarget {
    pub name: UnqualifiedName,
    pub descriptor: Option<MethodDescriptor>,
}

impl MethodTarget {
    pub fn named(name: UnqualifiedName) -> MethodTarget {
        MethodTarget {
            name,
            descriptor: None,
        }
    }
}

/// Which local slot a modify request addresses
#[derive(Clone, Debug)]
pub enum SlotSelector {
    Named(String),
    Index(u16),
}

/// Sub-mode of a modify request
#[derive(Clone, Debug)]
pub enum ModifyMode {
    /// Intercept stores to the slot (or loads of a matching literal) with a
    /// call to a type-specific hook
    Value {
        slot: Option<SlotSelector>,
        literal: Option<ConstValue>,
        hook: MemberRef,
    },
    /// Widen the slot's declared type, rewriting every load and store
    Type {
        slot: SlotSelector,
        widen_to: BaseType,
    },
    /// Extend the slot's debug range to cover the whole method
    Scope { slot: SlotSelector },
    /// Request promotion of the slot to field-backed storage (consumed by a
    /// later class-level pass)
    Lifetime { slot: SlotSelector },
}

/// Where wrap glue runs relative to the backed-up original
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WrapPosition {
    Before,
    After,
    Both,
    Around,
}

/// Merge dispatch strategy
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MergeStrategy {
    Sequential,
    Parallel,
    Conditional,
    PriorityBased,
}

/// What to do when a named merge source is missing
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConflictPolicy {
    Fail,
    Skip,
}

/// One merge source with its priority (used by `PriorityBased`)
#[derive(Clone, Debug)]
pub struct MergeSource {
    pub target: MethodTarget,
    pub priority: i32,
}

/// What to slice out and what to do with it
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SliceMode {
    Extract,
    Remove,
    Replace,
    Copy,
    Move,
}

/// User-supplied transactional transform over one method body
///
/// The engine snapshots the body before the call and restores it if the
/// callback (or post-callback validation) fails.
pub trait CustomTransform: Send + Sync {
    fn transform(
        &self,
        class: &mut crate::ir::ClassBody,
        body: &mut MethodBody,
    ) -> Result<(), crate::Error>;
}

impl<F> CustomTransform for F
where
    F: Fn(&mut crate::ir::ClassBody, &mut MethodBody) -> Result<(), crate::Error> + Send + Sync,
{
    fn transform(
        &self,
        class: &mut crate::ir::ClassBody,
        body: &mut MethodBody,
    ) -> Result<(), crate::Error> {
        self(class, body)
    }
}

/// Where a custom transform comes from: an already-built callback, or a key
/// resolved through the handler registry
#[derive(Clone)]
pub enum CustomSource {
    Callback(Arc<dyn CustomTransform>),
    Key(String),
}

impl std::fmt::Debug for CustomSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CustomSource::Callback(_) => f.write_str("Callback(..)"),
            CustomSource::Key(key) => write!(f, "Key({})", key),
        }
    }
}

#[derive(Clone, Debug)]
pub struct OverwriteRequest {
    pub target: MethodTarget,
    pub source: MethodBody,
    pub force: bool,
    pub hot_reload: bool,
}

#[derive(Clone, Debug)]
pub struct ModifyRequest {
    pub target: MethodTarget,
    pub mode: ModifyMode,
    pub hot_reload: bool,
}

#[derive(Clone, Debug)]
pub struct WrapRequest {
    pub target: MethodTarget,
    pub position: WrapPosition,
    pub handler: MemberRef,
    /// Body installed verbatim by `Around` (it is expected to call the
    /// backup itself); ignored by the other positions
    pub around_body: Option<MethodBody>,
    /// Duplicate the return value on the stack before passing it to the
    /// handler
    pub capture: bool,
    pub hot_reload: bool,
}

#[derive(Clone, Debug)]
pub struct SliceRequest {
    pub target: MethodTarget,
    pub boundary: Boundary,
    pub mode: SliceMode,
    /// New (Extract/Copy) or existing (Move) method receiving the fragment
    pub destination: Option<UnqualifiedName>,
    /// Instructions standing in for the removed range under `Replace`
    pub replacement: Option<Vec<Insn>>,
    pub hot_reload: bool,
}

#[derive(Clone, Debug)]
pub struct MergeRequest {
    pub target: MethodTarget,
    pub sources: Vec<MergeSource>,
    pub strategy: MergeStrategy,
    pub conflict: ConflictPolicy,
    /// "No result, keep going" marker required by `Conditional` over a
    /// primitive return type
    pub sentinel: Option<ConstValue>,
    pub hot_reload: bool,
}

#[derive(Clone, Debug)]
pub struct CustomRequest {
    pub target: MethodTarget,
    pub source: CustomSource,
    pub hot_reload: bool,
}

/// Class-level structural requests and handler-backed requests
#[derive(Clone, Debug)]
pub struct ConstructorRequest {
    pub descriptor: MethodDescriptor,
    pub body: MethodBody,
    pub hot_reload: bool,
}

#[derive(Clone, Debug)]
pub struct InterfaceRequest {
    pub interface: BinaryName,
    pub hot_reload: bool,
}

#[derive(Clone, Debug)]
pub struct InheritRequest {
    pub superclass: BinaryName,
    pub hot_reload: bool,
}

#[derive(Clone, Debug)]
pub struct AnnotateRequest {
    pub annotation: BinaryName,
    pub hot_reload: bool,
}

/// Request resolved through the handler registry by key
#[derive(Clone, Debug)]
pub struct HandlerRequest {
    pub key: String,
    pub hot_reload: bool,
}

/// Cross-class injection: the nested request is deferred until the foreign
/// class reaches the pipeline
#[derive(Clone, Debug)]
pub struct SurgicalRequest {
    pub foreign_class: BinaryName,
    pub request: Box<Request>,
    pub hot_reload: bool,
}

/// One declarative request attached to a class
#[derive(Clone, Debug)]
pub enum Request {
    Inherit(InheritRequest),
    Interface(InterfaceRequest),
    Constructor(ConstructorRequest),
    Annotate(AnnotateRequest),
    Proxy(HandlerRequest),
    Event(HandlerRequest),
    Control(HandlerRequest),
    Behavior(HandlerRequest),
    Lambda(HandlerRequest),
    Overwrite(OverwriteRequest),
    Modify(ModifyRequest),
    Wrap(WrapRequest),
    Slice(SliceRequest),
    Merge(MergeRequest),
    Custom(CustomRequest),
    Surgical(SurgicalRequest),
    Cache(HandlerRequest),
    Async(HandlerRequest),
}

/// Priority bucket a request resolves into; buckets order the pipeline run
/// and the sort is stable within a bucket
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Inherit,
    Interface,
    Constructor,
    Annotate,
    Overwrite,
    Modify,
    Wrap,
    SurgicalInject,
    Cache,
    Async,
}

impl Request {
    /// Fixed priority bucket for this request kind
    pub fn priority(&self) -> Priority {
        match self {
            Request::Inherit(_) => Priority::Inherit,
            Request::Interface(_) => Priority::Interface,
            Request::Constructor(_) => Priority::Constructor,
            // Handler-backed class-level requests run with the annotation
            // bucket, before any method-level rewrite
            Request::Annotate(_)
            | Request::Proxy(_)
            | Request::Event(_)
            | Request::Control(_)
            | Request::Behavior(_)
            | Request::Lambda(_) => Priority::Annotate,
            Request::Overwrite(_) => Priority::Overwrite,
            Request::Modify(_) | Request::Slice(_) | Request::Merge(_) => Priority::Modify,
            Request::Wrap(_) | Request::Custom(_) => Priority::Wrap,
            Request::Surgical(_) => Priority::SurgicalInject,
            Request::Cache(_) => Priority::Cache,
            Request::Async(_) => Priority::Async,
        }
    }
}
