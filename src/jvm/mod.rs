//! JVM-facing vocabulary: names, descriptors, and access flags
//!
//! These types mirror the class-file level concepts the engine manipulates.
//! See the JVM specification sections 4.2 (names) and 4.3 (descriptors).

mod access_flags;
mod descriptors;
mod names;

pub use access_flags::{ClassAccessFlags, MethodAccessFlags};
pub use descriptors::{BaseType, FieldType, MethodDescriptor, ParseDescriptor, RenderDescriptor};
pub use names::{BinaryName, Name, UnqualifiedName};
