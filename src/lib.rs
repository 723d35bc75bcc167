//! Rewrite compiled JVM method bodies at load time, driven by declarative
//! transform requests.
//!
//! The crate is organized around a mutable instruction-list IR for a single
//! method body ([`ir`]), composable rewrite operations over that IR
//! ([`transform`]), a stage composer that stacks independent "wrap" layers on
//! one method while sharing injected state ([`compose`]), and a pipeline that
//! resolves declarative requests into an ordered, transactional run over a
//! whole class ([`transform::pipeline`]).
//!
//! Class bodies enter and leave the engine in their encoded binary form
//! ([`codec`]); structural validation is re-encode, re-decode, sanity-check.
//! Parsing arbitrary class-file containers, format converters, hot reload and
//! the CLI layer are collaborators outside this crate.

pub mod codec;
pub mod compose;
pub mod errors;
pub mod interp;
pub mod ir;
pub mod jvm;
pub mod transform;
pub mod util;

pub use errors::Error;
