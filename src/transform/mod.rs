//! Transform operations and the pipeline that runs them
//!
//! Six method-level operations (overwrite, modify, wrap, slice, merge,
//! custom) are IR-to-IR rewrites; the pipeline resolves declarative requests
//! into a priority-ordered operation list, drains deferred cross-class
//! entries, runs everything transactionally, and gates the result behind
//! structural validation.

pub mod custom;
pub mod merge;
pub mod modify;
pub mod overwrite;
pub mod pipeline;
pub mod registry;
pub mod requests;
pub mod slice;
pub mod validate;
pub mod wrap;

pub use pipeline::Pipeline;
pub use registry::{DeferredRegistry, HandlerRegistry};
pub use requests::Request;
