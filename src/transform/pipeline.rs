//! The load-time pipeline: resolve requests, run them in priority order,
//! validate, and fail safe

use super::registry::{DeferredRegistry, HandlerRegistry};
use super::requests::{CustomSource, Request};
use super::{custom, merge, modify, overwrite, slice, validate, wrap};
use crate::codec::{decode_class, encode_class};
use crate::errors::Error;
use crate::ir::{clone_body, ClassBody, FieldBody};
use crate::jvm::{BinaryName, Name, UnqualifiedName};
use dashmap::DashMap;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

/// Load-time transformation pipeline
///
/// Requests are attached per class name ahead of time; when a class's
/// encoded body comes through [`Pipeline::transform`], every matching
/// request plus every deferred cross-class entry runs against it. The
/// result only replaces the input if it survives a structural round trip.
pub struct Pipeline {
    requests: DashMap<BinaryName, Vec<Request>>,
    deferred: Arc<DeferredRegistry>,
    handlers: Arc<HandlerRegistry>,
}

impl Default for Pipeline {
    fn default() -> Pipeline {
        Pipeline::new()
    }
}

impl Pipeline {
    pub fn new() -> Pipeline {
        Pipeline::with_registries(
            Arc::new(DeferredRegistry::new()),
            Arc::new(HandlerRegistry::new()),
        )
    }

    pub fn with_registries(
        deferred: Arc<DeferredRegistry>,
        handlers: Arc<HandlerRegistry>,
    ) -> Pipeline {
        Pipeline {
            requests: DashMap::new(),
            deferred,
            handlers,
        }
    }

    pub fn deferred(&self) -> &Arc<DeferredRegistry> {
        &self.deferred
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// Attach one request to a class; requests survive across loads so a
    /// reloaded class is transformed the same way again
    pub fn attach(&self, class: BinaryName, request: Request) {
        self.requests.entry(class).or_default().push(request);
    }

    /// Transform one encoded class body, falling back to the original bytes
    /// when anything goes wrong
    ///
    /// A malformed transform never takes the host down; the class simply
    /// loads untransformed and the failure is logged.
    pub fn transform(&self, name: &BinaryName, bytes: &[u8]) -> Vec<u8> {
        match self.try_transform(name, bytes) {
            Ok(out) => out,
            Err(err) => {
                log::error!("transformation of {:?} failed, keeping original: {}", name, err);
                bytes.to_vec()
            }
        }
    }

    /// Transform a batch of encoded class bodies in parallel
    ///
    /// Entries are isolated: one class failing (and falling back) never
    /// affects the others.
    pub fn transform_batch(
        &self,
        entries: &HashMap<BinaryName, Vec<u8>>,
    ) -> HashMap<BinaryName, Vec<u8>> {
        entries
            .par_iter()
            .map(|(name, bytes)| (name.clone(), self.transform(name, bytes)))
            .collect()
    }

    /// Fallible transformation core; [`Pipeline::transform`] wraps this with
    /// the fail-safe policy
    pub fn try_transform(&self, name: &BinaryName, bytes: &[u8]) -> Result<Vec<u8>, Error> {
        let mut class = decode_class(bytes)?;

        // Cross-class entries parked by earlier surgical requests
        let parked = self.deferred.drain(name);
        let mut ran = 0usize;
        for entry in &parked {
            match entry(&mut class) {
                Ok(()) => ran += 1,
                Err(err) => {
                    log::warn!("deferred transform on {:?} skipped: {}", name, err);
                }
            }
        }

        let mut ordered: Vec<Request> = self
            .requests
            .get(name)
            .map(|requests| requests.clone())
            .unwrap_or_default();
        // Stable, so same-bucket requests keep their attachment order
        ordered.sort_by_key(Request::priority);

        for request in &ordered {
            execute(&mut class, request, &self.handlers, &self.deferred)?;
            ran += 1;
        }

        if ran == 0 {
            return Ok(bytes.to_vec());
        }

        apply_promotions(&mut class);

        let encoded = encode_class(&class)?;
        let round_tripped = decode_class(&encoded)
            .map_err(|cause| Error::validation_caused_by("post-transform decode", cause))?;
        validate::check_class(&round_tripped)
            .map_err(|cause| Error::validation_caused_by("post-transform check", cause))?;
        Ok(encoded)
    }
}

/// Run one request against a decoded class
fn execute(
    class: &mut ClassBody,
    request: &Request,
    handlers: &Arc<HandlerRegistry>,
    deferred: &Arc<DeferredRegistry>,
) -> Result<(), Error> {
    match request {
        Request::Inherit(req) => {
            class.superclass = req.superclass.clone();
            Ok(())
        }
        Request::Interface(req) => {
            if !class.interfaces.contains(&req.interface) {
                class.interfaces.push(req.interface.clone());
            }
            Ok(())
        }
        Request::Annotate(req) => {
            if !class.annotations.contains(&req.annotation) {
                class.annotations.push(req.annotation.clone());
            }
            Ok(())
        }
        Request::Constructor(req) => {
            let (mut body, _) = clone_body(&req.body)?;
            body.name = UnqualifiedName::INIT;
            body.descriptor = req.descriptor.clone();
            body.recompute_maxima();
            match class.find_method(&UnqualifiedName::INIT, Some(&req.descriptor)) {
                Some(index) => class.methods[index] = body,
                None => class.methods.push(body),
            }
            Ok(())
        }
        Request::Proxy(req)
        | Request::Event(req)
        | Request::Control(req)
        | Request::Behavior(req)
        | Request::Lambda(req)
        | Request::Cache(req)
        | Request::Async(req) => match handlers.resolve_class_handler(&req.key) {
            Ok(handler) => handler.transform(class),
            Err(Error::TransformerInstantiationFailure { key }) => {
                // A missing optional handler is a deployment gap, not a
                // reason to drop the whole class
                log::warn!("no handler registered for key '{}', skipping", key);
                Ok(())
            }
            Err(err) => Err(err),
        },
        Request::Overwrite(req) => overwrite::apply(class, req),
        Request::Modify(req) => modify::apply(class, req),
        Request::Wrap(req) => wrap::apply(class, req),
        Request::Slice(req) => slice::apply(class, req),
        Request::Merge(req) => merge::apply(class, req),
        Request::Custom(req) => match &req.source {
            CustomSource::Callback(callback) => {
                custom::apply(class, &req.target, callback.as_ref())
            }
            CustomSource::Key(key) => {
                let handler = handlers.resolve_custom_handler(key)?;
                custom::apply(class, &req.target, handler.as_ref())
            }
        },
        Request::Surgical(req) => {
            let nested = (*req.request).clone();
            let handlers = Arc::clone(handlers);
            let deferred_inner = Arc::clone(deferred);
            deferred.register(
                req.foreign_class.clone(),
                Box::new(move |foreign| {
                    execute(foreign, &nested, &handlers, &deferred_inner)
                }),
            );
            Ok(())
        }
    }
}

/// Turn lifetime-promotion markers into synthetic backing fields
fn apply_promotions(class: &mut ClassBody) {
    const PRIVATE_SYNTHETIC: u16 = 0x0002 | 0x1000;
    let markers = std::mem::take(&mut class.promotions);
    for marker in markers {
        let name = format!("{}${}", marker.method.as_str(), marker.slot);
        let name = match UnqualifiedName::from_string(name) {
            Ok(name) => name,
            Err(msg) => {
                log::warn!("promotion field name rejected: {}", msg);
                continue;
            }
        };
        if class.fields.iter().any(|field| field.name == name) {
            continue;
        }
        class.fields.push(FieldBody {
            name,
            ty: marker.ty,
            access: PRIVATE_SYNTHETIC,
        });
    }
}
