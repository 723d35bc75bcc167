use thiserror::Error;

/// Failures surfaced by the transformation engine
///
/// Every variant carries enough context to be reported on its own; the
/// pipeline never signals a failure through a silent `None`.
#[derive(Debug, Error)]
pub enum Error {
    /// A named method, field, or class is absent and force-create was not
    /// requested
    #[error("target not found: {target}{}", context_suffix(.context))]
    TargetNotFound {
        target: String,
        context: Option<String>,
    },

    /// Slice boundary markers could not be resolved against the instruction
    /// list
    #[error("slice boundary unresolved: {marker}{}", context_suffix(.context))]
    BoundaryUnresolved {
        marker: String,
        context: Option<String>,
    },

    /// Post-transform structural check failed
    #[error("structural validation failed{}", context_suffix(.context))]
    ValidationFailure {
        context: Option<String>,
        #[source]
        cause: Option<Box<Error>>,
    },

    /// A custom transform's callback type could not be constructed
    #[error("transformer '{key}' could not be instantiated")]
    TransformerInstantiationFailure { key: String },

    /// Merge with a FAIL conflict policy hit a missing source
    #[error("merge source missing: {missing}{}", context_suffix(.context))]
    MergeConflict {
        missing: String,
        context: Option<String>,
    },

    /// Encoded class body could not be read or written
    #[error("codec failure")]
    Codec(#[from] std::io::Error),

    /// A name or descriptor embedded in an encoded body is malformed
    #[error("malformed name: {0}")]
    MalformedName(String),
}

impl Error {
    pub fn target_not_found(target: impl Into<String>) -> Error {
        Error::TargetNotFound {
            target: target.into(),
            context: None,
        }
    }

    pub fn boundary_unresolved(marker: impl Into<String>) -> Error {
        Error::BoundaryUnresolved {
            marker: marker.into(),
            context: None,
        }
    }

    pub fn validation(context: impl Into<String>) -> Error {
        Error::ValidationFailure {
            context: Some(context.into()),
            cause: None,
        }
    }

    /// Wrap an underlying failure as the cause of a validation failure
    pub fn validation_caused_by(context: impl Into<String>, cause: Error) -> Error {
        Error::ValidationFailure {
            context: Some(context.into()),
            cause: Some(Box::new(cause)),
        }
    }

    /// Attach a human-readable context string to the error
    pub fn with_context(self, extra: impl Into<String>) -> Error {
        let extra = extra.into();
        match self {
            Error::TargetNotFound { target, .. } => Error::TargetNotFound {
                target,
                context: Some(extra),
            },
            Error::BoundaryUnresolved { marker, .. } => Error::BoundaryUnresolved {
                marker,
                context: Some(extra),
            },
            Error::ValidationFailure { cause, .. } => Error::ValidationFailure {
                context: Some(extra),
                cause,
            },
            Error::MergeConflict { missing, .. } => Error::MergeConflict {
                missing,
                context: Some(extra),
            },
            other => other,
        }
    }
}

fn context_suffix(context: &Option<String>) -> String {
    match context {
        Some(context) => format!(" ({})", context),
        None => String::new(),
    }
}
