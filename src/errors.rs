//! Error types for runbook loading and execution.
//!
//! The library distinguishes the error kinds a caller can react to:
//! build errors (nothing ran), expression errors, runner failures,
//! assertion failures, loop exhaustion and cancellation. Breadcrumb
//! wrappers preserve the originating kind so `is_canceled` survives
//! any amount of wrapping.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Loading or parsing failed before any step ran.
    #[error("invalid runbook: {0}")]
    Build(String),

    /// Two runners were declared under the same author key.
    #[error("duplicate runner key: {0}")]
    DuplicateRunnerKey(String),

    /// A step referenced a runner key that was never declared.
    #[error("cannot find runner: {0}")]
    UnknownRunnerKey(String),

    /// An expression failed to lex, parse or evaluate.
    #[error("expression error: {0}")]
    Expr(String),

    /// A protocol runner failed (transport or protocol level).
    #[error("{kind} failed: {message}")]
    Runner { kind: &'static str, message: String },

    /// A `test:` condition evaluated to false.
    #[error("condition is not true\n{tree}")]
    Assertion { condition: String, tree: String },

    /// A loop's `until:` never became true within `count` iterations.
    #[error("retry loop failed ({schedule}): ({condition}) is not true\n{tree}")]
    LoopExhausted {
        condition: String,
        count: usize,
        schedule: String,
        tree: String,
    },

    /// The run was canceled from the outside.
    #[error("canceled")]
    Canceled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Breadcrumb wrapper naming the step (and loop iteration) an error
    /// occurred on.
    #[error("{step}: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<Error>,
    },

    /// Top-level wrapper naming the operator that failed.
    #[error("failed to run {id}: {source}")]
    Operator {
        id: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap this error with the breadcrumb of the step it occurred on.
    pub fn at_step(self, step: impl Into<String>) -> Self {
        Error::Step {
            step: step.into(),
            source: Box::new(self),
        }
    }

    /// Wrap this error with the id of the failing operator.
    pub fn at_operator(self, id: impl Into<String>) -> Self {
        Error::Operator {
            id: id.into(),
            source: Box::new(self),
        }
    }

    /// True when the underlying cause is cancellation, regardless of how
    /// many breadcrumb layers wrap it.
    pub fn is_canceled(&self) -> bool {
        match self {
            Error::Canceled => true,
            Error::Step { source, .. } | Error::Operator { source, .. } => source.is_canceled(),
            _ => false,
        }
    }

    /// True when this is a load-time error (no step has executed).
    pub fn is_build(&self) -> bool {
        matches!(
            self,
            Error::Build(_) | Error::DuplicateRunnerKey(_) | Error::UnknownRunnerKey(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canceled_survives_wrapping() {
        let err = Error::Canceled
            .at_step("'book'.steps[3]")
            .at_operator("ab12cd34");
        assert!(err.is_canceled());
        assert!(err.to_string().contains("failed to run ab12cd34"));
    }

    #[test]
    fn assertion_carries_tree() {
        let err = Error::Assertion {
            condition: "steps[0].res.status == 200".into(),
            tree: "steps[0].res.status == 200\n└── steps[0].res.status => 500".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("not true"));
        assert!(msg.contains("=> 500"));
    }

    #[test]
    fn build_errors_are_classified() {
        assert!(Error::DuplicateRunnerKey("req".into()).is_build());
        assert!(!Error::Canceled.is_build());
    }
}
