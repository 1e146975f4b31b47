//! Error taxonomy for step execution.
//!
//! Failures raised inside the read/process/write loop are never thrown out of
//! a step: they are wrapped into a [`BatchError`] and recorded on the step's
//! ledger. Only [`BatchError::Validation`] (at build time) and
//! [`BatchError::StepExecution`] (when a step is configured to surface
//! failures) ever reach the caller as an `Err`.

use crate::multi::ConsumerPhase;
use crate::status::StepStatus;
use std::time::Duration;
use thiserror::Error;

/// Result alias used by the engine's own fallible operations.
pub type Result<T> = std::result::Result<T, BatchError>;

#[derive(Error, Debug)]
pub enum BatchError {
    /// A step was misconfigured; raised by a builder, never recorded on a status.
    #[error("invalid step configuration: {0}")]
    Validation(String),

    #[error("handshake with {peer} timed out after {after:?}")]
    HandshakeTimeout { peer: String, after: Duration },

    #[error("handshake with {peer} is broken")]
    HandshakeBroken { peer: String },

    #[error("producer failed: {0:#}")]
    Producer(#[source] anyhow::Error),

    #[error("consumer {index} failed in phase {phase}: {source:#}")]
    Consumer {
        index: usize,
        phase: ConsumerPhase,
        #[source]
        source: anyhow::Error,
    },

    #[error("could not persist status of step [{step}]: {source:#}")]
    Persistence {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("resource {resource} failed: {source:#}")]
    Resource {
        resource: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("transaction {action} failed: {source:#}")]
    Transaction {
        action: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A read, process or write call failed in the single-threaded executor.
    #[error("{0:#}")]
    Item(#[source] anyhow::Error),

    /// Summary failure appended by the fan-out orchestrator.
    #[error("{0}")]
    Pipeline(String),

    #[error("step [{}] finished in state {}", .0.name(), .0.state())]
    StepExecution(Box<StepStatus>),
}

impl BatchError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn resource(resource: &'static str, source: anyhow::Error) -> Self {
        Self::Resource { resource, source }
    }

    pub(crate) fn transaction(action: &'static str, source: anyhow::Error) -> Self {
        Self::Transaction { action, source }
    }

    /// The failed status carried by a [`BatchError::StepExecution`].
    #[must_use]
    pub fn status(&self) -> Option<&StepStatus> {
        match self {
            Self::StepExecution(status) => Some(status),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_handshake(&self) -> bool {
        matches!(self, Self::HandshakeTimeout { .. } | Self::HandshakeBroken { .. })
    }
}
