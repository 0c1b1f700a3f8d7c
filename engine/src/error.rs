//! Error types for the import engine.

use crate::{Identifier, OutcomeReport};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A store verb, used for capability negotiation and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Verb {
    GetOne,
    GetMany,
    Create,
    CreateMany,
    Update,
    UpdateMany,
}

impl Verb {
    /// Whether this verb is an optional bulk capability.
    pub fn is_bulk(self) -> bool {
        matches!(self, Verb::GetMany | Verb::CreateMany | Verb::UpdateMany)
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Verb::GetOne => "getOne",
            Verb::GetMany => "getMany",
            Verb::Create => "create",
            Verb::CreateMany => "createMany",
            Verb::Update => "update",
            Verb::UpdateMany => "updateMany",
        };
        f.write_str(name)
    }
}

/// Errors raised by a [`RecordStore`](crate::RecordStore) call.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum StoreError {
    /// The store does not implement this verb. This is a capability signal,
    /// not a data error.
    #[error("operation not supported by store: {0}")]
    Unsupported(Verb),

    #[error("record not found: {0}")]
    NotFound(Identifier),

    #[error("record has no id")]
    MissingIdentifier,

    /// The store refused the data.
    #[error("rejected by store: {0}")]
    Rejected(String),

    /// The store could not be reached or answered garbage.
    #[error("store transport error: {0}")]
    Transport(String),
}

impl StoreError {
    /// Whether the error only says the store lacks a capability.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, StoreError::Unsupported(_))
    }
}

/// Errors that end an import run.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// A row was rejected by the row validator. Carries the validator's own
    /// message, or a generic one when the rejection was unstructured.
    #[error("{0}")]
    ValidationFailed(String),

    #[error("invalid input document: {0}")]
    InvalidInputDocument(String),

    #[error("collision detection failed: {0}")]
    CollisionDetection(StoreError),

    /// Some commits failed and no post-commit report callback was registered.
    #[error("{} of {total} commits failed", failed.len())]
    PartialCommitFailure {
        failed: Vec<OutcomeReport>,
        total: usize,
    },

    #[error("cannot accept {input} while {state}")]
    InvalidTransition {
        state: crate::ImportState,
        input: &'static str,
    },

    #[error("action disabled by configuration: {0}")]
    ActionDisabled(&'static str),
}

impl Error {
    /// Whether the run was aborted before any record was written.
    pub fn is_pre_mutation(&self) -> bool {
        matches!(
            self,
            Error::ValidationFailed(_)
                | Error::InvalidInputDocument(_)
                | Error::CollisionDetection(_)
        )
    }
}

/// Message used when a validator rejects a row without a structured error.
pub const GENERIC_VALIDATION_MESSAGE: &str = "input does not satisfy the row validation requirements";

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for store calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
