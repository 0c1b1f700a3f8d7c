//! The store seam - the keyed record store an import writes into.
//!
//! Stores are polymorphic over an optional set of bulk verbs. Each store
//! declares what it supports through [`Capabilities`]; the engine consults
//! the declaration before attempting a bulk call and downgrades to per-record
//! calls when a verb is missing. A store that only discovers at call time that
//! it lacks a verb answers with [`StoreError::Unsupported`], which triggers the
//! same downgrade.

use crate::{
    error::{StoreError, StoreResult, Verb},
    Identifier, Record,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Bulk verbs a store declares support for.
///
/// Single-record verbs are mandatory and not listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Capabilities {
    pub get_many: bool,
    pub create_many: bool,
    pub update_many: bool,
}

impl Capabilities {
    /// No bulk verbs.
    pub fn none() -> Self {
        Self::default()
    }

    /// Every bulk verb.
    pub fn all() -> Self {
        Self {
            get_many: true,
            create_many: true,
            update_many: true,
        }
    }

    /// Parse a comma-separated verb list such as `"getMany,createMany"`.
    ///
    /// Unknown names are returned as the error.
    pub fn parse_list(list: &str) -> Result<Self, String> {
        let mut caps = Self::none();
        for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match name {
                "getMany" => caps.get_many = true,
                "createMany" => caps.create_many = true,
                "updateMany" => caps.update_many = true,
                other => return Err(other.to_string()),
            }
        }
        Ok(caps)
    }

    /// Whether the store declares `verb`. Single-record verbs always are.
    pub fn supports(&self, verb: Verb) -> bool {
        match verb {
            Verb::GetMany => self.get_many,
            Verb::CreateMany => self.create_many,
            Verb::UpdateMany => self.update_many,
            Verb::GetOne | Verb::Create | Verb::Update => true,
        }
    }
}

/// A keyed record store, scoped by resource name.
///
/// Bulk verbs default to [`StoreError::Unsupported`]; implement them and
/// declare them in [`RecordStore::capabilities`] to let the engine use them.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Bulk verbs this store implements.
    fn capabilities(&self) -> Capabilities {
        Capabilities::none()
    }

    /// Fetch one record. Absence is [`StoreError::NotFound`].
    async fn get_one(&self, resource: &str, id: &Identifier) -> StoreResult<Record>;

    /// Fetch every existing record among `ids`.
    async fn get_many(&self, _resource: &str, _ids: &[Identifier]) -> StoreResult<Vec<Record>> {
        Err(StoreError::Unsupported(Verb::GetMany))
    }

    /// Create one record, returning what the store persisted.
    async fn create(&self, resource: &str, record: Record) -> StoreResult<Record>;

    /// Create several records in one call.
    async fn create_many(&self, _resource: &str, _records: Vec<Record>) -> StoreResult<Vec<Record>> {
        Err(StoreError::Unsupported(Verb::CreateMany))
    }

    /// Overwrite the record named by `id`.
    async fn update(&self, resource: &str, id: &Identifier, record: Record) -> StoreResult<Record>;

    /// Overwrite several records in one call. `ids[i]` names `records[i]`.
    async fn update_many(
        &self,
        _resource: &str,
        _ids: &[Identifier],
        _records: Vec<Record>,
    ) -> StoreResult<Vec<Record>> {
        Err(StoreError::Unsupported(Verb::UpdateMany))
    }
}
