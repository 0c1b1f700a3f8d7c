//! Collision detection - which incoming identifiers already exist.
//!
//! # Algorithm
//!
//! 1. Collect the distinct identifiers of the batch, first occurrence first
//! 2. If bulk lookup is allowed and declared, ask the store once
//! 3. Otherwise (or if that fails) look every identifier up concurrently
//! 4. A single lookup that fails counts as "absent", except when the store
//!    cannot do single lookups at all

use crate::{
    error::{Result, StoreError, Verb},
    log::RunLog,
    store::RecordStore,
    Error, Identifier, Record,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Identifiers present in both the batch and the store.
///
/// Ordered as discovered: store order for a bulk lookup, batch order for
/// single lookups.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollisionSet(Vec<Identifier>);

impl CollisionSet {
    pub fn new(ids: Vec<Identifier>) -> Self {
        Self(ids)
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.0.contains(id)
    }

    pub fn ids(&self) -> &[Identifier] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<Identifier> {
        self.0
    }
}

/// Distinct identifiers of a batch, in first-seen order.
pub fn candidate_ids(records: &[Record]) -> Vec<Identifier> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(Record::id)
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// Split a batch into `(non_colliding, colliding)`, preserving row order.
pub fn partition(records: Vec<Record>, collisions: &CollisionSet) -> (Vec<Record>, Vec<Record>) {
    records.into_iter().partition(|record| match record.id() {
        Some(id) => !collisions.contains(&id),
        None => true,
    })
}

/// Finds identifiers of a batch that already exist in a store resource.
pub struct CollisionDetector<'a> {
    store: &'a dyn RecordStore,
    resource: &'a str,
    log: &'a RunLog,
}

impl<'a> CollisionDetector<'a> {
    pub fn new(store: &'a dyn RecordStore, resource: &'a str, log: &'a RunLog) -> Self {
        Self {
            store,
            resource,
            log,
        }
    }

    /// Detect which identified records of `records` collide.
    ///
    /// Records without an id never collide; a batch without any id does not
    /// touch the store.
    pub async fn detect(&self, records: &[Record], allow_bulk: bool) -> Result<CollisionSet> {
        let candidates = candidate_ids(records);
        if candidates.is_empty() {
            self.log.debug("detect", "no identified rows, nothing to look up");
            return Ok(CollisionSet::default());
        }

        if allow_bulk && self.store.capabilities().supports(Verb::GetMany) {
            match self.store.get_many(self.resource, &candidates).await {
                Ok(found) => {
                    let set = bulk_collisions(&candidates, found);
                    self.log.debug(
                        "detect",
                        format_args!("bulk lookup: {} of {} exist", set.len(), candidates.len()),
                    );
                    return Ok(set);
                }
                Err(e) => self.log.warn(
                    "detect",
                    format_args!("bulk lookup failed, using single lookups: {}", e),
                ),
            }
        }

        self.detect_single(&candidates).await
    }

    async fn detect_single(&self, candidates: &[Identifier]) -> Result<CollisionSet> {
        let lookups = candidates.iter().map(|id| async move {
            let result = self.store.get_one(self.resource, id).await;
            (id, result)
        });

        let mut existing = Vec::new();
        for (id, result) in join_all(lookups).await {
            match result {
                Ok(_) => existing.push(id.clone()),
                Err(StoreError::NotFound(_)) => {}
                Err(e @ StoreError::Unsupported(_)) => {
                    self.log.failure("detect", format_args!("store cannot look up records: {}", e));
                    return Err(Error::CollisionDetection(e));
                }
                // TODO: surface transient lookup faults instead of reading them as "absent"
                Err(e) => self.log.warn(
                    "detect",
                    format_args!("lookup of {} failed, treating as absent: {}", id, e),
                ),
            }
        }

        self.log.debug(
            "detect",
            format_args!("single lookups: {} of {} exist", existing.len(), candidates.len()),
        );
        Ok(CollisionSet(existing))
    }
}

/// Keep the store's order, drop anything that was not asked for or repeats.
fn bulk_collisions(candidates: &[Identifier], found: Vec<Record>) -> CollisionSet {
    let asked: HashSet<&Identifier> = candidates.iter().collect();
    let mut seen = HashSet::new();
    let ids = found
        .iter()
        .filter_map(Record::id)
        .filter(|id| asked.contains(id) && seen.insert(id.clone()))
        .collect();
    CollisionSet(ids)
}
