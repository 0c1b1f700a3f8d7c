//! In-process [`RecordStore`] with an inspectable call log.
//!
//! `MemoryStore` is the reference store used by the test suites and
//! benchmarks. It honours its declared [`Capabilities`], records every call it
//! receives, and can be told to fail a verb or reject particular records.

use crate::{
    error::{StoreError, StoreResult, Verb},
    store::{Capabilities, RecordStore},
    Identifier, Record, ID_FIELD,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One call received by a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoreCall {
    pub verb: Verb,
    pub resource: String,
    /// Identifiers named by the call (lookups and updates).
    pub ids: Vec<Identifier>,
    /// Records carried by the call (creates and updates).
    pub records: Vec<Record>,
}

/// Records of one resource, keyed by identifier.
#[derive(Debug, Clone, Default)]
struct Collection {
    records: BTreeMap<Identifier, Record>,
}

#[derive(Debug, Default)]
struct State {
    collections: HashMap<String, Collection>,
    calls: Vec<StoreCall>,
    failures: HashMap<Verb, StoreError>,
    rejections: Vec<(String, Value)>,
    last_generated: i64,
}

impl State {
    fn log(&mut self, verb: Verb, resource: &str, ids: Vec<Identifier>, records: Vec<Record>) {
        self.calls.push(StoreCall {
            verb,
            resource: resource.to_string(),
            ids,
            records,
        });
    }

    fn injected(&self, verb: Verb) -> StoreResult<()> {
        match self.failures.get(&verb) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn check_rejected(&self, record: &Record) -> StoreResult<()> {
        for (field, value) in &self.rejections {
            if record.get_path(field) == Some(value) {
                return Err(StoreError::Rejected(format!("{} = {}", field, value)));
            }
        }
        Ok(())
    }

    fn collection(&mut self, resource: &str) -> &mut Collection {
        self.collections.entry(resource.to_string()).or_default()
    }

    fn contains(&self, resource: &str, id: &Identifier) -> bool {
        self.collections
            .get(resource)
            .map(|c| c.records.contains_key(id))
            .unwrap_or(false)
    }

    fn highest_id(&self) -> i64 {
        let max_existing = self
            .collections
            .values()
            .flat_map(|c| c.records.keys())
            .filter_map(|id| match id {
                Identifier::Int(i) => Some(*i),
                Identifier::Str(_) => None,
            })
            .max()
            .unwrap_or(0);
        self.last_generated.max(max_existing)
    }

    /// Fail unless `count` more ids can be generated.
    fn check_id_room(&self, count: usize) -> StoreResult<()> {
        let room = i64::try_from(count)
            .ok()
            .and_then(|count| self.highest_id().checked_add(count));
        match room {
            Some(_) => Ok(()),
            None => Err(StoreError::Rejected("no integer ids left to assign".into())),
        }
    }

    fn next_id(&mut self) -> StoreResult<Identifier> {
        self.check_id_room(1)?;
        self.last_generated = self.highest_id() + 1;
        Ok(Identifier::Int(self.last_generated))
    }

    /// Validate a create without applying it.
    fn check_create(&self, resource: &str, record: &Record) -> StoreResult<()> {
        self.check_rejected(record)?;
        if let Some(id) = record.id() {
            if self.contains(resource, &id) {
                return Err(StoreError::Rejected(format!("duplicate id {}", id)));
            }
        }
        Ok(())
    }

    fn apply_create(&mut self, resource: &str, mut record: Record) -> StoreResult<Record> {
        let id = match record.id() {
            Some(id) => id,
            None => {
                let id = self.next_id()?;
                record.set(ID_FIELD, id.to_value());
                id
            }
        };
        self.collection(resource).records.insert(id, record.clone());
        Ok(record)
    }

    fn check_update(&self, resource: &str, id: &Identifier, record: &Record) -> StoreResult<()> {
        if !self.contains(resource, id) {
            return Err(StoreError::NotFound(id.clone()));
        }
        self.check_rejected(record)
    }

    fn apply_update(&mut self, resource: &str, id: &Identifier, mut record: Record) -> Record {
        record.set(ID_FIELD, id.to_value());
        self.collection(resource)
            .records
            .insert(id.clone(), record.clone());
        record
    }
}

/// Thread-safe in-memory record store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    capabilities: Capabilities,
    state: Mutex<State>,
}

impl MemoryStore {
    /// Empty store without bulk verbs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare bulk verbs.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Seed a resource. Records without an id are skipped. Seeding is not logged.
    pub fn with_records(self, resource: &str, records: impl IntoIterator<Item = Record>) -> Self {
        {
            let mut state = self.lock();
            for record in records {
                if let Some(id) = record.id() {
                    state.collection(resource).records.insert(id, record);
                }
            }
        }
        self
    }

    /// Make every call to `verb` fail with `error`.
    pub fn fail_verb(&self, verb: Verb, error: StoreError) {
        self.lock().failures.insert(verb, error);
    }

    /// Reject creates and updates of records whose dot-path `field` equals `value`.
    pub fn reject_when(&self, field: &str, value: Value) {
        self.lock().rejections.push((field.to_string(), value));
    }

    /// Every call received so far, in arrival order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    /// Calls to one verb.
    pub fn calls_to(&self, verb: Verb) -> Vec<StoreCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.verb == verb)
            .cloned()
            .collect()
    }

    /// Number of calls received.
    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Forget the call log.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Stored record, if any.
    pub fn get(&self, resource: &str, id: &Identifier) -> Option<Record> {
        self.lock()
            .collections
            .get(resource)
            .and_then(|c| c.records.get(id).cloned())
    }

    /// Number of records in a resource.
    pub fn len(&self, resource: &str) -> usize {
        self.lock()
            .collections
            .get(resource)
            .map(|c| c.records.len())
            .unwrap_or(0)
    }

    /// Whether a resource holds no records.
    pub fn is_empty(&self, resource: &str) -> bool {
        self.len(resource) == 0
    }

    /// All records of a resource, ordered by identifier.
    pub fn records(&self, resource: &str) -> Vec<Record> {
        self.lock()
            .collections
            .get(resource)
            .map(|c| c.records.values().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn get_one(&self, resource: &str, id: &Identifier) -> StoreResult<Record> {
        let mut state = self.lock();
        state.log(Verb::GetOne, resource, vec![id.clone()], vec![]);
        state.injected(Verb::GetOne)?;
        state
            .collections
            .get(resource)
            .and_then(|c| c.records.get(id).cloned())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn get_many(&self, resource: &str, ids: &[Identifier]) -> StoreResult<Vec<Record>> {
        let mut state = self.lock();
        state.log(Verb::GetMany, resource, ids.to_vec(), vec![]);
        if !self.capabilities.get_many {
            return Err(StoreError::Unsupported(Verb::GetMany));
        }
        state.injected(Verb::GetMany)?;
        let found = match state.collections.get(resource) {
            Some(c) => ids.iter().filter_map(|id| c.records.get(id).cloned()).collect(),
            None => Vec::new(),
        };
        Ok(found)
    }

    async fn create(&self, resource: &str, record: Record) -> StoreResult<Record> {
        let mut state = self.lock();
        state.log(Verb::Create, resource, vec![], vec![record.clone()]);
        state.injected(Verb::Create)?;
        state.check_create(resource, &record)?;
        state.apply_create(resource, record)
    }

    async fn create_many(&self, resource: &str, records: Vec<Record>) -> StoreResult<Vec<Record>> {
        let mut state = self.lock();
        state.log(Verb::CreateMany, resource, vec![], records.clone());
        if !self.capabilities.create_many {
            return Err(StoreError::Unsupported(Verb::CreateMany));
        }
        state.injected(Verb::CreateMany)?;
        // all or nothing
        let mut batch_ids = BTreeSet::new();
        let mut unidentified = 0;
        for record in &records {
            state.check_create(resource, record)?;
            match record.id() {
                Some(id) if !batch_ids.insert(id.clone()) => {
                    return Err(StoreError::Rejected(format!("duplicate id {}", id)));
                }
                Some(_) => {}
                None => unidentified += 1,
            }
        }
        state.check_id_room(unidentified)?;
        records
            .into_iter()
            .map(|r| state.apply_create(resource, r))
            .collect()
    }

    async fn update(&self, resource: &str, id: &Identifier, record: Record) -> StoreResult<Record> {
        let mut state = self.lock();
        state.log(Verb::Update, resource, vec![id.clone()], vec![record.clone()]);
        state.injected(Verb::Update)?;
        state.check_update(resource, id, &record)?;
        Ok(state.apply_update(resource, id, record))
    }

    async fn update_many(
        &self,
        resource: &str,
        ids: &[Identifier],
        records: Vec<Record>,
    ) -> StoreResult<Vec<Record>> {
        let mut state = self.lock();
        state.log(Verb::UpdateMany, resource, ids.to_vec(), records.clone());
        if !self.capabilities.update_many {
            return Err(StoreError::Unsupported(Verb::UpdateMany));
        }
        state.injected(Verb::UpdateMany)?;
        if ids.len() != records.len() {
            return Err(StoreError::Rejected(format!(
                "{} ids for {} records",
                ids.len(),
                records.len()
            )));
        }
        for (id, record) in ids.iter().zip(&records) {
            state.check_update(resource, id, record)?;
        }
        Ok(ids
            .iter()
            .zip(records)
            .map(|(id, r)| state.apply_update(resource, id, r))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::try_from(value).unwrap()
    }

    fn seeded() -> MemoryStore {
        MemoryStore::new().with_records(
            "posts",
            vec![
                record(json!({"id": 2, "title": "X"})),
                record(json!({"id": 3, "title": "Y"})),
            ],
        )
    }

    #[tokio::test]
    async fn single_verbs() {
        let store = seeded();
        assert_eq!(store.len("posts"), 2);

        let found = store.get_one("posts", &Identifier::Int(2)).await.unwrap();
        assert_eq!(found.get("title"), Some(&json!("X")));
        assert_eq!(
            store.get_one("posts", &Identifier::Int(9)).await,
            Err(StoreError::NotFound(Identifier::Int(9)))
        );

        let created = store
            .create("posts", record(json!({"title": "fresh"})))
            .await
            .unwrap();
        assert_eq!(created.id(), Some(Identifier::Int(4)));

        let updated = store
            .update("posts", &Identifier::Int(2), record(json!({"title": "X2"})))
            .await
            .unwrap();
        assert_eq!(updated.id(), Some(Identifier::Int(2)));
        assert_eq!(
            store.get("posts", &Identifier::Int(2)).unwrap().get("title"),
            Some(&json!("X2"))
        );

        assert_eq!(store.call_count(), 4);
        assert_eq!(store.calls_to(Verb::Create).len(), 1);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let store = seeded();
        let err = store
            .create("posts", record(json!({"id": 2, "title": "again"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
    }

    #[tokio::test]
    async fn bulk_verbs_follow_capabilities() {
        let store = seeded();
        assert_eq!(
            store.get_many("posts", &[Identifier::Int(2)]).await,
            Err(StoreError::Unsupported(Verb::GetMany))
        );
        // the attempt is still logged
        assert_eq!(store.calls_to(Verb::GetMany).len(), 1);

        let store = seeded().with_capabilities(Capabilities::all());
        let found = store
            .get_many(
                "posts",
                &[Identifier::Int(3), Identifier::Int(7), Identifier::Int(2)],
            )
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().filter_map(Record::id).collect();
        assert_eq!(ids, vec![Identifier::Int(3), Identifier::Int(2)]);
    }

    #[tokio::test]
    async fn create_many_is_all_or_nothing() {
        let store = seeded().with_capabilities(Capabilities::all());
        store.reject_when("title", json!("bad"));

        let err = store
            .create_many(
                "posts",
                vec![record(json!({"title": "ok"})), record(json!({"title": "bad"}))],
            )
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Rejected("title = \"bad\"".into()));
        assert_eq!(store.len("posts"), 2);
    }

    #[tokio::test]
    async fn create_many_rejects_ids_repeated_in_batch() {
        let store = seeded().with_capabilities(Capabilities::all());
        let batch = vec![
            record(json!({"id": 5, "title": "first"})),
            record(json!({"id": 5, "title": "second"})),
        ];

        let err = store.create_many("posts", batch.clone()).await.unwrap_err();
        assert_eq!(err, StoreError::Rejected("duplicate id 5".into()));
        assert_eq!(store.len("posts"), 2);

        // same outcome one record at a time
        store.create("posts", batch[0].clone()).await.unwrap();
        let err = store.create("posts", batch[1].clone()).await.unwrap_err();
        assert_eq!(err, StoreError::Rejected("duplicate id 5".into()));
        assert_eq!(
            store.get("posts", &Identifier::Int(5)).unwrap().get("title"),
            Some(&json!("first"))
        );
    }

    #[tokio::test]
    async fn generated_ids_stop_at_the_top() {
        let store = MemoryStore::new()
            .with_capabilities(Capabilities::all())
            .with_records("posts", vec![record(json!({"id": i64::MAX}))]);

        let err = store
            .create("posts", record(json!({"title": "one more"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));

        let err = store
            .create_many(
                "posts",
                vec![record(json!({"id": 1})), record(json!({"title": "no id"}))],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert_eq!(store.len("posts"), 1);
    }

    #[tokio::test]
    async fn injected_failures() {
        let store = seeded();
        store.fail_verb(Verb::Update, StoreError::Transport("down".into()));
        let err = store
            .update("posts", &Identifier::Int(2), record(json!({"title": "z"})))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Transport("down".into()));
    }

    #[tokio::test]
    async fn update_many_checks_pairing() {
        let store = seeded().with_capabilities(Capabilities::all());
        let err = store
            .update_many("posts", &[Identifier::Int(2)], vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));

        let updated = store
            .update_many(
                "posts",
                &[Identifier::Int(2), Identifier::Int(3)],
                vec![record(json!({"title": "a"})), record(json!({"title": "b"}))],
            )
            .await
            .unwrap();
        assert_eq!(updated.len(), 2);
        assert_eq!(
            store.get("posts", &Identifier::Int(3)).unwrap().get("title"),
            Some(&json!("b"))
        );
    }
}
