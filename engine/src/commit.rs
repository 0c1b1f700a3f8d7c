//! Commit execution - writing records and reporting per-record outcomes.
//!
//! A batch is written with one bulk call when allowed and declared by the
//! store. A bulk call the store turns out not to support is replayed as
//! concurrent single calls; any other bulk failure is reported as one failed
//! entry and not retried, since it is presumed to be about the data.

use crate::{
    error::{StoreError, Verb},
    log::RunLog,
    store::RecordStore,
    Identifier, Record,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a commit does to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommitAction {
    /// Insert new records.
    Create,
    /// Replace existing records.
    Overwrite,
}

impl std::fmt::Display for CommitAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitAction::Create => write!(f, "create"),
            CommitAction::Overwrite => write!(f, "overwrite"),
        }
    }
}

/// Result of one commit attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeReport {
    /// The record written, or `None` for the single entry standing for a
    /// whole bulk call.
    pub record: Option<Record>,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StoreError>,
    /// What the store answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl OutcomeReport {
    pub fn success(record: Option<Record>, response: Value) -> Self {
        Self {
            record,
            succeeded: true,
            error: None,
            response: Some(response),
        }
    }

    pub fn failed(record: Option<Record>, error: StoreError) -> Self {
        Self {
            record,
            succeeded: false,
            error: Some(error),
            response: None,
        }
    }

    /// Whether this entry summarizes a bulk call.
    pub fn is_bulk(&self) -> bool {
        self.record.is_none()
    }
}

/// Writes batches of records into one store resource.
pub struct CommitExecutor<'a> {
    store: &'a dyn RecordStore,
    resource: &'a str,
    log: &'a RunLog,
}

impl<'a> CommitExecutor<'a> {
    pub fn new(store: &'a dyn RecordStore, resource: &'a str, log: &'a RunLog) -> Self {
        Self {
            store,
            resource,
            log,
        }
    }

    /// Create every record. An empty batch makes no call.
    pub async fn create_batch(&self, records: Vec<Record>, allow_bulk: bool) -> Vec<OutcomeReport> {
        if records.is_empty() {
            return Vec::new();
        }

        if allow_bulk && self.store.capabilities().supports(Verb::CreateMany) {
            self.log
                .debug("commit", format_args!("createMany with {} records", records.len()));
            match self.store.create_many(self.resource, records.clone()).await {
                Ok(created) => return vec![OutcomeReport::success(None, records_value(created))],
                Err(e) if e.is_unsupported() => self.log.debug(
                    "commit",
                    "createMany not supported by store, using single creates",
                ),
                Err(e) => {
                    self.log.failure("commit", format_args!("createMany failed: {}", e));
                    return vec![OutcomeReport::failed(None, e)];
                }
            }
        }

        self.create_each(records).await
    }

    /// Overwrite every record. Records must carry an id; those that do not
    /// are reported as failed without a store call. An empty batch makes no
    /// call.
    pub async fn update_batch(&self, records: Vec<Record>, allow_bulk: bool) -> Vec<OutcomeReport> {
        if records.is_empty() {
            return Vec::new();
        }

        if allow_bulk && self.store.capabilities().supports(Verb::UpdateMany) {
            let (identified, anonymous): (Vec<Record>, Vec<Record>) =
                records.iter().cloned().partition(Record::has_id);
            let mut reports: Vec<OutcomeReport> = anonymous
                .into_iter()
                .map(|r| OutcomeReport::failed(Some(r), StoreError::MissingIdentifier))
                .collect();
            if identified.is_empty() {
                return reports;
            }

            let ids: Vec<Identifier> = identified.iter().filter_map(Record::id).collect();
            self.log
                .debug("commit", format_args!("updateMany with {} records", ids.len()));
            match self.store.update_many(self.resource, &ids, identified).await {
                Ok(updated) => {
                    reports.push(OutcomeReport::success(None, records_value(updated)));
                    return reports;
                }
                Err(e) if e.is_unsupported() => self.log.debug(
                    "commit",
                    "updateMany not supported by store, using single updates",
                ),
                Err(e) => {
                    self.log.failure("commit", format_args!("updateMany failed: {}", e));
                    reports.push(OutcomeReport::failed(None, e));
                    return reports;
                }
            }
        }

        self.update_each(records).await
    }

    async fn create_each(&self, records: Vec<Record>) -> Vec<OutcomeReport> {
        let creates = records.into_iter().map(|record| async move {
            match self.store.create(self.resource, record.clone()).await {
                Ok(created) => OutcomeReport::success(Some(record), created.into_value()),
                Err(e) => OutcomeReport::failed(Some(record), e),
            }
        });
        let reports = join_all(creates).await;
        self.log_outcome("create", &reports);
        reports
    }

    async fn update_each(&self, records: Vec<Record>) -> Vec<OutcomeReport> {
        let updates = records.into_iter().map(|record| async move {
            let Some(id) = record.id() else {
                return OutcomeReport::failed(Some(record), StoreError::MissingIdentifier);
            };
            match self.store.update(self.resource, &id, record.clone()).await {
                Ok(updated) => OutcomeReport::success(Some(record), updated.into_value()),
                Err(e) => OutcomeReport::failed(Some(record), e),
            }
        });
        let reports = join_all(updates).await;
        self.log_outcome("update", &reports);
        reports
    }

    fn log_outcome(&self, verb: &str, reports: &[OutcomeReport]) {
        let failed = reports.iter().filter(|r| !r.succeeded).count();
        if failed > 0 {
            self.log.failure(
                "commit",
                format_args!("{} of {} single {} calls failed", failed, reports.len(), verb),
            );
        } else {
            self.log
                .debug("commit", format_args!("{} single {} calls", reports.len(), verb));
        }
    }
}

fn records_value(records: Vec<Record>) -> Value {
    Value::Array(records.into_iter().map(Record::into_value).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{memory::MemoryStore, store::Capabilities};
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::try_from(value).unwrap()
    }

    fn fresh() -> Vec<Record> {
        vec![
            record(json!({"title": "a"})),
            record(json!({"title": "bad"})),
            record(json!({"title": "c"})),
        ]
    }

    #[tokio::test]
    async fn empty_batch_makes_no_call() {
        let store = MemoryStore::new().with_capabilities(Capabilities::all());
        let log = RunLog::disabled();
        let exec = CommitExecutor::new(&store, "posts", &log);

        assert!(exec.create_batch(vec![], true).await.is_empty());
        assert!(exec.update_batch(vec![], true).await.is_empty());
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn bulk_create_yields_one_entry() {
        let store = MemoryStore::new().with_capabilities(Capabilities::all());
        let log = RunLog::disabled();
        let exec = CommitExecutor::new(&store, "posts", &log);

        let reports = exec
            .create_batch(vec![record(json!({"title": "a"})), record(json!({"title": "b"}))], true)
            .await;
        assert_eq!(reports.len(), 1);
        assert!(reports[0].succeeded && reports[0].is_bulk());
        assert_eq!(store.calls_to(Verb::CreateMany).len(), 1);
        assert!(store.calls_to(Verb::Create).is_empty());
        assert_eq!(store.len("posts"), 2);
    }

    #[tokio::test]
    async fn single_creates_do_not_abort_siblings() {
        let store = MemoryStore::new();
        store.reject_when("title", json!("bad"));
        let log = RunLog::disabled();
        let exec = CommitExecutor::new(&store, "posts", &log);

        let reports = exec.create_batch(fresh(), false).await;
        let outcome: Vec<bool> = reports.iter().map(|r| r.succeeded).collect();
        assert_eq!(outcome, vec![true, false, true]);
        // request order preserved
        assert_eq!(reports[1].record, Some(record(json!({"title": "bad"}))));
        assert!(matches!(reports[1].error, Some(StoreError::Rejected(_))));
        assert_eq!(store.len("posts"), 2);
    }

    #[tokio::test]
    async fn unsupported_bulk_matches_disabled_bulk() {
        let lying = MemoryStore::new().with_capabilities(Capabilities::all());
        lying.fail_verb(Verb::CreateMany, StoreError::Unsupported(Verb::CreateMany));
        lying.reject_when("title", json!("bad"));
        let honest = MemoryStore::new();
        honest.reject_when("title", json!("bad"));
        let log = RunLog::disabled();

        let negotiated = CommitExecutor::new(&lying, "posts", &log)
            .create_batch(fresh(), true)
            .await;
        let disabled = CommitExecutor::new(&honest, "posts", &log)
            .create_batch(fresh(), false)
            .await;

        assert_eq!(negotiated, disabled);
        assert_eq!(lying.calls_to(Verb::Create).len(), 3);
    }

    #[tokio::test]
    async fn other_bulk_failure_is_opaque() {
        let store = MemoryStore::new().with_capabilities(Capabilities::all());
        store.fail_verb(Verb::CreateMany, StoreError::Rejected("constraint".into()));
        let log = RunLog::disabled();
        let exec = CommitExecutor::new(&store, "posts", &log);

        let reports = exec.create_batch(fresh(), true).await;
        assert_eq!(
            reports,
            vec![OutcomeReport::failed(None, StoreError::Rejected("constraint".into()))]
        );
        assert!(store.calls_to(Verb::Create).is_empty());
    }

    #[tokio::test]
    async fn bulk_update_and_negotiation() {
        let seed = vec![record(json!({"id": 1, "title": "a"})), record(json!({"id": 2, "title": "b"}))];
        let changes = vec![record(json!({"id": 1, "title": "A"})), record(json!({"id": 2, "title": "B"}))];
        let log = RunLog::disabled();

        let bulk = MemoryStore::new()
            .with_capabilities(Capabilities::all())
            .with_records("posts", seed.clone());
        let reports = CommitExecutor::new(&bulk, "posts", &log)
            .update_batch(changes.clone(), true)
            .await;
        assert_eq!(reports.len(), 1);
        assert!(reports[0].succeeded);
        assert_eq!(bulk.calls_to(Verb::UpdateMany)[0].ids, vec![Identifier::Int(1), Identifier::Int(2)]);

        let single = MemoryStore::new()
            .with_capabilities(Capabilities::all())
            .with_records("posts", seed);
        single.fail_verb(Verb::UpdateMany, StoreError::Unsupported(Verb::UpdateMany));
        let reports = CommitExecutor::new(&single, "posts", &log)
            .update_batch(changes, true)
            .await;
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.succeeded && !r.is_bulk()));
        assert_eq!(single.calls_to(Verb::Update).len(), 2);
    }

    #[tokio::test]
    async fn update_without_id_fails_locally() {
        let store = MemoryStore::new()
            .with_records("posts", vec![record(json!({"id": 1, "title": "a"}))]);
        let log = RunLog::disabled();
        let exec = CommitExecutor::new(&store, "posts", &log);

        let reports = exec
            .update_batch(
                vec![record(json!({"title": "orphan"})), record(json!({"id": 1, "title": "A"}))],
                false,
            )
            .await;
        assert_eq!(reports[0].error, Some(StoreError::MissingIdentifier));
        assert!(reports[1].succeeded);
        assert_eq!(store.calls_to(Verb::Update).len(), 1);
    }

    #[tokio::test]
    async fn update_of_missing_record_is_reported() {
        let store = MemoryStore::new();
        let log = RunLog::disabled();
        let exec = CommitExecutor::new(&store, "posts", &log);

        let reports = exec
            .update_batch(vec![record(json!({"id": 8, "title": "ghost"}))], true)
            .await;
        assert_eq!(reports[0].error, Some(StoreError::NotFound(Identifier::Int(8))));
    }
}
