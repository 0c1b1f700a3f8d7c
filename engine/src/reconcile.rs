//! Import reconciliation - the coordinator state machine.
//!
//! An [`ImportSession`] drives one import at a time. The caller feeds it
//! [`Input`]s and gets back the next [`Step`]: either a question to answer
//! or the finished run.
//!
//! # Algorithm
//!
//! 1. Transform and validate every row; any rejection aborts before writing
//! 2. Detect which identifiers already exist in the store
//! 3. Create all non-colliding rows immediately
//! 4. Ask for a strategy for the colliding rows (skipped when there are none)
//! 5. Replace all, skip all, or ask for a decision per colliding row, last
//!    collision first
//! 6. Aggregate every outcome, report and refresh
//!
//! Records written in step 3 are never rolled back.

use crate::{
    collision::{self, CollisionDetector, CollisionSet},
    commit::{CommitAction, CommitExecutor, OutcomeReport},
    error::Result,
    log::RunLog,
    options::ImportOptions,
    source::{read_rows, RowSource},
    store::RecordStore,
    validate::validate_all,
    Error, Identifier, Record,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Where a session is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImportState {
    #[default]
    Idle,
    Validating,
    DetectingCollisions,
    AutoCommittingNew,
    AwaitingStrategy,
    BulkReplacing,
    BulkSkipping,
    PerItemDeciding,
    Finalizing,
    /// Transient: the run hit a fatal error and is being torn down.
    Failed,
}

impl std::fmt::Display for ImportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ImportState::Idle => "idle",
            ImportState::Validating => "validating",
            ImportState::DetectingCollisions => "detecting collisions",
            ImportState::AutoCommittingNew => "committing new records",
            ImportState::AwaitingStrategy => "awaiting strategy",
            ImportState::BulkReplacing => "replacing",
            ImportState::BulkSkipping => "skipping",
            ImportState::PerItemDeciding => "deciding per item",
            ImportState::Finalizing => "finalizing",
            ImportState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Policy for every colliding row of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Strategy {
    ReplaceAll,
    SkipAll,
    DecidePerItem,
}

/// Answer for one colliding row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Decision {
    /// Overwrite the stored record.
    Replace,
    /// Create the row as a new record, without its id.
    AddAsNew,
    Skip,
    /// Skip this row and every row still undecided.
    CancelRemaining,
}

/// What a session can be fed.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Start a run over these rows.
    Rows(Vec<Record>),
    Strategy(Strategy),
    Decision(Decision),
    /// Abandon every unresolved row and finish. Already written records stay.
    Cancel,
}

impl Input {
    fn name(&self) -> &'static str {
        match self {
            Input::Rows(_) => "rows",
            Input::Strategy(_) => "strategy",
            Input::Decision(_) => "decision",
            Input::Cancel => "cancel",
        }
    }
}

/// Asks which [`Strategy`] to apply to the colliding rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyRequest {
    /// Rows in the batch.
    pub total: usize,
    /// Non-colliding rows already sent for creation.
    pub created: usize,
    /// Existing identifiers, in detection order.
    pub conflicts: Vec<Identifier>,
    pub replace_enabled: bool,
}

/// Asks for a [`Decision`] on one colliding row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub record: Record,
    /// Undecided rows, this one included.
    pub remaining: usize,
    pub replace_enabled: bool,
    pub add_new_enabled: bool,
}

/// Everything a finished run did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub resource: String,
    pub total: usize,
    /// Number of colliding rows.
    pub conflicts: usize,
    /// Every outcome, auto-created rows first.
    pub reports: Vec<OutcomeReport>,
    /// Colliding rows that were not written.
    pub skipped: usize,
    pub cancelled: bool,
}

impl ImportSummary {
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.succeeded).count()
    }

    pub fn failed(&self) -> Vec<&OutcomeReport> {
        self.reports.iter().filter(|r| !r.succeeded).collect()
    }
}

/// What the caller has to do next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Step {
    ChooseStrategy(StrategyRequest),
    Decide(DecisionRequest),
    Finished(ImportSummary),
}

/// Answers a session's questions, for driving a whole run with
/// [`ImportSession::run`].
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn choose_strategy(&self, request: &StrategyRequest) -> Strategy;

    async fn decide(&self, request: &DecisionRequest) -> Decision;
}

/// State of the run in progress.
#[derive(Debug, Default)]
struct Run {
    total: usize,
    collisions: CollisionSet,
    colliding: Vec<Record>,
    created: usize,
    /// Per-item decisions still owed; the last entry is asked first.
    pending: Vec<Record>,
    reports: Vec<OutcomeReport>,
    skipped: usize,
    cancelled: bool,
}

/// One import into one store resource.
pub struct ImportSession {
    store: Arc<dyn RecordStore>,
    resource: String,
    options: ImportOptions,
    log: RunLog,
    state: ImportState,
    run: Run,
}

impl ImportSession {
    pub fn new(
        store: Arc<dyn RecordStore>,
        resource: impl Into<String>,
        options: ImportOptions,
    ) -> Self {
        let resource = resource.into();
        let log = RunLog::new(&resource, options.logging_enabled);
        Self {
            store,
            resource,
            options,
            log,
            state: ImportState::Idle,
            run: Run::default(),
        }
    }

    pub fn state(&self) -> ImportState {
        self.state
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// Identifiers found to exist during the current run.
    pub fn collisions(&self) -> &CollisionSet {
        &self.run.collisions
    }

    /// Feed one input. An input the current state cannot take, or a disabled
    /// action, is refused and leaves the session as it was.
    pub async fn advance(&mut self, input: Input) -> Result<Step> {
        match (self.state, input) {
            (ImportState::Idle, Input::Rows(rows)) => self.begin(rows).await,
            (ImportState::AwaitingStrategy, Input::Strategy(strategy)) => {
                self.apply_strategy(strategy).await
            }
            (ImportState::PerItemDeciding, Input::Decision(decision)) => {
                self.apply_decision(decision).await
            }
            (ImportState::AwaitingStrategy | ImportState::PerItemDeciding, Input::Cancel) => {
                self.abandon_unresolved();
                self.finalize()
            }
            (state, input) => Err(Error::InvalidTransition {
                state,
                input: input.name(),
            }),
        }
    }

    pub async fn start(&mut self, rows: Vec<Record>) -> Result<Step> {
        self.advance(Input::Rows(rows)).await
    }

    /// Read `source` and start a run over its rows.
    pub async fn start_from<S: RowSource>(&mut self, source: S) -> Result<Step> {
        if self.state != ImportState::Idle {
            return Err(Error::InvalidTransition {
                state: self.state,
                input: "rows",
            });
        }
        let rows = read_rows(source).map_err(|e| {
            self.log.failure("parse", &e);
            e
        })?;
        self.start(rows).await
    }

    pub async fn choose(&mut self, strategy: Strategy) -> Result<Step> {
        self.advance(Input::Strategy(strategy)).await
    }

    pub async fn decide(&mut self, decision: Decision) -> Result<Step> {
        self.advance(Input::Decision(decision)).await
    }

    pub async fn cancel(&mut self) -> Result<Step> {
        self.advance(Input::Cancel).await
    }

    /// Run a whole import, answering every question with `prompter`.
    ///
    /// If the prompter picks an action the session refuses, the unresolved
    /// rows are dropped, the rows already written are reported through the
    /// callbacks, and the refusal is returned.
    pub async fn run(&mut self, rows: Vec<Record>, prompter: &dyn Prompter) -> Result<ImportSummary> {
        let mut step = self.start(rows).await?;
        loop {
            let next = match step {
                Step::Finished(summary) => return Ok(summary),
                Step::ChooseStrategy(request) => {
                    let strategy = prompter.choose_strategy(&request).await;
                    self.choose(strategy).await
                }
                Step::Decide(request) => {
                    let decision = prompter.decide(&request).await;
                    self.decide(decision).await
                }
            };
            step = match next {
                Ok(step) => step,
                Err(refusal) => {
                    // fatal errors have already returned the session to idle
                    if self.state != ImportState::Idle {
                        self.abandon_unresolved();
                        if let Err(e) = self.finalize() {
                            self.log.warn("run", &e);
                        }
                    }
                    return Err(refusal);
                }
            };
        }
    }

    async fn begin(&mut self, rows: Vec<Record>) -> Result<Step> {
        self.run = Run::default();

        self.transition(ImportState::Validating);
        let rows = match &self.options.transform_rows {
            Some(transform) => transform.transform(rows).await,
            None => rows,
        };
        self.run.total = rows.len();
        let validated =
            validate_all(&rows, self.options.validate_row.as_deref(), &self.log).await;
        if let Err(e) = validated {
            return Err(self.fail(e));
        }

        self.transition(ImportState::DetectingCollisions);
        let detector = CollisionDetector::new(self.store.as_ref(), &self.resource, &self.log);
        let detected = detector.detect(&rows, !self.options.disable_bulk_lookup).await;
        let collisions = match detected {
            Ok(collisions) => collisions,
            Err(e) => return Err(self.fail(e)),
        };
        let (fresh, colliding) = collision::partition(rows, &collisions);
        self.log.debug(
            "detect",
            format_args!("{} new, {} colliding", fresh.len(), colliding.len()),
        );

        self.transition(ImportState::AutoCommittingNew);
        self.run.created = fresh.len();
        let reports = self.commit(CommitAction::Create, fresh, true).await;
        self.run.reports.extend(reports);

        self.run.collisions = collisions;
        self.run.colliding = colliding;
        if self.run.colliding.is_empty() {
            return self.finalize();
        }

        self.transition(ImportState::AwaitingStrategy);
        Ok(Step::ChooseStrategy(StrategyRequest {
            total: self.run.total,
            created: self.run.created,
            conflicts: self.run.collisions.ids().to_vec(),
            replace_enabled: !self.options.disable_replace,
        }))
    }

    async fn apply_strategy(&mut self, strategy: Strategy) -> Result<Step> {
        match strategy {
            Strategy::ReplaceAll => {
                if self.options.disable_replace {
                    return Err(Error::ActionDisabled("replace"));
                }
                self.transition(ImportState::BulkReplacing);
                let colliding = std::mem::take(&mut self.run.colliding);
                let reports = self.commit(CommitAction::Overwrite, colliding, true).await;
                self.run.reports.extend(reports);
                self.finalize()
            }
            Strategy::SkipAll => {
                self.transition(ImportState::BulkSkipping);
                self.run.skipped += std::mem::take(&mut self.run.colliding).len();
                self.finalize()
            }
            Strategy::DecidePerItem => {
                self.transition(ImportState::PerItemDeciding);
                self.run.pending = per_item_stack(
                    &self.run.collisions,
                    std::mem::take(&mut self.run.colliding),
                );
                Ok(self.next_decision())
            }
        }
    }

    async fn apply_decision(&mut self, decision: Decision) -> Result<Step> {
        match decision {
            Decision::Replace if self.options.disable_replace => {
                return Err(Error::ActionDisabled("replace"))
            }
            Decision::AddAsNew if self.options.disable_add_new => {
                return Err(Error::ActionDisabled("add as new"))
            }
            Decision::CancelRemaining => {
                self.abandon_unresolved();
                return self.finalize();
            }
            _ => {}
        }

        let Some(record) = self.run.pending.pop() else {
            return self.finalize();
        };
        match decision {
            Decision::Replace => {
                let reports = self.commit(CommitAction::Overwrite, vec![record], false).await;
                self.run.reports.extend(reports);
            }
            Decision::AddAsNew => {
                let reports = self
                    .commit(CommitAction::Create, vec![record.without_id()], false)
                    .await;
                self.run.reports.extend(reports);
            }
            Decision::Skip | Decision::CancelRemaining => self.run.skipped += 1,
        }

        if self.run.pending.is_empty() {
            return self.finalize();
        }
        Ok(self.next_decision())
    }

    fn next_decision(&self) -> Step {
        match self.run.pending.last() {
            Some(record) => Step::Decide(DecisionRequest {
                record: record.clone(),
                remaining: self.run.pending.len(),
                replace_enabled: !self.options.disable_replace,
                add_new_enabled: !self.options.disable_add_new,
            }),
            None => Step::Finished(self.summary()),
        }
    }

    /// Write `records` through the pre-commit hook. `allow_bulk` is further
    /// limited by the matching option.
    async fn commit(
        &self,
        action: CommitAction,
        records: Vec<Record>,
        allow_bulk: bool,
    ) -> Vec<OutcomeReport> {
        if records.is_empty() {
            return Vec::new();
        }
        let records = match &self.options.pre_commit {
            Some(hook) => hook.transform(action, records).await,
            None => records,
        };

        let executor = CommitExecutor::new(self.store.as_ref(), &self.resource, &self.log);
        match action {
            CommitAction::Create => {
                let bulk = allow_bulk && !self.options.disable_bulk_create;
                executor.create_batch(records, bulk).await
            }
            CommitAction::Overwrite => {
                let bulk = allow_bulk && !self.options.disable_bulk_update;
                executor.update_batch(records, bulk).await
            }
        }
    }

    fn abandon_unresolved(&mut self) {
        let colliding = std::mem::take(&mut self.run.colliding).len();
        let pending = std::mem::take(&mut self.run.pending).len();
        self.run.skipped += colliding + pending;
        self.run.cancelled = true;
        self.log.debug(
            "cancel",
            format_args!("{} unresolved rows discarded", colliding + pending),
        );
    }

    fn finalize(&mut self) -> Result<Step> {
        self.transition(ImportState::Finalizing);
        let summary = self.summary();

        if let Some(report) = &self.options.post_commit_report {
            report(&summary.reports);
        }
        if let Some(refresh) = &self.options.on_refresh {
            refresh(&summary);
        }

        let failed: Vec<OutcomeReport> = summary.failed().into_iter().cloned().collect();
        if self.options.post_commit_report.is_none() && !failed.is_empty() {
            let total = summary.reports.len();
            return Err(self.fail(Error::PartialCommitFailure { failed, total }));
        }

        self.log.debug(
            "finalize",
            format_args!(
                "{} of {} commits succeeded, {} skipped",
                summary.succeeded(),
                summary.reports.len(),
                summary.skipped
            ),
        );
        self.reset();
        Ok(Step::Finished(summary))
    }

    fn summary(&self) -> ImportSummary {
        ImportSummary {
            resource: self.resource.clone(),
            total: self.run.total,
            conflicts: self.run.total - self.run.created,
            reports: self.run.reports.clone(),
            skipped: self.run.skipped,
            cancelled: self.run.cancelled,
        }
    }

    /// Surface a fatal error and return to `Idle`.
    fn fail(&mut self, error: Error) -> Error {
        self.transition(ImportState::Failed);
        self.log.failure("failed", &error);
        self.reset();
        error
    }

    fn reset(&mut self) {
        self.run = Run::default();
        self.transition(ImportState::Idle);
    }

    fn transition(&mut self, next: ImportState) {
        self.log.debug("state", format_args!("{} -> {}", self.state, next));
        self.state = next;
    }
}

impl std::fmt::Debug for ImportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportSession")
            .field("resource", &self.resource)
            .field("state", &self.state)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// One entry per colliding row, pushed in collision order so that popping
/// resolves the last collision first.
fn per_item_stack(collisions: &CollisionSet, colliding: Vec<Record>) -> Vec<Record> {
    let mut stack = Vec::with_capacity(colliding.len());
    let mut rows: Vec<Option<Record>> = colliding.into_iter().map(Some).collect();
    for id in collisions.ids() {
        for slot in rows.iter_mut() {
            if slot.as_ref().and_then(Record::id).as_ref() == Some(id) {
                stack.extend(slot.take());
            }
        }
    }
    stack
}
