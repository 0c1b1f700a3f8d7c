//! Run configuration: feature switches and caller hooks.

use crate::{
    commit::{CommitAction, OutcomeReport},
    reconcile::ImportSummary,
    validate::RowValidator,
    Record,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Rewrites the whole batch before validation.
#[async_trait]
pub trait RowTransform: Send + Sync {
    async fn transform(&self, rows: Vec<Record>) -> Vec<Record>;
}

/// Rewrites records right before they are written.
#[async_trait]
pub trait PreCommitTransform: Send + Sync {
    async fn transform(&self, action: CommitAction, records: Vec<Record>) -> Vec<Record>;
}

/// Receives every outcome of a run. Registering one turns partial commit
/// failure from a run error into something the callback reports.
pub type ReportCallback = Arc<dyn Fn(&[OutcomeReport]) + Send + Sync>;

/// Invoked once at the end of every finished run, e.g. to reload a view.
pub type RefreshCallback = Arc<dyn Fn(&ImportSummary) + Send + Sync>;

/// Options for one import run.
///
/// The switches deserialize from camelCase keys; hooks are code and are set
/// with the `with_*` builders.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportOptions {
    pub disable_bulk_create: bool,
    pub disable_bulk_update: bool,
    pub disable_bulk_lookup: bool,
    /// Hide the "add as new" per-item decision.
    pub disable_add_new: bool,
    /// Hide every replace action, bulk and per-item.
    pub disable_replace: bool,
    pub logging_enabled: bool,

    #[serde(skip)]
    pub validate_row: Option<Arc<dyn RowValidator>>,
    #[serde(skip)]
    pub transform_rows: Option<Arc<dyn RowTransform>>,
    #[serde(skip)]
    pub pre_commit: Option<Arc<dyn PreCommitTransform>>,
    #[serde(skip)]
    pub post_commit_report: Option<ReportCallback>,
    #[serde(skip)]
    pub on_refresh: Option<RefreshCallback>,
}

impl ImportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_validator(mut self, validator: impl RowValidator + 'static) -> Self {
        self.validate_row = Some(Arc::new(validator));
        self
    }

    pub fn with_row_transform(mut self, transform: impl RowTransform + 'static) -> Self {
        self.transform_rows = Some(Arc::new(transform));
        self
    }

    pub fn with_pre_commit(mut self, transform: impl PreCommitTransform + 'static) -> Self {
        self.pre_commit = Some(Arc::new(transform));
        self
    }

    pub fn with_report(
        mut self,
        callback: impl Fn(&[OutcomeReport]) + Send + Sync + 'static,
    ) -> Self {
        self.post_commit_report = Some(Arc::new(callback));
        self
    }

    pub fn with_refresh(mut self, callback: impl Fn(&ImportSummary) + Send + Sync + 'static) -> Self {
        self.on_refresh = Some(Arc::new(callback));
        self
    }

    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging_enabled = enabled;
        self
    }

    /// Disable every bulk verb.
    pub fn without_bulk(mut self) -> Self {
        self.disable_bulk_create = true;
        self.disable_bulk_update = true;
        self.disable_bulk_lookup = true;
        self
    }
}

impl std::fmt::Debug for ImportOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportOptions")
            .field("disable_bulk_create", &self.disable_bulk_create)
            .field("disable_bulk_update", &self.disable_bulk_update)
            .field("disable_bulk_lookup", &self.disable_bulk_lookup)
            .field("disable_add_new", &self.disable_add_new)
            .field("disable_replace", &self.disable_replace)
            .field("logging_enabled", &self.logging_enabled)
            .field("validate_row", &self.validate_row.is_some())
            .field("transform_rows", &self.transform_rows.is_some())
            .field("pre_commit", &self.pre_commit.is_some())
            .field("post_commit_report", &self.post_commit_report.is_some())
            .field("on_refresh", &self.on_refresh.is_some())
            .finish()
    }
}
