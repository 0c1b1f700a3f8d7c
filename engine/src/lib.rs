//! # Importer Engine
//!
//! Reconciles a batch of imported records against an existing keyed record
//! store.
//!
//! Rows come from a [`RowSource`] (usually a [`CsvSource`]), are checked by
//! an optional [`RowValidator`], and are split into rows that are new and
//! rows whose identifier already exists in the store. New rows are written at
//! once; colliding rows wait for a [`Strategy`] and, if asked for, a
//! [`Decision`] per row.
//!
//! ## Design Principles
//!
//! - **Store agnostic**: the store is a [`RecordStore`] trait object
//! - **Negotiated bulk calls**: stores declare their bulk verbs through
//!   [`Capabilities`]; missing verbs fall back to concurrent single calls
//! - **No hidden IO**: presentation is the caller's business, the session
//!   only returns the next [`Step`]
//! - **Nothing rolled back**: per-record failures are reported, never undone
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is an untyped JSON object. A top-level `id` field holding an
//! integer or a non-empty string is its [`Identifier`]; records without one
//! are always new.
//!
//! ### Collisions
//!
//! The [`CollisionDetector`] asks the store which identifiers of the batch
//! exist, producing a [`CollisionSet`].
//!
//! ### Commits
//!
//! The [`CommitExecutor`] creates or overwrites records and returns one
//! [`OutcomeReport`] per attempt, or one for a whole bulk call.
//!
//! ### Sessions
//!
//! An [`ImportSession`] is the state machine tying it together. Feed it
//! [`Input`]s through [`ImportSession::advance`], or let a [`Prompter`]
//! answer for you with [`ImportSession::run`].
//!
//! ## Quick Start
//!
//! ```rust
//! use importer_engine::{
//!     Capabilities, CsvSource, ImportOptions, ImportSession, MemoryStore, Record, Step,
//!     Strategy,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! // 1. A store that already holds post 2
//! let existing = Record::try_from(json!({"id": 2, "title": "old"})).unwrap();
//! let store = Arc::new(
//!     MemoryStore::new()
//!         .with_capabilities(Capabilities::all())
//!         .with_records("posts", vec![existing]),
//! );
//!
//! // 2. Import a document into it
//! let mut session = ImportSession::new(store.clone(), "posts", ImportOptions::new());
//! let csv = "id,title\n1,first\n2,second\n";
//! let step = session.start_from(CsvSource::new(csv.as_bytes())).await.unwrap();
//!
//! // 3. Post 1 is already written; post 2 needs a strategy
//! let Step::ChooseStrategy(request) = step else { unreachable!() };
//! assert_eq!(request.conflicts.len(), 1);
//!
//! let step = session.choose(Strategy::ReplaceAll).await.unwrap();
//! let Step::Finished(summary) = step else { unreachable!() };
//! assert_eq!(summary.succeeded(), 2);
//! # }
//! ```

pub mod collision;
pub mod commit;
pub mod error;
pub mod log;
pub mod memory;
pub mod options;
pub mod reconcile;
pub mod record;
pub mod source;
pub mod store;
pub mod validate;

// Re-export main types at crate root
pub use collision::{CollisionDetector, CollisionSet};
pub use commit::{CommitAction, CommitExecutor, OutcomeReport};
pub use error::{Error, Result, StoreError, StoreResult, Verb};
pub use log::RunLog;
pub use memory::{MemoryStore, StoreCall};
pub use options::{ImportOptions, PreCommitTransform, RowTransform};
pub use reconcile::{
    Decision, DecisionRequest, ImportSession, ImportState, ImportSummary, Input, Prompter, Step,
    Strategy, StrategyRequest,
};
pub use record::{Identifier, Record, ID_FIELD};
pub use source::{read_rows, CsvSource, ParseConfig, ParseError, RowSource};
pub use store::{Capabilities, RecordStore};
pub use validate::{Rejection, RowValidator, ValidateFn};
