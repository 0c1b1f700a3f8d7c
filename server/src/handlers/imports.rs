//! Import handlers - start, drive and cancel interactive imports.

use crate::error::{AppError, Result};
use crate::sessions::{SessionInfo, SessionManager};
use crate::AppState;
use importer_engine::{
    CsvSource, Decision, ImportSession, ImportState, Input, ParseConfig, Step, Strategy,
};
use serde::{Deserialize, Serialize};

/// Query parameters for starting an import.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartQuery {
    /// Single-character field delimiter, `,` by default
    pub delimiter: Option<String>,
    pub dynamic_typing: Option<bool>,
    pub max_rows: Option<usize>,
}

impl StartQuery {
    fn parse_config(&self) -> Result<ParseConfig> {
        let mut config = ParseConfig::default();
        if let Some(delimiter) = &self.delimiter {
            let mut chars = delimiter.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => config.delimiter = c,
                _ => {
                    return Err(AppError::BadRequest(format!(
                        "delimiter must be one character, got {:?}",
                        delimiter
                    )))
                }
            }
        }
        if let Some(dynamic_typing) = self.dynamic_typing {
            config.dynamic_typing = dynamic_typing;
        }
        config.max_rows = self.max_rows;
        Ok(config)
    }
}

/// Request body for choosing a strategy.
#[derive(Debug, Deserialize)]
pub struct StrategyBody {
    pub strategy: Strategy,
}

/// Request body for a per-item decision.
#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    pub decision: Decision,
}

/// Response for every import step.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    /// Present while the import waits for input
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub step: Step,
}

/// Response listing open imports.
#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub imports: Vec<SessionInfo>,
}

/// Parse a CSV document and start importing it into `resource`.
///
/// Runs that need no decision finish within this call and are not retained.
pub async fn handle_start(
    state: &AppState,
    resource: String,
    query: StartQuery,
    body: &[u8],
) -> Result<ImportResponse> {
    let config = query.parse_config()?;
    let mut session = ImportSession::new(state.store.clone(), resource, state.config.import_options());

    let step = session
        .start_from(CsvSource::with_config(body, config))
        .await?;

    let session_id = match step {
        Step::Finished(_) => None,
        _ => Some(state.sessions.register(session)),
    };
    Ok(ImportResponse { session_id, step })
}

/// Feed one input to a retained session.
///
/// The session is dropped once it is back to idle, whether it finished or
/// failed; refused inputs keep it open.
pub async fn handle_input(
    sessions: &SessionManager,
    id: &str,
    input: Input,
) -> Result<ImportResponse> {
    let shared = sessions
        .get(id)
        .ok_or_else(|| AppError::SessionNotFound(id.to_string()))?;
    let mut session = shared.lock().await;

    let result = session.advance(input).await;
    let open = session.state() != ImportState::Idle;
    if !open {
        sessions.unregister(id);
    }

    Ok(ImportResponse {
        session_id: open.then(|| id.to_string()),
        step: result?,
    })
}

/// List open sessions.
pub async fn handle_list(sessions: &SessionManager) -> ListResponse {
    ListResponse {
        imports: sessions.list().await,
    }
}
