//! Row validation hook.

use crate::{
    error::{Result, GENERIC_VALIDATION_MESSAGE},
    log::RunLog,
    Error, Record,
};
use async_trait::async_trait;
use futures::future::try_join_all;

/// Why a validator refused a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Structured rejection; the message is shown to the caller as is.
    Message(String),
    /// Rejected without explanation.
    Unspecified,
}

impl Rejection {
    pub fn message(message: impl Into<String>) -> Self {
        Rejection::Message(message.into())
    }
}

/// Caller-supplied check run on every row before anything is written.
#[async_trait]
pub trait RowValidator: Send + Sync {
    /// `index` is the row's position in `rows`.
    async fn validate(
        &self,
        row: &Record,
        index: usize,
        rows: &[Record],
    ) -> std::result::Result<(), Rejection>;
}

/// Adapter for synchronous validation closures.
pub struct ValidateFn<F>(F);

impl<F> ValidateFn<F>
where
    F: Fn(&Record, usize) -> std::result::Result<(), Rejection> + Send + Sync,
{
    pub fn new(check: F) -> Self {
        Self(check)
    }
}

#[async_trait]
impl<F> RowValidator for ValidateFn<F>
where
    F: Fn(&Record, usize) -> std::result::Result<(), Rejection> + Send + Sync,
{
    async fn validate(
        &self,
        row: &Record,
        index: usize,
        _rows: &[Record],
    ) -> std::result::Result<(), Rejection> {
        (self.0)(row, index)
    }
}

/// Validate every row concurrently. The first rejection to surface aborts.
pub async fn validate_all(
    rows: &[Record],
    validator: Option<&dyn RowValidator>,
    log: &RunLog,
) -> Result<()> {
    let Some(validator) = validator else {
        return Ok(());
    };

    let checks = rows
        .iter()
        .enumerate()
        .map(|(index, row)| validator.validate(row, index, rows));

    if let Err(rejection) = try_join_all(checks).await {
        let message = match rejection {
            Rejection::Message(message) => message,
            Rejection::Unspecified => GENERIC_VALIDATION_MESSAGE.to_string(),
        };
        log.failure("validate", format_args!("row rejected: {}", message));
        return Err(Error::ValidationFailed(message));
    }

    log.debug("validate", format_args!("{} rows valid", rows.len()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn rows() -> Vec<Record> {
        vec![
            Record::try_from(json!({"id": 1, "title": "ok"})).unwrap(),
            Record::try_from(json!({"id": 2, "title": ""})).unwrap(),
            Record::try_from(json!({"id": 3, "title": "ok"})).unwrap(),
        ]
    }

    #[tokio::test]
    async fn absent_validator_passes() {
        assert!(validate_all(&rows(), None, &RunLog::disabled()).await.is_ok());
    }

    #[tokio::test]
    async fn structured_rejection_keeps_message() {
        let validator = ValidateFn::new(|row, _| match row.get("title") {
            Some(Value::String(s)) if s.is_empty() => Err(Rejection::message("bad title")),
            _ => Ok(()),
        });
        let err = validate_all(&rows(), Some(&validator), &RunLog::disabled())
            .await
            .unwrap_err();
        assert_eq!(err, Error::ValidationFailed("bad title".into()));
    }

    #[tokio::test]
    async fn unstructured_rejection_is_generic() {
        let validator = ValidateFn::new(|_, index| {
            if index == 2 {
                Err(Rejection::Unspecified)
            } else {
                Ok(())
            }
        });
        let err = validate_all(&rows(), Some(&validator), &RunLog::disabled())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::ValidationFailed(GENERIC_VALIDATION_MESSAGE.to_string())
        );
    }

    struct SeesAllRows;

    #[async_trait]
    impl RowValidator for SeesAllRows {
        async fn validate(
            &self,
            row: &Record,
            index: usize,
            rows: &[Record],
        ) -> std::result::Result<(), Rejection> {
            assert_eq!(&rows[index], row);
            let duplicate = rows
                .iter()
                .enumerate()
                .any(|(i, other)| i != index && other.id() == row.id());
            if duplicate {
                return Err(Rejection::message(format!("duplicate id at row {}", index)));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn validator_sees_the_whole_batch() {
        assert!(validate_all(&rows(), Some(&SeesAllRows), &RunLog::disabled())
            .await
            .is_ok());
    }
}
