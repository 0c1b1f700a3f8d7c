//! Remote record store over JSON REST.
//!
//! Endpoints, relative to the configured base URL:
//!
//! | Verb         | Request                                      |
//! |--------------|----------------------------------------------|
//! | `getOne`     | `GET {resource}/{id}`                        |
//! | `getMany`    | `GET {resource}?filter={"id":[...]}`         |
//! | `create`     | `POST {resource}`                            |
//! | `createMany` | `POST {resource}/bulk` with a record array   |
//! | `update`     | `PUT {resource}/{id}`                        |
//! | `updateMany` | `PUT {resource}/bulk` with `{ids, records}`  |
//!
//! Bulk endpoints answering 404, 405 or 501 are reported as unsupported, so
//! the engine falls back to single calls even when the declared capabilities
//! are wrong.

use async_trait::async_trait;
use importer_engine::{
    Capabilities, Identifier, Record, RecordStore, StoreError, StoreResult, Verb,
};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Serialize;
use serde_json::{json, Value};

/// [`RecordStore`] backed by a remote HTTP API.
#[derive(Debug, Clone)]
pub struct RestStore {
    client: Client,
    base_url: Url,
    token: Option<String>,
    capabilities: Capabilities,
}

impl RestStore {
    pub fn new(base_url: Url, token: Option<String>, capabilities: Capabilities) -> Self {
        Self {
            client: Client::new(),
            base_url,
            token,
            capabilities,
        }
    }

    fn endpoint(&self, segments: &[&str]) -> StoreResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Transport(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send `request`; `id` names the record a single-record verb targets.
    async fn send(
        &self,
        verb: Verb,
        id: Option<&Identifier>,
        request: RequestBuilder,
    ) -> StoreResult<Response> {
        let response = request.send().await.map_err(|e| {
            tracing::debug!(%verb, error = %e, "Store request failed");
            StoreError::Transport(e.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(%verb, %status, "Store answered with an error");
        Err(status_error(verb, id, status, body))
    }

    async fn send_json<B: Serialize + ?Sized + Sync>(
        &self,
        verb: Verb,
        id: Option<&Identifier>,
        method: Method,
        url: Url,
        body: &B,
    ) -> StoreResult<Value> {
        let response = self
            .send(verb, id, self.request(method, url).json(body))
            .await?;
        read_json(response).await
    }
}

#[async_trait]
impl RecordStore for RestStore {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn get_one(&self, resource: &str, id: &Identifier) -> StoreResult<Record> {
        let url = self.endpoint(&[resource, &id.to_string()])?;
        let response = self
            .send(Verb::GetOne, Some(id), self.request(Method::GET, url))
            .await?;
        record_from(read_json(response).await?)
    }

    async fn get_many(&self, resource: &str, ids: &[Identifier]) -> StoreResult<Vec<Record>> {
        let mut url = self.endpoint(&[resource])?;
        let filter = json!({ "id": ids }).to_string();
        url.query_pairs_mut().append_pair("filter", &filter);

        let response = self.send(Verb::GetMany, None, self.request(Method::GET, url)).await?;
        records_from(read_json(response).await?)
    }

    async fn create(&self, resource: &str, record: Record) -> StoreResult<Record> {
        let url = self.endpoint(&[resource])?;
        record_from(self.send_json(Verb::Create, None, Method::POST, url, &record).await?)
    }

    async fn create_many(&self, resource: &str, records: Vec<Record>) -> StoreResult<Vec<Record>> {
        let url = self.endpoint(&[resource, "bulk"])?;
        records_from(self.send_json(Verb::CreateMany, None, Method::POST, url, &records).await?)
    }

    async fn update(&self, resource: &str, id: &Identifier, record: Record) -> StoreResult<Record> {
        let url = self.endpoint(&[resource, &id.to_string()])?;
        record_from(
            self.send_json(Verb::Update, Some(id), Method::PUT, url, &record)
                .await?,
        )
    }

    async fn update_many(
        &self,
        resource: &str,
        ids: &[Identifier],
        records: Vec<Record>,
    ) -> StoreResult<Vec<Record>> {
        let url = self.endpoint(&[resource, "bulk"])?;
        let body = json!({ "ids": ids, "records": records });
        records_from(self.send_json(Verb::UpdateMany, None, Method::PUT, url, &body).await?)
    }
}

/// Map a non-success status to a store error.
fn status_error(
    verb: Verb,
    id: Option<&Identifier>,
    status: StatusCode,
    body: String,
) -> StoreError {
    let missing_endpoint = matches!(
        status,
        StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
    );
    if verb.is_bulk() && missing_endpoint {
        return StoreError::Unsupported(verb);
    }

    if let (StatusCode::NOT_FOUND, Some(id)) = (status, id) {
        return StoreError::NotFound(id.clone());
    }

    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body)
    };
    if status.is_client_error() {
        StoreError::Rejected(detail)
    } else {
        StoreError::Transport(detail)
    }
}

async fn read_json(response: Response) -> StoreResult<Value> {
    response
        .json()
        .await
        .map_err(|e| StoreError::Transport(format!("invalid JSON from store: {}", e)))
}

fn record_from(value: Value) -> StoreResult<Record> {
    Record::try_from(value)
        .map_err(|v| StoreError::Transport(format!("expected a JSON object, got {}", v)))
}

/// Accept a bare array or a `{"data": [...]}` envelope.
fn records_from(value: Value) -> StoreResult<Vec<Record>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut envelope) => match envelope.remove("data") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(StoreError::Transport(
                    "expected a JSON array of records".to_string(),
                ))
            }
        },
        other => {
            return Err(StoreError::Transport(format!(
                "expected a JSON array of records, got {}",
                other
            )))
        }
    };
    items.into_iter().map(record_from).collect()
}
