//! HTTP client for a PostgREST-style record table.
//!
//! Records live in one table with a unique `name` column and a `data` column.
//! Upserts rely on `Prefer: resolution=merge-duplicates`, so pushing the same
//! name twice overwrites the row.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

use super::{RemoteError, RemoteStore};

/// Record table client.
#[derive(Debug, Clone)]
pub struct HttpRecordStore {
    table_url: String,
    api_key: Option<String>,
    client: Client,
}

#[derive(Serialize)]
struct RecordRow<'a> {
    name: &'a str,
    data: &'a str,
}

#[derive(Deserialize)]
struct StoredRow {
    data: serde_json::Value,
}

impl HttpRecordStore {
    /// Create a client for `{base_url}/{table}`. `timeout` bounds every call.
    pub fn new(
        base_url: &str,
        table: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            table_url: format!("{}/{}", base_url.trim_end_matches('/'), table),
            api_key,
            client,
        })
    }

    pub fn table_url(&self) -> &str {
        &self.table_url
    }

    /// Build a request with the optional key sent both as `apikey` and bearer.
    fn request(&self, method: Method) -> RequestBuilder {
        let mut req = self.client.request(method, &self.table_url);
        if let Some(ref key) = self.api_key {
            req = req.header("apikey", key).bearer_auth(key);
        }
        req
    }

    async fn check(response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(RemoteError::Status { status, body })
        }
    }
}

/// Turn a stored `data` value back into the payload bytes.
///
/// Payloads are pushed as JSON strings. Rows written by older clients hold
/// the document itself, which is re-encoded.
fn payload_from(data: serde_json::Value) -> Result<Vec<u8>, RemoteError> {
    match data {
        serde_json::Value::String(s) => Ok(s.into_bytes()),
        serde_json::Value::Null => Err(RemoteError::Protocol("record has no data".into())),
        other => serde_json::to_vec_pretty(&other)
            .map_err(|e| RemoteError::Protocol(e.to_string())),
    }
}

#[async_trait]
impl RemoteStore for HttpRecordStore {
    async fn upsert(&self, name: &str, payload: &[u8]) -> Result<(), RemoteError> {
        let data = std::str::from_utf8(payload).map_err(|_| RemoteError::Encoding)?;
        let response = self
            .request(Method::POST)
            .query(&[("on_conflict", "name")])
            .header("Prefer", "resolution=merge-duplicates")
            .json(&RecordRow { name, data })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn fetch(&self, name: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        let filter = format!("eq.{}", name);
        let response = self
            .request(Method::GET)
            .query(&[("name", filter.as_str()), ("select", "data")])
            .send()
            .await?;
        let rows: Vec<StoredRow> = Self::check(response).await?.json().await?;

        match rows.into_iter().next() {
            Some(row) => payload_from(row.data).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_url_joins_without_double_slash() {
        let store =
            HttpRecordStore::new("https://db.example/rest/v1/", "records", None, Duration::from_secs(1))
                .unwrap();
        assert_eq!(store.table_url(), "https://db.example/rest/v1/records");
    }

    #[test]
    fn string_data_is_returned_verbatim() {
        let bytes = payload_from(serde_json::json!("{\n  \"a\": 1\n}")).unwrap();
        assert_eq!(bytes, b"{\n  \"a\": 1\n}".to_vec());
    }

    #[test]
    fn document_data_is_reencoded() {
        let bytes = payload_from(serde_json::json!({ "root": { "name": "Home" } })).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["root"]["name"], "Home");
    }

    #[test]
    fn null_data_is_a_protocol_error() {
        assert!(matches!(
            payload_from(serde_json::Value::Null),
            Err(RemoteError::Protocol(_))
        ));
    }
}
