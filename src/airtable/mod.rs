//! Destination store client
//!
//! Thin client for the Airtable records API: search a table with a filter
//! formula, or create a single record. The sync engine decides what a
//! failure means; this module only surfaces them as typed [`StoreError`]s.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;
use url::Url;

pub mod formula;

pub use formula::Formula;

/// A record as returned by the store: opaque id plus a field map.
#[derive(Debug, Clone, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub fields: serde_json::Map<String, JsonValue>,
}

#[derive(Debug, Deserialize)]
struct RecordList {
    #[serde(default)]
    records: Vec<Record>,
}

/// Failures talking to the destination store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid store url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl StoreError {
    /// Upstream HTTP status, when the store answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            StoreError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Client for one store base. Table names are passed per call so the same
/// client serves the orders, customers, and inventory tables.
#[derive(Debug, Clone)]
pub struct AirtableClient {
    http: reqwest::Client,
    api_base: Url,
    base_id: String,
    token: String,
}

impl AirtableClient {
    pub fn new(
        api_base: &str,
        base_id: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base: Url::parse(api_base)?,
            base_id: base_id.into(),
            token: token.into(),
        })
    }

    fn table_url(&self, table: &str) -> Result<Url, StoreError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .push(&self.base_id)
            .push(table);
        Ok(url)
    }

    /// Search `table` for records matching `formula`. An empty vec means no
    /// match; a non-2xx answer is an error, never silently "no records".
    pub async fn search(&self, table: &str, formula: &Formula) -> Result<Vec<Record>, StoreError> {
        let mut url = self.table_url(table)?;
        url.query_pairs_mut()
            .append_pair("filterByFormula", formula.as_str());

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(status, response).await);
        }

        let list: RecordList = response.json().await?;
        debug!(table, formula = %formula, matches = list.records.len(), "store search completed");
        Ok(list.records)
    }

    /// Create a single record in `table` with the given field map.
    pub async fn create(
        &self,
        table: &str,
        fields: JsonValue,
    ) -> Result<Record, StoreError> {
        let url = self.table_url(table)?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "fields": fields, "typecast": true }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(status, response).await);
        }

        let record: Record = response.json().await?;
        debug!(table, record_id = %record.id, "store record created");
        Ok(record)
    }
}

async fn error_from_response(status: StatusCode, response: reqwest::Response) -> StoreError {
    let body = response.text().await.unwrap_or_default();
    StoreError::Status {
        status: status.as_u16(),
        body: truncate_body(body),
    }
}

/// Keep error bodies log-sized.
pub(crate) fn truncate_body(body: String) -> String {
    if body.chars().count() > 200 {
        let truncated: String = body.chars().take(200).collect();
        format!("{}...", truncated)
    } else {
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_url_percent_encodes_table_names() {
        let client = AirtableClient::new(
            "https://api.airtable.com/v0",
            "appBase123",
            "token",
            Duration::from_secs(10),
        )
        .unwrap();

        let url = client.table_url("French Inventories").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.airtable.com/v0/appBase123/French%20Inventories"
        );
    }

    #[test]
    fn truncates_long_error_bodies() {
        let body = "x".repeat(300);
        let truncated = truncate_body(body);
        assert_eq!(truncated.chars().count(), 203);
        assert!(truncated.ends_with("..."));
    }
}
