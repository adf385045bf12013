use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::TabularSink;
use crate::error::{Error, Result};

pub const DEFAULT_SHEETS_API: &str = "https://sheets.googleapis.com";

/// Google Sheets v4 values API, authenticated with a bearer token.
pub struct GoogleSheetsClient {
    client: reqwest::Client,
    base: Url,
    token: String,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

impl GoogleSheetsClient {
    pub fn new(base: &str, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base).map_err(|e| Error::Sink(format!("invalid sheets API url {base}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Sink(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base,
            token: token.into(),
        })
    }

    fn values_url(&self, sheet_id: &str, range: &str) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Sink(format!("sheets API url cannot be a base: {}", self.base)))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", sheet_id, "values", range]);
        Ok(url)
    }

    /// Values are stored exactly as sent; readings such as `"0087"` keep their zeros.
    fn update_url(&self, sheet_id: &str, range: &str) -> Result<Url> {
        let mut url = self.values_url(sheet_id, range)?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        Ok(url)
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(Error::Sink(format!("sheets API returned {status}: {body}")))
}

#[async_trait]
impl TabularSink for GoogleSheetsClient {
    async fn read_values(&self, sheet_id: &str, range: &str) -> Result<Vec<Vec<Value>>> {
        let url = self.values_url(sheet_id, range)?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Error::Sink(format!("read {range} failed: {e}")))?;
        let parsed: ValueRange = check(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Sink(format!("unexpected sheets response: {e}")))?;
        debug!(sheet = %sheet_id, range, rows = parsed.values.len(), "read sheet values");
        Ok(parsed.values)
    }

    async fn update_values(&self, sheet_id: &str, range: &str, rows: Vec<Vec<Value>>) -> Result<()> {
        let url = self.update_url(sheet_id, range)?;
        let body = json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": rows,
        });
        let response = self
            .client
            .put(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Sink(format!("update {range} failed: {e}")))?;
        check(response).await?;
        Ok(())
    }
}
