//! Google Sheets v4 values client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use roster_engine::SheetTransport;

use crate::SheetsError;
use crate::auth::{AccessToken, ServiceAccountKey, exchange_assertion};

/// Default Sheets API endpoint.
pub const DEFAULT_SHEETS_URL: &str = "https://sheets.googleapis.com";

/// Retries after the first attempt for transient failures.
const MAX_RETRIES: u32 = 3;

/// How the client obtains bearer tokens.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// A fixed bearer token.
    Static(String),
    /// Service account JWT bearer grant.
    ServiceAccount(ServiceAccountKey),
}

/// Client for the values endpoints of one spreadsheet.
pub struct SheetsClient {
    http: Client,
    base_url: String,
    spreadsheet_id: String,
    credentials: Credentials,
    token: RwLock<Option<AccessToken>>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest<'a> {
    range: &'a str,
    major_dimension: &'a str,
    values: &'a [Vec<String>],
}

/// Google API error envelope.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl SheetsClient {
    /// Create a client for the given spreadsheet.
    pub fn new(
        spreadsheet_id: impl Into<String>,
        credentials: Credentials,
    ) -> Result<Self, SheetsError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: DEFAULT_SHEETS_URL.to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            credentials,
            token: RwLock::new(None),
        })
    }

    /// Point the client at a different API host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Build `.../v4/spreadsheets/{id}/values/{range}{suffix}` with the range
    /// encoded as one path segment.
    fn values_url(&self, range: &str, suffix: &str) -> Result<Url, SheetsError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| SheetsError::Url(format!("{}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| SheetsError::Url(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", &self.spreadsheet_id, "values"])
            .push(&format!("{}{}", range, suffix));
        Ok(url)
    }

    /// Current bearer token, refreshing it if needed.
    async fn access_token(&self) -> Result<String, SheetsError> {
        let key = match &self.credentials {
            Credentials::Static(token) => return Ok(token.clone()),
            Credentials::ServiceAccount(key) => key,
        };

        let now = Utc::now();
        if let Some(token) = self.token.read().await.as_ref()
            && token.is_fresh(now)
        {
            return Ok(token.token.clone());
        }

        let mut slot = self.token.write().await;
        // Another request may have refreshed while we waited for the lock.
        if let Some(token) = slot.as_ref()
            && token.is_fresh(now)
        {
            return Ok(token.token.clone());
        }

        let assertion = key.signed_assertion(now)?;
        let token = exchange_assertion(&self.http, &key.token_uri, &assertion, now).await?;
        let value = token.token.clone();
        *slot = Some(token);
        Ok(value)
    }

    async fn invalidate_token(&self) {
        *self.token.write().await = None;
    }

    /// Send a request with auth, retrying transient failures.
    ///
    /// `build` is called once per attempt with a fresh request builder.
    async fn send<F>(&self, op: &str, method: Method, url: Url, build: F) -> Result<Response, SheetsError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let mut refreshed = false;
        let mut attempt = 0;

        loop {
            let token = self.access_token().await?;
            let request = build(self.http.request(method.clone(), url.clone())).bearer_auth(token);

            let result = match request.send().await {
                Ok(response) => Self::check_status(response).await,
                Err(e) => Err(SheetsError::Http(e)),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(SheetsError::Api { status: 401, .. })
                    if !refreshed && matches!(self.credentials, Credentials::ServiceAccount(_)) =>
                {
                    debug!(op, "access token rejected, refreshing");
                    self.invalidate_token().await;
                    refreshed = true;
                }
                Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                    let backoff_ms = 500 * (1 << attempt); // 500ms, 1s, 2s
                    warn!(
                        attempt = attempt + 1,
                        backoff_ms,
                        error = %e,
                        "transient error in {}, retrying", op
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Map a non-success response to an error.
    async fn check_status(response: Response) -> Result<Response, SheetsError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(SheetsError::RateLimited { retry_after_secs });
        }

        let text = response.text().await.map_err(|e| {
            SheetsError::InvalidResponse(format!(
                "request failed ({}): failed to read response: {}",
                status, e
            ))
        })?;
        let message = serde_json::from_str::<ApiErrorBody>(&text)
            .map(|body| body.error.message)
            .unwrap_or(text);

        Err(SheetsError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Read a range as rows of display strings.
    pub async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>, SheetsError> {
        let url = self.values_url(range, "")?;
        let response = self.send("get_values", Method::GET, url, |req| req).await?;
        let body: ValueRange = response.json().await?;

        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect())
    }

    /// Overwrite cells starting at the range's top-left corner.
    pub async fn update_values(&self, range: &str, rows: &[Vec<String>]) -> Result<(), SheetsError> {
        let url = self.values_url(range, "")?;
        let body = UpdateRequest {
            range,
            major_dimension: "ROWS",
            values: rows,
        };

        self.send("update_values", Method::PUT, url, |req| {
            req.query(&[("valueInputOption", "RAW")]).json(&body)
        })
        .await?;

        debug!(range, rows = rows.len(), "updated values");
        Ok(())
    }

    /// Clear every cell in the range.
    pub async fn clear_values(&self, range: &str) -> Result<(), SheetsError> {
        let url = self.values_url(range, ":clear")?;
        self.send("clear_values", Method::POST, url, |req| {
            req.json(&serde_json::json!({}))
        })
        .await?;

        debug!(range, "cleared values");
        Ok(())
    }
}

fn cell_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl SheetTransport for SheetsClient {
    type Error = SheetsError;

    async fn get_range(&self, range: &str) -> Result<Vec<Vec<String>>, SheetsError> {
        self.get_values(range).await
    }

    async fn update_range(&self, range: &str, rows: Vec<Vec<String>>) -> Result<(), SheetsError> {
        self.update_values(range, &rows).await
    }

    async fn clear_range(&self, range: &str) -> Result<(), SheetsError> {
        self.clear_values(range).await
    }
}
