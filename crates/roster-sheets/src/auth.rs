//! Service-account authentication for the Sheets API.
//!
//! Signs an RS256 JWT with the service account's private key and trades it
//! for a short-lived access token (OAuth 2.0 JWT bearer grant).

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::SheetsError;

/// OAuth scope for reading and writing spreadsheets.
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

/// Default Google token endpoint.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Lifetime requested for each assertion.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Tokens this close to expiry are refreshed.
const REFRESH_MARGIN_SECS: i64 = 60;

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The fields of a service account JSON key we use.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    /// Load and validate a key file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SheetsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let key = Self::from_json(&text)?;
        debug!(path = %path.display(), email = %key.client_email, "loaded service account key");
        Ok(key)
    }

    /// Parse and validate a key from JSON text.
    ///
    /// The private key is checked by signing a throwaway assertion.
    pub fn from_json(text: &str) -> Result<Self, SheetsError> {
        let key: Self = serde_json::from_str(text)
            .map_err(|e| SheetsError::Credentials(format!("malformed key file: {}", e)))?;
        if key.client_email.is_empty() {
            return Err(SheetsError::Credentials("client_email is empty".into()));
        }
        key.signed_assertion(Utc::now())?;
        Ok(key)
    }

    /// Build a signed RS256 assertion valid from `now`.
    pub fn signed_assertion(&self, now: DateTime<Utc>) -> Result<String, SheetsError> {
        let encoding_key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .map_err(|e| SheetsError::Credentials(format!("invalid private key: {}", e)))?;

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.private_key_id.clone();
        let claims = Claims::new(&self.client_email, &self.token_uri, now);

        jsonwebtoken::encode(&header, &claims, &encoding_key)
            .map_err(|e| SheetsError::Credentials(format!("failed to sign assertion: {}", e)))
    }
}

/// JWT claim set for the bearer grant.
#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

impl<'a> Claims<'a> {
    fn new(issuer: &'a str, audience: &'a str, now: DateTime<Utc>) -> Self {
        let iat = now.timestamp();
        Self {
            iss: issuer,
            scope: SHEETS_SCOPE,
            aud: audience,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        }
    }
}

/// A bearer token and when it stops being valid.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Whether the token can still be used at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Trade a signed assertion for an access token.
pub(crate) async fn exchange_assertion(
    http: &Client,
    token_uri: &str,
    assertion: &str,
    now: DateTime<Utc>,
) -> Result<AccessToken, SheetsError> {
    let response = http
        .post(token_uri)
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion)])
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.map_err(|e| {
            SheetsError::Auth(format!(
                "token exchange failed ({}): failed to read response: {}",
                status, e
            ))
        })?;
        return Err(SheetsError::Auth(format!(
            "token exchange failed ({}): {}",
            status, text
        )));
    }

    let body: TokenResponse = response.json().await?;
    let lifetime = body.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS);
    debug!(expires_in = lifetime, "obtained access token");

    Ok(AccessToken {
        token: body.access_token,
        expires_at: now + Duration::seconds(lifetime),
    })
}

#[cfg(test)]
pub(crate) const TEST_PRIVATE_KEY: &str =
    include_str!("../tests/fixtures/service_account_key.pem");

/// Service account key backed by the PKCS#8 test fixture.
#[cfg(test)]
pub(crate) fn test_key(token_uri: &str) -> ServiceAccountKey {
    ServiceAccountKey {
        client_email: "roster@project.iam.gserviceaccount.com".into(),
        private_key: TEST_PRIVATE_KEY.into(),
        private_key_id: Some("key-1".into()),
        token_uri: token_uri.into(),
    }
}
