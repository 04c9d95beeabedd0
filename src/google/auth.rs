use crate::google::config::{DEFAULT_TOKEN_URI, SCOPES};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

const TOKEN_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum GoogleAuthError {
    #[error("cannot read service account file `{path}`: {source}")]
    ReadKey {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid service account json: {0}")]
    InvalidKey(String),
    #[error("jwt signing failed: {0}")]
    Signing(String),
    #[error("token request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

struct CachedToken {
    value: String,
    expires_at: i64,
}

/// OAuth access tokens for a Google service account, cached until shortly before expiry.
pub struct ServiceAccountAuth {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    http: Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    pub fn from_file(path: &Path, http: Client) -> Result<Self, GoogleAuthError> {
        let raw = std::fs::read_to_string(path).map_err(|source| GoogleAuthError::ReadKey {
            path: path.display().to_string(),
            source,
        })?;
        let key: ServiceAccountKey = serde_json::from_str(&raw)
            .map_err(|err| GoogleAuthError::InvalidKey(err.to_string()))?;
        Self::new(key, http)
    }

    pub fn new(key: ServiceAccountKey, http: Client) -> Result<Self, GoogleAuthError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|err| GoogleAuthError::InvalidKey(err.to_string()))?;
        Ok(Self {
            key,
            encoding_key,
            http,
            cached: Mutex::new(None),
        })
    }

    pub async fn access_token(&self) -> Result<String, GoogleAuthError> {
        let mut guard = self.cached.lock().await;
        let now = Utc::now().timestamp();
        if let Some(token) = guard.as_ref()
            && token.expires_at - REFRESH_MARGIN_SECS > now
        {
            return Ok(token.value.clone());
        }

        let assertion = self.signed_assertion(now)?;
        let params = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ];
        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|err| GoogleAuthError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(GoogleAuthError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let payload: TokenResponse = response
            .json()
            .await
            .map_err(|err| GoogleAuthError::Request(err.to_string()))?;
        let expires_at = now + payload.expires_in.unwrap_or(TOKEN_LIFETIME_SECS);
        debug!(
            target = "lbc.google",
            account = %self.key.client_email,
            expires_at,
            "access token refreshed"
        );
        *guard = Some(CachedToken {
            value: payload.access_token.clone(),
            expires_at,
        });
        Ok(payload.access_token)
    }

    fn signed_assertion(&self, now: i64) -> Result<String, GoogleAuthError> {
        let claims = Claims {
            iss: &self.key.client_email,
            scope: SCOPES.join(" "),
            aud: &self.key.token_uri,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|err| GoogleAuthError::Signing(err.to_string()))
    }
}
