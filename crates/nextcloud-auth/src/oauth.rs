//! OAuth 2.0 authorization code flow.
//!
//! The provider-independent half of a login: building the authorize URL,
//! exchanging the returned code for tokens, and refreshing them later.
//! PKCE (RFC 7636) is optional because older Nextcloud releases ignore it.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthError, Result};
use crate::transport::{DEFAULT_TIMEOUT_SECS, USER_AGENT};

/// Length of the PKCE code verifier in bytes (before base64 encoding).
const PKCE_VERIFIER_BYTES: usize = 32;

/// Seconds before `expires_at` at which a token is treated as expired.
const EXPIRY_MARGIN_SECS: i64 = 60;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Client registration and endpoints for one authorization server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// The OAuth client ID.
    pub client_id: String,

    /// The OAuth client secret (confidential clients only).
    pub client_secret: Option<String>,

    /// The authorization endpoint URL.
    pub auth_url: String,

    /// The token endpoint URL.
    pub token_url: String,

    /// The redirect URI registered with the authorization server.
    pub redirect_uri: Option<String>,

    /// The scopes to request.
    pub scopes: Vec<String>,

    /// Separator used when joining `scopes` into the `scope` parameter.
    pub scope_separator: String,
}

// ---------------------------------------------------------------------------
// Token types
// ---------------------------------------------------------------------------

/// Tokens returned by the authorization server after a successful exchange.
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    /// The access token used to authenticate API requests.
    pub access_token: String,

    /// The refresh token used to obtain new access tokens.
    pub refresh_token: Option<String>,

    /// Unix timestamp (seconds) when the access token expires.
    pub expires_at: Option<i64>,

    /// The token type (typically "Bearer").
    pub token_type: String,

    /// The scopes that were granted.
    pub scopes: Vec<String>,

    /// Nextcloud returns the account id alongside the tokens.
    pub user_id: Option<String>,
}

impl std::fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokens")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .field("scopes", &self.scopes)
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Raw token response from the authorization server.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    token_type: Option<String>,
    scope: Option<String>,
    user_id: Option<String>,
}

impl TokenResponse {
    /// Convert into [`OAuthTokens`], computing `expires_at` from `expires_in`.
    fn into_tokens(self, separator: &str) -> OAuthTokens {
        let expires_at = self
            .expires_in
            .map(|secs| chrono::Utc::now().timestamp() + secs);

        let scopes = self
            .scope
            .map(|s| split_scopes(&s, separator))
            .unwrap_or_default();

        OAuthTokens {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scopes,
            user_id: self.user_id,
        }
    }
}

/// Raw error response from the authorization server.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Granted scopes may come back space- or separator-delimited.
fn split_scopes(raw: &str, separator: &str) -> Vec<String> {
    raw.split(|c: char| c.is_whitespace() || separator.contains(c))
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

// ---------------------------------------------------------------------------
// PKCE helpers
// ---------------------------------------------------------------------------

/// Generate a PKCE code verifier (random 32 bytes, base64url encoded).
///
/// # Errors
///
/// Returns an error if the system CSPRNG fails.
pub fn generate_pkce_verifier() -> Result<String> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; PKCE_VERIFIER_BYTES];
    rng.fill(&mut bytes).map_err(|_| AuthError::FlowFailed {
        reason: "failed to generate PKCE verifier: CSPRNG error".to_string(),
    })?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Derive the PKCE code challenge from a code verifier using SHA-256.
///
/// `challenge = BASE64URL(SHA256(verifier))`
pub fn pkce_challenge(verifier: &str) -> String {
    let hash = digest::digest(&digest::SHA256, verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash.as_ref())
}

// ---------------------------------------------------------------------------
// OAuth flow
// ---------------------------------------------------------------------------

/// Drives the authorization code grant against one authorization server.
///
/// Stateless: the `state` value and PKCE verifier travel through method
/// parameters, so a single flow can serve many logins at once.
#[derive(Debug, Clone)]
pub struct OAuthFlow {
    config: OAuthConfig,
    client: reqwest::Client,
}

impl OAuthFlow {
    /// Create a new flow with the default 30 second request timeout.
    pub fn new(config: OAuthConfig) -> Self {
        Self::with_timeout(config, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a new flow whose token requests give up after `timeout`.
    pub fn with_timeout(config: OAuthConfig, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self { config, client }
    }

    /// The configuration this flow was built from.
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Build the authorization URL the user should visit.
    ///
    /// Existing query parameters on `auth_url` are preserved. PKCE
    /// parameters are only added when `code_challenge` is given.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UrlParse`] if the `auth_url` in the config is
    /// not a valid URL.
    pub fn authorization_url(
        &self,
        state: Option<&str>,
        code_challenge: Option<&str>,
    ) -> Result<String> {
        let mut url = Url::parse(&self.config.auth_url)?;

        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &self.config.client_id);

            if let Some(ref redirect_uri) = self.config.redirect_uri {
                params.append_pair("redirect_uri", redirect_uri);
            }
            if !self.config.scopes.is_empty() {
                let scope = self.config.scopes.join(&self.config.scope_separator);
                params.append_pair("scope", &scope);
            }
            if let Some(state) = state {
                params.append_pair("state", state);
            }
            if let Some(challenge) = code_challenge {
                params.append_pair("code_challenge", challenge);
                params.append_pair("code_challenge_method", "S256");
            }
        }

        Ok(url.to_string())
    }

    /// Exchange an authorization code for tokens.
    ///
    /// `code_verifier` must be the verifier whose challenge went out with
    /// the authorize request, if one did.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidGrant`] if the server rejects the code,
    /// or [`AuthError::NetworkError`] on transport failure.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<OAuthTokens> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
        ];

        if let Some(ref redirect_uri) = self.config.redirect_uri {
            params.push(("redirect_uri", redirect_uri.as_str()));
        }
        if let Some(ref secret) = self.config.client_secret {
            params.push(("client_secret", secret.as_str()));
        }
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier", verifier));
        }

        tracing::debug!(token_url = %self.config.token_url, "exchanging authorization code");

        let response = self
            .client
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await?;

        self.parse_token_response(response).await
    }

    /// Refresh an access token using a refresh token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidGrant`] if the refresh token is invalid
    /// or revoked.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthTokens> {
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];

        if let Some(ref secret) = self.config.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        tracing::debug!(token_url = %self.config.token_url, "refreshing access token");

        let response = self
            .client
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await?;

        self.parse_token_response(response).await
    }

    /// Check whether the given tokens are expired.
    ///
    /// Tokens without an expiry are assumed valid; tokens within 60 seconds
    /// of expiry count as expired.
    pub fn is_expired(tokens: &OAuthTokens) -> bool {
        match tokens.expires_at {
            Some(expires_at) => {
                chrono::Utc::now().timestamp() >= expires_at - EXPIRY_MARGIN_SECS
            }
            None => false,
        }
    }

    /// Parse the HTTP response from the token endpoint.
    async fn parse_token_response(&self, response: reqwest::Response) -> Result<OAuthTokens> {
        let status = response.status();

        if status.is_success() {
            let token_response: TokenResponse = response.json().await?;
            tracing::debug!("token exchange successful");
            return Ok(token_response.into_tokens(&self.config.scope_separator));
        }

        let body = response.text().await.unwrap_or_default();

        let reason = match serde_json::from_str::<TokenErrorResponse>(&body) {
            Ok(error_response) => error_response
                .error_description
                .unwrap_or(error_response.error),
            Err(_) => format!("HTTP {status}: {body}"),
        };

        Err(AuthError::InvalidGrant { reason })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
