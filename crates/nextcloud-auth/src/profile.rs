//! Nextcloud user profile retrieval and normalization.
//!
//! The OCS user endpoint wraps the account in an envelope:
//!
//! ```json
//! { "ocs": { "meta": { "status": "ok" }, "data": { "id": "johnsmith", "display-name": "John Smith", "email": "john@example.com" } } }
//! ```
//!
//! [`NextcloudProfile`] fetches that document with the access token and
//! flattens it into a [`NormalizedProfile`]. Failures are reported as one of
//! [`AuthError::ProfileFetch`], [`AuthError::ProfileParse`] or
//! [`AuthError::ProfileShape`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AuthError, Result};
use crate::strategy::ProfileSource;
use crate::transport::AuthenticatedGet;

/// Provider name stamped on every profile.
pub const PROVIDER_NAME: &str = "nextcloud";

/// One email address attached to a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileEmail {
    /// The address. Empty when the account has none.
    pub value: String,
}

/// Provider-agnostic user record handed to the verify callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedProfile {
    /// Always [`PROVIDER_NAME`] for this adapter.
    pub provider: String,
    /// Stable account identifier, stringified if numeric on the wire.
    pub id: String,
    /// Mirrors the display name; Nextcloud's OCS payload is used as-is.
    pub username: String,
    /// Human-readable full name.
    pub display_name: String,
    /// Exactly one entry: the account's email.
    pub emails: Vec<ProfileEmail>,
    /// Response body exactly as received.
    #[serde(rename = "_raw")]
    pub raw: String,
    /// The parsed envelope, for fields not promoted above.
    #[serde(rename = "_json")]
    pub json: Value,
}

impl NormalizedProfile {
    /// The first (and only) email, if non-empty.
    pub fn primary_email(&self) -> Option<&str> {
        self.emails
            .first()
            .map(|e| e.value.as_str())
            .filter(|v| !v.is_empty())
    }
}

/// Parse a profile response body.
///
/// # Errors
///
/// - [`AuthError::ProfileParse`] if `body` is not JSON.
/// - [`AuthError::ProfileShape`] if `ocs.data`, `id` or `display-name` is
///   missing or has the wrong type, or `email` is neither a string nor null.
pub fn parse_profile(body: &str) -> Result<NormalizedProfile> {
    let json: Value = serde_json::from_str(body).map_err(|_| AuthError::ProfileParse)?;

    let data = json
        .get("ocs")
        .ok_or_else(|| AuthError::shape("ocs"))?
        .get("data")
        .filter(|d| d.is_object())
        .ok_or_else(|| AuthError::shape("ocs.data"))?;

    let id = match data.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => number_to_id(n),
        _ => return Err(AuthError::shape("ocs.data.id")),
    };

    let display_name = data
        .get("display-name")
        .and_then(Value::as_str)
        .ok_or_else(|| AuthError::shape("ocs.data.display-name"))?
        .to_string();

    let email = match data.get("email") {
        Some(Value::String(s)) => s.clone(),
        None | Some(Value::Null) => String::new(),
        Some(_) => return Err(AuthError::shape("ocs.data.email")),
    };

    Ok(NormalizedProfile {
        provider: PROVIDER_NAME.to_string(),
        id,
        username: display_name.clone(),
        display_name,
        emails: vec![ProfileEmail { value: email }],
        raw: body.to_string(),
        json,
    })
}

/// Largest integer an `f64` holds exactly (2^53).
const MAX_EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

/// Render a numeric id the same way regardless of wire encoding, so `42`,
/// `42.0` and `4.2e1` all become `"42"`. Only true fractions keep a dot.
fn number_to_id(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() <= MAX_EXACT_FLOAT_INT => {
            // `as` saturates, and the bound above keeps the value exact. `-0` becomes 0.
            (f as i64).to_string()
        }
        _ => n.to_string(),
    }
}

/// Fetches and normalizes the authenticated user's Nextcloud profile.
///
/// Holds no per-call state, so one instance can serve concurrent logins.
#[derive(Debug, Clone)]
pub struct NextcloudProfile<T> {
    profile_url: String,
    transport: T,
}

impl<T: AuthenticatedGet> NextcloudProfile<T> {
    /// Create a fetcher for `profile_url` using `transport`.
    pub fn new(profile_url: impl Into<String>, transport: T) -> Self {
        Self {
            profile_url: profile_url.into(),
            transport,
        }
    }

    /// The endpoint this fetcher queries.
    pub fn profile_url(&self) -> &str {
        &self.profile_url
    }

    /// Fetch the profile belonging to `access_token`.
    ///
    /// Issues exactly one GET and never retries.
    ///
    /// # Errors
    ///
    /// [`AuthError::ProfileFetch`] wraps any transport failure; parse and
    /// shape errors are as for [`parse_profile`].
    pub async fn fetch_profile(&self, access_token: &str) -> Result<NormalizedProfile> {
        let response = self
            .transport
            .get(&self.profile_url, access_token)
            .await
            .map_err(|source| AuthError::ProfileFetch { source })?;

        let profile = parse_profile(&response.body)?;
        tracing::debug!(provider = PROVIDER_NAME, user_id = %profile.id, "user profile loaded");
        Ok(profile)
    }
}

#[async_trait]
impl<T: AuthenticatedGet> ProfileSource for NextcloudProfile<T> {
    fn provider(&self) -> &str {
        PROVIDER_NAME
    }

    async fn user_profile(&self, access_token: &str) -> Result<NormalizedProfile> {
        self.fetch_profile(access_token).await
    }
}
