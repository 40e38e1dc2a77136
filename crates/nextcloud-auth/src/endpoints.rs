//! Resolution of the three provider endpoints from a base URL.
//!
//! App routes (authorize, token) live under `index.php/` unless the instance
//! runs with pretty URLs. The OCS user endpoint is always served at a fixed
//! path, so it never takes the prefix.

use url::Url;

use crate::config::NextcloudOptions;
use crate::error::{AuthError, Result};

/// Path segment prepended to app routes when pretty URLs are off.
const INDEX_PREFIX: &str = "index.php/";

const AUTHORIZE_PATH: &str = "apps/oauth2/authorize";
const TOKEN_PATH: &str = "apps/oauth2/api/v1/token";
const PROFILE_PATH: &str = "ocs/v2.php/cloud/user?format=json";

/// The resolved authorize, token, and profile URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Where the user agent is sent to grant access.
    pub authorization_url: String,
    /// Where authorization codes are exchanged for tokens.
    pub token_url: String,
    /// OCS endpoint returning the authenticated user.
    pub profile_url: String,
}

impl Endpoints {
    /// Derive all three endpoints from `base_url`.
    ///
    /// Relative paths are joined with RFC 3986 semantics, so a base with a
    /// path but no trailing slash loses its last segment.
    pub fn derive(base_url: &Url, pretty_urls: bool) -> Result<Self> {
        let prefix = if pretty_urls { "" } else { INDEX_PREFIX };

        Ok(Self {
            authorization_url: base_url.join(&format!("{prefix}{AUTHORIZE_PATH}"))?.into(),
            token_url: base_url.join(&format!("{prefix}{TOKEN_PATH}"))?.into(),
            profile_url: base_url.join(PROFILE_PATH)?.into(),
        })
    }

    /// Resolve endpoints from options, letting explicit URLs win.
    ///
    /// Overrides are used verbatim. The base URL is only required when at
    /// least one endpoint still has to be derived.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if a derivation is needed and
    /// `base_url` is missing or not an absolute URL.
    pub fn resolve(options: &NextcloudOptions) -> Result<Self> {
        let all_overridden = options.authorization_url.is_some()
            && options.token_url.is_some()
            && options.profile_url.is_some();

        let derived = if all_overridden {
            None
        } else {
            let raw = options
                .base_url
                .as_deref()
                .ok_or_else(|| AuthError::config("missing base_url"))?;
            let base = Url::parse(raw)
                .map_err(|e| AuthError::config(format!("invalid base_url `{raw}`: {e}")))?;
            Some(Self::derive(&base, options.pretty_urls)?)
        };

        let pick = |explicit: &Option<String>, derived: Option<&String>| -> String {
            explicit
                .clone()
                .or_else(|| derived.cloned())
                .unwrap_or_default()
        };

        Ok(Self {
            authorization_url: pick(
                &options.authorization_url,
                derived.as_ref().map(|d| &d.authorization_url),
            ),
            token_url: pick(&options.token_url, derived.as_ref().map(|d| &d.token_url)),
            profile_url: pick(
                &options.profile_url,
                derived.as_ref().map(|d| &d.profile_url),
            ),
        })
    }
}
