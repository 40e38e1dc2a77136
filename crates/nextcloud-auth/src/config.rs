//! Adapter configuration.
//!
//! [`NextcloudOptions`] is the one place all knobs live. It can be built in
//! code, read from the `[nextcloud]` table of a TOML file, and overlaid with
//! `NEXTCLOUD_*` environment variables. Nothing is validated here; the
//! strategy constructor rejects incomplete options.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// Scope requested when none is configured.
pub const DEFAULT_SCOPE: &str = "read_user";

/// Separator Nextcloud expects between scopes.
pub const DEFAULT_SCOPE_SEPARATOR: &str = ",";

/// Options accepted by [`crate::NextcloudStrategy::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NextcloudOptions {
    /// Root origin of the Nextcloud instance, e.g. `https://cloud.example.com`.
    pub base_url: Option<String>,

    /// Whether the instance serves app routes without the `index.php/` segment.
    pub pretty_urls: bool,

    /// Explicit authorize endpoint; derived from `base_url` when absent.
    pub authorization_url: Option<String>,

    /// Explicit token endpoint; derived from `base_url` when absent.
    pub token_url: Option<String>,

    /// Explicit profile endpoint; derived from `base_url` when absent.
    pub profile_url: Option<String>,

    /// Scopes to request, joined by `scope_separator`.
    pub scope: String,

    /// Separator placed between scopes in the authorize request.
    pub scope_separator: String,

    /// OAuth client identifier registered in Nextcloud.
    pub client_id: Option<String>,

    /// OAuth client secret registered in Nextcloud.
    pub client_secret: Option<String>,

    /// Redirect URI registered for the client.
    pub callback_url: Option<String>,

    /// Send an S256 PKCE challenge with the authorize request.
    pub pkce: bool,

    /// Send and verify a random `state` parameter.
    pub state: bool,
}

impl Default for NextcloudOptions {
    fn default() -> Self {
        Self {
            base_url: None,
            pretty_urls: false,
            authorization_url: None,
            token_url: None,
            profile_url: None,
            scope: DEFAULT_SCOPE.to_string(),
            scope_separator: DEFAULT_SCOPE_SEPARATOR.to_string(),
            client_id: None,
            client_secret: None,
            callback_url: None,
            pkce: false,
            state: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    nextcloud: NextcloudOptions,
}

impl NextcloudOptions {
    /// Options with the three mandatory values set and everything else at
    /// its default.
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            base_url: Some(base_url.into()),
            client_id: Some(client_id.into()),
            client_secret: Some(client_secret.into()),
            ..Self::default()
        }
    }

    /// Parse options from the `[nextcloud]` table of a TOML document.
    ///
    /// A document without that table yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if the document is not valid
    /// TOML or a value has the wrong type.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| AuthError::config(e.to_string()))?;
        Ok(file.nextcloud)
    }

    /// Read options from a TOML file on disk.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Io`] if the file cannot be read, or
    /// [`AuthError::InvalidConfig`] if it cannot be parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loaded nextcloud configuration");
        Self::from_toml_str(&content)
    }

    /// Overlay `NEXTCLOUD_*` variables from the process environment.
    pub fn apply_env(self) -> Self {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Overlay `NEXTCLOUD_*` variables using a custom lookup.
    ///
    /// Empty values are ignored.
    pub fn apply_env_with<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(v) = get("NEXTCLOUD_BASE_URL") {
            self.base_url = Some(v);
        }
        if let Some(v) = get("NEXTCLOUD_CLIENT_ID") {
            self.client_id = Some(v);
        }
        if let Some(v) = get("NEXTCLOUD_CLIENT_SECRET") {
            self.client_secret = Some(v);
        }
        if let Some(v) = get("NEXTCLOUD_CALLBACK_URL") {
            self.callback_url = Some(v);
        }
        if let Some(v) = get("NEXTCLOUD_SCOPE") {
            self.scope = v;
        }
        if let Some(v) = get("NEXTCLOUD_PRETTY_URLS") {
            self.pretty_urls = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        self
    }

    /// Split the configured scope string into individual scopes.
    pub fn scopes(&self) -> Vec<String> {
        if self.scope_separator.is_empty() {
            return vec![self.scope.clone()];
        }

        self.scope
            .split(self.scope_separator.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_match_provider_expectations() {
        let options = NextcloudOptions::default();
        assert_eq!(options.scope, "read_user");
        assert_eq!(options.scope_separator, ",");
        assert!(!options.pretty_urls);
        assert!(options.state);
        assert!(!options.pkce);
        assert!(options.base_url.is_none());
    }

    #[test]
    fn toml_section_is_read() {
        let options = NextcloudOptions::from_toml_str(
            r#"
            [nextcloud]
            base_url = "https://cloud.example.com"
            pretty_urls = true
            client_id = "abc"
            client_secret = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(options.base_url.as_deref(), Some("https://cloud.example.com"));
        assert!(options.pretty_urls);
        assert_eq!(options.client_id.as_deref(), Some("abc"));
        assert_eq!(options.scope, "read_user");
    }

    #[test]
    fn missing_section_gives_defaults() {
        let options = NextcloudOptions::from_toml_str("[other]\nkey = 1\n").unwrap();
        assert_eq!(options, NextcloudOptions::default());
    }

    #[test]
    fn wrong_type_is_invalid_config() {
        let err = NextcloudOptions::from_toml_str("[nextcloud]\npretty_urls = \"maybe\"\n")
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidConfig { .. }));
    }

    #[test]
    fn env_overlay_skips_empty_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("NEXTCLOUD_BASE_URL", "https://env.example.com"),
            ("NEXTCLOUD_CLIENT_ID", ""),
            ("NEXTCLOUD_PRETTY_URLS", "TRUE"),
        ]);

        let options = NextcloudOptions::new("https://file.example.com", "file-id", "s")
            .apply_env_with(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(options.base_url.as_deref(), Some("https://env.example.com"));
        assert_eq!(options.client_id.as_deref(), Some("file-id"));
        assert!(options.pretty_urls);
    }

    #[test]
    fn scopes_split_on_separator() {
        let mut options = NextcloudOptions::default();
        options.scope = "read_user, files".to_string();
        assert_eq!(options.scopes(), vec!["read_user", "files"]);

        options.scope_separator = " ".to_string();
        options.scope = "a b".to_string();
        assert_eq!(options.scopes(), vec!["a", "b"]);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default.toml");
        std::fs::write(
            &path,
            "[nextcloud]\nbase_url = \"https://cloud.example.com\"\n",
        )
        .unwrap();

        let options = NextcloudOptions::load(&path).unwrap();
        assert_eq!(options.base_url.as_deref(), Some("https://cloud.example.com"));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = NextcloudOptions::load("/nonexistent/nextcloud.toml").unwrap_err();
        assert!(matches!(err, AuthError::Io(_)));
    }
}
