//! The Nextcloud strategy: [`OAuthStrategy`] wired to Nextcloud endpoints.

use crate::config::NextcloudOptions;
use crate::endpoints::Endpoints;
use crate::error::{AuthError, Result};
use crate::oauth::{OAuthConfig, OAuthFlow};
use crate::profile::NextcloudProfile;
use crate::strategy::{OAuthStrategy, StrategyOptions};
use crate::transport::{AuthenticatedGet, ReqwestTransport};

/// Login strategy for a Nextcloud instance.
///
/// # Example
///
/// ```rust,no_run
/// use nextcloud_auth::{NextcloudOptions, NextcloudStrategy};
///
/// # fn example() -> nextcloud_auth::Result<()> {
/// let mut options = NextcloudOptions::new("https://cloud.example.com", "client-id", "secret");
/// options.callback_url = Some("https://app.example.net/auth/nextcloud/callback".to_string());
///
/// let strategy = NextcloudStrategy::new(options)?;
/// let request = strategy.begin()?;
/// println!("redirect the user to {}", request.url);
/// # Ok(())
/// # }
/// ```
pub type NextcloudStrategy<T = ReqwestTransport> = OAuthStrategy<NextcloudProfile<T>>;

impl OAuthStrategy<NextcloudProfile<ReqwestTransport>> {
    /// Build a strategy that talks to Nextcloud over `reqwest`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if `client_id` is missing, or
    /// if `base_url` is missing or invalid while an endpoint still needs
    /// deriving.
    pub fn new(options: NextcloudOptions) -> Result<Self> {
        Self::with_transport(options, ReqwestTransport::new())
    }
}

impl<T: AuthenticatedGet> OAuthStrategy<NextcloudProfile<T>> {
    /// Build a strategy whose profile requests go through `transport`.
    ///
    /// # Errors
    ///
    /// Same as [`NextcloudStrategy::new`].
    pub fn with_transport(options: NextcloudOptions, transport: T) -> Result<Self> {
        let client_id = options
            .client_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AuthError::config("missing client_id"))?;

        let endpoints = Endpoints::resolve(&options)?;

        tracing::debug!(
            authorization_url = %endpoints.authorization_url,
            token_url = %endpoints.token_url,
            profile_url = %endpoints.profile_url,
            "resolved nextcloud endpoints"
        );

        let flow = OAuthFlow::new(OAuthConfig {
            client_id,
            client_secret: options.client_secret.clone(),
            auth_url: endpoints.authorization_url,
            token_url: endpoints.token_url,
            redirect_uri: options.callback_url.clone(),
            scopes: options.scopes(),
            scope_separator: options.scope_separator.clone(),
        });

        let source = NextcloudProfile::new(endpoints.profile_url, transport);

        Ok(Self::from_parts(
            flow,
            source,
            StrategyOptions {
                state: options.state,
                pkce: options.pkce,
            },
        ))
    }

    /// The resolved endpoints this strategy uses.
    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            authorization_url: self.flow().config().auth_url.clone(),
            token_url: self.flow().config().token_url.clone(),
            profile_url: self.profile_source().profile_url().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> NextcloudOptions {
        NextcloudOptions::new("https://nextcloud.example.com", "ABC123", "secret")
    }

    #[test]
    fn named_nextcloud() {
        let strategy = NextcloudStrategy::new(options()).unwrap();
        assert_eq!(strategy.name(), "nextcloud");
    }

    #[test]
    fn default_profile_url() {
        let strategy = NextcloudStrategy::new(options()).unwrap();
        assert_eq!(
            strategy.endpoints().profile_url,
            "https://nextcloud.example.com/ocs/v2.php/cloud/user?format=json"
        );
    }

    #[test]
    fn default_options_are_rejected() {
        let err = NextcloudStrategy::new(NextcloudOptions::default()).unwrap_err();
        assert!(matches!(err, AuthError::InvalidConfig { .. }));
    }

    #[test]
    fn missing_base_url_is_rejected() {
        let mut opts = options();
        opts.base_url = None;
        let err = NextcloudStrategy::new(opts).unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn empty_client_id_is_rejected() {
        let mut opts = options();
        opts.client_id = Some(String::new());
        let err = NextcloudStrategy::new(opts).unwrap_err();
        assert!(err.to_string().contains("client_id"));
    }

    #[test]
    fn authorize_url_carries_default_scope() {
        let mut opts = options();
        opts.callback_url = Some("https://www.example.net/auth/nextcloud/callback".to_string());
        let request = NextcloudStrategy::new(opts).unwrap().begin().unwrap();

        let url = url::Url::parse(&request.url).unwrap();
        assert_eq!(url.path(), "/index.php/apps/oauth2/authorize");

        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["scope"], "read_user");
        assert_eq!(params["client_id"], "ABC123");
        assert_eq!(
            params["redirect_uri"],
            "https://www.example.net/auth/nextcloud/callback"
        );
    }

    #[test]
    fn strategy_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NextcloudStrategy>();
    }
}
