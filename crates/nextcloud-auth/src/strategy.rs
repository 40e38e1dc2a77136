//! Login strategy: the generic code flow plus a provider's profile step.
//!
//! [`OAuthStrategy`] knows nothing about Nextcloud. It owns an [`OAuthFlow`]
//! and delegates the one provider-specific step, turning an access token
//! into a [`NormalizedProfile`], to a [`ProfileSource`]. The host
//! application decides who the user is through [`Verify`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::callback::CallbackParams;
use crate::error::{AuthError, Result};
use crate::oauth::{OAuthFlow, OAuthTokens, generate_pkce_verifier, pkce_challenge};
use crate::profile::NormalizedProfile;

// ---------------------------------------------------------------------------
// Extension points
// ---------------------------------------------------------------------------

/// Loads the user behind an access token.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    /// Provider name, also used as the strategy name.
    fn provider(&self) -> &str;

    /// Fetch and normalize the profile for `access_token`.
    async fn user_profile(&self, access_token: &str) -> Result<NormalizedProfile>;
}

/// The host application's verify callback.
///
/// Returning `Ok(None)` means the credentials are valid but the application
/// does not accept this user.
#[async_trait]
pub trait Verify: Send + Sync {
    /// The application's user type.
    type User: Send;

    /// Map an authenticated profile to an application user.
    async fn verify(
        &self,
        tokens: &OAuthTokens,
        profile: NormalizedProfile,
    ) -> Result<Option<Self::User>>;
}

// ---------------------------------------------------------------------------
// Flow values
// ---------------------------------------------------------------------------

/// Everything needed to finish a login after the redirect comes back.
///
/// Hosts typically keep this in the user's session between the two legs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    /// URL the user agent must visit.
    pub url: String,
    /// CSRF token sent with the request, when enabled.
    pub state: Option<String>,
    /// PKCE verifier matching the challenge in `url`, when enabled.
    pub code_verifier: Option<String>,
}

/// Tokens and profile from a completed code exchange.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    /// Tokens issued by the provider.
    pub tokens: OAuthTokens,
    /// The normalized profile of the token holder.
    pub profile: NormalizedProfile,
}

/// A login accepted by the verify callback.
#[derive(Debug, Clone)]
pub struct Authenticated<U> {
    /// The application user returned by [`Verify::verify`].
    pub user: U,
    /// Tokens issued by the provider.
    pub tokens: OAuthTokens,
}

/// Which optional protections the strategy applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyOptions {
    /// Send and check a random `state` value.
    pub state: bool,
    /// Send an S256 PKCE challenge.
    pub pkce: bool,
}

impl Default for StrategyOptions {
    fn default() -> Self {
        Self {
            state: true,
            pkce: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Authorization code login for one provider.
///
/// Immutable after construction; share it behind an `Arc` and call it from
/// as many concurrent requests as needed.
#[derive(Debug, Clone)]
pub struct OAuthStrategy<S> {
    flow: OAuthFlow,
    source: S,
    options: StrategyOptions,
}

impl<S: ProfileSource> OAuthStrategy<S> {
    /// Assemble a strategy from a flow and a profile source.
    pub fn from_parts(flow: OAuthFlow, source: S, options: StrategyOptions) -> Self {
        Self {
            flow,
            source,
            options,
        }
    }

    /// Strategy name, e.g. `nextcloud`.
    pub fn name(&self) -> &str {
        self.source.provider()
    }

    /// The underlying code flow.
    pub fn flow(&self) -> &OAuthFlow {
        &self.flow
    }

    /// The profile source.
    pub fn profile_source(&self) -> &S {
        &self.source
    }

    /// Start a login: generate `state`/PKCE values and the authorize URL.
    ///
    /// # Errors
    ///
    /// Fails if the authorize URL is invalid or PKCE generation fails.
    pub fn begin(&self) -> Result<AuthorizationRequest> {
        let state = self
            .options
            .state
            .then(|| uuid::Uuid::now_v7().to_string());

        let code_verifier = if self.options.pkce {
            Some(generate_pkce_verifier()?)
        } else {
            None
        };
        let challenge = code_verifier.as_deref().map(pkce_challenge);

        let url = self
            .flow
            .authorization_url(state.as_deref(), challenge.as_deref())?;

        tracing::info!(provider = self.name(), "authorization request prepared");

        Ok(AuthorizationRequest {
            url,
            state,
            code_verifier,
        })
    }

    /// Finish a login: check `state`, exchange the code, load the profile.
    ///
    /// # Errors
    ///
    /// [`AuthError::FlowFailed`] on a state mismatch, token endpoint errors
    /// from [`OAuthFlow::exchange_code`], and profile errors from the
    /// [`ProfileSource`].
    pub async fn complete(
        &self,
        request: &AuthorizationRequest,
        callback: &CallbackParams,
    ) -> Result<AuthOutcome> {
        if let Some(ref expected) = request.state
            && callback.state.as_deref() != Some(expected.as_str())
        {
            return Err(AuthError::FlowFailed {
                reason: "state mismatch".to_string(),
            });
        }

        tracing::debug!(provider = self.name(), "exchanging code for tokens");

        let tokens = self
            .flow
            .exchange_code(&callback.code, request.code_verifier.as_deref())
            .await?;

        let profile = self.source.user_profile(&tokens.access_token).await?;

        tracing::info!(provider = self.name(), user_id = %profile.id, "login completed");

        Ok(AuthOutcome { tokens, profile })
    }

    /// [`Self::complete`] followed by the host's verify callback.
    ///
    /// # Errors
    ///
    /// Everything [`Self::complete`] returns, errors from the verifier, and
    /// [`AuthError::Verification`] when the verifier returns `None`.
    pub async fn authenticate<V: Verify>(
        &self,
        request: &AuthorizationRequest,
        callback: &CallbackParams,
        verifier: &V,
    ) -> Result<Authenticated<V::User>> {
        let AuthOutcome { tokens, profile } = self.complete(request, callback).await?;
        let user_id = profile.id.clone();

        match verifier.verify(&tokens, profile).await? {
            Some(user) => Ok(Authenticated { user, tokens }),
            None => {
                tracing::warn!(provider = self.name(), user_id = %user_id, "verify callback rejected user");
                Err(AuthError::Verification {
                    reason: format!("user {user_id} was not accepted"),
                })
            }
        }
    }

    /// Load the profile for an access token obtained earlier.
    pub async fn user_profile(&self, access_token: &str) -> Result<NormalizedProfile> {
        self.source.user_profile(access_token).await
    }

    /// Trade a refresh token for a fresh token set.
    pub async fn refresh(&self, refresh_token: &str) -> Result<OAuthTokens> {
        self.flow.refresh_token(refresh_token).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::oauth::OAuthConfig;
    use crate::profile::ProfileEmail;

    /// Returns a fixed profile and counts calls.
    struct StaticSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProfileSource for StaticSource {
        fn provider(&self) -> &str {
            "static"
        }

        async fn user_profile(&self, access_token: &str) -> Result<NormalizedProfile> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(NormalizedProfile {
                provider: "static".to_string(),
                id: access_token.to_string(),
                username: "Jane".to_string(),
                display_name: "Jane".to_string(),
                emails: vec![ProfileEmail {
                    value: "jane@example.com".to_string(),
                }],
                raw: "{}".to_string(),
                json: serde_json::json!({}),
            })
        }
    }

    /// Accepts users whose id starts with `allowed`.
    struct PrefixVerifier {
        allowed: &'static str,
    }

    #[async_trait]
    impl Verify for PrefixVerifier {
        type User = String;

        async fn verify(
            &self,
            _tokens: &OAuthTokens,
            profile: NormalizedProfile,
        ) -> Result<Option<String>> {
            Ok(profile
                .id
                .starts_with(self.allowed)
                .then(|| format!("user:{}", profile.id)))
        }
    }

    fn strategy(token_url: String, options: StrategyOptions) -> OAuthStrategy<StaticSource> {
        let flow = OAuthFlow::new(OAuthConfig {
            client_id: "client".to_string(),
            client_secret: Some("secret".to_string()),
            auth_url: "https://cloud.example.com/index.php/apps/oauth2/authorize".to_string(),
            token_url,
            redirect_uri: None,
            scopes: vec!["read_user".to_string()],
            scope_separator: ",".to_string(),
        });
        OAuthStrategy::from_parts(
            flow,
            StaticSource {
                calls: AtomicUsize::new(0),
            },
            options,
        )
    }

    async fn token_server(access_token: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("code=good-code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": access_token,
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;
        server
    }

    fn callback(code: &str, state: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.to_string(),
            state: state.map(String::from),
        }
    }

    #[test]
    fn begin_generates_state_by_default() {
        let s = strategy("https://unused/token".to_string(), StrategyOptions::default());
        let request = s.begin().unwrap();

        let state = request.state.as_deref().unwrap();
        assert!(request.url.contains(&format!("state={state}")));
        assert!(request.code_verifier.is_none());
        assert!(!request.url.contains("code_challenge"));
        assert_eq!(s.name(), "static");
    }

    #[test]
    fn begin_with_pkce_and_without_state() {
        let s = strategy(
            "https://unused/token".to_string(),
            StrategyOptions {
                state: false,
                pkce: true,
            },
        );
        let request = s.begin().unwrap();

        assert!(request.state.is_none());
        let verifier = request.code_verifier.as_deref().unwrap();
        assert!(request.url.contains(&pkce_challenge(verifier)));
        assert!(request.url.contains("code_challenge_method=S256"));
    }

    #[test]
    fn begin_generates_fresh_state_each_time() {
        let s = strategy("https://unused/token".to_string(), StrategyOptions::default());
        assert_ne!(s.begin().unwrap().state, s.begin().unwrap().state);
    }

    #[tokio::test]
    async fn complete_rejects_state_mismatch_before_exchange() {
        let s = strategy("https://unused/token".to_string(), StrategyOptions::default());
        let request = s.begin().unwrap();

        let err = s
            .complete(&request, &callback("good-code", Some("forged")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("state mismatch"));

        let err = s
            .complete(&request, &callback("good-code", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::FlowFailed { .. }));
        assert_eq!(s.profile_source().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn complete_exchanges_code_and_loads_profile() {
        let server = token_server("abc-token").await;
        let s = strategy(format!("{}/token", server.uri()), StrategyOptions::default());
        let request = s.begin().unwrap();

        let outcome = s
            .complete(&request, &callback("good-code", request.state.as_deref()))
            .await
            .unwrap();

        assert_eq!(outcome.tokens.access_token, "abc-token");
        assert_eq!(outcome.profile.id, "abc-token");
        assert_eq!(s.profile_source().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn authenticate_returns_verified_user() {
        let server = token_server("ok-user").await;
        let s = strategy(format!("{}/token", server.uri()), StrategyOptions::default());
        let request = s.begin().unwrap();

        let authenticated = s
            .authenticate(
                &request,
                &callback("good-code", request.state.as_deref()),
                &PrefixVerifier { allowed: "ok-" },
            )
            .await
            .unwrap();

        assert_eq!(authenticated.user, "user:ok-user");
        assert_eq!(authenticated.tokens.access_token, "ok-user");
    }

    #[tokio::test]
    async fn authenticate_reports_rejection() {
        let server = token_server("banned-user").await;
        let s = strategy(format!("{}/token", server.uri()), StrategyOptions::default());
        let request = s.begin().unwrap();

        let err = s
            .authenticate(
                &request,
                &callback("good-code", request.state.as_deref()),
                &PrefixVerifier { allowed: "ok-" },
            )
            .await
            .unwrap_err();

        match err {
            AuthError::Verification { reason } => assert!(reason.contains("banned-user")),
            other => panic!("expected verification error, got: {other:?}"),
        }
    }

    #[test]
    fn authorization_request_round_trips_through_session_json() {
        let s = strategy(
            "https://unused/token".to_string(),
            StrategyOptions {
                state: true,
                pkce: true,
            },
        );
        let request = s.begin().unwrap();

        let stored = serde_json::to_string(&request).unwrap();
        let restored: AuthorizationRequest = serde_json::from_str(&stored).unwrap();
        assert_eq!(restored.state, request.state);
        assert_eq!(restored.code_verifier, request.code_verifier);
    }
}
