//! Nextcloud OAuth 2.0 login.
//!
//! This crate lets an application sign users in with a self-hosted
//! Nextcloud instance:
//!
//! - **Endpoint resolution** from a base URL, honouring pretty-URL installs
//! - **Authorization code flow** with optional PKCE (RFC 7636)
//! - **Profile normalization** of the OCS `cloud/user` response into a flat
//!   [`NormalizedProfile`]
//! - **Local callback listener** for command-line and desktop hosts
//!
//! # Architecture
//!
//! ```text
//! NextcloudStrategy = OAuthStrategy<NextcloudProfile<T>>
//! ├── OAuthFlow          (authorize URL, code exchange, refresh)
//! ├── NextcloudProfile   (GET ocs/v2.php/cloud/user, normalization)
//! │   └── T: AuthenticatedGet   (ReqwestTransport by default)
//! └── Verify             (host application's user lookup)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use nextcloud_auth::{CallbackServer, NextcloudOptions, NextcloudStrategy};
//!
//! # async fn example() -> nextcloud_auth::Result<()> {
//! let mut options = NextcloudOptions::new("https://cloud.example.com", "client-id", "secret");
//! options.callback_url = Some("http://127.0.0.1:8400/callback".to_string());
//!
//! let strategy = NextcloudStrategy::new(options)?;
//! let request = strategy.begin()?;
//! println!("open {}", request.url);
//!
//! let callback = CallbackServer::start(8400, 300).await?;
//! let outcome = strategy.complete(&request, &callback).await?;
//! println!("signed in as {}", outcome.profile.display_name);
//! # Ok(())
//! # }
//! ```

pub mod callback;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod nextcloud;
pub mod oauth;
pub mod profile;
pub mod strategy;
pub mod transport;

pub use callback::{CallbackParams, CallbackServer};
pub use config::NextcloudOptions;
pub use endpoints::Endpoints;
pub use error::{AuthError, Result};
pub use nextcloud::NextcloudStrategy;
pub use oauth::{OAuthConfig, OAuthFlow, OAuthTokens};
pub use profile::{NextcloudProfile, NormalizedProfile, PROVIDER_NAME, ProfileEmail, parse_profile};
pub use strategy::{
    AuthOutcome, Authenticated, AuthorizationRequest, OAuthStrategy, ProfileSource,
    StrategyOptions, Verify,
};
pub use transport::{AuthenticatedGet, ReqwestTransport, TransportError, TransportResponse};
