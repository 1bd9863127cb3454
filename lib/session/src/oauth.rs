//! OAuth token endpoint access.
//!
//! [`TokenEndpoint`] is the seam between the session manager and the
//! identity provider. [`OAuthClient`] is the production implementation built
//! on the `oauth2` crate; tests substitute scripted endpoints.

use crate::error::RefreshError;
use crate::session::Credentials;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use oauth2::{
    AuthorizationCode, ClientId, ClientSecret, EmptyExtraTokenFields, RedirectUrl, RefreshToken,
    RequestTokenError, StandardTokenResponse, TokenResponse, TokenUrl,
    basic::{BasicClient, BasicTokenType},
};

/// Google OAuth token URL.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Access token lifetime assumed when the provider omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECONDS: i64 = 3600;

type CalendarTokenResponse = StandardTokenResponse<EmptyExtraTokenFields, BasicTokenType>;

/// A token grant returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Present only when the provider rotated or issued a refresh token.
    pub refresh_token: Option<String>,
    pub expires_in_seconds: Option<u64>,
}

impl TokenGrant {
    /// Converts the grant into a credential bundle anchored at now.
    #[must_use]
    pub fn into_credentials(self) -> Credentials {
        let lifetime = self
            .expires_in_seconds
            .and_then(|s| i64::try_from(s).ok())
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECONDS);
        Credentials::new(
            self.access_token,
            self.refresh_token,
            Utc::now() + Duration::seconds(lifetime),
        )
    }
}

/// Identity provider token endpoint.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchanges an authorization code for an initial grant.
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, RefreshError>;

    /// Exchanges a refresh token for a new access token.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, RefreshError>;
}

/// OAuth client configuration for the calendar provider.
#[derive(Clone)]
pub struct OAuthClient {
    client_id: String,
    client_secret: String,
    token_url: String,
    redirect_url: String,
    http: reqwest::Client,
}

impl OAuthClient {
    /// Creates a client against the given token endpoint.
    ///
    /// # Errors
    ///
    /// Returns `RefreshError::Configuration` if a URL is malformed or the HTTP
    /// client cannot be built.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_url: impl Into<String>,
        redirect_url: impl Into<String>,
    ) -> Result<Self, RefreshError> {
        let token_url = token_url.into();
        let redirect_url = redirect_url.into();

        TokenUrl::new(token_url.clone()).map_err(|e| RefreshError::Configuration {
            reason: format!("invalid token URL: {e}"),
        })?;
        RedirectUrl::new(redirect_url.clone()).map_err(|e| RefreshError::Configuration {
            reason: format!("invalid redirect URL: {e}"),
        })?;

        // Token endpoints must not be followed through redirects.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| RefreshError::Configuration {
                reason: format!("HTTP client error: {e}"),
            })?;

        Ok(Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url,
            redirect_url,
            http,
        })
    }

    fn urls(&self) -> Result<(TokenUrl, RedirectUrl), RefreshError> {
        let token = TokenUrl::new(self.token_url.clone()).map_err(|e| {
            RefreshError::Configuration {
                reason: e.to_string(),
            }
        })?;
        let redirect = RedirectUrl::new(self.redirect_url.clone()).map_err(|e| {
            RefreshError::Configuration {
                reason: e.to_string(),
            }
        })?;
        Ok((token, redirect))
    }
}

fn grant_from(response: &CalendarTokenResponse) -> TokenGrant {
    TokenGrant {
        access_token: response.access_token().secret().clone(),
        refresh_token: response.refresh_token().map(|t| t.secret().clone()),
        expires_in_seconds: response.expires_in().map(|d| d.as_secs()),
    }
}

fn map_request_error<RE, T>(err: RequestTokenError<RE, T>) -> RefreshError
where
    RE: std::error::Error + 'static,
    T: oauth2::ErrorResponse + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response) => RefreshError::Rejected {
            reason: format!("{response:?}"),
        },
        other => RefreshError::Transport {
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl TokenEndpoint for OAuthClient {
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, RefreshError> {
        let (token_url, redirect_url) = self.urls()?;
        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url);

        let response: CalendarTokenResponse = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(map_request_error)?;

        Ok(grant_from(&response))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, RefreshError> {
        let (token_url, _) = self.urls()?;
        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_token_uri(token_url);

        let response: CalendarTokenResponse = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await
            .map_err(map_request_error)?;

        Ok(grant_from(&response))
    }
}
