//! Google OAuth2 provider for Calendar access.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use warp::Filter;

use calmirror_core::{AuthError, GoogleConfig};

use crate::storage::{TokenSet, TokenStorage};
use crate::GOOGLE_SERVICE;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";
const USERINFO_SCOPE: &str = "https://www.googleapis.com/auth/userinfo.email";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleTokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
}

impl GoogleTokenResponse {
    /// Build a storable token set. Google omits the refresh token on refresh,
    /// so the previous one is carried over.
    pub fn into_token_set(self, previous_refresh: Option<String>) -> TokenSet {
        TokenSet {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            expires_at: chrono::Utc::now().timestamp() + self.expires_in as i64,
            scopes: self
                .scope
                .split_whitespace()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

type CallbackSender = Arc<Mutex<Option<oneshot::Sender<HashMap<String, String>>>>>;

pub struct GoogleOAuth2Provider {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_port: u16,
    token_url: String,
}

impl GoogleOAuth2Provider {
    pub fn new(config: &GoogleConfig) -> Result<Self> {
        if !config.is_configured() {
            return Err(AuthError::NotConfigured.into());
        }

        Ok(Self {
            client: reqwest::Client::new(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_port: config.redirect_port,
            token_url: GOOGLE_TOKEN_URL.to_string(),
        })
    }

    #[cfg(test)]
    fn new_with_token_url(config: &GoogleConfig, token_url: &str) -> Result<Self> {
        let mut provider = Self::new(config)?;
        provider.token_url = token_url.to_string();
        Ok(provider)
    }

    fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/callback", self.redirect_port)
    }

    /// Generate authorization URL for OAuth flow.
    /// Returns (url, state) where state should be verified on callback.
    pub fn authorization_url(&self) -> (String, String) {
        let state = uuid::Uuid::new_v4().to_string();
        let scopes = format!("{} {}", CALENDAR_SCOPE, USERINFO_SCOPE);

        let url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&access_type=offline&prompt=consent",
            GOOGLE_AUTH_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri()),
            urlencoding::encode(&scopes),
            urlencoding::encode(&state),
        );

        (url, state)
    }

    /// Exchange authorization code for tokens.
    #[tracing::instrument(skip(self, code), level = "info")]
    pub async fn exchange_code(&self, code: &str) -> Result<GoogleTokenResponse> {
        let redirect_uri = self.redirect_uri();
        self.token_request(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", &redirect_uri),
        ])
        .await
        .context("Token exchange failed")
    }

    /// Refresh an expired access token.
    #[tracing::instrument(skip(self, refresh_token), level = "info")]
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<GoogleTokenResponse> {
        self.token_request(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .await
        .context("Token refresh failed")
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<GoogleTokenResponse> {
        let response = self
            .client
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .context("Failed to send token request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AuthError::OAuthFailed(format!("{}: {}", status, error_text)).into());
        }

        response
            .json::<GoogleTokenResponse>()
            .await
            .context("Failed to parse token response")
    }

    /// Run the full browser flow: local callback server, consent page,
    /// code exchange. The resulting token set is stored.
    pub async fn authenticate(&self, storage: &TokenStorage) -> Result<TokenSet> {
        let (auth_url, state) = self.authorization_url();

        let (tx, rx) = oneshot::channel();
        let tx: CallbackSender = Arc::new(Mutex::new(Some(tx)));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let routes = warp::get()
            .and(warp::path("callback"))
            .and(warp::query::<HashMap<String, String>>())
            .and(warp::any().map(move || tx.clone()))
            .and_then(handle_callback);

        let (addr, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(([127, 0, 0, 1], self.redirect_port), async {
                shutdown_rx.await.ok();
            })
            .map_err(|e| AuthError::OAuthFailed(e.to_string()))
            .context("Failed to start OAuth callback server")?;
        let server = tokio::spawn(server);
        tracing::debug!("OAuth callback server listening on {}", addr);

        if let Err(e) = webbrowser::open(&auth_url) {
            tracing::warn!("Could not open a browser: {}", e);
        }
        println!("Open this URL to authorize calmirror:\n\n  {}\n", auth_url);

        let params = rx.await.context("Failed to receive OAuth callback")?;
        let _ = shutdown_tx.send(());
        let _ = server.await;

        if let Some(error) = params.get("error") {
            return Err(AuthError::OAuthFailed(error.clone()).into());
        }
        if params.get("state").map(String::as_str) != Some(state.as_str()) {
            return Err(AuthError::StateMismatch.into());
        }
        let code = params
            .get("code")
            .ok_or_else(|| AuthError::OAuthFailed("callback carried no code".to_string()))?;

        let token_set = self.exchange_code(code).await?.into_token_set(None);
        storage.store_token(GOOGLE_SERVICE, &token_set)?;

        tracing::info!("Google sign-in completed");
        Ok(token_set)
    }

    /// Get a valid access token, refreshing and re-storing it when it is
    /// within five minutes of expiry.
    pub async fn access_token(&self, storage: &TokenStorage) -> Result<String> {
        let token_set = storage.retrieve_token(GOOGLE_SERVICE)?;

        if !token_set.needs_refresh() {
            return Ok(token_set.access_token);
        }

        let refresh_token = token_set
            .refresh_token
            .clone()
            .ok_or(AuthError::TokenExpired)?;

        tracing::info!("Refreshing Google access token");
        let refreshed = self
            .refresh_token(&refresh_token)
            .await?
            .into_token_set(Some(refresh_token));
        storage.store_token(GOOGLE_SERVICE, &refreshed)?;

        Ok(refreshed.access_token)
    }
}

async fn handle_callback(
    params: HashMap<String, String>,
    tx: CallbackSender,
) -> Result<impl warp::Reply, warp::Rejection> {
    if let Some(sender) = tx.lock().await.take() {
        let _ = sender.send(params);
    }

    Ok(warp::reply::html(
        "<html><body><h1>Authorization complete</h1><p>You can close this window and return to the terminal.</p></body></html>",
    ))
}
