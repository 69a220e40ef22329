use std::sync::Arc;

use sea_orm::{ActiveModelBehavior, ActiveModelTrait, EntityTrait, QueryOrder, Set};
use tokio::sync::Mutex;

use crate::database::Database;
use crate::entities;
use crate::ports::spotify::{ApiResult, SpotifyApiError};
use crate::spotify_rs::auth::{self, TokenRequestError};
use crate::spotify_rs::types::SpotifyTokenResponse;

/// Tokens are refreshed this long before Spotify would reject them.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct SpotifyApiCredentials {
    client_id: String,
    client_secret: String,
}

impl SpotifyApiCredentials {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            client_id,
            client_secret,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: i64,
}

impl CachedToken {
    fn is_fresh(&self, now: i64) -> bool {
        now + EXPIRY_MARGIN_SECS < self.expires_at
    }
}

/// Hands out a valid access token, persisting it so restarts reuse it.
///
/// Expired tokens are renewed with the stored refresh token when there is one,
/// otherwise with the client credentials grant.
pub struct CredentialStore {
    db: Arc<Database>,
    http: reqwest::Client,
    token_url: String,
    credentials: SpotifyApiCredentials,
    cached: Mutex<Option<CachedToken>>,
}

impl CredentialStore {
    pub fn new(db: Arc<Database>, token_url: String, credentials: SpotifyApiCredentials) -> Self {
        Self {
            db,
            http: reqwest::Client::new(),
            token_url,
            credentials,
            cached: Mutex::new(None),
        }
    }

    pub async fn access_token(&self) -> ApiResult<String> {
        let now = chrono::Utc::now().timestamp();
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref()
            && token.is_fresh(now)
        {
            return Ok(token.access_token.clone());
        }

        let stored = self.stored_token().await?;
        if let Some(stored) = &stored {
            let token = CachedToken {
                access_token: stored.access_token.clone(),
                expires_at: stored.expires_at,
            };
            if token.is_fresh(now) {
                *cached = Some(token.clone());
                return Ok(token.access_token);
            }
        }

        let response = self.renew(stored.as_ref()).await?;
        let saved = self.save_token(stored, &response, now).await?;
        tracing::info!(expires_at = saved.expires_at, "Obtained new Spotify access token");

        let token = CachedToken {
            access_token: saved.access_token,
            expires_at: saved.expires_at,
        };
        *cached = Some(token.clone());
        Ok(token.access_token)
    }

    /// Forget the current token, e.g. after Spotify answered 401 with it.
    pub async fn invalidate(&self) -> ApiResult<()> {
        *self.cached.lock().await = None;
        if let Some(stored) = self.stored_token().await? {
            let mut model: entities::spotify_token::ActiveModel = stored.into();
            model.expires_at = Set(0);
            model.update(&self.db.conn).await.map_err(database_error)?;
        }
        Ok(())
    }

    async fn renew(
        &self,
        stored: Option<&entities::spotify_token::Model>,
    ) -> ApiResult<SpotifyTokenResponse> {
        if let Some(refresh_token) = stored.and_then(|s| s.refresh_token.as_deref()) {
            match auth::refresh_access_token(
                &self.http,
                &self.token_url,
                &self.credentials.client_id,
                &self.credentials.client_secret,
                refresh_token,
            )
            .await
            {
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::warn!(error = %e, "Refreshing Spotify token failed, falling back to client credentials");
                }
            }
        }

        auth::request_client_credentials_token(
            &self.http,
            &self.token_url,
            &self.credentials.client_id,
            &self.credentials.client_secret,
        )
        .await
        .map_err(token_error)
    }

    async fn stored_token(&self) -> ApiResult<Option<entities::spotify_token::Model>> {
        entities::spotify_token::Entity::find()
            .order_by_desc(entities::spotify_token::Column::UpdatedAt)
            .one(&self.db.conn)
            .await
            .map_err(database_error)
    }

    async fn save_token(
        &self,
        stored: Option<entities::spotify_token::Model>,
        response: &SpotifyTokenResponse,
        now: i64,
    ) -> ApiResult<entities::spotify_token::Model> {
        let expires_at = now + response.expires_in as i64;
        match stored {
            Some(existing) => {
                // Spotify only sometimes rotates the refresh token
                let refresh_token = response
                    .refresh_token
                    .clone()
                    .or_else(|| existing.refresh_token.clone());
                let mut model: entities::spotify_token::ActiveModel = existing.into();
                model.access_token = Set(response.access_token.clone());
                model.token_type = Set(response.token_type.clone());
                model.refresh_token = Set(refresh_token);
                model.expires_at = Set(expires_at);
                model.update(&self.db.conn).await.map_err(database_error)
            }
            None => {
                let model = entities::spotify_token::ActiveModel {
                    access_token: Set(response.access_token.clone()),
                    token_type: Set(response.token_type.clone()),
                    refresh_token: Set(response.refresh_token.clone()),
                    expires_at: Set(expires_at),
                    ..entities::spotify_token::ActiveModel::new()
                };
                model.insert(&self.db.conn).await.map_err(database_error)
            }
        }
    }
}

fn database_error(error: sea_orm::DbErr) -> SpotifyApiError {
    SpotifyApiError::Fatal(format!("Failed to access stored Spotify token: {error}"))
}

fn token_error(error: TokenRequestError) -> SpotifyApiError {
    match error {
        TokenRequestError::Rejected { reason } => SpotifyApiError::Unauthorized(reason),
        TokenRequestError::FailedToSendRequest(e) => SpotifyApiError::Transient(e.to_string()),
        TokenRequestError::FailedToParseResponse(e) => SpotifyApiError::Fatal(e.to_string()),
    }
}
