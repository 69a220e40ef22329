use std::collections::HashMap;

use crate::spotify_rs::types::SpotifyTokenResponse;

#[derive(Debug, thiserror::Error)]
pub enum TokenRequestError {
    #[error("Spotify rejected the token request: {reason}")]
    Rejected { reason: String },
    #[error("Failed to send http request: {0}")]
    FailedToSendRequest(reqwest::Error),
    #[error("Failed to parse response: {0}")]
    FailedToParseResponse(reqwest::Error),
}

/// Request an app-only access token with the client credentials grant
/// https://developer.spotify.com/documentation/web-api/tutorials/client-credentials-flow
pub async fn request_client_credentials_token(
    client: &reqwest::Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<SpotifyTokenResponse, TokenRequestError> {
    let mut params = HashMap::new();
    params.insert("grant_type", "client_credentials");

    send_token_request(client, token_url, client_id, client_secret, &params).await
}

/// Refresh an access token using a refresh token
pub async fn refresh_access_token(
    client: &reqwest::Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<SpotifyTokenResponse, TokenRequestError> {
    let mut params = HashMap::new();
    params.insert("grant_type", "refresh_token");
    params.insert("refresh_token", refresh_token);

    send_token_request(client, token_url, client_id, client_secret, &params).await
}

async fn send_token_request(
    client: &reqwest::Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    params: &HashMap<&str, &str>,
) -> Result<SpotifyTokenResponse, TokenRequestError> {
    let response = client
        .post(token_url)
        // Serializes to x-www-form-urlencoded, as required by spotify
        .form(params)
        .basic_auth(client_id, Some(client_secret))
        .send()
        .await
        .map_err(TokenRequestError::FailedToSendRequest)?;

    if !response.status().is_success() {
        return Err(TokenRequestError::Rejected {
            reason: response
                .text()
                .await
                .unwrap_or("Failed to get error text".to_string()),
        });
    }

    response
        .json()
        .await
        .map_err(TokenRequestError::FailedToParseResponse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_client_credentials_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .and(header_exists("authorization"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "abc",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = request_client_credentials_token(
            &reqwest::Client::new(),
            &format!("{}/api/token", server.uri()),
            "id",
            "secret",
        )
        .await
        .unwrap();

        assert_eq!(token.access_token, "abc");
        assert_eq!(token.expires_in, 3600);
        assert!(token.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_rejected_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let result = refresh_access_token(
            &reqwest::Client::new(),
            &format!("{}/api/token", server.uri()),
            "id",
            "secret",
            "stale",
        )
        .await;

        match result {
            Err(TokenRequestError::Rejected { reason }) => assert_eq!(reason, "invalid_grant"),
            other => panic!("expected a rejection, got {other:?}"),
        }
    }
}
