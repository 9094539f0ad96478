// Token endpoint calls
// Both endpoints speak the FastAPI OAuth2 form style (application/x-www-form-urlencoded).

use anyhow::Context;
use reqwest::Client;

use super::types::TokenResponse;
use crate::error::{ApiError, Result};

/// Exchange username/password for a token pair via `POST /auth/token`
pub async fn login(
    client: &Client,
    base_url: &str,
    username: &str,
    password: &str,
) -> Result<TokenResponse> {
    tracing::debug!("Logging in via {}/auth/token", base_url);

    let form = [("username", username), ("password", password)];

    let response = client
        .post(format!("{}/auth/token", base_url))
        .form(&form)
        .send()
        .await?;

    parse_token_response(response).await
}

/// Exchange a refresh token for a new access token via `POST /auth/refresh-token`.
///
/// The response may omit `refresh_token`; the server does not rotate it.
pub async fn refresh(client: &Client, base_url: &str, refresh_token: &str) -> Result<TokenResponse> {
    tracing::debug!("Refreshing access token via {}/auth/refresh-token", base_url);

    let form = [("refresh_token", refresh_token)];

    let response = client
        .post(format!("{}/auth/refresh-token", base_url))
        .form(&form)
        .send()
        .await?;

    parse_token_response(response).await
}

async fn parse_token_response(response: reqwest::Response) -> Result<TokenResponse> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), "Token endpoint returned an error");
        return Err(ApiError::Api {
            status: status.as_u16(),
            message,
        });
    }

    let data: TokenResponse = response
        .json()
        .await
        .context("Failed to parse token endpoint response")
        .map_err(ApiError::Internal)?;

    if data.access_token.is_empty() {
        return Err(ApiError::Internal(anyhow::anyhow!(
            "Token endpoint response does not contain an access token"
        )));
    }

    Ok(data)
}
