// Authentication wire types

use serde::Deserialize;

/// Token endpoint response, shared by login and refresh.
///
/// `/auth/token` returns both tokens; `/auth/refresh-token` returns only a
/// new access token (the refresh token is not rotated), so `refresh_token`
/// is optional here.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[allow(dead_code)]
    pub token_type: Option<String>,
}
