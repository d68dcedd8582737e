//! Collaborator authentication API.
//!
//! The console treats the backend as a black box with a fixed contract:
//! login, refresh, profile and logout. [`AuthApi`] is that contract;
//! [`HttpAuthApi`] speaks it over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::{
    error::{FeedError, FeedResult},
    session::Role,
};

/// User record returned by login and profile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
}

/// Successful login response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub user: UserProfile,
}

/// Successful refresh response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
}

/// The backend authentication contract.
#[async_trait]
pub trait AuthApi: Send + Sync + 'static {
    /// Exchange credentials for a token and user record.
    async fn login(&self, email: &str, password: &str) -> FeedResult<LoginResponse>;

    /// Exchange the current token for a fresh one.
    async fn refresh(&self, token: &str) -> FeedResult<RefreshResponse>;

    /// Fetch the user record for `token`.
    async fn profile(&self, token: &str) -> FeedResult<UserProfile>;

    /// Invalidate `token` server-side.
    async fn logout(&self, token: &str) -> FeedResult<()>;
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP implementation of [`AuthApi`].
///
/// Endpoints, relative to the base URL: `POST auth/login`,
/// `POST auth/refresh`, `GET auth/profile`, `POST auth/logout`.
#[derive(Clone, Debug)]
pub struct HttpAuthApi {
    client: Client,
    base_url: String,
}

impl HttpAuthApi {
    /// Create a client for the API at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is empty or the HTTP client cannot
    /// be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> FeedResult<Self> {
        let base_url = base_url.into();
        if base_url.is_empty() {
            return Err(FeedError::config("API base URL cannot be empty"));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn bearer(request: RequestBuilder, token: &str) -> RequestBuilder {
        request.header(reqwest::header::AUTHORIZATION, format!("Bearer {token}"))
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> FeedResult<T> {
        let response = Self::check(response).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Map non-success responses to [`FeedError::Api`] carrying the API's
    /// message verbatim.
    async fn check(response: Response) -> FeedResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|body| body.message.or(body.error))
            .unwrap_or_else(|| {
                if text.is_empty() {
                    status.canonical_reason().unwrap_or("request failed").to_string()
                } else {
                    text
                }
            });
        debug!(status = status.as_u16(), message = %message, "API request rejected");
        Err(FeedError::api(status.as_u16(), message))
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, email: &str, password: &str) -> FeedResult<LoginResponse> {
        let response = self
            .client
            .post(self.url("auth/login"))
            .json(&LoginRequest { email, password })
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn refresh(&self, token: &str) -> FeedResult<RefreshResponse> {
        let request = Self::bearer(self.client.post(self.url("auth/refresh")), token);
        Self::parse(request.send().await?).await
    }

    async fn profile(&self, token: &str) -> FeedResult<UserProfile> {
        let request = Self::bearer(self.client.get(self.url("auth/profile")), token);
        Self::parse(request.send().await?).await
    }

    async fn logout(&self, token: &str) -> FeedResult<()> {
        let request = Self::bearer(self.client.post(self.url("auth/logout")), token);
        Self::check(request.send().await?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_base_url_rejected() {
        let result = HttpAuthApi::new("", Duration::from_secs(5));
        assert!(matches!(result, Err(FeedError::Config { .. })));
    }

    #[test]
    fn test_url_joining() {
        let api = HttpAuthApi::new("https://ops.example.com/api/", Duration::from_secs(5))
            .expect("client");
        assert_eq!(api.url("auth/login"), "https://ops.example.com/api/auth/login");
    }

    #[test]
    fn test_login_response_shape() {
        let raw = r#"{
            "access_token": "a.b.c",
            "user": {"id": "u-7", "email": "ops@example.com", "role": "super_admin"}
        }"#;
        let parsed: LoginResponse = serde_json::from_str(raw).expect("parse");
        assert_eq!(parsed.access_token, "a.b.c");
        assert_eq!(parsed.user.role, Some(Role::SuperAdmin));
        assert_eq!(parsed.user.name, None);
    }
}
