//! CloudAPI implementation of [`IdentityClient`].

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::auth::ParsedRequest;
use crate::error::IdentityError;
use crate::identity::{AccountProfile, IdentityClient, RemoteKey};

const API_VERSION: &str = "~8";

/// Stateless CloudAPI client, safe to share across requests.
#[derive(Debug, Clone)]
pub struct CloudApiClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct CreateKeyBody<'a> {
    name: &'a str,
    key: &'a str,
}

impl CloudApiClient {
    /// Create a client for the CloudAPI at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, IdentityError> {
        let base_url = base_url.into();
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| IdentityError::RequestFailed {
                url: base_url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn account_url(&self, caller: &ParsedRequest, path: &str) -> String {
        format!(
            "{}/{}{}",
            self.base_url,
            urlencoding::encode(&caller.account_name),
            path
        )
    }

    /// Build a request that replays the caller's signature headers verbatim.
    fn request(&self, method: Method, url: &str, caller: &ParsedRequest) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("Date", caller.date_header())
            .header("Authorization", caller.auth_header())
            .header("Accept", "application/json")
            .header("Api-Version", API_VERSION)
    }

    /// Send a request; a 404 answer yields `None`.
    async fn send<R: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        url: &str,
    ) -> Result<Option<R>, IdentityError> {
        tracing::debug!("Sending CloudAPI request: {}", url);

        let response = request.send().await.map_err(|e| {
            tracing::error!("CloudAPI request failed: {}", e);
            IdentityError::RequestFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        tracing::debug!("CloudAPI response status: {}", status);

        match status {
            StatusCode::NOT_FOUND => return Ok(None),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(IdentityError::Rejected {
                    status: status.as_u16(),
                });
            }
            _ => {}
        }

        let body = response.text().await.map_err(|e| IdentityError::RequestFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(IdentityError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| IdentityError::InvalidResponse {
                reason: format!("JSON parse error: {}", e),
            })
    }
}

#[async_trait]
impl IdentityClient for CloudApiClient {
    async fn get_account(&self, caller: &ParsedRequest) -> Result<Option<AccountProfile>, IdentityError> {
        let url = self.account_url(caller, "");
        let request = self.request(Method::GET, &url, caller);
        self.send(request, &url).await
    }

    async fn list_keys(&self, caller: &ParsedRequest) -> Result<Vec<RemoteKey>, IdentityError> {
        let url = self.account_url(caller, "/keys");
        let request = self.request(Method::GET, &url, caller);
        Ok(self.send(request, &url).await?.unwrap_or_default())
    }

    async fn get_key(&self, caller: &ParsedRequest, name: &str) -> Result<Option<RemoteKey>, IdentityError> {
        let url = self.account_url(caller, &format!("/keys/{}", urlencoding::encode(name)));
        let request = self.request(Method::GET, &url, caller);
        self.send(request, &url).await
    }

    async fn create_key(
        &self,
        caller: &ParsedRequest,
        name: &str,
        public_key: &str,
    ) -> Result<RemoteKey, IdentityError> {
        let url = self.account_url(caller, "/keys");
        let request = self
            .request(Method::POST, &url, caller)
            .json(&CreateKeyBody { name, key: public_key });

        self.send(request, &url)
            .await?
            .ok_or_else(|| IdentityError::InvalidResponse {
                reason: format!("create key {} answered 404", name),
            })
    }
}
