//! Gateway to the remote identity provider (Triton CloudAPI).
//!
//! Every call is made *as the caller*: the request's own `Date` and
//! `Authorization` headers are replayed, so CloudAPI authenticates the
//! original signer rather than this service.

mod cloudapi;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::auth::ParsedRequest;
use crate::error::IdentityError;

pub use cloudapi::CloudApiClient;

/// Account profile as returned by `GET /:login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProfile {
    /// Stable account UUID.
    pub id: String,
    pub login: String,
}

/// An SSH key registered on the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteKey {
    pub name: String,
    pub fingerprint: String,
    /// Public key in authorized-keys form.
    #[serde(default)]
    pub key: Option<String>,
}

/// Identity provider operations, invoked on behalf of a signed request.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Fetch the caller's account profile; `None` if the provider has none.
    async fn get_account(&self, caller: &ParsedRequest) -> Result<Option<AccountProfile>, IdentityError>;

    async fn list_keys(&self, caller: &ParsedRequest) -> Result<Vec<RemoteKey>, IdentityError>;

    /// Look up a key by name; `None` when the provider answers 404.
    async fn get_key(&self, caller: &ParsedRequest, name: &str) -> Result<Option<RemoteKey>, IdentityError>;

    /// Register `public_key` (`ssh-rsa <base64>`) under `name`.
    async fn create_key(
        &self,
        caller: &ParsedRequest,
        name: &str,
        public_key: &str,
    ) -> Result<RemoteKey, IdentityError>;
}
