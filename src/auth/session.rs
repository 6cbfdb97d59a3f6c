//! Per-request authentication pipeline and the resulting [`Session`].

use std::sync::Arc;

use axum::http::HeaderMap;
use uuid::Uuid;

use crate::auth::ParsedRequest;
use crate::auth::account_check::AccountCheck;
use crate::auth::key_check::KeyCheck;
use crate::config::AuthConfig;
use crate::db::{AccountStore, KeyStore};
use crate::error::{AuthError, DatabaseError};
use crate::identity::IdentityClient;

/// Account id served by the fixed development identity.
pub const DEV_ACCOUNT_ID: Uuid = Uuid::from_u128(0x6f873d02_172c_418f_8416_4da2b50d5c53);

/// Management key fingerprint reported by the fixed development identity.
pub const DEV_FINGERPRINT: &str = "00:00:00:00:00:00:00:00:00:00:00:00:00:00:00:00";

/// Authenticated identity of one inbound request.
///
/// Built fresh for every request and dropped with its response.
#[derive(Debug, Clone)]
pub struct Session {
    pub account_id: Option<Uuid>,
    pub fingerprint: String,
    pub datacenter: String,
    pub identity_url: String,
    pub triton_url: String,
    dev_mode: bool,
    request: Option<ParsedRequest>,
}

impl Session {
    fn new(config: &AuthConfig, request: Option<ParsedRequest>, dev_mode: bool) -> Self {
        Self {
            account_id: None,
            fingerprint: String::new(),
            datacenter: config.datacenter.clone(),
            identity_url: config.identity_url.clone(),
            triton_url: config.triton_url.clone(),
            dev_mode,
            request,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.account_id.is_some() && !self.fingerprint.is_empty()
    }

    pub fn is_dev_mode(&self) -> bool {
        self.dev_mode
    }

    /// The parsed signature, absent for the development identity.
    pub fn request(&self) -> Option<&ParsedRequest> {
        self.request.as_ref()
    }

    pub fn account_name(&self) -> Option<&str> {
        self.request.as_ref().map(|r| r.account_name.as_str())
    }

    /// Sub-user that signed the request, if any.
    pub fn user_name(&self) -> Option<&str> {
        self.request.as_ref().and_then(|r| r.user_name.as_deref())
    }
}

/// How requests are turned into sessions. Fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthPolicy {
    /// Parse the signature and reconcile account and key state.
    Verify,
    /// Serve every request as one fixed identity. Local development only.
    FixedIdentity { account_id: Uuid, fingerprint: String },
}

impl AuthPolicy {
    pub fn from_config(config: &AuthConfig) -> Self {
        if config.dev_mode {
            Self::development()
        } else {
            Self::Verify
        }
    }

    pub fn development() -> Self {
        Self::FixedIdentity {
            account_id: DEV_ACCOUNT_ID,
            fingerprint: DEV_FINGERPRINT.to_string(),
        }
    }
}

/// Shared entry point of the authentication core.
pub struct Authenticator {
    config: AuthConfig,
    policy: AuthPolicy,
    identity: Arc<dyn IdentityClient>,
    accounts: Arc<dyn AccountStore>,
    keys: Arc<dyn KeyStore>,
}

impl Authenticator {
    pub fn new(
        config: AuthConfig,
        policy: AuthPolicy,
        identity: Arc<dyn IdentityClient>,
        accounts: Arc<dyn AccountStore>,
        keys: Arc<dyn KeyStore>,
    ) -> Self {
        Self {
            config,
            policy,
            identity,
            accounts,
            keys,
        }
    }

    /// Authenticate one request from its headers.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Session, AuthError> {
        match &self.policy {
            AuthPolicy::FixedIdentity {
                account_id,
                fingerprint,
            } => {
                let mut session = Session::new(&self.config, None, true);
                session.account_id = Some(*account_id);
                session.fingerprint = fingerprint.clone();
                Ok(session)
            }
            AuthPolicy::Verify => {
                let request = ParsedRequest::from_headers(headers)?;
                self.verify(request).await
            }
        }
    }

    /// Run account then key reconciliation for a parsed request.
    pub async fn verify(&self, request: ParsedRequest) -> Result<Session, AuthError> {
        let mut account = AccountCheck::new(
            &request,
            self.identity.as_ref(),
            self.accounts.as_ref(),
            self.config.enable_whitelist,
        )
        .ensure()
        .await?;

        let fingerprint = KeyCheck::new(
            &request,
            self.identity.as_ref(),
            self.keys.as_ref(),
            self.accounts.as_ref(),
            self.config.key_name(),
            self.config.key_bits,
        )
        .ensure(&mut account)
        .await?;

        let mut session = Session::new(&self.config, Some(request), false);
        session.account_id = account.id;
        session.fingerprint = fingerprint;
        if !session.is_authenticated() {
            return Err(AuthError::Database {
                account: account.account_name,
                step: "session",
                source: DatabaseError::MissingIdentifier { entity: "account" },
            });
        }

        tracing::debug!(
            account = %account.account_name,
            user = ?session.user_name(),
            fingerprint = %session.fingerprint,
            "auth: session authenticated"
        );
        Ok(session)
    }
}
