//! Error types for the service.

use axum::http::StatusCode;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Pool error: {0}")]
    Pool(String),

    #[error("Pool checkout failed: {0}")]
    Checkout(#[from] deadpool_postgres::PoolError),

    #[error("Query failed: {0}")]
    Query(#[from] tokio_postgres::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    /// Save was called on a record that was never inserted.
    #[error("Missing identifier for {entity} save")]
    MissingIdentifier { entity: &'static str },

    /// A row that was just written could not be read back.
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },

    /// Running without a database (development identity only).
    #[error("No database configured")]
    NotConfigured,

    /// Existence check without an id or a name.
    #[error("Can't check {entity} existence without id or name")]
    MissingLookupKey { entity: &'static str },
}

/// Errors returned by the remote identity provider (CloudAPI).
#[derive(Debug, Clone, thiserror::Error)]
pub enum IdentityError {
    #[error("Identity provider request to {url} failed: {reason}")]
    RequestFailed { url: String, reason: String },

    /// The provider refused the replayed signature.
    #[error("Identity provider rejected the caller with HTTP {status}")]
    Rejected { status: u16 },

    #[error("Identity provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid identity provider response: {reason}")]
    InvalidResponse { reason: String },
}

impl IdentityError {
    /// True when the provider answered and refused the caller's credentials.
    pub fn is_rejection(&self) -> bool {
        matches!(self, IdentityError::Rejected { .. })
    }
}

/// Errors from generating, decoding or encoding RSA key material.
#[derive(Debug, thiserror::Error)]
pub enum KeyMaterialError {
    #[error("RSA key generation failed: {0}")]
    Generate(#[source] rsa::Error),

    #[error("Failed to decode private key material: {reason}")]
    Decode { reason: String },

    #[error("Failed to encode private key: {reason}")]
    Encode { reason: String },

    #[error("Invalid authorized key: {reason}")]
    AuthorizedKey { reason: String },

    /// Stored material no longer produces the stored fingerprint.
    #[error("Key material fingerprint {derived} does not match stored fingerprint {stored}")]
    FingerprintMismatch { stored: String, derived: String },
}

/// Errors produced while authenticating a request.
///
/// Client input defects and identity failures map to 401, infrastructure
/// failures map to 500.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("received unauthenticated request")]
    UnauthenticatedRequest,

    #[error("couldn't parse keyId within authorization header")]
    MalformedKeyId,

    #[error("keyId {key_id:?} does not have a recognized structure")]
    KeyIdStructure { key_id: String },

    #[error("parsed {field} from keyId is empty")]
    EmptyIdentityField { field: &'static str },

    #[error("parsed {field} {name:?} is too short")]
    NameTooShort { field: &'static str, name: String },

    #[error("parsed {field} {name:?} is not formatted properly")]
    NameFormatInvalid { field: &'static str, name: String },

    #[error("failed to verify account {account} with the identity provider: {source}")]
    IdentityVerificationFailed {
        account: String,
        #[source]
        source: IdentityError,
    },

    #[error("identity provider returned no profile for account {account}")]
    AccountNotVerified { account: String },

    #[error("account {account} is not whitelisted for this service")]
    AccessDenied { account: String },

    #[error(
        "management key {key_name} for account {account} has local fingerprint {local} but remote fingerprint {remote}"
    )]
    ConflictingKeyState {
        account: String,
        key_name: String,
        local: String,
        remote: String,
    },

    #[error(
        "remote key {key_name} ({fingerprint}) exists for account {account} but is unknown to this service"
    )]
    OrphanedRemoteKey {
        account: String,
        key_name: String,
        fingerprint: String,
    },

    #[error("{step} failed for account {account}: {source}")]
    Database {
        account: String,
        step: &'static str,
        #[source]
        source: DatabaseError,
    },

    #[error("{step} failed for account {account}: {source}")]
    Identity {
        account: String,
        step: &'static str,
        #[source]
        source: IdentityError,
    },

    #[error("key material for account {account}: {source}")]
    KeyMaterial {
        account: String,
        #[source]
        source: KeyMaterialError,
    },
}

impl AuthError {
    /// HTTP status the middleware answers with when this error ends a request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::UnauthenticatedRequest
            | AuthError::MalformedKeyId
            | AuthError::KeyIdStructure { .. }
            | AuthError::EmptyIdentityField { .. }
            | AuthError::NameTooShort { .. }
            | AuthError::NameFormatInvalid { .. }
            | AuthError::AccountNotVerified { .. }
            | AuthError::AccessDenied { .. }
            | AuthError::ConflictingKeyState { .. }
            | AuthError::OrphanedRemoteKey { .. } => StatusCode::UNAUTHORIZED,
            AuthError::IdentityVerificationFailed { source, .. } => {
                if source.is_rejection() {
                    StatusCode::UNAUTHORIZED
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            }
            AuthError::Database { .. } | AuthError::Identity { .. } | AuthError::KeyMaterial { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Local and remote credential records disagree; needs an operator.
    pub fn is_drift(&self) -> bool {
        matches!(
            self,
            AuthError::ConflictingKeyState { .. } | AuthError::OrphanedRemoteKey { .. }
        )
    }

    /// Short, caller-safe message for the response body.
    pub fn public_message(&self) -> &'static str {
        match self {
            AuthError::UnauthenticatedRequest
            | AuthError::MalformedKeyId
            | AuthError::KeyIdStructure { .. }
            | AuthError::EmptyIdentityField { .. }
            | AuthError::NameTooShort { .. }
            | AuthError::NameFormatInvalid { .. } => "failed request authentication",
            AuthError::IdentityVerificationFailed { .. }
            | AuthError::AccountNotVerified { .. }
            | AuthError::AccessDenied { .. } => "failed account authentication",
            AuthError::ConflictingKeyState { .. } | AuthError::OrphanedRemoteKey { .. } => {
                "failed key authentication"
            }
            AuthError::Database { .. } | AuthError::Identity { .. } | AuthError::KeyMaterial { .. } => {
                "failed session authentication"
            }
        }
    }
}
