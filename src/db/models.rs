//! Records persisted in `tsg_accounts` and `tsg_keys`.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A tenant account known to this service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Database-assigned; `None` until inserted.
    pub id: Option<Uuid>,
    /// Caller-supplied login. Unique among non-archived rows, never auto-corrected.
    pub account_name: String,
    /// Stable identity of the account on Triton.
    pub triton_uuid: String,
    /// The account's management key.
    pub key_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// An unsaved account.
    pub fn new(account_name: impl Into<String>, triton_uuid: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            account_name: account_name.into(),
            triton_uuid: triton_uuid.into(),
            key_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A management key generated by this service on an account's behalf.
#[derive(Clone, PartialEq, Eq)]
pub struct Key {
    pub id: Option<Uuid>,
    /// `<prefix>_<datacenter>`.
    pub name: String,
    /// MD5 fingerprint; joins against CloudAPI's key listing.
    pub fingerprint: String,
    /// PKCS#1 PEM private key.
    pub material: String,
    pub account_id: Uuid,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Key {
    /// An unsaved key owned by `account_id`.
    pub fn new(
        account_id: Uuid,
        name: impl Into<String>,
        fingerprint: impl Into<String>,
        material: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            name: name.into(),
            fingerprint: fingerprint.into(),
            material: material.into(),
            account_id,
            archived: false,
            created_at: now,
            updated_at: now,
        }
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("fingerprint", &self.fingerprint)
            .field("material", &"[REDACTED]")
            .field("account_id", &self.account_id)
            .field("archived", &self.archived)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// What background jobs need to act as an account on Triton.
#[derive(Clone, PartialEq, Eq)]
pub struct TritonCredential {
    pub account_name: String,
    /// Fingerprint of the management key, used as the signing key id.
    pub key_id: String,
    pub key_material: String,
}

impl std::fmt::Debug for TritonCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TritonCredential")
            .field("account_name", &self.account_name)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}
