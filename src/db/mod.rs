//! Persistence gateways for accounts and management keys.
//!
//! All lookups exclude archived rows. Inserts are insert-if-absent on the
//! live name, so two requests racing to create the same account (or the same
//! account's key) resolve to one row.

mod models;
mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;

pub use models::{Account, Key, TritonCredential};
pub use postgres::Store;

/// Account persistence.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_account_by_id(&self, id: Uuid) -> Result<Option<Account>, DatabaseError>;

    async fn find_account_by_name(&self, name: &str) -> Result<Option<Account>, DatabaseError>;

    /// Insert the account unless a live row with the same name exists.
    ///
    /// Either way `account` is refreshed from the stored row, including `id`.
    async fn insert_account(&self, account: &mut Account) -> Result<(), DatabaseError>;

    /// Persist name, Triton UUID and key id. Fails with
    /// [`DatabaseError::MissingIdentifier`] when `account.id` is unset and
    /// [`DatabaseError::NotFound`] when no row has that id.
    async fn save_account(&self, account: &mut Account) -> Result<(), DatabaseError>;

    /// Whether a live account matches the id or the name.
    async fn account_exists(&self, id: Option<Uuid>, name: Option<&str>) -> Result<bool, DatabaseError>;

    /// Account name plus its management key, for acting as the account on Triton.
    async fn find_credential(&self, account_id: Uuid) -> Result<Option<TritonCredential>, DatabaseError>;
}

/// Management key persistence.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn find_key_by_id(&self, id: Uuid) -> Result<Option<Key>, DatabaseError>;

    async fn find_key_by_name(&self, name: &str, account_id: Uuid) -> Result<Option<Key>, DatabaseError>;

    /// Insert the key unless a live key with the same name exists for the account.
    async fn insert_key(&self, key: &mut Key) -> Result<(), DatabaseError>;

    /// Persist all mutable fields, including `archived`. Fails with
    /// [`DatabaseError::NotFound`] when no row has `key.id`.
    async fn save_key(&self, key: &mut Key) -> Result<(), DatabaseError>;

    async fn key_exists(&self, id: Option<Uuid>, name: Option<&str>) -> Result<bool, DatabaseError>;
}

/// Store used when no database is configured. Every call fails.
pub struct Detached;

#[async_trait]
impl AccountStore for Detached {
    async fn find_account_by_id(&self, _id: Uuid) -> Result<Option<Account>, DatabaseError> {
        Err(DatabaseError::NotConfigured)
    }

    async fn find_account_by_name(&self, _name: &str) -> Result<Option<Account>, DatabaseError> {
        Err(DatabaseError::NotConfigured)
    }

    async fn insert_account(&self, _account: &mut Account) -> Result<(), DatabaseError> {
        Err(DatabaseError::NotConfigured)
    }

    async fn save_account(&self, _account: &mut Account) -> Result<(), DatabaseError> {
        Err(DatabaseError::NotConfigured)
    }

    async fn account_exists(&self, _id: Option<Uuid>, _name: Option<&str>) -> Result<bool, DatabaseError> {
        Err(DatabaseError::NotConfigured)
    }

    async fn find_credential(&self, _account_id: Uuid) -> Result<Option<TritonCredential>, DatabaseError> {
        Err(DatabaseError::NotConfigured)
    }
}

#[async_trait]
impl KeyStore for Detached {
    async fn find_key_by_id(&self, _id: Uuid) -> Result<Option<Key>, DatabaseError> {
        Err(DatabaseError::NotConfigured)
    }

    async fn find_key_by_name(&self, _name: &str, _account_id: Uuid) -> Result<Option<Key>, DatabaseError> {
        Err(DatabaseError::NotConfigured)
    }

    async fn insert_key(&self, _key: &mut Key) -> Result<(), DatabaseError> {
        Err(DatabaseError::NotConfigured)
    }

    async fn save_key(&self, _key: &mut Key) -> Result<(), DatabaseError> {
        Err(DatabaseError::NotConfigured)
    }

    async fn key_exists(&self, _id: Option<Uuid>, _name: Option<&str>) -> Result<bool, DatabaseError> {
        Err(DatabaseError::NotConfigured)
    }
}

/// Reject existence checks that name nothing.
pub(crate) fn lookup_key<'a>(
    entity: &'static str,
    id: Option<Uuid>,
    name: Option<&'a str>,
) -> Result<(Option<Uuid>, Option<&'a str>), DatabaseError> {
    let name = name.filter(|n| !n.is_empty());
    if id.is_none() && name.is_none() {
        return Err(DatabaseError::MissingLookupKey { entity });
    }
    Ok((id, name))
}
