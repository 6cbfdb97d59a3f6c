//! Ensure an account's management key exists locally and on CloudAPI.
//!
//! ```text
//! local key │ remote key        │ outcome
//! ──────────┼───────────────────┼──────────────────────────────────────────
//! yes       │ yes, same print   │ accept
//! yes       │ yes, other print  │ ConflictingKeyState
//! yes       │ no                │ re-publish stored public key, accept
//! no        │ yes               │ OrphanedRemoteKey
//! no        │ no                │ generate, publish, store, link account
//! ```
//!
//! Disagreements are never repaired automatically.

use crate::auth::ParsedRequest;
use crate::auth::keypair::{KeyPair, fingerprint_of_authorized_key};
use crate::db::{Account, AccountStore, Key, KeyStore};
use crate::error::{AuthError, DatabaseError, IdentityError, KeyMaterialError};
use crate::identity::{IdentityClient, RemoteKey};

/// Reconciles the management key of one account.
pub struct KeyCheck<'a> {
    request: &'a ParsedRequest,
    identity: &'a dyn IdentityClient,
    keys: &'a dyn KeyStore,
    accounts: &'a dyn AccountStore,
    key_name: String,
    key_bits: usize,
}

impl<'a> KeyCheck<'a> {
    pub fn new(
        request: &'a ParsedRequest,
        identity: &'a dyn IdentityClient,
        keys: &'a dyn KeyStore,
        accounts: &'a dyn AccountStore,
        key_name: String,
        key_bits: usize,
    ) -> Self {
        Self {
            request,
            identity,
            keys,
            accounts,
            key_name,
            key_bits,
        }
    }

    /// Bring local and remote key state into agreement and return the
    /// management key fingerprint.
    ///
    /// `account` gains a `key_id` when a key is created or an unlinked
    /// stored key is accepted.
    pub async fn ensure(&self, account: &mut Account) -> Result<String, AuthError> {
        let local = self.in_database(account).await?;
        let remote = self.on_triton(account).await?;

        match (local, remote) {
            (Some(local), Some(remote)) => {
                if local.fingerprint != remote.fingerprint {
                    return Err(self.conflict(account, local.fingerprint, remote.fingerprint));
                }
                tracing::debug!(
                    account = %account.account_name,
                    key_name = %self.key_name,
                    fingerprint = %local.fingerprint,
                    "auth: management key in agreement"
                );
                self.link(account, &local).await?;
                Ok(local.fingerprint)
            }
            (Some(local), None) => {
                self.republish(account, &local).await?;
                self.link(account, &local).await?;
                Ok(local.fingerprint)
            }
            (None, Some(remote)) => Err(AuthError::OrphanedRemoteKey {
                account: account.account_name.clone(),
                key_name: self.key_name.clone(),
                fingerprint: remote.fingerprint,
            }),
            (None, None) => self.create(account).await,
        }
    }

    /// The account's live management key, if the store has one.
    ///
    /// Falls back to the live key stored under the management key name when
    /// the account was never linked to it.
    async fn in_database(&self, account: &Account) -> Result<Option<Key>, AuthError> {
        let found = match (account.key_id, account.id) {
            (Some(key_id), _) => self.keys.find_key_by_id(key_id).await,
            (None, Some(account_id)) => self.keys.find_key_by_name(&self.key_name, account_id).await,
            (None, None) => Ok(None),
        };
        found.map_err(|source| self.db_error(account, "key lookup", source))
    }

    /// Point the account at `key` unless it already does.
    async fn link(&self, account: &mut Account, key: &Key) -> Result<(), AuthError> {
        if key.id.is_none() || account.key_id == key.id {
            return Ok(());
        }
        account.key_id = key.id;
        self.accounts
            .save_account(account)
            .await
            .map_err(|source| self.db_error(account, "account key_id save", source))?;
        tracing::info!(
            account = %account.account_name,
            key_name = %self.key_name,
            fingerprint = %key.fingerprint,
            "auth: linked account to stored management key"
        );
        Ok(())
    }

    async fn on_triton(&self, account: &Account) -> Result<Option<RemoteKey>, AuthError> {
        self.identity
            .get_key(self.request, &self.key_name)
            .await
            .map_err(|source| self.identity_error(account, "remote key lookup", source))
    }

    /// The key was lost upstream; publish the stored material again.
    async fn republish(&self, account: &Account, local: &Key) -> Result<(), AuthError> {
        let keypair = KeyPair::decode(&local.material)
            .map_err(|source| self.material_error(account, source))?;
        if keypair.fingerprint() != local.fingerprint {
            return Err(self.material_error(
                account,
                KeyMaterialError::FingerprintMismatch {
                    stored: local.fingerprint.clone(),
                    derived: keypair.fingerprint().to_string(),
                },
            ));
        }

        let remote = self.add_triton_key(account, &keypair).await?;
        tracing::info!(
            account = %account.account_name,
            key_name = %self.key_name,
            fingerprint = %remote.fingerprint,
            "auth: re-published management key"
        );
        Ok(())
    }

    /// Neither side has a key yet.
    async fn create(&self, account: &mut Account) -> Result<String, AuthError> {
        let Some(account_id) = account.id else {
            let source = DatabaseError::MissingIdentifier { entity: "account" };
            return Err(self.db_error(account, "key insert", source));
        };

        let keypair =
            KeyPair::generate(self.key_bits).map_err(|source| self.material_error(account, source))?;
        self.add_triton_key(account, &keypair).await?;

        let material = keypair
            .private_key_pem()
            .map_err(|source| self.material_error(account, source))?;
        let mut key = Key::new(account_id, &self.key_name, keypair.fingerprint(), material);
        self.keys
            .insert_key(&mut key)
            .await
            .map_err(|source| self.db_error(account, "key insert", source))?;

        // A live row under this name that appeared since the lookup wins the
        // insert; never link it to an account whose remote key is ours.
        if key.fingerprint != keypair.fingerprint() {
            return Err(self.conflict(account, key.fingerprint, keypair.fingerprint().to_string()));
        }

        account.key_id = key.id;
        self.accounts
            .save_account(account)
            .await
            .map_err(|source| self.db_error(account, "account key_id save", source))?;

        tracing::info!(
            account = %account.account_name,
            key_name = %self.key_name,
            fingerprint = %key.fingerprint,
            "auth: created management key"
        );
        Ok(key.fingerprint)
    }

    /// Register the keypair's public half under the deterministic name.
    async fn add_triton_key(&self, account: &Account, keypair: &KeyPair) -> Result<RemoteKey, AuthError> {
        let remote = self
            .identity
            .create_key(self.request, &self.key_name, keypair.public_key_base64())
            .await
            .map_err(|source| self.identity_error(account, "remote key create", source))?;

        // CloudAPI derives the fingerprint itself; it and any echoed key must match ours.
        let echoed = match remote.key.as_deref() {
            Some(public_key) => Some(
                fingerprint_of_authorized_key(public_key)
                    .map_err(|source| self.material_error(account, source))?,
            ),
            None => None,
        };
        if remote.fingerprint != keypair.fingerprint()
            || echoed.is_some_and(|fingerprint| fingerprint != keypair.fingerprint())
        {
            return Err(self.conflict(account, keypair.fingerprint().to_string(), remote.fingerprint));
        }
        Ok(remote)
    }

    fn conflict(&self, account: &Account, local: String, remote: String) -> AuthError {
        AuthError::ConflictingKeyState {
            account: account.account_name.clone(),
            key_name: self.key_name.clone(),
            local,
            remote,
        }
    }

    fn db_error(&self, account: &Account, step: &'static str, source: DatabaseError) -> AuthError {
        AuthError::Database {
            account: account.account_name.clone(),
            step,
            source,
        }
    }

    fn identity_error(&self, account: &Account, step: &'static str, source: IdentityError) -> AuthError {
        AuthError::Identity {
            account: account.account_name.clone(),
            step,
            source,
        }
    }

    fn material_error(&self, account: &Account, source: KeyMaterialError) -> AuthError {
        AuthError::KeyMaterial {
            account: account.account_name.clone(),
            source,
        }
    }
}
