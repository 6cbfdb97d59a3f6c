//! Verify the caller against CloudAPI and reconcile the local account row.

use crate::auth::ParsedRequest;
use crate::db::{Account, AccountStore};
use crate::error::AuthError;
use crate::identity::{AccountProfile, IdentityClient};

/// Resolves a signed request to a local [`Account`].
pub struct AccountCheck<'a> {
    request: &'a ParsedRequest,
    identity: &'a dyn IdentityClient,
    store: &'a dyn AccountStore,
    whitelist_only: bool,
}

impl<'a> AccountCheck<'a> {
    pub fn new(
        request: &'a ParsedRequest,
        identity: &'a dyn IdentityClient,
        store: &'a dyn AccountStore,
        whitelist_only: bool,
    ) -> Self {
        Self {
            request,
            identity,
            store,
            whitelist_only,
        }
    }

    /// Verify the caller and return the matching account, creating it when
    /// allowed. A local row alone never authenticates a caller.
    pub async fn ensure(&self) -> Result<Account, AuthError> {
        let profile = self.verify().await?;
        self.save_account(&profile).await
    }

    async fn verify(&self) -> Result<AccountProfile, AuthError> {
        let account = &self.request.account_name;
        self.identity
            .get_account(self.request)
            .await
            .map_err(|source| AuthError::IdentityVerificationFailed {
                account: account.clone(),
                source,
            })?
            .ok_or_else(|| AuthError::AccountNotVerified {
                account: account.clone(),
            })
    }

    async fn save_account(&self, profile: &AccountProfile) -> Result<Account, AuthError> {
        let existing = self
            .store
            .find_account_by_name(&profile.login)
            .await
            .map_err(|source| self.db_error("account lookup", source))?;

        let mut account = match existing {
            Some(account) => account,
            None if self.whitelist_only => {
                tracing::debug!(
                    account = %profile.login,
                    uuid = %profile.id,
                    "auth: access denied to new service users"
                );
                return Err(AuthError::AccessDenied {
                    account: profile.login.clone(),
                });
            }
            None => {
                let mut account = Account::new(&profile.login, &profile.id);
                self.store
                    .insert_account(&mut account)
                    .await
                    .map_err(|source| self.db_error("account insert", source))?;
                tracing::debug!(
                    id = ?account.id,
                    account = %account.account_name,
                    uuid = %account.triton_uuid,
                    "auth: inserted new account into database"
                );
                account
            }
        };

        // Accounts can be recreated upstream under the same login.
        if account.triton_uuid != profile.id {
            tracing::info!(
                account = %account.account_name,
                old_uuid = %account.triton_uuid,
                new_uuid = %profile.id,
                "auth: updating stale Triton UUID"
            );
            account.triton_uuid = profile.id.clone();
            self.store
                .save_account(&mut account)
                .await
                .map_err(|source| self.db_error("account save", source))?;
        }

        tracing::debug!(
            id = ?account.id,
            account = %account.account_name,
            uuid = %account.triton_uuid,
            "auth: resolved account"
        );
        Ok(account)
    }

    fn db_error(&self, step: &'static str, source: crate::error::DatabaseError) -> AuthError {
        AuthError::Database {
            account: self.request.account_name.clone(),
            step,
            source,
        }
    }
}
