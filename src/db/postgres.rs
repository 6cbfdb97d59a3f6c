//! PostgreSQL store for accounts and management keys.

use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::db::{Account, AccountStore, Key, KeyStore, TritonCredential, lookup_key};
use crate::error::DatabaseError;

mod embedded {
    refinery::embed_migrations!("migrations");
}

const ACCOUNT_COLUMNS: &str = "id, account_name, triton_uuid, key_id, created_at, updated_at";
const KEY_COLUMNS: &str = "id, name, fingerprint, material, account_id, archived, created_at, updated_at";

/// Database store shared by every request. Cloning shares the pool.
#[derive(Clone)]
pub struct Store {
    pool: Pool,
}

impl Store {
    /// Create a new store and connect to the database.
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let mut cfg = Config::new();
        cfg.url = Some(config.url().to_string());
        cfg.pool = Some(deadpool_postgres::PoolConfig {
            max_size: config.pool_size,
            ..Default::default()
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;

        // Test connection
        let _ = pool.get().await?;

        Ok(Self { pool })
    }

    /// Apply the embedded schema migrations.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let mut conn = self.conn().await?;
        let report = embedded::migrations::runner()
            .run_async(&mut **conn)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        for migration in report.applied_migrations() {
            tracing::info!(migration = %migration, "Applied database migration");
        }
        Ok(())
    }

    /// Get a connection from the pool.
    pub async fn conn(&self) -> Result<deadpool_postgres::Object, DatabaseError> {
        Ok(self.pool.get().await?)
    }
}

fn account_from_row(row: &Row) -> Account {
    Account {
        id: Some(row.get("id")),
        account_name: row.get("account_name"),
        triton_uuid: row.get("triton_uuid"),
        key_id: row.get("key_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn key_from_row(row: &Row) -> Key {
    Key {
        id: Some(row.get("id")),
        name: row.get("name"),
        fingerprint: row.get("fingerprint"),
        material: row.get("material"),
        account_id: row.get("account_id"),
        archived: row.get("archived"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl AccountStore for Store {
    async fn find_account_by_id(&self, id: Uuid) -> Result<Option<Account>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT {} FROM tsg_accounts WHERE id = $1 AND archived = false",
                    ACCOUNT_COLUMNS
                ),
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(account_from_row))
    }

    async fn find_account_by_name(&self, name: &str) -> Result<Option<Account>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT {} FROM tsg_accounts WHERE account_name = $1 AND archived = false",
                    ACCOUNT_COLUMNS
                ),
                &[&name],
            )
            .await?;
        Ok(row.as_ref().map(account_from_row))
    }

    async fn insert_account(&self, account: &mut Account) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        let inserted = conn
            .execute(
                "INSERT INTO tsg_accounts (account_name, triton_uuid, key_id, created_at, updated_at) \
                 VALUES ($1, $2, $3, NOW(), NOW()) \
                 ON CONFLICT (account_name) WHERE archived = false DO NOTHING",
                &[&account.account_name, &account.triton_uuid, &account.key_id],
            )
            .await?;
        if inserted == 0 {
            tracing::debug!(account = %account.account_name, "Account already present, reusing row");
        }

        let stored = self
            .find_account_by_name(&account.account_name)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "account",
                key: account.account_name.clone(),
            })?;
        *account = stored;
        Ok(())
    }

    async fn save_account(&self, account: &mut Account) -> Result<(), DatabaseError> {
        let id = account
            .id
            .ok_or(DatabaseError::MissingIdentifier { entity: "account" })?;
        let updated_at = Utc::now();

        let conn = self.conn().await?;
        let updated = conn
            .execute(
                "UPDATE tsg_accounts SET account_name = $2, triton_uuid = $3, key_id = $4, updated_at = $5 \
                 WHERE id = $1",
                &[&id, &account.account_name, &account.triton_uuid, &account.key_id, &updated_at],
            )
            .await?;
        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "account",
                key: id.to_string(),
            });
        }

        account.updated_at = updated_at;
        Ok(())
    }

    async fn account_exists(&self, id: Option<Uuid>, name: Option<&str>) -> Result<bool, DatabaseError> {
        let (id, name) = lookup_key("account", id, name)?;
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT 1 FROM tsg_accounts WHERE (id = $1 OR account_name = $2) AND archived = false LIMIT 1",
                &[&id, &name],
            )
            .await?;
        Ok(row.is_some())
    }

    async fn find_credential(&self, account_id: Uuid) -> Result<Option<TritonCredential>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT a.account_name, k.fingerprint, k.material \
                 FROM tsg_accounts a JOIN tsg_keys k ON a.key_id = k.id \
                 WHERE a.id = $1 AND a.archived = false AND k.archived = false",
                &[&account_id],
            )
            .await?;
        Ok(row.map(|row| TritonCredential {
            account_name: row.get("account_name"),
            key_id: row.get("fingerprint"),
            key_material: row.get("material"),
        }))
    }
}

#[async_trait]
impl KeyStore for Store {
    async fn find_key_by_id(&self, id: Uuid) -> Result<Option<Key>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT {} FROM tsg_keys WHERE id = $1 AND archived = false",
                    KEY_COLUMNS
                ),
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(key_from_row))
    }

    async fn find_key_by_name(&self, name: &str, account_id: Uuid) -> Result<Option<Key>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT {} FROM tsg_keys WHERE name = $1 AND account_id = $2 AND archived = false",
                    KEY_COLUMNS
                ),
                &[&name, &account_id],
            )
            .await?;
        Ok(row.as_ref().map(key_from_row))
    }

    async fn insert_key(&self, key: &mut Key) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        let inserted = conn
            .execute(
                "INSERT INTO tsg_keys (name, fingerprint, material, account_id, archived, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, false, NOW(), NOW()) \
                 ON CONFLICT (account_id, name) WHERE archived = false DO NOTHING",
                &[&key.name, &key.fingerprint, &key.material, &key.account_id],
            )
            .await?;
        if inserted == 0 {
            tracing::debug!(key_name = %key.name, account_id = %key.account_id, "Key already present, reusing row");
        }

        let stored = self
            .find_key_by_name(&key.name, key.account_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "key",
                key: key.name.clone(),
            })?;
        *key = stored;
        Ok(())
    }

    async fn save_key(&self, key: &mut Key) -> Result<(), DatabaseError> {
        let id = key.id.ok_or(DatabaseError::MissingIdentifier { entity: "key" })?;
        let updated_at = Utc::now();

        let conn = self.conn().await?;
        let updated = conn
            .execute(
                "UPDATE tsg_keys SET name = $2, fingerprint = $3, material = $4, archived = $5, updated_at = $6 \
                 WHERE id = $1",
                &[&id, &key.name, &key.fingerprint, &key.material, &key.archived, &updated_at],
            )
            .await?;
        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "key",
                key: id.to_string(),
            });
        }

        key.updated_at = updated_at;
        Ok(())
    }

    async fn key_exists(&self, id: Option<Uuid>, name: Option<&str>) -> Result<bool, DatabaseError> {
        let (id, name) = lookup_key("key", id, name)?;
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT 1 FROM tsg_keys WHERE (id = $1 OR name = $2) AND archived = false LIMIT 1",
                &[&id, &name],
            )
            .await?;
        Ok(row.is_some())
    }
}
