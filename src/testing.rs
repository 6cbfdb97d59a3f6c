//! In-memory doubles for the stores and the identity provider.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::auth::ParsedRequest;
use crate::auth::keypair::fingerprint_of_authorized_key;
use crate::db::{Account, AccountStore, Key, KeyStore, TritonCredential, lookup_key};
use crate::error::{DatabaseError, IdentityError};
use crate::identity::{AccountProfile, IdentityClient, RemoteKey};

pub const DATE_HEADER: &str = "Sat, 17 Mar 2018 16:12:06 UTC";
pub const CALLER_FINGERPRINT: &str = "12:23:34:45:56:67:78:89:90:0a:ab:bc:cd:de:ad:01";

/// Authorization header signed by `account`'s personal key.
pub fn signature_for(account: &str) -> String {
    format!(
        r#"Signature keyId="/{}/keys/{}",algorithm="rsa-sha256",headers="date",signature="AABBCCDDEEFFGG""#,
        account, CALLER_FINGERPRINT
    )
}

pub fn signed_request(account: &str) -> ParsedRequest {
    ParsedRequest::parse(DATE_HEADER, &signature_for(account)).expect("valid test signature")
}

/// Writes performed against a [`MemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub account_inserts: usize,
    pub account_saves: usize,
    pub key_inserts: usize,
    pub key_saves: usize,
}

#[derive(Default)]
struct MemoryState {
    accounts: Vec<Account>,
    keys: Vec<Key>,
    writes: WriteCounts,
    fail_reads: bool,
    fail_key_inserts: bool,
    fail_account_saves: bool,
}

/// Account and key store backed by vectors.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an account directly, without counting a write.
    pub fn seed_account(&self, mut account: Account) -> Account {
        account.id.get_or_insert_with(Uuid::new_v4);
        self.state.lock().unwrap().accounts.push(account.clone());
        account
    }

    /// Insert a key directly, without counting a write.
    pub fn seed_key(&self, mut key: Key) -> Key {
        key.id.get_or_insert_with(Uuid::new_v4);
        self.state.lock().unwrap().keys.push(key.clone());
        key
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.state.lock().unwrap().accounts.clone()
    }

    pub fn keys(&self) -> Vec<Key> {
        self.state.lock().unwrap().keys.clone()
    }

    pub fn writes(&self) -> WriteCounts {
        self.state.lock().unwrap().writes
    }

    /// Make every subsequent lookup fail.
    pub fn fail_reads(&self) {
        self.state.lock().unwrap().fail_reads = true;
    }

    /// Make every subsequent `insert_key` fail.
    pub fn fail_key_inserts(&self) {
        self.state.lock().unwrap().fail_key_inserts = true;
    }

    /// Make every subsequent `save_account` fail.
    pub fn fail_account_saves(&self) {
        self.state.lock().unwrap().fail_account_saves = true;
    }

    /// Clear injected write failures.
    pub fn heal_writes(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_key_inserts = false;
        state.fail_account_saves = false;
    }

    fn check_reads(state: &MemoryState) -> Result<(), DatabaseError> {
        if state.fail_reads {
            return Err(connection_refused());
        }
        Ok(())
    }
}

fn connection_refused() -> DatabaseError {
    DatabaseError::Pool("connection refused".to_string())
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_account_by_id(&self, id: Uuid) -> Result<Option<Account>, DatabaseError> {
        let state = self.state.lock().unwrap();
        Self::check_reads(&state)?;
        Ok(state.accounts.iter().find(|a| a.id == Some(id)).cloned())
    }

    async fn find_account_by_name(&self, name: &str) -> Result<Option<Account>, DatabaseError> {
        let state = self.state.lock().unwrap();
        Self::check_reads(&state)?;
        Ok(state.accounts.iter().find(|a| a.account_name == name).cloned())
    }

    async fn insert_account(&self, account: &mut Account) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.accounts.iter().find(|a| a.account_name == account.account_name) {
            *account = existing.clone();
            return Ok(());
        }
        let now = Utc::now();
        account.id = Some(Uuid::new_v4());
        account.created_at = now;
        account.updated_at = now;
        state.accounts.push(account.clone());
        state.writes.account_inserts += 1;
        Ok(())
    }

    async fn save_account(&self, account: &mut Account) -> Result<(), DatabaseError> {
        let id = account
            .id
            .ok_or(DatabaseError::MissingIdentifier { entity: "account" })?;
        let mut state = self.state.lock().unwrap();
        if state.fail_account_saves {
            return Err(connection_refused());
        }
        account.updated_at = Utc::now();
        let Some(stored) = state.accounts.iter_mut().find(|a| a.id == Some(id)) else {
            return Err(DatabaseError::NotFound {
                entity: "account",
                key: id.to_string(),
            });
        };
        *stored = account.clone();
        state.writes.account_saves += 1;
        Ok(())
    }

    async fn account_exists(&self, id: Option<Uuid>, name: Option<&str>) -> Result<bool, DatabaseError> {
        let (id, name) = lookup_key("account", id, name)?;
        let state = self.state.lock().unwrap();
        Self::check_reads(&state)?;
        Ok(state
            .accounts
            .iter()
            .any(|a| (id.is_some() && a.id == id) || Some(a.account_name.as_str()) == name))
    }

    async fn find_credential(&self, account_id: Uuid) -> Result<Option<TritonCredential>, DatabaseError> {
        let state = self.state.lock().unwrap();
        Self::check_reads(&state)?;
        let Some(account) = state.accounts.iter().find(|a| a.id == Some(account_id)) else {
            return Ok(None);
        };
        Ok(state
            .keys
            .iter()
            .find(|k| !k.archived && k.id.is_some() && k.id == account.key_id)
            .map(|key| TritonCredential {
                account_name: account.account_name.clone(),
                key_id: key.fingerprint.clone(),
                key_material: key.material.clone(),
            }))
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn find_key_by_id(&self, id: Uuid) -> Result<Option<Key>, DatabaseError> {
        let state = self.state.lock().unwrap();
        Self::check_reads(&state)?;
        Ok(state
            .keys
            .iter()
            .find(|k| k.id == Some(id) && !k.archived)
            .cloned())
    }

    async fn find_key_by_name(&self, name: &str, account_id: Uuid) -> Result<Option<Key>, DatabaseError> {
        let state = self.state.lock().unwrap();
        Self::check_reads(&state)?;
        Ok(state
            .keys
            .iter()
            .find(|k| k.name == name && k.account_id == account_id && !k.archived)
            .cloned())
    }

    async fn insert_key(&self, key: &mut Key) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_key_inserts {
            return Err(connection_refused());
        }
        if let Some(existing) = state
            .keys
            .iter()
            .find(|k| k.name == key.name && k.account_id == key.account_id && !k.archived)
        {
            *key = existing.clone();
            return Ok(());
        }
        let now = Utc::now();
        key.id = Some(Uuid::new_v4());
        key.created_at = now;
        key.updated_at = now;
        state.keys.push(key.clone());
        state.writes.key_inserts += 1;
        Ok(())
    }

    async fn save_key(&self, key: &mut Key) -> Result<(), DatabaseError> {
        let id = key.id.ok_or(DatabaseError::MissingIdentifier { entity: "key" })?;
        let mut state = self.state.lock().unwrap();
        key.updated_at = Utc::now();
        let Some(stored) = state.keys.iter_mut().find(|k| k.id == Some(id)) else {
            return Err(DatabaseError::NotFound {
                entity: "key",
                key: id.to_string(),
            });
        };
        *stored = key.clone();
        state.writes.key_saves += 1;
        Ok(())
    }

    async fn key_exists(&self, id: Option<Uuid>, name: Option<&str>) -> Result<bool, DatabaseError> {
        let (id, name) = lookup_key("key", id, name)?;
        let state = self.state.lock().unwrap();
        Self::check_reads(&state)?;
        Ok(state
            .keys
            .iter()
            .filter(|k| !k.archived)
            .any(|k| (id.is_some() && k.id == id) || Some(k.name.as_str()) == name))
    }
}

#[derive(Default)]
struct ScriptState {
    profile: Option<AccountProfile>,
    account_error: Option<IdentityError>,
    create_error: Option<IdentityError>,
    keys: HashMap<String, RemoteKey>,
    create_calls: usize,
    seen_headers: Vec<(String, String)>,
}

/// Identity provider double answering from a script.
#[derive(Default)]
pub struct ScriptedIdentity {
    state: Mutex<ScriptState>,
}

impl ScriptedIdentity {
    /// A provider that knows no account.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(login: &str, uuid: &str) -> Self {
        let identity = Self::new();
        identity.state.lock().unwrap().profile = Some(AccountProfile {
            id: uuid.to_string(),
            login: login.to_string(),
        });
        identity
    }

    pub fn fail_account_with(&self, error: IdentityError) {
        self.state.lock().unwrap().account_error = Some(error);
    }

    pub fn fail_create_with(&self, error: IdentityError) {
        self.state.lock().unwrap().create_error = Some(error);
    }

    pub fn seed_remote_key(&self, name: &str, fingerprint: &str) {
        self.state.lock().unwrap().keys.insert(
            name.to_string(),
            RemoteKey {
                name: name.to_string(),
                fingerprint: fingerprint.to_string(),
                key: None,
            },
        );
    }

    pub fn remote_key(&self, name: &str) -> Option<RemoteKey> {
        self.state.lock().unwrap().keys.get(name).cloned()
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }

    /// `(Date, Authorization)` pairs received, in call order.
    pub fn seen_headers(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().seen_headers.clone()
    }

    fn record(state: &mut ScriptState, caller: &ParsedRequest) {
        state
            .seen_headers
            .push((caller.date_header().to_string(), caller.auth_header().to_string()));
    }
}

#[async_trait]
impl IdentityClient for ScriptedIdentity {
    async fn get_account(&self, caller: &ParsedRequest) -> Result<Option<AccountProfile>, IdentityError> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, caller);
        if let Some(error) = &state.account_error {
            return Err(error.clone());
        }
        Ok(state
            .profile
            .clone()
            .filter(|p| p.login == caller.account_name))
    }

    async fn list_keys(&self, caller: &ParsedRequest) -> Result<Vec<RemoteKey>, IdentityError> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, caller);
        Ok(state.keys.values().cloned().collect())
    }

    async fn get_key(&self, caller: &ParsedRequest, name: &str) -> Result<Option<RemoteKey>, IdentityError> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, caller);
        Ok(state.keys.get(name).cloned())
    }

    async fn create_key(
        &self,
        caller: &ParsedRequest,
        name: &str,
        public_key: &str,
    ) -> Result<RemoteKey, IdentityError> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, caller);
        state.create_calls += 1;
        if let Some(error) = &state.create_error {
            return Err(error.clone());
        }
        let fingerprint = fingerprint_of_authorized_key(public_key).map_err(|e| IdentityError::Status {
            status: 422,
            body: e.to_string(),
        })?;
        let key = RemoteKey {
            name: name.to_string(),
            fingerprint,
            key: Some(public_key.to_string()),
        };
        state.keys.insert(name.to_string(), key.clone());
        Ok(key)
    }
}
