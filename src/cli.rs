//! Command-line interface for the `tsg` binary.

use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::auth::{AuthPolicy, Authenticator};
use crate::config::Config;
use crate::db::{AccountStore, Detached, KeyStore, Store};
use crate::identity::CloudApiClient;
use crate::server::ServiceApi;

/// Modulus size below which generated keys are considered weak.
const RECOMMENDED_KEY_BITS: usize = 2048;

#[derive(Parser, Debug)]
#[command(name = "tsg", version, about = "Triton Service Groups API")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP API
    Agent {
        /// Address to bind (overrides TSG_HTTP_BIND)
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on (overrides TSG_HTTP_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Apply pending database migrations
    Migrate,

    /// Print the version
    Version,
}

/// Run a command against a loaded configuration.
pub async fn run_command(cmd: Command, mut config: Config) -> anyhow::Result<()> {
    match cmd {
        Command::Agent { bind, port } => {
            if let Some(bind) = bind {
                config.http.bind = bind;
            }
            if let Some(port) = port {
                config.http.port = port;
            }
            run_agent(config).await
        }
        Command::Migrate => run_migrate(&config).await,
        Command::Version => {
            print_version();
            Ok(())
        }
    }
}

pub fn print_version() {
    println!("tsg {}", env!("CARGO_PKG_VERSION"));
}

async fn run_agent(config: Config) -> anyhow::Result<()> {
    let policy = AuthPolicy::from_config(&config.auth);
    if matches!(policy, AuthPolicy::FixedIdentity { .. }) {
        tracing::warn!("Development mode: every request is served as a fixed identity");
    }
    if config.auth.key_bits < RECOMMENDED_KEY_BITS {
        tracing::warn!(
            key_bits = config.auth.key_bits,
            "Management keys are generated below {} bits",
            RECOMMENDED_KEY_BITS
        );
    }

    let (accounts, keys): (Arc<dyn AccountStore>, Arc<dyn KeyStore>) = match &config.database {
        Some(db) => {
            let store = Arc::new(Store::new(db).await?);
            store.run_migrations().await?;
            let accounts: Arc<dyn AccountStore> = store.clone();
            let keys: Arc<dyn KeyStore> = store;
            (accounts, keys)
        }
        None => {
            tracing::warn!("No database configured; only the development identity can authenticate");
            let accounts: Arc<dyn AccountStore> = Arc::new(Detached);
            let keys: Arc<dyn KeyStore> = Arc::new(Detached);
            (accounts, keys)
        }
    };

    let identity = Arc::new(CloudApiClient::new(config.auth.identity_url.clone())?);
    tracing::info!(
        datacenter = %config.auth.datacenter,
        identity_url = %config.auth.identity_url,
        key_name = %config.auth.key_name(),
        whitelist = config.auth.enable_whitelist,
        "Authentication configured"
    );

    let authenticator = Arc::new(Authenticator::new(config.auth, policy, identity, accounts, keys));
    ServiceApi::start(authenticator, &config.http)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))
}

async fn run_migrate(config: &Config) -> anyhow::Result<()> {
    let Some(db) = &config.database else {
        anyhow::bail!("TSG_DATABASE_URL must be set to run migrations");
    };
    let store = Store::new(db).await?;
    store.run_migrations().await?;
    println!("Migrations applied");
    Ok(())
}
