//! Runtime configuration for the `tokenwatch` binary.
//!
//! Values come from `TOKENWATCH_*` environment variables (a `.env` file is
//! loaded first when present), on top of the defaults below.

use std::time::Duration;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

use crate::errors::LedgerError;
use crate::ledger::rpc::RpcSettings;
use crate::ledger::LocalSigner;
use crate::network;
use crate::token::{BindingOptions, DEFAULT_APPROVAL_TTL_LEDGERS};

#[derive(Debug, Clone, Deserialize)]
pub struct TokenwatchConfig {
    /// Preset name, see [`network::resolve_preset`].
    pub network: String,
    /// Overrides the preset's RPC endpoint.
    pub rpc_url: Option<String>,
    /// Overrides the preset's passphrase.
    pub network_passphrase: Option<String>,
    pub contract_id: String,
    /// `S...` strkey or hex seed. Without it the connection is read-only.
    pub secret_key: Option<String>,
    /// Account whose balance is reported; defaults to the signer's.
    pub owner: Option<String>,
    pub request_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub approval_ttl_ledgers: u32,
    pub serialize_actions: bool,
}

/// Load `.env`, then read the environment.
pub fn load() -> Result<TokenwatchConfig, ConfigError> {
    dotenvy::dotenv().ok();
    from_source(Environment::with_prefix("TOKENWATCH"))
}

fn from_source(env: Environment) -> Result<TokenwatchConfig, ConfigError> {
    let settings = Config::builder()
        .set_default("network", "testnet")?
        .set_default("request_timeout_secs", 30)?
        .set_default("poll_interval_ms", 2_000)?
        .set_default("approval_ttl_ledgers", i64::from(DEFAULT_APPROVAL_TTL_LEDGERS))?
        .set_default("serialize_actions", false)?
        .add_source(env)
        .build()?;

    settings.try_deserialize()
}

impl TokenwatchConfig {
    /// Endpoint and timing, with explicit overrides winning over the preset.
    pub fn rpc_settings(&self) -> Result<RpcSettings, ConfigError> {
        let preset = network::resolve_preset(&self.network)
            .ok_or_else(|| ConfigError::Message(format!("unknown network `{}`", self.network)))?;

        let rpc_url = self.rpc_url.clone().or(preset.rpc_url).ok_or_else(|| {
            ConfigError::Message(format!(
                "{} has no default RPC endpoint; set TOKENWATCH_RPC_URL",
                preset.name
            ))
        })?;
        let network_passphrase = self
            .network_passphrase
            .clone()
            .unwrap_or(preset.network_passphrase);

        Ok(RpcSettings {
            rpc_url,
            network_passphrase,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        })
    }

    pub fn signer(&self) -> Result<Option<LocalSigner>, LedgerError> {
        self.secret_key
            .as_deref()
            .map(LocalSigner::from_secret)
            .transpose()
    }

    pub fn binding_options(&self) -> BindingOptions {
        BindingOptions {
            approval_ttl_ledgers: self.approval_ttl_ledgers,
            serialize_actions: self.serialize_actions,
        }
    }
}
