pub mod loader;

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;

use crate::error::ConsentError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub ledger: LedgerConfig,
    pub crypto: CryptoConfig,
    pub consent: ConsentConfig,
}

/// Which ledger backend receives provenance proofs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackendKind {
    Simulation,
    Chain,
    Permissioned,
}

impl LedgerBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerBackendKind::Simulation => "simulation",
            LedgerBackendKind::Chain => "chain",
            LedgerBackendKind::Permissioned => "permissioned",
        }
    }
}

impl FromStr for LedgerBackendKind {
    type Err = ConsentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulation" => Ok(LedgerBackendKind::Simulation),
            "chain" | "ethereum" => Ok(LedgerBackendKind::Chain),
            "permissioned" | "fabric" => Ok(LedgerBackendKind::Permissioned),
            other => Err(ConsentError::ConfigError(format!(
                "Unknown ledger backend: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub backend: LedgerBackendKind,
    pub chain: ChainConfig,
    pub fabric: FabricConfig,
    pub retry: RetryConfig,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub from_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FabricConfig {
    pub gateway_url: String,
    pub channel: String,
    pub chaincode: String,
    pub min_endorsements: u32,
}

/// Bounds applied to every external ledger call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub call_timeout_ms: u64,
}

#[derive(Clone, Deserialize)]
pub struct CryptoConfig {
    /// 32-byte master key, hex encoded.
    pub master_key_hex: String,
    pub uid_pepper: String,
    pub biometric_memory_kib: u32,
    pub biometric_iterations: u32,
}

// Key material never reaches logs.
impl fmt::Debug for CryptoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoConfig")
            .field("master_key_hex", &"<redacted>")
            .field("uid_pepper", &"<redacted>")
            .field("biometric_memory_kib", &self.biometric_memory_kib)
            .field("biometric_iterations", &self.biometric_iterations)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentConfig {
    pub max_grant_days: i64,
    pub tier_policy_path: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackendKind::Simulation,
            chain: ChainConfig {
                rpc_url: "http://127.0.0.1:8545".to_string(),
                from_address: "0x0000000000000000000000000000000000000000".to_string(),
            },
            fabric: FabricConfig {
                gateway_url: "http://127.0.0.1:7080".to_string(),
                channel: "citizen-channel".to_string(),
                chaincode: "provenance".to_string(),
                min_endorsements: 2,
            },
            retry: RetryConfig::default(),
            poll_interval_ms: 5_000,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 250,
            max_backoff_ms: 10_000,
            call_timeout_ms: 10_000,
        }
    }
}

/// Upper bound accepted for MAX_GRANT_DAYS (about a century).
pub const MAX_GRANT_DAYS_LIMIT: i64 = 36_500;

impl ConsentConfig {
    pub fn validate(&self) -> Result<(), ConsentError> {
        if self.max_grant_days <= 0 || self.max_grant_days > MAX_GRANT_DAYS_LIMIT {
            return Err(ConsentError::ConfigError(format!(
                "MAX_GRANT_DAYS must be between 1 and {}, got {}",
                MAX_GRANT_DAYS_LIMIT, self.max_grant_days
            )));
        }
        Ok(())
    }
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self {
            max_grant_days: 365,
            tier_policy_path: None,
        }
    }
}

impl CryptoConfig {
    pub fn new(master_key_hex: impl Into<String>, uid_pepper: impl Into<String>) -> Self {
        Self {
            master_key_hex: master_key_hex.into(),
            uid_pepper: uid_pepper.into(),
            biometric_memory_kib: 19_456,
            biometric_iterations: 2,
        }
    }

    pub fn master_key(&self) -> Result<[u8; 32], ConsentError> {
        let bytes = hex::decode(self.master_key_hex.trim())
            .map_err(|e| ConsentError::ConfigError(format!("MASTER_KEY is not valid hex: {}", e)))?;
        bytes.try_into().map_err(|b: Vec<u8>| {
            ConsentError::ConfigError(format!(
                "MASTER_KEY must be 32 bytes, got {}",
                b.len()
            ))
        })
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T, ConsentError>
where
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConsentError::ConfigError(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConsentError> {
        let database_url = env_or("DATABASE_URL", "sqlite://consent-gate.db");
        let server_host = env_or("SERVER_HOST", "0.0.0.0");
        let server_port = env_parse("SERVER_PORT", 3000u16)?;

        let ledger_defaults = LedgerConfig::default();
        let retry_defaults = RetryConfig::default();
        let ledger = LedgerConfig {
            backend: env_or("LEDGER_BACKEND", "simulation").parse()?,
            chain: ChainConfig {
                rpc_url: env_or("CHAIN_RPC_URL", &ledger_defaults.chain.rpc_url),
                from_address: env_or("CHAIN_FROM_ADDRESS", &ledger_defaults.chain.from_address),
            },
            fabric: FabricConfig {
                gateway_url: env_or("FABRIC_GATEWAY_URL", &ledger_defaults.fabric.gateway_url),
                channel: env_or("FABRIC_CHANNEL", &ledger_defaults.fabric.channel),
                chaincode: env_or("FABRIC_CHAINCODE", &ledger_defaults.fabric.chaincode),
                min_endorsements: env_parse(
                    "FABRIC_MIN_ENDORSEMENTS",
                    ledger_defaults.fabric.min_endorsements,
                )?,
            },
            retry: RetryConfig {
                max_attempts: env_parse("LEDGER_MAX_ATTEMPTS", retry_defaults.max_attempts)?,
                initial_backoff_ms: env_parse(
                    "LEDGER_INITIAL_BACKOFF_MS",
                    retry_defaults.initial_backoff_ms,
                )?,
                max_backoff_ms: env_parse("LEDGER_MAX_BACKOFF_MS", retry_defaults.max_backoff_ms)?,
                call_timeout_ms: env_parse(
                    "LEDGER_CALL_TIMEOUT_MS",
                    retry_defaults.call_timeout_ms,
                )?,
            },
            poll_interval_ms: env_parse("LEDGER_POLL_INTERVAL_MS", ledger_defaults.poll_interval_ms)?,
        };

        let master_key_hex = env::var("MASTER_KEY").map_err(|_| {
            ConsentError::ConfigError(
                "MASTER_KEY is not set; generate one with `openssl rand -hex 32`".to_string(),
            )
        })?;
        let mut crypto = CryptoConfig::new(master_key_hex, env_or("UID_PEPPER", ""));
        crypto.biometric_memory_kib = env_parse("BIOMETRIC_MEMORY_KIB", crypto.biometric_memory_kib)?;
        crypto.biometric_iterations = env_parse("BIOMETRIC_ITERATIONS", crypto.biometric_iterations)?;
        crypto.master_key()?;
        if crypto.uid_pepper.is_empty() {
            return Err(ConsentError::ConfigError("UID_PEPPER is not set".to_string()));
        }

        let consent = ConsentConfig {
            max_grant_days: env_parse("MAX_GRANT_DAYS", 365i64)?,
            tier_policy_path: env::var("TIER_POLICY_PATH").ok(),
        };
        consent.validate()?;

        Ok(AppConfig {
            database_url,
            server_host,
            server_port,
            ledger,
            crypto,
            consent,
        })
    }
}
