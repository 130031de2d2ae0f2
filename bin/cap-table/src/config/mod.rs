use ledger_sync::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapTableConfig {
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub token_address: String,
    /// Decimals used when printing balances in table output
    #[serde(default)]
    pub decimals: u8,
}

impl CapTableConfig {
    pub async fn load_from_file(path: &Path) -> eyre::Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Apply `CAP_TABLE_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("CAP_TABLE_RPC_URL") {
            self.ledger.rpc_url = url;
        }
        if let Ok(address) = std::env::var("CAP_TABLE_TOKEN_ADDRESS") {
            self.ledger.token_address = address;
        }
        if let Some(attempts) = std::env::var("CAP_TABLE_RETRY_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
        {
            self.engine.retry.max_attempts = attempts.max(1);
        }
        self
    }
}

impl Default for CapTableConfig {
    fn default() -> Self {
        Self {
            ledger: LedgerConfig {
                rpc_url: "http://localhost:8545".to_string(),
                token_address: "0x0000000000000000000000000000000000000000".to_string(),
                decimals: 0,
            },
            engine: EngineConfig::default(),
        }
    }
}
