//! 配置管理模块
//! 支持从环境变量和配置文件加载配置

use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::Chain;

/// 应用配置结构体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
}

/// 节点 RPC 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// 只读请求的最大尝试次数（广播不重试）
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// 节点健康探测间隔
    pub probe_interval_secs: u64,
    /// `Chain::as_str` 链名 -> 节点 URL 列表（按优先级排序），未知链名在 validate 中拒绝
    #[serde(default)]
    pub endpoints: BTreeMap<String, Vec<String>>,
}

/// TON jetton 钱包"是否已激活"的判定信号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JettonActivitySignal {
    /// getAddressState 返回 "active"
    AddressState,
    /// 出现在 jetton/wallets 列表中
    WalletListing,
}

/// 交易流水线配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// 多载荷广播之间的间隔
    pub broadcast_delay_ms: u64,
    /// TON 外部消息有效期
    pub ton_message_ttl_secs: u32,
    pub ton_jetton_activity: JettonActivitySignal,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
        }
    }
}

/// 各链默认公共节点
fn default_endpoint(chain: Chain) -> &'static str {
    match chain {
        Chain::Bitcoin => "https://btc.blockbook.gemwallet.com",
        Chain::Litecoin => "https://ltc.blockbook.gemwallet.com",
        Chain::Doge => "https://doge.blockbook.gemwallet.com",
        Chain::Ethereum => "https://eth.llamarpc.com",
        Chain::SmartChain => "https://bsc-dataseed1.binance.org",
        Chain::Polygon => "https://polygon-rpc.com",
        Chain::Arbitrum => "https://arb1.arbitrum.io/rpc",
        Chain::Optimism => "https://mainnet.optimism.io",
        Chain::Base => "https://mainnet.base.org",
        Chain::Cosmos => "https://cosmos-rest.publicnode.com",
        Chain::Osmosis => "https://osmosis-rest.publicnode.com",
        Chain::Solana => "https://api.mainnet-beta.solana.com",
        Chain::Ton => "https://toncenter.com",
        Chain::Tron => "https://api.trongrid.io",
        Chain::Aptos => "https://fullnode.mainnet.aptoslabs.com",
        Chain::Sui => "https://fullnode.mainnet.sui.io",
        Chain::Xrp => "https://s1.ripple.com:51234",
        Chain::Near => "https://rpc.mainnet.near.org",
    }
}

/// 环境变量名，例如 SMARTCHAIN_RPC_URL
fn endpoint_env_key(chain: Chain) -> String {
    format!("{}_RPC_URL", chain.as_str().to_uppercase())
}

impl Default for RpcConfig {
    fn default() -> Self {
        let endpoints = Chain::all()
            .map(|chain| {
                let urls = std::env::var(endpoint_env_key(chain))
                    .ok()
                    .map(|v| {
                        v.split(',')
                            .map(|u| u.trim().to_string())
                            .filter(|u| !u.is_empty())
                            .collect::<Vec<_>>()
                    })
                    .filter(|urls| !urls.is_empty())
                    .unwrap_or_else(|| vec![default_endpoint(chain).to_string()]);
                (chain.as_str().to_string(), urls)
            })
            .collect();

        Self {
            timeout_secs: std::env::var("RPC_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            connect_timeout_secs: std::env::var("RPC_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            max_retries: std::env::var("RPC_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            retry_delay_ms: std::env::var("RPC_RETRY_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            probe_interval_secs: std::env::var("RPC_PROBE_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(15),
            endpoints,
        }
    }
}

impl RpcConfig {
    /// 指定链的节点列表
    pub fn urls(&self, chain: Chain) -> &[String] {
        self.endpoints
            .get(chain.as_str())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// 指定链的首选节点
    pub fn primary_url(&self, chain: Chain) -> Option<&str> {
        self.urls(chain).first().map(|s| s.as_str())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            broadcast_delay_ms: std::env::var("BROADCAST_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(500),
            ton_message_ttl_secs: std::env::var("TON_MESSAGE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(600),
            ton_jetton_activity: match std::env::var("TON_JETTON_ACTIVITY").as_deref() {
                Ok("wallet_listing") => JettonActivitySignal::WalletListing,
                _ => JettonActivitySignal::AddressState,
            },
        }
    }
}

impl Config {
    /// 从环境变量加载配置（自动读取 .env）
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Ok(Self {
            logging: LoggingConfig::default(),
            rpc: RpcConfig::default(),
            pipeline: PipelineConfig::default(),
        })
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let mut config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        // 文件中未列出的链回落到环境变量/默认节点
        let defaults = RpcConfig::default();
        for (chain, urls) in defaults.endpoints {
            config.rpc.endpoints.entry(chain).or_insert(urls);
        }

        Ok(config)
    }

    /// 从环境变量和配置文件合并加载（配置文件优先级更高）
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = Self::from_env()?;

        if let Some(path) = path {
            if path.as_ref().exists() {
                config = Self::from_file(path)?;
            }
        }

        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("LOG_LEVEL must be one of: {:?}", valid_levels);
        }

        if self.logging.format != "json" && self.logging.format != "text" {
            anyhow::bail!("LOG_FORMAT must be 'json' or 'text'");
        }

        if self.rpc.timeout_secs == 0 || self.rpc.connect_timeout_secs == 0 {
            anyhow::bail!("RPC timeouts must be greater than zero");
        }

        if self.rpc.max_retries == 0 {
            anyhow::bail!("RPC_MAX_RETRIES must be at least 1");
        }

        for key in self.rpc.endpoints.keys() {
            key.parse::<Chain>()
                .with_context(|| format!("Unknown chain in rpc.endpoints: {}", key))?;
        }

        for chain in Chain::all() {
            let urls = self.rpc.urls(chain);
            if urls.is_empty() {
                anyhow::bail!("No RPC endpoint configured for chain {}", chain);
            }
            if let Some(bad) = urls
                .iter()
                .find(|u| !u.starts_with("http://") && !u.starts_with("https://"))
            {
                anyhow::bail!("RPC endpoint for {} must be http(s): {}", chain, bad);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_config_from_env() {
        let config = Config::from_env().unwrap();
        for chain in Chain::all() {
            assert!(config.rpc.primary_url(chain).is_some(), "{} has no url", chain);
        }
        assert!(config.rpc.max_retries >= 1);
    }

    #[test]
    fn test_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[logging]
level = "debug"
format = "json"

[rpc]
timeout_secs = 5
connect_timeout_secs = 2
max_retries = 2
retry_delay_ms = 10
probe_interval_secs = 30

[rpc.endpoints]
ton = ["http://127.0.0.1:8081", "https://toncenter.com"]

[pipeline]
broadcast_delay_ms = 0
ton_message_ttl_secs = 300
ton_jetton_activity = "wallet_listing"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.rpc.urls(Chain::Ton).len(), 2);
        assert_eq!(config.rpc.primary_url(Chain::Ton), Some("http://127.0.0.1:8081"));
        // 未在文件中列出的链使用默认节点
        assert!(config.rpc.primary_url(Chain::Aptos).is_some());
        assert_eq!(
            config.pipeline.ton_jetton_activity,
            JettonActivitySignal::WalletListing
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_bad_values() {
        let mut config = Config::from_env().unwrap();
        config.logging.level = "info".into();
        config.logging.format = "text".into();
        assert!(config.validate().is_ok());

        let mut bad_format = config.clone();
        bad_format.logging.format = "xml".into();
        assert!(bad_format.validate().is_err());

        let mut bad_scheme = config.clone();
        bad_scheme
            .rpc
            .endpoints
            .insert("near".into(), vec!["ws://node".into()]);
        assert!(bad_scheme.validate().is_err());

        let mut unknown_chain = config;
        unknown_chain
            .rpc
            .endpoints
            .insert("dogecash".into(), vec!["https://node".into()]);
        assert!(unknown_chain.validate().is_err());
    }
}
