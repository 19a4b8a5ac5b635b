//! 支持的区块链定义
//!
//! `Chain` 是全局唯一的调度键：所有 Proxy 都按 `Chain` 查表。
//! 新增链时必须同时更新 `Chain::ALL`，注册表构建时会做穷尽校验。

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ChainError;

/// 加密曲线类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurveType {
    /// secp256k1 (Bitcoin, EVM, Cosmos, Tron)
    Secp256k1,
    /// ed25519 (Solana, TON, Aptos, Sui, Near)
    Ed25519,
}

/// 链家族：同一家族共享 ChainSignData 形态与签名流程
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainType {
    Bitcoin,
    Ethereum,
    Cosmos,
    Solana,
    Ton,
    Tron,
    Aptos,
    Sui,
    Xrp,
    Near,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    // UTXO
    Bitcoin,
    Litecoin,
    Doge,
    // EVM
    Ethereum,
    SmartChain,
    Polygon,
    Arbitrum,
    Optimism,
    Base,
    // Cosmos SDK
    Cosmos,
    Osmosis,
    // 其他
    Solana,
    Ton,
    Tron,
    Aptos,
    Sui,
    Xrp,
    Near,
}

impl Chain {
    pub const ALL: [Chain; 18] = [
        Chain::Bitcoin,
        Chain::Litecoin,
        Chain::Doge,
        Chain::Ethereum,
        Chain::SmartChain,
        Chain::Polygon,
        Chain::Arbitrum,
        Chain::Optimism,
        Chain::Base,
        Chain::Cosmos,
        Chain::Osmosis,
        Chain::Solana,
        Chain::Ton,
        Chain::Tron,
        Chain::Aptos,
        Chain::Sui,
        Chain::Xrp,
        Chain::Near,
    ];

    pub fn all() -> impl Iterator<Item = Chain> {
        Self::ALL.into_iter()
    }

    pub fn chain_type(&self) -> ChainType {
        match self {
            Chain::Bitcoin | Chain::Litecoin | Chain::Doge => ChainType::Bitcoin,
            Chain::Ethereum
            | Chain::SmartChain
            | Chain::Polygon
            | Chain::Arbitrum
            | Chain::Optimism
            | Chain::Base => ChainType::Ethereum,
            Chain::Cosmos | Chain::Osmosis => ChainType::Cosmos,
            Chain::Solana => ChainType::Solana,
            Chain::Ton => ChainType::Ton,
            Chain::Tron => ChainType::Tron,
            Chain::Aptos => ChainType::Aptos,
            Chain::Sui => ChainType::Sui,
            Chain::Xrp => ChainType::Xrp,
            Chain::Near => ChainType::Near,
        }
    }

    pub fn curve(&self) -> CurveType {
        match self.chain_type() {
            ChainType::Bitcoin
            | ChainType::Ethereum
            | ChainType::Cosmos
            | ChainType::Tron
            | ChainType::Xrp => CurveType::Secp256k1,
            ChainType::Solana | ChainType::Ton | ChainType::Aptos | ChainType::Sui | ChainType::Near => {
                CurveType::Ed25519
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Bitcoin => "bitcoin",
            Chain::Litecoin => "litecoin",
            Chain::Doge => "doge",
            Chain::Ethereum => "ethereum",
            Chain::SmartChain => "smartchain",
            Chain::Polygon => "polygon",
            Chain::Arbitrum => "arbitrum",
            Chain::Optimism => "optimism",
            Chain::Base => "base",
            Chain::Cosmos => "cosmos",
            Chain::Osmosis => "osmosis",
            Chain::Solana => "solana",
            Chain::Ton => "ton",
            Chain::Tron => "tron",
            Chain::Aptos => "aptos",
            Chain::Sui => "sui",
            Chain::Xrp => "xrp",
            Chain::Near => "near",
        }
    }

    /// 网络标识：EVM 为 EIP-155 chain id，Cosmos 为 chain-id 字符串
    pub fn network_id(&self) -> &'static str {
        match self {
            Chain::Ethereum => "1",
            Chain::SmartChain => "56",
            Chain::Polygon => "137",
            Chain::Arbitrum => "42161",
            Chain::Optimism => "10",
            Chain::Base => "8453",
            Chain::Cosmos => "cosmoshub-4",
            Chain::Osmosis => "osmosis-1",
            Chain::Aptos => "1",
            Chain::Bitcoin | Chain::Litecoin | Chain::Doge => "mainnet",
            Chain::Solana => "mainnet-beta",
            Chain::Ton => "-239",
            Chain::Tron => "0x2b6653dc",
            Chain::Sui => "35834a8a",
            Chain::Xrp => "0",
            Chain::Near => "mainnet",
        }
    }

    /// EVM 链的 EIP-155 chain id
    pub fn evm_chain_id(&self) -> Option<u64> {
        match self.chain_type() {
            ChainType::Ethereum => self.network_id().parse().ok(),
            _ => None,
        }
    }

    /// OP Stack 链需要额外的 L1 数据费
    pub fn is_op_stack(&self) -> bool {
        matches!(self, Chain::Optimism | Chain::Base)
    }

    pub fn decimals(&self) -> u32 {
        match self {
            Chain::Bitcoin | Chain::Litecoin | Chain::Doge => 8,
            Chain::Ethereum
            | Chain::SmartChain
            | Chain::Polygon
            | Chain::Arbitrum
            | Chain::Optimism
            | Chain::Base => 18,
            Chain::Cosmos | Chain::Osmosis | Chain::Tron | Chain::Xrp => 6,
            Chain::Solana | Chain::Ton | Chain::Sui => 9,
            Chain::Aptos => 8,
            Chain::Near => 24,
        }
    }

    /// Cosmos 链的原生手续费 denom
    pub fn fee_denom(&self) -> Option<&'static str> {
        match self {
            Chain::Cosmos => Some("uatom"),
            Chain::Osmosis => Some("uosmo"),
            _ => None,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = ChainError;

    /// 接受规范名称及常见别名（大小写不敏感）
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        let chain = match normalized.as_str() {
            "bitcoin" | "btc" => Chain::Bitcoin,
            "litecoin" | "ltc" => Chain::Litecoin,
            "doge" | "dogecoin" => Chain::Doge,
            "ethereum" | "eth" => Chain::Ethereum,
            "smartchain" | "bsc" | "bnb" | "binance" => Chain::SmartChain,
            "polygon" | "matic" => Chain::Polygon,
            "arbitrum" | "arb" => Chain::Arbitrum,
            "optimism" | "op" => Chain::Optimism,
            "base" => Chain::Base,
            "cosmos" | "atom" => Chain::Cosmos,
            "osmosis" | "osmo" => Chain::Osmosis,
            "solana" | "sol" => Chain::Solana,
            "ton" => Chain::Ton,
            "tron" | "trx" => Chain::Tron,
            "aptos" | "apt" => Chain::Aptos,
            "sui" => Chain::Sui,
            "xrp" | "ripple" => Chain::Xrp,
            "near" => Chain::Near,
            _ => {
                return Err(ChainError::Configuration(format!(
                    "unknown chain identifier: {}",
                    s
                )))
            }
        };
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_all_is_unique_and_complete() {
        let set: HashSet<Chain> = Chain::all().collect();
        assert_eq!(set.len(), Chain::ALL.len());
    }

    #[test]
    fn test_from_str_roundtrips_canonical_names() {
        for chain in Chain::all() {
            assert_eq!(chain.as_str().parse::<Chain>().unwrap(), chain);
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!("BSC".parse::<Chain>().unwrap(), Chain::SmartChain);
        assert_eq!(" eth ".parse::<Chain>().unwrap(), Chain::Ethereum);
        assert_eq!("sol".parse::<Chain>().unwrap(), Chain::Solana);
        assert!("dogecoin-cash".parse::<Chain>().is_err());
    }

    #[test]
    fn test_serde_uses_lowercase_names() {
        let json = serde_json::to_string(&Chain::SmartChain).unwrap();
        assert_eq!(json, "\"smartchain\"");
        let chain: Chain = serde_json::from_str("\"ton\"").unwrap();
        assert_eq!(chain, Chain::Ton);
    }

    #[test]
    fn test_families_and_curves() {
        assert_eq!(Chain::Base.chain_type(), ChainType::Ethereum);
        assert_eq!(Chain::Osmosis.chain_type(), ChainType::Cosmos);
        assert_eq!(Chain::Doge.curve(), CurveType::Secp256k1);
        assert_eq!(Chain::Ton.curve(), CurveType::Ed25519);
        assert_eq!(Chain::Polygon.evm_chain_id(), Some(137));
        assert_eq!(Chain::Solana.evm_chain_id(), None);
    }
}
