//! 账户与资产标识

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Chain;

/// 发送方账户，由外部仓储在导入钱包时创建，核心层只读
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    pub chain: Chain,
    pub address: String,
    /// 派生路径，例如 m/44'/607'/0'
    pub derivation_path: String,
    /// UTXO 链可携带扩展公钥
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_public_key: Option<String>,
}

impl Account {
    pub fn new(chain: Chain, address: impl Into<String>, derivation_path: impl Into<String>) -> Self {
        Self {
            chain,
            address: address.into(),
            derivation_path: derivation_path.into(),
            extended_public_key: None,
        }
    }

    pub fn with_extended_public_key(mut self, xpub: impl Into<String>) -> Self {
        self.extended_public_key = Some(xpub.into());
        self
    }
}

/// 资产标识：原生币 token_id 为空
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId {
    pub chain: Chain,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
}

impl AssetId {
    pub fn native(chain: Chain) -> Self {
        Self {
            chain,
            token_id: None,
        }
    }

    pub fn token(chain: Chain, token_id: impl Into<String>) -> Self {
        Self {
            chain,
            token_id: Some(token_id.into()),
        }
    }

    pub fn is_native(&self) -> bool {
        self.token_id.is_none()
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.token_id {
            Some(token) => write!(f, "{}_{}", self.chain, token),
            None => write!(f, "{}", self.chain),
        }
    }
}

/// 日志中使用的地址缩写，避免完整地址进入日志
pub fn mask_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 12 {
        return address.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}
