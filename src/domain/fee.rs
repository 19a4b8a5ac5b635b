//! 归一化手续费模型

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::AssetId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeePriority {
    Slow,
    Normal,
    Fast,
}

impl FeePriority {
    pub const ALL: [FeePriority; 3] = [FeePriority::Slow, FeePriority::Normal, FeePriority::Fast];
}

/// 手续费附加项（次级成本）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeeOption {
    /// TON jetton 钱包创建/充值费用，Solana 关联账户创建费用
    TokenAccountCreation,
}

/// gas 计价链的扩展字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasFee {
    pub limit: u128,
    pub max_gas_price: u128,
    /// EIP-1559 priority fee；非 EVM 链与 max_gas_price 相同
    pub miner_fee: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fee {
    pub fee_asset_id: AssetId,
    pub priority: FeePriority,
    pub amount: u128,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<FeeOption, u128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<GasFee>,
}

impl Fee {
    pub fn new(fee_asset_id: AssetId, priority: FeePriority, amount: u128) -> Self {
        Self {
            fee_asset_id,
            priority,
            amount,
            options: BTreeMap::new(),
            gas: None,
        }
    }

    /// gas 计价：amount = limit * max_gas_price
    pub fn gas(
        fee_asset_id: AssetId,
        priority: FeePriority,
        limit: u128,
        max_gas_price: u128,
        miner_fee: u128,
    ) -> Self {
        Self {
            fee_asset_id,
            priority,
            amount: limit.saturating_mul(max_gas_price),
            options: BTreeMap::new(),
            gas: Some(GasFee {
                limit,
                max_gas_price,
                miner_fee,
            }),
        }
    }

    pub fn with_option(mut self, key: FeeOption, value: u128) -> Self {
        self.options.insert(key, value);
        self
    }

    pub fn with_amount(mut self, amount: u128) -> Self {
        self.amount = amount;
        self
    }

    pub fn option(&self, key: FeeOption) -> Option<u128> {
        self.options.get(&key).copied()
    }

    /// 手续费总额（含附加项）
    pub fn total(&self) -> u128 {
        self.options
            .values()
            .fold(self.amount, |acc, v| acc.saturating_add(*v))
    }

    pub fn gas_limit(&self) -> Option<u128> {
        self.gas.as_ref().map(|g| g.limit)
    }
}
