//! 交易状态查询模型
//!
//! 一次轮询的结果：状态 + 可选的哈希变更。
//! TON 等链在上链后会改写对外可见的哈希，必须通过 `hash_changes` 显式表达。

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Chain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    /// 已广播，尚未上链（或节点尚未索引）
    Pending,
    /// 已上链并执行成功
    Confirmed,
    /// 上链失败（未执行）
    Failed,
    /// 上链但执行回滚 / 消息被 bounce
    Reverted,
}

impl TransactionState {
    /// 是否为最终状态（不再轮询）
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// 状态只允许从 Pending 前进到最终状态
    pub fn can_transition_to(&self, target: &Self) -> bool {
        match (self, target) {
            (Self::Pending, _) => true,
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::Reverted => "reverted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashChange {
    pub old: String,
    pub new: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionChanges {
    pub state: TransactionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_changes: Option<HashChange>,
    /// 实际消耗的手续费（链上可得时）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<u128>,
}

impl TransactionChanges {
    pub fn new(state: TransactionState) -> Self {
        Self {
            state,
            hash_changes: None,
            fee: None,
        }
    }

    pub fn pending() -> Self {
        Self::new(TransactionState::Pending)
    }

    pub fn with_fee(mut self, fee: u128) -> Self {
        self.fee = Some(fee);
        self
    }

    /// 仅当新旧哈希不同才记录变更
    pub fn with_hash_change(mut self, old: impl Into<String>, new: impl Into<String>) -> Self {
        let (old, new) = (old.into(), new.into());
        if old != new {
            self.hash_changes = Some(HashChange { old, new });
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionStateRequest {
    pub chain: Chain,
    pub hash: String,
    pub sender: String,
    /// 广播时的区块高度 / ledger 序号（部分链用于限定查询范围）
    #[serde(default)]
    pub block: Option<u64>,
    /// 广播时间（unix 秒）
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl TransactionStateRequest {
    pub fn new(chain: Chain, hash: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            chain,
            hash: hash.into(),
            sender: sender.into(),
            block: None,
            created_at: None,
        }
    }
}
