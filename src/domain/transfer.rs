//! 交易描述（TransferParams）
//!
//! 由上层构造后在整条流水线中以不可变值传递。

use serde::{Deserialize, Serialize};

use super::{Account, AssetId, Chain, Fee};
use crate::error::{ChainError, ChainResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeTransfer {
    pub from: Account,
    pub destination: String,
    pub amount: u128,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub is_max_amount: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransfer {
    pub from: Account,
    pub destination: String,
    pub asset_id: AssetId,
    pub amount: u128,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub is_max_amount: bool,
}

/// 跨资产兑换。swap_payload 由兑换服务提供，对核心层不透明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapTransfer {
    pub from: Account,
    pub from_asset: AssetId,
    pub to_asset: AssetId,
    pub from_amount: u128,
    pub to_amount: u128,
    /// 兑换合约/路由地址
    pub to: String,
    /// 随交易附带的原生币数量
    pub value: u128,
    pub swap_payload: String,
    pub protocol_id: String,
    /// EVM 兑换前需要的授权
    #[serde(default)]
    pub approval: Option<SwapApproval>,
    #[serde(default)]
    pub gas_limit: Option<u128>,
    /// 卖出全部余额
    #[serde(default)]
    pub is_max_amount: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapApproval {
    pub token: String,
    pub spender: String,
}

/// 外部（WalletConnect 等）发起的原始签名/发送请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericTransfer {
    pub from: Account,
    pub destination: String,
    pub amount: u128,
    #[serde(default)]
    pub memo: Option<String>,
    /// 十六进制调用数据或链特定的原始载荷
    pub payload: String,
    #[serde(default)]
    pub gas_limit: Option<u128>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenApproval {
    pub from: Account,
    pub asset_id: AssetId,
    /// 被授权合约
    pub contract: String,
    /// 十六进制 approve 调用数据
    pub data: String,
}

/// 质押操作
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StakeAction {
    Delegate { validator: String },
    Undelegate { validator: String },
    Redelegate {
        src_validator: String,
        dst_validator: String,
    },
    /// 领取多个验证人的奖励，每个验证人一条消息
    Rewards { validators: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeTransfer {
    pub from: Account,
    pub action: StakeAction,
    /// 领取奖励时仅用于展示
    pub amount: u128,
    #[serde(default)]
    pub is_max_amount: bool,
}

impl StakeTransfer {
    /// 消息数量：领取奖励按验证人数，其余为 1
    pub fn message_count(&self) -> usize {
        match &self.action {
            StakeAction::Rewards { validators } => validators.len(),
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferParams {
    Native(NativeTransfer),
    Token(TokenTransfer),
    Swap(SwapTransfer),
    Generic(GenericTransfer),
    TokenApproval(TokenApproval),
    Stake(StakeTransfer),
}

/// 广播时携带的交易类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Transfer,
    Swap,
    TokenApproval,
    Generic,
    StakeDelegate,
    StakeUndelegate,
    StakeRedelegate,
    StakeRewards,
}

/// 走"转账式"兑换的协议：签名为一笔到存款地址的普通转账
pub const TRANSFER_SWAP_PROVIDERS: [&str; 1] = ["near_intents"];

impl TransferParams {
    pub fn from(&self) -> &Account {
        match self {
            Self::Native(p) => &p.from,
            Self::Token(p) => &p.from,
            Self::Swap(p) => &p.from,
            Self::Generic(p) => &p.from,
            Self::TokenApproval(p) => &p.from,
            Self::Stake(p) => &p.from,
        }
    }

    pub fn chain(&self) -> Chain {
        self.from().chain
    }

    pub fn asset_id(&self) -> AssetId {
        match self {
            Self::Native(p) => AssetId::native(p.from.chain),
            Self::Token(p) => p.asset_id.clone(),
            Self::Swap(p) => p.from_asset.clone(),
            Self::Generic(p) => AssetId::native(p.from.chain),
            Self::TokenApproval(p) => p.asset_id.clone(),
            Self::Stake(p) => AssetId::native(p.from.chain),
        }
    }

    pub fn amount(&self) -> u128 {
        match self {
            Self::Native(p) => p.amount,
            Self::Token(p) => p.amount,
            Self::Swap(p) => p.from_amount,
            Self::Generic(p) => p.amount,
            Self::TokenApproval(_) => 0,
            Self::Stake(p) => p.amount,
        }
    }

    pub fn memo(&self) -> Option<&str> {
        match self {
            Self::Native(p) => p.memo.as_deref(),
            Self::Token(p) => p.memo.as_deref(),
            Self::Generic(p) => p.memo.as_deref(),
            Self::Swap(_) | Self::TokenApproval(_) | Self::Stake(_) => None,
        }
    }

    pub fn is_max_amount(&self) -> bool {
        match self {
            Self::Native(p) => p.is_max_amount,
            Self::Token(p) => p.is_max_amount,
            Self::Stake(p) => p.is_max_amount,
            _ => false,
        }
    }

    pub fn transaction_type(&self) -> TransactionType {
        match self {
            Self::Native(_) | Self::Token(_) => TransactionType::Transfer,
            Self::Swap(_) => TransactionType::Swap,
            Self::Generic(_) => TransactionType::Generic,
            Self::TokenApproval(_) => TransactionType::TokenApproval,
            Self::Stake(p) => match p.action {
                StakeAction::Delegate { .. } => TransactionType::StakeDelegate,
                StakeAction::Undelegate { .. } => TransactionType::StakeUndelegate,
                StakeAction::Redelegate { .. } => TransactionType::StakeRedelegate,
                StakeAction::Rewards { .. } => TransactionType::StakeRewards,
            },
        }
    }

    /// 结构性校验：资产与发送方必须同链，目标地址不能为空
    pub fn validate(&self) -> ChainResult<()> {
        let chain = self.chain();
        let asset = self.asset_id();
        if asset.chain != chain {
            return Err(ChainError::precondition(format!(
                "asset {} does not belong to sender chain {}",
                asset, chain
            )));
        }
        let destination = match self {
            Self::Native(p) => Some(p.destination.as_str()),
            Self::Token(p) => Some(p.destination.as_str()),
            Self::Generic(p) => Some(p.destination.as_str()),
            Self::Swap(p) => Some(p.to.as_str()),
            Self::TokenApproval(p) => Some(p.contract.as_str()),
            Self::Stake(p) => match &p.action {
                StakeAction::Delegate { validator } | StakeAction::Undelegate { validator } => {
                    Some(validator.as_str())
                }
                StakeAction::Redelegate { dst_validator, .. } => Some(dst_validator.as_str()),
                StakeAction::Rewards { validators } => validators.first().map(|v| v.as_str()),
            },
        };
        if destination.map(|d| d.trim().is_empty()).unwrap_or(true) {
            return Err(ChainError::precondition("destination address is empty"));
        }
        if let Self::Stake(StakeTransfer {
            action: StakeAction::Rewards { validators },
            ..
        }) = self
        {
            if validators.iter().any(|v| v.trim().is_empty()) {
                return Err(ChainError::precondition("destination address is empty"));
            }
        }
        if let Self::Token(p) = self {
            if p.asset_id.is_native() {
                return Err(ChainError::precondition(
                    "token transfer requires a token asset id",
                ));
            }
        }
        Ok(())
    }

    /// 上链金额：原生币全额转出或全额委托时需扣除手续费。
    /// TON 通过 send-mode 携带全部余额，不需要扣除。
    pub fn final_amount(&self, fee: &Fee) -> u128 {
        match self {
            Self::Native(p) if p.is_max_amount && p.from.chain != Chain::Ton => {
                p.amount.saturating_sub(fee.amount)
            }
            Self::Stake(p) if p.is_max_amount && matches!(p.action, StakeAction::Delegate { .. }) => {
                p.amount.saturating_sub(fee.amount)
            }
            _ => self.amount(),
        }
    }
}
