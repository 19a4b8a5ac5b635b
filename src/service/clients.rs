//! 链客户端契约
//!
//! 每条链（或链家族）实现以下能力，并通过 `supported(chain)` 声明自己负责的链：
//! - `SignerPreloader`：读取链上状态，生成 `SignerParams`
//! - `SignClient`：纯函数签名，无网络 I/O
//! - `BroadcastClient` / `TransactionStatusClient` / `NodeStatusClient`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    domain::{
        Account, Chain, ChainSignData, Fee, GenericTransfer, NativeTransfer, SignerParams,
        StakeTransfer, SwapTransfer, TokenApproval, TokenTransfer, TransactionChanges, TransactionStateRequest,
        TransactionType,
    },
    error::{ChainError, ChainResult},
};

/// 预加载：只读网络请求，不产生写操作。未实现的交易类型返回 `UnsupportedOperation`
#[async_trait]
pub trait SignerPreloader: Send + Sync {
    fn supported(&self, chain: Chain) -> bool;

    async fn preload_native_transfer(&self, params: &NativeTransfer) -> ChainResult<SignerParams>;

    async fn preload_token_transfer(&self, params: &TokenTransfer) -> ChainResult<SignerParams> {
        let _ = params;
        Err(ChainError::unsupported("token transfer"))
    }

    async fn preload_swap(&self, params: &SwapTransfer) -> ChainResult<SignerParams> {
        let _ = params;
        Err(ChainError::unsupported("swap"))
    }

    async fn preload_generic(&self, params: &GenericTransfer) -> ChainResult<SignerParams> {
        let _ = params;
        Err(ChainError::unsupported("generic transfer"))
    }

    async fn preload_token_approval(&self, params: &TokenApproval) -> ChainResult<SignerParams> {
        let _ = params;
        Err(ChainError::unsupported("token approval"))
    }

    async fn preload_stake(&self, params: &StakeTransfer) -> ChainResult<SignerParams> {
        let _ = params;
        Err(ChainError::unsupported("stake"))
    }
}

/// 签名：同一输入产生相同输出（TON 未指定过期时间时除外）。
/// 返回一个或多个按顺序广播的已签名载荷
pub trait SignClient: Send + Sync {
    fn supported(&self, chain: Chain) -> bool;

    fn sign_native_transfer(
        &self,
        params: &NativeTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>>;

    fn sign_token_transfer(
        &self,
        params: &TokenTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let _ = (params, chain_data, final_amount, fee, private_key);
        Err(ChainError::unsupported("token transfer"))
    }

    fn sign_swap(
        &self,
        params: &SwapTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let _ = (params, chain_data, final_amount, fee, private_key);
        Err(ChainError::unsupported("swap"))
    }

    fn sign_generic(
        &self,
        params: &GenericTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let _ = (params, chain_data, final_amount, fee, private_key);
        Err(ChainError::unsupported("generic transfer"))
    }

    fn sign_token_approval(
        &self,
        params: &TokenApproval,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let _ = (params, chain_data, final_amount, fee, private_key);
        Err(ChainError::unsupported("token approval"))
    }

    fn sign_stake(
        &self,
        params: &StakeTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let _ = (params, chain_data, final_amount, fee, private_key);
        Err(ChainError::unsupported("stake"))
    }

    fn sign_message(&self, chain: Chain, message: &[u8], private_key: &[u8]) -> ChainResult<Vec<u8>> {
        let _ = (chain, message, private_key);
        Err(ChainError::unsupported("sign_message"))
    }
}

#[async_trait]
pub trait BroadcastClient: Send + Sync {
    fn supported(&self, chain: Chain) -> bool;

    /// 提交已签名载荷，返回交易哈希。链上拒绝为 `BroadcastRejected`
    async fn send(&self, account: &Account, signed: &[u8], tx_type: TransactionType) -> ChainResult<String>;
}

#[async_trait]
pub trait TransactionStatusClient: Send + Sync {
    fn supported(&self, chain: Chain) -> bool;

    /// 单次轮询。节点尚未知晓该哈希时返回 Pending
    async fn get_status(&self, request: &TransactionStateRequest) -> ChainResult<TransactionChanges>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub chain_id: String,
    pub latest_block: u64,
    pub in_sync: bool,
    pub latency_ms: u64,
}

#[async_trait]
pub trait NodeStatusClient: Send + Sync {
    fn supported(&self, chain: Chain) -> bool;

    async fn get_node_status(&self, chain: Chain, url: &str) -> ChainResult<NodeStatus>;
}

/// 从 `ChainSignData` 中取出期望的变体，变体不符时签名前失败
#[macro_export]
macro_rules! expect_chain_data {
    ($data:expr, $variant:ident) => {
        match $data {
            $crate::domain::ChainSignData::$variant(inner) => inner,
            other => {
                return Err($crate::error::ChainError::precondition(format!(
                    "expected {} chain data, got {}",
                    stringify!($variant),
                    other.kind()
                )))
            }
        }
    };
}
