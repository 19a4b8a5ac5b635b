//! 链抽象层统一错误定义
//!
//! 所有 Preloader / SignClient / Broadcast / Status 客户端都返回 `ChainError`，
//! 调用方据此区分"账户不存在"、"网络不可用"与"链上拒绝"等情况。

use thiserror::Error;

use crate::domain::Chain;

pub type ChainResult<T> = Result<T, ChainError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// 账户在链上尚不存在（部分链可将 sequence 视为 0）
    #[error("account not found: {address}")]
    AccountNotFound { chain: Chain, address: String },

    /// 传输层失败（连接失败、超时、DNS 等），可重试
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// 节点返回服务端错误（5xx / 429），可重试
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// 构建交易所需的链上数据缺失（例如 jetton 子钱包地址无法解析）
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// 交易描述不合法，签名前即拒绝
    #[error("encoding precondition failed: {0}")]
    EncodingPrecondition(String),

    /// 链上拒绝（mempool 拒绝、手续费不足等），原样保留链上消息
    #[error("{message}")]
    BroadcastRejected { chain: Chain, message: String },

    /// 查询未知交易哈希
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    /// 节点返回了无法解析的数据，或 RPC 层业务错误
    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("chain not supported: {0}")]
    UnsupportedChain(Chain),

    #[error("{operation} is not supported for this chain")]
    UnsupportedOperation { operation: &'static str },

    /// 注册表/配置错误，构建时立即失败
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

impl ChainError {
    pub fn account_not_found(chain: Chain, address: impl Into<String>) -> Self {
        Self::AccountNotFound {
            chain,
            address: address.into(),
        }
    }

    pub fn rejected(chain: Chain, message: impl Into<String>) -> Self {
        Self::BroadcastRejected {
            chain,
            message: message.into(),
        }
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::EncodingPrecondition(msg.into())
    }

    pub fn insufficient(msg: impl Into<String>) -> Self {
        Self::InsufficientData(msg.into())
    }

    pub fn rpc(msg: impl Into<String>) -> Self {
        Self::Rpc(msg.into())
    }

    pub fn unsupported(operation: &'static str) -> Self {
        Self::UnsupportedOperation { operation }
    }

    /// 是否可以由调用方退避重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkUnavailable(_) | Self::ServiceUnavailable(_)
        )
    }

    /// 稳定的错误码，用于日志与指标
    pub fn code(&self) -> &'static str {
        match self {
            Self::AccountNotFound { .. } => "account_not_found",
            Self::NetworkUnavailable(_) => "network_unavailable",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::InsufficientData(_) => "insufficient_data",
            Self::EncodingPrecondition(_) => "encoding_precondition",
            Self::BroadcastRejected { .. } => "broadcast_rejected",
            Self::TransactionNotFound(_) => "transaction_not_found",
            Self::Rpc(_) => "rpc_error",
            Self::UnsupportedChain(_) => "chain_not_supported",
            Self::UnsupportedOperation { .. } => "operation_not_supported",
            Self::Configuration(_) => "configuration_error",
            Self::Signing(_) => "signing_failed",
        }
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Rpc(format!("failed to decode response: {}", err));
        }
        if let Some(status) = err.status() {
            if status.is_server_error() || status.as_u16() == 429 {
                return Self::ServiceUnavailable(format!("HTTP {}", status));
            }
            return Self::Rpc(format!("HTTP {}", status));
        }
        Self::NetworkUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Rpc(format!("invalid JSON: {}", err))
    }
}

impl From<tokio::task::JoinError> for ChainError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Signing(format!("worker task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ChainError::NetworkUnavailable("timeout".into()).is_retryable());
        assert!(ChainError::ServiceUnavailable("HTTP 503".into()).is_retryable());
        assert!(!ChainError::account_not_found(Chain::Aptos, "0x1").is_retryable());
        assert!(!ChainError::rejected(Chain::Ton, "low fee").is_retryable());
        assert!(!ChainError::precondition("missing destination").is_retryable());
    }

    #[test]
    fn test_rejected_message_is_verbatim() {
        let err = ChainError::rejected(Chain::Cosmos, "insufficient fees; got: 10uatom");
        assert_eq!(err.to_string(), "insufficient fees; got: 10uatom");
        assert_eq!(err.code(), "broadcast_rejected");
    }

    #[test]
    fn test_codes_are_snake_case() {
        let errors = [
            ChainError::InsufficientData("x".into()),
            ChainError::TransactionNotFound("0x".into()),
            ChainError::UnsupportedChain(Chain::Near),
            ChainError::unsupported("swap"),
            ChainError::Configuration("dup".into()),
        ];
        for err in errors {
            assert!(err
                .code()
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
