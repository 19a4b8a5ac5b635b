//! chainbridge - 多链钱包的交易预加载 / 签名 / 广播核心
//!
//! 非托管模式：私钥只在签名阶段以 `Zeroizing` 形式短暂存在，不被任何组件保存

pub mod app_state;
pub mod codec;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod metrics;
pub mod service;

// 重新导出常用类型
pub use app_state::AppState;
pub use error::{ChainError, ChainResult};

pub mod prelude {
    pub use crate::{
        app_state::AppState,
        codec::{BuiltinCodec, CryptoCodec, SigningInput},
        config::Config,
        domain::{
            Account, AssetId, Chain, ChainSignData, ChainType, Fee, FeeOption, FeePriority,
            NativeTransfer, SignerParams, SwapTransfer, TokenTransfer, TransactionChanges,
            TransactionState, TransactionStateRequest, TransactionType, TransferParams,
        },
        error::{ChainError, ChainResult},
        infrastructure::{KeySigner, LocalKeySigner},
        service::{
            BroadcastProxy, NodeStatusClientsProxy, SignClientProxy, SignerPreloaderProxy,
            TransactionPipeline, TransactionStatusProxy,
        },
    };
}
