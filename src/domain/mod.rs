//! Domain 模块
//!
//! 链抽象层的数据模型：链标识、账户、交易描述、手续费、签名数据与交易状态

pub mod account;
pub mod chain_config;
pub mod fee;
pub mod sign_data;
pub mod transaction_status;
pub mod transfer;

// 重新导出常用类型
pub use account::{mask_address, Account, AssetId};
pub use chain_config::{Chain, ChainType, CurveType};
pub use fee::{Fee, FeeOption, FeePriority, GasFee};
pub use sign_data::{
    AptosChainData, BitcoinChainData, BitcoinUtxo, ChainSignData, CosmosChainData, EvmChainData,
    NearChainData, SignerParams, SolanaChainData, SolanaTokenProgram, SuiChainData, SuiCoin,
    TonChainData, TronBlockHeader, TronChainData, XrpChainData,
};
pub use transaction_status::{
    HashChange, TransactionChanges, TransactionState, TransactionStateRequest,
};
pub use transfer::{
    GenericTransfer, NativeTransfer, StakeAction, StakeTransfer, SwapApproval, SwapTransfer,
    TokenApproval, TokenTransfer, TransactionType, TransferParams, TRANSFER_SWAP_PROVIDERS,
};
