//! 每条链签名所需的链上状态
//!
//! `ChainSignData` 是按链家族划分的和类型，由 Preloader 为单次签名构建，
//! 不得缓存复用（sequence / nonce 会前进）。SignClient 必须穷尽匹配自己期望的变体。

use serde::{Deserialize, Serialize};

use super::{Fee, FeePriority, TransferParams};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinUtxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
}

/// fees 中 gas.max_gas_price 为 sat/vB，gas.limit 为预估 vbytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinChainData {
    pub utxos: Vec<BitcoinUtxo>,
    pub fees: Vec<Fee>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmChainData {
    pub chain_id: u64,
    pub nonce: u64,
    pub fees: Vec<Fee>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TonChainData {
    pub sequence: u32,
    /// 发送方 jetton 子钱包地址，仅代币转账存在
    pub jetton_wallet_address: Option<String>,
    /// 消息过期时间（unix 秒）；为空时签名时取 now + TTL
    pub expire_at: Option<u32>,
    pub fee: Fee,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosmosChainData {
    pub chain_id: String,
    pub account_number: u64,
    pub sequence: u64,
    pub fee: Fee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolanaTokenProgram {
    Token,
    Token2022,
}

impl SolanaTokenProgram {
    pub fn program_id(&self) -> &'static str {
        match self {
            Self::Token => "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA",
            Self::Token2022 => "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb",
        }
    }

    pub fn from_program_id(id: &str) -> Option<Self> {
        match id {
            "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA" => Some(Self::Token),
            "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb" => Some(Self::Token2022),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolanaChainData {
    pub recent_blockhash: String,
    pub sender_token_address: Option<String>,
    pub recipient_token_address: Option<String>,
    pub token_program: SolanaTokenProgram,
    /// 代币精度，`TransferChecked` 需要
    #[serde(default)]
    pub token_decimals: Option<u8>,
    pub fees: Vec<Fee>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AptosChainData {
    pub sequence: u64,
    pub fees: Vec<Fee>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiCoin {
    pub coin_type: String,
    pub object_id: String,
    pub version: u64,
    pub digest: String,
    pub balance: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiChainData {
    /// 转出资产的 coin 对象
    pub coins: Vec<SuiCoin>,
    /// 代币转账时用于支付 gas 的 SUI 对象
    pub gas_coin: Option<SuiCoin>,
    pub fee: Fee,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TronBlockHeader {
    pub number: u64,
    pub version: u32,
    pub tx_trie_root: String,
    pub witness_address: String,
    pub parent_hash: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TronChainData {
    pub block: TronBlockHeader,
    pub fee: Fee,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XrpChainData {
    pub sequence: u32,
    pub last_ledger_sequence: Option<u32>,
    pub fee: Fee,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NearChainData {
    /// 下一个 access key nonce
    pub nonce: u64,
    pub block_hash: String,
    pub fee: Fee,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainSignData {
    Bitcoin(BitcoinChainData),
    Evm(EvmChainData),
    Ton(TonChainData),
    Cosmos(CosmosChainData),
    Solana(SolanaChainData),
    Aptos(AptosChainData),
    Sui(SuiChainData),
    Tron(TronChainData),
    Xrp(XrpChainData),
    Near(NearChainData),
}

fn pick(fees: &[Fee], priority: FeePriority) -> Option<&Fee> {
    fees.iter()
        .find(|f| f.priority == priority)
        .or_else(|| fees.first())
}

impl ChainSignData {
    /// 指定档位的手续费，缺失时退回第一个档位
    pub fn fee(&self, priority: FeePriority) -> Option<&Fee> {
        match self {
            Self::Bitcoin(d) => pick(&d.fees, priority),
            Self::Evm(d) => pick(&d.fees, priority),
            Self::Solana(d) => pick(&d.fees, priority),
            Self::Aptos(d) => pick(&d.fees, priority),
            Self::Ton(d) => Some(&d.fee),
            Self::Cosmos(d) => Some(&d.fee),
            Self::Sui(d) => Some(&d.fee),
            Self::Tron(d) => Some(&d.fee),
            Self::Xrp(d) => Some(&d.fee),
            Self::Near(d) => Some(&d.fee),
        }
    }

    pub fn all_fees(&self) -> Vec<&Fee> {
        match self {
            Self::Bitcoin(d) => d.fees.iter().collect(),
            Self::Evm(d) => d.fees.iter().collect(),
            Self::Solana(d) => d.fees.iter().collect(),
            Self::Aptos(d) => d.fees.iter().collect(),
            Self::Ton(d) => vec![&d.fee],
            Self::Cosmos(d) => vec![&d.fee],
            Self::Sui(d) => vec![&d.fee],
            Self::Tron(d) => vec![&d.fee],
            Self::Xrp(d) => vec![&d.fee],
            Self::Near(d) => vec![&d.fee],
        }
    }

    /// 账户模型链的 sequence / nonce
    pub fn sequence(&self) -> Option<u64> {
        match self {
            Self::Evm(d) => Some(d.nonce),
            Self::Ton(d) => Some(u64::from(d.sequence)),
            Self::Cosmos(d) => Some(d.sequence),
            Self::Aptos(d) => Some(d.sequence),
            Self::Xrp(d) => Some(u64::from(d.sequence)),
            Self::Near(d) => Some(d.nonce),
            Self::Bitcoin(_) | Self::Solana(_) | Self::Sui(_) | Self::Tron(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bitcoin(_) => "bitcoin",
            Self::Evm(_) => "evm",
            Self::Ton(_) => "ton",
            Self::Cosmos(_) => "cosmos",
            Self::Solana(_) => "solana",
            Self::Aptos(_) => "aptos",
            Self::Sui(_) => "sui",
            Self::Tron(_) => "tron",
            Self::Xrp(_) => "xrp",
            Self::Near(_) => "near",
        }
    }
}

/// Preloader 交给 SignClient 的不可变契约
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerParams {
    pub input: TransferParams,
    pub chain_data: ChainSignData,
}

impl SignerParams {
    pub fn new(input: TransferParams, chain_data: ChainSignData) -> Self {
        Self { input, chain_data }
    }

    pub fn fee(&self, priority: FeePriority) -> Option<&Fee> {
        self.chain_data.fee(priority)
    }
}
