//! 交易编码器（CryptoCodec）
//!
//! SignClient 只负责把 `TransferParams + ChainSignData` 翻译成不可变的
//! `SigningInput`，序列化与签名交给 `CryptoCodec`。
//!
//! `BuiltinCodec` 内置了 EVM（EIP-1559）、UTXO（P2WPKH / P2PKH）、Solana（legacy message）、
//! Aptos（BCS）与 Cosmos（protobuf TxRaw）的线格式；TON / Sui / Tron / XRP / Near
//! 输出签名信封（见 `envelope`），由外部编码服务转换为最终线格式。

use std::sync::Arc;

use crate::{
    domain::{Chain, CurveType},
    error::{ChainError, ChainResult},
    infrastructure::KeySigner,
};

pub mod aptos;
pub mod cosmos;
pub mod envelope;
pub mod evm;
pub mod solana;
pub mod utxo;

pub use self::aptos::{AptosEntryFunction, AptosTransaction};
pub use self::cosmos::{CosmosMessage, CosmosTransaction};
pub use self::envelope::{
    JettonTransferBody, NearAction, NearTransaction, SignedEnvelope, SuiTransaction, TonMessage,
    TonTransfer, TronContract, TronTransaction, XrpAmount, XrpTransaction,
};
pub use self::evm::EvmTransaction;
pub use self::solana::{SolanaAccountMeta, SolanaInstruction, SolanaTransaction};
pub use self::utxo::{BitcoinOutput, BitcoinTransaction};

/// 单笔待签名交易，按链家族区分
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningInput {
    Evm(EvmTransaction),
    Bitcoin(BitcoinTransaction),
    Solana(SolanaTransaction),
    /// 外部构造好的 Solana message，原样签名
    SolanaMessage(Vec<u8>),
    Aptos(AptosTransaction),
    Cosmos(CosmosTransaction),
    Ton(TonTransfer),
    Sui(SuiTransaction),
    Tron(TronTransaction),
    Xrp(XrpTransaction),
    Near(NearTransaction),
}

impl SigningInput {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Evm(_) => "evm",
            Self::Bitcoin(_) => "bitcoin",
            Self::Solana(_) | Self::SolanaMessage(_) => "solana",
            Self::Aptos(_) => "aptos",
            Self::Cosmos(_) => "cosmos",
            Self::Ton(_) => "ton",
            Self::Sui(_) => "sui",
            Self::Tron(_) => "tron",
            Self::Xrp(_) => "xrp",
            Self::Near(_) => "near",
        }
    }
}

pub trait CryptoCodec: Send + Sync {
    /// 序列化并签名，返回可直接广播的字节
    fn encode(&self, input: &SigningInput, private_key: &[u8]) -> ChainResult<Vec<u8>>;

    /// 链特定的消息签名（EVM 为 EIP-191 personal_sign）
    fn sign_message(&self, chain: Chain, message: &[u8], private_key: &[u8]) -> ChainResult<Vec<u8>> {
        let _ = (chain, message, private_key);
        Err(ChainError::unsupported("sign_message"))
    }
}

pub struct BuiltinCodec {
    signer: Arc<dyn KeySigner>,
}

impl BuiltinCodec {
    pub fn new(signer: Arc<dyn KeySigner>) -> Self {
        Self { signer }
    }
}

impl CryptoCodec for BuiltinCodec {
    fn encode(&self, input: &SigningInput, private_key: &[u8]) -> ChainResult<Vec<u8>> {
        let signer = self.signer.as_ref();
        match input {
            SigningInput::Evm(tx) => evm::encode(signer, tx, private_key),
            SigningInput::Bitcoin(tx) => utxo::encode(signer, tx, private_key),
            SigningInput::Solana(tx) => solana::encode(signer, tx, private_key),
            SigningInput::SolanaMessage(message) => solana::sign_message_bytes(signer, message, private_key),
            SigningInput::Aptos(tx) => aptos::encode(signer, tx, private_key),
            SigningInput::Cosmos(tx) => cosmos::encode(signer, tx, private_key),
            SigningInput::Ton(tx) => envelope::seal(signer, Chain::Ton, tx, private_key),
            SigningInput::Sui(tx) => envelope::seal(signer, Chain::Sui, tx, private_key),
            SigningInput::Tron(tx) => envelope::seal(signer, Chain::Tron, tx, private_key),
            SigningInput::Xrp(tx) => envelope::seal(signer, Chain::Xrp, tx, private_key),
            SigningInput::Near(tx) => envelope::seal(signer, Chain::Near, tx, private_key),
        }
    }

    fn sign_message(&self, chain: Chain, message: &[u8], private_key: &[u8]) -> ChainResult<Vec<u8>> {
        match chain.curve() {
            CurveType::Secp256k1 if chain.evm_chain_id().is_some() => {
                evm::personal_sign(self.signer.as_ref(), message, private_key)
            }
            CurveType::Ed25519 => self.signer.sign(CurveType::Ed25519, message, private_key),
            CurveType::Secp256k1 => Err(ChainError::unsupported("sign_message")),
        }
    }
}

/// 0x 前缀可选的十六进制解码
pub(crate) fn decode_hex(value: &str) -> ChainResult<Vec<u8>> {
    let trimmed = value.trim();
    let stripped = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(stripped).map_err(|e| ChainError::precondition(format!("invalid hex: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::LocalKeySigner;

    #[test]
    fn test_decode_hex_accepts_prefix() {
        assert_eq!(decode_hex("0x0a0B").unwrap(), vec![0x0a, 0x0b]);
        assert_eq!(decode_hex("ff").unwrap(), vec![0xff]);
        assert!(decode_hex("0xzz").is_err());
    }

    #[test]
    fn test_sign_message_dispatch() {
        let codec = BuiltinCodec::new(Arc::new(LocalKeySigner));
        let key = [3u8; 32];
        assert_eq!(codec.sign_message(Chain::Base, b"hi", &key).unwrap().len(), 65);
        assert_eq!(codec.sign_message(Chain::Solana, b"hi", &key).unwrap().len(), 64);
        assert!(matches!(
            codec.sign_message(Chain::Bitcoin, b"hi", &key),
            Err(ChainError::UnsupportedOperation { .. })
        ));
    }
}
