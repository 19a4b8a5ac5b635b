//! 签名信封
//!
//! TON（BOC）、Sui（BCS）、Tron（protobuf）、XRP（binary codec）与 Near（borsh）的最终线格式
//! 由外部编码服务生成。这里输出一个自描述的 JSON 信封：
//! `{"chain", "input", "public_key", "signature"}`，签名覆盖 `input` 的 JSON 字节
//! （ed25519 直接签名，secp256k1 签名其 SHA-256 摘要）。

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    domain::{Chain, CurveType, SuiCoin, TronBlockHeader},
    error::{ChainError, ChainResult},
    infrastructure::KeySigner,
};

// ---------------------------------------------------------------- TON

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JettonTransferBody {
    pub jetton_amount: u128,
    pub to_owner: String,
    pub response_address: String,
    pub forward_amount: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TonMessage {
    pub destination: String,
    pub amount: u128,
    pub mode: u8,
    pub bounceable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jetton_transfer: Option<JettonTransferBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_payload: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TonTransfer {
    pub wallet_version: String,
    pub sequence: u32,
    pub expire_at: u32,
    pub messages: Vec<TonMessage>,
}

// ---------------------------------------------------------------- Sui

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiTransaction {
    pub sender: String,
    pub recipient: String,
    pub amount: u128,
    pub coin_type: String,
    /// 被转出的 coin 对象（原生转账时同时用作 gas）
    pub coins: Vec<SuiCoin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_coin: Option<SuiCoin>,
    pub gas_budget: u64,
    pub gas_price: u64,
    #[serde(default)]
    pub pay_all: bool,
    /// 兑换服务提供的 base64 交易字节
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_bytes: Option<String>,
}

// ---------------------------------------------------------------- Tron

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TronContract {
    TransferContract {
        to_address: String,
        amount: u64,
    },
    TriggerSmartContract {
        contract_address: String,
        /// 十六进制调用数据
        data: String,
        call_value: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TronTransaction {
    pub owner_address: String,
    pub contract: TronContract,
    pub block: TronBlockHeader,
    pub fee_limit: u64,
    pub timestamp: u64,
    pub expiration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

// ---------------------------------------------------------------- XRP

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum XrpAmount {
    Drops(String),
    Issued {
        currency: String,
        issuer: String,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XrpTransaction {
    pub account: String,
    pub destination: String,
    pub amount: XrpAmount,
    pub fee: String,
    pub sequence: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ledger_sequence: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_tag: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

// ---------------------------------------------------------------- Near

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NearAction {
    Transfer {
        deposit: String,
    },
    FunctionCall {
        method_name: String,
        /// JSON 参数
        args: String,
        gas: u64,
        deposit: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NearTransaction {
    pub signer_id: String,
    pub receiver_id: String,
    pub nonce: u64,
    pub block_hash: String,
    pub actions: Vec<NearAction>,
}

// ---------------------------------------------------------------- envelope

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope<T> {
    pub chain: Chain,
    pub input: T,
    pub public_key: String,
    pub signature: String,
}

fn signing_bytes(curve: CurveType, payload: &[u8]) -> Vec<u8> {
    match curve {
        CurveType::Ed25519 => payload.to_vec(),
        CurveType::Secp256k1 => Sha256::digest(payload).to_vec(),
    }
}

pub fn seal<T: Serialize>(
    signer: &dyn KeySigner,
    chain: Chain,
    input: &T,
    private_key: &[u8],
) -> ChainResult<Vec<u8>> {
    let curve = chain.curve();
    let payload = serde_json::to_vec(input)
        .map_err(|e| ChainError::precondition(format!("failed to serialize input: {}", e)))?;
    let signature = signer.sign(curve, &signing_bytes(curve, &payload), private_key)?;
    let public_key = signer.public_key(curve, private_key)?;

    let envelope = SignedEnvelope {
        chain,
        input,
        public_key: hex::encode(public_key),
        signature: hex::encode(signature),
    };
    serde_json::to_vec(&envelope)
        .map_err(|e| ChainError::precondition(format!("failed to serialize envelope: {}", e)))
}

/// 解析信封并校验链标识
pub fn open<T: DeserializeOwned>(chain: Chain, raw: &[u8]) -> ChainResult<SignedEnvelope<T>> {
    let envelope: SignedEnvelope<T> = serde_json::from_slice(raw)?;
    if envelope.chain != chain {
        return Err(ChainError::precondition(format!(
            "envelope for {} cannot be used on {}",
            envelope.chain, chain
        )));
    }
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::Verifier;

    use super::*;
    use crate::infrastructure::LocalKeySigner;

    fn ton_transfer() -> TonTransfer {
        TonTransfer {
            wallet_version: "v4r2".into(),
            sequence: 7,
            expire_at: 1_700_000_600,
            messages: vec![TonMessage {
                destination: "UQB".into(),
                amount: 1_000_000_000,
                mode: 3,
                bounceable: false,
                comment: Some("hi".into()),
                jetton_transfer: None,
                custom_payload: None,
            }],
        }
    }

    /// Test 1: 信封签名可用公钥验证
    #[test]
    fn test_seal_and_verify() {
        let key = [4u8; 32];
        let raw = seal(&LocalKeySigner, Chain::Ton, &ton_transfer(), &key).unwrap();
        let envelope: SignedEnvelope<TonTransfer> = open(Chain::Ton, &raw).unwrap();
        assert_eq!(envelope.input, ton_transfer());

        let public: [u8; 32] = hex::decode(&envelope.public_key).unwrap().try_into().unwrap();
        let signature: [u8; 64] = hex::decode(&envelope.signature).unwrap().try_into().unwrap();
        let verifying = ed25519_dalek::VerifyingKey::from_bytes(&public).unwrap();
        let payload = serde_json::to_vec(&envelope.input).unwrap();
        assert!(verifying
            .verify(&payload, &ed25519_dalek::Signature::from_bytes(&signature))
            .is_ok());
    }

    #[test]
    fn test_open_rejects_other_chain() {
        let raw = seal(&LocalKeySigner, Chain::Ton, &ton_transfer(), &[4u8; 32]).unwrap();
        assert!(open::<TonTransfer>(Chain::Sui, &raw).is_err());
    }

    #[test]
    fn test_secp_chain_signs_digest() {
        let tx = XrpTransaction {
            account: "rSender".into(),
            destination: "rDest".into(),
            amount: XrpAmount::Drops("1000".into()),
            fee: "12".into(),
            sequence: 3,
            last_ledger_sequence: Some(100),
            destination_tag: Some(42),
            memo: None,
        };
        let raw = seal(&LocalKeySigner, Chain::Xrp, &tx, &[4u8; 32]).unwrap();
        let envelope: SignedEnvelope<XrpTransaction> = open(Chain::Xrp, &raw).unwrap();
        assert_eq!(hex::decode(envelope.signature).unwrap().len(), 65);
        assert_eq!(envelope.input.destination_tag, Some(42));
    }
}
