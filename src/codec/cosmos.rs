//! Cosmos SDK 交易编码：protobuf TxRaw + SIGN_MODE_DIRECT

use base64::Engine;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::{
    domain::CurveType,
    error::{ChainError, ChainResult},
    infrastructure::KeySigner,
};

const MSG_SEND_TYPE_URL: &str = "/cosmos.bank.v1beta1.MsgSend";
const MSG_DELEGATE_TYPE_URL: &str = "/cosmos.staking.v1beta1.MsgDelegate";
const MSG_UNDELEGATE_TYPE_URL: &str = "/cosmos.staking.v1beta1.MsgUndelegate";
const MSG_REDELEGATE_TYPE_URL: &str = "/cosmos.staking.v1beta1.MsgBeginRedelegate";
const MSG_WITHDRAW_REWARD_TYPE_URL: &str = "/cosmos.distribution.v1beta1.MsgWithdrawDelegatorReward";
const SECP256K1_PUBKEY_TYPE_URL: &str = "/cosmos.crypto.secp256k1.PubKey";
const SIGN_MODE_DIRECT: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CosmosMessage {
    Send {
        from_address: String,
        to_address: String,
        denom: String,
        amount: u128,
    },
    Delegate {
        delegator_address: String,
        validator_address: String,
        denom: String,
        amount: u128,
    },
    Undelegate {
        delegator_address: String,
        validator_address: String,
        denom: String,
        amount: u128,
    },
    Redelegate {
        delegator_address: String,
        validator_src_address: String,
        validator_dst_address: String,
        denom: String,
        amount: u128,
    },
    WithdrawReward {
        delegator_address: String,
        validator_address: String,
    },
    /// 已编码的任意消息（兑换服务提供），value 为 base64 protobuf
    Any { type_url: String, value: String },
}

#[derive(Deserialize)]
struct AnyMessage {
    type_url: String,
    value: String,
}

impl CosmosMessage {
    /// 兑换载荷：单个 `{"type_url", "value"}` 对象或其数组
    pub fn parse_payload(payload: &str) -> ChainResult<Vec<Self>> {
        let value: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| ChainError::precondition(format!("invalid swap payload: {}", e)))?;
        let items = match value {
            serde_json::Value::Array(items) => items,
            single => vec![single],
        };
        items
            .into_iter()
            .map(|item| {
                serde_json::from_value::<AnyMessage>(item)
                    .map(|m| Self::Any {
                        type_url: m.type_url,
                        value: m.value,
                    })
                    .map_err(|e| ChainError::precondition(format!("invalid swap message: {}", e)))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CosmosTransaction {
    pub chain_id: String,
    pub account_number: u64,
    pub sequence: u64,
    pub messages: Vec<CosmosMessage>,
    pub memo: String,
    pub fee_denom: String,
    pub fee_amount: u128,
    pub gas_limit: u64,
}

fn push_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn field_bytes(out: &mut Vec<u8>, field: u32, bytes: &[u8]) {
    push_varint(out, u64::from(field << 3 | 2));
    push_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

fn field_varint(out: &mut Vec<u8>, field: u32, value: u64) {
    if value == 0 {
        return;
    }
    push_varint(out, u64::from(field << 3));
    push_varint(out, value);
}

fn any(type_url: &str, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    field_bytes(&mut out, 1, type_url.as_bytes());
    field_bytes(&mut out, 2, value);
    out
}

fn coin(denom: &str, amount: u128) -> Vec<u8> {
    let mut out = Vec::new();
    field_bytes(&mut out, 1, denom.as_bytes());
    field_bytes(&mut out, 2, amount.to_string().as_bytes());
    out
}

/// MsgDelegate / MsgUndelegate 共用的字段布局
fn delegation(delegator: &str, validator: &str, denom: &str, amount: u128) -> Vec<u8> {
    let mut out = Vec::new();
    field_bytes(&mut out, 1, delegator.as_bytes());
    field_bytes(&mut out, 2, validator.as_bytes());
    field_bytes(&mut out, 3, &coin(denom, amount));
    out
}

fn encode_message(message: &CosmosMessage) -> ChainResult<Vec<u8>> {
    match message {
        CosmosMessage::Send {
            from_address,
            to_address,
            denom,
            amount,
        } => {
            let mut send = Vec::new();
            field_bytes(&mut send, 1, from_address.as_bytes());
            field_bytes(&mut send, 2, to_address.as_bytes());
            field_bytes(&mut send, 3, &coin(denom, *amount));
            Ok(any(MSG_SEND_TYPE_URL, &send))
        }
        CosmosMessage::Delegate {
            delegator_address,
            validator_address,
            denom,
            amount,
        } => Ok(any(
            MSG_DELEGATE_TYPE_URL,
            &delegation(delegator_address, validator_address, denom, *amount),
        )),
        CosmosMessage::Undelegate {
            delegator_address,
            validator_address,
            denom,
            amount,
        } => Ok(any(
            MSG_UNDELEGATE_TYPE_URL,
            &delegation(delegator_address, validator_address, denom, *amount),
        )),
        CosmosMessage::Redelegate {
            delegator_address,
            validator_src_address,
            validator_dst_address,
            denom,
            amount,
        } => {
            let mut redelegate = Vec::new();
            field_bytes(&mut redelegate, 1, delegator_address.as_bytes());
            field_bytes(&mut redelegate, 2, validator_src_address.as_bytes());
            field_bytes(&mut redelegate, 3, validator_dst_address.as_bytes());
            field_bytes(&mut redelegate, 4, &coin(denom, *amount));
            Ok(any(MSG_REDELEGATE_TYPE_URL, &redelegate))
        }
        CosmosMessage::WithdrawReward {
            delegator_address,
            validator_address,
        } => {
            let mut withdraw = Vec::new();
            field_bytes(&mut withdraw, 1, delegator_address.as_bytes());
            field_bytes(&mut withdraw, 2, validator_address.as_bytes());
            Ok(any(MSG_WITHDRAW_REWARD_TYPE_URL, &withdraw))
        }
        CosmosMessage::Any { type_url, value } => {
            let value = base64::engine::general_purpose::STANDARD
                .decode(value)
                .map_err(|e| ChainError::precondition(format!("invalid message bytes: {}", e)))?;
            Ok(any(type_url, &value))
        }
    }
}

pub fn body_bytes(tx: &CosmosTransaction) -> ChainResult<Vec<u8>> {
    if tx.messages.is_empty() {
        return Err(ChainError::precondition("transaction has no messages"));
    }
    let mut body = Vec::new();
    for message in &tx.messages {
        field_bytes(&mut body, 1, &encode_message(message)?);
    }
    if !tx.memo.is_empty() {
        field_bytes(&mut body, 2, tx.memo.as_bytes());
    }
    Ok(body)
}

pub fn auth_info_bytes(tx: &CosmosTransaction, public_key: &[u8]) -> Vec<u8> {
    let mut pubkey = Vec::new();
    field_bytes(&mut pubkey, 1, public_key);

    let mut single = Vec::new();
    field_varint(&mut single, 1, SIGN_MODE_DIRECT);
    let mut mode_info = Vec::new();
    field_bytes(&mut mode_info, 1, &single);

    let mut signer_info = Vec::new();
    field_bytes(&mut signer_info, 1, &any(SECP256K1_PUBKEY_TYPE_URL, &pubkey));
    field_bytes(&mut signer_info, 2, &mode_info);
    field_varint(&mut signer_info, 3, tx.sequence);

    let mut fee = Vec::new();
    field_bytes(&mut fee, 1, &coin(&tx.fee_denom, tx.fee_amount));
    field_varint(&mut fee, 2, tx.gas_limit);

    let mut auth_info = Vec::new();
    field_bytes(&mut auth_info, 1, &signer_info);
    field_bytes(&mut auth_info, 2, &fee);
    auth_info
}

pub fn sign_doc(body: &[u8], auth_info: &[u8], chain_id: &str, account_number: u64) -> Vec<u8> {
    let mut doc = Vec::new();
    field_bytes(&mut doc, 1, body);
    field_bytes(&mut doc, 2, auth_info);
    field_bytes(&mut doc, 3, chain_id.as_bytes());
    field_varint(&mut doc, 4, account_number);
    doc
}

pub fn encode(signer: &dyn KeySigner, tx: &CosmosTransaction, private_key: &[u8]) -> ChainResult<Vec<u8>> {
    let public_key = signer.public_key(CurveType::Secp256k1, private_key)?;
    let body = body_bytes(tx)?;
    let auth_info = auth_info_bytes(tx, &public_key);
    let digest: [u8; 32] = Sha256::digest(sign_doc(&body, &auth_info, &tx.chain_id, tx.account_number)).into();
    let signature = signer.sign(CurveType::Secp256k1, &digest, private_key)?;
    let compact = signature
        .get(..64)
        .ok_or_else(|| ChainError::Signing("unexpected secp256k1 signature length".into()))?;

    let mut raw = Vec::new();
    field_bytes(&mut raw, 1, &body);
    field_bytes(&mut raw, 2, &auth_info);
    field_bytes(&mut raw, 3, compact);
    Ok(raw)
}
