//! Aptos 交易编码（BCS）
//!
//! 签名消息为 `sha3_256("APTOS::RawTransaction") || bcs(RawTransaction)`，
//! 输出 BCS 编码的 SignedTransaction（Ed25519 authenticator）。

use sha3::{Digest, Sha3_256};

use super::decode_hex;
use crate::{
    domain::CurveType,
    error::{ChainError, ChainResult},
    infrastructure::KeySigner,
};

const RAW_TRANSACTION_SALT: &[u8] = b"APTOS::RawTransaction";
const PAYLOAD_ENTRY_FUNCTION: u32 = 2;
const AUTHENTICATOR_ED25519: u32 = 0;
const TYPE_TAG_STRUCT: u32 = 7;

/// entry function 参数均为已 BCS 编码的字节
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AptosEntryFunction {
    pub module_address: String,
    pub module_name: String,
    pub function: String,
    /// 形如 `0x1::aptos_coin::AptosCoin`
    pub type_arguments: Vec<String>,
    pub arguments: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AptosTransaction {
    pub sender: String,
    pub sequence_number: u64,
    pub payload: AptosEntryFunction,
    pub max_gas_amount: u64,
    pub gas_unit_price: u64,
    pub expiration_timestamp_secs: u64,
    pub chain_id: u8,
}

impl AptosEntryFunction {
    /// `0x1::aptos_account::transfer(to, amount)`
    pub fn native_transfer(to: &str, amount: u64) -> ChainResult<Self> {
        Ok(Self {
            module_address: "0x1".into(),
            module_name: "aptos_account".into(),
            function: "transfer".into(),
            type_arguments: vec![],
            arguments: vec![bcs_address(to)?.to_vec(), amount.to_le_bytes().to_vec()],
        })
    }

    /// coin 标准代币：`0x1::aptos_account::transfer_coins<T>(to, amount)`；
    /// fungible asset：`0x1::primary_fungible_store::transfer<Metadata>(metadata, to, amount)`
    pub fn token_transfer(token_id: &str, to: &str, amount: u64) -> ChainResult<Self> {
        if token_id.contains("::") {
            Ok(Self {
                module_address: "0x1".into(),
                module_name: "aptos_account".into(),
                function: "transfer_coins".into(),
                type_arguments: vec![token_id.to_string()],
                arguments: vec![bcs_address(to)?.to_vec(), amount.to_le_bytes().to_vec()],
            })
        } else {
            Ok(Self {
                module_address: "0x1".into(),
                module_name: "primary_fungible_store".into(),
                function: "transfer".into(),
                type_arguments: vec!["0x1::fungible_asset::Metadata".into()],
                arguments: vec![
                    bcs_address(token_id)?.to_vec(),
                    bcs_address(to)?.to_vec(),
                    amount.to_le_bytes().to_vec(),
                ],
            })
        }
    }

    /// 兑换服务给出的 JSON entry function：
    /// `{"function": "0x..::module::name", "type_arguments": [...], "arguments": [...]}`。
    /// 参数按形态编码：`0x` 开头的 64 位十六进制为 address，数字字符串为 u64，布尔值为 bool，
    /// 其余字符串按 BCS string 编码，数组为 vector。
    pub fn from_json_payload(payload: &str) -> ChainResult<Self> {
        let value: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| ChainError::precondition(format!("invalid swap payload: {}", e)))?;
        let function = value["function"]
            .as_str()
            .ok_or_else(|| ChainError::precondition("swap payload has no function"))?;
        let mut parts = function.split("::");
        let (Some(address), Some(module), Some(name), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ChainError::precondition(format!("invalid function id {}", function)));
        };
        let type_arguments = value["type_arguments"]
            .as_array()
            .map(|a| a.iter().filter_map(|t| t.as_str().map(String::from)).collect())
            .unwrap_or_default();
        let arguments = value["arguments"]
            .as_array()
            .map(|a| a.iter().map(json_argument).collect::<ChainResult<Vec<_>>>())
            .transpose()?
            .unwrap_or_default();
        Ok(Self {
            module_address: address.into(),
            module_name: module.into(),
            function: name.into(),
            type_arguments,
            arguments,
        })
    }
}

fn json_argument(value: &serde_json::Value) -> ChainResult<Vec<u8>> {
    use serde_json::Value;
    match value {
        Value::Bool(b) => Ok(vec![u8::from(*b)]),
        Value::Number(n) => n
            .as_u64()
            .map(|v| v.to_le_bytes().to_vec())
            .ok_or_else(|| ChainError::precondition(format!("unsupported number argument {}", n))),
        Value::String(s) if s.starts_with("0x") && s.len() > 2 && s.len() <= 66 => {
            Ok(bcs_address(s)?.to_vec())
        }
        Value::String(s) if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) => s
            .parse::<u64>()
            .map(|v| v.to_le_bytes().to_vec())
            .map_err(|e| ChainError::precondition(format!("invalid integer argument: {}", e))),
        Value::String(s) => {
            let mut out = Vec::new();
            push_bytes(&mut out, s.as_bytes());
            Ok(out)
        }
        Value::Array(items) => {
            let mut out = Vec::new();
            push_uleb128(&mut out, items.len() as u32);
            for item in items {
                out.extend_from_slice(&json_argument(item)?);
            }
            Ok(out)
        }
        other => Err(ChainError::precondition(format!("unsupported argument {}", other))),
    }
}

/// 32 字节账户地址，短地址左侧补零
pub fn bcs_address(address: &str) -> ChainResult<[u8; 32]> {
    let hex_part = address.trim().trim_start_matches("0x");
    if hex_part.is_empty() || hex_part.len() > 64 {
        return Err(ChainError::precondition(format!("invalid Aptos address {}", address)));
    }
    let padded = format!("{:0>64}", hex_part);
    let bytes = decode_hex(&padded)?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn push_uleb128(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn push_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    push_uleb128(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

fn push_struct_tag(out: &mut Vec<u8>, tag: &str) -> ChainResult<()> {
    let mut parts = tag.split("::");
    let (Some(address), Some(module), Some(name), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ChainError::precondition(format!("unsupported type argument {}", tag)));
    };
    push_uleb128(out, TYPE_TAG_STRUCT);
    out.extend_from_slice(&bcs_address(address)?);
    push_bytes(out, module.as_bytes());
    push_bytes(out, name.as_bytes());
    push_uleb128(out, 0);
    Ok(())
}

pub fn serialize_raw(tx: &AptosTransaction) -> ChainResult<Vec<u8>> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(&bcs_address(&tx.sender)?);
    out.extend_from_slice(&tx.sequence_number.to_le_bytes());

    let payload = &tx.payload;
    push_uleb128(&mut out, PAYLOAD_ENTRY_FUNCTION);
    out.extend_from_slice(&bcs_address(&payload.module_address)?);
    push_bytes(&mut out, payload.module_name.as_bytes());
    push_bytes(&mut out, payload.function.as_bytes());
    push_uleb128(&mut out, payload.type_arguments.len() as u32);
    for tag in &payload.type_arguments {
        push_struct_tag(&mut out, tag)?;
    }
    push_uleb128(&mut out, payload.arguments.len() as u32);
    for argument in &payload.arguments {
        push_bytes(&mut out, argument);
    }

    out.extend_from_slice(&tx.max_gas_amount.to_le_bytes());
    out.extend_from_slice(&tx.gas_unit_price.to_le_bytes());
    out.extend_from_slice(&tx.expiration_timestamp_secs.to_le_bytes());
    out.push(tx.chain_id);
    Ok(out)
}

pub fn signing_message(raw: &[u8]) -> Vec<u8> {
    let mut message = Sha3_256::digest(RAW_TRANSACTION_SALT).to_vec();
    message.extend_from_slice(raw);
    message
}

pub fn encode(signer: &dyn KeySigner, tx: &AptosTransaction, private_key: &[u8]) -> ChainResult<Vec<u8>> {
    let raw = serialize_raw(tx)?;
    let signature = signer.sign(CurveType::Ed25519, &signing_message(&raw), private_key)?;
    let public_key = signer.public_key(CurveType::Ed25519, private_key)?;

    let mut out = raw;
    push_uleb128(&mut out, AUTHENTICATOR_ED25519);
    push_bytes(&mut out, &public_key);
    push_bytes(&mut out, &signature);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::LocalKeySigner;

    #[test]
    fn test_uleb128() {
        let mut out = vec![];
        push_uleb128(&mut out, 127);
        push_uleb128(&mut out, 128);
        push_uleb128(&mut out, 300);
        assert_eq!(out, vec![0x7f, 0x80, 0x01, 0xac, 0x02]);
    }

    #[test]
    fn test_short_address_is_left_padded() {
        let addr = bcs_address("0x1").unwrap();
        assert_eq!(addr[31], 1);
        assert!(addr[..31].iter().all(|b| *b == 0));
        assert!(bcs_address("0x").is_err());
    }

    /// Test 1: 原生转账的 RawTransaction 布局
    #[test]
    fn test_native_transfer_layout() {
        let tx = AptosTransaction {
            sender: "0x80c3cca35602e4568a7ac88d4d91110f8efa6c45c659439c2b4ed04033059c6f".into(),
            sequence_number: 8,
            payload: AptosEntryFunction::native_transfer(
                "0xd7257c62806cea85fc8eaf947377b672fe062b81e6c0b19b6d8a3f408e59cf8c",
                10_000,
            )
            .unwrap(),
            max_gas_amount: 1500,
            gas_unit_price: 150,
            expiration_timestamp_secs: 1_700_000_000,
            chain_id: 1,
        };
        let raw = serialize_raw(&tx).unwrap();
        assert_eq!(&raw[32..40], &8u64.to_le_bytes());
        assert_eq!(raw[40], 2);
        assert_eq!(*raw.last().unwrap(), 1);

        let signed = encode(&LocalKeySigner, &tx, &[5u8; 32]).unwrap();
        // raw + variant(1) + len(1) + pk(32) + len(1) + sig(64)
        assert_eq!(signed.len(), raw.len() + 99);
        assert_eq!(&signed[..raw.len()], raw.as_slice());
    }

    #[test]
    fn test_json_payload_arguments() {
        let payload = r#"{
            "function": "0x1::router::swap_exact_input",
            "type_arguments": ["0x1::aptos_coin::AptosCoin"],
            "arguments": ["1000", "0xa", true, ["1", "2"]]
        }"#;
        let function = AptosEntryFunction::from_json_payload(payload).unwrap();
        assert_eq!(function.module_name, "router");
        assert_eq!(function.arguments[0], 1000u64.to_le_bytes().to_vec());
        assert_eq!(function.arguments[1].len(), 32);
        assert_eq!(function.arguments[2], vec![1]);
        assert_eq!(function.arguments[3][0], 2);
        assert!(AptosEntryFunction::from_json_payload(r#"{"function":"bad"}"#).is_err());
    }

    #[test]
    fn test_token_transfer_variants() {
        let coin = AptosEntryFunction::token_transfer("0x1::usdc::USDC", "0x2", 5).unwrap();
        assert_eq!(coin.function, "transfer_coins");
        let fa = AptosEntryFunction::token_transfer("0xbae", "0x2", 5).unwrap();
        assert_eq!(fa.module_name, "primary_fungible_store");
        assert_eq!(fa.arguments.len(), 3);
    }
}
