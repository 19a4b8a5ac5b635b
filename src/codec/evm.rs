//! EVM 交易编码：EIP-1559（type 2）与 EIP-191 消息签名

use rlp::{Rlp, RlpStream};
use sha3::{Digest, Keccak256};

use super::decode_hex;
use crate::{
    domain::CurveType,
    error::{ChainError, ChainResult},
    infrastructure::KeySigner,
};

pub const EIP1559_TX_TYPE: u8 = 0x02;
pub const NATIVE_TRANSFER_GAS: u128 = 21_000;

const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
const APPROVE_SELECTOR: [u8; 4] = [0x09, 0x5e, 0xa7, 0xb3];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: u128,
    pub max_fee_per_gas: u128,
    pub gas_limit: u128,
    pub to: [u8; 20],
    pub value: u128,
    pub data: Vec<u8>,
}

/// 解码后的已签名交易
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvmTransaction {
    pub tx: EvmTransaction,
    pub y_parity: u8,
    pub r: Vec<u8>,
    pub s: Vec<u8>,
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

pub fn parse_address(address: &str) -> ChainResult<[u8; 20]> {
    let bytes = decode_hex(address)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| ChainError::precondition(format!("invalid EVM address: {}", address)))
}

fn word(value: u128) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[16..].copy_from_slice(&value.to_be_bytes());
    out
}

fn address_word(address: &[u8; 20]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(address);
    out
}

/// `transfer(address,uint256)` 调用数据
pub fn erc20_transfer_data(to: &[u8; 20], amount: u128) -> Vec<u8> {
    let mut data = TRANSFER_SELECTOR.to_vec();
    data.extend_from_slice(&address_word(to));
    data.extend_from_slice(&word(amount));
    data
}

/// `approve(address,uint256)` 调用数据，授权额度为 uint256 最大值
pub fn erc20_approve_data(spender: &[u8; 20]) -> Vec<u8> {
    let mut data = APPROVE_SELECTOR.to_vec();
    data.extend_from_slice(&address_word(spender));
    data.extend_from_slice(&[0xff; 32]);
    data
}

/// 从 68 字节的 `transfer(address,uint256)` 调用数据中取出收款地址
pub fn transfer_recipient(call_data: &[u8]) -> ChainResult<String> {
    Ok(format!("0x{}", hex::encode(transfer_recipient_bytes(call_data)?)))
}

/// `transfer(address,uint256)` 调用数据中的 20 字节收款地址
pub fn transfer_recipient_bytes(call_data: &[u8]) -> ChainResult<[u8; 20]> {
    if call_data.len() != 68 || call_data[..4] != TRANSFER_SELECTOR {
        return Err(ChainError::precondition("invalid call data"));
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&call_data[16..36]);
    Ok(out)
}

fn append_fields(stream: &mut RlpStream, tx: &EvmTransaction) {
    stream
        .append(&tx.chain_id)
        .append(&tx.nonce)
        .append(&tx.max_priority_fee_per_gas)
        .append(&tx.max_fee_per_gas)
        .append(&tx.gas_limit)
        .append(&tx.to.as_slice())
        .append(&tx.value)
        .append(&tx.data);
    stream.begin_list(0);
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

/// 签名前的 type 2 载荷（keccak256 即签名摘要）
pub fn signing_payload(tx: &EvmTransaction) -> Vec<u8> {
    let mut stream = RlpStream::new_list(9);
    append_fields(&mut stream, tx);
    let mut out = vec![EIP1559_TX_TYPE];
    out.extend_from_slice(&stream.out());
    out
}

pub fn encode(signer: &dyn KeySigner, tx: &EvmTransaction, private_key: &[u8]) -> ChainResult<Vec<u8>> {
    if tx.gas_limit == 0 {
        return Err(ChainError::precondition("gas limit must be greater than zero"));
    }
    let digest = keccak256(&signing_payload(tx));
    let signature = signer.sign(CurveType::Secp256k1, &digest, private_key)?;
    if signature.len() != 65 {
        return Err(ChainError::Signing("unexpected secp256k1 signature length".into()));
    }

    let mut stream = RlpStream::new_list(12);
    append_fields(&mut stream, tx);
    stream
        .append(&signature[64])
        .append(&trim_leading_zeros(&signature[..32]))
        .append(&trim_leading_zeros(&signature[32..64]));

    let mut out = vec![EIP1559_TX_TYPE];
    out.extend_from_slice(&stream.out());
    Ok(out)
}

pub fn decode(raw: &[u8]) -> ChainResult<DecodedEvmTransaction> {
    let (tx_type, body) = raw
        .split_first()
        .ok_or_else(|| ChainError::precondition("empty transaction"))?;
    if *tx_type != EIP1559_TX_TYPE {
        return Err(ChainError::precondition(format!("unsupported tx type {}", tx_type)));
    }
    let rlp = Rlp::new(body);
    let err = |e: rlp::DecoderError| ChainError::precondition(format!("invalid RLP: {}", e));
    let to: Vec<u8> = rlp.val_at(5).map_err(err)?;
    let to: [u8; 20] = to
        .as_slice()
        .try_into()
        .map_err(|_| ChainError::precondition("invalid recipient length"))?;

    Ok(DecodedEvmTransaction {
        tx: EvmTransaction {
            chain_id: rlp.val_at(0).map_err(err)?,
            nonce: rlp.val_at(1).map_err(err)?,
            max_priority_fee_per_gas: rlp.val_at(2).map_err(err)?,
            max_fee_per_gas: rlp.val_at(3).map_err(err)?,
            gas_limit: rlp.val_at(4).map_err(err)?,
            to,
            value: rlp.val_at(6).map_err(err)?,
            data: rlp.val_at(7).map_err(err)?,
        },
        y_parity: rlp.val_at(9).map_err(err)?,
        r: rlp.val_at(10).map_err(err)?,
        s: rlp.val_at(11).map_err(err)?,
    })
}

/// EIP-191 personal_sign，v 取 27/28
pub fn personal_sign(signer: &dyn KeySigner, message: &[u8], private_key: &[u8]) -> ChainResult<Vec<u8>> {
    let mut prefixed = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    prefixed.extend_from_slice(message);
    let digest = keccak256(&prefixed);
    let mut signature = signer.sign(CurveType::Secp256k1, &digest, private_key)?;
    if let Some(v) = signature.get_mut(64) {
        *v += 27;
    }
    Ok(signature)
}

/// 未压缩公钥（64 字节，不含前缀）对应的地址
pub fn address_from_public_key(uncompressed: &[u8]) -> String {
    let hash = keccak256(uncompressed);
    format!("0x{}", hex::encode(&hash[12..]))
}
