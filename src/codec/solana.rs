//! Solana legacy message 编码
//!
//! 账户排序：fee payer 在首位，其后依次为 可写签名者 / 只读签名者 / 可写非签名者 / 只读非签名者。

use sha2::{Digest, Sha256};

use crate::{
    domain::CurveType,
    error::{ChainError, ChainResult},
    infrastructure::KeySigner,
};

pub const SYSTEM_PROGRAM_ID: &str = "11111111111111111111111111111111";
pub const COMPUTE_BUDGET_PROGRAM_ID: &str = "ComputeBudget111111111111111111111111111111";
pub const MEMO_PROGRAM_ID: &str = "MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr";
pub const ASSOCIATED_TOKEN_PROGRAM_ID: &str = "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolanaAccountMeta {
    pub pubkey: String,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl SolanaAccountMeta {
    pub fn writable(pubkey: impl Into<String>, is_signer: bool) -> Self {
        Self {
            pubkey: pubkey.into(),
            is_signer,
            is_writable: true,
        }
    }

    pub fn readonly(pubkey: impl Into<String>, is_signer: bool) -> Self {
        Self {
            pubkey: pubkey.into(),
            is_signer,
            is_writable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolanaInstruction {
    pub program_id: String,
    pub accounts: Vec<SolanaAccountMeta>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolanaTransaction {
    pub fee_payer: String,
    pub recent_blockhash: String,
    pub instructions: Vec<SolanaInstruction>,
}

pub fn system_transfer(from: &str, to: &str, lamports: u64) -> SolanaInstruction {
    let mut data = 2u32.to_le_bytes().to_vec();
    data.extend_from_slice(&lamports.to_le_bytes());
    SolanaInstruction {
        program_id: SYSTEM_PROGRAM_ID.into(),
        accounts: vec![
            SolanaAccountMeta::writable(from, true),
            SolanaAccountMeta::writable(to, false),
        ],
        data,
    }
}

pub fn set_compute_unit_limit(units: u32) -> SolanaInstruction {
    let mut data = vec![2u8];
    data.extend_from_slice(&units.to_le_bytes());
    SolanaInstruction {
        program_id: COMPUTE_BUDGET_PROGRAM_ID.into(),
        accounts: vec![],
        data,
    }
}

pub fn set_compute_unit_price(micro_lamports: u64) -> SolanaInstruction {
    let mut data = vec![3u8];
    data.extend_from_slice(&micro_lamports.to_le_bytes());
    SolanaInstruction {
        program_id: COMPUTE_BUDGET_PROGRAM_ID.into(),
        accounts: vec![],
        data,
    }
}

pub fn memo(signer: &str, text: &str) -> SolanaInstruction {
    SolanaInstruction {
        program_id: MEMO_PROGRAM_ID.into(),
        accounts: vec![SolanaAccountMeta::readonly(signer, true)],
        data: text.as_bytes().to_vec(),
    }
}

/// SPL `TransferChecked`
pub fn token_transfer_checked(
    program_id: &str,
    source: &str,
    mint: &str,
    destination: &str,
    owner: &str,
    amount: u64,
    decimals: u8,
) -> SolanaInstruction {
    let mut data = vec![12u8];
    data.extend_from_slice(&amount.to_le_bytes());
    data.push(decimals);
    SolanaInstruction {
        program_id: program_id.into(),
        accounts: vec![
            SolanaAccountMeta::writable(source, false),
            SolanaAccountMeta::readonly(mint, false),
            SolanaAccountMeta::writable(destination, false),
            SolanaAccountMeta::readonly(owner, true),
        ],
        data,
    }
}

/// 关联代币账户（ATA）地址：seeds = [owner, token_program, mint]，
/// 从 bump 255 向下找第一个不在 ed25519 曲线上的哈希
pub fn associated_token_address(owner: &str, mint: &str, token_program: &str) -> ChainResult<String> {
    let seeds = [
        decode_pubkey(owner)?,
        decode_pubkey(token_program)?,
        decode_pubkey(mint)?,
    ];
    let program = decode_pubkey(ASSOCIATED_TOKEN_PROGRAM_ID)?;
    for bump in (0..=u8::MAX).rev() {
        let mut hasher = Sha256::new();
        for seed in &seeds {
            hasher.update(seed);
        }
        hasher.update([bump]);
        hasher.update(program);
        hasher.update(b"ProgramDerivedAddress");
        let hash: [u8; 32] = hasher.finalize().into();
        if ed25519_dalek::VerifyingKey::from_bytes(&hash).is_err() {
            return Ok(bs58::encode(hash).into_string());
        }
    }
    Err(ChainError::precondition("no viable program address bump"))
}

/// `CreateIdempotent`：接收方 ATA 已存在时为空操作
pub fn create_associated_token_account(
    payer: &str,
    associated: &str,
    owner: &str,
    mint: &str,
    token_program: &str,
) -> SolanaInstruction {
    SolanaInstruction {
        program_id: ASSOCIATED_TOKEN_PROGRAM_ID.into(),
        accounts: vec![
            SolanaAccountMeta::writable(payer, true),
            SolanaAccountMeta::writable(associated, false),
            SolanaAccountMeta::readonly(owner, false),
            SolanaAccountMeta::readonly(mint, false),
            SolanaAccountMeta::readonly(SYSTEM_PROGRAM_ID, false),
            SolanaAccountMeta::readonly(token_program, false),
        ],
        data: vec![1],
    }
}

fn decode_pubkey(value: &str) -> ChainResult<[u8; 32]> {
    let bytes = bs58::decode(value)
        .into_vec()
        .map_err(|e| ChainError::precondition(format!("invalid base58 key {}: {}", value, e)))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| ChainError::precondition(format!("key {} is not 32 bytes", value)))
}

fn push_compact_u16(out: &mut Vec<u8>, mut value: usize) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        byte |= 0x80;
        out.push(byte);
    }
}

struct KeyEntry {
    key: String,
    signer: bool,
    writable: bool,
}

/// 编译为 legacy message 字节
pub fn compile_message(tx: &SolanaTransaction) -> ChainResult<Vec<u8>> {
    let mut entries: Vec<KeyEntry> = vec![KeyEntry {
        key: tx.fee_payer.clone(),
        signer: true,
        writable: true,
    }];
    let mut upsert = |key: &str, signer: bool, writable: bool| {
        if let Some(entry) = entries.iter_mut().find(|e| e.key == key) {
            entry.signer |= signer;
            entry.writable |= writable;
        } else {
            entries.push(KeyEntry {
                key: key.to_string(),
                signer,
                writable,
            });
        }
    };
    for instruction in &tx.instructions {
        for meta in &instruction.accounts {
            upsert(&meta.pubkey, meta.is_signer, meta.is_writable);
        }
        upsert(&instruction.program_id, false, false);
    }

    // fee payer 固定在首位，其余按类别稳定排序
    let rank = |e: &KeyEntry| match (e.signer, e.writable) {
        (true, true) => 0,
        (true, false) => 1,
        (false, true) => 2,
        (false, false) => 3,
    };
    let payer = entries.remove(0);
    entries.sort_by_key(|e| rank(e));
    entries.insert(0, payer);

    let required_signatures = entries.iter().filter(|e| e.signer).count();
    if required_signatures != 1 {
        return Err(ChainError::precondition("only single-signer transactions are supported"));
    }
    let readonly_signed = entries.iter().filter(|e| e.signer && !e.writable).count();
    let readonly_unsigned = entries.iter().filter(|e| !e.signer && !e.writable).count();

    let index_of = |key: &str| -> ChainResult<u8> {
        entries
            .iter()
            .position(|e| e.key == key)
            .map(|i| i as u8)
            .ok_or_else(|| ChainError::precondition(format!("unknown account {}", key)))
    };

    let mut out = vec![
        required_signatures as u8,
        readonly_signed as u8,
        readonly_unsigned as u8,
    ];
    push_compact_u16(&mut out, entries.len());
    for entry in &entries {
        out.extend_from_slice(&decode_pubkey(&entry.key)?);
    }
    out.extend_from_slice(&decode_pubkey(&tx.recent_blockhash)?);

    push_compact_u16(&mut out, tx.instructions.len());
    for instruction in &tx.instructions {
        out.push(index_of(&instruction.program_id)?);
        push_compact_u16(&mut out, instruction.accounts.len());
        for meta in &instruction.accounts {
            out.push(index_of(&meta.pubkey)?);
        }
        push_compact_u16(&mut out, instruction.data.len());
        out.extend_from_slice(&instruction.data);
    }
    Ok(out)
}

/// 对 message 签名并拼出完整交易：签名数 + 签名 + message
pub fn sign_message_bytes(signer: &dyn KeySigner, message: &[u8], private_key: &[u8]) -> ChainResult<Vec<u8>> {
    if message.is_empty() {
        return Err(ChainError::precondition("empty message"));
    }
    let signature = signer.sign(CurveType::Ed25519, message, private_key)?;
    let mut out = Vec::with_capacity(1 + signature.len() + message.len());
    push_compact_u16(&mut out, 1);
    out.extend_from_slice(&signature);
    out.extend_from_slice(message);
    Ok(out)
}

fn read_compact_u16(bytes: &[u8]) -> ChainResult<(usize, usize)> {
    let mut value = 0usize;
    for (i, byte) in bytes.iter().take(3).enumerate() {
        value |= usize::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(ChainError::precondition("malformed compact-u16"))
}

/// 从已序列化的交易中取出 message（跳过签名区），仅接受单签名者交易
pub fn transaction_message(raw: &[u8]) -> ChainResult<&[u8]> {
    let (count, offset) = read_compact_u16(raw)?;
    let start = offset + count * 64;
    let message = raw
        .get(start..)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ChainError::precondition("transaction is truncated"))?;
    if message[0] != 1 {
        return Err(ChainError::precondition(format!(
            "transaction requires {} signatures",
            message[0]
        )));
    }
    Ok(message)
}

pub fn encode(signer: &dyn KeySigner, tx: &SolanaTransaction, private_key: &[u8]) -> ChainResult<Vec<u8>> {
    let message = compile_message(tx)?;
    sign_message_bytes(signer, &message, private_key)
}
