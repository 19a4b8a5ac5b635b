//! UTXO 链交易编码
//!
//! Bitcoin / Litecoin 使用原生隔离见证（P2WPKH, BIP-143 sighash），
//! Doge 使用传统 P2PKH。输入全部属于同一个发送方公钥。

use std::str::FromStr;

use ::bitcoin::{
    absolute::LockTime,
    consensus::encode::serialize,
    hashes::Hash,
    secp256k1,
    sighash::{EcdsaSighashType, SighashCache},
    transaction::Version,
    Amount, OutPoint, PubkeyHash, PublicKey, ScriptBuf, ScriptHash, Sequence, Transaction, TxIn,
    TxOut, Txid, Witness,
};
use sha2::{Digest, Sha256};

use crate::{
    domain::{BitcoinUtxo, Chain, CurveType},
    error::{ChainError, ChainResult},
    infrastructure::KeySigner,
};

pub const DUST_THRESHOLD: u64 = 546;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitcoinOutput {
    pub address: String,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitcoinTransaction {
    pub chain: Chain,
    pub inputs: Vec<BitcoinUtxo>,
    pub outputs: Vec<BitcoinOutput>,
}

/// 各链的 base58 版本字节 (p2pkh, p2sh) 与 bech32 hrp
fn network_params(chain: Chain) -> ChainResult<(u8, &'static [u8], Option<&'static str>)> {
    match chain {
        Chain::Bitcoin => Ok((0x00, &[0x05], Some("bc"))),
        Chain::Litecoin => Ok((0x30, &[0x32, 0x05], Some("ltc"))),
        Chain::Doge => Ok((0x1e, &[0x16], None)),
        other => Err(ChainError::UnsupportedChain(other)),
    }
}

pub fn uses_segwit(chain: Chain) -> bool {
    !matches!(chain, Chain::Doge)
}

/// 预估交易体积（vbytes）
pub fn estimate_vsize(chain: Chain, inputs: usize, outputs: usize) -> u64 {
    if uses_segwit(chain) {
        // 10.5 + 68 * in + 31 * out
        (21 + 136 * inputs as u64 + 62 * outputs as u64).div_ceil(2)
    } else {
        10 + 148 * inputs as u64 + 34 * outputs as u64
    }
}

fn sha256d(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

fn decode_base58check(address: &str) -> ChainResult<Vec<u8>> {
    let raw = bs58::decode(address)
        .into_vec()
        .map_err(|e| ChainError::precondition(format!("invalid base58 address: {}", e)))?;
    if raw.len() < 5 {
        return Err(ChainError::precondition("address too short"));
    }
    let (payload, checksum) = raw.split_at(raw.len() - 4);
    if sha256d(payload)[..4] != *checksum {
        return Err(ChainError::precondition("address checksum mismatch"));
    }
    Ok(payload.to_vec())
}

fn hash20(bytes: &[u8]) -> ChainResult<[u8; 20]> {
    bytes
        .try_into()
        .map_err(|_| ChainError::precondition("address payload must be 20 bytes"))
}

/// 地址转 scriptPubKey，校验地址属于该链
pub fn script_for_address(chain: Chain, address: &str) -> ChainResult<ScriptBuf> {
    let (p2pkh_version, p2sh_versions, hrp) = network_params(chain)?;

    if let Some(hrp) = hrp {
        if address.to_lowercase().starts_with(&format!("{}1", hrp)) {
            let (decoded_hrp, version, program) = bech32::segwit::decode(address)
                .map_err(|e| ChainError::precondition(format!("invalid bech32 address: {}", e)))?;
            if decoded_hrp.to_lowercase() != hrp {
                return Err(ChainError::precondition(format!(
                    "address {} does not belong to {}",
                    address, chain
                )));
            }
            let version = version.to_u8();
            let mut script = vec![if version == 0 { 0x00 } else { 0x50 + version }];
            script.push(program.len() as u8);
            script.extend_from_slice(&program);
            return Ok(ScriptBuf::from_bytes(script));
        }
    }

    let payload = decode_base58check(address)?;
    let (version, hash) = payload
        .split_first()
        .ok_or_else(|| ChainError::precondition("empty address payload"))?;
    let hash = hash20(hash)?;
    if *version == p2pkh_version {
        Ok(ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(hash)))
    } else if p2sh_versions.contains(version) {
        Ok(ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(hash)))
    } else {
        Err(ChainError::precondition(format!(
            "address {} does not belong to {}",
            address, chain
        )))
    }
}

fn der_signature(raw: &[u8]) -> ChainResult<Vec<u8>> {
    let compact = raw
        .get(..64)
        .ok_or_else(|| ChainError::Signing("unexpected secp256k1 signature length".into()))?;
    let sig = secp256k1::ecdsa::Signature::from_compact(compact)
        .map_err(|e| ChainError::Signing(e.to_string()))?;
    Ok(::bitcoin::ecdsa::Signature::sighash_all(sig).to_vec())
}

pub fn encode(signer: &dyn KeySigner, tx: &BitcoinTransaction, private_key: &[u8]) -> ChainResult<Vec<u8>> {
    if tx.inputs.is_empty() {
        return Err(ChainError::precondition("no inputs selected"));
    }
    if tx.outputs.is_empty() {
        return Err(ChainError::precondition("no outputs"));
    }

    let public_key_bytes = signer.public_key(CurveType::Secp256k1, private_key)?;
    let public_key = PublicKey::from_slice(&public_key_bytes)
        .map_err(|e| ChainError::Signing(format!("invalid public key: {}", e)))?;

    let mut unsigned = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: Vec::with_capacity(tx.inputs.len()),
        output: Vec::with_capacity(tx.outputs.len()),
    };
    for utxo in &tx.inputs {
        let txid = Txid::from_str(&utxo.txid)
            .map_err(|e| ChainError::precondition(format!("invalid txid {}: {}", utxo.txid, e)))?;
        unsigned.input.push(TxIn {
            previous_output: OutPoint::new(txid, utxo.vout),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        });
    }
    for output in &tx.outputs {
        if output.value < DUST_THRESHOLD {
            return Err(ChainError::precondition(format!(
                "output {} is below dust threshold",
                output.value
            )));
        }
        unsigned.output.push(TxOut {
            value: Amount::from_sat(output.value),
            script_pubkey: script_for_address(tx.chain, &output.address)?,
        });
    }

    let mut signatures = Vec::with_capacity(tx.inputs.len());
    if uses_segwit(tx.chain) {
        let wpubkey_hash = public_key
            .wpubkey_hash()
            .ok_or_else(|| ChainError::Signing("segwit requires a compressed key".into()))?;
        let script_pubkey = ScriptBuf::new_p2wpkh(&wpubkey_hash);
        let mut cache = SighashCache::new(&unsigned);
        for (index, utxo) in tx.inputs.iter().enumerate() {
            let sighash = cache
                .p2wpkh_signature_hash(index, &script_pubkey, Amount::from_sat(utxo.value), EcdsaSighashType::All)
                .map_err(|e| ChainError::Signing(e.to_string()))?;
            let raw = signer.sign(CurveType::Secp256k1, &sighash.to_byte_array(), private_key)?;
            signatures.push(der_signature(&raw)?);
        }
        for (input, signature) in unsigned.input.iter_mut().zip(signatures) {
            input.witness = Witness::from_slice(&[signature, public_key_bytes.clone()]);
        }
    } else {
        let script_pubkey = ScriptBuf::new_p2pkh(&public_key.pubkey_hash());
        let cache = SighashCache::new(&unsigned);
        for index in 0..tx.inputs.len() {
            let sighash = cache
                .legacy_signature_hash(index, &script_pubkey, EcdsaSighashType::All.to_u32())
                .map_err(|e| ChainError::Signing(e.to_string()))?;
            let raw = signer.sign(CurveType::Secp256k1, &sighash.to_byte_array(), private_key)?;
            signatures.push(der_signature(&raw)?);
        }
        for (input, signature) in unsigned.input.iter_mut().zip(signatures) {
            let mut script_sig = Vec::with_capacity(signature.len() + public_key_bytes.len() + 2);
            script_sig.push(signature.len() as u8);
            script_sig.extend_from_slice(&signature);
            script_sig.push(public_key_bytes.len() as u8);
            script_sig.extend_from_slice(&public_key_bytes);
            input.script_sig = ScriptBuf::from_bytes(script_sig);
        }
    }

    Ok(serialize(&unsigned))
}

#[cfg(test)]
mod tests {
    use ::bitcoin::consensus::encode::deserialize;

    use super::*;
    use crate::infrastructure::LocalKeySigner;

    const KEY: [u8; 32] = [0x11; 32];
    const TXID: &str = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";

    fn input(value: u64) -> BitcoinUtxo {
        BitcoinUtxo {
            txid: TXID.into(),
            vout: 0,
            value,
        }
    }

    #[test]
    fn test_estimate_vsize() {
        assert_eq!(estimate_vsize(Chain::Bitcoin, 1, 2), 141);
        assert_eq!(estimate_vsize(Chain::Doge, 1, 2), 226);
    }

    #[test]
    fn test_script_for_address() {
        let p2wpkh = script_for_address(Chain::Bitcoin, "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4").unwrap();
        assert!(p2wpkh.is_p2wpkh());
        let p2pkh = script_for_address(Chain::Bitcoin, "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2").unwrap();
        assert!(p2pkh.is_p2pkh());
        // 比特币地址不能用于 Litecoin
        assert!(script_for_address(Chain::Litecoin, "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2").is_err());
        assert!(script_for_address(Chain::Ethereum, "0x00").is_err());
    }

    /// Test 1: P2WPKH 交易每个输入都带见证
    #[test]
    fn test_segwit_encode() {
        let tx = BitcoinTransaction {
            chain: Chain::Bitcoin,
            inputs: vec![input(50_000), BitcoinUtxo { vout: 1, ..input(20_000) }],
            outputs: vec![BitcoinOutput {
                address: "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4".into(),
                value: 60_000,
            }],
        };
        let raw = encode(&LocalKeySigner, &tx, &KEY).unwrap();
        let decoded: Transaction = deserialize(&raw).unwrap();
        assert_eq!(decoded.input.len(), 2);
        assert_eq!(decoded.output[0].value, Amount::from_sat(60_000));
        assert!(decoded.input.iter().all(|i| i.witness.len() == 2 && i.script_sig.is_empty()));
    }

    /// Test 2: Doge 使用 scriptSig
    #[test]
    fn test_legacy_encode() {
        let tx = BitcoinTransaction {
            chain: Chain::Doge,
            inputs: vec![input(500_000_000)],
            outputs: vec![BitcoinOutput {
                address: "DH5yaieqoZN36fDVciNyRueRGvGLR3mr7L".into(),
                value: 100_000_000,
            }],
        };
        let raw = encode(&LocalKeySigner, &tx, &KEY).unwrap();
        let decoded: Transaction = deserialize(&raw).unwrap();
        assert!(decoded.input[0].witness.is_empty());
        assert!(!decoded.input[0].script_sig.is_empty());
        assert!(decoded.output[0].script_pubkey.is_p2pkh());
    }

    #[test]
    fn test_dust_output_is_rejected() {
        let tx = BitcoinTransaction {
            chain: Chain::Bitcoin,
            inputs: vec![input(10_000)],
            outputs: vec![BitcoinOutput {
                address: "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4".into(),
                value: 100,
            }],
        };
        assert!(matches!(
            encode(&LocalKeySigner, &tx, &KEY),
            Err(ChainError::EncodingPrecondition(_))
        ));
    }
}
