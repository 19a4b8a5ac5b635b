//! 密钥签名器
//!
//! 以已派生的私钥对摘要/消息签名，按曲线分派：
//! - secp256k1：对 32 字节摘要签名，返回 `r || s || v`（65 字节，low-S）
//! - ed25519：对原始消息签名，返回 64 字节签名

use ed25519_dalek::Signer;
use k256::ecdsa::SigningKey as K256SigningKey;

use crate::{
    domain::CurveType,
    error::{ChainError, ChainResult},
};

pub const SECP256K1_SIGNATURE_LEN: usize = 65;
pub const ED25519_SIGNATURE_LEN: usize = 64;

pub trait KeySigner: Send + Sync {
    /// 压缩公钥（secp256k1，33 字节）或 32 字节 ed25519 公钥
    fn public_key(&self, curve: CurveType, private_key: &[u8]) -> ChainResult<Vec<u8>>;

    fn sign(&self, curve: CurveType, message: &[u8], private_key: &[u8]) -> ChainResult<Vec<u8>>;
}

/// 进程内签名实现（k256 / ed25519-dalek）
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalKeySigner;

fn secp_key(private_key: &[u8]) -> ChainResult<K256SigningKey> {
    K256SigningKey::from_slice(private_key)
        .map_err(|_| ChainError::Signing("invalid secp256k1 private key".into()))
}

fn ed_key(private_key: &[u8]) -> ChainResult<ed25519_dalek::SigningKey> {
    let bytes: [u8; 32] = private_key
        .get(..32)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| ChainError::Signing("ed25519 private key must be 32 bytes".into()))?;
    Ok(ed25519_dalek::SigningKey::from_bytes(&bytes))
}

impl KeySigner for LocalKeySigner {
    fn public_key(&self, curve: CurveType, private_key: &[u8]) -> ChainResult<Vec<u8>> {
        match curve {
            CurveType::Secp256k1 => {
                let key = secp_key(private_key)?;
                Ok(key
                    .verifying_key()
                    .to_encoded_point(true)
                    .as_bytes()
                    .to_vec())
            }
            CurveType::Ed25519 => Ok(ed_key(private_key)?.verifying_key().to_bytes().to_vec()),
        }
    }

    fn sign(&self, curve: CurveType, message: &[u8], private_key: &[u8]) -> ChainResult<Vec<u8>> {
        match curve {
            CurveType::Secp256k1 => {
                if message.len() != 32 {
                    return Err(ChainError::Signing(format!(
                        "secp256k1 expects a 32-byte digest, got {} bytes",
                        message.len()
                    )));
                }
                let key = secp_key(private_key)?;
                let (signature, recovery_id) = key
                    .sign_prehash_recoverable(message)
                    .map_err(|e| ChainError::Signing(e.to_string()))?;
                let mut out = signature.to_bytes().to_vec();
                out.push(recovery_id.to_byte());
                Ok(out)
            }
            CurveType::Ed25519 => Ok(ed_key(private_key)?.sign(message).to_bytes().to_vec()),
        }
    }
}

/// 从 secp256k1 私钥得到未压缩公钥（不含 0x04 前缀），用于 EVM/Tron 地址
pub fn secp256k1_uncompressed_public_key(private_key: &[u8]) -> ChainResult<Vec<u8>> {
    let key = secp_key(private_key)?;
    let point = key.verifying_key().to_encoded_point(false);
    Ok(point.as_bytes()[1..].to_vec())
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::Verifier;
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

    use super::*;

    const KEY: [u8; 32] = [7u8; 32];

    #[test]
    fn test_secp256k1_signature_is_recoverable() {
        let signer = LocalKeySigner;
        let digest = [0x11u8; 32];
        let sig = signer.sign(CurveType::Secp256k1, &digest, &KEY).unwrap();
        assert_eq!(sig.len(), SECP256K1_SIGNATURE_LEN);

        let signature = Signature::from_slice(&sig[..64]).unwrap();
        let recovery_id = RecoveryId::from_byte(sig[64]).unwrap();
        let recovered = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id).unwrap();
        let expected = signer.public_key(CurveType::Secp256k1, &KEY).unwrap();
        assert_eq!(recovered.to_encoded_point(true).as_bytes(), expected.as_slice());
    }

    #[test]
    fn test_secp256k1_rejects_non_digest_input() {
        let err = LocalKeySigner
            .sign(CurveType::Secp256k1, b"not a digest", &KEY)
            .unwrap_err();
        assert!(matches!(err, ChainError::Signing(_)));
    }

    #[test]
    fn test_ed25519_signature_verifies() {
        let signer = LocalKeySigner;
        let sig = signer.sign(CurveType::Ed25519, b"transfer", &KEY).unwrap();
        assert_eq!(sig.len(), ED25519_SIGNATURE_LEN);

        let public: [u8; 32] = signer
            .public_key(CurveType::Ed25519, &KEY)
            .unwrap()
            .try_into()
            .unwrap();
        let verifying = ed25519_dalek::VerifyingKey::from_bytes(&public).unwrap();
        let signature = ed25519_dalek::Signature::from_bytes(&sig.try_into().unwrap());
        assert!(verifying.verify(b"transfer", &signature).is_ok());
    }

    #[test]
    fn test_invalid_keys_are_rejected() {
        assert!(LocalKeySigner.public_key(CurveType::Ed25519, &[1u8; 5]).is_err());
        assert!(LocalKeySigner.public_key(CurveType::Secp256k1, &[0u8; 32]).is_err());
    }
}
