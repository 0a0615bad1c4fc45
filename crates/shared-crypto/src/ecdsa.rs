//! Recoverable secp256k1 ECDSA.
//!
//! Used by the local-key signer and by the simulated signer node; also
//! recovers the signing address from `(r, s, v)` triples produced by the
//! threshold protocol. RFC 6979 deterministic nonces, low-S normalization.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use zeroize::Zeroize;

use crate::errors::CryptoError;
use crate::keccak::pubkey_to_address;

/// ECDSA signature with recovery information. `v` is the protocol-level
/// 27/28 encoding of the recovery parity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub v: u8,
}

impl RecoverableSignature {
    /// Concatenated 65-byte `r || s || v` form.
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.v;
        out
    }
}

/// A locally-held secp256k1 keypair.
pub struct EcdsaKeyPair {
    signing_key: SigningKey,
}

impl EcdsaKeyPair {
    /// Generate a random keypair.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::thread_rng()),
        }
    }

    /// Restore from raw secret bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_bytes(bytes.into()).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { signing_key })
    }

    /// Restore from a hex string (with or without `0x`).
    pub fn from_hex(raw: &str) -> Result<Self, CryptoError> {
        let stripped = raw.trim().trim_start_matches("0x");
        let bytes = hex::decode(stripped).map_err(|e| CryptoError::InvalidHex(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidPrivateKey)?;
        Self::from_bytes(&arr)
    }

    /// Uncompressed SEC1 public key (65 bytes, leading 0x04).
    pub fn public_key_uncompressed(&self) -> [u8; 65] {
        let point = self.signing_key.verifying_key().to_encoded_point(false);
        let mut out = [0u8; 65];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// Compressed SEC1 public key (33 bytes).
    pub fn public_key_compressed(&self) -> [u8; 33] {
        let point = self.signing_key.verifying_key().to_encoded_point(true);
        let mut out = [0u8; 33];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// EIP-55 checksummed Ethereum address of this keypair.
    pub fn address(&self) -> String {
        // Cannot fail: the encoded point is always a valid 65-byte key.
        pubkey_to_address(&self.public_key_uncompressed()).unwrap_or_default()
    }

    /// Sign a 32-byte digest, returning `(r, s, v)` with `v` in 27/28 form.
    pub fn sign_prehash(&self, digest: &[u8; 32]) -> Result<RecoverableSignature, CryptoError> {
        let (sig, recid) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|_| CryptoError::SigningFailed)?;
        let bytes = sig.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Ok(RecoverableSignature {
            r,
            s,
            v: 27 + recid.to_byte(),
        })
    }

    /// Raw secret bytes (share backup, test fixtures).
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }
}

impl Drop for EcdsaKeyPair {
    fn drop(&mut self) {
        let mut bytes: [u8; 32] = self.signing_key.to_bytes().into();
        bytes.zeroize();
    }
}

/// Recover the EIP-55 signing address from a digest and an `(r, s, v)`
/// signature. Fails on out-of-range scalars or an impossible recovery id.
pub fn recover_address(
    digest: &[u8; 32],
    sig: &RecoverableSignature,
) -> Result<String, CryptoError> {
    if sig.v != 27 && sig.v != 28 {
        return Err(CryptoError::InvalidRecoveryId(sig.v));
    }
    let signature = Signature::from_scalars(
        k256::FieldBytes::from(sig.r),
        k256::FieldBytes::from(sig.s),
    )
    .map_err(|_| CryptoError::InvalidSignature)?;
    let recid =
        RecoveryId::from_byte(sig.v - 27).ok_or(CryptoError::InvalidRecoveryId(sig.v))?;
    let verifying = VerifyingKey::recover_from_prehash(digest, &signature, recid)
        .map_err(|_| CryptoError::RecoveryFailed)?;
    let point = verifying.to_encoded_point(false);
    pubkey_to_address(point.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keccak::keccak256;

    #[test]
    fn test_sign_and_recover_roundtrip() {
        let keypair = EcdsaKeyPair::generate();
        let digest = keccak256(b"transfer payload");
        let sig = keypair.sign_prehash(&digest).unwrap();

        assert!(sig.v == 27 || sig.v == 28);
        let recovered = recover_address(&digest, &sig).unwrap();
        assert_eq!(recovered, keypair.address());
    }

    #[test]
    fn test_deterministic_signatures() {
        let keypair = EcdsaKeyPair::from_bytes(&[0xAB; 32]).unwrap();
        let digest = keccak256(b"same input");
        let a = keypair.sign_prehash(&digest).unwrap();
        let b = keypair.sign_prehash(&digest).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_recover_rejects_wrong_digest() {
        let keypair = EcdsaKeyPair::generate();
        let sig = keypair.sign_prehash(&keccak256(b"one")).unwrap();
        let other = keccak256(b"two");
        // Recovery either fails or yields a different address.
        match recover_address(&other, &sig) {
            Ok(addr) => assert_ne!(addr, keypair.address()),
            Err(_) => {}
        }
    }

    #[test]
    fn test_recover_rejects_bad_v() {
        let keypair = EcdsaKeyPair::generate();
        let digest = keccak256(b"x");
        let mut sig = keypair.sign_prehash(&digest).unwrap();
        sig.v = 99;
        assert_eq!(
            recover_address(&digest, &sig),
            Err(CryptoError::InvalidRecoveryId(99))
        );
    }

    #[test]
    fn test_hex_roundtrip() {
        let original = EcdsaKeyPair::generate();
        let hex_key = format!("0x{}", hex::encode(original.to_bytes()));
        let restored = EcdsaKeyPair::from_hex(&hex_key).unwrap();
        assert_eq!(original.address(), restored.address());
    }

    #[test]
    fn test_well_known_dev_key_address() {
        // First account of the standard hardhat/anvil development mnemonic.
        let keypair = EcdsaKeyPair::from_hex(
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        )
        .unwrap();
        assert_eq!(keypair.address(), "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
    }
}
