//! Keccak-256 and Ethereum address derivation.

use sha3::{Digest, Keccak256};

use crate::errors::CryptoError;

/// Keccak-256 hash.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Derive the Ethereum address from an uncompressed secp256k1 public key
/// (65 bytes, leading `0x04`): `keccak256(pubkey[1..])[12..]`, rendered
/// with EIP-55 checksum casing.
pub fn pubkey_to_address(uncompressed: &[u8]) -> Result<String, CryptoError> {
    if uncompressed.len() != 65 || uncompressed[0] != 0x04 {
        return Err(CryptoError::InvalidPublicKey);
    }
    let digest = keccak256(&uncompressed[1..]);
    let raw = hex::encode(&digest[12..]);
    Ok(eip55_checksum(&raw))
}

/// Apply EIP-55 mixed-case checksum to a bare 40-hex-digit address.
///
/// Each alphabetic nibble is uppercased when the corresponding nibble of
/// `keccak256(lowercase_hex_ascii)` is >= 8.
pub fn eip55_checksum(bare_hex: &str) -> String {
    let lower = bare_hex.trim_start_matches("0x").to_ascii_lowercase();
    let digest = keccak256(lower.as_bytes());
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            digest[i / 2] >> 4
        } else {
            digest[i / 2] & 0x0f
        };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak_known_vector() {
        // keccak256("") - the well-known empty-input digest.
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_eip55_reference_addresses() {
        // Test vectors from the EIP-55 specification.
        assert_eq!(
            eip55_checksum("5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"),
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        );
        assert_eq!(
            eip55_checksum("fb6916095ca1df60bb79ce92ce3ea74c37c5d359"),
            "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359"
        );
    }

    #[test]
    fn test_pubkey_to_address_rejects_bad_input() {
        assert!(pubkey_to_address(&[0u8; 64]).is_err());
        let mut not_uncompressed = [0u8; 65];
        not_uncompressed[0] = 0x02;
        assert!(pubkey_to_address(&not_uncompressed).is_err());
    }
}
