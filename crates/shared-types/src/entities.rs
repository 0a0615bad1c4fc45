//! Common identifier and address primitives.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::CoreError;

/// An Ethereum address, normalized to lowercase `0x`-prefixed hex.
///
/// Address-book lookups, local screening lists, and deposit matching all
/// compare addresses case-insensitively; normalizing at the boundary keeps
/// every comparison a plain string equality. EIP-55 checksum rendering is a
/// display concern and lives in `shared-crypto`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EthAddress(String);

impl EthAddress {
    /// Parse and normalize an address. Accepts any hex casing, with or
    /// without the `0x` prefix.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let trimmed = raw.trim();
        let hex_part = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")).unwrap_or(trimmed);
        if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CoreError::Configuration(format!(
                "invalid ethereum address: {trimmed}"
            )));
        }
        Ok(Self(format!("0x{}", hex_part.to_ascii_lowercase())))
    }

    /// The normalized `0x`-prefixed lowercase form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The raw 20 bytes of the address.
    pub fn to_bytes(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        for (i, chunk) in out.iter_mut().enumerate() {
            let pos = 2 + i * 2;
            // Parse cannot fail: construction validated 40 hex digits.
            *chunk = u8::from_str_radix(&self.0[pos..pos + 2], 16).unwrap_or_default();
        }
        out
    }
}

impl fmt::Display for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Render a timestamp as RFC 3339 with fixed microsecond precision.
///
/// Hashed material (audit events, permit content) must serialize timestamps
/// identically on write and on re-verification, so the precision is pinned
/// rather than left to the serializer default.
pub fn rfc3339_micros(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}
