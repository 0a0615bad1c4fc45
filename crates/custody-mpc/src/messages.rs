//! User-party round payload normalization.
//!
//! Client software has shipped three shapes for per-round deliveries:
//!
//! 1. raw protocol bytes;
//! 2. a JSON array of hex strings (legacy clients);
//! 3. a JSON array of `{ToPartyIndex, IsBroadcast, Payload}` records
//!    (modern clients).
//!
//! The coordinator does not reinterpret any of them. Legacy hex arrays are
//! decoded into one message per element; the modern record form is
//! forwarded verbatim as a single opaque message for the node to parse by
//! protocol version. Anything that is not JSON is treated as hex first,
//! raw bytes last.

use serde_json::Value;

use crate::wire::PartyMessage;

/// Party index for the user-side party in the two-party topology.
const USER_PARTY: u32 = 1;

/// Normalize one round delivery into per-party messages for the node.
pub fn parse_round_payload(raw: &[u8]) -> Vec<PartyMessage> {
    if let Ok(text) = std::str::from_utf8(raw) {
        let trimmed = text.trim();
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            if let Some(items) = value.as_array() {
                if items.iter().all(|i| i.is_object()) {
                    // Modern record format: forward the whole JSON blob.
                    return vec![PartyMessage {
                        from_party: USER_PARTY,
                        payload: raw.to_vec(),
                    }];
                }
                // Legacy format: array of hex strings.
                let mut messages = Vec::new();
                for item in items {
                    if let Some(hex_str) = item.as_str() {
                        if hex_str.is_empty() {
                            continue;
                        }
                        if let Ok(bytes) = hex::decode(hex_str.trim_start_matches("0x")) {
                            messages.push(PartyMessage {
                                from_party: USER_PARTY,
                                payload: bytes,
                            });
                        }
                    }
                }
                if !messages.is_empty() {
                    return messages;
                }
            }
        }
        // A bare hex string.
        if let Ok(bytes) = hex::decode(trimmed.trim_start_matches("0x")) {
            if !bytes.is_empty() {
                return vec![PartyMessage {
                    from_party: USER_PARTY,
                    payload: bytes,
                }];
            }
        }
    }
    // Raw protocol bytes.
    vec![PartyMessage {
        from_party: USER_PARTY,
        payload: raw.to_vec(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_hex_array() {
        let messages = parse_round_payload(br#"["0a0b", "0c"]"#);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].payload, vec![0x0a, 0x0b]);
        assert_eq!(messages[1].payload, vec![0x0c]);
    }

    #[test]
    fn test_legacy_hex_array_skips_empties() {
        let messages = parse_round_payload(br#"["", "ff"]"#);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, vec![0xff]);
    }

    #[test]
    fn test_modern_record_array_forwarded_verbatim() {
        let raw = br#"[{"ToPartyIndex": 0, "IsBroadcast": true, "Payload": "AAE="}]"#;
        let messages = parse_round_payload(raw);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, raw.to_vec());
    }

    #[test]
    fn test_bare_hex_string() {
        let messages = parse_round_payload(b"0xdeadbeef");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_raw_bytes_fall_through() {
        let raw = [0x00u8, 0xff, 0x10, 0x80];
        let messages = parse_round_payload(&raw);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, raw.to_vec());
    }
}
