// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SOOD message codec.
//!
//! Frame layout: four-byte magic `SOOD`, one version byte (0x02), one type
//! byte (`Q` query / `R` response), then zero or more properties. Each
//! property is a 1-byte name length (must be non-zero), the UTF-8 name,
//! a 2-byte big-endian value length, and the UTF-8 value. The sentinel
//! length 0xFFFF encodes a null value (name present, value absent).

const MAGIC: &[u8; 4] = b"SOOD";

/// Protocol version this client speaks.
pub const SOOD_VERSION: u8 = 0x02;

/// Sentinel value length meaning "null value".
const NULL_VALUE_LEN: u16 = 0xFFFF;

/// Query or response discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Query,
    Response,
}

impl MessageKind {
    fn as_byte(self) -> u8 {
        match self {
            MessageKind::Query => b'Q',
            MessageKind::Response => b'R',
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'Q' => Some(MessageKind::Query),
            b'R' => Some(MessageKind::Response),
            _ => None,
        }
    }
}

/// One SOOD message: kind plus ordered properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoodMessage {
    pub kind: MessageKind,
    /// Properties in wire order. `None` values are the 0xFFFF null form.
    pub props: Vec<(String, Option<String>)>,
}

impl SoodMessage {
    pub fn new(kind: MessageKind) -> Self {
        Self { kind, props: Vec::new() }
    }

    pub fn push(&mut self, name: impl Into<String>, value: Option<String>) {
        self.props.push((name.into(), value));
    }

    /// First property with the given name, if it has a value.
    pub fn prop(&self, name: &str) -> Option<&str> {
        self.props
            .iter()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Serialize to wire bytes. Property names longer than 255 bytes and
    /// values longer than 0xFFFE bytes are not representable and are
    /// skipped with a log line; discovery properties are all short.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + self.props.len() * 24);
        out.extend_from_slice(MAGIC);
        out.push(SOOD_VERSION);
        out.push(self.kind.as_byte());
        for (name, value) in &self.props {
            if name.is_empty() || name.len() > u8::MAX as usize {
                log::warn!("sood: skipping unencodable property name ({} bytes)", name.len());
                continue;
            }
            match value {
                Some(v) if v.len() >= NULL_VALUE_LEN as usize => {
                    log::warn!("sood: skipping oversized property value ({} bytes)", v.len());
                    continue;
                }
                _ => {}
            }
            out.push(name.len() as u8);
            out.extend_from_slice(name.as_bytes());
            match value {
                Some(v) => {
                    out.extend_from_slice(&(v.len() as u16).to_be_bytes());
                    out.extend_from_slice(v.as_bytes());
                }
                None => out.extend_from_slice(&NULL_VALUE_LEN.to_be_bytes()),
            }
        }
        out
    }

    /// Decode from wire bytes. Every length prefix is range-checked
    /// against the remaining buffer; any truncation or malformed field
    /// yields `None` with no partial result.
    pub fn decode(input: &[u8]) -> Option<Self> {
        if input.len() < 6 || &input[..4] != MAGIC || input[4] != SOOD_VERSION {
            return None;
        }
        let kind = MessageKind::from_byte(input[5])?;

        let mut props = Vec::new();
        let mut at = 6;
        while at < input.len() {
            let name_len = input[at] as usize;
            at += 1;
            if name_len == 0 || input.len() < at + name_len {
                return None;
            }
            let name = std::str::from_utf8(&input[at..at + name_len]).ok()?.to_string();
            at += name_len;

            if input.len() < at + 2 {
                return None;
            }
            let value_len = u16::from_be_bytes([input[at], input[at + 1]]);
            at += 2;

            let value = if value_len == NULL_VALUE_LEN {
                None
            } else {
                let len = value_len as usize;
                if input.len() < at + len {
                    return None;
                }
                let v = std::str::from_utf8(&input[at..at + len]).ok()?.to_string();
                at += len;
                Some(v)
            };
            props.push((name, value));
        }

        Some(Self { kind, props })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SoodMessage {
        let mut msg = SoodMessage::new(MessageKind::Query);
        msg.push("_tid", Some("9a3b8c7d".to_string()));
        msg.push("query_service_id", Some("00720724-5143-4a9b-abac-0e50cba674bb".to_string()));
        msg.push("flag", None);
        msg
    }

    #[test]
    fn roundtrip_including_null_values() {
        let msg = sample();
        let decoded = SoodMessage::decode(&msg.encode()).expect("decodes");
        assert_eq!(decoded, msg);
    }

    #[test]
    fn empty_property_list_roundtrips() {
        let msg = SoodMessage::new(MessageKind::Response);
        let bytes = msg.encode();
        assert_eq!(bytes.len(), 6);
        assert_eq!(SoodMessage::decode(&bytes), Some(msg));
    }

    #[test]
    fn wrong_magic_version_or_type_is_rejected() {
        let bytes = sample().encode();

        let mut bad = bytes.clone();
        bad[0] = b'X';
        assert_eq!(SoodMessage::decode(&bad), None);

        let mut bad = bytes.clone();
        bad[4] = 0x01;
        assert_eq!(SoodMessage::decode(&bad), None);

        let mut bad = bytes;
        bad[5] = b'Z';
        assert_eq!(SoodMessage::decode(&bad), None);
    }

    #[test]
    fn truncation_at_every_boundary_yields_none() {
        let bytes = sample().encode();
        for cut in 7..bytes.len() {
            // Cutting inside a property must never produce a partial parse.
            if SoodMessage::decode(&bytes[..cut]).is_some() {
                // A cut can only be valid if it lands exactly on a property
                // boundary; verify by re-encoding.
                let partial = SoodMessage::decode(&bytes[..cut]).unwrap();
                assert_eq!(partial.encode(), &bytes[..cut]);
            }
        }
        // A header alone is a valid empty message; one byte less is not.
        assert!(SoodMessage::decode(&bytes[..5]).is_none());
    }

    #[test]
    fn zero_length_name_is_rejected() {
        let mut bytes = SoodMessage::new(MessageKind::Response).encode();
        bytes.push(0); // name length 0
        assert_eq!(SoodMessage::decode(&bytes), None);
    }
}
