// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame model: verb, name, headers, body.

use serde_json::Value;

/// The three MOO verbs.
///
/// Clients only ever emit `REQUEST` toward the Core for their own traffic,
/// plus `CONTINUE`/`COMPLETE` when answering inbound requests. The Core
/// uses all three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Request,
    Continue,
    Complete,
}

impl Verb {
    /// Wire token, as it appears on the header line.
    pub fn as_wire(self) -> &'static str {
        match self {
            Verb::Request => "REQUEST",
            Verb::Continue => "CONTINUE",
            Verb::Complete => "COMPLETE",
        }
    }

    /// Parse a wire token. The three verbs are matched exactly; anything
    /// else is a protocol violation.
    pub fn from_wire(token: &str) -> Option<Self> {
        match token {
            "REQUEST" => Some(Verb::Request),
            "CONTINUE" => Some(Verb::Continue),
            "COMPLETE" => Some(Verb::Complete),
            _ => None,
        }
    }
}

/// A frame body: absent, decoded JSON, or raw bytes.
///
/// Raw bytes appear for non-JSON content types (image payloads) and as the
/// degraded form of a declared-JSON body that fails to parse; surfacing the
/// payload is the caller's concern, not a codec error.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    None,
    Json(Value),
    Raw(Vec<u8>),
}

impl Body {
    pub fn is_none(&self) -> bool {
        matches!(self, Body::None)
    }

    /// The JSON value, if this body is JSON.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Body::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Consume into a JSON value, if this body is JSON.
    pub fn into_json(self) -> Option<Value> {
        match self {
            Body::Json(v) => Some(v),
            _ => None,
        }
    }
}

/// One decoded message of the wire protocol.
///
/// `request_id` is the parsed `Request-Id` header. The Core sets it on
/// every frame it issues; a frame without one is dropped at the receive
/// pump, not here.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub verb: Verb,
    /// Service path for `REQUEST` frames, status token (`Success`,
    /// `Registered`, `Subscribed`, `Changed`, ...) for responses.
    pub name: String,
    pub request_id: Option<u64>,
    /// All header lines in arrival order, case preserved. Unknown headers
    /// are carried but not interpreted.
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl Frame {
    /// Look up a header value by name (ASCII case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verb_wire_tokens_roundtrip() {
        for verb in [Verb::Request, Verb::Continue, Verb::Complete] {
            assert_eq!(Verb::from_wire(verb.as_wire()), Some(verb));
        }
        assert_eq!(Verb::from_wire("request"), None);
        assert_eq!(Verb::from_wire("PUBLISH"), None);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let frame = Frame {
            verb: Verb::Request,
            name: "svc:1/m".into(),
            request_id: Some(10),
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: Body::None,
        };
        assert_eq!(frame.header("content-type"), Some("application/json"));
        assert_eq!(frame.header("Accept"), None);
    }
}
