// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame encoder/decoder.
//!
//! The decoder is incremental-friendly: it returns `None` until a complete
//! frame (terminated header region plus any declared body) is present, and
//! never errors on truncation. Malformed first lines also yield `None`;
//! the receive pump logs and drops those.

use serde_json::Value;

use super::frame::{Body, Frame, Verb};

const PROTOCOL_PREFIX: &str = "MOO/1 ";
const CONTENT_TYPE_JSON: &str = "application/json";

/// A successfully decoded frame plus the number of input bytes it consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub frame: Frame,
    pub consumed: usize,
}

/// Decode one frame from the front of `input`.
///
/// Returns `None` when the header region is not yet terminated, the first
/// line does not match `MOO/1 <VERB> <name>`, or the declared
/// `Content-Length` exceeds the remaining input. A JSON body that fails to
/// parse degrades to `Body::Raw` rather than an error.
pub fn parse(input: &[u8]) -> Option<Decoded> {
    let (header_end, body_start) = find_header_terminator(input)?;

    let header_region = std::str::from_utf8(&input[..header_end]).ok()?;
    let mut lines = header_region.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

    let first = lines.next()?;
    let rest = first.strip_prefix(PROTOCOL_PREFIX)?;
    let (verb_token, name) = rest.split_once(' ')?;
    let verb = Verb::from_wire(verb_token)?;
    if name.is_empty() {
        return None;
    }

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once(':')?;
        if key.is_empty() {
            return None;
        }
        headers.push((key.to_string(), value.trim_start().to_string()));
    }

    let header = |wanted: &str| {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(wanted))
            .map(|(_, v)| v.as_str())
    };

    let request_id = header("Request-Id").and_then(|v| v.parse::<u64>().ok());

    let (body, consumed) = match header("Content-Length").and_then(|v| v.parse::<usize>().ok()) {
        Some(len) if len > 0 => {
            if input.len() < body_start + len {
                // Body not fully buffered yet.
                return None;
            }
            let raw = &input[body_start..body_start + len];
            let body = if header("Content-Type") == Some(CONTENT_TYPE_JSON) {
                match serde_json::from_slice::<Value>(raw) {
                    Ok(v) => Body::Json(v),
                    Err(err) => {
                        log::debug!("declared-JSON body failed to parse ({err}), keeping raw");
                        Body::Raw(raw.to_vec())
                    }
                }
            } else {
                Body::Raw(raw.to_vec())
            };
            (body, body_start + len)
        }
        _ => (Body::None, body_start),
    };

    Some(Decoded {
        frame: Frame {
            verb,
            name: name.to_string(),
            request_id,
            headers,
            body,
        },
        consumed,
    })
}

/// Locate the blank line terminating the header region.
///
/// Returns `(header_end, body_start)`: the byte length of the header region
/// (exclusive of the terminator) and the offset of the first body byte.
fn find_header_terminator(input: &[u8]) -> Option<(usize, usize)> {
    // "\r\n\r\n" and "\n\n" are both accepted; whichever ends the header
    // region earliest wins.
    let crlf = input.windows(4).position(|w| w == b"\r\n\r\n");
    let lf = input.windows(2).position(|w| w == b"\n\n");
    match (crlf, lf) {
        (Some(c), Some(l)) if c <= l => Some((c, c + 4)),
        (_, Some(l)) => Some((l + 1, l + 2)),
        (Some(c), None) => Some((c, c + 4)),
        (None, None) => None,
    }
}

/// Encode an outbound `REQUEST` frame.
pub fn encode_request(request_id: u64, path: &str, body: Option<&Value>) -> Vec<u8> {
    encode(Verb::Request, path, request_id, body)
}

/// Encode an outbound response frame (`CONTINUE` or `COMPLETE`).
pub fn encode_response(verb: Verb, name: &str, request_id: u64, body: Option<&Value>) -> Vec<u8> {
    debug_assert!(verb != Verb::Request, "responses use CONTINUE or COMPLETE");
    encode(verb, name, request_id, body)
}

fn encode(verb: Verb, name: &str, request_id: u64, body: Option<&Value>) -> Vec<u8> {
    let payload = body.map(|v| serde_json::to_vec(v).unwrap_or_else(|_| b"null".to_vec()));

    let mut out = Vec::with_capacity(128 + payload.as_ref().map_or(0, Vec::len));
    out.extend_from_slice(PROTOCOL_PREFIX.as_bytes());
    out.extend_from_slice(verb.as_wire().as_bytes());
    out.push(b' ');
    out.extend_from_slice(name.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(format!("Request-Id: {request_id}\n").as_bytes());
    if let Some(payload) = &payload {
        out.extend_from_slice(format!("Content-Length: {}\n", payload.len()).as_bytes());
        out.extend_from_slice(format!("Content-Type: {CONTENT_TYPE_JSON}\n").as_bytes());
    }
    out.push(b'\n');
    if let Some(payload) = payload {
        out.extend_from_slice(&payload);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_request_without_body() {
        let bytes = encode_request(10, "com.roonlabs.ping:1/ping", None);
        let text = std::str::from_utf8(&bytes).unwrap();
        assert_eq!(text, "MOO/1 REQUEST com.roonlabs.ping:1/ping\nRequest-Id: 10\n\n");
    }

    #[test]
    fn encode_request_with_body_sets_length_and_type() {
        let body = json!({"subscription_key": 0});
        let bytes = encode_request(11, "com.roonlabs.transport:2/subscribe_zones", Some(&body));
        let text = std::str::from_utf8(&bytes).unwrap();
        let payload = serde_json::to_string(&body).unwrap();
        assert!(text.starts_with("MOO/1 REQUEST com.roonlabs.transport:2/subscribe_zones\n"));
        assert!(text.contains("Request-Id: 11\n"));
        assert!(text.contains(&format!("Content-Length: {}\n", payload.len())));
        assert!(text.contains("Content-Type: application/json\n"));
        assert!(text.ends_with(&format!("\n\n{payload}")));
    }

    #[test]
    fn roundtrip_json_body() {
        let body = json!({"zones": [{"zone_id": "z1"}]});
        let bytes = encode_response(Verb::Continue, "Changed", 17, Some(&body));
        let decoded = parse(&bytes).expect("complete frame");
        assert_eq!(decoded.consumed, bytes.len());
        assert_eq!(decoded.frame.verb, Verb::Continue);
        assert_eq!(decoded.frame.name, "Changed");
        assert_eq!(decoded.frame.request_id, Some(17));
        assert_eq!(decoded.frame.body, Body::Json(body));
    }

    #[test]
    fn roundtrip_empty_body() {
        let bytes = encode_response(Verb::Complete, "Success", 3, None);
        let decoded = parse(&bytes).expect("complete frame");
        assert_eq!(decoded.consumed, bytes.len());
        assert_eq!(decoded.frame.name, "Success");
        assert_eq!(decoded.frame.body, Body::None);
    }

    #[test]
    fn crlf_header_region_is_accepted() {
        let raw = b"MOO/1 COMPLETE Success\r\nRequest-Id: 5\r\n\r\n";
        let decoded = parse(raw).expect("complete frame");
        assert_eq!(decoded.frame.request_id, Some(5));
        assert_eq!(decoded.consumed, raw.len());
    }

    #[test]
    fn incomplete_header_region_yields_none() {
        assert!(parse(b"MOO/1 REQUEST svc:1/m\nRequest-Id: 10\n").is_none());
    }

    #[test]
    fn short_body_yields_none() {
        let raw = b"MOO/1 COMPLETE Success\nRequest-Id: 1\nContent-Length: 10\nContent-Type: application/json\n\n{\"a\"";
        assert!(parse(raw).is_none());
    }

    #[test]
    fn malformed_first_line_yields_none() {
        assert!(parse(b"MOO/2 REQUEST svc:1/m\n\n").is_none());
        assert!(parse(b"MOO/1 PUBLISH svc:1/m\n\n").is_none());
        assert!(parse(b"MOO/1 REQUEST\n\n").is_none());
    }

    #[test]
    fn non_json_content_type_is_raw() {
        let raw = b"MOO/1 COMPLETE Success\nRequest-Id: 2\nContent-Length: 4\nContent-Type: image/jpeg\n\n\xff\xd8\xff\xe0";
        let decoded = parse(raw).expect("complete frame");
        assert_eq!(decoded.frame.body, Body::Raw(vec![0xff, 0xd8, 0xff, 0xe0]));
    }

    #[test]
    fn unparseable_json_degrades_to_raw() {
        let raw = b"MOO/1 COMPLETE Success\nRequest-Id: 2\nContent-Length: 5\nContent-Type: application/json\n\n{oops";
        let decoded = parse(raw).expect("complete frame");
        assert_eq!(decoded.frame.body, Body::Raw(b"{oops".to_vec()));
    }

    #[test]
    fn unknown_headers_are_preserved() {
        let raw = b"MOO/1 COMPLETE Success\nRequest-Id: 9\nX-Custom: hello\n\n";
        let decoded = parse(raw).expect("complete frame");
        assert_eq!(decoded.frame.header("X-Custom"), Some("hello"));
    }

    #[test]
    fn missing_request_id_is_surfaced_as_none() {
        let decoded = parse(b"MOO/1 COMPLETE Success\n\n").expect("complete frame");
        assert_eq!(decoded.frame.request_id, None);
    }
}
