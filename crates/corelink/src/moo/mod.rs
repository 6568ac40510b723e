// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MOO/1 wire protocol: text-header + optional JSON-body framing.
//!
//! Every message on the websocket is one frame:
//!
//! ```text
//! MOO/1 REQUEST com.roonlabs.registry:1/register\n
//! Request-Id: 10\n
//! Content-Length: 42\n
//! Content-Type: application/json\n
//! \n
//! {"extension_id":"..."}
//! ```
//!
//! The header region terminates at the first blank line (`\n\n` or
//! `\r\n\r\n`); a body follows iff `Content-Length` is declared. The body
//! is decoded as JSON only when `Content-Type` is `application/json`;
//! anything else passes through as raw bytes.

mod codec;
mod frame;

pub use codec::{encode_request, encode_response, parse, Decoded};
pub use frame::{Body, Frame, Verb};
