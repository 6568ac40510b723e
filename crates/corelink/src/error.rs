// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for connection and request lifecycles.
//!
//! Two layers: [`Error`] for failures that abort a connect attempt or a
//! discovery run, and [`RequestError`] for failures delivered to a single
//! caller's completion sink.

use std::time::Duration;

use thiserror::Error;

/// Result type for connection-level operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by `connect`, `discover` and other top-level entry points.
#[derive(Debug, Error)]
pub enum Error {
    /// TCP/HTTP upgrade to the Core's websocket endpoint failed.
    #[error("websocket connect failed: {0}")]
    Connect(String),

    /// The websocket handshake did not complete within the deadline.
    #[error("websocket handshake timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The Core answered the registration request with a non-`Registered` name.
    #[error("registration rejected by core: {name}")]
    RegistrationRejected {
        name: String,
        body: Option<serde_json::Value>,
    },

    /// No registration response arrived within the configured timeout.
    #[error("registration timed out after {0:?}")]
    RegistrationTimeout(Duration),

    /// The registration response body was missing a required field.
    #[error("malformed registration response: missing {0}")]
    MalformedRegistration(&'static str),

    /// Underlying socket error (UDP discovery, address parsing).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A request issued through this connection failed.
    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Failures delivered to a single request's completion sink.
///
/// `Failure` is a semantic answer from the Core and carries the response
/// name and body for caller inspection. `Disconnected` is the distinguished
/// error fanned out to every pending request when the connection drops, so
/// callers can tell retriable transport loss from a real rejection.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RequestError {
    /// The Core replied with a name that is neither `Success` nor `Registered`.
    #[error("core replied {name}")]
    Failure {
        name: String,
        body: Option<serde_json::Value>,
    },

    /// The connection was lost while the request was in flight.
    #[error("connection lost while request was in flight")]
    Disconnected,

    /// The caller-side deadline expired. The wire request is not cancelled.
    #[error("timed out waiting for reply")]
    Timeout,

    /// The completion sink was dropped without a reply.
    #[error("completion channel closed")]
    ChannelClosed,
}
