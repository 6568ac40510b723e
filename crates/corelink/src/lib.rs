// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # corelink - client runtime for a remote-controlled music Core
//!
//! A Core is a music-server daughter process that exposes its remote-control
//! API over a persistent binary-framed websocket. This crate is the client
//! runtime: it speaks the MOO request/response/streaming protocol,
//! multiplexes one-shot RPCs, open-ended subscriptions and inbound requests
//! served back to the Core over a single transport, and finds Cores on the
//! LAN with the SOOD UDP discovery protocol.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use corelink::{Connection, ConnectionConfig, CoreEvent, ExtensionInfo};
//!
//! # async fn example() -> corelink::Result<()> {
//! let config = ConnectionConfig::builder("192.168.1.40")
//!     .extension(ExtensionInfo {
//!         extension_id: "com.example.remote".into(),
//!         display_name: "Example Remote".into(),
//!         display_version: "1.0.0".into(),
//!         publisher: "Example".into(),
//!         email: "dev@example.com".into(),
//!     })
//!     .required_service("com.roonlabs.transport:2")
//!     .build();
//!
//! let connection = Connection::connect(config).await?;
//! let mut events = connection.events();
//!
//! connection.subscribe("com.roonlabs.transport:2", "zones", None).await;
//! while let Ok(event) = events.recv().await {
//!     if let CoreEvent::ZonesChanged(zones) = event {
//!         println!("zones changed: {zones}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                        Application                           |
//! |      request() / subscribe() / broadcast() / events()        |
//! +--------------------------------------------------------------+
//! |                   Connection supervisor                      |
//! |   registration | send pump | receive pump | reconnect loop   |
//! +--------------------------------------------------------------+
//! |     Router                   |     Provided services         |
//! |  pending requests,           |  inbound method dispatch,     |
//! |  consumed subscriptions      |  subscriptions, broadcast     |
//! +--------------------------------------------------------------+
//! |   MOO codec (header line + headers + optional JSON body)     |
//! +--------------------------------------------------------------+
//! |   Websocket transport        |   SOOD discovery (UDP)        |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Connection`] | One registered connection to a Core |
//! | [`ConnectionConfig`] | Immutable connect-time options (builder) |
//! | [`CoreEvent`] | Lifecycle and subscription events |
//! | [`ProvidedService`] | A service the client serves to the Core |
//! | [`PersistedState`] | Saved tokens + paired core id |
//! | [`DiscoveredCore`] | One Core seen by SOOD discovery |

/// Connection configuration (builder, defaults, extension identity).
pub mod config;
/// Connection supervisor: handshake, pumps, reconnect, public surface.
pub mod connection;
/// SOOD UDP service discovery.
pub mod discovery;
/// Error types.
pub mod error;
/// Lifecycle and subscription events.
pub mod event;
/// MOO wire protocol codec.
pub mod moo;
/// Persisted pairing state (pure data transform).
pub mod persist;
/// Provided services: registry, dispatch, broadcast, built-ins.
pub mod provided;
/// Request router: pending requests and consumed subscriptions.
pub mod router;
/// Outbound websocket transport.
pub mod transport;

pub use config::{ConnectionConfig, ConnectionConfigBuilder, CoreLostCallback, ExtensionInfo};
pub use connection::{Connection, ConnectionStatus, REGISTRY_SERVICE};
pub use discovery::{discover, discover_default, DiscoveredCore, SERVICE_ID};
pub use error::{Error, RequestError, Result};
pub use event::{CoreEvent, CoreInfo};
pub use moo::{Body, Frame, Verb};
pub use persist::PersistedState;
pub use provided::{
    pairing_service, ping_service, CoreIdentity, PairingState, ProvidedService,
    ProvidedServiceBuilder, Registry, ResponseVerb, ServiceResponse, PAIRING_SERVICE, PING_SERVICE,
};
pub use router::PendingReply;
