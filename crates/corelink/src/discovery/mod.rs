// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SOOD service discovery for Cores on the local network.
//!
//! Entirely separate from the websocket transport: a single UDP socket
//! sends one query to the SOOD multicast group and one to each
//! interface's directed broadcast address, then collects responses until
//! the deadline. Responses are filtered on the fixed service id and
//! deduplicated by `unique_id` (last writer wins).

mod interfaces;
mod sood;

pub use interfaces::{interfaces, IfaceV4};
pub use sood::{MessageKind, SoodMessage, SOOD_VERSION};

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::Instant;

/// UDP port the Core's SOOD responder listens on.
pub const SOOD_PORT: u16 = 9003;

/// SOOD multicast group.
pub const SOOD_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 90, 90);

/// Service id a Core advertises; responses for anything else are ignored.
pub const SERVICE_ID: &str = "00720724-5143-4a9b-abac-0e50cba674bb";

/// Overall receive window when the caller does not specify one.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_millis(3000);

/// Per-recv slice so the overall deadline is honored promptly.
const RECV_SLICE: Duration = Duration::from_millis(500);

/// A Core seen during a discovery run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCore {
    pub unique_id: String,
    pub host: String,
    pub port: u16,
    pub name: Option<String>,
    pub version: Option<String>,
}

/// Run one discovery round, listening for `timeout` overall.
///
/// Individual sends (one per interface) fail quietly; a machine with a
/// misconfigured interface still discovers over the remaining ones.
pub async fn discover(timeout: Duration) -> io::Result<Vec<DiscoveredCore>> {
    let socket = open_socket()?;

    let mut query = SoodMessage::new(MessageKind::Query);
    query.push("_tid", Some(uuid::Uuid::new_v4().to_string()));
    query.push("query_service_id", Some(SERVICE_ID.to_string()));
    let query_bytes = query.encode();

    let group = SocketAddr::V4(SocketAddrV4::new(SOOD_MULTICAST_GROUP, SOOD_PORT));
    if let Err(e) = socket.send_to(&query_bytes, group).await {
        log::debug!("[sood] multicast send failed: {e}");
    }
    for iface in interfaces() {
        let dest = iface.broadcast.unwrap_or(Ipv4Addr::BROADCAST);
        let dest = SocketAddr::V4(SocketAddrV4::new(dest, SOOD_PORT));
        if let Err(e) = socket.send_to(&query_bytes, dest).await {
            log::debug!("[sood] broadcast send to {dest} failed (iface {}): {e}", iface.addr);
        }
    }

    let deadline = Instant::now() + timeout;
    let mut found: HashMap<String, DiscoveredCore> = HashMap::new();
    let mut buf = [0u8; 2048];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining.min(RECV_SLICE), socket.recv_from(&mut buf)).await {
            Err(_) => continue, // recv slice elapsed; loop re-checks the deadline
            Ok(Err(e)) => {
                log::debug!("[sood] recv error: {e}");
                continue;
            }
            Ok(Ok((len, src))) => {
                let Some(msg) = SoodMessage::decode(&buf[..len]) else {
                    continue;
                };
                absorb_response(&mut found, &msg, src);
            }
        }
    }

    Ok(found.into_values().collect())
}

/// Discovery round with the default window.
pub async fn discover_default() -> io::Result<Vec<DiscoveredCore>> {
    discover(DEFAULT_DISCOVERY_TIMEOUT).await
}

/// Fold one received message into the result set. Responses dedup on
/// `unique_id`; a later response for the same Core replaces the earlier
/// one.
fn absorb_response(found: &mut HashMap<String, DiscoveredCore>, msg: &SoodMessage, src: SocketAddr) {
    if msg.kind != MessageKind::Response {
        return;
    }
    if let Some(core) = core_from_response(msg, src) {
        log::debug!("[sood] core {} at {}:{}", core.unique_id, core.host, core.port);
        found.insert(core.unique_id.clone(), core);
    }
}

/// Extract a [`DiscoveredCore`] from a response, applying the filter rules:
/// matching `service_id`, and both `http_port` and `unique_id` present.
fn core_from_response(msg: &SoodMessage, src: SocketAddr) -> Option<DiscoveredCore> {
    if msg.prop("service_id") != Some(SERVICE_ID) {
        return None;
    }
    let port = msg.prop("http_port")?.parse::<u16>().ok()?;
    let unique_id = msg.prop("unique_id")?.to_string();
    let host = msg
        .prop("_replyaddr")
        .map(str::to_string)
        .unwrap_or_else(|| src.ip().to_string());

    Some(DiscoveredCore {
        unique_id,
        host,
        port,
        name: msg.prop("name").map(str::to_string),
        version: msg.prop("display_version").map(str::to_string),
    })
}

/// One broadcast-enabled UDP socket bound to an ephemeral port.
fn open_socket() -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).into())?;
    UdpSocket::from_std(socket.into())
}
