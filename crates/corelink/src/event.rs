// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection-lifecycle and subscription events.
//!
//! All events flow through a single bounded broadcast channel. The channel
//! never blocks the receive pump: a slow consumer lags and loses the oldest
//! entries instead of stalling the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Identity of the Core a connection registered against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreInfo {
    pub core_id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_version: Option<String>,
}

/// Events delivered on the connection's event stream.
///
/// Subscription events carry the untouched JSON body of the `CONTINUE`
/// frame that produced them.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// Registration handshake completed; the connection is usable.
    Registered(CoreInfo),
    /// A reconnect attempt is about to start.
    Reconnecting { attempt: u32, backoff_ms: u64 },
    /// A reconnect attempt succeeded.
    Reconnected(CoreInfo),
    /// The connection dropped, or was explicitly closed.
    Disconnected { reason: String, code: Option<u16> },

    ZonesSubscribed(Value),
    ZonesChanged(Value),
    ZonesAdded(Value),
    ZonesRemoved(Value),
    ZonesSeekChanged(Value),

    OutputsSubscribed(Value),
    OutputsChanged(Value),
    OutputsAdded(Value),
    OutputsRemoved(Value),

    QueueSubscribed(Value),
    QueueChanged(Value),

    /// A usable Core appeared (emitted on each successful registration).
    CoreFound(CoreInfo),
    /// A previously paired Core was replaced by another.
    CoreLost { core_id: String },
    /// The pairing service accepted a pair request.
    CorePaired { core_id: String },
    /// A pairing broadcast went out to subscribers.
    PairingChanged(Value),
}

/// Capacity of the event broadcast channel. Lagging receivers drop the
/// oldest entries rather than stalling the receive pump.
pub const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Thin wrapper over the broadcast sender so emit sites never have to care
/// whether anyone is listening.
#[derive(Clone)]
pub(crate) struct EventSink(broadcast::Sender<CoreEvent>);

impl EventSink {
    pub(crate) fn new() -> (Self, broadcast::Receiver<CoreEvent>) {
        let (tx, rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        (Self(tx), rx)
    }

    /// Emit an event. Send errors (no live receivers) are ignored.
    pub(crate) fn emit(&self, event: CoreEvent) {
        let _ = self.0.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.0.subscribe()
    }
}
