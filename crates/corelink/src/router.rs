// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request router: correlation of inbound frames with pending requests and
//! consumed subscriptions.
//!
//! Owns the request-id and subscription-key counters, the pending-request
//! table, and the consumed-subscription table. Inbound `REQUEST` frames
//! are handed to the provided-service registry; everything else completes
//! a pending request, feeds subscription events, or is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::RequestError;
use crate::event::{CoreEvent, EventSink};
use crate::moo::{Body, Frame, Verb};
use crate::provided::{CoreIdentity, Registry};

/// First request id a client allocates. Values below this are reserved
/// for ids minted by the Core.
pub const FIRST_CLIENT_REQUEST_ID: u64 = 10;

/// Response names that complete a request successfully.
const SUCCESS_NAMES: [&str; 2] = ["Success", "Registered"];

type ReplyResult = Result<Body, RequestError>;

/// A waiting caller's half of a request.
///
/// Dropping the reply (or letting a deadline expire) does not cancel the
/// wire request and does not touch the pending table; a late response
/// simply completes into an unclaimed sink.
pub struct PendingReply {
    request_id: u64,
    rx: oneshot::Receiver<ReplyResult>,
}

impl PendingReply {
    /// The request id this reply correlates with.
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Wait without a deadline.
    pub async fn wait(self) -> ReplyResult {
        self.rx.await.map_err(|_| RequestError::ChannelClosed)?
    }

    /// Wait with a caller-side deadline. Expiry yields
    /// [`RequestError::Timeout`] and leaves the wire request in flight.
    pub async fn wait_for(self, deadline: Duration) -> ReplyResult {
        match tokio::time::timeout(deadline, self.rx).await {
            Err(_) => Err(RequestError::Timeout),
            Ok(Err(_)) => Err(RequestError::ChannelClosed),
            Ok(Ok(result)) => result,
        }
    }
}

/// A consumed subscription: the topic and the request id correlating its
/// `CONTINUE` stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    pub request_id: u64,
}

struct PendingEntry {
    /// Taken (without removing the entry) on `CONTINUE Registered`, which
    /// completes the waiting caller while the stream stays correlated.
    sender: Option<oneshot::Sender<ReplyResult>>,
}

/// Correlation state for one connection. Tables survive reconnects;
/// `fail_all` empties the pending table on every connection loss.
pub(crate) struct Router {
    next_request_id: AtomicU64,
    next_subscription_key: AtomicU64,
    pending: DashMap<u64, PendingEntry>,
    subscriptions: DashMap<u64, Subscription>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            next_request_id: AtomicU64::new(FIRST_CLIENT_REQUEST_ID),
            next_subscription_key: AtomicU64::new(0),
            pending: DashMap::new(),
            subscriptions: DashMap::new(),
        }
    }

    /// Allocate the next request id (monotonic, unique per connection).
    pub fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Allocate the next subscription key.
    pub fn next_subscription_key(&self) -> u64 {
        self.next_subscription_key.fetch_add(1, Ordering::Relaxed)
    }

    /// Install a completion sink for `request_id` and hand back the
    /// caller's half.
    pub fn install(&self, request_id: u64) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, PendingEntry { sender: Some(tx) });
        PendingReply { request_id, rx }
    }

    /// Track a consumed subscription under its client-generated key.
    pub fn install_subscription(&self, subscription_key: u64, topic: &str, request_id: u64) {
        self.subscriptions.insert(
            subscription_key,
            Subscription { topic: topic.to_string(), request_id },
        );
    }

    /// Drop a consumed subscription.
    pub fn remove_subscription(&self, subscription_key: u64) -> Option<Subscription> {
        self.subscriptions.remove(&subscription_key).map(|(_, s)| s)
    }

    /// Number of requests still awaiting a terminal frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Fail every pending request with the distinguished disconnect error
    /// and leave the table empty. Each sink is completed at most once.
    pub fn fail_all(&self) {
        let ids: Vec<u64> = self.pending.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, mut entry)) = self.pending.remove(&id) {
                if let Some(tx) = entry.sender.take() {
                    let _ = tx.send(Err(RequestError::Disconnected));
                }
            }
        }
    }

    /// Route one inbound frame.
    ///
    /// `outbound` carries responses produced by the provided-service
    /// registry; `core` is the identity handed to inbound handlers.
    pub fn handle_frame(
        &self,
        frame: Frame,
        events: &EventSink,
        registry: &Registry,
        outbound: &mpsc::Sender<Vec<u8>>,
        core: &CoreIdentity,
    ) {
        let Some(request_id) = frame.request_id else {
            log::warn!("dropping frame without Request-Id: {} {}", frame.verb.as_wire(), frame.name);
            return;
        };

        match frame.verb {
            Verb::Complete => self.complete(request_id, &frame.name, frame.body),
            Verb::Continue => {
                if frame.name == "Registered" {
                    // Completes the registration caller; the entry stays so
                    // the stream remains correlated.
                    self.deliver(request_id, Ok(frame.body.clone()), false);
                }
                self.dispatch_subscription_event(request_id, &frame.name, &frame.body, events);
            }
            Verb::Request => {
                registry.dispatch(&frame.name, request_id, frame.body.as_json(), core, outbound);
            }
        }
    }

    /// Terminal frame: deliver and remove.
    fn complete(&self, request_id: u64, name: &str, body: Body) {
        let result = if SUCCESS_NAMES.contains(&name) {
            Ok(body)
        } else {
            Err(RequestError::Failure {
                name: name.to_string(),
                body: body.into_json(),
            })
        };
        self.deliver(request_id, result, true);
    }

    fn deliver(&self, request_id: u64, result: ReplyResult, remove: bool) {
        if remove {
            match self.pending.remove(&request_id) {
                Some((_, mut entry)) => {
                    if let Some(tx) = entry.sender.take() {
                        // A send error means the caller gave up waiting;
                        // the response is still a liveness signal.
                        let _ = tx.send(result);
                    }
                }
                None => {
                    log::debug!("response for unknown request id {request_id}, dropping");
                }
            }
        } else if let Some(mut entry) = self.pending.get_mut(&request_id) {
            if let Some(tx) = entry.sender.take() {
                let _ = tx.send(result);
            }
        } else {
            log::debug!("response for unknown request id {request_id}, dropping");
        }
    }

    /// Feed every subscription whose request id matches.
    fn dispatch_subscription_event(
        &self,
        request_id: u64,
        name: &str,
        body: &Body,
        events: &EventSink,
    ) {
        for entry in self.subscriptions.iter() {
            if entry.request_id != request_id {
                continue;
            }
            match subscription_event(&entry.topic, name, body) {
                Some(event) => events.emit(event),
                None => log::debug!(
                    "no event mapping for topic {:?} name {name:?}, dropping",
                    entry.topic
                ),
            }
        }
    }
}

/// Translate a subscription `CONTINUE` into a typed event.
///
/// The mapping is keyed on the subscription topic and, for `Changed`-style
/// responses, on which well-known key the body carries. Unknown topics
/// produce no event.
fn subscription_event(topic: &str, name: &str, body: &Body) -> Option<CoreEvent> {
    let payload = body.as_json().cloned().unwrap_or(Value::Null);
    let has = |key: &str| body.as_json().is_some_and(|v| v.get(key).is_some());

    match topic {
        "zones" => Some(if name == "Subscribed" {
            CoreEvent::ZonesSubscribed(payload)
        } else if has("zones_changed") {
            CoreEvent::ZonesChanged(payload)
        } else if has("zones_added") {
            CoreEvent::ZonesAdded(payload)
        } else if has("zones_removed") {
            CoreEvent::ZonesRemoved(payload)
        } else if has("zones_seek_changed") {
            CoreEvent::ZonesSeekChanged(payload)
        } else {
            CoreEvent::ZonesChanged(payload)
        }),
        "outputs" => Some(if name == "Subscribed" {
            CoreEvent::OutputsSubscribed(payload)
        } else if has("outputs_changed") {
            CoreEvent::OutputsChanged(payload)
        } else if has("outputs_added") {
            CoreEvent::OutputsAdded(payload)
        } else if has("outputs_removed") {
            CoreEvent::OutputsRemoved(payload)
        } else {
            CoreEvent::OutputsChanged(payload)
        }),
        "queue" => Some(if name == "Subscribed" {
            CoreEvent::QueueSubscribed(payload)
        } else {
            CoreEvent::QueueChanged(payload)
        }),
        _ => None,
    }
}
