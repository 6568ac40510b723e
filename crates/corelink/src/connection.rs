// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection supervisor.
//!
//! Composes codec, transport, router and provided-service registry into
//! one connection to a Core: the registration handshake on connect, a
//! send pump draining the outbound queue, a receive pump routing inbound
//! frames, explicit disconnect, and the auto-reconnect loop.
//!
//! ```text
//!             start!          register ok
//! Disconnected -----> Connecting ---------> Connected
//!      ^                  |                     |
//!      | close/error      | fail                | disconnect!
//!      |                  v                     v
//!      +---------- (fail pending) <------ Disconnecting
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, Notify};

use crate::config::ConnectionConfig;
use crate::error::{Error, RequestError, Result};
use crate::event::{CoreEvent, CoreInfo, EventSink};
use crate::moo::{encode_request, parse, Body};
use crate::provided::{
    pairing_service, ping_service, CoreIdentity, PairingState, ProvidedService, Registry,
};
use crate::router::{PendingReply, Router};
use crate::transport::{TransportEvent, WsTransport, DEFAULT_HANDSHAKE_TIMEOUT};

/// Registration service path on the Core.
pub const REGISTRY_SERVICE: &str = "com.roonlabs.registry:1";

/// Outbound queue depth. Producers briefly await capacity under load; the
/// send pump never blocks the router.
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

/// Poll interval while the send pump waits for a socket to come back.
const SEND_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Connection lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

struct Shared {
    config: ConnectionConfig,
    router: Router,
    registry: Registry,
    events: EventSink,
    outbound_tx: mpsc::Sender<Vec<u8>>,
    /// The send pump re-locks this across reconnects so queued frames
    /// survive a connection loss.
    outbound_rx: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
    transport: tokio::sync::Mutex<Option<WsTransport>>,
    status: Mutex<ConnectionStatus>,
    core_info: Mutex<Option<CoreInfo>>,
    token: Mutex<Option<String>>,
    pairing: Arc<PairingState>,
    explicitly_disconnected: AtomicBool,
    /// True exactly while a reconnect loop is running.
    reconnect_active: AtomicBool,
    shutdown: Notify,
    /// Event receiver created before the first connect, so the events
    /// emitted during the handshake are not lost to a late subscriber.
    first_events: Mutex<Option<broadcast::Receiver<CoreEvent>>>,
}

/// A connection to one Core.
///
/// Created with [`Connection::connect`]; the initial attempt fails fast
/// (no retry loop). After a successful start, connection losses drive the
/// auto-reconnect loop unless disabled or explicitly disconnected.
pub struct Connection {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl Connection {
    /// Open the websocket, register the extension, and start the pumps.
    pub async fn connect(mut config: ConnectionConfig) -> Result<Self> {
        let (events, first_rx) = EventSink::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);

        let pairing = Arc::new(PairingState::new(None));
        let registry = Registry::new();
        registry.register(ping_service());
        registry.register(pairing_service(
            pairing.clone(),
            config.on_core_lost.clone(),
            events.clone(),
        ));
        for service in config.services.drain(..) {
            registry.register(service);
        }

        let token = config.token.clone();
        let shared = Arc::new(Shared {
            config,
            router: Router::new(),
            registry,
            events,
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
            transport: tokio::sync::Mutex::new(None),
            status: Mutex::new(ConnectionStatus::Disconnected),
            core_info: Mutex::new(None),
            token: Mutex::new(token),
            pairing,
            explicitly_disconnected: AtomicBool::new(false),
            reconnect_active: AtomicBool::new(false),
            shutdown: Notify::new(),
            first_events: Mutex::new(Some(first_rx)),
        });

        tokio::spawn(send_pump(shared.clone()));

        if let Err(err) = do_connect(&shared).await {
            // Stop the pump; this connection never became usable.
            shared.explicitly_disconnected.store(true, Ordering::SeqCst);
            shared.shutdown.notify_waiters();
            teardown_transport(&shared).await;
            return Err(err);
        }

        Ok(Self { shared })
    }

    /// Issue a one-shot request. The returned [`PendingReply`] resolves
    /// with the response body, a semantic failure, or the disconnect
    /// error. Requests issued while disconnected stay queued until a
    /// reconnect succeeds.
    pub async fn request(&self, uri: impl Into<String>, body: Option<Value>) -> PendingReply {
        let uri = uri.into();
        let request_id = self.shared.router.next_request_id();
        let reply = self.shared.router.install(request_id);
        log::debug!("-> REQUEST {uri} id={request_id}");
        let bytes = encode_request(request_id, &uri, body.as_ref());
        let _ = self.shared.outbound_tx.send(bytes).await;
        reply
    }

    /// Request and wait with the configured timeout.
    pub async fn call(
        &self,
        uri: impl Into<String>,
        body: Option<Value>,
    ) -> std::result::Result<Body, RequestError> {
        let timeout = self.shared.config.timeout;
        self.request(uri, body).await.wait_for(timeout).await
    }

    /// Open a subscription on a consumed service. Fire and forget: the
    /// stream arrives as typed events on the event channel. Returns the
    /// subscription key, usable with [`Connection::unsubscribe`].
    pub async fn subscribe(&self, service: &str, topic: &str, extra: Option<Value>) -> u64 {
        let router = &self.shared.router;
        let request_id = router.next_request_id();
        let subscription_key = router.next_subscription_key();
        router.install_subscription(subscription_key, topic, request_id);

        let mut body = json!({ "subscription_key": subscription_key });
        if let Some(Value::Object(map)) = extra {
            let obj = body.as_object_mut().expect("body is an object");
            for (k, v) in map {
                obj.insert(k, v);
            }
        }
        log::debug!("-> REQUEST {service}/subscribe_{topic} id={request_id} key={subscription_key}");
        let bytes = encode_request(request_id, &format!("{service}/subscribe_{topic}"), Some(&body));
        let _ = self.shared.outbound_tx.send(bytes).await;
        subscription_key
    }

    /// Close a consumed subscription opened with [`Connection::subscribe`].
    pub async fn unsubscribe(&self, service: &str, topic: &str, subscription_key: u64) {
        if self.shared.router.remove_subscription(subscription_key).is_none() {
            log::debug!("unsubscribe for unknown key {subscription_key}, sending anyway");
        }
        let request_id = self.shared.router.next_request_id();
        let body = json!({ "subscription_key": subscription_key });
        let bytes =
            encode_request(request_id, &format!("{service}/unsubscribe_{topic}"), Some(&body));
        let _ = self.shared.outbound_tx.send(bytes).await;
    }

    /// Push an update to every current subscriber of a provided-service
    /// subscription.
    pub fn broadcast(&self, subscription_name: &str, body: &Value) {
        self.shared.registry.broadcast(subscription_name, body, &self.shared.outbound_tx);
    }

    /// Install a provided service. May be called at any time; the Core
    /// only learns the name list advertised at registration.
    pub fn register_provided_service(&self, service: ProvidedService) {
        self.shared.registry.register(service);
    }

    /// Retrieve a registered provided-service instance.
    pub fn get_service_instance(&self, name: &str) -> Option<Arc<ProvidedService>> {
        self.shared.registry.lookup(name)
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Identity of the Core this connection registered against.
    pub fn core_info(&self) -> Option<CoreInfo> {
        self.shared.core_info.lock().clone()
    }

    /// Current registration token (updated on every registration).
    pub fn token(&self) -> Option<String> {
        self.shared.token.lock().clone()
    }

    /// Core currently holding the pairing, if any.
    pub fn paired_core_id(&self) -> Option<String> {
        self.shared.pairing.paired_core_id()
    }

    /// The event stream. The first call returns a receiver that has seen
    /// every event since before the initial connect.
    pub fn events(&self) -> broadcast::Receiver<CoreEvent> {
        if let Some(rx) = self.shared.first_events.lock().take() {
            return rx;
        }
        self.shared.events.subscribe()
    }

    /// Close the connection and suppress any further reconnect attempts.
    pub async fn disconnect(&self) {
        let shared = &self.shared;
        shared.explicitly_disconnected.store(true, Ordering::SeqCst);
        *shared.status.lock() = ConnectionStatus::Disconnecting;
        teardown_transport(shared).await;
        shared.router.fail_all();
        *shared.status.lock() = ConnectionStatus::Disconnected;
        shared.events.emit(CoreEvent::Disconnected {
            reason: "Explicitly disconnected".to_string(),
            code: None,
        });
        shared.shutdown.notify_waiters();
        log::info!("disconnected from core");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.explicitly_disconnected.store(true, Ordering::SeqCst);
        self.shared.shutdown.notify_waiters();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let shared = self.shared.clone();
            handle.spawn(async move {
                teardown_transport(&shared).await;
            });
        }
    }
}

/// One connect + register sequence. Shared by the initial attempt and
/// every reconnect attempt.
fn do_connect<'a>(
    shared: &'a Arc<Shared>,
) -> Pin<Box<dyn Future<Output = Result<CoreInfo>> + Send + 'a>> {
    Box::pin(async move {
    *shared.status.lock() = ConnectionStatus::Connecting;

    let url = shared.config.url();
    log::info!("connecting to {url}");
    let (transport, inbound) = match WsTransport::connect(&url, DEFAULT_HANDSHAKE_TIMEOUT).await {
        Ok(pair) => pair,
        Err(err) => {
            *shared.status.lock() = ConnectionStatus::Disconnected;
            return Err(err);
        }
    };
    *shared.transport.lock().await = Some(transport);
    tokio::spawn(receive_pump(shared.clone(), inbound));

    // Registration handshake.
    let request_id = shared.router.next_request_id();
    let reply = shared.router.install(request_id);
    let body = register_body(shared);
    let bytes = encode_request(request_id, &format!("{REGISTRY_SERVICE}/register"), Some(&body));
    let _ = shared.outbound_tx.send(bytes).await;

    let timeout = shared.config.timeout;
    let body = match reply.wait_for(timeout).await {
        Ok(body) => body,
        Err(err) => {
            *shared.status.lock() = ConnectionStatus::Disconnected;
            teardown_transport(shared).await;
            return Err(match err {
                RequestError::Timeout => Error::RegistrationTimeout(timeout),
                RequestError::Failure { name, body } => Error::RegistrationRejected { name, body },
                RequestError::Disconnected => {
                    Error::Connect("connection lost during registration".to_string())
                }
                RequestError::ChannelClosed => {
                    Error::Connect("registration channel closed".to_string())
                }
            });
        }
    };

    let info = core_info_from(&body)?;
    if let Some(token) = body.as_json().and_then(|b| b.get("token")).and_then(Value::as_str) {
        *shared.token.lock() = Some(token.to_string());
    }
    *shared.core_info.lock() = Some(info.clone());
    *shared.status.lock() = ConnectionStatus::Connected;
    log::info!("registered with core {} ({})", info.core_id, info.display_name);
    shared.events.emit(CoreEvent::Registered(info.clone()));
    shared.events.emit(CoreEvent::CoreFound(info.clone()));
    Ok(info)
    })
}

/// Registration body: extension identity, advertised service lists, and
/// the saved token when present.
fn register_body(shared: &Shared) -> Value {
    let ext = &shared.config.extension;
    let mut body = json!({
        "extension_id": ext.extension_id,
        "display_name": ext.display_name,
        "display_version": ext.display_version,
        "publisher": ext.publisher,
        "email": ext.email,
        "required_services": shared.config.required_services,
        "optional_services": shared.config.optional_services,
        "provided_services": shared.registry.service_names(),
    });
    if let Some(token) = shared.token.lock().clone() {
        body["token"] = Value::String(token);
    }
    body
}

fn core_info_from(body: &Body) -> Result<CoreInfo> {
    let json = body.as_json().ok_or(Error::MalformedRegistration("body"))?;
    let core_id = json
        .get("core_id")
        .and_then(Value::as_str)
        .ok_or(Error::MalformedRegistration("core_id"))?;
    let display_name = json
        .get("display_name")
        .and_then(Value::as_str)
        .ok_or(Error::MalformedRegistration("display_name"))?;
    Ok(CoreInfo {
        core_id: core_id.to_string(),
        display_name: display_name.to_string(),
        display_version: json
            .get("display_version")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Drain the outbound queue into the current socket. Survives reconnects;
/// exits on shutdown.
async fn send_pump(shared: Arc<Shared>) {
    loop {
        let buf = {
            let mut rx = shared.outbound_rx.lock().await;
            tokio::select! {
                buf = rx.recv() => match buf {
                    Some(buf) => buf,
                    None => return,
                },
                _ = shared.shutdown.notified() => return,
            }
        };

        // Wait for a live socket when disconnected; queued frames belong
        // to requests that stay pending until reconnect.
        loop {
            if shared.explicitly_disconnected.load(Ordering::SeqCst) {
                return;
            }
            let mut slot = shared.transport.lock().await;
            match slot.as_mut() {
                Some(transport) => {
                    if let Err(err) = transport.send(buf).await {
                        log::warn!("websocket send failed: {err}");
                    }
                    break;
                }
                None => {
                    drop(slot);
                    tokio::time::sleep(SEND_RETRY_DELAY).await;
                }
            }
        }
    }
}

/// Parse and route inbound frames; drive the lost-connection path on
/// close or error.
async fn receive_pump(shared: Arc<Shared>, mut inbound: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = inbound.recv().await {
        match event {
            TransportEvent::Message(bytes) => {
                let Some(decoded) = parse(&bytes) else {
                    log::warn!("undecodable frame ({} bytes), dropping", bytes.len());
                    continue;
                };
                if decoded.consumed < bytes.len() {
                    log::debug!("{} trailing bytes after frame", bytes.len() - decoded.consumed);
                }
                let core = current_core_identity(&shared);
                shared.router.handle_frame(
                    decoded.frame,
                    &shared.events,
                    &shared.registry,
                    &shared.outbound_tx,
                    &core,
                );
            }
            TransportEvent::Closed { code, reason } => {
                let reason = if reason.is_empty() { "Connection closed".to_string() } else { reason };
                handle_connection_lost(&shared, reason, code).await;
                return;
            }
            TransportEvent::Error(err) => {
                handle_connection_lost(&shared, err, None).await;
                return;
            }
        }
    }
}

fn current_core_identity(shared: &Shared) -> CoreIdentity {
    match shared.core_info.lock().as_ref() {
        Some(info) => CoreIdentity { id: info.core_id.clone(), name: info.display_name.clone() },
        None => CoreIdentity { id: String::new(), name: String::new() },
    }
}

/// Close/error while running: fail pending, emit, and (when the loss
/// interrupted an established connection) kick off the reconnect loop.
async fn handle_connection_lost(shared: &Arc<Shared>, reason: String, code: Option<u16>) {
    if shared.explicitly_disconnected.load(Ordering::SeqCst) {
        return;
    }

    let was_connected = {
        let mut status = shared.status.lock();
        let was = *status == ConnectionStatus::Connected;
        *status = ConnectionStatus::Disconnected;
        was
    };

    log::debug!("failing {} pending requests", shared.router.pending_len());
    shared.router.fail_all();
    teardown_transport(shared).await;

    if !was_connected {
        // A connect attempt in progress surfaces its own error.
        return;
    }

    log::warn!("connection lost: {reason} (code {code:?})");
    shared.events.emit(CoreEvent::Disconnected { reason, code });

    if shared.config.auto_reconnect
        && shared
            .reconnect_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    {
        tokio::spawn(reconnect_loop(shared.clone()));
    }
}

async fn teardown_transport(shared: &Arc<Shared>) {
    let mut slot = shared.transport.lock().await;
    if let Some(mut transport) = slot.take() {
        transport.close().await;
        transport.abort();
    }
}

/// At most one of these runs per connection, guarded by
/// `reconnect_active`. Terminates on success or explicit disconnect.
async fn reconnect_loop(shared: Arc<Shared>) {
    let initial = shared.config.backoff_initial;
    let max = shared.config.backoff_max;
    let mut attempt: u32 = 1;

    loop {
        if shared.explicitly_disconnected.load(Ordering::SeqCst) {
            break;
        }
        let backoff = backoff_delay(attempt, initial, max);
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shared.shutdown.notified() => break,
        }
        if shared.explicitly_disconnected.load(Ordering::SeqCst) {
            break;
        }

        shared.events.emit(CoreEvent::Reconnecting {
            attempt,
            backoff_ms: backoff.as_millis() as u64,
        });
        match do_connect(&shared).await {
            Ok(info) => {
                shared.events.emit(CoreEvent::Reconnected(info));
                break;
            }
            Err(err) => {
                log::warn!("reconnect attempt {attempt} failed: {err}");
                attempt = attempt.saturating_add(1);
            }
        }
    }

    shared.reconnect_active.store(false, Ordering::SeqCst);
}

/// `min(max, initial * 2^(attempt-1))`, saturating.
fn backoff_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    let ms = (initial.as_millis() as u64).saturating_mul(1u64 << exp);
    Duration::from_millis(ms.min(max.as_millis() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let initial = Duration::from_millis(1000);
        let max = Duration::from_millis(60_000);
        let expected = [1000u64, 2000, 4000, 8000, 16_000, 32_000, 60_000, 60_000, 60_000];
        for (i, want) in expected.iter().enumerate() {
            let got = backoff_delay(i as u32 + 1, initial, max);
            assert_eq!(got, Duration::from_millis(*want), "attempt {}", i + 1);
        }
        // Large attempts stay held at the ceiling.
        assert_eq!(backoff_delay(1000, initial, max), max);
    }

    #[test]
    fn register_body_carries_identity_and_services() {
        let config = ConnectionConfig::builder("h")
            .extension(crate::config::ExtensionInfo {
                extension_id: "com.example.test".into(),
                display_name: "Test".into(),
                display_version: "1.0.0".into(),
                publisher: "Example".into(),
                email: "dev@example.com".into(),
            })
            .required_service("com.roonlabs.transport:2")
            .token("tok")
            .build();
        let (events, _rx) = EventSink::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(4);
        let token = config.token.clone();
        let registry = Registry::new();
        registry.register(ping_service());
        let shared = Shared {
            config,
            router: Router::new(),
            registry,
            events,
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
            transport: tokio::sync::Mutex::new(None),
            status: Mutex::new(ConnectionStatus::Disconnected),
            core_info: Mutex::new(None),
            token: Mutex::new(token),
            pairing: Arc::new(PairingState::new(None)),
            explicitly_disconnected: AtomicBool::new(false),
            reconnect_active: AtomicBool::new(false),
            shutdown: Notify::new(),
            first_events: Mutex::new(None),
        };

        let body = register_body(&shared);
        assert_eq!(body["extension_id"], "com.example.test");
        assert_eq!(body["token"], "tok");
        assert_eq!(body["required_services"], json!(["com.roonlabs.transport:2"]));
        assert_eq!(body["provided_services"], json!(["com.roonlabs.ping:1"]));
    }

    #[test]
    fn core_info_requires_id_and_name() {
        let ok = Body::Json(json!({
            "core_id": "abc",
            "display_name": "X",
            "display_version": "2.0",
        }));
        let info = core_info_from(&ok).expect("parses");
        assert_eq!(info.core_id, "abc");
        assert_eq!(info.display_version.as_deref(), Some("2.0"));

        assert!(core_info_from(&Body::Json(json!({"display_name": "X"}))).is_err());
        assert!(core_info_from(&Body::None).is_err());
    }
}
