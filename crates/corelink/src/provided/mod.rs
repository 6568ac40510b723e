// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Provided services: the client acting as a server for requests the Core
//! initiates.
//!
//! A [`ProvidedService`] maps method names to handlers and subscription
//! names to start/end handlers. The [`Registry`] routes inbound `REQUEST`
//! frames to the right handler, tracks the Core's active subscriptions,
//! and fans broadcasts out to every current subscriber.

mod pairing;
mod ping;

pub use pairing::{pairing_service, PairingState, PAIRING_SERVICE};
pub use ping::{ping_service, PING_SERVICE};

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::moo::{encode_response, Verb};

/// Normalized identity of the Core invoking a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreIdentity {
    pub id: String,
    pub name: String,
}

/// Verb of a handler's response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseVerb {
    Continue,
    Complete,
}

impl From<ResponseVerb> for Verb {
    fn from(v: ResponseVerb) -> Verb {
        match v {
            ResponseVerb::Continue => Verb::Continue,
            ResponseVerb::Complete => Verb::Complete,
        }
    }
}

/// What a handler answers with, plus an optional broadcast trigger.
#[derive(Debug, Clone)]
pub struct ServiceResponse {
    pub verb: ResponseVerb,
    pub name: String,
    pub body: Option<Value>,
    /// When set to a subscription name, the response body is also pushed
    /// to every current subscriber of that subscription.
    pub broadcast: Option<String>,
}

impl ServiceResponse {
    /// `COMPLETE <name>` with no body.
    pub fn complete(name: impl Into<String>) -> Self {
        Self { verb: ResponseVerb::Complete, name: name.into(), body: None, broadcast: None }
    }

    /// `COMPLETE <name>` with a JSON body.
    pub fn complete_with(name: impl Into<String>, body: Value) -> Self {
        Self { verb: ResponseVerb::Complete, name: name.into(), body: Some(body), broadcast: None }
    }

    /// `CONTINUE <name>` with a JSON body.
    pub fn continue_with(name: impl Into<String>, body: Value) -> Self {
        Self { verb: ResponseVerb::Continue, name: name.into(), body: Some(body), broadcast: None }
    }

    /// Trigger a broadcast on `subscription` after this response is sent.
    pub fn with_broadcast(mut self, subscription: impl Into<String>) -> Self {
        self.broadcast = Some(subscription.into());
        self
    }
}

/// Handler for one inbound method call.
pub type MethodHandler = Arc<dyn Fn(&CoreIdentity, Option<&Value>) -> ServiceResponse + Send + Sync>;

struct SubscriptionHandlers {
    start: MethodHandler,
    end: Option<MethodHandler>,
}

/// One service the client provides to the Core.
pub struct ProvidedService {
    name: String,
    methods: HashMap<String, MethodHandler>,
    subscriptions: HashMap<String, SubscriptionHandlers>,
}

impl ProvidedService {
    pub fn builder(name: impl Into<String>) -> ProvidedServiceBuilder {
        ProvidedServiceBuilder {
            name: name.into(),
            methods: HashMap::new(),
            subscriptions: HashMap::new(),
        }
    }

    /// Service name, e.g. `com.roonlabs.ping:1`.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Builder for [`ProvidedService`].
pub struct ProvidedServiceBuilder {
    name: String,
    methods: HashMap<String, MethodHandler>,
    subscriptions: HashMap<String, SubscriptionHandlers>,
}

impl ProvidedServiceBuilder {
    /// Register a method handler.
    pub fn method<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&CoreIdentity, Option<&Value>) -> ServiceResponse + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(handler));
        self
    }

    /// Register a subscription start handler (name like `subscribe_pairing`).
    pub fn subscription<F>(mut self, name: impl Into<String>, start: F) -> Self
    where
        F: Fn(&CoreIdentity, Option<&Value>) -> ServiceResponse + Send + Sync + 'static,
    {
        self.subscriptions.insert(
            name.into(),
            SubscriptionHandlers { start: Arc::new(start), end: None },
        );
        self
    }

    /// Register a subscription with an explicit end handler.
    pub fn subscription_with_end<F, G>(mut self, name: impl Into<String>, start: F, end: G) -> Self
    where
        F: Fn(&CoreIdentity, Option<&Value>) -> ServiceResponse + Send + Sync + 'static,
        G: Fn(&CoreIdentity, Option<&Value>) -> ServiceResponse + Send + Sync + 'static,
    {
        self.subscriptions.insert(
            name.into(),
            SubscriptionHandlers { start: Arc::new(start), end: Some(Arc::new(end)) },
        );
        self
    }

    pub fn build(self) -> ProvidedService {
        ProvidedService {
            name: self.name,
            methods: self.methods,
            subscriptions: self.subscriptions,
        }
    }
}

/// A subscription the Core holds on one of our provided services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvidedSubscription {
    /// Subscription name, e.g. `subscribe_pairing`.
    pub topic: String,
    /// The Core's request id, used as the correlator for broadcasts.
    pub request_id: u64,
}

/// Registry of provided services plus the Core's active subscriptions.
pub struct Registry {
    services: DashMap<String, Arc<ProvidedService>>,
    /// Keyed by the Core-supplied subscription key.
    subscribers: DashMap<u64, ProvidedSubscription>,
}

impl Registry {
    pub fn new() -> Self {
        Self { services: DashMap::new(), subscribers: DashMap::new() }
    }

    /// Install a service. Re-registering a name replaces the previous
    /// definition.
    pub fn register(&self, service: ProvidedService) {
        log::debug!("provided-service registry: registered {:?}", service.name);
        self.services.insert(service.name.clone(), Arc::new(service));
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<ProvidedService>> {
        self.services.get(name).map(|s| Arc::clone(s.value()))
    }

    /// Names of all registered services (advertised during registration).
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.iter().map(|s| s.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of active provided subscriptions (all topics).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Dispatch one inbound `REQUEST`.
    ///
    /// `uri` splits at the last `/` into service name and method. Misses
    /// at any step are logged and dropped without a response; the Core
    /// times out its own request.
    pub fn dispatch(
        &self,
        uri: &str,
        request_id: u64,
        body: Option<&Value>,
        core: &CoreIdentity,
        outbound: &mpsc::Sender<Vec<u8>>,
    ) {
        let Some((service_name, method)) = uri.rsplit_once('/') else {
            log::warn!("inbound request without method path: {uri:?}, dropping");
            return;
        };
        let Some(service) = self.lookup(service_name) else {
            log::warn!("inbound request for unknown service {service_name:?}, dropping");
            return;
        };

        if let Some(handler) = service.methods.get(method) {
            let response = handler(core, body);
            self.respond(request_id, &response, outbound);
            if let Some(subscription) = &response.broadcast {
                self.broadcast(subscription, response.body.as_ref().unwrap_or(&Value::Null), outbound);
            }
            return;
        }

        if let Some(sub) = service.subscriptions.get(method) {
            match body.and_then(|b| b.get("subscription_key")).and_then(Value::as_u64) {
                Some(key) => {
                    self.subscribers.insert(
                        key,
                        ProvidedSubscription { topic: method.to_string(), request_id },
                    );
                }
                None => log::warn!("subscription start {uri:?} without subscription_key"),
            }
            let response = (sub.start)(core, body);
            self.respond(request_id, &response, outbound);
            return;
        }

        if let Some(topic) = method.strip_prefix("unsubscribe_") {
            let subscribe_name = format!("subscribe_{topic}");
            if let Some(sub) = service.subscriptions.get(&subscribe_name) {
                if let Some(key) = body.and_then(|b| b.get("subscription_key")).and_then(Value::as_u64)
                {
                    self.subscribers.remove(&key);
                }
                match &sub.end {
                    Some(end) => {
                        let response = end(core, body);
                        self.respond(request_id, &response, outbound);
                    }
                    None => self.respond(request_id, &ServiceResponse::complete("Success"), outbound),
                }
                return;
            }
        }

        log::warn!("no handler for inbound request {uri:?}, dropping");
    }

    /// Push `body` to every subscriber of `subscription_name` as a
    /// `CONTINUE Changed` correlated with each subscriber's request id.
    pub fn broadcast(&self, subscription_name: &str, body: &Value, outbound: &mpsc::Sender<Vec<u8>>) {
        for entry in self.subscribers.iter() {
            if entry.topic != subscription_name {
                continue;
            }
            let bytes = encode_response(Verb::Continue, "Changed", entry.request_id, Some(body));
            if let Err(e) = outbound.try_send(bytes) {
                log::warn!("broadcast on {subscription_name:?} dropped: {e}");
            }
        }
    }

    fn respond(&self, request_id: u64, response: &ServiceResponse, outbound: &mpsc::Sender<Vec<u8>>) {
        let bytes = encode_response(
            response.verb.into(),
            &response.name,
            request_id,
            response.body.as_ref(),
        );
        if let Err(e) = outbound.try_send(bytes) {
            log::warn!("response {:?} for request {request_id} dropped: {e}", response.name);
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moo::{parse, Body};
    use serde_json::json;

    fn core() -> CoreIdentity {
        CoreIdentity { id: "core-1".into(), name: "Test Core".into() }
    }

    fn echo_service() -> ProvidedService {
        ProvidedService::builder("com.example.echo:1")
            .method("echo", |_core, body| {
                ServiceResponse::complete_with("Success", body.cloned().unwrap_or(Value::Null))
            })
            .subscription("subscribe_things", |_core, _body| {
                ServiceResponse::continue_with("Subscribed", json!({"things": []}))
            })
            .build()
    }

    fn recv_frame(rx: &mut mpsc::Receiver<Vec<u8>>) -> crate::moo::Frame {
        let bytes = rx.try_recv().expect("a frame was emitted");
        parse(&bytes).expect("emitted frame decodes").frame
    }

    #[test]
    fn register_is_idempotent_and_replaces() {
        let registry = Registry::new();
        registry.register(echo_service());
        registry.register(echo_service());
        assert_eq!(registry.service_names(), vec!["com.example.echo:1".to_string()]);
    }

    #[tokio::test]
    async fn method_dispatch_emits_handler_response() {
        let registry = Registry::new();
        registry.register(echo_service());
        let (tx, mut rx) = mpsc::channel(4);

        registry.dispatch("com.example.echo:1/echo", 3, Some(&json!({"x": 1})), &core(), &tx);

        let frame = recv_frame(&mut rx);
        assert_eq!(frame.verb, Verb::Complete);
        assert_eq!(frame.name, "Success");
        assert_eq!(frame.request_id, Some(3));
        assert_eq!(frame.body, Body::Json(json!({"x": 1})));
    }

    #[tokio::test]
    async fn subscription_start_records_subscriber() {
        let registry = Registry::new();
        registry.register(echo_service());
        let (tx, mut rx) = mpsc::channel(4);

        registry.dispatch(
            "com.example.echo:1/subscribe_things",
            7,
            Some(&json!({"subscription_key": 4})),
            &core(),
            &tx,
        );

        let frame = recv_frame(&mut rx);
        assert_eq!(frame.name, "Subscribed");
        assert_eq!(registry.subscriber_count(), 1);

        registry.broadcast("subscribe_things", &json!({"things": [1]}), &tx);
        let frame = recv_frame(&mut rx);
        assert_eq!(frame.verb, Verb::Continue);
        assert_eq!(frame.name, "Changed");
        assert_eq!(frame.request_id, Some(7));
        assert_eq!(frame.body, Body::Json(json!({"things": [1]})));
    }

    #[tokio::test]
    async fn unsubscribe_removes_tracking_and_answers_success() {
        let registry = Registry::new();
        registry.register(echo_service());
        let (tx, mut rx) = mpsc::channel(4);

        registry.dispatch(
            "com.example.echo:1/subscribe_things",
            7,
            Some(&json!({"subscription_key": 4})),
            &core(),
            &tx,
        );
        let _ = recv_frame(&mut rx);

        registry.dispatch(
            "com.example.echo:1/unsubscribe_things",
            8,
            Some(&json!({"subscription_key": 4})),
            &core(),
            &tx,
        );
        let frame = recv_frame(&mut rx);
        assert_eq!(frame.verb, Verb::Complete);
        assert_eq!(frame.name, "Success");
        assert_eq!(frame.request_id, Some(8));
        assert_eq!(frame.body, Body::None);
        assert_eq!(registry.subscriber_count(), 0);

        // Broadcast after unsubscribe reaches nobody.
        registry.broadcast("subscribe_things", &json!({}), &tx);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dispatch_misses_emit_nothing() {
        let registry = Registry::new();
        registry.register(echo_service());
        let (tx, mut rx) = mpsc::channel(4);

        registry.dispatch("no-slash", 1, None, &core(), &tx);
        registry.dispatch("com.example.other:1/echo", 2, None, &core(), &tx);
        registry.dispatch("com.example.echo:1/missing", 3, None, &core(), &tx);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn method_broadcast_flag_fans_out_response_body() {
        let registry = Registry::new();
        registry.register(
            ProvidedService::builder("com.example.state:1")
                .method("poke", |_core, _body| {
                    ServiceResponse::continue_with("Changed", json!({"state": 2}))
                        .with_broadcast("subscribe_state")
                })
                .subscription("subscribe_state", |_core, _body| {
                    ServiceResponse::continue_with("Subscribed", json!({"state": 1}))
                })
                .build(),
        );
        let (tx, mut rx) = mpsc::channel(8);

        registry.dispatch(
            "com.example.state:1/subscribe_state",
            20,
            Some(&json!({"subscription_key": 0})),
            &core(),
            &tx,
        );
        let _ = recv_frame(&mut rx);

        registry.dispatch("com.example.state:1/poke", 21, None, &core(), &tx);
        let direct = recv_frame(&mut rx);
        assert_eq!(direct.request_id, Some(21));
        let broadcast = recv_frame(&mut rx);
        assert_eq!(broadcast.request_id, Some(20));
        assert_eq!(broadcast.name, "Changed");
        assert_eq!(broadcast.body, Body::Json(json!({"state": 2})));
    }
}
