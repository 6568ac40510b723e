// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Built-in pairing responder.
//!
//! Pairing state is owned per connection (one [`PairingState`] each), so
//! multiple concurrent clients in one process never interfere. The Core
//! calls `pair` to claim the extension; a previously paired, different
//! Core is reported through the configured core-lost callback exactly
//! once per change.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use super::{ProvidedService, ServiceResponse};
use crate::config::CoreLostCallback;
use crate::event::{CoreEvent, EventSink};

/// Service path for pairing.
pub const PAIRING_SERVICE: &str = "com.roonlabs.pairing:1";

/// Body value advertised to pairing subscribers while unpaired.
const UNPAIRED: &str = "undefined";

/// Which Core currently holds the pairing, if any.
#[derive(Debug, Default)]
pub struct PairingState {
    paired_core_id: Mutex<Option<String>>,
}

impl PairingState {
    pub fn new(initial: Option<String>) -> Self {
        Self { paired_core_id: Mutex::new(initial) }
    }

    pub fn paired_core_id(&self) -> Option<String> {
        self.paired_core_id.lock().clone()
    }

    /// Swap in a new paired core, returning the previous one.
    fn replace(&self, core_id: String) -> Option<String> {
        self.paired_core_id.lock().replace(core_id)
    }
}

/// Build the pairing service around a connection's state cell.
pub fn pairing_service(
    state: Arc<PairingState>,
    on_core_lost: Option<CoreLostCallback>,
    events: EventSink,
) -> ProvidedService {
    let get_state = state.clone();
    let pair_state = state.clone();
    let pair_events = events.clone();

    ProvidedService::builder(PAIRING_SERVICE)
        .method("get_pairing", move |_core, _body| match get_state.paired_core_id() {
            Some(id) => ServiceResponse::complete_with("Success", json!({ "paired_core_id": id })),
            None => ServiceResponse::complete("Success"),
        })
        .method("pair", move |core, _body| {
            let previous = pair_state.replace(core.id.clone());
            let changed = previous.as_deref() != Some(core.id.as_str());
            if changed {
                if let Some(old) = previous {
                    log::info!("pairing moved from core {old} to {}", core.id);
                    if let Some(cb) = &on_core_lost {
                        cb(&old);
                    }
                    pair_events.emit(CoreEvent::CoreLost { core_id: old });
                }
            }
            let body = json!({ "paired_core_id": core.id });
            pair_events.emit(CoreEvent::CorePaired { core_id: core.id.clone() });
            pair_events.emit(CoreEvent::PairingChanged(body.clone()));
            ServiceResponse::continue_with("Changed", body).with_broadcast("subscribe_pairing")
        })
        .subscription("subscribe_pairing", move |_core, _body| {
            let id = state.paired_core_id().unwrap_or_else(|| UNPAIRED.to_string());
            ServiceResponse::continue_with("Subscribed", json!({ "paired_core_id": id }))
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moo::{parse, Body, Verb};
    use crate::provided::{CoreIdentity, Registry};
    use parking_lot::Mutex as PlMutex;
    use tokio::sync::mpsc;

    fn core(id: &str) -> CoreIdentity {
        CoreIdentity { id: id.into(), name: format!("Core {id}") }
    }

    fn frame(rx: &mut mpsc::Receiver<Vec<u8>>) -> crate::moo::Frame {
        parse(&rx.try_recv().expect("frame emitted")).expect("decodes").frame
    }

    fn setup(
        on_core_lost: Option<CoreLostCallback>,
    ) -> (Registry, Arc<PairingState>, mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
        let (events, _events_rx) = EventSink::new();
        let state = Arc::new(PairingState::new(None));
        let registry = Registry::new();
        registry.register(pairing_service(state.clone(), on_core_lost, events));
        let (tx, rx) = mpsc::channel(8);
        (registry, state, tx, rx)
    }

    #[tokio::test]
    async fn get_pairing_reports_current_state() {
        let (registry, state, tx, mut rx) = setup(None);

        registry.dispatch("com.roonlabs.pairing:1/get_pairing", 2, None, &core("x"), &tx);
        assert_eq!(frame(&mut rx).body, Body::None);

        state.replace("c9".into());
        registry.dispatch("com.roonlabs.pairing:1/get_pairing", 3, None, &core("x"), &tx);
        assert_eq!(frame(&mut rx).body, Body::Json(json!({"paired_core_id": "c9"})));
    }

    #[tokio::test]
    async fn subscribe_pairing_advertises_undefined_when_unpaired() {
        let (registry, _state, tx, mut rx) = setup(None);

        registry.dispatch(
            "com.roonlabs.pairing:1/subscribe_pairing",
            4,
            Some(&json!({"subscription_key": 0})),
            &core("x"),
            &tx,
        );
        let f = frame(&mut rx);
        assert_eq!(f.verb, Verb::Continue);
        assert_eq!(f.name, "Subscribed");
        assert_eq!(f.body, Body::Json(json!({"paired_core_id": "undefined"})));
    }

    #[tokio::test]
    async fn pair_sequence_invokes_core_lost_once_and_broadcasts() {
        let lost: Arc<PlMutex<Vec<String>>> = Arc::new(PlMutex::new(Vec::new()));
        let sink = lost.clone();
        let cb: CoreLostCallback = Arc::new(move |id: &str| sink.lock().push(id.to_string()));
        let (registry, state, tx, mut rx) = setup(Some(cb));

        // A subscriber to observe the broadcasts.
        registry.dispatch(
            "com.roonlabs.pairing:1/subscribe_pairing",
            5,
            Some(&json!({"subscription_key": 0})),
            &core("c1"),
            &tx,
        );
        let _ = frame(&mut rx);

        registry.dispatch("com.roonlabs.pairing:1/pair", 6, None, &core("c1"), &tx);
        let direct = frame(&mut rx);
        assert_eq!(direct.verb, Verb::Continue);
        assert_eq!(direct.name, "Changed");
        assert_eq!(direct.body, Body::Json(json!({"paired_core_id": "c1"})));
        let broadcast = frame(&mut rx);
        assert_eq!(broadcast.request_id, Some(5));
        assert_eq!(broadcast.body, Body::Json(json!({"paired_core_id": "c1"})));
        assert!(lost.lock().is_empty());

        registry.dispatch("com.roonlabs.pairing:1/pair", 7, None, &core("c2"), &tx);
        let _ = frame(&mut rx);
        let broadcast = frame(&mut rx);
        assert_eq!(broadcast.body, Body::Json(json!({"paired_core_id": "c2"})));
        assert_eq!(lost.lock().as_slice(), ["c1"]);

        // Re-pairing the same core does not fire the callback again.
        registry.dispatch("com.roonlabs.pairing:1/pair", 8, None, &core("c2"), &tx);
        let _ = frame(&mut rx);
        let _ = frame(&mut rx);
        assert_eq!(lost.lock().as_slice(), ["c1"]);
        assert_eq!(state.paired_core_id().as_deref(), Some("c2"));
    }
}
