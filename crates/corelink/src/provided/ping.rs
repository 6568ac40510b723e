// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Built-in ping responder. The Core uses it as a liveness probe.

use super::{ProvidedService, ServiceResponse};

/// Service path the Core pings.
pub const PING_SERVICE: &str = "com.roonlabs.ping:1";

/// Build the ping service: a single `ping` method answering
/// `COMPLETE Success` with no body.
pub fn ping_service() -> ProvidedService {
    ProvidedService::builder(PING_SERVICE)
        .method("ping", |_core, _body| ServiceResponse::complete("Success"))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moo::{parse, Body, Verb};
    use crate::provided::{CoreIdentity, Registry};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn ping_answers_complete_success_with_no_body() {
        let registry = Registry::new();
        registry.register(ping_service());
        let (tx, mut rx) = mpsc::channel(4);
        let core = CoreIdentity { id: "c".into(), name: "c".into() };

        registry.dispatch("com.roonlabs.ping:1/ping", 3, None, &core, &tx);

        let bytes = rx.try_recv().expect("response emitted");
        let frame = parse(&bytes).expect("decodes").frame;
        assert_eq!(frame.verb, Verb::Complete);
        assert_eq!(frame.name, "Success");
        assert_eq!(frame.request_id, Some(3));
        assert_eq!(frame.body, Body::None);
    }
}
