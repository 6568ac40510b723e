// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection configuration.
//!
//! Immutable at connect time. Built with [`ConnectionConfig::builder`];
//! every option has the documented default except `host`.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::provided::ProvidedService;

/// Default Core websocket port.
pub const DEFAULT_PORT: u16 = 9330;
/// Default request/registration timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(30_000);
/// Default first reconnect backoff.
pub const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_millis(1_000);
/// Default backoff ceiling.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_millis(60_000);

/// Callback invoked with the previously paired core id when a different
/// Core takes over the pairing.
pub type CoreLostCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Identity advertised during registration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ExtensionInfo {
    pub extension_id: String,
    pub display_name: String,
    pub display_version: String,
    pub publisher: String,
    pub email: String,
}

/// Everything a connection needs, fixed at connect time.
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub extension: ExtensionInfo,
    /// Saved token from a previous registration against this Core.
    pub token: Option<String>,
    pub timeout: Duration,
    pub auto_reconnect: bool,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    /// Service names this extension requires from the Core.
    pub required_services: Vec<String>,
    /// Service names this extension uses when available.
    pub optional_services: Vec<String>,
    /// Caller-supplied provided services, registered alongside the
    /// built-ins.
    pub services: Vec<ProvidedService>,
    pub on_core_lost: Option<CoreLostCallback>,
}

impl ConnectionConfig {
    pub fn builder(host: impl Into<String>) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            config: ConnectionConfig {
                host: host.into(),
                port: DEFAULT_PORT,
                extension: ExtensionInfo::default(),
                token: None,
                timeout: DEFAULT_REQUEST_TIMEOUT,
                auto_reconnect: true,
                backoff_initial: DEFAULT_BACKOFF_INITIAL,
                backoff_max: DEFAULT_BACKOFF_MAX,
                required_services: Vec::new(),
                optional_services: Vec::new(),
                services: Vec::new(),
                on_core_lost: None,
            },
        }
    }

    /// Websocket endpoint for this configuration.
    pub fn url(&self) -> String {
        format!("ws://{}:{}/api", self.host, self.port)
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("extension", &self.extension)
            .field("token", &self.token.as_deref().map(|_| "<set>"))
            .field("timeout", &self.timeout)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("backoff_initial", &self.backoff_initial)
            .field("backoff_max", &self.backoff_max)
            .field("services", &self.services.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ConnectionConfig`].
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn extension(mut self, extension: ExtensionInfo) -> Self {
        self.config.extension = extension;
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.config.token = Some(token.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.config.backoff_initial = initial;
        self.config.backoff_max = max;
        self
    }

    pub fn required_service(mut self, name: impl Into<String>) -> Self {
        self.config.required_services.push(name.into());
        self
    }

    pub fn optional_service(mut self, name: impl Into<String>) -> Self {
        self.config.optional_services.push(name.into());
        self
    }

    /// Add a provided service instance.
    pub fn provide(mut self, service: ProvidedService) -> Self {
        self.config.services.push(service);
        self
    }

    pub fn on_core_lost<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.config.on_core_lost = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = ConnectionConfig::builder("192.168.1.40").build();
        assert_eq!(config.port, 9330);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.auto_reconnect);
        assert_eq!(config.backoff_initial, Duration::from_secs(1));
        assert_eq!(config.backoff_max, Duration::from_secs(60));
        assert_eq!(config.url(), "ws://192.168.1.40:9330/api");
    }

    #[test]
    fn builder_overrides() {
        let config = ConnectionConfig::builder("core.local")
            .port(9100)
            .token("tok")
            .auto_reconnect(false)
            .backoff(Duration::from_millis(250), Duration::from_secs(5))
            .required_service("com.roonlabs.transport:2")
            .build();
        assert_eq!(config.url(), "ws://core.local:9100/api");
        assert_eq!(config.token.as_deref(), Some("tok"));
        assert!(!config.auto_reconnect);
        assert_eq!(config.required_services, vec!["com.roonlabs.transport:2".to_string()]);
    }
}
