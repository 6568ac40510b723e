// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Persisted pairing state: registration tokens per Core plus the paired
//! core id.
//!
//! This module is a pure data transform. Serialization is human-readable
//! JSON; reading and writing the bytes is the caller's concern.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::ConnectionConfig;

/// The single persisted value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PersistedState {
    /// Registration token per core id.
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,
    /// Core currently holding the pairing, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paired_core_id: Option<String>,
}

impl PersistedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Saved token for a core, if any.
    pub fn token_for(&self, core_id: &str) -> Option<&str> {
        self.tokens.get(core_id).map(String::as_str)
    }

    /// Record the token handed out by a Core during registration.
    pub fn absorb(&mut self, core_id: impl Into<String>, token: impl Into<String>) {
        self.tokens.insert(core_id.into(), token.into());
    }

    /// Drop the token for a core (revoked authorization).
    pub fn forget(&mut self, core_id: &str) {
        self.tokens.remove(core_id);
    }

    pub fn set_paired_core_id(&mut self, core_id: Option<String>) {
        self.paired_core_id = core_id;
    }

    /// Produce `config` with the saved token for `core_id` injected, iff
    /// one is present. An already configured token is replaced.
    pub fn apply(&self, mut config: ConnectionConfig, core_id: &str) -> ConnectionConfig {
        if let Some(token) = self.token_for(core_id) {
            config.token = Some(token.to_string());
        }
        config
    }

    /// Serialize to human-readable JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Deserialize from JSON produced by [`Self::to_json`].
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }
}
