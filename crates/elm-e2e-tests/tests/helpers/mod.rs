//! Shared harness for end-to-end tests.
//!
//! Wires a scripted [`MockAdapter`] into a real [`ObdSession`], so every
//! test runs the production transaction layer, setup machine and decoder.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use elm_link::{LinkConfig, MockAdapter, ObdSession, SimulatedVehicle};
use elm_protocol::Protocol;
use elm_protocol::catalog::{self, Command};

/// A session plus the adapter behind it.
pub struct TestHarness {
    pub session: ObdSession,
    pub adapter: Arc<MockAdapter>,
}

impl TestHarness {
    /// Session on the default simulated petrol car, not yet set up.
    pub fn simulated() -> Self {
        Self::with_config(LinkConfig::default())
    }

    pub fn with_config(config: LinkConfig) -> Self {
        let (adapter, rx) = MockAdapter::simulated_vehicle();
        let session = ObdSession::new(adapter.clone(), rx, config);
        Self { session, adapter }
    }

    pub fn with_vehicle(vehicle: SimulatedVehicle, config: LinkConfig) -> Self {
        let (adapter, rx) = MockAdapter::with_vehicle(vehicle);
        let session = ObdSession::new(adapter.clone(), rx, config);
        Self { session, adapter }
    }

    /// Bare adapter with no vehicle; OBD requests must be scripted.
    pub fn bare(config: LinkConfig) -> Self {
        let (adapter, rx) = MockAdapter::new();
        let session = ObdSession::new(adapter.clone(), rx, config);
        Self { session, adapter }
    }

    /// Simulated car, already `Ready`.
    pub async fn ready() -> Self {
        let mut h = Self::simulated();
        h.session.setup().await.unwrap();
        h
    }

    /// Protocol numbers selected with `ATSPx`, in order.
    pub fn selected_protocols(&self) -> String {
        self.adapter
            .sent()
            .iter()
            .filter_map(|c| c.strip_prefix("ATSP"))
            .collect()
    }
}

/// Link settings with short setup timeouts.
pub fn fast_config(protocol: Protocol) -> LinkConfig {
    LinkConfig {
        protocol,
        setup_timeout_ms: 300,
        command_timeout_ms: 300,
        ..LinkConfig::default()
    }
}

pub fn cmd(request: &str) -> &'static Command {
    catalog::parse(request).unwrap()
}

pub const SHORT: Duration = Duration::from_millis(300);
