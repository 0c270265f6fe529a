//! Live-data polling loop.
//!
//! Each cycle runs the session's planned transactions one after another,
//! emits the decoded cycle and waits for the next tick. Shutdown is
//! checked before every transaction, so a request already on the wire is
//! allowed to finish or time out, and a cycle cut short is not emitted.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};
use uuid::Uuid;

use elm_protocol::catalog::{self, Command, CommandKey};
use elm_protocol::Measurement;

use crate::error::{LinkError, LinkResult};
use crate::session::ObdSession;

/// One decoded value in a poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    /// Request string, e.g. `010C`.
    pub command: String,
    pub name: &'static str,
    pub measurement: Measurement,
}

/// Everything one cycle produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollCycle {
    pub session_id: Uuid,
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub elapsed_ms: u64,
    /// In the order the commands were configured.
    pub readings: Vec<Reading>,
}

/// Polls a fixed command list at a fixed interval.
#[derive(Debug, Clone)]
pub struct Poller {
    commands: Vec<&'static Command>,
    interval: Duration,
    max_cycles: Option<u64>,
}

impl Poller {
    pub fn new(commands: Vec<&'static Command>, interval: Duration) -> Self {
        Self {
            commands,
            interval,
            max_cycles: None,
        }
    }

    /// Stop on its own after `max` emitted cycles.
    pub fn with_max_cycles(mut self, max: Option<u64>) -> Self {
        self.max_cycles = max;
        self
    }

    /// Build from request strings such as `"010C"`. Unknown requests are
    /// rejected up front.
    pub fn from_requests<S: AsRef<str>>(requests: &[S], interval: Duration) -> LinkResult<Self> {
        let commands = requests
            .iter()
            .map(|r| {
                catalog::parse(r.as_ref()).ok_or_else(|| {
                    LinkError::InvalidCommand(format!("unknown OBD request {:?}", r.as_ref()))
                })
            })
            .collect::<LinkResult<Vec<_>>>()?;
        Ok(Self::new(commands, interval))
    }

    pub fn commands(&self) -> &[&'static Command] {
        &self.commands
    }

    /// Run until `shutdown` turns true (or its sender goes away), the
    /// cycle receiver is dropped, the cycle limit is reached, or the
    /// session stops being ready.
    /// Returns the number of cycles emitted.
    ///
    /// A timed-out transaction yields no-results for its commands. Other
    /// transport hiccups skip the cycle and the next one runs as usual.
    pub async fn run(
        &self,
        session: &ObdSession,
        cycles: mpsc::Sender<PollCycle>,
        mut shutdown: watch::Receiver<bool>,
    ) -> LinkResult<u64> {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut emitted = 0u64;

        tracing::info!(
            session_id = %session.id(),
            commands = self.commands.len(),
            interval_ms = self.interval.as_millis() as u64,
            "polling started"
        );

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
            if *shutdown.borrow() {
                break;
            }

            let started = time::Instant::now();
            let results = match self.poll_once(session, &shutdown).await {
                Ok(Some(results)) => results,
                Ok(None) => {
                    tracing::info!(session_id = %session.id(), "shutdown during cycle, partial cycle dropped");
                    break;
                }
                Err(LinkError::NotReady) => {
                    tracing::warn!(session_id = %session.id(), "session not ready, polling stopped");
                    return Err(LinkError::NotReady);
                }
                Err(LinkError::Closed) => {
                    tracing::warn!(session_id = %session.id(), "adapter connection closed, polling stopped");
                    return Err(LinkError::Closed);
                }
                Err(e) => {
                    tracing::warn!(session_id = %session.id(), error = %e, "poll cycle failed");
                    continue;
                }
            };

            emitted += 1;
            let cycle = PollCycle {
                session_id: session.id(),
                cycle: emitted,
                timestamp: Utc::now(),
                elapsed_ms: started.elapsed().as_millis() as u64,
                readings: self
                    .commands
                    .iter()
                    .map(|c| Reading {
                        command: c.request(),
                        name: c.name,
                        measurement: results
                            .get(&c.key())
                            .cloned()
                            .unwrap_or(Measurement::NoResult),
                    })
                    .collect(),
            };
            tracing::debug!(cycle = emitted, elapsed_ms = cycle.elapsed_ms, "poll cycle");

            if cycles.send(cycle).await.is_err() {
                tracing::debug!("cycle receiver dropped");
                break;
            }
            if self.max_cycles.is_some_and(|max| emitted >= max) {
                break;
            }
        }

        tracing::info!(session_id = %session.id(), cycles = emitted, "polling stopped");
        Ok(emitted)
    }

    /// Run one cycle's transactions. `None` when shutdown was requested
    /// before the last of them started.
    async fn poll_once(
        &self,
        session: &ObdSession,
        shutdown: &watch::Receiver<bool>,
    ) -> LinkResult<Option<HashMap<CommandKey, Measurement>>> {
        let mut results = HashMap::with_capacity(self.commands.len());
        for batch in session.plan(&self.commands)? {
            if *shutdown.borrow() {
                return Ok(None);
            }
            for (key, result) in session.request_batch(&batch).await? {
                let measurement = result.unwrap_or_else(|error| {
                    tracing::debug!(command = %key, error = %error, "no result");
                    Measurement::NoResult
                });
                results.insert(key, measurement);
            }
        }
        Ok(Some(results))
    }
}
