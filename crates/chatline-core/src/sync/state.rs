//! Connection state machine
//!
//! Pure bookkeeping for one logical connection: status, attempt counter,
//! generation, last error and the bounded outbound queue. The async actor in
//! `manager` drives it; nothing here touches the network or the clock.
//!
//! ```text
//! Disconnected ──start──▶ Connecting ──open──▶ Connected
//!      ▲                     │  ▲                  │
//!      │ give up             │  │ retry due        │ close/error
//!      └──────────────── Reconnecting ◀────────────┘
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::message::ClientEnvelope;

/// Connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Not connected, not trying
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Connected and ready
    Connected,
    /// Waiting out the backoff delay before the next attempt
    Reconnecting,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Reconnect and queueing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionPolicy {
    /// Delay before attempt `n` is `base_delay * n`
    pub base_delay: Duration,
    /// Attempts after a failure before giving up
    pub max_attempts: u32,
    /// Envelopes held while not connected
    pub queue_capacity: usize,
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_attempts: 5,
            queue_capacity: 64,
        }
    }
}

/// What to do after a connection attempt failed or a live link dropped
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// Schedule attempt `attempt` after `delay`
    Retry { attempt: u32, delay: Duration },
    /// Retry cap exceeded; `dropped` are the envelopes that will never be sent
    GiveUp {
        attempts: u32,
        dropped: Vec<ClientEnvelope>,
    },
}

/// Outcome of handing an envelope to the connection
#[derive(Debug, Clone, PartialEq)]
pub enum Enqueued {
    /// Connected: write it now
    SendNow(ClientEnvelope),
    /// Held for the next connection; `dropped` is the oldest envelope evicted to make room
    Queued { dropped: Option<ClientEnvelope> },
}

/// Connection bookkeeping
#[derive(Debug)]
pub struct ConnectionState {
    policy: ConnectionPolicy,
    status: ConnectionStatus,
    generation: u64,
    attempt: u32,
    queue: VecDeque<ClientEnvelope>,
}

impl ConnectionState {
    /// Create a disconnected state
    pub fn new(policy: ConnectionPolicy) -> Self {
        Self {
            policy,
            status: ConnectionStatus::Disconnected,
            generation: 0,
            attempt: 0,
            queue: VecDeque::new(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn policy(&self) -> &ConnectionPolicy {
        &self.policy
    }

    /// Envelopes waiting for a connection, oldest first
    pub fn queued(&self) -> impl Iterator<Item = &ClientEnvelope> {
        self.queue.iter()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Whether `generation` belongs to the current attempt
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// Begin a fresh connection (new session or manual retry)
    ///
    /// Resets the attempt counter; queued envelopes are kept so they flush
    /// once connected. Returns the generation of the new attempt.
    pub fn start(&mut self) -> u64 {
        self.attempt = 0;
        self.status = ConnectionStatus::Connecting;
        self.advance()
    }

    /// The attempt tagged `generation` produced an open link
    ///
    /// Returns the queued envelopes to flush, in FIFO order, or `None` if
    /// the generation is stale.
    pub fn on_open(&mut self, generation: u64) -> Option<Vec<ClientEnvelope>> {
        if !self.is_current(generation) || self.status != ConnectionStatus::Connecting {
            return None;
        }
        self.status = ConnectionStatus::Connected;
        self.attempt = 0;
        Some(self.queue.drain(..).collect())
    }

    /// The attempt or link tagged `generation` failed
    ///
    /// Returns `None` for stale generations.
    pub fn on_failure(&mut self, generation: u64) -> Option<Failure> {
        if !self.is_current(generation)
            || !matches!(
                self.status,
                ConnectionStatus::Connecting | ConnectionStatus::Connected
            )
        {
            return None;
        }

        self.attempt += 1;

        if self.attempt > self.policy.max_attempts {
            let attempts = self.attempt - 1;
            self.status = ConnectionStatus::Disconnected;
            self.attempt = 0;
            self.advance();
            return Some(Failure::GiveUp {
                attempts,
                dropped: self.queue.drain(..).collect(),
            });
        }

        self.status = ConnectionStatus::Reconnecting;
        Some(Failure::Retry {
            attempt: self.attempt,
            delay: self.policy.base_delay * self.attempt,
        })
    }

    /// The backoff timer tagged `generation` fired
    ///
    /// Returns the generation of the new attempt, or `None` if the timer is stale.
    pub fn on_retry_due(&mut self, generation: u64) -> Option<u64> {
        if !self.is_current(generation) || self.status != ConnectionStatus::Reconnecting {
            return None;
        }
        self.status = ConnectionStatus::Connecting;
        Some(self.advance())
    }

    /// Hand an envelope to the connection
    pub fn enqueue(&mut self, envelope: ClientEnvelope) -> Enqueued {
        if self.status == ConnectionStatus::Connected {
            return Enqueued::SendNow(envelope);
        }

        self.queue.push_back(envelope);
        let dropped = if self.queue.len() > self.policy.queue_capacity {
            self.queue.pop_front()
        } else {
            None
        };
        Enqueued::Queued { dropped }
    }

    /// Put envelopes that could not be written back at the head of the queue
    pub fn requeue_front(&mut self, envelopes: Vec<ClientEnvelope>) {
        for envelope in envelopes.into_iter().rev() {
            self.queue.push_front(envelope);
        }
    }

    /// Hard teardown: invalidate every outstanding attempt and clear the queue
    pub fn disconnect(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.attempt = 0;
        self.queue.clear();
        self.advance();
    }

    fn advance(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}
