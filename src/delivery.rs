//! Connectivity state machine and the publish-or-spool decision.
//!
//! The engine owns the [`ConnectivityState`] and the [`Spool`]. Transitions
//! are evaluated once per cycle by [`DeliveryEngine::poll_connectivity`]:
//!
//! ```text
//!   Down ──net up──▶ NetworkUp ──session up──▶ TransportUp
//!    ▲                 ▲   │                       │
//!    └────net down─────┴───┘◀──session/net down────┘
//! ```
//!
//! Entering `TransportUp` replays the spool exactly once, before the
//! cycle's own record is delivered. Records are published only in
//! `TransportUp`; anything else, including a failed publish, is spooled.

use core::fmt;

use crate::record::EncodedRecord;
use crate::spool::{Appended, Drain, Spool, SpoolError, SpoolStore};

/// Link state as seen by the delivery engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectivityState {
    #[default]
    Down,
    NetworkUp,
    TransportUp,
}

impl ConnectivityState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectivityState::Down => "down",
            ConnectivityState::NetworkUp => "network-up",
            ConnectivityState::TransportUp => "transport-up",
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network link plus publish/subscribe session to the collector.
///
/// Every call is a bounded-time probe or attempt; none may block
/// indefinitely.
pub trait Transport {
    /// Network link (e.g. WiFi association) is up.
    fn is_network_up(&mut self) -> bool;
    /// Transport session is established. Implies the network is up.
    fn is_session_up(&mut self) -> bool;
    /// One session handshake attempt. Returns whether the session is up.
    fn connect(&mut self, client_id: &str) -> bool;
    /// Publish one record. `false` means it was not accepted.
    fn publish(&mut self, topic: &str, payload: &str) -> bool;
    /// Keepalive / inbound processing, called once per cycle.
    fn service(&mut self) {}
}

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted by the transport.
    Published,
    /// Appended to the spool.
    Spooled,
    /// Appended, but that pushed the spool over its cap and the whole
    /// spool (this record included) was discarded.
    Discarded,
    /// Publish was not possible and the spool write failed.
    Lost,
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub published: u32,
    pub spooled: u32,
    pub lost: u32,
    /// Spooled records later published by a drain
    pub replayed: u32,
    /// Whole-spool discards on overflow
    pub spool_resets: u32,
    pub drain_attempts: u32,
    pub connect_attempts: u32,
}

/// Owns connectivity state and the spool.
pub struct DeliveryEngine<S> {
    state: ConnectivityState,
    spool: Spool<S>,
    stats: DeliveryStats,
}

impl<S: SpoolStore> DeliveryEngine<S> {
    pub fn new(spool: Spool<S>) -> Self {
        Self {
            state: ConnectivityState::Down,
            spool,
            stats: DeliveryStats::default(),
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn stats(&self) -> DeliveryStats {
        self.stats
    }

    pub fn spool(&self) -> &Spool<S> {
        &self.spool
    }

    pub fn spool_mut(&mut self) -> &mut Spool<S> {
        &mut self.spool
    }

    /// Evaluate one transition and, on entering `TransportUp`, drain the
    /// spool through `transport`.
    ///
    /// Returns the drain outcome when a drain ran to a result; storage
    /// failures during the drain are logged and leave the spool for the
    /// next attempt.
    pub fn poll_connectivity<T>(
        &mut self,
        transport: &mut T,
        topic: &str,
        client_id: &str,
    ) -> Option<Drain>
    where
        T: Transport + ?Sized,
    {
        let prev = self.state;
        let next = self.next_state(transport, client_id);
        if next == prev {
            return None;
        }

        log::info!("connectivity {} -> {}", prev, next);
        self.state = next;

        if next == ConnectivityState::TransportUp {
            self.drain(transport, topic)
        } else {
            None
        }
    }

    fn next_state<T>(&mut self, transport: &mut T, client_id: &str) -> ConnectivityState
    where
        T: Transport + ?Sized,
    {
        use ConnectivityState::*;

        let network = transport.is_network_up();
        match self.state {
            Down if network => NetworkUp,
            Down => Down,
            NetworkUp | TransportUp if !network => Down,
            NetworkUp => {
                if transport.is_session_up() {
                    return TransportUp;
                }
                self.stats.connect_attempts = self.stats.connect_attempts.wrapping_add(1);
                log::debug!("transport connect as {}", client_id);
                if transport.connect(client_id) {
                    TransportUp
                } else {
                    NetworkUp
                }
            }
            TransportUp => {
                if transport.is_session_up() {
                    TransportUp
                } else {
                    NetworkUp
                }
            }
        }
    }

    fn drain<T>(&mut self, transport: &mut T, topic: &str) -> Option<Drain>
    where
        T: Transport + ?Sized,
    {
        self.stats.drain_attempts = self.stats.drain_attempts.wrapping_add(1);
        match self
            .spool
            .drain_and_replay(|line| transport.publish(topic, line))
        {
            Ok(outcome) => {
                if let Drain::Complete { replayed } | Drain::Interrupted { replayed } = outcome {
                    self.stats.replayed = self.stats.replayed.wrapping_add(replayed);
                }
                Some(outcome)
            }
            Err(e) => {
                log::error!("spool drain failed: {}", e);
                None
            }
        }
    }

    /// Publish `record` if the transport is up, otherwise (or if the
    /// publish fails) spool it. Never retries a failed publish in place.
    pub fn deliver<T>(&mut self, transport: &mut T, topic: &str, record: &EncodedRecord) -> Delivery
    where
        T: Transport + ?Sized,
    {
        if self.state == ConnectivityState::TransportUp {
            if transport.publish(topic, record.as_str()) {
                self.stats.published = self.stats.published.wrapping_add(1);
                return Delivery::Published;
            }
            log::warn!("publish failed, spooling record");
        }
        self.spool_record(record)
    }

    fn spool_record(&mut self, record: &EncodedRecord) -> Delivery {
        match self.spool.append(record) {
            Ok(Appended::Stored { .. }) => {
                self.stats.spooled = self.stats.spooled.wrapping_add(1);
                Delivery::Spooled
            }
            Ok(Appended::Discarded { .. }) => {
                self.stats.spool_resets = self.stats.spool_resets.wrapping_add(1);
                Delivery::Discarded
            }
            Err(e) => {
                self.log_lost(&e);
                Delivery::Lost
            }
        }
    }

    fn log_lost(&mut self, e: &SpoolError<S::Error>) {
        self.stats.lost = self.stats.lost.wrapping_add(1);
        log::error!("record lost: {}", e);
    }

    /// Count a record that never reached delivery (e.g. failed to encode).
    pub fn mark_lost(&mut self) {
        self.stats.lost = self.stats.lost.wrapping_add(1);
    }
}
