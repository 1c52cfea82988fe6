//! The observer cycle: connectivity → capture → fingerprint → encode →
//! deliver → re-arm.
//!
//! [`Observer`] is the explicit context struct built once at startup; it
//! holds the validated configuration and the components, and is driven by
//! a single logical thread calling [`Observer::cycle`]. The receive
//! interrupt only ever touches the [`RxMailbox`].

#[cfg(feature = "std")]
use core::sync::atomic::{AtomicBool, Ordering};

use crate::capture::{CaptureStats, Clock, FrameCapture, FrameSource};
use crate::config::ObserverConfig;
use crate::delivery::{ConnectivityState, Delivery, DeliveryEngine, DeliveryStats, Transport};
use crate::fingerprint::fingerprint;
use crate::mailbox::RxMailbox;
use crate::record::FrameEncoder;
use crate::spool::{Drain, Spool, SpoolStore};

/// What one cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Connectivity after this cycle's transition
    pub state: ConnectivityState,
    /// Outcome of the spool drain, if the cycle entered `TransportUp`
    pub drain: Option<Drain>,
    /// Fate of the captured frame, if one was pending
    pub delivery: Option<Delivery>,
}

pub struct Observer<'m, S> {
    config: ObserverConfig,
    capture: FrameCapture<'m>,
    encoder: FrameEncoder,
    delivery: DeliveryEngine<S>,
    coalesced_seen: u32,
}

impl<'m, S: SpoolStore> Observer<'m, S> {
    /// Wire up an observer. The spool is capped at `config.spool_cap()`.
    pub fn new(config: ObserverConfig, mailbox: &'m RxMailbox, store: S) -> Self {
        let spool = Spool::new(store, config.spool_cap());
        log::info!(
            "observer {} ({}) publishing to {}",
            config.device_id(),
            config.display_name(),
            config.topic()
        );
        Self {
            config,
            capture: FrameCapture::new(mailbox),
            encoder: FrameEncoder::new(),
            delivery: DeliveryEngine::new(spool),
            coalesced_seen: 0,
        }
    }

    pub fn with_encoder(mut self, encoder: FrameEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn config(&self) -> &ObserverConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectivityState {
        self.delivery.state()
    }

    pub fn capture_stats(&self) -> CaptureStats {
        self.capture.stats()
    }

    pub fn delivery_stats(&self) -> DeliveryStats {
        self.delivery.stats()
    }

    pub fn delivery(&self) -> &DeliveryEngine<S> {
        &self.delivery
    }

    pub fn delivery_mut(&mut self) -> &mut DeliveryEngine<S> {
        &mut self.delivery
    }

    /// Run one non-blocking cycle.
    pub fn cycle<R, T, C>(&mut self, source: &mut R, transport: &mut T, clock: &C) -> CycleReport
    where
        R: FrameSource + ?Sized,
        T: Transport + ?Sized,
        C: Clock + ?Sized,
    {
        // Drain (if any) runs before this cycle's frame is delivered.
        let drain = self.delivery.poll_connectivity(
            transport,
            self.config.topic(),
            self.config.client_id(),
        );

        let delivery = self.capture.poll(source, clock).map(|frame| {
            let fp = fingerprint(&frame.payload);
            let outcome = match self.encoder.encode(&frame, fp, &self.config.identity()) {
                Ok(record) => self.delivery.deliver(transport, self.config.topic(), &record),
                Err(e) => {
                    log::error!("dropping frame: {}", e);
                    self.delivery.mark_lost();
                    Delivery::Lost
                }
            };
            source.rearm_receive();
            outcome
        });

        let coalesced = self.capture.coalesced();
        if coalesced != self.coalesced_seen {
            log::warn!(
                "{} rx notifications coalesced",
                coalesced.wrapping_sub(self.coalesced_seen)
            );
            self.coalesced_seen = coalesced;
        }

        transport.service();

        CycleReport {
            state: self.delivery.state(),
            drain,
            delivery,
        }
    }

    /// Cycle until `stop` is raised, idling [`CYCLE_IDLE_MS`] between
    /// cycles.
    ///
    /// [`CYCLE_IDLE_MS`]: crate::config::CYCLE_IDLE_MS
    #[cfg(feature = "std")]
    pub fn run_until<R, T, C>(
        &mut self,
        source: &mut R,
        transport: &mut T,
        clock: &C,
        stop: &AtomicBool,
    ) where
        R: FrameSource + ?Sized,
        T: Transport + ?Sized,
        C: Clock + ?Sized,
    {
        let idle = std::time::Duration::from_millis(crate::config::CYCLE_IDLE_MS);
        while !stop.load(Ordering::Relaxed) {
            self.cycle(source, transport, clock);
            std::thread::sleep(idle);
        }
        log::info!("observer stopped");
    }
}
