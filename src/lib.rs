//! Observer library: portable capture-to-delivery pipeline for radio frames.
//!
//! Captures frames from a packet receiver, enriches each with signal
//! quality, timing and a content fingerprint, and forwards the record to a
//! remote collector. When the link is down records are spooled to a bounded
//! append-only log and replayed, oldest first, once the transport returns.
//! Platform binaries (ESP32 firmware, host simulators) are thin consumers
//! that provide the radio, the transport and the spool storage.
//!
//! Modules, in cycle order:
//! - `mailbox`: single-slot "frame pending" handoff from the receive ISR
//! - `capture`: reads one frame and its metadata from the radio
//! - `fingerprint`: coarse FNV-1a dedup hint over the leading bytes
//! - `record`: canonical NDJSON record encoding, truncation policy
//! - `delivery`: connectivity state machine and publish-or-spool decision
//! - `spool`: bounded log with whole-log discard and resumable replay
//! - `pipeline`: the [`Observer`](pipeline::Observer) cycle
//! - `config`: typed, validated device configuration
//!
//! The core is `no_std` and allocation-free. The `std` feature adds a file
//! spool backend, a boot clock and a blocking cycle runner.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod capture;
pub mod config;
pub mod delivery;
pub mod fingerprint;
pub mod mailbox;
pub mod pipeline;
pub mod record;
pub mod spool;

#[cfg(test)]
mod testutil;

pub use capture::{CapturedFrame, Clock, FrameCapture, FrameSource};
pub use config::ObserverConfig;
pub use delivery::{ConnectivityState, Delivery, DeliveryEngine, Transport};
pub use mailbox::RxMailbox;
pub use pipeline::{CycleReport, Observer};
pub use record::{EncodedRecord, FrameEncoder};
pub use spool::{Spool, SpoolStore};
