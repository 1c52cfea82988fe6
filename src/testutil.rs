//! Test doubles for the radio, transport, spool backend and clock.

use std::cell::Cell;
use std::collections::VecDeque;
use std::string::String;
use std::vec::Vec;

use crate::capture::{Clock, FrameSource};
use crate::delivery::Transport;
use crate::spool::SpoolStore;

// ── Radio ────────────────────────────────────────────────────────────

/// Radio that returns `data` (zero-padded) on every read.
pub struct ScriptedRadio {
    pub data: Vec<u8>,
    pub reported: i32,
    pub rssi: f32,
    pub snr: f32,
    pub crc_ok: bool,
    pub reads: u32,
    pub rearms: u32,
    pub last_read_len: usize,
}

impl ScriptedRadio {
    pub fn new(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            reported: data.len() as i32,
            rssi: -100.0,
            snr: 5.0,
            crc_ok: true,
            reads: 0,
            rearms: 0,
            last_read_len: 0,
        }
    }
}

impl FrameSource for ScriptedRadio {
    fn reported_length(&mut self) -> i32 {
        self.reported
    }

    fn signal_strength(&mut self) -> f32 {
        self.rssi
    }

    fn signal_to_noise(&mut self) -> f32 {
        self.snr
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> bool {
        self.reads += 1;
        self.last_read_len = buf.len();
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.data.get(i).copied().unwrap_or(0);
        }
        self.crc_ok
    }

    fn rearm_receive(&mut self) {
        self.rearms += 1;
    }
}

// ── Clock ────────────────────────────────────────────────────────────

pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    pub fn at(ms: u64) -> Self {
        Self { now: Cell::new(ms) }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for ManualClock {
    fn uptime_ms(&self) -> u64 {
        self.now.get()
    }
}

// ── Transport ────────────────────────────────────────────────────────

/// Transport whose link state is set directly by the test.
#[derive(Default)]
pub struct ScriptedTransport {
    pub network_up: bool,
    pub session_up: bool,
    /// Whether `connect` brings the session up.
    pub connect_succeeds: bool,
    /// Publishes accepted before the session drops; `None` = unlimited.
    pub publish_budget: Option<usize>,
    pub published: Vec<(String, String)>,
    pub connects: Vec<String>,
    pub services: u32,
}

impl ScriptedTransport {
    pub fn offline() -> Self {
        Self::default()
    }

    pub fn online() -> Self {
        Self {
            network_up: true,
            session_up: true,
            connect_succeeds: true,
            ..Self::default()
        }
    }

    pub fn payloads(&self) -> Vec<&str> {
        self.published.iter().map(|(_, p)| p.as_str()).collect()
    }
}

impl Transport for ScriptedTransport {
    fn is_network_up(&mut self) -> bool {
        self.network_up
    }

    fn is_session_up(&mut self) -> bool {
        self.network_up && self.session_up
    }

    fn connect(&mut self, client_id: &str) -> bool {
        self.connects.push(client_id.into());
        if self.network_up && self.connect_succeeds {
            self.session_up = true;
        }
        self.is_session_up()
    }

    fn publish(&mut self, topic: &str, payload: &str) -> bool {
        if !self.is_session_up() {
            return false;
        }
        if let Some(budget) = self.publish_budget.as_mut() {
            if *budget == 0 {
                self.session_up = false;
                return false;
            }
            *budget -= 1;
        }
        self.published.push((topic.into(), payload.into()));
        true
    }

    fn service(&mut self) {
        self.services += 1;
    }
}

// ── Spool backend ────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
pub struct StoreFault;

impl core::fmt::Display for StoreFault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("injected store fault")
    }
}

/// In-memory spool backend with fault injection.
#[derive(Default)]
pub struct MemoryStore {
    pub data: Option<Vec<u8>>,
    pub fail_append: bool,
    /// Next append writes only this many bytes, then fails.
    pub partial_append: Option<usize>,
    pub fail_read: bool,
    pub removes: u32,
    pub reads: VecDeque<u64>,
}

impl MemoryStore {
    pub fn contents(&self) -> &str {
        self.data
            .as_deref()
            .and_then(|d| core::str::from_utf8(d).ok())
            .unwrap_or("")
    }

    pub fn lines(&self) -> Vec<&str> {
        self.contents().lines().collect()
    }

    pub fn exists(&self) -> bool {
        self.data.is_some()
    }
}

impl SpoolStore for MemoryStore {
    type Error = StoreFault;

    fn append(&mut self, bytes: &[u8]) -> Result<u64, StoreFault> {
        if self.fail_append {
            return Err(StoreFault);
        }
        let data = self.data.get_or_insert_with(Vec::new);
        if let Some(n) = self.partial_append.take() {
            data.extend_from_slice(&bytes[..n.min(bytes.len())]);
            return Err(StoreFault);
        }
        data.extend_from_slice(bytes);
        Ok(data.len() as u64)
    }

    fn size(&mut self) -> Result<u64, StoreFault> {
        Ok(self.data.as_ref().map_or(0, |d| d.len() as u64))
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, StoreFault> {
        if self.fail_read {
            return Err(StoreFault);
        }
        self.reads.push_back(offset);
        let Some(data) = self.data.as_ref() else {
            return Ok(0);
        };
        let start = (offset as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn remove(&mut self) -> Result<(), StoreFault> {
        self.removes += 1;
        self.data = None;
        Ok(())
    }
}
