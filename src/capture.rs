//! Frame capture: drains the receive mailbox and reads one frame from the radio.
//!
//! Hardware ordering per frame is: notification → read → re-arm. Capture
//! never re-arms the receiver itself; the cycle does that after the frame
//! has been encoded and delivered (see [`crate::pipeline`]).

use heapless::Vec;

use crate::mailbox::RxMailbox;

/// Radio receive buffer capacity (max LoRa payload).
pub const FRAME_BUFFER_LEN: usize = 255;

/// Frame type reported when nothing was read.
pub const NO_FRAME_TYPE: i16 = -1;

/// Raw payload buffer type
pub type FrameBuffer = Vec<u8, FRAME_BUFFER_LEN>;

/// Packet receiver owning the radio hardware state.
///
/// The pending-frame notification is not part of this trait: the receive
/// interrupt writes it into an [`RxMailbox`] that [`FrameCapture`] drains.
pub trait FrameSource {
    /// Length the modem reports for the last packet. May be 0 (or negative
    /// on error) depending on modem timing.
    fn reported_length(&mut self) -> i32;
    /// RSSI of the last packet, dBm.
    fn signal_strength(&mut self) -> f32;
    /// SNR of the last packet, dB.
    fn signal_to_noise(&mut self) -> f32;
    /// Read `buf.len()` bytes of the last packet into `buf`.
    /// Returns the integrity-check (CRC) result.
    fn read_frame(&mut self, buf: &mut [u8]) -> bool;
    /// Put the receiver back into receive mode.
    fn rearm_receive(&mut self);
}

/// Monotonic device uptime.
pub trait Clock {
    fn uptime_ms(&self) -> u64;
}

/// Uptime measured from construction.
#[cfg(feature = "std")]
pub struct BootClock {
    boot: std::time::Instant,
}

#[cfg(feature = "std")]
impl BootClock {
    pub fn new() -> Self {
        Self {
            boot: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for BootClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for BootClock {
    fn uptime_ms(&self) -> u64 {
        self.boot.elapsed().as_millis() as u64
    }
}

/// One received frame plus the receive-time metadata around it.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFrame {
    /// Bytes read from the radio; `payload.len()` is the used length.
    pub payload: FrameBuffer,
    /// Length the modem reported (may be 0 or negative).
    pub reported_len: i32,
    pub rssi: f32,
    pub snr: f32,
    /// Radio CRC check result
    pub crc_ok: bool,
    /// First payload byte, or [`NO_FRAME_TYPE`]
    pub frame_type: i16,
    /// Device uptime at capture, ms
    pub timestamp_ms: u64,
}

impl CapturedFrame {
    /// Length actually used for the read.
    pub fn used_len(&self) -> usize {
        self.payload.len()
    }
}

/// Capture counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames: u32,
    pub crc_failures: u32,
    /// Reads where the reported length was non-positive
    pub length_fallbacks: u32,
}

/// Pick the read length for a reported packet length.
///
/// A non-positive report falls back to a full-buffer read rather than
/// dropping the frame. The result is always clamped to `capacity`.
pub fn read_length(reported: i32, capacity: usize) -> usize {
    let len = if reported <= 0 {
        capacity
    } else {
        reported as usize
    };
    len.min(capacity)
}

/// Frame type: the first payload byte, or [`NO_FRAME_TYPE`] if nothing was read.
pub fn frame_type(payload: &[u8]) -> i16 {
    payload.first().map_or(NO_FRAME_TYPE, |&b| i16::from(b))
}

/// Drains the mailbox and produces [`CapturedFrame`]s.
///
/// Stateless between polls apart from counters; the only shared state is
/// the mailbox, owned by whoever wires up the interrupt.
pub struct FrameCapture<'m> {
    mailbox: &'m RxMailbox,
    stats: CaptureStats,
}

impl<'m> FrameCapture<'m> {
    pub fn new(mailbox: &'m RxMailbox) -> Self {
        Self {
            mailbox,
            stats: CaptureStats::default(),
        }
    }

    /// Non-blocking. Returns `None` if no frame is pending.
    pub fn poll<S, C>(&mut self, source: &mut S, clock: &C) -> Option<CapturedFrame>
    where
        S: FrameSource + ?Sized,
        C: Clock + ?Sized,
    {
        // Clear first: an interrupt arriving during the read below must
        // register as a new notification, not be wiped afterwards.
        if !self.mailbox.take() {
            return None;
        }

        let reported_len = source.reported_length();
        let len = read_length(reported_len, FRAME_BUFFER_LEN);
        if reported_len <= 0 {
            self.stats.length_fallbacks = self.stats.length_fallbacks.wrapping_add(1);
        }

        // Signal stats first; some modems only hold them until the buffer read.
        let rssi = source.signal_strength();
        let snr = source.signal_to_noise();

        let mut payload = FrameBuffer::new();
        payload.resize_default(len).ok();
        let crc_ok = source.read_frame(&mut payload);

        let frame_type = frame_type(&payload);

        self.stats.frames = self.stats.frames.wrapping_add(1);
        if !crc_ok {
            self.stats.crc_failures = self.stats.crc_failures.wrapping_add(1);
        }

        log::debug!(
            "rx len={} rssi={:.1} snr={:.2} crc={}",
            len,
            rssi,
            snr,
            if crc_ok { "ok" } else { "bad" }
        );

        Some(CapturedFrame {
            payload,
            reported_len,
            rssi,
            snr,
            crc_ok,
            frame_type,
            timestamp_ms: clock.uptime_ms(),
        })
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    /// Interrupts lost to the single-slot mailbox.
    pub fn coalesced(&self) -> u32 {
        self.mailbox.coalesced()
    }
}
