//! Coarse frame fingerprint (FNV-1a, 64-bit) over the leading payload bytes.
//!
//! A dedup hint for the collector, not a security primitive. Two frames
//! with the same first [`FINGERPRINT_PREFIX_LEN`] bytes always share a
//! fingerprint; anything past the prefix is ignored.

/// Number of leading payload bytes that feed the fingerprint.
pub const FINGERPRINT_PREFIX_LEN: usize = 20;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Fingerprint the first (up to) 20 bytes of `payload`.
pub fn fingerprint(payload: &[u8]) -> u64 {
    let prefix = &payload[..payload.len().min(FINGERPRINT_PREFIX_LEN)];
    fnv1a64(prefix)
}

/// Plain FNV-1a over the whole slice.
#[inline]
pub fn fnv1a64(data: &[u8]) -> u64 {
    data.iter().fold(FNV_OFFSET_BASIS, |h, &b| {
        (h ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}
