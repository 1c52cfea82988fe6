//! Canonical text record for one captured frame.
//!
//! Records are single-line JSON objects (NDJSON once spooled). Field order
//! and numeric precision are fixed so identical inputs give byte-identical
//! records:
//!
//! ```text
//! {"observerId":"A1B2C3D4E5F6","observerName":"Roof","ts":1234,"ptype":17,
//!  "crc":true,"rssi":-97.5,"snr":6.25,"reported_len":4,"len":4,
//!  "payloadHex":"11020304","frameHash":"<64 hex>","fp":"<16 hex>",
//!  "gps":{"lat":51.500000,"lon":-0.125000}}
//! ```
//!
//! `gps` is present only when a location is configured. Hex is uppercase,
//! two characters per byte, no separators.
//!
//! Truncation policy: at most [`MAX_PAYLOAD_HEX_BYTES`] payload bytes are
//! hex-encoded, and never more than fit in [`MAX_RECORD_LEN`] alongside the
//! other fields. `len` reports the number of bytes actually encoded;
//! `reported_len` and `frameHash` always describe the full frame.

use core::fmt::{self, Write};

use heapless::String;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::capture::CapturedFrame;
use crate::config::DeviceIdentity;

/// Maximum encoded record length in bytes, excluding the spool newline.
pub const MAX_RECORD_LEN: usize = 1024;

/// Maximum payload bytes carried as hex in one record.
pub const MAX_PAYLOAD_HEX_BYTES: usize = 255;

/// Signal values are clamped to this magnitude before formatting.
const SIGNAL_LIMIT: f32 = 9999.0;

/// Record tail: frameHash, fp, optional gps, closing brace.
type TailBuffer = String<192>;

/// `"reported_len":N,"len":N`
type LengthsBuffer = String<48>;

// ── Serialized fields ────────────────────────────────────────────────
//
// Strings, integers and flags go through serde-json-core. The signal
// values (fixed decimals), hex fields and location are written directly.

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Head<'a> {
    observer_id: &'a str,
    observer_name: &'a str,
    ts: u64,
    ptype: i16,
    crc: bool,
}

#[derive(Serialize)]
struct Lengths {
    reported_len: i32,
    len: usize,
}

/// An encoded, immutable record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    text: String<MAX_RECORD_LEN>,
}

impl EncodedRecord {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl fmt::Display for EncodedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Record fields did not fit [`MAX_RECORD_LEN`] even with an empty payload.
/// Not reachable with identities that passed config validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeError;

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("record fields exceed maximum record length")
    }
}

impl From<fmt::Error> for EncodeError {
    fn from(_: fmt::Error) -> Self {
        EncodeError
    }
}

/// Frame-to-record encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEncoder {
    max_payload_bytes: usize,
}

impl FrameEncoder {
    pub const fn new() -> Self {
        Self {
            max_payload_bytes: MAX_PAYLOAD_HEX_BYTES,
        }
    }

    /// Encoder that hex-encodes at most `limit` payload bytes
    /// (capped at [`MAX_PAYLOAD_HEX_BYTES`]).
    pub const fn with_payload_limit(limit: usize) -> Self {
        let max_payload_bytes = if limit < MAX_PAYLOAD_HEX_BYTES {
            limit
        } else {
            MAX_PAYLOAD_HEX_BYTES
        };
        Self { max_payload_bytes }
    }

    /// Encode a frame. Pure: the same inputs always give the same bytes.
    pub fn encode(
        &self,
        frame: &CapturedFrame,
        fingerprint: u64,
        identity: &DeviceIdentity<'_>,
    ) -> Result<EncodedRecord, EncodeError> {
        let payload = &frame.payload[..];

        // Tail first so the hex budget knows what must follow it.
        let mut tail = TailBuffer::new();
        tail.push_str(",\"frameHash\":\"").map_err(|_| EncodeError)?;
        write_hex(&mut tail, &Sha256::digest(payload))?;
        write!(tail, "\",\"fp\":\"{fingerprint:016X}\"")?;
        if let Some(loc) = identity.location {
            write!(tail, ",\"gps\":{{\"lat\":{:.6},\"lon\":{:.6}}}", loc.lat, loc.lon)?;
        }
        tail.push('}').map_err(|_| EncodeError)?;

        let mut text = String::<MAX_RECORD_LEN>::new();
        text.push('{').map_err(|_| EncodeError)?;
        push_members(
            &mut text,
            &Head {
                observer_id: identity.id,
                observer_name: identity.name,
                ts: frame.timestamp_ms,
                ptype: frame.frame_type,
                crc: frame.crc_ok,
            },
        )?;
        text.push_str(",\"rssi\":").map_err(|_| EncodeError)?;
        write_fixed(&mut text, frame.rssi, 1)?;
        text.push_str(",\"snr\":").map_err(|_| EncodeError)?;
        write_fixed(&mut text, frame.snr, 2)?;

        // Budget with the widest `len` this encoder can emit.
        let mut widest = LengthsBuffer::new();
        push_members(
            &mut widest,
            &Lengths {
                reported_len: frame.reported_len,
                len: self.max_payload_bytes,
            },
        )?;
        let fixed = 1 + widest.len() + ",\"payloadHex\":\"\"".len() + tail.len();
        let room = MAX_RECORD_LEN
            .checked_sub(text.len() + fixed)
            .ok_or(EncodeError)?;
        let encoded_len = payload.len().min(self.max_payload_bytes).min(room / 2);

        if encoded_len < payload.len() {
            log::warn!(
                "record payload truncated {} -> {} bytes",
                payload.len(),
                encoded_len
            );
        }

        text.push(',').map_err(|_| EncodeError)?;
        push_members(
            &mut text,
            &Lengths {
                reported_len: frame.reported_len,
                len: encoded_len,
            },
        )?;
        text.push_str(",\"payloadHex\":\"").map_err(|_| EncodeError)?;
        write_hex(&mut text, &payload[..encoded_len])?;
        text.push('"').map_err(|_| EncodeError)?;
        text.push_str(&tail).map_err(|_| EncodeError)?;

        Ok(EncodedRecord { text })
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Uppercase hex, two characters per byte.
fn write_hex<W: Write>(out: &mut W, bytes: &[u8]) -> fmt::Result {
    for b in bytes {
        write!(out, "{b:02X}")?;
    }
    Ok(())
}

/// Fixed-precision number; non-finite values become `null`.
fn write_fixed<W: Write>(out: &mut W, value: f32, decimals: usize) -> fmt::Result {
    if !value.is_finite() {
        return out.write_str("null");
    }
    let v = value.clamp(-SIGNAL_LIMIT, SIGNAL_LIMIT);
    write!(out, "{v:.decimals$}")
}

/// Append the members of a serialized object, without its braces.
fn push_members<T: Serialize, const N: usize>(
    out: &mut String<N>,
    fields: &T,
) -> Result<(), EncodeError> {
    let mut scratch = [0u8; MAX_RECORD_LEN];
    let n = serde_json_core::to_slice(fields, &mut scratch).map_err(|_| EncodeError)?;
    let json = core::str::from_utf8(&scratch[..n]).map_err(|_| EncodeError)?;
    let members = json
        .strip_prefix('{')
        .and_then(|j| j.strip_suffix('}'))
        .ok_or(EncodeError)?;
    out.push_str(members).map_err(|_| EncodeError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameBuffer;
    use crate::config::Location;
    use serde::Deserialize;

    fn frame(payload: &[u8]) -> CapturedFrame {
        CapturedFrame {
            payload: FrameBuffer::from_slice(payload).unwrap(),
            reported_len: payload.len() as i32,
            rssi: -97.46,
            snr: 6.254,
            crc_ok: true,
            frame_type: payload.first().map_or(-1, |&b| i16::from(b)),
            timestamp_ms: 1234,
        }
    }

    fn identity() -> DeviceIdentity<'static> {
        DeviceIdentity {
            id: "A1B2C3D4E5F6",
            name: "Roof",
            location: None,
        }
    }

    /// Parsed view used to check records are valid JSON.
    #[derive(Deserialize)]
    #[allow(non_snake_case)]
    struct Parsed<'a> {
        observerId: &'a str,
        observerName: &'a str,
        ts: u64,
        ptype: i16,
        crc: bool,
        rssi: f32,
        snr: f32,
        reported_len: i32,
        len: usize,
        payloadHex: &'a str,
        frameHash: &'a str,
        fp: &'a str,
    }

    #[test]
    fn encodes_all_fields_in_fixed_order() {
        let rec = FrameEncoder::new()
            .encode(&frame(&[0x11, 0x02, 0xAB]), 0x0123_4567_89AB_CDEF, &identity())
            .unwrap();
        let s = rec.as_str();
        assert!(s.starts_with(
            r#"{"observerId":"A1B2C3D4E5F6","observerName":"Roof","ts":1234,"ptype":17,"crc":true,"rssi":-97.5,"snr":6.25,"reported_len":3,"len":3,"payloadHex":"1102AB","frameHash":""#
        ));
        assert!(s.ends_with(r#"","fp":"0123456789ABCDEF"}"#));
        assert!(!s.contains('\n'));
        assert!(!s.contains("gps"));
    }

    #[test]
    fn frame_hash_is_sha256_uppercase() {
        let rec = FrameEncoder::new()
            .encode(&frame(b"abc"), 0, &identity())
            .unwrap();
        assert!(rec.as_str().contains(
            "\"frameHash\":\"BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD\""
        ));
    }

    #[test]
    fn encoding_is_deterministic() {
        let f = frame(&[0x15, 0x00, 0x42, 0x99]);
        let enc = FrameEncoder::new();
        let a = enc.encode(&f, 7, &identity()).unwrap();
        let b = enc.encode(&f, 7, &identity()).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn record_parses_back() {
        let payload: [u8; 40] = core::array::from_fn(|i| i as u8);
        let rec = FrameEncoder::new()
            .encode(&frame(&payload), 0xFEED, &identity())
            .unwrap();
        let (p, _) = serde_json_core::from_str::<Parsed<'_>>(rec.as_str()).unwrap();
        assert_eq!(p.observerId, "A1B2C3D4E5F6");
        assert_eq!(p.observerName, "Roof");
        assert_eq!(p.ts, 1234);
        assert_eq!(p.ptype, 0);
        assert!(p.crc);
        assert_eq!(p.rssi, -97.5);
        assert_eq!(p.snr, 6.25);
        assert_eq!(p.reported_len, 40);
        assert_eq!(p.len, 40);
        assert_eq!(p.payloadHex.len(), 80);
        assert!(p.payloadHex.starts_with("000102030405"));
        assert_eq!(p.frameHash.len(), 64);
        assert_eq!(p.fp, "000000000000FEED");
    }

    #[test]
    fn location_is_appended_when_configured() {
        let id = DeviceIdentity {
            location: Some(Location {
                lat: 51.5,
                lon: -0.125,
            }),
            ..identity()
        };
        let rec = FrameEncoder::new().encode(&frame(&[1]), 0, &id).unwrap();
        assert!(rec
            .as_str()
            .ends_with(r#","gps":{"lat":51.500000,"lon":-0.125000}}"#));
    }

    #[test]
    fn payload_over_limit_is_truncated_not_rejected() {
        let payload = [0xAAu8; 32];
        let f = frame(&payload);
        let rec = FrameEncoder::with_payload_limit(8)
            .encode(&f, 0, &identity())
            .unwrap();
        let s = rec.as_str();
        assert!(s.contains(r#""reported_len":32,"len":8,"payloadHex":"AAAAAAAAAAAAAAAA","#));

        // The hash still covers the whole frame.
        let full = FrameEncoder::new().encode(&f, 0, &identity()).unwrap();
        let hash = |r: &str| r.split("\"frameHash\":\"").nth(1).unwrap()[..64].to_owned();
        assert_eq!(hash(s), hash(full.as_str()));
    }

    #[test]
    fn full_frame_fits_with_long_identity() {
        let payload = [0x5Au8; 255];
        let id = DeviceIdentity {
            id: "abcdefghijklmnopqrstuvwxyz012345",
            name: "a name that is thirty-two bytes!",
            location: Some(Location {
                lat: -89.123456,
                lon: -179.654321,
            }),
        };
        let rec = FrameEncoder::new().encode(&frame(&payload), 0, &id).unwrap();
        assert!(rec.len() <= MAX_RECORD_LEN);
        assert!(rec.as_str().contains(r#""len":255,"#));
    }

    #[test]
    fn escaped_name_can_squeeze_payload_but_never_overflows() {
        // 32 control characters expand to 6 bytes each.
        let name: std::string::String = core::iter::repeat('\u{1}').take(32).collect();
        let id_str: std::string::String = core::iter::repeat('"').take(32).collect();
        let id = DeviceIdentity {
            id: &id_str,
            name: &name,
            location: Some(Location {
                lat: -89.123456,
                lon: -179.654321,
            }),
        };
        let mut f = frame(&[0x77u8; 255]);
        f.rssi = -12345.678;
        f.reported_len = i32::MIN;
        let rec = FrameEncoder::new().encode(&f, u64::MAX, &id).unwrap();
        assert!(rec.len() <= MAX_RECORD_LEN);
        assert!(rec.as_str().contains(r#""rssi":-9999.0,"#));
        assert!(rec.as_str().ends_with("}}"));
    }

    #[test]
    fn non_finite_signal_values_encode_as_null() {
        let mut f = frame(&[1, 2]);
        f.rssi = f32::NAN;
        f.snr = f32::NEG_INFINITY;
        let rec = FrameEncoder::new().encode(&f, 0, &identity()).unwrap();
        assert!(rec.as_str().contains(r#""rssi":null,"snr":null,"#));
    }

    #[test]
    fn json_strings_are_escaped() {
        let id = DeviceIdentity {
            name: "say \"hi\"\\",
            ..identity()
        };
        let rec = FrameEncoder::new().encode(&frame(&[1]), 0, &id).unwrap();
        assert!(rec
            .as_str()
            .contains(r#""observerName":"say \"hi\"\\","#));
    }

    #[test]
    fn control_characters_use_json_unicode_escapes() {
        let name = "say \"hi\"\\\u{1}";
        let id = DeviceIdentity {
            name,
            ..identity()
        };
        let rec = FrameEncoder::new().encode(&frame(&[1]), 0, &id).unwrap();

        let mut buf = [0u8; 64];
        let n = serde_json_core::to_slice(name, &mut buf).unwrap();
        let quoted = core::str::from_utf8(&buf[..n]).unwrap();
        assert_eq!(quoted, r#""say \"hi\"\\\u0001""#);
        assert!(rec.as_str().contains(&std::format!(",\"observerName\":{quoted},")));
    }

    #[test]
    fn empty_payload_uses_sentinel_type() {
        let rec = FrameEncoder::new()
            .encode(&frame(&[]), 0, &identity())
            .unwrap();
        assert!(rec
            .as_str()
            .contains(r#""ptype":-1,"crc":true,"rssi":-97.5,"snr":6.25,"reported_len":0,"len":0,"payloadHex":"","#));
    }
}
