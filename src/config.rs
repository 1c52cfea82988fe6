//! Typed observer configuration.
//!
//! Values arrive from an external configuration collaborator (NVS, a JSON
//! file, build-time defaults) and are validated once at load. Nothing in
//! the capture/delivery core reads raw configuration text.

use core::fmt::{self, Write};

use heapless::String;
use serde::Deserialize;

// ── Defaults ─────────────────────────────────────────────────────────

/// Topic namespace: `<namespace>/observers/<id>/packets`
pub const DEFAULT_NAMESPACE: &str = "meshrank";

/// Spool size cap in bytes
pub const DEFAULT_SPOOL_CAP: u64 = 256 * 1024;

/// Spool file path on the device filesystem
pub const DEFAULT_SPOOL_PATH: &str = "/spool.ndjson";

/// Idle sleep at the end of each cycle, ms
pub const CYCLE_IDLE_MS: u64 = 2;

pub const MAX_ID_LEN: usize = 32;
pub const MAX_NAME_LEN: usize = 32;
pub const MAX_NAMESPACE_LEN: usize = 24;

/// `<ns>/observers/<id>/packets`
pub const MAX_TOPIC_LEN: usize = MAX_NAMESPACE_LEN + MAX_ID_LEN + 19;

/// `obs-<id>`
pub const MAX_CLIENT_ID_LEN: usize = MAX_ID_LEN + 4;

pub type IdString = String<MAX_ID_LEN>;
pub type NameString = String<MAX_NAME_LEN>;
pub type TopicString = String<MAX_TOPIC_LEN>;
pub type ClientIdString = String<MAX_CLIENT_ID_LEN>;

// ── Errors ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A string field does not fit its fixed capacity
    TooLong(&'static str),
    /// Namespace empty or containing topic separators/wildcards
    InvalidNamespace,
    /// Identity containing topic separators/wildcards
    InvalidId,
    /// Latitude/longitude out of range or not finite
    InvalidLocation,
    /// Spool cap of zero
    InvalidSpoolCap,
    /// Document is not valid configuration JSON
    Parse,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::TooLong(field) => write!(f, "{field} is too long"),
            ConfigError::InvalidNamespace => f.write_str("invalid topic namespace"),
            ConfigError::InvalidId => f.write_str("invalid device id"),
            ConfigError::InvalidLocation => f.write_str("location out of range"),
            ConfigError::InvalidSpoolCap => f.write_str("spool cap must be non-zero"),
            ConfigError::Parse => f.write_str("malformed configuration"),
        }
    }
}

// ── Types ────────────────────────────────────────────────────────────

/// Fixed observer position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    /// `None` for the unset (0, 0) position, as the device stores it.
    pub fn from_coords(lat: f64, lon: f64) -> Result<Option<Self>, ConfigError> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(ConfigError::InvalidLocation);
        }
        if lat == 0.0 && lon == 0.0 {
            return Ok(None);
        }
        Ok(Some(Self { lat, lon }))
    }
}

/// Who produced a record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceIdentity<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub location: Option<Location>,
}

/// Validated configuration, constructed once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ObserverConfig {
    device_id: IdString,
    display_name: NameString,
    location: Option<Location>,
    spool_cap: u64,
    topic: TopicString,
    client_id: ClientIdString,
}

/// Raw settings as handed over by the configuration collaborator.
/// Empty strings mean "not configured".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObserverSettings<'a> {
    #[serde(default)]
    pub id: &'a str,
    #[serde(default)]
    pub name: &'a str,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lon: f64,
    #[serde(default, borrow)]
    pub namespace: Option<&'a str>,
    #[serde(default)]
    pub spool_cap: Option<u64>,
}

impl ObserverConfig {
    /// Validate settings. `hardware_id` is the 48-bit MAC / eFuse value
    /// used when no identity is configured.
    pub fn load(settings: &ObserverSettings<'_>, hardware_id: u64) -> Result<Self, ConfigError> {
        let device_id = if settings.id.is_empty() {
            mac_id(hardware_id)
        } else {
            if !is_topic_safe(settings.id) {
                return Err(ConfigError::InvalidId);
            }
            IdString::try_from(settings.id).map_err(|_| ConfigError::TooLong("id"))?
        };

        let display_name = if settings.name.is_empty() {
            truncate_to::<MAX_NAME_LEN>(&device_id)
        } else {
            NameString::try_from(settings.name).map_err(|_| ConfigError::TooLong("name"))?
        };

        let namespace = settings.namespace.unwrap_or(DEFAULT_NAMESPACE);
        if namespace.is_empty() || !is_topic_safe(namespace) {
            return Err(ConfigError::InvalidNamespace);
        }
        if namespace.len() > MAX_NAMESPACE_LEN {
            return Err(ConfigError::TooLong("namespace"));
        }

        let spool_cap = settings.spool_cap.unwrap_or(DEFAULT_SPOOL_CAP);
        if spool_cap == 0 {
            return Err(ConfigError::InvalidSpoolCap);
        }

        let location = Location::from_coords(settings.lat, settings.lon)?;

        let mut topic = TopicString::new();
        write!(topic, "{namespace}/observers/{device_id}/packets")
            .map_err(|_| ConfigError::TooLong("topic"))?;

        let mut client_id = ClientIdString::new();
        write!(client_id, "obs-{device_id}").map_err(|_| ConfigError::TooLong("id"))?;

        Ok(Self {
            device_id,
            display_name,
            location,
            spool_cap,
            topic,
            client_id,
        })
    }

    /// Parse a flat JSON settings document, e.g.
    /// `{"id":"","name":"Roof","lat":51.5,"lon":-0.12}`.
    pub fn from_json(json: &[u8], hardware_id: u64) -> Result<Self, ConfigError> {
        let (settings, _) = serde_json_core::from_slice::<ObserverSettings<'_>>(json)
            .map_err(|_| ConfigError::Parse)?;
        Self::load(&settings, hardware_id)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn location(&self) -> Option<Location> {
        self.location
    }

    pub fn spool_cap(&self) -> u64 {
        self.spool_cap
    }

    /// Delivery topic for this device's packets.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Transport session client id.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn identity(&self) -> DeviceIdentity<'_> {
        DeviceIdentity {
            id: &self.device_id,
            name: &self.display_name,
            location: self.location,
        }
    }
}

/// Format a 48-bit hardware id as 12 uppercase hex digits (two 24-bit halves).
pub fn mac_id(hardware_id: u64) -> IdString {
    let mut id = IdString::new();
    let _ = write!(
        id,
        "{:06X}{:06X}",
        (hardware_id >> 24) as u32 & 0xFF_FFFF,
        hardware_id as u32 & 0xFF_FFFF
    );
    id
}

fn is_topic_safe(s: &str) -> bool {
    !s.chars()
        .any(|c| matches!(c, '/' | '+' | '#') || c.is_control() || c.is_whitespace())
}

fn truncate_to<const N: usize>(s: &str) -> String<N> {
    let mut out = String::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}
