//! Time sources and server clock synchronization.
//
// All positions derived for live content are anchored to a *monotonic* clock reading, so that they
// keep advancing consistently even if the system wall clock is adjusted while playing. When the
// manifest advertises a time server (UTCTiming element), the offset between that server's time and
// our monotonic clock is preferred over the local wall clock.
//
// https://dashif.org/Guidelines-TimingModel/#clock-sync

use std::fmt;
use std::time::Instant;
use chrono::{DateTime, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use tracing::{debug, warn};
use crate::ir::{MPD, UTCTiming};
use crate::ManifestWarning;


lazy_static! {
    static ref MONOTONIC_ANCHOR: Instant = Instant::now();
}

/// Source of the two clocks used in live time arithmetic, both in milliseconds.
pub trait TimeSource: fmt::Debug + Send + Sync {
    /// A clock that never goes backwards, with an arbitrary origin.
    fn monotonic_ms(&self) -> f64;
    /// Milliseconds since the Unix epoch, according to the local system clock.
    fn wall_clock_ms(&self) -> f64;
}

/// The system clocks: a process-wide `Instant` anchor for the monotonic clock, and chrono's `Utc::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn monotonic_ms(&self) -> f64 {
        MONOTONIC_ANCHOR.elapsed().as_secs_f64() * 1000.0
    }

    fn wall_clock_ms(&self) -> f64 {
        Utc::now().timestamp_millis() as f64
    }
}

/// Current reading of the process-wide monotonic clock, in milliseconds. This is the clock that the
/// convenience position getters of [`crate::Manifest`] use.
pub fn monotonic_now() -> f64 {
    SystemTimeSource.monotonic_ms()
}


const UTC_HTTP_ISO: &str = "urn:mpeg:dash:utc:http-iso:2014";
const UTC_HTTP_XSDATE: &str = "urn:mpeg:dash:utc:http-xsdate:2014";
const UTC_DIRECT: &str = "urn:mpeg:dash:utc:direct:2014";

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Returns the URL of the first UTCTiming resource that we know how to exploit: an HTTP(S) resource
/// whose body is an ISO 8601 / xs:dateTime timestamp.
pub fn http_utc_timing_url(mpd: &MPD) -> Option<String> {
    mpd.UTCTiming.iter()
        .filter(|t| matches!(t.schemeIdUri.as_deref(), Some(UTC_HTTP_ISO) | Some(UTC_HTTP_XSDATE)))
        .filter_map(|t| t.value.as_ref())
        .find(|v| is_http_url(v))
        .cloned()
}

/// Returns the value of a `urn:mpeg:dash:utc:direct:2014` timing element, which embeds the server
/// time directly in the manifest.
pub fn direct_utc_timing(timings: &[UTCTiming]) -> Option<&str> {
    timings.iter()
        .find(|t| t.schemeIdUri.as_deref() == Some(UTC_DIRECT))
        .and_then(|t| t.value.as_deref())
}

// Allow Z suffix for UTC, which is not strictly RFC3339 but used by xsdate, as well as timestamps
// without any timezone designator (assumed UTC).
fn parse_server_time(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.fZ", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(ndt.and_utc());
        }
    }
    None
}

/// Compute the clock offset (server time minus monotonic time, in milliseconds) from the body of a
/// time server response. An unparsable body produces a warning and no offset.
pub fn clock_offset_from_payload(
    payload: &str,
    time_source: &dyn TimeSource) -> Result<f64, ManifestWarning>
{
    match parse_server_time(payload) {
        Some(server_time) => {
            let offset = server_time.timestamp_millis() as f64 - time_source.monotonic_ms();
            debug!(offset, "Clock offset calculated from server time {server_time}");
            Ok(offset)
        },
        None => {
            warn!("Unparsable server clock payload {payload:?}, falling back to local time");
            Err(ManifestWarning::InvalidClockPayload(payload.trim().to_string()))
        },
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FrozenTime;

    impl TimeSource for FrozenTime {
        fn monotonic_ms(&self) -> f64 { 5_000.0 }
        fn wall_clock_ms(&self) -> f64 { 0.0 }
    }

    #[test]
    fn test_clock_offset_from_payload() {
        let offset = clock_offset_from_payload("1970-01-01T00:01:00Z", &FrozenTime).unwrap();
        assert_eq!(offset, 55_000.0);
        let offset = clock_offset_from_payload("1970-01-01T00:01:00.500Z\n", &FrozenTime).unwrap();
        assert_eq!(offset, 55_500.0);
        let offset = clock_offset_from_payload("1970-01-01T00:01:00", &FrozenTime).unwrap();
        assert_eq!(offset, 55_000.0);
        assert!(clock_offset_from_payload("yesterday", &FrozenTime).is_err());
    }

    #[test]
    fn test_http_utc_timing_url() {
        let mut mpd = MPD::default();
        assert_eq!(http_utc_timing_url(&mpd), None);
        mpd.UTCTiming.push(UTCTiming {
            schemeIdUri: Some(String::from("urn:mpeg:dash:utc:http-head:2014")),
            value: Some(String::from("https://time.example.com/head")),
        });
        mpd.UTCTiming.push(UTCTiming {
            schemeIdUri: Some(String::from(UTC_HTTP_ISO)),
            value: Some(String::from("https://time.example.com/iso")),
        });
        assert_eq!(http_utc_timing_url(&mpd).as_deref(), Some("https://time.example.com/iso"));
    }

    #[test]
    fn test_monotonic_now_advances() {
        let a = monotonic_now();
        let b = monotonic_now();
        assert!(b >= a);
    }
}
