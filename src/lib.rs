//! A Rust library that turns a parsed DASH MPD manifest into the normalized, queryable and
//! incrementally-updatable manifest model used by an adaptive streaming client. It describes *what*
//! media is available, *when*, and *in which qualities*, and keeps that description current as a
//! live manifest is periodically refreshed.

//! [DASH](https://en.wikipedia.org/wiki/Dynamic_Adaptive_Streaming_over_HTTP) (dynamic adaptive
//! streaming over HTTP), also called MPEG-DASH, is a technology used for media streaming over the
//! web. The Media Presentation Description (MPD) is a description of the resources forming a
//! streaming service, that a DASH client uses to determine which assets to request in order to
//! perform adaptive streaming of the content.
//!
//! The library works in three stages:
//!
//! - The MPD document is available as an intermediate tree of serde structs (module [`ir`]), either
//!   deserialized from XML with [`ir::parse`] or built programmatically.
//! - [`mpd::parse_mpd`] normalizes that tree into a [`parsed::ParsedManifest`]. Some documents need
//!   external data before they can be normalized (a server clock for live content, remote Periods
//!   referenced with XLink); in that case the parse suspends and returns a request that the caller
//!   fulfils and resumes. This library never performs network I/O itself.
//! - [`manifest::Manifest`] is the long-lived model that the rest of the player holds references
//!   into. Refreshed manifests are merged into it in place by [`Manifest::update`] and
//!   [`Manifest::replace`], which return a structured diff of what changed.
//!
//!
//! ## DASH features supported
//!
//! - Static and dynamic (live) manifests, including live-edge estimation from a server clock
//!   (`UTCTiming` with `http-iso`, `http-xsdate` or `direct` schemes) or from the local clock
//! - Multi-period content, with inference of missing Period start and duration
//! - XLink Periods with actuate=onLoad semantics, resolve-to-zero supported
//! - ContentProtection `@ref`/`@refId` references in any document order
//! - Switchable AdaptationSets (`urn:mpeg:dash:adaptation-set-switching:2016`), trick-mode tracks,
//!   accessibility and role signaling
//! - Supplemental (enhancement layer) codecs, HDR signaling, multiple CDN BaseURLs
//
//
// Reference dash.js library: https://github.com/Dash-Industry-Forum/dash.js
// DASH-IF timing model: https://dashif.org/Guidelines-TimingModel/
// Google Shaka player: https://github.com/google/shaka-player


pub mod ir;
pub mod clock;
pub mod content_protection;
pub mod bounds;
pub mod segment;
pub mod representation;
pub mod adaptation;
pub mod period;
pub mod parsed;
pub mod mpd;
pub mod manifest;
pub mod update;

pub use ir::{parse, MPD};
pub use mpd::{parse_mpd, ParseOptions, ParseStatus};
pub use manifest::{Manifest, ManifestOptions, Tristate, TrackType};
pub use update::{PeriodsUpdateResult, UpdateType};


/// Fatal errors, which abort the current parse or update pass.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ManifestError {
    #[error("parse error {0}")]
    Parsing(String),
    #[error("invalid Duration: {0}")]
    InvalidDuration(String),
    #[error("missing start time for Period #{index}, and no end for the previous Period")]
    MissingPeriodStart { index: usize },
    #[error("no supported audio or video track in Period {period_id}")]
    NoSupportedTracks { period_id: String },
    #[error("no supported {track_type} track in Period {period_id}")]
    IncompatibleCodecs {
        period_id: String,
        track_type: TrackType,
        tracks: Vec<manifest::TrackMetadata>,
    },
    #[error("received {received} XLink resources, expected {expected}")]
    XlinkResourceCount { expected: usize, received: usize },
    #[error("cannot perform manifest update: {0}")]
    UpdateFailed(String),
}

/// Non-fatal issues encountered while parsing or updating. They are accumulated in document order
/// and returned alongside a successful result.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ManifestWarning {
    #[error("{track_type} track(s) contain only incompatible codecs")]
    IncompatibleCodecs {
        track_type: TrackType,
        tracks: Vec<manifest::TrackMetadata>,
    },
    #[error("ContentProtection reference {reference} was never declared")]
    UnresolvedContentProtectionRef { reference: String },
    #[error("fetching the clock resource failed: {0}")]
    ClockFetchFailed(String),
    #[error("invalid clock payload: {0}")]
    InvalidClockPayload(String),
    #[error("loading an XLink resource: {0}")]
    XlinkFetch(String),
    #[error("no usable bitrate for Representation {representation_id}")]
    MissingBitrate { representation_id: String },
    #[error("Period {period_id} no longer present in the refreshed manifest")]
    RemovedPeriod { period_id: String },
    #[error("track {track_id} of Period {period_id} no longer present in the refreshed manifest")]
    RemovedTrack { period_id: String, track_id: String },
    #[error("Representation {representation_id} of track {track_id} no longer present in the refreshed manifest")]
    RemovedRepresentation { track_id: String, representation_id: String },
    #[error("{count} new tracks appeared in Period {period_id} while merging")]
    UnexpectedNewTracks { period_id: String, count: usize },
    #[error("{count} new Representations appeared in track {track_id} while merging")]
    UnexpectedNewRepresentations { track_id: String, count: usize },
}


// Shared by Periods, tracks and Representations: when an identifier has already been used in the
// same scope, a fixed suffix is appended until it becomes unique. The first element seen keeps the
// identifier unmodified.
pub(crate) fn dedup_id(id: String, seen: &[String]) -> String {
    let mut id = id;
    while seen.contains(&id) {
        id.push_str("-dup");
    }
    id
}
