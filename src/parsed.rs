//! The immutable result of a parse pass, before it is turned into (or merged into) a [`Manifest`].
//!
//! [`Manifest`]: crate::manifest::Manifest

use std::fmt;
use crate::bounds::TimeBounds;
use crate::content_protection::{ContentProtectionData, ProtectionSlot};
use crate::ir::XsDatetime;
use crate::manifest::TrackType;
use crate::segment::SegmentIndex;


/// One candidate location for the segments of a Representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdnMetadata {
    /// Base URL against which segment URLs are resolved. Empty when segment URLs are absolute.
    pub base_url: String,
    /// The `@serviceLocation` of the BaseURL, which groups URLs served by the same CDN.
    pub id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eotf {
    Pq,
    Hlg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Rec2020,
}

/// High dynamic range characteristics of a video Representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HdrInfo {
    pub color_depth: Option<u8>,
    pub eotf: Option<Eotf>,
    pub color_space: Option<ColorSpace>,
}

/// An Event of an EventStream, with times converted to seconds on the presentation timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub id: Option<String>,
    pub start: f64,
    pub end: Option<f64>,
    pub scheme_id_uri: String,
    pub value: String,
    pub timescale: u64,
    /// The event payload: `@messageData`, or else the text content of the Event element.
    pub data: Option<String>,
}

pub struct ParsedRepresentation {
    pub id: String,
    pub bitrate: u64,
    /// Codec strings, most preferred first: supplemental (enhancement layer) codecs precede the
    /// base codec.
    pub codecs: Vec<String>,
    pub mime_type: Option<String>,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub frame_rate: Option<f64>,
    pub hdr_info: Option<HdrInfo>,
    pub is_spatial_audio: bool,
    pub cdn_metadata: Vec<CdnMetadata>,
    pub content_protections: Option<ContentProtectionData>,
    pub index: Box<dyn SegmentIndex>,
    pub(crate) protection_slot: Option<ProtectionSlot>,
}

impl fmt::Debug for ParsedRepresentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedRepresentation")
            .field("id", &self.id)
            .field("bitrate", &self.bitrate)
            .field("codecs", &self.codecs)
            .field("mime_type", &self.mime_type)
            .field("cdn_metadata", &self.cdn_metadata)
            .field("encrypted", &self.content_protections.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct ParsedTrack {
    pub id: String,
    pub track_type: TrackType,
    pub language: Option<String>,
    pub label: Option<String>,
    pub closed_caption: bool,
    pub forced_subtitles: bool,
    pub audio_description: bool,
    pub dub: bool,
    pub sign_interpreted: bool,
    pub is_trick_mode_track: bool,
    /// Ids of the sibling trick-mode tracks attached to this track.
    pub trick_mode_track_ids: Vec<String>,
    pub representations: Vec<ParsedRepresentation>,
}

/// Tracks of a Period grouped by type, each group in preference order.
#[derive(Debug, Default)]
pub struct ParsedTracks {
    pub audio: Vec<ParsedTrack>,
    pub video: Vec<ParsedTrack>,
    pub text: Vec<ParsedTrack>,
    /// Trick-mode tracks, kept out of the normal per-type ordering.
    pub trick_mode: Vec<ParsedTrack>,
}

impl ParsedTracks {
    pub fn of_type(&self, track_type: TrackType) -> &[ParsedTrack] {
        match track_type {
            TrackType::Audio => &self.audio,
            TrackType::Video => &self.video,
            TrackType::Text => &self.text,
        }
    }

    pub(crate) fn of_type_mut(&mut self, track_type: TrackType) -> &mut Vec<ParsedTrack> {
        match track_type {
            TrackType::Audio => &mut self.audio,
            TrackType::Video => &mut self.video,
            TrackType::Text => &mut self.text,
        }
    }

    /// All tracks, trick-mode ones included.
    pub fn iter(&self) -> impl Iterator<Item = &ParsedTrack> {
        self.audio.iter()
            .chain(self.video.iter())
            .chain(self.text.iter())
            .chain(self.trick_mode.iter())
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut ParsedTrack> {
        self.audio.iter_mut()
            .chain(self.video.iter_mut())
            .chain(self.text.iter_mut())
            .chain(self.trick_mode.iter_mut())
    }
}

#[derive(Debug)]
pub struct ParsedPeriod {
    pub id: String,
    /// Absolute start time, in seconds.
    pub start: f64,
    pub duration: Option<f64>,
    pub end: Option<f64>,
    pub tracks: ParsedTracks,
    pub stream_events: Vec<StreamEvent>,
}

#[derive(Debug)]
pub struct ParsedManifest {
    pub is_dynamic: bool,
    pub is_live: bool,
    pub is_last_period_known: bool,
    pub periods: Vec<ParsedPeriod>,
    pub time_bounds: TimeBounds,
    /// Recommended interval between two refreshes of the manifest, in seconds.
    pub lifetime: Option<f64>,
    /// Where the manifest can be fetched from, most preferred first.
    pub uris: Vec<String>,
    /// Server clock minus monotonic clock, in milliseconds.
    pub clock_offset: Option<f64>,
    /// In seconds since the Unix epoch. Zero for static content.
    pub availability_start_time: f64,
    pub publish_time: Option<XsDatetime>,
    pub suggested_presentation_delay: Option<f64>,
}
