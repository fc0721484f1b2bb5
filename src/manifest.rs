//! The long-lived manifest model: Manifest, Period, Track and Representation.
//
// Other parts of a player hold on to Periods, tracks and Representations by id between two
// refreshes of the manifest. Entities are therefore stored by value in their owning collections and
// looked up by id: a refresh merges new data into the existing entities (see the `update` module)
// rather than swapping them out.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use crate::clock::{SystemTimeSource, TimeSource};
use crate::content_protection::ContentProtectionData;
use crate::ir::XsDatetime;
use crate::parsed::{CdnMetadata, HdrInfo, ParsedManifest, ParsedPeriod, ParsedRepresentation, ParsedTrack, StreamEvent};
use crate::segment::SegmentIndex;
use crate::update::{replace_periods, update_periods, ManifestUpdate, UpdateType};
use crate::{ManifestError, ManifestWarning};

pub use crate::bounds::{MaximumTimeData, TimeBounds};


static MANIFEST_ID: AtomicU64 = AtomicU64::new(0);


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackType {
    Audio,
    Video,
    Text,
}

impl TrackType {
    pub const ALL: [TrackType; 3] = [TrackType::Audio, TrackType::Video, TrackType::Text];
}

impl fmt::Display for TrackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackType::Audio => "audio",
            TrackType::Video => "video",
            TrackType::Text => "text",
        };
        f.write_str(name)
    }
}

/// A three-valued support flag. `Unknown` is not the same as `Unsupported`: it means that the
/// question hasn't been answered yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tristate {
    Supported,
    Unsupported,
    #[default]
    Unknown,
}

impl Tristate {
    /// `Supported` if any element is, `Unsupported` if all of them are, `Unknown` otherwise.
    pub fn aggregate<I: IntoIterator<Item = Tristate>>(states: I) -> Tristate {
        let mut all_unsupported = true;
        for state in states {
            match state {
                Tristate::Supported => return Tristate::Supported,
                Tristate::Unknown => all_unsupported = false,
                Tristate::Unsupported => (),
            }
        }
        if all_unsupported { Tristate::Unsupported } else { Tristate::Unknown }
    }
}

/// Answers whether the platform can decode a given codec, as probed by the embedding player.
pub trait CodecSupport: fmt::Debug + Send + Sync {
    fn is_supported(&self, mime_type: &str, codec: &str, encrypted: bool) -> Tristate;
}

/// Codec support which hasn't been probed: every answer is `Unknown`, to be refreshed later with
/// [`Manifest::refresh_codec_support`].
#[derive(Debug, Default, Clone, Copy)]
pub struct UnprobedCodecSupport;

impl CodecSupport for UnprobedCodecSupport {
    fn is_supported(&self, _mime_type: &str, _codec: &str, _encrypted: bool) -> Tristate {
        Tristate::Unknown
    }
}

/// Decides whether a Representation enters the model. Returns `false` to drop it.
pub type RepresentationFilter = Arc<dyn Fn(TrackType, &ParsedRepresentation) -> bool + Send + Sync>;

/// Options used when building a [`Manifest`] and when merging refreshed manifests into it.
#[derive(Clone)]
pub struct ManifestOptions {
    codec_support: Arc<dyn CodecSupport>,
    representation_filter: Option<RepresentationFilter>,
    time_source: Arc<dyn TimeSource>,
}

impl fmt::Debug for ManifestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManifestOptions")
            .field("codec_support", &self.codec_support)
            .field("representation_filter", &self.representation_filter.is_some())
            .field("time_source", &self.time_source)
            .finish()
    }
}

impl Default for ManifestOptions {
    fn default() -> Self {
        ManifestOptions {
            codec_support: Arc::new(UnprobedCodecSupport),
            representation_filter: None,
            time_source: Arc::new(SystemTimeSource),
        }
    }
}

impl ManifestOptions {
    pub fn new() -> ManifestOptions {
        ManifestOptions::default()
    }

    pub fn with_codec_support(mut self, codec_support: Arc<dyn CodecSupport>) -> ManifestOptions {
        self.codec_support = codec_support;
        self
    }

    /// Representations for which `filter` returns `false` are not included in the model. Tracks
    /// left without any Representation are dropped.
    pub fn with_representation_filter<F>(mut self, filter: F) -> ManifestOptions
    where
        F: Fn(TrackType, &ParsedRepresentation) -> bool + Send + Sync + 'static
    {
        self.representation_filter = Some(Arc::new(filter));
        self
    }

    /// The monotonic clock used by the convenience position getters and by partial updates.
    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> ManifestOptions {
        self.time_source = time_source;
        self
    }
}


#[derive(Debug, Clone, PartialEq)]
pub struct RepresentationMetadata {
    pub id: String,
    pub bitrate: u64,
    pub codecs: Vec<String>,
    pub mime_type: Option<String>,
    pub is_supported: Tristate,
    pub decipherable: Tristate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackMetadata {
    pub id: String,
    pub track_type: TrackType,
    pub language: Option<String>,
    pub representations: Vec<RepresentationMetadata>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeriodMetadata {
    pub id: String,
    pub start: f64,
    pub duration: Option<f64>,
    pub end: Option<f64>,
}


/// One quality level of a track.
#[derive(Debug)]
pub struct Representation {
    pub id: String,
    pub bitrate: u64,
    /// Candidate codecs, most preferred first. Codecs known to be unsupported are removed once the
    /// support of the others is known, but the list never becomes empty because of it.
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
    pub is_supported: Tristate,
    pub decipherable: Tristate,
}

// Keep the codecs which may still be used: unknown ones, up to and including the first supported one.
fn resolve_codecs(
    codecs: &[String],
    mime_type: &str,
    encrypted: bool,
    support: &dyn CodecSupport) -> (Vec<String>, Tristate)
{
    if codecs.is_empty() {
        return (Vec::new(), support.is_supported(mime_type, "", encrypted));
    }
    let mut kept = Vec::with_capacity(codecs.len());
    let mut any_unknown = false;
    for codec in codecs {
        match support.is_supported(mime_type, codec, encrypted) {
            Tristate::Supported => {
                kept.push(codec.clone());
                return (kept, Tristate::Supported);
            },
            Tristate::Unknown => {
                any_unknown = true;
                kept.push(codec.clone());
            },
            Tristate::Unsupported => debug!("Codec {codec} is not supported"),
        }
    }
    if kept.is_empty() {
        kept = codecs.to_vec();
    }
    (kept, if any_unknown { Tristate::Unknown } else { Tristate::Unsupported })
}

impl Representation {
    fn from_parsed(parsed: ParsedRepresentation, track_type: TrackType, support: &dyn CodecSupport) -> Representation {
        let encrypted = parsed.content_protections.is_some();
        let (codecs, is_supported) = if track_type == TrackType::Text {
            (parsed.codecs, Tristate::Supported)
        } else {
            resolve_codecs(&parsed.codecs, parsed.mime_type.as_deref().unwrap_or(""), encrypted, support)
        };
        Representation {
            id: parsed.id,
            bitrate: parsed.bitrate,
            codecs,
            mime_type: parsed.mime_type,
            width: parsed.width,
            height: parsed.height,
            frame_rate: parsed.frame_rate,
            hdr_info: parsed.hdr_info,
            is_spatial_audio: parsed.is_spatial_audio,
            cdn_metadata: parsed.cdn_metadata,
            decipherable: if encrypted { Tristate::Unknown } else { Tristate::Supported },
            content_protections: parsed.content_protections,
            index: parsed.index,
            is_supported,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.content_protections.is_some()
    }

    /// Ask `support` again if the support of this Representation is still unknown. Returns `true`
    /// if the support status changed.
    pub fn refresh_codec_support(&mut self, support: &dyn CodecSupport) -> bool {
        if self.is_supported != Tristate::Unknown {
            return false;
        }
        let mime_type = self.mime_type.clone().unwrap_or_default();
        let (codecs, is_supported) = resolve_codecs(&self.codecs, &mime_type, self.is_encrypted(), support);
        self.codecs = codecs;
        self.is_supported = is_supported;
        is_supported != Tristate::Unknown
    }

    pub fn metadata(&self) -> RepresentationMetadata {
        RepresentationMetadata {
            id: self.id.clone(),
            bitrate: self.bitrate,
            codecs: self.codecs.clone(),
            mime_type: self.mime_type.clone(),
            is_supported: self.is_supported,
            decipherable: self.decipherable,
        }
    }
}


/// The primary subtag of a language tag, lowercased ("EN-us" gives "en").
pub fn normalize_language(language: &str) -> Option<String> {
    language.split(['-', '_'])
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
}

/// A selectable stream of one type of media within a Period (an AdaptationSet, or several
/// switchable AdaptationSets merged together).
#[derive(Debug)]
pub struct Track {
    pub id: String,
    pub track_type: TrackType,
    pub language: Option<String>,
    pub normalized_language: Option<String>,
    pub label: Option<String>,
    pub closed_caption: bool,
    pub forced_subtitles: bool,
    pub audio_description: bool,
    pub dub: bool,
    pub sign_interpreted: bool,
    pub is_trick_mode_track: bool,
    /// Ids of sibling trick-mode tracks, stored in [`Period::trick_mode`].
    pub trick_mode_track_ids: Vec<String>,
    /// Sorted by ascending bitrate.
    pub representations: Vec<Representation>,
    pub is_supported: Tristate,
}

impl Track {
    fn from_parsed(parsed: ParsedTrack, options: &ManifestOptions) -> Track {
        let track_type = parsed.track_type;
        let mut representations: Vec<Representation> = parsed.representations.into_iter()
            .filter(|r| match &options.representation_filter {
                Some(filter) => filter(track_type, r),
                None => true,
            })
            .map(|r| Representation::from_parsed(r, track_type, options.codec_support.as_ref()))
            .collect();
        representations.sort_by_key(|r| r.bitrate);
        let is_supported = Tristate::aggregate(representations.iter().map(|r| r.is_supported));
        Track {
            id: parsed.id,
            track_type,
            normalized_language: parsed.language.as_deref().and_then(normalize_language),
            language: parsed.language,
            label: parsed.label,
            closed_caption: parsed.closed_caption,
            forced_subtitles: parsed.forced_subtitles,
            audio_description: parsed.audio_description,
            dub: parsed.dub,
            sign_interpreted: parsed.sign_interpreted,
            is_trick_mode_track: parsed.is_trick_mode_track,
            trick_mode_track_ids: parsed.trick_mode_track_ids,
            representations,
            is_supported,
        }
    }

    pub fn representation(&self, id: &str) -> Option<&Representation> {
        self.representations.iter().find(|r| r.id == id)
    }

    pub fn representation_mut(&mut self, id: &str) -> Option<&mut Representation> {
        self.representations.iter_mut().find(|r| r.id == id)
    }

    pub(crate) fn refresh_support_aggregate(&mut self) {
        self.is_supported = Tristate::aggregate(self.representations.iter().map(|r| r.is_supported));
    }

    pub fn metadata(&self) -> TrackMetadata {
        TrackMetadata {
            id: self.id.clone(),
            track_type: self.track_type,
            language: self.language.clone(),
            representations: self.representations.iter().map(Representation::metadata).collect(),
        }
    }
}


/// A time range of the content with its own set of tracks.
#[derive(Debug)]
pub struct Period {
    pub id: String,
    pub start: f64,
    pub duration: Option<f64>,
    /// `None` when the Period is still open-ended.
    pub end: Option<f64>,
    pub audio: Vec<Track>,
    pub video: Vec<Track>,
    pub text: Vec<Track>,
    pub trick_mode: Vec<Track>,
    pub stream_events: Vec<StreamEvent>,
}

fn build_tracks(parsed: Vec<ParsedTrack>, options: &ManifestOptions) -> Vec<Track> {
    parsed.into_iter()
        .map(|t| Track::from_parsed(t, options))
        .filter(|t| !t.representations.is_empty())
        .collect()
}

impl Period {
    fn from_parsed(
        parsed: ParsedPeriod,
        options: &ManifestOptions,
        warnings: &mut Vec<ManifestWarning>) -> Result<Period, ManifestError>
    {
        let tracks = parsed.tracks;
        let period = Period {
            id: parsed.id,
            start: parsed.start,
            duration: parsed.duration,
            end: parsed.end,
            audio: build_tracks(tracks.audio, options),
            video: build_tracks(tracks.video, options),
            text: build_tracks(tracks.text, options),
            trick_mode: build_tracks(tracks.trick_mode, options),
            stream_events: parsed.stream_events,
        };
        period.check_codec_support(|t| t.is_supported == Tristate::Unsupported, warnings)?;
        Ok(period)
    }

    // Fails if all the audio (or all the video) tracks are unsupported, or if there is neither
    // audio nor video. Tracks selected by `report` are listed in IncompatibleCodecs warnings.
    fn check_codec_support<F>(&self, report: F, warnings: &mut Vec<ManifestWarning>) -> Result<(), ManifestError>
    where
        F: Fn(&Track) -> bool
    {
        for track_type in [TrackType::Audio, TrackType::Video] {
            let tracks = self.tracks(track_type);
            if !tracks.is_empty() && tracks.iter().all(|t| t.is_supported == Tristate::Unsupported) {
                return Err(ManifestError::IncompatibleCodecs {
                    period_id: self.id.clone(),
                    track_type,
                    tracks: tracks.iter().map(Track::metadata).collect(),
                });
            }
        }
        if self.audio.is_empty() && self.video.is_empty() {
            return Err(ManifestError::NoSupportedTracks { period_id: self.id.clone() });
        }
        for track_type in TrackType::ALL {
            let unsupported: Vec<TrackMetadata> = self.tracks(track_type).iter()
                .filter(|t| report(t))
                .map(Track::metadata)
                .collect();
            if !unsupported.is_empty() {
                warn!("Period {}: {} {track_type} track(s) with only incompatible codecs", self.id, unsupported.len());
                warnings.push(ManifestWarning::IncompatibleCodecs { track_type, tracks: unsupported });
            }
        }
        Ok(())
    }

    /// The tracks of one type, in preference order. Trick-mode tracks are not included.
    pub fn tracks(&self, track_type: TrackType) -> &[Track] {
        match track_type {
            TrackType::Audio => &self.audio,
            TrackType::Video => &self.video,
            TrackType::Text => &self.text,
        }
    }

    pub(crate) fn tracks_mut(&mut self, track_type: TrackType) -> &mut Vec<Track> {
        match track_type {
            TrackType::Audio => &mut self.audio,
            TrackType::Video => &mut self.video,
            TrackType::Text => &mut self.text,
        }
    }

    /// All tracks, trick-mode tracks last.
    pub fn all_tracks(&self) -> impl Iterator<Item = &Track> {
        self.audio.iter()
            .chain(self.video.iter())
            .chain(self.text.iter())
            .chain(self.trick_mode.iter())
    }

    pub(crate) fn all_tracks_mut(&mut self) -> impl Iterator<Item = &mut Track> {
        self.audio.iter_mut()
            .chain(self.video.iter_mut())
            .chain(self.text.iter_mut())
            .chain(self.trick_mode.iter_mut())
    }

    pub fn track(&self, id: &str) -> Option<&Track> {
        self.all_tracks().find(|t| t.id == id)
    }

    pub fn track_mut(&mut self, id: &str) -> Option<&mut Track> {
        self.all_tracks_mut().find(|t| t.id == id)
    }

    /// The trick-mode variants attached to `track`.
    pub fn trick_mode_tracks_of(&self, track: &Track) -> Vec<&Track> {
        track.trick_mode_track_ids.iter()
            .filter_map(|id| self.trick_mode.iter().find(|t| &t.id == id))
            .collect()
    }

    pub fn contains_time(&self, time: f64) -> bool {
        time >= self.start && self.end.map_or(true, |end| time < end)
    }

    pub fn metadata(&self) -> PeriodMetadata {
        PeriodMetadata {
            id: self.id.clone(),
            start: self.start,
            duration: self.duration,
            end: self.end,
        }
    }

    fn refresh_codec_support(
        &mut self,
        support: &dyn CodecSupport,
        warnings: &mut Vec<ManifestWarning>) -> Result<(), ManifestError>
    {
        let mut newly_unsupported: Vec<String> = Vec::new();
        for track in self.all_tracks_mut() {
            let mut changed = false;
            for rep in track.representations.iter_mut() {
                changed |= rep.refresh_codec_support(support);
            }
            if changed {
                let before = track.is_supported;
                track.refresh_support_aggregate();
                if before != Tristate::Unsupported && track.is_supported == Tristate::Unsupported {
                    newly_unsupported.push(track.id.clone());
                }
            }
        }
        self.check_codec_support(|t| newly_unsupported.contains(&t.id), warnings)
    }
}


/// A decipherability change reported by [`Manifest::update_representations_decipherability`].
#[derive(Debug, Clone, PartialEq)]
pub struct DecipherabilityUpdate {
    pub period_id: String,
    pub track_id: String,
    pub representation_id: String,
    pub decipherable: Tristate,
}

/// The root of the model.
#[derive(Debug)]
pub struct Manifest {
    pub id: String,
    /// Sorted by start time, without overlaps.
    pub periods: Vec<Period>,
    pub is_dynamic: bool,
    pub is_live: bool,
    /// Whether no Period can be added after the current last one.
    pub is_last_period_known: bool,
    pub time_bounds: TimeBounds,
    /// Recommended interval between two refreshes, in seconds.
    pub lifetime: Option<f64>,
    pub uris: Vec<String>,
    pub clock_offset: Option<f64>,
    pub availability_start_time: f64,
    pub publish_time: Option<XsDatetime>,
    pub suggested_presentation_delay: Option<f64>,
    options: ManifestOptions,
}

impl Manifest {
    /// Build the model from a parse result. Returns the non-fatal warnings produced while building it.
    pub fn from_parsed(
        parsed: ParsedManifest,
        options: ManifestOptions) -> Result<(Manifest, Vec<ManifestWarning>), ManifestError>
    {
        let mut warnings = Vec::new();
        let mut periods = Vec::with_capacity(parsed.periods.len());
        for period in parsed.periods {
            periods.push(Period::from_parsed(period, &options, &mut warnings)?);
        }
        let id = format!("gen-dash-manifest-{}", MANIFEST_ID.fetch_add(1, Ordering::Relaxed));
        let manifest = Manifest {
            id,
            periods,
            is_dynamic: parsed.is_dynamic,
            is_live: parsed.is_live,
            is_last_period_known: parsed.is_last_period_known,
            time_bounds: parsed.time_bounds,
            lifetime: parsed.lifetime,
            uris: parsed.uris,
            clock_offset: parsed.clock_offset,
            availability_start_time: parsed.availability_start_time,
            publish_time: parsed.publish_time,
            suggested_presentation_delay: parsed.suggested_presentation_delay,
            options,
        };
        Ok((manifest, warnings))
    }

    pub fn options(&self) -> &ManifestOptions {
        &self.options
    }

    /// The earliest position that can safely be played, given the monotonic clock reading `now` (ms).
    pub fn minimum_safe_position(&self, now: f64) -> f64 {
        self.time_bounds.minimum_safe_position(now)
    }

    /// The latest position that can safely be played, given the monotonic clock reading `now` (ms).
    pub fn maximum_safe_position(&self, now: f64) -> f64 {
        self.time_bounds.maximum_safe_position(now)
    }

    /// The live edge, for dynamic content.
    pub fn live_position(&self, now: f64) -> Option<f64> {
        self.time_bounds.live_position(now)
    }

    fn now(&self) -> f64 {
        self.options.time_source.monotonic_ms()
    }

    pub fn current_minimum_safe_position(&self) -> f64 {
        self.minimum_safe_position(self.now())
    }

    pub fn current_maximum_safe_position(&self) -> f64 {
        self.maximum_safe_position(self.now())
    }

    pub fn current_live_position(&self) -> Option<f64> {
        self.live_position(self.now())
    }

    pub fn period(&self, id: &str) -> Option<&Period> {
        self.periods.iter().find(|p| p.id == id)
    }

    pub fn period_mut(&mut self, id: &str) -> Option<&mut Period> {
        self.periods.iter_mut().find(|p| p.id == id)
    }

    /// The Period playing at `time` (in seconds).
    pub fn period_for_time(&self, time: f64) -> Option<&Period> {
        self.periods.iter().find(|p| p.contains_time(time))
    }

    /// The Period following `period`, if there is one.
    pub fn next_period(&self, period: &Period) -> Option<&Period> {
        let idx = self.periods.iter().position(|p| p.id == period.id)?;
        self.periods.get(idx + 1)
    }

    /// Merge a refreshed manifest, discarding everything not present in it.
    pub fn replace(&mut self, parsed: ParsedManifest) -> Result<ManifestUpdate, ManifestError> {
        let (newer, warnings) = Manifest::from_parsed(parsed, self.options.clone())?;
        self.perform_update(newer, UpdateType::Full, warnings)
    }

    /// Merge a refreshed manifest which may only describe part of the content.
    pub fn update(&mut self, parsed: ParsedManifest) -> Result<ManifestUpdate, ManifestError> {
        let (newer, warnings) = Manifest::from_parsed(parsed, self.options.clone())?;
        self.perform_update(newer, UpdateType::Partial, warnings)
    }

    fn perform_update(
        &mut self,
        newer: Manifest,
        update_type: UpdateType,
        mut warnings: Vec<ManifestWarning>) -> Result<ManifestUpdate, ManifestError>
    {
        let mut periods = match update_type {
            UpdateType::Full => replace_periods(&mut self.periods, newer.periods, &mut warnings),
            UpdateType::Partial => update_periods(&mut self.periods, newer.periods, &mut warnings)?,
        };
        self.availability_start_time = newer.availability_start_time;
        self.is_dynamic = newer.is_dynamic;
        self.is_live = newer.is_live;
        self.is_last_period_known = newer.is_last_period_known;
        self.lifetime = newer.lifetime;
        self.clock_offset = newer.clock_offset;
        self.suggested_presentation_delay = newer.suggested_presentation_delay;
        self.publish_time = newer.publish_time;
        match update_type {
            UpdateType::Full => {
                self.time_bounds = newer.time_bounds;
                self.uris = newer.uris;
            },
            UpdateType::Partial => {
                self.time_bounds.maximum_time_data = newer.time_bounds.maximum_time_data;
                // Partial updates never drop old Periods by themselves; evict those which can no
                // longer be played.
                let minimum = self.current_minimum_safe_position();
                while self.periods.first().is_some_and(|p| p.end.is_some_and(|end| end <= minimum)) {
                    let evicted = self.periods.remove(0);
                    debug!("Evicting Period {} which ended before {minimum}", evicted.id);
                    periods.removed_periods.push(evicted.metadata());
                }
            },
        }
        Ok(ManifestUpdate { periods, warnings })
    }

    /// Ask `support` again about every Representation whose support is still unknown. Fails as
    /// building the manifest would if a Period ends up without any supported audio or video track.
    pub fn refresh_codec_support(&mut self, support: &dyn CodecSupport) -> Result<Vec<ManifestWarning>, ManifestError> {
        let mut warnings = Vec::new();
        for period in self.periods.iter_mut() {
            period.refresh_codec_support(support, &mut warnings)?;
        }
        Ok(warnings)
    }

    /// Re-evaluate the decipherability of every encrypted Representation with `is_decipherable`,
    /// returning the Representations whose state changed.
    pub fn update_representations_decipherability<F>(&mut self, mut is_decipherable: F) -> Vec<DecipherabilityUpdate>
    where
        F: FnMut(&Representation) -> Tristate
    {
        let mut changes = Vec::new();
        for period in self.periods.iter_mut() {
            let period_id = period.id.clone();
            for track in period.all_tracks_mut() {
                for rep in track.representations.iter_mut().filter(|r| r.is_encrypted()) {
                    let decipherable = is_decipherable(rep);
                    if decipherable != rep.decipherable {
                        rep.decipherable = decipherable;
                        changes.push(DecipherabilityUpdate {
                            period_id: period_id.clone(),
                            track_id: track.id.clone(),
                            representation_id: rep.id.clone(),
                            decipherable,
                        });
                    }
                }
            }
        }
        changes
    }
}
