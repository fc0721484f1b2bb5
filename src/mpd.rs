//! Normalizing a whole MPD document into a [`ParsedManifest`].
//
// Some documents cannot be normalized from their own content alone:
//
// - dynamic content needs a server clock, which the MPD may advertise as an HTTP resource in a
//   UTCTiming element;
// - Periods may be XLink references to remote resources, to be fetched before normalization.
//
// We never do network I/O. Instead `parse_mpd` returns a request describing what it needs, and the
// caller resumes the parse with the fetched data. Several rounds may be needed (for instance the
// clock, then XLink Periods, then XLink Periods referenced by the first remote resources).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use crate::bounds::{compute_time_bounds, ManifestBoundsCalculator, RootTiming};
use crate::clock::{clock_offset_from_payload, direct_utc_timing, http_utc_timing_url, SystemTimeSource, TimeSource};
use crate::content_protection::ContentProtectionParser;
use crate::ir::{self, MPD};
use crate::manifest::Manifest;
use crate::parsed::ParsedManifest;
use crate::period::{parse_periods, DocumentContext};
use crate::representation::{resolve_base_urls, ResolvedBaseUrl};
use crate::segment::{DashIndexBuilder, SegmentIndexBuilder};
use crate::{ManifestError, ManifestWarning};


/// An XLink href with this value removes the referencing element, without any fetch.
pub const RESOLVE_TO_ZERO: &str = "urn:mpeg:dash:resolve-to-zero:2013";

/// Refresh interval used when `@minimumUpdatePeriod` is zero.
const DEFAULT_LIFETIME: f64 = 3.0;


/// Arguments of a parse pass.
#[derive(Clone)]
pub struct ParseOptions {
    url: Option<String>,
    external_clock_offset: Option<f64>,
    previous_clock_offset: Option<f64>,
    received_time: Option<f64>,
    reference_date_time: Option<f64>,
    time_source: Arc<dyn TimeSource>,
    index_builder: Arc<dyn SegmentIndexBuilder>,
}

impl fmt::Debug for ParseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseOptions")
            .field("url", &self.url)
            .field("external_clock_offset", &self.external_clock_offset)
            .field("previous_clock_offset", &self.previous_clock_offset)
            .field("received_time", &self.received_time)
            .field("reference_date_time", &self.reference_date_time)
            .field("time_source", &self.time_source)
            .field("index_builder", &self.index_builder)
            .finish()
    }
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            url: None,
            external_clock_offset: None,
            previous_clock_offset: None,
            received_time: None,
            reference_date_time: None,
            time_source: Arc::new(SystemTimeSource),
            index_builder: Arc::new(DashIndexBuilder),
        }
    }
}

impl ParseOptions {
    pub fn new() -> ParseOptions {
        ParseOptions::default()
    }

    /// The URL the document was fetched from. Relative BaseURLs are resolved against it.
    pub fn url(mut self, url: &str) -> ParseOptions {
        self.url = Some(url.to_string());
        self
    }

    /// A clock offset (server time minus monotonic time, in milliseconds) already known to the
    /// caller. When set, no clock request is made.
    pub fn external_clock_offset(mut self, offset: f64) -> ParseOptions {
        self.external_clock_offset = Some(offset);
        self
    }

    /// Monotonic clock reading (milliseconds) at which the document was received.
    pub fn received_time(mut self, time: f64) -> ParseOptions {
        self.received_time = Some(time);
        self
    }

    /// Fallback availabilityStartTime (seconds since the Unix epoch) for dynamic documents which
    /// don't declare one.
    pub fn reference_date_time(mut self, seconds: f64) -> ParseOptions {
        self.reference_date_time = Some(seconds);
        self
    }

    /// The manifest this document refreshes. Its clock offset is reused when no external offset is
    /// provided, which avoids requesting the clock resource again.
    pub fn previous_manifest(mut self, manifest: &Manifest) -> ParseOptions {
        self.previous_clock_offset = manifest.clock_offset;
        self
    }

    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> ParseOptions {
        self.time_source = time_source;
        self
    }

    pub fn with_index_builder(mut self, index_builder: Arc<dyn SegmentIndexBuilder>) -> ParseOptions {
        self.index_builder = index_builder;
        self
    }
}


/// The Periods obtained from one remote resource, as requested by an [`XlinkRequest`].
#[derive(Debug, Clone, Default)]
pub struct LinkedResource {
    /// Zero or more Periods replacing the referencing one. See [`ir::parse_xlink_periods`].
    pub periods: Vec<ir::Period>,
    /// Monotonic clock readings (milliseconds) of the request and of the response. The Periods
    /// are considered as received at `received_time`, or at `send_time` when only that is known.
    pub send_time: Option<f64>,
    pub received_time: Option<f64>,
    /// Warnings encountered by the caller while loading the resource.
    pub warnings: Vec<ManifestWarning>,
}

/// A finished parse.
#[derive(Debug)]
pub struct ParsedResult {
    pub manifest: ParsedManifest,
    pub warnings: Vec<ManifestWarning>,
}

/// The outcome of a parse step.
#[derive(Debug)]
pub enum ParseStatus {
    NeedsClock(ClockRequest),
    NeedsXlinks(XlinkRequest),
    Done(ParsedResult),
}

/// The parse is waiting for the content of a time server resource.
#[derive(Debug)]
pub struct ClockRequest {
    url: String,
    state: ParseState,
}

impl ClockRequest {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Continue with the body of the time server response, or with a description of why it
    /// couldn't be fetched. A failure is not fatal: parsing goes on with the local clock.
    pub fn resume(self, response: Result<String, String>) -> Result<ParseStatus, ManifestError> {
        let mut state = self.state;
        state.clock_loaded = true;
        match response {
            Ok(payload) => match clock_offset_from_payload(&payload, state.options.time_source.as_ref()) {
                Ok(offset) => state.clock_offset = Some(offset),
                Err(w) => state.warnings.push(w),
            },
            Err(e) => {
                warn!("Fetching clock resource {} failed: {e}", self.url);
                state.warnings.push(ManifestWarning::ClockFetchFailed(e));
            },
        }
        state.run()
    }
}

/// The parse is waiting for remote Periods.
#[derive(Debug)]
pub struct XlinkRequest {
    // index of the referencing Period, and the resource URL
    pending: Vec<(usize, String)>,
    state: ParseState,
}

impl XlinkRequest {
    /// URLs of the resources to fetch, in document order.
    pub fn urls(&self) -> Vec<&str> {
        self.pending.iter().map(|(_, url)| url.as_str()).collect()
    }

    /// Continue with one resource per requested URL, in the same order.
    pub fn resume(self, resources: Vec<LinkedResource>) -> Result<ParseStatus, ManifestError> {
        if resources.len() != self.pending.len() {
            return Err(ManifestError::XlinkResourceCount {
                expected: self.pending.len(),
                received: resources.len(),
            });
        }
        let mut state = self.state;
        // From the end, so that the indexes of Periods not yet replaced stay valid.
        for ((index, url), resource) in self.pending.into_iter().zip(resources).rev() {
            debug!("Replacing Period #{index} with {} Period(s) from {url}", resource.periods.len());
            let count = resource.periods.len();
            let received_time = resource.received_time.or(resource.send_time);
            state.mpd.periods.splice(index..index + 1, resource.periods);
            state.period_received_times.splice(index..index + 1, std::iter::repeat(received_time).take(count));
            state.warnings.extend(resource.warnings);
        }
        state.run()
    }
}


fn is_xlink_to_load(period: &ir::Period) -> bool {
    let Some(href) = period.href.as_deref() else { return false };
    !href.is_empty() && href != RESOLVE_TO_ZERO
        && period.actuate.as_deref().map_or(true, |a| a == "onLoad")
}

#[derive(Debug)]
struct ParseState {
    mpd: MPD,
    options: ParseOptions,
    clock_offset: Option<f64>,
    clock_loaded: bool,
    // parallel to `mpd.periods`
    period_received_times: Vec<Option<f64>>,
    warnings: Vec<ManifestWarning>,
}

fn secs(d: Option<Duration>) -> Option<f64> {
    d.map(|d| d.as_secs_f64())
}

impl ParseState {
    fn run(mut self) -> Result<ParseStatus, ManifestError> {
        if self.mpd.is_dynamic() && self.clock_offset.is_none() && !self.clock_loaded {
            let time_source = self.options.time_source.clone();
            if let Some(direct) = direct_utc_timing(&self.mpd.UTCTiming) {
                match clock_offset_from_payload(direct, time_source.as_ref()) {
                    Ok(offset) => self.clock_offset = Some(offset),
                    Err(w) => self.warnings.push(w),
                }
                self.clock_loaded = true;
            } else if let Some(url) = http_utc_timing_url(&self.mpd) {
                debug!("Suspending parse to fetch clock from {url}");
                return Ok(ParseStatus::NeedsClock(ClockRequest { url, state: self }));
            }
        }

        let mut index = 0;
        while index < self.mpd.periods.len() {
            if self.mpd.periods[index].href.as_deref() == Some(RESOLVE_TO_ZERO) {
                debug!("Removing Period #{index} which resolves to zero");
                self.mpd.periods.remove(index);
                self.period_received_times.remove(index);
            } else {
                index += 1;
            }
        }
        let pending: Vec<(usize, String)> = self.mpd.periods.iter()
            .enumerate()
            .filter(|(_, p)| is_xlink_to_load(p))
            .filter_map(|(i, p)| p.href.clone().map(|href| (i, href)))
            .collect();
        if !pending.is_empty() {
            debug!("Suspending parse to fetch {} XLink Period(s)", pending.len());
            return Ok(ParseStatus::NeedsXlinks(XlinkRequest { pending, state: self }));
        }
        self.finish().map(ParseStatus::Done)
    }

    fn finish(self) -> Result<ParsedResult, ManifestError> {
        let ParseState { mpd, options, clock_offset, period_received_times, mut warnings, .. } = self;
        let is_dynamic = mpd.is_dynamic();
        let time_source = options.time_source.clone();
        let root = match &options.url {
            Some(url) => vec![ResolvedBaseUrl { url: url.clone(), service_location: None }],
            None => Vec::new(),
        };
        let base_urls = resolve_base_urls(&root, &mpd.base_url);

        let availability_start_time = if is_dynamic {
            mpd.availabilityStartTime
                .map(|ast| ast.timestamp_millis() as f64 / 1000.0)
                .or(options.reference_date_time)
                .unwrap_or_else(|| time_source.wall_clock_ms() / 1000.0)
        } else {
            0.0
        };
        let duration = secs(mpd.mediaPresentationDuration);
        let time_shift_buffer_depth = secs(mpd.timeShiftBufferDepth);
        let lifetime = secs(mpd.minimumUpdatePeriod)
            .map(|mup| if mup > 0.0 { mup } else { DEFAULT_LIFETIME });

        let mut bounds = ManifestBoundsCalculator::new(
            is_dynamic, availability_start_time, time_shift_buffer_depth, clock_offset, time_source.clone());
        let mut protection = ContentProtectionParser::new();
        protection.add_references(&mpd.ContentProtection);
        let ctx = DocumentContext {
            base_urls: &base_urls,
            is_dynamic,
            availability_start_time,
            duration,
            manifest_profiles: mpd.profiles.as_deref(),
            time_shift_buffer_depth,
            received_time: options.received_time,
            clock_offset,
            period_received_times: &period_received_times,
            index_builder: options.index_builder.as_ref(),
        };
        let mut periods = parse_periods(&mpd.periods, &ctx, &mut bounds, &mut protection, &mut warnings)?;

        warnings.extend(protection.finalize());
        for period in periods.iter_mut() {
            for track in period.tracks.iter_mut() {
                for rep in track.representations.iter_mut() {
                    if let Some(slot) = rep.protection_slot {
                        rep.content_protections = protection.data_for(slot).cloned();
                    }
                }
            }
        }

        let last_period_end = periods.last().and_then(|p| p.end);
        let is_last_period_known = !is_dynamic
            || (mpd.minimumUpdatePeriod.is_none() && (last_period_end.is_some() || duration.is_some()));
        let time_bounds = compute_time_bounds(
            &RootTiming {
                is_dynamic,
                media_presentation_duration: duration,
                time_shift_buffer_depth,
                max_segment_duration: secs(mpd.maxSegmentDuration),
            },
            &periods,
            &bounds);
        let uris = options.url.iter()
            .cloned()
            .chain(mpd.locations.iter().map(|l| l.url.trim().to_string()).filter(|u| !u.is_empty()))
            .collect();

        let manifest = ParsedManifest {
            is_dynamic,
            is_live: is_dynamic,
            is_last_period_known,
            periods,
            time_bounds,
            lifetime,
            uris,
            clock_offset,
            availability_start_time,
            publish_time: mpd.publishTime,
            suggested_presentation_delay: secs(mpd.suggestedPresentationDelay),
        };
        Ok(ParsedResult { manifest, warnings })
    }
}

/// Start normalizing `mpd`. The result is either finished, or a request for external data to be
/// resumed by the caller.
///
/// # Example
///
/// ```rust
/// use dash_manifest::{parse, parse_mpd, ParseOptions, ParseStatus};
///
/// let xml = r#"<MPD type="static" mediaPresentationDuration="PT10S">
///   <Period id="p0">
///     <AdaptationSet contentType="video" mimeType="video/mp4">
///       <SegmentTemplate timescale="1000" duration="2000" media="$Number$.m4s"/>
///       <Representation id="v0" bandwidth="500000" codecs="avc1.4D401F"/>
///     </AdaptationSet>
///   </Period>
/// </MPD>"#;
/// let mpd = parse(xml).unwrap();
/// match parse_mpd(mpd, ParseOptions::new().url("https://example.com/dash/manifest.mpd")).unwrap() {
///     ParseStatus::Done(result) => assert_eq!(result.manifest.periods.len(), 1),
///     _ => panic!("no external resource needed"),
/// }
/// ```
pub fn parse_mpd(mpd: MPD, options: ParseOptions) -> Result<ParseStatus, ManifestError> {
    let clock_offset = options.external_clock_offset.or(options.previous_clock_offset);
    let state = ParseState {
        period_received_times: vec![None; mpd.periods.len()],
        mpd,
        options,
        clock_offset,
        clock_loaded: false,
        warnings: Vec::new(),
    };
    state.run()
}
