//! Live bounds: the last available position of the content and, for dynamic manifests, the live edge.
//
// A static manifest has fixed bounds which follow directly from its duration and the end of its
// last Period. A dynamic manifest describes content which is still being produced: the last
// available position keeps advancing, so what we store is a position *and* the monotonic clock
// reading at which that position was valid. All later estimates extrapolate from that pair.

use std::sync::Arc;
use tracing::{debug, warn};
use crate::clock::TimeSource;
use crate::parsed::{ParsedPeriod, ParsedTrack};
use crate::segment::LastPosition;


/// Accumulates evidence about the last position of the content while a manifest is parsed.
#[derive(Debug, Clone)]
pub struct ManifestBoundsCalculator {
    is_dynamic: bool,
    availability_start_time: f64,
    time_shift_buffer_depth: Option<f64>,
    // server time minus monotonic time, in milliseconds
    server_timestamp_offset: Option<f64>,
    last_position: Option<f64>,
    // monotonic milliseconds at which `last_position` was observed
    position_time: Option<f64>,
    time_source: Arc<dyn TimeSource>,
}

impl ManifestBoundsCalculator {
    pub fn new(
        is_dynamic: bool,
        availability_start_time: f64,
        time_shift_buffer_depth: Option<f64>,
        server_timestamp_offset: Option<f64>,
        time_source: Arc<dyn TimeSource>) -> Self
    {
        ManifestBoundsCalculator {
            is_dynamic,
            availability_start_time,
            time_shift_buffer_depth,
            server_timestamp_offset,
            last_position: None,
            position_time: None,
            time_source,
        }
    }

    /// Record the last available position. For dynamic content `position_time` should be the
    /// monotonic clock reading (milliseconds) at which that position was valid.
    pub fn set_last_position(&mut self, last_position: f64, position_time: Option<f64>) {
        self.last_position = Some(last_position);
        self.position_time = position_time;
    }

    /// For dynamic content a position is only useful along with the time at which it was observed.
    pub fn last_position_is_known(&self) -> bool {
        if self.is_dynamic {
            self.last_position.is_some() && self.position_time.is_some()
        } else {
            self.last_position.is_some()
        }
    }

    pub fn last_position(&self) -> Option<f64> {
        self.last_position
    }

    pub fn position_time(&self) -> Option<f64> {
        self.position_time
    }

    pub fn is_dynamic(&self) -> bool {
        self.is_dynamic
    }

    pub fn time_source(&self) -> &Arc<dyn TimeSource> {
        &self.time_source
    }

    /// The live edge derived from the server clock, in seconds relative to availabilityStartTime.
    /// Only defined for dynamic content whose clock offset is known.
    pub fn estimated_live_edge(&self) -> Option<f64> {
        if !self.is_dynamic {
            return None;
        }
        let offset = self.server_timestamp_offset?;
        Some((self.time_source.monotonic_ms() + offset) / 1000.0 - self.availability_start_time)
    }

    /// The maximum position at which a segment may currently be available. Segments are announced
    /// `availability_time_offset` seconds before their end on low-latency streams.
    pub fn estimated_maximum_position(&self, availability_time_offset: f64) -> Option<f64> {
        if !self.is_dynamic {
            return self.last_position;
        }
        if let Some(live_edge) = self.estimated_live_edge() {
            if availability_time_offset.is_finite() {
                return Some(live_edge + availability_time_offset);
            }
        }
        match (self.last_position, self.position_time) {
            (Some(position), Some(time)) => {
                let elapsed = (self.time_source.monotonic_ms() - time) / 1000.0;
                Some(position + elapsed)
            },
            _ => None,
        }
    }

    /// The earliest position at which segments may still be available, given the time-shift buffer.
    pub fn estimated_minimum_segment_time(&self) -> Option<f64> {
        if !self.is_dynamic {
            return Some(0.0);
        }
        let Some(depth) = self.time_shift_buffer_depth else {
            return Some(0.0);
        };
        let maximum = self.estimated_live_edge()
            .or_else(|| self.estimated_maximum_position(0.0))?;
        Some(maximum - depth)
    }
}


/// The largest concrete last position over all the representations of these tracks. `Empty` only
/// if every index is known to be empty.
pub fn maximum_last_position<'a, I>(tracks: I) -> LastPosition
where
    I: IntoIterator<Item = &'a ParsedTrack>
{
    let mut max_position: Option<f64> = None;
    let mut all_empty = true;
    for track in tracks {
        for rep in &track.representations {
            match rep.index.last_available_position() {
                LastPosition::Empty => (),
                LastPosition::Indeterminate => all_empty = false,
                LastPosition::Known(pos) => {
                    all_empty = false;
                    max_position = Some(max_position.map_or(pos, |m| m.max(pos)));
                },
            }
        }
    }
    match max_position {
        Some(pos) => LastPosition::Known(pos),
        None if all_empty => LastPosition::Empty,
        None => LastPosition::Indeterminate,
    }
}

/// Guess the current last position from a clock, when no index could tell us. Uses the server
/// clock offset if known, otherwise the local wall clock. The guess is rejected when it lies
/// before `minimum_time`, typically the start of the Period being considered.
///
/// Returns the guessed position along with the monotonic time (milliseconds) it was computed at.
pub fn guess_last_position_from_clock(
    clock_offset: Option<f64>,
    availability_start_time: f64,
    time_source: &dyn TimeSource,
    minimum_time: f64) -> Option<(f64, f64)>
{
    let now = time_source.monotonic_ms();
    let guess = match clock_offset {
        Some(offset) => (now + offset) / 1000.0 - availability_start_time,
        None => {
            let wall = time_source.wall_clock_ms() / 1000.0;
            let guess = wall - availability_start_time;
            if guess >= minimum_time {
                warn!("No clock synchronization mechanism found, guessing the last position from local time");
            }
            guess
        },
    };
    if guess >= minimum_time {
        debug!(guess, minimum_time, "Guessed last position from clock");
        Some((guess, now))
    } else {
        None
    }
}


/// Where the content ends (or currently ends, for live content).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaximumTimeData {
    /// Whether the maximum position keeps advancing with time.
    pub is_linear: bool,
    pub maximum_safe_position: f64,
    pub live_position: Option<f64>,
    /// Monotonic clock reading, in milliseconds, at which the positions above were valid.
    pub time: f64,
}

impl MaximumTimeData {
    fn elapsed_secs(&self, now: f64) -> f64 {
        if self.is_linear { (now - self.time) / 1000.0 } else { 0.0 }
    }

    pub fn maximum_safe_position_at(&self, now: f64) -> f64 {
        self.maximum_safe_position + self.elapsed_secs(now)
    }

    pub fn live_position_at(&self, now: f64) -> Option<f64> {
        self.live_position.map(|p| p + self.elapsed_secs(now))
    }
}

/// The seekable window of a manifest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeBounds {
    pub minimum_safe_position: f64,
    /// Depth of the time-shift window, `None` when the whole content stays available.
    pub timeshift_depth: Option<f64>,
    pub maximum_time_data: MaximumTimeData,
}

impl TimeBounds {
    pub fn maximum_safe_position(&self, now: f64) -> f64 {
        self.maximum_time_data.maximum_safe_position_at(now)
    }

    pub fn live_position(&self, now: f64) -> Option<f64> {
        self.maximum_time_data.live_position_at(now)
    }

    pub fn minimum_safe_position(&self, now: f64) -> f64 {
        match self.timeshift_depth {
            None => self.minimum_safe_position,
            Some(depth) => {
                let maximum = self.maximum_time_data.maximum_safe_position_at(now);
                self.minimum_safe_position.max(maximum - depth)
            },
        }
    }
}

/// Inputs of [`compute_time_bounds`] which come from the document root.
#[derive(Debug, Clone, Copy, Default)]
pub struct RootTiming {
    pub is_dynamic: bool,
    pub media_presentation_duration: Option<f64>,
    pub time_shift_buffer_depth: Option<f64>,
    pub max_segment_duration: Option<f64>,
}

/// Derive the time bounds of a manifest once all its Periods have been composed.
pub fn compute_time_bounds(
    root: &RootTiming,
    periods: &[ParsedPeriod],
    calculator: &ManifestBoundsCalculator) -> TimeBounds
{
    let now = calculator.time_source().monotonic_ms();
    let content_start = periods.first().map_or(0.0, |p| p.start);
    let last_period_end = periods.last().and_then(|p| p.end);

    // The smallest of all the upper bounds we know about.
    let cap = |position: f64| -> f64 {
        [root.media_presentation_duration, last_period_end]
            .into_iter()
            .flatten()
            .fold(position, f64::min)
    };

    if !root.is_dynamic {
        let maximum = calculator.last_position()
            .or(root.media_presentation_duration)
            .or(last_period_end)
            .unwrap_or(content_start);
        return TimeBounds {
            minimum_safe_position: content_start,
            timeshift_depth: None,
            maximum_time_data: MaximumTimeData {
                is_linear: false,
                maximum_safe_position: cap(maximum),
                live_position: None,
                time: now,
            },
        };
    }

    let live_edge = calculator.estimated_live_edge();
    let (maximum, time) = match (calculator.last_position(), calculator.position_time()) {
        (Some(position), Some(position_time)) => {
            // bring the observed position forward to the present
            (position + (now - position_time) / 1000.0, now)
        },
        _ => (live_edge.unwrap_or(content_start), now),
    };
    let maximum_safe_position = cap(maximum);
    let live_position = live_edge.unwrap_or(maximum_safe_position);
    let is_linear = root.media_presentation_duration.is_none() && last_period_end.is_none();

    let minimum_safe_position = match root.time_shift_buffer_depth {
        Some(depth) => content_start.max(maximum_safe_position - depth),
        None => content_start,
    };
    let timeshift_depth = root.time_shift_buffer_depth.map(|depth| {
        let widened = depth.max(live_position - minimum_safe_position);
        widened + root.max_segment_duration.unwrap_or(0.0)
    });
    TimeBounds {
        minimum_safe_position,
        timeshift_depth,
        maximum_time_data: MaximumTimeData {
            is_linear,
            maximum_safe_position,
            live_position: Some(live_position),
            time,
        },
    }
}
