//! The segment-addressing contract, and a default DASH implementation of it.
//
// The model never computes individual segment URLs itself. Each Representation owns an opaque index
// which answers a small set of questions about which positions are available, and which knows how
// to reconcile itself with the index of the same Representation from a refreshed manifest.
//
// There are four ways of describing segments in an MPD (ISO/IEC 23009-1 clause 5.3.9):
//   - SegmentBase: a single segment, with an optional index (sidx box) at @indexRange
//   - SegmentList: an explicit list of SegmentURL elements
//   - SegmentTemplate with @duration: segments of constant duration, numbered from @startNumber
//   - SegmentTemplate with a SegmentTimeline: explicit start times and durations, run-length encoded

use std::any::Any;
use std::fmt;
use tracing::trace;
use crate::ir;


/// Outcome of asking an index where its content ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LastPosition {
    /// The end position of the last available segment, in seconds.
    Known(f64),
    /// There are no segments.
    Empty,
    /// Segments exist but the position of the last one cannot be determined yet.
    Indeterminate,
}

impl LastPosition {
    pub fn known(self) -> Option<f64> {
        match self {
            LastPosition::Known(p) => Some(p),
            _ => None,
        }
    }
}

/// Segment index of one Representation.
pub trait SegmentIndex: fmt::Debug + Send + Sync {
    fn last_available_position(&self) -> LastPosition;

    fn first_available_position(&self) -> LastPosition;

    /// Incrementally reconcile with the index of the same Representation from a newer manifest.
    /// Segments which are still described by `newer` keep their identity.
    fn update(&mut self, newer: &dyn SegmentIndex);

    /// Take over all the information of `newer`.
    fn replace(&mut self, newer: &dyn SegmentIndex);

    fn as_any(&self) -> &dyn Any;
}

/// Everything a [`SegmentIndexBuilder`] may need to know about a Representation.
#[derive(Debug, Clone, Copy)]
pub struct IndexContext<'a> {
    pub representation_id: &'a str,
    pub representation: &'a ir::Representation,
    pub adaptation: &'a ir::AdaptationSet,
    pub period_template: Option<&'a ir::SegmentTemplate>,
    pub period_start: f64,
    pub period_end: Option<f64>,
    pub is_dynamic: bool,
    /// Live edge estimated from the server clock at parse time, in seconds.
    pub live_edge: Option<f64>,
    pub time_shift_buffer_depth: Option<f64>,
    /// Monotonic milliseconds at which the document describing this Representation was received.
    pub received_time: Option<f64>,
}

/// Builds the segment index of each Representation while a manifest is being normalized.
pub trait SegmentIndexBuilder: fmt::Debug + Send + Sync {
    fn build(&self, context: &IndexContext<'_>) -> Box<dyn SegmentIndex>;
}


/// The default builder, which creates an [`MpdSegmentIndex`] from the segment information in the MPD.
#[derive(Debug, Default, Clone, Copy)]
pub struct DashIndexBuilder;

impl SegmentIndexBuilder for DashIndexBuilder {
    fn build(&self, context: &IndexContext<'_>) -> Box<dyn SegmentIndex> {
        Box::new(MpdSegmentIndex::from_context(context))
    }
}


/// One `S` element of a SegmentTimeline, with its start time resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineEntry {
    pub start: i64,
    pub duration: i64,
    /// Number of repetitions after the first segment. Negative means "until the end of the Period".
    pub repeat: i64,
}

impl TimelineEntry {
    // End time in timescale units. None when the repeat count is open-ended, or when the end
    // doesn't fit in an i64, in which case the entry is handled as open-ended too.
    fn end(&self) -> Option<i64> {
        if self.repeat < 0 {
            return None;
        }
        self.repeat.checked_add(1)
            .and_then(|count| self.duration.checked_mul(count))
            .and_then(|length| self.start.checked_add(length))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Addressing {
    Timeline {
        timescale: u64,
        presentation_time_offset: u64,
        entries: Vec<TimelineEntry>,
    },
    Template {
        timescale: u64,
        duration: f64,
        availability_time_offset: f64,
    },
    List {
        timescale: u64,
        duration: Option<u64>,
        count: usize,
    },
    Base,
}

/// A segment index built from the SegmentTimeline, SegmentTemplate, SegmentList or SegmentBase
/// information of a Representation.
#[derive(Debug, Clone, PartialEq)]
pub struct MpdSegmentIndex {
    addressing: Addressing,
    period_start: f64,
    period_end: Option<f64>,
    is_dynamic: bool,
    live_edge: Option<f64>,
    time_shift_buffer_depth: Option<f64>,
}

// Expand the run-length encoded S elements. An S element without @t starts where the previous one
// ended.
fn timeline_entries(timeline: &ir::SegmentTimeline, presentation_time_offset: u64) -> Vec<TimelineEntry> {
    let mut entries = Vec::with_capacity(timeline.segments.len());
    let mut next_start = i64::try_from(presentation_time_offset).unwrap_or(i64::MAX);
    for s in &timeline.segments {
        let start = s.t.unwrap_or(next_start);
        let entry = TimelineEntry { start, duration: s.d, repeat: s.r.unwrap_or(0) };
        if let Some(end) = entry.end() {
            next_start = end;
        }
        entries.push(entry);
    }
    entries
}

impl MpdSegmentIndex {
    pub fn from_context(context: &IndexContext<'_>) -> MpdSegmentIndex {
        let rep = context.representation;
        let adaptation = context.adaptation;
        // SegmentTemplate inheritance: Period, then AdaptationSet, then Representation
        let mut template: Option<ir::SegmentTemplate> = context.period_template.cloned();
        for st in [adaptation.SegmentTemplate.as_ref(), rep.SegmentTemplate.as_ref()].into_iter().flatten() {
            template = Some(match template {
                Some(parent) => st.inherit_from(&parent),
                None => st.clone(),
            });
        }
        let addressing = if let Some(st) = template.as_ref().filter(|st| st.SegmentTimeline.is_some() || st.duration.is_some()) {
            let timescale = st.timescale.unwrap_or(1);
            let presentation_time_offset = st.presentationTimeOffset.unwrap_or(0);
            match &st.SegmentTimeline {
                Some(timeline) => Addressing::Timeline {
                    timescale,
                    presentation_time_offset,
                    entries: timeline_entries(timeline, presentation_time_offset),
                },
                None => Addressing::Template {
                    timescale,
                    duration: st.duration.unwrap_or(0.0),
                    availability_time_offset: st.availabilityTimeOffset.unwrap_or(0.0),
                },
            }
        } else if let Some(sl) = rep.SegmentList.as_ref().or(adaptation.SegmentList.as_ref()) {
            Addressing::List {
                timescale: sl.timescale.unwrap_or(1),
                duration: sl.duration,
                count: sl.segment_urls.len(),
            }
        } else {
            Addressing::Base
        };
        trace!("Segment index for Representation {}: {addressing:?}", context.representation_id);
        MpdSegmentIndex {
            addressing,
            period_start: context.period_start,
            period_end: context.period_end,
            is_dynamic: context.is_dynamic,
            live_edge: context.live_edge,
            time_shift_buffer_depth: context.time_shift_buffer_depth,
        }
    }

    fn to_seconds(&self, ticks: i64, timescale: u64, presentation_time_offset: u64) -> f64 {
        (ticks as f64 - presentation_time_offset as f64) / timescale.max(1) as f64 + self.period_start
    }

    /// The expanded timeline entries, if this index uses a SegmentTimeline.
    pub fn timeline(&self) -> Option<&[TimelineEntry]> {
        match &self.addressing {
            Addressing::Timeline { entries, .. } => Some(entries),
            _ => None,
        }
    }

    pub fn period_end(&self) -> Option<f64> {
        self.period_end
    }
}

impl SegmentIndex for MpdSegmentIndex {
    fn last_available_position(&self) -> LastPosition {
        match &self.addressing {
            Addressing::Timeline { timescale, presentation_time_offset, entries } => {
                let Some(last) = entries.last() else {
                    return LastPosition::Empty;
                };
                match last.end() {
                    Some(end) => LastPosition::Known(self.to_seconds(end, *timescale, *presentation_time_offset)),
                    None => match self.period_end {
                        Some(end) => LastPosition::Known(end),
                        None => LastPosition::Indeterminate,
                    },
                }
            },
            Addressing::Template { timescale, duration, availability_time_offset } => {
                if !self.is_dynamic {
                    return match self.period_end {
                        Some(end) => LastPosition::Known(end),
                        None => LastPosition::Indeterminate,
                    };
                }
                let Some(live_edge) = self.live_edge else {
                    return LastPosition::Indeterminate;
                };
                let segment_duration = duration / (*timescale).max(1) as f64;
                if segment_duration <= 0.0 {
                    return LastPosition::Indeterminate;
                }
                let mut maximum = live_edge + availability_time_offset;
                if let Some(end) = self.period_end {
                    maximum = maximum.min(end);
                }
                let complete = ((maximum - self.period_start) / segment_duration).floor();
                if complete < 1.0 {
                    return LastPosition::Empty;
                }
                LastPosition::Known(self.period_start + complete * segment_duration)
            },
            Addressing::List { timescale, duration, count } => {
                if *count == 0 {
                    return LastPosition::Empty;
                }
                match duration {
                    Some(d) => {
                        let end = self.period_start + (*count as f64) * (*d as f64) / (*timescale).max(1) as f64;
                        LastPosition::Known(self.period_end.map_or(end, |pe| pe.min(end)))
                    },
                    None => self.period_end.map_or(LastPosition::Indeterminate, LastPosition::Known),
                }
            },
            Addressing::Base => self.period_end.map_or(LastPosition::Indeterminate, LastPosition::Known),
        }
    }

    fn first_available_position(&self) -> LastPosition {
        match &self.addressing {
            Addressing::Timeline { timescale, presentation_time_offset, entries } => match entries.first() {
                Some(first) => LastPosition::Known(self.to_seconds(first.start, *timescale, *presentation_time_offset)),
                None => LastPosition::Empty,
            },
            Addressing::Template { timescale, duration, .. } if self.is_dynamic => {
                let segment_duration = duration / (*timescale).max(1) as f64;
                match (self.live_edge, self.time_shift_buffer_depth) {
                    (Some(live_edge), Some(depth)) if segment_duration > 0.0 => {
                        // the oldest segment still ending inside the time-shift window
                        let skipped = ((live_edge - depth - self.period_start) / segment_duration).floor().max(0.0);
                        LastPosition::Known(self.period_start + skipped * segment_duration)
                    },
                    _ => LastPosition::Known(self.period_start),
                }
            },
            Addressing::List { count: 0, .. } => LastPosition::Empty,
            _ => LastPosition::Known(self.period_start),
        }
    }

    fn update(&mut self, newer: &dyn SegmentIndex) {
        let Some(newer) = newer.as_any().downcast_ref::<MpdSegmentIndex>() else {
            return;
        };
        match (&mut self.addressing, &newer.addressing) {
            (Addressing::Timeline { entries, timescale, .. },
             Addressing::Timeline { entries: new_entries, timescale: new_timescale, .. })
                if timescale == new_timescale =>
            {
                // keep the older segments which precede the refreshed timeline
                if let Some(new_start) = new_entries.first().map(|e| e.start) {
                    let mut kept = Vec::with_capacity(entries.len() + new_entries.len());
                    for e in entries.iter() {
                        if e.start >= new_start {
                            break;
                        }
                        match e.end() {
                            Some(end) if end <= new_start => kept.push(*e),
                            _ => {
                                // an entry straddling the new start is cut to its whole segments
                                let whole = new_start.saturating_sub(e.start) / e.duration.max(1);
                                if whole >= 1 {
                                    kept.push(TimelineEntry { repeat: whole - 1, ..*e });
                                }
                                break;
                            },
                        }
                    }
                    kept.extend(new_entries.iter().copied());
                    *entries = kept;
                }
            },
            _ => self.addressing = newer.addressing.clone(),
        }
        self.period_start = newer.period_start;
        self.period_end = newer.period_end;
        self.live_edge = newer.live_edge;
        self.time_shift_buffer_depth = newer.time_shift_buffer_depth;
        self.is_dynamic = newer.is_dynamic;
    }

    fn replace(&mut self, newer: &dyn SegmentIndex) {
        if let Some(newer) = newer.as_any().downcast_ref::<MpdSegmentIndex>() {
            *self = newer.clone();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
