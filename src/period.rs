//! Period timing inference and composition.
//
// Period@start and Period@duration are both optional. The rules of ISO/IEC 23009-1 clause 5.3.2.1
// let us infer a missing start from the end of the previous Period (or from the beginning of the
// presentation for the first Period), and a missing duration from the start of the next Period or
// from MPD@mediaPresentationDuration for the last one.

use std::time::Duration;
use tracing::{debug, warn};
use crate::adaptation::parse_adaptation_sets;
use crate::bounds::{guess_last_position_from_clock, maximum_last_position, ManifestBoundsCalculator};
use crate::content_protection::ContentProtectionParser;
use crate::ir;
use crate::parsed::{ParsedPeriod, StreamEvent};
use crate::representation::{resolve_base_urls, ResolvedBaseUrl};
use crate::segment::{LastPosition, SegmentIndexBuilder};
use crate::{dedup_id, ManifestError, ManifestWarning};


/// What we need to know about a Period while normalizing its content.
#[derive(Debug, Clone, Copy)]
pub struct PeriodContext<'a> {
    /// BaseURLs resolved down to the element being normalized.
    pub base_urls: &'a [ResolvedBaseUrl],
    pub period_template: Option<&'a ir::SegmentTemplate>,
    pub start: f64,
    pub end: Option<f64>,
    pub is_dynamic: bool,
    pub manifest_profiles: Option<&'a str>,
    pub live_edge: Option<f64>,
    pub time_shift_buffer_depth: Option<f64>,
    pub received_time: Option<f64>,
    pub index_builder: &'a dyn SegmentIndexBuilder,
}

/// What we need to know about the whole document while composing its Periods.
#[derive(Debug, Clone, Copy)]
pub struct DocumentContext<'a> {
    pub base_urls: &'a [ResolvedBaseUrl],
    pub is_dynamic: bool,
    /// Seconds since the Unix epoch, zero for static content.
    pub availability_start_time: f64,
    pub duration: Option<f64>,
    pub manifest_profiles: Option<&'a str>,
    pub time_shift_buffer_depth: Option<f64>,
    pub received_time: Option<f64>,
    pub clock_offset: Option<f64>,
    /// For Periods loaded through XLink, when their resource was received. Indexed like the Periods.
    pub period_received_times: &'a [Option<f64>],
    pub index_builder: &'a dyn SegmentIndexBuilder,
}

/// Computed timing of one Period, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodTimeInfo {
    pub start: f64,
    pub duration: Option<f64>,
    pub end: Option<f64>,
}

fn secs(d: Option<Duration>) -> Option<f64> {
    d.map(|d| d.as_secs_f64())
}

/// Compute the start, duration and end of each Period, in document order.
pub fn periods_time_infos(
    periods: &[ir::Period],
    is_dynamic: bool,
    availability_start_time: f64,
    mpd_duration: Option<f64>) -> Result<Vec<PeriodTimeInfo>, ManifestError>
{
    let mut infos: Vec<PeriodTimeInfo> = Vec::with_capacity(periods.len());
    for (index, period) in periods.iter().enumerate() {
        let start = match secs(period.start) {
            Some(start) => start,
            None if index == 0 => if is_dynamic { availability_start_time } else { 0.0 },
            None => match infos.last().and_then(|prev| prev.end) {
                Some(end) => end,
                None => return Err(ManifestError::MissingPeriodStart { index }),
            },
        };
        let duration = match secs(period.duration) {
            Some(d) => Some(d),
            None if index == periods.len() - 1 => mpd_duration.map(|d| d - start),
            None => periods.get(index + 1)
                .and_then(|next| secs(next.start))
                .map(|next_start| next_start - start),
        };
        infos.push(PeriodTimeInfo { start, duration, end: duration.map(|d| start + d) });
    }
    Ok(infos)
}

/// Convert the EventStreams of a Period to stream events on the presentation timeline.
pub fn stream_events(event_streams: &[ir::EventStream], period_start: f64) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    for stream in event_streams {
        let timescale = stream.timescale.unwrap_or(1).max(1);
        for event in &stream.event {
            let start = event.presentationTime.unwrap_or(0) as f64 / timescale as f64 + period_start;
            events.push(StreamEvent {
                id: event.id.clone(),
                start,
                end: event.duration.map(|d| start + d as f64 / timescale as f64),
                scheme_id_uri: stream.schemeIdUri.clone().unwrap_or_default(),
                value: stream.value.clone().unwrap_or_default(),
                timescale,
                data: event.messageData.clone().or_else(|| event.content.clone()),
            });
        }
    }
    events
}

/// Sort Periods by start time and resolve overlaps: a Period overlapped by its successor is cut at
/// the successor's start, and dropped if nothing remains of it. Of several Periods sharing a start
/// time, only the last one is kept.
pub fn flatten_overlapping_periods(mut periods: Vec<ParsedPeriod>) -> Vec<ParsedPeriod> {
    periods.sort_by(|a, b| a.start.total_cmp(&b.start));
    let mut flattened: Vec<ParsedPeriod> = Vec::with_capacity(periods.len());
    for period in periods {
        while let Some(last) = flattened.last_mut() {
            let overlaps = last.start >= period.start || match last.duration {
                None => true,
                Some(d) => last.start + d > period.start,
            };
            if !overlaps {
                break;
            }
            warn!("Period {} overlaps Period {}, truncating it", last.id, period.id);
            last.duration = Some(period.start - last.start);
            last.end = Some(period.start);
            if period.start - last.start > 0.0 {
                break;
            }
            debug!("Dropping Period {} truncated to nothing", last.id);
            flattened.pop();
        }
        flattened.push(period);
    }
    flattened
}

/// Compose all the Periods of a document. Periods are normalized from last to first so that the
/// last position found in later Periods is known when earlier ones are handled.
pub fn parse_periods(
    periods: &[ir::Period],
    ctx: &DocumentContext<'_>,
    bounds: &mut ManifestBoundsCalculator,
    protection: &mut ContentProtectionParser,
    warnings: &mut Vec<ManifestWarning>) -> Result<Vec<ParsedPeriod>, ManifestError>
{
    let infos = periods_time_infos(periods, ctx.is_dynamic, ctx.availability_start_time, ctx.duration)?;
    if !ctx.is_dynamic {
        if let Some(duration) = ctx.duration {
            bounds.set_last_position(duration, None);
        }
    }

    let mut ids: Vec<String> = Vec::with_capacity(periods.len());
    for (index, period) in periods.iter().enumerate() {
        let id = match period.id.as_ref().filter(|id| !id.is_empty()) {
            Some(id) => id.clone(),
            None => {
                warn!("No usable id found for Period #{index}, generating one");
                format!("gen-dash-period-{index}")
            },
        };
        ids.push(dedup_id(id, &ids));
        protection.add_references(&period.ContentProtection);
    }

    let mut parsed: Vec<ParsedPeriod> = Vec::with_capacity(periods.len());
    for (index, period) in periods.iter().enumerate().rev() {
        let info = infos[index];
        let base_urls = resolve_base_urls(ctx.base_urls, &period.BaseURL);
        let received_time = ctx.period_received_times.get(index).copied().flatten().or(ctx.received_time);
        let period_ctx = PeriodContext {
            base_urls: &base_urls,
            period_template: period.SegmentTemplate.as_ref(),
            start: info.start,
            end: info.end,
            is_dynamic: ctx.is_dynamic,
            manifest_profiles: ctx.manifest_profiles,
            live_edge: bounds.estimated_live_edge(),
            time_shift_buffer_depth: ctx.time_shift_buffer_depth,
            received_time,
            index_builder: ctx.index_builder,
        };
        let tracks = parse_adaptation_sets(&period.adaptations, &period_ctx, protection, warnings);

        if !bounds.last_position_is_known() {
            let last_position = maximum_last_position(tracks.iter());
            if let LastPosition::Known(position) = last_position {
                let position_time = ctx.is_dynamic.then(|| bounds.time_source().monotonic_ms());
                bounds.set_last_position(position, position_time);
            } else if ctx.is_dynamic {
                let guess = guess_last_position_from_clock(ctx.clock_offset,
                                                           ctx.availability_start_time,
                                                           bounds.time_source().as_ref(),
                                                           info.start);
                if let Some((position, time)) = guess {
                    bounds.set_last_position(position, Some(time));
                }
            }
        }

        parsed.push(ParsedPeriod {
            id: ids[index].clone(),
            start: info.start,
            duration: info.duration,
            end: info.end,
            tracks,
            stream_events: stream_events(&period.event_streams, info.start),
        });
    }

    if ctx.is_dynamic && !bounds.last_position_is_known() {
        let guess = guess_last_position_from_clock(ctx.clock_offset,
                                                   ctx.availability_start_time,
                                                   bounds.time_source().as_ref(),
                                                   0.0);
        if let Some((position, time)) = guess {
            bounds.set_last_position(position, Some(time));
        }
    }
    parsed.reverse();
    Ok(flatten_overlapping_periods(parsed))
}
