//! Merging a refreshed manifest into the existing model.
//
// Entities are matched by id (Periods by id, tracks by type and id, Representations by id). A
// matched entity is updated in place, so that references held elsewhere by id stay valid. Entities
// only present in the refreshed manifest are added and entities which disappeared are removed; a
// diagnostic warning is emitted in both cases because compliant live manifests should not do this
// within a Period.

use tracing::{debug, error, warn};
use crate::manifest::{Period, PeriodMetadata, RepresentationMetadata, Track, TrackMetadata, TrackType};
use crate::{ManifestError, ManifestWarning};


/// How the Representations' segment indexes are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateType {
    /// The refreshed manifest describes the whole content: indexes are replaced.
    Full,
    /// The refreshed manifest may only describe recent content: indexes are extended.
    Partial,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemovedTrack {
    pub id: String,
    pub track_type: TrackType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdatedTrackResult {
    pub track_id: String,
    pub track_type: TrackType,
    pub updated_representations: Vec<RepresentationMetadata>,
    pub added_representations: Vec<RepresentationMetadata>,
    pub removed_representations: Vec<String>,
}

/// Changes within one Period which was present both before and after the update.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PeriodUpdateResult {
    pub updated_tracks: Vec<UpdatedTrackResult>,
    pub removed_tracks: Vec<RemovedTrack>,
    pub added_tracks: Vec<TrackMetadata>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdatedPeriodResult {
    pub period: PeriodMetadata,
    pub result: PeriodUpdateResult,
}

/// The structured diff produced by a manifest update.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PeriodsUpdateResult {
    pub updated_periods: Vec<UpdatedPeriodResult>,
    pub added_periods: Vec<PeriodMetadata>,
    pub removed_periods: Vec<PeriodMetadata>,
}

impl PeriodsUpdateResult {
    /// Whether anything was added or removed, at any level.
    pub fn has_structural_changes(&self) -> bool {
        !self.added_periods.is_empty()
            || !self.removed_periods.is_empty()
            || self.updated_periods.iter().any(|p| {
                !p.result.added_tracks.is_empty()
                    || !p.result.removed_tracks.is_empty()
                    || p.result.updated_tracks.iter().any(|t| {
                        !t.added_representations.is_empty() || !t.removed_representations.is_empty()
                    })
            })
    }
}

/// Returned by [`crate::Manifest::update`] and [`crate::Manifest::replace`].
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestUpdate {
    pub periods: PeriodsUpdateResult,
    pub warnings: Vec<ManifestWarning>,
}


fn update_track_in_place(
    old: &mut Track,
    new: Track,
    update_type: UpdateType,
    warnings: &mut Vec<ManifestWarning>) -> UpdatedTrackResult
{
    let mut result = UpdatedTrackResult {
        track_id: old.id.clone(),
        track_type: old.track_type,
        updated_representations: Vec::new(),
        added_representations: Vec::new(),
        removed_representations: Vec::new(),
    };
    old.trick_mode_track_ids = new.trick_mode_track_ids;
    let mut new_reps = new.representations;
    let mut i = 0;
    while i < old.representations.len() {
        let Some(pos) = new_reps.iter().position(|r| r.id == old.representations[i].id) else {
            let removed = old.representations.remove(i);
            warn!("Representation {} of track {} disappeared from the refreshed manifest", removed.id, old.id);
            warnings.push(ManifestWarning::RemovedRepresentation {
                track_id: old.id.clone(),
                representation_id: removed.id.clone(),
            });
            result.removed_representations.push(removed.id);
            continue;
        };
        let new_rep = new_reps.remove(pos);
        let rep = &mut old.representations[i];
        rep.cdn_metadata = new_rep.cdn_metadata;
        if let Some(data) = new_rep.content_protections {
            match rep.content_protections.as_mut() {
                Some(current) => {
                    if current.merge(&data) {
                        debug!("New protection data for Representation {}", rep.id);
                    }
                },
                None => rep.content_protections = Some(data),
            }
        }
        match update_type {
            UpdateType::Full => rep.index.replace(new_rep.index.as_ref()),
            UpdateType::Partial => rep.index.update(new_rep.index.as_ref()),
        }
        result.updated_representations.push(rep.metadata());
        i += 1;
    }
    if !new_reps.is_empty() {
        warn!("{} new Representations in track {} of the refreshed manifest", new_reps.len(), old.id);
        warnings.push(ManifestWarning::UnexpectedNewRepresentations {
            track_id: old.id.clone(),
            count: new_reps.len(),
        });
        for rep in new_reps {
            result.added_representations.push(rep.metadata());
            old.representations.push(rep);
        }
        old.representations.sort_by_key(|r| r.bitrate);
    }
    old.refresh_support_aggregate();
    result
}

fn merge_tracks(
    period_id: &str,
    old_tracks: &mut Vec<Track>,
    new_tracks: Vec<Track>,
    update_type: UpdateType,
    result: &mut PeriodUpdateResult,
    warnings: &mut Vec<ManifestWarning>)
{
    let mut new_tracks = new_tracks;
    let mut i = 0;
    while i < old_tracks.len() {
        let Some(pos) = new_tracks.iter().position(|t| t.id == old_tracks[i].id) else {
            let removed = old_tracks.remove(i);
            warn!("Track {} of Period {period_id} disappeared from the refreshed manifest", removed.id);
            warnings.push(ManifestWarning::RemovedTrack {
                period_id: period_id.to_string(),
                track_id: removed.id.clone(),
            });
            result.removed_tracks.push(RemovedTrack { id: removed.id, track_type: removed.track_type });
            continue;
        };
        let new_track = new_tracks.remove(pos);
        let updated = update_track_in_place(&mut old_tracks[i], new_track, update_type, warnings);
        result.updated_tracks.push(updated);
        i += 1;
    }
    for track in new_tracks {
        result.added_tracks.push(track.metadata());
        old_tracks.push(track);
    }
}

/// Merge `new` into `old`, which must describe the same Period.
pub fn update_period_in_place(
    old: &mut Period,
    new: Period,
    update_type: UpdateType,
    warnings: &mut Vec<ManifestWarning>) -> PeriodUpdateResult
{
    let Period { start, duration, end, audio, video, text, trick_mode, stream_events, .. } = new;
    old.start = start;
    old.duration = duration;
    old.end = end;
    old.stream_events = stream_events;

    let mut result = PeriodUpdateResult::default();
    let period_id = old.id.clone();
    for (track_type, tracks) in [(TrackType::Audio, audio), (TrackType::Video, video), (TrackType::Text, text)] {
        merge_tracks(&period_id, old.tracks_mut(track_type), tracks, update_type, &mut result, warnings);
    }
    merge_tracks(&period_id, &mut old.trick_mode, trick_mode, update_type, &mut result, warnings);
    if !result.added_tracks.is_empty() {
        warn!("{} new tracks in Period {period_id} of the refreshed manifest", result.added_tracks.len());
        warnings.push(ManifestWarning::UnexpectedNewTracks {
            period_id,
            count: result.added_tracks.len(),
        });
    }
    result
}

fn record_removed(removed: Vec<Period>, result: &mut PeriodsUpdateResult, warnings: &mut Vec<ManifestWarning>) {
    for period in removed {
        debug!("Removing Period {}", period.id);
        warnings.push(ManifestWarning::RemovedPeriod { period_id: period.id.clone() });
        result.removed_periods.push(period.metadata());
    }
}

/// Full update: after this call `old` contains exactly the Periods of `new`, in the same order,
/// with Periods already present updated in place.
pub fn replace_periods(
    old: &mut Vec<Period>,
    new: Vec<Period>,
    warnings: &mut Vec<ManifestWarning>) -> PeriodsUpdateResult
{
    let mut result = PeriodsUpdateResult::default();
    let mut new: Vec<Option<Period>> = new.into_iter().map(Some).collect();
    // Below this index, `old` and `new` describe the same Periods.
    let mut first_unhandled = 0;
    for i in 0..new.len() {
        let Some(new_id) = new[i].as_ref().map(|p| p.id.clone()) else { continue };
        let Some(j) = old.iter().skip(first_unhandled).position(|p| p.id == new_id) else { continue };
        let j = j + first_unhandled;
        let Some(new_period) = new[i].take() else { continue };
        let updated = update_period_in_place(&mut old[j], new_period, UpdateType::Full, warnings);
        result.updated_periods.push(UpdatedPeriodResult { period: old[j].metadata(), result: updated });

        let added: Vec<Period> = new[first_unhandled..i].iter_mut().filter_map(Option::take).collect();
        result.added_periods.extend(added.iter().map(Period::metadata));
        let removed: Vec<Period> = old.splice(first_unhandled..j, added).collect();
        record_removed(removed, &mut result, warnings);
        first_unhandled = i + 1;
    }

    if first_unhandled > old.len() {
        error!("Unexpected Period bookkeeping state while replacing Periods");
        return result;
    }
    let removed: Vec<Period> = old.drain(first_unhandled..).collect();
    record_removed(removed, &mut result, warnings);
    let added: Vec<Period> = new.into_iter().skip(first_unhandled).flatten().collect();
    result.added_periods.extend(added.iter().map(Period::metadata));
    old.extend(added);
    result
}

/// Partial update: `new` may start later than `old` (older Periods having been dropped from the
/// refreshed manifest), but must overlap or directly follow it.
pub fn update_periods(
    old: &mut Vec<Period>,
    new: Vec<Period>,
    warnings: &mut Vec<ManifestWarning>) -> Result<PeriodsUpdateResult, ManifestError>
{
    let mut result = PeriodsUpdateResult::default();
    if old.is_empty() {
        result.added_periods.extend(new.iter().map(Period::metadata));
        old.extend(new);
        return Ok(result);
    }
    let (Some(old_last), Some(new_first)) = (old.last(), new.first()) else {
        return Ok(result);
    };

    if old_last.start < new_first.start {
        if old_last.end != Some(new_first.start) {
            return Err(ManifestError::UpdateFailed(String::from("not enough data")));
        }
        result.added_periods.extend(new.iter().map(Period::metadata));
        old.extend(new);
        return Ok(result);
    }

    let Some(index_of_first) = old.iter().position(|p| p.id == new_first.id) else {
        return Err(ManifestError::UpdateFailed(String::from("incoherent data")));
    };

    let mut new = new.into_iter();
    // Periods of `old` before this index are left alone; from it on they are matched consecutively
    // against `new`.
    let mut old_idx = index_of_first;
    while let Some(new_period) = new.next() {
        let Some(pos) = old.iter().skip(old_idx).position(|p| p.id == new_period.id) else {
            // Past the end of the old list or not known: insert before the next old Period.
            result.added_periods.push(new_period.metadata());
            old.insert(old_idx, new_period);
            old_idx += 1;
            continue;
        };
        let pos = pos + old_idx;
        let removed: Vec<Period> = old.drain(old_idx..pos).collect();
        record_removed(removed, &mut result, warnings);
        let updated = update_period_in_place(&mut old[old_idx], new_period, UpdateType::Partial, warnings);
        result.updated_periods.push(UpdatedPeriodResult { period: old[old_idx].metadata(), result: updated });
        old_idx += 1;
    }
    // Old Periods which come after all the new ones are no longer announced.
    if old_idx < old.len() {
        let removed: Vec<Period> = old.drain(old_idx..).collect();
        record_removed(removed, &mut result, warnings);
    }
    Ok(result)
}
